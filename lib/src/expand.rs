//! Campaign expansion: one due campaign becomes one pending message per
//! eligible recipient.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;

use crate::account;
use crate::attendees::AttendeeLookup;
use crate::campaign::{self, Campaign, EventId};
use crate::db::{Batch, Database};
use crate::list::{self, ListId};
use crate::message::{self, Contact, Message};
use crate::subscriber::{self, Subscriber, SubscriberId};
use crate::suppression::SuppressionCache;
use crate::template::{Fields, Template};
use crate::{ErrorKind, Result};

#[derive(Clone)]
pub struct Expander {
    db: Database,
    suppression: Arc<SuppressionCache>,
    attendees: Option<Arc<dyn AttendeeLookup>>,
}

impl Expander {
    pub fn new(
        db: Database,
        suppression: Arc<SuppressionCache>,
        attendees: Option<Arc<dyn AttendeeLookup>>,
    ) -> Self {
        Self {
            db,
            suppression,
            attendees,
        }
    }

    /// Expands the campaign for the lists and events it targets.
    pub async fn expand(&self, campaign: &Campaign) -> Result<usize> {
        self.expand_targets(campaign, &campaign.lists, &campaign.events).await
    }

    /// Creates the messages of `campaign` for the given targets and marks
    /// the campaign expanded, all in one write. Nothing is stored if any
    /// step fails. Returns the number of messages created.
    pub async fn expand_targets(&self, campaign: &Campaign, lists: &[ListId], events: &[EventId]) -> Result<usize> {
        if campaign.status != campaign::Status::Scheduled {
            return Err(ErrorKind::Validation(format!("campaign {} is already expanded", campaign.id)).into());
        }

        let sender = account::get(&self.db, campaign.account)?;
        let template = Template::parse(&campaign.body)?;

        let mut batch = Batch::new();
        let mut count = 0;
        for recipient in self.recipients(campaign, lists, events)? {
            if !recipient.is_active() {
                tracing::trace!(subscriber = %recipient.id, "skipping deleted subscriber");
                continue;
            }
            if self.suppression.has_reported_spam(&recipient.email).await? {
                tracing::debug!(subscriber = %recipient.id, "skipping subscriber who reported spam");
                continue;
            }

            let unsubscribe_url = self.suppression.unsubscribe_url(&recipient);
            let body = template.render(&Fields::for_subscriber(&recipient, &unsubscribe_url));

            let mut message = Message::new(
                campaign.account,
                Contact::from(&sender),
                Contact::from(&recipient),
                campaign.subject.clone(),
                body,
            );
            message.campaign = Some(campaign.id);
            message.unsubscribe_url = Some(unsubscribe_url);

            message::stage(&mut batch, &message)?;
            count += 1;
        }

        campaign::mark_expanded(&mut batch, campaign, Utc::now())?;
        self.db.apply(batch)?;

        tracing::info!(campaign = %campaign.id, messages = count, "expanded campaign");
        Ok(count)
    }

    /// Distinct subscribers reachable through the targets, list members
    /// first.
    fn recipients(&self, campaign: &Campaign, lists: &[ListId], events: &[EventId]) -> Result<Vec<Subscriber>> {
        let mut seen: HashSet<SubscriberId> = HashSet::new();
        let mut out = Vec::new();

        for id in lists {
            let list = match list::get(&self.db, *id) {
                Ok(list) => list,
                Err(e) if e.is_not_found() => {
                    tracing::warn!(campaign = %campaign.id, list = %id, "target list is gone, skipping it");
                    continue;
                }
                Err(e) => return Err(e),
            };
            if list.account != campaign.account {
                return Err(ErrorKind::Validation(format!(
                    "list {} belongs to a different account than campaign {}",
                    list.id, campaign.id
                ))
                .into());
            }
            for member in list::subscribers_of(&self.db, list.id)? {
                if seen.insert(member.id) {
                    out.push(member);
                }
            }
        }

        if events.is_empty() {
            return Ok(out);
        }
        let Some(lookup) = &self.attendees else {
            tracing::warn!(
                campaign = %campaign.id,
                "attendee lookup not configured, skipping event recipients"
            );
            return Ok(out);
        };

        for event in events {
            for attendee in lookup.for_event(*event) {
                let mut sub = Subscriber::new(
                    campaign.account,
                    attendee.first_name,
                    attendee.last_name,
                    attendee.email,
                );
                match subscriber::get_or_insert(&self.db, &mut sub) {
                    Ok(()) => {}
                    Err(e) if e.is_store() => return Err(e),
                    Err(e) => {
                        tracing::warn!(event, email = %sub.email, "skipping attendee: {}", e);
                        continue;
                    }
                }
                if seen.insert(sub.id) {
                    out.push(sub);
                }
            }
        }

        Ok(out)
    }
}
