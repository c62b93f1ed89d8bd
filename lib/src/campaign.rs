use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::account::{self, AccountId};
use crate::db::{time_key, Batch, Collectable, Database, Identifiable};
use crate::list::{self, ListId};
use crate::message;
use crate::template::Template;
use crate::{ErrorKind, Result};

pub type CampaignId = Uuid;

/// Identifier of an event in the attendee system. Events are not stored
/// here, they are only resolved to recipients during expansion.
pub type EventId = i64;

/// Time-ordered index of campaigns waiting for expansion.
pub(crate) const DUE: &str = "campaign_due";

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Status {
    /// Waiting for its scheduled time.
    #[default]
    Scheduled,
    /// All messages of the campaign exist.
    Expanded,
    /// Expansion can never succeed, see `Campaign::error`.
    Failed,
}

/// Bulk email sent to all recipients of the targeted lists and events
/// once its scheduled time has passed.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Campaign {
    pub id: CampaignId,
    pub account: AccountId,
    pub subject: String,
    /// Body template, see [`crate::template`].
    pub body: String,
    pub scheduled: DateTime<Utc>,
    pub status: Status,

    pub lists: Vec<ListId>,
    pub events: Vec<EventId>,

    pub created: DateTime<Utc>,
    pub expanded: Option<DateTime<Utc>>,
    /// Why expansion was given up.
    #[serde(default)]
    pub error: Option<String>,
}

impl Campaign {
    pub fn new(
        account: AccountId,
        subject: impl Into<String>,
        body: impl Into<String>,
        scheduled: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            account,
            subject: subject.into(),
            body: body.into(),
            scheduled,
            status: Status::Scheduled,
            lists: Vec::new(),
            events: Vec::new(),
            created: Utc::now(),
            expanded: None,
            error: None,
        }
    }

    /// Scheduled and with its time not in the future.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == Status::Scheduled && self.scheduled <= now
    }
}

impl Collectable for Campaign {
    fn get_collection_name() -> &'static str {
        "campaign"
    }
}

impl Identifiable for Campaign {
    fn get_id(&self) -> Uuid {
        self.id
    }
}

/// Stores a new campaign targeting the given lists and events.
///
/// The body template is checked here so that a campaign which could never
/// be expanded is rejected instead of stored.
pub fn insert(db: &Database, campaign: &mut Campaign, lists: &[ListId], events: &[EventId]) -> Result<()> {
    if campaign.subject.trim().is_empty() {
        return Err(ErrorKind::Validation("campaign subject is required".to_string()).into());
    }
    Template::parse(&campaign.body)
        .map_err(|e| ErrorKind::Validation(format!("campaign body: {}", e.kind)))?;
    account::get(db, campaign.account)?;
    for id in lists {
        let list = list::get(db, *id)?;
        if list.account != campaign.account {
            return Err(ErrorKind::Validation(format!(
                "list {} belongs to a different account",
                list.id
            ))
            .into());
        }
    }

    campaign.status = Status::Scheduled;
    campaign.expanded = None;
    campaign.error = None;
    campaign.lists = lists.to_vec();
    campaign.lists.sort();
    campaign.lists.dedup();
    campaign.events = events.to_vec();
    campaign.events.sort();
    campaign.events.dedup();

    let mut batch = Batch::new();
    batch.set(&*campaign)?;
    batch.index(DUE, time_key(campaign.scheduled, campaign.id), campaign.id);
    db.apply(batch)
}

pub fn get(db: &Database, id: CampaignId) -> Result<Campaign> {
    db.get(id)
}

/// Oldest campaign that is due at `now`, if any.
pub fn due(db: &Database, now: DateTime<Utc>) -> Result<Option<Campaign>> {
    let campaign: Option<Campaign> = db.first_indexed(DUE, now)?;
    Ok(campaign.filter(|c| c.is_due(now)))
}

/// Campaigns still waiting for expansion, due or not.
pub fn scheduled(db: &Database) -> Result<Vec<Campaign>> {
    let mut campaigns: Vec<Campaign> = db.get_collection()?;
    campaigns.retain(|c| c.status == Status::Scheduled);
    Ok(campaigns)
}

/// Removes a campaign that has not been expanded.
pub fn delete(db: &Database, id: CampaignId) -> Result<()> {
    let campaign = get(db, id)?;
    if campaign.status == Status::Expanded {
        return Err(ErrorKind::Validation(format!("campaign {} is already expanded", id)).into());
    }
    let mut batch = Batch::new();
    batch.remove_raw(Campaign::get_collection_name(), id.as_bytes());
    batch.remove_raw(DUE, time_key(campaign.scheduled, id));
    db.apply(batch)
}

/// Adds the transition of `campaign` to expanded into `batch`.
pub(crate) fn mark_expanded(batch: &mut Batch, campaign: &Campaign, now: DateTime<Utc>) -> Result<()> {
    let mut expanded = campaign.clone();
    expanded.status = Status::Expanded;
    expanded.expanded = Some(now);
    batch.set(&expanded)?;
    batch.remove_raw(DUE, time_key(campaign.scheduled, campaign.id));
    Ok(())
}

/// Takes the campaign out of the due queue for good, keeping `reason`.
/// Does nothing if the stored campaign is no longer scheduled.
pub fn mark_failed(db: &Database, campaign: &Campaign, reason: &str) -> Result<()> {
    let mut failed = get(db, campaign.id)?;
    if failed.status != Status::Scheduled {
        return Ok(());
    }
    failed.status = Status::Failed;
    failed.error = Some(reason.to_string());

    let mut batch = Batch::new();
    batch.set(&failed)?;
    batch.remove_raw(DUE, time_key(failed.scheduled, failed.id));
    db.apply(batch)
}

/// Delivery state of the messages of one campaign.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Progress {
    pub pending: usize,
    pub sent: usize,
    pub failed: usize,
}

impl Progress {
    pub fn total(&self) -> usize {
        self.pending + self.sent + self.failed
    }
}

pub fn progress(db: &Database, id: CampaignId) -> Result<Progress> {
    let mut progress = Progress::default();
    for m in message::of_campaign(db, id)? {
        match m.status {
            message::Status::Pending => progress.pending += 1,
            message::Status::Sent => progress.sent += 1,
            message::Status::Failed => progress.failed += 1,
        }
    }
    Ok(progress)
}

/// A campaign is done once it is expanded and none of its messages are
/// pending any more.
pub fn is_done(db: &Database, id: CampaignId) -> Result<bool> {
    let campaign = get(db, id)?;
    Ok(campaign.status == Status::Expanded && progress(db, id)?.pending == 0)
}
