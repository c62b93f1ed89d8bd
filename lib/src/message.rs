use std::fmt::{Display, Formatter};

use chrono::{DateTime, Utc};
use uuid::Uuid;
use validator::ValidateEmail;

use crate::account::{Account, AccountId};
use crate::campaign::CampaignId;
use crate::db::{pair_key, time_key, Batch, Collectable, Database, Identifiable};
use crate::subscriber::Subscriber;
use crate::{ErrorKind, Result};

pub type MessageId = Uuid;

/// Time-ordered index of pending messages, keyed by the time they become
/// available for delivery.
pub(crate) const PENDING: &str = "message_pending";
/// Join collection keyed by campaign id followed by message id.
const BY_CAMPAIGN: &str = "campaign_message";

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Status {
    #[default]
    Pending,
    Sent,
    Failed,
}

/// Name and address of a sender or recipient.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct Contact {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
}

impl Contact {
    pub fn new(email: impl Into<String>, first_name: impl Into<String>, last_name: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            first_name: first_name.into(),
            last_name: last_name.into(),
        }
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

impl From<&Account> for Contact {
    fn from(account: &Account) -> Self {
        Self::new(&account.email, &account.first_name, &account.last_name)
    }
}

impl From<&Subscriber> for Contact {
    fn from(subscriber: &Subscriber) -> Self {
        Self::new(&subscriber.email, &subscriber.first_name, &subscriber.last_name)
    }
}

/// `email (first last)`
impl Display for Contact {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({} {})", self.email, self.first_name, self.last_name)
    }
}

/// One fully rendered email addressed to a single recipient.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Message {
    pub id: MessageId,
    /// Campaign the message was expanded from, `None` for one-off mail.
    pub campaign: Option<CampaignId>,
    pub account: AccountId,

    pub to: Contact,
    pub from: Contact,
    pub subject: String,
    pub body: String,
    pub unsubscribe_url: Option<String>,

    pub status: Status,
    pub created: DateTime<Utc>,
    /// Earliest time the message may be delivered.
    pub available: DateTime<Utc>,
    pub sent: Option<DateTime<Utc>>,

    pub attempts: u32,
    pub last_error: Option<String>,
}

impl Message {
    pub fn new(
        account: AccountId,
        from: Contact,
        to: Contact,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            campaign: None,
            account,
            to,
            from,
            subject: subject.into(),
            body: body.into(),
            unsubscribe_url: None,
            status: Status::Pending,
            created: now,
            available: now,
            sent: None,
            attempts: 0,
            last_error: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !self.to.email.validate_email() {
            return Err(ErrorKind::Validation(format!("invalid recipient: {}", self.to.email)).into());
        }
        if !self.from.email.validate_email() {
            return Err(ErrorKind::Validation(format!("invalid sender: {}", self.from.email)).into());
        }
        if self.subject.trim().is_empty() {
            return Err(ErrorKind::Validation("message subject is required".to_string()).into());
        }
        Ok(())
    }
}

impl Collectable for Message {
    fn get_collection_name() -> &'static str {
        "message"
    }
}

impl Identifiable for Message {
    fn get_id(&self) -> Uuid {
        self.id
    }
}

/// Adds a new pending message to `batch`.
pub(crate) fn stage(batch: &mut Batch, message: &Message) -> Result<()> {
    batch.set(message)?;
    batch.index(PENDING, time_key(message.available, message.id), message.id);
    if let Some(campaign) = message.campaign {
        batch.insert_raw(BY_CAMPAIGN, pair_key(campaign, message.id), message.id.as_bytes());
    }
    Ok(())
}

/// Stores a one-off message in pending state.
pub fn insert(db: &Database, message: &mut Message) -> Result<()> {
    message.validate()?;
    crate::account::get(db, message.account)?;
    message.status = Status::Pending;
    message.sent = None;

    let mut batch = Batch::new();
    stage(&mut batch, message)?;
    db.apply(batch)
}

pub fn get(db: &Database, id: MessageId) -> Result<Message> {
    db.get(id)
}

/// Oldest message that is pending and available at `now`, if any.
pub fn next_pending(db: &Database, now: DateTime<Utc>) -> Result<Option<Message>> {
    let message: Option<Message> = db.first_indexed(PENDING, now)?;
    Ok(message.filter(|m| m.status == Status::Pending))
}

pub fn of_campaign(db: &Database, campaign: CampaignId) -> Result<Vec<Message>> {
    let mut out = Vec::new();
    for id in db.ids_with_prefix(BY_CAMPAIGN, campaign.as_bytes())? {
        out.push(get(db, id)?);
    }
    Ok(out)
}

/// Records a successful delivery.
pub fn mark_sent(db: &Database, message: &mut Message, now: DateTime<Utc>) -> Result<()> {
    settle(db, message, |m| {
        m.status = Status::Sent;
        m.sent = Some(now);
        m.attempts += 1;
        m.last_error = None;
    })
}

/// Records a failed delivery. The message is never picked up again.
pub fn mark_failed(db: &Database, message: &mut Message, error: &str) -> Result<()> {
    settle(db, message, |m| {
        m.status = Status::Failed;
        m.attempts += 1;
        m.last_error = Some(error.to_string());
    })
}

/// Records a failed delivery that is to be attempted again once
/// `available` has passed.
pub fn requeue(db: &Database, message: &mut Message, error: &str, available: DateTime<Utc>) -> Result<()> {
    settle(db, message, |m| {
        m.attempts += 1;
        m.last_error = Some(error.to_string());
        m.available = available;
    })
}

/// Applies `update` to a message that is still pending in the store,
/// keeping the pending index in step.
fn settle(db: &Database, message: &mut Message, update: impl FnOnce(&mut Message)) -> Result<()> {
    let stored = get(db, message.id)?;
    if stored.status != Status::Pending {
        return Err(ErrorKind::Validation(format!(
            "message {} is already {}",
            message.id, stored.status
        ))
        .into());
    }

    *message = stored;
    let old_key = time_key(message.available, message.id);
    update(message);

    let mut batch = Batch::new();
    batch.set(&*message)?;
    batch.remove_raw(PENDING, old_key);
    if message.status == Status::Pending {
        batch.index(PENDING, time_key(message.available, message.id), message.id);
    }
    db.apply(batch)
}
