use uuid::Uuid;
use validator::ValidateEmail;

use crate::account::{self, AccountId};
use crate::db::{Batch, Collectable, Database, Identifiable};
use crate::{ErrorKind, Result};

pub type SubscriberId = Uuid;

/// Lookup collection keyed by account id followed by the lowercase email.
const BY_EMAIL: &str = "subscriber_by_email";

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Status {
    #[default]
    Active,
    /// Deleted or unsubscribed. Never receives campaign messages.
    Deleted,
}

/// A subscriber stores a single email address and the name used when
/// addressing it. A given email address has one subscriber per account.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Subscriber {
    pub id: SubscriberId,
    pub account: AccountId,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub status: Status,
}

impl Subscriber {
    pub fn new(
        account: AccountId,
        first_name: impl Into<String>,
        last_name: impl Into<String>,
        email: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            account,
            first_name: first_name.into(),
            last_name: last_name.into(),
            email: email.into(),
            status: Status::Active,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == Status::Active
    }

    pub fn validate(&self) -> Result<()> {
        if self.first_name.trim().is_empty() || self.last_name.trim().is_empty() {
            return Err(ErrorKind::Validation("subscriber name is required".to_string()).into());
        }
        if !self.email.validate_email() {
            return Err(ErrorKind::Validation(format!("invalid subscriber email: {}", self.email)).into());
        }
        Ok(())
    }
}

impl Collectable for Subscriber {
    fn get_collection_name() -> &'static str {
        "subscriber"
    }
}

impl Identifiable for Subscriber {
    fn get_id(&self) -> Uuid {
        self.id
    }
}

fn email_key(account: AccountId, email: &str) -> Vec<u8> {
    let mut key = account.as_bytes().to_vec();
    key.extend_from_slice(email.trim().to_lowercase().as_bytes());
    key
}

pub fn insert(db: &Database, subscriber: &Subscriber) -> Result<()> {
    subscriber.validate()?;
    account::get(db, subscriber.account)?;
    let key = email_key(subscriber.account, &subscriber.email);
    if db.lookup(BY_EMAIL, &key)?.is_some() {
        return Err(ErrorKind::Validation(format!(
            "subscriber already exists: {}",
            subscriber.email
        ))
        .into());
    }

    let mut batch = Batch::new();
    batch.set(subscriber)?;
    batch.insert_raw(BY_EMAIL, key, subscriber.id.as_bytes());
    db.apply(batch)
}

pub fn get(db: &Database, id: SubscriberId) -> Result<Subscriber> {
    db.get(id)
}

pub fn find_by_email(db: &Database, account: AccountId, email: &str) -> Result<Option<Subscriber>> {
    match db.lookup(BY_EMAIL, email_key(account, email))? {
        Some(id) => db.find_at(Subscriber::get_collection_name(), id),
        None => Ok(None),
    }
}

/// Fetches the subscriber with the same account and email, inserting the
/// given one if there is none. On return `subscriber` holds the stored
/// record.
pub fn get_or_insert(db: &Database, subscriber: &mut Subscriber) -> Result<()> {
    match find_by_email(db, subscriber.account, &subscriber.email)? {
        Some(existing) => {
            *subscriber = existing;
            Ok(())
        }
        None => insert(db, subscriber),
    }
}

/// Updates names and status. The account and email of a subscriber are
/// fixed once stored.
pub fn update(db: &Database, subscriber: &Subscriber) -> Result<()> {
    subscriber.validate()?;
    let existing = get(db, subscriber.id)?;
    if existing.account != subscriber.account
        || email_key(existing.account, &existing.email) != email_key(subscriber.account, &subscriber.email)
    {
        return Err(ErrorKind::Validation("subscriber account and email can't change".to_string()).into());
    }
    db.set(subscriber)
}

pub fn set_status(db: &Database, id: SubscriberId, status: Status) -> Result<Subscriber> {
    let mut subscriber = get(db, id)?;
    subscriber.status = status;
    db.set(&subscriber)?;
    Ok(subscriber)
}

pub fn delete(db: &Database, id: SubscriberId) -> Result<()> {
    let existing = get(db, id)?;
    let mut batch = Batch::new();
    batch.remove_raw(Subscriber::get_collection_name(), id.as_bytes());
    batch.remove_raw(BY_EMAIL, email_key(existing.account, &existing.email));
    for list in crate::list::lists_of_subscriber(db, id)? {
        batch.remove_raw(crate::list::MEMBERS, crate::db::pair_key(list, id));
        batch.remove_raw(crate::list::MEMBERSHIPS, crate::db::pair_key(id, list));
    }
    db.apply(batch)
}
