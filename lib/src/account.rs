//! Accounts own every list, subscriber, campaign and message.

use uuid::Uuid;
use validator::ValidateEmail;

use crate::campaign;
use crate::db::{Batch, Collectable, Database, Identifiable};
use crate::{ErrorKind, Result};

pub type AccountId = Uuid;

/// Lookup collection mapping a lowercase email to the account id.
const BY_EMAIL: &str = "account_by_email";

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Status {
    #[default]
    Active,
    Deleted,
}

/// An account is equivalent to a user of the mailing list service. Messages
/// sent on behalf of an account use its name and email as the sender.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Account {
    pub id: AccountId,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub status: Status,
}

impl Account {
    pub fn new(first_name: impl Into<String>, last_name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            first_name: first_name.into(),
            last_name: last_name.into(),
            email: email.into(),
            status: Status::Active,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.first_name.trim().is_empty() || self.last_name.trim().is_empty() {
            return Err(ErrorKind::Validation("account name is required".to_string()).into());
        }
        if !self.email.validate_email() {
            return Err(ErrorKind::Validation(format!("invalid account email: {}", self.email)).into());
        }
        Ok(())
    }
}

impl Collectable for Account {
    fn get_collection_name() -> &'static str {
        "account"
    }
}

impl Identifiable for Account {
    fn get_id(&self) -> Uuid {
        self.id
    }
}

fn email_key(email: &str) -> Vec<u8> {
    email.trim().to_lowercase().into_bytes()
}

pub fn insert(db: &Database, account: &Account) -> Result<()> {
    account.validate()?;
    if db.lookup(BY_EMAIL, email_key(&account.email))?.is_some() {
        return Err(ErrorKind::Validation(format!("account already exists: {}", account.email)).into());
    }

    let mut batch = Batch::new();
    batch.set(account)?;
    batch.insert_raw(BY_EMAIL, email_key(&account.email), account.id.as_bytes());
    db.apply(batch)
}

pub fn get(db: &Database, id: AccountId) -> Result<Account> {
    db.get(id)
}

pub fn find_by_email(db: &Database, email: &str) -> Result<Option<Account>> {
    match db.lookup(BY_EMAIL, email_key(email))? {
        Some(id) => db.find_at(Account::get_collection_name(), id),
        None => Ok(None),
    }
}

pub fn update(db: &Database, account: &Account) -> Result<()> {
    account.validate()?;
    let existing = get(db, account.id)?;

    let mut batch = Batch::new();
    if email_key(&existing.email) != email_key(&account.email) {
        if db.lookup(BY_EMAIL, email_key(&account.email))?.is_some() {
            return Err(ErrorKind::Validation(format!("account already exists: {}", account.email)).into());
        }
        batch.remove_raw(BY_EMAIL, email_key(&existing.email));
        batch.insert_raw(BY_EMAIL, email_key(&account.email), account.id.as_bytes());
    }
    batch.set(account)?;
    db.apply(batch)
}

/// Inserts the account, or updates the existing account with the same
/// email. On return `account.id` is the stored id.
pub fn upsert(db: &Database, account: &mut Account) -> Result<()> {
    match find_by_email(db, &account.email)? {
        Some(existing) => {
            account.id = existing.id;
            update(db, account)
        }
        None => insert(db, account),
    }
}

/// Removes the account. Refused while one of its campaigns is scheduled,
/// since the campaign could no longer be sent from it.
pub fn delete(db: &Database, id: AccountId) -> Result<()> {
    let existing = get(db, id)?;
    if let Some(c) = campaign::scheduled(db)?.into_iter().find(|c| c.account == id) {
        return Err(ErrorKind::Validation(format!(
            "account {} has scheduled campaign {}",
            id, c.id
        ))
        .into());
    }

    let mut batch = Batch::new();
    batch.remove_raw(Account::get_collection_name(), id.as_bytes());
    batch.remove_raw(BY_EMAIL, email_key(&existing.email));
    db.apply(batch)
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;
    use crate::campaign::Campaign;

    #[test]
    fn upsert_reuses_the_account_with_the_same_email() {
        let db = Database::temporary().unwrap();
        let mut first = Account::new("Joe", "Bloggs", "sendgrid@eventarc.com");
        upsert(&db, &mut first).unwrap();

        let mut second = Account::new("Joseph", "Bloggs", "SendGrid@eventarc.com");
        upsert(&db, &mut second).unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(get(&db, first.id).unwrap().first_name, "Joseph");
        assert_eq!(db.len::<Account>().unwrap(), 1);
    }

    #[test]
    fn invalid_accounts_are_not_stored() {
        let db = Database::temporary().unwrap();
        let account = Account::new("Joe", "", "not-an-email");
        assert!(matches!(
            insert(&db, &account).unwrap_err().kind,
            ErrorKind::Validation(_)
        ));
        assert_eq!(db.len::<Account>().unwrap(), 0);
    }

    #[test]
    fn delete_frees_the_email() {
        let db = Database::temporary().unwrap();
        let account = Account::new("Brian", "Cohen", "briancohen@example.com");
        insert(&db, &account).unwrap();
        delete(&db, account.id).unwrap();

        assert!(get(&db, account.id).unwrap_err().is_not_found());
        assert!(find_by_email(&db, "briancohen@example.com").unwrap().is_none());
    }

    #[test]
    fn account_with_a_scheduled_campaign_is_kept() {
        let db = Database::temporary().unwrap();
        let account = Account::new("Joe", "Bloggs", "sendgrid@eventarc.com");
        insert(&db, &account).unwrap();
        let mut campaign = Campaign::new(account.id, "Soon", "Hi", Utc::now() + Duration::hours(1));
        campaign::insert(&db, &mut campaign, &[], &[1]).unwrap();

        let err = delete(&db, account.id).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::Validation(_)));
        assert!(get(&db, account.id).is_ok());

        campaign::delete(&db, campaign.id).unwrap();
        delete(&db, account.id).unwrap();
        assert!(get(&db, account.id).unwrap_err().is_not_found());
    }
}
