//! Mailing lists.
//!
//! A list belongs to a single account and groups any number of that
//! account's subscribers. Membership is a plain many-to-many join, kept in
//! both directions so that members of a list and lists of a subscriber can
//! be enumerated without scanning.

use uuid::Uuid;

use crate::account::{self, AccountId};
use crate::campaign;
use crate::db::{pair_key, Batch, Collectable, Database, Identifiable};
use crate::subscriber::{self, Subscriber, SubscriberId};
use crate::{ErrorKind, Result};

pub type ListId = Uuid;

/// Join collection keyed by list id followed by subscriber id.
pub(crate) const MEMBERS: &str = "list_subscriber";
/// Join collection keyed by subscriber id followed by list id.
pub(crate) const MEMBERSHIPS: &str = "subscriber_list";
/// Lookup collection keyed by account id followed by list id.
const BY_ACCOUNT: &str = "list_by_account";

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct List {
    pub id: ListId,
    pub account: AccountId,
    pub name: String,
}

impl List {
    pub fn new(account: AccountId, name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            account,
            name: name.into(),
        }
    }
}

impl Collectable for List {
    fn get_collection_name() -> &'static str {
        "list"
    }
}

impl Identifiable for List {
    fn get_id(&self) -> Uuid {
        self.id
    }
}

/// Membership record of one subscriber in one list.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ListSubscriber {
    pub list: ListId,
    pub subscriber: SubscriberId,
}

pub fn insert(db: &Database, list: &List) -> Result<()> {
    if list.name.trim().is_empty() {
        return Err(ErrorKind::Validation("list name is required".to_string()).into());
    }
    account::get(db, list.account)?;

    let mut batch = Batch::new();
    batch.set(list)?;
    batch.insert_raw(BY_ACCOUNT, pair_key(list.account, list.id), list.id.as_bytes());
    db.apply(batch)
}

pub fn get(db: &Database, id: ListId) -> Result<List> {
    db.get(id)
}

pub fn update(db: &Database, list: &List) -> Result<()> {
    let existing = get(db, list.id)?;
    if existing.account != list.account {
        return Err(ErrorKind::Validation("list account can't change".to_string()).into());
    }
    db.set(list)
}

/// Removes the list along with all of its memberships. Subscribers
/// themselves are kept. Refused while a scheduled campaign targets the
/// list.
pub fn delete(db: &Database, id: ListId) -> Result<()> {
    let list = get(db, id)?;
    if let Some(c) = campaign::scheduled(db)?.into_iter().find(|c| c.lists.contains(&id)) {
        return Err(ErrorKind::Validation(format!(
            "list {} is targeted by scheduled campaign {}",
            id, c.id
        ))
        .into());
    }

    let mut batch = Batch::new();
    batch.remove_raw(List::get_collection_name(), id.as_bytes());
    batch.remove_raw(BY_ACCOUNT, pair_key(list.account, id));
    for subscriber in db.ids_with_prefix(MEMBERS, id.as_bytes())? {
        batch.remove_raw(MEMBERS, pair_key(id, subscriber));
        batch.remove_raw(MEMBERSHIPS, pair_key(subscriber, id));
    }
    db.apply(batch)
}

/// All lists owned by the account.
pub fn lists_of(db: &Database, account: AccountId) -> Result<Vec<List>> {
    let mut out = Vec::new();
    for id in db.ids_with_prefix(BY_ACCOUNT, account.as_bytes())? {
        out.push(get(db, id)?);
    }
    Ok(out)
}

pub fn add_subscriber(db: &Database, list: ListId, subscriber: SubscriberId) -> Result<ListSubscriber> {
    let l = get(db, list)?;
    let s = subscriber::get(db, subscriber)?;
    if l.account != s.account {
        return Err(ErrorKind::Validation(format!(
            "subscriber {} belongs to a different account than list {}",
            subscriber, list
        ))
        .into());
    }

    let mut batch = Batch::new();
    batch.insert_raw(MEMBERS, pair_key(list, subscriber), subscriber.as_bytes());
    batch.insert_raw(MEMBERSHIPS, pair_key(subscriber, list), list.as_bytes());
    db.apply(batch)?;

    Ok(ListSubscriber { list, subscriber })
}

pub fn remove_subscriber(db: &Database, list: ListId, subscriber: SubscriberId) -> Result<()> {
    let mut batch = Batch::new();
    batch.remove_raw(MEMBERS, pair_key(list, subscriber));
    batch.remove_raw(MEMBERSHIPS, pair_key(subscriber, list));
    db.apply(batch)
}

/// Retrieves all the subscribers of a mailing list, regardless of their
/// status.
pub fn subscribers_of(db: &Database, list: ListId) -> Result<Vec<Subscriber>> {
    let mut out = Vec::new();
    for id in db.ids_with_prefix(MEMBERS, list.as_bytes())? {
        out.push(subscriber::get(db, id)?);
    }
    Ok(out)
}

pub fn lists_of_subscriber(db: &Database, subscriber: SubscriberId) -> Result<Vec<ListId>> {
    db.ids_with_prefix(MEMBERSHIPS, subscriber.as_bytes())
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;
    use crate::account::Account;
    use crate::campaign::Campaign;

    fn setup() -> (Database, Account) {
        let db = Database::temporary().unwrap();
        let account = Account::new("Brian", "Cohen", "briancohen@example.com");
        account::insert(&db, &account).unwrap();
        (db, account)
    }

    #[test]
    fn lists_of_returns_every_list_of_the_account() {
        let (db, account) = setup();
        let l1 = List::new(account.id, "TestGetLists 1");
        let l2 = List::new(account.id, "TestGetLists 2");
        insert(&db, &l1).unwrap();
        insert(&db, &l2).unwrap();

        let mut ids: Vec<_> = lists_of(&db, account.id).unwrap().into_iter().map(|l| l.id).collect();
        ids.sort();
        let mut expected = vec![l1.id, l2.id];
        expected.sort();
        assert_eq!(ids, expected);

        delete(&db, l1.id).unwrap();
        delete(&db, l2.id).unwrap();
        assert!(lists_of(&db, account.id).unwrap().is_empty());
    }

    #[test]
    fn membership_is_tracked_both_ways() {
        let (db, account) = setup();
        let list = List::new(account.id, "My Awesome Mailing List");
        insert(&db, &list).unwrap();
        let sub = Subscriber::new(account.id, "Tommy", "Barker", "tom@attendly.com");
        subscriber::insert(&db, &sub).unwrap();

        add_subscriber(&db, list.id, sub.id).unwrap();
        // Adding twice keeps a single membership.
        add_subscriber(&db, list.id, sub.id).unwrap();

        assert_eq!(subscribers_of(&db, list.id).unwrap(), vec![sub.clone()]);
        assert_eq!(lists_of_subscriber(&db, sub.id).unwrap(), vec![list.id]);

        delete(&db, list.id).unwrap();
        assert!(lists_of_subscriber(&db, sub.id).unwrap().is_empty());
        assert!(subscriber::get(&db, sub.id).is_ok());
    }

    #[test]
    fn members_must_share_the_list_account() {
        let (db, account) = setup();
        let other = Account::new("Spamface", "The Bold", "example@example.com");
        account::insert(&db, &other).unwrap();

        let list = List::new(account.id, "Mine");
        insert(&db, &list).unwrap();
        let sub = Subscriber::new(other.id, "Freddy", "Example", "fred@example.com");
        subscriber::insert(&db, &sub).unwrap();

        assert!(add_subscriber(&db, list.id, sub.id).is_err());
    }

    #[test]
    fn list_targeted_by_a_scheduled_campaign_is_kept() {
        let (db, account) = setup();
        let list = List::new(account.id, "Attendees");
        insert(&db, &list).unwrap();
        let mut campaign = Campaign::new(account.id, "Soon", "Hi", Utc::now() + Duration::hours(1));
        campaign::insert(&db, &mut campaign, &[list.id], &[]).unwrap();

        let err = delete(&db, list.id).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::Validation(_)));
        assert!(get(&db, list.id).is_ok());

        campaign::delete(&db, campaign.id).unwrap();
        delete(&db, list.id).unwrap();
        assert!(get(&db, list.id).unwrap_err().is_not_found());
    }
}
