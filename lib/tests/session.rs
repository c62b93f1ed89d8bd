mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use chrono::{Duration, Utc};
use pretty_assertions::assert_eq;

use maillist::campaign::{self, Campaign};
use maillist::delivery::{Mode, Pipeline};
use maillist::expand::Expander;
use maillist::list::{self, List};
use maillist::message::{self, Contact, Message};
use maillist::scheduler::{Scheduler, Sweep};
use maillist::subscriber;
use maillist::suppression::SuppressionCache;
use maillist::{Config, Database, Session};

use common::FakeProvider;

fn scheduler(db: &Database, config: &Config, mode: Mode, provider: Arc<FakeProvider>) -> Scheduler {
    let suppression = Arc::new(SuppressionCache::new(db.clone(), provider, config).unwrap());
    let expander = Expander::new(db.clone(), suppression, None);
    let pipeline = Pipeline::new(db.clone(), mode, config);
    Scheduler::new(db.clone(), expander, pipeline, config)
}

#[tokio::test]
async fn dry_run_prints_the_message() {
    let db = Database::temporary().unwrap();
    let account = common::account(&db);
    let buffer = common::buffer();

    let session = Session::builder(common::config())
        .database(db.clone())
        .provider(FakeProvider::with_spam(&[]))
        .sink(buffer.clone())
        .open()
        .unwrap();

    let mut message = Message::new(
        account.id,
        Contact::from(&account),
        Contact::new("tom@attendly.com", "Tommy", "Barker"),
        "Awesome Event 2016",
        "Hi Tommy Barker,\nThis is a test of attendly email list service",
    );
    session.insert_message(&mut message).unwrap();

    let id = message.id;
    common::wait_for(|| session.get_message(id).unwrap().status == message::Status::Sent).await;
    session.close().await.unwrap();

    assert_eq!(
        common::text(&buffer),
        "Email to send\n\
         To: tom@attendly.com (Tommy Barker)\n\
         From: sendgrid@eventarc.com (Joe Bloggs)\n\
         Subject: Awesome Event 2016\n\
         Body: Hi Tommy Barker,\nThis is a test of attendly email list service\n"
    );
    let sent = message::get(&db, id).unwrap();
    assert!(sent.sent.is_some());
    assert_eq!(sent.attempts, 1);
}

#[tokio::test]
async fn due_campaign_goes_out_once() {
    let db = Database::temporary().unwrap();
    let config = common::config();
    let account = common::account(&db);
    let list = List::new(account.id, "Attendees");
    list::insert(&db, &list).unwrap();
    for (first, email) in [("Tommy", "tom@attendly.com"), ("Freddy", "fred@example.com")] {
        let sub = common::subscriber(&db, &account, first, "Barker", email);
        list::add_subscriber(&db, list.id, sub.id).unwrap();
    }

    let mut due = Campaign::new(account.id, "Now", "Hi {{.FirstName}}", Utc::now() - Duration::minutes(5));
    campaign::insert(&db, &mut due, &[list.id], &[]).unwrap();
    let mut later = Campaign::new(account.id, "Later", "Hi", Utc::now() + Duration::hours(1));
    campaign::insert(&db, &mut later, &[list.id], &[]).unwrap();

    let buffer = common::buffer();
    let mut scheduler = scheduler(&db, &config, Mode::DryRun(buffer.clone()), FakeProvider::with_spam(&[]));

    assert_eq!(scheduler.sweep().await, Sweep { campaigns: 1, messages: 2 });
    assert_eq!(common::text(&buffer).matches("Email to send\n").count(), 2);
    assert!(campaign::is_done(&db, due.id).unwrap());
    let progress = campaign::progress(&db, due.id).unwrap();
    assert_eq!((progress.sent, progress.total()), (2, 2));

    // Running again finds nothing to do.
    assert_eq!(scheduler.sweep().await, Sweep::default());
    assert_eq!(common::text(&buffer).matches("Email to send\n").count(), 2);
    assert_eq!(campaign::get(&db, later.id).unwrap().status, campaign::Status::Scheduled);
}

#[tokio::test]
async fn failed_delivery_is_final_by_default() {
    let db = Database::temporary().unwrap();
    let mut config = common::config();
    config.dry_run = false;
    let account = common::account(&db);

    let provider = FakeProvider::with_spam(&[]);
    provider.fail_sends.store(true, Ordering::SeqCst);
    let mut scheduler = scheduler(&db, &config, Mode::Live(provider.clone()), provider.clone());

    let mut first = Message::new(
        account.id,
        Contact::from(&account),
        Contact::new("tom@attendly.com", "Tommy", "Barker"),
        "One",
        "Hi",
    );
    let mut second = first.clone();
    second.id = uuid::Uuid::new_v4();
    second.subject = "Two".to_string();
    message::insert(&db, &mut first).unwrap();
    message::insert(&db, &mut second).unwrap();

    // A failure ends only its own message, the sweep carries on.
    assert_eq!(scheduler.sweep().await, Sweep::default());
    for id in [first.id, second.id] {
        let failed = message::get(&db, id).unwrap();
        assert_eq!(failed.status, message::Status::Failed);
        assert_eq!(failed.last_error.as_deref(), Some("upstream provider error: 550 rejected"));
    }

    provider.fail_sends.store(false, Ordering::SeqCst);
    assert_eq!(scheduler.sweep().await, Sweep::default());
    assert!(provider.sent().is_empty());
}

#[tokio::test]
async fn failed_delivery_is_retried_while_attempts_remain() {
    let db = Database::temporary().unwrap();
    let mut config = common::config();
    config.dry_run = false;
    config.scheduler.max_attempts = 2;
    config.scheduler.retry_delay_secs = 0;
    let account = common::account(&db);

    let provider = FakeProvider::with_spam(&[]);
    provider.fail_sends.store(true, Ordering::SeqCst);
    let mut scheduler = scheduler(&db, &config, Mode::Live(provider.clone()), provider.clone());

    let mut m = Message::new(
        account.id,
        Contact::from(&account),
        Contact::new("tom@attendly.com", "Tommy", "Barker"),
        "Retry",
        "Hi",
    );
    message::insert(&db, &mut m).unwrap();

    // The first failure requeues the message, the second one is final.
    scheduler.sweep().await;
    let stored = message::get(&db, m.id).unwrap();
    assert_eq!(stored.status, message::Status::Failed);
    assert_eq!(stored.attempts, 2);
}

#[tokio::test]
async fn unsubscribe_token_round_trip() {
    let db = Database::temporary().unwrap();
    let account = common::account(&db);
    let tom = common::subscriber(&db, &account, "Tommy", "Barker", "tom@attendly.com");

    let session = Session::builder(common::config())
        .database(db.clone())
        .provider(FakeProvider::with_spam(&["spam@example.com"]))
        .sink(common::buffer())
        .open()
        .unwrap();

    let token = session.unsubscribe_token(&tom);
    assert_eq!(session.subscriber_by_token(&token).unwrap().id, tom.id);
    assert!(session.subscriber_by_token("not-a-token").unwrap_err().is_not_found());

    assert!(session.has_reported_spam("spam@example.com").await.unwrap());
    assert!(!session.has_reported_spam("tom@attendly.com").await.unwrap());

    let unsubscribed = session.unsubscribe(&token).unwrap();
    assert_eq!(unsubscribed.status, subscriber::Status::Deleted);
    // Deleted subscribers still resolve.
    assert_eq!(session.subscriber_by_token(&token).unwrap().id, tom.id);

    session.close().await.unwrap();
}

#[tokio::test]
async fn close_stops_the_worker() {
    let db = Database::temporary().unwrap();
    let account = common::account(&db);
    let buffer = common::buffer();

    let session = Session::builder(common::config())
        .database(db.clone())
        .provider(FakeProvider::with_spam(&[]))
        .sink(buffer.clone())
        .open()
        .unwrap();
    for _ in 0..10 {
        session.wake();
    }
    session.close().await.unwrap();

    // Nothing picks up messages once closed.
    let mut m = Message::new(
        account.id,
        Contact::from(&account),
        Contact::new("tom@attendly.com", "Tommy", "Barker"),
        "Late",
        "Hi",
    );
    message::insert(&db, &mut m).unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert_eq!(message::get(&db, m.id).unwrap().status, message::Status::Pending);
    assert!(common::text(&buffer).is_empty());
}

#[test]
fn live_mode_requires_credentials() {
    let mut config = common::config();
    config.dry_run = false;
    let err = Session::builder(config)
        .database(Database::temporary().unwrap())
        .open()
        .err()
        .unwrap();
    assert!(matches!(err.kind, maillist::ErrorKind::InvalidConfig(_)));
}
