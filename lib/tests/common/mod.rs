#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use maillist::account::{self, Account};
use maillist::config::{Scheduler, Unsubscribe};
use maillist::email::{Provider, SpamReports};
use maillist::message::Message;
use maillist::subscriber::{self, Subscriber};
use maillist::{Config, Database, ErrorKind, Result};

/// Provider recording sends and counting spam report fetches.
#[derive(Default)]
pub struct FakeProvider {
    pub spam: Mutex<Vec<String>>,
    pub refreshes: AtomicUsize,
    pub sent: Mutex<Vec<Message>>,
    pub fail_sends: AtomicBool,
    pub fail_refresh: AtomicBool,
}

impl FakeProvider {
    pub fn with_spam(emails: &[&str]) -> Arc<Self> {
        let provider = Self::default();
        provider.set_spam(emails);
        Arc::new(provider)
    }

    pub fn set_spam(&self, emails: &[&str]) {
        *self.spam.lock().unwrap() = emails.iter().map(|e| e.to_string()).collect();
    }

    pub fn refreshes(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<Message> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for FakeProvider {
    async fn send(&self, message: &Message) -> Result<()> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(ErrorKind::Upstream("550 rejected".to_string()).into());
        }
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }

    async fn spam_reports(&self) -> Result<SpamReports> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        if self.fail_refresh.load(Ordering::SeqCst) {
            return Err(ErrorKind::Upstream("503 service unavailable".to_string()).into());
        }
        let emails = self
            .spam
            .lock()
            .unwrap()
            .iter()
            .map(|e| (e.to_lowercase(), None))
            .collect();
        Ok(SpamReports {
            emails,
            as_of: Utc::now(),
        })
    }
}

/// Dry-run configuration without pacing and with a long tick.
pub fn config() -> Config {
    let mut config = Config {
        dry_run: true,
        unsubscribe: Unsubscribe {
            base_url: "https://myeventarc.localhost/unsubscribe".to_string(),
            secret: "not so secret".to_string(),
        },
        scheduler: Scheduler {
            tick_secs: 3600,
            send_interval_ms: 0,
            ..Default::default()
        },
        ..Default::default()
    };
    config.tracing.enabled = false;
    config
}

pub fn account(db: &Database) -> Account {
    let account = Account::new("Joe", "Bloggs", "sendgrid@eventarc.com");
    account::insert(db, &account).unwrap();
    account
}

pub fn subscriber(db: &Database, account: &Account, first: &str, last: &str, email: &str) -> Subscriber {
    let sub = Subscriber::new(account.id, first, last, email);
    subscriber::insert(db, &sub).unwrap();
    sub
}

pub type Buffer = Arc<Mutex<Vec<u8>>>;

pub fn buffer() -> Buffer {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn text(buffer: &Buffer) -> String {
    String::from_utf8(buffer.lock().unwrap().clone()).unwrap()
}

/// Polls `done` until it holds, failing the test after a few seconds.
pub async fn wait_for(mut done: impl FnMut() -> bool) {
    for _ in 0..250 {
        if done() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not reached in time");
}
