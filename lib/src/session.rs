//! Session wiring the store, the suppression cache and the background
//! scheduler together.

use std::sync::Arc;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::account::{self, Account, AccountId};
use crate::attendees::AttendeeLookup;
use crate::campaign::{self, Campaign, CampaignId, EventId, Progress};
use crate::db::Database;
use crate::delivery::{self, Mode, Pacing, Pipeline, Sink};
use crate::email::{self, Provider};
use crate::expand::Expander;
use crate::list::{self, List, ListId, ListSubscriber};
use crate::message::{self, Message, MessageId};
use crate::scheduler::Scheduler;
use crate::subscriber::{self, Subscriber, SubscriberId};
use crate::suppression::SuppressionCache;
use crate::{Config, ErrorKind, Result};

/// Collaborators of a session. Anything left unset is built from the
/// configuration.
pub struct SessionBuilder {
    config: Config,
    database: Option<Database>,
    provider: Option<Arc<dyn Provider>>,
    attendees: Option<Arc<dyn AttendeeLookup>>,
    sink: Option<Sink>,
    pacing: Option<Box<dyn Pacing>>,
}

impl SessionBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            database: None,
            provider: None,
            attendees: None,
            sink: None,
            pacing: None,
        }
    }

    pub fn database(mut self, db: Database) -> Self {
        self.database = Some(db);
        self
    }

    pub fn provider(mut self, provider: Arc<dyn Provider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Enables sending campaigns to event attendees.
    pub fn attendees(mut self, lookup: impl AttendeeLookup + 'static) -> Self {
        self.attendees = Some(Arc::new(lookup));
        self
    }

    /// Destination of dry-run output.
    pub fn sink(mut self, sink: Sink) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn pacing(mut self, pacing: impl Pacing + 'static) -> Self {
        self.pacing = Some(Box::new(pacing));
        self
    }

    /// Validates the configuration and starts the background scheduler,
    /// which runs a first sweep right away. Must be called from within a
    /// tokio runtime.
    pub fn open(self) -> Result<Session> {
        let config = self.config;
        config.validate()?;

        let db = match self.database {
            Some(db) => db,
            None => Database::open(&config.database.path)?,
        };
        let provider = match self.provider {
            Some(provider) => provider,
            None => email::from_config(&config)?,
        };
        let suppression = Arc::new(SuppressionCache::new(db.clone(), provider.clone(), &config)?);

        if self.attendees.is_none() {
            tracing::warn!("attendee lookup not set, sending to events disabled");
        }

        let mode = if config.dry_run {
            let sink = match self.sink {
                Some(sink) => sink,
                None => delivery::sink_from_config(&config)?,
            };
            Mode::DryRun(sink)
        } else {
            Mode::Live(provider)
        };

        let expander = Expander::new(db.clone(), suppression.clone(), self.attendees);
        let pipeline = Pipeline::new(db.clone(), mode, &config);
        let mut scheduler = Scheduler::new(db.clone(), expander, pipeline, &config);
        if let Some(pacing) = self.pacing {
            scheduler = scheduler.with_pacing(pacing);
        }

        let wake = scheduler.waker();
        let shutdown = scheduler.shutdown_token();
        let worker = tokio::spawn(scheduler.run());
        wake.notify_one();

        tracing::info!(dry_run = config.dry_run, "session opened");

        Ok(Session {
            config,
            db,
            suppression,
            wake,
            shutdown,
            worker: Some(worker),
        })
    }
}

/// Handle to the mailing list system.
///
/// Dropping the session stops the scheduler without waiting for it, use
/// [`Session::close`] for a clean exit.
pub struct Session {
    config: Config,
    db: Database,
    suppression: Arc<SuppressionCache>,
    wake: Arc<Notify>,
    shutdown: CancellationToken,
    worker: Option<JoinHandle<()>>,
}

impl Session {
    pub fn builder(config: Config) -> SessionBuilder {
        SessionBuilder::new(config)
    }

    pub fn open(config: Config) -> Result<Self> {
        SessionBuilder::new(config).open()
    }

    /// Requests an immediate sweep. Never blocks.
    pub fn wake(&self) {
        self.wake.notify_one();
    }

    /// Stops the scheduler and waits until it has exited.
    pub async fn close(mut self) -> Result<()> {
        self.shutdown.cancel();
        if let Some(worker) = self.worker.take() {
            worker
                .await
                .map_err(|e| ErrorKind::Other(format!("scheduler task failed: {}", e)))?;
        }
        self.db.flush().await?;
        tracing::info!("session closed");
        Ok(())
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn suppression(&self) -> &SuppressionCache {
        &self.suppression
    }

    // accounts

    pub fn insert_account(&self, account: &Account) -> Result<()> {
        account::insert(&self.db, account)
    }

    pub fn get_account(&self, id: AccountId) -> Result<Account> {
        account::get(&self.db, id)
    }

    pub fn update_account(&self, account: &Account) -> Result<()> {
        account::update(&self.db, account)
    }

    pub fn upsert_account(&self, account: &mut Account) -> Result<()> {
        account::upsert(&self.db, account)
    }

    pub fn delete_account(&self, id: AccountId) -> Result<()> {
        account::delete(&self.db, id)
    }

    // subscribers

    pub fn insert_subscriber(&self, subscriber: &Subscriber) -> Result<()> {
        subscriber::insert(&self.db, subscriber)
    }

    pub fn get_or_insert_subscriber(&self, subscriber: &mut Subscriber) -> Result<()> {
        subscriber::get_or_insert(&self.db, subscriber)
    }

    pub fn get_subscriber(&self, id: SubscriberId) -> Result<Subscriber> {
        subscriber::get(&self.db, id)
    }

    pub fn update_subscriber(&self, subscriber: &Subscriber) -> Result<()> {
        subscriber::update(&self.db, subscriber)
    }

    pub fn delete_subscriber(&self, id: SubscriberId) -> Result<()> {
        subscriber::delete(&self.db, id)
    }

    // lists

    pub fn insert_list(&self, list: &List) -> Result<()> {
        list::insert(&self.db, list)
    }

    pub fn get_list(&self, id: ListId) -> Result<List> {
        list::get(&self.db, id)
    }

    pub fn update_list(&self, list: &List) -> Result<()> {
        list::update(&self.db, list)
    }

    pub fn delete_list(&self, id: ListId) -> Result<()> {
        list::delete(&self.db, id)
    }

    pub fn lists(&self, account: AccountId) -> Result<Vec<List>> {
        list::lists_of(&self.db, account)
    }

    pub fn add_to_list(&self, list: ListId, subscriber: SubscriberId) -> Result<ListSubscriber> {
        list::add_subscriber(&self.db, list, subscriber)
    }

    pub fn remove_from_list(&self, list: ListId, subscriber: SubscriberId) -> Result<()> {
        list::remove_subscriber(&self.db, list, subscriber)
    }

    pub fn subscribers(&self, list: ListId) -> Result<Vec<Subscriber>> {
        list::subscribers_of(&self.db, list)
    }

    // campaigns and messages

    /// Stores the campaign and wakes the scheduler, so a campaign that is
    /// already due goes out right away.
    pub fn insert_campaign(&self, campaign: &mut Campaign, lists: &[ListId], events: &[EventId]) -> Result<()> {
        campaign::insert(&self.db, campaign, lists, events)?;
        self.wake();
        Ok(())
    }

    pub fn get_campaign(&self, id: CampaignId) -> Result<Campaign> {
        campaign::get(&self.db, id)
    }

    pub fn delete_campaign(&self, id: CampaignId) -> Result<()> {
        campaign::delete(&self.db, id)
    }

    pub fn campaign_progress(&self, id: CampaignId) -> Result<Progress> {
        campaign::progress(&self.db, id)
    }

    /// Queues a one-off message and wakes the scheduler.
    pub fn insert_message(&self, message: &mut Message) -> Result<()> {
        message::insert(&self.db, message)?;
        self.wake();
        Ok(())
    }

    pub fn get_message(&self, id: MessageId) -> Result<Message> {
        message::get(&self.db, id)
    }

    // suppression

    pub async fn has_reported_spam(&self, email: &str) -> Result<bool> {
        self.suppression.has_reported_spam(email).await
    }

    pub fn unsubscribe_token(&self, subscriber: &Subscriber) -> String {
        self.suppression.token_for(subscriber)
    }

    pub fn unsubscribe_url(&self, subscriber: &Subscriber) -> String {
        self.suppression.unsubscribe_url(subscriber)
    }

    pub fn subscriber_by_token(&self, token: &str) -> Result<Subscriber> {
        self.suppression.resolve_token(token)
    }

    /// Marks the subscriber the token was made for as deleted, so no future
    /// campaign reaches it.
    pub fn unsubscribe(&self, token: &str) -> Result<Subscriber> {
        let subscriber = self.suppression.resolve_token(token)?;
        let subscriber = subscriber::set_status(&self.db, subscriber.id, subscriber::Status::Deleted)?;
        tracing::info!(subscriber = %subscriber.id, "unsubscribed");
        Ok(subscriber)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.shutdown.cancel();
        }
    }
}
