//! Background worker: expands due campaigns and delivers pending messages.
//!
//! The worker waits for a stimulus, either the periodic tick or an explicit
//! wake, then drains every due campaign followed by every pending message
//! before waiting again. Everything happens sequentially on a single task.
//!
//! A wake sent while a sweep is running is kept and starts another sweep
//! right after the current one. Cancelling the shutdown token stops the
//! worker at the next check, letting a delivery already started finish.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Notify;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::campaign;
use crate::db::Database;
use crate::delivery::{MinInterval, Outcome, Pacing, Pipeline};
use crate::expand::Expander;
use crate::message;
use crate::Config;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    AwaitingStimulus,
    DrainingCampaigns,
    DrainingMessages,
    Stopped,
}

/// Work done by one sweep.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Sweep {
    pub campaigns: usize,
    pub messages: usize,
}

pub struct Scheduler {
    db: Database,
    expander: Expander,
    pipeline: Pipeline,
    pacing: Box<dyn Pacing>,
    tick: Duration,
    wake: Arc<Notify>,
    shutdown: CancellationToken,
}

impl Scheduler {
    pub fn new(db: Database, expander: Expander, pipeline: Pipeline, config: &Config) -> Self {
        Self {
            db,
            expander,
            pipeline,
            pacing: Box::new(MinInterval::new(config.scheduler.send_interval())),
            tick: config.scheduler.tick(),
            wake: Arc::new(Notify::new()),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_pacing(mut self, pacing: Box<dyn Pacing>) -> Self {
        self.pacing = pacing;
        self
    }

    /// Handle used to request an immediate sweep.
    pub fn waker(&self) -> Arc<Notify> {
        self.wake.clone()
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub async fn run(mut self) {
        tracing::info!(tick = ?self.tick, "scheduler started");

        let mut ticker = tokio::time::interval_at(Instant::now() + self.tick, self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut state = State::AwaitingStimulus;
        while state != State::Stopped {
            state = match state {
                State::AwaitingStimulus => tokio::select! {
                    biased;
                    _ = self.shutdown.cancelled() => State::Stopped,
                    _ = self.wake.notified() => {
                        tracing::trace!("woken up");
                        State::DrainingCampaigns
                    }
                    _ = ticker.tick() => State::DrainingCampaigns,
                },
                State::DrainingCampaigns => {
                    self.drain_campaigns().await;
                    self.unless_stopped(State::DrainingMessages)
                }
                State::DrainingMessages => {
                    self.drain_messages().await;
                    self.unless_stopped(State::AwaitingStimulus)
                }
                State::Stopped => State::Stopped,
            };
        }

        tracing::info!("scheduler stopped");
    }

    /// Runs one full sweep right away.
    pub async fn sweep(&mut self) -> Sweep {
        let campaigns = self.drain_campaigns().await;
        let messages = self.drain_messages().await;
        Sweep { campaigns, messages }
    }

    fn unless_stopped(&self, next: State) -> State {
        if self.shutdown.is_cancelled() {
            State::Stopped
        } else {
            next
        }
    }

    /// Expands due campaigns oldest first.
    ///
    /// A transient failure stops the phase and the campaign is retried on
    /// the next sweep. A campaign that can never expand is marked failed so
    /// newer campaigns still go out.
    async fn drain_campaigns(&mut self) -> usize {
        let mut expanded = 0;
        while !self.shutdown.is_cancelled() {
            let campaign = match campaign::due(&self.db, Utc::now()) {
                Ok(Some(campaign)) => campaign,
                Ok(None) => break,
                Err(e) => {
                    tracing::error!("couldn't retrieve due campaign: {}", e);
                    break;
                }
            };

            match self.expander.expand(&campaign).await {
                Ok(_) => expanded += 1,
                Err(e) if e.is_transient() => {
                    tracing::error!(campaign = %campaign.id, "couldn't expand campaign, retrying later: {}", e);
                    break;
                }
                Err(e) => {
                    tracing::error!(campaign = %campaign.id, "giving up on campaign: {}", e);
                    if let Err(e) = campaign::mark_failed(&self.db, &campaign, &e.kind.to_string()) {
                        tracing::error!(campaign = %campaign.id, "couldn't mark campaign failed: {}", e);
                        break;
                    }
                }
            }
        }
        expanded
    }

    /// Delivers pending messages oldest first, keeping the pacing between
    /// deliveries. A failed delivery only ends that message.
    async fn drain_messages(&mut self) -> usize {
        let mut delivered = 0;
        while !self.shutdown.is_cancelled() {
            let mut message = match message::next_pending(&self.db, Utc::now()) {
                Ok(Some(message)) => message,
                Ok(None) => break,
                Err(e) => {
                    tracing::error!("couldn't retrieve pending message: {}", e);
                    break;
                }
            };

            let delay = self.pacing.delay(Instant::now());
            if !delay.is_zero() {
                tokio::select! {
                    _ = self.shutdown.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            self.pacing.record(Instant::now());
            match self.pipeline.try_deliver(&mut message).await {
                Ok(Outcome::Sent) => delivered += 1,
                Ok(Outcome::Retrying | Outcome::Failed) => {}
                Err(e) => {
                    tracing::error!(id = %message.id, "couldn't record delivery: {}", e);
                    break;
                }
            }
        }
        delivered
    }
}
