//! Delivery of single messages and pacing between deliveries.

use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;

use crate::db::Database;
use crate::email::Provider;
use crate::message::{self, Message};
use crate::{Config, ErrorKind, Result};

/// Byte destination of dry-run output.
pub type Sink = Arc<Mutex<dyn Write + Send>>;

/// Opens the dry-run sink named in the configuration, standard output when
/// none is set.
pub fn sink_from_config(config: &Config) -> Result<Sink> {
    match &config.dry_run_output {
        Some(path) => {
            let file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
            Ok(Arc::new(Mutex::new(file)))
        }
        None => Ok(Arc::new(Mutex::new(std::io::stdout()))),
    }
}

/// Text written to the sink for one message in dry-run mode.
pub fn format_dry_run(message: &Message) -> String {
    format!(
        "Email to send\nTo: {}\nFrom: {}\nSubject: {}\nBody: {}\n",
        message.to, message.from, message.subject, message.body
    )
}

pub enum Mode {
    DryRun(Sink),
    Live(Arc<dyn Provider>),
}

/// What happened to a message handed to the pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Sent,
    /// Delivery failed, the message is pending again for a later attempt.
    Retrying,
    /// Delivery failed for good.
    Failed,
}

pub struct Pipeline {
    db: Database,
    mode: Mode,
    max_attempts: u32,
    retry_delay: Duration,
}

impl Pipeline {
    pub fn new(db: Database, mode: Mode, config: &Config) -> Self {
        Self {
            db,
            mode,
            max_attempts: config.scheduler.max_attempts.max(1),
            retry_delay: config.scheduler.retry_delay(),
        }
    }

    /// Delivers a pending message and records the result.
    ///
    /// A failed delivery is recorded before it is returned as the error. The
    /// message is failed for good once `max_attempts` deliveries failed, and
    /// pending again `retry_delay` later otherwise.
    pub async fn deliver(&self, message: &mut Message) -> Result<Outcome> {
        if message.status != message::Status::Pending {
            return Err(ErrorKind::Validation(format!("message {} is {}", message.id, message.status)).into());
        }

        match self.send(message).await {
            Ok(()) => {
                message::mark_sent(&self.db, message, Utc::now())?;
                tracing::debug!(id = %message.id, to = %message.to.email, "delivered message");
                Ok(Outcome::Sent)
            }
            Err(e) => {
                let reason = e.kind.to_string();
                if message.attempts + 1 < self.max_attempts {
                    let available = Utc::now()
                        + chrono::Duration::from_std(self.retry_delay)
                            .map_err(|e| ErrorKind::Other(e.to_string()))?;
                    message::requeue(&self.db, message, &reason, available)?;
                } else {
                    message::mark_failed(&self.db, message, &reason)?;
                }
                Err(e)
            }
        }
    }

    /// Same as `deliver` with the failure folded into the outcome. Errors
    /// of the store itself are still returned.
    pub async fn try_deliver(&self, message: &mut Message) -> Result<Outcome> {
        match self.deliver(message).await {
            Ok(outcome) => Ok(outcome),
            Err(e) if e.is_store() => Err(e),
            Err(e) => {
                let outcome = if message.status == message::Status::Failed {
                    Outcome::Failed
                } else {
                    Outcome::Retrying
                };
                tracing::warn!(
                    id = %message.id,
                    to = %message.to.email,
                    attempts = message.attempts,
                    ?outcome,
                    "delivery failed: {}",
                    e
                );
                Ok(outcome)
            }
        }
    }

    async fn send(&self, message: &Message) -> Result<()> {
        match &self.mode {
            Mode::DryRun(sink) => {
                let text = format_dry_run(message);
                let mut sink = sink
                    .lock()
                    .map_err(|_| ErrorKind::Other("dry-run sink poisoned".to_string()))?;
                sink.write_all(text.as_bytes())?;
                sink.flush()?;
                Ok(())
            }
            Mode::Live(provider) => provider.send(message).await,
        }
    }
}

/// Decides how long the worker waits before the next delivery.
pub trait Pacing: Send + Sync {
    /// Time left to wait at `now` before another delivery may start.
    fn delay(&self, now: Instant) -> Duration;

    /// Notes that a delivery started at `now`.
    fn record(&mut self, now: Instant);
}

/// Keeps successive deliveries at least `interval` apart.
#[derive(Clone, Debug)]
pub struct MinInterval {
    interval: Duration,
    last: Option<Instant>,
}

impl MinInterval {
    pub fn new(interval: Duration) -> Self {
        Self { interval, last: None }
    }
}

impl Pacing for MinInterval {
    fn delay(&self, now: Instant) -> Duration {
        match self.last {
            Some(last) => (last + self.interval).saturating_duration_since(now),
            None => Duration::ZERO,
        }
    }

    fn record(&mut self, now: Instant) {
        self.last = Some(now);
    }
}
