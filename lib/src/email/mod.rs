//! Upstream email delivery provider.
//!
//! The core needs exactly two things from a provider: handing over one
//! rendered message and pulling the full list of addresses that reported
//! spam. Everything about transport and authentication stays behind the
//! [`Provider`] trait.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::message::Message;
use crate::{Config, ErrorKind, Result};

mod sendgrid;

pub use sendgrid::{parse_spam_reports, SendGrid};

/// Complete spam complaint list as reported by the provider.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SpamReports {
    /// Lowercase address mapped to the time the complaint was made, when
    /// the provider reports one.
    pub emails: HashMap<String, Option<DateTime<Utc>>>,
    /// Server reported time the list is valid for.
    pub as_of: DateTime<Utc>,
}

impl SpamReports {
    pub fn contains(&self, email: &str) -> bool {
        self.emails.contains_key(&normalize(email))
    }
}

pub(crate) fn normalize(email: &str) -> String {
    email.trim().to_lowercase()
}

#[async_trait]
pub trait Provider: Send + Sync {
    /// Delivers a single message. Any non-success response is an error.
    async fn send(&self, message: &Message) -> Result<()>;

    /// Fetches the complete current list of spam complaints.
    async fn spam_reports(&self) -> Result<SpamReports>;
}

/// Provider used in dry-run mode when no credentials are configured. It
/// never delivers anything and knows of no spam complaints.
#[derive(Clone, Copy, Debug, Default)]
pub struct Offline;

#[async_trait]
impl Provider for Offline {
    async fn send(&self, message: &Message) -> Result<()> {
        Err(ErrorKind::Upstream(format!("no provider configured, can't send message {}", message.id)).into())
    }

    async fn spam_reports(&self) -> Result<SpamReports> {
        Ok(SpamReports {
            emails: HashMap::new(),
            as_of: Utc::now(),
        })
    }
}

/// Builds the provider described by the configuration.
pub fn from_config(config: &Config) -> Result<Arc<dyn Provider>> {
    if config.provider.has_credentials() {
        Ok(Arc::new(SendGrid::new(&config.provider)?))
    } else if config.dry_run {
        tracing::info!("no provider credentials, spam reports disabled");
        Ok(Arc::new(Offline))
    } else {
        Err(ErrorKind::InvalidConfig("provider credentials are required outside dry-run".to_string()).into())
    }
}
