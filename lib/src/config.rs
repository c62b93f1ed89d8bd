use std::time::Duration;

use serde::de::DeserializeOwned;

use crate::{ErrorKind, Result};

pub static CONFIG_FILE: &'static str = "maillist.toml";

/// Mailing list service configuration.
///
/// # Sensible defaults
///
/// `Config::default()` describes a live (non dry-run) setup with the
/// standard pacing and staleness values. Credentials and the unsubscribe
/// base url are left empty and must be supplied before a session can be
/// opened.
///
/// Using the *struct update syntax* one can initialize a new `Config`, making
/// a few changes right in the definition.
///
/// ```ignore
/// let cfg = Config {
///     dry_run: true,
///     unsubscribe: Unsubscribe {
///         base_url: "https://example.com/unsubscribe".to_string(),
///         ..Default::default()
///     },
///     ..Default::default()
/// };
/// ```
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Print messages to the dry-run output instead of handing them to the
    /// provider.
    pub dry_run: bool,
    /// Path of the file dry-run messages are appended to. Standard output is
    /// used when not set.
    pub dry_run_output: Option<String>,

    pub database: Database,
    pub tracing: Tracing,
    pub provider: Provider,
    pub unsubscribe: Unsubscribe,
    pub scheduler: Scheduler,
    pub suppression: Suppression,
}

impl Config {
    /// Checks the settings a session can't run without.
    pub fn validate(&self) -> Result<()> {
        if self.unsubscribe.base_url.is_empty() {
            return Err(ErrorKind::InvalidConfig("unsubscribe.base_url must be set".to_string()).into());
        }
        url::Url::parse(&self.unsubscribe.base_url)?;

        if !self.dry_run {
            if !self.provider.has_credentials() {
                return Err(ErrorKind::InvalidConfig(
                    "provider.api_key, or provider.username and provider.password, must be set".to_string(),
                )
                .into());
            }
            if self.provider.smtp_server.is_empty() {
                return Err(ErrorKind::InvalidConfig("provider.smtp_server must be set".to_string()).into());
            }
        }

        if self.scheduler.max_attempts == 0 {
            return Err(ErrorKind::InvalidConfig("scheduler.max_attempts must be at least 1".to_string()).into());
        }

        Ok(())
    }
}

/// Loads configuration from toml file at default location.
pub fn load<T: DeserializeOwned>() -> Result<T> {
    load_from(CONFIG_FILE)
}

/// Loads configuration from toml file at standard path using provided
/// name.
///
/// For example for `name` == `maillist.toml` we will load both
/// `maillist.toml` and `secret.maillist.toml` from the current directory.
/// Environment variables take precedence, e.g. `MAILLIST__PROVIDER__PASSWORD`.
pub fn load_from<T: DeserializeOwned>(name: impl AsRef<str>) -> Result<T> {
    let config = config::Config::builder()
        .add_source(config::File::with_name(name.as_ref()))
        .add_source(config::File::with_name(&format!("secret.{}", name.as_ref())).required(false))
        .add_source(
            config::Environment::with_prefix("MAILLIST")
                .separator("__")
                .prefix_separator("__"),
        )
        .build()?;

    let config: T = config.try_deserialize()?;

    Ok(config)
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Database {
    /// Directory of the sled database. Relative to the current working
    /// directory.
    pub path: String,
}

impl Default for Database {
    fn default() -> Self {
        Self {
            path: "db".to_string(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Tracing {
    pub enabled: bool,

    pub mode: crate::tracing::Mode,
    pub level: crate::tracing::Level,

    /// Diagnostics are written to standard error unless a file is given.
    pub file: Option<String>,

    pub loki_address: String,
}

impl Default for Tracing {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: crate::tracing::Mode::default(),
            level: crate::tracing::Level::default(),
            file: None,
            loki_address: "".to_string(),
        }
    }
}

/// Upstream email provider access.
///
/// Messages are relayed over SMTP, spam reports are pulled over HTTP. Both
/// use the same account credentials.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Provider {
    pub smtp_server: String,
    pub smtp_port: u16,

    pub username: String,
    pub password: String,
    /// When set, SMTP authentication uses the `apikey` user with this key
    /// as the password.
    pub api_key: String,

    pub spam_reports_url: String,
}

impl Provider {
    pub fn has_credentials(&self) -> bool {
        !self.api_key.is_empty() || (!self.username.is_empty() && !self.password.is_empty())
    }
}

impl Default for Provider {
    fn default() -> Self {
        Self {
            smtp_server: "smtp.sendgrid.net".to_string(),
            smtp_port: 587,
            username: String::new(),
            password: String::new(),
            api_key: String::new(),
            spam_reports_url: "https://api.sendgrid.com/api/spamreports.get.json".to_string(),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Unsubscribe {
    /// Base url of the unsubscribe page. The subscriber token is appended
    /// as the `token` query parameter.
    pub base_url: String,
    /// Key mixed into every unsubscribe token. If empty, a random key is
    /// generated on first use and kept in the database.
    pub secret: String,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Scheduler {
    /// Seconds between periodic sweeps.
    pub tick_secs: u64,
    /// Minimum number of milliseconds between two deliveries.
    pub send_interval_ms: u64,
    /// Delivery attempts per message. With the default of 1 a failed
    /// message is never retried.
    pub max_attempts: u32,
    /// Seconds a failed message waits before it becomes pending again, when
    /// attempts remain.
    pub retry_delay_secs: u64,
}

impl Scheduler {
    pub fn tick(&self) -> Duration {
        Duration::from_secs(self.tick_secs.max(1))
    }

    pub fn send_interval(&self) -> Duration {
        Duration::from_millis(self.send_interval_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self {
            tick_secs: 60,
            send_interval_ms: 1000,
            max_attempts: 1,
            retry_delay_secs: 300,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Suppression {
    /// Age after which the spam report cache is refreshed on next lookup.
    pub ttl_secs: u64,
}

impl Suppression {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl Default for Suppression {
    fn default() -> Self {
        Self { ttl_secs: 6 * 60 * 60 }
    }
}
