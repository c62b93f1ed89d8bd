use std::path::Path;
use std::str::FromStr;

use tracing_subscriber::field::MakeExt;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;

use yansi::Paint;

use crate::error::{Error, ErrorKind, Result};
use crate::Config;

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Production,
    #[default]
    Formatted,
    Json,
}

impl FromStr for Mode {
    type Err = Error;

    fn from_str(input: &str) -> Result<Self> {
        match input {
            "prod" | "production" => Ok(Self::Production),
            "formatted" => Ok(Self::Formatted),
            "json" => Ok(Self::Json),
            _ => Err(ErrorKind::Other(format!("unknown log mode {}", input)).into()),
        }
    }
}

#[derive(PartialEq, Eq, Default, Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Level {
    /// Only shows errors and warnings
    Critical,
    /// Shows errors, warnings, and some informational messages that are likely
    /// to be relevant when troubleshooting such as configuration
    Support,
    /// Shows everything except debug and trace information
    #[default]
    Normal,
    /// Shows debug information
    Debug,
    /// Shows everything
    Trace,
    /// Shows nothing
    Off,
}

impl FromStr for Level {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match &*s.to_ascii_lowercase() {
            "critical" | "error" => Ok(Level::Critical),
            "support" | "warn" => Ok(Level::Support),
            "normal" | "info" => Ok(Level::Normal),
            "debug" | "dbg" => Ok(Level::Debug),
            "trace" => Ok(Level::Trace),
            "off" | "none" => Ok(Level::Off),
            _ => Err(ErrorKind::Other(format!(
                "expected a log level (off, trace, debug, normal, support, critical), got {}",
                s
            ))
            .into()),
        }
    }
}

pub fn filter_layer(level: Level) -> Result<EnvFilter> {
    let filter_str = match level {
        Level::Critical => "error,sled=off",
        Level::Support => "warn,sled=off,rustls=off",
        Level::Normal => "info,sled=warn,lettre=warn,rustls=off",
        Level::Debug => "debug,sled=info,lettre=info,hyper=info",
        Level::Trace => "trace,sled=info,hyper=debug,want=off",
        Level::Off => "off",
    };

    EnvFilter::try_new(filter_str).map_err(|e| ErrorKind::Other(e.to_string()).into())
}

/// Picks the diagnostics destination: the configured file, or standard
/// error.
pub fn make_writer(file: Option<&str>) -> Result<BoxMakeWriter> {
    match file {
        Some(file) => {
            let path = Path::new(file);
            let dir = path.parent().unwrap_or_else(|| Path::new("."));
            let name = path
                .file_name()
                .ok_or_else(|| ErrorKind::InvalidConfig(format!("tracing.file is not a file: {}", file)))?;
            Ok(BoxMakeWriter::new(tracing_appender::rolling::never(dir, name)))
        }
        None => Ok(BoxMakeWriter::new(std::io::stderr)),
    }
}

pub fn default_logging_layer<S>(writer: BoxMakeWriter) -> impl Layer<S>
where
    S: tracing::Subscriber,
    S: for<'span> LookupSpan<'span>,
{
    let field_format = tracing_subscriber::fmt::format::debug_fn(|writer, field, value| {
        // We'll format the field name and value separated with a colon.
        if field.name() == "message" {
            write!(writer, "{:?}", Paint::new(value).bold())
        } else {
            write!(writer, "{}: {:?}", field, Paint::default(value).bold())
        }
    })
    .delimited(", ")
    .display_messages();

    tracing_subscriber::fmt::layer()
        .fmt_fields(field_format)
        .with_writer(writer)
}

pub fn json_logging_layer<
    S: for<'a> tracing_subscriber::registry::LookupSpan<'a> + tracing::Subscriber,
>(
    writer: BoxMakeWriter,
) -> impl tracing_subscriber::Layer<S> {
    Paint::disable();

    tracing_subscriber::fmt::layer().json().with_writer(writer)
}

/// Installs the global tracing subscriber described by the configuration.
///
/// Records emitted through the `log` facade (sled, lettre) are forwarded
/// as well. Must be called at most once, from within a tokio runtime when
/// the production mode is used.
pub fn init(config: &Config) -> Result<()> {
    use tracing_log::LogTracer;
    use tracing_subscriber::prelude::*;

    if !config.tracing.enabled {
        return Ok(());
    }

    LogTracer::init().map_err(|e| ErrorKind::Other(e.to_string()))?;

    let writer = make_writer(config.tracing.file.as_deref())?;

    match config.tracing.mode {
        Mode::Production => {
            use tracing_loki::url::Url;
            let (loki_layer, task) = tracing_loki::layer(
                Url::parse(&config.tracing.loki_address)?,
                vec![("app".into(), env!("CARGO_PKG_NAME").to_string())]
                    .into_iter()
                    .collect(),
                vec![].into_iter().collect(),
            )
            .map_err(|e| ErrorKind::Other(e.to_string()))?;
            // The background task needs to be spawned so the logs actually get
            // delivered to loki.
            tokio::spawn(task);

            tracing::subscriber::set_global_default(
                tracing_subscriber::registry()
                    .with(loki_layer)
                    .with(json_logging_layer(writer))
                    .with(filter_layer(config.tracing.level)?),
            )
            .map_err(|e| ErrorKind::Other(e.to_string()))?;
        }
        Mode::Formatted => {
            tracing::subscriber::set_global_default(
                tracing_subscriber::registry()
                    .with(default_logging_layer(writer))
                    .with(filter_layer(config.tracing.level)?),
            )
            .map_err(|e| ErrorKind::Other(e.to_string()))?;
        }
        Mode::Json => {
            tracing::subscriber::set_global_default(
                tracing_subscriber::registry()
                    .with(json_logging_layer(writer))
                    .with(filter_layer(config.tracing.level)?),
            )
            .map_err(|e| ErrorKind::Other(e.to_string()))?;
        }
    };

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_parse_from_common_names() {
        assert_eq!("warn".parse::<Level>().unwrap(), Level::Support);
        assert_eq!("info".parse::<Level>().unwrap(), Level::Normal);
        assert_eq!("TRACE".parse::<Level>().unwrap(), Level::Trace);
        assert!("loud".parse::<Level>().is_err());
    }

    #[test]
    fn every_level_builds_a_filter() {
        for level in [
            Level::Critical,
            Level::Support,
            Level::Normal,
            Level::Debug,
            Level::Trace,
            Level::Off,
        ] {
            assert!(filter_layer(level).is_ok());
        }
    }
}
