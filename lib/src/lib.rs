//! Mailing lists for multiple accounts with scheduled campaigns.
//!
//! A [`Session`] owns the store and runs a background scheduler which
//! expands due campaigns into per subscriber messages and delivers them one
//! at a time, either through the upstream provider or, in dry-run mode, by
//! printing them. Subscribers who reported spam or unsubscribed never get a
//! message.

#[macro_use]
extern crate serde_derive;

pub mod account;
pub mod attendees;
pub mod campaign;
pub mod config;
pub mod db;
pub mod delivery;
pub mod email;
pub mod error;
pub mod expand;
pub mod list;
pub mod message;
pub mod scheduler;
pub mod session;
pub mod subscriber;
pub mod suppression;
pub mod template;
pub mod tracing;

pub use config::Config;
pub use db::Database;
pub use error::{Error, ErrorKind, Result};
pub use session::{Session, SessionBuilder};
