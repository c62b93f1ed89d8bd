//! Suppression cache.
//!
//! Answers whether an address may receive mail and hands out the opaque
//! tokens subscribers use to unsubscribe.
//!
//! Spam complaints are kept as a whole snapshot of the provider's list.
//! Lookups refresh the snapshot first when there is none yet or once it is
//! older than the configured staleness threshold. A refresh swaps the whole
//! snapshot at once, and a failed refresh leaves the previous one in place.
//! Concurrent lookups hitting a stale snapshot may each refresh it.
//!
//! Tokens are made of the subscriber id and a keyed digest of the
//! subscriber's identity, so they can't be derived from the id alone.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use rand::RngCore;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tokio::time::Instant;
use url::Url;
use uuid::Uuid;

use crate::db::{Collectable, Database};
use crate::email::{normalize, Provider};
use crate::subscriber::Subscriber;
use crate::{Config, ErrorKind, Result};

/// Collection holding the generated token key under the nil id.
const TOKEN_KEYS: &str = "token_keys";
/// Number of hex digits of the digest kept in a token.
const DIGEST_LEN: usize = 32;

/// Suppression state of one address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SuppressionEntry {
    pub email: String,
    pub reported_spam: bool,
    /// Time of the complaint if known, otherwise the time the provider
    /// reported the list for.
    pub as_of: DateTime<Utc>,
}

struct Snapshot {
    emails: HashMap<String, Option<DateTime<Utc>>>,
    as_of: DateTime<Utc>,
    refreshed: Instant,
}

pub struct SuppressionCache {
    db: Database,
    provider: Arc<dyn Provider>,
    ttl: Duration,
    secret: Vec<u8>,
    base_url: Url,
    snapshot: RwLock<Option<Arc<Snapshot>>>,
}

impl SuppressionCache {
    pub fn new(db: Database, provider: Arc<dyn Provider>, config: &Config) -> Result<Self> {
        let base_url = Url::parse(&config.unsubscribe.base_url)?;
        let secret = if config.unsubscribe.secret.is_empty() {
            token_key(&db)?
        } else {
            config.unsubscribe.secret.as_bytes().to_vec()
        };

        Ok(Self {
            db,
            provider,
            ttl: config.suppression.ttl(),
            secret,
            base_url,
            snapshot: RwLock::new(None),
        })
    }

    /// Replaces the cached spam reports with the provider's current list.
    pub async fn refresh(&self) -> Result<()> {
        self.fetch().await.map(|_| ())
    }

    async fn fetch(&self) -> Result<Arc<Snapshot>> {
        let reports = self.provider.spam_reports().await?;
        let snapshot = Arc::new(Snapshot {
            emails: reports.emails,
            as_of: reports.as_of,
            refreshed: Instant::now(),
        });
        tracing::debug!(
            count = snapshot.emails.len(),
            as_of = %snapshot.as_of,
            "refreshed spam reports"
        );
        *self.snapshot.write().await = Some(snapshot.clone());
        Ok(snapshot)
    }

    /// Current snapshot, refreshed first if missing or stale.
    async fn current(&self) -> Result<Arc<Snapshot>> {
        let cached = self.snapshot.read().await.clone();
        match cached {
            Some(snapshot) if snapshot.refreshed.elapsed() <= self.ttl => Ok(snapshot),
            _ => self.fetch().await,
        }
    }

    pub async fn lookup(&self, email: &str) -> Result<SuppressionEntry> {
        let snapshot = self.current().await?;
        let email = normalize(email);
        let entry = match snapshot.emails.get(&email) {
            Some(created) => SuppressionEntry {
                email,
                reported_spam: true,
                as_of: created.unwrap_or(snapshot.as_of),
            },
            None => SuppressionEntry {
                email,
                reported_spam: false,
                as_of: snapshot.as_of,
            },
        };
        Ok(entry)
    }

    pub async fn has_reported_spam(&self, email: &str) -> Result<bool> {
        Ok(self.lookup(email).await?.reported_spam)
    }

    /// Time the cached spam reports are valid for, if any were fetched.
    pub async fn as_of(&self) -> Option<DateTime<Utc>> {
        self.snapshot.read().await.as_ref().map(|s| s.as_of)
    }

    pub fn token_for(&self, subscriber: &Subscriber) -> String {
        format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(subscriber.id.as_bytes()),
            self.digest(subscriber)
        )
    }

    /// Finds the subscriber a token was made for, whatever its status.
    pub fn resolve_token(&self, token: &str) -> Result<Subscriber> {
        let not_found = || ErrorKind::NotFound("unknown subscriber token".to_string());

        let (id, digest) = token.trim().split_once('.').ok_or_else(not_found)?;
        let id = URL_SAFE_NO_PAD.decode(id).map_err(|_| not_found())?;
        let id = Uuid::from_slice(&id).map_err(|_| not_found())?;

        let subscriber: Subscriber = self
            .db
            .find_at(Subscriber::get_collection_name(), id)?
            .ok_or_else(not_found)?;
        if self.digest(&subscriber) != digest {
            return Err(not_found().into());
        }
        Ok(subscriber)
    }

    /// Unsubscribe link of the subscriber, the configured base url with the
    /// token in the `token` query parameter.
    pub fn unsubscribe_url(&self, subscriber: &Subscriber) -> String {
        let mut url = self.base_url.clone();
        url.query_pairs_mut().append_pair("token", &self.token_for(subscriber));
        url.to_string()
    }

    fn digest(&self, subscriber: &Subscriber) -> String {
        let mut hasher = Sha256::new();
        hasher.update(&self.secret);
        hasher.update(subscriber.id.as_bytes());
        hasher.update(subscriber.account.as_bytes());
        hasher.update(normalize(&subscriber.email).as_bytes());
        let mut digest = hex::encode(hasher.finalize());
        digest.truncate(DIGEST_LEN);
        digest
    }
}

/// Loads the token key kept in the database, generating one on first use.
fn token_key(db: &Database) -> Result<Vec<u8>> {
    if let Some(key) = db.find_at::<Vec<u8>>(TOKEN_KEYS, Uuid::nil())? {
        return Ok(key);
    }
    let mut key = vec![0u8; 32];
    rand::thread_rng().fill_bytes(&mut key);
    db.set_raw_at(TOKEN_KEYS, &key, Uuid::nil())?;
    tracing::info!("generated new unsubscribe token key");
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::{self, Account};
    use crate::config::Unsubscribe;
    use crate::email::Offline;
    use crate::subscriber;

    fn config(secret: &str) -> Config {
        Config {
            dry_run: true,
            unsubscribe: Unsubscribe {
                base_url: "https://myeventarc.localhost/unsubscribe".to_string(),
                secret: secret.to_string(),
            },
            ..Default::default()
        }
    }

    fn setup(secret: &str) -> (SuppressionCache, Subscriber) {
        let db = Database::temporary().unwrap();
        let account = Account::new("Joe", "Bloggs", "sendgrid@eventarc.com");
        account::insert(&db, &account).unwrap();
        let sub = Subscriber::new(account.id, "Tommy", "Barker", "tom@attendly.com");
        subscriber::insert(&db, &sub).unwrap();
        let cache = SuppressionCache::new(db, Arc::new(Offline), &config(secret)).unwrap();
        (cache, sub)
    }

    #[test]
    fn token_is_stable_and_resolves() {
        let (cache, sub) = setup("s3cret");
        let token = cache.token_for(&sub);
        assert_eq!(token, cache.token_for(&sub));
        assert_eq!(cache.resolve_token(&token).unwrap(), sub);
    }

    #[test]
    fn token_depends_on_identity_not_just_id() {
        let (cache, sub) = setup("s3cret");
        let mut other = sub.clone();
        other.email = "someone@attendly.com".to_string();
        assert_ne!(cache.token_for(&sub), cache.token_for(&other));
    }

    #[test]
    fn forged_and_unrelated_tokens_are_not_found() {
        let (cache, sub) = setup("s3cret");
        let token = cache.token_for(&sub);
        let (id, _) = token.split_once('.').unwrap();

        for bad in [
            "hello".to_string(),
            "".to_string(),
            format!("{}.{}", id, "0".repeat(DIGEST_LEN)),
            format!("{}.{}", URL_SAFE_NO_PAD.encode(Uuid::new_v4().as_bytes()), "abc"),
            "!!!.abc".to_string(),
        ] {
            let err = cache.resolve_token(&bad).unwrap_err();
            assert!(err.is_not_found(), "{bad}");
        }
    }

    #[test]
    fn generated_key_is_kept_in_the_database() {
        let (cache, sub) = setup("");
        let again = SuppressionCache::new(cache.db.clone(), Arc::new(Offline), &config("")).unwrap();
        assert_eq!(cache.token_for(&sub), again.token_for(&sub));
    }

    #[test]
    fn unsubscribe_url_carries_the_token() {
        let (cache, sub) = setup("s3cret");
        let url = Url::parse(&cache.unsubscribe_url(&sub)).unwrap();
        let token = url
            .query_pairs()
            .find(|(k, _)| k == "token")
            .map(|(_, v)| v.into_owned())
            .unwrap();
        assert_eq!(cache.resolve_token(&token).unwrap().id, sub.id);
    }
}
