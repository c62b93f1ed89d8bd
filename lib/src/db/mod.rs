mod sled;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::Result;

pub use self::sled::{Batch, SledDb as Database};

pub trait Identifiable {
    fn get_id(&self) -> Uuid;
}

pub trait Collectable {
    fn get_collection_name() -> &'static str;
}

pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    let t: T = pot::from_slice(bytes)?;
    Ok(t)
}

pub fn encode<T: serde::Serialize>(item: &T) -> Result<Vec<u8>> {
    let bytes = pot::to_vec(item)?;
    Ok(bytes)
}

/// Key of a time-ordered index entry.
///
/// Keys compare by time first, with the id as a tie breaker, so iterating
/// an index tree yields entries oldest-first.
pub fn time_key(time: DateTime<Utc>, id: Uuid) -> [u8; 24] {
    // Flipping the sign bit makes the big-endian bytes of a signed value
    // sort like the value itself.
    let micros = (time.timestamp_micros() as u64) ^ (1 << 63);
    let mut key = [0u8; 24];
    key[..8].copy_from_slice(&micros.to_be_bytes());
    key[8..].copy_from_slice(id.as_bytes());
    key
}

/// Largest key at the given time, used as an inclusive upper bound.
pub fn time_bound(time: DateTime<Utc>) -> [u8; 24] {
    time_key(time, Uuid::from_bytes([0xff; 16]))
}

/// Key made of two ids, used by join collections.
pub fn pair_key(first: Uuid, second: Uuid) -> [u8; 32] {
    let mut key = [0u8; 32];
    key[..16].copy_from_slice(first.as_bytes());
    key[16..].copy_from_slice(second.as_bytes());
    key
}
