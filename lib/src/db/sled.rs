use std::path::Path;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::transaction::{TransactionError, TransactionResult};
use sled::Transactional;
use uuid::Uuid;

use crate::{error::ErrorKind, Result};

use super::{decode, encode, time_bound, Collectable, Identifiable};

#[derive(Clone, Debug)]
pub struct SledDb {
    inner: sled::Db,
}

impl SledDb {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let inner = sled::Config::default().path(path).open()?;
        Ok(Self { inner })
    }

    /// Opens a database that lives only as long as the handle, used for
    /// tests and dry runs.
    pub fn temporary() -> Result<Self> {
        let inner = sled::Config::default().temporary(true).open()?;
        Ok(Self { inner })
    }

    /// Waits until all pending writes are on disk.
    pub async fn flush(&self) -> Result<()> {
        self.inner.flush_async().await?;
        Ok(())
    }

    pub fn get_collection<T: DeserializeOwned + Collectable>(&self) -> Result<Vec<T>> {
        self.get_collection_at(T::get_collection_name())
    }

    /// Gets a collection of entries of the same type from the collection
    /// specified by name.
    pub fn get_collection_at<T: DeserializeOwned>(&self, name: impl AsRef<[u8]>) -> Result<Vec<T>> {
        let tree = self.inner.open_tree(name)?;
        let mut out = Vec::new();
        for entry in tree.iter() {
            let (_, value_bytes) = entry?;
            out.push(decode(&value_bytes)?);
        }
        Ok(out)
    }

    /// Returns the length of the collection as defined for the specified type.
    pub fn len<T: Collectable>(&self) -> Result<usize> {
        Ok(self.inner.open_tree(T::get_collection_name())?.len())
    }

    /// Gets an item from the collection defined for the item type.
    pub fn get<T: DeserializeOwned + Collectable>(&self, id: Uuid) -> Result<T> {
        self.get_at(T::get_collection_name(), id)
    }

    /// Gets an item by id from the collection specified by name.
    pub fn get_at<T: DeserializeOwned>(&self, collection: &str, id: Uuid) -> Result<T> {
        self.find_at(collection, id)?.ok_or_else(|| {
            ErrorKind::NotFound(format!(
                "entity with id '{}' not found in collection {}",
                id, collection
            ))
            .into()
        })
    }

    /// Same as `get_at`, with a missing entry reported as `None`.
    pub fn find_at<T: DeserializeOwned>(&self, collection: &str, id: Uuid) -> Result<Option<T>> {
        let tree = self.inner.open_tree(collection)?;
        match tree.get(id.as_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn set<T: Serialize + Identifiable + Collectable>(&self, value: &T) -> Result<()> {
        self.set_at(T::get_collection_name(), value)
    }

    pub fn set_at<T: Serialize + Identifiable>(
        &self,
        collection: impl AsRef<[u8]>,
        value: &T,
    ) -> Result<()> {
        self.set_raw_at(collection, value, value.get_id())
    }

    pub fn set_raw_at<T: Serialize>(
        &self,
        collection: impl AsRef<[u8]>,
        value: &T,
        id: Uuid,
    ) -> Result<()> {
        let tree = self.inner.open_tree(collection)?;
        let encoded = encode(value)?;
        tree.insert(id.as_bytes(), encoded)?;
        Ok(())
    }

    /// Ids stored under keys starting with `prefix`.
    pub fn ids_with_prefix(&self, collection: &str, prefix: impl AsRef<[u8]>) -> Result<Vec<Uuid>> {
        let tree = self.inner.open_tree(collection)?;
        let mut out = Vec::new();
        for entry in tree.scan_prefix(prefix) {
            let (_, id_bytes) = entry?;
            out.push(Uuid::from_slice(&id_bytes)?);
        }
        Ok(out)
    }

    /// Looks up the id stored under an exact key of a lookup collection.
    pub fn lookup(&self, collection: &str, key: impl AsRef<[u8]>) -> Result<Option<Uuid>> {
        let tree = self.inner.open_tree(collection)?;
        match tree.get(key)? {
            Some(id_bytes) => Ok(Some(Uuid::from_slice(&id_bytes)?)),
            None => Ok(None),
        }
    }

    /// Returns the oldest item referenced by a time-ordered index whose key
    /// time is not after `until`.
    ///
    /// Index entries map `time_key(time, id)` to the id of an item stored in
    /// the item's own collection. Repeated calls return the same item until
    /// the index changes. Entries whose item is gone are removed from the
    /// index on the way.
    pub fn first_indexed<T: DeserializeOwned + Collectable>(
        &self,
        index: &str,
        until: DateTime<Utc>,
    ) -> Result<Option<T>> {
        let tree = self.inner.open_tree(index)?;
        for entry in tree.range(..=time_bound(until).to_vec()) {
            let (key, id_bytes) = entry?;
            let id = Uuid::from_slice(&id_bytes)?;
            match self.find_at(T::get_collection_name(), id)? {
                Some(item) => return Ok(Some(item)),
                None => {
                    tracing::warn!(index, %id, "index entry without item, dropping it");
                    tree.remove(key)?;
                }
            }
        }
        Ok(None)
    }

    /// Applies all writes of the batch in a single transaction: either all
    /// of them become visible or none do.
    pub fn apply(&self, batch: Batch) -> Result<()> {
        if batch.collections.is_empty() {
            return Ok(());
        }

        let mut trees = Vec::with_capacity(batch.collections.len());
        for (name, _) in &batch.collections {
            trees.push(self.inner.open_tree(name)?);
        }

        let result: TransactionResult<(), ()> = trees.as_slice().transaction(|txs| {
            for (tx, (_, ops)) in txs.iter().zip(&batch.collections) {
                for op in ops {
                    match op {
                        Op::Insert(key, value) => {
                            tx.insert(key.as_slice(), value.as_slice())?;
                        }
                        Op::Remove(key) => {
                            tx.remove(key.as_slice())?;
                        }
                    }
                }
            }
            Ok(())
        });

        result.map_err(|e| match e {
            TransactionError::Abort(()) => ErrorKind::DbError("transaction aborted".to_string()).into(),
            TransactionError::Storage(e) => e.into(),
        })
    }
}

enum Op {
    Insert(Vec<u8>, Vec<u8>),
    Remove(Vec<u8>),
}

/// Set of writes across several collections, applied with
/// [`SledDb::apply`].
#[derive(Default)]
pub struct Batch {
    collections: Vec<(String, Vec<Op>)>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set<T: Serialize + Identifiable + Collectable>(&mut self, value: &T) -> Result<()> {
        let encoded = encode(value)?;
        self.insert_raw(T::get_collection_name(), value.get_id().as_bytes(), encoded);
        Ok(())
    }

    pub fn insert_raw(&mut self, collection: &str, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) {
        self.ops(collection)
            .push(Op::Insert(key.as_ref().to_vec(), value.as_ref().to_vec()));
    }

    pub fn remove_raw(&mut self, collection: &str, key: impl AsRef<[u8]>) {
        self.ops(collection).push(Op::Remove(key.as_ref().to_vec()));
    }

    /// Adds a time-ordered index entry pointing at `id`.
    pub fn index(&mut self, index: &str, key: [u8; 24], id: Uuid) {
        self.insert_raw(index, key, id.as_bytes());
    }

    fn ops(&mut self, collection: &str) -> &mut Vec<Op> {
        let position = match self.collections.iter().position(|(name, _)| name == collection) {
            Some(position) => position,
            None => {
                self.collections.push((collection.to_string(), Vec::new()));
                self.collections.len() - 1
            }
        };
        &mut self.collections[position].1
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::db::time_key;

    #[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
    struct Item {
        id: Uuid,
        name: String,
    }

    impl Collectable for Item {
        fn get_collection_name() -> &'static str {
            "item"
        }
    }

    impl Identifiable for Item {
        fn get_id(&self) -> Uuid {
            self.id
        }
    }

    fn item(name: &str) -> Item {
        Item {
            id: Uuid::new_v4(),
            name: name.to_string(),
        }
    }

    #[test]
    fn missing_item_is_not_found() {
        let db = SledDb::temporary().unwrap();
        let err = db.get::<Item>(Uuid::new_v4()).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn batch_writes_every_collection() {
        let db = SledDb::temporary().unwrap();
        let first = item("first");
        let now = Utc::now();

        let mut batch = Batch::new();
        batch.set(&first).unwrap();
        batch.index("item_by_time", time_key(now, first.id), first.id);
        db.apply(batch).unwrap();

        assert_eq!(db.get::<Item>(first.id).unwrap(), first);
        assert_eq!(
            db.first_indexed::<Item>("item_by_time", now).unwrap(),
            Some(first)
        );
    }

    #[test]
    fn first_indexed_respects_upper_bound_and_order() {
        let db = SledDb::temporary().unwrap();
        let now = Utc::now();
        let older = item("older");
        let newer = item("newer");
        let future = item("future");

        let mut batch = Batch::new();
        for (item, time) in [
            (&newer, now - Duration::minutes(1)),
            (&older, now - Duration::minutes(5)),
            (&future, now + Duration::minutes(5)),
        ] {
            batch.set(item).unwrap();
            batch.index("item_by_time", time_key(time, item.id), item.id);
        }
        db.apply(batch).unwrap();

        let first = db.first_indexed::<Item>("item_by_time", now).unwrap();
        assert_eq!(first, Some(older.clone()));
        // Repeated reads return the same item.
        let again = db.first_indexed::<Item>("item_by_time", now).unwrap();
        assert_eq!(again, Some(older));

        let none = db
            .first_indexed::<Item>("item_by_time", now - Duration::hours(1))
            .unwrap();
        assert_eq!(none, None);
    }

    #[test]
    fn first_indexed_drops_entries_without_item() {
        let db = SledDb::temporary().unwrap();
        let now = Utc::now();
        let kept = item("kept");
        let gone = Uuid::new_v4();

        let mut batch = Batch::new();
        batch.index("item_by_time", time_key(now - Duration::minutes(5), gone), gone);
        batch.set(&kept).unwrap();
        batch.index("item_by_time", time_key(now - Duration::minutes(1), kept.id), kept.id);
        db.apply(batch).unwrap();

        assert_eq!(db.first_indexed::<Item>("item_by_time", now).unwrap(), Some(kept.clone()));
        assert_eq!(db.ids_with_prefix("item_by_time", b"").unwrap(), vec![kept.id]);
    }
}
