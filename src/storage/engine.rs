//! Storage engines: ordered byte-keyed stores.
//!
//! The engine is the external collaborator the rest of the crate builds on.
//! Keys compare lexicographically; scans return an ascending snapshot of a
//! key range. The in-memory engine backs embedded and test databases, the
//! fjall engine backs persistent ones.

use crate::error::Result;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::path::Path;

/// An ordered byte-keyed store.
pub trait Engine: Send + Sync + 'static {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    fn set(&self, key: &[u8], value: &[u8]) -> Result<()>;

    fn delete(&self, key: &[u8]) -> Result<()>;

    /// Returns an ascending snapshot of the key range `[start, end)`,
    /// unbounded above when end is None.
    fn scan(&self, start: &[u8], end: Option<&[u8]>) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;
}

/// An in-memory engine over a BTreeMap.
#[derive(Default)]
pub struct Memory {
    data: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl Memory {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Engine for Memory {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.data.read().get(key).cloned())
    }

    fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.data.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        self.data.write().remove(key);
        Ok(())
    }

    fn scan(&self, start: &[u8], end: Option<&[u8]>) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let data = self.data.read();
        let upper = match end {
            Some(end) => Bound::Excluded(end.to_vec()),
            None => Bound::Unbounded,
        };
        Ok(data
            .range((Bound::Included(start.to_vec()), upper))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

/// A persistent engine backed by a fjall partition.
pub struct Fjall {
    _keyspace: fjall::Keyspace,
    partition: fjall::PartitionHandle,
}

impl Fjall {
    pub fn open(path: &Path) -> Result<Self> {
        let keyspace = fjall::Config::new(path).open()?;
        let partition =
            keyspace.open_partition("folio", fjall::PartitionCreateOptions::default())?;
        Ok(Fjall {
            _keyspace: keyspace,
            partition,
        })
    }
}

impl Engine for Fjall {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.partition.get(key)?.map(|slice| slice.to_vec()))
    }

    fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.partition.insert(key, value)?;
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        self.partition.remove(key)?;
        Ok(())
    }

    fn scan(&self, start: &[u8], end: Option<&[u8]>) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let upper = match end {
            Some(end) => Bound::Excluded(end.to_vec()),
            None => Bound::Unbounded,
        };
        let mut out = Vec::new();
        for entry in self
            .partition
            .range((Bound::Included(start.to_vec()), upper))
        {
            let (key, value) = entry?;
            out.push((key.to_vec(), value.to_vec()));
        }
        Ok(out)
    }
}
