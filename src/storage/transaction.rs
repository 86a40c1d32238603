//! Write-buffered transactions over a storage engine.
//!
//! Writes accumulate in an ordered buffer until commit, when they are
//! applied to the engine; rollback (or drop) discards them. Reads merge the
//! buffer with the engine so a transaction sees its own writes. Within one
//! transaction writes are serialized by the caller; independent read-only
//! transactions may run concurrently.

use crate::error::{Error, Result};
use crate::storage::engine::Engine;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A transaction over an engine. Put and delete are buffered; value None in
/// the buffer is a tombstone.
pub struct Transaction {
    engine: Arc<dyn Engine>,
    writes: Mutex<BTreeMap<Vec<u8>, Option<Vec<u8>>>>,
    read_only: bool,
}

impl Transaction {
    pub fn begin(engine: Arc<dyn Engine>, read_only: bool) -> Self {
        Transaction {
            engine,
            writes: Mutex::new(BTreeMap::new()),
            read_only,
        }
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        if let Some(buffered) = self.writes.lock().get(key) {
            return Ok(buffered.clone());
        }
        self.engine.get(key)
    }

    pub fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        if self.read_only {
            return Err(Error::ReadOnly);
        }
        self.writes.lock().insert(key.to_vec(), Some(value.to_vec()));
        Ok(())
    }

    pub fn delete(&self, key: &[u8]) -> Result<()> {
        if self.read_only {
            return Err(Error::ReadOnly);
        }
        self.writes.lock().insert(key.to_vec(), None);
        Ok(())
    }

    /// Scans all keys under the given prefix in ascending order, merging the
    /// engine snapshot with buffered writes (read-your-writes).
    pub fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let end = prefix_end(prefix);
        let stored = self.engine.scan(prefix, end.as_deref())?;

        let writes = self.writes.lock();
        let buffered: Vec<(Vec<u8>, Option<Vec<u8>>)> = writes
            .range(prefix.to_vec()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        drop(writes);

        // Ordered merge; buffered entries win, tombstones drop the key.
        let mut out = Vec::with_capacity(stored.len() + buffered.len());
        let mut stored = stored.into_iter().peekable();
        let mut buffered = buffered.into_iter().peekable();
        loop {
            match (stored.peek(), buffered.peek()) {
                (Some((sk, _)), Some((bk, _))) if sk < bk => out.push(stored.next().unwrap()),
                (Some((sk, _)), Some((bk, _))) => {
                    if sk == bk {
                        stored.next();
                    }
                    let (key, value) = buffered.next().unwrap();
                    if let Some(value) = value {
                        out.push((key, value));
                    }
                }
                (Some(_), None) => out.push(stored.next().unwrap()),
                (None, Some(_)) => {
                    let (key, value) = buffered.next().unwrap();
                    if let Some(value) = value {
                        out.push((key, value));
                    }
                }
                (None, None) => break,
            }
        }
        Ok(out)
    }

    /// Applies the buffered writes to the engine.
    pub fn commit(&self) -> Result<()> {
        let writes = std::mem::take(&mut *self.writes.lock());
        for (key, value) in writes {
            match value {
                Some(value) => self.engine.set(&key, &value)?,
                None => self.engine.delete(&key)?,
            }
        }
        Ok(())
    }

    /// Discards the buffered writes.
    pub fn rollback(&self) {
        self.writes.lock().clear();
    }
}

/// The exclusive upper bound for a prefix scan: the prefix with its last
/// non-0xff byte incremented. None when no finite bound exists.
fn prefix_end(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.last() {
        if *last == 0xff {
            end.pop();
            continue;
        }
        *end.last_mut().unwrap() += 1;
        return Some(end);
    }
    None
}
