//! The catalog: tables, indexes and sequences.
//!
//! Catalog records are bincode-serialized under per-kind key prefixes, so
//! the catalog lives in the same ordered key space as the data it describes
//! and follows transaction semantics for free.

use crate::encoding;
use crate::error::{Error, Result};
use crate::storage::table;
use crate::storage::transaction::Transaction;
use crate::types::path::Path;
use serde::{Deserialize, Serialize};

// Key space prefixes, one per entity category.
pub(crate) const META_PREFIX: u8 = 0x00;
pub(crate) const CATALOG_PREFIX: u8 = 0x01;
pub(crate) const ROW_PREFIX: u8 = 0x02;
pub(crate) const INDEX_PREFIX: u8 = 0x03;
pub(crate) const SEQUENCE_PREFIX: u8 = 0x04;

// Catalog record kinds.
const KIND_TABLE: u8 = b't';
const KIND_INDEX: u8 = b'i';
const KIND_SEQUENCE: u8 = b's';

/// A table: a named collection of documents plus associated indexes. Rows
/// are keyed by the primary-key expression when one is declared, otherwise
/// by a monotonically increasing integer drawn from the table's own
/// sequence.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TableInfo {
    pub name: String,
    pub id: u64,
    pub primary_key: Option<Path>,
}

/// An index over a single document path.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IndexInfo {
    pub name: String,
    pub id: u64,
    pub table: String,
    pub path: Path,
    pub unique: bool,
}

/// A named sequence.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SequenceInfo {
    pub name: String,
    pub id: u64,
}

fn record_key(kind: u8, name: &str) -> Vec<u8> {
    let mut key = vec![CATALOG_PREFIX, kind];
    key.extend_from_slice(name.as_bytes());
    key
}

/// Allocates the next catalog object id.
fn next_meta_id(txn: &Transaction) -> Result<u64> {
    let key = [META_PREFIX, b'n'];
    let next = match txn.get(&key)? {
        Some(bytes) => encoding::decode_u64(&bytes)?,
        None => 1,
    };
    let mut buf = Vec::with_capacity(8);
    encoding::append_u64(&mut buf, next + 1);
    txn.set(&key, &buf)?;
    Ok(next)
}

/// Advances a sequence counter and returns its new value.
pub(crate) fn sequence_next(txn: &Transaction, sequence_id: u64) -> Result<u64> {
    let mut key = vec![SEQUENCE_PREFIX];
    encoding::append_u64(&mut key, sequence_id);
    let next = match txn.get(&key)? {
        Some(bytes) => encoding::decode_u64(&bytes)? + 1,
        None => 1,
    };
    let mut buf = Vec::with_capacity(8);
    encoding::append_u64(&mut buf, next);
    txn.set(&key, &buf)?;
    Ok(next)
}

pub fn create_table(
    txn: &Transaction,
    name: &str,
    primary_key: Option<Path>,
    if_not_exists: bool,
) -> Result<()> {
    if txn.get(&record_key(KIND_TABLE, name))?.is_some() {
        if if_not_exists {
            return Ok(());
        }
        return Err(Error::AlreadyExists(name.to_string()));
    }
    let info = TableInfo {
        name: name.to_string(),
        id: next_meta_id(txn)?,
        primary_key,
    };
    txn.set(&record_key(KIND_TABLE, name), &bincode::serialize(&info)?)?;
    tracing::debug!("created table {}", name);
    Ok(())
}

pub fn get_table(txn: &Transaction, name: &str) -> Result<TableInfo> {
    match txn.get(&record_key(KIND_TABLE, name))? {
        Some(bytes) => Ok(bincode::deserialize(&bytes)?),
        None => Err(Error::NotFound(name.to_string())),
    }
}

pub fn drop_table(txn: &Transaction, name: &str, if_exists: bool) -> Result<()> {
    let info = match get_table(txn, name) {
        Ok(info) => info,
        Err(Error::NotFound(_)) if if_exists => return Ok(()),
        Err(err) => return Err(err),
    };

    // Rows, the row-id sequence, then the indexes and their entries.
    for (key, _) in txn.scan_prefix(&table::row_prefix(info.id))? {
        txn.delete(&key)?;
    }
    let mut sequence_key = vec![SEQUENCE_PREFIX];
    encoding::append_u64(&mut sequence_key, info.id);
    txn.delete(&sequence_key)?;

    for index in indexes_of(txn, name)? {
        drop_index(txn, &index.name, false)?;
    }

    txn.delete(&record_key(KIND_TABLE, name))?;
    tracing::debug!("dropped table {}", name);
    Ok(())
}

pub fn create_index(
    txn: &Transaction,
    name: &str,
    table_name: &str,
    path: Path,
    unique: bool,
    if_not_exists: bool,
) -> Result<()> {
    if txn.get(&record_key(KIND_INDEX, name))?.is_some() {
        if if_not_exists {
            return Ok(());
        }
        return Err(Error::AlreadyExists(name.to_string()));
    }
    let table_info = get_table(txn, table_name)?;
    let info = IndexInfo {
        name: name.to_string(),
        id: next_meta_id(txn)?,
        table: table_name.to_string(),
        path,
        unique,
    };
    txn.set(&record_key(KIND_INDEX, name), &bincode::serialize(&info)?)?;

    // Backfill from the existing rows. A unique violation here fails the
    // whole statement.
    for (doc_key, bytes) in table::scan(txn, &table_info)? {
        let doc = bincode::deserialize(&bytes)?;
        table::add_index_entries(txn, std::slice::from_ref(&info), &doc_key, &doc)?;
    }
    tracing::debug!("created index {} on {}", name, table_name);
    Ok(())
}

pub fn get_index(txn: &Transaction, name: &str) -> Result<IndexInfo> {
    match txn.get(&record_key(KIND_INDEX, name))? {
        Some(bytes) => Ok(bincode::deserialize(&bytes)?),
        None => Err(Error::NotFound(name.to_string())),
    }
}

pub fn drop_index(txn: &Transaction, name: &str, if_exists: bool) -> Result<()> {
    let info = match get_index(txn, name) {
        Ok(info) => info,
        Err(Error::NotFound(_)) if if_exists => return Ok(()),
        Err(err) => return Err(err),
    };
    for (key, _) in txn.scan_prefix(&table::index_prefix(info.id))? {
        txn.delete(&key)?;
    }
    txn.delete(&record_key(KIND_INDEX, name))?;
    Ok(())
}

/// All indexes declared on a table.
pub fn indexes_of(txn: &Transaction, table_name: &str) -> Result<Vec<IndexInfo>> {
    let mut indexes = Vec::new();
    for (_, bytes) in txn.scan_prefix(&[CATALOG_PREFIX, KIND_INDEX])? {
        let info: IndexInfo = bincode::deserialize(&bytes)?;
        if info.table == table_name {
            indexes.push(info);
        }
    }
    Ok(indexes)
}

pub fn create_sequence(txn: &Transaction, name: &str, if_not_exists: bool) -> Result<()> {
    if txn.get(&record_key(KIND_SEQUENCE, name))?.is_some() {
        if if_not_exists {
            return Ok(());
        }
        return Err(Error::AlreadyExists(name.to_string()));
    }
    let info = SequenceInfo {
        name: name.to_string(),
        id: next_meta_id(txn)?,
    };
    txn.set(
        &record_key(KIND_SEQUENCE, name),
        &bincode::serialize(&info)?,
    )?;
    Ok(())
}

pub fn get_sequence(txn: &Transaction, name: &str) -> Result<SequenceInfo> {
    match txn.get(&record_key(KIND_SEQUENCE, name))? {
        Some(bytes) => Ok(bincode::deserialize(&bytes)?),
        None => Err(Error::NotFound(name.to_string())),
    }
}

pub fn drop_sequence(txn: &Transaction, name: &str, if_exists: bool) -> Result<()> {
    let info = match get_sequence(txn, name) {
        Ok(info) => info,
        Err(Error::NotFound(_)) if if_exists => return Ok(()),
        Err(err) => return Err(err),
    };
    let mut state_key = vec![SEQUENCE_PREFIX];
    encoding::append_u64(&mut state_key, info.id);
    txn.delete(&state_key)?;
    txn.delete(&record_key(KIND_SEQUENCE, name))?;
    Ok(())
}
