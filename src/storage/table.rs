//! Document table operations: row keys, inserts, replacements, deletions and
//! scans, with index maintenance.
//!
//! Row keys are either the order-preserving encoding of the primary-key
//! value or a big-endian row id from the table's sequence, so ascending key
//! scans yield primary-key (or insertion) order. Index entries reuse the
//! same value encoding so ordered index iteration equals ordered value
//! iteration.

use crate::encoding;
use crate::error::{Error, Result};
use crate::storage::catalog::{self, IndexInfo, TableInfo};
use crate::storage::transaction::Transaction;
use crate::types::value::{Document, Value};

/// The key prefix holding a table's rows.
pub(crate) fn row_prefix(table_id: u64) -> Vec<u8> {
    let mut prefix = vec![catalog::ROW_PREFIX];
    encoding::append_u64(&mut prefix, table_id);
    prefix
}

/// The key prefix holding an index's entries.
pub(crate) fn index_prefix(index_id: u64) -> Vec<u8> {
    let mut prefix = vec![catalog::INDEX_PREFIX];
    encoding::append_u64(&mut prefix, index_id);
    prefix
}

fn row_key(table_id: u64, doc_key: &[u8]) -> Vec<u8> {
    let mut key = row_prefix(table_id);
    key.extend_from_slice(doc_key);
    key
}

/// Scans a table in ascending key order, yielding (document key, marshaled
/// document) pairs.
pub fn scan(txn: &Transaction, info: &TableInfo) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
    let prefix = row_prefix(info.id);
    Ok(txn
        .scan_prefix(&prefix)?
        .into_iter()
        .map(|(key, value)| (key[prefix.len()..].to_vec(), value))
        .collect())
}

/// Fetches a document by key.
pub fn get(txn: &Transaction, info: &TableInfo, doc_key: &[u8]) -> Result<Document> {
    match txn.get(&row_key(info.id, doc_key))? {
        Some(bytes) => Ok(bincode::deserialize(&bytes)?),
        None => Err(Error::DocumentNotFound),
    }
}

/// Inserts a document, assigning its key from the primary-key expression or
/// the table's row sequence. Returns the assigned key and the document.
pub fn insert(
    txn: &Transaction,
    info: &TableInfo,
    indexes: &[IndexInfo],
    doc: Document,
) -> Result<(Vec<u8>, Document)> {
    let doc_key = document_key(txn, info, &doc)?;
    let key = row_key(info.id, &doc_key);
    if txn.get(&key)?.is_some() {
        return Err(Error::DuplicateDocument);
    }
    txn.set(&key, &bincode::serialize(&doc)?)?;
    add_index_entries(txn, indexes, &doc_key, &doc)?;
    Ok((doc_key, doc))
}

/// Replaces the document stored under the given key.
pub fn replace(
    txn: &Transaction,
    info: &TableInfo,
    indexes: &[IndexInfo],
    doc_key: &[u8],
    doc: Document,
) -> Result<Document> {
    let old = get(txn, info, doc_key)?;
    remove_index_entries(txn, indexes, doc_key, &old)?;
    txn.set(&row_key(info.id, doc_key), &bincode::serialize(&doc)?)?;
    add_index_entries(txn, indexes, doc_key, &doc)?;
    Ok(doc)
}

/// Deletes the document stored under the given key, returning it.
pub fn delete(
    txn: &Transaction,
    info: &TableInfo,
    indexes: &[IndexInfo],
    doc_key: &[u8],
) -> Result<Document> {
    let old = get(txn, info, doc_key)?;
    remove_index_entries(txn, indexes, doc_key, &old)?;
    txn.delete(&row_key(info.id, doc_key))?;
    Ok(old)
}

// Computes the document key: the encoded primary-key value, or the next
// value of the table's row sequence.
fn document_key(txn: &Transaction, info: &TableInfo, doc: &Document) -> Result<Vec<u8>> {
    match &info.primary_key {
        Some(path) => match doc.get_path(path) {
            Some(Value::Null) | None => Err(Error::InvalidValue(format!(
                "primary key {} is missing",
                path
            ))),
            Some(value) => {
                let mut key = Vec::new();
                encoding::append_value(&mut key, value);
                Ok(key)
            }
        },
        None => {
            let row_id = catalog::sequence_next(txn, info.id)?;
            let mut key = Vec::with_capacity(8);
            encoding::append_u64(&mut key, row_id);
            Ok(key)
        }
    }
}

/// Adds a document's entries to the given indexes. Missing or Null indexed
/// paths produce no entry. Unique indexes reject a second distinct document
/// key under the same value.
pub(crate) fn add_index_entries(
    txn: &Transaction,
    indexes: &[IndexInfo],
    doc_key: &[u8],
    doc: &Document,
) -> Result<()> {
    for index in indexes {
        let value = match doc.get_path(&index.path) {
            Some(Value::Null) | None => continue,
            Some(value) => value,
        };
        let mut key = index_prefix(index.id);
        encoding::append_value(&mut key, value);
        if index.unique {
            if let Some(existing) = txn.get(&key)? {
                if existing != doc_key {
                    return Err(Error::DuplicateDocument);
                }
            }
            txn.set(&key, doc_key)?;
        } else {
            key.push(0x00);
            key.extend_from_slice(doc_key);
            txn.set(&key, &[])?;
        }
    }
    Ok(())
}

pub(crate) fn remove_index_entries(
    txn: &Transaction,
    indexes: &[IndexInfo],
    doc_key: &[u8],
    doc: &Document,
) -> Result<()> {
    for index in indexes {
        let value = match doc.get_path(&index.path) {
            Some(Value::Null) | None => continue,
            Some(value) => value,
        };
        let mut key = index_prefix(index.id);
        encoding::append_value(&mut key, value);
        if index.unique {
            if txn.get(&key)?.as_deref() == Some(doc_key) {
                txn.delete(&key)?;
            }
        } else {
            key.push(0x00);
            key.extend_from_slice(doc_key);
            txn.delete(&key)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::engine::Memory;
    use crate::types::path::Path;
    use std::sync::Arc;

    fn txn() -> Transaction {
        Transaction::begin(Arc::new(Memory::new()), false)
    }

    fn doc(fields: &[(&str, Value)]) -> Document {
        fields
            .iter()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect()
    }

    fn table(txn: &Transaction, name: &str, primary_key: Option<Path>) -> TableInfo {
        catalog::create_table(txn, name, primary_key, false).unwrap();
        catalog::get_table(txn, name).unwrap()
    }

    #[test]
    fn insert_assigns_increasing_keys() {
        let txn = txn();
        let info = table(&txn, "t", None);
        let (k1, _) = insert(&txn, &info, &[], doc(&[("a", Value::Integer(1))])).unwrap();
        let (k2, _) = insert(&txn, &info, &[], doc(&[("a", Value::Integer(2))])).unwrap();
        assert!(k1 < k2);

        let rows = scan(&txn, &info).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].0, k1);
        assert_eq!(rows[1].0, k2);
    }

    #[test]
    fn primary_key_rows_scan_in_value_order() {
        let txn = txn();
        let info = table(&txn, "t", Some(Path::field("id")));
        for id in [3, 1, 2] {
            insert(&txn, &info, &[], doc(&[("id", Value::Integer(id))])).unwrap();
        }
        let rows = scan(&txn, &info).unwrap();
        let ids: Vec<i64> = rows
            .iter()
            .map(|(_, bytes)| {
                let d: Document = bincode::deserialize(bytes).unwrap();
                match d.get("id") {
                    Some(Value::Integer(i)) => *i,
                    other => panic!("unexpected {:?}", other),
                }
            })
            .collect();
        assert_eq!(ids, [1, 2, 3]);
    }

    #[test]
    fn duplicate_primary_key_rejected() {
        let txn = txn();
        let info = table(&txn, "t", Some(Path::field("id")));
        insert(&txn, &info, &[], doc(&[("id", Value::Integer(1))])).unwrap();
        assert_eq!(
            insert(&txn, &info, &[], doc(&[("id", Value::Integer(1))])),
            Err(Error::DuplicateDocument)
        );
        // Missing primary key is rejected outright.
        assert!(insert(&txn, &info, &[], doc(&[("a", Value::Integer(1))])).is_err());
    }

    #[test]
    fn unique_index_rejects_second_document() {
        let txn = txn();
        let info = table(&txn, "t", None);
        catalog::create_index(&txn, "idx", "t", Path::field("email"), true, false).unwrap();
        let indexes = catalog::indexes_of(&txn, "t").unwrap();

        insert(
            &txn,
            &info,
            &indexes,
            doc(&[("email", Value::Text("a@x".into()))]),
        )
        .unwrap();
        assert_eq!(
            insert(
                &txn,
                &info,
                &indexes,
                doc(&[("email", Value::Text("a@x".into()))]),
            ),
            Err(Error::DuplicateDocument)
        );
        // Documents without the indexed field are unconstrained.
        insert(&txn, &info, &indexes, doc(&[("other", Value::Integer(1))])).unwrap();
        insert(&txn, &info, &indexes, doc(&[("other", Value::Integer(2))])).unwrap();
    }

    #[test]
    fn replace_and_delete_maintain_indexes() {
        let txn = txn();
        let info = table(&txn, "t", None);
        catalog::create_index(&txn, "idx", "t", Path::field("v"), true, false).unwrap();
        let indexes = catalog::indexes_of(&txn, "t").unwrap();

        let (key, _) = insert(
            &txn,
            &info,
            &indexes,
            doc(&[("v", Value::Integer(1))]),
        )
        .unwrap();
        replace(
            &txn,
            &info,
            &indexes,
            &key,
            doc(&[("v", Value::Integer(2))]),
        )
        .unwrap();

        // The old entry is gone, so the value is reusable.
        insert(&txn, &info, &indexes, doc(&[("v", Value::Integer(1))])).unwrap();

        delete(&txn, &info, &indexes, &key).unwrap();
        assert_eq!(get(&txn, &info, &key), Err(Error::DocumentNotFound));
        // And its index entry with it.
        insert(&txn, &info, &indexes, doc(&[("v", Value::Integer(2))])).unwrap();
    }

    #[test]
    fn index_backfill_detects_duplicates() {
        let txn = txn();
        let info = table(&txn, "t", None);
        insert(&txn, &info, &[], doc(&[("v", Value::Integer(1))])).unwrap();
        insert(&txn, &info, &[], doc(&[("v", Value::Integer(1))])).unwrap();
        assert_eq!(
            catalog::create_index(&txn, "idx", "t", Path::field("v"), true, false),
            Err(Error::DuplicateDocument)
        );
    }
}
