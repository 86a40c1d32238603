//! Storage: the ordered key-value engine contract, transactions, the
//! catalog, and document table operations.

pub mod catalog;
pub mod engine;
pub mod table;
pub mod transaction;

pub use catalog::{IndexInfo, SequenceInfo, TableInfo};
pub use engine::{Engine, Fjall, Memory};
pub use transaction::Transaction;
