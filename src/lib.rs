//! FolioDB: an embedded document-oriented SQL database engine.
//!
//! Schemaless documents live in tables over an ordered byte-keyed storage
//! engine. SQL statements compile to linear stream pipelines evaluated
//! lazily within a transaction:
//!
//! ```
//! use foliodb::{Database, Param, Value};
//!
//! let db = Database::memory();
//! db.execute("CREATE TABLE users", &[]).unwrap();
//! db.execute(
//!     "INSERT INTO users (name, age) VALUES ('ada', 36), ('alan', 41)",
//!     &[],
//! )
//! .unwrap();
//!
//! let rows = db
//!     .execute(
//!         "SELECT name FROM users WHERE age > ? ORDER BY name",
//!         &[Param::positional(Value::Integer(40))],
//!     )
//!     .unwrap()
//!     .into_vec()
//!     .unwrap();
//! assert_eq!(rows.len(), 1);
//! ```

pub mod encoding;
pub mod error;
pub mod parsing;
pub mod planning;
mod session;
pub mod storage;
pub mod stream;
pub mod types;

pub use error::{Error, Result};
pub use session::{Cancellation, Database, Results, Session};
pub use types::evaluator::Param;
pub use types::value::{Document, Value};
