//! The statement runner: databases, sessions and results.
//!
//! A session parses a statement, plans it, binds the pipeline to a
//! transaction and the parameter vector, and returns a Results handle. Reads
//! iterate lazily against a read transaction held by the Results; writes are
//! driven to completion and committed before the Results is returned.
//! Explicit transactions (BEGIN/COMMIT/ROLLBACK) span statements; otherwise
//! each statement runs in its own implicit transaction.

use crate::error::{Error, Result};
use crate::parsing;
use crate::parsing::ast::Statement;
use crate::planning;
use crate::storage::catalog;
use crate::storage::engine::{Engine, Fjall, Memory};
use crate::storage::transaction::Transaction;
use crate::stream::executor::{self, Context, Frames};
use crate::types::evaluator::Param;
use crate::types::value::{Document, Value};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// An embedded database over a storage engine. Cheap to clone and share
/// across threads; each thread should use its own session.
#[derive(Clone)]
pub struct Database {
    engine: Arc<dyn Engine>,
}

impl Database {
    /// An in-memory database.
    pub fn memory() -> Self {
        Database {
            engine: Arc::new(Memory::new()),
        }
    }

    /// A persistent database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Database {
            engine: Arc::new(Fjall::open(path.as_ref())?),
        })
    }

    pub fn session(&self) -> Session {
        Session {
            engine: self.engine.clone(),
            txn: None,
            cancel: Cancellation::default(),
        }
    }

    /// One-shot convenience: executes a statement in a fresh session.
    pub fn execute(&self, sql: &str, params: &[Param]) -> Result<Results> {
        self.session().execute(sql, params)
    }
}

/// A cancellation token. Cloned handles share the flag; the runner checks it
/// before each document is delivered.
#[derive(Clone, Default)]
pub struct Cancellation {
    flag: Arc<AtomicBool>,
}

impl Cancellation {
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// A database session, with at most one explicit transaction in progress.
pub struct Session {
    engine: Arc<dyn Engine>,
    txn: Option<Arc<Transaction>>,
    cancel: Cancellation,
}

impl Session {
    /// A handle that cancels statements running in this session.
    pub fn cancellation(&self) -> Cancellation {
        self.cancel.clone()
    }

    /// Parses, plans and executes a statement with the given parameters.
    pub fn execute(&mut self, sql: &str, params: &[Param]) -> Result<Results> {
        let statement = parsing::parse_sql(sql)?;
        self.execute_statement(statement, params)
    }

    fn execute_statement(&mut self, statement: Statement, params: &[Param]) -> Result<Results> {
        match statement {
            Statement::Begin { read_only } => {
                if self.txn.is_some() {
                    return Err(Error::TransactionInProgress);
                }
                self.txn = Some(Arc::new(Transaction::begin(self.engine.clone(), read_only)));
                Ok(self.empty_results())
            }
            Statement::Commit => {
                let txn = self.txn.take().ok_or(Error::NoTransaction)?;
                txn.commit()?;
                Ok(self.empty_results())
            }
            Statement::Rollback => {
                let txn = self.txn.take().ok_or(Error::NoTransaction)?;
                txn.rollback();
                Ok(self.empty_results())
            }

            Statement::Explain(inner) => {
                let stream = planning::to_stream(&inner)?;
                let mut doc = Document::new();
                doc.set("plan", Value::Text(stream.to_string()));
                Ok(Results::collected(vec![doc], self.cancel.clone()))
            }

            Statement::CreateTable {
                ref name,
                if_not_exists,
                ref primary_key,
            } => self.run_ddl(|txn| {
                catalog::create_table(txn, name, primary_key.clone(), if_not_exists)
            }),
            Statement::DropTable {
                ref name,
                if_exists,
            } => self.run_ddl(|txn| catalog::drop_table(txn, name, if_exists)),
            Statement::CreateIndex {
                ref name,
                ref table,
                ref path,
                unique,
                if_not_exists,
            } => self.run_ddl(|txn| {
                catalog::create_index(txn, name, table, path.clone(), unique, if_not_exists)
            }),
            Statement::DropIndex {
                ref name,
                if_exists,
            } => self.run_ddl(|txn| catalog::drop_index(txn, name, if_exists)),
            Statement::CreateSequence {
                ref name,
                if_not_exists,
            } => self.run_ddl(|txn| catalog::create_sequence(txn, name, if_not_exists)),
            Statement::DropSequence {
                ref name,
                if_exists,
            } => self.run_ddl(|txn| catalog::drop_sequence(txn, name, if_exists)),

            Statement::Select(_) => {
                // Compile before any transaction work.
                let stream = planning::to_stream(&statement)?;
                let (txn, _) = self.current_txn(true);
                let ctx = Context {
                    txn: txn.clone(),
                    params: Arc::new(params.to_vec()),
                };
                let frames = executor::execute(&stream, &ctx)?;
                Ok(Results::lazy(frames, txn, self.cancel.clone()))
            }

            Statement::Insert(_) | Statement::Update(_) | Statement::Delete(_) => {
                let returning =
                    matches!(&statement, Statement::Insert(insert) if !insert.returning.is_empty());
                let stream = planning::to_stream(&statement)?;
                let (txn, implicit) = self.current_txn(false);
                let ctx = Context {
                    txn: txn.clone(),
                    params: Arc::new(params.to_vec()),
                };

                // Drive the pipeline to completion before committing.
                let cancel = self.cancel.clone();
                let drive = || -> Result<Vec<Document>> {
                    let frames = executor::execute(&stream, &ctx)?;
                    let mut rows = Vec::new();
                    for frame in frames {
                        if cancel.is_cancelled() {
                            return Err(Error::Cancelled);
                        }
                        rows.push(frame?.doc);
                    }
                    Ok(rows)
                };
                match drive() {
                    Ok(rows) => {
                        if implicit {
                            txn.commit()?;
                        }
                        let rows = if returning { rows } else { Vec::new() };
                        Ok(Results::collected(rows, self.cancel.clone()))
                    }
                    Err(err) => {
                        // An implicit transaction is discarded; an explicit
                        // one is left for the caller to commit or roll back.
                        if implicit {
                            txn.rollback();
                        }
                        tracing::debug!("statement failed: {}", err);
                        Err(err)
                    }
                }
            }
        }
    }

    // The session's explicit transaction, or a fresh implicit one. The bool
    // is true for implicit transactions, which the statement owns.
    fn current_txn(&self, read_only: bool) -> (Arc<Transaction>, bool) {
        match &self.txn {
            Some(txn) => (txn.clone(), false),
            None => (
                Arc::new(Transaction::begin(self.engine.clone(), read_only)),
                true,
            ),
        }
    }

    fn run_ddl(&mut self, f: impl FnOnce(&Transaction) -> Result<()>) -> Result<Results> {
        let (txn, implicit) = self.current_txn(false);
        match f(&txn) {
            Ok(()) => {
                if implicit {
                    txn.commit()?;
                }
                Ok(self.empty_results())
            }
            Err(err) => {
                if implicit {
                    txn.rollback();
                }
                Err(err)
            }
        }
    }

    fn empty_results(&self) -> Results {
        Results::collected(Vec::new(), self.cancel.clone())
    }
}

enum ResultsInner {
    /// A lazy pipeline; the read transaction stays alive with the handle.
    Lazy {
        frames: Frames,
        _txn: Arc<Transaction>,
    },
    /// Buffered rows, for write statements and EXPLAIN.
    Collected(std::vec::IntoIter<Document>),
}

/// The result of a statement: an iterator of documents. Dropping the handle
/// releases the pipeline and its transaction; iteration checks the session's
/// cancellation token before each document.
pub struct Results {
    inner: ResultsInner,
    cancel: Cancellation,
    done: bool,
}

impl std::fmt::Debug for Results {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Results").finish_non_exhaustive()
    }
}

impl Results {
    fn lazy(frames: Frames, txn: Arc<Transaction>, cancel: Cancellation) -> Self {
        Results {
            inner: ResultsInner::Lazy { frames, _txn: txn },
            cancel,
            done: false,
        }
    }

    fn collected(rows: Vec<Document>, cancel: Cancellation) -> Self {
        Results {
            inner: ResultsInner::Collected(rows.into_iter()),
            cancel,
            done: false,
        }
    }

    /// Collects all remaining documents.
    pub fn into_vec(mut self) -> Result<Vec<Document>> {
        let mut rows = Vec::new();
        for row in &mut self {
            rows.push(row?);
        }
        Ok(rows)
    }

    /// Releases the pipeline and transaction. Equivalent to dropping.
    pub fn close(self) {}
}

impl Iterator for Results {
    type Item = Result<Document>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if self.cancel.is_cancelled() {
            self.done = true;
            return Some(Err(Error::Cancelled));
        }
        let next = match &mut self.inner {
            ResultsInner::Lazy { frames, .. } => frames.next().map(|r| r.map(|frame| frame.doc)),
            ResultsInner::Collected(rows) => rows.next().map(Ok),
        };
        match &next {
            None | Some(Err(_)) => self.done = true,
            Some(Ok(_)) => {}
        }
        next
    }
}
