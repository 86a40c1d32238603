//! Streams: linear pipelines of operators.
//!
//! A stream is an ordered list of operators. Each operator consumes the
//! documents of its predecessor and emits documents to its successor; the
//! head is a table scan or a synthetic expression source. Streams are pure
//! values built by the planner, reusable across executions.

pub mod aggregate;
pub mod executor;

use crate::types::expression::{Aggregate, Expression};
use crate::types::path::Path;
use std::fmt;

pub use executor::{execute, Context, Frame, Frames};

/// A projected expression with an optional alias.
pub type Projection = (Expression, Option<String>);

/// A pipeline stage.
#[derive(Clone, Debug, PartialEq)]
pub enum Operator {
    /// Iterates a table in ascending key order.
    SeqScan(String),
    /// Emits one document per expression; the source for INSERT values and
    /// FROM-less SELECT.
    Expressions(Vec<Expression>),
    /// Emits documents whose predicate evaluates truthy.
    Filter(Expression),
    /// Emits a new document per input, holding each projection in order.
    Project(Vec<Projection>),
    /// Tags each document with its group key. Order-preserving; does not by
    /// itself reduce.
    GroupBy(Expression),
    /// Accumulates aggregates per group key (one global bucket when no
    /// GroupBy precedes) and emits one document per group in first-seen
    /// order. Blocking.
    HashAggregate(Vec<Aggregate>),
    /// Buffers the input, sorts by the value at the path. Blocking.
    Sort { path: Path, reverse: bool },
    /// Drops the first n documents.
    Skip(i64),
    /// Emits at most n documents.
    Take(i64),
    /// Emits the first occurrence of each distinct document.
    Distinct,
    /// Applies SET assignments to each document, in order.
    Set(Vec<(Path, Expression)>),
    /// Removes paths from each document.
    Unset(Vec<Path>),
    /// Sink: inserts each document into the table, emitting the stored rows.
    TableInsert(String),
    /// Sink: replaces each document under its key.
    TableReplace(String),
    /// Sink: deletes each document by its key.
    TableDelete(String),
}

/// A linear operator pipeline.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Stream {
    pub ops: Vec<Operator>,
}

impl Stream {
    pub fn new(op: Operator) -> Self {
        Stream { ops: vec![op] }
    }

    /// Appends an operator, consuming and returning the stream.
    pub fn pipe(mut self, op: Operator) -> Self {
        self.ops.push(op);
        self
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn list<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T]) -> fmt::Result {
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", item)?;
            }
            Ok(())
        }

        match self {
            Operator::SeqScan(table) => write!(f, "seqScan({})", table),
            Operator::Expressions(exprs) => {
                write!(f, "exprs(")?;
                list(f, exprs)?;
                write!(f, ")")
            }
            Operator::Filter(expr) => write!(f, "filter({})", expr),
            Operator::Project(projections) => {
                write!(f, "project(")?;
                for (i, (expr, alias)) in projections.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", expr)?;
                    if let Some(alias) = alias {
                        write!(f, " AS {}", alias)?;
                    }
                }
                write!(f, ")")
            }
            Operator::GroupBy(expr) => write!(f, "groupBy({})", expr),
            Operator::HashAggregate(aggs) => {
                write!(f, "hashAggregate(")?;
                list(f, aggs)?;
                write!(f, ")")
            }
            Operator::Sort {
                path,
                reverse: false,
            } => write!(f, "sort({})", path),
            Operator::Sort {
                path,
                reverse: true,
            } => write!(f, "sortReverse({})", path),
            Operator::Skip(n) => write!(f, "skip({})", n),
            Operator::Take(n) => write!(f, "take({})", n),
            Operator::Distinct => write!(f, "distinct()"),
            Operator::Set(assignments) => {
                write!(f, "set(")?;
                for (i, (path, expr)) in assignments.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{} = {}", path, expr)?;
                }
                write!(f, ")")
            }
            Operator::Unset(paths) => {
                write!(f, "unset(")?;
                list(f, paths)?;
                write!(f, ")")
            }
            Operator::TableInsert(table) => write!(f, "tableInsert({})", table),
            Operator::TableReplace(table) => write!(f, "tableReplace({})", table),
            Operator::TableDelete(table) => write!(f, "tableDelete({})", table),
        }
    }
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, op) in self.ops.iter().enumerate() {
            if i > 0 {
                write!(f, " | ")?;
            }
            write!(f, "{}", op)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::value::Value;

    #[test]
    fn display() {
        let stream = Stream::new(Operator::SeqScan("t".into()))
            .pipe(Operator::Filter(Expression::Operator(
                crate::types::expression::Operator::GreaterThan(
                    Box::new(Expression::Path(Path::field("a"))),
                    Box::new(Expression::Literal(Value::Integer(1))),
                ),
            )))
            .pipe(Operator::Project(vec![(Expression::Wildcard, None)]))
            .pipe(Operator::Take(2));
        assert_eq!(
            stream.to_string(),
            "seqScan(t) | filter(a > 1) | project(*) | take(2)"
        );
    }
}
