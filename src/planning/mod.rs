//! The planner: lowers a statement AST into a stream pipeline.
//!
//! For SELECT the stage order is fixed: scan (or a synthetic single-row
//! source), filter, grouping and aggregation, projection, distinct, sort,
//! skip, take. Semantic checks that don't need storage happen here, before
//! any transaction work: GROUP BY projection validation, path use in
//! FROM-less selects, and eager evaluation of LIMIT/OFFSET.

use crate::error::{Error, Result};
use crate::parsing::ast::{
    DeleteStatement, Direction, InsertSource, InsertStatement, SelectStatement, Statement,
    UpdateStatement,
};
use crate::stream::{Operator, Stream};
use crate::types::evaluator::{eval, Environment};
use crate::types::expression::{Aggregate, Expression};
use crate::types::value::{Document, Value};

/// Lowers a statement into a stream. Only data statements compile to
/// streams; transaction control and DDL are handled by the session.
pub fn to_stream(statement: &Statement) -> Result<Stream> {
    match statement {
        Statement::Select(select) => select_to_stream(select),
        Statement::Insert(insert) => insert_to_stream(insert),
        Statement::Update(update) => update_to_stream(update),
        Statement::Delete(delete) => delete_to_stream(delete),
        _ => Err(Error::ExecutionError(
            "statement does not compile to a stream".into(),
        )),
    }
}

fn select_to_stream(stmt: &SelectStatement) -> Result<Stream> {
    let mut stream = match &stmt.from {
        Some(table) => Stream::new(Operator::SeqScan(table.clone())),
        // Without FROM, a synthetic single empty document feeds the
        // projection.
        None => Stream::new(Operator::Expressions(vec![Expression::Literal(
            Value::Document(Document::new()),
        )])),
    };

    if let Some(filter) = &stmt.r#where {
        stream = stream.pipe(Operator::Filter(filter.clone()));
    }

    if let Some(group_expr) = &stmt.group_by {
        stream = stream.pipe(Operator::GroupBy(group_expr.clone()));

        // With GROUP BY, only aggregates and the grouping expression itself
        // may be projected.
        let mut aggregators = Vec::new();
        for (expr, _) in &stmt.projection {
            if let Expression::Aggregate(agg) = expr {
                aggregators.push(agg.clone());
                continue;
            }
            if expr == group_expr {
                continue;
            }
            return Err(Error::InvalidGroupByProjection(expr.to_string()));
        }
        stream = stream.pipe(Operator::HashAggregate(aggregators));
    } else {
        // No GROUP BY: any projected aggregates act over the full input.
        let aggregators: Vec<Aggregate> = stmt
            .projection
            .iter()
            .filter_map(|(expr, _)| match expr {
                Expression::Aggregate(agg) => Some(agg.clone()),
                _ => None,
            })
            .collect();
        if !aggregators.is_empty() {
            stream = stream.pipe(Operator::HashAggregate(aggregators));
        }
    }

    // Without FROM there is no document to address: reject paths and
    // wildcards anywhere in the projections.
    if stmt.from.is_none() {
        for (expr, _) in &stmt.projection {
            let mut offends = false;
            expr.walk(&mut |e| match e {
                Expression::Path(_) | Expression::Wildcard => {
                    offends = true;
                    false
                }
                _ => true,
            });
            if offends {
                return Err(Error::NoTablesSpecified);
            }
        }
    }

    stream = stream.pipe(Operator::Project(stmt.projection.clone()));

    if stmt.distinct {
        stream = stream.pipe(Operator::Distinct);
    }

    if let Some((path, direction)) = &stmt.order_by {
        stream = stream.pipe(Operator::Sort {
            path: path.clone(),
            reverse: *direction == Direction::Descending,
        });
    }

    if let Some(offset) = &stmt.offset {
        stream = stream.pipe(Operator::Skip(eval_row_count(offset, "offset")?));
    }
    if let Some(limit) = &stmt.limit {
        stream = stream.pipe(Operator::Take(eval_row_count(limit, "limit")?));
    }

    Ok(stream)
}

fn insert_to_stream(stmt: &InsertStatement) -> Result<Stream> {
    let mut stream = match &stmt.source {
        InsertSource::Values(values) => Stream::new(Operator::Expressions(values.clone())),
        InsertSource::Select(select) => select_to_stream(select)?,
    };
    stream = stream.pipe(Operator::TableInsert(stmt.table.clone()));
    if !stmt.returning.is_empty() {
        stream = stream.pipe(Operator::Project(stmt.returning.clone()));
    }
    Ok(stream)
}

fn update_to_stream(stmt: &UpdateStatement) -> Result<Stream> {
    let mut stream = Stream::new(Operator::SeqScan(stmt.table.clone()));
    if let Some(filter) = &stmt.r#where {
        stream = stream.pipe(Operator::Filter(filter.clone()));
    }
    if !stmt.set.is_empty() {
        stream = stream.pipe(Operator::Set(stmt.set.clone()));
    }
    if !stmt.unset.is_empty() {
        stream = stream.pipe(Operator::Unset(stmt.unset.clone()));
    }
    Ok(stream.pipe(Operator::TableReplace(stmt.table.clone())))
}

fn delete_to_stream(stmt: &DeleteStatement) -> Result<Stream> {
    let mut stream = Stream::new(Operator::SeqScan(stmt.table.clone()));
    if let Some(filter) = &stmt.r#where {
        stream = stream.pipe(Operator::Filter(filter.clone()));
    }
    if let Some((path, direction)) = &stmt.order_by {
        stream = stream.pipe(Operator::Sort {
            path: path.clone(),
            reverse: *direction == Direction::Descending,
        });
    }
    if let Some(offset) = &stmt.offset {
        stream = stream.pipe(Operator::Skip(eval_row_count(offset, "offset")?));
    }
    if let Some(limit) = &stmt.limit {
        stream = stream.pipe(Operator::Take(eval_row_count(limit, "limit")?));
    }
    Ok(stream.pipe(Operator::TableDelete(stmt.table.clone())))
}

// LIMIT and OFFSET evaluate eagerly at plan time, in an empty environment.
fn eval_row_count(expr: &Expression, clause: &'static str) -> Result<i64> {
    let value = eval(expr, &Environment::empty())?;
    if !value.is_number() {
        return Err(Error::NonNumericClause {
            clause,
            got: value.type_name(),
        });
    }
    let n = value.cast_as_integer()?;
    if n < 0 {
        return Err(Error::InvalidValue(format!(
            "{} must not be negative",
            clause
        )));
    }
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsing::parse_sql;

    fn plan(sql: &str) -> Result<Stream> {
        to_stream(&parse_sql(sql).unwrap())
    }

    fn stage_names(stream: &Stream) -> Vec<&'static str> {
        stream
            .ops
            .iter()
            .map(|op| match op {
                Operator::SeqScan(_) => "seqScan",
                Operator::Expressions(_) => "exprs",
                Operator::Filter(_) => "filter",
                Operator::Project(_) => "project",
                Operator::GroupBy(_) => "groupBy",
                Operator::HashAggregate(_) => "hashAggregate",
                Operator::Sort { .. } => "sort",
                Operator::Skip(_) => "skip",
                Operator::Take(_) => "take",
                Operator::Distinct => "distinct",
                Operator::Set(_) => "set",
                Operator::Unset(_) => "unset",
                Operator::TableInsert(_) => "tableInsert",
                Operator::TableReplace(_) => "tableReplace",
                Operator::TableDelete(_) => "tableDelete",
            })
            .collect()
    }

    #[test]
    fn select_stage_order() {
        let stream = plan(
            "SELECT DISTINCT a, COUNT(*) FROM t WHERE a > 1 GROUP BY a \
             ORDER BY a LIMIT 10 OFFSET 5",
        )
        .unwrap();
        assert_eq!(
            stage_names(&stream),
            vec![
                "seqScan",
                "filter",
                "groupBy",
                "hashAggregate",
                "project",
                "distinct",
                "sort",
                "skip",
                "take",
            ]
        );
    }

    #[test]
    fn plain_select_is_scan_and_project() {
        let stream = plan("SELECT * FROM t").unwrap();
        assert_eq!(stage_names(&stream), vec!["seqScan", "project"]);
    }

    #[test]
    fn aggregates_without_group_by_insert_hash_aggregate() {
        let stream = plan("SELECT COUNT(*) FROM t").unwrap();
        assert_eq!(
            stage_names(&stream),
            vec!["seqScan", "hashAggregate", "project"]
        );
    }

    #[test]
    fn group_by_rejects_invalid_projection() {
        let err = plan("SELECT b FROM t GROUP BY a").unwrap_err();
        assert_eq!(err, Error::InvalidGroupByProjection("b".into()));
        assert_eq!(
            err.to_string(),
            "field \"b\" must appear in the GROUP BY clause or be used in an aggregate function"
        );

        // The grouping expression itself and aggregates are fine.
        assert!(plan("SELECT a, COUNT(*) FROM t GROUP BY a").is_ok());
        assert!(plan("SELECT a + 1, MIN(b) FROM t GROUP BY a + 1").is_ok());
    }

    #[test]
    fn from_less_select_rejects_paths_and_wildcards() {
        assert_eq!(plan("SELECT a").unwrap_err(), Error::NoTablesSpecified);
        assert_eq!(plan("SELECT *").unwrap_err(), Error::NoTablesSpecified);
        assert_eq!(
            plan("SELECT 1 + a").unwrap_err(),
            Error::NoTablesSpecified
        );
        assert!(plan("SELECT 1 + 2").is_ok());
    }

    #[test]
    fn limit_and_offset_must_be_numbers() {
        let err = plan("SELECT a FROM t LIMIT 'x'").unwrap_err();
        assert_eq!(
            err.to_string(),
            "limit expression must evaluate to a number, got \"text\""
        );
        let err = plan("SELECT a FROM t OFFSET {a: 1}").unwrap_err();
        assert_eq!(
            err.to_string(),
            "offset expression must evaluate to a number, got \"document\""
        );
        assert!(plan("SELECT a FROM t LIMIT -1").is_err());
        assert!(plan("SELECT a FROM t LIMIT 1 + 1").is_ok());
    }

    #[test]
    fn write_statement_pipelines() {
        let stream = plan("DELETE FROM t WHERE a = 1 ORDER BY a LIMIT 2 OFFSET 1").unwrap();
        assert_eq!(
            stage_names(&stream),
            vec!["seqScan", "filter", "sort", "skip", "take", "tableDelete"]
        );

        let stream = plan("UPDATE t SET a = 1 WHERE b = 2").unwrap();
        assert_eq!(
            stage_names(&stream),
            vec!["seqScan", "filter", "set", "tableReplace"]
        );

        let stream = plan("INSERT INTO t (a) VALUES (1) RETURNING a").unwrap();
        assert_eq!(stage_names(&stream), vec!["exprs", "tableInsert", "project"]);
    }
}
