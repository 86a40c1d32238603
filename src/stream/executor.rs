//! Pull-based execution of stream pipelines.
//!
//! Each operator wraps its predecessor's lazy iterator; pulling the tail
//! drives the whole pipeline. Frames carry the document, its storage key
//! (for the table sinks) and its group tag (between GroupBy and the
//! aggregation stage). The first error aborts the pipeline, and the consumer
//! may stop pulling at any time. Blocking stages (sort, aggregation)
//! materialize their input up front.

use crate::error::{Error, Result};
use crate::storage::transaction::Transaction;
use crate::storage::{catalog, table};
use crate::stream::{Operator, Projection, Stream};
use crate::types::evaluator::{eval, resolve_path, Environment, Param};
use crate::types::expression::{Aggregate, Expression};
use crate::types::path::Path;
use crate::types::value::{Document, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// A document moving through a pipeline, with its storage key (when it came
/// from or went to a table) and its group tag (set by GroupBy).
#[derive(Clone, Debug)]
pub struct Frame {
    pub key: Option<Vec<u8>>,
    pub doc: Document,
    pub group: Option<Value>,
}

impl Frame {
    fn new(doc: Document) -> Self {
        Frame {
            key: None,
            doc,
            group: None,
        }
    }
}

/// The lazy sequence of frames produced by a pipeline stage.
pub type Frames = Box<dyn Iterator<Item = Result<Frame>>>;

/// Execution context: the transaction all stages share (borrowed, never
/// owned by any stage) and the bound parameters.
#[derive(Clone)]
pub struct Context {
    pub txn: Arc<Transaction>,
    pub params: Arc<Vec<Param>>,
}

/// Builds the pipeline's tail iterator for a stream.
pub fn execute(stream: &Stream, ctx: &Context) -> Result<Frames> {
    let mut frames: Frames = Box::new(std::iter::empty());
    // The grouping expression travels from GroupBy to the aggregation stage
    // so emitted groups can name their key field.
    let mut group_expr: Option<Expression> = None;

    for op in &stream.ops {
        frames = match op {
            Operator::SeqScan(name) => seq_scan(ctx, name)?,
            Operator::Expressions(exprs) => expressions(ctx, exprs.clone()),
            Operator::Filter(expr) => filter(ctx, frames, expr.clone()),
            Operator::Project(projections) => project(ctx, frames, projections.clone()),
            Operator::GroupBy(expr) => {
                group_expr = Some(expr.clone());
                group_by(ctx, frames, expr.clone())
            }
            Operator::HashAggregate(aggs) => {
                hash_aggregate(ctx, frames, aggs, group_expr.take())?
            }
            Operator::Sort { path, reverse } => sort(frames, path, *reverse)?,
            Operator::Skip(n) => Box::new(frames.skip((*n).max(0) as usize)),
            Operator::Take(n) => Box::new(frames.take((*n).max(0) as usize)),
            Operator::Distinct => distinct(frames),
            Operator::Set(assignments) => set(ctx, frames, assignments.clone()),
            Operator::Unset(paths) => unset(frames, paths.clone()),
            Operator::TableInsert(name) => table_insert(ctx, frames, name)?,
            Operator::TableReplace(name) => table_replace(ctx, frames, name)?,
            Operator::TableDelete(name) => table_delete(ctx, frames, name)?,
        };
    }
    Ok(frames)
}

fn seq_scan(ctx: &Context, name: &str) -> Result<Frames> {
    let info = catalog::get_table(&ctx.txn, name)?;
    let rows = table::scan(&ctx.txn, &info)?;
    Ok(Box::new(rows.into_iter().map(|(key, bytes)| {
        let doc: Document = bincode::deserialize(&bytes)?;
        Ok(Frame {
            key: Some(key),
            doc,
            group: None,
        })
    })))
}

fn expressions(ctx: &Context, exprs: Vec<Expression>) -> Frames {
    let params = ctx.params.clone();
    Box::new(exprs.into_iter().map(move |expr| {
        let env = Environment::new(&params);
        match eval(&expr, &env)? {
            Value::Document(doc) => Ok(Frame::new(doc)),
            other => Err(Error::ExecutionError(format!(
                "values must evaluate to documents, got {}",
                other.type_name()
            ))),
        }
    }))
}

fn filter(ctx: &Context, frames: Frames, expr: Expression) -> Frames {
    let params = ctx.params.clone();
    Box::new(frames.filter_map(move |frame| {
        let frame = match frame {
            Ok(frame) => frame,
            Err(err) => return Some(Err(err)),
        };
        let base = Environment::new(&params);
        let env = base.with_document(&frame.doc);
        match eval(&expr, &env) {
            Ok(value) if value.is_truthy() => Some(Ok(frame)),
            Ok(_) => None,
            Err(err) => Some(Err(err)),
        }
    }))
}

fn project(ctx: &Context, frames: Frames, projections: Vec<Projection>) -> Frames {
    let params = ctx.params.clone();
    Box::new(frames.map(move |frame| {
        let frame = frame?;
        let mut out = Document::new();
        for (expr, alias) in &projections {
            // A wildcard splices every field of the input in order.
            if let Expression::Wildcard = expr {
                for (name, value) in frame.doc.iter() {
                    out.set(name.to_string(), value.clone());
                }
                continue;
            }
            let name = match alias {
                Some(alias) => alias.clone(),
                None => match expr {
                    Expression::Path(path) => path.leaf(),
                    other => other.to_string(),
                },
            };
            // Grouped documents carry the group key under the grouping
            // expression's rendering; a projection of that expression reads
            // the field back instead of re-evaluating.
            if frame.group.is_some() {
                if let Some(value) = frame.doc.get(&expr.to_string()) {
                    out.set(name, value.clone());
                    continue;
                }
            }
            let base = Environment::new(&params);
            let env = base.with_document(&frame.doc);
            out.set(name, eval(expr, &env)?);
        }
        Ok(Frame {
            key: frame.key,
            doc: out,
            group: frame.group,
        })
    }))
}

fn group_by(ctx: &Context, frames: Frames, expr: Expression) -> Frames {
    let params = ctx.params.clone();
    Box::new(frames.map(move |frame| {
        let mut frame = frame?;
        let base = Environment::new(&params);
        let env = base.with_document(&frame.doc);
        frame.group = Some(eval(&expr, &env)?);
        Ok(frame)
    }))
}

fn hash_aggregate(
    ctx: &Context,
    frames: Frames,
    aggs: &[Aggregate],
    group_expr: Option<Expression>,
) -> Result<Frames> {
    // Blocking: consume the whole input, keeping one accumulator set per
    // group in first-seen order.
    type Accumulators = Vec<Box<dyn super::aggregate::Accumulator>>;
    let mut buckets: Vec<(Option<Value>, Accumulators)> = Vec::new();
    let mut index: HashMap<Option<Value>, usize> = HashMap::new();

    for frame in frames {
        let frame = frame?;
        let slot = *index.entry(frame.group.clone()).or_insert_with(|| {
            buckets.push((
                frame.group.clone(),
                aggs.iter().map(|agg| agg.accumulator()).collect(),
            ));
            buckets.len() - 1
        });
        let base = Environment::new(&ctx.params);
        let env = base.with_document(&frame.doc);
        for accumulator in buckets[slot].1.iter_mut() {
            accumulator.add(&env)?;
        }
    }

    // Without grouping, an empty input still yields one global bucket so
    // e.g. COUNT(*) over an empty table is 0.
    if buckets.is_empty() && group_expr.is_none() {
        buckets.push((None, aggs.iter().map(|agg| agg.accumulator()).collect()));
    }

    let mut out = Vec::with_capacity(buckets.len());
    for (group, accumulators) in buckets {
        let mut doc = Document::new();
        if let (Some(expr), Some(key)) = (&group_expr, &group) {
            doc.set(expr.to_string(), key.clone());
        }
        for (agg, accumulator) in aggs.iter().zip(accumulators) {
            doc.set(agg.to_string(), accumulator.finalize()?);
        }
        out.push(Ok(Frame {
            key: None,
            doc,
            group,
        }));
    }
    Ok(Box::new(out.into_iter()))
}

fn sort(frames: Frames, path: &Path, reverse: bool) -> Result<Frames> {
    // Blocking: buffer everything, then stable-sort by the value at the
    // path so ties keep arrival order. A missing path sorts as Null.
    let mut buffered: Vec<(Value, Frame)> = Vec::new();
    for frame in frames {
        let frame = frame?;
        let key = resolve_path(&frame.doc, path)
            .cloned()
            .unwrap_or(Value::Null);
        buffered.push((key, frame));
    }
    if reverse {
        buffered.sort_by(|(a, _), (b, _)| b.cmp(a));
    } else {
        buffered.sort_by(|(a, _), (b, _)| a.cmp(b));
    }
    Ok(Box::new(buffered.into_iter().map(|(_, frame)| Ok(frame))))
}

fn distinct(frames: Frames) -> Frames {
    // First occurrence wins. Identity is structural document equality,
    // which ignores field order.
    let mut seen: HashSet<Document> = HashSet::new();
    Box::new(frames.filter_map(move |frame| {
        let frame = match frame {
            Ok(frame) => frame,
            Err(err) => return Some(Err(err)),
        };
        if seen.insert(frame.doc.clone()) {
            Some(Ok(frame))
        } else {
            None
        }
    }))
}

fn set(ctx: &Context, frames: Frames, assignments: Vec<(Path, Expression)>) -> Frames {
    let params = ctx.params.clone();
    Box::new(frames.map(move |frame| {
        let mut frame = frame?;
        // Assignments apply in order, each seeing the previous one's effect.
        for (path, expr) in &assignments {
            let value = {
                let base = Environment::new(&params);
                let env = base.with_document(&frame.doc);
                eval(expr, &env)?
            };
            frame.doc.set_path(path, value)?;
        }
        Ok(frame)
    }))
}

fn unset(frames: Frames, paths: Vec<Path>) -> Frames {
    Box::new(frames.map(move |frame| {
        let mut frame = frame?;
        for path in &paths {
            frame.doc.unset_path(path);
        }
        Ok(frame)
    }))
}

fn table_insert(ctx: &Context, frames: Frames, name: &str) -> Result<Frames> {
    let txn = ctx.txn.clone();
    let info = catalog::get_table(&txn, name)?;
    let indexes = catalog::indexes_of(&txn, name)?;
    Ok(Box::new(frames.map(move |frame| {
        let frame = frame?;
        let (key, doc) = table::insert(&txn, &info, &indexes, frame.doc)?;
        Ok(Frame {
            key: Some(key),
            doc,
            group: None,
        })
    })))
}

fn table_replace(ctx: &Context, frames: Frames, name: &str) -> Result<Frames> {
    let txn = ctx.txn.clone();
    let info = catalog::get_table(&txn, name)?;
    let indexes = catalog::indexes_of(&txn, name)?;
    Ok(Box::new(frames.map(move |frame| {
        let frame = frame?;
        let key = frame
            .key
            .ok_or_else(|| Error::ExecutionError("document has no key to replace".into()))?;
        let doc = table::replace(&txn, &info, &indexes, &key, frame.doc)?;
        Ok(Frame {
            key: Some(key),
            doc,
            group: None,
        })
    })))
}

fn table_delete(ctx: &Context, frames: Frames, name: &str) -> Result<Frames> {
    let txn = ctx.txn.clone();
    let info = catalog::get_table(&txn, name)?;
    let indexes = catalog::indexes_of(&txn, name)?;
    Ok(Box::new(frames.map(move |frame| {
        let frame = frame?;
        let key = frame
            .key
            .ok_or_else(|| Error::ExecutionError("document has no key to delete".into()))?;
        let doc = table::delete(&txn, &info, &indexes, &key)?;
        Ok(Frame {
            key: Some(key),
            doc,
            group: None,
        })
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::engine::Memory;
    use crate::types::expression::Operator as ExprOp;

    fn context() -> Context {
        Context {
            txn: Arc::new(Transaction::begin(Arc::new(Memory::new()), false)),
            params: Arc::new(Vec::new()),
        }
    }

    fn doc(fields: &[(&str, Value)]) -> Document {
        fields
            .iter()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect()
    }

    fn seed(ctx: &Context, table_name: &str, docs: &[Document]) {
        catalog::create_table(&ctx.txn, table_name, None, false).unwrap();
        let info = catalog::get_table(&ctx.txn, table_name).unwrap();
        for d in docs {
            table::insert(&ctx.txn, &info, &[], d.clone()).unwrap();
        }
    }

    fn run(stream: &Stream, ctx: &Context) -> Vec<Document> {
        execute(stream, ctx)
            .unwrap()
            .map(|frame| frame.unwrap().doc)
            .collect()
    }

    fn path(name: &str) -> Expression {
        Expression::Path(Path::field(name))
    }

    fn int(i: i64) -> Expression {
        Expression::Literal(Value::Integer(i))
    }

    #[test]
    fn scan_filter_project() {
        let ctx = context();
        seed(
            &ctx,
            "t",
            &[
                doc(&[("a", Value::Integer(1))]),
                doc(&[("a", Value::Integer(2))]),
                doc(&[("a", Value::Integer(3))]),
            ],
        );

        let stream = Stream::new(Operator::SeqScan("t".into()))
            .pipe(Operator::Filter(Expression::Operator(ExprOp::GreaterThan(
                Box::new(path("a")),
                Box::new(int(1)),
            ))))
            .pipe(Operator::Project(vec![(path("a"), None)]));

        assert_eq!(
            run(&stream, &ctx),
            vec![
                doc(&[("a", Value::Integer(2))]),
                doc(&[("a", Value::Integer(3))]),
            ]
        );
    }

    #[test]
    fn group_and_aggregate_first_seen_order() {
        let ctx = context();
        seed(
            &ctx,
            "t",
            &[
                doc(&[("a", Value::Integer(2))]),
                doc(&[("a", Value::Integer(1))]),
                doc(&[("a", Value::Integer(2))]),
            ],
        );

        let stream = Stream::new(Operator::SeqScan("t".into()))
            .pipe(Operator::GroupBy(path("a")))
            .pipe(Operator::HashAggregate(vec![Aggregate::Count(None)]));

        assert_eq!(
            run(&stream, &ctx),
            vec![
                doc(&[("a", Value::Integer(2)), ("COUNT(*)", Value::Integer(2))]),
                doc(&[("a", Value::Integer(1)), ("COUNT(*)", Value::Integer(1))]),
            ]
        );
    }

    #[test]
    fn global_aggregate_over_empty_input() {
        let ctx = context();
        seed(&ctx, "t", &[]);
        let stream = Stream::new(Operator::SeqScan("t".into()))
            .pipe(Operator::HashAggregate(vec![Aggregate::Count(None)]));
        assert_eq!(
            run(&stream, &ctx),
            vec![doc(&[("COUNT(*)", Value::Integer(0))])]
        );
    }

    #[test]
    fn sort_is_stable_and_reversible() {
        let ctx = context();
        let rows = [
            doc(&[("a", Value::Integer(2)), ("tag", Value::Integer(1))]),
            doc(&[("a", Value::Integer(1)), ("tag", Value::Integer(2))]),
            doc(&[("a", Value::Integer(2)), ("tag", Value::Integer(3))]),
        ];
        seed(&ctx, "t", &rows);

        let asc = Stream::new(Operator::SeqScan("t".into())).pipe(Operator::Sort {
            path: Path::field("a"),
            reverse: false,
        });
        assert_eq!(run(&asc, &ctx), vec![rows[1].clone(), rows[0].clone(), rows[2].clone()]);

        let desc = Stream::new(Operator::SeqScan("t".into())).pipe(Operator::Sort {
            path: Path::field("a"),
            reverse: true,
        });
        // Ties keep arrival order in both directions.
        assert_eq!(run(&desc, &ctx), vec![rows[0].clone(), rows[2].clone(), rows[1].clone()]);
    }

    #[test]
    fn skip_take_distinct() {
        let ctx = context();
        seed(
            &ctx,
            "t",
            &[
                doc(&[("a", Value::Integer(1))]),
                doc(&[("a", Value::Integer(1))]),
                doc(&[("a", Value::Integer(2))]),
                doc(&[("a", Value::Integer(3))]),
            ],
        );

        let stream = Stream::new(Operator::SeqScan("t".into()))
            .pipe(Operator::Distinct)
            .pipe(Operator::Skip(1))
            .pipe(Operator::Take(1));
        assert_eq!(run(&stream, &ctx), vec![doc(&[("a", Value::Integer(2))])]);
    }

    #[test]
    fn wildcard_projection_preserves_field_order() {
        let ctx = context();
        seed(
            &ctx,
            "t",
            &[doc(&[
                ("z", Value::Integer(1)),
                ("a", Value::Integer(2)),
            ])],
        );
        let stream = Stream::new(Operator::SeqScan("t".into()))
            .pipe(Operator::Project(vec![(Expression::Wildcard, None)]));
        let out = run(&stream, &ctx);
        let names: Vec<_> = out[0].iter().map(|(name, _)| name.to_string()).collect();
        assert_eq!(names, ["z", "a"]);
    }

    #[test]
    fn delete_sink_removes_rows() {
        let ctx = context();
        seed(
            &ctx,
            "t",
            &[
                doc(&[("a", Value::Integer(1))]),
                doc(&[("a", Value::Integer(2))]),
            ],
        );

        let stream = Stream::new(Operator::SeqScan("t".into()))
            .pipe(Operator::Filter(Expression::Operator(ExprOp::Equal(
                Box::new(path("a")),
                Box::new(int(1)),
            ))))
            .pipe(Operator::TableDelete("t".into()));
        assert_eq!(run(&stream, &ctx).len(), 1);

        let remaining = run(&Stream::new(Operator::SeqScan("t".into())), &ctx);
        assert_eq!(remaining, vec![doc(&[("a", Value::Integer(2))])]);
    }

    #[test]
    fn set_and_replace_update_rows() {
        let ctx = context();
        seed(&ctx, "t", &[doc(&[("a", Value::Integer(1))])]);

        let stream = Stream::new(Operator::SeqScan("t".into()))
            .pipe(Operator::Set(vec![(
                Path::field("a"),
                Expression::Operator(ExprOp::Add(Box::new(path("a")), Box::new(int(10)))),
            )]))
            .pipe(Operator::TableReplace("t".into()));
        run(&stream, &ctx);

        let rows = run(&Stream::new(Operator::SeqScan("t".into())), &ctx);
        assert_eq!(rows, vec![doc(&[("a", Value::Integer(11))])]);
    }
}
