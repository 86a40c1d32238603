//! Aggregate accumulators.
//!
//! Each aggregate expression builds an accumulator that folds the values it
//! sees into a single result. The hash aggregation stage keeps one set of
//! accumulators per group.

use crate::error::Result;
use crate::types::evaluator::{eval, Environment};
use crate::types::expression::{Aggregate, Expression};
use crate::types::value::Value;
use std::cmp::Ordering;

/// Folds a sequence of input documents into one value.
pub trait Accumulator {
    /// Feeds one input document (via its environment) to the accumulator.
    fn add(&mut self, env: &Environment) -> Result<()>;

    /// Produces the aggregate result.
    fn finalize(self: Box<Self>) -> Result<Value>;
}

impl Aggregate {
    /// Builds a fresh accumulator for this aggregate.
    pub fn accumulator(&self) -> Box<dyn Accumulator> {
        match self {
            Aggregate::Count(expr) => Box::new(CountAccumulator {
                expr: expr.as_deref().cloned(),
                count: 0,
            }),
            Aggregate::Sum(expr) => Box::new(SumAccumulator {
                expr: (**expr).clone(),
                sum: Value::Null,
            }),
            Aggregate::Avg(expr) => Box::new(AvgAccumulator {
                expr: (**expr).clone(),
                sum: Value::Null,
                count: 0,
            }),
            Aggregate::Min(expr) => Box::new(ExtremeAccumulator {
                expr: (**expr).clone(),
                keep: Ordering::Less,
                extreme: Value::Null,
            }),
            Aggregate::Max(expr) => Box::new(ExtremeAccumulator {
                expr: (**expr).clone(),
                keep: Ordering::Greater,
                extreme: Value::Null,
            }),
        }
    }
}

/// COUNT(*) counts rows; COUNT(expr) counts non-null values.
struct CountAccumulator {
    expr: Option<Expression>,
    count: i64,
}

impl Accumulator for CountAccumulator {
    fn add(&mut self, env: &Environment) -> Result<()> {
        match &self.expr {
            None => self.count += 1,
            Some(expr) => {
                if !eval(expr, env)?.is_null() {
                    self.count += 1;
                }
            }
        }
        Ok(())
    }

    fn finalize(self: Box<Self>) -> Result<Value> {
        Ok(Value::Integer(self.count))
    }
}

/// SUM over the numeric values; non-numbers are ignored, no numbers yields
/// Null.
struct SumAccumulator {
    expr: Expression,
    sum: Value,
}

impl Accumulator for SumAccumulator {
    fn add(&mut self, env: &Environment) -> Result<()> {
        let value = eval(&self.expr, env)?;
        if !value.is_number() {
            return Ok(());
        }
        self.sum = if self.sum.is_null() {
            value
        } else {
            self.sum.add(&value)?
        };
        Ok(())
    }

    fn finalize(self: Box<Self>) -> Result<Value> {
        Ok(self.sum)
    }
}

struct AvgAccumulator {
    expr: Expression,
    sum: Value,
    count: i64,
}

impl Accumulator for AvgAccumulator {
    fn add(&mut self, env: &Environment) -> Result<()> {
        let value = eval(&self.expr, env)?;
        if !value.is_number() {
            return Ok(());
        }
        self.sum = if self.sum.is_null() {
            value
        } else {
            self.sum.add(&value)?
        };
        self.count += 1;
        Ok(())
    }

    fn finalize(self: Box<Self>) -> Result<Value> {
        if self.count == 0 {
            return Ok(Value::Null);
        }
        // Averages are doubles, even over integer input.
        self.sum
            .multiply(&Value::Double(1.0))?
            .divide(&Value::Integer(self.count))
    }
}

/// MIN and MAX, by the cross-type total order, ignoring Null.
struct ExtremeAccumulator {
    expr: Expression,
    keep: Ordering,
    extreme: Value,
}

impl Accumulator for ExtremeAccumulator {
    fn add(&mut self, env: &Environment) -> Result<()> {
        let value = eval(&self.expr, env)?;
        if value.is_null() {
            return Ok(());
        }
        if self.extreme.is_null() || value.cmp(&self.extreme) == self.keep {
            self.extreme = value;
        }
        Ok(())
    }

    fn finalize(self: Box<Self>) -> Result<Value> {
        Ok(self.extreme)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::path::Path;
    use crate::types::value::Document;

    fn docs(values: &[Value]) -> Vec<Document> {
        values
            .iter()
            .map(|value| {
                let mut doc = Document::new();
                doc.set("v", value.clone());
                doc
            })
            .collect()
    }

    fn run(agg: Aggregate, values: &[Value]) -> Value {
        let mut acc = agg.accumulator();
        for doc in docs(values) {
            let base = Environment::empty();
            let env = base.with_document(&doc);
            acc.add(&env).unwrap();
        }
        acc.finalize().unwrap()
    }

    fn v_expr() -> Box<Expression> {
        Box::new(Expression::Path(Path::field("v")))
    }

    #[test]
    fn count() {
        let values = [Value::Integer(1), Value::Null, Value::Integer(3)];
        assert_eq!(run(Aggregate::Count(None), &values), Value::Integer(3));
        assert_eq!(
            run(Aggregate::Count(Some(v_expr())), &values),
            Value::Integer(2)
        );
        assert_eq!(run(Aggregate::Count(None), &[]), Value::Integer(0));
    }

    #[test]
    fn sum_and_avg() {
        let values = [
            Value::Integer(1),
            Value::Integer(2),
            Value::Text("skipped".into()),
            Value::Integer(3),
        ];
        assert_eq!(run(Aggregate::Sum(v_expr()), &values), Value::Integer(6));
        assert_eq!(run(Aggregate::Avg(v_expr()), &values), Value::Double(2.0));
        assert_eq!(run(Aggregate::Sum(v_expr()), &[]), Value::Null);
        assert_eq!(run(Aggregate::Avg(v_expr()), &[]), Value::Null);
    }

    #[test]
    fn min_and_max() {
        let values = [
            Value::Integer(5),
            Value::Integer(2),
            Value::Null,
            Value::Integer(8),
        ];
        assert_eq!(run(Aggregate::Min(v_expr()), &values), Value::Integer(2));
        assert_eq!(run(Aggregate::Max(v_expr()), &values), Value::Integer(8));
    }
}
