//! Expression evaluation against an environment.
//!
//! An environment is a stack frame carrying the document under evaluation
//! and the bound parameters. Nested frames shadow the current document while
//! inheriting parameters through the outer chain.

use crate::error::{Error, Result};
use crate::types::expression::{Expression, Operator, Parameter};
use crate::types::path::Path;
use crate::types::value::{Document, Value};
use std::cmp::Ordering;

/// A bound statement parameter, positional or named.
#[derive(Clone, Debug, PartialEq)]
pub struct Param {
    pub name: Option<String>,
    pub value: Value,
}

impl Param {
    pub fn positional(value: Value) -> Self {
        Param { name: None, value }
    }

    pub fn named(name: impl Into<String>, value: Value) -> Self {
        Param {
            name: Some(name.into()),
            value,
        }
    }
}

/// An evaluation environment.
#[derive(Clone, Copy, Default)]
pub struct Environment<'a> {
    current: Option<&'a Document>,
    params: &'a [Param],
    outer: Option<&'a Environment<'a>>,
}

impl<'a> Environment<'a> {
    /// An empty environment: no document, no parameters. Used for eager
    /// plan-time evaluation of LIMIT/OFFSET.
    pub fn empty() -> Environment<'static> {
        Environment::default()
    }

    pub fn new(params: &'a [Param]) -> Self {
        Environment {
            current: None,
            params,
            outer: None,
        }
    }

    /// A child frame with the given current document, shadowing the parent's.
    pub fn with_document(&'a self, doc: &'a Document) -> Environment<'a> {
        Environment {
            current: Some(doc),
            params: self.params,
            outer: Some(self),
        }
    }

    /// The innermost current document, if any.
    pub fn document(&self) -> Option<&'a Document> {
        match self.current {
            Some(doc) => Some(doc),
            None => self.outer.and_then(|outer| outer.document()),
        }
    }

    fn resolve_param(&self, param: &Parameter) -> Result<Value> {
        match param {
            Parameter::Positional(index) => self
                .params
                .iter()
                .filter(|p| p.name.is_none())
                .nth(*index)
                .map(|p| p.value.clone())
                .ok_or_else(|| Error::ParameterNotFound(format!("?{}", index + 1))),
            Parameter::Named(name) => self
                .params
                .iter()
                .find(|p| p.name.as_deref() == Some(name.as_str()))
                .map(|p| p.value.clone())
                .ok_or_else(|| Error::ParameterNotFound(format!("${}", name))),
        }
    }
}

/// Reduces an expression to a value in the given environment.
pub fn eval(expr: &Expression, env: &Environment) -> Result<Value> {
    match expr {
        Expression::Literal(value) => Ok(value.clone()),

        // A missing field yields Null, not an error.
        Expression::Path(path) => Ok(env
            .document()
            .and_then(|doc| resolve_path(doc, path))
            .cloned()
            .unwrap_or(Value::Null)),

        Expression::Parameter(param) => env.resolve_param(param),

        Expression::Operator(op) => eval_operator(op, env),

        Expression::Function(name, args) => {
            let values = args
                .iter()
                .map(|arg| eval(arg, env))
                .collect::<Result<Vec<_>>>()?;
            call_function(name, values)
        }

        Expression::KVPairs(pairs) => {
            let mut doc = Document::new();
            for (name, expr) in pairs {
                doc.set(name.clone(), eval(expr, env)?);
            }
            Ok(Value::Document(doc))
        }

        // The aggregation stage stores each aggregate's result in a field
        // named by its rendering; evaluating the aggregate expression
        // downstream (e.g. in a projection) reads that field back.
        Expression::Aggregate(agg) => {
            if let Some(value) = env.document().and_then(|doc| doc.get(&agg.to_string())) {
                return Ok(value.clone());
            }
            Err(Error::ExecutionError(format!(
                "aggregate function {} used outside an aggregation context",
                agg
            )))
        }

        Expression::Wildcard => Err(Error::ExecutionError(
            "wildcard is only valid in projections".into(),
        )),
    }
}

/// Resolves a path against a document. Documents emitted by aggregation name
/// the group field by the full rendering of the grouping expression, so a
/// failed segment walk falls back to a whole-path field lookup.
pub fn resolve_path<'a>(doc: &'a Document, path: &Path) -> Option<&'a Value> {
    doc.get_path(path)
        .or_else(|| doc.get(&path.to_string()))
}

fn eval_operator(op: &Operator, env: &Environment) -> Result<Value> {
    use Operator::*;

    let compare = |lhs: &Expression, rhs: &Expression| -> Result<Ordering> {
        Ok(eval(lhs, env)?.cmp(&eval(rhs, env)?))
    };

    Ok(match op {
        And(lhs, rhs) => {
            Value::Bool(eval(lhs, env)?.is_truthy() && eval(rhs, env)?.is_truthy())
        }
        Or(lhs, rhs) => {
            Value::Bool(eval(lhs, env)?.is_truthy() || eval(rhs, env)?.is_truthy())
        }
        Not(expr) => Value::Bool(!eval(expr, env)?.is_truthy()),

        Equal(lhs, rhs) => Value::Bool(compare(lhs, rhs)? == Ordering::Equal),
        NotEqual(lhs, rhs) => Value::Bool(compare(lhs, rhs)? != Ordering::Equal),
        GreaterThan(lhs, rhs) => Value::Bool(compare(lhs, rhs)? == Ordering::Greater),
        GreaterThanOrEqual(lhs, rhs) => Value::Bool(compare(lhs, rhs)? != Ordering::Less),
        LessThan(lhs, rhs) => Value::Bool(compare(lhs, rhs)? == Ordering::Less),
        LessThanOrEqual(lhs, rhs) => Value::Bool(compare(lhs, rhs)? != Ordering::Greater),

        Add(lhs, rhs) => eval(lhs, env)?.add(&eval(rhs, env)?)?,
        Subtract(lhs, rhs) => eval(lhs, env)?.subtract(&eval(rhs, env)?)?,
        Multiply(lhs, rhs) => eval(lhs, env)?.multiply(&eval(rhs, env)?)?,
        Divide(lhs, rhs) => eval(lhs, env)?.divide(&eval(rhs, env)?)?,
        Remainder(lhs, rhs) => eval(lhs, env)?.remainder(&eval(rhs, env)?)?,

        Negate(expr) => eval(expr, env)?.negate()?,
        Identity(expr) => eval(expr, env)?,
    })
}

// Scalar function dispatch by (case-insensitive) name.
fn call_function(name: &str, mut args: Vec<Value>) -> Result<Value> {
    let arity = |expected: usize| -> Result<()> {
        if args.len() != expected {
            return Err(Error::ExecutionError(format!(
                "{}() takes {} argument(s), got {}",
                name.to_uppercase(),
                expected,
                args.len()
            )));
        }
        Ok(())
    };

    match name.to_uppercase().as_str() {
        "UPPER" => {
            arity(1)?;
            match args.remove(0) {
                Value::Text(s) => Ok(Value::Text(s.to_uppercase())),
                Value::Null => Ok(Value::Null),
                other => Err(Error::TypeMismatch {
                    expected: "text".into(),
                    found: other.type_name().into(),
                }),
            }
        }
        "LOWER" => {
            arity(1)?;
            match args.remove(0) {
                Value::Text(s) => Ok(Value::Text(s.to_lowercase())),
                Value::Null => Ok(Value::Null),
                other => Err(Error::TypeMismatch {
                    expected: "text".into(),
                    found: other.type_name().into(),
                }),
            }
        }
        "LENGTH" => {
            arity(1)?;
            match args.remove(0) {
                Value::Text(s) => Ok(Value::Integer(s.chars().count() as i64)),
                Value::Blob(b) => Ok(Value::Integer(b.len() as i64)),
                Value::Array(a) => Ok(Value::Integer(a.len() as i64)),
                Value::Null => Ok(Value::Null),
                other => Err(Error::TypeMismatch {
                    expected: "text, blob or array".into(),
                    found: other.type_name().into(),
                }),
            }
        }
        "ABS" => {
            arity(1)?;
            match args.remove(0) {
                Value::Integer(i) => Ok(match i.checked_abs() {
                    Some(x) => Value::Integer(x),
                    None => Value::Double((i as f64).abs()),
                }),
                Value::Double(d) => Ok(Value::Double(d.abs())),
                Value::Null => Ok(Value::Null),
                other => Err(Error::TypeMismatch {
                    expected: "number".into(),
                    found: other.type_name().into(),
                }),
            }
        }
        _ => Err(Error::ExecutionError(format!(
            "no such function: {}",
            name.to_uppercase()
        ))),
    }
}
