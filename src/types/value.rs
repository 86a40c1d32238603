//! Dynamically typed document values.
//!
//! Values form a closed sum over the supported scalar and composite kinds.
//! Cross-type comparisons follow a fixed total order:
//! Null < Bool < number < Text < Blob < Array < Document, where Integer and
//! Double compare by mathematical value.

use crate::error::{Error, Result};
use crate::types::path::{Path, PathSegment};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// A document value.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Integer(i64),
    Double(f64),
    Text(String),
    Blob(Vec<u8>),
    Array(Vec<Value>),
    Document(Document),
}

/// An insertion-ordered mapping from field names to values. Field order is
/// observable through iteration, projection and marshaling, but is not
/// significant to equality: comparison, ordering and hashing all go through
/// a name-sorted view of the fields.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Document {
    fields: Vec<(String, Value)>,
}

impl Value {
    /// The name of the value's type, as used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Integer(_) => "integer",
            Value::Double(_) => "double",
            Value::Text(_) => "text",
            Value::Blob(_) => "blob",
            Value::Array(_) => "array",
            Value::Document(_) => "document",
        }
    }

    /// Rank in the cross-type total order. Integer and Double share a rank.
    pub fn type_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Integer(_) | Value::Double(_) => 2,
            Value::Text(_) => 3,
            Value::Blob(_) => 4,
            Value::Array(_) => 5,
            Value::Document(_) => 6,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_number(&self) -> bool {
        matches!(self, Value::Integer(_) | Value::Double(_))
    }

    /// Truthiness: not Null, not false, not numeric zero.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Integer(i) => *i != 0,
            Value::Double(d) => *d != 0.0,
            _ => true,
        }
    }

    /// Numeric coercion to f64, None for non-numeric values.
    fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Double(d) => Some(*d),
            _ => None,
        }
    }

    /// Casts the value to an i64. Doubles convert only when they carry no
    /// fractional part.
    pub fn cast_as_integer(&self) -> Result<i64> {
        match self {
            Value::Integer(i) => Ok(*i),
            Value::Double(d) if d.fract() == 0.0 && *d >= i64::MIN as f64 && *d < i64::MAX as f64 => {
                Ok(*d as i64)
            }
            other => Err(Error::TypeMismatch {
                expected: "integer".into(),
                found: other.type_name().into(),
            }),
        }
    }

    pub fn add(&self, other: &Value) -> Result<Value> {
        if let (Value::Integer(a), Value::Integer(b)) = (self, other) {
            return Ok(match a.checked_add(*b) {
                Some(x) => Value::Integer(x),
                None => Value::Double(*a as f64 + *b as f64),
            });
        }
        Ok(self.numeric_binop(other, |a, b| a + b))
    }

    pub fn subtract(&self, other: &Value) -> Result<Value> {
        if let (Value::Integer(a), Value::Integer(b)) = (self, other) {
            return Ok(match a.checked_sub(*b) {
                Some(x) => Value::Integer(x),
                None => Value::Double(*a as f64 - *b as f64),
            });
        }
        Ok(self.numeric_binop(other, |a, b| a - b))
    }

    pub fn multiply(&self, other: &Value) -> Result<Value> {
        if let (Value::Integer(a), Value::Integer(b)) = (self, other) {
            return Ok(match a.checked_mul(*b) {
                Some(x) => Value::Integer(x),
                None => Value::Double(*a as f64 * *b as f64),
            });
        }
        Ok(self.numeric_binop(other, |a, b| a * b))
    }

    /// Integer division truncates; division by integer zero is an error,
    /// Double division follows IEEE.
    pub fn divide(&self, other: &Value) -> Result<Value> {
        if let (Value::Integer(a), Value::Integer(b)) = (self, other) {
            if *b == 0 {
                return Err(Error::DivisionByZero);
            }
            return Ok(match a.checked_div(*b) {
                Some(x) => Value::Integer(x),
                None => Value::Double(*a as f64 / *b as f64),
            });
        }
        Ok(self.numeric_binop(other, |a, b| a / b))
    }

    pub fn remainder(&self, other: &Value) -> Result<Value> {
        if let (Value::Integer(a), Value::Integer(b)) = (self, other) {
            if *b == 0 {
                return Err(Error::DivisionByZero);
            }
            return Ok(Value::Integer(a.wrapping_rem(*b)));
        }
        Ok(self.numeric_binop(other, |a, b| a % b))
    }

    pub fn negate(&self) -> Result<Value> {
        Ok(match self {
            Value::Integer(i) => match i.checked_neg() {
                Some(x) => Value::Integer(x),
                None => Value::Double(-(*i as f64)),
            },
            Value::Double(d) => Value::Double(-d),
            _ => Value::Null,
        })
    }

    // Arithmetic over non-integer pairs: both operands must be numbers, any
    // other combination (including Null) yields Null.
    fn numeric_binop(&self, other: &Value, f: impl Fn(f64, f64) -> f64) -> Value {
        match (self.as_f64(), other.as_f64()) {
            (Some(a), Some(b)) => Value::Double(f(a, b)),
            _ => Value::Null,
        }
    }
}

/// Exact comparison of an i64 against an f64, without precision loss on
/// large magnitudes. NaN compares greater than every integer.
fn cmp_i64_f64(i: i64, f: f64) -> Ordering {
    if f.is_nan() {
        return Ordering::Less;
    }
    // i64::MAX as f64 rounds up to 2^63, so anything >= it exceeds all i64.
    if f >= i64::MAX as f64 {
        return Ordering::Less;
    }
    if f < i64::MIN as f64 {
        return Ordering::Greater;
    }
    let trunc = f.trunc();
    match i.cmp(&(trunc as i64)) {
        Ordering::Equal if f > trunc => Ordering::Less,
        Ordering::Equal if f < trunc => Ordering::Greater,
        ordering => ordering,
    }
}

/// Total order over f64 for sorting: NaNs compare equal to each other and
/// greater than everything else, including +inf.
fn cmp_f64(a: f64, b: f64) -> Ordering {
    match a.partial_cmp(&b) {
        Some(ordering) => ordering,
        None => match (a.is_nan(), b.is_nan()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => unreachable!(),
        },
    }
}

/// Structural equality by value. Doubles compare by bit pattern so that
/// expressions containing float literals can be matched structurally; SQL
/// comparison semantics go through the total order instead.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Double(a), Value::Double(b)) => a.to_bits() == b.to_bits(),
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Blob(a), Value::Blob(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Document(a), Value::Document(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        core::mem::discriminant(self).hash(state);
        match self {
            Value::Null => {}
            Value::Bool(b) => b.hash(state),
            Value::Integer(i) => i.hash(state),
            Value::Double(d) => d.to_bits().hash(state),
            Value::Text(s) => s.hash(state),
            Value::Blob(b) => b.hash(state),
            Value::Array(a) => a.hash(state),
            Value::Document(d) => d.hash(state),
        }
    }
}

impl PartialEq for Document {
    fn eq(&self, other: &Self) -> bool {
        self.sorted_fields() == other.sorted_fields()
    }
}

impl Eq for Document {}

// Hash sorted pairs for determinism, and so documents that differ only in
// field order hash identically.
impl Hash for Document {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for (name, value) in self.sorted_fields() {
            name.hash(state);
            value.hash(state);
        }
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Integer(a), Value::Integer(b)) => a.cmp(b),
            (Value::Double(a), Value::Double(b)) => cmp_f64(*a, *b),
            (Value::Integer(a), Value::Double(b)) => cmp_i64_f64(*a, *b),
            (Value::Double(a), Value::Integer(b)) => cmp_i64_f64(*b, *a).reverse(),
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            (Value::Blob(a), Value::Blob(b)) => a.cmp(b),
            (Value::Array(a), Value::Array(b)) => a.cmp(b),
            (Value::Document(a), Value::Document(b)) => a.cmp(b),
            _ => self.type_rank().cmp(&other.type_rank()),
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Document {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sorted_fields().cmp(&other.sorted_fields())
    }
}

impl PartialOrd for Document {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Double(d) => write!(f, "{}", d),
            Value::Text(s) => write!(f, "'{}'", s),
            Value::Blob(b) => write!(f, "x'{}'", hex::encode(b)),
            Value::Array(values) => {
                write!(f, "[")?;
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", value)?;
                }
                write!(f, "]")
            }
            Value::Document(doc) => write!(f, "{}", doc),
        }
    }
}

impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (name, value)) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {}", name, value)?;
        }
        write!(f, "}}")
    }
}

impl Document {
    pub fn new() -> Self {
        Document { fields: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value)
    }

    /// Sets a field, replacing an existing one in place or appending.
    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        match self.fields.iter_mut().find(|(field, _)| *field == name) {
            Some((_, slot)) => *slot = value,
            None => self.fields.push((name, value)),
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        let index = self.fields.iter().position(|(field, _)| field == name)?;
        Some(self.fields.remove(index).1)
    }

    /// Iterates fields in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Resolves a path against the document. Missing fields yield None.
    pub fn get_path(&self, path: &Path) -> Option<&Value> {
        let mut segments = path.segments().iter();
        let first = match segments.next()? {
            PathSegment::Field(name) => self.get(name)?,
            PathSegment::Index(_) => return None,
        };
        let mut current = first;
        for segment in segments {
            current = match (segment, current) {
                (PathSegment::Field(name), Value::Document(doc)) => doc.get(name)?,
                (PathSegment::Index(i), Value::Array(values)) => values.get(*i)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Sets the value at a path, creating intermediate documents for missing
    /// field segments. Array index segments must address existing elements.
    pub fn set_path(&mut self, path: &Path, value: Value) -> Result<()> {
        set_path_segments(self, path.segments(), value)
            .map_err(|_| Error::InvalidValue(format!("cannot set path {}", path)))
    }

    /// Removes the value at a path, if present.
    pub fn unset_path(&mut self, path: &Path) {
        let segments = path.segments();
        let Some((last, parents)) = segments.split_last() else {
            return;
        };
        if parents.is_empty() {
            if let PathSegment::Field(name) = last {
                self.remove(name);
            }
            return;
        }
        // Walk to the parent container and remove the final segment there.
        let mut current = match parents.first() {
            Some(PathSegment::Field(name)) => match self.get_mut(name) {
                Some(value) => value,
                None => return,
            },
            _ => return,
        };
        for segment in &parents[1..] {
            current = match (segment, current) {
                (PathSegment::Field(name), Value::Document(doc)) => match doc.get_mut(name) {
                    Some(value) => value,
                    None => return,
                },
                (PathSegment::Index(i), Value::Array(values)) => match values.get_mut(*i) {
                    Some(value) => value,
                    None => return,
                },
                _ => return,
            };
        }
        match (last, current) {
            (PathSegment::Field(name), Value::Document(doc)) => {
                doc.remove(name);
            }
            (PathSegment::Index(i), Value::Array(values)) => {
                if *i < values.len() {
                    values.remove(*i);
                }
            }
            _ => {}
        }
    }

    fn get_mut(&mut self, name: &str) -> Option<&mut Value> {
        self.fields
            .iter_mut()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value)
    }

    // The name-sorted view that equality, ordering and hashing compare.
    fn sorted_fields(&self) -> Vec<(&String, &Value)> {
        let mut pairs: Vec<_> = self
            .fields
            .iter()
            .map(|(name, value)| (name, value))
            .collect();
        pairs.sort_by(|a, b| a.0.cmp(b.0));
        pairs
    }
}

fn set_path_segments(doc: &mut Document, segments: &[PathSegment], value: Value) -> std::result::Result<(), ()> {
    match segments {
        [] => Err(()),
        [PathSegment::Field(name)] => {
            doc.set(name.clone(), value);
            Ok(())
        }
        [PathSegment::Index(_)] => Err(()),
        [PathSegment::Field(name), rest @ ..] => {
            if doc.get(name).is_none() {
                doc.set(name.clone(), Value::Document(Document::new()));
            }
            match doc.get_mut(name) {
                Some(child) => set_path_value(child, rest, value),
                None => Err(()),
            }
        }
        [PathSegment::Index(_), ..] => Err(()),
    }
}

fn set_path_value(current: &mut Value, segments: &[PathSegment], value: Value) -> std::result::Result<(), ()> {
    match segments {
        [] => {
            *current = value;
            Ok(())
        }
        [PathSegment::Field(name), rest @ ..] => match current {
            Value::Document(doc) => {
                if rest.is_empty() {
                    doc.set(name.clone(), value);
                    Ok(())
                } else {
                    if doc.get(name).is_none() {
                        doc.set(name.clone(), Value::Document(Document::new()));
                    }
                    set_path_value(doc.get_mut(name).ok_or(())?, rest, value)
                }
            }
            _ => Err(()),
        },
        [PathSegment::Index(i), rest @ ..] => match current {
            Value::Array(values) => {
                let slot = values.get_mut(*i).ok_or(())?;
                set_path_value(slot, rest, value)
            }
            _ => Err(()),
        },
    }
}

impl FromIterator<(String, Value)> for Document {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        Document {
            fields: iter.into_iter().collect(),
        }
    }
}

impl From<Vec<(String, Value)>> for Document {
    fn from(fields: Vec<(String, Value)>) -> Self {
        Document { fields }
    }
}
