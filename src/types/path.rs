//! Paths address sub-values inside a document.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A single step of a path: a field name or an array index.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PathSegment {
    Field(String),
    Index(usize),
}

/// A sequence of segments addressing a sub-value, e.g. `a.b[0]`.
/// Paths always have at least one segment.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Path(pub Vec<PathSegment>);

impl Path {
    /// A single top-level field path.
    pub fn field(name: impl Into<String>) -> Self {
        Path(vec![PathSegment::Field(name.into())])
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }

    /// The rendering of the final segment, used to name projected fields.
    pub fn leaf(&self) -> String {
        match self.0.last() {
            Some(PathSegment::Field(name)) => name.clone(),
            Some(PathSegment::Index(i)) => format!("[{}]", i),
            None => String::new(),
        }
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.0.iter().enumerate() {
            match segment {
                PathSegment::Field(name) if i == 0 => write!(f, "{}", name)?,
                PathSegment::Field(name) => write!(f, ".{}", name)?,
                PathSegment::Index(index) => write!(f, "[{}]", index)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display() {
        let path = Path(vec![
            PathSegment::Field("a".into()),
            PathSegment::Field("b".into()),
            PathSegment::Index(0),
        ]);
        assert_eq!(path.to_string(), "a.b[0]");
        assert_eq!(path.leaf(), "[0]");
        assert_eq!(Path::field("name").to_string(), "name");
    }
}
