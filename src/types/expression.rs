//! SQL expressions, e.g. `a + 7 > b`. Can be nested.

use crate::types::path::Path;
use crate::types::value::Value;
use std::fmt;

/// An expression node. Expressions form a closed sum and are pure values:
/// built once at compile time and reusable across executions.
#[derive(Clone, Debug, PartialEq)]
pub enum Expression {
    /// A literal value.
    Literal(Value),
    /// A document path, resolved against the current document.
    Path(Path),
    /// A bound parameter, `?` or `$name`.
    Parameter(Parameter),
    /// An operator over sub-expressions.
    Operator(Operator),
    /// A scalar function call.
    Function(String, Vec<Expression>),
    /// An aggregate function; reduces a sequence of values to one,
    /// per group when grouping is in effect.
    Aggregate(Aggregate),
    /// A document constructor: field names paired with value expressions.
    KVPairs(Vec<(String, Expression)>),
    /// All fields of the current document, i.e. `*`.
    Wildcard,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Parameter {
    Positional(usize),
    Named(String),
}

/// Expression operators. Children are boxed since the structure is
/// recursive.
#[derive(Clone, Debug, PartialEq)]
pub enum Operator {
    And(Box<Expression>, Box<Expression>),
    Or(Box<Expression>, Box<Expression>),
    Not(Box<Expression>),

    Equal(Box<Expression>, Box<Expression>),
    NotEqual(Box<Expression>, Box<Expression>),
    GreaterThan(Box<Expression>, Box<Expression>),
    GreaterThanOrEqual(Box<Expression>, Box<Expression>),
    LessThan(Box<Expression>, Box<Expression>),
    LessThanOrEqual(Box<Expression>, Box<Expression>),

    Add(Box<Expression>, Box<Expression>),
    Subtract(Box<Expression>, Box<Expression>),
    Multiply(Box<Expression>, Box<Expression>),
    Divide(Box<Expression>, Box<Expression>),
    Remainder(Box<Expression>, Box<Expression>),

    Negate(Box<Expression>),
    Identity(Box<Expression>),
}

/// Aggregate functions. `Count(None)` is `COUNT(*)`.
#[derive(Clone, Debug, PartialEq)]
pub enum Aggregate {
    Count(Option<Box<Expression>>),
    Sum(Box<Expression>),
    Avg(Box<Expression>),
    Min(Box<Expression>),
    Max(Box<Expression>),
}

impl From<Operator> for Expression {
    fn from(operator: Operator) -> Self {
        Expression::Operator(operator)
    }
}

impl From<Value> for Expression {
    fn from(value: Value) -> Self {
        Expression::Literal(value)
    }
}

impl Expression {
    /// Walks the expression tree in pre-order, calling a closure for every
    /// node. Halts and returns false if the closure returns false.
    pub fn walk(&self, visitor: &mut impl FnMut(&Expression) -> bool) -> bool {
        use Operator::*;

        if !visitor(self) {
            return false;
        }

        match self {
            Self::Operator(op) => match op {
                And(lhs, rhs)
                | Or(lhs, rhs)
                | Equal(lhs, rhs)
                | NotEqual(lhs, rhs)
                | GreaterThan(lhs, rhs)
                | GreaterThanOrEqual(lhs, rhs)
                | LessThan(lhs, rhs)
                | LessThanOrEqual(lhs, rhs)
                | Add(lhs, rhs)
                | Subtract(lhs, rhs)
                | Multiply(lhs, rhs)
                | Divide(lhs, rhs)
                | Remainder(lhs, rhs) => lhs.walk(visitor) && rhs.walk(visitor),

                Not(expr) | Negate(expr) | Identity(expr) => expr.walk(visitor),
            },

            Self::Function(_, args) => args.iter().all(|arg| arg.walk(visitor)),

            Self::Aggregate(agg) => match agg {
                Aggregate::Count(None) => true,
                Aggregate::Count(Some(expr))
                | Aggregate::Sum(expr)
                | Aggregate::Avg(expr)
                | Aggregate::Min(expr)
                | Aggregate::Max(expr) => expr.walk(visitor),
            },

            Self::KVPairs(pairs) => pairs.iter().all(|(_, expr)| expr.walk(visitor)),

            Self::Literal(_) | Self::Path(_) | Self::Parameter(_) | Self::Wildcard => true,
        }
    }

    /// Whether the tree contains an aggregate anywhere.
    pub fn contains_aggregate(&self) -> bool {
        !self.walk(&mut |expr| !matches!(expr, Expression::Aggregate(_)))
    }

    // Precedence for display parenthesization, mirroring the parser's
    // operator table.
    fn precedence(&self) -> u8 {
        match self {
            Expression::Operator(op) => match op {
                Operator::Or(..) => 1,
                Operator::And(..) => 2,
                Operator::Not(..) => 3,
                Operator::Equal(..) | Operator::NotEqual(..) => 4,
                Operator::GreaterThan(..)
                | Operator::GreaterThanOrEqual(..)
                | Operator::LessThan(..)
                | Operator::LessThanOrEqual(..) => 5,
                Operator::Add(..) | Operator::Subtract(..) => 6,
                Operator::Multiply(..) | Operator::Divide(..) | Operator::Remainder(..) => 7,
                Operator::Negate(..) | Operator::Identity(..) => 10,
            },
            _ => u8::MAX,
        }
    }
}

// Renders a child operand, parenthesizing when its precedence would not
// survive a reparse. `min` is the parent's precedence, bumped by one for
// right operands of left-associative operators.
fn fmt_operand(f: &mut fmt::Formatter<'_>, expr: &Expression, min: u8) -> fmt::Result {
    if expr.precedence() < min {
        write!(f, "({})", expr)
    } else {
        write!(f, "{}", expr)
    }
}

fn fmt_binary(
    f: &mut fmt::Formatter<'_>,
    lhs: &Expression,
    op: &str,
    rhs: &Expression,
    prec: u8,
) -> fmt::Result {
    fmt_operand(f, lhs, prec)?;
    write!(f, " {} ", op)?;
    fmt_operand(f, rhs, prec + 1)
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Literal(value) => write!(f, "{}", value),
            Expression::Path(path) => write!(f, "{}", path),
            Expression::Parameter(Parameter::Positional(_)) => write!(f, "?"),
            Expression::Parameter(Parameter::Named(name)) => write!(f, "${}", name),
            Expression::Operator(op) => {
                let prec = self.precedence();
                use Operator::*;
                match op {
                    And(lhs, rhs) => fmt_binary(f, lhs, "AND", rhs, prec),
                    Or(lhs, rhs) => fmt_binary(f, lhs, "OR", rhs, prec),
                    Not(expr) => {
                        write!(f, "NOT ")?;
                        fmt_operand(f, expr, prec)
                    }
                    Equal(lhs, rhs) => fmt_binary(f, lhs, "=", rhs, prec),
                    NotEqual(lhs, rhs) => fmt_binary(f, lhs, "!=", rhs, prec),
                    GreaterThan(lhs, rhs) => fmt_binary(f, lhs, ">", rhs, prec),
                    GreaterThanOrEqual(lhs, rhs) => fmt_binary(f, lhs, ">=", rhs, prec),
                    LessThan(lhs, rhs) => fmt_binary(f, lhs, "<", rhs, prec),
                    LessThanOrEqual(lhs, rhs) => fmt_binary(f, lhs, "<=", rhs, prec),
                    Add(lhs, rhs) => fmt_binary(f, lhs, "+", rhs, prec),
                    Subtract(lhs, rhs) => fmt_binary(f, lhs, "-", rhs, prec),
                    Multiply(lhs, rhs) => fmt_binary(f, lhs, "*", rhs, prec),
                    Divide(lhs, rhs) => fmt_binary(f, lhs, "/", rhs, prec),
                    Remainder(lhs, rhs) => fmt_binary(f, lhs, "%", rhs, prec),
                    Negate(expr) => {
                        write!(f, "-")?;
                        fmt_operand(f, expr, prec)
                    }
                    Identity(expr) => {
                        write!(f, "+")?;
                        fmt_operand(f, expr, prec)
                    }
                }
            }
            Expression::Function(name, args) => {
                write!(f, "{}(", name)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                write!(f, ")")
            }
            Expression::Aggregate(agg) => write!(f, "{}", agg),
            Expression::KVPairs(pairs) => {
                write!(f, "{{")?;
                for (i, (name, expr)) in pairs.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", name, expr)?;
                }
                write!(f, "}}")
            }
            Expression::Wildcard => write!(f, "*"),
        }
    }
}

impl fmt::Display for Aggregate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Aggregate::Count(None) => write!(f, "COUNT(*)"),
            Aggregate::Count(Some(expr)) => write!(f, "COUNT({})", expr),
            Aggregate::Sum(expr) => write!(f, "SUM({})", expr),
            Aggregate::Avg(expr) => write!(f, "AVG({})", expr),
            Aggregate::Min(expr) => write!(f, "MIN({})", expr),
            Aggregate::Max(expr) => write!(f, "MAX({})", expr),
        }
    }
}
