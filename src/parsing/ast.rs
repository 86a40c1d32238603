//! The statement AST produced by the parser.
//!
//! The AST only reflects the syntactic structure of a statement; whether a
//! table exists or a projection is valid under GROUP BY is the planner's job.

use crate::types::expression::Expression;
use crate::types::path::Path;
use std::fmt;

/// A projection item: an expression with an optional alias.
pub type Projection = (Expression, Option<String>);

#[derive(Clone, Debug, PartialEq)]
pub enum Statement {
    Begin { read_only: bool },
    Commit,
    Rollback,

    Explain(Box<Statement>),

    CreateTable {
        name: String,
        if_not_exists: bool,
        primary_key: Option<Path>,
    },
    DropTable {
        name: String,
        if_exists: bool,
    },
    CreateIndex {
        name: String,
        table: String,
        path: Path,
        unique: bool,
        if_not_exists: bool,
    },
    DropIndex {
        name: String,
        if_exists: bool,
    },
    CreateSequence {
        name: String,
        if_not_exists: bool,
    },
    DropSequence {
        name: String,
        if_exists: bool,
    },

    Select(SelectStatement),
    Insert(InsertStatement),
    Update(UpdateStatement),
    Delete(DeleteStatement),
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SelectStatement {
    pub distinct: bool,
    pub projection: Vec<Projection>,
    pub from: Option<String>,
    pub r#where: Option<Expression>,
    pub group_by: Option<Expression>,
    pub order_by: Option<(Path, Direction)>,
    pub limit: Option<Expression>,
    pub offset: Option<Expression>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct InsertStatement {
    pub table: String,
    pub source: InsertSource,
    pub returning: Vec<Projection>,
}

/// The rows fed into an INSERT: either value expressions (each evaluating
/// to a document) or a nested SELECT.
#[derive(Clone, Debug, PartialEq)]
pub enum InsertSource {
    Values(Vec<Expression>),
    Select(Box<SelectStatement>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct UpdateStatement {
    pub table: String,
    pub set: Vec<(Path, Expression)>,
    pub unset: Vec<Path>,
    pub r#where: Option<Expression>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DeleteStatement {
    pub table: String,
    pub r#where: Option<Expression>,
    pub order_by: Option<(Path, Direction)>,
    pub limit: Option<Expression>,
    pub offset: Option<Expression>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Direction {
    #[default]
    Ascending,
    Descending,
}

impl Statement {
    /// Whether the statement performs no writes.
    pub fn is_read_only(&self) -> bool {
        match self {
            Statement::Select(_) | Statement::Explain(_) => true,
            Statement::Begin { .. } | Statement::Commit | Statement::Rollback => true,
            _ => false,
        }
    }
}

fn fmt_projections(f: &mut fmt::Formatter<'_>, projections: &[Projection]) -> fmt::Result {
    for (i, (expr, alias)) in projections.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", expr)?;
        if let Some(alias) = alias {
            write!(f, " AS {}", alias)?;
        }
    }
    Ok(())
}

fn fmt_tail(
    f: &mut fmt::Formatter<'_>,
    order_by: &Option<(Path, Direction)>,
    limit: &Option<Expression>,
    offset: &Option<Expression>,
) -> fmt::Result {
    if let Some((path, direction)) = order_by {
        write!(f, " ORDER BY {}", path)?;
        if *direction == Direction::Descending {
            write!(f, " DESC")?;
        }
    }
    if let Some(limit) = limit {
        write!(f, " LIMIT {}", limit)?;
    }
    if let Some(offset) = offset {
        write!(f, " OFFSET {}", offset)?;
    }
    Ok(())
}

impl fmt::Display for SelectStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SELECT ")?;
        if self.distinct {
            write!(f, "DISTINCT ")?;
        }
        fmt_projections(f, &self.projection)?;
        if let Some(from) = &self.from {
            write!(f, " FROM {}", from)?;
        }
        if let Some(filter) = &self.r#where {
            write!(f, " WHERE {}", filter)?;
        }
        if let Some(group_by) = &self.group_by {
            write!(f, " GROUP BY {}", group_by)?;
        }
        fmt_tail(f, &self.order_by, &self.limit, &self.offset)
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Statement::Begin { read_only: false } => write!(f, "BEGIN"),
            Statement::Begin { read_only: true } => write!(f, "BEGIN READ ONLY"),
            Statement::Commit => write!(f, "COMMIT"),
            Statement::Rollback => write!(f, "ROLLBACK"),

            Statement::Explain(inner) => write!(f, "EXPLAIN {}", inner),

            Statement::CreateTable {
                name,
                if_not_exists,
                primary_key,
            } => {
                write!(f, "CREATE TABLE ")?;
                if *if_not_exists {
                    write!(f, "IF NOT EXISTS ")?;
                }
                write!(f, "{}", name)?;
                if let Some(path) = primary_key {
                    write!(f, " ({} PRIMARY KEY)", path)?;
                }
                Ok(())
            }
            Statement::DropTable { name, if_exists } => {
                write!(f, "DROP TABLE ")?;
                if *if_exists {
                    write!(f, "IF EXISTS ")?;
                }
                write!(f, "{}", name)
            }
            Statement::CreateIndex {
                name,
                table,
                path,
                unique,
                if_not_exists,
            } => {
                write!(f, "CREATE ")?;
                if *unique {
                    write!(f, "UNIQUE ")?;
                }
                write!(f, "INDEX ")?;
                if *if_not_exists {
                    write!(f, "IF NOT EXISTS ")?;
                }
                write!(f, "{} ON {} ({})", name, table, path)
            }
            Statement::DropIndex { name, if_exists } => {
                write!(f, "DROP INDEX ")?;
                if *if_exists {
                    write!(f, "IF EXISTS ")?;
                }
                write!(f, "{}", name)
            }
            Statement::CreateSequence {
                name,
                if_not_exists,
            } => {
                write!(f, "CREATE SEQUENCE ")?;
                if *if_not_exists {
                    write!(f, "IF NOT EXISTS ")?;
                }
                write!(f, "{}", name)
            }
            Statement::DropSequence { name, if_exists } => {
                write!(f, "DROP SEQUENCE ")?;
                if *if_exists {
                    write!(f, "IF EXISTS ")?;
                }
                write!(f, "{}", name)
            }

            Statement::Select(select) => write!(f, "{}", select),

            Statement::Insert(insert) => {
                write!(f, "INSERT INTO {} ", insert.table)?;
                match &insert.source {
                    InsertSource::Values(values) => {
                        write!(f, "VALUES ")?;
                        for (i, value) in values.iter().enumerate() {
                            if i > 0 {
                                write!(f, ", ")?;
                            }
                            write!(f, "{}", value)?;
                        }
                    }
                    InsertSource::Select(select) => write!(f, "{}", select)?,
                }
                if !insert.returning.is_empty() {
                    write!(f, " RETURNING ")?;
                    fmt_projections(f, &insert.returning)?;
                }
                Ok(())
            }

            Statement::Update(update) => {
                write!(f, "UPDATE {}", update.table)?;
                if !update.set.is_empty() {
                    write!(f, " SET ")?;
                    for (i, (path, expr)) in update.set.iter().enumerate() {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{} = {}", path, expr)?;
                    }
                }
                if !update.unset.is_empty() {
                    write!(f, " UNSET ")?;
                    for (i, path) in update.unset.iter().enumerate() {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{}", path)?;
                    }
                }
                if let Some(filter) = &update.r#where {
                    write!(f, " WHERE {}", filter)?;
                }
                Ok(())
            }

            Statement::Delete(delete) => {
                write!(f, "DELETE FROM {}", delete.table)?;
                if let Some(filter) = &delete.r#where {
                    write!(f, " WHERE {}", filter)?;
                }
                fmt_tail(f, &delete.order_by, &delete.limit, &delete.offset)
            }
        }
    }
}
