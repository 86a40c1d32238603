//! The SQL parser takes tokens from the lexer and parses the SQL syntax into
//! an Abstract Syntax Tree (AST).
//!
//! The AST represents the syntactic structure of a SQL query (the SELECT and
//! FROM clauses, values, arithmetic expressions, etc.). It only ensures the
//! syntax is well-formed; whether a table exists or a projection is legal
//! under GROUP BY is the planner's job.

use std::iter::Peekable;
use std::ops::Add;

use super::ast::{
    DeleteStatement, Direction, InsertSource, InsertStatement, Projection, SelectStatement,
    Statement, UpdateStatement,
};
use super::lexer::{Keyword, Lexer, Position, Token};
use crate::error::{Error, Result};
use crate::types::expression::{Aggregate, Expression, Operator, Parameter};
use crate::types::path::{Path, PathSegment};
use crate::types::value::Value;

pub struct Parser<'a> {
    lexer: Peekable<Lexer<'a>>,
    /// Position of the most recently consumed token, for end-of-input errors.
    position: Position,
    /// Counter assigning indices to positional `?` placeholders.
    param_count: usize,
}

impl Parser<'_> {
    /// Parses the input string into a single statement, ending with an
    /// optional semicolon.
    pub fn parse(statement: &str) -> Result<Statement> {
        let mut parser = Self::new(statement);
        let statement = parser.parse_statement()?;
        parser.skip(Token::Semicolon);
        if let Some((token, pos)) = parser.lexer.next().transpose()? {
            return Err(parse_error(token.to_string(), &["end of statement"], pos));
        }
        Ok(statement)
    }

    /// Parses the input string as a single expression. Only used in tests.
    #[cfg(test)]
    pub fn parse_expr(expr: &str) -> Result<Expression> {
        let mut parser = Self::new(expr);
        let expression = parser.parse_expression()?;
        if let Some((token, pos)) = parser.lexer.next().transpose()? {
            return Err(parse_error(token.to_string(), &["end of expression"], pos));
        }
        Ok(expression)
    }

    fn new(input: &str) -> Parser<'_> {
        Parser {
            lexer: Lexer::new(input).peekable(),
            position: Position { line: 1, column: 1 },
            param_count: 0,
        }
    }

    /// Fetches the next token, or errors with the given expected set.
    fn next_expecting(&mut self, expected: &[&str]) -> Result<(Token, Position)> {
        match self.lexer.next().transpose()? {
            Some((token, pos)) => {
                self.position = pos;
                Ok((token, pos))
            }
            None => Err(parse_error("end of input".into(), expected, self.position)),
        }
    }

    fn next(&mut self) -> Result<(Token, Position)> {
        self.next_expecting(&["token"])
    }

    /// Returns the next identifier, or errors.
    fn next_ident(&mut self) -> Result<String> {
        match self.next_expecting(&["identifier"])? {
            (Token::Ident(ident), _) => Ok(ident),
            (token, pos) => Err(parse_error(token.to_string(), &["identifier"], pos)),
        }
    }

    /// Peeks the next token, if any.
    fn peek(&mut self) -> Result<Option<&Token>> {
        match self.lexer.peek() {
            Some(Ok((token, _))) => Ok(Some(token)),
            Some(Err(err)) => Err(err.clone()),
            None => Ok(None),
        }
    }

    /// Consumes and returns the next token if the predicate holds.
    fn next_if(&mut self, predicate: impl Fn(&Token) -> bool) -> Option<Token> {
        match self.peek() {
            Ok(Some(token)) if predicate(token) => self.next().ok().map(|(token, _)| token),
            _ => None,
        }
    }

    /// Passes the next token through the closure, consuming it if the closure
    /// returns Some.
    fn next_if_map<T>(&mut self, f: impl Fn(&Token) -> Option<T>) -> Option<T> {
        let value = match self.peek() {
            Ok(Some(token)) => f(token),
            _ => None,
        }?;
        let _ = self.next();
        Some(value)
    }

    /// Consumes the next token if it is the given token, returning true.
    fn next_is(&mut self, token: Token) -> bool {
        self.next_if(|t| t == &token).is_some()
    }

    /// Consumes the next token if it's the expected one, or errors.
    fn expect(&mut self, expect: Token) -> Result<()> {
        let display = expect.to_string();
        let (token, pos) = self.next_expecting(&[display.as_str()])?;
        if token != expect {
            return Err(parse_error(token.to_string(), &[display.as_str()], pos));
        }
        Ok(())
    }

    /// Consumes the next token if it is the given token. Equivalent to
    /// next_is(), but expresses intent better.
    fn skip(&mut self, token: Token) {
        self.next_is(token);
    }

    /// Consumes the next token and fails with the given expected set.
    fn unexpected<T>(&mut self, expected: &[&str]) -> Result<T> {
        let (token, pos) = self.next_expecting(expected)?;
        Err(parse_error(token.to_string(), expected, pos))
    }

    /// Parses a SQL statement, dispatching on the leading keyword.
    fn parse_statement(&mut self) -> Result<Statement> {
        match self.peek()? {
            Some(Token::Keyword(Keyword::Select)) => self.parse_select().map(Statement::Select),
            Some(Token::Keyword(Keyword::Insert)) => self.parse_insert(),
            Some(Token::Keyword(Keyword::Update)) => self.parse_update(),
            Some(Token::Keyword(Keyword::Delete)) => self.parse_delete(),
            Some(Token::Keyword(Keyword::Create)) => self.parse_create(),
            Some(Token::Keyword(Keyword::Drop)) => self.parse_drop(),
            Some(Token::Keyword(Keyword::Begin)) => self.parse_begin(),
            Some(Token::Keyword(Keyword::Commit)) => {
                self.next()?;
                Ok(Statement::Commit)
            }
            Some(Token::Keyword(Keyword::Rollback)) => {
                self.next()?;
                Ok(Statement::Rollback)
            }
            Some(Token::Keyword(Keyword::Explain)) => self.parse_explain(),
            _ => self.unexpected(&[
                "SELECT", "INSERT", "UPDATE", "DELETE", "CREATE", "DROP", "BEGIN", "COMMIT",
                "ROLLBACK", "EXPLAIN",
            ]),
        }
    }

    fn parse_explain(&mut self) -> Result<Statement> {
        self.expect(Keyword::Explain.into())?;
        if matches!(self.peek()?, Some(Token::Keyword(Keyword::Explain))) {
            return self.unexpected(&["statement"]);
        }
        Ok(Statement::Explain(Box::new(self.parse_statement()?)))
    }

    fn parse_begin(&mut self) -> Result<Statement> {
        self.expect(Keyword::Begin.into())?;
        let mut read_only = false;
        if self.next_is(Keyword::Read.into()) {
            self.expect(Keyword::Only.into())?;
            read_only = true;
        }
        Ok(Statement::Begin { read_only })
    }

    /// Parses a CREATE statement (TABLE, INDEX or SEQUENCE).
    fn parse_create(&mut self) -> Result<Statement> {
        self.expect(Keyword::Create.into())?;
        match self.peek()? {
            Some(Token::Keyword(Keyword::Table)) => self.parse_create_table(),
            Some(Token::Keyword(Keyword::Unique)) => {
                self.next()?;
                self.expect(Keyword::Index.into())?;
                self.parse_create_index(true)
            }
            Some(Token::Keyword(Keyword::Index)) => {
                self.next()?;
                self.parse_create_index(false)
            }
            Some(Token::Keyword(Keyword::Sequence)) => self.parse_create_sequence(),
            _ => self.unexpected(&["TABLE", "INDEX", "SEQUENCE", "UNIQUE"]),
        }
    }

    fn parse_create_table(&mut self) -> Result<Statement> {
        self.expect(Keyword::Table.into())?;
        let if_not_exists = self.parse_if_not_exists()?;
        let name = self.next_ident()?;

        // Optional primary key clause: (path PRIMARY KEY).
        let mut primary_key = None;
        if self.next_is(Token::OpenParen) {
            let path = self.parse_path()?;
            self.expect(Keyword::Primary.into())?;
            self.expect(Keyword::Key.into())?;
            self.expect(Token::CloseParen)?;
            primary_key = Some(path);
        }

        Ok(Statement::CreateTable {
            name,
            if_not_exists,
            primary_key,
        })
    }

    fn parse_create_index(&mut self, unique: bool) -> Result<Statement> {
        let if_not_exists = self.parse_if_not_exists()?;
        let name = self.next_ident()?;
        self.expect(Keyword::On.into())?;
        let table = self.next_ident()?;
        self.expect(Token::OpenParen)?;
        let path = self.parse_path()?;
        self.expect(Token::CloseParen)?;
        Ok(Statement::CreateIndex {
            name,
            table,
            path,
            unique,
            if_not_exists,
        })
    }

    fn parse_create_sequence(&mut self) -> Result<Statement> {
        self.expect(Keyword::Sequence.into())?;
        let if_not_exists = self.parse_if_not_exists()?;
        let name = self.next_ident()?;
        Ok(Statement::CreateSequence {
            name,
            if_not_exists,
        })
    }

    fn parse_if_not_exists(&mut self) -> Result<bool> {
        if self.next_is(Keyword::If.into()) {
            self.expect(Keyword::Not.into())?;
            self.expect(Keyword::Exists.into())?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Parses a DROP statement (TABLE, INDEX or SEQUENCE).
    fn parse_drop(&mut self) -> Result<Statement> {
        self.expect(Keyword::Drop.into())?;
        let kind = match self.peek()? {
            Some(Token::Keyword(kind @ (Keyword::Table | Keyword::Index | Keyword::Sequence))) => {
                *kind
            }
            _ => return self.unexpected(&["TABLE", "INDEX", "SEQUENCE"]),
        };
        self.next()?;
        let if_exists = if self.next_is(Keyword::If.into()) {
            self.expect(Keyword::Exists.into())?;
            true
        } else {
            false
        };
        let name = self.next_ident()?;
        Ok(match kind {
            Keyword::Table => Statement::DropTable { name, if_exists },
            Keyword::Index => Statement::DropIndex { name, if_exists },
            Keyword::Sequence => Statement::DropSequence { name, if_exists },
            _ => unreachable!(),
        })
    }

    /// Parses a SELECT statement.
    fn parse_select(&mut self) -> Result<SelectStatement> {
        self.expect(Keyword::Select.into())?;
        let distinct = self.next_is(Keyword::Distinct.into());
        let projection = self.parse_projections()?;
        let from = if self.next_is(Keyword::From.into()) {
            Some(self.next_ident()?)
        } else {
            None
        };
        Ok(SelectStatement {
            distinct,
            projection,
            from,
            r#where: self.parse_where_clause()?,
            group_by: self.parse_group_by_clause()?,
            order_by: self.parse_order_by_clause()?,
            limit: self.parse_limit_clause()?,
            offset: self.parse_offset_clause()?,
        })
    }

    /// Parses a projection list: expressions with optional AS aliases.
    fn parse_projections(&mut self) -> Result<Vec<Projection>> {
        let mut projections = Vec::new();
        loop {
            let expr = self.parse_expression()?;
            let mut alias = None;
            if self.next_is(Keyword::As.into()) {
                if expr == Expression::Wildcard {
                    return self.unexpected(&["projection without alias"]);
                }
                alias = Some(self.next_ident()?);
            }
            projections.push((expr, alias));
            if !self.next_is(Token::Comma) {
                break;
            }
        }
        Ok(projections)
    }

    fn parse_where_clause(&mut self) -> Result<Option<Expression>> {
        if !self.next_is(Keyword::Where.into()) {
            return Ok(None);
        }
        Ok(Some(self.parse_expression()?))
    }

    fn parse_group_by_clause(&mut self) -> Result<Option<Expression>> {
        if !self.next_is(Keyword::Group.into()) {
            return Ok(None);
        }
        self.expect(Keyword::By.into())?;
        Ok(Some(self.parse_expression()?))
    }

    fn parse_order_by_clause(&mut self) -> Result<Option<(Path, Direction)>> {
        if !self.next_is(Keyword::Order.into()) {
            return Ok(None);
        }
        self.expect(Keyword::By.into())?;
        let path = self.parse_path()?;
        let direction = self
            .next_if_map(|token| match token {
                Token::Keyword(Keyword::Asc) => Some(Direction::Ascending),
                Token::Keyword(Keyword::Desc) => Some(Direction::Descending),
                _ => None,
            })
            .unwrap_or_default();
        Ok(Some((path, direction)))
    }

    fn parse_limit_clause(&mut self) -> Result<Option<Expression>> {
        if !self.next_is(Keyword::Limit.into()) {
            return Ok(None);
        }
        Ok(Some(self.parse_expression()?))
    }

    fn parse_offset_clause(&mut self) -> Result<Option<Expression>> {
        if !self.next_is(Keyword::Offset.into()) {
            return Ok(None);
        }
        Ok(Some(self.parse_expression()?))
    }

    /// Parses an INSERT statement.
    fn parse_insert(&mut self) -> Result<Statement> {
        self.expect(Keyword::Insert.into())?;
        self.expect(Keyword::Into.into())?;
        let table = self.next_ident()?;

        // Optional field list: (a, b, c).
        let mut fields = None;
        if self.next_is(Token::OpenParen) {
            let fields = fields.insert(Vec::new());
            loop {
                fields.push(self.next_ident()?);
                if !self.next_is(Token::Comma) {
                    break;
                }
            }
            self.expect(Token::CloseParen)?;
        }

        let source = if self.next_is(Keyword::Values.into()) {
            let values = match &fields {
                Some(fields) => self.parse_values_with_fields(fields)?,
                None => self.parse_document_values()?,
            };
            InsertSource::Values(values)
        } else if matches!(self.peek()?, Some(Token::Keyword(Keyword::Select))) {
            InsertSource::Select(Box::new(self.parse_select()?))
        } else {
            return self.unexpected(&["VALUES", "SELECT"]);
        };

        let returning = if self.next_is(Keyword::Returning.into()) {
            self.parse_projections()?
        } else {
            Vec::new()
        };

        Ok(Statement::Insert(InsertStatement {
            table,
            source,
            returning,
        }))
    }

    /// Parses VALUES tuples for a field list: each tuple's expressions pair
    /// up with the fields into a document constructor. Arity must match.
    fn parse_values_with_fields(&mut self, fields: &[String]) -> Result<Vec<Expression>> {
        let mut docs = Vec::new();
        loop {
            self.expect(Token::OpenParen)?;
            let mut exprs = Vec::new();
            loop {
                exprs.push(self.parse_expression()?);
                if !self.next_is(Token::Comma) {
                    break;
                }
            }
            self.expect(Token::CloseParen)?;
            if exprs.len() != fields.len() {
                return Err(Error::ValuesFieldsMismatch {
                    count: exprs.len(),
                    fields: fields.len(),
                });
            }
            docs.push(Expression::KVPairs(
                fields.iter().cloned().zip(exprs).collect(),
            ));
            if !self.next_is(Token::Comma) {
                break;
            }
        }
        Ok(docs)
    }

    /// Parses whole-document VALUES: document literals or parameters.
    fn parse_document_values(&mut self) -> Result<Vec<Expression>> {
        let mut docs = Vec::new();
        loop {
            let doc = match self.peek()? {
                Some(Token::OpenBrace) => {
                    self.next()?;
                    self.parse_document_literal()?
                }
                Some(Token::Question) => {
                    self.next()?;
                    let index = self.param_count;
                    self.param_count += 1;
                    Expression::Parameter(Parameter::Positional(index))
                }
                Some(Token::NamedParam(_)) => match self.next()? {
                    (Token::NamedParam(name), _) => {
                        Expression::Parameter(Parameter::Named(name))
                    }
                    _ => unreachable!(),
                },
                _ => return self.unexpected(&["document", "parameter"]),
            };
            docs.push(doc);
            if !self.next_is(Token::Comma) {
                break;
            }
        }
        Ok(docs)
    }

    /// Parses an UPDATE statement: SET assignments or UNSET paths.
    fn parse_update(&mut self) -> Result<Statement> {
        self.expect(Keyword::Update.into())?;
        let table = self.next_ident()?;

        let mut set = Vec::new();
        let mut unset = Vec::new();
        if self.next_is(Keyword::Set.into()) {
            loop {
                let path = self.parse_path()?;
                self.expect(Token::Equal)?;
                set.push((path, self.parse_expression()?));
                if !self.next_is(Token::Comma) {
                    break;
                }
            }
        } else if self.next_is(Keyword::Unset.into()) {
            loop {
                unset.push(self.parse_path()?);
                if !self.next_is(Token::Comma) {
                    break;
                }
            }
        } else {
            return self.unexpected(&["SET", "UNSET"]);
        }

        Ok(Statement::Update(UpdateStatement {
            table,
            set,
            unset,
            r#where: self.parse_where_clause()?,
        }))
    }

    /// Parses a DELETE statement.
    fn parse_delete(&mut self) -> Result<Statement> {
        self.expect(Keyword::Delete.into())?;
        self.expect(Keyword::From.into())?;
        let table = self.next_ident()?;
        Ok(Statement::Delete(DeleteStatement {
            table,
            r#where: self.parse_where_clause()?,
            order_by: self.parse_order_by_clause()?,
            limit: self.parse_limit_clause()?,
            offset: self.parse_offset_clause()?,
        }))
    }

    /// Parses a document path: ident(.ident | [index])*.
    fn parse_path(&mut self) -> Result<Path> {
        let first = self.next_ident()?;
        self.parse_path_from(first)
    }

    fn parse_path_from(&mut self, first: String) -> Result<Path> {
        let mut segments = vec![PathSegment::Field(first)];
        loop {
            if self.next_is(Token::Period) {
                segments.push(PathSegment::Field(self.next_ident()?));
            } else if self.next_is(Token::OpenBracket) {
                let (token, pos) = self.next_expecting(&["array index"])?;
                let index = match &token {
                    Token::Number(n) => n.parse::<usize>().ok(),
                    _ => None,
                };
                let index = index
                    .ok_or_else(|| parse_error(token.to_string(), &["array index"], pos))?;
                self.expect(Token::CloseBracket)?;
                segments.push(PathSegment::Index(index));
            } else {
                return Ok(Path(segments));
            }
        }
    }

    /// Parses an expression using the precedence climbing algorithm, like the
    /// rest of the family: parse any prefix operators and an atom, then
    /// greedily consume infix operators whose precedence is at least
    /// min_precedence, recursing into right-hand sides at higher precedence.
    fn parse_expression(&mut self) -> Result<Expression> {
        self.parse_expression_at(0)
    }

    fn parse_expression_at(&mut self, min_precedence: Precedence) -> Result<Expression> {
        let mut lhs = if let Some(prefix) = self.parse_prefix_operator_at(min_precedence) {
            let next_precedence = prefix.precedence() + prefix.associativity();
            let rhs = self.parse_expression_at(next_precedence)?;
            prefix.into_expression(rhs)
        } else {
            self.parse_expression_atom()?
        };

        while let Some(infix) = self.parse_infix_operator_at(min_precedence) {
            let next_precedence = infix.precedence() + infix.associativity();
            let rhs = self.parse_expression_at(next_precedence)?;
            lhs = infix.into_expression(lhs, rhs);
        }

        Ok(lhs)
    }

    /// Parses an expression atom: a literal, a path, a parameter, a function
    /// call, a document or array constructor, or a parenthesized expression.
    fn parse_expression_atom(&mut self) -> Result<Expression> {
        Ok(match self.next_expecting(&["expression"])? {
            (Token::Asterisk, _) => Expression::Wildcard,

            (Token::Number(n), pos) => {
                let integral = n.chars().all(|c| c.is_ascii_digit());
                if integral {
                    match n.parse::<i64>() {
                        Ok(i) => Value::Integer(i).into(),
                        // Magnitudes beyond i64 fall back to Double.
                        Err(_) => Value::Double(
                            n.parse()
                                .map_err(|_| parse_error(n.clone(), &["number"], pos))?,
                        )
                        .into(),
                    }
                } else {
                    Value::Double(
                        n.parse()
                            .map_err(|_| parse_error(n.clone(), &["number"], pos))?,
                    )
                    .into()
                }
            }
            (Token::String(s), _) => Value::Text(s).into(),
            (Token::HexString(h), pos) => Value::Blob(
                hex::decode(&h).map_err(|_| parse_error(h.clone(), &["hex string"], pos))?,
            )
            .into(),
            (Token::Keyword(Keyword::True), _) => Value::Bool(true).into(),
            (Token::Keyword(Keyword::False), _) => Value::Bool(false).into(),
            (Token::Keyword(Keyword::Null), _) => Value::Null.into(),

            (Token::OpenBrace, _) => self.parse_document_literal()?,

            (Token::OpenBracket, _) => {
                let mut exprs = Vec::new();
                if !self.next_is(Token::CloseBracket) {
                    loop {
                        exprs.push(self.parse_expression()?);
                        if !self.next_is(Token::Comma) {
                            break;
                        }
                    }
                    self.expect(Token::CloseBracket)?;
                }
                fold_array_literal(exprs)?
            }

            (Token::Question, _) => {
                let index = self.param_count;
                self.param_count += 1;
                Expression::Parameter(Parameter::Positional(index))
            }
            (Token::NamedParam(name), _) => Expression::Parameter(Parameter::Named(name)),

            (Token::Ident(name), _) => {
                if self.next_is(Token::OpenParen) {
                    self.parse_function(name)?
                } else {
                    Expression::Path(self.parse_path_from(name)?)
                }
            }

            (Token::OpenParen, _) => {
                let expr = self.parse_expression()?;
                self.expect(Token::CloseParen)?;
                expr
            }

            (token, pos) => return Err(parse_error(token.to_string(), &["expression"], pos)),
        })
    }

    /// Parses a document literal after the opening brace.
    fn parse_document_literal(&mut self) -> Result<Expression> {
        let mut pairs = Vec::new();
        if !self.next_is(Token::CloseBrace) {
            loop {
                let key = match self.next_expecting(&["field name"])? {
                    (Token::Ident(ident), _) => ident,
                    (Token::String(s), _) => s,
                    (token, pos) => {
                        return Err(parse_error(token.to_string(), &["field name"], pos));
                    }
                };
                self.expect(Token::Colon)?;
                pairs.push((key, self.parse_expression()?));
                if !self.next_is(Token::Comma) {
                    break;
                }
            }
            self.expect(Token::CloseBrace)?;
        }
        Ok(Expression::KVPairs(pairs))
    }

    /// Parses a function call after the opening paren. Aggregate functions
    /// are recognized by name; COUNT additionally accepts `*`.
    fn parse_function(&mut self, name: String) -> Result<Expression> {
        if name.to_uppercase() == "COUNT" && self.next_is(Token::Asterisk) {
            self.expect(Token::CloseParen)?;
            return Ok(Expression::Aggregate(Aggregate::Count(None)));
        }

        let mut args = Vec::new();
        if !self.next_is(Token::CloseParen) {
            loop {
                args.push(self.parse_expression()?);
                if !self.next_is(Token::Comma) {
                    break;
                }
            }
            self.expect(Token::CloseParen)?;
        }

        let aggregate = |args: &mut Vec<Expression>| -> Result<Box<Expression>> {
            if args.len() != 1 {
                return Err(Error::InvalidValue(format!(
                    "{}() takes a single argument",
                    name.to_uppercase()
                )));
            }
            Ok(Box::new(args.remove(0)))
        };

        Ok(match name.to_uppercase().as_str() {
            "COUNT" => Expression::Aggregate(Aggregate::Count(Some(aggregate(&mut args)?))),
            "SUM" => Expression::Aggregate(Aggregate::Sum(aggregate(&mut args)?)),
            "AVG" => Expression::Aggregate(Aggregate::Avg(aggregate(&mut args)?)),
            "MIN" => Expression::Aggregate(Aggregate::Min(aggregate(&mut args)?)),
            "MAX" => Expression::Aggregate(Aggregate::Max(aggregate(&mut args)?)),
            _ => Expression::Function(name, args),
        })
    }

    /// Parses a prefix operator at or above the given precedence.
    fn parse_prefix_operator_at(&mut self, min_precedence: Precedence) -> Option<PrefixOperator> {
        self.next_if_map(|token| {
            let operator = match token {
                Token::Keyword(Keyword::Not) => PrefixOperator::Not,
                Token::Minus => PrefixOperator::Minus,
                Token::Plus => PrefixOperator::Plus,
                _ => return None,
            };
            Some(operator).filter(|op| op.precedence() >= min_precedence)
        })
    }

    /// Parses an infix operator at or above the given precedence.
    fn parse_infix_operator_at(&mut self, min_precedence: Precedence) -> Option<InfixOperator> {
        self.next_if_map(|token| {
            let operator = match token {
                Token::Keyword(Keyword::And) => InfixOperator::And,
                Token::Keyword(Keyword::Or) => InfixOperator::Or,
                Token::Equal => InfixOperator::Equal,
                Token::NotEqual | Token::LessOrGreaterThan => InfixOperator::NotEqual,
                Token::GreaterThan => InfixOperator::GreaterThan,
                Token::GreaterThanOrEqual => InfixOperator::GreaterThanOrEqual,
                Token::LessThan => InfixOperator::LessThan,
                Token::LessThanOrEqual => InfixOperator::LessThanOrEqual,
                Token::Plus => InfixOperator::Add,
                Token::Minus => InfixOperator::Subtract,
                Token::Asterisk => InfixOperator::Multiply,
                Token::Slash => InfixOperator::Divide,
                Token::Percent => InfixOperator::Remainder,
                _ => return None,
            };
            Some(operator).filter(|op| op.precedence() >= min_precedence)
        })
    }
}

/// Folds an array literal into a Literal value. Elements must be constant:
/// literals, or document constructors whose values are themselves constant.
fn fold_array_literal(exprs: Vec<Expression>) -> Result<Expression> {
    let mut values = Vec::with_capacity(exprs.len());
    for expr in exprs {
        values.push(fold_constant(expr)?);
    }
    Ok(Expression::Literal(Value::Array(values)))
}

fn fold_constant(expr: Expression) -> Result<Value> {
    match expr {
        Expression::Literal(value) => Ok(value),
        Expression::KVPairs(pairs) => {
            let mut doc = crate::types::value::Document::new();
            for (name, expr) in pairs {
                doc.set(name, fold_constant(expr)?);
            }
            Ok(Value::Document(doc))
        }
        other => Err(Error::InvalidValue(format!(
            "array elements must be constants, got {}",
            other
        ))),
    }
}

fn parse_error(found: String, expected: &[&str], pos: Position) -> Error {
    Error::Parse {
        found,
        expected: expected.join(", "),
        line: pos.line,
        column: pos.column,
    }
}

/// Operator precedence.
type Precedence = u8;

/// Operator associativity. Left-associative operators get a +1 precedence
/// bump so they bind tighter to their left operand.
enum Associativity {
    Left,
    Right,
}

impl Add<Associativity> for Precedence {
    type Output = Self;

    fn add(self, rhs: Associativity) -> Self {
        self + match rhs {
            Associativity::Left => 1,
            Associativity::Right => 0,
        }
    }
}

enum PrefixOperator {
    Minus,
    Not,
    Plus,
}

impl PrefixOperator {
    fn precedence(&self) -> Precedence {
        match self {
            Self::Not => 3,
            Self::Minus | Self::Plus => 10,
        }
    }

    fn associativity(&self) -> Associativity {
        Associativity::Right
    }

    fn into_expression(self, rhs: Expression) -> Expression {
        let rhs = Box::new(rhs);
        match self {
            Self::Plus => Operator::Identity(rhs).into(),
            Self::Minus => Operator::Negate(rhs).into(),
            Self::Not => Operator::Not(rhs).into(),
        }
    }
}

enum InfixOperator {
    Add,
    And,
    Divide,
    Equal,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
    Multiply,
    NotEqual,
    Or,
    Remainder,
    Subtract,
}

impl InfixOperator {
    fn precedence(&self) -> Precedence {
        match self {
            Self::Or => 1,
            Self::And => 2,
            // prefix NOT is 3
            Self::Equal | Self::NotEqual => 4,
            Self::GreaterThan
            | Self::GreaterThanOrEqual
            | Self::LessThan
            | Self::LessThanOrEqual => 5,
            Self::Add | Self::Subtract => 6,
            Self::Multiply | Self::Divide | Self::Remainder => 7,
        }
    }

    fn associativity(&self) -> Associativity {
        Associativity::Left
    }

    fn into_expression(self, lhs: Expression, rhs: Expression) -> Expression {
        let (lhs, rhs) = (Box::new(lhs), Box::new(rhs));
        match self {
            Self::Add => Operator::Add(lhs, rhs).into(),
            Self::And => Operator::And(lhs, rhs).into(),
            Self::Divide => Operator::Divide(lhs, rhs).into(),
            Self::Equal => Operator::Equal(lhs, rhs).into(),
            Self::GreaterThan => Operator::GreaterThan(lhs, rhs).into(),
            Self::GreaterThanOrEqual => Operator::GreaterThanOrEqual(lhs, rhs).into(),
            Self::LessThan => Operator::LessThan(lhs, rhs).into(),
            Self::LessThanOrEqual => Operator::LessThanOrEqual(lhs, rhs).into(),
            Self::Multiply => Operator::Multiply(lhs, rhs).into(),
            Self::NotEqual => Operator::NotEqual(lhs, rhs).into(),
            Self::Or => Operator::Or(lhs, rhs).into(),
            Self::Remainder => Operator::Remainder(lhs, rhs).into(),
            Self::Subtract => Operator::Subtract(lhs, rhs).into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_select() {
        let stmt = Parser::parse(
            "SELECT a, COUNT(*) AS n FROM t WHERE a > 1 GROUP BY a ORDER BY a DESC LIMIT 10 OFFSET 2;",
        )
        .unwrap();
        let Statement::Select(select) = stmt else {
            panic!("expected select");
        };
        assert!(!select.distinct);
        assert_eq!(select.projection.len(), 2);
        assert_eq!(select.projection[1].1.as_deref(), Some("n"));
        assert_eq!(select.from.as_deref(), Some("t"));
        assert!(select.r#where.is_some());
        assert_eq!(select.group_by, Some(Expression::Path(Path::field("a"))));
        assert_eq!(
            select.order_by,
            Some((Path::field("a"), Direction::Descending))
        );
        assert_eq!(
            select.limit,
            Some(Expression::Literal(Value::Integer(10)))
        );
        assert_eq!(select.offset, Some(Expression::Literal(Value::Integer(2))));
    }

    #[test]
    fn parses_insert_with_fields() {
        let stmt = Parser::parse("INSERT INTO t (a, b) VALUES (1, 2), (3, 4)").unwrap();
        let Statement::Insert(insert) = stmt else {
            panic!("expected insert");
        };
        let InsertSource::Values(values) = insert.source else {
            panic!("expected values");
        };
        assert_eq!(values.len(), 2);
        assert_eq!(
            values[0],
            Expression::KVPairs(vec![
                ("a".into(), Value::Integer(1).into()),
                ("b".into(), Value::Integer(2).into()),
            ])
        );
    }

    #[test]
    fn insert_arity_mismatch() {
        assert_eq!(
            Parser::parse("INSERT INTO t (a, b, c) VALUES (1, 2)"),
            Err(Error::ValuesFieldsMismatch {
                count: 2,
                fields: 3
            })
        );
        assert_eq!(
            Parser::parse("INSERT INTO t (a, b, c) VALUES (1, 2)")
                .unwrap_err()
                .to_string(),
            "2 values for 3 fields"
        );
    }

    #[test]
    fn parses_insert_documents_and_params() {
        let stmt = Parser::parse("INSERT INTO t VALUES {a: 1}, ?, $doc RETURNING a").unwrap();
        let Statement::Insert(insert) = stmt else {
            panic!("expected insert");
        };
        let InsertSource::Values(values) = insert.source else {
            panic!("expected values");
        };
        assert_eq!(values.len(), 3);
        assert_eq!(
            values[1],
            Expression::Parameter(Parameter::Positional(0))
        );
        assert_eq!(
            values[2],
            Expression::Parameter(Parameter::Named("doc".into()))
        );
        assert_eq!(insert.returning.len(), 1);
    }

    #[test]
    fn parses_update_and_delete() {
        let stmt = Parser::parse("UPDATE t SET a = 1, b.c = 2 WHERE a = 0").unwrap();
        let Statement::Update(update) = stmt else {
            panic!("expected update");
        };
        assert_eq!(update.set.len(), 2);
        assert!(update.unset.is_empty());

        let stmt = Parser::parse("UPDATE t UNSET a, b").unwrap();
        let Statement::Update(update) = stmt else {
            panic!("expected update");
        };
        assert_eq!(update.unset.len(), 2);

        let stmt = Parser::parse("DELETE FROM t WHERE a = 1 ORDER BY a LIMIT 2 OFFSET 1").unwrap();
        let Statement::Delete(delete) = stmt else {
            panic!("expected delete");
        };
        assert!(delete.r#where.is_some());
        assert_eq!(delete.order_by, Some((Path::field("a"), Direction::Ascending)));
    }

    #[test]
    fn parses_ddl() {
        assert_eq!(
            Parser::parse("CREATE TABLE t").unwrap(),
            Statement::CreateTable {
                name: "t".into(),
                if_not_exists: false,
                primary_key: None
            }
        );
        assert_eq!(
            Parser::parse("CREATE TABLE IF NOT EXISTS t (a.b PRIMARY KEY)").unwrap(),
            Statement::CreateTable {
                name: "t".into(),
                if_not_exists: true,
                primary_key: Some(Path(vec![
                    PathSegment::Field("a".into()),
                    PathSegment::Field("b".into())
                ])),
            }
        );
        assert_eq!(
            Parser::parse("CREATE UNIQUE INDEX idx ON t (a)").unwrap(),
            Statement::CreateIndex {
                name: "idx".into(),
                table: "t".into(),
                path: Path::field("a"),
                unique: true,
                if_not_exists: false,
            }
        );
        assert_eq!(
            Parser::parse("DROP SEQUENCE IF EXISTS seq").unwrap(),
            Statement::DropSequence {
                name: "seq".into(),
                if_exists: true
            }
        );
    }

    #[test]
    fn parses_transactions() {
        assert_eq!(
            Parser::parse("BEGIN").unwrap(),
            Statement::Begin { read_only: false }
        );
        assert_eq!(
            Parser::parse("BEGIN READ ONLY").unwrap(),
            Statement::Begin { read_only: true }
        );
        assert_eq!(Parser::parse("COMMIT").unwrap(), Statement::Commit);
        assert_eq!(Parser::parse("ROLLBACK").unwrap(), Statement::Rollback);
    }

    #[test]
    fn expression_precedence() {
        assert_eq!(
            Parser::parse_expr("1 + 2 * 3").unwrap(),
            Expression::Operator(Operator::Add(
                Box::new(Value::Integer(1).into()),
                Box::new(Expression::Operator(Operator::Multiply(
                    Box::new(Value::Integer(2).into()),
                    Box::new(Value::Integer(3).into()),
                ))),
            ))
        );
        assert_eq!(
            Parser::parse_expr("(1 + 2) * 3").unwrap(),
            Expression::Operator(Operator::Multiply(
                Box::new(Expression::Operator(Operator::Add(
                    Box::new(Value::Integer(1).into()),
                    Box::new(Value::Integer(2).into()),
                ))),
                Box::new(Value::Integer(3).into()),
            ))
        );
    }

    #[test]
    fn parse_errors_carry_position_and_expected() {
        let err = Parser::parse("SELECT FROM t").unwrap_err();
        match err {
            Error::Parse {
                found,
                expected,
                line,
                column,
            } => {
                assert_eq!(found, "FROM");
                assert_eq!(expected, "expression");
                assert_eq!(line, 1);
                assert_eq!(column, 8);
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn statement_display_roundtrips() {
        let corpus = [
            "SELECT * FROM t",
            "SELECT DISTINCT a FROM t",
            "SELECT a, b AS c FROM t WHERE a > 1 AND b < 2",
            "SELECT a, COUNT(*) FROM t GROUP BY a",
            "SELECT a FROM t ORDER BY a DESC LIMIT 1 OFFSET 2",
            "SELECT 1 + 2 * 3",
            "SELECT (1 + 2) * 3",
            "SELECT {a: 1, b: 'x'}",
            "SELECT [1, 2, 3]",
            "INSERT INTO t VALUES {a: 1}, {a: 2}",
            "INSERT INTO t VALUES ? RETURNING a",
            "UPDATE t SET a = 1 WHERE b = 2",
            "UPDATE t UNSET a",
            "DELETE FROM t WHERE a = 1 ORDER BY a LIMIT 2",
            "CREATE TABLE t (id PRIMARY KEY)",
            "CREATE UNIQUE INDEX idx ON t (a)",
            "DROP TABLE IF EXISTS t",
            "CREATE SEQUENCE seq",
            "BEGIN READ ONLY",
            "EXPLAIN SELECT a FROM t",
        ];
        for sql in corpus {
            let ast = Parser::parse(sql).unwrap();
            let printed = ast.to_string();
            let reparsed = Parser::parse(&printed)
                .unwrap_or_else(|err| panic!("reparse of {:?} failed: {}", printed, err));
            assert_eq!(ast, reparsed, "{}", sql);
        }
    }
}
