//! # Query AST
//!
//! Expression tree for the federated query. Adapters build projection nodes,
//! the compiler stitches them into a set-union node and appends predicate,
//! grouping and ordering nodes, and [`render`] turns the whole statement into
//! text for one target dialect.
//!
//! User-supplied values only ever enter the tree as [`Literal`]s, which the
//! dialect escapes. Identifiers come from code and are still validated at
//! render time.

use std::borrow::Cow;
use std::fmt::Write as _;
use std::sync::OnceLock;

use regex::Regex;

use crate::error::RenderError;

// =============================================================================
// Nodes
// =============================================================================

/// A column, table, alias or CTE name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ident(Cow<'static, str>);

impl Ident {
    pub const fn new(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    pub fn owned(name: impl Into<String>) -> Self {
        Self(Cow::Owned(name.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Literal {
    Str(String),
    Int(i64),
    Bool(bool),
    Null,
}

impl Literal {
    pub fn str(value: impl Into<String>) -> Self {
        Self::Str(value.into())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Eq,
    NotEq,
    Lt,
    Lte,
    Gt,
    Gte,
}

impl BinOp {
    fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::NotEq => "!=",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::Gt => ">",
            Self::Gte => ">=",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlType {
    String,
    Int64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatePart {
    Minute,
    Hour,
    Day,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Func {
    Count,
    CountIf,
    Coalesce,
    AnyValue,
    ArrayAgg,
    Struct,
    Lower,
}

impl Func {
    fn name(self) -> &'static str {
        match self {
            Self::Count => "COUNT",
            Self::CountIf => "COUNTIF",
            Self::Coalesce => "COALESCE",
            Self::AnyValue => "ANY_VALUE",
            Self::ArrayAgg => "ARRAY_AGG",
            Self::Struct => "STRUCT",
            Self::Lower => "LOWER",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Column(Ident),
    Qualified(Ident, Ident),
    Lit(Literal),
    /// `*`, only meaningful as a `COUNT` argument.
    Star,
    Binary {
        left: Box<Expr>,
        op: BinOp,
        right: Box<Expr>,
    },
    And(Vec<Expr>),
    Or(Vec<Expr>),
    In {
        expr: Box<Expr>,
        list: Vec<Literal>,
        negated: bool,
    },
    Between {
        expr: Box<Expr>,
        low: Literal,
        high: Literal,
    },
    Like {
        expr: Box<Expr>,
        pattern: String,
        negated: bool,
    },
    IsNull {
        expr: Box<Expr>,
        negated: bool,
    },
    Cast {
        expr: Box<Expr>,
        ty: SqlType,
    },
    Call {
        func: Func,
        args: Vec<Expr>,
    },
    TimestampTrunc {
        expr: Box<Expr>,
        part: DatePart,
    },
    Case {
        branches: Vec<(Expr, Expr)>,
        otherwise: Box<Expr>,
    },
}

impl Expr {
    pub const fn column(name: &'static str) -> Self {
        Self::Column(Ident::new(name))
    }

    pub const fn qualified(table: &'static str, column: &'static str) -> Self {
        Self::Qualified(Ident::new(table), Ident::new(column))
    }

    pub fn null() -> Self {
        Self::Lit(Literal::Null)
    }

    pub fn string(value: impl Into<String>) -> Self {
        Self::Lit(Literal::Str(value.into()))
    }

    pub fn int(value: i64) -> Self {
        Self::Lit(Literal::Int(value))
    }

    pub fn bool(value: bool) -> Self {
        Self::Lit(Literal::Bool(value))
    }

    pub fn is_null_literal(&self) -> bool {
        matches!(self, Self::Lit(Literal::Null))
    }

    pub fn binary(self, op: BinOp, right: Expr) -> Self {
        Self::Binary {
            left: Box::new(self),
            op,
            right: Box::new(right),
        }
    }

    pub fn eq(self, right: Expr) -> Self {
        self.binary(BinOp::Eq, right)
    }

    pub fn in_list(self, list: Vec<Literal>) -> Self {
        Self::In {
            expr: Box::new(self),
            list,
            negated: false,
        }
    }

    pub fn not_in_list(self, list: Vec<Literal>) -> Self {
        Self::In {
            expr: Box::new(self),
            list,
            negated: true,
        }
    }

    pub fn between(self, low: Literal, high: Literal) -> Self {
        Self::Between {
            expr: Box::new(self),
            low,
            high,
        }
    }

    pub fn like(self, pattern: impl Into<String>) -> Self {
        Self::Like {
            expr: Box::new(self),
            pattern: pattern.into(),
            negated: false,
        }
    }

    pub fn not_like(self, pattern: impl Into<String>) -> Self {
        Self::Like {
            expr: Box::new(self),
            pattern: pattern.into(),
            negated: true,
        }
    }

    /// `expr LIKE '%needle%'` with `%`, `_` and `\` in the needle escaped.
    pub fn contains(self, needle: &str) -> Self {
        let mut pattern = String::with_capacity(needle.len() + 2);
        pattern.push('%');
        for ch in needle.chars() {
            if matches!(ch, '%' | '_' | '\\') {
                pattern.push('\\');
            }
            pattern.push(ch);
        }
        pattern.push('%');
        self.like(pattern)
    }

    pub fn is_null(self) -> Self {
        Self::IsNull {
            expr: Box::new(self),
            negated: false,
        }
    }

    pub fn is_not_null(self) -> Self {
        Self::IsNull {
            expr: Box::new(self),
            negated: true,
        }
    }

    pub fn cast(self, ty: SqlType) -> Self {
        Self::Cast {
            expr: Box::new(self),
            ty,
        }
    }

    pub fn call(func: Func, args: Vec<Expr>) -> Self {
        Self::Call { func, args }
    }

    pub fn count_star() -> Self {
        Self::call(Func::Count, vec![Self::Star])
    }

    /// Conjunction that collapses to its only member.
    pub fn and_all(mut parts: Vec<Expr>) -> Self {
        if parts.len() == 1 {
            parts.remove(0)
        } else {
            Self::And(parts)
        }
    }

    /// Disjunction that collapses to its only member.
    pub fn or_any(mut parts: Vec<Expr>) -> Self {
        if parts.len() == 1 {
            parts.remove(0)
        } else {
            Self::Or(parts)
        }
    }

    fn is_compound(&self) -> bool {
        matches!(self, Self::And(parts) | Self::Or(parts) if parts.len() > 1)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectItem {
    pub expr: Expr,
    pub alias: Option<Ident>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Cross,
    Left,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TableRef {
    Table { name: Ident, alias: Option<Ident> },
    Unnest { expr: Expr, alias: Ident },
    Subquery { query: Box<Query>, alias: Ident },
    /// A parenthesized join tree, used as the right side of an outer join.
    Group(Box<FromClause>),
}

impl TableRef {
    pub const fn table(name: &'static str, alias: &'static str) -> Self {
        Self::Table {
            name: Ident::new(name),
            alias: Some(Ident::new(alias)),
        }
    }

    pub const fn cte(name: &'static str) -> Self {
        Self::Table {
            name: Ident::new(name),
            alias: None,
        }
    }

    pub fn unnest(expr: Expr, alias: &'static str) -> Self {
        Self::Unnest {
            expr,
            alias: Ident::new(alias),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub kind: JoinKind,
    pub item: TableRef,
    pub on: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FromClause {
    pub base: TableRef,
    pub joins: Vec<Join>,
}

impl FromClause {
    pub fn new(base: TableRef) -> Self {
        Self {
            base,
            joins: Vec::new(),
        }
    }

    pub fn cross_join(mut self, item: TableRef) -> Self {
        self.joins.push(Join {
            kind: JoinKind::Cross,
            item,
            on: None,
        });
        self
    }

    /// `LEFT JOIN item` without a condition, for `UNNEST` of optional arrays.
    pub fn left_join(mut self, item: TableRef) -> Self {
        self.joins.push(Join {
            kind: JoinKind::Left,
            item,
            on: None,
        });
        self
    }

    pub fn left_join_on(mut self, item: TableRef, on: Expr) -> Self {
        self.joins.push(Join {
            kind: JoinKind::Left,
            item,
            on: Some(on),
        });
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub expr: Expr,
    pub descending: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Select {
    pub projection: Vec<SelectItem>,
    pub from: FromClause,
    pub filter: Vec<Expr>,
    pub group_by: Vec<Expr>,
    pub order_by: Vec<OrderBy>,
    pub limit: Option<u64>,
}

impl Select {
    pub fn from(from: FromClause) -> Self {
        Self {
            projection: Vec::new(),
            from,
            filter: Vec::new(),
            group_by: Vec::new(),
            order_by: Vec::new(),
            limit: None,
        }
    }

    pub fn column(mut self, expr: Expr) -> Self {
        self.projection.push(SelectItem { expr, alias: None });
        self
    }

    pub fn column_as(mut self, expr: Expr, alias: &'static str) -> Self {
        self.projection.push(SelectItem {
            expr,
            alias: Some(Ident::new(alias)),
        });
        self
    }

    /// Adds a conjunct to the `WHERE` clause.
    pub fn and_where(mut self, expr: Expr) -> Self {
        self.filter.push(expr);
        self
    }

    pub fn and_where_all(mut self, exprs: impl IntoIterator<Item = Expr>) -> Self {
        self.filter.extend(exprs);
        self
    }

    pub fn group_by(mut self, expr: Expr) -> Self {
        self.group_by.push(expr);
        self
    }

    pub fn order_by(mut self, expr: Expr, descending: bool) -> Self {
        self.order_by.push(OrderBy { expr, descending });
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    Select(Box<Select>),
    UnionAll(Vec<Query>),
}

impl From<Select> for Query {
    fn from(select: Select) -> Self {
        Self::Select(Box::new(select))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Cte {
    pub name: Ident,
    pub query: Query,
}

/// A full statement: optional `WITH` list plus a body.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub ctes: Vec<Cte>,
    pub body: Query,
}

impl Statement {
    pub fn new(body: impl Into<Query>) -> Self {
        Self {
            ctes: Vec::new(),
            body: body.into(),
        }
    }

    pub fn with(mut self, name: Ident, query: impl Into<Query>) -> Self {
        self.ctes.push(Cte {
            name,
            query: query.into(),
        });
        self
    }
}

// =============================================================================
// Dialects
// =============================================================================

/// The dialect-specific bits of rendering.
pub trait Dialect {
    fn quote_string(&self, value: &str) -> String;
    fn type_name(&self, ty: SqlType) -> &'static str;
    fn date_part(&self, part: DatePart) -> &'static str;
}

/// GoogleSQL, as spoken by the analytics endpoint.
#[derive(Debug, Clone, Copy, Default)]
pub struct BigQuery;

impl Dialect for BigQuery {
    fn quote_string(&self, value: &str) -> String {
        let mut out = String::with_capacity(value.len() + 2);
        out.push('\'');
        for ch in value.chars() {
            match ch {
                '\\' => out.push_str("\\\\"),
                '\'' => out.push_str("\\'"),
                '\n' => out.push_str("\\n"),
                '\r' => out.push_str("\\r"),
                other => out.push(other),
            }
        }
        out.push('\'');
        out
    }

    fn type_name(&self, ty: SqlType) -> &'static str {
        match ty {
            SqlType::String => "STRING",
            SqlType::Int64 => "INT64",
        }
    }

    fn date_part(&self, part: DatePart) -> &'static str {
        match part {
            DatePart::Minute => "MINUTE",
            DatePart::Hour => "HOUR",
            DatePart::Day => "DAY",
        }
    }
}

// =============================================================================
// Rendering
// =============================================================================

/// Render a statement as query text for `dialect`.
pub fn render(statement: &Statement, dialect: &dyn Dialect) -> Result<String, RenderError> {
    let mut writer = Writer {
        out: String::new(),
        dialect,
    };
    writer.statement(statement)?;
    Ok(writer.out)
}

fn identifier_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("static pattern"))
}

struct Writer<'d> {
    out: String,
    dialect: &'d dyn Dialect,
}

impl Writer<'_> {
    fn statement(&mut self, statement: &Statement) -> Result<(), RenderError> {
        if !statement.ctes.is_empty() {
            self.out.push_str("WITH ");
            for (i, cte) in statement.ctes.iter().enumerate() {
                if i > 0 {
                    self.out.push_str(",\n");
                }
                self.ident(&cte.name)?;
                self.out.push_str(" AS (\n");
                self.query(&cte.query)?;
                self.out.push_str("\n)");
            }
            self.out.push('\n');
        }
        self.query(&statement.body)
    }

    fn query(&mut self, query: &Query) -> Result<(), RenderError> {
        match query {
            Query::Select(select) => self.select(select),
            Query::UnionAll(parts) => {
                for (i, part) in parts.iter().enumerate() {
                    if i > 0 {
                        self.out.push_str("\nUNION ALL\n");
                    }
                    self.query(part)?;
                }
                Ok(())
            }
        }
    }

    fn select(&mut self, select: &Select) -> Result<(), RenderError> {
        self.out.push_str("SELECT\n");
        for (i, item) in select.projection.iter().enumerate() {
            self.out.push_str(if i > 0 { ",\n  " } else { "  " });
            self.expr(&item.expr)?;
            if let Some(alias) = &item.alias {
                self.out.push_str(" AS ");
                self.ident(alias)?;
            }
        }
        self.out.push_str("\nFROM ");
        self.from_clause(&select.from)?;

        if !select.filter.is_empty() {
            self.out.push_str("\nWHERE ");
            self.conjunction(&select.filter)?;
        }
        if !select.group_by.is_empty() {
            self.out.push_str("\nGROUP BY ");
            self.comma_separated(&select.group_by)?;
        }
        if !select.order_by.is_empty() {
            self.out.push_str("\nORDER BY ");
            for (i, order) in select.order_by.iter().enumerate() {
                if i > 0 {
                    self.out.push_str(", ");
                }
                self.expr(&order.expr)?;
                self.out.push_str(if order.descending { " DESC" } else { " ASC" });
            }
        }
        if let Some(limit) = select.limit {
            let _ = write!(self.out, "\nLIMIT {}", limit);
        }
        Ok(())
    }

    fn from_clause(&mut self, from: &FromClause) -> Result<(), RenderError> {
        self.table_ref(&from.base)?;
        for join in &from.joins {
            self.out.push_str(match join.kind {
                JoinKind::Cross => "\nCROSS JOIN ",
                JoinKind::Left => "\nLEFT JOIN ",
            });
            self.table_ref(&join.item)?;
            if let Some(on) = &join.on {
                self.out.push_str(" ON ");
                self.expr(on)?;
            }
        }
        Ok(())
    }

    fn table_ref(&mut self, table: &TableRef) -> Result<(), RenderError> {
        match table {
            TableRef::Table { name, alias } => {
                self.ident(name)?;
                if let Some(alias) = alias {
                    self.out.push_str(" AS ");
                    self.ident(alias)?;
                }
            }
            TableRef::Unnest { expr, alias } => {
                self.out.push_str("UNNEST(");
                self.expr(expr)?;
                self.out.push_str(") AS ");
                self.ident(alias)?;
            }
            TableRef::Subquery { query, alias } => {
                self.out.push_str("(\n");
                self.query(query)?;
                self.out.push_str("\n) AS ");
                self.ident(alias)?;
            }
            TableRef::Group(from) => {
                self.out.push('(');
                self.from_clause(from)?;
                self.out.push(')');
            }
        }
        Ok(())
    }

    fn conjunction(&mut self, parts: &[Expr]) -> Result<(), RenderError> {
        if let [only] = parts {
            return self.expr(only);
        }
        for (i, part) in parts.iter().enumerate() {
            if i > 0 {
                self.out.push_str(" AND ");
            }
            self.operand(part)?;
        }
        Ok(())
    }

    fn comma_separated(&mut self, exprs: &[Expr]) -> Result<(), RenderError> {
        for (i, expr) in exprs.iter().enumerate() {
            if i > 0 {
                self.out.push_str(", ");
            }
            self.expr(expr)?;
        }
        Ok(())
    }

    /// Renders `expr`, parenthesized when it is a multi-term AND/OR.
    fn operand(&mut self, expr: &Expr) -> Result<(), RenderError> {
        if expr.is_compound() {
            self.out.push('(');
            self.expr(expr)?;
            self.out.push(')');
            Ok(())
        } else {
            self.expr(expr)
        }
    }

    fn expr(&mut self, expr: &Expr) -> Result<(), RenderError> {
        match expr {
            Expr::Column(name) => self.ident(name)?,
            Expr::Qualified(table, column) => {
                self.ident(table)?;
                self.out.push('.');
                self.ident(column)?;
            }
            Expr::Lit(lit) => self.literal(lit),
            Expr::Star => self.out.push('*'),
            Expr::Binary { left, op, right } => {
                self.operand(left)?;
                let _ = write!(self.out, " {} ", op.symbol());
                self.operand(right)?;
            }
            Expr::And(parts) if parts.is_empty() => self.out.push_str("TRUE"),
            Expr::And(parts) => self.conjunction(parts)?,
            Expr::Or(parts) if parts.is_empty() => self.out.push_str("FALSE"),
            Expr::Or(parts) => {
                for (i, part) in parts.iter().enumerate() {
                    if i > 0 {
                        self.out.push_str(" OR ");
                    }
                    self.operand(part)?;
                }
            }
            Expr::In { expr, list, negated } => {
                self.operand(expr)?;
                self.out.push_str(if *negated { " NOT IN (" } else { " IN (" });
                for (i, lit) in list.iter().enumerate() {
                    if i > 0 {
                        self.out.push_str(", ");
                    }
                    self.literal(lit);
                }
                self.out.push(')');
            }
            Expr::Between { expr, low, high } => {
                self.operand(expr)?;
                self.out.push_str(" BETWEEN ");
                self.literal(low);
                self.out.push_str(" AND ");
                self.literal(high);
            }
            Expr::Like {
                expr,
                pattern,
                negated,
            } => {
                self.operand(expr)?;
                self.out.push_str(if *negated { " NOT LIKE " } else { " LIKE " });
                let quoted = self.dialect.quote_string(pattern);
                self.out.push_str(&quoted);
            }
            Expr::IsNull { expr, negated } => {
                self.operand(expr)?;
                self.out
                    .push_str(if *negated { " IS NOT NULL" } else { " IS NULL" });
            }
            Expr::Cast { expr, ty } => {
                self.out.push_str("CAST(");
                self.expr(expr)?;
                let _ = write!(self.out, " AS {})", self.dialect.type_name(*ty));
            }
            Expr::Call { func, args } => {
                self.out.push_str(func.name());
                self.out.push('(');
                self.comma_separated(args)?;
                self.out.push(')');
            }
            Expr::TimestampTrunc { expr, part } => {
                self.out.push_str("TIMESTAMP_TRUNC(");
                self.expr(expr)?;
                let _ = write!(self.out, ", {})", self.dialect.date_part(*part));
            }
            Expr::Case {
                branches,
                otherwise,
            } => {
                self.out.push_str("CASE");
                for (when, then) in branches {
                    self.out.push_str(" WHEN ");
                    self.expr(when)?;
                    self.out.push_str(" THEN ");
                    self.expr(then)?;
                }
                self.out.push_str(" ELSE ");
                self.expr(otherwise)?;
                self.out.push_str(" END");
            }
        }
        Ok(())
    }

    fn literal(&mut self, lit: &Literal) {
        match lit {
            Literal::Str(value) => {
                let quoted = self.dialect.quote_string(value);
                self.out.push_str(&quoted);
            }
            Literal::Int(value) => {
                let _ = write!(self.out, "{}", value);
            }
            Literal::Bool(true) => self.out.push_str("TRUE"),
            Literal::Bool(false) => self.out.push_str("FALSE"),
            Literal::Null => self.out.push_str("NULL"),
        }
    }

    fn ident(&mut self, ident: &Ident) -> Result<(), RenderError> {
        if !identifier_pattern().is_match(ident.as_str()) {
            return Err(RenderError::InvalidIdentifier(ident.as_str().to_string()));
        }
        self.out.push_str(ident.as_str());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render_expr(expr: Expr) -> String {
        let select = Select::from(FromClause::new(TableRef::cte("t"))).column(expr);
        let sql = render(&Statement::new(select), &BigQuery).unwrap();
        sql.lines().nth(1).unwrap().trim().to_string()
    }

    #[test]
    fn test_string_literals_are_escaped() {
        let sql = render_expr(Expr::column("path").eq(Expr::string("a'b\\c")));
        assert_eq!(sql, r"path = 'a\'b\\c'");
    }

    #[test]
    fn test_contains_escapes_like_wildcards() {
        let sql = render_expr(Expr::column("path").contains("50%_off"));
        assert_eq!(sql, r"path LIKE '%50\\%\\_off%'");
    }

    #[test]
    fn test_nested_or_inside_and_is_parenthesized() {
        let expr = Expr::And(vec![
            Expr::Or(vec![
                Expr::column("a").eq(Expr::int(1)),
                Expr::column("b").eq(Expr::int(2)),
            ]),
            Expr::column("c").is_not_null(),
        ]);
        assert_eq!(render_expr(expr), "(a = 1 OR b = 2) AND c IS NOT NULL");
    }

    #[test]
    fn test_empty_disjunction_renders_false() {
        assert_eq!(render_expr(Expr::Or(vec![])), "FALSE");
    }

    #[test]
    fn test_invalid_identifier_is_rejected() {
        let select = Select::from(FromClause::new(TableRef::cte("t")))
            .column(Expr::Column(Ident::owned("level; DROP TABLE x")));
        let err = render(&Statement::new(select), &BigQuery).unwrap_err();
        assert!(matches!(err, RenderError::InvalidIdentifier(_)));
    }

    #[test]
    fn test_statement_with_cte_and_union() {
        let a = Select::from(FromClause::new(TableRef::table("edge_logs", "el")))
            .column_as(Expr::qualified("el", "id"), "id");
        let b = Select::from(FromClause::new(TableRef::table("postgres_logs", "pgl")))
            .column_as(Expr::qualified("pgl", "id"), "id");
        let body = Select::from(FromClause::new(TableRef::cte("unified_logs")))
            .column(Expr::column("id"))
            .order_by(Expr::column("id"), true)
            .limit(5);
        let stmt = Statement::new(body).with(
            Ident::new("unified_logs"),
            Query::UnionAll(vec![a.into(), b.into()]),
        );
        let sql = render(&stmt, &BigQuery).unwrap();
        assert!(sql.starts_with("WITH unified_logs AS (\n"));
        assert!(sql.contains("FROM edge_logs AS el\nUNION ALL\nSELECT"));
        assert!(sql.ends_with("ORDER BY id DESC\nLIMIT 5"));
    }
}
