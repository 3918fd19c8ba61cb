//! # Federated Query Compiler
//!
//! Turns one [`FilterState`] into the query text for one of three shapes.
//! All three share the same `unified_logs` relation (the `UNION ALL` of every
//! registered source) and the same predicate conjunction, so a page, its
//! facet counts and its chart always describe the same population.
//!
//! The time window never appears in the SQL. It travels next to it in
//! [`CompiledQuery::window`] because the execution engine prunes partitions
//! on it.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CompileError, FilterError};
use crate::filter::{Field, FilterState, TimeRange};
use crate::histogram::{choose_granularity, Granularity};
use crate::level::Level;
use crate::pagination::{resolve_window, Window};
use crate::sources::{SourceRegistry, UNIFIED_COLUMNS};
use crate::sql::{render, BigQuery, Expr, FromClause, Func, Ident, Query, Select, Statement, TableRef};

pub const UNIFIED_RELATION: &str = "unified_logs";
const ANY_LEVEL_RELATION: &str = "unified_logs_any_level";

pub const DEFAULT_FACET_LIMIT: u64 = 20;

/// Fields that get a facet, in output order.
pub const FACET_FIELDS: [Field; 5] = [
    Field::Level,
    Field::LogType,
    Field::Method,
    Field::Status,
    Field::Path,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryShape {
    Rows,
    Facets,
    Histogram,
}

impl QueryShape {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Rows => "rows",
            Self::Facets => "facets",
            Self::Histogram => "histogram",
        }
    }
}

impl fmt::Display for QueryShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueryShape {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rows" => Ok(Self::Rows),
            "facets" => Ok(Self::Facets),
            "histogram" | "chart" => Ok(Self::Histogram),
            _ => Err(FilterError::invalid("shape", s, "expected rows, facets or histogram")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledQuery {
    pub shape: QueryShape,
    pub sql: String,
    /// Bounds for the collaborator's `timeRangeStart` / `timeRangeEnd`.
    pub window: Window,
    /// Set for the histogram shape.
    pub granularity: Option<Granularity>,
}

/// The three shapes for one snapshot, compiled together so that a bad filter
/// fails before anything is dispatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryBatch {
    pub rows: CompiledQuery,
    pub facets: CompiledQuery,
    pub histogram: CompiledQuery,
}

pub struct Compiler<'r> {
    registry: &'r SourceRegistry,
    facet_limit: u64,
}

impl<'r> Compiler<'r> {
    pub fn new(registry: &'r SourceRegistry) -> Self {
        Self {
            registry,
            facet_limit: DEFAULT_FACET_LIMIT,
        }
    }

    /// Cap on values per facet dimension.
    pub fn with_facet_limit(mut self, limit: u64) -> Self {
        self.facet_limit = limit.max(1);
        self
    }

    pub fn compile(
        &self,
        filter: &FilterState,
        shape: QueryShape,
        now: DateTime<Utc>,
    ) -> Result<CompiledQuery, CompileError> {
        let range = self.check(filter, now)?;
        let levels = filter.levels()?;
        match shape {
            QueryShape::Rows => self.rows(filter, &range, levels.as_ref(), now),
            QueryShape::Facets => self.facets(filter, &range, levels.as_ref(), now),
            QueryShape::Histogram => self.histogram(filter, &range, levels.as_ref(), now),
        }
    }

    pub fn compile_batch(
        &self,
        filter: &FilterState,
        now: DateTime<Utc>,
    ) -> Result<QueryBatch, CompileError> {
        Ok(QueryBatch {
            rows: self.compile(filter, QueryShape::Rows, now)?,
            facets: self.compile(filter, QueryShape::Facets, now)?,
            histogram: self.compile(filter, QueryShape::Histogram, now)?,
        })
    }

    fn check(&self, filter: &FilterState, now: DateTime<Utc>) -> Result<TimeRange, FilterError> {
        filter.validate()?;
        let range = filter.effective_range(now)?;
        if let Some(field) = filter
            .predicates
            .keys()
            .find(|field| !self.registry.maps(**field))
        {
            return Err(FilterError::UnmappedField(field.as_str().to_string()));
        }
        Ok(range)
    }

    fn rows(
        &self,
        filter: &FilterState,
        range: &TimeRange,
        levels: Option<&BTreeSet<Level>>,
        now: DateTime<Utc>,
    ) -> Result<CompiledQuery, CompileError> {
        let window = resolve_window(range, filter.pagination.as_ref(), filter.live_tail, now);

        let mut body = Select::from(FromClause::new(TableRef::cte(UNIFIED_RELATION)));
        for column in UNIFIED_COLUMNS {
            body = body.column(Expr::column(column));
        }
        let body = body
            .and_where_all(conditions(filter, None)?)
            .order_by(Expr::column("timestamp"), true)
            .order_by(Expr::column("id"), true)
            .limit(u64::from(filter.page_size));

        let statement = Statement::new(body).with(
            Ident::new(UNIFIED_RELATION),
            self.registry.unified_relation(levels),
        );
        Ok(CompiledQuery {
            shape: QueryShape::Rows,
            sql: render(&statement, &BigQuery)?,
            window,
            granularity: None,
        })
    }

    fn facets(
        &self,
        filter: &FilterState,
        range: &TimeRange,
        levels: Option<&BTreeSet<Level>>,
        now: DateTime<Utc>,
    ) -> Result<CompiledQuery, CompileError> {
        let window = resolve_window(range, None, filter.live_tail, now);

        // The level facet and the unfiltered total must not see the level
        // filter, which lives inside the union branches.
        let any_level = if levels.is_some() {
            ANY_LEVEL_RELATION
        } else {
            UNIFIED_RELATION
        };

        let mut statement_ctes = vec![(
            Ident::new(UNIFIED_RELATION),
            self.registry.unified_relation(levels),
        )];
        if levels.is_some() {
            statement_ctes.push((
                Ident::new(ANY_LEVEL_RELATION),
                self.registry.unified_relation(None),
            ));
        }

        let mut branches: Vec<Query> = vec![
            total_row("all", UNIFIED_RELATION)
                .and_where_all(conditions(filter, None)?)
                .into(),
            total_row("unfiltered", any_level).into(),
        ];

        for field in FACET_FIELDS {
            let relation = if field == Field::Level {
                any_level
            } else {
                UNIFIED_RELATION
            };
            let column = field.column();
            let facet = Select::from(FromClause::new(TableRef::cte(relation)))
                .column_as(Expr::string(field.as_str()), "dimension")
                .column_as(column.clone(), "value")
                .column_as(Expr::count_star(), "count")
                .and_where_all(conditions(filter, Some(field))?)
                .and_where(column.clone().is_not_null())
                .group_by(column)
                .order_by(Expr::column("count"), true)
                .limit(self.facet_limit);
            let name = format!("{}_count", field.as_str());
            statement_ctes.push((Ident::owned(name.clone()), facet.into()));

            branches.push(
                Select::from(FromClause::new(TableRef::Table {
                    name: Ident::owned(name),
                    alias: None,
                }))
                .column(Expr::column("dimension"))
                .column(Expr::column("value"))
                .column(Expr::column("count"))
                .into(),
            );
        }

        let mut statement = Statement::new(Query::UnionAll(branches));
        for (name, query) in statement_ctes {
            statement = statement.with(name, query);
        }
        Ok(CompiledQuery {
            shape: QueryShape::Facets,
            sql: render(&statement, &BigQuery)?,
            window,
            granularity: None,
        })
    }

    fn histogram(
        &self,
        filter: &FilterState,
        range: &TimeRange,
        levels: Option<&BTreeSet<Level>>,
        now: DateTime<Utc>,
    ) -> Result<CompiledQuery, CompileError> {
        let window = resolve_window(range, None, filter.live_tail, now);
        let granularity = choose_granularity(window.start, window.end);

        let count_level = |level: Level| {
            Expr::call(
                Func::CountIf,
                vec![Expr::column("level").eq(Expr::string(level.as_str()))],
            )
        };
        let body = Select::from(FromClause::new(TableRef::cte(UNIFIED_RELATION)))
            .column_as(
                Expr::TimestampTrunc {
                    expr: Box::new(Expr::column("timestamp")),
                    part: granularity.date_part(),
                },
                "time_bucket",
            )
            .column_as(count_level(Level::Success), "success")
            .column_as(count_level(Level::Warning), "warning")
            .column_as(count_level(Level::Error), "error")
            .column_as(Expr::count_star(), "total_per_bucket")
            .and_where_all(conditions(filter, None)?)
            .group_by(Expr::column("time_bucket"))
            .order_by(Expr::column("time_bucket"), false);

        let statement = Statement::new(body).with(
            Ident::new(UNIFIED_RELATION),
            self.registry.unified_relation(levels),
        );
        Ok(CompiledQuery {
            shape: QueryShape::Histogram,
            sql: render(&statement, &BigQuery)?,
            window,
            granularity: Some(granularity),
        })
    }
}

/// Compile `filter` into `shape` against `registry`.
pub fn compile(
    filter: &FilterState,
    shape: QueryShape,
    registry: &SourceRegistry,
    now: DateTime<Utc>,
) -> Result<CompiledQuery, CompileError> {
    Compiler::new(registry).compile(filter, shape, now)
}

/// Conditions on the unified relation for every predicate except `level`
/// (applied per source) and `exclude`.
fn conditions(filter: &FilterState, exclude: Option<Field>) -> Result<Vec<Expr>, FilterError> {
    filter
        .predicates
        .iter()
        .filter(|(field, _)| **field != Field::Level && Some(**field) != exclude)
        .map(|(field, predicate)| predicate.to_expr(*field))
        .collect()
}

fn total_row(value: &'static str, relation: &'static str) -> Select {
    Select::from(FromClause::new(TableRef::cte(relation)))
        .column_as(Expr::string("total"), "dimension")
        .column_as(Expr::string(value), "value")
        .column_as(Expr::count_star(), "count")
}
