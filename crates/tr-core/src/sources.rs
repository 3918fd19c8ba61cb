//! # Source Adapters
//!
//! Each log-producing subsystem writes to its own native table with its own
//! nested schema. A [`SourceAdapter`] projects that schema onto the unified
//! row shape and owns the source's [`LevelRule`]. The [`SourceRegistry`] is
//! the capability table the compiler folds into one `UNION ALL` relation.
//!
//! Projections never change row cardinality. The only outer join against
//! another table is the auth adapter's one-to-one correlation with the edge
//! request that carried it; the edge-function adapter joins a subquery that
//! is already grouped to one row per execution.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::FilterError;
use crate::filter::Field;
use crate::level::{Level, LevelRule};
use crate::sql::{Expr, FromClause, Func, Ident, Query, Select, SqlType, TableRef};

// =============================================================================
// Source identity
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SourceType {
    #[serde(rename = "edge")]
    Edge,
    #[serde(rename = "postgrest")]
    Postgrest,
    #[serde(rename = "storage")]
    Storage,
    #[serde(rename = "postgres")]
    Postgres,
    #[serde(rename = "edge function")]
    EdgeFunction,
    #[serde(rename = "auth")]
    Auth,
    #[serde(rename = "supavisor")]
    Supavisor,
}

impl SourceType {
    pub const ALL: [SourceType; 7] = [
        SourceType::Edge,
        SourceType::Postgrest,
        SourceType::Storage,
        SourceType::Postgres,
        SourceType::EdgeFunction,
        SourceType::Auth,
        SourceType::Supavisor,
    ];

    /// The `log_type` value rows of this source carry.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Edge => "edge",
            Self::Postgrest => "postgrest",
            Self::Storage => "storage",
            Self::Postgres => "postgres",
            Self::EdgeFunction => "edge function",
            Self::Auth => "auth",
            Self::Supavisor => "supavisor",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceType {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "edge" => Ok(Self::Edge),
            "postgrest" | "rest-api" => Ok(Self::Postgrest),
            "storage" => Ok(Self::Storage),
            "postgres" | "database" => Ok(Self::Postgres),
            "edge function" | "edge_function" | "function" => Ok(Self::EdgeFunction),
            "auth" => Ok(Self::Auth),
            "supavisor" | "pooler" => Ok(Self::Supavisor),
            _ => Err(FilterError::invalid("log_type", s, "unknown log source")),
        }
    }
}

// =============================================================================
// Projection
// =============================================================================

/// Native expressions for the unified columns. `log_type` and `level` are
/// not listed: the first is the source's own name, the second comes from its
/// [`LevelRule`].
#[derive(Debug, Clone)]
pub struct Projection {
    pub id: Expr,
    pub timestamp: Expr,
    pub status: Expr,
    pub path: Expr,
    pub host: Expr,
    pub event_message: Expr,
    pub method: Expr,
    pub api_role: Expr,
    pub auth_user: Expr,
    pub log_count: Expr,
    pub logs: Expr,
}

impl Projection {
    /// The native expression behind a filterable field. `None` for the two
    /// synthetic columns.
    pub fn get(&self, field: Field) -> Option<&Expr> {
        match field {
            Field::Level | Field::LogType => None,
            Field::Status => Some(&self.status),
            Field::Method => Some(&self.method),
            Field::Path => Some(&self.path),
            Field::Host => Some(&self.host),
            Field::EventMessage => Some(&self.event_message),
            Field::ApiRole => Some(&self.api_role),
            Field::AuthUser => Some(&self.auth_user),
            Field::LogCount => Some(&self.log_count),
        }
    }
}

/// Column order of the unified relation.
pub const UNIFIED_COLUMNS: [&str; 13] = [
    "id",
    "timestamp",
    "log_type",
    "status",
    "level",
    "path",
    "host",
    "event_message",
    "method",
    "api_role",
    "auth_user",
    "log_count",
    "logs",
];

// =============================================================================
// Adapter trait
// =============================================================================

pub trait SourceAdapter: Send + Sync {
    fn source(&self) -> SourceType;

    /// Native tables and unnests the projection reads from.
    fn from_clause(&self) -> FromClause;

    fn columns(&self) -> Projection;

    fn level_rule(&self) -> &LevelRule;

    /// Row filter the source always applies, independent of the user's filter.
    fn guard(&self) -> Option<Expr> {
        None
    }

    fn level_predicate(&self, levels: &BTreeSet<Level>) -> Option<Expr> {
        self.level_rule().predicate(levels)
    }

    /// Whether rows of this source can carry a non-null value for `field`.
    fn maps(&self, field: Field) -> bool {
        self.columns()
            .get(field)
            .map_or(true, |expr| !expr.is_null_literal())
    }

    /// The unified-row `SELECT` for this source, guards included.
    fn projection(&self) -> Select {
        let c = self.columns();
        let mut select = Select::from(self.from_clause())
            .column_as(c.id, "id")
            .column_as(c.timestamp, "timestamp")
            .column_as(Expr::string(self.source().as_str()), "log_type")
            .column_as(c.status, "status")
            .column_as(self.level_rule().case_expr(), "level")
            .column_as(c.path, "path")
            .column_as(c.host, "host")
            .column_as(c.event_message, "event_message")
            .column_as(c.method, "method")
            .column_as(c.api_role, "api_role")
            .column_as(c.auth_user, "auth_user")
            .column_as(c.log_count, "log_count")
            .column_as(c.logs, "logs");
        if let Some(guard) = self.guard() {
            select = select.and_where(guard);
        }
        select
    }
}

// =============================================================================
// Concrete adapters
// =============================================================================

/// `LEFT JOIN UNNEST(..)` chain resolving the caller's role and user from the
/// JWT the edge proxy recorded on `request`.
fn jwt_joins(from: FromClause, request: &'static str) -> FromClause {
    from.left_join(TableRef::unnest(Expr::qualified(request, "sb"), "sb"))
        .left_join(TableRef::unnest(Expr::qualified("sb", "jwt"), "jwt"))
        .left_join(TableRef::unnest(Expr::qualified("jwt", "authorization"), "auth"))
        .left_join(TableRef::unnest(
            Expr::qualified("auth", "payload"),
            "authorization_payload",
        ))
}

fn status_string(column: Expr) -> Expr {
    column.cast(SqlType::String)
}

/// Which slice of `edge_logs` an [`EdgeRequestAdapter`] owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathScope {
    /// Everything not routed to the REST API or storage.
    Other,
    Rest,
    Storage,
}

/// The three sources fronted by the edge proxy, told apart by request path.
pub struct EdgeRequestAdapter {
    source: SourceType,
    scope: PathScope,
    rule: LevelRule,
}

impl EdgeRequestAdapter {
    pub fn new(source: SourceType, scope: PathScope) -> Self {
        Self {
            source,
            scope,
            rule: LevelRule::status_bands(Expr::qualified("edge_logs_response", "status_code")),
        }
    }

    pub fn edge() -> Self {
        Self::new(SourceType::Edge, PathScope::Other)
    }

    pub fn postgrest() -> Self {
        Self::new(SourceType::Postgrest, PathScope::Rest)
    }

    pub fn storage() -> Self {
        Self::new(SourceType::Storage, PathScope::Storage)
    }
}

impl SourceAdapter for EdgeRequestAdapter {
    fn source(&self) -> SourceType {
        self.source
    }

    fn from_clause(&self) -> FromClause {
        let from = FromClause::new(TableRef::table("edge_logs", "el"))
            .cross_join(TableRef::unnest(Expr::qualified("el", "metadata"), "edge_logs_metadata"))
            .cross_join(TableRef::unnest(
                Expr::qualified("edge_logs_metadata", "request"),
                "edge_logs_request",
            ))
            .cross_join(TableRef::unnest(
                Expr::qualified("edge_logs_metadata", "response"),
                "edge_logs_response",
            ));
        jwt_joins(from, "edge_logs_request")
    }

    fn columns(&self) -> Projection {
        Projection {
            id: Expr::qualified("el", "id"),
            timestamp: Expr::qualified("el", "timestamp"),
            status: status_string(Expr::qualified("edge_logs_response", "status_code")),
            path: Expr::qualified("edge_logs_request", "path"),
            host: Expr::qualified("edge_logs_request", "host"),
            event_message: Expr::null(),
            method: Expr::qualified("edge_logs_request", "method"),
            api_role: Expr::qualified("authorization_payload", "role"),
            auth_user: Expr::qualified("sb", "auth_user"),
            log_count: Expr::null(),
            logs: Expr::null(),
        }
    }

    fn level_rule(&self) -> &LevelRule {
        &self.rule
    }

    fn guard(&self) -> Option<Expr> {
        let path = Expr::qualified("edge_logs_request", "path");
        Some(match self.scope {
            PathScope::Rest => path.like("%/rest/%"),
            PathScope::Storage => path.like("%/storage/%"),
            PathScope::Other => Expr::And(vec![
                path.clone().not_like("%/rest/%"),
                path.not_like("%/storage/%"),
            ]),
        })
    }
}

/// Database server logs, classified by `error_severity`.
pub struct PostgresAdapter {
    rule: LevelRule,
}

impl Default for PostgresAdapter {
    fn default() -> Self {
        Self {
            rule: LevelRule::Severity {
                column: Expr::qualified("pgl_parsed", "error_severity"),
                warning: &["WARNING"],
                error: &["ERROR", "FATAL", "PANIC"],
                case_insensitive: false,
            },
        }
    }
}

impl SourceAdapter for PostgresAdapter {
    fn source(&self) -> SourceType {
        SourceType::Postgres
    }

    fn from_clause(&self) -> FromClause {
        FromClause::new(TableRef::table("postgres_logs", "pgl"))
            .cross_join(TableRef::unnest(Expr::qualified("pgl", "metadata"), "pgl_metadata"))
            .cross_join(TableRef::unnest(
                Expr::qualified("pgl_metadata", "parsed"),
                "pgl_parsed",
            ))
    }

    fn columns(&self) -> Projection {
        Projection {
            id: Expr::qualified("pgl", "id"),
            timestamp: Expr::qualified("pgl", "timestamp"),
            status: status_string(Expr::qualified("pgl_parsed", "sql_state_code")),
            path: Expr::null(),
            host: Expr::null(),
            event_message: Expr::qualified("pgl", "event_message"),
            method: Expr::null(),
            api_role: Expr::null(),
            auth_user: Expr::null(),
            log_count: Expr::null(),
            logs: Expr::null(),
        }
    }

    fn level_rule(&self) -> &LevelRule {
        &self.rule
    }
}

/// Edge function invocations, each carrying the console logs emitted during
/// that execution.
pub struct EdgeFunctionAdapter {
    rule: LevelRule,
}

impl Default for EdgeFunctionAdapter {
    fn default() -> Self {
        Self {
            rule: LevelRule::status_bands(Expr::qualified("fel_response", "status_code")),
        }
    }
}

impl EdgeFunctionAdapter {
    /// One row per `execution_id`.
    fn function_logs_by_execution() -> Select {
        let child = Expr::call(
            Func::Struct,
            vec![
                Expr::qualified("fl", "id"),
                Expr::qualified("fl", "timestamp"),
                Expr::qualified("fl", "event_message"),
                Expr::qualified("fl_metadata", "level"),
                Expr::qualified("fl_metadata", "event_type"),
            ],
        );
        Select::from(
            FromClause::new(TableRef::table("function_logs", "fl"))
                .cross_join(TableRef::unnest(Expr::qualified("fl", "metadata"), "fl_metadata")),
        )
        .column_as(Expr::qualified("fl_metadata", "execution_id"), "execution_id")
        .column_as(
            Expr::call(Func::Count, vec![Expr::qualified("fl", "id")]),
            "function_log_count",
        )
        .column_as(
            Expr::call(Func::AnyValue, vec![Expr::qualified("fl", "event_message")]),
            "last_event_message",
        )
        .column_as(Expr::call(Func::ArrayAgg, vec![child]), "logs")
        .and_where(Expr::qualified("fl_metadata", "execution_id").is_not_null())
        .group_by(Expr::qualified("fl_metadata", "execution_id"))
    }
}

impl SourceAdapter for EdgeFunctionAdapter {
    fn source(&self) -> SourceType {
        SourceType::EdgeFunction
    }

    fn from_clause(&self) -> FromClause {
        let from = FromClause::new(TableRef::table("function_edge_logs", "fel"))
            .cross_join(TableRef::unnest(Expr::qualified("fel", "metadata"), "fel_metadata"))
            .cross_join(TableRef::unnest(
                Expr::qualified("fel_metadata", "response"),
                "fel_response",
            ))
            .cross_join(TableRef::unnest(
                Expr::qualified("fel_metadata", "request"),
                "fel_request",
            ));
        jwt_joins(from, "fel_request").left_join_on(
            TableRef::Subquery {
                query: Box::new(Self::function_logs_by_execution().into()),
                alias: Ident::new("function_logs_agg"),
            },
            Expr::qualified("fel_metadata", "execution_id")
                .eq(Expr::qualified("function_logs_agg", "execution_id")),
        )
    }

    fn columns(&self) -> Projection {
        Projection {
            id: Expr::qualified("fel", "id"),
            timestamp: Expr::qualified("fel", "timestamp"),
            status: status_string(Expr::qualified("fel_response", "status_code")),
            path: Expr::qualified("fel_request", "pathname"),
            host: Expr::qualified("fel_request", "host"),
            event_message: Expr::call(
                Func::Coalesce,
                vec![
                    Expr::qualified("function_logs_agg", "last_event_message"),
                    Expr::string(""),
                ],
            ),
            method: Expr::qualified("fel_request", "method"),
            api_role: Expr::qualified("authorization_payload", "role"),
            auth_user: Expr::qualified("sb", "auth_user"),
            log_count: Expr::qualified("function_logs_agg", "function_log_count"),
            logs: Expr::qualified("function_logs_agg", "logs"),
        }
    }

    fn level_rule(&self) -> &LevelRule {
        &self.rule
    }
}

/// Auth service logs, correlated with the edge request that carried them.
///
/// The outer join tolerates an auth event with no matching edge request;
/// such rows keep their own timestamp and a null status. Rows without a
/// `request_id` are dropped by the guard, a known gap carried over from the
/// correlation scheme.
pub struct AuthAdapter {
    rule: LevelRule,
}

impl Default for AuthAdapter {
    fn default() -> Self {
        Self {
            rule: LevelRule::status_bands(Expr::qualified("el_in_al_response", "status_code")),
        }
    }
}

impl SourceAdapter for AuthAdapter {
    fn source(&self) -> SourceType {
        SourceType::Auth
    }

    fn from_clause(&self) -> FromClause {
        let edge = FromClause::new(TableRef::table("edge_logs", "el_in_al"))
            .cross_join(TableRef::unnest(
                Expr::qualified("el_in_al", "metadata"),
                "el_in_al_metadata",
            ))
            .cross_join(TableRef::unnest(
                Expr::qualified("el_in_al_metadata", "response"),
                "el_in_al_response",
            ))
            .cross_join(TableRef::unnest(
                Expr::qualified("el_in_al_response", "headers"),
                "el_in_al_response_headers",
            ))
            .cross_join(TableRef::unnest(
                Expr::qualified("el_in_al_metadata", "request"),
                "el_in_al_request",
            ));
        FromClause::new(TableRef::table("auth_logs", "al"))
            .cross_join(TableRef::unnest(Expr::qualified("al", "metadata"), "al_metadata"))
            .left_join_on(
                TableRef::Group(Box::new(jwt_joins(edge, "el_in_al_request"))),
                Expr::qualified("al_metadata", "request_id")
                    .eq(Expr::qualified("el_in_al_response_headers", "cf_ray")),
            )
    }

    fn columns(&self) -> Projection {
        Projection {
            id: Expr::qualified("al", "id"),
            timestamp: Expr::call(
                Func::Coalesce,
                vec![
                    Expr::qualified("el_in_al", "timestamp"),
                    Expr::qualified("al", "timestamp"),
                ],
            ),
            status: status_string(Expr::qualified("el_in_al_response", "status_code")),
            path: Expr::qualified("el_in_al_request", "path"),
            host: Expr::qualified("el_in_al_request", "host"),
            event_message: Expr::qualified("al", "event_message"),
            method: Expr::qualified("el_in_al_request", "method"),
            api_role: Expr::qualified("authorization_payload", "role"),
            auth_user: Expr::qualified("sb", "auth_user"),
            log_count: Expr::null(),
            logs: Expr::null(),
        }
    }

    fn level_rule(&self) -> &LevelRule {
        &self.rule
    }

    fn guard(&self) -> Option<Expr> {
        Some(Expr::qualified("al_metadata", "request_id").is_not_null())
    }
}

/// Connection pooler logs, classified by a free-form level string.
pub struct SupavisorAdapter {
    rule: LevelRule,
}

impl Default for SupavisorAdapter {
    fn default() -> Self {
        Self {
            rule: LevelRule::Severity {
                column: Expr::qualified("svl_metadata", "level"),
                warning: &["warn", "warning"],
                error: &["error"],
                case_insensitive: true,
            },
        }
    }
}

impl SourceAdapter for SupavisorAdapter {
    fn source(&self) -> SourceType {
        SourceType::Supavisor
    }

    fn from_clause(&self) -> FromClause {
        FromClause::new(TableRef::table("supavisor_logs", "svl"))
            .cross_join(TableRef::unnest(Expr::qualified("svl", "metadata"), "svl_metadata"))
    }

    fn columns(&self) -> Projection {
        Projection {
            id: Expr::qualified("svl", "id"),
            timestamp: Expr::qualified("svl", "timestamp"),
            status: Expr::null(),
            path: Expr::null(),
            host: Expr::null(),
            event_message: Expr::qualified("svl", "event_message"),
            method: Expr::null(),
            api_role: Expr::null(),
            auth_user: Expr::null(),
            log_count: Expr::null(),
            logs: Expr::null(),
        }
    }

    fn level_rule(&self) -> &LevelRule {
        &self.rule
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Adapters keyed by source. Iteration order is the [`SourceType`] order, so
/// the rendered union is deterministic.
#[derive(Clone, Default)]
pub struct SourceRegistry {
    adapters: BTreeMap<SourceType, Arc<dyn SourceAdapter>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_sources() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(EdgeRequestAdapter::edge()));
        registry.register(Arc::new(EdgeRequestAdapter::postgrest()));
        registry.register(Arc::new(EdgeRequestAdapter::storage()));
        registry.register(Arc::new(PostgresAdapter::default()));
        registry.register(Arc::new(EdgeFunctionAdapter::default()));
        registry.register(Arc::new(AuthAdapter::default()));
        registry.register(Arc::new(SupavisorAdapter::default()));
        registry
    }

    /// Register an adapter, replacing any previous one for the same source.
    pub fn register(&mut self, adapter: Arc<dyn SourceAdapter>) {
        self.adapters.insert(adapter.source(), adapter);
    }

    pub fn get(&self, source: SourceType) -> Option<&Arc<dyn SourceAdapter>> {
        self.adapters.get(&source)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn SourceAdapter>> {
        self.adapters.values()
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    /// Whether any registered source produces `field`.
    pub fn maps(&self, field: Field) -> bool {
        self.adapters.values().any(|adapter| adapter.maps(field))
    }

    /// The `UNION ALL` of every adapter's projection.
    ///
    /// With `levels`, each branch is additionally restricted to that source's
    /// native condition for those levels. A source mapping none of them gets
    /// `WHERE FALSE`.
    pub fn unified_relation(&self, levels: Option<&BTreeSet<Level>>) -> Query {
        let branches = self
            .adapters
            .values()
            .map(|adapter| {
                let mut select = adapter.projection();
                if let Some(levels) = levels.filter(|l| !l.is_empty()) {
                    select = select.and_where(
                        adapter
                            .level_predicate(levels)
                            .unwrap_or_else(|| Expr::bool(false)),
                    );
                }
                Query::from(select)
            })
            .collect();
        Query::UnionAll(branches)
    }
}

impl fmt::Debug for SourceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.adapters.keys()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::{render, BigQuery, Statement};

    fn render_query(query: Query) -> String {
        let body = Select::from(FromClause::new(TableRef::cte("unified_logs"))).column(Expr::Star);
        let stmt = Statement::new(body).with(Ident::new("unified_logs"), query);
        render(&stmt, &BigQuery).unwrap()
    }

    #[test]
    fn test_source_type_aliases() {
        assert_eq!("rest-api".parse::<SourceType>().unwrap(), SourceType::Postgrest);
        assert_eq!("Edge Function".parse::<SourceType>().unwrap(), SourceType::EdgeFunction);
        assert_eq!("pooler".parse::<SourceType>().unwrap(), SourceType::Supavisor);
        assert!("kafka".parse::<SourceType>().is_err());
    }

    #[test]
    fn test_default_registry_covers_every_source() {
        let registry = SourceRegistry::with_default_sources();
        assert_eq!(registry.len(), SourceType::ALL.len());
        for source in SourceType::ALL {
            assert_eq!(registry.get(source).unwrap().source(), source);
        }
    }

    #[test]
    fn test_projection_emits_unified_columns_in_order() {
        let registry = SourceRegistry::with_default_sources();
        for adapter in registry.iter() {
            let select = adapter.projection();
            let names: Vec<&str> = select
                .projection
                .iter()
                .map(|item| item.alias.as_ref().unwrap().as_str())
                .collect();
            assert_eq!(names, UNIFIED_COLUMNS);
        }
    }

    #[test]
    fn test_field_mapping() {
        let registry = SourceRegistry::with_default_sources();
        let pooler = registry.get(SourceType::Supavisor).unwrap();
        assert!(!pooler.maps(Field::Method));
        assert!(pooler.maps(Field::Level));
        assert!(registry.maps(Field::LogCount));

        let mut only_pooler = SourceRegistry::new();
        only_pooler.register(Arc::new(SupavisorAdapter::default()));
        assert!(!only_pooler.maps(Field::Method));
    }

    #[test]
    fn test_level_filter_applies_inside_each_branch() {
        let registry = SourceRegistry::with_default_sources();
        let levels: BTreeSet<Level> = [Level::Error].into_iter().collect();
        let sql = render_query(registry.unified_relation(Some(&levels)));
        assert!(sql.contains("WHERE edge_logs_request.path LIKE '%/rest/%' AND edge_logs_response.status_code >= 500"));
        assert!(sql.contains("pgl_parsed.error_severity IN ('ERROR', 'FATAL', 'PANIC')"));
        assert!(sql.contains("LOWER(svl_metadata.level) IN ('error')"));
        assert!(sql.contains(
            "WHERE al_metadata.request_id IS NOT NULL AND el_in_al_response.status_code >= 500"
        ));
    }

    #[test]
    fn test_source_without_level_mapping_contributes_no_rows() {
        struct ErrorsOnly(LevelRule);
        impl SourceAdapter for ErrorsOnly {
            fn source(&self) -> SourceType {
                SourceType::Supavisor
            }
            fn from_clause(&self) -> FromClause {
                SupavisorAdapter::default().from_clause()
            }
            fn columns(&self) -> Projection {
                SupavisorAdapter::default().columns()
            }
            fn level_rule(&self) -> &LevelRule {
                &self.0
            }
        }

        let mut registry = SourceRegistry::new();
        registry.register(Arc::new(ErrorsOnly(LevelRule::Severity {
            column: Expr::qualified("svl_metadata", "level"),
            warning: &[],
            error: &["error"],
            case_insensitive: false,
        })));
        let levels: BTreeSet<Level> = [Level::Warning].into_iter().collect();
        let sql = render_query(registry.unified_relation(Some(&levels)));
        assert!(sql.contains("FROM supavisor_logs AS svl\nCROSS JOIN UNNEST(svl.metadata) AS svl_metadata\nWHERE FALSE"));
    }

    #[test]
    fn test_auth_join_is_outer_and_correlated() {
        let registry = SourceRegistry::with_default_sources();
        let auth = registry.get(SourceType::Auth).unwrap();
        let sql = render_query(Query::from(auth.projection()));
        assert!(sql.contains("LEFT JOIN (edge_logs AS el_in_al"));
        assert!(sql.contains("ON al_metadata.request_id = el_in_al_response_headers.cf_ray"));
        assert!(sql.contains("COALESCE(el_in_al.timestamp, al.timestamp) AS timestamp"));
    }

    #[test]
    fn test_function_logs_are_pre_aggregated() {
        let registry = SourceRegistry::with_default_sources();
        let functions = registry.get(SourceType::EdgeFunction).unwrap();
        let sql = render_query(Query::from(functions.projection()));
        assert!(sql.contains("GROUP BY fl_metadata.execution_id\n) AS function_logs_agg ON fel_metadata.execution_id = function_logs_agg.execution_id"));
        assert!(sql.contains("function_logs_agg.function_log_count AS log_count"));
    }
}
