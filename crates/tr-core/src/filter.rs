//! # Filter State
//!
//! [`FilterState`] is the canonical query intent: field predicates, the time
//! window, sort, page size, the pagination step and the live-tail flag. It is
//! treated as an immutable snapshot once handed to the compiler.
//!
//! Control parameters (`sort`, `cursor`, `direction`, `live`, `size`, ...) are
//! first-class fields. Predicates are keyed by [`Field`], and `Field` cannot
//! name a control key, so "filter on column X" and "control parameter X" can
//! never be confused.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::FilterError;
use crate::level::Level;
use crate::pagination::{Cursor, Direction, PageRequest};
use crate::sources::SourceType;
use crate::sql::{Expr, Literal, SqlType};

pub const DEFAULT_PAGE_SIZE: u32 = 50;

/// Query-string keys that steer the engine rather than filter rows.
pub const CONTROL_KEYS: [&str; 11] = [
    "sort",
    "cursor",
    "direction",
    "live",
    "size",
    "start",
    "uuid",
    "id",
    "date",
    "dateStart",
    "dateEnd",
];

const ARRAY_DELIMITER: char = ',';
const RANGE_DELIMITER: char = '-';
const SORT_DELIMITER: char = '.';

// =============================================================================
// Fields and predicates
// =============================================================================

/// A filterable column of the unified relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Level,
    LogType,
    Status,
    Method,
    Path,
    Host,
    EventMessage,
    ApiRole,
    AuthUser,
    LogCount,
}

impl Field {
    pub const ALL: [Field; 10] = [
        Field::Level,
        Field::LogType,
        Field::Status,
        Field::Method,
        Field::Path,
        Field::Host,
        Field::EventMessage,
        Field::ApiRole,
        Field::AuthUser,
        Field::LogCount,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Level => "level",
            Self::LogType => "log_type",
            Self::Status => "status",
            Self::Method => "method",
            Self::Path => "path",
            Self::Host => "host",
            Self::EventMessage => "event_message",
            Self::ApiRole => "api_role",
            Self::AuthUser => "auth_user",
            Self::LogCount => "log_count",
        }
    }

    /// Accepts `min-max` range predicates.
    pub fn supports_range(self) -> bool {
        matches!(self, Self::Status | Self::LogCount)
    }

    /// Scalar values match as substrings rather than by equality.
    pub fn is_text_search(self) -> bool {
        matches!(self, Self::Path | Self::Host | Self::EventMessage)
    }

    fn is_integer(self) -> bool {
        matches!(self, Self::LogCount)
    }

    /// The column on the unified relation.
    pub fn column(self) -> Expr {
        Expr::column(self.as_str())
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Field {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if CONTROL_KEYS.contains(&s) {
            return Err(FilterError::ReservedKey(s.to_string()));
        }
        match s {
            "level" => Ok(Self::Level),
            "log_type" | "source" | "source_type" => Ok(Self::LogType),
            "status" => Ok(Self::Status),
            "method" => Ok(Self::Method),
            "path" | "pathname" => Ok(Self::Path),
            "host" => Ok(Self::Host),
            "event_message" => Ok(Self::EventMessage),
            "api_role" => Ok(Self::ApiRole),
            "auth_user" => Ok(Self::AuthUser),
            "log_count" => Ok(Self::LogCount),
            _ => Err(FilterError::UnknownField(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    Exact(String),
    /// Any of the values.
    OneOf(Vec<String>),
    /// Closed interval.
    Range { min: i64, max: i64 },
    /// Free-text substring.
    Text(String),
}

impl Predicate {
    fn kind(&self) -> &'static str {
        match self {
            Self::Exact(_) => "exact",
            Self::OneOf(_) => "set",
            Self::Range { .. } => "range",
            Self::Text(_) => "text",
        }
    }

    fn values(&self) -> &[String] {
        match self {
            Self::Exact(v) | Self::Text(v) => std::slice::from_ref(v),
            Self::OneOf(vs) => vs,
            Self::Range { .. } => &[],
        }
    }

    /// Checks the predicate kind and its values against `field`.
    pub fn validate(&self, field: Field) -> Result<(), FilterError> {
        let unsupported = || FilterError::UnsupportedPredicate {
            field: field.as_str().to_string(),
            kind: self.kind(),
        };
        match self {
            Self::Range { min, max } => {
                if !field.supports_range() {
                    return Err(unsupported());
                }
                if min > max {
                    return Err(FilterError::invalid(
                        field.as_str(),
                        &format!("{}-{}", min, max),
                        "range minimum exceeds maximum",
                    ));
                }
            }
            Self::Text(_) if matches!(field, Field::Level | Field::LogType | Field::LogCount) => {
                return Err(unsupported());
            }
            Self::OneOf(values) if values.is_empty() => {
                return Err(FilterError::invalid(field.as_str(), "", "empty value list"));
            }
            _ => {}
        }
        for value in self.values() {
            match field {
                Field::Level => {
                    value.parse::<Level>()?;
                }
                Field::LogType => {
                    value.parse::<SourceType>()?;
                }
                Field::LogCount => {
                    value.trim().parse::<i64>().map_err(|_| {
                        FilterError::invalid(field.as_str(), value, "expected an integer")
                    })?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Condition on the unified relation. Level predicates are expanded per
    /// source by the compiler instead.
    pub fn to_expr(&self, field: Field) -> Result<Expr, FilterError> {
        self.validate(field)?;
        let column = field.column();
        Ok(match self {
            Self::Exact(value) if field.is_text_search() => column.contains(value),
            Self::Exact(value) => column.eq(Expr::Lit(literal_for(field, value)?)),
            Self::OneOf(values) => column.in_list(
                values
                    .iter()
                    .map(|v| literal_for(field, v))
                    .collect::<Result<_, _>>()?,
            ),
            Self::Range { min, max } => column
                .cast(SqlType::Int64)
                .between(Literal::Int(*min), Literal::Int(*max)),
            Self::Text(text) => column.contains(text),
        })
    }
}

fn literal_for(field: Field, value: &str) -> Result<Literal, FilterError> {
    if field.is_integer() {
        return value
            .trim()
            .parse::<i64>()
            .map(Literal::Int)
            .map_err(|_| FilterError::invalid(field.as_str(), value, "expected an integer"));
    }
    if field == Field::LogType {
        return Ok(Literal::str(value.parse::<SourceType>()?.as_str()));
    }
    Ok(Literal::str(value))
}

// =============================================================================
// Time range and sort
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, FilterError> {
        if start > end {
            return Err(FilterError::InvalidRange {
                start: start.to_rfc3339(),
                end: end.to_rfc3339(),
            });
        }
        Ok(Self { start, end })
    }

    /// The default window: the hour before `now`.
    pub fn last_hour(now: DateTime<Utc>) -> Self {
        Self {
            start: now - Duration::hours(1),
            end: now,
        }
    }

    pub fn from_millis(start_ms: i64, end_ms: i64) -> Result<Self, FilterError> {
        let to_instant = |ms: i64| {
            DateTime::<Utc>::from_timestamp_millis(ms)
                .ok_or_else(|| FilterError::invalid("date", &ms.to_string(), "out of range"))
        };
        Self::new(to_instant(start_ms)?, to_instant(end_ms)?)
    }

    pub fn start_micros(&self) -> i64 {
        self.start.timestamp_micros()
    }

    pub fn end_micros(&self) -> i64 {
        self.end.timestamp_micros()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    Timestamp,
    Field(Field),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sort {
    pub key: SortKey,
    pub descending: bool,
}

impl FromStr for Sort {
    type Err = FilterError;

    /// `field.asc` or `field.desc`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, order) = s
            .rsplit_once(SORT_DELIMITER)
            .ok_or_else(|| FilterError::invalid("sort", s, "expected <field>.asc or <field>.desc"))?;
        let descending = match order {
            "asc" => false,
            "desc" => true,
            _ => return Err(FilterError::invalid("sort", s, "order must be asc or desc")),
        };
        let key = match name {
            "timestamp" | "date" => SortKey::Timestamp,
            other => SortKey::Field(other.parse()?),
        };
        Ok(Self { key, descending })
    }
}

// =============================================================================
// Filter state
// =============================================================================

fn default_page_size() -> u32 {
    DEFAULT_PAGE_SIZE
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterState {
    #[serde(default)]
    pub predicates: BTreeMap<Field, Predicate>,
    #[serde(default)]
    pub time_range: Option<TimeRange>,
    #[serde(default)]
    pub sort: Option<Sort>,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default)]
    pub pagination: Option<PageRequest>,
    #[serde(default)]
    pub live_tail: bool,
}

impl Default for FilterState {
    fn default() -> Self {
        Self {
            predicates: BTreeMap::new(),
            time_range: None,
            sort: None,
            page_size: DEFAULT_PAGE_SIZE,
            pagination: None,
            live_tail: false,
        }
    }
}

impl FilterState {
    /// Parse the query-string form: `,`-delimited value lists, `min-max`
    /// ranges, `dateStart`/`dateEnd` in epoch milliseconds, `sort=field.desc`,
    /// `size`, `cursor`, `direction`, `live`.
    ///
    /// A malformed cursor is not an error: it is logged and dropped, which
    /// turns the request into an initial load.
    pub fn from_params<I, K, V>(params: I) -> Result<Self, FilterError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut state = Self::default();
        let mut date_start = None;
        let mut date_end = None;
        let mut cursor = None;
        let mut direction = None;

        for (key, value) in params {
            let (key, value) = (key.as_ref(), value.as_ref().trim());
            match key {
                "dateStart" => date_start = Some(parse_millis(key, value)?),
                "dateEnd" => date_end = Some(parse_millis(key, value)?),
                "date" => {
                    let (start, end) = value.split_once(ARRAY_DELIMITER).ok_or_else(|| {
                        FilterError::invalid(key, value, "expected <startMs>,<endMs>")
                    })?;
                    date_start = Some(parse_millis(key, start.trim())?);
                    date_end = Some(parse_millis(key, end.trim())?);
                }
                "sort" if !value.is_empty() => state.sort = Some(value.parse()?),
                "size" => {
                    state.page_size = value.parse().map_err(|_| {
                        FilterError::invalid(key, value, "expected a positive integer")
                    })?
                }
                "cursor" => match Cursor::decode(value) {
                    Ok(decoded) => cursor = Some(decoded),
                    Err(err) => {
                        tracing::debug!(error = %err, "ignoring cursor, treating as initial load");
                    }
                },
                "direction" => direction = Some(value.parse::<Direction>()?),
                "live" => state.live_tail = parse_flag(key, value)?,
                "sort" | "start" | "uuid" | "id" => {}
                _ => {
                    let field: Field = key.parse()?;
                    if value.is_empty() {
                        continue;
                    }
                    let predicate = parse_predicate(field, value);
                    predicate.validate(field)?;
                    state.predicates.insert(field, predicate);
                }
            }
        }

        state.time_range = match (date_start, date_end) {
            (Some(start), Some(end)) => Some(TimeRange::from_millis(start, end)?),
            (None, None) => None,
            (Some(_), None) => {
                return Err(FilterError::invalid("dateEnd", "", "dateStart given without dateEnd"))
            }
            (None, Some(_)) => {
                return Err(FilterError::invalid("dateStart", "", "dateEnd given without dateStart"))
            }
        };

        if cursor.is_some() || direction.is_some() {
            state.pagination = Some(PageRequest {
                cursor,
                direction: direction.unwrap_or(Direction::Next),
            });
        }

        state.validate()?;
        Ok(state)
    }

    /// Replace or add one predicate, by field name.
    pub fn with_predicate(mut self, field: &str, predicate: Predicate) -> Result<Self, FilterError> {
        let field: Field = field.parse()?;
        predicate.validate(field)?;
        self.predicates.insert(field, predicate);
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), FilterError> {
        if let Some(range) = &self.time_range {
            TimeRange::new(range.start, range.end)?;
        }
        if self.page_size == 0 {
            return Err(FilterError::invalid("size", "0", "page size must be positive"));
        }
        for (field, predicate) in &self.predicates {
            predicate.validate(*field)?;
        }
        Ok(())
    }

    /// Clamp the page size into `1..=max`.
    pub fn clamp_page_size(&mut self, max: u32) {
        self.page_size = self.page_size.clamp(1, max.max(1));
    }

    /// The requested time range, or the hour before `now`.
    pub fn effective_range(&self, now: DateTime<Utc>) -> Result<TimeRange, FilterError> {
        match &self.time_range {
            Some(range) => TimeRange::new(range.start, range.end),
            None => Ok(TimeRange::last_hour(now)),
        }
    }

    /// The requested levels, if a level predicate is present.
    pub fn levels(&self) -> Result<Option<BTreeSet<Level>>, FilterError> {
        let Some(predicate) = self.predicates.get(&Field::Level) else {
            return Ok(None);
        };
        let levels = match predicate {
            Predicate::Exact(v) => [v.parse::<Level>()?].into_iter().collect(),
            Predicate::OneOf(vs) => vs
                .iter()
                .map(|v| v.parse::<Level>())
                .collect::<Result<_, _>>()?,
            other => {
                return Err(FilterError::UnsupportedPredicate {
                    field: Field::Level.as_str().to_string(),
                    kind: other.kind(),
                })
            }
        };
        Ok(Some(levels))
    }

    /// Stable key for stale-response tracking: identical for two states that
    /// compile to the same queries, regardless of the live flag.
    pub fn snapshot_key(&self) -> String {
        let snapshot = Self {
            live_tail: false,
            ..self.clone()
        };
        digest_hex(&snapshot)
    }
}

/// SHA-256 of the JSON form of `value`. A value that cannot be serialized is
/// hashed by its `Debug` form, so distinct values never collapse to one key.
fn digest_hex<T: Serialize + fmt::Debug>(value: &T) -> String {
    let canonical = match serde_json::to_vec(value) {
        Ok(bytes) => bytes,
        Err(err) => {
            tracing::warn!(error = %err, "snapshot not serializable, hashing its debug form");
            format!("{:?}", value).into_bytes()
        }
    };
    format!("{:x}", Sha256::digest(&canonical))
}

fn parse_millis(key: &str, value: &str) -> Result<i64, FilterError> {
    value
        .parse::<i64>()
        .map_err(|_| FilterError::invalid(key, value, "expected epoch milliseconds"))
}

fn parse_flag(key: &str, value: &str) -> Result<bool, FilterError> {
    match value {
        "true" | "1" => Ok(true),
        "false" | "0" | "" => Ok(false),
        _ => Err(FilterError::invalid(key, value, "expected true or false")),
    }
}

fn parse_predicate(field: Field, value: &str) -> Predicate {
    if field.supports_range() {
        if let Some((min, max)) = value.split_once(RANGE_DELIMITER) {
            if let (Ok(min), Ok(max)) = (min.trim().parse(), max.trim().parse()) {
                return Predicate::Range { min, max };
            }
        }
    }
    if value.contains(ARRAY_DELIMITER) {
        let values: Vec<String> = value
            .split(ARRAY_DELIMITER)
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .collect();
        return Predicate::OneOf(values);
    }
    if field.is_text_search() {
        Predicate::Text(value.to_string())
    } else {
        Predicate::Exact(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn params(pairs: &[(&str, &str)]) -> Result<FilterState, FilterError> {
        FilterState::from_params(pairs.iter().copied())
    }

    #[test]
    fn test_parse_full_query_string() {
        let state = params(&[
            ("level", "warning,error"),
            ("status", "400-499"),
            ("pathname", "/rest/v1"),
            ("dateStart", "1704067200000"),
            ("dateEnd", "1704070800000"),
            ("sort", "status.desc"),
            ("size", "25"),
            ("cursor", "1704070000000000"),
            ("direction", "next"),
            ("live", "false"),
            ("uuid", "ignored"),
        ])
        .unwrap();

        assert_eq!(
            state.predicates[&Field::Level],
            Predicate::OneOf(vec!["warning".into(), "error".into()])
        );
        assert_eq!(state.predicates[&Field::Status], Predicate::Range { min: 400, max: 499 });
        assert_eq!(state.predicates[&Field::Path], Predicate::Text("/rest/v1".into()));
        assert_eq!(state.page_size, 25);
        assert_eq!(
            state.sort,
            Some(Sort {
                key: SortKey::Field(Field::Status),
                descending: true
            })
        );
        let range = state.time_range.unwrap();
        assert_eq!(range.start, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        assert_eq!(range.end, Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap());
        let page = state.pagination.unwrap();
        assert_eq!(page.direction, Direction::Next);
        assert_eq!(page.cursor, Some(Cursor::from_micros(1_704_070_000_000_000)));
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let err = params(&[("colour", "red")]).unwrap_err();
        assert_eq!(err, FilterError::UnknownField("colour".into()));
    }

    #[test]
    fn test_control_key_cannot_be_a_predicate() {
        let err = FilterState::default()
            .with_predicate("cursor", Predicate::Exact("1".into()))
            .unwrap_err();
        assert_eq!(err, FilterError::ReservedKey("cursor".into()));
    }

    #[test]
    fn test_invalid_enum_values_are_rejected() {
        assert!(params(&[("level", "fatal")]).is_err());
        assert!(params(&[("log_type", "kafka")]).is_err());
        assert!(params(&[("direction", "sideways")]).is_err());
    }

    #[test]
    fn test_range_only_on_numeric_fields() {
        let err = FilterState::default()
            .with_predicate("method", Predicate::Range { min: 1, max: 2 })
            .unwrap_err();
        assert!(matches!(err, FilterError::UnsupportedPredicate { .. }));
    }

    #[test]
    fn test_inverted_time_range_is_rejected() {
        let err = params(&[("dateStart", "1704070800000"), ("dateEnd", "1704067200000")]).unwrap_err();
        assert!(matches!(err, FilterError::InvalidRange { .. }));
    }

    #[test]
    fn test_half_time_range_is_rejected() {
        assert!(params(&[("dateStart", "1704067200000")]).is_err());
    }

    #[test]
    fn test_malformed_cursor_falls_back_to_initial_load() {
        let state = params(&[("cursor", "yesterday")]).unwrap();
        assert_eq!(state.pagination, None);

        let state = params(&[("cursor", "yesterday"), ("direction", "prev")]).unwrap();
        assert_eq!(
            state.pagination,
            Some(PageRequest {
                cursor: None,
                direction: Direction::Prev
            })
        );
    }

    #[test]
    fn test_log_type_values_are_canonicalized() {
        let state = params(&[("log_type", "rest-api,database")]).unwrap();
        let expr = state.predicates[&Field::LogType].to_expr(Field::LogType).unwrap();
        assert_eq!(
            expr,
            Field::LogType.column().in_list(vec![
                Literal::str("postgrest"),
                Literal::str("postgres")
            ])
        );
    }

    #[test]
    fn test_default_range_is_last_hour() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let range = FilterState::default().effective_range(now).unwrap();
        assert_eq!(range.end, now);
        assert_eq!(range.end - range.start, Duration::hours(1));
    }

    #[test]
    fn test_snapshot_key_ignores_live_flag() {
        let a = params(&[("level", "error"), ("live", "true")]).unwrap();
        let b = params(&[("level", "error")]).unwrap();
        let c = params(&[("level", "warning")]).unwrap();
        assert_eq!(a.snapshot_key(), b.snapshot_key());
        assert_ne!(b.snapshot_key(), c.snapshot_key());
        assert_eq!(b.snapshot_key().len(), 64);
    }

    #[derive(Debug)]
    struct Unserializable(u32);

    impl Serialize for Unserializable {
        fn serialize<S: serde::Serializer>(&self, _: S) -> Result<S::Ok, S::Error> {
            Err(serde::ser::Error::custom("no json form"))
        }
    }

    #[test]
    fn test_unserializable_snapshots_keep_distinct_keys() {
        let a = digest_hex(&Unserializable(1));
        let b = digest_hex(&Unserializable(2));
        assert_ne!(a, b);
        assert_eq!(a, digest_hex(&Unserializable(1)));
        assert_ne!(a, format!("{:x}", Sha256::digest(b"")));
    }

    #[test]
    fn test_page_size_clamp() {
        let mut state = params(&[("size", "5000")]).unwrap();
        state.clamp_page_size(500);
        assert_eq!(state.page_size, 500);
    }
}
