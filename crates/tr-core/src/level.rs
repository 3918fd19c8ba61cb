//! # Level Classification
//!
//! `level` is not a physical column. Every source derives it from its own
//! native signal (an HTTP status code, a severity string) and each source
//! carries one [`LevelRule`] describing that mapping. The same rule value
//! renders the projection `CASE` and the per-branch filter predicate, so the
//! two can never disagree. Rows take their level from the projected column;
//! [`LevelRule::classify`] is the in-process reading of the rule that both
//! renderings are checked against.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::FilterError;
use crate::sql::{BinOp, Expr, Func, Literal};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Success,
    Warning,
    Error,
}

impl Level {
    pub const ALL: [Level; 3] = [Level::Success, Level::Warning, Level::Error];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Level {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "success" => Ok(Self::Success),
            "warning" => Ok(Self::Warning),
            "error" => Ok(Self::Error),
            _ => Err(FilterError::invalid(
                "level",
                s,
                "expected one of success, warning, error",
            )),
        }
    }
}

/// How one source maps its native signal onto [`Level`].
#[derive(Debug, Clone, PartialEq)]
pub enum LevelRule {
    /// Integer HTTP status: `>= 500` error, `400..=499` warning, anything
    /// else (including a missing status) success.
    StatusBands { column: Expr },

    /// A severity string matched against fixed lists. Values in neither list,
    /// and missing values, are success. An empty list means the source has no
    /// mapping for that level.
    Severity {
        column: Expr,
        warning: &'static [&'static str],
        error: &'static [&'static str],
        case_insensitive: bool,
    },
}

impl LevelRule {
    pub fn status_bands(column: Expr) -> Self {
        Self::StatusBands { column }
    }

    /// The rule's name for diagnostics (`/api/sources`).
    pub fn kind(&self) -> &'static str {
        match self {
            Self::StatusBands { .. } => "status_bands",
            Self::Severity { .. } => "severity",
        }
    }

    /// Boolean expression selecting rows of `level`, or `None` when this
    /// source has no mapping for it.
    pub fn condition(&self, level: Level) -> Option<Expr> {
        match self {
            Self::StatusBands { column } => Some(match level {
                Level::Error => column.clone().binary(BinOp::Gte, Expr::int(500)),
                Level::Warning => column
                    .clone()
                    .between(Literal::Int(400), Literal::Int(499)),
                Level::Success => Expr::Or(vec![
                    column.clone().is_null(),
                    column.clone().binary(BinOp::Lt, Expr::int(400)),
                ]),
            }),
            Self::Severity {
                warning, error, ..
            } => {
                let subject = self.severity_subject();
                match level {
                    Level::Error if error.is_empty() => None,
                    Level::Warning if warning.is_empty() => None,
                    Level::Error => Some(subject.in_list(literals(error))),
                    Level::Warning => Some(subject.in_list(literals(warning))),
                    Level::Success => {
                        let flagged: Vec<Literal> = literals(warning)
                            .into_iter()
                            .chain(literals(error))
                            .collect();
                        if flagged.is_empty() {
                            return Some(Expr::bool(true));
                        }
                        Some(Expr::Or(vec![
                            subject.clone().is_null(),
                            subject.not_in_list(flagged),
                        ]))
                    }
                }
            }
        }
    }

    /// OR of the conditions for every requested level this source maps.
    /// `None` when none of them are mapped.
    pub fn predicate(&self, levels: &BTreeSet<Level>) -> Option<Expr> {
        let parts: Vec<Expr> = levels
            .iter()
            .filter_map(|level| self.condition(*level))
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(Expr::or_any(parts))
        }
    }

    /// The projection's `level` column.
    pub fn case_expr(&self) -> Expr {
        let mut branches = Vec::new();
        for level in [Level::Error, Level::Warning] {
            if let Some(cond) = self.condition(level) {
                branches.push((cond, Expr::string(level.as_str())));
            }
        }
        if branches.is_empty() {
            return Expr::string(Level::Success.as_str());
        }
        Expr::Case {
            branches,
            otherwise: Box::new(Expr::string(Level::Success.as_str())),
        }
    }

    /// Classify a raw native value the way [`case_expr`](Self::case_expr) would.
    pub fn classify(&self, raw: Option<&str>) -> Level {
        match self {
            Self::StatusBands { .. } => match raw.and_then(|s| s.trim().parse::<i64>().ok()) {
                Some(code) if code >= 500 => Level::Error,
                Some(code) if (400..=499).contains(&code) => Level::Warning,
                _ => Level::Success,
            },
            Self::Severity {
                warning,
                error,
                case_insensitive,
                ..
            } => {
                let Some(raw) = raw else {
                    return Level::Success;
                };
                let matches = |list: &[&str]| {
                    list.iter().any(|candidate| {
                        if *case_insensitive {
                            candidate.eq_ignore_ascii_case(raw)
                        } else {
                            *candidate == raw
                        }
                    })
                };
                if matches(*error) {
                    Level::Error
                } else if matches(*warning) {
                    Level::Warning
                } else {
                    Level::Success
                }
            }
        }
    }

    fn severity_subject(&self) -> Expr {
        match self {
            Self::Severity {
                column,
                case_insensitive: true,
                ..
            } => Expr::call(Func::Lower, vec![column.clone()]),
            Self::Severity { column, .. } | Self::StatusBands { column } => column.clone(),
        }
    }
}

fn literals(values: &[&str]) -> Vec<Literal> {
    values.iter().map(|v| Literal::str(*v)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::{render, BigQuery, FromClause, Select, Statement, TableRef};

    fn status_rule() -> LevelRule {
        LevelRule::status_bands(Expr::qualified("resp", "status_code"))
    }

    fn pg_rule() -> LevelRule {
        LevelRule::Severity {
            column: Expr::qualified("parsed", "error_severity"),
            warning: &["WARNING"],
            error: &["ERROR", "FATAL", "PANIC"],
            case_insensitive: false,
        }
    }

    fn render_where(expr: Expr) -> String {
        let select = Select::from(FromClause::new(TableRef::cte("t")))
            .column(Expr::Star)
            .and_where(expr);
        let sql = render(&Statement::new(select), &BigQuery).unwrap();
        sql.split("WHERE ").nth(1).unwrap().to_string()
    }

    #[test]
    fn test_level_parse() {
        assert_eq!("Warning".parse::<Level>().unwrap(), Level::Warning);
        assert!("fatal".parse::<Level>().is_err());
    }

    #[test]
    fn test_status_band_classification() {
        let rule = status_rule();
        assert_eq!(rule.classify(Some("200")), Level::Success);
        assert_eq!(rule.classify(Some("302")), Level::Success);
        assert_eq!(rule.classify(Some("404")), Level::Warning);
        assert_eq!(rule.classify(Some("503")), Level::Error);
        assert_eq!(rule.classify(None), Level::Success);
        assert_eq!(rule.classify(Some("n/a")), Level::Success);
    }

    #[test]
    fn test_severity_classification() {
        let rule = pg_rule();
        assert_eq!(rule.classify(Some("LOG")), Level::Success);
        assert_eq!(rule.classify(Some("WARNING")), Level::Warning);
        assert_eq!(rule.classify(Some("FATAL")), Level::Error);

        let pooler = LevelRule::Severity {
            column: Expr::qualified("m", "level"),
            warning: &["warn", "warning"],
            error: &["error"],
            case_insensitive: true,
        };
        assert_eq!(pooler.classify(Some("WARN")), Level::Warning);
        assert_eq!(pooler.classify(Some("Error")), Level::Error);
        assert_eq!(pooler.classify(Some("info")), Level::Success);
    }

    #[test]
    fn test_predicate_renders_native_boundaries() {
        let levels: BTreeSet<Level> = [Level::Warning, Level::Error].into_iter().collect();
        let sql = render_where(status_rule().predicate(&levels).unwrap());
        assert_eq!(
            sql,
            "resp.status_code BETWEEN 400 AND 499 OR resp.status_code >= 500"
        );

        let sql = render_where(pg_rule().predicate(&levels).unwrap());
        assert_eq!(
            sql,
            "parsed.error_severity IN ('WARNING') OR parsed.error_severity IN ('ERROR', 'FATAL', 'PANIC')"
        );
    }

    #[test]
    fn test_unmapped_level_yields_no_clause() {
        let rule = LevelRule::Severity {
            column: Expr::column("severity"),
            warning: &[],
            error: &["ERROR"],
            case_insensitive: false,
        };
        let only_warning: BTreeSet<Level> = [Level::Warning].into_iter().collect();
        assert!(rule.predicate(&only_warning).is_none());
        assert!(rule.predicate(&BTreeSet::new()).is_none());
    }

    /// Evaluates a level condition against one native value, SQL style:
    /// comparisons with NULL are false.
    fn eval(expr: &Expr, raw: Option<&str>) -> bool {
        fn value(expr: &Expr, raw: Option<&str>) -> Option<String> {
            match expr {
                Expr::Column(_) | Expr::Qualified(..) => raw.map(str::to_string),
                Expr::Call { func: Func::Lower, args } => value(&args[0], raw).map(|v| v.to_lowercase()),
                Expr::Lit(Literal::Str(s)) => Some(s.clone()),
                Expr::Lit(Literal::Int(n)) => Some(n.to_string()),
                other => panic!("unexpected operand {:?}", other),
            }
        }
        fn int(lit: &Literal) -> i64 {
            match lit {
                Literal::Int(n) => *n,
                other => panic!("expected int, got {:?}", other),
            }
        }
        match expr {
            Expr::Lit(Literal::Bool(b)) => *b,
            Expr::Or(parts) => parts.iter().any(|p| eval(p, raw)),
            Expr::And(parts) => parts.iter().all(|p| eval(p, raw)),
            Expr::IsNull { expr, negated } => value(expr, raw).is_none() != *negated,
            Expr::In { expr, list, negated } => match value(expr, raw) {
                Some(v) => list.iter().any(|l| *l == Literal::Str(v.clone())) != *negated,
                None => false,
            },
            Expr::Between { expr, low, high } => value(expr, raw)
                .and_then(|v| v.parse::<i64>().ok())
                .is_some_and(|v| v >= int(low) && v <= int(high)),
            Expr::Binary { left, op, right } => {
                let (Some(l), Some(r)) = (value(left, raw), value(right, raw)) else {
                    return false;
                };
                let (Ok(l), Ok(r)) = (l.parse::<i64>(), r.parse::<i64>()) else {
                    return false;
                };
                match op {
                    BinOp::Lt => l < r,
                    BinOp::Gte => l >= r,
                    BinOp::Eq => l == r,
                    other => panic!("unexpected operator {:?}", other),
                }
            }
            other => panic!("unexpected condition {:?}", other),
        }
    }

    fn level_subsets() -> Vec<BTreeSet<Level>> {
        (1u8..8)
            .map(|mask| {
                Level::ALL
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| mask & (1 << i) != 0)
                    .map(|(_, level)| *level)
                    .collect()
            })
            .collect()
    }

    #[test]
    fn test_predicate_selects_exactly_the_classified_rows() {
        let pooler = LevelRule::Severity {
            column: Expr::qualified("m", "level"),
            warning: &["warn", "warning"],
            error: &["error"],
            case_insensitive: true,
        };
        let cases: [(LevelRule, &[Option<&str>]); 3] = [
            (
                status_rule(),
                &[None, Some("100"), Some("200"), Some("399"), Some("400"), Some("499"), Some("500"), Some("503")],
            ),
            (
                pg_rule(),
                &[None, Some("LOG"), Some("NOTICE"), Some("WARNING"), Some("ERROR"), Some("FATAL"), Some("PANIC")],
            ),
            (pooler, &[None, Some("info"), Some("WARN"), Some("warning"), Some("Error")]),
        ];
        for (rule, values) in &cases {
            for levels in level_subsets() {
                let predicate = rule.predicate(&levels).unwrap();
                for raw in *values {
                    assert_eq!(
                        eval(&predicate, *raw),
                        levels.contains(&rule.classify(*raw)),
                        "{:?} with {:?} on {:?}",
                        rule.kind(),
                        levels,
                        raw
                    );
                }
            }
        }
    }

    #[test]
    fn test_rules_compare_by_value() {
        assert_eq!(status_rule(), status_rule());
        assert_ne!(status_rule(), pg_rule());
        assert_ne!(
            status_rule(),
            LevelRule::status_bands(Expr::qualified("fel_response", "status_code"))
        );
    }

    #[test]
    fn test_case_agrees_with_classify() {
        let rule = status_rule();
        let sql = render_where(rule.case_expr());
        assert!(sql.starts_with("CASE WHEN resp.status_code >= 500 THEN 'error'"));
        assert!(sql.ends_with("ELSE 'success' END"));
    }
}
