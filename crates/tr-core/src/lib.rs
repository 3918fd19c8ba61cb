//! # tr-core: the "Model" of TRIBUTARY
//!
//! The unified log query engine. Several independent subsystems (edge proxy,
//! REST API, database, auth, storage, edge functions, connection pooler) each
//! write to their own log table. This crate folds them into one virtual
//! relation and compiles a single [`FilterState`] into the three query shapes
//! a log explorer needs: the row page, the facet counts and the histogram.
//!
//! Nothing in here performs I/O. Every operation is a pure function of its
//! inputs plus an explicit `now`, so the orchestration layer can dispatch the
//! three shapes concurrently against one immutable snapshot.
//!
//! ```text
//! FilterState ──► compile(Rows | Facets | Histogram) ──► SQL + ISO window
//!                        │                                   │
//!              SourceRegistry (UNION ALL)            external engine
//!                                                            │
//!    LogsPage ◄── derive_cursors / build_facets / fill_gaps ◄┘
//! ```

pub mod compile;
pub mod error;
pub mod facets;
pub mod filter;
pub mod histogram;
pub mod level;
pub mod page;
pub mod pagination;
pub mod row;
pub mod sources;
pub mod sql;

pub use compile::{compile, CompiledQuery, Compiler, QueryBatch, QueryShape};
pub use error::{CompileError, CursorDecodeError, EngineError, ExecutionError, FilterError};
pub use facets::{build_facets, FacetResult, FacetSummary, FacetTriple, FacetValue};
pub use filter::{Field, FilterState, Predicate, Sort, SortKey, TimeRange};
pub use histogram::{
    bucket_count, buckets_from_rows, choose_granularity, fill_gaps, Granularity, HistogramBucket,
};
pub use level::{Level, LevelRule};
pub use page::{LogsPage, PageMeta};
pub use pagination::{
    derive_cursors, has_more, live_anchor, resolve_window, Cursor, Direction, PageCursors,
    PageRequest, Window,
};
pub use row::{ChildLog, UnifiedRow};
pub use sources::{SourceAdapter, SourceRegistry, SourceType};
