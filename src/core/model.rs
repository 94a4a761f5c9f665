// LogQuest - core/model.rs
//
// Core data model types. Pure data definitions with no I/O and no
// threading; shared vocabulary between the engine, the store, the
// dispatcher, and whatever presentation layer reads the store.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =============================================================================
// Result payloads
// =============================================================================

/// Key of a tuple group. All tuples in a group share one descriptor.
pub type GroupKey = String;

/// One result row: column values in descriptor order.
pub type Tuple = Vec<serde_json::Value>;

/// Engine-reported progress/statistics. Opaque to the store; last write wins.
pub type Stats = serde_json::Value;

/// Type of a descriptor column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Time,
    String,
    Uint64,
    Int64,
    Float64,
    Bool,
}

impl ColumnType {
    pub fn label(&self) -> &'static str {
        match self {
            ColumnType::Time => "time",
            ColumnType::String => "string",
            ColumnType::Uint64 => "uint64",
            ColumnType::Int64 => "int64",
            ColumnType::Float64 => "float64",
            ColumnType::Bool => "bool",
        }
    }
}

/// A named, typed column within a descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ColumnType,
}

impl Column {
    pub fn new(name: impl Into<String>, kind: ColumnType) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// Schema/shape metadata describing one tuple group.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Descriptor {
    /// Columns in tuple order.
    pub columns: Vec<Column>,

    /// Where the group's tuples came from (a file path for the local engine).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl Descriptor {
    /// Column names in order, for headers.
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }
}

/// Full accumulated result state of a session.
///
/// An empty snapshot is two empty maps, never an absent field.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ResultSnapshot {
    pub tuples: BTreeMap<GroupKey, Vec<Tuple>>,
    pub descriptor: BTreeMap<GroupKey, Descriptor>,
}

impl ResultSnapshot {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Total number of tuples across all groups.
    pub fn tuple_count(&self) -> usize {
        self.tuples.values().map(Vec::len).sum()
    }

    /// True when neither tuples nor descriptors have been observed.
    pub fn is_empty(&self) -> bool {
        self.tuples.is_empty() && self.descriptor.is_empty()
    }
}

/// An incremental batch delivered by the engine mid-stream.
///
/// Any subset of the three parts may be present in a chunk.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PartialResults {
    #[serde(default)]
    pub tuples: BTreeMap<GroupKey, Vec<Tuple>>,
    #[serde(default)]
    pub descriptor: BTreeMap<GroupKey, Descriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<Stats>,
}

impl PartialResults {
    /// A chunk carrying only a stats update.
    pub fn stats(stats: Stats) -> Self {
        Self {
            stats: Some(stats),
            ..Default::default()
        }
    }

    /// True when the chunk carries tuples or descriptors to merge.
    pub fn has_results(&self) -> bool {
        !self.tuples.is_empty() || !self.descriptor.is_empty()
    }

    /// True when the chunk carries nothing at all.
    pub fn is_empty(&self) -> bool {
        !self.has_results() && self.stats.is_none()
    }
}

// =============================================================================
// Session
// =============================================================================

/// Session status. `Pending -> Running -> {Done, Error}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum SessionStatus {
    /// Registered; no engine acknowledgement yet.
    #[default]
    Pending,
    /// The engine accepted the query and is streaming.
    Running,
    /// The stream ended, or the caller cancelled it.
    Done,
    /// The engine reported a failure.
    Error,
}

impl SessionStatus {
    pub fn label(&self) -> &'static str {
        match self {
            SessionStatus::Pending => "PENDING",
            SessionStatus::Running => "RUNNING",
            SessionStatus::Done => "DONE",
            SessionStatus::Error => "ERROR",
        }
    }

    /// Done and Error have no outgoing transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Done | SessionStatus::Error)
    }

    fn rank(&self) -> u8 {
        match self {
            SessionStatus::Pending => 0,
            SessionStatus::Running => 1,
            SessionStatus::Done | SessionStatus::Error => 2,
        }
    }

    /// Whether moving from `prev` to `self` is a forward step of the state
    /// machine. Re-asserting a non-terminal state counts as forward.
    pub fn follows(&self, prev: SessionStatus) -> bool {
        if prev.is_terminal() {
            return false;
        }
        self.rank() >= prev.rank()
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Which engine operation a search is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SearchTarget {
    /// Full-text search over a time span.
    #[default]
    Events,
    /// Index-pattern search, no time span.
    Index,
}

/// Half-open time window `[from, to)` for event searches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl Span {
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self { from, to }
    }

    /// The `hours` leading up to now.
    pub fn last_hours(hours: i64) -> Self {
        let to = Utc::now();
        Self {
            from: to - Duration::hours(hours),
            to,
        }
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.from && ts < self.to
    }
}

/// One named, trackable search and its accumulated state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Unique key, stable for the session's lifetime.
    pub name: String,

    /// The search expression submitted.
    pub program: String,

    /// Which engine operation produced this session.
    #[serde(default)]
    pub target: SearchTarget,

    pub status: SessionStatus,

    /// Last stats payload reported by the engine (`null` until the first).
    #[serde(default)]
    pub stats: Stats,

    pub results: ResultSnapshot,

    /// Grouping label used for bulk clearing (e.g. the originating view).
    #[serde(default)]
    pub tag: Option<String>,

    /// Engine failure message when `status` is `Error`.
    #[serde(default)]
    pub error: Option<String>,
}

impl Session {
    /// A fresh `Pending` session with empty results.
    pub fn new(name: impl Into<String>, program: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            target: SearchTarget::default(),
            status: SessionStatus::Pending,
            stats: Stats::Null,
            results: ResultSnapshot::empty(),
            tag: None,
            error: None,
        }
    }

    pub fn with_tag(mut self, tag: Option<String>) -> Self {
        self.tag = tag;
        self
    }

    pub fn with_target(mut self, target: SearchTarget) -> Self {
        self.target = target;
        self
    }
}
