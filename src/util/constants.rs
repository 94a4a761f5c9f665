// LogQuest - util/constants.rs
//
// Single source of truth for all named constants, limits, and defaults.
// Every configurable limit has a default plus hard lower/upper bounds that
// config.toml values are validated against.

// =============================================================================
// Application metadata
// =============================================================================

/// Application display name.
pub const APP_NAME: &str = "LogQuest";

/// Application identifier used for config/data directories.
pub const APP_ID: &str = "LogQuest";

/// Current application version (updated by release script).
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

// =============================================================================
// Query limits
// =============================================================================

/// Maximum length of a search expression in bytes.
/// Longer queries are rejected at compile time rather than sent to the engine.
pub const MAX_QUERY_LENGTH: usize = 8 * 1024; // 8 KB

/// Maximum length of a `/regex/` literal inside a query (ReDoS guard).
pub const MAX_QUERY_REGEX_LENGTH: usize = 1_024;

/// Default width of the search time span when the caller gives no `from`.
pub const DEFAULT_SPAN_HOURS: i64 = 24;

/// Minimum configurable default span (hours).
pub const MIN_SPAN_HOURS: i64 = 1;

/// Maximum configurable default span (hours). One year.
pub const MAX_SPAN_HOURS: i64 = 24 * 366;

// =============================================================================
// Local engine limits
// =============================================================================

/// Maximum directory recursion depth when discovering files inside a space.
pub const DEFAULT_MAX_DEPTH: usize = 10;

/// Hard upper bound on max depth (prevents runaway traversal).
pub const ABSOLUTE_MAX_DEPTH: usize = 50;

/// Maximum number of files searched per space.
pub const DEFAULT_MAX_FILES: usize = 500;

/// Minimum sensible value for the max-files limit.
pub const MIN_MAX_FILES: usize = 1;

/// Hard upper bound on max files.
pub const ABSOLUTE_MAX_FILES: usize = 10_000;

/// Number of matched tuples accumulated before a results chunk is emitted.
pub const DEFAULT_TUPLE_BATCH_SIZE: usize = 500;

/// Minimum configurable tuple batch size.
pub const MIN_TUPLE_BATCH_SIZE: usize = 1;

/// Maximum configurable tuple batch size. Larger batches delay the first
/// visible results without reducing total work.
pub const MAX_TUPLE_BATCH_SIZE: usize = 50_000;

/// How many lines are scanned between cancel-flag checks inside one file.
pub const CANCEL_CHECK_EVERY_LINES: usize = 1_000;

/// File size threshold in bytes above which a file is memory-mapped.
pub const LARGE_FILE_THRESHOLD: u64 = 16 * 1024 * 1024; // 16 MB

/// Maximum length of a single log line kept in a tuple. Longer lines are
/// truncated so one malformed file cannot exhaust memory.
pub const MAX_RECORD_BYTES: usize = 64 * 1024; // 64 KB

/// Default include glob patterns for files inside a space.
pub const DEFAULT_INCLUDE_PATTERNS: &[&str] = &["*.log", "*.log.[0-9]*", "*.txt"];

/// Default exclude glob patterns for files inside a space.
pub const DEFAULT_EXCLUDE_PATTERNS: &[&str] = &["*.gz", "*.zip", "*.tmp", ".git"];

// =============================================================================
// Session store
// =============================================================================

/// Capacity hint for the subscriber list; subscribers are usually one UI
/// plus the occasional test listener.
pub const EXPECTED_STORE_SUBSCRIBERS: usize = 4;

// =============================================================================
// Logging
// =============================================================================

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Maximum length of a query echoed into debug output.
pub const DEBUG_MAX_QUERY_PREVIEW: usize = 200;

// =============================================================================
// Configuration
// =============================================================================

/// Configuration file name.
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Spaces subdirectory name inside the platform data directory.
pub const SPACES_DIR_NAME: &str = "spaces";
