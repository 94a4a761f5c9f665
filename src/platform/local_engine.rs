// LogQuest - platform/local_engine.rs
//
// A SearchClient over directories of log files on the local disk.
//
// A space id names a directory under `spaces_dir`. Searching a space
// discovers its files up front (walkdir + glob include/exclude patterns),
// then streams results lazily: each pull of the stream scans only as far as
// the next full batch of `tuple_batch_size` matches, and every finished file
// is followed by a cumulative stats chunk.
//
// Per-file I/O errors are non-fatal: the file is skipped with a warning, the
// same way unreadable entries are skipped during discovery. Only a missing
// space or an unreadable space root fails the search.

use crate::app::client::{ArchiveOptions, ResultStream, SearchClient, SearchOptions};
use crate::app::handles::CancelToken;
use crate::core::model::{Column, ColumnType, Descriptor, PartialResults, Span, Tuple};
use crate::core::query::Query;
use crate::core::record::{parse_line, Record};
use crate::util::constants;
use crate::util::error::EngineError;
use serde_json::{json, Value};
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::Instant;

// =============================================================================
// Configuration
// =============================================================================

/// Settings for the local engine. All limits are clamped to the bounds in
/// `util::constants`.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Directory whose subdirectories are the searchable spaces.
    pub spaces_dir: PathBuf,

    /// Maximum directory recursion depth inside a space.
    pub max_depth: usize,

    /// Maximum number of files searched per space. When more are found the
    /// most recently modified ones are kept.
    pub max_files: usize,

    /// Matched tuples per results chunk.
    pub tuple_batch_size: usize,

    /// Glob patterns (filename-only) a file must match. Empty means all.
    pub include_patterns: Vec<String>,

    /// Glob patterns matched against filenames and directory names.
    /// Matching directories are not descended into.
    pub exclude_patterns: Vec<String>,

    /// Files at or above this size are memory-mapped instead of read.
    pub large_file_threshold: u64,
}

impl EngineConfig {
    /// Defaults rooted at `spaces_dir`.
    pub fn new(spaces_dir: impl Into<PathBuf>) -> Self {
        Self {
            spaces_dir: spaces_dir.into(),
            max_depth: constants::DEFAULT_MAX_DEPTH,
            max_files: constants::DEFAULT_MAX_FILES,
            tuple_batch_size: constants::DEFAULT_TUPLE_BATCH_SIZE,
            include_patterns: constants::DEFAULT_INCLUDE_PATTERNS
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
            exclude_patterns: constants::DEFAULT_EXCLUDE_PATTERNS
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
            large_file_threshold: constants::LARGE_FILE_THRESHOLD,
        }
    }
}

// =============================================================================
// Engine
// =============================================================================

/// A file selected for searching.
#[derive(Debug, Clone)]
struct SpaceFile {
    path: PathBuf,
    /// Path relative to the space root, `/`-separated, used in tuples.
    display: String,
    size: u64,
    modified: Option<std::time::SystemTime>,
}

/// Searches log files under `config.spaces_dir/<space_id>`.
#[derive(Debug, Clone)]
pub struct LocalEngine {
    config: EngineConfig,
}

impl LocalEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Directory for `space_id`. Ids that are empty or that would escape the
    /// spaces root are treated as unknown spaces.
    pub fn space_root(&self, space_id: &str) -> Result<PathBuf, EngineError> {
        let not_found = || EngineError::SpaceNotFound {
            space_id: space_id.to_string(),
        };
        let id = Path::new(space_id);
        let simple = !space_id.is_empty()
            && id
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !simple {
            return Err(not_found());
        }

        let root = self.config.spaces_dir.join(id);
        match std::fs::metadata(&root) {
            Ok(meta) if meta.is_dir() => Ok(root),
            Ok(_) => Err(not_found()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(not_found()),
            Err(e) => Err(EngineError::Io {
                path: root,
                source: e,
            }),
        }
    }

    /// Names of the spaces currently present, sorted.
    pub fn list_spaces(&self) -> Result<Vec<String>, EngineError> {
        let entries = std::fs::read_dir(&self.config.spaces_dir).map_err(|e| EngineError::Io {
            path: self.config.spaces_dir.clone(),
            source: e,
        })?;
        let mut names: Vec<String> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_ok_and(|t| t.is_dir()))
            .filter_map(|e| e.file_name().to_str().map(str::to_string))
            .collect();
        names.sort();
        Ok(names)
    }

    /// Discover searchable files inside a space root.
    fn discover(&self, root: &Path, cancel: &CancelToken) -> Result<Vec<SpaceFile>, EngineError> {
        let max_files = self
            .config
            .max_files
            .clamp(constants::MIN_MAX_FILES, constants::ABSOLUTE_MAX_FILES);
        let max_depth = self.config.max_depth.min(constants::ABSOLUTE_MAX_DEPTH);

        let include_pats = compile_patterns(&self.config.include_patterns, "include");
        let exclude_pats = compile_patterns(&self.config.exclude_patterns, "exclude");

        let walker = walkdir::WalkDir::new(root)
            .max_depth(max_depth)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| {
                if e.depth() == 0 || !e.file_type().is_dir() {
                    return true;
                }
                let name = e.file_name().to_str().unwrap_or("");
                !is_excluded_component(name, &exclude_pats)
            });

        let mut files = Vec::new();
        for entry_result in walker {
            if cancel.is_cancelled() {
                tracing::debug!(root = %root.display(), "Discovery cancelled");
                break;
            }

            let entry = match entry_result {
                Ok(e) => e,
                Err(e) if e.depth() == 0 => {
                    return Err(EngineError::Traversal {
                        path: root.to_path_buf(),
                        source: e,
                    });
                }
                Err(e) => {
                    tracing::warn!(root = %root.display(), error = %e, "Skipping inaccessible entry");
                    continue;
                }
            };
            if entry.file_type().is_dir() {
                continue;
            }

            let path = entry.path();
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                tracing::debug!(file = %path.display(), "Skipping non-UTF-8 filename");
                continue;
            };
            if is_excluded_filename(file_name, &exclude_pats) {
                tracing::trace!(file = file_name, "Excluded by pattern");
                continue;
            }
            if !is_included(file_name, &include_pats) {
                tracing::trace!(file = file_name, "Not matched by include patterns");
                continue;
            }

            let metadata = match entry.metadata() {
                Ok(m) => m,
                Err(e) => {
                    tracing::warn!(file = %path.display(), error = %e, "Cannot read metadata");
                    continue;
                }
            };

            let display = path
                .strip_prefix(root)
                .unwrap_or(path)
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");

            files.push(SpaceFile {
                path: path.to_path_buf(),
                display,
                size: metadata.len(),
                modified: metadata.modified().ok(),
            });
        }

        let total_found = files.len();
        if total_found > max_files {
            // Keep the freshest files; files without an mtime count as oldest.
            files.sort_by(|a, b| b.modified.cmp(&a.modified));
            files.truncate(max_files);
            files.sort_by(|a, b| a.display.cmp(&b.display));
            tracing::info!(
                total_found,
                limit = max_files,
                "File list truncated to most recently modified files"
            );
        }

        tracing::debug!(
            root = %root.display(),
            files = files.len(),
            "Discovery complete"
        );
        Ok(files)
    }

    fn open_stream(
        &self,
        space_id: &str,
        matcher: Matcher,
        cancel: CancelToken,
    ) -> Result<ResultStream, EngineError> {
        Ok(Box::new(self.scan_stream(space_id, matcher, cancel)?))
    }

    fn scan_stream(
        &self,
        space_id: &str,
        matcher: Matcher,
        cancel: CancelToken,
    ) -> Result<ScanStream, EngineError> {
        let root = self.space_root(space_id)?;
        let files = self.discover(&root, &cancel)?;
        tracing::debug!(space = space_id, files = files.len(), "Space search starting");
        Ok(ScanStream {
            files,
            next_file: 0,
            matcher,
            cancel,
            batch_size: self
                .config
                .tuple_batch_size
                .clamp(constants::MIN_TUPLE_BATCH_SIZE, constants::MAX_TUPLE_BATCH_SIZE),
            large_file_threshold: self.config.large_file_threshold,
            current: None,
            pending_stats: None,
            totals: ScanTotals::default(),
            started: Instant::now(),
        })
    }
}

impl SearchClient for LocalEngine {
    fn search(
        &self,
        query: &Query,
        options: &SearchOptions,
        cancel: CancelToken,
    ) -> Result<ResultStream, EngineError> {
        let matcher = Matcher::Query {
            query: query.clone(),
            span: options.span,
        };
        self.open_stream(&options.space_id, matcher, cancel)
    }

    fn archive_search(
        &self,
        options: &ArchiveOptions,
        cancel: CancelToken,
    ) -> Result<ResultStream, EngineError> {
        let needles = options
            .patterns
            .iter()
            .map(|p| p.trim().to_lowercase())
            .filter(|p| !p.is_empty())
            .collect();
        self.open_stream(&options.space_id, Matcher::Patterns(needles), cancel)
    }
}

// =============================================================================
// Streaming scan
// =============================================================================

/// Line selection for one search.
enum Matcher {
    /// Timestamped records inside `span` that satisfy `query`.
    Query { query: Query, span: Span },
    /// Lines containing any of the (lower-cased) needles, at any time.
    Patterns(Vec<String>),
}

impl Matcher {
    fn accepts(&self, record: &Record, raw: &str, path: &str) -> bool {
        match self {
            Matcher::Query { query, span } => {
                record.timestamp.is_some_and(|ts| span.contains(ts))
                    && query.matches(record, raw, path)
            }
            Matcher::Patterns(needles) => {
                let haystack = raw.to_lowercase();
                needles.iter().any(|n| haystack.contains(n.as_str()))
            }
        }
    }
}

#[derive(Debug, Default)]
struct ScanTotals {
    files_scanned: usize,
    bytes_read: u64,
    records_read: u64,
    records_matched: u64,
}

struct ScanStream {
    files: Vec<SpaceFile>,
    next_file: usize,
    matcher: Matcher,
    cancel: CancelToken,
    batch_size: usize,
    large_file_threshold: u64,
    /// File being scanned, resumed on the next pull.
    current: Option<OpenFile>,
    /// Stats chunk owed after the final batch of a file.
    pending_stats: Option<PartialResults>,
    totals: ScanTotals,
    started: Instant,
}

/// Scan position inside one file.
struct OpenFile {
    key: String,
    source: String,
    bytes: FileBytes,
    offset: usize,
    lines_read: u64,
    matched: u64,
    descriptor_sent: bool,
}

impl OpenFile {
    fn is_exhausted(&self) -> bool {
        self.offset >= self.bytes.len()
    }

    /// Wrap `rows` as a results chunk, attaching the descriptor to the
    /// file's first one.
    fn batch(&mut self, rows: Vec<Tuple>) -> PartialResults {
        let mut chunk = PartialResults::default();
        if !self.descriptor_sent {
            chunk
                .descriptor
                .insert(self.key.clone(), record_descriptor(&self.source));
            self.descriptor_sent = true;
        }
        chunk.tuples.insert(self.key.clone(), rows);
        chunk
    }
}

impl Iterator for ScanStream {
    type Item = Result<PartialResults, EngineError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.cancel.is_cancelled() {
                return None;
            }
            if let Some(stats) = self.pending_stats.take() {
                return Some(Ok(stats));
            }
            if let Some(mut open) = self.current.take() {
                let rows = self.fill_batch(&mut open)?;
                if !open.is_exhausted() {
                    let chunk = open.batch(rows);
                    self.current = Some(open);
                    return Some(Ok(chunk));
                }
                let stats = self.finish_file(&open);
                if rows.is_empty() {
                    return Some(Ok(stats));
                }
                self.pending_stats = Some(stats);
                return Some(Ok(open.batch(rows)));
            }
            if self.next_file >= self.files.len() {
                return None;
            }
            let index = self.next_file;
            self.next_file += 1;
            match self.open_file(index) {
                Some(open) => self.current = Some(open),
                None => {
                    self.totals.files_scanned += 1;
                    return Some(Ok(PartialResults::stats(self.stats())));
                }
            }
        }
    }
}

impl ScanStream {
    /// Read or map file `index`. Unreadable files are skipped with a warning.
    fn open_file(&self, index: usize) -> Option<OpenFile> {
        let file = &self.files[index];
        match read_file(&file.path, file.size >= self.large_file_threshold) {
            Ok(bytes) => Some(OpenFile {
                key: format!("g{index}"),
                source: file.display.clone(),
                bytes,
                offset: 0,
                lines_read: 0,
                matched: 0,
                descriptor_sent: false,
            }),
            Err(e) => {
                tracing::warn!(file = %file.path.display(), error = %e, "Skipping unreadable file");
                None
            }
        }
    }

    /// Scan lines of `open` until a batch fills or the file ends. Returns
    /// `None` when cancelled mid-file.
    fn fill_batch(&mut self, open: &mut OpenFile) -> Option<Vec<Tuple>> {
        let mut rows: Vec<Tuple> = Vec::new();
        while !open.is_exhausted() && rows.len() < self.batch_size {
            if open.lines_read % constants::CANCEL_CHECK_EVERY_LINES as u64 == 0
                && self.cancel.is_cancelled()
            {
                return None;
            }
            let rest = &open.bytes[open.offset..];
            let (line, consumed) = match rest.iter().position(|&b| b == b'\n') {
                Some(end) => (&rest[..end], end + 1),
                None => (rest, rest.len()),
            };
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            open.offset += consumed;
            open.lines_read += 1;
            self.totals.records_read += 1;

            let text = String::from_utf8_lossy(line);
            let raw = truncate(&text, constants::MAX_RECORD_BYTES);
            let record = parse_line(raw, open.lines_read);
            if self.matcher.accepts(&record, raw, &open.source) {
                open.matched += 1;
                rows.push(to_tuple(&record, &open.source));
            }
        }
        Some(rows)
    }

    /// Fold a fully scanned file into the totals and build its stats chunk.
    fn finish_file(&mut self, open: &OpenFile) -> PartialResults {
        self.totals.files_scanned += 1;
        self.totals.bytes_read += open.bytes.len() as u64;
        self.totals.records_matched += open.matched;
        tracing::trace!(file = %open.source, matched = open.matched, "File scanned");
        PartialResults::stats(self.stats())
    }

    fn stats(&self) -> Value {
        json!({
            "files_scanned": self.totals.files_scanned,
            "files_total": self.files.len(),
            "bytes_read": self.totals.bytes_read,
            "records_read": self.totals.records_read,
            "records_matched": self.totals.records_matched,
            "elapsed_ms": self.started.elapsed().as_millis() as u64,
        })
    }
}

/// Descriptor shared by every group the local engine produces.
pub fn record_descriptor(source: &str) -> Descriptor {
    Descriptor {
        columns: vec![
            Column::new("ts", ColumnType::Time),
            Column::new("severity", ColumnType::String),
            Column::new("path", ColumnType::String),
            Column::new("line", ColumnType::Uint64),
            Column::new("message", ColumnType::String),
        ],
        source: Some(source.to_string()),
    }
}

fn to_tuple(record: &Record, path: &str) -> Tuple {
    vec![
        record
            .timestamp
            .map_or(Value::Null, |ts| Value::String(ts.to_rfc3339())),
        Value::String(record.severity.label().to_string()),
        Value::String(path.to_string()),
        json!(record.line),
        Value::String(record.message.clone()),
    ]
}

/// Longest prefix of `s` that fits in `max` bytes on a char boundary.
fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

// =============================================================================
// File reading
// =============================================================================

/// File contents, either read into memory or memory-mapped.
enum FileBytes {
    Heap(Vec<u8>),
    Mapped(memmap2::Mmap),
}

impl std::ops::Deref for FileBytes {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            FileBytes::Heap(v) => v.as_slice(),
            FileBytes::Mapped(m) => &m[..],
        }
    }
}

fn read_file(path: &Path, is_large: bool) -> io::Result<FileBytes> {
    if !is_large {
        return std::fs::read(path).map(FileBytes::Heap);
    }
    let file = std::fs::File::open(path)?;
    // SAFETY: the map is read-only and never outlives this scan. A log file
    // truncated by another process while mapped can fault; the engine only
    // searches already-written files.
    let mmap = unsafe { memmap2::Mmap::map(&file)? };
    tracing::debug!(
        file = %path.display(),
        size_mb = mmap.len() / (1024 * 1024),
        "Memory-mapped large file"
    );
    Ok(FileBytes::Mapped(mmap))
}

// =============================================================================
// Glob helpers
// =============================================================================

/// Compile glob patterns, logging and skipping any that fail.
fn compile_patterns(patterns: &[String], kind: &str) -> Vec<glob::Pattern> {
    patterns
        .iter()
        .filter_map(|p| match glob::Pattern::new(p) {
            Ok(compiled) => Some(compiled),
            Err(e) => {
                tracing::warn!(pattern = p, kind, error = %e, "Invalid glob pattern, skipping");
                None
            }
        })
        .collect()
}

/// Literal exclude patterns (no wildcards) also exclude directories by name.
fn is_excluded_component(dir_name: &str, exclude_pats: &[glob::Pattern]) -> bool {
    exclude_pats.iter().any(|p| {
        let s = p.as_str();
        !s.contains('*') && !s.contains('?') && !s.contains('[') && p.matches(dir_name)
    })
}

fn is_excluded_filename(file_name: &str, exclude_pats: &[glob::Pattern]) -> bool {
    exclude_pats.iter().any(|p| p.matches(file_name))
}

fn is_included(file_name: &str, include_pats: &[glob::Pattern]) -> bool {
    include_pats.is_empty() || include_pats.iter().any(|p| p.matches(file_name))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::query::compile;
    use std::fs;
    use tempfile::TempDir;

    fn make_space() -> (TempDir, LocalEngine) {
        let dir = tempfile::tempdir().expect("tempdir");
        let space = dir.path().join("prod");
        fs::create_dir_all(space.join("sub")).unwrap();
        fs::create_dir_all(space.join(".git")).unwrap();

        fs::write(
            space.join("app.log"),
            "2024-03-01 10:00:00 INFO service started\n\
             2024-03-01 10:00:05 ERROR connection refused host=db1\n\
             2024-03-01 10:00:09 WARN retrying host=db1\n\
             no timestamp here error\n",
        )
        .unwrap();
        fs::write(
            space.join("sub").join("worker.log"),
            "[2024-03-01T10:01:00Z] error job failed id=7\n\
             [2024-03-02T10:01:00Z] error outside span id=8\n",
        )
        .unwrap();
        fs::write(space.join("archive.gz"), "error compressed").unwrap();
        fs::write(space.join(".git").join("HEAD.log"), "error in git").unwrap();

        let engine = LocalEngine::new(EngineConfig::new(dir.path()));
        (dir, engine)
    }

    fn march_first() -> Span {
        Span::new(
            "2024-03-01T00:00:00Z".parse().unwrap(),
            "2024-03-02T00:00:00Z".parse().unwrap(),
        )
    }

    fn run_search(engine: &LocalEngine, query: &str) -> Vec<PartialResults> {
        let options = SearchOptions {
            span: march_first(),
            space_id: "prod".to_string(),
        };
        engine
            .search(&compile(query).unwrap(), &options, CancelToken::new())
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
    }

    fn tuples(chunks: &[PartialResults]) -> Vec<Tuple> {
        chunks
            .iter()
            .flat_map(|c| c.tuples.values().flatten().cloned())
            .collect()
    }

    #[test]
    fn test_unknown_space_is_error() {
        let (_dir, engine) = make_space();
        for id in ["missing", "", "../prod", "prod/../prod"] {
            assert!(
                matches!(engine.space_root(id), Err(EngineError::SpaceNotFound { .. })),
                "{id}"
            );
        }
    }

    #[test]
    fn test_list_spaces() {
        let (_dir, engine) = make_space();
        assert_eq!(engine.list_spaces().unwrap(), vec!["prod".to_string()]);
    }

    #[test]
    fn test_search_filters_by_query_and_span() {
        let (_dir, engine) = make_space();
        let chunks = run_search(&engine, "error");
        let rows = tuples(&chunks);

        // The untimestamped line and the line outside the span are excluded.
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0][1], json!("error"));
        assert_eq!(rows[0][2], json!("app.log"));
        assert_eq!(rows[0][3], json!(2));
        assert_eq!(rows[1][2], json!("sub/worker.log"));
        assert_eq!(rows[1][0], json!("2024-03-01T10:01:00+00:00"));
    }

    #[test]
    fn test_groups_per_file_with_descriptor_once() {
        let (_dir, engine) = make_space();
        let chunks = run_search(&engine, "host=db1");
        let with_desc: Vec<_> = chunks.iter().filter(|c| !c.descriptor.is_empty()).collect();
        assert_eq!(with_desc.len(), 1);
        let desc = &with_desc[0].descriptor["g0"];
        assert_eq!(
            desc.column_names(),
            vec!["ts", "severity", "path", "line", "message"]
        );
        assert_eq!(desc.source.as_deref(), Some("app.log"));
        assert_eq!(tuples(&chunks).len(), 2);
    }

    #[test]
    fn test_stats_follow_each_file() {
        let (_dir, engine) = make_space();
        let chunks = run_search(&engine, "*");
        let stats: Vec<&Value> = chunks.iter().filter_map(|c| c.stats.as_ref()).collect();
        assert_eq!(stats.len(), 2);
        let last = stats[1];
        assert_eq!(last["files_scanned"], 2);
        assert_eq!(last["files_total"], 2);
        assert_eq!(last["records_read"], 6);
        assert_eq!(last["records_matched"], 4);
        assert!(last["bytes_read"].as_u64().unwrap() > 0);
    }

    #[test]
    fn test_batches_respect_batch_size() {
        let (dir, _) = make_space();
        let mut config = EngineConfig::new(dir.path());
        config.tuple_batch_size = 1;
        let engine = LocalEngine::new(config);
        let chunks = run_search(&engine, "host=db1");
        let result_chunks: Vec<_> = chunks.iter().filter(|c| !c.tuples.is_empty()).collect();
        assert_eq!(result_chunks.len(), 2);
        assert!(result_chunks.iter().all(|c| c.tuples["g0"].len() == 1));
    }

    #[test]
    fn test_archive_search_ignores_time() {
        let (_dir, engine) = make_space();
        let options = ArchiveOptions {
            patterns: vec!["ID=8".to_string()],
            space_id: "prod".to_string(),
        };
        let chunks: Vec<_> = engine
            .archive_search(&options, CancelToken::new())
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        let rows = tuples(&chunks);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0][3], json!(2));
        assert_eq!(rows[0][4], json!("outside span id=8"));
    }

    #[test]
    fn test_cancelled_stream_ends_early() {
        let (_dir, engine) = make_space();
        let token = CancelToken::new();
        let options = SearchOptions {
            span: march_first(),
            space_id: "prod".to_string(),
        };
        let mut stream = engine
            .search(&compile("*").unwrap(), &options, token.clone())
            .unwrap();
        assert!(stream.next().is_some());
        token.cancel();
        assert!(stream.next().is_none());
    }

    #[test]
    fn test_max_files_limits_discovery() {
        let (dir, _) = make_space();
        let mut config = EngineConfig::new(dir.path());
        config.max_files = 1;
        let engine = LocalEngine::new(config);
        let chunks = run_search(&engine, "*");
        let last = chunks.iter().filter_map(|c| c.stats.as_ref()).last().unwrap();
        assert_eq!(last["files_total"], 1);
    }

    #[test]
    fn test_large_files_are_memory_mapped() {
        let (dir, _) = make_space();
        let mut config = EngineConfig::new(dir.path());
        config.large_file_threshold = 1;
        let engine = LocalEngine::new(config);
        assert_eq!(tuples(&run_search(&engine, "error")).len(), 2);
    }

    #[test]
    fn test_large_file_streams_one_batch_per_pull() {
        let dir = tempfile::tempdir().unwrap();
        let space = dir.path().join("prod");
        fs::create_dir_all(&space).unwrap();
        let mut content = String::new();
        for i in 0..1000 {
            content.push_str(&format!("2024-03-01 10:00:00 ERROR failure n={i}\r\n"));
        }
        fs::write(space.join("big.log"), content).unwrap();

        let mut config = EngineConfig::new(dir.path());
        config.tuple_batch_size = 10;
        let engine = LocalEngine::new(config);
        let matcher = Matcher::Query {
            query: compile("error").unwrap(),
            span: march_first(),
        };
        let mut stream = engine
            .scan_stream("prod", matcher, CancelToken::new())
            .unwrap();

        let first = stream.next().unwrap().unwrap();
        assert_eq!(first.tuples["g0"].len(), 10);
        assert!(first.tuples["g0"][0][4].as_str().unwrap().ends_with("n=0"));
        // Only the first batch has been scanned; the rest of the file waits.
        let open = stream.current.as_ref().unwrap();
        assert_eq!(open.lines_read, 10);
        assert!(!open.is_exhausted());
        assert!(stream.pending_stats.is_none());

        let rest: Vec<PartialResults> = stream.collect::<Result<_, _>>().unwrap();
        let batches = rest.iter().filter(|c| !c.tuples.is_empty()).count();
        assert_eq!(batches, 99);
        let stats = rest.last().and_then(|c| c.stats.as_ref()).unwrap();
        assert_eq!(stats["records_matched"], 1000);
    }

    #[test]
    fn test_truncate_respects_char_boundary() {
        assert_eq!(truncate("héllo", 2), "h");
        assert_eq!(truncate("abc", 10), "abc");
    }
}
