// LogQuest - core/record.rs
//
// Turns one raw log line into a searchable record: leading timestamp,
// severity, logfmt-style key=value fields, and the remaining message.
// Core layer: operates on &str only; the engine owns all file access.

use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;

// =============================================================================
// Severity
// =============================================================================

/// Normalised severity levels, ordered from most to least severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum Severity {
    Critical,
    Error,
    Warning,
    Info,
    Debug,
    #[default]
    Unknown,
}

impl Severity {
    /// Lower-case label, used both for display and for `severity=` matching.
    pub fn label(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Info => "info",
            Severity::Debug => "debug",
            Severity::Unknown => "unknown",
        }
    }

    /// Map a raw level token (`ERR`, `warn`, `FATAL`, ...) to a severity.
    pub fn from_token(token: &str) -> Severity {
        match token.to_ascii_lowercase().as_str() {
            "crit" | "critical" | "fatal" | "panic" | "emerg" | "alert" => Severity::Critical,
            "err" | "error" | "failed" => Severity::Error,
            "warn" | "warning" => Severity::Warning,
            "info" | "notice" | "information" => Severity::Info,
            "debug" | "trace" | "verbose" => Severity::Debug,
            _ => Severity::Unknown,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

// =============================================================================
// Record
// =============================================================================

/// A parsed log line.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Leading timestamp in UTC, if one was recognised.
    pub timestamp: Option<DateTime<Utc>>,
    pub severity: Severity,
    /// 1-based line number in the source file.
    pub line: u64,
    /// Line text after the timestamp and severity token.
    pub message: String,
    /// logfmt `key=value` pairs found anywhere in the line (keys lower-cased).
    pub fields: BTreeMap<String, String>,
}

impl Record {
    /// Look up a field for query matching. Built-in names take precedence
    /// over logfmt fields of the same name.
    pub fn field(&self, name: &str, path: &str) -> Option<String> {
        match name {
            "severity" | "level" => Some(self.severity.label().to_string()),
            "line" => Some(self.line.to_string()),
            "message" | "msg" => Some(self.message.clone()),
            "path" => Some(path.to_string()),
            other => self.fields.get(other).cloned(),
        }
    }
}

// =============================================================================
// Parsing
// =============================================================================

struct LinePatterns {
    /// Timestamp anchored at line start, optionally wrapped in `[...]`.
    timestamp: Regex,
    /// Severity token immediately after the timestamp.
    level: Regex,
    /// logfmt key=value pairs.
    pair: Regex,
}

fn patterns() -> &'static LinePatterns {
    static PATTERNS: OnceLock<LinePatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        // Constant patterns; covered by the unit tests below.
        fn re(pat: &str) -> Regex {
            Regex::new(pat).expect("record: invalid built-in regex")
        }
        LinePatterns {
            timestamp: re(
                r"^\s*\[?(\d{4}[-/]\d{2}[-/]\d{2})[T ](\d{2}:\d{2}:\d{2}(?:[.,]\d+)?)(Z|[+-]\d{2}:?\d{2})?\]?",
            ),
            level: re(r"^\s*[\[<(]?([A-Za-z]{3,11})[\]>)]?(?:\s*[:|-])?\s+"),
            pair: re(r#"([A-Za-z_][\w.\-]*)=("(?:[^"\\]|\\.)*"|[^\s"]+)"#),
        }
    })
}

/// Parse one line. Never fails: lines without a recognisable timestamp or
/// level are returned with `timestamp: None` / `Severity::Unknown` and the
/// whole line as the message.
pub fn parse_line(raw: &str, line: u64) -> Record {
    let pats = patterns();
    let mut rest = raw;
    let mut timestamp = None;

    if let Some(caps) = pats.timestamp.captures(raw) {
        let date = caps.get(1).map_or("", |m| m.as_str());
        let time = caps.get(2).map_or("", |m| m.as_str());
        let zone = caps.get(3).map(|m| m.as_str());
        timestamp = parse_timestamp(date, time, zone);
        if timestamp.is_some() {
            if let Some(whole) = caps.get(0) {
                rest = &raw[whole.end()..];
            }
        }
    }

    let fields = parse_pairs(raw);

    let mut severity = Severity::Unknown;
    if let Some(caps) = pats.level.captures(rest) {
        let token = caps.get(1).map_or("", |m| m.as_str());
        let mapped = Severity::from_token(token);
        if mapped != Severity::Unknown {
            severity = mapped;
            if let Some(whole) = caps.get(0) {
                rest = &rest[whole.end()..];
            }
        }
    }
    if severity == Severity::Unknown {
        if let Some(level) = fields.get("level").or_else(|| fields.get("severity")) {
            severity = Severity::from_token(level);
        }
    }

    Record {
        timestamp,
        severity,
        line,
        message: rest.trim().to_string(),
        fields,
    }
}

fn parse_timestamp(date: &str, time: &str, zone: Option<&str>) -> Option<DateTime<Utc>> {
    let date = date.replace('/', "-");
    let time = time.replace(',', ".");
    match zone {
        Some(z) => {
            // Normalise `+0530` -> `+05:30` so parse_from_rfc3339 accepts it.
            let z = if z != "Z" && !z.contains(':') && z.len() == 5 {
                format!("{}:{}", &z[..3], &z[3..])
            } else {
                z.to_string()
            };
            DateTime::parse_from_rfc3339(&format!("{date}T{time}{z}"))
                .ok()
                .map(|dt| dt.with_timezone(&Utc))
        }
        None => NaiveDateTime::parse_from_str(&format!("{date} {time}"), "%Y-%m-%d %H:%M:%S%.f")
            .ok()
            .map(|ndt| ndt.and_utc()),
    }
}

fn parse_pairs(raw: &str) -> BTreeMap<String, String> {
    patterns()
        .pair
        .captures_iter(raw)
        .filter_map(|caps| {
            let key = caps.get(1)?.as_str().to_ascii_lowercase();
            let value = caps.get(2)?.as_str();
            let value = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .map(|v| v.replace("\\\"", "\""))
                .unwrap_or_else(|| value.to_string());
            Some((key, value))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rfc3339_with_zone() {
        let r = parse_line("2024-01-15T14:30:22Z ERROR disk full", 3);
        assert_eq!(
            r.timestamp.unwrap().to_rfc3339(),
            "2024-01-15T14:30:22+00:00"
        );
        assert_eq!(r.severity, Severity::Error);
        assert_eq!(r.message, "disk full");
        assert_eq!(r.line, 3);
    }

    #[test]
    fn test_parse_offset_without_colon() {
        let r = parse_line("2024-01-15T14:30:22+0100 info started", 1);
        assert_eq!(
            r.timestamp.unwrap().to_rfc3339(),
            "2024-01-15T13:30:22+00:00"
        );
    }

    #[test]
    fn test_parse_bracketed_naive_timestamp_with_millis() {
        let r = parse_line("[2024-01-15 14:30:22.123] [WARN] low memory", 1);
        assert!(r.timestamp.is_some());
        assert_eq!(r.severity, Severity::Warning);
        assert_eq!(r.message, "low memory");
    }

    #[test]
    fn test_parse_comma_millis_log4j_style() {
        let r = parse_line("2024-01-15 14:30:22,500 DEBUG cache warm", 1);
        assert!(r.timestamp.is_some());
        assert_eq!(r.severity, Severity::Debug);
    }

    #[test]
    fn test_parse_line_without_timestamp() {
        let r = parse_line("just some text", 9);
        assert!(r.timestamp.is_none());
        assert_eq!(r.severity, Severity::Unknown);
        assert_eq!(r.message, "just some text");
    }

    #[test]
    fn test_parse_logfmt_fields_and_level() {
        let r = parse_line(
            r#"2024-01-15T14:30:22Z level=warn user=alice msg="slow \"query\"""#,
            1,
        );
        assert_eq!(r.severity, Severity::Warning);
        assert_eq!(r.fields.get("user").map(String::as_str), Some("alice"));
        assert_eq!(r.fields.get("msg").map(String::as_str), Some("slow \"query\""));
    }

    #[test]
    fn test_non_level_word_is_not_consumed() {
        let r = parse_line("2024-01-15T14:30:22Z started worker pool", 1);
        assert_eq!(r.severity, Severity::Unknown);
        assert_eq!(r.message, "started worker pool");
    }

    #[test]
    fn test_field_lookup_builtins() {
        let r = parse_line("2024-01-15T14:30:22Z error boom code=7", 4);
        assert_eq!(r.field("severity", "a.log").as_deref(), Some("error"));
        assert_eq!(r.field("line", "a.log").as_deref(), Some("4"));
        assert_eq!(r.field("path", "a.log").as_deref(), Some("a.log"));
        assert_eq!(r.field("code", "a.log").as_deref(), Some("7"));
        assert_eq!(r.field("missing", "a.log"), None);
    }
}
