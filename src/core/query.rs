// LogQuest - core/query.rs
//
// Search expression compiler and matcher.
// Core layer: pure logic, no I/O.
//
// Grammar (whitespace separated, AND binds tighter than OR):
//
//   query   := conj ( "or" conj )*
//   conj    := clause*
//   clause  := ("not" | "!")* atom
//   atom    := word | "quoted phrase" | /regex/ | field=value | field!=value | *
//
// Bare words and phrases are case-insensitive substrings of the whole line.
// Comparisons are case-insensitive equality against a record field. An
// empty query matches everything.

use crate::core::model::Span;
use crate::core::record::Record;
use crate::util::constants::{MAX_QUERY_LENGTH, MAX_QUERY_REGEX_LENGTH};
use crate::util::error::{QueryErrorKind, QueryParseError};
use regex::Regex;
use serde::Serialize;

// =============================================================================
// Compiled form
// =============================================================================

/// A single compiled test against a record.
#[derive(Debug, Clone)]
pub enum Predicate {
    /// `*`
    Any,
    /// Bare word or quoted phrase, stored lower-cased.
    Contains(String),
    /// `/pattern/`
    Matches(Regex),
    /// `field=value`
    FieldEq { field: String, value: String },
    /// `field!=value`
    FieldNe { field: String, value: String },
    /// `not <clause>`
    Not(Box<Predicate>),
}

impl Predicate {
    fn eval(&self, record: &Record, line_lower: &str, raw: &str, path: &str) -> bool {
        match self {
            Predicate::Any => true,
            Predicate::Contains(needle) => line_lower.contains(needle.as_str()),
            Predicate::Matches(re) => re.is_match(raw),
            Predicate::FieldEq { field, value } => record
                .field(field, path)
                .is_some_and(|v| v.eq_ignore_ascii_case(value)),
            Predicate::FieldNe { field, value } => !record
                .field(field, path)
                .is_some_and(|v| v.eq_ignore_ascii_case(value)),
            Predicate::Not(inner) => !inner.eval(record, line_lower, raw, path),
        }
    }

    fn describe(&self) -> String {
        match self {
            Predicate::Any => "*".to_string(),
            Predicate::Contains(s) => format!("{s:?}"),
            Predicate::Matches(re) => format!("/{}/", re.as_str()),
            Predicate::FieldEq { field, value } => format!("{field}={value:?}"),
            Predicate::FieldNe { field, value } => format!("{field}!={value:?}"),
            Predicate::Not(inner) => format!("not {}", inner.describe()),
        }
    }
}

/// A compiled search expression: a disjunction of conjunctions.
#[derive(Debug, Clone)]
pub struct Query {
    source: String,
    alternatives: Vec<Vec<Predicate>>,
}

impl Query {
    /// The expression text this query was compiled from.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn alternatives(&self) -> &[Vec<Predicate>] {
        &self.alternatives
    }

    /// True when the query accepts every record.
    pub fn matches_all(&self) -> bool {
        self.alternatives
            .iter()
            .any(|conj| conj.iter().all(|p| matches!(p, Predicate::Any)))
    }

    /// Test a parsed record. `raw` is the original line, `path` its source.
    pub fn matches(&self, record: &Record, raw: &str, path: &str) -> bool {
        let line_lower = raw.to_lowercase();
        self.alternatives
            .iter()
            .any(|conj| conj.iter().all(|p| p.eval(record, &line_lower, raw, path)))
    }

    /// Human-readable rendering of the compiled structure.
    pub fn describe(&self) -> String {
        self.alternatives
            .iter()
            .map(|conj| {
                if conj.is_empty() {
                    "*".to_string()
                } else {
                    conj.iter()
                        .map(Predicate::describe)
                        .collect::<Vec<_>>()
                        .join(" and ")
                }
            })
            .collect::<Vec<_>>()
            .join(" or ")
    }
}

// =============================================================================
// Lexer
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    Phrase(String),
    Regex(String),
    Eq(String, String),
    Ne(String, String),
    Star,
    Not,
    Or,
}

/// Read a `"..."` section starting at `start` (which holds the quote).
/// Returns the unescaped contents and the offset just past the closing quote.
fn read_quoted(text: &str, start: usize) -> Result<(String, usize), QueryParseError> {
    let mut out = String::new();
    let mut escaped = false;
    for (i, c) in text[start + 1..].char_indices() {
        if escaped {
            out.push(c);
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == '"' {
            return Ok((out, start + 1 + i + 1));
        } else {
            out.push(c);
        }
    }
    Err(QueryParseError::new(QueryErrorKind::UnterminatedQuote, start))
}

/// Read a `/.../` literal. `\/` stays escaped inside the pattern text.
fn read_regex(text: &str, start: usize) -> Result<(String, usize), QueryParseError> {
    let mut escaped = false;
    for (i, c) in text[start + 1..].char_indices() {
        if escaped {
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == '/' {
            let end = start + 1 + i;
            let pattern = text[start + 1..end].replace("\\/", "/");
            return Ok((pattern, end + 1));
        }
    }
    Err(QueryParseError::new(QueryErrorKind::UnterminatedRegex, start))
}

fn classify_word(word: String, start: usize) -> Result<Token, QueryParseError> {
    if word.eq_ignore_ascii_case("or") {
        return Ok(Token::Or);
    }
    if word.eq_ignore_ascii_case("not") {
        return Ok(Token::Not);
    }
    if word == "*" {
        return Ok(Token::Star);
    }
    let (field, value, negated) = if let Some(pos) = word.find("!=") {
        (&word[..pos], &word[pos + 2..], true)
    } else if let Some(pos) = word.find('=') {
        (&word[..pos], &word[pos + 1..], false)
    } else {
        return Ok(Token::Word(word));
    };
    if field.is_empty() {
        return Err(QueryParseError::new(QueryErrorKind::MissingField, start));
    }
    if value.is_empty() {
        return Err(QueryParseError::new(
            QueryErrorKind::MissingValue {
                field: field.to_string(),
            },
            start,
        ));
    }
    let field = field.to_ascii_lowercase();
    let value = value.to_string();
    Ok(if negated {
        Token::Ne(field, value)
    } else {
        Token::Eq(field, value)
    })
}

fn tokenize(text: &str) -> Result<Vec<(Token, usize)>, QueryParseError> {
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < text.len() {
        let c = match text[pos..].chars().next() {
            Some(c) => c,
            None => break,
        };
        if c.is_whitespace() {
            pos += c.len_utf8();
            continue;
        }
        let start = pos;
        match c {
            '"' => {
                let (phrase, end) = read_quoted(text, start)?;
                tokens.push((Token::Phrase(phrase), start));
                pos = end;
            }
            '/' => {
                let (pattern, end) = read_regex(text, start)?;
                tokens.push((Token::Regex(pattern), start));
                pos = end;
            }
            '!' => {
                tokens.push((Token::Not, start));
                pos += 1;
            }
            _ => {
                // A word runs to the next whitespace; quoted sections inside
                // it (field="two words") are read whole and unquoted.
                let mut word = String::new();
                while pos < text.len() {
                    let ch = match text[pos..].chars().next() {
                        Some(ch) => ch,
                        None => break,
                    };
                    if ch.is_whitespace() {
                        break;
                    }
                    if ch == '"' {
                        let (quoted, end) = read_quoted(text, pos)?;
                        word.push_str(&quoted);
                        pos = end;
                    } else {
                        word.push(ch);
                        pos += ch.len_utf8();
                    }
                }
                tokens.push((classify_word(word, start)?, start));
            }
        }
    }

    Ok(tokens)
}

// =============================================================================
// Compiler
// =============================================================================

fn compile_regex(pattern: &str, offset: usize) -> Result<Regex, QueryParseError> {
    if pattern.len() > MAX_QUERY_REGEX_LENGTH {
        return Err(QueryParseError::new(
            QueryErrorKind::RegexTooLong {
                length: pattern.len(),
                max_length: MAX_QUERY_REGEX_LENGTH,
            },
            offset,
        ));
    }
    Regex::new(pattern).map_err(|e| {
        QueryParseError::new(
            QueryErrorKind::InvalidRegex {
                pattern: pattern.to_string(),
                reason: e.to_string(),
            },
            offset,
        )
    })
}

/// Compile a search expression.
pub fn compile(text: &str) -> Result<Query, QueryParseError> {
    if text.len() > MAX_QUERY_LENGTH {
        return Err(QueryParseError::new(
            QueryErrorKind::TooLong {
                length: text.len(),
                max_length: MAX_QUERY_LENGTH,
            },
            MAX_QUERY_LENGTH,
        ));
    }

    let mut alternatives: Vec<Vec<Predicate>> = Vec::new();
    let mut current: Vec<Predicate> = Vec::new();
    // Offsets of pending `not`s, innermost last.
    let mut pending_not: Vec<usize> = Vec::new();

    for (token, offset) in tokenize(text)? {
        let atom = match token {
            Token::Not => {
                pending_not.push(offset);
                continue;
            }
            Token::Or => {
                if let Some(&not_at) = pending_not.last() {
                    return Err(QueryParseError::new(QueryErrorKind::DanglingNot, not_at));
                }
                if current.is_empty() {
                    return Err(QueryParseError::new(QueryErrorKind::DanglingOr, offset));
                }
                alternatives.push(std::mem::take(&mut current));
                continue;
            }
            Token::Star => Predicate::Any,
            Token::Word(w) | Token::Phrase(w) => Predicate::Contains(w.to_lowercase()),
            Token::Regex(p) => Predicate::Matches(compile_regex(&p, offset)?),
            Token::Eq(field, value) => Predicate::FieldEq { field, value },
            Token::Ne(field, value) => Predicate::FieldNe { field, value },
        };
        let wrapped = pending_not
            .drain(..)
            .fold(atom, |inner, _| Predicate::Not(Box::new(inner)));
        current.push(wrapped);
    }

    if let Some(&not_at) = pending_not.last() {
        return Err(QueryParseError::new(QueryErrorKind::DanglingNot, not_at));
    }
    if current.is_empty() && !alternatives.is_empty() {
        return Err(QueryParseError::new(QueryErrorKind::DanglingOr, text.len()));
    }
    alternatives.push(current);

    tracing::trace!(
        query = crate::util::logging::preview(text),
        alternatives = alternatives.len(),
        "Query compiled"
    );

    Ok(Query {
        source: text.to_string(),
        alternatives,
    })
}

// =============================================================================
// Inspection
// =============================================================================

/// Result of compiling a query without running it.
#[derive(Debug, Clone, Serialize)]
pub struct Inspection {
    /// The expression as submitted.
    pub program: String,
    /// Rendering of the compiled structure, when compilation succeeded.
    pub compiled: Option<String>,
    /// The compile error, when it failed.
    pub error: Option<String>,
    pub span: Span,
    pub space_id: String,
}

impl Inspection {
    pub fn is_valid(&self) -> bool {
        self.error.is_none()
    }
}

/// Compile `program` and report the outcome along with the search context
/// it would run under. Parse failures are reported, not returned.
pub fn inspect(program: &str, span: Span, space_id: &str) -> Inspection {
    let (compiled, error) = match compile(program) {
        Ok(q) => (Some(q.describe()), None),
        Err(e) => (None, Some(e.to_string())),
    };
    Inspection {
        program: program.to_string(),
        compiled,
        error,
        span,
        space_id: space_id.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::record::parse_line;

    fn hit(query: &str, line: &str) -> bool {
        let q = compile(query).expect("query should compile");
        q.matches(&parse_line(line, 1), line, "app.log")
    }

    fn err_kind(query: &str) -> QueryErrorKind {
        compile(query).expect_err("query should fail").kind
    }

    #[test]
    fn test_empty_query_matches_everything() {
        assert!(hit("", "anything at all"));
        assert!(hit("   ", "anything at all"));
        assert!(compile("").unwrap().matches_all());
    }

    #[test]
    fn test_bare_words_are_anded_case_insensitively() {
        assert!(hit("disk FULL", "2024-01-01T00:00:00Z error Disk is full"));
        assert!(!hit("disk network", "2024-01-01T00:00:00Z error Disk is full"));
    }

    #[test]
    fn test_or_binds_looser_than_and() {
        let line = "2024-01-01T00:00:00Z info cache hit";
        assert!(hit("boom or cache hit", line));
        assert!(!hit("boom or cache miss", line));
    }

    #[test]
    fn test_not_and_bang() {
        let line = "2024-01-01T00:00:00Z info cache hit";
        assert!(hit("not boom", line));
        assert!(hit("!boom", line));
        assert!(!hit("not cache", line));
        assert!(hit("not not cache", line));
    }

    #[test]
    fn test_phrase_and_regex() {
        let line = "2024-01-01T00:00:00Z error connection reset by peer";
        assert!(hit("\"reset by peer\"", line));
        assert!(!hit("\"peer by reset\"", line));
        assert!(hit(r"/reset\s+by/", line));
        assert!(hit(r"/a\/b|reset/", line));
    }

    #[test]
    fn test_field_comparisons() {
        let line = r#"2024-01-01T00:00:00Z warn user="Alice Smith" code=42"#;
        assert!(hit("severity=warning", line));
        assert!(hit("user=\"alice smith\"", line));
        assert!(hit("code!=7", line));
        assert!(!hit("code!=42", line));
        assert!(hit("path=app.log", line));
        assert!(hit("missing!=x", line));
        assert!(!hit("missing=x", line));
    }

    #[test]
    fn test_star_matches_all() {
        assert!(hit("*", "x"));
        assert!(compile("*").unwrap().matches_all());
        assert!(!compile("error").unwrap().matches_all());
    }

    #[test]
    fn test_errors_are_reported_with_offsets() {
        let e = compile("error \"unterminated").unwrap_err();
        assert_eq!(e.kind, QueryErrorKind::UnterminatedQuote);
        assert_eq!(e.offset, 6);

        assert_eq!(err_kind("/abc"), QueryErrorKind::UnterminatedRegex);
        assert!(matches!(err_kind("/(/"), QueryErrorKind::InvalidRegex { .. }));
        assert_eq!(err_kind("=x"), QueryErrorKind::MissingField);
        assert!(matches!(err_kind("user="), QueryErrorKind::MissingValue { .. }));
        assert_eq!(err_kind("error not"), QueryErrorKind::DanglingNot);
        assert_eq!(err_kind("not or x"), QueryErrorKind::DanglingNot);
        assert_eq!(err_kind("or error"), QueryErrorKind::DanglingOr);
        assert_eq!(err_kind("error or"), QueryErrorKind::DanglingOr);
        assert_eq!(err_kind("a or or b"), QueryErrorKind::DanglingOr);
    }

    #[test]
    fn test_too_long_query_rejected() {
        let long = "a".repeat(MAX_QUERY_LENGTH + 1);
        assert!(matches!(err_kind(&long), QueryErrorKind::TooLong { .. }));
    }

    #[test]
    fn test_describe_renders_structure() {
        let q = compile("error not debug or severity=warning").unwrap();
        assert_eq!(
            q.describe(),
            "\"error\" and not \"debug\" or severity=\"warning\""
        );
        assert_eq!(q.source(), "error not debug or severity=warning");
    }

    #[test]
    fn test_inspect_reports_without_failing() {
        let span = Span::last_hours(1);
        let ok = inspect("error", span, "default");
        assert!(ok.is_valid());
        assert_eq!(ok.compiled.as_deref(), Some("\"error\""));

        let bad = inspect("\"oops", span, "default");
        assert!(!bad.is_valid());
        assert!(bad.compiled.is_none());
        assert_eq!(bad.space_id, "default");
    }
}
