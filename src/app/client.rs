// LogQuest - app/client.rs
//
// The search-engine capability consumed by the dispatcher.
//
// An engine turns a request into a lazily-pulled stream of partial results.
// Each call receives the dispatcher's `CancelToken`; engines check it between
// units of work and end the stream early once it is set. Ending early after
// cancellation is not an error.

use crate::app::handles::CancelToken;
use crate::core::model::{PartialResults, SearchTarget, Span};
use crate::core::query::Query;
use crate::util::error::EngineError;

/// Stream of partial results. `Err` items are mid-stream engine failures;
/// the dispatcher stops pulling after the first one.
pub type ResultStream = Box<dyn Iterator<Item = Result<PartialResults, EngineError>> + Send>;

/// Options for a full-text/temporal search.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub span: Span,
    pub space_id: String,
}

/// Options for an index-pattern search.
#[derive(Debug, Clone)]
pub struct ArchiveOptions {
    pub patterns: Vec<String>,
    pub space_id: String,
}

/// A request ready to issue, selected by the caller's `SearchTarget`.
#[derive(Debug, Clone)]
pub enum SearchRequest {
    Events { query: Query, options: SearchOptions },
    Index { options: ArchiveOptions },
}

impl SearchRequest {
    pub fn target(&self) -> SearchTarget {
        match self {
            SearchRequest::Events { .. } => SearchTarget::Events,
            SearchRequest::Index { .. } => SearchTarget::Index,
        }
    }

    pub fn space_id(&self) -> &str {
        match self {
            SearchRequest::Events { options, .. } => &options.space_id,
            SearchRequest::Index { options } => &options.space_id,
        }
    }

    /// Send this request to `client`.
    pub fn issue(
        &self,
        client: &dyn SearchClient,
        cancel: CancelToken,
    ) -> Result<ResultStream, EngineError> {
        match self {
            SearchRequest::Events { query, options } => client.search(query, options, cancel),
            SearchRequest::Index { options } => client.archive_search(options, cancel),
        }
    }
}

/// A query-execution engine.
///
/// Both methods may block while the request is issued (a network round
/// trip for a remote engine); they run on the session's worker thread.
/// Returning `Ok` means the engine acknowledged the query.
pub trait SearchClient: Send + Sync {
    fn search(
        &self,
        query: &Query,
        options: &SearchOptions,
        cancel: CancelToken,
    ) -> Result<ResultStream, EngineError>;

    fn archive_search(
        &self,
        options: &ArchiveOptions,
        cancel: CancelToken,
    ) -> Result<ResultStream, EngineError>;
}
