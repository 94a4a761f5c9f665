// LogQuest - app/dispatcher.rs
//
// Search-session orchestration: dispatches a query, tracks it as a
// cancellable handle, and streams its partial results into the store.
//
// Architecture:
//   - `SessionDispatcher` is constructed once with an injected engine,
//     handle registry and store; `dispatch` runs on the caller's thread and
//     returns immediately with a `SearchTask`.
//   - Each search runs on its own background thread (`run_search`), pulling
//     chunks from the engine stream and applying transitions in order.
//   - A `CancelToken` shared with the engine lets callers stop a search
//     cooperatively; cancellation ends the session as Done, never Error.
//
// Ordering rules that keep a re-dispatch under the same name safe:
//   - dispatch cancels the previous token and registers the new session in
//     one registry critical section, so concurrent dispatches (and clears)
//     of a name are serialized;
//   - every streamed write is skipped once its token is cancelled, checked
//     under the store lock;
//   - terminal status is written only while the stream's handle is still the
//     active one, checked under the registry lock (registry before store).

use crate::app::client::{ArchiveOptions, SearchClient, SearchOptions, SearchRequest};
use crate::app::handles::{CancelToken, Handle, HandleRegistry};
use crate::app::store::{SessionStore, Transition};
use crate::core::model::{PartialResults, SearchTarget, Session, SessionStatus, Span};
use crate::core::query::{self, Inspection};
use crate::util::error::{EngineError, QueryErrorKind, QueryParseError, SessionNotFoundError};
use crate::util::logging::preview;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

// =============================================================================
// Requests and outcomes
// =============================================================================

/// Everything needed to start one named search.
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    /// Session name; re-using a name replaces the running search.
    pub name: String,
    /// Search expression (events) or index pattern (index).
    pub query: String,
    /// Time window; ignored for index searches.
    pub span: Span,
    pub space_id: String,
    pub target: SearchTarget,
    /// Grouping label for bulk clearing.
    pub tag: Option<String>,
}

impl DispatchRequest {
    /// A full-text search over `span`.
    pub fn events(
        name: impl Into<String>,
        query: impl Into<String>,
        span: Span,
        space_id: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            query: query.into(),
            span,
            space_id: space_id.into(),
            target: SearchTarget::Events,
            tag: None,
        }
    }

    /// An index-pattern search.
    pub fn index(
        name: impl Into<String>,
        pattern: impl Into<String>,
        space_id: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            query: pattern.into(),
            span: Span::last_hours(crate::util::constants::DEFAULT_SPAN_HOURS),
            space_id: space_id.into(),
            target: SearchTarget::Index,
            tag: None,
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }
}

/// Select and validate the engine request for `req`. Pure; touches no state.
pub fn build_request(req: &DispatchRequest) -> Result<SearchRequest, QueryParseError> {
    match req.target {
        SearchTarget::Events => Ok(SearchRequest::Events {
            query: query::compile(&req.query)?,
            options: SearchOptions {
                span: req.span,
                space_id: req.space_id.clone(),
            },
        }),
        SearchTarget::Index => {
            let pattern = req.query.trim();
            if pattern.is_empty() {
                return Err(QueryParseError::new(QueryErrorKind::EmptyPattern, 0));
            }
            Ok(SearchRequest::Index {
                options: ArchiveOptions {
                    patterns: vec![pattern.to_string()],
                    space_id: req.space_id.clone(),
                },
            })
        }
    }
}

/// How a search worker finished.
#[derive(Debug)]
pub enum SearchOutcome {
    /// The stream ended normally after `chunks` chunks; session is Done.
    Completed { chunks: usize },
    /// The search was cancelled by its caller or superseded by a newer
    /// dispatch under the same name.
    Cancelled,
    /// The engine failed; session is Error (unless superseded meanwhile).
    Failed(EngineError),
    /// The session vanished from the store mid-stream. Indicates a
    /// lifecycle-ordering defect in the caller.
    Orphaned(SessionNotFoundError),
}

impl SearchOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, SearchOutcome::Completed { .. })
    }
}

/// Caller-side view of a running search.
#[derive(Debug)]
pub struct SearchTask {
    name: String,
    handle: Handle,
    worker: JoinHandle<SearchOutcome>,
}

impl SearchTask {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Id of the handle registered for this search.
    pub fn handle_id(&self) -> u64 {
        self.handle.id()
    }

    /// Stop the search. A no-op once it has finished.
    pub fn cancel(&self) {
        self.handle.cancel();
    }

    /// Whether this search was cancelled, by its caller, by name, by a
    /// clear or by a newer dispatch.
    pub fn is_cancelled(&self) -> bool {
        self.handle.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }

    /// Block until the worker finishes.
    pub fn wait(self) -> SearchOutcome {
        self.worker.join().unwrap_or_else(|_| {
            tracing::error!(session = %self.name, "Search worker panicked");
            SearchOutcome::Failed(EngineError::Remote {
                message: "search worker panicked".to_string(),
            })
        })
    }
}

// =============================================================================
// SessionDispatcher
// =============================================================================

/// Orchestrates searches end-to-end against one engine.
#[derive(Clone)]
pub struct SessionDispatcher {
    client: Arc<dyn SearchClient>,
    handles: Arc<HandleRegistry>,
    store: Arc<SessionStore>,
}

impl SessionDispatcher {
    pub fn new(
        client: Arc<dyn SearchClient>,
        handles: Arc<HandleRegistry>,
        store: Arc<SessionStore>,
    ) -> Self {
        Self {
            client,
            handles,
            store,
        }
    }

    /// A dispatcher with a fresh registry and store.
    pub fn with_client(client: Arc<dyn SearchClient>) -> Self {
        Self::new(
            client,
            Arc::new(HandleRegistry::new()),
            Arc::new(SessionStore::new()),
        )
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn handles(&self) -> &Arc<HandleRegistry> {
        &self.handles
    }

    /// Start a search under `req.name`, replacing any search already running
    /// under that name.
    ///
    /// Query errors are returned before anything is registered.
    pub fn dispatch(&self, req: DispatchRequest) -> Result<SearchTask, QueryParseError> {
        let request = build_request(&req).map_err(|e| {
            tracing::debug!(session = %req.name, error = %e, "Query rejected");
            e
        })?;

        let token = CancelToken::new();
        let handle = Handle::search(token.clone());
        let handle_id = handle.id();

        let session = Session::new(req.name.clone(), req.query.clone())
            .with_tag(req.tag.clone())
            .with_target(request.target());
        // Registry before store, as in `complete`.
        self.handles
            .register_with(&req.name, handle.clone(), || self.store.register(session));

        tracing::info!(
            session = %req.name,
            target = ?request.target(),
            space = request.space_id(),
            handle = handle_id,
            "Search dispatched"
        );
        tracing::debug!(session = %req.name, query = preview(&req.query), "Search query");

        let worker = SearchWorker {
            name: req.name.clone(),
            handle_id,
            token,
            client: Arc::clone(&self.client),
            handles: Arc::clone(&self.handles),
            store: Arc::clone(&self.store),
        };
        let join = std::thread::spawn(move || worker.run(request));

        Ok(SearchTask {
            name: req.name,
            handle,
            worker: join,
        })
    }

    /// Cancel the search running under `name`. Its session ends as Done.
    /// Returns whether a search was active.
    pub fn cancel(&self, name: &str) -> bool {
        let active = self.handles.is_active(name);
        self.handles.abort(name, false);
        active
    }

    /// Cancel and remove every session with `tag` (all sessions when `None`).
    pub fn clear(&self, tag: Option<&str>) {
        // Registry then store: a concurrent re-dispatch lands wholly before
        // or after the clear, and every removed session's search is
        // cancelled before the store lock is released.
        let removed = self.handles.abort_within(|abort| {
            self.store.clear_with(tag, |names| {
                for name in names {
                    abort(name.as_str());
                }
            })
        });
        tracing::debug!(tag = ?tag, removed = removed.len(), "Sessions cleared");
    }

    /// Compile `program` without running it.
    pub fn inspect(&self, program: &str, span: Span, space_id: &str) -> Inspection {
        query::inspect(program, span, space_id)
    }
}

impl std::fmt::Debug for SessionDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionDispatcher")
            .field("handles", &self.handles.len())
            .field("sessions", &self.store.len())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Background search worker
// =============================================================================

struct SearchWorker {
    name: String,
    handle_id: u64,
    token: CancelToken,
    client: Arc<dyn SearchClient>,
    handles: Arc<HandleRegistry>,
    store: Arc<SessionStore>,
}

impl SearchWorker {
    /// Issue the request and drain the stream into the store.
    fn run(self, request: SearchRequest) -> SearchOutcome {
        let started = Instant::now();

        let stream = match request.issue(self.client.as_ref(), self.token.clone()) {
            Ok(stream) => stream,
            Err(e) => return self.fail(e),
        };

        if let Err(e) = self.write(Transition::status(self.name.clone(), SessionStatus::Running)) {
            return self.orphan(e);
        }

        let mut chunks = 0;
        for item in stream {
            if self.token.is_cancelled() {
                return self.cancelled();
            }
            let PartialResults {
                tuples,
                descriptor,
                stats,
            } = match item {
                Ok(partial) => partial,
                Err(e) => return self.fail(e),
            };
            chunks += 1;

            if let Some(stats) = stats {
                let stats = Transition::Stats {
                    name: self.name.clone(),
                    stats,
                };
                if let Err(e) = self.write(stats) {
                    return self.orphan(e);
                }
            }
            if !tuples.is_empty() || !descriptor.is_empty() {
                tracing::trace!(
                    session = %self.name,
                    groups = tuples.len(),
                    tuples = tuples.values().map(Vec::len).sum::<usize>(),
                    "Merging partial results"
                );
                let results = Transition::Results {
                    name: self.name.clone(),
                    results: PartialResults {
                        tuples,
                        descriptor,
                        stats: None,
                    },
                };
                if let Err(e) = self.write(results) {
                    return self.orphan(e);
                }
            }
        }

        if self.token.is_cancelled() {
            return self.cancelled();
        }

        let store = &self.store;
        let name = &self.name;
        let mut orphaned = None;
        self.handles.complete(name, self.handle_id, || {
            orphaned = store
                .apply(Transition::status(name.clone(), SessionStatus::Done))
                .err();
        });
        if let Some(e) = orphaned {
            return self.orphan(e);
        }

        tracing::info!(
            session = %self.name,
            chunks,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Search complete"
        );
        SearchOutcome::Completed { chunks }
    }

    /// Apply a streamed transition unless this search has been cancelled.
    fn write(&self, transition: Transition) -> Result<bool, SessionNotFoundError> {
        self.store.apply_unless_cancelled(transition, &self.token)
    }

    /// Finish after cancellation. Marks Done only if this search still owns
    /// the session; a superseded search writes nothing.
    fn cancelled(&self) -> SearchOutcome {
        let store = &self.store;
        let name = &self.name;
        let owned = self.handles.complete(name, self.handle_id, || {
            // A concurrent clear may have removed the session; nothing to mark.
            let _ = store.apply(Transition::status(name.clone(), SessionStatus::Done));
        });
        tracing::info!(session = %self.name, superseded = !owned, "Search cancelled");
        SearchOutcome::Cancelled
    }

    /// Finish after an engine failure. Failures caused by our own
    /// cancellation are reported as cancellation.
    fn fail(&self, error: EngineError) -> SearchOutcome {
        if self.token.is_cancelled() {
            tracing::debug!(session = %self.name, error = %error, "Engine error after cancel");
            return self.cancelled();
        }
        tracing::warn!(session = %self.name, error = %error, "Search failed");

        let store = &self.store;
        let name = &self.name;
        let message = error.to_string();
        let mut orphaned = None;
        self.handles.complete(name, self.handle_id, || {
            orphaned = store
                .apply(Transition::Status {
                    name: name.clone(),
                    status: SessionStatus::Error,
                    error: Some(message),
                })
                .err();
        });
        match orphaned {
            Some(e) => self.orphan(e),
            None => SearchOutcome::Failed(error),
        }
    }

    /// The session was removed while this search still ran.
    fn orphan(&self, error: SessionNotFoundError) -> SearchOutcome {
        tracing::error!(
            session = %self.name,
            error = %error,
            "Session cleared while its search was still streaming"
        );
        self.token.cancel();
        self.handles.complete(&self.name, self.handle_id, || {});
        SearchOutcome::Orphaned(error)
    }
}
