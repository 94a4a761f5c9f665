// LogQuest - app/store.rs
//
// The session store: authoritative mapping from session name to Session.
//
// Architecture:
//   - State changes only through `Transition` values applied by `apply`;
//     there is no other mutable access.
//   - One `RwLock` guards the map. Each transition runs entirely under the
//     write lock, so readers never observe a half-applied transition and
//     concurrent producers cannot lose each other's updates.
//   - Every applied transition is published as a `StoreEvent` to subscribers
//     (typically the presentation layer polling once per frame), while still
//     under the write lock so events arrive in application order.

use crate::app::handles::CancelToken;
use crate::core::merge::merge_into;
use crate::core::model::{PartialResults, ResultSnapshot, Session, SessionStatus, Stats};
use crate::util::constants::EXPECTED_STORE_SUBSCRIBERS;
use crate::util::error::SessionNotFoundError;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::mpsc;

// =============================================================================
// Transitions
// =============================================================================

/// The fixed set of state changes the store accepts.
#[derive(Debug, Clone)]
pub enum Transition {
    /// Insert or overwrite a full session record.
    Register(Session),
    /// Replace the stats payload of an existing session.
    Stats { name: String, stats: Stats },
    /// Set the status of an existing session. `error` is stored alongside
    /// (and cleared when `None`).
    Status {
        name: String,
        status: SessionStatus,
        error: Option<String>,
    },
    /// Merge a partial batch into an existing session's results.
    Results { name: String, results: PartialResults },
    /// Reset an existing session's results to the empty snapshot.
    ResultsClear { name: String },
    /// Remove every session with this tag, or every session when `None`.
    Clear { tag: Option<String> },
}

impl Transition {
    pub fn status(name: impl Into<String>, status: SessionStatus) -> Self {
        Transition::Status {
            name: name.into(),
            status,
            error: None,
        }
    }

    pub fn kind(&self) -> TransitionKind {
        match self {
            Transition::Register(_) => TransitionKind::Register,
            Transition::Stats { .. } => TransitionKind::Stats,
            Transition::Status { .. } => TransitionKind::Status,
            Transition::Results { .. } => TransitionKind::Results,
            Transition::ResultsClear { .. } => TransitionKind::ResultsClear,
            Transition::Clear { .. } => TransitionKind::Clear,
        }
    }
}

/// Discriminant of a `Transition`, carried on store events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionKind {
    Register,
    Stats,
    Status,
    Results,
    ResultsClear,
    Clear,
}

/// Notification that a transition was applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreEvent {
    pub kind: TransitionKind,
    /// Sessions affected. For `Clear`, the sessions that were removed.
    pub names: Vec<String>,
}

// =============================================================================
// SessionStore
// =============================================================================

/// Thread-safe session state container. Share it behind an `Arc`.
#[derive(Debug)]
pub struct SessionStore {
    sessions: RwLock<BTreeMap<String, Session>>,
    subscribers: Mutex<Vec<mpsc::Sender<StoreEvent>>>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(BTreeMap::new()),
            subscribers: Mutex::new(Vec::with_capacity(EXPECTED_STORE_SUBSCRIBERS)),
        }
    }

    /// Apply one transition atomically.
    ///
    /// Per-session transitions on a missing session fail with
    /// `SessionNotFoundError`; that signals a lifecycle-ordering bug in the
    /// caller and leaves the store unchanged.
    pub fn apply(&self, transition: Transition) -> Result<(), SessionNotFoundError> {
        let mut sessions = self.sessions.write();
        let event = apply_to(&mut sessions, transition)?;
        self.publish(event);
        Ok(())
    }

    /// Insert or overwrite `session`. Registration has no precondition and
    /// cannot fail.
    pub fn register(&self, session: Session) {
        let mut sessions = self.sessions.write();
        let name = insert(&mut sessions, session);
        self.publish(StoreEvent {
            kind: TransitionKind::Register,
            names: vec![name],
        });
    }

    /// Remove every session with `tag` (every session when `None`) and
    /// return the removed names. Same effect as applying `Transition::Clear`.
    pub fn clear(&self, tag: Option<&str>) -> Vec<String> {
        self.clear_with(tag, |_| {})
    }

    /// `clear`, running `on_removed` with the removed names before the write
    /// lock is released. Streams cancelled from `on_removed` can never see
    /// their session missing.
    pub fn clear_with<F>(&self, tag: Option<&str>, on_removed: F) -> Vec<String>
    where
        F: FnOnce(&[String]),
    {
        let mut sessions = self.sessions.write();
        let transition = Transition::Clear {
            tag: tag.map(str::to_string),
        };
        match apply_to(&mut sessions, transition) {
            Ok(event) => {
                on_removed(&event.names);
                let removed = event.names.clone();
                self.publish(event);
                removed
            }
            // Clear has no precondition.
            Err(_) => Vec::new(),
        }
    }

    /// Apply `transition` only if `token` has not been cancelled, checking
    /// the token under the write lock. Returns whether it was applied.
    ///
    /// A stream that has been superseded by a newer dispatch cancels its
    /// token before the newer dispatch registers; checking here means a
    /// stale stream can never write into its successor's session.
    pub fn apply_unless_cancelled(
        &self,
        transition: Transition,
        token: &CancelToken,
    ) -> Result<bool, SessionNotFoundError> {
        let mut sessions = self.sessions.write();
        if token.is_cancelled() {
            tracing::trace!(kind = ?transition.kind(), "Skipping transition from cancelled stream");
            return Ok(false);
        }
        let event = apply_to(&mut sessions, transition)?;
        self.publish(event);
        Ok(true)
    }

    /// A copy of the named session, if present.
    pub fn get(&self, name: &str) -> Option<Session> {
        self.sessions.read().get(name).cloned()
    }

    /// Sessions ordered by name, restricted to `tag` when given.
    pub fn list(&self, tag: Option<&str>) -> Vec<Session> {
        self.sessions
            .read()
            .values()
            .filter(|s| tag.is_none() || s.tag.as_deref() == tag)
            .cloned()
            .collect()
    }

    /// Session names in order.
    pub fn names(&self) -> Vec<String> {
        self.sessions.read().keys().cloned().collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.sessions.read().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Receive a `StoreEvent` for every transition applied from now on.
    /// Dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> mpsc::Receiver<StoreEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.lock().push(tx);
        rx
    }

    fn publish(&self, event: StoreEvent) {
        let mut subscribers = self.subscribers.lock();
        // Disconnected receivers are pruned on the next publish.
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

// =============================================================================
// Transition application
// =============================================================================

fn insert(sessions: &mut BTreeMap<String, Session>, session: Session) -> String {
    let name = session.name.clone();
    if sessions.insert(name.clone(), session).is_some() {
        tracing::debug!(session = %name, "Re-registered session; previous record replaced");
    }
    name
}

fn existing<'a>(
    sessions: &'a mut BTreeMap<String, Session>,
    name: &str,
) -> Result<&'a mut Session, SessionNotFoundError> {
    sessions.get_mut(name).ok_or_else(|| SessionNotFoundError {
        name: name.to_string(),
    })
}

fn apply_to(
    sessions: &mut BTreeMap<String, Session>,
    transition: Transition,
) -> Result<StoreEvent, SessionNotFoundError> {
    let kind = transition.kind();
    let names = match transition {
        Transition::Register(session) => vec![insert(sessions, session)],
        Transition::Stats { name, stats } => {
            existing(sessions, &name)?.stats = stats;
            vec![name]
        }
        Transition::Status {
            name,
            status,
            error,
        } => {
            let session = existing(sessions, &name)?;
            if !status.follows(session.status) {
                // Not enforced; recorded so out-of-order writers are visible.
                tracing::warn!(
                    session = %name,
                    from = %session.status,
                    to = %status,
                    "Non-forward status transition"
                );
            }
            session.status = status;
            session.error = error;
            vec![name]
        }
        Transition::Results { name, results } => {
            let session = existing(sessions, &name)?;
            let accumulated = std::mem::take(&mut session.results);
            session.results = merge_into(accumulated, results);
            vec![name]
        }
        Transition::ResultsClear { name } => {
            existing(sessions, &name)?.results = ResultSnapshot::empty();
            vec![name]
        }
        Transition::Clear { tag: None } => {
            let removed: Vec<String> = sessions.keys().cloned().collect();
            sessions.clear();
            removed
        }
        Transition::Clear { tag: Some(tag) } => {
            let removed: Vec<String> = sessions
                .values()
                .filter(|s| s.tag.as_deref() == Some(tag.as_str()))
                .map(|s| s.name.clone())
                .collect();
            for name in &removed {
                sessions.remove(name);
            }
            removed
        }
    };
    Ok(StoreEvent { kind, names })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::{Column, ColumnType, Descriptor};
    use serde_json::json;

    fn register(store: &SessionStore, name: &str, tag: Option<&str>) {
        store
            .apply(Transition::Register(
                Session::new(name, "error").with_tag(tag.map(str::to_string)),
            ))
            .unwrap();
    }

    fn batch(key: &str, values: &[&str], desc: Option<Descriptor>) -> PartialResults {
        let mut p = PartialResults::default();
        p.tuples.insert(
            key.to_string(),
            values.iter().map(|v| vec![json!(v)]).collect(),
        );
        if let Some(d) = desc {
            p.descriptor.insert(key.to_string(), d);
        }
        p
    }

    fn d1() -> Descriptor {
        Descriptor {
            columns: vec![Column::new("message", ColumnType::String)],
            source: Some("d1".to_string()),
        }
    }

    #[test]
    fn test_results_accumulate_across_batches() {
        let store = SessionStore::new();
        register(&store, "q1", Some("space-A"));
        store
            .apply(Transition::Results {
                name: "q1".to_string(),
                results: batch("g1", &["t1"], Some(d1())),
            })
            .unwrap();
        store
            .apply(Transition::Results {
                name: "q1".to_string(),
                results: batch("g1", &["t2"], None),
            })
            .unwrap();

        let s = store.get("q1").unwrap();
        assert_eq!(s.results.tuples["g1"], vec![vec![json!("t1")], vec![json!("t2")]]);
        assert_eq!(s.results.descriptor["g1"], d1());
    }

    #[test]
    fn test_results_append_into_existing_allocation() {
        let store = SessionStore::new();
        register(&store, "q1", None);
        let mut rows = Vec::with_capacity(64);
        rows.push(vec![json!("t0")]);
        let mut first = PartialResults::default();
        first.tuples.insert("g1".to_string(), rows);
        store
            .apply(Transition::Results {
                name: "q1".to_string(),
                results: first,
            })
            .unwrap();

        let tuples_ptr = || store.sessions.read()["q1"].results.tuples["g1"].as_ptr();
        let before = tuples_ptr();
        for i in 1..32 {
            let value = format!("t{i}");
            store
                .apply(Transition::Results {
                    name: "q1".to_string(),
                    results: batch("g1", &[value.as_str()], None),
                })
                .unwrap();
        }

        // Accumulated tuples are never copied per merge.
        assert_eq!(tuples_ptr(), before);
        let s = store.get("q1").unwrap();
        assert_eq!(s.results.tuple_count(), 32);
        assert_eq!(s.results.tuples["g1"][31], vec![json!("t31")]);
    }

    #[test]
    fn test_per_session_transitions_require_existing_session() {
        let store = SessionStore::new();
        let transitions = vec![
            Transition::Stats {
                name: "ghost".to_string(),
                stats: json!({}),
            },
            Transition::status("ghost", SessionStatus::Running),
            Transition::Results {
                name: "ghost".to_string(),
                results: PartialResults::default(),
            },
            Transition::ResultsClear {
                name: "ghost".to_string(),
            },
        ];
        for t in transitions {
            let err = store.apply(t).unwrap_err();
            assert_eq!(err.name, "ghost");
        }
        assert!(store.is_empty());
    }

    #[test]
    fn test_stats_last_write_wins() {
        let store = SessionStore::new();
        register(&store, "q1", None);
        for n in [1, 2, 3] {
            store
                .apply(Transition::Stats {
                    name: "q1".to_string(),
                    stats: json!({ "records_read": n }),
                })
                .unwrap();
        }
        assert_eq!(store.get("q1").unwrap().stats["records_read"], 3);
    }

    #[test]
    fn test_status_and_error_message() {
        let store = SessionStore::new();
        register(&store, "q1", None);
        store
            .apply(Transition::Status {
                name: "q1".to_string(),
                status: SessionStatus::Error,
                error: Some("space gone".to_string()),
            })
            .unwrap();
        let s = store.get("q1").unwrap();
        assert_eq!(s.status, SessionStatus::Error);
        assert_eq!(s.error.as_deref(), Some("space gone"));
    }

    #[test]
    fn test_non_forward_status_is_applied() {
        let store = SessionStore::new();
        register(&store, "q1", None);
        store.apply(Transition::status("q1", SessionStatus::Done)).unwrap();
        store.apply(Transition::status("q1", SessionStatus::Running)).unwrap();
        assert_eq!(store.get("q1").unwrap().status, SessionStatus::Running);
    }

    #[test]
    fn test_results_clear_resets_to_empty_snapshot() {
        let store = SessionStore::new();
        register(&store, "q1", None);
        store
            .apply(Transition::Results {
                name: "q1".to_string(),
                results: batch("g1", &["t1"], Some(d1())),
            })
            .unwrap();
        store
            .apply(Transition::ResultsClear {
                name: "q1".to_string(),
            })
            .unwrap();
        assert_eq!(store.get("q1").unwrap().results, ResultSnapshot::empty());
    }

    #[test]
    fn test_clear_by_tag_leaves_others() {
        let store = SessionStore::new();
        register(&store, "q1", Some("A"));
        register(&store, "q2", Some("B"));
        register(&store, "q3", None);

        store
            .apply(Transition::Clear {
                tag: Some("A".to_string()),
            })
            .unwrap();
        assert_eq!(store.names(), vec!["q2".to_string(), "q3".to_string()]);

        store.apply(Transition::Clear { tag: None }).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_clear_returns_removed_names() {
        let store = SessionStore::new();
        let events = store.subscribe();
        register(&store, "q1", Some("A"));
        register(&store, "q2", Some("B"));
        register(&store, "q3", Some("A"));

        assert_eq!(store.clear(Some("A")), vec!["q1".to_string(), "q3".to_string()]);
        assert_eq!(store.clear(Some("A")), Vec::<String>::new());
        assert_eq!(store.names(), vec!["q2".to_string()]);

        let last = events.try_iter().last().unwrap();
        assert_eq!(last.kind, TransitionKind::Clear);
        assert!(last.names.is_empty());

        let token = CancelToken::new();
        let removed = store.clear_with(None, |names| {
            assert_eq!(names, ["q2".to_string()]);
            token.cancel();
        });
        assert_eq!(removed, vec!["q2".to_string()]);
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_list_filters_by_tag() {
        let store = SessionStore::new();
        register(&store, "q1", Some("A"));
        register(&store, "q2", Some("B"));
        register(&store, "q3", Some("A"));
        let names: Vec<_> = store.list(Some("A")).into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["q1", "q3"]);
        assert_eq!(store.list(None).len(), 3);
    }

    #[test]
    fn test_register_overwrites() {
        let store = SessionStore::new();
        register(&store, "q1", Some("A"));
        store
            .apply(Transition::Results {
                name: "q1".to_string(),
                results: batch("g1", &["t1"], None),
            })
            .unwrap();
        register(&store, "q1", Some("B"));
        let s = store.get("q1").unwrap();
        assert!(s.results.is_empty());
        assert_eq!(s.tag.as_deref(), Some("B"));
    }

    #[test]
    fn test_apply_unless_cancelled_skips() {
        let store = SessionStore::new();
        register(&store, "q1", None);
        let token = CancelToken::new();
        assert!(store
            .apply_unless_cancelled(Transition::status("q1", SessionStatus::Running), &token)
            .unwrap());
        token.cancel();
        assert!(!store
            .apply_unless_cancelled(Transition::status("q1", SessionStatus::Done), &token)
            .unwrap());
        assert_eq!(store.get("q1").unwrap().status, SessionStatus::Running);
    }

    #[test]
    fn test_subscribers_see_events_in_order() {
        let store = SessionStore::new();
        let rx = store.subscribe();
        register(&store, "q1", Some("A"));
        store.apply(Transition::status("q1", SessionStatus::Running)).unwrap();
        store
            .apply(Transition::Clear {
                tag: Some("A".to_string()),
            })
            .unwrap();

        let kinds: Vec<_> = rx.try_iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                TransitionKind::Register,
                TransitionKind::Status,
                TransitionKind::Clear
            ]
        );
    }

    #[test]
    fn test_dropped_subscriber_is_pruned() {
        let store = SessionStore::new();
        drop(store.subscribe());
        register(&store, "q1", None);
        assert!(store.subscribers.lock().is_empty());
    }

    #[test]
    fn test_concurrent_producers_do_not_lose_updates() {
        use std::sync::Arc;

        let store = Arc::new(SessionStore::new());
        register(&store, "q1", None);
        let workers: Vec<_> = (0..8)
            .map(|w| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for i in 0..50 {
                        let key = format!("g{w}");
                        let value = format!("{w}-{i}");
                        store
                            .apply(Transition::Results {
                                name: "q1".to_string(),
                                results: batch(&key, &[value.as_str()], None),
                            })
                            .unwrap();
                    }
                })
            })
            .collect();
        for w in workers {
            w.join().unwrap();
        }
        let s = store.get("q1").unwrap();
        assert_eq!(s.results.tuple_count(), 400);
        // Within each producer, order is preserved.
        let g3: Vec<_> = s.results.tuples["g3"].iter().map(|t| t[0].clone()).collect();
        let expected: Vec<_> = (0..50).map(|i| json!(format!("3-{i}"))).collect();
        assert_eq!(g3, expected);
    }
}
