// LogQuest - app/handles.rs
//
// Cancellation handles for in-flight searches, and the registry that keeps
// at most one live handle per session id.
//
// Architecture:
//   - `CancelToken` is a cloneable `Arc<AtomicBool>`; the dispatcher passes a
//     clone into the engine call and the engine polls it between units of work.
//   - `HandleRegistry` owns the active handle for each id. Replacing a handle
//     cancels the old one first, so two streams never write one session.
//   - Every handle carries a unique id so a finishing stream can tell whether
//     it is still the active handle or has been superseded.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

// =============================================================================
// CancelToken
// =============================================================================

/// Cooperative cancellation flag shared between a caller and a running search.
///
/// Cancelling is idempotent and never fails; cancelling a token whose search
/// already finished is a no-op.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

// =============================================================================
// Handle
// =============================================================================

/// What kind of work a handle controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleKind {
    Search,
}

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

/// A cancellation capability bound to one in-flight query.
///
/// The callback runs at most once across all clones; later `cancel` calls
/// (on an abandoned or already-cancelled handle) do nothing.
#[derive(Clone)]
pub struct Handle {
    id: u64,
    kind: HandleKind,
    fired: Arc<AtomicBool>,
    cancel: Arc<dyn Fn() + Send + Sync>,
}

impl Handle {
    /// A handle whose cancellation runs `cancel`. The callback must be safe
    /// to call after the query has finished.
    pub fn new<F>(kind: HandleKind, cancel: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self {
            id: NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed),
            kind,
            fired: Arc::new(AtomicBool::new(false)),
            cancel: Arc::new(cancel),
        }
    }

    /// A search handle that cancels `token`.
    pub fn search(token: CancelToken) -> Self {
        Self::new(HandleKind::Search, move || token.cancel())
    }

    /// Process-unique handle id.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn kind(&self) -> HandleKind {
        self.kind
    }

    /// Signal the controlled query to stop. Safe to call at any time.
    pub fn cancel(&self) {
        if !self.fired.swap(true, Ordering::SeqCst) {
            (self.cancel)();
        }
    }

    /// Whether `cancel` has been invoked on this handle or a clone of it.
    pub fn is_cancelled(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handle")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// HandleRegistry
// =============================================================================

/// Tracks the active handle for each session id.
///
/// Shared by every dispatch; all operations serialize on one mutex and none
/// of them can fail.
#[derive(Debug, Default)]
pub struct HandleRegistry {
    active: Mutex<HashMap<String, Handle>>,
}

impl HandleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `handle` the active handle for `id`, cancelling any previous one
    /// first.
    pub fn register(&self, id: &str, handle: Handle) {
        self.register_with(id, handle, || {});
    }

    /// `register`, then run `on_registered` before the registry lock is
    /// released. Work done in `on_registered` cannot interleave with another
    /// registration, completion or abort for any id.
    pub fn register_with<F: FnOnce()>(&self, id: &str, handle: Handle, on_registered: F) {
        let mut active = self.active.lock();
        if let Some(previous) = active.get(id) {
            tracing::debug!(
                session = id,
                previous = previous.id(),
                next = handle.id(),
                "Replacing active handle; cancelling previous query"
            );
            previous.cancel();
        }
        active.insert(id.to_string(), handle);
        on_registered();
    }

    /// Cancel the active handle for `id`, if any. The entry is removed only
    /// when `propagate` is true; otherwise it stays until the stream finishes
    /// or a new handle replaces it.
    pub fn abort(&self, id: &str, propagate: bool) {
        let mut active = self.active.lock();
        if let Some(handle) = active.get(id) {
            tracing::debug!(session = id, handle = handle.id(), propagate, "Aborting query");
            handle.cancel();
        }
        if propagate {
            active.remove(id);
        }
    }

    /// Run `f` under the registry lock, handing it an `abort` callback that
    /// cancels and removes the handle for an id. Lets a caller decide what
    /// to abort (and act on it) with no registration slipping in between.
    pub fn abort_within<R, F>(&self, f: F) -> R
    where
        F: FnOnce(&mut dyn FnMut(&str)) -> R,
    {
        let mut active = self.active.lock();
        let mut abort = |id: &str| {
            if let Some(handle) = active.remove(id) {
                tracing::debug!(session = id, handle = handle.id(), "Aborting query");
                handle.cancel();
            }
        };
        f(&mut abort)
    }

    /// Drop the entry for `id` without cancelling it. Safe if absent.
    pub fn remove(&self, id: &str) {
        self.active.lock().remove(id);
    }

    /// Finish `handle_id` under `id`: if it is still the active handle, run
    /// `on_current` and remove it, all under the registry lock. Returns
    /// whether it was current. A superseded handle leaves the registry (and
    /// its successor) untouched.
    pub fn complete<F: FnOnce()>(&self, id: &str, handle_id: u64, on_current: F) -> bool {
        let mut active = self.active.lock();
        match active.get(id) {
            Some(handle) if handle.id() == handle_id => {
                on_current();
                active.remove(id);
                true
            }
            _ => false,
        }
    }

    /// Whether `id` has an active handle.
    pub fn is_active(&self, id: &str) -> bool {
        self.active.lock().contains_key(id)
    }

    /// Id of the active handle for `id`, if any.
    pub fn active_handle_id(&self, id: &str) -> Option<u64> {
        self.active.lock().get(id).map(Handle::id)
    }

    /// Session ids with an active handle, sorted.
    pub fn active_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.active.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.active.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_cancels_previous_and_activates_new() {
        let registry = HandleRegistry::new();
        let first = CancelToken::new();
        let second = CancelToken::new();

        registry.register("q1", Handle::search(first.clone()));
        assert!(!first.is_cancelled());

        let second_handle = Handle::search(second.clone());
        let second_id = second_handle.id();
        registry.register("q1", second_handle);

        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.active_handle_id("q1"), Some(second_id));
    }

    #[test]
    fn test_register_invokes_old_cancel_exactly_once() {
        use std::sync::atomic::AtomicUsize;

        let registry = HandleRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        registry.register(
            "q1",
            Handle::new(HandleKind::Search, move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        // Abort-then-register is how a re-dispatch replaces a running query.
        registry.abort("q1", false);
        registry.register("q1", Handle::search(CancelToken::new()));
        registry.register("q1", Handle::search(CancelToken::new()));

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_abort_without_propagate_keeps_entry() {
        let registry = HandleRegistry::new();
        let token = CancelToken::new();
        registry.register("q1", Handle::search(token.clone()));

        registry.abort("q1", false);
        assert!(token.is_cancelled());
        assert!(registry.is_active("q1"));

        registry.abort("q1", true);
        assert!(!registry.is_active("q1"));
    }

    #[test]
    fn test_abort_and_remove_absent_are_noops() {
        let registry = HandleRegistry::new();
        registry.abort("missing", true);
        registry.abort("missing", false);
        registry.remove("missing");
        assert!(registry.is_empty());
    }

    #[test]
    fn test_register_with_runs_after_previous_is_cancelled() {
        let registry = HandleRegistry::new();
        let first = CancelToken::new();
        registry.register("q1", Handle::search(first.clone()));

        let next = Handle::search(CancelToken::new());
        let next_id = next.id();
        let mut saw_cancelled = false;
        registry.register_with("q1", next, || saw_cancelled = first.is_cancelled());

        assert!(saw_cancelled);
        assert_eq!(registry.active_handle_id("q1"), Some(next_id));
    }

    #[test]
    fn test_abort_within_cancels_only_named_ids() {
        let registry = HandleRegistry::new();
        let a = CancelToken::new();
        let b = CancelToken::new();
        registry.register("a", Handle::search(a.clone()));
        registry.register("b", Handle::search(b.clone()));

        let aborted = registry.abort_within(|abort| {
            abort("a");
            abort("gone");
            2
        });

        assert_eq!(aborted, 2);
        assert!(a.is_cancelled());
        assert!(!b.is_cancelled());
        assert_eq!(registry.active_ids(), vec!["b".to_string()]);
    }

    #[test]
    fn test_remove_does_not_cancel() {
        let registry = HandleRegistry::new();
        let token = CancelToken::new();
        registry.register("q1", Handle::search(token.clone()));
        registry.remove("q1");
        assert!(!token.is_cancelled());
        assert!(!registry.is_active("q1"));
    }

    #[test]
    fn test_complete_only_for_current_handle() {
        let registry = HandleRegistry::new();
        let stale = Handle::search(CancelToken::new());
        let stale_id = stale.id();
        registry.register("q1", stale);
        let fresh = Handle::search(CancelToken::new());
        let fresh_id = fresh.id();
        registry.register("q1", fresh);

        let mut ran = false;
        assert!(!registry.complete("q1", stale_id, || ran = true));
        assert!(!ran);
        assert!(registry.is_active("q1"));

        assert!(registry.complete("q1", fresh_id, || ran = true));
        assert!(ran);
        assert!(!registry.is_active("q1"));
    }

    #[test]
    fn test_cancel_on_abandoned_handle_is_safe() {
        let token = CancelToken::new();
        let handle = Handle::search(token.clone());
        let registry = HandleRegistry::new();
        registry.register("q1", handle.clone());
        registry.remove("q1");
        handle.cancel();
        handle.cancel();
        assert!(token.is_cancelled());
        assert_eq!(handle.kind(), HandleKind::Search);
    }

    #[test]
    fn test_active_ids_sorted() {
        let registry = HandleRegistry::new();
        registry.register("b", Handle::search(CancelToken::new()));
        registry.register("a", Handle::search(CancelToken::new()));
        assert_eq!(registry.active_ids(), vec!["a".to_string(), "b".to_string()]);
    }
}
