//! `ActivityTracker` — counts active workers and fires suspension when none remain.
//!
//! "No active activity" is a sufficient local condition for suspension regardless of
//! operation kind: waits, retry delays, and external callbacks all converge on it because
//! their worker activities deregister when they have nothing left to do in-process.

use std::collections::HashSet;
use std::sync::Mutex;
use tokio::sync::Notify;

/// Tags an activity by what kind of work registered it, for diagnostics only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActivityKind {
    /// The user handler (or a child context's user function) itself.
    Context,
    /// A worker running a Step/Invoke/Callback/ChildContext's in-process portion.
    Worker,
}

#[derive(Default)]
struct Inner {
    active: HashSet<u64>,
    suspended: bool,
}

/// Counts registered activities and signals suspension exactly once, the moment the count
/// reaches zero.
pub struct ActivityTracker {
    inner: Mutex<Inner>,
    suspend: Notify,
}

impl ActivityTracker {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            suspend: Notify::new(),
        }
    }

    /// Register an activity id. Idempotent if already registered.
    pub fn register(&self, id: u64, _kind: ActivityKind) {
        let mut inner = self.inner.lock().unwrap();
        inner.active.insert(id);
    }

    /// Deregister an activity id. If this empties the active set and suspension has not
    /// already fired, fires it now. Returns `true` if this call fired suspension, so the
    /// caller can unwind immediately via the executor's race rather than continuing.
    pub fn deregister(&self, id: u64) -> bool {
        let mut inner = self.inner.lock().unwrap();
        inner.active.remove(&id);
        if inner.active.is_empty() && !inner.suspended {
            inner.suspended = true;
            self.suspend.notify_waiters();
            true
        } else {
            false
        }
    }

    /// True once the active set has reached zero and suspension has fired.
    pub fn is_suspended(&self) -> bool {
        self.inner.lock().unwrap().suspended
    }

    pub fn active_count(&self) -> usize {
        self.inner.lock().unwrap().active.len()
    }

    /// Resolves once suspension has fired; resolves immediately if it already has. Used by
    /// the executor's top-level race against the handler's `JoinHandle`.
    pub async fn suspended(&self) {
        // Construct the `Notified` future before checking the flag: `notified()` enrolls
        // this waiter so a `notify_waiters()` racing with the check below is not missed.
        let notified = self.suspend.notified();
        if self.is_suspended() {
            return;
        }
        notified.await;
    }
}

impl Default for ActivityTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn deregistering_last_activity_fires_suspension() {
        let tracker = ActivityTracker::new();
        tracker.register(1, ActivityKind::Context);
        assert!(tracker.deregister(1));
        assert!(tracker.is_suspended());
    }

    #[test]
    fn deregister_reports_who_fired_suspension() {
        let tracker = ActivityTracker::new();
        tracker.register(1, ActivityKind::Context);
        tracker.register(2, ActivityKind::Worker);
        assert!(!tracker.deregister(1));
        assert!(!tracker.is_suspended());
        assert!(tracker.deregister(2));
        assert!(tracker.is_suspended());
    }

    #[test]
    fn suspend_is_one_shot() {
        let tracker = ActivityTracker::new();
        tracker.register(1, ActivityKind::Context);
        tracker.deregister(1);
        // Re-registering and deregistering again must not re-fire (it already fired).
        tracker.register(2, ActivityKind::Worker);
        assert!(!tracker.deregister(2));
        assert!(tracker.is_suspended());
    }

    #[test]
    fn register_is_idempotent() {
        let tracker = ActivityTracker::new();
        tracker.register(1, ActivityKind::Context);
        tracker.register(1, ActivityKind::Context);
        assert_eq!(tracker.active_count(), 1);
    }

    #[tokio::test]
    async fn suspended_future_resolves_after_last_deregister() {
        let tracker = Arc::new(ActivityTracker::new());
        tracker.register(1, ActivityKind::Context);
        let waiter = {
            let tracker = tracker.clone();
            tokio::spawn(async move {
                tracker.suspended().await;
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        tracker.deregister(1);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("suspended() should resolve")
            .unwrap();
    }

    #[tokio::test]
    async fn suspended_future_resolves_immediately_if_already_fired() {
        let tracker = ActivityTracker::new();
        tracker.register(1, ActivityKind::Context);
        tracker.deregister(1);
        tokio::time::timeout(Duration::from_millis(50), tracker.suspended())
            .await
            .expect("suspended() should resolve immediately");
    }
}
