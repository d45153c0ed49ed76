//! Per-action mutual exclusion, view-lifetime scoping and the chat poller.

use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error};

use crate::error::FlowError;
use crate::flows::MastermindService;

// ---------------------------------------------------------------------------
// In-flight actions
// ---------------------------------------------------------------------------

/// Keys of actions with a wallet round trip or backend call outstanding.
#[derive(Clone, Default)]
pub struct InFlight {
    keys: Arc<Mutex<HashSet<String>>>,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `key` until the returned guard is dropped.
    pub fn try_begin(&self, key: impl Into<String>) -> Result<InFlightGuard, FlowError> {
        let key = key.into();
        let mut keys = self.keys.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if !keys.insert(key.clone()) {
            debug!(key = %key, "Action already in flight");
            return Err(FlowError::AlreadyInFlight(key));
        }
        Ok(InFlightGuard {
            keys: self.keys.clone(),
            key,
        })
    }

    pub fn is_in_flight(&self, key: &str) -> bool {
        self.keys
            .lock()
            .map(|keys| keys.contains(key))
            .unwrap_or(false)
    }
}

#[must_use = "the action is released as soon as the guard is dropped"]
pub struct InFlightGuard {
    keys: Arc<Mutex<HashSet<String>>>,
    key: String,
}

impl InFlightGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if let Ok(mut keys) = self.keys.lock() {
            keys.remove(&self.key);
        }
    }
}

// ---------------------------------------------------------------------------
// View scope
// ---------------------------------------------------------------------------

/// Lifetime of the screen that started an action.
///
/// Work started through [`run`](Self::run) is never cancelled by closing the
/// scope. Only the hand-back to the view is dropped.
#[derive(Clone)]
pub struct ViewScope {
    closed: Arc<watch::Sender<bool>>,
}

impl Default for ViewScope {
    fn default() -> Self {
        Self::new()
    }
}

impl ViewScope {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { closed: Arc::new(tx) }
    }

    /// The user navigated away.
    pub fn close(&self) {
        self.closed.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// `None` if the scope closed before `fut` resolved.
    pub async fn run<F>(&self, fut: F) -> Option<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let mut closed = self.closed.subscribe();
        if *closed.borrow() {
            return None;
        }

        let task = tokio::spawn(fut);
        tokio::select! {
            joined = task => match joined {
                Ok(out) if !self.is_closed() => Some(out),
                Ok(_) => None,
                Err(e) => {
                    error!(error = %e, "Scoped task failed");
                    None
                }
            },
            _ = closed.wait_for(|c| *c) => {
                debug!("View closed, result will be dropped");
                None
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Message poller
// ---------------------------------------------------------------------------

/// Background chat refresh. Stops when dropped.
pub struct PollerHandle {
    task: JoinHandle<()>,
}

impl PollerHandle {
    pub fn stop(self) {
        self.task.abort();
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Poll `group_id`'s messages every `every`, merging into the message cache.
/// The first poll runs immediately.
pub fn spawn_message_poller(service: Arc<MastermindService>, group_id: String, every: Duration) -> PollerHandle {
    let task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            let added = service.refresh_messages(&group_id).await;
            if added > 0 {
                debug!(group_id = %group_id, added, "Poll merged new messages");
            }
        }
    });
    PollerHandle { task }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_attempt_is_rejected_until_guard_drops() {
        let inflight = InFlight::new();
        let guard = inflight.try_begin("join:g-1").unwrap();
        assert_eq!(guard.key(), "join:g-1");

        let err = inflight.try_begin("join:g-1").err().unwrap();
        assert!(matches!(err, FlowError::AlreadyInFlight(k) if k == "join:g-1"));
        // Other actions are independent.
        assert!(inflight.try_begin("join:g-2").is_ok());

        drop(guard);
        assert!(!inflight.is_in_flight("join:g-1"));
        assert!(inflight.try_begin("join:g-1").is_ok());
    }

    #[tokio::test]
    async fn open_scope_hands_back_result() {
        let scope = ViewScope::new();
        assert_eq!(scope.run(async { 7 }).await, Some(7));
    }

    #[tokio::test]
    async fn closed_scope_drops_late_result_but_work_completes() {
        let scope = ViewScope::new();
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();

        let closer = scope.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            closer.close();
        });

        let result = scope
            .run(async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                let _ = done_tx.send(());
                "recorded"
            })
            .await;

        assert_eq!(result, None);
        // The work itself was not cancelled.
        assert!(done_rx.await.is_ok());
    }

    #[tokio::test]
    async fn closed_scope_rejects_new_work() {
        let scope = ViewScope::new();
        scope.close();
        assert!(scope.is_closed());
        assert_eq!(scope.run(async { 1 }).await, None);
    }
}
