//! Stop requests for running jobs, keyed by an external job handle.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

/// Opaque external identifier correlating a running job with stop requests.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobHandle(String);

impl JobHandle {
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobHandle {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for JobHandle {
    fn from(s: String) -> Self {
        Self(s)
    }
}

type StopFn = Arc<dyn Fn() + Send + Sync>;

struct Registration {
    id: u64,
    stop: StopFn,
    stopped: bool,
}

/// Process-wide (or per-test) map from job handle to stop callback.
///
/// Cloning shares the same registry. Callbacks run outside the lock.
#[derive(Clone, Default)]
pub struct CancellationRegistry {
    entries: Arc<Mutex<HashMap<JobHandle, Registration>>>,
    next_id: Arc<AtomicU64>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_entries(&self) -> std::sync::MutexGuard<'_, HashMap<JobHandle, Registration>> {
        self.entries.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned cancellation registry mutex");
            poisoned.into_inner()
        })
    }

    /// Associate `stop` with `handle`. A later registration for the same handle wins.
    ///
    /// Returns an id that identifies this particular registration.
    pub fn register(
        &self,
        handle: impl Into<JobHandle>,
        stop: impl Fn() + Send + Sync + 'static,
    ) -> u64 {
        let handle = handle.into();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let previous = self.lock_entries().insert(
            handle.clone(),
            Registration {
                id,
                stop: Arc::new(stop),
                stopped: false,
            },
        );
        if previous.is_some() {
            tracing::debug!(%handle, "Replaced existing stop registration");
        }
        id
    }

    /// Ask the job behind `handle` to stop.
    ///
    /// Returns `false` if nothing is registered. The callback fires at most once
    /// per registration; repeated requests return `true` without re-invoking it.
    pub fn request_stop(&self, handle: impl Into<JobHandle>) -> bool {
        let handle = handle.into();
        let stop = {
            let mut entries = self.lock_entries();
            let Some(registration) = entries.get_mut(&handle) else {
                return false;
            };
            if registration.stopped {
                return true;
            }
            registration.stopped = true;
            Arc::clone(&registration.stop)
        };

        tracing::info!(%handle, "Stop requested");
        stop();
        true
    }

    /// Remove the mapping for `handle`, whoever registered it.
    pub fn deregister(&self, handle: impl Into<JobHandle>) {
        self.lock_entries().remove(&handle.into());
    }

    /// Remove the mapping only if it still belongs to registration `id`.
    pub(crate) fn deregister_registration(&self, handle: &JobHandle, id: u64) {
        let mut entries = self.lock_entries();
        if entries.get(handle).is_some_and(|r| r.id == id) {
            entries.remove(handle);
        }
    }

    pub fn is_registered(&self, handle: impl Into<JobHandle>) -> bool {
        self.lock_entries().contains_key(&handle.into())
    }

    pub fn active_handles(&self) -> Vec<JobHandle> {
        self.lock_entries().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter() -> (Arc<AtomicUsize>, impl Fn() + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        (count, move || {
            c.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_unknown_handle_returns_false() {
        let registry = CancellationRegistry::new();
        assert!(!registry.request_stop("unknown"));
        assert!(registry.active_handles().is_empty());
    }

    #[test]
    fn test_request_stop_invokes_once() {
        let registry = CancellationRegistry::new();
        let (count, stop) = counter();
        registry.register("job-1", stop);

        assert!(registry.request_stop("job-1"));
        assert!(registry.request_stop("job-1"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_reregistering_arms_a_new_callback() {
        let registry = CancellationRegistry::new();
        let (first, stop_first) = counter();
        let (second, stop_second) = counter();

        registry.register("job-1", stop_first);
        assert!(registry.request_stop("job-1"));
        registry.register("job-1", stop_second);
        assert!(registry.request_stop("job-1"));

        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_last_registration_wins() {
        let registry = CancellationRegistry::new();
        let (first, stop_first) = counter();
        let (second, stop_second) = counter();

        registry.register("job-1", stop_first);
        registry.register("job-1", stop_second);
        registry.request_stop("job-1");

        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_deregister_removes_mapping() {
        let registry = CancellationRegistry::new();
        let (count, stop) = counter();
        registry.register("job-1", stop);
        assert!(registry.is_registered("job-1"));

        registry.deregister("job-1");
        assert!(!registry.is_registered("job-1"));
        assert!(!registry.request_stop("job-1"));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_stale_registration_does_not_remove_newer_one() {
        let registry = CancellationRegistry::new();
        let (_, stop_first) = counter();
        let (_, stop_second) = counter();
        let handle = JobHandle::from("job-1");

        let old = registry.register(handle.clone(), stop_first);
        registry.register(handle.clone(), stop_second);
        registry.deregister_registration(&handle, old);

        assert!(registry.is_registered(handle));
    }

    #[test]
    fn test_callback_may_reenter_registry() {
        let registry = CancellationRegistry::new();
        let inner = registry.clone();
        registry.register("job-1", move || inner.deregister("job-1"));

        assert!(registry.request_stop("job-1"));
        assert!(!registry.is_registered("job-1"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_callers() {
        let registry = CancellationRegistry::new();
        let (count, stop) = counter();
        let stop = Arc::new(stop);

        let handles: Vec<_> = (0..32)
            .map(|i| {
                let registry = registry.clone();
                let stop = Arc::clone(&stop);
                tokio::spawn(async move {
                    let handle = format!("job-{}", i % 4);
                    registry.register(handle.clone(), move || stop());
                    registry.request_stop(handle.clone());
                    registry.deregister(handle);
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(count.load(Ordering::SeqCst) <= 32);
        assert!(registry.active_handles().is_empty());
    }
}
