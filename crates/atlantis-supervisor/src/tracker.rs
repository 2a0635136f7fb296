use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{
    AtomicBool,
    AtomicU64,
    Ordering,
};
use std::sync::{
    Arc,
    Mutex,
};
use std::time::Duration;

use log::info;
use tokio::task::JoinHandle;

/// Registry of in-flight RPC operations plus the maintenance flag. The
/// supervisor is "idle" when no task is registered; maintenance is driven
/// by a file watcher so operators can flip it with `touch`.
#[derive(Clone)]
pub struct TaskTracker {
    inner: Arc<TrackerInner>,
}

struct TrackerInner {
    next_id: AtomicU64,
    active: Mutex<HashMap<u64, String>>,
    maintenance: AtomicBool,
}

impl TaskTracker {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TrackerInner {
                next_id: AtomicU64::new(1),
                active: Mutex::new(HashMap::new()),
                maintenance: AtomicBool::new(false),
            }),
        }
    }

    /// Registers a task; the returned guard deregisters on drop, so every
    /// exit path of an operation counts.
    pub fn register(&self, name: &str) -> TaskGuard {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .active
            .lock()
            .expect("tracker lock poisoned")
            .insert(id, name.to_string());
        TaskGuard {
            tracker: self.clone(),
            id,
        }
    }

    pub fn idle(&self) -> bool {
        self.inner
            .active
            .lock()
            .expect("tracker lock poisoned")
            .is_empty()
    }

    /// Idle from the point of view of one running task: true when nothing
    /// but that task is in flight.
    pub fn idle_except(&self, task_id: u64) -> bool {
        self.inner
            .active
            .lock()
            .expect("tracker lock poisoned")
            .keys()
            .all(|id| *id == task_id)
    }

    pub fn under_maintenance(&self) -> bool {
        self.inner.maintenance.load(Ordering::SeqCst)
    }

    pub fn set_maintenance(&self, maintenance: bool) {
        self.inner.maintenance.store(maintenance, Ordering::SeqCst);
    }
}

impl Default for TaskTracker {
    fn default() -> Self {
        Self::new()
    }
}

pub struct TaskGuard {
    tracker: TaskTracker,
    id: u64,
}

impl TaskGuard {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.tracker
            .inner
            .active
            .lock()
            .expect("tracker lock poisoned")
            .remove(&self.id);
    }
}

/// Polls the maintenance file: present means under maintenance. Runs until
/// the process exits.
pub fn spawn_maintenance_checker(
    tracker: TaskTracker, file: PathBuf, interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let present = tokio::fs::try_exists(&file).await.unwrap_or(false);
            if present != tracker.under_maintenance() {
                info!(
                    "maintenance mode {}",
                    if present { "entered" } else { "left" }
                );
            }
            tracker.set_maintenance(present);
            tokio::time::sleep(interval).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_follows_guard_lifetimes() {
        let tracker = TaskTracker::new();
        assert!(tracker.idle());

        let first = tracker.register("Deploy");
        let second = tracker.register("List");
        assert!(!tracker.idle());
        assert!(!tracker.idle_except(first.id()));

        drop(second);
        assert!(tracker.idle_except(first.id()));
        assert!(!tracker.idle());

        drop(first);
        assert!(tracker.idle());
    }

    #[tokio::test]
    async fn maintenance_tracks_the_marker_file() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("maint");
        let tracker = TaskTracker::new();
        let checker = spawn_maintenance_checker(
            tracker.clone(),
            marker.clone(),
            Duration::from_millis(20),
        );

        assert!(!tracker.under_maintenance());

        tokio::fs::write(&marker, b"").await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(tracker.under_maintenance());

        tokio::fs::remove_file(&marker).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!tracker.under_maintenance());

        checker.abort();
    }
}
