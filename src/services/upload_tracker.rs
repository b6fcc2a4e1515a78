//! Registry of asynchronous upload tasks.
//!
//! One tracker is built at startup and shared through an `Arc`. Entries are
//! mutated under the DashMap shard lock for their key, so a backend progress
//! callback and a completion call for the same task never interleave.
//! Readers get cloned snapshots.

use crate::models::upload_task::UploadTask;
use crate::services::storage_backend::{ProgressEvent, ProgressListener};
use chrono::Utc;
use dashmap::DashMap;
use std::{sync::Arc, time::Duration};
use tracing::{debug, info, warn};

#[derive(Default)]
pub struct UploadTracker {
    tasks: DashMap<String, UploadTask>,
}

impl UploadTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task. An existing task with the same id is replaced.
    pub fn create(&self, task_id: &str, filename: &str, total_size: u64) {
        debug!("created upload task {} for {} ({} bytes)", task_id, filename, total_size);
        self.tasks
            .insert(task_id.to_string(), UploadTask::new(task_id, filename, total_size));
    }

    /// Set the absolute byte count and total size.
    ///
    /// The byte count never moves backwards and is clamped to the total.
    pub fn update_progress(&self, task_id: &str, bytes_transferred: u64, total_size: u64) {
        self.mutate(task_id, |task| {
            task.total_size = total_size;
            task.bytes_transferred = task.bytes_transferred.max(bytes_transferred).min(total_size);
        });
    }

    /// Add `delta` bytes to the transferred count, clamped to the total.
    pub fn add_bytes_transferred(&self, task_id: &str, delta: u64) {
        self.mutate(task_id, |task| {
            task.bytes_transferred = task
                .bytes_transferred
                .saturating_add(delta)
                .min(task.total_size);
        });
    }

    /// Move a task to its terminal state. Later calls are ignored.
    pub fn complete(&self, task_id: &str, success: bool, message: impl Into<String>) {
        let message = message.into();
        let applied = self.mutate(task_id, |task| {
            task.completed = true;
            task.success = success;
            if success {
                task.bytes_transferred = task.total_size;
            }
            task.message = Some(message.clone());
            task.finished_at = Some(Utc::now());
        });
        if applied {
            info!("upload task {} finished: success={}, {}", task_id, success, message);
        }
    }

    /// Snapshot of a task.
    pub fn get(&self, task_id: &str) -> Option<UploadTask> {
        self.tasks.get(task_id).map(|task| task.clone())
    }

    /// Drop finished tasks older than `ttl`, returning how many were removed.
    pub fn evict_finished(&self, ttl: Duration) -> usize {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        let cutoff = Utc::now().checked_sub_signed(ttl);
        let before = self.tasks.len();
        self.tasks.retain(|_, task| match (task.finished_at, cutoff) {
            (Some(finished), Some(cutoff)) => finished > cutoff,
            _ => true,
        });
        before.saturating_sub(self.tasks.len())
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Listener that feeds backend progress events into `task_id`.
    pub fn listener(self: &Arc<Self>, task_id: &str) -> TaskProgress {
        TaskProgress {
            tracker: Arc::clone(self),
            task_id: task_id.to_string(),
        }
    }

    /// Apply `f` to an unfinished task. Returns whether it ran.
    fn mutate<F: FnOnce(&mut UploadTask)>(&self, task_id: &str, f: F) -> bool {
        match self.tasks.get_mut(task_id) {
            Some(mut task) if !task.completed => {
                f(task.value_mut());
                true
            }
            Some(_) => false,
            None => {
                warn!("progress update for unknown upload task {}", task_id);
                false
            }
        }
    }
}

/// Adapter from backend [`ProgressEvent`]s to tracker transitions.
pub struct TaskProgress {
    tracker: Arc<UploadTracker>,
    task_id: String,
}

impl ProgressListener for TaskProgress {
    fn on_event(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::ContentLength(total) => {
                self.tracker.update_progress(&self.task_id, 0, total)
            }
            ProgressEvent::BytesTransferred(n) => {
                self.tracker.add_bytes_transferred(&self.task_id, n)
            }
            ProgressEvent::Completed => self.tracker.complete(&self.task_id, true, "upload complete"),
            ProgressEvent::Failed(message) => {
                self.tracker
                    .complete(&self.task_id, false, format!("upload failed: {}", message))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_and_get() {
        let tracker = UploadTracker::new();
        tracker.create("t1", "a.bin", 100);
        let task = tracker.get("t1").unwrap();
        assert_eq!(task.bytes_transferred, 0);
        assert!(!task.completed);
        assert!(tracker.get("missing").is_none());
    }

    #[test]
    fn bytes_never_decrease() {
        let tracker = UploadTracker::new();
        tracker.create("t", "a.bin", 100);
        tracker.add_bytes_transferred("t", 40);
        tracker.update_progress("t", 10, 100);
        assert_eq!(tracker.get("t").unwrap().bytes_transferred, 40);

        tracker.add_bytes_transferred("t", 500);
        assert_eq!(tracker.get("t").unwrap().bytes_transferred, 100);
    }

    #[test]
    fn complete_is_terminal() {
        let tracker = UploadTracker::new();
        tracker.create("t", "a.bin", 100);
        tracker.add_bytes_transferred("t", 30);
        tracker.complete("t", false, "boom");
        tracker.complete("t", true, "late");
        tracker.add_bytes_transferred("t", 50);

        let task = tracker.get("t").unwrap();
        assert!(task.completed);
        assert!(!task.success);
        assert_eq!(task.message.as_deref(), Some("boom"));
        assert_eq!(task.bytes_transferred, 30);
        assert!(task.progress() < 100.0);
    }

    #[test]
    fn success_reports_full_progress() {
        let tracker = UploadTracker::new();
        tracker.create("t", "a.bin", 100);
        tracker.add_bytes_transferred("t", 100);
        assert!(tracker.get("t").unwrap().progress() < 100.0);

        tracker.complete("t", true, "done");
        let task = tracker.get("t").unwrap();
        assert_eq!(task.progress(), 100.0);
        assert_eq!(task.bytes_transferred, 100);
    }

    #[test]
    fn listener_translates_events() {
        let tracker = Arc::new(UploadTracker::new());
        tracker.create("t", "a.bin", 10);
        let listener = tracker.listener("t");
        listener.on_event(ProgressEvent::ContentLength(10));
        listener.on_event(ProgressEvent::BytesTransferred(4));
        assert_eq!(tracker.get("t").unwrap().bytes_transferred, 4);
        listener.on_event(ProgressEvent::Completed);
        assert!(tracker.get("t").unwrap().success);
    }

    #[test]
    fn concurrent_increments_are_not_lost() {
        let tracker = Arc::new(UploadTracker::new());
        tracker.create("t", "big.bin", 1_000_000);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let tracker = Arc::clone(&tracker);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        tracker.add_bytes_transferred("t", 10);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(tracker.get("t").unwrap().bytes_transferred, 80_000);
    }

    #[test]
    fn eviction_only_drops_finished_tasks() {
        let tracker = UploadTracker::new();
        tracker.create("running", "a", 1);
        tracker.create("done", "b", 1);
        tracker.complete("done", true, "ok");

        assert_eq!(tracker.evict_finished(Duration::from_secs(3600)), 0);
        assert_eq!(tracker.evict_finished(Duration::ZERO), 1);
        assert!(tracker.get("running").is_some());
        assert!(tracker.get("done").is_none());
        assert_eq!(tracker.len(), 1);
    }
}
