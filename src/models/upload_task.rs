//! Represents the progress of one asynchronous upload.

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer, ser::SerializeStruct};

/// Highest percentage reported before a task has finished successfully.
const IN_FLIGHT_PROGRESS_CAP: f64 = 99.0;

/// In-memory state of an asynchronous upload.
///
/// `bytes_transferred` only grows and never exceeds `total_size`. Once
/// `completed` is set the task is frozen.
#[derive(Clone, Debug, PartialEq)]
pub struct UploadTask {
    pub task_id: String,
    pub filename: String,
    pub total_size: u64,
    pub bytes_transferred: u64,
    pub completed: bool,
    pub success: bool,
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Set when the task reaches a terminal state.
    pub finished_at: Option<DateTime<Utc>>,
}

impl UploadTask {
    pub fn new(task_id: impl Into<String>, filename: impl Into<String>, total_size: u64) -> Self {
        Self {
            task_id: task_id.into(),
            filename: filename.into(),
            total_size,
            bytes_transferred: 0,
            completed: false,
            success: false,
            message: None,
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Percentage of bytes transferred, in `0.0..=100.0`.
    ///
    /// Only a successfully completed task reports 100.
    pub fn progress(&self) -> f64 {
        if self.completed && self.success {
            return 100.0;
        }
        if self.total_size == 0 {
            return 0.0;
        }
        let ratio = self.bytes_transferred as f64 / self.total_size as f64 * 100.0;
        ratio.min(100.0).min(IN_FLIGHT_PROGRESS_CAP)
    }
}

impl Serialize for UploadTask {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("UploadTask", 9)?;
        state.serialize_field("task_id", &self.task_id)?;
        state.serialize_field("filename", &self.filename)?;
        state.serialize_field("total_size", &self.total_size)?;
        state.serialize_field("bytes_transferred", &self.bytes_transferred)?;
        state.serialize_field("progress", &self.progress())?;
        state.serialize_field("completed", &self.completed)?;
        state.serialize_field("success", &self.success)?;
        state.serialize_field("message", &self.message)?;
        state.serialize_field("created_at", &self.created_at)?;
        state.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_is_held_below_100_until_success() {
        let mut task = UploadTask::new("t", "f.bin", 10);
        task.bytes_transferred = 10;
        assert_eq!(task.progress(), IN_FLIGHT_PROGRESS_CAP);

        task.completed = true;
        task.success = true;
        assert_eq!(task.progress(), 100.0);
    }

    #[test]
    fn failed_task_keeps_partial_progress() {
        let mut task = UploadTask::new("t", "f.bin", 200);
        task.bytes_transferred = 50;
        task.completed = true;
        assert_eq!(task.progress(), 25.0);
    }

    #[test]
    fn empty_file_progress() {
        let task = UploadTask::new("t", "empty", 0);
        assert_eq!(task.progress(), 0.0);
    }

    #[test]
    fn serialized_task_carries_progress() {
        let mut task = UploadTask::new("t1", "f.bin", 4);
        task.bytes_transferred = 1;
        let json = serde_json::to_value(&task).unwrap();
        assert_eq!(json["task_id"], "t1");
        assert_eq!(json["progress"], 25.0);
        assert_eq!(json["completed"], false);
    }
}
