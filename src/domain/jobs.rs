use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Where the media for a job comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaSource {
    /// Streamed from a remote source identified by the job id.
    Remote,
    /// Read in place from `Job::local_path`.
    Local,
}

/// A single stem-separation request, as submitted by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    /// Stable identity, used as the key for status and queue membership.
    pub id: String,
    pub title: String,
    pub source: MediaSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_path: Option<PathBuf>,
}

impl Job {
    pub fn remote(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            source: MediaSource::Remote,
            local_path: None,
        }
    }

    pub fn local(
        id: impl Into<String>,
        title: impl Into<String>,
        path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            source: MediaSource::Local,
            local_path: Some(path.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Downloading,
    Processing,
    Done,
    Error,
}

impl JobStatus {
    /// `done` and `error` are never accepted back into the queue.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Error)
    }

    pub fn is_active(self) -> bool {
        matches!(self, JobStatus::Downloading | JobStatus::Processing)
    }
}

/// One entry of the status map. This is also the persisted shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEntry {
    pub status: JobStatus,
    pub path: Option<PathBuf>,
}

/// Events published to subscribers of the status store.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum QueueEvent {
    /// A status change. Both fields are `None` when the entry was deleted.
    Status {
        #[serde(rename = "videoId")]
        id: String,
        status: Option<JobStatus>,
        path: Option<PathBuf>,
    },
    Donate {
        #[serde(rename = "showDonatePopup")]
        show_donate_popup: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_deserializes_without_local_path() {
        let job: Job =
            serde_json::from_str(r#"{"id":"abc","title":"Song","source":"remote"}"#).unwrap();
        assert_eq!(job, Job::remote("abc", "Song"));
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(JobStatus::Done.is_terminal());
        assert!(JobStatus::Error.is_terminal());
        assert!(!JobStatus::Queued.is_terminal());
        assert!(JobStatus::Downloading.is_active());
        assert!(!JobStatus::Done.is_active());
    }

    #[test]
    fn test_deleted_status_event_serializes_nulls() {
        let event = QueueEvent::Status {
            id: "abc".into(),
            status: None,
            path: None,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"videoId": "abc", "status": null, "path": null})
        );
    }
}
