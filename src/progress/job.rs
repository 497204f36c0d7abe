//! Job status model: wire payloads and the retained display records.
//!
//! Wire field names follow the server contract (`jobId`, `fileName`,
//! `processingTime`, lowercase status strings). Display records are keyed
//! by file name — the stable identity a job keeps across every update —
//! never by payload object identity.

use serde::{Deserialize, Serialize};

/// Lifecycle stage of an import job.
///
/// `Uploading -> Processing -> {Done | Error}`; a job may also jump
/// straight from `Uploading` to `Error` when the upload is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// The file is being uploaded (or waiting for upload acceptance).
    Uploading,
    /// The server accepted the job and is working through the file.
    Processing,
    /// Terminal: the job finished successfully.
    Done,
    /// Terminal: the job failed; see the accompanying message.
    Error,
}

impl JobState {
    /// Terminal states admit no further transition.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Error)
    }

    /// Transient states arrive at high frequency and are coalesced.
    #[must_use]
    pub const fn is_transient(self) -> bool {
        matches!(self, Self::Uploading | Self::Processing)
    }
}

/// Server-reported processing statistics.
///
/// Workers attach free-form extras (row counts and the like) next to the
/// two fields every job carries; those are preserved verbatim.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct JobStats {
    /// Completion percentage, `0.0..=100.0`.
    pub progress: f64,
    /// Milliseconds the job has been processing.
    pub processing_time: f64,
    /// Worker-specific extra statistics, passed through untouched.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// One inbound per-job event from the progress channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobUpdate {
    /// Server-assigned job identifier.
    pub job_id: String,
    /// Name of the submitted file; the stable display key.
    pub file_name: String,
    /// Reported lifecycle stage.
    pub status: JobState,
    /// Statistics, when the worker attached them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<JobStats>,
    /// Human-readable failure description for `error` updates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Retained per-file record shown to consumers.
///
/// Created optimistically on submission, mutated in place as updates
/// arrive for the same file name, and kept after reaching a terminal
/// state until explicitly removed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobStatus {
    /// Stable display key.
    pub file_name: String,
    /// Current lifecycle stage.
    pub status: JobState,
    /// Latest statistics seen for this job.
    pub stats: JobStats,
    /// Failure description, present only in the `Error` state.
    pub error: Option<String>,
}

impl JobStatus {
    /// Optimistic record for a file whose upload has just started.
    #[must_use]
    pub fn uploading(file_name: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            status: JobState::Uploading,
            stats: JobStats::default(),
            error: None,
        }
    }
}

impl From<&JobUpdate> for JobStatus {
    fn from(update: &JobUpdate) -> Self {
        Self {
            file_name: update.file_name.clone(),
            status: update.status,
            stats: update.stats.clone().unwrap_or_default(),
            error: update.error.clone(),
        }
    }
}

/// Derived, de-duplicated view published to observers: every retained
/// job record plus the identifiers of jobs that are still running.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressSnapshot {
    /// Retained job records in submission order.
    pub statuses: Vec<JobStatus>,
    /// Identifiers of jobs that have not reached a terminal state.
    pub active_jobs: Vec<String>,
}

/// A file handed to [`submit`](crate::progress::ProgressAggregator::submit).
#[derive(Clone)]
pub struct ImportFile {
    /// File name; becomes the job's stable display key.
    pub name: String,
    /// Raw file contents.
    pub contents: Vec<u8>,
}

impl ImportFile {
    /// Bundles a name and contents into an upload request.
    #[must_use]
    pub fn new(name: impl Into<String>, contents: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            contents,
        }
    }
}

impl std::fmt::Debug for ImportFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImportFile")
            .field("name", &self.name)
            .field("len", &self.contents.len())
            .finish()
    }
}

/// Response shape of the import endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportAccepted {
    /// Whether the server accepted the upload.
    pub success: bool,
    /// Job state the server assigned on acceptance.
    pub status: JobState,
    /// Server-assigned job identifier to correlate progress events.
    pub job_id: String,
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn worker_payload_deserializes() {
        let raw = r#"{
            "jobId": "41",
            "status": "processing",
            "stats": {"progress": 62.5, "processingTime": 1250, "rowsImported": 310},
            "fileName": "checking-2024.csv",
            "userId": "u-9"
        }"#;
        let Ok(update) = serde_json::from_str::<JobUpdate>(raw) else {
            panic!("expected worker payload to deserialize");
        };
        assert_eq!(update.job_id, "41");
        assert_eq!(update.file_name, "checking-2024.csv");
        assert_eq!(update.status, JobState::Processing);

        let Some(stats) = update.stats else {
            panic!("expected stats");
        };
        assert!((stats.progress - 62.5).abs() < f64::EPSILON);
        assert_eq!(
            stats.extra.get("rowsImported").and_then(serde_json::Value::as_i64),
            Some(310)
        );
    }

    #[test]
    fn error_payload_carries_the_message() {
        let raw = r#"{"jobId":"7","status":"error","error":"bad header row","fileName":"a.csv"}"#;
        let Ok(update) = serde_json::from_str::<JobUpdate>(raw) else {
            panic!("expected error payload to deserialize");
        };
        assert_eq!(update.status, JobState::Error);
        assert_eq!(update.error.as_deref(), Some("bad header row"));
        assert!(update.stats.is_none());
    }

    #[test]
    fn status_strings_are_lowercase() {
        let json = serde_json::to_string(&JobState::Done).unwrap_or_default();
        assert_eq!(json, r#""done""#);
        let Ok(state) = serde_json::from_str::<JobState>(r#""uploading""#) else {
            panic!("expected lowercase status to parse");
        };
        assert_eq!(state, JobState::Uploading);
    }

    #[test]
    fn terminal_and_transient_partition_the_states() {
        assert!(JobState::Done.is_terminal());
        assert!(JobState::Error.is_terminal());
        assert!(JobState::Uploading.is_transient());
        assert!(JobState::Processing.is_transient());
        assert!(!JobState::Processing.is_terminal());
        assert!(!JobState::Done.is_transient());
    }

    #[test]
    fn import_response_deserializes() {
        let raw = r#"{"success":true,"status":"processing","jobId":"job-3"}"#;
        let Ok(accepted) = serde_json::from_str::<ImportAccepted>(raw) else {
            panic!("expected import response to deserialize");
        };
        assert!(accepted.success);
        assert_eq!(accepted.status, JobState::Processing);
        assert_eq!(accepted.job_id, "job-3");
    }

    #[test]
    fn display_record_from_update_defaults_missing_stats() {
        let update = JobUpdate {
            job_id: "1".to_string(),
            file_name: "a.csv".to_string(),
            status: JobState::Processing,
            stats: None,
            error: None,
        };
        let status = JobStatus::from(&update);
        assert_eq!(status.file_name, "a.csv");
        assert_eq!(status.stats, JobStats::default());
    }
}
