//! Error types for nipoppy operations.
//!
//! Defines the error types shared across subsystems:
//! - Manifest loading and validation
//! - Status file reconciliation and publishing
//! - Catalog queries over the published status file
//! - Workflow runs

use std::path::PathBuf;

use thiserror::Error;

use crate::status::table::StatusKey;
use crate::storage::PublishError;

/// Manifest contents that violate the dataset's declared structure.
///
/// Every variant lists all offending values, not just the first one found.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Not all sessions in the manifest are in the global config: {}", .sessions.join(", "))]
    UnknownSessions { sessions: Vec<String> },

    #[error(
        "Some participants have a value in \"session\" but nothing in \"datatype\": {}",
        .subject_ids.join(", ")
    )]
    MissingDatatypes { subject_ids: Vec<String> },
}

/// Errors that can occur while reading or writing the participant manifest.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("Manifest validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Manifest file '{path}' is missing required column '{column}'")]
    MissingColumn { path: String, column: String },

    #[error("Manifest row {line} has an empty participant_id")]
    EmptyParticipantId { line: u64 },

    #[error("Invalid datatype list for participant '{subject_id}': {value:?}")]
    InvalidDatatypes { subject_id: String, value: String },

    #[error("Manifest file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur while reconciling the status file.
#[derive(Debug, Error)]
pub enum StatusError {
    #[error(
        "Did not find an existing status file at {}. Use --empty to create an empty one \
         or --regenerate to create one based on current files in the dataset (can be slow)",
        .path.display()
    )]
    MissingState { path: PathBuf },

    #[error(
        "The status file at {} already tracks participant sessions; --empty would discard them. \
         Use --regenerate to rebuild it from the files in the dataset, or drop --empty to append new rows",
        .path.display()
    )]
    ExistingState { path: PathBuf },

    #[error(
        "Some of the subject/session pairs in the old status file do not seem to exist anymore: {}. \
         Use --regenerate to fully regenerate the status file",
        format_keys(.keys)
    )]
    LostRows { keys: Vec<StatusKey> },

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error("Invalid status file '{path}': {message}")]
    InvalidStatusFile { path: String, message: String },

    #[error("Failed to publish status file: {0}")]
    Publish(#[from] PublishError),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur while querying the status catalog.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error(
        "No version given for pipeline '{pipeline}' and none found under PROC_PIPELINES in the global config"
    )]
    MissingPipelineVersion { pipeline: String },

    #[error(transparent)]
    Status(#[from] StatusError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that stop a workflow run.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("Workflow '{workflow}' failed: {source}")]
    Manifest {
        workflow: String,
        #[source]
        source: ManifestError,
    },

    #[error("Workflow '{workflow}' failed: {source}")]
    Status {
        workflow: String,
        #[source]
        source: StatusError,
    },
}

impl From<ValidationError> for StatusError {
    fn from(err: ValidationError) -> Self {
        StatusError::Manifest(ManifestError::Validation(err))
    }
}

/// Renders keys as `(subject, session)` pairs for error messages.
pub(crate) fn format_keys(keys: &[StatusKey]) -> String {
    keys.iter()
        .map(|(subject, session)| format!("({}, {})", subject, session))
        .collect::<Vec<_>>()
        .join(", ")
}
