//! nipoppy: status tracking for neuroimaging datasets.
//!
//! This library keeps a dataset's status file, one row per participant
//! session recording how far its imaging data has moved through download,
//! DICOM organization and BIDS conversion, consistent with the participant
//! manifest and the files on disk.

pub mod catalog;
pub mod cli;
pub mod error;
pub mod manifest;
pub mod pipeline;
pub mod status;
pub mod storage;

// Re-export commonly used types
pub use error::{CatalogError, ManifestError, StatusError, ValidationError, WorkflowError};
pub use manifest::{ManifestRow, ManifestStore};
pub use pipeline::{DatasetLayout, GlobalConfig};
pub use status::{StatusOptions, StatusReport, StatusRow, StatusTable, StatusTracker};
