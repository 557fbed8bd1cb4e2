//! Status tracking of participant sessions through the pipeline stages.
//!
//! A status row records, for one (subject, session) pair, whether raw DICOM
//! was downloaded, organized, and converted to BIDS. The [`StatusTracker`]
//! keeps the published status file in step with the manifest.

pub mod builder;
pub mod ids;
pub mod mapper;
pub mod presence;
pub mod reconcile;
pub mod table;
pub mod tracker;

pub use builder::{find_lost_files, BuildOutput, StatusTableBuilder, StatusWarning};
pub use mapper::{DicomDirMapper, ParticipantIdMapper, TemplateMapper};
pub use presence::{check_presence, DirnameColumn, PresenceSubject, TraversalOrder};
pub use reconcile::{diff_keys, KeyDiff, ReconcileMode, Reconciliation};
pub use table::{StatusKey, StatusRow, StatusTable, STATUS_COLUMNS};
pub use tracker::{StatusOptions, StatusOutcome, StatusReport, StatusTracker};
