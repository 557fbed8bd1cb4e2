//! Durable file storage for published tables.
//!
//! # Overview
//!
//! - **Backups**: every published version is kept as an immutable, dated file
//! - **Pointer**: a stable path (symlink) always resolves to the latest version
//! - **Atomic writes**: files are written to a temporary sibling and renamed
//!
//! # Usage
//!
//! ```rust,ignore
//! use nipoppy::storage::BackupPublisher;
//!
//! let publisher = BackupPublisher::new(
//!     "/data/scratch/raw_dicom/doughnut.csv",
//!     "/data/scratch/raw_dicom/.doughnuts",
//! );
//! let backup = publisher.publish(b"subject_id,session_id\n")?;
//! ```

pub mod backup;

pub use backup::{content_digest, write_atomic, BackupPublisher, PublishError};
