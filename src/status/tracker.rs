//! The `status` workflow: manifest in, published status file out.

use std::path::PathBuf;

use chrono::{Local, NaiveDate};
use tracing::{debug, info, warn};

use super::builder::{StatusTableBuilder, StatusWarning};
use super::mapper::DicomDirMapper;
use super::reconcile::{self, KeyDiff, ReconcileMode};
use super::table::StatusTable;
use crate::error::StatusError;
use crate::manifest::ManifestStore;
use crate::pipeline::{DatasetLayout, GlobalConfig};
use crate::storage::{content_digest, BackupPublisher};

/// Flags of one status run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusOptions {
    /// Rebuild every row from the filesystem.
    pub regenerate: bool,
    /// Start from no previous state instead of the published file.
    pub empty: bool,
}

impl StatusOptions {
    pub fn mode(&self) -> ReconcileMode {
        if self.regenerate {
            ReconcileMode::Regenerate
        } else {
            ReconcileMode::IncrementalAppend
        }
    }
}

/// What happened to the published status file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusOutcome {
    /// The new table matched the published one; nothing was written.
    Unchanged,
    /// A new version was written to `backup` and the pointer moved to it.
    Published { backup: PathBuf },
}

/// Result of a successful status run.
#[derive(Debug, Clone)]
pub struct StatusReport {
    pub mode: ReconcileMode,
    pub outcome: StatusOutcome,
    pub table: StatusTable,
    pub diff: KeyDiff,
    pub warnings: Vec<StatusWarning>,
}

impl StatusReport {
    pub fn is_published(&self) -> bool {
        matches!(self.outcome, StatusOutcome::Published { .. })
    }
}

/// Runs status reconciliation for one dataset.
pub struct StatusTracker {
    builder: StatusTableBuilder,
    manifest_store: ManifestStore,
    publisher: BackupPublisher,
    manifest_path: PathBuf,
}

impl StatusTracker {
    pub fn new(config: GlobalConfig) -> Self {
        let layout = config.layout();
        Self {
            manifest_store: ManifestStore::new(&config),
            publisher: BackupPublisher::new(&layout.status_file, &layout.status_backups),
            manifest_path: layout.manifest.clone(),
            builder: StatusTableBuilder::new(config),
        }
    }

    /// Registers the raw DICOM directory mapper used by regeneration.
    pub fn with_mapper(mut self, mapper: impl DicomDirMapper + 'static) -> Self {
        self.builder = self.builder.with_mapper(mapper);
        self
    }

    /// Overrides every dataset path.
    pub fn with_layout(mut self, layout: DatasetLayout) -> Self {
        self.publisher = BackupPublisher::new(&layout.status_file, &layout.status_backups);
        self.manifest_path = layout.manifest.clone();
        self.builder = self.builder.with_layout(layout);
        self
    }

    pub fn publisher(&self) -> &BackupPublisher {
        &self.publisher
    }

    pub fn layout(&self) -> &DatasetLayout {
        self.builder.layout()
    }

    /// Reconciles the manifest with the published status file.
    ///
    /// Every check runs before anything is written: a failed run leaves the
    /// published file and all backups untouched.
    ///
    /// # Errors
    ///
    /// - `StatusError::Manifest` if the manifest is missing or invalid.
    /// - `StatusError::MissingState` if no status file exists and neither
    ///   `regenerate` nor `empty` was requested.
    /// - `StatusError::ExistingState` if only `empty` was requested and the
    ///   status file already tracks rows.
    /// - `StatusError::LostRows` if an incremental run would drop rows.
    pub fn run(&self, options: StatusOptions) -> Result<StatusReport, StatusError> {
        self.run_on(options, Local::now().date_naive())
    }

    /// Like [`run`](Self::run), dating a new backup with `date`.
    pub fn run_on(
        &self,
        options: StatusOptions,
        date: NaiveDate,
    ) -> Result<StatusReport, StatusError> {
        let mode = options.mode();
        info!(mode = %mode, empty = options.empty, "Updating status file");

        let manifest = self.manifest_store.load(&self.manifest_path)?;
        debug!(rows = manifest.len(), "Loaded manifest");

        // kept for the no-change comparison in every mode
        let current = self.publisher.read_current()?;

        let (reconciliation, warnings) = match mode {
            ReconcileMode::Regenerate => {
                let previous = if options.empty {
                    debug!("Ignoring rows of any existing status file");
                    None
                } else {
                    current.as_deref().and_then(|bytes| self.parse_lenient(bytes))
                };
                let output = self.builder.build(&manifest, true)?;
                (
                    reconcile::regenerate(previous.as_ref(), output.rows),
                    output.warnings,
                )
            }
            ReconcileMode::IncrementalAppend => match (current.as_deref(), options.empty) {
                (None, false) => {
                    return Err(StatusError::MissingState {
                        path: self.publisher.target().to_path_buf(),
                    })
                }
                (Some(bytes), true) => {
                    let tracked = self.parse(bytes).map(|t| !t.is_empty()).unwrap_or(true);
                    if tracked {
                        return Err(StatusError::ExistingState {
                            path: self.publisher.target().to_path_buf(),
                        });
                    }
                    (empty_reconciliation(), Vec::new())
                }
                (None, true) => {
                    info!("Creating an empty status file");
                    (empty_reconciliation(), Vec::new())
                }
                (Some(bytes), false) => {
                    let previous = self.parse(bytes)?;
                    let output = self.builder.build(&manifest, false)?;
                    (
                        reconcile::append_new_rows(&previous, output.rows)?,
                        output.warnings,
                    )
                }
            },
        };

        let contents = reconciliation.table.to_csv()?;
        let unchanged = current
            .as_deref()
            .is_some_and(|old| content_digest(old) == content_digest(&contents));

        let outcome = if unchanged {
            info!(
                path = %self.publisher.target().display(),
                "No change from existing status file. Will not write new status file"
            );
            StatusOutcome::Unchanged
        } else {
            let backup = self.publisher.publish_on(&contents, date)?;
            StatusOutcome::Published { backup }
        };

        if !warnings.is_empty() {
            info!(count = warnings.len(), "Status run finished with warnings");
        }

        Ok(StatusReport {
            mode,
            outcome,
            table: reconciliation.table,
            diff: reconciliation.diff,
            warnings,
        })
    }

    fn parse(&self, bytes: &[u8]) -> Result<StatusTable, StatusError> {
        StatusTable::parse(bytes, &self.publisher.target().display().to_string())
    }

    /// Parses the previous file for the key report; an invalid file counts as absent.
    fn parse_lenient(&self, bytes: &[u8]) -> Option<StatusTable> {
        match self.parse(bytes) {
            Ok(table) => Some(table),
            Err(e) => {
                warn!(error = %e, "Ignoring unreadable existing status file");
                None
            }
        }
    }
}

fn empty_reconciliation() -> reconcile::Reconciliation {
    reconcile::Reconciliation {
        table: StatusTable::empty(),
        diff: KeyDiff::default(),
    }
}
