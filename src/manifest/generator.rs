//! Manifest generation from a clinical visit report.
//!
//! The report is a CSV export with one row per participant visit, keyed by
//! `record_id` and `redcap_event_name`. Visits are mapped to imaging
//! sessions through `VISIT_SESSION_MAP`; visits without a mapping have no
//! imaging session.

use std::collections::BTreeSet;
use std::io::Read;
use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDate};
use serde::Deserialize;
use tracing::{debug, info};

use super::loader::{write_manifest, ManifestRow, ManifestStore};
use crate::error::ManifestError;
use crate::pipeline::GlobalConfig;
use crate::status::ids::session_id_to_bids_session;

const REPORT_COLUMNS: [&str; 2] = ["record_id", "redcap_event_name"];

/// One visit from the clinical report.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReportRecord {
    pub record_id: String,
    pub redcap_event_name: String,
}

/// A clinical report loaded from disk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClinicalReport {
    records: Vec<ReportRecord>,
}

impl ClinicalReport {
    pub fn new(records: Vec<ReportRecord>) -> Self {
        Self { records }
    }

    pub fn records(&self) -> &[ReportRecord] {
        &self.records
    }

    /// Reads the report at `path`.
    pub fn read(path: &Path) -> Result<Self, ManifestError> {
        if !path.exists() {
            return Err(ManifestError::NotFound(path.to_path_buf()));
        }
        let file = std::fs::File::open(path)?;
        Self::parse(file, &path.display().to_string())
    }

    /// Parses report CSV. Columns other than the two keys are ignored.
    pub fn parse<R: Read>(reader: R, source: &str) -> Result<Self, ManifestError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers = csv_reader.headers()?.clone();
        for column in REPORT_COLUMNS {
            if !headers.iter().any(|h| h == column) {
                return Err(ManifestError::MissingColumn {
                    path: source.to_string(),
                    column: column.to_string(),
                });
            }
        }

        let mut records = Vec::new();
        for (index, record) in csv_reader.deserialize::<ReportRecord>().enumerate() {
            let record = record?;
            if record.record_id.is_empty() {
                return Err(ManifestError::EmptyParticipantId {
                    line: index as u64 + 2,
                });
            }
            records.push(record);
        }
        Ok(Self { records })
    }

    /// Distinct participant ids, in first-seen order.
    pub fn participants(&self) -> Vec<&str> {
        unique(self.records.iter().map(|r| r.record_id.as_str()))
    }

    /// Distinct visit labels, in first-seen order.
    pub fn visits(&self) -> Vec<&str> {
        unique(self.records.iter().map(|r| r.redcap_event_name.as_str()))
    }
}

fn unique<'a>(values: impl Iterator<Item = &'a str>) -> Vec<&'a str> {
    let mut seen = BTreeSet::new();
    values.filter(|v| seen.insert(*v)).collect()
}

/// Builds and publishes the manifest from a clinical report.
#[derive(Debug, Clone)]
pub struct ManifestGenerator {
    config: GlobalConfig,
    manifest_path: PathBuf,
    backup_dir: PathBuf,
}

impl ManifestGenerator {
    pub fn new(config: GlobalConfig) -> Self {
        let layout = config.layout();
        Self {
            manifest_path: layout.manifest,
            backup_dir: layout.manifest_backups,
            config,
        }
    }

    pub fn manifest_path(&self) -> &Path {
        &self.manifest_path
    }

    /// Dated copy written alongside the manifest on `date`.
    pub fn backup_path(&self, date: NaiveDate) -> PathBuf {
        self.backup_dir
            .join(format!("manifest_{}.csv", date.format("%Y%m%d")))
    }

    /// Maps every report visit to a manifest row, preserving report order.
    pub fn generate(&self, report: &ClinicalReport) -> Vec<ManifestRow> {
        let known_sessions = self.config.known_sessions();
        report
            .records()
            .iter()
            .map(|record| {
                let session = self
                    .config
                    .visit_session_map
                    .get(&record.redcap_event_name)
                    .map(|s| session_id_to_bids_session(s));

                let datatypes = match &session {
                    Some(session) if known_sessions.contains(session) => {
                        self.config.datatypes.clone()
                    }
                    _ => Vec::new(),
                };

                ManifestRow::new(record.record_id.as_str(), session.as_deref())
                    .with_visit(record.redcap_event_name.as_str())
                    .with_datatypes(datatypes)
            })
            .collect()
    }

    /// Reads the report at `report_path`, then validates and writes the manifest.
    pub fn run(&self, report_path: &Path) -> Result<Vec<ManifestRow>, ManifestError> {
        self.run_on(report_path, Local::now().date_naive())
    }

    /// Like [`run`](Self::run), dating the backup copy with `date`.
    ///
    /// # Errors
    ///
    /// Returns `ManifestError::Validation` without writing anything if a
    /// mapped session is not one of the study's sessions.
    pub fn run_on(
        &self,
        report_path: &Path,
        date: NaiveDate,
    ) -> Result<Vec<ManifestRow>, ManifestError> {
        let report = ClinicalReport::read(report_path)?;
        info!(
            path = %report_path.display(),
            participants = report.participants().len(),
            visits = report.visits().len(),
            "Loaded clinical report"
        );

        debug!(map = ?self.config.visit_session_map, "Mapping visits to sessions");
        let rows = self.generate(&report);
        ManifestStore::new(&self.config).validate(&rows)?;

        let backup = self.backup_path(date);
        write_manifest(&rows, &self.manifest_path)?;
        write_manifest(&rows, &backup)?;
        info!(
            manifest = %self.manifest_path.display(),
            backup = %backup.display(),
            rows = rows.len(),
            "Saved manifest"
        );
        Ok(rows)
    }
}
