//! Participant manifest loading and validation.

use std::collections::BTreeSet;
use std::io::Read;
use std::path::Path;

use serde::Deserialize;
use tracing::{debug, info};

use super::datatypes::{format_datatype_list, parse_datatype_list};
use crate::error::{ManifestError, ValidationError};
use crate::pipeline::GlobalConfig;
use crate::status::ids::session_id_to_bids_session;
use crate::storage::write_atomic;

/// Columns of the manifest file, in write order.
pub const MANIFEST_COLUMNS: [&str; 4] = ["participant_id", "visit", "session", "datatype"];

const REQUIRED_COLUMNS: [&str; 3] = ["participant_id", "session", "datatype"];

/// One participant visit from the manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestRow {
    pub subject_id: String,
    /// Session in BIDS form (`ses-01`); `None` when the visit has no imaging.
    pub session_id: Option<String>,
    pub visit_label: Option<String>,
    pub datatypes: Vec<String>,
}

impl ManifestRow {
    pub fn new(subject_id: impl Into<String>, session_id: Option<&str>) -> Self {
        Self {
            subject_id: subject_id.into(),
            session_id: session_id.map(session_id_to_bids_session),
            visit_label: None,
            datatypes: Vec::new(),
        }
    }

    pub fn with_visit(mut self, visit: impl Into<String>) -> Self {
        self.visit_label = Some(visit.into());
        self
    }

    pub fn with_datatypes<I, S>(mut self, datatypes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.datatypes = datatypes.into_iter().map(Into::into).collect();
        self
    }

    /// Whether this visit produced imaging data.
    pub fn has_imaging(&self) -> bool {
        self.session_id.is_some()
    }
}

#[derive(Debug, Deserialize)]
struct ManifestRecord {
    participant_id: Option<String>,
    #[serde(default)]
    visit: Option<String>,
    #[serde(default)]
    session: Option<String>,
    #[serde(default)]
    datatype: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Read-only access to the participant manifest.
///
/// Loading validates every session against the configured session set and
/// requires a non-empty datatype list on every row that has a session.
#[derive(Debug, Clone)]
pub struct ManifestStore {
    known_sessions: BTreeSet<String>,
}

impl ManifestStore {
    pub fn new(config: &GlobalConfig) -> Self {
        Self {
            known_sessions: config.known_sessions(),
        }
    }

    pub fn with_known_sessions<I, S>(sessions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            known_sessions: sessions
                .into_iter()
                .map(|s| session_id_to_bids_session(s.as_ref()))
                .collect(),
        }
    }

    pub fn known_sessions(&self) -> &BTreeSet<String> {
        &self.known_sessions
    }

    /// Loads and validates the manifest at `path`, preserving row order.
    pub fn load(&self, path: &Path) -> Result<Vec<ManifestRow>, ManifestError> {
        if !path.exists() {
            return Err(ManifestError::NotFound(path.to_path_buf()));
        }
        let file = std::fs::File::open(path)?;
        let rows = self.parse(file, &path.display().to_string())?;
        info!(path = %path.display(), rows = rows.len(), "Loaded manifest");
        Ok(rows)
    }

    /// Parses and validates a manifest from any reader. `source` names the
    /// input in error messages.
    pub fn parse<R: Read>(
        &self,
        reader: R,
        source: &str,
    ) -> Result<Vec<ManifestRow>, ManifestError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers = csv_reader.headers()?.clone();
        for column in REQUIRED_COLUMNS {
            if !headers.iter().any(|h| h == column) {
                return Err(ManifestError::MissingColumn {
                    path: source.to_string(),
                    column: column.to_string(),
                });
            }
        }

        let mut rows = Vec::new();
        for (index, record) in csv_reader.deserialize::<ManifestRecord>().enumerate() {
            let record = record?;
            // header is line 1
            let line = index as u64 + 2;

            let subject_id = non_empty(record.participant_id)
                .ok_or(ManifestError::EmptyParticipantId { line })?;

            let raw_datatypes = record.datatype.unwrap_or_default();
            let datatypes = parse_datatype_list(&raw_datatypes).ok_or_else(|| {
                ManifestError::InvalidDatatypes {
                    subject_id: subject_id.clone(),
                    value: raw_datatypes.clone(),
                }
            })?;

            rows.push(ManifestRow {
                subject_id,
                session_id: non_empty(record.session).map(|s| session_id_to_bids_session(&s)),
                visit_label: non_empty(record.visit),
                datatypes,
            });
        }

        self.validate(&rows)?;
        debug!(source, rows = rows.len(), "Manifest validated");
        Ok(rows)
    }

    /// Checks manifest rows against the configured sessions.
    ///
    /// # Errors
    ///
    /// - `UnknownSessions` listing every session outside the configured set
    /// - `MissingDatatypes` listing every subject with a session but no datatypes
    pub fn validate(&self, rows: &[ManifestRow]) -> Result<(), ValidationError> {
        let unknown: BTreeSet<&str> = rows
            .iter()
            .filter_map(|row| row.session_id.as_deref())
            .filter(|session| !self.known_sessions.contains(*session))
            .collect();
        if !unknown.is_empty() {
            return Err(ValidationError::UnknownSessions {
                sessions: unknown.into_iter().map(str::to_string).collect(),
            });
        }

        let mut without_datatypes: Vec<String> = Vec::new();
        for row in rows.iter().filter(|r| r.has_imaging() && r.datatypes.is_empty()) {
            if !without_datatypes.contains(&row.subject_id) {
                without_datatypes.push(row.subject_id.clone());
            }
        }
        if !without_datatypes.is_empty() {
            return Err(ValidationError::MissingDatatypes {
                subject_ids: without_datatypes,
            });
        }

        Ok(())
    }
}

/// Renders manifest rows as CSV with the standard columns.
pub fn manifest_to_csv(rows: &[ManifestRow]) -> Result<Vec<u8>, ManifestError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(MANIFEST_COLUMNS)?;
    for row in rows {
        writer.write_record([
            row.subject_id.as_str(),
            row.visit_label.as_deref().unwrap_or(""),
            row.session_id.as_deref().unwrap_or(""),
            format_datatype_list(&row.datatypes).as_str(),
        ])?;
    }
    writer
        .into_inner()
        .map_err(|e| ManifestError::Io(e.into_error()))
}

/// Writes manifest rows to `path`, replacing any existing file.
pub fn write_manifest(rows: &[ManifestRow], path: &Path) -> Result<(), ManifestError> {
    let bytes = manifest_to_csv(rows)?;
    write_atomic(path, &bytes)?;
    Ok(())
}
