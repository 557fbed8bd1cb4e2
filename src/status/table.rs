//! Status rows and the status file format.
//!
//! The status file is a CSV table with one row per (subject, session) pair
//! that has imaging data. Booleans are written as `True`/`False` and missing
//! values as empty cells, matching files written by earlier tooling.

use std::collections::{BTreeSet, HashSet};
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::ids::{participant_id_to_bids_id, participant_id_to_dicom_id};
use crate::error::StatusError;

/// Natural key of a status row: `(subject_id, session_id)`.
pub type StatusKey = (String, String);

/// Columns of the status file, in write order.
pub const STATUS_COLUMNS: [&str; 8] = [
    "subject_id",
    "session_id",
    "bids_id",
    "dicom_id",
    "participant_dicom_dir",
    "download_status",
    "org_status",
    "conv_status",
];

/// Processing status of one participant session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StatusRow {
    pub subject_id: String,
    pub session_id: String,
    pub bids_id: String,
    pub dicom_id: String,
    /// Raw DICOM directory name; only known after a full regeneration.
    pub participant_dicom_dir: Option<String>,
    #[serde(with = "status_bool")]
    pub download_status: bool,
    #[serde(with = "status_bool")]
    pub org_status: bool,
    #[serde(with = "status_bool")]
    pub conv_status: bool,
}

impl StatusRow {
    /// Row with derived ids and every stage marked as not done.
    pub fn placeholder(subject_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        let subject_id = subject_id.into();
        Self {
            bids_id: participant_id_to_bids_id(&subject_id),
            dicom_id: participant_id_to_dicom_id(&subject_id),
            subject_id,
            session_id: session_id.into(),
            participant_dicom_dir: None,
            download_status: false,
            org_status: false,
            conv_status: false,
        }
    }

    pub fn key(&self) -> StatusKey {
        (self.subject_id.clone(), self.session_id.clone())
    }

    /// A later stage is done while an earlier one is not: files were lost
    /// or moved after processing.
    pub fn has_lost_files(&self) -> bool {
        (self.conv_status && !(self.org_status || self.download_status))
            || (self.org_status && !self.download_status)
    }
}

mod status_bool {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &bool, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(if *value { "True" } else { "False" })
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
        let raw = String::deserialize(deserializer)?;
        match raw.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => Ok(true),
            "false" | "0" | "" => Ok(false),
            other => Err(de::Error::custom(format!(
                "expected True or False, got '{}'",
                other
            ))),
        }
    }
}

/// An ordered collection of status rows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusTable {
    rows: Vec<StatusRow>,
}

impl StatusTable {
    pub fn new(rows: Vec<StatusRow>) -> Self {
        Self { rows }
    }

    /// A table with no rows; still serializes with the full header.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn rows(&self) -> &[StatusRow] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<StatusRow> {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn keys(&self) -> BTreeSet<StatusKey> {
        self.rows.iter().map(StatusRow::key).collect()
    }

    pub fn get(&self, subject_id: &str, session_id: &str) -> Option<&StatusRow> {
        self.rows
            .iter()
            .find(|r| r.subject_id == subject_id && r.session_id == session_id)
    }

    /// Canonical form: exact duplicates dropped (first occurrence kept), then
    /// a stable sort by `(subject_id, session_id)`.
    pub fn finalize(self) -> Self {
        let mut seen = HashSet::new();
        let mut rows: Vec<StatusRow> = self
            .rows
            .into_iter()
            .filter(|row| seen.insert(row.clone()))
            .collect();
        rows.sort_by(|a, b| {
            (&a.subject_id, &a.session_id).cmp(&(&b.subject_id, &b.session_id))
        });
        Self { rows }
    }

    /// Reads a status file.
    pub fn read(path: &Path) -> Result<Self, StatusError> {
        let file = std::fs::File::open(path)?;
        Self::parse(file, &path.display().to_string())
    }

    /// Parses status CSV from any reader. `source` names the input in errors.
    pub fn parse<R: Read>(reader: R, source: &str) -> Result<Self, StatusError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_reader(reader);

        let headers = csv_reader.headers()?.clone();
        let missing: Vec<&str> = STATUS_COLUMNS
            .iter()
            .copied()
            .filter(|column| !headers.iter().any(|h| h == *column))
            .collect();
        if !missing.is_empty() {
            return Err(StatusError::InvalidStatusFile {
                path: source.to_string(),
                message: format!("missing columns: {}", missing.join(", ")),
            });
        }

        let rows = csv_reader
            .deserialize::<StatusRow>()
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StatusError::InvalidStatusFile {
                path: source.to_string(),
                message: e.to_string(),
            })?;
        Ok(Self { rows })
    }

    /// Renders the table as CSV, header included even when empty.
    pub fn to_csv(&self) -> Result<Vec<u8>, StatusError> {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(Vec::new());
        writer.write_record(STATUS_COLUMNS)?;
        for row in &self.rows {
            writer.serialize(row)?;
        }
        writer
            .into_inner()
            .map_err(|e| StatusError::Io(e.into_error()))
    }
}

impl FromIterator<StatusRow> for StatusTable {
    fn from_iter<I: IntoIterator<Item = StatusRow>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(subject: &str, session: &str) -> StatusRow {
        StatusRow::placeholder(subject, session)
    }

    #[test]
    fn test_placeholder_derives_ids() {
        let row = row("MNI_01", "ses-01");
        assert_eq!(row.bids_id, "sub-MNI01");
        assert_eq!(row.dicom_id, "MNI01");
        assert_eq!(row.participant_dicom_dir, None);
        assert!(!row.download_status && !row.org_status && !row.conv_status);
    }

    #[test]
    fn test_has_lost_files() {
        let mut r = row("S1", "ses-01");
        assert!(!r.has_lost_files());

        r.conv_status = true;
        assert!(r.has_lost_files());

        r.org_status = true;
        assert!(r.has_lost_files(), "organized without download");

        r.download_status = true;
        assert!(!r.has_lost_files());

        let mut r = row("S1", "ses-01");
        r.download_status = true;
        r.conv_status = true;
        assert!(!r.has_lost_files());
    }

    #[test]
    fn test_finalize_sorts_and_dedups() {
        let table = StatusTable::new(vec![
            row("S2", "ses-01"),
            row("S1", "ses-02"),
            row("S1", "ses-01"),
            row("S2", "ses-01"),
        ])
        .finalize();

        let keys: Vec<_> = table.rows().iter().map(StatusRow::key).collect();
        assert_eq!(
            keys,
            vec![
                ("S1".to_string(), "ses-01".to_string()),
                ("S1".to_string(), "ses-02".to_string()),
                ("S2".to_string(), "ses-01".to_string()),
            ]
        );
    }

    #[test]
    fn test_finalize_keeps_conflicting_rows_for_same_key() {
        let mut done = row("S1", "ses-01");
        done.download_status = true;
        let table = StatusTable::new(vec![row("S1", "ses-01"), done.clone()]).finalize();
        assert_eq!(table.len(), 2);
        assert_eq!(table.rows()[1], done);
    }

    #[test]
    fn test_empty_table_has_header() {
        let bytes = StatusTable::empty().to_csv().unwrap();
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            "subject_id,session_id,bids_id,dicom_id,participant_dicom_dir,download_status,org_status,conv_status\n"
        );
    }

    #[test]
    fn test_csv_format() {
        let mut r = row("S1", "ses-01");
        r.participant_dicom_dir = Some("S1_MRI".to_string());
        r.download_status = true;
        let table = StatusTable::new(vec![r, row("S2", "ses-01")]);

        let text = String::from_utf8(table.to_csv().unwrap()).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines[1], "S1,ses-01,sub-S1,S1,S1_MRI,True,False,False");
        assert_eq!(lines[2], "S2,ses-01,sub-S2,S2,,False,False,False");

        let parsed = StatusTable::parse(text.as_bytes(), "test").unwrap();
        assert_eq!(parsed, table);
    }

    #[test]
    fn test_parse_lowercase_booleans_and_column_order() {
        let text = "session_id,subject_id,bids_id,dicom_id,participant_dicom_dir,conv_status,org_status,download_status\n\
                    ses-01,S1,sub-S1,S1,S1,true,1,TRUE\n";
        let table = StatusTable::parse(text.as_bytes(), "test").unwrap();
        let r = &table.rows()[0];
        assert_eq!(r.subject_id, "S1");
        assert!(r.download_status && r.org_status && r.conv_status);
    }

    #[test]
    fn test_parse_missing_columns() {
        let text = "subject_id,session_id\nS1,ses-01\n";
        let err = StatusTable::parse(text.as_bytes(), "doughnut.csv").unwrap_err();
        match err {
            StatusError::InvalidStatusFile { message, .. } => {
                assert!(message.contains("bids_id"));
                assert!(message.contains("conv_status"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_parse_invalid_boolean() {
        let text = "subject_id,session_id,bids_id,dicom_id,participant_dicom_dir,download_status,org_status,conv_status\n\
                    S1,ses-01,sub-S1,S1,,maybe,False,False\n";
        let err = StatusTable::parse(text.as_bytes(), "test").unwrap_err();
        assert!(matches!(err, StatusError::InvalidStatusFile { .. }));
    }
}
