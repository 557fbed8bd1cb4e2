//! End-to-end tests of status reconciliation against a dataset on disk.

use std::fs;
use std::path::Path;

use chrono::NaiveDate;

use nipoppy::manifest::write_manifest;
use nipoppy::status::ids::{participant_id_to_bids_id, participant_id_to_dicom_id};
use nipoppy::status::{
    ParticipantIdMapper, StatusOutcome, StatusWarning, StatusTracker, STATUS_COLUMNS,
};
use nipoppy::{GlobalConfig, ManifestRow, StatusError, StatusOptions, StatusRow, StatusTable};
use tempfile::TempDir;

const REGENERATE: StatusOptions = StatusOptions {
    regenerate: true,
    empty: false,
};

const INCREMENTAL: StatusOptions = StatusOptions {
    regenerate: false,
    empty: false,
};

const EMPTY: StatusOptions = StatusOptions {
    regenerate: false,
    empty: true,
};

struct Dataset {
    dir: TempDir,
    config: GlobalConfig,
}

impl Dataset {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let config = GlobalConfig::new(dir.path(), ["01", "02"]);
        Self { dir, config }
    }

    fn root(&self) -> &Path {
        self.dir.path()
    }

    fn write_manifest(&self, rows: &[ManifestRow]) {
        write_manifest(rows, &self.config.layout().manifest).unwrap();
    }

    fn write_status(&self, rows: Vec<StatusRow>) {
        let layout = self.config.layout();
        fs::create_dir_all(&layout.downloaded_dicom).unwrap();
        let bytes = StatusTable::new(rows).to_csv().unwrap();
        fs::write(&layout.status_file, bytes).unwrap();
    }

    fn touch(&self, relative: &str) {
        let path = self.root().join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"x").unwrap();
    }

    fn tracker(&self) -> StatusTracker {
        StatusTracker::new(self.config.clone()).with_mapper(ParticipantIdMapper)
    }

    fn status_bytes(&self) -> Vec<u8> {
        fs::read(self.config.layout().status_file).unwrap()
    }
}

fn imaging(subject: &str, session: &str) -> ManifestRow {
    ManifestRow::new(subject, Some(session)).with_datatypes(["anat"])
}

fn key(subject: &str, session: &str) -> (String, String) {
    (subject.to_string(), session.to_string())
}

#[test]
fn test_null_session_rows_are_excluded() {
    let dataset = Dataset::new();
    dataset.write_manifest(&[imaging("S1", "ses-01"), ManifestRow::new("S2", None)]);

    let report = dataset.tracker().run(REGENERATE).unwrap();

    assert_eq!(report.table.len(), 1);
    assert_eq!(report.table.rows()[0].key(), key("S1", "ses-01"));
    assert!(report.table.get("S2", "ses-01").is_none());
}

#[test]
fn test_regeneration_is_idempotent() {
    let dataset = Dataset::new();
    dataset.write_manifest(&[imaging("S1", "ses-01"), imaging("S2", "ses-02")]);
    dataset.touch("scratch/raw_dicom/ses-01/S1/a.dcm");
    dataset.touch("dicom/ses-01/S1/a.dcm");

    let first = dataset.tracker().run(REGENERATE).unwrap();
    assert!(first.is_published());
    let first_bytes = dataset.status_bytes();

    let second = dataset.tracker().run(REGENERATE).unwrap();
    assert_eq!(second.outcome, StatusOutcome::Unchanged);
    assert_eq!(dataset.status_bytes(), first_bytes);
    assert_eq!(second.table, first.table);
}

#[test]
fn test_incremental_appends_placeholder_rows_only() {
    let dataset = Dataset::new();
    let mut s1 = StatusRow::placeholder("S1", "ses-01");
    s1.participant_dicom_dir = Some("S1_MRI".to_string());
    s1.download_status = true;
    s1.org_status = true;
    dataset.write_status(vec![s1.clone()]);
    dataset.write_manifest(&[imaging("S1", "ses-01"), imaging("S2", "ses-01")]);
    // evidence on disk must not leak into incremental rows
    dataset.touch("bids/sub-S1/ses-01/anat/T1w.nii.gz");

    let report = dataset.tracker().run(INCREMENTAL).unwrap();

    assert!(report.is_published());
    assert_eq!(report.diff.added, [key("S2", "ses-01")].into());
    assert_eq!(report.table.len(), 2);
    assert_eq!(report.table.get("S1", "ses-01"), Some(&s1));
    assert_eq!(
        report.table.get("S2", "ses-01"),
        Some(&StatusRow::placeholder("S2", "ses-01"))
    );

    let published = StatusTable::read(&dataset.config.layout().status_file).unwrap();
    assert_eq!(published, report.table);
}

#[test]
fn test_incremental_fails_on_lost_rows_without_writing() {
    let dataset = Dataset::new();
    dataset.write_status(vec![
        StatusRow::placeholder("S1", "ses-01"),
        StatusRow::placeholder("S2", "ses-01"),
    ]);
    let before = dataset.status_bytes();
    dataset.write_manifest(&[imaging("S1", "ses-01")]);

    let err = dataset.tracker().run(INCREMENTAL).unwrap_err();

    match &err {
        StatusError::LostRows { keys } => assert_eq!(keys, &vec![key("S2", "ses-01")]),
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(err.to_string().contains("(S2, ses-01)"));
    assert_eq!(dataset.status_bytes(), before);
    assert!(!dataset.config.layout().status_backups.exists());
}

#[test]
fn test_regenerate_recovers_from_lost_rows() {
    let dataset = Dataset::new();
    dataset.write_status(vec![
        StatusRow::placeholder("S1", "ses-01"),
        StatusRow::placeholder("S2", "ses-01"),
    ]);
    dataset.write_manifest(&[imaging("S1", "ses-01")]);

    let report = dataset.tracker().run(REGENERATE).unwrap();
    assert_eq!(report.table.len(), 1);
    assert_eq!(report.diff.removed, [key("S2", "ses-01")].into());
}

#[test]
fn test_ids_are_pure_functions_of_subject() {
    let dataset = Dataset::new();
    dataset.write_manifest(&[imaging("MNI_001", "ses-01"), imaging("MNI_001", "ses-02")]);

    let regenerated = dataset.tracker().run(REGENERATE).unwrap();
    for row in regenerated.table.rows() {
        assert_eq!(row.bids_id, participant_id_to_bids_id("MNI_001"));
        assert_eq!(row.dicom_id, participant_id_to_dicom_id("MNI_001"));
        assert_eq!(row.bids_id, "sub-MNI001");
    }

    // same manifest, rows built from scratch without touching the filesystem
    let fresh = Dataset::new();
    fresh.write_manifest(&[imaging("MNI_001", "ses-01"), imaging("MNI_001", "ses-02")]);
    let empty = fresh.tracker().run(EMPTY).unwrap();
    assert!(empty.table.is_empty());
    let incremental = fresh.tracker().run(INCREMENTAL).unwrap();
    assert_eq!(incremental.table.len(), regenerated.table.len());
    for (a, b) in regenerated.table.rows().iter().zip(incremental.table.rows()) {
        assert_eq!(a.bids_id, b.bids_id);
        assert_eq!(a.dicom_id, b.dicom_id);
    }
}

#[test]
fn test_empty_directories_count_as_missing() {
    let dataset = Dataset::new();
    dataset.write_manifest(&[imaging("S1", "ses-01")]);
    for relative in ["scratch/raw_dicom/ses-01/S1", "dicom/ses-01/S1", "bids/sub-S1/ses-01"] {
        fs::create_dir_all(dataset.root().join(relative)).unwrap();
    }

    let report = dataset.tracker().run(REGENERATE).unwrap();
    let row = &report.table.rows()[0];
    assert!(!row.download_status);
    assert!(!row.org_status);
    assert!(!row.conv_status);
    assert!(report.warnings.is_empty());
}

#[test]
fn test_lost_files_single_warning() {
    let dataset = Dataset::new();
    dataset.write_manifest(&[imaging("S1", "ses-01"), imaging("S2", "ses-01")]);
    dataset.touch("bids/sub-S1/ses-01/anat/T1w.nii.gz");
    dataset.touch("scratch/raw_dicom/ses-01/S2/a.dcm");

    let report = dataset.tracker().run(REGENERATE).unwrap();

    assert!(report.is_published());
    assert_eq!(
        report.warnings,
        vec![StatusWarning::LostFiles {
            keys: vec![key("S1", "ses-01")]
        }]
    );
    let s1 = report.table.get("S1", "ses-01").unwrap();
    assert!(s1.conv_status && !s1.download_status && !s1.org_status);
}

#[test]
fn test_missing_state_requires_flag() {
    let dataset = Dataset::new();
    dataset.write_manifest(&[imaging("S1", "ses-01")]);

    let err = dataset.tracker().run(INCREMENTAL).unwrap_err();
    assert!(matches!(err, StatusError::MissingState { .. }));
    assert!(!dataset.config.layout().status_file.exists());
}

#[test]
fn test_unknown_session_fails_before_write() {
    let dataset = Dataset::new();
    dataset.write_status(vec![StatusRow::placeholder("S1", "ses-01")]);
    let before = dataset.status_bytes();
    dataset.write_manifest(&[imaging("S1", "ses-01"), imaging("S2", "ses-07")]);

    let err = dataset.tracker().run(REGENERATE).unwrap_err();
    assert!(err.to_string().contains("ses-07"));
    assert_eq!(dataset.status_bytes(), before);
}

#[test]
fn test_published_file_layout() {
    let dataset = Dataset::new();
    dataset.write_manifest(&[imaging("S2", "ses-01"), imaging("S1", "ses-01")]);

    let report = dataset.tracker().run(REGENERATE).unwrap();
    let backup = match report.outcome {
        StatusOutcome::Published { backup } => backup,
        other => panic!("unexpected outcome: {other:?}"),
    };

    let layout = dataset.config.layout();
    assert!(backup.starts_with(&layout.status_backups));
    assert_eq!(fs::read(&backup).unwrap(), dataset.status_bytes());

    let text = String::from_utf8(dataset.status_bytes()).unwrap();
    let mut lines = text.lines();
    assert_eq!(lines.next().unwrap(), STATUS_COLUMNS.join(","));
    assert!(lines.next().unwrap().starts_with("S1,ses-01,sub-S1,S1,S1,"));
    assert!(lines.next().unwrap().starts_with("S2,ses-01,"));
}

#[test]
fn test_regenerate_replaces_unreadable_status_file() {
    let dataset = Dataset::new();
    dataset.write_manifest(&[imaging("S1", "ses-01")]);
    let layout = dataset.config.layout();
    fs::create_dir_all(&layout.downloaded_dicom).unwrap();
    fs::write(&layout.status_file, "subject_id,session_id\nS1,ses-01\n").unwrap();

    let report = dataset.tracker().run(REGENERATE).unwrap();

    assert!(report.is_published());
    assert_eq!(report.table.len(), 1);
    let published = StatusTable::read(&layout.status_file).unwrap();
    assert_eq!(published, report.table);
}

#[test]
fn test_empty_refuses_populated_status_file() {
    let dataset = Dataset::new();
    dataset.write_status(vec![StatusRow::placeholder("S1", "ses-01")]);
    let before = dataset.status_bytes();
    dataset.write_manifest(&[imaging("S1", "ses-01"), imaging("S2", "ses-01")]);

    let err = dataset.tracker().run(EMPTY).unwrap_err();

    assert!(matches!(err, StatusError::ExistingState { .. }));
    assert!(err.to_string().contains("--regenerate"));
    assert_eq!(dataset.status_bytes(), before);
    assert!(!dataset.config.layout().status_backups.exists());
}

#[test]
fn test_publish_on_a_later_day_keeps_earlier_backup() {
    let dataset = Dataset::new();
    dataset.write_manifest(&[imaging("S1", "ses-01")]);
    let day1 = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
    let day2 = NaiveDate::from_ymd_opt(2024, 3, 2).unwrap();

    let first = dataset.tracker().run_on(REGENERATE, day1).unwrap();
    let first_bytes = dataset.status_bytes();
    dataset.touch("scratch/raw_dicom/ses-01/S1/a.dcm");
    let second = dataset.tracker().run_on(REGENERATE, day2).unwrap();

    let (backup1, backup2) = match (first.outcome, second.outcome) {
        (StatusOutcome::Published { backup: a }, StatusOutcome::Published { backup: b }) => (a, b),
        other => panic!("unexpected outcomes: {other:?}"),
    };
    assert!(backup1.ends_with("doughnut-20240301.csv"));
    assert!(backup2.ends_with("doughnut-20240302.csv"));
    assert_eq!(fs::read(&backup1).unwrap(), first_bytes);
    assert_eq!(fs::read(&backup2).unwrap(), dataset.status_bytes());
    assert_ne!(first_bytes, dataset.status_bytes());

    let published = StatusTable::read(&dataset.config.layout().status_file).unwrap();
    assert!(published.get("S1", "ses-01").unwrap().download_status);
}
