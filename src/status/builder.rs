//! Derivation of status rows from the manifest.

use std::fmt;

use tracing::{info, warn};

use super::ids::strip_session_prefix;
use super::mapper::{DicomDirMapper, ParticipantIdMapper, TemplateMapper};
use super::presence::{check_presence, DirnameColumn, TraversalOrder};
use super::table::{StatusKey, StatusRow};
use crate::error::{format_keys, StatusError};
use crate::manifest::ManifestRow;
use crate::pipeline::{DatasetLayout, GlobalConfig};

/// Recoverable anomaly found while building or reconciling status rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusWarning {
    /// No directory mapper was registered; participant ids were used as
    /// raw DICOM directory names.
    DefaultDicomDirMapper,
    /// Rows where a later stage is done but an earlier one is not.
    LostFiles { keys: Vec<StatusKey> },
}

impl fmt::Display for StatusWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusWarning::DefaultDicomDirMapper => write!(
                f,
                "No participant ID -> DICOM directory mapper registered, using participant_id \
                 as dicom_dir. Register one with StatusTableBuilder::with_mapper or set \
                 DICOM_DIR_TEMPLATE in the global config"
            ),
            StatusWarning::LostFiles { keys } => write!(
                f,
                "Some participant-session pairs seem to have lost files: {}",
                format_keys(keys)
            ),
        }
    }
}

/// Rows produced by [`StatusTableBuilder::build`], with any warnings raised.
#[derive(Debug, Clone, Default)]
pub struct BuildOutput {
    pub rows: Vec<StatusRow>,
    pub warnings: Vec<StatusWarning>,
}

/// Builds status rows for every manifest row that has a session.
pub struct StatusTableBuilder {
    config: GlobalConfig,
    layout: DatasetLayout,
    mapper: Option<Box<dyn DicomDirMapper>>,
}

impl StatusTableBuilder {
    /// Creates a builder for the dataset described by `config`.
    ///
    /// A `DICOM_DIR_TEMPLATE` in the config registers a [`TemplateMapper`].
    pub fn new(config: GlobalConfig) -> Self {
        let mapper = TemplateMapper::from_config(&config)
            .map(|m| Box::new(m) as Box<dyn DicomDirMapper>);
        Self {
            layout: config.layout(),
            config,
            mapper,
        }
    }

    /// Registers the raw DICOM directory mapper.
    pub fn with_mapper(mut self, mapper: impl DicomDirMapper + 'static) -> Self {
        self.mapper = Some(Box::new(mapper));
        self
    }

    pub fn with_layout(mut self, layout: DatasetLayout) -> Self {
        self.layout = layout;
        self
    }

    pub fn config(&self) -> &GlobalConfig {
        &self.config
    }

    pub fn layout(&self) -> &DatasetLayout {
        &self.layout
    }

    /// Derives status rows from `manifest`.
    ///
    /// Without `scan_filesystem` every stage is left `false` and
    /// `participant_dicom_dir` stays empty. With it, the DICOM directory is
    /// resolved through the mapper and each stage is checked on disk:
    ///
    /// - downloaded: `scratch/raw_dicom/<session>/<participant_dicom_dir>`
    /// - organized: `dicom/<session>/<dicom_id>`
    /// - converted: `bids/<bids_id>/<session>`
    pub fn build(
        &self,
        manifest: &[ManifestRow],
        scan_filesystem: bool,
    ) -> Result<BuildOutput, StatusError> {
        let mut rows: Vec<StatusRow> = manifest
            .iter()
            .filter_map(|m| {
                m.session_id
                    .as_deref()
                    .map(|session| StatusRow::placeholder(m.subject_id.as_str(), session))
            })
            .collect();

        let mut output = BuildOutput::default();
        if !scan_filesystem {
            output.rows = rows;
            return Ok(output);
        }

        let mapper: &dyn DicomDirMapper = match &self.mapper {
            Some(mapper) => &**mapper,
            None => {
                let warning = StatusWarning::DefaultDicomDirMapper;
                warn!("{}", warning);
                output.warnings.push(warning);
                &ParticipantIdMapper
            }
        };

        for row in &mut rows {
            let dicom_dir = mapper.participant_id_to_dicom_dir(
                &row.subject_id,
                strip_session_prefix(&row.session_id),
                &self.config,
            );
            row.participant_dicom_dir = Some(dicom_dir);
        }

        let downloaded = check_presence(
            &rows,
            &self.layout.downloaded_dicom,
            DirnameColumn::ParticipantDicomDir,
            TraversalOrder::SessionFirst,
        )?;
        let organized = check_presence(
            &rows,
            &self.layout.organized_dicom,
            DirnameColumn::DicomId,
            TraversalOrder::SessionFirst,
        )?;
        let converted = check_presence(
            &rows,
            &self.layout.bids,
            DirnameColumn::BidsId,
            TraversalOrder::IdFirst,
        )?;

        for (index, row) in rows.iter_mut().enumerate() {
            row.download_status = downloaded[index].unwrap_or(false);
            row.org_status = organized[index].unwrap_or(false);
            row.conv_status = converted[index].unwrap_or(false);
        }

        info!(
            rows = rows.len(),
            downloaded = rows.iter().filter(|r| r.download_status).count(),
            organized = rows.iter().filter(|r| r.org_status).count(),
            converted = rows.iter().filter(|r| r.conv_status).count(),
            "Checked dataset for pipeline stages"
        );

        let lost = find_lost_files(&rows);
        if !lost.is_empty() {
            let warning = StatusWarning::LostFiles { keys: lost };
            warn!("{}", warning);
            output.warnings.push(warning);
        }

        output.rows = rows;
        Ok(output)
    }
}

/// Keys of rows showing a stage done after an earlier stage that is not.
pub fn find_lost_files(rows: &[StatusRow]) -> Vec<StatusKey> {
    rows.iter()
        .filter(|r| r.has_lost_files())
        .map(StatusRow::key)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"x").unwrap();
    }

    fn manifest() -> Vec<ManifestRow> {
        vec![
            ManifestRow::new("S1", Some("ses-01")).with_datatypes(["anat"]),
            ManifestRow::new("S2", None),
            ManifestRow::new("S_3", Some("ses-01")).with_datatypes(["anat", "dwi"]),
        ]
    }

    #[test]
    fn test_rows_without_session_are_skipped() {
        let builder = StatusTableBuilder::new(GlobalConfig::new("/nonexistent", ["01"]));
        let output = builder.build(&manifest(), false).unwrap();

        let subjects: Vec<_> = output.rows.iter().map(|r| r.subject_id.as_str()).collect();
        assert_eq!(subjects, vec!["S1", "S_3"]);
        assert!(output.warnings.is_empty());
        assert_eq!(output.rows[1].bids_id, "sub-S3");
        assert_eq!(output.rows[1].participant_dicom_dir, None);
    }

    #[test]
    fn test_scan_uses_default_mapper_with_warning() {
        let dir = TempDir::new().unwrap();
        let builder = StatusTableBuilder::new(GlobalConfig::new(dir.path(), ["01"]));
        let output = builder.build(&manifest(), true).unwrap();

        assert_eq!(output.warnings, vec![StatusWarning::DefaultDicomDirMapper]);
        assert_eq!(output.rows[0].participant_dicom_dir.as_deref(), Some("S1"));
        assert_eq!(output.rows[1].participant_dicom_dir.as_deref(), Some("S_3"));
    }

    #[test]
    fn test_scan_checks_all_stages() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        touch(&root.join("scratch/raw_dicom/ses-01/S1_raw/a.dcm"));
        touch(&root.join("dicom/ses-01/S1/a.dcm"));
        touch(&root.join("bids/sub-S1/ses-01/anat/T1w.nii.gz"));
        touch(&root.join("scratch/raw_dicom/ses-01/S_3_raw/a.dcm"));
        fs::create_dir_all(root.join("dicom/ses-01/S3")).unwrap();

        let builder = StatusTableBuilder::new(GlobalConfig::new(root, ["01"]))
            .with_mapper(|pid: &str, _ses: &str, _: &GlobalConfig| format!("{}_raw", pid));
        let output = builder.build(&manifest(), true).unwrap();

        assert!(output.warnings.is_empty());
        let s1 = &output.rows[0];
        assert!(s1.download_status && s1.org_status && s1.conv_status);
        let s3 = &output.rows[1];
        assert!(s3.download_status);
        assert!(!s3.org_status, "empty directory counts as absent");
        assert!(!s3.conv_status);
    }

    #[test]
    fn test_mapper_receives_session_without_prefix() {
        let dir = TempDir::new().unwrap();
        let builder = StatusTableBuilder::new(GlobalConfig::new(dir.path(), ["01"]))
            .with_mapper(|pid: &str, ses: &str, _: &GlobalConfig| format!("{}-{}", pid, ses));
        let output = builder.build(&manifest(), true).unwrap();
        assert_eq!(output.rows[0].participant_dicom_dir.as_deref(), Some("S1-01"));
    }

    #[test]
    fn test_template_mapper_from_config() {
        let dir = TempDir::new().unwrap();
        let config = GlobalConfig::new(dir.path(), ["01"])
            .with_dicom_dir_template("{participant_id}_{session_id}");
        let output = StatusTableBuilder::new(config).build(&manifest(), true).unwrap();
        assert!(output.warnings.is_empty());
        assert_eq!(output.rows[0].participant_dicom_dir.as_deref(), Some("S1_01"));
    }

    #[test]
    fn test_lost_files_warning() {
        let dir = TempDir::new().unwrap();
        touch(&dir.path().join("bids/sub-S1/ses-01/anat/T1w.nii.gz"));

        let builder = StatusTableBuilder::new(GlobalConfig::new(dir.path(), ["01"]))
            .with_mapper(ParticipantIdMapper);
        let output = builder.build(&manifest(), true).unwrap();

        assert_eq!(
            output.warnings,
            vec![StatusWarning::LostFiles {
                keys: vec![("S1".to_string(), "ses-01".to_string())]
            }]
        );
        assert!(output.warnings[0].to_string().contains("(S1, ses-01)"));
    }

    #[test]
    fn test_find_lost_files() {
        let mut ok = StatusRow::placeholder("A", "ses-01");
        ok.download_status = true;
        let mut lost = StatusRow::placeholder("B", "ses-01");
        lost.org_status = true;
        assert_eq!(
            find_lost_files(&[ok, lost]),
            vec![("B".to_string(), "ses-01".to_string())]
        );
    }
}
