//! Naming of raw DICOM directories.
//!
//! Raw intake directories are named by the scanner site and usually cannot
//! be derived from the participant id alone. Deployments supply a
//! [`DicomDirMapper`] to the status builder; without one the participant id
//! is used verbatim.

use crate::pipeline::GlobalConfig;

/// Maps a participant session to the name of its raw DICOM directory.
pub trait DicomDirMapper: Send + Sync {
    /// `session_id` is given without its `ses-` prefix.
    fn participant_id_to_dicom_dir(
        &self,
        participant_id: &str,
        session_id: &str,
        config: &GlobalConfig,
    ) -> String;
}

impl<F> DicomDirMapper for F
where
    F: Fn(&str, &str, &GlobalConfig) -> String + Send + Sync,
{
    fn participant_id_to_dicom_dir(
        &self,
        participant_id: &str,
        session_id: &str,
        config: &GlobalConfig,
    ) -> String {
        self(participant_id, session_id, config)
    }
}

/// Uses the participant id as the directory name.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParticipantIdMapper;

impl DicomDirMapper for ParticipantIdMapper {
    fn participant_id_to_dicom_dir(
        &self,
        participant_id: &str,
        _session_id: &str,
        _config: &GlobalConfig,
    ) -> String {
        participant_id.to_string()
    }
}

/// Fills `{participant_id}` and `{session_id}` placeholders in a template,
/// e.g. `"{participant_id}_MRI{session_id}"`.
#[derive(Debug, Clone)]
pub struct TemplateMapper {
    template: String,
}

impl TemplateMapper {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }

    /// Mapper configured by `DICOM_DIR_TEMPLATE`, if the config sets one.
    pub fn from_config(config: &GlobalConfig) -> Option<Self> {
        config
            .dicom_dir_template
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .map(Self::new)
    }
}

impl DicomDirMapper for TemplateMapper {
    fn participant_id_to_dicom_dir(
        &self,
        participant_id: &str,
        session_id: &str,
        _config: &GlobalConfig,
    ) -> String {
        self.template
            .replace("{participant_id}", participant_id)
            .replace("{session_id}", session_id)
    }
}
