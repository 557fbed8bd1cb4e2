//! Global dataset configuration.
//!
//! The global config is a JSON (or YAML) document shared by every workflow of
//! a dataset. It names the dataset root, the imaging sessions the study
//! collects, and per-pipeline settings consumed by external tools.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::status::ids::session_id_to_bids_session;

/// Environment variable overriding `DATASET_ROOT`.
pub const ENV_DATASET_ROOT: &str = "NIPOPPY_DATASET_ROOT";

/// Datatypes assigned to imaging sessions when the config does not list any.
pub const DEFAULT_DATATYPES: [&str; 5] = ["anat", "dwi", "fmap", "func", "perf"];

/// File name of the published status file.
pub const FNAME_STATUS: &str = "doughnut.csv";

/// Directory (next to the status file) holding dated status backups.
pub const DNAME_BACKUPS_STATUS: &str = ".doughnuts";

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("Failed to read config file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The config document is malformed.
    #[error("Failed to parse config file {}: {message}", .path.display())]
    Parse { path: PathBuf, message: String },

    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Parsed global configuration of a dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Filesystem root of the dataset.
    #[serde(rename = "DATASET_ROOT")]
    pub dataset_root: PathBuf,

    /// Imaging sessions collected by the study, with or without `ses-` prefix.
    #[serde(rename = "SESSIONS")]
    pub sessions: Vec<String>,

    /// Clinical visit labels.
    #[serde(rename = "VISITS", default)]
    pub visits: Vec<String>,

    /// Maps clinical visit labels to imaging sessions.
    #[serde(rename = "VISIT_SESSION_MAP", default)]
    pub visit_session_map: BTreeMap<String, String>,

    /// Datatypes expected for each imaging session.
    #[serde(rename = "DATATYPES", default = "default_datatypes")]
    pub datatypes: Vec<String>,

    /// Optional `{participant_id}`/`{session_id}` template naming raw DICOM directories.
    #[serde(
        rename = "DICOM_DIR_TEMPLATE",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub dicom_dir_template: Option<String>,

    /// Workflows run in order by `nipoppy run`.
    #[serde(rename = "WORKFLOWS", default)]
    pub workflows: Vec<String>,

    /// Per-pipeline settings for external processing tools.
    #[serde(rename = "PROC_PIPELINES", default)]
    pub proc_pipelines: BTreeMap<String, serde_json::Value>,

    /// Deployment-specific keys, kept for custom directory mappers.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

fn default_datatypes() -> Vec<String> {
    DEFAULT_DATATYPES.iter().map(|s| s.to_string()).collect()
}

impl GlobalConfig {
    /// Creates a configuration for `dataset_root` with the given sessions.
    pub fn new<I, S>(dataset_root: impl Into<PathBuf>, sessions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            dataset_root: dataset_root.into(),
            sessions: sessions.into_iter().map(Into::into).collect(),
            visits: Vec::new(),
            visit_session_map: BTreeMap::new(),
            datatypes: default_datatypes(),
            dicom_dir_template: None,
            workflows: Vec::new(),
            proc_pipelines: BTreeMap::new(),
            extra: BTreeMap::new(),
        }
    }

    /// Loads the config from a file, applies environment overrides and validates it.
    ///
    /// Files ending in `.yaml` or `.yml` are parsed as YAML, everything else as JSON.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file cannot be read or parsed, or fails validation.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        );
        let parsed = if is_yaml {
            serde_yaml::from_str::<Self>(&contents).map_err(|e| e.to_string())
        } else {
            serde_json::from_str::<Self>(&contents).map_err(|e| e.to_string())
        };

        let mut config = parsed.map_err(|message| ConfigError::Parse {
            path: path.to_path_buf(),
            message,
        })?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Applies environment variable overrides.
    ///
    /// # Environment Variables
    ///
    /// - `NIPOPPY_DATASET_ROOT`: replaces `DATASET_ROOT`
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(val) = std::env::var(ENV_DATASET_ROOT) {
            if val.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    key: ENV_DATASET_ROOT.to_string(),
                    message: "must not be empty".to_string(),
                });
            }
            self.dataset_root = PathBuf::from(val);
        }
        Ok(())
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dataset_root.as_os_str().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "DATASET_ROOT cannot be empty".to_string(),
            ));
        }

        if self.sessions.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "SESSIONS must list at least one session".to_string(),
            ));
        }

        if self.sessions.iter().any(|s| s.trim().is_empty()) {
            return Err(ConfigError::ValidationFailed(
                "SESSIONS cannot contain empty values".to_string(),
            ));
        }

        if self.known_sessions().len() != self.sessions.len() {
            return Err(ConfigError::ValidationFailed(
                "SESSIONS contains duplicate sessions".to_string(),
            ));
        }

        if self.datatypes.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "DATATYPES cannot be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Configured sessions in their BIDS form (`ses-<id>`).
    pub fn known_sessions(&self) -> BTreeSet<String> {
        self.sessions
            .iter()
            .map(|s| session_id_to_bids_session(s.trim()))
            .collect()
    }

    /// Version of an external processing pipeline, from `PROC_PIPELINES.<name>.VERSION`.
    pub fn pipeline_version(&self, pipeline: &str) -> Option<String> {
        match self.proc_pipelines.get(pipeline)?.get("VERSION")? {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Paths of the dataset's standard directories.
    pub fn layout(&self) -> DatasetLayout {
        DatasetLayout::new(&self.dataset_root)
    }

    /// Builder method to set the visit to session mapping.
    pub fn with_visit_session_map<I, K, V>(mut self, map: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.visit_session_map = map
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self
    }

    /// Builder method to set expected datatypes.
    pub fn with_datatypes<I, S>(mut self, datatypes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.datatypes = datatypes.into_iter().map(Into::into).collect();
        self
    }

    /// Builder method to set the raw DICOM directory template.
    pub fn with_dicom_dir_template(mut self, template: impl Into<String>) -> Self {
        self.dicom_dir_template = Some(template.into());
        self
    }

    /// Builder method to set the workflows run by `nipoppy run`.
    pub fn with_workflows<I, S>(mut self, workflows: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.workflows = workflows.into_iter().map(Into::into).collect();
        self
    }

    /// Builder method to register a processing pipeline version.
    pub fn with_pipeline_version(mut self, pipeline: &str, version: &str) -> Self {
        self.proc_pipelines.insert(
            pipeline.to_string(),
            serde_json::json!({ "VERSION": version }),
        );
        self
    }
}

/// Standard directory layout of a dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetLayout {
    pub root: PathBuf,
    /// Raw DICOM as downloaded: `<session>/<participant_dicom_dir>`.
    pub downloaded_dicom: PathBuf,
    /// Organized DICOM: `<session>/<dicom_id>`.
    pub organized_dicom: PathBuf,
    /// BIDS dataset: `<bids_id>/<session>`.
    pub bids: PathBuf,
    pub derivatives: PathBuf,
    pub manifest: PathBuf,
    pub manifest_backups: PathBuf,
    pub clinical_report: PathBuf,
    pub status_file: PathBuf,
    pub status_backups: PathBuf,
    pub logs: PathBuf,
}

impl DatasetLayout {
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref().to_path_buf();
        let downloaded_dicom = root.join("scratch").join("raw_dicom");
        let tabular = root.join("tabular");
        Self {
            organized_dicom: root.join("dicom"),
            bids: root.join("bids"),
            derivatives: root.join("derivatives"),
            manifest: tabular.join("manifest.csv"),
            manifest_backups: tabular.join(".manifests"),
            clinical_report: tabular.join("redcap_report.csv"),
            status_file: downloaded_dicom.join(FNAME_STATUS),
            status_backups: downloaded_dicom.join(DNAME_BACKUPS_STATUS),
            logs: root.join("scratch").join("logs"),
            downloaded_dicom,
            root,
        }
    }

    /// Output root of an external pipeline: `derivatives/<pipeline>/v<version>/output`.
    pub fn pipeline_output(&self, pipeline: &str, version: &str) -> PathBuf {
        self.derivatives
            .join(pipeline)
            .join(format!("v{}", version))
            .join("output")
    }
}
