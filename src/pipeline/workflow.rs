//! Sequential execution of the workflows listed in the global config.
//!
//! Only `generate_manifest` runs in-process: it rebuilds the manifest from
//! the clinical report and then regenerates the status file. The other known
//! workflows wrap external containerized tools and are reported as skipped.

use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

use tracing::{error, info};

use super::config::GlobalConfig;
use crate::error::WorkflowError;
use crate::manifest::ManifestGenerator;
use crate::status::{StatusOptions, StatusTracker};

/// A workflow name recognized in `WORKFLOWS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Workflow {
    GenerateManifest,
    DicomOrg,
    BidsConv,
    Mriqc,
    Fmriprep,
}

impl Workflow {
    pub fn as_str(&self) -> &'static str {
        match self {
            Workflow::GenerateManifest => "generate_manifest",
            Workflow::DicomOrg => "dicom_org",
            Workflow::BidsConv => "bids_conv",
            Workflow::Mriqc => "mriqc",
            Workflow::Fmriprep => "fmriprep",
        }
    }

    /// Whether the workflow runs inside this process.
    pub fn is_builtin(&self) -> bool {
        matches!(self, Workflow::GenerateManifest)
    }
}

impl fmt::Display for Workflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Workflow {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "generate_manifest" => Ok(Workflow::GenerateManifest),
            "dicom_org" => Ok(Workflow::DicomOrg),
            "bids_conv" => Ok(Workflow::BidsConv),
            "mriqc" => Ok(Workflow::Mriqc),
            "fmriprep" => Ok(Workflow::Fmriprep),
            other => Err(format!("Unknown workflow: {}", other)),
        }
    }
}

/// Outcome of one workflow entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowStatus {
    Completed,
    /// Known, but executed by an external tool.
    Skipped,
    /// Not a recognized workflow name.
    Unknown,
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkflowStatus::Completed => write!(f, "completed"),
            WorkflowStatus::Skipped => write!(f, "skipped"),
            WorkflowStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// Record of one workflow entry of a run.
#[derive(Debug, Clone)]
pub struct WorkflowExecution {
    pub workflow: String,
    pub status: WorkflowStatus,
    pub duration: Duration,
}

/// Runs the configured workflows in order.
pub struct WorkflowRunner {
    config: GlobalConfig,
}

impl WorkflowRunner {
    pub fn new(config: GlobalConfig) -> Self {
        Self { config }
    }

    /// Runs every entry of `WORKFLOWS`, stopping at the first failure.
    pub fn run_all(&self) -> Result<Vec<WorkflowExecution>, WorkflowError> {
        info!(
            dataset = %self.config.dataset_root.display(),
            workflows = ?self.config.workflows,
            "Starting nipoppy run"
        );

        let mut executions = Vec::with_capacity(self.config.workflows.len());
        for name in &self.config.workflows {
            executions.push(self.run_workflow(name)?);
        }

        info!(count = executions.len(), "Finished nipoppy run");
        Ok(executions)
    }

    /// Runs a single workflow entry by name.
    pub fn run_workflow(&self, name: &str) -> Result<WorkflowExecution, WorkflowError> {
        let start = Instant::now();
        info!(workflow = name, "Starting workflow");

        let status = match name.parse::<Workflow>() {
            Ok(Workflow::GenerateManifest) => {
                self.generate_manifest(name)?;
                WorkflowStatus::Completed
            }
            Ok(workflow) => {
                info!(
                    workflow = %workflow,
                    "Workflow runs an external tool, skipping"
                );
                WorkflowStatus::Skipped
            }
            Err(message) => {
                error!("{}", message);
                WorkflowStatus::Unknown
            }
        };

        let duration = start.elapsed();
        info!(workflow = name, status = %status, ?duration, "Finished workflow");
        Ok(WorkflowExecution {
            workflow: name.to_string(),
            status,
            duration,
        })
    }

    fn generate_manifest(&self, name: &str) -> Result<(), WorkflowError> {
        let layout = self.config.layout();
        info!("All sessions are fetched while generating manifest");
        ManifestGenerator::new(self.config.clone())
            .run(&layout.clinical_report)
            .map_err(|source| WorkflowError::Manifest {
                workflow: name.to_string(),
                source,
            })?;

        StatusTracker::new(self.config.clone())
            .run(StatusOptions {
                regenerate: true,
                empty: false,
            })
            .map_err(|source| WorkflowError::Status {
                workflow: name.to_string(),
                source,
            })?;
        Ok(())
    }
}
