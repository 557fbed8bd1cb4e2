//! Read-only queries over the published status file.

use std::collections::BTreeSet;

use tracing::info;

use crate::error::{CatalogError, StatusError};
use crate::pipeline::{DatasetLayout, GlobalConfig};
use crate::status::ids::session_id_to_bids_session;
use crate::status::{check_presence, DirnameColumn, StatusRow, StatusTable, TraversalOrder};

/// Resolves the version of `pipeline`: the explicit one if given, else
/// `PROC_PIPELINES.<pipeline>.VERSION` from the config.
pub fn resolve_pipeline_version(
    config: &GlobalConfig,
    pipeline: &str,
    version: Option<&str>,
) -> Result<String, CatalogError> {
    version
        .map(str::to_string)
        .or_else(|| config.pipeline_version(pipeline))
        .ok_or_else(|| CatalogError::MissingPipelineVersion {
            pipeline: pipeline.to_string(),
        })
}

/// The status table of a dataset, opened for queries.
#[derive(Debug, Clone)]
pub struct StatusCatalog {
    table: StatusTable,
    layout: DatasetLayout,
}

impl StatusCatalog {
    pub fn new(table: StatusTable, layout: DatasetLayout) -> Self {
        Self { table, layout }
    }

    /// Opens the published status file of the dataset.
    ///
    /// # Errors
    ///
    /// Returns `StatusError::MissingState` (wrapped) if no status file has
    /// been published yet.
    pub fn open(config: &GlobalConfig) -> Result<Self, CatalogError> {
        let layout = config.layout();
        if !layout.status_file.exists() {
            return Err(StatusError::MissingState {
                path: layout.status_file,
            }
            .into());
        }
        let table = StatusTable::read(&layout.status_file)?;
        Ok(Self::new(table, layout))
    }

    pub fn table(&self) -> &StatusTable {
        &self.table
    }

    /// Rows of `session` that have been converted to BIDS.
    pub fn converted(&self, session: &str) -> Vec<&StatusRow> {
        let session = session_id_to_bids_session(session);
        self.table
            .rows()
            .iter()
            .filter(|r| r.session_id == session && r.conv_status)
            .collect()
    }

    /// BIDS ids of `session` ready for `pipeline` but without its output yet.
    ///
    /// Output is looked up at
    /// `derivatives/<pipeline>/v<version>/output/<bids_id>/<session>`; an
    /// empty directory counts as no output.
    pub fn new_participants(
        &self,
        session: &str,
        pipeline: &str,
        version: &str,
    ) -> Result<Vec<String>, CatalogError> {
        let candidates: Vec<StatusRow> = self.converted(session).into_iter().cloned().collect();
        let output_root = self.layout.pipeline_output(pipeline, version);
        let processed = check_presence(
            &candidates,
            &output_root,
            DirnameColumn::BidsId,
            TraversalOrder::IdFirst,
        )?;

        let mut seen = BTreeSet::new();
        let bids_ids: Vec<String> = candidates
            .iter()
            .zip(processed)
            .filter(|(_, done)| !done.unwrap_or(false))
            .map(|(row, _)| row.bids_id.clone())
            .filter(|id| seen.insert(id.clone()))
            .collect();

        info!(
            pipeline,
            version,
            session = %session_id_to_bids_session(session),
            converted = candidates.len(),
            new = bids_ids.len(),
            "Found participants to process"
        );
        Ok(bids_ids)
    }
}
