//! Filesystem evidence of pipeline stages.
//!
//! A stage counts as done for a row when its expected directory exists and
//! contains at least one entry. An empty directory is treated exactly like
//! a missing one.

use std::collections::{BTreeMap, HashMap};
use std::io;
use std::path::Path;

use tracing::debug;

use super::table::StatusRow;

/// Where the session level sits in a stage's directory tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraversalOrder {
    /// `<root>/<session>/<dirname>`
    SessionFirst,
    /// `<root>/<dirname>/<session>`
    IdFirst,
}

/// Row field naming the per-participant directory of a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirnameColumn {
    ParticipantDicomDir,
    DicomId,
    BidsId,
}

impl DirnameColumn {
    pub fn as_str(&self) -> &'static str {
        match self {
            DirnameColumn::ParticipantDicomDir => "participant_dicom_dir",
            DirnameColumn::DicomId => "dicom_id",
            DirnameColumn::BidsId => "bids_id",
        }
    }
}

/// A row whose stage directories can be checked.
pub trait PresenceSubject {
    /// Session of the row; `None` means the check does not apply.
    fn session(&self) -> Option<&str>;

    /// Directory name stored in `column`, if any.
    fn dirname(&self, column: DirnameColumn) -> Option<&str>;
}

impl PresenceSubject for StatusRow {
    fn session(&self) -> Option<&str> {
        Some(self.session_id.as_str())
    }

    fn dirname(&self, column: DirnameColumn) -> Option<&str> {
        match column {
            DirnameColumn::ParticipantDicomDir => self.participant_dicom_dir.as_deref(),
            DirnameColumn::DicomId => Some(self.dicom_id.as_str()),
            DirnameColumn::BidsId => Some(self.bids_id.as_str()),
        }
    }
}

/// Whether `path` is a directory with at least one entry.
pub fn dir_has_entries(path: &Path) -> io::Result<bool> {
    if !path.is_dir() {
        return Ok(false);
    }
    let mut entries = std::fs::read_dir(path)?;
    Ok(entries.next().is_some())
}

/// Checks every row's stage directory under `root`.
///
/// The result is aligned with `rows`: `Some(true)` present, `Some(false)`
/// missing or empty, `None` when the row has no session or no directory
/// name. Rows are grouped by session so the session-level directory is
/// resolved once per session, and each distinct directory is checked once.
pub fn check_presence<T: PresenceSubject>(
    rows: &[T],
    root: &Path,
    column: DirnameColumn,
    order: TraversalOrder,
) -> io::Result<Vec<Option<bool>>> {
    let mut by_session: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for (index, row) in rows.iter().enumerate() {
        if let Some(session) = row.session().filter(|s| !s.is_empty()) {
            by_session.entry(session).or_default().push(index);
        }
    }

    let mut results = vec![None; rows.len()];
    for (session, indices) in by_session {
        let session_dir = root.join(session);
        // with the session level on top, a missing session directory settles every row
        let session_dir_exists = match order {
            TraversalOrder::SessionFirst => session_dir.is_dir(),
            TraversalOrder::IdFirst => true,
        };

        let mut checked: HashMap<&str, bool> = HashMap::new();
        for index in indices {
            let Some(dirname) = rows[index].dirname(column).filter(|d| !d.is_empty()) else {
                continue;
            };

            let present = if !session_dir_exists {
                false
            } else if let Some(present) = checked.get(dirname) {
                *present
            } else {
                let path = match order {
                    TraversalOrder::SessionFirst => session_dir.join(dirname),
                    TraversalOrder::IdFirst => root.join(dirname).join(session),
                };
                let present = dir_has_entries(&path)?;
                checked.insert(dirname, present);
                present
            };
            results[index] = Some(present);
        }

        debug!(
            root = %root.display(),
            session,
            column = column.as_str(),
            checked = checked.len(),
            "Checked stage directories"
        );
    }

    Ok(results)
}
