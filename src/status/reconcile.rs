//! Merging freshly derived status rows with the previous status file.

use std::collections::BTreeSet;
use std::fmt;

use tracing::{debug, info};

use super::table::{StatusKey, StatusRow, StatusTable};
use crate::error::StatusError;

/// How a run treats the previous status file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReconcileMode {
    /// Rebuild every row from the filesystem; the previous file is ignored.
    Regenerate,
    /// Keep every previous row untouched and append rows for new keys.
    #[default]
    IncrementalAppend,
}

impl fmt::Display for ReconcileMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconcileMode::Regenerate => write!(f, "regenerate"),
            ReconcileMode::IncrementalAppend => write!(f, "incremental-append"),
        }
    }
}

/// Key sets of two tables compared against each other.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyDiff {
    /// Keys only in the new set.
    pub added: BTreeSet<StatusKey>,
    /// Keys only in the old set.
    pub removed: BTreeSet<StatusKey>,
    /// Keys in both.
    pub unchanged: BTreeSet<StatusKey>,
}

/// Splits `old` and `new` into added, removed and unchanged keys.
pub fn diff_keys(old: &BTreeSet<StatusKey>, new: &BTreeSet<StatusKey>) -> KeyDiff {
    KeyDiff {
        added: new.difference(old).cloned().collect(),
        removed: old.difference(new).cloned().collect(),
        unchanged: old.intersection(new).cloned().collect(),
    }
}

/// A reconciled, canonical status table and how its keys moved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    pub table: StatusTable,
    pub diff: KeyDiff,
}

/// Takes `fresh` as authoritative.
pub fn regenerate(previous: Option<&StatusTable>, fresh: Vec<StatusRow>) -> Reconciliation {
    let table = StatusTable::new(fresh).finalize();
    let old_keys = previous.map(StatusTable::keys).unwrap_or_default();
    let diff = diff_keys(&old_keys, &table.keys());
    if !diff.removed.is_empty() {
        info!(
            removed = diff.removed.len(),
            "Regeneration drops rows present in the previous status file"
        );
    }
    Reconciliation { table, diff }
}

/// Appends rows of `fresh` whose keys are not in `previous`.
///
/// Rows of `previous` are carried over unchanged, even where `fresh` holds
/// different values for the same key.
///
/// # Errors
///
/// Returns `StatusError::LostRows` if any key of `previous` is missing from
/// `fresh`.
pub fn append_new_rows(
    previous: &StatusTable,
    fresh: Vec<StatusRow>,
) -> Result<Reconciliation, StatusError> {
    let fresh_keys: BTreeSet<StatusKey> = fresh.iter().map(StatusRow::key).collect();
    let diff = diff_keys(&previous.keys(), &fresh_keys);

    if !diff.removed.is_empty() {
        return Err(StatusError::LostRows {
            keys: diff.removed.iter().cloned().collect(),
        });
    }

    let mut rows = previous.rows().to_vec();
    let appended: Vec<StatusRow> = fresh
        .into_iter()
        .filter(|row| diff.added.contains(&row.key()))
        .collect();
    debug!(appended = appended.len(), "Appending new status rows");
    rows.extend(appended);

    info!(
        added = diff.added.len(),
        "Added {} rows to existing status file",
        diff.added.len()
    );
    Ok(Reconciliation {
        table: StatusTable::new(rows).finalize(),
        diff,
    })
}

/// Dispatches to [`regenerate`] or [`append_new_rows`].
///
/// Incremental mode without a previous table appends to an empty one.
pub fn reconcile(
    mode: ReconcileMode,
    previous: Option<&StatusTable>,
    fresh: Vec<StatusRow>,
) -> Result<Reconciliation, StatusError> {
    match mode {
        ReconcileMode::Regenerate => Ok(regenerate(previous, fresh)),
        ReconcileMode::IncrementalAppend => {
            let empty = StatusTable::empty();
            append_new_rows(previous.unwrap_or(&empty), fresh)
        }
    }
}
