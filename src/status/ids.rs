//! Identifier derivation for participants and sessions.
//!
//! All functions here are pure: the same participant id always yields the
//! same BIDS and DICOM ids, independent of session or run mode.

/// Prefix of BIDS subject identifiers.
pub const BIDS_SUBJECT_PREFIX: &str = "sub-";

/// Prefix of BIDS session identifiers.
pub const BIDS_SESSION_PREFIX: &str = "ses-";

/// DICOM id of a participant: the participant id with every
/// non-alphanumeric character removed.
pub fn participant_id_to_dicom_id(participant_id: &str) -> String {
    participant_id
        .chars()
        .filter(|c| c.is_alphanumeric())
        .collect()
}

/// BIDS subject id of a participant (`sub-<dicom_id>`).
pub fn participant_id_to_bids_id(participant_id: &str) -> String {
    format!(
        "{}{}",
        BIDS_SUBJECT_PREFIX,
        participant_id_to_dicom_id(participant_id)
    )
}

/// Adds the `ses-` prefix to a session id unless it already has one.
pub fn session_id_to_bids_session(session_id: &str) -> String {
    if session_id.starts_with(BIDS_SESSION_PREFIX) {
        session_id.to_string()
    } else {
        format!("{}{}", BIDS_SESSION_PREFIX, session_id)
    }
}

/// Session id without its `ses-` prefix.
pub fn strip_session_prefix(session: &str) -> &str {
    session.strip_prefix(BIDS_SESSION_PREFIX).unwrap_or(session)
}
