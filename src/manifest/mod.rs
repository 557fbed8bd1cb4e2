//! The participant manifest: one row per participant visit.

pub mod datatypes;
pub mod generator;
pub mod loader;

pub use datatypes::{format_datatype_list, parse_datatype_list};
pub use generator::{ClinicalReport, ManifestGenerator, ReportRecord};
pub use loader::{manifest_to_csv, write_manifest, ManifestRow, ManifestStore, MANIFEST_COLUMNS};
