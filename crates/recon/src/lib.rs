//! `accessgrid-recon`: Identity/account divergence detection and SoD policy engine.
//!
//! Pure engine crate: receives point-in-time HR identities and per-system
//! accounts, returns divergence-annotated records and flat rows.
//! No CLI dependencies; file ingestion lives in [`load`].

pub mod config;
pub mod detect;
pub mod engine;
pub mod error;
pub mod exceptions;
pub mod filter;
pub mod index;
pub mod load;
pub mod model;
pub mod project;
pub mod sod;
pub mod summary;

pub use config::{DetectionSettings, ReconConfig};
pub use engine::{evaluate, evaluate_source, load_snapshot, Report, ReportRecords, SnapshotSource};
pub use error::ReconError;
pub use exceptions::{ExceptionSet, VisibilityMode};
pub use filter::{DivergenceFilter, FilterRequest, ReportSubject};
pub use load::CsvSource;
pub use model::{DivergenceCode, Exception, Snapshot, Status};
pub use project::{AccountRow, IdentityRow, ProjectedRows};
pub use summary::{compute_summary, Summary};
