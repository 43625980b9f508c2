//! CLI Exit Code Registry
//!
//! This is the single source of truth for all `agrid` exit codes.
//! Exit codes are part of the shell contract: review pipelines rely on them.
//!
//! # Exit Codes
//!
//! | Code | Domain     | Description                                        |
//! |------|------------|----------------------------------------------------|
//! | 0    | Universal  | Success                                            |
//! | 1    | Universal  | General error (unspecified)                        |
//! | 2    | Universal  | CLI usage error (bad args, missing file)           |
//! | 3    | evaluate   | Report matched no rows                             |
//! | 4    | config     | Run config failed to parse or validate             |
//! | 5    | load       | Snapshot could not be loaded from its sources      |
//! | 6    | input      | Snapshot is inconsistent (duplicate identity, ...) |
//!
//! # Adding New Exit Codes
//!
//! 1. Add the constant below
//! 2. Document what triggers it
//! 3. Update the table above
//! 4. Wire it into `recon_exit_code` or the relevant command

use accessgrid_recon::ReconError;

// =============================================================================
// Universal (0-2)
// =============================================================================

/// Success - command completed without errors.
pub const EXIT_SUCCESS: u8 = 0;

/// General error - unspecified failure.
/// Avoid using this; prefer a specific error code.
pub const EXIT_ERROR: u8 = 1;

/// Usage error - bad arguments, missing required options, unreadable config.
pub const EXIT_USAGE: u8 = 2;

// =============================================================================
// Review (3-6)
// =============================================================================

/// The report request matched no rows. Output (headers only) is still written.
pub const EXIT_NO_ROWS: u8 = 3;

/// Config parse or validation failure.
pub const EXIT_INVALID_CONFIG: u8 = 4;

/// An identities, accounts, catalog or exceptions source could not be read.
pub const EXIT_LOAD_FAILED: u8 = 5;

/// Snapshot loaded but is inconsistent: duplicate identity key, SoD rule
/// naming an unknown resource or system.
pub const EXIT_INPUT_ERROR: u8 = 6;

/// Map an engine error to its exit code.
pub fn recon_exit_code(err: &ReconError) -> u8 {
    match err {
        ReconError::ConfigParse(_) | ReconError::ConfigValidation(_) => EXIT_INVALID_CONFIG,
        ReconError::Source(_)
        | ReconError::Io(_)
        | ReconError::MissingColumn { .. }
        | ReconError::InvalidValue { .. } => EXIT_LOAD_FAILED,
        ReconError::DuplicateIdentity(_)
        | ReconError::UnknownResource { .. }
        | ReconError::UnknownSystem(_) => EXIT_INPUT_ERROR,
    }
}
