//! Typed errors for the evolution surface.

use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced to callers of the evolution core. Per-data-point
/// collaborator failures (a failed run, an unparsable judge response) are
/// absorbed inside the engine and never reach this type.
#[derive(Debug, Error)]
pub enum EvolveError {
    /// Unknown persona id
    #[error("persona not found: {0}")]
    PersonaNotFound(Uuid),

    /// Unknown scenario id
    #[error("scenario not found: {0}")]
    ScenarioNotFound(Uuid),

    /// Unknown agent version id
    #[error("version not found: {0}")]
    VersionNotFound(Uuid),

    /// Malformed scenario id list; rejected before any simulation runs
    #[error("invalid scenario id list: {0}")]
    InvalidScenarioIds(String),

    /// Programming-logic fault (e.g. out-of-sequence version commit)
    #[error("invariant violation: {0}")]
    Invariant(String),

    /// A mandatory step could not complete
    #[error("collaborator failure: {0}")]
    Collaborator(#[from] anyhow::Error),
}

/// Result type alias for evolution operations.
pub type EvolveResult<T> = std::result::Result<T, EvolveError>;
