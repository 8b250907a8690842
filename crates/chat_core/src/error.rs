//! crates/chat_core/src/error.rs
//!
//! The error taxonomy shared by every core operation.

use crate::domain::Tier;
use crate::ports::PortError;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// A referenced session or tier does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The operation is valid in general but not for the record as it stands.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Image generation was denied. Carries what a caller needs to render a
    /// countdown without asking again.
    #[error("Image limit of {limit} reached on the {tier} tier; resets in {reset_seconds}s")]
    QuotaExceeded {
        reset_seconds: i64,
        tier: Tier,
        limit: u32,
    },

    /// The model or image service failed after retries were exhausted.
    #[error("Upstream service unavailable: {0}")]
    UpstreamUnavailable(String),

    /// A collaborator (usually the store) failed.
    #[error(transparent)]
    Port(#[from] PortError),
}

pub type CoreResult<T> = Result<T, CoreError>;
