//! Error taxonomy for the verification engine.

use thiserror::Error;

/// Result type alias using VerifyError
pub type Result<T> = std::result::Result<T, VerifyError>;

/// Errors surfaced by the verification engine.
///
/// Per-resource failures during fan-out are recorded on the run, never
/// returned through this type; everything here is either fatal to a run or
/// a direct answer to a caller's query.
#[derive(Error, Debug, Clone)]
pub enum VerifyError {
    /// Trusted gateways returned different content ids for one identifier.
    /// A security event: never resolved by majority vote.
    #[error("gateways disagree on '{identifier}': saw ids {ids:?}")]
    ResolutionMismatch {
        identifier: String,
        ids: Vec<String>,
    },

    /// No trusted gateway produced a resolution at all.
    #[error("no gateways available to resolve '{identifier}': {reasons}")]
    NoGatewaysAvailable { identifier: String, reasons: String },

    /// Every candidate origin failed the working-gateway probe.
    #[error("all candidate gateways failed")]
    AllGatewaysFailed,

    /// Locally computed digest does not match the trusted digest.
    #[error("digest mismatch for content {content_id}")]
    HashMismatch { content_id: String },

    /// Content claimed to be a manifest but did not parse as one.
    #[error("malformed manifest {content_id}: {reason}")]
    ManifestParse { content_id: String, reason: String },

    /// A path was requested that the verified manifest does not contain.
    #[error("path '{path}' not found in manifest for '{identifier}'")]
    ResourceNotFound { identifier: String, path: String },

    /// A caller's wait on an in-progress run exceeded its bound.
    #[error("timed out waiting for verification of '{identifier}'")]
    VerificationTimeout { identifier: String },

    /// Transport-level failure talking to a specific origin.
    #[error("gateway error from {origin}: {reason}")]
    Gateway { origin: String, reason: String },
}

impl VerifyError {
    pub fn gateway(origin: impl Into<String>, reason: impl Into<String>) -> Self {
        VerifyError::Gateway {
            origin: origin.into(),
            reason: reason.into(),
        }
    }

    /// True for errors that abort a whole run rather than one resource.
    pub fn is_fatal_to_run(&self) -> bool {
        matches!(
            self,
            VerifyError::ResolutionMismatch { .. }
                | VerifyError::NoGatewaysAvailable { .. }
                | VerifyError::AllGatewaysFailed
                | VerifyError::ManifestParse { .. }
        )
    }
}
