//! Provisioning error types

use crate::provider::ResourceKind;
use crate::security::Direction;
use thiserror::Error;

/// Provisioning errors
///
/// Every stage either succeeds and checkpoints, or fails with one of these and
/// leaves the checkpoint untouched. Provider messages are relayed verbatim.
#[derive(Error, Debug)]
pub enum CloudError {
    #[error("Provider query failed: {0}")]
    ProviderQuery(String),

    #[error("Quota exceeded for {kind}: {used}/{limit} in use")]
    QuotaExceeded {
        kind: ResourceKind,
        used: u64,
        limit: u64,
    },

    #[error("Provider rejected {kind} creation: {message}")]
    ProviderSubmit { kind: ResourceKind, message: String },

    #[error("Provider rejected {direction} rule change on security group {group_id}: {message}")]
    RuleWrite {
        group_id: String,
        direction: Direction,
        message: String,
    },

    #[error("Remote connection failed: {0}")]
    Connection(String),

    #[error("Remote bootstrap command `{command}` failed: {output}")]
    RemoteBootstrap { command: String, output: String },

    #[error("Security group convergence failed: {0}")]
    SecurityConvergence(String),

    #[error("Failed to load checkpoint: {0}")]
    CheckpointLoad(String),

    #[error("Failed to save checkpoint: {0}")]
    CheckpointSave(String),

    #[error("Stage `{0}` has not completed yet")]
    MissingPrerequisite(&'static str),

    #[error("Lock acquisition failed: {0}")]
    LockError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CloudError {
    /// Whether re-invoking the failed stage may succeed without outside changes.
    pub fn is_retryable(&self) -> bool {
        match self {
            CloudError::ProviderQuery(_)
            | CloudError::ProviderSubmit { .. }
            | CloudError::RuleWrite { .. }
            | CloudError::Connection(_)
            | CloudError::SecurityConvergence(_)
            | CloudError::Io(_) => true,
            CloudError::QuotaExceeded { .. }
            | CloudError::RemoteBootstrap { .. }
            | CloudError::CheckpointLoad(_)
            | CloudError::CheckpointSave(_)
            | CloudError::MissingPrerequisite(_)
            | CloudError::LockError(_)
            | CloudError::Json(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, CloudError>;
