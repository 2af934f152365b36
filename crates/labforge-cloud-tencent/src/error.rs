//! Tencent Cloud provider error types

use labforge_cloud::{CloudError, Direction, ResourceKind};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TencentError {
    #[error("{0} not found. Please install it: pip install tccli / https://github.com/tencentyun/coscli")]
    CliNotFound(String),

    #[error("{action} failed: {message}")]
    CommandFailed { action: String, message: String },

    #[error("{action} timed out after {timeout:?}")]
    Timeout { action: String, timeout: Duration },

    #[error("Unexpected response from {action}: {message}")]
    UnexpectedResponse { action: String, message: String },

    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl TencentError {
    /// Failure of a creation
    pub fn into_submit(self, kind: ResourceKind) -> CloudError {
        CloudError::ProviderSubmit {
            kind,
            message: self.to_string(),
        }
    }

    /// Failure of a security group policy change
    pub fn into_rule_write(self, group_id: &str, direction: Direction) -> CloudError {
        CloudError::RuleWrite {
            group_id: group_id.to_string(),
            direction,
            message: self.to_string(),
        }
    }
}

/// Listing and lookup failures
impl From<TencentError> for CloudError {
    fn from(e: TencentError) -> Self {
        CloudError::ProviderQuery(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TencentError>;
