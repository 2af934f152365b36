//! Remote execution channel abstraction
//!
//! The engine only talks to nodes through these traits. The SSH
//! implementation lives in `labforge-remote`; [`crate::mock`] provides an
//! in-process one for dry runs and tests.

use crate::error::{CloudError, Result};
use crate::retry::{RetryConfig, retry};
use async_trait::async_trait;
use std::path::Path;

/// Where and how to reach a node
#[derive(Clone, PartialEq, Eq)]
pub struct RemoteTarget {
    pub host: String,
    pub port: u16,
    pub user: String,
    password: String,
}

impl RemoteTarget {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            user: user.into(),
            password: password.into(),
        }
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl std::fmt::Debug for RemoteTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteTarget")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Combined output of one remote command
///
/// A non-zero exit status is not an error; callers decide what it means.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// stdout followed by stderr
    pub output: String,

    /// Exit status, if the remote end reported one
    pub exit_status: Option<i32>,
}

impl CommandOutput {
    pub fn new(output: impl Into<String>, exit_status: Option<i32>) -> Self {
        Self {
            output: output.into(),
            exit_status,
        }
    }

    pub fn success(&self) -> bool {
        self.exit_status == Some(0)
    }
}

/// An authenticated channel to one host, owned by whoever opened it
#[async_trait]
pub trait RemoteSession: Send {
    fn host(&self) -> &str;

    /// Run one command and wait for it to finish
    async fn run_command(&mut self, command: &str) -> Result<CommandOutput>;

    /// Copy a local file into `remote_dir`, keeping its base name.
    /// Returns the remote path.
    async fn push_file(&mut self, local_path: &Path, remote_dir: &str) -> Result<String>;

    /// Release the underlying transport; later calls fail.
    async fn close(&mut self) -> Result<()>;
}

/// Opens sessions; one call is one connection attempt.
#[async_trait]
pub trait RemoteConnector: Send + Sync {
    async fn connect(&self, target: &RemoteTarget) -> Result<Box<dyn RemoteSession>>;
}

/// Connect with bounded retries, failing with [`CloudError::Connection`]
/// once every attempt has failed.
pub async fn connect_with_retry(
    connector: &dyn RemoteConnector,
    target: &RemoteTarget,
    config: &RetryConfig,
) -> Result<Box<dyn RemoteSession>> {
    let what = format!("connect to {}", target.address());
    retry(config, &what, |attempt| {
        tracing::debug!("Connecting to {} (attempt {})", target.address(), attempt);
        connector.connect(target)
    })
    .await
    .map_err(|e| match e {
        CloudError::Connection(_) => e,
        other => CloudError::Connection(other.to_string()),
    })
}

/// Remote destination of `local_path` when pushed into `remote_dir`
pub fn remote_path(local_path: &Path, remote_dir: &str) -> Result<String> {
    let name = local_path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| {
            CloudError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("{} has no usable file name", local_path.display()),
            ))
        })?;
    let dir = remote_dir.trim_end_matches('/');
    Ok(if dir.is_empty() && remote_dir.starts_with('/') {
        format!("/{}", name)
    } else if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dir, name)
    })
}
