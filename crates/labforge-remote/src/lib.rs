//! SSH remote execution channel for LabForge
//!
//! Implements [`labforge_cloud::RemoteConnector`] on top of `ssh2` with
//! password authentication. `ssh2` is blocking, so every call runs on the
//! blocking thread pool.
//!
//! # Example
//!
//! ```ignore
//! use labforge_cloud::{RemoteConnector, RemoteTarget};
//! use labforge_remote::SshConnector;
//!
//! let target = RemoteTarget::new("203.0.113.10", 22, "root", password);
//! let mut session = SshConnector::new().connect(&target).await?;
//! let output = session.run_command("uname -a").await?;
//! session.close().await?;
//! ```

pub mod interactive;
pub mod ssh;

pub use interactive::RawModeGuard;
pub use ssh::{PUSH_BUFFER_SIZE, SshConnector, SshSession};
