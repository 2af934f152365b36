//! Mock remote channel for dry runs and tests
//!
//! Records every command and file push instead of touching a real host.
//! Connection failures and failing commands can be scripted.

use crate::error::{CloudError, Result};
use crate::remote::{CommandOutput, RemoteConnector, RemoteSession, RemoteTarget, remote_path};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

/// Everything the mock sessions were asked to do
#[derive(Debug, Clone, Default)]
pub struct MockLog {
    pub commands: Vec<String>,
    pub pushes: Vec<(PathBuf, String)>,
    pub closed: u32,
}

#[derive(Debug, Default)]
struct Script {
    /// command -> number of remaining failing runs
    failures: HashMap<String, u32>,
    /// command -> output returned on success
    outputs: HashMap<String, String>,
}

/// Connector whose sessions only record what they are asked to do
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    fail_first: u32,
    attempts: Arc<AtomicU32>,
    log: Arc<Mutex<MockLog>>,
    script: Arc<Mutex<Script>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the first `n` connection attempts
    pub fn fail_first_connects(mut self, n: u32) -> Self {
        self.fail_first = n;
        self
    }

    /// Make `command` exit non-zero for its next `times` runs
    pub fn fail_command(self, command: impl Into<String>, times: u32) -> Self {
        self.lock_script().failures.insert(command.into(), times);
        self
    }

    /// Output returned by `command` when it succeeds
    pub fn respond(self, command: impl Into<String>, output: impl Into<String>) -> Self {
        self.lock_script().outputs.insert(command.into(), output.into());
        self
    }

    pub fn connect_attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn log(&self) -> MockLog {
        self.log.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn lock_script(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl RemoteConnector for MockConnector {
    async fn connect(&self, target: &RemoteTarget) -> Result<Box<dyn RemoteSession>> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= self.fail_first {
            return Err(CloudError::Connection(format!(
                "{}: connection refused",
                target.address()
            )));
        }

        Ok(Box::new(MockSession {
            host: target.host.clone(),
            open: true,
            log: self.log.clone(),
            script: self.script.clone(),
        }))
    }
}

/// Session handed out by [`MockConnector`]
#[derive(Debug)]
pub struct MockSession {
    host: String,
    open: bool,
    log: Arc<Mutex<MockLog>>,
    script: Arc<Mutex<Script>>,
}

impl MockSession {
    fn ensure_open(&self) -> Result<()> {
        if self.open {
            Ok(())
        } else {
            Err(CloudError::Connection(format!("session to {} is closed", self.host)))
        }
    }
}

#[async_trait]
impl RemoteSession for MockSession {
    fn host(&self) -> &str {
        &self.host
    }

    async fn run_command(&mut self, command: &str) -> Result<CommandOutput> {
        self.ensure_open()?;
        self.log
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .commands
            .push(command.to_string());

        let mut script = self.script.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(remaining) = script.failures.get_mut(command)
            && *remaining > 0
        {
            *remaining -= 1;
            return Ok(CommandOutput::new(
                format!("{}: simulated failure", command),
                Some(1),
            ));
        }

        let output = script.outputs.get(command).cloned().unwrap_or_default();
        Ok(CommandOutput::new(output, Some(0)))
    }

    async fn push_file(&mut self, local_path: &Path, remote_dir: &str) -> Result<String> {
        self.ensure_open()?;
        tokio::fs::metadata(local_path).await?;
        let destination = remote_path(local_path, remote_dir)?;
        self.log
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pushes
            .push((local_path.to_path_buf(), destination.clone()));
        Ok(destination)
    }

    async fn close(&mut self) -> Result<()> {
        if self.open {
            self.open = false;
            self.log.lock().unwrap_or_else(|e| e.into_inner()).closed += 1;
        }
        Ok(())
    }
}
