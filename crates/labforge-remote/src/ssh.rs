//! SSH sessions over `ssh2`

use async_trait::async_trait;
use labforge_cloud::remote::remote_path;
use labforge_cloud::{
    CloudError, CommandOutput, RemoteConnector, RemoteSession, RemoteTarget, Result,
};
use ssh2::{ExtendedData, Session};
use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Chunk size used when streaming a file to the node
pub const PUSH_BUFFER_SIZE: usize = 32 * 1024;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(300);

fn ssh_error(context: &str, e: impl std::fmt::Display) -> CloudError {
    CloudError::Connection(format!("{}: {}", context, e))
}

fn join_error(e: tokio::task::JoinError) -> CloudError {
    CloudError::Connection(format!("SSH task failed: {}", e))
}

/// Opens password-authenticated SSH sessions
#[derive(Debug, Clone)]
pub struct SshConnector {
    connect_timeout: Duration,
    io_timeout: Duration,
}

impl Default for SshConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl SshConnector {
    pub fn new() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            io_timeout: DEFAULT_IO_TIMEOUT,
        }
    }

    /// TCP connect timeout and per-read/write timeout
    pub fn with_timeouts(mut self, connect: Duration, io: Duration) -> Self {
        self.connect_timeout = connect;
        self.io_timeout = io;
        self
    }

    /// Open an authenticated session on the calling thread
    fn open(&self, target: &RemoteTarget) -> Result<Session> {
        let address = target.address();
        let socket = (target.host.as_str(), target.port)
            .to_socket_addrs()
            .map_err(|e| ssh_error(&format!("resolve {}", address), e))?
            .next()
            .ok_or_else(|| CloudError::Connection(format!("{} did not resolve", address)))?;

        let tcp = TcpStream::connect_timeout(&socket, self.connect_timeout)
            .map_err(|e| ssh_error(&format!("connect to {}", address), e))?;
        tcp.set_read_timeout(Some(self.io_timeout)).ok();
        tcp.set_write_timeout(Some(self.io_timeout)).ok();

        let mut session = Session::new().map_err(|e| ssh_error("SSH session init", e))?;
        session.set_tcp_stream(tcp);
        session.set_timeout(self.io_timeout.as_millis().min(u32::MAX as u128) as u32);
        session
            .handshake()
            .map_err(|e| ssh_error(&format!("SSH handshake with {}", address), e))?;

        session
            .userauth_password(&target.user, target.password())
            .map_err(|e| ssh_error(&format!("SSH authentication as {}", target.user), e))?;
        if !session.authenticated() {
            return Err(CloudError::Connection(format!(
                "SSH authentication as {} failed",
                target.user
            )));
        }

        Ok(session)
    }

    /// Open a session without going through the trait object, for callers
    /// that need [`SshSession::run_interactive`]
    pub async fn open_session(&self, target: &RemoteTarget) -> Result<SshSession> {
        let connector = self.clone();
        let target = target.clone();
        let host = target.host.clone();

        let session = tokio::task::spawn_blocking(move || connector.open(&target))
            .await
            .map_err(join_error)??;

        tracing::debug!("SSH session to {} established", host);
        Ok(SshSession {
            host,
            session: Some(session),
        })
    }
}

#[async_trait]
impl RemoteConnector for SshConnector {
    async fn connect(&self, target: &RemoteTarget) -> Result<Box<dyn RemoteSession>> {
        Ok(Box::new(self.open_session(target).await?))
    }
}

/// One authenticated SSH session
///
/// Holds at most one transport handle. Every blocking call takes the handle,
/// runs on the blocking pool and puts it back; a call that panics loses it and
/// the session behaves as closed afterwards.
pub struct SshSession {
    host: String,
    session: Option<Session>,
}

impl SshSession {
    fn take(&mut self) -> Result<Session> {
        self.session
            .take()
            .ok_or_else(|| CloudError::Connection(format!("session to {} is closed", self.host)))
    }

    /// Run `f` with the transport on the blocking pool
    pub(crate) async fn with_session<T, F>(&mut self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Session) -> Result<T> + Send + 'static,
    {
        let session = self.take()?;
        let (session, result) = tokio::task::spawn_blocking(move || {
            let result = f(&session);
            (session, result)
        })
        .await
        .map_err(join_error)?;
        self.session = Some(session);
        result
    }

    pub fn is_open(&self) -> bool {
        self.session.is_some()
    }
}

fn exec(session: &Session, command: &str) -> Result<CommandOutput> {
    let mut channel = session
        .channel_session()
        .map_err(|e| ssh_error("SSH channel open", e))?;
    // stderr shares the stdout window; reading them one after the other can
    // stall a command that fills the stream not being read
    channel
        .handle_extended_data(ExtendedData::Merge)
        .map_err(|e| ssh_error("SSH channel setup", e))?;
    channel
        .exec(command)
        .map_err(|e| ssh_error("SSH exec", e))?;

    let output = read_output(&mut channel)?;
    channel.wait_close().ok();

    let exit_status = channel.exit_status().ok();
    Ok(CommandOutput::new(output, exit_status))
}

/// Drain a command's combined output; invalid UTF-8 is replaced, not fatal
fn read_output<R: Read>(reader: &mut R) -> Result<String> {
    let mut bytes = Vec::new();
    reader
        .read_to_end(&mut bytes)
        .map_err(|e| ssh_error("SSH read", e))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn push(session: &Session, local_path: &Path, destination: &str) -> Result<u64> {
    let mut local = std::fs::File::open(local_path)?;
    let sftp = session.sftp().map_err(|e| ssh_error("SFTP init", e))?;
    let mut remote = sftp
        .create(Path::new(destination))
        .map_err(|e| ssh_error(&format!("create {}", destination), e))?;

    let mut buffer = vec![0u8; PUSH_BUFFER_SIZE];
    let mut total = 0u64;
    loop {
        let n = local.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        remote
            .write_all(&buffer[..n])
            .map_err(|e| ssh_error(&format!("write {}", destination), e))?;
        total += n as u64;
    }
    Ok(total)
}

#[async_trait]
impl RemoteSession for SshSession {
    fn host(&self) -> &str {
        &self.host
    }

    async fn run_command(&mut self, command: &str) -> Result<CommandOutput> {
        tracing::debug!("Running `{}` on {}", command, self.host);
        let command = command.to_string();
        self.with_session(move |session| exec(session, &command))
            .await
    }

    async fn push_file(&mut self, local_path: &Path, remote_dir: &str) -> Result<String> {
        let destination = remote_path(local_path, remote_dir)?;
        let local: PathBuf = local_path.to_path_buf();
        let target = destination.clone();

        let bytes = self
            .with_session(move |session| push(session, &local, &target))
            .await?;
        tracing::debug!("Pushed {} bytes to {}:{}", bytes, self.host, destination);
        Ok(destination)
    }

    async fn close(&mut self) -> Result<()> {
        let Some(session) = self.session.take() else {
            return Ok(());
        };
        tokio::task::spawn_blocking(move || {
            session
                .disconnect(None, "closing", None)
                .map_err(|e| ssh_error("SSH disconnect", e))
        })
        .await
        .map_err(join_error)??;
        tracing::debug!("SSH session to {} closed", self.host);
        Ok(())
    }
}
