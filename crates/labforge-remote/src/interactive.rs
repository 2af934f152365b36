//! Interactive PTY sessions
//!
//! Used by `labforge shell`. The remote side gets a PTY sized like the local
//! terminal; bytes are pumped between the channel and the caller's streams
//! until the remote end closes.

use crate::ssh::SshSession;
use labforge_cloud::{CloudError, Result};
use ssh2::{Channel, Session};
use std::io::{ErrorKind, IsTerminal, Read, Write};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::time::Duration;

const TERM: &str = "xterm-256color";
const FALLBACK_SIZE: (u16, u16) = (80, 24);
const IDLE_SLEEP: Duration = Duration::from_millis(10);

/// Keeps the local terminal in raw mode until dropped
pub struct RawModeGuard {
    enabled: bool,
}

impl RawModeGuard {
    /// Enable raw mode if stdin is a terminal; otherwise do nothing.
    pub fn enable() -> Result<Self> {
        if !std::io::stdin().is_terminal() {
            return Ok(Self { enabled: false });
        }
        crossterm::terminal::enable_raw_mode()?;
        Ok(Self { enabled: true })
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if self.enabled {
            let _ = crossterm::terminal::disable_raw_mode();
        }
    }
}

/// Columns and rows of the local terminal
pub fn terminal_size() -> (u16, u16) {
    crossterm::terminal::size()
        .ok()
        .filter(|(cols, rows)| *cols > 0 && *rows > 0)
        .unwrap_or(FALLBACK_SIZE)
}

impl SshSession {
    /// Run `command` (or a login shell) under a PTY, pumping `input` to the
    /// remote side and remote output to `output`. Returns the exit status.
    pub async fn run_interactive<R, W>(
        &mut self,
        command: Option<&str>,
        input: R,
        output: W,
    ) -> Result<Option<i32>>
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        let (cols, rows) = terminal_size();
        let command = command.map(str::to_owned);
        let _raw = RawModeGuard::enable()?;

        let (tx, rx) = mpsc::channel::<Vec<u8>>();
        // Detached: a blocked read on the local input cannot be interrupted.
        std::thread::spawn(move || forward_input(input, tx));

        self.with_session(move |session| {
            pump(session, command.as_deref(), (cols, rows), rx, output)
        })
        .await
    }
}

fn forward_input<R: Read>(mut input: R, tx: mpsc::Sender<Vec<u8>>) {
    let mut buffer = [0u8; 1024];
    loop {
        match input.read(&mut buffer) {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if tx.send(buffer[..n].to_vec()).is_err() {
                    break;
                }
            }
        }
    }
}

fn pump<W: Write>(
    session: &Session,
    command: Option<&str>,
    (cols, rows): (u16, u16),
    rx: Receiver<Vec<u8>>,
    mut output: W,
) -> Result<Option<i32>> {
    let mut channel = session
        .channel_session()
        .map_err(|e| CloudError::Connection(format!("SSH channel open: {}", e)))?;
    channel
        .request_pty(TERM, None, Some((cols as u32, rows as u32, 0, 0)))
        .map_err(|e| CloudError::Connection(format!("PTY request: {}", e)))?;
    let started = match command {
        Some(command) => channel.exec(command),
        None => channel.shell(),
    };
    started.map_err(|e| CloudError::Connection(format!("SSH exec: {}", e)))?;

    session.set_blocking(false);
    let pumped = pump_loop(&mut channel, &rx, &mut output);
    session.set_blocking(true);
    pumped?;

    channel.wait_close().ok();
    Ok(channel.exit_status().ok())
}

fn pump_loop<W: Write>(channel: &mut Channel, rx: &Receiver<Vec<u8>>, output: &mut W) -> Result<()> {
    let mut buffer = [0u8; 4096];
    let mut input_open = true;

    loop {
        let mut idle = true;

        match channel.read(&mut buffer) {
            Ok(0) => {}
            Ok(n) => {
                output.write_all(&buffer[..n])?;
                output.flush()?;
                idle = false;
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => {}
            Err(e) => return Err(CloudError::Connection(format!("SSH read: {}", e))),
        }

        while input_open {
            match rx.try_recv() {
                Ok(bytes) => {
                    write_nonblocking(channel, &bytes)?;
                    idle = false;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    input_open = false;
                    let _ = channel.send_eof();
                }
            }
        }

        if channel.eof() {
            return Ok(());
        }
        if idle {
            std::thread::sleep(IDLE_SLEEP);
        }
    }
}

fn write_nonblocking(channel: &mut Channel, mut bytes: &[u8]) -> Result<()> {
    while !bytes.is_empty() {
        match channel.write(bytes) {
            Ok(n) => bytes = &bytes[n..],
            Err(e) if e.kind() == ErrorKind::WouldBlock => std::thread::sleep(IDLE_SLEEP),
            Err(e) => return Err(CloudError::Connection(format!("SSH write: {}", e))),
        }
    }
    Ok(())
}
