//! Supervised process abstraction and its PTY implementation
//!
//! The supervisor only sees a [`SpawnedProcess`]: an ordered output channel,
//! a one-shot exit notification, and a [`ProcessControl`] handle for input,
//! resize and termination. [`PtySpawner`] provides these over a real
//! pseudo-terminal via `portable-pty`.

use portable_pty::{native_pty_system, ChildKiller, CommandBuilder, MasterPty, PtySize};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::Mutex;
use tokio::sync::{mpsc, oneshot};

use crate::error::{RelayError, Result};
use crate::utils::lock_mutex_recover;

/// Size of a single PTY read
const READ_CHUNK_SIZE: usize = 4096;

/// Terminal geometry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalSize {
    pub cols: u16,
    pub rows: u16,
}

impl TerminalSize {
    pub fn new(cols: u16, rows: u16) -> Self {
        Self { cols, rows }
    }

    /// Validate an observer-supplied geometry; non-positive or oversized
    /// dimensions yield `None`.
    pub fn from_request(cols: i64, rows: i64) -> Option<Self> {
        let cols = u16::try_from(cols).ok().filter(|c| *c > 0)?;
        let rows = u16::try_from(rows).ok().filter(|r| *r > 0)?;
        Some(Self { cols, rows })
    }
}

impl Default for TerminalSize {
    fn default() -> Self {
        Self::new(120, 40)
    }
}

impl From<TerminalSize> for PtySize {
    fn from(size: TerminalSize) -> Self {
        PtySize {
            rows: size.rows,
            cols: size.cols,
            pixel_width: 0,
            pixel_height: 0,
        }
    }
}

/// How a supervised process terminated
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExitInfo {
    pub code: Option<u32>,
    pub signal: Option<String>,
}

impl ExitInfo {
    pub fn with_code(code: u32) -> Self {
        Self {
            code: Some(code),
            signal: None,
        }
    }

    pub fn with_signal(signal: impl Into<String>) -> Self {
        Self {
            code: None,
            signal: Some(signal.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == Some(0) && self.signal.is_none()
    }

    /// Short human-readable description, e.g. `code 1` or `signal SIGKILL`
    pub fn describe(&self) -> String {
        match (&self.code, &self.signal) {
            (_, Some(signal)) => format!("signal {}", signal),
            (Some(code), None) => format!("code {}", code),
            (None, None) => "unknown status".to_string(),
        }
    }
}

// A signalled exit carries a placeholder code of 1; report the signal alone.
impl From<portable_pty::ExitStatus> for ExitInfo {
    fn from(status: portable_pty::ExitStatus) -> Self {
        match status.signal() {
            Some(signal) => Self::with_signal(signal),
            None => Self::with_code(status.exit_code()),
        }
    }
}

/// Commands routed from observers to the live process, in emission order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessCommand {
    Input(Vec<u8>),
    Resize(TerminalSize),
}

/// Control surface of a live process
pub trait ProcessControl: Send + Sync {
    fn write(&self, data: &[u8]) -> Result<()>;
    fn resize(&self, size: TerminalSize) -> Result<()>;
    /// Forcibly terminate the process
    fn kill(&self) -> Result<()>;
    fn pid(&self) -> Option<u32>;
}

/// A freshly spawned process
pub struct SpawnedProcess {
    /// Output chunks in production order; closed at EOF
    pub output: mpsc::UnboundedReceiver<Vec<u8>>,
    pub exit: oneshot::Receiver<ExitInfo>,
    pub control: Box<dyn ProcessControl>,
}

/// Factory for supervised processes
pub trait ProcessSpawner: Send + Sync {
    fn spawn(&self, size: TerminalSize) -> Result<SpawnedProcess>;
}

/// What to run under the PTY
#[derive(Debug, Clone, Default)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn cwd(mut self, cwd: Option<PathBuf>) -> Self {
        self.cwd = cwd;
        self
    }

    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Spawns the configured command inside a native pseudo-terminal
pub struct PtySpawner {
    command: CommandSpec,
}

impl PtySpawner {
    pub fn new(command: CommandSpec) -> Self {
        Self { command }
    }

    pub fn command(&self) -> &CommandSpec {
        &self.command
    }

    /// Resolve the program on `PATH` (or relative to the working directory)
    pub fn resolve_program(&self) -> Result<PathBuf> {
        let resolved = match self.command.cwd {
            Some(ref cwd) => which::which_in(&self.command.program, std::env::var_os("PATH"), cwd),
            None => which::which(&self.command.program),
        };
        resolved.map_err(|e| RelayError::Spawn(format!("{}: {}", self.command.program, e)))
    }
}

impl ProcessSpawner for PtySpawner {
    fn spawn(&self, size: TerminalSize) -> Result<SpawnedProcess> {
        let program = self.resolve_program()?;

        let pair = native_pty_system()
            .openpty(size.into())
            .map_err(|e| RelayError::Pty(format!("Failed to open PTY: {}", e)))?;

        let mut cmd = CommandBuilder::new(&program);
        cmd.args(&self.command.args);
        if let Some(ref cwd) = self.command.cwd {
            cmd.cwd(cwd);
        }
        for (key, value) in &self.command.env {
            cmd.env(key, value);
        }

        let mut child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| RelayError::Spawn(format!("{}: {}", program.display(), e)))?;

        // Only the master side is needed from here on
        drop(pair.slave);

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| RelayError::Pty(format!("Failed to clone PTY reader: {}", e)))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| RelayError::Pty(format!("Failed to get PTY writer: {}", e)))?;

        let pid = child.process_id();
        let killer = child.clone_killer();

        // Grandchildren can hold the slave open past our child's exit, so the
        // reader runs detached from the runtime's blocking pool.
        let (output_tx, output_rx) = mpsc::unbounded_channel();
        std::thread::Builder::new()
            .name(format!("pty-reader-{}", pid.unwrap_or_default()))
            .spawn(move || pump_output(reader, output_tx))
            .map_err(|e| RelayError::Pty(format!("Failed to start PTY reader: {}", e)))?;

        let (exit_tx, exit_rx) = oneshot::channel();
        tokio::task::spawn_blocking(move || {
            let info = match child.wait() {
                Ok(status) => ExitInfo::from(status),
                Err(e) => {
                    log::warn!("Failed to wait for supervised process: {}", e);
                    ExitInfo::default()
                }
            };
            let _ = exit_tx.send(info);
        });

        log::info!(
            "Spawned '{}' (pid {:?}) at {}x{}",
            self.command.display(),
            pid,
            size.cols,
            size.rows
        );

        Ok(SpawnedProcess {
            output: output_rx,
            exit: exit_rx,
            control: Box::new(PtyControl {
                master: Mutex::new(pair.master),
                writer: Mutex::new(writer),
                killer: Mutex::new(killer),
                pid,
            }),
        })
    }
}

/// Blocking reader loop; ends at EOF or when the receiver is gone
fn pump_output(mut reader: Box<dyn Read + Send>, tx: mpsc::UnboundedSender<Vec<u8>>) {
    let mut buf = [0u8; READ_CHUNK_SIZE];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => {
                log::debug!("PTY EOF");
                break;
            }
            Ok(n) => {
                if tx.send(buf[..n].to_vec()).is_err() {
                    break;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                // EIO is the usual way a PTY reports the slave side closing
                log::debug!("PTY read ended: {}", e);
                break;
            }
        }
    }
}

struct PtyControl {
    master: Mutex<Box<dyn MasterPty + Send>>,
    writer: Mutex<Box<dyn Write + Send>>,
    killer: Mutex<Box<dyn ChildKiller + Send + Sync>>,
    pid: Option<u32>,
}

impl ProcessControl for PtyControl {
    fn write(&self, data: &[u8]) -> Result<()> {
        let mut writer = lock_mutex_recover(&self.writer);
        writer
            .write_all(data)
            .map_err(|e| RelayError::Pty(format!("Failed to write to PTY: {}", e)))?;
        writer
            .flush()
            .map_err(|e| RelayError::Pty(format!("Failed to flush PTY: {}", e)))
    }

    fn resize(&self, size: TerminalSize) -> Result<()> {
        lock_mutex_recover(&self.master)
            .resize(size.into())
            .map_err(|e| RelayError::Pty(format!("Failed to resize PTY: {}", e)))
    }

    fn kill(&self) -> Result<()> {
        lock_mutex_recover(&self.killer)
            .kill()
            .map_err(|e| RelayError::Pty(format!("Failed to kill process: {}", e)))
    }

    fn pid(&self) -> Option<u32> {
        self.pid
    }
}
