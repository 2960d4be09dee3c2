//! adb subprocess supervision

use crate::error::{Error, Result};
use crate::platform;

use std::path::Path;
use std::process::{Child, ChildStdout, Command, ExitStatus, Stdio};

/// One running `adb shell` recording process
pub struct Session {
    child: Child,
    stdout: Option<ChildStdout>,
}

impl Session {
    /// Spawn `<adb> -s <serial> shell <command>`
    ///
    /// stdin and stderr are discarded; stdout carries the raw stream.
    pub fn spawn(adb_path: &Path, serial: &str, command: &str) -> Result<Self> {
        let mut cmd = Command::new(adb_path);
        cmd.arg("-s")
            .arg(serial)
            .arg("shell")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());
        platform::configure_child(&mut cmd);

        let mut child = cmd.spawn().map_err(|source| Error::Spawn {
            program: adb_path.display().to_string(),
            source,
        })?;
        let stdout = child.stdout.take();

        tracing::info!("Started recording session on {} (pid {})", serial, child.id());

        Ok(Self { child, stdout })
    }

    /// Hand the output stream to the reader; `None` after the first call
    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.stdout.take()
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// Whether the process has not exited yet
    pub fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Send the Ctrl-C equivalent
    pub fn interrupt(&self, helper: Option<&Path>) -> Result<()> {
        platform::send_interrupt(self.pid(), helper)
    }

    /// Kill the process and everything it started
    pub fn kill_tree(&mut self) -> Result<()> {
        let tree = platform::kill_process_tree(self.pid());
        // Covers the case where the group kill was refused
        if let Err(e) = self.child.kill() {
            if e.kind() != std::io::ErrorKind::InvalidInput {
                tracing::debug!("kill({}) failed: {}", self.pid(), e);
            }
        }
        tree
    }

    /// Wait for the process to exit
    pub fn reap(&mut self) -> Result<ExitStatus> {
        // Drop our end of the pipe first so a blocked writer cannot hold us up
        self.stdout = None;
        let status = self.child.wait()?;
        tracing::debug!("Recording session {} exited: {}", self.pid(), status);
        Ok(status)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").field("pid", &self.child.id()).finish()
    }
}

/// Run `<adb> connect <serial>` and log what it prints
///
/// The result is not interpreted; a failed connect shows up later as a
/// session that produces no output.
pub fn connect(adb_path: &Path, serial: &str) -> Result<()> {
    let mut cmd = Command::new(adb_path);
    cmd.arg("connect").arg(serial).stdin(Stdio::null());
    platform::configure_child(&mut cmd);

    let output = cmd.output().map_err(|source| Error::Spawn {
        program: adb_path.display().to_string(),
        source,
    })?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stdout.trim().is_empty() {
        tracing::info!("adb connect {}: {}", serial, stdout.trim());
    }
    if !stderr.trim().is_empty() {
        tracing::warn!("adb connect {}: {}", serial, stderr.trim());
    }
    if !output.status.success() {
        tracing::warn!("adb connect {} exited with {}", serial, output.status);
    }
    Ok(())
}
