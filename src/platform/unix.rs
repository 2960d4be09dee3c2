//! Unix process control via `nix`

use nix::sys::signal::{kill, killpg, Signal};
use nix::unistd::Pid;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::Command;

use super::ConsoleEvent;
use crate::error::{Error, Result};

pub(super) fn send_interrupt(pid: u32, _helper: Option<&Path>) -> Result<()> {
    kill(Pid::from_raw(pid as i32), Signal::SIGINT)
        .map_err(|e| Error::Interrupt(format!("SIGINT to {} failed: {}", pid, e)))
}

pub(super) fn kill_process_tree(pid: u32) -> Result<()> {
    // Children are spawned as process group leaders, see `configure_child`
    match killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        Ok(()) => Ok(()),
        Err(nix::errno::Errno::ESRCH) => Ok(()),
        Err(e) => Err(Error::Interrupt(format!(
            "SIGKILL to process group {} failed: {}",
            pid, e
        ))),
    }
}

pub(super) fn raise_console_event(_pid: u32, _event: ConsoleEvent) -> Result<()> {
    Err(Error::Unsupported(
        "console control events only exist on Windows".into(),
    ))
}

pub(super) fn configure_child(command: &mut Command) {
    command.process_group(0);
}

pub(super) fn short_path(path: &Path) -> Result<PathBuf> {
    Ok(path.to_path_buf())
}
