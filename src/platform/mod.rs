//! Platform specific process control
//!
//! - interrupt delivery (`SIGINT` on Unix, console `CTRL_C_EVENT` on Windows)
//! - process tree termination
//! - short path normalization for the adb executable (Windows only)

#[cfg(unix)]
mod unix;
#[cfg(windows)]
mod win32;

#[cfg(unix)]
use self::unix as imp;
#[cfg(windows)]
use self::win32 as imp;

use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::OnceLock;

use crate::error::Result;

/// Console control events understood by the Windows helper
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ConsoleEvent {
    CtrlC = 0,
    CtrlBreak = 1,
}

impl ConsoleEvent {
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(ConsoleEvent::CtrlC),
            1 => Some(ConsoleEvent::CtrlBreak),
            _ => None,
        }
    }
}

/// Ask `pid` to stop the way a terminal Ctrl-C would
///
/// On Windows this spawns `helper console-ctrl <pid> 0`, because a process can
/// only raise console events for the console it is attached to. Without a
/// helper nothing is sent and teardown falls through to the tree kill.
pub fn send_interrupt(pid: u32, helper: Option<&Path>) -> Result<()> {
    imp::send_interrupt(pid, helper)
}

/// Kill `pid` together with everything it spawned
pub fn kill_process_tree(pid: u32) -> Result<()> {
    imp::kill_process_tree(pid)
}

/// Attach to the console of `pid` and raise `event` there (helper side)
pub fn raise_console_event(pid: u32, event: ConsoleEvent) -> Result<()> {
    imp::raise_console_event(pid, event)
}

/// Prepare a command so the spawned process can be signalled as a group
pub fn configure_child(command: &mut Command) {
    imp::configure_child(command)
}

/// Short (8.3) form of `path`, cached per input path
///
/// Identity on non-Windows platforms and whenever the lookup fails.
pub fn short_path(path: &Path) -> PathBuf {
    static CACHE: OnceLock<Mutex<HashMap<PathBuf, PathBuf>>> = OnceLock::new();

    let cache = CACHE.get_or_init(|| Mutex::new(HashMap::new()));
    if let Some(hit) = cache.lock().get(path) {
        return hit.clone();
    }

    let resolved = match imp::short_path(path) {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!("Short path lookup for {} failed: {}", path.display(), e);
            path.to_path_buf()
        }
    };
    cache.lock().insert(path.to_path_buf(), resolved.clone());
    resolved
}

/// Name of the binary that implements the `console-ctrl` subcommand
const HELPER_NAME: &str = "adbblitz";

/// Helper executable used for console interrupts when none is configured
///
/// Only an `adbblitz` binary installed next to the running program qualifies.
/// The running program itself is not assumed to understand `console-ctrl`.
pub fn default_console_helper() -> Option<PathBuf> {
    let exe = std::env::current_exe().ok()?;
    helper_beside(&exe)
}

fn helper_beside(exe: &Path) -> Option<PathBuf> {
    let candidate = exe
        .parent()?
        .join(format!("{}{}", HELPER_NAME, std::env::consts::EXE_SUFFIX));
    candidate.is_file().then_some(candidate)
}
