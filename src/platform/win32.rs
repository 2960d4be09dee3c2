//! Windows process control via the Win32 console API

use std::os::windows::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use windows::core::HSTRING;
use windows::Win32::Storage::FileSystem::GetShortPathNameW;
use windows::Win32::System::Console::{
    AttachConsole, FreeConsole, GenerateConsoleCtrlEvent, SetConsoleCtrlHandler,
};

use super::ConsoleEvent;
use crate::error::{Error, Result};

const CREATE_NO_WINDOW: u32 = 0x0800_0000;

pub(super) fn send_interrupt(pid: u32, helper: Option<&Path>) -> Result<()> {
    let Some(helper) = helper else {
        tracing::debug!("No console helper configured, not interrupting {}", pid);
        return Ok(());
    };

    let mut command = Command::new(helper);
    command
        .args(["console-ctrl", &pid.to_string(), &(ConsoleEvent::CtrlC as u32).to_string()])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .creation_flags(CREATE_NO_WINDOW);

    command.spawn().map(|_| ()).map_err(|e| {
        Error::Interrupt(format!(
            "Failed to start console helper {}: {}",
            helper.display(),
            e
        ))
    })
}

pub(super) fn kill_process_tree(pid: u32) -> Result<()> {
    let status = Command::new("taskkill")
        .args(["/F", "/PID", &pid.to_string(), "/T"])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .creation_flags(CREATE_NO_WINDOW)
        .status()
        .map_err(|e| Error::Interrupt(format!("taskkill failed to start: {}", e)))?;

    // 128: process not found, it already exited
    match status.code() {
        Some(0) | Some(128) => Ok(()),
        code => Err(Error::Interrupt(format!("taskkill exited with {:?}", code))),
    }
}

pub(super) fn raise_console_event(pid: u32, event: ConsoleEvent) -> Result<()> {
    unsafe {
        // Leave our own console so we can join the target's
        let _ = FreeConsole();
        AttachConsole(pid)
            .map_err(|e| Error::Interrupt(format!("AttachConsole({}) failed: {}", pid, e)))?;
        // Ignore the event ourselves, we share the console now
        SetConsoleCtrlHandler(None, true)
            .map_err(|e| Error::Interrupt(format!("SetConsoleCtrlHandler failed: {}", e)))?;
        GenerateConsoleCtrlEvent(event as u32, 0)
            .map_err(|e| Error::Interrupt(format!("GenerateConsoleCtrlEvent failed: {}", e)))?;
    }
    Ok(())
}

pub(super) fn configure_child(command: &mut Command) {
    command.creation_flags(CREATE_NO_WINDOW);
}

pub(super) fn short_path(path: &Path) -> Result<PathBuf> {
    // Bare names like "adb" are resolved through PATH later
    if !path.exists() {
        return Ok(path.to_path_buf());
    }
    let long = HSTRING::from(path.as_os_str());
    let mut buffer = vec![0u16; 4096];
    let len = unsafe { GetShortPathNameW(&long, Some(&mut buffer)) } as usize;
    if len == 0 || len > buffer.len() {
        return Err(Error::Io(std::io::Error::last_os_error()));
    }
    Ok(PathBuf::from(String::from_utf16_lossy(&buffer[..len])))
}
