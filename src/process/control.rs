//! Signal-based process control.

use std::time::{Duration, Instant};

use super::GRACEFUL_SHUTDOWN_TIMEOUT;
use crate::error::{AppError, Result};

/// Check if a process is alive by PID. PID 0 is never considered alive.
#[cfg(unix)]
pub fn is_process_alive(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    raw > 0 && kill(Pid::from_raw(raw), None).is_ok()
}

#[cfg(not(unix))]
pub fn is_process_alive(_pid: u32) -> bool {
    false
}

/// Send a graceful shutdown signal to a process.
#[cfg(unix)]
fn graceful_signal(pid: u32) -> Result<()> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    kill(Pid::from_raw(pid as i32), Signal::SIGTERM)
        .map_err(|e| AppError::process(format!("Failed to send SIGTERM to PID {}: {}", pid, e)))
}

#[cfg(not(unix))]
fn graceful_signal(pid: u32) -> Result<()> {
    Err(AppError::platform(format!(
        "Cannot signal PID {} on this platform",
        pid
    )))
}

#[cfg(unix)]
fn force_kill(pid: u32) -> Result<()> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    kill(Pid::from_raw(pid as i32), Signal::SIGKILL)
        .map_err(|e| AppError::process(format!("Failed to kill process {}: {}", pid, e)))
}

#[cfg(not(unix))]
fn force_kill(pid: u32) -> Result<()> {
    Err(AppError::platform(format!(
        "Cannot kill PID {} on this platform",
        pid
    )))
}

/// Send SIGTERM, wait up to the timeout for the process to exit, then force
/// kill it. Blocking. Returns whether the process is gone.
pub fn graceful_shutdown(pid: u32) -> bool {
    if !is_process_alive(pid) {
        return true;
    }

    if let Err(e) = graceful_signal(pid) {
        log::warn!("Graceful signal failed for PID {pid}: {e}, will force kill immediately");
    } else {
        let deadline = Instant::now() + GRACEFUL_SHUTDOWN_TIMEOUT;
        while Instant::now() < deadline {
            if !is_process_alive(pid) {
                return true;
            }
            std::thread::sleep(Duration::from_millis(200));
        }
        log::warn!(
            "PID {pid} did not exit within {}s, force killing",
            GRACEFUL_SHUTDOWN_TIMEOUT.as_secs()
        );
    }

    if let Err(e) = force_kill(pid) {
        log::error!("Failed to force kill PID {pid}: {e}");
    }
    std::thread::sleep(Duration::from_millis(100));
    !is_process_alive(pid)
}
