//! FISCO console setup and the interactive PTY/WebSocket bridge.

mod bridge;
mod deploy;
mod pty;
mod ws;

#[cfg(test)]
pub(crate) mod fakes;

use std::time::Duration;

pub use bridge::{
    ChannelReceiver, ChannelSender, ConsoleChild, ConsoleInput, ConsoleOutput, ConsoleProcess,
    ConsoleSession, ConsoleSpawner, ReadOutcome, ReadyDetector, SessionEnd,
};
pub use deploy::{run_console_command_once, ConsoleDeployer, FiscoConsoleDeployer};
pub use pty::{spawn_console, PtySpawner};
pub use ws::{serve, serve_listener};

/// Prompt printed by the console once it accepts commands.
pub const READY_MARKER: &str = "[group0]: /apps>";
/// Sent to the console the first time [`READY_MARKER`] shows up in a session.
pub const READY_COMMAND: &str = "getBlockNumber\n";

pub const PTY_ROWS: u16 = 100;
pub const PTY_COLS: u16 = 500;
/// Largest chunk read from the console at once.
pub const READ_CHUNK_SIZE: usize = 1024;
pub const READ_POLL: Duration = Duration::from_millis(100);
pub const IDLE_SLEEP: Duration = Duration::from_millis(10);
