//! Proxying an interactive console over a text channel.
//!
//! A [`ConsoleSession`] owns one console process and one peer channel. The
//! output loop is the only reader of the process and the only owner of the
//! readiness flag; the input loop is the only writer. The command injected
//! on readiness is queued to the input loop rather than written directly.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{IDLE_SLEEP, READ_POLL, READY_COMMAND, READY_MARKER};
use crate::error::Result;

/// One poll of the console output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    Data(String),
    Timeout,
    Eof,
    Error(String),
}

#[async_trait]
pub trait ConsoleOutput: Send {
    /// Wait at most `timeout` for the next chunk.
    async fn read_chunk(&mut self, timeout: Duration) -> ReadOutcome;
}

#[async_trait]
pub trait ConsoleInput: Send {
    async fn write(&mut self, data: &str) -> Result<()>;
}

pub trait ConsoleChild: Send {
    /// Kill the process if it is still running.
    fn terminate(&mut self);
}

/// A spawned console split into its reader, writer and process handle.
pub struct ConsoleProcess {
    pub output: Box<dyn ConsoleOutput>,
    pub input: Box<dyn ConsoleInput>,
    pub child: Box<dyn ConsoleChild>,
}

/// Starts console processes, one per session.
pub trait ConsoleSpawner: Send + Sync {
    fn spawn(&self) -> Result<ConsoleProcess>;
}

/// Outgoing half of the peer channel.
#[async_trait]
pub trait ChannelSender: Send {
    async fn send_text(&mut self, text: String) -> Result<()>;
    async fn close(&mut self);
}

/// Incoming half of the peer channel. `None` once the peer is gone.
#[async_trait]
pub trait ChannelReceiver: Send {
    async fn recv_text(&mut self) -> Option<String>;
}

/// Finds the ready prompt, even when it straddles chunk boundaries.
#[derive(Debug, Default)]
pub struct ReadyDetector {
    tail: String,
    detected: bool,
}

impl ReadyDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn detected(&self) -> bool {
        self.detected
    }

    /// Feed a chunk; returns `true` only for the chunk that completes the
    /// first occurrence of the marker.
    pub fn observe(&mut self, chunk: &str) -> bool {
        if self.detected {
            return false;
        }
        self.tail.push_str(chunk);
        if self.tail.contains(READY_MARKER) {
            self.detected = true;
            self.tail.clear();
            return true;
        }

        let keep = READY_MARKER.len() - 1;
        if self.tail.len() > keep {
            let mut cut = self.tail.len() - keep;
            while !self.tail.is_char_boundary(cut) {
                cut += 1;
            }
            self.tail.drain(..cut);
        }
        false
    }
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// The console closed its output.
    ProcessExited,
    /// The peer went away.
    PeerClosed,
    /// Reading the console failed; the peer was told.
    ReadFailed(String),
    /// Writing to the console failed.
    WriteFailed(String),
}

/// One console process bound to one peer channel.
pub struct ConsoleSession<S, R> {
    process: ConsoleProcess,
    sender: S,
    receiver: R,
}

impl<S, R> ConsoleSession<S, R>
where
    S: ChannelSender,
    R: ChannelReceiver,
{
    pub fn new(process: ConsoleProcess, sender: S, receiver: R) -> Self {
        Self {
            process,
            sender,
            receiver,
        }
    }

    /// Pump both directions until either side closes, then kill the console.
    pub async fn run(self) -> SessionEnd {
        let ConsoleProcess {
            output,
            input,
            mut child,
        } = self.process;
        let (inject_tx, inject_rx) = mpsc::unbounded_channel();

        let end = tokio::select! {
            end = forward_output(output, self.sender, inject_tx) => end,
            end = forward_input(input, self.receiver, inject_rx) => end,
        };

        child.terminate();
        log::info!("Console session ended: {:?}", end);
        end
    }
}

async fn forward_output<S: ChannelSender>(
    mut output: Box<dyn ConsoleOutput>,
    mut sender: S,
    inject_tx: mpsc::UnboundedSender<String>,
) -> SessionEnd {
    let mut ready = ReadyDetector::new();

    loop {
        match output.read_chunk(READ_POLL).await {
            ReadOutcome::Data(chunk) => {
                if chunk.is_empty() {
                    continue;
                }
                let became_ready = ready.observe(&chunk);
                if let Err(e) = sender.send_text(chunk).await {
                    log::debug!("Peer send failed: {}", e);
                    return SessionEnd::PeerClosed;
                }
                if became_ready {
                    log::info!("Console ready, sending {:?}", READY_COMMAND);
                    let _ = inject_tx.send(READY_COMMAND.to_string());
                }
            }
            ReadOutcome::Timeout => tokio::time::sleep(IDLE_SLEEP).await,
            ReadOutcome::Eof => {
                sender.close().await;
                return SessionEnd::ProcessExited;
            }
            ReadOutcome::Error(e) => {
                log::warn!("Console read failed: {}", e);
                let _ = sender.send_text(format!("\r\n[ERROR] {}\r\n", e)).await;
                sender.close().await;
                return SessionEnd::ReadFailed(e);
            }
        }
    }
}

async fn forward_input<R: ChannelReceiver>(
    mut input: Box<dyn ConsoleInput>,
    mut receiver: R,
    mut inject_rx: mpsc::UnboundedReceiver<String>,
) -> SessionEnd {
    loop {
        let data = tokio::select! {
            Some(command) = inject_rx.recv() => command,
            message = receiver.recv_text() => match message {
                Some(text) => text,
                None => return SessionEnd::PeerClosed,
            },
        };
        if let Err(e) = input.write(&data).await {
            log::warn!("Console write failed: {}", e);
            return SessionEnd::WriteFailed(e.to_string());
        }
    }
}
