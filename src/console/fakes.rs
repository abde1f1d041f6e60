//! In-memory console processes and peers for bridge tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use super::bridge::{
    ChannelReceiver, ChannelSender, ConsoleChild, ConsoleInput, ConsoleOutput, ConsoleProcess,
    ReadOutcome,
};
use crate::error::{AppError, Result};

const WAIT: Duration = Duration::from_secs(5);

struct FakeOutput {
    rx: UnboundedReceiver<ReadOutcome>,
}

#[async_trait]
impl ConsoleOutput for FakeOutput {
    async fn read_chunk(&mut self, timeout: Duration) -> ReadOutcome {
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Some(outcome)) => outcome,
            Ok(None) => ReadOutcome::Eof,
            Err(_) => ReadOutcome::Timeout,
        }
    }
}

struct FakeInput {
    writes: Arc<Mutex<Vec<String>>>,
    notify: UnboundedSender<String>,
}

#[async_trait]
impl ConsoleInput for FakeInput {
    async fn write(&mut self, data: &str) -> Result<()> {
        self.writes.lock().unwrap().push(data.to_string());
        let _ = self.notify.send(data.to_string());
        Ok(())
    }
}

struct FakeChild {
    terminated: Arc<AtomicBool>,
}

impl ConsoleChild for FakeChild {
    fn terminate(&mut self) {
        self.terminated.store(true, Ordering::SeqCst);
    }
}

/// Test-side handle of a fake console.
pub(crate) struct FakeConsole {
    events: UnboundedSender<ReadOutcome>,
    writes: Arc<Mutex<Vec<String>>>,
    write_rx: tokio::sync::Mutex<UnboundedReceiver<String>>,
    terminated: Arc<AtomicBool>,
}

impl FakeConsole {
    pub fn emit(&self, text: &str) {
        let _ = self.events.send(ReadOutcome::Data(text.to_string()));
    }

    pub fn fail(&self, error: &str) {
        let _ = self.events.send(ReadOutcome::Error(error.to_string()));
    }

    pub fn finish(&self) {
        let _ = self.events.send(ReadOutcome::Eof);
    }

    pub async fn next_write(&self) -> String {
        let mut rx = self.write_rx.lock().await;
        tokio::time::timeout(WAIT, rx.recv())
            .await
            .expect("no write within timeout")
            .expect("input closed")
    }

    pub fn writes(&self) -> Vec<String> {
        self.writes.lock().unwrap().clone()
    }

    pub fn terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }
}

pub(crate) fn fake_console() -> (ConsoleProcess, FakeConsole) {
    let (events, rx) = unbounded_channel();
    let (notify, write_rx) = unbounded_channel();
    let writes = Arc::new(Mutex::new(Vec::new()));
    let terminated = Arc::new(AtomicBool::new(false));

    let process = ConsoleProcess {
        output: Box::new(FakeOutput { rx }),
        input: Box::new(FakeInput {
            writes: Arc::clone(&writes),
            notify,
        }),
        child: Box::new(FakeChild {
            terminated: Arc::clone(&terminated),
        }),
    };
    let handle = FakeConsole {
        events,
        writes,
        write_rx: tokio::sync::Mutex::new(write_rx),
        terminated,
    };
    (process, handle)
}

pub(crate) struct FakeSender {
    tx: UnboundedSender<String>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl ChannelSender for FakeSender {
    async fn send_text(&mut self, text: String) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(AppError::console("channel closed"));
        }
        self.tx
            .send(text)
            .map_err(|_| AppError::console("peer gone"))
    }

    async fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

pub(crate) struct FakeReceiver {
    rx: UnboundedReceiver<String>,
}

#[async_trait]
impl ChannelReceiver for FakeReceiver {
    async fn recv_text(&mut self) -> Option<String> {
        self.rx.recv().await
    }
}

/// Test-side handle of the remote peer.
pub(crate) struct FakePeer {
    to_console: UnboundedSender<String>,
    from_console: UnboundedReceiver<String>,
    closed: Arc<AtomicBool>,
}

impl FakePeer {
    pub fn send(&self, text: &str) {
        let _ = self.to_console.send(text.to_string());
    }

    pub fn disconnect(self) {}

    /// Everything the console has sent so far, concatenated.
    pub fn received(&mut self) -> String {
        let mut text = String::new();
        while let Ok(chunk) = self.from_console.try_recv() {
            text.push_str(&chunk);
        }
        text
    }

    pub fn closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

pub(crate) fn fake_peer() -> (FakeSender, FakeReceiver, FakePeer) {
    let (out_tx, out_rx) = unbounded_channel();
    let (in_tx, in_rx) = unbounded_channel();
    let closed = Arc::new(AtomicBool::new(false));
    (
        FakeSender {
            tx: out_tx,
            closed: Arc::clone(&closed),
        },
        FakeReceiver { rx: in_rx },
        FakePeer {
            to_console: in_tx,
            from_console: out_rx,
            closed,
        },
    )
}
