//! Running the console inside a pseudo terminal.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use portable_pty::{native_pty_system, CommandBuilder, MasterPty, PtySize};
use tokio::sync::mpsc;

use super::bridge::{
    ConsoleChild, ConsoleInput, ConsoleOutput, ConsoleProcess, ConsoleSpawner, ReadOutcome,
};
use super::{PTY_COLS, PTY_ROWS, READ_CHUNK_SIZE};
use crate::error::{AppError, Result};

enum PtyEvent {
    Bytes(Vec<u8>),
    Closed,
    Failed(String),
}

#[cfg(unix)]
fn is_pty_hangup(err: &std::io::Error) -> bool {
    // Linux reports EIO on the master once the slave side has no writers left.
    err.raw_os_error() == Some(nix::errno::Errno::EIO as i32)
}

#[cfg(not(unix))]
fn is_pty_hangup(_err: &std::io::Error) -> bool {
    false
}

fn pump_reader(mut reader: Box<dyn Read + Send>, tx: mpsc::UnboundedSender<PtyEvent>) {
    let mut buf = [0u8; READ_CHUNK_SIZE];
    loop {
        let event = match reader.read(&mut buf) {
            Ok(0) => PtyEvent::Closed,
            Ok(n) => PtyEvent::Bytes(buf[..n].to_vec()),
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) if is_pty_hangup(&e) => PtyEvent::Closed,
            Err(e) => PtyEvent::Failed(e.to_string()),
        };
        let last = !matches!(event, PtyEvent::Bytes(_));
        if tx.send(event).is_err() || last {
            break;
        }
    }
}

/// PTY output decoded as UTF-8, keeping split multi-byte sequences for the
/// next chunk.
struct PtyOutput {
    rx: mpsc::UnboundedReceiver<PtyEvent>,
    pending: Vec<u8>,
}

impl PtyOutput {
    fn decode(&mut self, bytes: Vec<u8>) -> String {
        self.pending.extend(bytes);
        match std::str::from_utf8(&self.pending) {
            Ok(text) => {
                let text = text.to_string();
                self.pending.clear();
                text
            }
            Err(e) if e.error_len().is_none() => {
                let rest = self.pending.split_off(e.valid_up_to());
                let text = String::from_utf8_lossy(&self.pending).into_owned();
                self.pending = rest;
                text
            }
            Err(_) => {
                let text = String::from_utf8_lossy(&self.pending).into_owned();
                self.pending.clear();
                text
            }
        }
    }
}

#[async_trait]
impl ConsoleOutput for PtyOutput {
    async fn read_chunk(&mut self, timeout: Duration) -> ReadOutcome {
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Err(_) => ReadOutcome::Timeout,
            Ok(Some(PtyEvent::Bytes(bytes))) => ReadOutcome::Data(self.decode(bytes)),
            Ok(Some(PtyEvent::Failed(e))) => ReadOutcome::Error(e),
            Ok(Some(PtyEvent::Closed)) | Ok(None) => ReadOutcome::Eof,
        }
    }
}

struct PtyInput {
    writer: Option<Box<dyn Write + Send>>,
}

#[async_trait]
impl ConsoleInput for PtyInput {
    async fn write(&mut self, data: &str) -> Result<()> {
        let mut writer = self
            .writer
            .take()
            .ok_or_else(|| AppError::console("控制台输入已关闭"))?;
        let bytes = data.as_bytes().to_vec();

        let (writer, result) = tokio::task::spawn_blocking(move || {
            let result = writer.write_all(&bytes).and_then(|()| writer.flush());
            (writer, result)
        })
        .await
        .map_err(|e| AppError::console(e.to_string()))?;

        self.writer = Some(writer);
        result.map_err(|e| AppError::console(format!("写入控制台失败: {}", e)))
    }
}

struct PtyChild {
    child: Box<dyn portable_pty::Child + Send + Sync>,
    // Dropping the master closes the terminal.
    _master: Box<dyn MasterPty + Send>,
}

impl ConsoleChild for PtyChild {
    fn terminate(&mut self) {
        if matches!(self.child.try_wait(), Ok(Some(_))) {
            return;
        }
        if let Err(e) = self.child.kill() {
            log::debug!("Failed to kill console process: {}", e);
        }
        let _ = self.child.try_wait();
    }
}

/// Spawn `stdbuf -i0 -o0 -e0 bash <start_script>` attached to a fresh PTY.
pub fn spawn_console(start_script: &Path) -> Result<ConsoleProcess> {
    if !start_script.exists() {
        return Err(AppError::console(format!(
            "控制台启动脚本不存在: {}",
            start_script.display()
        )));
    }

    let pair = native_pty_system()
        .openpty(PtySize {
            rows: PTY_ROWS,
            cols: PTY_COLS,
            pixel_width: 0,
            pixel_height: 0,
        })
        .map_err(|e| AppError::console(format!("创建伪终端失败: {}", e)))?;

    let mut cmd = CommandBuilder::new("stdbuf");
    cmd.args(["-i0", "-o0", "-e0", "bash"]);
    cmd.arg(start_script);
    if let Some(dir) = start_script.parent() {
        cmd.cwd(dir);
    }

    let child = pair
        .slave
        .spawn_command(cmd)
        .map_err(|e| AppError::console(format!("启动控制台失败: {}", e)))?;
    drop(pair.slave);

    let reader = pair
        .master
        .try_clone_reader()
        .map_err(|e| AppError::console(e.to_string()))?;
    let writer = pair
        .master
        .take_writer()
        .map_err(|e| AppError::console(e.to_string()))?;

    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::Builder::new()
        .name("console-pty-reader".to_string())
        .spawn(move || pump_reader(reader, tx))
        .map_err(|e| AppError::console(e.to_string()))?;

    log::info!("Console started from {:?}", start_script);
    Ok(ConsoleProcess {
        output: Box::new(PtyOutput {
            rx,
            pending: Vec::new(),
        }),
        input: Box::new(PtyInput {
            writer: Some(writer),
        }),
        child: Box::new(PtyChild {
            child,
            _master: pair.master,
        }),
    })
}

/// Spawns the console found at `<console_dir>/start.sh`.
pub struct PtySpawner {
    start_script: PathBuf,
}

impl PtySpawner {
    pub fn new(start_script: impl Into<PathBuf>) -> Self {
        Self {
            start_script: start_script.into(),
        }
    }
}

impl ConsoleSpawner for PtySpawner {
    fn spawn(&self) -> Result<ConsoleProcess> {
        spawn_console(&self.start_script)
    }
}
