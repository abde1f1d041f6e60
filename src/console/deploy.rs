//! Installing and configuring the FISCO console next to a deployed node.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::Instant;

use super::bridge::{ConsoleOutput, ConsoleProcess, ConsoleSpawner, ReadOutcome, ReadyDetector};
use super::pty::PtySpawner;
use super::{READ_POLL, READY_MARKER};
use crate::cert::CertificateIssuer;
use crate::config::{LauncherConfig, DEFAULT_RPC_PORT};
use crate::error::{AppError, Result};
use crate::paths::{ConsoleLayout, NodeLayout};

/// Contract call made once after the console is configured.
pub const POST_DEPLOY_COMMAND: &str = "call Counter increment";
const COMMAND_TIMEOUT: Duration = Duration::from_secs(60);
const QUIT_TIMEOUT: Duration = Duration::from_secs(10);

#[async_trait]
pub trait ConsoleDeployer: Send + Sync {
    async fn deploy_console(&self, api_base_url: &str, node_id: &str) -> Result<String>;
}

pub struct FiscoConsoleDeployer {
    console: ConsoleLayout,
    node: NodeLayout,
    download_script: PathBuf,
    console_version: String,
    rpc_port: u16,
    certificates: Arc<dyn CertificateIssuer>,
    spawner: Arc<dyn ConsoleSpawner>,
    post_deploy_command: Option<String>,
    command_timeout: Duration,
}

impl FiscoConsoleDeployer {
    pub fn new(
        console_dir: impl Into<PathBuf>,
        node_dir: impl Into<PathBuf>,
        certificates: Arc<dyn CertificateIssuer>,
    ) -> Self {
        let console = ConsoleLayout::new(console_dir);
        let download_script = console
            .root()
            .parent()
            .map(|p| p.join("download_console.sh"))
            .unwrap_or_else(|| PathBuf::from("download_console.sh"));
        let spawner = Arc::new(PtySpawner::new(console.start_script()));
        Self {
            console,
            node: NodeLayout::new(node_dir),
            download_script,
            console_version: "latest".to_string(),
            rpc_port: DEFAULT_RPC_PORT,
            certificates,
            spawner,
            post_deploy_command: Some(POST_DEPLOY_COMMAND.to_string()),
            command_timeout: COMMAND_TIMEOUT,
        }
    }

    pub fn from_config(
        config: &LauncherConfig,
        node_dir: &Path,
        certificates: Arc<dyn CertificateIssuer>,
    ) -> Result<Self> {
        Ok(Self::new(config.console_dir()?, node_dir, certificates)
            .with_download_script(config.console_download_script()?)
            .with_console_version(&config.console_version)
            .with_rpc_port(config.rpc_port))
    }

    pub fn with_download_script(mut self, script: impl Into<PathBuf>) -> Self {
        self.download_script = script.into();
        self
    }

    pub fn with_console_version(mut self, version: &str) -> Self {
        self.console_version = version.to_string();
        self
    }

    pub fn with_rpc_port(mut self, port: u16) -> Self {
        self.rpc_port = port;
        self
    }

    pub fn with_spawner(mut self, spawner: Arc<dyn ConsoleSpawner>) -> Self {
        self.spawner = spawner;
        self
    }

    /// `None` skips the post-deploy console call.
    pub fn with_post_deploy_command(mut self, command: Option<&str>) -> Self {
        self.post_deploy_command = command.map(str::to_string);
        self
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    async fn download_if_missing(&self) -> Result<()> {
        let console_dir = self.console.root();
        if console_dir.exists() {
            log::info!("Console already present at {:?}, skipping download", console_dir);
            return Ok(());
        }
        if !self.download_script.exists() {
            return Err(AppError::console(format!(
                "下载脚本不存在: {}",
                self.download_script.display()
            )));
        }

        let parent = console_dir
            .parent()
            .ok_or_else(|| AppError::console("控制台目录没有上级目录"))?;
        fs::create_dir_all(parent)?;

        let mut cmd = Command::new("bash");
        cmd.arg(&self.download_script).current_dir(parent);
        if self.console_version != "latest" {
            cmd.args(["-c", self.console_version.as_str()]);
        }
        log::info!("Downloading console into {:?}", parent);

        let output = cmd
            .output()
            .await
            .map_err(|e| AppError::console(format!("下载控制台时发生未知错误: {}", e)))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AppError::console(format!(
                "下载控制台失败: {}",
                stderr.trim()
            )));
        }
        Ok(())
    }

    fn write_config(&self) -> Result<()> {
        let config = self.console.config();
        if config.exists() {
            log::info!("Console config already exists");
        } else {
            fs::copy(self.console.config_example(), &config).map_err(|e| {
                AppError::console(format!("拷贝控制台配置文件失败: {}", e))
            })?;
        }

        if self.rpc_port != DEFAULT_RPC_PORT {
            let content = fs::read_to_string(&config)?;
            let updated = content.replace(
                &format!("\"127.0.0.1:{}\"", DEFAULT_RPC_PORT),
                &format!("\"127.0.0.1:{}\"", self.rpc_port),
            );
            fs::write(&config, updated)?;
            log::info!("Console RPC port set to {}", self.rpc_port);
        }
        Ok(())
    }

    fn copy_sdk_files(&self) -> Result<usize> {
        let sdk_dir = self.node.sdk_dir();
        if !sdk_dir.is_dir() {
            return Err(AppError::console(format!(
                "节点SDK目录不存在: {}",
                sdk_dir.display()
            )));
        }
        let conf_dir = self.console.conf_dir();
        fs::create_dir_all(&conf_dir)?;

        let mut copied = 0;
        for entry in fs::read_dir(&sdk_dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                fs::copy(entry.path(), conf_dir.join(entry.file_name()))?;
                copied += 1;
            }
        }
        Ok(copied)
    }

    async fn run_post_deploy_command(&self, command: &str) {
        let process = match self.spawner.spawn() {
            Ok(process) => process,
            Err(e) => {
                log::error!("Failed to start console for {:?}: {}", command, e);
                return;
            }
        };
        log::info!("Running console command once: {}", command);
        match run_console_command_once(process, command, self.command_timeout).await {
            Ok(output) if output.trim().is_empty() => {
                log::info!("Console command finished without output")
            }
            Ok(output) => log::info!("Console command output:\n{}", output),
            Err(e) => log::error!("Console command {:?} failed: {}", command, e),
        }
    }
}

#[async_trait]
impl ConsoleDeployer for FiscoConsoleDeployer {
    async fn deploy_console(&self, api_base_url: &str, node_id: &str) -> Result<String> {
        self.download_if_missing().await?;
        if !self.console.root().is_dir() {
            return Err(AppError::console(format!(
                "控制台目录不存在: {}",
                self.console.root().display()
            )));
        }

        self.write_config()?;
        let copied = self.copy_sdk_files()?;
        log::info!("Copied {} SDK files into console conf", copied);

        if api_base_url.is_empty() || node_id.is_empty() {
            log::info!("No API URL or node id, keeping the node SDK certificates");
        } else {
            let message = self
                .certificates
                .issue_console_sdk_certificate(&self.console.conf_dir(), node_id)
                .await
                .map_err(|e| {
                    AppError::certificate(format!("控制台SDK证书重新签发失败: {}", e))
                })?;
            log::info!("{}", message);
        }

        if let Some(command) = &self.post_deploy_command {
            self.run_post_deploy_command(command).await;
        }

        Ok("控制台部署完成".to_string())
    }
}

/// Wait for the prompt, returning everything printed before it.
async fn wait_for_prompt(output: &mut dyn ConsoleOutput, timeout: Duration) -> Result<String> {
    let deadline = Instant::now() + timeout;
    let mut ready = ReadyDetector::new();
    let mut collected = String::new();

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(AppError::timeout("等待控制台提示符超时"));
        }
        match output.read_chunk(remaining.min(READ_POLL)).await {
            ReadOutcome::Data(chunk) => {
                collected.push_str(&chunk);
                if ready.observe(&chunk) {
                    let before = collected
                        .rsplit_once(READY_MARKER)
                        .map_or(collected.as_str(), |(before, _)| before);
                    return Ok(before.to_string());
                }
            }
            ReadOutcome::Timeout => {}
            ReadOutcome::Eof => return Err(AppError::console("控制台已退出")),
            ReadOutcome::Error(e) => return Err(AppError::console(e)),
        }
    }
}

async fn wait_for_exit(output: &mut dyn ConsoleOutput, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return false;
        }
        match output.read_chunk(remaining.min(READ_POLL)).await {
            ReadOutcome::Eof | ReadOutcome::Error(_) => return true,
            ReadOutcome::Data(_) | ReadOutcome::Timeout => {}
        }
    }
}

/// Drive a freshly spawned console through one command: wait for the prompt,
/// send `command`, wait for the prompt again, then `quit`. The process is
/// always terminated before returning. Returns the command's output.
pub async fn run_console_command_once(
    process: ConsoleProcess,
    command: &str,
    timeout: Duration,
) -> Result<String> {
    let ConsoleProcess {
        mut output,
        mut input,
        mut child,
    } = process;

    let result = async {
        wait_for_prompt(output.as_mut(), timeout).await?;
        input.write(&format!("{}\n", command)).await?;
        let captured = wait_for_prompt(output.as_mut(), timeout).await?;

        input.write("quit\n").await?;
        if !wait_for_exit(output.as_mut(), QUIT_TIMEOUT).await {
            log::warn!("Console did not exit after quit, killing it");
        }
        Ok(captured)
    }
    .await;

    child.terminate();
    result
}
