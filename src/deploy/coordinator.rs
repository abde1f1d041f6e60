//! The one-click deployment pipeline.

use std::path::Path;
use std::sync::Arc;

use super::context::DeploymentContext;
use super::progress::ProgressSink;
use super::step::{run_step, StepResult};
use crate::asset::{AssetFetcher, HttpAssetClient};
use crate::cert::{
    copy_ssl_certificates, overlay_lightnode_certificates, CertificateIssuer,
    HttpCertificateClient,
};
use crate::config::LauncherConfig;
use crate::console::{ConsoleDeployer, FiscoConsoleDeployer};
use crate::error::{AppError, Result};
use crate::lightnode::{promote_and_cleanup, run_build, start_lightnode, stop_lightnode};

/// Receives the node pid parsed from `start.sh`.
pub type PidCallback = Arc<dyn Fn(u32) + Send + Sync>;

/// External services the pipeline delegates to.
#[derive(Clone)]
pub struct Collaborators {
    pub certificates: Arc<dyn CertificateIssuer>,
    pub assets: Arc<dyn AssetFetcher>,
    pub console: Arc<dyn ConsoleDeployer>,
}

impl Collaborators {
    /// HTTP-backed collaborators talking to `ctx.api_base_url`.
    pub fn http(config: &LauncherConfig, ctx: &DeploymentContext) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| AppError::network(format!("Failed to create HTTP client: {}", e)))?;
        let certificates: Arc<dyn CertificateIssuer> = Arc::new(
            HttpCertificateClient::with_client(&ctx.api_base_url, client.clone()),
        );
        let console = FiscoConsoleDeployer::from_config(
            config,
            &ctx.output_dir,
            Arc::clone(&certificates),
        )?;

        Ok(Self {
            certificates,
            assets: Arc::new(HttpAssetClient::with_client(&ctx.api_base_url, client)),
            console: Arc::new(console),
        })
    }
}

/// Whether a failed stage aborts the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Criticality {
    Fatal,
    BestEffort,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    Certificate,
    BuildScript,
    Binaries,
    Build,
    Promote,
    CertificateOverlay,
    ChainAssets,
    NodeStart,
    Console,
}

#[derive(Debug, Clone, Copy)]
pub struct Stage {
    pub kind: StageKind,
    pub label: &'static str,
    pub failure_prefix: &'static str,
    pub criticality: Criticality,
}

const fn fatal(kind: StageKind, label: &'static str, failure_prefix: &'static str) -> Stage {
    Stage {
        kind,
        label,
        failure_prefix,
        criticality: Criticality::Fatal,
    }
}

pub const STAGES: [Stage; 9] = [
    fatal(
        StageKind::Certificate,
        "[1/9] 正在申请和下载证书...",
        "证书部署失败",
    ),
    fatal(
        StageKind::BuildScript,
        "[2/9] 正在下载 build_chain.sh...",
        "脚本下载失败",
    ),
    fatal(
        StageKind::Binaries,
        "[3/9] 正在下载二进制文件...",
        "二进制下载失败",
    ),
    fatal(
        StageKind::Build,
        "[4/9] 正在使用脚本构建轻节点...",
        "构建失败",
    ),
    fatal(
        StageKind::Promote,
        "[5/9] 正在调整目录结构...",
        "目录调整失败",
    ),
    fatal(
        StageKind::CertificateOverlay,
        "[6/9] 正在覆盖轻节点证书...",
        "证书覆盖失败",
    ),
    fatal(
        StageKind::ChainAssets,
        "[7/9] 正在覆盖 config.genesis 与 nodes.json...",
        "链配置下载失败",
    ),
    fatal(
        StageKind::NodeStart,
        "[8/9] 正在启动轻节点...",
        "节点启动失败",
    ),
    Stage {
        kind: StageKind::Console,
        label: "[9/9] 正在部署控制台...",
        failure_prefix: "控制台部署失败",
        criticality: Criticality::BestEffort,
    },
];

pub const DEPLOY_SUCCESS_MESSAGE: &str = "一键部署成功完成！";

/// Runs [`STAGES`] in order against one [`DeploymentContext`].
pub struct DeployCoordinator {
    collaborators: Collaborators,
    progress: Arc<dyn ProgressSink>,
    on_pid: Option<PidCallback>,
}

impl DeployCoordinator {
    pub fn new(collaborators: Collaborators, progress: Arc<dyn ProgressSink>) -> Self {
        Self {
            collaborators,
            progress,
            on_pid: None,
        }
    }

    pub fn on_pid(mut self, callback: PidCallback) -> Self {
        self.on_pid = Some(callback);
        self
    }

    /// Run every stage. The first fatal failure ends the run with
    /// `"<stage prefix>: <reason>"`; best-effort failures only warn.
    pub async fn execute_deployment(&self, ctx: &DeploymentContext) -> StepResult {
        log::info!(
            "Deploying light node {} into {:?}",
            ctx.node_id,
            ctx.output_dir
        );

        for stage in &STAGES {
            let result = run_step(self.progress.as_ref(), stage.label, || {
                self.run_stage(stage.kind, ctx)
            })
            .await;

            if result.success() {
                self.progress
                    .report(&format!("[SUCCESS] {}", result.message()));
                continue;
            }

            let failure = format!("{}: {}", stage.failure_prefix, result.message());
            match stage.criticality {
                Criticality::Fatal => {
                    log::error!("Deployment aborted: {}", failure);
                    return StepResult::failed(failure);
                }
                Criticality::BestEffort => {
                    log::warn!("{}", failure);
                    self.progress.report(&format!("[WARN] {}", failure));
                }
            }
        }

        StepResult::ok(DEPLOY_SUCCESS_MESSAGE)
    }

    async fn run_stage(&self, kind: StageKind, ctx: &DeploymentContext) -> StepResult {
        let layout = ctx.layout();
        let result = match kind {
            StageKind::Certificate => self.issue_certificates(ctx).await,
            StageKind::BuildScript => {
                self.collaborators
                    .assets
                    .fetch_build_script(&ctx.output_dir)
                    .await
            }
            StageKind::Binaries => self.collaborators.assets.fetch_binaries(&ctx.output_dir).await,
            StageKind::Build => run_build(&ctx.output_dir, &ctx.build).await,
            StageKind::Promote => {
                let output_dir = ctx.output_dir.clone();
                tokio::task::spawn_blocking(move || promote_and_cleanup(&output_dir))
                    .await
                    .unwrap_or_else(|e| Err(AppError::other(e.to_string())))
            }
            StageKind::CertificateOverlay => {
                overlay_lightnode_certificates(&layout.conf_dir(), &layout.lightnode_conf_dir())
            }
            StageKind::ChainAssets => self.fetch_chain_assets(&layout.lightnode_dir()).await,
            StageKind::NodeStart => self.start_node(&layout.lightnode_dir()).await,
            StageKind::Console => self.deploy_console(ctx).await,
        };
        result.into()
    }

    async fn issue_certificates(&self, ctx: &DeploymentContext) -> Result<String> {
        let issued = self
            .collaborators
            .certificates
            .issue_node_certificate(&ctx.output_dir, &ctx.node_id)
            .await?;
        let aliases = copy_ssl_certificates(&ctx.output_dir)?;
        Ok(format!("{issued} {aliases}"))
    }

    async fn fetch_chain_assets(&self, lightnode_dir: &Path) -> Result<String> {
        let assets = &self.collaborators.assets;
        let genesis = assets.fetch_genesis(lightnode_dir).await?;
        let nodes = assets.fetch_nodes_list(lightnode_dir).await?;
        Ok(format!("{genesis}; {nodes}"))
    }

    async fn start_node(&self, lightnode_dir: &Path) -> Result<String> {
        let outcome = start_lightnode(lightnode_dir).await?;
        if let Some(callback) = &self.on_pid {
            callback(outcome.pid);
        }
        Ok(format!(
            "节点启动脚本已执行，解析到 PID: {}。",
            outcome.pid
        ))
    }

    /// Runs on its own task so a panic inside the console deployer is
    /// reported like any other failure.
    async fn deploy_console(&self, ctx: &DeploymentContext) -> Result<String> {
        let console = Arc::clone(&self.collaborators.console);
        let api_base_url = ctx.api_base_url.clone();
        let node_id = ctx.node_id.clone();

        tokio::spawn(async move { console.deploy_console(&api_base_url, &node_id).await })
            .await
            .unwrap_or_else(|e| Err(AppError::console(format!("控制台部署任务异常终止: {}", e))))
    }

    pub async fn start_lightnode(&self, lightnode_dir: &Path) -> StepResult {
        self.start_node(lightnode_dir).await.into()
    }

    pub async fn stop_lightnode(&self, lightnode_dir: &Path) -> StepResult {
        stop_lightnode(lightnode_dir).await.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_the_console_stage_is_best_effort() {
        let best_effort: Vec<StageKind> = STAGES
            .iter()
            .filter(|stage| stage.criticality == Criticality::BestEffort)
            .map(|stage| stage.kind)
            .collect();
        assert_eq!(best_effort, vec![StageKind::Console]);
        assert_eq!(STAGES.last().map(|s| s.kind), Some(StageKind::Console));
    }

    #[test]
    fn labels_are_numbered_in_order() {
        for (i, stage) in STAGES.iter().enumerate() {
            assert!(stage.label.starts_with(&format!("[{}/9]", i + 1)));
        }
    }
}
