//! Node status and the start/stop/deploy operations backed by the persisted
//! `[session]` table.

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use serde::Serialize;

use crate::config::{load_config, with_config_mut, SessionState};
use crate::deploy::{Collaborators, DeployCoordinator, DeploymentContext, ProgressSink, StepResult};
use crate::error::{AppError, Result};
use crate::lightnode::{start_lightnode, stop_lightnode, StartOutcome};
use crate::paths::NodeLayout;
use crate::process::{graceful_shutdown, is_process_alive};

const NO_NODE_PLACEHOLDER: &str = "请先启动/部署节点";

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct NodeStatus {
    pub node_id: String,
    pub running: bool,
    pub pid: Option<u32>,
    pub block_height: i64,
    pub p2p_connection_count: u32,
}

/// Status of the tracked node. Chain metrics are not collected.
pub fn status_of(session: &SessionState, alive: impl Fn(u32) -> bool) -> NodeStatus {
    let pid = session.node_pid.filter(|&pid| alive(pid));
    NodeStatus {
        node_id: session
            .deployed_node_id
            .clone()
            .unwrap_or_else(|| NO_NODE_PLACEHOLDER.to_string()),
        running: pid.is_some(),
        pid,
        block_height: -1,
        p2p_connection_count: 0,
    }
}

/// Current status; a pid that no longer exists is dropped from the session.
pub fn node_status() -> Result<NodeStatus> {
    let config = load_config()?;
    let status = status_of(&config.session, is_process_alive);
    if config.session.node_pid.is_some() && !status.running {
        log::info!("Clearing stale node pid {:?}", config.session.node_pid);
        with_config_mut(|c| {
            c.session.node_pid = None;
            Ok(())
        })?;
    }
    Ok(status)
}

/// Id written by the build tool, falling back to the generated one.
fn resolve_node_id(layout: &NodeLayout, generated: &str) -> String {
    fs::read_to_string(layout.node_id_file())
        .ok()
        .and_then(|content| content.lines().next().map(|line| line.trim().to_string()))
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| generated.to_string())
}

fn record_deployment(session: &mut SessionState, node_id: String, pid: Option<u32>) {
    session.deployed_node_id = Some(node_id);
    if pid.is_some() {
        session.node_pid = pid;
    }
    session.last_deployed_at = Some(chrono::Utc::now().to_rfc3339());
}

async fn start_in(node_dir: &Path, tracked_pid: Option<u32>) -> Result<StartOutcome> {
    if tracked_pid.is_some_and(is_process_alive) {
        return Err(AppError::node_running());
    }
    start_lightnode(&NodeLayout::new(node_dir).lightnode_dir()).await
}

async fn stop_in(node_dir: &Path, tracked_pid: Option<u32>) -> Result<String> {
    let Some(pid) = tracked_pid.filter(|&pid| is_process_alive(pid)) else {
        return Err(AppError::node_not_running());
    };

    let message = stop_lightnode(&NodeLayout::new(node_dir).lightnode_dir()).await?;
    if is_process_alive(pid) {
        log::warn!("Node PID {} still alive after stop.sh, signalling it", pid);
        let gone = tokio::task::spawn_blocking(move || graceful_shutdown(pid))
            .await
            .map_err(|e| AppError::process(e.to_string()))?;
        if !gone {
            return Err(AppError::process(format!("无法停止节点进程 PID: {}", pid)));
        }
    }
    Ok(message)
}

/// Run `start.sh` of the deployed node unless the tracked pid is alive.
pub async fn start_node(node_dir: &Path) -> Result<String> {
    let config = load_config()?;
    let outcome = start_in(node_dir, config.session.node_pid).await?;
    with_config_mut(|c| {
        c.session.node_pid = Some(outcome.pid);
        Ok(())
    })?;
    Ok(format!("节点启动脚本已执行，解析到 PID: {}。", outcome.pid))
}

/// Run `stop.sh`, then signal the pid directly if it survived.
pub async fn stop_node(node_dir: &Path) -> Result<String> {
    let config = load_config()?;
    let result = stop_in(node_dir, config.session.node_pid).await;
    let stale = config.session.node_pid.is_some_and(|pid| !is_process_alive(pid));
    if result.is_ok() || stale {
        with_config_mut(|c| {
            c.session.node_pid = None;
            Ok(())
        })?;
    }
    result
}

/// Deploy into an empty `ctx.output_dir` and remember the node on success.
pub async fn deploy_node(
    ctx: &DeploymentContext,
    collaborators: Collaborators,
    progress: Arc<dyn ProgressSink>,
) -> Result<StepResult> {
    ctx.ensure_output_empty()?;
    progress.report(&format!("开始部署节点, ID: {}", ctx.node_id));

    let started_pid = Arc::new(AtomicU32::new(0));
    let pid_slot = Arc::clone(&started_pid);
    let coordinator = DeployCoordinator::new(collaborators, progress)
        .on_pid(Arc::new(move |pid| pid_slot.store(pid, Ordering::SeqCst)));

    let result = coordinator.execute_deployment(ctx).await;
    if result.success() {
        let node_id = resolve_node_id(&ctx.layout(), &ctx.node_id);
        let pid = Some(started_pid.load(Ordering::SeqCst)).filter(|&pid| pid != 0);
        if let Err(e) = with_config_mut(|c| {
            record_deployment(&mut c.session, node_id, pid);
            Ok(())
        }) {
            log::warn!("Failed to save session: {}", e);
        }
    }
    Ok(result)
}
