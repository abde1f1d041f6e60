//! Starting and stopping a promoted light node through its scripts.

use std::path::Path;
use std::process::{Output, Stdio};
use std::time::Duration;

use tokio::process::Command;

use super::fsutil::ensure_executable;
use crate::error::{AppError, Result};

pub const START_TIMEOUT: Duration = Duration::from_secs(30);
pub const STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// What `start.sh` reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartOutcome {
    pub pid: u32,
    pub stdout: String,
    pub stderr: String,
}

/// Find the first `pid` token followed by `=` or whitespace and a number,
/// e.g. `launched pid=4821` or `pid  77`.
pub fn parse_pid(output: &str) -> Option<u32> {
    let mut rest = output;
    while let Some(pos) = rest.find("pid") {
        let after = &rest[pos + 3..];
        let digits_at = after
            .find(|c: char| c != '=' && !c.is_whitespace())
            .unwrap_or(after.len());
        if digits_at > 0 {
            let digits: String = after[digits_at..]
                .chars()
                .take_while(char::is_ascii_digit)
                .collect();
            if let Ok(pid) = digits.parse() {
                return Some(pid);
            }
        }
        rest = after;
    }
    None
}

async fn run_script(dir: &Path, script: &Path, timeout: Duration) -> Option<Result<Output>> {
    ensure_executable(script);
    let child = Command::new("bash")
        .arg(script)
        .current_dir(dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output();

    match tokio::time::timeout(timeout, child).await {
        Ok(result) => Some(result.map_err(|e| AppError::process(e.to_string()))),
        Err(_) => None,
    }
}

fn exit_code(output: &Output) -> i32 {
    output.status.code().unwrap_or(-1)
}

/// Run `lightnode/start.sh`, waiting at most [`START_TIMEOUT`], and pull the
/// node pid out of its combined output.
pub async fn start_lightnode(lightnode_dir: &Path) -> Result<StartOutcome> {
    let script = lightnode_dir.join("start.sh");
    if !script.exists() {
        return Err(AppError::io(format!("未找到启动脚本: {}", script.display())));
    }

    let output = run_script(lightnode_dir, &script, START_TIMEOUT)
        .await
        .ok_or_else(|| AppError::timeout("启动脚本执行超时。"))??;

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
    if !stdout.trim().is_empty() {
        log::info!("[start.sh stdout] {}", stdout.trim_end());
    }
    if !stderr.trim().is_empty() {
        log::warn!("[start.sh stderr] {}", stderr.trim_end());
    }

    if !output.status.success() {
        return Err(AppError::process(format!(
            "启动脚本执行失败，退出码: {}",
            exit_code(&output)
        )));
    }

    let pid = parse_pid(&format!("{stdout}\n{stderr}"))
        .ok_or_else(|| AppError::process("无法从启动脚本输出中解析出 PID。"))?;

    log::info!("Light node started from {:?} (pid: {})", lightnode_dir, pid);
    Ok(StartOutcome {
        pid,
        stdout,
        stderr,
    })
}

/// Run `lightnode/stop.sh`, waiting at most [`STOP_TIMEOUT`]. A non-zero exit
/// is logged and the node is still considered stopped.
pub async fn stop_lightnode(lightnode_dir: &Path) -> Result<String> {
    let script = lightnode_dir.join("stop.sh");
    if !script.exists() {
        return Err(AppError::io(format!("未找到停止脚本: {}", script.display())));
    }

    let output = run_script(lightnode_dir, &script, STOP_TIMEOUT)
        .await
        .ok_or_else(|| AppError::timeout("停止脚本执行超时。"))??;

    let stdout = String::from_utf8_lossy(&output.stdout);
    if !stdout.trim().is_empty() {
        log::info!("[stop.sh stdout] {}", stdout.trim_end());
    }
    if !output.status.success() {
        log::warn!("停止脚本执行返回非零退出码: {}", exit_code(&output));
    }

    Ok("节点已停止。".to_string())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn parses_pid_tokens() {
        assert_eq!(parse_pid("launched pid=4821"), Some(4821));
        assert_eq!(parse_pid("node started, pid 77\n"), Some(77));
        assert_eq!(parse_pid("rapid start\npid==\t12"), Some(12));
        assert_eq!(parse_pid("pidfile written, pid=9"), Some(9));
        assert_eq!(parse_pid("pid:12"), None);
        assert_eq!(parse_pid("PID=12"), None);
        assert_eq!(parse_pid("no token here"), None);
    }

    #[tokio::test]
    async fn start_reports_pid_from_stdout() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("start.sh"), "echo 'launched pid=4821'\n").unwrap();

        let outcome = start_lightnode(dir.path()).await.unwrap();
        assert_eq!(outcome.pid, 4821);
        assert!(outcome.stdout.contains("launched"));
    }

    #[tokio::test]
    async fn start_without_pid_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("start.sh"), "echo started\n").unwrap();

        let err = start_lightnode(dir.path()).await.unwrap_err();
        assert_eq!(err.to_string(), "无法从启动脚本输出中解析出 PID。");
    }

    #[tokio::test]
    async fn start_failure_reports_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("start.sh"), "echo pid=1\nexit 4\n").unwrap();

        let err = start_lightnode(dir.path()).await.unwrap_err();
        assert_eq!(err.to_string(), "启动脚本执行失败，退出码: 4");
    }

    #[tokio::test]
    async fn missing_scripts_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        assert!(start_lightnode(dir.path())
            .await
            .unwrap_err()
            .to_string()
            .starts_with("未找到启动脚本"));
        assert!(stop_lightnode(dir.path())
            .await
            .unwrap_err()
            .to_string()
            .starts_with("未找到停止脚本"));
    }

    #[tokio::test]
    async fn stop_tolerates_non_zero_exit() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("stop.sh"), "echo 'not running'\nexit 1\n").unwrap();

        assert_eq!(stop_lightnode(dir.path()).await.unwrap(), "节点已停止。");
    }
}
