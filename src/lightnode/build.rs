//! Running `build_chain.sh` and promoting its output tree.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;

use super::fsutil::{
    copy_dir_recursive, ensure_executable, find_dir_named, move_dir_with,
    remove_dir_best_effort, RenameFn,
};
use crate::error::{AppError, Result};
use crate::paths::{NodeLayout, LIGHTNODE_BINARY, LIGHTNODE_DIR, SDK_DIR};

/// Port and topology arguments handed to the build tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOptions {
    /// `-p`: P2P and RPC base ports.
    pub ports: String,
    /// `-l`: `ip:count` node topology.
    pub topology: String,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            ports: crate::config::DEFAULT_PORTS.to_string(),
            topology: crate::config::DEFAULT_TOPOLOGY.to_string(),
        }
    }
}

/// Pick stderr, or stdout when stderr is empty.
pub(crate) fn failure_output(stdout: &[u8], stderr: &[u8]) -> String {
    let stderr = String::from_utf8_lossy(stderr);
    let stderr = stderr.trim();
    if stderr.is_empty() {
        String::from_utf8_lossy(stdout).trim().to_string()
    } else {
        stderr.to_string()
    }
}

fn locate_lightnode(nodes_root: &Path) -> Option<PathBuf> {
    let direct = nodes_root.join(LIGHTNODE_DIR);
    if direct.is_dir() {
        return Some(direct);
    }
    find_dir_named(nodes_root, LIGHTNODE_DIR)
}

/// Run `bash build_chain.sh -p <ports> -l <topology> -e ./bin/fisco-bcos -L ./fisco-bcos-lightnode`
/// inside `output_dir` and check that a `lightnode` directory came out of it.
///
/// The build has no timeout.
pub async fn run_build(output_dir: &Path, options: &BuildOptions) -> Result<String> {
    let layout = NodeLayout::new(output_dir);
    let script = layout.build_script();
    if !script.exists() {
        return Err(AppError::io(format!("构建脚本不存在: {}", script.display())));
    }
    let bcos = layout.bcos_binary();
    if !bcos.exists() {
        return Err(AppError::io(format!(
            "缺少 fisco-bcos 可执行文件: {}",
            bcos.display()
        )));
    }
    let lightnode_bin = layout.lightnode_binary();
    if !lightnode_bin.exists() {
        return Err(AppError::io(format!(
            "缺少 fisco-bcos-lightnode 可执行文件: {}",
            lightnode_bin.display()
        )));
    }

    for path in [&script, &bcos, &lightnode_bin] {
        ensure_executable(path);
    }

    log::info!(
        "Running build_chain.sh in {:?} (ports {}, topology {})",
        output_dir,
        options.ports,
        options.topology
    );
    let output = Command::new("bash")
        .arg("build_chain.sh")
        .args(["-p", &options.ports, "-l", &options.topology])
        .args(["-e", "./bin/fisco-bcos", "-L", "./fisco-bcos-lightnode"])
        .current_dir(output_dir)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| AppError::process(format!("执行构建失败: {}", e)))?;

    if !output.status.success() {
        return Err(AppError::process(format!(
            "构建失败: {}",
            failure_output(&output.stdout, &output.stderr)
        )));
    }

    let nodes_root = layout.nodes_dir();
    if locate_lightnode(&nodes_root).is_none() {
        return Err(AppError::io("构建完成但未找到 nodes 内的 lightnode 目录"));
    }

    Ok("轻节点构建完成".to_string())
}

/// Move `nodes/**/lightnode` to `lightnode`, bring along any `sdk` directory,
/// and delete the `nodes` scaffolding.
///
/// Blocking; callers on the async runtime should go through `spawn_blocking`.
pub fn promote_and_cleanup(output_dir: &Path) -> Result<String> {
    promote_with(output_dir, |from, to| std::fs::rename(from, to))
}

fn promote_with(output_dir: &Path, rename: RenameFn) -> Result<String> {
    let layout = NodeLayout::new(output_dir);
    let nodes_root = layout.nodes_dir();
    if !nodes_root.is_dir() {
        return Err(AppError::io(format!(
            "未找到 nodes 目录: {}",
            nodes_root.display()
        )));
    }

    let src_lightnode = locate_lightnode(&nodes_root)
        .ok_or_else(|| AppError::io("未在 nodes 下找到 lightnode 目录"))?;

    let dst_lightnode = layout.lightnode_dir();
    remove_dir_best_effort(&dst_lightnode);
    move_dir_with(&src_lightnode, &dst_lightnode, rename)
        .map_err(|e| AppError::io(format!("目录提升失败: {}", e)))?;

    match find_dir_named(&nodes_root, SDK_DIR) {
        Some(sdk_src) => {
            let sdk_dst = layout.sdk_dir();
            remove_dir_best_effort(&sdk_dst);
            match copy_dir_recursive(&sdk_src, &sdk_dst) {
                Ok(()) => log::info!("SDK目录已拷贝: {:?} -> {:?}", sdk_src, sdk_dst),
                Err(e) => log::warn!("拷贝SDK目录失败: {}", e),
            }
        }
        None => log::info!("未找到SDK目录"),
    }

    for name in ["start.sh", "stop.sh", LIGHTNODE_BINARY] {
        let path = dst_lightnode.join(name);
        if path.exists() {
            ensure_executable(&path);
        }
    }

    remove_dir_best_effort(&nodes_root);
    Ok(format!("目录提升完成: {}", dst_lightnode.display()))
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    fn write_script(path: &Path, body: &str) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, body).unwrap();
    }

    fn prepare_binaries(root: &Path) {
        write_script(&root.join("bin/fisco-bcos"), "#!/bin/bash\n");
        write_script(&root.join("fisco-bcos-lightnode"), "#!/bin/bash\n");
    }

    #[tokio::test]
    async fn missing_script_is_reported_before_spawning() {
        let dir = tempfile::tempdir().unwrap();
        let err = run_build(dir.path(), &BuildOptions::default())
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("构建脚本不存在"));
    }

    #[tokio::test]
    async fn missing_binary_is_named() {
        let dir = tempfile::tempdir().unwrap();
        write_script(&dir.path().join("build_chain.sh"), "exit 0\n");
        write_script(&dir.path().join("bin/fisco-bcos"), "#!/bin/bash\n");

        let err = run_build(dir.path(), &BuildOptions::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("fisco-bcos-lightnode"));
    }

    #[tokio::test]
    async fn build_passes_arguments_and_finds_output() {
        let dir = tempfile::tempdir().unwrap();
        prepare_binaries(dir.path());
        write_script(
            &dir.path().join("build_chain.sh"),
            "mkdir -p nodes/lightnode\necho \"$@\" > nodes/lightnode/args.txt\n",
        );

        let message = run_build(dir.path(), &BuildOptions::default()).await.unwrap();
        assert_eq!(message, "轻节点构建完成");
        let args = fs::read_to_string(dir.path().join("nodes/lightnode/args.txt")).unwrap();
        assert_eq!(
            args.trim(),
            "-p 30300,20200 -l 127.0.0.1:4 -e ./bin/fisco-bcos -L ./fisco-bcos-lightnode"
        );
    }

    #[tokio::test]
    async fn build_accepts_nested_lightnode() {
        let dir = tempfile::tempdir().unwrap();
        prepare_binaries(dir.path());
        write_script(
            &dir.path().join("build_chain.sh"),
            "mkdir -p nodes/127.0.0.1/lightnode\n",
        );

        assert!(run_build(dir.path(), &BuildOptions::default()).await.is_ok());
    }

    #[tokio::test]
    async fn non_zero_exit_carries_stderr_then_stdout() {
        let dir = tempfile::tempdir().unwrap();
        prepare_binaries(dir.path());
        write_script(
            &dir.path().join("build_chain.sh"),
            "echo 'port 30300 in use' >&2\nexit 3\n",
        );
        let err = run_build(dir.path(), &BuildOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "构建失败: port 30300 in use");

        write_script(&dir.path().join("build_chain.sh"), "echo only-stdout\nexit 1\n");
        let err = run_build(dir.path(), &BuildOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "构建失败: only-stdout");
    }

    #[tokio::test]
    async fn successful_exit_without_output_dir_fails() {
        let dir = tempfile::tempdir().unwrap();
        prepare_binaries(dir.path());
        write_script(&dir.path().join("build_chain.sh"), "mkdir -p nodes/other\n");

        let err = run_build(dir.path(), &BuildOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "构建完成但未找到 nodes 内的 lightnode 目录");
    }

    #[test]
    fn promote_moves_tree_copies_sdk_and_removes_nodes() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write_script(&root.join("nodes/127.0.0.1/lightnode/start.sh"), "echo pid=1\n");
        write_script(&root.join("nodes/127.0.0.1/lightnode/conf/config.ini"), "[rpc]\n");
        write_script(&root.join("nodes/127.0.0.1/sdk/sdk.crt"), "CERT\n");
        // A stale destination is replaced, not merged.
        write_script(&root.join("lightnode/stale.txt"), "old\n");

        let message = promote_and_cleanup(root).unwrap();
        assert!(message.starts_with("目录提升完成"));
        assert!(!root.join("nodes").exists());
        assert!(root.join("lightnode/start.sh").exists());
        assert!(root.join("lightnode/conf/config.ini").exists());
        assert!(root.join("lightnode/sdk/sdk.crt").exists());
        assert!(!root.join("lightnode/stale.txt").exists());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt as _;
            let mode = fs::metadata(root.join("lightnode/start.sh"))
                .unwrap()
                .permissions()
                .mode();
            assert_ne!(mode & 0o111, 0);
        }
    }

    #[test]
    fn promote_by_copy_still_removes_nodes() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write_script(&root.join("nodes/127.0.0.1/lightnode/start.sh"), "echo pid=1\n");
        write_script(&root.join("nodes/127.0.0.1/sdk/sdk.crt"), "CERT\n");

        let message = promote_with(root, |_, _| {
            Err(std::io::Error::other("Invalid cross-device link"))
        })
        .unwrap();
        assert!(message.starts_with("目录提升完成"));
        assert!(!root.join("nodes").exists());
        assert!(root.join("lightnode/start.sh").exists());
        assert!(root.join("lightnode/sdk/sdk.crt").exists());
    }

    #[test]
    fn promote_without_nodes_fails_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let err = promote_and_cleanup(dir.path()).unwrap_err();
        assert!(err.to_string().starts_with("未找到 nodes 目录"));

        // Running it again after a successful promotion behaves the same.
        write_script(&dir.path().join("nodes/lightnode/start.sh"), "\n");
        promote_and_cleanup(dir.path()).unwrap();
        let err = promote_and_cleanup(dir.path()).unwrap_err();
        assert!(err.to_string().starts_with("未找到 nodes 目录"));
        assert!(dir.path().join("lightnode").exists());
    }

    #[test]
    fn promote_without_lightnode_subtree_fails() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("nodes/127.0.0.1/node0")).unwrap();
        let err = promote_and_cleanup(dir.path()).unwrap_err();
        assert_eq!(err.to_string(), "未在 nodes 下找到 lightnode 目录");
    }

    #[test]
    fn failure_output_prefers_stderr() {
        assert_eq!(failure_output(b"out\n", b"  err \n"), "err");
        assert_eq!(failure_output(b" out\n", b"\n"), "out");
    }
}
