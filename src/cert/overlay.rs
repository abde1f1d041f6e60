use std::fs;
use std::path::Path;

use crate::error::{AppError, Result};
use crate::lightnode::fsutil::restrict_private_key;

/// Mirror `conf/node.key` and `conf/node.crt` under `output_dir` as
/// `ssl.key` and `ssl.crt`. Existing copies are left alone.
pub fn copy_ssl_certificates(output_dir: &Path) -> Result<String> {
    let conf_dir = output_dir.join("conf");
    let pairs = [("node.key", "ssl.key"), ("node.crt", "ssl.crt")];
    if pairs.iter().any(|(src, _)| !conf_dir.join(src).exists()) {
        return Err(AppError::certificate(
            "证书文件缺失：期望 conf/node.key 与 conf/node.crt 存在",
        ));
    }

    let mut copied = Vec::new();
    for (src, dst) in pairs {
        let dst_path = conf_dir.join(dst);
        if dst_path.exists() {
            continue;
        }
        fs::copy(conf_dir.join(src), &dst_path)
            .map_err(|e| AppError::io(format!("复制 ssl.key/ssl.crt 失败: {}", e)))?;
        if dst.ends_with(".key") {
            restrict_private_key(&dst_path);
        }
        copied.push(dst);
    }

    if copied.is_empty() {
        Ok("证书文件已存在，无需复制。".to_string())
    } else {
        Ok(format!("已生成 {} 以兼容网关证书命名。", copied.join(", ")))
    }
}

/// Copy `node.key`, `node.crt` and `ca.crt` from `source_conf` over the light
/// node's `ssl.key`, `ssl.crt` and `ca.crt` in `target_conf`.
pub fn overlay_lightnode_certificates(source_conf: &Path, target_conf: &Path) -> Result<String> {
    let pairs = [
        ("node.key", "ssl.key"),
        ("node.crt", "ssl.crt"),
        ("ca.crt", "ca.crt"),
    ];
    if pairs.iter().any(|(src, _)| !source_conf.join(src).exists()) {
        return Err(AppError::certificate(
            "源证书缺失：期望存在 node.key/node.crt/ca.crt",
        ));
    }

    fs::create_dir_all(target_conf)
        .map_err(|e| AppError::io(format!("覆盖轻节点证书失败: {}", e)))?;

    for (src, dst) in pairs {
        let dst_path = target_conf.join(dst);
        fs::copy(source_conf.join(src), &dst_path)
            .map_err(|e| AppError::io(format!("覆盖轻节点证书失败: {}", e)))?;
        if dst.ends_with(".key") {
            restrict_private_key(&dst_path);
        }
    }

    Ok(format!("已覆盖轻节点证书到 {}", target_conf.display()))
}
