use std::fs;
use std::io::Read as _;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use super::payload::{download_link, is_binary_payload, parse_nodes_list};
use super::AssetFetcher;
use crate::archive::{extract_binary_from_tar_gz, is_gzip};
use crate::download::{download_file, fetch, normalize_text_response};
use crate::error::{AppError, Result};
use crate::lightnode::fsutil::ensure_executable;
use crate::paths::{NodeLayout, BCOS_BINARY, BUILD_SCRIPT};
use crate::platform::platform_param;

const TEXT_TIMEOUT: Duration = Duration::from_secs(30);
const EXECUTIONS_TIMEOUT: Duration = Duration::from_secs(60);
const BINARY_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(180);

/// Staging file for a downloaded binary or release archive.
const STAGING_FILE: &str = ".fisco-bcos.download";

/// Asset fetcher backed by the `{base}/lightnode/...` endpoints.
pub struct HttpAssetClient {
    base_url: String,
    client: Client,
    os: &'static str,
}

impl HttpAssetClient {
    pub fn new(api_base_url: &str) -> Self {
        Self::with_client(api_base_url, Client::new())
    }

    pub fn with_client(api_base_url: &str, client: Client) -> Self {
        Self {
            base_url: api_base_url.trim_end_matches('/').to_string(),
            client,
            os: std::env::consts::OS,
        }
    }

    /// Override the operating system used to pick the executions endpoint.
    pub fn with_os(mut self, os: &'static str) -> Self {
        self.os = os;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/lightnode/{}", self.base_url, path)
    }

    async fn fetch_text(&self, path: &str) -> Result<String> {
        let body = fetch(&self.client, &self.url(path), TEXT_TIMEOUT).await?;
        Ok(normalize_text_response(&body))
    }

    /// Put the binary (or the release archive holding it) at `staging`.
    async fn stage_binary(&self, platform: &str, staging: &Path) -> Result<()> {
        let endpoint = self.url(&format!("executions/{platform}"));
        let body = fetch(&self.client, &endpoint, EXECUTIONS_TIMEOUT).await?;

        if is_binary_payload(&body) {
            if body.bytes.is_empty() {
                return Err(AppError::network("执行文件内容为空"));
            }
            return fs::write(staging, &body.bytes)
                .map_err(|e| AppError::io(format!("保存二进制失败: {}", e)));
        }

        let link = download_link(&body).ok_or_else(|| AppError::network("执行文件下载链接为空"))?;
        log::info!("Downloading fisco-bcos from {}", link);
        let written = download_file(&self.client, &link, staging, BINARY_DOWNLOAD_TIMEOUT).await?;
        if written == 0 {
            return Err(AppError::network("执行文件内容为空"));
        }
        Ok(())
    }
}

fn staged_is_gzip(staging: &Path) -> Result<bool> {
    let mut magic = [0u8; 2];
    let mut file = fs::File::open(staging)?;
    let read = file.read(&mut magic)?;
    Ok(is_gzip(&magic[..read]))
}

/// Install the staged payload as both binaries.
fn install_binaries(staging: &Path, layout: &NodeLayout) -> Result<()> {
    let bcos = layout.bcos_binary();
    if let Some(parent) = bcos.parent() {
        fs::create_dir_all(parent)?;
    }

    if staged_is_gzip(staging)? {
        extract_binary_from_tar_gz(staging, BCOS_BINARY, &bcos)?;
        let _ = fs::remove_file(staging);
    } else {
        fs::rename(staging, &bcos)
            .map_err(|e| AppError::io(format!("保存二进制失败: {}", e)))?;
    }

    let lightnode = layout.lightnode_binary();
    fs::copy(&bcos, &lightnode).map_err(|e| AppError::io(format!("保存二进制失败: {}", e)))?;
    ensure_executable(&bcos);
    ensure_executable(&lightnode);
    Ok(())
}

#[async_trait]
impl AssetFetcher for HttpAssetClient {
    async fn fetch_build_script(&self, output_dir: &Path) -> Result<String> {
        fs::create_dir_all(output_dir)?;
        let script = self.fetch_text(BUILD_SCRIPT).await?;

        let path = output_dir.join(BUILD_SCRIPT);
        fs::write(&path, script)
            .map_err(|e| AppError::io(format!("保存 build_chain.sh 失败: {}", e)))?;
        ensure_executable(&path);
        Ok(format!(
            "build_chain.sh 已保存到 {} 并授予可执行权限",
            path.display()
        ))
    }

    async fn fetch_binaries(&self, output_dir: &Path) -> Result<String> {
        let platform = platform_param(self.os)?;

        fs::create_dir_all(output_dir)?;
        let staging = output_dir.join(STAGING_FILE);
        let result = match self.stage_binary(platform, &staging).await {
            Ok(()) => install_binaries(&staging, &NodeLayout::new(output_dir)),
            Err(e) => Err(e),
        };
        if staging.exists() {
            let _ = fs::remove_file(&staging);
        }
        result?;

        Ok("二进制文件已下载并设置可执行权限".to_string())
    }

    async fn fetch_genesis(&self, lightnode_dir: &Path) -> Result<String> {
        let genesis = self.fetch_text("genesis").await?;
        fs::create_dir_all(lightnode_dir)?;
        fs::write(lightnode_dir.join("config.genesis"), genesis)
            .map_err(|e| AppError::io(format!("保存 config.genesis 失败: {}", e)))?;
        Ok(format!(
            "config.genesis 已保存到 {}",
            lightnode_dir.display()
        ))
    }

    async fn fetch_nodes_list(&self, lightnode_dir: &Path) -> Result<String> {
        let body = fetch(&self.client, &self.url("nodes"), TEXT_TIMEOUT).await?;
        let nodes = parse_nodes_list(&body)?;

        fs::create_dir_all(lightnode_dir)?;
        let content = serde_json::to_string_pretty(&serde_json::json!({ "nodes": nodes }))?;
        fs::write(lightnode_dir.join("nodes.json"), content)
            .map_err(|e| AppError::io(format!("保存 nodes.json 失败: {}", e)))?;
        Ok(format!("nodes.json 已保存到 {}", lightnode_dir.display()))
    }
}
