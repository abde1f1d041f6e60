//! Build script, binaries and chain configuration served by the API.

mod http;
mod payload;

use std::path::Path;

use async_trait::async_trait;

use crate::error::Result;

pub use http::HttpAssetClient;
pub use payload::parse_nodes_list;

/// Fetches deployment assets into the local tree.
#[async_trait]
pub trait AssetFetcher: Send + Sync {
    /// Save `build_chain.sh` into `output_dir` and mark it executable.
    async fn fetch_build_script(&self, output_dir: &Path) -> Result<String>;

    /// Save the platform binary as `bin/fisco-bcos` and `fisco-bcos-lightnode`.
    async fn fetch_binaries(&self, output_dir: &Path) -> Result<String>;

    /// Save `config.genesis` into `lightnode_dir`, overwriting.
    async fn fetch_genesis(&self, lightnode_dir: &Path) -> Result<String>;

    /// Save `nodes.json` into `lightnode_dir`, overwriting.
    async fn fetch_nodes_list(&self, lightnode_dir: &Path) -> Result<String>;
}
