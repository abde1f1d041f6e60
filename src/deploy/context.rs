use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{AppError, Result};
use crate::lightnode::BuildOptions;
use crate::paths::NodeLayout;

/// Inputs of one deployment run.
#[derive(Debug, Clone)]
pub struct DeploymentContext {
    pub api_base_url: String,
    pub output_dir: PathBuf,
    pub node_id: String,
    pub build: BuildOptions,
}

impl DeploymentContext {
    /// Relative output directories are resolved against the working directory.
    /// The node id is a fresh random hex string.
    pub fn new(api_base_url: impl Into<String>, output_dir: impl AsRef<Path>) -> Result<Self> {
        let output_dir = output_dir.as_ref();
        let output_dir = if output_dir.is_absolute() {
            output_dir.to_path_buf()
        } else {
            std::env::current_dir()
                .map_err(|e| AppError::io(e.to_string()))?
                .join(output_dir)
        };

        Ok(Self {
            api_base_url: api_base_url.into(),
            output_dir,
            node_id: generate_node_id(),
            build: BuildOptions::default(),
        })
    }

    pub fn with_node_id(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = node_id.into();
        self
    }

    pub fn with_build_options(mut self, build: BuildOptions) -> Self {
        self.build = build;
        self
    }

    pub fn layout(&self) -> NodeLayout {
        NodeLayout::new(&self.output_dir)
    }

    /// The output directory must be absent or empty before a deployment.
    pub fn ensure_output_empty(&self) -> Result<()> {
        if !self.output_dir.exists() {
            return Ok(());
        }
        let mut entries =
            fs::read_dir(&self.output_dir).map_err(|e| AppError::io(e.to_string()))?;
        if entries.next().is_some() {
            return Err(AppError::io("部署失败：目标目录不为空。"));
        }
        Ok(())
    }
}

pub fn generate_node_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}
