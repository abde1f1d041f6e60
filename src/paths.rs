//! Centralized path utilities for the application.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{AppError, Result};

pub const BUILD_SCRIPT: &str = "build_chain.sh";
pub const BCOS_BINARY: &str = "fisco-bcos";
pub const LIGHTNODE_BINARY: &str = "fisco-bcos-lightnode";
pub const LIGHTNODE_DIR: &str = "lightnode";
pub const NODES_DIR: &str = "nodes";
pub const SDK_DIR: &str = "sdk";

/// Get the root data directory for the application (~/.lightnode_launcher).
pub fn get_data_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| AppError::config("Cannot find home directory"))?;
    Ok(home.join(".lightnode_launcher"))
}

/// Get the path to the config file.
pub fn config_path() -> Result<PathBuf> {
    Ok(get_data_dir()?.join("config.toml"))
}

/// Ensure the data directory exists.
pub fn ensure_data_dirs() -> Result<()> {
    let base = get_data_dir()?;
    fs::create_dir_all(&base).map_err(|e| AppError::io(e.to_string()))
}

/// Default node output directory when the config leaves it empty.
pub fn default_node_dir() -> Result<PathBuf> {
    Ok(get_data_dir()?.join("node"))
}

/// Default console directory, a sibling of the node directory.
pub fn default_console_dir() -> Result<PathBuf> {
    Ok(get_data_dir()?.join("console"))
}

/// Paths inside a deployment output directory.
#[derive(Debug, Clone)]
pub struct NodeLayout {
    root: PathBuf,
}

impl NodeLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `conf/` holding the issued node.key / node.crt / ca.crt.
    pub fn conf_dir(&self) -> PathBuf {
        self.root.join("conf")
    }

    pub fn build_script(&self) -> PathBuf {
        self.root.join(BUILD_SCRIPT)
    }

    pub fn bcos_binary(&self) -> PathBuf {
        self.root.join("bin").join(BCOS_BINARY)
    }

    pub fn lightnode_binary(&self) -> PathBuf {
        self.root.join(LIGHTNODE_BINARY)
    }

    /// Scaffolding produced by the build tool; removed after promotion.
    pub fn nodes_dir(&self) -> PathBuf {
        self.root.join(NODES_DIR)
    }

    pub fn lightnode_dir(&self) -> PathBuf {
        self.root.join(LIGHTNODE_DIR)
    }

    pub fn lightnode_conf_dir(&self) -> PathBuf {
        self.lightnode_dir().join("conf")
    }

    pub fn sdk_dir(&self) -> PathBuf {
        self.lightnode_dir().join(SDK_DIR)
    }

    /// Node id file written by the build tool.
    pub fn node_id_file(&self) -> PathBuf {
        self.lightnode_conf_dir().join("node.nodeid")
    }
}

/// Paths inside the console installation.
#[derive(Debug, Clone)]
pub struct ConsoleLayout {
    root: PathBuf,
}

impl ConsoleLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn conf_dir(&self) -> PathBuf {
        self.root.join("conf")
    }

    pub fn config_example(&self) -> PathBuf {
        self.conf_dir().join("config-example.toml")
    }

    pub fn config(&self) -> PathBuf {
        self.conf_dir().join("config.toml")
    }

    pub fn start_script(&self) -> PathBuf {
        self.root.join("start.sh")
    }
}
