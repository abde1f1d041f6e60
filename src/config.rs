use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, OnceLock, RwLock};

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::lightnode::BuildOptions;
use crate::paths::{config_path, default_console_dir, default_node_dir, ensure_data_dirs};

pub const DEFAULT_API_BASE_URL: &str = "http://127.0.0.1:8000/v1";
pub const DEFAULT_PORTS: &str = "30300,20200";
pub const DEFAULT_TOPOLOGY: &str = "127.0.0.1:4";
pub const DEFAULT_RPC_PORT: u16 = 20200;
pub const DEFAULT_CONSOLE_LISTEN: &str = "127.0.0.1:1235";

static CONFIG_LOCK: Mutex<()> = Mutex::new(());
static CONFIG_CACHE: OnceLock<RwLock<Arc<LauncherConfig>>> = OnceLock::new();

fn load_config_from_disk() -> Result<LauncherConfig> {
    let path = config_path()?;
    if !path.exists() {
        let config = LauncherConfig::default();
        save_config_to_disk(&config)?;
        return Ok(config);
    }
    let content = fs::read_to_string(&path).map_err(|e| AppError::config(e.to_string()))?;
    toml::from_str(&content).map_err(|e| AppError::config(e.to_string()))
}

fn save_config_to_disk(config: &LauncherConfig) -> Result<()> {
    ensure_data_dirs()?;
    let content = toml::to_string_pretty(config).map_err(|e| AppError::config(e.to_string()))?;
    fs::write(config_path()?, content).map_err(|e| AppError::config(e.to_string()))
}

fn get_config_cache() -> Result<&'static RwLock<Arc<LauncherConfig>>> {
    if let Some(cache) = CONFIG_CACHE.get() {
        return Ok(cache);
    }

    let config = load_config_from_disk()?;
    let _ = CONFIG_CACHE.set(RwLock::new(Arc::new(config)));

    CONFIG_CACHE
        .get()
        .ok_or_else(|| AppError::config("CONFIG_CACHE not initialized"))
}

/// Execute a read-modify-write operation on the config file while holding a lock.
/// This prevents concurrent modifications from causing data loss.
pub fn with_config_mut<F, T>(f: F) -> Result<T>
where
    F: FnOnce(&mut LauncherConfig) -> Result<T>,
{
    let _guard = CONFIG_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let cache = get_config_cache()?;

    let current = {
        let config = cache.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&config)
    };

    let mut updated = (*current).clone();
    let result = f(&mut updated)?;
    save_config_to_disk(&updated)?;

    *cache.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(updated);

    Ok(result)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LauncherConfig {
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    /// Deployment output directory. Empty means `~/.lightnode_launcher/node`.
    #[serde(default)]
    pub node_dir: String,
    /// Console installation directory. Empty means `~/.lightnode_launcher/console`.
    #[serde(default)]
    pub console_dir: String,
    /// Script fetching the console when it is not installed yet.
    #[serde(default)]
    pub console_download_script: String,
    #[serde(default = "default_console_version")]
    pub console_version: String,
    #[serde(default = "default_ports")]
    pub ports: String,
    #[serde(default = "default_topology")]
    pub topology: String,
    #[serde(default = "default_rpc_port")]
    pub rpc_port: u16,
    #[serde(default = "default_console_listen")]
    pub console_listen: String,
    #[serde(default)]
    pub session: SessionState,
}

/// Last deployment and the node process it started.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SessionState {
    #[serde(default)]
    pub deployed_node_id: Option<String>,
    #[serde(default)]
    pub node_pid: Option<u32>,
    #[serde(default)]
    pub last_deployed_at: Option<String>,
}

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}

fn default_console_version() -> String {
    "latest".to_string()
}

fn default_ports() -> String {
    DEFAULT_PORTS.to_string()
}

fn default_topology() -> String {
    DEFAULT_TOPOLOGY.to_string()
}

fn default_rpc_port() -> u16 {
    DEFAULT_RPC_PORT
}

fn default_console_listen() -> String {
    DEFAULT_CONSOLE_LISTEN.to_string()
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            node_dir: String::new(),
            console_dir: String::new(),
            console_download_script: String::new(),
            console_version: default_console_version(),
            ports: default_ports(),
            topology: default_topology(),
            rpc_port: default_rpc_port(),
            console_listen: default_console_listen(),
            session: SessionState::default(),
        }
    }
}

impl LauncherConfig {
    pub fn node_dir(&self) -> Result<PathBuf> {
        if self.node_dir.is_empty() {
            default_node_dir()
        } else {
            Ok(PathBuf::from(&self.node_dir))
        }
    }

    pub fn console_dir(&self) -> Result<PathBuf> {
        if self.console_dir.is_empty() {
            default_console_dir()
        } else {
            Ok(PathBuf::from(&self.console_dir))
        }
    }

    /// `-p`/`-l` arguments for `build_chain.sh`.
    pub fn build_options(&self) -> BuildOptions {
        BuildOptions {
            ports: self.ports.clone(),
            topology: self.topology.clone(),
        }
    }

    /// Download script path; defaults to `download_console.sh` next to the console.
    pub fn console_download_script(&self) -> Result<PathBuf> {
        if self.console_download_script.is_empty() {
            let console_dir = self.console_dir()?;
            let parent = console_dir
                .parent()
                .ok_or_else(|| AppError::config("console_dir has no parent directory"))?;
            Ok(parent.join("download_console.sh"))
        } else {
            Ok(PathBuf::from(&self.console_download_script))
        }
    }
}

pub fn load_config() -> Result<Arc<LauncherConfig>> {
    let cache = get_config_cache()?;
    let config = cache.read().unwrap_or_else(|e| e.into_inner());
    Ok(Arc::clone(&config))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_build_defaults() {
        let config: LauncherConfig = toml::from_str("").unwrap();
        assert_eq!(config.ports, "30300,20200");
        assert_eq!(config.topology, "127.0.0.1:4");
        assert_eq!(config.rpc_port, 20200);
        assert_eq!(config.console_version, "latest");
        assert_eq!(config.session, SessionState::default());
    }

    #[test]
    fn build_options_follow_configured_ports_and_topology() {
        assert_eq!(LauncherConfig::default().build_options(), BuildOptions::default());

        let config: LauncherConfig =
            toml::from_str("ports = \"31300,21200\"\ntopology = \"127.0.0.1:2\"\n").unwrap();
        assert_eq!(
            config.build_options(),
            BuildOptions {
                ports: "31300,21200".to_string(),
                topology: "127.0.0.1:2".to_string(),
            }
        );
    }

    #[test]
    fn session_table_round_trips() {
        let mut config = LauncherConfig {
            node_dir: "/srv/node".to_string(),
            ..Default::default()
        };
        config.session.deployed_node_id = Some("abc".to_string());
        config.session.node_pid = Some(4821);

        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: LauncherConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.session.node_pid, Some(4821));
        assert_eq!(parsed.node_dir().unwrap(), PathBuf::from("/srv/node"));
    }

    #[test]
    fn download_script_defaults_next_to_console() {
        let config = LauncherConfig {
            console_dir: "/opt/fisco/console".to_string(),
            ..Default::default()
        };
        assert_eq!(
            config.console_download_script().unwrap(),
            PathBuf::from("/opt/fisco/download_console.sh")
        );
    }
}
