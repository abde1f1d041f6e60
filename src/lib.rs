mod archive;
pub mod asset;
pub mod cert;
pub mod config;
pub mod console;
pub mod deploy;
pub mod download;
mod error;
pub mod lightnode;
pub mod paths;
mod platform;
pub mod process;
pub mod session;

pub use config::{load_config, with_config_mut, LauncherConfig};
pub use deploy::{Collaborators, DeployCoordinator, DeploymentContext, StepResult};
pub use error::{AppError, ErrorKind, Result};
pub use session::{deploy_node, node_status, start_node, stop_node, NodeStatus};
