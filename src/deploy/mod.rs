//! One-click light node deployment.

mod context;
mod coordinator;
mod progress;
mod step;

pub use context::{generate_node_id, DeploymentContext};
pub use coordinator::{
    Collaborators, Criticality, DeployCoordinator, PidCallback, Stage, StageKind,
    DEPLOY_SUCCESS_MESSAGE, STAGES,
};
pub use progress::{ChannelProgress, ProgressSink};
pub use step::{run_step, StepResult};
