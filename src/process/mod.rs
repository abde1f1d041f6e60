//! Process control for the node started by `start.sh`.

mod control;

use std::time::Duration;

pub use control::{graceful_shutdown, is_process_alive};

/// Timeout for graceful shutdown before force killing.
const GRACEFUL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);
