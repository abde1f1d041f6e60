//! Building, promoting and running the light node.

mod build;
pub(crate) mod fsutil;
mod lifecycle;

pub use build::{promote_and_cleanup, run_build, BuildOptions};
pub use lifecycle::{
    parse_pid, start_lightnode, stop_lightnode, StartOutcome, START_TIMEOUT, STOP_TIMEOUT,
};
