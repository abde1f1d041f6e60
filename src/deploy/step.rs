use std::future::Future;

use super::progress::ProgressSink;
use crate::error::Result;

/// Outcome of one deployment step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepResult {
    success: bool,
    message: String,
}

impl StepResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.success
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<Result<String>> for StepResult {
    fn from(result: Result<String>) -> Self {
        match result {
            Ok(message) => Self::ok(message),
            Err(e) => Self::failed(e.to_string()),
        }
    }
}

/// Report `name`, then run `f` and hand back its result untouched.
pub async fn run_step<F, Fut>(sink: &dyn ProgressSink, name: &str, f: F) -> StepResult
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = StepResult>,
{
    sink.report(name);
    f().await
}
