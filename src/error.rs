//! Application error types.

use std::collections::HashMap;
use std::fmt;

/// Launcher error carrying a kind and a small key/value payload.
#[derive(Debug)]
pub struct AppError {
    payload: HashMap<String, String>,
    kind: ErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Configuration error
    Config,
    /// File system error
    Io,
    /// Network error
    Network,
    /// Subprocess error
    Process,
    /// Subprocess did not finish in time
    Timeout,
    /// Certificate issuance error
    Certificate,
    /// Operating system not supported
    Platform,
    /// Console setup or bridge error
    Console,
    /// Node is already running
    NodeRunning,
    /// Node is not running
    NodeNotRunning,
    /// General error
    Other,
}

impl ErrorKind {
    pub fn code(&self) -> u32 {
        match self {
            Self::NodeRunning => 1002,
            Self::NodeNotRunning => 1003,
            Self::Config => 2001,
            Self::Io => 2002,
            Self::Network => 2003,
            Self::Process => 3003,
            Self::Timeout => 3005,
            Self::Certificate => 4003,
            Self::Platform => 4004,
            Self::Console => 4005,
            Self::Other => 9999,
        }
    }
}

impl AppError {
    pub fn new(kind: ErrorKind, payload: HashMap<String, String>) -> Self {
        Self { payload, kind }
    }

    /// Create an error with a single "detail" key from a non-empty string,
    /// or an empty payload if the string is empty.
    fn with_detail(kind: ErrorKind, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        let payload = if detail.is_empty() {
            HashMap::new()
        } else {
            HashMap::from([("detail".to_string(), detail)])
        };
        Self::new(kind, payload)
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Config, message)
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Io, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Network, message)
    }

    pub fn network_with_url(url: &str, detail: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::Network,
            HashMap::from([
                ("url".to_string(), url.to_string()),
                ("detail".to_string(), detail.into()),
            ]),
        )
    }

    pub fn process(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Process, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Timeout, message)
    }

    pub fn certificate(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Certificate, message)
    }

    pub fn platform(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Platform, message)
    }

    pub fn console(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Console, message)
    }

    pub fn node_running() -> Self {
        Self::with_detail(ErrorKind::NodeRunning, "节点已在运行中。")
    }

    pub fn node_not_running() -> Self {
        Self::with_detail(ErrorKind::NodeNotRunning, "节点未在运行。")
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Other, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Human-readable detail, suitable for a progress log line.
    pub fn detail(&self) -> Option<&str> {
        self.payload.get("detail").map(String::as_str)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.detail(), self.payload.get("url")) {
            (Some(detail), Some(url)) => write!(f, "{detail} ({url})"),
            (Some(detail), None) => f.write_str(detail),
            _ if self.payload.is_empty() => write!(f, "{:?}", self.kind),
            _ => {
                let mut pairs: Vec<String> = self
                    .payload
                    .iter()
                    .map(|(k, v)| format!("{}={}", k, v))
                    .collect();
                pairs.sort();
                write!(f, "{:?}: {}", self.kind, pairs.join(", "))
            }
        }
    }
}

impl std::error::Error for AppError {}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::io(err.to_string())
    }
}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::config(err.to_string())
    }
}

impl From<toml::ser::Error> for AppError {
    fn from(err: toml::ser::Error) -> Self {
        Self::config(err.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        Self::network(err.to_string())
    }
}

impl From<walkdir::Error> for AppError {
    fn from(err: walkdir::Error) -> Self {
        Self::io(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::config(err.to_string())
    }
}

/// Convenient Result type alias.
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_prefers_detail() {
        let err = AppError::certificate("quota exceeded");
        assert_eq!(err.to_string(), "quota exceeded");
        assert_eq!(err.kind(), ErrorKind::Certificate);
    }

    #[test]
    fn display_includes_url_when_present() {
        let err = AppError::network_with_url("http://ca/issue", "503 Service Unavailable");
        assert_eq!(err.to_string(), "503 Service Unavailable (http://ca/issue)");
    }

    #[test]
    fn empty_detail_falls_back_to_kind() {
        assert_eq!(AppError::process("").to_string(), "Process");
        assert_eq!(ErrorKind::Timeout.code(), 3005);
    }
}
