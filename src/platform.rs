use crate::error::{AppError, Result};

/// Map an OS name (as in `std::env::consts::OS`) to the executions endpoint segment.
pub fn platform_param(os: &str) -> Result<&'static str> {
    match os {
        "linux" => Ok("linux"),
        "macos" => Ok("macos"),
        "windows" => Err(AppError::platform("Windows 系统不支持轻节点部署")),
        other => Err(AppError::platform(format!("不支持的操作系统: {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_linux_and_macos_are_supported() {
        assert_eq!(platform_param("linux").unwrap(), "linux");
        assert_eq!(platform_param("macos").unwrap(), "macos");
        assert_eq!(
            platform_param("windows").unwrap_err().to_string(),
            "Windows 系统不支持轻节点部署"
        );
        assert!(platform_param("freebsd")
            .unwrap_err()
            .to_string()
            .contains("freebsd"));
    }
}
