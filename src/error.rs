//! Error types for the WhatsApp notifier

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Session is locked by another process")]
    SessionLocked,

    #[error("Failed to acquire session lock: {0}")]
    LockError(String),

    #[error("No Chromium-compatible browser found (set CHROME_PATH): {0}")]
    BrowserNotFound(String),

    #[error("Browser launch failed: {0}")]
    BrowserLaunch(String),

    #[error("DevTools protocol error: {0}")]
    Cdp(String),

    #[error("Page script error: {0}")]
    Script(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Chat not found: {0}")]
    ChatNotFound(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::SerializationError(err.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::Config(err.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Http(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Error::Cdp(err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(err: tokio::time::error::Elapsed) -> Self {
        Error::Timeout(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_session_locked() {
        let err = Error::SessionLocked;
        assert!(err.to_string().contains("locked by another process"));
    }

    #[test]
    fn test_error_display_lock_error() {
        let err = Error::LockError("timeout".to_string());
        let msg = err.to_string();
        assert!(msg.contains("Failed to acquire session lock"));
        assert!(msg.contains("timeout"));
    }

    #[test]
    fn test_error_display_browser_not_found_mentions_env() {
        let err = Error::BrowserNotFound("searched PATH".to_string());
        let msg = err.to_string();
        assert!(msg.contains("CHROME_PATH"));
        assert!(msg.contains("searched PATH"));
    }

    #[test]
    fn test_error_display_cdp() {
        let err = Error::Cdp("Target closed".to_string());
        assert!(err.to_string().contains("DevTools protocol error"));
        assert!(err.to_string().contains("Target closed"));
    }

    #[test]
    fn test_error_display_authentication_failed() {
        let err = Error::AuthenticationFailed("max login code retries reached".into());
        let msg = err.to_string();
        assert!(msg.contains("Authentication failed"));
        assert!(msg.contains("retries"));
    }

    #[test]
    fn test_error_display_chat_not_found() {
        let err = Error::ChatNotFound("Dr. Smith".to_string());
        assert!(err.to_string().contains("Chat not found"));
        assert!(err.to_string().contains("Dr. Smith"));
    }

    #[test]
    fn test_error_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::IoError(_)));
        assert!(err.to_string().contains("IO error"));
    }

    #[test]
    fn test_error_from_io_various_kinds() {
        let kinds = [
            std::io::ErrorKind::NotFound,
            std::io::ErrorKind::PermissionDenied,
            std::io::ErrorKind::ConnectionRefused,
            std::io::ErrorKind::TimedOut,
        ];

        for kind in kinds {
            let io_err = std::io::Error::new(kind, "test");
            let err: Error = io_err.into();
            assert!(matches!(err, Error::IoError(_)));
        }
    }

    #[test]
    fn test_error_from_serde_json() {
        let json_err = serde_json::from_str::<i32>("not a number").unwrap_err();
        let err: Error = json_err.into();

        assert!(matches!(err, Error::SerializationError(_)));
        assert!(err.to_string().contains("Serialization error"));
    }

    #[test]
    fn test_error_from_serde_yaml_is_config_error() {
        let yaml_err = serde_yaml::from_str::<Vec<i32>>("{ invalid yaml [").unwrap_err();
        let err: Error = yaml_err.into();

        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("Configuration error"));
    }

    #[tokio::test]
    async fn test_error_from_elapsed_is_timeout() {
        let elapsed = tokio::time::timeout(
            std::time::Duration::from_millis(1),
            std::future::pending::<()>(),
        )
        .await
        .unwrap_err();
        let err: Error = elapsed.into();

        assert!(matches!(err, Error::Timeout(_)));
    }

    #[test]
    fn test_error_debug_impl() {
        let err = Error::SessionLocked;
        let debug_str = format!("{:?}", err);
        assert!(debug_str.contains("SessionLocked"));
    }
}
