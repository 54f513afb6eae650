//! Crate-wide error type.
//!
//! Each subsystem keeps its own `thiserror` enum; this one gathers them for
//! host code that drives several subsystems at once.

use thiserror::Error;

/// Main error type that encompasses all possible errors in the host
#[derive(Debug, Error)]
pub enum LaunchdeckError {
    #[error("Plugin error: {0}")]
    Plugin(#[from] crate::plugins::PluginError),

    #[error("Service error: {0}")]
    Service(#[from] crate::services::ServiceError),

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Logging error: {0}")]
    Logging(#[from] crate::logging::LoggingError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl LaunchdeckError {
    /// Whether the failure was caused by third-party plugin code rather than
    /// the host or its environment
    pub fn is_plugin_fault(&self) -> bool {
        matches!(
            self,
            LaunchdeckError::Plugin(
                crate::plugins::PluginError::HookFailed { .. }
                    | crate::plugins::PluginError::HookTimedOut { .. }
                    | crate::plugins::PluginError::InstantiationFailed { .. }
            )
        )
    }
}

/// Result type alias for host operations
pub type LaunchdeckResult<T> = Result<T, LaunchdeckError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::{HookKind, PluginError};

    #[test]
    fn test_subsystem_errors_convert() {
        let err: LaunchdeckError = PluginError::NotFound("ghost".to_string()).into();
        assert_eq!(err.to_string(), "Plugin error: Plugin not found: ghost");
        assert!(!err.is_plugin_fault());

        let err: LaunchdeckError = PluginError::HookTimedOut {
            plugin_id: "slow".to_string(),
            hook: HookKind::GameClose,
            timeout_ms: 30_000,
        }
        .into();
        assert!(err.is_plugin_fault());
        assert!(err.to_string().contains("on_game_close"));
    }
}
