//! # Engine Error Types
//!
//! Error types for parameter synchronization.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Param Error Categories                            │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │   Parameters    │  │     Cache               │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  UnknownParam   │  │  CacheIo                │ │
//! │  │  ConfigLoad     │  │  NoDefaultComp  │  │  CacheFormat            │ │
//! │  │  ConfigSave     │  │  NotStarted     │  │                         │ │
//! │  │                 │  │  Validation     │  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐                              │
//! │  │    Metadata     │  │    Internal     │                              │
//! │  │                 │  │                 │                              │
//! │  │  MetadataLoad   │  │  ChannelError   │                              │
//! │  │                 │  │  ShuttingDown   │                              │
//! │  └─────────────────┘  └─────────────────┘                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Transport loss never shows up here: dropped requests are retried and
//! exhausted retries are reported through the readiness signal.

use skyparam_core::{ComponentTarget, ValidationError};
use thiserror::Error;

/// Result type alias for engine operations.
pub type ParamResult<T> = Result<T, ParamError>;

/// Error type covering all engine-level failures.
#[derive(Debug, Error)]
pub enum ParamError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid engine configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Parameter Errors
    // =========================================================================
    /// No confirmed parameter with this name on the component.
    #[error("Unknown parameter {name} on component {component}")]
    UnknownParameter {
        component: ComponentTarget,
        name: String,
    },

    /// The default component has not been determined yet.
    #[error("Default component is not known yet")]
    NoDefaultComponent,

    /// Operation needs a started engine (after `start`, before `stop`).
    #[error("Parameter engine is not started")]
    NotStarted,

    /// Value rejected at the write boundary.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    // =========================================================================
    // Cache / Metadata Errors
    // =========================================================================
    /// Cache blob could not be read or written.
    #[error("Cache I/O failed: {0}")]
    CacheIo(String),

    /// Cache blob is not valid JSON for a parameter set.
    #[error("Cache format error: {0}")]
    CacheFormat(String),

    /// Metadata definitions could not be loaded.
    #[error("Metadata load failed: {0}")]
    MetadataLoadFailed(String),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// Engine is shutting down.
    #[error("Parameter engine is shutting down")]
    ShuttingDown,

    /// Channel send/receive failed.
    #[error("Channel error: {0}")]
    ChannelError(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<serde_json::Error> for ParamError {
    fn from(err: serde_json::Error) -> Self {
        ParamError::CacheFormat(err.to_string())
    }
}

impl From<std::io::Error> for ParamError {
    fn from(err: std::io::Error) -> Self {
        ParamError::CacheIo(err.to_string())
    }
}

impl From<toml::de::Error> for ParamError {
    fn from(err: toml::de::Error) -> Self {
        ParamError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for ParamError {
    fn from(err: toml::ser::Error) -> Self {
        ParamError::ConfigSaveFailed(err.to_string())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for ParamError {
    fn from(err: tokio::sync::mpsc::error::SendError<T>) -> Self {
        ParamError::ChannelError(err.to_string())
    }
}

// =============================================================================
// Error Categorization
// =============================================================================

impl ParamError {
    /// Returns true if the operation can succeed when tried again later.
    ///
    /// ## Retryable Errors
    /// - Unknown parameter (may still be loading)
    /// - Default component not determined yet
    /// - Cache I/O
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ParamError::UnknownParameter { .. }
                | ParamError::NoDefaultComponent
                | ParamError::NotStarted
                | ParamError::CacheIo(_)
        )
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            ParamError::InvalidConfig(_)
                | ParamError::ConfigLoadFailed(_)
                | ParamError::ConfigSaveFailed(_)
        )
    }

    /// Returns true if the caller supplied a value the parameter cannot take.
    pub fn is_validation_error(&self) -> bool {
        matches!(self, ParamError::Validation(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skyparam_core::{ComponentId, ParamType};

    #[test]
    fn test_retryable_errors() {
        assert!(ParamError::NoDefaultComponent.is_retryable());
        assert!(ParamError::CacheIo("disk full".into()).is_retryable());

        assert!(!ParamError::InvalidConfig("bad".into()).is_retryable());
        assert!(!ParamError::ShuttingDown.is_retryable());
    }

    #[test]
    fn test_validation_error_converts() {
        let err: ParamError = ValidationError::Conversion {
            value: "-1".into(),
            ty: ParamType::Uint8,
        }
        .into();
        assert!(err.is_validation_error());
        assert!(!err.is_config_error());
    }

    #[test]
    fn test_error_display() {
        let err = ParamError::UnknownParameter {
            component: ComponentTarget::Id(ComponentId(1)),
            name: "NOPE".into(),
        };
        assert_eq!(err.to_string(), "Unknown parameter NOPE on component 1");
    }
}
