//! Crate-wide error type
//!
//! Every subsystem returns `EngineResult<T>`; subsystem `error.rs` modules add
//! their own aliases and context helpers on top of this enum.

use thiserror::Error;

/// Result alias used throughout the crate
pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("out of memory: requested {requested} bytes, {available} available")]
    OutOfMemory { requested: usize, available: usize },

    #[error("allocation of {size} bytes failed: {reason}")]
    AllocationFailed { size: usize, reason: String },

    #[error("GPU operation '{operation}' failed: {error}")]
    GpuOperationFailed { operation: String, error: String },

    #[error("{resource} is in state {actual}, expected {expected}")]
    InvalidState {
        resource: String,
        expected: String,
        actual: String,
    },

    #[error("invalid configuration for '{field}': {reason}")]
    InvalidConfig { field: String, reason: String },

    #[error("failed to load '{path}': {reason}")]
    LoadFailed { path: String, reason: String },

    #[error("{resource_type} not found: {id}")]
    ResourceNotFound { resource_type: String, id: String },

    #[error("{component} initialization failed: {reason}")]
    InitializationFailed { component: String, reason: String },

    #[error("{component} error: {error}")]
    SystemError { component: String, error: String },

    #[error("configuration parse error: {message}")]
    ConfigParse { message: String },

    #[error("internal error: {message}")]
    Internal { message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<toml::de::Error> for EngineError {
    fn from(err: toml::de::Error) -> Self {
        EngineError::ConfigParse {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::ConfigParse {
            message: err.to_string(),
        }
    }
}

impl EngineError {
    /// True for conditions the allocator treats as steady-state pressure
    pub fn is_out_of_memory(&self) -> bool {
        matches!(
            self,
            EngineError::OutOfMemory { .. } | EngineError::AllocationFailed { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_carry_context() {
        let err = EngineError::OutOfMemory {
            requested: 1024,
            available: 512,
        };
        assert_eq!(
            err.to_string(),
            "out of memory: requested 1024 bytes, 512 available"
        );
        assert!(err.is_out_of_memory());

        let err = EngineError::InvalidConfig {
            field: "tile_size".into(),
            reason: "must be positive".into(),
        };
        assert!(err.to_string().contains("tile_size"));
        assert!(!err.is_out_of_memory());
    }

    #[test]
    fn test_toml_errors_convert() {
        let parsed: Result<toml::Value, _> = toml::from_str("not = [valid");
        let err: EngineError = parsed.unwrap_err().into();
        assert!(matches!(err, EngineError::ConfigParse { .. }));
    }
}
