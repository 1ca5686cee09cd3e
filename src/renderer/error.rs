//! Renderer subsystem error handling
//!
//! Result alias, a context trait for foreign errors and constructors for
//! the failures the orchestrator reports itself.

use crate::error::{EngineError, EngineResult};

/// Type alias for renderer operation results
pub type RendererResult<T> = EngineResult<T>;

/// Helper trait for renderer error contexts
pub trait RendererErrorContext<T> {
    fn renderer_context(self, context: &str) -> RendererResult<T>;
}

impl<T, E> RendererErrorContext<T> for Result<T, E>
where
    E: std::fmt::Display,
{
    fn renderer_context(self, context: &str) -> RendererResult<T> {
        self.map_err(|e| EngineError::SystemError {
            component: "renderer".to_string(),
            error: format!("{}: {}", context, e),
        })
    }
}

/// Create a configuration rejection
pub fn invalid_config_error(field: &str, reason: &str) -> EngineError {
    EngineError::InvalidConfig {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

/// Create a missing dataset error
pub fn dataset_not_found_error(id: &str) -> EngineError {
    EngineError::ResourceNotFound {
        resource_type: "dataset".to_string(),
        id: id.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_names_component() {
        let failed: Result<(), std::fmt::Error> = Err(std::fmt::Error);
        let err = failed.renderer_context("start workers").unwrap_err();
        assert!(err.to_string().starts_with("renderer error: start workers"));
        assert!(dataset_not_found_error("alps").to_string().contains("alps"));
    }
}
