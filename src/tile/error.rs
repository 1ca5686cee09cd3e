//! Tile subsystem error handling

use super::TileState;
use crate::error::{EngineError, EngineResult};
use std::path::Path;

/// Type alias for tile operation results
pub type TileResult<T> = EngineResult<T>;

/// Helper trait for tile error contexts.
///
/// Loader failures surface as `LoadFailed` tagged with the source path.
pub trait TileErrorContext<T> {
    fn tile_context(self, path: &Path) -> TileResult<T>;
}

impl<T, E> TileErrorContext<T> for Result<T, E>
where
    E: std::fmt::Display,
{
    fn tile_context(self, path: &Path) -> TileResult<T> {
        self.map_err(|e| load_error(path, e))
    }
}

/// Create an invalid state error for a tile transition
pub fn invalid_state_error(tile: &str, expected: &str, actual: TileState) -> EngineError {
    EngineError::InvalidState {
        resource: format!("tile {}", tile),
        expected: expected.to_string(),
        actual: actual.to_string(),
    }
}

/// Create a load failure error
pub fn load_error(path: &Path, reason: impl std::fmt::Display) -> EngineError {
    EngineError::LoadFailed {
        path: path.display().to_string(),
        reason: reason.to_string(),
    }
}
