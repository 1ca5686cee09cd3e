//! Streaming error handling
//!
//! Worker start-up failures and the classification loaders use to decide
//! what a failed tile request means for the rest of the system.

use crate::error::{EngineError, EngineResult};
use std::fmt;

/// Type alias for streaming operation results
pub type StreamingResult<T> = EngineResult<T>;

/// Why a claimed load request did not produce a ready tile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadFailure {
    /// The tile was evicted or filled by another loader meanwhile
    Superseded,
    /// The heightmap source could not be read or decoded
    Source,
    /// Pools or the device ran out of room for the tile's resources
    Memory,
    /// Native resource creation or upload failed
    Device,
}

impl LoadFailure {
    pub fn classify(error: &EngineError) -> Self {
        match error {
            EngineError::InvalidState { .. } => LoadFailure::Superseded,
            EngineError::LoadFailed { .. } | EngineError::Io(_) => LoadFailure::Source,
            EngineError::OutOfMemory { .. } | EngineError::AllocationFailed { .. } => {
                LoadFailure::Memory
            }
            _ => LoadFailure::Device,
        }
    }
}

impl fmt::Display for LoadFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LoadFailure::Superseded => "superseded",
            LoadFailure::Source => "source",
            LoadFailure::Memory => "memory",
            LoadFailure::Device => "device",
        };
        f.write_str(name)
    }
}

/// Helper trait for worker start-up errors
pub trait StreamingErrorContext<T> {
    fn worker_context(self, thread_name: &str) -> StreamingResult<T>;
}

impl<T> StreamingErrorContext<T> for std::io::Result<T> {
    fn worker_context(self, thread_name: &str) -> StreamingResult<T> {
        self.map_err(|e| worker_spawn_error(thread_name, e))
    }
}

/// Create an error for a loader or streaming thread that failed to start
pub fn worker_spawn_error(thread_name: &str, reason: impl fmt::Display) -> EngineError {
    EngineError::InitializationFailed {
        component: "terrain streaming".to_string(),
        reason: format!("could not spawn {}: {}", thread_name, reason),
    }
}
