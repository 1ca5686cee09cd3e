use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle of a tile.
///
/// `Empty -> Loading -> Loaded -> Uploading -> Ready` is the forward path.
/// Eviction from any non-error state lands in `Evicted`, which loads again
/// like `Empty`. `Error` is terminal until the tile is recreated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TileState {
    Empty = 0,
    Loading = 1,
    Loaded = 2,
    Uploading = 3,
    Ready = 4,
    Error = 5,
    Evicted = 6,
}

impl TileState {
    fn from_u8(value: u8) -> TileState {
        match value {
            0 => TileState::Empty,
            1 => TileState::Loading,
            2 => TileState::Loaded,
            3 => TileState::Uploading,
            4 => TileState::Ready,
            5 => TileState::Error,
            _ => TileState::Evicted,
        }
    }

    /// Waiting for a loader to pick it up
    pub fn needs_load(self) -> bool {
        matches!(self, TileState::Empty | TileState::Evicted)
    }

    /// A loader currently owns the tile
    pub fn is_in_flight(self) -> bool {
        matches!(self, TileState::Loading | TileState::Uploading)
    }

    pub fn name(self) -> &'static str {
        match self {
            TileState::Empty => "Empty",
            TileState::Loading => "Loading",
            TileState::Loaded => "Loaded",
            TileState::Uploading => "Uploading",
            TileState::Ready => "Ready",
            TileState::Error => "Error",
            TileState::Evicted => "Evicted",
        }
    }
}

impl fmt::Display for TileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Atomic holder for a `TileState` with compare-and-set transitions
#[derive(Debug)]
pub struct TileStateCell(AtomicU8);

impl TileStateCell {
    pub fn new(state: TileState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub fn load(&self) -> TileState {
        TileState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Move `from -> to`; on failure returns the state actually found
    pub fn transition(&self, from: TileState, to: TileState) -> Result<(), TileState> {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(TileState::from_u8)
    }

    /// Unconditional store, returns the previous state
    pub fn force(&self, to: TileState) -> TileState {
        TileState::from_u8(self.0.swap(to as u8, Ordering::AcqRel))
    }
}
