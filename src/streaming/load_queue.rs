use crate::tile::TileCoordinate;
use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;

/// One tile waiting for a loader thread
#[derive(Debug, Clone)]
pub struct LoadRequest {
    pub coordinate: TileCoordinate,
    pub path: Arc<PathBuf>,
}

#[derive(Default)]
struct QueueInner {
    pending: VecDeque<LoadRequest>,
    /// Pending plus in-flight coordinates
    claimed: FxHashSet<TileCoordinate>,
}

/// Mutex-guarded FIFO shared by the loader threads.
///
/// A coordinate stays claimed from `push` until `complete`, so it is never
/// queued twice while a loader still works on it.
#[derive(Default)]
pub struct LoadQueue {
    inner: Mutex<QueueInner>,
}

impl LoadQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// False when the coordinate is already pending or in flight
    pub fn push(&self, coordinate: TileCoordinate, path: Arc<PathBuf>) -> bool {
        let mut inner = self.inner.lock();
        if !inner.claimed.insert(coordinate.clone()) {
            return false;
        }
        inner.pending.push_back(LoadRequest { coordinate, path });
        true
    }

    pub fn pop(&self) -> Option<LoadRequest> {
        self.inner.lock().pending.pop_front()
    }

    /// Release the claim taken by `push`
    pub fn complete(&self, coordinate: &TileCoordinate) {
        self.inner.lock().claimed.remove(coordinate);
    }

    /// Drop pending requests that fail `keep`; in-flight claims are untouched
    pub fn retain(&self, mut keep: impl FnMut(&LoadRequest) -> bool) -> usize {
        let mut inner = self.inner.lock();
        let QueueInner { pending, claimed } = &mut *inner;
        let before = pending.len();
        pending.retain(|request| {
            let kept = keep(request);
            if !kept {
                claimed.remove(&request.coordinate);
            }
            kept
        });
        before - pending.len()
    }

    pub fn contains(&self, coordinate: &TileCoordinate) -> bool {
        self.inner.lock().claimed.contains(coordinate)
    }

    /// Pending requests, not counting in-flight ones
    pub fn len(&self) -> usize {
        self.inner.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().pending.is_empty()
    }

    pub fn in_flight(&self) -> usize {
        let inner = self.inner.lock();
        inner.claimed.len() - inner.pending.len()
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        let QueueInner { pending, claimed } = &mut *inner;
        for request in pending.drain(..) {
            claimed.remove(&request.coordinate);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coord(x: i32) -> TileCoordinate {
        TileCoordinate::new(x, 0, 0, "d")
    }

    #[test]
    fn test_fifo_with_dedup() {
        let queue = LoadQueue::new();
        let path = Arc::new(PathBuf::from("d.synthetic"));
        assert!(queue.push(coord(1), Arc::clone(&path)));
        assert!(queue.push(coord(2), Arc::clone(&path)));
        assert!(!queue.push(coord(1), Arc::clone(&path)));

        let first = queue.pop().unwrap();
        assert_eq!(first.coordinate, coord(1));
        // Still claimed while in flight
        assert!(!queue.push(coord(1), Arc::clone(&path)));
        assert_eq!(queue.in_flight(), 1);
        queue.complete(&coord(1));
        assert!(queue.push(coord(1), path));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_retain_releases_claims() {
        let queue = LoadQueue::new();
        let path = Arc::new(PathBuf::from("d.synthetic"));
        for x in 0..4 {
            queue.push(coord(x), Arc::clone(&path));
        }
        assert_eq!(queue.retain(|request| request.coordinate.x % 2 == 0), 2);
        assert_eq!(queue.len(), 2);
        assert!(!queue.contains(&coord(1)));
        queue.clear();
        assert!(queue.is_empty());
        assert!(!queue.contains(&coord(0)));
    }
}
