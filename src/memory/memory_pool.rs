/// Typed Memory Pool
///
/// One pool per `TerrainMemoryType`. A pool owns a fixed-size address range
/// and places allocations in it with a block list; growth only happens
/// through an explicit `resize`. Each pool has its own mutex.
use super::utils::align_size;
use super::{out_of_memory_error, MemoryResult, PoolConfig, PoolStats, TerrainMemoryType};
use crate::error::EngineError;
use crate::gpu::NativeResource;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

/// Allocation strategy for the memory pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationStrategy {
    /// First block that fits
    FirstFit,
    /// Best fitting block (least waste)
    BestFit,
    /// Largest block first (reduces fragmentation)
    WorstFit,
}

/// A live allocation handed out by a pool.
///
/// Only the pool that created it can release it; dropping the last `Arc`
/// without deallocating leaves it for garbage collection.
#[derive(Debug)]
pub struct MemoryAllocation {
    id: u64,
    resource: NativeResource,
    offset: AtomicU64,
    size: u64,
    aligned_size: u64,
    alignment: u64,
    memory_type: TerrainMemoryType,
    pool_id: u32,
    allocated_at: Instant,
    last_used: Mutex<Instant>,
}

impl MemoryAllocation {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn resource(&self) -> NativeResource {
        self.resource
    }

    /// Placement inside the pool; may move when the pool is defragmented
    pub fn offset(&self) -> u64 {
        self.offset.load(Ordering::Acquire)
    }

    /// Requested size
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Size actually reserved in the pool
    pub fn aligned_size(&self) -> u64 {
        self.aligned_size
    }

    pub fn alignment(&self) -> u64 {
        self.alignment
    }

    pub fn memory_type(&self) -> TerrainMemoryType {
        self.memory_type
    }

    pub fn pool_id(&self) -> u32 {
        self.pool_id
    }

    pub fn allocated_at(&self) -> Instant {
        self.allocated_at
    }

    pub fn last_used(&self) -> Instant {
        *self.last_used.lock()
    }

    pub fn touch(&self) {
        *self.last_used.lock() = Instant::now();
    }
}

/// Memory block within a pool
#[derive(Debug, Clone, Copy)]
struct MemoryBlock {
    offset: u64,
    size: u64,
    /// Allocation occupying the block, `None` when free
    owner: Option<u64>,
}

struct AllocationRecord {
    offset: u64,
    aligned_size: u64,
    resource: NativeResource,
    handle: Weak<MemoryAllocation>,
}

/// Placement reserved by `reserve`, finished by `commit` or undone by `cancel`
#[derive(Debug)]
pub struct Reservation {
    id: u64,
    offset: u64,
    size: u64,
    aligned_size: u64,
}

impl Reservation {
    pub fn aligned_size(&self) -> u64 {
        self.aligned_size
    }
}

/// Allocation that nobody deallocated before dropping its handle
pub struct LeakedAllocation {
    pub resource: NativeResource,
    pub aligned_size: u64,
}

struct PoolState {
    total_size: u64,
    used_size: u64,
    peak_used: u64,
    blocks: Vec<MemoryBlock>,
    records: FxHashMap<u64, AllocationRecord>,
    /// Reserved placements still waiting for their native resource.
    /// Pinned: defragmentation never moves them.
    pending: FxHashMap<u64, (u64, u64)>,
    allocation_count: u64,
    deallocation_count: u64,
}

pub struct MemoryPool {
    id: u32,
    memory_type: TerrainMemoryType,
    config: PoolConfig,
    state: Mutex<PoolState>,
}

impl MemoryPool {
    pub fn new(id: u32, memory_type: TerrainMemoryType, config: PoolConfig, size: u64) -> Self {
        Self {
            id,
            memory_type,
            config,
            state: Mutex::new(PoolState {
                total_size: size,
                used_size: 0,
                peak_used: 0,
                blocks: vec![MemoryBlock {
                    offset: 0,
                    size,
                    owner: None,
                }],
                records: FxHashMap::default(),
                pending: FxHashMap::default(),
                allocation_count: 0,
                deallocation_count: 0,
            }),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn memory_type(&self) -> TerrainMemoryType {
        self.memory_type
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn total_size(&self) -> u64 {
        self.state.lock().total_size
    }

    pub fn used_size(&self) -> u64 {
        self.state.lock().used_size
    }

    pub fn free_size(&self) -> u64 {
        let state = self.state.lock();
        state.total_size - state.used_size
    }

    pub fn active_allocations(&self) -> usize {
        self.state.lock().records.len()
    }

    /// Reserve placement for `size` bytes.
    ///
    /// Fails with `OutOfMemory` when the pool is full and with
    /// `AllocationFailed` when enough bytes are free but no single block
    /// fits. Never grows the pool.
    pub fn reserve(&self, id: u64, size: u64) -> MemoryResult<Reservation> {
        let aligned_size = align_size(size, self.config.alignment);
        let mut state = self.state.lock();

        let available = state.total_size - state.used_size;
        if aligned_size > available {
            return Err(out_of_memory_error(aligned_size as usize, available as usize));
        }

        let index = Self::find_free_block(&state.blocks, aligned_size, self.config.strategy)
            .ok_or_else(|| EngineError::AllocationFailed {
                size: aligned_size as usize,
                reason: format!(
                    "{} pool fragmented: {} bytes free, no contiguous block",
                    self.memory_type, available
                ),
            })?;

        let block = state.blocks[index];
        state.blocks[index] = MemoryBlock {
            offset: block.offset,
            size: aligned_size,
            owner: Some(id),
        };
        if block.size > aligned_size {
            state.blocks.insert(
                index + 1,
                MemoryBlock {
                    offset: block.offset + aligned_size,
                    size: block.size - aligned_size,
                    owner: None,
                },
            );
        }

        state.used_size += aligned_size;
        state.peak_used = state.peak_used.max(state.used_size);
        state.pending.insert(id, (block.offset, aligned_size));

        Ok(Reservation {
            id,
            offset: block.offset,
            size,
            aligned_size,
        })
    }

    /// Attach the native resource to a reservation and hand out the allocation
    pub fn commit(&self, reservation: Reservation, resource: NativeResource) -> Arc<MemoryAllocation> {
        let now = Instant::now();
        let mut state = self.state.lock();
        let offset = state
            .pending
            .remove(&reservation.id)
            .map_or(reservation.offset, |(offset, _)| offset);
        let allocation = Arc::new(MemoryAllocation {
            id: reservation.id,
            resource,
            offset: AtomicU64::new(offset),
            size: reservation.size,
            aligned_size: reservation.aligned_size,
            alignment: self.config.alignment,
            memory_type: self.memory_type,
            pool_id: self.id,
            allocated_at: now,
            last_used: Mutex::new(now),
        });

        state.records.insert(
            reservation.id,
            AllocationRecord {
                offset,
                aligned_size: reservation.aligned_size,
                resource,
                handle: Arc::downgrade(&allocation),
            },
        );
        state.allocation_count += 1;
        allocation
    }

    /// Undo a reservation whose native resource could not be created
    pub fn cancel(&self, reservation: Reservation) {
        let mut state = self.state.lock();
        if state.pending.remove(&reservation.id).is_some() {
            Self::free_block(&mut state, reservation.id, reservation.aligned_size);
        }
    }

    /// Remove bookkeeping for an allocation and return its native resource
    pub fn release(&self, allocation_id: u64) -> Option<(NativeResource, u64)> {
        let mut state = self.state.lock();
        let record = state.records.remove(&allocation_id)?;
        Self::free_block(&mut state, allocation_id, record.aligned_size);
        state.deallocation_count += 1;
        Some((record.resource, record.aligned_size))
    }

    /// Reclaim allocations whose handles were all dropped without deallocation
    pub fn collect_garbage(&self) -> Vec<LeakedAllocation> {
        let mut state = self.state.lock();
        let expired: Vec<u64> = state
            .records
            .iter()
            .filter(|(_, record)| record.handle.strong_count() == 0)
            .map(|(&id, _)| id)
            .collect();

        let mut leaked = Vec::with_capacity(expired.len());
        for id in expired {
            if let Some(record) = state.records.remove(&id) {
                Self::free_block(&mut state, id, record.aligned_size);
                state.deallocation_count += 1;
                leaked.push(LeakedAllocation {
                    resource: record.resource,
                    aligned_size: record.aligned_size,
                });
            }
        }
        leaked
    }

    /// `1 - largest_free / total_free`; 0 when nothing is free
    pub fn fragmentation(&self) -> f32 {
        let state = self.state.lock();
        Self::fragmentation_of(&state.blocks)
    }

    /// Compact placements towards offset 0, stopping once `max_time` elapses.
    ///
    /// Returns true when the pass finished. Pools with defragmentation
    /// disabled return immediately.
    pub fn defragment(&self, max_time: Duration) -> bool {
        if !self.config.enable_defragmentation {
            return true;
        }

        let start = Instant::now();
        let mut state = self.state.lock();

        // (offset, end, id, movable)
        let mut order: Vec<(u64, u64, u64, bool)> = state
            .records
            .iter()
            .map(|(&id, record)| (record.offset, record.offset + record.aligned_size, id, true))
            .chain(
                state
                    .pending
                    .iter()
                    .map(|(&id, &(offset, size))| (offset, offset + size, id, false)),
            )
            .collect();
        order.sort_unstable();

        let mut cursor = 0;
        let mut completed = true;
        let mut moved = 0;
        for (offset, end, id, movable) in order {
            if start.elapsed() >= max_time {
                completed = false;
                break;
            }
            if !movable {
                cursor = end;
                continue;
            }
            let Some(record) = state.records.get_mut(&id) else {
                continue;
            };
            if offset > cursor {
                record.offset = cursor;
                if let Some(allocation) = record.handle.upgrade() {
                    allocation.offset.store(cursor, Ordering::Release);
                }
                moved += 1;
            }
            cursor = record.offset + record.aligned_size;
        }

        Self::rebuild_blocks(&mut state);
        log::debug!(
            "[MemoryPool] {} defrag moved {} allocations in {:?} (complete: {})",
            self.memory_type,
            moved,
            start.elapsed(),
            completed
        );
        completed
    }

    /// Change the pool's capacity. Shrinking below the highest live
    /// placement is rejected.
    pub fn resize(&self, new_size: u64) -> MemoryResult<()> {
        let mut state = self.state.lock();
        let high_water = state
            .records
            .values()
            .map(|record| record.offset + record.aligned_size)
            .chain(state.pending.values().map(|&(offset, size)| offset + size))
            .max()
            .unwrap_or(0);
        if new_size < high_water {
            return Err(EngineError::AllocationFailed {
                size: new_size as usize,
                reason: format!(
                    "{} pool cannot shrink below live placement end {}",
                    self.memory_type, high_water
                ),
            });
        }
        state.total_size = new_size;
        Self::rebuild_blocks(&mut state);
        Ok(())
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.state.lock();
        let largest_free_block = state
            .blocks
            .iter()
            .filter(|block| block.owner.is_none())
            .map(|block| block.size)
            .max()
            .unwrap_or(0);
        PoolStats {
            memory_type: self.memory_type,
            total_size: state.total_size,
            used_size: state.used_size,
            free_size: state.total_size - state.used_size,
            peak_used: state.peak_used,
            active_allocations: state.records.len(),
            largest_free_block,
            fragmentation: Self::fragmentation_of(&state.blocks),
            allocation_count: state.allocation_count,
            deallocation_count: state.deallocation_count,
        }
    }

    /// Find a free block using the configured strategy
    fn find_free_block(
        blocks: &[MemoryBlock],
        size: u64,
        strategy: AllocationStrategy,
    ) -> Option<usize> {
        let mut candidates = blocks
            .iter()
            .enumerate()
            .filter(|(_, block)| block.owner.is_none() && block.size >= size)
            .map(|(index, block)| (index, block.size));

        match strategy {
            AllocationStrategy::FirstFit => candidates.next().map(|(index, _)| index),
            AllocationStrategy::BestFit => candidates
                .min_by_key(|&(_, block_size)| block_size)
                .map(|(index, _)| index),
            AllocationStrategy::WorstFit => candidates
                .max_by_key(|&(_, block_size)| block_size)
                .map(|(index, _)| index),
        }
    }

    fn free_block(state: &mut PoolState, owner: u64, aligned_size: u64) {
        if let Some(block) = state.blocks.iter_mut().find(|b| b.owner == Some(owner)) {
            block.owner = None;
        }
        state.used_size -= aligned_size;
        Self::merge_free_blocks(&mut state.blocks);
    }

    /// Merge adjacent free blocks to reduce fragmentation
    fn merge_free_blocks(blocks: &mut Vec<MemoryBlock>) {
        let mut i = 0;
        while i + 1 < blocks.len() {
            if blocks[i].owner.is_none() && blocks[i + 1].owner.is_none() {
                blocks[i].size += blocks[i + 1].size;
                blocks.remove(i + 1);
            } else {
                i += 1;
            }
        }
    }

    /// Regenerate the block list from live records and pending reservations
    fn rebuild_blocks(state: &mut PoolState) {
        let mut placed: Vec<(u64, u64, u64)> = state
            .records
            .iter()
            .map(|(&id, record)| (record.offset, record.aligned_size, id))
            .chain(
                state
                    .pending
                    .iter()
                    .map(|(&id, &(offset, size))| (offset, size, id)),
            )
            .collect();
        placed.sort_unstable();

        let mut blocks = Vec::with_capacity(placed.len() * 2 + 1);
        let mut cursor = 0;
        for (offset, size, id) in placed {
            if offset > cursor {
                blocks.push(MemoryBlock {
                    offset: cursor,
                    size: offset - cursor,
                    owner: None,
                });
            }
            blocks.push(MemoryBlock {
                offset,
                size,
                owner: Some(id),
            });
            cursor = offset + size;
        }
        if cursor < state.total_size {
            blocks.push(MemoryBlock {
                offset: cursor,
                size: state.total_size - cursor,
                owner: None,
            });
        }
        state.blocks = blocks;
    }

    fn fragmentation_of(blocks: &[MemoryBlock]) -> f32 {
        let (total_free, largest_free) = blocks
            .iter()
            .filter(|block| block.owner.is_none())
            .fold((0u64, 0u64), |(total, largest), block| {
                (total + block.size, largest.max(block.size))
            });
        if total_free == 0 {
            return 0.0;
        }
        1.0 - largest_free as f32 / total_free as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::BufferHandle;

    fn pool(size: u64) -> MemoryPool {
        MemoryPool::new(
            0,
            TerrainMemoryType::VertexBuffer,
            PoolConfig::for_type(TerrainMemoryType::VertexBuffer),
            size,
        )
    }

    fn allocate(pool: &MemoryPool, id: u64, size: u64) -> Arc<MemoryAllocation> {
        let reservation = pool.reserve(id, size).unwrap();
        pool.commit(reservation, NativeResource::Buffer(BufferHandle(id)))
    }

    #[test]
    fn test_used_tracks_aligned_sizes() {
        let pool = pool(64 * 1024);
        let handles: Vec<_> = (0..10).map(|id| allocate(&pool, id, 100)).collect();
        assert_eq!(pool.used_size(), 10 * 256);
        assert_eq!(pool.active_allocations(), 10);

        for handle in &handles {
            assert!(pool.release(handle.id()).is_some());
        }
        assert_eq!(pool.used_size(), 0);
        assert_eq!(pool.active_allocations(), 0);
        assert_eq!(pool.stats().largest_free_block, 64 * 1024);
    }

    #[test]
    fn test_rejects_when_full() {
        let pool = pool(1024);
        let _a = allocate(&pool, 1, 1024);
        let err = pool.reserve(2, 1).unwrap_err();
        assert!(matches!(err, EngineError::OutOfMemory { .. }));
    }

    #[test]
    fn test_fragmentation_and_defragment() {
        let pool = pool(1024);
        let handles: Vec<_> = (0..4).map(|id| allocate(&pool, id, 256)).collect();
        pool.release(handles[0].id());
        pool.release(handles[2].id());
        assert!((pool.fragmentation() - 0.5).abs() < f32::EPSILON);

        // Enough bytes free, but no contiguous 512 block
        let err = pool.reserve(10, 512).unwrap_err();
        assert!(matches!(err, EngineError::AllocationFailed { .. }));

        assert!(pool.defragment(Duration::from_secs(1)));
        assert_eq!(pool.fragmentation(), 0.0);
        assert_eq!(handles[1].offset(), 0);
        assert_eq!(handles[3].offset(), 256);
        assert!(pool.reserve(10, 512).is_ok());
    }

    #[test]
    fn test_defragment_respects_zero_budget() {
        let pool = pool(1024);
        let handles: Vec<_> = (0..2).map(|id| allocate(&pool, id, 256)).collect();
        pool.release(handles[0].id());
        assert!(!pool.defragment(Duration::ZERO));
        assert_eq!(handles[1].offset(), 256);
    }

    #[test]
    fn test_texture_pool_never_defragments() {
        let pool = MemoryPool::new(
            1,
            TerrainMemoryType::HeightTexture,
            PoolConfig::for_type(TerrainMemoryType::HeightTexture),
            4096,
        );
        let a = allocate(&pool, 1, 1024);
        let b = allocate(&pool, 2, 1024);
        pool.release(a.id());
        assert!(pool.defragment(Duration::from_secs(1)));
        assert_eq!(b.offset(), 1024);
    }

    #[test]
    fn test_garbage_collection_reclaims_dropped_handles() {
        let pool = pool(4096);
        let kept = allocate(&pool, 1, 256);
        drop(allocate(&pool, 2, 256));

        let leaked = pool.collect_garbage();
        assert_eq!(leaked.len(), 1);
        assert_eq!(leaked[0].aligned_size, 256);
        assert_eq!(pool.active_allocations(), 1);
        assert_eq!(pool.used_size(), 256);
        drop(kept);
    }

    #[test]
    fn test_resize_refuses_to_cut_live_placement() {
        let pool = pool(4096);
        let _a = allocate(&pool, 1, 256);
        let _b = allocate(&pool, 2, 256);
        assert!(pool.resize(256).is_err());
        assert!(pool.resize(8192).is_ok());
        assert_eq!(pool.free_size(), 8192 - 512);
    }

    fn assert_disjoint(allocations: &[&Arc<MemoryAllocation>]) {
        let mut ranges: Vec<(u64, u64)> = allocations
            .iter()
            .map(|a| (a.offset(), a.offset() + a.aligned_size()))
            .collect();
        ranges.sort_unstable();
        for pair in ranges.windows(2) {
            assert!(pair[0].1 <= pair[1].0, "overlapping placements {:?}", ranges);
        }
    }

    #[test]
    fn test_defragment_keeps_pending_reservation() {
        let pool = pool(1024);
        let reservation = pool.reserve(1, 256).unwrap();
        let b = allocate(&pool, 2, 256);

        assert!(pool.defragment(Duration::from_secs(1)));
        let a = pool.commit(reservation, NativeResource::Buffer(BufferHandle(1)));
        let c = allocate(&pool, 3, 256);

        assert_eq!(a.offset(), 0);
        assert_disjoint(&[&a, &b, &c]);
        assert_eq!(pool.used_size(), 768);
        assert_eq!(pool.stats().largest_free_block, 256);
    }

    #[test]
    fn test_defragment_compacts_around_pending_reservation() {
        let pool = pool(2048);
        let first = allocate(&pool, 1, 256);
        let reservation = pool.reserve(2, 256).unwrap();
        let tail = allocate(&pool, 3, 256);
        let last = allocate(&pool, 4, 256);
        pool.release(first.id());
        pool.release(tail.id());

        assert!(pool.defragment(Duration::from_secs(1)));
        // Blocked by the pinned reservation at 256
        assert_eq!(last.offset(), 512);
        let pinned = pool.commit(reservation, NativeResource::Buffer(BufferHandle(2)));
        assert_eq!(pinned.offset(), 256);

        let others: Vec<_> = (10..13).map(|id| allocate(&pool, id, 256)).collect();
        let mut live = vec![&pinned, &last];
        live.extend(others.iter());
        assert_disjoint(&live);
    }

    #[test]
    fn test_resize_keeps_pending_reservation() {
        let pool = pool(1024);
        let _a = allocate(&pool, 1, 256);
        let reservation = pool.reserve(2, 256).unwrap();
        assert!(pool.resize(256).is_err());
        assert!(pool.resize(2048).is_ok());

        let b = pool.commit(reservation, NativeResource::Buffer(BufferHandle(2)));
        let c = allocate(&pool, 3, 256);
        assert_eq!(b.offset(), 256);
        assert_disjoint(&[&b, &c]);
        assert_eq!(pool.used_size(), 768);
    }

    #[test]
    fn test_cancel_returns_placement() {
        let pool = pool(1024);
        let reservation = pool.reserve(1, 512).unwrap();
        assert_eq!(pool.used_size(), 512);
        pool.cancel(reservation);
        assert_eq!(pool.used_size(), 0);
        assert_eq!(pool.active_allocations(), 0);
    }
}
