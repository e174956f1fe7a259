//! Offset allocator: a first-fit symbolic allocator over an abstract byte
//! address space. Never touches device memory until `get_ptr` is called —
//! `alloc`/`free` only ever move offsets around in `free_blocks`.
//!
//! Grounded line-for-line on the original `Allocator::alloc`/`free`/`getPtr`
//! (see `DESIGN.md`): first-fit scan of an offset-ordered free map, two-sided
//! coalescing on `free`, high-water-mark tracking, and a backing pointer that
//! is materialized lazily and exactly once.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, instrument};

use crate::errors::{GPError, GPResult};
use crate::runtime::{Runtime, RuntimePtr};

const DEFAULT_ALIGNMENT: usize = 8; // size_of::<u64>(): the widest element type this core tracks.

/// Symbolic byte allocator backing a single `Graph`'s memory plan.
pub struct OffsetAllocator {
    runtime: Arc<dyn Runtime>,
    used: usize,
    peak: usize,
    alignment: usize,
    free_blocks: BTreeMap<usize, usize>,
    ptr: Option<RuntimePtr>,
}

impl OffsetAllocator {
    pub fn new(runtime: Arc<dyn Runtime>) -> Self {
        Self {
            runtime,
            used: 0,
            peak: 0,
            alignment: DEFAULT_ALIGNMENT,
            free_blocks: BTreeMap::new(),
            ptr: None,
        }
    }

    pub fn with_alignment(runtime: Arc<dyn Runtime>, alignment: usize) -> Self {
        Self {
            alignment,
            ..Self::new(runtime)
        }
    }

    pub fn used(&self) -> usize {
        self.used
    }

    pub fn peak(&self) -> usize {
        self.peak
    }

    pub fn alignment(&self) -> usize {
        self.alignment
    }

    pub fn is_frozen(&self) -> bool {
        self.ptr.is_some()
    }

    fn aligned_size(&self, size: usize) -> usize {
        if size == 0 {
            return 0;
        }
        ((size - 1) / self.alignment + 1) * self.alignment
    }

    /// First-fit allocation. Returns the byte offset of a block at least
    /// `size` bytes long.
    #[instrument(skip(self))]
    pub fn alloc(&mut self, size: usize) -> GPResult<usize> {
        if self.is_frozen() {
            return Err(GPError::FrozenAllocator);
        }
        let size = self.aligned_size(size);

        if let Some((&start, &len)) = self.free_blocks.iter().find(|(_, &len)| len >= size) {
            self.free_blocks.remove(&start);
            let remain = len - size;
            if remain > 0 {
                self.free_blocks.insert(start + size, remain);
            }
            debug!(offset = start, size, "alloc: reused free block");
            return Ok(start);
        }

        let start = self.used;
        self.used += size;
        self.peak = self.peak.max(self.used);
        debug!(offset = start, size, "alloc: grew high-water mark");
        Ok(start)
    }

    /// Returns a previously allocated block to the free list, coalescing
    /// with its offset-adjacent neighbors on both sides.
    #[instrument(skip(self))]
    pub fn free(&mut self, offset: usize, size: usize) -> GPResult<()> {
        if self.is_frozen() {
            return Err(GPError::FrozenAllocator);
        }
        let size = self.aligned_size(size);
        self.used -= size;

        let mut start = offset;
        let mut len = size;

        // Merge with the immediately preceding free block, if contiguous.
        if let Some((&prev_start, &prev_len)) = self.free_blocks.range(..start).next_back() {
            if prev_start + prev_len == start {
                self.free_blocks.remove(&prev_start);
                start = prev_start;
                len += prev_len;
            }
        }

        // Merge with the immediately following free block, if contiguous.
        if let Some((&next_start, &next_len)) = self.free_blocks.range(start..).next() {
            if start + len == next_start {
                self.free_blocks.remove(&next_start);
                len += next_len;
            }
        }

        self.free_blocks.insert(start, len);
        debug!(start, len, "free: coalesced");
        Ok(())
    }

    /// Materializes the single backing buffer, sized to `peak`, on first
    /// call; returns the cached pointer on every later call. Once called,
    /// `alloc`/`free` refuse further calls.
    #[instrument(skip(self))]
    pub fn get_ptr(&mut self) -> GPResult<RuntimePtr> {
        if let Some(ptr) = self.ptr {
            return Ok(ptr);
        }
        let ptr = self.runtime.alloc(self.peak)?;
        self.ptr = Some(ptr);
        debug!(peak = self.peak, "get_ptr: realized backing buffer");
        Ok(ptr)
    }
}

impl Drop for OffsetAllocator {
    fn drop(&mut self) {
        if let Some(ptr) = self.ptr.take() {
            self.runtime.dealloc(ptr, self.peak);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::HeapRuntime;
    use std::sync::Arc;

    fn new_allocator() -> OffsetAllocator {
        OffsetAllocator::new(Arc::new(HeapRuntime::default()))
    }

    #[test]
    fn alignment_rounds_up() {
        let mut a = new_allocator();
        assert_eq!(a.alloc(1).unwrap(), 0);
        assert_eq!(a.used(), 8);
        assert_eq!(a.alloc(8).unwrap(), 8);
        assert_eq!(a.used(), 16);
    }

    #[test]
    fn planner_offsets_s5() {
        let mut a = new_allocator();
        let o1 = a.alloc(24).unwrap();
        let o2 = a.alloc(40).unwrap();
        let o3 = a.alloc(16).unwrap();
        assert_eq!((o1, o2, o3), (0, 24, 64));
        assert_eq!(a.peak(), 80);
    }

    #[test]
    fn free_and_coalesce_s6() {
        let mut a = new_allocator();
        let addr_a = a.alloc(16).unwrap();
        let addr_b = a.alloc(32).unwrap();
        let _addr_c = a.alloc(16).unwrap();
        a.free(addr_a, 16).unwrap();
        a.free(addr_b, 32).unwrap();

        assert_eq!(a.free_blocks.len(), 1);
        assert_eq!(a.free_blocks[&0], 48);

        let peak_before = a.peak();
        let reused = a.alloc(48).unwrap();
        assert_eq!(reused, 0);
        assert_eq!(a.peak(), peak_before);
    }

    #[test]
    fn free_blocks_never_touch_or_overlap() {
        let mut a = new_allocator();
        let offs: Vec<usize> = (0..5).map(|_| a.alloc(16).unwrap()).collect();
        for &o in &offs {
            a.free(o, 16).unwrap();
        }
        assert_eq!(a.free_blocks.len(), 1);
        assert_eq!(a.free_blocks[&0], 80);
    }

    #[test]
    fn alloc_after_get_ptr_is_frozen() {
        let mut a = new_allocator();
        a.alloc(8).unwrap();
        a.get_ptr().unwrap();
        assert!(matches!(a.alloc(8), Err(GPError::FrozenAllocator)));
        assert!(matches!(a.free(0, 8), Err(GPError::FrozenAllocator)));
    }

    #[test]
    fn get_ptr_is_cached() {
        let mut a = new_allocator();
        a.alloc(8).unwrap();
        let p1 = a.get_ptr().unwrap();
        let p2 = a.get_ptr().unwrap();
        assert_eq!(p1, p2);
    }

    #[test]
    fn zero_size_alloc_is_noop() {
        let mut a = new_allocator();
        assert_eq!(a.alloc(0).unwrap(), 0);
        assert_eq!(a.used(), 0);
        assert_eq!(a.peak(), 0);
    }
}
