#![doc = include_str!("../README.md")]
#![cfg_attr(not(any(test, fuzzing)), no_std)]

extern crate alloc;

mod arena;
mod chunk;
mod handle;
mod list_heap;
mod meta;
mod registry;
mod splay_heap;

pub use chunk::CHUNK_SIZE;
pub use handle::DefragPointer;
pub use list_heap::ListHeap;
pub use splay_heap::SplayHeap;

use meta::BlockMetadata;

/// Chunk index of the permanently allocated sentinel block.
pub(crate) const NULL_INDEX: u32 = 0;

/// Smallest arena a heap will manage, in bytes.
pub(crate) const MIN_HEAP_BYTES: usize = 64;

/// Rounds a requested heap size up to a whole number of chunks and checks
/// the construction contract.
///
/// # Panics
/// Panics if the rounded size is below [`MIN_HEAP_BYTES`] or the chunk
/// count overflows a 31-bit index.
pub(crate) fn heap_chunks(size: usize) -> u32 {
    let mask = CHUNK_SIZE - 1;
    let total = size + ((CHUNK_SIZE - (size & mask)) & mask);
    debug_assert!(total % CHUNK_SIZE == 0);

    assert!(total >= MIN_HEAP_BYTES, "a heap of fewer than 64 bytes is undefined");

    let num_chunks = total / CHUNK_SIZE;
    assert!(
        num_chunks <= BlockMetadata::MAX_NUM_CHUNKS as usize,
        "heap exceeds the 31-bit chunk index space"
    );

    num_chunks as u32
}

/// The operations shared by both heap variants, with the free-block index
/// left to the implementation.
///
/// Allocations are 16-byte aligned and carry one hidden 16-byte header.
/// Raw pointers read through a [`DefragPointer`] are invalidated by any
/// call that can split, merge, or move blocks; re-read the handle instead.
pub trait DefragHeap {
    /// Allocates `num_bytes` from the heap. Returns a null handle when
    /// `num_bytes` is zero or no contiguous free span is large enough.
    fn allocate(&mut self, num_bytes: usize) -> DefragPointer;

    /// Frees the block `ptr` references, detaching every handle pointing
    /// into it (`ptr` included). Null, foreign, misaligned, and stale
    /// pointers are silently ignored.
    fn free(&mut self, ptr: &mut DefragPointer);

    /// Iterates the defragmentation process on the heap; the heap remains
    /// valid for use after each step.
    ///
    /// Returns true if the heap is now fully defragmented.
    fn iterate_defrag(&mut self) -> bool;

    /// Fully defragments the heap.
    fn full_defrag(&mut self) {
        while !self.iterate_defrag() {}
    }

    /// Gets the fragmentation ratio of the heap: 0 if no fragmentation,
    /// approaching 1 if fully fragmented.
    fn fragmentation_ratio(&self) -> f32;

    /// Gets whether the largest free span covers every free chunk.
    fn is_fully_defragmented(&self) -> bool;

    /// The total number of free chunks in the heap.
    fn free_chunks(&self) -> u32;

    /// The size of the largest free block, in chunks.
    fn max_contiguous_free_chunks(&self) -> u32;

    /// Chunks in the arena, reserved blocks included.
    fn total_chunks(&self) -> u32;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn laws_hold_for_both_variants() {
        round_trip(ListHeap::new(1 << 16));
        round_trip(SplayHeap::new(1 << 16));
        defrag_idempotence(ListHeap::new(1 << 16));
        defrag_idempotence(SplayHeap::new(1 << 16));
        relocation_preserves_contents(ListHeap::new(1 << 16));
        relocation_preserves_contents(SplayHeap::new(1 << 16));
    }

    /// `free(allocate(n))` restores `free_chunks`, and a `full_defrag`
    /// restores the max-contiguous statistic.
    fn round_trip<H: DefragHeap>(mut heap: H) {
        let baseline_free = heap.free_chunks();
        let baseline_max = heap.max_contiguous_free_chunks();

        let mut a = heap.allocate(100);
        let mut b = heap.allocate(3000);
        assert!(!a.is_null() && !b.is_null());
        assert!(heap.free_chunks() < baseline_free);

        heap.free(&mut b);
        heap.free(&mut a);
        assert_eq!(heap.free_chunks(), baseline_free);

        heap.full_defrag();
        assert_eq!(heap.max_contiguous_free_chunks(), baseline_max);
        assert_eq!(heap.fragmentation_ratio(), 0.0);
    }

    /// A second `full_defrag` changes nothing observable.
    fn defrag_idempotence<H: DefragHeap>(mut heap: H) {
        let mut handles = Vec::new();
        for _ in 0..16 {
            handles.push(heap.allocate(512));
        }
        for ptr in handles.iter_mut().step_by(3) {
            heap.free(ptr);
        }

        heap.full_defrag();
        let free = heap.free_chunks();
        let max = heap.max_contiguous_free_chunks();
        let addresses: Vec<*mut u8> = handles.iter().map(|h| h.get()).collect();

        heap.full_defrag();
        assert_eq!(heap.free_chunks(), free);
        assert_eq!(heap.max_contiguous_free_chunks(), max);
        let after: Vec<*mut u8> = handles.iter().map(|h| h.get()).collect();
        assert_eq!(addresses, after);
    }

    /// Reading through a handle before and after defragmentation accesses
    /// the same logical bytes even when the address changes.
    fn relocation_preserves_contents<H: DefragHeap>(mut heap: H) {
        let mut handles = Vec::new();
        for tag in 0..24u8 {
            let ptr = heap.allocate(480);
            assert!(!ptr.is_null());
            unsafe { ptr.get().write_bytes(tag, 480) };
            handles.push(ptr);
        }
        for ptr in handles.iter_mut().step_by(2) {
            heap.free(ptr);
        }

        heap.full_defrag();
        assert!(heap.is_fully_defragmented());

        for (tag, ptr) in handles.iter().enumerate().skip(1).step_by(2) {
            let p = ptr.get();
            assert!(!p.is_null());
            for off in [0, 479] {
                assert_eq!(unsafe { p.add(off).read() }, tag as u8);
            }
        }
    }
}
