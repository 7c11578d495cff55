//! Fixed-capacity memory chunks backing the elastic storage
//!
//! A [`Chunk`] is a raw, fixed-size allocation obtained directly from the
//! system allocator, bypassing any collection-managed growth. Chunks are
//! owned exclusively by the [`ElasticStorage`](super::ElasticStorage) that
//! allocated them and are returned to the allocator when dropped (on
//! `clear()` or when a purge swaps in a compacted chunk sequence).

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::ptr::NonNull;

use crate::error::{Error, Result};

/// A fixed-capacity contiguous memory region.
///
/// The region is:
/// - allocated once, never resized or moved,
/// - zero-initialized (reads of never-written ranges are deterministic),
/// - freed automatically when the `Chunk` is dropped.
pub struct Chunk {
    /// Non-null pointer to the region
    ptr: NonNull<u8>,
    /// Capacity of the region in bytes
    capacity: usize,
}

// SAFETY: Chunk owns its memory exclusively and can be sent between threads.
unsafe impl Send for Chunk {}

// SAFETY: shared references only permit reads (`read_into` takes `&self`);
// all mutation goes through `&mut self`. The elastic storage serializes
// writers against readers with its own lock.
unsafe impl Sync for Chunk {}

impl Chunk {
    /// Allocate a new zero-initialized chunk of `capacity` bytes.
    ///
    /// # Errors
    ///
    /// Returns `Error::AllocationFailed` if `capacity` is 0 or the system
    /// allocator cannot satisfy the request. Allocation failure is not
    /// retried.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::AllocationFailed {
                size: capacity,
                reason: "capacity must be greater than 0".into(),
            });
        }

        let layout = Layout::array::<u8>(capacity).map_err(|e| Error::AllocationFailed {
            size: capacity,
            reason: e.to_string(),
        })?;

        // SAFETY: layout has non-zero size (checked above).
        let ptr = unsafe { alloc_zeroed(layout) };

        NonNull::new(ptr)
            .map(|ptr| Self { ptr, capacity })
            .ok_or_else(|| Error::AllocationFailed {
                size: capacity,
                reason: "allocator returned null".into(),
            })
    }

    /// Capacity of this chunk in bytes.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Copy `data` into the chunk starting at `offset`.
    ///
    /// The caller guarantees `offset + data.len() <= capacity`; the elastic
    /// storage's positional addressing always splits values so each write
    /// fits the chunk it lands in.
    #[inline]
    pub fn write_at(&mut self, offset: usize, data: &[u8]) {
        debug_assert!(offset + data.len() <= self.capacity);
        // SAFETY: the range is in bounds per the caller contract and we have
        // exclusive access through &mut self.
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), self.ptr.as_ptr().add(offset), data.len());
        }
    }

    /// Copy `out.len()` bytes starting at `offset` into `out`.
    #[inline]
    pub fn read_into(&self, offset: usize, out: &mut [u8]) {
        debug_assert!(offset + out.len() <= self.capacity);
        // SAFETY: the range is in bounds per the caller contract; concurrent
        // readers are fine because shared access never mutates.
        unsafe {
            std::ptr::copy_nonoverlapping(self.ptr.as_ptr().add(offset), out.as_mut_ptr(), out.len());
        }
    }
}

impl Drop for Chunk {
    fn drop(&mut self) {
        // SAFETY: ptr was allocated with this exact layout and is freed once.
        unsafe {
            let layout = Layout::from_size_align_unchecked(self.capacity, 1);
            dealloc(self.ptr.as_ptr(), layout);
        }
    }
}

impl std::fmt::Debug for Chunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chunk")
            .field("capacity", &self.capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_zero_capacity_error() {
        assert_matches!(Chunk::new(0), Err(Error::AllocationFailed { size: 0, .. }));
    }

    #[test]
    fn test_chunk_is_zeroed() {
        let chunk = Chunk::new(128).unwrap();
        let mut out = [0xFFu8; 128];
        chunk.read_into(0, &mut out);
        assert!(out.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_write_read_roundtrip() {
        let mut chunk = Chunk::new(4096).unwrap();
        chunk.write_at(100, b"hello chunk");

        let mut out = [0u8; 11];
        chunk.read_into(100, &mut out);
        assert_eq!(&out, b"hello chunk");
    }

    #[test]
    fn test_write_at_boundary() {
        let mut chunk = Chunk::new(64).unwrap();
        chunk.write_at(60, &[1, 2, 3, 4]);

        let mut out = [0u8; 4];
        chunk.read_into(60, &mut out);
        assert_eq!(out, [1, 2, 3, 4]);
    }
}
