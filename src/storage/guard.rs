//! Zero-copy read guard into the vector arena's memory map.

use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLockReadGuard;

/// A borrowed view of one vector inside the arena's memory map.
///
/// Holds the mmap's read lock for its lifetime, so no writer can remap out
/// from under it. The epoch check is a debug-time defense-in-depth: the
/// write lock held during growth (see [`super::arena::VectorArena::ensure_capacity`])
/// already guarantees no guard survives a remap, but `as_slice` asserts it
/// explicitly rather than trust that invariant silently.
pub struct VectorSliceGuard<'a> {
    _guard: RwLockReadGuard<'a, memmap2::MmapMut>,
    ptr: *const f32,
    len: usize,
    epoch_ptr: &'a AtomicU64,
    epoch_at_creation: u64,
}

// SAFETY: the guard only exposes read access to `len` `f32`s that remain
// valid for as long as `_guard` (the mmap read lock) is held; no interior
// mutability is reachable through `ptr`.
unsafe impl Send for VectorSliceGuard<'_> {}
unsafe impl Sync for VectorSliceGuard<'_> {}

impl<'a> VectorSliceGuard<'a> {
    pub(super) fn new(
        guard: RwLockReadGuard<'a, memmap2::MmapMut>,
        ptr: *const f32,
        len: usize,
        epoch_ptr: &'a AtomicU64,
    ) -> Self {
        let epoch_at_creation = epoch_ptr.load(Ordering::Acquire);
        Self {
            _guard: guard,
            ptr,
            len,
            epoch_ptr,
            epoch_at_creation,
        }
    }

    /// Returns the borrowed vector as a slice.
    ///
    /// # Panics
    ///
    /// Panics if the arena was remapped after this guard was created. That
    /// would indicate a write guard was not held during growth, an internal
    /// invariant violation rather than a condition callers can trigger.
    #[must_use]
    pub fn as_slice(&self) -> &[f32] {
        let current = self.epoch_ptr.load(Ordering::Acquire);
        assert_eq!(
            current, self.epoch_at_creation,
            "vector guard outlived an arena remap"
        );
        // SAFETY: `ptr`/`len` point into the mmap region covered by `_guard`,
        // which we still hold; the epoch check above confirms no remap
        // invalidated the pointer since this guard was constructed.
        unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
    }
}

impl AsRef<[f32]> for VectorSliceGuard<'_> {
    fn as_ref(&self) -> &[f32] {
        self.as_slice()
    }
}

impl Deref for VectorSliceGuard<'_> {
    type Target = [f32];

    fn deref(&self) -> &Self::Target {
        self.as_slice()
    }
}
