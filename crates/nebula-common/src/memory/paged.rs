//! Paged slices drawn from a shared accounting pool.
//!
//! A [`PagedSlice`] is a growable, exclusively-owned byte region whose
//! capacity always advances in whole pages. Writes beyond the current
//! capacity extend it; the region is released as a whole when the slice is
//! dropped. The owning [`Pool`] tracks total reserved bytes across all live
//! slices so a node can report its memory pressure.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Default page size for slice growth (64 KB).
const DEFAULT_PAGE_SIZE: usize = 64 * 1024;

/// A process-wide accounting pool for paged slices.
///
/// The pool is a value owned by the daemon's runtime, not a global; tests
/// construct their own.
#[derive(Debug)]
pub struct Pool {
    page_size: usize,
    reserved: AtomicUsize,
}

impl Default for Pool {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE_SIZE)
    }
}

impl Pool {
    /// Creates a pool handing out slices with the given page size.
    ///
    /// # Panics
    ///
    /// Panics if `page_size` is zero.
    #[must_use]
    pub fn new(page_size: usize) -> Self {
        assert!(page_size > 0, "page size must be non-zero");
        Self {
            page_size,
            reserved: AtomicUsize::new(0),
        }
    }

    /// Creates a pool wrapped in `Arc` for sharing across block owners.
    #[must_use]
    pub fn shared(page_size: usize) -> Arc<Self> {
        Arc::new(Self::new(page_size))
    }

    /// Total bytes currently reserved by live slices.
    #[must_use]
    pub fn reserved(&self) -> usize {
        self.reserved.load(Ordering::Relaxed)
    }

    /// The page size used for slice growth.
    #[inline]
    #[must_use]
    pub const fn page_size(&self) -> usize {
        self.page_size
    }

    /// Creates a new empty slice drawing from this pool.
    #[must_use]
    pub fn slice(self: &Arc<Self>) -> PagedSlice {
        PagedSlice {
            pool: Arc::clone(self),
            data: Vec::new(),
        }
    }

    fn grow(&self, bytes: usize) {
        self.reserved.fetch_add(bytes, Ordering::Relaxed);
    }

    fn shrink(&self, bytes: usize) {
        self.reserved.fetch_sub(bytes, Ordering::Relaxed);
    }
}

/// A growable byte region with page-granular capacity.
///
/// Ownership is exclusive; cloning is deliberately not provided. The whole
/// region is returned to the pool's accounting when the slice drops.
#[derive(Debug)]
pub struct PagedSlice {
    pool: Arc<Pool>,
    data: Vec<u8>,
}

impl PagedSlice {
    /// Current capacity in bytes (always a multiple of the page size).
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }

    /// Number of bytes written so far.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if nothing has been written.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Ensures capacity for at least `size` bytes, growing in whole pages.
    pub fn reserve(&mut self, size: usize) {
        let page = self.pool.page_size;
        if size <= self.data.capacity() {
            return;
        }
        let pages = size.div_ceil(page);
        let target = pages * page;
        let before = self.data.capacity();
        self.data.reserve_exact(target - self.data.len());
        self.pool.grow(self.data.capacity() - before);
    }

    /// Writes `bytes` at `position`, extending the slice as needed.
    ///
    /// Returns the new logical length. A gap between the current end and
    /// `position` is zero-filled.
    pub fn write(&mut self, position: usize, bytes: &[u8]) -> usize {
        let end = position + bytes.len();
        self.reserve(end);
        if position > self.data.len() {
            self.data.resize(position, 0);
        }
        if end > self.data.len() {
            self.data.resize(end, 0);
        }
        self.data[position..end].copy_from_slice(bytes);
        self.data.len()
    }

    /// Reads `len` bytes at `position`, or `None` if out of bounds.
    #[must_use]
    pub fn read(&self, position: usize, len: usize) -> Option<&[u8]> {
        self.data.get(position..position + len)
    }

    /// The written bytes as a contiguous slice.
    #[inline]
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

impl Drop for PagedSlice {
    fn drop(&mut self) {
        self.pool.shrink(self.data.capacity());
    }
}
