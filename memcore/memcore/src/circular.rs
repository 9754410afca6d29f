//! # Circular Buffer
//!
//! A FIFO byte ring over a [`MemoryLoop`]. The live bytes are
//! `[start, start + len)` modulo the loop's committed size; because the loop's
//! mirror continues past the end, every block of up to
//! [`overflow`](Circular::overflow) bytes is one contiguous slice, wrapped
//! or not.
//!
//! ```text
//!            write head = (start + len) % capacity
//!                      ▼
//!  ├───────────────────┬────────────────────┬─────────────┤
//!  │       free        │ live ──────────────┤   mirror    │
//!  └───────────────────┴────────────────────┴─────────────┘
//!  0                 start                capacity   capacity + overflow
//! ```
//!
//! Producers allocate at the write head; consumers take a [`Bookmark`] and
//! later [`pop_to_bookmark`](Circular::pop_to_bookmark) to release everything
//! before it. A full ring is reported as `Ok(None)`.

use crate::config::LoopConfig;
use crate::memory_loop::MemoryLoop;
use crate::{MemoryError, Result, array_size, byte_add};
use core::ptr::NonNull;
use memcore_platform::PlatformVm;

/// A captured write-head position.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct Bookmark(u64);

impl Bookmark {
    #[inline]
    #[must_use]
    pub const fn offset(self) -> u64 {
        self.0
    }
}

/// Ring buffer over a [`MemoryLoop`]; every block is contiguous even across
/// the wrap.
#[derive(Debug)]
pub struct Circular<P: PlatformVm> {
    memory: MemoryLoop<P>,
    start: u64,
    size: u64,
    pending: u64,
}

#[cfg(any(target_os = "linux", target_os = "android"))]
impl Circular<memcore_platform::SystemVm> {
    /// A ring of at least `requested` bytes whose blocks may be up to
    /// `overflow` bytes long, on the system platform.
    ///
    /// # Errors
    /// See [`MemoryLoop::alloc`].
    pub fn new(requested: u64, overflow: u64) -> Result<Self> {
        Self::with_platform(memcore_platform::SystemVm::new(), requested, overflow)
    }
}

impl<P: PlatformVm> Circular<P> {
    /// # Errors
    /// See [`MemoryLoop::alloc`].
    pub fn with_platform(platform: P, requested: u64, overflow: u64) -> Result<Self> {
        Self::with_config(platform, LoopConfig::default(), requested, overflow)
    }

    /// # Errors
    /// See [`MemoryLoop::alloc`].
    pub fn with_config(
        platform: P,
        config: LoopConfig,
        requested: u64,
        overflow: u64,
    ) -> Result<Self> {
        let mut ring = Self::uninit(platform, config);
        ring.init(requested, overflow)?;
        Ok(ring)
    }

    /// A ring with no memory; [`init`](Self::init) it before use.
    #[must_use]
    pub const fn uninit(platform: P, config: LoopConfig) -> Self {
        Self {
            memory: MemoryLoop::with_config(platform, config),
            start: 0,
            size: 0,
            pending: 0,
        }
    }

    /// Map the underlying loop.
    ///
    /// # Errors
    /// See [`MemoryLoop::alloc`].
    pub fn init(&mut self, requested: u64, overflow: u64) -> Result<()> {
        self.memory.alloc(requested, overflow)?;
        self.start = 0;
        self.size = 0;
        self.pending = 0;
        Ok(())
    }

    #[inline]
    #[must_use]
    pub const fn memory(&self) -> &MemoryLoop<P> {
        &self.memory
    }

    #[inline]
    #[must_use]
    pub const fn is_initialized(&self) -> bool {
        self.memory.is_initialized()
    }

    /// Bytes the ring can hold.
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> u64 {
        self.memory.committed()
    }

    /// Largest single block.
    #[inline]
    #[must_use]
    pub const fn overflow(&self) -> u64 {
        self.memory.mirrored()
    }

    /// Offset of the oldest live byte.
    #[inline]
    #[must_use]
    pub const fn start(&self) -> u64 {
        self.start
    }

    #[inline]
    #[must_use]
    pub const fn len(&self) -> u64 {
        self.size
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.size == 0
    }

    #[inline]
    #[must_use]
    pub const fn free(&self) -> u64 {
        self.capacity() - self.size
    }

    #[inline]
    const fn head(&self) -> u64 {
        (self.start + self.size) % self.capacity()
    }

    /// Address of the write head if `size` more bytes fit, without claiming them.
    ///
    /// # Errors
    /// - [`MemoryError::LoopUninitialized`] if the ring has no memory.
    /// - [`MemoryError::OverflowMargin`] if `size` exceeds
    ///   [`overflow`](Self::overflow), whether or not the ring has room.
    pub fn alloc_begin(&mut self, size: u64) -> Result<Option<NonNull<u8>>> {
        let base = self.memory.as_ptr().ok_or(MemoryError::LoopUninitialized)?;
        if size > self.overflow() {
            return Err(MemoryError::OverflowMargin {
                requested: size,
                margin: self.overflow(),
            });
        }
        if size > self.free() {
            return Ok(None);
        }

        self.pending = size;
        // SAFETY: head < capacity and head + size <= capacity + overflow.
        Ok(Some(unsafe { byte_add(base, self.head()) }))
    }

    /// Claim `actual` bytes of the space opened by
    /// [`alloc_begin`](Self::alloc_begin).
    ///
    /// # Errors
    /// - [`MemoryError::LoopUninitialized`] if the ring has no memory.
    /// - [`MemoryError::AllocEndExceedsBegin`] if `actual` exceeds the begun size.
    pub fn alloc_end(&mut self, actual: u64) -> Result<NonNull<u8>> {
        let base = self.memory.as_ptr().ok_or(MemoryError::LoopUninitialized)?;
        if actual > self.pending {
            return Err(MemoryError::AllocEndExceedsBegin {
                actual,
                begun: self.pending,
            });
        }

        // SAFETY: head < capacity.
        let ptr = unsafe { byte_add(base, self.head()) };
        self.size += actual;
        self.pending = 0;
        Ok(ptr)
    }

    /// Allocate `size` contiguous bytes, or `None` if the ring is too full.
    ///
    /// # Errors
    /// See [`alloc_begin`](Self::alloc_begin).
    pub fn alloc(&mut self, size: u64) -> Result<Option<NonNull<u8>>> {
        match self.alloc_begin(size)? {
            Some(_) => self.alloc_end(size).map(Some),
            None => Ok(None),
        }
    }

    /// # Errors
    /// See [`alloc_begin`](Self::alloc_begin), plus [`MemoryError::SizeOverflow`].
    pub fn alloc_array(&mut self, count: u64, size: u64) -> Result<Option<NonNull<u8>>> {
        self.alloc(array_size(count, size)?)
    }

    /// The current write head.
    #[must_use]
    pub const fn bookmark(&self) -> Bookmark {
        if self.is_initialized() {
            Bookmark(self.head())
        } else {
            Bookmark(0)
        }
    }

    /// Address of the byte at `bookmark`.
    ///
    /// # Errors
    /// - [`MemoryError::LoopUninitialized`] if the ring has no memory.
    /// - [`MemoryError::BookmarkOutOfRange`] if the offset is not inside the ring.
    pub fn data_at(&self, bookmark: Bookmark) -> Result<NonNull<u8>> {
        let base = self.memory.as_ptr().ok_or(MemoryError::LoopUninitialized)?;
        if bookmark.0 >= self.capacity() {
            return Err(self.out_of_range(bookmark));
        }
        // SAFETY: below capacity.
        Ok(unsafe { byte_add(base, bookmark.0) })
    }

    /// Release every live byte before `bookmark`.
    ///
    /// A bookmark equal to [`start`](Self::start) releases nothing, even when
    /// the ring is full and the write head has come around to `start`.
    ///
    /// # Errors
    /// - [`MemoryError::LoopUninitialized`] if the ring has no memory.
    /// - [`MemoryError::BookmarkOutOfRange`] if `bookmark` lies beyond the
    ///   live range.
    pub fn pop_to_bookmark(&mut self, bookmark: Bookmark) -> Result<()> {
        if !self.is_initialized() {
            return Err(MemoryError::LoopUninitialized);
        }
        let capacity = self.capacity();
        if bookmark.0 >= capacity {
            return Err(self.out_of_range(bookmark));
        }

        let distance = if bookmark.0 < self.start {
            bookmark.0 + capacity - self.start
        } else {
            bookmark.0 - self.start
        };
        if distance > self.size {
            return Err(self.out_of_range(bookmark));
        }

        self.start = (self.start + distance) % capacity;
        self.size -= distance;
        Ok(())
    }

    /// Unmap the ring. Every pointer handed out dangles afterwards.
    ///
    /// # Errors
    /// See [`MemoryLoop::dealloc`].
    pub fn deinit(&mut self) -> Result<()> {
        self.start = 0;
        self.size = 0;
        self.pending = 0;
        self.memory.dealloc()
    }

    const fn out_of_range(&self, bookmark: Bookmark) -> MemoryError {
        MemoryError::BookmarkOutOfRange {
            bookmark: bookmark.0,
            start: self.start,
            size: self.size,
        }
    }
}
