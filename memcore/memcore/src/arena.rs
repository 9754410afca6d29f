//! # Frame Arena
//!
//! A bump allocator over one [`Region`]. Allocations only move a cursor
//! forward; memory comes back by popping whole *frames*.
//!
//! ## Frames
//!
//! [`push`](Arena::push) stores the enclosing frame's bookkeeping as a 16-byte
//! header *inside the arena*, right where the new frame begins. There is no
//! side table; the frame stack is an intrusive list threaded through the
//! arena's own memory.
//!
//! ```text
//!  0          16         32         40         56
//!  ├──────────┼──────────┼──────────┼──────────┼────────┄
//!  │ frame 0  │ header 1 │ frame 1  │ header 2 │ frame 2 ...
//!  │ payload  │{0, 16}   │ payload  │{32, 8}   │
//!  └──────────┴──────────┴──────────┴──────────┴────────┄
//!                        ▲ frame_start after 1st push
//! ```
//!
//! [`pop`](Arena::pop) reads the header just below the current frame start,
//! rewinds the cursor to the header itself and restores the enclosing frame.
//!
//! Popping is a pure rewind. Values created with [`place`](Arena::place) are
//! **never dropped**; callers that place types with meaningful `Drop`
//! implementations must drop them in place before popping their frame.

use crate::config::ArenaConfig;
use crate::info::ARENA_FRAME_HEADER_SIZE;
use crate::region::Region;
use crate::{MemoryError, Result, array_size, byte_add};
use core::ptr::NonNull;
use log::{debug, trace, warn};
use memcore_addresses::{VirtualAddress, align_up};
use memcore_platform::PlatformVm;

/// Inline record of the enclosing frame.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
struct FrameHeader {
    start: u64,
    size: u64,
}

const _: () = assert!(size_of::<FrameHeader>() as u64 == ARENA_FRAME_HEADER_SIZE);

/// Frame-scoped bump allocator over one reserved [`Region`].
#[derive(Debug)]
pub struct Arena<P: PlatformVm> {
    region: Region<P>,
    config: ArenaConfig,
    /// Bytes in use across all live frames.
    size: u64,
    /// Offset of the innermost frame.
    frame_start: u64,
    /// Bytes used by the innermost frame.
    frame_size: u64,
    depth: usize,
    /// Size passed to the outstanding `alloc_begin`.
    pending: u64,
}

#[cfg(any(target_os = "linux", target_os = "android"))]
impl Arena<memcore_platform::SystemVm> {
    /// Reserve `reserved` bytes on the system platform with default tuning.
    ///
    /// # Errors
    /// See [`Arena::with_config`].
    pub fn new(reserved: u64) -> Result<Self> {
        Self::with_platform(memcore_platform::SystemVm::new(), reserved)
    }
}

impl<P: PlatformVm> Arena<P> {
    /// # Errors
    /// See [`Arena::with_config`].
    pub fn with_platform(platform: P, reserved: u64) -> Result<Self> {
        Self::with_config(platform, reserved, ArenaConfig::default())
    }

    /// Reserve `reserved` bytes and commit the first
    /// [`commit_quantum`](ArenaConfig::commit_quantum) of them.
    ///
    /// # Errors
    /// - [`MemoryError::ZeroSize`] for an empty reservation.
    /// - [`MemoryError::Platform`] if reserving or committing fails.
    pub fn with_config(platform: P, reserved: u64, config: ArenaConfig) -> Result<Self> {
        let mut arena = Self::uninit(platform, config);
        arena.init(reserved)?;
        Ok(arena)
    }

    /// An arena with no reservation; [`init`](Self::init) it before use.
    #[must_use]
    pub const fn uninit(platform: P, config: ArenaConfig) -> Self {
        Self {
            region: Region::new(platform),
            config,
            size: 0,
            frame_start: 0,
            frame_size: 0,
            depth: 0,
            pending: 0,
        }
    }

    /// Reserve `reserved` bytes and commit the first
    /// [`commit_quantum`](ArenaConfig::commit_quantum) of them. Also brings an
    /// arena back after [`deinit`](Self::deinit).
    ///
    /// # Errors
    /// - [`MemoryError::RegionAlreadyReserved`] if the arena is initialized.
    /// - [`MemoryError::ZeroSize`] for an empty reservation.
    /// - [`MemoryError::Platform`] if reserving or committing fails; nothing
    ///   stays reserved.
    pub fn init(&mut self, reserved: u64) -> Result<()> {
        self.region.reserve(reserved)?;
        if let Err(e) = self.region.commit(self.config.commit_quantum().min(reserved)) {
            if let Err(release) = self.region.dealloc() {
                warn!("arena: leaking reservation: {release}");
            }
            return Err(e);
        }

        self.size = 0;
        self.frame_start = 0;
        self.frame_size = 0;
        self.depth = 0;
        self.pending = 0;
        Ok(())
    }

    #[inline]
    #[must_use]
    pub const fn config(&self) -> ArenaConfig {
        self.config
    }

    /// Bytes in use across all frames, including frame headers.
    #[inline]
    #[must_use]
    pub const fn size(&self) -> u64 {
        self.size
    }

    /// Bytes in use by the innermost frame.
    #[inline]
    #[must_use]
    pub const fn frame_size(&self) -> u64 {
        self.frame_size
    }

    /// Number of pushed frames; `0` means only the outermost frame is live.
    #[inline]
    #[must_use]
    pub const fn depth(&self) -> usize {
        self.depth
    }

    #[inline]
    #[must_use]
    pub const fn reserved(&self) -> u64 {
        self.region.reserved()
    }

    #[inline]
    #[must_use]
    pub const fn committed(&self) -> u64 {
        self.region.committed()
    }

    /// First byte of the arena; `None` after [`deinit`](Self::deinit).
    #[inline]
    #[must_use]
    pub const fn base(&self) -> Option<NonNull<u8>> {
        self.region.start()
    }

    /// Offset of `ptr` from the arena base, if it points into the reservation.
    #[must_use]
    pub fn offset_of<T>(&self, ptr: NonNull<T>) -> Option<u64> {
        let base = VirtualAddress::from_nonnull(self.base()?);
        VirtualAddress::from_nonnull(ptr)
            .offset_from(base)
            .filter(|&off| off < self.reserved())
    }

    /// Make room for up to `size` bytes at the cursor without claiming them.
    ///
    /// Grows the committed window by doubling, at most
    /// [`max_commit_step`](ArenaConfig::max_commit_step) per step. Finish with
    /// [`alloc_end`](Self::alloc_end).
    ///
    /// # Errors
    /// - [`MemoryError::ArenaExhausted`] if the reservation is too small.
    /// - [`MemoryError::RegionUninitialized`] after [`deinit`](Self::deinit).
    /// - [`MemoryError::Platform`] if committing fails.
    pub fn alloc_begin(&mut self, size: u64) -> Result<NonNull<u8>> {
        let base = self.base().ok_or(MemoryError::RegionUninitialized)?;
        let reserved = self.reserved();
        let end = match self.size.checked_add(size) {
            Some(end) if end <= reserved => end,
            _ => {
                return Err(MemoryError::ArenaExhausted {
                    size: self.size,
                    requested: size,
                    reserved,
                });
            }
        };

        let committed = self.committed();
        if end > committed {
            let step = self.config.max_commit_step().max(1);
            let mut target = committed.max(self.config.commit_quantum()).max(1);
            while target < end {
                target = target.saturating_add(target.min(step));
            }
            let target = target.min(reserved);
            trace!("arena: growing commit {committed:#X} -> {target:#X}");
            self.region.commit(target)?;
        }

        self.pending = size;
        // SAFETY: `self.size <= end <= reserved`.
        Ok(unsafe { byte_add(base, self.size) })
    }

    /// Claim `actual` bytes of the space opened by the last
    /// [`alloc_begin`](Self::alloc_begin) and return their address.
    ///
    /// # Errors
    /// - [`MemoryError::AllocEndExceedsBegin`] if `actual` exceeds the begun size.
    /// - [`MemoryError::RegionUninitialized`] after [`deinit`](Self::deinit).
    pub fn alloc_end(&mut self, actual: u64) -> Result<NonNull<u8>> {
        let base = self.base().ok_or(MemoryError::RegionUninitialized)?;
        if actual > self.pending {
            return Err(MemoryError::AllocEndExceedsBegin {
                actual,
                begun: self.pending,
            });
        }

        // SAFETY: `alloc_begin` checked `size + pending <= reserved`.
        let ptr = unsafe { byte_add(base, self.size) };
        self.size += actual;
        self.frame_size += actual;
        self.pending = 0;
        Ok(ptr)
    }

    /// Allocate `size` bytes in the current frame.
    ///
    /// # Errors
    /// See [`alloc_begin`](Self::alloc_begin).
    pub fn alloc(&mut self, size: u64) -> Result<NonNull<u8>> {
        self.alloc_begin(size)?;
        self.alloc_end(size)
    }

    /// Allocate `count` elements of `size` bytes.
    ///
    /// # Errors
    /// See [`alloc_begin`](Self::alloc_begin), plus [`MemoryError::SizeOverflow`].
    pub fn alloc_array(&mut self, count: u64, size: u64) -> Result<NonNull<u8>> {
        self.alloc(array_size(count, size)?)
    }

    /// Allocate `size` bytes at an address aligned to `align`, padding the
    /// cursor as needed. The padding counts towards the frame.
    ///
    /// # Errors
    /// [`MemoryError::InvalidAlignment`] unless `align` is a power of two;
    /// otherwise see [`alloc_begin`](Self::alloc_begin).
    pub fn alloc_aligned(&mut self, size: u64, align: usize) -> Result<NonNull<u8>> {
        if !align.is_power_of_two() {
            return Err(MemoryError::InvalidAlignment { align });
        }
        let base = self.base().ok_or(MemoryError::RegionUninitialized)?;

        let cursor = VirtualAddress::from_nonnull(base).as_u64() + self.size;
        let padding = align_up(cursor, align as u64) - cursor;
        let total = padding
            .checked_add(size)
            .ok_or(MemoryError::SizeOverflow { count: 1, size })?;

        let ptr = self.alloc(total)?;
        // SAFETY: `padding <= total` bytes were just claimed at `ptr`.
        Ok(unsafe { byte_add(ptr, padding) })
    }

    /// Move `value` into the current frame.
    ///
    /// The value is **not** dropped when its frame is popped or the arena is
    /// deinitialized.
    ///
    /// # Errors
    /// See [`alloc_aligned`](Self::alloc_aligned).
    pub fn place<T>(&mut self, value: T) -> Result<NonNull<T>> {
        let ptr = self
            .alloc_aligned(size_of::<T>() as u64, align_of::<T>())?
            .cast::<T>();
        // SAFETY: freshly claimed, committed, aligned for `T`.
        unsafe { ptr.write(value) };
        Ok(ptr)
    }

    /// Open a new innermost frame.
    ///
    /// # Errors
    /// See [`alloc_begin`](Self::alloc_begin); the header needs 16 bytes.
    pub fn push(&mut self) -> Result<()> {
        let header = FrameHeader {
            start: self.frame_start,
            size: self.frame_size,
        };
        let ptr = self.alloc(ARENA_FRAME_HEADER_SIZE)?;
        // SAFETY: 16 freshly claimed bytes; the cursor carries no alignment.
        unsafe { ptr.cast::<FrameHeader>().write_unaligned(header) };

        self.frame_start = self.size;
        self.frame_size = 0;
        self.depth += 1;
        Ok(())
    }

    /// Discard the innermost frame, including its header.
    ///
    /// Pointers into the popped frame dangle afterwards; the next allocation
    /// reuses their bytes.
    ///
    /// # Errors
    /// - [`MemoryError::OutermostFrame`] if no frame was pushed.
    /// - [`MemoryError::RegionUninitialized`] after [`deinit`](Self::deinit).
    pub fn pop(&mut self) -> Result<()> {
        if self.depth == 0 {
            return Err(MemoryError::OutermostFrame);
        }
        let base = self.base().ok_or(MemoryError::RegionUninitialized)?;

        let at = self.frame_start - ARENA_FRAME_HEADER_SIZE;
        // SAFETY: `push` wrote a header right below every frame start.
        let header = unsafe { byte_add(base, at).cast::<FrameHeader>().read_unaligned() };
        debug_assert_eq!(self.size, self.frame_start + self.frame_size);

        self.size -= self.frame_size + ARENA_FRAME_HEADER_SIZE;
        self.frame_start = header.start;
        self.frame_size = header.size;
        self.depth -= 1;
        self.pending = 0;
        Ok(())
    }

    /// Return committed pages the live allocations do not need, keeping at
    /// least [`commit_quantum`](ArenaConfig::commit_quantum) committed.
    /// Space opened by an unfinished [`alloc_begin`](Self::alloc_begin) counts
    /// as live.
    ///
    /// # Errors
    /// [`MemoryError::Platform`] if decommitting fails.
    pub fn trim(&mut self) -> Result<()> {
        let keep = self
            .size
            .saturating_add(self.pending)
            .max(self.config.commit_quantum());
        // SAFETY: nothing handed out or begun lives at or beyond `keep`.
        unsafe { self.region.revert(keep) }
    }

    /// Release the reservation. Every pointer handed out dangles afterwards.
    ///
    /// # Errors
    /// [`MemoryError::Platform`] if releasing fails; the arena is unchanged.
    pub fn deinit(&mut self) -> Result<()> {
        self.region.dealloc()?;
        debug!("arena: deinitialized with {} live frames", self.depth);
        self.size = 0;
        self.frame_start = 0;
        self.frame_size = 0;
        self.depth = 0;
        self.pending = 0;
        Ok(())
    }
}
