//! # Reserved Address Ranges
//!
//! A [`Region`] owns one reservation and a *committed prefix* of it:
//!
//! ```text
//!  start                      committed                 reserved
//!    │◄──────── read/write ──────►│◄────── no access ──────►│
//!    ├────────────────────────────┼─────────────────────────┤
//! ```
//!
//! `committed` is the byte count callers asked for. The platform works in
//! pages, so the accessible range actually ends at the next page boundary;
//! [`commit`](Region::commit) and [`revert`](Region::revert) only touch pages
//! whose state really changes.

use crate::{MemoryError, Result, array_size};
use core::ptr::NonNull;
use log::{debug, warn};
use memcore_addresses::{VirtualAddress, align_up};
use memcore_platform::PlatformVm;

/// A reserved address range whose first `committed` bytes are backed.
pub struct Region<P: PlatformVm> {
    platform: P,
    start: Option<NonNull<u8>>,
    reserved: u64,
    committed: u64,
}

impl<P: PlatformVm> Region<P> {
    /// An uninitialized region.
    #[must_use]
    pub const fn new(platform: P) -> Self {
        Self {
            platform,
            start: None,
            reserved: 0,
            committed: 0,
        }
    }

    #[inline]
    #[must_use]
    pub const fn platform(&self) -> &P {
        &self.platform
    }

    /// First byte of the reservation, if any.
    #[inline]
    #[must_use]
    pub const fn start(&self) -> Option<NonNull<u8>> {
        self.start
    }

    #[inline]
    #[must_use]
    pub const fn reserved(&self) -> u64 {
        self.reserved
    }

    #[inline]
    #[must_use]
    pub const fn committed(&self) -> u64 {
        self.committed
    }

    #[inline]
    #[must_use]
    pub const fn is_initialized(&self) -> bool {
        self.start.is_some()
    }

    /// Reserve `size` bytes of address space with no access rights.
    ///
    /// # Errors
    /// - [`MemoryError::RegionAlreadyReserved`] if the region is initialized.
    /// - [`MemoryError::ZeroSize`] for an empty request.
    /// - [`MemoryError::Platform`] if the OS refuses.
    pub fn reserve(&mut self, size: u64) -> Result<()> {
        if self.is_initialized() {
            return Err(MemoryError::RegionAlreadyReserved);
        }
        if size == 0 {
            return Err(MemoryError::ZeroSize);
        }

        let mapped = self.mapped_size(size)?;
        let address = self.platform.reserve(mapped)?;
        let Some(start) = address.as_nonnull::<u8>() else {
            return Err(MemoryError::RegionUninitialized);
        };

        debug!("region: reserved {size:#X} bytes at {address}");
        self.start = Some(start);
        self.reserved = size;
        self.committed = 0;
        Ok(())
    }

    /// [`reserve`](Self::reserve) for `count` elements of `size` bytes.
    ///
    /// # Errors
    /// As [`reserve`](Self::reserve), plus [`MemoryError::SizeOverflow`].
    pub fn reserve_array(&mut self, count: u64, size: u64) -> Result<()> {
        self.reserve(array_size(count, size)?)
    }

    /// Grow the committed prefix to `new_size` bytes.
    ///
    /// A `new_size` at or below the current boundary changes nothing.
    ///
    /// # Errors
    /// - [`MemoryError::RegionUninitialized`] if nothing is reserved.
    /// - [`MemoryError::CommitBeyondReserved`] if `new_size > reserved`.
    /// - [`MemoryError::Platform`] if the OS refuses; the boundary is unchanged.
    pub fn commit(&mut self, new_size: u64) -> Result<()> {
        let start = self.start.ok_or(MemoryError::RegionUninitialized)?;
        if new_size > self.reserved {
            return Err(MemoryError::CommitBeyondReserved {
                requested: new_size,
                reserved: self.reserved,
            });
        }
        if new_size <= self.committed {
            return Ok(());
        }

        let page = self.platform.page_granularity().get();
        let from = align_up(self.committed, page);
        let to = align_up(new_size, page);
        if to > from {
            // SAFETY: [from, to) lies below the page-rounded reservation size.
            unsafe {
                self.platform
                    .commit(VirtualAddress::from_nonnull(start) + from, to - from)?;
            }
        }

        self.committed = new_size;
        Ok(())
    }

    /// [`commit`](Self::commit) for `count` elements of `size` bytes.
    ///
    /// # Errors
    /// As [`commit`](Self::commit), plus [`MemoryError::SizeOverflow`].
    pub fn commit_array(&mut self, count: u64, size: u64) -> Result<()> {
        self.commit(array_size(count, size)?)
    }

    /// Shrink the committed prefix to `new_size` bytes, returning whole pages
    /// above it to the OS. A `new_size` at or above the boundary is a no-op.
    ///
    /// # Safety
    /// No live reference may point at or beyond the page boundary following
    /// `new_size`; the pages there lose their access rights and contents.
    ///
    /// # Errors
    /// - [`MemoryError::RegionUninitialized`] if nothing is reserved.
    /// - [`MemoryError::Platform`] if the OS refuses; the boundary is unchanged.
    pub unsafe fn revert(&mut self, new_size: u64) -> Result<()> {
        let start = self.start.ok_or(MemoryError::RegionUninitialized)?;
        if new_size >= self.committed {
            return Ok(());
        }

        let page = self.platform.page_granularity().get();
        let from = align_up(new_size, page);
        let to = align_up(self.committed, page);
        if to > from {
            // SAFETY: the caller vouches for [from, to); it lies inside the reservation.
            unsafe {
                self.platform
                    .decommit(VirtualAddress::from_nonnull(start) + from, to - from)?;
            }
        }

        self.committed = new_size;
        Ok(())
    }

    /// [`revert`](Self::revert) for `count` elements of `size` bytes.
    ///
    /// # Safety
    /// See [`revert`](Self::revert).
    ///
    /// # Errors
    /// As [`revert`](Self::revert), plus [`MemoryError::SizeOverflow`].
    pub unsafe fn revert_array(&mut self, count: u64, size: u64) -> Result<()> {
        let size = array_size(count, size)?;
        unsafe { self.revert(size) }
    }

    /// Release the whole reservation. No-op if uninitialized.
    ///
    /// # Errors
    /// [`MemoryError::Platform`] if the OS refuses; the region stays initialized.
    pub fn dealloc(&mut self) -> Result<()> {
        let Some(start) = self.start else {
            return Ok(());
        };

        let mapped = self.mapped_size(self.reserved)?;
        let address = VirtualAddress::from_nonnull(start);
        // SAFETY: exactly the range `reserve` obtained. Outstanding pointers
        // into it are tied to `&mut self`/ownership by the allocators above.
        unsafe { self.platform.release(address, mapped)? };

        debug!("region: released {:#X} bytes at {address}", self.reserved);
        self.start = None;
        self.reserved = 0;
        self.committed = 0;
        Ok(())
    }

    fn mapped_size(&self, size: u64) -> Result<u64> {
        self.platform
            .page_granularity()
            .round_up(size)
            .ok_or(MemoryError::SizeOverflow { count: 1, size })
    }
}

impl<P: PlatformVm + Default> Default for Region<P> {
    fn default() -> Self {
        Self::new(P::default())
    }
}

impl<P: PlatformVm> Drop for Region<P> {
    fn drop(&mut self) {
        if let Err(e) = self.dealloc() {
            warn!("region: leaking reservation: {e}");
        }
    }
}

impl<P: PlatformVm> core::fmt::Debug for Region<P> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Region")
            .field("start", &self.start)
            .field("reserved", &self.reserved)
            .field("committed", &self.committed)
            .finish_non_exhaustive()
    }
}
