//! Page-granular heap blocks: every allocation is its own committed mapping.

use crate::{MemoryError, Result, array_size};
use core::ptr::NonNull;
use log::{trace, warn};
use memcore_addresses::VirtualAddress;
use memcore_platform::PlatformVm;

/// Allocator that gives every block its own reserved and committed mapping.
#[derive(Clone, Debug, Default)]
pub struct Heap<P: PlatformVm> {
    platform: P,
}

#[cfg(any(target_os = "linux", target_os = "android"))]
impl Heap<memcore_platform::SystemVm> {
    #[must_use]
    pub const fn system() -> Self {
        Self::new(memcore_platform::SystemVm::new())
    }
}

impl<P: PlatformVm> Heap<P> {
    #[must_use]
    pub const fn new(platform: P) -> Self {
        Self { platform }
    }

    fn mapped_size(&self, size: u64) -> Result<u64> {
        if size == 0 {
            return Err(MemoryError::ZeroSize);
        }
        self.platform
            .page_granularity()
            .round_up(size)
            .ok_or(MemoryError::SizeOverflow { count: 1, size })
    }

    /// Map `size` bytes of zeroed, read/write memory.
    ///
    /// # Errors
    /// - [`MemoryError::ZeroSize`] for an empty request.
    /// - [`MemoryError::Platform`] if the OS refuses.
    pub fn alloc(&self, size: u64) -> Result<NonNull<u8>> {
        let mapped = self.mapped_size(size)?;
        let address = self.platform.reserve(mapped)?;

        // SAFETY: the whole range was just reserved.
        if let Err(e) = unsafe { self.platform.commit(address, mapped) } {
            // SAFETY: as above; nothing has seen the address yet.
            unsafe { self.platform.release(address, mapped)? };
            return Err(e.into());
        }

        trace!("heap: {size:#X} bytes at {address}");
        address
            .as_nonnull()
            .ok_or(MemoryError::RegionUninitialized)
    }

    /// # Errors
    /// See [`alloc`](Self::alloc), plus [`MemoryError::SizeOverflow`].
    pub fn alloc_array(&self, count: u64, size: u64) -> Result<NonNull<u8>> {
        self.alloc(array_size(count, size)?)
    }

    /// Unmap a block.
    ///
    /// # Safety
    /// `ptr` and `size` must come from one [`alloc`](Self::alloc) on this
    /// heap's platform, and nothing may use the block afterwards.
    ///
    /// # Errors
    /// [`MemoryError::Platform`] if the OS refuses.
    pub unsafe fn dealloc(&self, ptr: NonNull<u8>, size: u64) -> Result<()> {
        let mapped = self.mapped_size(size)?;
        let address = VirtualAddress::from_nonnull(ptr);
        trace!("heap: free {size:#X} bytes at {address}");
        unsafe { self.platform.release(address, mapped)? };
        Ok(())
    }

    /// Move a block to a fresh mapping of `new_size` bytes, keeping the first
    /// `min(current, new_size)` bytes.
    ///
    /// # Safety
    /// As [`dealloc`](Self::dealloc) for `ptr`/`current`.
    ///
    /// # Errors
    /// See [`alloc`](Self::alloc) and [`dealloc`](Self::dealloc). On error the
    /// old block is still mapped and the new one has been released.
    #[allow(clippy::cast_possible_truncation)]
    pub unsafe fn realloc(
        &self,
        ptr: NonNull<u8>,
        current: u64,
        new_size: u64,
    ) -> Result<NonNull<u8>> {
        let fresh = self.alloc(new_size)?;
        // SAFETY: both blocks are at least `min(current, new_size)` long and distinct.
        unsafe { fresh.copy_from_nonoverlapping(ptr, current.min(new_size) as usize) };

        // SAFETY: the caller vouches for `ptr`; `fresh` was never handed out.
        if let Err(e) = unsafe { self.dealloc(ptr, current) } {
            if let Err(leak) = unsafe { self.dealloc(fresh, new_size) } {
                warn!("heap: leaking {new_size:#X} bytes at {fresh:p}: {leak}");
            }
            return Err(e);
        }
        Ok(fresh)
    }
}

#[cfg(all(test, any(target_os = "linux", target_os = "android")))]
mod tests {
    use super::*;

    #[test]
    fn blocks_are_zeroed_and_writable() {
        let heap = Heap::system();
        let p = heap.alloc(100).unwrap();
        unsafe {
            assert_eq!(p.read(), 0);
            p.write(0xAB);
            assert_eq!(p.add(99).read(), 0);
            heap.dealloc(p, 100).unwrap();
        }
    }

    #[test]
    fn realloc_keeps_the_prefix() {
        let heap = Heap::system();
        unsafe {
            let p = heap.alloc_array(4, 8).unwrap();
            p.cast::<u64>().write(0x0123_4567_89AB_CDEF);
            let q = heap.realloc(p, 32, 8192).unwrap();
            assert_eq!(q.cast::<u64>().read(), 0x0123_4567_89AB_CDEF);
            assert_eq!(q.add(8191).read(), 0);
            heap.dealloc(q, 8192).unwrap();
        }
    }

    #[test]
    fn failed_realloc_releases_the_new_block() {
        use crate::testing::Flaky;
        use memcore_platform::{SystemVm, VmOp};

        let vm = Flaky::new(SystemVm::new());
        let heap = Heap::new(vm.clone());
        unsafe {
            let p = heap.alloc(64).unwrap();
            p.write(9);
            vm.fail_once(VmOp::Release);

            let err = heap.realloc(p, 64, 8192).unwrap_err();
            assert_eq!(err.kind(), crate::ErrorKind::Platform);

            let released: Vec<_> = vm
                .calls()
                .into_iter()
                .filter(|c| c.op == VmOp::Release)
                .map(|c| c.address)
                .collect();
            assert_eq!(released.len(), 2);
            assert_eq!(released[0], VirtualAddress::from_nonnull(p).as_u64());
            assert_ne!(released[1], released[0]);

            // The old block survives the failure.
            assert_eq!(p.read(), 9);
            heap.dealloc(p, 64).unwrap();
        }
    }

    #[test]
    fn zero_size_is_rejected() {
        assert!(matches!(Heap::system().alloc(0), Err(MemoryError::ZeroSize)));
    }
}
