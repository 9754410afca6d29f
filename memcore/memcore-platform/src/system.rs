//! [`PlatformVm`] for Linux-family kernels.
//!
//! Reservations are private anonymous `PROT_NONE` mappings; committing is a
//! protection change, so physical pages only materialize on first touch.
//! Anonymous memory objects are `memfd`s. Mapping a view with `MAP_FIXED` over
//! our own reservation replaces it in one step, so placeholders are supported.

use crate::{PlatformError, PlatformVm, VmOp};
use core::ffi::c_void;
use log::trace;
use memcore_addresses::{Granularity, VirtualAddress};
use rustix::fd::OwnedFd;
use rustix::io::Errno;
use rustix::mm::{Advice, MapFlags, MprotectFlags, ProtFlags};

/// Anonymous memory object handle of [`SystemVm`].
pub type SystemAnonymous = OwnedFd;

/// Debug name attached to every memfd.
const MEMFD_NAME: &core::ffi::CStr = c"memcore-loop";

/// The operating system's virtual memory interface.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct SystemVm;

impl SystemVm {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[inline]
fn os(op: VmOp) -> impl FnOnce(Errno) -> PlatformError {
    move |e| PlatformError::Os {
        op,
        code: e.raw_os_error(),
    }
}

#[inline]
fn len(op: VmOp, size: u64) -> Result<usize, PlatformError> {
    usize::try_from(size).map_err(|_| os(op)(Errno::INVAL))
}

impl PlatformVm for SystemVm {
    type Anonymous = SystemAnonymous;

    fn page_granularity(&self) -> Granularity {
        Granularity::new(rustix::param::page_size() as u64).unwrap_or(Granularity::PAGE_4K)
    }

    fn supports_placeholders(&self) -> bool {
        true
    }

    fn reserve(&self, size: u64) -> Result<VirtualAddress, PlatformError> {
        let n = len(VmOp::Reserve, size)?;
        let ptr = unsafe {
            rustix::mm::mmap_anonymous(
                core::ptr::null_mut(),
                n,
                ProtFlags::empty(),
                MapFlags::PRIVATE | MapFlags::NORESERVE,
            )
        }
        .map_err(os(VmOp::Reserve))?;

        let address = VirtualAddress::from_ptr(ptr);
        trace!("reserve {size:#X} bytes at {address}");
        Ok(address)
    }

    unsafe fn commit(&self, address: VirtualAddress, size: u64) -> Result<(), PlatformError> {
        let n = len(VmOp::Commit, size)?;
        trace!("commit {size:#X} bytes at {address}");
        unsafe {
            rustix::mm::mprotect(
                address.as_mut_ptr::<c_void>(),
                n,
                MprotectFlags::READ | MprotectFlags::WRITE,
            )
        }
        .map_err(os(VmOp::Commit))
    }

    unsafe fn decommit(&self, address: VirtualAddress, size: u64) -> Result<(), PlatformError> {
        let n = len(VmOp::Decommit, size)?;
        trace!("decommit {size:#X} bytes at {address}");
        let ptr = address.as_mut_ptr::<c_void>();
        unsafe { rustix::mm::mprotect(ptr, n, MprotectFlags::empty()) }
            .map_err(os(VmOp::Decommit))?;

        // The protection change alone keeps dirty pages resident.
        unsafe { rustix::mm::madvise(ptr, n, Advice::LinuxDontNeed) }.map_err(os(VmOp::Decommit))
    }

    unsafe fn release(&self, address: VirtualAddress, size: u64) -> Result<(), PlatformError> {
        let n = len(VmOp::Release, size)?;
        trace!("release {size:#X} bytes at {address}");
        unsafe { rustix::mm::munmap(address.as_mut_ptr::<c_void>(), n) }.map_err(os(VmOp::Release))
    }

    fn anon_create(&self, size: u64) -> Result<Self::Anonymous, PlatformError> {
        let fd = rustix::fs::memfd_create(MEMFD_NAME, rustix::fs::MemfdFlags::CLOEXEC)
            .map_err(os(VmOp::AnonCreate))?;
        rustix::fs::ftruncate(&fd, size).map_err(os(VmOp::AnonCreate))?;
        trace!("anon_create {size:#X} bytes");
        Ok(fd)
    }

    unsafe fn anon_map_fixed(
        &self,
        anonymous: &Self::Anonymous,
        address: VirtualAddress,
        size: u64,
    ) -> Result<(), PlatformError> {
        let n = len(VmOp::AnonMap, size)?;
        trace!("anon_map_fixed {size:#X} bytes at {address}");
        let ptr = unsafe {
            rustix::mm::mmap(
                address.as_mut_ptr::<c_void>(),
                n,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::SHARED | MapFlags::FIXED,
                anonymous,
                0,
            )
        }
        .map_err(os(VmOp::AnonMap))?;

        debug_assert_eq!(VirtualAddress::from_ptr(ptr), address);
        Ok(())
    }

    unsafe fn anon_map_at(
        &self,
        anonymous: &Self::Anonymous,
        address: VirtualAddress,
        size: u64,
    ) -> Result<(), PlatformError> {
        let n = len(VmOp::AnonMap, size)?;
        trace!("anon_map_at {size:#X} bytes at {address}");
        let result = unsafe {
            rustix::mm::mmap(
                address.as_mut_ptr::<c_void>(),
                n,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::SHARED | MapFlags::FIXED_NOREPLACE,
                anonymous,
                0,
            )
        };

        let ptr = match result {
            Ok(ptr) => ptr,
            Err(e) if e == Errno::EXIST => return Err(PlatformError::AddressInUse { address }),
            Err(e) => return Err(os(VmOp::AnonMap)(e)),
        };

        // Kernels older than 4.17 treat FIXED_NOREPLACE as a plain hint.
        let placed = VirtualAddress::from_ptr(ptr);
        if placed != address {
            unsafe { rustix::mm::munmap(ptr, n) }.map_err(os(VmOp::AnonUnmap))?;
            return Err(PlatformError::AddressInUse { address });
        }
        Ok(())
    }

    unsafe fn anon_unmap(&self, address: VirtualAddress, size: u64) -> Result<(), PlatformError> {
        let n = len(VmOp::AnonUnmap, size)?;
        trace!("anon_unmap {size:#X} bytes at {address}");
        unsafe { rustix::mm::munmap(address.as_mut_ptr::<c_void>(), n) }
            .map_err(os(VmOp::AnonUnmap))
    }

    fn anon_destroy(&self, anonymous: Self::Anonymous) -> Result<(), PlatformError> {
        // Closing the memfd never fails observably; mapped views keep it alive.
        drop(anonymous);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_granularity_is_a_power_of_two() {
        let g = SystemVm.page_granularity();
        assert!(g.get().is_power_of_two());
        assert!(g.get() >= 4096);
    }

    #[test]
    fn reserve_commit_write_release() {
        let vm = SystemVm;
        let page = vm.page_granularity().get();
        let base = vm.reserve(4 * page).expect("reserve");
        unsafe {
            vm.commit(base, 2 * page).expect("commit");
            let p = base.as_mut_ptr::<u8>();
            p.write(0xAB);
            p.add(usize::try_from(2 * page - 1).unwrap()).write(0xCD);
            assert_eq!(p.read(), 0xAB);

            vm.decommit(base, 2 * page).expect("decommit");
            vm.commit(base, page).expect("recommit");
            // Decommitted pages come back zeroed.
            assert_eq!(p.read(), 0);

            vm.release(base, 4 * page).expect("release");
        }
    }

    #[test]
    fn anon_views_alias_the_same_bytes() {
        let vm = SystemVm;
        let page = vm.page_granularity().get();
        let anon = vm.anon_create(page).expect("anon_create");
        let base = vm.reserve(2 * page).expect("reserve");
        unsafe {
            vm.anon_map_fixed(&anon, base, page).expect("first view");
            vm.anon_map_fixed(&anon, base + page, page).expect("second view");

            base.as_mut_ptr::<u8>().add(3).write_volatile(0x5A);
            let mirrored = (base + page).as_mut_ptr::<u8>().add(3).read_volatile();
            assert_eq!(mirrored, 0x5A);

            vm.anon_unmap(base, page).expect("unmap first");
            vm.anon_unmap(base + page, page).expect("unmap second");
        }
        vm.anon_destroy(anon).expect("destroy");
    }

    #[test]
    fn anon_map_at_refuses_occupied_ranges() {
        let vm = SystemVm;
        let page = vm.page_granularity().get();
        let anon = vm.anon_create(page).expect("anon_create");
        let base = vm.reserve(page).expect("reserve");

        let err = unsafe { vm.anon_map_at(&anon, base, page) }.unwrap_err();
        assert_eq!(err, PlatformError::AddressInUse { address: base });

        unsafe { vm.release(base, page) }.expect("release");
        vm.anon_destroy(anon).expect("destroy");
    }
}
