//! # Platform Virtual Memory Interface
//!
//! The memory core never talks to the operating system directly. Everything it
//! needs from the kernel's virtual memory subsystem goes through the
//! [`PlatformVm`] capability trait defined here, and [`SystemVm`] implements
//! that trait for Linux-family kernels.
//!
//! ## Capabilities
//!
//! ```text
//! ┌──────────────────────────────┬──────────────────────────────────────────┐
//! │ reserve / release            │ claim or drop an address range, no      │
//! │                              │ backing, no access rights                │
//! ├──────────────────────────────┼──────────────────────────────────────────┤
//! │ commit / decommit            │ grant or revoke read/write on a sub-range│
//! │                              │ of a reservation                         │
//! ├──────────────────────────────┼──────────────────────────────────────────┤
//! │ anon_create / anon_destroy   │ swap-backed memory object with no        │
//! │                              │ filesystem identity                      │
//! ├──────────────────────────────┼──────────────────────────────────────────┤
//! │ anon_map_fixed / anon_map_at │ map a view of that object at an exact    │
//! │ anon_unmap                   │ address (replacing / not replacing)      │
//! └──────────────────────────────┴──────────────────────────────────────────┘
//! ```
//!
//! ## Placeholders
//!
//! Mapping one memory object several times back to back requires a gap in the
//! address space that nobody else grabs while the views are installed. Some
//! platforms can atomically *replace* an own reservation with a view
//! ([`anon_map_fixed`](PlatformVm::anon_map_fixed)); those report
//! [`supports_placeholders`](PlatformVm::supports_placeholders). Everything
//! else has to release the reservation and map into the hole afterwards
//! ([`anon_map_at`](PlatformVm::anon_map_at)), which can lose a race against
//! other allocations in the process. That failure is reported as
//! [`PlatformError::AddressInUse`], never hidden.
//!
//! ## Safety Model
//!
//! Every operation that changes the protection or the mapping of an existing
//! range is an `unsafe fn`: the implementation cannot know whether live Rust
//! references point into it. Callers must only pass ranges they obtained from
//! [`reserve`](PlatformVm::reserve) on the same platform value.

#![allow(unsafe_code)]

mod error;
#[cfg(any(target_os = "linux", target_os = "android"))]
mod system;

pub use crate::error::{PlatformError, VmOp};
#[cfg(any(target_os = "linux", target_os = "android"))]
pub use crate::system::{SystemAnonymous, SystemVm};
pub use memcore_addresses::{Granularity, VirtualAddress};

/// Virtual memory capabilities consumed by the memory core.
///
/// Implementations are usually zero-sized handles to process-global OS state.
/// They must be cheap to clone; every region, arena and loop keeps its own copy.
pub trait PlatformVm: Clone {
    /// Handle to an anonymous, swap-backed memory object.
    type Anonymous;

    /// Size of one page; commit and decommit operate on whole pages.
    fn page_granularity(&self) -> Granularity;

    /// Granularity of reservation base addresses and mapped views.
    ///
    /// Defaults to the page granularity, which is correct for POSIX systems.
    fn allocation_granularity(&self) -> Granularity {
        self.page_granularity()
    }

    /// Whether [`anon_map_fixed`](Self::anon_map_fixed) can atomically replace
    /// part of an own reservation.
    fn supports_placeholders(&self) -> bool;

    /// Reserve `size` bytes of address space with no access rights.
    ///
    /// # Errors
    /// The OS refused the reservation.
    fn reserve(&self, size: u64) -> Result<VirtualAddress, PlatformError>;

    /// Grant read/write access to `[address, address + size)`.
    ///
    /// # Safety
    /// The range must lie inside a reservation obtained from this platform.
    ///
    /// # Errors
    /// The OS refused the protection change.
    unsafe fn commit(&self, address: VirtualAddress, size: u64) -> Result<(), PlatformError>;

    /// Revoke access to `[address, address + size)` and let the OS drop its
    /// backing pages, keeping the reservation.
    ///
    /// # Safety
    /// The range must lie inside a reservation obtained from this platform, and
    /// no live reference may point into it.
    ///
    /// # Errors
    /// The OS refused the protection change.
    unsafe fn decommit(&self, address: VirtualAddress, size: u64) -> Result<(), PlatformError>;

    /// Release a whole reservation of `size` bytes starting at `address`.
    ///
    /// # Safety
    /// `address`/`size` must describe exactly one reservation from this
    /// platform, and no live reference may point into it.
    ///
    /// # Errors
    /// The OS refused to unmap the range.
    unsafe fn release(&self, address: VirtualAddress, size: u64) -> Result<(), PlatformError>;

    /// Create an anonymous memory object of `size` bytes.
    ///
    /// # Errors
    /// The OS could not create or size the object.
    fn anon_create(&self, size: u64) -> Result<Self::Anonymous, PlatformError>;

    /// Map the first `size` bytes of `anonymous` at exactly `address`,
    /// atomically replacing whatever reservation of ours occupies that range.
    ///
    /// # Safety
    /// The range must lie inside a reservation obtained from this platform, and
    /// no live reference may point into it.
    ///
    /// # Errors
    /// The OS refused the mapping.
    unsafe fn anon_map_fixed(
        &self,
        anonymous: &Self::Anonymous,
        address: VirtualAddress,
        size: u64,
    ) -> Result<(), PlatformError>;

    /// Map the first `size` bytes of `anonymous` at exactly `address` without
    /// replacing existing mappings.
    ///
    /// # Safety
    /// `address` must be a hole this caller just released; the call never
    /// touches memory owned by anyone else.
    ///
    /// # Errors
    /// [`PlatformError::AddressInUse`] if some other mapping now occupies part
    /// of the range; any other error if the OS refused the mapping.
    unsafe fn anon_map_at(
        &self,
        anonymous: &Self::Anonymous,
        address: VirtualAddress,
        size: u64,
    ) -> Result<(), PlatformError>;

    /// Unmap one view previously created by `anon_map_fixed`/`anon_map_at`.
    ///
    /// # Safety
    /// The range must be exactly one view, and no live reference may point
    /// into it.
    ///
    /// # Errors
    /// The OS refused to unmap the range.
    unsafe fn anon_unmap(&self, address: VirtualAddress, size: u64) -> Result<(), PlatformError>;

    /// Destroy an anonymous memory object. Views that are still mapped keep the
    /// storage alive until they are unmapped.
    ///
    /// # Errors
    /// The OS refused to close the object.
    fn anon_destroy(&self, anonymous: Self::Anonymous) -> Result<(), PlatformError>;
}
