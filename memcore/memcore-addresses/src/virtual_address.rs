use core::fmt;
use core::ops::{Add, AddAssign};
use core::ptr::NonNull;

/// Virtual memory address.
///
/// A thin wrapper around a `u64` that denotes an address in the **current
/// process'** virtual address space, as handed out by (or handed to) the
/// platform's reserve/map calls.
///
/// ### Invariants
/// - No invariant beyond "this is intended to be a virtual address".
/// - The zero address is the "no address" value of an uninitialized
///   reservation.
///
/// ### Examples
/// ```rust
/// # use memcore_addresses::*;
/// let va = VirtualAddress::new(0x1000);
/// assert_eq!(format!("{va}"), "0x0000000000001000");
/// assert_eq!((va + 0x10).as_u64(), 0x1010);
/// ```
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct VirtualAddress(u64);

impl VirtualAddress {
    #[inline]
    #[must_use]
    pub fn from_nonnull<T>(ptr: NonNull<T>) -> Self {
        Self::from_ptr(ptr.as_ptr())
    }

    /// Capture the address of `ptr`, exposing its provenance so the address
    /// can later be turned back into a usable pointer.
    #[inline]
    #[must_use]
    pub fn from_ptr<T>(ptr: *const T) -> Self {
        const _: () = assert!(
            size_of::<*const ()>() <= size_of::<u64>(),
            "pointer size exceeds u64"
        );

        Self::new(ptr.expose_provenance() as u64)
    }

    #[inline]
    #[must_use]
    pub const fn new(v: u64) -> Self {
        Self(v)
    }

    #[inline]
    #[must_use]
    pub const fn zero() -> Self {
        Self::new(0)
    }

    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    #[inline]
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Reconstruct a pointer to this address.
    ///
    /// The pointer picks up the provenance previously exposed for this address
    /// (by [`from_ptr`](Self::from_ptr) or by the platform mapping call).
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn as_mut_ptr<T>(self) -> *mut T {
        core::ptr::with_exposed_provenance_mut(self.0 as usize)
    }

    /// Like [`as_mut_ptr`](Self::as_mut_ptr), but `None` for the zero address.
    #[inline]
    #[must_use]
    pub fn as_nonnull<T>(self) -> Option<NonNull<T>> {
        NonNull::new(self.as_mut_ptr())
    }

    /// Distance from `base` to `self`, or `None` if `self` lies below `base`.
    #[inline]
    #[must_use]
    pub const fn offset_from(self, base: Self) -> Option<u64> {
        self.0.checked_sub(base.0)
    }

    /// Checked add of a byte offset, returning `None` on overflow.
    #[inline]
    #[must_use]
    pub const fn checked_add(self, rhs: u64) -> Option<Self> {
        match self.0.checked_add(rhs) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }
}

impl fmt::Debug for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VA(0x{:016X})", self.0)
    }
}

impl fmt::Display for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016X}", self.0)
    }
}

impl From<u64> for VirtualAddress {
    #[inline]
    fn from(v: u64) -> Self {
        Self::new(v)
    }
}

impl From<VirtualAddress> for u64 {
    #[inline]
    fn from(a: VirtualAddress) -> Self {
        a.as_u64()
    }
}

impl<T> From<NonNull<T>> for VirtualAddress {
    #[inline]
    fn from(ptr: NonNull<T>) -> Self {
        Self::from_nonnull(ptr)
    }
}

impl Add<u64> for VirtualAddress {
    type Output = Self;
    #[inline]
    fn add(self, rhs: u64) -> Self::Output {
        Self(self.0 + rhs)
    }
}

impl AddAssign<u64> for VirtualAddress {
    #[inline]
    fn add_assign(&mut self, rhs: u64) {
        self.0 += rhs;
    }
}
