//! # Virtual Address and Granularity Types
//!
//! Strongly typed wrappers for the raw addresses and sizes that flow between
//! the memory core and the operating system's virtual memory interface.
//!
//! ## Overview
//!
//! | Type | Description |
//! |------|-------------|
//! | [`VirtualAddress`] | A raw 64-bit address in the current process' address space. |
//! | [`Granularity`] | A non-zero, power-of-two size used to round reservations and mappings. |
//!
//! Both are zero-cost wrappers around `u64`. They exist so that an address is
//! never confused with a byte count, and so that rounding to a page or
//! allocation boundary always goes through one checked helper.
//!
//! ## Typical Usage
//!
//! ```rust
//! # use memcore_addresses::*;
//! let page = Granularity::new(4096).unwrap();
//! assert_eq!(page.round_up(1), Some(4096));
//! assert_eq!(page.round_up(8192), Some(8192));
//!
//! let va = VirtualAddress::new(0x7F00_0000_1000);
//! assert!(page.is_aligned(va.as_u64()));
//! assert_eq!((va + 0x20).offset_from(va), Some(0x20));
//! ```
//!
//! ## Design Notes
//!
//! - Conversions between pointers and [`VirtualAddress`] use the exposed
//!   provenance API, so an address handed to the OS and turned back into a
//!   pointer stays usable for the mapping the OS created there.
//! - Rounding helpers on [`Granularity`] return `Option` instead of wrapping on
//!   overflow; a request for "nearly all of `u64`" is a caller error, not a
//!   silently tiny reservation.

#![allow(unsafe_code, clippy::inline_always)]

mod granularity;
mod virtual_address;

pub use granularity::Granularity;
pub use virtual_address::VirtualAddress;

/// Align `x` down to the nearest multiple of `a`.
///
/// ### Preconditions
/// - `a` must be **non-zero** and a **power of two**.
///
/// ### Examples
/// ```rust
/// # use memcore_addresses::align_down;
/// assert_eq!(align_down(0,      4096), 0);
/// assert_eq!(align_down(4095,   4096), 0);
/// assert_eq!(align_down(8191,   4096), 4096);
/// assert_eq!(align_down(0x12345,  16), 0x12340);
/// ```
#[inline(always)]
#[must_use]
pub const fn align_down(x: u64, a: u64) -> u64 {
    x & !(a - 1)
}

/// Align `x` up to the nearest multiple of `a`.
///
/// ### Preconditions
/// - `a` must be **non-zero** and a **power of two**.
/// - `x + (a - 1)` must **not overflow** `u64`. Use
///   [`Granularity::round_up`] where the input is caller-controlled.
///
/// ### Examples
/// ```rust
/// # use memcore_addresses::align_up;
/// assert_eq!(align_up(0,       4096), 0);
/// assert_eq!(align_up(1,       4096), 4096);
/// assert_eq!(align_up(4096,    4096), 4096);
/// assert_eq!(align_up(4097,    4096), 8192);
/// assert_eq!(align_up(0x12345,   16), 0x12350);
/// ```
#[inline(always)]
#[must_use]
pub const fn align_up(x: u64, a: u64) -> u64 {
    (x + a - 1) & !(a - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_helpers_agree_with_granularity() {
        let g = Granularity::new(64 * 1024).unwrap();
        for x in [0_u64, 1, 4095, 65_535, 65_536, 65_537, 1 << 32] {
            assert_eq!(g.round_up(x), Some(align_up(x, g.get())));
            assert_eq!(g.round_down(x), align_down(x, g.get()));
        }
    }

    #[test]
    fn pointer_round_trip() {
        let mut byte = 7_u8;
        let ptr: *mut u8 = &raw mut byte;
        let va = VirtualAddress::from_ptr(ptr);
        assert!(!va.is_null());
        assert_eq!(va.as_mut_ptr::<u8>(), ptr);

        // Writing through the reconstructed pointer lands in the same byte.
        unsafe { va.as_mut_ptr::<u8>().write(42) };
        assert_eq!(byte, 42);
    }

    #[test]
    fn null_address_has_no_nonnull() {
        assert!(VirtualAddress::zero().is_null());
        assert!(VirtualAddress::zero().as_nonnull::<u8>().is_none());
    }
}
