use core::fmt;
use core::num::NonZeroU64;

/// A power-of-two byte size that reservations and mappings are rounded to.
///
/// On POSIX systems this is the page size; platforms with a coarser
/// allocation granularity (64 KiB is common) report that instead.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Granularity(NonZeroU64);

impl Granularity {
    /// The smallest page size any supported platform uses.
    pub const PAGE_4K: Self = match Self::new(4096) {
        Some(g) => g,
        None => unreachable!(),
    };

    /// Create a granularity; `None` unless `bytes` is a non-zero power of two.
    #[inline]
    #[must_use]
    pub const fn new(bytes: u64) -> Option<Self> {
        if !bytes.is_power_of_two() {
            return None;
        }
        match NonZeroU64::new(bytes) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    #[inline]
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0.get()
    }

    /// Round `size` up to the next multiple; `None` on overflow.
    #[inline]
    #[must_use]
    pub const fn round_up(self, size: u64) -> Option<u64> {
        let mask = self.get() - 1;
        match size.checked_add(mask) {
            Some(v) => Some(v & !mask),
            None => None,
        }
    }

    #[inline]
    #[must_use]
    pub const fn round_down(self, size: u64) -> u64 {
        size & !(self.get() - 1)
    }

    #[inline]
    #[must_use]
    pub const fn is_aligned(self, value: u64) -> bool {
        value & (self.get() - 1) == 0
    }
}

impl fmt::Debug for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Granularity({:#X})", self.get())
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get() {
            b if b >= 1 << 30 && b % (1 << 30) == 0 => write!(f, "{}G", b >> 30),
            b if b >= 1 << 20 && b % (1 << 20) == 0 => write!(f, "{}M", b >> 20),
            b if b >= 1 << 10 && b % (1 << 10) == 0 => write!(f, "{}K", b >> 10),
            b => write!(f, "{b}"),
        }
    }
}

impl From<Granularity> for u64 {
    #[inline]
    fn from(g: Granularity) -> Self {
        g.get()
    }
}
