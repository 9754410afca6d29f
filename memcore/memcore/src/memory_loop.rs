//! # Memory Loops
//!
//! One anonymous memory object of `committed` bytes, mapped back to back
//! until `committed + mirrored` bytes of address space are covered:
//!
//! ```text
//!  start            start + committed         start + committed + mirrored
//!    ├──────────────────────┼───────────────────────┤
//!    │ view 0: [0, C)       │ view 1: [0, M)        │
//!    └──────────┬───────────┴───────────┬───────────┘
//!               └──── same storage ─────┘
//! ```
//!
//! A write at `start + committed + k` lands in the same byte as one at
//! `start + k`, so a ring buffer on top can hand out any block up to
//! `mirrored` bytes as one contiguous slice, even across the wrap point.
//!
//! ## Mapping Strategies
//!
//! - [`LoopStrategy::Placeholder`]: reserve the full range, then replace it
//!   view by view. The range stays ours throughout.
//! - [`LoopStrategy::Relocate`]: reserve to find a hole, release it, map the
//!   views into it. Anything else in the process may grab the hole in
//!   between, in which case the views mapped so far are torn down and the
//!   whole sequence starts over. After
//!   [`max_attempts`](LoopConfig::max_attempts) lost races the allocation fails
//!   with [`MemoryError::LoopRaceExhausted`].
//!
//! ## Aliasing
//!
//! Two addresses naming the same byte break Rust's reference model if both
//! are borrowed at once. Access loop memory through raw pointers, or borrow
//! at most one window of `committed` bytes at a time.

use crate::config::{LoopConfig, LoopStrategy};
use crate::{MemoryError, Result};
use core::ptr::NonNull;
use log::{debug, warn};
use memcore_addresses::VirtualAddress;
use memcore_platform::{PlatformError, PlatformVm, VmOp};

/// One memory object mapped twice, back to back, so writes past the end
/// land at the start.
pub struct MemoryLoop<P: PlatformVm> {
    platform: P,
    config: LoopConfig,
    anonymous: Option<P::Anonymous>,
    start: Option<NonNull<u8>>,
    committed: u64,
    mirrored: u64,
    strategy: LoopStrategy,
}

/// `(offset, len)` of each view covering `[0, total)`.
fn views(committed: u64, total: u64) -> impl Iterator<Item = (u64, u64)> {
    let step = usize::try_from(committed).unwrap_or(usize::MAX).max(1);
    (0..total)
        .step_by(step)
        .map(move |offset| (offset, committed.min(total - offset)))
}

impl<P: PlatformVm> MemoryLoop<P> {
    /// An unmapped loop using the default configuration.
    #[must_use]
    pub fn new(platform: P) -> Self {
        Self::with_config(platform, LoopConfig::default())
    }

    #[must_use]
    pub const fn with_config(platform: P, config: LoopConfig) -> Self {
        Self {
            platform,
            config,
            anonymous: None,
            start: None,
            committed: 0,
            mirrored: 0,
            strategy: LoopStrategy::Auto,
        }
    }

    #[inline]
    #[must_use]
    pub const fn config(&self) -> LoopConfig {
        self.config
    }

    #[inline]
    #[must_use]
    pub const fn is_initialized(&self) -> bool {
        self.start.is_some()
    }

    /// Size of the backing object.
    #[inline]
    #[must_use]
    pub const fn committed(&self) -> u64 {
        self.committed
    }

    /// Bytes of alias following the primary view.
    #[inline]
    #[must_use]
    pub const fn mirrored(&self) -> u64 {
        self.mirrored
    }

    #[inline]
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.committed + self.mirrored
    }

    #[inline]
    #[must_use]
    pub const fn as_ptr(&self) -> Option<NonNull<u8>> {
        self.start
    }

    /// Strategy that produced the live mapping.
    #[inline]
    #[must_use]
    pub const fn strategy(&self) -> Option<LoopStrategy> {
        if self.is_initialized() {
            Some(self.strategy)
        } else {
            None
        }
    }

    /// Create the backing object and map it.
    ///
    /// Both sizes are rounded up to the platform's allocation granularity.
    ///
    /// # Errors
    /// - [`MemoryError::LoopAlreadyInitialized`] if already mapped.
    /// - [`MemoryError::ZeroSize`] if `min_committed` is zero.
    /// - [`MemoryError::LoopRaceExhausted`] if relocation lost every race.
    /// - [`MemoryError::Platform`] for any other OS failure. Partial work is
    ///   undone before returning.
    pub fn alloc(&mut self, min_committed: u64, min_mirrored: u64) -> Result<()> {
        if self.is_initialized() {
            return Err(MemoryError::LoopAlreadyInitialized);
        }
        if min_committed == 0 {
            return Err(MemoryError::ZeroSize);
        }

        let granularity = self.platform.allocation_granularity();
        let round = |size: u64| {
            granularity
                .round_up(size)
                .ok_or(MemoryError::SizeOverflow { count: 1, size })
        };
        let committed = round(min_committed)?;
        let mirrored = round(min_mirrored)?;
        let total = committed
            .checked_add(mirrored)
            .ok_or(MemoryError::SizeOverflow {
                count: 2,
                size: committed.max(mirrored),
            })?;

        let anonymous = self.platform.anon_create(committed)?;
        let strategy = self
            .config
            .strategy()
            .resolve(self.platform.supports_placeholders());

        let mapped = match strategy {
            LoopStrategy::Placeholder => self.map_with_placeholder(&anonymous, committed, total),
            // `resolve` never yields `Auto`.
            LoopStrategy::Relocate | LoopStrategy::Auto => {
                self.map_with_relocation(&anonymous, committed, total)
            }
        };

        let address = match mapped {
            Ok(address) => address,
            Err(e) => {
                if let Err(destroy) = self.platform.anon_destroy(anonymous) {
                    warn!("memory loop: leaking backing object: {destroy}");
                }
                return Err(e);
            }
        };
        let Some(start) = address.as_nonnull::<u8>() else {
            return Err(MemoryError::LoopUninitialized);
        };

        debug!(
            "memory loop: {committed:#X} + {mirrored:#X} bytes at {address} ({strategy:?})"
        );
        self.anonymous = Some(anonymous);
        self.start = Some(start);
        self.committed = committed;
        self.mirrored = mirrored;
        self.strategy = strategy;
        Ok(())
    }

    fn map_with_placeholder(
        &self,
        anonymous: &P::Anonymous,
        committed: u64,
        total: u64,
    ) -> Result<VirtualAddress> {
        if !self.platform.supports_placeholders() {
            return Err(PlatformError::Unsupported { op: VmOp::AnonMap }.into());
        }

        let base = self.platform.reserve(total)?;
        for (offset, len) in views(committed, total) {
            // SAFETY: inside the reservation just obtained; nothing points there yet.
            let mapped = unsafe { self.platform.anon_map_fixed(anonymous, base + offset, len) };
            if let Err(e) = mapped {
                // SAFETY: views replaced parts of the reservation; the range
                // as a whole is still exactly ours.
                if let Err(release) = unsafe { self.platform.release(base, total) } {
                    warn!("memory loop: leaking reservation at {base}: {release}");
                }
                return Err(e.into());
            }
        }
        Ok(base)
    }

    fn map_with_relocation(
        &self,
        anonymous: &P::Anonymous,
        committed: u64,
        total: u64,
    ) -> Result<VirtualAddress> {
        let attempts = self.config.max_attempts();

        'attempts: for attempt in 1..=attempts {
            let hole = self.platform.reserve(total)?;
            // SAFETY: just reserved, nothing points there.
            unsafe { self.platform.release(hole, total)? };

            for (offset, len) in views(committed, total) {
                // SAFETY: `hole` was released by us a moment ago.
                match unsafe { self.platform.anon_map_at(anonymous, hole + offset, len) } {
                    Ok(()) => {}
                    Err(PlatformError::AddressInUse { address }) => {
                        debug!(
                            "memory loop: lost {address} to another mapping, attempt {attempt}/{attempts}"
                        );
                        self.unmap_views(hole, committed, offset);
                        continue 'attempts;
                    }
                    Err(e) => {
                        self.unmap_views(hole, committed, offset);
                        return Err(e.into());
                    }
                }
            }
            return Ok(hole);
        }

        Err(MemoryError::LoopRaceExhausted { attempts })
    }

    /// Unmap the views covering `[0, upto)`, logging failures.
    fn unmap_views(&self, base: VirtualAddress, committed: u64, upto: u64) {
        for (offset, len) in views(committed, upto) {
            // SAFETY: each view below `upto` was mapped by this loop.
            if let Err(e) = unsafe { self.platform.anon_unmap(base + offset, len) } {
                warn!("memory loop: leaking view at {}: {e}", base + offset);
            }
        }
    }

    /// Unmap every view and destroy the backing object. No-op if unmapped.
    ///
    /// # Errors
    /// [`MemoryError::Platform`] with the first failure. The loop is reset
    /// either way; whatever failed to unmap is leaked.
    pub fn dealloc(&mut self) -> Result<()> {
        let Some(start) = self.start.take() else {
            return Ok(());
        };
        let base = VirtualAddress::from_nonnull(start);
        let total = self.total();

        let mut first = None;
        for (offset, len) in views(self.committed, total) {
            // SAFETY: views of this loop; `&mut self` means nobody borrows them.
            if let Err(e) = unsafe { self.platform.anon_unmap(base + offset, len) } {
                first.get_or_insert(e);
            }
        }
        if let Some(anonymous) = self.anonymous.take()
            && let Err(e) = self.platform.anon_destroy(anonymous)
        {
            first.get_or_insert(e);
        }

        debug!("memory loop: unmapped {total:#X} bytes at {base}");
        self.committed = 0;
        self.mirrored = 0;
        self.strategy = LoopStrategy::Auto;
        first.map_or(Ok(()), |e| Err(e.into()))
    }
}

impl<P: PlatformVm + Default> Default for MemoryLoop<P> {
    fn default() -> Self {
        Self::new(P::default())
    }
}

impl<P: PlatformVm> Drop for MemoryLoop<P> {
    fn drop(&mut self) {
        if let Err(e) = self.dealloc() {
            warn!("memory loop: {e}");
        }
    }
}

impl<P: PlatformVm> core::fmt::Debug for MemoryLoop<P> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MemoryLoop")
            .field("start", &self.start)
            .field("committed", &self.committed)
            .field("mirrored", &self.mirrored)
            .field("strategy", &self.strategy())
            .finish_non_exhaustive()
    }
}
