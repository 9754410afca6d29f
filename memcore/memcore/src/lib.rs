//! # Memory Core
//!
//! Three allocation strategies built directly on the operating system's
//! virtual memory interface: a frame-scoped bump allocator ([`Arena`]), a
//! wraparound ring buffer built on a double-mapped memory object
//! ([`Circular`]), and plain page-granular heap blocks ([`Heap`]). A small
//! [`Allocator`] value lets calling code pick one of them at runtime.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                  Allocator (facade)                       │
//! │    Heap(&Heap) │ Arena(&mut Arena) │ Circular(&mut ...)   │
//! └───────┬────────────────┬──────────────────┬───────────────┘
//!         │                │                  │
//! ┌───────▼──────┐ ┌───────▼────────┐ ┌───────▼────────────────┐
//! │     Heap     │ │     Arena      │ │       Circular         │
//! │ whole-block  │ │ bump cursor,   │ │ start/size modulo the  │
//! │ mappings     │ │ inline frames  │ │ loop's committed size  │
//! └───────┬──────┘ └───────┬────────┘ └───────┬────────────────┘
//!         │        ┌───────▼────────┐ ┌───────▼────────────────┐
//!         │        │     Region     │ │      MemoryLoop        │
//!         │        │ reserve/commit │ │ one memory object,     │
//!         │        │ revert/dealloc │ │ mapped back to back    │
//!         │        └───────┬────────┘ └───────┬────────────────┘
//! ┌───────▼────────────────▼──────────────────▼────────────────┐
//! │                PlatformVm (memcore-platform)               │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! Control only ever flows downward; nothing calls back up.
//!
//! ## Error Model
//!
//! Every fatal condition is an `Err(MemoryError)`; see [`ErrorKind`] for the
//! taxonomy. The one routine failure, a full ring buffer, is `Ok(None)` from
//! [`Circular::alloc`] so producers can back off and retry.
//!
//! ## Threading
//!
//! No type here is internally synchronized. Each instance assumes a single
//! writer; independent instances may live on different threads.
//!
//! ## Usage
//!
//! ```rust
//! # #[cfg(target_os = "linux")] {
//! use memcore::{Arena, Circular};
//!
//! let mut arena = Arena::new(1 << 20)?;
//! let a = arena.alloc(16)?;
//! arena.push()?;
//! let scratch = arena.alloc(4096)?;
//! arena.pop()?;
//! assert_eq!(arena.size(), 16);
//!
//! let mut ring = Circular::new(64 * 1024, 4096)?;
//! let block = ring.alloc(128)?.expect("empty ring has space");
//! let mark = ring.bookmark();
//! ring.pop_to_bookmark(mark)?;
//! assert!(ring.is_empty());
//! # let _ = (a, scratch, block);
//! # }
//! # Ok::<(), memcore::MemoryError>(())
//! ```

#![allow(unsafe_code)]

mod allocator;
mod arena;
mod circular;
pub mod config;
mod error;
mod heap;
pub mod info;
mod memory_loop;
mod region;
#[cfg(test)]
mod testing;

pub use crate::allocator::{Allocator, AllocatorKind};
pub use crate::arena::Arena;
pub use crate::circular::{Bookmark, Circular};
pub use crate::config::{ArenaConfig, LoopConfig, LoopStrategy};
pub use crate::error::{ErrorKind, MemoryError, Result};
pub use crate::heap::Heap;
pub use crate::memory_loop::MemoryLoop;
pub use crate::region::Region;

pub use memcore_platform::{PlatformError, PlatformVm, VmOp};
#[cfg(any(target_os = "linux", target_os = "android"))]
pub use memcore_platform::SystemVm;

/// `count * size` with overflow reported as [`MemoryError::SizeOverflow`].
#[inline]
pub(crate) fn array_size(count: u64, size: u64) -> Result<u64> {
    count
        .checked_mul(size)
        .ok_or(MemoryError::SizeOverflow { count, size })
}

/// Pointer `offset` bytes past `base`.
///
/// # Safety
/// `base + offset` must stay inside the mapping `base` points into.
#[inline]
#[allow(clippy::cast_possible_truncation)]
pub(crate) const unsafe fn byte_add(
    base: core::ptr::NonNull<u8>,
    offset: u64,
) -> core::ptr::NonNull<u8> {
    unsafe { base.add(offset as usize) }
}
