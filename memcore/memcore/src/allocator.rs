//! # Allocator Facade
//!
//! One value that picks an allocation strategy at runtime. It borrows its
//! store, so it cannot outlive it.
//!
//! | Variant     | `allocate`                 | `deallocate`      |
//! |-------------|----------------------------|-------------------|
//! | `Heap`      | new mapping per block      | unmaps the block  |
//! | `Arena`     | bump in the current frame  | no-op (use `pop`) |
//! | `Circular`  | at the write head, or None | no-op (bookmarks) |

use crate::arena::Arena;
use crate::circular::Circular;
use crate::heap::Heap;
use crate::{Result, array_size};
use core::ptr::NonNull;
use memcore_platform::PlatformVm;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum AllocatorKind {
    Heap,
    Arena,
    Circular,
}

#[derive(Debug)]
pub enum Allocator<'a, P: PlatformVm> {
    Heap(&'a Heap<P>),
    Arena(&'a mut Arena<P>),
    Circular(&'a mut Circular<P>),
}

impl<P: PlatformVm> Allocator<'_, P> {
    #[must_use]
    pub const fn kind(&self) -> AllocatorKind {
        match self {
            Self::Heap(_) => AllocatorKind::Heap,
            Self::Arena(_) => AllocatorKind::Arena,
            Self::Circular(_) => AllocatorKind::Circular,
        }
    }

    /// Allocate `size` bytes. Only a full [`Circular`] yields `Ok(None)`.
    ///
    /// # Errors
    /// Whatever the underlying store reports.
    pub fn allocate(&mut self, size: u64) -> Result<Option<NonNull<u8>>> {
        match self {
            Self::Heap(heap) => heap.alloc(size).map(Some),
            Self::Arena(arena) => arena.alloc(size).map(Some),
            Self::Circular(ring) => ring.alloc(size),
        }
    }

    /// # Errors
    /// See [`allocate`](Self::allocate), plus
    /// [`MemoryError::SizeOverflow`](crate::MemoryError::SizeOverflow).
    pub fn allocate_array(&mut self, count: u64, size: u64) -> Result<Option<NonNull<u8>>> {
        self.allocate(array_size(count, size)?)
    }

    /// Give a block back. Only heap blocks are actually freed; arena and ring
    /// memory comes back through frames and bookmarks.
    ///
    /// # Safety
    /// `ptr` and `size` must describe one block obtained from
    /// [`allocate`](Self::allocate) on this allocator, and nothing may use it
    /// afterwards.
    ///
    /// # Errors
    /// [`MemoryError::Platform`](crate::MemoryError::Platform) if unmapping a
    /// heap block fails.
    pub unsafe fn deallocate(&mut self, ptr: NonNull<u8>, size: u64) -> Result<()> {
        match self {
            // SAFETY: forwarded from the caller.
            Self::Heap(heap) => unsafe { heap.dealloc(ptr, size) },
            Self::Arena(_) | Self::Circular(_) => Ok(()),
        }
    }
}

impl<'a, P: PlatformVm> From<&'a Heap<P>> for Allocator<'a, P> {
    fn from(heap: &'a Heap<P>) -> Self {
        Self::Heap(heap)
    }
}

impl<'a, P: PlatformVm> From<&'a mut Arena<P>> for Allocator<'a, P> {
    fn from(arena: &'a mut Arena<P>) -> Self {
        Self::Arena(arena)
    }
}

impl<'a, P: PlatformVm> From<&'a mut Circular<P>> for Allocator<'a, P> {
    fn from(ring: &'a mut Circular<P>) -> Self {
        Self::Circular(ring)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeVm;
    use memcore_platform::VmOp;

    #[test]
    fn arena_blocks_are_not_freed() {
        let vm = FakeVm::new(true);
        let mut arena = Arena::with_platform(vm.clone(), 4096).unwrap();
        let mut a = Allocator::from(&mut arena);
        assert_eq!(a.kind(), AllocatorKind::Arena);

        let p = a.allocate_array(4, 8).unwrap().unwrap();
        vm.clear();
        unsafe { a.deallocate(p, 32).unwrap() };
        assert!(vm.calls().is_empty());
        assert_eq!(arena.size(), 32);
    }

    #[test]
    fn heap_blocks_are_freed() {
        let vm = FakeVm::new(true);
        let heap = Heap::new(vm.clone());
        let mut a = Allocator::from(&heap);
        assert_eq!(a.kind(), AllocatorKind::Heap);

        let p = a.allocate(10).unwrap().unwrap();
        assert_eq!(vm.ops(), vec![VmOp::Reserve, VmOp::Commit]);
        unsafe { a.deallocate(p, 10).unwrap() };
        assert_eq!(vm.ops().last(), Some(&VmOp::Release));
    }

    #[test]
    fn full_ring_yields_none() {
        let mut ring = Circular::with_platform(FakeVm::new(true), 4096, 4096).unwrap();
        let mut a = Allocator::from(&mut ring);
        assert_eq!(a.kind(), AllocatorKind::Circular);
        assert!(a.allocate(4096).unwrap().is_some());
        assert!(a.allocate(1).unwrap().is_none());
    }
}
