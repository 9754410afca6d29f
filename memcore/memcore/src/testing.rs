//! Call-recording platform for unit tests that never touch the memory they map.

use core::cell::{Cell, RefCell};
use memcore_platform::{Granularity, PlatformError, PlatformVm, VirtualAddress, VmOp};
use std::rc::Rc;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Call {
    pub op: VmOp,
    pub address: u64,
    pub size: u64,
}

#[derive(Default)]
struct State {
    calls: RefCell<Vec<Call>>,
    next: Cell<u64>,
    /// `anon_map_at` calls to let through before contention starts.
    grace: Cell<u32>,
    /// `anon_map_at` calls still to be refused with `AddressInUse`.
    contended: Cell<u32>,
    /// Operation that fails once with `ENOMEM`.
    fail_on: Cell<Option<VmOp>>,
}

/// Hands out fake addresses 16 MiB apart and logs every call.
#[derive(Clone)]
pub struct FakeVm {
    state: Rc<State>,
    placeholders: bool,
}

impl FakeVm {
    pub fn new(placeholders: bool) -> Self {
        let state = State::default();
        state.next.set(0x1000_0000);
        Self {
            state: Rc::new(state),
            placeholders,
        }
    }

    pub fn contend(&self, n: u32) {
        self.contend_after(0, n);
    }

    pub fn contend_after(&self, grace: u32, n: u32) {
        self.state.grace.set(grace);
        self.state.contended.set(n);
    }

    pub fn fail_once(&self, op: VmOp) {
        self.state.fail_on.set(Some(op));
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.calls.borrow().clone()
    }

    pub fn ops(&self) -> Vec<VmOp> {
        self.calls().into_iter().map(|c| c.op).collect()
    }

    pub fn clear(&self) {
        self.state.calls.borrow_mut().clear();
    }

    fn record(&self, op: VmOp, address: u64, size: u64) -> Result<(), PlatformError> {
        self.state.calls.borrow_mut().push(Call { op, address, size });
        if self.state.fail_on.get() == Some(op) {
            self.state.fail_on.set(None);
            return Err(PlatformError::Os { op, code: 12 });
        }
        Ok(())
    }
}

impl PlatformVm for FakeVm {
    type Anonymous = u64;

    fn page_granularity(&self) -> Granularity {
        Granularity::PAGE_4K
    }

    fn supports_placeholders(&self) -> bool {
        self.placeholders
    }

    fn reserve(&self, size: u64) -> Result<VirtualAddress, PlatformError> {
        let address = self.state.next.get();
        self.record(VmOp::Reserve, address, size)?;
        self.state.next.set(address + 0x100_0000);
        Ok(VirtualAddress::new(address))
    }

    unsafe fn commit(&self, address: VirtualAddress, size: u64) -> Result<(), PlatformError> {
        self.record(VmOp::Commit, address.as_u64(), size)
    }

    unsafe fn decommit(&self, address: VirtualAddress, size: u64) -> Result<(), PlatformError> {
        self.record(VmOp::Decommit, address.as_u64(), size)
    }

    unsafe fn release(&self, address: VirtualAddress, size: u64) -> Result<(), PlatformError> {
        self.record(VmOp::Release, address.as_u64(), size)
    }

    fn anon_create(&self, size: u64) -> Result<u64, PlatformError> {
        self.record(VmOp::AnonCreate, 0, size)?;
        Ok(size)
    }

    unsafe fn anon_map_fixed(
        &self,
        _anonymous: &u64,
        address: VirtualAddress,
        size: u64,
    ) -> Result<(), PlatformError> {
        self.record(VmOp::AnonMap, address.as_u64(), size)
    }

    unsafe fn anon_map_at(
        &self,
        _anonymous: &u64,
        address: VirtualAddress,
        size: u64,
    ) -> Result<(), PlatformError> {
        self.record(VmOp::AnonMap, address.as_u64(), size)?;
        let grace = self.state.grace.get();
        if grace > 0 {
            self.state.grace.set(grace - 1);
            return Ok(());
        }
        let left = self.state.contended.get();
        if left > 0 {
            self.state.contended.set(left - 1);
            return Err(PlatformError::AddressInUse { address });
        }
        Ok(())
    }

    unsafe fn anon_unmap(&self, address: VirtualAddress, size: u64) -> Result<(), PlatformError> {
        self.record(VmOp::AnonUnmap, address.as_u64(), size)
    }

    fn anon_destroy(&self, anonymous: u64) -> Result<(), PlatformError> {
        self.record(VmOp::AnonDestroy, 0, anonymous)
    }
}

/// Delegates to a real platform, logging calls and failing one chosen
/// operation once, for tests that need the memory to exist.
#[cfg(any(target_os = "linux", target_os = "android"))]
#[derive(Clone)]
pub struct Flaky<P: PlatformVm> {
    inner: P,
    calls: Rc<RefCell<Vec<Call>>>,
    fail_on: Rc<Cell<Option<VmOp>>>,
}

#[cfg(any(target_os = "linux", target_os = "android"))]
impl<P: PlatformVm> Flaky<P> {
    pub fn new(inner: P) -> Self {
        Self {
            inner,
            calls: Rc::default(),
            fail_on: Rc::default(),
        }
    }

    pub fn fail_once(&self, op: VmOp) {
        self.fail_on.set(Some(op));
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.borrow().clone()
    }

    fn record(&self, op: VmOp, address: u64, size: u64) -> Result<(), PlatformError> {
        self.calls.borrow_mut().push(Call { op, address, size });
        if self.fail_on.get() == Some(op) {
            self.fail_on.set(None);
            return Err(PlatformError::Os { op, code: 12 });
        }
        Ok(())
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
impl<P: PlatformVm> PlatformVm for Flaky<P> {
    type Anonymous = P::Anonymous;

    fn page_granularity(&self) -> Granularity {
        self.inner.page_granularity()
    }

    fn allocation_granularity(&self) -> Granularity {
        self.inner.allocation_granularity()
    }

    fn supports_placeholders(&self) -> bool {
        self.inner.supports_placeholders()
    }

    fn reserve(&self, size: u64) -> Result<VirtualAddress, PlatformError> {
        self.record(VmOp::Reserve, 0, size)?;
        self.inner.reserve(size)
    }

    unsafe fn commit(&self, address: VirtualAddress, size: u64) -> Result<(), PlatformError> {
        self.record(VmOp::Commit, address.as_u64(), size)?;
        unsafe { self.inner.commit(address, size) }
    }

    unsafe fn decommit(&self, address: VirtualAddress, size: u64) -> Result<(), PlatformError> {
        self.record(VmOp::Decommit, address.as_u64(), size)?;
        unsafe { self.inner.decommit(address, size) }
    }

    unsafe fn release(&self, address: VirtualAddress, size: u64) -> Result<(), PlatformError> {
        self.record(VmOp::Release, address.as_u64(), size)?;
        unsafe { self.inner.release(address, size) }
    }

    fn anon_create(&self, size: u64) -> Result<P::Anonymous, PlatformError> {
        self.record(VmOp::AnonCreate, 0, size)?;
        self.inner.anon_create(size)
    }

    unsafe fn anon_map_fixed(
        &self,
        anonymous: &P::Anonymous,
        address: VirtualAddress,
        size: u64,
    ) -> Result<(), PlatformError> {
        self.record(VmOp::AnonMap, address.as_u64(), size)?;
        unsafe { self.inner.anon_map_fixed(anonymous, address, size) }
    }

    unsafe fn anon_map_at(
        &self,
        anonymous: &P::Anonymous,
        address: VirtualAddress,
        size: u64,
    ) -> Result<(), PlatformError> {
        self.record(VmOp::AnonMap, address.as_u64(), size)?;
        unsafe { self.inner.anon_map_at(anonymous, address, size) }
    }

    unsafe fn anon_unmap(&self, address: VirtualAddress, size: u64) -> Result<(), PlatformError> {
        self.record(VmOp::AnonUnmap, address.as_u64(), size)?;
        unsafe { self.inner.anon_unmap(address, size) }
    }

    fn anon_destroy(&self, anonymous: P::Anonymous) -> Result<(), PlatformError> {
        self.record(VmOp::AnonDestroy, 0, 0)?;
        self.inner.anon_destroy(anonymous)
    }
}
