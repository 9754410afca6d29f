#![cfg(any(target_os = "linux", target_os = "android"))]

use memcore::{MemoryError, PlatformVm, Region, SystemVm};
use proptest::prelude::*;

fn region(size: u64) -> Region<SystemVm> {
    let mut r = Region::new(SystemVm::new());
    r.reserve(size).unwrap();
    r
}

#[test]
fn committed_memory_is_zeroed_and_writable() {
    let mut r = region(1 << 20);
    r.commit(10_000).unwrap();
    let p = r.start().unwrap();
    unsafe {
        assert_eq!(p.add(9_999).read(), 0);
        p.add(9_999).write(0x5A);
        assert_eq!(p.add(9_999).read(), 0x5A);
    }
}

#[test]
fn reverted_pages_come_back_zeroed() {
    let mut r = region(1 << 20);
    let page = SystemVm::new().page_granularity().get();
    r.commit(4 * page).unwrap();
    let p = r.start().unwrap();
    unsafe { p.add(usize::try_from(2 * page).unwrap()).write(0x77) };

    unsafe { r.revert(page).unwrap() };
    assert_eq!(r.committed(), page);
    r.commit(4 * page).unwrap();
    assert_eq!(unsafe { p.add(usize::try_from(2 * page).unwrap()).read() }, 0);
}

#[test]
fn lifecycle() {
    let mut r = Region::new(SystemVm::new());
    assert!(!r.is_initialized());
    r.dealloc().unwrap();

    r.reserve_array(16, 4096).unwrap();
    assert_eq!(r.reserved(), 16 * 4096);
    assert!(matches!(r.reserve(1), Err(MemoryError::RegionAlreadyReserved)));

    r.dealloc().unwrap();
    assert!(!r.is_initialized());
    r.reserve(1).unwrap();
    assert_eq!(r.reserved(), 1);
}

proptest! {
    #[test]
    fn revert_lowers_commit_exactly(n in 1u64..(1 << 18), m in 0u64..(1 << 18)) {
        let mut r = region(1 << 18);
        r.commit(n).unwrap();
        unsafe { r.revert(m).unwrap() };
        prop_assert_eq!(r.committed(), m.min(n));
    }

    #[test]
    fn commit_never_shrinks(a in 0u64..(1 << 18), b in 0u64..(1 << 18)) {
        let mut r = region(1 << 18);
        r.commit(a).unwrap();
        r.commit(b).unwrap();
        prop_assert_eq!(r.committed(), a.max(b));
        prop_assert!(r.committed() <= r.reserved());
    }
}
