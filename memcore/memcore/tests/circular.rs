#![cfg(any(target_os = "linux", target_os = "android"))]

use core::ptr::NonNull;
use memcore::{Circular, MemoryError, SystemVm};
use proptest::prelude::*;

fn fill(p: NonNull<u8>, len: u64, seed: u8) {
    for i in 0..len {
        #[allow(clippy::cast_possible_truncation)]
        let byte = seed.wrapping_add(i as u8);
        unsafe { p.add(usize::try_from(i).unwrap()).write_volatile(byte) };
    }
}

fn read(p: NonNull<u8>, len: u64) -> Vec<u8> {
    (0..usize::try_from(len).unwrap())
        .map(|i| unsafe { p.add(i).read_volatile() })
        .collect()
}

/// Allocate `total` bytes in blocks no larger than the overflow margin.
fn consume(ring: &mut Circular<SystemVm>, mut total: u64) {
    while total > 0 {
        let n = total.min(ring.overflow());
        ring.alloc(n).unwrap().unwrap();
        total -= n;
    }
}

#[test]
fn block_across_the_wrap_reads_back_contiguously() {
    let mut ring = Circular::new(4096, 256).unwrap();
    let cap = ring.capacity();

    consume(&mut ring, cap - 196);
    let mark = ring.bookmark();
    ring.alloc(100).unwrap().unwrap();
    ring.pop_to_bookmark(mark).unwrap();
    assert_eq!(ring.start(), cap - 196);
    assert_eq!(ring.len(), 100);

    let block = ring.alloc(300).unwrap().unwrap();
    assert_eq!(ring.len(), 400);
    fill(block, 300, 0x10);
    assert_eq!(
        read(block, 300),
        (0..300u32).map(|i| 0x10_u8.wrapping_add(i as u8)).collect::<Vec<_>>()
    );

    // The tail past the wrap lives at the front of the primary view.
    let front = ring.data_at(memcore::Bookmark::default()).unwrap();
    assert_eq!(read(front, 204), read(unsafe { block.add(96) }, 204));
}

#[test]
fn full_ring_is_backpressure_not_failure() {
    let mut ring = Circular::new(4096, 4096).unwrap();
    let cap = ring.capacity();
    consume(&mut ring, cap);
    assert_eq!(ring.free(), 0);
    assert!(ring.alloc(1).unwrap().is_none());

    let err = ring.alloc(ring.overflow() + 1).unwrap_err();
    assert!(matches!(err, MemoryError::OverflowMargin { .. }));
}

#[test]
fn consumer_follows_producer() {
    let mut ring = Circular::new(8192, 512).unwrap();
    let mut expected = Vec::new();

    for round in 0..100_u8 {
        let mark = ring.bookmark();
        let p = ring.alloc(300).unwrap().unwrap();
        fill(p, 300, round);
        expected.push(mark);

        // Keep at most two messages in flight.
        if expected.len() > 2 {
            let oldest = expected.remove(0);
            let data = ring.data_at(oldest).unwrap();
            assert_eq!(read(data, 1)[0], round - 2);
            ring.pop_to_bookmark(expected[0]).unwrap();
        }
    }
    assert_eq!(ring.len(), 600);
}

#[test]
fn deinit_then_reinit() {
    let mut ring = Circular::new(4096, 256).unwrap();
    ring.alloc(10).unwrap();
    ring.deinit().unwrap();
    assert!(!ring.is_initialized());
    assert!(matches!(ring.alloc(1), Err(MemoryError::LoopUninitialized)));

    ring.init(4096, 256).unwrap();
    assert!(ring.is_empty());
    assert!(ring.alloc(10).unwrap().is_some());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn bookmark_round_trip(
        skip in 0u64..4096,
        before in 0u64..=256,
        after in proptest::collection::vec(1u64..=256, 0..8),
    ) {
        let mut ring = Circular::new(4096, 256).unwrap();
        let cap = ring.capacity();
        let skip = skip % cap;

        // Move `start` to an arbitrary offset.
        consume(&mut ring, skip);
        ring.pop_to_bookmark(ring.bookmark()).unwrap();
        prop_assert!(ring.is_empty());

        ring.alloc(before).unwrap().unwrap();
        let mark = ring.bookmark();
        let mut allocated = 0;
        for n in after {
            if ring.alloc(n).unwrap().is_some() {
                allocated += n;
            }
        }

        ring.pop_to_bookmark(mark).unwrap();
        prop_assert_eq!(ring.start(), mark.offset());
        prop_assert_eq!(ring.len(), allocated);
    }
}
