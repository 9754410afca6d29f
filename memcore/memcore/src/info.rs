//! # Default Sizes and Budgets

/// Bytes an arena commits up front, and the smallest committed window
/// [`Arena::trim`](crate::Arena::trim) shrinks to.
pub const ARENA_COMMIT_SIZE: u64 = 1024;

/// Upper bound on a single commit step when an arena grows.
///
/// Growth doubles the committed window, but never by more than this, so one
/// allocation never stalls on an arbitrarily large protection change.
pub const ARENA_MAX_INCREMENT_SIZE: u64 = 64 * 1024 * 1024;

/// Bytes of the inline record `Arena::push` writes: previous frame start and
/// previous frame size, one `u64` each.
pub const ARENA_FRAME_HEADER_SIZE: u64 = 16;

/// How often the non-atomic memory loop mapping is retried before giving up.
pub const LOOP_MAX_ATTEMPTS: u32 = 32;

const _: () = {
    assert!(ARENA_COMMIT_SIZE > 0);
    assert!(ARENA_MAX_INCREMENT_SIZE >= ARENA_COMMIT_SIZE);
    assert!(ARENA_FRAME_HEADER_SIZE == 2 * size_of::<u64>() as u64);
    assert!(LOOP_MAX_ATTEMPTS > 0);
};
