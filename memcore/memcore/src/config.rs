//! # Tunables
//!
//! Per-instance knobs for [`Arena`](crate::Arena) and
//! [`MemoryLoop`](crate::MemoryLoop). Defaults come from [`info`](crate::info).
//!
//! ```rust
//! use memcore::{ArenaConfig, LoopConfig, LoopStrategy};
//!
//! const ARENA: ArenaConfig = ArenaConfig::DEFAULT.with_commit_quantum(64 * 1024);
//! let ring = LoopConfig::default()
//!     .with_strategy(LoopStrategy::Relocate)
//!     .with_max_attempts(4);
//! assert_eq!(ARENA.commit_quantum(), 64 * 1024);
//! assert_eq!(ring.max_attempts(), 4);
//! ```

use crate::info;
use utils_config_derive::Setters;

/// How an [`Arena`](crate::Arena) grows its committed window.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Setters)]
pub struct ArenaConfig {
    /// Bytes committed at init; also the floor for [`Arena::trim`](crate::Arena::trim).
    commit_quantum: u64,
    /// Largest single commit step.
    max_commit_step: u64,
}

impl ArenaConfig {
    pub const DEFAULT: Self = Self {
        commit_quantum: info::ARENA_COMMIT_SIZE,
        max_commit_step: info::ARENA_MAX_INCREMENT_SIZE,
    };
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Which mapping sequence [`MemoryLoop::alloc`](crate::MemoryLoop::alloc) uses.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub enum LoopStrategy {
    /// [`Placeholder`](Self::Placeholder) if the platform supports it,
    /// [`Relocate`](Self::Relocate) otherwise.
    #[default]
    Auto,
    /// Reserve the whole range, then atomically replace it chunk by chunk with
    /// views of the memory object. Nothing can race into the range.
    Placeholder,
    /// Reserve to find a hole, release it, then map the views into the hole.
    /// Another allocation can take the hole in between; the sequence is
    /// retried up to [`LoopConfig::max_attempts`] times.
    Relocate,
}

impl LoopStrategy {
    /// Resolve [`Auto`](Self::Auto) against the platform's capabilities.
    #[must_use]
    pub const fn resolve(self, supports_placeholders: bool) -> Self {
        match self {
            Self::Auto if supports_placeholders => Self::Placeholder,
            Self::Auto => Self::Relocate,
            other => other,
        }
    }
}

/// How a [`MemoryLoop`](crate::MemoryLoop) establishes its mapping.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Setters)]
pub struct LoopConfig {
    strategy: LoopStrategy,
    /// Retry budget of the [`Relocate`](LoopStrategy::Relocate) strategy.
    max_attempts: u32,
}

impl LoopConfig {
    pub const DEFAULT: Self = Self {
        strategy: LoopStrategy::Auto,
        max_attempts: info::LOOP_MAX_ATTEMPTS,
    };
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_prefers_placeholders() {
        assert_eq!(LoopStrategy::Auto.resolve(true), LoopStrategy::Placeholder);
        assert_eq!(LoopStrategy::Auto.resolve(false), LoopStrategy::Relocate);
        assert_eq!(
            LoopStrategy::Relocate.resolve(true),
            LoopStrategy::Relocate
        );
    }

    #[test]
    fn setters_chain() {
        let mut c = ArenaConfig::default();
        c.set_commit_quantum(4096).set_max_commit_step(1 << 20);
        assert_eq!(c.commit_quantum(), 4096);
        assert_eq!(c.max_commit_step(), 1 << 20);
    }
}
