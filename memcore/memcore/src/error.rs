use memcore_platform::PlatformError;

pub type Result<T, E = MemoryError> = core::result::Result<T, E>;

/// Classification of a [`MemoryError`].
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ErrorKind {
    /// Programmer error; retrying the same call cannot succeed.
    Misuse,
    /// A fixed capacity would be exceeded by this call.
    Exhausted,
    /// The operating system refused a virtual memory operation.
    Platform,
    /// The non-atomic loop mapping lost every race it was allowed to retry.
    RaceExhausted,
}

#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error("cannot reserve a region which is already initialized")]
    RegionAlreadyReserved,
    #[error("region is not initialized")]
    RegionUninitialized,
    #[error("cannot commit more memory to a region than is reserved ({requested} > {reserved})")]
    CommitBeyondReserved { requested: u64, reserved: u64 },
    #[error("cannot allocate more memory than is reserved in the arena ({size} + {requested} > {reserved})")]
    ArenaExhausted {
        size: u64,
        requested: u64,
        reserved: u64,
    },
    #[error("cannot pop the outermost arena frame")]
    OutermostFrame,
    #[error("cannot finish an allocation of {actual} bytes, only {begun} bytes were begun")]
    AllocEndExceedsBegin { actual: u64, begun: u64 },
    #[error("cannot initialize a memory loop which is already initialized")]
    LoopAlreadyInitialized,
    #[error("memory loop is not initialized")]
    LoopUninitialized,
    #[error("size must be greater than zero")]
    ZeroSize,
    #[error(
        "allocation of {requested} bytes does not fit into the overflow margin of {margin} bytes; request a larger maximum allocation size"
    )]
    OverflowMargin { requested: u64, margin: u64 },
    #[error("bookmark {bookmark} lies outside the live range ({start} + {size})")]
    BookmarkOutOfRange { bookmark: u64, start: u64, size: u64 },
    #[error("could not map memory loop, all {attempts} attempts lost the address range to other mappings")]
    LoopRaceExhausted { attempts: u32 },
    #[error("size overflow: {count} x {size} bytes")]
    SizeOverflow { count: u64, size: u64 },
    #[error("alignment {align} is not a power of two")]
    InvalidAlignment { align: usize },
    #[error(transparent)]
    Platform(#[from] PlatformError),
}

impl MemoryError {
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::ArenaExhausted { .. } => ErrorKind::Exhausted,
            Self::Platform(_) => ErrorKind::Platform,
            Self::LoopRaceExhausted { .. } => ErrorKind::RaceExhausted,
            Self::RegionAlreadyReserved
            | Self::RegionUninitialized
            | Self::CommitBeyondReserved { .. }
            | Self::OutermostFrame
            | Self::AllocEndExceedsBegin { .. }
            | Self::LoopAlreadyInitialized
            | Self::LoopUninitialized
            | Self::ZeroSize
            | Self::OverflowMargin { .. }
            | Self::BookmarkOutOfRange { .. }
            | Self::SizeOverflow { .. }
            | Self::InvalidAlignment { .. } => ErrorKind::Misuse,
        }
    }

    #[must_use]
    pub const fn is_misuse(&self) -> bool {
        matches!(self.kind(), ErrorKind::Misuse)
    }
}
