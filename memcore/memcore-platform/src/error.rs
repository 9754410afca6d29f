use core::fmt;
use memcore_addresses::VirtualAddress;

/// The platform call that failed.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum VmOp {
    Reserve,
    Commit,
    Decommit,
    Release,
    AnonCreate,
    AnonMap,
    AnonUnmap,
    AnonDestroy,
}

impl VmOp {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Reserve => "reserve",
            Self::Commit => "commit",
            Self::Decommit => "decommit",
            Self::Release => "release",
            Self::AnonCreate => "anon_create",
            Self::AnonMap => "anon_map",
            Self::AnonUnmap => "anon_unmap",
            Self::AnonDestroy => "anon_destroy",
        }
    }
}

impl fmt::Display for VmOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, thiserror::Error)]
pub enum PlatformError {
    /// The OS rejected the call; `code` is the raw OS error number.
    #[error("{op} failed with os error {code}")]
    Os { op: VmOp, code: i32 },
    /// A non-replacing mapping found the target range occupied.
    #[error("address range at {address} is already in use")]
    AddressInUse { address: VirtualAddress },
    /// The platform cannot perform this operation at all.
    #[error("{op} is not supported on this platform")]
    Unsupported { op: VmOp },
}

impl PlatformError {
    /// The raw OS error number, if the OS produced one.
    #[must_use]
    pub const fn os_code(&self) -> Option<i32> {
        match self {
            Self::Os { code, .. } => Some(*code),
            _ => None,
        }
    }
}
