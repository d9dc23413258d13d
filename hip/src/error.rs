//! HIP error types

use core::fmt;

use crate::transport::BusFault;

pub type Result<T> = core::result::Result<T, HipError>;

/// What disagreed with the firmware during the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mismatch {
    /// Symbol table did not start with the expected fingerprint.
    Fingerprint { found: u16 },
    /// Firmware speaks a different protocol version.
    Version { found: u16, required: u16 },
    /// Symbol table ended without naming a configuration block.
    MissingConfig,
    /// Configuration block values are unusable.
    SlotConfig,
}

/// Which fixed resource ran out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    /// No bulk-data slot available for the class.
    Slot,
    /// Soft queue has no free ring entry.
    Queue,
}

/// Closed error kind for every card operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HipError {
    /// A bounded poll ran out of attempts.
    Timeout,
    /// Firmware fingerprint, version or configuration is not acceptable.
    ProtocolMismatch(Mismatch),
    /// Non-retryable bus fault, or retry budget exhausted.
    TransportError,
    /// No slot or no queue entry; never retried internally.
    ResourceExhausted(Resource),
    /// Device removed. Aborts every retry loop and poll immediately.
    Disconnected,
}

impl HipError {
    /// True when the device is gone and the card should be torn down.
    pub const fn is_fatal_device(&self) -> bool {
        matches!(self, Self::Disconnected)
    }
}

impl From<BusFault> for HipError {
    fn from(fault: BusFault) -> Self {
        match fault {
            BusFault::NoDevice => Self::Disconnected,
            BusFault::Transient | BusFault::Fatal => Self::TransportError,
        }
    }
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fingerprint { found } => write!(f, "bad symbol table fingerprint {:#06x}", found),
            Self::Version { found, required } => write!(
                f,
                "firmware HIP version {}.{}, need {}.{}",
                found >> 8,
                found & 0xFF,
                required >> 8,
                required & 0xFF
            ),
            Self::MissingConfig => write!(f, "no configuration block in symbol table"),
            Self::SlotConfig => write!(f, "unusable slot configuration"),
        }
    }
}

impl fmt::Display for HipError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "Timed out waiting for target"),
            Self::ProtocolMismatch(m) => write!(f, "Protocol mismatch: {}", m),
            Self::TransportError => write!(f, "Bus transfer failed"),
            Self::ResourceExhausted(Resource::Slot) => write!(f, "No bulk-data slot available"),
            Self::ResourceExhausted(Resource::Queue) => write!(f, "Soft queue full"),
            Self::Disconnected => write!(f, "Device disconnected"),
        }
    }
}
