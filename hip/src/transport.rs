//! Transport port consumed by the card.
//!
//! The card never touches the bus directly. Everything that signals on
//! the wire (register access, block transfers, interrupt plumbing and the
//! inter-attempt delays) goes through [`Transport`]. Implementations live
//! in the OS glue; tests use an in-memory device.

use bitflags::bitflags;

/// How a single bus operation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusFault {
    /// CRC/timeout style error. The operation may succeed if repeated
    /// after the target has been resynchronised.
    Transient,
    /// The bus refused the operation; retrying will not help.
    Fatal,
    /// The device is gone.
    NoDevice,
}

/// Result of a single bus operation.
pub type BusResult<T> = core::result::Result<T, BusFault>;

/// Bus function an address belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    /// Card-common registers (interrupt enable/pending).
    Common,
    /// Windowed chip address space.
    Chip,
}

/// Block transfer direction, seen from the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Host writes to the target.
    FromHost,
    /// Host reads from the target.
    ToHost,
}

/// Interrupt control operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptOp {
    Enable,
    Disable,
    /// Read pending sources.
    Status,
    /// Clear the given pending sources.
    Acknowledge,
}

bitflags! {
    /// Target-to-host interrupt sources.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct InterruptSource: u8 {
        /// Target has signals or bulk data for the host.
        const DATA = 1 << 0;
        /// Mailbox written (boot handshake).
        const MAILBOX = 1 << 1;
        /// Target reported an internal error.
        const ERROR = 1 << 2;
    }
}

/// Bus primitives supplied by the platform.
pub trait Transport {
    /// Read one byte.
    fn read8(&mut self, function: Function, addr: u32) -> BusResult<u8>;

    /// Read one little-endian 16-bit word.
    fn read16(&mut self, function: Function, addr: u32) -> BusResult<u16>;

    /// Write one byte.
    fn write8(&mut self, function: Function, addr: u32, value: u8) -> BusResult<()>;

    /// Write one little-endian 16-bit word.
    fn write16(&mut self, function: Function, addr: u32, value: u16) -> BusResult<()>;

    /// Move `buffer` to or from the transfer handle.
    ///
    /// # Returns
    /// - `Ok(n)`: `n` bytes moved
    /// - `Err(BusFault::Transient)`: partial transfer, target must be rewound
    fn block_transfer(
        &mut self,
        handle: u16,
        buffer: &mut [u8],
        direction: Direction,
    ) -> BusResult<usize>;

    /// Enable, disable, query or acknowledge interrupt sources.
    ///
    /// Returns the pending sources for [`InterruptOp::Status`], the
    /// affected sources otherwise.
    fn interrupt_control(
        &mut self,
        op: InterruptOp,
        source: InterruptSource,
    ) -> BusResult<InterruptSource>;

    /// Bus block size in bytes.
    fn block_size(&self) -> usize;

    /// True if transfers must be padded to whole blocks.
    fn needs_block_padding(&self) -> bool {
        false
    }

    /// Sleep between poll attempts.
    fn delay_ms(&mut self, ms: u32);
}
