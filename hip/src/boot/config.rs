//! Firmware configuration block.
//!
//! Read once at boot from the address the symbol table names. All
//! fields are little-endian; this module is the only place that knows
//! the byte layout.

use log::warn;
use static_assertions::const_assert_eq;

use crate::error::{HipError, Mismatch, Result};
use crate::qos::NUM_CLASSES;

/// First bulk-data transfer handle; the signal buffers sit below it.
pub const DATA_HANDLE_BASE: u16 = 3;

/// Size of the configuration block on the wire.
pub const CONFIG_BLOCK_LEN: usize = 30;

/// Field offsets within the block.
pub mod offset {
    pub const VERSION: usize = 0;
    pub const SDIO_CTRL_OFFSET: usize = 2;
    pub const FROMHOST_SIGBUF_HANDLE: usize = 4;
    pub const TOHOST_SIGBUF_HANDLE: usize = 6;
    pub const NUM_FROMHOST_SIG_FRAGS: usize = 8;
    pub const NUM_TOHOST_SIG_FRAGS: usize = 10;
    pub const NUM_FROMHOST_DATA_SLOTS: usize = 12;
    pub const NUM_TOHOST_DATA_SLOTS: usize = 14;
    pub const DATA_SLOT_SIZE: usize = 16;
    pub const INITIALISED: usize = 18;
    pub const OVERLAY_SIZE: usize = 20;
    pub const DATA_SLOT_ROUND: usize = 24;
    pub const SIG_FRAG_SIZE: usize = 26;
    pub const TOHOST_SIGNAL_PADDING: usize = 28;
}

const_assert_eq!(offset::TOHOST_SIGNAL_PADDING + 2, CONFIG_BLOCK_LEN);
const_assert_eq!(offset::OVERLAY_SIZE + 4, offset::DATA_SLOT_ROUND);

/// Deserialized configuration block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConfigBlock {
    /// HIP version, major in the high byte.
    pub version: u16,
    /// Control block location in register space.
    pub sdio_ctrl_offset: u16,
    pub fromhost_sigbuf_handle: u16,
    pub tohost_sigbuf_handle: u16,
    pub num_fromhost_sig_frags: u16,
    pub num_tohost_sig_frags: u16,
    pub num_fromhost_data_slots: u16,
    pub num_tohost_data_slots: u16,
    pub data_slot_size: u16,
    /// Set to 1 by the host once it has taken the configuration.
    pub initialised: u16,
    pub overlay_size: u32,
    /// Bulk transfer length granularity.
    pub data_slot_round: u16,
    pub sig_frag_size: u16,
    /// Signal fragments of padding per to-host bus block.
    pub tohost_signal_padding: u16,
}

fn le16(bytes: &[u8; CONFIG_BLOCK_LEN], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

fn le32(bytes: &[u8; CONFIG_BLOCK_LEN], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

impl ConfigBlock {
    pub fn parse(bytes: &[u8; CONFIG_BLOCK_LEN]) -> Self {
        Self {
            version: le16(bytes, offset::VERSION),
            sdio_ctrl_offset: le16(bytes, offset::SDIO_CTRL_OFFSET),
            fromhost_sigbuf_handle: le16(bytes, offset::FROMHOST_SIGBUF_HANDLE),
            tohost_sigbuf_handle: le16(bytes, offset::TOHOST_SIGBUF_HANDLE),
            num_fromhost_sig_frags: le16(bytes, offset::NUM_FROMHOST_SIG_FRAGS),
            num_tohost_sig_frags: le16(bytes, offset::NUM_TOHOST_SIG_FRAGS),
            num_fromhost_data_slots: le16(bytes, offset::NUM_FROMHOST_DATA_SLOTS),
            num_tohost_data_slots: le16(bytes, offset::NUM_TOHOST_DATA_SLOTS),
            data_slot_size: le16(bytes, offset::DATA_SLOT_SIZE),
            initialised: le16(bytes, offset::INITIALISED),
            overlay_size: le32(bytes, offset::OVERLAY_SIZE),
            data_slot_round: le16(bytes, offset::DATA_SLOT_ROUND),
            sig_frag_size: le16(bytes, offset::SIG_FRAG_SIZE),
            tohost_signal_padding: le16(bytes, offset::TOHOST_SIGNAL_PADDING),
        }
    }

    /// Wire image, as the firmware lays it out.
    pub fn to_bytes(&self) -> [u8; CONFIG_BLOCK_LEN] {
        let mut out = [0u8; CONFIG_BLOCK_LEN];
        let mut put = |at: usize, v: u16| out[at..at + 2].copy_from_slice(&v.to_le_bytes());
        put(offset::VERSION, self.version);
        put(offset::SDIO_CTRL_OFFSET, self.sdio_ctrl_offset);
        put(offset::FROMHOST_SIGBUF_HANDLE, self.fromhost_sigbuf_handle);
        put(offset::TOHOST_SIGBUF_HANDLE, self.tohost_sigbuf_handle);
        put(offset::NUM_FROMHOST_SIG_FRAGS, self.num_fromhost_sig_frags);
        put(offset::NUM_TOHOST_SIG_FRAGS, self.num_tohost_sig_frags);
        put(offset::NUM_FROMHOST_DATA_SLOTS, self.num_fromhost_data_slots);
        put(offset::NUM_TOHOST_DATA_SLOTS, self.num_tohost_data_slots);
        put(offset::DATA_SLOT_SIZE, self.data_slot_size);
        put(offset::INITIALISED, self.initialised);
        put(offset::DATA_SLOT_ROUND, self.data_slot_round);
        put(offset::SIG_FRAG_SIZE, self.sig_frag_size);
        put(offset::TOHOST_SIGNAL_PADDING, self.tohost_signal_padding);
        out[offset::OVERLAY_SIZE..offset::OVERLAY_SIZE + 4]
            .copy_from_slice(&self.overlay_size.to_le_bytes());
        out
    }

    pub const fn major(&self) -> u8 {
        (self.version >> 8) as u8
    }

    pub const fn minor(&self) -> u8 {
        self.version as u8
    }

    /// Reject layouts the host cannot run with: every traffic class needs
    /// at least one slot after the command reservation.
    pub fn validate(&self, reserved_command_slots: u16) -> Result<()> {
        let shared = self.num_fromhost_data_slots.saturating_sub(reserved_command_slots);
        if (shared as usize) < NUM_CLASSES {
            warn!(
                "hip: {} from-host slots, {} reserved: too few to share",
                self.num_fromhost_data_slots, reserved_command_slots
            );
            return Err(HipError::ProtocolMismatch(Mismatch::SlotConfig));
        }
        // Every data slot needs its own transfer handle
        let handles = DATA_HANDLE_BASE as u32
            + self.num_fromhost_data_slots as u32
            + self.num_tohost_data_slots as u32;
        if handles > u16::MAX as u32 + 1 {
            warn!(
                "hip: {} + {} data slots overflow the handle space",
                self.num_fromhost_data_slots, self.num_tohost_data_slots
            );
            return Err(HipError::ProtocolMismatch(Mismatch::SlotConfig));
        }
        if self.data_slot_size == 0 || self.sig_frag_size == 0 {
            warn!("hip: zero slot or fragment size in config block");
            return Err(HipError::ProtocolMismatch(Mismatch::SlotConfig));
        }
        Ok(())
    }

    /// Fragments of padding so a to-host signal burst fills whole blocks.
    pub fn signal_padding_for(&self, block_size: usize) -> u16 {
        if self.sig_frag_size == 0 {
            return 0;
        }
        (block_size / self.sig_frag_size as usize) as u16
    }
}
