//! Firmware symbol lookup table.
//!
//! ```text
//!   ┌─────────────┬──────┬──────────┬──────┬──────────┬─────┬──────┐
//!   │ fingerprint │  id  │  value   │  id  │  value   │ ... │ END  │
//!   │    u16      │ u16  │   u32    │ u16  │   u32    │     │ u16  │
//!   └─────────────┴──────┴──────────┴──────┴──────────┴─────┴──────┘
//! ```
//!
//! Values are generic pointers except the build id, which is a number.

use log::{debug, warn};

use crate::bus::{ChipAddr, ChipBus};
use crate::error::{HipError, Mismatch, Result};
use crate::transport::Transport;

/// First word of every symbol table.
pub const SLUT_FINGERPRINT: u16 = 0xD397;

/// Entries read before a table is treated as unterminated.
pub const MAX_SYMBOLS: usize = 64;

/// Symbol ids.
pub mod symbol_id {
    pub const END: u16 = 0x0000;
    pub const SDIO_SLOT_CONFIG: u16 = 0x0003;
    pub const BUILD_ID_NUMBER: u16 = 0x0004;
    pub const BUILD_ID_STRING: u16 = 0x0005;
    pub const PANIC_DATA_MAC: u16 = 0x0007;
    pub const PANIC_DATA_PHY: u16 = 0x0008;
    pub const BOOT_LOADER_CONTROL: u16 = 0x0009;
}

/// What the table told us.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Symbols {
    pub config: Option<ChipAddr>,
    pub build_id: u32,
    pub build_string: Option<ChipAddr>,
    pub panic_mac: Option<ChipAddr>,
    pub panic_phy: Option<ChipAddr>,
    /// Firmware wants a patch loaded through this control word.
    pub loader_control: Option<u32>,
}

fn pointer(id: u16, value: u32) -> Option<ChipAddr> {
    let addr = ChipAddr::from_generic(value);
    if addr.is_none() {
        warn!("hip: symbol {:#06x} has bad pointer {:#010x}", id, value);
    }
    addr
}

/// Walk the table at `table`.
pub fn read_symbols<T: Transport>(bus: &mut ChipBus<T>, table: ChipAddr) -> Result<Symbols> {
    let found = bus.read16(table)?;
    if found != SLUT_FINGERPRINT {
        warn!("hip: symbol table at {:?} has fingerprint {:#06x}", table, found);
        return Err(HipError::ProtocolMismatch(Mismatch::Fingerprint { found }));
    }

    let mut symbols = Symbols::default();
    let mut at = table.add(2);
    for _ in 0..MAX_SYMBOLS {
        let id = bus.read16(at)?;
        if id == symbol_id::END {
            return Ok(symbols);
        }
        let value = bus.read32(at.add(2))?;
        at = at.add(6);

        debug!("hip: symbol {:#06x} = {:#010x}", id, value);
        match id {
            symbol_id::SDIO_SLOT_CONFIG => symbols.config = pointer(id, value),
            symbol_id::BUILD_ID_NUMBER => symbols.build_id = value,
            symbol_id::BUILD_ID_STRING => symbols.build_string = pointer(id, value),
            symbol_id::PANIC_DATA_MAC => symbols.panic_mac = pointer(id, value),
            symbol_id::PANIC_DATA_PHY => symbols.panic_phy = pointer(id, value),
            symbol_id::BOOT_LOADER_CONTROL => symbols.loader_control = Some(value),
            _ => {}
        }
    }

    warn!("hip: symbol table has no end marker after {} entries", MAX_SYMBOLS);
    Ok(symbols)
}
