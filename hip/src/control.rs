//! Host/firmware control block.
//!
//! A handful of registers at the firmware-chosen `sdio_ctrl_offset`:
//!
//! | offset | use |
//! |---|---|
//! | `+2` | interrupt sequence; any write raises a target interrupt |
//! | `+4` | host liveness counter |
//! | `+8` | rewind handle; firmware clears it to 0 when done |

use log::trace;

use crate::bus::{ChipAddr, ChipBus};
use crate::error::Result;
use crate::transport::Transport;

/// Interrupt sequence register.
pub const INTERRUPT_SEQ: u32 = 2;
/// Liveness register.
pub const LIVENESS: u32 = 4;
/// Rewind request/status register.
pub const REWIND: u32 = 8;

/// Control block registers plus the counters written into them.
#[derive(Debug, Clone)]
pub struct ControlBlock {
    base: ChipAddr,
    interrupt_seq: u32,
    liveness: u16,
}

impl ControlBlock {
    pub const fn new(base: ChipAddr) -> Self {
        Self {
            base,
            interrupt_seq: 0,
            liveness: 0,
        }
    }

    pub const fn base(&self) -> ChipAddr {
        self.base
    }

    /// Interrupts raised so far.
    pub const fn interrupt_seq(&self) -> u32 {
        self.interrupt_seq
    }

    /// Raise an interrupt on the target.
    pub fn generate_interrupt<T: Transport>(&mut self, bus: &mut ChipBus<T>) -> Result<()> {
        bus.write8(self.base.add(INTERRUPT_SEQ), self.interrupt_seq as u8)?;
        self.interrupt_seq = self.interrupt_seq.wrapping_add(1);
        trace!("hip: target interrupt #{}", self.interrupt_seq);
        Ok(())
    }

    /// Write the next liveness value. Returns the value written.
    pub fn liveness_tick<T: Transport>(&mut self, bus: &mut ChipBus<T>) -> Result<u16> {
        let next = self.liveness.wrapping_add(1);
        bus.write16(self.base.add(LIVENESS), next)?;
        self.liveness = next;
        Ok(next)
    }

    /// Ask the firmware to discard the partial fragment on `handle`.
    pub fn request_rewind<T: Transport>(&mut self, bus: &mut ChipBus<T>, handle: u16) -> Result<()> {
        bus.write16(self.base.add(REWIND), handle)?;
        self.generate_interrupt(bus)
    }

    /// True once the firmware has cleared the rewind register.
    pub fn rewind_done<T: Transport>(&self, bus: &mut ChipBus<T>) -> Result<bool> {
        Ok(bus.read16(self.base.add(REWIND))? == 0)
    }
}
