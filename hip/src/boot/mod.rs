//! Boot/handshake sequencer.
//!
//! Brings a freshly reset target to the point where signals can flow:
//!
//! ```text
//!   Reset ─> WaitMailbox ─> LocateSymbols ─> ReadConfig ─> VerifyVersion ─> Ready
//!                                 ^               │
//!                                 └─ PatchReload ─┘  (once, if firmware asks)
//! ```
//!
//! The sequencer only reads and validates; it hands back a [`BootConfig`]
//! and the card is built from that. A failed boot leaves nothing behind.

pub mod config;
pub mod symbols;

pub use config::{ConfigBlock, CONFIG_BLOCK_LEN};
pub use symbols::{read_symbols, symbol_id, Symbols, MAX_SYMBOLS, SLUT_FINGERPRINT};

use alloc::string::String;
use alloc::vec::Vec;

use log::{debug, error, info, warn};

use crate::bus::{ChipAddr, ChipBus};
use crate::config::CardConfig;
use crate::error::{HipError, Mismatch, Result};
use crate::transport::Transport;

/// Mailbox register the firmware writes the symbol table word address to.
pub const MAILBOX: ChipAddr = ChipAddr::register(0x0100);

/// Longest build id string read back.
pub const MAX_BUILD_STRING: usize = 128;

/// Sequencer states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootState {
    Reset,
    WaitMailbox,
    LocateSymbols,
    ReadConfig,
    PatchReload,
    VerifyVersion,
    Ready,
}

/// Loads a firmware patch when the symbol table asks for one.
pub trait FirmwarePatcher<T: Transport> {
    /// Apply the patch through the boot-loader control word.
    ///
    /// # Returns
    /// - `Ok(Some(addr))`: patched firmware published a new symbol table
    /// - `Ok(None)`: nothing to load, keep the current firmware
    fn apply(&mut self, bus: &mut ChipBus<T>, loader_control: u32) -> Result<Option<ChipAddr>>;
}

/// Patcher for hosts that never ship patches.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPatch;

impl<T: Transport> FirmwarePatcher<T> for NoPatch {
    fn apply(&mut self, _bus: &mut ChipBus<T>, loader_control: u32) -> Result<Option<ChipAddr>> {
        debug!("hip: patch requested ({:#010x}), none available", loader_control);
        Ok(None)
    }
}

/// Everything learned from the firmware during boot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootConfig {
    pub block: ConfigBlock,
    /// Where the configuration block lives.
    pub config_addr: ChipAddr,
    pub build_id: u32,
    pub build_string: String,
    pub panic_mac: Option<ChipAddr>,
    pub panic_phy: Option<ChipAddr>,
    /// A firmware patch was loaded.
    pub patched: bool,
}

/// Runs the handshake once.
#[derive(Debug, Clone)]
pub struct BootSequencer {
    mailbox_polls: u32,
    mailbox_interval_ms: u32,
    reserved_command_slots: u16,
    required_version: u16,
    state: BootState,
    history: Vec<BootState>,
}

impl BootSequencer {
    pub fn new(config: &CardConfig) -> Self {
        Self {
            mailbox_polls: config.mailbox_poll_attempts,
            mailbox_interval_ms: config.mailbox_poll_interval_ms,
            reserved_command_slots: config.reserved_command_slots,
            required_version: config.required_version,
            state: BootState::Reset,
            history: Vec::new(),
        }
    }

    pub fn state(&self) -> BootState {
        self.state
    }

    /// States entered so far, in order.
    pub fn history(&self) -> &[BootState] {
        &self.history
    }

    fn enter(&mut self, state: BootState) {
        debug!("hip: boot {:?} -> {:?}", self.state, state);
        self.state = state;
        self.history.push(state);
    }

    /// Drive the target from reset to ready.
    pub fn run<T: Transport, P: FirmwarePatcher<T>>(
        &mut self,
        bus: &mut ChipBus<T>,
        patcher: &mut P,
    ) -> Result<BootConfig> {
        self.history.clear();
        self.enter(BootState::Reset);
        bus.invalidate_pages();

        self.enter(BootState::WaitMailbox);
        let mut table = self.wait_mailbox(bus)?;
        let mut patch_tried = false;
        let mut patched = false;

        let (symbols, config_addr, mut block) = loop {
            self.enter(BootState::LocateSymbols);
            let symbols = read_symbols(bus, table)?;
            let Some(config_addr) = symbols.config else {
                error!("hip: symbol table at {:?} names no config block", table);
                return Err(HipError::ProtocolMismatch(Mismatch::MissingConfig));
            };

            self.enter(BootState::ReadConfig);
            let block = read_config(bus, config_addr)?;

            match symbols.loader_control {
                Some(control) if !patch_tried => {
                    self.enter(BootState::PatchReload);
                    patch_tried = true;
                    match patcher.apply(bus, control)? {
                        Some(next) => {
                            info!("hip: firmware patched, symbol table now at {:?}", next);
                            bus.invalidate_pages();
                            patched = true;
                            table = next;
                        }
                        None => break (symbols, config_addr, block),
                    }
                }
                Some(_) => {
                    warn!("hip: second patch request ignored");
                    break (symbols, config_addr, block);
                }
                None => break (symbols, config_addr, block),
            }
        };

        block.validate(self.reserved_command_slots)?;
        if bus.transport().needs_block_padding() {
            block.tohost_signal_padding = block.signal_padding_for(bus.transport().block_size());
            bus.write16(
                config_addr.add(config::offset::TOHOST_SIGNAL_PADDING as u32),
                block.tohost_signal_padding,
            )?;
            debug!("hip: to-host signal padding {}", block.tohost_signal_padding);
        }

        self.enter(BootState::VerifyVersion);
        self.verify_version(block.version)?;

        bus.write16(config_addr.add(config::offset::INITIALISED as u32), 1)?;
        block.initialised = 1;
        let build_string = match symbols.build_string {
            Some(addr) => read_build_string(bus, addr)?,
            None => String::new(),
        };
        self.enter(BootState::Ready);
        info!(
            "hip: firmware ready, HIP {}.{}, build {} {}",
            block.major(),
            block.minor(),
            symbols.build_id,
            build_string
        );

        Ok(BootConfig {
            block,
            config_addr,
            build_id: symbols.build_id,
            build_string,
            panic_mac: symbols.panic_mac,
            panic_phy: symbols.panic_phy,
            patched,
        })
    }

    /// Poll the mailbox for the symbol table address.
    fn wait_mailbox<T: Transport>(&self, bus: &mut ChipBus<T>) -> Result<ChipAddr> {
        for attempt in 0..self.mailbox_polls {
            match bus.read16(MAILBOX) {
                Ok(0) => {}
                Ok(word) => {
                    debug!("hip: mailbox {:#06x} after {} polls", word, attempt + 1);
                    return Ok(ChipAddr::data(word as u32 * 2));
                }
                Err(HipError::Disconnected) => return Err(HipError::Disconnected),
                Err(err) => debug!("hip: mailbox read failed: {}", err),
            }
            bus.transport_mut().delay_ms(self.mailbox_interval_ms);
        }
        error!("hip: no mailbox after {} polls", self.mailbox_polls);
        Err(HipError::Timeout)
    }

    fn verify_version(&self, found: u16) -> Result<()> {
        let required = self.required_version;
        let major_ok = found >> 8 == required >> 8;
        let minor_ok = found & 0xFF >= required & 0xFF;
        if major_ok && minor_ok {
            return Ok(());
        }
        error!(
            "hip: firmware HIP {}.{} unsupported, need {}.{}",
            found >> 8,
            found & 0xFF,
            required >> 8,
            required & 0xFF
        );
        Err(HipError::ProtocolMismatch(Mismatch::Version { found, required }))
    }
}

fn read_config<T: Transport>(bus: &mut ChipBus<T>, addr: ChipAddr) -> Result<ConfigBlock> {
    let mut raw = [0u8; CONFIG_BLOCK_LEN];
    bus.read_bytes(addr, &mut raw)?;
    Ok(ConfigBlock::parse(&raw))
}

/// NUL-terminated, at most [`MAX_BUILD_STRING`] bytes.
fn read_build_string<T: Transport>(bus: &mut ChipBus<T>, addr: ChipAddr) -> Result<String> {
    let mut bytes = Vec::new();
    let mut at = addr;
    'read: while bytes.len() < MAX_BUILD_STRING {
        for b in bus.read16(at)?.to_le_bytes() {
            if b == 0 {
                break 'read;
            }
            bytes.push(b);
        }
        at = at.add(2);
    }
    bytes.truncate(MAX_BUILD_STRING);
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
