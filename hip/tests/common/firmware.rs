use crate::common::MockDevice;
use hip_card::boot::{symbol_id, SLUT_FINGERPRINT};
use hip_card::{ChipAddr, ConfigBlock};

/// Where the builder places things in data memory
pub const TABLE: ChipAddr = ChipAddr::data(0x1000);
pub const CONFIG: ChipAddr = ChipAddr::data(0x2000);
pub const BUILD_STRING: ChipAddr = ChipAddr::data(0x3000);
pub const PANIC_MAC: ChipAddr = ChipAddr::data(0x3100);
pub const CONTROL_OFFSET: u16 = 0x0400;

/// Lays out a symbol table, config block and build string the way the
/// firmware publishes them.
pub struct FirmwareBuilder {
    pub block: ConfigBlock,
    pub fingerprint: u16,
    pub build_id: u32,
    pub build_string: &'static str,
    pub loader_control: Option<u32>,
    pub with_config: bool,
    pub table: ChipAddr,
    pub config: ChipAddr,
}

impl FirmwareBuilder {
    pub fn new() -> Self {
        Self {
            block: Self::default_block(),
            fingerprint: SLUT_FINGERPRINT,
            build_id: 1234,
            build_string: "hip-test-fw 9.2",
            loader_control: None,
            with_config: true,
            table: TABLE,
            config: CONFIG,
        }
    }

    pub fn default_block() -> ConfigBlock {
        ConfigBlock {
            version: 0x0902,
            sdio_ctrl_offset: CONTROL_OFFSET,
            fromhost_sigbuf_handle: 1,
            tohost_sigbuf_handle: 2,
            num_fromhost_sig_frags: 64,
            num_tohost_sig_frags: 64,
            num_fromhost_data_slots: 18,
            num_tohost_data_slots: 4,
            data_slot_size: 1600,
            initialised: 0,
            overlay_size: 0,
            data_slot_round: 32,
            sig_frag_size: 16,
            tohost_signal_padding: 0,
        }
    }

    /// Symbol table image: fingerprint, entries, end marker
    pub fn table_bytes(&self) -> Vec<u8> {
        let mut out = self.fingerprint.to_le_bytes().to_vec();
        let mut entry = |id: u16, value: u32| {
            out.extend_from_slice(&id.to_le_bytes());
            out.extend_from_slice(&value.to_le_bytes());
        };
        entry(0x0042, 0xDEAD_BEEF); // unknown, skipped
        if self.with_config {
            entry(symbol_id::SDIO_SLOT_CONFIG, self.config.to_generic());
        }
        entry(symbol_id::BUILD_ID_NUMBER, self.build_id);
        entry(symbol_id::BUILD_ID_STRING, BUILD_STRING.to_generic());
        entry(symbol_id::PANIC_DATA_MAC, PANIC_MAC.to_generic());
        if let Some(control) = self.loader_control {
            entry(symbol_id::BOOT_LOADER_CONTROL, control);
        }
        out.extend_from_slice(&symbol_id::END.to_le_bytes());
        out
    }

    /// Write the firmware image into `device` and publish the mailbox
    pub fn install(&self, device: &mut MockDevice) {
        device.poke(self.table, &self.table_bytes());
        device.poke(self.config, &self.block.to_bytes());
        let mut text = self.build_string.as_bytes().to_vec();
        text.push(0);
        device.poke(BUILD_STRING, &text);
        device.mailbox_value = (self.table.offset / 2) as u16;
        device.control = Some(self.block.sdio_ctrl_offset as u32);
    }

    pub fn build(&self) -> MockDevice {
        let mut device = MockDevice::new();
        self.install(&mut device);
        device
    }
}
