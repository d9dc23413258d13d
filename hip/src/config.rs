//! Host-side card configuration.
//!
//! Everything here is chosen by the host before attach. Values the
//! firmware dictates live in [`crate::boot::BootConfig`].

/// Paged window onto one chip memory region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    /// Bus address of the first byte of the window.
    pub base: u32,
    /// Register that selects which page the window shows.
    pub page_register: u32,
}

/// Chip address space layout as seen through the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressMap {
    /// Size of every paged window in bytes (power of two).
    pub window_size: u32,
    /// Registers live at bus addresses `0..register_limit`.
    pub register_limit: u32,
    pub data: Window,
    pub program: Window,
    pub shared: Window,
}

impl Default for AddressMap {
    fn default() -> Self {
        Self {
            window_size: 0x2000,
            register_limit: 0x8000,
            data: Window { base: 0x8000, page_register: 0x07E0 },
            program: Window { base: 0xA000, page_register: 0x07E2 },
            shared: Window { base: 0xC000, page_register: 0x07E4 },
        }
    }
}

/// Card configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardConfig {
    /// Total block transfer attempts (first try included).
    pub transfer_attempts: u32,
    /// Rewind completion polls per failed attempt.
    pub rewind_poll_attempts: u32,
    /// Delay between rewind polls (ms).
    pub rewind_poll_interval_ms: u32,
    /// Boot mailbox polls before giving up.
    pub mailbox_poll_attempts: u32,
    /// Delay between mailbox polls (ms).
    pub mailbox_poll_interval_ms: u32,
    /// Completed transfers between reservation rebalances.
    pub packets_interval: u32,
    /// Trailing from-host slots kept for command traffic.
    pub reserved_command_slots: u16,
    /// Command soft queue depth.
    pub command_queue_len: usize,
    /// Depth of each traffic-class soft queue.
    pub traffic_queue_len: usize,
    /// HIP version this host implements (major << 8 | minor).
    pub required_version: u16,
    /// Chip address layout.
    pub address_map: AddressMap,
}

impl Default for CardConfig {
    fn default() -> Self {
        Self {
            transfer_attempts: 3,
            rewind_poll_attempts: 15,
            rewind_poll_interval_ms: 1,
            mailbox_poll_attempts: 200,
            mailbox_poll_interval_ms: 10,
            packets_interval: 1000,
            reserved_command_slots: 2,
            command_queue_len: 16,
            traffic_queue_len: 20,
            required_version: 0x0901,
            address_map: AddressMap::default(),
        }
    }
}

impl CardConfig {
    /// Zero-delay polling, for simulated transports.
    pub fn no_delay() -> Self {
        Self {
            rewind_poll_interval_ms: 0,
            mailbox_poll_interval_ms: 0,
            ..Self::default()
        }
    }

    /// Required major version.
    pub const fn major(&self) -> u8 {
        (self.required_version >> 8) as u8
    }

    /// Minimum minor version.
    pub const fn minor(&self) -> u8 {
        self.required_version as u8
    }
}
