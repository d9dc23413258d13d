//! Common test utilities and a mock HIP device

#![allow(dead_code)]

pub mod firmware;
pub use firmware::FirmwareBuilder;

use hip_card::transport::{BusFault, BusResult, Direction, Function, InterruptOp, InterruptSource};
use hip_card::{AddressMap, ChipAddr, Region, Transport};
use std::collections::{HashMap, VecDeque};

/// Size of every emulated memory region
pub const REGION_SIZE: usize = 0x1_0000;

/// One recorded block transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
    pub handle: u16,
    pub direction: Direction,
    pub bytes: Vec<u8>,
}

/// In-memory chip behind a paged bus
#[derive(Debug, Clone)]
pub struct MockDevice {
    pub map: AddressMap,
    /// Registers, data, program and shared memory, indexed by region code
    pub regions: [Vec<u8>; 4],
    /// Control block base in register space; enables rewind emulation
    pub control: Option<u32>,
    /// Mailbox value published after this many zero reads
    pub mailbox_delay: u32,
    pub mailbox_value: u16,
    mailbox_reads: u32,
    /// Faults returned by upcoming block transfers, in order
    pub transfer_faults: VecDeque<BusFault>,
    pub transfers: Vec<Transfer>,
    /// Data the target returns per to-host handle
    pub to_host: HashMap<u16, Vec<u8>>,
    /// Handles named in rewind requests
    pub rewinds: Vec<u16>,
    /// Firmware never acknowledges a rewind
    pub rewind_stuck: bool,
    /// Values written to the interrupt sequence register
    pub interrupts: Vec<u8>,
    pub enabled: InterruptSource,
    pub pending: InterruptSource,
    pub block_size: usize,
    pub padding: bool,
    /// Total requested delay
    pub slept_ms: u64,
    /// Device removed: every access fails with `NoDevice`
    pub gone: bool,
    /// Remove the device right after the next scripted fault
    pub vanish_on_fault: bool,
}

impl MockDevice {
    pub fn new() -> Self {
        Self {
            map: AddressMap::default(),
            regions: [
                vec![0u8; REGION_SIZE],
                vec![0u8; REGION_SIZE],
                vec![0u8; REGION_SIZE],
                vec![0u8; REGION_SIZE],
            ],
            control: None,
            mailbox_delay: 0,
            mailbox_value: 0,
            mailbox_reads: 0,
            transfer_faults: VecDeque::new(),
            transfers: Vec::new(),
            to_host: HashMap::new(),
            rewinds: Vec::new(),
            rewind_stuck: false,
            interrupts: Vec::new(),
            enabled: InterruptSource::empty(),
            pending: InterruptSource::empty(),
            block_size: 64,
            padding: false,
            slept_ms: 0,
            gone: false,
            vanish_on_fault: false,
        }
    }

    /// Write raw bytes at a chip address
    pub fn poke(&mut self, addr: ChipAddr, bytes: &[u8]) {
        let at = addr.offset as usize;
        self.regions[addr.region as usize][at..at + bytes.len()].copy_from_slice(bytes);
    }

    pub fn poke16(&mut self, addr: ChipAddr, value: u16) {
        self.poke(addr, &value.to_le_bytes());
    }

    pub fn peek16(&self, addr: ChipAddr) -> u16 {
        let at = addr.offset as usize;
        let mem = &self.regions[addr.region as usize];
        u16::from_le_bytes([mem[at], mem[at + 1]])
    }

    /// Transfers to `handle`, oldest first
    pub fn transfers_to(&self, handle: u16) -> Vec<&Transfer> {
        self.transfers.iter().filter(|t| t.handle == handle).collect()
    }

    /// Map a bus address back to (region, offset) through the page registers
    fn locate(&self, addr: u32) -> BusResult<(usize, usize)> {
        let map = &self.map;
        if addr < map.register_limit {
            return Ok((Region::Registers as usize, addr as usize));
        }
        let windows = [
            (Region::DataMemory, map.data),
            (Region::ProgramMemory, map.program),
            (Region::SharedMemory, map.shared),
        ];
        for (region, window) in windows {
            if (window.base..window.base + map.window_size).contains(&addr) {
                let page = self.peek16(ChipAddr::register(window.page_register)) as u32;
                let offset = page * map.window_size + (addr - window.base);
                return Ok((region as usize, offset as usize));
            }
        }
        Err(BusFault::Fatal)
    }

    fn is_mailbox(&self, region: usize, offset: usize) -> bool {
        region == Region::Registers as usize && offset == hip_card::boot::MAILBOX.offset as usize
    }

    fn control_reg(&self, region: usize, offset: usize, reg: u32) -> bool {
        region == Region::Registers as usize && self.control.map(|c| (c + reg) as usize) == Some(offset)
    }

    fn check(&self) -> BusResult<()> {
        if self.gone {
            return Err(BusFault::NoDevice);
        }
        Ok(())
    }
}

impl Default for MockDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for MockDevice {
    fn read8(&mut self, _function: Function, addr: u32) -> BusResult<u8> {
        self.check()?;
        let (region, offset) = self.locate(addr)?;
        Ok(self.regions[region][offset])
    }

    fn read16(&mut self, _function: Function, addr: u32) -> BusResult<u16> {
        self.check()?;
        let (region, offset) = self.locate(addr)?;
        if self.is_mailbox(region, offset) {
            self.mailbox_reads += 1;
            if self.mailbox_reads <= self.mailbox_delay {
                return Ok(0);
            }
            return Ok(self.mailbox_value);
        }
        let mem = &self.regions[region];
        Ok(u16::from_le_bytes([mem[offset], mem[offset + 1]]))
    }

    fn write8(&mut self, _function: Function, addr: u32, value: u8) -> BusResult<()> {
        self.check()?;
        let (region, offset) = self.locate(addr)?;
        if self.control_reg(region, offset, hip_card::control::INTERRUPT_SEQ) {
            self.interrupts.push(value);
        }
        self.regions[region][offset] = value;
        Ok(())
    }

    fn write16(&mut self, _function: Function, addr: u32, value: u16) -> BusResult<()> {
        self.check()?;
        let (region, offset) = self.locate(addr)?;
        let mut stored = value;
        if self.control_reg(region, offset, hip_card::control::REWIND) {
            self.rewinds.push(value);
            // Firmware finishes the rewind before the host looks again
            if !self.rewind_stuck {
                stored = 0;
            }
        }
        self.regions[region][offset..offset + 2].copy_from_slice(&stored.to_le_bytes());
        Ok(())
    }

    fn block_transfer(
        &mut self,
        handle: u16,
        buffer: &mut [u8],
        direction: Direction,
    ) -> BusResult<usize> {
        self.check()?;
        if let Some(fault) = self.transfer_faults.pop_front() {
            self.gone |= self.vanish_on_fault;
            return Err(fault);
        }
        if direction == Direction::ToHost {
            if let Some(data) = self.to_host.get(&handle) {
                let n = data.len().min(buffer.len());
                buffer[..n].copy_from_slice(&data[..n]);
            }
        }
        self.transfers.push(Transfer {
            handle,
            direction,
            bytes: buffer.to_vec(),
        });
        Ok(buffer.len())
    }

    fn interrupt_control(
        &mut self,
        op: InterruptOp,
        source: InterruptSource,
    ) -> BusResult<InterruptSource> {
        self.check()?;
        match op {
            InterruptOp::Enable => self.enabled |= source,
            InterruptOp::Disable => self.enabled -= source,
            InterruptOp::Status => return Ok(self.pending & self.enabled & source),
            InterruptOp::Acknowledge => self.pending -= source,
        }
        Ok(source)
    }

    fn block_size(&self) -> usize {
        self.block_size
    }

    fn needs_block_padding(&self) -> bool {
        self.padding
    }

    fn delay_ms(&mut self, ms: u32) {
        self.slept_ms += ms as u64;
    }
}
