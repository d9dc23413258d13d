//! Addressing unit.
//!
//! Translates logical chip addresses into bus addresses. Data, program
//! and shared memory are only reachable through fixed-size windows whose
//! page is chosen by a page-select register; the last page written per
//! window is cached so consecutive accesses to one page cost a single
//! register write.
//!
//! # Address layout
//! ```text
//!   generic pointer:  [31..24] region code   [23..0] offset
//!
//!   bus:  0x0000 ────────── registers ────────── register_limit
//!         data.base    ─── window (page n) ───   + window_size
//!         program.base ─── window (page n) ───   + window_size
//!         shared.base  ─── window (page n) ───   + window_size
//! ```

use log::{trace, warn};

use crate::config::{AddressMap, Window};
use crate::error::{HipError, Result};
use crate::transport::{Function, Transport};

/// Chip memory region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Region {
    /// Directly mapped registers, never paged.
    Registers = 0,
    DataMemory = 1,
    ProgramMemory = 2,
    SharedMemory = 3,
}

impl Region {
    /// Decode the region code of a generic pointer.
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Registers),
            1 => Some(Self::DataMemory),
            2 => Some(Self::ProgramMemory),
            3 => Some(Self::SharedMemory),
            _ => None,
        }
    }

    /// Page cache slot, `None` for unpaged regions.
    const fn window_index(self) -> Option<usize> {
        match self {
            Self::Registers => None,
            Self::DataMemory => Some(0),
            Self::ProgramMemory => Some(1),
            Self::SharedMemory => Some(2),
        }
    }
}

/// Logical chip address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChipAddr {
    pub region: Region,
    pub offset: u32,
}

impl ChipAddr {
    pub const fn new(region: Region, offset: u32) -> Self {
        Self { region, offset }
    }

    pub const fn register(offset: u32) -> Self {
        Self::new(Region::Registers, offset)
    }

    pub const fn data(offset: u32) -> Self {
        Self::new(Region::DataMemory, offset)
    }

    /// Decode a 32-bit generic pointer as stored in firmware tables.
    pub const fn from_generic(ptr: u32) -> Option<Self> {
        match Region::from_code((ptr >> 24) as u8) {
            Some(region) => Some(Self::new(region, ptr & 0x00FF_FFFF)),
            None => None,
        }
    }

    /// Encode as a generic pointer.
    pub const fn to_generic(self) -> u32 {
        ((self.region as u32) << 24) | (self.offset & 0x00FF_FFFF)
    }

    /// Same region, `bytes` further on.
    pub const fn add(self, bytes: u32) -> Self {
        Self::new(self.region, self.offset + bytes)
    }
}

/// Transport plus page-select cache.
pub struct ChipBus<T: Transport> {
    transport: T,
    map: AddressMap,
    /// Last page written per window; `None` forces the next write.
    pages: [Option<u32>; 3],
    page_writes: u32,
}

impl<T: Transport> ChipBus<T> {
    pub fn new(transport: T, map: AddressMap) -> Self {
        debug_assert!(map.window_size.is_power_of_two(), "window size must be a power of two");
        Self {
            transport,
            map,
            pages: [None; 3],
            page_writes: 0,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_inner(self) -> T {
        self.transport
    }

    pub fn address_map(&self) -> &AddressMap {
        &self.map
    }

    /// Forget cached pages; the next access to each window rewrites its
    /// page register. Needed whenever the target may have been reset.
    pub fn invalidate_pages(&mut self) {
        self.pages = [None; 3];
    }

    /// Page register writes issued so far.
    pub fn page_writes(&self) -> u32 {
        self.page_writes
    }

    fn window(&self, index: usize) -> Window {
        match index {
            0 => self.map.data,
            1 => self.map.program,
            _ => self.map.shared,
        }
    }

    /// Resolve `addr` to a bus address, selecting its page if needed.
    pub fn translate(&mut self, addr: ChipAddr) -> Result<u32> {
        let Some(index) = addr.region.window_index() else {
            if addr.offset >= self.map.register_limit {
                warn!("hip: register {:#x} outside register space", addr.offset);
                return Err(HipError::TransportError);
            }
            return Ok(addr.offset);
        };

        let window = self.window(index);
        let page = addr.offset / self.map.window_size;
        if self.pages[index] != Some(page) {
            trace!("hip: {:?} page -> {}", addr.region, page);
            if let Err(fault) =
                self.transport
                    .write16(Function::Chip, window.page_register, page as u16)
            {
                self.pages[index] = None;
                return Err(fault.into());
            }
            self.pages[index] = Some(page);
            self.page_writes += 1;
        }
        Ok(window.base + (addr.offset & (self.map.window_size - 1)))
    }

    pub fn read8(&mut self, addr: ChipAddr) -> Result<u8> {
        let bus = self.translate(addr)?;
        Ok(self.transport.read8(Function::Chip, bus)?)
    }

    pub fn read16(&mut self, addr: ChipAddr) -> Result<u16> {
        let bus = self.translate(addr)?;
        Ok(self.transport.read16(Function::Chip, bus)?)
    }

    /// Two 16-bit reads, low word first.
    pub fn read32(&mut self, addr: ChipAddr) -> Result<u32> {
        let lo = self.read16(addr)? as u32;
        let hi = self.read16(addr.add(2))? as u32;
        Ok(lo | (hi << 16))
    }

    pub fn write8(&mut self, addr: ChipAddr, value: u8) -> Result<()> {
        let bus = self.translate(addr)?;
        Ok(self.transport.write8(Function::Chip, bus, value)?)
    }

    pub fn write16(&mut self, addr: ChipAddr, value: u16) -> Result<()> {
        let bus = self.translate(addr)?;
        Ok(self.transport.write16(Function::Chip, bus, value)?)
    }

    /// Fill `buf` from consecutive chip addresses using word reads.
    pub fn read_bytes(&mut self, addr: ChipAddr, buf: &mut [u8]) -> Result<()> {
        let mut chunks = buf.chunks_exact_mut(2);
        let mut at = addr;
        for pair in &mut chunks {
            pair.copy_from_slice(&self.read16(at)?.to_le_bytes());
            at = at.add(2);
        }
        if let [last] = chunks.into_remainder() {
            *last = self.read8(at)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{BusFault, BusResult, Direction, InterruptOp, InterruptSource};
    use alloc::vec::Vec;

    /// Records every write; reads return the low byte of the address.
    #[derive(Default)]
    struct Recorder {
        writes: Vec<(u32, u16)>,
        fail_writes: bool,
    }

    impl Transport for Recorder {
        fn read8(&mut self, _: Function, addr: u32) -> BusResult<u8> {
            Ok(addr as u8)
        }
        fn read16(&mut self, _: Function, addr: u32) -> BusResult<u16> {
            Ok(addr as u16)
        }
        fn write8(&mut self, _: Function, addr: u32, value: u8) -> BusResult<()> {
            self.write16(Function::Chip, addr, value as u16)
        }
        fn write16(&mut self, _: Function, addr: u32, value: u16) -> BusResult<()> {
            if self.fail_writes {
                return Err(BusFault::Fatal);
            }
            self.writes.push((addr, value));
            Ok(())
        }
        fn block_transfer(&mut self, _: u16, buf: &mut [u8], _: Direction) -> BusResult<usize> {
            Ok(buf.len())
        }
        fn interrupt_control(
            &mut self,
            _: InterruptOp,
            source: InterruptSource,
        ) -> BusResult<InterruptSource> {
            Ok(source)
        }
        fn block_size(&self) -> usize {
            64
        }
        fn delay_ms(&mut self, _: u32) {}
    }

    #[test]
    fn test_generic_pointer_decode() {
        let addr = ChipAddr::from_generic(0x0100_1234).unwrap();
        assert_eq!(addr, ChipAddr::data(0x1234));
        assert_eq!(addr.to_generic(), 0x0100_1234);
        assert!(ChipAddr::from_generic(0x0700_0000).is_none());
    }

    #[test]
    fn test_registers_are_unpaged() {
        let mut bus = ChipBus::new(Recorder::default(), AddressMap::default());
        assert_eq!(bus.translate(ChipAddr::register(0x40)).unwrap(), 0x40);
        assert!(bus.transport().writes.is_empty());
        assert_eq!(
            bus.translate(ChipAddr::register(0x8000)),
            Err(HipError::TransportError)
        );
    }

    #[test]
    fn test_page_select_is_cached() {
        let mut bus = ChipBus::new(Recorder::default(), AddressMap::default());

        // Page 1 of data memory, offset 0x10 in the window
        assert_eq!(bus.translate(ChipAddr::data(0x2010)).unwrap(), 0x8010);
        assert_eq!(bus.translate(ChipAddr::data(0x2FFE)).unwrap(), 0x8FFE);
        assert_eq!(bus.transport().writes, [(0x07E0, 1)]);

        // Another window keeps its own page
        assert_eq!(
            bus.translate(ChipAddr::new(Region::ProgramMemory, 0x10)).unwrap(),
            0xA010
        );
        assert_eq!(bus.page_writes(), 2);

        // Invalidation forces a rewrite of the same page
        bus.invalidate_pages();
        bus.translate(ChipAddr::data(0x2000)).unwrap();
        assert_eq!(bus.transport().writes.last(), Some(&(0x07E0, 1)));
        assert_eq!(bus.page_writes(), 3);
    }

    #[test]
    fn test_failed_page_write_drops_cache() {
        let mut bus = ChipBus::new(Recorder::default(), AddressMap::default());
        bus.translate(ChipAddr::data(0x4000)).unwrap();
        bus.transport_mut().fail_writes = true;
        assert!(bus.translate(ChipAddr::data(0x6000)).is_err());
        bus.transport_mut().fail_writes = false;
        // Page 2 was never confirmed, so even the old page is rewritten
        bus.translate(ChipAddr::data(0x4000)).unwrap();
        assert_eq!(bus.transport().writes.last(), Some(&(0x07E0, 2)));
    }

    #[test]
    fn test_read32_and_bytes() {
        let mut bus = ChipBus::new(Recorder::default(), AddressMap::default());
        // Registers read back their own address
        assert_eq!(bus.read32(ChipAddr::register(0x10)).unwrap(), 0x0012_0010);

        let mut buf = [0u8; 5];
        bus.read_bytes(ChipAddr::register(0x20), &mut buf).unwrap();
        assert_eq!(buf, [0x20, 0x00, 0x22, 0x00, 0x24]);
    }
}
