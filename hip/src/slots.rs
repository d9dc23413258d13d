//! Bulk-data slot pool.
//!
//! # Layout
//! ```text
//!   from-host:  [0 ......................... pool) [pool .. count)
//!                shared by traffic classes (QoS)    command only
//!   to-host:    [0 .................................... count)
//! ```
//!
//! A descriptor is in flight exactly while it holds bulk data; the free
//! state is "no data". Each range is scanned from a rotating cursor so
//! successive claims spread over the range instead of hammering slot 0.

use alloc::sync::Arc;
use alloc::vec::Vec;

use log::{debug, warn};

use crate::error::{HipError, Resource, Result};
use crate::qos::{ReservationTable, TrafficClass};

/// Index into a slot array.
pub type SlotIndex = u16;

/// Soft queue / slot owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueId {
    /// Control traffic; never paused, uses the reserved slots.
    Command,
    Traffic(TrafficClass),
}

/// Reference to caller-owned bulk data.
///
/// Cloning shares the buffer; the engine never copies payload bytes
/// except into the padded staging buffer of a transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkData {
    buf: Arc<[u8]>,
    len: usize,
}

impl BulkData {
    pub fn new(buf: Arc<[u8]>) -> Self {
        let len = buf.len();
        Self { buf, len }
    }

    pub fn from_slice(bytes: &[u8]) -> Self {
        Self::new(Arc::from(bytes))
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    /// Drop trailing bytes beyond `len`.
    pub fn truncate(&mut self, len: usize) {
        self.len = self.len.min(len);
    }

    /// Number of live references to the underlying buffer.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.buf)
    }
}

impl From<Vec<u8>> for BulkData {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(Arc::from(bytes))
    }
}

/// One slot.
#[derive(Debug, Clone, Default)]
pub struct SlotDescriptor {
    data: Option<BulkData>,
    owner: Option<QueueId>,
}

impl SlotDescriptor {
    pub fn is_free(&self) -> bool {
        self.len() == 0
    }

    /// In-flight length; 0 when free.
    pub fn len(&self) -> usize {
        self.data.as_ref().map_or(0, BulkData::len)
    }

    pub fn owner(&self) -> Option<QueueId> {
        self.owner
    }

    pub fn data(&self) -> Option<&BulkData> {
        self.data.as_ref()
    }

    fn take(&mut self) -> Option<(BulkData, Option<QueueId>)> {
        let data = self.data.take()?;
        Some((data, self.owner.take()))
    }
}

/// From-host and to-host slot arrays plus the reservation table.
#[derive(Debug, Clone)]
pub struct SlotPool {
    from_host: Vec<SlotDescriptor>,
    to_host: Vec<SlotDescriptor>,
    slot_size: usize,
    /// First command-only from-host index.
    command_start: usize,
    traffic_hint: usize,
    command_hint: usize,
    qos: ReservationTable,
}

impl SlotPool {
    /// # Panics
    /// Panics if `reserved_command` exceeds `from_host_count`.
    pub fn new(
        from_host_count: u16,
        to_host_count: u16,
        slot_size: usize,
        reserved_command: u16,
        packets_interval: u32,
    ) -> Self {
        assert!(reserved_command <= from_host_count, "reserved slots exceed pool");
        let pool = from_host_count - reserved_command;
        Self {
            from_host: alloc::vec![SlotDescriptor::default(); from_host_count as usize],
            to_host: alloc::vec![SlotDescriptor::default(); to_host_count as usize],
            slot_size,
            command_start: pool as usize,
            traffic_hint: 0,
            command_hint: 0,
            qos: ReservationTable::new(pool, packets_interval),
        }
    }

    pub fn slot_size(&self) -> usize {
        self.slot_size
    }

    pub fn from_host_count(&self) -> usize {
        self.from_host.len()
    }

    pub fn to_host_count(&self) -> usize {
        self.to_host.len()
    }

    /// Indices shared by traffic classes.
    pub fn traffic_range(&self) -> core::ops::Range<usize> {
        0..self.command_start
    }

    /// Indices kept for command traffic.
    pub fn command_range(&self) -> core::ops::Range<usize> {
        self.command_start..self.from_host.len()
    }

    pub fn from_host(&self, index: SlotIndex) -> Option<&SlotDescriptor> {
        self.from_host.get(index as usize)
    }

    pub fn to_host(&self, index: SlotIndex) -> Option<&SlotDescriptor> {
        self.to_host.get(index as usize)
    }

    pub fn reservations(&self) -> &ReservationTable {
        &self.qos
    }

    pub fn reservations_mut(&mut self) -> &mut ReservationTable {
        &mut self.qos
    }

    /// Claim a from-host slot for `owner` and park `data` in it.
    ///
    /// The class cap and the free-slot scan are one step: either a slot is
    /// returned or `ResourceExhausted`, whichever limit was hit.
    pub fn allocate(&mut self, owner: QueueId, data: BulkData) -> Result<SlotIndex> {
        if data.is_empty() {
            warn!("hip: refusing to park empty bulk data");
            return Err(HipError::ResourceExhausted(Resource::Slot));
        }
        if let QueueId::Traffic(class) = owner {
            if !self.qos.can_claim(class) {
                return Err(HipError::ResourceExhausted(Resource::Slot));
            }
        }

        let (range, hint) = match owner {
            QueueId::Command => (self.command_range(), self.command_hint),
            QueueId::Traffic(_) => (self.traffic_range(), self.traffic_hint),
        };
        let span = range.len();
        let Some(index) = (0..span)
            .map(|step| range.start + (hint + step) % span)
            .find(|&i| self.from_host[i].is_free())
        else {
            if let QueueId::Traffic(class) = owner {
                // Under its cap but every shared slot is held by classes
                // still draining above their new cap.
                debug!("hip: {:?} under cap but no free slot", class);
            }
            return Err(HipError::ResourceExhausted(Resource::Slot));
        };

        let next = (index - range.start + 1) % span;
        match owner {
            QueueId::Command => self.command_hint = next,
            QueueId::Traffic(class) => {
                self.traffic_hint = next;
                self.qos.on_claim(class);
            }
        }
        let slot = &mut self.from_host[index];
        slot.data = Some(data);
        slot.owner = Some(owner);
        Ok(index as SlotIndex)
    }

    /// Return a from-host slot. Freeing an already free slot does nothing.
    pub fn release(&mut self, index: SlotIndex) -> Option<BulkData> {
        let Some(slot) = self.from_host.get_mut(index as usize) else {
            warn!("hip: release of unknown from-host slot {}", index);
            return None;
        };
        let Some((data, owner)) = slot.take() else {
            debug!("hip: from-host slot {} already free", index);
            return None;
        };
        if let Some(QueueId::Traffic(class)) = owner {
            self.qos.on_release(class);
        }
        Some(data)
    }

    /// Roll back a claim whose data never reached the target. Unlike
    /// [`release`](Self::release) this does not count as a completion.
    pub fn unclaim(&mut self, index: SlotIndex) -> Option<BulkData> {
        let (data, owner) = self.from_host.get_mut(index as usize)?.take()?;
        if let Some(QueueId::Traffic(class)) = owner {
            self.qos.on_unclaim(class);
        }
        Some(data)
    }

    /// Slots `owner` could claim right now.
    pub fn visible_free(&self, owner: QueueId) -> usize {
        match owner {
            QueueId::Command => self.count_free(self.command_range()),
            QueueId::Traffic(class) => self
                .count_free(self.traffic_range())
                .min(self.qos.headroom(class) as usize),
        }
    }

    /// [`visible_free`](Self::visible_free), plus self-healing: a traffic
    /// class without a converged share that sees nothing free asks the
    /// reservation engine to grow its share toward `pending` entries.
    pub fn free_count(&mut self, owner: QueueId, pending: usize) -> usize {
        let free = self.visible_free(owner);
        if let QueueId::Traffic(class) = owner {
            if free == 0 && !self.qos.class(class).stable {
                self.qos.check(class, pending);
                return self.visible_free(owner);
            }
        }
        free
    }

    fn count_free(&self, range: core::ops::Range<usize>) -> usize {
        self.from_host[range].iter().filter(|s| s.is_free()).count()
    }

    /// Park data the target announced in to-host slot `index`.
    pub fn store_to_host(&mut self, index: SlotIndex, data: BulkData) -> Result<()> {
        match self.to_host.get_mut(index as usize) {
            Some(slot) if slot.is_free() && !data.is_empty() => {
                slot.data = Some(data);
                Ok(())
            }
            _ => {
                warn!("hip: to-host slot {} unavailable", index);
                Err(HipError::ResourceExhausted(Resource::Slot))
            }
        }
    }

    /// Hand back to-host slot `index` and its data.
    pub fn release_to_host(&mut self, index: SlotIndex) -> Option<BulkData> {
        self.to_host
            .get_mut(index as usize)
            .and_then(SlotDescriptor::take)
            .map(|(data, _)| data)
    }

    /// Forcibly free every in-flight descriptor. Returns how many were held.
    ///
    /// Teardown path: completions are not counted toward a rebalance.
    pub fn release_all(&mut self) -> usize {
        let mut freed = 0;
        for slot in self.from_host.iter_mut().chain(self.to_host.iter_mut()) {
            if slot.take().is_some() {
                freed += 1;
            }
        }
        self.qos.clear_usage();
        self.traffic_hint = 0;
        self.command_hint = 0;
        freed
    }

    /// Slots currently held per class (command slots excluded).
    pub fn used_by(&self, class: TrafficClass) -> usize {
        self.from_host
            .iter()
            .filter(|s| s.owner == Some(QueueId::Traffic(class)))
            .count()
    }
}
