//! Card context.
//!
//! One [`Card`] per attached device. It owns the bus, the slot pool, the
//! reservation table and the soft queues, and is the only way in for the
//! OS glue. Everything is synchronous; share a card between contexts
//! through [`SharedCard`].
//!
//! # Lifecycle
//! 1. [`Card::attach`] boots the firmware and sizes everything from the
//!    negotiated configuration
//! 2. [`Card::send_signal`] queues outbound signals
//! 3. [`Card::pump_outbound`] moves queued signals and their bulk data
//! 4. [`Card::release_from_host_slot`] as the target consumes bulk data
//! 5. [`Card::detach`] drops everything in flight and returns the transport

use alloc::vec::Vec;
use core::fmt;

use log::{debug, info, warn};
use spin::Mutex;

use crate::boot::{BootConfig, BootSequencer, FirmwarePatcher, NoPatch};
use crate::bulk::{round_len, BulkEngine, RetryPolicy, TransferStats};
use crate::bus::{ChipAddr, ChipBus};
use crate::config::CardConfig;
use crate::control::ControlBlock;
use crate::error::{HipError, Resource, Result};
use crate::qos::{ReservationTable, TrafficClass, NUM_CLASSES};
use crate::queue::{classify, FlowControl, NoFlowControl, SoftQueues, MAX_BULK_REFS};
use crate::slots::{BulkData, QueueId, SlotDescriptor, SlotIndex, SlotPool};
use crate::transport::{Direction, InterruptOp, InterruptSource, Transport};

pub use crate::boot::config::DATA_HANDLE_BASE;

// ═══════════════════════════════════════════════════════════════════════════
// STATUS
// ═══════════════════════════════════════════════════════════════════════════

/// Point-in-time view of a card.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardStatus {
    pub version: u16,
    pub build_id: u32,
    /// Pending entries, command queue first then classes by index.
    pub queued: [usize; NUM_CLASSES + 1],
    pub paused: [bool; NUM_CLASSES],
    pub from_host_in_use: usize,
    pub to_host_in_use: usize,
    pub interrupt_seq: u32,
    pub stats: TransferStats,
    pub disconnected: bool,
}

impl fmt::Display for CardStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "HIP {}.{} build {}{}",
            self.version >> 8,
            self.version & 0xFF,
            self.build_id,
            if self.disconnected { " (disconnected)" } else { "" }
        )?;
        write!(f, "  queued: cmd={}", self.queued[0])?;
        for class in TrafficClass::ALL {
            let i = class.index();
            let mark = if self.paused[i] { "*" } else { "" };
            write!(f, " {:?}={}{}", class, self.queued[i + 1], mark)?;
        }
        writeln!(f)?;
        writeln!(
            f,
            "  slots: {} from-host, {} to-host in flight",
            self.from_host_in_use, self.to_host_in_use
        )?;
        write!(
            f,
            "  transfers: {} ({} retries, {} rewinds, {} failed), {} interrupts",
            self.stats.transfers,
            self.stats.retries,
            self.stats.rewinds,
            self.stats.failures,
            self.interrupt_seq
        )
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// CARD
// ═══════════════════════════════════════════════════════════════════════════

/// An attached device.
pub struct Card<T: Transport, F: FlowControl = NoFlowControl> {
    bus: ChipBus<T>,
    bulk: BulkEngine,
    slots: SlotPool,
    queues: SoftQueues,
    boot: BootConfig,
    config: CardConfig,
    flow: F,
    /// Padded copy of whatever is being sent.
    staging: Vec<u8>,
    disconnected: bool,
}

impl<T: Transport, F: FlowControl> Card<T, F> {
    /// Boot the device and build the card from what it reports.
    pub fn attach(transport: T, config: CardConfig, flow: F) -> Result<Self> {
        Self::attach_with_patcher(transport, config, flow, &mut NoPatch)
    }

    /// [`attach`](Self::attach) with a firmware patch loader.
    pub fn attach_with_patcher<P: FirmwarePatcher<T>>(
        transport: T,
        config: CardConfig,
        flow: F,
        patcher: &mut P,
    ) -> Result<Self> {
        let mut bus = ChipBus::new(transport, config.address_map);
        let boot = BootSequencer::new(&config).run(&mut bus, patcher)?;
        let block = &boot.block;

        let control = ControlBlock::new(ChipAddr::register(block.sdio_ctrl_offset as u32));
        let bulk = BulkEngine::new(RetryPolicy::from(&config), control);
        let slot_size = block.data_slot_size as usize;
        let slots = SlotPool::new(
            block.num_fromhost_data_slots,
            block.num_tohost_data_slots,
            slot_size,
            config.reserved_command_slots,
            config.packets_interval,
        );
        let queues = SoftQueues::new(config.command_queue_len, config.traffic_queue_len, slot_size);

        info!(
            "hip: attached, {} from-host / {} to-host slots of {} bytes, {} reserved for commands",
            block.num_fromhost_data_slots,
            block.num_tohost_data_slots,
            slot_size,
            config.reserved_command_slots
        );

        Ok(Self {
            bus,
            bulk,
            slots,
            queues,
            boot,
            config,
            flow,
            staging: Vec::with_capacity(slot_size),
            disconnected: false,
        })
    }

    /// Drop everything in flight, quiesce interrupts and hand the transport
    /// back.
    pub fn detach(mut self) -> T {
        let dropped = self.release_all_pending();
        if !self.disconnected {
            if let Err(fault) = self
                .bus
                .transport_mut()
                .interrupt_control(InterruptOp::Disable, InterruptSource::all())
            {
                warn!("hip: interrupt disable on detach failed: {:?}", fault);
            }
        }
        self.bus.invalidate_pages();
        info!("hip: detached, {} references dropped", dropped);
        self.bus.into_inner()
    }

    // ───────────────────────────────────────────────────────────────────
    // Accessors
    // ───────────────────────────────────────────────────────────────────

    pub fn config(&self) -> &CardConfig {
        &self.config
    }

    /// Configuration negotiated with the firmware.
    pub fn boot_config(&self) -> &BootConfig {
        &self.boot
    }

    pub fn stats(&self) -> &TransferStats {
        self.bulk.stats()
    }

    pub fn reservations(&self) -> &ReservationTable {
        self.slots.reservations()
    }

    pub fn slots(&self) -> &SlotPool {
        &self.slots
    }

    pub fn queue_len(&self, id: QueueId) -> usize {
        self.queues.len(id)
    }

    pub fn is_paused(&self, class: TrafficClass) -> bool {
        self.queues.is_paused(class)
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected
    }

    pub fn transport(&self) -> &T {
        self.bus.transport()
    }

    pub fn transport_mut(&mut self) -> &mut T {
        self.bus.transport_mut()
    }

    pub fn status(&self) -> CardStatus {
        let mut queued = [0; NUM_CLASSES + 1];
        queued[0] = self.queues.len(QueueId::Command);
        let mut paused = [false; NUM_CLASSES];
        for class in TrafficClass::ALL {
            queued[class.index() + 1] = self.queues.len(QueueId::Traffic(class));
            paused[class.index()] = self.queues.is_paused(class);
        }
        let in_use = |slot: Option<&SlotDescriptor>| slot.is_some_and(|s| !s.is_free());

        CardStatus {
            version: self.boot.block.version,
            build_id: self.boot.build_id,
            queued,
            paused,
            from_host_in_use: (0..self.slots.from_host_count())
                .filter(|&i| in_use(self.slots.from_host(i as SlotIndex)))
                .count(),
            to_host_in_use: (0..self.slots.to_host_count())
                .filter(|&i| in_use(self.slots.to_host(i as SlotIndex)))
                .count(),
            interrupt_seq: self.bulk.control().interrupt_seq(),
            stats: *self.bulk.stats(),
            disconnected: self.disconnected,
        }
    }

    // ───────────────────────────────────────────────────────────────────
    // Device access bookkeeping
    // ───────────────────────────────────────────────────────────────────

    fn ensure_present(&self) -> Result<()> {
        if self.disconnected {
            return Err(HipError::Disconnected);
        }
        Ok(())
    }

    /// Latch removal so every later call fails fast.
    fn track<R>(&mut self, result: Result<R>) -> Result<R> {
        if let Err(HipError::Disconnected) = result {
            if !self.disconnected {
                warn!("hip: device removed");
            }
            self.disconnected = true;
        }
        result
    }

    // ───────────────────────────────────────────────────────────────────
    // Outbound path
    // ───────────────────────────────────────────────────────────────────

    /// Queue a serialized signal with up to two bulk-data references.
    ///
    /// # Returns
    /// The queue the signal landed on.
    pub fn send_signal(
        &mut self,
        signal: Vec<u8>,
        bulk: [Option<BulkData>; MAX_BULK_REFS],
    ) -> Result<QueueId> {
        self.ensure_present()?;
        let id = classify(&signal);
        self.queues.enqueue(id, signal, bulk, &self.flow)?;
        Ok(id)
    }

    /// Move queued signals to the target, commands first then Voice down
    /// to Background.
    ///
    /// A class whose head entry cannot get slots stops for this round; the
    /// others keep going. Raises one target interrupt if anything was sent.
    ///
    /// # Returns
    /// Signals sent.
    pub fn pump_outbound(&mut self) -> Result<usize> {
        self.ensure_present()?;
        let mut sent = 0;
        for id in SoftQueues::service_order() {
            loop {
                match self.send_head(id) {
                    Ok(true) => sent += 1,
                    Ok(false) => break,
                    Err(HipError::ResourceExhausted(Resource::Slot)) => {
                        debug!("hip: {:?} waiting for slots", id);
                        break;
                    }
                    Err(err) => return self.track(Err(err)),
                }
            }
        }
        if sent > 0 {
            self.generate_interrupt()?;
        }
        Ok(sent)
    }

    /// Send the head of `id`. `Ok(false)` when the queue is empty.
    fn send_head(&mut self, id: QueueId) -> Result<bool> {
        let Some(head) = self.queues.get(id).peek() else {
            return Ok(false);
        };
        let bulk: Vec<BulkData> = head.bulk_refs().cloned().collect();

        // Counting first lets a starved class ask for a share
        if !bulk.is_empty() && self.free_slots(id) < bulk.len() {
            return Err(HipError::ResourceExhausted(Resource::Slot));
        }

        let mut claimed: Vec<SlotIndex> = Vec::with_capacity(MAX_BULK_REFS);
        for data in &bulk {
            match self.slots.allocate(id, data.clone()) {
                Ok(slot) => claimed.push(slot),
                Err(err) => {
                    self.unwind(&claimed);
                    return Err(err);
                }
            }
        }

        if let Err(err) = self.ship(id, &bulk, &claimed) {
            // The entry is dropped; a retry would fail the same way.
            self.unwind(&claimed);
            self.queues.complete(id, &self.flow);
            return Err(err);
        }

        self.queues.complete(id, &self.flow);
        Ok(true)
    }

    /// Bulk data into its slots, then the signal itself.
    fn ship(&mut self, id: QueueId, bulk: &[BulkData], claimed: &[SlotIndex]) -> Result<()> {
        let round = self.boot.block.data_slot_round as usize;
        for (data, &slot) in bulk.iter().zip(claimed) {
            self.stage(data.as_slice(), round);
            self.bulk.transfer(
                &mut self.bus,
                DATA_HANDLE_BASE + slot,
                &mut self.staging,
                Direction::FromHost,
            )?;
        }

        let Some(head) = self.queues.get(id).peek() else {
            return Ok(());
        };
        let frag = self.boot.block.sig_frag_size as usize;
        let signal = head.signal.clone();
        self.stage(&signal, frag);
        self.bulk.transfer(
            &mut self.bus,
            self.boot.block.fromhost_sigbuf_handle,
            &mut self.staging,
            Direction::FromHost,
        )?;
        Ok(())
    }

    fn stage(&mut self, bytes: &[u8], round: usize) {
        self.staging.clear();
        self.staging.extend_from_slice(bytes);
        self.staging.resize(round_len(bytes.len(), round), 0);
    }

    fn unwind(&mut self, claimed: &[SlotIndex]) {
        for &slot in claimed {
            self.slots.unclaim(slot);
        }
    }

    /// Target finished with from-host slot `index`.
    pub fn release_from_host_slot(&mut self, index: SlotIndex) -> Option<BulkData> {
        self.slots.release(index)
    }

    /// Slots `id` could claim now. A starved traffic class asks for a
    /// larger share as a side effect.
    pub fn free_slots(&mut self, id: QueueId) -> usize {
        let pending = self.queues.len(id);
        self.slots.free_count(id, pending)
    }

    /// Grow `class`'s reservation toward its queue depth.
    pub fn check_reservation(&mut self, class: TrafficClass) {
        let pending = self.queues.len(QueueId::Traffic(class));
        self.slots.reservations_mut().check(class, pending);
    }

    // ───────────────────────────────────────────────────────────────────
    // Inbound path
    // ───────────────────────────────────────────────────────────────────

    /// Fetch `len` bytes the target announced in to-host slot `index`.
    pub fn claim_to_host_slot(&mut self, index: SlotIndex, len: usize) -> Result<BulkData> {
        self.ensure_present()?;
        let available = self.slots.to_host(index).is_some_and(|s| s.is_free());
        if !available || len == 0 || len > self.slots.slot_size() {
            warn!("hip: to-host slot {} cannot take {} bytes", index, len);
            return Err(HipError::ResourceExhausted(Resource::Slot));
        }

        let round = self.boot.block.data_slot_round as usize;
        let mut buf = alloc::vec![0u8; round_len(len, round)];
        // Bounded by ConfigBlock::validate
        let handle = DATA_HANDLE_BASE + self.boot.block.num_fromhost_data_slots + index;
        let result = self.bulk.transfer(&mut self.bus, handle, &mut buf, Direction::ToHost);
        self.track(result)?;

        buf.truncate(len);
        let data = BulkData::from(buf);
        self.slots.store_to_host(index, data.clone())?;
        Ok(data)
    }

    /// Data parked in to-host slot `index`.
    pub fn read_to_host_slot(&self, index: SlotIndex) -> Option<&BulkData> {
        self.slots.to_host(index).and_then(|s| s.data())
    }

    /// Hand to-host slot `index` back to the target.
    pub fn release_to_host_slot(&mut self, index: SlotIndex) -> Option<BulkData> {
        self.slots.release_to_host(index)
    }

    // ───────────────────────────────────────────────────────────────────
    // Control block and interrupts
    // ───────────────────────────────────────────────────────────────────

    /// Raise an interrupt on the target.
    pub fn generate_interrupt(&mut self) -> Result<()> {
        self.ensure_present()?;
        let result = self.bulk.control_mut().generate_interrupt(&mut self.bus);
        self.track(result)
    }

    /// Bump the host liveness counter.
    pub fn liveness_tick(&mut self) -> Result<u16> {
        self.ensure_present()?;
        let result = self.bulk.control_mut().liveness_tick(&mut self.bus);
        self.track(result)
    }

    fn interrupt_op(&mut self, op: InterruptOp, source: InterruptSource) -> Result<InterruptSource> {
        self.ensure_present()?;
        let result = self
            .bus
            .transport_mut()
            .interrupt_control(op, source)
            .map_err(HipError::from);
        self.track(result)
    }

    pub fn enable_interrupts(&mut self, source: InterruptSource) -> Result<InterruptSource> {
        self.interrupt_op(InterruptOp::Enable, source)
    }

    pub fn disable_interrupts(&mut self, source: InterruptSource) -> Result<InterruptSource> {
        self.interrupt_op(InterruptOp::Disable, source)
    }

    /// Sources currently pending.
    pub fn pending_interrupts(&mut self) -> Result<InterruptSource> {
        self.interrupt_op(InterruptOp::Status, InterruptSource::all())
    }

    pub fn acknowledge_interrupts(&mut self, source: InterruptSource) -> Result<InterruptSource> {
        self.interrupt_op(InterruptOp::Acknowledge, source)
    }

    // ───────────────────────────────────────────────────────────────────
    // Teardown
    // ───────────────────────────────────────────────────────────────────

    /// Drop every queued signal and free every slot.
    ///
    /// # Returns
    /// Queue entries plus slots released.
    pub fn release_all_pending(&mut self) -> usize {
        let entries = self.queues.clear();
        let slots = self.slots.release_all();
        debug!("hip: released {} queued signals and {} slots", entries, slots);
        entries + slots
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// SHARED CARD
// ═══════════════════════════════════════════════════════════════════════════

/// A card behind the bus lock.
pub struct SharedCard<T: Transport, F: FlowControl = NoFlowControl> {
    inner: Mutex<Card<T, F>>,
}

impl<T: Transport, F: FlowControl> SharedCard<T, F> {
    pub fn new(card: Card<T, F>) -> Self {
        Self {
            inner: Mutex::new(card),
        }
    }

    /// Run `f` with the card locked.
    pub fn with<R>(&self, f: impl FnOnce(&mut Card<T, F>) -> R) -> R {
        f(&mut *self.inner.lock())
    }

    /// Like [`with`](Self::with), but `None` if another context holds the
    /// lock.
    pub fn try_with<R>(&self, f: impl FnOnce(&mut Card<T, F>) -> R) -> Option<R> {
        self.inner.try_lock().map(|mut card| f(&mut *card))
    }

    pub fn into_inner(self) -> Card<T, F> {
        self.inner.into_inner()
    }
}
