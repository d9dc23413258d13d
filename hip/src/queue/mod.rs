//! Soft queue manager.
//!
//! One command queue plus one queue per traffic class. When a traffic
//! queue fills, the upper layer is told to stop feeding that class through
//! the [`FlowControl`] port, and told to resume once an entry drains.
//! The command queue is never paused: teardown and discovery traffic must
//! always get through.

mod priority;
mod ring;

pub use priority::{classify, signal_id, signal_id_of, Route, ROUTES, SIGNAL_HEADER_LEN};
pub use ring::{QueuedSignal, SoftQueue, MAX_BULK_REFS};

use alloc::vec::Vec;

use log::debug;

use crate::error::Result;
use crate::qos::{TrafficClass, NUM_CLASSES};
use crate::slots::{BulkData, QueueId};

/// Pause/resume port to the upper layer.
///
/// Calls are synchronous and must not re-enter the card.
pub trait FlowControl {
    /// Stop handing signals of `class` to the card.
    fn pause(&self, class: TrafficClass);

    /// `class` may be fed again.
    fn resume(&self, class: TrafficClass);
}

impl<F: FlowControl + ?Sized> FlowControl for &F {
    fn pause(&self, class: TrafficClass) {
        (**self).pause(class)
    }

    fn resume(&self, class: TrafficClass) {
        (**self).resume(class)
    }
}

/// Flow control for callers that poll [`SoftQueues::is_paused`] instead.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoFlowControl;

impl FlowControl for NoFlowControl {
    fn pause(&self, _class: TrafficClass) {}
    fn resume(&self, _class: TrafficClass) {}
}

/// Every soft queue of one card.
#[derive(Debug)]
pub struct SoftQueues {
    command: SoftQueue,
    traffic: [SoftQueue; NUM_CLASSES],
}

impl SoftQueues {
    pub fn new(command_len: usize, traffic_len: usize, slot_size: usize) -> Self {
        Self {
            command: SoftQueue::new(QueueId::Command, command_len, slot_size),
            traffic: TrafficClass::ALL
                .map(|class| SoftQueue::new(QueueId::Traffic(class), traffic_len, slot_size)),
        }
    }

    pub fn get(&self, id: QueueId) -> &SoftQueue {
        match id {
            QueueId::Command => &self.command,
            QueueId::Traffic(class) => &self.traffic[class.index()],
        }
    }

    pub fn get_mut(&mut self, id: QueueId) -> &mut SoftQueue {
        match id {
            QueueId::Command => &mut self.command,
            QueueId::Traffic(class) => &mut self.traffic[class.index()],
        }
    }

    /// Pending entries in `id`.
    pub fn len(&self, id: QueueId) -> usize {
        self.get(id).used()
    }

    pub fn is_paused(&self, class: TrafficClass) -> bool {
        self.traffic[class.index()].is_paused()
    }

    /// Queue `signal` on `id`, pausing the class if that filled it.
    pub fn enqueue<F: FlowControl>(
        &mut self,
        id: QueueId,
        signal: Vec<u8>,
        bulk: [Option<BulkData>; MAX_BULK_REFS],
        flow: &F,
    ) -> Result<()> {
        let queue = self.get_mut(id);
        queue.enqueue(signal, bulk)?;

        let QueueId::Traffic(class) = id else {
            return Ok(());
        };
        if queue.is_full() && !queue.is_paused() {
            debug!("hip: {:?} queue full, pausing", class);
            flow.pause(class);
            queue.set_paused(true);
            // The queue may have drained between the full check and the
            // pause taking effect; never leave a queue paused with room.
            if queue.free_slots() > 0 {
                queue.set_paused(false);
                flow.resume(class);
            }
        }
        Ok(())
    }

    /// Remove the head of `id` after its transfer completed, resuming the
    /// class if it was paused.
    pub fn complete<F: FlowControl>(&mut self, id: QueueId, flow: &F) -> Option<QueuedSignal> {
        let queue = self.get_mut(id);
        let entry = queue.pop()?;
        if let QueueId::Traffic(class) = id {
            if queue.is_paused() && queue.free_slots() > 0 {
                debug!("hip: {:?} queue drained, resuming", class);
                queue.set_paused(false);
                flow.resume(class);
            }
        }
        Some(entry)
    }

    /// Queues in service order: commands first, then Voice down to
    /// Background.
    pub fn service_order() -> [QueueId; NUM_CLASSES + 1] {
        [
            QueueId::Command,
            QueueId::Traffic(TrafficClass::Voice),
            QueueId::Traffic(TrafficClass::Video),
            QueueId::Traffic(TrafficClass::BestEffort),
            QueueId::Traffic(TrafficClass::Background),
        ]
    }

    /// Drop every pending entry in every queue. Paused classes stay
    /// paused; the upper layer is being torn down.
    pub fn clear(&mut self) -> usize {
        let mut dropped = self.command.clear();
        for queue in self.traffic.iter_mut() {
            dropped += queue.clear();
        }
        dropped
    }
}
