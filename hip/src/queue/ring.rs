//! Fixed-capacity soft queue ring.
//!
//! Ring of `N + 1` entries with one always left empty, so `read == write`
//! means empty and `used == N` means full without a separate count.

use alloc::vec::Vec;

use log::warn;

use crate::error::{HipError, Resource, Result};
use crate::slots::{BulkData, QueueId};

/// Bulk-data references carried by one signal.
pub const MAX_BULK_REFS: usize = 2;

/// One pending outbound signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedSignal {
    /// Serialized signal, header first.
    pub signal: Vec<u8>,
    /// Bulk data to ship with the signal; `None` when unused.
    pub bulk: [Option<BulkData>; MAX_BULK_REFS],
}

impl QueuedSignal {
    /// Non-empty bulk references in order.
    pub fn bulk_refs(&self) -> impl Iterator<Item = &BulkData> {
        self.bulk.iter().flatten().filter(|d| !d.is_empty())
    }
}

/// Soft queue for one class.
#[derive(Debug)]
pub struct SoftQueue {
    id: QueueId,
    entries: Vec<Option<QueuedSignal>>,
    read: usize,
    write: usize,
    paused: bool,
    slot_size: usize,
}

impl SoftQueue {
    /// Queue holding up to `capacity` signals.
    pub fn new(id: QueueId, capacity: usize, slot_size: usize) -> Self {
        let mut entries = Vec::with_capacity(capacity + 1);
        entries.resize_with(capacity + 1, || None);
        Self {
            id,
            entries,
            read: 0,
            write: 0,
            paused: false,
            slot_size,
        }
    }

    pub fn id(&self) -> QueueId {
        self.id
    }

    /// Usable entries (ring length minus the spare).
    pub fn capacity(&self) -> usize {
        self.entries.len() - 1
    }

    /// Entries waiting, `(write − read) mod (N + 1)`.
    pub fn used(&self) -> usize {
        let len = self.entries.len();
        (self.write + len - self.read) % len
    }

    pub fn free_slots(&self) -> usize {
        self.capacity() - self.used()
    }

    pub fn is_empty(&self) -> bool {
        self.read == self.write
    }

    pub fn is_full(&self) -> bool {
        self.used() == self.capacity()
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub(crate) fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    /// Append a signal.
    ///
    /// Bulk references longer than a slot are truncated to the slot size;
    /// that only happens if a caller ignored the negotiated slot size.
    pub fn enqueue(
        &mut self,
        signal: Vec<u8>,
        mut bulk: [Option<BulkData>; MAX_BULK_REFS],
    ) -> Result<()> {
        if self.is_full() {
            return Err(HipError::ResourceExhausted(Resource::Queue));
        }

        for data in bulk.iter_mut().flatten() {
            if data.len() > self.slot_size {
                warn!(
                    "hip: {:?} bulk data {} bytes exceeds slot size {}, truncating",
                    self.id,
                    data.len(),
                    self.slot_size
                );
                data.truncate(self.slot_size);
            }
        }

        self.entries[self.write] = Some(QueuedSignal { signal, bulk });
        self.write = (self.write + 1) % self.entries.len();
        Ok(())
    }

    /// Oldest entry, left in place until [`pop`](Self::pop).
    pub fn peek(&self) -> Option<&QueuedSignal> {
        if self.is_empty() {
            return None;
        }
        self.entries[self.read].as_ref()
    }

    /// Remove the oldest entry once its transfer completed.
    pub fn pop(&mut self) -> Option<QueuedSignal> {
        if self.is_empty() {
            return None;
        }
        let entry = self.entries[self.read].take();
        self.read = (self.read + 1) % self.entries.len();
        entry
    }

    /// Drop every pending entry and its bulk references.
    pub fn clear(&mut self) -> usize {
        let mut dropped = 0;
        while self.pop().is_some() {
            dropped += 1;
        }
        dropped
    }
}
