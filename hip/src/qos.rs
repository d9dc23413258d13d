//! Dynamic QoS reservation.
//!
//! Splits the shared (non-command) from-host slot pool between the four
//! traffic classes. A class that wants more slots than it has reserved
//! calls [`ReservationTable::check`] with its queue length; the table either
//! grants the request outright or recomputes a fair share across every
//! class holding a reservation. Every `packets_interval` completed
//! transfers the whole table is reset so demand is learned again.
//!
//! # Invariants
//! - `Σ reserved ≤ pool`
//! - `max[c] == pool − Σ reserved[c']` for every `c' ≠ c`

use log::debug;

/// Number of traffic classes sharing the pool.
pub const NUM_CLASSES: usize = 4;

/// Traffic class, lowest priority first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum TrafficClass {
    Background = 0,
    BestEffort = 1,
    Video = 2,
    Voice = 3,
}

impl TrafficClass {
    /// All classes in index order.
    pub const ALL: [TrafficClass; NUM_CLASSES] = [
        TrafficClass::Background,
        TrafficClass::BestEffort,
        TrafficClass::Video,
        TrafficClass::Voice,
    ];

    pub const fn index(self) -> usize {
        self as usize
    }

    pub const fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(Self::Background),
            1 => Some(Self::BestEffort),
            2 => Some(Self::Video),
            3 => Some(Self::Voice),
            _ => None,
        }
    }

    /// Class for an 802.1D user priority (0-7).
    pub const fn from_user_priority(up: u16) -> Self {
        match up & 0x7 {
            1 | 2 => Self::Background,
            4 | 5 => Self::Video,
            6 | 7 => Self::Voice,
            _ => Self::BestEffort,
        }
    }
}

/// Per-class reservation state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClassReservation {
    /// Slots currently held.
    pub used: u16,
    /// Soft cap on `used`.
    pub max: u16,
    /// Guaranteed share.
    pub reserved: u16,
    /// Share converged; no self-healing check needed.
    pub stable: bool,
    /// Transfers completed since the last rebalance.
    pub completed: u32,
}

/// Reservation table for one card.
#[derive(Debug, Clone)]
pub struct ReservationTable {
    classes: [ClassReservation; NUM_CLASSES],
    pool: u16,
    packets_interval: u32,
    completed: u32,
    rebalances: u32,
}

impl ReservationTable {
    /// Table for a pool of `pool` shareable slots.
    pub fn new(pool: u16, packets_interval: u32) -> Self {
        let mut table = Self {
            classes: [ClassReservation::default(); NUM_CLASSES],
            pool,
            packets_interval: packets_interval.max(1),
            completed: 0,
            rebalances: 0,
        };
        table.reset();
        table
    }

    pub fn pool(&self) -> u16 {
        self.pool
    }

    pub fn class(&self, class: TrafficClass) -> &ClassReservation {
        &self.classes[class.index()]
    }

    pub fn classes(&self) -> &[ClassReservation; NUM_CLASSES] {
        &self.classes
    }

    /// Completions counted toward the next rebalance.
    pub fn completed(&self) -> u32 {
        self.completed
    }

    /// Rebalances performed so far.
    pub fn rebalances(&self) -> u32 {
        self.rebalances
    }

    /// True if `class` may take one more slot.
    pub fn can_claim(&self, class: TrafficClass) -> bool {
        let c = &self.classes[class.index()];
        c.used < c.max
    }

    /// Slots `class` may still take under its cap.
    pub fn headroom(&self, class: TrafficClass) -> u16 {
        let c = &self.classes[class.index()];
        c.max.saturating_sub(c.used)
    }

    /// Record a slot taken by `class`.
    pub fn on_claim(&mut self, class: TrafficClass) {
        self.classes[class.index()].used += 1;
    }

    /// Undo a claim that never completed.
    pub fn on_unclaim(&mut self, class: TrafficClass) {
        let c = &mut self.classes[class.index()];
        c.used = c.used.saturating_sub(1);
    }

    /// Record a slot returned by `class`. Triggers a rebalance every
    /// `packets_interval` completions.
    pub fn on_release(&mut self, class: TrafficClass) {
        let c = &mut self.classes[class.index()];
        c.used = c.used.saturating_sub(1);
        c.completed += 1;
        self.completed += 1;
        if self.completed >= self.packets_interval {
            self.rebalance();
        }
    }

    /// Zero every `used` count after the pool was swept.
    pub fn clear_usage(&mut self) {
        for c in self.classes.iter_mut() {
            c.used = 0;
        }
    }

    /// Grow `class`'s reservation toward `q_len` pending entries.
    pub fn check(&mut self, class: TrafficClass, q_len: usize) {
        let idx = class.index();
        let pool = self.pool;
        let q_len = q_len.min(pool as usize) as u16;

        if q_len <= self.classes[idx].reserved {
            return;
        }

        let others_reserved: u16 = self
            .classes
            .iter()
            .enumerate()
            .filter(|&(i, _)| i != idx)
            .map(|(_, c)| c.reserved)
            .sum();

        if others_reserved + q_len <= pool {
            self.classes[idx].reserved = q_len;
            if q_len == pool {
                self.classes[idx].stable = true;
            }
            debug!("hip: qos {:?} reserved {} (granted)", class, q_len);
        } else {
            self.redistribute(idx, q_len);
        }

        self.recompute_max();
    }

    /// Fair-share split among every class holding or asking for slots.
    fn redistribute(&mut self, idx: usize, q_len: u16) {
        let demand = |i: usize, c: &ClassReservation| if i == idx { q_len } else { c.reserved };
        let active = self
            .classes
            .iter()
            .enumerate()
            .filter(|&(i, c)| i == idx || c.reserved > 0)
            .count() as u16;
        let fair = self.pool / active;

        let mut excess = [false; NUM_CLASSES];
        let mut excess_count = 0u16;
        let mut unmovable = 0u16;
        for (i, c) in self.classes.iter().enumerate() {
            if i != idx && c.reserved == 0 {
                continue;
            }
            let want = demand(i, c);
            if want > fair {
                excess[i] = true;
                excess_count += 1;
            } else {
                unmovable += want;
            }
        }

        // Requesting class fits within its fair share and keeps its demand
        if !excess[idx] {
            self.classes[idx].reserved = q_len;
        }
        if excess_count == 0 {
            return;
        }

        let remaining = self.pool - unmovable;
        let share = remaining / excess_count;
        let mut extra = remaining % excess_count;
        for i in (0..NUM_CLASSES).rev() {
            if !excess[i] {
                continue;
            }
            let c = &mut self.classes[i];
            c.reserved = share;
            if extra > 0 {
                c.reserved += 1;
                extra -= 1;
            }
            c.stable = true;
        }

        debug!(
            "hip: qos fair share {} over {} classes, reserved {:?}",
            fair,
            active,
            self.classes.map(|c| c.reserved)
        );
    }

    fn recompute_max(&mut self) {
        let total: u16 = self.classes.iter().map(|c| c.reserved).sum();
        for c in self.classes.iter_mut() {
            c.max = self.pool - (total - c.reserved);
        }
    }

    /// Forget all reservations; every class may use the whole pool again.
    pub fn rebalance(&mut self) {
        debug!("hip: qos rebalance after {} completions", self.completed);
        self.reset();
        self.rebalances += 1;
    }

    fn reset(&mut self) {
        for c in self.classes.iter_mut() {
            c.reserved = 0;
            c.stable = false;
            c.completed = 0;
            c.max = self.pool;
        }
        self.completed = 0;
    }
}
