//! Host Interface Protocol card engine.
//!
//! Host-side half of the link between an OS network stack and a radio
//! chip's firmware: boot handshake, paged chip addressing, bulk-data slots
//! with per-class QoS reservation, priority soft queues with flow control,
//! and bulk transfers that recover from bus errors by rewinding the target.
//!
//! # Architecture
//! ```text
//!   upper layer ──send_signal──> queue ──pump_outbound──> slots/qos
//!        ^                         │                         │
//!        └──── FlowControl ────────┘                        bulk ──> bus ──> Transport
//!                                                            │
//!                                                   control block (rewind, irq)
//! ```
//!
//! # Usage
//! ```ignore
//! use hip_card::{Card, CardConfig, NoFlowControl};
//!
//! let mut card = Card::attach(transport, CardConfig::default(), NoFlowControl)?;
//! card.send_signal(signal, [Some(payload), None])?;
//! card.pump_outbound()?;
//! // ... target reports slot 4 consumed
//! card.release_from_host_slot(4);
//! let transport = card.detach();
//! ```

#![no_std]

extern crate alloc;

pub mod boot;
pub mod bulk;
pub mod bus;
pub mod card;
pub mod config;
pub mod control;
pub mod error;
pub mod qos;
pub mod queue;
pub mod slots;
pub mod transport;

// Re-exports for convenience
pub use boot::{BootConfig, BootSequencer, BootState, ConfigBlock, FirmwarePatcher, NoPatch};
pub use bulk::{BulkEngine, RetryPolicy, TransferStats};
pub use bus::{ChipAddr, ChipBus, Region};
pub use card::{Card, CardStatus, SharedCard, DATA_HANDLE_BASE};
pub use config::{AddressMap, CardConfig, Window};
pub use error::{HipError, Mismatch, Resource, Result};
pub use qos::{ReservationTable, TrafficClass};
pub use queue::{FlowControl, NoFlowControl, QueuedSignal, SoftQueue, SoftQueues};
pub use slots::{BulkData, QueueId, SlotIndex, SlotPool};
pub use transport::{BusFault, BusResult, Direction, Function, InterruptOp, InterruptSource, Transport};
