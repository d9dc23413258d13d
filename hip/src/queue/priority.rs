//! Signal → soft queue mapping.
//!
//! Every signal starts with a little-endian header:
//!
//! ```text
//!   0      2          4        6
//!   ┌──────┬──────────┬────────┬──────── body ...
//!   │  id  │ receiver │ sender │
//!   └──────┴──────────┴────────┴────────
//! ```
//!
//! Data-carrying signals embed an 802.1D user priority in their body that
//! picks the traffic class; everything else is control traffic.

use log::warn;

use crate::qos::TrafficClass;
use crate::slots::QueueId;

/// Signal header length.
pub const SIGNAL_HEADER_LEN: usize = 6;

/// Signal ids with special routing.
pub mod signal_id {
    pub const MA_PACKET_REQUEST: u16 = 0x0110;
    pub const MA_UNITDATA_REQUEST: u16 = 0x0100;
    pub const DS_UNITDATA_REQUEST: u16 = 0x0107;
}

/// Where a signal id is queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Command,
    Class(TrafficClass),
    /// Class chosen by the u16 user priority at `offset`.
    UserPriority { offset: usize },
}

/// Fixed routing table; ids not listed are command traffic.
pub const ROUTES: &[(u16, Route)] = &[
    (signal_id::MA_PACKET_REQUEST, Route::UserPriority { offset: 16 }),
    (signal_id::MA_UNITDATA_REQUEST, Route::UserPriority { offset: 14 }),
    (signal_id::DS_UNITDATA_REQUEST, Route::Class(TrafficClass::BestEffort)),
];

/// Signal id of a serialized signal.
pub fn signal_id_of(signal: &[u8]) -> Option<u16> {
    read_u16(signal, 0)
}

fn read_u16(bytes: &[u8], offset: usize) -> Option<u16> {
    let pair = bytes.get(offset..offset + 2)?;
    Some(u16::from_le_bytes([pair[0], pair[1]]))
}

/// Queue a serialized signal belongs on.
pub fn classify(signal: &[u8]) -> QueueId {
    let Some(id) = signal_id_of(signal) else {
        return QueueId::Command;
    };
    let route = ROUTES
        .iter()
        .find(|(sig, _)| *sig == id)
        .map_or(Route::Command, |&(_, route)| route);

    match route {
        Route::Command => QueueId::Command,
        Route::Class(class) => QueueId::Traffic(class),
        Route::UserPriority { offset } => match read_u16(signal, offset) {
            Some(up) => QueueId::Traffic(TrafficClass::from_user_priority(up)),
            None => {
                warn!("hip: signal {:#06x} too short for priority field", id);
                QueueId::Traffic(TrafficClass::BestEffort)
            }
        },
    }
}
