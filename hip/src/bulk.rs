//! Bulk transfer engine.
//!
//! One block transfer with bounded recovery. A transfer that fails
//! part-way leaves the firmware's fragment assembly for that handle out
//! of step with the host, so every transient failure is followed by a
//! rewind handshake before the handle is used again:
//!
//! ```text
//!   transfer ──ok──> done
//!      │
//!   transient ──> write REWIND=handle ──> raise interrupt
//!                       │
//!                 poll REWIND == 0 (bounded) ──> retry (bounded)
//! ```
//!
//! `NoDevice` at any point ends the transfer immediately.

use log::{debug, warn};

use crate::bus::ChipBus;
use crate::config::CardConfig;
use crate::control::ControlBlock;
use crate::error::{HipError, Result};
use crate::transport::{BusFault, Direction, Transport};

/// Round `len` up to a multiple of `round` (`round` of 0 or 1 is a no-op).
pub const fn round_len(len: usize, round: usize) -> usize {
    if round <= 1 {
        len
    } else {
        len.div_ceil(round) * round
    }
}

/// Retry limits for one transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, first try included.
    pub attempts: u32,
    /// Rewind status polls per failed attempt.
    pub rewind_polls: u32,
    /// Delay between rewind polls (ms).
    pub rewind_interval_ms: u32,
}

impl From<&CardConfig> for RetryPolicy {
    fn from(config: &CardConfig) -> Self {
        Self {
            attempts: config.transfer_attempts.max(1),
            rewind_polls: config.rewind_poll_attempts,
            rewind_interval_ms: config.rewind_poll_interval_ms,
        }
    }
}

/// Transfer counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferStats {
    /// Transfers started.
    pub transfers: u32,
    /// Block transfers issued, retries included.
    pub attempts: u32,
    /// Attempts repeated after a successful rewind.
    pub retries: u32,
    /// Rewind handshakes started.
    pub rewinds: u32,
    /// Transfers that ended in an error.
    pub failures: u32,
    pub bytes_from_host: u64,
    pub bytes_to_host: u64,
}

/// Retrying block mover.
#[derive(Debug, Clone)]
pub struct BulkEngine {
    policy: RetryPolicy,
    control: ControlBlock,
    stats: TransferStats,
}

impl BulkEngine {
    pub fn new(policy: RetryPolicy, control: ControlBlock) -> Self {
        Self {
            policy,
            control,
            stats: TransferStats::default(),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn stats(&self) -> &TransferStats {
        &self.stats
    }

    pub fn control(&self) -> &ControlBlock {
        &self.control
    }

    pub fn control_mut(&mut self) -> &mut ControlBlock {
        &mut self.control
    }

    /// Move `buffer` to or from `handle`.
    ///
    /// # Returns
    /// - `Ok(n)`: bytes moved
    /// - `Err(Disconnected)`: device removed, no further attempts made
    /// - `Err(TransportError)`: non-retryable fault, rewind failure or
    ///   retry budget exhausted
    pub fn transfer<T: Transport>(
        &mut self,
        bus: &mut ChipBus<T>,
        handle: u16,
        buffer: &mut [u8],
        direction: Direction,
    ) -> Result<usize> {
        self.stats.transfers += 1;
        let mut attempt = 0;

        loop {
            attempt += 1;
            self.stats.attempts += 1;

            match bus.transport_mut().block_transfer(handle, buffer, direction) {
                Ok(moved) => {
                    match direction {
                        Direction::FromHost => self.stats.bytes_from_host += moved as u64,
                        Direction::ToHost => self.stats.bytes_to_host += moved as u64,
                    }
                    if attempt > 1 {
                        debug!("hip: handle {} recovered on attempt {}", handle, attempt);
                    }
                    return Ok(moved);
                }
                Err(BusFault::NoDevice) => {
                    self.stats.failures += 1;
                    return Err(HipError::Disconnected);
                }
                Err(BusFault::Fatal) => {
                    self.stats.failures += 1;
                    warn!("hip: handle {} transfer failed (not retryable)", handle);
                    return Err(HipError::TransportError);
                }
                Err(BusFault::Transient) => {
                    warn!(
                        "hip: handle {} transfer error, attempt {}/{}",
                        handle, attempt, self.policy.attempts
                    );
                    if let Err(err) = self.rewind(bus, handle) {
                        self.stats.failures += 1;
                        return Err(err);
                    }
                    if attempt >= self.policy.attempts {
                        self.stats.failures += 1;
                        warn!("hip: handle {} giving up after {} attempts", handle, attempt);
                        return Err(HipError::TransportError);
                    }
                    self.stats.retries += 1;
                }
            }
        }
    }

    /// Rewind `handle` and wait for the firmware to acknowledge.
    fn rewind<T: Transport>(&mut self, bus: &mut ChipBus<T>, handle: u16) -> Result<()> {
        self.stats.rewinds += 1;
        self.control.request_rewind(bus, handle).map_err(escalate)?;

        for _ in 0..self.policy.rewind_polls {
            match self.control.rewind_done(bus) {
                Ok(true) => return Ok(()),
                Ok(false) => {}
                Err(HipError::Disconnected) => return Err(HipError::Disconnected),
                // A garbled status read is just another unanswered poll
                Err(_) => {}
            }
            bus.transport_mut().delay_ms(self.policy.rewind_interval_ms);
        }

        warn!("hip: rewind of handle {} timed out", handle);
        Err(HipError::TransportError)
    }
}

/// Everything except removal surfaces from the engine as a transport error.
fn escalate(err: HipError) -> HipError {
    match err {
        HipError::Disconnected => HipError::Disconnected,
        _ => HipError::TransportError,
    }
}
