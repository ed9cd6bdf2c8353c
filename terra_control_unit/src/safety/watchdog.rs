//! Liveness watchdog.
//!
//! A monotonically ticking timer reset by any well-known liveness event
//! (sensor sample, admitted command, control-loop completion). Two
//! thresholds: `communication_loss` fires at 0.8× the timeout,
//! `watchdog_timeout` at the full timeout. Expiry is surfaced, never
//! auto-recovered; only a reset call clears it.

/// Fraction of the timeout at which communication loss is flagged.
const COMM_LOSS_FRACTION: f64 = 0.8;

/// State of the watchdog at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogState {
    /// Reset recently; everything live.
    Ok,
    /// No reset for more than 0.8× the timeout.
    CommunicationLoss,
    /// No reset for more than the full timeout.
    Expired,
}

/// The watchdog timer.
#[derive(Debug, Clone, Copy)]
pub struct WatchdogTimer {
    timeout_ns: u64,
    comm_loss_ns: u64,
    last_reset_ns: u64,
}

impl WatchdogTimer {
    pub fn new(timeout_ms: u64, now_ns: u64) -> Self {
        let timeout_ns = timeout_ms.saturating_mul(1_000_000);
        Self {
            timeout_ns,
            comm_loss_ns: (timeout_ns as f64 * COMM_LOSS_FRACTION) as u64,
            last_reset_ns: now_ns,
        }
    }

    /// Reset the timer. Must happen-before any subscriber observes the
    /// reset; callers reset first, then publish.
    #[inline]
    pub fn reset(&mut self, now_ns: u64) {
        self.last_reset_ns = now_ns;
    }

    /// Nanoseconds since the last reset.
    #[inline]
    pub fn age_ns(&self, now_ns: u64) -> u64 {
        now_ns.saturating_sub(self.last_reset_ns)
    }

    /// Classify the current state.
    pub fn state(&self, now_ns: u64) -> WatchdogState {
        let age = self.age_ns(now_ns);
        if age > self.timeout_ns {
            WatchdogState::Expired
        } else if age > self.comm_loss_ns {
            WatchdogState::CommunicationLoss
        } else {
            WatchdogState::Ok
        }
    }
}
