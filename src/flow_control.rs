use serde::{Deserialize, Serialize};
use tracing::debug;

/// Backpressure signal telling upstream fetchers to pause or resume
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowSignal {
    /// Fetchers may keep pulling messages
    Open,

    /// Fetchers should stop pulling until the signal reopens
    Closed,
}

/// Hysteresis filter turning an outstanding-message count into an on/off
/// flow signal.
///
/// Flow closes only when the count rises above the high watermark and reopens
/// only when it falls below the low watermark; between the two the previous
/// state holds. [`FlowControlGate::update`] is edge-triggered: it returns a
/// signal only when the state actually changes. The gate performs no I/O and
/// never blocks.
#[derive(Debug)]
pub struct FlowControlGate {
    low_watermark: u64,
    high_watermark: u64,
    last_signal: FlowSignal,
}

impl FlowControlGate {
    /// Create a gate with the given watermarks (low must be below high,
    /// enforced by config validation). Initial state is open.
    pub fn new(low_watermark: u64, high_watermark: u64) -> Self {
        Self {
            low_watermark,
            high_watermark,
            last_signal: FlowSignal::Open,
        }
    }

    /// Feed a new outstanding count, returning the new signal if it changed.
    ///
    /// Counts may go transiently negative when an acknowledgment races an
    /// arrival; a negative count simply sits below the low watermark.
    pub fn update(&mut self, outstanding: i64) -> Option<FlowSignal> {
        let next = if outstanding > self.high_watermark as i64 {
            FlowSignal::Closed
        } else if outstanding < self.low_watermark as i64 {
            FlowSignal::Open
        } else {
            // Inside the hysteresis band the previous state holds
            self.last_signal
        };

        if next != self.last_signal {
            debug!(
                outstanding,
                from = ?self.last_signal,
                to = ?next,
                "flow control transition"
            );
            self.last_signal = next;
            Some(next)
        } else {
            None
        }
    }

    /// Current signal, as of the last update
    pub fn signal(&self) -> FlowSignal {
        self.last_signal
    }
}
