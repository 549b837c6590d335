//! What the consumer does when it finds the ring empty.
//!
//! The choice trades wake-up latency against CPU time; it has no effect on
//! correctness. None of these strategies involve the producer.

use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Strategy invoked once per empty pop.
pub trait IdleStrategy: Send + 'static {
    fn idle(&mut self);

    /// Called after a successful pop so backoff state can start over.
    fn reset(&mut self) {}
}

/// Serializable selection of an [`IdleStrategy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum IdlePolicy {
    /// Sleep a fixed number of milliseconds.
    Sleep { millis: u64 },
    /// Give the rest of the time slice back to the scheduler.
    Yield,
    /// Spin with CPU pause hints, backing off to `yield_now`.
    Spin,
}

impl Default for IdlePolicy {
    fn default() -> Self {
        Self::Sleep { millis: 1 }
    }
}

impl IdlePolicy {
    pub fn into_strategy(self) -> Box<dyn IdleStrategy> {
        match self {
            Self::Sleep { millis } => {
                Box::new(SleepIdle::new(Duration::from_millis(millis.max(1))))
            }
            Self::Yield => Box::new(YieldIdle),
            Self::Spin => Box::new(SpinIdle::default()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SleepIdle {
    period: Duration,
}

impl SleepIdle {
    pub fn new(period: Duration) -> Self {
        Self { period }
    }
}

impl IdleStrategy for SleepIdle {
    fn idle(&mut self) {
        thread::sleep(self.period);
    }
}

#[derive(Debug, Clone, Copy)]
pub struct YieldIdle;

impl IdleStrategy for YieldIdle {
    fn idle(&mut self) {
        thread::yield_now();
    }
}

/// Exponential spin that degrades into yielding so an idle consumer does
/// not monopolise a core.
#[derive(Debug, Clone, Default)]
pub struct SpinIdle {
    step: u32,
}

impl SpinIdle {
    const SPIN_LIMIT: u32 = 6;
}

impl IdleStrategy for SpinIdle {
    fn idle(&mut self) {
        if self.step <= Self::SPIN_LIMIT {
            for _ in 0..(1u32 << self.step) {
                std::hint::spin_loop();
            }
            self.step += 1;
        } else {
            thread::yield_now();
        }
    }

    fn reset(&mut self) {
        self.step = 0;
    }
}
