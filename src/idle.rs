//! Idle strategies for threads waiting on shared-memory progress

use std::time::Duration;

/// Policy controlling how a thread waits when a duty cycle finds no work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleStrategy {
    /// Spin without yielding the CPU. Lowest latency, one core burned.
    BusySpin,
    /// `thread::yield_now` between attempts.
    Yielding,
    /// Sleep a fixed duration between attempts.
    Sleeping(Duration),
    /// Spin, then yield, then park with exponential backoff.
    Backoff {
        max_spins: u64,
        max_yields: u64,
        min_park: Duration,
        max_park: Duration,
    },
}

impl IdleStrategy {
    /// Backoff with conventional limits.
    pub fn backoff_default() -> Self {
        IdleStrategy::Backoff {
            max_spins: 100,
            max_yields: 100,
            min_park: Duration::from_micros(1),
            max_park: Duration::from_millis(1),
        }
    }
}

impl Default for IdleStrategy {
    fn default() -> Self {
        Self::backoff_default()
    }
}

/// Per-thread idling state for a strategy. Call [`idle`](Idler::idle) once
/// per duty cycle with the amount of work done; zero escalates the wait,
/// anything else resets it.
#[derive(Debug)]
pub struct Idler {
    strategy: IdleStrategy,
    spins: u64,
    yields: u64,
    park: Duration,
}

impl Idler {
    pub fn new(strategy: IdleStrategy) -> Self {
        let park = match strategy {
            IdleStrategy::Backoff { min_park, .. } => min_park,
            _ => Duration::ZERO,
        };
        Self {
            strategy,
            spins: 0,
            yields: 0,
            park,
        }
    }

    pub fn idle(&mut self, work_count: usize) {
        if work_count > 0 {
            self.reset();
        } else {
            self.idle_once();
        }
    }

    pub fn reset(&mut self) {
        self.spins = 0;
        self.yields = 0;
        self.park = match self.strategy {
            IdleStrategy::Backoff { min_park, .. } => min_park,
            _ => Duration::ZERO,
        };
    }

    fn idle_once(&mut self) {
        match self.strategy {
            IdleStrategy::BusySpin => std::hint::spin_loop(),
            IdleStrategy::Yielding => std::thread::yield_now(),
            IdleStrategy::Sleeping(duration) => std::thread::sleep(duration),
            IdleStrategy::Backoff {
                max_spins,
                max_yields,
                max_park,
                ..
            } => {
                if self.spins < max_spins {
                    self.spins += 1;
                    std::hint::spin_loop();
                } else if self.yields < max_yields {
                    self.yields += 1;
                    std::thread::yield_now();
                } else {
                    std::thread::sleep(self.park);
                    self.park = (self.park * 2).min(max_park);
                }
            }
        }
    }
}
