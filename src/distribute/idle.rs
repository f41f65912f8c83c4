//! What a poll loop does when a pass found no work

use std::time::Duration;

/// Called once per loop iteration with the amount of work done
pub trait IdleStrategy {
    fn idle(&mut self, work_count: usize);
}

/// Never gives up the CPU
#[derive(Debug, Default, Clone, Copy)]
pub struct BusySpin;

impl IdleStrategy for BusySpin {
    fn idle(&mut self, work_count: usize) {
        if work_count == 0 {
            std::hint::spin_loop();
        }
    }
}

/// Yields to the scheduler on empty passes
#[derive(Debug, Default, Clone, Copy)]
pub struct YieldIdle;

impl IdleStrategy for YieldIdle {
    fn idle(&mut self, work_count: usize) {
        if work_count == 0 {
            std::thread::yield_now();
        }
    }
}

/// Sleeps a fixed period on empty passes
#[derive(Debug, Clone, Copy)]
pub struct SleepIdle {
    period: Duration,
}

impl SleepIdle {
    pub fn new(period: Duration) -> Self {
        Self { period }
    }
}

impl IdleStrategy for SleepIdle {
    fn idle(&mut self, work_count: usize) {
        if work_count == 0 {
            std::thread::sleep(self.period);
        }
    }
}

/// Spin, then yield, then sleep with doubling period up to `max_sleep`
///
/// Any pass with work resets to spinning.
#[derive(Debug, Clone)]
pub struct BackoffIdle {
    max_spins: u32,
    max_yields: u32,
    min_sleep: Duration,
    max_sleep: Duration,
    spins: u32,
    yields: u32,
    sleep: Duration,
}

impl BackoffIdle {
    pub fn new(max_spins: u32, max_yields: u32, min_sleep: Duration, max_sleep: Duration) -> Self {
        Self {
            max_spins,
            max_yields,
            min_sleep,
            max_sleep: max_sleep.max(min_sleep),
            spins: 0,
            yields: 0,
            sleep: min_sleep,
        }
    }

    fn reset(&mut self) {
        self.spins = 0;
        self.yields = 0;
        self.sleep = self.min_sleep;
    }
}

impl Default for BackoffIdle {
    fn default() -> Self {
        Self::new(100, 10, Duration::from_micros(10), Duration::from_millis(1))
    }
}

impl IdleStrategy for BackoffIdle {
    fn idle(&mut self, work_count: usize) {
        if work_count > 0 {
            self.reset();
            return;
        }

        if self.spins < self.max_spins {
            self.spins += 1;
            std::hint::spin_loop();
        } else if self.yields < self.max_yields {
            self.yields += 1;
            std::thread::yield_now();
        } else {
            std::thread::sleep(self.sleep);
            self.sleep = (self.sleep * 2).min(self.max_sleep);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_escalates_and_resets() {
        let mut idle = BackoffIdle::new(2, 1, Duration::from_micros(1), Duration::from_micros(4));
        for _ in 0..3 {
            idle.idle(0);
        }
        assert_eq!(idle.spins, 2);
        assert_eq!(idle.yields, 1);

        idle.idle(0);
        idle.idle(0);
        idle.idle(0);
        assert_eq!(idle.sleep, Duration::from_micros(4));

        idle.idle(5);
        assert_eq!(idle.spins, 0);
        assert_eq!(idle.sleep, Duration::from_micros(1));
    }
}
