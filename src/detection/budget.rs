/// Per-packet evaluation time budget
use std::time::{Duration, Instant};

/// Decides when evaluation of the current packet must stop early
pub trait Budget {
    /// A disabled budget is never polled
    fn is_enabled(&self) -> bool;

    /// True once the packet has used up its allowance
    fn poll(&mut self) -> bool;
}

/// Budget that never expires
#[derive(Debug, Clone, Copy, Default)]
pub struct NoBudget;

impl Budget for NoBudget {
    fn is_enabled(&self) -> bool {
        false
    }

    fn poll(&mut self) -> bool {
        false
    }
}

/// Wall-clock budget restarted for every packet
#[derive(Debug, Clone)]
pub struct PacketBudget {
    max: Duration,
    started: Instant,
    enabled: bool,
    exceeded: u64,
}

impl PacketBudget {
    pub fn new(max_packet_time_us: u64, enabled: bool) -> Self {
        Self {
            max: Duration::from_micros(max_packet_time_us),
            started: Instant::now(),
            enabled: enabled && max_packet_time_us > 0,
            exceeded: 0,
        }
    }

    /// Restart the clock for the next packet
    pub fn start_packet(&mut self) {
        self.started = Instant::now();
    }

    /// Number of polls that reported an exhausted budget
    pub fn exceeded(&self) -> u64 {
        self.exceeded
    }
}

impl Budget for PacketBudget {
    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn poll(&mut self) -> bool {
        let over = self.started.elapsed() > self.max;
        if over {
            self.exceeded += 1;
        }
        over
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_budget_is_disabled() {
        let mut budget = NoBudget;
        assert!(!budget.is_enabled());
        assert!(!budget.poll());
    }

    #[test]
    fn test_zero_limit_disables_budget() {
        assert!(!PacketBudget::new(0, true).is_enabled());
        assert!(!PacketBudget::new(100, false).is_enabled());
        assert!(PacketBudget::new(100, true).is_enabled());
    }

    #[test]
    fn test_generous_budget_not_exceeded() {
        let mut budget = PacketBudget::new(60_000_000, true);
        budget.start_packet();
        assert!(!budget.poll());
        assert_eq!(budget.exceeded(), 0);
    }

    #[test]
    fn test_expired_budget_reports_exceeded() {
        let mut budget = PacketBudget::new(1, true);
        budget.start_packet();
        std::thread::sleep(Duration::from_millis(2));
        assert!(budget.poll());
        assert_eq!(budget.exceeded(), 1);
    }
}
