//! Time management for the simulation
//!
//! The simulation advances in discrete ticks; a fixed number of ticks forms
//! one business day. Day boundaries drive end-of-day processing.

use serde::{Deserialize, Serialize};

/// Tick and day counters
///
/// # Example
/// ```
/// use rtgs_sim_core::TimeManager;
///
/// let mut time = TimeManager::new(10);
/// assert_eq!(time.current_day(), 0);
/// for _ in 0..10 {
///     time.advance_tick();
/// }
/// assert_eq!(time.current_tick(), 10);
/// assert_eq!(time.current_day(), 1);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeManager {
    current_tick: usize,
    ticks_per_day: usize,
}

impl TimeManager {
    /// # Panics
    /// Panics if `ticks_per_day` is zero; configuration validation rejects it
    /// before construction.
    pub fn new(ticks_per_day: usize) -> Self {
        Self::at_tick(ticks_per_day, 0)
    }

    /// Clock positioned at an arbitrary tick (checkpoint restore)
    pub fn at_tick(ticks_per_day: usize, current_tick: usize) -> Self {
        assert!(ticks_per_day > 0, "ticks_per_day must be positive");
        Self {
            current_tick,
            ticks_per_day,
        }
    }

    pub fn advance_tick(&mut self) {
        self.current_tick += 1;
    }

    pub fn current_tick(&self) -> usize {
        self.current_tick
    }

    /// Zero-based day index of the current tick
    pub fn current_day(&self) -> usize {
        self.current_tick / self.ticks_per_day
    }

    /// Offset of the current tick within its day, in `[0, ticks_per_day)`
    pub fn tick_within_day(&self) -> usize {
        self.current_tick % self.ticks_per_day
    }

    /// True on the last tick of a business day
    pub fn is_end_of_day(&self) -> bool {
        self.tick_within_day() == self.ticks_per_day - 1
    }

    /// Ticks left in the current day after the current one
    pub fn ticks_remaining_in_day(&self) -> usize {
        self.ticks_per_day - 1 - self.tick_within_day()
    }

    /// Last tick of the day containing `tick`
    pub fn end_of_day_tick(&self, tick: usize) -> usize {
        (tick / self.ticks_per_day + 1) * self.ticks_per_day - 1
    }

    pub fn ticks_per_day(&self) -> usize {
        self.ticks_per_day
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_end_of_day_detection() {
        let mut time = TimeManager::new(4);
        let flags: Vec<bool> = (0..8)
            .map(|_| {
                let eod = time.is_end_of_day();
                time.advance_tick();
                eod
            })
            .collect();
        assert_eq!(
            flags,
            vec![false, false, false, true, false, false, false, true]
        );
    }

    #[test]
    fn test_ticks_remaining_in_day() {
        let time = TimeManager::at_tick(10, 13);
        assert_eq!(time.tick_within_day(), 3);
        assert_eq!(time.ticks_remaining_in_day(), 6);
        assert_eq!(time.end_of_day_tick(13), 19);
    }

    #[test]
    #[should_panic(expected = "ticks_per_day must be positive")]
    fn test_zero_ticks_per_day_rejected() {
        TimeManager::new(0);
    }
}
