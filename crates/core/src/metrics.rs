use crate::target::Event;
use crate::{PinEvent, SimulationObserver};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

#[derive(Debug)]
pub struct PerformanceMetrics {
    cycle_count: AtomicU64,
    pin_change_dispatches: AtomicU64,
    timer_dispatches: AtomicU64,
    pin_changes: AtomicU64,
    start_time: Instant,
}

impl Default for PerformanceMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PerformanceMetrics {
    pub fn new() -> Self {
        Self {
            cycle_count: AtomicU64::new(0),
            pin_change_dispatches: AtomicU64::new(0),
            timer_dispatches: AtomicU64::new(0),
            pin_changes: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Zero every counter. Called when the metrics are attached to a run.
    pub fn reset(&self) {
        self.cycle_count.store(0, Ordering::SeqCst);
        self.pin_change_dispatches.store(0, Ordering::SeqCst);
        self.timer_dispatches.store(0, Ordering::SeqCst);
        self.pin_changes.store(0, Ordering::SeqCst);
    }

    pub fn get_cycles(&self) -> u64 {
        self.cycle_count.load(Ordering::SeqCst)
    }

    pub fn get_dispatches(&self, event: Event) -> u64 {
        match event {
            Event::PinChange => self.pin_change_dispatches.load(Ordering::SeqCst),
            Event::TimerCompareMatch => self.timer_dispatches.load(Ordering::SeqCst),
        }
    }

    pub fn get_pin_changes(&self) -> u64 {
        self.pin_changes.load(Ordering::SeqCst)
    }

    /// Simulated cycles per wall-clock second.
    pub fn get_cps(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.get_cycles() as f64 / elapsed
        } else {
            0.0
        }
    }
}

impl SimulationObserver for PerformanceMetrics {
    fn on_simulation_start(&self) {
        self.reset();
    }

    fn on_cycle_end(&self, _cycle: u64) {
        self.cycle_count.fetch_add(1, Ordering::SeqCst);
    }

    fn on_interrupt(&self, event: Event, _cycle: u64) {
        match event {
            Event::PinChange => self.pin_change_dispatches.fetch_add(1, Ordering::SeqCst),
            Event::TimerCompareMatch => self.timer_dispatches.fetch_add(1, Ordering::SeqCst),
        };
    }

    fn on_pin_change(&self, _event: &PinEvent) {
        self.pin_changes.fetch_add(1, Ordering::SeqCst);
    }
}
