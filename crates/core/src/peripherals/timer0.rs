use crate::target::{TimerConfig, WaveformMode};
use serde::Serialize;

/// 8-bit Timer/Counter0, compare unit A only.
///
/// Configuration (OCR0A, mode, clock select) is owned by the firmware and
/// passed in on every tick; this holds the counter and flag state.
#[derive(Debug, Default, Clone, Serialize)]
pub struct Timer0 {
    tcnt: u8,
    prescale: u16,
    ocf0a: bool,
}

impl Timer0 {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counter(&self) -> u8 {
        self.tcnt
    }

    /// TIFR.OCF0A
    pub fn compare_flag(&self) -> bool {
        self.ocf0a
    }

    /// Cleared by hardware when the compare vector is taken.
    pub fn clear_compare_flag(&mut self) {
        self.ocf0a = false;
    }

    /// Advance by one system clock cycle. Returns true on a compare match.
    pub fn tick(&mut self, config: &TimerConfig) -> bool {
        let Some(divisor) = config.prescaler.divisor() else {
            return false; // Not clocked
        };

        self.prescale += 1;
        if self.prescale < divisor {
            return false;
        }
        self.prescale = 0;
        self.count(config)
    }

    fn count(&mut self, config: &TimerConfig) -> bool {
        let matched = self.tcnt == config.compare;
        self.tcnt = match config.mode {
            WaveformMode::Ctc if matched => 0,
            // PWM modes count to 0xFF like normal mode; output compare pins are not modeled.
            _ => self.tcnt.wrapping_add(1),
        };
        if matched {
            self.ocf0a = true;
        }
        matched
    }
}
