//! Expectation-driven test harness.
//!
//! Pins are registered as named watches. A test then asks the harness to run
//! the machine for some time and states which `(watch, value)` transitions
//! must happen in that window; any other transition on a watched pin is a
//! failure.
//!
//! ```
//! use tinysim_core::harness::{PinWatch, StopMode};
//! use tinysim_core::{InfoLog, Machine};
//!
//! let mut watch = PinWatch::with_log(Machine::default(), InfoLog::new(Vec::new()));
//! let pin = watch.register_ioport('B', 0, Some("PIN"), true, false).unwrap();
//! let led = watch.register_ioport('B', 3, Some("LED"), true, false).unwrap();
//! watch.expect_for_cycles(1000, StopMode::Never, &[(pin, true), (led, true)]).unwrap();
//! ```

use crate::info::InfoLog;
use crate::machine::{Machine, PinEvent};
use crate::{SimResult, SimulationError};
use std::fmt;
use std::io::{Stdout, Write};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopMode {
    /// Run the whole window.
    #[default]
    Never,
    /// Return as soon as one expectation is met.
    OnFirst,
    /// Return as soon as every expectation is met.
    WhenAll,
}

#[derive(Debug, Clone)]
struct Watch {
    name: String,
    port: char,
    pin: u8,
    display: bool,
    /// Displayed only; never matched against expectations.
    ignore: bool,
}

/// Expectations not met within a window.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{}", problems.join("; "))]
pub struct ExpectationError {
    pub problems: Vec<String>,
}

struct Irq<'a>(&'a str);

impl fmt::Display for Irq<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<IRQ {}>", self.0)
    }
}

pub struct PinWatch<W: Write = Stdout> {
    machine: Machine,
    log: InfoLog<W>,
    watches: Vec<Watch>,
    /// Recorded transitions not yet matched: (cycle, watch, value).
    recorded: Vec<(u64, WatchId, bool)>,
}

impl PinWatch<Stdout> {
    pub fn new(machine: Machine) -> Self {
        Self::with_log(machine, InfoLog::stdout())
    }
}

impl<W: Write> PinWatch<W> {
    pub fn with_log(machine: Machine, log: InfoLog<W>) -> Self {
        Self {
            machine,
            log,
            watches: Vec::new(),
            recorded: Vec::new(),
        }
    }

    pub fn machine(&self) -> &Machine {
        &self.machine
    }

    pub fn machine_mut(&mut self) -> &mut Machine {
        &mut self.machine
    }

    pub fn log(&self) -> &InfoLog<W> {
        &self.log
    }

    pub fn into_parts(self) -> (Machine, InfoLog<W>) {
        (self.machine, self.log)
    }

    /// Watch pin `index` of port `letter`. Unnamed watches are called
    /// `ioport_<letter><index>`. `display_only` implies `display` and keeps
    /// the watch out of expectation matching.
    pub fn register_ioport(
        &mut self,
        letter: char,
        index: u8,
        name: Option<&str>,
        display: bool,
        display_only: bool,
    ) -> SimResult<WatchId> {
        let port = letter.to_ascii_uppercase();
        if port != self.machine.port_b.letter() {
            return Err(SimulationError::UnknownPort(letter));
        }
        self.machine.port_b.check_pin(index)?;

        let name = name
            .map(str::to_string)
            .unwrap_or_else(|| format!("ioport_{}{}", port, index));
        tracing::debug!("Watching {}{} as {}", port, index, name);

        self.watches.push(Watch {
            name,
            port,
            pin: index,
            display: display || display_only,
            ignore: display_only,
        });
        Ok(WatchId(self.watches.len() - 1))
    }

    pub fn watch_name(&self, id: WatchId) -> SimResult<&str> {
        self.watches
            .get(id.0)
            .map(|w| w.name.as_str())
            .ok_or(SimulationError::UnknownWatch(id.0))
    }

    pub fn expect_for_ms(
        &mut self,
        ms: u64,
        stop: StopMode,
        expected: &[(WatchId, bool)],
    ) -> Result<(), ExpectationError> {
        self.expect_for_us(ms.saturating_mul(1000), stop, expected)
    }

    pub fn expect_for_us(
        &mut self,
        us: u64,
        stop: StopMode,
        expected: &[(WatchId, bool)],
    ) -> Result<(), ExpectationError> {
        let cycles = self.machine.frequency().usec_to_cycles(us);
        self.expect_for_cycles(cycles, stop, expected)
    }

    /// Run up to `cycles` cycles requiring exactly the `expected`
    /// transitions on watched pins. Fails at the first cycle that produces
    /// an unexpected transition.
    pub fn expect_for_cycles(
        &mut self,
        cycles: u64,
        stop: StopMode,
        expected: &[(WatchId, bool)],
    ) -> Result<(), ExpectationError> {
        let mut remaining: Vec<(WatchId, bool)> = expected.to_vec();
        let mut problems = Vec::new();
        let end = self.machine.cycle().saturating_add(cycles);

        // Transitions from outside the window (e.g. a drive between calls)
        // are judged first.
        self.collect();

        while self.machine.cycle() < end {
            self.machine.run_one();
            self.collect();

            let mut done = false;
            while let Some(&(cycle, id, value)) = self.recorded.first() {
                if cycle > end {
                    break;
                }
                self.recorded.remove(0);

                if let Some(pos) = remaining.iter().position(|&p| p == (id, value)) {
                    remaining.remove(pos);
                    done |= match stop {
                        StopMode::Never => false,
                        StopMode::OnFirst => true,
                        StopMode::WhenAll => remaining.is_empty(),
                    };
                } else {
                    problems.push(format!(
                        "Unexpected {} with value {}",
                        Irq(&self.watches[id.0].name),
                        value as u8
                    ));
                }
            }

            if !problems.is_empty() {
                return Err(ExpectationError { problems });
            }
            if done {
                return Ok(());
            }
        }

        for (id, value) in remaining {
            let name = self.watch_name(id).unwrap_or("?");
            problems.push(format!(
                "Expected but not occured: {} with value {}",
                Irq(name),
                value as u8
            ));
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(ExpectationError { problems })
        }
    }

    /// Run with display-only output and no expectations.
    pub fn debug_for_cycles(&mut self, cycles: u64) {
        let end = self.machine.cycle().saturating_add(cycles);
        self.collect();
        while self.machine.cycle() < end {
            self.machine.run_one();
            self.collect();
        }
        self.recorded.clear();
    }

    fn collect(&mut self) {
        for event in self.machine.drain_events() {
            self.record(&event);
        }
    }

    fn record(&mut self, event: &PinEvent) {
        for (idx, watch) in self.watches.iter().enumerate() {
            if watch.port != event.port || watch.pin != event.pin {
                continue;
            }
            if !watch.ignore {
                self.recorded.push((event.cycle, WatchId(idx), event.value));
            }
            if watch.display {
                let shown = crate::sim_info!(
                    self.log,
                    &self.machine,
                    "{} changed to {}",
                    Irq(&watch.name),
                    event.value as u8
                );
                if let Err(e) = shown {
                    tracing::warn!("Failed to write pin change: {}", e);
                }
            }
        }
    }
}

/// A push button wired to a pin.
///
/// With a pull-up the button is active low: pressing drives the pin low,
/// releasing drives it high.
#[derive(Debug, Clone, Copy)]
pub struct PinButton {
    port: char,
    pin: u8,
    pressed_level: bool,
}

impl PinButton {
    /// Wire the button and leave it released.
    pub fn connect(machine: &mut Machine, port: char, pin: u8, pullup: bool) -> SimResult<Self> {
        let button = Self {
            port,
            pin,
            pressed_level: !pullup,
        };
        button.release(machine, None)?;
        Ok(button)
    }

    pub fn press(&self, machine: &mut Machine, timeout_us: Option<u64>) -> SimResult<()> {
        self.set(machine, self.pressed_level, timeout_us)
    }

    pub fn release(&self, machine: &mut Machine, timeout_us: Option<u64>) -> SimResult<()> {
        self.set(machine, !self.pressed_level, timeout_us)
    }

    /// Drive `level`, and with a timeout flip back after that many microseconds.
    fn set(&self, machine: &mut Machine, level: bool, timeout_us: Option<u64>) -> SimResult<()> {
        machine.cancel_scheduled(self.port, self.pin)?;
        machine.drive_input(self.port, self.pin, Some(level))?;

        if let Some(us) = timeout_us {
            let at = machine
                .cycle()
                .saturating_add(machine.frequency().usec_to_cycles(us));
            machine.schedule_input(at, self.port, self.pin, Some(!level))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Frequency;

    fn harness() -> PinWatch<Vec<u8>> {
        PinWatch::with_log(Machine::default(), InfoLog::new(Vec::new()))
    }

    fn output(watch: &PinWatch<Vec<u8>>) -> String {
        String::from_utf8(watch.log().get_ref().clone()).unwrap()
    }

    #[test]
    fn test_both_pins_rise_within_1000_cycles() {
        let mut w = harness();
        let pin = w.register_ioport('B', 0, Some("PIN"), true, false).unwrap();
        let led = w.register_ioport('B', 3, Some("LED"), true, false).unwrap();

        w.expect_for_cycles(1000, StopMode::Never, &[(pin, true), (led, true)])
            .unwrap();
        assert_eq!(w.machine().cycle(), 1000);

        let out = output(&w);
        let lines: Vec<_> = out.lines().collect();
        assert_eq!(
            lines,
            vec![
                "+50 (0 ms, 6 us, 250 ns): <IRQ PIN> changed to 1",
                "+1 (0 ms, 0 us, 125 ns): <IRQ LED> changed to 1",
            ]
        );
    }

    #[test]
    fn test_stop_when_all_returns_early() {
        let mut w = harness();
        let pin = w.register_ioport('B', 0, Some("PIN"), false, false).unwrap();
        let led = w.register_ioport('B', 3, Some("LED"), false, false).unwrap();

        w.expect_for_cycles(1000, StopMode::WhenAll, &[(pin, true), (led, true)])
            .unwrap();
        assert_eq!(w.machine().cycle(), 51);
        assert!(output(&w).is_empty());
    }

    #[test]
    fn test_stop_on_first() {
        let mut w = harness();
        let pin = w.register_ioport('B', 0, None, false, false).unwrap();
        assert_eq!(w.watch_name(pin).unwrap(), "ioport_B0");

        w.expect_for_cycles(1000, StopMode::OnFirst, &[(pin, true)]).unwrap();
        assert_eq!(w.machine().cycle(), 50);
    }

    #[test]
    fn test_quiet_window_before_first_match() {
        let mut w = harness();
        let pin = w.register_ioport('B', 0, Some("PIN"), false, false).unwrap();
        w.expect_for_cycles(49, StopMode::Never, &[]).unwrap();
        w.expect_for_cycles(1, StopMode::Never, &[(pin, true)]).unwrap();
    }

    #[test]
    fn test_unexpected_transition_fails() {
        let mut w = harness();
        w.register_ioport('B', 0, Some("PIN"), false, false).unwrap();

        let err = w.expect_for_cycles(1000, StopMode::Never, &[]).unwrap_err();
        assert_eq!(err.problems, vec!["Unexpected <IRQ PIN> with value 1".to_string()]);
        // Fails at the offending cycle rather than running out the window.
        assert_eq!(w.machine().cycle(), 50);
    }

    #[test]
    fn test_missing_transition_fails() {
        let mut w = harness();
        let led = w.register_ioport('B', 3, Some("LED"), false, false).unwrap();

        let err = w
            .expect_for_cycles(1000, StopMode::Never, &[(led, true), (led, false)])
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Expected but not occured: <IRQ LED> with value 0"
        );
    }

    #[test]
    fn test_latched_pins_stay_quiet() {
        let mut w = harness();
        let pin = w.register_ioport('B', 0, Some("PIN"), false, false).unwrap();
        let led = w.register_ioport('B', 3, Some("LED"), false, false).unwrap();
        w.expect_for_cycles(100, StopMode::Never, &[(pin, true), (led, true)])
            .unwrap();
        // Dozens more compare matches, no further edges.
        w.expect_for_ms(1, StopMode::Never, &[]).unwrap();
    }

    #[test]
    fn test_display_only_watch_is_not_matched() {
        let mut w = harness();
        w.register_ioport('B', 0, Some("PIN"), false, true).unwrap();
        w.expect_for_cycles(100, StopMode::Never, &[]).unwrap();
        assert!(output(&w).contains("<IRQ PIN> changed to 1"));
    }

    #[test]
    fn test_button_on_unwatched_line_raises_no_interrupt() {
        let mut w = harness();
        let button_pin = w.register_ioport('B', 2, Some("BTN"), false, false).unwrap();
        let led = w.register_ioport('B', 3, Some("LED"), false, false).unwrap();

        let button = PinButton::connect(w.machine_mut(), 'B', 2, true).unwrap();
        w.expect_for_cycles(10, StopMode::Never, &[(button_pin, true)]).unwrap();

        button.press(w.machine_mut(), Some(2)).unwrap();
        // Pressed now, auto-released after 2 us (16 cycles at 8 MHz).
        w.expect_for_cycles(20, StopMode::Never, &[(button_pin, false), (button_pin, true)])
            .unwrap();
        assert!(!w.machine().pin_level(3).unwrap());

        // The LED only rises from the self-induced PB0 edge.
        w.expect_for_cycles(100, StopMode::WhenAll, &[(led, true)]).unwrap();
        assert_eq!(w.machine().cycle(), 51);
    }

    #[test]
    fn test_press_with_unbounded_hold_stays_pressed() {
        let mut w = harness();
        let button_pin = w.register_ioport('B', 4, Some("BTN"), false, false).unwrap();
        let button = PinButton::connect(w.machine_mut(), 'B', 4, false).unwrap();

        button.press(w.machine_mut(), Some(u64::MAX)).unwrap();
        w.expect_for_cycles(1, StopMode::Never, &[(button_pin, true)]).unwrap();
        w.machine_mut().run_cycles(500);
        assert!(w.machine().pin_level(4).unwrap());
    }

    #[test]
    fn test_debug_run_logs_drives_made_between_runs() {
        let mut w = harness();
        w.register_ioport('B', 4, None, true, true).unwrap();
        let button = PinButton::connect(w.machine_mut(), 'B', 4, false).unwrap();

        w.debug_for_cycles(10);
        button.press(w.machine_mut(), Some(1)).unwrap();
        w.debug_for_cycles(10);

        let out = output(&w);
        let lines: Vec<_> = out.lines().collect();
        assert_eq!(
            lines,
            vec![
                "+10 (0 ms, 1 us, 250 ns): <IRQ ioport_B4> changed to 1",
                "+8 (0 ms, 1 us, 0 ns): <IRQ ioport_B4> changed to 0",
            ]
        );
    }

    #[test]
    fn test_expect_for_us_scales_with_frequency() {
        let machine = Machine::new(Frequency::new(1_000_000).unwrap());
        let mut w = PinWatch::with_log(machine, InfoLog::new(Vec::new()));
        let pin = w.register_ioport('B', 0, Some("PIN"), true, false).unwrap();
        w.expect_for_us(49, StopMode::Never, &[]).unwrap();
        w.expect_for_us(1, StopMode::Never, &[(pin, true)]).unwrap();
        assert!(output(&w).starts_with("+50 (0 ms, 50 us, 0 ns): "));
    }

    #[test]
    fn test_register_rejects_unknown_pins() {
        let mut w = harness();
        assert_eq!(
            w.register_ioport('C', 0, None, false, false),
            Err(SimulationError::UnknownPort('C'))
        );
        assert_eq!(
            w.register_ioport('b', 6, None, false, false),
            Err(SimulationError::PinOutOfRange { port: 'B', pin: 6 })
        );
    }
}
