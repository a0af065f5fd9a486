use crate::clock::Frequency;
use crate::peripherals::pcint::PinChangeUnit;
use crate::peripherals::port::IoPort;
use crate::peripherals::timer0::Timer0;
use crate::snapshot::MachineSnapshot;
use crate::target::{self, Event, TargetState, SETUP};
use crate::{DeviceClock, SimResult, SimulationError, SimulationObserver};
use serde::Serialize;
use std::sync::Arc;

/// The only MCU the test target is built for.
pub const SUPPORTED_MCU: &str = "attiny85";

/// PB0..PB5
const PORTB_WIDTH: u8 = 6;

/// A change of a pin's read-back level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PinEvent {
    pub cycle: u64,
    pub port: char,
    pub pin: u8,
    pub value: bool,
}

#[derive(Debug, Clone, Copy)]
struct ScheduledDrive {
    at: u64,
    pin: u8,
    level: Option<bool>,
}

/// ATtiny85 running the pin-interrupt test firmware, stepped one clock
/// cycle at a time.
pub struct Machine {
    frequency: Frequency,
    cycle: u64,
    pub state: TargetState,
    pub port_b: IoPort,
    pub timer0: Timer0,
    pub pin_change: PinChangeUnit,
    /// PINB as last published to listeners.
    published: u8,
    events: Vec<PinEvent>,
    scheduled: Vec<ScheduledDrive>,
    pub observers: Vec<Arc<dyn SimulationObserver>>,
}

impl Machine {
    pub fn new(frequency: Frequency) -> Self {
        let mut machine = Self {
            frequency,
            cycle: 0,
            state: TargetState::reset(),
            port_b: IoPort::new('B', PORTB_WIDTH),
            timer0: Timer0::new(),
            pin_change: PinChangeUnit::new(0),
            published: 0,
            events: Vec::new(),
            scheduled: Vec::new(),
            observers: Vec::new(),
        };
        machine.reset();
        machine
    }

    pub fn for_mcu(mcu: &str, frequency: Frequency) -> SimResult<Self> {
        if !mcu.eq_ignore_ascii_case(SUPPORTED_MCU) {
            return Err(SimulationError::UnsupportedMcu(mcu.to_string()));
        }
        Ok(Self::new(frequency))
    }

    /// Power-on reset followed by the firmware's setup code.
    ///
    /// External drivers stay connected; pending scheduled drives are dropped.
    pub fn reset(&mut self) {
        self.cycle = 0;
        self.state = TargetState::reset();
        self.timer0 = Timer0::new();
        self.scheduled.clear();
        self.events.clear();

        let levels = self.pin_levels();
        self.pin_change = PinChangeUnit::new(levels);
        self.published = levels;

        for step in SETUP {
            self.state = self.state.apply(step);
            // Setup writes can move pins; give the pin-change unit a look
            // before the next register is touched.
            self.pin_change.sample(self.pin_levels(), self.state.pin_change.mask);
            self.publish_levels();
            if let Some(event) = self.dispatch() {
                tracing::warn!("{} taken during setup", event.name());
            }
        }
        tracing::debug!("Firmware setup complete: {:?}", self.state);
    }

    pub fn add_observer(&mut self, observer: Arc<dyn SimulationObserver>) {
        observer.on_simulation_start();
        self.observers.push(observer);
    }

    /// Tell observers the run is over.
    pub fn finish(&self) {
        for observer in &self.observers {
            observer.on_simulation_stop();
        }
    }

    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    pub fn frequency(&self) -> Frequency {
        self.frequency
    }

    /// PINB
    pub fn pin_levels(&self) -> u8 {
        self.port_b.levels(self.state.ddrb(), self.state.portb())
    }

    pub fn pin_level(&self, pin: u8) -> SimResult<bool> {
        self.port_b.check_pin(pin)?;
        Ok(self.pin_levels() & (1 << pin) != 0)
    }

    fn port(&mut self, letter: char) -> SimResult<&mut IoPort> {
        if letter.eq_ignore_ascii_case(&self.port_b.letter()) {
            Ok(&mut self.port_b)
        } else {
            Err(SimulationError::UnknownPort(letter))
        }
    }

    /// Connect an external driver to a pin (`None` disconnects it). Level
    /// changes are published at the current cycle and seen by the
    /// pin-change unit on the next one.
    pub fn drive_input(&mut self, port: char, pin: u8, level: Option<bool>) -> SimResult<()> {
        self.port(port)?.drive(pin, level)?;
        self.publish_levels();
        Ok(())
    }

    /// Apply `drive_input` once the cycle counter reaches `at`.
    pub fn schedule_input(&mut self, at: u64, port: char, pin: u8, level: Option<bool>) -> SimResult<()> {
        self.port(port)?.check_pin(pin)?;
        let idx = self.scheduled.partition_point(|s| s.at <= at);
        self.scheduled.insert(idx, ScheduledDrive { at, pin, level });
        Ok(())
    }

    /// Drop scheduled drives for a pin.
    pub fn cancel_scheduled(&mut self, port: char, pin: u8) -> SimResult<()> {
        self.port(port)?.check_pin(pin)?;
        self.scheduled.retain(|s| s.pin != pin);
        Ok(())
    }

    /// Pin changes recorded since the last call.
    pub fn drain_events(&mut self) -> Vec<PinEvent> {
        std::mem::take(&mut self.events)
    }

    /// Advance one clock cycle.
    pub fn run_one(&mut self) {
        self.cycle += 1;
        self.apply_scheduled();

        if self.timer0.tick(&self.state.timer) {
            tracing::debug!("TIMER0: compare match at cycle {}", self.cycle);
        }

        let changed = self
            .pin_change
            .sample(self.pin_levels(), self.state.pin_change.mask);
        if changed != 0 {
            tracing::debug!("PCINT: lines {:#04x} changed at cycle {}", changed, self.cycle);
        }

        self.dispatch();
        self.publish_levels();

        for observer in &self.observers {
            observer.on_cycle_end(self.cycle);
        }
    }

    pub fn run_cycles(&mut self, cycles: u64) {
        let end = self.cycle.saturating_add(cycles);
        while self.cycle < end {
            self.run_one();
        }
    }

    pub fn run_us(&mut self, usecs: u64) {
        self.run_cycles(self.frequency.usec_to_cycles(usecs));
    }

    /// Highest-priority interrupt that would be taken right now.
    pub fn pending_interrupt(&self) -> Option<Event> {
        if self.pin_change.flag() && self.state.accepts(Event::PinChange) {
            Some(Event::PinChange)
        } else if self.timer0.compare_flag() && self.state.accepts(Event::TimerCompareMatch) {
            Some(Event::TimerCompareMatch)
        } else {
            None
        }
    }

    /// Take at most one interrupt. The handler runs to completion, so
    /// handlers never nest.
    fn dispatch(&mut self) -> Option<Event> {
        let event = self.pending_interrupt()?;
        match event {
            Event::PinChange => self.pin_change.clear_flag(),
            Event::TimerCompareMatch => self.timer0.clear_compare_flag(),
        }

        tracing::debug!("Vector {} ({}) taken at cycle {}", event.vector(), event.name(), self.cycle);
        self.state = target::handle(self.state, event);

        for observer in &self.observers {
            observer.on_interrupt(event, self.cycle);
        }
        Some(event)
    }

    fn apply_scheduled(&mut self) {
        while let Some(next) = self.scheduled.first().copied() {
            if next.at > self.cycle {
                break;
            }
            self.scheduled.remove(0);
            if let Err(e) = self.port_b.drive(next.pin, next.level) {
                tracing::warn!("Dropping scheduled drive: {}", e);
            }
        }
    }

    fn publish_levels(&mut self) {
        let levels = self.pin_levels();
        let changed = levels ^ self.published;
        self.published = levels;

        for pin in (0..self.port_b.width()).filter(|pin| changed & (1 << pin) != 0) {
            let event = PinEvent {
                cycle: self.cycle,
                port: self.port_b.letter(),
                pin,
                value: levels & (1 << pin) != 0,
            };
            for observer in &self.observers {
                observer.on_pin_change(&event);
            }
            self.events.push(event);
        }
    }

    pub fn snapshot(&self) -> MachineSnapshot {
        MachineSnapshot::capture(self)
    }
}

impl Default for Machine {
    fn default() -> Self {
        Self::new(Frequency::default())
    }
}

impl DeviceClock for Machine {
    fn cycle(&self) -> u64 {
        self.cycle
    }

    fn frequency(&self) -> Frequency {
        self.frequency
    }
}

impl std::fmt::Debug for Machine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Machine")
            .field("frequency", &self.frequency)
            .field("cycle", &self.cycle)
            .field("state", &self.state)
            .field("pinb", &format_args!("{:#010b}", self.pin_levels()))
            .finish_non_exhaustive()
    }
}
