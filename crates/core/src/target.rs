//! Behavioral model of the ATtiny85 pin-interrupt test firmware.
//!
//! The firmware arms two interrupt sources and then idles:
//! - PCINT0 (pin change on PB0) latches the "LED" pin PB3 high.
//! - TIMER0_COMPA (timer 0 compare match, CTC, OCR0A = 49, clk/1) latches
//!   the "PIN" pin PB0 high.
//!
//! Handlers are pure `(TargetState, Event) -> TargetState` functions so the
//! firmware can be exercised without a running machine. Neither pin is ever
//! driven low again once set.

use bitflags::bitflags;
use serde::Serialize;
use std::collections::BTreeMap;

/// PB0, driven by the timer compare handler.
pub const PIN: u8 = 0;
/// PB3, driven by the pin-change handler.
pub const LED: u8 = 3;
/// Pin-change line watched by the firmware (PCINT0 is PB0).
pub const WATCHED_LINE: u8 = 0;
/// OCR0A value; the match fires every `COMPARE_VALUE + 1` timer ticks.
pub const COMPARE_VALUE: u8 = 50 - 1;

bitflags! {
    /// General Interrupt Mask Register.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Gimsk: u8 {
        const INT0 = 1 << 6;
        const PCIE = 1 << 5;
    }

    /// Timer/Counter Interrupt Mask Register.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Timsk: u8 {
        const OCIE1A = 1 << 6;
        const OCIE1B = 1 << 5;
        const OCIE0A = 1 << 4;
        const OCIE0B = 1 << 3;
        const TOIE1 = 1 << 2;
        const TOIE0 = 1 << 1;
    }

    /// Timer/Counter0 Control Register A.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Tccr0a: u8 {
        const COM0A1 = 1 << 7;
        const COM0A0 = 1 << 6;
        const COM0B1 = 1 << 5;
        const COM0B0 = 1 << 4;
        const WGM01 = 1 << 1;
        const WGM00 = 1 << 0;
    }

    /// Timer/Counter0 Control Register B.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Tccr0b: u8 {
        const FOC0A = 1 << 7;
        const FOC0B = 1 << 6;
        const WGM02 = 1 << 3;
        const CS02 = 1 << 2;
        const CS01 = 1 << 1;
        const CS00 = 1 << 0;
    }
}

/// I/O registers involved in the pin-interrupt test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum IoReg {
    Pcmsk,
    Pinb,
    Ddrb,
    Portb,
    Ocr0a,
    Tccr0a,
    Tcnt0,
    Tccr0b,
    Tifr,
    Timsk,
    Gifr,
    Gimsk,
}

impl IoReg {
    pub const fn name(self) -> &'static str {
        match self {
            IoReg::Pcmsk => "PCMSK",
            IoReg::Pinb => "PINB",
            IoReg::Ddrb => "DDRB",
            IoReg::Portb => "PORTB",
            IoReg::Ocr0a => "OCR0A",
            IoReg::Tccr0a => "TCCR0A",
            IoReg::Tcnt0 => "TCNT0",
            IoReg::Tccr0b => "TCCR0B",
            IoReg::Tifr => "TIFR",
            IoReg::Timsk => "TIMSK",
            IoReg::Gifr => "GIFR",
            IoReg::Gimsk => "GIMSK",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    #[default]
    Input,
    Output,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct PinConfig {
    pub direction: Direction,
    /// PORTB bit: driven level for outputs, pull-up enable for inputs.
    pub high: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct PinChangeConfig {
    /// GIMSK.PCIE
    pub enabled: bool,
    /// PCMSK
    pub mask: u8,
}

/// Timer 0 waveform generation mode (WGM02:0).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WaveformMode {
    #[default]
    Normal,
    PhaseCorrectPwm,
    /// Clear timer on compare match.
    Ctc,
    FastPwm,
}

impl WaveformMode {
    fn bits(self) -> Tccr0a {
        match self {
            WaveformMode::Normal => Tccr0a::empty(),
            WaveformMode::PhaseCorrectPwm => Tccr0a::WGM00,
            WaveformMode::Ctc => Tccr0a::WGM01,
            WaveformMode::FastPwm => Tccr0a::WGM01 | Tccr0a::WGM00,
        }
    }
}

/// Timer 0 clock select (CS02:0).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Prescaler {
    #[default]
    Stopped,
    Div1,
    Div8,
    Div64,
    Div256,
    Div1024,
    ExternalFalling,
    ExternalRising,
}

impl Prescaler {
    fn bits(self) -> Tccr0b {
        Tccr0b::from_bits_truncate(match self {
            Prescaler::Stopped => 0,
            Prescaler::Div1 => 1,
            Prescaler::Div8 => 2,
            Prescaler::Div64 => 3,
            Prescaler::Div256 => 4,
            Prescaler::Div1024 => 5,
            Prescaler::ExternalFalling => 6,
            Prescaler::ExternalRising => 7,
        })
    }

    /// Clock cycles per timer tick. `None` when the timer is not clocked
    /// from the system clock.
    pub fn divisor(self) -> Option<u16> {
        match self {
            Prescaler::Div1 => Some(1),
            Prescaler::Div8 => Some(8),
            Prescaler::Div64 => Some(64),
            Prescaler::Div256 => Some(256),
            Prescaler::Div1024 => Some(1024),
            Prescaler::Stopped | Prescaler::ExternalFalling | Prescaler::ExternalRising => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct TimerConfig {
    /// OCR0A
    pub compare: u8,
    pub mode: WaveformMode,
    pub prescaler: Prescaler,
    /// TIMSK.OCIE0A
    pub compare_interrupt: bool,
}

/// Where the firmware's single execution context currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    #[default]
    Idle,
    HandlingPinChange,
    HandlingTimerMatch,
}

/// Interrupt sources the firmware installs handlers for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Event {
    PinChange,
    TimerCompareMatch,
}

impl Event {
    /// Interrupt vector number on the ATtiny85. Lower numbers win.
    pub const fn vector(self) -> u8 {
        match self {
            Event::PinChange => 2,
            Event::TimerCompareMatch => 10,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Event::PinChange => "PCINT0",
            Event::TimerCompareMatch => "TIMER0_COMPA",
        }
    }
}

/// Register state owned by the firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct TargetState {
    pub pin: PinConfig,
    pub led: PinConfig,
    pub pin_change: PinChangeConfig,
    pub timer: TimerConfig,
    /// SREG.I
    pub interrupts_enabled: bool,
    pub mode: Mode,
}

/// One register write of the firmware's initialization sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupStep {
    /// `PORTB = 0 << 0`
    DrivePinLow,
    /// `DDRB = 1 << 0`
    PinAsOutput,
    /// `GIMSK |= 1 << PCIE`
    EnablePinChange,
    /// `PCMSK |= 1 << PCINT0`
    WatchLine(u8),
    /// `PORTB |= 0 << 3`
    DriveLedLow,
    /// `DDRB |= 1 << 3`
    LedAsOutput,
    /// `OCR0A = 50 - 1`
    SetCompare(u8),
    /// `TCCR0A = 1 << WGM01`
    SetMode(WaveformMode),
    /// `TCCR0B = 1 << CS00`
    SetPrescaler(Prescaler),
    /// `TIMSK |= 1 << OCIE0A`
    EnableCompareInterrupt,
    /// `sei()`
    EnableInterrupts,
}

/// Initialization in program order. Global interrupts come last.
pub const SETUP: [SetupStep; 11] = [
    SetupStep::DrivePinLow,
    SetupStep::PinAsOutput,
    SetupStep::EnablePinChange,
    SetupStep::WatchLine(WATCHED_LINE),
    SetupStep::DriveLedLow,
    SetupStep::LedAsOutput,
    SetupStep::SetCompare(COMPARE_VALUE),
    SetupStep::SetMode(WaveformMode::Ctc),
    SetupStep::SetPrescaler(Prescaler::Div1),
    SetupStep::EnableCompareInterrupt,
    SetupStep::EnableInterrupts,
];

impl TargetState {
    /// Power-on state: every pin an input, every source disarmed.
    pub fn reset() -> Self {
        Self::default()
    }

    /// State after `main` has run its setup and entered the idle loop.
    pub fn boot() -> Self {
        SETUP.iter().fold(Self::reset(), |state, &step| state.apply(step))
    }

    pub fn apply(self, step: SetupStep) -> Self {
        let mut s = self;
        match step {
            // PORTB is assigned, not or-ed: PB3's bit is cleared too.
            SetupStep::DrivePinLow => {
                s.pin.high = false;
                s.led.high = false;
            }
            // Likewise DDRB.
            SetupStep::PinAsOutput => {
                s.pin.direction = Direction::Output;
                s.led.direction = Direction::Input;
            }
            SetupStep::EnablePinChange => s.pin_change.enabled = true,
            SetupStep::WatchLine(line) => s.pin_change.mask |= 1 << line,
            SetupStep::DriveLedLow => {}
            SetupStep::LedAsOutput => s.led.direction = Direction::Output,
            SetupStep::SetCompare(value) => s.timer.compare = value,
            SetupStep::SetMode(mode) => s.timer.mode = mode,
            SetupStep::SetPrescaler(prescaler) => s.timer.prescaler = prescaler,
            SetupStep::EnableCompareInterrupt => s.timer.compare_interrupt = true,
            SetupStep::EnableInterrupts => s.interrupts_enabled = true,
        }
        s
    }

    /// Whether `event` would be dispatched: global enable and its source enable.
    pub fn accepts(&self, event: Event) -> bool {
        self.interrupts_enabled
            && match event {
                Event::PinChange => self.pin_change.enabled,
                Event::TimerCompareMatch => self.timer.compare_interrupt,
            }
    }

    pub fn ddrb(&self) -> u8 {
        pin_bit(PIN, self.pin.direction == Direction::Output)
            | pin_bit(LED, self.led.direction == Direction::Output)
    }

    pub fn portb(&self) -> u8 {
        pin_bit(PIN, self.pin.high) | pin_bit(LED, self.led.high)
    }

    pub fn gimsk(&self) -> Gimsk {
        if self.pin_change.enabled {
            Gimsk::PCIE
        } else {
            Gimsk::empty()
        }
    }

    pub fn timsk(&self) -> Timsk {
        if self.timer.compare_interrupt {
            Timsk::OCIE0A
        } else {
            Timsk::empty()
        }
    }

    pub fn tccr0a(&self) -> Tccr0a {
        self.timer.mode.bits()
    }

    pub fn tccr0b(&self) -> Tccr0b {
        self.timer.prescaler.bits()
    }

    /// Firmware-owned registers as raw bytes, keyed by name.
    pub fn registers(&self) -> BTreeMap<&'static str, u8> {
        [
            (IoReg::Ddrb, self.ddrb()),
            (IoReg::Portb, self.portb()),
            (IoReg::Gimsk, self.gimsk().bits()),
            (IoReg::Pcmsk, self.pin_change.mask),
            (IoReg::Ocr0a, self.timer.compare),
            (IoReg::Tccr0a, self.tccr0a().bits()),
            (IoReg::Tccr0b, self.tccr0b().bits()),
            (IoReg::Timsk, self.timsk().bits()),
        ]
        .into_iter()
        .map(|(reg, value)| (reg.name(), value))
        .collect()
    }
}

fn pin_bit(pin: u8, set: bool) -> u8 {
    (set as u8) << pin
}

/// Vector into the handler for `event` and run its body. The global enable
/// is cleared on entry, so nothing else is accepted until `reti`.
pub fn enter(state: TargetState, event: Event) -> TargetState {
    let mut s = state;
    s.interrupts_enabled = false;
    match event {
        Event::PinChange => {
            s.mode = Mode::HandlingPinChange;
            s.led.high = true;
        }
        Event::TimerCompareMatch => {
            s.mode = Mode::HandlingTimerMatch;
            s.pin.high = true;
        }
    }
    tracing::trace!("{} handler ran in {:?}", event.name(), s.mode);
    s
}

/// Return from interrupt: back to idle with the global enable set again.
pub fn reti(state: TargetState) -> TargetState {
    TargetState {
        interrupts_enabled: true,
        mode: Mode::Idle,
        ..state
    }
}

/// Run the handler for `event` to completion.
pub fn handle(state: TargetState, event: Event) -> TargetState {
    reti(enter(state, event))
}

/// Deliver `event` if the firmware has it armed; otherwise nothing changes.
pub fn dispatch(state: TargetState, event: Event) -> TargetState {
    if state.accepts(event) {
        handle(state, event)
    } else {
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boot_configuration() {
        let s = TargetState::boot();
        assert_eq!(s.pin, PinConfig { direction: Direction::Output, high: false });
        assert_eq!(s.led, PinConfig { direction: Direction::Output, high: false });
        assert_eq!(s.pin_change, PinChangeConfig { enabled: true, mask: 0b1 });
        assert_eq!(s.timer.compare, 49);
        assert_eq!(s.timer.mode, WaveformMode::Ctc);
        assert_eq!(s.timer.prescaler, Prescaler::Div1);
        assert!(s.timer.compare_interrupt);
        assert!(s.interrupts_enabled);
        assert_eq!(s.mode, Mode::Idle);
    }

    #[test]
    fn test_boot_register_bytes() {
        let regs = TargetState::boot().registers();
        assert_eq!(regs["DDRB"], 0b0000_1001);
        assert_eq!(regs["PORTB"], 0);
        assert_eq!(regs["GIMSK"], 0x20);
        assert_eq!(regs["PCMSK"], 0x01);
        assert_eq!(regs["OCR0A"], 49);
        assert_eq!(regs["TCCR0A"], 0x02);
        assert_eq!(regs["TCCR0B"], 0x01);
        assert_eq!(regs["TIMSK"], 0x10);
    }

    #[test]
    fn test_global_enable_is_last() {
        assert_eq!(SETUP.last(), Some(&SetupStep::EnableInterrupts));
        let mut s = TargetState::reset();
        for step in &SETUP[..SETUP.len() - 1] {
            s = s.apply(*step);
            assert!(!s.interrupts_enabled);
        }
    }

    #[test]
    fn test_events_before_sei_change_nothing() {
        let mut s = TargetState::reset();
        for step in &SETUP[..SETUP.len() - 1] {
            s = s.apply(*step);
            for event in [Event::PinChange, Event::TimerCompareMatch] {
                assert_eq!(dispatch(s, event), s);
            }
        }
    }

    #[test]
    fn test_enabling_interrupts_alone_runs_no_handler() {
        let armed = SETUP[..SETUP.len() - 1]
            .iter()
            .fold(TargetState::reset(), |s, &step| s.apply(step));
        let live = armed.apply(SetupStep::EnableInterrupts);
        assert_eq!(live.portb(), armed.portb());
        assert_eq!(live.mode, Mode::Idle);
    }

    #[test]
    fn test_pin_change_latches_led() {
        let booted = TargetState::boot();
        let once = dispatch(booted, Event::PinChange);
        assert!(once.led.high);
        assert!(!once.pin.high);
        assert_eq!(once.mode, Mode::Idle);

        let twice = dispatch(once, Event::PinChange);
        assert_eq!(twice, once);
    }

    #[test]
    fn test_timer_match_latches_pin() {
        let booted = TargetState::boot();
        let once = dispatch(booted, Event::TimerCompareMatch);
        assert!(once.pin.high);
        assert!(!once.led.high);

        let many = (0..10).fold(once, |s, _| dispatch(s, Event::TimerCompareMatch));
        assert_eq!(many, once);
        assert_eq!(many.portb(), 0b0000_0001);
    }

    #[test]
    fn test_handler_runs_with_interrupts_masked() {
        let booted = TargetState::boot();
        for event in [Event::PinChange, Event::TimerCompareMatch] {
            let inside = enter(booted, event);
            assert!(!inside.interrupts_enabled);
            assert_ne!(inside.mode, Mode::Idle);
            assert!(!inside.accepts(Event::PinChange));
            assert!(!inside.accepts(Event::TimerCompareMatch));
            // Nothing nests while the body runs.
            assert_eq!(dispatch(inside, Event::PinChange), inside);

            let after = reti(inside);
            assert!(after.interrupts_enabled);
            assert_eq!(after.mode, Mode::Idle);
            assert_eq!(after, handle(booted, event));
        }
    }

    #[test]
    fn test_handlers_never_clear_pins() {
        let mut s = TargetState::boot();
        for event in [
            Event::TimerCompareMatch,
            Event::PinChange,
            Event::TimerCompareMatch,
            Event::PinChange,
        ] {
            s = dispatch(s, event);
        }
        assert_eq!(s.portb(), 0b0000_1001);
    }

    #[test]
    fn test_clock_select_bits() {
        assert_eq!(Prescaler::Div1.bits(), Tccr0b::CS00);
        assert_eq!(Prescaler::Div1024.bits(), Tccr0b::CS02 | Tccr0b::CS00);
        assert_eq!(Prescaler::Stopped.bits(), Tccr0b::empty());
        assert_eq!(Prescaler::ExternalRising.divisor(), None);
        assert_eq!(Prescaler::Div64.divisor(), Some(64));
        assert_eq!(WaveformMode::FastPwm.bits(), Tccr0a::WGM01 | Tccr0a::WGM00);
    }

    #[test]
    fn test_vector_priority() {
        assert!(Event::PinChange.vector() < Event::TimerCompareMatch.vector());
    }
}
