//! Value change dump of I/O port pins.
//!
//! Signals are declared with `add_ioport_signal` before `start`; once
//! attached to a machine the observer writes every pin change at the
//! simulated time of its cycle, in nanoseconds.

use crate::clock::Frequency;
use crate::machine::{Machine, PinEvent};
use crate::SimulationObserver;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::{Mutex, PoisonError};
use vcd::{IdCode, TimescaleUnit, Value, Writer};

struct Signal {
    port: char,
    pin: u8,
    id: IdCode,
}

struct VcdState<W: Write> {
    writer: Writer<W>,
    signals: Vec<Signal>,
    started: bool,
    /// Last timestamp written, in ns.
    time: u64,
}

pub struct VcdObserver<W: Write + Send = BufWriter<File>> {
    frequency: Frequency,
    state: Mutex<VcdState<W>>,
}

impl VcdObserver<BufWriter<File>> {
    pub fn create<P: AsRef<Path>>(path: P, frequency: Frequency) -> io::Result<Self> {
        let file = File::create(path)?;
        Self::new(BufWriter::new(file), frequency)
    }
}

impl<W: Write + Send> VcdObserver<W> {
    pub fn new(out: W, frequency: Frequency) -> io::Result<Self> {
        let mut writer = Writer::new(out);
        writer.timescale(1, TimescaleUnit::NS)?;
        writer.add_module("logic")?;

        Ok(Self {
            frequency,
            state: Mutex::new(VcdState {
                writer,
                signals: Vec::new(),
                started: false,
                time: 0,
            }),
        })
    }

    fn state_mut(&mut self) -> &mut VcdState<W> {
        self.state.get_mut().unwrap_or_else(PoisonError::into_inner)
    }

    /// Declare a one-bit wire following pin `pin` of port `port`.
    pub fn add_ioport_signal(&mut self, port: char, pin: u8, name: &str) -> io::Result<()> {
        let state = self.state_mut();
        if state.started {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("Cannot add signal '{}' after the dump started", name),
            ));
        }
        let id = state.writer.add_wire(1, name)?;
        state.signals.push(Signal {
            port: port.to_ascii_uppercase(),
            pin,
            id,
        });
        Ok(())
    }

    /// Close the header and dump the machine's current pin levels.
    pub fn start(&mut self, machine: &Machine) -> io::Result<()> {
        let time = self.frequency.cycles_to_nanos(machine.cycle());
        let state = self.state_mut();
        if state.started {
            return Ok(());
        }
        state.writer.upscope()?;
        state.writer.enddefinitions()?;
        state.writer.timestamp(time)?;

        for signal in &state.signals {
            let value = if signal.port == machine.port_b.letter() {
                match machine.pin_level(signal.pin) {
                    Ok(level) => level_value(level),
                    Err(_) => Value::X,
                }
            } else {
                Value::X
            };
            state.writer.change_scalar(signal.id, value)?;
        }
        state.started = true;
        state.time = time;
        Ok(())
    }

    pub fn stop(&self) -> io::Result<()> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.writer.writer().flush()
    }

    fn record(&self, event: &PinEvent) -> io::Result<()> {
        let time = self.frequency.cycles_to_nanos(event.cycle);
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if !state.started {
            return Ok(());
        }

        let state = &mut *state;
        for signal in &state.signals {
            if signal.port != event.port || signal.pin != event.pin {
                continue;
            }
            if time > state.time {
                state.writer.timestamp(time)?;
                state.time = time;
            }
            state.writer.change_scalar(signal.id, level_value(event.value))?;
        }
        Ok(())
    }
}

fn level_value(level: bool) -> Value {
    if level {
        Value::V1
    } else {
        Value::V0
    }
}

impl<W: Write + Send> std::fmt::Debug for VcdObserver<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VcdObserver")
            .field("frequency", &self.frequency)
            .finish_non_exhaustive()
    }
}

impl<W: Write + Send> SimulationObserver for VcdObserver<W> {
    fn on_simulation_stop(&self) {
        if let Err(e) = self.stop() {
            tracing::warn!("Failed to flush VCD trace: {}", e);
        }
    }

    fn on_pin_change(&self, event: &PinEvent) {
        if let Err(e) = self.record(event) {
            tracing::warn!("Failed to write VCD change for {}{}: {}", event.port, event.pin, e);
        }
    }
}
