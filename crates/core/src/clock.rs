use crate::{SimResult, SimulationError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroU64;

/// Clock used when a run does not specify one (ATtiny85 internal RC oscillator).
pub const DEFAULT_FREQUENCY_HZ: u64 = 8_000_000;

const NANOS_PER_SEC: u128 = 1_000_000_000;
const MICROS_PER_SEC: u128 = 1_000_000;

/// Device clock rate in cycles per second. Never zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub struct Frequency(NonZeroU64);

impl Frequency {
    pub fn new(hz: u64) -> SimResult<Self> {
        NonZeroU64::new(hz)
            .map(Self)
            .ok_or(SimulationError::InvalidFrequency)
    }

    pub const fn hz(self) -> u64 {
        self.0.get()
    }

    /// Number of machine cycles elapsed in `usecs` microseconds.
    pub fn usec_to_cycles(self, usecs: u64) -> u64 {
        saturate(usecs as u128 * self.hz() as u128 / MICROS_PER_SEC)
    }

    /// Microseconds taken by `cycles` machine cycles, truncated.
    pub fn cycles_to_usec(self, cycles: u64) -> u64 {
        saturate(cycles as u128 * MICROS_PER_SEC / self.hz() as u128)
    }

    /// Cycles in one period of a signal running at `rate`.
    pub fn hz_to_cycles(self, rate: Frequency) -> u64 {
        self.hz() / rate.hz()
    }

    /// Nanoseconds taken by `cycles` machine cycles, truncated toward zero.
    pub fn cycles_to_nanos(self, cycles: u64) -> u64 {
        saturate(cycles as u128 * NANOS_PER_SEC / self.hz() as u128)
    }
}

impl Default for Frequency {
    fn default() -> Self {
        const DEFAULT: NonZeroU64 = match NonZeroU64::new(DEFAULT_FREQUENCY_HZ) {
            Some(hz) => hz,
            None => panic!("default frequency is zero"),
        };
        Self(DEFAULT)
    }
}

impl TryFrom<u64> for Frequency {
    type Error = SimulationError;

    fn try_from(hz: u64) -> SimResult<Self> {
        Self::new(hz)
    }
}

impl From<Frequency> for u64 {
    fn from(freq: Frequency) -> u64 {
        freq.hz()
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} Hz", self.hz())
    }
}

fn saturate(value: u128) -> u64 {
    u64::try_from(value).unwrap_or(u64::MAX)
}

/// Wall time covered by a span of cycles, split the way diagnostics print it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Elapsed {
    pub cycles: u64,
    pub nanos: u64,
}

impl Elapsed {
    pub fn new(cycles: u64, frequency: Frequency) -> Self {
        Self {
            cycles,
            nanos: frequency.cycles_to_nanos(cycles),
        }
    }

    pub fn micros(&self) -> u64 {
        self.nanos / 1000
    }

    pub fn millis(&self) -> u64 {
        self.micros() / 1000
    }
}

impl fmt::Display for Elapsed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "+{} ({} ms, {} us, {} ns)",
            self.cycles,
            self.millis(),
            self.micros() % 1000,
            self.nanos % 1000
        )
    }
}
