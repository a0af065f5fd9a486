pub mod clock;
pub mod harness;
pub mod info;
pub mod machine;
pub mod metrics;
pub mod peripherals;
pub mod snapshot;
pub mod target;
pub mod vcd_trace;


pub use clock::Frequency;
pub use info::InfoLog;
pub use machine::{Machine, PinEvent};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SimulationError {
    #[error("Clock frequency must be a positive number of Hz")]
    InvalidFrequency,
    #[error("Unknown I/O port '{0}'")]
    UnknownPort(char),
    #[error("Pin {pin} out of range for port {port}")]
    PinOutOfRange { port: char, pin: u8 },
    #[error("Unknown watch id {0}")]
    UnknownWatch(usize),
    #[error("Unsupported MCU '{0}'")]
    UnsupportedMcu(String),
}

pub type SimResult<T> = Result<T, SimulationError>;

/// Read-only view of the simulated device's clock.
///
/// The cycle counter is monotonic for the lifetime of a run.
pub trait DeviceClock {
    fn cycle(&self) -> u64;
    fn frequency(&self) -> Frequency;
}

/// Trait for observing simulation events in a modular way.
pub trait SimulationObserver: std::fmt::Debug + Send + Sync {
    fn on_simulation_start(&self) {}
    fn on_simulation_stop(&self) {}
    fn on_cycle_end(&self, _cycle: u64) {}
    fn on_interrupt(&self, _event: target::Event, _cycle: u64) {}
    fn on_pin_change(&self, _event: &PinEvent) {}
}
