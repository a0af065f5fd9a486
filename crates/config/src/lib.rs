use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

pub const SCHEMA_VERSION: &str = "1.0";

/// Device the scripts run against, and the I/O lines it exposes (PB0..PB5).
pub const SUPPORTED_MCU: &str = "attiny85";
pub const WATCH_PORT: char = 'B';
pub const WATCH_PORT_WIDTH: u8 = 6;

fn default_mcu() -> String {
    SUPPORTED_MCU.to_string()
}

fn default_frequency() -> u64 {
    8_000_000
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct TestInputs {
    #[serde(default = "default_mcu")]
    pub mcu: String,
    /// Clock rate in Hz.
    #[serde(default = "default_frequency")]
    pub frequency: u64,
}

impl Default for TestInputs {
    fn default() -> Self {
        Self {
            mcu: default_mcu(),
            frequency: default_frequency(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct TestLimits {
    pub max_cycles: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct WatchConfig {
    pub name: String,
    /// Port letter, e.g. "B".
    pub port: char,
    pub pin: u8,
    #[serde(default = "default_true")]
    pub display: bool,
    #[serde(default)]
    pub display_only: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum StopCondition {
    #[default]
    Never,
    OnFirst,
    WhenAll,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ExpectedEvent {
    pub watch: String,
    pub value: u8,
}

/// One expectation window. Exactly one of `cycles`, `us`, `ms` is set.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct Expectation {
    #[serde(default)]
    pub cycles: Option<u64>,
    #[serde(default)]
    pub us: Option<u64>,
    #[serde(default)]
    pub ms: Option<u64>,
    #[serde(default)]
    pub stop: StopCondition,
    #[serde(default)]
    pub events: Vec<ExpectedEvent>,
}

/// Length of an expectation window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Window {
    Cycles(u64),
    Micros(u64),
    Millis(u64),
}

impl Expectation {
    pub fn window(&self) -> Result<Window, ScriptError> {
        match (self.cycles, self.us, self.ms) {
            (Some(c), None, None) => Ok(Window::Cycles(c)),
            (None, Some(us), None) => Ok(Window::Micros(us)),
            (None, None, Some(ms)) => Ok(Window::Millis(ms)),
            _ => Err(ScriptError::AmbiguousWindow),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScriptError {
    #[error("Unsupported schema_version '{0}'. Supported versions: '1.0'")]
    UnsupportedVersion(String),
    #[error("Unsupported MCU '{0}'. Supported: 'attiny85'")]
    UnsupportedMcu(String),
    #[error("Input 'frequency' must be greater than zero")]
    ZeroFrequency,
    #[error("Limit 'max_cycles' must be greater than zero")]
    ZeroMaxCycles,
    #[error("Watch '{name}' has invalid pin {port}{pin}. Available: PB0..PB5")]
    InvalidPin { name: String, port: char, pin: u8 },
    #[error("Duplicate watch name '{0}'")]
    DuplicateWatch(String),
    #[error("Expectation must set exactly one of 'cycles', 'us' or 'ms'")]
    AmbiguousWindow,
    #[error("Expectation references unknown watch '{0}'")]
    UnknownWatch(String),
    #[error("Expected value for '{watch}' must be 0 or 1, got {value}")]
    InvalidValue { watch: String, value: u8 },
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct TestScript {
    pub schema_version: String,
    #[serde(default)]
    pub inputs: TestInputs,
    pub limits: TestLimits,
    #[serde(default)]
    pub watches: Vec<WatchConfig>,
    #[serde(default)]
    pub expectations: Vec<Expectation>,
}

impl TestScript {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let f = std::fs::File::open(&path)
            .with_context(|| format!("Failed to open test script at {:?}", path.as_ref()))?;
        let script: Self =
            serde_yaml::from_reader(f).context("Failed to parse Test Script YAML")?;
        script.validate()?;
        Ok(script)
    }

    pub fn validate(&self) -> Result<(), ScriptError> {
        if self.schema_version != SCHEMA_VERSION {
            return Err(ScriptError::UnsupportedVersion(self.schema_version.clone()));
        }
        if !self.inputs.mcu.eq_ignore_ascii_case(SUPPORTED_MCU) {
            return Err(ScriptError::UnsupportedMcu(self.inputs.mcu.clone()));
        }
        if self.inputs.frequency == 0 {
            return Err(ScriptError::ZeroFrequency);
        }
        if self.limits.max_cycles == 0 {
            return Err(ScriptError::ZeroMaxCycles);
        }

        let mut names = HashSet::new();
        for watch in &self.watches {
            if !watch.port.eq_ignore_ascii_case(&WATCH_PORT) || watch.pin >= WATCH_PORT_WIDTH {
                return Err(ScriptError::InvalidPin {
                    name: watch.name.clone(),
                    port: watch.port,
                    pin: watch.pin,
                });
            }
            if !names.insert(watch.name.as_str()) {
                return Err(ScriptError::DuplicateWatch(watch.name.clone()));
            }
        }

        for expectation in &self.expectations {
            expectation.window()?;
            for event in &expectation.events {
                if !names.contains(event.watch.as_str()) {
                    return Err(ScriptError::UnknownWatch(event.watch.clone()));
                }
                if event.value > 1 {
                    return Err(ScriptError::InvalidValue {
                        watch: event.watch.clone(),
                        value: event.value,
                    });
                }
            }
        }

        Ok(())
    }
}
