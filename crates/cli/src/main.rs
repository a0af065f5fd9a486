use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tinysim_config::{StopCondition, TestScript, Window};
use tinysim_core::harness::{PinButton, PinWatch, StopMode, WatchId};
use tinysim_core::metrics::PerformanceMetrics;
use tinysim_core::target::{Event, LED, PIN};
use tinysim_core::vcd_trace::VcdObserver;
use tinysim_core::{Frequency, Machine};
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about = "TinySim AVR interrupt test harness", long_about = None)]
struct Cli {
    /// Enable per-cycle peripheral and dispatch tracing
    #[arg(short, long, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the pin-interrupt target and print every pin change
    Run {
        /// Target MCU
        #[arg(long, default_value = "attiny85")]
        mcu: String,

        /// Clock frequency in Hz
        #[arg(short, long, default_value = "8000000")]
        frequency: u64,

        /// Number of clock cycles to simulate
        #[arg(short, long, default_value = "1000")]
        cycles: u64,

        /// Press a button at this many microseconds into the run
        #[arg(long, value_name = "US")]
        press_at_us: Option<u64>,

        /// Port B line the button is wired to
        #[arg(long, default_value = "2")]
        button_pin: u8,

        /// Release the button after this many microseconds
        #[arg(long, value_name = "US", default_value = "100")]
        hold_us: u64,

        /// Write a JSON machine snapshot here when the run ends
        #[arg(long)]
        snapshot: Option<PathBuf>,

        /// Dump port B pin waveforms to this VCD file
        #[arg(long)]
        vcd: Option<PathBuf>,
    },
    /// Run a YAML test script
    Test {
        /// Path to the test script
        #[arg(short, long)]
        script: PathBuf,

        /// Directory for result.json
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
enum StopReason {
    Completed,
    ExpectationFailed,
    MaxCycles,
}

#[derive(Serialize, Debug)]
struct TestResult {
    status: &'static str,
    stop_reason: StopReason,
    cycles: u64,
    windows_passed: usize,
    problems: Vec<String>,
    script: String,
    script_sha256: String,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.trace {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Run {
            mcu,
            frequency,
            cycles,
            press_at_us,
            button_pin,
            hold_us,
            snapshot,
            vcd,
        } => {
            let button = press_at_us.map(|at_us| ButtonPress {
                at_us,
                pin: button_pin,
                hold_us,
            });
            run(&mcu, frequency, cycles, button, snapshot.as_deref(), vcd.as_deref())
        }
        Command::Test { script, output_dir } => {
            let passed = test(&script, output_dir.as_deref())?;
            if !passed {
                std::process::exit(1);
            }
            Ok(())
        }
    }
}

/// A button on port B pressed once during `tinysim run`.
#[derive(Debug, Clone, Copy)]
struct ButtonPress {
    at_us: u64,
    pin: u8,
    hold_us: u64,
}

fn run(
    mcu: &str,
    frequency: u64,
    cycles: u64,
    button: Option<ButtonPress>,
    snapshot: Option<&Path>,
    vcd: Option<&Path>,
) -> anyhow::Result<()> {
    info!("Starting TinySim");
    let frequency = Frequency::new(frequency)?;
    let mut machine = Machine::for_mcu(mcu, frequency)?;
    let metrics = Arc::new(PerformanceMetrics::new());
    machine.add_observer(metrics.clone());
    let width = machine.port_b.width();

    if let Some(path) = vcd {
        let mut trace = VcdObserver::create(path, frequency)
            .with_context(|| format!("Failed to create VCD file {:?}", path))?;
        for pin in 0..width {
            trace.add_ioport_signal('B', pin, &format!("PB{}", pin))?;
        }
        trace.start(&machine)?;
        machine.add_observer(Arc::new(trace));
        info!("Tracing port B to {:?}", path);
    }

    // Connected up front so a bad line is rejected before the run starts.
    let pressed = match button {
        Some(press) => Some((
            press,
            PinButton::connect(&mut machine, 'B', press.pin, false)?,
        )),
        None => None,
    };

    let mut watch = PinWatch::new(machine);
    for pin in 0..width {
        let name = match pin {
            PIN => Some("PIN"),
            LED => Some("LED"),
            _ => None,
        };
        watch.register_ioport('B', pin, name, true, true)?;
    }

    info!("Running {} for {} cycles at {}", mcu, cycles, frequency);
    match pressed {
        Some((press, button)) => {
            let at = frequency.usec_to_cycles(press.at_us).min(cycles);
            watch.debug_for_cycles(at);
            info!("Pressing button on PB{} at cycle {}", press.pin, at);
            button.press(watch.machine_mut(), Some(press.hold_us))?;
            watch.debug_for_cycles(cycles - at);
        }
        None => watch.debug_for_cycles(cycles),
    }

    let machine = watch.machine();
    machine.finish();
    info!(
        "Finished at cycle {}: {} pin changes, {} PCINT0 and {} TIMER0_COMPA dispatches ({:.0} cycles/s)",
        machine.cycle(),
        metrics.get_pin_changes(),
        metrics.get_dispatches(Event::PinChange),
        metrics.get_dispatches(Event::TimerCompareMatch),
        metrics.get_cps()
    );

    if let Some(path) = snapshot {
        let json = machine.snapshot().to_json()?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write snapshot to {:?}", path))?;
        info!("Snapshot written to {:?}", path);
    }

    Ok(())
}

fn test(script_path: &Path, output_dir: Option<&Path>) -> anyhow::Result<bool> {
    let script = TestScript::from_file(script_path)?;
    let script_bytes = std::fs::read(script_path)
        .with_context(|| format!("Failed to read {:?}", script_path))?;
    let script_sha256 = format!("{:x}", Sha256::digest(&script_bytes));

    let frequency = Frequency::new(script.inputs.frequency)?;
    let machine = Machine::for_mcu(&script.inputs.mcu, frequency)?;
    let mut watch = PinWatch::new(machine);

    let mut ids: Vec<(String, WatchId)> = Vec::new();
    for w in &script.watches {
        let id = watch.register_ioport(w.port, w.pin, Some(w.name.as_str()), w.display, w.display_only)?;
        ids.push((w.name.clone(), id));
    }
    let lookup = |name: &str| {
        ids.iter()
            .find(|(n, _)| n == name)
            .map(|&(_, id)| id)
            .with_context(|| format!("Unknown watch '{}'", name))
    };

    let mut stop_reason = StopReason::Completed;
    let mut problems = Vec::new();
    let mut windows_passed = 0;

    for (idx, expectation) in script.expectations.iter().enumerate() {
        let window = expectation.window()?;
        let cycles = match window {
            Window::Cycles(c) => c,
            Window::Micros(us) => frequency.usec_to_cycles(us),
            Window::Millis(ms) => frequency.usec_to_cycles(ms.saturating_mul(1000)),
        };
        if watch.machine().cycle().saturating_add(cycles) > script.limits.max_cycles {
            stop_reason = StopReason::MaxCycles;
            problems.push(format!(
                "Window {} would exceed max_cycles ({})",
                idx, script.limits.max_cycles
            ));
            break;
        }

        let expected = expectation
            .events
            .iter()
            .map(|e| Ok((lookup(&e.watch)?, e.value != 0)))
            .collect::<anyhow::Result<Vec<_>>>()?;
        let stop = match expectation.stop {
            StopCondition::Never => StopMode::Never,
            StopCondition::OnFirst => StopMode::OnFirst,
            StopCondition::WhenAll => StopMode::WhenAll,
        };

        match watch.expect_for_cycles(cycles, stop, &expected) {
            Ok(()) => windows_passed += 1,
            Err(e) => {
                stop_reason = StopReason::ExpectationFailed;
                problems = e.problems;
                break;
            }
        }
    }

    let passed = stop_reason == StopReason::Completed;
    for problem in &problems {
        eprintln!("FAIL: {}", problem);
    }
    info!(
        "Test {} after {} cycles ({} of {} windows passed)",
        if passed { "passed" } else { "failed" },
        watch.machine().cycle(),
        windows_passed,
        script.expectations.len()
    );

    if let Some(dir) = output_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create output directory {:?}", dir))?;
        let result = TestResult {
            status: if passed { "pass" } else { "fail" },
            stop_reason,
            cycles: watch.machine().cycle(),
            windows_passed,
            problems,
            script: script_path.display().to_string(),
            script_sha256,
        };
        let path = dir.join("result.json");
        std::fs::write(&path, serde_json::to_string_pretty(&result)?)
            .with_context(|| format!("Failed to write {:?}", path))?;
    }

    Ok(passed)
}
