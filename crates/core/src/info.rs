//! Timestamped diagnostics.
//!
//! Every line is prefixed with the number of cycles elapsed since the
//! previous line of the same session, and that span converted to wall time
//! at the device's clock rate:
//!
//! ```text
//! +50 (0 ms, 6 us, 250 ns): <IRQ PIN> changed to 1
//! ```

use crate::clock::Elapsed;
use crate::DeviceClock;
use std::fmt::{self, Write as _};
use std::io::{self, Stdout, Write};

/// Upper bound, in bytes, on a single emitted line including its newline.
pub const LINE_CAPACITY: usize = 2048;

/// Write a timestamped line to an [`InfoLog`], `format!`-style.
///
/// ```
/// use tinysim_core::{sim_info, InfoLog, Machine};
///
/// let machine = Machine::default();
/// let mut log = InfoLog::new(Vec::new());
/// sim_info!(log, &machine, "booted at {}", machine.frequency()).unwrap();
/// ```
#[macro_export]
macro_rules! sim_info {
    ($log:expr, $device:expr, $($arg:tt)*) => {
        $log.log($device, ::std::format_args!($($arg)*))
    };
}

/// A logging session.
///
/// Holds the cycle count seen by the previous call, starting at zero, so the
/// first line reports the absolute cycle count. A session belongs to one
/// simulation run; independent runs use independent sessions.
#[derive(Debug)]
pub struct InfoLog<W: Write = Stdout> {
    out: W,
    last_cycles: u64,
}

impl InfoLog<Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl Default for InfoLog<Stdout> {
    fn default() -> Self {
        Self::stdout()
    }
}

impl<W: Write> InfoLog<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            last_cycles: 0,
        }
    }

    pub fn last_cycles(&self) -> u64 {
        self.last_cycles
    }

    pub fn get_ref(&self) -> &W {
        &self.out
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    /// Emit one line for `args` and flush.
    ///
    /// Lines longer than [`LINE_CAPACITY`] are cut short; the newline is
    /// always kept.
    pub fn log(&mut self, device: &impl DeviceClock, args: fmt::Arguments<'_>) -> io::Result<Elapsed> {
        let cycle = device.cycle();
        if cycle < self.last_cycles {
            tracing::warn!(
                "Cycle counter went backwards ({} -> {}), reporting zero delta",
                self.last_cycles,
                cycle
            );
        }
        let elapsed = Elapsed::new(cycle.saturating_sub(self.last_cycles), device.frequency());
        self.last_cycles = cycle;

        let mut line = LineBuffer::new();
        // LineBuffer never reports an error; overflow is dropped.
        let _ = write!(line, "{}: {}", elapsed, args);

        self.out.write_all(line.finish())?;
        self.out.flush()?;
        Ok(elapsed)
    }
}

/// Fixed-capacity line assembly. Input past the bound is discarded at a
/// character boundary; one byte is reserved for the terminating newline.
struct LineBuffer {
    buf: [u8; LINE_CAPACITY],
    len: usize,
}

impl LineBuffer {
    fn new() -> Self {
        Self {
            buf: [0; LINE_CAPACITY],
            len: 0,
        }
    }

    fn finish(&mut self) -> &[u8] {
        self.buf[self.len] = b'\n';
        &self.buf[..=self.len]
    }
}

impl fmt::Write for LineBuffer {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let room = LINE_CAPACITY - 1 - self.len;
        let mut take = s.len().min(room);
        while !s.is_char_boundary(take) {
            take -= 1;
        }
        self.buf[self.len..self.len + take].copy_from_slice(&s.as_bytes()[..take]);
        self.len += take;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Frequency;

    struct Device {
        cycle: u64,
        hz: u64,
    }

    impl DeviceClock for Device {
        fn cycle(&self) -> u64 {
            self.cycle
        }

        fn frequency(&self) -> Frequency {
            Frequency::new(self.hz).unwrap()
        }
    }

    fn output(log: &InfoLog<Vec<u8>>) -> String {
        String::from_utf8(log.get_ref().clone()).unwrap()
    }

    #[test]
    fn test_first_call_reports_absolute_cycles() {
        let mut log = InfoLog::new(Vec::new());
        let dev = Device { cycle: 500, hz: 1_000_000_000 };
        let e = sim_info!(log, &dev, "hello").unwrap();

        assert_eq!(e.cycles, 500);
        assert_eq!(e.nanos, 500);
        assert_eq!(e.micros(), 0);
        assert_eq!(e.millis(), 0);
        assert_eq!(output(&log), "+500 (0 ms, 0 us, 500 ns): hello\n");
        assert_eq!(log.last_cycles(), 500);
    }

    #[test]
    fn test_same_cycle_twice_reports_zero() {
        let mut log = InfoLog::new(Vec::new());
        let dev = Device { cycle: 12_345, hz: 8_000_000 };
        sim_info!(log, &dev, "a").unwrap();
        let e = sim_info!(log, &dev, "b").unwrap();

        assert_eq!(e, Elapsed::default());
        assert!(output(&log).ends_with("+0 (0 ms, 0 us, 0 ns): b\n"));
    }

    #[test]
    fn test_deltas_telescope() {
        let mut log = InfoLog::new(Vec::new());
        let cycles = [3_u64, 3, 17, 1_000, 1_001, 80_000_000];
        let deltas: Vec<u64> = cycles
            .iter()
            .map(|&cycle| {
                let dev = Device { cycle, hz: 8_000_000 };
                sim_info!(log, &dev, "tick").unwrap().cycles
            })
            .collect();

        // The session baseline is zero, so the first delta is the first count.
        assert_eq!(deltas[0], 3);
        assert_eq!(deltas[1..].iter().sum::<u64>(), 80_000_000 - 3);
    }

    #[test]
    fn test_wall_time_split_at_8mhz() {
        let mut log = InfoLog::new(Vec::new());
        sim_info!(log, &Device { cycle: 50, hz: 8_000_000 }, "<IRQ {}> changed to {}", "PIN", 1).unwrap();
        sim_info!(log, &Device { cycle: 8_000_051, hz: 8_000_000 }, "{:>5.2}|{:04x}", 1.5, 255).unwrap();

        let out = output(&log);
        let lines: Vec<_> = out.lines().collect();
        assert_eq!(lines[0], "+50 (0 ms, 6 us, 250 ns): <IRQ PIN> changed to 1");
        assert_eq!(lines[1], "+8000001 (1000 ms, 0 us, 125 ns):  1.50|00ff");
    }

    #[test]
    fn test_overlong_message_truncated_at_capacity() {
        let mut log = InfoLog::new(Vec::new());
        let dev = Device { cycle: 1, hz: 1_000_000_000 };
        let msg = "x".repeat(3 * LINE_CAPACITY);
        sim_info!(log, &dev, "{}", msg).unwrap();

        let untruncated = format!("+1 (0 ms, 0 us, 1 ns): {}", msg);
        let out = log.into_inner();
        assert_eq!(out.len(), LINE_CAPACITY);
        assert_eq!(out[LINE_CAPACITY - 1], b'\n');
        assert_eq!(&out[..LINE_CAPACITY - 1], &untruncated.as_bytes()[..LINE_CAPACITY - 1]);
    }

    #[test]
    fn test_truncation_keeps_utf8_intact() {
        let mut log = InfoLog::new(Vec::new());
        let dev = Device { cycle: 0, hz: 1 };
        sim_info!(log, &dev, "{}", "é".repeat(LINE_CAPACITY)).unwrap();

        let out = String::from_utf8(log.into_inner()).expect("valid utf-8");
        assert!(out.len() <= LINE_CAPACITY);
        assert!(out.ends_with("é\n"));
    }

    #[test]
    fn test_sessions_are_independent() {
        let mut a = InfoLog::new(Vec::new());
        let mut b = InfoLog::new(Vec::new());
        sim_info!(a, &Device { cycle: 100, hz: 1_000 }, "a").unwrap();
        let e = sim_info!(b, &Device { cycle: 40, hz: 1_000 }, "b").unwrap();
        assert_eq!(e.cycles, 40);
        assert_eq!(a.last_cycles(), 100);
    }
}
