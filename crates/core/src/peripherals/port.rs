use crate::{SimResult, SimulationError};
use serde::Serialize;

/// An 8-bit I/O port with externally driven inputs.
///
/// The read-back level of a pin (PINx) follows PORTx when DDRx selects
/// output. An input pin reads its external driver if one is connected,
/// otherwise its pull-up (PORTx bit set) or low.
#[derive(Debug, Clone, Serialize)]
pub struct IoPort {
    letter: char,
    width: u8,
    /// Pins with an external driver connected.
    driven: u8,
    /// Levels of the external drivers.
    external: u8,
}

impl IoPort {
    pub fn new(letter: char, width: u8) -> Self {
        Self {
            letter: letter.to_ascii_uppercase(),
            width,
            driven: 0,
            external: 0,
        }
    }

    pub fn letter(&self) -> char {
        self.letter
    }

    pub fn width(&self) -> u8 {
        self.width
    }

    fn mask(&self) -> u8 {
        ((1u16 << self.width) - 1) as u8
    }

    pub fn check_pin(&self, pin: u8) -> SimResult<()> {
        if pin < self.width {
            Ok(())
        } else {
            Err(SimulationError::PinOutOfRange {
                port: self.letter,
                pin,
            })
        }
    }

    /// Connect an external driver to `pin` at `level`, or disconnect it with `None`.
    pub fn drive(&mut self, pin: u8, level: Option<bool>) -> SimResult<()> {
        self.check_pin(pin)?;
        let bit = 1 << pin;
        match level {
            Some(high) => {
                self.driven |= bit;
                if high {
                    self.external |= bit;
                } else {
                    self.external &= !bit;
                }
            }
            None => {
                self.driven &= !bit;
                self.external &= !bit;
            }
        }
        Ok(())
    }

    /// PINx for the given DDRx and PORTx values.
    pub fn levels(&self, ddr: u8, port: u8) -> u8 {
        let outputs = port & ddr;
        let inputs = !ddr & ((self.external & self.driven) | (port & !self.driven));
        (outputs | inputs) & self.mask()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outputs_read_back_port() {
        let p = IoPort::new('B', 6);
        assert_eq!(p.levels(0b0000_1001, 0b0000_1000), 0b0000_1000);
    }

    #[test]
    fn test_inputs_follow_external_driver_or_pullup() {
        let mut p = IoPort::new('b', 6);
        assert_eq!(p.letter(), 'B');
        assert_eq!(p.levels(0, 0), 0);
        // Pull-up on PB2
        assert_eq!(p.levels(0, 0b100), 0b100);

        p.drive(2, Some(false)).unwrap();
        assert_eq!(p.levels(0, 0b100), 0);
        p.drive(1, Some(true)).unwrap();
        assert_eq!(p.levels(0, 0), 0b010);

        p.drive(2, None).unwrap();
        assert_eq!(p.levels(0, 0b100), 0b110);
    }

    #[test]
    fn test_output_wins_over_external_driver() {
        let mut p = IoPort::new('B', 6);
        p.drive(0, Some(true)).unwrap();
        assert_eq!(p.levels(0b1, 0), 0);
    }

    #[test]
    fn test_pin_range() {
        let mut p = IoPort::new('B', 6);
        assert_eq!(
            p.drive(6, Some(true)),
            Err(SimulationError::PinOutOfRange { port: 'B', pin: 6 })
        );
        assert_eq!(p.levels(0xFF, 0xFF), 0b0011_1111);
    }
}
