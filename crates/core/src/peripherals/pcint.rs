use serde::Serialize;

/// Pin change interrupt unit.
///
/// Compares each sample of PINx against the previous one; any change on a
/// line selected in PCMSK latches GIFR.PCIF until the vector is taken.
#[derive(Debug, Default, Clone, Serialize)]
pub struct PinChangeUnit {
    last: u8,
    pcif: bool,
}

impl PinChangeUnit {
    pub fn new(levels: u8) -> Self {
        Self {
            last: levels,
            pcif: false,
        }
    }

    /// GIFR.PCIF
    pub fn flag(&self) -> bool {
        self.pcif
    }

    pub fn clear_flag(&mut self) {
        self.pcif = false;
    }

    /// Take a new sample. Returns the masked lines that changed.
    pub fn sample(&mut self, levels: u8, mask: u8) -> u8 {
        let changed = (levels ^ self.last) & mask;
        self.last = levels;
        if changed != 0 {
            self.pcif = true;
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_masked_edges_latch_flag() {
        let mut u = PinChangeUnit::new(0);
        assert_eq!(u.sample(0b1000, 0b0001), 0);
        assert!(!u.flag());

        assert_eq!(u.sample(0b1001, 0b0001), 0b0001);
        assert!(u.flag());

        // Flag stays latched until cleared
        assert_eq!(u.sample(0b1001, 0b0001), 0);
        assert!(u.flag());
        u.clear_flag();
        assert!(!u.flag());
    }

    #[test]
    fn test_both_edges_trigger() {
        let mut u = PinChangeUnit::new(0b1);
        assert_eq!(u.sample(0, 0b1), 0b1);
        u.clear_flag();
        assert_eq!(u.sample(0b1, 0b1), 0b1);
    }

    #[test]
    fn test_steady_levels_never_trigger() {
        let mut u = PinChangeUnit::new(0b0110);
        for _ in 0..10 {
            assert_eq!(u.sample(0b0110, 0xFF), 0);
        }
        assert!(!u.flag());
    }
}
