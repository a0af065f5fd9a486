use crate::machine::Machine;
use crate::target::{IoReg, Mode, TargetState};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Serialize, Debug, Clone)]
pub struct MachineSnapshot {
    pub mcu: &'static str,
    pub cycle: u64,
    pub frequency_hz: u64,
    pub mode: Mode,
    pub registers: BTreeMap<&'static str, u8>,
    pub firmware: TargetState,
    pub pending: PendingSnapshot,
}

#[derive(Serialize, Debug, Clone, Copy)]
pub struct PendingSnapshot {
    pub pcif: bool,
    pub ocf0a: bool,
}

impl MachineSnapshot {
    pub fn capture(machine: &Machine) -> Self {
        let mut registers = machine.state.registers();
        registers.insert(IoReg::Pinb.name(), machine.pin_levels());
        registers.insert(IoReg::Tcnt0.name(), machine.timer0.counter());
        // OCF0A is bit 4 of TIFR, PCIF bit 5 of GIFR.
        registers.insert(IoReg::Tifr.name(), (machine.timer0.compare_flag() as u8) << 4);
        registers.insert(IoReg::Gifr.name(), (machine.pin_change.flag() as u8) << 5);

        Self {
            mcu: crate::machine::SUPPORTED_MCU,
            cycle: machine.cycle(),
            frequency_hz: machine.frequency().hz(),
            mode: machine.state.mode,
            registers,
            firmware: machine.state,
            pending: PendingSnapshot {
                pcif: machine.pin_change.flag(),
                ocf0a: machine.timer0.compare_flag(),
            },
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
