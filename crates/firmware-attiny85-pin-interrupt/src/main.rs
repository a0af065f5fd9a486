#![no_std]
#![no_main]
#![feature(abi_avr_interrupt)]

use avr_device::attiny85::{Peripherals, PORTB};
use panic_halt as _;

// PORTB / DDRB bits
const PIN: u8 = 1 << 0;
const LED: u8 = 1 << 3;

// GIMSK.PCIE, PCMSK.PCINT0
const PCIE: u8 = 1 << 5;
const PCINT0: u8 = 1 << 0;

// TCCR0A.WGM01 (CTC), TCCR0B.CS00 (clk/1), TIMSK.OCIE0A
const WGM01: u8 = 1 << 1;
const CS00: u8 = 1 << 0;
const OCIE0A: u8 = 1 << 4;

/// Match every 50 timer ticks.
const COMPARE: u8 = 50 - 1;

fn latch_high(mask: u8) {
    // Handlers own PORTB while they run; interrupts do not nest.
    let portb = unsafe { &*PORTB::ptr() };
    portb.portb.modify(|r, w| unsafe { w.bits(r.bits() | mask) });
}

#[avr_device::interrupt(attiny85)]
fn PCINT0() {
    latch_high(LED);
}

#[avr_device::interrupt(attiny85)]
fn TIMER0_COMPA() {
    latch_high(PIN);
}

#[avr_device::entry]
fn main() -> ! {
    let dp = Peripherals::take().unwrap();

    // PB0 "PIN": output, low. Watched by the pin-change unit.
    dp.PORTB.portb.write(|w| unsafe { w.bits(0) });
    dp.PORTB.ddrb.write(|w| unsafe { w.bits(PIN) });
    dp.EXINT.gimsk.modify(|r, w| unsafe { w.bits(r.bits() | PCIE) });
    dp.EXINT.pcmsk.modify(|r, w| unsafe { w.bits(r.bits() | PCINT0) });

    // PB3 "LED": output, low.
    dp.PORTB.ddrb.modify(|r, w| unsafe { w.bits(r.bits() | LED) });

    dp.TC0.ocr0a.write(|w| unsafe { w.bits(COMPARE) });
    dp.TC0.tccr0a.write(|w| unsafe { w.bits(WGM01) });
    dp.TC0.tccr0b.write(|w| unsafe { w.bits(CS00) });
    dp.TC0.timsk.modify(|r, w| unsafe { w.bits(r.bits() | OCIE0A) });

    // Every source is armed; only now accept interrupts.
    unsafe { avr_device::interrupt::enable() };

    loop {}
}
