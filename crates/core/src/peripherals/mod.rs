pub mod pcint;
pub mod port;
pub mod timer0;
