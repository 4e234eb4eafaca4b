//! CSMA/CA channel simulation library
//!
//! A tick-driven model of stations sharing one radio channel, including the
//! hidden-terminal problem and virtual carrier sense.

pub mod simulation;
