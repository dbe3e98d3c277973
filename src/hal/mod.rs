//! Hardware abstraction seam.
//!
//! The core drives pins, the spindle, and the serial port only through the
//! [`Hal`] trait, so the same state machines run against real GPIO on a
//! board or against [`SimHal`] on a desktop. Time comes exclusively from
//! [`Hal::millis`] / [`Hal::micros`]; the core never reads a wall clock.

mod sim;

pub use sim::SimHal;

use serde::Serialize;

/// Spindle rotation state. `Off` ignores the commanded RPM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SpindleState {
    Off,
    Cw,
    Ccw,
}

/// Hardware contract: time, stepper pins, spindle, coolant, safety inputs,
/// and the host serial channel.
///
/// Implementations must make `step_pulse` latch the pulse line high and
/// `step_clear` drop every pulse line; the stepper engine inserts the
/// pulse-width delay between the two.
pub trait Hal {
    /// Milliseconds since power-up.
    fn millis(&self) -> u64;
    /// Microseconds since power-up.
    fn micros(&self) -> u64;
    /// Busy-wait for `us` microseconds.
    fn delay_us(&mut self, us: u32);
    /// Busy-wait for `ms` milliseconds.
    fn delay_ms(&mut self, ms: u32);

    /// Assert or release the shared stepper-driver enable line.
    fn stepper_enable(&mut self, enabled: bool);
    /// Set the direction pin for one joint; `positive` = away from home.
    fn set_direction(&mut self, axis: usize, positive: bool);
    /// Latch the step line for one joint high.
    fn step_pulse(&mut self, axis: usize);
    /// Drop all step lines.
    fn step_clear(&mut self);

    /// Command the spindle driver. `rpm` is ignored when `state` is `Off`.
    fn spindle_set(&mut self, state: SpindleState, rpm: f64);
    /// Switch the coolant output.
    fn coolant_set(&mut self, on: bool);

    /// X limit switch, active `true`.
    fn limit_x(&self) -> bool;
    /// Y limit switch, active `true`.
    fn limit_y(&self) -> bool;
    /// Z limit switch, active `true`.
    fn limit_z(&self) -> bool;
    /// Emergency-stop input, active `true`.
    fn estop(&self) -> bool;

    /// Write raw bytes to the host serial channel.
    fn serial_write(&mut self, bytes: &[u8]);
}
