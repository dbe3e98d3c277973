//! etchcore — grbl-style motion-control core for a 2-axis CNC engraver.
//!
//! The crate turns a stream of G-code bytes into timed step pulses:
//!
//! ```text
//! bytes → protocol → lines → gcode (modal) → planner blocks → stepper → pulses
//!                            └ arcs expand to chord segments ┘
//! supervisor gates everything; real-time bytes bypass line assembly
//! ```
//!
//! Hardware and machine geometry stay outside the core behind the
//! [`hal::Hal`] and [`kinematics::Kinematics`] traits, so the same state
//! machines run on a board or inside the bundled `etchsim` simulator.

pub mod config;
pub mod error;
pub mod gcode;
pub mod hal;
pub mod kinematics;
pub mod planner;
pub mod protocol;
pub mod stepper;
pub mod supervisor;

pub use config::MachineConfig;
pub use gcode::GcodeError;
pub use supervisor::{AlarmKind, MachineState, Supervisor};

#[cfg(test)]
mod tests {
    /// Verify that serde serialisation round-trips a simple value.
    #[test]
    fn serde_round_trip() {
        let original = serde_json::json!({ "name": "etchcore", "version": 1 });
        let serialised = serde_json::to_string(&original).expect("serialise");
        let recovered: serde_json::Value =
            serde_json::from_str(&serialised).expect("deserialise");
        assert_eq!(original, recovered);
    }
}
