//! Motion planning data model.
//!
//! A [`PlannerBlock`] is one straight-line segment in machine units with
//! its kinematic envelope. Blocks are produced by the executor (one per
//! waypoint from the kinematics adapter, one per arc chord) and consumed
//! by the stepper. The queue is an index-addressed ring — blocks own no
//! links to each other, and look-ahead walks the ring by offset.

mod lookahead;
mod queue;

pub use lookahead::recalculate;
pub use queue::BlockQueue;

use crate::kinematics::AXIS_COUNT;

/// One linear motion segment with speeds in mm/min, acceleration in
/// mm/s², and distances in mm.
///
/// Constructed zero-filled, then populated; [`validate`](Self::validate)
/// gates every block before the stepper may load it. A block whose speeds
/// are all zero is a valid complete-stop sentinel.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlannerBlock {
    /// Speed entering the block.
    pub entry_speed: f64,
    /// Cruise speed the block was planned for.
    pub nominal_speed: f64,
    /// Speed leaving the block.
    pub exit_speed: f64,
    /// Acceleration limit while inside the block.
    pub acceleration: f64,
    /// Junction ceiling on `entry_speed`.
    pub max_entry_speed: f64,
    /// Segment length.
    pub millimeters: f64,
    /// Bit per joint; 1 = positive travel.
    pub direction_bits: u8,
    /// Step total on the dominant joint.
    pub step_event_count: u32,
    /// Step magnitudes per joint.
    pub steps: [u32; AXIS_COUNT],
    /// Set when a look-ahead pass must revisit this block.
    pub recalculate: bool,
    /// Set when the block is long enough to reach `nominal_speed` from a
    /// standstill within its own length.
    pub nominal_length: bool,
}

impl PlannerBlock {
    /// `true` when joint `axis` travels in the positive direction.
    pub fn direction_positive(&self, axis: usize) -> bool {
        self.direction_bits & (1 << axis) != 0
    }

    /// Checks every block invariant. All numeric checks are written in
    /// the affirmative so a NaN in any field fails validation.
    pub fn validate(&self) -> bool {
        let speeds_ok = self.entry_speed >= 0.0
            && self.nominal_speed >= 0.0
            && self.exit_speed >= 0.0
            && self.max_entry_speed >= 0.0
            && self.acceleration >= 0.0;
        if !speeds_ok {
            return false;
        }
        if !(self.millimeters >= 0.0) {
            return false;
        }
        if self.max_entry_speed > 0.0 && !(self.entry_speed <= self.max_entry_speed) {
            return false;
        }
        if self.nominal_speed > 0.0
            && !(self.entry_speed <= self.nominal_speed && self.exit_speed <= self.nominal_speed)
        {
            return false;
        }
        // The dominant-axis total must agree with the per-joint counts.
        if self.step_event_count != self.steps.iter().copied().max().unwrap_or(0) {
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_block() -> PlannerBlock {
        PlannerBlock {
            entry_speed: 0.0,
            nominal_speed: 200.0,
            exit_speed: 0.0,
            acceleration: 200.0,
            max_entry_speed: 200.0,
            millimeters: 50.0,
            direction_bits: 0b01,
            step_event_count: 4000,
            steps: [4000, 0],
            recalculate: false,
            nominal_length: true,
        }
    }

    // ── validate ────────────────────────────────────────────────────────────

    #[test]
    fn well_formed_block_validates() {
        assert!(valid_block().validate());
    }

    #[test]
    fn zero_filled_block_is_a_valid_stop_sentinel() {
        assert!(PlannerBlock::default().validate());
    }

    #[test]
    fn negative_speed_fails() {
        for field in 0..5 {
            let mut block = valid_block();
            match field {
                0 => block.entry_speed = -1.0,
                1 => block.nominal_speed = -1.0,
                2 => block.exit_speed = -1.0,
                3 => block.acceleration = -1.0,
                _ => block.max_entry_speed = -1.0,
            }
            assert!(!block.validate(), "field {field} should fail");
        }
    }

    #[test]
    fn negative_distance_fails() {
        let mut block = valid_block();
        block.millimeters = -0.001;
        assert!(!block.validate());
    }

    #[test]
    fn entry_above_max_entry_fails() {
        let mut block = valid_block();
        block.max_entry_speed = 100.0;
        block.entry_speed = 150.0;
        assert!(!block.validate());
    }

    #[test]
    fn entry_above_nominal_fails() {
        let mut block = valid_block();
        block.max_entry_speed = 0.0; // disable the junction check
        block.entry_speed = 250.0;
        assert!(!block.validate());
    }

    #[test]
    fn exit_above_nominal_fails() {
        let mut block = valid_block();
        block.exit_speed = 250.0;
        assert!(!block.validate());
    }

    #[test]
    fn nan_speed_fails() {
        let mut block = valid_block();
        block.nominal_speed = f64::NAN;
        assert!(!block.validate());
    }

    #[test]
    fn inconsistent_step_event_count_fails() {
        let mut block = valid_block();
        block.step_event_count = 1;
        assert!(!block.validate());
    }

    // ── direction bits ──────────────────────────────────────────────────────

    #[test]
    fn direction_bits_decode_per_axis() {
        let mut block = valid_block();
        block.direction_bits = 0b10;
        assert!(!block.direction_positive(0));
        assert!(block.direction_positive(1));
    }
}
