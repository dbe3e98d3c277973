//! Pulse generation over a loaded planner block.
//!
//! The stepper is a poll-driven state machine advanced by
//! [`update`](Stepper::update). The caller polls at least as often as the
//! desired minimum step interval; missed polls are caught up on the next
//! call. `update` may run from a timer ISR, in which case `load`, `hold`,
//! `resume`, and `stop` must be ordered with it by the caller (same
//! context, or the interrupt masked around them).

use tracing::trace;

use crate::config::StepperTimingConfig;
use crate::hal::Hal;
use crate::kinematics::{JointSteps, AXIS_COUNT};
use crate::planner::PlannerBlock;

/// Step interval used when the commanded speed is zero.
const DEFAULT_STEP_INTERVAL_US: u64 = 1_000;

/// Execution phase of the pulse engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepperPhase {
    Idle,
    Running,
    /// Pulse emission frozen, counters preserved.
    Hold,
    /// One-shot drain; the next update lands in `Idle`.
    Stopping,
}

/// Tick-driven pulse generator.
pub struct Stepper {
    phase: StepperPhase,
    block: Option<PlannerBlock>,
    step_taken: [u32; AXIS_COUNT],
    step_target: [u32; AXIS_COUNT],
    direction_bits: u8,
    position_steps: JointSteps,
    last_step_us: u64,
    step_interval_us: u64,
    speed_mm_min: f64,
    idle_start_ms: u64,
    motors_enabled: bool,
    cfg: StepperTimingConfig,
}

impl Stepper {
    pub fn new(cfg: &StepperTimingConfig) -> Self {
        Stepper {
            phase: StepperPhase::Idle,
            block: None,
            step_taken: [0; AXIS_COUNT],
            step_target: [0; AXIS_COUNT],
            direction_bits: 0,
            position_steps: [0; AXIS_COUNT],
            last_step_us: 0,
            step_interval_us: DEFAULT_STEP_INTERVAL_US,
            speed_mm_min: 0.0,
            idle_start_ms: 0,
            motors_enabled: false,
            cfg: cfg.clone(),
        }
    }

    pub fn phase(&self) -> StepperPhase {
        self.phase
    }

    /// Joint-space position in absolute steps.
    pub fn position_steps(&self) -> JointSteps {
        self.position_steps
    }

    /// Overwrites the joint position (homing datum).
    pub fn set_position_steps(&mut self, steps: JointSteps) {
        self.position_steps = steps;
    }

    pub fn current_speed(&self) -> f64 {
        self.speed_mm_min
    }

    pub fn motors_enabled(&self) -> bool {
        self.motors_enabled
    }

    /// `true` while a block is loaded (running, held, or draining).
    pub fn is_busy(&self) -> bool {
        self.phase != StepperPhase::Idle
    }

    /// Immediately de-energizes the drivers (alarm entry).
    pub fn force_disable(&mut self, hal: &mut dyn Hal) {
        hal.stepper_enable(false);
        self.motors_enabled = false;
    }

    /// Loads a block for execution. Valid only from `Idle` with a block
    /// that passes validation; rejected loads return `false` and change
    /// nothing.
    pub fn load(&mut self, block: PlannerBlock, hal: &mut dyn Hal) -> bool {
        if self.phase != StepperPhase::Idle || !block.validate() {
            return false;
        }

        self.step_target = block.steps;
        self.step_taken = [0; AXIS_COUNT];
        self.direction_bits = block.direction_bits;

        for axis in 0..AXIS_COUNT {
            hal.set_direction(axis, block.direction_positive(axis));
        }
        hal.delay_us(self.cfg.dir_setup_us);

        self.speed_mm_min = block.entry_speed;
        self.step_interval_us = interval_from_speed(block.entry_speed);

        if !self.motors_enabled {
            hal.stepper_enable(true);
            self.motors_enabled = true;
        }

        trace!(
            steps = ?block.steps,
            direction_bits = block.direction_bits,
            interval_us = self.step_interval_us,
            "block loaded"
        );
        self.block = Some(block);
        self.phase = StepperPhase::Running;
        self.last_step_us = hal.micros();
        true
    }

    /// Freezes pulse emission, preserving all counters.
    pub fn hold(&mut self) {
        if self.phase == StepperPhase::Running {
            self.phase = StepperPhase::Hold;
        }
    }

    /// Resumes from a hold. The interval clock restarts at `now`, so the
    /// first post-resume step never arrives early.
    pub fn resume(&mut self, hal: &mut dyn Hal) {
        if self.phase == StepperPhase::Hold {
            self.phase = StepperPhase::Running;
            self.last_step_us = hal.micros();
        }
    }

    /// Requests a drain; the loaded block is abandoned on the next update.
    pub fn stop(&mut self) {
        if matches!(self.phase, StepperPhase::Running | StepperPhase::Hold) {
            self.phase = StepperPhase::Stopping;
        }
    }

    /// Advances the engine. Call from the tick ISR or a tight poll loop.
    pub fn update(&mut self, hal: &mut dyn Hal) {
        match self.phase {
            StepperPhase::Idle => self.service_idle_disable(hal),
            StepperPhase::Hold => {}
            StepperPhase::Stopping => {
                hal.step_clear();
                self.block = None;
                self.step_taken = [0; AXIS_COUNT];
                self.step_target = [0; AXIS_COUNT];
                self.speed_mm_min = 0.0;
                self.phase = StepperPhase::Idle;
                self.idle_start_ms = hal.millis();
            }
            StepperPhase::Running => self.tick(hal),
        }
    }

    fn tick(&mut self, hal: &mut dyn Hal) {
        let now = hal.micros();
        if now.wrapping_sub(self.last_step_us) < self.step_interval_us {
            return;
        }

        let mut stepped = false;
        for axis in 0..AXIS_COUNT {
            if self.step_taken[axis] < self.step_target[axis] {
                hal.step_pulse(axis);
                self.step_taken[axis] += 1;
                self.position_steps[axis] += if self.direction_bits & (1 << axis) != 0 {
                    1
                } else {
                    -1
                };
                stepped = true;
            }
        }

        if stepped {
            hal.delay_us(self.cfg.pulse_width_us);
            hal.step_clear();
            self.last_step_us = now;
        }

        if self.step_taken == self.step_target {
            trace!(position = ?self.position_steps, "block complete");
            self.block = None;
            self.speed_mm_min = 0.0;
            self.phase = StepperPhase::Idle;
            self.idle_start_ms = hal.millis();
        }
    }

    fn service_idle_disable(&mut self, hal: &mut dyn Hal) {
        if self.cfg.idle_disable
            && self.motors_enabled
            && hal.millis().wrapping_sub(self.idle_start_ms) >= self.cfg.idle_timeout_ms
        {
            hal.stepper_enable(false);
            self.motors_enabled = false;
        }
    }
}

/// Step interval for a speed in mm/min at 1:1 mm-per-step calibration;
/// zero speed falls back to the 1 ms default.
fn interval_from_speed(speed_mm_min: f64) -> u64 {
    if speed_mm_min <= 0.0 {
        return DEFAULT_STEP_INTERVAL_US;
    }
    (1_000_000.0 / (speed_mm_min / 60.0)) as u64
}
