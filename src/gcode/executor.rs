//! Modal executor: applies a parsed block to the machine.
//!
//! Word effects are ordered G → M → standalone S within one block, with
//! the F word applied up front so a feedrate on the same line governs its
//! own motion. Motion is emitted as planner blocks through the kinematics
//! adapter; nothing here touches pins except the spindle, coolant, and
//! dwell paths, which go through the HAL.

use tracing::debug;

use super::arc::{segment_arc_ij, segment_arc_r};
use super::parser::GcodeBlock;
use super::GcodeError;
use crate::config::{ArcConfig, PlannerConfig};
use crate::hal::{Hal, SpindleState};
use crate::kinematics::{Kinematics, Vec2, AXIS_COUNT};
use crate::planner::{BlockQueue, PlannerBlock};

/// Moves shorter than this are position updates with no emitted block.
const MIN_MOVE_MM: f64 = 1e-6;

/// Active motion group. Sticky across blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionMode {
    Rapid,
    Linear,
    ArcCw,
    ArcCcw,
    Dwell,
}

/// Distance interpretation for axis words. Sticky, defaults to absolute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordMode {
    Absolute,
    Relative,
}

/// Feedrate interpretation. Sticky, defaults to units-per-minute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedMode {
    UnitsPerMinute,
    InverseTime,
}

/// The executor's persistent state between lines.
#[derive(Debug, Clone, PartialEq)]
pub struct ModalState {
    /// Machine position in mm.
    pub position: Vec2,
    pub motion_mode: MotionMode,
    pub coord_mode: CoordMode,
    pub feed_mode: FeedMode,
    pub spindle: SpindleState,
    /// Last commanded feedrate, mm/min.
    pub feedrate: f64,
    /// Whether any F word has ever been accepted. G01 without this set is
    /// an error even though `feedrate` holds a default.
    pub feedrate_was_set: bool,
    pub spindle_speed: f64,
    /// Latched by M02/M30.
    pub program_complete: bool,
}

impl ModalState {
    pub fn new() -> Self {
        ModalState {
            position: Vec2::zero(),
            motion_mode: MotionMode::Rapid,
            coord_mode: CoordMode::Absolute,
            feed_mode: FeedMode::UnitsPerMinute,
            spindle: SpindleState::Off,
            feedrate: 100.0,
            feedrate_was_set: false,
            spindle_speed: 0.0,
            program_complete: false,
        }
    }
}

impl Default for ModalState {
    fn default() -> Self {
        Self::new()
    }
}

/// Capabilities the executor borrows for one block.
///
/// The kinematics value is owned by the supervisor and lent here; there is
/// no global adapter.
pub struct ExecContext<'a> {
    pub kinematics: &'a dyn Kinematics,
    pub queue: &'a mut BlockQueue,
    pub hal: &'a mut dyn Hal,
    pub planner: &'a PlannerConfig,
    pub arc: &'a ArcConfig,
    /// Ceiling applied to commanded spindle RPM.
    pub spindle_max_rpm: f64,
}

/// Applies one parsed block to the modal state, emitting motion and
/// side effects through `ctx`.
pub fn execute_block(
    modal: &mut ModalState,
    block: &GcodeBlock,
    ctx: &mut ExecContext<'_>,
) -> Result<(), GcodeError> {
    // F first, so a feedrate on this line governs this line's motion.
    if let Some(f) = block.f {
        if f <= 0.0 {
            return Err(GcodeError::InvalidParam(format!(
                "feedrate must be positive, got {f}"
            )));
        }
        modal.feedrate = f;
        modal.feedrate_was_set = true;
    }

    if let Some(g) = block.g {
        execute_g(modal, block, ctx, g)?;
    }

    let mut s_consumed = false;
    if let Some(m) = block.m {
        s_consumed = execute_m(modal, block, ctx, m)?;
    }

    if !s_consumed {
        if let Some(s) = block.s {
            set_spindle_speed(modal, ctx, s)?;
        }
    }

    Ok(())
}

fn execute_g(
    modal: &mut ModalState,
    block: &GcodeBlock,
    ctx: &mut ExecContext<'_>,
    g: u16,
) -> Result<(), GcodeError> {
    match g {
        0 => {
            modal.motion_mode = MotionMode::Rapid;
            linear_move(modal, block, ctx, true)
        }
        1 => {
            modal.motion_mode = MotionMode::Linear;
            if !modal.feedrate_was_set {
                return Err(GcodeError::MissingParam(
                    "G01 requires a feedrate (F) before the first move".to_string(),
                ));
            }
            linear_move(modal, block, ctx, false)
        }
        2 | 3 => {
            let clockwise = g == 2;
            modal.motion_mode = if clockwise {
                MotionMode::ArcCw
            } else {
                MotionMode::ArcCcw
            };
            if !modal.feedrate_was_set {
                return Err(GcodeError::MissingParam(
                    "arc moves require a feedrate (F)".to_string(),
                ));
            }
            arc_move(modal, block, ctx, clockwise)
        }
        4 => {
            modal.motion_mode = MotionMode::Dwell;
            let seconds = block
                .p
                .ok_or_else(|| GcodeError::MissingParam("G04 requires a P word".to_string()))?;
            if seconds < 0.0 {
                return Err(GcodeError::InvalidParam(format!(
                    "dwell time must be non-negative, got {seconds}"
                )));
            }
            ctx.hal.delay_ms((seconds * 1000.0) as u32);
            Ok(())
        }
        90 => {
            modal.coord_mode = CoordMode::Absolute;
            Ok(())
        }
        91 => {
            modal.coord_mode = CoordMode::Relative;
            Ok(())
        }
        93 => {
            modal.feed_mode = FeedMode::InverseTime;
            Ok(())
        }
        94 => {
            modal.feed_mode = FeedMode::UnitsPerMinute;
            Ok(())
        }
        other => Err(GcodeError::UnsupportedCmd(format!("G{other}"))),
    }
}

/// Returns `true` when the S word was consumed as part of the M-word.
fn execute_m(
    modal: &mut ModalState,
    block: &GcodeBlock,
    ctx: &mut ExecContext<'_>,
    m: u16,
) -> Result<bool, GcodeError> {
    match m {
        2 | 30 => {
            modal.spindle = SpindleState::Off;
            ctx.hal.spindle_set(SpindleState::Off, 0.0);
            ctx.hal.coolant_set(false);
            modal.program_complete = true;
            if m == 30 {
                modal.position = Vec2::zero();
            }
            debug!(code = %format!("M{m:02}"), "program complete");
            Ok(false)
        }
        3 | 4 => {
            if let Some(s) = block.s {
                if s < 0.0 {
                    return Err(GcodeError::InvalidParam(format!(
                        "spindle speed must be non-negative, got {s}"
                    )));
                }
                modal.spindle_speed = s;
            }
            modal.spindle = if m == 3 {
                SpindleState::Cw
            } else {
                SpindleState::Ccw
            };
            ctx.hal.spindle_set(
                modal.spindle,
                modal.spindle_speed.min(ctx.spindle_max_rpm),
            );
            Ok(true)
        }
        5 => {
            modal.spindle = SpindleState::Off;
            ctx.hal.spindle_set(SpindleState::Off, 0.0);
            Ok(false)
        }
        other => Err(GcodeError::UnknownCmd(format!("M{other}"))),
    }
}

fn set_spindle_speed(
    modal: &mut ModalState,
    ctx: &mut ExecContext<'_>,
    s: f64,
) -> Result<(), GcodeError> {
    if s < 0.0 {
        return Err(GcodeError::InvalidParam(format!(
            "spindle speed must be non-negative, got {s}"
        )));
    }
    modal.spindle_speed = s;
    // A running spindle tracks the new speed immediately.
    if modal.spindle != SpindleState::Off {
        ctx.hal
            .spindle_set(modal.spindle, modal.spindle_speed.min(ctx.spindle_max_rpm));
    }
    Ok(())
}

/// Resolves the commanded target from axis words and the distance mode.
fn resolve_target(modal: &ModalState, block: &GcodeBlock) -> Vec2 {
    match modal.coord_mode {
        CoordMode::Absolute => Vec2::new(
            block.x.unwrap_or(modal.position.x),
            block.y.unwrap_or(modal.position.y),
        ),
        CoordMode::Relative => Vec2::new(
            modal.position.x + block.x.unwrap_or(0.0),
            modal.position.y + block.y.unwrap_or(0.0),
        ),
    }
}

/// Programmed speed for a move of `distance` mm under the active feed
/// mode. Inverse-time (G93) interprets F as whole-moves-per-minute.
fn feed_speed(modal: &ModalState, distance: f64) -> f64 {
    match modal.feed_mode {
        FeedMode::UnitsPerMinute => modal.feedrate,
        FeedMode::InverseTime => distance * modal.feedrate,
    }
}

fn linear_move(
    modal: &mut ModalState,
    block: &GcodeBlock,
    ctx: &mut ExecContext<'_>,
    rapid: bool,
) -> Result<(), GcodeError> {
    let target = resolve_target(modal, block);
    let distance = modal.position.distance(&target);
    if distance < MIN_MOVE_MM {
        modal.position = target;
        return Ok(());
    }

    let speed = if rapid {
        ctx.planner.rapid_feedrate_mm_min
    } else {
        feed_speed(modal, distance)
    };

    let waypoints = ctx.kinematics.segment_move(modal.position, target);
    enqueue_segments(modal.position, &waypoints, speed, ctx)?;
    modal.position = target;
    Ok(())
}

fn arc_move(
    modal: &mut ModalState,
    block: &GcodeBlock,
    ctx: &mut ExecContext<'_>,
    clockwise: bool,
) -> Result<(), GcodeError> {
    let start = modal.position;
    let target = resolve_target(modal, block);

    let mut waypoints: Vec<Vec2> = Vec::new();
    {
        let mut collect = |x: f64, y: f64| {
            waypoints.push(Vec2::new(x, y));
            true
        };
        if block.i.is_some() || block.j.is_some() {
            segment_arc_ij(
                start,
                target,
                block.i.unwrap_or(0.0),
                block.j.unwrap_or(0.0),
                clockwise,
                ctx.arc,
                &mut collect,
            )?;
        } else if let Some(r) = block.r {
            segment_arc_r(start, target, r, clockwise, ctx.arc, &mut collect)?;
        } else {
            return Err(GcodeError::MissingParam(
                "arc moves require I/J offsets or an R word".to_string(),
            ));
        }
    }

    // Inverse-time feed needs the whole-move length; sum the chords.
    let mut arc_len = 0.0;
    let mut prev = start;
    for point in &waypoints {
        arc_len += prev.distance(point);
        prev = *point;
    }
    let speed = feed_speed(modal, arc_len);

    enqueue_segments(start, &waypoints, speed, ctx)?;
    modal.position = target;
    Ok(())
}

/// Pushes one planner block per waypoint. On a full ring the emission
/// stops and the caller leaves the modal position unchanged; blocks
/// already queued stay queued.
fn enqueue_segments(
    start: Vec2,
    waypoints: &[Vec2],
    speed: f64,
    ctx: &mut ExecContext<'_>,
) -> Result<(), GcodeError> {
    let mut prev = start;
    for point in waypoints {
        let block = build_motion_block(prev, *point, speed, ctx);
        if block.step_event_count == 0 && block.millimeters < MIN_MOVE_MM {
            prev = *point;
            continue;
        }
        if !ctx.queue.push(block) {
            return Err(GcodeError::PlannerFull);
        }
        prev = *point;
    }
    Ok(())
}

fn build_motion_block(
    from: Vec2,
    to: Vec2,
    speed: f64,
    ctx: &mut ExecContext<'_>,
) -> PlannerBlock {
    let from_steps = ctx.kinematics.cart_to_joint(from);
    let to_steps = ctx.kinematics.cart_to_joint(to);

    let mut steps = [0u32; AXIS_COUNT];
    let mut direction_bits = 0u8;
    for axis in 0..AXIS_COUNT {
        let delta = to_steps[axis] - from_steps[axis];
        if delta >= 0 {
            direction_bits |= 1 << axis;
        }
        steps[axis] = delta.unsigned_abs() as u32;
    }
    let step_event_count = steps.iter().copied().max().unwrap_or(0);

    let millimeters = from.distance(&to);
    let acceleration = ctx.planner.acceleration_mm_s2;
    // Long enough to reach nominal speed from a standstill inside the
    // block: d >= v² / 2a with v in mm/s.
    let v_mm_s = speed / 60.0;
    let nominal_length = millimeters >= v_mm_s * v_mm_s / (2.0 * acceleration);

    PlannerBlock {
        entry_speed: 0.0,
        nominal_speed: speed,
        exit_speed: 0.0,
        acceleration,
        max_entry_speed: speed,
        millimeters,
        direction_bits,
        step_event_count,
        steps,
        recalculate: true,
        nominal_length,
    }
}
