//! Top-level state machine and safety interlocks.
//!
//! The supervisor owns the modal state, the planner ring, the stepper,
//! and the HAL and kinematics capability values. One cooperative context
//! drives it: completed lines go to [`process_line`](Supervisor::process_line)
//! (or [`handle_completed_line`](Supervisor::handle_completed_line) from
//! the framer), real-time events to
//! [`handle_realtime`](Supervisor::handle_realtime), and
//! [`poll`](Supervisor::poll) runs input sampling and motion service.
//! Alarms latch: once entered, the only exit is an explicit clear back to
//! `Idle`.

use tracing::{debug, info, warn};

use crate::config::MachineConfig;
use crate::error::{ack_error, wire_code, ACK_OK, CODE_OVERFLOW};
use crate::gcode::{execute_block, parse_line, ExecContext, GcodeError, ModalState};
use crate::hal::{Hal, SpindleState};
use crate::kinematics::{Kinematics, Vec2, Vec3};
use crate::planner::BlockQueue;
use crate::protocol::{CompletedLine, LineStatus, RealtimeEvent};
use crate::stepper::Stepper;

/// Machine state as shown in status reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineState {
    Idle,
    Running,
    Hold,
    Jog,
    Alarm,
    Homing,
    Check,
    Sleep,
    Door,
}

impl MachineState {
    /// Name used in the `<STATE|…>` report.
    pub fn report_name(&self) -> &'static str {
        match self {
            MachineState::Idle => "Idle",
            MachineState::Running => "Run",
            MachineState::Hold => "Hold",
            MachineState::Jog => "Jog",
            MachineState::Alarm => "Alarm",
            MachineState::Homing => "Home",
            MachineState::Check => "Check",
            MachineState::Sleep => "Sleep",
            MachineState::Door => "Door",
        }
    }
}

/// Latched alarm cause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlarmKind {
    HardLimit,
    SoftLimit,
    EStop,
    ProbeFail,
    HomingFail,
    Overflow,
    SpindleStall,
}

impl AlarmKind {
    /// Numeric code for the `A:` status-report field.
    pub fn code(&self) -> u8 {
        match self {
            AlarmKind::HardLimit => 1,
            AlarmKind::SoftLimit => 2,
            AlarmKind::EStop => 3,
            AlarmKind::ProbeFail => 4,
            AlarmKind::HomingFail => 5,
            AlarmKind::Overflow => 6,
            AlarmKind::SpindleStall => 7,
        }
    }
}

/// Homing mask covering both driven axes.
const HOME_ALL_AXES: u8 = 0b11;

/// Owns every core subsystem and enforces the transition rules.
pub struct Supervisor<H: Hal, K: Kinematics> {
    state: MachineState,
    alarm: Option<AlarmKind>,
    modal: ModalState,
    queue: BlockQueue,
    stepper: Stepper,
    hal: H,
    kinematics: K,
    cfg: MachineConfig,
    homed: bool,
    limits_enabled: bool,
    soft_limits_enabled: bool,
    machine_pos: Vec3,
    work_offset: Vec3,
    lines_processed: u32,
    errors: u32,
    uptime_ms: u64,
}

impl<H: Hal, K: Kinematics> Supervisor<H, K> {
    /// `cfg` is expected to have passed [`crate::config::parse`]
    /// validation.
    pub fn new(cfg: MachineConfig, hal: H, kinematics: K) -> Self {
        Supervisor {
            state: MachineState::Idle,
            alarm: None,
            modal: ModalState::new(),
            queue: BlockQueue::with_capacity(cfg.planner.queue_capacity),
            stepper: Stepper::new(&cfg.stepper),
            hal,
            kinematics,
            limits_enabled: cfg.axes.hard_limits_enabled,
            soft_limits_enabled: cfg.axes.soft_limits_enabled,
            cfg,
            homed: false,
            machine_pos: Vec3::zero(),
            work_offset: Vec3::zero(),
            lines_processed: 0,
            errors: 0,
            uptime_ms: 0,
        }
    }

    // ── accessors ───────────────────────────────────────────────────────────

    pub fn state(&self) -> MachineState {
        self.state
    }

    pub fn alarm(&self) -> Option<AlarmKind> {
        self.alarm
    }

    pub fn modal(&self) -> &ModalState {
        &self.modal
    }

    pub fn stepper(&self) -> &Stepper {
        &self.stepper
    }

    pub fn machine_position(&self) -> Vec3 {
        self.machine_pos
    }

    pub fn set_work_offset(&mut self, offset: Vec3) {
        self.work_offset = offset;
    }

    pub fn homed(&self) -> bool {
        self.homed
    }

    pub fn lines_processed(&self) -> u32 {
        self.lines_processed
    }

    pub fn errors(&self) -> u32 {
        self.errors
    }

    pub fn uptime_ms(&self) -> u64 {
        self.uptime_ms
    }

    pub fn queued_blocks(&self) -> usize {
        self.queue.len()
    }

    pub fn hal(&self) -> &H {
        &self.hal
    }

    pub fn hal_mut(&mut self) -> &mut H {
        &mut self.hal
    }

    // ── line processing ─────────────────────────────────────────────────────

    /// Framer-facing entry point: routes overflow lines to the error
    /// counter and OK lines into [`process_line`].
    pub fn handle_completed_line(&mut self, line: &CompletedLine) {
        match line.status {
            LineStatus::Overflow => {
                warn!(len = line.text.len(), "line overflowed the rx buffer");
                self.errors += 1;
                let ack = ack_error(CODE_OVERFLOW);
                self.hal.serial_write(ack.as_bytes());
            }
            LineStatus::Ok => {
                let _ = self.process_line(&line.text);
            }
        }
    }

    /// Processes one normalized line and acknowledges it on the serial
    /// channel. Errors increment the error counter and never halt the
    /// session.
    pub fn process_line(&mut self, line: &str) -> Result<(), GcodeError> {
        let result = self.dispatch_line(line);
        match &result {
            Ok(()) => self.hal.serial_write(ACK_OK.as_bytes()),
            Err(err) => {
                debug!(line, %err, "line rejected");
                self.errors += 1;
                let ack = ack_error(wire_code(err));
                self.hal.serial_write(ack.as_bytes());
            }
        }
        result
    }

    fn dispatch_line(&mut self, line: &str) -> Result<(), GcodeError> {
        // System commands carry their own state preconditions and must
        // work from Alarm (that is how a host clears it).
        if line.starts_with('$') {
            return self.dollar_command(line);
        }

        match self.state {
            MachineState::Idle | MachineState::Running => {
                let block = parse_line(line)?;
                let mut ctx = ExecContext {
                    kinematics: &self.kinematics,
                    queue: &mut self.queue,
                    hal: &mut self.hal,
                    planner: &self.cfg.planner,
                    arc: &self.cfg.arc,
                    spindle_max_rpm: self.cfg.spindle.max_rpm,
                };
                execute_block(&mut self.modal, &block, &mut ctx)?;
                crate::planner::recalculate(&mut self.queue);
                self.lines_processed += 1;
                if self.state == MachineState::Idle {
                    self.state = MachineState::Running;
                }
                if self.soft_limits_enabled
                    && !self.check_soft_limits(
                        self.modal.position.x,
                        self.modal.position.y,
                        self.machine_pos.z,
                    )
                {
                    self.trigger_alarm(AlarmKind::SoftLimit);
                }
                Ok(())
            }
            MachineState::Check => {
                parse_line(line)?;
                self.lines_processed += 1;
                Ok(())
            }
            _ => Err(GcodeError::WrongState),
        }
    }

    fn dollar_command(&mut self, line: &str) -> Result<(), GcodeError> {
        match line {
            "$H" => self.start_homing(HOME_ALL_AXES),
            "$X" => {
                self.clear_alarm();
                Ok(())
            }
            "$C" => match self.state {
                MachineState::Idle => {
                    self.state = MachineState::Check;
                    Ok(())
                }
                MachineState::Check => {
                    self.state = MachineState::Idle;
                    Ok(())
                }
                _ => Err(GcodeError::WrongState),
            },
            other => Err(GcodeError::UnsupportedCmd(other.to_string())),
        }
    }

    // ── real-time commands ──────────────────────────────────────────────────

    pub fn handle_realtime(&mut self, event: RealtimeEvent) {
        match event {
            RealtimeEvent::Reset => self.soft_reset(),
            RealtimeEvent::StatusQuery => {
                let report = self.status_report();
                self.hal.serial_write(report.as_bytes());
                self.hal.serial_write(b"\r\n");
            }
            RealtimeEvent::FeedHold => {
                if self.state == MachineState::Running {
                    self.stepper.hold();
                    self.state = MachineState::Hold;
                    info!("feed hold");
                }
            }
            RealtimeEvent::CycleStart => {
                if self.state == MachineState::Hold {
                    self.stepper.resume(&mut self.hal);
                    self.state = MachineState::Running;
                    info!("cycle start");
                }
            }
        }
    }

    /// 0x18: abandon in-flight motion and re-initialize the session.
    /// A latched alarm survives the reset.
    fn soft_reset(&mut self) {
        self.stepper.stop();
        self.stepper.update(&mut self.hal);
        self.queue.clear();
        self.modal = ModalState::new();
        self.hal.spindle_set(SpindleState::Off, 0.0);
        self.hal.coolant_set(false);
        if self.state != MachineState::Alarm {
            self.state = MachineState::Idle;
        }
        info!("soft reset");
    }

    // ── state machine ───────────────────────────────────────────────────────

    /// Explicit-request transition. Returns `false` (state unchanged) for
    /// any pair outside the permitted table. Alarm entry goes through
    /// [`trigger_alarm`](Self::trigger_alarm); alarm exit through
    /// [`clear_alarm`](Self::clear_alarm); homing through
    /// [`start_homing`](Self::start_homing).
    pub fn set_state(&mut self, to: MachineState) -> bool {
        use MachineState::*;
        let allowed = match (self.state, to) {
            (from, to) if from == to => true,
            (Alarm, _) => false,
            (Idle, Running | Check | Sleep | Door | Jog) => true,
            (Running, Hold) => true,
            (Hold, Running) => true,
            (Running | Jog, Idle) => true,
            (Check | Sleep | Door, Idle) => true,
            _ => false,
        };
        if allowed {
            self.state = to;
        } else {
            debug!(from = ?self.state, to = ?to, "transition rejected");
        }
        allowed
    }

    /// Latches `kind` and disables motion. Entry is permitted from any
    /// state; re-triggering while latched keeps the first cause.
    pub fn trigger_alarm(&mut self, kind: AlarmKind) {
        if self.alarm.is_none() {
            self.alarm = Some(kind);
        }
        warn!(alarm = ?kind, "alarm triggered");
        self.state = MachineState::Alarm;
        self.stepper.stop();
        self.stepper.update(&mut self.hal);
        self.stepper.force_disable(&mut self.hal);
        self.hal.spindle_set(SpindleState::Off, 0.0);
        self.modal.spindle = SpindleState::Off;
        self.hal.coolant_set(false);
        self.queue.clear();
    }

    /// Explicit alarm clear, the only exit from `Alarm`. Returns `false`
    /// when no alarm is latched.
    pub fn clear_alarm(&mut self) -> bool {
        if self.state != MachineState::Alarm {
            return false;
        }
        info!(alarm = ?self.alarm, "alarm cleared");
        self.alarm = None;
        self.state = MachineState::Idle;
        true
    }

    // ── homing ──────────────────────────────────────────────────────────────

    /// Runs the homing cycle. Valid only from `Idle`; a mask the
    /// kinematics adapter rejects latches `HomingFail`.
    pub fn start_homing(&mut self, axis_mask: u8) -> Result<(), GcodeError> {
        if self.state != MachineState::Idle {
            return Err(GcodeError::WrongState);
        }
        if !self.kinematics.validate_homing_axes(axis_mask) {
            self.trigger_alarm(AlarmKind::HomingFail);
            return Err(GcodeError::InvalidTarget(format!(
                "homing axis mask {axis_mask:#04b} rejected"
            )));
        }

        self.state = MachineState::Homing;
        info!(mask = axis_mask, "homing");

        // Establish the datum: machine and joint space both zero.
        self.modal.position = Vec2::zero();
        self.machine_pos = Vec3::zero();
        self.stepper
            .set_position_steps(self.kinematics.cart_to_joint(Vec2::zero()));
        self.homed = true;
        self.state = MachineState::Idle;
        Ok(())
    }

    // ── soft limits ─────────────────────────────────────────────────────────

    /// `true` iff the coordinate lies inside the configured envelope.
    pub fn check_soft_limits(&self, x: f64, y: f64, z: f64) -> bool {
        let a = &self.cfg.axes;
        x >= a.x_min
            && x <= a.x_max
            && y >= a.y_min
            && y <= a.y_max
            && z >= a.z_min
            && z <= a.z_max
    }

    // ── poll loop ───────────────────────────────────────────────────────────

    /// One round of the cooperative loop: sample inputs, service motion,
    /// advance the stepper, and synchronize the reported position.
    pub fn poll(&mut self) {
        self.uptime_ms = self.hal.millis();

        if self.state != MachineState::Alarm {
            if self.hal.estop() {
                self.trigger_alarm(AlarmKind::EStop);
            } else if self.limits_enabled
                && self.state == MachineState::Running
                && (self.hal.limit_x() || self.hal.limit_y() || self.hal.limit_z())
            {
                self.trigger_alarm(AlarmKind::HardLimit);
            }
        }

        if self.state == MachineState::Running && !self.stepper.is_busy() {
            match self.queue.pop() {
                Some(block) => {
                    self.stepper.load(block, &mut self.hal);
                }
                None => {
                    self.state = MachineState::Idle;
                    debug!("motion complete");
                }
            }
        }

        self.stepper.update(&mut self.hal);

        self.machine_pos.x = self.modal.position.x;
        self.machine_pos.y = self.modal.position.y;
    }

    // ── status report ───────────────────────────────────────────────────────

    /// Renders the `?` status report:
    /// `<STATE|MPos:mx,my,mz|WPos:wx,wy,wz|F:f|S:s[|A:alarm]>`
    pub fn status_report(&self) -> String {
        let m = self.machine_pos;
        let w = Vec3::new(
            m.x - self.work_offset.x,
            m.y - self.work_offset.y,
            m.z - self.work_offset.z,
        );
        let mut report = format!(
            "<{}|MPos:{:.3},{:.3},{:.3}|WPos:{:.3},{:.3},{:.3}|F:{:.1}|S:{:.0}",
            self.state.report_name(),
            m.x,
            m.y,
            m.z,
            w.x,
            w.y,
            w.z,
            self.modal.feedrate,
            self.modal.spindle_speed,
        );
        if self.state == MachineState::Alarm {
            if let Some(alarm) = self.alarm {
                report.push_str(&format!("|A:{}", alarm.code()));
            }
        }
        report.push('>');
        report
    }
}
