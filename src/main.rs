//! etchsim — desktop simulator for the motion core.
//!
//! Reads G-code bytes from stdin in transport-sized chunks, runs them
//! through the full protocol → executor → stepper pipeline against a
//! virtual-clock HAL, and writes the firmware's serial output (acks and
//! status reports) to stdout. Pass a TOML machine profile as the first
//! argument to override the built-in defaults.
//!
//! Logging goes to stderr; set `ETCHSIM_LOG_DIR` to divert it to a daily
//! rolling file instead.

use std::io::Read;
use std::process::ExitCode;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use etchcore::config::{self, MachineConfig};
use etchcore::hal::SimHal;
use etchcore::kinematics::CartesianKinematics;
use etchcore::protocol::{LineFramer, ProtocolEvent};
use etchcore::supervisor::Supervisor;

/// Bytes fed to the framer per iteration; bounds real-time latency.
const RX_CHUNK: usize = 64;

/// Simulated poll period in µs while draining motion.
const POLL_PERIOD_US: u64 = 200;

/// Safety bound on drain iterations between chunks.
const MAX_DRAIN_POLLS: u64 = 50_000_000;

fn init_tracing() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match std::env::var("ETCHSIM_LOG_DIR") {
        Ok(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "etchsim.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Some(guard)
        }
        Err(_) => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
            None
        }
    }
}

fn load_profile() -> Result<MachineConfig, String> {
    match std::env::args().nth(1) {
        Some(path) => {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| format!("cannot read profile {path}: {e}"))?;
            config::parse(&text).map_err(|e| format!("profile {path}: {e}"))
        }
        None => Ok(MachineConfig::default()),
    }
}

/// Routes everything the framer produced into the supervisor.
fn drain_events(framer: &mut LineFramer, sup: &mut Supervisor<SimHal, CartesianKinematics>) {
    while let Some(event) = framer.poll_event() {
        match event {
            ProtocolEvent::Realtime(rt) => sup.handle_realtime(rt),
            ProtocolEvent::Line(line) => sup.handle_completed_line(&line),
        }
    }
}

/// Advances the virtual clock until queued motion has been executed.
fn drain_motion(sup: &mut Supervisor<SimHal, CartesianKinematics>) {
    for _ in 0..MAX_DRAIN_POLLS {
        if !sup.stepper().is_busy() && sup.queued_blocks() == 0 {
            sup.poll();
            return;
        }
        sup.hal_mut().advance_us(POLL_PERIOD_US);
        sup.poll();
    }
    warn!("motion drain hit the safety bound");
}

fn flush_serial(sup: &mut Supervisor<SimHal, CartesianKinematics>) {
    let out = sup.hal_mut().take_serial();
    if !out.is_empty() {
        print!("{out}");
    }
}

fn main() -> ExitCode {
    let _log_guard = init_tracing();

    let cfg = match load_profile() {
        Ok(cfg) => cfg,
        Err(message) => {
            eprintln!("etchsim: {message}");
            return ExitCode::FAILURE;
        }
    };

    let kinematics = CartesianKinematics::new(cfg.axes.steps_per_mm);
    let mut framer = LineFramer::new(&cfg.protocol);
    let mut sup = Supervisor::new(cfg, SimHal::new(), kinematics);
    info!("etchsim ready");

    let mut stdin = std::io::stdin().lock();
    let mut chunk = [0u8; RX_CHUNK];
    loop {
        let n = match stdin.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                eprintln!("etchsim: stdin read failed: {e}");
                return ExitCode::FAILURE;
            }
        };
        framer.feed(&chunk[..n]);
        drain_events(&mut framer, &mut sup);
        drain_motion(&mut sup);
        flush_serial(&mut sup);
    }

    drain_motion(&mut sup);
    flush_serial(&mut sup);
    info!(
        lines = sup.lines_processed(),
        errors = sup.errors(),
        "session complete"
    );
    println!("{}", sup.status_report());
    ExitCode::SUCCESS
}
