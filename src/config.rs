//! Machine profile loaded from a TOML file.
//!
//! Every tunable the core consumes (line framing, arc expansion, planner,
//! stepper timing, axis calibration, soft limits, spindle ceiling) lives
//! here. A profile omitting a field gets the firmware default, so a valid
//! empty string parses to [`MachineConfig::default`]. `parse` runs range
//! validation after deserialization; no other code re-checks these bounds.

use thiserror::Error;

/// Machine-profile loading failure.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config parse error: {0}")]
    Parse(String),
    #[error("config error: {0}")]
    Invalid(String),
}

/// Fully describes one engraver. Loaded from a TOML profile.
#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct MachineConfig {
    pub protocol: ProtocolConfig,
    pub arc: ArcConfig,
    pub planner: PlannerConfig,
    pub stepper: StepperTimingConfig,
    pub axes: AxesConfig,
    pub spindle: SpindleConfig,
}

/// `[protocol]` — line framing and normalization.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct ProtocolConfig {
    /// Line-buffer capacity in bytes. Valid range 32–256.
    pub line_buffer: usize,
    /// Completed-line queue depth. Valid range 1–32.
    pub queue_depth: usize,
    /// Accept `$`-prefixed system commands.
    pub allow_dollar_commands: bool,
    /// Discard `( … )` comment spans.
    pub strip_paren_comments: bool,
    /// Discard `;` end-of-line comments.
    pub strip_semicolon_comments: bool,
    /// Fold printable letters to uppercase while assembling.
    pub to_uppercase: bool,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        ProtocolConfig {
            line_buffer: 96,
            queue_depth: 8,
            allow_dollar_commands: true,
            strip_paren_comments: true,
            strip_semicolon_comments: true,
            to_uppercase: true,
        }
    }
}

/// `[arc]` — G02/G03 chord expansion.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct ArcConfig {
    /// Target chord length in mm.
    pub segment_len_mm: f64,
    /// Smallest usable arc radius in mm; smaller arcs are rejected.
    pub radius_min_mm: f64,
    /// Hard ceiling on chords per arc.
    pub max_segments: u32,
}

impl Default for ArcConfig {
    fn default() -> Self {
        ArcConfig {
            segment_len_mm: 0.5,
            radius_min_mm: 0.001,
            max_segments: 10_000,
        }
    }
}

/// `[planner]` — motion block queue and speed defaults.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct PlannerConfig {
    /// Ring-buffer capacity in blocks.
    pub queue_capacity: usize,
    /// Per-block acceleration limit, mm/s².
    pub acceleration_mm_s2: f64,
    /// Speed used for G00 rapids, mm/min.
    pub rapid_feedrate_mm_min: f64,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        PlannerConfig {
            queue_capacity: 32,
            acceleration_mm_s2: 200.0,
            rapid_feedrate_mm_min: 3000.0,
        }
    }
}

/// `[stepper]` — pulse timing and idle behavior.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct StepperTimingConfig {
    /// Step pulse width in µs.
    pub pulse_width_us: u32,
    /// Settling time after a direction-pin change, µs.
    pub dir_setup_us: u32,
    /// Disable motor drivers after an idle period.
    pub idle_disable: bool,
    /// Idle period before drivers are disabled, ms.
    pub idle_timeout_ms: u64,
}

impl Default for StepperTimingConfig {
    fn default() -> Self {
        StepperTimingConfig {
            pulse_width_us: 10,
            dir_setup_us: 5,
            idle_disable: true,
            idle_timeout_ms: 5_000,
        }
    }
}

/// `[axes]` — calibration, limit-switch policy, and soft-limit bounds.
///
/// Soft limits carry Z for forward compatibility even though motion only
/// commands X/Y.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct AxesConfig {
    /// Steps per mm, applied identically to both driven axes.
    pub steps_per_mm: f64,
    /// React to hardware limit switches while running.
    pub hard_limits_enabled: bool,
    /// Enforce the soft-limit envelope.
    pub soft_limits_enabled: bool,
    pub x_min: f64,
    pub x_max: f64,
    pub y_min: f64,
    pub y_max: f64,
    pub z_min: f64,
    pub z_max: f64,
}

impl Default for AxesConfig {
    fn default() -> Self {
        AxesConfig {
            steps_per_mm: 80.0,
            hard_limits_enabled: true,
            soft_limits_enabled: false,
            x_min: 0.0,
            x_max: 200.0,
            y_min: 0.0,
            y_max: 200.0,
            z_min: -50.0,
            z_max: 0.0,
        }
    }
}

/// `[spindle]` — spindle driver limits.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct SpindleConfig {
    /// Commanded S values are clamped to this ceiling.
    pub max_rpm: f64,
}

impl Default for SpindleConfig {
    fn default() -> Self {
        SpindleConfig { max_rpm: 10_000.0 }
    }
}

/// Parse a TOML string into a [`MachineConfig`], running validation.
pub fn parse(toml_str: &str) -> Result<MachineConfig, ConfigError> {
    let cfg: MachineConfig =
        toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))?;
    validate(&cfg)?;
    Ok(cfg)
}

fn validate(cfg: &MachineConfig) -> Result<(), ConfigError> {
    if !(32..=256).contains(&cfg.protocol.line_buffer) {
        return Err(ConfigError::Invalid(format!(
            "protocol.line_buffer must be within 32–256, got {}",
            cfg.protocol.line_buffer
        )));
    }
    if !(1..=32).contains(&cfg.protocol.queue_depth) {
        return Err(ConfigError::Invalid(format!(
            "protocol.queue_depth must be within 1–32, got {}",
            cfg.protocol.queue_depth
        )));
    }
    if cfg.arc.segment_len_mm <= 0.0 {
        return Err(ConfigError::Invalid(
            "arc.segment_len_mm must be positive".to_string(),
        ));
    }
    if cfg.arc.radius_min_mm <= 0.0 {
        return Err(ConfigError::Invalid(
            "arc.radius_min_mm must be positive".to_string(),
        ));
    }
    if cfg.arc.max_segments == 0 {
        return Err(ConfigError::Invalid(
            "arc.max_segments must be at least 1".to_string(),
        ));
    }
    if cfg.planner.queue_capacity == 0 {
        return Err(ConfigError::Invalid(
            "planner.queue_capacity must be at least 1".to_string(),
        ));
    }
    if cfg.planner.acceleration_mm_s2 <= 0.0 {
        return Err(ConfigError::Invalid(
            "planner.acceleration_mm_s2 must be positive".to_string(),
        ));
    }
    if cfg.planner.rapid_feedrate_mm_min <= 0.0 {
        return Err(ConfigError::Invalid(
            "planner.rapid_feedrate_mm_min must be positive".to_string(),
        ));
    }
    if cfg.stepper.pulse_width_us == 0 {
        return Err(ConfigError::Invalid(
            "stepper.pulse_width_us must be positive".to_string(),
        ));
    }
    if cfg.axes.steps_per_mm <= 0.0 {
        return Err(ConfigError::Invalid(
            "axes.steps_per_mm must be positive".to_string(),
        ));
    }
    for (name, min, max) in [
        ("x", cfg.axes.x_min, cfg.axes.x_max),
        ("y", cfg.axes.y_min, cfg.axes.y_max),
        ("z", cfg.axes.z_min, cfg.axes.z_max),
    ] {
        if min >= max {
            return Err(ConfigError::Invalid(format!(
                "axes.{name}_min must be below axes.{name}_max"
            )));
        }
    }
    if cfg.spindle.max_rpm <= 0.0 {
        return Err(ConfigError::Invalid(
            "spindle.max_rpm must be positive".to_string(),
        ));
    }
    Ok(())
}
