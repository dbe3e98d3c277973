//! Circular-move expansion into chord segments.
//!
//! Both entry points walk the arc from `start` to `end` and hand each
//! intermediate endpoint to a callback. The callback returns a
//! continue-flag; returning `false` stops the expansion early (the planner
//! uses this when its queue saturates). The final endpoint is always the
//! exact commanded target so floating error never accumulates into the
//! modal position.

use super::GcodeError;
use crate::config::ArcConfig;
use crate::kinematics::Vec2;

use std::f64::consts::TAU;

/// Expands an I/J-form arc (center = start + offset).
///
/// The working radius is the mean of the start and end radii, which
/// absorbs small I/J rounding in the input program. When `end` coincides
/// with `start` (within the minimum radius) the sweep is a full circle.
pub fn segment_arc_ij(
    start: Vec2,
    end: Vec2,
    offset_i: f64,
    offset_j: f64,
    clockwise: bool,
    cfg: &ArcConfig,
    emit: &mut dyn FnMut(f64, f64) -> bool,
) -> Result<(), GcodeError> {
    let center = Vec2::new(start.x + offset_i, start.y + offset_j);
    let r_start = start.distance(&center);
    let r_end = end.distance(&center);
    let radius = 0.5 * (r_start + r_end);

    if radius < cfg.radius_min_mm {
        return Err(GcodeError::InvalidTarget(format!(
            "arc radius {radius:.4} below minimum {:.4}",
            cfg.radius_min_mm
        )));
    }

    let theta_start = (start.y - center.y).atan2(start.x - center.x);
    let theta_end = (end.y - center.y).atan2(end.x - center.x);

    let mut sweep = if clockwise {
        (theta_start - theta_end).rem_euclid(TAU)
    } else {
        (theta_end - theta_start).rem_euclid(TAU)
    };
    if sweep <= 0.0 {
        sweep += TAU;
    }

    // Coincident endpoints command a full circle.
    if start.distance(&end) < cfg.radius_min_mm {
        sweep = TAU;
    }

    let count = ((radius * sweep / cfg.segment_len_mm) as u32)
        .max(1)
        .min(cfg.max_segments);
    let step = if clockwise {
        -sweep / count as f64
    } else {
        sweep / count as f64
    };

    for k in 1..count {
        let theta = theta_start + step * k as f64;
        let x = center.x + radius * theta.cos();
        let y = center.y + radius * theta.sin();
        if !emit(x, y) {
            return Ok(());
        }
    }

    // Final endpoint snapped to the exact commanded target.
    emit(end.x, end.y);
    Ok(())
}

/// Expands an R-form arc by solving for the center, then delegating to
/// [`segment_arc_ij`].
///
/// Side selection follows the G-code convention: a positive R commands the
/// minor arc (center right of the chord for CW travel, left for CCW); a
/// negative R commands the major arc on the opposite side.
pub fn segment_arc_r(
    start: Vec2,
    end: Vec2,
    radius: f64,
    clockwise: bool,
    cfg: &ArcConfig,
    emit: &mut dyn FnMut(f64, f64) -> bool,
) -> Result<(), GcodeError> {
    let chord = Vec2::new(end.x - start.x, end.y - start.y);
    let chord_len = start.distance(&end);

    if chord_len < cfg.radius_min_mm {
        return Err(GcodeError::InvalidTarget(
            "R-form arc endpoints coincide; use I/J for a full circle".to_string(),
        ));
    }

    let half_chord = 0.5 * chord_len;
    let h_squared = radius * radius - half_chord * half_chord;
    if h_squared < 0.0 {
        return Err(GcodeError::InvalidTarget(format!(
            "arc chord {chord_len:.4} longer than diameter {:.4}",
            2.0 * radius.abs()
        )));
    }
    let h = h_squared.sqrt();

    let mid = Vec2::new(
        0.5 * (start.x + end.x),
        0.5 * (start.y + end.y),
    );
    let unit = Vec2::new(chord.x / chord_len, chord.y / chord_len);

    // Perpendicular to the chord, viewed along the direction of travel:
    // right = (uy, -ux), left = (-uy, ux). Positive R puts the center on
    // the minor-arc side; negative R flips to the major arc.
    let toward_right = clockwise == (radius > 0.0);
    let (px, py) = if toward_right {
        (unit.y, -unit.x)
    } else {
        (-unit.y, unit.x)
    };

    let center = Vec2::new(mid.x + px * h, mid.y + py * h);
    segment_arc_ij(
        start,
        end,
        center.x - start.x,
        center.y - start.y,
        clockwise,
        cfg,
        emit,
    )
}
