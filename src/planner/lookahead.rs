//! Junction look-ahead over the block ring.
//!
//! Newly queued blocks carry `entry_speed = exit_speed = 0`, which paces
//! every block from a standstill. This pass walks the ring and raises
//! entry/exit speeds so motion flows through junctions: a reverse sweep
//! bounds each entry by what the block can decelerate from, a forward
//! sweep bounds it by what the previous block can accelerate to. The
//! queue's head block keeps `entry_speed = 0` (the machine is at rest or
//! the running block's exit was already planned at zero), and the tail
//! always exits at zero so an emptying queue ends in a stop.

use super::{BlockQueue, PlannerBlock};
use crate::kinematics::AXIS_COUNT;

/// Junctions with a direction cosine at or above this pass at full speed.
const JUNCTION_COLINEAR_COS: f64 = 0.999;

/// Replans entry/exit speeds across every queued block and clears the
/// `recalculate` flags. Safe to call after each enqueue batch; a queue of
/// zero or one block only has its boundary speeds pinned.
pub fn recalculate(queue: &mut BlockQueue) {
    let len = queue.len();
    if len == 0 {
        return;
    }

    // Junction ceilings. The head block starts from rest; every later
    // block is capped by the corner it shares with its predecessor.
    for i in 0..len {
        let ceiling = if i == 0 {
            0.0
        } else {
            let prev = queue.get(i - 1).expect("index below len");
            let cur = queue.get(i).expect("index below len");
            junction_speed(prev, cur)
        };
        let block = queue.get_mut(i).expect("index below len");
        block.max_entry_speed = ceiling.min(block.nominal_speed);
    }

    // Reverse sweep: entry must allow decelerating to the exit within
    // the block; the tail exits at zero.
    for i in (0..len).rev() {
        let next_entry = match queue.get(i + 1) {
            Some(next) => next.entry_speed,
            None => 0.0,
        };
        let block = queue.get_mut(i).expect("index below len");
        block.exit_speed = next_entry.min(block.nominal_speed);
        let reachable = allowable_speed(block.exit_speed, block);
        block.entry_speed = block.max_entry_speed.min(reachable);
    }

    // Forward sweep: entry cannot exceed what the previous block can
    // accelerate to from its own entry.
    for i in 1..len {
        let prev = queue.get(i - 1).expect("index below len");
        let reachable = allowable_speed(prev.entry_speed, prev);
        let prev_nominal = prev.nominal_speed;
        let block = queue.get_mut(i).expect("index below len");
        if block.entry_speed > reachable {
            block.entry_speed = reachable;
        }
        // Keep the junction consistent from the upstream side too.
        if block.entry_speed > prev_nominal {
            block.entry_speed = prev_nominal;
        }
        let entry = block.entry_speed;
        let prev = queue.get_mut(i - 1).expect("index below len");
        prev.exit_speed = entry.min(prev.nominal_speed);
    }

    for i in 0..len {
        queue.get_mut(i).expect("index below len").recalculate = false;
    }
}

/// Speed (mm/min) reachable at the far end of `block` when crossing its
/// boundary at `from_speed`, under the block's acceleration limit:
/// v² = v₀² + 2·a·d, with speeds converted through mm/s.
fn allowable_speed(from_speed: f64, block: &PlannerBlock) -> f64 {
    let v0 = from_speed / 60.0;
    let v = (v0 * v0 + 2.0 * block.acceleration * block.millimeters).sqrt();
    v * 60.0
}

/// Speed ceiling for the junction between two blocks, from the cosine of
/// the joint-space direction change: colinear passes at the smaller
/// nominal, right angles and reversals force a stop, and everything in
/// between scales linearly with the cosine.
fn junction_speed(prev: &PlannerBlock, cur: &PlannerBlock) -> f64 {
    let a = unit_vector(prev);
    let b = unit_vector(cur);
    let cos: f64 = (0..AXIS_COUNT).map(|i| a[i] * b[i]).sum();
    if cos >= JUNCTION_COLINEAR_COS {
        return prev.nominal_speed.min(cur.nominal_speed);
    }
    prev.nominal_speed.min(cur.nominal_speed) * cos.clamp(0.0, 1.0)
}

/// Joint-space direction of a block, normalized from its signed step
/// counts. A block with no steps yields the zero vector, which makes any
/// junction with it a full stop.
fn unit_vector(block: &PlannerBlock) -> [f64; AXIS_COUNT] {
    let mut v = [0.0; AXIS_COUNT];
    let mut norm = 0.0;
    for axis in 0..AXIS_COUNT {
        let sign = if block.direction_positive(axis) {
            1.0
        } else {
            -1.0
        };
        v[axis] = sign * block.steps[axis] as f64;
        norm += v[axis] * v[axis];
    }
    let norm = norm.sqrt();
    if norm > 0.0 {
        for component in v.iter_mut() {
            *component /= norm;
        }
    }
    v
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A 10 mm block along `steps` with the given nominal speed.
    fn block(steps: [u32; AXIS_COUNT], direction_bits: u8, nominal: f64) -> PlannerBlock {
        PlannerBlock {
            nominal_speed: nominal,
            max_entry_speed: nominal,
            acceleration: 200.0,
            millimeters: 10.0,
            direction_bits,
            step_event_count: steps.iter().copied().max().unwrap_or(0),
            steps,
            recalculate: true,
            ..PlannerBlock::default()
        }
    }

    fn queue_of(blocks: Vec<PlannerBlock>) -> BlockQueue {
        let mut q = BlockQueue::with_capacity(blocks.len().max(1));
        for b in blocks {
            assert!(q.push(b));
        }
        q
    }

    // ── boundary conditions ─────────────────────────────────────────────────

    #[test]
    fn empty_queue_is_a_no_op() {
        let mut q = BlockQueue::with_capacity(4);
        recalculate(&mut q);
        assert!(q.is_empty());
    }

    #[test]
    fn single_block_starts_and_ends_at_rest() {
        let mut q = queue_of(vec![block([100, 0], 0b11, 600.0)]);
        recalculate(&mut q);
        let b = q.get(0).expect("one block");
        assert_eq!(b.entry_speed, 0.0);
        assert_eq!(b.exit_speed, 0.0);
        assert!(!b.recalculate);
        assert!(b.validate());
    }

    #[test]
    fn tail_block_always_exits_at_zero() {
        let mut q = queue_of(vec![
            block([100, 0], 0b11, 600.0),
            block([100, 0], 0b11, 600.0),
            block([100, 0], 0b11, 600.0),
        ]);
        recalculate(&mut q);
        assert_eq!(q.get(2).expect("tail").exit_speed, 0.0);
    }

    // ── junction geometry ───────────────────────────────────────────────────

    #[test]
    fn colinear_junction_passes_at_nominal() {
        let mut q = queue_of(vec![
            block([100, 0], 0b11, 600.0),
            block([100, 0], 0b11, 600.0),
        ]);
        recalculate(&mut q);
        // 10 mm at 200 mm/s² accelerates well past 600 mm/min, so the
        // junction itself is the binding constraint.
        let second = q.get(1).expect("second");
        assert_eq!(second.entry_speed, 600.0);
        assert_eq!(q.get(0).expect("first").exit_speed, 600.0);
    }

    #[test]
    fn colinear_junction_capped_by_slower_nominal() {
        let mut q = queue_of(vec![
            block([100, 0], 0b11, 600.0),
            block([100, 0], 0b11, 240.0),
        ]);
        recalculate(&mut q);
        assert_eq!(q.get(1).expect("second").entry_speed, 240.0);
        assert_eq!(q.get(0).expect("first").exit_speed, 240.0);
    }

    #[test]
    fn right_angle_junction_forces_a_stop() {
        let mut q = queue_of(vec![
            block([100, 0], 0b11, 600.0),
            block([0, 100], 0b11, 600.0),
        ]);
        recalculate(&mut q);
        assert_eq!(q.get(1).expect("second").entry_speed, 0.0);
        assert_eq!(q.get(0).expect("first").exit_speed, 0.0);
    }

    #[test]
    fn reversal_junction_forces_a_stop() {
        let mut q = queue_of(vec![
            block([100, 0], 0b11, 600.0),
            block([100, 0], 0b10, 600.0), // X flips negative
        ]);
        recalculate(&mut q);
        assert_eq!(q.get(1).expect("second").entry_speed, 0.0);
    }

    #[test]
    fn shallow_corner_scales_with_cosine() {
        // 45° corner: cos = √2/2 ≈ 0.707.
        let mut q = queue_of(vec![
            block([100, 0], 0b11, 600.0),
            block([100, 100], 0b11, 600.0),
        ]);
        recalculate(&mut q);
        let entry = q.get(1).expect("second").entry_speed;
        let expected = 600.0 * std::f64::consts::FRAC_1_SQRT_2;
        assert!(
            (entry - expected).abs() < 1.0,
            "expected ≈{expected:.1}, got {entry:.1}"
        );
    }

    // ── acceleration limits ─────────────────────────────────────────────────

    #[test]
    fn forward_pass_caps_entry_by_reachable_speed() {
        // Short first block: from rest, 0.1 mm at 200 mm/s² reaches
        // 60·√(2·200·0.1) ≈ 380 mm/min, under the 600 junction ceiling.
        let mut short = block([1, 0], 0b11, 600.0);
        short.millimeters = 0.1;
        let mut q = queue_of(vec![short, block([100, 0], 0b11, 600.0)]);
        recalculate(&mut q);
        let entry = q.get(1).expect("second").entry_speed;
        let reachable = 60.0 * (2.0f64 * 200.0 * 0.1).sqrt();
        assert!(
            (entry - reachable).abs() < 1.0,
            "expected ≈{reachable:.1}, got {entry:.1}"
        );
    }

    #[test]
    fn entry_speeds_build_up_along_a_chain_of_short_blocks() {
        let mut blocks = Vec::new();
        for _ in 0..5 {
            let mut b = block([1, 0], 0b11, 6000.0);
            b.millimeters = 0.5;
            blocks.push(b);
        }
        let mut q = queue_of(blocks);
        recalculate(&mut q);
        // Entries rise monotonically until deceleration to the final
        // stop takes over.
        let entries: Vec<f64> = (0..q.len())
            .map(|i| q.get(i).expect("block").entry_speed)
            .collect();
        assert_eq!(entries[0], 0.0);
        assert!(entries[1] > 0.0);
        assert!(entries[2] > entries[1]);
    }

    #[test]
    fn reverse_pass_limits_entry_before_a_stop() {
        // Long fast block into a tiny final block: the long block's exit
        // is capped by what the tiny block can shed before the stop.
        let mut tiny = block([1, 0], 0b11, 6000.0);
        tiny.millimeters = 0.1;
        let mut q = queue_of(vec![block([100, 0], 0b11, 6000.0), tiny]);
        recalculate(&mut q);
        let tail_entry = q.get(1).expect("tail").entry_speed;
        let sheddable = 60.0 * (2.0f64 * 200.0 * 0.1).sqrt();
        assert!(
            tail_entry <= sheddable + 1.0,
            "entry {tail_entry:.1} exceeds decelerable {sheddable:.1}"
        );
    }

    // ── invariants ──────────────────────────────────────────────────────────

    #[test]
    fn every_block_validates_after_the_pass() {
        let mut q = queue_of(vec![
            block([100, 0], 0b11, 600.0),
            block([100, 100], 0b11, 900.0),
            block([0, 50], 0b11, 300.0),
            block([50, 0], 0b10, 1200.0),
        ]);
        recalculate(&mut q);
        for i in 0..q.len() {
            let b = q.get(i).expect("block");
            assert!(b.validate(), "block {i} failed validation: {b:?}");
            assert!(!b.recalculate);
        }
    }

    #[test]
    fn chain_is_continuous_exit_equals_next_entry() {
        let mut q = queue_of(vec![
            block([100, 0], 0b11, 600.0),
            block([100, 10], 0b11, 600.0),
            block([100, 20], 0b11, 600.0),
        ]);
        recalculate(&mut q);
        for i in 0..q.len() - 1 {
            let exit = q.get(i).expect("block").exit_speed;
            let next_entry = q.get(i + 1).expect("next").entry_speed;
            assert!(
                (exit - next_entry).abs() < 1e-9,
                "junction {i} discontinuous: exit {exit} vs entry {next_entry}"
            );
        }
    }
}
