//! Closed-form log-polar cell-index math (spec.md §4.B).
//!
//! Given a point relative to the scan center and a spiral period, this
//! computes the target cell index without any table lookup. The epsilons
//! below bias half-cell boundary ties and must stay bit-identical to the
//! pixel-to-cell LUT built from [`crate::scan_tables::ScanTables`] — see
//! spec.md's "Closed-form vs LUT consistency" design note.

use std::f64::consts::PI;

/// Radius to cell zero.
pub const R0: f64 = 0.455;
/// Hex spiral construction constant, `π·√3`.
pub const SV_A: f64 = std::f64::consts::PI * 1.732_050_807_568_877_2;

const PITCH_ANG_EPS: f64 = 0.99999999;
const J_BIAS: f64 = 0.0000001;

/// Returns the cell index containing the point `(x, y)`, measured relative
/// to the scan center, for a spiral of period `spiral_per` (cells per
/// revolution). `(0, 0)` always maps to cell 0.
pub fn cell_index(x: f64, y: f64, spiral_per: f64) -> u32 {
    if x == 0.0 && y == 0.0 {
        return 0;
    }

    let p_floor = (spiral_per + 0.5).floor();
    let pitch = 1.0 / p_floor;
    let pitch_ang = 2.0 * PI * pitch * PITCH_ANG_EPS;
    let k = SV_A * pitch + 1.0;

    let r = (x * x + y * y).sqrt();
    let mut theta = y.atan2(x);
    if theta < 0.0 {
        theta += 2.0 * PI;
    }

    let arg = theta / pitch_ang;
    let j = 2.0 * arg - J_BIAS;

    let i_per = (((4.0 * PI * (r / R0).ln() / k.ln()) / pitch_ang - j) * pitch / 2.0).floor();

    let i_cell2 = i_per * 2.0 * spiral_per + j.floor();
    let i_cell = (i_cell2 / 2.0).floor();

    let abs_ang = 0.5 * (i_per * 2.0 * spiral_per + j) * pitch_ang;
    let r1 = R0 * k.powf(abs_ang / (2.0 * PI));
    let s2 = (r1 * k - r1) / 3.0;

    let dr = r - r1;
    let da = abs_ang - 0.5 * i_cell2 * pitch_ang;

    let p_int = spiral_per.floor();
    let odd = (i_cell2 as i64).rem_euclid(2) != 0;

    let cell = if dr < s2 {
        i_cell
    } else if dr < 2.0 * s2 {
        let w = PI * pitch;
        let b = w * (dr - s2) / s2;
        if odd {
            if da >= w - b { i_cell + p_int + 1.0 } else { i_cell }
        } else if da < b {
            i_cell + p_int
        } else {
            i_cell
        }
    } else if odd {
        i_cell + p_int + 1.0
    } else {
        i_cell + p_int
    };

    cell.max(0.0) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origin_is_cell_zero() {
        assert_eq!(cell_index(0.0, 0.0, 63.0), 0);
    }

    #[test]
    fn deterministic_and_stable() {
        // Same inputs must always produce the same cell, regardless of call
        // order or thread — spec.md §8 property 1.
        let a = cell_index(12.3, -4.5, 63.0);
        let b = cell_index(12.3, -4.5, 63.0);
        assert_eq!(a, b);
    }

    #[test]
    fn radius_is_monotonic_with_cell_growth() {
        // Cells further from center should never map to index 0 once far
        // enough away from the fovea.
        let near = cell_index(1.0, 0.0, 63.0);
        let far = cell_index(500.0, 0.0, 63.0);
        assert!(far > near);
    }

    #[test]
    fn random_points_are_deterministic_across_repeated_calls() {
        use rand::Rng;
        let mut rng = rand::thread_rng();
        for _ in 0..500 {
            let x = rng.gen_range(-400.0..400.0);
            let y = rng.gen_range(-400.0..400.0);
            let a = cell_index(x, y, 63.0);
            let b = cell_index(x, y, 63.0);
            assert_eq!(a, b, "cell_index must be stable for ({x}, {y})");
        }
    }
}
