//! Processing task (spec.md §4.F): applies the scan for each admitted
//! frame and drives adaptive frame skipping for the camera variant.

use std::time::Duration;

use crate::error::Result;
use crate::lpx_image::LPXImage;
use crate::raster::Raster;
use crate::scan::scan_from_image;
use crate::scan_cache::ScanCacheHandle;
use crate::scan_tables::ScanTablesHandle;

pub fn process_frame(
    tables: ScanTablesHandle,
    cache: &ScanCacheHandle,
    raster: &Raster,
    cx: f32,
    cy: f32,
) -> Result<LPXImage> {
    scan_from_image(tables, cache, raster, cx, cy)
}

/// Mean absolute difference of grayscale intensity between two same-sized
/// rasters, used as the motion signal (spec.md §4.F). `0.0` for mismatched
/// sizes — callers only feed consecutive frames from the same source.
pub fn motion_estimate(prev: &Raster, cur: &Raster) -> f64 {
    if prev.width() != cur.width() || prev.height() != cur.height() || prev.is_empty() {
        return 0.0;
    }
    let n = prev.width() as usize * prev.height() as usize;
    let mut total: u64 = 0;
    for i in 0..n {
        let (x, y) = (i as u32 % prev.width(), i as u32 / prev.width());
        let (pr, pg, pb) = prev.pixel(x, y);
        let (cr, cg, cb) = cur.pixel(x, y);
        let prev_gray = grayscale(pr, pg, pb);
        let cur_gray = grayscale(cr, cg, cb);
        total += prev_gray.abs_diff(cur_gray) as u64;
    }
    total as f64 / n as f64
}

fn grayscale(r: u8, g: u8, b: u8) -> u8 {
    ((u32::from(r) * 299 + u32::from(g) * 587 + u32::from(b) * 114) / 1000) as u8
}

/// Adjusts `currentSkipRate` one step per decision: processing time over
/// budget pushes the rate up, high motion pulls it back down (spec.md
/// §4.F "Adaptive frame skipping").
pub struct SkipController {
    current: u32,
    min: u32,
    max: u32,
    motion_threshold: f64,
    target: Duration,
}

impl SkipController {
    pub fn new(min: u32, max: u32, motion_threshold: f64, target: Duration) -> Self {
        assert!(min <= max, "min skip rate must not exceed max");
        Self { current: min, min, max, motion_threshold, target }
    }

    pub const fn current(&self) -> u32 {
        self.current
    }

    /// Should the frame currently being considered be skipped.
    pub fn should_skip(&self, frame_index: u64) -> bool {
        self.current > 0 && frame_index % u64::from(self.current + 1) != 0
    }

    /// Feeds back the measured processing time and motion estimate for a
    /// frame that was *not* skipped, advancing the rate by at most one step.
    pub fn record(&mut self, elapsed: Duration, motion: f64) {
        if elapsed > self.target && motion < self.motion_threshold {
            self.current = (self.current + 1).min(self.max);
        } else if motion >= self.motion_threshold {
            self.current = self.current.saturating_sub(1).max(self.min);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn motion_estimate_is_zero_for_identical_frames() {
        let r = Raster::filled(4, 4, (50, 60, 70));
        assert_eq!(motion_estimate(&r, &r), 0.0);
    }

    #[test]
    fn motion_estimate_is_positive_for_different_frames() {
        let a = Raster::filled(4, 4, (0, 0, 0));
        let b = Raster::filled(4, 4, (255, 255, 255));
        assert!(motion_estimate(&a, &b) > 0.0);
    }

    #[test]
    fn skip_rate_increases_when_over_budget_and_motion_is_low() {
        let mut ctl = SkipController::new(0, 5, 10.0, Duration::from_millis(10));
        ctl.record(Duration::from_millis(50), 0.0);
        assert_eq!(ctl.current(), 1);
    }

    #[test]
    fn skip_rate_decreases_when_motion_is_high() {
        let mut ctl = SkipController::new(0, 5, 10.0, Duration::from_millis(10));
        ctl.current = 3;
        ctl.record(Duration::from_millis(50), 20.0);
        assert_eq!(ctl.current(), 2);
    }

    #[test]
    fn skip_rate_stays_within_bounds() {
        let mut ctl = SkipController::new(2, 2, 10.0, Duration::from_millis(10));
        ctl.record(Duration::from_millis(50), 0.0);
        assert_eq!(ctl.current(), 2);
    }
}
