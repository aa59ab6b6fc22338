//! Flat pixel-to-cell lookup table derived from [`ScanTables`] (spec.md §3).
//! Built once per process and thereafter read-only, shared the same way as
//! the tables it was built from.

use std::sync::Arc;

use crate::scan_tables::ScanTables;

/// Sentinel cell index meaning "outside the mapped range".
pub const OUT_OF_RANGE: u32 = u32::MAX;

pub struct ScanCache {
    map_width: i32,
    pixel_to_cell_lut: Vec<u32>,
}

pub type ScanCacheHandle = Arc<ScanCache>;

impl ScanCache {
    /// Expands the `outerPixelIndex` / `outerPixelCellIdx` run-length
    /// encoding into a direct `mapWidth * mapWidth` lookup table.
    pub fn build(tables: &ScanTables) -> ScanCacheHandle {
        let map_width = tables.map_width();
        let total = (map_width as i64 * map_width as i64).max(0) as usize;
        let mut lut = vec![OUT_OF_RANGE; total];

        let idx = tables.outer_pixel_index();
        let cell = tables.outer_pixel_cell_idx();

        for slot in lut.iter_mut().enumerate().take(total) {
            let (flat, out) = slot;
            let flat = flat as i32;
            // Largest run whose start is <= flat.
            let run = match idx.binary_search(&flat) {
                Ok(i) => Some(i),
                Err(0) => None,
                Err(i) => Some(i - 1),
            };
            if let Some(run) = run {
                *out = cell[run] as u32;
            }
        }

        Arc::new(Self { map_width, pixel_to_cell_lut: lut })
    }

    pub const fn map_width(&self) -> i32 {
        self.map_width
    }

    /// Looks up the cell index for a pixel offset `(sx, sy)` rooted at the
    /// map center, or [`OUT_OF_RANGE`] if outside the scan-map's bounds.
    pub fn lookup(&self, sx: i32, sy: i32) -> u32 {
        let half = self.map_width / 2;
        let x = sx + half;
        let y = sy + half;
        if x < 0 || y < 0 || x >= self.map_width || y >= self.map_width {
            return OUT_OF_RANGE;
        }
        self.pixel_to_cell_lut[(y * self.map_width + x) as usize]
    }

    /// Whether `(sx, sy)` falls within the cached map's range at all.
    pub fn in_range(&self, sx: i32, sy: i32) -> bool {
        let half = self.map_width / 2;
        let x = sx + half;
        let y = sy + half;
        x >= 0 && y >= 0 && x < self.map_width && y < self.map_width
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lut_matches_runs() {
        let raw = crate::scan_tables::ScanTables::synthesize(16, 12.0, 1);
        let cache = ScanCache::build(&raw);
        assert_eq!(cache.map_width(), 16);
        // Center pixel of the map should resolve to some in-range cell.
        assert!(cache.in_range(0, 0));
    }

    #[test]
    fn out_of_range_pixels_return_sentinel() {
        let raw = crate::scan_tables::ScanTables::synthesize(8, 6.0, 1);
        let cache = ScanCache::build(&raw);
        assert_eq!(cache.lookup(1000, 1000), OUT_OF_RANGE);
    }
}
