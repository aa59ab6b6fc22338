//! Immutable scan tables (spec.md §3, §4.A): the lookup structure mapping
//! raster pixels to cell indices, loaded once from disk and shared
//! read-only across every thread that scans or renders.

mod format;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{Error, Result};

/// A loaded, validated set of scan tables. Construction always succeeds or
/// fails outright — there is no "uninitialized" runtime state to check:
/// an invalid file simply never produces a `ScanTables` (see DESIGN.md for
/// the rationale vs. spec.md's `isInitialized()` wording).
#[derive(Debug)]
pub struct ScanTables {
    map_width: i32,
    spiral_per: f32,
    length: i32,
    inner_length: i32,
    last_fovea_index: i32,
    last_cell_index: i32,
    outer_pixel_index: Vec<i32>,
    outer_pixel_cell_idx: Vec<i32>,
    inner_cells: Vec<(i32, i32)>,
}

/// Cheaply-cloned, atomically refcounted handle shared by worker threads,
/// the renderer, and the server without lifetime hazards (DESIGN.md,
/// "Shared immutable tables").
pub type ScanTablesHandle = Arc<ScanTables>;

impl ScanTables {
    pub fn load(path: impl AsRef<Path>) -> Result<ScanTablesHandle> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(Error::Io)?;
        Self::from_bytes(&bytes).map_err(|e| match e {
            Error::InvalidFormat { reason, .. } => {
                Error::InvalidFormat { path: path.to_path_buf(), reason }
            }
            other => other,
        })
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<ScanTablesHandle> {
        let raw = format::read_auto(bytes)?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: format::RawTables) -> Result<ScanTablesHandle> {
        let format::RawTables {
            map_width,
            spiral_per,
            length,
            inner_length,
            last_fovea_index,
            last_cell_index,
            outer_pixel_index,
            outer_pixel_cell_idx,
            inner_cells,
        } = raw;

        if length < 0 || outer_pixel_index.len() != length as usize {
            return Err(bad("outerPixelIndex", "length mismatch"));
        }
        if outer_pixel_cell_idx.len() != length as usize {
            return Err(bad("outerPixelCellIdx", "length mismatch"));
        }
        if inner_length < 0 || inner_cells.len() != inner_length as usize {
            return Err(bad("innerCells", "length mismatch"));
        }
        if !outer_pixel_index.windows(2).all(|w| w[0] < w[1]) {
            return Err(bad("outerPixelIndex", "not strictly increasing"));
        }

        // These parse fine at the byte-layout level but describe geometry no
        // scan or render could ever use; distinct from the format errors
        // above, which are about array shape rather than table validity.
        if map_width <= 0 {
            return Err(Error::InvalidTables("mapWidth must be positive"));
        }
        if !spiral_per.is_finite() || spiral_per <= 0.0 {
            return Err(Error::InvalidTables("spiralPer must be a positive, finite number"));
        }
        if last_fovea_index < -1 {
            return Err(Error::InvalidTables("lastFoveaIndex must be >= -1"));
        }
        if last_cell_index < last_fovea_index {
            return Err(Error::InvalidTables("lastCellIndex must be >= lastFoveaIndex"));
        }

        Ok(Arc::new(Self {
            map_width,
            spiral_per,
            length,
            inner_length,
            last_fovea_index,
            last_cell_index,
            outer_pixel_index,
            outer_pixel_cell_idx,
            inner_cells,
        }))
    }

    pub fn save(&self, path: impl AsRef<Path>, textual: bool) -> Result<()> {
        let raw = self.as_raw();
        let file = fs::File::create(path.as_ref())?;
        if textual {
            format::write_textual(file, &raw)
        } else {
            format::write_binary(file, &raw)
        }
    }

    fn as_raw(&self) -> format::RawTables {
        format::RawTables {
            map_width: self.map_width,
            spiral_per: self.spiral_per,
            length: self.length,
            inner_length: self.inner_length,
            last_fovea_index: self.last_fovea_index,
            last_cell_index: self.last_cell_index,
            outer_pixel_index: self.outer_pixel_index.clone(),
            outer_pixel_cell_idx: self.outer_pixel_cell_idx.clone(),
            inner_cells: self.inner_cells.clone(),
        }
    }

    pub const fn map_width(&self) -> i32 {
        self.map_width
    }

    pub const fn spiral_per(&self) -> f32 {
        self.spiral_per
    }

    pub const fn length(&self) -> i32 {
        self.length
    }

    pub const fn inner_length(&self) -> i32 {
        self.inner_length
    }

    pub const fn last_fovea_index(&self) -> i32 {
        self.last_fovea_index
    }

    pub const fn last_cell_index(&self) -> i32 {
        self.last_cell_index
    }

    pub fn outer_pixel_index(&self) -> &[i32] {
        &self.outer_pixel_index
    }

    pub fn outer_pixel_cell_idx(&self) -> &[i32] {
        &self.outer_pixel_cell_idx
    }

    pub fn inner_cells(&self) -> &[(i32, i32)] {
        &self.inner_cells
    }

    /// Closed-form scan radius `R = r0 * k^(length/P)`, used to derive the
    /// axis-aligned bounding box for a scan (spec.md §4.D). `length` here is
    /// the cell-count bound `lastCellIndex + 1` — the same quantity
    /// `LPXImage::new_empty` sizes its cell array to — not `self.length`,
    /// which is only the outer-pixel run-table size (spec.md §3).
    pub fn scan_radius(&self) -> f64 {
        let p = self.spiral_per as f64;
        let p_floor = (p + 0.5).floor();
        let pitch = 1.0 / p_floor;
        let k = crate::cell_math::SV_A * pitch + 1.0;
        let cell_count = self.last_cell_index as f64 + 1.0;
        crate::cell_math::R0 * k.powf(cell_count / p)
    }

    /// Synthesizes a minimal set of scan tables directly from the closed-form
    /// math, without a file on disk. Used as a fixture generator for tests
    /// and as the debug client's offline preview fallback (SPEC_FULL.md §B.1).
    pub fn synthesize(map_width: i32, spiral_per: f32, fovea_radius: i32) -> ScanTablesHandle {
        debug_assert!(map_width > 0 && fovea_radius >= 0);

        let half = map_width / 2;
        let mut inner_cells = Vec::new();
        for y in -fovea_radius..=fovea_radius {
            for x in -fovea_radius..=fovea_radius {
                if x * x + y * y <= fovea_radius * fovea_radius {
                    inner_cells.push((x, y));
                }
            }
        }
        let last_fovea_index = inner_cells.len() as i32 - 1;

        let mut runs_index = Vec::new();
        let mut runs_cell = Vec::new();
        let mut last_cell: i32 = -1;
        for y in -half..half {
            for x in -half..half {
                let flat = (y + half) * map_width + (x + half);
                let cell = crate::cell_math::cell_index(x as f64, y as f64, spiral_per as f64) as i32;
                if cell != last_cell {
                    runs_index.push(flat);
                    runs_cell.push(cell);
                    last_cell = cell;
                }
            }
        }
        let last_cell_index = runs_cell.iter().copied().max().unwrap_or(last_fovea_index);

        Arc::new(Self {
            map_width,
            spiral_per,
            length: runs_index.len() as i32,
            inner_length: inner_cells.len() as i32,
            last_fovea_index,
            last_cell_index,
            outer_pixel_index: runs_index,
            outer_pixel_cell_idx: runs_cell,
            inner_cells,
        })
    }
}

fn bad(what: &str, reason: &str) -> Error {
    Error::InvalidFormat { path: PathBuf::new(), reason: format!("{what}: {reason}") }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_raw() -> format::RawTables {
        format::RawTables {
            map_width: 8,
            spiral_per: 6.0,
            length: 3,
            inner_length: 1,
            last_fovea_index: 0,
            last_cell_index: 2,
            outer_pixel_index: vec![0, 4, 9],
            outer_pixel_cell_idx: vec![1, 2, 3],
            inner_cells: vec![(0, 0)],
        }
    }

    #[test]
    fn rejects_non_positive_map_width() {
        let mut raw = sample_raw();
        raw.map_width = 0;
        assert!(matches!(ScanTables::from_raw(raw), Err(Error::InvalidTables(_))));
    }

    #[test]
    fn rejects_last_cell_index_below_last_fovea_index() {
        let mut raw = sample_raw();
        raw.last_fovea_index = 5;
        raw.last_cell_index = 2;
        assert!(matches!(ScanTables::from_raw(raw), Err(Error::InvalidTables(_))));
    }

    #[test]
    fn rejects_non_monotonic_outer_index() {
        let mut raw = sample_raw();
        raw.outer_pixel_index = vec![0, 4, 4];
        assert!(ScanTables::from_raw(raw).is_err());
    }

    #[test]
    fn accepts_valid_tables() {
        let raw = sample_raw();
        let t = ScanTables::from_raw(raw).unwrap();
        assert_eq!(t.length(), 3);
        assert_eq!(t.outer_pixel_index(), &[0, 4, 9]);
    }

    #[test]
    fn rejects_length_mismatch() {
        let mut raw = sample_raw();
        raw.outer_pixel_cell_idx.pop();
        assert!(ScanTables::from_raw(raw).is_err());
    }

    #[test]
    fn binary_round_trips_through_save_load() {
        let raw = sample_raw();
        let t = ScanTables::from_raw(raw).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tables.lpxt");
        t.save(&path, false).unwrap();
        let loaded = ScanTables::load(&path).unwrap();
        assert_eq!(loaded.outer_pixel_index(), t.outer_pixel_index());
        assert_eq!(loaded.spiral_per(), t.spiral_per());
    }

    #[test]
    fn textual_round_trips_through_save_load() {
        let raw = sample_raw();
        let t = ScanTables::from_raw(raw).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tables.json");
        t.save(&path, true).unwrap();
        let loaded = ScanTables::load(&path).unwrap();
        assert_eq!(loaded.inner_cells(), t.inner_cells());
    }

    #[test]
    fn synthesized_tables_are_monotonic() {
        let t = ScanTables::synthesize(64, 32.0, 2);
        assert!(t.outer_pixel_index().windows(2).all(|w| w[0] < w[1]));
    }
}
