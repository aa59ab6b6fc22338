//! Multi-threaded pixel accumulation (spec.md §4.D). This is the
//! performance-critical path; partitioning and accumulation follow the
//! teacher crate's rayon-based parallel resampling (`resample.rs`,
//! `pools/scanning.rs`) generalized from "resize an image" to "accumulate
//! pixels into foveated cells".

use rayon::prelude::*;

use crate::error::{Error, Result};
use crate::lpx_image::{LPXImage, pack};
use crate::raster::Raster;
use crate::scan_cache::{OUT_OF_RANGE, ScanCacheHandle};
use crate::scan_tables::ScanTablesHandle;
use crate::{cell_math, closing};

/// Per-thread accumulator shard. Kept separate per worker and merged once at
/// finalize so no lock is held across the hot pixel loop (DESIGN.md,
/// "Per-cell atomic accumulators vs thread-local shards").
struct Shard {
    acc_r: Vec<u64>,
    acc_g: Vec<u64>,
    acc_b: Vec<u64>,
    count: Vec<u32>,
}

impl Shard {
    fn new(length: usize) -> Self {
        Self {
            acc_r: vec![0; length],
            acc_g: vec![0; length],
            acc_b: vec![0; length],
            count: vec![0; length],
        }
    }

    fn add(&mut self, cell: usize, r: u8, g: u8, b: u8) {
        self.acc_r[cell] += u64::from(r);
        self.acc_g[cell] += u64::from(g);
        self.acc_b[cell] += u64::from(b);
        self.count[cell] += 1;
    }

    fn merge_into(self, into: &mut Self) {
        for i in 0..into.count.len() {
            into.acc_r[i] += self.acc_r[i];
            into.acc_g[i] += self.acc_g[i];
            into.acc_b[i] += self.acc_b[i];
            into.count[i] += self.count[i];
        }
    }
}

/// Scans `raster`, centered at `(cx, cy)`, into a new [`LPXImage`] using
/// `tables`/`cache`. Deterministic regardless of the number of worker
/// threads rayon happens to use (spec.md §8 property 1).
pub fn scan_from_image(
    tables: ScanTablesHandle,
    cache: &ScanCacheHandle,
    raster: &Raster,
    cx: f32,
    cy: f32,
) -> Result<LPXImage> {
    if raster.is_empty() {
        return Err(Error::EmptyInput);
    }

    let mut image = LPXImage::new_empty(tables.clone(), raster.width() as i32, raster.height() as i32);
    image.set_position(cx, cy);
    let length = image.length();

    let radius = tables.scan_radius();
    if let Some((x0, y0, x1, y1)) = bounding_box(raster, cx, cy, radius) {
        let rows: Vec<i64> = (y0..y1).collect();
        let n_strips = std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get);
        let chunk_len = rows.len().div_ceil(n_strips).max(1);

        let merged = rows
            .par_chunks(chunk_len)
            .map(|strip| accumulate_strip(strip, x0, x1, raster, cache, &tables, cx, cy, length))
            .reduce(
                || Shard::new(length),
                |mut a, b| {
                    b.merge_into(&mut a);
                    a
                },
            );

        for i in 0..length {
            if merged.count[i] > 0 {
                let r = (merged.acc_r[i] / u64::from(merged.count[i])) as u8;
                let g = (merged.acc_g[i] / u64::from(merged.count[i])) as u8;
                let b = (merged.acc_b[i] / u64::from(merged.count[i])) as u8;
                image.cell_array_mut()[i] = pack(r, g, b);
            }
        }
    }

    scan_fovea(&mut image, raster, cx, cy, length);

    Ok(image)
}

/// Axis-aligned scan rectangle, clipped to the raster bounds. `None` if the
/// center lies far enough outside the raster that no pixel is in range —
/// this is a valid, zero-filled result, not an error (spec.md §4.D).
fn bounding_box(raster: &Raster, cx: f32, cy: f32, radius: f64) -> Option<(i64, i64, i64, i64)> {
    let x0 = ((cx as f64 - radius).floor() as i64).max(0);
    let y0 = ((cy as f64 - radius).floor() as i64).max(0);
    let x1 = ((cx as f64 + radius).ceil() as i64).min(raster.width() as i64);
    let y1 = ((cy as f64 + radius).ceil() as i64).min(raster.height() as i64);
    if x1 <= x0 || y1 <= y0 { None } else { Some((x0, y0, x1, y1)) }
}

#[allow(clippy::too_many_arguments)]
fn accumulate_strip(
    rows: &[i64],
    x0: i64,
    x1: i64,
    raster: &Raster,
    cache: &ScanCacheHandle,
    tables: &ScanTablesHandle,
    cx: f32,
    cy: f32,
    length: usize,
) -> Shard {
    let mut shard = Shard::new(length);
    let cxi = cx.round() as i64;
    let cyi = cy.round() as i64;
    let spiral_per = tables.spiral_per() as f64;
    let last_fovea = tables.last_fovea_index();

    for &y in rows {
        if closing::closed() {
            break;
        }
        for x in x0..x1 {
            let sx = x - cxi;
            let sy = y - cyi;

            let cell = if cache.in_range(sx as i32, sy as i32) {
                let looked_up = cache.lookup(sx as i32, sy as i32);
                if looked_up == OUT_OF_RANGE {
                    continue;
                }
                looked_up as i32
            } else {
                cell_math::cell_index(sx as f64, sy as f64, spiral_per) as i32
            };

            if cell <= last_fovea || cell as usize >= length {
                continue;
            }

            let (r, g, b) = raster.pixel(x as u32, y as u32);
            shard.add(cell as usize, r, g, b);
        }
    }
    shard
}

fn scan_fovea(image: &mut LPXImage, raster: &Raster, cx: f32, cy: f32, length: usize) {
    let tables = image.tables().clone();
    let cxi = cx.round() as i64;
    let cyi = cy.round() as i64;

    for (i, &(dx, dy)) in tables.inner_cells().iter().enumerate() {
        if i >= length {
            break;
        }
        let px = cxi + dx as i64;
        let py = cyi + dy as i64;
        if raster.contains(px, py) {
            let (r, g, b) = raster.pixel(px as u32, py as u32);
            image.cell_array_mut()[i] = pack(r, g, b);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan_cache::ScanCache;
    use crate::scan_tables::ScanTables;

    #[test]
    fn empty_raster_is_an_error() {
        let tables = ScanTables::synthesize(32, 16.0, 1);
        let cache = ScanCache::build(&tables);
        let raster = Raster::new(0, 0, Vec::new());
        assert!(matches!(scan_from_image(tables, &cache, &raster, 0.0, 0.0), Err(Error::EmptyInput)));
    }

    #[test]
    fn solid_color_raster_conserves_average() {
        let tables = ScanTables::synthesize(64, 32.0, 2);
        let cache = ScanCache::build(&tables);
        let raster = Raster::filled(64, 64, (128, 64, 32));
        let image = scan_from_image(tables, &cache, &raster, 32.0, 32.0).unwrap();

        let mut checked_any = false;
        for i in 0..image.length() {
            if let Some(word) = image.get_cell_value(i) {
                if word != 0 {
                    let (r, g, b, _) = crate::lpx_image::unpack(word);
                    assert!(r.abs_diff(128) <= 1);
                    assert!(g.abs_diff(64) <= 1);
                    assert!(b.abs_diff(32) <= 1);
                    checked_any = true;
                }
            }
        }
        assert!(checked_any, "expected at least one covered cell");
    }

    #[test]
    fn center_far_outside_raster_yields_zero_filled_output() {
        let tables = ScanTables::synthesize(32, 16.0, 1);
        let cache = ScanCache::build(&tables);
        let raster = Raster::filled(16, 16, (200, 10, 10));
        let image = scan_from_image(tables, &cache, &raster, 1_000_000.0, 1_000_000.0).unwrap();
        assert!(image.cell_array().iter().all(|&c| c == 0));
    }
}
