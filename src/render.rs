//! Inverts the log-polar transform back to a raster at arbitrary scale
//! (spec.md §4.E). Parallelized over output rows the same way the teacher
//! crate's `resample.rs` parallelizes image resizing.

use std::collections::HashMap;
use std::sync::Mutex;

use once_cell::sync::Lazy;
use rayon::prelude::*;

use crate::cell_math;
use crate::lpx_image::{LPXImage, unpack};
use crate::raster::Raster;
use crate::scan_cache::{OUT_OF_RANGE, ScanCache, ScanCacheHandle};

/// One scan cache per encountered `spiralPer`, reused across renders at
/// `scale == 1.0` instead of recomputing the closed form per pixel
/// (SPEC_FULL.md §B.3).
static CACHE_BY_SPIRAL: Lazy<Mutex<HashMap<u32, ScanCacheHandle>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

fn cached_scan_cache(image: &LPXImage) -> ScanCacheHandle {
    let key = image.spiral_per().to_bits();
    let mut map = CACHE_BY_SPIRAL.lock().expect("renderer cache poisoned");
    map.entry(key).or_insert_with(|| ScanCache::build(image.tables())).clone()
}

/// Optional window restricting which cells are drawn; cells outside the
/// window render as black, same as cells past `length - 1`.
#[derive(Clone, Copy, Debug)]
pub struct CellWindow {
    pub offset: usize,
    pub range: usize,
}

pub fn render(
    image: &LPXImage,
    width: u32,
    height: u32,
    scale: f32,
    window: Option<CellWindow>,
) -> Raster {
    let length = image.length();
    let x_ofs = image.x_ofs();
    let y_ofs = image.y_ofs();
    let spiral_per = image.spiral_per() as f64;

    let cache = if (scale - 1.0).abs() < f32::EPSILON { Some(cached_scan_cache(image)) } else { None };

    let mut data = vec![0u8; width as usize * height as usize * 3];

    data.par_chunks_mut(width as usize * 3).enumerate().for_each(|(v, row)| {
        for u in 0..width as usize {
            let sx = (u as f32 - width as f32 / 2.0) / scale - x_ofs;
            let sy = (v as f32 - height as f32 / 2.0) / scale - y_ofs;

            let cell = if let Some(cache) = &cache {
                if cache.in_range(sx.round() as i32, sy.round() as i32) {
                    cache.lookup(sx.round() as i32, sy.round() as i32)
                } else {
                    cell_math::cell_index(sx as f64, sy as f64, spiral_per)
                }
            } else {
                cell_math::cell_index(sx as f64, sy as f64, spiral_per)
            };

            let in_window = match window {
                Some(w) => (cell as usize) >= w.offset && (cell as usize) < w.offset + w.range,
                None => true,
            };
            let visible = cell != OUT_OF_RANGE && (cell as usize) < length && in_window;

            let (r, g, b) = if visible {
                let word = image.get_cell_value(cell as usize).unwrap_or(0);
                let (r, g, b, _) = unpack(word);
                (r, g, b)
            } else {
                (0, 0, 0)
            };

            row[u * 3] = r;
            row[u * 3 + 1] = g;
            row[u * 3 + 2] = b;
        }
    });

    Raster::new(width, height, data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::scan_from_image;
    use crate::scan_cache::ScanCache as Cache;
    use crate::scan_tables::ScanTables;

    #[test]
    fn fovea_round_trips_at_scale_one() {
        let tables = ScanTables::synthesize(64, 32.0, 3);
        let cache = Cache::build(&tables);
        let raster = Raster::filled(64, 64, (128, 128, 128));
        let image = scan_from_image(tables, &cache, &raster, 32.0, 32.0).unwrap();

        let rendered = render(&image, 64, 64, 1.0, None);
        assert_eq!(rendered.pixel(32, 32), (128, 128, 128));
    }

    #[test]
    fn out_of_range_cells_paint_black() {
        let tables = ScanTables::synthesize(32, 16.0, 1);
        let cache = Cache::build(&tables);
        let raster = Raster::filled(32, 32, (10, 20, 30));
        let image = scan_from_image(tables, &cache, &raster, 16.0, 16.0).unwrap();

        let rendered = render(&image, 32, 32, 1.0, None);
        assert_eq!(rendered.pixel(0, 0), (0, 0, 0));
    }
}
