#[cfg(target_os = "linux")]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use lpx::raster::Raster;
use lpx::scan::scan_from_image;
use lpx::scan_cache::ScanCache;
use lpx::scan_tables::ScanTables;

static SIZES: &[u32] = &[256, 640, 1920];

fn checkerboard(width: u32, height: u32) -> Raster {
    let mut data = Vec::with_capacity(width as usize * height as usize * 3);
    for y in 0..height {
        for x in 0..width {
            let v = if (x / 8 + y / 8) % 2 == 0 { 220u8 } else { 30u8 };
            data.extend_from_slice(&[v, v, v]);
        }
    }
    Raster::new(width, height, data)
}

fn benchmark_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("scan_from_image");

    for &size in SIZES {
        let tables = ScanTables::synthesize(128, 63.0, 4);
        let cache = ScanCache::build(&tables);
        let raster = checkerboard(size, size);

        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| {
                scan_from_image(tables.clone(), &cache, &raster, size as f32 / 2.0, size as f32 / 2.0).unwrap()
            });
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_scan);
criterion_main!(benches);
