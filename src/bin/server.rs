//! Streaming server binary (spec.md §6, server CLI surface).

#[cfg(target_os = "linux")]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{ArgGroup, Parser};
use log::{error, info};
use lpx::scan_tables::ScanTables;
use lpx::server::capture::{CameraSource, FileSource, FrameSource};
use lpx::server::{Server, SkipConfig};

#[derive(Debug, Parser)]
#[command(name = "lpx-server", about = "Streams a log-polar transform over TCP")]
#[command(group(ArgGroup::new("source").args(["camera_id", "video_file"]).required(true)))]
struct Opt {
    /// Path to a scan-tables file (binary or textual, auto-detected).
    #[arg(long)]
    scan_tables: PathBuf,

    /// TCP port to listen on.
    #[arg(long, default_value_t = 5050)]
    port: u16,

    /// Numeric camera device id. Exclusive with --video-file.
    #[arg(long)]
    camera_id: Option<i32>,

    /// Raw-frame container to stream instead of a camera. Exclusive with --camera-id.
    #[arg(long)]
    video_file: Option<PathBuf>,

    /// Source raster width.
    #[arg(long, default_value_t = 640)]
    width: u32,

    /// Source raster height.
    #[arg(long, default_value_t = 480)]
    height: u32,

    /// Playback frame rate. Only meaningful with --video-file.
    #[arg(long, default_value_t = 30.0, requires = "video_file")]
    fps: f64,

    /// Loop the video file instead of stopping at the end. Only meaningful with --video-file.
    #[arg(long, requires = "video_file")]
    r#loop: bool,

    /// Minimum adaptive skip rate (camera variant).
    #[arg(long, default_value_t = 0)]
    min_skip: u32,

    /// Maximum adaptive skip rate (camera variant).
    #[arg(long, default_value_t = 8)]
    max_skip: u32,

    /// Motion threshold above which the skip rate is pulled back down.
    #[arg(long, default_value_t = 8.0)]
    motion_threshold: f64,
}

fn main() -> ExitCode {
    lpx::elapsedlogger::init_logging();
    lpx::closing::install_signal_handlers();

    let opt = Opt::parse();

    let tables = match ScanTables::load(&opt.scan_tables) {
        Ok(t) => t,
        Err(e) => {
            error!("failed to load scan tables: {e}");
            return ExitCode::from(2);
        }
    };

    let source: Box<dyn FrameSource> = if let Some(path) = &opt.video_file {
        match FileSource::open(path, opt.fps, opt.r#loop) {
            Ok(s) => Box::new(s),
            Err(e) => {
                error!("failed to open video file: {e}");
                return ExitCode::from(3);
            }
        }
    } else {
        // Camera acquisition is an external collaborator (spec.md §1); this
        // pull callback is a placeholder returning black frames until the
        // caller wires in a real capture backend.
        let (width, height) = (opt.width, opt.height);
        Box::new(CameraSource::new(move || Some(lpx::raster::Raster::filled(width, height, (0, 0, 0)))))
    };

    let skip_cfg = SkipConfig {
        min_skip: opt.min_skip,
        max_skip: opt.max_skip,
        motion_threshold: opt.motion_threshold,
        target: Duration::from_millis(16),
    };

    let mut server = Server::new(tables, opt.width, opt.height);
    if let Err(e) = server.start(opt.port, source, skip_cfg) {
        error!("failed to start server: {e}");
        return ExitCode::from(3);
    }

    info!("listening on port {}", opt.port);
    while !lpx::closing::closed() {
        lpx::closing::wait_timeout(Duration::from_millis(200));
    }

    server.stop();
    ExitCode::SUCCESS
}
