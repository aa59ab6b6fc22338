//! Debug client binary (spec.md §6, client CLI surface), with the
//! SPEC_FULL.md-supplemented `--save`/`--load` offline LPXImage modes.

#[cfg(target_os = "linux")]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use log::{error, info};
use lpx::client::Client;
use lpx::lpx_image::LPXImage;
use lpx::protocol::SteeringCommand;
use lpx::scan_tables::ScanTables;

#[derive(Debug, Parser)]
#[command(name = "lpx-client", about = "Connects to an lpx-server and renders the stream")]
struct Opt {
    /// Path to a scan-tables file (binary or textual, auto-detected).
    #[arg(long)]
    scan_tables: PathBuf,

    /// Server hostname or address.
    #[arg(long, default_value = "127.0.0.1")]
    server: String,

    /// Server port.
    #[arg(long, default_value_t = 5050)]
    port: u16,

    /// Render window size, e.g. "1280x720".
    #[arg(long, default_value = "640x480")]
    window_size: String,

    /// Render zoom factor.
    #[arg(long, default_value_t = 1.0)]
    scale: f32,

    /// Save the first received frame's cell array to this LPXImage file, then exit.
    #[arg(long)]
    save: Option<PathBuf>,

    /// Render a previously saved LPXImage file instead of connecting to a server.
    #[arg(long, conflicts_with_all = ["server", "save"])]
    load: Option<PathBuf>,
}

fn parse_window_size(s: &str) -> Option<(u32, u32)> {
    let (w, h) = s.split_once('x')?;
    Some((w.parse().ok()?, h.parse().ok()?))
}

fn main() -> ExitCode {
    lpx::elapsedlogger::init_logging();
    lpx::closing::install_signal_handlers();

    let opt = Opt::parse();
    let Some((width, height)) = parse_window_size(&opt.window_size) else {
        error!("--window-size must look like WIDTHxHEIGHT");
        return ExitCode::from(1);
    };

    let tables = match ScanTables::load(&opt.scan_tables) {
        Ok(t) => t,
        Err(e) => {
            error!("failed to load scan tables: {e}");
            return ExitCode::from(2);
        }
    };

    if let Some(path) = &opt.load {
        let image = match LPXImage::load_from_file(tables, path) {
            Ok(i) => i,
            Err(e) => {
                error!("failed to load LPXImage file: {e}");
                return ExitCode::from(3);
            }
        };
        let raster = lpx::render::render(&image, width, height, opt.scale, None);
        info!("rendered offline frame: {}x{}", raster.width(), raster.height());
        return ExitCode::SUCCESS;
    }

    let client = match Client::connect(&opt.server, opt.port, tables, (width, height), opt.scale, None, |_raster| {}) {
        Ok(c) => c,
        Err(e) => {
            error!("failed to connect to {}:{}: {e}", opt.server, opt.port);
            return ExitCode::from(3);
        }
    };

    if let Some(path) = &opt.save {
        return save_first_frame(&client, path);
    }

    // Demo steering loop: nudge the scan center slowly while connected.
    let demo_command = SteeringCommand { delta_x: 0.0, delta_y: 0.0, step_size: 1.0 };
    while !lpx::closing::closed() {
        client.steer_throttled(demo_command);
        lpx::closing::wait_timeout(Duration::from_millis(200));
    }

    ExitCode::SUCCESS
}

fn save_first_frame(client: &Client, path: &std::path::Path) -> ExitCode {
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    loop {
        if let Some(image) = client.latest_image() {
            return match image.save_to_file(path) {
                Ok(()) => {
                    info!("saved frame to {}", path.display());
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    error!("failed to save frame: {e}");
                    ExitCode::from(3)
                }
            };
        }
        if std::time::Instant::now() >= deadline || lpx::closing::closed() {
            error!("timed out waiting for a frame to save");
            return ExitCode::from(3);
        }
        lpx::closing::wait_timeout(Duration::from_millis(50));
    }
}
