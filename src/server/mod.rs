//! Streaming server pipeline (spec.md §4.F): capture → process → network
//! broadcast, plus per-client command intake. Four cooperating long-lived
//! threads, the same shutdown discipline as [`crate::closing`] (a process-
//! wide `running` flag, join-on-stop, no lock held across blocking I/O).

pub mod capture;
pub mod network;
pub mod process;

use std::net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::closing;
use crate::error::{Error, Result};
use crate::lpx_image::LPXImage;
use crate::queue::{BlockingQueue, DropOldestQueue};
use crate::raster::Raster;
use crate::scan_cache::{ScanCache, ScanCacheHandle};
use crate::scan_tables::ScanTablesHandle;

pub use capture::FrameSource;
pub use network::{ClientSet, Position};
pub use process::SkipController;

const FRAME_QUEUE_CAPACITY: usize = 4;
const LPX_QUEUE_CAPACITY: usize = 4;

/// Tuning knobs for the camera variant's adaptive skip controller
/// (spec.md §6, `--min-skip`/`--max-skip`/`--motion-threshold`).
#[derive(Debug, Clone, Copy)]
pub struct SkipConfig {
    pub min_skip: u32,
    pub max_skip: u32,
    pub motion_threshold: f64,
    pub target: Duration,
}

impl Default for SkipConfig {
    fn default() -> Self {
        Self { min_skip: 0, max_skip: 8, motion_threshold: 8.0, target: Duration::from_millis(16) }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ServerState {
    Stopped,
    Running,
}

#[derive(Debug, Clone, Copy)]
pub struct ServerStats {
    pub client_count: usize,
}

/// Owns the queues, client set, and worker threads for one run of the
/// pipeline. `start`/`stop` transition `Stopped -> Running -> Stopped`;
/// `stop` is idempotent (spec.md §4.F "Lifecycle").
pub struct Server {
    tables: ScanTablesHandle,
    cache: ScanCacheHandle,
    state: Mutex<ServerState>,
    clients: Arc<ClientSet>,
    position: Arc<Position>,
    threads: Vec<JoinHandle<()>>,
    listener: Option<TcpListener>,
}

impl Server {
    pub fn new(tables: ScanTablesHandle, width: u32, height: u32) -> Self {
        let cache = ScanCache::build(&tables);
        Self {
            tables,
            cache,
            state: Mutex::new(ServerState::Stopped),
            clients: ClientSet::new(),
            position: Position::new((width as f32 / 2.0, height as f32 / 2.0), (width as f32, height as f32)),
            threads: Vec::new(),
            listener: None,
        }
    }

    pub fn client_count(&self) -> usize {
        self.clients.count()
    }

    pub fn stats(&self) -> ServerStats {
        ServerStats { client_count: self.client_count() }
    }

    /// Binds the listening socket and spawns the four pipeline threads.
    /// `source` drives the capture task; `skip_cfg` only matters for
    /// sources where skipping is meaningful (the camera variant).
    pub fn start(
        &mut self,
        port: u16,
        mut source: Box<dyn FrameSource>,
        skip_cfg: SkipConfig,
    ) -> Result<()> {
        let mut state = self.state.lock().expect("server state poisoned");
        if *state == ServerState::Running {
            return Ok(());
        }

        let listener = TcpListener::bind(("0.0.0.0", port))
            .map_err(|e| Error::Network(format!("bind 0.0.0.0:{port}: {e}")))?;
        listener.set_nonblocking(false).ok();

        let frame_queue: Arc<DropOldestQueue<Raster>> = Arc::new(DropOldestQueue::new(FRAME_QUEUE_CAPACITY));
        let lpx_queue: Arc<BlockingQueue<LPXImage>> = Arc::new(BlockingQueue::new(LPX_QUEUE_CAPACITY));

        let accept_listener = listener
            .try_clone()
            .map_err(|e| Error::Network(format!("clone listening socket: {e}")))?;
        let clients = self.clients.clone();
        let position = self.position.clone();
        let accept_handle =
            std::thread::spawn(move || network::accept_task(accept_listener, clients, position));

        let broadcast_clients = self.clients.clone();
        let broadcast_queue = lpx_queue.clone();
        let broadcast_handle =
            std::thread::spawn(move || network::broadcast_task(broadcast_queue, broadcast_clients));

        let capture_queue = frame_queue.clone();
        let capture_handle = std::thread::spawn(move || capture_task(source.as_mut(), &capture_queue));

        let tables = self.tables.clone();
        let cache = self.cache.clone();
        let process_position = self.position.clone();
        let process_handle = std::thread::spawn(move || {
            processing_task(tables, cache, frame_queue, lpx_queue, process_position, skip_cfg)
        });

        self.threads = vec![accept_handle, broadcast_handle, capture_handle, process_handle];
        self.listener = Some(listener);
        *state = ServerState::Running;
        info!("server started on port {port}");
        Ok(())
    }

    /// Flips the shutdown flag, unblocks every suspension point, and joins
    /// all four threads. Calling `stop` on an already-stopped server is a
    /// no-op.
    pub fn stop(&mut self) {
        let mut state = self.state.lock().expect("server state poisoned");
        if *state == ServerState::Stopped {
            return;
        }
        closing::close();
        if let Some(listener) = self.listener.take() {
            // A blocking `TcpListener::accept()` does not wake up just
            // because the shutdown flag flipped or a dup'd fd got dropped —
            // it only returns on an actual incoming connection. Connect a
            // throwaway loopback socket to kick the accept thread out of
            // `accept()`; it re-checks `closing::closed()` on the next loop
            // iteration and exits.
            if let Ok(addr) = listener.local_addr() {
                let wake_addr = SocketAddr::new(Ipv4Addr::LOCALHOST.into(), addr.port());
                let _ = TcpStream::connect_timeout(&wake_addr, Duration::from_millis(200));
            }
            drop(listener);
        }
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                warn!("a server thread panicked during shutdown");
            }
        }
        *state = ServerState::Stopped;
        info!("server stopped");
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.stop();
    }
}

fn capture_task(source: &mut dyn FrameSource, queue: &DropOldestQueue<Raster>) {
    while !closing::closed() {
        match source.pull() {
            Some(frame) => {
                queue.push(frame);
            }
            None => break,
        }
    }
    queue.close();
}

#[allow(clippy::too_many_arguments)]
fn processing_task(
    tables: ScanTablesHandle,
    cache: ScanCacheHandle,
    frame_queue: Arc<DropOldestQueue<Raster>>,
    lpx_queue: Arc<BlockingQueue<LPXImage>>,
    position: Arc<Position>,
    skip_cfg: SkipConfig,
) {
    let mut controller = SkipController::new(skip_cfg.min_skip, skip_cfg.max_skip, skip_cfg.motion_threshold, skip_cfg.target);
    let mut frame_index: u64 = 0;
    let mut previous: Option<Raster> = None;

    while let Some(raster) = frame_queue.pop() {
        if closing::closed() {
            break;
        }
        frame_index += 1;
        if controller.should_skip(frame_index) {
            previous = Some(raster);
            continue;
        }

        let (cx, cy) = position.get();
        let started = Instant::now();
        match process::process_frame(tables.clone(), &cache, &raster, cx, cy) {
            Ok(image) => {
                let elapsed = started.elapsed();
                let motion = previous.as_ref().map_or(0.0, |p| process::motion_estimate(p, &raster));
                controller.record(elapsed, motion);
                lpx_queue.push(image);
            }
            Err(e) => warn!("scan failed, dropping frame: {e}"),
        }
        previous = Some(raster);
    }
    lpx_queue.close();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan_tables::ScanTables;

    #[test]
    fn new_server_has_no_clients() {
        let tables = ScanTables::synthesize(16, 12.0, 1);
        let server = Server::new(tables, 64, 48);
        assert_eq!(server.stats().client_count, 0);
    }

    #[test]
    fn stop_before_start_is_a_harmless_no_op() {
        let tables = ScanTables::synthesize(16, 12.0, 1);
        let mut server = Server::new(tables, 64, 48);
        server.stop();
        server.stop();
    }

    #[test]
    fn position_clamps_to_bounds() {
        let position = Position::new((10.0, 10.0), (20.0, 20.0));
        position.apply(crate::protocol::SteeringCommand { delta_x: 100.0, delta_y: -100.0, step_size: 1.0 });
        assert_eq!(position.get(), (20.0, 0.0));
    }
}
