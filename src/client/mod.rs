//! Debug client (spec.md §4.H): connects to a server, renders delivered
//! frames, and submits rate-limited steering commands under the
//! frame-synchronized credit discipline.

use std::io::BufWriter;
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::closing;
use crate::error::Result;
use crate::lpx_image::LPXImage;
use crate::protocol::{self, SteeringCommand};
use crate::raster::Raster;
use crate::render::{self, CellWindow};
use crate::scan_tables::ScanTablesHandle;

/// Minimum interval between accepted key-input steering attempts
/// (spec.md §4.H, "A key throttle (default ~16 ms)").
pub const DEFAULT_KEY_THROTTLE: Duration = Duration::from_millis(16);

/// Whether a steering attempt went out immediately or was coalesced into
/// the pending slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    Queued,
}

/// Enforces the one-command-per-frame rule: a credit flag set by the
/// receive task after each delivered frame, and a single "most recent
/// wins" pending slot when no credit is available (spec.md §4.H).
struct Credit {
    can_send: AtomicBool,
    pending: Mutex<Option<SteeringCommand>>,
}

impl Credit {
    fn new() -> Self {
        Self { can_send: AtomicBool::new(false), pending: Mutex::new(None) }
    }
}

/// A connected debug client: one receive thread parses and renders frames,
/// the caller's thread submits steering attempts through [`Client::steer`].
pub struct Client {
    writer: Mutex<BufWriter<TcpStream>>,
    credit: Arc<Credit>,
    last_key_attempt: Mutex<Option<Instant>>,
    key_throttle: Duration,
    latest_frame: Arc<Mutex<Option<Raster>>>,
    latest_image: Arc<Mutex<Option<LPXImage>>>,
}

impl Client {
    /// Connects to `server:port`, spawning the receive/render thread.
    /// `on_frame` is invoked with each rendered raster as it arrives;
    /// `window` optionally restricts rendering to a cell range.
    pub fn connect(
        server: &str,
        port: u16,
        tables: ScanTablesHandle,
        render_size: (u32, u32),
        scale: f32,
        window: Option<CellWindow>,
        on_frame: impl Fn(&Raster) + Send + 'static,
    ) -> Result<Self> {
        let stream = TcpStream::connect((server, port))
            .map_err(|e| crate::error::Error::Network(format!("connect to {server}:{port}: {e}")))?;
        let reader = stream
            .try_clone()
            .map_err(|e| crate::error::Error::Network(format!("clone socket: {e}")))?;
        let writer = stream;

        let credit = Arc::new(Credit::new());
        let latest_frame = Arc::new(Mutex::new(None));
        let latest_image = Arc::new(Mutex::new(None));

        let recv_credit = credit.clone();
        let recv_writer = writer
            .try_clone()
            .map_err(|e| crate::error::Error::Network(format!("clone socket: {e}")))?;
        let recv_latest = latest_frame.clone();
        let recv_latest_image = latest_image.clone();
        std::thread::spawn(move || {
            receive_loop(
                reader,
                tables,
                render_size,
                scale,
                window,
                recv_credit,
                recv_writer,
                recv_latest,
                recv_latest_image,
                on_frame,
            )
        });

        Ok(Self {
            writer: Mutex::new(BufWriter::new(writer)),
            credit,
            last_key_attempt: Mutex::new(None),
            key_throttle: DEFAULT_KEY_THROTTLE,
            latest_frame,
            latest_image,
        })
    }

    pub fn latest_frame(&self) -> Option<Raster> {
        self.latest_frame.lock().expect("latest frame lock poisoned").clone()
    }

    /// The most recently received raw cell array, for `--save` (SPEC_FULL.md §B.2).
    pub fn latest_image(&self) -> Option<LPXImage> {
        self.latest_image.lock().expect("latest image lock poisoned").clone()
    }

    /// A steering attempt gated by the ~16 ms key-input throttle
    /// (spec.md §4.H). Returns `None` if the attempt was dropped by the
    /// throttle before even reaching the credit logic.
    pub fn steer_throttled(&self, cmd: SteeringCommand) -> Option<SendOutcome> {
        let mut last = self.last_key_attempt.lock().expect("throttle lock poisoned");
        let now = Instant::now();
        if let Some(prev) = *last {
            if now.duration_since(prev) < self.key_throttle {
                return None;
            }
        }
        *last = Some(now);
        Some(self.steer(cmd))
    }

    /// The one-command-per-frame rule itself, independent of the key
    /// throttle: send immediately if credited, otherwise coalesce into the
    /// pending slot (spec.md §4.H).
    pub fn steer(&self, cmd: SteeringCommand) -> SendOutcome {
        if self.credit.can_send.swap(false, Ordering::AcqRel) {
            if let Err(e) = self.send(cmd) {
                warn!("failed to send steering command: {e}");
            }
            SendOutcome::Sent
        } else {
            *self.credit.pending.lock().expect("pending slot poisoned") = Some(cmd);
            SendOutcome::Queued
        }
    }

    /// Fails fast with [`crate::error::Error::ShuttingDown`] rather than
    /// attempting a write that the shutdown path may already be tearing
    /// down, instead of silently dropping the command.
    fn send(&self, cmd: SteeringCommand) -> Result<()> {
        if closing::closed() {
            return Err(crate::error::Error::ShuttingDown);
        }
        let mut writer = self.writer.lock().expect("writer lock poisoned");
        protocol::write_command(&mut *writer, cmd)?;
        use std::io::Write;
        writer.flush().map_err(crate::error::Error::Io)?;
        Ok(())
    }
}

#[allow(clippy::too_many_arguments)]
fn receive_loop(
    reader: TcpStream,
    tables: ScanTablesHandle,
    render_size: (u32, u32),
    scale: f32,
    window: Option<CellWindow>,
    credit: Arc<Credit>,
    writer: TcpStream,
    latest_frame: Arc<Mutex<Option<Raster>>>,
    latest_image: Arc<Mutex<Option<LPXImage>>>,
    on_frame: impl Fn(&Raster),
) {
    loop {
        if closing::closed() {
            break;
        }
        let image = match protocol::read_frame(tables.clone(), &reader) {
            Ok(image) => image,
            Err(e) => {
                info!("server connection closed: {e}");
                break;
            }
        };

        let raster = render::render(&image, render_size.0, render_size.1, scale, window);
        on_frame(&raster);
        *latest_frame.lock().expect("latest frame lock poisoned") = Some(raster);
        *latest_image.lock().expect("latest image lock poisoned") = Some(image);

        credit.can_send.store(true, Ordering::Release);
        let pending = credit.pending.lock().expect("pending slot poisoned").take();
        if let Some(cmd) = pending {
            if credit.can_send.swap(false, Ordering::AcqRel) {
                if closing::closed() {
                    debug!("dropping pending steering command: {}", crate::error::Error::ShuttingDown);
                } else {
                    let mut w = writer.try_clone().expect("tcp stream clone");
                    if let Err(e) = protocol::write_command(&mut w, cmd) {
                        warn!("failed to flush pending steering command: {e}");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan_tables::ScanTables;

    #[test]
    fn fresh_credit_has_no_pending_command() {
        let credit = Credit::new();
        assert!(!credit.can_send.load(Ordering::Acquire));
        assert!(credit.pending.lock().unwrap().is_none());
    }

    #[test]
    fn empty_image_is_sized_to_last_cell_index_not_run_table_length() {
        let tables = ScanTables::synthesize(8, 6.0, 1);
        let image = LPXImage::new_empty(tables.clone(), 0, 0);
        assert_eq!(image.length(), tables.last_cell_index() as usize + 1);
    }
}
