//! Accept and broadcast tasks (spec.md §4.F, §4.G). Sockets are blocking;
//! only command reads carry a timeout so the per-client reader can notice
//! shutdown (spec.md §5).

use std::io;
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::closing;
use crate::lpx_image::LPXImage;
use crate::protocol::{self, SteeringCommand};
use crate::queue::BlockingQueue;

const COMMAND_READ_TIMEOUT: Duration = Duration::from_millis(100);

struct Client {
    id: u64,
    writer: TcpStream,
}

/// Shared, mutex-guarded scan center updated by steering commands from any
/// client; last-write-wins, clamped to the raster bounds (spec.md §4.F).
pub struct Position {
    inner: Mutex<(f32, f32)>,
    bounds: (f32, f32),
}

impl Position {
    pub fn new(initial: (f32, f32), bounds: (f32, f32)) -> Arc<Self> {
        Arc::new(Self { inner: Mutex::new(initial), bounds })
    }

    pub fn get(&self) -> (f32, f32) {
        *self.inner.lock().expect("position lock poisoned")
    }

    pub(crate) fn apply(&self, cmd: SteeringCommand) {
        let mut pos = self.inner.lock().expect("position lock poisoned");
        pos.0 = (pos.0 + cmd.delta_x * cmd.step_size).clamp(0.0, self.bounds.0);
        pos.1 = (pos.1 + cmd.delta_y * cmd.step_size).clamp(0.0, self.bounds.1);
    }
}

/// The live client set. Writers hold the lock only while inserting or
/// removing a handle (spec.md §5, "Client set").
#[derive(Default)]
pub struct ClientSet {
    clients: Mutex<Vec<Client>>,
    next_id: AtomicU64,
}

impl ClientSet {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn count(&self) -> usize {
        self.clients.lock().expect("client set poisoned").len()
    }

    fn insert(&self, writer: TcpStream) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.clients.lock().expect("client set poisoned").push(Client { id, writer });
        id
    }

    fn remove(&self, id: u64) {
        self.clients.lock().expect("client set poisoned").retain(|c| c.id != id);
    }

    fn broadcast(&self, image: &LPXImage) {
        let mut clients = self.clients.lock().expect("client set poisoned");
        clients.retain_mut(|client| match protocol::write_frame(&client.writer, image) {
            Ok(()) => true,
            Err(e) => {
                warn!("client {} write failed, evicting: {e}", client.id);
                false
            }
        });
    }
}

/// Accepts connections until shutdown, enrolling each in `clients` and
/// spawning a per-client command reader that steers `position`.
pub fn accept_task(listener: TcpListener, clients: Arc<ClientSet>, position: Arc<Position>) {
    listener.set_nonblocking(false).ok();
    while !closing::closed() {
        match listener.accept() {
            Ok((stream, addr)) => {
                info!("client connected: {addr}");
                let reader = stream.try_clone().expect("tcp stream clone");
                let id = clients.insert(stream);
                let clients = clients.clone();
                let position = position.clone();
                std::thread::spawn(move || command_reader(id, reader, clients, position));
            }
            Err(e) if e.kind() == io::ErrorKind::TimedOut || e.kind() == io::ErrorKind::WouldBlock => {
                continue;
            }
            Err(e) => {
                if closing::closed() {
                    break;
                }
                warn!("accept failed: {e}");
            }
        }
    }
}

fn command_reader(id: u64, reader: TcpStream, clients: Arc<ClientSet>, position: Arc<Position>) {
    reader.set_read_timeout(Some(COMMAND_READ_TIMEOUT)).ok();
    loop {
        if closing::closed() {
            break;
        }
        match protocol::read_cmd_type(&reader) {
            Ok(crate::protocol::COMMAND_CMD) => match protocol::read_command_tail(&reader) {
                Ok(cmd) => position.apply(cmd),
                Err(e) => {
                    debug!("client {id} command read failed: {e}");
                    break;
                }
            },
            Ok(other) => {
                debug!("client {id} sent unknown cmdType {other:#x}, closing");
                break;
            }
            Err(e) => {
                if is_timeout(&e) {
                    continue;
                }
                debug!("client {id} disconnected: {e}");
                break;
            }
        }
    }
    clients.remove(id);
}

fn is_timeout(e: &crate::error::Error) -> bool {
    matches!(
        e,
        crate::error::Error::Io(inner)
            if inner.kind() == io::ErrorKind::WouldBlock || inner.kind() == io::ErrorKind::TimedOut
    )
}

/// Pops finished frames and fans them out to every enrolled client.
pub fn broadcast_task(lpx_queue: Arc<BlockingQueue<LPXImage>>, clients: Arc<ClientSet>) {
    while let Some(image) = lpx_queue.pop() {
        clients.broadcast(&image);
        if closing::closed() {
            break;
        }
    }
}
