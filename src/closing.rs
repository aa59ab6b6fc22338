// Adapted from the teacher crate's closing::mod shutdown coordinator.
use std::marker::PhantomData;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use once_cell::sync::Lazy;

static CLOSED: Lazy<Arc<AtomicBool>> = Lazy::new(|| Arc::new(AtomicBool::new(false)));
static CLOSE_SIGNAL: Lazy<(Mutex<bool>, Condvar)> =
    Lazy::new(|| (Mutex::new(false), Condvar::new()));

/// Held by a spawned thread for its whole lifetime. If it is dropped without
/// [`close`] having been observed first and the thread isn't already
/// unwinding, something exited early without going through the shutdown
/// path, which is a programmer error worth shouting about.
#[derive(Default)]
pub struct CloseOnDrop {
    _not_send_sync: PhantomData<Rc<()>>,
}

impl Drop for CloseOnDrop {
    fn drop(&mut self) {
        if !closed() && !std::thread::panicking() {
            let name = std::thread::current().name().unwrap_or("unnamed").to_string();
            error!("{name} exited without closing::close() being called; forcing shutdown");
            close();
        }
    }
}

/// True once [`close`] has been called at least once.
pub fn closed() -> bool {
    CLOSED.load(Ordering::Acquire)
}

/// Sets the shared shutdown flag and wakes every thread blocked in
/// [`wait_timeout`]. Returns `true` the first time it is called; subsequent
/// calls are idempotent no-ops, matching the `stop` lifecycle in spec.md §4.F.
pub fn close() -> bool {
    if CLOSED.swap(true, Ordering::AcqRel) {
        return false;
    }
    let (lock, cvar) = &*CLOSE_SIGNAL;
    let mut g = lock.lock().expect("close signal mutex poisoned");
    *g = true;
    cvar.notify_all();
    true
}

/// Blocks up to `timeout`, waking early if [`close`] is called. Used by
/// suspension points (queue waits, socket read timeouts) so every blocking
/// call can notice shutdown promptly, as required by spec.md §5.
pub fn wait_timeout(timeout: Duration) {
    if closed() {
        return;
    }
    let (lock, cvar) = &*CLOSE_SIGNAL;
    let g = lock.lock().expect("close signal mutex poisoned");
    let _ = cvar.wait_timeout_while(g, timeout, |done| !*done);
}

#[cfg(target_family = "unix")]
pub fn install_signal_handlers() {
    use std::thread;

    use signal_hook::consts::TERM_SIGNALS;
    use signal_hook::iterator::SignalsInfo;
    use signal_hook::iterator::exfiltrator::SignalOnly;

    thread::Builder::new()
        .name("signals".into())
        .spawn(|| {
            let _cod = CloseOnDrop::default();
            for sig in TERM_SIGNALS {
                drop(signal_hook::flag::register_conditional_shutdown(*sig, 1, CLOSED.clone()));
            }
            let mut it = match SignalsInfo::<SignalOnly>::new(TERM_SIGNALS) {
                Ok(it) => it,
                Err(e) => {
                    error!("error registering signal handlers: {e:?}");
                    return;
                }
            };
            if let Some(sig) = it.into_iter().next() {
                info!("received signal {sig}, shutting down");
                close();
                it.handle().close();
            }
        })
        .expect("error spawning signal thread");
}

#[cfg(windows)]
pub fn install_signal_handlers() {
    ctrlc::set_handler(|| {
        info!("received ctrl-c, shutting down");
        close();
    })
    .expect("error registering ctrl-c handler");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_is_idempotent() {
        assert!(!closed());
        assert!(close());
        assert!(closed());
        assert!(!close());
    }
}
