//! Lock cleanup on SIGINT/SIGTERM.
//!
//! A listener thread waits on both signals for the duration of a run. A
//! one-shot state word decides which path owns lock cleanup: the listener
//! (signal first) or [`SignalGuard::stop`] (normal completion first). The
//! loser does nothing, so the lock file is never removed twice.

use std::path::Path;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result};
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::exit_codes;
use crate::io::lock::release_lock;

const RUNNING: u8 = 0;
const STOPPED: u8 = 1;
const SIGNALLED: u8 = 2;

/// Signals that end a run early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationSignal {
    Interrupt,
    Terminate,
}

impl TerminationSignal {
    pub fn exit_code(self) -> i32 {
        match self {
            TerminationSignal::Interrupt => exit_codes::INTERRUPTED,
            TerminationSignal::Terminate => exit_codes::TERMINATED,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            TerminationSignal::Interrupt => "SIGINT",
            TerminationSignal::Terminate => "SIGTERM",
        }
    }
}

/// Handle to an installed listener. Dropping it stops the listener.
#[derive(Debug)]
pub struct SignalGuard {
    state: Arc<AtomicU8>,
    done: Mutex<Option<oneshot::Sender<()>>>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

/// Start listening for SIGINT/SIGTERM; on either, release `lock_path` and exit.
///
/// Both handlers are registered before this returns, so there is no window
/// where a signal would bypass cleanup.
pub fn install(lock_path: &Path) -> Result<SignalGuard> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("build signal runtime")?;
    let (mut interrupt, mut terminate) = {
        let _enter = runtime.enter();
        (
            signal(SignalKind::interrupt()).context("register SIGINT handler")?,
            signal(SignalKind::terminate()).context("register SIGTERM handler")?,
        )
    };

    let state = Arc::new(AtomicU8::new(RUNNING));
    let (done_tx, done_rx) = oneshot::channel::<()>();
    let lock_path = lock_path.to_path_buf();
    let listener_state = Arc::clone(&state);

    let listener = thread::Builder::new()
        .name("ralph-signals".to_string())
        .spawn(move || {
            let received = runtime.block_on(async move {
                tokio::select! {
                    _ = interrupt.recv() => Some(TerminationSignal::Interrupt),
                    _ = terminate.recv() => Some(TerminationSignal::Terminate),
                    _ = done_rx => None,
                }
            });
            // Both streams are gone here; further signals are absorbed, not re-handled.
            if let Some(sig) = received {
                on_signal(sig, &listener_state, &lock_path);
            }
        })
        .context("spawn signal listener")?;

    debug!("signal listener installed");
    Ok(SignalGuard {
        state,
        done: Mutex::new(Some(done_tx)),
        listener: Mutex::new(Some(listener)),
    })
}

fn on_signal(sig: TerminationSignal, state: &AtomicU8, lock_path: &Path) {
    if state
        .compare_exchange(RUNNING, SIGNALLED, Ordering::AcqRel, Ordering::Acquire)
        .is_err()
    {
        // Normal completion already owns cleanup.
        return;
    }
    info!(signal = sig.name(), "received termination signal, releasing lock");
    if let Err(err) = release_lock(lock_path) {
        warn!(err = %format!("{err:#}"), "failed to release lock");
        eprintln!("Warning: failed to release lock: {err:#}");
    }
    std::process::exit(sig.exit_code());
}

impl SignalGuard {
    /// Disable the listener after normal completion.
    ///
    /// Returns `true` when the caller still owns the lock and must release it,
    /// `false` when a signal got there first and the process is exiting. Safe to
    /// call any number of times.
    pub fn stop(&self) -> bool {
        match self
            .state
            .compare_exchange(RUNNING, STOPPED, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {
                if let Some(done) = take(&self.done) {
                    // The listener may already be gone; nothing to report.
                    let _ = done.send(());
                }
                if let Some(listener) = take(&self.listener)
                    && listener.join().is_err()
                {
                    warn!("signal listener panicked");
                }
                debug!("signal listener stopped");
                true
            }
            Err(current) => current == STOPPED,
        }
    }
}

/// Block the calling thread for good once [`SignalGuard::stop`] has returned
/// `false`; the listener is about to exit the process with the signal's code.
pub fn wait_for_exit() -> ! {
    loop {
        thread::park();
    }
}

impl Drop for SignalGuard {
    fn drop(&mut self) {
        self.stop();
    }
}

fn take<T>(slot: &Mutex<Option<T>>) -> Option<T> {
    match slot.lock() {
        Ok(mut guard) => guard.take(),
        Err(poisoned) => poisoned.into_inner().take(),
    }
}
