//! Scoped interrupt handling for tool runs.
//!
//! While a [`CancellationGuard`] is alive, SIGINT, SIGTERM and SIGHUP are
//! recorded instead of acting on the process. The run inspects
//! [`CancellationGuard::received`] once `call` returns and, if a signal was
//! recorded, takes the failure path. Dropping the guard unregisters its own
//! handlers; when the last live guard goes away each signal behaves as it did
//! before the first guard was installed.
//!
//! The disposition each signal had at that point decides how it is handled:
//! - default (terminate): recorded while guarded, terminates otherwise;
//! - ignored (e.g. SIGHUP under `nohup`): left alone, never recorded;
//! - a handler installed by someone else: recorded while guarded, and the
//!   existing handler keeps being called.
//!
//! Guards nest: every guard registers and removes only its own handlers, so
//! a run started from inside another run does not leak handler state into
//! the outer one. A signal arriving while both are alive is seen by both.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::{io, mem, ptr};

use signal_hook::consts::{SIGHUP, SIGINT, SIGTERM};
use signal_hook::{flag, low_level, SigId};
use tracing::debug;

/// Signals a guard intercepts.
pub const GUARDED_SIGNALS: [i32; 3] = [SIGINT, SIGTERM, SIGHUP];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    Default,
    Ignored,
    Handler,
}

/// The action currently installed for `signal`.
fn disposition(signal: i32) -> io::Result<Disposition> {
    // SAFETY: with a null `act`, sigaction only writes the current action
    // into `current`.
    let mut current: libc::sigaction = unsafe { mem::zeroed() };
    if unsafe { libc::sigaction(signal, ptr::null(), &mut current) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(match current.sa_sigaction {
        libc::SIG_DFL => Disposition::Default,
        libc::SIG_IGN => Disposition::Ignored,
        _ => Disposition::Handler,
    })
}

/// Decided once per process, on the first install.
struct Setup {
    /// Re-enables the default action once no guard is alive.
    passthrough: Arc<AtomicBool>,
    /// Signals guards record; ignored signals are left out.
    intercepted: Vec<i32>,
}

impl Setup {
    fn detect() -> io::Result<Self> {
        let passthrough = Arc::new(AtomicBool::new(true));
        let mut intercepted = Vec::with_capacity(GUARDED_SIGNALS.len());
        for signal in GUARDED_SIGNALS {
            match disposition(signal)? {
                Disposition::Ignored => {
                    debug!(signal, "signal is ignored by the process, not intercepting");
                    continue;
                }
                Disposition::Default => {
                    flag::register_conditional_default(signal, Arc::clone(&passthrough))?;
                }
                Disposition::Handler => {}
            }
            intercepted.push(signal);
        }
        Ok(Self {
            passthrough,
            intercepted,
        })
    }
}

/// Process-wide bookkeeping shared by all guards.
struct GuardRegistry {
    active: usize,
    setup: Option<Setup>,
}

static REGISTRY: Mutex<GuardRegistry> = Mutex::new(GuardRegistry {
    active: 0,
    setup: None,
});

#[derive(Debug)]
pub struct CancellationGuard {
    ids: Vec<SigId>,
    received: Arc<AtomicUsize>,
}

impl CancellationGuard {
    /// Start intercepting [`GUARDED_SIGNALS`] that the process does not ignore.
    pub fn install() -> io::Result<Self> {
        let mut registry = REGISTRY.lock().unwrap_or_else(PoisonError::into_inner);

        let setup = match registry.setup.take() {
            Some(setup) => setup,
            None => Setup::detect()?,
        };
        let passthrough = Arc::clone(&setup.passthrough);
        let intercepted = setup.intercepted.clone();
        registry.setup = Some(setup);

        let received = Arc::new(AtomicUsize::new(0));
        let mut ids = Vec::with_capacity(intercepted.len());
        for signal in intercepted {
            match flag::register_usize(signal, Arc::clone(&received), signal as usize) {
                Ok(id) => ids.push(id),
                Err(e) => {
                    for id in ids {
                        low_level::unregister(id);
                    }
                    return Err(e);
                }
            }
        }

        registry.active += 1;
        passthrough.store(false, Ordering::SeqCst);
        debug!(active = registry.active, "cancellation guard installed");

        Ok(Self { ids, received })
    }

    /// The signal recorded since the guard was installed, if any.
    pub fn received(&self) -> Option<i32> {
        match self.received.load(Ordering::SeqCst) {
            0 => None,
            signal => i32::try_from(signal).ok(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.received().is_some()
    }
}

impl Drop for CancellationGuard {
    fn drop(&mut self) {
        let mut registry = REGISTRY.lock().unwrap_or_else(PoisonError::into_inner);
        for id in self.ids.drain(..) {
            low_level::unregister(id);
        }
        registry.active = registry.active.saturating_sub(1);
        if registry.active == 0 {
            if let Some(setup) = &registry.setup {
                setup.passthrough.store(true, Ordering::SeqCst);
            }
        }
        debug!(active = registry.active, "cancellation guard removed");
    }
}

/// Signals guards record in this process. Empty until the first guard is
/// installed.
pub fn intercepted_signals() -> Vec<i32> {
    REGISTRY
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .setup
        .as_ref()
        .map(|setup| setup.intercepted.clone())
        .unwrap_or_default()
}

/// Number of guards currently alive in this process.
pub fn active_guards() -> usize {
    REGISTRY.lock().unwrap_or_else(PoisonError::into_inner).active
}

/// Serializes tests that install guards or deliver signals.
#[cfg(test)]
pub(crate) static SIGNAL_TEST_LOCK: Mutex<()> = Mutex::new(());
