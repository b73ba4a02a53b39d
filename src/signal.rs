/*!
 * Signal Translation
 * Maps SIGTERM/SIGINT onto structured wait failures
 *
 * Handlers are installed once, at first node creation, and only flip
 * process-wide flags; blocking waits observe the flags and surface them
 * as `InterruptSignal`.
 */

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Once;

static INSTALL: Once = Once::new();
static TERMINATION_REQUESTED: AtomicBool = AtomicBool::new(false);
static INTERRUPT_REQUESTED: AtomicBool = AtomicBool::new(false);

/// The kind of OS signal observed by the process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    /// SIGINT
    Interrupt,
    /// SIGTERM
    TerminationRequest,
}

#[cfg(unix)]
extern "C" fn on_signal(sig: libc::c_int) {
    // Async-signal-safe: only atomic stores.
    if sig == libc::SIGTERM {
        TERMINATION_REQUESTED.store(true, Ordering::Relaxed);
    } else if sig == libc::SIGINT {
        INTERRUPT_REQUESTED.store(true, Ordering::Relaxed);
    }
}

/// Install the SIGTERM/SIGINT handlers. Idempotent.
///
/// SA_RESTART is deliberately not set so that in-flight blocking waits
/// observe EINTR and can surface the signal.
pub fn init() {
    INSTALL.call_once(|| {
        #[cfg(unix)]
        unsafe {
            let mut action: libc::sigaction = std::mem::zeroed();
            action.sa_sigaction = on_signal as usize;
            action.sa_flags = 0;
            libc::sigemptyset(&mut action.sa_mask);
            libc::sigaction(libc::SIGTERM, &action, std::ptr::null_mut());
            libc::sigaction(libc::SIGINT, &action, std::ptr::null_mut());
        }
    });
}

/// The strongest signal observed so far, if any
pub fn fetch() -> Option<SignalKind> {
    if TERMINATION_REQUESTED.load(Ordering::Relaxed) {
        Some(SignalKind::TerminationRequest)
    } else if INTERRUPT_REQUESTED.load(Ordering::Relaxed) {
        Some(SignalKind::Interrupt)
    } else {
        None
    }
}

/// Whether SIGTERM or SIGINT was observed
pub fn termination_requested() -> bool {
    fetch().is_some()
}
