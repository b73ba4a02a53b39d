/*!
 * Cross-Process Wake Primitive
 * futex wait/wake on a shared 32-bit word
 *
 * On Linux this issues the futex syscall directly (non-private, so it
 * works across processes on a shared mapping). Elsewhere it degrades to a
 * bounded polling loop on the same word.
 */

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// Outcome of a wait on a shared word
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The word changed or a wake was issued
    Woken,
    /// The timeout elapsed
    TimedOut,
    /// A signal interrupted the wait
    Interrupted,
}

/// Block until `word` leaves `expected`, a wake is posted or the timeout
/// elapses. `None` waits indefinitely. May return spuriously as `Woken`;
/// callers re-check their predicate in a loop.
pub fn wait_on(word: &AtomicU32, expected: u32, timeout: Option<Duration>) -> WaitOutcome {
    if word.load(Ordering::Acquire) != expected {
        return WaitOutcome::Woken;
    }
    #[cfg(target_os = "linux")]
    {
        futex_wait(word, expected, timeout)
    }
    #[cfg(not(target_os = "linux"))]
    {
        polling_wait(word, expected, timeout)
    }
}

/// Wake every waiter parked on `word`
pub fn wake_all(word: &AtomicU32) {
    #[cfg(target_os = "linux")]
    unsafe {
        libc::syscall(
            libc::SYS_futex,
            word as *const AtomicU32 as *mut u32,
            libc::FUTEX_WAKE,
            i32::MAX,
            0usize,
            0usize,
            0u32,
        );
    }
    #[cfg(not(target_os = "linux"))]
    {
        // Pollers notice the word change on their next probe.
        let _ = word;
    }
}

#[cfg(target_os = "linux")]
fn futex_wait(word: &AtomicU32, expected: u32, timeout: Option<Duration>) -> WaitOutcome {
    let timespec;
    let timeout_ptr = match timeout {
        Some(d) => {
            timespec = libc::timespec {
                tv_sec: d.as_secs() as libc::time_t,
                tv_nsec: i64::from(d.subsec_nanos()) as libc::c_long,
            };
            &timespec as *const libc::timespec
        }
        None => std::ptr::null(),
    };

    let rc = unsafe {
        libc::syscall(
            libc::SYS_futex,
            word as *const AtomicU32 as *mut u32,
            libc::FUTEX_WAIT,
            expected,
            timeout_ptr,
            0usize,
            0u32,
        )
    };

    if rc == 0 {
        return WaitOutcome::Woken;
    }
    match std::io::Error::last_os_error().raw_os_error() {
        Some(libc::EAGAIN) => WaitOutcome::Woken,
        Some(libc::EINTR) => WaitOutcome::Interrupted,
        Some(libc::ETIMEDOUT) => WaitOutcome::TimedOut,
        _ => WaitOutcome::Woken,
    }
}

#[cfg(not(target_os = "linux"))]
fn polling_wait(word: &AtomicU32, expected: u32, timeout: Option<Duration>) -> WaitOutcome {
    use std::time::Instant;

    const POLL_INTERVAL: Duration = Duration::from_micros(200);
    let deadline = timeout.map(|d| Instant::now() + d);
    loop {
        if word.load(Ordering::Acquire) != expected {
            return WaitOutcome::Woken;
        }
        if crate::signal::termination_requested() {
            return WaitOutcome::Interrupted;
        }
        if let Some(deadline) = deadline {
            if Instant::now() >= deadline {
                return WaitOutcome::TimedOut;
            }
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Instant;

    #[test]
    fn returns_immediately_when_word_differs() {
        let word = AtomicU32::new(7);
        assert_eq!(wait_on(&word, 3, None), WaitOutcome::Woken);
    }

    #[test]
    fn times_out_without_wake() {
        let word = AtomicU32::new(0);
        let start = Instant::now();
        let outcome = wait_on(&word, 0, Some(Duration::from_millis(50)));
        assert_eq!(outcome, WaitOutcome::TimedOut);
        assert!(start.elapsed() >= Duration::from_millis(45));
    }

    #[test]
    fn wake_releases_waiter() {
        let word = Arc::new(AtomicU32::new(0));
        let waiter = {
            let word = Arc::clone(&word);
            std::thread::spawn(move || wait_on(&word, 0, Some(Duration::from_secs(5))))
        };
        std::thread::sleep(Duration::from_millis(20));
        word.store(1, Ordering::Release);
        wake_all(&word);
        assert_eq!(waiter.join().unwrap(), WaitOutcome::Woken);
    }
}
