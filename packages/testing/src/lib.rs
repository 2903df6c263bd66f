#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(coverage_nightly, coverage(off))] // This is all test code, no need to test it.

//! Private helpers for testing the `chunk_pool` package.

use std::sync::mpsc;
use std::thread;
use std::time::Duration;

/// Environment variable that disables the watchdog when set to "1".
///
/// Mutation testing sets this so that mutations which introduce hangs are detected by the
/// mutation tester's own timeout instead of being reported as ordinary test failures.
pub const MUTATION_TESTING_ENV: &str = "MUTATION_TESTING";

/// Default time a watched test may take before it is considered hung.
#[must_use]
pub fn default_timeout() -> Duration {
    // Thread synchronization under Miri is far slower than on real hardware.
    if cfg!(miri) {
        Duration::from_secs(60)
    } else {
        Duration::from_secs(10)
    }
}

/// Runs a test body on a worker thread and fails the test if it does not finish within
/// [`default_timeout()`].
///
/// Multithreaded pool tests use this so that a lost wakeup or a corrupted free list shows up
/// as a failure instead of a hung test run.
///
/// # Panics
///
/// Panics if the test body panics or exceeds the timeout.
///
/// # Example
///
/// ```rust
/// use testing::with_watchdog;
///
/// let sum = with_watchdog(|| (1..=4).sum::<u32>());
/// assert_eq!(sum, 10);
/// ```
pub fn with_watchdog<F, R>(test_fn: F) -> R
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    with_timeout(default_timeout(), test_fn)
}

/// Same as [`with_watchdog()`] but with a caller-provided timeout.
///
/// # Panics
///
/// Panics if the test body panics or exceeds `timeout`.
pub fn with_timeout<F, R>(timeout: Duration, test_fn: F) -> R
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    if std::env::var(MUTATION_TESTING_ENV).as_deref() == Ok("1") {
        return test_fn();
    }

    let (tx, rx) = mpsc::channel();

    let worker = thread::spawn(move || {
        // The receiver is gone if we already timed out. Nobody is left to tell.
        drop(tx.send(test_fn()));
    });

    match rx.recv_timeout(timeout) {
        Ok(result) => {
            worker.join().expect("watched test thread panicked after reporting a result");
            result
        }
        Err(mpsc::RecvTimeoutError::Timeout) => {
            panic!("watched test did not finish within {timeout:?}");
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => match worker.join() {
            Ok(()) => panic!("watched test thread exited without reporting a result"),
            Err(payload) => std::panic::resume_unwind(payload),
        },
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn returns_result_of_fast_test() {
        assert_eq!(with_watchdog(|| 42), 42);
    }

    #[test]
    fn custom_timeout_returns_result() {
        let value = with_timeout(Duration::from_secs(5), || String::from("chunk"));
        assert_eq!(value, "chunk");
    }

    #[test]
    #[should_panic]
    fn propagates_panic_from_test_body() {
        with_watchdog(|| panic!("boom"));
    }

    #[test]
    #[should_panic]
    fn slow_test_times_out() {
        if std::env::var(MUTATION_TESTING_ENV).as_deref() == Ok("1") {
            panic!("watchdog is disabled under mutation testing");
        }

        with_timeout(Duration::from_millis(10), || {
            thread::sleep(Duration::from_secs(2));
        });
    }
}
