//! Test logging infrastructure.
//!
//! Every test starts with [`init_test_logging`] and brackets its body with
//! [`test_phase!`] / [`test_complete!`]; assertions go through
//! [`assert_with_log!`] so a failure carries the expected/actual pair into
//! the captured log. Verbosity comes from the `TEST_LOG_LEVEL` environment
//! variable (`error`..`trace`, default `info`).

use std::sync::Once;

/// Installs the test subscriber once per process.
///
/// Output goes through the libtest capture writer, so passing tests stay
/// quiet and failing tests print their full trace.
pub fn init_test_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let level = std::env::var("TEST_LOG_LEVEL").unwrap_or_else(|_| "info".to_owned());
        let filter = tracing_subscriber::EnvFilter::try_new(level)
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .without_time()
            .try_init();
    });
}

/// Marks the start of a named test phase.
#[macro_export]
macro_rules! test_phase {
    ($name:expr) => {
        tracing::info!(test = $name, "phase start");
    };
}

/// Marks the successful end of a named test.
#[macro_export]
macro_rules! test_complete {
    ($name:expr) => {
        tracing::info!(test = $name, "complete");
    };
}

/// Asserts `cond`, logging the expected/actual pair before panicking.
#[macro_export]
macro_rules! assert_with_log {
    ($cond:expr, $what:expr, $expected:expr, $actual:expr) => {
        if !$cond {
            tracing::error!(
                what = $what,
                expected = ?$expected,
                actual = ?$actual,
                "assertion failed"
            );
            panic!(
                "assertion failed: {} (expected {:?}, got {:?})",
                $what, $expected, $actual
            );
        }
    };
}
