//! Logging setup shared by the Data Studio crates
//!
//! Usage:
//! - Set STUDIO_LOG=off (default) - no logs
//! - Set STUDIO_LOG=info - session lifecycle logs
//! - Set STUDIO_LOG=debug - cache keys, snapshot sizes, lock traffic

use std::sync::Once;

// Re-export emit so macros can use it
pub use emit;

/// Environment variable that selects the minimum log level
pub const LOG_ENV: &str = "STUDIO_LOG";

static INIT: Once = Once::new();

/// Minimum level parsed from `STUDIO_LOG`, `None` meaning logging is off
fn parse_level(value: &str) -> Option<emit::Level> {
    match value.trim().to_ascii_lowercase().as_str() {
        "off" | "" => None,
        "debug" => Some(emit::Level::Debug),
        "warn" => Some(emit::Level::Warn),
        "error" => Some(emit::Level::Error),
        _ => Some(emit::Level::Info),
    }
}

/// Initialize diagnostics based on the STUDIO_LOG environment variable
///
/// Call once at startup. Later calls are ignored, so tests may call it freely.
pub fn init_diagnostics() {
    INIT.call_once(|| {
        let raw = std::env::var(LOG_ENV).unwrap_or_else(|_| "off".to_string());
        let Some(level) = parse_level(&raw) else {
            return;
        };

        let rt = emit::setup()
            .emit_to(emit_term::stderr())
            .emit_when(emit::level::min_filter(level))
            .init();

        // The runtime must outlive every log call in the process.
        std::mem::forget(rt);
    });
}

/// Session lifecycle events: initialize, save, clear.
#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => {
        $crate::emit::info!($($arg)*)
    };
}

/// Internal steps: cache keys, snapshot sizes, lock acquisition.
#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => {
        $crate::emit::debug!($($arg)*)
    };
}

/// Recoverable anomalies, e.g. a snapshot blob that could not be deleted.
#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => {
        $crate::emit::warn!($($arg)*)
    };
}

/// Failures surfaced to the caller.
#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => {
        $crate::emit::error!($($arg)*)
    };
}

pub use init_diagnostics as init;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_safe_to_call_multiple_times() {
        init_diagnostics();
        init_diagnostics();
    }

    #[test]
    fn test_parse_level() {
        assert!(parse_level("off").is_none());
        assert!(parse_level("").is_none());
        assert!(matches!(parse_level("DEBUG"), Some(emit::Level::Debug)));
        assert!(matches!(parse_level("warn"), Some(emit::Level::Warn)));
        assert!(matches!(parse_level("bogus"), Some(emit::Level::Info)));
    }

    #[test]
    fn test_macros_compile() {
        info!("Test message");
        debug!("Debug message with {value}", value: 42);
        warn!("Warning message");
        error!("Error message");
    }
}
