//! Structured logging for the simulation pipeline.
//!
//! Thin layer over `tracing`: a category tag per subsystem, one-time
//! subscriber initialization honoring `RUST_LOG`, and a timer for recording
//! how long pipeline stages take.

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

static INIT: OnceCell<()> = OnceCell::new();

/// Subsystem tag attached to every log event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogCategory {
    /// Qubit states, photon source, channel, detector
    Quantum,
    /// BB84 protocol phases
    Protocol,
    /// Eavesdropper models and attack detection
    Attack,
    /// Cascade / LDPC error correction
    Reconciliation,
    /// Privacy amplification hashing
    Privacy,
    /// Decoy-state analysis
    Decoy,
    /// Key derivation and AES operations
    Crypto,
    /// Simulator facade, history, key cache
    Simulator,
    /// Secure messaging service
    Messaging,
}

impl std::fmt::Display for LogCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Quantum => "quantum",
            Self::Protocol => "protocol",
            Self::Attack => "attack",
            Self::Reconciliation => "reconciliation",
            Self::Privacy => "privacy",
            Self::Decoy => "decoy",
            Self::Crypto => "crypto",
            Self::Simulator => "simulator",
            Self::Messaging => "messaging",
        };
        write!(f, "{name}")
    }
}

/// Install the global tracing subscriber once.
///
/// Respects `RUST_LOG`; defaults to `info` for this crate. Safe to call from
/// multiple entry points; later calls are no-ops, as are calls made when an
/// outer harness already installed a subscriber.
pub fn init_logging() {
    INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("qkd_pipeline=info"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .try_init();
    });
}

/// Info-level event tagged with a subsystem category.
pub fn log_info(category: LogCategory, message: &str) {
    info!(category = %category, "{message}");
}

/// Warning-level event tagged with a subsystem category.
pub fn log_warn(category: LogCategory, message: &str) {
    warn!(category = %category, "{message}");
}

/// Error-level event tagged with a subsystem category.
pub fn log_error(category: LogCategory, message: &str) {
    error!(category = %category, "{message}");
}

/// Stage timer that reports elapsed milliseconds when finished.
///
/// ```rust
/// use qkd_pipeline::logging::{LogCategory, PerformanceTimer};
/// let timer = PerformanceTimer::start(LogCategory::Protocol, "bb84_run");
/// // ... work ...
/// let elapsed = timer.finish();
/// ```
pub struct PerformanceTimer {
    category: LogCategory,
    operation: String,
    started: Instant,
}

impl PerformanceTimer {
    /// Start timing the named operation.
    pub fn start(category: LogCategory, operation: &str) -> Self {
        Self {
            category,
            operation: operation.to_string(),
            started: Instant::now(),
        }
    }

    /// Elapsed time so far.
    pub fn elapsed(&self) -> std::time::Duration {
        self.started.elapsed()
    }

    /// Log the elapsed time and return it in seconds.
    pub fn finish(self) -> f64 {
        let secs = self.started.elapsed().as_secs_f64();
        info!(
            category = %self.category,
            operation = %self.operation,
            elapsed_ms = secs * 1000.0,
            "operation completed"
        );
        secs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        init_logging();
        init_logging();
        log_info(LogCategory::Simulator, "logging smoke test");
    }

    #[test]
    fn timer_reports_positive_elapsed() {
        init_logging();
        let timer = PerformanceTimer::start(LogCategory::Protocol, "noop");
        std::thread::sleep(std::time::Duration::from_millis(2));
        let secs = timer.finish();
        assert!(secs > 0.0);
    }

    #[test]
    fn categories_render_stable_names() {
        assert_eq!(LogCategory::Quantum.to_string(), "quantum");
        assert_eq!(LogCategory::Messaging.to_string(), "messaging");
    }
}
