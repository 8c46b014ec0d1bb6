//! Connection Monitor - tracks the last successful response from an endpoint
//!
//! **Purpose**: Tell a silent endpoint (powered off, cable pulled, process crashed)
//! apart from one that simply has not been asked anything recently.
//!
//! **App Start Relative Time Pattern**:
//! - Uses monotonic time anchored to application start
//! - Unaffected by system clock changes (NTP, manual adjustments)
//! - Safe to store in AtomicU64 for lock-free access

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Global anchor point for monotonic time
static APP_START: OnceLock<Instant> = OnceLock::new();

/// Sentinel: no response received yet
const NEVER: u64 = u64::MAX;

fn monotonic_micros() -> u64 {
    let start = APP_START.get_or_init(Instant::now);
    start.elapsed().as_micros() as u64
}

/// Endpoint liveness monitor
///
/// Updated by the request path after every response (including device error
/// responses, which still prove the endpoint is alive). Timeouts and transport
/// failures only bump the consecutive failure counter.
#[derive(Debug)]
pub struct ConnectionMonitor {
    last_response: AtomicU64,
    consecutive_failures: AtomicU64,
    window: Duration,
}

impl ConnectionMonitor {
    /// Create a new monitor
    ///
    /// # Parameters
    /// - `window`: how long after the last response the endpoint still counts as alive
    ///
    /// # Example
    /// ```
    /// # use sls_driver::ConnectionMonitor;
    /// # use std::time::Duration;
    /// let monitor = ConnectionMonitor::new(Duration::from_secs(5));
    /// assert!(!monitor.is_alive());
    /// monitor.register_response();
    /// assert!(monitor.is_alive());
    /// ```
    pub fn new(window: Duration) -> Self {
        Self {
            last_response: AtomicU64::new(NEVER),
            consecutive_failures: AtomicU64::new(0),
            window,
        }
    }

    /// Record a response from the endpoint
    pub fn register_response(&self) {
        self.last_response
            .store(monotonic_micros(), Ordering::Relaxed);
        self.consecutive_failures.store(0, Ordering::Relaxed);
    }

    /// Record a request that got no usable response
    pub fn register_failure(&self) {
        self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// True if a response arrived within the window and the last request did not fail
    pub fn is_alive(&self) -> bool {
        if self.consecutive_failures.load(Ordering::Relaxed) > 0 {
            return false;
        }
        self.time_since_last_response()
            .is_some_and(|elapsed| elapsed < self.window)
    }

    /// Time since the last response, `None` if the endpoint never answered
    pub fn time_since_last_response(&self) -> Option<Duration> {
        let last_us = self.last_response.load(Ordering::Relaxed);
        if last_us == NEVER {
            return None;
        }
        Some(Duration::from_micros(
            monotonic_micros().saturating_sub(last_us),
        ))
    }

    pub fn consecutive_failures(&self) -> u64 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }
}
