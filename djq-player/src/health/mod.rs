//! Network health monitoring
//!
//! **Purpose:** Track failures of a flaky network dependency and tell callers
//! when to back off or stop calling it entirely (circuit breaker).
//!
//! **State machine:**
//! ```text
//! Ok --(2 consecutive failures)--> Degraded --(threshold in window)--> Offline
//!  ^                                                                     |
//!  +-------------------------- any success -----------------------------+
//! ```
//!
//! The state is recomputed from the failure log and the consecutive streak on
//! every failure; a single success forces `Ok` and resets the streak. All
//! mutation happens inside one mutex section, and readers get snapshots.

mod classify;

pub use classify::{is_dns_error, is_gateway_error, troubleshooting_tips, FailureCategory};

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Number of failures kept in the log
pub const FAILURE_LOG_CAPACITY: usize = 50;

/// Exponent cap for backoff growth
const MAX_BACKOFF_EXPONENT: u32 = 10;

/// Current health of the monitored dependency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NetworkState {
    #[default]
    Ok,
    Degraded,
    Offline,
}

impl fmt::Display for NetworkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkState::Ok => write!(f, "ok"),
            NetworkState::Degraded => write!(f, "degraded"),
            NetworkState::Offline => write!(f, "offline"),
        }
    }
}

/// Monitor tuning
#[derive(Debug, Clone, PartialEq)]
pub struct HealthParams {
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    /// Window in which failures count toward `fail_threshold`
    pub fail_window: Duration,
    /// Failures within the window that force `Offline`
    pub fail_threshold: usize,
}

impl Default for HealthParams {
    fn default() -> Self {
        Self {
            backoff_base: Duration::from_secs(2),
            backoff_max: Duration::from_secs(300),
            fail_window: Duration::from_secs(120),
            fail_threshold: 5,
        }
    }
}

/// One logged failure
#[derive(Debug, Clone)]
pub struct FailureRecord {
    pub at: Instant,
    pub timestamp: DateTime<Utc>,
    pub category: FailureCategory,
    pub message: String,
}

/// Snapshot of the monitor state
#[derive(Debug, Clone, Default)]
pub struct HealthStats {
    pub state: NetworkState,
    pub consecutive_failures: u32,
    pub total_failures: u64,
    pub last_success: Option<Instant>,
    pub last_failure: Option<Instant>,
    pub last_failure_message: Option<String>,
    /// Oldest first, at most [`FAILURE_LOG_CAPACITY`] entries
    pub recent_failures: Vec<FailureRecord>,
    pub gateway_connected: Option<Instant>,
    pub event_loop_lag_detected: bool,
}

/// Troubleshooting report
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthDiagnostics {
    pub state: NetworkState,
    pub consecutive_failures: u32,
    pub total_failures: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seconds_since_success: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seconds_since_failure: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_failure: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seconds_since_gateway_connect: Option<u64>,
    pub event_loop_lag: bool,
    /// Failures inside the window, by category
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub recent_failure_types: BTreeMap<FailureCategory, usize>,
}

#[derive(Default)]
struct MonitorState {
    state: NetworkState,
    consecutive_failures: u32,
    total_failures: u64,
    last_success: Option<Instant>,
    last_failure: Option<Instant>,
    last_failure_message: Option<String>,
    failures: VecDeque<FailureRecord>,
    gateway_connected: Option<Instant>,
    event_loop_lag_detected: bool,
}

impl MonitorState {
    fn recent_count(&self, now: Instant, window: Duration) -> usize {
        self.failures
            .iter()
            .filter(|f| now.saturating_duration_since(f.at) <= window)
            .count()
    }
}

/// Circuit breaker for one external dependency
///
/// Shared through `Arc` by every session; one instance per monitored dependency.
pub struct NetworkHealthMonitor {
    params: HealthParams,
    inner: Mutex<MonitorState>,
}

impl NetworkHealthMonitor {
    pub fn new(params: HealthParams) -> Self {
        Self {
            params,
            inner: Mutex::new(MonitorState::default()),
        }
    }

    pub fn params(&self) -> &HealthParams {
        &self.params
    }

    /// Record a successful call: forces `Ok` and resets the streak
    pub async fn record_success(&self) {
        let mut inner = self.inner.lock().await;
        inner.last_success = Some(Instant::now());

        if inner.consecutive_failures > 0 {
            info!(
                "Network recovered after {} consecutive failures",
                inner.consecutive_failures
            );
            inner.consecutive_failures = 0;
        }

        if inner.state != NetworkState::Ok {
            info!("Network state transition: {} -> ok", inner.state);
            inner.state = NetworkState::Ok;
        }
    }

    /// Record a failed call and recompute the state
    pub async fn record_failure(&self, err: &(dyn fmt::Display + Sync), category: FailureCategory) {
        let message = err.to_string();
        let now = Instant::now();
        let mut inner = self.inner.lock().await;

        inner.consecutive_failures += 1;
        inner.total_failures += 1;
        inner.last_failure = Some(now);
        inner.last_failure_message = Some(message.clone());

        if inner.failures.len() == FAILURE_LOG_CAPACITY {
            inner.failures.pop_front();
        }
        inner.failures.push_back(FailureRecord {
            at: now,
            timestamp: Utc::now(),
            category,
            message: message.clone(),
        });

        let recent = inner.recent_count(now, self.params.fail_window);
        let old_state = inner.state;
        inner.state = if recent >= self.params.fail_threshold {
            NetworkState::Offline
        } else if inner.consecutive_failures >= 2 {
            NetworkState::Degraded
        } else {
            NetworkState::Ok
        };

        if old_state != inner.state {
            warn!(
                "Network state transition: {} -> {} (failures: {} consecutive, {} in {}s window)",
                old_state,
                inner.state,
                inner.consecutive_failures,
                recent,
                self.params.fail_window.as_secs()
            );
        }

        error!(
            category = %category,
            "Network failure #{} (consecutive: {}): {}",
            inner.total_failures,
            inner.consecutive_failures,
            message
        );
    }

    pub async fn record_gateway_connect(&self) {
        self.inner.lock().await.gateway_connected = Some(Instant::now());
        info!("Gateway connected");
    }

    /// Latch the event-loop-lag flag (logged once)
    pub async fn record_event_loop_lag(&self) {
        let mut inner = self.inner.lock().await;
        if !inner.event_loop_lag_detected {
            inner.event_loop_lag_detected = true;
            warn!("Event loop lag detected - heartbeats may be delayed. Check for blocking operations.");
        }
    }

    pub async fn stats(&self) -> HealthStats {
        let inner = self.inner.lock().await;
        HealthStats {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            total_failures: inner.total_failures,
            last_success: inner.last_success,
            last_failure: inner.last_failure,
            last_failure_message: inner.last_failure_message.clone(),
            recent_failures: inner.failures.iter().cloned().collect(),
            gateway_connected: inner.gateway_connected,
            event_loop_lag_detected: inner.event_loop_lag_detected,
        }
    }

    pub async fn state(&self) -> NetworkState {
        self.inner.lock().await.state
    }

    pub async fn is_healthy(&self) -> bool {
        self.state().await == NetworkState::Ok
    }

    /// Degraded or Offline
    pub async fn should_backoff(&self) -> bool {
        self.state().await != NetworkState::Ok
    }

    /// Offline: callers should not issue the call at all
    pub async fn should_circuit_break(&self) -> bool {
        self.state().await == NetworkState::Offline
    }

    /// Delay to wait before the next call; zero while `Ok`
    pub async fn backoff_delay(&self) -> Duration {
        let inner = self.inner.lock().await;
        if inner.state == NetworkState::Ok {
            return Duration::ZERO;
        }
        calculate_backoff(
            inner.consecutive_failures as i64,
            self.params.backoff_base,
            self.params.backoff_max,
            true,
        )
    }

    pub async fn diagnostics(&self) -> HealthDiagnostics {
        let inner = self.inner.lock().await;
        let now = Instant::now();
        let secs_since = |t: Option<Instant>| t.map(|t| now.saturating_duration_since(t).as_secs());

        let mut recent_failure_types = BTreeMap::new();
        for failure in inner
            .failures
            .iter()
            .filter(|f| now.saturating_duration_since(f.at) <= self.params.fail_window)
        {
            *recent_failure_types.entry(failure.category).or_insert(0) += 1;
        }

        HealthDiagnostics {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            total_failures: inner.total_failures,
            seconds_since_success: secs_since(inner.last_success),
            seconds_since_failure: secs_since(inner.last_failure),
            last_failure: inner
                .last_failure
                .and(inner.last_failure_message.clone()),
            seconds_since_gateway_connect: secs_since(inner.gateway_connected),
            event_loop_lag: inner.event_loop_lag_detected,
            recent_failure_types,
        }
    }
}

impl Default for NetworkHealthMonitor {
    fn default() -> Self {
        Self::new(HealthParams::default())
    }
}

/// Exponential backoff delay for the given 1-based attempt
///
/// `min(base * 2^min(attempt-1, 10), max)`, then +/-25% jitter when requested.
/// Attempts <= 0 yield zero.
pub fn calculate_backoff(attempt: i64, base: Duration, max: Duration, jitter: bool) -> Duration {
    if attempt <= 0 {
        return Duration::ZERO;
    }

    let exponent = ((attempt - 1) as u64).min(MAX_BACKOFF_EXPONENT as u64) as i32;
    let mut delay = (base.as_secs_f64() * 2f64.powi(exponent)).min(max.as_secs_f64());

    if jitter {
        let factor: f64 = rand::thread_rng().gen_range(-1.0..=1.0);
        delay += delay * 0.25 * factor;
    }

    Duration::from_secs_f64(delay.max(0.0))
}

/// Spawn a probe that flags event-loop lag
///
/// Sleeps `interval` at a time; a wake-up more than `threshold` late is
/// recorded on the monitor.
pub fn spawn_lag_probe(
    monitor: Arc<NetworkHealthMonitor>,
    interval: Duration,
    threshold: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let expected = Instant::now() + interval;
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep_until(expected) => {
                    let late = Instant::now().saturating_duration_since(expected);
                    if late > threshold {
                        warn!(late_ms = late.as_millis() as u64, "Timer tick arrived late");
                        monitor.record_event_loop_lag().await;
                    }
                }
            }
        }
    })
}
