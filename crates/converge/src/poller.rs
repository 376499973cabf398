//! Bounded polling loop shared by every convergence check.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use gantry_core::{QueryError, Verdict};
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Poll timing: time between evaluations and the overall deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollConfig {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self { interval: DEFAULT_INTERVAL, timeout: DEFAULT_TIMEOUT }
    }
}

impl PollConfig {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }

    /// Defaults overridden by `GANTRY_POLL_INTERVAL_SECS` / `GANTRY_POLL_TIMEOUT_SECS`.
    pub fn from_env() -> Self {
        let secs = |key: &str| std::env::var(key).ok().and_then(|s| s.parse::<u64>().ok()).map(Duration::from_secs);
        Self {
            interval: secs("GANTRY_POLL_INTERVAL_SECS").unwrap_or(DEFAULT_INTERVAL),
            timeout: secs("GANTRY_POLL_TIMEOUT_SECS").unwrap_or(DEFAULT_TIMEOUT),
        }
    }
}

/// Why a poll stopped without converging or timing out.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PollFailure {
    #[error("query failed: {0}")]
    Query(#[from] QueryError),
    #[error("cancelled")]
    Cancelled,
}

/// Terminal outcome of one poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConvergenceResult {
    Converged { attempts: u32, elapsed: Duration },
    /// Deadline passed; `last` is the most recent pending reason, if any evaluation finished.
    TimedOut { attempts: u32, elapsed: Duration, last: Option<String> },
    Failed(PollFailure),
}

impl ConvergenceResult {
    pub fn is_converged(&self) -> bool {
        matches!(self, ConvergenceResult::Converged { .. })
    }
}

impl fmt::Display for ConvergenceResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConvergenceResult::Converged { attempts, elapsed } => {
                write!(f, "converged after {} attempt(s) in {:.1}s", attempts, elapsed.as_secs_f64())
            }
            ConvergenceResult::TimedOut { attempts, elapsed, last } => {
                write!(f, "timed out after {} attempt(s) in {:.1}s", attempts, elapsed.as_secs_f64())?;
                match last {
                    Some(reason) => write!(f, "; last state: {}", reason),
                    None => Ok(()),
                }
            }
            ConvergenceResult::Failed(e) => write!(f, "failed: {}", e),
        }
    }
}

/// Evaluate `check` immediately, then every `cfg.interval`, until it is satisfied,
/// returns an error, the deadline passes or `cancel` fires.
///
/// The last evaluation happens at the deadline itself, so `TimedOut` is never
/// reported early. A check still running at the deadline is abandoned.
pub async fn poll_until<F, Fut>(cfg: &PollConfig, cancel: &CancellationToken, mut check: F) -> ConvergenceResult
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Verdict, QueryError>>,
{
    let started = Instant::now();
    let deadline = started + cfg.timeout;
    let mut attempts = 0u32;
    let mut last: Option<String> = None;

    let result = 'poll: loop {
        attempts += 1;
        counter!("converge_evaluations", 1u64);
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => break 'poll ConvergenceResult::Failed(PollFailure::Cancelled),
            res = tokio::time::timeout_at(deadline, check()) => res,
        };
        match outcome {
            Err(_) => {
                warn!(attempts, "check still running at deadline");
                break 'poll ConvergenceResult::TimedOut { attempts, elapsed: started.elapsed(), last };
            }
            Ok(Ok(Verdict::Satisfied)) => {
                break 'poll ConvergenceResult::Converged { attempts, elapsed: started.elapsed() };
            }
            Ok(Ok(Verdict::Pending(reason))) => {
                debug!(attempts, reason = %reason, "not converged yet");
                last = Some(reason);
            }
            Ok(Err(e)) => break 'poll ConvergenceResult::Failed(PollFailure::Query(e)),
        }

        let now = Instant::now();
        if now >= deadline {
            break 'poll ConvergenceResult::TimedOut { attempts, elapsed: started.elapsed(), last };
        }
        let wake = (now + cfg.interval).min(deadline);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break 'poll ConvergenceResult::Failed(PollFailure::Cancelled),
            _ = tokio::time::sleep_until(wake) => {}
        }
    };

    histogram!("converge_poll_ms", started.elapsed().as_secs_f64() * 1000.0);
    match &result {
        ConvergenceResult::Converged { .. } => {
            counter!("converge_ok", 1u64);
            info!(attempts, took_ms = %started.elapsed().as_millis(), "converged");
        }
        ConvergenceResult::TimedOut { last, .. } => {
            counter!("converge_timeout", 1u64);
            warn!(attempts, last = ?last, took_ms = %started.elapsed().as_millis(), "convergence timed out");
        }
        ConvergenceResult::Failed(e) => {
            counter!("converge_failed", 1u64);
            warn!(attempts, error = %e, took_ms = %started.elapsed().as_millis(), "convergence failed");
        }
    }
    result
}
