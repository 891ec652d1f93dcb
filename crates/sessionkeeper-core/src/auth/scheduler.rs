//! Proactive credential renewal.
//!
//! The scheduler owns at most one timer task. Each `arm` bumps a generation
//! counter and hands the new task a oneshot cancel handle; `disarm` bumps the
//! generation again and drops the handle. A task that wakes up (or finishes a
//! refresh) under a stale generation exits instead of rescheduling, so a
//! logout during an in-flight refresh can't resurrect the timer.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::error::SessionError;

/// Conservative proactive interval used when no refresh expiry is known.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(90 * 60);

/// Assumed refresh-credential lifetime when the server doesn't state one.
pub const DEFAULT_REFRESH_LIFETIME: Duration = Duration::from_secs(12 * 60 * 60);

/// Time reserved before refresh expiry for the proactive attempt to finish.
pub const REFRESH_SAFETY_MARGIN: Duration = Duration::from_secs(5 * 60);

/// Fraction of the remaining (margin-adjusted) lifetime to wait.
pub const REFRESH_RATIO: f64 = 0.8;

/// Timing policy for proactive renewal and lifetime defaults.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RefreshPolicy {
    pub default_interval: Duration,
    pub default_refresh_lifetime: Duration,
    pub safety_margin: Duration,
    pub ratio: f64,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            default_interval: DEFAULT_REFRESH_INTERVAL,
            default_refresh_lifetime: DEFAULT_REFRESH_LIFETIME,
            safety_margin: REFRESH_SAFETY_MARGIN,
            ratio: REFRESH_RATIO,
        }
    }
}

impl RefreshPolicy {
    /// Delay until the next proactive renewal.
    ///
    /// `ratio × (refresh_expires_at − now − safety_margin)` when that is
    /// positive, otherwise the default interval. Never zero.
    pub fn interval_for(&self, refresh_expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Duration {
        let Some(expires_at) = refresh_expires_at else {
            return self.default_interval;
        };
        let margin_ms = i64::try_from(self.safety_margin.as_millis()).unwrap_or(i64::MAX);
        let remaining_ms = (expires_at - now).num_milliseconds().saturating_sub(margin_ms);
        if remaining_ms <= 0 {
            return self.default_interval;
        }
        let scaled = (remaining_ms as f64 * self.ratio).floor();
        if !scaled.is_finite() || scaled < 1.0 {
            return self.default_interval;
        }
        Duration::from_millis(scaled as u64)
    }

    pub fn default_access_lifetime(&self) -> chrono::Duration {
        to_chrono(self.default_interval)
    }

    pub fn default_refresh_lifetime(&self) -> chrono::Duration {
        to_chrono(self.default_refresh_lifetime)
    }
}

fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::days(365))
}

/// What the scheduler drives when its timer fires.
#[async_trait]
pub trait RefreshTarget: Send + Sync {
    /// Checked before every firing; `false` stops the scheduler.
    fn has_refresh_credential(&self) -> bool;

    /// Used to recompute the interval when rearming.
    fn refresh_expires_at(&self) -> Option<DateTime<Utc>>;

    /// Perform one renewal. Failures are expected to have triggered
    /// escalation already; the scheduler only logs them.
    async fn refresh(&self) -> Result<(), SessionError>;

    /// Called instead of `refresh` when the credential has disappeared.
    async fn on_missing_credential(&self);
}

#[derive(Default)]
struct TimerState {
    generation: u64,
    target: Option<Arc<dyn RefreshTarget>>,
    cancel: Option<oneshot::Sender<()>>,
    interval: Option<Duration>,
}

/// Self-rescheduling one-shot timer for proactive renewal.
pub struct RefreshScheduler {
    policy: RefreshPolicy,
    state: Arc<Mutex<TimerState>>,
}

impl RefreshScheduler {
    pub fn new(policy: RefreshPolicy) -> Self {
        Self {
            policy,
            state: Arc::new(Mutex::new(TimerState::default())),
        }
    }

    /// Schedule a single future renewal of `target`, replacing any pending one.
    ///
    /// Must run inside a tokio runtime; outside one the call is logged and
    /// nothing is scheduled.
    pub fn arm(
        &self,
        target: Arc<dyn RefreshTarget>,
        refresh_expires_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!("No async runtime available, refresh timer not armed");
            return;
        };

        let delay = self.policy.interval_for(refresh_expires_at, now);
        let (cancel_tx, cancel_rx) = oneshot::channel();

        let generation = {
            let mut state = lock(&self.state);
            disarm_locked(&mut state);
            state.generation += 1;
            state.target = Some(target);
            state.cancel = Some(cancel_tx);
            state.interval = Some(delay);
            state.generation
        };

        debug!(generation, delay_secs = delay.as_secs(), "Refresh timer armed");
        handle.spawn(run_timer(
            Arc::clone(&self.state),
            self.policy,
            generation,
            delay,
            cancel_rx,
        ));
    }

    /// Cancel any pending renewal and forget the target. Safe to repeat.
    pub fn disarm(&self) {
        let mut state = lock(&self.state);
        if state.target.is_some() {
            debug!(generation = state.generation, "Refresh timer disarmed");
        }
        disarm_locked(&mut state);
    }

    pub fn is_armed(&self) -> bool {
        lock(&self.state).target.is_some()
    }

    /// Delay the live timer was (re)armed with.
    pub fn scheduled_interval(&self) -> Option<Duration> {
        let state = lock(&self.state);
        state.target.as_ref().and(state.interval)
    }
}

impl Drop for RefreshScheduler {
    fn drop(&mut self) {
        disarm_locked(&mut lock(&self.state));
    }
}

fn lock(state: &Mutex<TimerState>) -> MutexGuard<'_, TimerState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

fn disarm_locked(state: &mut TimerState) {
    state.generation += 1;
    state.target = None;
    state.interval = None;
    // dropping the sender wakes a sleeping timer task
    state.cancel = None;
}

fn current_target(state: &Mutex<TimerState>, generation: u64) -> Option<Arc<dyn RefreshTarget>> {
    let state = lock(state);
    if state.generation == generation {
        state.target.clone()
    } else {
        None
    }
}

async fn run_timer(
    state: Arc<Mutex<TimerState>>,
    policy: RefreshPolicy,
    generation: u64,
    mut delay: Duration,
    mut cancel: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = &mut cancel => {
                debug!(generation, "Refresh timer cancelled");
                return;
            }
        }

        let Some(target) = current_target(&state, generation) else {
            return;
        };

        if !target.has_refresh_credential() {
            info!("No refresh credential at scheduled renewal, stopping timer");
            {
                let mut state = lock(&state);
                if state.generation == generation {
                    disarm_locked(&mut state);
                }
            }
            target.on_missing_credential().await;
            return;
        }

        if let Err(e) = target.refresh().await {
            warn!(error = %e, "Scheduled credential renewal failed");
        }

        // Only continue if nobody disarmed or rearmed while we were refreshing.
        let Some(target) = current_target(&state, generation) else {
            debug!(generation, "Refresh timer disarmed during renewal, not rescheduling");
            return;
        };
        delay = policy.interval_for(target.refresh_expires_at(), Utc::now());
        {
            let mut state = lock(&state);
            if state.generation != generation {
                return;
            }
            state.interval = Some(delay);
        }
        debug!(generation, delay_secs = delay.as_secs(), "Refresh timer rescheduled");
    }
}
