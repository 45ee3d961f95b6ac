//! Upstream URL pool with per-URL cooldown and daily quota.
//!
//! Pool state is process-local: replicas track cooldown and quota
//! independently, so a fleet of N replicas may overshoot a quota by up to
//! a factor of N. Counter updates sit behind a mutex with short critical
//! sections; nothing async happens while it is held.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Local, NaiveDate, Utc};
use rand::Rng;
use tracing::{debug, warn};

use overtile_core::FetchError;

/// Result of trying to take a request slot on one URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    Acquired,
    /// The URL is cooling down after a failure.
    Cooldown,
    /// The URL hit its daily quota just now.
    Limit,
    /// The URL is inside its 24 h quota block.
    Blocked,
}

/// How a single upstream attempt failed, as classified by the caller.
#[derive(Debug)]
pub enum AttemptFailure {
    /// A 4xx other than 429: the request is semantically rejected, not the
    /// upstream broken. Propagated without failover or cooldown.
    Rejected { status: u16 },
    /// Network error, 5xx, 429, timeout, or unparsable body: cool the URL
    /// down and try the next candidate.
    Transient { reason: String },
}

#[derive(Debug)]
struct UrlState {
    failed_until: Option<DateTime<Utc>>,
    blocked_until: Option<DateTime<Utc>>,
    requests_today: i64,
    day_start: NaiveDate,
}

impl UrlState {
    fn new() -> Self {
        Self {
            failed_until: None,
            blocked_until: None,
            requests_today: 0,
            day_start: Local::now().date_naive(),
        }
    }

    /// Resets the counter when the local day rolled over.
    fn roll_day(&mut self) {
        let today = Local::now().date_naive();
        if self.day_start < today {
            self.day_start = today;
            self.requests_today = 0;
        }
    }

    fn available(&self, now: DateTime<Utc>, daily_limit: i64) -> bool {
        self.failed_until.is_none_or(|until| until <= now)
            && self.blocked_until.is_none_or(|until| until <= now)
            && (daily_limit < 0 || self.requests_today < daily_limit)
    }
}

/// A pool of upstream endpoint URLs.
///
/// Construction takes the cooldown applied after a transient failure and a
/// per-URL daily request quota; a negative quota disables enforcement.
pub struct UpstreamPool {
    urls: Vec<String>,
    cooldown: Duration,
    daily_limit: i64,
    states: Mutex<Vec<UrlState>>,
}

impl UpstreamPool {
    pub fn new(urls: Vec<String>, cooldown: Duration, daily_limit: i64) -> Self {
        let states = urls.iter().map(|_| UrlState::new()).collect();
        Self {
            urls,
            cooldown,
            daily_limit,
            states: Mutex::new(states),
        }
    }

    pub fn urls(&self) -> &[String] {
        &self.urls
    }

    /// Picks a usable URL uniformly at random, skipping `excluded` and
    /// every URL in cooldown, quota block, or at quota. `None` when no
    /// candidate qualifies.
    pub fn next(&self, excluded: &HashSet<String>) -> Option<String> {
        let now = Utc::now();
        let mut states = self.states.lock().expect("pool mutex poisoned");
        let candidates: Vec<usize> = self
            .urls
            .iter()
            .enumerate()
            .filter(|(index, url)| {
                if excluded.contains(*url) {
                    return false;
                }
                states[*index].roll_day();
                states[*index].available(now, self.daily_limit)
            })
            .map(|(index, _)| index)
            .collect();
        if candidates.is_empty() {
            return None;
        }
        let pick = candidates[rand::thread_rng().gen_range(0..candidates.len())];
        Some(self.urls[pick].clone())
    }

    /// Takes a request slot on `url`, counting it against the daily quota.
    /// Reaching the quota on this acquire blocks the URL for 24 hours.
    pub fn try_acquire(&self, url: &str) -> AcquireOutcome {
        let Some(index) = self.urls.iter().position(|u| u == url) else {
            return AcquireOutcome::Cooldown;
        };
        let now = Utc::now();
        let mut states = self.states.lock().expect("pool mutex poisoned");
        let state = &mut states[index];
        state.roll_day();
        if state.failed_until.is_some_and(|until| until > now) {
            return AcquireOutcome::Cooldown;
        }
        if state.blocked_until.is_some_and(|until| until > now) {
            return AcquireOutcome::Blocked;
        }
        if self.daily_limit >= 0 && state.requests_today >= self.daily_limit {
            return AcquireOutcome::Limit;
        }
        state.requests_today += 1;
        if self.daily_limit >= 0 && state.requests_today >= self.daily_limit {
            state.blocked_until = Some(now + chrono::Duration::hours(24));
        }
        AcquireOutcome::Acquired
    }

    /// Puts `url` into cooldown, unless cooldown is disabled.
    pub fn mark_failure(&self, url: &str) {
        if self.cooldown.is_zero() {
            return;
        }
        if let Some(index) = self.urls.iter().position(|u| u == url) {
            let mut states = self.states.lock().expect("pool mutex poisoned");
            states[index].failed_until = Some(
                Utc::now()
                    + chrono::Duration::milliseconds(self.cooldown.as_millis() as i64),
            );
        }
    }

    /// Clears any cooldown on `url`.
    pub fn mark_success(&self, url: &str) {
        if let Some(index) = self.urls.iter().position(|u| u == url) {
            let mut states = self.states.lock().expect("pool mutex poisoned");
            states[index].failed_until = None;
        }
    }

    /// True when every URL is blocked or at its quota.
    pub fn is_exhausted_by_limit(&self) -> bool {
        if self.daily_limit < 0 {
            return false;
        }
        let now = Utc::now();
        let mut states = self.states.lock().expect("pool mutex poisoned");
        states.iter_mut().all(|state| {
            state.roll_day();
            state.blocked_until.is_some_and(|until| until > now)
                || state.requests_today >= self.daily_limit
        })
    }

    /// Drives `operation` across the pool until it succeeds or every
    /// candidate is spent.
    ///
    /// A [`AttemptFailure::Rejected`] outcome propagates immediately
    /// without cooling anything down; transient failures cool the URL down
    /// and rotate to the next candidate.
    pub async fn with_upstream<T, F, Fut>(&self, operation: F) -> Result<T, FetchError>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<T, AttemptFailure>>,
    {
        let mut attempted: HashSet<String> = HashSet::new();
        let mut last_failure: Option<String> = None;
        while let Some(url) = self.next(&attempted) {
            match self.try_acquire(&url) {
                AcquireOutcome::Acquired => {}
                outcome => {
                    debug!(%url, ?outcome, "upstream not acquirable, skipping");
                    attempted.insert(url);
                    continue;
                }
            }
            match operation(url.clone()).await {
                Ok(value) => {
                    self.mark_success(&url);
                    return Ok(value);
                }
                Err(AttemptFailure::Rejected { status }) => {
                    return Err(FetchError::Rejected(status));
                }
                Err(AttemptFailure::Transient { reason }) => {
                    warn!(%url, %reason, "upstream attempt failed, rotating");
                    self.mark_failure(&url);
                    last_failure = Some(reason);
                    attempted.insert(url);
                }
            }
        }
        match last_failure {
            Some(reason) => Err(FetchError::Unavailable(reason)),
            None if self.is_exhausted_by_limit() => Err(FetchError::DailyLimitReached),
            None => Err(FetchError::Unavailable("no upstream configured".to_string())),
        }
    }
}
