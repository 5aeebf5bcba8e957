//! Pure session decisions
//!
//! Nothing in here reads a clock or touches storage. Callers pass in the
//! current time along with whatever state they have observed, which keeps
//! every decision reproducible in tests.

use std::time::Duration;

use tokenkeep_clock::{UnixMillis, UnixTime};

use crate::codec::Claims;

/// How urgently the refresh token should be exchanged
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefreshUrgency {
    /// Nothing to do, either because expiry is far off or unknown
    Skip,
    /// The refresh token is still valid but expires within the threshold
    RefreshNow,
    /// The refresh token has already expired
    Expired,
}

/// Returns `true` when the user has been inactive for at least `threshold`
///
/// A missing activity record never counts as idle.
pub fn is_idle_timed_out(
    last_activity: Option<UnixMillis>,
    now: UnixMillis,
    threshold: Duration,
) -> bool {
    match last_activity {
        Some(last) => now.saturating_since(last) >= threshold,
        None => false,
    }
}

/// Classifies a refresh token by how close it is to expiry
///
/// `claims` is `None` when the token could not be decoded. Undecodable tokens,
/// and tokens without an expiry, are never refreshed or force-expired.
pub fn refresh_urgency(claims: Option<&Claims>, now: UnixTime, threshold: Duration) -> RefreshUrgency {
    let expires_at = match claims.and_then(|c| c.expires_at) {
        Some(exp) => exp,
        None => return RefreshUrgency::Skip,
    };

    match now.until(expires_at) {
        None => RefreshUrgency::Expired,
        Some(remaining) if remaining <= threshold => RefreshUrgency::RefreshNow,
        Some(_) => RefreshUrgency::Skip,
    }
}

/// Thresholds governing idle logout and refresh timing
#[derive(Clone, Copy, Debug)]
pub struct SessionPolicy {
    idle_timeout: Duration,
    proactive_threshold: Duration,
    reactive_threshold: Duration,
}

impl Default for SessionPolicy {
    /// Default session policy
    ///
    /// Users idle for 15 minutes are logged out. Refresh tokens are renewed
    /// proactively once they are within 5 minutes of expiry, and after an
    /// unauthorized response once they are within 60 minutes.
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(15 * 60),
            proactive_threshold: Duration::from_secs(5 * 60),
            reactive_threshold: Duration::from_secs(60 * 60),
        }
    }
}

impl SessionPolicy {
    /// Constructs a new session policy
    pub fn new(
        idle_timeout: Duration,
        proactive_threshold: Duration,
        reactive_threshold: Duration,
    ) -> Self {
        Self {
            idle_timeout,
            proactive_threshold,
            reactive_threshold,
        }
    }

    /// Inactivity after which the session is forcibly ended
    #[inline]
    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    /// Threshold used before outbound requests and on background ticks
    #[inline]
    pub fn proactive_threshold(&self) -> Duration {
        self.proactive_threshold
    }

    /// Threshold used when a request comes back unauthorized
    #[inline]
    pub fn reactive_threshold(&self) -> Duration {
        self.reactive_threshold
    }

    /// Applies [`is_idle_timed_out`] with this policy's idle timeout
    #[inline]
    pub fn is_idle(&self, last_activity: Option<UnixMillis>, now: UnixMillis) -> bool {
        is_idle_timed_out(last_activity, now, self.idle_timeout)
    }
}
