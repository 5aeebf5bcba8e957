//! Periodic session upkeep without user traffic

use std::time::Duration;

use tokio::{
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};

use crate::session::{LogoutReason, RefreshOutcome, SessionManager};

/// The result of a single tick
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    /// No access token was held, so nothing was checked
    NoSession,
    /// The session was checked with the given outcome
    Checked(RefreshOutcome),
}

/// Checks the session for idleness and impending expiry on a fixed period
#[derive(Clone, Debug)]
pub struct BackgroundTicker {
    session: SessionManager,
    period: Duration,
}

impl BackgroundTicker {
    /// Constructs a ticker for `session` running every `period`
    pub fn new(session: SessionManager, period: Duration) -> Self {
        Self { session, period }
    }

    /// The period between ticks
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Runs a single tick
    pub async fn tick(&self) -> TickOutcome {
        if !self.session.is_authenticated() {
            tracing::trace!("no session held, nothing to check");
            return TickOutcome::NoSession;
        }

        if self.session.is_idle() {
            self.session.force_logout(LogoutReason::IdleTimeout);
            return TickOutcome::Checked(RefreshOutcome::LoggedOut(LogoutReason::IdleTimeout));
        }

        let threshold = self.session.policy().proactive_threshold();
        TickOutcome::Checked(self.session.maybe_refresh(threshold).await)
    }

    /// Runs the ticker in the background until the returned handle is stopped
    /// or dropped
    ///
    /// The first tick happens one period after spawning. Ticks that fall due
    /// while a previous tick is still running are skipped rather than queued.
    pub fn spawn(self) -> TickerHandle {
        let join = tokio::spawn(forever_tick(self));
        TickerHandle { join }
    }
}

async fn forever_tick(ticker: BackgroundTicker) {
    let mut interval = time::interval_at(Instant::now() + ticker.period, ticker.period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        interval.tick().await;

        let this_tick = ticker.clone();
        match tokio::spawn(async move { this_tick.tick().await }).await {
            Ok(outcome) => tracing::trace!(?outcome, "session tick complete"),
            Err(err) if err.is_panic() => tracing::error!("session tick panicked!"),
            Err(_) => tracing::debug!("session tick was cancelled"),
        }
    }
}

/// Controls a spawned [`BackgroundTicker`]
///
/// The ticker stops when this handle is dropped.
#[derive(Debug)]
pub struct TickerHandle {
    join: JoinHandle<()>,
}

impl TickerHandle {
    /// Stops the ticker
    pub fn stop(self) {}

    /// Whether the ticker has stopped running
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

impl Drop for TickerHandle {
    fn drop(&mut self) {
        self.join.abort();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use async_trait::async_trait;
    use tokenkeep_clock::{TestClock, UnixTime};

    use super::*;
    use crate::{
        codec::test_tokens,
        endpoint::{AuthEndpoint, BoxError},
        store::TokenStore,
        AccessTokenRef, FixedEndpoint, RefreshTokenRef, TokenPair,
    };

    const NOW: UnixTime = UnixTime(1_700_000_000);
    const MINUTE: Duration = Duration::from_secs(60);

    fn pair(access: &str, refresh: &str) -> TokenPair {
        TokenPair::new(access.to_owned().into(), refresh.to_owned().into())
    }

    fn session_with(endpoint: impl AuthEndpoint + 'static) -> (SessionManager, TestClock) {
        let clock = TestClock::new(NOW);
        let session = SessionManager::builder(TokenStore::default(), endpoint)
            .with_clock(clock.clone())
            .build();
        (session, clock)
    }

    mod tick {
        use super::*;

        #[tokio::test]
        async fn without_a_session_does_nothing() {
            let endpoint = FixedEndpoint::issuing(pair("A2", "R2"));
            let (session, _) = session_with(endpoint.clone());

            assert_eq!(session.ticker().tick().await, TickOutcome::NoSession);
            assert_eq!(endpoint.refresh_calls(), 0);
        }

        #[tokio::test]
        async fn idle_session_is_logged_out_without_a_network_call() {
            let endpoint = FixedEndpoint::issuing(pair("A2", "R2"));
            let (session, clock) = session_with(endpoint.clone());
            session.sign_in(&pair("A1", &test_tokens::expiring_at(NOW.0 + 120)));
            clock.advance(20 * MINUTE);

            let outcome = session.ticker().tick().await;

            assert_eq!(
                outcome,
                TickOutcome::Checked(RefreshOutcome::LoggedOut(LogoutReason::IdleTimeout))
            );
            assert_eq!(endpoint.refresh_calls(), 0);
            assert_eq!(endpoint.logout_calls(), 0);
            assert!(!session.is_authenticated());
            assert!(session.refresh_token().is_none());
            assert!(session.store().last_activity().is_none());
            assert_eq!(session.redirects().borrow().as_ref().unwrap().route, "/login");
        }

        #[tokio::test]
        async fn refreshes_proactively() {
            let endpoint = FixedEndpoint::issuing(pair("A2", "R2"));
            let (session, clock) = session_with(endpoint.clone());
            session.sign_in(&pair("A1", &test_tokens::expiring_at(NOW.0 + 10 * 60)));

            assert_eq!(
                session.ticker().tick().await,
                TickOutcome::Checked(RefreshOutcome::Skipped)
            );

            clock.advance(6 * MINUTE);
            assert_eq!(
                session.ticker().tick().await,
                TickOutcome::Checked(RefreshOutcome::Refreshed)
            );
            assert_eq!(endpoint.refresh_calls(), 1);
            assert_eq!(session.access_token().unwrap().as_str(), "A2");
        }

        #[tokio::test]
        async fn does_not_count_as_activity() {
            let (session, clock) = session_with(FixedEndpoint::rejecting());
            session.sign_in(&pair("A1", "R1"));
            let signed_in_at = session.store().last_activity();

            clock.advance(MINUTE);
            session.ticker().tick().await;

            assert_eq!(session.store().last_activity(), signed_in_at);
        }
    }

    mod spawned {
        use super::*;

        /// Panics on its first refresh, then issues `A2`/`R2`
        #[derive(Clone, Default)]
        struct FlakyEndpoint {
            calls: Arc<AtomicUsize>,
        }

        #[async_trait]
        impl AuthEndpoint for FlakyEndpoint {
            async fn refresh(&self, _: &RefreshTokenRef) -> Result<TokenPair, BoxError> {
                if self.calls.fetch_add(1, Ordering::AcqRel) == 0 {
                    panic!("refresh exploded");
                }
                Ok(pair("A2", "R2"))
            }

            async fn logout(&self, _: &AccessTokenRef) -> Result<(), BoxError> {
                Ok(())
            }
        }

        #[tokio::test(start_paused = true)]
        async fn first_tick_waits_one_period() {
            let endpoint = FixedEndpoint::issuing(pair("A2", "R2"));
            let (session, _) = session_with(endpoint.clone());
            session.sign_in(&pair("A1", &test_tokens::expiring_at(NOW.0 + 120)));

            let _handle = session.ticker().spawn();

            time::sleep(Duration::from_secs(59)).await;
            assert_eq!(endpoint.refresh_calls(), 0);

            time::sleep(Duration::from_secs(2)).await;
            assert_eq!(endpoint.refresh_calls(), 1);
            assert_eq!(session.access_token().unwrap().as_str(), "A2");
        }

        #[tokio::test(start_paused = true)]
        async fn a_panicking_tick_does_not_stop_the_ticker() {
            let endpoint = FlakyEndpoint::default();
            let (session, _) = session_with(endpoint.clone());
            session.sign_in(&pair("A1", &test_tokens::expiring_at(NOW.0 + 120)));

            let handle = session.ticker().spawn();

            time::sleep(Duration::from_secs(61)).await;
            assert_eq!(endpoint.calls.load(Ordering::Acquire), 1);
            assert!(session.is_authenticated());

            time::sleep(Duration::from_secs(60)).await;
            assert_eq!(endpoint.calls.load(Ordering::Acquire), 2);
            assert_eq!(session.access_token().unwrap().as_str(), "A2");
            assert!(!handle.is_finished());
        }

        #[tokio::test(start_paused = true)]
        async fn stopping_the_handle_ends_the_ticks() {
            let endpoint = FixedEndpoint::issuing(pair("A2", "R2"));
            let (session, _) = session_with(endpoint.clone());
            session.sign_in(&pair("A1", &test_tokens::expiring_at(NOW.0 + 120)));

            session.ticker().spawn().stop();

            time::sleep(Duration::from_secs(300)).await;
            assert_eq!(endpoint.refresh_calls(), 0);
        }
    }
}
