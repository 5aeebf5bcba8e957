use std::{error, fmt, sync::Arc, time::Duration};

use tokenkeep_clock::{Clock, System, UnixMillis};
use tokio::sync::watch;

use crate::{
    codec::{self, Claims},
    coordinator::RefreshCoordinator,
    endpoint::AuthEndpoint,
    policy::{self, RefreshUrgency, SessionPolicy},
    store::TokenStore,
    ticker::BackgroundTicker,
    AccessToken, RefreshToken, TokenPair,
};

/// Why a session was ended
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LogoutReason {
    /// The user was inactive for longer than the idle timeout
    IdleTimeout,
    /// The refresh token had already expired
    RefreshTokenExpired,
    /// The authority would not renew the tokens
    RefreshFailed,
    /// A request stayed unauthorized even after renewing the tokens
    Unauthorized,
    /// The user asked to log out
    UserLogout,
}

impl fmt::Display for LogoutReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::IdleTimeout => "idle timeout",
            Self::RefreshTokenExpired => "refresh token expired",
            Self::RefreshFailed => "refresh failed",
            Self::Unauthorized => "unauthorized",
            Self::UserLogout => "user logout",
        })
    }
}

/// The result of asking for a refresh
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// No refresh was needed or possible
    Skipped,
    /// A new credential pair was stored
    Refreshed,
    /// The session was ended instead
    LoggedOut(LogoutReason),
}

/// A request to navigate away from the current page
///
/// The session only signals intent. Performing the navigation is up to the
/// host application.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Redirect {
    /// The route to navigate to
    pub route: String,
    /// Why the session ended
    pub reason: LogoutReason,
}

/// Routes and scheduling used by a [`SessionManager`]
#[derive(Clone, Debug)]
pub struct SessionConfig {
    login_route: String,
    home_route: String,
    tick_period: Duration,
}

impl Default for SessionConfig {
    /// Default session configuration
    ///
    /// Forced logouts redirect to `/login`, user logouts to `/`, and the
    /// background ticker runs every 60 seconds.
    fn default() -> Self {
        Self {
            login_route: "/login".to_owned(),
            home_route: "/".to_owned(),
            tick_period: Duration::from_secs(60),
        }
    }
}

impl SessionConfig {
    /// Sets the route used when the session is forcibly ended
    pub fn with_login_route(mut self, route: impl Into<String>) -> Self {
        self.login_route = route.into();
        self
    }

    /// Sets the route used after the user logs out
    pub fn with_home_route(mut self, route: impl Into<String>) -> Self {
        self.home_route = route.into();
        self
    }

    /// Sets the period of the background ticker
    pub fn with_tick_period(mut self, period: Duration) -> Self {
        self.tick_period = period;
        self
    }

    /// The route used when the session is forcibly ended
    pub fn login_route(&self) -> &str {
        &self.login_route
    }

    /// The route used after the user logs out
    pub fn home_route(&self) -> &str {
        &self.home_route
    }

    /// The period of the background ticker
    pub fn tick_period(&self) -> Duration {
        self.tick_period
    }
}

/// Builder for a [`SessionManager`]
pub struct SessionBuilder {
    store: TokenStore,
    endpoint: Arc<dyn AuthEndpoint>,
    clock: Arc<dyn Clock + Send + Sync>,
    policy: SessionPolicy,
    config: SessionConfig,
}

impl fmt::Debug for SessionBuilder {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("SessionBuilder")
            .field("store", &self.store)
            .field("policy", &self.policy)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SessionBuilder {
    /// Replaces the default session policy
    pub fn with_policy(mut self, policy: SessionPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Replaces the default routes and tick period
    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets a custom clock to be used
    ///
    /// Useful for testing purposes
    pub fn with_clock(mut self, clock: impl Clock + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Builds the session manager
    pub fn build(self) -> SessionManager {
        let (redirects, _) = watch::channel(None);
        SessionManager {
            inner: Arc::new(Inner {
                store: self.store,
                endpoint: self.endpoint,
                clock: self.clock,
                policy: self.policy,
                config: self.config,
                coordinator: RefreshCoordinator::new(),
                redirects,
            }),
        }
    }
}

struct Inner {
    store: TokenStore,
    endpoint: Arc<dyn AuthEndpoint>,
    clock: Arc<dyn Clock + Send + Sync>,
    policy: SessionPolicy,
    config: SessionConfig,
    coordinator: RefreshCoordinator,
    redirects: watch::Sender<Option<Redirect>>,
}

/// The client-side session: stored credentials, their renewal, and idle logout
///
/// Owned by the application and handed to whatever needs it; clones share
/// the same state.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("store", &self.inner.store)
            .field("policy", &self.inner.policy)
            .field("config", &self.inner.config)
            .field("refresh_in_flight", &self.inner.coordinator.in_flight())
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    /// Starts building a session around a store and the authority's endpoint
    pub fn builder(store: TokenStore, endpoint: impl AuthEndpoint + 'static) -> SessionBuilder {
        SessionBuilder {
            store,
            endpoint: Arc::new(endpoint),
            clock: Arc::new(System),
            policy: SessionPolicy::default(),
            config: SessionConfig::default(),
        }
    }

    /// The underlying token store
    pub fn store(&self) -> &TokenStore {
        &self.inner.store
    }

    /// The session policy in effect
    pub fn policy(&self) -> &SessionPolicy {
        &self.inner.policy
    }

    /// The routes and tick period in effect
    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// The current time according to the session's clock
    pub fn now(&self) -> UnixMillis {
        self.inner.clock.now_millis()
    }

    /// Subscribes to navigation requests
    ///
    /// The receiver holds the most recent request, or `None` if the session
    /// has not asked to navigate anywhere yet.
    pub fn redirects(&self) -> watch::Receiver<Option<Redirect>> {
        self.inner.redirects.subscribe()
    }

    /// A background ticker for this session
    pub fn ticker(&self) -> BackgroundTicker {
        BackgroundTicker::new(self.clone(), self.inner.config.tick_period)
    }

    /// Stores a credential pair obtained by logging in
    ///
    /// Also starts the activity record, so that a stale record left over from
    /// an earlier session cannot end this one immediately.
    pub fn sign_in(&self, tokens: &TokenPair) {
        self.inner.store.set_tokens(tokens);
        self.record_activity();
        tracing::info!("signed in");
    }

    /// The current access token, if any
    pub fn access_token(&self) -> Option<AccessToken> {
        self.inner.store.access_token()
    }

    /// The current refresh token, if any
    pub fn refresh_token(&self) -> Option<RefreshToken> {
        self.inner.store.refresh_token()
    }

    /// Whether an access token is held
    pub fn is_authenticated(&self) -> bool {
        self.access_token().is_some()
    }

    /// The claims of the current access token
    ///
    /// Returns `None` when there is no access token or it cannot be decoded.
    pub fn current_user(&self) -> Option<Claims> {
        let token = self.access_token()?;
        match codec::decode(token.as_str()) {
            Ok(claims) => Some(claims),
            Err(error) => {
                tracing::debug!(
                    error = (&error as &dyn error::Error),
                    "unable to decode access token claims"
                );
                None
            }
        }
    }

    /// Records activity now, returning when activity was previously recorded
    pub fn record_activity(&self) -> Option<UnixMillis> {
        self.inner.store.record_activity(self.now())
    }

    /// Whether the session has been idle for at least the idle timeout
    pub fn is_idle(&self) -> bool {
        self.inner
            .policy
            .is_idle(self.inner.store.last_activity(), self.now())
    }

    /// Whether `last_activity` is at least the idle timeout ago
    pub fn was_idle_since(&self, last_activity: Option<UnixMillis>) -> bool {
        self.inner.policy.is_idle(last_activity, self.now())
    }

    /// Ends the session locally and asks to navigate to the login route
    pub fn force_logout(&self, reason: LogoutReason) {
        tracing::warn!(%reason, "ending session");
        self.inner.store.clear();
        self.redirect(self.inner.config.login_route.clone(), reason);
    }

    /// Logs out at the authority, then ends the session locally
    ///
    /// The local session is cleared whether or not the authority could be
    /// reached.
    #[tracing::instrument(skip(self))]
    pub async fn logout(&self) {
        if let Some(token) = self.access_token() {
            match self.inner.endpoint.logout(&token).await {
                Ok(()) => tracing::info!("authority acknowledged logout"),
                Err(error) => tracing::warn!(
                    error = (&*error as &dyn error::Error),
                    "logout request failed, clearing local session anyway"
                ),
            }
        }

        self.inner.store.clear();
        self.redirect(self.inner.config.home_route.clone(), LogoutReason::UserLogout);
    }

    /// Renews the credential pair if the refresh token expires within `threshold`
    ///
    /// Idle sessions and sessions whose refresh token has already expired are
    /// ended without contacting the authority. At most one renewal is in
    /// flight at any time: concurrent callers share its outcome.
    pub async fn maybe_refresh(&self, threshold: Duration) -> RefreshOutcome {
        if self.is_idle() {
            self.force_logout(LogoutReason::IdleTimeout);
            return RefreshOutcome::LoggedOut(LogoutReason::IdleTimeout);
        }

        let refresh_token = match self.refresh_token() {
            Some(token) => token,
            None => return RefreshOutcome::Skipped,
        };

        let claims = match codec::decode(refresh_token.as_str()) {
            Ok(claims) => Some(claims),
            Err(error) => {
                tracing::debug!(
                    error = (&error as &dyn error::Error),
                    "refresh token is undecodable, not refreshing"
                );
                None
            }
        };

        let now = self.inner.clock.now();
        match policy::refresh_urgency(claims.as_ref(), now, threshold) {
            RefreshUrgency::Skip => RefreshOutcome::Skipped,
            RefreshUrgency::Expired => {
                self.force_logout(LogoutReason::RefreshTokenExpired);
                RefreshOutcome::LoggedOut(LogoutReason::RefreshTokenExpired)
            }
            RefreshUrgency::RefreshNow => {
                tracing::debug!(
                    now = now.0,
                    expiry = claims.and_then(|c| c.expires_at).map(|e| e.0),
                    "refresh token nearing expiry"
                );
                self.inner
                    .coordinator
                    .single_flight(|| self.renew(refresh_token))
                    .await
            }
        }
    }

    async fn renew(&self, refresh_token: RefreshToken) -> RefreshOutcome {
        // A flight that settled after `refresh_token` was read may have rotated it.
        match self.refresh_token() {
            Some(current) if current == refresh_token => {}
            Some(_) => {
                tracing::debug!("session tokens were renewed concurrently");
                return RefreshOutcome::Refreshed;
            }
            None => return RefreshOutcome::Skipped,
        }

        match self.inner.endpoint.refresh(&refresh_token).await {
            Ok(tokens) => {
                self.inner.store.set_tokens(&tokens);
                tracing::info!("renewed session tokens");
                RefreshOutcome::Refreshed
            }
            Err(error) => {
                tracing::warn!(
                    error = (&*error as &dyn error::Error),
                    "unable to renew session tokens"
                );
                self.force_logout(LogoutReason::RefreshFailed);
                RefreshOutcome::LoggedOut(LogoutReason::RefreshFailed)
            }
        }
    }

    fn redirect(&self, route: String, reason: LogoutReason) {
        tracing::debug!(%route, %reason, "requesting navigation");
        self.inner.redirects.send_replace(Some(Redirect { route, reason }));
    }
}
