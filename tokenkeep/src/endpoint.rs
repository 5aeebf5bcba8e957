//! The authority that renews and revokes tokens

use std::{
    error,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;

use crate::{AccessTokenRef, RefreshTokenRef, TokenPair};

#[cfg(feature = "http")]
mod http;

#[cfg(feature = "http")]
pub use self::http::{EndpointError, HttpAuthEndpoint};

/// A boxed error returned across the endpoint seam
pub type BoxError = Box<dyn error::Error + Send + Sync + 'static>;

/// The server side of a session
#[async_trait]
pub trait AuthEndpoint: Send + Sync {
    /// Exchanges a refresh token for a new credential pair
    async fn refresh(&self, refresh_token: &RefreshTokenRef) -> Result<TokenPair, BoxError>;

    /// Tells the server that the session holding `access_token` is over
    async fn logout(&self, access_token: &AccessTokenRef) -> Result<(), BoxError>;
}

/// An in-process endpoint with canned answers
///
/// Every refresh either issues the same configured pair or fails. Calls are
/// counted, and clones share their counters, which makes this handy for
/// demonstrations and tests.
#[derive(Clone, Debug)]
pub struct FixedEndpoint {
    tokens: Option<TokenPair>,
    latency: Duration,
    refresh_calls: Arc<AtomicUsize>,
    logout_calls: Arc<AtomicUsize>,
}

impl FixedEndpoint {
    /// An endpoint that answers every refresh with `tokens`
    pub fn issuing(tokens: TokenPair) -> Self {
        Self {
            tokens: Some(tokens),
            latency: Duration::ZERO,
            refresh_calls: Arc::default(),
            logout_calls: Arc::default(),
        }
    }

    /// An endpoint that rejects every refresh
    pub fn rejecting() -> Self {
        Self {
            tokens: None,
            latency: Duration::ZERO,
            refresh_calls: Arc::default(),
            logout_calls: Arc::default(),
        }
    }

    /// Delays every answer by `latency`
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Number of refresh requests received so far
    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::Acquire)
    }

    /// Number of logout requests received so far
    pub fn logout_calls(&self) -> usize {
        self.logout_calls.load(Ordering::Acquire)
    }
}

#[async_trait]
impl AuthEndpoint for FixedEndpoint {
    async fn refresh(&self, _: &RefreshTokenRef) -> Result<TokenPair, BoxError> {
        self.refresh_calls.fetch_add(1, Ordering::AcqRel);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        self.tokens
            .clone()
            .ok_or_else(|| "refresh rejected by fixed endpoint".into())
    }

    async fn logout(&self, _: &AccessTokenRef) -> Result<(), BoxError> {
        self.logout_calls.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}
