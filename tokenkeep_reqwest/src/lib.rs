//! Middleware to look after a session on every outgoing request
//!
//! When using [`ClientWithMiddleware`](reqwest_middleware::ClientWithMiddleware),
//! include the [`SessionMiddleware`] in the middleware stack. For each request
//! it:
//!
//! 1. records activity on the session;
//! 2. ends a held session if the user had already been idle for too long,
//!    still sending the request without credentials;
//! 3. otherwise renews the tokens if the refresh token is about to expire;
//! 4. attaches the current access token to requests bound for the
//!    application's own origin;
//! 5. after an unauthorized response to such a request, renews the tokens if
//!    due and retries the request exactly once, ending the session if the
//!    retry is also unauthorized.
//!
//! ```
//! use reqwest::{Client, Url};
//! use reqwest_middleware::ClientBuilder;
//! use tokenkeep::{FixedEndpoint, SessionManager, TokenStore};
//! use tokenkeep_reqwest::SessionMiddleware;
//!
//! let session = SessionManager::builder(TokenStore::default(), FixedEndpoint::rejecting()).build();
//! let base_url = Url::parse("https://shop.example.com").unwrap();
//!
//! let client = ClientBuilder::new(Client::default())
//!     .with(SessionMiddleware::new(session, &base_url))
//!     .build();
//!
//! let req = client.get("https://shop.example.com/api/orders");
//! # async move { req
//!     .send()
//!     .await
//!     .unwrap();
//! # };
//! ```
//!
//! Which requests carry the access token can be changed with a custom
//! predicate. These predicates can be composed together to evaluate more
//! complex requirements.
//!
//! ```
//! use predicates::prelude::PredicateBooleanExt;
//! use reqwest::Url;
//! use tokenkeep::{FixedEndpoint, SessionManager, TokenStore};
//! use tokenkeep_reqwest::{SameOrigin, SessionMiddleware};
//!
//! # let session = SessionManager::builder(TokenStore::default(), FixedEndpoint::rejecting()).build();
//! let api = Url::parse("https://api.example.com").unwrap();
//! let shop = Url::parse("https://shop.example.com").unwrap();
//!
//! SessionMiddleware::new(session, &shop)
//!     .with_predicate(SameOrigin::new(&shop).or(SameOrigin::new(&api)));
//! ```
//!
//! The [`SessionClient`] bundles such a stack with the application's base URL,
//! so that path-absolute targets like `/api/orders` can be requested directly.

#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

use std::fmt;

use bytes::{BufMut, BytesMut};
use predicates::{prelude::*, reflection};
use reqwest::{header, Request, Response, StatusCode, Url};
use reqwest_middleware::{Middleware, Next, Result};
use tokenkeep::{AccessTokenRef, LogoutReason, RefreshOutcome, SessionManager};

mod client;
mod jar;

pub use client::SessionClient;
pub use jar::JarMirror;

/// A middleware that looks after a session on outgoing requests
#[derive(Clone, Debug)]
pub struct SessionMiddleware<P> {
    session: SessionManager,
    predicate: P,
}

impl SessionMiddleware<SameOrigin> {
    /// Construct a new middleware for a session
    ///
    /// By default, credentials are only attached to requests sent to the
    /// origin of `base_url`. To change this behavior, provide a custom
    /// predicate with [`with_predicate()`][Self::with_predicate()].
    pub fn new(session: SessionManager, base_url: &Url) -> Self {
        Self {
            session,
            predicate: SameOrigin::new(base_url),
        }
    }

    /// Replaces the default predicate with a custom predicate
    pub fn with_predicate<P>(self, predicate: P) -> SessionMiddleware<P> {
        SessionMiddleware {
            session: self.session,
            predicate,
        }
    }
}

impl<P> SessionMiddleware<P> {
    /// The session looked after by this middleware
    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    /// Overwrites the authorization header with the current access token
    ///
    /// A caller-supplied header is left in place when no token is held.
    /// Returns whether a token was attached.
    fn attach_token(&self, req: &mut Request) -> bool {
        let token = match self.session.access_token() {
            Some(token) => token,
            None => return false,
        };

        match bearer_header(&token) {
            Some(value) => {
                req.headers_mut().insert(header::AUTHORIZATION, value);
                true
            }
            None => {
                tracing::warn!("access token is not a valid header value, not attaching");
                false
            }
        }
    }

    async fn handle_unauthorized(
        &self,
        response: Response,
        retry: Option<Request>,
        attached: bool,
        extensions: &mut http::Extensions,
        next: Next<'_>,
    ) -> Result<Response> {
        if self.session.is_idle() {
            self.session.force_logout(LogoutReason::IdleTimeout);
            return Ok(response);
        }

        let threshold = self.session.policy().reactive_threshold();
        let ended = match self.session.maybe_refresh(threshold).await {
            RefreshOutcome::LoggedOut(reason) => {
                tracing::debug!(%reason, "session ended while recovering from unauthorized response");
                true
            }
            _ => false,
        };

        let mut retry = match retry {
            Some(retry) => retry,
            None => {
                tracing::debug!("request body cannot be replayed, not retrying");
                return Ok(response);
            }
        };

        // A token attached to the first attempt must not outlive the session.
        if !self.attach_token(&mut retry) && attached {
            retry.headers_mut().remove(header::AUTHORIZATION);
        }

        tracing::debug!("retrying unauthorized request");
        match next.run(retry, extensions).await {
            Ok(retried) if retried.status() == StatusCode::UNAUTHORIZED => {
                if !ended {
                    self.session.force_logout(LogoutReason::Unauthorized);
                }
                Ok(retried)
            }
            Ok(retried) => Ok(retried),
            Err(error) => {
                tracing::warn!(
                    error = (&error as &dyn std::error::Error),
                    "retry of unauthorized request failed"
                );
                if !ended {
                    self.session.force_logout(LogoutReason::Unauthorized);
                }
                Ok(response)
            }
        }
    }
}

/// Builds a sensitive `Bearer` authorization header value
///
/// Returns `None` if the token contains bytes not allowed in a header.
pub fn bearer_header(token: &AccessTokenRef) -> Option<header::HeaderValue> {
    let mut header_value = BytesMut::with_capacity(token.as_str().len() + 7);
    header_value.put_slice(b"Bearer ");
    header_value.put_slice(token.as_str().as_bytes());

    let mut value = header::HeaderValue::from_maybe_shared(header_value.freeze()).ok()?;
    value.set_sensitive(true);
    Some(value)
}

#[async_trait::async_trait]
impl<P> Middleware for SessionMiddleware<P>
where
    P: Predicate<Request> + Send + Sync + 'static,
{
    async fn handle(
        &self,
        mut req: Request,
        extensions: &mut http::Extensions,
        next: Next<'_>,
    ) -> Result<Response> {
        let previous_activity = self.session.record_activity();

        if self.session.is_authenticated() && self.session.was_idle_since(previous_activity) {
            self.session.force_logout(LogoutReason::IdleTimeout);
            return next.run(req, extensions).await;
        }

        let threshold = self.session.policy().proactive_threshold();
        self.session.maybe_refresh(threshold).await;

        if !self.predicate.eval(&req) {
            return next.run(req, extensions).await;
        }

        let attached = self.attach_token(&mut req);
        let retry = req.try_clone();

        let response = next.clone().run(req, extensions).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        self.handle_unauthorized(response, retry, attached, extensions, next)
            .await
    }
}

/// Only attach credentials if the request is being sent to the given origin
///
/// Origins match when scheme, host, and port are all equal.
#[derive(Clone, Debug)]
pub struct SameOrigin {
    origin: url::Origin,
}

impl SameOrigin {
    /// Construct a new predicate from any URL on the origin
    pub fn new(url: &Url) -> Self {
        Self {
            origin: url.origin(),
        }
    }
}

impl Predicate<Request> for SameOrigin {
    #[inline]
    fn eval(&self, req: &Request) -> bool {
        req.url().origin() == self.origin
    }

    fn find_case(&self, expected: bool, req: &Request) -> Option<reflection::Case> {
        let result = self.eval(req);
        if result != expected {
            Some(
                reflection::Case::new(Some(self), result).add_product(reflection::Product::new(
                    "origin",
                    req.url().origin().ascii_serialization(),
                )),
            )
        } else {
            None
        }
    }
}

impl reflection::PredicateReflection for SameOrigin {}
impl fmt::Display for SameOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("origin == ")?;
        f.write_str(&self.origin.ascii_serialization())
    }
}
