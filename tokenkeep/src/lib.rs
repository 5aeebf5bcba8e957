//! Client-side management of a bearer-token session
//!
//! A session holds a short-lived access token, which is attached to outbound
//! requests, and a longer-lived refresh token, which is exchanged with the
//! authority for a new pair before it runs out. This crate keeps that pair in
//! a [`TokenStore`], decides when it needs renewing, renews it at most once at
//! a time no matter how many tasks ask, and ends the session when the user has
//! been idle for too long.
//!
//! Everything hangs off a [`SessionManager`], which the application creates
//! once and hands to whatever needs it. Clones share the same state.
//!
//! # General Flow
//!
//! On start-up, pick a storage medium and an authority, then build the
//! session. After the user logs in, hand the issued pair to
//! [`SessionManager::sign_in`] and start the background ticker so that the
//! session is looked after even when no requests are being made.
//!
//! ```no_run
//! use tokenkeep::{
//!     store::{InMemoryStore, TokenStore},
//!     AccessToken, FixedEndpoint, RefreshToken, SessionManager, TokenPair,
//! };
//!
//! # async fn example() {
//! let endpoint = FixedEndpoint::issuing(TokenPair::new(
//!     AccessToken::from_static("renewed.access.token"),
//!     RefreshToken::from_static("renewed.refresh.token"),
//! ));
//!
//! let session = SessionManager::builder(TokenStore::new(InMemoryStore::new()), endpoint).build();
//!
//! session.sign_in(&TokenPair::new(
//!     AccessToken::from_static("issued.access.token"),
//!     RefreshToken::from_static("issued.refresh.token"),
//! ));
//!
//! let _ticker = session.ticker().spawn();
//!
//! let mut redirects = session.redirects();
//! while redirects.changed().await.is_ok() {
//!     if let Some(redirect) = &*redirects.borrow() {
//!         println!("navigate to {} ({})", redirect.route, redirect.reason);
//!     }
//! }
//! # }
//! ```
//!
//! Outbound requests are handled by the `tokenkeep_reqwest` crate, which
//! records activity, attaches the access token, and retries once after an
//! unauthorized response.
//!
//! # Features
//!
//! The following features are supported by this crate, all of which are enabled by default:
//!
//! * `file`: Provides [`FileStore`][store::FileStore], a token store medium on the local
//!   filesystem.
//! * `http`: Provides [`HttpAuthEndpoint`][endpoint::HttpAuthEndpoint], an authority reached
//!   over HTTP using [reqwest].

#![cfg_attr(docsrs, feature(doc_cfg))]
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

mod braids;
pub mod codec;
pub mod coordinator;
pub mod endpoint;
pub mod policy;
mod session;
pub mod store;
pub mod ticker;
mod tokens;

pub use braids::*;
pub use endpoint::{AuthEndpoint, FixedEndpoint};
pub use session::{
    LogoutReason, Redirect, RefreshOutcome, SessionBuilder, SessionConfig, SessionManager,
};
pub use store::TokenStore;
pub use tokens::TokenPair;
