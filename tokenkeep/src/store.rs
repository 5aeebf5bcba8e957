//! Persistence of credentials and activity
//!
//! [`TokenStore`] offers typed access to a handful of well-known keys held in
//! some [`KeyValueStore`]. Storage failures are logged and swallowed: a
//! session that cannot be persisted still works for the life of the process.

use std::{fmt, sync::Arc};

use tokenkeep_clock::UnixMillis;

use crate::{AccessToken, AccessTokenRef, Password, RefreshToken, TokenPair, Username};

#[cfg(feature = "file")]
mod file;
mod in_memory;

#[cfg(feature = "file")]
pub use file::FileStore;
pub use in_memory::InMemoryStore;

/// Key holding the access token
pub const ACCESS_TOKEN_KEY: &str = "accessToken";
/// Key holding the refresh token
pub const REFRESH_TOKEN_KEY: &str = "refreshToken";
/// Key holding the last activity time, in epoch milliseconds
pub const LAST_ACTIVITY_KEY: &str = "lastActivityAt";
/// Key holding a remembered username
pub const SAVED_USERNAME_KEY: &str = "savedUsername";
/// Key holding a remembered password
pub const SAVED_PASSWORD_KEY: &str = "savedPassword";
/// Key holding the remember-me flag
pub const REMEMBER_ME_KEY: &str = "rememberMe";

/// Every key removed when the session is cleared
pub const SESSION_KEYS: [&str; 6] = [
    ACCESS_TOKEN_KEY,
    REFRESH_TOKEN_KEY,
    LAST_ACTIVITY_KEY,
    SAVED_USERNAME_KEY,
    SAVED_PASSWORD_KEY,
    REMEMBER_ME_KEY,
];

/// A synchronous string key/value medium
pub trait KeyValueStore: Send + Sync {
    /// Reads the value stored under `key`
    fn get(&self, key: &str) -> Option<String>;

    /// Stores `value` under `key`, replacing any existing value
    fn set(&self, key: &str, value: &str);

    /// Removes any value stored under `key`
    fn remove(&self, key: &str);

    /// Removes several keys
    ///
    /// Implementations should make this atomic, so that no reader observes
    /// only some of the keys removed.
    fn remove_all(&self, keys: &[&str]) {
        for key in keys {
            self.remove(key);
        }
    }
}

/// A secondary channel that exposes the access token to the server
///
/// Mirroring is best-effort: implementations must not panic, and a failed
/// mirror never prevents the primary store from being updated or cleared.
pub trait CookieMirror: Send + Sync {
    /// Publishes the current access token
    fn mirror(&self, access_token: &AccessTokenRef);

    /// Withdraws any published access token
    fn clear(&self);

    /// Reads back a published access token
    ///
    /// Consulted only when the primary store holds no access token.
    fn read(&self) -> Option<AccessToken> {
        None
    }
}

/// A username and password kept for the login form
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RememberedLogin {
    /// The remembered username
    pub username: Username,
    /// The remembered password
    pub password: Password,
}

/// Typed access to the credentials and activity record of a session
#[derive(Clone)]
pub struct TokenStore {
    backend: Arc<dyn KeyValueStore>,
    mirror: Option<Arc<dyn CookieMirror>>,
}

impl fmt::Debug for TokenStore {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TokenStore")
            .field("has_mirror", &self.mirror.is_some())
            .finish_non_exhaustive()
    }
}

impl Default for TokenStore {
    /// An in-memory store without a cookie mirror
    fn default() -> Self {
        Self::new(InMemoryStore::new())
    }
}

impl TokenStore {
    /// Constructs a token store on top of a key/value medium
    pub fn new(backend: impl KeyValueStore + 'static) -> Self {
        Self {
            backend: Arc::new(backend),
            mirror: None,
        }
    }

    /// Also publishes the access token through `mirror`
    pub fn with_cookie_mirror(mut self, mirror: impl CookieMirror + 'static) -> Self {
        self.mirror = Some(Arc::new(mirror));
        self
    }

    /// The stored access token, if any
    ///
    /// Falls back to the cookie mirror when the primary store has none.
    pub fn access_token(&self) -> Option<AccessToken> {
        self.backend
            .get(ACCESS_TOKEN_KEY)
            .filter(|t| !t.is_empty())
            .map(From::from)
            .or_else(|| self.mirror.as_ref()?.read())
            .filter(|t| !t.as_str().is_empty())
    }

    /// The stored refresh token, if any
    pub fn refresh_token(&self) -> Option<RefreshToken> {
        self.backend
            .get(REFRESH_TOKEN_KEY)
            .filter(|t| !t.is_empty())
            .map(From::from)
    }

    /// Replaces the stored credential pair
    pub fn set_tokens(&self, tokens: &TokenPair) {
        self.backend
            .set(ACCESS_TOKEN_KEY, tokens.access_token.as_str());
        self.backend
            .set(REFRESH_TOKEN_KEY, tokens.refresh_token.as_str());

        if let Some(mirror) = &self.mirror {
            mirror.mirror(&tokens.access_token);
        }
    }

    /// When activity was last recorded
    ///
    /// A value that cannot be parsed is reported as no record at all.
    pub fn last_activity(&self) -> Option<UnixMillis> {
        let raw = self.backend.get(LAST_ACTIVITY_KEY)?;
        match raw.parse() {
            Ok(at) => Some(at),
            Err(_) => {
                tracing::debug!(value = %raw, "ignoring unparsable activity timestamp");
                None
            }
        }
    }

    /// Records activity at `now`, returning the previously recorded time
    pub fn record_activity(&self, now: UnixMillis) -> Option<UnixMillis> {
        let previous = self.last_activity();
        self.backend.set(LAST_ACTIVITY_KEY, &now.to_string());
        previous
    }

    /// Remembers login details for pre-filling a login form
    pub fn remember_login(&self, login: &RememberedLogin) {
        self.backend.set(SAVED_USERNAME_KEY, login.username.as_str());
        self.backend.set(SAVED_PASSWORD_KEY, login.password.as_str());
        self.backend.set(REMEMBER_ME_KEY, "true");
    }

    /// The remembered login details, if the user opted in
    pub fn remembered_login(&self) -> Option<RememberedLogin> {
        if self.backend.get(REMEMBER_ME_KEY).as_deref() != Some("true") {
            return None;
        }

        Some(RememberedLogin {
            username: self.backend.get(SAVED_USERNAME_KEY)?.into(),
            password: self.backend.get(SAVED_PASSWORD_KEY)?.into(),
        })
    }

    /// Removes credentials, activity, and remembered login details together
    pub fn clear(&self) {
        self.backend.remove_all(&SESSION_KEYS);

        if let Some(mirror) = &self.mirror {
            mirror.clear();
        }

        tracing::debug!("cleared stored session");
    }
}

impl RememberedLogin {
    /// Constructs remembered login details
    pub fn new(username: Username, password: Password) -> Self {
        Self { username, password }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct RecordingMirror {
        events: Arc<Mutex<Vec<String>>>,
    }

    impl CookieMirror for RecordingMirror {
        fn mirror(&self, access_token: &AccessTokenRef) {
            self.events.lock().unwrap().push(format!("set {}", access_token.as_str()));
        }

        fn clear(&self) {
            self.events.lock().unwrap().push("clear".to_owned());
        }
    }

    struct PublishedMirror(&'static str);

    impl CookieMirror for PublishedMirror {
        fn mirror(&self, _: &AccessTokenRef) {}

        fn clear(&self) {}

        fn read(&self) -> Option<AccessToken> {
            Some(AccessToken::from_static(self.0))
        }
    }

    fn pair(access: &'static str, refresh: &'static str) -> TokenPair {
        TokenPair::new(AccessToken::from_static(access), RefreshToken::from_static(refresh))
    }

    #[test]
    fn empty_store_is_unauthenticated() {
        let store = TokenStore::default();
        assert!(store.access_token().is_none());
        assert!(store.refresh_token().is_none());
        assert!(store.last_activity().is_none());
    }

    #[test]
    fn stores_and_reads_a_pair() {
        let store = TokenStore::default();
        store.set_tokens(&pair("A1", "R1"));

        assert_eq!(store.access_token().unwrap().as_str(), "A1");
        assert_eq!(store.refresh_token().unwrap().as_str(), "R1");
    }

    #[test]
    fn empty_values_count_as_absent() {
        let backend = InMemoryStore::new();
        backend.set(ACCESS_TOKEN_KEY, "");
        let store = TokenStore::new(backend);
        assert!(store.access_token().is_none());
    }

    #[test]
    fn access_token_falls_back_to_the_mirror() {
        let store = TokenStore::default().with_cookie_mirror(PublishedMirror("C1"));
        assert_eq!(store.access_token().unwrap().as_str(), "C1");
        assert!(store.refresh_token().is_none());

        store.set_tokens(&pair("A1", "R1"));
        assert_eq!(store.access_token().unwrap().as_str(), "A1");
    }

    #[test]
    fn record_activity_returns_the_previous_time() {
        let store = TokenStore::default();
        assert_eq!(store.record_activity(UnixMillis(1_000)), None);
        assert_eq!(store.record_activity(UnixMillis(2_000)), Some(UnixMillis(1_000)));
        assert_eq!(store.last_activity(), Some(UnixMillis(2_000)));
    }

    #[test]
    fn garbage_activity_is_ignored() {
        let backend = InMemoryStore::new();
        backend.set(LAST_ACTIVITY_KEY, "NaN");
        assert_eq!(TokenStore::new(backend).last_activity(), None);
    }

    #[test]
    fn remembered_login_requires_opt_in() {
        let backend = InMemoryStore::new();
        backend.set(SAVED_USERNAME_KEY, "alice");
        backend.set(SAVED_PASSWORD_KEY, "hunter2");
        let store = TokenStore::new(backend);
        assert!(store.remembered_login().is_none());

        let login = RememberedLogin::new(Username::from_static("alice"), Password::from_static("hunter2"));
        store.remember_login(&login);
        assert_eq!(store.remembered_login(), Some(login));
    }

    #[test]
    fn clear_removes_everything_and_withdraws_the_mirror() {
        let mirror = RecordingMirror::default();
        let events = mirror.events.clone();
        let store = TokenStore::default().with_cookie_mirror(mirror);

        store.set_tokens(&pair("A1", "R1"));
        store.record_activity(UnixMillis(5));
        store.remember_login(&RememberedLogin::new(Username::from_static("alice"), Password::from_static("pw")));

        store.clear();

        assert!(store.access_token().is_none());
        assert!(store.refresh_token().is_none());
        assert!(store.last_activity().is_none());
        assert!(store.remembered_login().is_none());
        assert_eq!(*events.lock().unwrap(), vec!["set A1".to_owned(), "clear".to_owned()]);
    }
}
