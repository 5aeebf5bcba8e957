use std::sync::Arc;

use reqwest::{
    cookie::{CookieStore, Jar},
    Url,
};
use tokenkeep::{store::CookieMirror, AccessToken, AccessTokenRef};

const COOKIE_NAME: &str = "accessToken";
const COOKIE_MAX_AGE_SECS: u32 = 30 * 60;

/// Mirrors the access token into a cookie jar shared with a [`reqwest::Client`]
///
/// Lets server-rendered pages on the application's origin see the access
/// token. Build the client with [`ClientBuilder::cookie_provider`] using the
/// same jar.
///
/// [`ClientBuilder::cookie_provider`]: reqwest::ClientBuilder::cookie_provider
#[derive(Clone, Debug)]
pub struct JarMirror {
    jar: Arc<Jar>,
    url: Url,
}

impl JarMirror {
    /// Mirrors into `jar` for the origin of `url`
    pub fn new(jar: Arc<Jar>, url: Url) -> Self {
        Self { jar, url }
    }

    /// The jar being written to
    pub fn jar(&self) -> &Arc<Jar> {
        &self.jar
    }
}

impl CookieMirror for JarMirror {
    fn mirror(&self, access_token: &AccessTokenRef) {
        let cookie = format!(
            "{COOKIE_NAME}={}; Path=/; Max-Age={COOKIE_MAX_AGE_SECS}; SameSite=Lax",
            access_token.as_str()
        );
        self.jar.add_cookie_str(&cookie, &self.url);
    }

    fn clear(&self) {
        let cookie = format!("{COOKIE_NAME}=; Path=/; Max-Age=0; SameSite=Lax");
        self.jar.add_cookie_str(&cookie, &self.url);
    }

    fn read(&self) -> Option<AccessToken> {
        let header = self.jar.cookies(&self.url)?;
        let header = header.to_str().ok()?;

        header
            .split(';')
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(name, _)| *name == COOKIE_NAME)
            .map(|(_, value)| value)
            .filter(|value| !value.is_empty())
            .map(|value| AccessToken::new(value.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use tokenkeep::{RefreshToken, TokenPair, TokenStore};

    use super::*;

    fn cookies(jar: &Jar, url: &Url) -> Option<String> {
        jar.cookies(url)
            .map(|v| v.to_str().expect("cookie header was not valid UTF-8").to_owned())
    }

    #[test]
    fn store_mirrors_the_access_token_into_the_jar() {
        let jar = Arc::new(Jar::default());
        let url = Url::parse("https://shop.example.com/").unwrap();
        let store = TokenStore::default().with_cookie_mirror(JarMirror::new(jar.clone(), url.clone()));

        store.set_tokens(&TokenPair::new(
            AccessToken::from_static("A1"),
            RefreshToken::from_static("R1"),
        ));
        assert_eq!(cookies(&jar, &url).as_deref(), Some("accessToken=A1"));

        let page = Url::parse("https://shop.example.com/orders/42").unwrap();
        assert_eq!(cookies(&jar, &page).as_deref(), Some("accessToken=A1"));
    }

    #[test]
    fn clearing_the_store_withdraws_the_cookie() {
        let jar = Arc::new(Jar::default());
        let url = Url::parse("https://shop.example.com/").unwrap();
        let store = TokenStore::default().with_cookie_mirror(JarMirror::new(jar.clone(), url.clone()));

        store.set_tokens(&TokenPair::new(
            AccessToken::from_static("A1"),
            RefreshToken::from_static("R1"),
        ));
        store.clear();

        assert_eq!(cookies(&jar, &url), None);
    }

    #[test]
    fn cookie_set_by_the_server_is_read_back() {
        let jar = Arc::new(Jar::default());
        let url = Url::parse("https://shop.example.com/").unwrap();
        jar.add_cookie_str("theme=dark; Path=/", &url);
        jar.add_cookie_str("accessToken=S1; Path=/", &url);

        let store = TokenStore::default().with_cookie_mirror(JarMirror::new(jar, url));

        assert_eq!(store.access_token().unwrap().as_str(), "S1");
        assert!(store.refresh_token().is_none());
    }

    #[test]
    fn withdrawn_cookie_is_not_read_back() {
        let jar = Arc::new(Jar::default());
        let url = Url::parse("https://shop.example.com/").unwrap();
        let mirror = JarMirror::new(jar, url);

        mirror.mirror(&AccessToken::from_static("A1"));
        mirror.clear();

        assert_eq!(mirror.read(), None);
    }

    #[test]
    fn cookie_is_not_sent_to_other_hosts() {
        let jar = Arc::new(Jar::default());
        let mirror = JarMirror::new(jar.clone(), Url::parse("https://shop.example.com/").unwrap());

        mirror.mirror(&AccessToken::from_static("A1"));

        assert_eq!(cookies(&jar, &Url::parse("https://cdn.example.net/").unwrap()), None);
    }
}
