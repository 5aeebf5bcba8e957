use reqwest::{Method, Url};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware, RequestBuilder};
use tokenkeep::SessionManager;

use crate::SessionMiddleware;

/// A client for the application's own server
///
/// Requests go through a [`SessionMiddleware`] limited to the origin of the
/// base URL. Targets are resolved against the base URL, so both
/// `/api/orders` and full URLs are accepted.
#[derive(Clone, Debug)]
pub struct SessionClient {
    client: ClientWithMiddleware,
    session: SessionManager,
    base_url: Url,
}

impl SessionClient {
    /// Wraps `client` in a session-aware middleware stack
    pub fn new(client: reqwest::Client, session: SessionManager, base_url: Url) -> Self {
        let client = ClientBuilder::new(client)
            .with(SessionMiddleware::new(session.clone(), &base_url))
            .build();

        Self::with_middleware_client(client, session, base_url)
    }

    /// Uses an already assembled middleware stack
    ///
    /// The stack is expected to include a [`SessionMiddleware`] for `session`.
    pub fn with_middleware_client(
        client: ClientWithMiddleware,
        session: SessionManager,
        base_url: Url,
    ) -> Self {
        Self {
            client,
            session,
            base_url,
        }
    }

    /// The session requests are made under
    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    /// The URL targets are resolved against
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Resolves a target against the base URL
    pub fn resolve(&self, target: &str) -> Result<Url, url::ParseError> {
        self.base_url.join(target)
    }

    /// Starts a request to `target`
    pub fn request(&self, method: Method, target: &str) -> Result<RequestBuilder, url::ParseError> {
        Ok(self.client.request(method, self.resolve(target)?))
    }

    /// Starts a `GET` request to `target`
    pub fn get(&self, target: &str) -> Result<RequestBuilder, url::ParseError> {
        self.request(Method::GET, target)
    }

    /// Starts a `POST` request to `target`
    pub fn post(&self, target: &str) -> Result<RequestBuilder, url::ParseError> {
        self.request(Method::POST, target)
    }
}

#[cfg(test)]
mod tests {
    use tokenkeep::{FixedEndpoint, TokenStore};

    use super::*;

    fn client(base: &str) -> SessionClient {
        let session = SessionManager::builder(TokenStore::default(), FixedEndpoint::rejecting()).build();
        SessionClient::new(reqwest::Client::new(), session, Url::parse(base).unwrap())
    }

    #[test]
    fn path_absolute_targets_use_the_base_origin() {
        let client = client("https://shop.example.com/app/");
        assert_eq!(
            client.resolve("/api/orders?page=2").unwrap().as_str(),
            "https://shop.example.com/api/orders?page=2"
        );
    }

    #[test]
    fn absolute_targets_are_used_as_given() {
        let client = client("https://shop.example.com/");
        assert_eq!(
            client.resolve("https://cdn.example.net/app.js").unwrap().as_str(),
            "https://cdn.example.net/app.js"
        );
    }

    #[test]
    fn unparsable_targets_are_rejected() {
        let client = client("https://shop.example.com/");
        assert!(client.get("http://[::1").is_err());
    }
}
