//! An authority reached over HTTP

use async_trait::async_trait;
use reqwest::Url;
use thiserror::Error;

use super::{AuthEndpoint, BoxError};
use crate::{AccessTokenRef, RefreshTokenRef, TokenPair};

/// Default path of the refresh endpoint
pub const DEFAULT_REFRESH_PATH: &str = "/api/auth/refresh";
/// Default path of the logout endpoint
pub const DEFAULT_LOGOUT_PATH: &str = "/api/auth/logout";

/// An error while talking to the authority
#[derive(Debug, Error)]
pub enum EndpointError {
    /// The authority answered with a non-success status
    #[error("authority rejected the request: {body}")]
    ErrorWithBody {
        /// The underlying status error
        source: reqwest::Error,
        /// The body of the error response
        body: String,
    },
    /// Unable to deserialize the token body
    #[error("error deserializing token body from authority")]
    TokenBody(#[from] serde_json::Error),
    /// Unable to read the response
    #[error("error reading response body")]
    BodyRead(reqwest::Error),
    /// Unable to send the request to the authority
    #[error("error sending request to authority")]
    RequestSend(reqwest::Error),
}

/// Refresh and logout endpoints on the application server
#[derive(Clone, Debug)]
pub struct HttpAuthEndpoint {
    client: reqwest::Client,
    refresh_url: Url,
    logout_url: Url,
}

impl HttpAuthEndpoint {
    /// Constructs an endpoint from explicit URLs
    pub fn new(client: reqwest::Client, refresh_url: Url, logout_url: Url) -> Self {
        Self {
            client,
            refresh_url,
            logout_url,
        }
    }

    /// Constructs an endpoint at the default paths under `base_url`
    pub fn from_base_url(client: reqwest::Client, base_url: &Url) -> Result<Self, url::ParseError> {
        Self::with_paths(client, base_url, DEFAULT_REFRESH_PATH, DEFAULT_LOGOUT_PATH)
    }

    /// Constructs an endpoint at custom paths under `base_url`
    pub fn with_paths(
        client: reqwest::Client,
        base_url: &Url,
        refresh_path: &str,
        logout_path: &str,
    ) -> Result<Self, url::ParseError> {
        Ok(Self::new(
            client,
            base_url.join(refresh_path)?,
            base_url.join(logout_path)?,
        ))
    }

    /// The refresh endpoint
    pub fn refresh_url(&self) -> &Url {
        &self.refresh_url
    }

    /// The logout endpoint
    pub fn logout_url(&self) -> &Url {
        &self.logout_url
    }

    #[tracing::instrument(err, skip(self, refresh_token), fields(refresh_url = %self.refresh_url))]
    async fn request_refresh(
        &self,
        refresh_token: &RefreshTokenRef,
    ) -> Result<TokenPair, EndpointError> {
        tracing::trace!("requesting token refresh from authority");

        let resp = self
            .client
            .post(self.refresh_url.clone())
            .bearer_auth(refresh_token.as_str())
            .send()
            .await
            .map_err(EndpointError::RequestSend)?;

        tracing::debug!(
            response.status = resp.status().as_u16(),
            "received refresh response from authority"
        );

        if let Err(error) = resp.error_for_status_ref() {
            let body = resp.text().await.map_err(EndpointError::BodyRead)?;
            return Err(EndpointError::ErrorWithBody {
                source: error,
                body,
            });
        }

        let body = resp.bytes().await.map_err(EndpointError::BodyRead)?;
        let tokens: TokenPair = serde_json::from_slice(&body)?;

        tracing::info!("received new tokens");

        Ok(tokens)
    }

    #[tracing::instrument(err, skip(self, access_token), fields(logout_url = %self.logout_url))]
    async fn request_logout(&self, access_token: &AccessTokenRef) -> Result<(), EndpointError> {
        let resp = self
            .client
            .post(self.logout_url.clone())
            .bearer_auth(access_token.as_str())
            .send()
            .await
            .map_err(EndpointError::RequestSend)?;

        tracing::debug!(
            response.status = resp.status().as_u16(),
            "received logout response from authority"
        );

        if let Err(error) = resp.error_for_status_ref() {
            let body = resp.text().await.map_err(EndpointError::BodyRead)?;
            return Err(EndpointError::ErrorWithBody {
                source: error,
                body,
            });
        }

        Ok(())
    }
}

#[async_trait]
impl AuthEndpoint for HttpAuthEndpoint {
    async fn refresh(&self, refresh_token: &RefreshTokenRef) -> Result<TokenPair, BoxError> {
        Ok(self.request_refresh(refresh_token).await?)
    }

    async fn logout(&self, access_token: &AccessTokenRef) -> Result<(), BoxError> {
        Ok(self.request_logout(access_token).await?)
    }
}
