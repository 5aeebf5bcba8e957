use serde::{Deserialize, Serialize};

use crate::{AccessToken, RefreshToken};

/// An access token together with the refresh token that renews it
///
/// Serialized with the field names used by the authority's refresh
/// endpoint: `{"accessToken": "...", "refreshToken": "..."}`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    /// The short-lived access token
    pub access_token: AccessToken,
    /// The refresh token
    pub refresh_token: RefreshToken,
}

impl TokenPair {
    /// Constructs a new credential pair
    pub fn new(access_token: AccessToken, refresh_token: RefreshToken) -> Self {
        Self {
            access_token,
            refresh_token,
        }
    }
}
