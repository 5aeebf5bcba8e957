//! Best-effort decoding of bearer token claims
//!
//! Tokens are treated as opaque by everything except this module, which
//! peeks at the middle segment of a `header.payload.signature` token to learn
//! when it expires and who it belongs to. **No signature is checked.** The
//! values read here are only ever used to decide when to ask the authority
//! for a fresh token, never to make an authorization decision.

use std::fmt;

use base64::{
    alphabet,
    engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig},
    Engine,
};
use serde::Deserialize;
use thiserror::Error;
use tokenkeep_clock::UnixTime;

const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// The role reported for tokens that do not carry one
pub const DEFAULT_ROLE: &str = "USER";

/// A token that could not be decoded
#[derive(Debug, Error)]
pub enum Undecodable {
    /// The token is not made of exactly three `.`-separated segments
    #[error("expected 3 token segments, found {0}")]
    SegmentCount(usize),
    /// The payload segment is not valid base64url
    #[error("token payload is not valid base64url")]
    Base64(#[from] base64::DecodeError),
    /// The payload is not a JSON object of the expected shape
    #[error("token payload is not a valid claims object")]
    Payload(#[from] serde_json::Error),
}

/// A user identifier carried in the `userId` claim
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum UserId {
    /// A numeric identifier
    Numeric(i64),
    /// A textual identifier
    Text(String),
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Numeric(id) => fmt::Display::fmt(id, f),
            Self::Text(id) => f.write_str(id),
        }
    }
}

/// Identity and expiry claims read from a token payload
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Claims {
    /// The `sub` claim
    pub subject: Option<String>,
    /// The `role` claim
    pub role: Option<String>,
    /// The `userId` claim
    pub user_id: Option<UserId>,
    /// The `exp` claim
    pub expires_at: Option<UnixTime>,
}

impl Claims {
    /// The token's role, defaulting to [`DEFAULT_ROLE`]
    pub fn role(&self) -> &str {
        self.role.as_deref().unwrap_or(DEFAULT_ROLE)
    }
}

#[derive(Deserialize)]
struct RawClaims {
    // Identity claims of an unexpected type are dropped rather than failing
    // the whole token.
    #[serde(default)]
    sub: Option<serde_json::Value>,
    #[serde(default)]
    role: Option<serde_json::Value>,
    #[serde(default, rename = "userId")]
    user_id: Option<serde_json::Value>,
    // Any non-numeric `exp` fails deserialization outright.
    #[serde(default)]
    exp: Option<f64>,
}

fn text_claim(value: Option<serde_json::Value>) -> Option<String> {
    match value? {
        serde_json::Value::String(text) => Some(text),
        _ => None,
    }
}

fn user_id_claim(value: Option<serde_json::Value>) -> Option<UserId> {
    match value? {
        serde_json::Value::Number(id) => id.as_i64().map(UserId::Numeric),
        serde_json::Value::String(id) => Some(UserId::Text(id)),
        _ => None,
    }
}

/// Decodes the claims of a `header.payload.signature` token
///
/// Fails with [`Undecodable`] when the token does not have exactly three
/// segments, when the payload is not base64url, or when the payload is not a
/// JSON object whose `exp` (if present) is numeric. An absent `exp` yields
/// claims without an expiry.
pub fn decode(token: &str) -> Result<Claims, Undecodable> {
    let segments: Vec<&str> = token.split('.').collect();
    let payload = match segments.as_slice() {
        [_, payload, _] => *payload,
        _ => return Err(Undecodable::SegmentCount(segments.len())),
    };

    let raw = URL_SAFE_LENIENT.decode(payload)?;
    let raw: RawClaims = serde_json::from_slice(&raw)?;

    Ok(Claims {
        subject: text_claim(raw.sub),
        role: text_claim(raw.role),
        user_id: user_id_claim(raw.user_id),
        // JSON has no NaN or infinity; negative expiries are simply long gone.
        expires_at: raw.exp.map(|exp| UnixTime(exp.max(0.0) as u64)),
    })
}

#[cfg(test)]
pub(crate) mod test_tokens {
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};

    /// Builds an unsigned token around an arbitrary JSON payload
    pub fn with_payload(payload: &str) -> String {
        format!(
            "{}.{}.c2ln",
            URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256"}"#),
            URL_SAFE_NO_PAD.encode(payload)
        )
    }

    /// Builds an unsigned token expiring at `exp`
    pub fn expiring_at(exp: u64) -> String {
        with_payload(&format!(r#"{{"sub":"alice","exp":{}}}"#, exp))
    }
}
