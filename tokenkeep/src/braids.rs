use aliri_braid::braid;
use std::fmt;

macro_rules! limited_reveal {
    ($ty:ty: $hidden:literal, $default:literal) => {
        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                if f.alternate() {
                    f.write_str("\"")?;
                    limited_reveal(&self.0, &mut *f, $default)?;
                    f.write_str("\"")
                } else {
                    f.write_str(concat!("***", $hidden, "***"))
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                if f.alternate() {
                    limited_reveal(&self.0, &mut *f, usize::MAX)
                } else {
                    f.write_str(concat!("***", $hidden, "***"))
                }
            }
        }
    };
}

fn limited_reveal(unprotected: &str, f: &mut fmt::Formatter, default_len: usize) -> fmt::Result {
    let max_len = f.width().unwrap_or(default_len);
    if max_len <= 1 {
        f.write_str("…")
    } else if max_len > unprotected.len() {
        f.write_str(unprotected)
    } else {
        match unprotected.char_indices().nth(max_len - 2) {
            Some((idx, c)) if idx + c.len_utf8() < unprotected.len() => {
                f.write_str(&unprotected[0..idx + c.len_utf8()])?;
                f.write_str("…")
            }
            _ => f.write_str(unprotected),
        }
    }
}

/// A short-lived bearer access token
#[braid(serde, debug = "owned", display = "owned")]
pub struct AccessToken;

limited_reveal!(AccessTokenRef: "ACCESS TOKEN", 15);

/// A longer-lived refresh token, presented only to the refresh endpoint
#[braid(serde, debug = "owned", display = "owned")]
pub struct RefreshToken;

limited_reveal!(RefreshTokenRef: "REFRESH TOKEN", 5);

/// A remembered login name
#[braid(serde)]
pub struct Username;

/// A remembered password
#[braid(serde, debug = "owned", display = "owned")]
pub struct Password;

limited_reveal!(PasswordRef: "PASSWORD", 1);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_formatting_hides_secrets() {
        let token = AccessToken::from_static("eyJhbGciOiJIUzI1NiJ9.payload.signature");
        assert_eq!(format!("{:?}", token), "***ACCESS TOKEN***");
        assert_eq!(token.to_string(), "***ACCESS TOKEN***");
    }

    #[test]
    fn alternate_debug_reveals_a_bounded_prefix() {
        let token = RefreshToken::from_static("abcdefghijkl");
        assert_eq!(format!("{:#?}", token), "\"abcd…\"");
        assert_eq!(format!("{:#}", token), "abcdefghijkl");
    }

    #[test]
    fn passwords_never_show_more_than_an_ellipsis_by_default() {
        let password = Password::from_static("hunter2");
        assert_eq!(format!("{:#?}", password), "\"…\"");
    }
}
