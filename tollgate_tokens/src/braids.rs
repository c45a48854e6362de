use std::fmt;

use aliri_braid::braid;

/// Redacts a secret in `Debug`/`Display` unless the alternate flag is set
///
/// With `{:#?}` the secret is revealed up to `$default` characters (or the
/// requested width), so logs can correlate tokens without leaking them.
macro_rules! redacted {
    ($ty:ty: $label:literal, $default:literal) => {
        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                if f.alternate() {
                    f.write_str("\"")?;
                    reveal_prefix(&self.0, &mut *f, $default)?;
                    f.write_str("\"")
                } else {
                    f.write_str(concat!("***", $label, "***"))
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                if f.alternate() {
                    reveal_prefix(&self.0, &mut *f, usize::MAX)
                } else {
                    f.write_str(concat!("***", $label, "***"))
                }
            }
        }
    };
}

fn reveal_prefix(secret: &str, f: &mut fmt::Formatter, default_len: usize) -> fmt::Result {
    let max_len = f.width().unwrap_or(default_len);
    if max_len <= 1 {
        return f.write_str("…");
    }

    if secret.chars().count() <= max_len {
        return f.write_str(secret);
    }

    let end = secret
        .char_indices()
        .nth(max_len - 1)
        .map_or(secret.len(), |(idx, _)| idx);
    f.write_str(&secret[..end])?;
    f.write_str("…")
}

/// An OAuth2 client ID
#[braid(serde)]
pub struct ClientId;

/// An OAuth2 client secret
#[braid(serde, debug = "owned", display = "owned")]
pub struct ClientSecret;

redacted!(ClientSecretRef: "CLIENT SECRET", 5);

/// A bearer access token
#[braid(serde, debug = "owned", display = "owned")]
pub struct AccessToken;

redacted!(AccessTokenRef: "ACCESS TOKEN", 15);

/// An OpenID Connect ID token
#[braid(serde)]
pub struct IdToken;

/// A refresh token
#[braid(serde, debug = "owned", display = "owned")]
pub struct RefreshToken;

redacted!(RefreshTokenRef: "REFRESH TOKEN", 5);
