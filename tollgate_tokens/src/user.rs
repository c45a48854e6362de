use serde::{Deserialize, Serialize};

use crate::{
    clock::{Clock, DurationSecs, UnixTime},
    AccessToken, AccessTokenRef, IdToken, IdTokenRef, RefreshToken, RefreshTokenRef,
};

/// The authenticated user as held by an identity provider
///
/// Carries the tokens issued at sign-in (or at the most recent renewal)
/// along with when they were issued and when the access token expires.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct User {
    access_token: AccessToken,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    refresh_token: Option<RefreshToken>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id_token: Option<IdToken>,
    #[serde(default = "default_token_type")]
    token_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    scope: Option<String>,
    issued: UnixTime,
    expiry: UnixTime,
}

fn default_token_type() -> String {
    String::from("Bearer")
}

/// An access token's lifecycle status
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenStatus {
    /// The token may be attached to requests
    Fresh,
    /// The token must be renewed before use
    Expired,
}

impl User {
    /// Constructs a user whose access token was issued at `issued` and
    /// remains valid for `lifetime`
    pub fn new(access_token: AccessToken, issued: UnixTime, lifetime: DurationSecs) -> Self {
        Self {
            access_token,
            refresh_token: None,
            id_token: None,
            token_type: default_token_type(),
            scope: None,
            issued,
            expiry: issued + lifetime,
        }
    }

    /// Attaches a refresh token
    pub fn with_refresh_token(mut self, refresh_token: RefreshToken) -> Self {
        self.refresh_token = Some(refresh_token);
        self
    }

    /// Attaches an ID token
    pub fn with_id_token(mut self, id_token: IdToken) -> Self {
        self.id_token = Some(id_token);
        self
    }

    /// Records the scope granted to the access token
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    /// Overrides the token type, `Bearer` by default
    pub fn with_token_type(mut self, token_type: impl Into<String>) -> Self {
        self.token_type = token_type.into();
        self
    }

    /// Gets the current access token
    #[inline]
    pub fn access_token(&self) -> &AccessTokenRef {
        &self.access_token
    }

    /// Gets the refresh token, if one was issued
    #[inline]
    pub fn refresh_token(&self) -> Option<&RefreshTokenRef> {
        self.refresh_token.as_deref()
    }

    /// Gets the ID token, if one was issued
    #[inline]
    pub fn id_token(&self) -> Option<&IdTokenRef> {
        self.id_token.as_deref()
    }

    /// Gets the token type
    #[inline]
    pub fn token_type(&self) -> &str {
        &self.token_type
    }

    /// Gets the granted scope
    #[inline]
    pub fn scope(&self) -> Option<&str> {
        self.scope.as_deref()
    }

    /// Gets the time that the access token was issued
    #[inline]
    pub fn issued(&self) -> UnixTime {
        self.issued
    }

    /// Gets the time that the access token expires
    #[inline]
    pub fn expiry(&self) -> UnixTime {
        self.expiry
    }

    /// Gets the access token's total lifetime
    #[inline]
    pub fn lifetime(&self) -> DurationSecs {
        self.expiry - self.issued
    }

    /// Gets the access token's status according to `clock`
    #[inline]
    pub fn status_with_clock<C: Clock + ?Sized>(&self, clock: &C) -> TokenStatus {
        self.status_at(clock.now())
    }

    /// Gets the access token's status as of `time`
    #[inline]
    pub fn status_at(&self, time: UnixTime) -> TokenStatus {
        if time < self.expiry {
            TokenStatus::Fresh
        } else {
            TokenStatus::Expired
        }
    }

    /// Whether the access token has expired as of `time`
    #[inline]
    pub fn is_expired_at(&self, time: UnixTime) -> bool {
        self.status_at(time) == TokenStatus::Expired
    }

    /// Gets how much longer the access token stays valid as of `time`
    #[inline]
    pub fn until_expired_at(&self, time: UnixTime) -> DurationSecs {
        self.expiry - time
    }
}
