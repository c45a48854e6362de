//! DTOs exchanged with an OpenID Connect token endpoint

use serde::{Deserialize, Serialize, Serializer};

use crate::{
    clock::{DurationSecs, UnixTime},
    AccessToken, ClientId, ClientSecret, IdToken, RefreshToken, RefreshTokenRef, User,
};

/// The client registration used when talking to the token endpoint
#[derive(Debug, Clone)]
pub struct ClientCredentials {
    /// The client ID
    pub client_id: ClientId,

    /// The client secret, for confidential clients
    pub client_secret: Option<ClientSecret>,

    /// The scope to request on renewal, if it should differ from the original grant
    pub scope: Option<String>,
}

impl ClientCredentials {
    /// Credentials for a public client
    pub fn new(client_id: ClientId) -> Self {
        Self {
            client_id,
            client_secret: None,
            scope: None,
        }
    }
}

/// A `refresh_token` grant request
#[derive(Debug)]
pub(super) struct RefreshTokenRequest<'a> {
    pub credentials: &'a ClientCredentials,
    pub refresh_token: &'a RefreshTokenRef,
}

impl<'a> Serialize for RefreshTokenRequest<'a> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        use serde::ser::SerializeStruct;

        let mut ser = serializer.serialize_struct("RefreshTokenRequest", 5)?;
        ser.serialize_field("grant_type", "refresh_token")?;
        ser.serialize_field("client_id", &self.credentials.client_id)?;
        if let Some(secret) = &self.credentials.client_secret {
            ser.serialize_field("client_secret", secret)?;
        } else {
            ser.skip_field("client_secret")?;
        }
        ser.serialize_field("refresh_token", self.refresh_token)?;
        if let Some(scope) = &self.credentials.scope {
            ser.serialize_field("scope", scope)?;
        } else {
            ser.skip_field("scope")?;
        }
        ser.end()
    }
}

/// A successful token endpoint response
#[derive(Debug, Deserialize, Serialize)]
pub struct TokenResponse {
    /// The new access token
    pub access_token: AccessToken,
    /// A new ID token, if one was issued
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<IdToken>,
    /// A rotated refresh token, if the authority rotates them
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<RefreshToken>,
    /// How long the access token is valid for
    pub expires_in: DurationSecs,
    /// The token type, usually `Bearer`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    /// The scope actually granted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl TokenResponse {
    /// Stamps the response with the time it was received
    pub fn into_user(self, issued: UnixTime) -> User {
        let mut user = User::new(self.access_token, issued, self.expires_in);
        if let Some(refresh_token) = self.refresh_token {
            user = user.with_refresh_token(refresh_token);
        }
        if let Some(id_token) = self.id_token {
            user = user.with_id_token(id_token);
        }
        if let Some(token_type) = self.token_type {
            user = user.with_token_type(token_type);
        }
        if let Some(scope) = self.scope {
            user = user.with_scope(scope);
        }
        user
    }
}
