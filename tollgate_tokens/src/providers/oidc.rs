//! An identity provider that renews silently through an OpenID Connect
//! token endpoint using the `refresh_token` grant

use std::{marker::PhantomData, sync::Arc};

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use thiserror::Error;

use super::{BoxError, IdentityProvider, UserStore};
use crate::{
    clock::{Clock, System},
    ClientId, User,
};

pub mod dto;

/// An identity provider backed by an OpenID Connect authority
///
/// The current user is kept in memory, so [`get_user()`][IdentityProvider::get_user()]
/// never touches the store or the network. Every change to the user is
/// written through to the [`UserStore`].
pub struct OidcProvider<T = FormBody> {
    client: reqwest::Client,
    token_url: reqwest::Url,
    credentials: dto::ClientCredentials,
    store: Arc<dyn UserStore>,
    current: ArcSwapOption<User>,
    clock: Arc<dyn Clock>,
    content_type: PhantomData<fn() -> T>,
}

impl OidcProvider<FormBody> {
    /// Constructs a new provider for a public client
    ///
    /// Nobody is signed in until [`restore()`][Self::restore()] finds a
    /// persisted user or [`sign_in()`][Self::sign_in()] is called.
    pub fn new(
        client: reqwest::Client,
        token_url: reqwest::Url,
        client_id: ClientId,
        store: impl UserStore + 'static,
    ) -> Self {
        Self {
            client,
            token_url,
            credentials: dto::ClientCredentials::new(client_id),
            store: Arc::new(store),
            current: ArcSwapOption::empty(),
            clock: Arc::new(System),
            content_type: PhantomData,
        }
    }

    /// Configures the provider to send grant requests as JSON
    pub fn using_json_body(self) -> OidcProvider<JsonBody> {
        OidcProvider {
            client: self.client,
            token_url: self.token_url,
            credentials: self.credentials,
            store: self.store,
            current: self.current,
            clock: self.clock,
            content_type: PhantomData,
        }
    }
}

impl<T> OidcProvider<T> {
    /// Authenticates as a confidential client
    pub fn with_client_secret(mut self, client_secret: crate::ClientSecret) -> Self {
        self.credentials.client_secret = Some(client_secret);
        self
    }

    /// Requests a specific scope on every renewal
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.credentials.scope = Some(scope.into());
        self
    }

    /// Sets a custom clock used to stamp renewed tokens
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Loads a previously persisted user from the store
    ///
    /// Returns whether a user was found.
    pub async fn restore(&self) -> Result<bool, OidcError> {
        let user = self.store.load().await.map_err(OidcError::Store)?;
        let found = user.is_some();
        tracing::debug!(found, "restored user from store");
        self.current.store(user.map(Arc::new));
        Ok(found)
    }

    /// Records a user obtained through an interactive sign-in
    pub async fn sign_in(&self, user: User) -> Result<Arc<User>, OidcError> {
        self.store.save(&user).await.map_err(OidcError::Store)?;
        let user = Arc::new(user);
        self.current.store(Some(user.clone()));
        tracing::info!(expiry = user.expiry().0, "user signed in");
        Ok(user)
    }
}

impl<T> std::fmt::Debug for OidcProvider<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OidcProvider")
            .field("token_url", &self.token_url.as_str())
            .field("credentials", &self.credentials)
            .field("signed_in", &self.current.load().is_some())
            .finish()
    }
}

#[async_trait]
impl<T: RequestType> IdentityProvider for OidcProvider<T> {
    async fn get_user(&self) -> Option<Arc<User>> {
        self.current.load_full()
    }

    async fn signin_silent(&self) -> Result<Arc<User>, BoxError> {
        let current = self.current.load_full().ok_or(OidcError::NotSignedIn)?;
        let refresh_token = current
            .refresh_token()
            .ok_or(OidcError::MissingRefreshToken)?;

        let request = dto::RefreshTokenRequest {
            credentials: &self.credentials,
            refresh_token,
        };

        let mut user = request_token::<T>(&self.client, self.token_url.clone(), &request)
            .await?
            .into_user(self.clock.now());

        if user.refresh_token().is_none() {
            // The authority did not rotate, so the old refresh token stays valid
            user = user.with_refresh_token(refresh_token.to_owned());
        }

        if let Err(error) = self.store.save(&user).await {
            tracing::warn!(
                error = (&*error as &dyn std::error::Error),
                "unable to persist renewed user"
            );
        }

        let user = Arc::new(user);
        self.current.store(Some(user.clone()));
        Ok(user)
    }

    async fn remove_user(&self) -> Result<(), BoxError> {
        self.current.store(None);
        self.store.remove().await
    }
}

/// An error while attempting to renew tokens with the authority
#[derive(Debug, Error)]
pub enum OidcError {
    /// No user is signed in, so there is nothing to renew
    #[error("no user is signed in")]
    NotSignedIn,
    /// The signed-in user holds no refresh token
    #[error("signed-in user has no refresh token")]
    MissingRefreshToken,
    /// An error from the authority with an error body
    #[error("error requesting token from authority: {body}")]
    ErrorWithBody {
        /// The underlying request error
        source: reqwest::Error,
        /// The body of the error
        body: String,
    },
    /// Unable to deserialize the token body
    #[error("error deserializing token body from authority")]
    TokenBodyError(#[from] serde_json::Error),
    /// Unable to read the response
    #[error("error reading response body")]
    BodyReadError(#[source] reqwest::Error),
    /// Unable to send a token request to the authority
    #[error("error sending request to authority")]
    RequestSend(#[source] reqwest::Error),
    /// The user store failed
    #[error("user store failed")]
    Store(#[source] BoxError),
}

#[tracing::instrument(
    err,
    skip(client, token_url, request),
    fields(
        token_url = %token_url,
        credentials.client_id = %request.credentials.client_id,
    ),
)]
async fn request_token<T>(
    client: &reqwest::Client,
    token_url: reqwest::Url,
    request: &dto::RefreshTokenRequest<'_>,
) -> Result<dto::TokenResponse, OidcError>
where
    T: RequestType,
{
    tracing::trace!("requesting token from authority");

    let req = T::attach_payload(client.post(token_url), request);
    let resp = req.send().await.map_err(OidcError::RequestSend)?;

    tracing::debug!(
        response.status = resp.status().as_u16(),
        "received token response from authority"
    );

    if let Err(error) = resp.error_for_status_ref() {
        let body = resp.text().await.map_err(OidcError::BodyReadError)?;
        return Err(OidcError::ErrorWithBody {
            source: error,
            body,
        });
    }

    let body = resp.bytes().await.map_err(OidcError::BodyReadError)?;
    let token: dto::TokenResponse = serde_json::from_slice(&body)?;

    tracing::info!(
        has_id_token = token.id_token.is_some(),
        has_refresh_token = token.refresh_token.is_some(),
        lifetime = token.expires_in.0,
        "received new tokens"
    );

    Ok(token)
}

/// A manner of attaching a serializable payload to a request
pub trait RequestType: Send + Sync + 'static {
    /// Attaches the serializable payload to the request body
    fn attach_payload<S: serde::Serialize>(
        request: reqwest::RequestBuilder,
        payload: &S,
    ) -> reqwest::RequestBuilder;
}

/// Sends grant requests as JSON
#[derive(Debug)]
pub struct JsonBody;

/// Sends grant requests as URL-encoded form data, as OpenID Connect expects
#[derive(Debug)]
pub struct FormBody;

impl RequestType for JsonBody {
    fn attach_payload<S: serde::Serialize>(
        request: reqwest::RequestBuilder,
        payload: &S,
    ) -> reqwest::RequestBuilder {
        request.json(payload)
    }
}

impl RequestType for FormBody {
    fn attach_payload<S: serde::Serialize>(
        request: reqwest::RequestBuilder,
        payload: &S,
    ) -> reqwest::RequestBuilder {
        request.form(payload)
    }
}
