use std::{fmt, sync::Arc};

use reqwest::{
    cookie::Jar,
    header::{HeaderMap, HeaderName, HeaderValue},
    Method,
};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use serde::{
    de::{DeserializeOwned, IgnoredAny},
    Serialize,
};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tollgate_tokens::RenewalCoordinator;

use crate::{
    anti_forgery::AntiForgeryMiddleware, conditions::RequiresToken, config::ClientConfig,
    error::ApiError, params, response, AccessTokenMiddleware,
};

/// Parameters, body, and extra headers for a single request
#[derive(Debug, Default)]
pub struct RequestOptions {
    params: Option<Value>,
    data: Option<Value>,
    headers: HeaderMap,
    invalid: Option<serde_json::Error>,
}

impl RequestOptions {
    /// Empty options
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the query parameters
    ///
    /// Parameters must serialize to a map. Serialization errors are reported
    /// when the request is made.
    pub fn params<T: Serialize + ?Sized>(mut self, params: &T) -> Self {
        match serde_json::to_value(params) {
            Ok(value) => self.params = Some(value),
            Err(error) => self.invalid = Some(error),
        }
        self
    }

    /// Sets the JSON request body
    pub fn data<T: Serialize + ?Sized>(mut self, data: &T) -> Self {
        match serde_json::to_value(data) {
            Ok(value) => self.data = Some(value),
            Err(error) => self.invalid = Some(error),
        }
        self
    }

    /// Adds a header to this request only
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }
}

/// A client for the admin API
///
/// Every request passes through the request gate, which attaches the current
/// access token (renewing it first if it has expired) and echoes the
/// anti-forgery cookie on mutating requests. Every response passes through
/// the response gate, which yields the payload or an [`ApiError`].
///
/// Cloning is cheap; clones share the connection pool, the cookie jar, and
/// the renewal state.
#[derive(Clone)]
pub struct ApiClient {
    http: ClientWithMiddleware,
    config: Arc<ClientConfig>,
}

impl ApiClient {
    /// Constructs a client that obtains its tokens from `coordinator`
    pub fn new(config: ClientConfig, coordinator: RenewalCoordinator) -> Result<Self, ApiError> {
        let jar = Arc::new(Jar::default());
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .default_headers(config.default_headers().clone())
            .cookie_provider(Arc::clone(&jar))
            .build()
            .map_err(ApiError::Build)?;

        let predicate = RequiresToken::new(config.auth_exempt().iter().cloned());
        let http = ClientBuilder::new(client)
            .with(AccessTokenMiddleware::new(coordinator).with_predicate(predicate))
            .with(AntiForgeryMiddleware::new(jar))
            .build();

        Ok(Self::from_middleware_client(http, config))
    }

    /// Wraps a client with a custom middleware stack
    ///
    /// The stack is used as given, so it should include an
    /// [`AccessTokenMiddleware`] if requests need to be authenticated.
    pub fn from_middleware_client(http: ClientWithMiddleware, config: ClientConfig) -> Self {
        Self {
            http,
            config: Arc::new(config),
        }
    }

    /// The configuration this client was built with
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Fetches the anti-forgery cookie
    ///
    /// The server sets the cookie when serving its application configuration,
    /// so call this once before the first mutating request. A failure is
    /// logged and reported as `false`; mutating requests then go out without
    /// the header.
    pub async fn initialize_anti_forgery(&self) -> bool {
        let path = self.config.anti_forgery_path();
        let result = self
            .request::<IgnoredAny>(Method::GET, path, RequestOptions::new())
            .await;

        match result {
            Ok(_) => {
                tracing::debug!(path, "anti-forgery cookie requested");
                true
            }
            Err(error) => {
                tracing::warn!(path, error = %error, "unable to initialize the anti-forgery token");
                false
            }
        }
    }

    /// Sends a request and yields its unwrapped payload
    #[tracing::instrument(level = "debug", skip(self, options))]
    pub async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        options: RequestOptions,
    ) -> Result<T, ApiError> {
        if let Some(error) = options.invalid {
            return Err(ApiError::Serialize(error));
        }

        let mut url = self.config.resolve(path)?;
        if let Some(query) = &options.params {
            params::append_query(&mut url, query, self.config.array_format())?;
        }

        let mut builder = self.http.request(method, url).headers(options.headers);
        if let Some(data) = &options.data {
            builder = builder.json(data);
        }

        let response = builder.send().await?;
        response::unwrap_response(response).await
    }

    /// Sends a request that is abandoned as soon as `cancel` fires
    ///
    /// A cancelled request yields [`ApiError::Cancelled`]. A token renewal the
    /// request was waiting on is not cancelled with it.
    pub async fn request_cancellable<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        options: RequestOptions,
        cancel: &CancellationToken,
    ) -> Result<T, ApiError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!(path, "request cancelled");
                Err(ApiError::Cancelled)
            }
            result = self.request(method, path, options) => result,
        }
    }

    /// Sends a `GET` request with the given query parameters
    pub async fn get<T, Q>(&self, path: &str, params: &Q) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        Q: Serialize + ?Sized,
    {
        self.request(Method::GET, path, RequestOptions::new().params(params)).await
    }

    /// Sends a `POST` request with a JSON body
    pub async fn post<T, B>(&self, path: &str, data: &B) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.request(Method::POST, path, RequestOptions::new().data(data)).await
    }

    /// Sends a `PUT` request with a JSON body
    pub async fn put<T, B>(&self, path: &str, data: &B) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.request(Method::PUT, path, RequestOptions::new().data(data)).await
    }

    /// Sends a `DELETE` request
    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.request(Method::DELETE, path, RequestOptions::new()).await
    }
}

impl fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiClient")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
