//! An authenticated API client with coalesced silent token renewal
//!
//! When using [`ClientWithMiddleware`](reqwest_middleware::ClientWithMiddleware),
//! include the [`AccessTokenMiddleware`] in the middleware stack to attach
//! the current access token from a [`RenewalCoordinator`] to each outbound
//! request. If the token has expired, the request waits for a silent renewal
//! first. Requests that find the token expired while a renewal is under way
//! wait for that renewal instead of starting their own.
//!
//! If a request already has specified an `Authorization` header value by
//! the time that the middleware executes, the existing value will be left
//! in place, allowing overrides to be specified as required.
//!
//! ```
//! use reqwest::Client;
//! use reqwest_middleware::ClientBuilder;
//! use tollgate_reqwest::AccessTokenMiddleware;
//! use tollgate_tokens::{retry::RetryPolicy, RenewalCoordinator};
//! # use tollgate_tokens::testing::ScriptedProvider;
//! #
//! # #[tokio::main(flavor = "current_thread")] async fn main() {
//! # let provider = ScriptedProvider::fresh("token");
//! let coordinator = RenewalCoordinator::new(provider, RetryPolicy::default());
//!
//! let client = ClientBuilder::new(Client::default())
//!     .with(AccessTokenMiddleware::new(coordinator))
//!     .build();
//!
//! let req = client
//!     .get("https://example.com/api/app/lottery");
//! # async move { req
//!     .send()
//!     .await
//!     .unwrap();
//! # };
//! # }
//! ```
//!
//! By default the token goes on every request except those to the
//! authority's own endpoints ([`AUTH_EXEMPT_SUFFIXES`]). Other paths can be
//! exempted too, and any [`Predicate`] over a [`Request`] can take the place
//! of the default.
//!
//! ```
//! use tollgate_reqwest::{AccessTokenMiddleware, RequiresToken, AUTH_EXEMPT_SUFFIXES};
//! # use tollgate_tokens::{retry::RetryPolicy, testing::ScriptedProvider, RenewalCoordinator};
//! # #[tokio::main(flavor = "current_thread")] async fn main() {
//! # let provider = ScriptedProvider::fresh("token");
//! # let coordinator = RenewalCoordinator::new(provider, RetryPolicy::default());
//!
//! let exempt = AUTH_EXEMPT_SUFFIXES.iter().copied().chain(["/health"]);
//! AccessTokenMiddleware::new(coordinator).with_predicate(RequiresToken::new(exempt));
//! # }
//! ```
//!
//! Most applications will want the whole stack at once. [`ApiClient`]
//! combines the token middleware with the [`AntiForgeryMiddleware`] and
//! unwraps every response to its payload.

#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    missing_copy_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

use bytes::{BufMut, BytesMut};
use predicates::Predicate;
use reqwest::{header, Request, Response};
use reqwest_middleware::{Middleware, Next, Result};
use tollgate_tokens::{AccessTokenRef, RenewalCoordinator};

mod anti_forgery;
mod client;
mod conditions;
mod config;
mod error;
pub mod params;
pub mod response;

pub use anti_forgery::{AntiForgeryMiddleware, ANTI_FORGERY_COOKIE, ANTI_FORGERY_HEADER};
pub use client::{ApiClient, RequestOptions};
pub use conditions::{RequiresToken, AUTH_EXEMPT_SUFFIXES};
pub use config::{ArrayFormat, ClientConfig};
pub use error::ApiError;

/// A middleware that injects an access token into outgoing requests
#[derive(Clone, Debug)]
pub struct AccessTokenMiddleware<P> {
    coordinator: RenewalCoordinator,
    predicate: P,
}

impl AccessTokenMiddleware<RequiresToken> {
    /// Construct a new middleware from a renewal coordinator
    ///
    /// By default, this middleware sends its token on every request except
    /// those to the [`AUTH_EXEMPT_SUFFIXES`]. To change this behavior, provide
    /// a custom predicate with [`with_predicate()`][Self::with_predicate()].
    pub fn new(coordinator: RenewalCoordinator) -> Self {
        Self {
            coordinator,
            predicate: RequiresToken::default(),
        }
    }

    /// Replaces the default predicate with a custom predicate
    pub fn with_predicate<P>(self, predicate: P) -> AccessTokenMiddleware<P> {
        AccessTokenMiddleware {
            coordinator: self.coordinator,
            predicate,
        }
    }
}

/// The access token could not be expressed as a header value
#[derive(Clone, Copy, Debug, thiserror::Error)]
#[error("access token contains bytes that are not valid in a header")]
pub struct InvalidAccessToken;

fn bearer_header(
    token: &AccessTokenRef,
) -> std::result::Result<header::HeaderValue, InvalidAccessToken> {
    let mut header_value = BytesMut::with_capacity(token.as_str().len() + 7);
    header_value.put_slice(b"Bearer ");
    header_value.put_slice(token.as_str().as_bytes());
    let mut value = header::HeaderValue::from_maybe_shared(header_value.freeze())
        .map_err(|_| InvalidAccessToken)?;
    value.set_sensitive(true);
    Ok(value)
}

#[async_trait::async_trait]
impl<P> Middleware for AccessTokenMiddleware<P>
where
    P: Predicate<Request> + Send + Sync + 'static,
{
    async fn handle(
        &self,
        mut req: Request,
        extensions: &mut http::Extensions,
        next: Next<'_>,
    ) -> Result<Response> {
        if self.predicate.eval(&req) && !req.headers().contains_key(header::AUTHORIZATION) {
            match self.coordinator.access_token().await {
                Some(token) => {
                    let value =
                        bearer_header(&token).map_err(reqwest_middleware::Error::middleware)?;
                    req.headers_mut().insert(header::AUTHORIZATION, value);
                }
                None => {
                    tracing::debug!(url = %req.url(), "sending request without an access token")
                }
            }
        }

        next.run(req, extensions).await
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicBool, Ordering},
            Arc,
        },
        time::Duration,
    };

    use predicates::prelude::*;
    use reqwest::Client;
    use reqwest_middleware::ClientBuilder;
    use tollgate_tokens::{
        retry::RetryPolicy,
        testing::{self, ScriptedProvider, Step},
    };

    use super::*;

    const TEST_TOKEN: &str = "this-is-a-test-token";
    const BEARER_TEST_TOKEN: &str = "Bearer this-is-a-test-token";
    const API_URL: &str = "https://example.com/api/app/lottery";
    const TOKEN_URL: &str = "https://auth.example.com/connect/token";

    struct AuthChecker {
        expected_authorization: String,
        checked: AtomicBool,
    }

    impl AuthChecker {
        pub fn new(expected: impl Into<String>) -> Self {
            Self {
                expected_authorization: expected.into(),
                checked: AtomicBool::new(false),
            }
        }
    }

    #[async_trait::async_trait]
    impl Middleware for AuthChecker {
        async fn handle(
            &self,
            req: Request,
            _: &mut http::Extensions,
            _: Next<'_>,
        ) -> Result<Response> {
            let authorization = req
                .headers()
                .get(header::AUTHORIZATION)
                .expect("no authorization header");

            assert_eq!(
                authorization
                    .to_str()
                    .expect("authorization header was not valid UTF-8"),
                self.expected_authorization
            );
            self.checked.store(true, Ordering::Release);

            Ok(http::Response::<&[u8]>::default().into())
        }
    }

    #[derive(Default)]
    struct NoAuthChecker {
        checked: AtomicBool,
    }

    #[async_trait::async_trait]
    impl Middleware for NoAuthChecker {
        async fn handle(
            &self,
            req: Request,
            _: &mut http::Extensions,
            _: Next<'_>,
        ) -> Result<Response> {
            assert_eq!(req.headers().get(header::AUTHORIZATION), None);
            self.checked.store(true, Ordering::Release);

            Ok(http::Response::<&[u8]>::default().into())
        }
    }

    fn prepare_middleware(
        provider: Arc<ScriptedProvider>,
        policy: RetryPolicy,
    ) -> AccessTokenMiddleware<RequiresToken> {
        AccessTokenMiddleware::new(RenewalCoordinator::new_with_clock(
            provider,
            policy,
            testing::clock(),
        ))
    }

    async fn send_through<P, M>(middleware: AccessTokenMiddleware<P>, checker: Arc<M>, url: &str)
    where
        P: Predicate<Request> + Send + Sync + 'static,
        M: Middleware,
    {
        let client = ClientBuilder::new(Client::default())
            .with(middleware)
            .with_arc(checker)
            .build();

        let resp = client.get(url).send().await.unwrap();
        assert_eq!(resp.status(), http::StatusCode::OK);
    }

    mod when_request_does_not_have_an_authorization_header {
        use super::*;

        mod and_the_token_is_fresh {
            use super::*;

            #[tokio::test]
            async fn middleware_attaches_access_token() {
                let provider = Arc::new(ScriptedProvider::fresh(TEST_TOKEN));
                let middleware = prepare_middleware(provider.clone(), RetryPolicy::default());
                let auth_checker = Arc::new(AuthChecker::new(BEARER_TEST_TOKEN));

                send_through(middleware, auth_checker.clone(), API_URL).await;

                assert!(auth_checker.checked.load(Ordering::Acquire));
                assert_eq!(provider.attempts(), 0);
            }
        }

        mod and_the_token_has_expired {
            use super::*;

            #[tokio::test]
            async fn middleware_attaches_renewed_access_token() {
                let provider =
                    Arc::new(ScriptedProvider::expired().with_steps([Step::Renew(TEST_TOKEN)]));
                let middleware = prepare_middleware(provider.clone(), RetryPolicy::default());
                let auth_checker = Arc::new(AuthChecker::new(BEARER_TEST_TOKEN));

                send_through(middleware, auth_checker.clone(), API_URL).await;

                assert!(auth_checker.checked.load(Ordering::Acquire));
                assert_eq!(provider.attempts(), 1);
            }

            #[tokio::test]
            async fn middleware_sends_request_without_token_when_renewal_fails() {
                let provider = Arc::new(ScriptedProvider::expired());
                let middleware = prepare_middleware(
                    provider.clone(),
                    RetryPolicy::new(1, Duration::from_secs(1), Duration::ZERO),
                );
                let auth_checker = Arc::new(NoAuthChecker::default());

                send_through(middleware, auth_checker.clone(), API_URL).await;

                assert!(auth_checker.checked.load(Ordering::Acquire));
                assert_eq!(provider.removals(), 1);
            }
        }

        mod and_nobody_is_signed_in {
            use super::*;

            #[tokio::test]
            async fn middleware_does_not_attach_access_token() {
                let provider = Arc::new(ScriptedProvider::signed_out());
                let middleware = prepare_middleware(provider.clone(), RetryPolicy::default());
                let auth_checker = Arc::new(NoAuthChecker::default());

                send_through(middleware, auth_checker.clone(), API_URL).await;

                assert!(auth_checker.checked.load(Ordering::Acquire));
                assert_eq!(provider.attempts(), 0);
            }
        }

        mod and_the_endpoint_is_exempt {
            use super::*;

            #[tokio::test]
            async fn middleware_never_consults_the_provider() {
                let provider = Arc::new(ScriptedProvider::expired());
                let middleware = prepare_middleware(provider.clone(), RetryPolicy::default());
                let auth_checker = Arc::new(NoAuthChecker::default());

                send_through(middleware, auth_checker.clone(), TOKEN_URL).await;

                assert!(auth_checker.checked.load(Ordering::Acquire));
                assert_eq!(provider.lookups(), 0);
                assert_eq!(provider.attempts(), 0);
            }
        }

        mod and_predicate_evaluates_to_ignore {
            use super::*;

            #[tokio::test]
            async fn middleware_does_not_attach_access_token() {
                let provider = Arc::new(ScriptedProvider::fresh(TEST_TOKEN));
                let middleware = prepare_middleware(provider.clone(), RetryPolicy::default())
                    .with_predicate(predicate::never());
                let auth_checker = Arc::new(NoAuthChecker::default());

                send_through(middleware, auth_checker.clone(), API_URL).await;

                assert!(auth_checker.checked.load(Ordering::Acquire));
                assert_eq!(provider.lookups(), 0);
            }
        }
    }

    mod when_request_already_contains_an_authorization_header {
        use super::*;

        #[tokio::test]
        async fn middleware_does_not_attach_access_token() {
            const OVERRIDE_TOKEN: &str = "overridden!";
            // Reqwest uses a capital `B` bearer
            const BEARER_OVERRIDE_TOKEN: &str = "Bearer overridden!";

            let provider = Arc::new(ScriptedProvider::expired());
            let middleware = prepare_middleware(provider.clone(), RetryPolicy::default());
            let auth_checker = Arc::new(AuthChecker::new(BEARER_OVERRIDE_TOKEN));

            let client = ClientBuilder::new(Client::default())
                .with(middleware)
                .with_arc(auth_checker.clone())
                .build();

            let resp = client
                .get(API_URL)
                .bearer_auth(OVERRIDE_TOKEN)
                .send()
                .await
                .unwrap();

            assert_eq!(resp.status(), http::StatusCode::OK);
            assert!(auth_checker.checked.load(Ordering::Acquire));
            assert_eq!(provider.attempts(), 0);
        }
    }

    #[test]
    fn bearer_headers_are_marked_sensitive() {
        let token = tollgate_tokens::AccessToken::from_static(TEST_TOKEN);
        let value = bearer_header(&token).unwrap();
        assert!(value.is_sensitive());
        assert_eq!(value, BEARER_TEST_TOKEN);
    }
}
