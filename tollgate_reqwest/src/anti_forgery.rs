use std::{fmt, sync::Arc};

use reqwest::{
    cookie::CookieStore,
    header::{HeaderName, HeaderValue},
    Method, Request, Response,
};
use reqwest_middleware::{Middleware, Next, Result};

/// The cookie the server issues its anti-forgery token in
pub const ANTI_FORGERY_COOKIE: &str = "XSRF-TOKEN";

/// The header the server expects the anti-forgery token back in
pub const ANTI_FORGERY_HEADER: &str = "requestverificationtoken";

/// A middleware that echoes the anti-forgery cookie back as a header
///
/// The token is only sent on requests that can change state, which are
/// those with a method other than `GET`, `HEAD`, `OPTIONS`, or `TRACE`. A
/// header already present on the request is left in place, and nothing is
/// sent if the cookie is missing or does not look like a token.
#[derive(Clone)]
pub struct AntiForgeryMiddleware {
    cookies: Arc<dyn CookieStore>,
    cookie_name: String,
    header: HeaderName,
}

impl AntiForgeryMiddleware {
    /// Constructs a middleware reading the [`ANTI_FORGERY_COOKIE`] from `cookies`
    pub fn new(cookies: Arc<dyn CookieStore>) -> Self {
        Self {
            cookies,
            cookie_name: ANTI_FORGERY_COOKIE.to_owned(),
            header: HeaderName::from_static(ANTI_FORGERY_HEADER),
        }
    }

    /// Reads the token from a differently named cookie
    pub fn with_cookie_name(mut self, cookie_name: impl Into<String>) -> Self {
        self.cookie_name = cookie_name.into();
        self
    }

    /// Sends the token in a differently named header
    pub fn with_header(mut self, header: HeaderName) -> Self {
        self.header = header;
        self
    }

    fn token_for(&self, req: &Request) -> Option<HeaderValue> {
        let cookies = self.cookies.cookies(req.url())?;
        let token = cookies
            .to_str()
            .ok()?
            .split(';')
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(name, _)| *name == self.cookie_name)
            .map(|(_, value)| value)?;

        if !is_token(token) {
            tracing::debug!(cookie = %self.cookie_name, "ignoring malformed anti-forgery cookie");
            return None;
        }

        let mut value = HeaderValue::from_str(token).ok()?;
        value.set_sensitive(true);
        Some(value)
    }
}

fn is_token(value: &str) -> bool {
    !value.is_empty()
        && value
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

fn is_safe(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET | Method::HEAD | Method::OPTIONS | Method::TRACE
    )
}

#[async_trait::async_trait]
impl Middleware for AntiForgeryMiddleware {
    async fn handle(
        &self,
        mut req: Request,
        extensions: &mut http::Extensions,
        next: Next<'_>,
    ) -> Result<Response> {
        if !is_safe(req.method()) && !req.headers().contains_key(&self.header) {
            if let Some(token) = self.token_for(&req) {
                req.headers_mut().insert(self.header.clone(), token);
            }
        }

        next.run(req, extensions).await
    }
}

impl fmt::Debug for AntiForgeryMiddleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AntiForgeryMiddleware")
            .field("cookie_name", &self.cookie_name)
            .field("header", &self.header)
            .finish_non_exhaustive()
    }
}
