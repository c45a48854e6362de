use std::time::Duration;

use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};

use crate::conditions::AUTH_EXEMPT_SUFFIXES;

/// How arrays in query parameters are written
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ArrayFormat {
    /// `ids[0]=1&ids[1]=2`
    #[default]
    Indices,
    /// `ids[]=1&ids[]=2`
    Brackets,
    /// `ids=1&ids=2`
    Repeat,
    /// `ids=1,2`
    Comma,
}

/// Configuration for an [`ApiClient`][crate::ApiClient]
#[derive(Clone, Debug)]
pub struct ClientConfig {
    base_url: String,
    timeout: Duration,
    default_headers: HeaderMap,
    array_format: ArrayFormat,
    auth_exempt: Vec<String>,
    anti_forgery_path: String,
}

impl ClientConfig {
    /// Constructs a configuration for the API rooted at `base_url`
    ///
    /// Requests time out after 10 seconds, ask for JSON, and identify
    /// themselves as `XMLHttpRequest` so the server answers with status codes
    /// rather than login redirects. Arrays in query parameters use
    /// [`ArrayFormat::Indices`], and the [`AUTH_EXEMPT_SUFFIXES`] are sent
    /// without a token. The anti-forgery cookie is fetched from
    /// `/abp/application-configuration`.
    pub fn new(base_url: impl Into<String>) -> Self {
        let mut default_headers = HeaderMap::new();
        default_headers.insert(
            header::ACCEPT,
            HeaderValue::from_static("application/json, text/plain, */*"),
        );
        default_headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        default_headers.insert(
            HeaderName::from_static("x-requested-with"),
            HeaderValue::from_static("XMLHttpRequest"),
        );

        Self {
            base_url: base_url.into(),
            timeout: Duration::from_secs(10),
            default_headers,
            array_format: ArrayFormat::default(),
            auth_exempt: AUTH_EXEMPT_SUFFIXES.iter().map(|s| (*s).to_owned()).collect(),
            anti_forgery_path: "/abp/application-configuration".to_owned(),
        }
    }

    /// Sets the timeout applied to every request
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Adds or replaces a header sent with every request
    pub fn with_default_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.default_headers.insert(name, value);
        self
    }

    /// Sets how arrays in query parameters are written
    pub fn with_array_format(mut self, array_format: ArrayFormat) -> Self {
        self.array_format = array_format;
        self
    }

    /// Replaces the path suffixes that are sent without a token
    pub fn with_auth_exempt<I, S>(mut self, suffixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.auth_exempt = suffixes.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the path that issues the anti-forgery cookie
    pub fn with_anti_forgery_path(mut self, path: impl Into<String>) -> Self {
        self.anti_forgery_path = path.into();
        self
    }

    /// The URL every request path is resolved against
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// The timeout applied to every request
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Headers sent with every request
    pub fn default_headers(&self) -> &HeaderMap {
        &self.default_headers
    }

    /// How arrays in query parameters are written
    pub fn array_format(&self) -> ArrayFormat {
        self.array_format
    }

    /// Path suffixes sent without a token
    pub fn auth_exempt(&self) -> &[String] {
        &self.auth_exempt
    }

    /// The path fetched by [`ApiClient::initialize_anti_forgery()`]
    ///
    /// [`ApiClient::initialize_anti_forgery()`]: crate::ApiClient::initialize_anti_forgery
    pub fn anti_forgery_path(&self) -> &str {
        &self.anti_forgery_path
    }

    /// Resolves a request path against the base URL
    ///
    /// Absolute URLs are used as given. Anything else is appended to the
    /// base URL, so `/app/items` under `https://host/api` becomes
    /// `https://host/api/app/items`.
    pub fn resolve(&self, path: &str) -> Result<reqwest::Url, url::ParseError> {
        match reqwest::Url::parse(path) {
            Ok(url) => Ok(url),
            Err(url::ParseError::RelativeUrlWithoutBase) => {
                let base = self.base_url.trim_end_matches('/');
                let path = path.trim_start_matches('/');
                reqwest::Url::parse(&format!("{}/{}", base, path))
            }
            Err(error) => Err(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_paths_are_appended_to_the_base() {
        let config = ClientConfig::new("https://admin.example.com/api/");
        let url = config.resolve("/app/bookkeeping-category").unwrap();
        assert_eq!(
            url.as_str(),
            "https://admin.example.com/api/app/bookkeeping-category"
        );
    }

    #[test]
    fn absolute_urls_are_used_as_given() {
        let config = ClientConfig::new("https://admin.example.com/api");
        let url = config
            .resolve("https://auth.example.com/connect/userinfo")
            .unwrap();
        assert_eq!(url.as_str(), "https://auth.example.com/connect/userinfo");
    }

    #[test]
    fn defaults_ask_for_json_without_login_redirects() {
        let config = ClientConfig::new("https://admin.example.com/api");
        assert_eq!(config.timeout(), Duration::from_secs(10));
        assert_eq!(config.array_format(), ArrayFormat::Indices);
        assert_eq!(
            config.default_headers().get("x-requested-with").unwrap(),
            "XMLHttpRequest"
        );
        assert!(config.auth_exempt().iter().any(|s| s == "/connect/token"));
        assert_eq!(config.anti_forgery_path(), "/abp/application-configuration");
    }
}
