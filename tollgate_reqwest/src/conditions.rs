//! Conditions deciding which requests get an access token

use std::{fmt, sync::Arc};

use predicates::{reflection, Predicate};
use reqwest::Request;

/// Endpoints that must stay reachable without a token
///
/// Renewing a token must never itself depend on having a valid token, so the
/// authority's own endpoints and the login page are exempt.
pub const AUTH_EXEMPT_SUFFIXES: &[&str] = &[
    "/connect/authorize",
    "/connect/token",
    "/connect/userinfo",
    "/login",
];

/// Attach an access token unless the request path ends with an exempt suffix
///
/// Only the path is compared; the query string does not take part.
#[derive(Clone, Debug)]
pub struct RequiresToken {
    exempt: Arc<[String]>,
}

impl Default for RequiresToken {
    /// Exempts the [`AUTH_EXEMPT_SUFFIXES`]
    fn default() -> Self {
        Self::new(AUTH_EXEMPT_SUFFIXES.iter().copied())
    }
}

impl RequiresToken {
    /// Constructs a predicate exempting the given path suffixes
    pub fn new<I, S>(exempt: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            exempt: exempt.into_iter().map(Into::into).collect(),
        }
    }

    /// The suffix that exempts `path`, if any
    fn exempted_by(&self, path: &str) -> Option<&str> {
        self.exempt
            .iter()
            .map(String::as_str)
            .find(|suffix| path.ends_with(suffix))
    }
}

impl Predicate<Request> for RequiresToken {
    #[inline]
    fn eval(&self, req: &Request) -> bool {
        self.exempted_by(req.url().path()).is_none()
    }

    fn find_case(&self, expected: bool, req: &Request) -> Option<reflection::Case> {
        let result = self.eval(req);
        if result != expected {
            let case = reflection::Case::new(Some(self), result).add_product(
                reflection::Product::new("path", req.url().path().to_owned()),
            );
            Some(match self.exempted_by(req.url().path()) {
                Some(suffix) => {
                    case.add_product(reflection::Product::new("exempted by", suffix.to_owned()))
                }
                None => case,
            })
        } else {
            None
        }
    }
}

impl reflection::PredicateReflection for RequiresToken {}
impl fmt::Display for RequiresToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("path does not end with any of [")?;
        for (idx, suffix) in self.exempt.iter().enumerate() {
            if idx > 0 {
                f.write_str(", ")?;
            }
            f.write_str(suffix)?;
        }
        f.write_str("]")
    }
}
