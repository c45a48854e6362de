//! Coalesced silent renewal of access tokens
//!
//! Clients of an OpenID Connect authority hold an access token that expires.
//! When it does, something has to renew it without bothering the user, and
//! when many requests notice the expiry at the same moment (say, after a
//! laptop wakes from sleep) only one of them should go to the authority.
//!
//! This crate provides the pieces for that:
//!
//! * an [`IdentityProvider`][providers::IdentityProvider] abstraction over
//!   whoever holds the signed-in [`User`], with an OpenID Connect
//!   implementation that renews through the `refresh_token` grant;
//! * a [`RetryPolicy`][retry::RetryPolicy] bounding each silent renewal in
//!   attempts, per-attempt timeout, and pause between attempts;
//! * a [`RenewalCoordinator`] that runs at most one renewal at a time and
//!   hands its outcome to every request that waited on it, oldest first.
//!
//! A failed renewal is not an error for the waiting requests. The cached
//! credentials are discarded and the requests proceed without a token, so
//! whatever sent them decides what an authorization failure means (for
//! example, sending the user to sign in again). Nothing here ever forces a
//! sign-in.
//!
//! ```
//! use tollgate_tokens::{
//!     providers::{FileUserStore, OidcProvider},
//!     retry::RetryPolicy,
//!     ClientId, RenewalCoordinator,
//! };
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let provider = OidcProvider::new(
//!     reqwest::Client::new(),
//!     "https://auth.example.com/connect/token".parse()?,
//!     ClientId::from_static("admin-ui"),
//!     FileUserStore::new(".user.json"),
//! );
//! provider.restore().await?;
//!
//! let coordinator = RenewalCoordinator::new(provider, RetryPolicy::default());
//!
//! if let Some(token) = coordinator.access_token().await {
//!     tracing::info!(token = format_args!("{:#?}", token), "ready to call the API");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! * `oidc` (default): [`OidcProvider`][providers::OidcProvider], renewing
//!   against an OpenID Connect token endpoint.
//! * `file` (default): [`FileUserStore`][providers::FileUserStore], persisting
//!   the signed-in user to a local file.
//! * `testing`: scripted providers for exercising renewal in tests.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

mod braids;
pub mod clock;
mod coordinator;
pub mod providers;
pub mod retry;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
mod user;

pub use braids::*;
pub use coordinator::{RenewalCoordinator, RenewalOutcome};
pub use user::{TokenStatus, User};
