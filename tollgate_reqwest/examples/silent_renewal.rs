use std::{path::PathBuf, time::Duration};

use clap::Parser;
use serde_json::Value;
use tollgate_reqwest::{ApiClient, ClientConfig};
use tollgate_tokens::{
    providers::{FileUserStore, OidcProvider},
    retry::RetryPolicy,
    ClientId, RenewalCoordinator,
};

#[derive(Debug, Parser)]
struct Opts {
    /// The authority's token endpoint
    #[arg(short, long, env)]
    token_url: reqwest::Url,

    /// The client ID registered with the authority
    #[arg(short, long, env)]
    client_id: String,

    /// The base URL of the API
    #[arg(short = 'b', long, env)]
    api_base_url: String,

    /// The API path to fetch, repeatedly
    #[arg(short, long, env, default_value = "/abp/application-configuration")]
    path: String,

    /// The local file holding the signed-in user
    #[arg(short = 'f', long, env, default_value = ".user.json")]
    user_file: PathBuf,

    /// Seconds to wait between requests
    #[arg(short, long, env, default_value_t = 30)]
    interval: u64,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .pretty()
        .with_env_filter(tracing_subscriber::filter::EnvFilter::from_default_env())
        .init();

    let opts = Opts::parse();

    let provider = OidcProvider::new(
        reqwest::Client::builder().https_only(true).build()?,
        opts.token_url,
        ClientId::from(opts.client_id),
        FileUserStore::new(opts.user_file),
    );

    if !provider.restore().await? {
        tracing::warn!("nobody is signed in, requests will be sent without a token");
    }

    let coordinator = RenewalCoordinator::new(provider, RetryPolicy::default());
    let client = ApiClient::new(ClientConfig::new(opts.api_base_url), coordinator)?;
    client.initialize_anti_forgery().await;

    let mut interval = tokio::time::interval(Duration::from_secs(opts.interval));
    loop {
        interval.tick().await;

        match client.get::<Value, _>(&opts.path, &()).await {
            Ok(payload) => tracing::info!(bytes = payload.to_string().len(), "fetched payload"),
            Err(error) if error.is_unauthorized() => {
                tracing::warn!("the API rejected our credentials, sign in again to continue");
            }
            Err(error) => tracing::error!(error = %error, "request failed"),
        }
    }
}
