use std::time::Duration;

use clap::Parser;
use cloudcore_auth::{Authenticator, IamAuthenticator};
use cloudcore_tokens::{sources::iam::IamConfig, transport::RequestOptions, TokenStatus};
use http::HeaderMap;
use tokio::time;

#[derive(Debug, Parser)]
struct Opts {
    /// The API key exchanged for IAM tokens
    #[arg(short, long, env, hide_env_values = true)]
    apikey: String,

    /// The base URL of the IAM token service
    #[arg(short, long, env = "AUTH_URL")]
    url: Option<String>,

    /// The client ID used to authenticate with IAM
    #[arg(short, long, env, requires = "client_secret")]
    client_id: Option<String>,

    /// The client secret used to authenticate with IAM
    #[arg(short = 's', long, env, hide_env_values = true, requires = "client_id")]
    client_secret: Option<String>,

    /// Skip verification of the token service's certificate
    #[arg(long, env = "AUTH_DISABLE_SSL")]
    disable_ssl_verification: bool,

    /// Seconds between authenticated requests
    #[arg(short, long, default_value_t = 5)]
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

    let mut config = IamConfig::new(opts.apikey).with_options(
        RequestOptions::default().with_disable_ssl_verification(opts.disable_ssl_verification),
    );
    if let Some(url) = opts.url {
        config = config.with_url(url);
    }
    if let (Some(id), Some(secret)) = (opts.client_id, opts.client_secret) {
        config = config.with_client_credentials(id, secret);
    }

    let authenticator = IamAuthenticator::new(config)?;

    let mut interval = time::interval(Duration::from_secs(opts.interval));
    loop {
        interval.tick().await;

        let mut headers = HeaderMap::new();
        if let Err(error) = authenticator.authenticate(&mut headers).await {
            tracing::error!(%error, "unable to authenticate request");
            continue;
        }

        let Some(token) = authenticator.token_manager().cached_token() else {
            continue;
        };
        let Some(window) = token.window() else {
            tracing::info!(token = format_args!("{:#?}", token.access_token()), "unmanaged token");
            continue;
        };

        let status = token.token_status();
        match status {
            TokenStatus::Fresh => tracing::debug!(
                ?status,
                token = format_args!("{:#?}", token.access_token()),
                refresh_at = window.refresh_at().0,
                expiry = window.expiry().0,
                "authenticated request"
            ),
            TokenStatus::NeedsRefresh => tracing::warn!(
                ?status,
                refresh_at = window.refresh_at().0,
                expiry = window.expiry().0,
                "authenticated request"
            ),
            TokenStatus::Expired => tracing::error!(
                ?status,
                refresh_at = window.refresh_at().0,
                expiry = window.expiry().0,
                "authenticated request"
            ),
        }
    }
}
