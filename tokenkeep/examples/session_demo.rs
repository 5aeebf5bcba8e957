use std::{path::PathBuf, time::Duration};

use clap::Parser;
use tokenkeep::{
    endpoint::HttpAuthEndpoint,
    store::{FileStore, TokenStore},
    AccessToken, RefreshToken, SessionManager, TokenPair,
};
use tokio::time;

#[derive(Debug, Parser)]
struct Opts {
    /// The application server that issues and renews tokens
    #[clap(short, long, env)]
    base_url: reqwest::Url,

    /// An access token obtained by logging in
    #[clap(short, long, env, requires = "refresh_token", hide_env_values = true)]
    access_token: Option<AccessToken>,

    /// The refresh token issued alongside the access token
    #[clap(short, long, env, requires = "access_token", hide_env_values = true)]
    refresh_token: Option<RefreshToken>,

    /// The local file used to persist the session
    #[clap(short = 'f', long, env, default_value = ".session.json")]
    session_file: PathBuf,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    dotenvy::dotenv().ok();
    color_eyre::install()?;

    tracing_subscriber::fmt()
        .pretty()
        .with_env_filter(tracing_subscriber::filter::EnvFilter::from_default_env())
        .init();

    let opts = Opts::parse();

    let client = reqwest::Client::new();
    let endpoint = HttpAuthEndpoint::from_base_url(client, &opts.base_url)?;
    let store = TokenStore::new(FileStore::open(&opts.session_file)?);

    let session = SessionManager::builder(store, endpoint).build();

    if let (Some(access_token), Some(refresh_token)) = (opts.access_token, opts.refresh_token) {
        session.sign_in(&TokenPair::new(access_token, refresh_token));
    }

    let _ticker = session.ticker().spawn();
    let mut redirects = session.redirects();

    let mut interval = time::interval(Duration::from_secs(5));
    loop {
        tokio::select! {
            _ = interval.tick() => {
                match session.current_user() {
                    Some(user) => tracing::info!(
                        subject = user.subject.as_deref(),
                        role = user.role(),
                        expiry = user.expires_at.map(|e| e.0),
                        idle = session.is_idle(),
                        "session held"
                    ),
                    None if session.is_authenticated() => {
                        tracing::info!(idle = session.is_idle(), "opaque session held")
                    }
                    None => tracing::info!("no session held"),
                }
            }
            changed = redirects.changed() => {
                if changed.is_err() {
                    break;
                }

                if let Some(redirect) = &*redirects.borrow_and_update() {
                    tracing::warn!(
                        route = %redirect.route,
                        reason = %redirect.reason,
                        "session ended, navigate away"
                    );
                }
            }
        }
    }

    Ok(())
}
