use crate::{
    api,
    auth::{
        AccountStatus, HttpAccountStatus, KeyProvider, NoopAccountStatus, RedisStore,
        SessionConfig, SessionService, TokenCodec,
    },
};
use anyhow::{Context, Result};
use secrecy::{ExposeSecret, SecretString};
use std::{path::PathBuf, sync::Arc, time::Duration};
use tracing::info;
use url::Url;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub redis_url: SecretString,
    pub private_key: PathBuf,
    pub public_key: PathBuf,
    pub session_ttl: Duration,
    pub otp_ttl: Duration,
    pub store_timeout: Duration,
    pub key_reload: Option<Duration>,
    pub status_url: Option<Url>,
}

/// Execute the server action.
/// # Errors
/// Returns an error if startup fails before the listener is serving.
pub async fn execute(args: Args) -> Result<()> {
    log_startup_args(&args);

    let keys = Arc::new(
        KeyProvider::load(&args.private_key, &args.public_key, args.store_timeout)
            .await
            .context("Could not load signing keys")?,
    );

    if let Some(every) = args.key_reload {
        keys.watch(every);
    }

    let store = RedisStore::connect(&args.redis_url, args.store_timeout)
        .await
        .context("Could not connect to the session store")?;

    let status: Arc<dyn AccountStatus> = match args.status_url {
        Some(url) => Arc::new(
            HttpAccountStatus::new(url, args.store_timeout)
                .context("Could not build the account status client")?,
        ),
        None => Arc::new(NoopAccountStatus),
    };

    let config = SessionConfig::default()
        .with_session_ttl(args.session_ttl)
        .with_otp_ttl(args.otp_ttl);

    let sessions = Arc::new(SessionService::new(
        TokenCodec::new(keys),
        Arc::new(store),
        config,
    ));

    api::new(args.port, sessions, status).await
}

fn log_startup_args(args: &Args) {
    let entries = [
        ("listen", format!("tcp:{}", args.port)),
        ("redis_url", redact_url(args.redis_url.expose_secret())),
        ("private_key", args.private_key.display().to_string()),
        ("public_key", args.public_key.display().to_string()),
        ("session_ttl", format!("{}s", args.session_ttl.as_secs())),
        ("otp_ttl", format!("{}s", args.otp_ttl.as_secs())),
        (
            "store_timeout",
            format!("{}ms", args.store_timeout.as_millis()),
        ),
        (
            "key_reload",
            args.key_reload.map_or_else(
                || "disabled".to_string(),
                |every| format!("{}s", every.as_secs()),
            ),
        ),
        (
            "status_url",
            args.status_url
                .as_ref()
                .map_or_else(|| "none".to_string(), ToString::to_string),
        ),
    ];
    log_entries("Startup configuration", &entries);
}

fn redact_url(url: &str) -> String {
    match Url::parse(url) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("REDACTED"));
            }
            parsed.to_string()
        }
        Err(_) => "invalid-url".to_string(),
    }
}

fn log_entries(title: &str, entries: &[(&str, String)]) {
    let max_key_len = entries.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
    let mut message = format!(
        "{} {} - {}\n\n{title}:",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        short_commit(crate::GIT_COMMIT_HASH)
    );
    for (key, value) in entries {
        let padding = " ".repeat(max_key_len.saturating_sub(key.len()));
        let _ =
            std::fmt::Write::write_fmt(&mut message, format_args!("\n  {key}:{padding} {value}"));
    }
    info!("{message}");
}

fn short_commit(hash: &str) -> String {
    hash.trim().chars().take(7).collect()
}
