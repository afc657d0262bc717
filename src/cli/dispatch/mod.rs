use crate::cli::{
    actions::{server::Args, Action},
    commands::{
        ARG_KEY_RELOAD, ARG_OTP_TTL, ARG_PORT, ARG_PRIVATE_KEY, ARG_PUBLIC_KEY, ARG_REDIS_URL,
        ARG_SESSION_TTL, ARG_STATUS_URL, ARG_STORE_TIMEOUT,
    },
};
use anyhow::{Context, Result};
use secrecy::SecretString;
use std::{path::PathBuf, time::Duration};
use url::Url;

fn required(matches: &clap::ArgMatches, name: &str) -> Result<String> {
    matches
        .get_one::<String>(name)
        .cloned()
        .with_context(|| format!("missing required argument: --{name}"))
}

fn seconds(matches: &clap::ArgMatches, name: &str) -> Result<u64> {
    matches
        .get_one::<u64>(name)
        .copied()
        .with_context(|| format!("missing required argument: --{name}"))
}

/// # Errors
/// Returns an error if required arguments are missing or invalid.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>(ARG_PORT).copied().unwrap_or(8080);
    let redis_url = SecretString::from(required(matches, ARG_REDIS_URL)?);
    let private_key = PathBuf::from(required(matches, ARG_PRIVATE_KEY)?);
    let public_key = PathBuf::from(required(matches, ARG_PUBLIC_KEY)?);

    let session_ttl = Duration::from_secs(seconds(matches, ARG_SESSION_TTL)?);
    let otp_ttl = Duration::from_secs(seconds(matches, ARG_OTP_TTL)?);
    let store_timeout = Duration::from_millis(seconds(matches, ARG_STORE_TIMEOUT)?);
    let key_reload = match seconds(matches, ARG_KEY_RELOAD)? {
        0 => None,
        every => Some(Duration::from_secs(every)),
    };

    let status_url = matches
        .get_one::<String>(ARG_STATUS_URL)
        .map(|url| Url::parse(url))
        .transpose()
        .context("invalid CUSTODIA_STATUS_URL")?;

    Ok(Action::Server(Args {
        port,
        redis_url,
        private_key,
        public_key,
        session_ttl,
        otp_ttl,
        store_timeout,
        key_reload,
        status_url,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::commands;
    use anyhow::bail;
    use secrecy::ExposeSecret;

    fn matches(extra: &[&str]) -> clap::ArgMatches {
        let mut args = vec![
            "custodia",
            "--redis-url",
            "redis://:secret@127.0.0.1:6379/0",
            "--private-key",
            "/etc/custodia/private.pem",
            "--public-key",
            "/etc/custodia/public.pem",
            "--session-ttl-seconds",
            "3600",
            "--otp-ttl-seconds",
            "600",
            "--store-timeout-ms",
            "250",
        ];
        args.extend_from_slice(extra);
        commands::new().get_matches_from(args)
    }

    #[test]
    fn builds_server_args() -> Result<()> {
        let action = handler(&matches(&[
            "--key-reload-seconds",
            "10",
            "--status-url",
            "https://users.tld/v1",
        ]))?;
        let Action::Server(args) = action;

        assert_eq!(args.redis_url.expose_secret(), "redis://:secret@127.0.0.1:6379/0");
        assert_eq!(args.private_key, PathBuf::from("/etc/custodia/private.pem"));
        assert_eq!(args.session_ttl, Duration::from_secs(3600));
        assert_eq!(args.otp_ttl, Duration::from_secs(600));
        assert_eq!(args.store_timeout, Duration::from_millis(250));
        assert_eq!(args.key_reload, Some(Duration::from_secs(10)));
        let Some(status_url) = args.status_url else {
            bail!("status url not parsed");
        };
        assert_eq!(status_url.host_str(), Some("users.tld"));
        Ok(())
    }

    #[test]
    fn zero_reload_interval_disables_watcher() -> Result<()> {
        let Action::Server(args) = handler(&matches(&["--key-reload-seconds", "0"]))?;
        assert_eq!(args.key_reload, None);
        Ok(())
    }

    #[test]
    fn invalid_status_url_is_an_error() {
        temp_env::with_vars([("CUSTODIA_STATUS_URL", None::<&str>)], || {
            assert!(handler(&matches(&["--status-url", "not a url"])).is_err());
        });
    }
}
