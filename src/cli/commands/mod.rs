pub mod logging;

use clap::{
    builder::styling::{AnsiColor, Effects, Styles},
    Arg, ColorChoice, Command,
};

pub const ARG_PORT: &str = "port";
pub const ARG_REDIS_URL: &str = "redis-url";
pub const ARG_PRIVATE_KEY: &str = "private-key";
pub const ARG_PUBLIC_KEY: &str = "public-key";
pub const ARG_SESSION_TTL: &str = "session-ttl-seconds";
pub const ARG_OTP_TTL: &str = "otp-ttl-seconds";
pub const ARG_STORE_TIMEOUT: &str = "store-timeout-ms";
pub const ARG_KEY_RELOAD: &str = "key-reload-seconds";
pub const ARG_STATUS_URL: &str = "status-url";

#[must_use]
pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    let long_version: &'static str = Box::leak(
        format!("{} - {}", env!("CARGO_PKG_VERSION"), crate::GIT_COMMIT_HASH).into_boxed_str(),
    );

    let command = Command::new("custodia")
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .version(env!("CARGO_PKG_VERSION"))
        .long_version(long_version)
        .color(ColorChoice::Auto)
        .styles(styles)
        .arg(
            Arg::new(ARG_PORT)
                .short('p')
                .long("port")
                .help("Port to listen on")
                .default_value("8080")
                .env("CUSTODIA_PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new(ARG_REDIS_URL)
                .short('r')
                .long("redis-url")
                .help("Session store URL, example: redis://:password@redis.tld:6379/0")
                .env("CUSTODIA_REDIS_URL")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new(ARG_PRIVATE_KEY)
                .long("private-key")
                .help("Path to the P-256 private key (PKCS#8 or SEC1 PEM) used to sign tokens")
                .env("CUSTODIA_PRIVATE_KEY")
                .required(true),
        )
        .arg(
            Arg::new(ARG_PUBLIC_KEY)
                .long("public-key")
                .help("Path to the P-256 public key (SPKI PEM) used to verify tokens")
                .env("CUSTODIA_PUBLIC_KEY")
                .required(true),
        )
        .arg(
            Arg::new(ARG_SESSION_TTL)
                .long("session-ttl-seconds")
                .help("Token validity and session lifetime in seconds")
                .default_value("86400")
                .env("CUSTODIA_SESSION_TTL_SECONDS")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_OTP_TTL)
                .long("otp-ttl-seconds")
                .help("Lifetime of a pending one-time passcode in seconds")
                .default_value("900")
                .env("CUSTODIA_OTP_TTL_SECONDS")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_STORE_TIMEOUT)
                .long("store-timeout-ms")
                .help("Deadline for each session store and key file operation in milliseconds")
                .default_value("2000")
                .env("CUSTODIA_STORE_TIMEOUT_MS")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_KEY_RELOAD)
                .long("key-reload-seconds")
                .help("How often to check the key files for changes, 0 disables reloading")
                .default_value("30")
                .env("CUSTODIA_KEY_RELOAD_SECONDS")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_STATUS_URL)
                .long("status-url")
                .help("User directory base URL for account status checks, example: https://users.tld/v1")
                .long_help(
                    "User directory base URL. When set, status-gated routes call GET {status-url}/users/{id}/status; when unset every account is treated as confirmed.",
                )
                .env("CUSTODIA_STATUS_URL"),
        );

    logging::with_args(command)
}
