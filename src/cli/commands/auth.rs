use crate::token::issuer::MAX_TOKEN_TTL_SECONDS;
use clap::{Arg, ArgAction, Command};

#[must_use]
pub fn with_args(command: Command) -> Command {
    let command = with_lockout_args(command);
    command
        .arg(
            Arg::new("totp-issuer")
                .long("totp-issuer")
                .help("Issuer shown by authenticator apps")
                .env("WARDEN_TOTP_ISSUER")
                .default_value("Warden"),
        )
        .arg(
            Arg::new("frontend-base-url")
                .long("frontend-base-url")
                .help("Frontend base URL allowed by CORS")
                .env("WARDEN_FRONTEND_BASE_URL"),
        )
        .arg(
            Arg::new("reveal-unknown-users")
                .long("reveal-unknown-users")
                .help("Answer logins for unknown usernames with 404 instead of 401")
                .env("WARDEN_REVEAL_UNKNOWN_USERS")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("default-role")
                .long("default-role")
                .help("Role assigned to newly registered users")
                .env("WARDEN_DEFAULT_ROLE")
                .default_value("User"),
        )
        .arg(
            Arg::new("root-password")
                .long("root-password")
                .help("Password of the seeded root user holding every role (skipped when unset)")
                .env("WARDEN_ROOT_PASSWORD")
                .hide_env_values(true),
        )
}

fn with_lockout_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("lockout-threshold")
                .long("lockout-threshold")
                .help("Failed attempts before the account is locked (0 disables lockout)")
                .env("WARDEN_LOCKOUT_THRESHOLD")
                .default_value("5")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new("lockout-duration-seconds")
                .long("lockout-duration-seconds")
                .help("Lockout window in seconds")
                .env("WARDEN_LOCKOUT_DURATION_SECONDS")
                .default_value("300")
                .value_parser(clap::value_parser!(i64).range(1..=MAX_TOKEN_TTL_SECONDS)),
        )
}
