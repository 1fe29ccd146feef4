use crate::token::issuer::{MAX_TOKEN_TTL_SECONDS, MIN_REFRESH_TOKEN_LENGTH};
use clap::{
    builder::{TypedValueParser, ValueParser},
    Arg, Command,
};

pub const MIN_JWT_SECRET_BYTES: usize = 32;

/// HMAC keys shorter than the SHA-256 block output are rejected.
#[must_use]
pub fn validator_jwt_secret() -> ValueParser {
    ValueParser::from(move |secret: &str| -> std::result::Result<String, String> {
        if secret.len() < MIN_JWT_SECRET_BYTES {
            return Err(format!(
                "JWT secret must be at least {MIN_JWT_SECRET_BYTES} bytes"
            ));
        }
        Ok(secret.to_string())
    })
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("jwt-secret")
                .long("jwt-secret")
                .help("Symmetric key used to sign access tokens (HS256)")
                .env("WARDEN_JWT_SECRET")
                .hide_env_values(true)
                .required(true)
                .value_parser(validator_jwt_secret()),
        )
        .arg(
            Arg::new("jwt-issuer")
                .long("jwt-issuer")
                .help("Issuer claim of access tokens")
                .env("WARDEN_JWT_ISSUER")
                .default_value("warden"),
        )
        .arg(
            Arg::new("jwt-audience")
                .long("jwt-audience")
                .help("Audience claim of access tokens")
                .env("WARDEN_JWT_AUDIENCE")
                .default_value("warden"),
        )
        .arg(
            Arg::new("access-token-ttl-seconds")
                .long("access-token-ttl-seconds")
                .help("Access token lifetime in seconds")
                .env("WARDEN_ACCESS_TOKEN_TTL_SECONDS")
                .default_value("900")
                .value_parser(clap::value_parser!(i64).range(1..=MAX_TOKEN_TTL_SECONDS)),
        )
        .arg(
            Arg::new("refresh-token-ttl-seconds")
                .long("refresh-token-ttl-seconds")
                .help("Refresh token lifetime in seconds")
                .env("WARDEN_REFRESH_TOKEN_TTL_SECONDS")
                .default_value("604800")
                .value_parser(clap::value_parser!(i64).range(1..=MAX_TOKEN_TTL_SECONDS)),
        )
        .arg(
            Arg::new("refresh-token-length")
                .long("refresh-token-length")
                .help("Random bytes in a refresh token, before encoding")
                .env("WARDEN_REFRESH_TOKEN_LENGTH")
                .default_value("64")
                .value_parser(
                    clap::value_parser!(u16)
                        .range(i64::from(MIN_REFRESH_TOKEN_LENGTH)..)
                        .map(usize::from),
                ),
        )
        .arg(
            Arg::new("refresh-token-rotation")
                .long("refresh-token-rotation")
                .help("Issue a new refresh token on every refresh (rotate) or keep it (reuse)")
                .env("WARDEN_REFRESH_TOKEN_ROTATION")
                .default_value("rotate")
                .value_parser(["rotate", "reuse"]),
        )
}
