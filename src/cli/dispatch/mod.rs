use crate::{
    cli::actions::{server::Args, Action},
    token::RotationPolicy,
};
use anyhow::{anyhow, Context, Result};
use secrecy::SecretString;

fn required<T: Clone + Send + Sync + 'static>(matches: &clap::ArgMatches, id: &str) -> Result<T> {
    matches
        .get_one::<T>(id)
        .cloned()
        .with_context(|| format!("missing required argument: --{id}"))
}

/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let rotation = required::<String>(matches, "refresh-token-rotation")?
        .parse::<RotationPolicy>()
        .map_err(|e| anyhow!(e))?;

    Ok(Action::Server(Args {
        port: matches.get_one::<u16>("port").copied().unwrap_or(8080),
        dsn: matches.get_one::<String>("dsn").cloned(),
        jwt_secret: SecretString::from(required::<String>(matches, "jwt-secret")?),
        jwt_issuer: required(matches, "jwt-issuer")?,
        jwt_audience: required(matches, "jwt-audience")?,
        access_token_ttl_seconds: required(matches, "access-token-ttl-seconds")?,
        refresh_token_ttl_seconds: required(matches, "refresh-token-ttl-seconds")?,
        refresh_token_length: required(matches, "refresh-token-length")?,
        rotation,
        lockout_threshold: required(matches, "lockout-threshold")?,
        lockout_duration_seconds: required(matches, "lockout-duration-seconds")?,
        totp_issuer: required(matches, "totp-issuer")?,
        frontend_base_url: matches.get_one::<String>("frontend-base-url").cloned(),
        reveal_unknown_users: matches.get_flag("reveal-unknown-users"),
        default_role: required(matches, "default-role")?,
        root_password: matches
            .get_one::<String>("root-password")
            .cloned()
            .map(SecretString::from),
    }))
}
