use crate::{
    api,
    auth::{
        known_roles, seed_root_user, Argon2Hasher, AuthConfig, AuthenticationService,
        MemoryUserStore, PasswordHasher, PgUserStore, TotpRsProvider, UserStore,
    },
    token::{RotationPolicy, TokenConfig, TokenIssuer},
};
use anyhow::{Context, Result};
use chrono::Duration;
use secrecy::SecretString;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing::{info, warn};
use url::Url;

const MAX_DB_CONNECTIONS: u32 = 10;

pub struct Args {
    pub port: u16,
    pub dsn: Option<String>,
    pub jwt_secret: SecretString,
    pub jwt_issuer: String,
    pub jwt_audience: String,
    pub access_token_ttl_seconds: i64,
    pub refresh_token_ttl_seconds: i64,
    pub refresh_token_length: usize,
    pub rotation: RotationPolicy,
    pub lockout_threshold: u32,
    pub lockout_duration_seconds: i64,
    pub totp_issuer: String,
    pub frontend_base_url: Option<String>,
    pub reveal_unknown_users: bool,
    pub default_role: String,
    pub root_password: Option<SecretString>,
}

impl std::fmt::Debug for Args {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Args")
            .field("port", &self.port)
            .field("dsn", &self.dsn.as_deref().map(redact_dsn))
            .field("jwt_secret", &"***")
            .field("jwt_issuer", &self.jwt_issuer)
            .field("jwt_audience", &self.jwt_audience)
            .field("rotation", &self.rotation)
            .field("root_password", &self.root_password.as_ref().map(|_| "***"))
            .finish_non_exhaustive()
    }
}

impl Args {
    fn token_config(&self) -> TokenConfig {
        TokenConfig::new(
            self.jwt_secret.clone(),
            self.jwt_issuer.clone(),
            self.jwt_audience.clone(),
        )
        .with_access_token_ttl(Duration::seconds(self.access_token_ttl_seconds))
        .with_refresh_token_ttl(Duration::seconds(self.refresh_token_ttl_seconds))
        .with_refresh_token_length(self.refresh_token_length)
        .with_rotation(self.rotation)
    }

    fn auth_config(&self) -> AuthConfig {
        AuthConfig::new()
            .with_lockout_threshold(self.lockout_threshold)
            .with_lockout_duration(Duration::seconds(self.lockout_duration_seconds))
            .with_default_role(self.default_role.clone())
            .with_reveal_unknown_users(self.reveal_unknown_users)
    }
}

/// Execute the server action.
/// # Errors
/// Returns an error if the database is unreachable, the schema cannot be
/// applied, or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    log_startup_args(&args);

    let hasher: Arc<dyn PasswordHasher> = Arc::new(Argon2Hasher::default());
    let store = user_store(args.dsn.as_deref(), hasher).await?;
    seed_root_user(
        store.as_ref(),
        args.root_password.as_ref(),
        &known_roles(&args.default_role),
    )
    .await
    .context("Failed to seed root user")?;

    let service = AuthenticationService::new(
        store,
        TokenIssuer::new(args.token_config()),
        Arc::new(TotpRsProvider::new(args.totp_issuer.clone())),
        args.auth_config(),
    );

    api::new(
        args.port,
        Arc::new(service),
        args.frontend_base_url.as_deref(),
    )
    .await
}

async fn user_store(
    dsn: Option<&str>,
    hasher: Arc<dyn PasswordHasher>,
) -> Result<Arc<dyn UserStore>> {
    let Some(dsn) = dsn else {
        warn!("No DSN configured, users are kept in memory and lost on restart");
        return Ok(Arc::new(MemoryUserStore::new(hasher)));
    };

    let pool = PgPoolOptions::new()
        .max_connections(MAX_DB_CONNECTIONS)
        .connect(dsn)
        .await
        .with_context(|| format!("Failed to connect to database: {}", redact_dsn(dsn)))?;

    let store = PgUserStore::new(pool, hasher);
    store
        .migrate()
        .await
        .context("Failed to apply database schema")?;

    Ok(Arc::new(store))
}

fn log_startup_args(args: &Args) {
    let entries = [
        ("listen", format!("tcp:{}", args.port)),
        (
            "store",
            args.dsn
                .as_deref()
                .map_or_else(|| "memory".to_string(), redact_dsn),
        ),
        ("jwt_issuer", args.jwt_issuer.clone()),
        ("jwt_audience", args.jwt_audience.clone()),
        (
            "access_token_ttl",
            format!("{}s", args.access_token_ttl_seconds),
        ),
        (
            "refresh_token_ttl",
            format!("{}s", args.refresh_token_ttl_seconds),
        ),
        ("refresh_token_rotation", args.rotation.to_string()),
        ("lockout_threshold", args.lockout_threshold.to_string()),
        (
            "lockout_duration",
            format!("{}s", args.lockout_duration_seconds),
        ),
        ("totp_issuer", args.totp_issuer.clone()),
        (
            "frontend_base_url",
            args.frontend_base_url
                .clone()
                .unwrap_or_else(|| "none".to_string()),
        ),
        ("reveal_unknown_users", args.reveal_unknown_users.to_string()),
        ("default_role", args.default_role.clone()),
        ("root_user", args.root_password.is_some().to_string()),
    ];
    log_entries("Startup configuration", &entries);
}

fn log_entries(title: &str, entries: &[(&str, String)]) {
    let max_key_len = entries.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
    let mut message = format!(
        "warden {} - {}\n\n{title}:",
        env!("CARGO_PKG_VERSION"),
        short_commit(api::GIT_COMMIT_HASH)
    );
    for (key, value) in entries {
        let padding = " ".repeat(max_key_len.saturating_sub(key.len()));
        let _ =
            std::fmt::Write::write_fmt(&mut message, format_args!("\n  {key}:{padding} {value}"));
    }
    info!("{message}");
}

fn redact_dsn(dsn: &str) -> String {
    match Url::parse(dsn) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("REDACTED"));
            }
            parsed.to_string()
        }
        Err(_) => "invalid-dsn".to_string(),
    }
}

fn short_commit(hash: &str) -> &str {
    let trimmed = hash.trim();
    trimmed.get(..7).unwrap_or(trimmed)
}
