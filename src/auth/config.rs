use chrono::Duration;

pub const DEFAULT_LOCKOUT_THRESHOLD: u32 = 5;
pub const DEFAULT_LOCKOUT_DURATION_SECONDS: i64 = 300;
pub const DEFAULT_ROLE: &str = "User";

/// Account policy knobs for the authentication service.
#[derive(Clone, Debug)]
pub struct AuthConfig {
    lockout_threshold: u32,
    lockout_duration: Duration,
    default_role: String,
    reveal_unknown_users: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            lockout_threshold: DEFAULT_LOCKOUT_THRESHOLD,
            lockout_duration: Duration::seconds(DEFAULT_LOCKOUT_DURATION_SECONDS),
            default_role: DEFAULT_ROLE.to_string(),
            reveal_unknown_users: false,
        }
    }

    /// Failed attempts that open a lockout window. Zero disables lockout.
    #[must_use]
    pub fn with_lockout_threshold(mut self, threshold: u32) -> Self {
        self.lockout_threshold = threshold;
        self
    }

    #[must_use]
    pub fn with_lockout_duration(mut self, duration: Duration) -> Self {
        self.lockout_duration = duration;
        self
    }

    #[must_use]
    pub fn with_default_role(mut self, role: impl Into<String>) -> Self {
        self.default_role = role.into();
        self
    }

    /// Answer unknown usernames with 404 instead of the generic 401.
    #[must_use]
    pub fn with_reveal_unknown_users(mut self, reveal: bool) -> Self {
        self.reveal_unknown_users = reveal;
        self
    }

    #[must_use]
    pub fn lockout_threshold(&self) -> u32 {
        self.lockout_threshold
    }

    #[must_use]
    pub fn lockout_duration(&self) -> Duration {
        self.lockout_duration
    }

    #[must_use]
    pub fn default_role(&self) -> &str {
        &self.default_role
    }

    #[must_use]
    pub fn reveal_unknown_users(&self) -> bool {
        self.reveal_unknown_users
    }
}
