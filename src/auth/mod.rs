//! Server-side authentication: the login/refresh/two-factor state machine and
//! the capabilities it sequences (user storage, password hashing, TOTP).

pub mod config;
pub mod lockout;
pub mod memory;
pub mod outcome;
pub mod password;
pub mod postgres;
pub mod recovery;
pub mod seed;
pub mod service;
pub mod store;
pub mod totp;
pub mod validation;

pub use config::AuthConfig;
pub use lockout::LockoutState;
pub use memory::MemoryUserStore;
pub use outcome::{AccountError, AuthError, AuthOutcome, Principal, TwoFactorStatus};
pub use password::{Argon2Hasher, PasswordHasher};
pub use postgres::PgUserStore;
pub use seed::{known_roles, seed_root_user, SeedOutcome};
pub use service::AuthenticationService;
pub use store::{StoreError, User, UserStore};
pub use totp::{TotpProvider, TotpRsProvider, TotpSetup};
pub use validation::FieldErrors;
