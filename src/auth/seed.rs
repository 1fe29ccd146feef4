//! Startup seeding of the `root` account.
//!
//! Roles are plain strings on the user record, so seeding them means making
//! sure `root` holds every known one. Runs on every start and only writes
//! what is missing.

use super::{
    store::{NewUser, StoreError, UserStore},
    validation::{check_password_policy, FieldErrors},
};
use secrecy::{ExposeSecret, SecretString};
use tracing::{error, info, warn};

pub const ROOT_USERNAME: &str = "root";
pub const ROLES: [&str; 3] = ["User", "Editor", "Admin"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeedOutcome {
    /// No root password configured.
    Skipped,
    /// The configured password does not satisfy the password policy.
    Rejected,
    Created,
    RolesGranted,
    Unchanged,
}

/// The built-in roles plus `default_role` when it is not one of them.
#[must_use]
pub fn known_roles(default_role: &str) -> Vec<String> {
    let mut roles: Vec<String> = ROLES.iter().map(ToString::to_string).collect();
    if !default_role.trim().is_empty() && !roles.iter().any(|role| role == default_role) {
        roles.push(default_role.to_string());
    }
    roles
}

/// Create `root` with every role in `roles` if absent, otherwise grant the
/// roles it is missing. An existing root keeps its password.
///
/// # Errors
/// Only storage failures.
pub async fn seed_root_user(
    store: &dyn UserStore,
    root_password: Option<&SecretString>,
    roles: &[String],
) -> Result<SeedOutcome, StoreError> {
    let Some(password) = root_password.filter(|p| !p.expose_secret().trim().is_empty()) else {
        warn!("No root password configured, skipping root user seeding");
        return Ok(SeedOutcome::Skipped);
    };

    let existing = match store.find_by_username(ROOT_USERNAME).await? {
        Some(user) => user,
        None => {
            let mut errors = FieldErrors::new();
            check_password_policy(&mut errors, "rootPassword", password.expose_secret());
            if let Err(errors) = errors.into_result() {
                error!(?errors, "Root password rejected, root user not created");
                return Ok(SeedOutcome::Rejected);
            }

            match store
                .create_user(NewUser {
                    username: ROOT_USERNAME.to_string(),
                    password: password.expose_secret().to_string(),
                    roles: roles.to_vec(),
                })
                .await
            {
                Ok(user) => {
                    info!(user_id = %user.id, "Root user '{ROOT_USERNAME}' created");
                    return Ok(SeedOutcome::Created);
                }
                // Another instance seeded it first.
                Err(StoreError::Conflict) => store
                    .find_by_username(ROOT_USERNAME)
                    .await?
                    .ok_or(StoreError::UserNotFound)?,
                Err(err) => return Err(err),
            }
        }
    };

    let missing: Vec<&String> = roles
        .iter()
        .filter(|role| !existing.roles.contains(role))
        .collect();
    if missing.is_empty() {
        return Ok(SeedOutcome::Unchanged);
    }

    info!(user_id = %existing.id, ?missing, "Granting missing roles to root user");
    let mut granted = existing.roles.clone();
    granted.extend(missing.into_iter().cloned());
    store.set_roles(existing.id, granted).await?;
    Ok(SeedOutcome::RolesGranted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{memory::MemoryUserStore, password::Argon2Hasher};
    use anyhow::{Context, Result};
    use std::sync::Arc;

    const ROOT_PASSWORD: &str = "R00t!password";

    fn store() -> MemoryUserStore {
        MemoryUserStore::new(Arc::new(Argon2Hasher::insecure_fast()))
    }

    fn secret(value: &str) -> SecretString {
        SecretString::from(value.to_string())
    }

    #[test]
    fn default_role_joins_known_roles() {
        assert_eq!(known_roles("User"), vec!["User", "Editor", "Admin"]);
        assert_eq!(
            known_roles("Viewer"),
            vec!["User", "Editor", "Admin", "Viewer"]
        );
    }

    #[tokio::test]
    async fn creates_root_once() -> Result<()> {
        let store = store();
        let roles = known_roles("User");
        let password = secret(ROOT_PASSWORD);

        let first = seed_root_user(&store, Some(&password), &roles).await?;
        assert_eq!(first, SeedOutcome::Created);
        let root = store
            .find_by_username(ROOT_USERNAME)
            .await?
            .context("root missing")?;
        assert_eq!(root.roles, roles);
        assert!(store.check_password(root.id, ROOT_PASSWORD).await?);

        let second = seed_root_user(&store, Some(&password), &roles).await?;
        assert_eq!(second, SeedOutcome::Unchanged);
        let again = store
            .find_by_username(ROOT_USERNAME)
            .await?
            .context("root missing")?;
        assert_eq!(again, root);
        Ok(())
    }

    #[tokio::test]
    async fn existing_root_gets_missing_roles_and_keeps_password() -> Result<()> {
        let store = store();
        let existing = store
            .create_user(NewUser {
                username: ROOT_USERNAME.to_string(),
                password: "Old!passw0rd".to_string(),
                roles: vec!["User".to_string(), "Auditor".to_string()],
            })
            .await?;

        let roles = known_roles("User");
        let outcome = seed_root_user(&store, Some(&secret(ROOT_PASSWORD)), &roles).await?;
        assert_eq!(outcome, SeedOutcome::RolesGranted);

        let root = store.find_by_id(existing.id).await?.context("root missing")?;
        assert_eq!(root.roles, vec!["User", "Auditor", "Editor", "Admin"]);
        assert!(store.check_password(root.id, "Old!passw0rd").await?);

        let outcome = seed_root_user(&store, Some(&secret(ROOT_PASSWORD)), &roles).await?;
        assert_eq!(outcome, SeedOutcome::Unchanged);
        Ok(())
    }

    #[tokio::test]
    async fn missing_or_blank_password_skips() -> Result<()> {
        let store = store();
        let roles = known_roles("User");
        assert_eq!(
            seed_root_user(&store, None, &roles).await?,
            SeedOutcome::Skipped
        );
        assert_eq!(
            seed_root_user(&store, Some(&secret("   ")), &roles).await?,
            SeedOutcome::Skipped
        );
        assert!(store.find_by_username(ROOT_USERNAME).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn weak_password_is_rejected() -> Result<()> {
        let store = store();
        let outcome =
            seed_root_user(&store, Some(&secret("root")), &known_roles("User")).await?;
        assert_eq!(outcome, SeedOutcome::Rejected);
        assert!(store.find_by_username(ROOT_USERNAME).await?.is_none());
        Ok(())
    }
}
