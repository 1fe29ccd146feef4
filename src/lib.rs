//! # Warden
//!
//! Username/password authentication issuing short-lived signed access tokens
//! and long-lived opaque refresh tokens.
//!
//! ## Server
//!
//! [`auth::AuthenticationService`] runs the login state machine: lockout is
//! checked before the password, failed attempts are counted in storage, and
//! accounts with TOTP enabled need a second factor (or a single-use recovery
//! code). Refresh tokens rotate on every use and are stored only as SHA-256
//! digests. [`api`] exposes the service over HTTP under `/auth`.
//!
//! ## Client
//!
//! [`client::SessionCache`] owns the token pair on the client, coalesces
//! concurrent refreshes into a single call and lets an explicit logout win
//! over a refresh still in flight. [`client::AuthGate`] attaches the bearer
//! token to outbound requests and ends the session on `401`.

pub mod api;
pub mod auth;
pub mod cli;
pub mod client;
pub mod token;
