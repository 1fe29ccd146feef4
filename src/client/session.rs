//! Client-side session cache.
//!
//! Owns the token pair: nothing else writes the backing storage. Reads go
//! through an in-process copy once storage has been consulted. Refreshes are
//! coalesced into one shared future, and every state change bumps an epoch so
//! a refresh that started before a logout cannot resurrect the session.

use super::{
    storage::{StorageError, TokenStorage},
    transport::RefreshTransport,
};
use crate::token::{ClaimSet, Clock, SystemClock, TokenCodec, TokenPair};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::{debug, instrument, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthStatus {
    Anonymous,
    Authenticated(ClaimSet),
}

impl AuthStatus {
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// The access token was still valid; nothing was sent.
    Fresh,
    Refreshed,
    LoggedOut,
    /// The session changed while the refresh was in flight; its result was dropped.
    Discarded,
    /// Storage could not be read; the session was left untouched.
    Unavailable,
}

type RefreshFlight = Shared<BoxFuture<'static, RefreshOutcome>>;

#[derive(Default)]
struct SessionRecord {
    pair: Option<TokenPair>,
    /// Storage has been read at least once.
    looked_up: bool,
    epoch: u64,
    next_flight: u64,
    in_flight: Option<(u64, RefreshFlight)>,
}

struct Inner {
    storage: Arc<dyn TokenStorage>,
    transport: Arc<dyn RefreshTransport>,
    codec: TokenCodec,
    clock: Arc<dyn Clock>,
    record: Mutex<SessionRecord>,
    status: watch::Sender<AuthStatus>,
}

impl Inner {
    fn now(&self) -> i64 {
        self.clock.now().timestamp()
    }

    fn status_for(&self, pair: Option<&TokenPair>) -> AuthStatus {
        let Some(pair) = pair else {
            return AuthStatus::Anonymous;
        };
        if self.codec.is_expired(&pair.access_token, self.now()) {
            return AuthStatus::Anonymous;
        }
        self.codec
            .decode(&pair.access_token)
            .map_or(AuthStatus::Anonymous, AuthStatus::Authenticated)
    }

    async fn pair(&self, record: &mut SessionRecord) -> Result<Option<TokenPair>, StorageError> {
        if !record.looked_up {
            record.pair = self.storage.load().await?;
            record.looked_up = true;
        }
        Ok(record.pair.clone())
    }

    async fn apply_authenticated(
        &self,
        record: &mut SessionRecord,
        pair: TokenPair,
    ) -> Result<(), StorageError> {
        record.epoch += 1;
        let stored = self.storage.store(&pair).await;
        let status = self.status_for(Some(&pair));
        record.pair = Some(pair);
        record.looked_up = true;
        self.status.send_replace(status);
        stored
    }

    async fn apply_logged_out(&self, record: &mut SessionRecord) {
        record.epoch += 1;
        record.pair = None;
        record.looked_up = true;
        record.in_flight = None;
        if let Err(err) = self.storage.clear().await {
            warn!("Failed to clear token storage: {err}");
        }
        self.status.send_replace(AuthStatus::Anonymous);
    }

    async fn run_refresh(
        self: Arc<Self>,
        flight: u64,
        epoch: u64,
        refresh_token: String,
    ) -> RefreshOutcome {
        let result = self.transport.refresh(&refresh_token).await;

        let mut record = self.record.lock().await;
        if matches!(&record.in_flight, Some((current, _)) if *current == flight) {
            record.in_flight = None;
        }
        if record.epoch != epoch {
            debug!("Session changed during refresh, discarding result");
            return RefreshOutcome::Discarded;
        }

        match result {
            Ok(pair) => {
                if let Err(err) = self.apply_authenticated(&mut record, pair).await {
                    warn!("Refreshed tokens could not be persisted: {err}");
                }
                RefreshOutcome::Refreshed
            }
            Err(err) => {
                debug!("Refresh failed: {err}");
                self.apply_logged_out(&mut record).await;
                RefreshOutcome::LoggedOut
            }
        }
    }
}

enum RefreshStep {
    Done(RefreshOutcome),
    LogOut,
    Await(RefreshFlight),
}

/// Cheap to clone; clones share one session.
#[derive(Clone)]
pub struct SessionCache {
    inner: Arc<Inner>,
}

impl SessionCache {
    #[must_use]
    pub fn new(storage: Arc<dyn TokenStorage>, transport: Arc<dyn RefreshTransport>) -> Self {
        Self::with_clock(storage, transport, Arc::new(SystemClock))
    }

    #[must_use]
    pub fn with_clock(
        storage: Arc<dyn TokenStorage>,
        transport: Arc<dyn RefreshTransport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (status, _) = watch::channel(AuthStatus::Anonymous);
        Self {
            inner: Arc::new(Inner {
                storage,
                transport,
                codec: TokenCodec::unverified(),
                clock,
                record: Mutex::new(SessionRecord::default()),
                status,
            }),
        }
    }

    /// Claims of the current, unexpired access token. Storage that is not
    /// available yet reads as anonymous and is consulted again next time.
    pub async fn get_claims(&self) -> AuthStatus {
        let mut record = self.inner.record.lock().await;
        match self.inner.pair(&mut record).await {
            Ok(pair) => self.inner.status_for(pair.as_ref()),
            Err(err) => {
                debug!("Token storage not readable: {err}");
                AuthStatus::Anonymous
            }
        }
    }

    /// The stored access token, expired or not. Never triggers a refresh.
    pub async fn current_access_token(&self) -> Option<String> {
        let mut record = self.inner.record.lock().await;
        self.inner
            .pair(&mut record)
            .await
            .ok()
            .flatten()
            .map(|pair| pair.access_token)
    }

    /// Fail-closed expiry check against this cache's clock.
    #[must_use]
    pub fn is_expired(&self, access_token: &str) -> bool {
        self.inner.codec.is_expired(access_token, self.inner.now())
    }

    /// Persist a new pair and notify subscribers.
    ///
    /// # Errors
    /// Returns the storage error if the pair could not be persisted; the
    /// session is still authenticated for this process.
    pub async fn mark_authenticated(&self, pair: TokenPair) -> Result<(), StorageError> {
        let mut record = self.inner.record.lock().await;
        self.inner.apply_authenticated(&mut record, pair).await
    }

    /// Forget the pair and notify subscribers. A refresh still in flight
    /// completes but its result is discarded.
    pub async fn mark_logged_out(&self) {
        let mut record = self.inner.record.lock().await;
        self.inner.apply_logged_out(&mut record).await;
    }

    /// Refresh when the access token is missing or expired.
    ///
    /// Concurrent callers share one in-flight refresh call.
    #[instrument(skip_all)]
    pub async fn refresh_if_needed(&self) -> RefreshOutcome {
        let step = {
            let mut record = self.inner.record.lock().await;
            let joined = record.in_flight.as_ref().map(|(_, flight)| flight.clone());
            if let Some(flight) = joined {
                RefreshStep::Await(flight)
            } else {
                let stored = self.inner.pair(&mut record).await;
                match stored {
                    Err(err) => {
                        debug!("Token storage not readable: {err}");
                        RefreshStep::Done(RefreshOutcome::Unavailable)
                    }
                    Ok(Some(pair)) if !self.is_expired(&pair.access_token) => {
                        RefreshStep::Done(RefreshOutcome::Fresh)
                    }
                    Ok(Some(pair)) if !pair.refresh_token.is_empty() => {
                        let flight_id = record.next_flight;
                        record.next_flight += 1;
                        let flight = self
                            .inner
                            .clone()
                            .run_refresh(flight_id, record.epoch, pair.refresh_token)
                            .boxed()
                            .shared();
                        record.in_flight = Some((flight_id, flight.clone()));
                        RefreshStep::Await(flight)
                    }
                    Ok(_) => RefreshStep::LogOut,
                }
            }
        };

        match step {
            RefreshStep::Done(outcome) => outcome,
            RefreshStep::Await(flight) => flight.await,
            RefreshStep::LogOut => {
                self.mark_logged_out().await;
                RefreshOutcome::LoggedOut
            }
        }
    }

    /// Authentication state changes, starting with the current value.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<AuthStatus> {
        self.inner.status.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        client::{storage::MemoryTokenStorage, transport::TransportError},
        token::ManualClock,
    };
    use anyhow::Result;
    use async_trait::async_trait;
    use chrono::Utc;
    use secrecy::SecretString;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    fn signer() -> TokenCodec {
        TokenCodec::new(
            &SecretString::from("0123456789abcdef0123456789abcdef".to_string()),
            "https://auth.warden.test",
            "warden",
        )
    }

    fn access_token(name: &str, exp: i64) -> Result<String> {
        Ok(signer().encode(&ClaimSet {
            subject: "42".to_string(),
            display_name: name.to_string(),
            token_id: "jti".to_string(),
            roles: vec!["User".to_string()],
            issuer: Some("https://auth.warden.test".to_string()),
            audience: Some("warden".to_string()),
            issued_at: None,
            expires_at: Some(exp),
            security_stamp: None,
        })?)
    }

    /// Returns a fixed pair after `release` is notified (or immediately).
    struct MockTransport {
        calls: AtomicUsize,
        release: Option<Notify>,
        response: Option<TokenPair>,
    }

    impl MockTransport {
        fn returning(pair: TokenPair) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                release: Some(Notify::new()),
                response: Some(pair),
            }
        }

        fn failing() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                release: None,
                response: None,
            }
        }
    }

    #[async_trait]
    impl RefreshTransport for MockTransport {
        async fn refresh(&self, _refresh_token: &str) -> Result<TokenPair, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(release) = &self.release {
                release.notified().await;
            }
            self.response.clone().ok_or(TransportError::Malformed)
        }
    }

    struct Fixture {
        cache: SessionCache,
        storage: Arc<MemoryTokenStorage>,
        transport: Arc<MockTransport>,
        now: i64,
    }

    async fn fixture(transport: MockTransport, access_exp_offset: i64) -> Result<Fixture> {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let now = clock.now().timestamp();
        let storage = Arc::new(MemoryTokenStorage::new());
        storage
            .store(&TokenPair {
                access_token: access_token("alice", now + access_exp_offset)?,
                refresh_token: "refresh-1".to_string(),
            })
            .await?;
        let transport = Arc::new(transport);
        let cache = SessionCache::with_clock(storage.clone(), transport.clone(), clock);
        Ok(Fixture {
            cache,
            storage,
            transport,
            now,
        })
    }

    #[tokio::test]
    async fn valid_token_yields_claims_without_refresh() -> Result<()> {
        let f = fixture(MockTransport::failing(), 300).await?;
        let AuthStatus::Authenticated(claims) = f.cache.get_claims().await else {
            anyhow::bail!("expected claims");
        };
        assert_eq!(claims.display_name, "alice");
        assert_eq!(f.cache.refresh_if_needed().await, RefreshOutcome::Fresh);
        assert_eq!(f.transport.calls.load(Ordering::SeqCst), 0);
        Ok(())
    }

    #[tokio::test]
    async fn expired_token_reads_as_anonymous() -> Result<()> {
        let f = fixture(MockTransport::failing(), -1).await?;
        assert_eq!(f.cache.get_claims().await, AuthStatus::Anonymous);
        Ok(())
    }

    #[tokio::test]
    async fn concurrent_refreshes_share_one_call() -> Result<()> {
        let fresh = TokenPair {
            access_token: access_token("alice", Utc::now().timestamp() + 600)?,
            refresh_token: "refresh-2".to_string(),
        };
        let f = fixture(MockTransport::returning(fresh.clone()), -60).await?;

        let both = tokio::spawn({
            let cache = f.cache.clone();
            async move { tokio::join!(cache.refresh_if_needed(), cache.refresh_if_needed()) }
        });
        while f.transport.calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        if let Some(release) = &f.transport.release {
            release.notify_one();
        }

        let (first, second) = both.await?;
        assert_eq!(first, RefreshOutcome::Refreshed);
        assert_eq!(second, RefreshOutcome::Refreshed);
        assert_eq!(f.transport.calls.load(Ordering::SeqCst), 1);
        assert_eq!(f.storage.load().await?, Some(fresh));
        assert!(f.cache.get_claims().await.is_authenticated());
        Ok(())
    }

    #[tokio::test]
    async fn logout_wins_over_in_flight_refresh() -> Result<()> {
        let fresh = TokenPair {
            access_token: access_token("alice", Utc::now().timestamp() + 600)?,
            refresh_token: "refresh-2".to_string(),
        };
        let f = fixture(MockTransport::returning(fresh), -60).await?;

        let pending = tokio::spawn({
            let cache = f.cache.clone();
            async move { cache.refresh_if_needed().await }
        });
        while f.transport.calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        f.cache.mark_logged_out().await;
        if let Some(release) = &f.transport.release {
            release.notify_one();
        }

        assert_eq!(pending.await?, RefreshOutcome::Discarded);
        assert_eq!(f.cache.get_claims().await, AuthStatus::Anonymous);
        assert_eq!(f.storage.load().await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn failed_refresh_logs_out() -> Result<()> {
        let f = fixture(MockTransport::failing(), -60).await?;
        let mut status = f.cache.subscribe();
        assert_eq!(f.cache.refresh_if_needed().await, RefreshOutcome::LoggedOut);
        assert_eq!(f.storage.load().await?, None);
        status.changed().await?;
        assert_eq!(*status.borrow(), AuthStatus::Anonymous);
        Ok(())
    }

    #[tokio::test]
    async fn missing_refresh_token_logs_out_without_call() -> Result<()> {
        let f = fixture(MockTransport::failing(), -60).await?;
        f.cache
            .mark_authenticated(TokenPair {
                access_token: access_token("alice", f.now - 1)?,
                refresh_token: String::new(),
            })
            .await?;
        assert_eq!(f.cache.refresh_if_needed().await, RefreshOutcome::LoggedOut);
        assert_eq!(f.transport.calls.load(Ordering::SeqCst), 0);
        Ok(())
    }

    #[tokio::test]
    async fn unavailable_storage_is_anonymous_and_retried() -> Result<()> {
        let storage = Arc::new(MemoryTokenStorage::unavailable());
        let cache = SessionCache::new(storage.clone(), Arc::new(MockTransport::failing()));
        assert_eq!(cache.get_claims().await, AuthStatus::Anonymous);
        assert_eq!(cache.refresh_if_needed().await, RefreshOutcome::Unavailable);

        storage.set_available(true);
        storage
            .store(&TokenPair {
                access_token: access_token("alice", Utc::now().timestamp() + 600)?,
                refresh_token: "r".to_string(),
            })
            .await?;
        assert!(cache.get_claims().await.is_authenticated());
        Ok(())
    }

    #[tokio::test]
    async fn mark_authenticated_notifies_subscribers() -> Result<()> {
        let f = fixture(MockTransport::failing(), -60).await?;
        let mut status = f.cache.subscribe();
        f.cache
            .mark_authenticated(TokenPair {
                access_token: access_token("bob", f.now + 600)?,
                refresh_token: "r".to_string(),
            })
            .await?;
        status.changed().await?;
        let AuthStatus::Authenticated(claims) = status.borrow().clone() else {
            anyhow::bail!("expected claims");
        };
        assert_eq!(claims.display_name, "bob");
        Ok(())
    }
}
