//! Periodic maintenance.
//!
//! Each tick expires stale grants, prunes signing keys whose overlap window
//! has ended, drops device poll bookkeeping and, when configured, rotates
//! the signing key.

use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tollgate_auth::config::to_time_duration;
use tollgate_auth::{DeviceFlowEngine, GrantStore, KeyStore};
use tracing::{debug, info, warn};

/// What one maintenance pass did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HousekeepingReport {
    /// Tokens and authorizations moved to `revoked` because they expired.
    pub expired_records: u64,

    /// Retired signing keys dropped from the JWKS.
    pub pruned_keys: usize,

    /// Device codes whose last-poll timestamp was discarded.
    pub forgotten_polls: usize,

    /// Whether a new signing key was activated.
    pub rotated: bool,
}

/// Runs [`HousekeepingReport`]-producing passes on a fixed interval.
///
/// Passes are idempotent; skipping one only delays cleanup.
pub struct Housekeeper {
    grants: Arc<dyn GrantStore>,
    keys: Arc<KeyStore>,
    devices: Arc<DeviceFlowEngine>,
    interval: Duration,
    rotation_interval: Option<time::Duration>,
    last_rotation: parking_lot::Mutex<OffsetDateTime>,
}

impl Housekeeper {
    /// Creates a housekeeper that ticks every `interval` and never rotates.
    #[must_use]
    pub fn new(
        grants: Arc<dyn GrantStore>,
        keys: Arc<KeyStore>,
        devices: Arc<DeviceFlowEngine>,
        interval: Duration,
    ) -> Self {
        Self {
            grants,
            keys,
            devices,
            interval,
            rotation_interval: None,
            last_rotation: parking_lot::Mutex::new(OffsetDateTime::now_utc()),
        }
    }

    /// Rotates the signing key every `interval`.
    #[must_use]
    pub fn with_rotation_interval(mut self, interval: Option<Duration>) -> Self {
        self.rotation_interval = interval.map(to_time_duration);
        self
    }

    fn rotation_due(&self, now: OffsetDateTime) -> bool {
        let Some(every) = self.rotation_interval else {
            return false;
        };
        now - *self.last_rotation.lock() >= every
    }

    /// Runs one maintenance pass.
    ///
    /// A failing step is logged and does not stop the others.
    pub async fn run_once(&self, now: OffsetDateTime) -> HousekeepingReport {
        let mut report = HousekeepingReport::default();

        match self.grants.expire_stale(now).await {
            Ok(count) => report.expired_records = count,
            Err(e) => warn!(error = %e, "Failed to expire stale grants"),
        }

        report.pruned_keys = self.keys.prune(now);
        report.forgotten_polls = self.devices.forget_stale_polls(now);

        if self.rotation_due(now) {
            let keys = self.keys.clone();
            // Key generation is CPU bound.
            match tokio::task::spawn_blocking(move || keys.rotate()).await {
                Ok(Ok(kid)) => {
                    *self.last_rotation.lock() = now;
                    report.rotated = true;
                    info!(kid = %kid, "Scheduled signing key rotation completed");
                }
                Ok(Err(e)) => warn!(error = %e, "Scheduled signing key rotation failed"),
                Err(e) => warn!(error = %e, "Signing key rotation task panicked"),
            }
        }

        debug!(
            expired = report.expired_records,
            pruned_keys = report.pruned_keys,
            forgotten_polls = report.forgotten_polls,
            rotated = report.rotated,
            "Housekeeping pass finished"
        );
        report
    }

    /// Runs maintenance on a fixed interval until the handle is aborted.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                self.run_once(OffsetDateTime::now_utc()).await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tollgate_auth::oauth::DeviceFlowSettings;
    use tollgate_auth::storage::memory::{MemoryClientStorage, MemoryGrantStore};
    use tollgate_auth::token::{KeyStoreConfig, SigningKey};
    use tollgate_auth::types::{Authorization, AuthorizationStatus, AuthorizationType};
    use tollgate_auth::{ClientStorage, GrantStore};

    fn key_store() -> Arc<KeyStore> {
        let config = KeyStoreConfig {
            key_size_bits: 2048,
            rotation_overlap: time::Duration::ZERO,
            keys_to_keep: 3,
        };
        let key = SigningKey::generate(2048).unwrap();
        Arc::new(KeyStore::with_key(config, key))
    }

    fn housekeeper(grants: Arc<MemoryGrantStore>, keys: Arc<KeyStore>) -> Housekeeper {
        let clients: Arc<dyn ClientStorage> = Arc::new(MemoryClientStorage::new());
        let devices = Arc::new(DeviceFlowEngine::new(
            clients,
            grants.clone(),
            DeviceFlowSettings::default(),
        ));
        Housekeeper::new(grants, keys, devices, Duration::from_secs(60))
    }

    #[tokio::test]
    async fn test_run_once_expires_stale_authorizations() {
        let grants = Arc::new(MemoryGrantStore::new());
        let now = OffsetDateTime::now_utc();
        let mut authorization = Authorization::new(
            "user-1",
            "acme",
            AuthorizationType::Code,
            AuthorizationStatus::Valid,
            "openid",
            time::Duration::minutes(5),
        );
        authorization.creation_date = now - time::Duration::hours(2);
        authorization.expiration_date = now - time::Duration::hours(1);
        grants.create_authorization(&authorization).await.unwrap();

        let report = housekeeper(grants.clone(), key_store()).run_once(now).await;
        assert_eq!(report.expired_records, 1);
        assert!(!report.rotated);

        let stored = grants.find_authorization(authorization.id).await.unwrap().unwrap();
        assert_eq!(stored.status, AuthorizationStatus::Revoked);
    }

    #[tokio::test]
    async fn test_idle_pass_reports_nothing() {
        let grants = Arc::new(MemoryGrantStore::new());
        let report = housekeeper(grants, key_store())
            .run_once(OffsetDateTime::now_utc())
            .await;
        assert_eq!(report, HousekeepingReport::default());
    }

    #[tokio::test]
    async fn test_rotation_when_due() {
        let grants = Arc::new(MemoryGrantStore::new());
        let keys = key_store();
        let before = keys.current_signing_key().unwrap().kid.clone();

        let keeper = housekeeper(grants, keys.clone())
            .with_rotation_interval(Some(Duration::from_secs(3600)));

        let report = keeper.run_once(OffsetDateTime::now_utc()).await;
        assert!(!report.rotated);

        let later = OffsetDateTime::now_utc() + time::Duration::hours(2);
        let report = keeper.run_once(later).await;
        assert!(report.rotated);
        assert_ne!(keys.current_signing_key().unwrap().kid, before);
    }
}
