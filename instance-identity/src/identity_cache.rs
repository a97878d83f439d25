// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Time-boxed cache of the encoded instance identity.
//!
//! # States
//!
//! ```text
//! Empty --(first call)--> refresh --> Fresh
//! Fresh --(now + margin passes expiration)--> Stale
//! Stale --(next call)--> refresh --> Fresh
//! ```
//!
//! Refreshing is synchronous and happens under the same lock as the expiry
//! check, so concurrent callers crossing the boundary together produce a
//! single refresh. A refresh only re-encodes an already known description, no
//! I/O happens while the lock is held.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::Mutex;

use crate::constants::MAX_IDENTITY_TTL;
use crate::encoding;
use crate::errors::IdentityError;
use crate::models::{InstanceDescription, InstanceIdentity};

/// Lifetime of an encoded identity and how long before its expiration it is
/// considered too old to hand out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpiryPolicy {
    ttl: TimeDelta,
    safety_margin: TimeDelta,
}

impl ExpiryPolicy {
    /// # Errors
    ///
    /// Returns [`IdentityError::InvalidExpiryPolicy`] unless
    /// `safety_margin < ttl <= MAX_IDENTITY_TTL`. A margin as long as the ttl
    /// would make every call refresh.
    pub fn new(ttl: Duration, safety_margin: Duration) -> Result<Self, IdentityError> {
        let invalid = || IdentityError::InvalidExpiryPolicy { ttl, safety_margin };

        if safety_margin >= ttl || ttl > MAX_IDENTITY_TTL {
            return Err(invalid());
        }

        Ok(Self {
            ttl: TimeDelta::from_std(ttl).map_err(|_| invalid())?,
            safety_margin: TimeDelta::from_std(safety_margin).map_err(|_| invalid())?,
        })
    }

    pub fn ttl(&self) -> Duration {
        self.ttl.to_std().unwrap_or_default()
    }

    pub fn safety_margin(&self) -> Duration {
        self.safety_margin.to_std().unwrap_or_default()
    }

    fn invalid(&self) -> IdentityError {
        IdentityError::InvalidExpiryPolicy {
            ttl: self.ttl(),
            safety_margin: self.safety_margin(),
        }
    }

    /// Expiration of an identity issued at `now`.
    fn expiration_at(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>, IdentityError> {
        now.checked_add_signed(self.ttl).ok_or_else(|| self.invalid())
    }

    fn needs_refresh(
        &self,
        cached: Option<&CachedIdentity>,
        description: Option<&InstanceDescription>,
        now: DateTime<Utc>,
    ) -> bool {
        let Some(cached) = cached else {
            return true;
        };
        if description.is_some_and(|description| cached.identity.description != *description) {
            return true;
        }
        now.checked_add_signed(self.safety_margin)
            .is_none_or(|threshold| threshold > cached.identity.expiration)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    /// Nothing encoded yet.
    Empty,
    /// The cached identity would be served as is.
    Fresh,
    /// The next call refreshes.
    Stale,
}

struct CachedIdentity {
    identity: InstanceIdentity,
    encoded: String,
}

pub struct ExpiringIdentityCache {
    policy: ExpiryPolicy,
    cached: Mutex<Option<CachedIdentity>>,
    refreshes: AtomicU64,
}

impl ExpiringIdentityCache {
    pub fn new(policy: ExpiryPolicy) -> Self {
        Self {
            policy,
            cached: Mutex::new(None),
            refreshes: AtomicU64::new(0),
        }
    }

    pub fn policy(&self) -> ExpiryPolicy {
        self.policy
    }

    /// Number of refreshes performed since construction.
    pub fn refresh_count(&self) -> u64 {
        self.refreshes.load(Ordering::Relaxed)
    }

    /// Returns the encoded identity of `description`, refreshing it first if
    /// it expires within the safety margin.
    ///
    /// The cache holds a single identity. Passing a description other than
    /// the cached one replaces it, so callers share one description per cache.
    pub async fn get_or_refresh(
        &self,
        description: &Arc<InstanceDescription>,
    ) -> Result<String, IdentityError> {
        // read the clock before waiting on the lock
        let now = Utc::now();
        self.get_or_refresh_at(description, now).await
    }

    /// [`get_or_refresh`](Self::get_or_refresh) against an explicit clock reading.
    pub async fn get_or_refresh_at(
        &self,
        description: &Arc<InstanceDescription>,
        now: DateTime<Utc>,
    ) -> Result<String, IdentityError> {
        let mut cached = self.cached.lock().await;

        if self
            .policy
            .needs_refresh(cached.as_ref(), Some(description.as_ref()), now)
        {
            let identity = InstanceIdentity {
                description: description.as_ref().clone(),
                expiration: self.policy.expiration_at(now)?,
            };
            // encode before touching the cached state so a failure leaves it intact
            let encoded = encoding::encode(&identity)?;

            tracing::debug!(
                "[identity] refreshed identity for {}, expires at {}",
                identity.description.instance_id,
                identity.expiration
            );

            *cached = Some(CachedIdentity { identity, encoded });
            self.refreshes.fetch_add(1, Ordering::Relaxed);
        }

        match cached.as_ref() {
            Some(cached) => Ok(cached.encoded.clone()),
            None => Err(IdentityError::EncodeError(
                "identity cache empty after refresh".to_string(),
            )),
        }
    }

    /// Returns the expiration of the cached identity, if any.
    pub async fn expiration(&self) -> Option<DateTime<Utc>> {
        self.cached
            .lock()
            .await
            .as_ref()
            .map(|cached| cached.identity.expiration)
    }

    pub async fn state_at(&self, now: DateTime<Utc>) -> CacheState {
        let cached = self.cached.lock().await;
        match cached.as_ref() {
            None => CacheState::Empty,
            Some(_) if self.policy.needs_refresh(cached.as_ref(), None, now) => CacheState::Stale,
            Some(_) => CacheState::Fresh,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::TimeZone;

    use super::*;
    use crate::constants::{IDENTITY_SAFETY_MARGIN, IDENTITY_TTL};

    fn description() -> Arc<InstanceDescription> {
        Arc::new(InstanceDescription {
            region: "us-east-1".to_string(),
            instance_id: "i-0123456789abcdef0".to_string(),
            tags: BTreeMap::from([("Name".to_string(), "web-1".to_string())]),
        })
    }

    fn default_cache() -> ExpiringIdentityCache {
        ExpiringIdentityCache::new(ExpiryPolicy::new(IDENTITY_TTL, IDENTITY_SAFETY_MARGIN).unwrap())
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap()
    }

    // ==================== Policy Tests ====================

    #[test]
    fn test_policy_rejects_margin_equal_to_ttl() {
        let result = ExpiryPolicy::new(Duration::from_secs(60), Duration::from_secs(60));
        assert_eq!(
            result,
            Err(IdentityError::InvalidExpiryPolicy {
                ttl: Duration::from_secs(60),
                safety_margin: Duration::from_secs(60),
            })
        );
    }

    #[test]
    fn test_policy_rejects_margin_longer_than_ttl() {
        let result = ExpiryPolicy::new(Duration::from_secs(60), Duration::from_secs(120));
        assert!(matches!(result, Err(IdentityError::InvalidExpiryPolicy { .. })));
    }

    #[test]
    fn test_policy_accepts_margin_shorter_than_ttl() {
        let policy = ExpiryPolicy::new(IDENTITY_TTL, IDENTITY_SAFETY_MARGIN).unwrap();
        assert!(policy.safety_margin() < policy.ttl());
        assert_eq!(policy.ttl(), Duration::from_secs(900));
        assert_eq!(policy.safety_margin(), Duration::from_secs(120));
    }

    #[test]
    fn test_policy_rejects_ttl_past_maximum() {
        let ttl = MAX_IDENTITY_TTL + Duration::from_secs(1);
        let result = ExpiryPolicy::new(ttl, IDENTITY_SAFETY_MARGIN);
        assert_eq!(
            result,
            Err(IdentityError::InvalidExpiryPolicy {
                ttl,
                safety_margin: IDENTITY_SAFETY_MARGIN,
            })
        );
        assert!(ExpiryPolicy::new(MAX_IDENTITY_TTL, IDENTITY_SAFETY_MARGIN).is_ok());
    }

    // ==================== Expiry Boundary Tests ====================

    #[tokio::test]
    async fn test_first_call_refreshes() {
        let cache = default_cache();
        assert_eq!(cache.state_at(t0()).await, CacheState::Empty);

        let encoded = cache.get_or_refresh_at(&description(), t0()).await.unwrap();

        assert!(!encoded.is_empty());
        assert_eq!(cache.refresh_count(), 1);
        assert_eq!(cache.expiration().await, Some(t0() + TimeDelta::minutes(15)));
        assert_eq!(cache.state_at(t0()).await, CacheState::Fresh);
    }

    #[tokio::test]
    async fn test_call_within_validity_reuses_value() {
        let cache = default_cache();
        let first = cache.get_or_refresh_at(&description(), t0()).await.unwrap();

        let later = t0() + TimeDelta::minutes(1);
        let second = cache.get_or_refresh_at(&description(), later).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(cache.refresh_count(), 1);
    }

    #[tokio::test]
    async fn test_call_at_margin_boundary_reuses_value() {
        let cache = default_cache();
        cache.get_or_refresh_at(&description(), t0()).await.unwrap();

        // now + margin lands exactly on the expiration, which is not after it
        let boundary = t0() + TimeDelta::minutes(13);
        assert_eq!(cache.state_at(boundary).await, CacheState::Fresh);
        cache.get_or_refresh_at(&description(), boundary).await.unwrap();

        assert_eq!(cache.refresh_count(), 1);
    }

    #[tokio::test]
    async fn test_call_inside_margin_refreshes() {
        let cache = default_cache();
        let first = cache.get_or_refresh_at(&description(), t0()).await.unwrap();

        let later = t0() + TimeDelta::minutes(13) + TimeDelta::seconds(1);
        assert_eq!(cache.state_at(later).await, CacheState::Stale);
        let second = cache.get_or_refresh_at(&description(), later).await.unwrap();

        assert_ne!(first, second);
        assert_eq!(cache.refresh_count(), 2);
        assert_eq!(cache.expiration().await, Some(later + TimeDelta::minutes(15)));
    }

    #[tokio::test]
    async fn test_encoded_value_decodes_to_identity() {
        let cache = default_cache();
        let encoded = cache.get_or_refresh_at(&description(), t0()).await.unwrap();

        let identity: InstanceIdentity = encoding::decode(&encoded).unwrap();

        assert_eq!(identity.description, *description());
        assert_eq!(identity.expiration, t0() + TimeDelta::minutes(15));
    }

    #[tokio::test]
    async fn test_expiration_past_representable_time_is_an_error() {
        let cache = default_cache();
        let near_end = DateTime::<Utc>::MAX_UTC - TimeDelta::minutes(1);

        let result = cache.get_or_refresh_at(&description(), near_end).await;

        assert!(matches!(result, Err(IdentityError::InvalidExpiryPolicy { .. })));
        assert_eq!(cache.refresh_count(), 0);
        assert_eq!(cache.state_at(near_end).await, CacheState::Empty);
    }

    #[tokio::test]
    async fn test_different_description_replaces_cached_identity() {
        let cache = default_cache();
        cache.get_or_refresh_at(&description(), t0()).await.unwrap();

        let mut other = description().as_ref().clone();
        other.instance_id = "i-0fedcba9876543210".to_string();
        let later = t0() + TimeDelta::minutes(1);
        let encoded = cache.get_or_refresh_at(&Arc::new(other), later).await.unwrap();

        let identity: InstanceIdentity = encoding::decode(&encoded).unwrap();
        assert_eq!(identity.description.instance_id, "i-0fedcba9876543210");
        assert_eq!(cache.refresh_count(), 2);
    }

    // ==================== Concurrency Tests ====================

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_callers_share_one_refresh() {
        let cache = Arc::new(default_cache());
        let description = description();
        cache.get_or_refresh_at(&description, t0()).await.unwrap();

        let stale = t0() + TimeDelta::minutes(14);
        let mut handles = Vec::new();
        for _ in 0..64 {
            let cache = cache.clone();
            let description = description.clone();
            handles.push(tokio::spawn(async move {
                cache.get_or_refresh_at(&description, stale).await
            }));
        }

        let mut values = Vec::new();
        for handle in handles {
            values.push(handle.await.unwrap().unwrap());
        }

        assert_eq!(cache.refresh_count(), 2);
        assert!(values.iter().all(|v| !v.is_empty() && *v == values[0]));
        assert_eq!(cache.expiration().await, Some(stale + TimeDelta::minutes(15)));
    }

    #[tokio::test]
    async fn test_get_or_refresh_uses_wall_clock() {
        let cache = default_cache();
        let before = Utc::now();

        cache.get_or_refresh(&description()).await.unwrap();

        let expiration = cache.expiration().await.unwrap();
        assert!(expiration >= before + TimeDelta::minutes(15));
        assert_eq!(cache.state_at(Utc::now()).await, CacheState::Fresh);
    }
}
