// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use std::time::SystemTime;

use aws_config::BehaviorVersion;
use aws_config::imds::credentials::ImdsCredentialsProvider;
use aws_credential_types::Credentials;
use aws_credential_types::provider::{self, ProvideCredentials, SharedCredentialsProvider, future};
use tokio::sync::RwLock;

use crate::configuration::{CredentialSource, IdentityOptions};
use crate::constants;
use crate::errors::IdentityError;
use crate::imds;

#[derive(Debug)]
struct CachedCredentials {
    credentials: Credentials,
    expires_at: Option<SystemTime>,
}

/// Credentials provider that reuses the credentials of an inner provider until
/// they are about to expire.
#[derive(Debug)]
pub struct CredentialCache {
    inner: SharedCredentialsProvider,
    cached: RwLock<Option<CachedCredentials>>,
}

impl CredentialCache {
    pub fn new(inner: SharedCredentialsProvider) -> Self {
        Self {
            inner,
            cached: RwLock::new(None),
        }
    }

    /// Returns cached credentials if valid, otherwise fetches fresh ones
    pub async fn get_credentials(&self) -> provider::Result {
        // Fast path: check if cached credentials are still valid
        {
            let cache = self.cached.read().await;
            if let Some(ref cached) = *cache
                && is_valid(cached)
            {
                return Ok(cached.credentials.clone());
            }
        }

        // Slow path: refresh credentials
        self.refresh().await
    }

    async fn refresh(&self) -> provider::Result {
        let mut cache = self.cached.write().await;

        // Double-check after acquiring write lock (another task may have refreshed)
        if let Some(ref cached) = *cache
            && is_valid(cached)
        {
            return Ok(cached.credentials.clone());
        }

        let credentials = self.inner.provide_credentials().await?;
        let expires_at = credentials.expiry();

        tracing::debug!(
            "[identity] refreshed credentials, expires_at: {:?}",
            expires_at
        );

        *cache = Some(CachedCredentials {
            credentials: credentials.clone(),
            expires_at,
        });

        Ok(credentials)
    }
}

fn is_valid(cached: &CachedCredentials) -> bool {
    match cached.expires_at {
        Some(expires_at) => SystemTime::now()
            .checked_add(constants::CREDENTIAL_REFRESH_BUFFER)
            .map(|threshold| threshold < expires_at)
            .unwrap_or(false),
        None => true, // No expiry = always valid
    }
}

impl ProvideCredentials for CredentialCache {
    fn provide_credentials<'a>(&'a self) -> future::ProvideCredentials<'a>
    where
        Self: 'a,
    {
        future::ProvideCredentials::new(self.get_credentials())
    }
}

/// Resolves the ambient credentials provider once.
///
/// The returned provider is wrapped in a [`CredentialCache`]; callers keep it
/// for the lifetime of the process and never re-resolve it.
pub async fn resolve_provider(
    options: &IdentityOptions,
) -> Result<SharedCredentialsProvider, IdentityError> {
    let inner = match options.credential_source {
        CredentialSource::Imds => {
            let client = imds::build_client(&options.imds_endpoint)?;
            let mut builder = ImdsCredentialsProvider::builder().imds_client(client);
            if let Some(role) = options.role.clone() {
                builder = builder.profile(role);
            }
            SharedCredentialsProvider::new(builder.build())
        }
        CredentialSource::Default => {
            let sdk_config = aws_config::defaults(BehaviorVersion::latest()).load().await;
            sdk_config.credentials_provider().ok_or_else(|| {
                IdentityError::ConfigLoadFailed("no credentials provider resolvable".to_string())
            })?
        }
    };

    Ok(SharedCredentialsProvider::new(CredentialCache::new(inner)))
}
