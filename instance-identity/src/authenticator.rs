// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Instance authentication.
//!
//! [`InstanceAuthenticator`] produces presigned STS `GetCallerIdentity`
//! requests that carry the encoded instance identity in the
//! [`IDENTITY_HEADER`] header. Because the header is covered by the request
//! signature, a verifier replaying the request to STS learns both the IAM role
//! of the caller and, from the header, which instance made the request.
//!
//! # Request Flow
//!
//! 1. Describe the instance (first call only, see [`DescriptionCache`])
//! 2. Get the encoded identity, refreshed when close to expiry
//!    (see [`ExpiringIdentityCache`])
//! 3. Get the signing client (built on first call, see [`PresignClientCache`])
//! 4. Presign the request with the identity header
//!
//! Every call signs anew; presigned requests are never cached.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::configuration::IdentityOptions;
use crate::constants::IDENTITY_HEADER;
use crate::credentials;
use crate::description::DescriptionCache;
use crate::errors::IdentityError;
use crate::identity_cache::{ExpiringIdentityCache, ExpiryPolicy};
use crate::imds;
use crate::metadata::{Ec2InstanceMetadata, InstanceDescriptor, InstanceMetadata};
use crate::models::{InstanceAssertion, InstanceDescription, PresignedRequest};
use crate::presign::{PresignClientCache, PresignerLoader, StsPresignerLoader};

/// Composes the caches into presigned identity assertions.
///
/// Construct one per process and share it by reference (or `Arc`).
pub struct InstanceAuthenticator {
    descriptions: DescriptionCache,
    identities: ExpiringIdentityCache,
    presigners: PresignClientCache,
    region: Option<String>,
}

impl InstanceAuthenticator {
    pub fn new(
        metadata: Arc<dyn InstanceMetadata>,
        loader: Arc<dyn PresignerLoader>,
        policy: ExpiryPolicy,
    ) -> Self {
        Self {
            descriptions: DescriptionCache::new(InstanceDescriptor::new(metadata)),
            identities: ExpiringIdentityCache::new(policy),
            presigners: PresignClientCache::new(loader),
            region: None,
        }
    }

    /// Signs in `region` instead of the instance's own region.
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// Builds an authenticator backed by IMDS, EC2 and STS.
    pub async fn from_options(options: &IdentityOptions) -> Result<Self, IdentityError> {
        let policy = options.expiry_policy()?;
        let imds_client = imds::build_client(&options.imds_endpoint)?;
        let credentials = credentials::resolve_provider(options).await?;

        // metadata lookups and signing share one provider and its cache
        let metadata = Arc::new(Ec2InstanceMetadata::new(imds_client, credentials.clone()));
        let loader = Arc::new(StsPresignerLoader::new(
            credentials,
            options.sts_endpoint.clone(),
        ));

        let authenticator = Self::new(metadata, loader, policy);
        Ok(match options.region.clone() {
            Some(region) => authenticator.with_region(region),
            None => authenticator,
        })
    }

    pub fn identities(&self) -> &ExpiringIdentityCache {
        &self.identities
    }

    /// Returns the instance description, describing the instance on first use.
    pub async fn description(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Arc<InstanceDescription>, IdentityError> {
        self.descriptions.get(cancel).await
    }

    /// Produces a freshly signed request asserting this instance's identity.
    #[tracing::instrument(skip(self, cancel))]
    pub async fn authenticate(
        &self,
        cancel: &CancellationToken,
    ) -> Result<PresignedRequest, IdentityError> {
        let assertion = self.authenticate_instance(cancel).await?;
        Ok(assertion.request)
    }

    /// Like [`authenticate`](Self::authenticate), also returning the
    /// description the request asserts.
    #[tracing::instrument(skip(self, cancel))]
    pub async fn authenticate_instance(
        &self,
        cancel: &CancellationToken,
    ) -> Result<InstanceAssertion, IdentityError> {
        let description = self.descriptions.get(cancel).await?;
        let encoded = self.identities.get_or_refresh(&description).await?;

        let region = self.region.as_deref().unwrap_or(&description.region);
        let presigner = self.presigners.get(region, cancel).await?;

        let headers = [(IDENTITY_HEADER.to_string(), encoded)];
        let request = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(IdentityError::Canceled),
            request = presigner.presign_get_caller_identity(&headers) => request?,
        };

        tracing::debug!(
            "[identity] presigned {} request for {}",
            request.method,
            description.instance_id
        );

        Ok(InstanceAssertion {
            description,
            request,
        })
    }
}
