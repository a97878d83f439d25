// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Retrieval of the facts describing the running instance.
//!
//! [`InstanceDescriptor`] combines two lookups performed by an
//! [`InstanceMetadata`] source:
//!
//! 1. **Identity**: region and instance id from the IMDS identity document
//! 2. **Tags**: the instance's resource tags from the EC2 `DescribeTags` API
//!
//! The two failure kinds stay distinct so callers can tell "not running on
//! EC2" ([`IdentityError::MetadataUnavailable`]) from "running on EC2 without
//! `ec2:DescribeTags` permission" ([`IdentityError::TagLookupFailed`]).

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use aws_config::imds::client::Client as ImdsClient;
use aws_credential_types::provider::SharedCredentialsProvider;
use aws_sdk_ec2::config::{BehaviorVersion, Region};
use aws_sdk_ec2::types::Filter;
use tokio_util::sync::CancellationToken;

use crate::constants::{
    TAG_FILTER_RESOURCE_ID, TAG_FILTER_RESOURCE_TYPE, TAG_RESOURCE_TYPE_INSTANCE,
};
use crate::errors::IdentityError;
use crate::imds;
use crate::models::{IdentityDocument, InstanceDescription};

/// Source of instance metadata and tags.
#[async_trait]
pub trait InstanceMetadata: Send + Sync {
    async fn instance_identity(&self) -> Result<IdentityDocument, IdentityError>;

    /// Returns the instance's tags as `(key, value)` pairs, in the order the
    /// service listed them.
    async fn instance_tags(
        &self,
        region: &str,
        instance_id: &str,
    ) -> Result<Vec<(String, String)>, IdentityError>;
}

/// [`InstanceMetadata`] backed by IMDS and the EC2 API.
pub struct Ec2InstanceMetadata {
    imds: ImdsClient,
    credentials: SharedCredentialsProvider,
}

impl Ec2InstanceMetadata {
    pub fn new(imds: ImdsClient, credentials: SharedCredentialsProvider) -> Self {
        Self { imds, credentials }
    }

    fn ec2_client(&self, region: &str) -> aws_sdk_ec2::Client {
        let config = aws_sdk_ec2::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .credentials_provider(self.credentials.clone())
            .build();
        aws_sdk_ec2::Client::from_conf(config)
    }
}

#[async_trait]
impl InstanceMetadata for Ec2InstanceMetadata {
    async fn instance_identity(&self) -> Result<IdentityDocument, IdentityError> {
        imds::fetch_identity_document(&self.imds).await
    }

    async fn instance_tags(
        &self,
        region: &str,
        instance_id: &str,
    ) -> Result<Vec<(String, String)>, IdentityError> {
        let client = self.ec2_client(region);
        let filters = [
            Filter::builder()
                .name(TAG_FILTER_RESOURCE_ID)
                .values(instance_id)
                .build(),
            Filter::builder()
                .name(TAG_FILTER_RESOURCE_TYPE)
                .values(TAG_RESOURCE_TYPE_INSTANCE)
                .build(),
        ];

        let mut tags = Vec::new();
        let mut next_token: Option<String> = None;
        loop {
            let output = client
                .describe_tags()
                .set_filters(Some(filters.to_vec()))
                .set_next_token(next_token.take())
                .send()
                .await
                .map_err(|e| IdentityError::TagLookupFailed {
                    instance_id: instance_id.to_string(),
                    message: format!("{:?}", e.into_service_error()),
                })?;

            for tag in output.tags() {
                // a tag always has a key; the value may legitimately be empty
                if let Some(key) = tag.key() {
                    tags.push((key.to_string(), tag.value().unwrap_or_default().to_string()));
                }
            }

            match output.next_token() {
                Some(token) if !token.is_empty() => next_token = Some(token.to_string()),
                _ => break,
            }
        }

        Ok(tags)
    }
}

/// Produces an [`InstanceDescription`] from an [`InstanceMetadata`] source.
///
/// No retries happen here; the caller decides.
pub struct InstanceDescriptor {
    source: Arc<dyn InstanceMetadata>,
}

impl InstanceDescriptor {
    pub fn new(source: Arc<dyn InstanceMetadata>) -> Self {
        Self { source }
    }

    /// Returns `(region, instance_id)` of the running instance.
    #[tracing::instrument(skip(self, cancel))]
    pub async fn retrieve_identity(
        &self,
        cancel: &CancellationToken,
    ) -> Result<(String, String), IdentityError> {
        let document = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(IdentityError::Canceled),
            document = self.source.instance_identity() => document?,
        };

        Ok((document.region, document.instance_id))
    }

    /// Returns the tags of `instance_id`. Later duplicates of a key win.
    #[tracing::instrument(skip(self, cancel))]
    pub async fn retrieve_tags(
        &self,
        region: &str,
        instance_id: &str,
        cancel: &CancellationToken,
    ) -> Result<BTreeMap<String, String>, IdentityError> {
        let tags = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(IdentityError::Canceled),
            tags = self.source.instance_tags(region, instance_id) => tags?,
        };

        Ok(tags.into_iter().collect())
    }

    /// Runs both lookups and assembles the description.
    pub async fn describe(
        &self,
        cancel: &CancellationToken,
    ) -> Result<InstanceDescription, IdentityError> {
        let (region, instance_id) = self.retrieve_identity(cancel).await?;
        let tags = self.retrieve_tags(&region, &instance_id, cancel).await?;

        tracing::debug!(
            "[identity] described instance {} in {} with {} tags",
            instance_id,
            region,
            tags.len()
        );

        Ok(InstanceDescription {
            region,
            instance_id,
            tags,
        })
    }
}
