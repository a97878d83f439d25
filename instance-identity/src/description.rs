// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use std::sync::Arc;

use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;

use crate::errors::IdentityError;
use crate::metadata::InstanceDescriptor;
use crate::models::InstanceDescription;

/// Lazily describes the instance exactly once.
///
/// The first caller runs the metadata and tag lookups; concurrent callers wait
/// for it and later callers never block. The outcome is kept for the lifetime
/// of the cache, including a failure: an instance that cannot be described
/// will not become describable later, so the lookup is not repeated.
///
/// Cancellation is the exception. A canceled lookup leaves the cache empty and
/// the next caller starts over.
pub struct DescriptionCache {
    descriptor: InstanceDescriptor,
    description: OnceCell<Result<Arc<InstanceDescription>, IdentityError>>,
}

impl DescriptionCache {
    pub fn new(descriptor: InstanceDescriptor) -> Self {
        Self {
            descriptor,
            description: OnceCell::new(),
        }
    }

    #[tracing::instrument(skip(self, cancel))]
    pub async fn get(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Arc<InstanceDescription>, IdentityError> {
        let outcome = self
            .description
            .get_or_try_init(|| async {
                match self.descriptor.describe(cancel).await {
                    Ok(description) => {
                        tracing::info!(
                            "[identity] described instance {} in {}",
                            description.instance_id,
                            description.region
                        );
                        Ok(Ok(Arc::new(description)))
                    }
                    Err(IdentityError::Canceled) => Err(IdentityError::Canceled),
                    Err(err) => {
                        tracing::error!("[identity] unable to describe instance: {}", err);
                        Ok(Err(err))
                    }
                }
            })
            .await?;

        outcome.clone()
    }

    /// Returns the description if the lookup already succeeded.
    pub fn cached(&self) -> Option<Arc<InstanceDescription>> {
        self.description
            .get()
            .and_then(|outcome| outcome.as_ref().ok())
            .cloned()
    }
}
