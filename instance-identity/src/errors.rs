// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use std::time::Duration;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum IdentityError {
    #[error("instance metadata unavailable: {0}")]
    MetadataUnavailable(String),
    #[error("tag lookup failed for instance {instance_id}: {message}")]
    TagLookupFailed { instance_id: String, message: String },
    #[error("configuration error: {0}")]
    ConfigLoadFailed(String),
    #[error("unable to decode payload: {0}")]
    DecodeError(String),
    #[error("unable to encode payload: {0}")]
    EncodeError(String),
    #[error("unable to sign request: {0}")]
    SignRequestFailed(String),
    #[error("safety margin {safety_margin:?} must be shorter than ttl {ttl:?}")]
    InvalidExpiryPolicy {
        ttl: Duration,
        safety_margin: Duration,
    },
    #[error("operation canceled")]
    Canceled,
}

impl IdentityError {
    /// Failures of the one-time initializers. There is no degraded mode for
    /// these; the process is expected to exit.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::MetadataUnavailable(_) | Self::TagLookupFailed { .. } | Self::ConfigLoadFailed(_)
        )
    }
}

impl From<data_encoding::DecodeError> for IdentityError {
    fn from(source: data_encoding::DecodeError) -> Self {
        tracing::debug!("{:?}", source);
        IdentityError::DecodeError(source.to_string())
    }
}
