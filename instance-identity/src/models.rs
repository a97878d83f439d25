// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::encoding;
use crate::errors::IdentityError;

/// Static facts about the running instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InstanceDescription {
    #[serde(rename = "Region")]
    pub region: String,
    #[serde(rename = "InstanceId")]
    pub instance_id: String,
    #[serde(rename = "Tags")]
    pub tags: BTreeMap<String, String>,
}

/// An instance description together with the time after which a verifier
/// should stop trusting it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InstanceIdentity {
    #[serde(rename = "Description")]
    pub description: InstanceDescription,
    #[serde(rename = "Expiration")]
    pub expiration: DateTime<Utc>,
}

/// A signed HTTP request descriptor, ready to be executed verbatim by any
/// HTTP client before its signature expires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PresignedRequest {
    #[serde(rename = "Method")]
    pub method: String,
    #[serde(rename = "URL")]
    pub url: String,
    #[serde(rename = "SignedHeader")]
    pub signed_headers: BTreeMap<String, Vec<String>>,
}

impl PresignedRequest {
    /// Returns the values of a signed header, matching the name case-insensitively.
    pub fn header(&self, name: &str) -> Option<&[String]> {
        self.signed_headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, values)| values.as_slice())
    }

    /// Encodes the request into the portable wire format.
    pub fn encode(&self) -> Result<String, IdentityError> {
        encoding::encode(self)
    }

    pub fn decode(encoded: &str) -> Result<Self, IdentityError> {
        encoding::decode(encoded)
    }
}

/// The description of the instance alongside a request asserting it.
#[derive(Debug, Clone)]
pub struct InstanceAssertion {
    pub description: Arc<InstanceDescription>,
    pub request: PresignedRequest,
}

/// The subset of the IMDS instance identity document this crate reads.
#[derive(Debug, Clone, Deserialize)]
pub struct IdentityDocument {
    #[serde(rename = "region")]
    pub region: String,
    #[serde(rename = "instanceId")]
    pub instance_id: String,
}
