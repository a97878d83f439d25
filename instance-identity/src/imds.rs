// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use aws_config::imds::client::{Client, ImdsResponseRetryClassifier};
use aws_smithy_runtime_api::client::retries::classifiers::SharedRetryClassifier;

use crate::constants;
use crate::errors::IdentityError;
use crate::models::IdentityDocument;

/// Builds an IMDSv2 client that also retries connect timeouts.
pub fn build_client(endpoint: &str) -> Result<Client, IdentityError> {
    let client = Client::builder()
        .endpoint(endpoint)
        .map_err(|e| IdentityError::ConfigLoadFailed(e.to_string()))?
        .token_ttl(constants::IMDS_TOKEN_TTL)
        .retry_classifier(SharedRetryClassifier::new(
            ImdsResponseRetryClassifier::default().with_retry_connect_timeouts(true),
        ))
        .build();

    Ok(client)
}

/// Fetches and parses the instance identity document.
pub async fn fetch_identity_document(client: &Client) -> Result<IdentityDocument, IdentityError> {
    let document = client
        .get(constants::IMDS_IDENTITY_DOCUMENT_PATH)
        .await
        .map_err(|e| IdentityError::MetadataUnavailable(format!("{:?}", e)))?;

    parse_identity_document(document.as_ref())
}

fn parse_identity_document(document: &str) -> Result<IdentityDocument, IdentityError> {
    let document: IdentityDocument = serde_json::from_str(document).map_err(|e| {
        IdentityError::MetadataUnavailable(format!("malformed identity document: {}", e))
    })?;

    if document.region.is_empty() || document.instance_id.is_empty() {
        return Err(IdentityError::MetadataUnavailable(
            "identity document is missing region or instance id".to_string(),
        ));
    }

    Ok(document)
}
