// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! End-to-end tests for instance authentication.
//!
//! The metadata and tagging services are replaced with in-memory fakes; the
//! requests are signed with the real SigV4 presigner over static credentials.

#![allow(clippy::unwrap_used, clippy::indexing_slicing)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use aws_credential_types::Credentials;
use aws_credential_types::provider::SharedCredentialsProvider;
use instance_identity::authenticator::InstanceAuthenticator;
use instance_identity::constants::IDENTITY_HEADER;
use instance_identity::encoding;
use instance_identity::errors::IdentityError;
use instance_identity::identity_cache::ExpiryPolicy;
use instance_identity::metadata::InstanceMetadata;
use instance_identity::models::{IdentityDocument, InstanceIdentity, PresignedRequest};
use instance_identity::presign::{PresignIdentityRequest, PresignerLoader, StsPresigner};
use tokio_util::sync::CancellationToken;

const INSTANCE_ID: &str = "i-0a1b2c3d4e5f67890";
const REGION: &str = "ap-northeast-1";

/// Metadata service fake counting lookups.
#[derive(Default)]
struct FakeMetadata {
    identity_calls: AtomicUsize,
    tag_calls: AtomicUsize,
    deny_tags: bool,
}

#[async_trait]
impl InstanceMetadata for FakeMetadata {
    async fn instance_identity(&self) -> Result<IdentityDocument, IdentityError> {
        self.identity_calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(25)).await;
        Ok(IdentityDocument {
            region: REGION.to_string(),
            instance_id: INSTANCE_ID.to_string(),
        })
    }

    async fn instance_tags(
        &self,
        _region: &str,
        instance_id: &str,
    ) -> Result<Vec<(String, String)>, IdentityError> {
        self.tag_calls.fetch_add(1, Ordering::SeqCst);
        if self.deny_tags {
            return Err(IdentityError::TagLookupFailed {
                instance_id: instance_id.to_string(),
                message: "UnauthorizedOperation".to_string(),
            });
        }
        Ok(vec![
            ("Name".to_string(), "batch-worker".to_string()),
            ("aws:autoscaling:groupName".to_string(), "workers".to_string()),
        ])
    }
}

/// Loads a real presigner over static credentials.
struct StaticLoader;

#[async_trait]
impl PresignerLoader for StaticLoader {
    async fn load(&self, region: &str) -> Result<Arc<dyn PresignIdentityRequest>, IdentityError> {
        let credentials = SharedCredentialsProvider::new(Credentials::new(
            "ASIAEXAMPLEEXAMPLE",
            "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY",
            Some("session-token".to_string()),
            None,
            "integration",
        ));
        Ok(Arc::new(StsPresigner::new(credentials, region, None)?))
    }
}

fn authenticator(metadata: Arc<FakeMetadata>) -> InstanceAuthenticator {
    InstanceAuthenticator::new(
        metadata,
        Arc::new(StaticLoader),
        ExpiryPolicy::new(Duration::from_secs(900), Duration::from_secs(120)).unwrap(),
    )
}

fn query(request: &PresignedRequest) -> BTreeMap<String, String> {
    url::Url::parse(&request.url)
        .unwrap()
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}

#[tokio::test]
async fn test_presigned_request_asserts_instance() {
    let authenticator = authenticator(Arc::new(FakeMetadata::default()));

    let request = authenticator
        .authenticate(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(request.method, "GET");
    assert!(request.url.starts_with("https://sts.ap-northeast-1.amazonaws.com/"));

    let header = &request.header(IDENTITY_HEADER).unwrap()[0];
    assert!(!header.is_empty());
    let identity: InstanceIdentity = encoding::decode(header).unwrap();
    assert_eq!(identity.description.instance_id, INSTANCE_ID);
    assert_eq!(identity.description.region, REGION);
    assert_eq!(identity.description.tags["Name"], "batch-worker");

    let query = query(&request);
    assert_eq!(query["Action"], "GetCallerIdentity");
    assert_eq!(query["X-Amz-Security-Token"], "session-token");
    assert!(query["X-Amz-SignedHeaders"].contains("x-instance-identity-description"));
}

#[tokio::test]
async fn test_encoded_request_survives_round_trip() {
    let authenticator = authenticator(Arc::new(FakeMetadata::default()));
    let request = authenticator
        .authenticate(&CancellationToken::new())
        .await
        .unwrap();

    let encoded = request.encode().unwrap();
    let decoded = PresignedRequest::decode(&encoded).unwrap();

    assert_eq!(decoded, request);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_callers_describe_once() {
    let metadata = Arc::new(FakeMetadata::default());
    let authenticator = Arc::new(authenticator(metadata.clone()));

    let mut handles = Vec::new();
    for _ in 0..24 {
        let authenticator = authenticator.clone();
        handles.push(tokio::spawn(async move {
            let cancel = CancellationToken::new();
            authenticator.authenticate_instance(&cancel).await
        }));
    }

    let mut assertions = Vec::new();
    for handle in handles {
        assertions.push(handle.await.unwrap().unwrap());
    }

    assert_eq!(metadata.identity_calls.load(Ordering::SeqCst), 1);
    assert_eq!(metadata.tag_calls.load(Ordering::SeqCst), 1);
    assert_eq!(authenticator.identities().refresh_count(), 1);

    let first = &assertions[0];
    for assertion in &assertions {
        assert!(Arc::ptr_eq(&assertion.description, &first.description));
        assert_eq!(
            assertion.request.header(IDENTITY_HEADER),
            first.request.header(IDENTITY_HEADER)
        );
    }
}

#[tokio::test]
async fn test_tag_denial_is_fatal_and_sticky() {
    let metadata = Arc::new(FakeMetadata {
        deny_tags: true,
        ..FakeMetadata::default()
    });
    let authenticator = authenticator(metadata.clone());
    let cancel = CancellationToken::new();

    let first = authenticator.authenticate(&cancel).await.unwrap_err();
    let second = authenticator.authenticate(&cancel).await.unwrap_err();

    assert!(matches!(first, IdentityError::TagLookupFailed { .. }));
    assert!(first.is_fatal());
    assert_eq!(first, second);
    assert_eq!(metadata.identity_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_during_describe() {
    let metadata = Arc::new(FakeMetadata::default());
    let authenticator = authenticator(metadata.clone());
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(5)).await;
        trigger.cancel();
    });

    let err = authenticator.authenticate(&cancel).await.unwrap_err();
    assert_eq!(err, IdentityError::Canceled);

    // a later caller performs the lookup again
    let request = authenticator
        .authenticate(&CancellationToken::new())
        .await
        .unwrap();
    assert!(request.header(IDENTITY_HEADER).is_some());
    assert_eq!(metadata.identity_calls.load(Ordering::SeqCst), 2);
}

#[test]
fn test_decode_rejects_garbage() {
    let result = PresignedRequest::decode("not-valid-base64!!");
    assert!(matches!(result, Err(IdentityError::DecodeError(_))));
}
