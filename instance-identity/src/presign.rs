// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Presigning of STS `GetCallerIdentity` requests.
//!
//! A presigned `GetCallerIdentity` request proves possession of the instance
//! role's credentials without disclosing them: whoever holds the request can
//! replay it to STS once and learn which role signed it. Extra headers passed
//! to the signer become part of the signature, so a verifier replaying the
//! request also learns that those header values came from the signer.
//!
//! # Signature Placement
//!
//! The SigV4 signature travels in the query string (`X-Amz-Signature` and
//! friends). The signed headers (`host` plus any extra headers) must be sent
//! verbatim alongside the URL, which is why [`PresignedRequest`] carries them.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use aws_credential_types::Credentials;
use aws_credential_types::provider::{ProvideCredentials, SharedCredentialsProvider};
use aws_sigv4::http_request::{
    SignableBody, SignableRequest, SignatureLocation, SigningParams, SigningSettings, sign,
};
use aws_sigv4::sign::v4;
use aws_smithy_runtime_api::client::identity::Identity;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::constants::{PRESIGN_EXPIRES_IN, STS_GET_CALLER_IDENTITY_QUERY, STS_SERVICE_NAME};
use crate::errors::IdentityError;
use crate::models::PresignedRequest;

/// Signing client able to presign a "who am I" request.
#[async_trait]
pub trait PresignIdentityRequest: Send + Sync {
    /// Presigns a `GetCallerIdentity` request whose signature also covers
    /// `extra_headers`.
    async fn presign_get_caller_identity(
        &self,
        extra_headers: &[(String, String)],
    ) -> Result<PresignedRequest, IdentityError>;
}

/// Builds the signing client. Called at most once per [`PresignClientCache`].
#[async_trait]
pub trait PresignerLoader: Send + Sync {
    async fn load(&self, region: &str) -> Result<Arc<dyn PresignIdentityRequest>, IdentityError>;
}

/// SigV4 presigner for the regional STS endpoint.
pub struct StsPresigner {
    credentials: SharedCredentialsProvider,
    region: String,
    endpoint: Url,
    expires_in: Duration,
}

impl StsPresigner {
    /// # Errors
    ///
    /// Returns [`IdentityError::ConfigLoadFailed`] if `endpoint` is not an
    /// absolute URL with a host.
    pub fn new(
        credentials: SharedCredentialsProvider,
        region: impl Into<String>,
        endpoint: Option<&str>,
    ) -> Result<Self, IdentityError> {
        let region = region.into();
        let endpoint = match endpoint {
            Some(endpoint) => endpoint.to_string(),
            None => format!("https://sts.{}.amazonaws.com/", region),
        };
        let endpoint = Url::parse(&endpoint).map_err(|e| {
            IdentityError::ConfigLoadFailed(format!("invalid STS endpoint {}: {}", endpoint, e))
        })?;
        if endpoint.host_str().is_none() {
            return Err(IdentityError::ConfigLoadFailed(format!(
                "STS endpoint {} has no host",
                endpoint
            )));
        }

        Ok(Self {
            credentials,
            region,
            endpoint,
            expires_in: PRESIGN_EXPIRES_IN,
        })
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Signs with the given credentials and signing time.
    pub fn presign_with(
        &self,
        credentials: Credentials,
        extra_headers: &[(String, String)],
        time: SystemTime,
    ) -> Result<PresignedRequest, IdentityError> {
        let mut url = self.endpoint.clone();
        url.set_query(Some(STS_GET_CALLER_IDENTITY_QUERY));

        let host = match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            (Some(host), None) => host.to_string(),
            (None, _) => {
                return Err(IdentityError::SignRequestFailed(
                    "endpoint has no host".to_string(),
                ));
            }
        };

        let mut headers = vec![("host".to_string(), host)];
        headers.extend(
            extra_headers
                .iter()
                .map(|(name, value)| (name.to_ascii_lowercase(), value.clone())),
        );

        let identity: Identity = credentials.into();
        let mut settings = SigningSettings::default();
        settings.signature_location = SignatureLocation::QueryParams;
        settings.expires_in = Some(self.expires_in);

        let params: SigningParams<'_> = v4::SigningParams::builder()
            .identity(&identity)
            .region(&self.region)
            .name(STS_SERVICE_NAME)
            .time(time)
            .settings(settings)
            .build()
            .map_err(|e| IdentityError::SignRequestFailed(e.to_string()))?
            .into();

        let unsigned_url = url.to_string();
        let signable = SignableRequest::new(
            "GET",
            unsigned_url.as_str(),
            headers
                .iter()
                .map(|(name, value)| (name.as_str(), value.as_str())),
            SignableBody::Bytes(&[]),
        )
        .map_err(|e| IdentityError::SignRequestFailed(e.to_string()))?;

        let (instructions, _signature) = sign(signable, &params)
            .map_err(|e| IdentityError::SignRequestFailed(e.to_string()))?
            .into_parts();

        {
            let mut query = url.query_pairs_mut();
            for (name, value) in instructions.params() {
                query.append_pair(name, &value);
            }
        }

        let mut signed_headers: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (name, value) in headers {
            signed_headers.entry(name).or_default().push(value);
        }
        for (name, value) in instructions.headers() {
            signed_headers
                .entry(name.to_ascii_lowercase())
                .or_default()
                .push(value.to_string());
        }

        Ok(PresignedRequest {
            method: "GET".to_string(),
            url: url.to_string(),
            signed_headers,
        })
    }
}

#[async_trait]
impl PresignIdentityRequest for StsPresigner {
    #[tracing::instrument(skip(self, extra_headers))]
    async fn presign_get_caller_identity(
        &self,
        extra_headers: &[(String, String)],
    ) -> Result<PresignedRequest, IdentityError> {
        let credentials = self
            .credentials
            .provide_credentials()
            .await
            .map_err(|e| IdentityError::SignRequestFailed(format!("{:?}", e)))?;

        self.presign_with(credentials, extra_headers, SystemTime::now())
    }
}

/// Loads an [`StsPresigner`] bound to an already resolved credentials provider.
pub struct StsPresignerLoader {
    credentials: SharedCredentialsProvider,
    endpoint: Option<String>,
}

impl StsPresignerLoader {
    pub fn new(credentials: SharedCredentialsProvider, endpoint: Option<String>) -> Self {
        Self {
            credentials,
            endpoint,
        }
    }
}

#[async_trait]
impl PresignerLoader for StsPresignerLoader {
    async fn load(&self, region: &str) -> Result<Arc<dyn PresignIdentityRequest>, IdentityError> {
        let presigner =
            StsPresigner::new(self.credentials.clone(), region, self.endpoint.as_deref())?;

        tracing::info!(
            "[identity] presigning {} requests against {}",
            presigner.region(),
            presigner.endpoint()
        );

        Ok(Arc::new(presigner))
    }
}

/// Lazily builds the signing client once and hands out the same one after.
///
/// The region of the first call is the region of the client for its whole
/// lifetime. A load failure is kept and returned to every later caller; a
/// canceled load is not.
pub struct PresignClientCache {
    loader: Arc<dyn PresignerLoader>,
    client: OnceCell<Result<Arc<dyn PresignIdentityRequest>, IdentityError>>,
}

impl PresignClientCache {
    pub fn new(loader: Arc<dyn PresignerLoader>) -> Self {
        Self {
            loader,
            client: OnceCell::new(),
        }
    }

    #[tracing::instrument(skip(self, cancel))]
    pub async fn get(
        &self,
        region: &str,
        cancel: &CancellationToken,
    ) -> Result<Arc<dyn PresignIdentityRequest>, IdentityError> {
        let outcome = self
            .client
            .get_or_try_init(|| async {
                let loaded = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(IdentityError::Canceled),
                    loaded = self.loader.load(region) => loaded,
                };
                if let Err(ref err) = loaded {
                    tracing::error!("[identity] unable to build signing client: {}", err);
                }
                Ok(loaded)
            })
            .await?;

        outcome.clone()
    }
}
