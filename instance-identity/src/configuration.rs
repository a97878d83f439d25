// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};

use crate::constants;
use crate::errors::IdentityError;
use crate::identity_cache::ExpiryPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CredentialSource {
    /// Role credentials served by the instance metadata service
    Imds,
    /// The default AWS provider chain (environment, profile, web identity, IMDS)
    Default,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Presign a GetCallerIdentity request asserting this instance and print it encoded
    Presign,
    /// Decode an encoded presigned request and print it as JSON
    DecodeRequest { value: String },
    /// Decode an identity header value and print it as JSON
    DecodeIdentity { value: String },
}

#[derive(Debug, Clone, Parser)]
#[command(author, version, about, long_about = None)]
pub struct IdentityOptions {
    #[arg(long, default_value = "900", env("IDENTITY_TTL_SECS"))]
    pub ttl_secs: u64,
    #[arg(long, default_value = "120", env("IDENTITY_SAFETY_MARGIN_SECS"))]
    pub safety_margin_secs: u64,
    /// Signing region, defaults to the region of the instance
    #[arg(long, env("IDENTITY_REGION"))]
    pub region: Option<String>,
    #[arg(long, env("IDENTITY_STS_ENDPOINT"))]
    pub sts_endpoint: Option<String>,
    #[arg(long, default_value = constants::IMDS_ENDPOINT, env("IDENTITY_IMDS_ENDPOINT"))]
    pub imds_endpoint: String,
    #[arg(long, value_enum, default_value = "imds", env("IDENTITY_CREDENTIAL_SOURCE"))]
    pub credential_source: CredentialSource,
    /// Instance profile role name, only used with the `imds` credential source
    #[arg(long, env("IDENTITY_ROLE_NAME"))]
    pub role: Option<String>,
    #[command(subcommand)]
    pub command: Option<Command>,
}

impl IdentityOptions {
    pub fn expiry_policy(&self) -> Result<ExpiryPolicy, IdentityError> {
        ExpiryPolicy::new(
            Duration::from_secs(self.ttl_secs),
            Duration::from_secs(self.safety_margin_secs),
        )
    }
}

impl Default for IdentityOptions {
    fn default() -> Self {
        IdentityOptions {
            ttl_secs: constants::IDENTITY_TTL.as_secs(),
            safety_margin_secs: constants::IDENTITY_SAFETY_MARGIN.as_secs(),
            region: None,
            sts_endpoint: None,
            imds_endpoint: constants::IMDS_ENDPOINT.to_string(),
            credential_source: CredentialSource::Imds,
            role: None,
            command: None,
        }
    }
}
