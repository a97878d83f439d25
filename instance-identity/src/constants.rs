// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use std::time::Duration;

/// Signed request header carrying the encoded instance identity.
pub const IDENTITY_HEADER: &str = "X-Instance-Identity-Description";

pub const IMDS_ENDPOINT: &str = "http://169.254.169.254:80";
pub const IMDS_TOKEN_TTL: Duration = Duration::from_secs(300); // 5 minutes
pub const IMDS_IDENTITY_DOCUMENT_PATH: &str = "/latest/dynamic/instance-identity/document";

pub const TAG_FILTER_RESOURCE_ID: &str = "resource-id";
pub const TAG_FILTER_RESOURCE_TYPE: &str = "resource-type";
pub const TAG_RESOURCE_TYPE_INSTANCE: &str = "instance";

pub const IDENTITY_TTL: Duration = Duration::from_secs(15 * 60); // 15 minutes
pub const IDENTITY_SAFETY_MARGIN: Duration = Duration::from_secs(120); // refresh 120s before expiry
pub const MAX_IDENTITY_TTL: Duration = Duration::from_secs(24 * 60 * 60); // 1 day

pub const STS_SERVICE_NAME: &str = "sts";
pub const STS_GET_CALLER_IDENTITY_QUERY: &str = "Action=GetCallerIdentity&Version=2011-06-15";
/// Lifetime of the signature embedded in a presigned request.
pub const PRESIGN_EXPIRES_IN: Duration = Duration::from_secs(900);
pub const CREDENTIAL_REFRESH_BUFFER: Duration = Duration::from_secs(60); // refresh 60s before expiry
