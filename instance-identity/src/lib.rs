// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! # Instance Identity
//!
//! Lets an EC2 instance prove its identity to a remote verifier without handing
//! over credentials.
//!
//! The instance presigns an STS `GetCallerIdentity` request with its role
//! credentials and embeds an encoded description of itself (region, instance
//! id, tags) in a signed header. The verifier replays the request to STS: a
//! successful response proves the role, and the signature proves the header.
//!
//! ## Architecture
//!
//! ```text
//! caller -> InstanceAuthenticator -> DescriptionCache -> IMDS + EC2 DescribeTags (once)
//!                                 -> ExpiringIdentityCache (re-encode every ttl)
//!                                 -> PresignClientCache -> SigV4 presign (every call)
//! ```
//!
//! ## Modules
//!
//! - [`authenticator`]: composes the caches into presigned requests
//! - [`configuration`]: CLI argument parsing with clap
//! - [`constants`]: configuration constants for the application
//! - [`credentials`]: ambient credentials resolution and caching
//! - [`description`]: one-time instance description
//! - [`encoding`]: JSON + base64 wire encoding
//! - [`errors`]: error types
//! - [`identity_cache`]: time-boxed encoded identity
//! - [`imds`]: EC2 Instance Metadata Service client
//! - [`metadata`]: instance identity and tag lookups
//! - [`models`]: data types
//! - [`presign`]: STS request presigning
//!
//! ## Wire Format
//!
//! The [`IDENTITY_HEADER`](constants::IDENTITY_HEADER) value and the portable
//! form of a [`PresignedRequest`](models::PresignedRequest) are JSON encoded
//! with padded URL-safe base64. See [`encoding`].

pub mod authenticator;
pub mod configuration;
pub mod constants;
pub mod credentials;
pub mod description;
pub mod encoding;
pub mod errors;
pub mod identity_cache;
pub mod imds;
pub mod metadata;
pub mod models;
pub mod presign;
