// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! Wire encoding for identity payloads and presigned requests.
//!
//! Values are serialized to JSON and the bytes are then encoded with the
//! URL-safe base64 alphabet, `=` padded (RFC 4648 section 5). This is the only
//! supported variant: standard-alphabet or unpadded input is rejected.
//!
//! ```text
//! value -> serde_json bytes -> BASE64URL text
//! ```
//!
//! The result contains only `A-Z a-z 0-9 - _ =`, so it can be placed in an HTTP
//! header value or a URL without further escaping.

use data_encoding::BASE64URL;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::errors::IdentityError;

/// Serializes `value` and encodes it as padded URL-safe base64.
pub fn encode<T: Serialize>(value: &T) -> Result<String, IdentityError> {
    let json =
        serde_json::to_vec(value).map_err(|err| IdentityError::EncodeError(err.to_string()))?;
    Ok(BASE64URL.encode(&json))
}

/// Inverse of [`encode`].
///
/// # Errors
///
/// Returns [`IdentityError::DecodeError`] if the input is empty, is not
/// canonical padded URL-safe base64, or does not deserialize into `T`.
pub fn decode<T: DeserializeOwned>(encoded: &str) -> Result<T, IdentityError> {
    if encoded.is_empty() {
        return Err(IdentityError::DecodeError("empty input".to_string()));
    }

    let json = BASE64URL.decode(encoded.as_bytes())?;

    serde_json::from_slice(&json).map_err(|err| IdentityError::DecodeError(err.to_string()))
}
