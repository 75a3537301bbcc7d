//! User-data fingerprinting and base64 normalization
//!
//! User-data may be supplied raw or base64 encoded. Both representations of
//! the same content must fingerprint identically, so the hash is always taken
//! over the decoded bytes when the input decodes as standard base64. Decoded
//! content is bytes: base64 of gzip-compressed user-data is common and never
//! valid UTF-8.
//!
//! Sniffing is ambiguous: a raw string that happens to be valid base64 of
//! something else is decoded too. Callers that know the encoding should use
//! the tagged [`UserDataInput::Raw`] or [`UserDataInput::Base64`] variants.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use sha1::{Digest, Sha1};

use crate::CidataError;

/// SHA-1 of `bytes` as lowercase hex
pub fn fingerprint_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Fingerprint user-data, hashing the decoded bytes when it is valid base64
pub fn hash(user_data: &str) -> String {
    fingerprint_bytes(&decode(user_data))
}

/// Decode user-data from base64 if it validates, otherwise pass it through
pub fn decode(user_data: &str) -> Vec<u8> {
    STANDARD
        .decode(user_data)
        .unwrap_or_else(|_| user_data.as_bytes().to_vec())
}

/// User-data as supplied at the boundary, optionally tagged with its encoding
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "UserDataRepr")]
pub enum UserDataInput {
    /// Content to be used verbatim, never decoded
    Raw(String),
    /// Content known to be base64 encoded
    Base64(String),
    /// Untagged content, decoded only if it looks like base64
    Sniff(String),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum UserDataRepr {
    Plain(String),
    Tagged(TaggedUserData),
}

#[derive(Deserialize)]
#[serde(rename_all = "lowercase")]
enum TaggedUserData {
    Raw(String),
    Base64(String),
}

impl From<UserDataRepr> for UserDataInput {
    fn from(repr: UserDataRepr) -> Self {
        match repr {
            UserDataRepr::Plain(s) => Self::Sniff(s),
            UserDataRepr::Tagged(TaggedUserData::Raw(s)) => Self::Raw(s),
            UserDataRepr::Tagged(TaggedUserData::Base64(s)) => Self::Base64(s),
        }
    }
}

impl Default for UserDataInput {
    fn default() -> Self {
        Self::Sniff(String::new())
    }
}

impl UserDataInput {
    /// The content exactly as supplied
    pub fn as_supplied(&self) -> &str {
        match self {
            Self::Raw(s) | Self::Base64(s) | Self::Sniff(s) => s,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.as_supplied().is_empty()
    }

    /// Resolve to the bytes that get written into the image
    pub fn normalize(&self) -> Result<Vec<u8>, CidataError> {
        match self {
            Self::Raw(s) => Ok(s.as_bytes().to_vec()),
            Self::Sniff(s) => Ok(decode(s)),
            Self::Base64(s) => STANDARD.decode(s).map_err(|e| {
                CidataError::InvalidData(format!("user-data is not valid base64: {}", e))
            }),
        }
    }

    /// Encoding-insensitive fingerprint of the content
    ///
    /// Equals [`fingerprint_bytes`] of the normalized content, so a stored
    /// image fingerprints the same as the inputs that produced it.
    pub fn fingerprint(&self) -> String {
        match self {
            Self::Raw(s) => fingerprint_bytes(s.as_bytes()),
            Self::Sniff(s) => hash(s),
            Self::Base64(s) => match STANDARD.decode(s) {
                Ok(decoded) => fingerprint_bytes(&decoded),
                Err(_) => fingerprint_bytes(s.as_bytes()),
            },
        }
    }
}
