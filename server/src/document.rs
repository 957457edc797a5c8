//! Document addressing.

use crate::error::{AppError, Result};
use rollcall_engine::StoreKey;
use std::fmt;

const MAX_SEGMENT_LEN: usize = 128;

/// Address of one document: `(collection, key)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentId {
    pub collection: String,
    pub key: String,
}

impl DocumentId {
    /// Validate a collection/key pair taken from a request.
    ///
    /// Keys that Rollcall clients keep on the device only are refused, so a
    /// misbehaving client cannot replicate a login session.
    pub fn parse(collection: &str, key: &str) -> Result<Self> {
        validate_segment("collection", collection)?;
        validate_segment("key", key)?;
        if StoreKey::parse(key).is_some_and(|k| !k.is_replicated()) {
            return Err(AppError::BadRequest(format!(
                "key {} is local-only and cannot be stored",
                key
            )));
        }
        Ok(Self {
            collection: collection.to_string(),
            key: key.to_string(),
        })
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.key)
    }
}

fn validate_segment(what: &str, value: &str) -> Result<()> {
    if value.is_empty() || value.len() > MAX_SEGMENT_LEN {
        return Err(AppError::BadRequest(format!(
            "{} must be 1 to {} characters",
            what, MAX_SEGMENT_LEN
        )));
    }
    if !value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
    {
        return Err(AppError::BadRequest(format!(
            "{} contains invalid characters: {:?}",
            what, value
        )));
    }
    Ok(())
}
