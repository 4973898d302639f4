//! Wire encoding of a [`Terms`] mapping.
//!
//! Records are stored as a flat JSON object of replica to term, e.g.
//! `{"core_node1":3,"core_node2":3}`. Keys are emitted in sorted order so
//! equal mappings always encode to identical bytes. An empty payload decodes
//! to an empty mapping, matching a record created without data.

use super::Terms;
use crate::Result;
use crate::shard::ShardTermsError;

/// Encodes `terms` for storage.
pub fn encode(terms: &Terms) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(terms)?)
}

/// Decodes a stored record read from `path`.
pub fn decode(path: &str, bytes: &[u8]) -> Result<Terms> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Terms::new());
    }
    serde_json::from_slice(bytes).map_err(|e| {
        ShardTermsError::CorruptRecord {
            path: path.to_string(),
            reason: e.to_string(),
        }
        .into()
    })
}
