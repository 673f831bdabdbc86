//! Self-describing ciphertext blobs
//!
//! Layout: `[key id length: u8][key id: ASCII][token ciphertext]`. The token
//! ciphertext must be at least one byte long.

use crate::error::{KeyError, KeyResult};
use crate::key_id::is_valid_key_id;

/// Smallest decodable blob: length byte, one key id byte, one payload byte
pub const MIN_BLOB_LEN: usize = 3;

/// Prefix `payload` with the key id header
pub fn encode(key_id: &str, payload: &[u8]) -> KeyResult<Vec<u8>> {
    let key_id_len = u8::try_from(key_id.len()).map_err(|_| {
        KeyError::Invariant(format!(
            "key id of {} bytes does not fit the ciphertext header",
            key_id.len()
        ))
    })?;

    let mut blob = Vec::with_capacity(1 + key_id.len() + payload.len());
    blob.push(key_id_len);
    blob.extend_from_slice(key_id.as_bytes());
    blob.extend_from_slice(payload);
    Ok(blob)
}

/// Split a blob into its key id and token ciphertext
pub fn decode(blob: &[u8]) -> KeyResult<(&str, &[u8])> {
    if blob.len() < MIN_BLOB_LEN {
        return Err(KeyError::InvalidCiphertext("blob is too short"));
    }

    let key_id_len = usize::from(blob[0]);
    let header_len = 1 + key_id_len;
    match blob.len().checked_sub(header_len) {
        Some(payload_len) if payload_len >= 1 => {}
        _ => return Err(KeyError::InvalidCiphertext("blob has no payload after the key id")),
    }

    let key_id = std::str::from_utf8(&blob[1..header_len])
        .ok()
        .filter(|key_id| is_valid_key_id(key_id))
        .ok_or(KeyError::InvalidCiphertext("blob carries a malformed key id"))?;

    Ok((key_id, &blob[header_len..]))
}
