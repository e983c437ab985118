//! ID generation for chores, documents and queued operations.

use chrono::{DateTime, Utc};
use rand::Rng;
use sha2::{Digest, Sha256};

/// Prefix for queued operation ids.
pub const OPERATION_PREFIX: &str = "op";

/// Prefix for chores created on the device before the remote assigns an id.
pub const LOCAL_CHORE_PREFIX: &str = "local";

/// Prefix for documents created by the hub.
pub const DOCUMENT_PREFIX: &str = "ch";

/// True for ids minted on the device for chores not yet created remotely.
pub fn is_local_id(id: &str) -> bool {
    id.strip_prefix(LOCAL_CHORE_PREFIX).is_some_and(|rest| rest.starts_with('-'))
}

/// Generate a unique ID from content + entropy.
/// Format: prefix + "-" + 10 hex chars of SHA256(seed + timestamp + random)
pub fn generate_id(prefix: &str, seed: &str, created_at: DateTime<Utc>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(seed.as_bytes());
    hasher.update(created_at.timestamp_nanos_opt().unwrap_or(0).to_le_bytes());
    // Add 8 bytes of randomness to prevent collisions
    hasher.update(rand::rng().random::<[u8; 8]>());
    let hash = hasher.finalize();
    format!(
        "{}-{:010x}",
        prefix,
        u64::from_be_bytes([hash[0], hash[1], hash[2], hash[3], hash[4], 0, 0, 0]) >> 24
    )
}
