//! Grid Network Protocol
//!
//! Endpoint suffixes and DTOs for internode state traffic. Every replicated
//! structure mounts these under its own base path (e.g. `/grid/metadata`), so
//! one node can host several stores side by side.
//!
//! Mutating requests carry an `op_id` so a backup or primary that sees the same
//! operation twice (HTTP retry) applies it only once.

use serde::{Deserialize, Serialize};

// --- Endpoint suffixes (appended to a store's base path) ---

/// Primary -> backup synchronization of a write.
pub const ENDPOINT_REPLICATE: &str = "/replicate";
/// Non-owner -> primary forwarding of a write.
pub const ENDPOINT_FORWARD_PUT: &str = "/forward_put";
/// Non-owner -> primary forwarding of a delete.
pub const ENDPOINT_FORWARD_REMOVE: &str = "/forward_remove";
/// Primary -> backup synchronization of a delete.
pub const ENDPOINT_REPLICATE_REMOVE: &str = "/replicate_remove";
/// Direct local lookup, bypassing routing.
pub const ENDPOINT_INTERNAL_GET: &str = "/internal_get";
/// Set: non-owner -> primary add-if-absent.
pub const ENDPOINT_SET_ADD: &str = "/add";
/// Set: non-owner -> primary removal.
pub const ENDPOINT_SET_REMOVE: &str = "/remove";
/// Set: primary -> backup add synchronization.
pub const ENDPOINT_SET_REPLICATE_ADD: &str = "/replicate_add";
/// Set: primary -> backup removal synchronization.
pub const ENDPOINT_SET_REPLICATE_REMOVE: &str = "/replicate_remove";

/// Lock service endpoints (absolute, a node hosts exactly one lock table).
pub const ENDPOINT_LOCK_ACQUIRE: &str = "/internal/lock/acquire";
pub const ENDPOINT_LOCK_RELEASE: &str = "/internal/lock/release";

// --- Map DTOs ---

#[derive(Debug, Serialize, Deserialize)]
pub struct ForwardPutRequest {
    pub partition: u32,
    pub op_id: String,
    pub key: String,
    /// The value serialized as a JSON string, so the wire format stays uniform
    /// across value types.
    pub value_json: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReplicateRequest {
    pub partition: u32,
    pub op_id: String,
    pub key: String,
    pub value_json: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RemoveRequest {
    pub partition: u32,
    pub op_id: String,
    pub key: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GetResponse {
    /// `None` means the key does not exist on the queried node.
    pub value_json: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AckResponse {
    pub success: bool,
}

// --- Set DTOs ---

#[derive(Debug, Serialize, Deserialize)]
pub struct SetAddRequest {
    pub key: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SetAddResponse {
    /// True iff this operation inserted the value.
    pub inserted: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SetRemoveRequest {
    pub key: String,
}

// --- Lock DTOs ---

#[derive(Debug, Serialize, Deserialize)]
pub struct LockAcquireRequest {
    pub name: String,
    pub ttl_ms: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LockAcquireResponse {
    pub granted: bool,
    /// Fencing token for the granted lease; required on release.
    pub token: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LockReleaseRequest {
    pub name: String,
    pub token: String,
}
