//! Axum handlers for the internode grid endpoints.
//!
//! The map/set handlers are generic; `main.rs` mounts concrete wrappers per
//! store instance under that store's base path.

use axum::{
    Json,
    extract::{Extension, Path},
    http::StatusCode,
};
use serde::{Serialize, de::DeserializeOwned};
use std::hash::Hash;
use std::str::FromStr;
use std::sync::Arc;

use super::lock::LeaseLockService;
use super::partitioner::partition_of;
use super::protocol::*;
use super::replicated::{ReplicatedMap, ReplicatedSet};

pub async fn handle_forward_put<K, V>(
    Extension(map): Extension<Arc<ReplicatedMap<K, V>>>,
    Json(req): Json<ForwardPutRequest>,
) -> (StatusCode, Json<AckResponse>)
where
    K: ToString + FromStr + Clone + Hash + Eq + Send + Sync + 'static,
    <K as FromStr>::Err: std::fmt::Display,
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    let Ok(key) = req.key.parse::<K>() else {
        return (StatusCode::BAD_REQUEST, Json(AckResponse { success: false }));
    };
    let value: V = match serde_json::from_str(&req.value_json) {
        Ok(v) => v,
        Err(e) => {
            tracing::error!("Failed to deserialize forwarded value: {}", e);
            return (StatusCode::BAD_REQUEST, Json(AckResponse { success: false }));
        }
    };

    match map.store_as_primary(req.partition, req.op_id, key, value).await {
        Ok(_) => (StatusCode::OK, Json(AckResponse { success: true })),
        Err(e) => {
            tracing::error!("Forwarded put failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(AckResponse { success: false }),
            )
        }
    }
}

pub async fn handle_replicate<K, V>(
    Extension(map): Extension<Arc<ReplicatedMap<K, V>>>,
    Json(req): Json<ReplicateRequest>,
) -> (StatusCode, Json<AckResponse>)
where
    K: ToString + FromStr + Clone + Hash + Eq + Send + Sync + 'static,
    <K as FromStr>::Err: std::fmt::Display,
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    let Ok(key) = req.key.parse::<K>() else {
        return (StatusCode::BAD_REQUEST, Json(AckResponse { success: false }));
    };
    let value: V = match serde_json::from_str(&req.value_json) {
        Ok(v) => v,
        Err(e) => {
            tracing::error!("Failed to deserialize replica value: {}", e);
            return (StatusCode::BAD_REQUEST, Json(AckResponse { success: false }));
        }
    };

    map.store_replica(req.partition, req.op_id, key, value);
    (StatusCode::OK, Json(AckResponse { success: true }))
}

pub async fn handle_internal_get<K, V>(
    Extension(map): Extension<Arc<ReplicatedMap<K, V>>>,
    Path(key_str): Path<String>,
) -> (StatusCode, Json<GetResponse>)
where
    K: ToString + FromStr + Clone + Hash + Eq + Send + Sync + 'static,
    <K as FromStr>::Err: std::fmt::Display,
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    let Ok(key) = key_str.parse::<K>() else {
        return (StatusCode::BAD_REQUEST, Json(GetResponse { value_json: None }));
    };

    match map.get_local(&key) {
        Some(value) => match serde_json::to_string(&value) {
            Ok(value_json) => (
                StatusCode::OK,
                Json(GetResponse {
                    value_json: Some(value_json),
                }),
            ),
            Err(e) => {
                tracing::error!("Failed to serialize value: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(GetResponse { value_json: None }),
                )
            }
        },
        None => (StatusCode::NOT_FOUND, Json(GetResponse { value_json: None })),
    }
}

pub async fn handle_forward_remove<K, V>(
    Extension(map): Extension<Arc<ReplicatedMap<K, V>>>,
    Json(req): Json<RemoveRequest>,
) -> (StatusCode, Json<AckResponse>)
where
    K: ToString + FromStr + Clone + Hash + Eq + Send + Sync + 'static,
    <K as FromStr>::Err: std::fmt::Display,
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    let Ok(key) = req.key.parse::<K>() else {
        return (StatusCode::BAD_REQUEST, Json(AckResponse { success: false }));
    };

    match map.remove_as_primary(req.partition, req.op_id, &key).await {
        Ok(_) => (StatusCode::OK, Json(AckResponse { success: true })),
        Err(e) => {
            tracing::error!("Forwarded remove failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(AckResponse { success: false }),
            )
        }
    }
}

pub async fn handle_replicate_remove<K, V>(
    Extension(map): Extension<Arc<ReplicatedMap<K, V>>>,
    Json(req): Json<RemoveRequest>,
) -> (StatusCode, Json<AckResponse>)
where
    K: ToString + FromStr + Clone + Hash + Eq + Send + Sync + 'static,
    <K as FromStr>::Err: std::fmt::Display,
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    let Ok(key) = req.key.parse::<K>() else {
        return (StatusCode::BAD_REQUEST, Json(AckResponse { success: false }));
    };

    map.remove_replica(req.partition, req.op_id, &key);
    (StatusCode::OK, Json(AckResponse { success: true }))
}

// --- Set endpoints ---

pub async fn handle_set_add<K>(
    Extension(set): Extension<Arc<ReplicatedSet<K>>>,
    Json(req): Json<SetAddRequest>,
) -> (StatusCode, Json<SetAddResponse>)
where
    K: ToString + FromStr + Clone + Hash + Eq + Send + Sync + 'static,
    <K as FromStr>::Err: std::fmt::Display,
{
    let Ok(key) = req.key.parse::<K>() else {
        return (StatusCode::BAD_REQUEST, Json(SetAddResponse { inserted: false }));
    };
    // The primary recomputes the partition from the key itself, so a stale
    // sender view cannot misplace an entry.
    let partition = partition_of(&key.to_string());

    match set.add_as_primary(partition, key).await {
        Ok(inserted) => (StatusCode::OK, Json(SetAddResponse { inserted })),
        Err(e) => {
            tracing::error!("Set add failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(SetAddResponse { inserted: false }),
            )
        }
    }
}

pub async fn handle_set_remove<K>(
    Extension(set): Extension<Arc<ReplicatedSet<K>>>,
    Json(req): Json<SetRemoveRequest>,
) -> StatusCode
where
    K: ToString + FromStr + Clone + Hash + Eq + Send + Sync + 'static,
    <K as FromStr>::Err: std::fmt::Display,
{
    let Ok(key) = req.key.parse::<K>() else {
        return StatusCode::BAD_REQUEST;
    };
    let partition = partition_of(&key.to_string());

    match set.remove_as_primary(partition, &key).await {
        Ok(_) => StatusCode::OK,
        Err(e) => {
            tracing::error!("Set remove failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

pub async fn handle_set_replicate_add<K>(
    Extension(set): Extension<Arc<ReplicatedSet<K>>>,
    Json(req): Json<SetAddRequest>,
) -> StatusCode
where
    K: ToString + FromStr + Clone + Hash + Eq + Send + Sync + 'static,
    <K as FromStr>::Err: std::fmt::Display,
{
    let Ok(key) = req.key.parse::<K>() else {
        return StatusCode::BAD_REQUEST;
    };
    let partition = partition_of(&key.to_string());
    set.apply_replica_add(partition, key);
    StatusCode::OK
}

pub async fn handle_set_replicate_remove<K>(
    Extension(set): Extension<Arc<ReplicatedSet<K>>>,
    Json(req): Json<SetRemoveRequest>,
) -> StatusCode
where
    K: ToString + FromStr + Clone + Hash + Eq + Send + Sync + 'static,
    <K as FromStr>::Err: std::fmt::Display,
{
    let Ok(key) = req.key.parse::<K>() else {
        return StatusCode::BAD_REQUEST;
    };
    let partition = partition_of(&key.to_string());
    set.apply_replica_remove(partition, &key);
    StatusCode::OK
}

// --- Lock endpoints ---

pub async fn handle_lock_acquire(
    Extension(locks): Extension<Arc<LeaseLockService>>,
    Json(req): Json<LockAcquireRequest>,
) -> (StatusCode, Json<LockAcquireResponse>) {
    match locks.try_acquire_local(&req.name) {
        Some(token) => (
            StatusCode::OK,
            Json(LockAcquireResponse {
                granted: true,
                token: Some(token.0),
            }),
        ),
        None => (
            StatusCode::OK,
            Json(LockAcquireResponse {
                granted: false,
                token: None,
            }),
        ),
    }
}

pub async fn handle_lock_release(
    Extension(locks): Extension<Arc<LeaseLockService>>,
    Json(req): Json<LockReleaseRequest>,
) -> StatusCode {
    if locks.release_local(&req.name, &req.token) {
        StatusCode::OK
    } else {
        tracing::warn!("Release of {} with unknown or stale token", req.name);
        StatusCode::OK
    }
}
