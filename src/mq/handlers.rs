use super::protocol::{ForwardPublishRequest, PublishResponse, ReplicateMessageRequest};
use super::queue::MessageQueue;

use axum::{Extension, Json, http::StatusCode};
use std::sync::Arc;

pub async fn handle_forward_publish(
    Extension(queue): Extension<Arc<MessageQueue>>,
    Json(req): Json<ForwardPublishRequest>,
) -> (StatusCode, Json<PublishResponse>) {
    let message_id = req.message_id.clone();

    if let Err(e) = queue
        .store_as_primary(req.partition, req.message_id, req.entry)
        .await
    {
        tracing::error!("Failed to store forwarded message: {}", e);
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(PublishResponse { message_id }),
        );
    }

    (StatusCode::OK, Json(PublishResponse { message_id }))
}

pub async fn handle_replicate_message(
    Extension(queue): Extension<Arc<MessageQueue>>,
    Json(req): Json<ReplicateMessageRequest>,
) -> StatusCode {
    queue.store_local(req.partition, req.message_id, req.entry);
    StatusCode::OK
}
