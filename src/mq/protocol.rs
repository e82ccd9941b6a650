//! Internode protocol of the message queue.

use super::types::{MessageEntry, MessageId};
use serde::{Deserialize, Serialize};

/// Non-owner -> primary publish forwarding.
pub const ENDPOINT_MQ_FORWARD: &str = "/mq/forward_publish";
/// Primary -> backup message synchronization.
pub const ENDPOINT_MQ_REPLICATE: &str = "/mq/replicate";

#[derive(Debug, Serialize, Deserialize)]
pub struct ForwardPublishRequest {
    pub partition: u32,
    pub message_id: MessageId,
    pub entry: MessageEntry,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReplicateMessageRequest {
    pub partition: u32,
    pub message_id: MessageId,
    pub entry: MessageEntry,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PublishResponse {
    pub message_id: MessageId,
}
