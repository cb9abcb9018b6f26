//! Point-to-point queue adaptor
//!
//! One event per record. The body is either a bare textual payload or a
//! topic-notification envelope bearing `TopicArn`/`Message`, in which case
//! the inner message is the payload. Failures are reported per item so the
//! channel redelivers only what did not apply.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use ledgerload_core::RevisionWriter;

use crate::channel::ChannelDispatcher;
use crate::error::DispatchResult;
use crate::outcome::{apply_event, BatchResponse};
use crate::payload;

/// One queue record as delivered by the host runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueRecord {
    pub message_id: String,
    pub body: String,
}

/// Envelope wrapped around the payload when the queue is subscribed to a
/// pub/sub topic.
#[derive(Debug, Deserialize)]
struct WrappedEnvelope {
    #[serde(rename = "TopicArn")]
    topic_arn: Option<String>,
    #[serde(rename = "Message")]
    message: Option<String>,
}

/// Queue adaptor with per-item failure reporting.
pub struct QueueDispatcher {
    writer: Arc<RevisionWriter>,
}

impl QueueDispatcher {
    pub fn new(writer: Arc<RevisionWriter>) -> Self {
        QueueDispatcher { writer }
    }

    /// Unwrap a topic-notification envelope when the body carries one;
    /// anything else means the body is the payload itself.
    fn unwrap_envelope(body: &str) -> Option<String> {
        let envelope: WrappedEnvelope = serde_json::from_str(body).ok()?;
        match (envelope.topic_arn, envelope.message) {
            (Some(_), Some(message)) => Some(message),
            _ => None,
        }
    }
}

#[async_trait]
impl ChannelDispatcher for QueueDispatcher {
    type Batch = Vec<QueueRecord>;
    type Response = BatchResponse;

    async fn dispatch(&self, batch: Self::Batch) -> DispatchResult<Self::Response> {
        let mut response = BatchResponse::default();

        for record in &batch {
            let unwrapped = Self::unwrap_envelope(&record.body);
            let text = unwrapped.as_deref().unwrap_or(&record.body);

            match payload::event_from_text(&record.message_id, text) {
                Ok(Some(event)) => {
                    let outcome = apply_event(&self.writer, &event, &record.message_id).await;
                    if outcome.is_failed() {
                        response.record_failure(&record.message_id);
                    }
                }
                Ok(None) => {} // logged and skipped
                Err(_) => response.record_failure(&record.message_id),
            }
        }

        Ok(response)
    }
}
