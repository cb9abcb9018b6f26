//! The per-channel dispatcher contract
//!
//! Every adaptor decodes its channel's batch envelope, routes each decoded
//! event through `RevisionWriter::write_event`, and reports failure the way
//! its channel expects: a per-item failure list, a batch-level raise at the
//! end, or an immediate raise. Decoded-but-non-struct payloads are logged
//! and skipped on every channel.

use async_trait::async_trait;

use crate::error::DispatchResult;

/// A delivery-channel adaptor.
#[async_trait]
pub trait ChannelDispatcher: Send + Sync {
    /// The channel's batch envelope.
    type Batch: Send;
    /// What the channel expects back (per-item failures, or nothing).
    type Response: Send;

    /// Process one batch according to the channel's retry contract.
    async fn dispatch(&self, batch: Self::Batch) -> DispatchResult<Self::Response>;
}
