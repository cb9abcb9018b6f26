//! Ledgerload Dispatch: delivery-channel adaptors
//!
//! One adaptor per delivery channel, all sharing the same internal
//! contract: decode the channel's batch envelope into canonical load
//! events, route each through the writer, and aggregate per-item results
//! according to the channel's retry model.
//!
//! ## Channels
//!
//! - `QueueDispatcher`: point-to-point queue, per-item failure reporting
//! - `TopicDispatcher`: pub/sub topic, raise after exhausting the batch
//! - `BusDispatcher`: event bus, single record, raise on any fail
//! - `StreamDispatcher`: partitioned log carrying canonical events
//! - `LedgerStreamDispatcher`: partitioned log carrying committed
//!   revisions, with client-side aggregation
//! - `CdcDispatcher`: partitioned log carrying change-data-capture
//!   records, translated through a mapper

pub mod bus;
pub mod cdc;
pub mod channel;
pub mod error;
pub mod ledger_stream;
pub mod outcome;
mod payload;
pub mod queue;
pub mod stream;
pub mod topic;

pub use bus::{BusDispatcher, BusEnvelope};
pub use cdc::CdcDispatcher;
pub use channel::ChannelDispatcher;
pub use error::{DispatchError, DispatchResult};
pub use ledger_stream::LedgerStreamDispatcher;
pub use outcome::{apply_event, BatchItemFailure, BatchResponse, ItemOutcome};
pub use queue::{QueueDispatcher, QueueRecord};
pub use stream::{StreamDispatcher, StreamRecord};
pub use topic::{TopicDispatcher, TopicRecord};
