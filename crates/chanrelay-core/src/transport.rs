use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    domain::{ChannelId, GroupId, MessageId, Post},
    Result,
};

/// Capabilities of a transport implementation.
#[derive(Clone, Copy, Debug)]
pub struct TransportCapabilities {
    /// Whether one call can target the full destination set. Without it,
    /// batch order degrades to one-by-one in the scheduler.
    pub supports_batch_send: bool,
}

/// Lower bound for a history fetch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FetchBound {
    /// Posts with `id > bound`, ascending.
    AfterId(MessageId),
    /// Posts with `timestamp >= bound`, ascending.
    Since(DateTime<Utc>),
    /// Only the newest post, if any. Used to seed a missing watermark.
    Head,
}

/// Port to the messaging backend.
///
/// Telegram is the first implementation; all network I/O of the engine flows
/// through this trait, so tests drive the engine with in-memory fakes.
#[async_trait]
pub trait Transport: Send + Sync {
    fn capabilities(&self) -> TransportCapabilities;

    /// Fetch posts from `channel` above `bound`, ascending by id.
    async fn fetch_messages(&self, channel: &ChannelId, bound: FetchBound) -> Result<Vec<Post>>;

    async fn send_text(&self, dest: &GroupId, body: &str) -> Result<()>;

    /// One call covering all destinations, with per-destination outcomes.
    /// Only called when `supports_batch_send` is true.
    async fn send_text_batch(
        &self,
        dests: &[GroupId],
        body: &str,
    ) -> Result<Vec<(GroupId, Result<()>)>>;
}
