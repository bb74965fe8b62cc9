use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Source channel handle (`@username` or a numeric `-100...` id as text).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(pub String);

/// Destination group handle.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(pub String);

/// Telegram message id (monotonic per channel).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub i64);

/// Immutable channel post as seen by the engine.
///
/// Produced by the transport on fetch/listen, consumed once per cycle, never
/// mutated. Only `has_media == false` posts are eligible for forwarding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Post {
    pub id: MessageId,
    pub timestamp: DateTime<Utc>,
    pub body: String,
    pub has_media: bool,
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::fmt::Display for GroupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}
