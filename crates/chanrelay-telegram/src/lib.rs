//! Telegram adapter (teloxide).
//!
//! Implements the `chanrelay-core` Transport port over the Bot API. The Bot
//! API has no channel-history endpoint, so catch-up fetches are served from a
//! bounded in-memory spool of channel posts observed via updates; the bot must
//! therefore be a member of the source channel.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use teloxide::{prelude::*, types::Recipient};
use tokio::time::sleep;

pub mod commands;
pub mod router;

use chanrelay_core::{
    domain::{ChannelId, GroupId, Post},
    errors::Error,
    transport::{FetchBound, Transport, TransportCapabilities},
    Result,
};

const SPOOL_CAPACITY: usize = 1024;

/// Bounded log of channel posts observed via updates, newest last.
///
/// Backs `fetch_messages` for catch-up cycles. Posts older than the spool
/// horizon are gone; the watermark keeps incremental mode correct regardless.
#[derive(Default)]
pub struct PostSpool {
    posts: Mutex<VecDeque<Post>>,
}

impl PostSpool {
    pub fn insert(&self, post: Post) {
        let mut posts = self.posts.lock().unwrap_or_else(|p| p.into_inner());
        // Updates can replay; keep ids unique and ascending.
        if posts.iter().any(|p| p.id == post.id) {
            return;
        }
        posts.push_back(post);
        posts.make_contiguous().sort_by_key(|p| p.id);
        while posts.len() > SPOOL_CAPACITY {
            posts.pop_front();
        }
    }

    fn select(&self, bound: FetchBound) -> Vec<Post> {
        let posts = self.posts.lock().unwrap_or_else(|p| p.into_inner());
        match bound {
            FetchBound::AfterId(id) => posts.iter().filter(|p| p.id > id).cloned().collect(),
            FetchBound::Since(ts) => posts.iter().filter(|p| p.timestamp >= ts).cloned().collect(),
            FetchBound::Head => posts.back().cloned().into_iter().collect(),
        }
    }
}

pub struct TelegramTransport {
    bot: Bot,
    spool: std::sync::Arc<PostSpool>,
}

impl TelegramTransport {
    pub fn new(bot: Bot, spool: std::sync::Arc<PostSpool>) -> Self {
        Self { bot, spool }
    }

    fn recipient(group: &GroupId) -> Result<Recipient> {
        let raw = group.0.trim();
        if let Some(name) = raw.strip_prefix('@') {
            if name.is_empty() {
                return Err(Error::Transport("empty group username".to_string()));
            }
            return Ok(Recipient::ChannelUsername(raw.to_string()));
        }
        raw.parse::<i64>()
            .map(|id| Recipient::Id(teloxide::types::ChatId(id)))
            .map_err(|_| Error::Transport(format!("unusable destination handle: {raw}")))
    }

    fn map_err(e: teloxide::RequestError) -> Error {
        Error::Transport(format!("telegram error: {e}"))
    }

    async fn with_retry<T, Fut>(&self, mut op: impl FnMut() -> Fut) -> Result<T>
    where
        Fut: std::future::IntoFuture<Output = std::result::Result<T, teloxide::RequestError>>,
        Fut::IntoFuture: Send,
    {
        const MAX_RETRIES: usize = 1;
        let mut attempts = 0usize;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) => match e {
                    teloxide::RequestError::RetryAfter(d) if attempts < MAX_RETRIES => {
                        attempts += 1;
                        sleep(d).await;
                        continue;
                    }
                    other => return Err(Self::map_err(other)),
                },
            }
        }
    }
}

#[async_trait]
impl Transport for TelegramTransport {
    fn capabilities(&self) -> TransportCapabilities {
        // The Bot API has no multi-target send; batch order degrades in the
        // delivery scheduler.
        TransportCapabilities {
            supports_batch_send: false,
        }
    }

    async fn fetch_messages(&self, _channel: &ChannelId, bound: FetchBound) -> Result<Vec<Post>> {
        Ok(self.spool.select(bound))
    }

    async fn send_text(&self, dest: &GroupId, body: &str) -> Result<()> {
        let recipient = Self::recipient(dest)?;
        self.with_retry(|| self.bot.send_message(recipient.clone(), body.to_string()))
            .await?;
        Ok(())
    }

    async fn send_text_batch(
        &self,
        _dests: &[GroupId],
        _body: &str,
    ) -> Result<Vec<(GroupId, Result<()>)>> {
        Err(Error::Transport(
            "batch send is not supported by the Bot API".to_string(),
        ))
    }
}

/// Convert a teloxide channel post into the engine's post model.
pub fn post_from_message(msg: &Message) -> Post {
    let (body, has_media) = match msg.text() {
        Some(t) => (t.to_string(), false),
        None => (msg.caption().unwrap_or_default().to_string(), true),
    };
    Post {
        id: chanrelay_core::domain::MessageId(i64::from(msg.id.0)),
        timestamp: msg.date,
        body,
        has_media,
    }
}

/// Whether `msg` comes from the configured source channel (by `@username`,
/// case-insensitive, or by numeric id).
pub fn is_from_source(msg: &Message, source: &ChannelId) -> bool {
    let raw = source.0.trim();
    if let Some(name) = raw.strip_prefix('@') {
        return msg
            .chat
            .username()
            .is_some_and(|u| u.eq_ignore_ascii_case(name));
    }
    raw.parse::<i64>().is_ok_and(|id| msg.chat.id.0 == id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chanrelay_core::domain::MessageId;
    use chrono::Utc;

    fn post(id: i64) -> Post {
        Post {
            id: MessageId(id),
            timestamp: Utc::now(),
            body: format!("post {id}"),
            has_media: false,
        }
    }

    #[test]
    fn spool_keeps_ids_unique_and_ascending() {
        let spool = PostSpool::default();
        spool.insert(post(3));
        spool.insert(post(1));
        spool.insert(post(2));
        spool.insert(post(2)); // replayed update

        let out = spool.select(FetchBound::AfterId(MessageId(0)));
        assert_eq!(out.iter().map(|p| p.id.0).collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn spool_head_is_the_newest_post() {
        let spool = PostSpool::default();
        spool.insert(post(5));
        spool.insert(post(9));

        let out = spool.select(FetchBound::Head);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id, MessageId(9));
    }

    #[test]
    fn spool_evicts_oldest_past_capacity() {
        let spool = PostSpool::default();
        for id in 0..(SPOOL_CAPACITY as i64 + 10) {
            spool.insert(post(id));
        }
        let out = spool.select(FetchBound::AfterId(MessageId(-1)));
        assert_eq!(out.len(), SPOOL_CAPACITY);
        assert_eq!(out[0].id, MessageId(10));
    }

    #[test]
    fn recipient_accepts_usernames_and_numeric_ids() {
        assert!(matches!(
            TelegramTransport::recipient(&GroupId("@mygroup".to_string())),
            Ok(Recipient::ChannelUsername(_))
        ));
        assert!(matches!(
            TelegramTransport::recipient(&GroupId("-1001234".to_string())),
            Ok(Recipient::Id(_))
        ));
        assert!(TelegramTransport::recipient(&GroupId("nope".to_string())).is_err());
        assert!(TelegramTransport::recipient(&GroupId("@".to_string())).is_err());
    }
}
