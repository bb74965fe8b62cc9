//! Candidate selection: which posts a cycle forwards.
//!
//! Window-based mode re-derives "everything since local midnight" each cycle;
//! watermark-based mode takes everything past the persisted watermark. Both
//! drop media posts and yield ascending ids. Nothing is cached across cycles
//! beyond the watermark itself.

use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::{
    domain::{MessageId, Post},
    state::{ForwardConfig, SelectionMode},
    transport::{FetchBound, Transport},
    Result,
};

/// Local midnight for the current day in `tz`, as a UTC instant.
pub fn start_of_today(tz: Tz, now: DateTime<Utc>) -> DateTime<Utc> {
    let local_day = now.with_timezone(&tz).date_naive();
    let midnight = local_day.and_hms_opt(0, 0, 0).expect("00:00:00 is valid");
    tz.from_local_datetime(&midnight)
        .earliest()
        // A DST gap at midnight: fall back to the UTC reading of the same wall time.
        .unwrap_or_else(|| Utc.from_utc_datetime(&midnight).with_timezone(&tz))
        .with_timezone(&Utc)
}

/// Filter shared by the pull scan and the live "batch of one" path.
pub fn is_eligible(post: &Post, watermark: Option<MessageId>) -> bool {
    if post.has_media {
        return false;
    }
    match watermark {
        Some(w) => post.id > w,
        None => true,
    }
}

/// Produce the ordered eligible posts for one cycle.
///
/// In watermark mode a missing watermark selects nothing: the engine seeds it
/// from the source head first, so a lost state file never re-floods history.
pub async fn select_candidates(
    transport: &dyn Transport,
    config: &ForwardConfig,
    watermark: Option<MessageId>,
    now: DateTime<Utc>,
) -> Result<Vec<Post>> {
    let mut posts = match config.mode {
        SelectionMode::WindowBased => {
            let since = start_of_today(config.timezone, now);
            let fetched = transport
                .fetch_messages(&config.source_channel, FetchBound::Since(since))
                .await?;
            fetched
                .into_iter()
                .filter(|p| p.timestamp >= since && p.timestamp <= now && !p.has_media)
                .collect::<Vec<_>>()
        }
        SelectionMode::WatermarkBased => {
            let Some(w) = watermark else {
                return Ok(Vec::new());
            };
            let fetched = transport
                .fetch_messages(&config.source_channel, FetchBound::AfterId(w))
                .await?;
            fetched
                .into_iter()
                .filter(|p| is_eligible(p, Some(w)))
                .collect::<Vec<_>>()
        }
    };

    posts.sort_by_key(|p| p.id);
    Ok(posts)
}
