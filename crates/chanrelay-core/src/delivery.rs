//! Delivery scheduling: round-robin fan-out with inter-post pacing.
//!
//! One-by-one order sends each post to every destination in configured order,
//! then sleeps the pacing interval before the next post (no trailing sleep).
//! Batch order requests one multi-target call per post and degrades to
//! one-by-one when the transport cannot batch. A failed destination never
//! aborts the cycle; it lands in the report and the pass continues.

use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::{
    domain::{GroupId, MessageId, Post},
    state::DeliveryOrder,
    transport::Transport,
};

#[derive(Clone, Debug)]
pub struct SendOutcome {
    pub post: MessageId,
    pub dest: GroupId,
    pub error: Option<String>,
}

/// What happened during one delivery cycle.
///
/// Watermark policy: the engine advances past every *attempted* post, partial
/// destination failures included, so one permanently broken destination
/// cannot stall the stream. Failures stay visible here and in the logs.
#[derive(Clone, Debug, Default)]
pub struct DeliveryReport {
    pub outcomes: Vec<SendOutcome>,
    pub cancelled: bool,
    attempted: Option<MessageId>,
}

impl DeliveryReport {
    /// Highest post id whose destination pass ran to completion.
    pub fn attempted_watermark(&self) -> Option<MessageId> {
        self.attempted
    }

    pub fn failures(&self) -> usize {
        self.outcomes.iter().filter(|o| o.error.is_some()).count()
    }

    fn record(&mut self, post: MessageId, dest: GroupId, result: crate::Result<()>) {
        if let Err(e) = &result {
            tracing::warn!(post = post.0, dest = %dest, error = %e, "send failed");
        }
        self.outcomes.push(SendOutcome {
            post,
            dest,
            error: result.err().map(|e| e.to_string()),
        });
    }
}

pub async fn deliver(
    transport: &dyn Transport,
    posts: &[Post],
    destinations: &[GroupId],
    order: DeliveryOrder,
    pacing: Duration,
    cancel: &CancellationToken,
) -> DeliveryReport {
    let mut report = DeliveryReport::default();

    let batch = order == DeliveryOrder::Batch && transport.capabilities().supports_batch_send;

    for (idx, post) in posts.iter().enumerate() {
        if cancel.is_cancelled() {
            report.cancelled = true;
            break;
        }

        if batch {
            match transport.send_text_batch(destinations, &post.body).await {
                Ok(outcomes) => {
                    for (dest, result) in outcomes {
                        report.record(post.id, dest, result);
                    }
                }
                Err(e) => {
                    // The whole batch call failed; every destination missed it.
                    let msg = e.to_string();
                    for dest in destinations {
                        report.record(
                            post.id,
                            dest.clone(),
                            Err(crate::Error::Transport(msg.clone())),
                        );
                    }
                }
            }
            report.attempted = Some(post.id);
        } else {
            let mut completed = true;
            for dest in destinations {
                if cancel.is_cancelled() {
                    // Shutdown mid-pass: remaining destinations are skipped and
                    // this post stays un-attempted so it is re-sent on restart.
                    completed = false;
                    break;
                }
                let result = transport.send_text(dest, &post.body).await;
                report.record(post.id, dest.clone(), result);
            }

            if !completed {
                report.cancelled = true;
                break;
            }
            report.attempted = Some(post.id);

            let is_last = idx + 1 == posts.len();
            if !is_last {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        report.cancelled = true;
                        break;
                    }
                    _ = sleep(pacing) => {}
                }
            }
        }
    }

    report
}
