//! Trigger loop: cron-driven forward cycles plus the live listen path.
//!
//! Both paths share one cycle mutex per source (single-writer discipline over
//! the watermark) and one cancellation token. A cycle snapshots the config
//! once and finishes on that snapshot even if an admin replaces it mid-cycle.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::{
    delivery::{deliver, DeliveryReport},
    domain::{MessageId, Post},
    selector::{is_eligible, select_candidates},
    state::{ConfigState, ForwardConfig, SelectionMode},
    store::StateStore,
    transport::{FetchBound, Transport},
    Result,
};

#[derive(Clone)]
pub struct ForwardEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    config: ConfigState,
    store: StateStore,
    transport: Arc<dyn Transport>,
    cycle: tokio::sync::Mutex<()>,
    cancel: CancellationToken,
}

impl ForwardEngine {
    pub fn new(store: StateStore, transport: Arc<dyn Transport>) -> Result<Self> {
        let config = ConfigState::new(store.config())?;
        Ok(Self {
            inner: Arc::new(EngineInner {
                config,
                store,
                transport,
                cycle: tokio::sync::Mutex::new(()),
                cancel: CancellationToken::new(),
            }),
        })
    }

    pub fn current_config(&self) -> Arc<ForwardConfig> {
        self.inner.config.current()
    }

    pub fn watermark(&self) -> Option<MessageId> {
        self.inner.store.watermark()
    }

    /// Validate, swap in and persist a replaced configuration. Takes effect
    /// from the next cycle; a rejected update leaves the prior config active.
    pub fn replace_config(&self, config: ForwardConfig) -> Result<()> {
        self.inner.config.replace(config.clone())?;
        self.inner.store.save_config(&config)?;
        tracing::info!("configuration replaced");
        Ok(())
    }

    /// Spawn the cron job loop. The schedule is re-read from the current
    /// config snapshot before every tick, so `/setcron` applies at the next
    /// wakeup without a restart.
    pub fn start(&self) -> tokio::task::JoinHandle<()> {
        let engine = self.clone();
        tokio::spawn(async move { engine.job_loop().await })
    }

    /// Consume live posts from the transport listener. Only meaningful in
    /// watermark mode; window mode re-scans on the cron cadence instead.
    pub async fn run_listen(&self, mut rx: mpsc::Receiver<Post>) {
        loop {
            tokio::select! {
                _ = self.inner.cancel.cancelled() => break,
                post = rx.recv() => {
                    let Some(post) = post else { break };
                    if let Err(e) = self.handle_live_post(post).await {
                        tracing::warn!(error = %e, "listen cycle failed");
                    }
                }
            }
        }
    }

    /// Cancel in-flight pacing and stop the loops. The partially delivered
    /// post is treated as not yet forwarded and re-sent on restart.
    pub fn shutdown(&self) {
        self.inner.cancel.cancel();
    }

    async fn job_loop(&self) {
        loop {
            let cfg = self.inner.config.current();
            let schedule = match cfg.schedule() {
                Ok(s) => s,
                Err(e) => {
                    tracing::error!(error = %e, "unusable cron schedule, stopping trigger loop");
                    break;
                }
            };

            let now_local = Utc::now().with_timezone(&cfg.timezone);
            let Some(next) = schedule.next_after(now_local) else {
                tracing::error!("cron schedule has no next run, stopping trigger loop");
                break;
            };
            let wait = (next - now_local).to_std().unwrap_or_default();

            tokio::select! {
                _ = self.inner.cancel.cancelled() => break,
                _ = sleep(wait) => {
                    if let Err(e) = self.run_cycle().await {
                        // Failed cycle: same watermark, retried next tick.
                        tracing::warn!(error = %e, "forward cycle failed");
                    }
                }
            }
        }
    }

    /// One cron-triggered cycle: gate, select, deliver, persist.
    pub async fn run_cycle(&self) -> Result<()> {
        let _guard = self.inner.cycle.lock().await;

        let cfg = self.inner.config.current();
        let now = Utc::now();

        if !cfg.allowed_window.is_open_at(now, cfg.timezone) {
            tracing::debug!("outside allowed window, skipping cycle");
            return Ok(());
        }

        let watermark = match cfg.mode {
            SelectionMode::WatermarkBased => Some(self.ensure_watermark(&cfg).await?),
            SelectionMode::WindowBased => None,
        };

        let posts = select_candidates(self.inner.transport.as_ref(), &cfg, watermark, now).await?;
        if posts.is_empty() {
            tracing::debug!("no eligible posts this cycle");
            return Ok(());
        }

        tracing::info!(
            count = posts.len(),
            destinations = cfg.destinations.len(),
            "forwarding posts"
        );

        let report = deliver(
            self.inner.transport.as_ref(),
            &posts,
            &cfg.destinations,
            cfg.order,
            cfg.pacing(),
            &self.inner.cancel,
        )
        .await;

        self.persist(&cfg, &report)
    }

    async fn handle_live_post(&self, post: Post) -> Result<()> {
        let _guard = self.inner.cycle.lock().await;

        let cfg = self.inner.config.current();
        if cfg.mode != SelectionMode::WatermarkBased {
            return Ok(());
        }

        let now = Utc::now();
        if !cfg.allowed_window.is_open_at(now, cfg.timezone) {
            // Closed window: leave the post for the next in-window cron cycle.
            tracing::debug!(post = post.id.0, "outside allowed window, deferring live post");
            return Ok(());
        }

        let watermark = self.ensure_watermark(&cfg).await?;
        if !is_eligible(&post, Some(watermark)) {
            return Ok(());
        }

        tracing::info!(post = post.id.0, "forwarding live post");

        let batch = [post];
        let report = deliver(
            self.inner.transport.as_ref(),
            &batch,
            &cfg.destinations,
            cfg.order,
            cfg.pacing(),
            &self.inner.cancel,
        )
        .await;

        self.persist(&cfg, &report)
    }

    /// Current watermark, seeded from the source head when the persisted
    /// state is missing. Seeding forwards nothing retroactively: a lost state
    /// file must not re-flood all history.
    async fn ensure_watermark(&self, cfg: &ForwardConfig) -> Result<MessageId> {
        if let Some(w) = self.inner.store.watermark() {
            return Ok(w);
        }

        let head = self
            .inner
            .transport
            .fetch_messages(&cfg.source_channel, FetchBound::Head)
            .await?;
        let seed = head.last().map(|p| p.id).unwrap_or(MessageId(0));
        tracing::info!(watermark = seed.0, "seeding watermark from source head");
        self.inner.store.save_watermark(seed)?;
        Ok(seed)
    }

    fn persist(&self, cfg: &ForwardConfig, report: &DeliveryReport) -> Result<()> {
        if report.failures() > 0 {
            tracing::warn!(
                failures = report.failures(),
                total = report.outcomes.len(),
                "cycle finished with partial failures"
            );
        }

        if cfg.mode == SelectionMode::WatermarkBased {
            if let Some(id) = report.attempted_watermark() {
                self.inner.store.save_watermark(id)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ChannelId, GroupId};
    use crate::state::DeliveryOrder;
    use crate::transport::TransportCapabilities;
    use crate::window::AllowedWindow;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeTransport {
        posts: Mutex<Vec<Post>>,
        sends: Mutex<Vec<(String, String)>>,
        fetches: AtomicUsize,
    }

    impl FakeTransport {
        fn with_posts(posts: Vec<Post>) -> Self {
            Self {
                posts: Mutex::new(posts),
                ..Default::default()
            }
        }

        fn send_count(&self) -> usize {
            self.sends.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Transport for FakeTransport {
        fn capabilities(&self) -> TransportCapabilities {
            TransportCapabilities {
                supports_batch_send: false,
            }
        }

        async fn fetch_messages(
            &self,
            _channel: &ChannelId,
            bound: FetchBound,
        ) -> Result<Vec<Post>> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            let posts = self.posts.lock().unwrap();
            let mut out: Vec<Post> = match bound {
                FetchBound::AfterId(id) => posts.iter().filter(|p| p.id > id).cloned().collect(),
                FetchBound::Since(ts) => {
                    posts.iter().filter(|p| p.timestamp >= ts).cloned().collect()
                }
                FetchBound::Head => posts
                    .iter()
                    .max_by_key(|p| p.id)
                    .cloned()
                    .into_iter()
                    .collect(),
            };
            out.sort_by_key(|p| p.id);
            Ok(out)
        }

        async fn send_text(&self, dest: &GroupId, body: &str) -> Result<()> {
            self.sends
                .lock()
                .unwrap()
                .push((dest.0.clone(), body.to_string()));
            Ok(())
        }

        async fn send_text_batch(
            &self,
            _dests: &[GroupId],
            _body: &str,
        ) -> Result<Vec<(GroupId, Result<()>)>> {
            unreachable!("batch send is not advertised")
        }
    }

    fn post(id: i64, body: &str) -> Post {
        Post {
            id: MessageId(id),
            timestamp: Utc::now(),
            body: body.to_string(),
            has_media: false,
        }
    }

    fn store(name: &str, watermark: Option<MessageId>) -> StateStore {
        let dir = PathBuf::from(format!("/tmp/chanrelay-engine-{}", std::process::id()));
        let _ = std::fs::create_dir_all(&dir);
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);

        let store = StateStore::load(path).unwrap();
        let mut cfg = ForwardConfig::default();
        cfg.mode = SelectionMode::WatermarkBased;
        cfg.order = DeliveryOrder::OneByOne;
        cfg.allowed_window = AllowedWindow::Always;
        cfg.pacing_seconds = 1;
        cfg.destinations = vec![GroupId("@a".to_string()), GroupId("@b".to_string())];
        store.save_config(&cfg).unwrap();
        if let Some(w) = watermark {
            store.save_watermark(w).unwrap();
        }
        store
    }

    fn engine(store: StateStore, transport: Arc<FakeTransport>) -> ForwardEngine {
        ForwardEngine::new(store, transport).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn cycle_forwards_past_watermark_and_persists() {
        let transport = Arc::new(FakeTransport::with_posts(vec![
            post(5, "old"),
            post(6, "fresh"),
            post(7, "fresher"),
        ]));
        let eng = engine(store("forward.json", Some(MessageId(5))), transport.clone());

        eng.run_cycle().await.unwrap();

        // Two posts to two destinations each.
        assert_eq!(transport.send_count(), 4);
        assert_eq!(eng.watermark(), Some(MessageId(7)));
    }

    #[tokio::test(start_paused = true)]
    async fn unchanged_watermark_cycle_is_idempotent() {
        let transport = Arc::new(FakeTransport::with_posts(vec![post(5, "old")]));
        let eng = engine(store("idempotent.json", Some(MessageId(5))), transport.clone());

        eng.run_cycle().await.unwrap();
        eng.run_cycle().await.unwrap();

        assert_eq!(transport.send_count(), 0);
        assert_eq!(eng.watermark(), Some(MessageId(5)));
    }

    #[tokio::test(start_paused = true)]
    async fn closed_window_skips_the_fetch_entirely() {
        let transport = Arc::new(FakeTransport::with_posts(vec![post(6, "fresh")]));
        let eng = engine(store("closed.json", Some(MessageId(5))), transport.clone());

        let mut cfg = (*eng.current_config()).clone();
        // 0-0 is invalid; pick a window that is provably closed right now by
        // checking both halves of the day.
        let hour = chrono::Timelike::hour(&Utc::now());
        cfg.allowed_window = if hour < 12 {
            AllowedWindow::Hours { start: 13, end: 14 }
        } else {
            AllowedWindow::Hours { start: 1, end: 2 }
        };
        eng.replace_config(cfg).unwrap();

        eng.run_cycle().await.unwrap();

        assert_eq!(transport.fetches.load(Ordering::SeqCst), 0);
        assert_eq!(transport.send_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_watermark_seeds_from_head_without_forwarding() {
        let transport = Arc::new(FakeTransport::with_posts(vec![
            post(100, "history"),
            post(101, "history"),
        ]));
        let eng = engine(store("seed.json", None), transport.clone());

        eng.run_cycle().await.unwrap();

        // Seeded at the head; nothing re-forwarded retroactively.
        assert_eq!(transport.send_count(), 0);
        assert_eq!(eng.watermark(), Some(MessageId(101)));
    }

    #[tokio::test(start_paused = true)]
    async fn live_post_forwards_and_advances_watermark() {
        let transport = Arc::new(FakeTransport::default());
        let eng = engine(store("live.json", Some(MessageId(5))), transport.clone());

        eng.handle_live_post(post(6, "fresh")).await.unwrap();

        assert_eq!(transport.send_count(), 2);
        assert_eq!(eng.watermark(), Some(MessageId(6)));
    }

    #[tokio::test(start_paused = true)]
    async fn live_media_post_is_ignored() {
        let transport = Arc::new(FakeTransport::default());
        let eng = engine(store("live-media.json", Some(MessageId(5))), transport.clone());

        let mut media = post(6, "photo");
        media.has_media = true;
        eng.handle_live_post(media).await.unwrap();

        assert_eq!(transport.send_count(), 0);
        assert_eq!(eng.watermark(), Some(MessageId(5)));
    }

    #[tokio::test(start_paused = true)]
    async fn stale_live_post_does_not_move_the_watermark_back() {
        let transport = Arc::new(FakeTransport::default());
        let eng = engine(store("stale.json", Some(MessageId(5))), transport.clone());

        eng.handle_live_post(post(4, "replay")).await.unwrap();

        assert_eq!(transport.send_count(), 0);
        assert_eq!(eng.watermark(), Some(MessageId(5)));
    }
}
