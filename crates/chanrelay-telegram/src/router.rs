//! Update routing: channel posts feed the engine, admin messages mutate the
//! configuration.

use std::sync::Arc;

use teloxide::{dispatching::Dispatcher, dptree, prelude::*};
use tokio::sync::mpsc;

use chanrelay_core::{config::EnvConfig, domain::Post, engine::ForwardEngine};

use crate::{commands, is_from_source, post_from_message, PostSpool};

#[derive(Clone)]
pub struct AppState {
    pub env: Arc<EnvConfig>,
    pub engine: ForwardEngine,
    pub spool: Arc<PostSpool>,
    pub live_tx: mpsc::Sender<Post>,
}

pub async fn run_polling(
    bot: Bot,
    env: Arc<EnvConfig>,
    engine: ForwardEngine,
    spool: Arc<PostSpool>,
) -> anyhow::Result<()> {
    if let Ok(me) = bot.get_me().await {
        tracing::info!(bot = me.username(), "chanrelay started");
    }
    {
        let cfg = engine.current_config();
        tracing::info!(
            source = %cfg.source_channel,
            destinations = cfg.destinations.len(),
            admins = env.admin_user_ids.len(),
            "initial configuration loaded"
        );
    }

    // Live posts flow into the engine's listen loop; if the engine falls
    // behind, dropped events are recovered by the next cron cycle anyway.
    let (live_tx, live_rx) = mpsc::channel::<Post>(64);
    {
        let engine = engine.clone();
        tokio::spawn(async move { engine.run_listen(live_rx).await });
    }
    engine.start();

    let state = Arc::new(AppState {
        env,
        engine,
        spool,
        live_tx,
    });

    let handler = dptree::entry()
        .branch(Update::filter_channel_post().endpoint(handle_channel_post))
        .branch(Update::filter_message().endpoint(handle_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .build()
        .dispatch()
        .await;

    Ok(())
}

async fn handle_channel_post(msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let source = state.engine.current_config().source_channel.clone();
    if !is_from_source(&msg, &source) {
        return Ok(());
    }

    let post = post_from_message(&msg);
    tracing::debug!(post = post.id.0, has_media = post.has_media, "observed channel post");
    state.spool.insert(post.clone());

    if state.live_tx.try_send(post).is_err() {
        tracing::warn!("listen queue full, deferring post to the next cron cycle");
    }

    Ok(())
}

async fn handle_message(bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(user_id) = msg.from().map(|u| u.id.0 as i64) else {
        return Ok(());
    };
    if !state.env.admin_user_ids.contains(&user_id) {
        // Not an admin; the relay never talks to strangers.
        return Ok(());
    }

    let Some(text) = msg.text() else {
        return Ok(());
    };
    if !text.starts_with('/') {
        return Ok(());
    }

    let reply = commands::handle_command(&state.engine, text);
    bot.send_message(msg.chat.id, reply).await?;

    Ok(())
}
