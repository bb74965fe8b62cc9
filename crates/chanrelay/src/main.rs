use std::sync::Arc;

use teloxide::Bot;

use chanrelay_core::{config::EnvConfig, engine::ForwardEngine, store::StateStore};
use chanrelay_telegram::{PostSpool, TelegramTransport};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    chanrelay_core::logging::init("chanrelay")?;

    let env = Arc::new(EnvConfig::load()?);
    let store = StateStore::load(&env.state_file)?;

    let bot = Bot::new(env.telegram_bot_token.clone());
    let spool = Arc::new(PostSpool::default());
    let transport = Arc::new(TelegramTransport::new(bot.clone(), spool.clone()));

    let engine = ForwardEngine::new(store, transport)?;

    // Ctrl-C cancels in-flight pacing; a partially delivered post is re-sent
    // on the next start.
    {
        let engine = engine.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown requested");
                engine.shutdown();
            }
        });
    }

    chanrelay_telegram::router::run_polling(bot, env, engine, spool).await?;

    Ok(())
}
