//! Admin command surface.
//!
//! Every accepted command goes through `ForwardEngine::replace_config`, which
//! validates the whole candidate configuration and persists it; a rejected
//! update reports the error and leaves the prior config untouched.

use chanrelay_core::{
    domain::{ChannelId, GroupId},
    engine::ForwardEngine,
    state::{DeliveryOrder, SelectionMode},
    window::AllowedWindow,
};

pub const HELP: &str = "\
Commands:
/status - show current configuration
/setchannel @channel - set the source channel
/setgroups @g1, @g2 - replace the destination list
/addgroup @g - append one destination
/removegroup @g - remove one destination
/setmode today|new - bulk catch-up vs incremental forwarding
/setorder batch|one_by_one - delivery order
/setcron <5-field expr> - trigger schedule
/setwindow <start> <end> - allowed hours (local time), or /setwindow off
/setpacing <seconds> - delay between posts in one_by_one order
/help - this message";

/// Split `/cmd@botname arg1 ...` into a lowercase command and its argument
/// string.
pub fn parse_command(text: &str) -> (String, String) {
    let mut parts = text.trim().splitn(2, char::is_whitespace);
    let first = parts.next().unwrap_or("").trim();
    let rest = parts.next().unwrap_or("").trim().to_string();

    let cmd = first
        .trim_start_matches('/')
        .split('@')
        .next()
        .unwrap_or("")
        .to_lowercase();

    (cmd, rest)
}

/// Execute one admin command and produce the reply text.
pub fn handle_command(engine: &ForwardEngine, text: &str) -> String {
    let (cmd, args) = parse_command(text);

    match cmd.as_str() {
        "status" => status(engine),
        "setchannel" => set_channel(engine, &args),
        "setgroups" => set_groups(engine, &args),
        "addgroup" => add_group(engine, &args),
        "removegroup" => remove_group(engine, &args),
        "setmode" => set_mode(engine, &args),
        "setorder" => set_order(engine, &args),
        "setcron" => set_cron(engine, &args),
        "setwindow" => set_window(engine, &args),
        "setpacing" => set_pacing(engine, &args),
        "help" | "start" => HELP.to_string(),
        _ => format!("Unknown command: /{cmd}\n\n{HELP}"),
    }
}

fn status(engine: &ForwardEngine) -> String {
    let cfg = engine.current_config();
    let snapshot = serde_json::json!({
        "config": &*cfg,
        "last_forwarded_id": engine.watermark(),
    });
    match serde_json::to_string_pretty(&snapshot) {
        Ok(json) => format!("Current config:\n{json}"),
        Err(e) => format!("Failed to render config: {e}"),
    }
}

fn apply<F>(engine: &ForwardEngine, mutate: F, ok: String) -> String
where
    F: FnOnce(&mut chanrelay_core::state::ForwardConfig),
{
    let mut cfg = (*engine.current_config()).clone();
    mutate(&mut cfg);
    match engine.replace_config(cfg) {
        Ok(()) => ok,
        Err(e) => format!("Rejected: {e}"),
    }
}

fn set_channel(engine: &ForwardEngine, args: &str) -> String {
    if args.is_empty() {
        return "Usage: /setchannel @channel_username".to_string();
    }
    let channel = args.to_string();
    apply(
        engine,
        |cfg| cfg.source_channel = ChannelId(channel.clone()),
        format!("Source channel updated: {args}"),
    )
}

fn parse_groups(args: &str) -> Vec<GroupId> {
    args.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| GroupId(s.to_string()))
        .collect()
}

fn set_groups(engine: &ForwardEngine, args: &str) -> String {
    let groups = parse_groups(args);
    if groups.is_empty() {
        return "Usage: /setgroups @group1, @group2".to_string();
    }
    let summary = groups
        .iter()
        .map(|g| g.0.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    apply(
        engine,
        |cfg| cfg.destinations = groups.clone(),
        format!("Destinations updated: {summary}"),
    )
}

fn add_group(engine: &ForwardEngine, args: &str) -> String {
    if args.is_empty() {
        return "Usage: /addgroup @group".to_string();
    }
    let group = GroupId(args.to_string());
    apply(
        engine,
        |cfg| cfg.destinations.push(group.clone()),
        format!("Destination added: {args}"),
    )
}

fn remove_group(engine: &ForwardEngine, args: &str) -> String {
    if args.is_empty() {
        return "Usage: /removegroup @group".to_string();
    }
    let target = args.to_string();
    let existed = engine
        .current_config()
        .destinations
        .iter()
        .any(|g| g.0 == target);
    if !existed {
        return format!("Destination not configured: {args}");
    }
    apply(
        engine,
        |cfg| cfg.destinations.retain(|g| g.0 != target),
        format!("Destination removed: {args}"),
    )
}

fn set_mode(engine: &ForwardEngine, args: &str) -> String {
    let mode = match args.to_lowercase().as_str() {
        "today" | "daily" => SelectionMode::WindowBased,
        "new" | "listen" => SelectionMode::WatermarkBased,
        _ => return "Usage: /setmode today|new".to_string(),
    };
    apply(
        engine,
        |cfg| cfg.mode = mode,
        format!("Forward mode set to: {}", args.to_lowercase()),
    )
}

fn set_order(engine: &ForwardEngine, args: &str) -> String {
    let order = match args.to_lowercase().as_str() {
        "batch" => DeliveryOrder::Batch,
        "one_by_one" | "one-by-one" => DeliveryOrder::OneByOne,
        _ => return "Usage: /setorder batch|one_by_one".to_string(),
    };
    apply(
        engine,
        |cfg| cfg.order = order,
        format!("Forward order set to: {}", args.to_lowercase()),
    )
}

fn set_cron(engine: &ForwardEngine, args: &str) -> String {
    if args.is_empty() {
        return "Usage: /setcron <min> <hour> <dom> <mon> <dow>".to_string();
    }
    let expr = args.to_string();
    apply(
        engine,
        |cfg| cfg.cron_schedule = expr.clone(),
        format!("Cron schedule set to: {args}"),
    )
}

fn set_window(engine: &ForwardEngine, args: &str) -> String {
    let lowered = args.to_lowercase();
    if lowered == "off" || lowered == "always" {
        return apply(
            engine,
            |cfg| cfg.allowed_window = AllowedWindow::Always,
            "Allowed window disabled; forwarding at any hour".to_string(),
        );
    }

    let parts: Vec<&str> = args.split_whitespace().collect();
    let hours: Option<(u32, u32)> = match parts.as_slice() {
        [a, b] => a.parse().ok().zip(b.parse().ok()),
        _ => None,
    };
    let Some((start, end)) = hours else {
        return "Usage: /setwindow <start_hour> <end_hour>, or /setwindow off".to_string();
    };
    apply(
        engine,
        |cfg| cfg.allowed_window = AllowedWindow::Hours { start, end },
        format!("Allowed window set to {start}:00-{end}:00 local time"),
    )
}

fn set_pacing(engine: &ForwardEngine, args: &str) -> String {
    let Ok(seconds) = args.parse::<u64>() else {
        return "Usage: /setpacing <seconds>".to_string();
    };
    apply(
        engine,
        |cfg| cfg.pacing_seconds = seconds,
        format!("Pacing set to {seconds}s between posts"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chanrelay_core::{
        domain::Post,
        store::StateStore,
        transport::{FetchBound, Transport, TransportCapabilities},
        window::AllowedWindow,
    };
    use std::path::PathBuf;
    use std::sync::Arc;

    struct NullTransport;

    #[async_trait]
    impl Transport for NullTransport {
        fn capabilities(&self) -> TransportCapabilities {
            TransportCapabilities {
                supports_batch_send: false,
            }
        }

        async fn fetch_messages(
            &self,
            _channel: &ChannelId,
            _bound: FetchBound,
        ) -> chanrelay_core::Result<Vec<Post>> {
            Ok(Vec::new())
        }

        async fn send_text(&self, _dest: &GroupId, _body: &str) -> chanrelay_core::Result<()> {
            Ok(())
        }

        async fn send_text_batch(
            &self,
            _dests: &[GroupId],
            _body: &str,
        ) -> chanrelay_core::Result<Vec<(GroupId, chanrelay_core::Result<()>)>> {
            Ok(Vec::new())
        }
    }

    fn engine(name: &str) -> ForwardEngine {
        let dir = PathBuf::from(format!("/tmp/chanrelay-cmd-{}", std::process::id()));
        let _ = std::fs::create_dir_all(&dir);
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);

        let store = StateStore::load(path).unwrap();
        ForwardEngine::new(store, Arc::new(NullTransport)).unwrap()
    }

    #[test]
    fn parse_strips_slash_and_botname() {
        assert_eq!(
            parse_command("/setmode@relaybot today"),
            ("setmode".to_string(), "today".to_string())
        );
        assert_eq!(parse_command("/status"), ("status".to_string(), String::new()));
    }

    #[tokio::test]
    async fn setgroups_replaces_the_list_wholesale() {
        let eng = engine("setgroups.json");
        let reply = handle_command(&eng, "/setgroups @g1, @g2");
        assert!(reply.contains("@g1"));
        assert_eq!(eng.current_config().destinations.len(), 2);
    }

    #[tokio::test]
    async fn add_and_remove_single_group() {
        let eng = engine("addremove.json");
        handle_command(&eng, "/addgroup @extra");
        assert_eq!(eng.current_config().destinations.len(), 2);

        handle_command(&eng, "/removegroup @extra");
        assert_eq!(eng.current_config().destinations.len(), 1);

        let reply = handle_command(&eng, "/removegroup @missing");
        assert!(reply.contains("not configured"));
    }

    #[tokio::test]
    async fn rejected_update_keeps_prior_config() {
        let eng = engine("reject.json");
        let before = eng.current_config();

        let reply = handle_command(&eng, "/setcron nonsense");
        assert!(reply.starts_with("Rejected:"));
        assert_eq!(eng.current_config().cron_schedule, before.cron_schedule);

        // Removing the last destination would leave the list empty.
        let last = before.destinations[0].0.clone();
        let reply = handle_command(&eng, &format!("/removegroup {last}"));
        assert!(reply.starts_with("Rejected:"));
        assert_eq!(eng.current_config().destinations.len(), 1);
    }

    #[tokio::test]
    async fn setmode_accepts_both_taxonomies() {
        let eng = engine("setmode.json");
        handle_command(&eng, "/setmode daily");
        assert_eq!(eng.current_config().mode, SelectionMode::WindowBased);
        handle_command(&eng, "/setmode listen");
        assert_eq!(eng.current_config().mode, SelectionMode::WatermarkBased);

        let reply = handle_command(&eng, "/setmode sideways");
        assert!(reply.starts_with("Usage:"));
    }

    #[tokio::test]
    async fn setwindow_off_and_hours() {
        let eng = engine("setwindow.json");
        handle_command(&eng, "/setwindow off");
        assert_eq!(eng.current_config().allowed_window, AllowedWindow::Always);

        handle_command(&eng, "/setwindow 22 8");
        assert_eq!(
            eng.current_config().allowed_window,
            AllowedWindow::Hours { start: 22, end: 8 }
        );

        let reply = handle_command(&eng, "/setwindow 25 8");
        assert!(reply.starts_with("Rejected:"));
    }

    #[tokio::test]
    async fn status_renders_watermark_and_config() {
        let eng = engine("status.json");
        let reply = handle_command(&eng, "/status");
        assert!(reply.contains("last_forwarded_id"));
        assert!(reply.contains("source_channel"));
    }
}
