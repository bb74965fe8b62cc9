use std::{env, fs, path::Path, path::PathBuf};

use crate::{errors::Error, Result};

/// Process environment configuration: credentials and file locations.
///
/// Everything the operator can change at runtime (destinations, mode, window,
/// schedule) lives in the state file instead, managed by the admin commands.
#[derive(Clone, Debug)]
pub struct EnvConfig {
    pub telegram_bot_token: String,
    pub admin_user_ids: Vec<i64>,
    pub state_file: PathBuf,
}

impl EnvConfig {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));

        let telegram_bot_token = env_str("TELEGRAM_BOT_TOKEN").unwrap_or_default();
        if telegram_bot_token.trim().is_empty() {
            return Err(Error::Config(
                "TELEGRAM_BOT_TOKEN environment variable is required".to_string(),
            ));
        }

        let admin_user_ids = parse_csv_i64(env_str("CHANRELAY_ADMIN_IDS"));
        if admin_user_ids.is_empty() {
            return Err(Error::Config(
                "CHANRELAY_ADMIN_IDS environment variable is required".to_string(),
            ));
        }

        let state_file = env::var_os("CHANRELAY_STATE_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("chanrelay.json"));

        Ok(Self {
            telegram_bot_token,
            admin_user_ids,
            state_file,
        })
    }
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        env::set_var(key, val);
    }
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn parse_csv_i64(v: Option<String>) -> Vec<i64> {
    v.unwrap_or_default()
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<i64>().ok())
        .collect()
}
