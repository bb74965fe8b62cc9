//! Live forwarding configuration with atomic snapshot/swap semantics.
//!
//! Every cycle reads one consistent snapshot via [`ConfigState::current`];
//! admin updates go through [`ConfigState::replace`], which validates the
//! whole candidate config and either swaps it in wholesale or leaves the
//! prior config active.

use std::collections::HashSet;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::{
    cron::CronExpr,
    domain::{ChannelId, GroupId},
    window::AllowedWindow,
    Error, Result,
};

/// Which posts a cycle considers eligible.
///
/// The two historical mode taxonomies (today/new, daily/listen) collapse into
/// one selector strategy; the serde aliases keep old state files loading.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SelectionMode {
    /// Bulk catch-up: everything since local midnight.
    #[serde(rename = "today", alias = "daily")]
    WindowBased,
    /// Incremental: everything past the persisted watermark.
    #[serde(rename = "new", alias = "listen")]
    WatermarkBased,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryOrder {
    /// One multi-target call per post, where the transport supports it.
    Batch,
    /// Sequential per-destination sends with inter-post pacing.
    OneByOne,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ForwardConfig {
    pub source_channel: ChannelId,
    pub destinations: Vec<GroupId>,
    pub mode: SelectionMode,
    pub order: DeliveryOrder,
    pub cron_schedule: String,
    pub allowed_window: AllowedWindow,
    pub pacing_seconds: u64,
    pub timezone: Tz,
}

impl ForwardConfig {
    pub fn pacing(&self) -> Duration {
        Duration::from_secs(self.pacing_seconds)
    }

    pub fn schedule(&self) -> Result<CronExpr> {
        CronExpr::parse(&self.cron_schedule)
    }

    pub fn validate(&self) -> Result<()> {
        if self.source_channel.0.trim().is_empty() {
            return Err(Error::Config("source channel must not be empty".to_string()));
        }
        if self.destinations.is_empty() {
            return Err(Error::Config(
                "destination list must not be empty".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for dest in &self.destinations {
            if dest.0.trim().is_empty() {
                return Err(Error::Config("destination must not be empty".to_string()));
            }
            if !seen.insert(dest) {
                return Err(Error::Config(format!("duplicate destination: {dest}")));
            }
        }
        self.allowed_window.validate()?;
        self.schedule()?;
        if self.pacing_seconds == 0 {
            return Err(Error::Config("pacing must be at least 1 second".to_string()));
        }
        Ok(())
    }
}

impl Default for ForwardConfig {
    fn default() -> Self {
        Self {
            source_channel: ChannelId("@somechannel".to_string()),
            destinations: vec![GroupId("@group1".to_string())],
            mode: SelectionMode::WatermarkBased,
            order: DeliveryOrder::OneByOne,
            cron_schedule: "* * * * *".to_string(),
            allowed_window: AllowedWindow::Hours { start: 8, end: 22 },
            pacing_seconds: 60,
            timezone: Tz::UTC,
        }
    }
}

/// Process-wide configuration holder.
///
/// `current()` is non-blocking and never observes a half-applied update; a
/// cycle keeps using the `Arc` it snapshotted even if a replace lands
/// mid-cycle.
pub struct ConfigState {
    inner: RwLock<Arc<ForwardConfig>>,
}

impl ConfigState {
    pub fn new(config: ForwardConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            inner: RwLock::new(Arc::new(config)),
        })
    }

    pub fn current(&self) -> Arc<ForwardConfig> {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Validate and atomically swap in `config`, visible from the next
    /// snapshot onward. On rejection the prior config stays active.
    pub fn replace(&self, config: ForwardConfig) -> Result<()> {
        config.validate()?;
        let mut guard = self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = Arc::new(config);
        Ok(())
    }
}
