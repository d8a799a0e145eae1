use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path, time::Duration};
use tilesync_world::PasteOrder;
use tracing::warn;

use crate::placement::ConfirmMatch;

/// Timing and batching knobs for the outgoing block scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Period between scheduler ticks.
    pub tick_interval_ms: u64,
    /// Entries sent per tick at most.
    pub max_entries_per_tick: usize,
    /// Pause between two batches of the same tick.
    pub inter_batch_delay_ms: u64,
    /// An unconfirmed entry is resent once this much time has passed.
    pub retry_window_ms: u64,
    /// Entries merged into one message at most.
    pub max_batch_size: usize,
    /// Merge same-content entries into one message.
    pub coalesce: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 100,
            max_entries_per_tick: 400,
            inter_batch_delay_ms: 10,
            retry_window_ms: 2_000,
            max_batch_size: 100,
            coalesce: true,
        }
    }
}

impl SchedulerConfig {
    /// Tick period. Never zero.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    /// Delay between batches within a tick.
    pub fn inter_batch_delay(&self) -> Duration {
        Duration::from_millis(self.inter_batch_delay_ms)
    }

    /// Resend threshold.
    pub fn retry_window(&self) -> Duration {
        Duration::from_millis(self.retry_window_ms)
    }
}

/// Per-session client settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    /// How long to wait for the world snapshot after connecting.
    pub init_timeout_ms: u64,
    /// Buffered world events per subscriber before old ones are dropped.
    pub event_capacity: usize,
    /// Queued handle commands before callers wait.
    pub command_capacity: usize,
    /// How inbound broadcasts are matched against pending placements.
    pub confirm: ConfirmMatch,
    /// Order used by pastes that do not pick one.
    pub paste_order: PasteOrder,
    /// Outgoing scheduler settings.
    pub scheduler: SchedulerConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            init_timeout_ms: 10_000,
            event_capacity: 1024,
            command_capacity: 64,
            confirm: ConfirmMatch::default(),
            paste_order: PasteOrder::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Snapshot wait as a duration.
    pub fn init_timeout(&self) -> Duration {
        Duration::from_millis(self.init_timeout_ms)
    }

    /// Parse TOML, keeping defaults for absent keys.
    pub fn from_toml_str(input: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(input)
    }

    /// Load configuration from an explicit path, falling back to defaults on errors.
    pub fn load_from_path(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(contents) => match Self::from_toml_str(&contents) {
                Ok(cfg) => cfg,
                Err(err) => {
                    warn!("Failed to parse {}: {err}. Using defaults", path.display());
                    ClientConfig::default()
                }
            },
            Err(err) => {
                if err.kind() == std::io::ErrorKind::NotFound {
                    warn!("Client config not found at {}. Using defaults", path.display());
                } else {
                    warn!("Failed to read {}: {err}. Using defaults", path.display());
                }
                ClientConfig::default()
            }
        }
    }

    /// Save configuration to an explicit path.
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        let toml = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tilesync_world::RandomMode;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let cfg = ClientConfig::from_toml_str(
            r#"
            confirm = "content"

            [scheduler]
            retry_window_ms = 500
            coalesce = false
            "#,
        )
        .expect("parse");
        assert_eq!(cfg.confirm, ConfirmMatch::Content);
        assert_eq!(cfg.scheduler.retry_window(), Duration::from_millis(500));
        assert!(!cfg.scheduler.coalesce);
        assert_eq!(cfg.scheduler.max_batch_size, SchedulerConfig::default().max_batch_size);
        assert_eq!(cfg.init_timeout_ms, 10_000);
    }

    #[test]
    fn test_paste_order_from_toml() {
        let cfg = ClientConfig::from_toml_str("paste_order = \"spiral_clockwise\"").expect("parse");
        assert_eq!(cfg.paste_order, PasteOrder::SpiralClockwise);

        let cfg = ClientConfig::from_toml_str("paste_order = { random = \"shuffle\" }").expect("parse");
        assert_eq!(cfg.paste_order, PasteOrder::Random(RandomMode::Shuffle));
    }

    #[test]
    fn test_load_falls_back_to_defaults() {
        let dir = std::env::temp_dir().join(format!("tilesync-config-{}", std::process::id()));
        let path = dir.join("client.toml");
        assert_eq!(ClientConfig::load_from_path(&path), ClientConfig::default());

        fs::create_dir_all(&dir).unwrap();
        fs::write(&path, "scheduler = 3").unwrap();
        assert_eq!(ClientConfig::load_from_path(&path), ClientConfig::default());

        let mut custom = ClientConfig::default();
        custom.scheduler.tick_interval_ms = 25;
        custom.save_to_path(&path).unwrap();
        assert_eq!(ClientConfig::load_from_path(&path), custom);
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_zero_tick_interval_is_clamped() {
        let cfg = SchedulerConfig {
            tick_interval_ms: 0,
            ..SchedulerConfig::default()
        };
        assert_eq!(cfg.tick_interval(), Duration::from_millis(1));
    }
}
