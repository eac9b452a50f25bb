//! Shared server state: the object registry, trend logs, COV
//! subscribers, and config persistence.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{error, info};

use crate::config::ServerConfig;
use crate::cov::SubscriberTable;
use crate::objects::Registry;
use crate::trendlog::TrendLogSet;

pub struct ServerState {
    pub registry: Registry,
    pub trendlogs: TrendLogSet,
    pub subscribers: SubscriberTable,
    config_path: Option<PathBuf>,
    dirty: AtomicBool,
}

impl ServerState {
    pub fn new(device_id: u32, device_name: impl Into<String>, config_path: Option<PathBuf>) -> Self {
        Self {
            registry: Registry::new(device_id, device_name),
            trendlogs: TrendLogSet::new(),
            subscribers: SubscriberTable::new(),
            config_path,
            dirty: AtomicBool::new(false),
        }
    }

    /// Replaces the whole object model. The registry is validated
    /// before the trend logs, so a bad config leaves neither applied
    /// half-way only when the registry part was sound.
    pub async fn apply_config(&self, config: &ServerConfig) -> Result<(), String> {
        self.registry.apply_config(config).await?;
        self.trendlogs.apply_config(&config.objects).await?;
        self.mark_dirty();
        Ok(())
    }

    pub async fn snapshot_config(&self) -> ServerConfig {
        let mut config = self.registry.to_config().await;
        config.objects.extend(self.trendlogs.to_config().await);
        config
    }

    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Relaxed);
    }

    /// Writes the config if anything changed since the last save.
    pub async fn save_if_dirty(&self) {
        if self.dirty.swap(false, Ordering::Relaxed) {
            self.save_now().await;
        }
    }

    pub async fn save_now(&self) {
        let Some(path) = &self.config_path else {
            return;
        };
        let config = self.snapshot_config().await;
        match config.save(path).await {
            Ok(()) => info!("config saved to {}", path.display()),
            Err(err) => error!("failed to save config to {}: {err}", path.display()),
        }
    }
}

/// Background task persisting dirty state every 30 seconds.
pub async fn run_autosave(state: Arc<ServerState>) {
    let mut tick = tokio::time::interval(Duration::from_secs(30));
    tick.tick().await;
    loop {
        tick.tick().await;
        state.save_if_dirty().await;
    }
}

#[cfg(test)]
mod tests {
    use super::ServerState;
    use crate::config::ServerConfig;

    #[tokio::test]
    async fn apply_and_snapshot_round_trip() {
        let state = ServerState::new(260001, "bacnetStackServer", None);
        let config = ServerConfig::parse(
            r#"{
                "deviceId": 260001,
                "deviceName": "srv",
                "objects": [
                    {"type": "analog-value", "instance": 1, "presentValue": 10.0},
                    {"type": "trendlog", "instance": 1, "source": "analog-value:1"}
                ]
            }"#,
        )
        .unwrap();
        state.apply_config(&config).await.unwrap();

        let snapshot = state.snapshot_config().await;
        assert_eq!(snapshot.device_name, "srv");
        assert_eq!(snapshot.objects.len(), 2);
        assert_eq!(snapshot.objects[1].object_type, "trendlog");
        assert_eq!(snapshot.objects[1].source.as_deref(), Some("analog-value:1"));
    }

    #[tokio::test]
    async fn bad_config_is_rejected() {
        let state = ServerState::new(1, "srv", None);
        let config = ServerConfig::parse(
            r#"{"deviceId": 1, "deviceName": "srv", "objects": [
                {"type": "trendlog", "instance": 1}
            ]}"#,
        )
        .unwrap();
        assert!(state.apply_config(&config).await.is_err());
    }
}
