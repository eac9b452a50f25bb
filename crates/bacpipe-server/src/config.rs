//! On-disk object model. The whole server configuration is one JSON
//! document: device identity plus a flat list of objects, with trend logs
//! configured as objects of type `"trendlog"`.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    pub device_id: u32,
    pub device_name: String,
    #[serde(default)]
    pub objects: Vec<ObjectConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectConfig {
    #[serde(rename = "type")]
    pub object_type: String,
    pub instance: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub present_value: Option<serde_json::Value>,
    /// Trend-log source object, `"analog-input:1"` notation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Trend-log sampling interval in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
}

impl ServerConfig {
    pub fn parse(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = tokio::fs::read_to_string(path).await?;
        Self::parse(&contents)
    }

    pub async fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let contents = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, contents).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::ServerConfig;

    #[test]
    fn parse_minimal_config() {
        let cfg = ServerConfig::parse(r#"{"deviceId": 260001, "deviceName": "srv"}"#).unwrap();
        assert_eq!(cfg.device_id, 260001);
        assert_eq!(cfg.device_name, "srv");
        assert!(cfg.objects.is_empty());
    }

    #[test]
    fn parse_objects_and_trendlog() {
        let cfg = ServerConfig::parse(
            r#"{
                "deviceId": 260001,
                "deviceName": "srv",
                "objects": [
                    {"type": "analog-input", "instance": 1, "name": "temp", "presentValue": 21.5},
                    {"type": "trendlog", "instance": 1, "source": "analog-input:1", "interval": 60}
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.objects.len(), 2);
        assert_eq!(cfg.objects[0].object_type, "analog-input");
        assert_eq!(cfg.objects[1].source.as_deref(), Some("analog-input:1"));
        assert_eq!(cfg.objects[1].interval, Some(60));
    }

    #[test]
    fn reject_malformed_json() {
        assert!(ServerConfig::parse("{not json").is_err());
        assert!(ServerConfig::parse(r#"{"deviceName": "missing id"}"#).is_err());
    }

    #[tokio::test]
    async fn save_load_round_trip() {
        let dir = std::env::temp_dir().join(format!("bacpipe-cfg-{}", std::process::id()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let path = dir.join("server.json");

        let cfg = ServerConfig::parse(
            r#"{"deviceId": 7, "deviceName": "x", "objects": [
                {"type": "binary-value", "instance": 3, "presentValue": 1}
            ]}"#,
        )
        .unwrap();
        cfg.save(&path).await.unwrap();

        let loaded = ServerConfig::load(&path).await.unwrap();
        assert_eq!(loaded.device_id, 7);
        assert_eq!(loaded.objects.len(), 1);
        assert_eq!(loaded.objects[0].instance, 3);

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }
}
