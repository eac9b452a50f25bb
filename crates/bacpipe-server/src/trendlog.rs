//! Trend logs: periodic samples of another object's present value,
//! kept in a bounded in-memory buffer and exposed over the control
//! socket.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bacpipe_core::types::{ObjectId, ObjectType};
use bacpipe_core::MAX_DEVICE_INSTANCE;
use log::{debug, warn};
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::config::ObjectConfig;
use crate::objects::Registry;

/// Samples kept per trend log; older records are dropped.
pub const MAX_RECORDS: usize = 1000;

const DEFAULT_INTERVAL_SECONDS: u32 = 60;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrendRecord {
    /// Seconds since the Unix epoch.
    pub timestamp: u64,
    pub value: f32,
}

#[derive(Debug, Clone)]
pub struct TrendLogSummary {
    pub instance: u32,
    pub name: String,
    pub source: ObjectId,
    pub interval_seconds: u32,
    pub enabled: bool,
    pub record_count: usize,
}

struct TrendLog {
    instance: u32,
    name: String,
    source: ObjectId,
    interval_seconds: u32,
    enabled: bool,
    records: VecDeque<TrendRecord>,
    last_sample: Option<Instant>,
}

impl TrendLog {
    fn summary(&self) -> TrendLogSummary {
        TrendLogSummary {
            instance: self.instance,
            name: self.name.clone(),
            source: self.source,
            interval_seconds: self.interval_seconds,
            enabled: self.enabled,
            record_count: self.records.len(),
        }
    }

    fn push(&mut self, record: TrendRecord) {
        if self.records.len() == MAX_RECORDS {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }
}

/// The server's trend logs. Config entries of type `"trendlog"` land
/// here rather than in the object registry.
pub struct TrendLogSet {
    logs: Mutex<Vec<TrendLog>>,
}

impl TrendLogSet {
    pub fn new() -> Self {
        Self {
            logs: Mutex::new(Vec::new()),
        }
    }

    /// Replaces all trend logs from the `"trendlog"` entries of a config.
    /// Existing records are discarded.
    pub async fn apply_config(&self, entries: &[ObjectConfig]) -> Result<(), String> {
        let mut logs = Vec::new();
        for entry in entries {
            if entry.object_type != "trendlog" && entry.object_type != "trend-log" {
                continue;
            }
            let source = entry
                .source
                .as_deref()
                .and_then(parse_source)
                .ok_or_else(|| {
                    format!("trendlog:{} has a missing or invalid source", entry.instance)
                })?;
            logs.push(TrendLog {
                instance: entry.instance,
                name: entry
                    .name
                    .clone()
                    .unwrap_or_else(|| format!("trendlog-{}", entry.instance)),
                source,
                interval_seconds: entry.interval.unwrap_or(DEFAULT_INTERVAL_SECONDS).max(1),
                enabled: entry.enabled.unwrap_or(true),
                records: VecDeque::new(),
                last_sample: None,
            });
        }
        *self.logs.lock().await = logs;
        Ok(())
    }

    pub async fn to_config(&self) -> Vec<ObjectConfig> {
        let logs = self.logs.lock().await;
        logs.iter()
            .map(|log| ObjectConfig {
                object_type: "trendlog".to_string(),
                instance: log.instance,
                name: Some(log.name.clone()),
                present_value: None,
                source: Some(format!(
                    "{}:{}",
                    log.source.object_type().name().unwrap_or("proprietary"),
                    log.source.instance()
                )),
                interval: Some(log.interval_seconds),
                enabled: Some(log.enabled),
            })
            .collect()
    }

    pub async fn object_ids(&self) -> Vec<ObjectId> {
        let logs = self.logs.lock().await;
        logs.iter()
            .map(|log| ObjectId::new(ObjectType::TrendLog, log.instance))
            .collect()
    }

    pub async fn list(&self) -> Vec<TrendLogSummary> {
        let logs = self.logs.lock().await;
        logs.iter().map(TrendLog::summary).collect()
    }

    pub async fn detail(&self, instance: u32) -> Option<TrendLogSummary> {
        let logs = self.logs.lock().await;
        logs.iter()
            .find(|log| log.instance == instance)
            .map(TrendLog::summary)
    }

    /// The most recent `count` records, oldest first.
    pub async fn data(&self, instance: u32, count: usize) -> Option<Vec<TrendRecord>> {
        let logs = self.logs.lock().await;
        let log = logs.iter().find(|log| log.instance == instance)?;
        let skip = log.records.len().saturating_sub(count);
        Some(log.records.iter().skip(skip).copied().collect())
    }

    pub async fn set_enabled(&self, instance: u32, enabled: bool) -> bool {
        let mut logs = self.logs.lock().await;
        match logs.iter_mut().find(|log| log.instance == instance) {
            Some(log) => {
                log.enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub async fn clear(&self, instance: u32) -> bool {
        let mut logs = self.logs.lock().await;
        match logs.iter_mut().find(|log| log.instance == instance) {
            Some(log) => {
                log.records.clear();
                true
            }
            None => false,
        }
    }

    /// Samples every enabled log whose interval has elapsed.
    pub async fn sample_due(&self, registry: &Registry, now: Instant) {
        let mut due: Vec<(u32, ObjectId)> = Vec::new();
        {
            let mut logs = self.logs.lock().await;
            for log in logs.iter_mut() {
                if !log.enabled {
                    continue;
                }
                let elapsed_ok = match log.last_sample {
                    Some(last) => {
                        now.duration_since(last) >= Duration::from_secs(log.interval_seconds.into())
                    }
                    None => true,
                };
                if elapsed_ok {
                    log.last_sample = Some(now);
                    due.push((log.instance, log.source));
                }
            }
        }

        for (instance, source) in due {
            let Some(object) = registry.find(source).await else {
                warn!("trendlog:{instance} source {source:?} not found, skipping sample");
                continue;
            };
            let record = TrendRecord {
                timestamp: unix_now(),
                value: object.present_value.as_f32(),
            };
            let mut logs = self.logs.lock().await;
            if let Some(log) = logs.iter_mut().find(|log| log.instance == instance) {
                debug!("trendlog:{instance} sampled {}", record.value);
                log.push(record);
            }
        }
    }
}

impl Default for TrendLogSet {
    fn default() -> Self {
        Self::new()
    }
}

/// Background sampler, ticking once a second.
pub async fn run_sampler(state: Arc<crate::state::ServerState>) {
    let mut tick = tokio::time::interval(Duration::from_secs(1));
    loop {
        tick.tick().await;
        state
            .trendlogs
            .sample_due(&state.registry, Instant::now())
            .await;
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn parse_source(notation: &str) -> Option<ObjectId> {
    let (type_name, instance) = notation.rsplit_once(':')?;
    let object_type = ObjectType::from_name(type_name)?;
    let instance: u32 = instance.parse().ok()?;
    if instance > MAX_DEVICE_INSTANCE {
        return None;
    }
    Some(ObjectId::new(object_type, instance))
}
