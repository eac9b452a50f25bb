//! The served object model: a device identity plus a flat registry of
//! analog, binary, and multi-state objects.

use bacpipe_core::types::{DataValue, ErrorClass, ErrorCode, ObjectId, ObjectType};
use tokio::sync::Mutex;

use crate::config::{ObjectConfig, ServerConfig};

/// Present value typed by object family.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PresentValue {
    Analog(f32),
    Binary(bool),
    MultiState(u32),
}

impl PresentValue {
    /// Wire representation: Real, Enumerated, or Unsigned.
    pub fn as_wire(&self) -> DataValue<'static> {
        match self {
            Self::Analog(v) => DataValue::Real(*v),
            Self::Binary(v) => DataValue::Enumerated(u32::from(*v)),
            Self::MultiState(v) => DataValue::Unsigned(*v),
        }
    }

    /// Numeric view used by trend-log sampling.
    pub fn as_f32(&self) -> f32 {
        match self {
            Self::Analog(v) => *v,
            Self::Binary(v) => f32::from(u8::from(*v)),
            Self::MultiState(v) => *v as f32,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Analog(v) => serde_json::json!(v),
            Self::Binary(v) => serde_json::json!(u8::from(*v)),
            Self::MultiState(v) => serde_json::json!(v),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerObject {
    pub object_id: ObjectId,
    pub name: String,
    pub present_value: PresentValue,
}

/// Object families the registry can serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Family {
    Analog,
    Binary,
    MultiState,
}

fn family_of(object_type: ObjectType) -> Option<Family> {
    match object_type {
        ObjectType::AnalogInput | ObjectType::AnalogOutput | ObjectType::AnalogValue => {
            Some(Family::Analog)
        }
        ObjectType::BinaryInput | ObjectType::BinaryOutput | ObjectType::BinaryValue => {
            Some(Family::Binary)
        }
        ObjectType::MultiStateInput | ObjectType::MultiStateOutput | ObjectType::MultiStateValue => {
            Some(Family::MultiState)
        }
        _ => None,
    }
}

/// Input objects reflect external state and refuse writes.
fn is_input(object_type: ObjectType) -> bool {
    matches!(
        object_type,
        ObjectType::AnalogInput | ObjectType::BinaryInput | ObjectType::MultiStateInput
    )
}

struct Inner {
    device_id: u32,
    device_name: String,
    objects: Vec<ServerObject>,
}

/// Shared object registry. Applying a config replaces the whole model;
/// BACnet reads and writes are served from it.
pub struct Registry {
    inner: Mutex<Inner>,
}

impl Registry {
    pub fn new(device_id: u32, device_name: impl Into<String>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                device_id,
                device_name: device_name.into(),
                objects: Vec::new(),
            }),
        }
    }

    pub async fn device_id(&self) -> u32 {
        self.inner.lock().await.device_id
    }

    pub async fn device_name(&self) -> String {
        self.inner.lock().await.device_name.clone()
    }

    pub async fn device_object_id(&self) -> ObjectId {
        ObjectId::new(ObjectType::Device, self.inner.lock().await.device_id)
    }

    pub async fn object_ids(&self) -> Vec<ObjectId> {
        let inner = self.inner.lock().await;
        inner.objects.iter().map(|o| o.object_id).collect()
    }

    pub async fn find(&self, object_id: ObjectId) -> Option<ServerObject> {
        let inner = self.inner.lock().await;
        inner
            .objects
            .iter()
            .find(|o| o.object_id == object_id)
            .cloned()
    }

    /// Object counts per type, for the STATUS report.
    pub async fn counts(&self) -> Vec<(ObjectType, usize)> {
        let inner = self.inner.lock().await;
        let mut counts: Vec<(ObjectType, usize)> = Vec::new();
        for object in &inner.objects {
            let object_type = object.object_id.object_type();
            match counts.iter_mut().find(|(t, _)| *t == object_type) {
                Some((_, n)) => *n += 1,
                None => counts.push((object_type, 1)),
            }
        }
        counts
    }

    /// Replaces the entire object model from a parsed config. Trend-log
    /// entries are handled by the trend-log set and skipped here.
    pub async fn apply_config(&self, config: &ServerConfig) -> Result<(), String> {
        let mut objects = Vec::new();
        for entry in &config.objects {
            if entry.object_type == "trendlog" || entry.object_type == "trend-log" {
                continue;
            }
            objects.push(object_from_config(entry)?);
        }

        let mut inner = self.inner.lock().await;
        inner.device_id = config.device_id;
        inner.device_name = config.device_name.clone();
        inner.objects = objects;
        Ok(())
    }

    /// Snapshot of the registry half of the config (trend logs are
    /// appended by the trend-log set).
    pub async fn to_config(&self) -> ServerConfig {
        let inner = self.inner.lock().await;
        ServerConfig {
            device_id: inner.device_id,
            device_name: inner.device_name.clone(),
            objects: inner
                .objects
                .iter()
                .map(|o| ObjectConfig {
                    object_type: o
                        .object_id
                        .object_type()
                        .name()
                        .unwrap_or("proprietary")
                        .to_string(),
                    instance: o.object_id.instance(),
                    name: Some(o.name.clone()),
                    present_value: Some(o.present_value.to_json()),
                    source: None,
                    interval: None,
                    enabled: None,
                })
                .collect(),
        }
    }

    /// Writes an object's present value. Returns the new value when the
    /// write changed it, `Ok(None)` when the write was a no-op.
    pub async fn write_present_value(
        &self,
        object_id: ObjectId,
        value: &DataValue<'_>,
    ) -> Result<Option<PresentValue>, (ErrorClass, ErrorCode)> {
        let mut inner = self.inner.lock().await;
        let Some(object) = inner.objects.iter_mut().find(|o| o.object_id == object_id) else {
            return Err((ErrorClass::Object, ErrorCode::UnknownObject));
        };
        if is_input(object_id.object_type()) {
            return Err((ErrorClass::Property, ErrorCode::WriteAccessDenied));
        }

        let family = match family_of(object_id.object_type()) {
            Some(family) => family,
            None => return Err((ErrorClass::Object, ErrorCode::UnknownObject)),
        };
        let new_value = convert_write(family, value)
            .ok_or((ErrorClass::Property, ErrorCode::ValueOutOfRange))?;

        if object.present_value == new_value {
            return Ok(None);
        }
        object.present_value = new_value;
        Ok(Some(new_value))
    }
}

fn convert_write(family: Family, value: &DataValue<'_>) -> Option<PresentValue> {
    match family {
        Family::Analog => match value {
            DataValue::Real(v) => Some(PresentValue::Analog(*v)),
            _ => None,
        },
        Family::Binary => {
            let raw = match value {
                DataValue::Boolean(v) => u32::from(*v),
                DataValue::Enumerated(v) | DataValue::Unsigned(v) => *v,
                _ => return None,
            };
            match raw {
                0 => Some(PresentValue::Binary(false)),
                1 => Some(PresentValue::Binary(true)),
                _ => None,
            }
        }
        Family::MultiState => match value {
            DataValue::Unsigned(v) if *v >= 1 => Some(PresentValue::MultiState(*v)),
            _ => None,
        },
    }
}

fn object_from_config(entry: &ObjectConfig) -> Result<ServerObject, String> {
    let object_type = ObjectType::from_name(&entry.object_type)
        .ok_or_else(|| format!("unknown object type '{}'", entry.object_type))?;
    let family = family_of(object_type)
        .ok_or_else(|| format!("unsupported object type '{}'", entry.object_type))?;

    let present_value = match (&entry.present_value, family) {
        (None, Family::Analog) => PresentValue::Analog(0.0),
        (None, Family::Binary) => PresentValue::Binary(false),
        (None, Family::MultiState) => PresentValue::MultiState(1),
        (Some(raw), Family::Analog) => PresentValue::Analog(
            raw.as_f64()
                .ok_or_else(|| bad_value(&entry.object_type, entry.instance))?
                as f32,
        ),
        (Some(raw), Family::Binary) => {
            let truthy = match raw {
                serde_json::Value::Bool(b) => u64::from(*b),
                other => other
                    .as_u64()
                    .ok_or_else(|| bad_value(&entry.object_type, entry.instance))?,
            };
            match truthy {
                0 => PresentValue::Binary(false),
                1 => PresentValue::Binary(true),
                _ => return Err(bad_value(&entry.object_type, entry.instance)),
            }
        }
        (Some(raw), Family::MultiState) => {
            let v = raw
                .as_u64()
                .filter(|v| *v >= 1)
                .and_then(|v| u32::try_from(v).ok())
                .ok_or_else(|| bad_value(&entry.object_type, entry.instance))?;
            PresentValue::MultiState(v)
        }
    };

    let name = entry
        .name
        .clone()
        .unwrap_or_else(|| format!("{}-{}", entry.object_type, entry.instance));

    Ok(ServerObject {
        object_id: ObjectId::new(object_type, entry.instance),
        name,
        present_value,
    })
}

fn bad_value(object_type: &str, instance: u32) -> String {
    format!("invalid presentValue for {object_type}:{instance}")
}
