use bacpipe_core::types::{BitString, DataValue, Date, ObjectId, ObjectType, Time};

use crate::text::object_type_label;

/// Owned counterpart of [`DataValue`], detached from the receive buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientDataValue {
    Null,
    Boolean(bool),
    Unsigned(u32),
    Signed(i32),
    Real(f32),
    Double(f64),
    OctetString(Vec<u8>),
    CharacterString(String),
    BitString { unused_bits: u8, data: Vec<u8> },
    Enumerated(u32),
    Date(Date),
    Time(Time),
    ObjectId(ObjectId),
    Constructed { tag_num: u8, values: Vec<ClientDataValue> },
}

impl ClientDataValue {
    pub fn from_wire(value: DataValue<'_>) -> Self {
        match value {
            DataValue::Null => Self::Null,
            DataValue::Boolean(v) => Self::Boolean(v),
            DataValue::Unsigned(v) => Self::Unsigned(v),
            DataValue::Signed(v) => Self::Signed(v),
            DataValue::Real(v) => Self::Real(v),
            DataValue::Double(v) => Self::Double(v),
            DataValue::OctetString(v) => Self::OctetString(v.to_vec()),
            DataValue::CharacterString(v) => Self::CharacterString(v.to_string()),
            DataValue::BitString(v) => Self::BitString {
                unused_bits: v.unused_bits,
                data: v.data.to_vec(),
            },
            DataValue::Enumerated(v) => Self::Enumerated(v),
            DataValue::Date(v) => Self::Date(v),
            DataValue::Time(v) => Self::Time(v),
            DataValue::ObjectId(v) => Self::ObjectId(v),
            DataValue::Constructed { tag_num, values } => Self::Constructed {
                tag_num,
                values: values.into_iter().map(Self::from_wire).collect(),
            },
        }
    }

    /// Borrowing view suitable for the wire encoders.
    pub fn as_wire(&self) -> DataValue<'_> {
        match self {
            Self::Null => DataValue::Null,
            Self::Boolean(v) => DataValue::Boolean(*v),
            Self::Unsigned(v) => DataValue::Unsigned(*v),
            Self::Signed(v) => DataValue::Signed(*v),
            Self::Real(v) => DataValue::Real(*v),
            Self::Double(v) => DataValue::Double(*v),
            Self::OctetString(v) => DataValue::OctetString(v),
            Self::CharacterString(v) => DataValue::CharacterString(v),
            Self::BitString { unused_bits, data } => {
                DataValue::BitString(BitString::new(*unused_bits, data))
            }
            Self::Enumerated(v) => DataValue::Enumerated(*v),
            Self::Date(v) => DataValue::Date(*v),
            Self::Time(v) => DataValue::Time(*v),
            Self::ObjectId(v) => DataValue::ObjectId(*v),
            Self::Constructed { .. } => DataValue::Null,
        }
    }

    /// Application tag name reported in the `datatype` response field.
    pub fn datatype_name(&self) -> &'static str {
        match self {
            Self::Null => "NULL",
            Self::Boolean(_) => "BOOLEAN",
            Self::Unsigned(_) => "UNSIGNED",
            Self::Signed(_) => "SIGNED",
            Self::Real(_) => "REAL",
            Self::Double(_) => "DOUBLE",
            Self::OctetString(_) => "OCTET-STRING",
            Self::CharacterString(_) => "CHARACTER-STRING",
            Self::BitString { .. } => "BIT-STRING",
            Self::Enumerated(_) => "ENUMERATED",
            Self::Date(_) => "DATE",
            Self::Time(_) => "TIME",
            Self::ObjectId(_) => "OBJECT-ID",
            Self::Constructed { .. } => "CONSTRUCTED",
        }
    }

    /// Textual rendering used in the `value` response field.
    pub fn to_display_string(&self) -> String {
        match self {
            Self::Null => "null".to_string(),
            Self::Boolean(v) => v.to_string(),
            Self::Unsigned(v) => v.to_string(),
            Self::Signed(v) => v.to_string(),
            Self::Real(v) => v.to_string(),
            Self::Double(v) => v.to_string(),
            Self::OctetString(v) => v.iter().map(|b| format!("{b:02X}")).collect(),
            Self::CharacterString(v) => v.clone(),
            Self::BitString { unused_bits, data } => {
                // A peer may claim more unused bits than the data holds.
                let total_bits = (data.len() * 8).saturating_sub(*unused_bits as usize);
                (0..total_bits)
                    .map(|i| {
                        let bit = (data[i / 8] >> (7 - (i % 8))) & 0x01;
                        if bit != 0 {
                            '1'
                        } else {
                            '0'
                        }
                    })
                    .collect()
            }
            Self::Enumerated(v) => v.to_string(),
            Self::Date(v) => format!("{}/{}/{}", 1900 + v.year_since_1900 as u16, v.month, v.day),
            Self::Time(v) => {
                format!("{:02}:{:02}:{:02}.{:02}", v.hour, v.minute, v.second, v.hundredths)
            }
            Self::ObjectId(v) => {
                format!("{}:{}", object_type_label(v.object_type()), v.instance())
            }
            Self::Constructed { values, .. } => {
                let inner: Vec<String> = values.iter().map(Self::to_display_string).collect();
                format!("{{{}}}", inner.join(","))
            }
        }
    }

    /// Builds a value from a command parameter, honoring an optional
    /// `datatype` hint. Without a hint the JSON type decides: integers map
    /// to unsigned/signed, fractions to real.
    pub fn from_json(value: &serde_json::Value, datatype: Option<&str>) -> Option<Self> {
        if let Some(hint) = datatype {
            return match hint.to_ascii_lowercase().as_str() {
                "null" => Some(Self::Null),
                "boolean" | "bool" => match value {
                    serde_json::Value::Bool(b) => Some(Self::Boolean(*b)),
                    other => Some(Self::Boolean(other.as_u64()? != 0)),
                },
                "unsigned" => Some(Self::Unsigned(u32::try_from(value.as_u64()?).ok()?)),
                "signed" => Some(Self::Signed(i32::try_from(value.as_i64()?).ok()?)),
                "real" | "float" => Some(Self::Real(value.as_f64()? as f32)),
                "double" => Some(Self::Double(value.as_f64()?)),
                "character-string" | "string" => {
                    Some(Self::CharacterString(value.as_str()?.to_string()))
                }
                "enumerated" => Some(Self::Enumerated(u32::try_from(value.as_u64()?).ok()?)),
                "object-id" => Some(Self::ObjectId(parse_object_identifier(value.as_str()?)?)),
                _ => None,
            };
        }

        match value {
            serde_json::Value::Null => Some(Self::Null),
            serde_json::Value::Bool(b) => Some(Self::Boolean(*b)),
            serde_json::Value::Number(n) => {
                if let Some(u) = n.as_u64() {
                    Some(Self::Unsigned(u32::try_from(u).ok()?))
                } else if let Some(i) = n.as_i64() {
                    Some(Self::Signed(i32::try_from(i).ok()?))
                } else {
                    Some(Self::Real(n.as_f64()? as f32))
                }
            }
            serde_json::Value::String(s) => Some(Self::CharacterString(s.clone())),
            _ => None,
        }
    }
}

/// Parses an object identifier in the `"analog-input:1"` command notation.
pub fn parse_object_identifier(s: &str) -> Option<ObjectId> {
    let (type_str, instance_str) = s.rsplit_once(':')?;
    let object_type = ObjectType::from_name(type_str)?;
    let instance: u32 = instance_str.parse().ok()?;
    if instance > bacpipe_core::MAX_DEVICE_INSTANCE {
        return None;
    }
    Some(ObjectId::new(object_type, instance))
}

#[cfg(test)]
mod tests {
    use super::{parse_object_identifier, ClientDataValue};
    use bacpipe_core::types::{DataValue, ObjectId, ObjectType};

    #[test]
    fn real_value_display() {
        let v = ClientDataValue::from_wire(DataValue::Real(21.5));
        assert_eq!(v.to_display_string(), "21.5");
        assert_eq!(v.datatype_name(), "REAL");
    }

    #[test]
    fn object_id_display() {
        let v = ClientDataValue::ObjectId(ObjectId::new(ObjectType::AnalogInput, 1));
        assert_eq!(v.to_display_string(), "analog-input:1");
    }

    #[test]
    fn parse_object_identifier_notation() {
        let id = parse_object_identifier("analog-input:7").unwrap();
        assert_eq!(id.object_type(), ObjectType::AnalogInput);
        assert_eq!(id.instance(), 7);
        assert!(parse_object_identifier("nonsense").is_none());
        assert!(parse_object_identifier("analog-input:not-a-number").is_none());
    }

    #[test]
    fn from_json_with_hint() {
        let v = ClientDataValue::from_json(&serde_json::json!(21.5), Some("real")).unwrap();
        assert_eq!(v, ClientDataValue::Real(21.5));
        let v = ClientDataValue::from_json(&serde_json::json!(1), Some("boolean")).unwrap();
        assert_eq!(v, ClientDataValue::Boolean(true));
    }

    #[test]
    fn from_json_inferred() {
        assert_eq!(
            ClientDataValue::from_json(&serde_json::json!(42), None).unwrap(),
            ClientDataValue::Unsigned(42)
        );
        assert_eq!(
            ClientDataValue::from_json(&serde_json::json!(-3), None).unwrap(),
            ClientDataValue::Signed(-3)
        );
        assert_eq!(
            ClientDataValue::from_json(&serde_json::json!(0.5), None).unwrap(),
            ClientDataValue::Real(0.5)
        );
    }

    #[test]
    fn bit_string_display() {
        let v = ClientDataValue::BitString {
            unused_bits: 5,
            data: vec![0b1010_0000],
        };
        assert_eq!(v.to_display_string(), "101");
    }

    #[test]
    fn bit_string_with_more_unused_bits_than_data_renders_empty() {
        // Wire-valid frame: length 1, zero data octets, 5 unused bits.
        let v = ClientDataValue::BitString {
            unused_bits: 5,
            data: Vec::new(),
        };
        assert_eq!(v.to_display_string(), "");
    }
}
