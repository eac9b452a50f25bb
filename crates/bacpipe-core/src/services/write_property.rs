use crate::apdu::ConfirmedRequestHeader;
use crate::encoding::{
    primitives::{
        decode_unsigned, encode_closing_tag, encode_ctx_object_id, encode_ctx_unsigned,
        encode_opening_tag,
    },
    reader::Reader,
    tag::Tag,
    writer::Writer,
};
use crate::services::value_codec::{decode_application_data_value, encode_application_data_value};
use crate::types::{DataValue, ObjectId, PropertyId};
use crate::{DecodeError, EncodeError};

pub const SERVICE_WRITE_PROPERTY: u8 = 0x0F;

#[derive(Debug, Clone, PartialEq)]
pub struct WritePropertyRequest<'a> {
    pub object_id: ObjectId,
    pub property_id: PropertyId,
    pub value: DataValue<'a>,
    pub array_index: Option<u32>,
    pub priority: Option<u8>,
    pub invoke_id: u8,
}

impl<'a> Default for WritePropertyRequest<'a> {
    fn default() -> Self {
        Self {
            object_id: ObjectId::new(crate::types::ObjectType::AnalogValue, 0),
            property_id: PropertyId::PresentValue,
            value: DataValue::Null,
            array_index: None,
            priority: None,
            invoke_id: 1,
        }
    }
}

impl<'a> WritePropertyRequest<'a> {
    pub fn encode(&self, w: &mut Writer<'_>) -> Result<(), EncodeError> {
        ConfirmedRequestHeader {
            segmented: false,
            more_follows: false,
            segmented_response_accepted: false,
            max_segments: 0,
            max_apdu: 5,
            invoke_id: self.invoke_id,
            sequence_number: None,
            proposed_window_size: None,
            service_choice: SERVICE_WRITE_PROPERTY,
        }
        .encode(w)?;

        encode_ctx_object_id(w, 0, self.object_id.raw())?;
        encode_ctx_unsigned(w, 1, self.property_id.to_u32())?;
        if let Some(idx) = self.array_index {
            encode_ctx_unsigned(w, 2, idx)?;
        }

        encode_opening_tag(w, 3)?;
        encode_application_data_value(w, &self.value)?;
        encode_closing_tag(w, 3)?;

        if let Some(priority) = self.priority {
            encode_ctx_unsigned(w, 4, priority as u32)?;
        }
        Ok(())
    }

    /// Decodes the service payload, after the confirmed-request header has
    /// been consumed. The value borrows from the frame buffer.
    pub fn decode_after_header(r: &mut Reader<'a>, invoke_id: u8) -> Result<Self, DecodeError> {
        let object_id = match Tag::decode(r)? {
            Tag::Context { tag_num: 0, len } => {
                ObjectId::from_raw(decode_unsigned(r, len as usize)?)
            }
            _ => return Err(DecodeError::InvalidTag),
        };
        let property_id = match Tag::decode(r)? {
            Tag::Context { tag_num: 1, len } => {
                PropertyId::from_u32(decode_unsigned(r, len as usize)?)
            }
            _ => return Err(DecodeError::InvalidTag),
        };

        let next = Tag::decode(r)?;
        let (array_index, value_start_tag) = match next {
            Tag::Context { tag_num: 2, len } => {
                let idx = decode_unsigned(r, len as usize)?;
                (Some(idx), Tag::decode(r)?)
            }
            other => (None, other),
        };

        if value_start_tag != (Tag::Opening { tag_num: 3 }) {
            return Err(DecodeError::InvalidTag);
        }
        let value = decode_application_data_value(r)?;
        match Tag::decode(r)? {
            Tag::Closing { tag_num: 3 } => {}
            _ => return Err(DecodeError::InvalidTag),
        }

        let priority = if r.is_empty() {
            None
        } else {
            match Tag::decode(r)? {
                Tag::Context { tag_num: 4, len } => {
                    Some(decode_unsigned(r, len as usize)? as u8)
                }
                _ => return Err(DecodeError::InvalidTag),
            }
        };

        Ok(Self {
            object_id,
            property_id,
            value,
            array_index,
            priority,
            invoke_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{WritePropertyRequest, SERVICE_WRITE_PROPERTY};
    use crate::apdu::ConfirmedRequestHeader;
    use crate::encoding::{reader::Reader, writer::Writer};
    use crate::types::{DataValue, ObjectId, ObjectType, PropertyId};

    #[test]
    fn encode_write_property_with_character_string() {
        let req = WritePropertyRequest {
            object_id: ObjectId::new(ObjectType::AnalogValue, 3),
            property_id: PropertyId::Description,
            value: DataValue::CharacterString("loop tuning pending"),
            priority: None,
            ..Default::default()
        };

        let mut buf = [0u8; 256];
        let mut w = Writer::new(&mut buf);
        req.encode(&mut w).unwrap();

        let mut r = Reader::new(w.as_written());
        let hdr = ConfirmedRequestHeader::decode(&mut r).unwrap();
        assert_eq!(hdr.service_choice, SERVICE_WRITE_PROPERTY);
    }

    #[test]
    fn write_property_roundtrip_with_priority() {
        let req = WritePropertyRequest {
            object_id: ObjectId::new(ObjectType::AnalogOutput, 7),
            property_id: PropertyId::PresentValue,
            value: DataValue::Real(72.5),
            array_index: None,
            priority: Some(8),
            invoke_id: 11,
        };

        let mut buf = [0u8; 64];
        let mut w = Writer::new(&mut buf);
        req.encode(&mut w).unwrap();

        let mut r = Reader::new(w.as_written());
        let hdr = ConfirmedRequestHeader::decode(&mut r).unwrap();
        let dec = WritePropertyRequest::decode_after_header(&mut r, hdr.invoke_id).unwrap();
        assert_eq!(dec, req);
    }
}
