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

pub const SERVICE_READ_PROPERTY: u8 = 0x0C;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadPropertyRequest {
    pub object_id: ObjectId,
    pub property_id: PropertyId,
    pub array_index: Option<u32>,
    pub invoke_id: u8,
}

impl ReadPropertyRequest {
    pub fn encode(&self, w: &mut Writer<'_>) -> Result<(), EncodeError> {
        ConfirmedRequestHeader {
            segmented: false,
            more_follows: false,
            segmented_response_accepted: true,
            max_segments: 0,
            max_apdu: 5,
            invoke_id: self.invoke_id,
            sequence_number: None,
            proposed_window_size: None,
            service_choice: SERVICE_READ_PROPERTY,
        }
        .encode(w)?;

        encode_ctx_object_id(w, 0, self.object_id.raw())?;
        encode_ctx_unsigned(w, 1, self.property_id.to_u32())?;
        if let Some(idx) = self.array_index {
            encode_ctx_unsigned(w, 2, idx)?;
        }
        Ok(())
    }

    /// Decodes the service payload, after the confirmed-request header has
    /// been consumed. `invoke_id` is taken from the header by the caller.
    pub fn decode_after_header(r: &mut Reader<'_>, invoke_id: u8) -> Result<Self, DecodeError> {
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
        let array_index = if r.is_empty() {
            None
        } else {
            match Tag::decode(r)? {
                Tag::Context { tag_num: 2, len } => Some(decode_unsigned(r, len as usize)?),
                _ => return Err(DecodeError::InvalidTag),
            }
        };
        Ok(Self {
            object_id,
            property_id,
            array_index,
            invoke_id,
        })
    }
}

/// A decoded ReadProperty acknowledgment.
///
/// Most properties carry a single application value; whole-array reads such
/// as object-list carry one value per element, so `values` is a list.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadPropertyAck<'a> {
    pub object_id: ObjectId,
    pub property_id: PropertyId,
    pub array_index: Option<u32>,
    pub values: Vec<DataValue<'a>>,
}

impl<'a> ReadPropertyAck<'a> {
    /// Encodes the ack payload after a [`ComplexAckHeader`](crate::apdu::ComplexAckHeader).
    pub fn encode_after_header(&self, w: &mut Writer<'_>) -> Result<(), EncodeError> {
        encode_ctx_object_id(w, 0, self.object_id.raw())?;
        encode_ctx_unsigned(w, 1, self.property_id.to_u32())?;
        if let Some(idx) = self.array_index {
            encode_ctx_unsigned(w, 2, idx)?;
        }
        encode_opening_tag(w, 3)?;
        for value in &self.values {
            encode_application_data_value(w, value)?;
        }
        encode_closing_tag(w, 3)
    }

    pub fn decode_after_header(r: &mut Reader<'a>) -> Result<Self, DecodeError> {
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

        let mut values = Vec::new();
        loop {
            let checkpoint = *r;
            if let Tag::Closing { tag_num: 3 } = Tag::decode(r)? {
                break;
            }
            *r = checkpoint;
            values.push(decode_application_data_value(r)?);
        }

        Ok(Self {
            object_id,
            property_id,
            array_index,
            values,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{ReadPropertyAck, ReadPropertyRequest};
    use crate::apdu::ConfirmedRequestHeader;
    use crate::encoding::{reader::Reader, writer::Writer};
    use crate::types::{DataValue, ObjectId, ObjectType, PropertyId};

    #[test]
    fn request_roundtrip() {
        let req = ReadPropertyRequest {
            object_id: ObjectId::new(ObjectType::AnalogInput, 4),
            property_id: PropertyId::PresentValue,
            array_index: None,
            invoke_id: 42,
        };
        let mut buf = [0u8; 64];
        let mut w = Writer::new(&mut buf);
        req.encode(&mut w).unwrap();

        let mut r = Reader::new(w.as_written());
        let hdr = ConfirmedRequestHeader::decode(&mut r).unwrap();
        let dec = ReadPropertyRequest::decode_after_header(&mut r, hdr.invoke_id).unwrap();
        assert_eq!(dec, req);
    }

    #[test]
    fn ack_roundtrip() {
        let ack = ReadPropertyAck {
            object_id: ObjectId::new(ObjectType::AnalogInput, 4),
            property_id: PropertyId::PresentValue,
            array_index: None,
            values: vec![DataValue::Real(21.5)],
        };
        let mut buf = [0u8; 64];
        let mut w = Writer::new(&mut buf);
        ack.encode_after_header(&mut w).unwrap();

        let mut r = Reader::new(w.as_written());
        let dec = ReadPropertyAck::decode_after_header(&mut r).unwrap();
        assert_eq!(dec, ack);
    }

    #[test]
    fn ack_with_object_list_values() {
        let ack = ReadPropertyAck {
            object_id: ObjectId::new(ObjectType::Device, 260001),
            property_id: PropertyId::ObjectList,
            array_index: None,
            values: vec![
                DataValue::ObjectId(ObjectId::new(ObjectType::Device, 260001)),
                DataValue::ObjectId(ObjectId::new(ObjectType::AnalogInput, 1)),
                DataValue::ObjectId(ObjectId::new(ObjectType::BinaryOutput, 2)),
            ],
        };
        let mut buf = [0u8; 128];
        let mut w = Writer::new(&mut buf);
        ack.encode_after_header(&mut w).unwrap();

        let mut r = Reader::new(w.as_written());
        let dec = ReadPropertyAck::decode_after_header(&mut r).unwrap();
        assert_eq!(dec.values.len(), 3);
        assert_eq!(dec, ack);
    }

    #[test]
    fn request_with_array_index() {
        let req = ReadPropertyRequest {
            object_id: ObjectId::new(ObjectType::Device, 260001),
            property_id: PropertyId::ObjectList,
            array_index: Some(0),
            invoke_id: 1,
        };
        let mut buf = [0u8; 64];
        let mut w = Writer::new(&mut buf);
        req.encode(&mut w).unwrap();

        let mut r = Reader::new(w.as_written());
        let hdr = ConfirmedRequestHeader::decode(&mut r).unwrap();
        let dec = ReadPropertyRequest::decode_after_header(&mut r, hdr.invoke_id).unwrap();
        assert_eq!(dec.array_index, Some(0));
    }
}
