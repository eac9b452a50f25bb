use crate::apdu::ConfirmedRequestHeader;
use crate::encoding::{
    primitives::{decode_unsigned, encode_ctx_object_id, encode_ctx_unsigned},
    reader::Reader,
    tag::Tag,
    writer::Writer,
};
use crate::services::value_codec::decode_application_data_value_from_tag;
use crate::types::{DataValue, ObjectId, PropertyId};
use crate::{DecodeError, EncodeError};

pub const SERVICE_READ_PROPERTY_MULTIPLE: u8 = 0x0E;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertyReference {
    pub property_id: PropertyId,
    pub array_index: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadAccessSpecification<'a> {
    pub object_id: ObjectId,
    pub properties: &'a [PropertyReference],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadPropertyMultipleRequest<'a> {
    pub specs: &'a [ReadAccessSpecification<'a>],
    pub invoke_id: u8,
}

impl<'a> ReadPropertyMultipleRequest<'a> {
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
            service_choice: SERVICE_READ_PROPERTY_MULTIPLE,
        }
        .encode(w)?;

        for spec in self.specs {
            encode_ctx_object_id(w, 0, spec.object_id.raw())?;
            Tag::Opening { tag_num: 1 }.encode(w)?;
            for prop in spec.properties {
                encode_ctx_unsigned(w, 0, prop.property_id.to_u32())?;
                if let Some(idx) = prop.array_index {
                    encode_ctx_unsigned(w, 1, idx)?;
                }
            }
            Tag::Closing { tag_num: 1 }.encode(w)?;
        }

        Ok(())
    }
}

/// Outcome of one property access within a ReadPropertyMultiple ack. A device
/// that cannot serve a property returns its error inline instead of failing
/// the whole request.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadResult<'a> {
    Value(DataValue<'a>),
    Error { error_class: u32, error_code: u32 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReadResultElement<'a> {
    pub property_id: PropertyId,
    pub array_index: Option<u32>,
    pub result: ReadResult<'a>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReadAccessResult<'a> {
    pub object_id: ObjectId,
    pub results: Vec<ReadResultElement<'a>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReadPropertyMultipleAck<'a> {
    pub results: Vec<ReadAccessResult<'a>>,
}

impl<'a> ReadPropertyMultipleAck<'a> {
    pub fn decode_after_header(r: &mut Reader<'a>) -> Result<Self, DecodeError> {
        let mut all_results = Vec::new();

        while !r.is_empty() {
            let object_id = match Tag::decode(r)? {
                Tag::Context { tag_num: 0, len } => {
                    ObjectId::from_raw(decode_unsigned(r, len as usize)?)
                }
                _ => return Err(DecodeError::InvalidTag),
            };

            match Tag::decode(r)? {
                Tag::Opening { tag_num: 1 } => {}
                _ => return Err(DecodeError::InvalidTag),
            }

            let mut elements = Vec::new();
            loop {
                let tag = Tag::decode(r)?;
                if tag == (Tag::Closing { tag_num: 1 }) {
                    break;
                }

                let property_id = match tag {
                    Tag::Context { tag_num: 2, len } => {
                        PropertyId::from_u32(decode_unsigned(r, len as usize)?)
                    }
                    _ => return Err(DecodeError::InvalidTag),
                };

                let next = Tag::decode(r)?;
                let (array_index, read_result_open) = match next {
                    Tag::Context { tag_num: 3, len } => {
                        let idx = decode_unsigned(r, len as usize)?;
                        (Some(idx), Tag::decode(r)?)
                    }
                    other => (None, other),
                };

                let result = match read_result_open {
                    Tag::Opening { tag_num: 4 } => {
                        let value_tag = Tag::decode(r)?;
                        let value = decode_application_data_value_from_tag(r, value_tag)?;
                        match Tag::decode(r)? {
                            Tag::Closing { tag_num: 4 } => {}
                            _ => return Err(DecodeError::InvalidTag),
                        }
                        ReadResult::Value(value)
                    }
                    Tag::Opening { tag_num: 5 } => {
                        // Property access error block with errorClass [0] and
                        // errorCode [1], both context or application enumerated.
                        let error_class = decode_access_error_value(r, 0)?;
                        let error_code = decode_access_error_value(r, 1)?;
                        match Tag::decode(r)? {
                            Tag::Closing { tag_num: 5 } => {}
                            _ => return Err(DecodeError::InvalidTag),
                        }
                        ReadResult::Error {
                            error_class,
                            error_code,
                        }
                    }
                    _ => return Err(DecodeError::InvalidTag),
                };

                elements.push(ReadResultElement {
                    property_id,
                    array_index,
                    result,
                });
            }

            all_results.push(ReadAccessResult {
                object_id,
                results: elements,
            });
        }

        Ok(Self {
            results: all_results,
        })
    }
}

fn decode_access_error_value(
    r: &mut Reader<'_>,
    expected_ctx_tag: u8,
) -> Result<u32, DecodeError> {
    use crate::encoding::tag::AppTag;
    match Tag::decode(r)? {
        Tag::Context { tag_num, len } if tag_num == expected_ctx_tag => {
            decode_unsigned(r, len as usize)
        }
        Tag::Application {
            tag: AppTag::Enumerated,
            len,
        } => decode_unsigned(r, len as usize),
        _ => Err(DecodeError::InvalidTag),
    }
}
