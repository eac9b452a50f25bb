use crate::apdu::ConfirmedRequestHeader;
use crate::encoding::{
    primitives::{decode_unsigned, encode_ctx_object_id, encode_ctx_unsigned},
    reader::Reader,
    tag::Tag,
    writer::Writer,
};
use crate::services::{decode_required_ctx_object_id, decode_required_ctx_unsigned};
use crate::types::ObjectId;
use crate::{DecodeError, EncodeError};

pub const SERVICE_SUBSCRIBE_COV: u8 = 0x05;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscribeCovRequest {
    pub subscriber_process_id: u32,
    pub monitored_object_id: ObjectId,
    pub issue_confirmed_notifications: Option<bool>,
    pub lifetime_seconds: Option<u32>,
    pub invoke_id: u8,
}

impl SubscribeCovRequest {
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
            service_choice: SERVICE_SUBSCRIBE_COV,
        }
        .encode(w)?;

        encode_ctx_unsigned(w, 0, self.subscriber_process_id)?;
        encode_ctx_object_id(w, 1, self.monitored_object_id.raw())?;
        if let Some(issue_confirmed) = self.issue_confirmed_notifications {
            Tag::Context { tag_num: 2, len: 1 }.encode(w)?;
            w.write_u8(if issue_confirmed { 1 } else { 0 })?;
        }
        if let Some(lifetime_seconds) = self.lifetime_seconds {
            encode_ctx_unsigned(w, 3, lifetime_seconds)?;
        }
        Ok(())
    }

    /// A request with neither notification kind nor lifetime cancels the
    /// matching subscription.
    pub fn cancel(
        subscriber_process_id: u32,
        monitored_object_id: ObjectId,
        invoke_id: u8,
    ) -> Self {
        Self {
            subscriber_process_id,
            monitored_object_id,
            issue_confirmed_notifications: None,
            lifetime_seconds: None,
            invoke_id,
        }
    }

    pub const fn is_cancellation(&self) -> bool {
        self.issue_confirmed_notifications.is_none() && self.lifetime_seconds.is_none()
    }

    pub fn decode_after_header(r: &mut Reader<'_>, invoke_id: u8) -> Result<Self, DecodeError> {
        let subscriber_process_id = decode_required_ctx_unsigned(r, 0)?;
        let monitored_object_id = decode_required_ctx_object_id(r, 1)?;

        let mut issue_confirmed_notifications = None;
        let mut lifetime_seconds = None;
        if !r.is_empty() {
            match Tag::decode(r)? {
                Tag::Context { tag_num: 2, len } => {
                    issue_confirmed_notifications =
                        Some(decode_unsigned(r, len as usize)? != 0);
                }
                _ => return Err(DecodeError::InvalidTag),
            }
            if !r.is_empty() {
                match Tag::decode(r)? {
                    Tag::Context { tag_num: 3, len } => {
                        lifetime_seconds = Some(decode_unsigned(r, len as usize)?);
                    }
                    _ => return Err(DecodeError::InvalidTag),
                }
            }
        }

        Ok(Self {
            subscriber_process_id,
            monitored_object_id,
            issue_confirmed_notifications,
            lifetime_seconds,
            invoke_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{SubscribeCovRequest, SERVICE_SUBSCRIBE_COV};
    use crate::apdu::ConfirmedRequestHeader;
    use crate::encoding::{reader::Reader, writer::Writer};
    use crate::types::{ObjectId, ObjectType};

    #[test]
    fn encode_subscribe_cov_request() {
        let req = SubscribeCovRequest {
            subscriber_process_id: 7,
            monitored_object_id: ObjectId::new(ObjectType::AnalogInput, 2),
            issue_confirmed_notifications: Some(false),
            lifetime_seconds: Some(600),
            invoke_id: 3,
        };

        let mut buf = [0u8; 64];
        let mut w = Writer::new(&mut buf);
        req.encode(&mut w).unwrap();

        let mut r = Reader::new(w.as_written());
        let header = ConfirmedRequestHeader::decode(&mut r).unwrap();
        assert_eq!(header.invoke_id, 3);
        assert_eq!(header.service_choice, SERVICE_SUBSCRIBE_COV);
        let dec = SubscribeCovRequest::decode_after_header(&mut r, header.invoke_id).unwrap();
        assert_eq!(dec, req);
    }

    #[test]
    fn cancellation_omits_optionals() {
        let req =
            SubscribeCovRequest::cancel(7, ObjectId::new(ObjectType::AnalogInput, 2), 4);
        assert!(req.is_cancellation());

        let mut buf = [0u8; 64];
        let mut w = Writer::new(&mut buf);
        req.encode(&mut w).unwrap();

        let mut r = Reader::new(w.as_written());
        let header = ConfirmedRequestHeader::decode(&mut r).unwrap();
        let dec = SubscribeCovRequest::decode_after_header(&mut r, header.invoke_id).unwrap();
        assert!(dec.is_cancellation());
    }
}
