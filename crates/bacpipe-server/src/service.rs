//! BACnet-side responder. Answers Who-Is with an I-Am, serves
//! ReadProperty and WriteProperty from the registry, tracks COV
//! subscribers, and sends unconfirmed COV notifications when a present
//! value changes.

use std::sync::Arc;

use log::{debug, info, trace, warn};

use bacpipe_core::apdu::{
    ApduType, BacnetError, ComplexAckHeader, ConfirmedRequestHeader, RejectPdu, SimpleAck,
    UnconfirmedRequestHeader,
};
use bacpipe_core::encoding::{reader::Reader, writer::Writer};
use bacpipe_core::npdu::Npdu;
use bacpipe_core::services::cov_notification::{
    CovNotificationRequest, CovPropertyValue, SERVICE_UNCONFIRMED_COV_NOTIFICATION,
};
use bacpipe_core::services::i_am::IAmRequest;
use bacpipe_core::services::read_property::{
    ReadPropertyAck, ReadPropertyRequest, SERVICE_READ_PROPERTY,
};
use bacpipe_core::services::subscribe_cov::{SubscribeCovRequest, SERVICE_SUBSCRIBE_COV};
use bacpipe_core::services::time_synchronization::{
    TimeSynchronizationRequest, SERVICE_TIME_SYNCHRONIZATION, SERVICE_UTC_TIME_SYNCHRONIZATION,
};
use bacpipe_core::services::who_is::{WhoIsRequest, SERVICE_WHO_IS};
use bacpipe_core::services::write_property::{WritePropertyRequest, SERVICE_WRITE_PROPERTY};
use bacpipe_core::types::{
    DataValue, ErrorClass, ErrorCode, ObjectId, ObjectType, PropertyId, RejectReason, Segmentation,
};
use bacpipe_core::DecodeError;
use bacpipe_datalink::{DataLink, DataLinkAddress};

use crate::cov::CovSubscriber;
use crate::error::ServerError;
use crate::objects::PresentValue;
use crate::state::ServerState;

const RECV_BUF_LEN: usize = 1600;
const REPLY_BUF_LEN: usize = 1476;

pub const VENDOR_ID: u32 = 260;

/// A property value owned by the responder while it encodes a reply.
enum OwnedValue {
    Text(String),
    Object(ObjectId),
    Unsigned(u32),
    Present(PresentValue),
}

impl OwnedValue {
    fn as_wire(&self) -> DataValue<'_> {
        match self {
            Self::Text(s) => DataValue::CharacterString(s),
            Self::Object(id) => DataValue::ObjectId(*id),
            Self::Unsigned(v) => DataValue::Unsigned(*v),
            Self::Present(v) => v.as_wire(),
        }
    }
}

type ReadOutcome = Result<Vec<OwnedValue>, (ErrorClass, ErrorCode)>;

pub struct Responder<D: DataLink> {
    datalink: D,
    state: Arc<ServerState>,
    bacnet_port: u16,
}

impl<D: DataLink> Responder<D> {
    pub fn new(datalink: D, state: Arc<ServerState>, bacnet_port: u16) -> Self {
        Self {
            datalink,
            state,
            bacnet_port,
        }
    }

    /// Announces the device, then serves frames until the datalink
    /// fails permanently. Malformed frames are logged and dropped.
    pub async fn run(self) {
        if let Err(err) = self.send_i_am().await {
            warn!("startup I-Am failed: {err}");
        }

        let mut buf = [0u8; RECV_BUF_LEN];
        loop {
            let (n, src) = match self.datalink.recv(&mut buf).await {
                Ok(frame) => frame,
                Err(err) => {
                    warn!("datalink receive failed: {err}");
                    continue;
                }
            };
            if let Err(err) = self.handle_frame(&buf[..n], src).await {
                debug!("dropping frame from {src}: {err}");
            }
        }
    }

    async fn handle_frame(&self, frame: &[u8], src: DataLinkAddress) -> Result<(), ServerError> {
        let mut r = Reader::new(frame);
        let npdu = Npdu::decode(&mut r)?;
        if npdu.is_network_message() {
            trace!("ignoring network-layer message from {src}");
            return Ok(());
        }

        let apdu_type = ApduType::from_u8(r.peek_u8()? >> 4).ok_or(DecodeError::InvalidValue)?;
        match apdu_type {
            ApduType::UnconfirmedRequest => self.handle_unconfirmed(&mut r, src).await,
            ApduType::ConfirmedRequest => self.handle_confirmed(&mut r, src).await,
            other => {
                trace!("ignoring {other:?} from {src}");
                Ok(())
            }
        }
    }

    async fn handle_unconfirmed(
        &self,
        r: &mut Reader<'_>,
        src: DataLinkAddress,
    ) -> Result<(), ServerError> {
        let header = UnconfirmedRequestHeader::decode(r)?;
        match header.service_choice {
            SERVICE_WHO_IS => {
                let whois = WhoIsRequest::decode_after_header(r)?;
                if whois.matches(self.state.registry.device_id().await) {
                    debug!("Who-Is from {src} matches, announcing");
                    self.send_i_am().await?;
                }
                Ok(())
            }
            SERVICE_TIME_SYNCHRONIZATION | SERVICE_UTC_TIME_SYNCHRONIZATION => {
                let sync = TimeSynchronizationRequest::decode_after_header(r)?;
                let kind = if header.service_choice == SERVICE_UTC_TIME_SYNCHRONIZATION {
                    "UTC time"
                } else {
                    "local time"
                };
                info!(
                    "{kind} synchronization from {src}: {}/{}/{} {:02}:{:02}:{:02}",
                    1900 + u32::from(sync.date.year_since_1900),
                    sync.date.month,
                    sync.date.day,
                    sync.time.hour,
                    sync.time.minute,
                    sync.time.second
                );
                Ok(())
            }
            other => {
                trace!("ignoring unconfirmed service 0x{other:02x} from {src}");
                Ok(())
            }
        }
    }

    async fn handle_confirmed(
        &self,
        r: &mut Reader<'_>,
        src: DataLinkAddress,
    ) -> Result<(), ServerError> {
        let header = ConfirmedRequestHeader::decode(r)?;
        match header.service_choice {
            SERVICE_READ_PROPERTY => {
                let req = ReadPropertyRequest::decode_after_header(r, header.invoke_id)?;
                self.reply_read_property(&req, src).await
            }
            SERVICE_WRITE_PROPERTY => {
                let req = WritePropertyRequest::decode_after_header(r, header.invoke_id)?;
                self.reply_write_property(&req, src).await
            }
            SERVICE_SUBSCRIBE_COV => {
                let req = SubscribeCovRequest::decode_after_header(r, header.invoke_id)?;
                self.reply_subscribe_cov(&req, src).await
            }
            other => {
                debug!("rejecting unsupported confirmed service 0x{other:02x} from {src}");
                let mut buf = [0u8; 32];
                let mut w = Writer::new(&mut buf);
                Npdu::application().encode(&mut w)?;
                RejectPdu {
                    invoke_id: header.invoke_id,
                    reason: RejectReason::UnrecognizedService.to_u8(),
                }
                .encode(&mut w)?;
                self.datalink.send(src, w.as_written()).await?;
                Ok(())
            }
        }
    }

    async fn reply_read_property(
        &self,
        req: &ReadPropertyRequest,
        src: DataLinkAddress,
    ) -> Result<(), ServerError> {
        let outcome = self
            .serve_read(req.object_id, req.property_id, req.array_index)
            .await;

        let mut buf = [0u8; REPLY_BUF_LEN];
        let mut w = Writer::new(&mut buf);
        Npdu::application().encode(&mut w)?;
        match outcome {
            Ok(values) => {
                ComplexAckHeader {
                    segmented: false,
                    more_follows: false,
                    invoke_id: req.invoke_id,
                    sequence_number: None,
                    proposed_window_size: None,
                    service_choice: SERVICE_READ_PROPERTY,
                }
                .encode(&mut w)?;
                ReadPropertyAck {
                    object_id: req.object_id,
                    property_id: req.property_id,
                    array_index: req.array_index,
                    values: values.iter().map(OwnedValue::as_wire).collect(),
                }
                .encode_after_header(&mut w)?;
            }
            Err((class, code)) => {
                BacnetError {
                    invoke_id: req.invoke_id,
                    service_choice: SERVICE_READ_PROPERTY,
                    error_class: Some(class.to_u32()),
                    error_code: Some(code.to_u32()),
                }
                .encode(&mut w)?;
            }
        }
        self.datalink.send(src, w.as_written()).await?;
        Ok(())
    }

    /// Serves object-name, object-identifier, present-value, and the
    /// device's object-list (index 0 is the element count).
    async fn serve_read(
        &self,
        object_id: ObjectId,
        property_id: PropertyId,
        array_index: Option<u32>,
    ) -> ReadOutcome {
        let device_oid = self.state.registry.device_object_id().await;
        if object_id == device_oid {
            return match property_id {
                PropertyId::ObjectName => Ok(vec![OwnedValue::Text(
                    self.state.registry.device_name().await,
                )]),
                PropertyId::ObjectIdentifier => Ok(vec![OwnedValue::Object(device_oid)]),
                PropertyId::ObjectList => {
                    let mut list = vec![device_oid];
                    list.extend(self.state.registry.object_ids().await);
                    list.extend(self.state.trendlogs.object_ids().await);
                    match array_index {
                        Some(0) => Ok(vec![OwnedValue::Unsigned(list.len() as u32)]),
                        Some(i) => list
                            .get(i as usize - 1)
                            .map(|id| vec![OwnedValue::Object(*id)])
                            .ok_or((ErrorClass::Property, ErrorCode::ValueOutOfRange)),
                        None => Ok(list.into_iter().map(OwnedValue::Object).collect()),
                    }
                }
                _ => Err((ErrorClass::Property, ErrorCode::UnknownProperty)),
            };
        }

        if object_id.object_type() == ObjectType::TrendLog {
            let Some(summary) = self.state.trendlogs.detail(object_id.instance()).await else {
                return Err((ErrorClass::Object, ErrorCode::UnknownObject));
            };
            return match property_id {
                PropertyId::ObjectName => Ok(vec![OwnedValue::Text(summary.name)]),
                PropertyId::ObjectIdentifier => Ok(vec![OwnedValue::Object(object_id)]),
                _ => Err((ErrorClass::Property, ErrorCode::UnknownProperty)),
            };
        }

        let Some(object) = self.state.registry.find(object_id).await else {
            return Err((ErrorClass::Object, ErrorCode::UnknownObject));
        };
        match property_id {
            PropertyId::ObjectName => Ok(vec![OwnedValue::Text(object.name)]),
            PropertyId::ObjectIdentifier => Ok(vec![OwnedValue::Object(object_id)]),
            PropertyId::PresentValue => Ok(vec![OwnedValue::Present(object.present_value)]),
            _ => Err((ErrorClass::Property, ErrorCode::UnknownProperty)),
        }
    }

    async fn reply_write_property(
        &self,
        req: &WritePropertyRequest<'_>,
        src: DataLinkAddress,
    ) -> Result<(), ServerError> {
        let outcome = if req.property_id == PropertyId::PresentValue {
            self.state
                .registry
                .write_present_value(req.object_id, &req.value)
                .await
        } else if self.state.registry.find(req.object_id).await.is_some() {
            Err((ErrorClass::Property, ErrorCode::UnknownProperty))
        } else {
            Err((ErrorClass::Object, ErrorCode::UnknownObject))
        };

        let mut buf = [0u8; 64];
        let mut w = Writer::new(&mut buf);
        Npdu::application().encode(&mut w)?;
        match outcome {
            Ok(changed) => {
                SimpleAck {
                    invoke_id: req.invoke_id,
                    service_choice: SERVICE_WRITE_PROPERTY,
                }
                .encode(&mut w)?;
                self.datalink.send(src, w.as_written()).await?;
                if let Some(new_value) = changed {
                    self.state.mark_dirty();
                    self.notify_cov(req.object_id, new_value).await;
                }
                Ok(())
            }
            Err((class, code)) => {
                BacnetError {
                    invoke_id: req.invoke_id,
                    service_choice: SERVICE_WRITE_PROPERTY,
                    error_class: Some(class.to_u32()),
                    error_code: Some(code.to_u32()),
                }
                .encode(&mut w)?;
                self.datalink.send(src, w.as_written()).await?;
                Ok(())
            }
        }
    }

    async fn reply_subscribe_cov(
        &self,
        req: &SubscribeCovRequest,
        src: DataLinkAddress,
    ) -> Result<(), ServerError> {
        let outcome: Result<(), (ErrorClass, ErrorCode)> = if req.is_cancellation() {
            self.state
                .subscribers
                .remove(req.subscriber_process_id, req.monitored_object_id, src)
                .await;
            Ok(())
        } else if self
            .state
            .registry
            .find(req.monitored_object_id)
            .await
            .is_some()
        {
            self.state
                .subscribers
                .upsert(
                    req.subscriber_process_id,
                    req.monitored_object_id,
                    src,
                    req.lifetime_seconds.unwrap_or(0),
                )
                .await;
            info!(
                "COV subscription from {src} on {:?} (lifetime {}s)",
                req.monitored_object_id,
                req.lifetime_seconds.unwrap_or(0)
            );
            Ok(())
        } else {
            Err((ErrorClass::Object, ErrorCode::UnknownObject))
        };

        let mut buf = [0u8; 32];
        let mut w = Writer::new(&mut buf);
        Npdu::application().encode(&mut w)?;
        match outcome {
            Ok(()) => SimpleAck {
                invoke_id: req.invoke_id,
                service_choice: SERVICE_SUBSCRIBE_COV,
            }
            .encode(&mut w)?,
            Err((class, code)) => BacnetError {
                invoke_id: req.invoke_id,
                service_choice: SERVICE_SUBSCRIBE_COV,
                error_class: Some(class.to_u32()),
                error_code: Some(code.to_u32()),
            }
            .encode(&mut w)?,
        }
        self.datalink.send(src, w.as_written()).await?;
        Ok(())
    }

    async fn notify_cov(&self, object_id: ObjectId, value: PresentValue) {
        let subscribers = self.state.subscribers.for_object(object_id).await;
        if subscribers.is_empty() {
            return;
        }
        let device_oid = self.state.registry.device_object_id().await;
        for sub in subscribers {
            if let Err(err) = self.send_notification(device_oid, object_id, value, &sub).await {
                warn!("COV notification to {} failed: {err}", sub.address);
            }
        }
    }

    async fn send_notification(
        &self,
        device_oid: ObjectId,
        object_id: ObjectId,
        value: PresentValue,
        sub: &CovSubscriber,
    ) -> Result<(), ServerError> {
        let time_remaining = if sub.lifetime_seconds == 0 {
            0
        } else {
            sub.lifetime_seconds
                .saturating_sub(sub.created.elapsed().as_secs() as u32)
        };

        let mut buf = [0u8; 256];
        let mut w = Writer::new(&mut buf);
        Npdu::application().encode(&mut w)?;
        UnconfirmedRequestHeader {
            service_choice: SERVICE_UNCONFIRMED_COV_NOTIFICATION,
        }
        .encode(&mut w)?;
        CovNotificationRequest {
            subscriber_process_id: sub.process_id,
            initiating_device_id: device_oid,
            monitored_object_id: object_id,
            time_remaining_seconds: time_remaining,
            values: vec![CovPropertyValue {
                property_id: PropertyId::PresentValue,
                array_index: None,
                value: value.as_wire(),
                priority: None,
            }],
        }
        .encode_after_header(&mut w)?;
        self.datalink.send(sub.address, w.as_written()).await?;
        Ok(())
    }

    async fn send_i_am(&self) -> Result<(), ServerError> {
        let device_oid = self.state.registry.device_object_id().await;
        let mut buf = [0u8; 64];
        let mut w = Writer::new(&mut buf);
        Npdu::application().encode(&mut w)?;
        IAmRequest {
            device_id: device_oid,
            max_apdu: REPLY_BUF_LEN as u32,
            segmentation: Segmentation::NoSegmentation.to_u32(),
            vendor_id: VENDOR_ID,
        }
        .encode(&mut w)?;
        self.datalink
            .send(
                DataLinkAddress::local_broadcast(self.bacnet_port),
                w.as_written(),
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::Responder;
    use crate::config::ServerConfig;
    use crate::state::ServerState;
    use crate::testutil::{test_addr, ChannelDataLink};
    use bacpipe_core::apdu::{
        BacnetError, ComplexAckHeader, RejectPdu, SimpleAck, UnconfirmedRequestHeader,
    };
    use bacpipe_core::encoding::{reader::Reader, writer::Writer};
    use bacpipe_core::npdu::Npdu;
    use bacpipe_core::services::cov_notification::CovNotificationRequest;
    use bacpipe_core::services::i_am::IAmRequest;
    use bacpipe_core::services::read_property::{ReadPropertyAck, ReadPropertyRequest};
    use bacpipe_core::services::subscribe_cov::SubscribeCovRequest;
    use bacpipe_core::services::who_is::WhoIsRequest;
    use bacpipe_core::services::write_property::WritePropertyRequest;
    use bacpipe_core::types::{DataValue, ObjectId, ObjectType, PropertyId};
    use bacpipe_datalink::DataLink;
    use std::sync::Arc;
    use std::time::Duration;

    fn sample_config() -> ServerConfig {
        ServerConfig::parse(
            r#"{
                "deviceId": 260001,
                "deviceName": "bacnetStackServer",
                "objects": [
                    {"type": "analog-input", "instance": 1, "name": "temp", "presentValue": 21.5},
                    {"type": "analog-value", "instance": 2, "presentValue": 50.0},
                    {"type": "trendlog", "instance": 1, "source": "analog-input:1"}
                ]
            }"#,
        )
        .unwrap()
    }

    async fn spawn_responder() -> (Arc<ServerState>, ChannelDataLink) {
        let (local, remote) = ChannelDataLink::pair(test_addr(1), test_addr(10));
        let state = Arc::new(ServerState::new(260001, "bacnetStackServer", None));
        state.apply_config(&sample_config()).await.unwrap();
        tokio::spawn(Responder::new(local, state.clone(), 47808).run());

        // Consume the startup I-Am announcement.
        let frame = recv_frame(&remote).await;
        let mut r = Reader::new(&frame);
        Npdu::decode(&mut r).unwrap();
        UnconfirmedRequestHeader::decode(&mut r).unwrap();
        let iam = IAmRequest::decode_after_header(&mut r).unwrap();
        assert_eq!(iam.device_id.instance(), 260001);

        (state, remote)
    }

    async fn recv_frame(remote: &ChannelDataLink) -> Vec<u8> {
        let mut buf = [0u8; 1600];
        let (n, _) = tokio::time::timeout(Duration::from_secs(1), remote.recv(&mut buf))
            .await
            .unwrap()
            .unwrap();
        buf[..n].to_vec()
    }

    async fn send_frame<F>(remote: &ChannelDataLink, npdu: Npdu, build: F)
    where
        F: FnOnce(&mut Writer<'_>),
    {
        let mut buf = [0u8; 512];
        let mut w = Writer::new(&mut buf);
        npdu.encode(&mut w).unwrap();
        build(&mut w);
        remote.send(test_addr(1), w.as_written()).await.unwrap();
    }

    #[tokio::test]
    async fn who_is_in_range_is_answered() {
        let (_state, remote) = spawn_responder().await;
        send_frame(&remote, Npdu::application(), |w| {
            WhoIsRequest {
                low_limit: Some(260000),
                high_limit: Some(260010),
            }
            .encode(w)
            .unwrap();
        })
        .await;

        let frame = recv_frame(&remote).await;
        let mut r = Reader::new(&frame);
        Npdu::decode(&mut r).unwrap();
        UnconfirmedRequestHeader::decode(&mut r).unwrap();
        let iam = IAmRequest::decode_after_header(&mut r).unwrap();
        assert_eq!(iam.device_id.instance(), 260001);
        assert_eq!(iam.vendor_id, 260);
    }

    #[tokio::test]
    async fn who_is_out_of_range_is_ignored() {
        let (_state, remote) = spawn_responder().await;
        send_frame(&remote, Npdu::application(), |w| {
            WhoIsRequest {
                low_limit: Some(1),
                high_limit: Some(5),
            }
            .encode(w)
            .unwrap();
        })
        .await;

        // A global Who-Is afterwards is answered; the reply must be for
        // it, proving the ranged one produced nothing.
        send_frame(&remote, Npdu::application(), |w| {
            WhoIsRequest::global().encode(w).unwrap();
        })
        .await;
        let frame = recv_frame(&remote).await;
        let mut r = Reader::new(&frame);
        Npdu::decode(&mut r).unwrap();
        UnconfirmedRequestHeader::decode(&mut r).unwrap();
        IAmRequest::decode_after_header(&mut r).unwrap();
        assert_eq!(remote.destinations().len(), 2);
    }

    #[tokio::test]
    async fn read_property_serves_present_value_and_name() {
        let (_state, remote) = spawn_responder().await;
        let ai = ObjectId::new(ObjectType::AnalogInput, 1);

        send_frame(&remote, Npdu::expecting_reply(), |w| {
            ReadPropertyRequest {
                object_id: ai,
                property_id: PropertyId::PresentValue,
                array_index: None,
                invoke_id: 3,
            }
            .encode(w)
            .unwrap();
        })
        .await;

        let frame = recv_frame(&remote).await;
        let mut r = Reader::new(&frame);
        Npdu::decode(&mut r).unwrap();
        let header = ComplexAckHeader::decode(&mut r).unwrap();
        assert_eq!(header.invoke_id, 3);
        let ack = ReadPropertyAck::decode_after_header(&mut r).unwrap();
        assert_eq!(ack.values, vec![DataValue::Real(21.5)]);

        send_frame(&remote, Npdu::expecting_reply(), |w| {
            ReadPropertyRequest {
                object_id: ai,
                property_id: PropertyId::ObjectName,
                array_index: None,
                invoke_id: 4,
            }
            .encode(w)
            .unwrap();
        })
        .await;

        let frame = recv_frame(&remote).await;
        let mut r = Reader::new(&frame);
        Npdu::decode(&mut r).unwrap();
        ComplexAckHeader::decode(&mut r).unwrap();
        let ack = ReadPropertyAck::decode_after_header(&mut r).unwrap();
        assert_eq!(ack.values, vec![DataValue::CharacterString("temp")]);
    }

    #[tokio::test]
    async fn object_list_count_and_elements() {
        let (_state, remote) = spawn_responder().await;
        let device = ObjectId::new(ObjectType::Device, 260001);

        send_frame(&remote, Npdu::expecting_reply(), |w| {
            ReadPropertyRequest {
                object_id: device,
                property_id: PropertyId::ObjectList,
                array_index: Some(0),
                invoke_id: 5,
            }
            .encode(w)
            .unwrap();
        })
        .await;

        let frame = recv_frame(&remote).await;
        let mut r = Reader::new(&frame);
        Npdu::decode(&mut r).unwrap();
        ComplexAckHeader::decode(&mut r).unwrap();
        let ack = ReadPropertyAck::decode_after_header(&mut r).unwrap();
        // Device itself, two registry objects, one trend log.
        assert_eq!(ack.values, vec![DataValue::Unsigned(4)]);

        send_frame(&remote, Npdu::expecting_reply(), |w| {
            ReadPropertyRequest {
                object_id: device,
                property_id: PropertyId::ObjectList,
                array_index: Some(1),
                invoke_id: 6,
            }
            .encode(w)
            .unwrap();
        })
        .await;

        let frame = recv_frame(&remote).await;
        let mut r = Reader::new(&frame);
        Npdu::decode(&mut r).unwrap();
        ComplexAckHeader::decode(&mut r).unwrap();
        let ack = ReadPropertyAck::decode_after_header(&mut r).unwrap();
        assert_eq!(ack.values, vec![DataValue::ObjectId(device)]);
    }

    #[tokio::test]
    async fn unknown_object_and_property_errors() {
        let (_state, remote) = spawn_responder().await;

        send_frame(&remote, Npdu::expecting_reply(), |w| {
            ReadPropertyRequest {
                object_id: ObjectId::new(ObjectType::AnalogValue, 99),
                property_id: PropertyId::PresentValue,
                array_index: None,
                invoke_id: 7,
            }
            .encode(w)
            .unwrap();
        })
        .await;

        let frame = recv_frame(&remote).await;
        let mut r = Reader::new(&frame);
        Npdu::decode(&mut r).unwrap();
        let error = BacnetError::decode(&mut r).unwrap();
        assert_eq!(error.invoke_id, 7);
        assert_eq!(error.error_class, Some(1));
        assert_eq!(error.error_code, Some(31));

        send_frame(&remote, Npdu::expecting_reply(), |w| {
            ReadPropertyRequest {
                object_id: ObjectId::new(ObjectType::AnalogInput, 1),
                property_id: PropertyId::ObjectList,
                array_index: None,
                invoke_id: 8,
            }
            .encode(w)
            .unwrap();
        })
        .await;

        let frame = recv_frame(&remote).await;
        let mut r = Reader::new(&frame);
        Npdu::decode(&mut r).unwrap();
        let error = BacnetError::decode(&mut r).unwrap();
        assert_eq!(error.error_class, Some(2));
        assert_eq!(error.error_code, Some(32));
    }

    #[tokio::test]
    async fn write_then_cov_notification() {
        let (state, remote) = spawn_responder().await;
        let av = ObjectId::new(ObjectType::AnalogValue, 2);

        send_frame(&remote, Npdu::expecting_reply(), |w| {
            SubscribeCovRequest {
                subscriber_process_id: 1,
                monitored_object_id: av,
                issue_confirmed_notifications: Some(false),
                lifetime_seconds: Some(0),
                invoke_id: 9,
            }
            .encode(w)
            .unwrap();
        })
        .await;

        let frame = recv_frame(&remote).await;
        let mut r = Reader::new(&frame);
        Npdu::decode(&mut r).unwrap();
        let ack = SimpleAck::decode(&mut r).unwrap();
        assert_eq!(ack.invoke_id, 9);

        send_frame(&remote, Npdu::expecting_reply(), |w| {
            WritePropertyRequest {
                object_id: av,
                property_id: PropertyId::PresentValue,
                value: DataValue::Real(30.0),
                array_index: None,
                priority: None,
                invoke_id: 10,
            }
            .encode(w)
            .unwrap();
        })
        .await;

        let frame = recv_frame(&remote).await;
        let mut r = Reader::new(&frame);
        Npdu::decode(&mut r).unwrap();
        let ack = SimpleAck::decode(&mut r).unwrap();
        assert_eq!(ack.invoke_id, 10);

        let frame = recv_frame(&remote).await;
        let mut r = Reader::new(&frame);
        Npdu::decode(&mut r).unwrap();
        UnconfirmedRequestHeader::decode(&mut r).unwrap();
        let cov = CovNotificationRequest::decode_after_header(&mut r).unwrap();
        assert_eq!(cov.monitored_object_id, av);
        assert_eq!(cov.initiating_device_id.instance(), 260001);
        assert_eq!(cov.values[0].value, DataValue::Real(30.0));

        let value = state.registry.find(av).await.unwrap().present_value;
        assert_eq!(value, crate::objects::PresentValue::Analog(30.0));
    }

    #[tokio::test]
    async fn write_to_input_object_is_denied() {
        let (_state, remote) = spawn_responder().await;

        send_frame(&remote, Npdu::expecting_reply(), |w| {
            WritePropertyRequest {
                object_id: ObjectId::new(ObjectType::AnalogInput, 1),
                property_id: PropertyId::PresentValue,
                value: DataValue::Real(1.0),
                array_index: None,
                priority: None,
                invoke_id: 11,
            }
            .encode(w)
            .unwrap();
        })
        .await;

        let frame = recv_frame(&remote).await;
        let mut r = Reader::new(&frame);
        Npdu::decode(&mut r).unwrap();
        let error = BacnetError::decode(&mut r).unwrap();
        assert_eq!(error.error_class, Some(2));
        assert_eq!(error.error_code, Some(40));
    }

    #[tokio::test]
    async fn unsupported_confirmed_service_is_rejected() {
        let (_state, remote) = spawn_responder().await;
        send_frame(&remote, Npdu::expecting_reply(), |w| {
            bacpipe_core::apdu::ConfirmedRequestHeader {
                segmented: false,
                more_follows: false,
                segmented_response_accepted: false,
                max_segments: 0,
                max_apdu: 5,
                invoke_id: 12,
                sequence_number: None,
                proposed_window_size: None,
                service_choice: 0x63,
            }
            .encode(w)
            .unwrap();
        })
        .await;

        let frame = recv_frame(&remote).await;
        let mut r = Reader::new(&frame);
        Npdu::decode(&mut r).unwrap();
        let reject = RejectPdu::decode(&mut r).unwrap();
        assert_eq!(reject.invoke_id, 12);
        assert_eq!(reject.reason, 9);
    }
}
