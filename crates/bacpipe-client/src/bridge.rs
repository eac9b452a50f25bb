//! Network receive loop. Decodes incoming frames, folds I-Am announcements
//! into the device cache, answers confirmed COV notifications, and completes
//! pending requests as acks, errors, rejects, and aborts arrive.

use std::sync::Arc;

use log::{debug, info, trace, warn};
use serde_json::json;

use bacpipe_core::apdu::{
    AbortPdu, ApduType, BacnetError, ComplexAckHeader, ConfirmedRequestHeader, RejectPdu,
    SimpleAck, UnconfirmedRequestHeader,
};
use bacpipe_core::encoding::{reader::Reader, writer::Writer};
use bacpipe_core::npdu::Npdu;
use bacpipe_core::services::cov_notification::{
    CovNotificationRequest, SERVICE_CONFIRMED_COV_NOTIFICATION,
    SERVICE_UNCONFIRMED_COV_NOTIFICATION,
};
use bacpipe_core::services::i_am::{IAmRequest, SERVICE_I_AM};
use bacpipe_core::services::read_property::{ReadPropertyAck, SERVICE_READ_PROPERTY};
use bacpipe_core::services::read_property_multiple::{
    ReadPropertyMultipleAck, ReadResult, SERVICE_READ_PROPERTY_MULTIPLE,
};
use bacpipe_core::services::read_range::{ReadRangeAck, SERVICE_READ_RANGE};
use bacpipe_core::services::subscribe_cov::SERVICE_SUBSCRIBE_COV;
use bacpipe_core::services::who_has::{IHaveRequest, SERVICE_I_HAVE};
use bacpipe_core::services::who_is::SERVICE_WHO_IS;
use bacpipe_core::services::write_property::SERVICE_WRITE_PROPERTY;
use bacpipe_core::services::device_management::{
    SERVICE_DEVICE_COMMUNICATION_CONTROL, SERVICE_REINITIALIZE_DEVICE,
};
use bacpipe_core::types::{ObjectType, RejectReason};
use bacpipe_core::DecodeError;
use bacpipe_datalink::{DataLink, DataLinkAddress};

use crate::context::ClientContext;
use crate::error::ClientError;
use crate::pending::Completion;
use crate::text::{
    abort_reason_name, error_class_name, error_code_name, object_type_label, property_label,
    reject_reason_name,
};
use crate::value::ClientDataValue;

const RECV_BUF_LEN: usize = 1600;

/// Runs the receive loop until the datalink fails permanently. Malformed
/// frames are logged and dropped; the loop itself never gives up on a
/// decode error.
pub async fn run<D: DataLink>(ctx: Arc<ClientContext<D>>) {
    let mut buf = [0u8; RECV_BUF_LEN];
    loop {
        let (n, src) = match ctx.datalink.recv(&mut buf).await {
            Ok(frame) => frame,
            Err(err) => {
                warn!("datalink receive failed: {err}");
                continue;
            }
        };
        if let Err(err) = handle_frame(&ctx, &buf[..n], src).await {
            debug!("dropping frame from {src}: {err}");
        }
    }
}

async fn handle_frame<D: DataLink>(
    ctx: &ClientContext<D>,
    frame: &[u8],
    src: DataLinkAddress,
) -> Result<(), ClientError> {
    let mut r = Reader::new(frame);
    let npdu = Npdu::decode(&mut r)?;
    if npdu.is_network_message() {
        trace!("ignoring network-layer message from {src}");
        return Ok(());
    }

    let apdu_type = ApduType::from_u8(r.peek_u8()? >> 4).ok_or(DecodeError::InvalidValue)?;
    match apdu_type {
        ApduType::UnconfirmedRequest => handle_unconfirmed(ctx, &mut r, src).await,
        ApduType::ConfirmedRequest => handle_confirmed(ctx, &mut r, src).await,
        ApduType::ComplexAck => handle_complex_ack(ctx, &mut r, src).await,
        ApduType::SimpleAck => {
            let ack = SimpleAck::decode(&mut r)?;
            let payload = simple_ack_payload(&ack);
            deliver(ctx, ack.invoke_id, payload, false).await;
            Ok(())
        }
        ApduType::Error => {
            let error = BacnetError::decode(&mut r)?;
            let mut payload = json!({
                "status": "error",
                "invokeId": error.invoke_id,
            });
            if let Some(class) = error.error_class {
                payload["errorClass"] = json!(error_class_name(class));
            }
            if let Some(code) = error.error_code {
                payload["errorCode"] = json!(error_code_name(code));
            }
            deliver(ctx, error.invoke_id, payload, true).await;
            Ok(())
        }
        ApduType::Reject => {
            let reject = RejectPdu::decode(&mut r)?;
            let payload = json!({
                "status": "reject",
                "invokeId": reject.invoke_id,
                "rejectReason": reject_reason_name(reject.reason),
            });
            deliver(ctx, reject.invoke_id, payload, true).await;
            Ok(())
        }
        ApduType::Abort => {
            let abort = AbortPdu::decode(&mut r)?;
            let payload = json!({
                "status": "abort",
                "invokeId": abort.invoke_id,
                "abortReason": abort_reason_name(abort.reason),
                "server": abort.server,
            });
            deliver(ctx, abort.invoke_id, payload, true).await;
            Ok(())
        }
        ApduType::SegmentAck => {
            trace!("ignoring segment ack from {src}");
            Ok(())
        }
    }
}

async fn handle_unconfirmed<D: DataLink>(
    ctx: &ClientContext<D>,
    r: &mut Reader<'_>,
    src: DataLinkAddress,
) -> Result<(), ClientError> {
    let header = UnconfirmedRequestHeader::decode(r)?;
    match header.service_choice {
        SERVICE_I_AM => {
            let iam = IAmRequest::decode_after_header(r)?;
            ctx.devices
                .upsert(
                    iam.device_id.instance(),
                    src,
                    iam.max_apdu,
                    iam.segmentation,
                    iam.vendor_id,
                )
                .await;
            Ok(())
        }
        SERVICE_I_HAVE => {
            let ihave = IHaveRequest::decode_after_header(r)?;
            if ihave.object_id.object_type() == ObjectType::Device {
                ctx.devices
                    .set_name(ihave.device_id.instance(), ihave.object_name.to_string())
                    .await;
            }
            info!(
                "I-Have from device {}: {}:{} \"{}\"",
                ihave.device_id.instance(),
                object_type_label(ihave.object_id.object_type()),
                ihave.object_id.instance(),
                ihave.object_name
            );
            Ok(())
        }
        SERVICE_UNCONFIRMED_COV_NOTIFICATION => {
            let cov = CovNotificationRequest::decode_after_header(r)?;
            handle_cov_notification(ctx, &cov, src).await;
            Ok(())
        }
        SERVICE_WHO_IS => {
            trace!("ignoring Who-Is from {src}");
            Ok(())
        }
        other => {
            trace!("ignoring unconfirmed service 0x{other:02x} from {src}");
            Ok(())
        }
    }
}

async fn handle_confirmed<D: DataLink>(
    ctx: &ClientContext<D>,
    r: &mut Reader<'_>,
    src: DataLinkAddress,
) -> Result<(), ClientError> {
    let header = ConfirmedRequestHeader::decode(r)?;
    match header.service_choice {
        SERVICE_CONFIRMED_COV_NOTIFICATION => {
            let cov = CovNotificationRequest::decode_after_header(r)?;
            handle_cov_notification(ctx, &cov, src).await;

            let mut buf = [0u8; 32];
            let mut w = Writer::new(&mut buf);
            Npdu::application().encode(&mut w)?;
            SimpleAck {
                invoke_id: header.invoke_id,
                service_choice: SERVICE_CONFIRMED_COV_NOTIFICATION,
            }
            .encode(&mut w)?;
            ctx.datalink.send(src, w.as_written()).await?;
            Ok(())
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
            ctx.datalink.send(src, w.as_written()).await?;
            Ok(())
        }
    }
}

async fn handle_cov_notification<D: DataLink>(
    ctx: &ClientContext<D>,
    cov: &CovNotificationRequest<'_>,
    src: DataLinkAddress,
) {
    let device_id = cov.initiating_device_id.instance();
    let rendered: Vec<String> = cov
        .values
        .iter()
        .map(|pv| {
            let value = ClientDataValue::from_wire(pv.value.clone());
            format!("{}={}", property_label(pv.property_id), value.to_display_string())
        })
        .collect();
    info!(
        "COV notification from device {device_id} for {}:{}: {}",
        object_type_label(cov.monitored_object_id.object_type()),
        cov.monitored_object_id.instance(),
        rendered.join(" ")
    );

    if ctx.cov.find(device_id, cov.monitored_object_id).await.is_some() {
        ctx.cov.refresh_address(device_id, src).await;
    } else {
        debug!("notification without a matching subscription, ignoring");
    }
}

async fn handle_complex_ack<D: DataLink>(
    ctx: &ClientContext<D>,
    r: &mut Reader<'_>,
    src: DataLinkAddress,
) -> Result<(), ClientError> {
    let header = ComplexAckHeader::decode(r)?;
    if header.segmented {
        let payload = json!({
            "status": "error",
            "invokeId": header.invoke_id,
            "error": "Segmented responses are not supported",
        });
        deliver(ctx, header.invoke_id, payload, true).await;
        return Ok(());
    }

    match decode_ack_payload(&header, r) {
        Ok(payload) => deliver(ctx, header.invoke_id, payload, false).await,
        Err(err) => {
            debug!(
                "undecodable {} ack from {src}: {err}",
                service_label(header.service_choice)
            );
            let payload = json!({
                "status": "error",
                "invokeId": header.invoke_id,
                "error": format!(
                    "Failed to decode {} response",
                    service_label(header.service_choice)
                ),
            });
            deliver(ctx, header.invoke_id, payload, true).await;
        }
    }
    Ok(())
}

fn decode_ack_payload(
    header: &ComplexAckHeader,
    r: &mut Reader<'_>,
) -> Result<serde_json::Value, DecodeError> {
    match header.service_choice {
        SERVICE_READ_PROPERTY => {
            let ack = ReadPropertyAck::decode_after_header(r)?;
            Ok(read_property_payload(header.invoke_id, &ack))
        }
        SERVICE_READ_PROPERTY_MULTIPLE => {
            let ack = ReadPropertyMultipleAck::decode_after_header(r)?;
            Ok(read_property_multiple_payload(header.invoke_id, &ack))
        }
        SERVICE_READ_RANGE => {
            let ack = ReadRangeAck::decode_after_header(r)?;
            Ok(read_range_payload(header.invoke_id, &ack))
        }
        _ => Err(DecodeError::InvalidValue),
    }
}

fn read_property_payload(invoke_id: u8, ack: &ReadPropertyAck<'_>) -> serde_json::Value {
    let values: Vec<ClientDataValue> = ack
        .values
        .iter()
        .map(|v| ClientDataValue::from_wire(v.clone()))
        .collect();
    let (value, datatype) = match values.as_slice() {
        [] => ("null".to_string(), "NULL"),
        [single] => (single.to_display_string(), single.datatype_name()),
        many => (
            many.iter()
                .map(ClientDataValue::to_display_string)
                .collect::<Vec<_>>()
                .join(","),
            many[0].datatype_name(),
        ),
    };

    let mut result = json!({
        "objectType": object_type_label(ack.object_id.object_type()),
        "objectInstance": ack.object_id.instance(),
        "property": property_label(ack.property_id),
        "value": value,
        "datatype": datatype,
    });
    if values.len() > 1 {
        result["values"] = json!(values
            .iter()
            .map(ClientDataValue::to_display_string)
            .collect::<Vec<_>>());
    }

    json!({
        "status": "success",
        "service": "ReadProperty",
        "invokeId": invoke_id,
        "result": result,
    })
}

fn read_property_multiple_payload(
    invoke_id: u8,
    ack: &ReadPropertyMultipleAck<'_>,
) -> serde_json::Value {
    let objects: Vec<serde_json::Value> = ack
        .results
        .iter()
        .map(|object| {
            let properties: Vec<serde_json::Value> = object
                .results
                .iter()
                .map(|element| {
                    let mut entry = json!({
                        "property": property_label(element.property_id),
                    });
                    if let Some(idx) = element.array_index {
                        entry["arrayIndex"] = json!(idx);
                    }
                    match &element.result {
                        ReadResult::Value(value) => {
                            let value = ClientDataValue::from_wire(value.clone());
                            entry["value"] = json!(value.to_display_string());
                            entry["datatype"] = json!(value.datatype_name());
                        }
                        ReadResult::Error {
                            error_class,
                            error_code,
                        } => {
                            entry["error"] = json!({
                                "errorClass": error_class_name(*error_class),
                                "errorCode": error_code_name(*error_code),
                            });
                        }
                    }
                    entry
                })
                .collect();
            json!({
                "objectType": object_type_label(object.object_id.object_type()),
                "objectInstance": object.object_id.instance(),
                "properties": properties,
            })
        })
        .collect();

    json!({
        "status": "success",
        "service": "ReadPropertyMultiple",
        "invokeId": invoke_id,
        "objects": objects,
    })
}

fn read_range_payload(invoke_id: u8, ack: &ReadRangeAck<'_>) -> serde_json::Value {
    let flag = |index: usize| -> bool {
        ack.result_flags
            .data
            .first()
            .map(|byte| (byte >> (7 - index)) & 0x01 != 0)
            .unwrap_or(false)
    };
    let items: Vec<serde_json::Value> = ack
        .items
        .iter()
        .map(|item| {
            let value = ClientDataValue::from_wire(item.clone());
            json!({
                "value": value.to_display_string(),
                "datatype": value.datatype_name(),
            })
        })
        .collect();

    json!({
        "status": "success",
        "service": "ReadRange",
        "invokeId": invoke_id,
        "result": {
            "objectType": object_type_label(ack.object_id.object_type()),
            "objectInstance": ack.object_id.instance(),
            "property": property_label(ack.property_id),
            "itemCount": ack.item_count,
            "resultFlags": {
                "firstItem": flag(0),
                "lastItem": flag(1),
                "moreItems": flag(2),
            },
            "items": items,
        },
    })
}

fn simple_ack_payload(ack: &SimpleAck) -> serde_json::Value {
    let mut payload = json!({
        "status": "success",
        "service": service_label(ack.service_choice),
        "invokeId": ack.invoke_id,
    });
    if ack.service_choice == SERVICE_WRITE_PROPERTY {
        payload["message"] = json!("Write successful");
    }
    payload
}

fn service_label(service_choice: u8) -> String {
    match service_choice {
        SERVICE_READ_PROPERTY => "ReadProperty".to_string(),
        SERVICE_READ_PROPERTY_MULTIPLE => "ReadPropertyMultiple".to_string(),
        SERVICE_READ_RANGE => "ReadRange".to_string(),
        SERVICE_WRITE_PROPERTY => "WriteProperty".to_string(),
        SERVICE_SUBSCRIBE_COV => "SubscribeCOV".to_string(),
        SERVICE_DEVICE_COMMUNICATION_CONTROL => "DeviceCommunicationControl".to_string(),
        SERVICE_REINITIALIZE_DEVICE => "ReinitializeDevice".to_string(),
        SERVICE_CONFIRMED_COV_NOTIFICATION => "ConfirmedCOVNotification".to_string(),
        other => other.to_string(),
    }
}

async fn deliver<D: DataLink>(
    ctx: &ClientContext<D>,
    invoke_id: u8,
    payload: serde_json::Value,
    is_error: bool,
) {
    if !ctx.pending.complete(invoke_id, Completion { payload, is_error }).await {
        debug!("no pending request under invoke id {invoke_id}");
    }
}
