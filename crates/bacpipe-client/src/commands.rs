//! Command dispatcher for the JSON-line control socket.
//!
//! Each control connection carries one JSON object with a `cmd` field and
//! command-specific parameters. Every path through here produces exactly one
//! JSON response; failures use the uniform `{"status":"error","error":...}`
//! shape.

use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, info};
use serde_json::json;

use bacpipe_core::encoding::writer::Writer;
use bacpipe_core::npdu::Npdu;
use bacpipe_core::services::device_management::{
    DeviceCommunicationControlRequest, DeviceCommunicationState, ReinitializeDeviceRequest,
    ReinitializeState,
};
use bacpipe_core::services::read_property::ReadPropertyRequest;
use bacpipe_core::services::read_property_multiple::{
    PropertyReference, ReadAccessSpecification, ReadPropertyMultipleRequest,
};
use bacpipe_core::services::read_range::ReadRangeRequest;
use bacpipe_core::services::subscribe_cov::SubscribeCovRequest;
use bacpipe_core::services::time_synchronization::TimeSynchronizationRequest;
use bacpipe_core::services::who_has::WhoHasRequest;
use bacpipe_core::services::who_is::WhoIsRequest;
use bacpipe_core::services::write_property::WritePropertyRequest;
use bacpipe_core::types::{Date, ObjectId, PropertyId, Time};
use bacpipe_core::{EncodeError, MAX_DEVICE_INSTANCE};
use bacpipe_datalink::{DataLink, DataLinkAddress};

use crate::context::ClientContext;
use crate::devices::{mac_from_string, mac_string};
use crate::text::segmentation_name;
use crate::value::{parse_object_identifier, ClientDataValue};

/// Dispatches one command line and produces its JSON response.
pub async fn dispatch_line<D: DataLink>(ctx: &ClientContext<D>, line: &str) -> serde_json::Value {
    let cmd: serde_json::Value = match serde_json::from_str(line.trim()) {
        Ok(value) => value,
        Err(_) => return error_json("Invalid JSON"),
    };
    let Some(name) = cmd.get("cmd").and_then(|v| v.as_str()) else {
        return error_json("Missing 'cmd' field");
    };
    debug!("dispatching command {name}");

    match name {
        "whois" => whois(ctx, &cmd).await,
        "iam" => error_json("I-Am not implemented for pure client"),
        "readprop" => readprop(ctx, &cmd).await,
        "readpropm" => readpropm(ctx, &cmd).await,
        "readrange" => readrange(ctx, &cmd).await,
        "writeprop" => writeprop(ctx, &cmd).await,
        "writepropm" => writepropm(ctx, &cmd).await,
        "subscribecov" => subscribecov(ctx, &cmd).await,
        "unsubscribecov" => unsubscribecov(ctx, &cmd).await,
        "timesync" => timesync(ctx, &cmd).await,
        "whohas" => whohas(ctx, &cmd).await,
        "devicelist" => devicelist(ctx).await,
        "objectlist" => objectlist(ctx, &cmd).await,
        "reinit" => reinit(ctx, &cmd).await,
        "devicecomm" => devicecomm(ctx, &cmd).await,
        other => error_json(&format!("Unknown command: {other}")),
    }
}

fn error_json(message: &str) -> serde_json::Value {
    json!({ "status": "error", "error": message })
}

fn param_u32(cmd: &serde_json::Value, key: &str) -> Option<u32> {
    cmd.get(key)
        .and_then(|v| v.as_u64())
        .and_then(|v| u32::try_from(v).ok())
}

fn param_str<'a>(cmd: &'a serde_json::Value, key: &str) -> Option<&'a str> {
    cmd.get(key).and_then(|v| v.as_str())
}

/// Resolves the target address for a confirmed request. An explicit `ip`
/// parameter wins, then an explicit 6-octet `address`, then the device
/// cache.
async fn resolve_target<D: DataLink>(
    ctx: &ClientContext<D>,
    cmd: &serde_json::Value,
    device_id: Option<u32>,
    not_found: &str,
) -> Result<DataLinkAddress, serde_json::Value> {
    if let Some(ip) = param_str(cmd, "ip") {
        let addr: std::net::IpAddr = ip
            .parse()
            .map_err(|_| error_json("Invalid IP address format"))?;
        let port = param_u32(cmd, "port")
            .and_then(|p| u16::try_from(p).ok())
            .unwrap_or(ctx.config.bacnet_port);
        return Ok(DataLinkAddress::Ip(std::net::SocketAddr::new(addr, port)));
    }
    if let Some(mac) = param_str(cmd, "address") {
        return mac_from_string(mac).ok_or_else(|| error_json("Invalid MAC address format"));
    }
    if let Some(device_id) = device_id {
        if let Some(entry) = ctx.devices.lookup(device_id).await {
            return Ok(entry.address);
        }
    }
    Err(error_json(not_found))
}

/// Parses the (device, object, property) triple common to the property
/// access commands.
fn object_property_params(
    cmd: &serde_json::Value,
) -> Result<(u32, ObjectId, PropertyId), serde_json::Value> {
    let (Some(device), Some(object), Some(property)) = (
        param_u32(cmd, "device"),
        param_str(cmd, "object"),
        param_str(cmd, "property"),
    ) else {
        return Err(error_json(
            "Missing required parameters (device, object, property)",
        ));
    };
    let object_id =
        parse_object_identifier(object).ok_or_else(|| error_json("Invalid object ID format"))?;
    let property_id =
        PropertyId::from_name(property).ok_or_else(|| error_json("Unknown property name"))?;
    Ok((device, object_id, property_id))
}

/// Registers an invoke ID, sends one confirmed request, and waits for the
/// completion the network loop delivers.
async fn confirmed_exchange<D, F>(
    ctx: &ClientContext<D>,
    target: DataLinkAddress,
    encode: F,
) -> serde_json::Value
where
    D: DataLink,
    F: FnOnce(u8, &mut Writer<'_>) -> Result<(), EncodeError>,
{
    let Some(ticket) = ctx.pending.register().await else {
        return error_json("No free invoke ID available");
    };
    let invoke_id = ticket.invoke_id;

    let mut buf = [0u8; 1476];
    let mut w = Writer::new(&mut buf);
    let encoded = Npdu::expecting_reply()
        .encode(&mut w)
        .and_then(|()| encode(invoke_id, &mut w));
    if encoded.is_err() {
        return error_json("Failed to send request");
    }
    if ctx.datalink.send(target, w.as_written()).await.is_err() {
        return error_json("Failed to send request");
    }

    match ctx.pending.wait(ticket, ctx.config.request_timeout).await {
        Some(completion) => completion.payload,
        None => error_json("Request timeout"),
    }
}

/// Sends an unconfirmed request to the local broadcast address.
async fn broadcast<D, F>(ctx: &ClientContext<D>, encode: F) -> Result<(), serde_json::Value>
where
    D: DataLink,
    F: FnOnce(&mut Writer<'_>) -> Result<(), EncodeError>,
{
    let mut buf = [0u8; 1476];
    let mut w = Writer::new(&mut buf);
    let encoded = Npdu::application().encode(&mut w).and_then(|()| encode(&mut w));
    if encoded.is_err() {
        return Err(error_json("Failed to send request"));
    }
    let target = DataLinkAddress::local_broadcast(ctx.config.bacnet_port);
    ctx.datalink
        .send(target, w.as_written())
        .await
        .map_err(|_| error_json("Failed to send request"))
}

async fn whois<D: DataLink>(
    ctx: &ClientContext<D>,
    cmd: &serde_json::Value,
) -> serde_json::Value {
    let min = cmd.get("deviceMin").and_then(|v| v.as_i64()).unwrap_or(-1);
    let max = cmd.get("deviceMax").and_then(|v| v.as_i64()).unwrap_or(-1);

    let request = if min < 0 && max < 0 {
        WhoIsRequest::global()
    } else {
        let mut low = min.max(0).min(i64::from(MAX_DEVICE_INSTANCE)) as u32;
        let mut high = if max < 0 {
            MAX_DEVICE_INSTANCE
        } else {
            max.min(i64::from(MAX_DEVICE_INSTANCE)) as u32
        };
        if low > high {
            std::mem::swap(&mut low, &mut high);
        }
        WhoIsRequest {
            low_limit: Some(low),
            high_limit: Some(high),
        }
    };

    if let Err(err) = broadcast(ctx, |w| request.encode(w)).await {
        return err;
    }
    info!("Who-Is broadcast, collecting replies");
    tokio::time::sleep(ctx.config.discovery_wait).await;

    json!({
        "status": "success",
        "message": "Who-Is sent and waited for responses",
        "deviceCount": ctx.devices.len().await,
    })
}

async fn readprop<D: DataLink>(
    ctx: &ClientContext<D>,
    cmd: &serde_json::Value,
) -> serde_json::Value {
    let (device, object_id, property_id) = match object_property_params(cmd) {
        Ok(params) => params,
        Err(err) => return err,
    };
    let array_index = param_u32(cmd, "index");
    let target = match resolve_target(
        ctx,
        cmd,
        Some(device),
        "Device not found. Provide 'ip' or run Who-Is first.",
    )
    .await
    {
        Ok(target) => target,
        Err(err) => return err,
    };

    confirmed_exchange(ctx, target, |invoke_id, w| {
        ReadPropertyRequest {
            object_id,
            property_id,
            array_index,
            invoke_id,
        }
        .encode(w)
    })
    .await
}

async fn readpropm<D: DataLink>(
    ctx: &ClientContext<D>,
    cmd: &serde_json::Value,
) -> serde_json::Value {
    let (Some(device), Some(objects)) = (
        param_u32(cmd, "device"),
        cmd.get("objects").and_then(|v| v.as_array()),
    ) else {
        return error_json("Missing required parameters (device, objects)");
    };

    let mut parsed: Vec<(ObjectId, Vec<PropertyReference>)> = Vec::new();
    for entry in objects {
        let Some(object) = param_str(entry, "object") else {
            return error_json("Invalid object ID format");
        };
        let Some(object_id) = parse_object_identifier(object) else {
            return error_json("Invalid object ID format");
        };
        let Some(properties) = entry.get("properties").and_then(|v| v.as_array()) else {
            return error_json("Missing required parameters (device, objects)");
        };
        let mut refs = Vec::new();
        for prop in properties {
            let (name, array_index) = match prop {
                serde_json::Value::String(name) => (name.as_str(), None),
                other => match param_str(other, "property") {
                    Some(name) => (name, param_u32(other, "index")),
                    None => return error_json("Unknown property name"),
                },
            };
            let Some(property_id) = PropertyId::from_name(name) else {
                return error_json("Unknown property name");
            };
            refs.push(PropertyReference {
                property_id,
                array_index,
            });
        }
        parsed.push((object_id, refs));
    }
    if parsed.is_empty() {
        return error_json("Missing required parameters (device, objects)");
    }

    let target = match resolve_target(
        ctx,
        cmd,
        Some(device),
        "Device not found. Provide 'ip' or run Who-Is first.",
    )
    .await
    {
        Ok(target) => target,
        Err(err) => return err,
    };

    let specs: Vec<ReadAccessSpecification<'_>> = parsed
        .iter()
        .map(|(object_id, refs)| ReadAccessSpecification {
            object_id: *object_id,
            properties: refs,
        })
        .collect();

    confirmed_exchange(ctx, target, |invoke_id, w| {
        ReadPropertyMultipleRequest {
            specs: &specs,
            invoke_id,
        }
        .encode(w)
    })
    .await
}

async fn readrange<D: DataLink>(
    ctx: &ClientContext<D>,
    cmd: &serde_json::Value,
) -> serde_json::Value {
    let (device, object_id, property_id) = match object_property_params(cmd) {
        Ok(params) => params,
        Err(err) => return err,
    };
    let array_index = param_u32(cmd, "index");
    let target = match resolve_target(
        ctx,
        cmd,
        Some(device),
        "Device not found. Provide 'ip' or run Who-Is first.",
    )
    .await
    {
        Ok(target) => target,
        Err(err) => return err,
    };

    let count = cmd
        .get("count")
        .and_then(|v| v.as_i64())
        .and_then(|v| i16::try_from(v).ok());

    confirmed_exchange(ctx, target, |invoke_id, w| {
        let request = if let Some(position) = cmd.get("position").and_then(|v| v.as_i64()) {
            ReadRangeRequest::by_position(
                object_id,
                property_id,
                array_index,
                position as i32,
                count.unwrap_or(i16::MAX),
                invoke_id,
            )
        } else if let Some(sequence) = param_u32(cmd, "sequence") {
            ReadRangeRequest::by_sequence_number(
                object_id,
                property_id,
                array_index,
                sequence,
                count.unwrap_or(i16::MAX),
                invoke_id,
            )
        } else {
            ReadRangeRequest::read_all(object_id, property_id, array_index, invoke_id)
        };
        request.encode(w)
    })
    .await
}

async fn writeprop<D: DataLink>(
    ctx: &ClientContext<D>,
    cmd: &serde_json::Value,
) -> serde_json::Value {
    let (device, object_id, property_id) = match object_property_params(cmd) {
        Ok(params) => params,
        Err(err) => return err,
    };
    let Some(raw_value) = cmd.get("value") else {
        return error_json("Missing required parameters (device, object, property)");
    };
    let Some(value) = ClientDataValue::from_json(raw_value, param_str(cmd, "datatype")) else {
        return error_json("Invalid value format");
    };
    let array_index = param_u32(cmd, "index");
    let priority = param_u32(cmd, "priority").and_then(|p| u8::try_from(p).ok());

    let target = match resolve_target(
        ctx,
        cmd,
        Some(device),
        "Device not found. Provide 'ip' or run Who-Is first.",
    )
    .await
    {
        Ok(target) => target,
        Err(err) => return err,
    };

    confirmed_exchange(ctx, target, |invoke_id, w| {
        WritePropertyRequest {
            object_id,
            property_id,
            value: value.as_wire(),
            array_index,
            priority,
            invoke_id,
        }
        .encode(w)
    })
    .await
}

/// There is no WritePropertyMultiple codec on the wire side, so the command
/// is served as a sequence of WriteProperty exchanges, one per entry, with
/// the per-write outcomes aggregated into a single response.
async fn writepropm<D: DataLink>(
    ctx: &ClientContext<D>,
    cmd: &serde_json::Value,
) -> serde_json::Value {
    let (Some(device), Some(writes)) = (
        param_u32(cmd, "device"),
        cmd.get("writes").and_then(|v| v.as_array()),
    ) else {
        return error_json("Missing required parameters (device, writes)");
    };
    if writes.is_empty() {
        return error_json("Missing required parameters (device, writes)");
    }

    let target = match resolve_target(
        ctx,
        cmd,
        Some(device),
        "Device not found. Provide 'ip' or run Who-Is first.",
    )
    .await
    {
        Ok(target) => target,
        Err(err) => return err,
    };

    let mut results = Vec::new();
    for write in writes {
        let (Some(object), Some(property), Some(raw_value)) = (
            param_str(write, "object"),
            param_str(write, "property"),
            write.get("value"),
        ) else {
            results.push(error_json("Missing required parameters (object, property, value)"));
            continue;
        };
        let Some(object_id) = parse_object_identifier(object) else {
            results.push(error_json("Invalid object ID format"));
            continue;
        };
        let Some(property_id) = PropertyId::from_name(property) else {
            results.push(error_json("Unknown property name"));
            continue;
        };
        let Some(value) = ClientDataValue::from_json(raw_value, param_str(write, "datatype"))
        else {
            results.push(error_json("Invalid value format"));
            continue;
        };
        let array_index = param_u32(write, "index");
        let priority = param_u32(write, "priority").and_then(|p| u8::try_from(p).ok());

        let outcome = confirmed_exchange(ctx, target, |invoke_id, w| {
            WritePropertyRequest {
                object_id,
                property_id,
                value: value.as_wire(),
                array_index,
                priority,
                invoke_id,
            }
            .encode(w)
        })
        .await;
        results.push(json!({
            "object": object,
            "property": property,
            "result": outcome,
        }));
    }

    json!({
        "status": "success",
        "service": "WritePropertyMultiple",
        "results": results,
    })
}

async fn subscribecov<D: DataLink>(
    ctx: &ClientContext<D>,
    cmd: &serde_json::Value,
) -> serde_json::Value {
    let (Some(device), Some(object)) = (param_u32(cmd, "device"), param_str(cmd, "object")) else {
        return error_json("Missing required parameters (device, object)");
    };
    let Some(object_id) = parse_object_identifier(object) else {
        return error_json("Invalid object ID format");
    };
    let process_id = param_u32(cmd, "processId").unwrap_or(1);
    let confirmed = cmd.get("confirmed").and_then(|v| v.as_bool()).unwrap_or(false);
    let lifetime = param_u32(cmd, "lifetime").unwrap_or(0);

    let target = match resolve_target(
        ctx,
        cmd,
        Some(device),
        "Device not found. Provide 'ip' or run Who-Is first.",
    )
    .await
    {
        Ok(target) => target,
        Err(err) => return err,
    };

    let payload = confirmed_exchange(ctx, target, |invoke_id, w| {
        SubscribeCovRequest {
            subscriber_process_id: process_id,
            monitored_object_id: object_id,
            issue_confirmed_notifications: Some(confirmed),
            lifetime_seconds: Some(lifetime),
            invoke_id,
        }
        .encode(w)
    })
    .await;

    if payload["status"] == "success" {
        ctx.cov
            .upsert(device, object_id, target, process_id, lifetime)
            .await;
    }
    payload
}

async fn unsubscribecov<D: DataLink>(
    ctx: &ClientContext<D>,
    cmd: &serde_json::Value,
) -> serde_json::Value {
    let (Some(device), Some(object)) = (param_u32(cmd, "device"), param_str(cmd, "object")) else {
        return error_json("Missing required parameters (device, object)");
    };
    let Some(object_id) = parse_object_identifier(object) else {
        return error_json("Invalid object ID format");
    };
    let process_id = match ctx.cov.find(device, object_id).await {
        Some(sub) => sub.process_id,
        None => param_u32(cmd, "processId").unwrap_or(1),
    };

    let target = match resolve_target(
        ctx,
        cmd,
        Some(device),
        "Device not found. Provide 'ip' or run Who-Is first.",
    )
    .await
    {
        Ok(target) => target,
        Err(err) => return err,
    };

    let payload = confirmed_exchange(ctx, target, |invoke_id, w| {
        SubscribeCovRequest::cancel(process_id, object_id, invoke_id).encode(w)
    })
    .await;

    if payload["status"] == "success" {
        ctx.cov.remove(device, object_id).await;
    }
    payload
}

async fn timesync<D: DataLink>(
    ctx: &ClientContext<D>,
    cmd: &serde_json::Value,
) -> serde_json::Value {
    let utc = cmd.get("utc").and_then(|v| v.as_bool()).unwrap_or(true);
    let (date, time) = utc_now();
    let request = if utc {
        TimeSynchronizationRequest::utc(date, time)
    } else {
        TimeSynchronizationRequest::local(date, time)
    };

    // An explicit target sends a directed sync, otherwise broadcast.
    if param_str(cmd, "ip").is_some() || param_str(cmd, "address").is_some() {
        let target = match resolve_target(ctx, cmd, None, "Invalid IP address format").await {
            Ok(target) => target,
            Err(err) => return err,
        };
        let mut buf = [0u8; 64];
        let mut w = Writer::new(&mut buf);
        let encoded = Npdu::application()
            .encode(&mut w)
            .and_then(|()| request.encode(&mut w));
        if encoded.is_err() || ctx.datalink.send(target, w.as_written()).await.is_err() {
            return error_json("Failed to send request");
        }
    } else if let Err(err) = broadcast(ctx, |w| request.encode(w)).await {
        return err;
    }

    json!({
        "status": "success",
        "service": "TimeSynchronization",
        "message": "Time synchronization sent",
    })
}

async fn whohas<D: DataLink>(
    ctx: &ClientContext<D>,
    cmd: &serde_json::Value,
) -> serde_json::Value {
    let request = if let Some(object) = param_str(cmd, "object") {
        let Some(object_id) = parse_object_identifier(object) else {
            return error_json("Invalid object ID format");
        };
        WhoHasRequest::for_object_id(object_id)
    } else if let Some(name) = param_str(cmd, "name") {
        WhoHasRequest::for_object_name(name)
    } else {
        return error_json("Missing required parameters (object or name)");
    };

    if let Err(err) = broadcast(ctx, |w| request.encode(w)).await {
        return err;
    }
    json!({
        "status": "success",
        "service": "WhoHas",
        "message": "Who-Has sent",
    })
}

async fn devicelist<D: DataLink>(ctx: &ClientContext<D>) -> serde_json::Value {
    let devices: Vec<serde_json::Value> = ctx
        .devices
        .snapshot()
        .await
        .into_iter()
        .map(|entry| {
            let mut device = json!({
                "deviceId": entry.device_id,
                "address": mac_string(entry.address),
                "maxApdu": entry.max_apdu,
                "vendorId": entry.vendor_id,
                "segmentation": segmentation_name(entry.segmentation),
                "lastSeen": entry.last_seen.elapsed().as_secs(),
            });
            if let Some(name) = entry.name {
                device["name"] = json!(name);
            }
            device
        })
        .collect();

    json!({
        "status": "success",
        "deviceCount": devices.len(),
        "devices": devices,
    })
}

/// Reads a device's object-list the portable way: array index 0 for the
/// element count, then one indexed read per element.
async fn objectlist<D: DataLink>(
    ctx: &ClientContext<D>,
    cmd: &serde_json::Value,
) -> serde_json::Value {
    let Some(device) = param_u32(cmd, "device") else {
        return error_json("Missing required parameter: device");
    };
    let target = match resolve_target(
        ctx,
        cmd,
        Some(device),
        "Device not found in cache, provide 'ip' parameter",
    )
    .await
    {
        Ok(target) => target,
        Err(err) => return err,
    };

    let device_object = ObjectId::new(bacpipe_core::types::ObjectType::Device, device);
    let count_payload = confirmed_exchange(ctx, target, |invoke_id, w| {
        ReadPropertyRequest {
            object_id: device_object,
            property_id: PropertyId::ObjectList,
            array_index: Some(0),
            invoke_id,
        }
        .encode(w)
    })
    .await;
    if count_payload["status"] != "success" {
        return count_payload;
    }
    let Some(count) = count_payload["result"]["value"]
        .as_str()
        .and_then(|v| v.parse::<u32>().ok())
    else {
        return error_json("Unexpected object-list count format");
    };

    let mut objects = Vec::new();
    for index in 1..=count {
        let payload = confirmed_exchange(ctx, target, |invoke_id, w| {
            ReadPropertyRequest {
                object_id: device_object,
                property_id: PropertyId::ObjectList,
                array_index: Some(index),
                invoke_id,
            }
            .encode(w)
        })
        .await;
        if payload["status"] != "success" {
            return payload;
        }
        if let Some(value) = payload["result"]["value"].as_str() {
            objects.push(value.to_string());
        }
    }

    json!({
        "status": "success",
        "service": "ObjectList",
        "device": device,
        "objectCount": count,
        "objects": objects,
    })
}

async fn reinit<D: DataLink>(
    ctx: &ClientContext<D>,
    cmd: &serde_json::Value,
) -> serde_json::Value {
    let Some(device) = param_u32(cmd, "device") else {
        return error_json("Missing required parameter: device");
    };
    let Some(state) = param_str(cmd, "state").and_then(reinitialize_state_from_name) else {
        return error_json("Invalid reinitialize state");
    };
    let password = param_str(cmd, "password");

    let target = match resolve_target(
        ctx,
        cmd,
        Some(device),
        "Device not found. Provide 'ip' or run Who-Is first.",
    )
    .await
    {
        Ok(target) => target,
        Err(err) => return err,
    };

    confirmed_exchange(ctx, target, |invoke_id, w| {
        ReinitializeDeviceRequest {
            state,
            password,
            invoke_id,
        }
        .encode(w)
    })
    .await
}

async fn devicecomm<D: DataLink>(
    ctx: &ClientContext<D>,
    cmd: &serde_json::Value,
) -> serde_json::Value {
    let Some(device) = param_u32(cmd, "device") else {
        return error_json("Missing required parameter: device");
    };
    let Some(enable_disable) = param_str(cmd, "enable").and_then(communication_state_from_name)
    else {
        return error_json("Invalid enable/disable state");
    };
    let time_duration_seconds = param_u32(cmd, "duration").and_then(|d| u16::try_from(d).ok());
    let password = param_str(cmd, "password");

    let target = match resolve_target(
        ctx,
        cmd,
        Some(device),
        "Device not found. Provide 'ip' or run Who-Is first.",
    )
    .await
    {
        Ok(target) => target,
        Err(err) => return err,
    };

    confirmed_exchange(ctx, target, |invoke_id, w| {
        DeviceCommunicationControlRequest {
            time_duration_seconds,
            enable_disable,
            password,
            invoke_id,
        }
        .encode(w)
    })
    .await
}

fn reinitialize_state_from_name(name: &str) -> Option<ReinitializeState> {
    let state = match name {
        "coldstart" => ReinitializeState::Coldstart,
        "warmstart" => ReinitializeState::Warmstart,
        "startbackup" => ReinitializeState::StartBackup,
        "endbackup" => ReinitializeState::EndBackup,
        "startrestore" => ReinitializeState::StartRestore,
        "endrestore" => ReinitializeState::EndRestore,
        "abortrestore" => ReinitializeState::AbortRestore,
        "activatechanges" => ReinitializeState::ActivateChanges,
        _ => return name.parse::<u32>().ok().and_then(ReinitializeState::from_u32),
    };
    Some(state)
}

fn communication_state_from_name(name: &str) -> Option<DeviceCommunicationState> {
    let state = match name {
        "enable" => DeviceCommunicationState::Enable,
        "disable" => DeviceCommunicationState::Disable,
        "disable-initiation" => DeviceCommunicationState::DisableInitiation,
        _ => {
            return name
                .parse::<u32>()
                .ok()
                .and_then(DeviceCommunicationState::from_u32)
        }
    };
    Some(state)
}

/// Current UTC date and time in the protocol's representation.
fn utc_now() -> (Date, Time) {
    let since_epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let days = (since_epoch.as_secs() / 86_400) as i64;
    let secs_of_day = since_epoch.as_secs() % 86_400;

    let (year, month, day) = civil_from_days(days);
    // 1970-01-01 was a Thursday; the protocol counts Monday as 1.
    let weekday = ((days + 3).rem_euclid(7) + 1) as u8;

    let date = Date {
        year_since_1900: (year - 1900) as u8,
        month,
        day,
        weekday,
    };
    let time = Time {
        hour: (secs_of_day / 3600) as u8,
        minute: (secs_of_day % 3600 / 60) as u8,
        second: (secs_of_day % 60) as u8,
        hundredths: (since_epoch.subsec_millis() / 10) as u8,
    };
    (date, time)
}

/// Gregorian date from days since the Unix epoch (Howard Hinnant's
/// civil-from-days algorithm).
fn civil_from_days(days: i64) -> (i64, u8, u8) {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u8;
    let month = (if mp < 10 { mp + 3 } else { mp - 9 }) as u8;
    let year = yoe + era * 400 + i64::from(month <= 2);
    (year, month, day)
}

#[cfg(test)]
mod tests {
    use super::{civil_from_days, dispatch_line};
    use crate::bridge;
    use crate::context::{ClientConfig, ClientContext};
    use crate::testutil::{test_addr, ChannelDataLink};
    use bacpipe_core::apdu::{ComplexAckHeader, ConfirmedRequestHeader, SimpleAck};
    use bacpipe_core::encoding::{reader::Reader, writer::Writer};
    use bacpipe_core::npdu::Npdu;
    use bacpipe_core::services::i_am::IAmRequest;
    use bacpipe_core::services::read_property::{
        ReadPropertyAck, ReadPropertyRequest, SERVICE_READ_PROPERTY,
    };
    use bacpipe_core::services::subscribe_cov::SERVICE_SUBSCRIBE_COV;
    use bacpipe_core::services::who_is::WhoIsRequest;
    use bacpipe_core::services::write_property::{WritePropertyRequest, SERVICE_WRITE_PROPERTY};
    use bacpipe_core::types::{DataValue, ObjectId, ObjectType};
    use bacpipe_datalink::DataLink;
    use std::sync::Arc;
    use std::time::Duration;

    fn test_config() -> ClientConfig {
        ClientConfig {
            request_timeout: Duration::from_millis(500),
            discovery_wait: Duration::from_millis(10),
            ..ClientConfig::default()
        }
    }

    fn spawn_client() -> (Arc<ClientContext<ChannelDataLink>>, ChannelDataLink) {
        let (local, remote) = ChannelDataLink::pair(test_addr(1), test_addr(10));
        let ctx = Arc::new(ClientContext::new(local, test_config()));
        tokio::spawn(bridge::run(ctx.clone()));
        (ctx, remote)
    }

    /// Runs a fake device answering confirmed requests with canned replies.
    async fn answer_read_property(remote: &ChannelDataLink, value: DataValue<'_>) {
        let mut buf = [0u8; 512];
        let (n, src) = remote.recv(&mut buf).await.unwrap();
        let mut r = Reader::new(&buf[..n]);
        Npdu::decode(&mut r).unwrap();
        let header = ConfirmedRequestHeader::decode(&mut r).unwrap();
        assert_eq!(header.service_choice, SERVICE_READ_PROPERTY);
        let req = ReadPropertyRequest::decode_after_header(&mut r, header.invoke_id).unwrap();

        let mut reply = [0u8; 512];
        let mut w = Writer::new(&mut reply);
        Npdu::application().encode(&mut w).unwrap();
        ComplexAckHeader {
            segmented: false,
            more_follows: false,
            invoke_id: header.invoke_id,
            sequence_number: None,
            proposed_window_size: None,
            service_choice: SERVICE_READ_PROPERTY,
        }
        .encode(&mut w)
        .unwrap();
        ReadPropertyAck {
            object_id: req.object_id,
            property_id: req.property_id,
            array_index: req.array_index,
            values: vec![value],
        }
        .encode_after_header(&mut w)
        .unwrap();
        remote.send(src, w.as_written()).await.unwrap();
    }

    #[tokio::test]
    async fn invalid_json_and_missing_cmd() {
        let (ctx, _remote) = spawn_client();
        let response = dispatch_line(&*ctx, "this is not json").await;
        assert_eq!(response["status"], "error");
        assert_eq!(response["error"], "Invalid JSON");

        let response = dispatch_line(&*ctx, r#"{"device": 1}"#).await;
        assert_eq!(response["error"], "Missing 'cmd' field");

        let response = dispatch_line(&*ctx, r#"{"cmd": "frobnicate"}"#).await;
        assert_eq!(response["error"], "Unknown command: frobnicate");
    }

    #[tokio::test]
    async fn iam_is_refused() {
        let (ctx, _remote) = spawn_client();
        let response = dispatch_line(&*ctx, r#"{"cmd": "iam"}"#).await;
        assert_eq!(response["error"], "I-Am not implemented for pure client");
    }

    #[tokio::test]
    async fn readprop_requires_parameters_and_valid_object() {
        let (ctx, _remote) = spawn_client();
        let response = dispatch_line(&*ctx, r#"{"cmd": "readprop", "device": 1}"#).await;
        assert_eq!(
            response["error"],
            "Missing required parameters (device, object, property)"
        );

        let response = dispatch_line(
            &*ctx,
            r#"{"cmd": "readprop", "device": 1, "object": "bogus", "property": "present-value"}"#,
        )
        .await;
        assert_eq!(response["error"], "Invalid object ID format");

        let response = dispatch_line(
            &*ctx,
            r#"{"cmd": "readprop", "device": 1, "object": "analog-input:1", "property": "no-such"}"#,
        )
        .await;
        assert_eq!(response["error"], "Unknown property name");

        let response = dispatch_line(
            &*ctx,
            r#"{"cmd": "readprop", "device": 1, "object": "analog-input:1", "property": "present-value"}"#,
        )
        .await;
        assert_eq!(
            response["error"],
            "Device not found. Provide 'ip' or run Who-Is first."
        );
        // None of the failures above got far enough to allocate an
        // invoke id.
        assert_eq!(ctx.pending.outstanding().await, 0);
    }

    #[tokio::test]
    async fn readprop_round_trip_with_explicit_ip() {
        let (ctx, remote) = spawn_client();
        let device = tokio::spawn(async move {
            answer_read_property(&remote, DataValue::Real(21.5)).await;
            remote
        });

        let response = dispatch_line(
            &*ctx,
            r#"{"cmd": "readprop", "device": 1234, "ip": "192.168.1.10", "object": "analog-input:1", "property": "present-value"}"#,
        )
        .await;
        assert_eq!(response["status"], "success");
        assert_eq!(response["service"], "ReadProperty");
        assert_eq!(response["result"]["value"], "21.5");
        assert_eq!(response["result"]["datatype"], "REAL");

        let remote = device.await.unwrap();
        assert_eq!(
            remote.destinations(),
            vec![test_addr(1)],
        );
    }

    #[tokio::test]
    async fn readprop_times_out_without_reply() {
        let (ctx, _remote) = spawn_client();
        let response = dispatch_line(
            &*ctx,
            r#"{"cmd": "readprop", "device": 1, "ip": "192.168.1.10", "object": "analog-input:1", "property": "present-value"}"#,
        )
        .await;
        assert_eq!(response["status"], "error");
        assert_eq!(response["error"], "Request timeout");
    }

    #[tokio::test]
    async fn whois_broadcasts_with_clamped_swapped_limits() {
        let (ctx, remote) = spawn_client();
        let response = dispatch_line(
            &*ctx,
            r#"{"cmd": "whois", "deviceMin": 500, "deviceMax": 100}"#,
        )
        .await;
        assert_eq!(response["status"], "success");
        assert_eq!(response["message"], "Who-Is sent and waited for responses");

        let mut buf = [0u8; 64];
        let (n, _) = remote.recv(&mut buf).await.unwrap();
        let mut r = Reader::new(&buf[..n]);
        Npdu::decode(&mut r).unwrap();
        bacpipe_core::apdu::UnconfirmedRequestHeader::decode(&mut r).unwrap();
        let req = WhoIsRequest::decode_after_header(&mut r).unwrap();
        assert_eq!(req.low_limit, Some(100));
        assert_eq!(req.high_limit, Some(500));
    }

    #[tokio::test]
    async fn writeprop_reports_write_successful() {
        let (ctx, remote) = spawn_client();
        let device = tokio::spawn(async move {
            let mut buf = [0u8; 512];
            let (n, src) = remote.recv(&mut buf).await.unwrap();
            let mut r = Reader::new(&buf[..n]);
            Npdu::decode(&mut r).unwrap();
            let header = ConfirmedRequestHeader::decode(&mut r).unwrap();
            assert_eq!(header.service_choice, SERVICE_WRITE_PROPERTY);
            let req =
                WritePropertyRequest::decode_after_header(&mut r, header.invoke_id).unwrap();
            assert_eq!(req.value, DataValue::Real(72.5));
            assert_eq!(req.priority, Some(8));

            let mut reply = [0u8; 64];
            let mut w = Writer::new(&mut reply);
            Npdu::application().encode(&mut w).unwrap();
            SimpleAck {
                invoke_id: header.invoke_id,
                service_choice: SERVICE_WRITE_PROPERTY,
            }
            .encode(&mut w)
            .unwrap();
            remote.send(src, w.as_written()).await.unwrap();
        });

        let response = dispatch_line(
            &*ctx,
            r#"{"cmd": "writeprop", "device": 1, "ip": "192.168.1.10", "object": "analog-value:3", "property": "present-value", "value": 72.5, "datatype": "real", "priority": 8}"#,
        )
        .await;
        device.await.unwrap();
        assert_eq!(response["status"], "success");
        assert_eq!(response["message"], "Write successful");
    }

    #[tokio::test]
    async fn subscribecov_success_records_subscription() {
        let (ctx, remote) = spawn_client();
        let device = tokio::spawn(async move {
            let mut buf = [0u8; 512];
            let (n, src) = remote.recv(&mut buf).await.unwrap();
            let mut r = Reader::new(&buf[..n]);
            Npdu::decode(&mut r).unwrap();
            let header = ConfirmedRequestHeader::decode(&mut r).unwrap();
            assert_eq!(header.service_choice, SERVICE_SUBSCRIBE_COV);

            let mut reply = [0u8; 64];
            let mut w = Writer::new(&mut reply);
            Npdu::application().encode(&mut w).unwrap();
            SimpleAck {
                invoke_id: header.invoke_id,
                service_choice: SERVICE_SUBSCRIBE_COV,
            }
            .encode(&mut w)
            .unwrap();
            remote.send(src, w.as_written()).await.unwrap();
        });

        let response = dispatch_line(
            &*ctx,
            r#"{"cmd": "subscribecov", "device": 1234, "ip": "192.168.1.10", "object": "analog-input:2", "lifetime": 300}"#,
        )
        .await;
        device.await.unwrap();
        assert_eq!(response["status"], "success");

        let sub = ctx
            .cov
            .find(1234, ObjectId::new(ObjectType::AnalogInput, 2))
            .await
            .unwrap();
        assert_eq!(sub.lifetime_seconds, 300);
    }

    #[tokio::test]
    async fn devicelist_reports_cached_devices() {
        let (ctx, _remote) = spawn_client();
        ctx.devices.upsert(1234, test_addr(10), 1476, 3, 260).await;
        ctx.devices.set_name(1234, "unit-1".to_string()).await;

        let response = dispatch_line(&*ctx, r#"{"cmd": "devicelist"}"#).await;
        assert_eq!(response["status"], "success");
        assert_eq!(response["deviceCount"], 1);
        let device = &response["devices"][0];
        assert_eq!(device["deviceId"], 1234);
        assert_eq!(device["address"], "C0:A8:01:0A:BA:C0");
        assert_eq!(device["segmentation"], "no-segmentation");
        assert_eq!(device["name"], "unit-1");
    }

    #[tokio::test]
    async fn devicelist_after_discovery_lists_each_device_once() {
        let (ctx, remote) = spawn_client();
        // Device 20 announces twice; the cache must still hold it once.
        for instance in [20u32, 10, 20] {
            let mut buf = [0u8; 64];
            let mut w = Writer::new(&mut buf);
            Npdu::application().encode(&mut w).unwrap();
            IAmRequest {
                device_id: ObjectId::new(ObjectType::Device, instance),
                max_apdu: 1476,
                segmentation: 3,
                vendor_id: 260,
            }
            .encode(&mut w)
            .unwrap();
            remote.send(test_addr(1), w.as_written()).await.unwrap();
        }

        tokio::time::timeout(Duration::from_secs(1), async {
            while ctx.devices.len().await < 2 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        let response = dispatch_line(&*ctx, r#"{"cmd": "devicelist"}"#).await;
        assert_eq!(response["deviceCount"], 2);
        let ids: Vec<i64> = response["devices"]
            .as_array()
            .unwrap()
            .iter()
            .map(|d| d["deviceId"].as_i64().unwrap())
            .collect();
        assert_eq!(ids, vec![10, 20]);
    }

    #[tokio::test]
    async fn objectlist_reads_count_then_elements() {
        let (ctx, remote) = spawn_client();
        let device = tokio::spawn(async move {
            answer_read_property(&remote, DataValue::Unsigned(2)).await;
            answer_read_property(
                &remote,
                DataValue::ObjectId(ObjectId::new(ObjectType::Device, 1234)),
            )
            .await;
            answer_read_property(
                &remote,
                DataValue::ObjectId(ObjectId::new(ObjectType::AnalogInput, 1)),
            )
            .await;
        });

        let response = dispatch_line(
            &*ctx,
            r#"{"cmd": "objectlist", "device": 1234, "ip": "192.168.1.10"}"#,
        )
        .await;
        device.await.unwrap();
        assert_eq!(response["status"], "success");
        assert_eq!(response["objectCount"], 2);
        assert_eq!(response["objects"][0], "device:1234");
        assert_eq!(response["objects"][1], "analog-input:1");
    }

    #[tokio::test]
    async fn objectlist_requires_known_device() {
        let (ctx, _remote) = spawn_client();
        let response = dispatch_line(&*ctx, r#"{"cmd": "objectlist"}"#).await;
        assert_eq!(response["error"], "Missing required parameter: device");

        let response = dispatch_line(&*ctx, r#"{"cmd": "objectlist", "device": 77}"#).await;
        assert_eq!(
            response["error"],
            "Device not found in cache, provide 'ip' parameter"
        );
    }

    #[tokio::test]
    async fn reinit_rejects_unknown_state() {
        let (ctx, _remote) = spawn_client();
        let response = dispatch_line(
            &*ctx,
            r#"{"cmd": "reinit", "device": 1, "ip": "192.168.1.10", "state": "sideways"}"#,
        )
        .await;
        assert_eq!(response["error"], "Invalid reinitialize state");
    }

    #[tokio::test]
    async fn invalid_address_formats_are_reported() {
        let (ctx, _remote) = spawn_client();
        let response = dispatch_line(
            &*ctx,
            r#"{"cmd": "readprop", "device": 1, "ip": "not-an-ip", "object": "analog-input:1", "property": "present-value"}"#,
        )
        .await;
        assert_eq!(response["error"], "Invalid IP address format");

        let response = dispatch_line(
            &*ctx,
            r#"{"cmd": "readprop", "device": 1, "address": "ZZ:00", "object": "analog-input:1", "property": "present-value"}"#,
        )
        .await;
        assert_eq!(response["error"], "Invalid MAC address format");
    }

    #[test]
    fn civil_from_days_known_dates() {
        assert_eq!(civil_from_days(0), (1970, 1, 1));
        assert_eq!(civil_from_days(19_723), (2024, 1, 1));
        // Leap day.
        assert_eq!(civil_from_days(19_782), (2024, 2, 29));
        assert_eq!(civil_from_days(-1), (1969, 12, 31));
    }
}
