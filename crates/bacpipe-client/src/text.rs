//! Human-readable names for protocol enumerations, used when building
//! response JSON. Unknown numeric values fall back to their decimal form.

use bacpipe_core::types::{
    ErrorClass, ErrorCode, ObjectType, PropertyId, RejectReason, Segmentation,
};

pub fn object_type_label(object_type: ObjectType) -> String {
    match object_type.name() {
        Some(name) => name.to_string(),
        None => object_type.to_u16().to_string(),
    }
}

pub fn property_label(property_id: PropertyId) -> String {
    match property_id.name() {
        Some(name) => name.to_string(),
        None => property_id.to_u32().to_string(),
    }
}

pub fn error_class_name(value: u32) -> String {
    let name = ErrorClass::from_u32(value).map(|class| match class {
        ErrorClass::Device => "device",
        ErrorClass::Object => "object",
        ErrorClass::Property => "property",
        ErrorClass::Resources => "resources",
        ErrorClass::Security => "security",
        ErrorClass::Services => "services",
        ErrorClass::Vt => "vt",
        ErrorClass::Communication => "communication",
    });
    match name {
        Some(name) => name.to_string(),
        None => value.to_string(),
    }
}

pub fn error_code_name(value: u32) -> String {
    let name = ErrorCode::from_u32(value).map(|code| match code {
        ErrorCode::Other => "other",
        ErrorCode::ConfigurationInProgress => "configuration-in-progress",
        ErrorCode::DeviceBusy => "device-busy",
        ErrorCode::UnknownObject => "unknown-object",
        ErrorCode::UnknownProperty => "unknown-property",
        ErrorCode::ValueOutOfRange => "value-out-of-range",
        ErrorCode::WriteAccessDenied => "write-access-denied",
    });
    match name {
        Some(name) => name.to_string(),
        None => value.to_string(),
    }
}

pub fn reject_reason_name(value: u8) -> String {
    let name = RejectReason::from_u8(value).map(|reason| match reason {
        RejectReason::Other => "other",
        RejectReason::BufferOverflow => "buffer-overflow",
        RejectReason::InconsistentParameters => "inconsistent-parameters",
        RejectReason::InvalidParameterDataType => "invalid-parameter-data-type",
        RejectReason::InvalidTag => "invalid-tag",
        RejectReason::MissingRequiredParameter => "missing-required-parameter",
        RejectReason::ParameterOutOfRange => "parameter-out-of-range",
        RejectReason::TooManyArguments => "too-many-arguments",
        RejectReason::UndefinedEnumeration => "undefined-enumeration",
        RejectReason::UnrecognizedService => "unrecognized-service",
    });
    match name {
        Some(name) => name.to_string(),
        None => value.to_string(),
    }
}

pub fn abort_reason_name(value: u8) -> String {
    let name = match value {
        0 => Some("other"),
        1 => Some("buffer-overflow"),
        2 => Some("invalid-apdu-in-this-state"),
        3 => Some("preempted-by-higher-priority-task"),
        4 => Some("segmentation-not-supported"),
        5 => Some("security-error"),
        6 => Some("insufficient-security"),
        7 => Some("window-size-out-of-range"),
        8 => Some("application-exceeded-reply-time"),
        9 => Some("out-of-resources"),
        10 => Some("tsm-timeout"),
        11 => Some("apdu-too-long"),
        _ => None,
    };
    match name {
        Some(name) => name.to_string(),
        None => value.to_string(),
    }
}

pub fn segmentation_name(value: u32) -> String {
    let name = Segmentation::from_u32(value).map(|seg| match seg {
        Segmentation::SegmentedBoth => "segmented-both",
        Segmentation::SegmentedTransmit => "segmented-transmit",
        Segmentation::SegmentedReceive => "segmented-receive",
        Segmentation::NoSegmentation => "no-segmentation",
    });
    match name {
        Some(name) => name.to_string(),
        None => value.to_string(),
    }
}
