/// BACnet property identifiers.
///
/// The named variants are the properties the daemons read, write, serve, or
/// report; anything else travels as [`Proprietary`](Self::Proprietary) with
/// its raw number. `name`/`from_name` map the kebab-case spellings used on
/// the JSON control surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyId {
    ObjectIdentifier,
    ObjectList,
    ObjectName,
    ObjectType,
    PresentValue,
    Description,
    StatusFlags,
    OutOfService,
    Units,
    VendorName,
    VendorIdentifier,
    ModelName,
    MaxApduLengthAccepted,
    SegmentationSupported,
    SystemStatus,
    NumberOfStates,
    RelinquishDefault,
    CovIncrement,
    Enable,
    RecordCount,
    TotalRecordCount,
    BufferSize,
    LogBuffer,
    LogInterval,
    LoggingType,
    AlignIntervals,
    StopWhenFull,
    LogDeviceObjectProperty,
    Proprietary(u32),
}

impl PropertyId {
    pub const fn to_u32(self) -> u32 {
        match self {
            Self::ObjectIdentifier => 75,
            Self::ObjectList => 76,
            Self::ObjectName => 77,
            Self::ObjectType => 79,
            Self::PresentValue => 85,
            Self::Description => 28,
            Self::StatusFlags => 111,
            Self::OutOfService => 81,
            Self::Units => 117,
            Self::VendorName => 121,
            Self::VendorIdentifier => 120,
            Self::ModelName => 70,
            Self::MaxApduLengthAccepted => 62,
            Self::SegmentationSupported => 107,
            Self::SystemStatus => 112,
            Self::NumberOfStates => 74,
            Self::RelinquishDefault => 104,
            Self::CovIncrement => 22,
            Self::Enable => 133,
            Self::RecordCount => 141,
            Self::TotalRecordCount => 145,
            Self::BufferSize => 126,
            Self::LogBuffer => 131,
            Self::LogInterval => 134,
            Self::LoggingType => 197,
            Self::AlignIntervals => 193,
            Self::StopWhenFull => 143,
            Self::LogDeviceObjectProperty => 132,
            Self::Proprietary(v) => v,
        }
    }

    pub const fn from_u32(value: u32) -> Self {
        match value {
            75 => Self::ObjectIdentifier,
            76 => Self::ObjectList,
            77 => Self::ObjectName,
            79 => Self::ObjectType,
            85 => Self::PresentValue,
            28 => Self::Description,
            111 => Self::StatusFlags,
            81 => Self::OutOfService,
            117 => Self::Units,
            121 => Self::VendorName,
            120 => Self::VendorIdentifier,
            70 => Self::ModelName,
            62 => Self::MaxApduLengthAccepted,
            107 => Self::SegmentationSupported,
            112 => Self::SystemStatus,
            74 => Self::NumberOfStates,
            104 => Self::RelinquishDefault,
            22 => Self::CovIncrement,
            133 => Self::Enable,
            141 => Self::RecordCount,
            145 => Self::TotalRecordCount,
            126 => Self::BufferSize,
            131 => Self::LogBuffer,
            134 => Self::LogInterval,
            197 => Self::LoggingType,
            193 => Self::AlignIntervals,
            143 => Self::StopWhenFull,
            132 => Self::LogDeviceObjectProperty,
            v => Self::Proprietary(v),
        }
    }

    /// Canonical kebab-case name, as used in command and response JSON.
    pub const fn name(self) -> Option<&'static str> {
        match self {
            Self::ObjectIdentifier => Some("object-identifier"),
            Self::ObjectList => Some("object-list"),
            Self::ObjectName => Some("object-name"),
            Self::ObjectType => Some("object-type"),
            Self::PresentValue => Some("present-value"),
            Self::Description => Some("description"),
            Self::StatusFlags => Some("status-flags"),
            Self::OutOfService => Some("out-of-service"),
            Self::Units => Some("units"),
            Self::VendorName => Some("vendor-name"),
            Self::VendorIdentifier => Some("vendor-identifier"),
            Self::ModelName => Some("model-name"),
            Self::MaxApduLengthAccepted => Some("max-apdu-length-accepted"),
            Self::SegmentationSupported => Some("segmentation-supported"),
            Self::SystemStatus => Some("system-status"),
            Self::NumberOfStates => Some("number-of-states"),
            Self::RelinquishDefault => Some("relinquish-default"),
            Self::CovIncrement => Some("cov-increment"),
            Self::Enable => Some("enable"),
            Self::RecordCount => Some("record-count"),
            Self::TotalRecordCount => Some("total-record-count"),
            Self::BufferSize => Some("buffer-size"),
            Self::LogBuffer => Some("log-buffer"),
            Self::LogInterval => Some("log-interval"),
            Self::LoggingType => Some("logging-type"),
            Self::AlignIntervals => Some("align-intervals"),
            Self::StopWhenFull => Some("stop-when-full"),
            Self::LogDeviceObjectProperty => Some("log-device-object-property"),
            Self::Proprietary(_) => None,
        }
    }

    /// Parses a kebab-case property name, or a bare numeric identifier.
    pub fn from_name(name: &str) -> Option<Self> {
        let known = match name {
            "object-identifier" => Self::ObjectIdentifier,
            "object-list" => Self::ObjectList,
            "object-name" => Self::ObjectName,
            "object-type" => Self::ObjectType,
            "present-value" => Self::PresentValue,
            "description" => Self::Description,
            "status-flags" => Self::StatusFlags,
            "out-of-service" => Self::OutOfService,
            "units" => Self::Units,
            "vendor-name" => Self::VendorName,
            "vendor-identifier" => Self::VendorIdentifier,
            "model-name" => Self::ModelName,
            "max-apdu-length-accepted" => Self::MaxApduLengthAccepted,
            "segmentation-supported" => Self::SegmentationSupported,
            "system-status" => Self::SystemStatus,
            "number-of-states" => Self::NumberOfStates,
            "relinquish-default" => Self::RelinquishDefault,
            "cov-increment" => Self::CovIncrement,
            "enable" => Self::Enable,
            "record-count" => Self::RecordCount,
            "total-record-count" => Self::TotalRecordCount,
            "buffer-size" => Self::BufferSize,
            "log-buffer" => Self::LogBuffer,
            "log-interval" => Self::LogInterval,
            "logging-type" => Self::LoggingType,
            "align-intervals" => Self::AlignIntervals,
            "stop-when-full" => Self::StopWhenFull,
            "log-device-object-property" => Self::LogDeviceObjectProperty,
            _ => return name.parse::<u32>().ok().map(Self::from_u32),
        };
        Some(known)
    }
}

#[cfg(test)]
mod tests {
    use super::PropertyId;

    #[test]
    fn numeric_roundtrip_named() {
        for p in [
            PropertyId::ObjectList,
            PropertyId::PresentValue,
            PropertyId::Enable,
            PropertyId::LogBuffer,
            PropertyId::RecordCount,
        ] {
            assert_eq!(PropertyId::from_u32(p.to_u32()), p);
        }
    }

    #[test]
    fn name_roundtrip() {
        assert_eq!(
            PropertyId::from_name("present-value"),
            Some(PropertyId::PresentValue)
        );
        assert_eq!(
            PropertyId::from_name("85"),
            Some(PropertyId::PresentValue)
        );
        assert_eq!(
            PropertyId::from_name("9999"),
            Some(PropertyId::Proprietary(9999))
        );
        assert_eq!(PropertyId::from_name("not-a-property"), None);
    }
}
