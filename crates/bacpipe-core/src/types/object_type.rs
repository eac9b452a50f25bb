/// BACnet object type identifiers.
///
/// Known standard types are named variants; vendor-specific types use
/// [`Proprietary`](Self::Proprietary). `name`/`from_name` map the kebab-case
/// spellings used on the JSON control surface (`"analog-input"`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ObjectType {
    AnalogInput,
    AnalogOutput,
    AnalogValue,
    BinaryInput,
    BinaryOutput,
    BinaryValue,
    Calendar,
    Command,
    Device,
    File,
    Loop,
    MultiStateInput,
    MultiStateOutput,
    NotificationClass,
    Program,
    Schedule,
    MultiStateValue,
    TrendLog,
    Accumulator,
    PulseConverter,
    Proprietary(u16),
}

impl ObjectType {
    /// Converts this object type to its numeric BACnet identifier.
    pub const fn to_u16(self) -> u16 {
        match self {
            Self::AnalogInput => 0,
            Self::AnalogOutput => 1,
            Self::AnalogValue => 2,
            Self::BinaryInput => 3,
            Self::BinaryOutput => 4,
            Self::BinaryValue => 5,
            Self::Calendar => 6,
            Self::Command => 7,
            Self::Device => 8,
            Self::File => 10,
            Self::Loop => 12,
            Self::MultiStateInput => 13,
            Self::MultiStateOutput => 14,
            Self::NotificationClass => 15,
            Self::Program => 16,
            Self::Schedule => 17,
            Self::MultiStateValue => 19,
            Self::TrendLog => 20,
            Self::Accumulator => 23,
            Self::PulseConverter => 24,
            Self::Proprietary(v) => v,
        }
    }

    /// Creates an `ObjectType` from its numeric BACnet identifier.
    ///
    /// Values without a known standard mapping become [`Proprietary`](Self::Proprietary).
    pub const fn from_u16(value: u16) -> Self {
        match value {
            0 => Self::AnalogInput,
            1 => Self::AnalogOutput,
            2 => Self::AnalogValue,
            3 => Self::BinaryInput,
            4 => Self::BinaryOutput,
            5 => Self::BinaryValue,
            6 => Self::Calendar,
            7 => Self::Command,
            8 => Self::Device,
            10 => Self::File,
            12 => Self::Loop,
            13 => Self::MultiStateInput,
            14 => Self::MultiStateOutput,
            15 => Self::NotificationClass,
            16 => Self::Program,
            17 => Self::Schedule,
            19 => Self::MultiStateValue,
            20 => Self::TrendLog,
            23 => Self::Accumulator,
            24 => Self::PulseConverter,
            v => Self::Proprietary(v),
        }
    }

    /// Canonical kebab-case name, as used in command and response JSON.
    pub const fn name(self) -> Option<&'static str> {
        match self {
            Self::AnalogInput => Some("analog-input"),
            Self::AnalogOutput => Some("analog-output"),
            Self::AnalogValue => Some("analog-value"),
            Self::BinaryInput => Some("binary-input"),
            Self::BinaryOutput => Some("binary-output"),
            Self::BinaryValue => Some("binary-value"),
            Self::Calendar => Some("calendar"),
            Self::Command => Some("command"),
            Self::Device => Some("device"),
            Self::File => Some("file"),
            Self::Loop => Some("loop"),
            Self::MultiStateInput => Some("multi-state-input"),
            Self::MultiStateOutput => Some("multi-state-output"),
            Self::NotificationClass => Some("notification-class"),
            Self::Program => Some("program"),
            Self::Schedule => Some("schedule"),
            Self::MultiStateValue => Some("multi-state-value"),
            Self::TrendLog => Some("trendlog"),
            Self::Accumulator => Some("accumulator"),
            Self::PulseConverter => Some("pulse-converter"),
            Self::Proprietary(_) => None,
        }
    }

    /// Parses a kebab-case type name, or a bare numeric identifier.
    pub fn from_name(name: &str) -> Option<Self> {
        let known = match name {
            "analog-input" => Self::AnalogInput,
            "analog-output" => Self::AnalogOutput,
            "analog-value" => Self::AnalogValue,
            "binary-input" => Self::BinaryInput,
            "binary-output" => Self::BinaryOutput,
            "binary-value" => Self::BinaryValue,
            "calendar" => Self::Calendar,
            "command" => Self::Command,
            "device" => Self::Device,
            "file" => Self::File,
            "loop" => Self::Loop,
            "multi-state-input" => Self::MultiStateInput,
            "multi-state-output" => Self::MultiStateOutput,
            "notification-class" => Self::NotificationClass,
            "program" => Self::Program,
            "schedule" => Self::Schedule,
            "multi-state-value" => Self::MultiStateValue,
            "trendlog" | "trend-log" => Self::TrendLog,
            "accumulator" => Self::Accumulator,
            "pulse-converter" => Self::PulseConverter,
            _ => return name.parse::<u16>().ok().map(Self::from_u16),
        };
        Some(known)
    }
}
