use crate::types::{BitString, Date, ObjectId, Time};

/// A decoded BACnet application data value borrowing from the frame buffer.
///
/// `Constructed` carries the children of an opening/closing tag pair, as
/// produced by property values that are themselves sequences (priority
/// arrays, object lists read whole, device-object-property references).
#[derive(Debug, Clone, PartialEq)]
pub enum DataValue<'a> {
    Null,
    Boolean(bool),
    Unsigned(u32),
    Signed(i32),
    Real(f32),
    Double(f64),
    OctetString(&'a [u8]),
    CharacterString(&'a str),
    BitString(BitString<'a>),
    Enumerated(u32),
    Date(Date),
    Time(Time),
    ObjectId(ObjectId),
    Constructed {
        tag_num: u8,
        values: Vec<DataValue<'a>>,
    },
}
