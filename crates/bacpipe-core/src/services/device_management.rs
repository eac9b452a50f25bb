use crate::apdu::ConfirmedRequestHeader;
use crate::encoding::{
    primitives::{encode_ctx_character_string, encode_ctx_unsigned},
    writer::Writer,
};
use crate::EncodeError;

pub const SERVICE_DEVICE_COMMUNICATION_CONTROL: u8 = 0x11;
pub const SERVICE_REINITIALIZE_DEVICE: u8 = 0x14;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum DeviceCommunicationState {
    Enable = 0,
    Disable = 1,
    DisableInitiation = 2,
}

impl DeviceCommunicationState {
    pub const fn to_u32(self) -> u32 {
        self as u32
    }

    pub const fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Enable),
            1 => Some(Self::Disable),
            2 => Some(Self::DisableInitiation),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ReinitializeState {
    Coldstart = 0,
    Warmstart = 1,
    StartBackup = 2,
    EndBackup = 3,
    StartRestore = 4,
    EndRestore = 5,
    AbortRestore = 6,
    ActivateChanges = 7,
}

impl ReinitializeState {
    pub const fn to_u32(self) -> u32 {
        self as u32
    }

    pub const fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Coldstart),
            1 => Some(Self::Warmstart),
            2 => Some(Self::StartBackup),
            3 => Some(Self::EndBackup),
            4 => Some(Self::StartRestore),
            5 => Some(Self::EndRestore),
            6 => Some(Self::AbortRestore),
            7 => Some(Self::ActivateChanges),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceCommunicationControlRequest<'a> {
    pub time_duration_seconds: Option<u16>,
    pub enable_disable: DeviceCommunicationState,
    pub password: Option<&'a str>,
    pub invoke_id: u8,
}

impl<'a> DeviceCommunicationControlRequest<'a> {
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
            service_choice: SERVICE_DEVICE_COMMUNICATION_CONTROL,
        }
        .encode(w)?;
        if let Some(duration) = self.time_duration_seconds {
            encode_ctx_unsigned(w, 0, duration as u32)?;
        }
        encode_ctx_unsigned(w, 1, self.enable_disable.to_u32())?;
        if let Some(password) = self.password {
            encode_ctx_character_string(w, 2, password)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReinitializeDeviceRequest<'a> {
    pub state: ReinitializeState,
    pub password: Option<&'a str>,
    pub invoke_id: u8,
}

impl<'a> ReinitializeDeviceRequest<'a> {
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
            service_choice: SERVICE_REINITIALIZE_DEVICE,
        }
        .encode(w)?;
        encode_ctx_unsigned(w, 0, self.state.to_u32())?;
        if let Some(password) = self.password {
            encode_ctx_character_string(w, 1, password)?;
        }
        Ok(())
    }
}
