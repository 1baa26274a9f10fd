//! The vendor digitizer library seen from Rust.
//!
//! [`CaenApi`] has one method per `CAEN_DGTZ_*` call used by the session.
//! Implementations return the vendor [`ErrorCode`] on failure; severity and
//! logging are decided by the caller.

use serde::{Deserialize, Serialize};
use std::fmt;

#[repr(i32)]
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub enum ErrorCode {
    Success = 0,
    CommError = -1,
    GenericError = -2,
    InvalidParam = -3,
    InvalidLinkType = -4,
    InvalidHandle = -5,
    MaxDevicesError = -6,
    BadBoardType = -7,
    BadInterruptLev = -8,
    BadEventNumber = -9,
    ReadDeviceRegisterFail = -10,
    WriteDeviceRegisterFail = -11,
    InvalidChannelNumber = -13,
    ChannelBusy = -14,
    FPIOModeInvalid = -15,
    WrongAcqMode = -16,
    FunctionNotAllowed = -17,
    Timeout = -18,
    InvalidBuffer = -19,
    EventNotFound = -20,
    InvalidEvent = -21,
    OutOfMemory = -22,
    CalibrationError = -23,
    DigitizerNotFound = -24,
    DigitizerAlreadyOpen = -25,
    DigitizerNotReady = -26,
    InterruptNotConfigured = -27,
    DigitizerMemoryCorrupted = -28,
    DPPFirmwareNotSupported = -29,
    InvalidLicense = -30,
    InvalidDigitizerStatus = -31,
    UnsupportedTrace = -32,
    InvalidProbe = -33,
    UnsupportedBaseAddress = -34,
    NotYetImplemented = -99,
    Unknown = 1,
}

impl From<i32> for ErrorCode {
    fn from(value: i32) -> Self {
        match value {
            0 => Self::Success,
            -1 => Self::CommError,
            -2 => Self::GenericError,
            -3 => Self::InvalidParam,
            -4 => Self::InvalidLinkType,
            -5 => Self::InvalidHandle,
            -6 => Self::MaxDevicesError,
            -7 => Self::BadBoardType,
            -8 => Self::BadInterruptLev,
            -9 => Self::BadEventNumber,
            -10 => Self::ReadDeviceRegisterFail,
            -11 => Self::WriteDeviceRegisterFail,
            -13 => Self::InvalidChannelNumber,
            -14 => Self::ChannelBusy,
            -15 => Self::FPIOModeInvalid,
            -16 => Self::WrongAcqMode,
            -17 => Self::FunctionNotAllowed,
            -18 => Self::Timeout,
            -19 => Self::InvalidBuffer,
            -20 => Self::EventNotFound,
            -21 => Self::InvalidEvent,
            -22 => Self::OutOfMemory,
            -23 => Self::CalibrationError,
            -24 => Self::DigitizerNotFound,
            -25 => Self::DigitizerAlreadyOpen,
            -26 => Self::DigitizerNotReady,
            -27 => Self::InterruptNotConfigured,
            -28 => Self::DigitizerMemoryCorrupted,
            -29 => Self::DPPFirmwareNotSupported,
            -30 => Self::InvalidLicense,
            -31 => Self::InvalidDigitizerStatus,
            -32 => Self::UnsupportedTrace,
            -33 => Self::InvalidProbe,
            -34 => Self::UnsupportedBaseAddress,
            -99 => Self::NotYetImplemented,
            _ => Self::Unknown,
        }
    }
}

/// How a non-success vendor code affects the session.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Severity {
    Warning,
    Error,
}

impl ErrorCode {
    /// Turns a raw vendor return value into a `Result`.
    pub fn check(raw: i32) -> Result<(), ErrorCode> {
        match ErrorCode::from(raw) {
            ErrorCode::Success => Ok(()),
            code => Err(code),
        }
    }

    pub fn severity(self) -> Option<Severity> {
        match self {
            ErrorCode::Success => None,
            ErrorCode::ChannelBusy
            | ErrorCode::FunctionNotAllowed
            | ErrorCode::Timeout
            | ErrorCode::DigitizerAlreadyOpen
            | ErrorCode::DPPFirmwareNotSupported
            | ErrorCode::NotYetImplemented => Some(Severity::Warning),
            _ => Some(Severity::Error),
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            ErrorCode::Success => "Success",
            ErrorCode::CommError => "Communication error",
            ErrorCode::GenericError | ErrorCode::Unknown => "Unspecified error",
            ErrorCode::InvalidParam => "Invalid parameter",
            ErrorCode::InvalidLinkType => "Invalid link type",
            ErrorCode::InvalidHandle => "Invalid device handle",
            ErrorCode::MaxDevicesError => "Maximum number of devices exceeded",
            ErrorCode::BadBoardType => "The operation is not allowed on this type of board",
            ErrorCode::BadInterruptLev => "The interrupt level is not allowed",
            ErrorCode::BadEventNumber => "The event number is bad",
            ErrorCode::ReadDeviceRegisterFail => "Unable to read the registry",
            ErrorCode::WriteDeviceRegisterFail => "Unable to write into the registry",
            ErrorCode::InvalidChannelNumber => "The channel number is invalid",
            ErrorCode::ChannelBusy => "The Channel is busy",
            ErrorCode::FPIOModeInvalid => "Invalid FPIO Mode",
            ErrorCode::WrongAcqMode => "Wrong acquisition mode",
            ErrorCode::FunctionNotAllowed => "This function is not allowed for this module",
            ErrorCode::Timeout => "Communication Timeout",
            ErrorCode::InvalidBuffer => "The buffer is invalid",
            ErrorCode::EventNotFound => "The event is not found",
            ErrorCode::InvalidEvent => "The event is invalid",
            ErrorCode::OutOfMemory => "Out of memory",
            ErrorCode::CalibrationError => "Unable to calibrate the board",
            ErrorCode::DigitizerNotFound => "Unable to open the digitizer",
            ErrorCode::DigitizerAlreadyOpen => "The Digitizer is already open",
            ErrorCode::DigitizerNotReady => "The Digitizer is not ready to operate",
            ErrorCode::InterruptNotConfigured => "The Digitizer has not the IRQ configured",
            ErrorCode::DigitizerMemoryCorrupted => "The digitizer flash memory is corrupted",
            ErrorCode::DPPFirmwareNotSupported => {
                "The digitizer dpp firmware is not supported in this lib version"
            }
            ErrorCode::InvalidLicense => "Invalid Firmware License",
            ErrorCode::InvalidDigitizerStatus => "The digitizer is found in a corrupted status",
            ErrorCode::UnsupportedTrace => "The given trace is not supported by the digitizer",
            ErrorCode::InvalidProbe => {
                "The given probe is not supported for the given digitizer's trace"
            }
            ErrorCode::UnsupportedBaseAddress => {
                "The Base Address is not supported, it's a Desktop device?"
            }
            ErrorCode::NotYetImplemented => "The function is not yet implemented",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.description(), *self as i32)
    }
}

/// Physical link handed to `CAEN_DGTZ_OpenDigitizer`.
#[repr(i32)]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum LinkType {
    Usb = 0,
    OpticalLink = 1,
    UsbA4818 = 5,
    EthV4718 = 6,
    UsbV4718 = 7,
}

/// Trigger source behaviour (software, external or channel self-trigger).
#[repr(u32)]
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerMode {
    Disabled = 0,
    #[default]
    AcqOnly = 1,
    ExtoutOnly = 2,
    AcqAndExtout = 3,
}

impl TriggerMode {
    /// Whether a trigger from this source starts an acquisition window.
    pub fn acquires(self) -> bool {
        matches!(self, TriggerMode::AcqOnly | TriggerMode::AcqAndExtout)
    }
}

#[repr(u32)]
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcqMode {
    #[default]
    SwControlled = 0,
    SInControlled = 1,
    FirstTrgControlled = 2,
    LvdsControlled = 3,
}

#[repr(u32)]
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IoLevel {
    #[default]
    Nim = 0,
    Ttl = 1,
}

#[repr(u32)]
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerPolarity {
    #[default]
    RisingEdge = 0,
    FallingEdge = 1,
}

/// Subset of `CAEN_DGTZ_BoardInfo_t` the session keeps around.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BoardInfo {
    pub model_name: String,
    pub model: u32,
    pub channels: u32,
    pub form_factor: u32,
    pub family_code: u32,
    pub roc_firmware: String,
    pub amc_firmware: String,
    pub serial_number: u32,
    pub pcb_revision: u32,
    pub adc_nbits: u32,
}

/// Mirror of `CAEN_DGTZ_EventInfo_t`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EventInfo {
    pub event_size: u32,
    pub board_id: u32,
    pub pattern: u32,
    pub channel_mask: u32,
    pub event_counter: u32,
    pub trigger_time_tag: u32,
}

/// Location of one event inside a readout buffer.
///
/// Only meaningful for the buffer it was obtained from, and only until that
/// buffer is read into again or dropped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EventSlice {
    pub offset: usize,
    pub len: usize,
}

/// A readout buffer allocated by the vendor library for one handle.
pub trait ReadoutBuffer {
    /// Size in bytes reported by the allocator.
    fn capacity(&self) -> u32;
}

/// A decode target allocated by the vendor library (`CAEN_DGTZ_UINT16_EVENT_t`).
pub trait DecodedEvent {
    /// Number of samples the vendor decoded for `channel`, 0 when absent.
    fn channel_size(&self, channel: usize) -> u32;
    /// Decoded samples of `channel`, empty when absent.
    fn channel_data(&self, channel: usize) -> &[u16];
}

/// The vendor digitizer library.
///
/// Memory handed out by [`malloc_readout_buffer`](CaenApi::malloc_readout_buffer)
/// and [`allocate_event`](CaenApi::allocate_event) is released when the
/// returned value is dropped.
pub trait CaenApi {
    type Buffer: ReadoutBuffer;
    type Event: DecodedEvent;

    fn open_digitizer(
        &mut self,
        link: LinkType,
        link_num: i32,
        conet_node: i32,
        vme_base_address: u32,
    ) -> Result<i32, ErrorCode>;
    fn close_digitizer(&mut self, handle: i32) -> Result<(), ErrorCode>;
    fn reset(&mut self, handle: i32) -> Result<(), ErrorCode>;
    fn get_info(&mut self, handle: i32) -> Result<BoardInfo, ErrorCode>;

    fn write_register(&mut self, handle: i32, address: u32, value: u32) -> Result<(), ErrorCode>;
    fn read_register(&mut self, handle: i32, address: u32) -> Result<u32, ErrorCode>;

    fn set_max_num_events_blt(&mut self, handle: i32, events: u32) -> Result<(), ErrorCode>;
    fn set_record_length(&mut self, handle: i32, samples: u32) -> Result<(), ErrorCode>;
    fn get_record_length(&mut self, handle: i32) -> Result<u32, ErrorCode>;
    fn set_decimation_factor(&mut self, handle: i32, factor: u16) -> Result<(), ErrorCode>;
    fn set_post_trigger_size(&mut self, handle: i32, percent: u32) -> Result<(), ErrorCode>;
    fn set_sw_trigger_mode(&mut self, handle: i32, mode: TriggerMode) -> Result<(), ErrorCode>;
    fn set_ext_trigger_input_mode(
        &mut self,
        handle: i32,
        mode: TriggerMode,
    ) -> Result<(), ErrorCode>;
    fn set_acquisition_mode(&mut self, handle: i32, mode: AcqMode) -> Result<(), ErrorCode>;
    fn set_trigger_polarity(
        &mut self,
        handle: i32,
        channel: u32,
        polarity: TriggerPolarity,
    ) -> Result<(), ErrorCode>;
    fn set_io_level(&mut self, handle: i32, level: IoLevel) -> Result<(), ErrorCode>;

    fn set_channel_enable_mask(&mut self, handle: i32, mask: u32) -> Result<(), ErrorCode>;
    fn set_channel_self_trigger(
        &mut self,
        handle: i32,
        mode: TriggerMode,
        mask: u32,
    ) -> Result<(), ErrorCode>;
    fn set_channel_trigger_threshold(
        &mut self,
        handle: i32,
        channel: u32,
        threshold: u32,
    ) -> Result<(), ErrorCode>;
    fn set_channel_dc_offset(
        &mut self,
        handle: i32,
        channel: u32,
        offset: u32,
    ) -> Result<(), ErrorCode>;

    fn set_group_enable_mask(&mut self, handle: i32, mask: u32) -> Result<(), ErrorCode>;
    fn set_group_self_trigger(
        &mut self,
        handle: i32,
        mode: TriggerMode,
        mask: u32,
    ) -> Result<(), ErrorCode>;
    fn set_group_trigger_threshold(
        &mut self,
        handle: i32,
        group: u32,
        threshold: u32,
    ) -> Result<(), ErrorCode>;
    fn set_group_dc_offset(&mut self, handle: i32, group: u32, offset: u32)
        -> Result<(), ErrorCode>;
    fn set_channel_group_mask(
        &mut self,
        handle: i32,
        group: u32,
        mask: u32,
    ) -> Result<(), ErrorCode>;

    fn send_sw_trigger(&mut self, handle: i32) -> Result<(), ErrorCode>;
    fn sw_start_acquisition(&mut self, handle: i32) -> Result<(), ErrorCode>;
    fn sw_stop_acquisition(&mut self, handle: i32) -> Result<(), ErrorCode>;
    fn clear_data(&mut self, handle: i32) -> Result<(), ErrorCode>;

    fn malloc_readout_buffer(&mut self, handle: i32) -> Result<Self::Buffer, ErrorCode>;
    /// Slave-terminated MBLT readout; returns the number of bytes written.
    fn read_data(&mut self, handle: i32, buffer: &mut Self::Buffer) -> Result<u32, ErrorCode>;
    fn get_num_events(
        &mut self,
        handle: i32,
        buffer: &Self::Buffer,
        data_size: u32,
    ) -> Result<u32, ErrorCode>;
    fn get_event_info(
        &mut self,
        handle: i32,
        buffer: &Self::Buffer,
        data_size: u32,
        index: u32,
    ) -> Result<(EventInfo, EventSlice), ErrorCode>;
    fn allocate_event(&mut self, handle: i32) -> Result<Self::Event, ErrorCode>;
    fn decode_event(
        &mut self,
        handle: i32,
        buffer: &Self::Buffer,
        slice: EventSlice,
        event: &mut Self::Event,
    ) -> Result<(), ErrorCode>;
}
