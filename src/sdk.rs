//! [`CaenApi`] on top of the vendor `CAENDigitizer` library.

use crate::dgtz::{
    AcqMode, BoardInfo, CaenApi, DecodedEvent, ErrorCode, EventInfo, EventSlice, IoLevel,
    LinkType, ReadoutBuffer, TriggerMode, TriggerPolarity,
};
use std::ffi::{c_char, c_void, CStr};
use std::{mem, ptr, slice};

#[allow(non_upper_case_globals)]
#[allow(non_camel_case_types)]
#[allow(non_snake_case)]
#[allow(dead_code)]
mod ffi {
    include!(concat!(env!("OUT_DIR"), "/bindings.rs"));
}

use ffi::*;

/// CAEN_DGTZ_SLAVE_TERMINATED_READOUT_MBLT
const SLAVE_TERMINATED_READOUT_MBLT: u32 = 0;

fn check(res: CAEN_DGTZ_ErrorCode) -> Result<(), ErrorCode> {
    ErrorCode::check(res as i32)
}

fn c_string(chars: &[c_char]) -> String {
    if !chars.contains(&0) {
        return String::new();
    }
    // the vendor NUL terminates every string field
    unsafe { CStr::from_ptr(chars.as_ptr()) }
        .to_string_lossy()
        .into_owned()
}

/// The vendor library. It has no state of its own; everything lives behind
/// the handles it returns.
#[derive(Debug, Default, Clone, Copy)]
pub struct CaenDigitizerLib;

impl CaenDigitizerLib {
    pub fn new() -> Self {
        Self
    }
}

/// Buffer from `CAEN_DGTZ_MallocReadoutBuffer`, freed on drop.
pub struct SdkBuffer {
    ptr: *mut c_char,
    capacity: u32,
}

impl ReadoutBuffer for SdkBuffer {
    fn capacity(&self) -> u32 {
        self.capacity
    }
}

impl Drop for SdkBuffer {
    fn drop(&mut self) {
        if self.ptr.is_null() {
            return;
        }
        let res = unsafe { CAEN_DGTZ_FreeReadoutBuffer(&mut self.ptr) };
        if let Err(code) = check(res) {
            log::error!("Failed to free the readout buffer: {code}");
        }
        self.ptr = ptr::null_mut();
    }
}

/// Event from `CAEN_DGTZ_AllocateEvent`, freed on drop.
pub struct SdkEvent {
    handle: i32,
    ptr: *mut CAEN_DGTZ_UINT16_EVENT_t,
}

impl SdkEvent {
    fn channel(&self, channel: usize) -> Option<(u32, *mut u16)> {
        if self.ptr.is_null() || channel >= MAX_UINT16_CHANNEL_SIZE as usize {
            return None;
        }
        let event = unsafe { &*self.ptr };
        Some((event.ChSize[channel], event.DataChannel[channel]))
    }
}

impl DecodedEvent for SdkEvent {
    fn channel_size(&self, channel: usize) -> u32 {
        self.channel(channel).map_or(0, |(size, _)| size)
    }

    fn channel_data(&self, channel: usize) -> &[u16] {
        match self.channel(channel) {
            Some((size, data)) if size > 0 && !data.is_null() => unsafe {
                slice::from_raw_parts(data, size as usize)
            },
            _ => &[],
        }
    }
}

impl Drop for SdkEvent {
    fn drop(&mut self) {
        if self.ptr.is_null() {
            return;
        }
        let res = unsafe {
            CAEN_DGTZ_FreeEvent(self.handle, &mut self.ptr as *mut _ as *mut *mut c_void)
        };
        if let Err(code) = check(res) {
            log::error!("Failed to free an event of handle {}: {code}", self.handle);
        }
        self.ptr = ptr::null_mut();
    }
}

impl CaenApi for CaenDigitizerLib {
    type Buffer = SdkBuffer;
    type Event = SdkEvent;

    fn open_digitizer(
        &mut self,
        link: LinkType,
        link_num: i32,
        conet_node: i32,
        vme_base_address: u32,
    ) -> Result<i32, ErrorCode> {
        let mut handle = -1;
        let res = unsafe {
            CAEN_DGTZ_OpenDigitizer(
                link as _,
                link_num,
                conet_node,
                vme_base_address,
                &mut handle,
            )
        };
        check(res)?;
        Ok(handle)
    }

    fn close_digitizer(&mut self, handle: i32) -> Result<(), ErrorCode> {
        check(unsafe { CAEN_DGTZ_CloseDigitizer(handle) })
    }

    fn reset(&mut self, handle: i32) -> Result<(), ErrorCode> {
        check(unsafe { CAEN_DGTZ_Reset(handle) })
    }

    fn get_info(&mut self, handle: i32) -> Result<BoardInfo, ErrorCode> {
        let mut info: CAEN_DGTZ_BoardInfo_t = unsafe { mem::zeroed() };
        check(unsafe { CAEN_DGTZ_GetInfo(handle, &mut info) })?;
        Ok(BoardInfo {
            model_name: c_string(&info.ModelName),
            model: info.Model,
            channels: info.Channels,
            form_factor: info.FormFactor,
            family_code: info.FamilyCode,
            roc_firmware: c_string(&info.ROC_FirmwareRel),
            amc_firmware: c_string(&info.AMC_FirmwareRel),
            serial_number: info.SerialNumber,
            pcb_revision: info.PCB_Revision,
            adc_nbits: info.ADC_NBits,
        })
    }

    fn write_register(&mut self, handle: i32, address: u32, value: u32) -> Result<(), ErrorCode> {
        check(unsafe { CAEN_DGTZ_WriteRegister(handle, address, value) })
    }

    fn read_register(&mut self, handle: i32, address: u32) -> Result<u32, ErrorCode> {
        let mut value = 0;
        check(unsafe { CAEN_DGTZ_ReadRegister(handle, address, &mut value) })?;
        Ok(value)
    }

    fn set_max_num_events_blt(&mut self, handle: i32, events: u32) -> Result<(), ErrorCode> {
        check(unsafe { CAEN_DGTZ_SetMaxNumEventsBLT(handle, events) })
    }

    fn set_record_length(&mut self, handle: i32, samples: u32) -> Result<(), ErrorCode> {
        check(unsafe { CAEN_DGTZ_SetRecordLength(handle, samples) })
    }

    fn get_record_length(&mut self, handle: i32) -> Result<u32, ErrorCode> {
        let mut samples = 0;
        check(unsafe { CAEN_DGTZ_GetRecordLength(handle, &mut samples) })?;
        Ok(samples)
    }

    fn set_decimation_factor(&mut self, handle: i32, factor: u16) -> Result<(), ErrorCode> {
        check(unsafe { CAEN_DGTZ_SetDecimationFactor(handle, factor) })
    }

    fn set_post_trigger_size(&mut self, handle: i32, percent: u32) -> Result<(), ErrorCode> {
        check(unsafe { CAEN_DGTZ_SetPostTriggerSize(handle, percent) })
    }

    fn set_sw_trigger_mode(&mut self, handle: i32, mode: TriggerMode) -> Result<(), ErrorCode> {
        check(unsafe { CAEN_DGTZ_SetSWTriggerMode(handle, mode as _) })
    }

    fn set_ext_trigger_input_mode(&mut self, handle: i32, mode: TriggerMode) -> Result<(), ErrorCode> {
        check(unsafe { CAEN_DGTZ_SetExtTriggerInputMode(handle, mode as _) })
    }

    fn set_acquisition_mode(&mut self, handle: i32, mode: AcqMode) -> Result<(), ErrorCode> {
        check(unsafe { CAEN_DGTZ_SetAcquisitionMode(handle, mode as _) })
    }

    fn set_trigger_polarity(
        &mut self,
        handle: i32,
        channel: u32,
        polarity: TriggerPolarity,
    ) -> Result<(), ErrorCode> {
        check(unsafe { CAEN_DGTZ_SetTriggerPolarity(handle, channel, polarity as _) })
    }

    fn set_io_level(&mut self, handle: i32, level: IoLevel) -> Result<(), ErrorCode> {
        check(unsafe { CAEN_DGTZ_SetIOLevel(handle, level as _) })
    }

    fn set_channel_enable_mask(&mut self, handle: i32, mask: u32) -> Result<(), ErrorCode> {
        check(unsafe { CAEN_DGTZ_SetChannelEnableMask(handle, mask) })
    }

    fn set_channel_self_trigger(
        &mut self,
        handle: i32,
        mode: TriggerMode,
        mask: u32,
    ) -> Result<(), ErrorCode> {
        check(unsafe { CAEN_DGTZ_SetChannelSelfTrigger(handle, mode as _, mask) })
    }

    fn set_channel_trigger_threshold(
        &mut self,
        handle: i32,
        channel: u32,
        threshold: u32,
    ) -> Result<(), ErrorCode> {
        check(unsafe { CAEN_DGTZ_SetChannelTriggerThreshold(handle, channel, threshold) })
    }

    fn set_channel_dc_offset(&mut self, handle: i32, channel: u32, offset: u32) -> Result<(), ErrorCode> {
        check(unsafe { CAEN_DGTZ_SetChannelDCOffset(handle, channel, offset) })
    }

    fn set_group_enable_mask(&mut self, handle: i32, mask: u32) -> Result<(), ErrorCode> {
        check(unsafe { CAEN_DGTZ_SetGroupEnableMask(handle, mask) })
    }

    fn set_group_self_trigger(&mut self, handle: i32, mode: TriggerMode, mask: u32) -> Result<(), ErrorCode> {
        check(unsafe { CAEN_DGTZ_SetGroupSelfTrigger(handle, mode as _, mask) })
    }

    fn set_group_trigger_threshold(&mut self, handle: i32, group: u32, threshold: u32) -> Result<(), ErrorCode> {
        check(unsafe { CAEN_DGTZ_SetGroupTriggerThreshold(handle, group, threshold) })
    }

    fn set_group_dc_offset(&mut self, handle: i32, group: u32, offset: u32) -> Result<(), ErrorCode> {
        check(unsafe { CAEN_DGTZ_SetGroupDCOffset(handle, group, offset) })
    }

    fn set_channel_group_mask(&mut self, handle: i32, group: u32, mask: u32) -> Result<(), ErrorCode> {
        check(unsafe { CAEN_DGTZ_SetChannelGroupMask(handle, group, mask) })
    }

    fn send_sw_trigger(&mut self, handle: i32) -> Result<(), ErrorCode> {
        check(unsafe { CAEN_DGTZ_SendSWtrigger(handle) })
    }

    fn sw_start_acquisition(&mut self, handle: i32) -> Result<(), ErrorCode> {
        check(unsafe { CAEN_DGTZ_SWStartAcquisition(handle) })
    }

    fn sw_stop_acquisition(&mut self, handle: i32) -> Result<(), ErrorCode> {
        check(unsafe { CAEN_DGTZ_SWStopAcquisition(handle) })
    }

    fn clear_data(&mut self, handle: i32) -> Result<(), ErrorCode> {
        check(unsafe { CAEN_DGTZ_ClearData(handle) })
    }

    fn malloc_readout_buffer(&mut self, handle: i32) -> Result<SdkBuffer, ErrorCode> {
        let mut buffer = SdkBuffer {
            ptr: ptr::null_mut(),
            capacity: 0,
        };
        check(unsafe { CAEN_DGTZ_MallocReadoutBuffer(handle, &mut buffer.ptr, &mut buffer.capacity) })?;
        Ok(buffer)
    }

    fn read_data(&mut self, handle: i32, buffer: &mut SdkBuffer) -> Result<u32, ErrorCode> {
        let mut size = 0;
        check(unsafe {
            CAEN_DGTZ_ReadData(handle, SLAVE_TERMINATED_READOUT_MBLT as _, buffer.ptr, &mut size)
        })?;
        Ok(size)
    }

    fn get_num_events(&mut self, handle: i32, buffer: &SdkBuffer, data_size: u32) -> Result<u32, ErrorCode> {
        let mut events = 0;
        check(unsafe { CAEN_DGTZ_GetNumEvents(handle, buffer.ptr, data_size, &mut events) })?;
        Ok(events)
    }

    fn get_event_info(
        &mut self,
        handle: i32,
        buffer: &SdkBuffer,
        data_size: u32,
        index: u32,
    ) -> Result<(EventInfo, EventSlice), ErrorCode> {
        let mut raw: CAEN_DGTZ_EventInfo_t = unsafe { mem::zeroed() };
        let mut event_ptr: *mut c_char = ptr::null_mut();
        let index = i32::try_from(index).map_err(|_| ErrorCode::BadEventNumber)?;
        check(unsafe {
            CAEN_DGTZ_GetEventInfo(handle, buffer.ptr, data_size, index, &mut raw, &mut event_ptr)
        })?;

        // the event pointer always points inside the buffer it was read from
        let offset = unsafe { event_ptr.offset_from(buffer.ptr) };
        let offset = usize::try_from(offset).map_err(|_| ErrorCode::InvalidEvent)?;
        let info = EventInfo {
            event_size: raw.EventSize,
            board_id: raw.BoardId,
            pattern: raw.Pattern,
            channel_mask: raw.ChannelMask,
            event_counter: raw.EventCounter,
            trigger_time_tag: raw.TriggerTimeTag,
        };
        Ok((
            info,
            EventSlice {
                offset,
                len: info.event_size as usize,
            },
        ))
    }

    fn allocate_event(&mut self, handle: i32) -> Result<SdkEvent, ErrorCode> {
        let mut event = SdkEvent {
            handle,
            ptr: ptr::null_mut(),
        };
        check(unsafe {
            CAEN_DGTZ_AllocateEvent(handle, &mut event.ptr as *mut _ as *mut *mut c_void)
        })?;
        Ok(event)
    }

    fn decode_event(
        &mut self,
        handle: i32,
        buffer: &SdkBuffer,
        slice: EventSlice,
        event: &mut SdkEvent,
    ) -> Result<(), ErrorCode> {
        let end = slice.offset.checked_add(slice.len);
        if buffer.ptr.is_null() || end.map_or(true, |end| end > buffer.capacity as usize) {
            return Err(ErrorCode::InvalidEvent);
        }
        check(unsafe {
            CAEN_DGTZ_DecodeEvent(
                handle,
                buffer.ptr.add(slice.offset),
                &mut event.ptr as *mut _ as *mut *mut c_void,
            )
        })
    }
}
