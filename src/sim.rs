//! A register level stand-in for the vendor library.
//!
//! One [`SimulatedLibrary`] is one board of a given model. Clones share the
//! board, so a test can keep a clone to inspect what a session programmed
//! and to inject faults into it. Triggers queue events in the board memory;
//! readout packs them into the buffer with a small header per event:
//!
//! | word | content                                        |
//! |------|------------------------------------------------|
//! | 0    | `0xA` in bits 28..32, event size in words      |
//! | 1    | board id (27..32), pattern (8..24), mask (0..8)|
//! | 2    | event counter (24 bits)                        |
//! | 3    | trigger time tag                               |
//! | 4, 5 | bitmap of the channels that follow (lo, hi)    |
//! | 6    | samples per channel                            |
//!
//! followed by the 16 bit samples of every channel, two per word.

use crate::dgtz::{
    AcqMode, BoardInfo, CaenApi, DecodedEvent, ErrorCode, EventInfo, EventSlice, IoLevel,
    LinkType, ReadoutBuffer, TriggerMode, TriggerPolarity,
};
use crate::model::{DigitizerModel, Family, ModelConstants};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Channels a vendor event can describe.
pub const MAX_CHANNELS: usize = 64;

const HEADER_WORDS: usize = 7;
const HEADER_BYTES: usize = HEADER_WORDS * 4;
const EVENT_MARKER: u32 = 0xA;
const DEFAULT_BUFFER_CODE: u32 = 10;
const DEFAULT_RECORD_LENGTH: u32 = 100;

const REG_BUFFER_ORGANIZATION: u32 = 0x800C;
const REG_ACQUISITION_CONTROL: u32 = 0x8100;
const REG_EVENT_STORED: u32 = 0x812C;

#[derive(Debug, Default)]
struct Allocations {
    buffers: AtomicUsize,
    events: AtomicUsize,
}

struct Board {
    model: DigitizerModel,
    constants: &'static ModelConstants,
    next_handle: i32,
    open: Vec<i32>,
    registers: HashMap<u32, u32>,
    record_length: u32,
    max_events_blt: u32,
    decimation: u16,
    post_trigger: u32,
    sw_trigger_mode: TriggerMode,
    ext_trigger_mode: TriggerMode,
    acq_mode: AcqMode,
    io_level: IoLevel,
    polarity: TriggerPolarity,
    enable_mask: u32,
    self_trigger_mode: TriggerMode,
    self_trigger_mask: u32,
    group_masks: [u32; 8],
    thresholds: [u32; MAX_CHANNELS],
    dc_offsets: [u32; MAX_CHANNELS],
    acquiring: bool,
    pending: VecDeque<Vec<u32>>,
    event_counter: u32,
    trigger_time_tag: u32,
    faults: HashMap<&'static str, ErrorCode>,
    calls: HashMap<&'static str, usize>,
    rng: StdRng,
}

impl Board {
    fn new(model: DigitizerModel, seed: u64) -> Self {
        let mut board = Self {
            model,
            constants: model.constants(),
            next_handle: 0,
            open: Vec::new(),
            registers: HashMap::new(),
            record_length: DEFAULT_RECORD_LENGTH,
            max_events_blt: 1,
            decimation: 1,
            post_trigger: 50,
            sw_trigger_mode: TriggerMode::AcqOnly,
            ext_trigger_mode: TriggerMode::AcqOnly,
            acq_mode: AcqMode::SwControlled,
            io_level: IoLevel::Nim,
            polarity: TriggerPolarity::RisingEdge,
            enable_mask: 0,
            self_trigger_mode: TriggerMode::Disabled,
            self_trigger_mask: 0,
            group_masks: [0; 8],
            thresholds: [0; MAX_CHANNELS],
            dc_offsets: [0x8000; MAX_CHANNELS],
            acquiring: false,
            pending: VecDeque::new(),
            event_counter: 0,
            trigger_time_tag: 0,
            faults: HashMap::new(),
            calls: HashMap::new(),
            rng: StdRng::seed_from_u64(seed),
        };
        board.power_on();
        board
    }

    /// Everything a reset restores.
    fn power_on(&mut self) {
        self.registers.clear();
        self.registers.insert(REG_BUFFER_ORGANIZATION, DEFAULT_BUFFER_CODE);
        self.record_length = DEFAULT_RECORD_LENGTH;
        self.max_events_blt = 1;
        self.decimation = 1;
        self.post_trigger = 50;
        self.sw_trigger_mode = TriggerMode::AcqOnly;
        self.ext_trigger_mode = TriggerMode::AcqOnly;
        self.acq_mode = AcqMode::SwControlled;
        self.io_level = IoLevel::Nim;
        self.polarity = TriggerPolarity::RisingEdge;
        self.enable_mask = 0;
        self.self_trigger_mode = TriggerMode::Disabled;
        self.self_trigger_mask = 0;
        self.group_masks = [0; 8];
        self.thresholds = [0; MAX_CHANNELS];
        self.dc_offsets = [0x8000; MAX_CHANNELS];
        self.acquiring = false;
        self.pending.clear();
        self.event_counter = 0;
        self.trigger_time_tag = 0;
    }

    fn enter(&mut self, function: &'static str) -> Result<(), ErrorCode> {
        *self.calls.entry(function).or_insert(0) += 1;
        self.faults.get(function).map_or(Ok(()), |&code| Err(code))
    }

    fn enter_open(&mut self, function: &'static str, handle: i32) -> Result<(), ErrorCode> {
        self.enter(function)?;
        if self.open.contains(&handle) {
            Ok(())
        } else {
            Err(ErrorCode::InvalidHandle)
        }
    }

    fn grouped(&self) -> bool {
        self.constants.num_groups > 0
    }

    fn only_grouped(&self) -> Result<(), ErrorCode> {
        if self.grouped() {
            Ok(())
        } else {
            Err(ErrorCode::FunctionNotAllowed)
        }
    }

    fn only_single_channels(&self) -> Result<(), ErrorCode> {
        if self.grouped() {
            Err(ErrorCode::FunctionNotAllowed)
        } else {
            Ok(())
        }
    }

    fn channel_index(&self, channel: u32) -> Result<usize, ErrorCode> {
        let channel = channel as usize;
        if channel < usize::from(self.constants.num_channels) {
            Ok(channel)
        } else {
            Err(ErrorCode::InvalidChannelNumber)
        }
    }

    fn group_index(&self, group: u32) -> Result<usize, ErrorCode> {
        let group = group as usize;
        if group < usize::from(self.constants.num_groups) {
            Ok(group)
        } else {
            Err(ErrorCode::InvalidChannelNumber)
        }
    }

    fn register(&self, address: u32) -> u32 {
        match address {
            REG_EVENT_STORED => self.pending.len() as u32,
            _ => self.registers.get(&address).copied().unwrap_or(0),
        }
    }

    /// Events the memory holds before triggers are lost.
    fn memory_events(&self) -> usize {
        let buffers = 1usize << (self.register(REG_BUFFER_ORGANIZATION) & 0xF);
        let keep_one_free = (self.register(REG_ACQUISITION_CONTROL) >> 5) & 1 == 1;
        if keep_one_free {
            buffers - 1
        } else {
            buffers
        }
    }

    fn readout_channels(&self) -> Vec<usize> {
        let c = self.constants;
        if !self.grouped() {
            return (0..usize::from(c.num_channels))
                .filter(|&ch| (self.enable_mask >> ch) & 1 == 1)
                .collect();
        }

        let per_group = usize::from(c.channels_per_group);
        (0..usize::from(c.num_groups))
            .filter(|&g| (self.enable_mask >> g) & 1 == 1)
            .flat_map(|g| g * per_group..(g + 1) * per_group)
            .collect()
    }

    fn event_words(&self) -> usize {
        HEADER_WORDS + self.readout_channels().len() * (self.record_length as usize).div_ceil(2)
    }

    fn trigger(&mut self) {
        if !self.acquiring || self.pending.len() >= self.memory_events() {
            return;
        }
        let event = self.build_event();
        self.pending.push_back(event);
    }

    fn build_event(&mut self) -> Vec<u32> {
        let channels = self.readout_channels();
        let samples = self.record_length as usize;
        let size = HEADER_WORDS + channels.len() * samples.div_ceil(2);
        let bitmap = channels.iter().fold(0u64, |mask, &ch| mask | 1 << ch);

        let mut words = Vec::with_capacity(size);
        words.push(EVENT_MARKER << 28 | size as u32);
        words.push(self.enable_mask & 0xFF);
        words.push(self.event_counter);
        words.push(self.trigger_time_tag);
        words.push(bitmap as u32);
        words.push((bitmap >> 32) as u32);
        words.push(samples as u32);
        for ch in channels {
            let trace = self.trace(ch, samples);
            words.extend(trace.chunks(2).map(|pair| {
                u32::from(pair[0]) | u32::from(pair.get(1).copied().unwrap_or(0)) << 16
            }));
        }

        self.event_counter = (self.event_counter + 1) & 0xFF_FFFF;
        let tick = self.rng.random_range(1_000..5_000);
        self.trigger_time_tag = self.trigger_time_tag.wrapping_add(tick) & 0x7FFF_FFFF;
        words
    }

    /// Baseline from the DC offset, noise, and one pulse starting where
    /// the post trigger window begins.
    fn trace(&mut self, channel: usize, samples: usize) -> Vec<u16> {
        let bits = self.constants.adc_resolution_bits;
        let full_scale = (1i64 << bits) - 1;
        let slot = if self.grouped() {
            channel / usize::from(self.constants.channels_per_group)
        } else {
            channel
        };
        let baseline = (i64::from(self.dc_offsets[slot]) << bits) >> 16;
        let amplitude = match self.polarity {
            TriggerPolarity::RisingEdge => full_scale as f64 / 4.0,
            TriggerPolarity::FallingEdge => -(full_scale as f64) / 4.0,
        };
        let start = samples * (100 - self.post_trigger.min(100) as usize) / 100;
        let decay = (samples as f64 / 20.0).max(1.0);

        let rng = &mut self.rng;
        (0..samples)
            .map(|i| {
                let pulse = if i >= start {
                    amplitude * (-((i - start) as f64) / decay).exp()
                } else {
                    0.0
                };
                let noise: i64 = rng.random_range(-2..=2);
                (baseline + pulse as i64 + noise).clamp(0, full_scale) as u16
            })
            .collect()
    }
}

/// Readout buffer of the simulated library.
pub struct SimBuffer {
    data: Vec<u8>,
    capacity: u32,
    live: Arc<Allocations>,
}

impl SimBuffer {
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }
}

impl ReadoutBuffer for SimBuffer {
    fn capacity(&self) -> u32 {
        self.capacity
    }
}

impl Drop for SimBuffer {
    fn drop(&mut self) {
        self.live.buffers.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Decode target of the simulated library, one sample vector per channel.
pub struct SimEvent {
    sizes: [u32; MAX_CHANNELS],
    data: Vec<Vec<u16>>,
    live: Arc<Allocations>,
}

impl DecodedEvent for SimEvent {
    fn channel_size(&self, channel: usize) -> u32 {
        self.sizes.get(channel).copied().unwrap_or(0)
    }

    fn channel_data(&self, channel: usize) -> &[u16] {
        self.data.get(channel).map(Vec::as_slice).unwrap_or(&[])
    }
}

impl Drop for SimEvent {
    fn drop(&mut self) {
        self.live.events.fetch_sub(1, Ordering::Relaxed);
    }
}

#[derive(Clone)]
pub struct SimulatedLibrary {
    board: Arc<Mutex<Board>>,
    live: Arc<Allocations>,
}

impl SimulatedLibrary {
    pub fn new(model: DigitizerModel) -> Self {
        Self::with_seed(model, 0x5eed ^ model as u64)
    }

    /// Noise and time tags are drawn from `seed`.
    pub fn with_seed(model: DigitizerModel, seed: u64) -> Self {
        Self {
            board: Arc::new(Mutex::new(Board::new(model, seed))),
            live: Arc::new(Allocations::default()),
        }
    }

    pub fn model(&self) -> DigitizerModel {
        self.board.lock().model
    }

    /// Makes every later call of `function` fail with `code`.
    pub fn inject_fault(&self, function: &'static str, code: ErrorCode) {
        self.board.lock().faults.insert(function, code);
    }

    pub fn clear_fault(&self, function: &'static str) {
        self.board.lock().faults.remove(function);
    }

    /// Calls of `function` so far, failed ones included.
    pub fn call_count(&self, function: &str) -> usize {
        self.board.lock().calls.get(function).copied().unwrap_or(0)
    }

    /// Triggers from the TRG-IN connector.
    pub fn fire_external_trigger(&self) {
        let mut board = self.board.lock();
        if board.ext_trigger_mode.acquires() {
            board.trigger();
        }
    }

    /// A pulse crossing the threshold of `channel` (or of its group).
    pub fn fire_self_trigger(&self, channel: usize) {
        let mut board = self.board.lock();
        let slot = if board.grouped() {
            channel / usize::from(board.constants.channels_per_group)
        } else {
            channel
        };
        let armed = board.self_trigger_mask.checked_shr(slot as u32).unwrap_or(0) & 1 == 1;
        if board.self_trigger_mode.acquires() && armed {
            board.trigger();
        }
    }

    pub fn register(&self, address: u32) -> u32 {
        self.board.lock().register(address)
    }

    pub fn record_length(&self) -> u32 {
        self.board.lock().record_length
    }

    pub fn decimation_factor(&self) -> u16 {
        self.board.lock().decimation
    }

    pub fn post_trigger(&self) -> u32 {
        self.board.lock().post_trigger
    }

    pub fn max_events_blt(&self) -> u32 {
        self.board.lock().max_events_blt
    }

    /// Channel enable mask, or group enable mask on grouped models.
    pub fn enable_mask(&self) -> u32 {
        self.board.lock().enable_mask
    }

    pub fn self_trigger_mask(&self) -> u32 {
        self.board.lock().self_trigger_mask
    }

    pub fn channel_group_mask(&self, group: usize) -> u32 {
        self.board.lock().group_masks.get(group).copied().unwrap_or(0)
    }

    /// Threshold of a channel, or of a group on grouped models.
    pub fn threshold(&self, slot: usize) -> u32 {
        self.board.lock().thresholds.get(slot).copied().unwrap_or(0)
    }

    pub fn dc_offset(&self, slot: usize) -> u32 {
        self.board.lock().dc_offsets.get(slot).copied().unwrap_or(0)
    }

    pub fn trigger_polarity(&self) -> TriggerPolarity {
        self.board.lock().polarity
    }

    pub fn io_level(&self) -> IoLevel {
        self.board.lock().io_level
    }

    pub fn acquisition_mode(&self) -> AcqMode {
        self.board.lock().acq_mode
    }

    pub fn is_acquiring(&self) -> bool {
        self.board.lock().acquiring
    }

    pub fn pending_events(&self) -> usize {
        self.board.lock().pending.len()
    }

    pub fn open_handles(&self) -> usize {
        self.board.lock().open.len()
    }

    /// Readout buffers currently allocated.
    pub fn live_buffers(&self) -> usize {
        self.live.buffers.load(Ordering::Relaxed)
    }

    /// Decode targets currently allocated.
    pub fn live_events(&self) -> usize {
        self.live.events.load(Ordering::Relaxed)
    }
}

impl CaenApi for SimulatedLibrary {
    type Buffer = SimBuffer;
    type Event = SimEvent;

    fn open_digitizer(
        &mut self,
        link: LinkType,
        link_num: i32,
        conet_node: i32,
        vme_base_address: u32,
    ) -> Result<i32, ErrorCode> {
        let mut board = self.board.lock();
        board.enter("CAEN_DGTZ_OpenDigitizer")?;
        let handle = board.next_handle;
        board.next_handle += 1;
        board.open.push(handle);
        log::debug!(
            "Simulated {} opened as handle {handle} ({link:?}, link {link_num}, node {conet_node}, address {vme_base_address:#x})",
            board.model
        );
        Ok(handle)
    }

    fn close_digitizer(&mut self, handle: i32) -> Result<(), ErrorCode> {
        let mut board = self.board.lock();
        board.enter_open("CAEN_DGTZ_CloseDigitizer", handle)?;
        board.open.retain(|&h| h != handle);
        if board.open.is_empty() {
            board.acquiring = false;
        }
        log::debug!("Simulated handle {handle} closed");
        Ok(())
    }

    fn reset(&mut self, handle: i32) -> Result<(), ErrorCode> {
        let mut board = self.board.lock();
        board.enter_open("CAEN_DGTZ_Reset", handle)?;
        board.power_on();
        Ok(())
    }

    fn get_info(&mut self, handle: i32) -> Result<BoardInfo, ErrorCode> {
        let mut board = self.board.lock();
        board.enter_open("CAEN_DGTZ_GetInfo", handle)?;
        let model = board.model;
        let family_code = match model.family() {
            Family::X730 => 11,
            Family::X740 => 2,
            _ => 0,
        };
        Ok(BoardInfo {
            model_name: model.name().to_owned(),
            model: model as u32,
            channels: u32::from(board.constants.num_channels),
            form_factor: if model.name().starts_with("DT") { 2 } else { 0 },
            family_code,
            roc_firmware: "04.25 - Build 9511".to_owned(),
            amc_firmware: "01.05 - Build 8303".to_owned(),
            serial_number: 1000 + model as u32,
            pcb_revision: 1,
            adc_nbits: board.constants.adc_resolution_bits,
        })
    }

    fn write_register(&mut self, handle: i32, address: u32, value: u32) -> Result<(), ErrorCode> {
        let mut board = self.board.lock();
        board.enter_open("CAEN_DGTZ_WriteRegister", handle)?;
        if address != REG_EVENT_STORED {
            board.registers.insert(address, value);
        }
        Ok(())
    }

    fn read_register(&mut self, handle: i32, address: u32) -> Result<u32, ErrorCode> {
        let mut board = self.board.lock();
        board.enter_open("CAEN_DGTZ_ReadRegister", handle)?;
        Ok(board.register(address))
    }

    fn set_max_num_events_blt(&mut self, handle: i32, events: u32) -> Result<(), ErrorCode> {
        let mut board = self.board.lock();
        board.enter_open("CAEN_DGTZ_SetMaxNumEventsBLT", handle)?;
        board.max_events_blt = events;
        Ok(())
    }

    fn set_record_length(&mut self, handle: i32, samples: u32) -> Result<(), ErrorCode> {
        let mut board = self.board.lock();
        board.enter_open("CAEN_DGTZ_SetRecordLength", handle)?;
        // memory is allocated in blocks of whole locations
        let block = if board.grouped() { 3 } else { 10 };
        board.record_length = samples.div_ceil(block) * block;
        Ok(())
    }

    fn get_record_length(&mut self, handle: i32) -> Result<u32, ErrorCode> {
        let mut board = self.board.lock();
        board.enter_open("CAEN_DGTZ_GetRecordLength", handle)?;
        Ok(board.record_length)
    }

    fn set_decimation_factor(&mut self, handle: i32, factor: u16) -> Result<(), ErrorCode> {
        let mut board = self.board.lock();
        board.enter_open("CAEN_DGTZ_SetDecimationFactor", handle)?;
        board.only_grouped()?;
        if !factor.is_power_of_two() || factor > 128 {
            return Err(ErrorCode::InvalidParam);
        }
        board.decimation = factor;
        Ok(())
    }

    fn set_post_trigger_size(&mut self, handle: i32, percent: u32) -> Result<(), ErrorCode> {
        let mut board = self.board.lock();
        board.enter_open("CAEN_DGTZ_SetPostTriggerSize", handle)?;
        board.post_trigger = percent.min(100);
        Ok(())
    }

    fn set_sw_trigger_mode(&mut self, handle: i32, mode: TriggerMode) -> Result<(), ErrorCode> {
        let mut board = self.board.lock();
        board.enter_open("CAEN_DGTZ_SetSWTriggerMode", handle)?;
        board.sw_trigger_mode = mode;
        Ok(())
    }

    fn set_ext_trigger_input_mode(&mut self, handle: i32, mode: TriggerMode) -> Result<(), ErrorCode> {
        let mut board = self.board.lock();
        board.enter_open("CAEN_DGTZ_SetExtTriggerInputMode", handle)?;
        board.ext_trigger_mode = mode;
        Ok(())
    }

    fn set_acquisition_mode(&mut self, handle: i32, mode: AcqMode) -> Result<(), ErrorCode> {
        let mut board = self.board.lock();
        board.enter_open("CAEN_DGTZ_SetAcquisitionMode", handle)?;
        board.acq_mode = mode;
        Ok(())
    }

    fn set_trigger_polarity(
        &mut self,
        handle: i32,
        channel: u32,
        polarity: TriggerPolarity,
    ) -> Result<(), ErrorCode> {
        let mut board = self.board.lock();
        board.enter_open("CAEN_DGTZ_SetTriggerPolarity", handle)?;
        board.channel_index(channel)?;
        board.polarity = polarity;
        Ok(())
    }

    fn set_io_level(&mut self, handle: i32, level: IoLevel) -> Result<(), ErrorCode> {
        let mut board = self.board.lock();
        board.enter_open("CAEN_DGTZ_SetIOLevel", handle)?;
        board.io_level = level;
        Ok(())
    }

    fn set_channel_enable_mask(&mut self, handle: i32, mask: u32) -> Result<(), ErrorCode> {
        let mut board = self.board.lock();
        board.enter_open("CAEN_DGTZ_SetChannelEnableMask", handle)?;
        board.only_single_channels()?;
        board.enable_mask = mask & 0xFF;
        Ok(())
    }

    fn set_channel_self_trigger(
        &mut self,
        handle: i32,
        mode: TriggerMode,
        mask: u32,
    ) -> Result<(), ErrorCode> {
        let mut board = self.board.lock();
        board.enter_open("CAEN_DGTZ_SetChannelSelfTrigger", handle)?;
        board.only_single_channels()?;
        board.self_trigger_mode = mode;
        board.self_trigger_mask = mask & 0xFF;
        Ok(())
    }

    fn set_channel_trigger_threshold(
        &mut self,
        handle: i32,
        channel: u32,
        threshold: u32,
    ) -> Result<(), ErrorCode> {
        let mut board = self.board.lock();
        board.enter_open("CAEN_DGTZ_SetChannelTriggerThreshold", handle)?;
        let ch = board.channel_index(channel)?;
        board.thresholds[ch] = threshold;
        Ok(())
    }

    fn set_channel_dc_offset(&mut self, handle: i32, channel: u32, offset: u32) -> Result<(), ErrorCode> {
        let mut board = self.board.lock();
        board.enter_open("CAEN_DGTZ_SetChannelDCOffset", handle)?;
        let ch = board.channel_index(channel)?;
        board.dc_offsets[ch] = offset & 0xFFFF;
        Ok(())
    }

    fn set_group_enable_mask(&mut self, handle: i32, mask: u32) -> Result<(), ErrorCode> {
        let mut board = self.board.lock();
        board.enter_open("CAEN_DGTZ_SetGroupEnableMask", handle)?;
        board.only_grouped()?;
        let groups = (1u32 << board.constants.num_groups) - 1;
        board.enable_mask = mask & groups;
        Ok(())
    }

    fn set_group_self_trigger(&mut self, handle: i32, mode: TriggerMode, mask: u32) -> Result<(), ErrorCode> {
        let mut board = self.board.lock();
        board.enter_open("CAEN_DGTZ_SetGroupSelfTrigger", handle)?;
        board.only_grouped()?;
        board.self_trigger_mode = mode;
        board.self_trigger_mask = mask & 0xFF;
        Ok(())
    }

    fn set_group_trigger_threshold(&mut self, handle: i32, group: u32, threshold: u32) -> Result<(), ErrorCode> {
        let mut board = self.board.lock();
        board.enter_open("CAEN_DGTZ_SetGroupTriggerThreshold", handle)?;
        board.only_grouped()?;
        let g = board.group_index(group)?;
        board.thresholds[g] = threshold;
        Ok(())
    }

    fn set_group_dc_offset(&mut self, handle: i32, group: u32, offset: u32) -> Result<(), ErrorCode> {
        let mut board = self.board.lock();
        board.enter_open("CAEN_DGTZ_SetGroupDCOffset", handle)?;
        board.only_grouped()?;
        let g = board.group_index(group)?;
        board.dc_offsets[g] = offset & 0xFFFF;
        Ok(())
    }

    fn set_channel_group_mask(&mut self, handle: i32, group: u32, mask: u32) -> Result<(), ErrorCode> {
        let mut board = self.board.lock();
        board.enter_open("CAEN_DGTZ_SetChannelGroupMask", handle)?;
        board.only_grouped()?;
        let g = board.group_index(group)?;
        board.group_masks[g] = mask & 0xFF;
        Ok(())
    }

    fn send_sw_trigger(&mut self, handle: i32) -> Result<(), ErrorCode> {
        let mut board = self.board.lock();
        board.enter_open("CAEN_DGTZ_SendSWtrigger", handle)?;
        if board.sw_trigger_mode.acquires() {
            board.trigger();
        }
        Ok(())
    }

    fn sw_start_acquisition(&mut self, handle: i32) -> Result<(), ErrorCode> {
        let mut board = self.board.lock();
        board.enter_open("CAEN_DGTZ_SWStartAcquisition", handle)?;
        board.acquiring = true;
        Ok(())
    }

    fn sw_stop_acquisition(&mut self, handle: i32) -> Result<(), ErrorCode> {
        let mut board = self.board.lock();
        board.enter_open("CAEN_DGTZ_SWStopAcquisition", handle)?;
        board.acquiring = false;
        Ok(())
    }

    fn clear_data(&mut self, handle: i32) -> Result<(), ErrorCode> {
        let mut board = self.board.lock();
        board.enter_open("CAEN_DGTZ_ClearData", handle)?;
        board.pending.clear();
        board.event_counter = 0;
        board.trigger_time_tag = 0;
        Ok(())
    }

    fn malloc_readout_buffer(&mut self, handle: i32) -> Result<SimBuffer, ErrorCode> {
        let mut board = self.board.lock();
        board.enter_open("CAEN_DGTZ_MallocReadoutBuffer", handle)?;
        let bytes = board.max_events_blt.max(1) as usize * board.event_words() * 4;
        let capacity = u32::try_from(bytes).map_err(|_| ErrorCode::OutOfMemory)?;
        self.live.buffers.fetch_add(1, Ordering::Relaxed);
        Ok(SimBuffer {
            data: Vec::with_capacity(bytes),
            capacity,
            live: Arc::clone(&self.live),
        })
    }

    fn read_data(&mut self, handle: i32, buffer: &mut SimBuffer) -> Result<u32, ErrorCode> {
        let mut board = self.board.lock();
        board.enter_open("CAEN_DGTZ_ReadData", handle)?;
        buffer.data.clear();
        let max_events = board.max_events_blt.max(1) as usize;
        let capacity = buffer.capacity as usize;
        for _ in 0..max_events {
            let fits = board
                .pending
                .front()
                .is_some_and(|event| buffer.data.len() + event.len() * 4 <= capacity);
            if !fits {
                break;
            }
            if let Some(event) = board.pending.pop_front() {
                buffer.data.extend(event.iter().flat_map(|word| word.to_le_bytes()));
            }
        }
        Ok(buffer.data.len() as u32)
    }

    fn get_num_events(&mut self, handle: i32, buffer: &SimBuffer, data_size: u32) -> Result<u32, ErrorCode> {
        self.board.lock().enter_open("CAEN_DGTZ_GetNumEvents", handle)?;
        Ok(event_slices(&buffer.data, data_size).len() as u32)
    }

    fn get_event_info(
        &mut self,
        handle: i32,
        buffer: &SimBuffer,
        data_size: u32,
        index: u32,
    ) -> Result<(EventInfo, EventSlice), ErrorCode> {
        self.board.lock().enter_open("CAEN_DGTZ_GetEventInfo", handle)?;
        let slice = event_slices(&buffer.data, data_size)
            .get(index as usize)
            .copied()
            .ok_or(ErrorCode::EventNotFound)?;
        let bytes = &buffer.data[slice.offset..slice.offset + slice.len];
        let header = word(bytes, 1);
        let info = EventInfo {
            event_size: slice.len as u32,
            board_id: header >> 27,
            pattern: (header >> 8) & 0xFFFF,
            channel_mask: header & 0xFF,
            event_counter: word(bytes, 2) & 0xFF_FFFF,
            trigger_time_tag: word(bytes, 3),
        };
        Ok((info, slice))
    }

    fn allocate_event(&mut self, handle: i32) -> Result<SimEvent, ErrorCode> {
        self.board.lock().enter_open("CAEN_DGTZ_AllocateEvent", handle)?;
        self.live.events.fetch_add(1, Ordering::Relaxed);
        Ok(SimEvent {
            sizes: [0; MAX_CHANNELS],
            data: vec![Vec::new(); MAX_CHANNELS],
            live: Arc::clone(&self.live),
        })
    }

    fn decode_event(
        &mut self,
        handle: i32,
        buffer: &SimBuffer,
        slice: EventSlice,
        event: &mut SimEvent,
    ) -> Result<(), ErrorCode> {
        self.board.lock().enter_open("CAEN_DGTZ_DecodeEvent", handle)?;
        let end = slice
            .offset
            .checked_add(slice.len)
            .filter(|&end| end <= buffer.data.len() && slice.len >= HEADER_BYTES)
            .ok_or(ErrorCode::InvalidEvent)?;
        let bytes = &buffer.data[slice.offset..end];
        if word(bytes, 0) >> 28 != EVENT_MARKER {
            return Err(ErrorCode::InvalidEvent);
        }

        let bitmap = u64::from(word(bytes, 4)) | u64::from(word(bytes, 5)) << 32;
        let samples = word(bytes, 6) as usize;
        let channel_bytes = samples.div_ceil(2) * 4;
        let mut offset = HEADER_BYTES;
        for ch in 0..MAX_CHANNELS {
            let channel = &mut event.data[ch];
            channel.clear();
            event.sizes[ch] = 0;
            if (bitmap >> ch) & 1 == 0 {
                continue;
            }
            let Some(packed) = bytes.get(offset..offset + channel_bytes) else {
                return Err(ErrorCode::InvalidEvent);
            };
            channel.extend(
                packed
                    .chunks_exact(2)
                    .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                    .take(samples),
            );
            event.sizes[ch] = samples as u32;
            offset += channel_bytes;
        }
        Ok(())
    }
}

/// Little endian word `index` of `bytes`.
fn word(bytes: &[u8], index: usize) -> u32 {
    let start = index * 4;
    bytes
        .get(start..start + 4)
        .map_or(0, |b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

/// Well formed events in the first `data_size` bytes.
fn event_slices(data: &[u8], data_size: u32) -> Vec<EventSlice> {
    let end = (data_size as usize).min(data.len());
    let mut slices = Vec::new();
    let mut offset = 0;
    while offset + HEADER_BYTES <= end {
        let header = word(&data[offset..], 0);
        let len = (header & 0x0FFF_FFFF) as usize * 4;
        if header >> 28 != EVENT_MARKER || len < HEADER_BYTES || offset + len > end {
            break;
        }
        slices.push(EventSlice { offset, len });
        offset += len;
    }
    slices
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opened(model: DigitizerModel) -> (SimulatedLibrary, i32) {
        let mut sim = SimulatedLibrary::new(model);
        let handle = sim.open_digitizer(LinkType::Usb, 0, 0, 0).unwrap();
        (sim, handle)
    }

    fn armed(sim: &mut SimulatedLibrary, handle: i32, channels: u32, record_length: u32) -> SimBuffer {
        sim.set_record_length(handle, record_length).unwrap();
        sim.set_channel_enable_mask(handle, channels).unwrap();
        sim.set_max_num_events_blt(handle, 4).unwrap();
        let buffer = sim.malloc_readout_buffer(handle).unwrap();
        sim.sw_start_acquisition(handle).unwrap();
        buffer
    }

    #[test]
    fn triggers_round_trip_through_the_buffer() {
        let (mut sim, h) = opened(DigitizerModel::DT5730B);
        let mut buffer = armed(&mut sim, h, 0b101, 20);
        for _ in 0..3 {
            sim.send_sw_trigger(h).unwrap();
        }
        assert_eq!(sim.register(REG_EVENT_STORED), 3);

        let size = sim.read_data(h, &mut buffer).unwrap();
        assert_eq!(size as usize, 3 * (HEADER_WORDS + 2 * 10) * 4);
        assert_eq!(sim.get_num_events(h, &buffer, size).unwrap(), 3);

        let (info, slice) = sim.get_event_info(h, &buffer, size, 2).unwrap();
        assert_eq!(info.event_counter, 2);
        assert_eq!(info.channel_mask, 0b101);
        assert_eq!(info.event_size as usize, slice.len);

        let mut event = sim.allocate_event(h).unwrap();
        sim.decode_event(h, &buffer, slice, &mut event).unwrap();
        assert_eq!(event.channel_size(0), 20);
        assert_eq!(event.channel_size(1), 0);
        assert_eq!(event.channel_data(2).len(), 20);
        assert!(event.channel_data(1).is_empty());
    }

    #[test]
    fn readout_respects_block_and_buffer_sizes() {
        let (mut sim, h) = opened(DigitizerModel::DT5730B);
        let mut buffer = armed(&mut sim, h, 0b1, 10);
        for _ in 0..6 {
            sim.send_sw_trigger(h).unwrap();
        }
        let size = sim.read_data(h, &mut buffer).unwrap();
        assert_eq!(sim.get_num_events(h, &buffer, size).unwrap(), 4);
        assert!(size <= buffer.capacity());
        assert_eq!(sim.pending_events(), 2);

        let (_, last) = sim.get_event_info(h, &buffer, size, 3).unwrap();
        assert_eq!(last.offset + last.len, size as usize);
        assert_eq!(
            sim.get_event_info(h, &buffer, size, 4),
            Err(ErrorCode::EventNotFound)
        );
    }

    #[test]
    fn record_length_is_rounded_to_whole_blocks() {
        let (mut sim, h) = opened(DigitizerModel::DT5730B);
        sim.set_record_length(h, 1001).unwrap();
        assert_eq!(sim.get_record_length(h).unwrap(), 1010);

        let (mut sim, h) = opened(DigitizerModel::V1740D);
        sim.set_record_length(h, 100).unwrap();
        assert_eq!(sim.get_record_length(h).unwrap(), 102);
    }

    #[test]
    fn family_specific_calls_are_refused() {
        let (mut sim, h) = opened(DigitizerModel::DT5730B);
        assert_eq!(sim.set_group_enable_mask(h, 1), Err(ErrorCode::FunctionNotAllowed));
        assert_eq!(sim.set_decimation_factor(h, 2), Err(ErrorCode::FunctionNotAllowed));

        let (mut sim, h) = opened(DigitizerModel::DT5740D);
        assert_eq!(sim.set_channel_enable_mask(h, 1), Err(ErrorCode::FunctionNotAllowed));
        assert_eq!(sim.set_group_trigger_threshold(h, 4, 10), Err(ErrorCode::InvalidChannelNumber));
        assert_eq!(sim.set_decimation_factor(h, 3), Err(ErrorCode::InvalidParam));
    }

    #[test]
    fn triggers_follow_their_modes() {
        let (mut sim, h) = opened(DigitizerModel::DT5730B);
        let _buffer = armed(&mut sim, h, 0b11, 10);
        sim.set_sw_trigger_mode(h, TriggerMode::ExtoutOnly).unwrap();
        sim.send_sw_trigger(h).unwrap();
        assert_eq!(sim.pending_events(), 0);

        sim.fire_external_trigger();
        assert_eq!(sim.pending_events(), 1);

        sim.set_channel_self_trigger(h, TriggerMode::AcqOnly, 0b10).unwrap();
        sim.fire_self_trigger(0);
        sim.fire_self_trigger(1);
        assert_eq!(sim.pending_events(), 2);
        sim.fire_self_trigger(40);
        assert_eq!(sim.pending_events(), 2);

        sim.sw_stop_acquisition(h).unwrap();
        sim.fire_external_trigger();
        assert_eq!(sim.pending_events(), 2);
    }

    #[test]
    fn full_memory_drops_triggers() {
        let (mut sim, h) = opened(DigitizerModel::DT5730B);
        let _buffer = armed(&mut sim, h, 0b1, 10);
        sim.write_register(h, REG_BUFFER_ORGANIZATION, 2).unwrap();
        sim.write_register(h, REG_ACQUISITION_CONTROL, 1 << 5).unwrap();
        for _ in 0..10 {
            sim.send_sw_trigger(h).unwrap();
        }
        assert_eq!(sim.pending_events(), 3);
    }

    #[test]
    fn faults_and_allocations_are_tracked() {
        let (mut sim, h) = opened(DigitizerModel::DT5730B);
        sim.inject_fault("CAEN_DGTZ_ClearData", ErrorCode::Timeout);
        assert_eq!(sim.clear_data(h), Err(ErrorCode::Timeout));
        sim.clear_fault("CAEN_DGTZ_ClearData");
        assert_eq!(sim.clear_data(h), Ok(()));
        assert_eq!(sim.call_count("CAEN_DGTZ_ClearData"), 2);

        assert_eq!(sim.reset(h + 1), Err(ErrorCode::InvalidHandle));

        let buffer = sim.malloc_readout_buffer(h).unwrap();
        let event = sim.allocate_event(h).unwrap();
        assert_eq!((sim.live_buffers(), sim.live_events()), (1, 1));
        drop(buffer);
        drop(event);
        assert_eq!((sim.live_buffers(), sim.live_events()), (0, 0));
    }

    #[test]
    fn pulses_follow_the_polarity() {
        let (mut sim, h) = opened(DigitizerModel::DT5730B);
        let mut buffer = armed(&mut sim, h, 0b1, 200);
        sim.set_trigger_polarity(h, 0, TriggerPolarity::FallingEdge).unwrap();
        sim.send_sw_trigger(h).unwrap();
        let size = sim.read_data(h, &mut buffer).unwrap();
        let (_, slice) = sim.get_event_info(h, &buffer, size, 0).unwrap();
        let mut event = sim.allocate_event(h).unwrap();
        sim.decode_event(h, &buffer, slice, &mut event).unwrap();

        let samples = event.channel_data(0);
        let baseline = 1 << 13;
        assert!(samples[..90].iter().all(|&s| (i32::from(s) - baseline).abs() <= 2));
        assert!(samples.iter().any(|&s| i32::from(s) < baseline - 1000));
    }

    #[test]
    fn grouped_boards_emit_whole_groups() {
        let (mut sim, h) = opened(DigitizerModel::V1740D);
        sim.set_record_length(h, 30).unwrap();
        sim.set_group_enable_mask(h, 0b1000_0010).unwrap();
        let mut buffer = sim.malloc_readout_buffer(h).unwrap();
        sim.sw_start_acquisition(h).unwrap();
        sim.send_sw_trigger(h).unwrap();

        let size = sim.read_data(h, &mut buffer).unwrap();
        let (_, slice) = sim.get_event_info(h, &buffer, size, 0).unwrap();
        let mut event = sim.allocate_event(h).unwrap();
        sim.decode_event(h, &buffer, slice, &mut event).unwrap();
        assert_eq!(event.channel_size(7), 0);
        assert!((8..16).chain(56..64).all(|ch| event.channel_size(ch) == 30));
    }

    #[test]
    fn corrupt_slices_are_rejected() {
        let (mut sim, h) = opened(DigitizerModel::DT5730B);
        let buffer = sim.malloc_readout_buffer(h).unwrap();
        let mut event = sim.allocate_event(h).unwrap();
        let slice = EventSlice { offset: 0, len: 64 };
        assert_eq!(
            sim.decode_event(h, &buffer, slice, &mut event),
            Err(ErrorCode::InvalidEvent)
        );
    }
}
