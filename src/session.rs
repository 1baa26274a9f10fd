//! One connected digitizer and everything it owns.

use crate::config::{GlobalConfig, GroupConfig, NUM_GROUP_CONFIGS};
use crate::dgtz::{BoardInfo, CaenApi, ErrorCode, LinkType, Severity};
use crate::error::{Error, Result};
use crate::event::{Event, RawData};
use crate::family::configurator_for;
use crate::logger::Logger;
use crate::model::{ConnectionType, DigitizerModel, Family, ModelConstants};
use crate::registry::{ConnectionId, ConnectionRegistry};
use crate::units;
use crate::waveform::{SharedWaveform, Waveform};
use std::fmt;
use std::sync::Arc;

const REG_BOARD_CONFIG: u32 = 0x8000;
const REG_BUFFER_ORGANIZATION: u32 = 0x800C;
const REG_ACQUISITION_CONTROL: u32 = 0x8100;
pub(crate) const REG_GLOBAL_TRIGGER_MASK: u32 = 0x810C;
const REG_POST_TRIGGER: u32 = 0x8114;
const REG_EVENT_STORED: u32 = 0x812C;

pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 1024;

const CONNECTED_OR_LATER: &[SessionState] = &[
    SessionState::Connected,
    SessionState::Configured,
    SessionState::Acquiring,
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connected,
    Configured,
    Acquiring,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connected => "connected",
            SessionState::Configured => "configured",
            SessionState::Acquiring => "acquiring",
        };
        f.write_str(name)
    }
}

/// Where the board is.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ConnectionParams {
    pub connection_type: ConnectionType,
    pub link_num: i32,
    pub conet_node: i32,
    pub vme_base_address: u32,
}

impl ConnectionParams {
    pub fn usb(link_num: i32) -> Self {
        Self {
            connection_type: ConnectionType::Usb,
            link_num,
            ..Default::default()
        }
    }

    pub fn a4818(link_num: i32, conet_node: i32, vme_base_address: u32) -> Self {
        Self {
            connection_type: ConnectionType::A4818,
            link_num,
            conet_node,
            vme_base_address,
        }
    }

    pub fn id(&self) -> ConnectionId {
        ConnectionId::new(
            self.connection_type,
            self.link_num,
            self.conet_node,
            self.vme_base_address,
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionOptions {
    /// Capacity of the event and waveform pools.
    pub event_buffer_size: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            event_buffer_size: DEFAULT_EVENT_BUFFER_SIZE,
        }
    }
}

/// A digitizer session.
///
/// Vendor warnings are logged and tolerated. The first vendor error aborts
/// the running operation and faults the session: from then on every guarded
/// operation returns [`Error::Faulted`] until the session is dropped.
pub struct Digitizer<A: CaenApi> {
    pub(crate) api: A,
    registry: Arc<ConnectionRegistry>,
    logger: Arc<dyn Logger>,
    model: DigitizerModel,
    pub(crate) family: Family,
    pub(crate) constants: &'static ModelConstants,
    params: ConnectionParams,
    options: SessionOptions,
    pub(crate) handle: i32,
    state: SessionState,
    has_error: bool,
    has_warning: bool,
    board_info: BoardInfo,
    pub(crate) global_config: GlobalConfig,
    pub(crate) group_configs: [GroupConfig; NUM_GROUP_CONFIGS],
    current_max_buffers: u32,
    raw: Option<RawData<A::Buffer>>,
    events: Vec<Event<A::Event>>,
    waveforms: Vec<SharedWaveform>,
}

impl<A: CaenApi> Digitizer<A> {
    pub fn connect(
        api: A,
        registry: Arc<ConnectionRegistry>,
        logger: Arc<dyn Logger>,
        model: DigitizerModel,
        params: ConnectionParams,
    ) -> Self {
        Self::connect_with_options(api, registry, logger, model, params, SessionOptions::default())
    }

    /// Opens the board. The session is returned even when opening failed;
    /// check [`is_connected`](Self::is_connected) and
    /// [`has_error`](Self::has_error).
    pub fn connect_with_options(
        api: A,
        registry: Arc<ConnectionRegistry>,
        logger: Arc<dyn Logger>,
        model: DigitizerModel,
        params: ConnectionParams,
        options: SessionOptions,
    ) -> Self {
        let constants = model.constants();
        let mut dgtz = Self {
            api,
            registry,
            logger,
            model,
            family: model.family(),
            constants,
            params,
            options,
            handle: -1,
            state: SessionState::Disconnected,
            has_error: false,
            has_warning: false,
            board_info: BoardInfo::default(),
            global_config: GlobalConfig::default(),
            group_configs: [GroupConfig::default(); NUM_GROUP_CONFIGS],
            current_max_buffers: constants.max_buffers,
            raw: None,
            events: Vec::new(),
            waveforms: Vec::new(),
        };

        let id = params.id();
        if dgtz.registry.register(id) {
            dgtz.logger.warn(format_args!(
                "Resource {id} is already in use. Opening it again may restart the resource."
            ));
        }
        dgtz.open();
        dgtz
    }

    fn open(&mut self) {
        const OP: &str = "connect";
        let p = self.params;
        let (link, conet_node, vme_base_address) = match p.connection_type {
            ConnectionType::Usb => (LinkType::Usb, 0, 0),
            ConnectionType::A4818 => (LinkType::UsbA4818, p.conet_node, p.vme_base_address),
            other => {
                self.has_error = true;
                self.logger.error(format_args!("{}", Error::UnsupportedConnection(other)));
                return;
            }
        };

        let opened = self
            .api
            .open_digitizer(link, p.link_num, conet_node, vme_base_address);
        match self.check(OP, "CAEN_DGTZ_OpenDigitizer", "Failed to open the port to the digitizer.", opened) {
            Ok(Some(handle)) if handle >= 0 => {
                self.handle = handle;
                self.state = SessionState::Connected;
                self.logger.info(format_args!(
                    "Connected resource with handle {handle} using link number {}, CONET node {} and VME address {:#x}.",
                    p.link_num, conet_node, vme_base_address
                ));
            }
            Ok(_) => {
                // a board we could not open is unusable, whatever the code
                self.has_error = true;
                self.logger.error(format_args!(
                    "Digitizer {} on link {} could not be opened.",
                    self.model, p.link_num
                ));
            }
            Err(_) => {}
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state != SessionState::Disconnected
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn has_error(&self) -> bool {
        self.has_error
    }

    pub fn has_warning(&self) -> bool {
        self.has_warning
    }

    pub fn reset_warning(&mut self) {
        self.has_warning = false;
    }

    pub fn model(&self) -> DigitizerModel {
        self.model
    }

    pub fn family(&self) -> Family {
        self.family
    }

    pub fn model_constants(&self) -> &'static ModelConstants {
        self.constants
    }

    pub fn connection_params(&self) -> ConnectionParams {
        self.params
    }

    pub fn options(&self) -> SessionOptions {
        self.options
    }

    pub fn handle(&self) -> i32 {
        self.handle
    }

    pub fn board_info(&self) -> &BoardInfo {
        &self.board_info
    }

    /// What the board runs with, after the corrections made during setup.
    pub fn global_config(&self) -> &GlobalConfig {
        &self.global_config
    }

    pub fn group_configs(&self) -> &[GroupConfig; NUM_GROUP_CONFIGS] {
        &self.group_configs
    }

    pub fn current_max_buffers(&self) -> u32 {
        self.current_max_buffers
    }

    pub fn number_of_events(&self) -> u32 {
        self.raw.as_ref().map_or(0, RawData::num_events)
    }

    pub fn data_size(&self) -> u32 {
        self.raw.as_ref().map_or(0, RawData::data_size)
    }

    pub fn buffer_capacity(&self) -> u32 {
        self.raw.as_ref().map_or(0, RawData::capacity)
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn api_mut(&mut self) -> &mut A {
        &mut self.api
    }

    /// Configures the board. Anything acquiring is stopped first and the
    /// readout memory released.
    pub fn setup(
        &mut self,
        global: &GlobalConfig,
        groups: &[GroupConfig; NUM_GROUP_CONFIGS],
    ) -> Result<()> {
        const OP: &str = "setup";
        self.guard(OP, CONNECTED_OR_LATER)?;
        if self.state == SessionState::Acquiring {
            self.disable_acquisition()?;
        }
        self.reset()?;

        self.global_config = *global;
        self.group_configs = *groups;
        self.configure_board()?;

        let Some(configurator) = configurator_for::<A>(self.family) else {
            self.log_code(
                Severity::Error,
                OP,
                "setup",
                "Family not supported.",
                ErrorCode::BadBoardType,
            );
            self.has_error = true;
            return Err(Error::UnsupportedFamily {
                model: self.model,
                family: self.family,
            });
        };
        configurator.configure(self)?;

        self.state = SessionState::Configured;
        self.logger.info(format_args!(
            "Digitizer {} configured: record length {}, max buffers {}.",
            self.model, self.global_config.record_length, self.current_max_buffers
        ));
        Ok(())
    }

    fn configure_board(&mut self) -> Result<()> {
        const OP: &str = "setup";
        let info = self.api.get_info(self.handle);
        if let Some(info) = self.check(OP, "CAEN_DGTZ_GetInfo", "Failed to retrieve the board info.", info)? {
            self.board_info = info;
        }

        let max_events = self.global_config.max_events_per_read;
        self.call(OP, "CAEN_DGTZ_SetMaxNumEventsBLT", |api, h| {
            api.set_max_num_events_blt(h, max_events)
        })?;

        let record_length = self.global_config.record_length;
        self.call(OP, "CAEN_DGTZ_SetRecordLength", |api, h| {
            api.set_record_length(h, record_length)
        })?;
        let applied = self.api.get_record_length(self.handle);
        if let Some(applied) = self.check(
            OP,
            "CAEN_DGTZ_GetRecordLength",
            &format!("Keeping the requested record length {record_length}."),
            applied,
        )? {
            self.global_config.record_length = applied;
        }

        let buffer_code = self.read_reg(OP, REG_BUFFER_ORGANIZATION)?;
        self.current_max_buffers = buffer_code
            .and_then(|code| 1u32.checked_shl(code & 0xF))
            .unwrap_or(self.constants.max_buffers);

        if matches!(self.family, Family::X740 | Family::X724) {
            let factor = self.global_config.decimation_factor.clamp(1, 128);
            let factor = 1u16 << factor.ilog2();
            self.global_config.decimation_factor = factor;
            self.call(OP, "CAEN_DGTZ_SetDecimationFactor", |api, h| {
                api.set_decimation_factor(h, factor)
            })?;
        }

        let percent = self.global_config.post_trigger_percentage;
        if self.model == DigitizerModel::V1740D {
            // post trigger is written in samples, scaled by the decimation
            let value = 0.01
                * f64::from(percent)
                * f64::from(self.global_config.record_length)
                * f64::from(self.global_config.decimation_factor);
            self.write_reg(OP, REG_POST_TRIGGER, value as u32)?;
        } else {
            self.call(OP, "CAEN_DGTZ_SetPostTriggerSize", |api, h| {
                api.set_post_trigger_size(h, percent)
            })?;
        }

        let g = self.global_config;
        self.call(OP, "CAEN_DGTZ_SetSWTriggerMode", |api, h| {
            api.set_sw_trigger_mode(h, g.sw_trigger_mode)
        })?;
        self.call(OP, "CAEN_DGTZ_SetExtTriggerInputMode", |api, h| {
            api.set_ext_trigger_input_mode(h, g.ext_trigger_mode)
        })?;
        self.call(OP, "CAEN_DGTZ_SetAcquisitionMode", |api, h| {
            api.set_acquisition_mode(h, g.acq_mode)
        })?;
        // the vendor call ignores the channel on these families
        self.call(OP, "CAEN_DGTZ_SetTriggerPolarity", |api, h| {
            api.set_trigger_polarity(h, 0, g.trigger_polarity)
        })?;
        self.write_bits_unguarded(OP, REG_BOARD_CONFIG, g.trigger_polarity as u32, 6, 1)?;
        self.call(OP, "CAEN_DGTZ_SetIOLevel", |api, h| api.set_io_level(h, g.io_level))?;
        self.write_bits_unguarded(OP, REG_ACQUISITION_CONTROL, u32::from(g.memory_full_mode), 5, 1)?;
        self.write_bits_unguarded(OP, REG_GLOBAL_TRIGGER_MASK, g.majority_coincidence_window, 20, 4)?;
        self.write_bits_unguarded(OP, REG_GLOBAL_TRIGGER_MASK, g.majority_level, 24, 3)?;
        Ok(())
    }

    /// Allocates readout memory and the pools, then starts the acquisition.
    /// On failure a stop is sent and the session stays configured.
    pub fn enable_acquisition(&mut self) -> Result<()> {
        const OP: &str = "enable_acquisition";
        self.guard(OP, &[SessionState::Configured])?;
        if let Err(err) = self.arm() {
            let stop = self.api.sw_stop_acquisition(self.handle);
            let _ = self.check(OP, "CAEN_DGTZ_SWStopAcquisition", "Stopping after a failed start.", stop);
            return Err(err);
        }

        self.state = SessionState::Acquiring;
        self.logger.info(format_args!(
            "Acquisition started with a {} byte readout buffer and {} event slots.",
            self.buffer_capacity(),
            self.events.len()
        ));
        Ok(())
    }

    fn arm(&mut self) -> Result<()> {
        const OP: &str = "enable_acquisition";
        self.events.clear();
        self.raw = None;

        let buffer = self.api.malloc_readout_buffer(self.handle);
        let buffer = self.require(OP, "CAEN_DGTZ_MallocReadoutBuffer", "Failed to allocate the readout buffer.", buffer)?;
        self.raw = Some(RawData::new(buffer));

        let pool = self.options.event_buffer_size;
        let mut events = Vec::with_capacity(pool);
        for _ in 0..pool {
            let event = self.api.allocate_event(self.handle);
            events.push(Event::new(self.require(OP, "CAEN_DGTZ_AllocateEvent", "Failed to allocate an event.", event)?));
        }
        self.events = events;
        self.waveforms = (0..pool)
            .map(|_| Waveform::shared(self.constants, &self.global_config, &self.group_configs))
            .collect();

        self.call(OP, "CAEN_DGTZ_ClearData", |api, h| api.clear_data(h))?;
        self.call(OP, "CAEN_DGTZ_SWStartAcquisition", |api, h| api.sw_start_acquisition(h))?;
        Ok(())
    }

    pub fn disable_acquisition(&mut self) -> Result<()> {
        const OP: &str = "disable_acquisition";
        self.guard(OP, &[SessionState::Acquiring])?;
        if self
            .call(OP, "CAEN_DGTZ_SWStopAcquisition", |api, h| api.sw_stop_acquisition(h))?
            .is_some()
        {
            self.state = SessionState::Configured;
        }
        Ok(())
    }

    pub fn software_trigger(&mut self) -> Result<()> {
        const OP: &str = "software_trigger";
        self.guard(OP, CONNECTED_OR_LATER)?;
        self.call(OP, "CAEN_DGTZ_SendSWtrigger", |api, h| api.send_sw_trigger(h))?;
        Ok(())
    }

    pub fn write_register(&mut self, address: u32, value: u32) -> Result<()> {
        const OP: &str = "write_register";
        self.guard(OP, CONNECTED_OR_LATER)?;
        self.write_reg(OP, address, value)
    }

    pub fn read_register(&mut self, address: u32) -> Result<u32> {
        const OP: &str = "read_register";
        self.guard(OP, CONNECTED_OR_LATER)?;
        let read = self.api.read_register(self.handle, address);
        self.require(OP, "CAEN_DGTZ_ReadRegister", &format!("Failed to read register {address:#06x}."), read)
    }

    /// Replaces bits `pos..pos + len` of a register with the low bits of
    /// `value`. `pos + len` must not exceed 32.
    pub fn write_bits(&mut self, address: u32, value: u32, pos: u8, len: u8) -> Result<()> {
        const OP: &str = "write_bits";
        self.guard(OP, CONNECTED_OR_LATER)?;
        self.write_bits_unguarded(OP, address, value, pos, len)
    }

    /// Events waiting in the board memory, 0 when unknown.
    pub fn events_in_buffer(&mut self) -> u32 {
        if self.has_error || self.state == SessionState::Disconnected {
            return 0;
        }
        match self.read_reg("events_in_buffer", REG_EVENT_STORED) {
            Ok(Some(events)) => events,
            _ => 0,
        }
    }

    /// Moves whatever the board holds into the readout buffer.
    pub fn retrieve_data(&mut self) -> Result<()> {
        const OP: &str = "retrieve_data";
        self.guard(OP, &[SessionState::Acquiring])?;
        let mut raw = self.raw.take().ok_or(Error::InvalidState {
            operation: OP,
            state: self.state,
        })?;
        let result = self.read_into(&mut raw);
        self.raw = Some(raw);
        result
    }

    fn read_into(&mut self, raw: &mut RawData<A::Buffer>) -> Result<()> {
        const OP: &str = "retrieve_data";
        let read = self.api.read_data(self.handle, raw.buffer_mut());
        let size = match self.check(OP, "CAEN_DGTZ_ReadData", "Failed to read data from the board.", read) {
            Ok(Some(size)) => size,
            other => {
                raw.clear_counts();
                return other.map(|_| ());
            }
        };
        raw.set_data_size(size);

        let counted = self.api.get_num_events(self.handle, raw.buffer(), size);
        match self.check(OP, "CAEN_DGTZ_GetNumEvents", "Failed to count the events read.", counted) {
            Ok(Some(events)) => {
                raw.set_num_events(events);
                Ok(())
            }
            other => {
                raw.clear_counts();
                other.map(|_| ())
            }
        }
    }

    /// Retrieves only once at least `n` events (capped at the board's
    /// buffer count) are waiting. Returns whether data was retrieved.
    pub fn retrieve_data_until_n_events(&mut self, n: u32) -> Result<bool> {
        const OP: &str = "retrieve_data_until_n_events";
        self.guard(OP, &[SessionState::Acquiring])?;
        if self.global_config.trigger_overlapping_enabled {
            return Err(Error::TriggerOverlapUnsupported);
        }

        let n = n.min(self.current_max_buffers);
        if self.events_in_buffer() < n {
            return Ok(false);
        }
        self.retrieve_data()?;
        Ok(true)
    }

    fn decodable_events(&self) -> usize {
        (self.number_of_events() as usize)
            .min(self.events.len())
            .min(self.waveforms.len())
    }

    /// Decodes retrieved event `index` into its waveform. Indices past the
    /// last retrieved event decode the last one.
    pub fn decode_event(&mut self, index: usize) -> Result<SharedWaveform> {
        const OP: &str = "decode_event";
        self.guard(OP, &[SessionState::Configured, SessionState::Acquiring])?;
        let decodable = self.decodable_events();
        if decodable == 0 {
            return Err(Error::NoEvents);
        }

        let index = index.min(decodable - 1);
        self.decode_slot(index)?;
        Ok(Arc::clone(&self.waveforms[index]))
    }

    /// Decodes every retrieved event that fits in the pools.
    pub fn decode_events(&mut self) -> Result<()> {
        const OP: &str = "decode_events";
        self.guard(OP, &[SessionState::Configured, SessionState::Acquiring])?;
        for index in 0..self.decodable_events() {
            self.decode_slot(index)?;
        }
        Ok(())
    }

    fn decode_slot(&mut self, index: usize) -> Result<()> {
        const OP: &str = "decode_event";
        let handle = self.handle;
        let Some(raw) = self.raw.as_ref() else {
            return Err(Error::NoEvents);
        };
        let event = &mut self.events[index];
        let decoded = match event.locate(&mut self.api, handle, raw, index as u32) {
            Ok(slice) => event
                .decode(&mut self.api, handle, raw, slice)
                .map_err(|code| ("CAEN_DGTZ_DecodeEvent", code)),
            Err(code) => Err(("CAEN_DGTZ_GetEventInfo", code)),
        };
        if let Err((function, code)) = decoded {
            let extra = format!("Failed to decode event {index}.");
            if self.check(OP, function, &extra, Err::<(), _>(code))?.is_none() {
                return Ok(());
            }
        }

        if !self.waveforms[index].write().copy_from_event(&self.events[index]) {
            self.logger.debug(format_args!(
                "Event {index} does not match the record length {}, waveform left as it was.",
                self.global_config.record_length
            ));
        }
        Ok(())
    }

    /// Waveform slot `index`, clamped to the pool. `None` before the first
    /// acquisition.
    pub fn waveform(&self, index: usize) -> Option<SharedWaveform> {
        let last = self.pool_limit(self.waveforms.len())?;
        Some(Arc::clone(&self.waveforms[index.min(last)]))
    }

    pub fn waveforms(&self) -> &[SharedWaveform] {
        &self.waveforms
    }

    /// Event slot `index`, clamped to the pool.
    pub fn event(&self, index: usize) -> Option<&Event<A::Event>> {
        let last = self.pool_limit(self.events.len())?;
        self.events.get(index.min(last))
    }

    fn pool_limit(&self, len: usize) -> Option<usize> {
        (self.current_max_buffers.max(1) as usize).min(len).checked_sub(1)
    }

    /// Empties the board memory without reallocating anything.
    pub fn clear_data(&mut self) -> Result<()> {
        const OP: &str = "clear_data";
        self.guard(OP, &[SessionState::Acquiring])?;
        self.call(OP, "CAEN_DGTZ_SWStopAcquisition", |api, h| api.sw_stop_acquisition(h))?;
        self.call(OP, "CAEN_DGTZ_ClearData", |api, h| api.clear_data(h))?;
        self.call(OP, "CAEN_DGTZ_SWStartAcquisition", |api, h| api.sw_start_acquisition(h))?;
        Ok(())
    }

    /// Resets the board and releases the readout memory. Waveforms already
    /// handed out are kept.
    pub fn reset(&mut self) -> Result<()> {
        const OP: &str = "reset";
        self.guard(OP, CONNECTED_OR_LATER)?;
        let result = self.call(OP, "CAEN_DGTZ_Reset", |api, h| api.reset(h));
        self.events.clear();
        self.raw = None;
        result?;
        self.state = SessionState::Connected;
        Ok(())
    }

    pub fn comm_transfer_rate(&self) -> u32 {
        units::comm_transfer_rate(self.params.connection_type)
    }

    /// Record length covering `ns` at the configured decimation.
    pub fn ns_to_record_length(&self, ns: f64) -> u32 {
        units::ns_to_record_length(ns, self.constants.sample_rate, self.global_config.decimation_factor)
    }

    pub fn threshold_counts_to_adc_counts(&self, counts: u32) -> u32 {
        units::threshold_counts_to_adc_counts(counts, self.constants.adc_resolution_bits)
    }

    pub fn adc_counts_to_threshold_counts(&self, counts: u32) -> u32 {
        units::adc_counts_to_threshold_counts(counts, self.constants.adc_resolution_bits)
    }

    pub fn voltage_range(&self, group: usize) -> f64 {
        units::voltage_range(self.constants, &self.group_configs, group)
    }

    pub fn adc_counts_to_volts(&self, counts: u32, group: usize) -> f64 {
        units::adc_counts_to_volts(counts, self.constants.adc_resolution_bits, self.voltage_range(group))
    }

    pub fn volts_to_adc_counts(&self, volts: f64, group: usize) -> u32 {
        units::volts_to_adc_counts(volts, self.constants.adc_resolution_bits, self.voltage_range(group))
    }

    fn guard(&self, operation: &'static str, allowed: &[SessionState]) -> Result<()> {
        if self.has_error {
            return Err(Error::Faulted { operation });
        }
        if !allowed.contains(&self.state) {
            return Err(Error::InvalidState {
                operation,
                state: self.state,
            });
        }
        Ok(())
    }

    fn log_code(&self, severity: Severity, operation: &str, function: &str, extra: &str, code: ErrorCode) {
        let kind = match severity {
            Severity::Warning => "Warning",
            Severity::Error => "Error",
        };
        let message = format!(
            "{kind} at {operation} in CAEN API function named {function} with CAEN API message: {}. Additional message: {extra}",
            code.description()
        );
        match severity {
            Severity::Warning => self.logger.warn(format_args!("{message}")),
            Severity::Error => self.logger.error(format_args!("{message}")),
        }
    }

    /// Warnings are logged and give `Ok(None)`. Errors are logged, fault the
    /// session and are returned.
    pub(crate) fn check<T>(
        &mut self,
        operation: &str,
        function: &'static str,
        extra: &str,
        result: std::result::Result<T, ErrorCode>,
    ) -> Result<Option<T>> {
        let code = match result {
            Ok(value) => return Ok(Some(value)),
            Err(code) => code,
        };

        let severity = code.severity().unwrap_or(Severity::Error);
        self.log_code(severity, operation, function, extra, code);
        match severity {
            Severity::Warning => {
                self.has_warning = true;
                Ok(None)
            }
            Severity::Error => {
                self.has_error = true;
                Err(Error::Device { function, code })
            }
        }
    }

    /// Like [`check`](Self::check) for calls whose value is needed: a
    /// warning becomes [`Error::Warning`].
    pub(crate) fn require<T>(
        &mut self,
        operation: &str,
        function: &'static str,
        extra: &str,
        result: std::result::Result<T, ErrorCode>,
    ) -> Result<T> {
        let code = result.as_ref().err().copied().unwrap_or(ErrorCode::Unknown);
        self.check(operation, function, extra, result)?
            .ok_or(Error::Warning { function, code })
    }

    pub(crate) fn call<T>(
        &mut self,
        operation: &str,
        function: &'static str,
        f: impl FnOnce(&mut A, i32) -> std::result::Result<T, ErrorCode>,
    ) -> Result<Option<T>> {
        let result = f(&mut self.api, self.handle);
        self.check(operation, function, "", result)
    }

    pub(crate) fn write_reg(&mut self, operation: &str, address: u32, value: u32) -> Result<()> {
        let result = self.api.write_register(self.handle, address, value);
        self.check(
            operation,
            "CAEN_DGTZ_WriteRegister",
            &format!("Failed to write register {address:#06x}."),
            result,
        )?;
        Ok(())
    }

    fn read_reg(&mut self, operation: &str, address: u32) -> Result<Option<u32>> {
        let result = self.api.read_register(self.handle, address);
        self.check(
            operation,
            "CAEN_DGTZ_ReadRegister",
            &format!("Failed to read register {address:#06x}."),
            result,
        )
    }

    /// Read-modify-write of a register field. Skipped when the read only
    /// warned.
    pub(crate) fn write_bits_unguarded(
        &mut self,
        operation: &str,
        address: u32,
        value: u32,
        pos: u8,
        len: u8,
    ) -> Result<()> {
        let Some(word) = self.read_reg(operation, address)? else {
            return Ok(());
        };
        self.write_reg(operation, address, insert_bits(word, value, pos, len))
    }
}

/// `word` with bits `pos..pos + len` replaced by the low `len` bits of `value`.
pub fn insert_bits(word: u32, value: u32, pos: u8, len: u8) -> u32 {
    let field = if len >= 32 { u32::MAX } else { (1u32 << len) - 1 };
    let shift = u32::from(pos);
    let mask = field.checked_shl(shift).unwrap_or(0);
    (word & !mask) | (value & field).checked_shl(shift).unwrap_or(0)
}

impl<A: CaenApi> Drop for Digitizer<A> {
    fn drop(&mut self) {
        const OP: &str = "disconnect";
        self.registry.unregister(self.params.id());
        if self.state == SessionState::Disconnected {
            return;
        }

        self.logger.info(format_args!(
            "Disconnecting resource with handle {}.",
            self.handle
        ));
        let stopped = self.api.sw_stop_acquisition(self.handle);
        let _ = self.check(OP, "CAEN_DGTZ_SWStopAcquisition", "Failed to stop the acquisition.", stopped);
        self.events.clear();
        self.raw = None;
        let closed = self.api.close_digitizer(self.handle);
        let _ = self.check(OP, "CAEN_DGTZ_CloseDigitizer", "Failed to close the digitizer.", closed);
        self.state = SessionState::Disconnected;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::testing::{Level, MemoryLogger};
    use crate::mask::ChannelsMask;
    use crate::sim::SimulatedLibrary;

    struct Bench {
        dgtz: Digitizer<SimulatedLibrary>,
        sim: SimulatedLibrary,
        logger: Arc<MemoryLogger>,
        registry: Arc<ConnectionRegistry>,
    }

    fn bench_with(model: DigitizerModel, event_buffer_size: usize) -> Bench {
        let sim = SimulatedLibrary::new(model);
        let logger = Arc::new(MemoryLogger::default());
        let registry = Arc::new(ConnectionRegistry::new());
        let dgtz = Digitizer::connect_with_options(
            sim.clone(),
            Arc::clone(&registry),
            logger.clone(),
            model,
            ConnectionParams::usb(0),
            SessionOptions { event_buffer_size },
        );
        Bench {
            dgtz,
            sim,
            logger,
            registry,
        }
    }

    fn bench(model: DigitizerModel) -> Bench {
        bench_with(model, 16)
    }

    fn single_channel(record_length: u32) -> (GlobalConfig, [GroupConfig; NUM_GROUP_CONFIGS]) {
        let global = GlobalConfig {
            record_length,
            ..Default::default()
        };
        let mut groups = [GroupConfig::default(); NUM_GROUP_CONFIGS];
        groups[0].enabled = true;
        groups[0].trigger_mask[0] = true;
        (global, groups)
    }

    fn acquiring(model: DigitizerModel) -> Bench {
        let mut b = bench(model);
        let (global, groups) = single_channel(100);
        b.dgtz.setup(&global, &groups).unwrap();
        b.dgtz.enable_acquisition().unwrap();
        b
    }

    #[test]
    fn software_triggered_event_fills_one_record() {
        let mut b = bench_with(DigitizerModel::DT5730B, DEFAULT_EVENT_BUFFER_SIZE);
        assert!(b.dgtz.is_connected());
        let (global, groups) = single_channel(1000);
        b.dgtz.setup(&global, &groups).unwrap();
        b.dgtz.enable_acquisition().unwrap();
        b.dgtz.software_trigger().unwrap();
        b.dgtz.retrieve_data().unwrap();
        assert!(b.dgtz.number_of_events() > 0);

        b.dgtz.decode_events().unwrap();
        let record_length = b.dgtz.global_config().record_length;
        let wf = b.dgtz.waveform(0).unwrap();
        assert_eq!(wf.read().total_size(), record_length as usize);
        assert_eq!(wf.read().enabled_channels(), &[0]);
        assert_eq!(wf.read().info().event_counter, 0);
        assert!(!b.dgtz.has_error());
    }

    #[test]
    fn until_n_events_waits_for_enough_events() {
        let mut b = acquiring(DigitizerModel::DT5730B);
        b.dgtz.software_trigger().unwrap();
        b.dgtz.retrieve_data().unwrap();
        let (size, events) = (b.dgtz.data_size(), b.dgtz.number_of_events());
        assert_eq!(events, 1);

        b.dgtz.software_trigger().unwrap();
        b.dgtz.software_trigger().unwrap();
        let n = b.dgtz.current_max_buffers() + 10;
        assert!(!b.dgtz.retrieve_data_until_n_events(n).unwrap());
        assert_eq!(b.dgtz.data_size(), size);
        assert_eq!(b.dgtz.number_of_events(), events);

        assert!(b.dgtz.retrieve_data_until_n_events(2).unwrap());
        assert_eq!(b.dgtz.number_of_events(), 2);
    }

    #[test]
    fn until_n_events_refuses_overlapping_triggers() {
        let mut b = bench(DigitizerModel::DT5730B);
        let (mut global, groups) = single_channel(100);
        global.trigger_overlapping_enabled = true;
        b.dgtz.setup(&global, &groups).unwrap();
        b.dgtz.enable_acquisition().unwrap();
        assert_eq!(
            b.dgtz.retrieve_data_until_n_events(1),
            Err(Error::TriggerOverlapUnsupported)
        );
        assert!(!b.dgtz.has_error());
    }

    #[test]
    fn duplicate_connections_warn_but_both_open() {
        let sim = SimulatedLibrary::new(DigitizerModel::DT5730B);
        let logger = Arc::new(MemoryLogger::default());
        let registry = Arc::new(ConnectionRegistry::new());
        let first = Digitizer::connect(
            sim.clone(),
            Arc::clone(&registry),
            logger.clone(),
            DigitizerModel::DT5730B,
            ConnectionParams::usb(0),
        );
        assert_eq!(logger.count(Level::Warn), 0);
        let second = Digitizer::connect(
            sim.clone(),
            Arc::clone(&registry),
            logger.clone(),
            DigitizerModel::DT5730B,
            ConnectionParams::usb(0),
        );
        assert!(logger.contains(Level::Warn, "already in use"));
        assert!(first.is_connected());
        assert!(second.is_connected());
        assert_ne!(first.handle(), second.handle());
        assert_eq!(registry.users(ConnectionParams::usb(0).id()), 2);

        drop(first);
        drop(second);
        assert!(!registry.is_registered(ConnectionParams::usb(0).id()));
        assert_eq!(sim.open_handles(), 0);
    }

    #[test]
    fn errors_are_sticky() {
        let mut b = bench(DigitizerModel::DT5730B);
        b.sim.inject_fault("CAEN_DGTZ_SetRecordLength", ErrorCode::CommError);
        let (global, groups) = single_channel(100);
        assert_eq!(
            b.dgtz.setup(&global, &groups),
            Err(Error::Device {
                function: "CAEN_DGTZ_SetRecordLength",
                code: ErrorCode::CommError
            })
        );
        assert!(b.dgtz.has_error());
        assert_eq!(b.dgtz.state(), SessionState::Connected);
        assert!(b
            .logger
            .contains(Level::Error, "Error at setup in CAEN API function named CAEN_DGTZ_SetRecordLength"));

        b.sim.clear_fault("CAEN_DGTZ_SetRecordLength");
        assert_eq!(
            b.dgtz.setup(&global, &groups),
            Err(Error::Faulted { operation: "setup" })
        );
        assert_eq!(b.dgtz.reset(), Err(Error::Faulted { operation: "reset" }));
        assert_eq!(b.dgtz.events_in_buffer(), 0);
        b.dgtz.reset_warning();
        assert!(b.dgtz.has_error());
    }

    #[test]
    fn warnings_do_not_block() {
        let mut b = bench(DigitizerModel::DT5730B);
        b.sim.inject_fault("CAEN_DGTZ_SetIOLevel", ErrorCode::Timeout);
        let (global, groups) = single_channel(100);
        b.dgtz.setup(&global, &groups).unwrap();
        assert_eq!(b.dgtz.state(), SessionState::Configured);
        assert!(b.dgtz.has_warning());
        assert!(!b.dgtz.has_error());
        assert!(b.logger.contains(Level::Warn, "Warning at setup"));

        b.dgtz.reset_warning();
        assert!(!b.dgtz.has_warning());
        b.dgtz.enable_acquisition().unwrap();
    }

    #[test]
    fn failed_start_stops_and_stays_configured() {
        let mut b = bench(DigitizerModel::DT5730B);
        let (global, groups) = single_channel(100);
        b.dgtz.setup(&global, &groups).unwrap();
        let stops = b.sim.call_count("CAEN_DGTZ_SWStopAcquisition");

        b.sim.inject_fault("CAEN_DGTZ_SWStartAcquisition", ErrorCode::CommError);
        assert!(b.dgtz.enable_acquisition().is_err());
        assert_eq!(b.dgtz.state(), SessionState::Configured);
        assert_eq!(b.sim.call_count("CAEN_DGTZ_SWStopAcquisition"), stops + 1);
        assert!(!b.sim.is_acquiring());
    }

    #[test]
    fn operations_check_the_state() {
        let mut b = bench(DigitizerModel::DT5730B);
        assert_eq!(
            b.dgtz.enable_acquisition(),
            Err(Error::InvalidState {
                operation: "enable_acquisition",
                state: SessionState::Connected
            })
        );
        assert!(matches!(
            b.dgtz.retrieve_data(),
            Err(Error::InvalidState { .. })
        ));
        assert!(matches!(b.dgtz.clear_data(), Err(Error::InvalidState { .. })));
        assert!(matches!(
            b.dgtz.disable_acquisition(),
            Err(Error::InvalidState { .. })
        ));
        // refused calls do not fault the session
        assert!(!b.dgtz.has_error());
        assert!(b.dgtz.waveform(0).is_none());
    }

    #[test]
    fn unsupported_connection_leaves_session_disconnected() {
        let params = ConnectionParams {
            connection_type: ConnectionType::OpticalLink,
            ..Default::default()
        };
        let logger = Arc::new(MemoryLogger::default());
        let mut dgtz = Digitizer::connect(
            SimulatedLibrary::new(DigitizerModel::V1740D),
            Arc::new(ConnectionRegistry::new()),
            logger.clone(),
            DigitizerModel::V1740D,
            params,
        );
        assert!(!dgtz.is_connected());
        assert!(dgtz.has_error());
        assert!(logger.contains(Level::Error, "not supported"));
        assert_eq!(
            dgtz.software_trigger(),
            Err(Error::Faulted {
                operation: "software_trigger"
            })
        );
    }

    #[test]
    fn decode_clamps_to_last_event() {
        let mut b = acquiring(DigitizerModel::DT5730B);
        assert_eq!(b.dgtz.decode_event(0).unwrap_err(), Error::NoEvents);

        for _ in 0..3 {
            b.dgtz.software_trigger().unwrap();
        }
        b.dgtz.retrieve_data().unwrap();
        assert_eq!(b.dgtz.number_of_events(), 3);

        let wf = b.dgtz.decode_event(10).unwrap();
        assert!(Arc::ptr_eq(&wf, &b.dgtz.waveforms()[2]));
        assert_eq!(wf.read().info().event_counter, 2);

        let last = b.dgtz.waveform(5000).unwrap();
        assert!(Arc::ptr_eq(&last, &b.dgtz.waveforms()[15]));
        assert!(b.dgtz.event(5000).is_some());
    }

    #[test]
    fn retrieve_warning_zeroes_counts() {
        let mut b = acquiring(DigitizerModel::DT5730B);
        b.dgtz.software_trigger().unwrap();
        b.dgtz.retrieve_data().unwrap();
        assert_eq!(b.dgtz.number_of_events(), 1);

        b.sim.inject_fault("CAEN_DGTZ_ReadData", ErrorCode::Timeout);
        b.dgtz.retrieve_data().unwrap();
        assert_eq!(b.dgtz.number_of_events(), 0);
        assert_eq!(b.dgtz.data_size(), 0);
        assert!(b.dgtz.has_warning());
        assert!(!b.dgtz.has_error());
    }

    #[test]
    fn write_bits_is_idempotent() {
        let mut b = bench(DigitizerModel::DT5730B);
        b.dgtz.write_register(0x1080, 0xFFFF_0000).unwrap();
        b.dgtz.write_bits(0x1080, 0b101, 4, 3).unwrap();
        assert_eq!(b.dgtz.read_register(0x1080).unwrap(), 0xFFFF_0050);
        b.dgtz.write_bits(0x1080, 0b101, 4, 3).unwrap();
        assert_eq!(b.dgtz.read_register(0x1080).unwrap(), 0xFFFF_0050);

        // bits past the field are dropped
        b.dgtz.write_bits(0x1080, 0xFF, 0, 2).unwrap();
        assert_eq!(b.dgtz.read_register(0x1080).unwrap(), 0xFFFF_0053);

        b.dgtz.write_bits(0x1080, 0x1234, 0, 32).unwrap();
        assert_eq!(b.dgtz.read_register(0x1080).unwrap(), 0x1234);
    }

    #[test]
    fn insert_bits_edges() {
        assert_eq!(insert_bits(0, 1, 31, 1), 0x8000_0000);
        assert_eq!(insert_bits(u32::MAX, 0, 0, 32), 0);
        assert_eq!(insert_bits(0xF0, 0, 4, 0), 0xF0);
    }

    #[test]
    fn record_length_follows_the_board() {
        let mut b = bench(DigitizerModel::DT5730B);
        let (global, groups) = single_channel(1005);
        b.dgtz.setup(&global, &groups).unwrap();
        assert_eq!(b.dgtz.global_config().record_length, 1010);

        b.dgtz.enable_acquisition().unwrap();
        b.dgtz.software_trigger().unwrap();
        b.dgtz.retrieve_data().unwrap();
        let wf = b.dgtz.decode_event(0).unwrap();
        assert_eq!(wf.read().record_length(), 1010);
        assert_eq!(b.sim.call_count("CAEN_DGTZ_SetDecimationFactor"), 0);
    }

    #[test]
    fn failed_record_length_readback_keeps_the_request() {
        let mut b = bench(DigitizerModel::DT5730B);
        b.sim.inject_fault("CAEN_DGTZ_GetRecordLength", ErrorCode::Timeout);
        let (global, groups) = single_channel(1005);
        b.dgtz.setup(&global, &groups).unwrap();
        assert_eq!(b.dgtz.global_config().record_length, 1005);
        assert!(b.dgtz.has_warning());
        assert!(!b.dgtz.has_error());
    }

    #[test]
    fn record_length_readback_error_faults_setup() {
        let mut b = bench(DigitizerModel::DT5730B);
        b.sim.inject_fault("CAEN_DGTZ_GetRecordLength", ErrorCode::CommError);
        let (global, groups) = single_channel(1005);
        assert!(b.dgtz.setup(&global, &groups).is_err());
        assert_eq!(b.dgtz.global_config().record_length, 1005);
        assert!(b.dgtz.has_error());
        assert_eq!(b.dgtz.state(), SessionState::Connected);
    }

    #[test]
    fn single_channel_setup_programs_each_channel() {
        let mut b = bench(DigitizerModel::DT5730B);
        let mut groups = [GroupConfig::default(); NUM_GROUP_CONFIGS];
        for ch in [0, 2, 5, 7] {
            groups[ch].enabled = true;
        }
        groups[2].trigger_mask = ChannelsMask::unpack(0b1000_0000);
        groups[7].trigger_mask = ChannelsMask::unpack(0b1);
        for (ch, group) in groups.iter_mut().enumerate() {
            group.trigger_threshold = 8000 + ch as u32;
            group.dc_offset = 0x1000 * ch as u32;
            group.dc_range = ch as u8;
        }
        b.dgtz.setup(&GlobalConfig::default(), &groups).unwrap();

        assert_eq!(b.sim.enable_mask(), 0b1010_0101);
        assert_eq!(b.sim.self_trigger_mask(), 0b1000_0100);
        for ch in 0..8 {
            assert_eq!(b.sim.threshold(ch), 8000 + ch as u32);
            assert_eq!(b.sim.dc_offset(ch), 0x1000 * ch as u32);
            assert_eq!(b.sim.register(0x1028 | (ch as u32) << 8), ch as u32 & 1);
        }
        assert!(!b.dgtz.has_error());
    }

    #[test]
    fn grouped_setup_programs_four_groups() {
        let mut b = bench(DigitizerModel::DT5740D);
        let global = GlobalConfig {
            record_length: 30,
            ext_as_gate: true,
            ..Default::default()
        };
        let mut groups = [GroupConfig::default(); NUM_GROUP_CONFIGS];
        for (g, group) in groups.iter_mut().enumerate() {
            group.enabled = true;
            group.acquisition_mask = ChannelsMask::all();
            group.trigger_mask = ChannelsMask::unpack(0b11);
            group.dc_corrections = [1, 2, 3, 4, 5, 6, 7, g as u8];
        }
        b.dgtz.setup(&global, &groups).unwrap();

        let applied = b.dgtz.group_configs();
        assert!(applied[..4].iter().all(|g| g.enabled));
        assert!(applied[4..].iter().all(|g| !g.enabled));
        assert_eq!(b.sim.enable_mask(), 0xF);
        assert_eq!(b.sim.channel_group_mask(1), 0b11);
        assert_eq!(b.sim.register(0x10C0), 0x0403_0201);
        assert_eq!(b.sim.register(0x13C4), 0x0307_0605);
        assert_eq!(b.sim.register(0x11A8) & 0xFF, 0xFF);
        assert_eq!((b.sim.register(0x811C) >> 21) & 0b11, 0b01);
        assert_eq!((b.sim.register(0x811C) >> 10) & 1, 1);
        assert_eq!((b.sim.register(0x810C) >> 27) & 1, 1);

        b.dgtz.enable_acquisition().unwrap();
        b.dgtz.software_trigger().unwrap();
        b.dgtz.retrieve_data().unwrap();
        let wf = b.dgtz.decode_event(0).unwrap();
        assert_eq!(wf.read().num_enabled_channels(), 32);
        assert_eq!(wf.read().total_size(), 32 * 30);
    }

    #[test]
    fn decimation_is_a_clamped_power_of_two() {
        for (requested, applied) in [(0, 1), (1, 1), (6, 4), (64, 64), (200, 128)] {
            let mut b = bench(DigitizerModel::DT5740D);
            let global = GlobalConfig {
                decimation_factor: requested,
                ..Default::default()
            };
            b.dgtz.setup(&global, &[GroupConfig::default(); NUM_GROUP_CONFIGS]).unwrap();
            assert_eq!(b.dgtz.global_config().decimation_factor, applied);
            assert_eq!(b.sim.decimation_factor(), applied);
        }
    }

    #[test]
    fn v1740d_post_trigger_goes_through_the_register() {
        let mut b = bench(DigitizerModel::V1740D);
        let global = GlobalConfig {
            record_length: 300,
            post_trigger_percentage: 50,
            decimation_factor: 2,
            ..Default::default()
        };
        b.dgtz.setup(&global, &[GroupConfig::default(); NUM_GROUP_CONFIGS]).unwrap();
        assert_eq!(b.sim.register(0x8114), 300);
        assert_eq!(b.sim.call_count("CAEN_DGTZ_SetPostTriggerSize"), 0);
    }

    #[test]
    fn unsupported_family_faults_setup() {
        let mut b = bench(DigitizerModel::DT5730B);
        b.dgtz.family = Family::X751;
        let (global, groups) = single_channel(100);
        assert_eq!(
            b.dgtz.setup(&global, &groups),
            Err(Error::UnsupportedFamily {
                model: DigitizerModel::DT5730B,
                family: Family::X751
            })
        );
        assert!(b.dgtz.has_error());
        assert!(b
            .logger
            .contains(Level::Error, "not allowed on this type of board"));
    }

    #[test]
    fn reset_releases_vendor_memory_but_keeps_waveforms() {
        let mut b = acquiring(DigitizerModel::DT5730B);
        assert_eq!(b.sim.live_buffers(), 1);
        assert_eq!(b.sim.live_events(), 16);
        let wf = b.dgtz.waveform(0).unwrap();

        b.dgtz.disable_acquisition().unwrap();
        b.dgtz.reset().unwrap();
        assert_eq!(b.dgtz.state(), SessionState::Connected);
        assert_eq!(b.sim.live_buffers(), 0);
        assert_eq!(b.sim.live_events(), 0);
        assert_eq!(b.dgtz.buffer_capacity(), 0);
        assert_eq!(wf.read().record_length(), 100);
    }

    #[test]
    fn setup_while_acquiring_stops_first() {
        let mut b = acquiring(DigitizerModel::DT5730B);
        let (global, groups) = single_channel(200);
        b.dgtz.setup(&global, &groups).unwrap();
        assert_eq!(b.dgtz.state(), SessionState::Configured);
        assert!(!b.sim.is_acquiring());
    }

    #[test]
    fn clear_data_empties_the_board() {
        let mut b = acquiring(DigitizerModel::DT5730B);
        b.dgtz.software_trigger().unwrap();
        b.dgtz.software_trigger().unwrap();
        assert_eq!(b.dgtz.events_in_buffer(), 2);
        let capacity = b.dgtz.buffer_capacity();

        b.dgtz.clear_data().unwrap();
        assert_eq!(b.dgtz.events_in_buffer(), 0);
        assert_eq!(b.dgtz.buffer_capacity(), capacity);
        assert!(b.sim.is_acquiring());
    }

    #[test]
    fn drop_closes_and_unregisters() {
        let b = acquiring(DigitizerModel::DT5730B);
        let id = b.dgtz.connection_params().id();
        let Bench {
            dgtz,
            sim,
            logger,
            registry,
        } = b;
        drop(dgtz);
        assert_eq!(sim.open_handles(), 0);
        assert_eq!(sim.live_buffers(), 0);
        assert_eq!(sim.live_events(), 0);
        assert!(!registry.is_registered(id));
        assert!(logger.contains(Level::Info, "Disconnecting"));
    }

    #[test]
    fn unit_helpers_use_the_session_constants() {
        let mut b = bench(DigitizerModel::DT5740D);
        let mut groups = [GroupConfig::default(); NUM_GROUP_CONFIGS];
        groups[0].dc_range = 1;
        let global = GlobalConfig {
            decimation_factor: 4,
            ..Default::default()
        };
        b.dgtz.setup(&global, &groups).unwrap();

        assert_eq!(b.dgtz.comm_transfer_rate(), 15_000_000);
        assert_eq!(b.dgtz.ns_to_record_length(1000.0), 15);
        assert_eq!(b.dgtz.threshold_counts_to_adc_counts(16), 1);
        assert_eq!(b.dgtz.voltage_range(0), 10.0);
        assert_eq!(b.dgtz.volts_to_adc_counts(5.0, 0), 2048);
    }
}
