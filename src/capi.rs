//! Flat C interface for binding a session into other runtimes.
//!
//! A session is an opaque `RdDigitizer*` from [`rd_digitizer_create`],
//! released with [`rd_digitizer_destroy`]. Every other call accepts a null
//! handle and then does nothing, returning 0, `false` or null. Pointers
//! passed in must be valid for the documented number of elements, and
//! configuration structs must hold valid enum values.
#![allow(clippy::missing_safety_doc)]

use crate::config::{GlobalConfig, GroupConfig, NUM_GROUP_CONFIGS};
use crate::error::Result;
use crate::logger::Logger;
use crate::model::{ConnectionType, DigitizerModel};
use crate::registry::ConnectionRegistry;
use crate::session::{ConnectionParams, Digitizer};
use crate::waveform::SharedWaveform;
use libc::{c_char, c_int};
use std::ffi::{CStr, CString};
use std::fmt;
use std::sync::{Arc, OnceLock};

#[cfg(not(feature = "caen-sdk"))]
type Backend = crate::sim::SimulatedLibrary;
#[cfg(feature = "caen-sdk")]
type Backend = crate::sdk::CaenDigitizerLib;

#[cfg(not(feature = "caen-sdk"))]
fn backend(model: DigitizerModel) -> Backend {
    crate::sim::SimulatedLibrary::new(model)
}

#[cfg(feature = "caen-sdk")]
fn backend(_: DigitizerModel) -> Backend {
    crate::sdk::CaenDigitizerLib::new()
}

pub const RD_LOG_PRINT: c_int = 0;
pub const RD_LOG_INFO: c_int = 1;
pub const RD_LOG_DEBUG: c_int = 2;
pub const RD_LOG_WARN: c_int = 3;
pub const RD_LOG_ERROR: c_int = 4;

/// Receives one NUL terminated line per log message, valid for the call only.
pub type RdLogCallback = extern "C" fn(level: c_int, message: *const c_char);

static REGISTRY: OnceLock<Arc<ConnectionRegistry>> = OnceLock::new();

fn registry() -> Arc<ConnectionRegistry> {
    Arc::clone(REGISTRY.get_or_init(|| Arc::new(ConnectionRegistry::new())))
}

struct CallbackLogger(RdLogCallback);

impl CallbackLogger {
    fn emit(&self, level: c_int, args: fmt::Arguments<'_>) {
        let line = args.to_string().replace('\0', " ");
        if let Ok(line) = CString::new(line) {
            (self.0)(level, line.as_ptr());
        }
    }
}

impl Logger for CallbackLogger {
    fn print(&self, args: fmt::Arguments<'_>) {
        self.emit(RD_LOG_PRINT, args);
    }

    fn info(&self, args: fmt::Arguments<'_>) {
        self.emit(RD_LOG_INFO, args);
    }

    fn debug(&self, args: fmt::Arguments<'_>) {
        self.emit(RD_LOG_DEBUG, args);
    }

    fn warn(&self, args: fmt::Arguments<'_>) {
        self.emit(RD_LOG_WARN, args);
    }

    fn error(&self, args: fmt::Arguments<'_>) {
        self.emit(RD_LOG_ERROR, args);
    }
}

pub struct RdDigitizer {
    session: Digitizer<Backend>,
    logger: Arc<dyn Logger>,
}

impl RdDigitizer {
    /// Logs why a call was refused; the session already logged vendor failures.
    fn report<T>(&self, operation: &str, result: Result<T>) -> Option<T> {
        result
            .map_err(|err| self.logger.debug(format_args!("{operation}: {err}")))
            .ok()
    }
}

/// Mirror of the board info with fixed size strings.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct RdBoardInfo {
    pub model_name: [c_char; 12],
    pub model: u32,
    pub channels: u32,
    pub form_factor: u32,
    pub family_code: u32,
    pub roc_firmware: [c_char; 20],
    pub amc_firmware: [c_char; 40],
    pub serial_number: u32,
    pub pcb_revision: u32,
    pub adc_nbits: u32,
}

impl Default for RdBoardInfo {
    fn default() -> Self {
        Self {
            model_name: [0; 12],
            model: 0,
            channels: 0,
            form_factor: 0,
            family_code: 0,
            roc_firmware: [0; 20],
            amc_firmware: [0; 40],
            serial_number: 0,
            pcb_revision: 0,
            adc_nbits: 0,
        }
    }
}

fn fill_chars(dst: &mut [c_char], src: &str) {
    let len = src.len().min(dst.len().saturating_sub(1));
    for (d, &b) in dst.iter_mut().zip(&src.as_bytes()[..len]) {
        *d = b as c_char;
    }
    if let Some(end) = dst.get_mut(len) {
        *end = 0;
    }
}

unsafe fn digitizer<'a>(handle: *mut RdDigitizer) -> Option<&'a mut RdDigitizer> {
    handle.as_mut()
}

fn waveform_of(dgtz: &RdDigitizer, index: usize) -> Option<SharedWaveform> {
    dgtz.session.waveform(index)
}

/// Connects to a board. `model` is a model name such as `"DT5730B"` and
/// `connection` a connection type code (0 USB, 1 A4818). Returns null for an
/// unknown model or connection code, or a null callback. The session is
/// returned even when the board could not be opened; check
/// [`rd_is_connected`] and [`rd_has_error`].
#[no_mangle]
pub unsafe extern "C" fn rd_digitizer_create(
    model: *const c_char,
    connection: u32,
    link_num: c_int,
    conet_node: c_int,
    vme_base_address: u32,
    log: Option<RdLogCallback>,
) -> *mut RdDigitizer {
    let (Some(log), false) = (log, model.is_null()) else {
        return std::ptr::null_mut();
    };
    let Some(model) = CStr::from_ptr(model)
        .to_str()
        .ok()
        .and_then(|name| name.parse::<DigitizerModel>().ok())
    else {
        return std::ptr::null_mut();
    };
    let Some(connection_type) = ConnectionType::from_u32(connection) else {
        return std::ptr::null_mut();
    };

    let logger: Arc<dyn Logger> = Arc::new(CallbackLogger(log));
    let params = ConnectionParams {
        connection_type,
        link_num,
        conet_node,
        vme_base_address,
    };
    let session = Digitizer::connect(backend(model), registry(), Arc::clone(&logger), model, params);
    Box::into_raw(Box::new(RdDigitizer { session, logger }))
}

#[no_mangle]
pub unsafe extern "C" fn rd_digitizer_destroy(handle: *mut RdDigitizer) {
    if !handle.is_null() {
        drop(Box::from_raw(handle));
    }
}

#[no_mangle]
pub unsafe extern "C" fn rd_is_connected(handle: *mut RdDigitizer) -> bool {
    digitizer(handle).is_some_and(|d| d.session.is_connected())
}

#[no_mangle]
pub unsafe extern "C" fn rd_has_error(handle: *mut RdDigitizer) -> bool {
    digitizer(handle).is_some_and(|d| d.session.has_error())
}

#[no_mangle]
pub unsafe extern "C" fn rd_has_warning(handle: *mut RdDigitizer) -> bool {
    digitizer(handle).is_some_and(|d| d.session.has_warning())
}

#[no_mangle]
pub unsafe extern "C" fn rd_reset_warning(handle: *mut RdDigitizer) {
    if let Some(d) = digitizer(handle) {
        d.session.reset_warning();
    }
}

#[no_mangle]
pub unsafe extern "C" fn rd_get_board_info(handle: *mut RdDigitizer, out: *mut RdBoardInfo) -> bool {
    let (Some(d), Some(out)) = (digitizer(handle), out.as_mut()) else {
        return false;
    };
    let info = d.session.board_info();
    let mut mirror = RdBoardInfo {
        model: info.model,
        channels: info.channels,
        form_factor: info.form_factor,
        family_code: info.family_code,
        serial_number: info.serial_number,
        pcb_revision: info.pcb_revision,
        adc_nbits: info.adc_nbits,
        ..Default::default()
    };
    fill_chars(&mut mirror.model_name, &info.model_name);
    fill_chars(&mut mirror.roc_firmware, &info.roc_firmware);
    fill_chars(&mut mirror.amc_firmware, &info.amc_firmware);
    *out = mirror;
    true
}

#[no_mangle]
pub unsafe extern "C" fn rd_get_global_config(handle: *mut RdDigitizer, out: *mut GlobalConfig) -> bool {
    let (Some(d), Some(out)) = (digitizer(handle), out.as_mut()) else {
        return false;
    };
    *out = *d.session.global_config();
    true
}

#[no_mangle]
pub unsafe extern "C" fn rd_get_group_config(
    handle: *mut RdDigitizer,
    index: usize,
    out: *mut GroupConfig,
) -> bool {
    let (Some(d), Some(out)) = (digitizer(handle), out.as_mut()) else {
        return false;
    };
    match d.session.group_configs().get(index) {
        Some(group) => {
            *out = *group;
            true
        }
        None => false,
    }
}

/// `groups` points to 8 group configs.
#[no_mangle]
pub unsafe extern "C" fn rd_setup(
    handle: *mut RdDigitizer,
    global: *const GlobalConfig,
    groups: *const GroupConfig,
) -> bool {
    let (Some(d), Some(global)) = (digitizer(handle), global.as_ref()) else {
        return false;
    };
    if groups.is_null() {
        return false;
    }
    let groups = &*(groups as *const [GroupConfig; NUM_GROUP_CONFIGS]);
    let result = d.session.setup(global, groups);
    d.report("setup", result).is_some()
}

#[no_mangle]
pub unsafe extern "C" fn rd_reset(handle: *mut RdDigitizer) -> bool {
    let Some(d) = digitizer(handle) else {
        return false;
    };
    let result = d.session.reset();
    d.report("reset", result).is_some()
}

#[no_mangle]
pub unsafe extern "C" fn rd_enable_acquisition(handle: *mut RdDigitizer) -> bool {
    let Some(d) = digitizer(handle) else {
        return false;
    };
    let result = d.session.enable_acquisition();
    d.report("enable_acquisition", result).is_some()
}

#[no_mangle]
pub unsafe extern "C" fn rd_disable_acquisition(handle: *mut RdDigitizer) -> bool {
    let Some(d) = digitizer(handle) else {
        return false;
    };
    let result = d.session.disable_acquisition();
    d.report("disable_acquisition", result).is_some()
}

#[no_mangle]
pub unsafe extern "C" fn rd_read_register(handle: *mut RdDigitizer, address: u32, out: *mut u32) -> bool {
    let (Some(d), Some(out)) = (digitizer(handle), out.as_mut()) else {
        return false;
    };
    let result = d.session.read_register(address);
    match d.report("read_register", result) {
        Some(value) => {
            *out = value;
            true
        }
        None => false,
    }
}

#[no_mangle]
pub unsafe extern "C" fn rd_write_register(handle: *mut RdDigitizer, address: u32, value: u32) -> bool {
    let Some(d) = digitizer(handle) else {
        return false;
    };
    let result = d.session.write_register(address, value);
    d.report("write_register", result).is_some()
}

#[no_mangle]
pub unsafe extern "C" fn rd_write_bits(
    handle: *mut RdDigitizer,
    address: u32,
    value: u32,
    pos: u8,
    len: u8,
) -> bool {
    let Some(d) = digitizer(handle) else {
        return false;
    };
    let result = d.session.write_bits(address, value, pos, len);
    d.report("write_bits", result).is_some()
}

#[no_mangle]
pub unsafe extern "C" fn rd_software_trigger(handle: *mut RdDigitizer) -> bool {
    let Some(d) = digitizer(handle) else {
        return false;
    };
    let result = d.session.software_trigger();
    d.report("software_trigger", result).is_some()
}

#[no_mangle]
pub unsafe extern "C" fn rd_get_events_in_buffer(handle: *mut RdDigitizer) -> u32 {
    digitizer(handle).map_or(0, |d| d.session.events_in_buffer())
}

#[no_mangle]
pub unsafe extern "C" fn rd_retrieve_data(handle: *mut RdDigitizer) -> bool {
    let Some(d) = digitizer(handle) else {
        return false;
    };
    let result = d.session.retrieve_data();
    d.report("retrieve_data", result).is_some()
}

/// True when data was retrieved.
#[no_mangle]
pub unsafe extern "C" fn rd_retrieve_data_until_n_events(handle: *mut RdDigitizer, n: u32) -> bool {
    let Some(d) = digitizer(handle) else {
        return false;
    };
    let result = d.session.retrieve_data_until_n_events(n);
    d.report("retrieve_data_until_n_events", result).unwrap_or(false)
}

#[no_mangle]
pub unsafe extern "C" fn rd_decode_event(handle: *mut RdDigitizer, index: usize) -> bool {
    let Some(d) = digitizer(handle) else {
        return false;
    };
    let result = d.session.decode_event(index);
    d.report("decode_event", result).is_some()
}

#[no_mangle]
pub unsafe extern "C" fn rd_decode_events(handle: *mut RdDigitizer) -> bool {
    let Some(d) = digitizer(handle) else {
        return false;
    };
    let result = d.session.decode_events();
    d.report("decode_events", result).is_some()
}

#[no_mangle]
pub unsafe extern "C" fn rd_clear_data(handle: *mut RdDigitizer) -> bool {
    let Some(d) = digitizer(handle) else {
        return false;
    };
    let result = d.session.clear_data();
    d.report("clear_data", result).is_some()
}

#[no_mangle]
pub unsafe extern "C" fn rd_get_number_of_events(handle: *mut RdDigitizer) -> u32 {
    digitizer(handle).map_or(0, |d| d.session.number_of_events())
}

#[no_mangle]
pub unsafe extern "C" fn rd_waveform_record_length(handle: *mut RdDigitizer, index: usize) -> u32 {
    digitizer(handle)
        .and_then(|d| waveform_of(d, index))
        .map_or(0, |wf| wf.read().record_length())
}

#[no_mangle]
pub unsafe extern "C" fn rd_waveform_total_size(handle: *mut RdDigitizer, index: usize) -> usize {
    digitizer(handle)
        .and_then(|d| waveform_of(d, index))
        .map_or(0, |wf| wf.read().total_size())
}

#[no_mangle]
pub unsafe extern "C" fn rd_waveform_num_channels(handle: *mut RdDigitizer, index: usize) -> usize {
    digitizer(handle)
        .and_then(|d| waveform_of(d, index))
        .map_or(0, |wf| wf.read().num_enabled_channels())
}

unsafe fn copy_out(samples: &[u16], out: *mut u16, len: usize) -> usize {
    if out.is_null() {
        return 0;
    }
    let n = samples.len().min(len);
    std::ptr::copy_nonoverlapping(samples.as_ptr(), out, n);
    n
}

/// Copies up to `len` samples of waveform `index`, rows back to back.
/// Returns the number of samples written.
#[no_mangle]
pub unsafe extern "C" fn rd_waveform_copy_data(
    handle: *mut RdDigitizer,
    index: usize,
    out: *mut u16,
    len: usize,
) -> usize {
    let Some(wf) = digitizer(handle).and_then(|d| waveform_of(d, index)) else {
        return 0;
    };
    let wf = wf.read();
    copy_out(wf.as_slice(), out, len)
}

/// Copies up to `len` samples of row `row` of waveform `index`.
#[no_mangle]
pub unsafe extern "C" fn rd_waveform_copy_channel(
    handle: *mut RdDigitizer,
    index: usize,
    row: usize,
    out: *mut u16,
    len: usize,
) -> usize {
    let Some(wf) = digitizer(handle).and_then(|d| waveform_of(d, index)) else {
        return 0;
    };
    let wf = wf.read();
    wf.channel(row)
        .and_then(|samples| samples.to_slice())
        .map_or(0, |samples| copy_out(samples, out, len))
}

/// Copies the waveforms of every retrieved event back to back, stopping at
/// the first one that does not fit in `len`. Returns the samples written.
#[no_mangle]
pub unsafe extern "C" fn rd_waveforms_copy_all(handle: *mut RdDigitizer, out: *mut u16, len: usize) -> usize {
    let Some(d) = digitizer(handle) else {
        return 0;
    };
    if out.is_null() {
        return 0;
    }

    let events = d.session.number_of_events() as usize;
    let mut written = 0;
    for wf in d.session.waveforms().iter().take(events) {
        let wf = wf.read();
        let samples = wf.as_slice();
        if written + samples.len() > len {
            break;
        }
        written += copy_out(samples, out.add(written), samples.len());
    }
    written
}

#[cfg(all(test, not(feature = "caen-sdk")))]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static ERRORS: AtomicUsize = AtomicUsize::new(0);

    extern "C" fn count_errors(level: c_int, message: *const c_char) {
        assert!(!message.is_null());
        if level == RD_LOG_ERROR {
            ERRORS.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn null_handles_return_sentinels() {
        let null = std::ptr::null_mut();
        unsafe {
            assert!(!rd_is_connected(null));
            assert!(!rd_has_error(null));
            assert!(!rd_setup(null, std::ptr::null(), std::ptr::null()));
            assert!(!rd_enable_acquisition(null));
            assert!(!rd_software_trigger(null));
            assert!(!rd_retrieve_data_until_n_events(null, 1));
            assert_eq!(rd_get_events_in_buffer(null), 0);
            assert_eq!(rd_get_number_of_events(null), 0);
            assert_eq!(rd_waveform_total_size(null, 0), 0);
            assert_eq!(rd_waveforms_copy_all(null, std::ptr::null_mut(), 10), 0);
            rd_reset_warning(null);
            rd_digitizer_destroy(null);
        }
    }

    #[test]
    fn create_rejects_bad_arguments() {
        let model = CString::new("DT9999").unwrap();
        let good = CString::new("DT5730B").unwrap();
        unsafe {
            assert!(rd_digitizer_create(model.as_ptr(), 0, 0, 0, 0, Some(count_errors)).is_null());
            assert!(rd_digitizer_create(good.as_ptr(), 0, 0, 0, 0, None).is_null());
            assert!(rd_digitizer_create(good.as_ptr(), 99, 0, 0, 0, Some(count_errors)).is_null());
            assert!(rd_digitizer_create(std::ptr::null(), 0, 0, 0, 0, Some(count_errors)).is_null());
        }
    }

    #[test]
    fn full_acquisition_round() {
        let model = CString::new("DT5730B").unwrap();
        unsafe {
            let h = rd_digitizer_create(model.as_ptr(), 0, 3, 0, 0, Some(count_errors));
            assert!(!h.is_null());
            assert!(rd_is_connected(h));

            let mut info = RdBoardInfo::default();
            let global = GlobalConfig::default();
            let mut groups = [GroupConfig::default(); NUM_GROUP_CONFIGS];
            groups[0].enabled = true;
            groups[2].enabled = true;
            assert!(rd_setup(h, &global, groups.as_ptr()));
            assert!(rd_get_board_info(h, &mut info));
            assert_eq!(CStr::from_ptr(info.model_name.as_ptr()).to_str().unwrap(), "DT5730B");

            let mut applied = GroupConfig::default();
            assert!(rd_get_group_config(h, 2, &mut applied));
            assert!(applied.enabled);
            assert!(!rd_get_group_config(h, 8, &mut applied));

            assert!(rd_enable_acquisition(h));
            assert!(rd_software_trigger(h));
            assert!(rd_software_trigger(h));
            assert_eq!(rd_get_events_in_buffer(h), 2);
            assert!(rd_retrieve_data_until_n_events(h, 2));
            assert_eq!(rd_get_number_of_events(h), 2);
            assert!(rd_decode_events(h));

            assert_eq!(rd_waveform_record_length(h, 0), 100);
            assert_eq!(rd_waveform_num_channels(h, 0), 2);
            assert_eq!(rd_waveform_total_size(h, 0), 200);

            let mut samples = vec![0u16; 250];
            assert_eq!(rd_waveform_copy_data(h, 0, samples.as_mut_ptr(), samples.len()), 200);
            assert!(samples[..200].iter().any(|&s| s > 0));
            assert_eq!(rd_waveform_copy_channel(h, 1, 1, samples.as_mut_ptr(), 50), 50);
            assert_eq!(rd_waveform_copy_channel(h, 1, 2, samples.as_mut_ptr(), 50), 0);
            assert_eq!(rd_waveforms_copy_all(h, samples.as_mut_ptr(), samples.len()), 200);
            let mut all = vec![0u16; 400];
            assert_eq!(rd_waveforms_copy_all(h, all.as_mut_ptr(), all.len()), 400);

            let mut value = 0;
            assert!(rd_write_register(h, 0x1080, 7));
            assert!(rd_write_bits(h, 0x1080, 1, 4, 1));
            assert!(rd_read_register(h, 0x1080, &mut value));
            assert_eq!(value, 0x17);

            assert!(rd_disable_acquisition(h));
            assert!(!rd_disable_acquisition(h));
            assert!(!rd_has_error(h));
            rd_digitizer_destroy(h);
        }
    }
}
