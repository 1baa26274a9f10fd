//! Unit conversions that only depend on model constants and configuration.

use crate::config::GroupConfig;
use crate::model::{ConnectionType, ModelConstants};

/// Full scale of the 16 bit threshold DAC.
const THRESHOLD_RANGE_BITS: u32 = 16;

/// Readout throughput of the link, in S/s. 0 for links without a figure.
pub fn comm_transfer_rate(connection_type: ConnectionType) -> u32 {
    match connection_type {
        ConnectionType::Usb => 15_000_000,
        ConnectionType::A4818 => 40_000_000,
        _ => 0,
    }
}

/// Samples covering `ns` nanoseconds at the decimated sample rate.
///
/// Some families only accept multiples of a block size, so the board may
/// round the result up when it is applied.
pub fn ns_to_record_length(ns: f64, sample_rate: f64, decimation_factor: u16) -> u32 {
    let rate = sample_rate / f64::from(decimation_factor.max(1));
    (ns * rate / 1e9).max(0.0) as u32
}

pub fn threshold_counts_to_adc_counts(counts: u32, adc_bits: u32) -> u32 {
    ((u64::from(counts) << adc_bits) >> THRESHOLD_RANGE_BITS) as u32
}

pub fn adc_counts_to_threshold_counts(counts: u32, adc_bits: u32) -> u32 {
    ((u64::from(counts) << THRESHOLD_RANGE_BITS) >> adc_bits).min(u64::from(u32::MAX)) as u32
}

pub fn adc_counts_to_volts(counts: u32, adc_bits: u32, vpp: f64) -> f64 {
    f64::from(counts) * vpp / (1u64 << adc_bits) as f64
}

/// Saturates to the ADC range.
pub fn volts_to_adc_counts(volts: f64, adc_bits: u32, vpp: f64) -> u32 {
    if vpp <= 0.0 {
        return 0;
    }
    let full_scale = (1u64 << adc_bits) as f64;
    (volts / vpp * full_scale).clamp(0.0, full_scale - 1.0) as u32
}

/// Input range in Vpp selected by `group`, 0.0 when the group or its range
/// index does not exist.
pub fn voltage_range(constants: &ModelConstants, groups: &[GroupConfig], group: usize) -> f64 {
    groups
        .get(group)
        .and_then(|g| constants.voltage_ranges.get(g.dc_range as usize))
        .copied()
        .unwrap_or(0.0)
}
