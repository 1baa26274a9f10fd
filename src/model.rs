//! Fixed per-model hardware characteristics.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[repr(u32)]
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash, Serialize, Deserialize)]
pub enum DigitizerModel {
    DT5730B = 0,
    DT5740D = 1,
    V1740D = 2,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub enum Family {
    X721,
    X724,
    X725,
    X731,
    X730,
    X740,
    X742,
    X743,
    X751,
    X761,
    X780,
    X781,
    X782,
    X790,
}

/// Everything that never changes for a given model.
#[derive(Clone, Debug, PartialEq)]
pub struct ModelConstants {
    pub adc_resolution_bits: u32,
    /// In S/s.
    pub sample_rate: f64,
    /// In S/ch.
    pub memory_per_channel: u32,
    pub num_channels: u8,
    /// 0 means the digitizer does not group channels.
    pub num_groups: u8,
    pub channels_per_group: u8,
    pub max_buffers: u32,
    pub nloc_to_record_length: f32,
    /// Selectable input ranges in Vpp, indexed by `GroupConfig::dc_range`.
    pub voltage_ranges: &'static [f64],
}

const DT5730B: ModelConstants = ModelConstants {
    adc_resolution_bits: 14,
    sample_rate: 500e6,
    memory_per_channel: 5_120_000,
    num_channels: 8,
    num_groups: 0,
    channels_per_group: 8,
    max_buffers: 1024,
    nloc_to_record_length: 10.0,
    voltage_ranges: &[0.5, 2.0],
};

const DT5740D: ModelConstants = ModelConstants {
    adc_resolution_bits: 12,
    sample_rate: 62.5e6,
    memory_per_channel: 192_000,
    num_channels: 32,
    num_groups: 4,
    channels_per_group: 8,
    max_buffers: 1024,
    nloc_to_record_length: 1.5,
    voltage_ranges: &[2.0, 10.0],
};

const V1740D: ModelConstants = ModelConstants {
    adc_resolution_bits: 12,
    sample_rate: 62.5e6,
    memory_per_channel: 192_000,
    num_channels: 64,
    num_groups: 8,
    channels_per_group: 8,
    max_buffers: 1024,
    nloc_to_record_length: 1.5,
    voltage_ranges: &[2.0],
};

impl DigitizerModel {
    pub const ALL: [DigitizerModel; 3] = [
        DigitizerModel::DT5730B,
        DigitizerModel::DT5740D,
        DigitizerModel::V1740D,
    ];

    pub fn constants(self) -> &'static ModelConstants {
        match self {
            DigitizerModel::DT5730B => &DT5730B,
            DigitizerModel::DT5740D => &DT5740D,
            DigitizerModel::V1740D => &V1740D,
        }
    }

    pub fn family(self) -> Family {
        match self {
            DigitizerModel::DT5740D | DigitizerModel::V1740D => Family::X740,
            DigitizerModel::DT5730B => Family::X730,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            DigitizerModel::DT5730B => "DT5730B",
            DigitizerModel::DT5740D => "DT5740D",
            DigitizerModel::V1740D => "V1740D",
        }
    }
}

impl FromStr for DigitizerModel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        DigitizerModel::ALL
            .into_iter()
            .find(|model| model.name() == s)
            .ok_or_else(|| Error::UnknownModel(s.to_string()))
    }
}

impl fmt::Display for DigitizerModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How the host reaches the board. Only `Usb` and `A4818` can be opened.
#[repr(u32)]
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionType {
    #[default]
    Usb = 0,
    A4818 = 1,
    OpticalLink = 2,
    EthernetV4718 = 3,
    UsbV4718 = 4,
}

impl ConnectionType {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(ConnectionType::Usb),
            1 => Some(ConnectionType::A4818),
            2 => Some(ConnectionType::OpticalLink),
            3 => Some(ConnectionType::EthernetV4718),
            4 => Some(ConnectionType::UsbV4718),
            _ => None,
        }
    }
}
