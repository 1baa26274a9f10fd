use crate::dgtz::{AcqMode, IoLevel, TriggerMode, TriggerPolarity};
use crate::error::{Error, Result};
use crate::mask::ChannelsMask;
use crate::model::ConnectionType;
use confique::Config;
use serde::{Deserialize, Serialize};

/// Number of group (or, for non-grouped models, channel) slots every setup carries.
pub const NUM_GROUP_CONFIGS: usize = 8;

/// Acquisition-wide settings.
///
/// The session may correct `record_length` (to what the board actually
/// applied) and `decimation_factor` (to a power of two in [1, 128]).
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    pub max_events_per_read: u32,
    /// In samples.
    pub record_length: u32,
    /// In %.
    pub post_trigger_percentage: u32,
    /// Only acquire while EXT/TRG-IN is high (x740).
    pub ext_as_gate: bool,
    pub ext_trigger_mode: TriggerMode,
    pub sw_trigger_mode: TriggerMode,
    pub ch_trigger_mode: TriggerMode,
    pub acq_mode: AcqMode,
    pub io_level: IoLevel,
    pub trigger_overlapping_enabled: bool,
    /// true: the board reports full with one buffer still free.
    pub memory_full_mode: bool,
    pub trigger_polarity: TriggerPolarity,
    /// x740/x724 only.
    pub decimation_factor: u16,
    /// Trigger fires when at least `majority_level + 1` requests are over threshold.
    pub majority_level: u32,
    /// In trigger clock units, 4 bits.
    pub majority_coincidence_window: u32,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            max_events_per_read: 512,
            record_length: 100,
            post_trigger_percentage: 50,
            ext_as_gate: false,
            ext_trigger_mode: TriggerMode::AcqOnly,
            sw_trigger_mode: TriggerMode::AcqOnly,
            ch_trigger_mode: TriggerMode::AcqOnly,
            acq_mode: AcqMode::SwControlled,
            io_level: IoLevel::Nim,
            trigger_overlapping_enabled: false,
            memory_full_mode: true,
            trigger_polarity: TriggerPolarity::RisingEdge,
            decimation_factor: 0,
            majority_level: 0,
            majority_coincidence_window: 0,
        }
    }
}

/// One group of channels, or a single channel on models without groups.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupConfig {
    pub enabled: bool,
    /// Channels of the group allowed to self-trigger. On single channels any
    /// bit enables the trigger.
    pub trigger_mask: ChannelsMask,
    /// Channels of the group that are read out. Ignored for single channels.
    pub acquisition_mask: ChannelsMask,
    /// 16 bit DAC value.
    pub dc_offset: u32,
    /// Per channel 8 bit trims on the 12 bit LSB scale.
    pub dc_corrections: [u8; 8],
    /// Index into the model's voltage ranges.
    pub dc_range: u8,
    /// In ADC counts.
    pub trigger_threshold: u32,
}

impl Default for GroupConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            trigger_mask: ChannelsMask::default(),
            acquisition_mask: ChannelsMask::default(),
            dc_offset: 0x8000,
            dc_corrections: [0; 8],
            dc_range: 0,
            trigger_threshold: 0,
        }
    }
}

/// Configuration file of the acquisition binary.
#[derive(Config, Debug, Clone)]
pub struct Conf {
    #[config(nested)]
    pub connection: ConnectionSettings,
    #[config(nested)]
    pub run: RunSettings,
    #[config(nested)]
    pub acquisition: AcquisitionSettings,
    pub groups: Vec<GroupSettings>,
}

#[derive(Config, Debug, Clone)]
pub struct ConnectionSettings {
    pub model: String,
    #[config(default = "usb")]
    pub connection_type: ConnectionType,
    #[config(default = 0)]
    pub link_num: i32,
    #[config(default = 0)]
    pub conet_node: i32,
    #[config(default = 0)]
    pub vme_base_address: u32,
}

#[derive(Config, Debug, Clone)]
pub struct RunSettings {
    pub output_dir: String,
    pub campaign_num: usize,
    /// In seconds.
    pub run_duration: u64,
    #[config(default = 1)]
    pub runs: usize,
    /// Retrieve once at least this many events are waiting on the board.
    #[config(default = 1)]
    pub events_per_read: u32,
    #[config(default = 10)]
    pub poll_interval_ms: u64,
    /// Send one software trigger per poll.
    #[config(default = false)]
    pub software_trigger: bool,
    #[config(default = 1024)]
    pub event_buffer_size: usize,
    #[config(default = 100000)]
    pub max_events_per_file: usize,
    #[config(default = 5)]
    pub blosc_threads: u8,
    #[config(default = 2)]
    pub compression_level: u8,
}

#[derive(Config, Debug, Clone)]
pub struct AcquisitionSettings {
    #[config(default = 512)]
    pub max_events_per_read: u32,
    #[config(default = 100)]
    pub record_length: u32,
    #[config(default = 50)]
    pub post_trigger_percentage: u32,
    #[config(default = false)]
    pub ext_as_gate: bool,
    #[config(default = "acq_only")]
    pub ext_trigger_mode: TriggerMode,
    #[config(default = "acq_only")]
    pub sw_trigger_mode: TriggerMode,
    #[config(default = "acq_only")]
    pub ch_trigger_mode: TriggerMode,
    #[config(default = "sw_controlled")]
    pub acq_mode: AcqMode,
    #[config(default = "nim")]
    pub io_level: IoLevel,
    #[config(default = true)]
    pub memory_full_mode: bool,
    #[config(default = "rising_edge")]
    pub trigger_polarity: TriggerPolarity,
    #[config(default = 0)]
    pub decimation_factor: u16,
    #[config(default = 0)]
    pub majority_level: u32,
    #[config(default = 0)]
    pub majority_coincidence_window: u32,
}

impl AcquisitionSettings {
    pub fn to_global_config(&self) -> GlobalConfig {
        GlobalConfig {
            max_events_per_read: self.max_events_per_read,
            record_length: self.record_length,
            post_trigger_percentage: self.post_trigger_percentage,
            ext_as_gate: self.ext_as_gate,
            ext_trigger_mode: self.ext_trigger_mode,
            sw_trigger_mode: self.sw_trigger_mode,
            ch_trigger_mode: self.ch_trigger_mode,
            acq_mode: self.acq_mode,
            io_level: self.io_level,
            trigger_overlapping_enabled: false,
            memory_full_mode: self.memory_full_mode,
            trigger_polarity: self.trigger_polarity,
            decimation_factor: self.decimation_factor,
            majority_level: self.majority_level,
            majority_coincidence_window: self.majority_coincidence_window,
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct GroupSettings {
    pub enabled: bool,
    pub trigger_mask: MaskSetting,
    pub acquisition_mask: MaskSetting,
    pub dc_offset: u32,
    pub dc_corrections: [u8; 8],
    pub dc_range: u8,
    pub trigger_threshold: u32,
}

impl Default for GroupSettings {
    fn default() -> Self {
        let defaults = GroupConfig::default();
        Self {
            enabled: defaults.enabled,
            trigger_mask: MaskSetting::All(false),
            acquisition_mask: MaskSetting::All(false),
            dc_offset: defaults.dc_offset,
            dc_corrections: defaults.dc_corrections,
            dc_range: defaults.dc_range,
            trigger_threshold: defaults.trigger_threshold,
        }
    }
}

/// `true`/`false` for every channel, or the list of enabled channel indices.
#[derive(Deserialize, Clone, Debug, PartialEq)]
#[serde(untagged)]
pub enum MaskSetting {
    All(bool),
    List(Vec<usize>),
}

impl MaskSetting {
    pub fn to_mask(&self) -> Result<ChannelsMask> {
        match self {
            MaskSetting::All(true) => Ok(ChannelsMask::all()),
            MaskSetting::All(false) => Ok(ChannelsMask::default()),
            MaskSetting::List(channels) => {
                let mut mask = ChannelsMask::default();
                for &ch in channels {
                    mask.set(ch, true)?;
                }
                Ok(mask)
            }
        }
    }
}

impl GroupSettings {
    pub fn to_group_config(&self) -> Result<GroupConfig> {
        Ok(GroupConfig {
            enabled: self.enabled,
            trigger_mask: self.trigger_mask.to_mask()?,
            acquisition_mask: self.acquisition_mask.to_mask()?,
            dc_offset: self.dc_offset,
            dc_corrections: self.dc_corrections,
            dc_range: self.dc_range,
            trigger_threshold: self.trigger_threshold,
        })
    }
}

/// Fills the fixed group array from the file's `[[groups]]` entries; missing
/// entries keep their defaults.
pub fn group_configs(settings: &[GroupSettings]) -> Result<[GroupConfig; NUM_GROUP_CONFIGS]> {
    if settings.len() > NUM_GROUP_CONFIGS {
        return Err(Error::ChannelOutOfRange {
            index: settings.len() - 1,
            len: NUM_GROUP_CONFIGS,
        });
    }

    let mut out = [GroupConfig::default(); NUM_GROUP_CONFIGS];
    for (slot, group) in out.iter_mut().zip(settings) {
        *slot = group.to_group_config()?;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_vendor_examples() {
        let global = GlobalConfig::default();
        assert_eq!(global.max_events_per_read, 512);
        assert_eq!(global.record_length, 100);
        assert_eq!(global.post_trigger_percentage, 50);
        assert!(global.memory_full_mode);
        assert_eq!(global.ch_trigger_mode, TriggerMode::AcqOnly);

        let group = GroupConfig::default();
        assert!(!group.enabled);
        assert_eq!(group.dc_offset, 0x8000);
        assert_eq!(group.trigger_mask.pack(), 0);
    }

    #[test]
    fn mask_settings() {
        assert_eq!(MaskSetting::All(true).to_mask().unwrap().pack(), 0xFF);
        assert_eq!(MaskSetting::All(false).to_mask().unwrap().pack(), 0);
        assert_eq!(
            MaskSetting::List(vec![0, 2]).to_mask().unwrap().pack(),
            0b101
        );
        assert_eq!(
            MaskSetting::List(vec![8]).to_mask(),
            Err(Error::ChannelOutOfRange { index: 8, len: 8 })
        );
    }

    #[test]
    fn group_array_is_padded_with_defaults() {
        let settings = vec![GroupSettings {
            enabled: true,
            trigger_mask: MaskSetting::List(vec![0]),
            acquisition_mask: MaskSetting::All(true),
            ..Default::default()
        }];
        let groups = group_configs(&settings).unwrap();
        assert!(groups[0].enabled);
        assert_eq!(groups[0].trigger_mask.pack(), 1);
        assert_eq!(groups[0].acquisition_mask.pack(), 0xFF);
        assert!(groups[1..].iter().all(|g| *g == GroupConfig::default()));

        let too_many = vec![GroupSettings::default(); 9];
        assert!(group_configs(&too_many).is_err());
    }

    #[test]
    fn loads_a_full_file() {
        let toml = r#"
            groups = [
                { enabled = true, trigger_mask = true, acquisition_mask = [0, 1], trigger_threshold = 2100 },
            ]

            [connection]
            model = "DT5740D"
            connection_type = "a4818"
            link_num = 1

            [run]
            output_dir = "data"
            campaign_num = 3
            run_duration = 30

            [acquisition]
            record_length = 2048
            trigger_polarity = "falling_edge"
        "#;
        let path = std::env::temp_dir().join(format!("red_digitizer_conf_{}.toml", std::process::id()));
        std::fs::write(&path, toml).unwrap();
        let conf = Conf::builder().file(&path).load().unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(conf.connection.model, "DT5740D");
        assert_eq!(conf.connection.connection_type, ConnectionType::A4818);
        assert_eq!(conf.connection.conet_node, 0);
        assert_eq!(conf.run.runs, 1);
        assert_eq!(conf.run.event_buffer_size, 1024);

        let global = conf.acquisition.to_global_config();
        assert_eq!(global.record_length, 2048);
        assert_eq!(global.trigger_polarity, TriggerPolarity::FallingEdge);
        assert_eq!(global.sw_trigger_mode, TriggerMode::AcqOnly);

        let groups = group_configs(&conf.groups).unwrap();
        assert_eq!(groups[0].acquisition_mask.pack(), 0b11);
        assert_eq!(groups[0].trigger_threshold, 2100);
        assert_eq!(groups[0].dc_offset, 0x8000);
    }
}
