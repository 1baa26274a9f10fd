//! Channel and group programming, one configurator per supported family.

use crate::dgtz::CaenApi;
use crate::error::Result;
use crate::model::Family;
use crate::session::{Digitizer, REG_GLOBAL_TRIGGER_MASK};

const REG_FRONT_PANEL_IO: u32 = 0x811C;
/// x730: input range selection of channel n is at `0x1n28`.
const REG_CHANNEL_DC_RANGE: u32 = 0x1028;
/// x740: acquisition mask of group n is at `0x1nA8`.
const REG_GROUP_ACQ_MASK: u32 = 0x10A8;
/// x740: 8 bit DC trims of channels 0..4 (`0x1nC0`) and 4..8 (`0x1nC4`).
const REG_GROUP_DC_TRIM_LOW: u32 = 0x10C0;
const REG_GROUP_DC_TRIM_HIGH: u32 = 0x10C4;
/// x740 boards only use the first four groups.
const X740_GROUPS: usize = 4;

/// Last step of setup: programs the per channel or per group settings
/// stored in the session's group configs.
pub(crate) trait FamilyConfigurator<A: CaenApi> {
    fn configure(&self, dgtz: &mut Digitizer<A>) -> Result<()>;
}

pub(crate) fn configurator_for<A: CaenApi>(family: Family) -> Option<Box<dyn FamilyConfigurator<A>>> {
    match family {
        Family::X730 => Some(Box::new(NonGrouped)),
        Family::X740 => Some(Box::new(Grouped)),
        _ => None,
    }
}

/// Every group config is one channel.
struct NonGrouped;

impl<A: CaenApi> FamilyConfigurator<A> for NonGrouped {
    fn configure(&self, dgtz: &mut Digitizer<A>) -> Result<()> {
        const OP: &str = "setup";
        let num_channels = (dgtz.constants.num_channels as usize).min(dgtz.group_configs.len());
        for unused in dgtz.group_configs.iter_mut().skip(num_channels) {
            unused.enabled = false;
        }

        let mut enable_mask = 0u32;
        let mut trigger_mask = 0u32;
        for (ch, config) in dgtz.group_configs.iter().enumerate() {
            enable_mask |= u32::from(config.enabled) << ch;
            trigger_mask |= u32::from(config.trigger_mask.any()) << ch;
        }

        let mode = dgtz.global_config.ch_trigger_mode;
        dgtz.call(OP, "CAEN_DGTZ_SetChannelEnableMask", |api, h| {
            api.set_channel_enable_mask(h, enable_mask)
        })?;
        dgtz.call(OP, "CAEN_DGTZ_SetChannelSelfTrigger", |api, h| {
            api.set_channel_self_trigger(h, mode, trigger_mask)
        })?;

        for ch in 0..num_channels {
            let config = dgtz.group_configs[ch];
            let channel = ch as u32;
            dgtz.call(OP, "CAEN_DGTZ_SetChannelTriggerThreshold", |api, h| {
                api.set_channel_trigger_threshold(h, channel, config.trigger_threshold)
            })?;
            dgtz.call(OP, "CAEN_DGTZ_SetChannelDCOffset", |api, h| {
                api.set_channel_dc_offset(h, channel, config.dc_offset)
            })?;
            dgtz.write_reg(
                OP,
                REG_CHANNEL_DC_RANGE | (channel & 0x0F) << 8,
                u32::from(config.dc_range & 1),
            )?;
        }
        Ok(())
    }
}

/// Group configs are groups of 8 channels.
struct Grouped;

impl<A: CaenApi> FamilyConfigurator<A> for Grouped {
    fn configure(&self, dgtz: &mut Digitizer<A>) -> Result<()> {
        const OP: &str = "setup";
        for unused in dgtz.group_configs.iter_mut().skip(X740_GROUPS) {
            unused.enabled = false;
        }

        let group_mask = dgtz
            .group_configs
            .iter()
            .take(X740_GROUPS)
            .enumerate()
            .fold(0u32, |mask, (g, config)| mask | u32::from(config.enabled) << g);

        let mode = dgtz.global_config.ch_trigger_mode;
        dgtz.call(OP, "CAEN_DGTZ_SetGroupEnableMask", |api, h| {
            api.set_group_enable_mask(h, group_mask)
        })?;
        dgtz.call(OP, "CAEN_DGTZ_SetGroupSelfTrigger", |api, h| {
            api.set_group_self_trigger(h, mode, group_mask)
        })?;

        for g in 0..X740_GROUPS {
            let config = dgtz.group_configs[g];
            let group = g as u32;
            // needs firmware 4.17 or later on the V1740D
            dgtz.call(OP, "CAEN_DGTZ_SetGroupTriggerThreshold", |api, h| {
                api.set_group_trigger_threshold(h, group, config.trigger_threshold)
            })?;
            dgtz.call(OP, "CAEN_DGTZ_SetGroupDCOffset", |api, h| {
                api.set_group_dc_offset(h, group, config.dc_offset)
            })?;
            let trigger_mask = u32::from(config.trigger_mask.pack());
            dgtz.call(OP, "CAEN_DGTZ_SetChannelGroupMask", |api, h| {
                api.set_channel_group_mask(h, group, trigger_mask)
            })?;
            dgtz.write_bits_unguarded(
                OP,
                REG_GROUP_ACQ_MASK | group << 8,
                u32::from(config.acquisition_mask.pack()),
                0,
                8,
            )?;

            let (low, high) = config.dc_corrections.split_at(4);
            dgtz.write_reg(OP, REG_GROUP_DC_TRIM_LOW | group << 8, pack_trims(low))?;
            dgtz.write_reg(OP, REG_GROUP_DC_TRIM_HIGH | group << 8, pack_trims(high))?;
        }

        // TRG-IN AND internal trigger, TRG-IN used as gate
        let gate = u32::from(dgtz.global_config.ext_as_gate);
        dgtz.write_bits_unguarded(OP, REG_GLOBAL_TRIGGER_MASK, gate, 27, 1)?;
        dgtz.write_bits_unguarded(OP, REG_FRONT_PANEL_IO, gate, 10, 1)?;
        // TRG-OUT mode
        dgtz.write_bits_unguarded(OP, REG_FRONT_PANEL_IO, 0b01, 21, 2)?;
        Ok(())
    }
}

/// Four 8 bit trims into one register word, first channel in the low byte.
fn pack_trims(trims: &[u8]) -> u32 {
    trims
        .iter()
        .enumerate()
        .fold(0u32, |word, (i, &trim)| word | u32::from(trim) << (8 * i))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimulatedLibrary;

    #[test]
    fn only_x730_and_x740_are_supported() {
        assert!(configurator_for::<SimulatedLibrary>(Family::X730).is_some());
        assert!(configurator_for::<SimulatedLibrary>(Family::X740).is_some());
        for family in [Family::X721, Family::X724, Family::X751, Family::X790] {
            assert!(configurator_for::<SimulatedLibrary>(family).is_none());
        }
    }

    #[test]
    fn trims_pack_little_end_first() {
        assert_eq!(pack_trims(&[0x01, 0x02, 0x03, 0x04]), 0x0403_0201);
        assert_eq!(pack_trims(&[0xFF, 0, 0, 0]), 0xFF);
    }
}
