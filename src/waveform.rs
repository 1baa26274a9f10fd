use crate::config::{GlobalConfig, GroupConfig};
use crate::dgtz::{DecodedEvent, EventInfo};
use crate::event::Event;
use crate::model::ModelConstants;
use ndarray::{aview1, s, Array2, ArrayView1};
use parking_lot::RwLock;
use std::sync::Arc;

/// A waveform handed out by a session. It stays valid after the session is
/// gone.
pub type SharedWaveform = Arc<RwLock<Waveform>>;

/// Decoded samples of one event, one row per enabled channel.
#[derive(Clone, Debug, PartialEq)]
pub struct Waveform {
    data: Array2<u16>,
    enabled_channels: Vec<usize>,
    record_length: u32,
    info: EventInfo,
}

impl Waveform {
    pub fn new(constants: &ModelConstants, global: &GlobalConfig, groups: &[GroupConfig]) -> Self {
        let enabled_channels = enabled_channels(constants, groups);
        let record_length = global.record_length;
        Self {
            data: Array2::zeros((enabled_channels.len(), record_length as usize)),
            enabled_channels,
            record_length,
            info: EventInfo::default(),
        }
    }

    pub fn shared(constants: &ModelConstants, global: &GlobalConfig, groups: &[GroupConfig]) -> SharedWaveform {
        Arc::new(RwLock::new(Self::new(constants, global, groups)))
    }

    pub fn record_length(&self) -> u32 {
        self.record_length
    }

    pub fn total_size(&self) -> usize {
        self.data.len()
    }

    pub fn num_enabled_channels(&self) -> usize {
        self.enabled_channels.len()
    }

    /// Physical channel index of every row.
    pub fn enabled_channels(&self) -> &[usize] {
        &self.enabled_channels
    }

    pub fn info(&self) -> &EventInfo {
        &self.info
    }

    /// Shape is (enabled channels, record length).
    pub fn data(&self) -> &Array2<u16> {
        &self.data
    }

    /// Samples of row `row`, i.e. of physical channel `enabled_channels()[row]`.
    pub fn channel(&self, row: usize) -> Option<ArrayView1<'_, u16>> {
        (row < self.enabled_channels.len()).then(|| self.data.row(row))
    }

    /// All rows back to back.
    pub fn as_slice(&self) -> &[u16] {
        self.data.as_slice().unwrap_or(&[])
    }

    /// Copies a decoded event in. Nothing is copied, and `false` returned,
    /// when the size of the first enabled channel differs from the record
    /// length. The first enabled channel is checked rather than channel 0,
    /// which holds no samples when it is disabled.
    pub fn copy_from_event<E: DecodedEvent>(&mut self, event: &Event<E>) -> bool {
        let decoded = event.data();
        let probe = self.enabled_channels.first().copied().unwrap_or(0);
        if decoded.channel_size(probe) != self.record_length {
            return false;
        }

        self.info = *event.info();
        let record_length = self.record_length as usize;
        for (row, &ch) in self.enabled_channels.iter().enumerate() {
            let samples = decoded.channel_data(ch);
            let n = (decoded.channel_size(ch) as usize)
                .min(record_length)
                .min(samples.len());
            self.data
                .slice_mut(s![row, ..n])
                .assign(&aview1(&samples[..n]));
        }
        true
    }

    /// Copies another waveform of the same channels and record length.
    pub fn copy_from_waveform(&mut self, other: &Waveform) -> bool {
        if other.enabled_channels != self.enabled_channels
            || other.record_length != self.record_length
        {
            return false;
        }

        self.data.assign(&other.data);
        self.info = other.info;
        true
    }
}

/// Physical channels read out for this configuration, in row order.
///
/// Without groups every enabled slot is one channel. With groups, each
/// enabled group contributes the channels of its acquisition mask.
pub fn enabled_channels(constants: &ModelConstants, groups: &[GroupConfig]) -> Vec<usize> {
    let per_group = constants.channels_per_group as usize;
    let mut out = Vec::new();
    for (group_num, group) in groups.iter().enumerate() {
        if !group.enabled {
            continue;
        }

        if constants.num_groups == 0 {
            out.push(group_num);
            continue;
        }

        out.extend(
            (0..per_group)
                .filter(|&ch| group.acquisition_mask.channels.get(ch).copied().unwrap_or(false))
                .map(|ch| ch + per_group * group_num),
        );
    }
    out
}
