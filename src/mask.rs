use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Index, IndexMut};

/// Eight per-channel flags that pack into one byte (bit i = channel i).
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelsMask {
    pub channels: [bool; ChannelsMask::NUM_CHANNELS],
}

impl ChannelsMask {
    pub const NUM_CHANNELS: usize = 8;

    pub fn all() -> Self {
        Self {
            channels: [true; Self::NUM_CHANNELS],
        }
    }

    pub fn pack(&self) -> u8 {
        self.channels
            .iter()
            .enumerate()
            .fold(0u8, |out, (i, &on)| out | (u8::from(on) << i))
    }

    pub fn unpack(mask: u8) -> Self {
        let mut out = Self::default();
        for (i, ch) in out.channels.iter_mut().enumerate() {
            *ch = mask & (1 << i) != 0;
        }
        out
    }

    pub fn get(&self, index: usize) -> Result<bool> {
        self.channels
            .get(index)
            .copied()
            .ok_or(Error::ChannelOutOfRange {
                index,
                len: Self::NUM_CHANNELS,
            })
    }

    pub fn set(&mut self, index: usize, enabled: bool) -> Result<()> {
        let ch = self
            .channels
            .get_mut(index)
            .ok_or(Error::ChannelOutOfRange {
                index,
                len: Self::NUM_CHANNELS,
            })?;
        *ch = enabled;
        Ok(())
    }

    pub fn any(&self) -> bool {
        self.channels.iter().any(|&on| on)
    }
}

impl Index<usize> for ChannelsMask {
    type Output = bool;

    fn index(&self, index: usize) -> &bool {
        &self.channels[index]
    }
}

impl IndexMut<usize> for ChannelsMask {
    fn index_mut(&mut self, index: usize) -> &mut bool {
        &mut self.channels[index]
    }
}

impl fmt::Display for ChannelsMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bits: Vec<&str> = self
            .channels
            .iter()
            .map(|&on| if on { "1" } else { "0" })
            .collect();
        write!(f, "[{}] (0x{:x})", bits.join(", "), self.pack())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_sets_one_bit_per_channel() {
        let mut mask = ChannelsMask::default();
        mask[0] = true;
        mask[3] = true;
        assert_eq!(mask.pack(), 0b0000_1001);
        assert_eq!(ChannelsMask::all().pack(), 0xFF);
        assert_eq!(ChannelsMask::default().pack(), 0);
    }

    #[test]
    fn unpack_inverts_pack_for_every_subset() {
        for bits in 0..=u8::MAX {
            let mask = ChannelsMask::unpack(bits);
            assert_eq!(mask.pack(), bits);
            assert_eq!(ChannelsMask::unpack(mask.pack()), mask);
        }
    }

    #[test]
    fn checked_access_rejects_out_of_range() {
        let mut mask = ChannelsMask::default();
        assert_eq!(mask.get(7), Ok(false));
        assert_eq!(
            mask.get(8),
            Err(Error::ChannelOutOfRange { index: 8, len: 8 })
        );
        assert!(mask.set(8, true).is_err());
        mask.set(7, true).unwrap();
        assert_eq!(mask.pack(), 0x80);
    }

    #[test]
    fn display_lists_bits_and_hex() {
        let mask = ChannelsMask::unpack(0x03);
        assert_eq!(mask.to_string(), "[1, 1, 0, 0, 0, 0, 0, 0] (0x3)");
    }
}
