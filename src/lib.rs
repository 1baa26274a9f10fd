//! Configure, trigger and read out CAEN DT5730B, DT5740D and V1740D
//! digitizers.
//!
//! A [`Digitizer`] session drives any [`CaenApi`] backend: the vendor
//! library with the `caen-sdk` feature, or the [`SimulatedLibrary`].
//! Decoded events land in [`Waveform`]s shaped channels × record length
//! that stay valid after the session is gone.

pub mod capi;
pub mod config;
pub mod dgtz;
pub mod digitizer_params;
pub mod error;
pub mod event;
mod family;
pub mod logger;
pub mod mask;
pub mod model;
pub mod registry;
#[cfg(feature = "caen-sdk")]
pub mod sdk;
pub mod session;
pub mod sim;
pub mod units;
pub mod utils;
pub mod waveform;
#[cfg(feature = "hdf5")]
pub mod writer;

pub use config::{Conf, GlobalConfig, GroupConfig, NUM_GROUP_CONFIGS};
pub use dgtz::{
    AcqMode, BoardInfo, CaenApi, ErrorCode, EventInfo, IoLevel, TriggerMode, TriggerPolarity,
};
pub use digitizer_params::log_all;
pub use error::{Error, Result};
pub use logger::{LogLogger, Logger, NoLogger};
pub use mask::ChannelsMask;
pub use model::{ConnectionType, DigitizerModel, Family, ModelConstants};
pub use registry::{ConnectionId, ConnectionRegistry};
#[cfg(feature = "caen-sdk")]
pub use sdk::CaenDigitizerLib;
pub use session::{ConnectionParams, Digitizer, SessionOptions, SessionState};
pub use sim::SimulatedLibrary;
pub use utils::{Counter, RecordedEvent};
pub use waveform::{SharedWaveform, Waveform};
#[cfg(feature = "hdf5")]
pub use writer::{HDF5Writer, WriterSettings};
