use crate::dgtz::ErrorCode;
use crate::model::{ConnectionType, DigitizerModel, Family};
use crate::session::SessionState;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum Error {
    #[error("{operation} refused: the session has an unrecoverable error")]
    Faulted { operation: &'static str },

    #[error("{operation} is not allowed while {state:?}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },

    #[error("{function} failed: {code}")]
    Device {
        function: &'static str,
        code: ErrorCode,
    },

    #[error("{function} returned a warning: {code}")]
    Warning {
        function: &'static str,
        code: ErrorCode,
    },

    #[error("family {family:?} of model {model:?} is not supported")]
    UnsupportedFamily {
        model: DigitizerModel,
        family: Family,
    },

    #[error("connection type {0:?} is not supported")]
    UnsupportedConnection(ConnectionType),

    #[error("no events have been retrieved")]
    NoEvents,

    #[error("reading until N events is not supported with trigger overlapping enabled")]
    TriggerOverlapUnsupported,

    #[error("unknown digitizer model '{0}'")]
    UnknownModel(String),

    #[error("channel index {index} is out of range (0..{len})")]
    ChannelOutOfRange { index: usize, len: usize },
}
