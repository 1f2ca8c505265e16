use crate::types::{ParameterId, ResultToken, StreamDescription, StreamSetHandle};
use std::fmt;

/// Errors raised by the stream host, its backends and the frame protocol.
#[derive(Debug, thiserror::Error)]
pub enum FramehubError {
    #[error("Device error: {0}")]
    Device(String),

    #[error("Cannot operate on an invalid frame")]
    InvalidFrame,

    #[error("Stale frame: generation {held} superseded by {current}")]
    StaleFrame { held: u64, current: u64 },

    #[error("Parameter size mismatch: caller expected {expected} bytes, stream reported {reported}")]
    ParameterSizeMismatch { expected: usize, reported: usize },

    #[error("Parameter {0} unavailable")]
    ParameterUnavailable(ParameterId),

    #[error("Unknown result token {0}")]
    UnknownToken(ResultToken),

    #[error("No {0} stream on this device")]
    StreamNotFound(StreamDescription),

    #[error("Stream {0} is not open")]
    StreamNotOpen(StreamDescription),

    #[error("No {0} frame in this read")]
    FrameNotFound(StreamDescription),

    #[error("Frame record of {0} does not hold the requested frame type")]
    RecordMismatch(StreamDescription),

    #[error("Buffer too small: need {needed} bytes, got {available}")]
    BufferTooSmall { needed: usize, available: usize },

    #[error("Stream set '{0}' already registered")]
    DuplicateStreamSet(String),

    #[error("Unknown stream set {0}")]
    UnknownStreamSet(StreamSetHandle),

    #[error("Backend failure: {0}")]
    Backend(String),

    #[error("Channel disconnected")]
    ChannelDisconnected,
}

/// Closed status set returned across the C boundary.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Success = 0,
    DeviceError = 1,
    Timeout = 2,
    Failure = 3,
}

impl From<&FramehubError> for Status {
    fn from(err: &FramehubError) -> Self {
        match err {
            FramehubError::Device(_) => Status::DeviceError,
            _ => Status::Failure,
        }
    }
}

/// Thread-safe last-error storage for the C FFI layer.
pub(crate) struct LastError {
    message: std::sync::Mutex<String>,
}

impl LastError {
    pub const fn new() -> Self {
        Self {
            message: std::sync::Mutex::new(String::new()),
        }
    }

    pub fn set(&self, err: &FramehubError) {
        if let Ok(mut msg) = self.message.lock() {
            *msg = fmt::format(format_args!("{}\0", err));
        }
    }

    pub fn clear(&self) {
        if let Ok(mut msg) = self.message.lock() {
            msg.clear();
        }
    }

    pub fn as_ptr(&self) -> *const std::ffi::c_char {
        match self.message.lock() {
            Ok(msg) if !msg.is_empty() => msg.as_ptr() as *const std::ffi::c_char,
            _ => std::ptr::null(),
        }
    }
}
