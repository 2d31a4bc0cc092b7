use crate::transport::TransportError;

/// Audio device failures, on either the capture or the playback side.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeviceError {
    #[error("microphone access was denied")]
    PermissionDenied,

    #[error("no audio device found")]
    NoDevice,

    #[error("audio device is busy")]
    DeviceBusy,

    #[error("audio device cannot satisfy the requested format: {0}")]
    ConstraintsUnsatisfiable(String),

    #[error("audio device disconnected: {0}")]
    Disconnected(String),

    #[error("audio device error: {0}")]
    Other(String),
}

/// Errors surfaced by [`crate::session::VoiceSession`].
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

pub type Result<T> = std::result::Result<T, SessionError>;
