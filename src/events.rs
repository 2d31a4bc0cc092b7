//! Typed events posted to the session queue
//!
//! Every producer (capture thread, websocket tasks) tags what it posts with the
//! epoch of the session attempt it belongs to, so the consumer can tell live
//! events from stragglers of a session that has already been torn down.

use crate::error::DeviceError;
use crate::transport::{LiveLink, TransportError};
use tokio::sync::mpsc;

/// Identifies one session attempt. Bumped on every start and every teardown.
pub type Epoch = u64;

pub type EventSender = mpsc::UnboundedSender<SessionEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<SessionEvent>;

pub fn channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

#[derive(Debug)]
pub enum SessionEvent {
    /// One capture callback worth of normalized microphone samples.
    InputChunk { epoch: Epoch, samples: Vec<f32> },
    /// The microphone stopped delivering audio.
    DeviceLost { epoch: Epoch, error: DeviceError },
    /// Connection established and setup acknowledged.
    Opened { epoch: Epoch, link: Box<dyn LiveLink> },
    /// Model audio, 16-bit little-endian PCM at the output rate.
    OutputAudio { epoch: Epoch, pcm: Vec<u8> },
    /// The user started talking over the model.
    Interrupted { epoch: Epoch },
    InputTranscript { epoch: Epoch, text: String },
    OutputTranscript { epoch: Epoch, text: String },
    TurnComplete { epoch: Epoch },
    /// The server closed the connection.
    Closed { epoch: Epoch, reason: Option<String> },
    /// The connection failed or dropped.
    TransportFailed { epoch: Epoch, error: TransportError },
}

impl SessionEvent {
    pub fn epoch(&self) -> Epoch {
        match self {
            Self::InputChunk { epoch, .. }
            | Self::DeviceLost { epoch, .. }
            | Self::Opened { epoch, .. }
            | Self::OutputAudio { epoch, .. }
            | Self::Interrupted { epoch }
            | Self::InputTranscript { epoch, .. }
            | Self::OutputTranscript { epoch, .. }
            | Self::TurnComplete { epoch }
            | Self::Closed { epoch, .. }
            | Self::TransportFailed { epoch, .. } => *epoch,
        }
    }

    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InputChunk { .. } => "input-chunk",
            Self::DeviceLost { .. } => "device-lost",
            Self::Opened { .. } => "opened",
            Self::OutputAudio { .. } => "output-audio",
            Self::Interrupted { .. } => "interrupted",
            Self::InputTranscript { .. } => "input-transcript",
            Self::OutputTranscript { .. } => "output-transcript",
            Self::TurnComplete { .. } => "turn-complete",
            Self::Closed { .. } => "closed",
            Self::TransportFailed { .. } => "transport-failed",
        }
    }
}
