//! BankEdge Voice - spoken mock interviews against the Gemini Live API
//!
//! The crate captures the microphone, streams it to the Live API as 16 kHz PCM,
//! and plays the interviewer's 24 kHz audio back gap-free, with barge-in.

#![forbid(unsafe_code)]

/// PCM conversion and base64 framing
pub mod pcm;
/// Playback cursor and queue
pub mod playback;
/// Microphone capture
pub mod capture;
/// Input device enumeration
pub mod device;
/// Output audio context
pub mod speaker;
pub mod events;
/// Live API wire types
pub mod gemini;
pub mod transport;
pub mod session;
pub mod runner;
pub mod persona;
pub mod config;
pub mod recorder;
pub mod error;
