//! Gemini Live API wire types
//!
//! Client messages are serialized as single-key objects (`{"setup": {...}}`,
//! `{"realtimeInput": {...}}`); server messages are decoded into a flat list of
//! [`LiveEvent`]s the transport can forward without looking at JSON again.

use crate::pcm;
use crate::persona::Persona;
use base64::engine::general_purpose;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct Part {
    pub text: String,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct Content {
    pub parts: Vec<Part>,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

/// Generation configuration for setup.
#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speech_config: Option<SpeechConfig>,
}

/// Marker for "turn this feature on" fields that take an empty object.
#[derive(Debug, Serialize, Clone, Default, PartialEq)]
pub struct Enabled {}

/// Session setup message.
#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BidiGenerateContentSetup {
    pub model: String,
    pub generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<Enabled>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_audio_transcription: Option<Enabled>,
}

impl BidiGenerateContentSetup {
    /// Audio-in/audio-out setup for `persona`, with transcripts of both sides.
    pub fn for_persona(model: &str, persona: &Persona) -> Self {
        Self {
            model: model.to_string(),
            generation_config: GenerationConfig {
                response_modalities: vec!["AUDIO".to_string()],
                speech_config: Some(SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: persona.voice.as_str().to_string(),
                        },
                    },
                }),
            },
            system_instruction: Some(Content {
                parts: vec![Part {
                    text: persona.system_instruction.clone(),
                }],
            }),
            input_audio_transcription: Some(Enabled::default()),
            output_audio_transcription: Some(Enabled::default()),
        }
    }
}

#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    pub data: String,
    pub mime_type: String,
}

/// A chunk of realtime input.
#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub audio: Blob,
}

impl RealtimeInput {
    /// Wrap an already-encoded microphone payload.
    pub fn audio(data: String) -> Self {
        Self {
            audio: Blob {
                data,
                mime_type: pcm::INPUT_MIME_TYPE.to_string(),
            },
        }
    }
}

/// Message sent from client to server.
#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    Setup(BidiGenerateContentSetup),
    RealtimeInput(RealtimeInput),
}

/// Server -> client message. Every field is optional; one is set per frame.
#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    pub setup_complete: Option<serde_json::Value>,
    pub server_content: Option<ServerContent>,
    pub go_away: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    pub model_turn: Option<ModelTurn>,
    #[serde(default)]
    pub interrupted: bool,
    #[serde(default)]
    pub turn_complete: bool,
    pub input_transcription: Option<Transcription>,
    pub output_transcription: Option<Transcription>,
}

#[derive(Debug, Deserialize, Default)]
pub struct ModelTurn {
    #[serde(default)]
    pub parts: Vec<ServerPart>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServerPart {
    pub text: Option<String>,
    pub inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    pub data: String,
    pub mime_type: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Transcription {
    #[serde(default)]
    pub text: String,
}

/// What a server frame means to the session.
#[derive(Debug, Clone, PartialEq)]
pub enum LiveEvent {
    SetupComplete,
    /// Model audio, 16-bit little-endian PCM.
    Audio(Vec<u8>),
    Text(String),
    Interrupted,
    InputTranscript(String),
    OutputTranscript(String),
    TurnComplete,
    GoAway,
}

/// Decode one server frame.
pub fn decode_server_message(text: &str) -> Result<Vec<LiveEvent>, serde_json::Error> {
    let message: ServerMessage = serde_json::from_str(text)?;
    let mut events = Vec::new();

    if message.setup_complete.is_some() {
        events.push(LiveEvent::SetupComplete);
    }
    if let Some(content) = message.server_content {
        decode_server_content(content, &mut events);
    }
    if message.go_away.is_some() {
        events.push(LiveEvent::GoAway);
    }
    Ok(events)
}

fn decode_server_content(content: ServerContent, events: &mut Vec<LiveEvent>) {
    // Barge-in goes first so stale audio is cut before anything new is queued.
    if content.interrupted {
        events.push(LiveEvent::Interrupted);
    }

    if let Some(t) = content.input_transcription.filter(|t| !t.text.is_empty()) {
        events.push(LiveEvent::InputTranscript(t.text));
    }
    if let Some(t) = content.output_transcription.filter(|t| !t.text.is_empty()) {
        events.push(LiveEvent::OutputTranscript(t.text));
    }

    if let Some(turn) = content.model_turn {
        for part in turn.parts {
            if let Some(inline) = part.inline_data {
                match general_purpose::STANDARD.decode(&inline.data) {
                    Ok(data) if !data.is_empty() => events.push(LiveEvent::Audio(data)),
                    Ok(_) => {}
                    Err(e) => warn!("Dropping undecodable audio part: {}", e),
                }
            } else if let Some(text) = part.text.filter(|t| !t.is_empty()) {
                events.push(LiveEvent::Text(text));
            }
        }
    }

    if content.turn_complete {
        events.push(LiveEvent::TurnComplete);
    }
}
