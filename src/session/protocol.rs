//! # Streaming Endpoint Wire Format
//!
//! JSON messages exchanged with the remote conversational endpoint over the
//! WebSocket. Field names follow the endpoint's camelCase convention.
//!
//! ## Client → Server:
//! - `setup`: model, voice, response modality and system instruction; sent once
//! - `realtimeInput`: one base64 PCM16LE chunk per capture frame
//!
//! ## Server → Client:
//! - `setupComplete`: the session is open
//! - `serverContent.modelTurn.parts[].inlineData`: base64 PCM16LE speech at 24 kHz

use crate::audio::codec::EncodedChunk;
use crate::session::instruction::Voice;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    Setup(Setup),
    RealtimeInput(RealtimeInput),
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub model: String,
    pub generation_config: GenerationConfig,
    pub system_instruction: Content,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    pub speech_config: SpeechConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Debug, Serialize)]
pub struct Content {
    pub parts: Vec<TextPart>,
}

#[derive(Debug, Serialize)]
pub struct TextPart {
    pub text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<Blob>,
}

/// Base64 payload plus its descriptor, used in both directions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    #[serde(default)]
    pub mime_type: Option<String>,
    pub data: String,
}

impl ClientMessage {
    /// Opening message for a new session.
    pub fn setup(model: &str, voice: Voice, system_instruction: &str) -> Self {
        ClientMessage::Setup(Setup {
            model: model.to_string(),
            generation_config: GenerationConfig {
                response_modalities: vec!["AUDIO".to_string()],
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: voice.as_str().to_string(),
                        },
                    },
                },
            },
            system_instruction: Content {
                parts: vec![TextPart {
                    text: system_instruction.to_string(),
                }],
            },
        })
    }

    /// One capture frame.
    pub fn media(chunk: &EncodedChunk) -> Self {
        ClientMessage::RealtimeInput(RealtimeInput {
            media_chunks: vec![Blob {
                mime_type: Some(chunk.mime_type().to_string()),
                data: chunk.to_text(),
            }],
        })
    }
}

/// Any message the server may send. Unknown fields are ignored.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    #[serde(default)]
    pub setup_complete: Option<serde_json::Value>,
    #[serde(default)]
    pub server_content: Option<ServerContent>,
    #[serde(default)]
    pub go_away: Option<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default)]
    pub model_turn: Option<ModelTurn>,
    #[serde(default)]
    pub turn_complete: Option<bool>,
    #[serde(default)]
    pub interrupted: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ModelTurn {
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default)]
    pub inline_data: Option<Blob>,
    #[serde(default)]
    pub text: Option<String>,
}

impl ServerMessage {
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Base64 speech carried by this message, if any.
    ///
    /// Takes the first part that has inline data.
    pub fn audio(&self) -> Option<&Blob> {
        self.server_content
            .as_ref()?
            .model_turn
            .as_ref()?
            .parts
            .iter()
            .find_map(|part| part.inline_data.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_message_shape() {
        let json = serde_json::to_value(ClientMessage::setup("models/live", Voice::Puck, "Be kind")).unwrap();
        assert_eq!(json["setup"]["model"], "models/live");
        assert_eq!(json["setup"]["generationConfig"]["responseModalities"][0], "AUDIO");
        assert_eq!(
            json["setup"]["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]["voiceName"],
            "Puck"
        );
        assert_eq!(json["setup"]["systemInstruction"]["parts"][0]["text"], "Be kind");
    }

    #[test]
    fn test_media_message_shape() {
        let chunk = EncodedChunk::from_samples(&[0.0, 0.0], 16000);
        let json = serde_json::to_value(ClientMessage::media(&chunk)).unwrap();
        let blob = &json["realtimeInput"]["mediaChunks"][0];
        assert_eq!(blob["mimeType"], "audio/pcm;rate=16000");
        assert_eq!(blob["data"], "AAAAAA==");
    }

    #[test]
    fn test_parse_audio_message() {
        let raw = r#"{"serverContent":{"modelTurn":{"parts":[{"inlineData":{"mimeType":"audio/pcm;rate=24000","data":"AAA="}}]}}}"#;
        let message = ServerMessage::parse(raw).unwrap();
        let blob = message.audio().unwrap();
        assert_eq!(blob.data, "AAA=");
        assert_eq!(blob.mime_type.as_deref(), Some("audio/pcm;rate=24000"));
    }

    #[test]
    fn test_parse_setup_complete() {
        let message = ServerMessage::parse(r#"{"setupComplete":{}}"#).unwrap();
        assert!(message.setup_complete.is_some());
        assert!(message.audio().is_none());
    }
}
