//! # Audio Module
//!
//! Everything that touches samples: the wire codec, the microphone side of a
//! session and the speaker side.
//!
//! ## Key Components:
//! - **Codec**: float ↔ PCM16LE ↔ base64, plus chunk and buffer types
//! - **Capture**: fixed-size framing and the non-blocking outbound sink
//! - **Playback**: gap-free scheduling of inbound speech on the output clock
//! - **Device**: hardware bindings (cpal, behind the `device` feature)
//!
//! ## Audio Formats:
//! - **Outbound**: 16 kHz mono PCM16LE, `audio/pcm;rate=16000`
//! - **Inbound**: 24 kHz mono PCM16LE
//! - **Encoding**: little-endian signed integers, base64 on the wire

pub mod capture;   // Microphone framing and outbound sink
pub mod codec;     // PCM16 and base64 conversions
pub mod device;    // Hardware bindings
pub mod playback;  // Playback scheduling
