//! # Voice Session
//!
//! One duplex voice conversation with the remote endpoint: microphone audio
//! streams out while synthesized speech streams back and plays.
//!
//! ## Key Components:
//! - **Lifecycle**: the single live session and its state machine
//! - **Transport**: WebSocket connection exposed as channels
//! - **Protocol**: JSON wire messages
//! - **Instruction**: voice selection and system instruction text
//! - **Stats**: frame and fragment counters

pub mod instruction;
pub mod lifecycle;
pub mod protocol;
pub mod stats;
pub mod transport;

pub use lifecycle::{SessionDeps, SessionSettings, SessionState, SessionStatus, VoiceSessionManager};
