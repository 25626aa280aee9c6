//! Counters for the voice core.
//!
//! Updated from the capture callback and the session driver, so everything is
//! a relaxed atomic; readers take a `VoiceStatsSnapshot`.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct VoiceStats {
    sessions_started: AtomicU64,
    sessions_errored: AtomicU64,
    frames_sent: AtomicU64,
    frames_dropped: AtomicU64,
    fragments_played: AtomicU64,
    fragments_dropped: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct VoiceStatsSnapshot {
    pub sessions_started: u64,
    pub sessions_errored: u64,
    pub frames_sent: u64,
    pub frames_dropped: u64,
    pub fragments_played: u64,
    pub fragments_dropped: u64,
}

impl VoiceStats {
    pub fn record_session_started(&self) {
        self.sessions_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_session_errored(&self) {
        self.sessions_errored.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_frame_sent(&self) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_frame_dropped(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fragment_played(&self) {
        self.fragments_played.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fragment_dropped(&self) {
        self.fragments_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> VoiceStatsSnapshot {
        VoiceStatsSnapshot {
            sessions_started: self.sessions_started.load(Ordering::Relaxed),
            sessions_errored: self.sessions_errored.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            fragments_played: self.fragments_played.load(Ordering::Relaxed),
            fragments_dropped: self.fragments_dropped.load(Ordering::Relaxed),
        }
    }
}
