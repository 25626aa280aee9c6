//! # Playback Scheduler
//!
//! Turns speech fragments arriving from the network at arbitrary times into
//! back-to-back playback on the output device's clock.
//!
//! ## Scheduling Rule:
//! ```text
//! start_at = max(cursor, now)
//! cursor   = start_at + duration
//! ```
//! The `max` keeps consecutive fragments from overlapping while the network is
//! ahead of playback, and snaps back to `now` after a stall so a stale cursor
//! never builds up a backlog.
//!
//! Fragments are scheduled strictly in arrival order. There is no reordering
//! buffer: if the transport ever delivered out of order, playback would be out
//! of order too.

use crate::audio::codec::PlaybackBuffer;
use crate::error::VoiceError;

/// One output audio context: a clock plus somewhere to put scheduled audio.
///
/// Implementations must report a clock that never goes backwards.
pub trait AudioOutput: Send {
    /// Current time on the output device clock, in seconds.
    fn current_time(&self) -> f64;

    /// Arrange for `buffer` to begin playing at `start_at` seconds.
    fn schedule(&mut self, buffer: PlaybackBuffer, start_at: f64);
}

/// Opens output contexts; one context is created per session.
pub trait OutputDevice: Send + Sync {
    fn open(&self, sample_rate: u32) -> Result<Box<dyn AudioOutput>, VoiceError>;
}

/// Where a fragment landed on the output timeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledSlot {
    pub start_at: f64,
    pub end_at: f64,
}

/// Owns the playback cursor for one session's output context.
pub struct PlaybackScheduler {
    output: Box<dyn AudioOutput>,
    /// Earliest time the next fragment may start. `0.0` means unset.
    cursor: f64,
}

impl PlaybackScheduler {
    pub fn new(output: Box<dyn AudioOutput>) -> Self {
        Self { output, cursor: 0.0 }
    }

    /// Schedule `buffer` right after everything already queued, or now if
    /// the queue has drained.
    pub fn enqueue(&mut self, buffer: PlaybackBuffer) -> ScheduledSlot {
        let now = self.output.current_time();
        let start_at = self.cursor.max(now);
        let end_at = start_at + buffer.duration();

        self.output.schedule(buffer, start_at);
        self.cursor = end_at;

        tracing::trace!(start_at, end_at, now, "Scheduled playback fragment");
        ScheduledSlot { start_at, end_at }
    }

    /// Current cursor position in seconds.
    pub fn cursor(&self) -> f64 {
        self.cursor
    }

    /// Seconds of audio scheduled beyond the device clock.
    pub fn queued_seconds(&self) -> f64 {
        (self.cursor - self.output.current_time()).max(0.0)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Output context whose clock is moved by hand.
    #[derive(Clone, Default)]
    pub struct ManualOutput {
        pub clock: Arc<Mutex<f64>>,
        pub scheduled: Arc<Mutex<Vec<(f64, f64)>>>,
    }

    impl ManualOutput {
        pub fn set_time(&self, now: f64) {
            *self.clock.lock().unwrap() = now;
        }

        pub fn slots(&self) -> Vec<(f64, f64)> {
            self.scheduled.lock().unwrap().clone()
        }
    }

    impl AudioOutput for ManualOutput {
        fn current_time(&self) -> f64 {
            *self.clock.lock().unwrap()
        }

        fn schedule(&mut self, buffer: PlaybackBuffer, start_at: f64) {
            self.scheduled.lock().unwrap().push((start_at, buffer.duration()));
        }
    }

    /// Output device handing out clones of one `ManualOutput`.
    #[derive(Clone, Default)]
    pub struct ManualOutputDevice {
        pub output: ManualOutput,
        pub fail: bool,
    }

    impl OutputDevice for ManualOutputDevice {
        fn open(&self, _sample_rate: u32) -> Result<Box<dyn AudioOutput>, VoiceError> {
            if self.fail {
                return Err(VoiceError::Capability("no output device".to_string()));
            }
            Ok(Box::new(self.output.clone()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::ManualOutput;
    use super::*;
    use proptest::prelude::*;

    fn half_second() -> PlaybackBuffer {
        PlaybackBuffer {
            samples: vec![0.0; 12000],
            sample_rate: 24000,
        }
    }

    #[test]
    fn test_back_to_back_fragments_do_not_overlap() {
        let output = ManualOutput::default();
        let mut scheduler = PlaybackScheduler::new(Box::new(output.clone()));

        output.set_time(0.0);
        let first = scheduler.enqueue(half_second());
        output.set_time(0.1);
        let second = scheduler.enqueue(half_second());

        assert_eq!(first.start_at, 0.0);
        assert_eq!(second.start_at, 0.5);
        assert_eq!(output.slots(), vec![(0.0, 0.5), (0.5, 0.5)]);
        assert_eq!(scheduler.cursor(), 1.0);
    }

    #[test]
    fn test_stall_restarts_at_now() {
        let output = ManualOutput::default();
        let mut scheduler = PlaybackScheduler::new(Box::new(output.clone()));

        scheduler.enqueue(half_second());
        output.set_time(3.0);
        let after_gap = scheduler.enqueue(half_second());

        assert_eq!(after_gap.start_at, 3.0);
        assert_eq!(scheduler.cursor(), 3.5);
        assert_eq!(scheduler.queued_seconds(), 0.5);
    }

    #[test]
    fn test_empty_fragment_keeps_cursor() {
        let output = ManualOutput::default();
        let mut scheduler = PlaybackScheduler::new(Box::new(output.clone()));
        output.set_time(1.0);
        let slot = scheduler.enqueue(PlaybackBuffer {
            samples: Vec::new(),
            sample_rate: 24000,
        });
        assert_eq!(slot.start_at, 1.0);
        assert_eq!(slot.end_at, 1.0);
    }

    proptest! {
        #[test]
        fn prop_slots_never_overlap_or_start_in_the_past(
            arrivals in proptest::collection::vec((0.0f64..2.0, 1usize..48000), 1..40)
        ) {
            let output = ManualOutput::default();
            let mut scheduler = PlaybackScheduler::new(Box::new(output.clone()));
            let mut now = 0.0;
            let mut previous_end = 0.0f64;

            for (advance, samples) in arrivals {
                now += advance;
                output.set_time(now);
                let slot = scheduler.enqueue(PlaybackBuffer { samples: vec![0.0; samples], sample_rate: 24000 });

                prop_assert!(slot.start_at >= now);
                prop_assert!(slot.start_at >= previous_end);
                prop_assert!(slot.end_at >= slot.start_at);
                previous_end = slot.end_at;
            }
        }
    }
}
