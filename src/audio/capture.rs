//! # Capture Pipeline
//!
//! Turns the live microphone stream into outbound `EncodedChunk`s while a
//! session is active.
//!
//! ## Flow:
//! ```text
//! hardware callback → CaptureSink::push_samples
//!                       → FrameAssembler (fixed-size frames)
//!                       → EncodedChunk (PCM16LE + "audio/pcm;rate=16000")
//!                       → FrameSink::submit (try_send, never waits)
//! ```
//!
//! ## Real-time Rules:
//! The hardware callback runs on the platform's audio thread and must finish in
//! bounded time. Nothing on this path awaits or blocks: a full or closed network
//! queue means the frame is dropped and counted, nothing more.
//!
//! The pipeline is only ever built once the remote endpoint has acknowledged
//! the session, so there is always somewhere to send frames.

use crate::audio::codec::EncodedChunk;
use crate::error::VoiceError;
use crate::session::stats::VoiceStats;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Slices an arbitrary stream of samples into frames of exactly `block_size`.
#[derive(Debug)]
pub struct FrameAssembler {
    block_size: usize,
    pending: Vec<f32>,
}

impl FrameAssembler {
    pub fn new(block_size: usize) -> Self {
        Self {
            block_size: block_size.max(1),
            pending: Vec::with_capacity(block_size.max(1)),
        }
    }

    /// Append samples and call `emit` once for every completed frame.
    ///
    /// Leftover samples stay pending until the next call.
    pub fn push(&mut self, mut samples: &[f32], mut emit: impl FnMut(&[f32])) {
        while !samples.is_empty() {
            let room = self.block_size - self.pending.len();
            let take = room.min(samples.len());
            self.pending.extend_from_slice(&samples[..take]);
            samples = &samples[take..];

            if self.pending.len() == self.block_size {
                emit(&self.pending);
                self.pending.clear();
            }
        }
    }

    /// Samples waiting for the current frame to fill up.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// The session's outbound sink as seen by the capture side.
///
/// Cloned freely; all clones share one validity flag. Once `invalidate` is
/// called every later `submit` is discarded, which is what keeps a frame from
/// a closing session from ever reaching the wire.
#[derive(Clone)]
pub struct FrameSink {
    tx: mpsc::Sender<EncodedChunk>,
    open: Arc<AtomicBool>,
    stats: Arc<VoiceStats>,
}

impl FrameSink {
    pub fn new(tx: mpsc::Sender<EncodedChunk>, stats: Arc<VoiceStats>) -> Self {
        Self {
            tx,
            open: Arc::new(AtomicBool::new(true)),
            stats,
        }
    }

    /// Hand a chunk to the network writer without waiting.
    ///
    /// Returns `false` when the chunk was dropped.
    pub fn submit(&self, chunk: EncodedChunk) -> bool {
        if !self.is_open() {
            self.stats.record_frame_dropped();
            return false;
        }

        match self.tx.try_send(chunk) {
            Ok(()) => {
                self.stats.record_frame_sent();
                true
            }
            Err(TrySendError::Full(_)) => {
                self.stats.record_frame_dropped();
                tracing::trace!("Outbound queue full, dropping capture frame");
                false
            }
            Err(TrySendError::Closed(_)) => {
                self.stats.record_frame_dropped();
                false
            }
        }
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Stop accepting frames. Idempotent.
    pub fn invalidate(&self) {
        self.open.store(false, Ordering::Release);
    }
}

/// Receives raw samples from a capture device callback.
///
/// Owned by the device's callback; each call does a bounded amount of work.
pub struct CaptureSink {
    assembler: FrameAssembler,
    sample_rate: u32,
    sink: FrameSink,
}

impl CaptureSink {
    pub fn new(block_size: usize, sample_rate: u32, sink: FrameSink) -> Self {
        Self {
            assembler: FrameAssembler::new(block_size),
            sample_rate,
            sink,
        }
    }

    /// Feed mono samples at the session input rate.
    pub fn push_samples(&mut self, samples: &[f32]) {
        if !self.sink.is_open() {
            return;
        }

        let sample_rate = self.sample_rate;
        let sink = &self.sink;
        self.assembler.push(samples, |frame| {
            sink.submit(EncodedChunk::from_samples(frame, sample_rate));
        });
    }
}

/// An acquired microphone stream.
pub trait CaptureStream: Send {
    /// Release the hardware. Called exactly once by `CapturePipeline`.
    fn release(&mut self);
}

/// Something that can hand out the microphone.
pub trait CaptureDevice: Send + Sync {
    /// Acquire the microphone and start delivering mono samples at
    /// `sample_rate` into `sink`.
    fn acquire(&self, sample_rate: u32, sink: CaptureSink) -> Result<Box<dyn CaptureStream>, VoiceError>;
}

/// Exclusive owner of the microphone for one active session.
///
/// Dropping the pipeline releases the hardware, so every exit path of the
/// session (user stop, remote close, error, panic unwinding) gives the
/// microphone back.
pub struct CapturePipeline {
    stream: Option<Box<dyn CaptureStream>>,
    sink: FrameSink,
}

impl CapturePipeline {
    /// Acquire the microphone and wire it to `sink`.
    pub fn start(
        device: &dyn CaptureDevice,
        block_size: usize,
        sample_rate: u32,
        sink: FrameSink,
    ) -> Result<Self, VoiceError> {
        let capture_sink = CaptureSink::new(block_size, sample_rate, sink.clone());
        let stream = device.acquire(sample_rate, capture_sink)?;
        tracing::debug!(block_size, sample_rate, "Microphone acquired");

        Ok(Self {
            stream: Some(stream),
            sink,
        })
    }

    /// Invalidate the sink and release the microphone. Idempotent.
    pub fn stop(&mut self) {
        self.sink.invalidate();
        if let Some(mut stream) = self.stream.take() {
            stream.release();
            tracing::debug!("Microphone released");
        }
    }

    pub fn is_running(&self) -> bool {
        self.stream.is_some()
    }
}

impl Drop for CapturePipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    type ReleaseHook = Arc<Mutex<Option<Box<dyn FnMut() + Send>>>>;

    /// Microphone stand-in: tests push samples through `emit` and check
    /// `released` afterwards.
    #[derive(Clone, Default)]
    pub struct MockCaptureDevice {
        pub sink: Arc<Mutex<Option<CaptureSink>>>,
        pub acquired: Arc<AtomicBool>,
        pub released: Arc<AtomicBool>,
        pub fail: bool,
        release_hook: ReleaseHook,
    }

    impl MockCaptureDevice {
        pub fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        pub fn emit(&self, samples: &[f32]) {
            if let Some(sink) = self.sink.lock().unwrap().as_mut() {
                sink.push_samples(samples);
            }
        }

        pub fn was_acquired(&self) -> bool {
            self.acquired.load(Ordering::SeqCst)
        }

        pub fn was_released(&self) -> bool {
            self.released.load(Ordering::SeqCst)
        }

        /// Run `hook` at the moment the microphone is released.
        pub fn on_release(&self, hook: impl FnMut() + Send + 'static) {
            *self.release_hook.lock().unwrap() = Some(Box::new(hook));
        }
    }

    struct MockStream {
        released: Arc<AtomicBool>,
        release_hook: ReleaseHook,
    }

    impl CaptureStream for MockStream {
        fn release(&mut self) {
            if let Some(hook) = self.release_hook.lock().unwrap().as_mut() {
                hook();
            }
            self.released.store(true, Ordering::SeqCst);
        }
    }

    impl CaptureDevice for MockCaptureDevice {
        fn acquire(&self, _sample_rate: u32, sink: CaptureSink) -> Result<Box<dyn CaptureStream>, VoiceError> {
            if self.fail {
                return Err(VoiceError::Capability("microphone permission denied".to_string()));
            }
            *self.sink.lock().unwrap() = Some(sink);
            self.acquired.store(true, Ordering::SeqCst);
            Ok(Box::new(MockStream {
                released: self.released.clone(),
                release_hook: self.release_hook.clone(),
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::MockCaptureDevice;
    use super::*;

    fn sink_with_capacity(capacity: usize) -> (FrameSink, mpsc::Receiver<EncodedChunk>, Arc<VoiceStats>) {
        let (tx, rx) = mpsc::channel(capacity);
        let stats = Arc::new(VoiceStats::default());
        (FrameSink::new(tx, stats.clone()), rx, stats)
    }

    #[test]
    fn test_assembler_emits_fixed_frames() {
        let mut assembler = FrameAssembler::new(4);
        let mut frames = Vec::new();
        assembler.push(&[1.0, 2.0, 3.0], |f| frames.push(f.to_vec()));
        assert!(frames.is_empty());
        assembler.push(&[4.0, 5.0, 6.0, 7.0, 8.0, 9.0], |f| frames.push(f.to_vec()));
        assert_eq!(frames, vec![vec![1.0, 2.0, 3.0, 4.0], vec![5.0, 6.0, 7.0, 8.0]]);
        assert_eq!(assembler.pending_len(), 1);
    }

    #[test]
    fn test_full_queue_drops_instead_of_blocking() {
        let (sink, mut rx, stats) = sink_with_capacity(1);
        assert!(sink.submit(EncodedChunk::from_samples(&[0.0], 16000)));
        assert!(!sink.submit(EncodedChunk::from_samples(&[0.0], 16000)));
        assert_eq!(stats.snapshot().frames_sent, 1);
        assert_eq!(stats.snapshot().frames_dropped, 1);
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn test_invalidated_sink_discards() {
        let (sink, mut rx, _) = sink_with_capacity(4);
        sink.invalidate();
        assert!(!sink.submit(EncodedChunk::from_samples(&[0.0], 16000)));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_pipeline_encodes_and_releases() {
        let (sink, mut rx, _) = sink_with_capacity(4);
        let device = MockCaptureDevice::default();
        let mut pipeline = CapturePipeline::start(&device, 4096, 16000, sink).unwrap();

        device.emit(&vec![0.0; 4096]);
        let chunk = rx.try_recv().unwrap();
        assert_eq!(chunk.data().len(), 8192);
        assert_eq!(chunk.mime_type(), "audio/pcm;rate=16000");

        pipeline.stop();
        assert!(device.was_released());
        assert!(!pipeline.is_running());

        // No frames once stopped
        device.emit(&vec![0.0; 4096]);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_drop_releases_microphone() {
        let (sink, _rx, _) = sink_with_capacity(4);
        let device = MockCaptureDevice::default();
        {
            let _pipeline = CapturePipeline::start(&device, 4096, 16000, sink).unwrap();
        }
        assert!(device.was_released());
    }

    #[test]
    fn test_acquire_failure_is_capability_error() {
        let (sink, _rx, _) = sink_with_capacity(4);
        let device = MockCaptureDevice::failing();
        let result = CapturePipeline::start(&device, 4096, 16000, sink);
        assert!(matches!(result, Err(VoiceError::Capability(_))));
    }
}
