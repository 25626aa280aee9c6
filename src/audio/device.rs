//! # Audio Hardware
//!
//! Binds the capture pipeline and the playback scheduler to real hardware.
//!
//! The portable pieces (mono mixdown, rate conversion, the playback timeline
//! the output callback reads from) are always compiled. The `cpal` bindings
//! live behind the `device` feature; without it `default_devices()` hands out
//! `UnavailableDevice`, and starting a session fails with a capability error.
//!
//! ## Threading:
//! `cpal::Stream` is not `Send` on every platform, so each stream is built,
//! played and dropped on a dedicated thread. The session only holds a handle
//! that tells that thread to stop.

use crate::audio::capture::{CaptureDevice, CaptureSink, CaptureStream};
use crate::audio::playback::{AudioOutput, OutputDevice};
use crate::error::VoiceError;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;

/// Average interleaved frames down to one channel.
pub fn downmix_to_mono(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Streaming linear-interpolation sample rate converter.
///
/// Keeps the last input sample between calls so consecutive blocks join
/// without a seam.
#[derive(Debug, Clone)]
pub struct RateConverter {
    step: f64,
    position: f64,
    last: Option<f32>,
}

impl RateConverter {
    pub fn new(from_rate: u32, to_rate: u32) -> Self {
        Self {
            step: from_rate.max(1) as f64 / to_rate.max(1) as f64,
            position: 0.0,
            last: None,
        }
    }

    pub fn is_identity(&self) -> bool {
        self.step == 1.0
    }

    pub fn process(&mut self, input: &[f32]) -> Vec<f32> {
        if self.is_identity() {
            return input.to_vec();
        }

        let mut source = Vec::with_capacity(input.len() + 1);
        source.extend(self.last);
        source.extend_from_slice(input);

        let mut out = Vec::with_capacity((input.len() as f64 / self.step) as usize + 1);
        while self.position + 1.0 < source.len() as f64 {
            let index = self.position.floor() as usize;
            let frac = (self.position - index as f64) as f32;
            out.push(source[index] + (source[index + 1] - source[index]) * frac);
            self.position += self.step;
        }

        // The last source sample becomes index 0 of the next call
        if let Some(&last) = source.last() {
            self.position -= (source.len() - 1) as f64;
            self.last = Some(last);
        }
        out
    }
}

/// Convert a whole buffer in one go.
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    let mut converter = RateConverter::new(from_rate, to_rate);
    let mut out = converter.process(samples);
    // Linear interpolation stops one sample short; hold the tail
    if !converter.is_identity() {
        if let Some(&last) = samples.last() {
            let expected = (samples.len() as f64 * to_rate as f64 / from_rate.max(1) as f64).round() as usize;
            out.resize(expected.max(out.len()), last);
        }
    }
    out
}

/// Mono audio placed at absolute frame positions on the output clock.
///
/// Overlapping fragments are summed.
#[derive(Debug)]
pub struct PlaybackTimeline {
    sample_rate: u32,
    fragments: VecDeque<(u64, Vec<f32>)>,
}

impl PlaybackTimeline {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            fragments: VecDeque::new(),
        }
    }

    /// Place `samples` (already at the timeline rate) starting at `start_at` seconds.
    pub fn insert(&mut self, start_at: f64, samples: Vec<f32>) {
        let start = (start_at.max(0.0) * self.sample_rate as f64).round() as u64;
        self.fragments.push_back((start, samples));
    }

    /// Fill `out` with the audio for frames `first_frame..first_frame + out.len()`
    /// and forget fragments that have finished.
    pub fn render(&mut self, first_frame: u64, out: &mut [f32]) {
        out.fill(0.0);
        let end_frame = first_frame + out.len() as u64;

        for (start, samples) in &self.fragments {
            let fragment_end = start + samples.len() as u64;
            if fragment_end <= first_frame || *start >= end_frame {
                continue;
            }
            let from = first_frame.max(*start);
            let to = end_frame.min(fragment_end);
            for frame in from..to {
                out[(frame - first_frame) as usize] += samples[(frame - start) as usize];
            }
        }

        self.fragments
            .retain(|(start, samples)| start + samples.len() as u64 > end_frame);
    }

    pub fn pending(&self) -> usize {
        self.fragments.len()
    }
}

/// What the host can offer, for the health endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceSummary {
    pub backend: &'static str,
    pub input: Option<String>,
    pub output: Option<String>,
}

/// Stand-in used when the crate is built without hardware support.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableDevice;

const NO_HARDWARE: &str = "built without audio hardware support (enable the `device` feature)";

impl CaptureDevice for UnavailableDevice {
    fn acquire(&self, _sample_rate: u32, _sink: CaptureSink) -> Result<Box<dyn CaptureStream>, VoiceError> {
        Err(VoiceError::Capability(NO_HARDWARE.to_string()))
    }
}

impl OutputDevice for UnavailableDevice {
    fn open(&self, _sample_rate: u32) -> Result<Box<dyn AudioOutput>, VoiceError> {
        Err(VoiceError::Capability(NO_HARDWARE.to_string()))
    }
}

/// Microphone and speaker for this build.
#[cfg(feature = "device")]
pub fn default_devices() -> (Arc<dyn CaptureDevice>, Arc<dyn OutputDevice>) {
    (Arc::new(hardware::CpalCaptureDevice), Arc::new(hardware::CpalOutputDevice))
}

/// Microphone and speaker for this build.
#[cfg(not(feature = "device"))]
pub fn default_devices() -> (Arc<dyn CaptureDevice>, Arc<dyn OutputDevice>) {
    (Arc::new(UnavailableDevice), Arc::new(UnavailableDevice))
}

#[cfg(feature = "device")]
pub fn describe_devices() -> DeviceSummary {
    hardware::describe()
}

#[cfg(not(feature = "device"))]
pub fn describe_devices() -> DeviceSummary {
    DeviceSummary {
        backend: "none",
        input: None,
        output: None,
    }
}

#[cfg(feature = "device")]
mod hardware {
    use super::*;
    use crate::audio::codec::PlaybackBuffer;
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::{mpsc, Mutex};
    use std::thread;
    use tracing::{error, info};

    /// A cpal stream kept alive on its own thread until `shutdown`.
    struct StreamThread {
        stop_tx: Option<mpsc::Sender<()>>,
        handle: Option<thread::JoinHandle<()>>,
    }

    impl StreamThread {
        fn spawn<F>(name: &str, build: F) -> Result<Self, VoiceError>
        where
            F: FnOnce() -> Result<cpal::Stream, VoiceError> + Send + 'static,
        {
            let (ready_tx, ready_rx) = mpsc::channel::<Result<(), VoiceError>>();
            let (stop_tx, stop_rx) = mpsc::channel::<()>();

            let handle = thread::Builder::new()
                .name(name.to_string())
                .spawn(move || {
                    let started = build().and_then(|stream| {
                        stream
                            .play()
                            .map_err(|e| VoiceError::Capability(format!("failed to start stream: {}", e)))?;
                        Ok(stream)
                    });
                    let stream = match started {
                        Ok(stream) => {
                            let _ = ready_tx.send(Ok(()));
                            stream
                        }
                        Err(e) => {
                            let _ = ready_tx.send(Err(e));
                            return;
                        }
                    };
                    // Returns on stop or when the owner is dropped
                    let _ = stop_rx.recv();
                    drop(stream);
                })
                .map_err(|e| VoiceError::Capability(format!("failed to spawn audio thread: {}", e)))?;

            match ready_rx.recv() {
                Ok(Ok(())) => Ok(Self {
                    stop_tx: Some(stop_tx),
                    handle: Some(handle),
                }),
                Ok(Err(e)) => {
                    let _ = handle.join();
                    Err(e)
                }
                Err(_) => {
                    let _ = handle.join();
                    Err(VoiceError::Capability("audio thread exited during setup".to_string()))
                }
            }
        }

        fn shutdown(&mut self) {
            if let Some(stop_tx) = self.stop_tx.take() {
                let _ = stop_tx.send(());
            }
            if let Some(handle) = self.handle.take() {
                let _ = handle.join();
            }
        }
    }

    impl Drop for StreamThread {
        fn drop(&mut self) {
            self.shutdown();
        }
    }

    pub struct CpalCaptureDevice;

    struct CpalCaptureStream {
        thread: StreamThread,
    }

    impl CaptureStream for CpalCaptureStream {
        fn release(&mut self) {
            self.thread.shutdown();
        }
    }

    impl CaptureDevice for CpalCaptureDevice {
        fn acquire(&self, sample_rate: u32, mut sink: CaptureSink) -> Result<Box<dyn CaptureStream>, VoiceError> {
            let thread = StreamThread::spawn("voice-capture", move || {
                let host = cpal::default_host();
                let device = host
                    .default_input_device()
                    .ok_or_else(|| VoiceError::Capability("no default microphone".to_string()))?;
                let config = device
                    .default_input_config()
                    .map_err(|e| VoiceError::Capability(format!("microphone has no usable config: {}", e)))?
                    .config();

                info!(
                    device = %device.name().unwrap_or_default(),
                    device_rate = config.sample_rate.0,
                    channels = config.channels,
                    sample_rate,
                    "Opening microphone"
                );

                let channels = config.channels as usize;
                let mut converter = RateConverter::new(config.sample_rate.0, sample_rate);
                device
                    .build_input_stream(
                        &config,
                        move |data: &[f32], _: &cpal::InputCallbackInfo| {
                            let mono = downmix_to_mono(data, channels);
                            sink.push_samples(&converter.process(&mono));
                        },
                        |err| error!(error = %err, "Microphone stream error"),
                        None,
                    )
                    .map_err(|e| VoiceError::Capability(format!("failed to open microphone: {}", e)))
            })?;

            Ok(Box::new(CpalCaptureStream { thread }))
        }
    }

    pub struct CpalOutputDevice;

    struct CpalOutput {
        device_rate: u32,
        frames_played: Arc<AtomicU64>,
        timeline: Arc<Mutex<PlaybackTimeline>>,
        _thread: StreamThread,
    }

    impl AudioOutput for CpalOutput {
        fn current_time(&self) -> f64 {
            self.frames_played.load(Ordering::Acquire) as f64 / self.device_rate as f64
        }

        fn schedule(&mut self, buffer: PlaybackBuffer, start_at: f64) {
            let samples = resample(&buffer.samples, buffer.sample_rate, self.device_rate);
            if let Ok(mut timeline) = self.timeline.lock() {
                timeline.insert(start_at, samples);
            }
        }
    }

    impl OutputDevice for CpalOutputDevice {
        fn open(&self, sample_rate: u32) -> Result<Box<dyn AudioOutput>, VoiceError> {
            let host = cpal::default_host();
            let device = host
                .default_output_device()
                .ok_or_else(|| VoiceError::Capability("no default speaker".to_string()))?;
            let config = device
                .default_output_config()
                .map_err(|e| VoiceError::Capability(format!("speaker has no usable config: {}", e)))?
                .config();
            let device_rate = config.sample_rate.0;

            info!(
                device = %device.name().unwrap_or_default(),
                device_rate,
                sample_rate,
                "Opening speaker"
            );

            let frames_played = Arc::new(AtomicU64::new(0));
            let timeline = Arc::new(Mutex::new(PlaybackTimeline::new(device_rate)));

            let clock = frames_played.clone();
            let source = timeline.clone();
            let thread = StreamThread::spawn("voice-playback", move || {
                let host = cpal::default_host();
                let device = host
                    .default_output_device()
                    .ok_or_else(|| VoiceError::Capability("no default speaker".to_string()))?;
                let channels = config.channels as usize;
                let mut mono = Vec::new();

                device
                    .build_output_stream(
                        &config,
                        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                            let frames = data.len() / channels.max(1);
                            mono.resize(frames, 0.0);
                            let first = clock.load(Ordering::Acquire);

                            // Never wait on the session thread; a contended lock is one silent block
                            match source.try_lock() {
                                Ok(mut timeline) => timeline.render(first, &mut mono),
                                Err(_) => mono.fill(0.0),
                            }

                            for (frame, sample) in data.chunks_mut(channels.max(1)).zip(&mono) {
                                frame.fill(*sample);
                            }
                            clock.fetch_add(frames as u64, Ordering::Release);
                        },
                        |err| error!(error = %err, "Speaker stream error"),
                        None,
                    )
                    .map_err(|e| VoiceError::Capability(format!("failed to open speaker: {}", e)))
            })?;

            Ok(Box::new(CpalOutput {
                device_rate,
                frames_played,
                timeline,
                _thread: thread,
            }))
        }
    }

    pub fn describe() -> DeviceSummary {
        let host = cpal::default_host();
        DeviceSummary {
            backend: "cpal",
            input: host.default_input_device().and_then(|d| d.name().ok()),
            output: host.default_output_device().and_then(|d| d.name().ok()),
        }
    }
}
