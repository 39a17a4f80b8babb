//! Frame sources
//!
//! `FrameSource` is the seam between capture and analysis. The microphone
//! implementation lives in [`crate::capture`]; [`ReplaySource`] serves
//! pre-recorded or synthetic frames.

use crate::audio_buffer::{AudioBufferError, AudioSample, SAMPLE_RATE};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Audio device error: {0}")]
    Device(String),

    #[error("No input device at index {0}")]
    DeviceNotFound(usize),

    #[error("No default input device available")]
    NoDefaultDevice,

    #[error("Unsupported sample format: {0}")]
    UnsupportedFormat(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Audio stream closed")]
    StreamClosed,

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error("Frame buffer error: {0}")]
    Buffer(#[from] AudioBufferError),
}

/// Shape of the frames a source produces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureFormat {
    pub sample_rate: u32,
    pub frame_size: usize,
}

impl CaptureFormat {
    pub fn new(sample_rate: u32, frame_size: usize) -> Self {
        Self {
            sample_rate,
            frame_size,
        }
    }

    /// Format for frames of `frame_ms` milliseconds at `sample_rate`
    pub fn from_millis(sample_rate: u32, frame_ms: u32) -> Self {
        let frame_size = (sample_rate as u64 * frame_ms as u64 / 1000) as usize;
        Self::new(sample_rate, frame_size.max(1))
    }

    /// Wall-clock span of one frame
    pub fn frame_duration(&self) -> Duration {
        Duration::from_nanos(self.frame_size as u64 * 1_000_000_000 / self.sample_rate.max(1) as u64)
    }

    /// Whole frames that fit in `span`
    pub fn frames_in(&self, span: Duration) -> usize {
        (span.as_secs_f64() * self.sample_rate as f64 / self.frame_size as f64) as usize
    }
}

impl Default for CaptureFormat {
    fn default() -> Self {
        // 30ms at 16kHz
        Self::from_millis(SAMPLE_RATE, 30)
    }
}

/// One fixed-size block of mono audio
#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub samples: Vec<AudioSample>,
    pub captured_at: Instant,
}

impl AudioFrame {
    pub fn new(samples: Vec<AudioSample>) -> Self {
        Self {
            samples,
            captured_at: Instant::now(),
        }
    }

    pub fn at(samples: Vec<AudioSample>, captured_at: Instant) -> Self {
        Self {
            samples,
            captured_at,
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Anything that yields audio frames one at a time
#[async_trait]
pub trait FrameSource: Send {
    fn format(&self) -> CaptureFormat;

    /// Wait for the next frame. `AudioError::StreamClosed` ends the stream.
    async fn next_frame(&mut self) -> Result<AudioFrame, AudioError>;

    /// Frames discarded because the consumer fell behind
    fn frames_dropped(&self) -> u64 {
        0
    }
}

/// Serves a fixed list of frames, stamped at real-time spacing
pub struct ReplaySource {
    format: CaptureFormat,
    frames: VecDeque<AudioFrame>,
    next_at: Instant,
    hold_open: bool,
}

impl ReplaySource {
    pub fn new(format: CaptureFormat) -> Self {
        Self::starting_at(format, Instant::now())
    }

    /// Stamp the first frame at `start`, each later one a frame duration apart
    pub fn starting_at(format: CaptureFormat, start: Instant) -> Self {
        Self {
            format,
            frames: VecDeque::new(),
            next_at: start,
            hold_open: false,
        }
    }

    /// Split `samples` into frames; a trailing partial frame is dropped
    pub fn from_samples(format: CaptureFormat, samples: &[AudioSample]) -> Self {
        let mut source = Self::new(format);
        source.push_samples(samples);
        source
    }

    pub fn push_samples(&mut self, samples: &[AudioSample]) {
        for chunk in samples.chunks_exact(self.format.frame_size) {
            self.push_frame(chunk.to_vec());
        }
    }

    pub fn push_frame(&mut self, samples: Vec<AudioSample>) {
        let frame = AudioFrame::at(samples, self.next_at);
        self.next_at += self.format.frame_duration();
        self.frames.push_back(frame);
    }

    /// Append `count` frames holding the same constant sample value
    pub fn push_constant(&mut self, value: AudioSample, count: usize) {
        for _ in 0..count {
            self.push_frame(vec![value; self.format.frame_size]);
        }
    }

    /// Once exhausted, wait forever instead of reporting `StreamClosed`
    pub fn hold_open(mut self) -> Self {
        self.hold_open = true;
        self
    }

    pub fn remaining(&self) -> usize {
        self.frames.len()
    }
}

#[async_trait]
impl FrameSource for ReplaySource {
    fn format(&self) -> CaptureFormat {
        self.format
    }

    async fn next_frame(&mut self) -> Result<AudioFrame, AudioError> {
        match self.frames.pop_front() {
            Some(frame) => Ok(frame),
            None if self.hold_open => {
                std::future::pending::<()>().await;
                Err(AudioError::StreamClosed)
            }
            None => Err(AudioError::StreamClosed),
        }
    }
}
