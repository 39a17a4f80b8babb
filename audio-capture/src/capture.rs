//! Microphone capture via cpal
//!
//! The cpal stream lives on a dedicated `audio-capture` thread for as long
//! as the [`MicrophoneSource`] exists. The input callback downmixes to mono,
//! converts to i16, reassembles fixed-size frames in an [`AudioBuffer`] and
//! pushes them into a bounded channel with `try_send`.
//!
//! Overflow policy is drop-newest: when the channel is full the frame that
//! was just assembled is discarded and counted. A stale frame already in the
//! queue is harmless to the analysis loops, unbounded growth is not.

use crate::audio_buffer::{AudioBuffer, AudioSample, DEFAULT_FRAME_DEPTH, SAMPLE_RATE};
use crate::source::{AudioError, AudioFrame, CaptureFormat, FrameSource};
use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Capture configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Index into the host's input devices; `None` selects the default device
    pub device_index: Option<usize>,

    /// Requested sample rate; the device default is used if unsupported
    pub sample_rate: u32,

    /// Frame length in milliseconds
    pub frame_ms: u32,

    /// Frames buffered between the callback and the consumer
    pub queue_capacity: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device_index: None,
            sample_rate: SAMPLE_RATE,
            frame_ms: 30,
            queue_capacity: 256,
        }
    }
}

impl CaptureConfig {
    pub fn validate(&self) -> Result<(), AudioError> {
        if self.sample_rate == 0 {
            return Err(AudioError::InvalidConfig(
                "sample_rate must be greater than 0".to_string(),
            ));
        }

        if self.frame_ms == 0 {
            return Err(AudioError::InvalidConfig(
                "frame_ms must be greater than 0".to_string(),
            ));
        }

        if self.queue_capacity == 0 {
            return Err(AudioError::InvalidConfig(
                "queue_capacity must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

/// Description of one input device, for `--list-devices`
#[derive(Debug, Clone)]
pub struct InputDeviceInfo {
    pub index: usize,
    pub name: String,
    pub default_sample_rate: Option<u32>,
    pub channels: Option<u16>,
}

/// Enumerate the host's input devices in index order
pub fn list_input_devices() -> Result<Vec<InputDeviceInfo>, AudioError> {
    let host = cpal::default_host();
    let devices = host
        .input_devices()
        .map_err(|e| AudioError::Device(e.to_string()))?;

    Ok(devices
        .enumerate()
        .map(|(index, device)| {
            let default_config = device.default_input_config().ok();
            InputDeviceInfo {
                index,
                name: device.name().unwrap_or_else(|_| "<unknown>".to_string()),
                default_sample_rate: default_config.as_ref().map(|c| c.sample_rate().0),
                channels: default_config.as_ref().map(|c| c.channels()),
            }
        })
        .collect())
}

fn select_device(host: &cpal::Host, index: Option<usize>) -> Result<cpal::Device, AudioError> {
    match index {
        Some(index) => host
            .input_devices()
            .map_err(|e| AudioError::Device(e.to_string()))?
            .nth(index)
            .ok_or(AudioError::DeviceNotFound(index)),
        None => host.default_input_device().ok_or(AudioError::NoDefaultDevice),
    }
}

/// Prefer the requested rate with the fewest channels, else the device default
fn select_stream_config(
    device: &cpal::Device,
    sample_rate: u32,
) -> Result<cpal::SupportedStreamConfig, AudioError> {
    let wanted = cpal::SampleRate(sample_rate);

    let matching = device
        .supported_input_configs()
        .map_err(|e| AudioError::Device(e.to_string()))?
        .filter(|c| c.min_sample_rate() <= wanted && c.max_sample_rate() >= wanted)
        .min_by_key(|c| c.channels());

    if let Some(range) = matching {
        return Ok(range.with_sample_rate(wanted));
    }

    let fallback = device
        .default_input_config()
        .map_err(|e| AudioError::Device(e.to_string()))?;
    warn!(
        "Device does not support {} Hz, using default {} Hz",
        sample_rate,
        fallback.sample_rate().0
    );
    Ok(fallback)
}

/// Callback-side state: reassembles frames and feeds the channel
struct FrameSink {
    buffer: AudioBuffer,
    tx: mpsc::Sender<AudioFrame>,
    dropped: Arc<AtomicU64>,
    mono: Vec<AudioSample>,
}

impl FrameSink {
    fn new(
        format: CaptureFormat,
        tx: mpsc::Sender<AudioFrame>,
        dropped: Arc<AtomicU64>,
    ) -> Result<Self, AudioError> {
        Ok(Self {
            buffer: AudioBuffer::for_frames(format.frame_size, DEFAULT_FRAME_DEPTH)?,
            tx,
            dropped,
            mono: Vec::with_capacity(format.frame_size),
        })
    }

    /// Keep the first channel of each interleaved frame
    fn push_interleaved<T>(&mut self, data: &[T], channels: usize)
    where
        T: Sample,
        AudioSample: FromSample<T>,
    {
        let mut mono = std::mem::take(&mut self.mono);
        mono.clear();
        mono.extend(
            data.chunks(channels.max(1))
                .map(|frame| <AudioSample as Sample>::from_sample(frame[0])),
        );
        self.push(&mono);
        self.mono = mono;
    }

    /// Returns the number of frames delivered to the channel
    fn push(&mut self, samples: &[AudioSample]) -> usize {
        let mut delivered = 0;

        // Drain frame by frame so large host buffers never wrap the ring
        for chunk in samples.chunks(self.buffer.frame_size()) {
            self.buffer.write(chunk);

            while let Some(frame) = self.buffer.pop_frame() {
                match self.tx.try_send(AudioFrame::new(frame)) {
                    Ok(()) => delivered += 1,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                        if dropped == 1 || dropped % 100 == 0 {
                            warn!("Frame queue full, {} frames dropped so far", dropped);
                        }
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => return delivered,
                }
            }
        }

        delivered
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut sink: FrameSink,
) -> Result<cpal::Stream, AudioError>
where
    T: SizedSample,
    AudioSample: FromSample<T>,
{
    let channels = config.channels as usize;

    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                sink.push_interleaved(data, channels);
            },
            |err| {
                error!(error = %err, "audio capture error");
            },
            None,
        )
        .map_err(|e| AudioError::Device(e.to_string()))
}

/// Opens the device and starts the stream; runs on the capture thread
fn start_stream(
    config: &CaptureConfig,
    tx: mpsc::Sender<AudioFrame>,
    dropped: Arc<AtomicU64>,
) -> Result<(cpal::Stream, CaptureFormat), AudioError> {
    let host = cpal::default_host();
    let device = select_device(&host, config.device_index)?;
    let supported = select_stream_config(&device, config.sample_rate)?;

    let stream_config: cpal::StreamConfig = supported.config();
    let format = CaptureFormat::from_millis(stream_config.sample_rate.0, config.frame_ms);
    let sink = FrameSink::new(format, tx, dropped)?;

    info!(
        device = device.name().unwrap_or_default(),
        sample_rate = format.sample_rate,
        channels = stream_config.channels,
        frame_size = format.frame_size,
        "Opening audio input"
    );

    let stream = match supported.sample_format() {
        SampleFormat::I16 => build_stream::<i16>(&device, &stream_config, sink)?,
        SampleFormat::U16 => build_stream::<u16>(&device, &stream_config, sink)?,
        SampleFormat::I32 => build_stream::<i32>(&device, &stream_config, sink)?,
        SampleFormat::F32 => build_stream::<f32>(&device, &stream_config, sink)?,
        other => return Err(AudioError::UnsupportedFormat(format!("{other:?}"))),
    };

    stream
        .play()
        .map_err(|e| AudioError::Device(format!("failed to start audio stream: {e}")))?;

    Ok((stream, format))
}

/// Live microphone frames
pub struct MicrophoneSource {
    format: CaptureFormat,
    frames: mpsc::Receiver<AudioFrame>,
    stop: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
    worker: Option<JoinHandle<()>>,
}

impl MicrophoneSource {
    /// Open the configured device and start capturing
    pub fn open(config: CaptureConfig) -> Result<Self, AudioError> {
        config.validate()?;

        let (tx, frames) = mpsc::channel(config.queue_capacity);
        let (ready_tx, ready_rx) = std::sync::mpsc::sync_channel(1);
        let stop = Arc::new(AtomicBool::new(false));
        let dropped = Arc::new(AtomicU64::new(0));

        let worker_stop = Arc::clone(&stop);
        let worker_dropped = Arc::clone(&dropped);
        let worker = thread::Builder::new()
            .name("audio-capture".into())
            .spawn(move || {
                let stream = match start_stream(&config, tx, worker_dropped) {
                    Ok((stream, format)) => {
                        let _ = ready_tx.send(Ok(format));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                while !worker_stop.load(Ordering::Acquire) {
                    thread::park_timeout(Duration::from_millis(50));
                }

                drop(stream);
                debug!("Audio input released");
            })
            .map_err(|e| AudioError::Device(format!("failed to spawn capture thread: {e}")))?;

        let format = ready_rx
            .recv()
            .map_err(|_| AudioError::Device("capture thread exited during startup".to_string()))??;

        Ok(Self {
            format,
            frames,
            stop,
            dropped,
            worker: Some(worker),
        })
    }

    /// Stop the stream and release the device
    pub fn close(&mut self) {
        self.stop.store(true, Ordering::Release);
        self.frames.close();

        if let Some(worker) = self.worker.take() {
            worker.thread().unpark();
            if worker.join().is_err() {
                error!("Audio capture thread panicked");
            }
        }
    }
}

impl Drop for MicrophoneSource {
    fn drop(&mut self) {
        self.close();
    }
}

#[async_trait]
impl FrameSource for MicrophoneSource {
    fn format(&self) -> CaptureFormat {
        self.format
    }

    async fn next_frame(&mut self) -> Result<AudioFrame, AudioError> {
        self.frames.recv().await.ok_or(AudioError::StreamClosed)
    }

    fn frames_dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sink(frame_size: usize, capacity: usize) -> (FrameSink, mpsc::Receiver<AudioFrame>, Arc<AtomicU64>) {
        let (tx, rx) = mpsc::channel(capacity);
        let dropped = Arc::new(AtomicU64::new(0));
        let format = CaptureFormat::new(SAMPLE_RATE, frame_size);
        (FrameSink::new(format, tx, Arc::clone(&dropped)).unwrap(), rx, dropped)
    }

    #[test]
    fn test_config_validation() {
        assert!(CaptureConfig::default().validate().is_ok());

        let config = CaptureConfig {
            frame_ms: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = CaptureConfig {
            queue_capacity: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_sink_emits_fixed_frames() {
        let (mut sink, mut rx, _) = sink(480, 8);

        assert_eq!(sink.push(&[1; 300]), 0);
        assert_eq!(sink.push(&[1; 700]), 2);

        let frame = rx.try_recv().unwrap();
        assert_eq!(frame.len(), 480);
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_sink_drops_newest_when_queue_full() {
        let (mut sink, mut rx, dropped) = sink(4, 2);

        sink.push(&[1, 1, 1, 1]);
        sink.push(&[2, 2, 2, 2]);
        sink.push(&[3, 3, 3, 3]);
        sink.push(&[4, 4, 4, 4]);

        assert_eq!(dropped.load(Ordering::Relaxed), 2);
        // The oldest frames survive, the newest were discarded
        assert_eq!(rx.try_recv().unwrap().samples, vec![1, 1, 1, 1]);
        assert_eq!(rx.try_recv().unwrap().samples, vec![2, 2, 2, 2]);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_large_host_buffer_is_not_truncated() {
        let (mut sink, mut rx, dropped) = sink(480, 64);

        let samples: Vec<i16> = (0..4800).map(|i| (i / 480) as i16).collect();
        assert_eq!(sink.push(&samples), 10);
        assert_eq!(dropped.load(Ordering::Relaxed), 0);

        for expected in 0..10 {
            assert_eq!(rx.try_recv().unwrap().samples[0], expected);
        }
    }

    #[test]
    fn test_interleaved_stereo_keeps_first_channel() {
        let (mut sink, mut rx, _) = sink(3, 4);

        sink.push_interleaved(&[10i16, -10, 20, -20, 30, -30], 2);
        assert_eq!(rx.try_recv().unwrap().samples, vec![10, 20, 30]);
    }

    #[test]
    fn test_float_samples_converted_to_i16() {
        let (mut sink, mut rx, _) = sink(2, 4);

        sink.push_interleaved(&[0.5f32, -0.5], 1);
        let frame = rx.try_recv().unwrap();
        assert!((frame.samples[0] - 16384).abs() <= 1);
        assert!((frame.samples[1] + 16384).abs() <= 1);
    }
}
