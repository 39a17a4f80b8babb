//! Frame assembly for the capture callback
//!
//! Hosts deliver callback buffers of arbitrary length. `AudioBuffer` keeps
//! the samples in a ring and releases them again in frames of one fixed
//! size, oldest first.

use cache_padded::CachePadded;
use parking_lot::Mutex;
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::HeapRb;
use thiserror::Error;
use tracing::{trace, warn};

/// Audio sample format (16-bit PCM)
pub type AudioSample = i16;

/// Preferred capture sample rate
pub const SAMPLE_RATE: u32 = 16000;

/// Frames of headroom between the callback and the frame channel
pub const DEFAULT_FRAME_DEPTH: usize = 4;

#[derive(Error, Debug)]
pub enum AudioBufferError {
    #[error("Frame size must be non-zero")]
    ZeroFrameSize,

    #[error("Ring of {capacity} samples cannot hold a {frame_size}-sample frame")]
    TooSmall { capacity: usize, frame_size: usize },
}

type Ring = HeapRb<AudioSample>;

pub struct AudioBuffer {
    producer: CachePadded<Mutex<<Ring as Split>::Prod>>,
    consumer: CachePadded<Mutex<<Ring as Split>::Cons>>,
    frame_size: usize,
    overwritten: u64,
}

impl AudioBuffer {
    /// Ring sized for `depth` frames of `frame_size` samples
    pub fn for_frames(frame_size: usize, depth: usize) -> Result<Self, AudioBufferError> {
        if frame_size == 0 {
            return Err(AudioBufferError::ZeroFrameSize);
        }

        let capacity = frame_size.saturating_mul(depth.max(1));
        Self::with_capacity(capacity, frame_size)
    }

    pub fn with_capacity(capacity: usize, frame_size: usize) -> Result<Self, AudioBufferError> {
        if frame_size == 0 {
            return Err(AudioBufferError::ZeroFrameSize);
        }
        if capacity < frame_size {
            return Err(AudioBufferError::TooSmall {
                capacity,
                frame_size,
            });
        }

        trace!(
            "Frame ring: {} samples, {}-sample frames",
            capacity,
            frame_size
        );
        let (producer, consumer) = Ring::new(capacity).split();

        Ok(Self {
            producer: CachePadded::new(Mutex::new(producer)),
            consumer: CachePadded::new(Mutex::new(consumer)),
            frame_size,
            overwritten: 0,
        })
    }

    /// Append samples; when the ring is full the oldest samples give way
    pub fn write(&mut self, samples: &[AudioSample]) {
        let mut producer = self.producer.lock();
        let capacity = producer.capacity().get();

        let samples = match samples.len().checked_sub(capacity) {
            Some(excess) if excess > 0 => {
                self.overwritten += excess as u64;
                &samples[excess..]
            }
            _ => samples,
        };

        let vacant = producer.vacant_len();
        if samples.len() > vacant {
            let skipped = self.consumer.lock().skip(samples.len() - vacant);
            self.overwritten += skipped as u64;
            warn!("Frame ring full, discarded {} oldest samples", skipped);
        }

        producer.push_slice(samples);
    }

    /// Next complete frame, if one is buffered
    pub fn pop_frame(&mut self) -> Option<Vec<AudioSample>> {
        let mut consumer = self.consumer.lock();
        if consumer.occupied_len() < self.frame_size {
            return None;
        }

        let mut frame = vec![0; self.frame_size];
        consumer.pop_slice(&mut frame);
        Some(frame)
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Samples waiting, including any partial frame
    pub fn len(&self) -> usize {
        self.consumer.lock().occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.consumer.lock().capacity().get()
    }

    /// Samples lost to overflow since creation
    pub fn overwritten(&self) -> u64 {
        self.overwritten
    }

    pub fn clear(&mut self) {
        let mut consumer = self.consumer.lock();
        let occupied = consumer.occupied_len();
        consumer.skip(occupied);
    }
}
