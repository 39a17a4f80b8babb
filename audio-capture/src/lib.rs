//! Audio capture library for SafePhrase
//!
//! Provides microphone capture into fixed-size frames, a dBFS loudness
//! measure and ambient-noise calibration shared by the phrase detector
//! and the silence monitor.

pub mod audio_buffer;
pub mod calibrator;
pub mod capture;
pub mod loudness;
pub mod source;
pub mod wav;

// Re-export main types
pub use audio_buffer::{AudioBuffer, AudioBufferError, AudioSample, DEFAULT_FRAME_DEPTH, SAMPLE_RATE};
pub use calibrator::{AmbientCalibrator, CalibrationConfig, CalibrationResult, MAX_CALIBRATION_SECS};
pub use capture::{list_input_devices, CaptureConfig, InputDeviceInfo, MicrophoneSource};
pub use loudness::{rms_dbfs, DBFS_FLOOR};
pub use source::{AudioError, AudioFrame, CaptureFormat, FrameSource, ReplaySource};
pub use wav::{read_wav, write_wav};
