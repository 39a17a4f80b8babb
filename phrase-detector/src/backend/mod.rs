//! Transcription backends
//!
//! A backend turns live audio into [`Utterance`]s one at a time. Each call
//! reports a [`BackendOutcome`] so the coordinator can tell a missed word
//! from a dead service without string matching on errors.

pub mod cloud;
pub mod offline;

use crate::config::DetectorConfig;
use async_trait::async_trait;
use audio_capture::{AudioError, CaptureConfig, FrameSource, MicrophoneSource};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::info;

pub use cloud::{CloudBackend, GoogleSpeechClient, SegmentSettings, SpeechError, SpeechService};
pub use offline::{IncrementalRecognizer, OfflineBackend};

#[derive(Error, Debug)]
pub enum TranscriptionError {
    #[error("Transcription service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Failed to load acoustic model: {0}")]
    ModelLoad(String),

    #[error("Recognizer failure: {0}")]
    Recognition(String),

    #[error("Backend misconfigured: {0}")]
    Configuration(String),

    #[error("Audio device error: {0}")]
    Device(#[from] AudioError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Cloud,
    Offline,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Cloud => write!(f, "cloud"),
            BackendKind::Offline => write!(f, "offline"),
        }
    }
}

/// Why a backend closed an utterance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UtteranceBoundary {
    /// One recorded segment submitted to the cloud service
    Segment,

    /// The offline recognizer finalized on its own
    Finalized,

    /// No audio arrived within the window; the partial text was flushed
    Timeout,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    pub text: String,
    /// Wall-clock time the utterance was closed, microseconds since the epoch
    pub timestamp_micros: u64,
    pub backend: BackendKind,
    pub boundary: UtteranceBoundary,
}

impl Utterance {
    pub fn new(text: impl Into<String>, backend: BackendKind, boundary: UtteranceBoundary) -> Self {
        Self {
            text: text.into(),
            timestamp_micros: now_micros(),
            backend,
            boundary,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryReason {
    /// Audio was captured but nothing intelligible came back
    Unintelligible,

    /// A timeout flush found no pending text
    SilentWindow,
}

#[derive(Debug)]
pub enum BackendOutcome {
    Transcript(Utterance),
    Retryable(RetryReason),
    Fatal(TranscriptionError),
}

#[async_trait]
pub trait TranscriptionBackend: Send {
    fn kind(&self) -> BackendKind;

    /// One-time setup after the device is open (calibration, warm-up)
    async fn prepare(&mut self) -> Result<(), TranscriptionError>;

    async fn next_utterance(&mut self) -> BackendOutcome;

    /// Drop any partially recognized state
    fn reset(&mut self);
}

/// Builds backends on demand, so the offline engine is only loaded if needed
#[async_trait]
pub trait BackendFactory: Send + Sync {
    async fn create(
        &self,
        kind: BackendKind,
    ) -> Result<Box<dyn TranscriptionBackend>, TranscriptionError>;
}

/// Opens the microphone and the configured engine for each backend
pub struct DeviceBackendFactory {
    config: DetectorConfig,
}

impl DeviceBackendFactory {
    pub fn new(config: DetectorConfig) -> Self {
        Self { config }
    }

    async fn open_microphone(&self, frame_ms: u32) -> Result<Box<dyn FrameSource>, TranscriptionError> {
        let capture = CaptureConfig {
            device_index: self.config.device_index,
            frame_ms,
            ..Default::default()
        };

        let source = tokio::task::spawn_blocking(move || MicrophoneSource::open(capture))
            .await
            .map_err(|e| AudioError::Device(format!("capture setup task failed: {e}")))??;

        Ok(Box::new(source))
    }
}

#[async_trait]
impl BackendFactory for DeviceBackendFactory {
    async fn create(
        &self,
        kind: BackendKind,
    ) -> Result<Box<dyn TranscriptionBackend>, TranscriptionError> {
        info!("Starting {} backend", kind);

        match kind {
            BackendKind::Cloud => {
                let client = GoogleSpeechClient::new(&self.config.cloud)?;
                let source = self.open_microphone(self.config.frame_ms).await?;

                Ok(Box::new(CloudBackend::new(
                    Box::new(client),
                    source,
                    self.config.segment_settings(),
                    self.config.calibration(),
                )))
            }
            BackendKind::Offline => {
                let offline = &self.config.offline;
                offline::check_model_path(&offline.model_path)?;

                let block_ms = offline.block_millis();
                let source = self.open_microphone(block_ms).await?;
                let recognizer =
                    offline::load_recognizer(&offline.model_path, source.format().sample_rate)?;

                Ok(Box::new(OfflineBackend::new(
                    recognizer,
                    source,
                    self.config.utterance_window(),
                    offline.warmup(),
                )))
            }
        }
    }
}

fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utterance_is_timestamped() {
        let utterance = Utterance::new("send money now", BackendKind::Cloud, UtteranceBoundary::Segment);
        assert!(utterance.timestamp_micros > 0);
        assert_eq!(utterance.backend, BackendKind::Cloud);
    }

    #[test]
    fn test_device_error_converts() {
        let err: TranscriptionError = AudioError::StreamClosed.into();
        assert!(matches!(err, TranscriptionError::Device(AudioError::StreamClosed)));
    }

    #[test]
    fn test_backend_kind_display() {
        assert_eq!(BackendKind::Cloud.to_string(), "cloud");
        assert_eq!(BackendKind::Offline.to_string(), "offline");
    }
}
