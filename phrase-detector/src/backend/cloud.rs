//! Cloud transcription backend
//!
//! Calibrates once, then records one bounded speech segment per call and
//! submits it to a [`SpeechService`]. The default service is the Google
//! Cloud Speech-to-Text `speech:recognize` REST method.

use super::{
    BackendKind, BackendOutcome, RetryReason, TranscriptionBackend, TranscriptionError, Utterance,
    UtteranceBoundary,
};
use crate::config::CloudSettings;
use async_trait::async_trait;
use audio_capture::{
    rms_dbfs, AmbientCalibrator, AudioError, AudioSample, CalibrationConfig, FrameSource,
};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum SpeechError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Service returned {status}: {body}")]
    Status { status: u16, body: String },
}

/// Speech-to-text over the network
///
/// `Ok(None)` means the service heard nothing it could transcribe.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SpeechService: Send + Sync {
    async fn recognize(&self, pcm: &[AudioSample], sample_rate: u32) -> Result<Option<String>, SpeechError>;
}

#[derive(Debug, Deserialize, Default)]
struct RecognizeResponse {
    #[serde(default)]
    results: Vec<RecognitionResult>,
}

#[derive(Debug, Deserialize)]
struct RecognitionResult {
    #[serde(default)]
    alternatives: Vec<RecognitionAlternative>,
}

#[derive(Debug, Deserialize)]
struct RecognitionAlternative {
    #[serde(default)]
    transcript: String,
}

impl RecognizeResponse {
    /// Top alternative of each result, in order
    fn transcript(&self) -> Option<String> {
        let text = self
            .results
            .iter()
            .filter_map(|r| r.alternatives.first())
            .map(|a| a.transcript.trim())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(" ");

        (!text.is_empty()).then_some(text)
    }
}

/// Client for `speech:recognize`
pub struct GoogleSpeechClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    language: String,
}

impl GoogleSpeechClient {
    pub fn new(settings: &CloudSettings) -> Result<Self, TranscriptionError> {
        let api_key = settings
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                TranscriptionError::Configuration("no API key for the cloud service".to_string())
            })?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs_f32(settings.request_timeout_secs))
            .build()
            .map_err(|e| TranscriptionError::Configuration(e.to_string()))?;

        Ok(Self {
            http,
            endpoint: settings.endpoint.clone(),
            api_key,
            language: settings.language.clone(),
        })
    }

    fn request_body(&self, pcm: &[AudioSample], sample_rate: u32) -> serde_json::Value {
        let bytes: Vec<u8> = pcm.iter().flat_map(|s| s.to_le_bytes()).collect();

        json!({
            "config": {
                "encoding": "LINEAR16",
                "sampleRateHertz": sample_rate,
                "languageCode": self.language,
            },
            "audio": {
                "content": BASE64.encode(bytes),
            },
        })
    }
}

#[async_trait]
impl SpeechService for GoogleSpeechClient {
    async fn recognize(&self, pcm: &[AudioSample], sample_rate: u32) -> Result<Option<String>, SpeechError> {
        let response = self
            .http
            .post(&self.endpoint)
            .query(&[("key", self.api_key.as_str())])
            .json(&self.request_body(pcm, sample_rate))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status.as_u16(), response.text().await));
        }

        let parsed: RecognizeResponse = response.json().await?;
        Ok(parsed.transcript())
    }
}

/// Error for a non-success reply; an unreadable body is logged, not fatal
fn status_error<E: std::fmt::Display>(status: u16, body: Result<String, E>) -> SpeechError {
    let body = match body {
        Ok(body) => body,
        Err(e) => {
            warn!("Could not read body of {} response: {}", status, e);
            String::new()
        }
    };

    SpeechError::Status { status, body }
}

/// Bounds on one recorded segment
#[derive(Debug, Clone, Copy)]
pub struct SegmentSettings {
    /// Added to the ambient median to get the speech onset level
    pub onset_margin_db: f32,

    /// Longest segment recorded
    pub max_window: Duration,

    /// Trailing quiet that ends a segment early
    pub pause: Duration,
}

impl Default for SegmentSettings {
    fn default() -> Self {
        Self {
            onset_margin_db: 3.5,
            max_window: Duration::from_secs(4),
            pause: Duration::from_millis(800),
        }
    }
}

/// Wait for a frame above `onset_dbfs`, then record until the window is
/// full or `settings.pause` of trailing quiet has passed
pub async fn record_segment(
    source: &mut dyn FrameSource,
    onset_dbfs: f32,
    settings: &SegmentSettings,
) -> Result<Vec<AudioSample>, AudioError> {
    let frame_duration = source.format().frame_duration();
    let mut samples = Vec::new();
    let mut recorded = Duration::ZERO;
    let mut quiet = Duration::ZERO;
    let mut started = false;

    loop {
        let frame = source.next_frame().await?;
        let loud = rms_dbfs(&frame.samples) > onset_dbfs;

        if !started {
            if !loud {
                continue;
            }
            started = true;
            debug!("Speech onset detected");
        }

        samples.extend_from_slice(&frame.samples);
        recorded += frame_duration;
        quiet = if loud { Duration::ZERO } else { quiet + frame_duration };

        if quiet >= settings.pause || recorded >= settings.max_window {
            break;
        }
    }

    debug!(
        "Recorded segment of {} ms ({} ms trailing quiet)",
        recorded.as_millis(),
        quiet.as_millis()
    );

    Ok(samples)
}

pub struct CloudBackend {
    service: Box<dyn SpeechService>,
    source: Box<dyn FrameSource>,
    settings: SegmentSettings,
    calibration: CalibrationConfig,
    onset_dbfs: Option<f32>,
}

impl CloudBackend {
    pub fn new(
        service: Box<dyn SpeechService>,
        source: Box<dyn FrameSource>,
        settings: SegmentSettings,
        calibration: CalibrationConfig,
    ) -> Self {
        Self {
            service,
            source,
            settings,
            calibration,
            onset_dbfs: None,
        }
    }

    /// Onset level in use, once calibrated
    pub fn onset_dbfs(&self) -> Option<f32> {
        self.onset_dbfs
    }
}

#[async_trait]
impl TranscriptionBackend for CloudBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Cloud
    }

    async fn prepare(&mut self) -> Result<(), TranscriptionError> {
        let calibrator = AmbientCalibrator::new(self.calibration.clone())?;
        let result = calibrator.calibrate(self.source.as_mut()).await?;

        let onset = result.ambient_median_dbfs + self.settings.onset_margin_db;
        info!("Calibration complete, speech onset at {:.1} dBFS", onset);
        self.onset_dbfs = Some(onset);

        Ok(())
    }

    async fn next_utterance(&mut self) -> BackendOutcome {
        let onset = match self.onset_dbfs {
            Some(onset) => onset,
            None => {
                return BackendOutcome::Fatal(TranscriptionError::Configuration(
                    "cloud backend used before calibration".to_string(),
                ))
            }
        };

        debug!("Listening (cloud)...");
        let pcm = match record_segment(self.source.as_mut(), onset, &self.settings).await {
            Ok(pcm) => pcm,
            Err(e) => return BackendOutcome::Fatal(e.into()),
        };

        let sample_rate = self.source.format().sample_rate;
        match self.service.recognize(&pcm, sample_rate).await {
            Ok(Some(text)) => BackendOutcome::Transcript(Utterance::new(
                text,
                BackendKind::Cloud,
                UtteranceBoundary::Segment,
            )),
            Ok(None) => BackendOutcome::Retryable(RetryReason::Unintelligible),
            Err(e) => {
                warn!("Cloud recognition failed: {}", e);
                BackendOutcome::Fatal(TranscriptionError::ServiceUnavailable(e.to_string()))
            }
        }
    }

    fn reset(&mut self) {
        // Segments are independent; nothing carries over between calls
    }
}
