//! Backend selection and the cloud-to-offline fallback
//!
//! The coordinator owns the active backend and turns its outcomes into a
//! plain sequence of utterances. In auto mode a cloud failure switches to the
//! offline backend once for the rest of the session.

use crate::backend::{
    BackendFactory, BackendKind, BackendOutcome, RetryReason, TranscriptionBackend,
    TranscriptionError, Utterance, UtteranceBoundary,
};
use audio_capture::AudioError;
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("No transcription backend available: {0}")]
    BackendUnavailable(String),

    #[error("Audio device error: {0}")]
    Device(#[source] AudioError),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackendMode {
    #[serde(rename = "cloud", alias = "google")]
    CloudOnly,

    #[serde(rename = "offline", alias = "vosk")]
    OfflineOnly,

    /// Cloud first, offline after the first cloud failure
    #[default]
    #[serde(rename = "auto")]
    AutoFallback,
}

impl fmt::Display for BackendMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendMode::CloudOnly => write!(f, "cloud"),
            BackendMode::OfflineOnly => write!(f, "offline"),
            BackendMode::AutoFallback => write!(f, "auto"),
        }
    }
}

impl FromStr for BackendMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cloud" | "google" => Ok(BackendMode::CloudOnly),
            "offline" | "vosk" => Ok(BackendMode::OfflineOnly),
            "auto" => Ok(BackendMode::AutoFallback),
            other => Err(format!(
                "unknown mode {other:?}, expected cloud, offline or auto"
            )),
        }
    }
}

pub struct BackendCoordinator {
    mode: BackendMode,
    factory: Arc<dyn BackendFactory>,
    active: Option<Box<dyn TranscriptionBackend>>,
    fallen_back: bool,
}

impl BackendCoordinator {
    pub fn new(mode: BackendMode, factory: Arc<dyn BackendFactory>) -> Self {
        Self {
            mode,
            factory,
            active: None,
            fallen_back: false,
        }
    }

    pub fn mode(&self) -> BackendMode {
        self.mode
    }

    /// Whether the one permitted cloud-to-offline switch has happened
    pub fn has_fallen_back(&self) -> bool {
        self.fallen_back
    }

    fn current_kind(&self) -> BackendKind {
        match self.mode {
            BackendMode::CloudOnly => BackendKind::Cloud,
            BackendMode::OfflineOnly => BackendKind::Offline,
            BackendMode::AutoFallback if self.fallen_back => BackendKind::Offline,
            BackendMode::AutoFallback => BackendKind::Cloud,
        }
    }

    /// Next recognized utterance
    ///
    /// Retryable outcomes are logged and skipped. An error ends the session;
    /// calling again afterwards starts the current backend afresh.
    pub async fn next_utterance(&mut self) -> Result<Utterance, CoordinatorError> {
        loop {
            let kind = self.current_kind();

            if self.active.is_none() {
                match Self::start(&self.factory, kind).await {
                    Ok(backend) => self.active = Some(backend),
                    Err(e) => {
                        self.handle_failure(kind, e)?;
                        continue;
                    }
                }
            }

            let Some(backend) = self.active.as_mut() else {
                continue;
            };

            match backend.next_utterance().await {
                BackendOutcome::Transcript(utterance) => {
                    if utterance.boundary == UtteranceBoundary::Timeout {
                        backend.reset();
                    }
                    return Ok(utterance);
                }
                BackendOutcome::Retryable(RetryReason::Unintelligible) => {
                    info!("Could not understand audio ({})", kind);
                }
                BackendOutcome::Retryable(RetryReason::SilentWindow) => {
                    debug!("Silent window ({}), resetting recognizer", kind);
                    backend.reset();
                }
                BackendOutcome::Fatal(e) => {
                    self.active = None;
                    self.handle_failure(kind, e)?;
                }
            }
        }
    }

    async fn start(
        factory: &Arc<dyn BackendFactory>,
        kind: BackendKind,
    ) -> Result<Box<dyn TranscriptionBackend>, TranscriptionError> {
        let mut backend = factory.create(kind).await?;
        backend.prepare().await?;
        info!("Using {} backend", kind);
        Ok(backend)
    }

    /// `Ok` means carry on with the (possibly switched) backend
    fn handle_failure(
        &mut self,
        kind: BackendKind,
        err: TranscriptionError,
    ) -> Result<(), CoordinatorError> {
        match (kind, err) {
            (_, TranscriptionError::Device(e)) => {
                error!("{} backend lost the audio device: {}", kind, e);
                Err(CoordinatorError::Device(e))
            }
            (
                BackendKind::Cloud,
                e @ (TranscriptionError::ServiceUnavailable(_)
                | TranscriptionError::Configuration(_)),
            ) if self.mode == BackendMode::AutoFallback && !self.fallen_back => {
                warn!("Cloud backend failed ({}), falling back to offline", e);
                self.fallen_back = true;
                Ok(())
            }
            (
                BackendKind::Offline,
                e @ (TranscriptionError::ModelLoad(_) | TranscriptionError::Configuration(_)),
            ) => {
                error!("Offline backend unavailable: {}", e);
                Err(CoordinatorError::Configuration(e.to_string()))
            }
            (_, TranscriptionError::Configuration(msg)) => {
                error!("{} backend misconfigured: {}", kind, msg);
                Err(CoordinatorError::Configuration(msg))
            }
            (_, e) => {
                error!("{} backend failed: {}", kind, e);
                Err(CoordinatorError::BackendUnavailable(e.to_string()))
            }
        }
    }

    /// Utterances as a stream that ends after the first error
    pub fn into_stream(self) -> impl Stream<Item = Result<Utterance, CoordinatorError>> + Send {
        stream::unfold(Some(self), |state| async move {
            let mut coordinator = state?;
            match coordinator.next_utterance().await {
                Ok(utterance) => Some((Ok(utterance), Some(coordinator))),
                Err(e) => Some((Err(e), None)),
            }
        })
    }
}
