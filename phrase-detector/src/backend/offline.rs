//! Offline transcription backend
//!
//! Streams fixed blocks from the microphone into an incremental recognizer.
//! The real engine is Vosk, compiled in with the `vosk` feature; without it
//! the backend can still be driven by any [`IncrementalRecognizer`].

use super::{
    BackendKind, BackendOutcome, RetryReason, TranscriptionBackend, TranscriptionError, Utterance,
    UtteranceBoundary,
};
use async_trait::async_trait;
use audio_capture::{AudioSample, FrameSource};
use std::path::Path;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info};

/// A streaming speech recognizer
pub trait IncrementalRecognizer: Send {
    /// Feed one block; `true` when it completed an utterance
    fn accept(&mut self, samples: &[AudioSample]) -> Result<bool, TranscriptionError>;

    /// Text of the utterance just completed
    fn result(&mut self) -> String;

    /// Flush whatever is pending as final text
    fn final_result(&mut self) -> String;

    /// Forget all pending state
    fn reset(&mut self);
}

pub struct OfflineBackend {
    recognizer: Box<dyn IncrementalRecognizer>,
    source: Box<dyn FrameSource>,
    window: Duration,
    warmup: Duration,
}

impl OfflineBackend {
    pub fn new(
        recognizer: Box<dyn IncrementalRecognizer>,
        source: Box<dyn FrameSource>,
        window: Duration,
        warmup: Duration,
    ) -> Self {
        Self {
            recognizer,
            source,
            window,
            warmup,
        }
    }
}

#[async_trait]
impl TranscriptionBackend for OfflineBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Offline
    }

    async fn prepare(&mut self) -> Result<(), TranscriptionError> {
        info!("Letting the input settle for {} ms", self.warmup.as_millis());
        tokio::time::sleep(self.warmup).await;
        Ok(())
    }

    async fn next_utterance(&mut self) -> BackendOutcome {
        loop {
            match timeout(self.window, self.source.next_frame()).await {
                Ok(Ok(frame)) => match self.recognizer.accept(&frame.samples) {
                    Ok(true) => {
                        let text = self.recognizer.result();
                        if !text.is_empty() {
                            return BackendOutcome::Transcript(Utterance::new(
                                text,
                                BackendKind::Offline,
                                UtteranceBoundary::Finalized,
                            ));
                        }
                    }
                    Ok(false) => {}
                    Err(e) => return BackendOutcome::Fatal(e),
                },
                Ok(Err(e)) => return BackendOutcome::Fatal(e.into()),
                Err(_) => {
                    debug!("No audio for {} ms, flushing recognizer", self.window.as_millis());
                    let text = self.recognizer.final_result();
                    return if text.is_empty() {
                        BackendOutcome::Retryable(RetryReason::SilentWindow)
                    } else {
                        BackendOutcome::Transcript(Utterance::new(
                            text,
                            BackendKind::Offline,
                            UtteranceBoundary::Timeout,
                        ))
                    };
                }
            }
        }
    }

    fn reset(&mut self) {
        self.recognizer.reset();
    }
}

/// Fail early with `ModelLoad` before the microphone is opened
pub fn check_model_path(path: &Path) -> Result<(), TranscriptionError> {
    if path.is_dir() {
        Ok(())
    } else {
        Err(TranscriptionError::ModelLoad(format!(
            "model directory not found: {}",
            path.display()
        )))
    }
}

#[cfg(feature = "vosk")]
mod engine {
    use super::*;
    use tracing::warn;
    use vosk::{DecodingState, Model, Recognizer};

    pub struct VoskRecognizer {
        recognizer: Recognizer,
        _model: Model,
    }

    impl VoskRecognizer {
        pub fn load(model_path: &Path, sample_rate: u32) -> Result<Self, TranscriptionError> {
            info!("Loading Vosk model from {}", model_path.display());

            let path = model_path.to_str().ok_or_else(|| {
                TranscriptionError::ModelLoad(format!("non UTF-8 path: {}", model_path.display()))
            })?;

            let model = Model::new(path).ok_or_else(|| {
                TranscriptionError::ModelLoad(format!("could not load {}", model_path.display()))
            })?;

            let mut recognizer = Recognizer::new(&model, sample_rate as f32).ok_or_else(|| {
                TranscriptionError::ModelLoad(format!(
                    "could not create recognizer at {} Hz",
                    sample_rate
                ))
            })?;
            recognizer.set_words(true);

            info!("Vosk model loaded (sample_rate={})", sample_rate);

            Ok(Self {
                recognizer,
                _model: model,
            })
        }
    }

    impl IncrementalRecognizer for VoskRecognizer {
        fn accept(&mut self, samples: &[AudioSample]) -> Result<bool, TranscriptionError> {
            match self.recognizer.accept_waveform(samples) {
                Ok(DecodingState::Finalized) => Ok(true),
                Ok(DecodingState::Running) => Ok(false),
                Ok(DecodingState::Failed) => Err(TranscriptionError::Recognition(
                    "decoding failed".to_string(),
                )),
                Err(e) => {
                    warn!("Vosk rejected waveform: {:?}", e);
                    Err(TranscriptionError::Recognition(format!("{e:?}")))
                }
            }
        }

        fn result(&mut self) -> String {
            self.recognizer
                .result()
                .single()
                .map(|r| r.text.trim().to_string())
                .unwrap_or_default()
        }

        fn final_result(&mut self) -> String {
            self.recognizer
                .final_result()
                .single()
                .map(|r| r.text.trim().to_string())
                .unwrap_or_default()
        }

        fn reset(&mut self) {
            self.recognizer.reset();
        }
    }
}

#[cfg(feature = "vosk")]
pub use engine::VoskRecognizer;

/// Load the compiled-in engine for the model at `model_path`
#[cfg(feature = "vosk")]
pub fn load_recognizer(
    model_path: &Path,
    sample_rate: u32,
) -> Result<Box<dyn IncrementalRecognizer>, TranscriptionError> {
    Ok(Box::new(VoskRecognizer::load(model_path, sample_rate)?))
}

#[cfg(not(feature = "vosk"))]
pub fn load_recognizer(
    _model_path: &Path,
    _sample_rate: u32,
) -> Result<Box<dyn IncrementalRecognizer>, TranscriptionError> {
    Err(TranscriptionError::Configuration(
        "offline engine not compiled in; rebuild with --features vosk".to_string(),
    ))
}
