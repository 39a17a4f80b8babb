/// Integration tests for the phrase detector
///
/// Drives the full matcher, state machine and session loop with scripted
/// backends and a recording actuator.

use actuator::{Actuation, ActuatorSink, RecordingActuator};
use async_trait::async_trait;
use audio_capture::{AudioError, CaptureFormat, FrameSource, ReplaySource};
use parking_lot::Mutex;
use phrase_detector::backend::offline::{IncrementalRecognizer, OfflineBackend};
use phrase_detector::{
    score, BackendCoordinator, BackendFactory, BackendKind, BackendMode, BackendOutcome,
    CoordinatorError, DetectionStateMachine, PhraseCatalog, PhraseMonitor, Stage,
    TranscriptionBackend, TranscriptionError, Utterance, UtteranceBoundary,
};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use test_case::test_case;
use tokio_util::sync::CancellationToken;

#[test]
fn test_end_to_end_phrase_in_sentence() {
    let catalog = PhraseCatalog::new(["transfer all funds", "safe account"]).unwrap();
    let machine = DetectionStateMachine::new(&catalog);

    let result = catalog.best_match("please transfer all funds to the safe account");
    let phrase = result.accepted(0.70).expect("phrase should be accepted");
    assert!(catalog.contains(phrase));
    assert!(result.score >= 0.70);

    let event = machine.record(phrase);
    assert_eq!(event.stage, Stage::First);
    assert_eq!(event.phrase, "transfer all funds");
}

#[test_case("SEND MONEY NOW", "send money now" ; "upper case")]
#[test_case("i lost my card.", "i lost my card" ; "trailing period")]
#[test_case("Urgent payment, required!", "urgent payment required" ; "inner comma")]
fn test_transcript_variants_match(text: &str, expected: &str) {
    let result = PhraseCatalog::default_phrases().best_match(text);
    assert_eq!(result.accepted(0.70), Some(expected));
    assert_eq!(score(expected, text), 1.0);
}

/// Backend that replays a fixed list of transcripts, then reports the
/// service as unavailable
struct ScriptedBackend {
    kind: BackendKind,
    texts: VecDeque<&'static str>,
}

#[async_trait]
impl TranscriptionBackend for ScriptedBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    async fn prepare(&mut self) -> Result<(), TranscriptionError> {
        Ok(())
    }

    async fn next_utterance(&mut self) -> BackendOutcome {
        match self.texts.pop_front() {
            Some(text) => BackendOutcome::Transcript(Utterance::new(
                text,
                self.kind,
                UtteranceBoundary::Segment,
            )),
            None => BackendOutcome::Fatal(TranscriptionError::ServiceUnavailable(
                "script exhausted".to_string(),
            )),
        }
    }

    fn reset(&mut self) {}
}

struct ScriptedFactory {
    cloud: Vec<&'static str>,
    offline: Option<Vec<&'static str>>,
}

#[async_trait]
impl BackendFactory for ScriptedFactory {
    async fn create(
        &self,
        kind: BackendKind,
    ) -> Result<Box<dyn TranscriptionBackend>, TranscriptionError> {
        let texts = match kind {
            BackendKind::Cloud => self.cloud.clone(),
            BackendKind::Offline => self.offline.clone().ok_or_else(|| {
                TranscriptionError::Configuration("offline engine not compiled in".to_string())
            })?,
        };

        Ok(Box::new(ScriptedBackend {
            kind,
            texts: texts.into(),
        }))
    }
}

fn monitor_with(actuator: Arc<RecordingActuator>) -> PhraseMonitor {
    PhraseMonitor::new(
        PhraseCatalog::default_phrases(),
        actuator,
        0.70,
        Duration::from_millis(1000),
    )
}

#[tokio::test]
async fn test_session_alerts_then_alarms_across_fallback() {
    let actuator = Arc::new(RecordingActuator::new());
    let monitor = monitor_with(Arc::clone(&actuator));

    let factory = Arc::new(ScriptedFactory {
        cloud: vec!["please send money now"],
        offline: Some(vec!["the weather is nice", "send money now"]),
    });
    let coordinator = BackendCoordinator::new(BackendMode::AutoFallback, factory);

    let result = monitor.run(coordinator, CancellationToken::new()).await;
    assert!(matches!(result, Err(CoordinatorError::BackendUnavailable(_))));

    assert_eq!(
        actuator.actions(),
        vec![
            Actuation::Alert(true),
            Actuation::AlarmPulse(Duration::from_millis(1000)),
            Actuation::Alert(false),
            // safe_off on exit
            Actuation::Alert(false),
        ]
    );
}

#[tokio::test]
async fn test_missing_offline_engine_ends_session_with_configuration_error() {
    let actuator = Arc::new(RecordingActuator::new());
    let monitor = monitor_with(Arc::clone(&actuator));

    let factory = Arc::new(ScriptedFactory {
        cloud: vec!["i forgot my password"],
        offline: None,
    });
    let coordinator = BackendCoordinator::new(BackendMode::AutoFallback, factory);

    let result = monitor.run(coordinator, CancellationToken::new()).await;
    assert!(matches!(result, Err(CoordinatorError::Configuration(_))));
    assert!(!actuator.alert_on());
}

/// Backend that never produces anything
struct StalledBackend;

#[async_trait]
impl TranscriptionBackend for StalledBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Cloud
    }

    async fn prepare(&mut self) -> Result<(), TranscriptionError> {
        Ok(())
    }

    async fn next_utterance(&mut self) -> BackendOutcome {
        std::future::pending().await
    }

    fn reset(&mut self) {}
}

struct StalledFactory;

#[async_trait]
impl BackendFactory for StalledFactory {
    async fn create(
        &self,
        _kind: BackendKind,
    ) -> Result<Box<dyn TranscriptionBackend>, TranscriptionError> {
        Ok(Box::new(StalledBackend))
    }
}

#[tokio::test]
async fn test_cancellation_leaves_actuator_off() {
    let actuator = Arc::new(RecordingActuator::new());
    actuator.set_alert(true).await.unwrap();
    let monitor = monitor_with(Arc::clone(&actuator));

    let coordinator = BackendCoordinator::new(BackendMode::CloudOnly, Arc::new(StalledFactory));
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let summary = monitor.run(coordinator, cancel).await.unwrap();
    assert_eq!(summary.utterances, 0);
    assert!(!actuator.alert_on());
}

#[derive(Clone, Default)]
struct CountingRecognizer {
    pending: Arc<Mutex<String>>,
    resets: Arc<Mutex<usize>>,
}

impl IncrementalRecognizer for CountingRecognizer {
    fn accept(&mut self, _samples: &[i16]) -> Result<bool, TranscriptionError> {
        *self.pending.lock() = "confirm your code".to_string();
        Ok(false)
    }

    fn result(&mut self) -> String {
        std::mem::take(&mut *self.pending.lock())
    }

    fn final_result(&mut self) -> String {
        std::mem::take(&mut *self.pending.lock())
    }

    fn reset(&mut self) {
        *self.resets.lock() += 1;
    }
}

/// Offline backend over a replay source that then stays silent
struct OfflineReplayFactory {
    recognizer: CountingRecognizer,
}

#[async_trait]
impl BackendFactory for OfflineReplayFactory {
    async fn create(
        &self,
        _kind: BackendKind,
    ) -> Result<Box<dyn TranscriptionBackend>, TranscriptionError> {
        let mut source = ReplaySource::new(CaptureFormat::from_millis(16000, 500));
        source.push_constant(500, 2);
        let source: Box<dyn FrameSource> = Box::new(source.hold_open());

        Ok(Box::new(OfflineBackend::new(
            Box::new(self.recognizer.clone()),
            source,
            Duration::from_secs(4),
            Duration::from_millis(500),
        )))
    }
}

#[tokio::test(start_paused = true)]
async fn test_offline_timeout_flush_resets_recognizer() {
    let recognizer = CountingRecognizer::default();
    let factory = Arc::new(OfflineReplayFactory {
        recognizer: recognizer.clone(),
    });
    let mut coordinator = BackendCoordinator::new(BackendMode::OfflineOnly, factory);

    let utterance = coordinator.next_utterance().await.unwrap();
    assert_eq!(utterance.text, "confirm your code");
    assert_eq!(utterance.boundary, UtteranceBoundary::Timeout);
    assert_eq!(*recognizer.resets.lock(), 1);
}

#[tokio::test]
async fn test_closed_device_is_not_a_fallback_trigger() {
    struct DeadMicFactory;

    #[async_trait]
    impl BackendFactory for DeadMicFactory {
        async fn create(
            &self,
            _kind: BackendKind,
        ) -> Result<Box<dyn TranscriptionBackend>, TranscriptionError> {
            Err(AudioError::DeviceNotFound(7).into())
        }
    }

    let mut coordinator = BackendCoordinator::new(BackendMode::AutoFallback, Arc::new(DeadMicFactory));
    assert!(matches!(
        coordinator.next_utterance().await,
        Err(CoordinatorError::Device(AudioError::DeviceNotFound(7)))
    ));
    assert!(!coordinator.has_fallen_back());
}
