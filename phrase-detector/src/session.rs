//! Recognition session loop
//!
//! Pulls utterances from the coordinator, matches them against the catalog
//! and drives the actuator from detection events until cancelled.

use crate::backend::Utterance;
use crate::coordinator::{BackendCoordinator, CoordinatorError};
use crate::detection::{DetectionEvent, DetectionStateMachine, Stage};
use crate::matcher::PhraseCatalog;
use actuator::ActuatorSink;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Counters reported when a session ends
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionSummary {
    pub utterances: u64,
    pub matches: u64,
    pub first_hits: u64,
    pub second_hits: u64,
}

impl SessionSummary {
    fn record(&mut self, event: Option<&DetectionEvent>) {
        self.utterances += 1;
        if let Some(event) = event {
            self.matches += 1;
            match event.stage {
                Stage::First => self.first_hits += 1,
                Stage::Second => self.second_hits += 1,
                Stage::Repeat => {}
            }
        }
    }
}

pub struct PhraseMonitor {
    catalog: PhraseCatalog,
    machine: Arc<DetectionStateMachine>,
    actuator: Arc<dyn ActuatorSink>,
    threshold: f64,
    alarm_pulse: Duration,
}

impl PhraseMonitor {
    pub fn new(
        catalog: PhraseCatalog,
        actuator: Arc<dyn ActuatorSink>,
        threshold: f64,
        alarm_pulse: Duration,
    ) -> Self {
        let machine = Arc::new(DetectionStateMachine::new(&catalog));
        Self {
            catalog,
            machine,
            actuator,
            threshold,
            alarm_pulse,
        }
    }

    pub fn detections(&self) -> Arc<DetectionStateMachine> {
        Arc::clone(&self.machine)
    }

    /// Match one utterance and act on the result
    ///
    /// Actuator failures are logged; they never stop recognition.
    pub async fn handle_utterance(&self, utterance: &Utterance) -> Option<DetectionEvent> {
        info!("Recognized ({}): {}", utterance.backend, utterance.text);

        let result = self.catalog.best_match(&utterance.text);
        let Some(phrase) = result.accepted(self.threshold) else {
            info!(
                "No match (best={:?}, score={:.2}, threshold={:.2})",
                result.matched_phrase, result.score, self.threshold
            );
            return None;
        };

        info!("Match: \"{}\" (score={:.2})", phrase, result.score);
        let event = self.machine.record(phrase);

        match event.stage {
            Stage::First => {
                info!("FIRST DETECTED: \"{}\"", event.phrase);
                if let Err(e) = self.actuator.set_alert(true).await {
                    error!("Failed to raise alert: {}", e);
                }
            }
            Stage::Second => {
                info!("SECOND DETECTED: \"{}\"", event.phrase);
                if let Err(e) = self.actuator.pulse_alarm(self.alarm_pulse).await {
                    error!("Failed to pulse alarm: {}", e);
                }
                if let Err(e) = self.actuator.set_alert(event.alert_active).await {
                    error!("Failed to update alert: {}", e);
                }
            }
            Stage::Repeat => {
                info!("Detected \"{}\" ({} times)", event.phrase, event.count);
            }
        }

        Some(event)
    }

    /// Run until cancelled or the coordinator gives up
    ///
    /// The actuator is returned to its safe state on every exit path.
    pub async fn run(
        &self,
        mut coordinator: BackendCoordinator,
        cancel: CancellationToken,
    ) -> Result<SessionSummary, CoordinatorError> {
        let mut summary = SessionSummary::default();
        info!(
            "Listening for {} phrases (mode={}, threshold={:.2})",
            self.catalog.len(),
            coordinator.mode(),
            self.threshold
        );

        let outcome = loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    info!("Recognition cancelled");
                    break Ok(());
                }
                next = coordinator.next_utterance() => match next {
                    Ok(utterance) => {
                        let event = self.handle_utterance(&utterance).await;
                        summary.record(event.as_ref());
                    }
                    Err(e) => break Err(e),
                },
            }
        };

        if let Err(e) = self.actuator.safe_off().await {
            error!("Failed to reset actuator: {}", e);
        }
        self.machine.reset_all();

        info!(
            "Session ended: {} utterances, {} matches, {} first, {} second",
            summary.utterances, summary.matches, summary.first_hits, summary.second_hits
        );

        outcome.map(|()| summary)
    }
}
