//! Two-stage detection state machine
//!
//! Each phrase moves `Idle -> First -> Second` and drops back to idle after
//! the second hit. Counts for all phrases share one lock.

use crate::matcher::PhraseCatalog;
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// First hit; the alert output goes on
    First,

    /// Second hit; the alarm fires and the count resets
    Second,

    /// Count went past two; logged only
    Repeat,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectionEvent {
    pub phrase: String,
    /// Count after this hit, before any reset
    pub count: u32,
    pub stage: Stage,
    /// Whether any phrase is still waiting for its second hit
    pub alert_active: bool,
}

pub struct DetectionStateMachine {
    counts: Mutex<HashMap<String, u32>>,
}

impl DetectionStateMachine {
    /// Start every catalog phrase at zero
    pub fn new(catalog: &PhraseCatalog) -> Self {
        let counts = catalog.phrases().map(|p| (p.to_string(), 0)).collect();
        Self {
            counts: Mutex::new(counts),
        }
    }

    /// Register an accepted match for `phrase`
    pub fn record(&self, phrase: &str) -> DetectionEvent {
        let mut counts = self.counts.lock();

        let count = {
            let entry = counts.entry(phrase.to_string()).or_insert(0);
            *entry += 1;
            *entry
        };

        let stage = match count {
            1 => Stage::First,
            2 => {
                counts.insert(phrase.to_string(), 0);
                Stage::Second
            }
            _ => {
                warn!("Phrase {:?} reached count {}", phrase, count);
                Stage::Repeat
            }
        };

        let alert_active = counts.values().any(|&c| c == 1);

        DetectionEvent {
            phrase: phrase.to_string(),
            count,
            stage,
            alert_active,
        }
    }

    pub fn count(&self, phrase: &str) -> u32 {
        self.counts.lock().get(phrase).copied().unwrap_or(0)
    }

    pub fn snapshot(&self) -> HashMap<String, u32> {
        self.counts.lock().clone()
    }

    pub fn reset_all(&self) {
        for count in self.counts.lock().values_mut() {
            *count = 0;
        }
    }
}
