//! Phrase detector library
//!
//! Listens for spoken fraud-indicator phrases. Speech is transcribed by a
//! cloud service or a local Vosk model, fuzzily matched against a phrase
//! catalog and fed through a two-stage detection state machine that drives
//! the alert and alarm outputs.

pub mod backend;
pub mod config;
pub mod coordinator;
pub mod detection;
pub mod matcher;
pub mod normalize;
pub mod scorer;
pub mod session;

// Re-export main types
pub use backend::{
    BackendFactory, BackendKind, BackendOutcome, DeviceBackendFactory, RetryReason,
    TranscriptionBackend, TranscriptionError, Utterance, UtteranceBoundary,
};
pub use config::{CloudSettings, ConfigError, DetectorConfig, OfflineSettings};
pub use coordinator::{BackendCoordinator, BackendMode, CoordinatorError};
pub use detection::{DetectionEvent, DetectionStateMachine, Stage};
pub use matcher::{CatalogError, MatchResult, PhraseCatalog, DEFAULT_PHRASES};
pub use normalize::normalize;
pub use scorer::score;
pub use session::{PhraseMonitor, SessionSummary};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
