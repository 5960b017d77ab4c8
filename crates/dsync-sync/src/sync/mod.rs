// ── dsync-sync / sync module ─────────────────────────────────────────────────
//
// Everything between the preference store and the external executor:
//   • Known-hosts records and the trust verification protocol
//   • The synchronization target registry and its invariants
//   • Executor invocation (scan + synchronize) over a trait seam
//   • The orchestrator state machine and periodic scheduler

pub mod error;
pub mod types;
pub mod keys;
pub mod events;
pub mod known_hosts;
pub mod trust;
pub mod targets;
pub mod executor;
pub mod scanner;
pub mod orchestrator;
pub mod tools;

pub use error::*;
pub use types::*;
pub use events::EventBus;
pub use known_hosts::{endpoint_key, KnownHosts};
pub use trust::{RejectingPrompt, TrustPrompt, TrustVerifier};
pub use targets::TargetRegistry;
pub use executor::{OutputSink, ProcessExecutor, SyncExecutor};
pub use scanner::FingerprintScanner;
pub use orchestrator::{OrchestratorConfig, StateGuard, SyncOrchestrator};
