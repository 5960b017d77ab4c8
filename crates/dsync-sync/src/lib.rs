//! # dsync-sync
//!
//! Host trust, synchronization targets and the orchestration engine of
//! DirSync SFTP. File transfer itself is delegated to an external executor
//! process; this crate builds its invocations and interprets the outcome.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | **error** | `SyncError` / `SyncErrorKind` |
//! | **types** | Targets, run state, events, cycle reports |
//! | **keys** | Preference keys, file names and defaults |
//! | **events** | Broadcast event bus mirrored into `log` |
//! | **known_hosts** | Persisted `host:port` → fingerprint records |
//! | **trust** | Trust-on-first-use verification and the `TrustPrompt` seam |
//! | **targets** | Validated, encrypted-at-rest target registry |
//! | **executor** | `SyncExecutor` trait and the subprocess implementation |
//! | **scanner** | Fingerprint-only executor runs |
//! | **orchestrator** | Run-state machine, sync cycle, onboarding, scheduler |
//! | **tools** | Executor binary discovery |

pub mod sync;
