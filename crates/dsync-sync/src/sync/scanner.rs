// ── Fingerprint scanner ──────────────────────────────────────────────────────

use crate::sync::events::EventBus;
use crate::sync::executor::SyncExecutor;
use crate::sync::known_hosts::endpoint_key;
use crate::sync::types::ScanRequest;
use log::debug;
use std::sync::Arc;
use tokio::sync::watch;

/// Asks the executor for an endpoint's current host-key fingerprint.
pub struct FingerprintScanner {
    executor: Arc<dyn SyncExecutor>,
    events: EventBus,
    shutdown: watch::Receiver<bool>,
}

impl FingerprintScanner {
    pub fn new(executor: Arc<dyn SyncExecutor>, events: EventBus, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            executor,
            events,
            shutdown,
        }
    }

    /// Current fingerprint of `host:port`, or `None` when none was produced.
    ///
    /// Diagnostic output on stderr is surfaced as a warning but does not by
    /// itself fail the scan. Spawn failures and shutdown yield `None`.
    pub async fn scan(&self, host: &str, port: u16) -> Option<String> {
        let endpoint = endpoint_key(host, port);
        debug!("Scanning fingerprint of {}", endpoint);
        let request = ScanRequest {
            host: host.to_string(),
            port,
        };
        let output = match self
            .executor
            .scan_fingerprint(&request, self.shutdown.clone())
            .await
        {
            Ok(output) => output,
            Err(e) => {
                self.events
                    .error(format!("Fingerprint scan of {} failed: {}", endpoint, e.message));
                return None;
            }
        };

        let stderr = output.stderr.trim();
        if !stderr.is_empty() {
            self.events
                .warn(format!("Fingerprint scan of {} reported: {}", endpoint, stderr));
        }
        let fingerprint = output.fingerprint();
        if fingerprint.is_none() {
            self.events.error(format!(
                "Fingerprint scan of {} produced no fingerprint (exit code {:?})",
                endpoint, output.exit_code
            ));
        }
        fingerprint
    }
}
