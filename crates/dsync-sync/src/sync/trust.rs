//! Trust-on-first-use host verification.
//!
//! A fingerprint is recorded only after the operator accepts it, and a
//! changed fingerprint replaces the stored one only after the operator
//! accepts the change. Every other path fails closed and writes nothing.

use crate::sync::error::*;
use crate::sync::executor::wait_for_shutdown;
use crate::sync::known_hosts::{endpoint_key, KnownHosts};
use crate::sync::scanner::FingerprintScanner;
use crate::sync::types::TrustDecision;
use async_trait::async_trait;
use log::{info, warn};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;

/// Human decision point for unknown and changed fingerprints.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TrustPrompt: Send + Sync {
    /// First contact with `endpoint`.
    async fn confirm_new(&self, endpoint: &str, fingerprint: &str) -> TrustDecision;

    /// `endpoint` presents `scanned` although `stored` was accepted earlier.
    async fn confirm_changed(&self, endpoint: &str, stored: &str, scanned: &str) -> TrustDecision;
}

/// Prompt for unattended runs: every question is answered with `Reject`.
#[derive(Debug, Default, Clone, Copy)]
pub struct RejectingPrompt;

#[async_trait]
impl TrustPrompt for RejectingPrompt {
    async fn confirm_new(&self, endpoint: &str, fingerprint: &str) -> TrustDecision {
        warn!(
            "No operator available to trust {} ({}); rejecting",
            endpoint, fingerprint
        );
        TrustDecision::Reject
    }

    async fn confirm_changed(&self, endpoint: &str, _stored: &str, scanned: &str) -> TrustDecision {
        warn!(
            "No operator available to confirm the changed key of {} ({}); rejecting",
            endpoint, scanned
        );
        TrustDecision::Reject
    }
}

pub struct TrustVerifier {
    known_hosts: Arc<KnownHosts>,
    scanner: Arc<FingerprintScanner>,
    prompt: Arc<dyn TrustPrompt>,
    shutdown: watch::Receiver<bool>,
}

impl TrustVerifier {
    /// A pending question is abandoned as soon as `shutdown` carries `true`.
    pub fn new(
        known_hosts: Arc<KnownHosts>,
        scanner: Arc<FingerprintScanner>,
        prompt: Arc<dyn TrustPrompt>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            known_hosts,
            scanner,
            prompt,
            shutdown,
        }
    }

    /// Wait for the operator's answer unless shutdown comes first.
    async fn ask(
        &self,
        endpoint: &str,
        question: impl Future<Output = TrustDecision>,
    ) -> SyncResult<TrustDecision> {
        let mut shutdown = self.shutdown.clone();
        tokio::select! {
            decision = question => Ok(decision),
            _ = wait_for_shutdown(&mut shutdown) => {
                info!("Trust question for {} abandoned by shutdown", endpoint);
                Err(SyncError::cancelled(format!(
                    "Shutdown while verifying {}",
                    endpoint
                )))
            }
        }
    }

    /// Scan `host:port` and check the result against the registry.
    /// Returns the trusted fingerprint.
    pub async fn verify(&self, host: &str, port: u16) -> SyncResult<String> {
        let endpoint = endpoint_key(host, port);
        let scanned = self.scanner.scan(host, port).await.ok_or_else(|| {
            SyncError::scan_failed(format!("Could not obtain the fingerprint of {}", endpoint))
        })?;
        self.verify_scanned(host, port, &scanned).await
    }

    /// Registry check for a fingerprint that was already scanned.
    pub async fn verify_scanned(&self, host: &str, port: u16, scanned: &str) -> SyncResult<String> {
        let endpoint = endpoint_key(host, port);
        if scanned.trim().is_empty() {
            return Err(SyncError::scan_failed(format!(
                "Empty fingerprint for {}",
                endpoint
            )));
        }

        match self.known_hosts.lookup(&endpoint) {
            Some(stored) if stored == scanned => Ok(stored),
            None => match self
                .ask(&endpoint, self.prompt.confirm_new(&endpoint, scanned))
                .await?
            {
                TrustDecision::Accept => {
                    self.record(&endpoint, scanned)?;
                    info!("Trusted new host {} ({})", endpoint, scanned);
                    Ok(scanned.to_string())
                }
                TrustDecision::Reject => Err(SyncError::trust_rejected(format!(
                    "Fingerprint of {} was not accepted",
                    endpoint
                ))),
            },
            Some(stored) => {
                warn!(
                    "Fingerprint of {} changed from {} to {}; possible man-in-the-middle attack",
                    endpoint, stored, scanned
                );
                let question = self.prompt.confirm_changed(&endpoint, &stored, scanned);
                match self.ask(&endpoint, question).await? {
                    TrustDecision::Accept => {
                        self.record(&endpoint, scanned)?;
                        info!("Replaced fingerprint of {} with {}", endpoint, scanned);
                        Ok(scanned.to_string())
                    }
                    TrustDecision::Reject => Err(SyncError::trust_rejected(format!(
                        "Changed fingerprint of {} was rejected; keeping {}",
                        endpoint, stored
                    ))),
                }
            }
        }
    }

    fn record(&self, endpoint: &str, fingerprint: &str) -> SyncResult<()> {
        self.known_hosts.accept(endpoint, fingerprint);
        self.known_hosts.save()
    }
}
