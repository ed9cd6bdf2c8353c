//! Server-side command admission pipeline.
//!
//! Verification order is fixed: structure → freshness → replay → signature →
//! second factor → admit. The seen-set is only written after the signature
//! passes, so an attacker cannot poison the replay window with forged
//! envelopes.

use parking_lot::Mutex;
use std::sync::Arc;
use tracing::warn;

use terra_common::clock::wall_clock_ms;
use terra_common::metrics::{
    Metrics, METRIC_REJECTED_MFA, METRIC_REJECTED_REPLAY, METRIC_REJECTED_SIGNATURE,
    METRIC_REJECTED_STALE,
};
use terra_common::types::command::CommandEnvelope;

use crate::cert::TrustedClients;
use crate::envelope::verify_signature;
use crate::error::LinkError;
use crate::replay::SeenSet;

/// Shared admission state for all connections.
pub struct CommandVerifier {
    trusted: TrustedClients,
    seen: Arc<Mutex<SeenSet>>,
    freshness_window_ms: u64,
    metrics: Metrics,
}

impl CommandVerifier {
    pub fn new(trusted: TrustedClients, freshness_window_ms: u64, metrics: Metrics) -> Self {
        Self {
            trusted,
            seen: Arc::new(Mutex::new(SeenSet::new(freshness_window_ms))),
            freshness_window_ms,
            metrics,
        }
    }

    /// Trusted-clients directory view (handshake uses it too).
    pub fn trusted(&self) -> &TrustedClients {
        &self.trusted
    }

    /// Purge seen-set entries older than the freshness window.
    pub fn sweep(&self) -> usize {
        self.seen.lock().sweep(wall_clock_ms())
    }

    /// Run the full admission pipeline for one envelope.
    pub fn verify(
        &self,
        envelope: &CommandEnvelope,
        client_cn: &str,
        has_second_factor: bool,
    ) -> Result<(), LinkError> {
        // 1. Structural check. Parsing already proved field presence; the
        //    signature must at least look like a hex tag.
        if envelope.signature.len() != 64 || hex::decode(&envelope.signature).is_err() {
            return Err(LinkError::InvalidFormat("signature field".to_string()));
        }

        // 2. Freshness: |now − timestamp| inside the window.
        let now_ms = wall_clock_ms();
        let age_ms = now_ms.abs_diff(envelope.timestamp_ms);
        if age_ms > self.freshness_window_ms {
            self.metrics.incr(METRIC_REJECTED_STALE);
            return Err(LinkError::Stale { age_ms });
        }

        // 3. Replay: (id, timestamp) unseen. Checked before the signature so
        //    the metric distinguishes replays of valid envelopes, but only
        //    admitted after the signature below passes.
        if self.replayed(envelope) {
            self.metrics.incr(METRIC_REJECTED_REPLAY);
            return Err(LinkError::Replay);
        }

        // 4. Signature under the client certificate's key.
        let cert = self
            .trusted
            .get(client_cn)
            .ok_or_else(|| LinkError::Unauthorized(format!("unknown client '{client_cn}'")))?;
        if let Err(e) = verify_signature(envelope, &cert.key_bytes()?) {
            self.metrics.incr(METRIC_REJECTED_SIGNATURE);
            warn!(client = client_cn, "envelope signature rejected");
            return Err(e);
        }

        // Critical commands demand a recorded second factor.
        if envelope.command.is_critical() && !has_second_factor {
            self.metrics.incr(METRIC_REJECTED_MFA);
            return Err(LinkError::MfaRequired);
        }

        // 5. Admit into the seen-set.
        self.seen
            .lock()
            .check_and_admit(envelope.id, envelope.timestamp_ms, now_ms);
        Ok(())
    }

    fn replayed(&self, envelope: &CommandEnvelope) -> bool {
        let seen = self.seen.lock();
        // Peek without admitting.
        seen.contains(envelope.id, envelope.timestamp_ms)
    }
}
