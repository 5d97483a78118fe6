//! Replay protection: the set of nonces accepted from each sender, each kept
//! until the envelope that carried it expires.
//!
//! Nonces only need to be unique per sender, not increasing. Envelopes
//! that took the relay path routinely arrive after newer ones delivered
//! directly, and both must be accepted.

use std::collections::HashMap;
use std::sync::Mutex;

/// How long a nonce from an envelope without `expires` stays remembered.
pub const UNEXPIRING_RETENTION_SECS: u64 = 24 * 3600;

#[derive(Debug, Default)]
pub struct ReplayGuard {
    /// sender -> nonce -> unix time after which the entry may be dropped
    seen: Mutex<HashMap<String, HashMap<u64, u64>>>,
}

impl ReplayGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `nonce` from `sender` has not been accepted before.
    /// Envelopes without a nonce are not tracked.
    pub fn is_fresh(&self, sender: &str, nonce: Option<u64>) -> bool {
        let Some(nonce) = nonce else { return true };
        let seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());
        seen.get(sender).map_or(true, |nonces| !nonces.contains_key(&nonce))
    }

    /// Record an accepted nonce. It is kept until `expires`, or for
    /// [`UNEXPIRING_RETENTION_SECS`] past `now` when the envelope never
    /// expires.
    pub fn record(&self, sender: &str, nonce: Option<u64>, expires: Option<u64>, now: u64) {
        let Some(nonce) = nonce else { return };
        let keep_until = expires.unwrap_or(now + UNEXPIRING_RETENTION_SECS);
        let mut seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());
        seen.entry(sender.to_string())
            .or_default()
            .insert(nonce, keep_until);
    }

    /// Drop nonces whose envelopes have expired by `now`. A replay of one of
    /// them is already rejected by the expiry check. Returns how many were
    /// removed.
    pub fn prune(&self, now: u64) -> usize {
        let mut seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());
        let mut removed = 0;
        seen.retain(|_, nonces| {
            let before = nonces.len();
            nonces.retain(|_, keep_until| *keep_until >= now);
            removed += before - nonces.len();
            !nonces.is_empty()
        });
        removed
    }

    /// Number of remembered nonces across all senders.
    pub fn len(&self) -> usize {
        let seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());
        seen.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
