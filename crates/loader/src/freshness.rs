//! Policies deciding whether a local manifest can be used without the network

use std::time::Duration;

use hotload_manifest::Manifest;

/// Decides whether a previously downloaded manifest is still acceptable.
pub trait FreshnessChecker: Send + Sync {
    /// `fresh_at_epoch_ms` is when the manifest was last confirmed current
    /// by the server.
    fn is_fresh(&self, manifest: &Manifest, fresh_at_epoch_ms: i64, now_epoch_ms: i64) -> bool;
}

/// Always go to the network.
#[derive(Debug, Default, Clone, Copy)]
pub struct NeverFresh;

impl FreshnessChecker for NeverFresh {
    fn is_fresh(&self, _manifest: &Manifest, _fresh_at_epoch_ms: i64, _now_epoch_ms: i64) -> bool {
        false
    }
}

/// Fresh while younger than a fixed age.
#[derive(Debug, Clone, Copy)]
pub struct MaxAgeFreshnessChecker {
    max_age: Duration,
}

impl MaxAgeFreshnessChecker {
    #[must_use]
    pub fn new(max_age: Duration) -> Self {
        Self { max_age }
    }

    #[must_use]
    pub fn max_age(&self) -> Duration {
        self.max_age
    }
}

impl FreshnessChecker for MaxAgeFreshnessChecker {
    fn is_fresh(&self, _manifest: &Manifest, fresh_at_epoch_ms: i64, now_epoch_ms: i64) -> bool {
        let max_age_ms = i64::try_from(self.max_age.as_millis()).unwrap_or(i64::MAX);
        now_epoch_ms.saturating_sub(fresh_at_epoch_ms) < max_age_ms
    }
}
