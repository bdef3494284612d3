use crate::memory::MemorySample;
use serde::Serialize;

/// Remediation severity derived from a single memory sample.
///
/// Ordered: `None < CacheClear < Emergency`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RemediationTier {
    /// At or below the cache-clear threshold; nothing to do.
    None,
    /// Above the cache-clear threshold: drop the page cache.
    CacheClear,
    /// Above the emergency threshold: kill matching processes, then drop caches.
    Emergency,
}

/// Trip points, in whole percent. Both comparisons are strict (`>`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    pub cache_clear: u8,
    pub emergency: u8,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            cache_clear: 80,
            emergency: 90,
        }
    }
}

/// Map a sample to its tier. Depends on the sample alone: no history, no smoothing.
pub fn classify(sample: &MemorySample, thresholds: Thresholds) -> RemediationTier {
    if sample.used_percent > thresholds.emergency {
        RemediationTier::Emergency
    } else if sample.used_percent > thresholds.cache_clear {
        RemediationTier::CacheClear
    } else {
        RemediationTier::None
    }
}

impl RemediationTier {
    /// Whether the cache-clear tier's action fires. True for `Emergency` as well:
    /// tiers are cumulative, so above the emergency threshold both tiers run.
    pub fn clears_cache(self) -> bool {
        self >= RemediationTier::CacheClear
    }

    pub fn kills_processes(self) -> bool {
        self == RemediationTier::Emergency
    }
}
