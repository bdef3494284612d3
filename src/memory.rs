/// Memory sampling.
///
/// "Used" follows `free`: total minus what the kernel reports as available.
/// `sysinfo` reads that from `/proc/meminfo` on Linux and reports bytes.
use sysinfo::System;

/// One reading of system memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemorySample {
    pub total_bytes: u64,
    pub used_bytes: u64,
    /// `floor(used / total * 100)`, clamped to 100.
    pub used_percent: u8,
}

impl MemorySample {
    pub fn from_bytes(total_bytes: u64, used_bytes: u64) -> Result<Self, MemoryError> {
        if total_bytes == 0 {
            return Err(MemoryError::ZeroTotal);
        }
        let used_bytes = used_bytes.min(total_bytes);
        let pct = (u128::from(used_bytes) * 100 / u128::from(total_bytes)) as u8;
        Ok(Self {
            total_bytes,
            used_bytes,
            used_percent: pct,
        })
    }

    /// Build a sample directly from a percentage. Handy for fakes.
    #[cfg(test)]
    pub fn with_percent(used_percent: u8) -> Self {
        Self {
            total_bytes: 100,
            used_bytes: u64::from(used_percent),
            used_percent,
        }
    }
}

/// Source of memory readings. The watchdog asks for one per cycle.
pub trait MemorySource {
    fn sample(&mut self) -> Result<MemorySample, MemoryError>;
}

/// Live system memory via `sysinfo`. Only the memory figures are refreshed.
pub struct SysinfoSource {
    system: System,
}

impl SysinfoSource {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }
}

impl Default for SysinfoSource {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySource for SysinfoSource {
    fn sample(&mut self) -> Result<MemorySample, MemoryError> {
        self.system.refresh_memory();
        let total = self.system.total_memory();
        let used = self.system.used_memory();
        tracing::trace!(total, used, "memory refreshed");
        MemorySample::from_bytes(total, used)
    }
}

/// Errors from reading memory statistics.
#[derive(Debug)]
pub enum MemoryError {
    /// The platform reported no memory at all, usually because it could not
    /// be read.
    ZeroTotal,
}

impl std::fmt::Display for MemoryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MemoryError::ZeroTotal => write!(f, "total memory reported as zero"),
        }
    }
}

impl std::error::Error for MemoryError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_is_floored() {
        // 899/1000 = 89.9% -> 89
        let sample = MemorySample::from_bytes(1000, 899).unwrap();
        assert_eq!(sample.used_percent, 89);
        let sample = MemorySample::from_bytes(1000, 1000).unwrap();
        assert_eq!(sample.used_percent, 100);
    }

    #[test]
    fn test_used_above_total_is_clamped() {
        let sample = MemorySample::from_bytes(1000, 5000).unwrap();
        assert_eq!(sample.used_percent, 100);
    }

    #[test]
    fn test_zero_total_is_error() {
        assert!(matches!(
            MemorySample::from_bytes(0, 0),
            Err(MemoryError::ZeroTotal)
        ));
    }

    #[test]
    fn test_huge_totals_do_not_overflow() {
        let sample = MemorySample::from_bytes(u64::MAX, u64::MAX - 1).unwrap();
        assert_eq!(sample.used_percent, 99);
        let sample = MemorySample::from_bytes(u64::MAX, u64::MAX / 2).unwrap();
        assert_eq!(sample.used_percent, 49);
    }

    #[test]
    fn test_sysinfo_source_reads_live_memory() {
        let mut source = SysinfoSource::new();
        let sample = source.sample().unwrap();
        assert!(sample.total_bytes > 0);
        assert!(sample.used_bytes <= sample.total_bytes);
        assert!(sample.used_percent <= 100);
    }
}
