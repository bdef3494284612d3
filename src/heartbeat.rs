/// Rate limiter for the watchdog's "Memory usage: NN%" line.
///
/// Fires on the first check and then whenever `interval` has passed since the
/// last firing, so two heartbeats are never closer than `interval` and a gap is
/// at most `interval` plus one poll period.
use std::time::{Duration, Instant};

pub struct Heartbeat {
    interval: Duration,
    last: Option<Instant>,
}

impl Heartbeat {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    /// Returns true (and records `now`) if a heartbeat is due.
    pub fn due(&mut self, now: Instant) -> bool {
        let fire = match self.last {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.interval,
        };
        if fire {
            self.last = Some(now);
        }
        fire
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_check_fires() {
        let mut hb = Heartbeat::new(Duration::from_secs(60));
        assert!(hb.due(Instant::now()));
    }

    #[test]
    fn test_suppressed_within_interval() {
        let start = Instant::now();
        let mut hb = Heartbeat::new(Duration::from_secs(60));
        assert!(hb.due(start));
        assert!(!hb.due(start + Duration::from_secs(10)));
        assert!(!hb.due(start + Duration::from_secs(59)));
        assert!(hb.due(start + Duration::from_secs(60)));
    }

    #[test]
    fn test_exactly_one_per_minute_at_ten_second_polls() {
        let start = Instant::now();
        let mut hb = Heartbeat::new(Duration::from_secs(60));
        let fired: Vec<u64> = (0..=36)
            .map(|i| i * 10)
            .filter(|&secs| hb.due(start + Duration::from_secs(secs)))
            .collect();
        assert_eq!(fired, vec![0, 60, 120, 180, 240, 300, 360]);
    }

    #[test]
    fn test_jittered_polls_never_skip_a_window() {
        // Polls drift by 7s; every rolling 60+10s window still contains a heartbeat
        // and no two heartbeats are closer than 60s.
        let start = Instant::now();
        let mut hb = Heartbeat::new(Duration::from_secs(60));
        let fired: Vec<u64> = (0..60)
            .map(|i| i * 17)
            .filter(|&secs| hb.due(start + Duration::from_secs(secs)))
            .collect();
        for pair in fired.windows(2) {
            let gap = pair[1] - pair[0];
            assert!(gap >= 60, "heartbeats too close: {pair:?}");
            assert!(gap < 60 + 17, "heartbeat gap too long: {pair:?}");
        }
    }

    #[test]
    fn test_zero_interval_fires_every_time() {
        let start = Instant::now();
        let mut hb = Heartbeat::new(Duration::ZERO);
        assert!(hb.due(start));
        assert!(hb.due(start));
    }
}
