/// Keeps one stream's output timestamps strictly increasing.
///
/// Missing, duplicated or regressing codec timestamps are replaced with
/// `last + step`, where `step` is the frame duration (or 1ms when unknown).
/// `reset` starts a new sequence, used whenever codec state is flushed.
/// Repaired values saturate at `i64::MAX`; past that ceiling the output
/// stays flat instead of overflowing.
#[derive(Debug, Default, Clone)]
pub struct TimestampRepairer {
    last_output_ms: Option<i64>,
}

impl TimestampRepairer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_output_ms(&self) -> Option<i64> {
        self.last_output_ms
    }

    pub fn reset(&mut self) {
        self.last_output_ms = None;
    }

    pub fn repair(&mut self, raw_ms: Option<i64>, duration_ms: i64) -> i64 {
        let step = if duration_ms > 0 { duration_ms } else { 1 };
        let ts = match (raw_ms, self.last_output_ms) {
            (None, Some(last)) => last.saturating_add(step),
            (None, None) => 0,
            (Some(raw), Some(last)) if raw <= last => last.saturating_add(step),
            (Some(raw), _) => raw,
        };
        self.last_output_ms = Some(ts);
        ts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repair_mixed_sequence() {
        let mut repairer = TimestampRepairer::new();
        let raw = [None, Some(100), Some(100), Some(50), Some(260)];
        let out: Vec<i64> = raw.iter().map(|r| repairer.repair(*r, 40)).collect();
        assert_eq!(out, vec![0, 100, 140, 180, 260]);
    }

    #[test]
    fn test_unknown_duration_steps_one_ms() {
        let mut repairer = TimestampRepairer::new();
        assert_eq!(repairer.repair(Some(10), 0), 10);
        assert_eq!(repairer.repair(Some(10), 0), 11);
        assert_eq!(repairer.repair(None, -5), 12);
    }

    #[test]
    fn test_first_valid_timestamp_used_as_is() {
        let mut repairer = TimestampRepairer::new();
        assert_eq!(repairer.repair(Some(-20), 40), -20);
        assert_eq!(repairer.repair(Some(-20), 40), 20);
    }

    #[test]
    fn test_reset_starts_new_sequence() {
        let mut repairer = TimestampRepairer::new();
        repairer.repair(Some(5000), 40);
        repairer.reset();
        assert_eq!(repairer.last_output_ms(), None);
        assert_eq!(repairer.repair(Some(1000), 40), 1000);
        repairer.reset();
        assert_eq!(repairer.repair(None, 40), 0);
    }

    #[test]
    fn test_repair_saturates_at_ceiling() {
        let mut repairer = TimestampRepairer::new();
        assert_eq!(repairer.repair(Some(i64::MAX - 10), 40), i64::MAX - 10);
        assert_eq!(repairer.repair(None, 40), i64::MAX);
        assert_eq!(repairer.repair(Some(i64::MAX), 40), i64::MAX);
    }

    #[test]
    fn test_output_strictly_increasing() {
        // Deterministic pseudo-random walk with gaps, duplicates and rewinds.
        let mut seed: u64 = 0x2545_f491_4f6c_dd1d;
        let mut repairer = TimestampRepairer::new();
        let mut last = None;
        for _ in 0..2_000 {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            let raw = match seed % 5 {
                0 => None,
                1 => last,
                _ => Some((seed % 10_000) as i64 - 2_000),
            };
            let duration = (seed >> 32) as i64 % 50;
            let ts = repairer.repair(raw, duration);
            if let Some(prev) = last {
                assert!(ts > prev, "{} not after {}", ts, prev);
            }
            last = Some(ts);
        }
    }
}
