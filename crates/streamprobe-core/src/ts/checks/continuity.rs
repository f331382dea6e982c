use std::collections::HashMap;

use crate::ts::{Header, TsMetrics};

use super::PacketCheck;

struct CcTracker {
    last_cc: u8,
}

/// Continuity counter validation (Priority 1). Expected CC is
/// `(last + 1) mod 16` per PID; a repeated CC is a permitted duplicate.
pub struct ContinuityCheck {
    trackers: HashMap<u16, CcTracker>,
}

impl ContinuityCheck {
    pub fn new() -> Self {
        Self {
            trackers: HashMap::new(),
        }
    }
}

impl PacketCheck for ContinuityCheck {
    fn name(&self) -> &'static str {
        "Continuity"
    }

    fn check(&mut self, _packet: &[u8], header: &Header, metrics: &mut TsMetrics) {
        if !header.has_payload {
            return;
        }
        match self.trackers.get_mut(&header.pid) {
            None => {
                self.trackers
                    .insert(header.pid, CcTracker { last_cc: header.cc });
            }
            Some(tracker) => {
                let expected = (tracker.last_cc + 1) % 16;
                if header.cc != expected && header.cc != tracker.last_cc {
                    metrics.continuity_errors += 1;
                }
                tracker.last_cc = header.cc;
            }
        }
    }

    fn reset(&mut self) {
        self.trackers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ts::test_packets::packet;
    use crate::ts::parse_header;

    fn run(check: &mut ContinuityCheck, pid: u16, cc: u8) -> u64 {
        let p = packet(pid, cc);
        let header = parse_header(&p);
        let mut metrics = TsMetrics::default();
        check.check(&p, &header, &mut metrics);
        metrics.continuity_errors
    }

    #[test]
    fn first_observation_is_never_an_error() {
        let mut check = ContinuityCheck::new();
        assert_eq!(run(&mut check, 0x100, 9), 0);
    }

    #[test]
    fn increment_and_duplicate_are_fine() {
        let mut check = ContinuityCheck::new();
        run(&mut check, 0x100, 3);
        assert_eq!(run(&mut check, 0x100, 4), 0);
        assert_eq!(run(&mut check, 0x100, 4), 0); // permitted duplicate
        assert_eq!(run(&mut check, 0x100, 5), 0);
    }

    #[test]
    fn jump_is_an_error_and_resyncs() {
        let mut check = ContinuityCheck::new();
        run(&mut check, 0x100, 5);
        assert_eq!(run(&mut check, 0x100, 8), 1);
        // tracker resynced to the jumped value
        assert_eq!(run(&mut check, 0x100, 9), 0);
    }

    #[test]
    fn wraps_at_sixteen() {
        let mut check = ContinuityCheck::new();
        run(&mut check, 0x100, 15);
        assert_eq!(run(&mut check, 0x100, 0), 0);
    }

    #[test]
    fn pids_are_tracked_independently() {
        let mut check = ContinuityCheck::new();
        run(&mut check, 0x100, 5);
        assert_eq!(run(&mut check, 0x200, 11), 0);
        assert_eq!(run(&mut check, 0x100, 6), 0);
    }

    #[test]
    fn adaptation_only_packet_is_skipped() {
        let mut check = ContinuityCheck::new();
        run(&mut check, 0x100, 5);
        let mut p = packet(0x100, 9);
        p[3] = 0x20 | 9; // adaptation only, no payload
        let header = parse_header(&p);
        let mut metrics = TsMetrics::default();
        check.check(&p, &header, &mut metrics);
        assert_eq!(metrics.continuity_errors, 0);
    }

    #[test]
    fn reset_clears_trackers() {
        let mut check = ContinuityCheck::new();
        run(&mut check, 0x100, 5);
        check.reset();
        assert_eq!(run(&mut check, 0x100, 12), 0);
    }
}
