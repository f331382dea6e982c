use crate::ts::{section_start, Header, TsMetrics, PAT_TABLE_ID, PID_PAT};

use super::PacketCheck;

/// PAT validation (Priority 2): a PAT-carrying packet with PUSI set must
/// start a section with table_id 0x00.
pub struct PatCheck;

impl PacketCheck for PatCheck {
    fn name(&self) -> &'static str {
        "Pat"
    }

    fn check(&mut self, packet: &[u8], header: &Header, metrics: &mut TsMetrics) {
        if header.pid != PID_PAT || !header.pusi {
            return;
        }
        let valid = match section_start(packet) {
            Some(start) => packet[start] == PAT_TABLE_ID,
            None => false,
        };
        if !valid {
            metrics.pat_errors += 1;
        }
    }
}
