use std::collections::HashMap;

use crate::ts::{Header, TsMetrics, PCR_JUMP_LIMIT};

use super::PacketCheck;

/// PCR observation and discontinuity detection (Priority 2). A sample is a
/// discontinuity when the 33-bit PCR base moves backwards or jumps more than
/// two seconds of 27MHz ticks ahead of the last sample on the same PID.
pub struct PcrCheck {
    last_pcr: HashMap<u16, u64>,
}

impl PcrCheck {
    pub fn new() -> Self {
        Self {
            last_pcr: HashMap::new(),
        }
    }
}

impl PacketCheck for PcrCheck {
    fn name(&self) -> &'static str {
        "Pcr"
    }

    fn check(&mut self, packet: &[u8], header: &Header, metrics: &mut TsMetrics) {
        if !header.has_adaptation {
            return;
        }
        let adaptation_length = packet[4];
        if adaptation_length < 7 {
            return;
        }
        let flags = packet[5];
        if flags & 0x10 == 0 {
            return;
        }

        // 33-bit PCR base from the six PCR bytes.
        let pcr_base = (u64::from(packet[6]) << 25)
            | (u64::from(packet[7]) << 17)
            | (u64::from(packet[8]) << 9)
            | (u64::from(packet[9]) << 1)
            | (u64::from(packet[10] & 0x80) >> 7);

        metrics.pcr_count += 1;
        if let Some(&last) = self.last_pcr.get(&header.pid) {
            let diff = pcr_base as i64 - last as i64;
            if diff < 0 || diff > PCR_JUMP_LIMIT {
                metrics.pcr_discontinuities += 1;
            }
        }
        self.last_pcr.insert(header.pid, pcr_base);
    }

    fn reset(&mut self) {
        self.last_pcr.clear();
    }
}
