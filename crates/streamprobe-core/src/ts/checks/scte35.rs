use crate::ts::{section_start, Header, TsMetrics, SCTE35_TABLE_ID};

use super::PacketCheck;

/// SCTE-35 detection: a PUSI-started payload whose section table_id is 0xFC
/// is a splice_info_section. Records the carrying PID, the message count and
/// the splice_command_type byte.
pub struct Scte35Check;

impl PacketCheck for Scte35Check {
    fn name(&self) -> &'static str {
        "Scte35"
    }

    fn check(&mut self, packet: &[u8], header: &Header, metrics: &mut TsMetrics) {
        if !header.pusi {
            return;
        }
        let Some(start) = section_start(packet) else {
            return;
        };
        if packet[start] != SCTE35_TABLE_ID {
            return;
        }

        if !metrics.scte35_pids.contains(&header.pid) {
            metrics.scte35_pids.push(header.pid);
        }
        metrics.scte35_messages += 1;
        // splice_command_type sits 13 bytes into the section, past table
        // header, protocol_version, pts_adjustment, cw_index and tier.
        if let Some(&command_type) = packet.get(start + 13) {
            metrics.scte35_command_types.push(command_type);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ts::parse_header;
    use crate::ts::test_packets::{packet, pusi_packet};

    fn run(raw: &[u8], metrics: &mut TsMetrics) {
        let header = parse_header(raw);
        Scte35Check.check(raw, &header, metrics);
    }

    #[test]
    fn detects_splice_section_with_command_type() {
        let mut p = pusi_packet(0x1234, 0, SCTE35_TABLE_ID);
        p[5 + 13] = 0x06; // time_signal
        let mut metrics = TsMetrics::default();
        run(&p, &mut metrics);
        assert_eq!(metrics.scte35_messages, 1);
        assert_eq!(metrics.scte35_pids, vec![0x1234]);
        assert_eq!(metrics.scte35_command_types, vec![0x06]);
    }

    #[test]
    fn repeat_pid_is_counted_once_in_pid_set() {
        let mut metrics = TsMetrics::default();
        run(&pusi_packet(0x1234, 0, SCTE35_TABLE_ID), &mut metrics);
        run(&pusi_packet(0x1234, 1, SCTE35_TABLE_ID), &mut metrics);
        assert_eq!(metrics.scte35_messages, 2);
        assert_eq!(metrics.scte35_pids, vec![0x1234]);
    }

    #[test]
    fn other_table_ids_are_ignored() {
        let mut metrics = TsMetrics::default();
        run(&pusi_packet(0x1234, 0, 0x02), &mut metrics);
        assert_eq!(metrics.scte35_messages, 0);
    }

    #[test]
    fn without_pusi_is_ignored() {
        let mut metrics = TsMetrics::default();
        run(&packet(0x1234, 0), &mut metrics);
        assert_eq!(metrics.scte35_messages, 0);
    }
}
