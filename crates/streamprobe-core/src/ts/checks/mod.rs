pub mod continuity;
pub mod pat;
pub mod pcr;
pub mod scte35;

use super::{Header, TsMetrics};

/// Trait for a composable per-packet TR 101 290 indicator check.
///
/// The packet walk has already verified the sync byte, decoded the header
/// and filtered null packets; each check inspects the packet, updates its
/// own per-PID tracker state, and records findings on `metrics`.
pub trait PacketCheck: Send {
    /// Human-readable name of this check.
    fn name(&self) -> &'static str;

    /// Run the check against one packet.
    fn check(&mut self, packet: &[u8], header: &Header, metrics: &mut TsMetrics);

    /// Clear tracker state carried across segments.
    fn reset(&mut self) {}
}

/// Build the default indicator set, in evaluation order.
pub fn default_packet_checks() -> Vec<Box<dyn PacketCheck>> {
    vec![
        Box::new(continuity::ContinuityCheck::new()),
        Box::new(pat::PatCheck),
        Box::new(pcr::PcrCheck::new()),
        Box::new(scte35::Scte35Check),
    ]
}
