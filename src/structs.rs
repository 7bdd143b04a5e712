use pcap_file::pcap::PcapPacket;

/// Hard bound on the number of packet sources a context accepts.
pub const MAX_SOURCES: usize = 512;

/// Default outbound MTU ceiling in bytes.
pub const DEFAULT_MTU: u32 = 1500;

/// One decoded capture record: timestamp, lengths and frame bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketRecord {
    /// Capture timestamp in microseconds since the capture epoch.
    pub ts_us: i64,
    /// Number of bytes actually stored in `data`.
    pub caplen: u32,
    /// Original on-the-wire length, which may exceed `caplen` for
    /// truncated captures.
    pub origlen: u32,
    pub data: Vec<u8>,
}

impl PacketRecord {
    /// Length used for rate computation and the MTU check.
    pub fn wire_len(&self, use_pkthdr_len: bool) -> u32 {
        if use_pkthdr_len {
            self.origlen
        } else {
            self.caplen
        }
    }
}

impl From<PcapPacket<'_>> for PacketRecord {
    fn from(p: PcapPacket<'_>) -> PacketRecord {
        PacketRecord {
            ts_us: p.timestamp.as_micros() as i64,
            caplen: p.data.len() as u32,
            origlen: p.orig_len,
            data: p.data.into_owned(),
        }
    }
}

/// Traffic direction associated with a sender handle. Informational only.
#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    C2S,
    S2C,
}

/// The two sender slots of a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intf {
    A,
    B,
}

/// Decision returned by the single-step callback after each packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepAction {
    Continue,
    Stop,
}
