use crate::error::{ReplayError, Result};
use crate::structs::PacketRecord;
use pcap_file::pcap::PcapReader;
use pcap_file::DataLink;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::PathBuf;

/// Where a stream of packet records comes from.
pub enum PacketSource {
    /// A capture file on disk, re-opened for every pass.
    File(PathBuf),
    /// A caller-supplied stream. Consumed on the first pass, so only valid
    /// for single-pass replays.
    Reader(Option<Box<dyn Read + Send>>),
}

impl PacketSource {
    pub fn describe(&self) -> String {
        match self {
            PacketSource::File(p) => p.display().to_string(),
            PacketSource::Reader(_) => "<stream>".to_string(),
        }
    }

    /// Opens the source for one pass.
    pub(crate) fn open(&mut self) -> Result<SourceReader> {
        let name = self.describe();
        let reader: Box<dyn Read + Send> = match self {
            PacketSource::File(p) => {
                let f = File::open(&*p).map_err(|e| ReplayError::resource(&name, e.to_string()))?;
                Box::new(BufReader::new(f))
            }
            PacketSource::Reader(stream) => stream
                .take()
                .ok_or_else(|| ReplayError::config("stream source cannot be replayed twice"))?,
        };
        let inner =
            PcapReader::new(reader).map_err(|e| ReplayError::resource(&name, e.to_string()))?;
        Ok(SourceReader { inner, name })
    }
}

/// One pass over a source's records.
pub struct SourceReader {
    inner: PcapReader<Box<dyn Read + Send>>,
    name: String,
}

impl SourceReader {
    /// Link-layer type declared by the capture header.
    pub fn link_type(&self) -> DataLink {
        self.inner.header().datalink
    }

    /// `None` at end of source; a mid-stream failure is an `Io` error.
    pub fn next_record(&mut self) -> Option<Result<PacketRecord>> {
        self.inner.next_packet().map(|r| {
            r.map(PacketRecord::from).map_err(|e| ReplayError::Io {
                src: self.name.clone(),
                reason: e.to_string(),
            })
        })
    }
}

/// Fill progress of a source's in-memory packet cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CacheState {
    #[default]
    Absent,
    Filling,
    Filled,
}

/// Per-source packet cache. Filled during the first pass over a source and
/// immutable afterwards; later passes iterate it instead of the file.
#[derive(Debug, Default)]
pub struct FileCache {
    state: CacheState,
    packets: Vec<PacketRecord>,
}

impl FileCache {
    pub fn state(&self) -> CacheState {
        self.state
    }

    pub fn is_filled(&self) -> bool {
        self.state == CacheState::Filled
    }

    pub fn begin_fill(&mut self) {
        self.state = CacheState::Filling;
        self.packets.clear();
    }

    pub fn push(&mut self, record: &PacketRecord) {
        debug_assert_eq!(self.state, CacheState::Filling);
        self.packets.push(record.clone());
    }

    pub fn finish_fill(&mut self) {
        self.state = CacheState::Filled;
        log::trace!("cached {} packets", self.packets.len());
    }

    /// An interrupted fill leaves a partial list; throw it away so the next
    /// pass starts over from the file.
    pub fn abandon_fill(&mut self) {
        self.state = CacheState::Absent;
        self.packets.clear();
    }

    /// Moves the cached packets out for iteration; pair with `restore`.
    /// The filled state is kept so the ownership round-trip stays invisible.
    pub(crate) fn take_packets(&mut self) -> Vec<PacketRecord> {
        std::mem::take(&mut self.packets)
    }

    pub(crate) fn restore(&mut self, packets: Vec<PacketRecord>) {
        self.packets = packets;
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }
}
