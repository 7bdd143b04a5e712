#![allow(dead_code)]

use pcap_file::pcap::{PcapPacket, PcapWriter};
use pcap_file::DataLink;
use repcap::sendpacket::Sender;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// One frame captured by a `MockSender`, with the wall time it left.
pub struct SentFrame {
    pub data: Vec<u8>,
    pub at: Instant,
}

pub type Tape = Arc<Mutex<Vec<SentFrame>>>;

/// Sender that records every frame instead of hitting a real interface.
pub struct MockSender {
    label: String,
    link: DataLink,
    tape: Tape,
    /// Fail every n-th send when set, to exercise the failure counters.
    fail_every: Option<u64>,
    count: u64,
}

impl MockSender {
    pub fn new(label: &str) -> (MockSender, Tape) {
        Self::with_link(label, DataLink::ETHERNET)
    }

    pub fn with_link(label: &str, link: DataLink) -> (MockSender, Tape) {
        let tape: Tape = Arc::new(Mutex::new(Vec::new()));
        (
            MockSender {
                label: label.to_string(),
                link,
                tape: Arc::clone(&tape),
                fail_every: None,
                count: 0,
            },
            tape,
        )
    }

    pub fn failing_every(mut self, n: u64) -> MockSender {
        self.fail_every = Some(n);
        self
    }
}

impl Sender for MockSender {
    fn link_type(&self) -> DataLink {
        self.link
    }

    fn send(&mut self, frame: &[u8]) -> io::Result<usize> {
        self.count += 1;
        if let Some(n) = self.fail_every {
            if self.count % n == 0 {
                return Err(io::Error::other("injected send failure"));
            }
        }
        self.tape.lock().unwrap().push(SentFrame {
            data: frame.to_vec(),
            at: Instant::now(),
        });
        Ok(frame.len())
    }

    fn name(&self) -> &str {
        &self.label
    }
}

/// A unique scratch path under the system temp directory.
pub fn temp_path(tag: &str) -> PathBuf {
    std::env::temp_dir().join(format!("repcap-test-{}-{tag}", std::process::id()))
}

/// Writes a capture file of `(timestamp_us, frame)` records.
pub fn write_pcap(path: &Path, packets: &[(u64, Vec<u8>)]) {
    let file = File::create(path).expect("cannot create capture file");
    let mut writer = PcapWriter::new(file).expect("cannot write capture header");
    for (ts_us, data) in packets {
        writer
            .write_packet(&PcapPacket::new(
                Duration::from_micros(*ts_us),
                data.len() as u32,
                data,
            ))
            .expect("cannot write packet");
    }
}

/// A frame of `len` bytes, every byte set to `marker`.
pub fn frame(marker: u8, len: usize) -> Vec<u8> {
    vec![marker; len]
}

/// First payload byte of every captured frame, in send order.
pub fn markers(tape: &Tape) -> Vec<u8> {
    tape.lock().unwrap().iter().map(|f| f.data[0]).collect()
}
