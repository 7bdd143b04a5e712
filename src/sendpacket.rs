use crate::error::{ReplayError, Result};
use crate::structs::Direction;
use pcap_file::DataLink;
use pnet::datalink::{self, Channel, DataLinkSender};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A link-layer sending handle.
///
/// The engine owns its senders exclusively; the only cross-thread touch
/// point is the abort token installed at bind time, which a blocked `send`
/// implementation is expected to poll.
pub trait Sender: Send {
    /// Link-layer type of the frames this handle accepts.
    fn link_type(&self) -> DataLink;

    /// Writes one frame, returning the number of bytes written.
    fn send(&mut self, frame: &[u8]) -> io::Result<usize>;

    /// Installs the token that requests an in-progress send to unblock.
    fn set_abort_token(&mut self, _token: Arc<AtomicBool>) {}

    fn name(&self) -> &str {
        "sender"
    }
}

/// Sender over a `pnet` datalink channel.
pub struct PnetSender {
    name: String,
    tx: Box<dyn DataLinkSender>,
    link_type: DataLink,
    abort: Option<Arc<AtomicBool>>,
}

impl Sender for PnetSender {
    fn link_type(&self) -> DataLink {
        self.link_type
    }

    fn send(&mut self, frame: &[u8]) -> io::Result<usize> {
        if let Some(abort) = &self.abort {
            if abort.load(Ordering::Relaxed) {
                return Err(io::Error::new(io::ErrorKind::Interrupted, "send aborted"));
            }
        }
        match self.tx.send_to(frame, None) {
            Some(Ok(())) => Ok(frame.len()),
            Some(Err(e)) => Err(e),
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "frame exceeds the channel buffer",
            )),
        }
    }

    fn set_abort_token(&mut self, token: Arc<AtomicBool>) {
        self.abort = Some(token);
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Opens a datalink channel on the named interface. The direction is
/// informational and only recorded in the logs.
pub fn open_interface(name: &str, direction: Direction) -> Result<PnetSender> {
    let iface = datalink::interfaces()
        .into_iter()
        .find(|i| i.name == name)
        .ok_or_else(|| ReplayError::resource(name, "no such interface"))?;

    let tx = match datalink::channel(&iface, datalink::Config::default()) {
        Ok(Channel::Ethernet(tx, _rx)) => tx,
        Ok(_) => return Err(ReplayError::resource(name, "unsupported channel type")),
        Err(e) => return Err(ReplayError::resource(name, e.to_string())),
    };
    log::debug!("opened {name} for {direction:?} sending");

    Ok(PnetSender {
        name: name.to_string(),
        tx,
        // datalink channels speak Ethernet framing
        link_type: DataLink::ETHERNET,
        abort: None,
    })
}
