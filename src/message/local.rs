use crossbeam_channel::{Receiver, Sender, TryRecvError};

use super::comm::{Envelope, Transport};
use crate::error::Error;
use crate::tags::Tag;

/// A transport between ranks living in one OS process, typically one thread
/// per rank. Each rank owns an unbounded inbox and a sender into every
/// other rank's inbox, so `send` never blocks and per-pair ordering is that
/// of the underlying channel.
///
pub struct LocalTransport {
    rank: usize,
    peers: Vec<Sender<Envelope>>,
    inbox: Receiver<Envelope>,
}

impl LocalTransport {
    /// Create a fully connected set of `size` transports, indexed by rank.
    pub fn group(size: usize) -> Vec<Self> {
        let (sinks, sources): (Vec<_>, Vec<_>) = (0..size).map(|_| crossbeam_channel::unbounded()).unzip();

        sources
            .into_iter()
            .enumerate()
            .map(|(rank, inbox)| Self {
                rank,
                peers: sinks.clone(),
                inbox,
            })
            .collect()
    }

    /// A transport for a lone rank, which only ever talks to itself.
    pub fn single() -> Self {
        let (sink, inbox) = crossbeam_channel::unbounded();

        Self {
            rank: 0,
            peers: vec![sink],
            inbox,
        }
    }
}

impl Transport for LocalTransport {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.peers.len()
    }

    fn send(&self, rank: usize, tag: Tag, message: Vec<u8>) -> Result<(), Error> {
        let envelope = Envelope {
            source: self.rank,
            tag,
            data: message,
        };
        self.peers[rank].send(envelope).map_err(|_| Error::Disconnected)
    }

    fn recv(&self) -> Result<Envelope, Error> {
        self.inbox.recv().map_err(|_| Error::Disconnected)
    }

    fn try_recv(&self) -> Result<Option<Envelope>, Error> {
        match self.inbox.try_recv() {
            Ok(envelope) => Ok(Some(envelope)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(Error::Disconnected),
        }
    }
}
