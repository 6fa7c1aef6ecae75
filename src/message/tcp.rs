use std::collections::HashMap;
use std::io::{self, prelude::*};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TryRecvError};
use log::{error, info, warn};

use super::backoff::{ExponentialBackoff, Retry};
use super::comm::{Envelope, Transport};
use super::{codec, util};
use crate::error::Error;
use crate::tags::Tag;

const CONNECT_ATTEMPTS: usize = 10;
const RETRY_WAIT_MS: Duration = Duration::from_millis(50);
const RETRY_MAX_WAIT_MS: Duration = Duration::from_millis(2000);

/// A transport between OS processes (or threads) over TCP. Each rank
/// listens on its own address; a listener thread accepts connections and
/// spawns one reader per connection, which decodes length-prefixed
/// envelopes into the rank's inbox and acknowledges each frame with its
/// byte count. Outgoing messages are written by a single sender thread that
/// keeps one connection per peer, so messages to a given peer arrive in the
/// order they were sent. Faults on the sender thread are reported through
/// the next `send` or `recv`.
///
pub struct TcpTransport {
    rank: usize,
    num_peers: usize,
    outbound: Option<Sender<(usize, Vec<u8>)>>,
    inbox_sink: Sender<Envelope>,
    inbox: Receiver<Envelope>,
    faults: Receiver<io::Error>,
    send_thread: Option<JoinHandle<()>>,
}

impl TcpTransport {
    /// Bind this rank's listener at `peers[rank]` and start the transport.
    pub fn bind(rank: usize, peers: Vec<SocketAddr>) -> Result<Self, Error> {
        let listener = TcpListener::bind(peers[rank])?;
        Ok(Self::from_listener(rank, listener, peers))
    }

    /// Start the transport on an already bound listener. This is useful
    /// when the listeners are bound to ephemeral ports before the peer
    /// address table is known.
    pub fn from_listener(rank: usize, listener: TcpListener, peers: Vec<SocketAddr>) -> Self {
        let num_peers = peers.len();
        let (inbox_sink, inbox) = crossbeam_channel::unbounded();
        let (outbound, outbound_src) = crossbeam_channel::unbounded();
        let (fault_sink, faults) = crossbeam_channel::unbounded();

        Self::start_listener(listener, inbox_sink.clone());
        let send_thread = Self::start_serial_sender(peers, outbound_src, fault_sink);

        Self {
            rank,
            num_peers,
            outbound: Some(outbound),
            inbox_sink,
            inbox,
            faults,
            send_thread: Some(send_thread),
        }
    }

    fn start_serial_sender(
        peers: Vec<SocketAddr>,
        outbound_src: Receiver<(usize, Vec<u8>)>,
        faults: Sender<io::Error>,
    ) -> JoinHandle<()> {
        thread::spawn(move || {
            let mut table: HashMap<usize, TcpStream> = HashMap::new();

            for (rank, message) in outbound_src {
                let result = match table.get_mut(&rank) {
                    Some(client) => Self::write_acknowledged(client, &message),
                    None => Self::connect_with_retry(peers[rank]).and_then(|mut client| {
                        let result = Self::write_acknowledged(&mut client, &message);
                        table.insert(rank, client);
                        result
                    }),
                };
                if let Err(e) = result {
                    error!("Failed to send message to {}: {}", peers[rank], e);
                    let _ = faults.send(e);
                    return;
                }
            }
        })
    }

    fn write_acknowledged(client: &mut TcpStream, message: &[u8]) -> io::Result<()> {
        util::write_frame(client, message)?;
        let ack = util::read_u64(client)?;

        if ack != message.len() as u64 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("sent {} bytes but receiver acknowledged {}", message.len(), ack),
            ));
        }
        Ok(())
    }

    fn start_listener(listener: TcpListener, inbox_sink: Sender<Envelope>) -> JoinHandle<()> {
        thread::spawn(move || {
            if let Ok(addr) = listener.local_addr() {
                info!("Listening to: {}", addr);
            }
            for stream in listener.incoming() {
                match stream {
                    Ok(stream) => {
                        Self::handle_connection(stream, inbox_sink.clone());
                    }
                    Err(e) => error!("Failed to accept connection: {}", e),
                }
            }
        })
    }

    fn handle_connection(mut stream: TcpStream, inbox_sink: Sender<Envelope>) -> JoinHandle<()> {
        let remote = stream.peer_addr().ok();
        info!("Receiving connection from {:?}", remote);

        thread::spawn(move || loop {
            let bytes = match util::read_frame(&mut stream) {
                Ok(bytes) => bytes,
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => {
                    error!("Connection from {:?} failed: {}", remote, e);
                    break;
                }
            };
            let envelope: Envelope = match codec::decode(&bytes) {
                Ok(envelope) => envelope,
                Err(e) => {
                    error!("Dropping connection from {:?}: {}", remote, e);
                    break;
                }
            };
            if inbox_sink.send(envelope).is_err() {
                break;
            }
            if let Err(e) = stream.write_all(&(bytes.len() as u64).to_le_bytes()) {
                error!("Failed to acknowledge {:?}: {}", remote, e);
                break;
            }
        })
    }

    fn connect_with_retry(addr: SocketAddr) -> io::Result<TcpStream> {
        let attempt = || -> io::Result<TcpStream> {
            let stream = TcpStream::connect(addr)?;
            stream.set_nodelay(true)?;
            Ok(stream)
        };
        ExponentialBackoff::new(RETRY_WAIT_MS, RETRY_MAX_WAIT_MS, 2)
            .take(CONNECT_ATTEMPTS)
            .retry(attempt, |e: &io::Error, delay| {
                warn!("Connect to {} failed ({}), retrying in {:?}", addr, e, delay);
                thread::sleep(delay)
            })
            .unwrap_or_else(|| Err(io::Error::new(io::ErrorKind::Other, "no connection attempts")))
    }

    fn fault(&self) -> Error {
        match self.faults.try_recv() {
            Ok(e) => Error::Io(e),
            Err(_) => Error::Disconnected,
        }
    }
}

impl Transport for TcpTransport {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.num_peers
    }

    fn send(&self, rank: usize, tag: Tag, message: Vec<u8>) -> Result<(), Error> {
        let envelope = Envelope {
            source: self.rank,
            tag,
            data: message,
        };
        if rank == self.rank {
            return self.inbox_sink.send(envelope).map_err(|_| Error::Disconnected);
        }
        if let Ok(e) = self.faults.try_recv() {
            return Err(Error::Io(e));
        }
        let bytes = codec::encode(&envelope)?;

        match self.outbound.as_ref() {
            Some(outbound) => outbound.send((rank, bytes)).map_err(|_| self.fault()),
            None => Err(Error::Disconnected),
        }
    }

    fn recv(&self) -> Result<Envelope, Error> {
        crossbeam_channel::select! {
            recv(self.inbox) -> envelope => envelope.map_err(|_| Error::Disconnected),
            recv(self.faults) -> fault => Err(fault.map(Error::Io).unwrap_or(Error::Disconnected)),
        }
    }

    fn try_recv(&self) -> Result<Option<Envelope>, Error> {
        match self.inbox.try_recv() {
            Ok(envelope) => Ok(Some(envelope)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(Error::Disconnected),
        }
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        // Closing the outbound channel lets the sender thread drain whatever
        // is still queued and exit.
        self.outbound.take();

        if let Some(handle) = self.send_thread.take() {
            if handle.join().is_err() {
                error!("Sender thread for rank {} panicked", self.rank);
            }
        }
    }
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::TcpTransport;
    use crate::message::comm::Transport;
    use std::net::TcpListener;

    #[test]
    fn envelopes_cross_a_localhost_connection() {
        let listeners: Vec<_> = (0..2).map(|_| TcpListener::bind("127.0.0.1:0").unwrap()).collect();
        let peers: Vec<_> = listeners.iter().map(|l| l.local_addr().unwrap()).collect();
        let mut transports: Vec<_> = listeners
            .into_iter()
            .enumerate()
            .map(|(rank, l)| TcpTransport::from_listener(rank, l, peers.clone()))
            .collect();
        let b = transports.pop().unwrap();
        let a = transports.pop().unwrap();

        a.send(1, 4, b"first".to_vec()).unwrap();
        a.send(1, 4, b"second".to_vec()).unwrap();
        a.send(0, 9, b"self".to_vec()).unwrap();

        let first = b.recv().unwrap();
        let second = b.recv().unwrap();
        assert_eq!((first.source, first.tag, first.data), (0, 4, b"first".to_vec()));
        assert_eq!(second.data, b"second".to_vec());
        assert_eq!(a.recv().unwrap().data, b"self".to_vec());
    }
}
