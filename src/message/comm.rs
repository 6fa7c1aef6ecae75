use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::tags::Tag;




#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]

/// A message in flight: the sender's rank, the tag it was sent on, and an
/// opaque payload.
pub struct Envelope {
    pub source: usize,
    pub tag: Tag,
    pub data: Vec<u8>,
}

/// Interface for a group of processes that can exchange tagged messages over
/// a network. The underlying transport can in principle be TCP, in-process
/// channels, or a higher level abstraction like MPI.
///
pub trait Transport {
    /// Must be implemented to return the rank of this process within the
    /// transport.
    fn rank(&self) -> usize;

    /// Must be implemented to return the number of peer processes reachable
    /// through this transport, including this one.
    fn size(&self) -> usize;

    /// Must be implemented to send a message to a peer. This method must
    /// return immediately, in other words it is not allowed to block until a
    /// matching receive is posted. Messages from one sender to one receiver
    /// must arrive in the order they were sent.
    fn send(&self, rank: usize, tag: Tag, message: Vec<u8>) -> Result<(), Error>;

    /// Must be implemented to receive the next message from any of the
    /// peers. This method is allowed to block until a message is ready.
    fn recv(&self) -> Result<Envelope, Error>;

    /// Must be implemented to receive the next message if one has already
    /// arrived, without blocking.
    fn try_recv(&self) -> Result<Option<Envelope>, Error>;
}
