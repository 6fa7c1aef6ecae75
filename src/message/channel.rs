use std::collections::{HashMap, VecDeque};

use log::{trace, warn};
use serde::{de::DeserializeOwned, Serialize};

use super::codec;
use super::comm::{Envelope, Transport};
use crate::error::Error;
use crate::tags::{Tag, ABORT_TAG};

/// Index of a slot in the channel's table of receive operations.
pub type OpHandle = usize;

enum Operation {
    Vacant,
    Posted { owner: usize },
    Complete { data: Vec<u8> },
}

/// A façade over a `Transport` that lets a cooperative scheduler post
/// receives ahead of time and poll for them later. Incoming messages are
/// matched to posted receives by `(source, tag)`, oldest receive first.
/// Messages arriving before a matching receive is posted are held until one
/// is. Sends are handed straight to the transport, which buffers them, so
/// only receives are ever outstanding.
///
/// Each posted receive records the id of the task that owns it; `wait_any`
/// reports those ids so the scheduler knows which tasks to resume.
///
pub struct MessageChannel<T> {
    transport: T,
    ops: Vec<Operation>,
    free: Vec<OpHandle>,
    posted: HashMap<(usize, Tag), VecDeque<OpHandle>>,
    unexpected: HashMap<(usize, Tag), VecDeque<Vec<u8>>>,
    outstanding: usize,
}

impl<T: Transport> MessageChannel<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            ops: Vec::new(),
            free: Vec::new(),
            posted: HashMap::new(),
            unexpected: HashMap::new(),
            outstanding: 0,
        }
    }

    pub fn rank(&self) -> usize {
        self.transport.rank()
    }

    pub fn size(&self) -> usize {
        self.transport.size()
    }

    pub fn send(&self, rank: usize, tag: Tag, data: Vec<u8>) -> Result<(), Error> {
        trace!("[{}] send {} bytes to {} on tag {}", self.rank(), data.len(), rank, tag);
        self.transport.send(rank, tag, data)
    }

    pub fn send_value<V: Serialize>(&self, rank: usize, tag: Tag, value: &V) -> Result<(), Error> {
        self.send(rank, tag, codec::encode(value)?)
    }

    /// Post a receive for the next message from `source` on `tag`. If such a
    /// message has already arrived, the operation is complete on return.
    pub fn post_recv(&mut self, source: usize, tag: Tag, owner: usize) -> OpHandle {
        let handle = self.request_handle();
        let key = (source, tag);

        match self.unexpected.get_mut(&key).and_then(VecDeque::pop_front) {
            Some(data) => {
                if self.unexpected.get(&key).map_or(false, VecDeque::is_empty) {
                    self.unexpected.remove(&key);
                }
                self.ops[handle] = Operation::Complete { data };
            }
            None => {
                self.ops[handle] = Operation::Posted { owner };
                self.posted.entry(key).or_default().push_back(handle);
                self.outstanding += 1;
            }
        }
        handle
    }

    /// Take the payload of a completed receive and release its slot, or
    /// return `None` if the message has not arrived yet.
    pub fn take(&mut self, handle: OpHandle) -> Option<Vec<u8>> {
        match std::mem::replace(&mut self.ops[handle], Operation::Vacant) {
            Operation::Complete { data } => {
                self.free.push(handle);
                Some(data)
            }
            Operation::Posted { owner } => {
                self.ops[handle] = Operation::Posted { owner };
                None
            }
            Operation::Vacant => panic!("receive operation {} is not in use", handle),
        }
    }

    /// Like `take`, decoding the payload.
    pub fn take_value<V: DeserializeOwned>(&mut self, handle: OpHandle) -> Result<Option<V>, Error> {
        self.take(handle).map(|bytes| codec::decode(&bytes)).transpose()
    }

    /// The number of posted receives whose message has not arrived.
    pub fn outstanding(&self) -> usize {
        self.outstanding
    }

    /// The number of slots ever allocated in the operation table.
    pub fn capacity(&self) -> usize {
        self.ops.len()
    }

    /// True when no receive is pending and no unmatched message is held.
    pub fn is_idle(&self) -> bool {
        self.outstanding == 0 && self.unexpected.is_empty()
    }

    /**
     * Block until at least one outstanding receive completes, then also
     * absorb whatever else has already arrived. Returns the owners of the
     * receives that completed, without duplicates.
     */
    pub fn wait_any(&mut self) -> Result<Vec<usize>, Error> {
        assert!(self.outstanding > 0, "waiting with no outstanding receives would never return");

        let mut woken = Vec::new();

        while woken.is_empty() {
            let envelope = self.transport.recv()?;
            self.deliver(envelope, &mut woken)?;
        }
        self.poll_into(&mut woken)?;
        Ok(woken)
    }

    /// Absorb whatever has already arrived without blocking. Returns the
    /// owners of the receives that completed.
    pub fn poll(&mut self) -> Result<Vec<usize>, Error> {
        let mut woken = Vec::new();
        self.poll_into(&mut woken)?;
        Ok(woken)
    }

    /// Tell every other rank in `ranks` to give up on the current pass.
    /// Ranks that are already gone are skipped.
    pub fn abort(&self, ranks: &[usize]) {
        let me = self.rank();

        for &rank in ranks.iter().filter(|&&rank| rank != me) {
            if let Err(e) = self.transport.send(rank, ABORT_TAG, Vec::new()) {
                warn!("[{}] could not notify rank {} of the abort: {}", me, rank, e);
            }
        }
    }

    fn poll_into(&mut self, woken: &mut Vec<usize>) -> Result<(), Error> {
        while let Some(envelope) = self.transport.try_recv()? {
            self.deliver(envelope, woken)?;
        }
        Ok(())
    }

    fn deliver(&mut self, envelope: Envelope, woken: &mut Vec<usize>) -> Result<(), Error> {
        if envelope.tag == ABORT_TAG {
            return Err(Error::Aborted { rank: envelope.source });
        }
        let key = (envelope.source, envelope.tag);

        match self.posted.get_mut(&key).and_then(VecDeque::pop_front) {
            Some(handle) => {
                if self.posted.get(&key).map_or(false, VecDeque::is_empty) {
                    self.posted.remove(&key);
                }
                let owner = match self.ops[handle] {
                    Operation::Posted { owner } => owner,
                    _ => panic!("receive operation {} matched twice", handle),
                };
                trace!("[{}] matched message from {} on tag {} to task {}", self.rank(), key.0, key.1, owner);
                self.ops[handle] = Operation::Complete { data: envelope.data };
                self.outstanding -= 1;

                if !woken.contains(&owner) {
                    woken.push(owner)
                }
            }
            None => {
                trace!("[{}] holding unexpected message from {} on tag {}", self.rank(), key.0, key.1);
                self.unexpected.entry(key).or_default().push_back(envelope.data)
            }
        }
        Ok(())
    }

    fn request_handle(&mut self) -> OpHandle {
        match self.free.pop() {
            Some(handle) => handle,
            None => {
                self.ops.push(Operation::Vacant);
                self.ops.len() - 1
            }
        }
    }
}
