//! Binary-tree reduce and broadcast over a process group, written as
//! resumable state machines. Each call advances the collective as far as it
//! can without blocking; when a receive is still in flight it returns
//! `Pending`, and the caller should yield until the receive's owner is woken
//! by the message channel, then call again.
//!
//! Member `r` of a group of size `p` with `d = ceil(log2(p))`:
//!
//! - reduce, stage `s` with stride `2^(d-1-s)`: members below the stride
//!   receive from `r + stride` (when it exists), members between one and two
//!   strides send to `r - stride` and are finished.
//! - broadcast, stage `s` with stride `2^s`: members below the stride send
//!   to `r + stride` (when it exists), members between one and two strides
//!   receive from `r - stride`.

use serde::{de::DeserializeOwned, Serialize};

use crate::error::Error;
use crate::group::ProcessGroup;
use crate::message::channel::{MessageChannel, OpHandle};
use crate::message::comm::Transport;
use crate::tags::Tag;

/// Stages a collective may run beyond the hypercube depth before it is
/// considered corrupt.
const STAGE_SLACK: usize = 1;

pub enum Progress {
    Pending,
    Done,
}

pub enum Reduction<V> {
    Pending,
    Received(V),
    Done,
}

/// The addressing shared by every message of one collective.
pub struct Link<'a> {
    pub group: &'a ProcessGroup,
    pub tag: Tag,
    pub owner: usize,
}

#[derive(Debug, Default)]
pub struct Collective {
    stage: usize,
    pending: Option<OpHandle>,
}

impl Collective {
    /// Prepare to run another collective. Panics if a receive is in flight.
    pub fn reset(&mut self) {
        assert!(self.pending.is_none(), "collective reset with a receive in flight");
        self.stage = 0;
    }

    fn check_stage(&self, depth: usize) {
        assert!(
            self.stage < depth + STAGE_SLACK,
            "collective reached stage {} in a hypercube of depth {}", self.stage, depth);
    }

    /**
     * Advance a reduction toward the group coordinator. Each contribution
     * received from a partner is handed back as `Received`; the caller must
     * fold it into `value` before calling again, since `value` is what gets
     * forwarded. `Done` means this member has nothing left to do: at the
     * coordinator `value` then holds the complete result.
     */
    pub fn reduce<T, V>(&mut self, channel: &mut MessageChannel<T>, link: &Link, value: &V) -> Result<Reduction<V>, Error>
    where
        T: Transport,
        V: Serialize + DeserializeOwned,
    {
        let size = link.group.size();
        let rank = link.group.rank();
        let depth = link.group.depth();

        if let Some(handle) = self.pending {
            return match channel.take_value(handle)? {
                None => Ok(Reduction::Pending),
                Some(received) => {
                    self.pending = None;
                    self.stage += 1;
                    Ok(Reduction::Received(received))
                }
            };
        }

        self.check_stage(depth);

        while self.stage < depth {
            let stride = 1 << (depth - 1 - self.stage);

            if rank < stride {
                if rank + stride < size {
                    let handle = channel.post_recv(link.group.global(rank + stride), link.tag, link.owner);

                    return match channel.take_value(handle)? {
                        Some(received) => {
                            self.stage += 1;
                            Ok(Reduction::Received(received))
                        }
                        None => {
                            self.pending = Some(handle);
                            Ok(Reduction::Pending)
                        }
                    };
                }
                self.stage += 1;
            } else {
                debug_assert!(rank < 2 * stride);
                channel.send_value(link.group.global(rank - stride), link.tag, value)?;
                self.stage = depth;
            }
        }
        Ok(Reduction::Done)
    }

    /**
     * Advance a broadcast from the group coordinator. The coordinator's
     * `value` is sent; on every other member it is overwritten by the value
     * received.
     */
    pub fn broadcast<T, V>(&mut self, channel: &mut MessageChannel<T>, link: &Link, value: &mut V) -> Result<Progress, Error>
    where
        T: Transport,
        V: Serialize + DeserializeOwned,
    {
        let size = link.group.size();
        let rank = link.group.rank();
        let depth = link.group.depth();

        if let Some(handle) = self.pending {
            match channel.take_value(handle)? {
                None => return Ok(Progress::Pending),
                Some(received) => {
                    *value = received;
                    self.pending = None;
                    self.stage += 1;
                }
            }
        }

        self.check_stage(depth);

        while self.stage < depth {
            let stride = 1 << self.stage;

            if rank < stride {
                if rank + stride < size {
                    channel.send_value(link.group.global(rank + stride), link.tag, &*value)?;
                }
                self.stage += 1;
            } else if rank < 2 * stride {
                let handle = channel.post_recv(link.group.global(rank - stride), link.tag, link.owner);

                match channel.take_value(handle)? {
                    Some(received) => {
                        *value = received;
                        self.stage += 1;
                    }
                    None => {
                        self.pending = Some(handle);
                        return Ok(Progress::Pending);
                    }
                }
            } else {
                self.stage += 1;
            }
        }
        Ok(Progress::Done)
    }
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::{Collective, Link, Progress, Reduction};
    use crate::group::ProcessGroup;
    use crate::message::channel::MessageChannel;
    use crate::message::comm::Transport;
    use crate::message::local::LocalTransport;
    use std::thread;

    /// Run a gather-then-broadcast of every member's rank on `size` threads,
    /// with the group listing the global ranks in reverse order.
    fn gather_and_broadcast(size: usize) -> Vec<Vec<usize>> {
        let handles: Vec<_> = LocalTransport::group(size)
            .into_iter()
            .map(|transport| {
                thread::spawn(move || {
                    let me = transport.rank();
                    let ranks: Vec<usize> = (0..size).rev().collect();
                    let local = ranks.iter().position(|&r| r == me).unwrap();
                    let group = ProcessGroup::new(ranks, local);
                    let link = Link { group: &group, tag: 0, owner: 0 };
                    let mut channel = MessageChannel::new(transport);
                    let mut collective = Collective::default();
                    let mut value = vec![me];

                    loop {
                        match collective.reduce(&mut channel, &link, &value).unwrap() {
                            Reduction::Pending => {
                                channel.wait_any().unwrap();
                            }
                            Reduction::Received(more) => value.extend(more),
                            Reduction::Done => break,
                        }
                    }
                    if group.is_coordinator() {
                        value.sort();
                    }
                    collective.reset();

                    while let Progress::Pending = collective.broadcast(&mut channel, &link, &mut value).unwrap() {
                        channel.wait_any().unwrap();
                    }
                    assert!(channel.is_idle());
                    value
                })
            })
            .collect();

        handles.into_iter().map(|h| h.join().unwrap()).collect()
    }

    #[test]
    fn every_member_ends_with_the_full_sorted_gather() {
        for size in 1..=7 {
            let expected: Vec<usize> = (0..size).collect();
            for result in gather_and_broadcast(size) {
                assert_eq!(result, expected, "group of size {}", size);
            }
        }
    }
}
