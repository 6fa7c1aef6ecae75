//! One node of the recursive bisection, written as an explicit state machine
//! so that thousands of them can be interleaved on a single thread. A task
//! runs until it finishes or until it needs a message that has not arrived
//! (or a pair of tags that are not free), and then hands control back to the
//! controller, remembering in its `Status` where to pick up again.
//!
//! A split normally gives its two children fresh tags from the pool, so they
//! run side by side. When the pool is empty the split waits for tags to come
//! back. If its rank runs out of other work first, the controller lets it
//! split on its own tag instead. Its children then share that tag and run
//! one after the other, and the second is held until the first terminates.

use std::mem;

use log::{debug, trace};
use serde::{Deserialize, Serialize};

use crate::collective::{Collective, Link, Progress, Reduction};
use crate::config::Tolerances;
use crate::controller::Resources;
use crate::error::Error;
use crate::flags::FlagList;
use crate::group::{FlagCount, ProcessGroup};
use crate::message::channel::OpHandle;
use crate::message::comm::Transport;
use crate::region::Region;
use crate::signature::{choose_split, Signature, Split};
use crate::tags::Tag;

/// Index of a task in the controller's arena.
pub type TaskId = usize;

const LEFT: usize = 0;
const RIGHT: usize = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]

/// Where a task resumes. States are visited in declaration order, except
/// that signature summing alternates with communicating, and that tasks in
/// a group of one skip straight from `New` to `WaitingForChildren`.
pub enum Status {
    New,
    GatheringFlagCount,
    BroadcastingFlagCount,
    CommunicatingSignatures,
    SummingSignatures,
    WaitingForTags,
    BroadcastingChildTasks,
    WaitingForChildren,
    WaitingForPatchCount,
    WaitingForPatches,
    Terminated,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]

/// The coordinator's decision for a task, broadcast to the rest of its
/// group so every member creates the same children. A `sequential` split
/// runs its children on one tag, left subtree first.
pub enum ChildTasks {
    Accepted,
    Split {
        split: Split,
        left: Region,
        right: Region,
        ltag: Tag,
        rtag: Tag,
        sequential: bool,
    },
}

/// Everything needed to create a child task.
pub struct ChildSpec {
    pub region: Region,
    pub flags: FlagList,
    pub tag: Tag,
}

/// What `Task::resume` asks of the controller.
pub enum Step {
    /// Waiting on a posted receive; resume when its owner is woken.
    Suspend,
    /// Park on the tag-wait queue; resume when tags are freed, or after
    /// `split_on_own_tag`.
    AwaitTags,
    /// Create these two children and schedule them, or only the left one if
    /// `sequential`. Resume when both have terminated.
    Spawn {
        left: ChildSpec,
        right: ChildSpec,
        sequential: bool,
    },
    /// Finished. `freed_tags` is set if tags went back to the pool.
    Terminated { freed_tags: bool },
}

/// The part of a terminated child its parent needs: which rank holds the
/// child's patches, the tag they would arrive on, and the patches themselves
/// if they are held on this rank.
pub struct ChildResult {
    pub coordinator: usize,
    pub tag: Tag,
    pub patches: Vec<Region>,
}




/**
 * Return true if the patches found below a split are worth keeping, that is
 * if they cover less than `tol_b` of the split region.
 */
pub fn keeps_children(parent_volume: u64, child_volume: u64, tol_b: f64) -> bool {
    (child_volume as f64) / (parent_volume as f64) < tol_b
}




pub struct Task {
    id: TaskId,
    status: Status,
    region: Region,
    flags: FlagList,
    group: ProcessGroup,
    tag: Tag,
    coordinator: usize,
    upstream: Option<usize>,
    queued: bool,
    held: bool,

    parent: Option<TaskId>,
    sibling: Option<TaskId>,
    children_ids: [Option<TaskId>; 2],

    collective: Collective,
    counts: Vec<FlagCount>,
    signature: Option<Signature>,
    incoming: Option<Signature>,
    total: u64,
    children: ChildTasks,
    owned_tags: Option<(Tag, Tag)>,

    results: [Option<ChildResult>; 2],
    count_receives: [Option<OpHandle>; 2],
    patch_receives: [Option<OpHandle>; 2],
    expected: [usize; 2],
    patches: Vec<Region>,
}




// ============================================================================
impl Task {

    /**
     * Create a task over `region` and the flags viewed by `flags`, to be run
     * by `group`. Messages for this task travel on `tag`. When the task
     * terminates, its coordinator sends the resulting patches to `upstream`
     * unless that is the coordinator itself.
     */
    pub fn new(
        id: TaskId,
        region: Region,
        flags: FlagList,
        group: ProcessGroup,
        tag: Tag,
        parent: Option<TaskId>,
        upstream: Option<usize>,
    ) -> Self {
        Self {
            id,
            status: Status::New,
            region,
            flags,
            coordinator: group.coordinator(),
            group,
            tag,
            upstream,
            queued: false,
            held: false,
            parent,
            sibling: None,
            children_ids: [None, None],
            collective: Collective::default(),
            counts: Vec::new(),
            signature: None,
            incoming: None,
            total: 0,
            children: ChildTasks::Accepted,
            owned_tags: None,
            results: [None, None],
            count_receives: [None, None],
            patch_receives: [None, None],
            expected: [0, 0],
            patches: Vec::new(),
        }
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn group(&self) -> &ProcessGroup {
        &self.group
    }

    pub fn parent(&self) -> Option<TaskId> {
        self.parent
    }

    pub fn sibling(&self) -> Option<TaskId> {
        self.sibling
    }

    pub fn set_sibling(&mut self, sibling: TaskId) {
        self.sibling = Some(sibling)
    }

    pub fn set_children(&mut self, left: TaskId, right: TaskId) {
        self.children_ids = [Some(left), Some(right)]
    }

    /// Mark the task as sitting in the run queue. Returns false if it
    /// already was.
    pub fn enqueue(&mut self) -> bool {
        !mem::replace(&mut self.queued, true)
    }

    pub fn dequeue(&mut self) {
        self.queued = false
    }

    /// Keep a second child of a sequential split from running until its
    /// sibling has terminated.
    pub fn hold(&mut self) {
        self.held = true
    }

    /// Lift a hold. Returns false if the task was not held.
    pub fn release(&mut self) -> bool {
        mem::replace(&mut self.held, false)
    }

    /**
     * Hand a terminated child's result to this task. A coordinator whose
     * child's patches live on another rank posts both receives for them now,
     * before anything else can be posted on the child's tag.
     */
    pub fn deliver<T: Transport>(&mut self, child: TaskId, result: ChildResult, res: &mut Resources<T>) {
        let side = match self.children_ids.iter().position(|&c| c == Some(child)) {
            Some(side) => side,
            None => panic!("task {} is not a child of task {}", child, self.id),
        };

        if self.group.is_coordinator() && result.coordinator != res.channel.rank() {
            self.count_receives[side] = Some(res.channel.post_recv(result.coordinator, result.tag, self.id));
            self.patch_receives[side] = Some(res.channel.post_recv(result.coordinator, result.tag, self.id));
        }
        self.results[side] = Some(result);
    }

    /**
     * Called on a task parked for tags when its rank has nothing else to
     * run. Rather than wait on tags that may be held by its own ancestors,
     * the task lets its children share its tag and run one at a time.
     */
    pub fn split_on_own_tag(&mut self) {
        assert_eq!(self.status, Status::WaitingForTags, "task {} is not waiting for tags", self.id);

        if let ChildTasks::Split { ltag, rtag, sequential, .. } = &mut self.children {
            *ltag = self.tag;
            *rtag = self.tag;
            *sequential = true;
        }
        self.status = Status::BroadcastingChildTasks;
    }

    /// Take this task's result once it has terminated.
    pub fn take_result(&mut self) -> ChildResult {
        assert_eq!(self.status, Status::Terminated, "result taken from unfinished task {}", self.id);

        ChildResult {
            coordinator: self.coordinator,
            tag: self.tag,
            patches: mem::take(&mut self.patches),
        }
    }

    /**
     * Run this task until it terminates or must wait. The returned step says
     * which, and what the controller should do about it.
     */
    pub fn resume<T: Transport>(&mut self, res: &mut Resources<T>) -> Result<Step, Error> {
        let me = res.channel.rank();

        loop {
            trace!("[{}] task {} in {:?}", me, self.id, self.status);

            match self.status {
                Status::New => {
                    if self.group.size() == 1 {
                        self.signature = Some(Signature::compute(&self.region, self.flags.get(&res.flags)));
                        self.decide(&res.tolerances);
                        return self.conclude(res);
                    }
                    self.counts = vec![FlagCount { count: self.flags.len() as u64, rank: me }];
                    self.collective.reset();
                    self.status = Status::GatheringFlagCount;
                }

                Status::GatheringFlagCount => {
                    let link = Link { group: &self.group, tag: self.tag, owner: self.id };

                    match self.collective.reduce(&mut res.channel, &link, &self.counts)? {
                        Reduction::Pending => return Ok(Step::Suspend),
                        Reduction::Received(more) => self.counts.extend(more),
                        Reduction::Done => {
                            if self.group.is_coordinator() {
                                self.counts.sort();
                            }
                            self.collective.reset();
                            self.status = Status::BroadcastingFlagCount;
                        }
                    }
                }

                Status::BroadcastingFlagCount => {
                    let link = Link { group: &self.group, tag: self.tag, owner: self.id };

                    match self.collective.broadcast(&mut res.channel, &link, &mut self.counts)? {
                        Progress::Pending => return Ok(Step::Suspend),
                        Progress::Done => {
                            if !self.shrink_group(me) {
                                return self.finish(res);
                            }
                            self.signature = Some(Signature::compute(&self.region, self.flags.get(&res.flags)));
                            self.collective.reset();
                            self.status = Status::CommunicatingSignatures;
                        }
                    }
                }

                Status::CommunicatingSignatures => {
                    let link = Link { group: &self.group, tag: self.tag, owner: self.id };
                    let signature = match &self.signature {
                        Some(signature) => signature,
                        None => panic!("task {} reduces a signature it never computed", self.id),
                    };

                    match self.collective.reduce(&mut res.channel, &link, signature)? {
                        Reduction::Pending => return Ok(Step::Suspend),
                        Reduction::Received(other) => {
                            self.incoming = Some(other);
                            self.status = Status::SummingSignatures;
                        }
                        Reduction::Done => {
                            self.collective.reset();

                            if self.group.is_coordinator() {
                                self.decide(&res.tolerances);
                            }
                            self.status = match self.children {
                                ChildTasks::Split { .. } if self.group.size() > 1 => Status::WaitingForTags,
                                _ => Status::BroadcastingChildTasks,
                            };
                        }
                    }
                }

                Status::SummingSignatures => {
                    if let (Some(sum), Some(other)) = (self.signature.as_mut(), self.incoming.take()) {
                        sum.accumulate(&other);
                    }
                    self.status = Status::CommunicatingSignatures;
                }

                Status::WaitingForTags => match res.tags.get_pair() {
                    None => {
                        debug!("[{}] task {} waits for tags", me, self.id);
                        return Ok(Step::AwaitTags);
                    }
                    Some((l, r)) => {
                        self.owned_tags = Some((l, r));

                        if let ChildTasks::Split { ltag, rtag, .. } = &mut self.children {
                            *ltag = l;
                            *rtag = r;
                        }
                        self.status = Status::BroadcastingChildTasks;
                    }
                },

                Status::BroadcastingChildTasks => {
                    let link = Link { group: &self.group, tag: self.tag, owner: self.id };

                    match self.collective.broadcast(&mut res.channel, &link, &mut self.children)? {
                        Progress::Pending => return Ok(Step::Suspend),
                        Progress::Done => return self.conclude(res),
                    }
                }

                Status::WaitingForChildren => {
                    // Woken early when a finished child's patches arrive.
                    if self.results.iter().any(Option::is_none) {
                        return Ok(Step::Suspend);
                    }
                    if !self.group.is_coordinator() {
                        return self.finish(res);
                    }
                    self.status = Status::WaitingForPatchCount;
                }

                Status::WaitingForPatchCount => {
                    for side in [LEFT, RIGHT] {
                        if let Some(handle) = self.count_receives[side] {
                            let count: u64 = match res.channel.take_value(handle)? {
                                Some(count) => count,
                                None => return Ok(Step::Suspend),
                            };
                            self.count_receives[side] = None;
                            self.expected[side] = count as usize;
                        }
                    }
                    self.status = Status::WaitingForPatches;
                }

                Status::WaitingForPatches => {
                    for side in [LEFT, RIGHT] {
                        if let Some(handle) = self.patch_receives[side] {
                            let patches: Vec<Region> = match res.channel.take_value(handle)? {
                                Some(patches) => patches,
                                None => return Ok(Step::Suspend),
                            };
                            assert_eq!(
                                patches.len(), self.expected[side],
                                "task {} was promised {} patches but received {}",
                                self.id, self.expected[side], patches.len());

                            self.patch_receives[side] = None;

                            if let Some(result) = self.results[side].as_mut() {
                                result.patches = patches;
                            }
                        }
                    }
                    self.combine(&res.tolerances);
                    return self.finish(res);
                }

                Status::Terminated => panic!("task {} resumed after termination", self.id),
            }
        }
    }

    /**
     * Replace the group by the members that hold flags here, most flags
     * first. Returns false if this process holds none and so leaves the
     * task; it still learns who the new coordinator is.
     */
    fn shrink_group(&mut self, me: usize) -> bool {
        let survivors = ProcessGroup::surviving_ranks(&self.counts);

        match survivors.iter().position(|&r| r == me) {
            Some(local) => {
                if survivors.len() < self.group.size() {
                    debug!(
                        "[{}] task {} group shrinks from {} to {} members",
                        me, self.id, self.group.size(), survivors.len()
                    );
                }
                self.group = ProcessGroup::new(survivors, local);
                self.coordinator = self.group.coordinator();
                true
            }
            None => {
                if let Some(&first) = survivors.first() {
                    self.coordinator = first;
                }
                self.patches.clear();
                false
            }
        }
    }

    /**
     * Coordinator only: trim the region to the flags, then either accept it
     * or choose where to split it. Tags for the children are filled in
     * later, if the group needs them.
     */
    fn decide(&mut self, tolerances: &Tolerances) {
        let signature = match self.signature.take() {
            Some(signature) => signature,
            None => panic!("task {} decided without a signature", self.id),
        };
        self.total = signature.total();

        let trimmed = match signature.bounds(&self.region) {
            Some(trimmed) => trimmed,
            None => {
                self.children = ChildTasks::Accepted;
                return;
            }
        };
        let signature = signature.restrict(&self.region, &trimmed);
        let density = self.total as f64 / trimmed.volume() as f64;
        self.region = trimmed;

        if density >= tolerances.tol_a || trimmed.volume() == 1 {
            debug!("task {} accepts {} at density {:.3}", self.id, trimmed, density);
            self.children = ChildTasks::Accepted;
        } else {
            let split = choose_split(&trimmed, &signature);
            let (left, right) = trimmed.bisect(split.axis, split.index);
            debug!(
                "task {} splits {} at density {:.3} on axis {} at {}",
                self.id, trimmed, density, split.axis, split.index
            );
            self.children = ChildTasks::Split {
                split,
                left,
                right,
                ltag: self.tag,
                rtag: self.tag,
                sequential: false,
            };
        }
        self.signature = Some(signature);
    }

    /// Act on the decision every member now shares: finish with this task's
    /// region as the result, or partition the flags and ask for children.
    fn conclude<T: Transport>(&mut self, res: &mut Resources<T>) -> Result<Step, Error> {
        match self.children {
            ChildTasks::Accepted => {
                if self.group.is_coordinator() && self.total > 0 {
                    self.patches = vec![self.region];
                }
                self.finish(res)
            }
            ChildTasks::Split { split, left, right, ltag, rtag, sequential } => {
                let (lflags, rflags) = self.flags.partition(&mut res.flags, split);
                self.status = Status::WaitingForChildren;

                Ok(Step::Spawn {
                    left: ChildSpec { region: left, flags: lflags, tag: ltag },
                    right: ChildSpec { region: right, flags: rflags, tag: rtag },
                    sequential,
                })
            }
        }
    }

    /// Coordinator only: concatenate the children's patches, unless they
    /// cover so much of this region that the region itself is the better
    /// patch.
    fn combine(&mut self, tolerances: &Tolerances) {
        let patches: Vec<Region> = self
            .results
            .iter_mut()
            .filter_map(Option::take)
            .flat_map(|result| result.patches)
            .collect();
        let covered: u64 = patches.iter().map(Region::volume).sum();

        if keeps_children(self.region.volume(), covered, tolerances.tol_b) {
            self.patches = patches;
        } else {
            debug!(
                "task {} discards {} patches covering {} of {} cells",
                self.id, patches.len(), covered, self.region.volume()
            );
            self.patches = vec![self.region];
        }
    }

    /// Deliver the result upstream if it lives on another rank, and give
    /// back this task's tags.
    fn finish<T: Transport>(&mut self, res: &mut Resources<T>) -> Result<Step, Error> {
        let me = res.channel.rank();
        self.status = Status::Terminated;

        if self.coordinator == me {
            if let Some(target) = self.upstream.filter(|&rank| rank != me) {
                trace!("[{}] task {} sends {} patches to {}", me, self.id, self.patches.len(), target);
                res.channel.send_value(target, self.tag, &(self.patches.len() as u64))?;
                res.channel.send_value(target, self.tag, &self.patches)?;
            }
        }

        let freed_tags = match self.owned_tags.take() {
            Some((l, r)) => {
                res.tags.free(l);
                res.tags.free(r);
                true
            }
            None => false,
        };
        Ok(Step::Terminated { freed_tags })
    }
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::keeps_children;

    #[test]
    fn sparse_children_are_kept() {
        assert!(keeps_children(100, 8, 0.5));
    }

    #[test]
    fn children_covering_most_of_the_parent_are_discarded() {
        assert!(!keeps_children(100, 60, 0.5));
        assert!(!keeps_children(100, 50, 0.5));
    }

    #[test]
    fn exact_tiling_is_discarded_at_unit_tolerance() {
        assert!(!keeps_children(64, 64, 1.0));
        assert!(keeps_children(64, 48, 1.0));
    }
}
