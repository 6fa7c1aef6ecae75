use std::collections::{HashSet, VecDeque};

use log::{debug, info, trace, warn};
use serde::de::DeserializeOwned;

use crate::config::{RegridConfig, Tolerances};
use crate::error::Error;
use crate::flags::{Flag, FlagList};
use crate::group::ProcessGroup;
use crate::message::channel::MessageChannel;
use crate::message::comm::Transport;
use crate::region::Region;
use crate::tags::{Tag, TagPool, ROOT_TAG};
use crate::task::{ChildSpec, Status, Step, Task, TaskId};

const ROOT: TaskId = 0;




/**
 * The state every task on one rank shares while it runs: the message
 * channel, the tag pool, and the flag buffer whose subranges the tasks
 * partition in place.
 */
pub struct Resources<T> {
    pub channel: MessageChannel<T>,
    pub tags: TagPool,
    pub flags: Vec<Flag>,
    pub tolerances: Tolerances,
}




/**
 * Drives one rank's share of a regridding pass. Tasks live in an arena and
 * are run cooperatively on the calling thread: a task runs until it
 * terminates or must wait, and the controller then picks the next runnable
 * task, most recently scheduled first. When nothing is runnable it blocks on
 * the message channel until a receive completes, and resumes its owner.
 *
 * Tasks parked for tags never make the controller block: if nothing else
 * can run and no message is waiting, the oldest of them splits on its own
 * tag instead.
 */
pub struct Controller<T> {
    res: Resources<T>,
    tasks: Vec<Task>,
    immediate: Vec<TaskId>,
    tag_waiters: VecDeque<TaskId>,
    tag_waits: usize,
}




// ============================================================================
impl<T: Transport> Controller<T> {

    pub fn new(transport: T, config: RegridConfig) -> Result<Self, Error> {
        config.validate()?;

        let tags = TagPool::new(transport.rank(), transport.size(), config.tag_capacity);

        Ok(Self {
            res: Resources {
                channel: MessageChannel::new(transport),
                tags,
                flags: Vec::new(),
                tolerances: config.tolerances,
            },
            tasks: Vec::new(),
            immediate: Vec::new(),
            tag_waiters: VecDeque::new(),
            tag_waits: 0,
        })
    }

    pub fn rank(&self) -> usize {
        self.res.channel.rank()
    }

    pub fn size(&self) -> usize {
        self.res.channel.size()
    }

    /// Number of tags currently allocated from this rank's pool. Zero
    /// between passes.
    pub fn tags_in_use(&self) -> usize {
        self.res.tags.in_use()
    }

    /// Number of tasks created by the last pass on this rank.
    pub fn num_tasks(&self) -> usize {
        self.tasks.len()
    }

    /// Number of times a task of the last pass found the tag pool empty.
    pub fn tag_waits(&self) -> usize {
        self.tag_waits
    }

    /// The flags handed to the last pass, reordered so that every accepted
    /// patch's flags are contiguous.
    pub fn flags(&self) -> &[Flag] {
        &self.res.flags
    }

    /**
     * Compute patches covering the flagged cells of `region`. Every rank in
     * `ranks` must call this with the same region and rank list, each
     * passing its own share of the flags. The first rank listed is the home
     * rank: it receives `Some(patches)`, every other rank `None`.
     *
     * If the pass fails on this rank, the other ranks in `ranks` are told
     * and fail with `Error::Aborted`. A controller should not be reused
     * after an error.
     */
    pub fn regrid(&mut self, region: Region, flags: Vec<Flag>, ranks: &[usize]) -> Result<Option<Vec<Region>>, Error> {
        let me = self.rank();
        let mut seen = HashSet::new();

        for &rank in ranks {
            if rank >= self.size() {
                return Err(Error::UnknownRank { rank, size: self.size() });
            }
            if !seen.insert(rank) {
                return Err(Error::DuplicateRank(rank));
            }
        }
        let local = ranks
            .iter()
            .position(|&rank| rank == me)
            .ok_or(Error::RankNotInGroup { rank: me })?;

        let result = self.pass(region, flags, ranks, local);

        match &result {
            Err(Error::Aborted { .. }) | Ok(_) => {}
            Err(e) => {
                warn!("[{}] regrid failed: {}", me, e);
                self.res.channel.abort(ranks);
            }
        }
        result
    }

    fn pass(&mut self, region: Region, flags: Vec<Flag>, ranks: &[usize], local: usize) -> Result<Option<Vec<Region>>, Error> {
        let me = self.rank();

        if let Some(&flag) = flags.iter().find(|flag| !region.contains(**flag)) {
            return Err(Error::FlagOutsideRegion { flag, region });
        }
        info!("[{}] regrid {} with {} local flags on {} ranks", me, region, flags.len(), ranks.len());

        self.tasks.clear();
        self.immediate.clear();
        self.tag_waiters.clear();
        self.tag_waits = 0;

        let list = FlagList::whole(flags.len());
        let group = ProcessGroup::new(ranks.to_vec(), local);
        let home = group.coordinator();

        self.res.flags = flags;
        self.tasks.push(Task::new(ROOT, region, list, group, ROOT_TAG, None, Some(home)));
        self.schedule(ROOT);
        self.run()?;

        let patches = self.collect(home)?;

        debug_assert_eq!(self.res.tags.in_use(), 0);
        debug_assert!(self.res.channel.is_idle());

        if let Some(patches) = &patches {
            info!(
                "[{}] regrid produced {} patches from {} tasks ({} waits for tags)",
                me, patches.len(), self.tasks.len(), self.tag_waits
            );
        }
        Ok(patches)
    }

    /// Run tasks until none is runnable, none is waiting for tags, and no
    /// receive is outstanding.
    fn run(&mut self) -> Result<(), Error> {
        loop {
            while let Some(id) = self.immediate.pop() {
                self.tasks[id].dequeue();
                self.resume(id)?;
            }
            if !self.tag_waiters.is_empty() {
                let woken = self.res.channel.poll()?;

                if woken.is_empty() {
                    self.unpark();
                }
                for owner in woken {
                    self.schedule(owner);
                }
                continue;
            }
            if self.res.channel.outstanding() == 0 {
                break;
            }
            for owner in self.res.channel.wait_any()? {
                self.schedule(owner);
            }
        }
        Ok(())
    }

    /// Let the longest-waiting task go ahead without fresh tags. Its
    /// ancestors on this rank may hold every tag, so waiting longer could
    /// leave this rank and its peers blocked for good.
    fn unpark(&mut self) {
        if let Some(waiter) = self.tag_waiters.pop_front() {
            debug!("[{}] no tags free and nothing to run, task {} splits on its own tag", self.rank(), waiter);
            self.tasks[waiter].split_on_own_tag();
            self.schedule(waiter);
        }
    }

    fn schedule(&mut self, id: TaskId) {
        if self.tasks[id].enqueue() {
            self.immediate.push(id);
        }
    }

    fn resume(&mut self, id: TaskId) -> Result<(), Error> {
        match self.tasks[id].resume(&mut self.res)? {
            Step::Suspend => {}
            Step::AwaitTags => {
                self.tag_waits += 1;
                self.tag_waiters.push_back(id);
            }
            Step::Spawn { left, right, sequential } => {
                self.spawn(id, left, right, sequential);
            }
            Step::Terminated { freed_tags } => {
                if freed_tags {
                    trace!("[{}] tags freed, waking {} waiting tasks", self.rank(), self.tag_waiters.len());

                    while let Some(waiter) = self.tag_waiters.pop_front() {
                        self.schedule(waiter);
                    }
                }
                self.report(id);
            }
        }
        Ok(())
    }

    fn spawn(&mut self, parent: TaskId, left: ChildSpec, right: ChildSpec, sequential: bool) {
        let group = self.tasks[parent].group().clone();
        let upstream = Some(group.coordinator());
        let l = self.tasks.len();
        let r = l + 1;

        trace!("[{}] task {} spawns {} over {} and {} over {}", self.rank(), parent, l, left.region, r, right.region);

        let mut lt = Task::new(l, left.region, left.flags, group.clone(), left.tag, Some(parent), upstream);
        let mut rt = Task::new(r, right.region, right.flags, group, right.tag, Some(parent), upstream);
        lt.set_sibling(r);
        rt.set_sibling(l);

        if sequential {
            rt.hold();
        }
        self.tasks.push(lt);
        self.tasks.push(rt);
        self.tasks[parent].set_children(l, r);

        // The run queue is a stack, so the left child runs first.
        if !sequential {
            self.schedule(r);
        }
        self.schedule(l);
    }

    /// Hand a terminated task's result to its parent. Then start a sibling
    /// that was held back for it, or wake the parent once both of its
    /// children are done.
    fn report(&mut self, id: TaskId) {
        let parent = match self.tasks[id].parent() {
            Some(parent) => parent,
            None => return,
        };
        let result = self.tasks[id].take_result();
        self.tasks[parent].deliver(id, result, &mut self.res);

        match self.tasks[id].sibling() {
            Some(sibling) => {
                if self.tasks[sibling].release() {
                    self.schedule(sibling);
                } else if self.tasks[sibling].status() == Status::Terminated {
                    self.schedule(parent);
                }
            }
            None => self.schedule(parent),
        }
    }

    /// Bring the root task's patches to the home rank.
    fn collect(&mut self, home: usize) -> Result<Option<Vec<Region>>, Error> {
        let me = self.rank();
        let root = self.tasks[ROOT].take_result();

        if me != home {
            return Ok(None);
        }
        if root.coordinator == me {
            return Ok(Some(root.patches));
        }
        debug!("[{}] collecting patches from root coordinator {}", me, root.coordinator);

        let count: u64 = self.receive(root.coordinator, root.tag)?;
        let patches: Vec<Region> = self.receive(root.coordinator, root.tag)?;
        assert_eq!(patches.len() as u64, count, "root coordinator announced {} patches but sent {}", count, patches.len());

        Ok(Some(patches))
    }

    fn receive<V: DeserializeOwned>(&mut self, source: usize, tag: Tag) -> Result<V, Error> {
        let handle = self.res.channel.post_recv(source, tag, ROOT);

        loop {
            if let Some(value) = self.res.channel.take_value(handle)? {
                return Ok(value);
            }
            self.res.channel.wait_any()?;
        }
    }
}
