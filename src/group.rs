use serde::{Deserialize, Serialize};

use crate::message::util;




#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]

/**
 * The number of flags a process holds inside a task's region. Field order
 * makes the derived ordering sort by count first, then by global rank.
 */
pub struct FlagCount {
    pub count: u64,
    pub rank: usize,
}




#[derive(Clone, Debug, PartialEq, Eq)]

/**
 * An ordered list of global ranks cooperating on one task, and the position
 * of this process within it. The first member is the group's coordinator.
 * Groups shrink as members run out of flags, but never grow.
 */
pub struct ProcessGroup {
    ranks: Vec<usize>,
    rank: usize,
}




// ============================================================================
impl ProcessGroup {

    pub fn new(ranks: Vec<usize>, rank: usize) -> Self {
        assert!(rank < ranks.len(), "local index {} outside group of {}", rank, ranks.len());
        Self { ranks, rank }
    }

    /// A group containing only the given global rank.
    pub fn single(global: usize) -> Self {
        Self::new(vec![global], 0)
    }

    pub fn size(&self) -> usize {
        self.ranks.len()
    }

    /// The local position of this process in the group.
    pub fn rank(&self) -> usize {
        self.rank
    }

    /// The global rank of the member at local position `index`.
    pub fn global(&self, index: usize) -> usize {
        self.ranks[index]
    }

    pub fn coordinator(&self) -> usize {
        self.ranks[0]
    }

    pub fn is_coordinator(&self) -> bool {
        self.rank == 0
    }

    /// Dimension of the smallest hypercube holding every member.
    pub fn depth(&self) -> usize {
        util::ceil_log2(self.size())
    }

    /**
     * Reorder the members by descending flag count, dropping those with no
     * flags. The returned ranks are global; the process with the most flags
     * comes first and becomes the new coordinator. The counts are expected
     * in ascending order, as the group coordinator sorts them.
     */
    pub fn surviving_ranks(counts: &[FlagCount]) -> Vec<usize> {
        counts
            .iter()
            .rev()
            .filter(|c| c.count > 0)
            .map(|c| c.rank)
            .collect()
    }
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::{FlagCount, ProcessGroup};

    #[test]
    fn depth_is_ceil_log2_of_size() {
        assert_eq!(ProcessGroup::single(7).depth(), 0);
        assert_eq!(ProcessGroup::new(vec![0, 1], 0).depth(), 1);
        assert_eq!(ProcessGroup::new(vec![0, 1, 2], 2).depth(), 2);
        assert_eq!(ProcessGroup::new((0..8).collect(), 0).depth(), 3);
        assert_eq!(ProcessGroup::new((0..9).collect(), 0).depth(), 4);
    }

    #[test]
    fn survivors_are_ordered_by_descending_count() {
        let mut counts = vec![
            FlagCount { count: 4, rank: 0 },
            FlagCount { count: 0, rank: 1 },
            FlagCount { count: 9, rank: 2 },
            FlagCount { count: 4, rank: 3 },
        ];
        counts.sort();
        assert_eq!(ProcessGroup::surviving_ranks(&counts), vec![2, 3, 0]);
    }

    #[test]
    fn all_zero_counts_leave_no_survivors() {
        let counts = vec![FlagCount { count: 0, rank: 0 }, FlagCount { count: 0, rank: 1 }];
        assert!(ProcessGroup::surviving_ranks(&counts).is_empty());
    }
}
