use crate::region::DIM;
use crate::signature::Split;




/// The coordinate of a cell flagged for refinement.
pub type Flag = [i64; DIM];




#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]

/**
 * A view of a contiguous range in a flag buffer owned elsewhere. The buffer
 * is allocated once per regridding pass; tasks hold only these views, and
 * the views held by live tasks never overlap.
 */
pub struct FlagList {
    start: usize,
    len: usize,
}




// ============================================================================
impl FlagList {

    /**
     * A view covering the whole of a buffer with `len` flags.
     */
    pub fn whole(len: usize) -> Self {
        Self { start: 0, len }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn get<'a>(&self, buffer: &'a [Flag]) -> &'a [Flag] {
        &buffer[self.start..self.start + self.len]
    }

    pub fn get_mut<'a>(&self, buffer: &'a mut [Flag]) -> &'a mut [Flag] {
        &mut buffer[self.start..self.start + self.len]
    }

    /**
     * Reorder the viewed flags in place so that those lying left of the
     * split plane come first, and return views of the two halves. The
     * partition is not stable.
     */
    pub fn partition(&self, buffer: &mut [Flag], split: Split) -> (Self, Self) {
        let flags = self.get_mut(buffer);
        let mut i = 0;
        let mut j = flags.len();

        while i < j {
            if flags[i][split.axis] < split.index {
                i += 1;
            } else {
                j -= 1;
                flags.swap(i, j);
            }
        }

        let left = Self { start: self.start, len: i };
        let right = Self { start: self.start + i, len: self.len - i };
        (left, right)
    }
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::{Flag, FlagList};
    use crate::signature::Split;

    #[test]
    fn partition_separates_flags_around_the_plane() {
        let mut buffer: Vec<Flag> = vec![[5, 0, 0], [1, 0, 0], [7, 1, 0], [0, 2, 0], [4, 0, 0], [3, 3, 0]];
        let whole = FlagList::whole(buffer.len());
        let (l, r) = whole.partition(&mut buffer, Split { axis: 0, index: 4 });

        assert_eq!(l.len(), 3);
        assert_eq!(r.len(), 3);
        assert!(l.get(&buffer).iter().all(|f| f[0] < 4));
        assert!(r.get(&buffer).iter().all(|f| f[0] >= 4));
    }

    #[test]
    fn nested_partitions_stay_inside_their_parent_range() {
        let mut buffer: Vec<Flag> = (0..10).map(|i| [i % 5, i, 0]).collect();
        let whole = FlagList::whole(buffer.len());
        let (l, r) = whole.partition(&mut buffer, Split { axis: 1, index: 6 });
        let (ll, lr) = l.partition(&mut buffer, Split { axis: 0, index: 2 });

        assert_eq!(ll.len() + lr.len(), l.len());
        assert!(ll.get(&buffer).iter().all(|f| f[1] < 6 && f[0] < 2));
        assert!(lr.get(&buffer).iter().all(|f| f[1] < 6 && f[0] >= 2));
        assert!(r.get(&buffer).iter().all(|f| f[1] >= 6));
    }

    #[test]
    fn partition_of_one_sided_list_leaves_an_empty_half() {
        let mut buffer: Vec<Flag> = vec![[1, 1, 1], [2, 2, 2]];
        let (l, r) = FlagList::whole(2).partition(&mut buffer, Split { axis: 2, index: 9 });
        assert_eq!(l.len(), 2);
        assert!(r.is_empty());
    }
}
