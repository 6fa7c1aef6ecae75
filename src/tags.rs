/// A small integer distinguishing concurrently in-flight messages that share
/// one transport. Messages are matched by `(source, tag)`.
pub type Tag = u64;

/// Reserved for the root task of a regridding pass, which every rank seeds
/// without communicating.
pub const ROOT_TAG: Tag = 0;

/// Carries no payload. A rank whose pass fails sends it to every other
/// participant, so they fail too instead of waiting on it forever.
pub const ABORT_TAG: Tag = Tag::MAX;




/// Process-wide allocator of communication tags. The pool on rank `r` of a
/// world of `w` ranks owns the tags `slot * w + r` for `slot` in
/// `1..=capacity`, so tags handed out on different ranks never collide and
/// none of them is the root tag.
///
pub struct TagPool {
    free: Vec<Tag>,
    capacity: usize,
    rank: usize,
    world: usize,
}

impl TagPool {
    pub fn new(rank: usize, world: usize, capacity: usize) -> Self {
        let free = (1..=capacity as Tag)
            .rev()
            .map(|slot| slot * world as Tag + rank as Tag)
            .collect();
        Self { free, capacity, rank, world }
    }

    /// Take one tag, or `None` if the pool is exhausted.
    pub fn get(&mut self) -> Option<Tag> {
        self.free.pop()
    }

    /// Take two tags at once, or none at all.
    pub fn get_pair(&mut self) -> Option<(Tag, Tag)> {
        if self.free.len() < 2 {
            return None;
        }
        let a = self.free.pop()?;
        let b = self.free.pop()?;
        Some((a, b))
    }

    /// Return a tag to the pool. Panics if the tag was not allocated here.
    pub fn free(&mut self, tag: Tag) {
        assert!(
            tag != ROOT_TAG && tag % self.world as Tag == self.rank as Tag,
            "tag {} does not belong to the pool on rank {}", tag, self.rank);
        debug_assert!(!self.free.contains(&tag), "tag {} freed twice", tag);
        self.free.push(tag)
    }

    pub fn in_use(&self) -> usize {
        self.capacity - self.free.len()
    }
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::{TagPool, ROOT_TAG};
    use std::collections::HashSet;

    #[test]
    fn pools_on_different_ranks_never_share_a_tag() {
        let mut seen = HashSet::new();
        for rank in 0..3 {
            let mut pool = TagPool::new(rank, 3, 5);
            while let Some(tag) = pool.get() {
                assert_ne!(tag, ROOT_TAG);
                assert!(seen.insert(tag), "tag {} handed out twice", tag);
            }
        }
        assert_eq!(seen.len(), 15);
    }

    #[test]
    fn exhausted_pool_refuses_until_a_tag_is_freed() {
        let mut pool = TagPool::new(1, 2, 3);
        let (a, b) = pool.get_pair().unwrap();
        assert_eq!(pool.in_use(), 2);
        assert!(pool.get_pair().is_none());
        assert_eq!(pool.in_use(), 2);

        pool.free(a);
        let (c, d) = pool.get_pair().unwrap();
        assert!(c != b && d != b);
        assert!(pool.get().is_none());

        pool.free(b);
        pool.free(c);
        pool.free(d);
        assert_eq!(pool.in_use(), 0);
    }

    #[test]
    #[should_panic]
    fn freeing_a_foreign_tag_panics() {
        let mut pool = TagPool::new(0, 2, 4);
        pool.free(3);
    }
}
