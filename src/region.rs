use core::fmt;
use serde::{Deserialize, Serialize};




/// Number of spatial axes. Two-dimensional problems use an extent of one on
/// the last axis.
pub const DIM: usize = 3;




#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]


/**
 * Represents an axis-aligned box in a discrete index space. The lower corner
 * is inclusive and the upper corner is exclusive.
 */
pub struct Region {
    low: [i64; DIM],
    high: [i64; DIM],
}




/**
 * Describes a rectangular region of cells. The index type is signed 64-bit
 * integer.
 */
impl Region {


    pub fn new(low: [i64; DIM], high: [i64; DIM]) -> Self {

        assert!(
            (0..DIM).all(|a| low[a] <= high[a]),
            "region has negative volume");

        Self { low, high }
    }


    /**
     * Return the minimum index (inclusive).
     */
    pub fn low(&self) -> [i64; DIM] {
        self.low
    }


    /**
     * Return the maximum index (exclusive).
     */
    pub fn high(&self) -> [i64; DIM] {
        self.high
    }


    /**
     * Return the number of indexes along the given axis.
     */
    pub fn extent(&self, axis: usize) -> usize {
        (self.high[axis] - self.low[axis]) as usize
    }


    /**
     * Return the number of indexes on each axis.
     */
    pub fn dim(&self) -> [usize; DIM] {
        [self.extent(0), self.extent(1), self.extent(2)]
    }


    /**
     * Return the number of cells in this region.
     */
    pub fn volume(&self) -> u64 {
        self.dim().iter().map(|&n| n as u64).product()
    }


    pub fn is_empty(&self) -> bool {
        self.volume() == 0
    }


    /**
     * Determine whether this region contains the given cell.
     */
    pub fn contains(&self, index: [i64; DIM]) -> bool {
        (0..DIM).all(|a| self.low[a] <= index[a] && index[a] < self.high[a])
    }


    /**
     * Determine whether another region is a subset of this one.
     */
    pub fn contains_region(&self, other: &Self) -> bool {
        (0..DIM).all(|a| other.low[a] >= self.low[a] && other.high[a] <= self.high[a])
    }


    /**
     * Determine whether two regions share at least one cell.
     */
    pub fn overlaps(&self, other: &Self) -> bool {
        (0..DIM).all(|a| self.low[a].max(other.low[a]) < self.high[a].min(other.high[a]))
    }


    /**
     * Return the first axis of greatest extent.
     */
    pub fn longest_axis(&self) -> usize {
        (0..DIM).fold(0, |best, a| if self.extent(a) > self.extent(best) { a } else { best })
    }


    /**
     * Return twice the distance from the given index to the geometric center
     * of this region along an axis. Doubling keeps the measure integral.
     */
    pub fn center_distance2(&self, axis: usize, index: i64) -> i64 {
        (2 * index - self.low[axis] - self.high[axis]).abs()
    }


    /**
     * Bisect this region with a plane perpendicular to `axis`. Cells with
     * `index[axis] < at` go to the left region. The plane must lie strictly
     * inside the region so that both halves are non-empty.
     */
    pub fn bisect(&self, axis: usize, at: i64) -> (Self, Self) {
        assert!(
            self.low[axis] < at && at < self.high[axis],
            "split plane {} is not interior to {} on axis {}", at, self, axis);

        let mut left = *self;
        let mut right = *self;
        left.high[axis] = at;
        right.low[axis] = at;
        (left, right)
    }
}




// ============================================================================
impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{},{},{}]-[{},{},{}]",
            self.low[0], self.low[1], self.low[2], self.high[0], self.high[1], self.high[2]
        )
    }
}




/**
 * Less imposing factory function to construct a Region object.
 */
pub fn region(low: [i64; DIM], high: [i64; DIM]) -> Region {
    Region::new(low, high)
}
