//! Signatures are the projections of a flag set onto each axis of a region,
//! in the style of Berger-Rigoutsos clustering. They are the only geometric
//! information a process group needs to agree on: once the signatures are
//! summed over the group, the coordinator can trim the region and choose a
//! split plane without seeing any remote flags.

use serde::{Deserialize, Serialize};

use crate::flags::Flag;
use crate::region::{Region, DIM};




#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]

/**
 * Three concatenated histograms of flag counts, one per axis, stored flat.
 * The histogram for axis `a` occupies `counts[offsets[a]..offsets[a + 1]]`
 * and its bin `i` counts the flags with `flag[a] == region.low()[a] + i`.
 */
pub struct Signature {
    counts: Vec<u64>,
    offsets: [usize; DIM + 1],
}




#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]

/**
 * The position of a split plane: cells with `index[axis] < index` go to the
 * left child.
 */
pub struct Split {
    pub axis: usize,
    pub index: i64,
}




// ============================================================================
impl Signature {

    /// An all-zero signature shaped for the given region.
    pub fn zeros(region: &Region) -> Self {
        let mut offsets = [0; DIM + 1];
        for a in 0..DIM {
            offsets[a + 1] = offsets[a] + region.extent(a);
        }
        Self { counts: vec![0; offsets[DIM]], offsets }
    }

    /// Histogram the given flags, which must all lie inside the region.
    pub fn compute(region: &Region, flags: &[Flag]) -> Self {
        let mut result = Self::zeros(region);
        let low = region.low();

        for flag in flags {
            for a in 0..DIM {
                result.counts[result.offsets[a] + (flag[a] - low[a]) as usize] += 1;
            }
        }
        result
    }

    /// Assemble a signature from explicit per-axis histograms.
    pub fn from_axes(axes: [Vec<u64>; DIM]) -> Self {
        let mut offsets = [0; DIM + 1];
        let mut counts = Vec::new();

        for (a, hist) in axes.iter().enumerate() {
            offsets[a + 1] = offsets[a] + hist.len();
            counts.extend_from_slice(hist);
        }
        Self { counts, offsets }
    }

    pub fn axis(&self, axis: usize) -> &[u64] {
        &self.counts[self.offsets[axis]..self.offsets[axis + 1]]
    }

    /// The number of flags represented by this signature.
    pub fn total(&self) -> u64 {
        self.axis(0).iter().sum()
    }

    /// Add another signature of the same shape into this one, bin by bin.
    pub fn accumulate(&mut self, other: &Self) {
        assert_eq!(self.offsets, other.offsets, "signature shapes differ");

        for (a, b) in self.counts.iter_mut().zip(&other.counts) {
            *a += b
        }
    }

    /**
     * Return the tightest sub-region of `region` containing every non-zero
     * bin on every axis, or `None` if the signature is empty.
     */
    pub fn bounds(&self, region: &Region) -> Option<Region> {
        let mut low = region.low();
        let mut high = region.high();

        for a in 0..DIM {
            let hist = self.axis(a);
            let first = hist.iter().position(|&n| n != 0)?;
            let last = hist.iter().rposition(|&n| n != 0)?;
            high[a] = low[a] + last as i64 + 1;
            low[a] += first as i64;
        }
        Some(Region::new(low, high))
    }

    /// Return the part of this signature lying inside `sub`, a sub-region of
    /// the region this signature was computed on.
    pub fn restrict(&self, region: &Region, sub: &Region) -> Self {
        assert!(region.contains_region(sub));

        let axes = [0, 1, 2].map(|a| {
            let skip = (sub.low()[a] - region.low()[a]) as usize;
            self.axis(a)[skip..skip + sub.extent(a)].to_vec()
        });
        Self::from_axes(axes)
    }
}




/**
 * Choose where to bisect a region whose signature is `signature`. The region
 * should already be trimmed to the signature's bounds, and must have an
 * extent of at least two on some axis. The result is always interior to the
 * region.
 */
pub fn choose_split(region: &Region, signature: &Signature) -> Split {
    zero_split(region, signature)
        .or_else(|| curvature_split(region, signature))
        .unwrap_or_else(|| midpoint_split(region))
}




/**
 * Look for an interior bin with no flags, scanning axes in order. The split
 * plane is placed just past the first one found.
 */
pub fn zero_split(region: &Region, signature: &Signature) -> Option<Split> {
    for axis in 0..DIM {
        let hist = signature.axis(axis);

        if hist.len() < 3 {
            continue;
        }
        if let Some(i) = (1..hist.len() - 1).find(|&i| hist[i] == 0) {
            return Some(Split { axis, index: region.low()[axis] + i as i64 + 1 });
        }
    }
    None
}




struct Inflection {
    magnitude: i64,
    extent: usize,
    distance: i64,
    split: Split,
}

impl Inflection {
    fn beats(&self, other: &Self) -> bool {
        if self.magnitude != other.magnitude {
            return self.magnitude > other.magnitude;
        }
        if self.extent != other.extent {
            return self.extent > other.extent;
        }
        self.distance < other.distance
    }
}




/**
 * Look for the strongest inflection in any histogram: a sign change in the
 * discrete second derivative, ranked by the size of the jump. Ties go to
 * the longer axis, then to the plane nearer the center of the region.
 */
pub fn curvature_split(region: &Region, signature: &Signature) -> Option<Split> {
    let mut best: Option<Inflection> = None;

    for axis in 0..DIM {
        let hist = signature.axis(axis);

        if hist.len() < 4 {
            continue;
        }
        let laplacian: Vec<i64> = hist
            .windows(3)
            .map(|w| w[0] as i64 - 2 * w[1] as i64 + w[2] as i64)
            .collect();

        // laplacian[k] is centered on bin k + 1, so a sign change between
        // laplacian[k] and laplacian[k + 1] puts the plane at bin k + 2.
        for (k, pair) in laplacian.windows(2).enumerate() {
            if pair[0].signum() * pair[1].signum() >= 0 {
                continue;
            }
            let index = region.low()[axis] + k as i64 + 2;
            let candidate = Inflection {
                magnitude: (pair[1] - pair[0]).abs(),
                extent: region.extent(axis),
                distance: region.center_distance2(axis, index),
                split: Split { axis, index },
            };
            if best.as_ref().map_or(true, |b| candidate.beats(b)) {
                best = Some(candidate)
            }
        }
    }
    best.map(|b| b.split)
}




/**
 * Bisect the longest axis at its midpoint.
 */
pub fn midpoint_split(region: &Region) -> Split {
    let axis = region.longest_axis();

    assert!(region.extent(axis) >= 2, "cannot split unit region {}", region);

    Split { axis, index: region.low()[axis] + region.extent(axis) as i64 / 2 }
}
