use serde::{Deserialize, Serialize};

use crate::error::Error;




#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]

/**
 * Acceptance thresholds for the patch decomposition.
 *
 * `tol_a` is the minimum density of flagged cells a patch must reach to be
 * accepted without being split. `tol_b` bounds fragmentation: when the
 * patches found below a split cover at least `tol_b` of the split region's
 * volume, they are discarded in favor of the region itself.
 */
pub struct Tolerances {
    pub tol_a: f64,
    pub tol_b: f64,
}




#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]

/**
 * Everything a controller needs besides its transport.
 */
pub struct RegridConfig {
    pub tolerances: Tolerances,

    /// Number of communication tags each rank may have allocated at once.
    /// Tags are handed out in pairs, one pair per split a rank coordinates,
    /// held until that split's whole subtree has finished. Any pool with
    /// room for one pair completes every pass: when the pool is empty a
    /// split waits for a pair, and once its rank has nothing else to do it
    /// runs its children one after the other on its own tag. A small pool
    /// costs concurrency, never correctness.
    pub tag_capacity: usize,
}




// ============================================================================
impl Default for Tolerances {
    fn default() -> Self {
        Self { tol_a: 0.8, tol_b: 1.0 }
    }
}

impl Tolerances {
    pub fn new(tol_a: f64, tol_b: f64) -> Self {
        Self { tol_a, tol_b }
    }

    pub fn validate(&self) -> Result<(), Error> {
        for (name, value) in [("tol_a", self.tol_a), ("tol_b", self.tol_b)] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(Error::InvalidConfig(format!("{} must lie in (0, 1], got {}", name, value)));
            }
        }
        Ok(())
    }
}




// ============================================================================
impl Default for RegridConfig {
    fn default() -> Self {
        Self {
            tolerances: Tolerances::default(),
            tag_capacity: 4096,
        }
    }
}

impl RegridConfig {
    pub fn with_tolerances(tol_a: f64, tol_b: f64) -> Self {
        Self {
            tolerances: Tolerances::new(tol_a, tol_b),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        self.tolerances.validate()?;

        if self.tag_capacity < 2 {
            return Err(Error::InvalidConfig(format!(
                "tag_capacity must hold at least one pair of tags, got {}",
                self.tag_capacity
            )));
        }
        Ok(())
    }
}
