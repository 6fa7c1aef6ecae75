//! Patchwork finds the rectangular patches an adaptive mesh refinement (AMR)
//! code should refine, given the cells it has flagged for refinement. It
//! implements the signature-based point clustering of Berger and Rigoutsos:
//! a region is trimmed to its flags and accepted when dense enough, or else
//! bisected where the flag histograms suggest a natural seam, recursively.
//!
//! The flags may be spread over many ranks. Each node of the recursion is run
//! cooperatively by the ranks that hold flags under it, exchanging histograms
//! through binary-tree reductions and broadcasts built on point-to-point
//! messages. Every rank drives many such nodes at once from a single thread,
//! each written as a resumable state machine, so the whole recursion tree
//! progresses as fast as its messages arrive.

pub mod cluster;
pub mod collective;
pub mod config;
pub mod controller;
pub mod error;
pub mod flags;
pub mod group;
pub mod message;
pub mod region;
pub mod signature;
pub mod tags;
pub mod task;

pub use config::{RegridConfig, Tolerances};
pub use controller::Controller;
pub use error::Error;
pub use flags::Flag;
pub use region::{region, Region};
