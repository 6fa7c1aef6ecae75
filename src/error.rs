use std::error;
use std::fmt;
use std::io;

use crate::flags::Flag;
use crate::region::Region;




#[derive(Debug)]

/**
 * Error to represent a regridding pass which could not produce a patch set:
 * bad input from the caller, a failed transport, or a malformed payload.
 * Violations of the algorithm's own structural invariants are not
 * represented here; those panic.
 */
pub enum Error {
    InvalidConfig(String),
    FlagOutsideRegion { flag: Flag, region: Region },
    RankNotInGroup { rank: usize },
    DuplicateRank(usize),
    UnknownRank { rank: usize, size: usize },
    Disconnected,
    Io(io::Error),
    Encode(rmp_serde::encode::Error),
    Decode(rmp_serde::decode::Error),
    ThreadPool(rayon::ThreadPoolBuildError),
    Aborted { rank: usize },
}

impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        use Error::*;

        match self {
            InvalidConfig(msg) => write!(fmt, "invalid configuration: {}", msg),
            FlagOutsideRegion { flag, region } => write!(
                fmt,
                "flag [{},{},{}] lies outside region {}",
                flag[0], flag[1], flag[2], region
            ),
            RankNotInGroup { rank } => write!(fmt, "rank {} is not in the participating group", rank),
            DuplicateRank(rank) => write!(fmt, "rank {} appears twice in the participating group", rank),
            UnknownRank { rank, size } => write!(fmt, "rank {} does not exist among {} ranks", rank, size),
            Disconnected => write!(fmt, "transport disconnected"),
            Io(e) => write!(fmt, "transport i/o: {}", e),
            Encode(e) => write!(fmt, "payload encode: {}", e),
            Decode(e) => write!(fmt, "payload decode: {}", e),
            ThreadPool(e) => write!(fmt, "could not start rank threads: {}", e),
            Aborted { rank } => write!(fmt, "rank {} abandoned the pass", rank),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Encode(e) => Some(e),
            Error::Decode(e) => Some(e),
            Error::ThreadPool(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<rmp_serde::encode::Error> for Error {
    fn from(e: rmp_serde::encode::Error) -> Self {
        Error::Encode(e)
    }
}

impl From<rmp_serde::decode::Error> for Error {
    fn from(e: rmp_serde::decode::Error) -> Self {
        Error::Decode(e)
    }
}

impl From<rayon::ThreadPoolBuildError> for Error {
    fn from(e: rayon::ThreadPoolBuildError) -> Self {
        Error::ThreadPool(e)
    }
}
