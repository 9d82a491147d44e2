use std::fmt;

/// Errors surfaced at the crate boundary.
///
/// All failures are reported synchronously on the calling task; the engine
/// never retries and never performs I/O.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Invalid configuration or argument; the call had no effect.
    BadArgument { msg: &'static str },

    /// A sampler proposal carried a sequence index smaller than one the
    /// sampler has already seen.
    OutOfOrder { seen: u64, proposed: u64 },

    /// The point store is full and compaction could not free a slot.
    CapacityExceeded,

    /// The referenced point-store slot is out of range or not live.
    InvalidIndex { index: usize },

    /// A delete descended to a leaf that does not hold the requested point.
    NotFound,

    /// An internal invariant does not hold; the structure is corrupt.
    InvalidState { msg: &'static str },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::BadArgument { msg } => write!(f, "bad argument: {}", msg),
            Error::OutOfOrder { seen, proposed } => write!(
                f,
                "out of order sequence index: proposed {} after {}",
                proposed, seen
            ),
            Error::CapacityExceeded => write!(f, "point store capacity exceeded"),
            Error::InvalidIndex { index } => write!(f, "invalid point index {}", index),
            Error::NotFound => write!(f, "point not found in tree"),
            Error::InvalidState { msg } => write!(f, "invalid state: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;
