//! Error and warning types shared by the binary and project codecs.

use std::fmt;

use thiserror::Error;

/// Everything that can go wrong while reading or writing an animation set.
///
/// Message text for the `SCML format exception` variants is load-bearing:
/// the game's own pipeline surfaces these strings to artists, so they stay
/// word-for-word stable across releases.
#[derive(Debug, Error)]
pub enum KanimError {
    /// A binary chunk did not start with the magic bytes it must start with.
    #[error("Expected header \"{expected}\" but got \"{actual}\" instead.")]
    HeaderMismatch { expected: String, actual: String },

    /// A sprite or file name that does not end in an underscore and a frame
    /// index, or whose index does not fit in 32 bits.
    #[error("{0}")]
    NamingConvention(String),

    /// The project tree is missing a node or attribute the format requires,
    /// or carries one that cannot be parsed.
    #[error("{0}")]
    ProjectStructure(String),

    /// Mainline keyframes of one or more animations are not evenly spaced.
    #[error("SCML format exception: The intervals in the anims {anims} were inconsistent. Aborting read.{hint}")]
    InconsistentIntervals { anims: String, hint: String },

    /// Keyframes sit at times that are not multiples of the frame interval.
    #[error("SCML format exception: The timelines in anims {anims} had frames at times not snapped to the running interval {interval} ms. Aborting read.")]
    BrokenSnapping { anims: String, interval: i32 },

    /// Pivot points were given on timeline keys instead of on the sprites.
    #[error("SCML format exception: There were pivot points specified in timelines rather than only on the sprites in anims {anims}. Aborting read.")]
    TimelinePivots { anims: String },

    /// Strict mode only: an animation references a sprite that does not exist.
    #[error("{0}")]
    MissingSprite(String),

    /// A hash appears in the data but not in the accompanying hash table.
    #[error("hash table has no name for hash {0}")]
    UnknownHash(i32),

    /// Sprites could not be arranged into an atlas.
    #[error("{0}")]
    Packing(String),

    /// Malformed XML, surfaced from the underlying parser.
    #[error("{0}")]
    Xml(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Image(#[from] image::ImageError),
}

/// A non-fatal condition found during conversion. Callers collect these and
/// decide whether to print them or promote them to errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Warning {
    pub message: String,
}

impl Warning {
    pub fn new(message: impl Into<String>) -> Self {
        Warning {
            message: message.into(),
        }
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}
