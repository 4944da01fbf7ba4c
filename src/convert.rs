//! Top-level conversion pipeline: sources, targets, and output bundles.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use image::RgbaImage;

use crate::error::{KanimError, Warning};
use crate::kanim::{self, DumpSink};
use crate::model::AnimSet;
use crate::scml;

/// The two on-disk representations of an animation set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Kanim,
    Scml,
}

impl FromStr for Format {
    type Err = KanimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "kanim" => Ok(Format::Kanim),
            "scml" => Ok(Format::Scml),
            other => Err(KanimError::ProjectStructure(format!(
                "unknown format \"{other}\", expected \"kanim\" or \"scml\""
            ))),
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Format::Kanim => "kanim",
            Format::Scml => "scml",
        })
    }
}

/// Knobs shared by the readers and writers.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConvertOptions {
    /// Promote recoverable project problems to fatal errors.
    pub strict: bool,
    /// Fill in missing keyframes before reading a project.
    pub interpolate: bool,
    /// Flatten bone hierarchies before reading a project.
    pub debone: bool,
}

/// The raw bytes of one source, already loaded from wherever they live.
pub enum Source {
    Kanim {
        build: Vec<u8>,
        anim: Vec<u8>,
        atlas: Vec<u8>,
    },
    Scml {
        document: String,
        sprites: Vec<(String, RgbaImage)>,
    },
}

/// A decoded set plus everything worth telling the user about.
pub struct ReadOutcome {
    pub set: AnimSet,
    pub warnings: Vec<Warning>,
}

impl Source {
    /// Decodes into the in-memory model. The dump sink only traces binary
    /// sources; project reads go through it untouched.
    pub fn read(
        self,
        options: &ConvertOptions,
        dump: &mut DumpSink<'_>,
    ) -> Result<ReadOutcome, KanimError> {
        match self {
            Source::Kanim { build, anim, atlas } => {
                let set = kanim::read_kanim(&build, &anim, &atlas, dump)?;
                Ok(ReadOutcome {
                    set,
                    warnings: Vec::new(),
                })
            }
            Source::Scml { document, sprites } => {
                let read = scml::read_project(&document, sprites, options)?;
                Ok(ReadOutcome {
                    set: read.set,
                    warnings: read.warnings,
                })
            }
        }
    }
}

/// Encodes a set in the requested format.
pub fn write_target(
    set: &AnimSet,
    target: Format,
    options: &ConvertOptions,
) -> Result<(OutputFiles, Vec<Warning>), KanimError> {
    match target {
        Format::Kanim => Ok((kanim::write_kanim(set)?, Vec::new())),
        Format::Scml => scml::write_project(set, options),
    }
}

pub struct ConvertOutcome {
    pub files: OutputFiles,
    pub warnings: Vec<Warning>,
}

/// One-call pipeline: decode `source`, re-encode as `target`. Converting a
/// format to itself is legitimate and normalizes the data (kanim to kanim
/// repacks the atlas, for instance).
pub fn convert(
    source: Source,
    target: Format,
    options: &ConvertOptions,
    dump: &mut DumpSink<'_>,
) -> Result<ConvertOutcome, KanimError> {
    let ReadOutcome { set, mut warnings } = source.read(options, dump)?;
    let (files, write_warnings) = write_target(&set, target, options)?;
    warnings.extend(write_warnings);
    Ok(ConvertOutcome { files, warnings })
}

/// Named output artifacts, ordered by name so directory writes and tests
/// are deterministic.
#[derive(Debug, Clone, Default)]
pub struct OutputFiles {
    files: BTreeMap<String, Vec<u8>>,
}

impl OutputFiles {
    pub fn new() -> Self {
        OutputFiles::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, bytes: Vec<u8>) {
        self.files.insert(name.into(), bytes);
    }

    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.files.get(name).map(Vec::as_slice)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.files.iter().map(|(name, bytes)| (name.as_str(), bytes.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Creates `directory` if needed and writes every artifact into it.
    pub fn save_to_dir(&self, directory: &Path) -> Result<(), KanimError> {
        fs::create_dir_all(directory)?;
        for (name, bytes) in &self.files {
            fs::write(directory.join(name), bytes)?;
        }
        Ok(())
    }
}
