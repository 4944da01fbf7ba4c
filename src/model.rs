//! In-memory model of a kanim animation set.
//!
//! A set is three artifacts that only make sense together: a build (the
//! symbol/frame table describing the atlas), an anim (per-bank keyframe
//! data), and the atlas texture itself. Strings live in per-chunk hash
//! tables keyed by [`crate::names::klei_hash`] values.

use std::collections::BTreeMap;

use image::RgbaImage;
use serde::Serialize;

use crate::error::KanimError;
use crate::names::SpriteName;

/// Hash-to-string table trailing each binary chunk. Ordered so that writes
/// are deterministic regardless of insertion history.
pub type HashTable = BTreeMap<i32, String>;

/// One frame of a build symbol. UV coordinates are fractions of the atlas
/// with the origin at the top left; pivots are in doubled-pixel units.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildFrame {
    pub source_frame_index: i32,
    pub duration: i32,
    pub build_image_index: i32,
    pub pivot_x: f32,
    pub pivot_y: f32,
    pub pivot_width: f32,
    pub pivot_height: f32,
    pub uv_x1: f32,
    pub uv_y1: f32,
    pub uv_x2: f32,
    pub uv_y2: f32,
}

/// A build symbol: one named group of frames, keyed by the hash of its base
/// name.
#[derive(Debug, Clone, PartialEq)]
pub struct Symbol {
    pub hash: i32,
    pub path: i32,
    pub color: i32,
    pub flags: i32,
    pub frames: Vec<BuildFrame>,
}

/// The parsed BILD chunk.
///
/// `symbol_count` and `frame_count` mirror the header fields as read (or as
/// computed by the project reader); they are not re-derived from `symbols`
/// so the dump output can show exactly what the file says.
#[derive(Debug, Clone, PartialEq)]
pub struct Build {
    pub version: i32,
    pub symbol_count: i32,
    pub frame_count: i32,
    pub name: String,
    pub symbols: Vec<Symbol>,
}

/// One drawable element of an animation frame: a symbol frame reference
/// plus tint and a 2x3 affine transform.
#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub image: i32,
    pub index: i32,
    pub layer: i32,
    pub flags: i32,
    pub a: f32,
    pub b: f32,
    pub g: f32,
    pub r: f32,
    pub m1: f32,
    pub m2: f32,
    pub m3: f32,
    pub m4: f32,
    pub m5: f32,
    pub m6: f32,
    pub order: f32,
    /// Draw ordering used while building frames from a project. Not stored
    /// in the binary chunk.
    pub z_index: i32,
}

impl Default for Element {
    fn default() -> Self {
        Element {
            image: 0,
            index: 0,
            layer: 0,
            flags: 0,
            a: 1.0,
            b: 1.0,
            g: 1.0,
            r: 1.0,
            m1: 1.0,
            m2: 0.0,
            m3: 0.0,
            m4: 1.0,
            m5: 0.0,
            m6: 0.0,
            order: 0.0,
            z_index: 0,
        }
    }
}

/// One keyframe of an animation bank with its overall bounding box.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AnimFrame {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub elements: Vec<Element>,
}

/// A named animation and its keyframes. `rate` is in frames per second.
#[derive(Debug, Clone, PartialEq)]
pub struct AnimBank {
    pub name: String,
    pub hash: i32,
    pub rate: f32,
    pub frames: Vec<AnimFrame>,
}

/// The parsed ANIM chunk. The aggregate counts mirror the header fields;
/// the project reader leaves `element_count` and `frame_count` at zero,
/// matching what the game's own exporter writes.
#[derive(Debug, Clone, PartialEq)]
pub struct Anim {
    pub version: i32,
    pub element_count: i32,
    pub frame_count: i32,
    pub max_visible_symbol_frames: i32,
    pub banks: Vec<AnimBank>,
}

/// A loose sprite image with its parsed name.
#[derive(Debug, Clone)]
pub struct Sprite {
    pub name: SpriteName,
    pub image: RgbaImage,
}

/// A complete animation set in memory, the common interchange value between
/// the binary codec and the project codec.
#[derive(Debug, Clone)]
pub struct AnimSet {
    pub build: Build,
    pub anim: Anim,
    pub build_hashes: HashTable,
    pub anim_hashes: HashTable,
    pub sprites: Vec<Sprite>,
}

impl AnimSet {
    pub fn summary(&self) -> Summary {
        Summary {
            name: self.build.name.clone(),
            build_version: self.build.version,
            anim_version: self.anim.version,
            symbols: self.build.symbols.len(),
            build_frames: self.build.frame_count,
            anims: self.anim.banks.len(),
            anim_frames: self.anim.banks.iter().map(|bank| bank.frames.len()).sum(),
            max_visible_symbol_frames: self.anim.max_visible_symbol_frames,
            sprites: self.sprites.len(),
        }
    }
}

/// Aggregate counts for the `info` command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub name: String,
    pub build_version: i32,
    pub anim_version: i32,
    pub symbols: usize,
    pub build_frames: i32,
    pub anims: usize,
    pub anim_frames: usize,
    pub max_visible_symbol_frames: i32,
    pub sprites: usize,
}

/// One build frame resolved against the hash table and the atlas size, in
/// pixel space with the origin at the top left.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildRow {
    pub name: String,
    pub index: i32,
    pub hash: i32,
    pub duration: i32,
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub width: f32,
    pub height: f32,
    pub pivot_x: f32,
    pub pivot_y: f32,
    pub pivot_width: f32,
    pub pivot_height: f32,
}

impl BuildRow {
    pub fn sprite_name(&self) -> SpriteName {
        SpriteName::new(self.name.clone(), self.index)
    }
}

/// Flattens a build into per-frame pixel rows.
///
/// Stored UVs have a top-left origin, so `y1` and `y2` come out flipped:
/// `y1` is the distance from the bottom of the atlas to the top of the
/// sprite. Errors if a symbol's hash has no entry in the table.
pub fn build_table(
    build: &Build,
    hashes: &HashTable,
    atlas_width: u32,
    atlas_height: u32,
) -> Result<Vec<BuildRow>, KanimError> {
    let width = atlas_width as f32;
    let height = atlas_height as f32;
    let mut rows = Vec::with_capacity(build.symbols.iter().map(|s| s.frames.len()).sum());
    for symbol in &build.symbols {
        let name = hashes
            .get(&symbol.hash)
            .ok_or(KanimError::UnknownHash(symbol.hash))?;
        for frame in &symbol.frames {
            rows.push(BuildRow {
                name: name.clone(),
                index: frame.source_frame_index,
                hash: symbol.hash,
                duration: frame.duration,
                x1: frame.uv_x1 * width,
                y1: (1.0 - frame.uv_y1) * height,
                x2: frame.uv_x2 * width,
                y2: (1.0 - frame.uv_y2) * height,
                width: (frame.uv_x2 - frame.uv_x1) * width,
                height: (frame.uv_y2 - frame.uv_y1) * height,
                pivot_x: frame.pivot_x,
                pivot_y: frame.pivot_y,
                pivot_width: frame.pivot_width,
                pivot_height: frame.pivot_height,
            });
        }
    }
    Ok(rows)
}
