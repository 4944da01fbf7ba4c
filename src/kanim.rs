//! Reader and writer for the kanim binary container.
//!
//! A kanim set on disk is `<name>_build.bytes` (BILD chunk),
//! `<name>_anim.bytes` (ANIM chunk), and `<name>.png` (the atlas). All
//! integers and floats are little-endian; strings are an i32 length
//! followed by that many bytes, with lengths of zero or less meaning the
//! empty string.

use std::collections::BTreeMap;
use std::fmt;
use std::io::{Cursor, Read, Write};

use image::RgbaImage;

use crate::atlas;
use crate::convert::OutputFiles;
use crate::error::KanimError;
use crate::model::{
    build_table, Anim, AnimBank, AnimFrame, AnimSet, Build, BuildFrame, BuildRow, Element,
    HashTable, Sprite, Symbol,
};
use crate::names::SpriteName;

const BUILD_MAGIC: &str = "BILD";
const ANIM_MAGIC: &str = "ANIM";

/// Version written for build chunks. Versions above 9 carry a per-symbol
/// path hash; older files are still readable.
pub const BUILD_VERSION: i32 = 10;

/// Version written for anim chunks produced from a project.
pub const ANIM_VERSION: i32 = 5;

/// Optional line-by-line trace of everything the reader decodes.
///
/// A disabled sink costs nothing at the call sites; formatting only happens
/// when a writer is attached. Write failures are swallowed: a broken dump
/// target must not fail the decode itself.
pub struct DumpSink<'a> {
    out: Option<&'a mut dyn Write>,
}

impl<'a> DumpSink<'a> {
    pub fn disabled() -> Self {
        DumpSink { out: None }
    }

    pub fn to(out: &'a mut dyn Write) -> Self {
        DumpSink { out: Some(out) }
    }

    fn line(&mut self, args: fmt::Arguments<'_>) {
        if let Some(out) = self.out.as_deref_mut() {
            let _ = writeln!(out, "{args}");
        }
    }
}

fn read_i32(reader: &mut impl Read) -> Result<i32, KanimError> {
    let mut buffer = [0u8; 4];
    reader.read_exact(&mut buffer)?;
    Ok(i32::from_le_bytes(buffer))
}

fn read_f32(reader: &mut impl Read) -> Result<f32, KanimError> {
    let mut buffer = [0u8; 4];
    reader.read_exact(&mut buffer)?;
    Ok(f32::from_le_bytes(buffer))
}

fn read_pstring(reader: &mut impl Read) -> Result<String, KanimError> {
    let length = read_i32(reader)?;
    if length <= 0 {
        return Ok(String::new());
    }
    let mut buffer = vec![0u8; length as usize];
    reader.read_exact(&mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

fn put_i32(out: &mut Vec<u8>, value: i32) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn put_f32(out: &mut Vec<u8>, value: f32) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn put_pstring(out: &mut Vec<u8>, value: &str) {
    put_i32(out, value.len() as i32);
    out.extend_from_slice(value.as_bytes());
}

/// Checks the chunk magic. On mismatch the error carries however many bytes
/// were actually there, so a truncated file reports what it had.
fn verify_header(reader: &mut impl Read, expected: &str) -> Result<(), KanimError> {
    let mut buffer = vec![0u8; expected.len()];
    let mut filled = 0;
    while filled < buffer.len() {
        match reader.read(&mut buffer[filled..])? {
            0 => break,
            n => filled += n,
        }
    }
    let actual = String::from_utf8_lossy(&buffer[..filled]).into_owned();
    if actual != expected {
        return Err(KanimError::HeaderMismatch {
            expected: expected.to_string(),
            actual,
        });
    }
    Ok(())
}

fn name_of<'a>(table: &'a HashTable, hash: i32) -> &'a str {
    table.get(&hash).map(String::as_str).unwrap_or("?")
}

fn read_hash_table(
    reader: &mut impl Read,
    label: &str,
    dump: &mut DumpSink<'_>,
) -> Result<HashTable, KanimError> {
    let count = read_i32(reader)?;
    dump.line(format_args!("\n<{label} {count}>"));
    let mut table = HashTable::new();
    for _ in 0..count {
        let hash = read_i32(reader)?;
        let text = read_pstring(reader)?;
        dump.line(format_args!("  {hash} -> \"{text}\""));
        table.insert(hash, text);
    }
    Ok(table)
}

fn put_hash_table(out: &mut Vec<u8>, table: &HashTable) {
    put_i32(out, table.len() as i32);
    for (hash, text) in table {
        put_i32(out, *hash);
        put_pstring(out, text);
    }
}

/// Reads a BILD chunk and its trailing hash table.
pub fn read_build(
    reader: &mut impl Read,
    dump: &mut DumpSink<'_>,
) -> Result<(Build, HashTable), KanimError> {
    verify_header(reader, BUILD_MAGIC)?;

    let version = read_i32(reader)?;
    let symbol_count = read_i32(reader)?;
    let frame_count = read_i32(reader)?;
    let name = read_pstring(reader)?;

    dump.line(format_args!("=== BUILD FILE ==="));
    dump.line(format_args!("{name}"));
    dump.line(format_args!("  Version: {version}"));
    dump.line(format_args!("  # symbols: {symbol_count}"));
    dump.line(format_args!("  # frames: {frame_count}"));
    dump.line(format_args!("\n<Symbols>"));

    let mut symbols = Vec::with_capacity(symbol_count.max(0) as usize);
    for _ in 0..symbol_count {
        let hash = read_i32(reader)?;
        let path = if version > 9 { read_i32(reader)? } else { 0 };
        let color = read_i32(reader)?;
        let flags = read_i32(reader)?;
        let symbol_frame_count = read_i32(reader)?;
        dump.line(format_args!(
            "  Symbol: hash {hash}, path {path}, frame count {symbol_frame_count}"
        ));

        let mut frames = Vec::with_capacity(symbol_frame_count.max(0) as usize);
        for _ in 0..symbol_frame_count {
            let frame = BuildFrame {
                source_frame_index: read_i32(reader)?,
                duration: read_i32(reader)?,
                build_image_index: read_i32(reader)?,
                pivot_x: read_f32(reader)?,
                pivot_y: read_f32(reader)?,
                pivot_width: read_f32(reader)?,
                pivot_height: read_f32(reader)?,
                uv_x1: read_f32(reader)?,
                uv_y1: read_f32(reader)?,
                uv_x2: read_f32(reader)?,
                uv_y2: read_f32(reader)?,
            };
            dump.line(format_args!(
                "    Frame {}: image {} for duration {}, BB ({}, {}) - ({}, {}), pivot ({},{})",
                frame.source_frame_index,
                frame.build_image_index,
                frame.duration,
                frame.uv_x1,
                frame.uv_y1,
                frame.uv_x2,
                frame.uv_y2,
                frame.pivot_x,
                frame.pivot_y
            ));
            frames.push(frame);
        }

        symbols.push(Symbol {
            hash,
            path,
            color,
            flags,
            frames,
        });
    }

    let hashes = read_hash_table(reader, "Hashtable", dump)?;

    Ok((
        Build {
            version,
            symbol_count,
            frame_count,
            name,
            symbols,
        },
        hashes,
    ))
}

/// Reads an ANIM chunk and its trailing hash table. Build hashes are only
/// consulted for the dump trace; unknown hashes print as "?".
pub fn read_anim(
    reader: &mut impl Read,
    build_hashes: &HashTable,
    dump: &mut DumpSink<'_>,
) -> Result<(Anim, HashTable), KanimError> {
    verify_header(reader, ANIM_MAGIC)?;

    dump.line(format_args!("\n\n=== ANIM FILE ==="));

    let version = read_i32(reader)?;
    let element_count = read_i32(reader)?;
    let frame_count = read_i32(reader)?;
    let anim_count = read_i32(reader)?;

    dump.line(format_args!("  Version: {version}"));
    dump.line(format_args!("  # elements: {element_count}"));
    dump.line(format_args!("  # frames: {frame_count}"));
    dump.line(format_args!("  # anims: {anim_count}"));
    dump.line(format_args!("\n<Anims>"));

    let mut banks = Vec::with_capacity(anim_count.max(0) as usize);
    for _ in 0..anim_count {
        let name = read_pstring(reader)?;
        let hash = read_i32(reader)?;
        let rate = read_f32(reader)?;
        let bank_frame_count = read_i32(reader)?;
        dump.line(format_args!(
            "  Anim \"{name}\" (hash {hash}): {bank_frame_count} frames @ {rate} fps"
        ));

        let mut frames = Vec::with_capacity(bank_frame_count.max(0) as usize);
        for _ in 0..bank_frame_count {
            let x = read_f32(reader)?;
            let y = read_f32(reader)?;
            let width = read_f32(reader)?;
            let height = read_f32(reader)?;
            let frame_element_count = read_i32(reader)?;
            dump.line(format_args!(
                "    Frame @ ({x}, {y}) is {width}x{height}. {frame_element_count} sub-elements."
            ));

            let mut elements = Vec::with_capacity(frame_element_count.max(0) as usize);
            for _ in 0..frame_element_count {
                let element = Element {
                    image: read_i32(reader)?,
                    index: read_i32(reader)?,
                    layer: read_i32(reader)?,
                    flags: read_i32(reader)?,
                    a: read_f32(reader)?,
                    b: read_f32(reader)?,
                    g: read_f32(reader)?,
                    r: read_f32(reader)?,
                    m1: read_f32(reader)?,
                    m2: read_f32(reader)?,
                    m3: read_f32(reader)?,
                    m4: read_f32(reader)?,
                    m5: read_f32(reader)?,
                    m6: read_f32(reader)?,
                    order: read_f32(reader)?,
                    z_index: 0,
                };
                dump.line(format_args!(
                    "      Sub-element #{} is {} (\"{}\") @ layer {}",
                    element.index,
                    element.image,
                    name_of(build_hashes, element.image),
                    element.layer
                ));
                dump.line(format_args!(
                    "        Matrix: ({} {} {} {}), translate {} {}. Order {}",
                    element.m1,
                    element.m2,
                    element.m3,
                    element.m4,
                    element.m5,
                    element.m6,
                    element.order
                ));
                elements.push(element);
            }

            frames.push(AnimFrame {
                x,
                y,
                width,
                height,
                elements,
            });
        }

        banks.push(AnimBank {
            name,
            hash,
            rate,
            frames,
        });
    }

    let max_visible_symbol_frames = read_i32(reader)?;
    dump.line(format_args!(
        "  Max visible frames: {max_visible_symbol_frames}"
    ));

    let hashes = read_hash_table(reader, "Anim hashes", dump)?;

    let anim = Anim {
        version,
        element_count,
        frame_count,
        max_visible_symbol_frames,
        banks,
    };
    dump_anim_ids(&anim, &hashes, dump);

    Ok((anim, hashes))
}

/// Traces the distinct `image_index_layer` element identities in first
/// appearance order, numbered from zero. This is the same identity the
/// project writer keys its timelines on.
fn dump_anim_ids(anim: &Anim, anim_hashes: &HashTable, dump: &mut DumpSink<'_>) {
    dump.line(format_args!("\n<Anim ids>"));
    let mut seen = BTreeMap::new();
    let mut next_id = 0;
    for bank in &anim.banks {
        for frame in &bank.frames {
            for element in &frame.elements {
                let name = format!(
                    "{}_{}_{}",
                    name_of(anim_hashes, element.image),
                    element.index,
                    name_of(anim_hashes, element.layer)
                );
                if !seen.contains_key(&name) {
                    dump.line(format_args!("  {next_id} -> \"{name}\""));
                    seen.insert(name, next_id);
                    next_id += 1;
                }
            }
        }
    }
}

/// Serializes a build chunk. The symbol count and per-symbol frame counts
/// come from the actual vectors; the total frame count is the stored field.
pub fn write_build(build: &Build, hashes: &HashTable) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(BUILD_MAGIC.as_bytes());
    put_i32(&mut out, BUILD_VERSION);
    put_i32(&mut out, build.symbols.len() as i32);
    put_i32(&mut out, build.frame_count);
    put_pstring(&mut out, &build.name);

    for symbol in &build.symbols {
        put_i32(&mut out, symbol.hash);
        put_i32(&mut out, symbol.path);
        put_i32(&mut out, symbol.color);
        put_i32(&mut out, symbol.flags);
        put_i32(&mut out, symbol.frames.len() as i32);
        for frame in &symbol.frames {
            put_i32(&mut out, frame.source_frame_index);
            put_i32(&mut out, frame.duration);
            put_i32(&mut out, frame.build_image_index);
            put_f32(&mut out, frame.pivot_x);
            put_f32(&mut out, frame.pivot_y);
            put_f32(&mut out, frame.pivot_width);
            put_f32(&mut out, frame.pivot_height);
            put_f32(&mut out, frame.uv_x1);
            put_f32(&mut out, frame.uv_y1);
            put_f32(&mut out, frame.uv_x2);
            put_f32(&mut out, frame.uv_y2);
        }
    }

    put_hash_table(&mut out, hashes);
    out
}

/// Serializes an anim chunk.
pub fn write_anim(anim: &Anim, hashes: &HashTable) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(ANIM_MAGIC.as_bytes());
    put_i32(&mut out, anim.version);
    put_i32(&mut out, anim.element_count);
    put_i32(&mut out, anim.frame_count);
    put_i32(&mut out, anim.banks.len() as i32);

    for bank in &anim.banks {
        put_pstring(&mut out, &bank.name);
        put_i32(&mut out, bank.hash);
        put_f32(&mut out, bank.rate);
        put_i32(&mut out, bank.frames.len() as i32);
        for frame in &bank.frames {
            put_f32(&mut out, frame.x);
            put_f32(&mut out, frame.y);
            put_f32(&mut out, frame.width);
            put_f32(&mut out, frame.height);
            put_i32(&mut out, frame.elements.len() as i32);
            for element in &frame.elements {
                put_i32(&mut out, element.image);
                put_i32(&mut out, element.index);
                put_i32(&mut out, element.layer);
                put_i32(&mut out, element.flags);
                put_f32(&mut out, element.a);
                put_f32(&mut out, element.b);
                put_f32(&mut out, element.g);
                put_f32(&mut out, element.r);
                put_f32(&mut out, element.m1);
                put_f32(&mut out, element.m2);
                put_f32(&mut out, element.m3);
                put_f32(&mut out, element.m4);
                put_f32(&mut out, element.m5);
                put_f32(&mut out, element.m6);
                put_f32(&mut out, element.order);
            }
        }
    }

    put_i32(&mut out, anim.max_visible_symbol_frames);
    put_hash_table(&mut out, hashes);
    out
}

/// Cuts the individual sprites back out of the atlas. Rectangles are
/// clamped into the atlas and to at least one pixel, so a malformed row
/// yields a degenerate sprite rather than a panic.
pub fn slice_sprites(rows: &[BuildRow], atlas: &RgbaImage) -> Vec<Sprite> {
    let atlas_w = atlas.width() as i32;
    let atlas_h = atlas.height() as i32;
    let mut sprites = Vec::with_capacity(rows.len());
    for row in rows {
        let x = (row.x1 as i32).clamp(0, atlas_w - 1);
        let y = ((atlas_h as f32 - row.y1) as i32).clamp(0, atlas_h - 1);
        let width = (row.width as i32).clamp(1, atlas_w - x);
        let height = (row.height as i32).clamp(1, atlas_h - y);
        let image =
            image::imageops::crop_imm(atlas, x as u32, y as u32, width as u32, height as u32)
                .to_image();
        sprites.push(Sprite {
            name: row.sprite_name(),
            image,
        });
    }
    sprites
}

/// Decodes a complete kanim set from its three artifacts.
pub fn read_kanim(
    build_bytes: &[u8],
    anim_bytes: &[u8],
    atlas_png: &[u8],
    dump: &mut DumpSink<'_>,
) -> Result<AnimSet, KanimError> {
    let mut cursor = build_bytes;
    let (build, build_hashes) = read_build(&mut cursor, dump)?;

    let atlas = image::load_from_memory(atlas_png)?.to_rgba8();
    let rows = build_table(&build, &build_hashes, atlas.width(), atlas.height())?;

    dump.line(format_args!("\n\n=== SPRITE SHEET ==="));
    for row in &rows {
        let y = (atlas.height() as f32 - row.y1) as i32;
        dump.line(format_args!(
            "  Sprite \"{}_{}\" @ {} {}, {}x{}",
            row.name, row.index, row.x1, y, row.width, row.height
        ));
    }
    let sprites = slice_sprites(&rows, &atlas);

    let mut cursor = anim_bytes;
    let (anim, anim_hashes) = read_anim(&mut cursor, &build_hashes, dump)?;

    Ok(AnimSet {
        build,
        anim,
        build_hashes,
        anim_hashes,
        sprites,
    })
}

/// Encodes a complete set back into its three artifacts.
///
/// Sprites are packed into a fresh atlas here, and every build frame's UVs
/// are recomputed from its placement, so the input UVs never need to be
/// consistent with the sprite images.
pub fn write_kanim(set: &AnimSet) -> Result<OutputFiles, KanimError> {
    let packed = atlas::pack(&set.sprites)?;
    let mut placements = BTreeMap::new();
    for placement in &packed.placements {
        placements.insert(placement.name.clone(), placement);
    }

    let sheet_width = packed.sheet.width() as f32;
    let sheet_height = packed.sheet.height() as f32;

    let mut build = set.build.clone();
    for symbol in &mut build.symbols {
        let base = set
            .build_hashes
            .get(&symbol.hash)
            .ok_or(KanimError::UnknownHash(symbol.hash))?
            .clone();
        for frame in &mut symbol.frames {
            let name = SpriteName::new(base.clone(), frame.source_frame_index);
            let placement = placements.get(&name).ok_or_else(|| {
                KanimError::MissingSprite(format!(
                    "no sprite image available for \"{name}\" referenced by the build"
                ))
            })?;
            frame.uv_x1 = placement.x as f32 / sheet_width;
            frame.uv_x2 = (placement.x + placement.width) as f32 / sheet_width;
            frame.uv_y1 = placement.y as f32 / sheet_height;
            frame.uv_y2 = (placement.y + placement.height) as f32 / sheet_height;
        }
    }

    let mut files = OutputFiles::new();
    files.insert(
        format!("{}_build.bytes", build.name),
        write_build(&build, &set.build_hashes),
    );
    files.insert(
        format!("{}_anim.bytes", build.name),
        write_anim(&set.anim, &set.anim_hashes),
    );
    files.insert(format!("{}.png", build.name), encode_png(&packed.sheet)?);
    Ok(files)
}

pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>, KanimError> {
    let mut bytes = Vec::new();
    image.write_to(
        &mut Cursor::new(&mut bytes),
        image::ImageOutputFormat::Png,
    )?;
    Ok(bytes)
}
