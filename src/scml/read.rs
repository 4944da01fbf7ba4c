//! Builds an animation set from a Spriter project.
//!
//! The document is validated in an aggregate pass first, then packed into a
//! build chunk (one symbol per base name, one frame per sprite) and an anim
//! chunk (one bank per animation). Mainline keys must be evenly spaced; the
//! first gap between keys becomes the reference interval for the bank.

use std::collections::{BTreeMap, BTreeSet};

use image::RgbaImage;

use crate::convert::ConvertOptions;
use crate::error::{KanimError, Warning};
use crate::kanim::{ANIM_VERSION, BUILD_VERSION};
use crate::model::{
    self, Anim, AnimBank, AnimFrame, AnimSet, Build, BuildFrame, HashTable, Sprite, Symbol,
};
use crate::names::{klei_hash, SpriteName};
use crate::scml::{debone, interpolate_keyframes, MS_PER_SECOND};
use crate::xml::{self, Element};

/// A parsed project plus every non-fatal condition met along the way.
#[derive(Debug)]
pub struct ProjectRead {
    pub set: AnimSet,
    pub warnings: Vec<Warning>,
}

/// One `<file>` entry of the project folder.
#[derive(Debug, Clone)]
struct FileEntry {
    name: String,
    pivot_x: f32,
    pivot_y: f32,
    width: i32,
    height: i32,
}

/// Reads an SCML document and its loose sprite images into an animation set.
///
/// `sprites` pairs each file name (extension included) with its decoded
/// image. Sprites the project never mentions are dropped with a warning.
/// Project entries without a matching image are fatal in strict mode and
/// replaced by a 1x1 placeholder otherwise.
pub fn read_project(
    document: &str,
    sprites: Vec<(String, RgbaImage)>,
    options: &ConvertOptions,
) -> Result<ProjectRead, KanimError> {
    let mut warnings = Vec::new();

    let mut root = xml::parse_document(document)?;
    if root.name != "spriter_data" {
        return Err(KanimError::ProjectStructure(format!(
            "document root must be <spriter_data>, found <{}>",
            root.name
        )));
    }

    if options.interpolate {
        root = interpolate_keyframes(&root)?;
    }
    if options.debone {
        let (deboned, warning) = debone(root);
        root = deboned;
        warnings.push(warning);
    }

    let entries = parse_file_entries(&root)?;
    let mut pivots = BTreeMap::new();
    for entry in entries.values() {
        pivots.insert(
            SpriteName::parse(&entry.name)?,
            (entry.pivot_x, entry.pivot_y),
        );
    }

    let mut used = Vec::new();
    let mut unused = Vec::new();
    for (filename, image) in sprites {
        let name = SpriteName::parse(&filename)?;
        if pivots.contains_key(&name) {
            used.push(Sprite { name, image });
        } else {
            unused.push(format!("{name}.png"));
        }
    }
    if !unused.is_empty() {
        warnings.push(Warning::new(format!(
            "There were unused sprites in the SCML project folder: {}. Did you forget to included these in the SCML file? You must manually add in files that are part of a symbol_override if they aren't explicitly placed into any animations in the SCML. ",
            unused.join(", ")
        )));
    }

    let provided: BTreeSet<SpriteName> = used.iter().map(|sprite| sprite.name.clone()).collect();
    for name in pivots.keys() {
        if provided.contains(name) {
            continue;
        }
        if options.strict {
            return Err(KanimError::MissingSprite(format!(
                "Sprite \"{name}\" is listed in the project but no image file was provided.\n"
            )));
        }
        warnings.push(Warning::new(format!(
            "Sprite \"{name}\" is listed in the project but no image file was provided. Substituting a 1x1 transparent placeholder."
        )));
        used.push(Sprite {
            name: name.clone(),
            image: RgbaImage::new(1, 1),
        });
    }

    // Symbol packing depends on frames of one symbol being adjacent, so the
    // sprites are ordered by their joined display name.
    used.sort_by_key(|sprite| sprite.name.to_string());

    let entity = root.first_child("entity").ok_or_else(|| {
        KanimError::ProjectStructure("<spriter_data> has no <entity> child".to_string())
    })?;
    let entity_name: String = entity.require("name")?;

    let (build, build_hashes) = pack_build(&used, &pivots, &entity_name);

    let packer = AnimPacker {
        entries: &entries,
        options,
        warnings: &mut warnings,
        hashes: HashTable::new(),
        inconsistent: Vec::new(),
        pivot_anims: Vec::new(),
    };
    let (anim, anim_hashes) = packer.pack(entity)?;

    Ok(ProjectRead {
        set: AnimSet {
            build,
            anim,
            build_hashes,
            anim_hashes,
            sprites: used,
        },
        warnings,
    })
}

/// Reads the `<file>` entries of the first `<folder>`. The project writer
/// only ever emits one folder, and file ids elsewhere refer into it.
fn parse_file_entries(root: &Element) -> Result<BTreeMap<i32, FileEntry>, KanimError> {
    let mut entries = BTreeMap::new();
    if let Some(folder) = root.first_child("folder") {
        for file in folder.children_named("file") {
            let id: i32 = file.require("id")?;
            entries.insert(
                id,
                FileEntry {
                    name: file.require("name")?,
                    pivot_x: file.require("pivot_x")?,
                    pivot_y: file.require("pivot_y")?,
                    width: file.require("width")?,
                    height: file.require("height")?,
                },
            );
        }
    }
    Ok(entries)
}

/// Builds the symbol table from the sorted sprite list. A symbol starts
/// wherever the base name changes, which is why the caller sorts first.
fn pack_build(
    sprites: &[Sprite],
    pivots: &BTreeMap<SpriteName, (f32, f32)>,
    name: &str,
) -> (Build, HashTable) {
    let mut hashes = HashTable::new();
    let mut symbols: Vec<Symbol> = Vec::new();
    let mut last_base: Option<&str> = None;

    for sprite in sprites {
        if last_base != Some(sprite.name.base.as_str()) {
            let hash = klei_hash(&sprite.name.base);
            hashes.insert(hash, sprite.name.base.clone());
            symbols.push(Symbol {
                hash,
                path: hash,
                color: 0,
                flags: 0,
                frames: Vec::new(),
            });
            last_base = Some(sprite.name.base.as_str());
        }

        let pivot_width = sprite.image.width() as f32 * 2.0;
        let pivot_height = sprite.image.height() as f32 * 2.0;
        // Spriter pivots are fractions from the bottom left; the build wants
        // doubled-pixel offsets from the frame center.
        let (pivot_x, pivot_y) = match pivots.get(&sprite.name) {
            Some(pivot) => *pivot,
            None => (0.0, 1.0),
        };
        let frame = BuildFrame {
            source_frame_index: sprite.name.index,
            duration: 1,
            build_image_index: 0,
            pivot_x: -(pivot_x - 0.5) * pivot_width,
            pivot_y: (pivot_y - 0.5) * pivot_height,
            pivot_width,
            pivot_height,
            // UVs are assigned when the atlas is packed at write time.
            uv_x1: 0.0,
            uv_y1: 0.0,
            uv_x2: 0.0,
            uv_y2: 0.0,
        };
        if let Some(symbol) = symbols.last_mut() {
            symbol.frames.push(frame);
        }
    }

    let build = Build {
        version: BUILD_VERSION,
        symbol_count: sprites.iter().filter(|s| s.name.index == 0).count() as i32,
        frame_count: sprites.len() as i32,
        name: name.to_string(),
        symbols,
    };
    (build, hashes)
}

struct AnimPacker<'a> {
    entries: &'a BTreeMap<i32, FileEntry>,
    options: &'a ConvertOptions,
    warnings: &'a mut Vec<Warning>,
    hashes: HashTable,
    inconsistent: Vec<String>,
    pivot_anims: Vec<String>,
}

impl AnimPacker<'_> {
    fn pack(mut self, entity: &Element) -> Result<(Anim, HashTable), KanimError> {
        let max_visible = aggregate_max_visible(entity)?;

        for animation in entity.children_named("animation") {
            let name: String = animation.require("name")?;
            self.hashes.insert(klei_hash(&name), name);
        }

        let mut banks = Vec::new();
        for animation in entity.children_named("animation") {
            banks.push(self.pack_bank(animation)?);
        }

        if !self.inconsistent.is_empty() {
            let hint = if self.options.interpolate {
                String::new()
            } else {
                " Try enabling keyframe interpolation with the \"-i\" flag and try again."
                    .to_string()
            };
            return Err(KanimError::InconsistentIntervals {
                anims: self.inconsistent.join(", "),
                hint,
            });
        }
        if !self.pivot_anims.is_empty() {
            let anims = self.pivot_anims.join(", ");
            if self.options.strict {
                return Err(KanimError::TimelinePivots { anims });
            }
            self.warnings.push(Warning::new(format!(
                "Encountered pivot points specified in timelines in anims {anims}. These pivot point changes will not be respected. Strict-mode is off. Converting anyway."
            )));
        }

        Ok((
            Anim {
                version: ANIM_VERSION,
                element_count: 0,
                frame_count: 0,
                max_visible_symbol_frames: max_visible,
                banks,
            },
            self.hashes,
        ))
    }

    fn pack_bank(&mut self, animation: &Element) -> Result<AnimBank, KanimError> {
        let name: String = animation.require("name")?;
        let hash = klei_hash(&name);

        let mainline = animation.first_child("mainline").ok_or_else(|| {
            KanimError::ProjectStructure(
                "SCML format exception: Can't find <mainline> child of <animation>!".to_string(),
            )
        })?;
        let mut timelines = BTreeMap::new();
        for timeline in animation.children_named("timeline") {
            timelines.insert(timeline.require::<i32>("id")?, timeline);
        }

        let mut interval = -1;
        let mut last_time = -1;
        let mut keyframe_count = 0;
        let mut frames = Vec::new();

        for mainline_key in &mainline.children {
            keyframe_count += 1;

            // The first measurable gap becomes the reference every later gap
            // is judged against.
            if last_time != -1 {
                let this_interval = mainline_key.attr_or("time", 0)? - last_time;
                if interval == -1 {
                    interval = this_interval;
                } else if interval != this_interval {
                    self.warnings.push(Warning::new(format!(
                        "While parsing animation \"{name}\", found inconsistent interval at keyframe {keyframe_count}: it is {this_interval} ms from the last frame, when {interval} ms was expected."
                    )));
                    if !self.inconsistent.contains(&name) {
                        self.inconsistent.push(name.clone());
                    }
                }
            }
            last_time = mainline_key.attr_or("time", 0)?;

            frames.push(self.read_frame(mainline_key, &timelines, &name)?);
        }

        // A single-key animation has no gap to measure; its whole length
        // stands in for the interval rather than dividing by -1.
        if interval == -1 {
            interval = animation.require("length")?;
        }

        Ok(AnimBank {
            name,
            hash,
            rate: MS_PER_SECOND / interval as f32,
            frames,
        })
    }

    fn read_frame(
        &mut self,
        mainline_key: &Element,
        timelines: &BTreeMap<i32, &Element>,
        bank_name: &str,
    ) -> Result<AnimFrame, KanimError> {
        let mut bounds = Bounds::empty();
        let mut elements = Vec::new();

        for object_ref in &mainline_key.children {
            if let Some(element) =
                self.read_element(object_ref, timelines, mainline_key, bank_name, &mut bounds)?
            {
                elements.push(element);
            }
        }

        // Elements draw back to front, so higher z_index comes first. The
        // sort is stable; refs with equal z keep their document order.
        elements.sort_by(|left, right| right.z_index.cmp(&left.z_index));

        Ok(AnimFrame {
            x: (bounds.min_x + bounds.max_x) / 2.0,
            y: (bounds.min_y + bounds.max_y) / 2.0,
            width: bounds.max_x - bounds.min_x,
            height: bounds.max_y - bounds.min_y,
            elements,
        })
    }

    fn read_element(
        &mut self,
        object_ref: &Element,
        timelines: &BTreeMap<i32, &Element>,
        mainline_key: &Element,
        bank_name: &str,
        bounds: &mut Bounds,
    ) -> Result<Option<model::Element>, KanimError> {
        let timeline_id: i32 = object_ref.require("timeline")?;
        let timeline = *timelines.get(&timeline_id).ok_or_else(|| {
            KanimError::ProjectStructure(format!(
                "<object_ref> in \"{bank_name}\" references timeline {timeline_id}, which does not exist"
            ))
        })?;
        let frame_id: i32 = object_ref.require("key")?;

        let frame_node = match find_timeline_key(timeline, frame_id)? {
            Some(node) => node,
            None => {
                self.warnings.push(Warning::new(format!(
                    "Could not find frame {frame_id} in timeline {timeline_id} of anim \"{bank_name}\"!"
                )));
                return Ok(None);
            }
        };
        let object = frame_node.first_child("object").ok_or_else(|| {
            KanimError::ProjectStructure(format!(
                "key {frame_id} in timeline {timeline_id} of \"{bank_name}\" has no <object> child"
            ))
        })?;

        // Resolve the sprite this element draws. A missing or dangling file
        // id falls back to the timeline name in lenient mode.
        let entry = object
            .attr("file")
            .and_then(|value| value.parse::<i32>().ok())
            .and_then(|id| self.entries.get(&id));
        let (image_name, pivot_x, pivot_y, width, height) = match entry {
            Some(entry) => (
                entry.name.clone(),
                entry.pivot_x,
                entry.pivot_y,
                entry.width as f32,
                entry.height as f32,
            ),
            None => {
                let timeline_name: String = timeline.require("name")?;
                if self.options.strict {
                    return Err(KanimError::MissingSprite(format!(
                        "Frame element \"{timeline_name}\" in \"{bank_name}\" does not reference any valid sprite.\n"
                    )));
                }
                self.warnings.push(Warning::new(format!(
                    "Anim \"{timeline_name}\" in \"{bank_name}\" does not reference any valid sprite.\nIf this was not intended behaviour, use the -S/--strict flag to enforce checking this error."
                )));
                (timeline_name, 0.0, 0.0, 1.0, 1.0)
            }
        };

        let sprite = SpriteName::parse(&image_name)?;
        let image_hash = klei_hash(&sprite.base);
        self.hashes.insert(image_hash, sprite.base);

        if object.attr("pivot_x").is_some() || object.attr("pivot_y").is_some() {
            if !self.pivot_anims.iter().any(|anim| anim == bank_name) {
                self.pivot_anims.push(bank_name.to_string());
            }
        }

        let frame_time = frame_node.attr_or("time", 0)?;
        let mainline_time = mainline_key.attr_or("time", 0)?;
        let keys: Vec<&Element> = timeline.children.iter().collect();

        let scale_x =
            interpolated_attr(object, &keys, frame_id, frame_time, mainline_time, "scale_x", 1.0)?;
        let scale_y =
            interpolated_attr(object, &keys, frame_id, frame_time, mainline_time, "scale_y", 1.0)?;
        let angle =
            interpolated_attr(object, &keys, frame_id, frame_time, mainline_time, "angle", 0.0)?;
        let x_offset =
            interpolated_attr(object, &keys, frame_id, frame_time, mainline_time, "x", 0.0)?;
        let y_offset =
            interpolated_attr(object, &keys, frame_id, frame_time, mainline_time, "y", 0.0)?;

        let radians = f64::from(angle).to_radians();
        let sin = radians.sin() as f32;
        let cos = radians.cos() as f32;

        let element = model::Element {
            image: image_hash,
            index: sprite.index,
            layer: image_hash,
            a: object_ref.attr_or("a", 1.0)?,
            m1: scale_x * cos,
            m2: scale_x * -sin,
            m3: scale_y * sin,
            m4: scale_y * cos,
            m5: x_offset * 2.0,
            m6: -y_offset * 2.0,
            z_index: object_ref.require("z_index")?,
            ..model::Element::default()
        };

        // The pivot is the local origin for the offsets and the center of
        // rotation; scaling applies about the true origin afterwards.
        let center_x = pivot_x * width + x_offset;
        let center_y = pivot_y * height + y_offset;
        let far_x = x_offset + width;
        let far_y = y_offset + height;
        let corners = [
            (x_offset, y_offset),
            (far_x, y_offset),
            (far_x, far_y),
            (x_offset, far_y),
        ];
        for (corner_x, corner_y) in corners {
            let dx = corner_x - center_x;
            let dy = corner_y - center_y;
            let rotated_x = center_x + dx * cos - dy * sin;
            let rotated_y = center_y + dx * sin + dy * cos;
            bounds.include(rotated_x * scale_x, rotated_y * scale_y);
        }

        Ok(Some(element))
    }
}

/// First pass over the entity: validates the project shape and finds the
/// largest element count any single keyframe uses.
fn aggregate_max_visible(entity: &Element) -> Result<i32, KanimError> {
    let mut max_visible = 0;
    for animation in &entity.children {
        if animation.name == "character_map" {
            continue;
        }
        if animation.name != "animation" {
            return Err(KanimError::ProjectStructure(format!(
                "SCML format exception: all children of <entity> must be <animation>, was <{}> instead.",
                animation.name
            )));
        }
        let mainline = animation.first_child("mainline").ok_or_else(|| {
            KanimError::ProjectStructure(
                "SCML format exception: Can't find <mainline> child of <animation>!".to_string(),
            )
        })?;
        for key in &mainline.children {
            if key.name != "key" {
                return Err(KanimError::ProjectStructure(format!(
                    "SCML format exception: all children of <animation> should be <key>, was <{}> instead.",
                    key.name
                )));
            }
            for object_ref in &key.children {
                if object_ref.name != "object_ref" {
                    return Err(KanimError::ProjectStructure(format!(
                        "SCML format exception: all children of <key> should be <object_ref>, was <{}> instead.",
                        object_ref.name
                    )));
                }
            }
            max_visible = max_visible.max(key.children.len() as i32);
        }
    }
    Ok(max_visible)
}

/// Scans a timeline for the key with the given id. A child that is not a
/// `<key>` makes the whole lookup miss; callers treat a miss as a skippable
/// element.
fn find_timeline_key(timeline: &Element, frame_id: i32) -> Result<Option<&Element>, KanimError> {
    for key in &timeline.children {
        if key.name != "key" {
            return Ok(None);
        }
        if key.require::<i32>("id")? == frame_id {
            return Ok(Some(key));
        }
    }
    Ok(None)
}

/// Value of `attr` for one element: read straight off the key when the
/// timeline key sits on the mainline time, interpolated from the
/// surrounding keys otherwise.
fn interpolated_attr(
    object: &Element,
    keys: &[&Element],
    frame_id: i32,
    frame_time: i32,
    mainline_time: i32,
    attr: &str,
    default: f32,
) -> Result<f32, KanimError> {
    if frame_time == mainline_time && object.attr(attr).is_some() {
        return object.require(attr);
    }

    let prev = usize::try_from(frame_id)
        .ok()
        .and_then(|index| keys.get(index).copied());
    let Some(prev) = prev else {
        return Ok(default);
    };
    let next = usize::try_from(frame_id + 1)
        .ok()
        .and_then(|index| keys.get(index).copied());
    match next {
        None => first_child_attr_or(prev, attr, default),
        Some(next) => lerp_between(prev, next, mainline_time, attr, default),
    }
}

fn first_child_attr_or(key: &Element, attr: &str, default: f32) -> Result<f32, KanimError> {
    match key.children.first() {
        Some(child) => child.attr_or(attr, default),
        None => Ok(default),
    }
}

fn lerp_between(
    prev: &Element,
    next: &Element,
    time: i32,
    attr: &str,
    default: f32,
) -> Result<f32, KanimError> {
    let t1 = prev.attr_or("time", 0)? as f32;
    let t2 = next.attr_or("time", 0)? as f32;
    let v1 = first_child_attr_or(prev, attr, default)?;
    if t1 == t2 {
        return Ok(v1);
    }
    let v2 = first_child_attr_or(next, attr, default)?;
    Ok(v1 + (v2 - v1) * (time as f32 - t1) / (t2 - t1))
}

#[derive(Debug, Clone, Copy)]
struct Bounds {
    min_x: f32,
    min_y: f32,
    max_x: f32,
    max_y: f32,
}

impl Bounds {
    fn empty() -> Self {
        Bounds {
            min_x: f32::MAX,
            min_y: f32::MAX,
            max_x: f32::MIN,
            max_y: f32::MIN,
        }
    }

    fn include(&mut self, x: f32, y: f32) {
        self.min_x = self.min_x.min(x);
        self.min_y = self.min_y.min(y);
        self.max_x = self.max_x.max(x);
        self.max_y = self.max_y.max(y);
    }
}
