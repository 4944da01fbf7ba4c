//! Writes an animation set out as a Spriter project.
//!
//! The document mirrors what the reader consumes: one `<folder>` of file
//! entries built from the build table, one `<entity>` holding an
//! `<animation>` per bank, and inside each a `<mainline>` of object
//! references plus one `<timeline>` per synthetic object id. Matrices are
//! decomposed back into (x, y, angle, scale) attributes, so the project is
//! visually equivalent rather than bit-identical.

use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

use crate::convert::{ConvertOptions, OutputFiles};
use crate::error::{KanimError, Warning};
use crate::kanim;
use crate::model::{self, AnimBank, AnimSet, HashTable};
use crate::names::SpriteName;
use crate::scml::MS_PER_SECOND;
use crate::xml::{self, Element};

/// Writes the project document and its loose sprite files.
///
/// The returned map holds `<name>.scml` plus one `<sprite>.png` per sprite
/// in the set. Elements that resolve to no sprite in the build are fatal in
/// strict mode; otherwise they get a synthesized 1x1 file entry.
pub fn write_project(
    set: &AnimSet,
    options: &ConvertOptions,
) -> Result<(OutputFiles, Vec<Warning>), KanimError> {
    let mut warnings = Vec::new();

    let mut root = Element::new("spriter_data");
    root.set_attr("scml_version", "1.0");
    root.set_attr("generator", "kanimate");
    root.set_attr("generator_version", "v1");

    let mut files = FileTable::build(set)?;

    let mut entity = Element::new("entity");
    entity.set_attr("id", "0");
    entity.set_attr("name", set.build.name.clone());

    let mut memo = IdMapMemo::new();
    for (bank_index, bank) in set.anim.banks.iter().enumerate() {
        let rate = (MS_PER_SECOND / bank.rate) as i32;
        let ids = memo.get(bank_index, bank, &set.anim_hashes)?;

        let mut animation = Element::new("animation");
        animation.set_attr("id", bank_index.to_string());
        animation.set_attr("name", bank.name.clone());
        animation.set_attr("length", (rate * bank.frames.len() as i32).to_string());
        animation.set_attr("interval", rate.to_string());

        animation.push(write_mainline(bank, rate, ids, &set.anim_hashes)?);
        let timelines = write_timelines(
            bank,
            rate,
            ids,
            &set.anim_hashes,
            &mut files,
            options,
            &mut warnings,
        )?;
        for timeline in timelines {
            animation.push(timeline);
        }
        entity.push(animation);
    }

    root.push(files.folder);
    root.push(entity);

    let document = xml::write_document(&root)?;

    let mut output = OutputFiles::new();
    output.insert(format!("{}.scml", set.build.name), document.into_bytes());
    for sprite in &set.sprites {
        output.insert(
            format!("{}.png", sprite.name),
            kanim::encode_png(&sprite.image)?,
        );
    }

    Ok((output, warnings))
}

/// The `<folder>` under construction plus the sprite-name-to-file-id index.
/// Missing sprites can be patched in as 1x1 placeholder entries mid-write.
struct FileTable {
    folder: Element,
    index: BTreeMap<String, i32>,
}

impl FileTable {
    /// One `<file>` per build frame, in symbol order. A name collision (two
    /// frames sharing a source index) keeps the first file id reachable and
    /// stores the duplicate under a mangled key.
    fn build(set: &AnimSet) -> Result<FileTable, KanimError> {
        let mut sizes = BTreeMap::new();
        for sprite in &set.sprites {
            sizes.insert(sprite.name.clone(), sprite.image.dimensions());
        }

        let mut folder = Element::new("folder");
        folder.set_attr("id", "0");
        let mut index = BTreeMap::new();

        let mut file_id = 0;
        for symbol in &set.build.symbols {
            let base = set
                .build_hashes
                .get(&symbol.hash)
                .ok_or(KanimError::UnknownHash(symbol.hash))?;
            for frame in &symbol.frames {
                let name = SpriteName::new(base.clone(), frame.source_frame_index);
                let display = name.to_string();
                let mut key = display.clone();
                if index.contains_key(&key) {
                    key = format!("{key}_{file_id}");
                }
                index.insert(key, file_id);

                let (width, height) = match sizes.get(&name) {
                    Some(size) => (size.0 as i32, size.1 as i32),
                    None => (
                        (frame.pivot_width / 2.0) as i32,
                        (frame.pivot_height / 2.0) as i32,
                    ),
                };
                // Normalized pivot: a fraction of the frame extent with the
                // origin at the bottom left.
                let pivot_x = -(frame.pivot_x - frame.pivot_width / 2.0) / frame.pivot_width;
                let pivot_y = 1.0 + (frame.pivot_y - frame.pivot_height / 2.0) / frame.pivot_height;

                let mut file = Element::new("file");
                file.set_attr("id", file_id.to_string());
                file.set_attr("name", display);
                file.set_attr("width", width.to_string());
                file.set_attr("height", height.to_string());
                file.set_attr("pivot_x", format_sig(pivot_x, 9));
                file.set_attr("pivot_y", format_sig(pivot_y, 9));
                folder.push(file);

                file_id += 1;
            }
        }

        Ok(FileTable { folder, index })
    }

    fn file_id(&self, filename: &str) -> Option<i32> {
        self.index.get(filename).copied()
    }

    fn add_placeholder(&mut self, filename: &str) -> i32 {
        let id = self.folder.children.len() as i32;
        let mut file = Element::new("file");
        file.set_attr("id", id.to_string());
        file.set_attr("name", filename);
        file.set_attr("width", "1");
        file.set_attr("height", "1");
        file.set_attr("pivot_x", "0");
        file.set_attr("pivot_y", "1");
        self.folder.push(file);
        self.index.insert(filename.to_string(), id);
        id
    }
}

fn write_mainline(
    bank: &AnimBank,
    rate: i32,
    ids: &BTreeMap<String, i32>,
    hashes: &HashTable,
) -> Result<Element, KanimError> {
    let mut mainline = Element::new("mainline");
    for (frame_index, frame) in bank.frames.iter().enumerate() {
        let mut key = keyframe(frame_index, rate);
        let mut occurrences = OccurrenceCounter::default();
        let count = frame.elements.len() as i32;
        for (element_index, element) in frame.elements.iter().enumerate() {
            let occ_name = occurrences.next_name(&element_name(element, hashes)?);
            let id = object_id(ids, &occ_name, &bank.name)?;

            let mut object_ref = Element::new("object_ref");
            object_ref.set_attr("id", id.to_string());
            object_ref.set_attr("timeline", id.to_string());
            // Timeline keys are written for every frame, so the key id is
            // always the frame index itself.
            object_ref.set_attr("key", frame_index.to_string());
            object_ref.set_attr("z_index", (count - element_index as i32).to_string());
            key.push(object_ref);
        }
        mainline.push(key);
    }
    Ok(mainline)
}

fn write_timelines(
    bank: &AnimBank,
    rate: i32,
    ids: &BTreeMap<String, i32>,
    hashes: &HashTable,
    files: &mut FileTable,
    options: &ConvertOptions,
    warnings: &mut Vec<Warning>,
) -> Result<Vec<Element>, KanimError> {
    let mut timelines: BTreeMap<i32, Element> = BTreeMap::new();
    for (name, id) in ids {
        let mut timeline = Element::new("timeline");
        timeline.set_attr("id", id.to_string());
        timeline.set_attr("name", name.clone());
        timelines.insert(*id, timeline);
    }

    for (frame_index, frame) in bank.frames.iter().enumerate() {
        let mut occurrences = OccurrenceCounter::default();
        for element in &frame.elements {
            let name = element_name(element, hashes)?;
            let occ_name = occurrences.next_name(&name);
            let id = object_id(ids, &occ_name, &bank.name)?;

            let file_id = match files.file_id(&name) {
                Some(file_id) => file_id,
                None => {
                    if options.strict {
                        return Err(KanimError::MissingSprite(format!(
                            "Element \"{name}\" in \"{}\" does not match any sprite in the build.\n",
                            bank.name
                        )));
                    }
                    warnings.push(Warning::new(format!(
                        "Element \"{name}\" in \"{}\" does not match any sprite in the build. Writing a 1x1 placeholder file entry.",
                        bank.name
                    )));
                    files.add_placeholder(&name)
                }
            };

            let transform = decompose(element);
            let mut object = Element::new("object");
            object.set_attr("folder", "0");
            object.set_attr("file", file_id.to_string());
            object.set_attr("x", format_sig(transform.x * 0.5, 5));
            object.set_attr("y", format_sig(-transform.y * 0.5, 5));
            object.set_attr("angle", format_sig(transform.angle, 5));
            object.set_attr("scale_x", format_sig(transform.scale_x, 5));
            object.set_attr("scale_y", format_sig(transform.scale_y, 5));

            let mut key = keyframe(frame_index, rate);
            key.push(object);
            if let Some(timeline) = timelines.get_mut(&id) {
                timeline.push(key);
            }
        }
    }

    Ok(timelines.into_values().collect())
}

fn keyframe(frame_index: usize, rate: i32) -> Element {
    let mut key = Element::new("key");
    key.set_attr("id", frame_index.to_string());
    key.set_attr("time", (frame_index as i32 * rate).to_string());
    key
}

fn element_name(element: &model::Element, hashes: &HashTable) -> Result<String, KanimError> {
    let base = hashes
        .get(&element.image)
        .ok_or(KanimError::UnknownHash(element.image))?;
    Ok(format!("{base}_{}", element.index))
}

fn object_id(
    ids: &BTreeMap<String, i32>,
    occ_name: &str,
    bank_name: &str,
) -> Result<i32, KanimError> {
    ids.get(occ_name).copied().ok_or_else(|| {
        KanimError::ProjectStructure(format!(
            "no synthetic object id for \"{occ_name}\" in \"{bank_name}\""
        ))
    })
}

/// Counts how often each sprite name has appeared in the current frame and
/// hands out `name_occurrence` labels.
#[derive(Default)]
struct OccurrenceCounter {
    counts: BTreeMap<String, i32>,
}

impl OccurrenceCounter {
    fn next_name(&mut self, name: &str) -> String {
        let count = self
            .counts
            .entry(name.to_string())
            .and_modify(|count| *count += 1)
            .or_insert(0);
        format!("{name}_{count}")
    }
}

/// Memoized per-bank synthetic object ids, invalidated by content: a cached
/// map is reused only while the hash table still fingerprints the same.
struct IdMapMemo {
    fingerprint: u64,
    maps: BTreeMap<usize, BTreeMap<String, i32>>,
}

impl IdMapMemo {
    fn new() -> Self {
        IdMapMemo {
            fingerprint: 0,
            maps: BTreeMap::new(),
        }
    }

    fn get(
        &mut self,
        bank_index: usize,
        bank: &AnimBank,
        hashes: &HashTable,
    ) -> Result<&BTreeMap<String, i32>, KanimError> {
        let fingerprint = table_fingerprint(hashes);
        if fingerprint != self.fingerprint {
            self.maps.clear();
            self.fingerprint = fingerprint;
        }
        if !self.maps.contains_key(&bank_index) {
            self.maps.insert(bank_index, build_id_map(bank, hashes)?);
        }
        Ok(&self.maps[&bank_index])
    }
}

fn table_fingerprint(hashes: &HashTable) -> u64 {
    let mut hasher = DefaultHasher::new();
    for (hash, name) in hashes {
        hash.hash(&mut hasher);
        name.hash(&mut hasher);
    }
    hasher.finish()
}

/// Assigns consecutive synthetic ids to every object occurrence the bank
/// needs. Each sprite name gets as many ids as its maximum simultaneous
/// on-screen count, in sorted-name order, so a sprite drawn twice in one
/// frame owns two timelines.
fn build_id_map(bank: &AnimBank, hashes: &HashTable) -> Result<BTreeMap<String, i32>, KanimError> {
    let mut max_occurrences: BTreeMap<String, i32> = BTreeMap::new();
    for frame in &bank.frames {
        let mut in_frame: BTreeMap<String, i32> = BTreeMap::new();
        for element in &frame.elements {
            *in_frame.entry(element_name(element, hashes)?).or_insert(0) += 1;
        }
        for (name, count) in in_frame {
            let max = max_occurrences.entry(name).or_insert(0);
            if count > *max {
                *max = count;
            }
        }
    }

    let mut ids = BTreeMap::new();
    let mut next_id = 0;
    for (name, count) in &max_occurrences {
        for occurrence in 0..*count {
            ids.insert(format!("{name}_{occurrence}"), next_id);
            next_id += 1;
        }
    }
    Ok(ids)
}

/// A best-fit (translation, angle, scale) reading of an element matrix. The
/// matrix is not necessarily a pure rotation, so the sine and cosine are
/// averaged across both columns before the angle is taken.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Transform {
    x: f32,
    y: f32,
    angle: f32,
    scale_x: f32,
    scale_y: f32,
}

fn decompose(element: &model::Element) -> Transform {
    let scale_x = (element.m1 * element.m1 + element.m2 * element.m2).sqrt();
    let mut scale_y = (element.m3 * element.m3 + element.m4 * element.m4).sqrt();
    let det = element.m1 * element.m4 - element.m3 * element.m2;
    if det < 0.0 {
        scale_y = -scale_y;
    }

    let angle = if scale_x == 0.0 || scale_y == 0.0 {
        0.0
    } else {
        let sin = 0.5 * (f64::from(element.m3 / scale_y) - f64::from(element.m2 / scale_x));
        let cos = 0.5 * (f64::from(element.m1 / scale_x) + f64::from(element.m4 / scale_y));
        let mut degrees = sin.atan2(cos).to_degrees() as f32;
        if degrees < 0.0 {
            degrees += 360.0;
        }
        degrees
    };

    Transform {
        x: element.m5,
        y: element.m6,
        angle,
        scale_x,
        scale_y,
    }
}

/// Formats with `digits` significant digits in plain decimal notation,
/// trailing zeros trimmed.
fn format_sig(value: f32, digits: usize) -> String {
    if !value.is_finite() {
        return value.to_string();
    }
    if value == 0.0 {
        return "0".to_string();
    }
    let magnitude = value.abs().log10().floor() as i32;
    let decimals = (digits as i32 - 1 - magnitude).max(0) as usize;
    let mut text = format!("{value:.decimals$}");
    if text.contains('.') {
        while text.ends_with('0') {
            text.pop();
        }
        if text.ends_with('.') {
            text.pop();
        }
    }
    text
}
