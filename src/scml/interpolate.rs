//! Rebuilds animations onto a uniform keyframe grid.
//!
//! Spriter lets keys sit at arbitrary times and interpolates between them at
//! runtime; the binary format stores exactly one frame per interval. This
//! processor fills every grid slot of every animation, linearly interpolating
//! position, angle, and scale where the project leaves frames implicit, and
//! rewrites each animation with one mainline key per slot.

use std::collections::BTreeMap;

use crate::error::KanimError;
use crate::xml::Element;

/// Rewrites every `<animation>` under `<entity>` onto its keyframe grid.
///
/// Non-animation children of the entity are preserved; the rebuilt
/// animations are appended after them with freshly numbered ids. Keys at
/// times that are not multiples of the animation's interval are fatal, as
/// are pivot points given on timeline keys.
pub fn interpolate_keyframes(document: &Element) -> Result<Element, KanimError> {
    let mut root = document.clone();
    let entity = root
        .children
        .iter_mut()
        .find(|child| child.name == "entity")
        .ok_or_else(|| {
            KanimError::ProjectStructure("<spriter_data> has no <entity> child".to_string())
        })?;

    let children = std::mem::take(&mut entity.children);
    let mut animations = Vec::new();
    for child in children {
        if child.name == "animation" {
            animations.push(parse_animation(child)?);
        } else {
            entity.children.push(child);
        }
    }
    for (id, animation) in animations.iter().enumerate() {
        entity.children.push(rebuild_animation(id, animation)?);
    }
    Ok(root)
}

/// Timelines never switch between bone and sprite mid-animation; the kind is
/// taken from the first mainline ref that mentions the timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChildKind {
    Sprite,
    Bone,
}

/// Maps the project's timeline ids to dense zero-based indices, in order of
/// first appearance in the mainline, along with each timeline's kind and
/// name.
struct TimelineInfo {
    ids: BTreeMap<i32, usize>,
    kinds: Vec<ChildKind>,
    names: Vec<Option<String>>,
    originals: Vec<i32>,
}

impl TimelineInfo {
    fn build(animation: &Element, name: &str) -> Result<TimelineInfo, KanimError> {
        let mut info = TimelineInfo {
            ids: BTreeMap::new(),
            kinds: Vec::new(),
            names: Vec::new(),
            originals: Vec::new(),
        };
        for key in mainline_of(animation)?.children_named("key") {
            for reference in key.children.iter().filter(|child| is_ref(child)) {
                let timeline: i32 = reference.require("timeline")?;
                if !info.ids.contains_key(&timeline) {
                    info.ids.insert(timeline, info.kinds.len());
                    info.kinds.push(if reference.name == "bone_ref" {
                        ChildKind::Bone
                    } else {
                        ChildKind::Sprite
                    });
                    info.names.push(None);
                    info.originals.push(timeline);
                }
            }
        }
        for timeline in animation.children_named("timeline") {
            let id: i32 = timeline.require("id")?;
            let index = info.ids.get(&id).copied().ok_or_else(|| {
                KanimError::ProjectStructure(format!(
                    "timeline {id} in animation \"{name}\" is never referenced from the mainline"
                ))
            })?;
            info.names[index] = Some(timeline.attr("name").unwrap_or("").to_string());
        }
        Ok(info)
    }

    fn index_of(&self, timeline: i32, name: &str) -> Result<usize, KanimError> {
        self.ids.get(&timeline).copied().ok_or_else(|| {
            KanimError::ProjectStructure(format!(
                "animation \"{name}\" references timeline {timeline} outside the mainline's assignments"
            ))
        })
    }

    fn size(&self) -> usize {
        self.kinds.len()
    }

    fn name_of(&self, index: usize) -> Result<&str, KanimError> {
        self.names[index].as_deref().ok_or_else(|| {
            KanimError::ProjectStructure(format!(
                "the mainline references timeline {} but no <timeline> with that id exists",
                self.originals[index]
            ))
        })
    }
}

/// One timeline's state at one grid slot.
#[derive(Debug, Clone, Copy, PartialEq)]
struct ProcessingFrame {
    parent_id: i32,
    z_index: i32,
    folder: i32,
    file: i32,
    x: f32,
    y: f32,
    angle: f32,
    scale_x: f32,
    scale_y: f32,
    populated: bool,
}

impl ProcessingFrame {
    /// A frame known only from the mainline. Transform fields stay zero
    /// until a timeline key populates them; a frame that never gets one is
    /// written back with all-zero attributes.
    fn new(parent_id: i32, z_index: i32) -> Self {
        ProcessingFrame {
            parent_id,
            z_index,
            folder: 0,
            file: 0,
            x: 0.0,
            y: 0.0,
            angle: 0.0,
            scale_x: 0.0,
            scale_y: 0.0,
            populated: false,
        }
    }

    fn populate(
        &mut self,
        folder: i32,
        file: i32,
        x: f32,
        y: f32,
        angle: f32,
        scale_x: f32,
        scale_y: f32,
    ) {
        self.folder = folder;
        self.file = file;
        self.x = x;
        self.y = y;
        self.angle = angle;
        self.scale_x = scale_x;
        self.scale_y = scale_y;
        self.populated = true;
    }
}

struct ProcessingAnimation {
    name: String,
    step: i32,
    length: i32,
    slots: usize,
    /// Indexed `[timeline][slot]`. `None` means the timeline has no frame at
    /// that slot.
    frames: Vec<Vec<Option<ProcessingFrame>>>,
    info: TimelineInfo,
}

fn parse_animation(animation: Element) -> Result<ProcessingAnimation, KanimError> {
    let name = animation.attr("name").unwrap_or("").to_string();
    let length: i32 = animation.require("length")?;
    let interval: i32 = animation.require("interval")?;
    if interval <= 0 {
        return Err(KanimError::ProjectStructure(format!(
            "animation \"{name}\" has non-positive interval {interval} ms"
        )));
    }

    let info = TimelineInfo::build(&animation, &name)?;
    let slots = (length / interval + 1) as usize;
    let mut frames: Vec<Vec<Option<ProcessingFrame>>> = vec![vec![None; slots]; info.size()];
    let mut broken_snapping = false;

    // The mainline says which timelines have a frame at each slot, plus the
    // parenting and draw order. Parent ids are rewritten from the per-key
    // bone numbering to the dense timeline indices.
    let mainline = mainline_of(&animation)?;
    for key in mainline.children_named("key") {
        let time: i32 = key.attr_or("time", 0)?;
        if time % interval != 0 {
            broken_snapping = true;
        }
        let slot = slot_index(time, interval, slots, &name)?;

        let mut bones = BTreeMap::new();
        for reference in key.children_named("bone_ref") {
            let id: i32 = reference.require("id")?;
            let timeline: i32 = reference.require("timeline")?;
            let index = info.index_of(timeline, &name)?;
            if bones.insert(id, index).is_some() {
                return Err(KanimError::ProjectStructure(format!(
                    "animation \"{name}\" declares bone id {id} twice in one mainline key"
                )));
            }
        }
        for reference in key.children.iter().filter(|child| is_ref(child)) {
            let timeline: i32 = reference.require("timeline")?;
            let index = info.index_of(timeline, &name)?;
            let z_index: i32 = reference.attr_or("z_index", 0)?;
            let parent = match reference.attr("parent") {
                Some(_) => {
                    let declared: i32 = reference.require("parent")?;
                    let mapped = bones.get(&declared).copied().ok_or_else(|| {
                        KanimError::ProjectStructure(format!(
                            "animation \"{name}\" has a ref with parent {declared} that is not a bone in the same key"
                        ))
                    })?;
                    mapped as i32
                }
                None => -1,
            };
            frames[index][slot] = Some(ProcessingFrame::new(parent, z_index));
        }
    }

    // Timeline keys carry the transforms. x, y, and angle persist across
    // keys within a timeline: a key that omits one keeps the previous key's
    // value. Scale resets to 1 on every key.
    let mut timeline_pivots = false;
    for timeline in animation.children_named("timeline") {
        let original: i32 = timeline.require("id")?;
        let index = info.index_of(original, &name)?;
        let mut x = 0.0_f32;
        let mut y = 0.0_f32;
        let mut angle = 0.0_f32;
        for key in timeline.children_named("key") {
            let time: i32 = key.attr_or("time", 0)?;
            if time % interval != 0 {
                broken_snapping = true;
            }
            let slot = slot_index(time, interval, slots, &name)?;
            let child = key
                .first_child("object")
                .or_else(|| key.first_child("bone"))
                .ok_or_else(|| {
                    KanimError::ProjectStructure(
                        "Found timeline key without child object or bone".to_string(),
                    )
                })?;

            let folder: i32 = child.attr_or("folder", -1)?;
            let file: i32 = child.attr_or("file", -1)?;
            x = child.attr_or("x", x)?;
            y = child.attr_or("y", y)?;
            angle = child.attr_or("angle", angle)?;
            let scale_x: f32 = child.attr_or("scale_x", 1.0)?;
            let scale_y: f32 = child.attr_or("scale_y", 1.0)?;

            match frames[index][slot].as_mut() {
                Some(frame) => frame.populate(folder, file, x, y, angle, scale_x, scale_y),
                None => {
                    return Err(KanimError::ProjectStructure(format!(
                        "timeline {original} in animation \"{name}\" keys a frame at {time} ms that no mainline key references"
                    )))
                }
            }

            if child.attr("pivot_x").is_some() || child.attr("pivot_y").is_some() {
                timeline_pivots = true;
            }
        }
    }

    if broken_snapping {
        return Err(KanimError::BrokenSnapping {
            anims: name,
            interval,
        });
    }
    if timeline_pivots {
        return Err(KanimError::TimelinePivots { anims: name });
    }

    let mut key_slots = vec![false; slots];
    for key in mainline.children_named("key") {
        let time: i32 = key.attr_or("time", 0)?;
        key_slots[slot_index(time, interval, slots, &name)?] = true;
    }

    // A timeline is "present" from a mainline key that references it until
    // the next mainline key that does not. Two sweeps so presence carried at
    // the end of the loop wraps around to slots before the first keyframe.
    let mut presence = vec![vec![false; slots]; info.size()];
    for (timeline, row) in presence.iter_mut().enumerate() {
        let mut current = false;
        for _ in 0..2 {
            for (slot, flag) in row.iter_mut().enumerate() {
                if key_slots[slot] {
                    current = frames[timeline][slot].is_some();
                }
                *flag = current;
            }
        }
    }

    // Fill the gaps. Two sweeps: frames filled by the first sweep serve as
    // anchors for slots the first sweep reached before finding any.
    for _ in 0..2 {
        for timeline in 0..info.size() {
            let mut before: Option<(ProcessingFrame, usize)> = None;
            let mut after: Option<(ProcessingFrame, usize)> = None;
            for slot in 0..slots {
                if !presence[timeline][slot] {
                    continue;
                }
                if let Some(anchor) = frames[timeline][slot].filter(|frame| frame.populated) {
                    before = Some((anchor, slot));
                    // Probe forward for the next populated frame, wrapping
                    // at the end; presence gaps stop the probe.
                    let mut probe = (slot + 1) % slots;
                    let mut found = None;
                    while presence[timeline][probe] {
                        if let Some(candidate) =
                            frames[timeline][probe].filter(|frame| frame.populated)
                        {
                            found = Some((candidate, probe));
                            break;
                        }
                        probe = (probe + 1) % slots;
                    }
                    if found.is_some() {
                        after = found;
                    } else if after.is_none() {
                        // A lone frame stretches across its whole presence
                        // span.
                        after = before;
                    }
                } else if let (Some((from, t0)), Some((to, t1))) = (before, after) {
                    let t1 = if t1 < t0 { t1 + slots } else { t1 };
                    let x = lerp(from.x, to.x, t0, t1, slot);
                    let y = lerp(from.y, to.y, t0, t1, slot);
                    let angle = lerp_angle(from.angle, to.angle, t0, t1, slot);
                    let scale_x = lerp(from.scale_x, to.scale_x, t0, t1, slot);
                    let scale_y = lerp(from.scale_y, to.scale_y, t0, t1, slot);
                    let cell = frames[timeline][slot]
                        .get_or_insert_with(|| ProcessingFrame::new(from.parent_id, from.z_index));
                    cell.populate(from.folder, from.file, x, y, angle, scale_x, scale_y);
                }
            }
        }
    }

    Ok(ProcessingAnimation {
        name,
        step: interval,
        length,
        slots,
        frames,
        info,
    })
}

fn rebuild_animation(id: usize, animation: &ProcessingAnimation) -> Result<Element, KanimError> {
    let mut element = Element::new("animation");
    element.set_attr("id", id.to_string());
    element.set_attr("name", animation.name.clone());
    element.set_attr("length", animation.length.to_string());
    element.set_attr("interval", animation.step.to_string());

    let mut mainline = Element::new("mainline");
    for slot in 0..animation.slots {
        let mut key = Element::new("key");
        key.set_attr("id", slot.to_string());
        key.set_attr("time", (slot as i32 * animation.step).to_string());
        for (timeline, row) in animation.frames.iter().enumerate() {
            let Some(frame) = row[slot] else { continue };
            let kind = animation.info.kinds[timeline];
            let mut reference = match kind {
                ChildKind::Bone => Element::new("bone_ref"),
                ChildKind::Sprite => Element::new("object_ref"),
            };
            reference.set_attr("id", timeline.to_string());
            reference.set_attr("timeline", timeline.to_string());
            reference.set_attr("key", slot.to_string());
            if frame.parent_id != -1 {
                reference.set_attr("parent", frame.parent_id.to_string());
            }
            if kind == ChildKind::Sprite {
                reference.set_attr("z_index", frame.z_index.to_string());
            }
            key.push(reference);
        }
        mainline.push(key);
    }
    element.push(mainline);

    for (timeline, row) in animation.frames.iter().enumerate() {
        let mut node = Element::new("timeline");
        node.set_attr("id", timeline.to_string());
        node.set_attr("name", animation.info.name_of(timeline)?);
        for (slot, cell) in row.iter().enumerate() {
            let Some(frame) = cell else { continue };
            let mut key = Element::new("key");
            key.set_attr("id", slot.to_string());
            key.set_attr("time", (slot as i32 * animation.step).to_string());
            let mut child = match animation.info.kinds[timeline] {
                ChildKind::Bone => Element::new("bone"),
                ChildKind::Sprite => {
                    let mut object = Element::new("object");
                    object.set_attr("folder", frame.folder.to_string());
                    object.set_attr("file", frame.file.to_string());
                    object
                }
            };
            child.set_attr("x", frame.x.to_string());
            child.set_attr("y", frame.y.to_string());
            child.set_attr("angle", frame.angle.to_string());
            child.set_attr("scale_x", frame.scale_x.to_string());
            child.set_attr("scale_y", frame.scale_y.to_string());
            key.push(child);
            node.push(key);
        }
        element.push(node);
    }
    Ok(element)
}

fn is_ref(child: &Element) -> bool {
    child.name == "object_ref" || child.name == "bone_ref"
}

fn mainline_of(animation: &Element) -> Result<&Element, KanimError> {
    animation.first_child("mainline").ok_or_else(|| {
        KanimError::ProjectStructure(
            "SCML format exception: Can't find <mainline> child of <animation>!".to_string(),
        )
    })
}

fn slot_index(time: i32, interval: i32, slots: usize, name: &str) -> Result<usize, KanimError> {
    usize::try_from(time / interval)
        .ok()
        .filter(|slot| *slot < slots)
        .ok_or_else(|| {
            KanimError::ProjectStructure(format!(
                "animation \"{name}\" has a keyframe at {time} ms outside its declared length"
            ))
        })
}

fn lerp(x0: f32, x1: f32, t0: usize, t1: usize, t: usize) -> f32 {
    if t0 == t1 {
        return x0;
    }
    let (t0, t1, t) = (t0 as f32, t1 as f32, t as f32);
    let a = (x0 - x1) / (t0 - t1);
    let b = x0 - a * t0;
    a * t + b
}

/// Interpolates along the shorter arc, the same route the editor animates,
/// and keeps the result within [0, 360).
fn lerp_angle(mut x0: f32, mut x1: f32, t0: usize, t1: usize, t: usize) -> f32 {
    if t0 == t1 {
        return x0;
    }
    if (x1 - x0).abs() > 180.0 {
        if x1 > x0 {
            x0 += 360.0;
        } else {
            x1 += 360.0;
        }
    }
    let angle = lerp(x0, x1, t0, t1, t);
    if angle >= 360.0 {
        angle - 360.0
    } else {
        angle
    }
}
