//! Sprite atlas packing.
//!
//! Sprites are packed with the MaxRects algorithm using the
//! best-short-side-fit rule, into a sheet that starts at 256x256 and
//! doubles its smaller axis until everything fits.

use image::RgbaImage;

use crate::error::KanimError;
use crate::model::Sprite;
use crate::names::SpriteName;

const INITIAL_SIDE: i32 = 256;
const MAX_SIDE: i32 = 65_536;

/// An axis-aligned rectangle in atlas pixel space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    fn contains(&self, other: &Rect) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.x + other.width <= self.x + self.width
            && other.y + other.height <= self.y + self.height
    }
}

/// MaxRects bin packer over a fixed sheet size.
///
/// The free list starts as the whole sheet. Each placement splits every
/// overlapping free rectangle into up to four residual slivers, then the
/// list is pruned of rectangles contained in others.
pub struct MaxRects {
    free: Vec<Rect>,
}

impl MaxRects {
    pub fn new(width: i32, height: i32) -> Self {
        MaxRects {
            free: vec![Rect {
                x: 0,
                y: 0,
                width,
                height,
            }],
        }
    }

    /// Places a `width` x `height` rectangle, or returns None if no free
    /// rectangle can hold it.
    pub fn insert(&mut self, width: i32, height: i32) -> Option<Rect> {
        let node = self.find_best_node(width, height)?;

        let mut i = 0;
        while i < self.free.len() {
            let free = self.free[i];
            if self.split_free_node(free, &node) {
                self.free.remove(i);
            } else {
                i += 1;
            }
        }
        self.prune_free_list();

        Some(node)
    }

    /// Best-short-side-fit: pick the free rectangle whose smaller leftover
    /// dimension is smallest, breaking ties by the larger leftover.
    fn find_best_node(&self, width: i32, height: i32) -> Option<Rect> {
        let mut best: Option<Rect> = None;
        let mut best_short = i32::MAX;
        let mut best_long = i32::MAX;

        for free in &self.free {
            if free.width >= width && free.height >= height {
                let leftover_h = (free.width - width).abs();
                let leftover_v = (free.height - height).abs();
                let short = leftover_h.min(leftover_v);
                let long = leftover_h.max(leftover_v);

                if short < best_short || (short == best_short && long < best_long) {
                    best = Some(Rect {
                        x: free.x,
                        y: free.y,
                        width,
                        height,
                    });
                    best_short = short;
                    best_long = long;
                }
            }
        }

        best
    }

    /// Carves `used` out of `free`, pushing the residual slivers onto the
    /// free list. Returns false when the two do not overlap.
    fn split_free_node(&mut self, free: Rect, used: &Rect) -> bool {
        if used.x >= free.x + free.width
            || used.x + used.width <= free.x
            || used.y >= free.y + free.height
            || used.y + used.height <= free.y
        {
            return false;
        }

        if used.x < free.x + free.width && used.x + used.width > free.x {
            if used.y > free.y && used.y < free.y + free.height {
                self.free.push(Rect {
                    height: used.y - free.y,
                    ..free
                });
            }
            if used.y + used.height < free.y + free.height {
                self.free.push(Rect {
                    y: used.y + used.height,
                    height: free.y + free.height - (used.y + used.height),
                    ..free
                });
            }
        }

        if used.y < free.y + free.height && used.y + used.height > free.y {
            if used.x > free.x && used.x < free.x + free.width {
                self.free.push(Rect {
                    width: used.x - free.x,
                    ..free
                });
            }
            if used.x + used.width < free.x + free.width {
                self.free.push(Rect {
                    x: used.x + used.width,
                    width: free.x + free.width - (used.x + used.width),
                    ..free
                });
            }
        }

        true
    }

    fn prune_free_list(&mut self) {
        let mut i = 0;
        while i < self.free.len() {
            let mut removed = false;
            let mut j = i + 1;
            while j < self.free.len() {
                if self.free[j].contains(&self.free[i]) {
                    self.free.remove(i);
                    removed = true;
                    break;
                }
                if self.free[i].contains(&self.free[j]) {
                    self.free.remove(j);
                } else {
                    j += 1;
                }
            }
            if !removed {
                i += 1;
            }
        }
    }
}

/// Where one sprite landed in the packed sheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub name: SpriteName,
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

/// A finished atlas: the composited sheet plus one placement per sprite.
pub struct PackedAtlas {
    pub sheet: RgbaImage,
    pub placements: Vec<Placement>,
}

/// Packs sprites into the smallest sheet the growth schedule reaches.
///
/// Growth doubles whichever side is currently smaller, starting from
/// 256x256 (ties double the width). Fails on zero-sized sprites and when
/// the sheet would outgrow 65536 on a side.
pub fn pack(sprites: &[Sprite]) -> Result<PackedAtlas, KanimError> {
    for sprite in sprites {
        if sprite.image.width() == 0 || sprite.image.height() == 0 {
            return Err(KanimError::Packing(format!(
                "sprite \"{}\" has a zero dimension and cannot be packed",
                sprite.name
            )));
        }
    }

    let mut sheet_width = INITIAL_SIDE;
    let mut sheet_height = INITIAL_SIDE;
    let placed = loop {
        if let Some(placed) = try_pack(sprites, sheet_width, sheet_height) {
            break placed;
        }
        if sheet_width > sheet_height {
            sheet_height *= 2;
        } else {
            sheet_width *= 2;
        }
        if sheet_width > MAX_SIDE || sheet_height > MAX_SIDE {
            return Err(KanimError::Packing(format!(
                "sprites do not fit in a {MAX_SIDE}x{MAX_SIDE} sheet"
            )));
        }
    };

    let mut sheet = RgbaImage::new(sheet_width as u32, sheet_height as u32);
    let mut placements = Vec::with_capacity(placed.len());
    for (index, rect) in placed {
        let sprite = &sprites[index];
        blit(&mut sheet, &sprite.image, rect.x as u32, rect.y as u32);
        placements.push(Placement {
            name: sprite.name.clone(),
            x: rect.x,
            y: rect.y,
            width: rect.width,
            height: rect.height,
        });
    }

    Ok(PackedAtlas { sheet, placements })
}

/// One packing attempt at a fixed sheet size. Sprites are inserted largest
/// area first; any failed insert fails the attempt.
fn try_pack(sprites: &[Sprite], width: i32, height: i32) -> Option<Vec<(usize, Rect)>> {
    let mut order: Vec<usize> = (0..sprites.len()).collect();
    order.sort_by_key(|&i| {
        let image = &sprites[i].image;
        std::cmp::Reverse(image.width() as i64 * image.height() as i64)
    });

    let mut packer = MaxRects::new(width, height);
    let mut placed = Vec::with_capacity(sprites.len());
    for index in order {
        let image = &sprites[index].image;
        let rect = packer.insert(image.width() as i32, image.height() as i32)?;
        placed.push((index, rect));
    }
    Some(placed)
}

fn blit(sheet: &mut RgbaImage, sprite: &RgbaImage, dest_x: u32, dest_y: u32) {
    for y in 0..sprite.height() {
        for x in 0..sprite.width() {
            sheet.put_pixel(dest_x + x, dest_y + y, *sprite.get_pixel(x, y));
        }
    }
}
