use crate::config::{HAlign, VAlign};
use crate::math::{Rect, Vector2D};

/// Uniform scale that makes `src` cover a `target`×`target` square.
pub fn cover_scale(target: f64, src: Vector2D) -> f64 {
    let iw = src.x.max(1.0);
    let ih = src.y.max(1.0);
    (target / iw).max(target / ih)
}

/// Axis-aligned extent of `size` once rotated by `angle` radians.
pub fn rotate_vector(size: Vector2D, angle: f64) -> Vector2D {
    let cos = angle.cos().abs();
    let sin = angle.sin().abs();
    Vector2D::new(size.x * cos + size.y * sin, size.x * sin + size.y * cos)
}

/// Bottom-left anchored position of a box of `size` inside `viewport`.
///
/// `offset` is added after alignment. For rotated boxes the edge alignments
/// are corrected so the rotated extent, not the unrotated box, touches the
/// viewport edge.
pub fn pos_from_hv_align(
    viewport: Vector2D,
    size: Vector2D,
    offset: Vector2D,
    halign: HAlign,
    valign: VAlign,
    angle: f64,
) -> Vector2D {
    let rot = if angle != 0.0 {
        (size - rotate_vector(size, angle)) / 2.0
    } else {
        Vector2D::default()
    };

    let mut pos = offset;
    match halign {
        HAlign::Center => pos.x += viewport.x / 2.0 - size.x / 2.0,
        HAlign::Left => pos.x -= rot.x,
        HAlign::Right => pos.x += viewport.x - size.x + rot.x,
        HAlign::None => {}
    }
    match valign {
        VAlign::Center => pos.y += viewport.y / 2.0 - size.y / 2.0,
        VAlign::Top => pos.y += viewport.y - size.y + rot.y,
        VAlign::Bottom => pos.y -= rot.y,
        VAlign::None => {}
    }
    pos
}

/// Corner radius for a box; -1 means "as round as possible".
pub fn rounding_for_box(rect: &Rect, rounding: i32) -> i32 {
    let min_half = (rect.w.min(rect.h) / 2.0) as i32;
    if rounding == -1 {
        min_half
    } else {
        rounding.clamp(0, min_half.max(0))
    }
}

/// Outer radius of a border drawn `thickness` pixels outside a box rounded by `rounding`.
pub fn rounding_for_border_box(rect: &Rect, rounding: i32, thickness: i32) -> i32 {
    let min_half = (rect.w.min(rect.h) / 2.0) as i32;
    match rounding {
        -1 => min_half,
        0 => 0,
        r => (r + thickness).clamp(0, min_half.max(0)),
    }
}
