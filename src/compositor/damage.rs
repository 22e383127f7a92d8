use std::mem;

use crate::utils::{Logical, Rectangle};

/// State of the damage shaping.
///
/// Shaping replaces every group of overlapping or edge-sharing rectangles by its
/// bounding box, until no two output rectangles overlap or share an edge.
#[derive(Debug, Default)]
pub struct DamageShaper {
    /// The damage accumulated during shaping.
    out_damage: Vec<Rectangle<i32, Logical>>,
}

impl DamageShaper {
    /// Shape damage rectangles.
    #[profiling::function]
    pub fn shape_damage(&mut self, in_damage: &mut Vec<Rectangle<i32, Logical>>) {
        self.out_damage.clear();

        for mut rect in in_damage.drain(..).filter(|rect| !rect.is_empty()) {
            // Absorbing a rectangle grows `rect`, which may connect it to
            // rectangles that were disjoint before, so rescan until stable.
            while let Some(idx) = self.out_damage.iter().position(|other| connected(*other, rect)) {
                rect = rect.merge(self.out_damage.swap_remove(idx));
            }
            self.out_damage.push(rect);
        }

        // The shaped damage is inside of `out_damage`, so swap it with `in_damage` since
        // it's irrelevant.
        mem::swap(&mut self.out_damage, in_damage);
    }
}

// Overlapping, or sharing a segment of an edge. Corners touching do not count.
fn connected(a: Rectangle<i32, Logical>, b: Rectangle<i32, Logical>) -> bool {
    let (a_max, b_max) = (a.max(), b.max());
    let x_overlap = a.loc.x < b_max.x && b.loc.x < a_max.x;
    let y_overlap = a.loc.y < b_max.y && b.loc.y < a_max.y;
    let x_touch = a.loc.x <= b_max.x && b.loc.x <= a_max.x;
    let y_touch = a.loc.y <= b_max.y && b.loc.y <= a_max.y;
    (x_overlap && y_touch) || (x_touch && y_overlap)
}
