//! Region tracking
//!
//! A [`Region`] is a set of unit tiles, stored as a list of non-overlapping
//! rectangles. Its memory footprint grows with the number of rectangles needed
//! to describe it, not with the area it covers.
//!
//! Regions carry a bound (the output or surface size they were created for).
//! Rectangles outside of the bound are accepted as-is; they are dropped by
//! [`Region::clipped`] or by intersecting with another region.

use std::collections::TryReserveError;

use crate::utils::{Logical, Point, Rectangle, Size};

/// A set of unit tiles in surface-local coordinates
#[derive(Debug, Clone, Default)]
pub struct Region {
    bound: Size<i32, Logical>,
    rects: Vec<Rectangle<i32, Logical>>,
}

impl Region {
    /// Create an empty region with the given bound
    pub fn new(bound: Size<i32, Logical>) -> Region {
        Region {
            bound,
            rects: Vec::new(),
        }
    }

    /// Create a region covering its whole bound
    pub fn full(bound: Size<i32, Logical>) -> Region {
        let mut region = Region::new(bound);
        region.union_rect(Rectangle::from_size(bound));
        region
    }

    /// The bound this region was created with
    pub fn bound(&self) -> Size<i32, Logical> {
        self.bound
    }

    /// Change the bound of this region, without touching its content
    pub fn set_bound(&mut self, bound: Size<i32, Logical>) {
        self.bound = bound;
    }

    /// Whether no tile is occupied
    pub fn is_empty(&self) -> bool {
        self.rects.is_empty()
    }

    /// Number of occupied tiles
    pub fn area(&self) -> i64 {
        self.rects
            .iter()
            .map(|rect| rect.size.w as i64 * rect.size.h as i64)
            .sum()
    }

    /// Whether the tile at the given point is occupied
    pub fn contains(&self, point: impl Into<Point<i32, Logical>>) -> bool {
        let point = point.into();
        self.rects.iter().any(|rect| rect.contains(point))
    }

    /// Non-overlapping rectangles exactly covering the occupied tiles
    pub fn rects(&self) -> &[Rectangle<i32, Logical>] {
        &self.rects
    }

    /// Remove every tile
    pub fn clear(&mut self) {
        self.rects.clear();
    }

    /// Add the tiles of a rectangle
    ///
    /// Empty or negatively sized rectangles are ignored.
    pub fn union_rect(&mut self, rect: Rectangle<i32, Logical>) {
        // on allocation failure the region is left unchanged
        let _ = self.try_union_rect(rect);
    }

    /// Add the tiles of a rectangle, reporting allocation failure
    #[profiling::function]
    pub fn try_union_rect(&mut self, rect: Rectangle<i32, Logical>) -> Result<(), TryReserveError> {
        if rect.is_empty() {
            return Ok(());
        }
        if self.rects.iter().any(|existing| existing.contains_rect(rect)) {
            return Ok(());
        }

        let pieces = Rectangle::subtract_rects_many_in_place(vec![rect], self.rects.iter().copied());
        self.rects.try_reserve(pieces.len())?;
        self.rects.extend(pieces);
        self.coalesce();
        Ok(())
    }

    /// Remove the tiles of a rectangle
    #[profiling::function]
    pub fn subtract_rect(&mut self, rect: Rectangle<i32, Logical>) {
        if rect.is_empty() || self.rects.is_empty() {
            return;
        }
        let rects = std::mem::take(&mut self.rects);
        self.rects = Rectangle::subtract_rects_many_in_place(rects, [rect]);
        self.coalesce();
    }

    /// Add every tile of another region
    pub fn union(&mut self, other: &Region) {
        for rect in &other.rects {
            self.union_rect(*rect);
        }
    }

    /// Remove every tile of another region
    pub fn subtract(&mut self, other: &Region) {
        if self.rects.is_empty() || other.rects.is_empty() {
            return;
        }
        let rects = std::mem::take(&mut self.rects);
        self.rects = Rectangle::subtract_rects_many_in_place(rects, other.rects.iter().copied());
        self.coalesce();
    }

    /// Tiles occupied in both regions
    ///
    /// The bound of the result is the overlap of both bounds.
    #[profiling::function]
    pub fn intersection(&self, other: &Region) -> Region {
        let bound = (self.bound.w.min(other.bound.w), self.bound.h.min(other.bound.h)).into();
        let mut result = Region::new(bound);
        for a in &self.rects {
            result
                .rects
                .extend(other.rects.iter().filter_map(|b| a.intersection(*b)));
        }
        result.coalesce();
        result
    }

    /// Tiles of this region inside of a rectangle
    pub fn intersect_rect(&self, rect: Rectangle<i32, Logical>) -> Region {
        let mut result = Region::new(self.bound);
        result.rects = self.rects.iter().filter_map(|r| r.intersection(rect)).collect();
        result.coalesce();
        result
    }

    /// Tiles of this region inside of its own bound
    pub fn clipped(&self) -> Region {
        self.intersect_rect(Rectangle::from_size(self.bound))
    }

    // Merge rectangles sharing a full edge, keeping the set non-overlapping
    fn coalesce(&mut self) {
        let mut merged = true;
        while merged {
            merged = false;
            'outer: for i in 0..self.rects.len() {
                for j in (i + 1)..self.rects.len() {
                    let (a, b) = (self.rects[i], self.rects[j]);
                    let (a_max, b_max) = (a.max(), b.max());
                    let horizontal = a.loc.y == b.loc.y
                        && a.size.h == b.size.h
                        && (a_max.x == b.loc.x || b_max.x == a.loc.x);
                    let vertical = a.loc.x == b.loc.x
                        && a.size.w == b.size.w
                        && (a_max.y == b.loc.y || b_max.y == a.loc.y);
                    if horizontal || vertical {
                        self.rects[i] = a.merge(b);
                        self.rects.swap_remove(j);
                        merged = true;
                        break 'outer;
                    }
                }
            }
        }
    }
}

impl PartialEq for Region {
    /// Regions are equal when they occupy the same tiles
    fn eq(&self, other: &Self) -> bool {
        if self.area() != other.area() {
            return false;
        }
        Rectangle::subtract_rects_many_in_place(self.rects.clone(), other.rects.iter().copied()).is_empty()
    }
}

impl Eq for Region {}
