//! Various utilities functions and types

pub mod arena;
mod clock;
mod geometry;

pub use self::clock::*;
pub use self::geometry::{Buffer, Coordinate, Logical, Point, Rectangle, Size, Transform};
