//! Tile positions and placement zones.
//!
//! A [`Position`] is the identity of a trap: two traps can never share a
//! tile, so no separate entity identifier exists anywhere in the system.

use serde::{Deserialize, Serialize};

/// A tile in the remote environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Position {
    /// East-west tile coordinate.
    pub x: i32,
    /// North-south tile coordinate.
    pub y: i32,
    /// Vertical plane (floor level).
    pub plane: i32,
}

impl Position {
    /// Create a new position.
    pub const fn new(x: i32, y: i32, plane: i32) -> Self {
        Self { x, y, plane }
    }

    /// Chebyshev (king-move) distance to `other`.
    ///
    /// Tiles on different planes are unreachable and report `u32::MAX`.
    pub const fn chebyshev_distance(self, other: Self) -> u32 {
        if self.plane != other.plane {
            return u32::MAX;
        }
        let dx = self.x.abs_diff(other.x);
        let dy = self.y.abs_diff(other.y);
        if dx > dy { dx } else { dy }
    }

    /// Return the position shifted by `(dx, dy)` on the same plane.
    pub const fn offset(self, dx: i32, dy: i32) -> Self {
        Self {
            x: self.x.saturating_add(dx),
            y: self.y.saturating_add(dy),
            plane: self.plane,
        }
    }
}

impl core::fmt::Display for Position {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.plane)
    }
}

/// An inclusive rectangular area of tiles in which traps may be laid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Zone {
    /// Plane the zone lies on.
    pub plane: i32,
    /// Western edge (inclusive).
    pub min_x: i32,
    /// Southern edge (inclusive).
    pub min_y: i32,
    /// Eastern edge (inclusive).
    pub max_x: i32,
    /// Northern edge (inclusive).
    pub max_y: i32,
}

impl Zone {
    /// Create a zone from two opposite corners on the same plane.
    ///
    /// The corners may be given in any order.
    pub fn from_corners(a: Position, b: Position) -> Self {
        Self {
            plane: a.plane,
            min_x: a.x.min(b.x),
            min_y: a.y.min(b.y),
            max_x: a.x.max(b.x),
            max_y: a.y.max(b.y),
        }
    }

    /// Whether the zone contains `position`.
    pub const fn contains(&self, position: Position) -> bool {
        position.plane == self.plane
            && position.x >= self.min_x
            && position.x <= self.max_x
            && position.y >= self.min_y
            && position.y <= self.max_y
    }

    /// Whether the zone has at least one tile.
    pub const fn is_empty(&self) -> bool {
        self.min_x > self.max_x || self.min_y > self.max_y
    }

    /// Iterate every tile in the zone, row by row from the south-west.
    pub fn tiles(&self) -> impl Iterator<Item = Position> + '_ {
        (self.min_y..=self.max_y)
            .flat_map(move |y| (self.min_x..=self.max_x).map(move |x| Position::new(x, y, self.plane)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chebyshev_uses_larger_axis() {
        let a = Position::new(10, 10, 0);
        assert_eq!(a.chebyshev_distance(Position::new(13, 11, 0)), 3);
        assert_eq!(a.chebyshev_distance(a), 0);
    }

    #[test]
    fn different_planes_are_unreachable() {
        let a = Position::new(10, 10, 0);
        assert_eq!(a.chebyshev_distance(Position::new(10, 10, 1)), u32::MAX);
    }

    #[test]
    fn zone_corners_normalise() {
        let zone = Zone::from_corners(Position::new(12, 8, 0), Position::new(10, 10, 0));
        assert_eq!((zone.min_x, zone.min_y, zone.max_x, zone.max_y), (10, 8, 12, 10));
        assert!(zone.contains(Position::new(11, 9, 0)));
        assert!(!zone.contains(Position::new(11, 9, 1)));
        assert!(!zone.contains(Position::new(13, 9, 0)));
    }

    #[test]
    fn zone_tiles_cover_area() {
        let zone = Zone::from_corners(Position::new(0, 0, 0), Position::new(2, 1, 0));
        let tiles: Vec<Position> = zone.tiles().collect();
        assert_eq!(tiles.len(), 6);
        assert_eq!(tiles.first(), Some(&Position::new(0, 0, 0)));
        assert_eq!(tiles.last(), Some(&Position::new(2, 1, 0)));
    }
}
