//! Compass-octant direction codes.
//!
//! The slope stage discretizes each cell's downhill direction into one of
//! eight octants, encoded 0-7 clockwise from north. River tracing steps
//! along these codes, so the encoding and its neighbor offsets live here.

/// One of the 8 compass octants, encoded 0-7 clockwise from north.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Direction {
    North = 0,
    NorthEast = 1,
    East = 2,
    SouthEast = 3,
    South = 4,
    SouthWest = 5,
    West = 6,
    NorthWest = 7,
}

/// Neighbor offsets (dx east, dy south) indexed by direction code.
pub const DIR_OFFSETS: [(i32, i32); 8] = [
    (0, -1),  // N
    (1, -1),  // NE
    (1, 0),   // E
    (1, 1),   // SE
    (0, 1),   // S
    (-1, 1),  // SW
    (-1, 0),  // W
    (-1, -1), // NW
];

impl Direction {
    pub const ALL: [Direction; 8] = [
        Direction::North,
        Direction::NorthEast,
        Direction::East,
        Direction::SouthEast,
        Direction::South,
        Direction::SouthWest,
        Direction::West,
        Direction::NorthWest,
    ];

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Direction> {
        Direction::ALL.get(code as usize).copied()
    }

    /// Step offset (dx east, dy south) for this direction.
    pub fn offset(self) -> (i32, i32) {
        DIR_OFFSETS[self as usize]
    }

    /// Classify a descent vector (east, north components) into an octant.
    ///
    /// Sectors span 45 degrees between adjacent compass rays; the rays
    /// themselves are the sector boundaries. A descent lying exactly on a
    /// boundary ray resolves to the lower-numbered adjacent code, with the
    /// NW/N boundary wrapping to 0. A zero vector (flat cell) is 0.
    ///
    /// Pure sign/magnitude comparisons keep boundary ties float-exact.
    pub fn from_descent(east: f32, north: f32) -> Direction {
        let e = east;
        let n = north;

        if e == 0.0 && n == 0.0 {
            return Direction::North;
        }
        // Cardinal boundary rays.
        if e == 0.0 {
            return if n > 0.0 {
                Direction::North
            } else {
                Direction::SouthEast
            };
        }
        if n == 0.0 {
            return if e > 0.0 {
                Direction::NorthEast
            } else {
                Direction::SouthWest
            };
        }
        // Diagonal boundary rays.
        if e.abs() == n.abs() {
            return match (e > 0.0, n > 0.0) {
                (true, true) => Direction::North,      // NE ray
                (true, false) => Direction::East,      // SE ray
                (false, false) => Direction::South,    // SW ray
                (false, true) => Direction::West,      // NW ray
            };
        }
        // Open sectors, bearing measured clockwise from north.
        match (e > 0.0, n > 0.0) {
            (true, true) => {
                if e < n {
                    Direction::North
                } else {
                    Direction::NorthEast
                }
            }
            (true, false) => {
                if e > -n {
                    Direction::East
                } else {
                    Direction::SouthEast
                }
            }
            (false, false) => {
                if -e < -n {
                    Direction::South
                } else {
                    Direction::SouthWest
                }
            }
            (false, true) => {
                if -e > n {
                    Direction::West
                } else {
                    Direction::NorthWest
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_round_trip() {
        for dir in Direction::ALL {
            assert_eq!(Direction::from_code(dir.code()), Some(dir));
        }
        assert_eq!(Direction::from_code(8), None);
    }

    #[test]
    fn test_open_sector_classification() {
        // Bearings strictly inside each 45-degree sector.
        assert_eq!(Direction::from_descent(0.2, 1.0), Direction::North);
        assert_eq!(Direction::from_descent(1.0, 0.2), Direction::NorthEast);
        assert_eq!(Direction::from_descent(1.0, -0.2), Direction::East);
        assert_eq!(Direction::from_descent(0.2, -1.0), Direction::SouthEast);
        assert_eq!(Direction::from_descent(-0.2, -1.0), Direction::South);
        assert_eq!(Direction::from_descent(-1.0, -0.2), Direction::SouthWest);
        assert_eq!(Direction::from_descent(-1.0, 0.2), Direction::West);
        assert_eq!(Direction::from_descent(-0.2, 1.0), Direction::NorthWest);
    }

    #[test]
    fn test_boundary_rays_resolve_to_lower_code() {
        // Each compass ray is a sector boundary; the lower-numbered of the
        // two adjacent codes wins.
        assert_eq!(Direction::from_descent(0.0, 1.0), Direction::North); // N ray: NW(7)/N(0) -> 0
        assert_eq!(Direction::from_descent(1.0, 1.0), Direction::North); // NE ray: N(0)/NE(1)
        assert_eq!(Direction::from_descent(1.0, 0.0), Direction::NorthEast); // E ray: NE(1)/E(2)
        assert_eq!(Direction::from_descent(1.0, -1.0), Direction::East); // SE ray: E(2)/SE(3)
        assert_eq!(Direction::from_descent(0.0, -1.0), Direction::SouthEast); // S ray: SE(3)/S(4)
        assert_eq!(Direction::from_descent(-1.0, -1.0), Direction::South); // SW ray: S(4)/SW(5)
        assert_eq!(Direction::from_descent(-1.0, 0.0), Direction::SouthWest); // W ray: SW(5)/W(6)
        assert_eq!(Direction::from_descent(-1.0, 1.0), Direction::West); // NW ray: W(6)/NW(7)
    }

    #[test]
    fn test_flat_cell_is_north() {
        assert_eq!(Direction::from_descent(0.0, 0.0), Direction::North);
    }

    #[test]
    fn test_offsets_match_codes() {
        assert_eq!(Direction::North.offset(), (0, -1));
        assert_eq!(Direction::SouthWest.offset(), (-1, 1));
        for dir in Direction::ALL {
            assert_eq!(dir.offset(), DIR_OFFSETS[dir.code() as usize]);
        }
    }
}
