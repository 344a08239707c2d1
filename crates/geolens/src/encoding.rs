//! Vector-tile geometry command encoding.
//!
//! Produces the command/parameter integer stream used by the Mapbox Vector
//! Tile format: `MoveTo`, `LineTo`, `ClosePath` commands with zig-zag encoded
//! cursor deltas. Combined with the fixed 4096 extent this lets generated
//! tiles be handed to standard vector-tile tooling.

use crate::tiles::Geometry;

const CMD_MOVE_TO: u32 = 1;
const CMD_LINE_TO: u32 = 2;
const CMD_CLOSE_PATH: u32 = 7;

/// MVT geometry type tag for a geometry.
pub fn geom_type(geometry: &Geometry) -> u32 {
    match geometry {
        Geometry::Point(_) => 1,
        Geometry::LineString(_) => 2,
        Geometry::Polygon(_) => 3,
    }
}

pub fn command(id: u32, count: u32) -> u32 {
    (id & 0x7) | (count << 3)
}

pub fn zigzag(n: i32) -> u32 {
    ((n << 1) ^ (n >> 31)) as u32
}

pub fn unzigzag(n: u32) -> i32 {
    ((n >> 1) as i32) ^ -((n & 1) as i32)
}

struct Cursor {
    x: i32,
    y: i32,
}

impl Cursor {
    fn step(&mut self, out: &mut Vec<u32>, [x, y]: [i32; 2]) {
        out.push(zigzag(x - self.x));
        out.push(zigzag(y - self.y));
        self.x = x;
        self.y = y;
    }
}

/// Encode a geometry into its command stream.
pub fn encode_geometry(geometry: &Geometry) -> Vec<u32> {
    let mut out = Vec::new();
    let mut cursor = Cursor { x: 0, y: 0 };
    match geometry {
        Geometry::Point(p) => {
            out.push(command(CMD_MOVE_TO, 1));
            cursor.step(&mut out, *p);
        }
        Geometry::LineString(line) => encode_path(&mut out, &mut cursor, line, false),
        Geometry::Polygon(rings) => {
            for ring in rings {
                // closing vertex is implied by ClosePath
                let open = match (ring.first(), ring.last()) {
                    (Some(a), Some(b)) if ring.len() > 1 && a == b => &ring[..ring.len() - 1],
                    _ => &ring[..],
                };
                encode_path(&mut out, &mut cursor, open, true);
            }
        }
    }
    out
}

fn encode_path(out: &mut Vec<u32>, cursor: &mut Cursor, path: &[[i32; 2]], close: bool) {
    let Some((first, rest)) = path.split_first() else {
        return;
    };
    out.push(command(CMD_MOVE_TO, 1));
    cursor.step(out, *first);
    if !rest.is_empty() {
        out.push(command(CMD_LINE_TO, rest.len() as u32));
        for p in rest {
            cursor.step(out, *p);
        }
    }
    if close {
        out.push(command(CMD_CLOSE_PATH, 1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zigzag() {
        assert_eq!(zigzag(0), 0);
        assert_eq!(zigzag(-1), 1);
        assert_eq!(zigzag(1), 2);
        assert_eq!(zigzag(-2), 3);
        for n in [-4096, -7, 0, 3, 4095] {
            assert_eq!(unzigzag(zigzag(n)), n);
        }
    }

    #[test]
    fn test_point_encoding_matches_mvt_example() {
        // MVT 2.1 reference example: Point(25, 17)
        assert_eq!(encode_geometry(&Geometry::Point([25, 17])), vec![9, 50, 34]);
    }

    #[test]
    fn test_linestring_encoding_matches_mvt_example() {
        let line = Geometry::LineString(vec![[2, 2], [2, 10], [10, 10]]);
        assert_eq!(encode_geometry(&line), vec![9, 4, 4, 18, 0, 16, 16, 0]);
    }

    #[test]
    fn test_polygon_encoding_matches_mvt_example() {
        let poly = Geometry::Polygon(vec![vec![[3, 6], [8, 12], [20, 34], [3, 6]]]);
        assert_eq!(encode_geometry(&poly), vec![9, 6, 12, 18, 10, 12, 24, 44, 15]);
        assert_eq!(geom_type(&poly), 3);
    }
}
