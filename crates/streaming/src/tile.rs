//! Viewport → tile decomposition at a fixed indexing zoom.

use std::fmt;

use foundation::bounds::Aabb2;

use crate::projection::Projection;

/// Zoom level at which the catalog is queried, independent of the view zoom.
pub const TILE_ZOOM: u8 = 14;

/// Deepest tiling whose column and row indices still fit in a `u32`.
pub const MAX_TILE_ZOOM: u8 = 31;

/// Tile coordinate in ZXY scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TileCoord {
    pub z: u8,
    pub x: u32,
    pub y: u32,
}

impl TileCoord {
    pub fn new(z: u8, x: u32, y: u32) -> Self {
        Self { z, x, y }
    }

    /// Whether this tile lies in the band around the projection origin that
    /// the catalog answers with junk ("null island").
    pub fn near_null_island(&self) -> bool {
        near_null_island(self.x, self.y, self.z)
    }
}

/// Renders as `x,y,z`.
impl fmt::Display for TileCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{}", self.x, self.y, self.z)
    }
}

/// True when `(x, y)` falls inside the square band of width `2^(z−6)`
/// centered on `2^(z−1)`. Never true below zoom 7 or above `MAX_TILE_ZOOM`.
pub fn near_null_island(x: u32, y: u32, z: u8) -> bool {
    if !(7..=MAX_TILE_ZOOM).contains(&z) {
        return false;
    }
    let center = 1i64 << (z - 1);
    let width = 1i64 << (z - 6);
    let min = center - width / 2;
    let max = center + width / 2 - 1;
    let (x, y) = (i64::from(x), i64::from(y));
    x >= min && x <= max && y >= min && y <= max
}

/// A catalog tile with its geographic extent (`[lon, lat]` degrees).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tile {
    pub coord: TileCoord,
    pub extent: Aabb2,
}

/// Enumerates the tiles at a fixed zoom that cover a projected viewport.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TileGrid {
    zoom: u8,
}

impl Default for TileGrid {
    fn default() -> Self {
        Self::new(TILE_ZOOM)
    }
}

impl TileGrid {
    /// Zooms deeper than `MAX_TILE_ZOOM` are clamped to it.
    pub fn new(zoom: u8) -> Self {
        Self {
            zoom: zoom.min(MAX_TILE_ZOOM),
        }
    }

    pub fn zoom(&self) -> u8 {
        self.zoom
    }

    /// All tiles covering the viewport, row-major, without duplicates.
    pub fn tiles<P: Projection + ?Sized>(&self, projection: &P) -> Vec<Tile> {
        let world = projection.scale() * 2.0 * std::f64::consts::PI;
        if !(world.is_finite() && world > 0.0) {
            return Vec::new();
        }

        let z = projection.zoom();
        // Pixel size of one indexing tile at the current view zoom.
        let ts = 256.0 * 2f64.powf(z - f64::from(self.zoom));
        let translate = projection.translate();
        let corner = [translate[0] - world / 2.0, translate[1] - world / 2.0];
        let [min, max] = projection.clip_extent();
        let n = 1u64 << self.zoom;

        let span = |lo: f64, hi: f64, c: f64| -> (u64, u64) {
            let first = ((lo - c) / ts).floor().max(0.0);
            let last = ((hi - c) / ts).ceil().max(0.0);
            (first.min(n as f64) as u64, last.min(n as f64) as u64)
        };
        let (col0, col1) = span(min[0], max[0], corner[0]);
        let (row0, row1) = span(min[1], max[1], corner[1]);

        let capacity = col1.saturating_sub(col0) * row1.saturating_sub(row0);
        let mut tiles = Vec::with_capacity(capacity as usize);
        for y in row0..row1 {
            for x in col0..col1 {
                let px = x as f64 * ts + corner[0];
                let py = y as f64 * ts + corner[1];
                let extent = Aabb2::from_corners(
                    projection.invert([px, py + ts]),
                    projection.invert([px + ts, py]),
                );
                tiles.push(Tile {
                    coord: TileCoord::new(self.zoom, x as u32, y as u32),
                    extent,
                });
            }
        }
        tiles
    }

    /// Tiles worth querying: `tiles` minus the null-island band.
    pub fn wanted_tiles<P: Projection + ?Sized>(&self, projection: &P) -> Vec<Tile> {
        let mut tiles = self.tiles(projection);
        tiles.retain(|t| !t.coord.near_null_island());
        tiles
    }
}
