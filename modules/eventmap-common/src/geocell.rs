//! Geohash cells: the spatial key used to bound viewport queries.
//!
//! A cell of length L covers a fixed lat/lng rectangle and refines its L-1
//! prefix, so "inside this area" becomes a string prefix test. Viewport
//! queries use a 3x3 block of precision-5 cells (about 4.9 km per side)
//! around the map center.

use geohash::Coord;

use crate::error::GeoCellError;
use crate::types::GeoPoint;

/// Precision of the cells a viewport query is built from.
pub const QUERY_PRECISION: usize = 5;

/// Precision the repository stores on each event.
pub const STORED_PRECISION: usize = 9;

pub const MAX_PRECISION: usize = 12;

const ALPHABET: &[u8] = b"0123456789bcdefghjkmnpqrstuvwxyz";

/// Axis-aligned bounds of a cell, in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellBounds {
    pub min_lat: f64,
    pub min_lng: f64,
    pub max_lat: f64,
    pub max_lng: f64,
}

impl CellBounds {
    pub fn center(&self) -> GeoPoint {
        GeoPoint {
            lat: (self.min_lat + self.max_lat) / 2.0,
            lng: (self.min_lng + self.max_lng) / 2.0,
        }
    }

    pub fn height(&self) -> f64 {
        self.max_lat - self.min_lat
    }

    pub fn width(&self) -> f64 {
        self.max_lng - self.min_lng
    }

    /// Inclusive on every edge.
    pub fn contains(&self, point: GeoPoint) -> bool {
        point.lat >= self.min_lat
            && point.lat <= self.max_lat
            && point.lng >= self.min_lng
            && point.lng <= self.max_lng
    }
}

/// Compass direction of an adjacent cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    N,
    NE,
    E,
    SE,
    S,
    SW,
    W,
    NW,
}

impl Direction {
    /// Clockwise from north. `neighbors` emits cells in this order.
    pub const ALL: [Direction; 8] = [
        Direction::N,
        Direction::NE,
        Direction::E,
        Direction::SE,
        Direction::S,
        Direction::SW,
        Direction::W,
        Direction::NW,
    ];

    /// (rows north, columns east)
    fn offsets(self) -> (f64, f64) {
        match self {
            Direction::N => (1.0, 0.0),
            Direction::NE => (1.0, 1.0),
            Direction::E => (0.0, 1.0),
            Direction::SE => (-1.0, 1.0),
            Direction::S => (-1.0, 0.0),
            Direction::SW => (-1.0, -1.0),
            Direction::W => (0.0, -1.0),
            Direction::NW => (1.0, -1.0),
        }
    }
}

/// Shape check only: non-empty, at most [`MAX_PRECISION`] characters, all from
/// the lower-case base-32 geohash alphabet.
pub fn is_valid_cell(cell: &str) -> bool {
    !cell.is_empty()
        && cell.len() <= MAX_PRECISION
        && cell.bytes().all(|b| ALPHABET.contains(&b))
}

/// Encode a coordinate into the cell of the given precision that contains it.
pub fn encode(lat: f64, lng: f64, precision: usize) -> Result<String, GeoCellError> {
    if precision == 0 || precision > MAX_PRECISION {
        return Err(GeoCellError::InvalidPrecision(precision));
    }
    // RangeInclusive::contains is false for NaN.
    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lng) {
        return Err(GeoCellError::InvalidCoordinate { lat, lng });
    }
    geohash::encode(Coord { x: lng, y: lat }, precision)
        .map_err(|_| GeoCellError::InvalidCoordinate { lat, lng })
}

pub fn bounds(cell: &str) -> Result<CellBounds, GeoCellError> {
    if !is_valid_cell(cell) {
        return Err(GeoCellError::InvalidCell(cell.to_string()));
    }
    let rect = geohash::decode_bbox(cell).map_err(|_| GeoCellError::InvalidCell(cell.to_string()))?;
    Ok(CellBounds {
        min_lat: rect.min().y,
        min_lng: rect.min().x,
        max_lat: rect.max().y,
        max_lng: rect.max().x,
    })
}

/// Center point of the cell's bounding box.
pub fn decode(cell: &str) -> Result<GeoPoint, GeoCellError> {
    Ok(bounds(cell)?.center())
}

/// The adjacent cell at the same precision.
///
/// Longitude wraps at the antimeridian. Latitude wraps pole to pole, so the
/// grid is a torus and every cell has eight distinct neighbors.
pub fn neighbor(cell: &str, direction: Direction) -> Result<String, GeoCellError> {
    let b = bounds(cell)?;
    let center = b.center();
    let (rows, cols) = direction.offsets();
    let lat = wrap_lat(center.lat + rows * b.height());
    let lng = wrap_lng(center.lng + cols * b.width());
    encode(lat, lng, cell.len())
}

/// The cell itself followed by its eight neighbors, clockwise from north.
/// The order is fixed so lists built from equal cells compare equal.
pub fn neighbors(cell: &str) -> Result<Vec<String>, GeoCellError> {
    let mut cells = Vec::with_capacity(9);
    cells.push(cell.to_string());
    for direction in Direction::ALL {
        cells.push(neighbor(cell, direction)?);
    }
    Ok(cells)
}

/// Neighborhood of the query-precision cell containing `point`.
pub fn neighborhood_of(point: GeoPoint) -> Result<Vec<String>, GeoCellError> {
    let center = encode(point.lat, point.lng, QUERY_PRECISION)?;
    neighbors(&center)
}

fn wrap_lng(lng: f64) -> f64 {
    (lng + 180.0).rem_euclid(360.0) - 180.0
}

fn wrap_lat(lat: f64) -> f64 {
    if lat > 90.0 {
        lat - 180.0
    } else if lat < -90.0 {
        lat + 180.0
    } else {
        lat
    }
}
