use thiserror::Error;

/// Errors raised by the geohash cell codec. These indicate a caller bug
/// (bad coordinates or a malformed cell), never a user filter choice.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GeoCellError {
    #[error("invalid coordinate: lat {lat}, lng {lng}")]
    InvalidCoordinate { lat: f64, lng: f64 },

    #[error("invalid geohash cell: {0:?}")]
    InvalidCell(String),

    #[error("invalid geohash precision: {0} (expected 1..=12)")]
    InvalidPrecision(usize),
}
