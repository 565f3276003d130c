//! Seams to the platform: the map widget and device location.

use async_trait::async_trait;
use thiserror::Error;

use eventmap_common::GeoPoint;

/// The rendered map. Zoom uses the widget's discrete levels, where a lower
/// level is closer to the ground.
pub trait MapWidget: Send {
    fn center(&self) -> GeoPoint;
    fn zoom(&self) -> i32;
    fn pan_to(&mut self, center: GeoPoint);
    fn set_zoom(&mut self, level: i32);
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LocationError {
    #[error("location permission denied")]
    PermissionDenied,

    #[error("location unavailable: {0}")]
    Unavailable(String),

    #[error("location request timed out")]
    Timeout,
}

#[async_trait]
pub trait LocationProvider: Send + Sync {
    async fn current_location(&self) -> Result<GeoPoint, LocationError>;
}

/// Provider that always answers with the same outcome. Used for servers
/// without a device and in tests.
#[derive(Debug, Clone)]
pub struct StaticLocation(pub Result<GeoPoint, LocationError>);

impl StaticLocation {
    pub fn at(point: GeoPoint) -> Self {
        Self(Ok(point))
    }

    pub fn unavailable() -> Self {
        Self(Err(LocationError::Unavailable("no location source".to_string())))
    }
}

#[async_trait]
impl LocationProvider for StaticLocation {
    async fn current_location(&self) -> Result<GeoPoint, LocationError> {
        self.0.clone()
    }
}
