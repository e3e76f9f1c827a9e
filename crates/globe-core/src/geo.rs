//! Geographic → sphere projection for marker placement.

use serde::{Deserialize, Serialize};

use crate::protocol::CountryAggregate;

/// Radius of the rendered earth sphere.
pub const GLOBE_RADIUS: f64 = 2.0;
/// Markers float slightly above the surface.
pub const MARKER_RADIUS: f64 = 2.05;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub fn length(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }
}

/// Latitude/longitude in degrees to a point on a sphere of `radius`.
///
/// y is the polar axis; (0°, 0°) lands on +x.  Inputs are not range-checked,
/// out-of-range angles still give a point on the sphere.
pub fn project(latitude_deg: f64, longitude_deg: f64, radius: f64) -> Vec3 {
    let phi = (90.0 - latitude_deg).to_radians();
    let theta = (longitude_deg + 180.0).to_radians();

    Vec3 {
        x: -(radius * phi.sin() * theta.cos()),
        y: radius * phi.cos(),
        z: radius * phi.sin() * theta.sin(),
    }
}

/// A country marker ready for the scene.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Marker {
    pub country: CountryAggregate,
    pub position: Vec3,
    pub label: String,
    pub selected: bool,
}

pub fn markers(countries: &[CountryAggregate], radius: f64, selected: Option<&str>) -> Vec<Marker> {
    countries
        .iter()
        .map(|c| Marker {
            position: project(c.latitude, c.longitude, radius),
            label: c.label(),
            selected: selected == Some(c.name.as_str()),
            country: c.clone(),
        })
        .collect()
}
