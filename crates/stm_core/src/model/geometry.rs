//! Structural validation of task geometry.
//!
//! # Responsibility
//! - Accept exactly one GeoJSON `Feature` carrying a `Polygon` geometry.
//!
//! # Invariants
//! - Only structure is checked. Winding order, self-intersection and
//!   coordinate reference systems are not inspected.
//! - Once accepted, geometry is stored verbatim and treated as opaque.

use serde_json::Value;
use std::error::Error;
use std::fmt::{Display, Formatter};

const MIN_RING_POSITIONS: usize = 4;

/// Reasons a geometry string is not a single polygon feature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeometryError {
    /// Input is not valid JSON.
    InvalidJson(String),
    /// Top-level `type` is missing or not `Feature`.
    NotAFeature,
    /// `geometry` is missing or null.
    MissingGeometry,
    /// Geometry type is something other than `Polygon`.
    NotAPolygon(String),
    /// `coordinates` is missing or not an array of rings.
    InvalidCoordinates,
    /// Ring at index has too few positions.
    RingTooShort { ring: usize, positions: usize },
    /// Position inside a ring is not a pair of finite numbers.
    InvalidPosition { ring: usize, position: usize },
    /// Ring at index does not end where it starts.
    RingNotClosed { ring: usize },
}

impl Display for GeometryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidJson(message) => write!(f, "invalid GeoJSON: {message}"),
            Self::NotAFeature => write!(f, "geometry must be a GeoJSON Feature"),
            Self::MissingGeometry => write!(f, "feature has no geometry"),
            Self::NotAPolygon(kind) => write!(f, "feature geometry must be Polygon, got `{kind}`"),
            Self::InvalidCoordinates => write!(f, "polygon coordinates must be a list of rings"),
            Self::RingTooShort { ring, positions } => write!(
                f,
                "ring {ring} has {positions} positions, at least {MIN_RING_POSITIONS} required"
            ),
            Self::InvalidPosition { ring, position } => {
                write!(f, "ring {ring} position {position} is not a coordinate pair")
            }
            Self::RingNotClosed { ring } => write!(f, "ring {ring} is not closed"),
        }
    }
}

impl Error for GeometryError {}

/// Validates that `raw` parses as one GeoJSON feature with polygon geometry.
pub fn validate_polygon_feature(raw: &str) -> Result<(), GeometryError> {
    let value: Value =
        serde_json::from_str(raw).map_err(|err| GeometryError::InvalidJson(err.to_string()))?;

    if value.get("type").and_then(Value::as_str) != Some("Feature") {
        return Err(GeometryError::NotAFeature);
    }

    let geometry = match value.get("geometry") {
        Some(Value::Null) | None => return Err(GeometryError::MissingGeometry),
        Some(geometry) => geometry,
    };

    match geometry.get("type").and_then(Value::as_str) {
        Some("Polygon") => {}
        Some(other) => return Err(GeometryError::NotAPolygon(other.to_string())),
        None => return Err(GeometryError::NotAPolygon(String::new())),
    }

    let rings = geometry
        .get("coordinates")
        .and_then(Value::as_array)
        .filter(|rings| !rings.is_empty())
        .ok_or(GeometryError::InvalidCoordinates)?;

    for (ring_index, ring) in rings.iter().enumerate() {
        let positions = ring.as_array().ok_or(GeometryError::InvalidCoordinates)?;
        if positions.len() < MIN_RING_POSITIONS {
            return Err(GeometryError::RingTooShort {
                ring: ring_index,
                positions: positions.len(),
            });
        }

        let mut parsed = Vec::with_capacity(positions.len());
        for (position_index, position) in positions.iter().enumerate() {
            let coordinates = parse_position(position).ok_or(GeometryError::InvalidPosition {
                ring: ring_index,
                position: position_index,
            })?;
            parsed.push(coordinates);
        }

        if parsed.first() != parsed.last() {
            return Err(GeometryError::RingNotClosed { ring: ring_index });
        }
    }

    Ok(())
}

fn parse_position(value: &Value) -> Option<Vec<f64>> {
    let items = value.as_array()?;
    if items.len() < 2 {
        return None;
    }
    let mut coordinates = Vec::with_capacity(items.len());
    for item in items {
        let number = item.as_f64().filter(|number| number.is_finite())?;
        coordinates.push(number);
    }
    Some(coordinates)
}
