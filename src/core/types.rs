use serde_json::{Map, Value as JsonValue};

use super::{ObjectError, Result};
use crate::entity::EntityKey;

const EARTH_RADIUS_KM: f64 = 6371.0;
const EARTH_RADIUS_MILES: f64 = 3958.8;

/// An immutable latitude/longitude pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPoint {
    latitude: f64,
    longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Result<Self> {
        if (-90.0..=90.0).contains(&latitude) && (-180.0..=180.0).contains(&longitude) {
            Ok(Self {
                latitude,
                longitude,
            })
        } else {
            Err(ObjectError::InvalidArgument(format!(
                "Invalid latitude or longitude for geo point: ({}, {})",
                latitude, longitude
            )))
        }
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }

    /// Great-circle distance in radians (haversine).
    pub fn radians_to(&self, other: &GeoPoint) -> f64 {
        let lat1 = self.latitude.to_radians();
        let lon1 = self.longitude.to_radians();
        let lat2 = other.latitude.to_radians();
        let lon2 = other.longitude.to_radians();

        let sin_lat = ((lat1 - lat2) / 2.0).sin();
        let sin_lon = ((lon1 - lon2) / 2.0).sin();
        let a = sin_lat * sin_lat + lat1.cos() * lat2.cos() * sin_lon * sin_lon;

        2.0 * a.min(1.0).sqrt().asin()
    }

    pub fn kilometers_to(&self, other: &GeoPoint) -> f64 {
        self.radians_to(other) * EARTH_RADIUS_KM
    }

    pub fn miles_to(&self, other: &GeoPoint) -> f64 {
        self.radians_to(other) * EARTH_RADIUS_MILES
    }
}

/// Navigation handle for a relation field.
///
/// The owner is an arena key, not an owning reference. A relation decoded
/// from the wire has no owner until it is bound to an entity field.
#[derive(Debug, Clone, PartialEq)]
pub struct Relation {
    owner: Option<EntityKey>,
    key: String,
    target_class: Option<String>,
}

impl Relation {
    pub fn new(owner: Option<EntityKey>, key: impl Into<String>, target_class: Option<String>) -> Self {
        Self {
            owner,
            key: key.into(),
            target_class,
        }
    }

    pub fn owner(&self) -> Option<EntityKey> {
        self.owner
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn target_class(&self) -> Option<&str> {
        self.target_class.as_deref()
    }

    /// Attach the relation to its owning entity field.
    pub fn bind(&mut self, owner: EntityKey, key: &str) -> Result<()> {
        if self.owner.is_some_and(|current| current != owner) {
            return Err(ObjectError::InvalidArgument(
                "Relation does not belong to the object".into(),
            ));
        }
        if !self.key.is_empty() && self.key != key {
            return Err(ObjectError::InvalidArgument(
                "Relation does not belong to the field".into(),
            ));
        }
        self.owner = Some(owner);
        self.key = key.to_string();
        Ok(())
    }

    pub(crate) fn fill_target_class(&mut self, target_class: Option<&str>) {
        if self.target_class.is_none() {
            self.target_class = target_class.map(str::to_string);
        }
    }
}

/// Reference to a stored file.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FileRef {
    pub id: Option<String>,
    pub name: String,
    pub url: Option<String>,
    pub mime_type: Option<String>,
    pub metadata: Map<String, JsonValue>,
}

impl FileRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geo_point_range() {
        assert!(GeoPoint::new(39.9, 116.4).is_ok());
        assert!(GeoPoint::new(90.0, -180.0).is_ok());
        assert!(GeoPoint::new(90.1, 0.0).is_err());
        assert!(GeoPoint::new(0.0, 180.5).is_err());
    }

    #[test]
    fn test_geo_point_distance() {
        let beijing = GeoPoint::new(39.9, 116.4).unwrap();
        let shanghai = GeoPoint::new(31.23, 121.47).unwrap();

        let km = beijing.kilometers_to(&shanghai);
        assert!((km - 1067.0).abs() < 10.0, "unexpected distance {}", km);
        assert!(beijing.miles_to(&shanghai) < km);
        assert_eq!(beijing.radians_to(&beijing), 0.0);
    }

    #[test]
    fn test_relation_bind() {
        let owner = EntityKey::from_index(0);
        let other = EntityKey::from_index(1);

        let mut rel = Relation::new(None, "likes", None);
        rel.bind(owner, "likes").unwrap();
        assert_eq!(rel.owner(), Some(owner));

        assert!(rel.bind(other, "likes").is_err());
        assert!(rel.bind(owner, "authors").is_err());
    }
}
