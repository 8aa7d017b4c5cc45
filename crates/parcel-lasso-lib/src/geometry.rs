//! Drawn regions and the point-in-region predicate
//!
//! A [`DrawnShape`] is the raw geometry handed over by the drawing widget. It becomes a
//! [`Region`] only after validation, so degenerate shapes (zero radius, fewer than three distinct
//! vertices, zero area) never reach the shape registry or the filters.
//!
//! Containment rules:
//! - Circle: haversine distance from the center is at most the radius (meters).
//! - Polygon: `geo`'s `Intersects` in (lng, lat), so a point on an edge or vertex is inside.

use crate::{DataError, LatLng, Result, utils};
use geo::{Area, BoundingRect, Coord, Intersects, LineString, Point, Polygon, Rect};
use smallvec::SmallVec;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Geometry of a drawn shape, as received from the drawing widget
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "kind", rename_all = "snake_case"))]
pub enum DrawnShape {
    Circle { center: LatLng, radius_m: f64 },
    Rectangle { south_west: LatLng, north_east: LatLng },
    Polygon { vertices: Vec<LatLng> },
}

impl DrawnShape {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Circle { .. } => "circle",
            Self::Rectangle { .. } => "rectangle",
            Self::Polygon { .. } => "polygon",
        }
    }
}

#[derive(Clone, Debug)]
enum RegionGeometry {
    Circle { center: Coord<f64>, radius_m: f64 },
    Polygon(Polygon<f64>),
}

/// Exact identity of a region's geometry, used as a cache key
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) struct RegionKey(SmallVec<[u64; 10]>);

/// A validated, immutable drawn region
#[derive(Clone, Debug)]
pub struct Region {
    shape: DrawnShape,
    geometry: RegionGeometry,
    /// Conservative bounding box for early rejection, `None` when it would wrap the antimeridian
    prefilter: Option<Rect<f64>>,
    key: RegionKey,
}

impl PartialEq for Region {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl Region {
    /// Validate a drawn shape
    pub fn new(shape: DrawnShape) -> Result<Self> {
        let (geometry, prefilter) = match &shape {
            DrawnShape::Circle { center, radius_m } => {
                if !center.is_finite() {
                    return Err(DataError::MalformedGeometry(
                        "circle center is not a finite coordinate".to_string(),
                    ));
                }
                if !radius_m.is_finite() || *radius_m <= 0.0 {
                    return Err(DataError::MalformedGeometry(format!(
                        "circle radius must be a positive number of meters, got {radius_m}"
                    )));
                }
                (
                    RegionGeometry::Circle {
                        center: center.to_coord(),
                        radius_m: *radius_m,
                    },
                    circle_bounding_rect(*center, *radius_m),
                )
            }
            DrawnShape::Rectangle {
                south_west,
                north_east,
            } => {
                let corners = [
                    LatLng::new(south_west.lat, south_west.lng),
                    LatLng::new(north_east.lat, south_west.lng),
                    LatLng::new(north_east.lat, north_east.lng),
                    LatLng::new(south_west.lat, north_east.lng),
                ];
                let polygon = validated_polygon(&corners)?;
                let bbox = polygon.bounding_rect();
                (RegionGeometry::Polygon(polygon), bbox)
            }
            DrawnShape::Polygon { vertices } => {
                let polygon = validated_polygon(vertices)?;
                let bbox = polygon.bounding_rect();
                (RegionGeometry::Polygon(polygon), bbox)
            }
        };

        let key = region_key(&shape);
        Ok(Self {
            shape,
            geometry,
            prefilter,
            key,
        })
    }

    pub fn circle(center: LatLng, radius_m: f64) -> Result<Self> {
        Self::new(DrawnShape::Circle { center, radius_m })
    }

    pub fn rectangle(south_west: LatLng, north_east: LatLng) -> Result<Self> {
        Self::new(DrawnShape::Rectangle {
            south_west,
            north_east,
        })
    }

    pub fn polygon(vertices: Vec<LatLng>) -> Result<Self> {
        Self::new(DrawnShape::Polygon { vertices })
    }

    /// The geometry as it was drawn
    #[inline]
    pub fn shape(&self) -> &DrawnShape {
        &self.shape
    }

    /// Bounding box used to reject far-away points cheaply
    #[inline]
    pub fn bounding_rect(&self) -> Option<Rect<f64>> {
        self.prefilter
    }

    #[inline]
    pub(crate) fn key(&self) -> &RegionKey {
        &self.key
    }

    /// Whether the (lat, lng) position lies inside this region
    #[inline]
    pub fn contains(&self, lat: f64, lng: f64) -> bool {
        contains_point(self, lat, lng)
    }
}

impl TryFrom<DrawnShape> for Region {
    type Error = DataError;

    fn try_from(shape: DrawnShape) -> Result<Self> {
        Self::new(shape)
    }
}

/// Decide whether a (lat, lng) position lies inside a region
///
/// Pure; non-finite positions are never inside.
pub fn contains_point(region: &Region, lat: f64, lng: f64) -> bool {
    if !utils::is_finite_position(lat, lng) {
        return false;
    }
    let position = utils::coord(lat, lng);
    if let Some(bbox) = &region.prefilter {
        if !utils::rect_contains_inclusive(bbox, position) {
            return false;
        }
    }
    match &region.geometry {
        RegionGeometry::Circle { center, radius_m } => {
            utils::haversine_distance(center.y, center.x, lat, lng) <= *radius_m
        }
        RegionGeometry::Polygon(polygon) => polygon.intersects(&Point::from(position)),
    }
}

/// Point-in-ring test in (x = lng, y = lat), boundary inclusive
///
/// The ring may be open or closed. Rings with fewer than three distinct vertices contain nothing.
pub fn ring_contains(ring: &[Coord<f64>], point: Coord<f64>) -> bool {
    if distinct_vertex_count(ring) < 3 {
        return false;
    }
    Polygon::new(LineString::from(ring.to_vec()), vec![]).intersects(&Point::from(point))
}

fn distinct_vertex_count(ring: &[Coord<f64>]) -> usize {
    let mut distinct: SmallVec<[Coord<f64>; 4]> = SmallVec::new();
    for c in ring {
        if !distinct.contains(c) {
            distinct.push(*c);
            if distinct.len() >= 3 {
                break;
            }
        }
    }
    distinct.len()
}

fn validated_polygon(vertices: &[LatLng]) -> Result<Polygon<f64>> {
    if let Some(bad) = vertices.iter().find(|v| !v.is_finite()) {
        return Err(DataError::MalformedGeometry(format!(
            "polygon vertex ({}, {}) is not a finite coordinate",
            bad.lat, bad.lng
        )));
    }
    let coords: Vec<Coord<f64>> = vertices.iter().map(|v| v.to_coord()).collect();
    let open = match coords.as_slice() {
        [first, .., last] if first == last => &coords[..coords.len() - 1],
        _ => coords.as_slice(),
    };
    if distinct_vertex_count(open) < 3 {
        return Err(DataError::MalformedGeometry(format!(
            "polygon needs at least 3 distinct vertices, got {}",
            vertices.len()
        )));
    }
    let polygon = Polygon::new(LineString::from(open.to_vec()), vec![]);
    if polygon.unsigned_area() == 0.0 {
        return Err(DataError::MalformedGeometry(
            "polygon has zero area".to_string(),
        ));
    }
    Ok(polygon)
}

/// Conservative bounding box of a spherical cap
fn circle_bounding_rect(center: LatLng, radius_m: f64) -> Option<Rect<f64>> {
    // Small slack so rounding in the box never rejects a point the exact test accepts
    const SLACK_DEG: f64 = 1e-9;

    let angular = radius_m / utils::EARTH_RADIUS_M;
    let lat_delta = angular.to_degrees() + SLACK_DEG;
    let min_lat = center.lat - lat_delta;
    let max_lat = center.lat + lat_delta;
    if min_lat <= -utils::MAX_LATITUDE || max_lat >= utils::MAX_LATITUDE {
        // Cap touches a pole: every longitude is reachable
        return None;
    }

    let sin_ratio = angular.sin() / center.lat.to_radians().cos();
    if sin_ratio >= 1.0 {
        return None;
    }
    let lng_delta = sin_ratio.asin().to_degrees() + SLACK_DEG;
    let min_lng = center.lng - lng_delta;
    let max_lng = center.lng + lng_delta;
    if min_lng < -utils::MAX_LONGITUDE || max_lng > utils::MAX_LONGITUDE {
        return None;
    }

    Some(Rect::new(
        Coord { x: min_lng, y: min_lat },
        Coord { x: max_lng, y: max_lat },
    ))
}

fn region_key(shape: &DrawnShape) -> RegionKey {
    let mut bits: SmallVec<[u64; 10]> = SmallVec::new();
    match shape {
        DrawnShape::Circle { center, radius_m } => {
            bits.extend([0, center.lat.to_bits(), center.lng.to_bits(), radius_m.to_bits()]);
        }
        DrawnShape::Rectangle {
            south_west,
            north_east,
        } => {
            bits.extend([
                1,
                south_west.lat.to_bits(),
                south_west.lng.to_bits(),
                north_east.lat.to_bits(),
                north_east.lng.to_bits(),
            ]);
        }
        DrawnShape::Polygon { vertices } => {
            bits.push(2);
            for v in vertices {
                bits.push(v.lat.to_bits());
                bits.push(v.lng.to_bits());
            }
        }
    }
    RegionKey(bits)
}
