//! Utility functions for distances, coordinate validation and bounding boxes
//!
//! Coordinates are WGS84 degrees. Wherever a `geo` type is used, `x` is the longitude and
//! `y` is the latitude.

use geo::{Coord, Rect};

/// Mean Earth radius in meters, the same sphere the map widget measures circles on
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Valid latitude range in degrees
pub const MAX_LATITUDE: f64 = 90.0;

/// Valid longitude range in degrees
pub const MAX_LONGITUDE: f64 = 180.0;

/// Approximate meters per degree of latitude on the sphere above
pub const METERS_PER_DEGREE: f64 = EARTH_RADIUS_M * std::f64::consts::PI / 180.0;

/// Calculate the Haversine distance between two (lat, lng) positions in meters
#[inline]
pub fn haversine_distance(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let delta_lat = (lat2 - lat1).to_radians();
    let delta_lng = (lng2 - lng1).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lng / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_M * c
}

/// Check that both components of a (lat, lng) pair are finite numbers
#[inline(always)]
pub fn is_finite_position(lat: f64, lng: f64) -> bool {
    lat.is_finite() && lng.is_finite()
}

/// Build a `Coord` from a (lat, lng) pair
#[inline(always)]
pub fn coord(lat: f64, lng: f64) -> Coord<f64> {
    Coord { x: lng, y: lat }
}

/// Inclusive rectangle test, used by both the index and the linear scan
#[inline(always)]
pub fn rect_contains_inclusive(rect: &Rect<f64>, position: Coord<f64>) -> bool {
    let min = rect.min();
    let max = rect.max();
    position.x >= min.x && position.x <= max.x && position.y >= min.y && position.y <= max.y
}

/// Check whether two rectangles overlap, boundaries included
#[inline(always)]
pub fn rects_intersect(a: &Rect<f64>, b: &Rect<f64>) -> bool {
    let amin = a.min();
    let amax = a.max();
    let bmin = b.min();
    let bmax = b.max();
    !(amax.x < bmin.x || amin.x > bmax.x || amax.y < bmin.y || amin.y > bmax.y)
}

/// Smallest rectangle containing every position, or `None` for an empty input
pub fn bounding_rect<I>(positions: I) -> Option<Rect<f64>>
where
    I: IntoIterator<Item = Coord<f64>>,
{
    let mut iter = positions.into_iter();
    let first = iter.next()?;
    let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x, first.y, first.x, first.y);
    for p in iter {
        min_x = min_x.min(p.x);
        min_y = min_y.min(p.y);
        max_x = max_x.max(p.x);
        max_y = max_y.max(p.y);
    }
    Some(Rect::new(
        Coord { x: min_x, y: min_y },
        Coord { x: max_x, y: max_y },
    ))
}
