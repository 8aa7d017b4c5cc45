//! Typed point records
//!
//! Rows arrive from the file collaborator as loosely typed string maps. They are coerced once at
//! the ingestion boundary (see [`crate::IngestBuffer`]) into [`PointRecord`]s, which are immutable
//! and shared behind `Arc` by every snapshot, index and filter result that references them.

use crate::utils;
use geo::Coord;
use std::collections::BTreeMap;
use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Which of the two datasets a record belongs to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum DatasetKind {
    /// The parcel set, keyed by APN, carrying lot acreage
    Pricing,
    /// The comparable sales set ("main" file), all columns kept verbatim
    Comps,
}

impl fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pricing => f.write_str("pricing"),
            Self::Comps => f.write_str("comps"),
        }
    }
}

/// A (latitude, longitude) pair in degrees
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Convert to a `geo` coordinate (x = longitude, y = latitude)
    #[inline(always)]
    pub fn to_coord(self) -> Coord<f64> {
        utils::coord(self.lat, self.lng)
    }

    #[inline(always)]
    pub fn is_finite(self) -> bool {
        utils::is_finite_position(self.lat, self.lng)
    }
}

/// A single attribute value kept from the source row
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(untagged))]
pub enum AttributeValue {
    Number(f64),
    Text(String),
    Null,
}

impl AttributeValue {
    /// Keep a raw cell: empty cells become `Null`, everything else stays text
    pub fn from_cell(cell: &str) -> Self {
        if cell.trim().is_empty() {
            Self::Null
        } else {
            Self::Text(cell.to_string())
        }
    }

    /// Numeric view of the value, if it has one
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) if n.is_finite() => Some(*n),
            Self::Text(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
            _ => None,
        }
    }

    /// Text view of the value, if it has one
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
            Self::Null => Ok(()),
        }
    }
}

/// Column name to value, ordered for deterministic iteration
pub type Attributes = BTreeMap<String, AttributeValue>;

/// A typed point of either dataset
///
/// Pricing records are identified by their formatted APN. Comps rows have no natural key, so
/// their `id` is the coordinate pair; the APN column they may carry is exposed through
/// [`PointRecord::join_key`] and is what export removal matches on.
#[derive(Clone, Debug, PartialEq)]
pub struct PointRecord {
    kind: DatasetKind,
    id: String,
    position: Coord<f64>,
    lot_acreage: Option<f64>,
    attributes: Attributes,
}

impl PointRecord {
    /// Create a pricing record. Non-finite acreage is stored as unknown.
    pub fn pricing(apn: impl Into<String>, position: LatLng, lot_acreage: Option<f64>) -> Self {
        Self {
            kind: DatasetKind::Pricing,
            id: apn.into(),
            position: position.to_coord(),
            lot_acreage: lot_acreage.filter(|a| a.is_finite()),
            attributes: Attributes::new(),
        }
    }

    /// Create a comps record keeping every source column as an attribute
    pub fn comps(position: LatLng, attributes: Attributes) -> Self {
        Self {
            kind: DatasetKind::Comps,
            // Display label, not unique
            id: format!("{},{}", position.lat, position.lng),
            position: position.to_coord(),
            lot_acreage: None,
            attributes,
        }
    }

    #[inline]
    pub fn kind(&self) -> DatasetKind {
        self.kind
    }

    /// The APN for pricing records. For comps it is the "lat,lng" pair, a display label only:
    /// comps at the same position share it, so removal goes through [`Self::join_key`].
    #[inline]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Key used to match records across datasets when exported parcels are removed
    pub fn join_key(&self) -> Option<&str> {
        match self.kind {
            DatasetKind::Pricing => Some(&self.id),
            DatasetKind::Comps => self
                .attributes
                .get(crate::columns::APN)
                .and_then(AttributeValue::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty()),
        }
    }

    #[inline(always)]
    pub fn lat(&self) -> f64 {
        self.position.y
    }

    #[inline(always)]
    pub fn lng(&self) -> f64 {
        self.position.x
    }

    /// Position as a `geo` coordinate (x = longitude, y = latitude)
    #[inline(always)]
    pub fn position(&self) -> Coord<f64> {
        self.position
    }

    #[inline]
    pub fn lat_lng(&self) -> LatLng {
        LatLng::new(self.lat(), self.lng())
    }

    /// Lot acreage; `None` means unknown and never matches an acreage filter
    #[inline]
    pub fn lot_acreage(&self) -> Option<f64> {
        self.lot_acreage
    }

    #[inline]
    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn attribute(&self, column: &str) -> Option<&AttributeValue> {
        self.attributes.get(column)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pricing_record() {
        let record = PointRecord::pricing("001-002", LatLng::new(41.2, -77.1), Some(3.5));
        assert_eq!(record.kind(), DatasetKind::Pricing);
        assert_eq!(record.id(), "001-002");
        assert_eq!(record.join_key(), Some("001-002"));
        assert_eq!(record.lat(), 41.2);
        assert_eq!(record.lng(), -77.1);
        assert_eq!(record.position().x, -77.1);
        assert_eq!(record.lot_acreage(), Some(3.5));
    }

    #[test]
    fn test_pricing_record_rejects_nan_acreage() {
        let record = PointRecord::pricing("A", LatLng::new(0.0, 0.0), Some(f64::NAN));
        assert_eq!(record.lot_acreage(), None);
    }

    #[test]
    fn test_comps_record_join_key() {
        let mut attributes = Attributes::new();
        attributes.insert("PRICE".into(), AttributeValue::from_cell("125000"));
        attributes.insert(
            crate::columns::APN.into(),
            AttributeValue::from_cell(" 12-345 "),
        );
        let record = PointRecord::comps(LatLng::new(40.0, -75.0), attributes);
        assert_eq!(record.kind(), DatasetKind::Comps);
        assert_eq!(record.id(), "40,-75");
        assert_eq!(record.join_key(), Some("12-345"));
        assert_eq!(record.attribute("PRICE").and_then(AttributeValue::as_f64), Some(125000.0));
    }

    #[test]
    fn test_comps_record_without_apn() {
        let record = PointRecord::comps(LatLng::new(1.0, 2.0), Attributes::new());
        assert_eq!(record.join_key(), None);
    }

    #[test]
    fn test_attribute_value_from_cell() {
        assert!(AttributeValue::from_cell("   ").is_null());
        assert_eq!(AttributeValue::from_cell("abc").as_str(), Some("abc"));
        assert_eq!(AttributeValue::from_cell("abc").as_f64(), None);
        assert_eq!(AttributeValue::Number(2.5).to_string(), "2.5");
        assert_eq!(AttributeValue::Null.to_string(), "");
    }

    #[test]
    fn test_lat_lng_to_coord() {
        let c = LatLng::new(10.0, 20.0).to_coord();
        assert_eq!(c.x, 20.0);
        assert_eq!(c.y, 10.0);
        assert!(!LatLng::new(f64::NAN, 0.0).is_finite());
    }
}
