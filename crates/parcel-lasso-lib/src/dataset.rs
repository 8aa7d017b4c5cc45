//! Immutable, versioned dataset snapshots
//!
//! A [`Dataset`] is never mutated after construction. Ingestion publishes a new snapshot at each
//! chunk boundary and export removal builds the next snapshot before swapping it in, so readers
//! holding an `Arc<Dataset>` always see a complete set. Every snapshot gets a process-unique
//! [`DatasetVersion`], which is what indexes and result caches are keyed on.

use crate::{DataError, DatasetKind, PointRecord, Result, utils};
use geo::Rect;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_VERSION: AtomicU64 = AtomicU64::new(1);

/// Identity of a dataset snapshot
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DatasetVersion(u64);

impl DatasetVersion {
    fn next() -> Self {
        Self(NEXT_VERSION.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for DatasetVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// An immutable snapshot of one dataset
#[derive(Debug)]
pub struct Dataset {
    kind: DatasetKind,
    version: DatasetVersion,
    records: Vec<Arc<PointRecord>>,
    /// Precomputed bounding box (x = longitude, y = latitude)
    bounding_box: Option<Rect<f64>>,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl Dataset {
    /// Create a snapshot from records of the given kind
    ///
    /// Fails if any record belongs to the other dataset.
    pub fn new(kind: DatasetKind, records: Vec<Arc<PointRecord>>) -> Result<Arc<Self>> {
        if let Some(stray) = records.iter().find(|r| r.kind() != kind) {
            return Err(DataError::Validation(format!(
                "{} record '{}' cannot be added to the {} dataset",
                stray.kind(),
                stray.id(),
                kind
            )));
        }
        Ok(Self::from_checked(kind, records))
    }

    /// An empty snapshot
    pub fn empty(kind: DatasetKind) -> Arc<Self> {
        Self::from_checked(kind, Vec::new())
    }

    pub(crate) fn from_checked(kind: DatasetKind, records: Vec<Arc<PointRecord>>) -> Arc<Self> {
        let bounding_box = utils::bounding_rect(records.iter().map(|r| r.position()));
        Arc::new(Self {
            kind,
            version: DatasetVersion::next(),
            records,
            bounding_box,
        })
    }

    #[inline]
    pub fn kind(&self) -> DatasetKind {
        self.kind
    }

    #[inline]
    pub fn version(&self) -> DatasetVersion {
        self.version
    }

    #[inline]
    pub fn records(&self) -> &[Arc<PointRecord>] {
        &self.records
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Bounding box of all records, `None` when empty
    #[inline]
    pub fn bounding_box(&self) -> Option<Rect<f64>> {
        self.bounding_box
    }

    /// Build the next snapshot without the records whose join key is in `keys`
    ///
    /// Returns `None` when nothing would be removed, so callers can keep the current snapshot
    /// and its version (and everything cached against it).
    pub fn without_keys(&self, keys: &HashSet<String>) -> Option<Arc<Self>> {
        let is_removed = |r: &Arc<PointRecord>| r.join_key().is_some_and(|k| keys.contains(k));
        if !self.records.iter().any(is_removed) {
            return None;
        }
        let kept: Vec<Arc<PointRecord>> = self
            .records
            .iter()
            .filter(|r| !is_removed(*r))
            .cloned()
            .collect();
        Some(Self::from_checked(self.kind, kept))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AttributeValue, Attributes, LatLng};

    fn pricing(apn: &str, lat: f64, lng: f64) -> Arc<PointRecord> {
        Arc::new(PointRecord::pricing(apn, LatLng::new(lat, lng), None))
    }

    #[test]
    fn test_dataset_versions_are_unique() {
        let a = Dataset::empty(DatasetKind::Pricing);
        let b = Dataset::empty(DatasetKind::Pricing);
        assert_ne!(a.version(), b.version());
        assert!(a.is_empty());
        assert!(a.bounding_box().is_none());
    }

    #[test]
    fn test_dataset_rejects_mixed_kinds() {
        let comp = Arc::new(PointRecord::comps(LatLng::new(0.0, 0.0), Attributes::new()));
        let result = Dataset::new(DatasetKind::Pricing, vec![pricing("A", 0.0, 0.0), comp]);
        assert!(matches!(result, Err(DataError::Validation(_))));
    }

    #[test]
    fn test_bounding_box() {
        let ds = Dataset::new(
            DatasetKind::Pricing,
            vec![pricing("A", 40.0, -78.0), pricing("B", 41.0, -77.0)],
        )
        .unwrap();
        let bbox = ds.bounding_box().unwrap();
        assert_eq!(bbox.min().x, -78.0);
        assert_eq!(bbox.min().y, 40.0);
        assert_eq!(bbox.max().x, -77.0);
        assert_eq!(bbox.max().y, 41.0);
    }

    #[test]
    fn test_without_keys() {
        let ds = Dataset::new(
            DatasetKind::Pricing,
            vec![pricing("A", 0.0, 0.0), pricing("B", 1.0, 1.0), pricing("C", 2.0, 2.0)],
        )
        .unwrap();
        let keys: HashSet<String> = ["B".to_string()].into_iter().collect();
        let next = ds.without_keys(&keys).unwrap();
        let ids: Vec<&str> = next.records().iter().map(|r| r.id()).collect();
        assert_eq!(ids, vec!["A", "C"]);
        assert_ne!(next.version(), ds.version());
        // Original snapshot is untouched
        assert_eq!(ds.len(), 3);
    }

    #[test]
    fn test_without_keys_no_match_keeps_snapshot() {
        let ds = Dataset::new(DatasetKind::Pricing, vec![pricing("A", 0.0, 0.0)]).unwrap();
        let keys: HashSet<String> = ["Z".to_string()].into_iter().collect();
        assert!(ds.without_keys(&keys).is_none());
    }

    #[test]
    fn test_colocated_comps_are_removed_by_apn_not_label() {
        let mut with_apn = Attributes::new();
        with_apn.insert(crate::columns::APN.into(), AttributeValue::from_cell("B"));
        let here = LatLng::new(5.0, 5.0);
        let comps = Dataset::new(
            DatasetKind::Comps,
            vec![
                Arc::new(PointRecord::comps(here, with_apn)),
                Arc::new(PointRecord::comps(here, Attributes::new())),
            ],
        )
        .unwrap();
        assert_eq!(comps.records()[0].id(), comps.records()[1].id());

        let keys: HashSet<String> = [comps.records()[0].id().to_string()].into_iter().collect();
        assert!(comps.without_keys(&keys).is_none());

        let keys: HashSet<String> = ["B".to_string()].into_iter().collect();
        let next = comps.without_keys(&keys).unwrap();
        assert_eq!(next.len(), 1);
        assert_eq!(next.records()[0].join_key(), None);
    }

    #[test]
    fn test_without_keys_comps_by_apn_column() {
        let mut with_apn = Attributes::new();
        with_apn.insert(crate::columns::APN.into(), AttributeValue::from_cell("B"));
        let comps = Dataset::new(
            DatasetKind::Comps,
            vec![
                Arc::new(PointRecord::comps(LatLng::new(0.0, 0.0), with_apn)),
                Arc::new(PointRecord::comps(LatLng::new(1.0, 1.0), Attributes::new())),
            ],
        )
        .unwrap();
        let keys: HashSet<String> = ["B".to_string()].into_iter().collect();
        let next = comps.without_keys(&keys).unwrap();
        assert_eq!(next.len(), 1);
        assert_eq!(next.records()[0].join_key(), None);
    }
}
