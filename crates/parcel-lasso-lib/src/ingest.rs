//! Row coercion and chunked ingestion
//!
//! The file collaborator hands over rows as string maps, one chunk at a time. Each row is coerced
//! once into a typed [`PointRecord`] or dropped with a [`RowRejection`] reason; rejections are
//! only counted, never surfaced per row. Accepted records accumulate in a private buffer and are
//! exposed only as complete [`Dataset`] snapshots via [`IngestBuffer::publish`].

use crate::{Attributes, AttributeValue, Dataset, DatasetKind, LatLng, PointRecord};
use rayon::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;

/// A raw row as produced by the file decoder: column name to cell text
pub type RawRow = HashMap<String, String>;

/// Column names the engine reads
pub mod columns {
    pub const LATITUDE: &str = "LATITUDE";
    pub const LONGITUDE: &str = "LONGITUDE";
    /// Parcel identifier; required on pricing rows, join key on comps rows
    pub const APN: &str = "APN - FORMATTED";
    pub const LOT_ACREAGE: &str = "LOT ACREAGE";
    pub const PRICE: &str = "PRICE";
    pub const ACRES: &str = "ACRES";
}

/// Chunks at least this long are coerced in parallel
const PARALLEL_CHUNK_ROWS: usize = 2048;

/// Why a row was dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RowRejection {
    #[error("missing LATITUDE or LONGITUDE")]
    MissingCoordinate,

    #[error("LATITUDE or LONGITUDE is not a finite number")]
    NonFiniteCoordinate,

    #[error("missing APN - FORMATTED")]
    MissingParcelId,
}

/// Aggregate ingestion counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub rows_seen: usize,
    pub accepted: usize,
    pub missing_coordinate: usize,
    pub non_finite_coordinate: usize,
    pub missing_parcel_id: usize,
}

impl IngestStats {
    pub fn rejected(&self) -> usize {
        self.missing_coordinate + self.non_finite_coordinate + self.missing_parcel_id
    }

    /// Fraction of `total_rows` seen so far, clamped to 0..=1
    pub fn progress(&self, total_rows: usize) -> f32 {
        if total_rows == 0 {
            return 1.0;
        }
        (self.rows_seen as f32 / total_rows as f32).min(1.0)
    }

    fn record(&mut self, outcome: &std::result::Result<PointRecord, RowRejection>) {
        self.rows_seen += 1;
        match outcome {
            Ok(_) => self.accepted += 1,
            Err(RowRejection::MissingCoordinate) => self.missing_coordinate += 1,
            Err(RowRejection::NonFiniteCoordinate) => self.non_finite_coordinate += 1,
            Err(RowRejection::MissingParcelId) => self.missing_parcel_id += 1,
        }
    }
}

/// Parse a numeric cell; empty, unparsable and non-finite cells give `None`
fn parse_number(cell: &str) -> Option<f64> {
    cell.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

fn parse_position(row: &RawRow) -> std::result::Result<LatLng, RowRejection> {
    let (Some(lat), Some(lng)) = (row.get(columns::LATITUDE), row.get(columns::LONGITUDE)) else {
        return Err(RowRejection::MissingCoordinate);
    };
    match (parse_number(lat), parse_number(lng)) {
        (Some(lat), Some(lng)) => Ok(LatLng::new(lat, lng)),
        _ => Err(RowRejection::NonFiniteCoordinate),
    }
}

/// Coerce one raw row into a typed record of the given dataset
pub fn coerce_row(
    kind: DatasetKind,
    row: &RawRow,
) -> std::result::Result<PointRecord, RowRejection> {
    let position = parse_position(row)?;
    match kind {
        DatasetKind::Pricing => {
            let apn = row
                .get(columns::APN)
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .ok_or(RowRejection::MissingParcelId)?;
            let lot_acreage = row.get(columns::LOT_ACREAGE).and_then(|s| parse_number(s));
            Ok(PointRecord::pricing(apn, position, lot_acreage))
        }
        DatasetKind::Comps => {
            let attributes: Attributes = row
                .iter()
                .map(|(column, cell)| (column.clone(), AttributeValue::from_cell(cell)))
                .collect();
            Ok(PointRecord::comps(position, attributes))
        }
    }
}

/// Private accumulation buffer for one dataset being ingested
#[derive(Debug)]
pub struct IngestBuffer {
    kind: DatasetKind,
    records: Vec<Arc<PointRecord>>,
    stats: IngestStats,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl IngestBuffer {
    pub fn new(kind: DatasetKind) -> Self {
        Self {
            kind,
            records: Vec::new(),
            stats: IngestStats::default(),
        }
    }

    #[inline]
    pub fn kind(&self) -> DatasetKind {
        self.kind
    }

    #[inline]
    pub fn stats(&self) -> IngestStats {
        self.stats
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Coerce and buffer a single row; returns whether it was accepted
    pub fn push_row(&mut self, row: &RawRow) -> bool {
        let outcome = coerce_row(self.kind, row);
        self.stats.record(&outcome);
        match outcome {
            Ok(record) => {
                self.records.push(Arc::new(record));
                true
            }
            Err(_) => false,
        }
    }

    /// Coerce and buffer a chunk of rows, preserving row order
    ///
    /// Returns the number of rows accepted from this chunk.
    pub fn push_chunk(&mut self, rows: &[RawRow]) -> usize {
        #[cfg(feature = "profiling")]
        profiling::scope!("ingest::push_chunk");

        let kind = self.kind;
        let outcomes: Vec<_> = if rows.len() >= PARALLEL_CHUNK_ROWS {
            rows.par_iter().map(|row| coerce_row(kind, row)).collect()
        } else {
            rows.iter().map(|row| coerce_row(kind, row)).collect()
        };

        let before = self.records.len();
        for outcome in outcomes {
            self.stats.record(&outcome);
            if let Ok(record) = outcome {
                self.records.push(Arc::new(record));
            }
        }
        let accepted = self.records.len() - before;
        tracing::debug!(
            "Ingested {} chunk: {} rows, {} accepted ({} total)",
            self.kind,
            rows.len(),
            accepted,
            self.records.len()
        );
        accepted
    }

    /// Publish an immutable snapshot of everything buffered so far
    pub fn publish(&self) -> Arc<Dataset> {
        Dataset::from_checked(self.kind, self.records.clone())
    }

    /// Publish the final snapshot and return it with the aggregate counters
    pub fn finish(self) -> (Arc<Dataset>, IngestStats) {
        let stats = self.stats;
        if stats.rejected() > 0 {
            tracing::info!(
                "{} ingestion dropped {} of {} rows ({} missing coordinates, {} non-finite coordinates, {} missing APN)",
                self.kind,
                stats.rejected(),
                stats.rows_seen,
                stats.missing_coordinate,
                stats.non_finite_coordinate,
                stats.missing_parcel_id
            );
        }
        (Dataset::from_checked(self.kind, self.records), stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, &str)]) -> RawRow {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn pricing_row(apn: &str, lat: &str, lng: &str, acreage: &str) -> RawRow {
        row(&[
            (columns::APN, apn),
            (columns::LATITUDE, lat),
            (columns::LONGITUDE, lng),
            (columns::LOT_ACREAGE, acreage),
        ])
    }

    #[test]
    fn test_coerce_pricing_row() {
        let record =
            coerce_row(DatasetKind::Pricing, &pricing_row("12-3", "41.1", "-77.5", "2.75"))
                .unwrap();
        assert_eq!(record.id(), "12-3");
        assert_eq!(record.lat(), 41.1);
        assert_eq!(record.lng(), -77.5);
        assert_eq!(record.lot_acreage(), Some(2.75));
    }

    #[test]
    fn test_coerce_pricing_row_unknown_acreage() {
        let empty = coerce_row(DatasetKind::Pricing, &pricing_row("A", "1", "2", "")).unwrap();
        assert_eq!(empty.lot_acreage(), None);
        let garbage = coerce_row(DatasetKind::Pricing, &pricing_row("A", "1", "2", "n/a")).unwrap();
        assert_eq!(garbage.lot_acreage(), None);
        let missing = coerce_row(
            DatasetKind::Pricing,
            &row(&[(columns::APN, "A"), (columns::LATITUDE, "1"), (columns::LONGITUDE, "2")]),
        )
        .unwrap();
        assert_eq!(missing.lot_acreage(), None);
    }

    #[test]
    fn test_coerce_rejections() {
        assert_eq!(
            coerce_row(DatasetKind::Pricing, &pricing_row("", "1", "2", "1")),
            Err(RowRejection::MissingParcelId)
        );
        assert_eq!(
            coerce_row(DatasetKind::Pricing, &pricing_row("A", "abc", "2", "1")),
            Err(RowRejection::NonFiniteCoordinate)
        );
        assert_eq!(
            coerce_row(DatasetKind::Pricing, &pricing_row("A", "inf", "2", "1")),
            Err(RowRejection::NonFiniteCoordinate)
        );
        assert_eq!(
            coerce_row(DatasetKind::Comps, &row(&[(columns::LATITUDE, "1")])),
            Err(RowRejection::MissingCoordinate)
        );
    }

    #[test]
    fn test_coerce_comps_keeps_all_columns() {
        let record = coerce_row(
            DatasetKind::Comps,
            &row(&[
                (columns::LATITUDE, "40.5"),
                (columns::LONGITUDE, "-76.25"),
                (columns::PRICE, "99000"),
                (columns::ACRES, ""),
                (columns::APN, "77-1"),
            ]),
        )
        .unwrap();
        assert_eq!(record.kind(), DatasetKind::Comps);
        assert_eq!(record.attributes().len(), 5);
        assert!(record.attribute(columns::ACRES).unwrap().is_null());
        assert_eq!(record.join_key(), Some("77-1"));
    }

    #[test]
    fn test_buffer_publishes_snapshots_per_chunk() {
        let mut buffer = IngestBuffer::new(DatasetKind::Pricing);
        let first = vec![
            pricing_row("A", "1", "1", "1"),
            pricing_row("", "1", "1", "1"),
        ];
        assert_eq!(buffer.push_chunk(&first), 1);
        let snapshot_a = buffer.publish();
        assert_eq!(snapshot_a.len(), 1);

        let second = vec![pricing_row("B", "2", "2", ""), pricing_row("C", "x", "2", "")];
        assert_eq!(buffer.push_chunk(&second), 1);
        let snapshot_b = buffer.publish();

        // Earlier snapshot is unaffected by later chunks
        assert_eq!(snapshot_a.len(), 1);
        assert_eq!(snapshot_b.len(), 2);
        assert_ne!(snapshot_a.version(), snapshot_b.version());

        let (final_snapshot, stats) = buffer.finish();
        assert_eq!(final_snapshot.len(), 2);
        assert_eq!(stats.rows_seen, 4);
        assert_eq!(stats.accepted, 2);
        assert_eq!(stats.missing_parcel_id, 1);
        assert_eq!(stats.non_finite_coordinate, 1);
        assert_eq!(stats.rejected(), 2);
    }

    #[test]
    fn test_parallel_chunk_preserves_order() {
        let rows: Vec<RawRow> = (0..PARALLEL_CHUNK_ROWS + 10)
            .map(|i| pricing_row(&format!("P{i}"), &format!("{}", i as f64 * 0.001), "0", "1"))
            .collect();
        let mut buffer = IngestBuffer::new(DatasetKind::Pricing);
        assert_eq!(buffer.push_chunk(&rows), rows.len());
        let snapshot = buffer.publish();
        for (i, record) in snapshot.records().iter().enumerate() {
            assert_eq!(record.id(), format!("P{i}"));
        }
    }

    #[test]
    fn test_push_row() {
        let mut buffer = IngestBuffer::new(DatasetKind::Comps);
        assert!(buffer.push_row(&row(&[(columns::LATITUDE, "1"), (columns::LONGITUDE, "2")])));
        assert!(!buffer.push_row(&row(&[])));
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.stats().missing_coordinate, 1);
    }

    #[test]
    fn test_progress() {
        let stats = IngestStats {
            rows_seen: 50,
            ..Default::default()
        };
        assert_eq!(stats.progress(100), 0.5);
        assert_eq!(stats.progress(10), 1.0);
        assert_eq!(stats.progress(0), 1.0);
    }
}
