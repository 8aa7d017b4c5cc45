//! Parcel Lasso Library - Spatial Filtering Engine for Parcel Datasets
//!
//! This library holds two large point datasets (a "comps" set and a "pricing" parcel set),
//! lets an analyst select points with drawn regions (circle, rectangle, polygon), optionally
//! narrowed by an acreage range, and exports the selection while atomically removing it from
//! the live data. Rendering, file decoding and spreadsheet encoding are left to collaborators.
//!
//! # Architecture
//!
//! - **[`PointRecord`]** / **[`Dataset`]**: typed records and immutable, versioned snapshots
//! - **[`IngestBuffer`]**: coerces raw string rows and publishes snapshots at chunk boundaries
//! - **[`Region`]**: validated drawn geometry with a point-in-region predicate
//! - **[`Quadtree`]**: point index answering viewport rectangle queries
//! - **[`ViewportBuffers`]**: zoom-adaptive expansion of the visible map bounds
//! - **[`ShapeRegistry`]**: drawn-shape lifecycle with selection and deletion
//! - **[`FilterEngine`]**: acreage filter composed with the shape filter
//! - **[`ExportTransaction`]**: export payload plus all-or-nothing removal
//! - **[`Session`]**: single owner of the state above, driven by [`Command`]s
//!
//! # Performance Characteristics
//!
//! - **Index build**: O(N log N), parallel above a configurable size
//! - **Viewport query**: O(log N + K) for clustered data, K = results
//! - **Shape filter**: O(N) with an early bounding-box reject, parallel for large sets

mod dataset;
mod export;
mod filter;
mod geometry;
mod ingest;
mod quadtree;
mod record;
mod session;
mod shapes;
pub mod utils;
mod viewport;

// Public API exports
pub use dataset::{Dataset, DatasetVersion};
pub use export::{
    COMPS_SHEET_NAME, CompsExportRow, DEFAULT_EXPORT_STEM, ExportOutcome, ExportPayload,
    ExportTransaction, PRICING_SHEET_NAME, PricingExportRow,
};
pub use filter::{AcreageRange, ExtractedFields, FilterEngine, FilterMatch, FilterResult};
pub use geometry::{DrawnShape, Region, contains_point, ring_contains};
pub use ingest::{IngestBuffer, IngestStats, RawRow, RowRejection, columns};
pub use quadtree::Quadtree;
pub use record::{AttributeValue, Attributes, DatasetKind, LatLng, PointRecord};
pub use session::{Command, Config, Effect, Session, SessionInfo};
pub use shapes::{OverlayIntent, Shape, ShapeHandle, ShapeRegistry};
pub use viewport::{ViewportBounds, ViewportBuffers, VisibleSet, VisibleSource, compute_visible};

/// Error types for the engine
#[derive(Debug, thiserror::Error)]
pub enum DataError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Nothing to export: no data points within the drawn shape")]
    EmptySelection,

    #[error("Malformed geometry: {0}")]
    MalformedGeometry(String),

    #[error("Unknown shape: {0}")]
    UnknownShape(ShapeHandle),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, DataError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_exports() {
        // Verify that all public types are accessible
        let _: fn(Config) -> Session = Session::new;
        let _: fn() -> Config = Config::default;
        let _: fn(DatasetKind) -> IngestBuffer = IngestBuffer::new;
    }

    #[test]
    fn test_error_messages() {
        let err = DataError::UnknownShape(ShapeHandle::from_raw(7));
        assert_eq!(err.to_string(), "Unknown shape: shape#7");
        assert!(DataError::EmptySelection.to_string().contains("Nothing to export"));
    }
}
