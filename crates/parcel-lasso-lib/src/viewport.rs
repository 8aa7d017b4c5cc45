//! Viewport culling for the pricing markers
//!
//! The visible map bounds are expanded by a zoom-dependent buffer so that small pans do not
//! immediately expose unrendered areas. The buffer shrinks as the zoom level grows.

use crate::{DataError, Dataset, DatasetVersion, PointRecord, Quadtree, Result, utils};
use geo::{Coord, Rect};
use std::sync::Arc;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Visible map bounds in degrees
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ViewportBounds {
    pub north: f64,
    pub south: f64,
    pub east: f64,
    pub west: f64,
}

impl ViewportBounds {
    pub fn new(north: f64, south: f64, east: f64, west: f64) -> Self {
        Self {
            north,
            south,
            east,
            west,
        }
    }

    pub fn is_finite(&self) -> bool {
        [self.north, self.south, self.east, self.west]
            .iter()
            .all(|v| v.is_finite())
    }

    /// Rectangle (x = longitude, y = latitude) grown by `buffer` degrees on every side
    pub fn expanded(&self, buffer: f64) -> Rect<f64> {
        Rect::new(
            Coord {
                x: self.west - buffer,
                y: self.south - buffer,
            },
            Coord {
                x: self.east + buffer,
                y: self.north + buffer,
            },
        )
    }
}

/// Piecewise mapping from zoom level to buffer size in degrees
///
/// Each step `(below_zoom, buffer)` applies to zoom levels strictly below `below_zoom`; zoom
/// levels past the last step use `finest`.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ViewportBuffers {
    steps: Vec<(f64, f64)>,
    finest: f64,
}

impl Default for ViewportBuffers {
    fn default() -> Self {
        Self {
            steps: vec![(8.0, 0.5), (10.0, 0.2), (12.0, 0.1), (14.0, 0.05)],
            finest: 0.02,
        }
    }
}

impl ViewportBuffers {
    /// Create a buffer table, checking that buffers never grow with zoom
    pub fn new(steps: Vec<(f64, f64)>, finest: f64) -> Result<Self> {
        let buffers = Self { steps, finest };
        buffers.validate()?;
        Ok(buffers)
    }

    pub fn validate(&self) -> Result<()> {
        let mut previous: Option<(f64, f64)> = None;
        for &(zoom, buffer) in self.steps.iter().chain(std::iter::once(&(f64::INFINITY, self.finest))) {
            if !buffer.is_finite() || buffer < 0.0 {
                return Err(DataError::InvalidConfig(format!(
                    "viewport buffer must be a non-negative number of degrees, got {buffer}"
                )));
            }
            if zoom.is_nan() {
                return Err(DataError::InvalidConfig(
                    "viewport buffer breakpoint is not a number".to_string(),
                ));
            }
            if let Some((prev_zoom, prev_buffer)) = previous {
                if zoom <= prev_zoom {
                    return Err(DataError::InvalidConfig(format!(
                        "viewport buffer breakpoints must increase, got {prev_zoom} then {zoom}"
                    )));
                }
                if buffer > prev_buffer {
                    return Err(DataError::InvalidConfig(format!(
                        "viewport buffer must not grow with zoom, got {prev_buffer} then {buffer}"
                    )));
                }
            }
            previous = Some((zoom, buffer));
        }
        Ok(())
    }

    /// Buffer in degrees for the given zoom level
    pub fn buffer_for_zoom(&self, zoom: f64) -> f64 {
        self.steps
            .iter()
            .find(|(below, _)| zoom < *below)
            .map_or(self.finest, |(_, buffer)| *buffer)
    }

    /// Query rectangle for the given bounds and zoom
    pub fn query_rect(&self, bounds: &ViewportBounds, zoom: f64) -> Rect<f64> {
        bounds.expanded(self.buffer_for_zoom(zoom))
    }
}

/// Where a visible set came from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum VisibleSource {
    /// Range query against a fresh spatial index
    Index,
    /// Linear scan with the same inclusive bounds test
    LinearScan,
    /// The whole acreage-filtered set, not culled
    AcreageFiltered,
}

/// Pricing records to render for one viewport
#[derive(Clone, Debug)]
pub struct VisibleSet {
    /// Snapshot the records were taken from
    pub dataset_version: DatasetVersion,
    pub source: VisibleSource,
    /// Query rectangle, `None` when culling was bypassed
    pub query_rect: Option<Rect<f64>>,
    pub records: Vec<Arc<PointRecord>>,
}

impl VisibleSet {
    #[inline]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Compute the pricing records to render for a viewport
///
/// A non-empty acreage-filtered set is returned whole. Otherwise the expanded viewport is
/// queried against `index` when it was built from `pricing`, or against `pricing` by linear scan.
/// Both paths return records in dataset order.
pub fn compute_visible(
    index: Option<&Quadtree>,
    pricing: &Arc<Dataset>,
    acreage_filtered: &[Arc<PointRecord>],
    bounds: &ViewportBounds,
    zoom: f64,
    buffers: &ViewportBuffers,
) -> VisibleSet {
    #[cfg(feature = "profiling")]
    profiling::scope!("compute_visible");

    if !acreage_filtered.is_empty() {
        return VisibleSet {
            dataset_version: pricing.version(),
            source: VisibleSource::AcreageFiltered,
            query_rect: None,
            records: acreage_filtered.to_vec(),
        };
    }

    let rect = buffers.query_rect(bounds, zoom);
    let (source, records) = match index.filter(|idx| idx.is_built_from(pricing)) {
        Some(idx) => (VisibleSource::Index, idx.range_query(rect)),
        None => {
            let records = pricing
                .records()
                .iter()
                .filter(|r| utils::rect_contains_inclusive(&rect, r.position()))
                .cloned()
                .collect();
            (VisibleSource::LinearScan, records)
        }
    };

    tracing::debug!(
        "Viewport at zoom {} ({:?}): {} of {} pricing records visible",
        zoom,
        source,
        records.len(),
        pricing.len()
    );

    VisibleSet {
        dataset_version: pricing.version(),
        source,
        query_rect: Some(rect),
        records,
    }
}
