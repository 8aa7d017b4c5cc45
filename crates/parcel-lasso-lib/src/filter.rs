//! Acreage and shape filtering
//!
//! The acreage filter always narrows the full live pricing set. A shape filter then runs
//! against the narrowed set when it is non-empty, otherwise against the full live pricing set,
//! and independently against every comps record. The newest shape filter replaces the previous
//! combined result.

use crate::{
    AttributeValue, DataError, Dataset, DatasetKind, DatasetVersion, ExportOutcome,
    ExportTransaction, PointRecord, Region, Result, columns, geometry::RegionKey,
};
use lru::LruCache;
use rayon::prelude::*;
use std::num::NonZeroUsize;
use std::sync::Arc;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

const INVALID_RANGE_MESSAGE: &str =
    "Please enter valid numeric values for minimum and maximum lot acreage";

/// Inclusive lot acreage range
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AcreageRange {
    pub min: f64,
    pub max: f64,
}

impl AcreageRange {
    /// Both bounds must be finite. `min > max` is allowed and matches nothing.
    pub fn new(min: f64, max: f64) -> Result<Self> {
        if !min.is_finite() || !max.is_finite() {
            return Err(DataError::Validation(INVALID_RANGE_MESSAGE.to_string()));
        }
        Ok(Self { min, max })
    }

    /// Parse the raw text of the two range inputs
    pub fn parse(min: &str, max: &str) -> Result<Self> {
        let parse = |s: &str| {
            s.trim()
                .parse::<f64>()
                .map_err(|_| DataError::Validation(INVALID_RANGE_MESSAGE.to_string()))
        };
        Self::new(parse(min)?, parse(max)?)
    }

    /// Unknown acreage never matches
    #[inline]
    pub fn contains(&self, acreage: Option<f64>) -> bool {
        acreage.is_some_and(|a| a >= self.min && a <= self.max)
    }
}

/// Fields pulled out of a matched record for display and export
#[derive(Clone, Debug, PartialEq)]
pub enum ExtractedFields {
    Pricing {
        apn: String,
        lot_acreage: Option<f64>,
        lat: f64,
        lng: f64,
    },
    Comps {
        price: AttributeValue,
        acres: AttributeValue,
        lat: f64,
        lng: f64,
    },
}

impl ExtractedFields {
    pub fn from_record(record: &PointRecord) -> Self {
        match record.kind() {
            DatasetKind::Pricing => Self::Pricing {
                apn: record.id().to_string(),
                lot_acreage: record.lot_acreage(),
                lat: record.lat(),
                lng: record.lng(),
            },
            DatasetKind::Comps => {
                let column = |name: &str| {
                    record
                        .attribute(name)
                        .cloned()
                        .unwrap_or(AttributeValue::Null)
                };
                Self::Comps {
                    price: column(columns::PRICE),
                    acres: column(columns::ACRES),
                    lat: record.lat(),
                    lng: record.lng(),
                }
            }
        }
    }
}

/// One matched record, tagged with its dataset
#[derive(Clone, Debug, PartialEq)]
pub struct FilterMatch {
    pub source: DatasetKind,
    pub record: Arc<PointRecord>,
    pub fields: ExtractedFields,
}

impl FilterMatch {
    fn new(record: &Arc<PointRecord>) -> Self {
        Self {
            source: record.kind(),
            record: record.clone(),
            fields: ExtractedFields::from_record(record),
        }
    }
}

/// Combined shape-filter result: pricing matches first, then comps matches
///
/// Each group keeps its dataset's relative order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FilterResult {
    matches: Vec<FilterMatch>,
    pricing_count: usize,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl FilterResult {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Test every record of both sets against `region`
    ///
    /// Sets with at least `parallel_threshold` records are tested on the rayon pool.
    pub fn evaluate(
        pricing_base: &[Arc<PointRecord>],
        comps: &[Arc<PointRecord>],
        region: &Region,
        parallel_threshold: usize,
    ) -> Self {
        #[cfg(feature = "profiling")]
        profiling::scope!("FilterResult::evaluate");

        let mut matches = Self::matching(pricing_base, region, parallel_threshold);
        let pricing_count = matches.len();
        matches.extend(Self::matching(comps, region, parallel_threshold));
        Self {
            matches,
            pricing_count,
        }
    }

    fn matching(
        records: &[Arc<PointRecord>],
        region: &Region,
        parallel_threshold: usize,
    ) -> Vec<FilterMatch> {
        if records.len() >= parallel_threshold {
            records
                .par_iter()
                .filter(|r| region.contains(r.lat(), r.lng()))
                .map(FilterMatch::new)
                .collect()
        } else {
            records
                .iter()
                .filter(|r| region.contains(r.lat(), r.lng()))
                .map(FilterMatch::new)
                .collect()
        }
    }

    #[inline]
    pub fn matches(&self) -> &[FilterMatch] {
        &self.matches
    }

    #[inline]
    pub fn pricing_matches(&self) -> &[FilterMatch] {
        &self.matches[..self.pricing_count]
    }

    #[inline]
    pub fn comps_matches(&self) -> &[FilterMatch] {
        &self.matches[self.pricing_count..]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.matches.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }
}

/// Cache key for shape filter results
#[derive(Hash, Eq, PartialEq, Clone, Debug)]
struct ShapeCacheKey {
    pricing: DatasetVersion,
    comps: DatasetVersion,
    /// Bumped whenever the acreage-narrowed set changes
    acreage_generation: u64,
    region: RegionKey,
}

/// Holds both live datasets, the acreage filter and the current combined result
#[derive(Debug)]
pub struct FilterEngine {
    pricing: Arc<Dataset>,
    comps: Arc<Dataset>,
    acreage_range: Option<AcreageRange>,
    acreage_filtered: Arc<[Arc<PointRecord>]>,
    acreage_generation: u64,
    result: Arc<FilterResult>,
    /// `None` when caching is disabled
    cache: Option<LruCache<ShapeCacheKey, Arc<FilterResult>>>,
    parallel_threshold: usize,
}

impl Default for FilterEngine {
    fn default() -> Self {
        Self::new(usize::MAX, 0)
    }
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl FilterEngine {
    /// Create an engine over two empty datasets
    pub fn new(parallel_threshold: usize, cache_capacity: usize) -> Self {
        Self {
            pricing: Dataset::empty(DatasetKind::Pricing),
            comps: Dataset::empty(DatasetKind::Comps),
            acreage_range: None,
            acreage_filtered: Arc::from(Vec::new()),
            acreage_generation: 0,
            result: Arc::new(FilterResult::empty()),
            cache: NonZeroUsize::new(cache_capacity).map(LruCache::new),
            parallel_threshold,
        }
    }

    /// Swap in a new snapshot of either dataset
    ///
    /// The combined result refers to the previous snapshot and is dropped. A stored acreage
    /// range is re-applied to a new pricing snapshot.
    pub fn replace_dataset(&mut self, dataset: Arc<Dataset>) {
        match dataset.kind() {
            DatasetKind::Pricing => {
                self.pricing = dataset;
                if let Some(range) = self.acreage_range {
                    self.narrow(range);
                }
            }
            DatasetKind::Comps => self.comps = dataset,
        }
        self.result = Arc::new(FilterResult::empty());
        if let Some(cache) = &mut self.cache {
            cache.clear();
        }
    }

    /// Swap in the post-export snapshots of both datasets at once
    ///
    /// The combined result and the narrowed set are cleared, since both may reference removed
    /// records. The stored acreage range is kept.
    pub fn commit_export(&mut self, transaction: ExportTransaction) -> ExportOutcome {
        let (outcome, next_pricing, next_comps) = transaction.into_parts();
        self.pricing = next_pricing;
        self.comps = next_comps;
        self.clear_acreage_filtered();
        self.clear_result();
        if let Some(cache) = &mut self.cache {
            cache.clear();
        }
        tracing::info!(
            "Exported {} pricing and {} comps rows, removed {} pricing and {} comps records",
            outcome.payload.pricing_rows.len(),
            outcome.payload.comps_rows.len(),
            outcome.removed_pricing,
            outcome.removed_comps
        );
        outcome
    }

    /// Narrow the live pricing set to acreages within `[min, max]`
    ///
    /// On invalid bounds the engine is left unchanged.
    pub fn apply_attribute_filter(&mut self, min: f64, max: f64) -> Result<&[Arc<PointRecord>]> {
        let range = AcreageRange::new(min, max).inspect_err(|e| {
            tracing::warn!("Acreage filter rejected: {}", e);
        })?;
        Ok(self.apply_acreage_range(range))
    }

    pub fn apply_acreage_range(&mut self, range: AcreageRange) -> &[Arc<PointRecord>] {
        self.acreage_range = Some(range);
        self.narrow(range);
        tracing::info!(
            "Acreage filter [{}, {}] keeps {} of {} pricing records",
            range.min,
            range.max,
            self.acreage_filtered.len(),
            self.pricing.len()
        );
        &self.acreage_filtered[..]
    }

    fn narrow(&mut self, range: AcreageRange) {
        self.acreage_filtered = self
            .pricing
            .records()
            .iter()
            .filter(|r| range.contains(r.lot_acreage()))
            .cloned()
            .collect();
        self.acreage_generation += 1;
    }

    /// Reset the acreage filter and the shape-derived result
    pub fn clear_filters(&mut self) {
        self.acreage_range = None;
        self.clear_acreage_filtered();
        self.clear_result();
    }

    /// Drop the narrowed set but keep the stored range
    pub fn clear_acreage_filtered(&mut self) {
        if !self.acreage_filtered.is_empty() {
            self.acreage_filtered = Arc::from(Vec::new());
        }
        self.acreage_generation += 1;
    }

    pub fn clear_result(&mut self) {
        self.result = Arc::new(FilterResult::empty());
    }

    /// Recompute the narrowed set from the stored range, if any
    pub fn reapply_acreage_range(&mut self) -> Option<usize> {
        let range = self.acreage_range?;
        Some(self.apply_acreage_range(range).len())
    }

    /// Pricing records a shape filter runs against
    pub fn shape_base(&self) -> &[Arc<PointRecord>] {
        if self.acreage_filtered.is_empty() {
            self.pricing.records()
        } else {
            &self.acreage_filtered[..]
        }
    }

    /// Evaluate a region without touching the engine's state
    pub fn evaluate_shape(&self, region: &Region) -> FilterResult {
        FilterResult::evaluate(
            self.shape_base(),
            self.comps.records(),
            region,
            self.parallel_threshold,
        )
    }

    /// Evaluate a region and make it the current combined result
    pub fn apply_shape_filter(&mut self, region: &Region) -> Arc<FilterResult> {
        let key = ShapeCacheKey {
            pricing: self.pricing.version(),
            comps: self.comps.version(),
            acreage_generation: self.acreage_generation,
            region: region.key().clone(),
        };

        let cached = self.cache.as_mut().and_then(|c| c.get(&key).cloned());
        let result = match cached {
            Some(result) => {
                tracing::debug!("Shape filter cache hit ({} matches)", result.len());
                result
            }
            None => {
                let result = Arc::new(self.evaluate_shape(region));
                if let Some(cache) = &mut self.cache {
                    cache.put(key, result.clone());
                }
                result
            }
        };

        tracing::info!(
            "{} filter matched {} pricing and {} comps records",
            region.shape().name(),
            result.pricing_matches().len(),
            result.comps_matches().len()
        );
        self.result = result.clone();
        result
    }

    #[inline]
    pub fn pricing(&self) -> &Arc<Dataset> {
        &self.pricing
    }

    #[inline]
    pub fn comps(&self) -> &Arc<Dataset> {
        &self.comps
    }

    #[inline]
    pub fn acreage_range(&self) -> Option<AcreageRange> {
        self.acreage_range
    }

    /// The acreage-narrowed pricing set, empty when no filter is active or nothing matched
    #[inline]
    pub fn acreage_filtered(&self) -> &[Arc<PointRecord>] {
        &self.acreage_filtered[..]
    }

    /// The current combined result
    #[inline]
    pub fn result(&self) -> &Arc<FilterResult> {
        &self.result
    }
}
