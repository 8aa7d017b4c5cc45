//! Session - single owner of the filtering and viewport state
//!
//! A [`Session`] holds the live datasets (through the [`FilterEngine`]), the drawn shapes and
//! the spatial index over the live pricing set. External inputs arrive as [`Command`]s and
//! produce [`Effect`]s for the renderer and the export writer.

use crate::{
    AcreageRange, DataError, Dataset, DatasetKind, DrawnShape, ExportOutcome, ExportTransaction,
    FilterEngine, FilterResult, LatLng, OverlayIntent, PointRecord, Quadtree, Result, ShapeHandle,
    ShapeRegistry, ViewportBounds, ViewportBuffers, VisibleSet, compute_visible,
    quadtree::{DEFAULT_LEAF_CAPACITY, DEFAULT_MAX_DEPTH},
};
use std::collections::HashSet;
use std::sync::Arc;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Configuration for a session
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Config {
    /// Maximum number of points in a quadtree leaf (default 16)
    pub leaf_capacity: usize,
    /// Maximum quadtree depth (default 24)
    pub max_depth: u32,
    /// Pricing sets smaller than this are culled by linear scan instead of an index.
    /// Default 1, i.e. index whenever there is anything to index.
    pub min_points_for_index: usize,
    /// Zoom-dependent viewport buffer table
    pub viewport_buffers: ViewportBuffers,
    /// Sets at least this large are filtered and indexed on the rayon pool (default 4096)
    pub parallel_threshold: usize,
    /// Number of shape filter results kept in the LRU cache, 0 disables it (default 8)
    pub result_cache_capacity: usize,
    /// Recompute the acreage filter against the remaining parcels after an export
    pub reapply_acreage_after_export: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            leaf_capacity: DEFAULT_LEAF_CAPACITY,
            max_depth: DEFAULT_MAX_DEPTH,
            min_points_for_index: 1,
            viewport_buffers: ViewportBuffers::default(),
            parallel_threshold: 4096,
            result_cache_capacity: 8,
            reapply_acreage_after_export: false,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.leaf_capacity == 0 {
            return Err(DataError::InvalidConfig(
                "leaf_capacity must be at least 1".to_string(),
            ));
        }
        if self.max_depth == 0 {
            return Err(DataError::InvalidConfig(
                "max_depth must be at least 1".to_string(),
            ));
        }
        if self.parallel_threshold == 0 {
            return Err(DataError::InvalidConfig(
                "parallel_threshold must be at least 1".to_string(),
            ));
        }
        self.viewport_buffers.validate()
    }
}

/// Summary of the session state
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SessionInfo {
    /// Live pricing records
    pub pricing_count: usize,
    /// Live comps records
    pub comps_count: usize,
    /// Drawn shapes still on the map
    pub shape_count: usize,
    /// Pricing records in the acreage-narrowed set
    pub acreage_filtered_count: usize,
    /// Records in the combined shape filter result
    pub result_count: usize,
    /// Whether the spatial index matches the live pricing set
    pub index_fresh: bool,
}

/// An external input
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "command", rename_all = "snake_case"))]
pub enum Command {
    /// A shape was drawn on the map
    Draw { shape: DrawnShape },
    /// A drawn shape was clicked
    Select { handle: ShapeHandle },
    DeleteActiveShape,
    /// Raw text of the minimum and maximum lot acreage inputs
    SetAcreageRange { min: String, max: String },
    ClearFilters,
    /// The map was panned or zoomed
    ViewportChanged { bounds: ViewportBounds, zoom: f64 },
    Export,
}

/// An output for the renderer or the export writer
#[derive(Clone, Debug)]
pub enum Effect {
    Overlay(OverlayIntent),
    VisiblePricing(VisibleSet),
    FilterResult(Arc<FilterResult>),
    Export(ExportOutcome),
}

/// Owner of the datasets, shapes, filters and spatial index
#[derive(Debug)]
pub struct Session {
    config: Config,
    engine: FilterEngine,
    shapes: ShapeRegistry,
    /// Index over the live pricing set, rebuilt lazily when stale
    index: Option<Arc<Quadtree>>,
    /// Last viewport seen, used to republish visible points after data changes
    viewport: Option<(ViewportBounds, f64)>,
    /// Parcel ids exported so far; later snapshots never bring them back
    removed_ids: HashSet<String>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl Session {
    /// Create an empty session
    pub fn new(config: Config) -> Self {
        let engine = FilterEngine::new(config.parallel_threshold, config.result_cache_capacity);
        Self {
            config,
            engine,
            shapes: ShapeRegistry::new(),
            index: None,
            viewport: None,
            removed_ids: HashSet::new(),
        }
    }

    /// Create an empty session after validating the configuration
    pub fn try_new(config: Config) -> Result<Self> {
        config.validate()?;
        Ok(Self::new(config))
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Publish a new snapshot of either dataset
    ///
    /// Records exported earlier in the session (pricing by APN, comps by their APN column)
    /// are dropped from the snapshot first. The combined result is dropped and a stale index
    /// will be rebuilt on the next viewport query.
    pub fn replace_dataset(&mut self, dataset: Arc<Dataset>) {
        let dataset = match dataset.without_keys(&self.removed_ids) {
            Some(kept) => {
                tracing::debug!(
                    "Dropped {} already exported {} records from the new snapshot",
                    dataset.len() - kept.len(),
                    dataset.kind()
                );
                kept
            }
            None => dataset,
        };
        tracing::info!(
            "Publishing {} snapshot {} with {} records",
            dataset.kind(),
            dataset.version(),
            dataset.len()
        );
        if dataset.kind() == DatasetKind::Pricing {
            self.index = None;
        }
        self.engine.replace_dataset(dataset);
    }

    #[inline]
    pub fn pricing(&self) -> &Arc<Dataset> {
        self.engine.pricing()
    }

    #[inline]
    pub fn comps(&self) -> &Arc<Dataset> {
        self.engine.comps()
    }

    /// Every live comps record; comps are never viewport-culled
    #[inline]
    pub fn all_comps(&self) -> &[Arc<PointRecord>] {
        self.engine.comps().records()
    }

    #[inline]
    pub fn shapes(&self) -> &ShapeRegistry {
        &self.shapes
    }

    #[inline]
    pub fn filter_engine(&self) -> &FilterEngine {
        &self.engine
    }

    /// The current combined result
    #[inline]
    pub fn combined_result(&self) -> &Arc<FilterResult> {
        self.engine.result()
    }

    /// Register a drawn shape and make it the working selection
    pub fn draw_region(
        &mut self,
        shape: DrawnShape,
    ) -> Result<(ShapeHandle, OverlayIntent, Arc<FilterResult>)> {
        let (handle, intent) = self.shapes.draw(shape)?;
        let region = match self.shapes.get(handle) {
            Some(shape) => shape.region().clone(),
            None => return Err(DataError::UnknownShape(handle)),
        };
        let result = self.engine.apply_shape_filter(&region);
        Ok((handle, intent, result))
    }

    pub fn select_shape(&mut self, handle: ShapeHandle) -> Result<()> {
        self.shapes.select(handle)
    }

    /// Remove the selected shape, or the latest one. The combined result is left as is.
    pub fn delete_active_shape(&mut self) -> Option<OverlayIntent> {
        self.shapes.delete_active()
    }

    /// Narrow the live pricing set by lot acreage
    pub fn set_acreage_range(&mut self, min: f64, max: f64) -> Result<usize> {
        Ok(self.engine.apply_attribute_filter(min, max)?.len())
    }

    /// Narrow the live pricing set using the raw text of the range inputs
    pub fn set_acreage_text(&mut self, min: &str, max: &str) -> Result<usize> {
        let range = AcreageRange::parse(min, max).inspect_err(|e| {
            tracing::warn!("Acreage filter rejected: {}", e);
        })?;
        Ok(self.engine.apply_acreage_range(range).len())
    }

    pub fn clear_filters(&mut self) {
        self.engine.clear_filters();
    }

    /// Record the new viewport and compute the pricing records to render
    ///
    /// Rebuilds the spatial index first when it no longer matches the live pricing set.
    /// Non-finite bounds or zoom are rejected and the last viewport is kept.
    pub fn viewport_changed(&mut self, bounds: ViewportBounds, zoom: f64) -> Result<VisibleSet> {
        if !bounds.is_finite() || !zoom.is_finite() {
            tracing::warn!("Ignoring non-finite viewport {:?} at zoom {}", bounds, zoom);
            return Err(DataError::Validation(
                "viewport bounds and zoom must be finite numbers".to_string(),
            ));
        }
        self.viewport = Some((bounds, zoom));
        Ok(self.refresh_visible(&bounds, zoom))
    }

    fn refresh_visible(&mut self, bounds: &ViewportBounds, zoom: f64) -> VisibleSet {
        if self.engine.acreage_filtered().is_empty() {
            self.ensure_index();
        }
        self.visible_pricing(bounds, zoom)
    }

    /// Compute the pricing records to render without touching the session
    ///
    /// Uses the index only when it is fresh, otherwise scans the live set.
    pub fn visible_pricing(&self, bounds: &ViewportBounds, zoom: f64) -> VisibleSet {
        compute_visible(
            self.index.as_deref(),
            self.engine.pricing(),
            self.engine.acreage_filtered(),
            bounds,
            zoom,
            &self.config.viewport_buffers,
        )
    }

    /// Whether a visible set was computed from the live pricing snapshot
    pub fn is_current(&self, visible: &VisibleSet) -> bool {
        visible.dataset_version == self.engine.pricing().version()
    }

    /// Whether the spatial index describes the live pricing set
    pub fn index_is_fresh(&self) -> bool {
        self.index
            .as_ref()
            .is_some_and(|idx| idx.is_built_from(self.engine.pricing()))
    }

    fn ensure_index(&mut self) {
        if self.index_is_fresh() {
            return;
        }
        let pricing = self.engine.pricing();
        if pricing.is_empty() || pricing.len() < self.config.min_points_for_index {
            self.index = None;
            return;
        }
        self.index = Some(Arc::new(Quadtree::build(
            pricing,
            self.config.leaf_capacity,
            self.config.max_depth,
            self.config.parallel_threshold,
        )));
    }

    /// Export the combined result and remove the exported parcels from the live data
    ///
    /// Fails without changing anything when the combined result is empty.
    pub fn export_current_selection(&mut self) -> Result<ExportOutcome> {
        let transaction = ExportTransaction::prepare(
            self.engine.result(),
            self.engine.pricing(),
            self.engine.comps(),
        )
        .inspect_err(|e| tracing::warn!("Export rejected: {}", e))?;

        let outcome = self.engine.commit_export(transaction);
        self.removed_ids.extend(outcome.removed_ids.iter().cloned());
        self.index = None;
        if self.config.reapply_acreage_after_export {
            if let Some(count) = self.engine.reapply_acreage_range() {
                tracing::debug!("Re-applied acreage filter after export: {} records", count);
            }
        }
        Ok(outcome)
    }

    /// Center of the loaded data, for the initial map framing
    pub fn center(&self) -> Option<LatLng> {
        self.engine
            .pricing()
            .bounding_box()
            .or_else(|| self.engine.comps().bounding_box())
            .map(|bbox| {
                let c = bbox.center();
                LatLng::new(c.y, c.x)
            })
    }

    /// Get information about the session
    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            pricing_count: self.engine.pricing().len(),
            comps_count: self.engine.comps().len(),
            shape_count: self.shapes.len(),
            acreage_filtered_count: self.engine.acreage_filtered().len(),
            result_count: self.engine.result().len(),
            index_fresh: self.index_is_fresh(),
        }
    }

    /// Apply one external input
    ///
    /// On error the session is unchanged. Changes to the live pricing set or the acreage
    /// filter republish the visible pricing records for the last known viewport.
    pub fn apply(&mut self, command: Command) -> Result<Vec<Effect>> {
        let mut effects = Vec::new();
        match command {
            Command::Draw { shape } => {
                let (_, intent, result) = self.draw_region(shape)?;
                effects.push(Effect::Overlay(intent));
                effects.push(Effect::FilterResult(result));
            }
            Command::Select { handle } => self.select_shape(handle)?,
            Command::DeleteActiveShape => {
                if let Some(intent) = self.delete_active_shape() {
                    effects.push(Effect::Overlay(intent));
                }
            }
            Command::SetAcreageRange { min, max } => {
                self.set_acreage_text(&min, &max)?;
                self.push_visible(&mut effects);
            }
            Command::ClearFilters => {
                self.clear_filters();
                effects.push(Effect::FilterResult(self.engine.result().clone()));
                self.push_visible(&mut effects);
            }
            Command::ViewportChanged { bounds, zoom } => {
                effects.push(Effect::VisiblePricing(self.viewport_changed(bounds, zoom)?));
            }
            Command::Export => {
                let outcome = self.export_current_selection()?;
                effects.push(Effect::Export(outcome));
                effects.push(Effect::FilterResult(self.engine.result().clone()));
                self.push_visible(&mut effects);
            }
        }
        Ok(effects)
    }

    fn push_visible(&mut self, effects: &mut Vec<Effect>) {
        if let Some((bounds, zoom)) = self.viewport {
            effects.push(Effect::VisiblePricing(self.refresh_visible(&bounds, zoom)));
        }
    }
}
