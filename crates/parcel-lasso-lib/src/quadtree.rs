//! Point quadtree for viewport range queries
//!
//! The tree is built once per [`Dataset`] snapshot and never patched: when the live pricing
//! set changes, a new tree is built from the new snapshot. Each tree remembers the
//! [`DatasetVersion`] it was built from so callers can detect staleness.
//!
//! Leaves store indices into the snapshot's record slice. Subdivision splits a node at the
//! midpoint of its bounding box into NW, NE, SW, SE children; points exactly on a split line go
//! to the east/north side. Duplicate coordinates simply pile up in one leaf once the node
//! cannot be split any further.

use crate::{Dataset, DatasetVersion, PointRecord, utils};
use geo::{Coord, Rect};
use smallvec::SmallVec;
use std::sync::Arc;

/// Default maximum number of points kept in a leaf before it is subdivided
pub const DEFAULT_LEAF_CAPACITY: usize = 16;

/// Default maximum depth of the quadtree to prevent unbounded recursion
pub const DEFAULT_MAX_DEPTH: u32 = 24;

type PointBucket = SmallVec<[usize; DEFAULT_LEAF_CAPACITY]>;

/// Spatial index over one dataset snapshot
#[derive(Debug, Clone)]
pub struct Quadtree {
    dataset: Arc<Dataset>,
    /// `None` for an empty dataset
    root: Option<QuadtreeNode>,
}

/// A single node in the quadtree
#[derive(Debug, Clone)]
struct QuadtreeNode {
    /// Bounding box (x = longitude, y = latitude)
    bounding_box: Rect<f64>,
    /// Depth level in the tree (0 = root)
    level: u32,
    /// Record indices, only populated on leaves
    points: PointBucket,
    /// Child nodes (NW, NE, SW, SE) if subdivided
    children: Option<Box<[QuadtreeNode; 4]>>,
}

/// Build parameters shared by every node of one build
#[derive(Clone, Copy, Debug)]
struct BuildParams {
    leaf_capacity: usize,
    max_depth: u32,
    parallel_threshold: usize,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl Quadtree {
    /// Build an index over every record of the snapshot
    ///
    /// Partitions holding at least `parallel_threshold` points build their four children on the
    /// rayon pool.
    pub fn build(
        dataset: &Arc<Dataset>,
        leaf_capacity: usize,
        max_depth: u32,
        parallel_threshold: usize,
    ) -> Self {
        #[cfg(feature = "profiling")]
        profiling::scope!("Quadtree::build");

        let params = BuildParams {
            leaf_capacity: leaf_capacity.max(1),
            max_depth,
            parallel_threshold: parallel_threshold.max(1),
        };
        let positions: Vec<Coord<f64>> = dataset.records().iter().map(|r| r.position()).collect();

        let root = dataset.bounding_box().map(|bbox| {
            let indices: Vec<usize> = (0..positions.len()).collect();
            QuadtreeNode::build(bbox, 0, indices, &positions, params)
        });

        let tree = Self {
            dataset: dataset.clone(),
            root,
        };
        tracing::debug!(
            "Built quadtree for {} {} records: {} nodes, depth {} ({})",
            dataset.len(),
            dataset.kind(),
            tree.node_count(),
            tree.depth(),
            dataset.version()
        );
        tree
    }

    /// Build with the default leaf capacity and depth, sequentially
    pub fn with_defaults(dataset: &Arc<Dataset>) -> Self {
        Self::build(dataset, DEFAULT_LEAF_CAPACITY, DEFAULT_MAX_DEPTH, usize::MAX)
    }

    /// Return every record whose position lies within `rect`, boundaries included
    ///
    /// Results are in dataset order, so they match a linear scan exactly.
    pub fn range_query(&self, rect: Rect<f64>) -> Vec<Arc<PointRecord>> {
        #[cfg(feature = "profiling")]
        profiling::scope!("Quadtree::range_query");

        let mut hits = Vec::new();
        if let Some(root) = &self.root {
            let records = self.dataset.records();
            root.query_points(rect, records, &mut hits);
        }
        hits.sort_unstable();

        let records = self.dataset.records();
        hits.into_iter().map(|i| records[i].clone()).collect()
    }

    /// The snapshot this index was built from
    #[inline]
    pub fn dataset(&self) -> &Arc<Dataset> {
        &self.dataset
    }

    /// Version of the snapshot this index was built from
    #[inline]
    pub fn dataset_version(&self) -> DatasetVersion {
        self.dataset.version()
    }

    /// Whether this index still describes `dataset`
    #[inline]
    pub fn is_built_from(&self, dataset: &Dataset) -> bool {
        self.dataset.version() == dataset.version()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.dataset.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.dataset.is_empty()
    }

    /// Total number of nodes in the tree
    pub fn node_count(&self) -> usize {
        self.root.as_ref().map_or(0, QuadtreeNode::node_count)
    }

    /// Deepest level reached (0 for a single leaf or an empty tree)
    pub fn depth(&self) -> u32 {
        self.root.as_ref().map_or(0, QuadtreeNode::depth)
    }
}

impl QuadtreeNode {
    fn build(
        bounding_box: Rect<f64>,
        level: u32,
        indices: Vec<usize>,
        positions: &[Coord<f64>],
        params: BuildParams,
    ) -> Self {
        let degenerate = bounding_box.width() == 0.0 && bounding_box.height() == 0.0;
        if indices.len() <= params.leaf_capacity || level >= params.max_depth || degenerate {
            return Self {
                bounding_box,
                level,
                points: PointBucket::from_vec(indices),
                children: None,
            };
        }

        let boxes = Self::child_boxes(bounding_box);
        let center = bounding_box.center();
        let mut parts: [Vec<usize>; 4] = Default::default();
        for i in indices.iter().copied() {
            parts[Self::child_index(center, positions[i])].push(i);
        }

        let parallel = indices.len() >= params.parallel_threshold;
        drop(indices);

        let [nw, ne, sw, se] = parts;
        let [nw_box, ne_box, sw_box, se_box] = boxes;
        let next = level + 1;
        let children = if parallel {
            let ((nw, ne), (sw, se)) = rayon::join(
                || {
                    rayon::join(
                        || Self::build(nw_box, next, nw, positions, params),
                        || Self::build(ne_box, next, ne, positions, params),
                    )
                },
                || {
                    rayon::join(
                        || Self::build(sw_box, next, sw, positions, params),
                        || Self::build(se_box, next, se, positions, params),
                    )
                },
            );
            [nw, ne, sw, se]
        } else {
            [
                Self::build(nw_box, next, nw, positions, params),
                Self::build(ne_box, next, ne, positions, params),
                Self::build(sw_box, next, sw, positions, params),
                Self::build(se_box, next, se, positions, params),
            ]
        };

        Self {
            bounding_box,
            level,
            points: PointBucket::new(),
            children: Some(Box::new(children)),
        }
    }

    /// Child bounding boxes in NW, NE, SW, SE order
    fn child_boxes(bounding_box: Rect<f64>) -> [Rect<f64>; 4] {
        let min = bounding_box.min();
        let max = bounding_box.max();
        let mid = bounding_box.center();
        [
            Rect::new(Coord { x: min.x, y: mid.y }, Coord { x: mid.x, y: max.y }),
            Rect::new(mid, max),
            Rect::new(min, mid),
            Rect::new(Coord { x: mid.x, y: min.y }, Coord { x: max.x, y: mid.y }),
        ]
    }

    /// Which child a position falls into; split lines belong to the east and north children
    #[inline(always)]
    fn child_index(center: Coord<f64>, position: Coord<f64>) -> usize {
        let west = position.x < center.x;
        let south = position.y < center.y;
        match (south, west) {
            (false, true) => 0,
            (false, false) => 1,
            (true, true) => 2,
            (true, false) => 3,
        }
    }

    /// Collect record indices within `rect`
    fn query_points(&self, rect: Rect<f64>, records: &[Arc<PointRecord>], hits: &mut Vec<usize>) {
        if !utils::rects_intersect(&self.bounding_box, &rect) {
            return;
        }

        for &i in &self.points {
            if utils::rect_contains_inclusive(&rect, records[i].position()) {
                hits.push(i);
            }
        }

        if let Some(children) = &self.children {
            for child in children.iter() {
                child.query_points(rect, records, hits);
            }
        }
    }

    fn node_count(&self) -> usize {
        1 + self
            .children
            .as_ref()
            .map_or(0, |c| c.iter().map(Self::node_count).sum())
    }

    fn depth(&self) -> u32 {
        match &self.children {
            Some(children) => children.iter().map(Self::depth).max().unwrap_or(self.level),
            None => self.level,
        }
    }
}
