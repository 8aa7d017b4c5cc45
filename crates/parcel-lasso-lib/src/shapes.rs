//! Drawn shape lifecycle
//!
//! Shapes move through `Created -> Selected -> Removed` and are never revived. At most one
//! shape is selected. Deleting prefers the selected shape and otherwise pops the most recently
//! drawn one. The registry never talks to a renderer; each add or removal yields an
//! [`OverlayIntent`] for whoever draws the map.

use crate::{DataError, DrawnShape, Region, Result};
use std::fmt;
use std::sync::Arc;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Opaque identity of a drawn shape, never reused within a registry
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct ShapeHandle(u64);

impl ShapeHandle {
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ShapeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "shape#{}", self.0)
    }
}

/// Instruction for the map renderer
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "intent", rename_all = "snake_case"))]
pub enum OverlayIntent {
    Add {
        handle: ShapeHandle,
        shape: DrawnShape,
    },
    Remove {
        handle: ShapeHandle,
    },
}

impl OverlayIntent {
    pub fn handle(&self) -> ShapeHandle {
        match self {
            Self::Add { handle, .. } | Self::Remove { handle } => *handle,
        }
    }
}

/// A registered shape
#[derive(Clone, Debug)]
pub struct Shape {
    handle: ShapeHandle,
    region: Arc<Region>,
    selected: bool,
    order: u64,
}

impl Shape {
    #[inline]
    pub fn handle(&self) -> ShapeHandle {
        self.handle
    }

    #[inline]
    pub fn region(&self) -> &Arc<Region> {
        &self.region
    }

    #[inline]
    pub fn is_selected(&self) -> bool {
        self.selected
    }

    /// Insertion index among all shapes ever added
    #[inline]
    pub fn order(&self) -> u64 {
        self.order
    }
}

/// Ordered collection of drawn shapes
#[derive(Clone, Debug, Default)]
pub struct ShapeRegistry {
    shapes: Vec<Shape>,
    next_order: u64,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl ShapeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a validated region
    pub fn add(&mut self, region: Region) -> (ShapeHandle, OverlayIntent) {
        let order = self.next_order;
        self.next_order += 1;
        let handle = ShapeHandle(order);
        let intent = OverlayIntent::Add {
            handle,
            shape: region.shape().clone(),
        };
        self.shapes.push(Shape {
            handle,
            region: Arc::new(region),
            selected: false,
            order,
        });
        tracing::debug!("Added {} ({} shapes)", handle, self.shapes.len());
        (handle, intent)
    }

    /// Validate drawn geometry and append it
    ///
    /// Degenerate geometry is rejected and the registry is left untouched.
    pub fn draw(&mut self, shape: DrawnShape) -> Result<(ShapeHandle, OverlayIntent)> {
        match Region::new(shape) {
            Ok(region) => Ok(self.add(region)),
            Err(err) => {
                tracing::warn!("Rejected drawn shape: {}", err);
                Err(err)
            }
        }
    }

    /// Mark a shape as the selected one, clearing any previous selection
    pub fn select(&mut self, handle: ShapeHandle) -> Result<()> {
        if !self.shapes.iter().any(|s| s.handle == handle) {
            return Err(DataError::UnknownShape(handle));
        }
        for shape in &mut self.shapes {
            shape.selected = shape.handle == handle;
        }
        Ok(())
    }

    /// Remove the selected shape, or the most recently added one when nothing is selected
    ///
    /// Returns `None` when the registry is empty.
    pub fn delete_active(&mut self) -> Option<OverlayIntent> {
        let removed = match self.shapes.iter().position(|s| s.selected) {
            Some(pos) => self.shapes.remove(pos),
            None => self.shapes.pop()?,
        };
        tracing::debug!(
            "Removed {}{} ({} shapes left)",
            removed.handle,
            if removed.selected { " (selected)" } else { "" },
            self.shapes.len()
        );
        Some(OverlayIntent::Remove {
            handle: removed.handle,
        })
    }

    /// Shapes in insertion order
    #[inline]
    pub fn shapes(&self) -> &[Shape] {
        &self.shapes
    }

    pub fn get(&self, handle: ShapeHandle) -> Option<&Shape> {
        self.shapes.iter().find(|s| s.handle == handle)
    }

    pub fn selected(&self) -> Option<&Shape> {
        self.shapes.iter().find(|s| s.selected)
    }

    /// Most recently added live shape
    pub fn latest(&self) -> Option<&Shape> {
        self.shapes.last()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.shapes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LatLng;

    fn circle(radius_m: f64) -> Region {
        Region::circle(LatLng::new(40.0, -77.0), radius_m).unwrap()
    }

    fn handles(registry: &ShapeRegistry) -> Vec<ShapeHandle> {
        registry.shapes().iter().map(Shape::handle).collect()
    }

    #[test]
    fn test_delete_without_selection_pops_latest() {
        let mut registry = ShapeRegistry::new();
        let (a, _) = registry.add(circle(10.0));
        let (b, _) = registry.add(circle(20.0));
        let (c, _) = registry.add(circle(30.0));

        let intent = registry.delete_active().unwrap();
        assert_eq!(intent, OverlayIntent::Remove { handle: c });
        assert_eq!(handles(&registry), vec![a, b]);
    }

    #[test]
    fn test_delete_selected_keeps_order() {
        let mut registry = ShapeRegistry::new();
        let (a, _) = registry.add(circle(10.0));
        let (b, _) = registry.add(circle(20.0));
        let (c, _) = registry.add(circle(30.0));

        registry.select(a).unwrap();
        let intent = registry.delete_active().unwrap();
        assert_eq!(intent.handle(), a);
        assert_eq!(handles(&registry), vec![b, c]);
        assert!(registry.selected().is_none());

        // Selection was consumed, so the next delete pops the latest
        assert_eq!(registry.delete_active().unwrap().handle(), c);
    }

    #[test]
    fn test_at_most_one_selected() {
        let mut registry = ShapeRegistry::new();
        let (a, _) = registry.add(circle(10.0));
        let (b, _) = registry.add(circle(20.0));
        registry.select(a).unwrap();
        registry.select(b).unwrap();
        let selected: Vec<_> = registry.shapes().iter().filter(|s| s.is_selected()).collect();
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].handle(), b);
    }

    #[test]
    fn test_delete_on_empty_is_noop() {
        let mut registry = ShapeRegistry::new();
        assert!(registry.delete_active().is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_removed_shape_cannot_be_selected() {
        let mut registry = ShapeRegistry::new();
        let (a, _) = registry.add(circle(10.0));
        registry.delete_active();
        assert!(matches!(registry.select(a), Err(DataError::UnknownShape(h)) if h == a));
    }

    #[test]
    fn test_handles_are_not_reused() {
        let mut registry = ShapeRegistry::new();
        let (a, _) = registry.add(circle(10.0));
        registry.delete_active();
        let (b, _) = registry.add(circle(10.0));
        assert_ne!(a, b);
        assert_eq!(registry.get(b).unwrap().order(), 1);
    }

    #[test]
    fn test_draw_rejects_degenerate_shape() {
        let mut registry = ShapeRegistry::new();
        let result = registry.draw(DrawnShape::Circle {
            center: LatLng::new(0.0, 0.0),
            radius_m: 0.0,
        });
        assert!(matches!(result, Err(DataError::MalformedGeometry(_))));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_add_yields_overlay_intent() {
        let mut registry = ShapeRegistry::new();
        let (handle, intent) = registry
            .draw(DrawnShape::Polygon {
                vertices: vec![
                    LatLng::new(0.0, 0.0),
                    LatLng::new(0.0, 1.0),
                    LatLng::new(1.0, 1.0),
                ],
            })
            .unwrap();
        match intent {
            OverlayIntent::Add { handle: h, shape } => {
                assert_eq!(h, handle);
                assert_eq!(shape.name(), "polygon");
            }
            other => panic!("unexpected intent {other:?}"),
        }
        assert_eq!(registry.latest().unwrap().handle(), handle);
    }
}
