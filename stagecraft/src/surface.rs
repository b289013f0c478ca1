//! Boundary to whatever actually paints the stage.
//!
//! The engine never draws. It tells a [`Surface`] which scenes are mounted,
//! which nodes are visible and what their resolved transforms are, and asks it
//! for stage geometry when normalising pointer input.

use std::collections::HashMap;

use glam::Affine2;

use crate::math::Vec2;
use crate::node::NodeId;

/// Rendering collaborator driven by the engine.
pub trait Surface {
    /// Whether the host has finished initialising the surface.
    fn is_ready(&self) -> bool;

    fn mount(&mut self, scene: NodeId);

    fn unmount(&mut self, scene: NodeId);

    fn apply_visibility(&mut self, node: NodeId, visible: bool);

    /// Called when a node's opacity differs from what was last applied.
    fn apply_opacity(&mut self, node: NodeId, opacity: f32);

    /// Called when a node's box size differs from what was last applied.
    fn apply_size(&mut self, node: NodeId, width: f32, height: f32);

    /// Called only when a node's transform was recomputed.
    fn apply_transform(&mut self, node: NodeId, transform: Affine2);

    /// Stage size in logical pixels and the logical-to-device scale.
    fn resize(&mut self, width: f32, height: f32, scale: f32);

    /// Page-space position of the stage's top-left corner.
    fn stage_origin(&self) -> Vec2;

    /// Node painted at a page-space point, if the surface can tell.
    fn node_at(&self, _page_x: f32, _page_y: f32) -> Option<NodeId> {
        None
    }
}

/// Surface that paints nothing and records what it was told.
#[derive(Debug, Clone)]
pub struct HeadlessSurface {
    ready: bool,
    origin: Vec2,
    mounted: Vec<NodeId>,
    transforms: HashMap<NodeId, Affine2>,
    visibility: HashMap<NodeId, bool>,
    opacity: HashMap<NodeId, f32>,
    sizes: HashMap<NodeId, (f32, f32)>,
    transform_updates: usize,
    style_updates: usize,
    size: (f32, f32, f32),
}

impl HeadlessSurface {
    pub fn new() -> Self {
        Self {
            ready: true,
            origin: Vec2::ZERO,
            mounted: Vec::new(),
            transforms: HashMap::new(),
            visibility: HashMap::new(),
            opacity: HashMap::new(),
            sizes: HashMap::new(),
            transform_updates: 0,
            style_updates: 0,
            size: (0.0, 0.0, 1.0),
        }
    }

    /// A surface that reports itself as not yet initialised.
    pub fn unready() -> Self {
        Self {
            ready: false,
            ..Self::new()
        }
    }

    #[must_use]
    pub fn with_origin(mut self, x: f32, y: f32) -> Self {
        self.origin = Vec2::new(x, y);
        self
    }

    /// Scenes currently mounted, in mount order.
    pub fn mounted(&self) -> &[NodeId] {
        &self.mounted
    }

    pub fn transform_of(&self, node: NodeId) -> Option<Affine2> {
        self.transforms.get(&node).copied()
    }

    pub fn is_visible(&self, node: NodeId) -> Option<bool> {
        self.visibility.get(&node).copied()
    }

    pub fn opacity_of(&self, node: NodeId) -> Option<f32> {
        self.opacity.get(&node).copied()
    }

    pub fn size_of(&self, node: NodeId) -> Option<(f32, f32)> {
        self.sizes.get(&node).copied()
    }

    /// Total number of opacity and size applications received.
    pub fn style_updates(&self) -> usize {
        self.style_updates
    }

    /// Total number of transform applications received.
    pub fn transform_updates(&self) -> usize {
        self.transform_updates
    }

    /// Last `(width, height, scale)` passed to [`Surface::resize`].
    pub fn size(&self) -> (f32, f32, f32) {
        self.size
    }
}

impl Default for HeadlessSurface {
    fn default() -> Self {
        Self::new()
    }
}

impl Surface for HeadlessSurface {
    fn is_ready(&self) -> bool {
        self.ready
    }

    fn mount(&mut self, scene: NodeId) {
        self.mounted.retain(|&s| s != scene);
        self.mounted.push(scene);
    }

    fn unmount(&mut self, scene: NodeId) {
        self.mounted.retain(|&s| s != scene);
    }

    fn apply_visibility(&mut self, node: NodeId, visible: bool) {
        self.visibility.insert(node, visible);
    }

    fn apply_opacity(&mut self, node: NodeId, opacity: f32) {
        self.style_updates += 1;
        self.opacity.insert(node, opacity);
    }

    fn apply_size(&mut self, node: NodeId, width: f32, height: f32) {
        self.style_updates += 1;
        self.sizes.insert(node, (width, height));
    }

    fn apply_transform(&mut self, node: NodeId, transform: Affine2) {
        self.transform_updates += 1;
        self.transforms.insert(node, transform);
    }

    fn resize(&mut self, width: f32, height: f32, scale: f32) {
        self.size = (width, height, scale);
    }

    fn stage_origin(&self) -> Vec2 {
        self.origin
    }
}
