//! Scene nodes and their spatial state.

use glam::Affine2;

use crate::event::EventBus;
use crate::graph::SceneGraph;
use crate::math::{Transform2D, Vec2};
use crate::sprite::Sprite;
use crate::tilemap::TileMap;
use crate::timeline::Timeline;

/// Handle of a node inside a [`SceneGraph`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    /// Get the underlying integer ID (useful for debugging or host-side lookup tables).
    pub fn to_u32(self) -> u32 {
        self.0
    }
}

/// What a node is, beyond its shared spatial state.
pub enum NodeKind {
    /// Pure container.
    Group,
    /// Sized node used for collision geometry.
    Entity,
    /// Stage root managed by the engine's scene stack.
    Scene,
    /// Entity showing a frame of a sprite sheet.
    Sprite(Sprite),
    /// Entity holding multi-layer tile data.
    TileMap(TileMap),
}

impl NodeKind {
    pub fn is_scene(&self) -> bool {
        matches!(self, NodeKind::Scene)
    }

    /// Whether the node carries explicit box dimensions.
    pub fn is_entity(&self) -> bool {
        matches!(
            self,
            NodeKind::Entity | NodeKind::Sprite(_) | NodeKind::TileMap(_)
        )
    }
}

/// Animatable properties a timeline tween can drive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Property {
    X,
    Y,
    Rotation,
    ScaleX,
    ScaleY,
    Opacity,
}

/// Position, rotation, scale and paint attributes of a node.
///
/// Setting position, rotation or scale marks the node dirty, even when the
/// value does not change. Size and opacity are plain attributes read by the
/// renderer and carry no dirty tracking.
#[derive(Clone, Debug, PartialEq)]
pub struct Spatial {
    x: f32,
    y: f32,
    rotation: f32,
    scale_x: f32,
    scale_y: f32,
    pub opacity: f32,
    pub width: f32,
    pub height: f32,
    pub visible: bool,
    pub touch_enabled: bool,
    dirty: bool,
}

impl Spatial {
    pub fn new() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            rotation: 0.0,
            scale_x: 1.0,
            scale_y: 1.0,
            opacity: 1.0,
            width: 0.0,
            height: 0.0,
            visible: true,
            touch_enabled: true,
            dirty: true,
        }
    }

    pub fn x(&self) -> f32 {
        self.x
    }

    pub fn y(&self) -> f32 {
        self.y
    }

    pub fn rotation(&self) -> f32 {
        self.rotation
    }

    pub fn scale_x(&self) -> f32 {
        self.scale_x
    }

    pub fn scale_y(&self) -> f32 {
        self.scale_y
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn set_x(&mut self, x: f32) {
        self.x = x;
        self.dirty = true;
    }

    pub fn set_y(&mut self, y: f32) {
        self.y = y;
        self.dirty = true;
    }

    pub fn set_rotation(&mut self, degrees: f32) {
        self.rotation = degrees;
        self.dirty = true;
    }

    pub fn set_scale_x(&mut self, scale: f32) {
        self.scale_x = scale;
        self.dirty = true;
    }

    pub fn set_scale_y(&mut self, scale: f32) {
        self.scale_y = scale;
        self.dirty = true;
    }

    pub fn move_to(&mut self, x: f32, y: f32) {
        self.x = x;
        self.y = y;
        self.dirty = true;
    }

    pub fn move_by(&mut self, dx: f32, dy: f32) {
        self.x += dx;
        self.y += dy;
        self.dirty = true;
    }

    pub fn position(&self) -> Vec2 {
        Vec2::new(self.x, self.y)
    }

    pub fn transform(&self) -> Transform2D {
        Transform2D::new(
            self.position(),
            Vec2::new(self.scale_x, self.scale_y),
            self.rotation,
        )
    }

    pub fn get(&self, property: Property) -> f32 {
        match property {
            Property::X => self.x,
            Property::Y => self.y,
            Property::Rotation => self.rotation,
            Property::ScaleX => self.scale_x,
            Property::ScaleY => self.scale_y,
            Property::Opacity => self.opacity,
        }
    }

    pub fn set(&mut self, property: Property, value: f32) {
        match property {
            Property::X => self.set_x(value),
            Property::Y => self.set_y(value),
            Property::Rotation => self.set_rotation(value),
            Property::ScaleX => self.set_scale_x(value),
            Property::ScaleY => self.set_scale_y(value),
            Property::Opacity => self.opacity = value,
        }
    }

    /// Recompute the composed transform if dirty. Returns the new matrix when it changed.
    pub(crate) fn resolve(&mut self) -> Option<Affine2> {
        if !self.dirty {
            return None;
        }
        self.dirty = false;
        Some(self.transform().to_affine())
    }
}

impl Default for Spatial {
    fn default() -> Self {
        Self::new()
    }
}

/// Rendering attributes that map 1:1 onto the surface.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct Appearance {
    pub opacity: f32,
    pub width: f32,
    pub height: f32,
}

impl Appearance {
    pub(crate) fn of(spatial: &Spatial) -> Self {
        Self {
            opacity: spatial.opacity,
            width: spatial.width,
            height: spatial.height,
        }
    }
}

/// A node stored in the scene graph arena.
pub struct Node {
    pub(crate) kind: NodeKind,
    pub(crate) parent: Option<NodeId>,
    pub(crate) scene: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
    pub(crate) age: u64,
    pub(crate) spatial: Spatial,
    pub(crate) transform: Affine2,
    /// Opacity and size last pushed to the surface.
    pub(crate) painted: Option<Appearance>,
    pub(crate) bus: EventBus<SceneGraph>,
    pub(crate) timeline: Timeline,
}

impl Node {
    pub(crate) fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            parent: None,
            scene: None,
            children: Vec::new(),
            age: 0,
            spatial: Spatial::new(),
            transform: Affine2::IDENTITY,
            painted: None,
            bus: EventBus::new(),
            timeline: Timeline::new(),
        }
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn kind_mut(&mut self) -> &mut NodeKind {
        &mut self.kind
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn scene(&self) -> Option<NodeId> {
        self.scene
    }

    /// Children in z-order (insertion order).
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    /// Number of frames this node has been visited by the frame loop.
    pub fn age(&self) -> u64 {
        self.age
    }

    pub fn spatial(&self) -> &Spatial {
        &self.spatial
    }

    pub fn spatial_mut(&mut self) -> &mut Spatial {
        &mut self.spatial
    }

    /// Last resolved transform; stale while the node is dirty.
    pub fn transform(&self) -> Affine2 {
        self.transform
    }

    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    pub fn timeline_mut(&mut self) -> &mut Timeline {
        &mut self.timeline
    }

    pub fn events_mut(&mut self) -> &mut EventBus<SceneGraph> {
        &mut self.bus
    }
}
