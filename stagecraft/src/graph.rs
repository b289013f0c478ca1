//! Node arena and tree operations.
//!
//! All nodes live in a [`SceneGraph`] and are addressed by [`NodeId`]. The
//! child list is the only owning relation; `parent` and `scene` are plain
//! back-links. A node stays in the arena after it is detached and is only
//! freed by [`SceneGraph::destroy`].

use std::collections::{HashMap, VecDeque};

use glam::Affine2;

use crate::error::GraphError;
use crate::event::{invoke, listener, Event, EventType, Listener, Target};
use crate::math::{Rect, Vec2};
use crate::node::{Appearance, Node, NodeId, NodeKind, Spatial};
use crate::sprite::Sprite;
use crate::surface::Surface;
use crate::tilemap::{TileHits, TileMap, TileQuery};
use crate::timeline::Timeline;

/// Scene-stack change requested from inside a node listener.
///
/// Node listeners only see the graph, so they queue the change and the engine
/// applies it once the current frame or input dispatch has finished.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SceneRequest {
    Push(NodeId),
    Pop,
    Replace(NodeId),
    Remove(NodeId),
}

/// Arena of scene nodes.
pub struct SceneGraph {
    next_id: u32,
    nodes: HashMap<NodeId, Node>,
    requests: Vec<SceneRequest>,
}

impl SceneGraph {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            nodes: HashMap::new(),
            requests: Vec::new(),
        }
    }

    fn spawn(&mut self, kind: NodeKind) -> NodeId {
        while self.nodes.contains_key(&NodeId(self.next_id)) {
            self.advance_id();
        }
        let id = NodeId(self.next_id);
        self.advance_id();
        self.nodes.insert(id, Node::new(kind));
        id
    }

    /// Ids wrap past `u32::MAX` back to 1; zero is never handed out.
    fn advance_id(&mut self) {
        self.next_id = self.next_id.checked_add(1).unwrap_or(1);
    }

    fn spawn_sized(&mut self, kind: NodeKind, width: f32, height: f32) -> NodeId {
        let id = self.spawn(kind);
        if let Some(node) = self.nodes.get_mut(&id) {
            node.spatial.width = width;
            node.spatial.height = height;
        }
        id
    }

    pub fn create_group(&mut self) -> NodeId {
        self.spawn(NodeKind::Group)
    }

    pub fn create_entity(&mut self, width: f32, height: f32) -> NodeId {
        self.spawn_sized(NodeKind::Entity, width, height)
    }

    pub fn create_scene(&mut self) -> NodeId {
        self.spawn(NodeKind::Scene)
    }

    pub fn create_sprite(&mut self, width: f32, height: f32) -> NodeId {
        self.spawn_sized(NodeKind::Sprite(Sprite::new()), width, height)
    }

    /// Create a tile map node sized to `cols x rows` tiles.
    pub fn create_tilemap(&mut self, tile_width: u32, tile_height: u32, cols: usize, rows: usize) -> NodeId {
        self.insert_tilemap(TileMap::new(tile_width, tile_height, cols, rows))
    }

    /// Wrap an already-built map (for example one loaded with [`TileMap::from_json`]) in a node.
    pub fn insert_tilemap(&mut self, map: TileMap) -> NodeId {
        let (width, height) = map.pixel_size();
        self.spawn_sized(NodeKind::TileMap(map), width, height)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Number of live nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&id)
    }

    fn get(&self, id: NodeId) -> Result<&Node, GraphError> {
        self.nodes.get(&id).ok_or(GraphError::UnknownNode(id))
    }

    fn get_mut(&mut self, id: NodeId) -> Result<&mut Node, GraphError> {
        self.nodes.get_mut(&id).ok_or(GraphError::UnknownNode(id))
    }

    pub fn spatial(&self, id: NodeId) -> Result<&Spatial, GraphError> {
        Ok(&self.get(id)?.spatial)
    }

    pub fn spatial_mut(&mut self, id: NodeId) -> Result<&mut Spatial, GraphError> {
        Ok(&mut self.get_mut(id)?.spatial)
    }

    /// The node's timeline, for queueing animation.
    pub fn tl(&mut self, id: NodeId) -> Result<&mut Timeline, GraphError> {
        Ok(&mut self.get_mut(id)?.timeline)
    }

    pub fn sprite_mut(&mut self, id: NodeId) -> Option<&mut Sprite> {
        match &mut self.nodes.get_mut(&id)?.kind {
            NodeKind::Sprite(sprite) => Some(sprite),
            _ => None,
        }
    }

    pub fn tilemap(&self, id: NodeId) -> Option<&TileMap> {
        match &self.nodes.get(&id)?.kind {
            NodeKind::TileMap(map) => Some(map),
            _ => None,
        }
    }

    /// Edit a tile map in place. The node's box is re-synced to the map's pixel size afterwards.
    pub fn edit_tilemap<R>(&mut self, id: NodeId, f: impl FnOnce(&mut TileMap) -> R) -> Option<R> {
        let node = self.nodes.get_mut(&id)?;
        let NodeKind::TileMap(map) = &mut node.kind else {
            return None;
        };
        let out = f(map);
        let (width, height) = map.pixel_size();
        node.spatial.width = width;
        node.spatial.height = height;
        Some(out)
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(&id).and_then(|n| n.parent)
    }

    /// Children of `id` in z-order; empty for unknown nodes.
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.nodes
            .get(&id)
            .map(|n| n.children.as_slice())
            .unwrap_or(&[])
    }

    /// The mounted scene this node belongs to, if any.
    pub fn scene_of(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(&id).and_then(|n| n.scene)
    }

    /// `id` itself followed by its ancestors up to the root.
    fn lineage(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(Some(id), move |&n| self.parent(n))
    }

    /// Attach `child` as the last child of `parent`, detaching it from its current parent first.
    pub fn add_child(&mut self, parent: NodeId, child: NodeId) -> anyhow::Result<()> {
        self.get(child)?;
        self.get(parent)?;
        if self.lineage(parent).any(|n| n == child) {
            return Err(GraphError::WouldCycle { parent, child }.into());
        }

        if let Some(old) = self.parent(child) {
            self.remove_child(old, child)?;
        }

        let scene = {
            let p = self.get_mut(parent)?;
            p.children.push(child);
            p.scene
        };
        self.get_mut(child)?.parent = Some(parent);
        self.set_scene_recursive(child, scene);

        self.dispatch(child, &Event::new(EventType::Added))?;
        if scene.is_some() {
            self.dispatch(child, &Event::new(EventType::AddedToScene))?;
        }
        self.dispatch(parent, &Event::new(EventType::ChildAdded))
    }

    /// Detach `child` from `parent`. Returns `None` when it is not one of `parent`'s children.
    ///
    /// The detached subtree loses its scene back-link.
    pub fn remove_child(&mut self, parent: NodeId, child: NodeId) -> anyhow::Result<Option<NodeId>> {
        let Some(p) = self.nodes.get_mut(&parent) else {
            return Ok(None);
        };
        let Some(index) = p.children.iter().position(|&c| c == child) else {
            return Ok(None);
        };
        p.children.remove(index);

        let had_scene = {
            let c = self.get_mut(child)?;
            c.parent = None;
            c.scene.is_some()
        };
        self.set_scene_recursive(child, None);

        self.dispatch(child, &Event::new(EventType::Removed))?;
        if had_scene {
            self.dispatch(child, &Event::new(EventType::RemovedFromScene))?;
        }
        self.dispatch(parent, &Event::new(EventType::ChildRemoved))?;
        Ok(Some(child))
    }

    /// Detach the node from its parent, if it has one.
    pub fn remove(&mut self, id: NodeId) -> anyhow::Result<()> {
        if let Some(parent) = self.parent(id) {
            self.remove_child(parent, id)?;
        }
        Ok(())
    }

    /// Detach the node and free it together with its whole subtree.
    pub fn destroy(&mut self, id: NodeId) -> anyhow::Result<()> {
        self.remove(id)?;
        let mut stack = vec![id];
        while let Some(n) = stack.pop() {
            if let Some(node) = self.nodes.remove(&n) {
                stack.extend(node.children);
            }
        }
        Ok(())
    }

    pub(crate) fn set_scene_recursive(&mut self, id: NodeId, scene: Option<NodeId>) {
        let mut stack = vec![id];
        while let Some(n) = stack.pop() {
            if let Some(node) = self.nodes.get_mut(&n) {
                node.scene = scene;
                stack.extend(node.children.iter().copied());
            }
        }
    }

    /// Register a listener closure and return its handle (needed for removal).
    pub fn on<F>(&mut self, id: NodeId, kind: impl Into<EventType>, f: F) -> Result<Listener<SceneGraph>, GraphError>
    where
        F: Fn(&mut SceneGraph, &Event) -> anyhow::Result<()> + 'static,
    {
        let l = listener(f);
        self.add_listener(id, kind, l.clone())?;
        Ok(l)
    }

    pub fn add_listener(&mut self, id: NodeId, kind: impl Into<EventType>, l: Listener<SceneGraph>) -> Result<(), GraphError> {
        self.get_mut(id)?.bus.add_listener(kind.into(), l);
        Ok(())
    }

    pub fn remove_listener(&mut self, id: NodeId, kind: impl Into<EventType>, l: &Listener<SceneGraph>) {
        if let Some(node) = self.nodes.get_mut(&id) {
            node.bus.remove_listener(&kind.into(), l);
        }
    }

    pub fn clear_listeners(&mut self, id: NodeId, kind: Option<&EventType>) {
        if let Some(node) = self.nodes.get_mut(&id) {
            node.bus.clear_listeners(kind);
        }
    }

    /// Install the single-slot handler for `kind` on a node.
    pub fn set_handler<F>(&mut self, id: NodeId, kind: impl Into<EventType>, f: F) -> Result<(), GraphError>
    where
        F: Fn(&mut SceneGraph, &Event) -> anyhow::Result<()> + 'static,
    {
        self.get_mut(id)?.bus.set_handler(kind.into(), listener(f));
        Ok(())
    }

    pub fn clear_handler(&mut self, id: NodeId, kind: &EventType) {
        if let Some(node) = self.nodes.get_mut(&id) {
            node.bus.clear_handler(kind);
        }
    }

    /// Dispatch `event` on a node: its handler first, then its listeners.
    ///
    /// Dispatching on an unknown node is a no-op. Listener errors propagate.
    pub fn dispatch(&mut self, id: NodeId, event: &Event) -> anyhow::Result<()> {
        let Some(node) = self.nodes.get(&id) else {
            return Ok(());
        };
        let callbacks = node.bus.snapshot(&event.kind);
        if callbacks.is_empty() {
            return Ok(());
        }
        let mut event = event.clone();
        event.target = Some(Target::Node(id));
        invoke(self, &callbacks, &event)
    }

    /// Per-frame processing of one node: age, `ENTER_FRAME` dispatch, then its animation.
    ///
    /// Timeline callbacks run last, once the tick that completed them is over.
    pub(crate) fn enter_frame(&mut self, id: NodeId, event: &Event) -> anyhow::Result<()> {
        self.get_mut(id)?.age += 1;
        self.dispatch(id, event)?;

        let Some(node) = self.nodes.get_mut(&id) else {
            return Ok(());
        };
        if let NodeKind::Sprite(sprite) = &mut node.kind {
            sprite.update();
        }
        let endings = node.timeline.tick(&mut node.spatial);
        for ending in endings {
            let spatial = self.nodes.get_mut(&id).map(|n| &mut n.spatial);
            if let Some(callback) = ending.settle(spatial) {
                callback(self, id)?;
            }
        }
        Ok(())
    }

    /// Recompute the node's transform if dirty. Returns the new matrix when it changed.
    pub fn resolve(&mut self, id: NodeId) -> Option<Affine2> {
        let node = self.nodes.get_mut(&id)?;
        let transform = node.spatial.resolve()?;
        node.transform = transform;
        Some(transform)
    }

    /// Push one node's visibility, changed opacity or size, and (if dirty) transform to the surface.
    pub(crate) fn paint(&mut self, id: NodeId, surface: &mut dyn Surface) {
        let Some(node) = self.nodes.get_mut(&id) else {
            return;
        };
        surface.apply_visibility(id, node.spatial.visible);
        let now = Appearance::of(&node.spatial);
        let before = node.painted.replace(now);
        if before.map(|b| b.opacity) != Some(now.opacity) {
            surface.apply_opacity(id, now.opacity);
        }
        if before.map(|b| (b.width, b.height)) != Some((now.width, now.height)) {
            surface.apply_size(id, now.width, now.height);
        }
        if let Some(transform) = self.resolve(id) {
            surface.apply_transform(id, transform);
        }
    }

    /// Paint a node and then its subtree, depth-first.
    ///
    /// Invisible nodes are still resolved and still recurse into their children.
    pub fn update(&mut self, id: NodeId, surface: &mut dyn Surface) {
        let mut stack = vec![id];
        while let Some(n) = stack.pop() {
            self.paint(n, surface);
            stack.extend(self.children(n).iter().rev().copied());
        }
    }

    /// Nodes under `root` in level order, root excluded.
    pub fn descendants(&self, root: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut queue: VecDeque<NodeId> = self.children(root).iter().copied().collect();
        while let Some(n) = queue.pop_front() {
            out.push(n);
            queue.extend(self.children(n).iter().copied());
        }
        out
    }

    /// Sum of the node's and its ancestors' positions. Rotation and scale are ignored.
    pub fn world_position(&self, id: NodeId) -> Vec2 {
        self.lineage(id)
            .filter_map(|n| self.nodes.get(&n))
            .fold(Vec2::ZERO, |acc, node| acc + node.spatial.position())
    }

    /// Axis-aligned box of a node in logical stage space.
    pub fn logical_rect(&self, id: NodeId) -> Option<Rect> {
        let node = self.nodes.get(&id)?;
        let p = self.world_position(id);
        Some(Rect::new(p.x, p.y, node.spatial.width, node.spatial.height))
    }

    /// Strict AABB overlap between two nodes' logical boxes.
    pub fn intersect(&self, a: NodeId, b: NodeId) -> bool {
        match (self.logical_rect(a), self.logical_rect(b)) {
            (Some(a), Some(b)) => a.intersects(&b),
            _ => false,
        }
    }

    /// Whether the centres of two boxes are at most `distance` apart.
    pub fn within(&self, a: NodeId, b: NodeId, distance: f32) -> bool {
        match (self.logical_rect(a), self.logical_rect(b)) {
            (Some(a), Some(b)) => a.center().distance(b.center()) <= distance,
            _ => false,
        }
    }

    pub fn hit_test(&self, id: NodeId, x: f32, y: f32) -> bool {
        self.logical_rect(id).is_some_and(|r| r.contains(x, y))
    }

    /// Test an entity's box against a tile map node.
    pub fn intersect_tiles(&self, map: NodeId, entity: NodeId, query: &TileQuery) -> TileHits {
        match (self.tilemap(map), self.logical_rect(entity)) {
            (Some(tiles), Some(rect)) => tiles.intersect_rect(self.world_position(map), rect, query),
            _ => TileHits::default(),
        }
    }

    /// Topmost visible, touch-enabled entity under a stage point.
    ///
    /// Later siblings and deeper nodes are on top. Hidden nodes hide their
    /// whole subtree; a node with touch disabled can still have hittable children.
    pub fn pick(&self, root: NodeId, x: f32, y: f32) -> Option<NodeId> {
        let node = self.nodes.get(&root)?;
        if !node.spatial.visible {
            return None;
        }
        if let Some(hit) = node.children.iter().rev().find_map(|&c| self.pick(c, x, y)) {
            return Some(hit);
        }
        (node.kind.is_entity() && node.spatial.touch_enabled && self.hit_test(root, x, y)).then_some(root)
    }

    /// Queue a scene-stack change for the engine to apply.
    pub fn request(&mut self, request: SceneRequest) {
        self.requests.push(request);
    }

    pub(crate) fn take_requests(&mut self) -> Vec<SceneRequest> {
        std::mem::take(&mut self.requests)
    }
}

impl Default for SceneGraph {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::easing::Easing;
    use crate::surface::HeadlessSurface;
    use std::cell::RefCell;
    use std::rc::Rc;

    type Log = Rc<RefCell<Vec<String>>>;

    fn record(graph: &mut SceneGraph, id: NodeId, kinds: &[EventType], log: &Log, tag: &str) {
        for kind in kinds {
            let log = log.clone();
            let line = format!("{tag}:{kind}");
            graph
                .on(id, kind.clone(), move |_, _| {
                    log.borrow_mut().push(line.clone());
                    Ok(())
                })
                .unwrap();
        }
    }

    const TREE_EVENTS: [EventType; 4] = [
        EventType::Added,
        EventType::ChildAdded,
        EventType::Removed,
        EventType::ChildRemoved,
    ];

    #[test]
    fn test_reparenting_detaches_from_old_parent_first() {
        let mut g = SceneGraph::new();
        let (p1, p2, n) = (g.create_group(), g.create_group(), g.create_entity(4.0, 4.0));
        g.add_child(p1, n).unwrap();

        let log: Log = Rc::default();
        record(&mut g, p1, &TREE_EVENTS, &log, "p1");
        record(&mut g, p2, &TREE_EVENTS, &log, "p2");
        record(&mut g, n, &TREE_EVENTS, &log, "n");

        g.add_child(p2, n).unwrap();
        assert_eq!(g.parent(n), Some(p2));
        assert!(g.children(p1).is_empty());
        assert_eq!(g.children(p2), &[n]);
        assert_eq!(
            *log.borrow(),
            vec!["n:removed", "p1:childremoved", "n:added", "p2:childadded"]
        );
    }

    #[test]
    fn test_scene_propagates_through_prebuilt_subtree() {
        let mut g = SceneGraph::new();
        let scene = g.create_scene();
        g.set_scene_recursive(scene, Some(scene));

        let branch = g.create_group();
        let leaf = g.create_entity(1.0, 1.0);
        let deeper = g.create_entity(1.0, 1.0);
        g.add_child(branch, leaf).unwrap();
        g.add_child(leaf, deeper).unwrap();
        assert_eq!(g.scene_of(deeper), None);

        let log: Log = Rc::default();
        record(&mut g, branch, &[EventType::AddedToScene], &log, "branch");
        record(&mut g, leaf, &[EventType::AddedToScene], &log, "leaf");

        g.add_child(scene, branch).unwrap();
        for n in [branch, leaf, deeper] {
            assert_eq!(g.scene_of(n), Some(scene));
        }
        assert_eq!(*log.borrow(), vec!["branch:addedtoscene"]);

        let late = g.create_entity(1.0, 1.0);
        g.add_child(deeper, late).unwrap();
        assert_eq!(g.scene_of(late), Some(scene));
    }

    #[test]
    fn test_detach_clears_scene_for_whole_subtree() {
        let mut g = SceneGraph::new();
        let scene = g.create_scene();
        g.set_scene_recursive(scene, Some(scene));
        let (a, b) = (g.create_group(), g.create_entity(1.0, 1.0));
        g.add_child(a, b).unwrap();
        g.add_child(scene, a).unwrap();

        let log: Log = Rc::default();
        record(&mut g, a, &[EventType::RemovedFromScene], &log, "a");
        assert_eq!(g.remove_child(scene, a).unwrap(), Some(a));
        assert_eq!(g.scene_of(a), None);
        assert_eq!(g.scene_of(b), None);
        assert_eq!(*log.borrow(), vec!["a:removedfromscene"]);

        assert_eq!(g.remove_child(scene, a).unwrap(), None);
    }

    #[test]
    fn test_cycles_are_rejected() {
        let mut g = SceneGraph::new();
        let (a, b) = (g.create_group(), g.create_group());
        g.add_child(a, b).unwrap();
        let err = g.add_child(b, a).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<GraphError>(),
            Some(GraphError::WouldCycle { .. })
        ));
        assert!(g.add_child(a, a).is_err());
        assert_eq!(g.parent(a), None);
    }

    #[test]
    fn test_resolve_clears_dirty_and_paints_once() {
        let mut g = SceneGraph::new();
        let root = g.create_group();
        let child = g.create_entity(2.0, 2.0);
        g.add_child(root, child).unwrap();
        g.spatial_mut(root).unwrap().visible = false;

        let mut surface = HeadlessSurface::new();
        g.update(root, &mut surface);
        assert_eq!(surface.transform_updates(), 2);
        assert_eq!(surface.is_visible(root), Some(false));
        assert_eq!(surface.is_visible(child), Some(true));

        g.update(root, &mut surface);
        assert_eq!(surface.transform_updates(), 2);

        g.spatial_mut(child).unwrap().set_rotation(0.0);
        g.update(root, &mut surface);
        assert_eq!(surface.transform_updates(), 3);
        assert!(!g.spatial(child).unwrap().is_dirty());
    }

    #[test]
    fn test_opacity_and_size_reach_surface_when_changed() {
        let mut g = SceneGraph::new();
        let dot = g.create_entity(4.0, 3.0);
        let mut surface = HeadlessSurface::new();
        g.paint(dot, &mut surface);
        assert_eq!(surface.opacity_of(dot), Some(1.0));
        assert_eq!(surface.size_of(dot), Some((4.0, 3.0)));
        assert_eq!(surface.style_updates(), 2);

        g.paint(dot, &mut surface);
        assert_eq!(surface.style_updates(), 2);

        g.tl(dot).unwrap().fade_to(0.0, 2, Easing::Linear);
        g.spatial_mut(dot).unwrap().width = 50.0;
        let frame = Event::new(EventType::EnterFrame);
        for _ in 0..2 {
            g.enter_frame(dot, &frame).unwrap();
            g.paint(dot, &mut surface);
        }
        assert_eq!(surface.opacity_of(dot), Some(0.0));
        assert_eq!(surface.size_of(dot), Some((50.0, 3.0)));
        assert_eq!(surface.style_updates(), 5);
    }

    #[test]
    fn test_geometry_sums_ancestor_positions_only() {
        let mut g = SceneGraph::new();
        let group = g.create_group();
        let a = g.create_entity(10.0, 10.0);
        let b = g.create_entity(10.0, 10.0);
        g.add_child(group, a).unwrap();
        g.spatial_mut(group).unwrap().move_to(5.0, 5.0);
        g.spatial_mut(group).unwrap().set_scale_x(3.0);
        g.spatial_mut(b).unwrap().move_to(15.0, 5.0);

        assert_eq!(g.logical_rect(a), Some(Rect::new(5.0, 5.0, 10.0, 10.0)));
        assert!(!g.intersect(a, b));
        assert!(!g.intersect(b, a));

        g.spatial_mut(b).unwrap().move_by(-1.0, 0.0);
        assert!(g.intersect(a, b));
        assert!(g.intersect(b, a));

        assert!(g.within(a, b, 9.0));
        assert!(!g.within(a, b, 8.9));
        assert!(g.hit_test(a, 15.0, 15.0));
        assert!(!g.hit_test(a, 15.1, 15.0));
    }

    #[test]
    fn test_pick_prefers_topmost_touchable_entity() {
        let mut g = SceneGraph::new();
        let scene = g.create_scene();
        let back = g.create_entity(20.0, 20.0);
        let front = g.create_entity(20.0, 20.0);
        g.add_child(scene, back).unwrap();
        g.add_child(scene, front).unwrap();

        assert_eq!(g.pick(scene, 5.0, 5.0), Some(front));
        g.spatial_mut(front).unwrap().touch_enabled = false;
        assert_eq!(g.pick(scene, 5.0, 5.0), Some(back));
        g.spatial_mut(back).unwrap().visible = false;
        assert_eq!(g.pick(scene, 5.0, 5.0), None);
        assert_eq!(g.pick(scene, 50.0, 50.0), None);
    }

    #[test]
    fn test_enter_frame_runs_listeners_before_timeline() {
        let mut g = SceneGraph::new();
        let n = g.create_entity(1.0, 1.0);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = seen.clone();
        g.on(n, EventType::EnterFrame, move |graph, event| {
            let id = event.target_node().unwrap();
            s.borrow_mut().push(graph.spatial(id)?.x());
            Ok(())
        })
        .unwrap();
        let done = Rc::new(RefCell::new(0));
        let d = done.clone();
        g.tl(n)
            .unwrap()
            .move_to(10.0, 0.0, 2, Easing::Linear)
            .then(move |graph, id| {
                *d.borrow_mut() += 1;
                graph.spatial_mut(id)?.set_y(7.0);
                Ok(())
            });

        let event = Event::new(EventType::EnterFrame);
        for _ in 0..3 {
            g.enter_frame(n, &event).unwrap();
        }
        assert_eq!(*seen.borrow(), vec![0.0, 5.0, 10.0]);
        assert_eq!(*done.borrow(), 1);
        assert_eq!(g.spatial(n).unwrap().y(), 7.0);
        assert_eq!(g.node(n).unwrap().age(), 3);
    }

    #[test]
    fn test_joined_callbacks_wait_for_longest_action() {
        let mut g = SceneGraph::new();
        let n = g.create_group();
        let log: Log = Rc::default();
        let (a, b) = (log.clone(), log.clone());
        g.tl(n)
            .unwrap()
            .delay(4)
            .and()
            .then(move |_, _| {
                a.borrow_mut().push("a".into());
                Ok(())
            })
            .and()
            .delay(6)
            .and()
            .then(move |_, _| {
                b.borrow_mut().push("b".into());
                Ok(())
            });

        let event = Event::new(EventType::EnterFrame);
        for _ in 0..5 {
            g.enter_frame(n, &event).unwrap();
        }
        assert!(log.borrow().is_empty());
        g.enter_frame(n, &event).unwrap();
        assert_eq!(*log.borrow(), vec!["a", "b"]);
        assert!(g.tl(n).unwrap().is_empty());
    }

    #[test]
    fn test_callback_sees_later_tweens_unsnapped() {
        let mut g = SceneGraph::new();
        let n = g.create_group();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = seen.clone();
        g.tl(n)
            .unwrap()
            .fade_to(0.25, 0, Easing::Linear)
            .and()
            .then(move |graph, id| {
                let spatial = graph.spatial(id)?;
                s.borrow_mut().push((spatial.opacity, spatial.rotation()));
                Ok(())
            })
            .and()
            .rotate_to(450.0, 1, Easing::Linear);

        g.enter_frame(n, &Event::new(EventType::EnterFrame)).unwrap();
        assert_eq!(*seen.borrow(), vec![(0.25, 450.0)]);
        assert_eq!(g.spatial(n).unwrap().rotation(), 90.0);
    }

    #[test]
    fn test_listener_removing_itself_still_completes_pass() {
        let mut g = SceneGraph::new();
        let n = g.create_group();
        let count = Rc::new(RefCell::new(0));
        let slot: Rc<RefCell<Option<Listener<SceneGraph>>>> = Rc::default();

        let (c, s) = (count.clone(), slot.clone());
        let l = g
            .on(n, "ping", move |graph, event| {
                *c.borrow_mut() += 1;
                if let Some(me) = s.borrow().as_ref() {
                    graph.remove_listener(event.target_node().unwrap(), "ping", me);
                }
                Ok(())
            })
            .unwrap();
        *slot.borrow_mut() = Some(l);
        let c2 = count.clone();
        g.on(n, "ping", move |_, _| {
            *c2.borrow_mut() += 10;
            Ok(())
        })
        .unwrap();

        g.dispatch(n, &Event::new("ping".into())).unwrap();
        g.dispatch(n, &Event::new("ping".into())).unwrap();
        assert_eq!(*count.borrow(), 21);
    }

    #[test]
    fn test_wrapped_ids_skip_live_nodes() {
        let mut g = SceneGraph::new();
        let (first, second) = (g.create_group(), g.create_group());
        assert_eq!((first, second), (NodeId(1), NodeId(2)));

        g.next_id = u32::MAX;
        assert_eq!(g.create_group(), NodeId(u32::MAX));
        let wrapped = g.create_group();
        assert_eq!(wrapped, NodeId(3));
        assert_eq!(g.len(), 4);
        assert!(g.node(first).is_some() && g.node(second).is_some());

        g.destroy(first).unwrap();
        g.next_id = 1;
        assert_eq!(g.create_group(), first);
    }

    #[test]
    fn test_destroy_frees_subtree() {
        let mut g = SceneGraph::new();
        let (a, b, c) = (g.create_group(), g.create_group(), g.create_group());
        g.add_child(a, b).unwrap();
        g.add_child(b, c).unwrap();
        g.destroy(b).unwrap();
        assert!(g.children(a).is_empty());
        assert!(!g.contains(b));
        assert!(!g.contains(c));
        assert_eq!(g.len(), 1);
    }

    #[test]
    fn test_tilemap_query_uses_node_positions() {
        let mut g = SceneGraph::new();
        let map = g.create_tilemap(16, 16, 0, 0);
        g.edit_tilemap(map, |m| {
            m.add_layer(
                "ground",
                crate::tilemap::LayerOptions::default()
                    .with_data(vec![vec![0, 1], vec![1, 0]])
                    .collidable(),
            );
        })
        .unwrap();
        assert_eq!(g.spatial(map).unwrap().width, 32.0);

        let hero = g.create_entity(8.0, 8.0);
        g.spatial_mut(hero).unwrap().move_to(20.0, 4.0);
        assert!(g.intersect_tiles(map, hero, &TileQuery::new()).hit);
        g.spatial_mut(hero).unwrap().move_to(4.0, 4.0);
        assert!(!g.intersect_tiles(map, hero, &TileQuery::new()).hit);

        g.spatial_mut(map).unwrap().move_to(-16.0, 0.0);
        assert!(g.intersect_tiles(map, hero, &TileQuery::new()).hit);
    }
}
