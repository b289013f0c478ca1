//! Per-node action scheduler.
//!
//! A timeline is a queue of segments. Each segment holds actions that run in
//! lockstep: every unfinished action of the head segment advances exactly one
//! frame per tick. When all of them are finished the segment completes, its
//! end effects (tween end values and `then` callbacks) run interleaved in
//! declaration order and it is dequeued (or recycled to the tail when
//! looping). Segments behind the head are never touched.
//!
//! ```rust,no_run
//! # use stagecraft::{SceneGraph, Easing};
//! # fn demo(graph: &mut SceneGraph, node: stagecraft::NodeId) -> anyhow::Result<()> {
//! graph
//!     .tl(node)?
//!     .move_to(100.0, 0.0, 10, Easing::Linear)
//!     .and()
//!     .fade_to(0.0, 10, Easing::EaseOutQuad)
//!     .delay(5)
//!     .then(|_graph, _node| Ok(()));
//! # Ok(())
//! # }
//! ```

use std::collections::VecDeque;
use std::rc::Rc;

use crate::easing::Easing;
use crate::graph::SceneGraph;
use crate::node::{NodeId, Property, Spatial};

/// Callback run when a `then` action completes.
pub type Callback = Rc<dyn Fn(&mut SceneGraph, NodeId) -> anyhow::Result<()>>;

#[derive(Clone, Debug, PartialEq)]
enum Goal {
    Absolute(Vec<f32>),
    Relative(Vec<f32>),
}

#[derive(Clone)]
struct Tween {
    properties: Vec<Property>,
    goal: Goal,
    easing: Easing,
    /// Values captured on the first tick; `None` until the action starts.
    from: Option<Vec<f32>>,
    /// Absolute target, resolved together with `from`.
    to: Vec<f32>,
}

impl Tween {
    fn new(properties: Vec<Property>, goal: Goal, easing: Easing) -> Self {
        Self {
            properties,
            goal,
            easing,
            from: None,
            to: Vec::new(),
        }
    }

    fn capture(&mut self, spatial: &Spatial) {
        let from: Vec<f32> = self.properties.iter().map(|&p| spatial.get(p)).collect();
        self.to = match &self.goal {
            Goal::Absolute(values) => values.clone(),
            Goal::Relative(deltas) => from.iter().zip(deltas).map(|(f, d)| f + d).collect(),
        };
        self.from = Some(from);
    }

    fn step(&mut self, spatial: &mut Spatial, t: f32) {
        if self.from.is_none() {
            self.capture(spatial);
        }
        let eased = self.easing.apply(t.clamp(0.0, 1.0));
        if let Some(from) = &self.from {
            for ((&property, start), end) in self.properties.iter().zip(from).zip(&self.to) {
                spatial.set(property, start + (end - start) * eased);
            }
        }
    }

    fn snap(&mut self, spatial: &mut Spatial) {
        if self.from.is_none() {
            self.capture(spatial);
        }
        for (&property, &end) in self.properties.iter().zip(&self.to) {
            let value = if property == Property::Rotation {
                end.rem_euclid(360.0)
            } else {
                end
            };
            spatial.set(property, value);
        }
    }
}

#[derive(Clone)]
enum EndEffect {
    Snap(Tween),
    Call(Callback),
}

/// One end effect of a completed segment.
pub(crate) struct Ending(EndEffect);

impl Ending {
    /// Apply a tween's end value to `spatial`, or hand back the callback to run.
    ///
    /// With no `spatial` (the node is gone) tween end values are dropped.
    pub(crate) fn settle(self, spatial: Option<&mut Spatial>) -> Option<Callback> {
        match self.0 {
            EndEffect::Snap(mut tween) => {
                if let Some(spatial) = spatial {
                    tween.snap(spatial);
                }
                None
            }
            EndEffect::Call(callback) => Some(callback),
        }
    }
}

#[derive(Clone)]
enum ActionKind {
    Delay,
    Callback(Callback),
    Tween(Tween),
}

#[derive(Clone)]
struct Action {
    duration: u32,
    remaining: u32,
    kind: ActionKind,
}

impl Action {
    fn new(duration: u32, kind: ActionKind) -> Self {
        Self {
            duration,
            remaining: duration,
            kind,
        }
    }

    fn is_finished(&self) -> bool {
        self.remaining == 0
    }

    fn advance(&mut self, spatial: &mut Spatial) {
        if self.remaining == 0 {
            return;
        }
        if let ActionKind::Tween(tween) = &mut self.kind {
            let elapsed = self.duration - self.remaining + 1;
            let t = elapsed as f32 / self.duration.max(1) as f32;
            tween.step(spatial, t);
        }
        self.remaining -= 1;
    }

    fn ending(&self) -> Option<Ending> {
        match &self.kind {
            ActionKind::Tween(tween) => Some(Ending(EndEffect::Snap(tween.clone()))),
            ActionKind::Callback(callback) => Some(Ending(EndEffect::Call(Rc::clone(callback)))),
            ActionKind::Delay => None,
        }
    }

    fn reset(&mut self) {
        self.remaining = self.duration;
        if let ActionKind::Tween(tween) = &mut self.kind {
            tween.from = None;
            tween.to.clear();
        }
    }
}

type Segment = Vec<Action>;

/// Ordered queue of concurrently-running action segments owned by one node.
#[derive(Clone, Default)]
pub struct Timeline {
    queue: VecDeque<Segment>,
    looping: bool,
    join_next: bool,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every pending action. Values already applied by a running tween stay as they are.
    pub fn clear(&mut self) -> &mut Self {
        self.queue.clear();
        self.join_next = false;
        self
    }

    /// Recycle completed segments to the tail of the queue instead of discarding them.
    pub fn loop_forever(&mut self) -> &mut Self {
        self.looping = true;
        self
    }

    pub fn unloop(&mut self) -> &mut Self {
        self.looping = false;
        self
    }

    /// Make the next queued action join the most recently queued segment.
    ///
    /// On an empty queue the request stays pending until a segment exists to join.
    pub fn and(&mut self) -> &mut Self {
        self.join_next = true;
        self
    }

    /// Consume `frames` ticks without any effect.
    pub fn delay(&mut self, frames: u32) -> &mut Self {
        self.push(Action::new(frames, ActionKind::Delay))
    }

    /// Run `callback` after a single tick.
    pub fn then<F>(&mut self, callback: F) -> &mut Self
    where
        F: Fn(&mut SceneGraph, NodeId) -> anyhow::Result<()> + 'static,
    {
        self.push(Action::new(1, ActionKind::Callback(Rc::new(callback))))
    }

    pub fn move_to(&mut self, x: f32, y: f32, frames: u32, easing: Easing) -> &mut Self {
        self.tween(
            vec![Property::X, Property::Y],
            Goal::Absolute(vec![x, y]),
            frames,
            easing,
        )
    }

    /// Move by a delta measured from wherever the node is when this action starts.
    pub fn move_by(&mut self, dx: f32, dy: f32, frames: u32, easing: Easing) -> &mut Self {
        self.tween(
            vec![Property::X, Property::Y],
            Goal::Relative(vec![dx, dy]),
            frames,
            easing,
        )
    }

    pub fn scale_to(&mut self, sx: f32, sy: f32, frames: u32, easing: Easing) -> &mut Self {
        self.tween(
            vec![Property::ScaleX, Property::ScaleY],
            Goal::Absolute(vec![sx, sy]),
            frames,
            easing,
        )
    }

    /// Rotate to `degrees`. The final value is normalised into `[0, 360)`.
    pub fn rotate_to(&mut self, degrees: f32, frames: u32, easing: Easing) -> &mut Self {
        self.tween(
            vec![Property::Rotation],
            Goal::Absolute(vec![degrees]),
            frames,
            easing,
        )
    }

    pub fn fade_to(&mut self, opacity: f32, frames: u32, easing: Easing) -> &mut Self {
        self.tween(
            vec![Property::Opacity],
            Goal::Absolute(vec![opacity]),
            frames,
            easing,
        )
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Number of queued segments.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_looping(&self) -> bool {
        self.looping
    }

    /// Remaining frames of each action in the head segment, in declaration order.
    pub fn head_remaining(&self) -> Option<Vec<u32>> {
        self.queue
            .front()
            .map(|segment| segment.iter().map(|a| a.remaining).collect())
    }

    fn tween(&mut self, properties: Vec<Property>, goal: Goal, frames: u32, easing: Easing) -> &mut Self {
        self.push(Action::new(
            frames,
            ActionKind::Tween(Tween::new(properties, goal, easing)),
        ))
    }

    fn push(&mut self, action: Action) -> &mut Self {
        match self.queue.back_mut() {
            Some(segment) if self.join_next => {
                segment.push(action);
                self.join_next = false;
            }
            _ => self.queue.push_back(vec![action]),
        }
        self
    }

    /// Advance the head segment by one frame.
    ///
    /// When the segment completes, its end effects are returned in declaration
    /// order for the caller to settle one by one.
    pub(crate) fn tick(&mut self, spatial: &mut Spatial) -> Vec<Ending> {
        let Some(head) = self.queue.front_mut() else {
            return Vec::new();
        };
        for action in head.iter_mut() {
            action.advance(spatial);
        }
        if !head.iter().all(Action::is_finished) {
            return Vec::new();
        }

        let Some(mut segment) = self.queue.pop_front() else {
            return Vec::new();
        };
        let endings = segment.iter().filter_map(Action::ending).collect();
        if self.looping {
            segment.iter_mut().for_each(Action::reset);
            self.queue.push_back(segment);
        }
        endings
    }
}
