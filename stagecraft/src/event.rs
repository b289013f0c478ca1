//! Event records and the per-object listener registry.
//!
//! Every node and the engine own an [`EventBus`]. Dispatch is two-tier: an
//! optional single-slot handler for the event type runs first, then every
//! registered listener for that type, most recently added first.

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use crate::node::NodeId;

/// Kind of an event. Built-in kinds map to the lowercase names used by the
/// event taxonomy (`"enterframe"`, `"touchstart"`, ...).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum EventType {
    Load,
    Error,
    CoreResize,
    Progress,
    EnterFrame,
    ExitFrame,
    Enter,
    Exit,
    ChildAdded,
    Added,
    AddedToScene,
    ChildRemoved,
    Removed,
    RemovedFromScene,
    TouchStart,
    TouchMove,
    TouchEnd,
    InputStart,
    InputChange,
    InputEnd,
    /// `<name>buttondown` for a logical button.
    ButtonDown(String),
    /// `<name>buttonup` for a logical button.
    ButtonUp(String),
    /// Application-defined event type.
    Custom(String),
}

impl EventType {
    /// Canonical string form of this event type.
    pub fn name(&self) -> String {
        match self {
            EventType::ButtonDown(button) => format!("{button}buttondown"),
            EventType::ButtonUp(button) => format!("{button}buttonup"),
            EventType::Custom(name) => name.clone(),
            other => other.builtin_name().unwrap_or_default().to_string(),
        }
    }

    fn builtin_name(&self) -> Option<&'static str> {
        Some(match self {
            EventType::Load => "load",
            EventType::Error => "error",
            EventType::CoreResize => "coreresize",
            EventType::Progress => "progress",
            EventType::EnterFrame => "enterframe",
            EventType::ExitFrame => "exitframe",
            EventType::Enter => "enter",
            EventType::Exit => "exit",
            EventType::ChildAdded => "childadded",
            EventType::Added => "added",
            EventType::AddedToScene => "addedtoscene",
            EventType::ChildRemoved => "childremoved",
            EventType::Removed => "removed",
            EventType::RemovedFromScene => "removedfromscene",
            EventType::TouchStart => "touchstart",
            EventType::TouchMove => "touchmove",
            EventType::TouchEnd => "touchend",
            EventType::InputStart => "inputstart",
            EventType::InputChange => "inputchange",
            EventType::InputEnd => "inputend",
            EventType::ButtonDown(_) | EventType::ButtonUp(_) | EventType::Custom(_) => {
                return None
            }
        })
    }

    /// Parse a string-typed event name. Unknown names become [`EventType::Custom`].
    pub fn parse(name: &str) -> Self {
        const BUILTIN: [EventType; 20] = [
            EventType::Load,
            EventType::Error,
            EventType::CoreResize,
            EventType::Progress,
            EventType::EnterFrame,
            EventType::ExitFrame,
            EventType::Enter,
            EventType::Exit,
            EventType::ChildAdded,
            EventType::Added,
            EventType::AddedToScene,
            EventType::ChildRemoved,
            EventType::Removed,
            EventType::RemovedFromScene,
            EventType::TouchStart,
            EventType::TouchMove,
            EventType::TouchEnd,
            EventType::InputStart,
            EventType::InputChange,
            EventType::InputEnd,
        ];
        if let Some(kind) = BUILTIN
            .iter()
            .find(|kind| kind.builtin_name() == Some(name))
        {
            return kind.clone();
        }
        if let Some(button) = name.strip_suffix("buttondown").filter(|b| !b.is_empty()) {
            return EventType::ButtonDown(button.to_string());
        }
        if let Some(button) = name.strip_suffix("buttonup").filter(|b| !b.is_empty()) {
            return EventType::ButtonUp(button.to_string());
        }
        EventType::Custom(name.to_string())
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

impl From<&str> for EventType {
    fn from(name: &str) -> Self {
        EventType::parse(name)
    }
}

/// The object an event was dispatched on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Target {
    Node(NodeId),
    Engine,
}

/// Which loading path produced a progress event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadPhase {
    Preload,
    Runtime,
}

/// Fields carried by specific event types.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum EventData {
    #[default]
    None,
    Progress {
        phase: LoadPhase,
        loaded: usize,
        total: usize,
        path: Option<String>,
    },
    Resize {
        width: f32,
        height: f32,
        scale: f32,
    },
    Touch {
        identifier: Option<i64>,
    },
    Failure {
        message: String,
    },
}

/// A single dispatched event. Created per dispatch and not retained.
#[derive(Clone, Debug)]
pub struct Event {
    pub kind: EventType,
    /// Set by the dispatcher before listeners run.
    pub target: Option<Target>,
    pub x: f32,
    pub y: f32,
    pub local_x: f32,
    pub local_y: f32,
    /// Time since the previous frame (frame events only).
    pub elapsed: Duration,
    pub data: EventData,
}

impl Event {
    pub fn new(kind: EventType) -> Self {
        Self {
            kind,
            target: None,
            x: 0.0,
            y: 0.0,
            local_x: 0.0,
            local_y: 0.0,
            elapsed: Duration::ZERO,
            data: EventData::None,
        }
    }

    #[must_use]
    pub fn with_data(mut self, data: EventData) -> Self {
        self.data = data;
        self
    }

    #[must_use]
    pub fn with_position(mut self, x: f32, y: f32) -> Self {
        self.x = x;
        self.y = y;
        self.local_x = x;
        self.local_y = y;
        self
    }

    /// Target node, if the event was dispatched on a node.
    pub fn target_node(&self) -> Option<NodeId> {
        match self.target {
            Some(Target::Node(id)) => Some(id),
            _ => None,
        }
    }
}

/// A registered event callback. `C` is the context the callback may mutate:
/// the scene graph for node listeners, the engine for engine listeners.
///
/// Listener identity (for de-duplication and removal) is the `Rc` pointer.
pub type Listener<C> = Rc<dyn Fn(&mut C, &Event) -> anyhow::Result<()>>;

/// Wrap a closure as a [`Listener`].
pub fn listener<C, F>(f: F) -> Listener<C>
where
    F: Fn(&mut C, &Event) -> anyhow::Result<()> + 'static,
{
    Rc::new(f)
}

/// Per-object listener registry.
pub struct EventBus<C> {
    handlers: HashMap<EventType, Listener<C>>,
    listeners: HashMap<EventType, Vec<Listener<C>>>,
}

impl<C> EventBus<C> {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            listeners: HashMap::new(),
        }
    }

    /// Register a listener. It is placed in front of existing listeners so the
    /// most recently added listener fires first. Adding the same `Rc` twice is a no-op.
    pub fn add_listener(&mut self, kind: EventType, listener: Listener<C>) {
        let list = self.listeners.entry(kind).or_default();
        if list.iter().any(|existing| Rc::ptr_eq(existing, &listener)) {
            return;
        }
        list.insert(0, listener);
    }

    /// Remove the first listener identical to `listener`. No-op when absent.
    pub fn remove_listener(&mut self, kind: &EventType, listener: &Listener<C>) {
        if let Some(list) = self.listeners.get_mut(kind) {
            if let Some(index) = list.iter().position(|l| Rc::ptr_eq(l, listener)) {
                list.remove(index);
            }
        }
    }

    /// Clear the listeners of one type, or of every type when `kind` is `None`.
    pub fn clear_listeners(&mut self, kind: Option<&EventType>) {
        match kind {
            Some(kind) => {
                self.listeners.remove(kind);
            }
            None => self.listeners.clear(),
        }
    }

    /// Install the single-slot handler for an event type, replacing any previous one.
    pub fn set_handler(&mut self, kind: EventType, handler: Listener<C>) {
        self.handlers.insert(kind, handler);
    }

    pub fn clear_handler(&mut self, kind: &EventType) {
        self.handlers.remove(kind);
    }

    pub fn has_listeners(&self, kind: &EventType) -> bool {
        self.handlers.contains_key(kind)
            || self.listeners.get(kind).is_some_and(|list| !list.is_empty())
    }

    pub fn listener_count(&self, kind: &EventType) -> usize {
        self.listeners.get(kind).map_or(0, Vec::len)
    }

    /// Snapshot of the callbacks to invoke for `kind`, in invocation order.
    ///
    /// Dispatch iterates over this copy, so listeners added or removed while
    /// it runs only take effect on the next dispatch.
    pub fn snapshot(&self, kind: &EventType) -> Vec<Listener<C>> {
        let mut out = Vec::new();
        if let Some(handler) = self.handlers.get(kind) {
            out.push(Rc::clone(handler));
        }
        if let Some(list) = self.listeners.get(kind) {
            out.extend(list.iter().cloned());
        }
        out
    }
}

impl<C> Default for EventBus<C> {
    fn default() -> Self {
        Self::new()
    }
}

/// Invoke a snapshot of callbacks on `ctx`. The first error aborts the pass.
pub(crate) fn invoke<C>(ctx: &mut C, callbacks: &[Listener<C>], event: &Event) -> anyhow::Result<()> {
    for callback in callbacks {
        callback(ctx, event)?;
    }
    Ok(())
}
