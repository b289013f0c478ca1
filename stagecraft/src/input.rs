use std::collections::{BTreeMap, HashMap};

use crate::event::EventType;

/// Default bindings: arrow key codes to direction buttons.
pub fn default_keybinds() -> BTreeMap<u32, String> {
    [(37, "left"), (38, "up"), (39, "right"), (40, "down")]
        .into_iter()
        .map(|(code, name)| (code, name.to_string()))
        .collect()
}

/// Keybind table plus the state of every logical button.
///
/// Raw key codes map to named buttons; the engine exposes button state by
/// name only. Redundant state changes are swallowed so every transition is
/// reported exactly once.
#[derive(Clone, Debug, Default)]
pub struct InputState {
    keybinds: HashMap<u32, String>,
    buttons: HashMap<String, bool>,
    pointer_down: bool,
}

impl InputState {
    pub fn new(keybinds: &BTreeMap<u32, String>) -> Self {
        let mut input = Self::default();
        for (&code, name) in keybinds {
            input.keybind(code, name.clone());
        }
        input
    }

    /// Bind a raw key code to a button name. The button starts released.
    pub fn keybind(&mut self, code: u32, name: impl Into<String>) {
        let name = name.into();
        self.buttons.insert(name.clone(), false);
        self.keybinds.insert(code, name);
    }

    /// Drop a binding together with its button state.
    pub fn keyunbind(&mut self, code: u32) {
        if let Some(name) = self.keybinds.remove(&code) {
            self.buttons.remove(&name);
        }
    }

    /// Button bound to a raw key code.
    pub fn button_for(&self, code: u32) -> Option<&str> {
        self.keybinds.get(&code).map(String::as_str)
    }

    /// Whether the named button is held. Unknown names read as released.
    pub fn is_down(&self, name: &str) -> bool {
        self.buttons.get(name).copied().unwrap_or(false)
    }

    /// Record a button state. Returns `false` when the state was already `down`.
    pub fn set_button(&mut self, name: &str, down: bool) -> bool {
        if self.buttons.get(name) == Some(&down) {
            return false;
        }
        self.buttons.insert(name.to_string(), down);
        true
    }

    pub fn buttons(&self) -> impl Iterator<Item = (&str, bool)> {
        self.buttons.iter().map(|(name, &down)| (name.as_str(), down))
    }

    pub(crate) fn pointer_down(&self) -> bool {
        self.pointer_down
    }

    pub(crate) fn set_pointer_down(&mut self, down: bool) {
        self.pointer_down = down;
    }
}

/// Mouse button reported with a pointer event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PointerButton {
    Primary,
    Secondary,
    Middle,
    Other(u16),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PointerPhase {
    Down,
    Move,
    Up,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TouchPhase {
    Start,
    Move,
    End,
}

impl TouchPhase {
    pub fn event_type(self) -> EventType {
        match self {
            TouchPhase::Start => EventType::TouchStart,
            TouchPhase::Move => EventType::TouchMove,
            TouchPhase::End => EventType::TouchEnd,
        }
    }
}

impl From<PointerPhase> for TouchPhase {
    fn from(phase: PointerPhase) -> Self {
        match phase {
            PointerPhase::Down => TouchPhase::Start,
            PointerPhase::Move => TouchPhase::Move,
            PointerPhase::Up => TouchPhase::End,
        }
    }
}

/// One changed touch point, in page coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TouchPoint {
    pub identifier: i64,
    pub page_x: f32,
    pub page_y: f32,
}
