use std::collections::{BTreeMap, VecDeque};
use std::path::PathBuf;
use std::rc::Rc;
use std::time::{Duration, Instant};

use anyhow::Result;
use log::{debug, trace, warn};
use serde::{Deserialize, Serialize};

use crate::assets::{
    normalize_paths, Asset, AssetLoader, AssetSource, AssetTable, Batch, FileSource, LoadHandle,
    LoadOptions, LoadState,
};
use crate::error::{AssetError, EngineError, GraphError};
use crate::event::{invoke, listener, Event, EventBus, EventData, EventType, LoadPhase, Listener, Target};
use crate::graph::{SceneGraph, SceneRequest};
use crate::input::{default_keybinds, InputState, PointerButton, PointerPhase, TouchPhase, TouchPoint};
use crate::math::Vec2;
use crate::node::NodeId;
use crate::surface::{HeadlessSurface, Surface};

/// Longest delay that is still served by the next display frame instead of an explicit wait.
const FRAME_SLACK: Duration = Duration::from_millis(16);

/// Configuration values for the stage and runtime behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Logical stage width in pixels.
    pub width: f32,
    /// Logical stage height in pixels.
    pub height: f32,
    /// Logical-to-device pixel scale.
    pub scale: f32,
    /// Target frame rate.
    pub fps: u32,
    /// Raw key code to button name.
    pub keybinds: BTreeMap<u32, String>,
    /// Base directory for file-backed assets.
    pub asset_root: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            width: 320.0,
            height: 320.0,
            scale: 1.0,
            fps: 30,
            keybinds: default_keybinds(),
            asset_root: PathBuf::from("."),
        }
    }
}

impl EngineConfig {
    /// Parse a JSON config. Missing fields take their defaults.
    pub fn from_json(text: &str) -> Result<Self, EngineError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Override the logical stage size.
    #[must_use]
    pub fn with_size(mut self, width: f32, height: f32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    #[must_use]
    pub fn with_fps(mut self, fps: u32) -> Self {
        self.fps = fps;
        self
    }

    #[must_use]
    pub fn with_scale(mut self, scale: f32) -> Self {
        self.scale = scale;
        self
    }

    /// Add or replace a key binding.
    #[must_use]
    pub fn with_keybind(mut self, code: u32, name: impl Into<String>) -> Self {
        self.keybinds.insert(code, name.into());
        self
    }

    #[must_use]
    pub fn with_asset_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.asset_root = root.into();
        self
    }
}

/// How the host should request the next frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameSchedule {
    /// On the next display frame.
    Immediate,
    /// After waiting this long, then on the next display frame.
    After(Duration),
}

/// Source of time and frame waits for [`Engine::run`].
pub trait FrameClock {
    fn now(&mut self) -> Instant;
    fn wait(&mut self, schedule: FrameSchedule);
}

/// Clock that sleeps the current thread, treating a display frame as 1/60 s.
///
/// A display frame starts at each call to `now`, so `Immediate` only sleeps
/// whatever is left of it after the frame's work.
#[derive(Debug, Clone)]
pub struct ThreadClock {
    display_frame: Duration,
    frame_start: Option<Instant>,
}

impl ThreadClock {
    pub fn new() -> Self {
        Self {
            display_frame: Duration::from_micros(16_667),
            frame_start: None,
        }
    }

    /// How long `wait` sleeps when called at `at`.
    fn pause_for(&self, schedule: FrameSchedule, at: Instant) -> Duration {
        match schedule {
            FrameSchedule::Immediate => self.frame_start.map_or(self.display_frame, |start| {
                (start + self.display_frame).saturating_duration_since(at)
            }),
            FrameSchedule::After(delay) => delay,
        }
    }
}

impl Default for ThreadClock {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameClock for ThreadClock {
    fn now(&mut self) -> Instant {
        let now = Instant::now();
        self.frame_start = Some(now);
        now
    }

    fn wait(&mut self, schedule: FrameSchedule) {
        let pause = self.pause_for(schedule, Instant::now());
        if !pause.is_zero() {
            std::thread::sleep(pause);
        }
    }
}

/// Builds the scene shown while preloading.
pub type SceneFactory = Rc<dyn Fn(&mut SceneGraph, &EngineConfig) -> Result<NodeId>>;

/// Owns the scene graph, the scene stack and the frame loop.
///
/// Engine listeners receive `&mut Engine`; node listeners only see the graph
/// and change the scene stack through [`SceneGraph::request`].
pub struct Engine<S: Surface + 'static = HeadlessSurface> {
    config: EngineConfig,
    surface: S,
    graph: SceneGraph,
    bus: EventBus<Engine<S>>,
    scenes: Vec<NodeId>,
    root_scene: NodeId,
    running: bool,
    ready: bool,
    frame: u64,
    current_time: Option<Instant>,
    input: InputState,
    assets: AssetTable,
    loader: AssetLoader,
    batches: VecDeque<Batch>,
    preload_list: Vec<String>,
    loading_scene: Option<NodeId>,
    loading_factory: Option<SceneFactory>,
}

impl<S: Surface + 'static> Engine<S> {
    /// Create an engine loading assets from `config.asset_root`.
    ///
    /// Fails with [`EngineError::SurfaceNotReady`] if the surface is not initialised yet.
    pub fn new(config: EngineConfig, surface: S) -> Result<Self, EngineError> {
        let source = FileSource::new(config.asset_root.clone());
        Self::with_source(config, surface, Box::new(source))
    }

    /// Create an engine with a custom asset source.
    pub fn with_source(
        config: EngineConfig,
        surface: S,
        source: Box<dyn AssetSource>,
    ) -> Result<Self, EngineError> {
        if !surface.is_ready() {
            return Err(EngineError::SurfaceNotReady);
        }
        let loader = AssetLoader::spawn(source)?;
        let mut graph = SceneGraph::new();
        let root_scene = graph.create_scene();
        let input = InputState::new(&config.keybinds);

        let mut engine = Self {
            config,
            surface,
            graph,
            bus: EventBus::new(),
            scenes: Vec::new(),
            root_scene,
            running: false,
            ready: false,
            frame: 0,
            current_time: None,
            input,
            assets: AssetTable::default(),
            loader,
            batches: VecDeque::new(),
            preload_list: Vec::new(),
            loading_scene: None,
            loading_factory: None,
        };
        engine.apply_stage_size();
        engine.surface.mount(root_scene);
        engine.graph.set_scene_recursive(root_scene, Some(root_scene));
        engine.scenes.push(root_scene);
        Ok(engine)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn graph(&self) -> &SceneGraph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut SceneGraph {
        &mut self.graph
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut S {
        &mut self.surface
    }

    /// Number of frames processed since `start`.
    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Timestamp of the last processed frame, or of `start` before the first frame.
    pub fn current_time(&self) -> Option<Instant> {
        self.current_time
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn fps(&self) -> u32 {
        self.config.fps
    }

    pub fn set_fps(&mut self, fps: u32) {
        self.config.fps = fps;
    }

    // ---- events ----

    /// Register a listener closure on the engine and return its handle.
    pub fn on<F>(&mut self, kind: impl Into<EventType>, f: F) -> Listener<Self>
    where
        F: Fn(&mut Self, &Event) -> Result<()> + 'static,
    {
        let l = listener(f);
        self.bus.add_listener(kind.into(), l.clone());
        l
    }

    pub fn add_listener(&mut self, kind: impl Into<EventType>, l: Listener<Self>) {
        self.bus.add_listener(kind.into(), l);
    }

    pub fn remove_listener(&mut self, kind: impl Into<EventType>, l: &Listener<Self>) {
        self.bus.remove_listener(&kind.into(), l);
    }

    pub fn clear_listeners(&mut self, kind: Option<&EventType>) {
        self.bus.clear_listeners(kind);
    }

    pub fn set_handler<F>(&mut self, kind: impl Into<EventType>, f: F)
    where
        F: Fn(&mut Self, &Event) -> Result<()> + 'static,
    {
        self.bus.set_handler(kind.into(), listener(f));
    }

    /// Dispatch an event on the engine itself.
    pub fn dispatch(&mut self, event: &Event) -> Result<()> {
        let callbacks = self.bus.snapshot(&event.kind);
        if callbacks.is_empty() {
            return Ok(());
        }
        let mut event = event.clone();
        event.target = Some(Target::Engine);
        invoke(self, &callbacks, &event)
    }

    // ---- scene stack ----

    /// The permanent bottom scene.
    pub fn root_scene(&self) -> NodeId {
        self.root_scene
    }

    pub fn current_scene(&self) -> NodeId {
        self.scenes.last().copied().unwrap_or(self.root_scene)
    }

    /// Scenes on the stack, bottom first.
    pub fn scenes(&self) -> &[NodeId] {
        &self.scenes
    }

    /// Mount `scene` on top of the stack and make it current.
    pub fn push_scene(&mut self, scene: NodeId) -> Result<NodeId> {
        if !self.graph.contains(scene) {
            return Err(GraphError::UnknownNode(scene).into());
        }
        self.surface.mount(scene);
        let previous = self.current_scene();
        if !self.scenes.is_empty() {
            self.graph.dispatch(previous, &Event::new(EventType::Exit))?;
        }
        self.graph.set_scene_recursive(scene, Some(scene));
        self.scenes.push(scene);
        debug!("pushed scene {scene:?} (stack depth {})", self.scenes.len());
        self.graph.dispatch(scene, &Event::new(EventType::Enter))?;
        Ok(scene)
    }

    /// Unmount the current scene. The root scene is never popped; popping it returns it unchanged.
    pub fn pop_scene(&mut self) -> Result<NodeId> {
        let current = self.current_scene();
        if current == self.root_scene {
            warn!("refusing to pop the root scene");
            return Ok(current);
        }
        let Some(old) = self.scenes.pop() else {
            return Ok(current);
        };
        self.surface.unmount(old);
        self.graph.dispatch(old, &Event::new(EventType::Exit))?;
        let exposed = self.current_scene();
        debug!("popped scene {old:?}, now at {exposed:?}");
        self.graph.dispatch(exposed, &Event::new(EventType::Enter))?;
        Ok(old)
    }

    /// Pop the current scene, strip its children, then push `scene`.
    ///
    /// When only the root scene is left it stays on the stack, but its children are still stripped.
    pub fn replace_scene(&mut self, scene: NodeId) -> Result<NodeId> {
        let removed = self.pop_scene()?;
        while let Some(&child) = self.graph.children(removed).first() {
            self.graph.remove_child(removed, child)?;
        }
        self.push_scene(scene)
    }

    /// Remove `scene` wherever it is on the stack. The current scene is popped instead.
    /// The root scene is never removed.
    pub fn remove_scene(&mut self, scene: NodeId) -> Result<Option<NodeId>> {
        if scene == self.root_scene {
            warn!("refusing to remove the root scene");
            return Ok(None);
        }
        if self.current_scene() == scene {
            return self.pop_scene().map(Some);
        }
        let Some(index) = self.scenes.iter().position(|&s| s == scene) else {
            return Ok(None);
        };
        self.scenes.remove(index);
        self.surface.unmount(scene);
        debug!("removed scene {scene:?} from stack position {index}");
        Ok(Some(scene))
    }

    fn apply_scene_requests(&mut self) -> Result<()> {
        loop {
            let requests = self.graph.take_requests();
            if requests.is_empty() {
                return Ok(());
            }
            for request in requests {
                match request {
                    SceneRequest::Push(scene) => {
                        self.push_scene(scene)?;
                    }
                    SceneRequest::Pop => {
                        self.pop_scene()?;
                    }
                    SceneRequest::Replace(scene) => {
                        self.replace_scene(scene)?;
                    }
                    SceneRequest::Remove(scene) => {
                        self.remove_scene(scene)?;
                    }
                }
            }
        }
    }

    // ---- lifecycle ----

    /// Start the frame loop. With pending preloads a loading scene is shown
    /// until they finish; otherwise `load` fires immediately.
    pub fn start(&mut self) -> Result<()> {
        self.start_at(Instant::now())
    }

    /// Like [`Engine::start`], with the first frame's elapsed time measured from `now`.
    pub fn start_at(&mut self, now: Instant) -> Result<()> {
        if self.running {
            return Ok(());
        }
        self.running = true;
        self.ready = true;
        self.frame = 0;
        self.current_time = Some(now);
        debug!("engine started");

        if self.preload_list.is_empty() {
            self.dispatch(&Event::new(EventType::Load))?;
            return self.apply_scene_requests();
        }

        let paths = std::mem::take(&mut self.preload_list);
        let factory = self.loading_factory.clone();
        let loading = match factory {
            Some(factory) => factory(&mut self.graph, &self.config)?,
            None => default_loading_scene(&mut self.graph, &self.config)?,
        };
        self.push_scene(loading)?;
        self.loading_scene = Some(loading);

        let total = paths.len();
        self.emit_progress(LoadPhase::Preload, 0, total, None)?;
        let at = usize::from(self.batches.front().is_some_and(|b| b.in_flight.is_some()));
        self.batches.insert(at, Batch::new(LoadPhase::Preload, paths, true));
        self.pump_assets(false)?;
        self.apply_scene_requests()
    }

    /// Keep ticking, but make every tick a no-op.
    pub fn pause(&mut self) {
        debug!("engine paused");
        self.ready = false;
    }

    /// Leave the paused state. Has no effect once stopped.
    pub fn resume(&mut self) {
        if self.running && !self.ready {
            debug!("engine resumed");
            self.ready = true;
        }
    }

    pub fn stop(&mut self) {
        debug!("engine stopped");
        self.ready = false;
        self.running = false;
    }

    /// Process one frame at time `now`.
    ///
    /// Returns how the next frame should be scheduled, or `None` once stopped.
    pub fn tick(&mut self, now: Instant) -> Result<Option<FrameSchedule>> {
        if !self.running {
            return Ok(None);
        }
        if !self.ready {
            return Ok(Some(self.schedule_after(Duration::ZERO)));
        }

        self.pump_assets(false)?;

        let mut event = Event::new(EventType::EnterFrame);
        event.elapsed = self
            .current_time
            .map_or(Duration::ZERO, |t| now.saturating_duration_since(t));

        let scene = self.current_scene();
        let mut queue: VecDeque<NodeId> = self.graph.children(scene).iter().copied().collect();
        let mut visited = 0usize;
        while let Some(id) = queue.pop_front() {
            if self.graph.scene_of(id) != Some(scene) {
                continue;
            }
            self.graph.enter_frame(id, &event)?;
            self.graph.paint(id, &mut self.surface);
            queue.extend(self.graph.children(id).iter().copied());
            visited += 1;
        }
        self.graph.enter_frame(scene, &event)?;
        self.graph.paint(scene, &mut self.surface);
        self.dispatch(&event)?;
        self.dispatch(&Event::new(EventType::ExitFrame))?;

        self.frame += 1;
        self.current_time = Some(now);
        trace!("frame {} visited {visited} nodes", self.frame);
        self.apply_scene_requests()?;

        let work = Instant::now().saturating_duration_since(now);
        Ok(Some(self.schedule_after(work)))
    }

    fn schedule_after(&self, work: Duration) -> FrameSchedule {
        let budget = Duration::from_secs_f64(1.0 / f64::from(self.config.fps.max(1)));
        let delay = budget.saturating_sub(work);
        if self.config.fps >= 60 || delay <= FRAME_SLACK {
            FrameSchedule::Immediate
        } else {
            FrameSchedule::After(delay)
        }
    }

    /// Start the engine and drive it with `clock` until it is stopped.
    pub fn run(&mut self, clock: &mut impl FrameClock) -> Result<()> {
        self.start_at(clock.now())?;
        while let Some(schedule) = self.tick(clock.now())? {
            clock.wait(schedule);
        }
        Ok(())
    }

    // ---- stage size ----

    pub fn width(&self) -> f32 {
        self.config.width
    }

    pub fn height(&self) -> f32 {
        self.config.height
    }

    pub fn scale(&self) -> f32 {
        self.config.scale
    }

    pub fn set_width(&mut self, width: f32) -> Result<()> {
        self.config.width = width;
        self.resized()
    }

    pub fn set_height(&mut self, height: f32) -> Result<()> {
        self.config.height = height;
        self.resized()
    }

    pub fn set_scale(&mut self, scale: f32) -> Result<()> {
        self.config.scale = scale;
        self.resized()
    }

    fn apply_stage_size(&mut self) {
        let c = &self.config;
        self.surface.resize(c.width, c.height, c.scale);
    }

    fn resized(&mut self) -> Result<()> {
        self.apply_stage_size();
        self.dispatch_resize()
    }

    /// Dispatch `coreresize` on the engine and every scene on the stack.
    pub fn dispatch_resize(&mut self) -> Result<()> {
        let event = Event::new(EventType::CoreResize).with_data(EventData::Resize {
            width: self.config.width,
            height: self.config.height,
            scale: self.config.scale,
        });
        self.dispatch(&event)?;
        for scene in self.scenes.clone() {
            self.graph.dispatch(scene, &event)?;
        }
        self.apply_scene_requests()
    }

    // ---- input ----

    /// Bind a raw key code to a logical button.
    pub fn keybind(&mut self, code: u32, name: impl Into<String>) -> &mut Self {
        self.input.keybind(code, name);
        self
    }

    pub fn keyunbind(&mut self, code: u32) -> &mut Self {
        self.input.keyunbind(code);
        self
    }

    /// Whether the named logical button is held.
    pub fn input(&self, name: &str) -> bool {
        self.input.is_down(name)
    }

    pub fn input_state(&self) -> &InputState {
        &self.input
    }

    /// Set a button's state, dispatching the edge events when it actually changes.
    pub fn change_button_state(&mut self, button: &str, down: bool) -> Result<()> {
        if !self.input.set_button(button, down) {
            return Ok(());
        }
        let generic = if down {
            EventType::InputStart
        } else {
            EventType::InputEnd
        };
        self.dispatch(&Event::new(generic))?;

        let specific = Event::new(if down {
            EventType::ButtonDown(button.to_string())
        } else {
            EventType::ButtonUp(button.to_string())
        });
        self.dispatch(&specific)?;
        let scene = self.current_scene();
        self.graph.dispatch(scene, &specific)?;
        self.apply_scene_requests()
    }

    /// Feed a raw key transition. Returns whether a bound key was handled.
    pub fn handle_key(&mut self, code: u32, pressed: bool) -> Result<bool> {
        if !self.running || !self.ready {
            return Ok(false);
        }
        let Some(name) = self.input.button_for(code).map(str::to_owned) else {
            return Ok(false);
        };
        self.change_button_state(&name, pressed)?;
        Ok(true)
    }

    /// Feed a mouse event in page coordinates. Only the primary button starts a drag.
    pub fn handle_pointer(
        &mut self,
        phase: PointerPhase,
        button: PointerButton,
        page_x: f32,
        page_y: f32,
    ) -> Result<bool> {
        match phase {
            PointerPhase::Down => {
                if button != PointerButton::Primary {
                    return Ok(false);
                }
                self.input.set_pointer_down(true);
            }
            PointerPhase::Move => {
                if !self.input.pointer_down() {
                    return Ok(false);
                }
            }
            PointerPhase::Up => {
                if !self.input.pointer_down() {
                    return Ok(false);
                }
                self.input.set_pointer_down(false);
            }
        }
        self.dispatch_touch(phase.into(), page_x, page_y, None)?;
        Ok(true)
    }

    /// Feed changed touch points. Ignored while the engine is not running.
    pub fn handle_touch(&mut self, phase: TouchPhase, touches: &[TouchPoint]) -> Result<bool> {
        if !self.running {
            return Ok(false);
        }
        for touch in touches {
            self.dispatch_touch(phase, touch.page_x, touch.page_y, Some(touch.identifier))?;
        }
        Ok(true)
    }

    /// Convert page coordinates to logical stage coordinates.
    pub fn to_stage(&self, page_x: f32, page_y: f32) -> Vec2 {
        let origin = self.surface.stage_origin();
        Vec2::new(
            (page_x - origin.x) / self.config.scale,
            (page_y - origin.y) / self.config.scale,
        )
    }

    fn dispatch_touch(
        &mut self,
        phase: TouchPhase,
        page_x: f32,
        page_y: f32,
        identifier: Option<i64>,
    ) -> Result<()> {
        let p = self.to_stage(page_x, page_y);
        let event = Event::new(phase.event_type())
            .with_position(p.x, p.y)
            .with_data(EventData::Touch { identifier });
        let scene = self.current_scene();
        let target = self
            .surface
            .node_at(page_x, page_y)
            .filter(|&n| self.graph.contains(n))
            .or_else(|| self.graph.pick(scene, p.x, p.y))
            .unwrap_or(scene);
        self.graph.dispatch(target, &event)?;
        self.apply_scene_requests()
    }

    // ---- assets ----

    /// Register paths to load before `load` fires. Has no effect after `start`.
    pub fn preload<I, P>(&mut self, paths: I) -> &mut Self
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        self.preload_list.extend(normalize_paths(paths));
        self
    }

    /// Replace the scene shown while preloading.
    pub fn set_loading_scene<F>(&mut self, factory: F)
    where
        F: Fn(&mut SceneGraph, &EngineConfig) -> Result<NodeId> + 'static,
    {
        self.loading_factory = Some(Rc::new(factory));
    }

    /// Load assets in the background, one after another. Paths already loaded are skipped.
    pub fn load_assets<I, P>(&mut self, paths: I, options: LoadOptions) -> Result<LoadHandle>
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        let paths = normalize_paths(paths);
        if paths.is_empty() {
            return Ok(LoadHandle::completed());
        }
        let batch = Batch::new(LoadPhase::Runtime, paths, options.emit_progress);
        let handle = batch.handle.clone();
        self.batches.push_back(batch);
        self.pump_assets(false)?;
        self.apply_scene_requests()?;
        Ok(handle)
    }

    pub fn prefetch<I, P>(&mut self, paths: I, options: LoadOptions) -> Result<LoadHandle>
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        self.load_assets(paths, options)
    }

    /// Load only the paths that are not in the asset table yet.
    pub fn ensure_assets<I, P>(&mut self, paths: I, options: LoadOptions) -> Result<LoadHandle>
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        let missing: Vec<String> = normalize_paths(paths)
            .into_iter()
            .filter(|p| !self.assets.contains(p))
            .collect();
        self.load_assets(missing, options)
    }

    pub fn get_asset(&self, path: &str) -> Option<&Asset> {
        self.assets.get(path)
    }

    pub fn has_asset(&self, path: &str) -> bool {
        self.assets.contains(path)
    }

    pub fn unload_assets<I, P>(&mut self, paths: I)
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        for path in paths {
            let path: String = path.into();
            self.assets.remove(&path);
        }
    }

    pub fn assets(&self) -> &AssetTable {
        &self.assets
    }

    /// Wait until every queued asset batch has finished or failed.
    pub fn block_on_assets(&mut self) -> Result<()> {
        self.pump_assets(true)?;
        self.apply_scene_requests()
    }

    /// Advance the front batch: issue its next request and collect finished results.
    fn pump_assets(&mut self, block: bool) -> Result<()> {
        loop {
            let Some(batch) = self.batches.front_mut() else {
                return Ok(());
            };
            if batch.in_flight.is_none() {
                match batch.pending.pop_front() {
                    None => {
                        self.finish_batch(None)?;
                        continue;
                    }
                    Some(path) if self.assets.contains(&path) => {
                        batch.mark_loaded();
                        let (phase, loaded, total, emit) =
                            (batch.phase, batch.loaded, batch.total, batch.emit_progress);
                        if emit {
                            self.emit_progress(phase, loaded, total, Some(path))?;
                        }
                        continue;
                    }
                    Some(path) => {
                        if let Err(err) = self.loader.request(path.clone()) {
                            self.finish_batch(Some(err))?;
                            continue;
                        }
                        trace!("requested asset {path}");
                        batch.in_flight = Some(path);
                    }
                }
            }

            let next = if block {
                Some(self.loader.next_blocking()?)
            } else {
                self.loader.try_next()
            };
            let Some((path, result)) = next else {
                return Ok(());
            };
            self.complete_request(path, result)?;
        }
    }

    fn complete_request(&mut self, path: String, result: Result<Asset, AssetError>) -> Result<()> {
        let Some(batch) = self.batches.front_mut() else {
            return Ok(());
        };
        if batch.in_flight.as_deref() != Some(path.as_str()) {
            warn!("dropping unexpected asset result for {path}");
            return Ok(());
        }
        batch.in_flight = None;
        match result {
            Ok(asset) => {
                self.assets.insert(path.clone(), asset);
                batch.mark_loaded();
                let (phase, loaded, total, emit) =
                    (batch.phase, batch.loaded, batch.total, batch.emit_progress);
                if emit {
                    self.emit_progress(phase, loaded, total, Some(path))?;
                }
                Ok(())
            }
            Err(err) => {
                warn!("failed to load asset {path}: {err}");
                self.finish_batch(Some(err))
            }
        }
    }

    fn finish_batch(&mut self, error: Option<AssetError>) -> Result<()> {
        let Some(batch) = self.batches.pop_front() else {
            return Ok(());
        };
        match error {
            None => {
                debug!("{:?} batch of {} assets finished", batch.phase, batch.total);
                batch.handle.finish(LoadState::Done);
                if batch.phase == LoadPhase::Preload {
                    if let Some(loading) = self.loading_scene.take() {
                        self.remove_scene(loading)?;
                    }
                    self.dispatch(&Event::new(EventType::Load))?;
                }
                Ok(())
            }
            Some(err) => {
                let message = err.to_string();
                batch.handle.finish(LoadState::Failed(Rc::new(err)));
                self.dispatch(&Event::new(EventType::Error).with_data(EventData::Failure { message }))
            }
        }
    }

    /// Send `progress` to the current scene, then to the engine.
    fn emit_progress(
        &mut self,
        phase: LoadPhase,
        loaded: usize,
        total: usize,
        path: Option<String>,
    ) -> Result<()> {
        let path = path.filter(|_| phase == LoadPhase::Runtime);
        let event = Event::new(EventType::Progress).with_data(EventData::Progress {
            phase,
            loaded,
            total,
            path,
        });
        let scene = self.current_scene();
        self.graph.dispatch(scene, &event)?;
        self.dispatch(&event)
    }
}

/// A bare scene with a progress bar across the middle of the stage.
fn default_loading_scene(graph: &mut SceneGraph, config: &EngineConfig) -> Result<NodeId> {
    const BAR_HEIGHT: f32 = 4.0;
    let scene = graph.create_scene();
    let bar = graph.create_entity(0.0, BAR_HEIGHT);
    graph
        .spatial_mut(bar)?
        .move_to(0.0, (config.height - BAR_HEIGHT) / 2.0);
    graph.add_child(scene, bar)?;

    let width = config.width;
    graph.on(scene, EventType::Progress, move |graph, event| {
        if let EventData::Progress { loaded, total, .. } = &event.data {
            let fraction = if *total == 0 {
                1.0
            } else {
                *loaded as f32 / *total as f32
            };
            graph.spatial_mut(bar)?.width = width * fraction;
        }
        Ok(())
    })?;
    Ok(scene)
}
