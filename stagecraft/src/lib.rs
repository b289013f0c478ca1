//! Stagecraft - a lightweight 2D scene-graph engine.
//!
//! Nodes live in a [`SceneGraph`] arena and are driven by an [`Engine`] that
//! owns a stack of scenes, a frame loop, input mapping and asset loading.
//! Painting is left to a [`Surface`] implementation supplied by the host.

pub mod assets;
pub mod easing;
pub mod engine;
pub mod error;
pub mod event;
pub mod graph;
pub mod grid;
pub mod input;
pub mod math;
pub mod node;
pub mod sprite;
pub mod surface;
pub mod tilemap;
pub mod timeline;

pub use crate::assets::{Asset, AssetKind, AssetSource, FileSource, LoadHandle, LoadOptions, LoadState, MemorySource};
pub use crate::easing::Easing;
pub use crate::engine::{Engine, EngineConfig, FrameClock, FrameSchedule, SceneFactory, ThreadClock};
pub use crate::error::{AssetError, EngineError, GraphError};
pub use crate::event::{listener, Event, EventData, EventType, LoadPhase, Listener, Target};
pub use crate::graph::{SceneGraph, SceneRequest};
pub use crate::grid::{Grid, GridCoord};
pub use crate::input::{InputState, PointerButton, PointerPhase, TouchPhase, TouchPoint};
pub use crate::math::{Rect, Transform2D, Vec2};
pub use crate::node::{NodeId, NodeKind, Property, Spatial};
pub use crate::sprite::{AnimateOptions, Frame, Sprite};
pub use crate::surface::{HeadlessSurface, Surface};
pub use crate::tilemap::{LayerOptions, SolidRule, TileHit, TileHits, TileLayer, TileMap, TileQuery, Tileset};
pub use crate::timeline::Timeline;
