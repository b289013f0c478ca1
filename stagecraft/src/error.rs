//! Typed errors for the scene graph, asset pipeline and engine setup.

use thiserror::Error;

use crate::node::NodeId;

/// Failures of structural scene-graph operations.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("node {0:?} does not exist in this graph")]
    UnknownNode(NodeId),
    #[error("cannot add {child:?} under {parent:?}: it is the parent or one of its ancestors")]
    WouldCycle { parent: NodeId, child: NodeId },
}

/// Failures while fetching or decoding an asset.
#[derive(Debug, Error)]
pub enum AssetError {
    #[error("failed to fetch asset {path}: {source}")]
    Fetch {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to decode image {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: image::ImageError,
    },
    #[error("asset {path} is not valid UTF-8 text")]
    NotText { path: String },
    #[error("asset loader is no longer running")]
    LoaderClosed,
}

/// Failures while constructing or configuring an engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("hosting surface is not ready; create the engine after the host has initialised it")]
    SurfaceNotReady,
    #[error("invalid engine configuration: {0}")]
    Config(#[from] serde_json::Error),
    #[error("failed to start the asset loader thread: {0}")]
    LoaderSpawn(#[from] std::io::Error),
}
