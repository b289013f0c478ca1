//! Multi-layer tile maps and AABB-vs-grid collision queries.
//!
//! Rendering is left to the surface; a [`TileMap`] only holds the data needed
//! to draw (atlas geometry per layer) and to answer collision queries.
//!
//! The collision query is a static sweep of the cells an axis-aligned box
//! covers on the current frame. Fast movers can tunnel through thin solid
//! regions between frames.

use std::collections::HashSet;
use std::rc::Rc;

use serde::Deserialize;

use crate::grid::{Grid, GridCoord};
use crate::math::{Rect, Vec2};

/// Decides which tile indices block movement on a layer.
#[derive(Clone, Default)]
pub enum SolidRule {
    /// Any index greater than zero is solid.
    #[default]
    NonZero,
    Indices(HashSet<i32>),
    Predicate(Rc<dyn Fn(i32) -> bool>),
}

impl SolidRule {
    pub fn indices(indices: impl IntoIterator<Item = i32>) -> Self {
        SolidRule::Indices(indices.into_iter().collect())
    }

    pub fn predicate(f: impl Fn(i32) -> bool + 'static) -> Self {
        SolidRule::Predicate(Rc::new(f))
    }

    pub fn is_solid(&self, index: i32) -> bool {
        match self {
            SolidRule::NonZero => index > 0,
            SolidRule::Indices(set) => set.contains(&index),
            SolidRule::Predicate(f) => f(index),
        }
    }
}

impl std::fmt::Debug for SolidRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SolidRule::NonZero => f.write_str("NonZero"),
            SolidRule::Indices(set) => f.debug_tuple("Indices").field(set).finish(),
            SolidRule::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

/// Tileset image assigned to a layer, plus the atlas geometry derived from it.
#[derive(Clone, Debug, PartialEq)]
pub struct Tileset {
    /// Asset path of the image.
    pub path: String,
    pub image_width: u32,
    pub image_height: u32,
    /// Number of tiles per atlas row/column; zero when the atlas can't be computed.
    pub columns: u32,
    pub rows: u32,
}

/// One layer of a [`TileMap`].
#[derive(Clone, Debug)]
pub struct TileLayer {
    pub name: String,
    data: Option<Grid<i32>>,
    pub visible: bool,
    pub opacity: f32,
    /// Pixel offset relative to the map origin (parallax).
    pub offset: Vec2,
    pub collidable: bool,
    pub solid: SolidRule,
    pub tileset: Option<Tileset>,
    pub spacing: u32,
    pub margin: u32,
}

impl TileLayer {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data: None,
            visible: true,
            opacity: 1.0,
            offset: Vec2::ZERO,
            collidable: false,
            solid: SolidRule::default(),
            tileset: None,
            spacing: 0,
            margin: 0,
        }
    }

    pub fn has_data(&self) -> bool {
        self.data.is_some()
    }

    pub fn data(&self) -> Option<&Grid<i32>> {
        self.data.as_ref()
    }
}

/// Options for a new layer; everything defaults to an empty, visible, non-collidable layer.
#[derive(Clone, Debug, Default)]
pub struct LayerOptions {
    pub data: Option<Vec<Vec<i32>>>,
    pub hidden: bool,
    pub opacity: Option<f32>,
    pub offset: Vec2,
    pub collidable: bool,
    pub solid: Option<SolidRule>,
    pub spacing: u32,
    pub margin: u32,
}

impl LayerOptions {
    #[must_use]
    pub fn with_data(mut self, data: Vec<Vec<i32>>) -> Self {
        self.data = Some(data);
        self
    }

    #[must_use]
    pub fn collidable(mut self) -> Self {
        self.collidable = true;
        self
    }

    #[must_use]
    pub fn with_solid(mut self, solid: SolidRule) -> Self {
        self.solid = Some(solid);
        self
    }

    #[must_use]
    pub fn with_offset(mut self, x: f32, y: f32) -> Self {
        self.offset = Vec2::new(x, y);
        self
    }
}

/// A solid cell reported by a detailed query.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TileHit {
    pub layer: usize,
    pub x: i32,
    pub y: i32,
    pub index: i32,
}

/// Which layers a query looks at and whether it reports individual cells.
#[derive(Clone, Debug, Default)]
pub struct TileQuery {
    layers: Option<Vec<usize>>,
    details: bool,
}

impl TileQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Query a single layer, collidable or not.
    #[must_use]
    pub fn layer(self, layer: usize) -> Self {
        self.layers(vec![layer])
    }

    /// Query an explicit set of layers. An empty list falls back to the collidable layers.
    #[must_use]
    pub fn layers(mut self, layers: Vec<usize>) -> Self {
        self.layers = (!layers.is_empty()).then_some(layers);
        self
    }

    #[must_use]
    pub fn details(mut self) -> Self {
        self.details = true;
        self
    }
}

/// Result of a collision query. `tiles` is only filled for detailed queries.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TileHits {
    pub hit: bool,
    pub tiles: Vec<TileHit>,
}

/// Multi-layer grid sharing one tile size and one column/row count.
#[derive(Clone, Debug)]
pub struct TileMap {
    tile_width: u32,
    tile_height: u32,
    cols: usize,
    rows: usize,
    layers: Vec<TileLayer>,
}

impl TileMap {
    pub fn new(tile_width: u32, tile_height: u32, cols: usize, rows: usize) -> Self {
        Self {
            tile_width,
            tile_height,
            cols,
            rows,
            layers: Vec::new(),
        }
    }

    pub fn tile_width(&self) -> u32 {
        self.tile_width
    }

    pub fn tile_height(&self) -> u32 {
        self.tile_height
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Pixel size of the whole map.
    pub fn pixel_size(&self) -> (f32, f32) {
        (
            self.cols as f32 * self.tile_width as f32,
            self.rows as f32 * self.tile_height as f32,
        )
    }

    /// Resize the map in tiles. Existing layer data is cropped or padded with empty tiles.
    pub fn set_size(&mut self, cols: usize, rows: usize) -> &mut Self {
        self.cols = cols;
        self.rows = rows;
        for layer in &mut self.layers {
            if let Some(data) = &mut layer.data {
                data.resize(cols, rows, 0);
            }
        }
        self
    }

    /// Append a layer on top of the existing ones and return its index.
    pub fn add_layer(&mut self, name: impl Into<String>, options: LayerOptions) -> usize {
        let mut layer = TileLayer::new(name);
        layer.visible = !options.hidden;
        layer.opacity = options.opacity.unwrap_or(1.0);
        layer.offset = options.offset;
        layer.collidable = options.collidable;
        layer.spacing = options.spacing;
        layer.margin = options.margin;
        if let Some(solid) = options.solid {
            layer.solid = solid;
        }
        self.layers.push(layer);

        let index = self.layers.len() - 1;
        if let Some(data) = options.data {
            self.set_layer_data(index, &data);
        }
        index
    }

    pub fn layer(&self, index: usize) -> Option<&TileLayer> {
        self.layers.get(index)
    }

    pub fn layer_mut(&mut self, index: usize) -> Option<&mut TileLayer> {
        self.layers.get_mut(index)
    }

    pub fn layers(&self) -> &[TileLayer] {
        &self.layers
    }

    pub fn set_layer_visible(&mut self, index: usize, visible: bool) -> &mut Self {
        if let Some(layer) = self.layers.get_mut(index) {
            layer.visible = visible;
        }
        self
    }

    pub fn set_layer_opacity(&mut self, index: usize, opacity: f32) -> &mut Self {
        if let Some(layer) = self.layers.get_mut(index) {
            layer.opacity = opacity;
        }
        self
    }

    pub fn set_layer_offset(&mut self, index: usize, x: f32, y: f32) -> &mut Self {
        if let Some(layer) = self.layers.get_mut(index) {
            layer.offset = Vec2::new(x, y);
        }
        self
    }

    /// Replace a layer's tile data (`rows x cols`). If the map has no size yet it adopts the data's.
    pub fn set_layer_data(&mut self, index: usize, data: &[Vec<i32>]) -> &mut Self {
        if index >= self.layers.len() {
            return self;
        }
        if self.cols == 0 || self.rows == 0 {
            let cols = data.first().map_or(0, Vec::len);
            self.set_size(cols, data.len());
        }
        let mut grid = Grid::from_rows(data, 0);
        grid.resize(self.cols, self.rows, 0);
        self.layers[index].data = Some(grid);
        self
    }

    /// Assign a tileset image of the given pixel size and compute its atlas geometry.
    pub fn set_layer_tileset(
        &mut self,
        index: usize,
        path: impl Into<String>,
        image_width: u32,
        image_height: u32,
    ) -> &mut Self {
        let (tw, th) = (self.tile_width, self.tile_height);
        let Some(layer) = self.layers.get_mut(index) else {
            return self;
        };
        let (columns, rows) = atlas_size(
            (image_width, image_height),
            (tw, th),
            layer.spacing,
            layer.margin,
        );
        layer.tileset = Some(Tileset {
            path: path.into(),
            image_width,
            image_height,
            columns,
            rows,
        });
        self
    }

    pub fn set_collision(&mut self, index: usize, solid: SolidRule) -> &mut Self {
        if let Some(layer) = self.layers.get_mut(index) {
            layer.solid = solid;
        }
        self
    }

    /// Write one cell. Out-of-range coordinates and layers without data are ignored.
    pub fn set_tile(&mut self, x: i32, y: i32, index: i32, layer: usize) -> &mut Self {
        if let Some(data) = self.layers.get_mut(layer).and_then(|l| l.data.as_mut()) {
            data.set(GridCoord::new(x, y), index);
        }
        self
    }

    /// Read one cell; anything out of range reads as empty (0).
    pub fn tile(&self, x: i32, y: i32, layer: usize) -> i32 {
        self.layers
            .get(layer)
            .and_then(|l| l.data.as_ref())
            .and_then(|data| data.get(GridCoord::new(x, y)).copied())
            .unwrap_or(0)
    }

    /// Pixel rectangle of tile `index` inside the layer's tileset image.
    ///
    /// Indices are 1-based; zero and negative indices are empty and have no source.
    pub fn tile_source_rect(&self, layer: usize, index: i32) -> Option<Rect> {
        let layer = self.layers.get(layer)?;
        let tileset = layer.tileset.as_ref()?;
        if tileset.columns == 0 || index <= 0 {
            return None;
        }
        let i = (index - 1) as u32;
        let (ix, iy) = (i % tileset.columns, i / tileset.columns);
        let step = |cell: u32, size: u32| {
            cell.saturating_mul(size.saturating_add(layer.spacing))
                .saturating_add(layer.margin)
        };
        let (x, y) = (step(ix, self.tile_width), step(iy, self.tile_height));
        Some(Rect::new(
            x as f32,
            y as f32,
            self.tile_width as f32,
            self.tile_height as f32,
        ))
    }

    /// Test `rect` (world space) against the solid cells of the targeted layers.
    ///
    /// `origin` is the map's own world position; each layer adds its offset.
    pub fn intersect_rect(&self, origin: Vec2, rect: Rect, query: &TileQuery) -> TileHits {
        let mut result = TileHits::default();
        if self.tile_width == 0 || self.tile_height == 0 {
            return result;
        }
        let targets: Vec<usize> = match &query.layers {
            Some(layers) => layers
                .iter()
                .copied()
                .filter(|&i| i < self.layers.len())
                .collect(),
            None => (0..self.layers.len())
                .filter(|&i| self.layers[i].collidable)
                .collect(),
        };
        let (tw, th) = (self.tile_width as f32, self.tile_height as f32);

        for index in targets {
            let layer = &self.layers[index];
            let Some(data) = &layer.data else {
                continue;
            };
            let ox = origin.x + layer.offset.x;
            let oy = origin.y + layer.offset.y;
            let left = ((rect.x - ox) / tw).floor() as i32;
            let right = ((rect.right() - ox - 1.0) / tw).floor() as i32;
            let top = ((rect.y - oy) / th).floor() as i32;
            let bottom = ((rect.bottom() - oy - 1.0) / th).floor() as i32;

            for ty in top.max(0)..=bottom.min(self.rows as i32 - 1) {
                for tx in left.max(0)..=right.min(self.cols as i32 - 1) {
                    let tile = data.get(GridCoord::new(tx, ty)).copied().unwrap_or(0);
                    if !layer.solid.is_solid(tile) {
                        continue;
                    }
                    result.hit = true;
                    if !query.details {
                        return result;
                    }
                    result.tiles.push(TileHit {
                        layer: index,
                        x: tx,
                        y: ty,
                        index: tile,
                    });
                }
            }
        }
        result
    }

    /// Build a map from a JSON document (see [`MapDocument`]).
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        let doc: MapDocument = serde_json::from_str(text)?;
        Ok(doc.into_map())
    }
}

/// Atlas columns/rows for an image, accounting for margin and spacing.
fn atlas_size(image: (u32, u32), tile: (u32, u32), spacing: u32, margin: u32) -> (u32, u32) {
    let ((w, h), (tw, th)) = (image, tile);
    if tw == 0 || th == 0 || w == 0 || h == 0 {
        return (0, 0);
    }
    let fit = |extent: u32, size: u32| {
        (extent.saturating_add(spacing).saturating_sub(margin) / size.saturating_add(spacing)).max(1)
    };
    (fit(w, tw), fit(h, th))
}

/// Serialized tile map:
///
/// ```json
/// { "tile_width": 16, "tile_height": 16,
///   "layers": [ { "name": "ground", "collidable": true, "data": [[0, 1], [1, 0]] } ] }
/// ```
#[derive(Clone, Debug, Deserialize)]
pub struct MapDocument {
    pub tile_width: u32,
    pub tile_height: u32,
    #[serde(default)]
    pub cols: usize,
    #[serde(default)]
    pub rows: usize,
    #[serde(default)]
    pub layers: Vec<LayerDocument>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct LayerDocument {
    pub name: String,
    pub data: Vec<Vec<i32>>,
    pub visible: bool,
    pub opacity: f32,
    pub offset_x: f32,
    pub offset_y: f32,
    pub collidable: bool,
    /// Explicit solid indices; omitted means "index > 0".
    pub solid: Option<Vec<i32>>,
    pub spacing: u32,
    pub margin: u32,
}

impl Default for LayerDocument {
    fn default() -> Self {
        Self {
            name: "layer".to_string(),
            data: Vec::new(),
            visible: true,
            opacity: 1.0,
            offset_x: 0.0,
            offset_y: 0.0,
            collidable: false,
            solid: None,
            spacing: 0,
            margin: 0,
        }
    }
}

impl MapDocument {
    pub fn into_map(self) -> TileMap {
        let mut map = TileMap::new(self.tile_width, self.tile_height, self.cols, self.rows);
        for layer in self.layers {
            let options = LayerOptions {
                data: (!layer.data.is_empty()).then_some(layer.data),
                hidden: !layer.visible,
                opacity: Some(layer.opacity),
                offset: Vec2::new(layer.offset_x, layer.offset_y),
                collidable: layer.collidable,
                solid: layer.solid.map(SolidRule::indices),
                spacing: layer.spacing,
                margin: layer.margin,
            };
            map.add_layer(layer.name, options);
        }
        map
    }
}
