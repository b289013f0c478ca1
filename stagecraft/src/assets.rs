//! Asset table, file classification and the background loader.
//!
//! Fetching and decoding happen on one worker thread. The engine hands it a
//! single path at a time and reads results back without blocking the frame
//! loop, so batches load strictly in order.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::rc::Rc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};
use image::RgbaImage;

use crate::error::AssetError;
use crate::event::LoadPhase;

const IMAGE_EXTENSIONS: [&str; 6] = ["png", "jpg", "jpeg", "gif", "bmp", "webp"];
const AUDIO_EXTENSIONS: [&str; 7] = ["mp3", "aac", "m4a", "wav", "ogg", "flac", "webm"];

/// How a path is decoded, decided by its extension.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AssetKind {
    Image,
    Audio,
    Text,
}

/// Classify by (case-insensitive) extension. Anything unrecognised is text.
pub fn classify(path: &str) -> AssetKind {
    let ext = path
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        AssetKind::Image
    } else if AUDIO_EXTENSIONS.contains(&ext.as_str()) {
        AssetKind::Audio
    } else {
        AssetKind::Text
    }
}

/// A loaded asset.
#[derive(Clone, Debug, PartialEq)]
pub enum Asset {
    /// Decoded RGBA pixels.
    Image(RgbaImage),
    /// Encoded audio bytes; playback is up to the host.
    Audio(Vec<u8>),
    Text(String),
}

impl Asset {
    pub fn kind(&self) -> AssetKind {
        match self {
            Asset::Image(_) => AssetKind::Image,
            Asset::Audio(_) => AssetKind::Audio,
            Asset::Text(_) => AssetKind::Text,
        }
    }

    pub fn as_image(&self) -> Option<&RgbaImage> {
        match self {
            Asset::Image(image) => Some(image),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Asset::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn image_size(&self) -> Option<(u32, u32)> {
        self.as_image().map(RgbaImage::dimensions)
    }
}

/// Decode raw bytes according to the path's classification.
pub fn decode(path: &str, bytes: Vec<u8>) -> Result<Asset, AssetError> {
    match classify(path) {
        AssetKind::Image => {
            let image = image::load_from_memory(&bytes).map_err(|source| AssetError::Decode {
                path: path.to_string(),
                source,
            })?;
            Ok(Asset::Image(image.to_rgba8()))
        }
        AssetKind::Audio => Ok(Asset::Audio(bytes)),
        AssetKind::Text => String::from_utf8(bytes)
            .map(Asset::Text)
            .map_err(|_| AssetError::NotText {
                path: path.to_string(),
            }),
    }
}

/// Where asset bytes come from. Runs on the loader thread.
pub trait AssetSource: Send + 'static {
    fn fetch(&self, path: &str) -> Result<Vec<u8>, AssetError>;
}

/// Reads assets from disk, relative to a root directory.
#[derive(Clone, Debug)]
pub struct FileSource {
    root: PathBuf,
}

impl FileSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl AssetSource for FileSource {
    fn fetch(&self, path: &str) -> Result<Vec<u8>, AssetError> {
        std::fs::read(self.root.join(path)).map_err(|source| AssetError::Fetch {
            path: path.to_string(),
            source,
        })
    }
}

/// In-memory asset bytes keyed by path.
#[derive(Clone, Debug, Default)]
pub struct MemorySource {
    files: HashMap<String, Vec<u8>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_file(mut self, path: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        self.files.insert(path.into(), bytes.into());
        self
    }
}

impl AssetSource for MemorySource {
    fn fetch(&self, path: &str) -> Result<Vec<u8>, AssetError> {
        self.files.get(path).cloned().ok_or_else(|| AssetError::Fetch {
            path: path.to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such asset"),
        })
    }
}

/// Loaded assets keyed by path.
#[derive(Clone, Debug, Default)]
pub struct AssetTable {
    assets: HashMap<String, Asset>,
}

impl AssetTable {
    pub fn get(&self, path: &str) -> Option<&Asset> {
        self.assets.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.assets.contains_key(path)
    }

    pub fn insert(&mut self, path: impl Into<String>, asset: Asset) {
        self.assets.insert(path.into(), asset);
    }

    pub fn remove(&mut self, path: &str) -> Option<Asset> {
        self.assets.remove(path)
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }
}

/// Options for a runtime load.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoadOptions {
    /// Dispatch `progress` after each asset.
    pub emit_progress: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            emit_progress: true,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub enum LoadState {
    #[default]
    Pending,
    Done,
    /// The batch stopped at this error; assets loaded before it stay in the table.
    Failed(Rc<AssetError>),
}

/// Snapshot of a batch's progress.
#[derive(Clone, Debug, Default)]
pub struct LoadStatus {
    pub loaded: usize,
    pub total: usize,
    pub state: LoadState,
}

/// Pollable handle to a runtime asset batch.
#[derive(Clone, Debug, Default)]
pub struct LoadHandle(Rc<RefCell<LoadStatus>>);

impl LoadHandle {
    pub(crate) fn new(total: usize) -> Self {
        let handle = Self::default();
        handle.0.borrow_mut().total = total;
        handle
    }

    pub(crate) fn completed() -> Self {
        let handle = Self::default();
        handle.0.borrow_mut().state = LoadState::Done;
        handle
    }

    pub fn status(&self) -> LoadStatus {
        self.0.borrow().clone()
    }

    pub fn is_finished(&self) -> bool {
        !matches!(self.0.borrow().state, LoadState::Pending)
    }

    pub fn is_ok(&self) -> bool {
        matches!(self.0.borrow().state, LoadState::Done)
    }

    pub fn error(&self) -> Option<Rc<AssetError>> {
        match &self.0.borrow().state {
            LoadState::Failed(err) => Some(Rc::clone(err)),
            _ => None,
        }
    }

    pub(crate) fn set_loaded(&self, loaded: usize) {
        self.0.borrow_mut().loaded = loaded;
    }

    pub(crate) fn finish(&self, state: LoadState) {
        self.0.borrow_mut().state = state;
    }
}

/// A sequential batch of paths being loaded.
pub(crate) struct Batch {
    pub phase: LoadPhase,
    pub pending: VecDeque<String>,
    pub total: usize,
    pub loaded: usize,
    pub emit_progress: bool,
    pub handle: LoadHandle,
    pub in_flight: Option<String>,
}

impl Batch {
    pub fn new(phase: LoadPhase, paths: Vec<String>, emit_progress: bool) -> Self {
        let total = paths.len();
        Self {
            phase,
            pending: paths.into(),
            total,
            loaded: 0,
            emit_progress,
            handle: LoadHandle::new(total),
            in_flight: None,
        }
    }

    pub fn mark_loaded(&mut self) {
        self.loaded += 1;
        self.handle.set_loaded(self.loaded);
    }
}

/// Drop empty and duplicate paths, keeping first-seen order.
pub(crate) fn normalize_paths<I, S>(paths: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut seen = HashSet::new();
    paths
        .into_iter()
        .map(Into::into)
        .filter(|p| !p.is_empty() && seen.insert(p.clone()))
        .collect()
}

pub(crate) type LoadResult = (String, Result<Asset, AssetError>);

/// Handle to the loader thread.
pub(crate) struct AssetLoader {
    jobs: Sender<String>,
    results: Receiver<LoadResult>,
    _worker: JoinHandle<()>,
}

impl AssetLoader {
    pub fn spawn(source: Box<dyn AssetSource>) -> std::io::Result<Self> {
        let (jobs, job_rx) = crossbeam_channel::unbounded::<String>();
        let (result_tx, results) = crossbeam_channel::unbounded::<LoadResult>();
        let worker = thread::Builder::new()
            .name("stagecraft-assets".to_string())
            .spawn(move || {
                for path in job_rx.iter() {
                    let result = source.fetch(&path).and_then(|bytes| decode(&path, bytes));
                    if result_tx.send((path, result)).is_err() {
                        break;
                    }
                }
            })?;
        Ok(Self {
            jobs,
            results,
            _worker: worker,
        })
    }

    pub fn request(&self, path: String) -> Result<(), AssetError> {
        self.jobs.send(path).map_err(|_| AssetError::LoaderClosed)
    }

    pub fn try_next(&self) -> Option<LoadResult> {
        self.results.try_recv().ok()
    }

    pub fn next_blocking(&self) -> Result<LoadResult, AssetError> {
        self.results.recv().map_err(|_| AssetError::LoaderClosed)
    }
}
