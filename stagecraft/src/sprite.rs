//! Sprite sheet frame selection and frame-stepped animation.

use crate::math::Rect;

/// A frame reference: a linear index into the sheet, or an explicit cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Frame {
    Index(u32),
    Cell(u32, u32),
}

impl Default for Frame {
    fn default() -> Self {
        Frame::Index(0)
    }
}

impl From<u32> for Frame {
    fn from(index: u32) -> Self {
        Frame::Index(index)
    }
}

impl From<(u32, u32)> for Frame {
    fn from((x, y): (u32, u32)) -> Self {
        Frame::Cell(x, y)
    }
}

/// Playback options for [`Sprite::animate`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AnimateOptions {
    pub looping: bool,
    pub ping_pong: bool,
    pub start_index: usize,
}

impl Default for AnimateOptions {
    fn default() -> Self {
        Self {
            looping: true,
            ping_pong: false,
            start_index: 0,
        }
    }
}

#[derive(Clone, Debug)]
struct FrameAnimation {
    frames: Vec<Frame>,
    interval: u32,
    index: usize,
    forward: bool,
    counter: u32,
    options: AnimateOptions,
}

/// Sprite sheet state of a sprite node.
#[derive(Clone, Debug, Default)]
pub struct Sprite {
    image: Option<String>,
    sheet_width: u32,
    sheet_height: u32,
    frame: Frame,
    frames: Option<Vec<(u32, u32)>>,
    animation: Option<FrameAnimation>,
}

impl Sprite {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign the sheet image by asset path together with its pixel size.
    pub fn set_image(&mut self, path: impl Into<String>, width: u32, height: u32) {
        self.image = Some(path.into());
        self.sheet_width = width;
        self.sheet_height = height;
    }

    pub fn image(&self) -> Option<&str> {
        self.image.as_deref()
    }

    pub fn sheet_size(&self) -> (u32, u32) {
        (self.sheet_width, self.sheet_height)
    }

    pub fn frame(&self) -> Frame {
        self.frame
    }

    pub fn set_frame(&mut self, frame: impl Into<Frame>) {
        self.frame = frame.into();
    }

    /// Explicit list of cells; an index frame then selects from this list (wrapping).
    pub fn set_frames(&mut self, frames: Option<Vec<(u32, u32)>>) {
        self.frames = frames.filter(|f| !f.is_empty());
    }

    /// Sheet cell shown for a frame of `frame_width` pixels.
    pub fn cell(&self, frame_width: f32) -> (u32, u32) {
        match (self.frame, &self.frames) {
            (Frame::Cell(x, y), _) => (x, y),
            (Frame::Index(i), Some(list)) => list[i as usize % list.len()],
            (Frame::Index(i), None) => {
                let cols = if frame_width > 0.0 {
                    ((self.sheet_width as f32 / frame_width).floor() as u32).max(1)
                } else {
                    1
                };
                (i % cols, i / cols)
            }
        }
    }

    /// Source rectangle of the current frame inside the sheet.
    ///
    /// `None` until an image is assigned and the sprite has a non-zero size.
    pub fn source_rect(&self, width: f32, height: f32) -> Option<Rect> {
        if self.image.is_none() || width <= 0.0 || height <= 0.0 {
            return None;
        }
        let (ix, iy) = self.cell(width);
        Some(Rect::new(ix as f32 * width, iy as f32 * height, width, height))
    }

    /// Cycle through `frames`, advancing one step every `interval` frames.
    pub fn animate(&mut self, frames: Vec<Frame>, interval: u32, options: AnimateOptions) {
        self.stop_animation();
        if frames.is_empty() {
            return;
        }
        let index = options.start_index.min(frames.len() - 1);
        self.frame = frames[index];
        self.animation = Some(FrameAnimation {
            frames,
            interval: interval.max(1),
            index,
            forward: true,
            counter: 0,
            options,
        });
    }

    pub fn stop_animation(&mut self) {
        self.animation = None;
    }

    pub fn is_animating(&self) -> bool {
        self.animation.is_some()
    }

    /// Per-frame step, driven by the frame loop.
    pub(crate) fn update(&mut self) {
        let Some(anim) = &mut self.animation else {
            return;
        };
        anim.counter += 1;
        if anim.counter % anim.interval != 0 {
            return;
        }

        let last = anim.frames.len() - 1;
        if anim.options.ping_pong {
            if anim.forward {
                anim.index += 1;
            } else {
                anim.index = anim.index.saturating_sub(1);
            }
            if anim.index >= last {
                anim.index = last;
                anim.forward = false;
            } else if anim.index == 0 {
                anim.forward = true;
                if !anim.options.looping {
                    self.animation = None;
                    return;
                }
            }
        } else {
            anim.index += 1;
            if anim.index > last {
                if anim.options.looping {
                    anim.index = 0;
                } else {
                    self.frame = anim.frames[last];
                    self.animation = None;
                    return;
                }
            }
        }
        self.frame = anim.frames[anim.index];
    }
}
