use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use image::RgbaImage;

use crate::decoder::AnimatedImage;
use crate::math::Vector2D;

static NEXT_TEXTURE_ID: AtomicU64 = AtomicU64::new(1);

pub type TextureRef = Rc<Texture>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureKind {
    Rgba,
    /// Upload produced nothing drawable; holders must release it.
    Invalid,
}

/// A renderer-side image. Pixels are shared, never mutated after upload.
#[derive(Debug)]
pub struct Texture {
    id: u64,
    kind: TextureKind,
    size: Vector2D,
    pixels: Option<Arc<RgbaImage>>,
}

impl Texture {
    pub fn from_rgba(pixels: Arc<RgbaImage>) -> Self {
        let (w, h) = pixels.dimensions();
        if w == 0 || h == 0 {
            return Self::invalid();
        }
        Self {
            id: NEXT_TEXTURE_ID.fetch_add(1, Ordering::Relaxed),
            kind: TextureKind::Rgba,
            size: Vector2D::new(f64::from(w), f64::from(h)),
            pixels: Some(pixels),
        }
    }

    pub fn invalid() -> Self {
        Self {
            id: NEXT_TEXTURE_ID.fetch_add(1, Ordering::Relaxed),
            kind: TextureKind::Invalid,
            size: Vector2D::default(),
            pixels: None,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn kind(&self) -> TextureKind {
        self.kind
    }

    pub fn is_invalid(&self) -> bool {
        self.kind == TextureKind::Invalid
    }

    pub fn size(&self) -> Vector2D {
        self.size
    }

    pub fn pixels(&self) -> Option<&RgbaImage> {
        self.pixels.as_deref()
    }
}

#[derive(Debug, Clone)]
pub struct TimelineFrame {
    pub texture: Option<TextureRef>,
    pub duration_ms: u32,
}

/// Shared, read-only animation frames of one decoded resource.
#[derive(Debug, Clone)]
pub struct AnimationTimeline {
    pub frames: Vec<TimelineFrame>,
    pub loop_count: u32,
    pub canvas_size: Vector2D,
}

impl AnimationTimeline {
    pub fn new(frames: Vec<TimelineFrame>, loop_count: u32) -> Self {
        let canvas_size = frames
            .iter()
            .find_map(|f| f.texture.as_ref().map(|t| t.size()))
            .unwrap_or_default();
        Self {
            frames,
            loop_count,
            canvas_size,
        }
    }

    /// Uploads every decoded frame. The first frame doubles as the still asset.
    pub fn upload(image: &AnimatedImage) -> (TextureRef, Self) {
        let frames: Vec<TimelineFrame> = image
            .frames()
            .iter()
            .map(|frame| {
                let texture = Texture::from_rgba(Arc::clone(&frame.pixels));
                TimelineFrame {
                    texture: (!texture.is_invalid()).then(|| Rc::new(texture)),
                    duration_ms: frame.duration_ms,
                }
            })
            .collect();

        let asset = frames
            .first()
            .and_then(|f| f.texture.clone())
            .unwrap_or_else(|| Rc::new(Texture::invalid()));

        (asset, Self::new(frames, image.loop_count()))
    }
}
