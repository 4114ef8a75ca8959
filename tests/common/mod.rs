#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

use image::{Rgba, RgbaImage};
use lockscreen_image::config::{Gradient, ImageWidgetConfig};
use lockscreen_image::math::{Rect, Vector2D};
use lockscreen_image::render::Renderer;
use lockscreen_image::resources::{ListenerRef, ResourceGateway, ResourceId};
use lockscreen_image::texture::{AnimationTimeline, Texture, TextureRef, TimelineFrame};
use lockscreen_image::timer::{ManualClock, TimerQueue};
use lockscreen_image::widgets::{LockContext, Output};

#[derive(Debug, Clone)]
pub struct Request {
    pub id: ResourceId,
    pub path: String,
    pub revision: u64,
    pub bound: bool,
}

#[derive(Default)]
struct Entry {
    listener: Option<ListenerRef>,
    asset: Option<TextureRef>,
    timeline: Option<Rc<AnimationTimeline>>,
}

/// Gateway that records requests and completes them only when told to.
#[derive(Default)]
pub struct FakeGateway {
    next_id: Cell<u64>,
    requests: RefCell<Vec<Request>>,
    entries: RefCell<HashMap<ResourceId, Entry>>,
    released: RefCell<Vec<ResourceId>>,
    unloaded_textures: RefCell<Vec<u64>>,
}

impl FakeGateway {
    pub fn requests(&self) -> Vec<Request> {
        self.requests.borrow().clone()
    }

    pub fn last_request(&self) -> Request {
        self.requests.borrow().last().cloned().expect("no request issued")
    }

    pub fn released(&self) -> Vec<ResourceId> {
        self.released.borrow().clone()
    }

    pub fn unloaded_textures(&self) -> Vec<u64> {
        self.unloaded_textures.borrow().clone()
    }

    /// Finishes request `id` without telling anyone, the way an unbound
    /// request sees its result.
    pub fn store(
        &self,
        id: ResourceId,
        asset: Option<TextureRef>,
        timeline: Option<AnimationTimeline>,
    ) {
        let mut entries = self.entries.borrow_mut();
        let entry = entries.get_mut(&id).expect("unknown resource");
        entry.asset = asset;
        entry.timeline = timeline.map(Rc::new);
    }

    /// Finishes request `id` and notifies its listener, if still alive.
    pub fn complete(
        &self,
        id: ResourceId,
        asset: Option<TextureRef>,
        timeline: Option<AnimationTimeline>,
    ) {
        self.store(id, asset.clone(), timeline);
        let listener = self
            .entries
            .borrow_mut()
            .get_mut(&id)
            .and_then(|entry| entry.listener.take());
        if let Some(listener) = listener.and_then(|l| l.upgrade()) {
            listener.borrow_mut().on_asset_update(id, asset);
        }
    }

    pub fn complete_still(&self, id: ResourceId, width: u32, height: u32) -> TextureRef {
        let texture = solid_texture(width, height, [200, 40, 40, 255]);
        let timeline = AnimationTimeline::new(
            vec![TimelineFrame {
                texture: Some(texture.clone()),
                duration_ms: 0,
            }],
            0,
        );
        self.complete(id, Some(texture.clone()), Some(timeline));
        texture
    }
}

impl ResourceGateway for FakeGateway {
    fn request_image(
        &self,
        path: &str,
        revision: u64,
        listener: Option<ListenerRef>,
    ) -> Option<ResourceId> {
        if path.is_empty() {
            return None;
        }
        let raw = self.next_id.get() + 1;
        self.next_id.set(raw);
        let id = ResourceId::new(raw)?;
        self.requests.borrow_mut().push(Request {
            id,
            path: path.to_owned(),
            revision,
            bound: listener.is_some(),
        });
        self.entries.borrow_mut().insert(
            id,
            Entry {
                listener,
                ..Entry::default()
            },
        );
        Some(id)
    }

    fn asset_by_id(&self, id: ResourceId) -> Option<TextureRef> {
        self.entries.borrow().get(&id)?.asset.clone()
    }

    fn timeline_by_id(&self, id: ResourceId) -> Option<Rc<AnimationTimeline>> {
        self.entries.borrow().get(&id)?.timeline.clone()
    }

    fn unload(&self, texture: &TextureRef) {
        self.unloaded_textures.borrow_mut().push(texture.id());
    }

    fn unload_by_id(&self, id: ResourceId) {
        self.released.borrow_mut().push(id);
    }
}

/// Renderer that records what it was asked to do.
#[derive(Default)]
pub struct RecordingRenderer {
    pub offscreen_sizes: Vec<Vector2D>,
    pub borders: Vec<Rect>,
    pub textures: Vec<(Rect, u64, f64)>,
}

impl Renderer for RecordingRenderer {
    fn push_offscreen(&mut self, size: Vector2D) {
        self.offscreen_sizes.push(size);
    }

    fn pop_offscreen(&mut self) -> Texture {
        let size = self.offscreen_sizes.last().copied().unwrap_or_default();
        Texture::from_rgba(Arc::new(RgbaImage::new(size.x as u32, size.y as u32)))
    }

    fn render_border(&mut self, rect: &Rect, _: &Gradient, _: i32, _: i32, _: f64) {
        self.borders.push(*rect);
    }

    fn render_texture(&mut self, rect: &Rect, texture: &Texture, alpha: f64, _rounding: i32) {
        self.textures.push((*rect, texture.id(), alpha));
    }
}

pub struct Harness {
    pub clock: Rc<ManualClock>,
    pub gateway: Rc<FakeGateway>,
    pub ctx: Rc<LockContext>,
}

impl Harness {
    pub fn new() -> Self {
        let clock = Rc::new(ManualClock::new());
        let gateway = Rc::new(FakeGateway::default());
        let ctx = LockContext::new(gateway.clone(), TimerQueue::new(clock.clone()));
        Self {
            clock,
            gateway,
            ctx,
        }
    }

    /// Moves the clock forward and runs whatever timers came due.
    pub fn advance_ms(&self, ms: u64) -> usize {
        self.clock.advance(std::time::Duration::from_millis(ms));
        self.ctx.timers.fire_due()
    }
}

pub fn output() -> Output {
    Output {
        name: "test-1".into(),
        viewport: Vector2D::new(800.0, 600.0),
    }
}

pub fn widget_config(path: &str, reload_time: i64) -> ImageWidgetConfig {
    ImageWidgetConfig {
        path: path.to_owned(),
        reload_time,
        ..ImageWidgetConfig::default()
    }
}

pub fn solid_texture(width: u32, height: u32, color: [u8; 4]) -> TextureRef {
    Rc::new(Texture::from_rgba(Arc::new(RgbaImage::from_pixel(
        width,
        height,
        Rgba(color),
    ))))
}

/// An animation of distinct solid frames with the given durations.
pub fn animation(durations_ms: &[u32], loop_count: u32) -> (TextureRef, AnimationTimeline) {
    let frames: Vec<TimelineFrame> = durations_ms
        .iter()
        .enumerate()
        .map(|(i, &duration_ms)| TimelineFrame {
            texture: Some(solid_texture(8, 8, [(i * 60) as u8, 0, 0, 255])),
            duration_ms,
        })
        .collect();
    let first = frames[0].texture.clone().unwrap();
    (first, AnimationTimeline::new(frames, loop_count))
}

/// Writes a GIF of solid 6x4 frames with the given delays.
pub fn write_gif(
    path: &std::path::Path,
    delays_ms: &[u32],
    repeat: Option<image::codecs::gif::Repeat>,
) {
    use image::codecs::gif::GifEncoder;
    use image::{Delay, Frame};

    let file = std::fs::File::create(path).unwrap();
    let mut encoder = GifEncoder::new(file);
    if let Some(repeat) = repeat {
        encoder.set_repeat(repeat).unwrap();
    }
    let frames = delays_ms.iter().enumerate().map(|(i, &ms)| {
        let buffer = RgbaImage::from_pixel(6, 4, Rgba([255, (i * 70) as u8, 0, 255]));
        Frame::from_parts(buffer, 0, 0, Delay::from_numer_denom_ms(ms, 1))
    });
    encoder.encode_frames(frames).unwrap();
}

/// Sets the modification time of `path` to a fixed offset from the epoch.
pub fn set_mtime(path: &std::path::Path, secs: u64) {
    let file = std::fs::File::options().write(true).open(path).unwrap();
    file.set_modified(std::time::UNIX_EPOCH + std::time::Duration::from_secs(secs))
        .unwrap();
}
