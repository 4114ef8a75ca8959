//! Image widget: shows a still or animated image, reloads it on a timer and
//! plays animations frame by frame.
//!
//! Three things mutate a widget after configuration: the reload timer, decode
//! deliveries from the resource gateway and the frame-advance timer. All of
//! them reach the widget through a `Weak` handle and run on the event loop, so
//! a widget that has been dropped is never touched again.

use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::time::{Duration, SystemTime};

use tracing::{debug, error, info, warn};

use crate::command::{absolute_path, path_from_command_output, spawn_async, spawn_sync};
use crate::config::{Gradient, HAlign, ImageWidgetConfig, ReloadPolicy, VAlign};
use crate::error::Error;
use crate::layout::{cover_scale, pos_from_hv_align, rounding_for_border_box, rounding_for_box};
use crate::math::{Rect, Vector2D};
use crate::render::Renderer;
use crate::resources::{AssetListener, ListenerRef, ResourceId};
use crate::texture::{Texture, TextureRef};
use crate::timer::Timer;

use super::{CursorShape, LockContext, Output, RenderData, Widget};

/// Shortest delay between two animation frames.
const MIN_FRAME_DELAY_MS: u32 = 10;

type TimerSlot = Rc<RefCell<Option<Rc<Timer>>>>;

#[derive(Debug, Clone)]
struct AnimationFrame {
    texture: TextureRef,
    duration_ms: u32,
}

#[derive(Debug, Default)]
struct AnimationState {
    frames: Vec<AnimationFrame>,
    loop_count: u32,
    loops_completed: u32,
    frame_index: usize,
    initialized: bool,
    timer: TimerSlot,
}

pub struct ImageWidget {
    ctx: Rc<LockContext>,
    this: Weak<RefCell<ImageWidget>>,

    viewport: Vector2D,
    output: String,
    size: f64,
    rounding: i32,
    border: i32,
    border_color: Gradient,
    config_pos: Vector2D,
    halign: HAlign,
    valign: VAlign,
    angle: f64,
    reload: ReloadPolicy,
    reload_cmd: String,
    onclick: String,

    path: String,
    revision: u64,
    modified: Option<SystemTime>,
    resource: Option<ResourceId>,
    pending: Option<ResourceId>,
    asset: Option<TextureRef>,
    reload_timer: TimerSlot,
    animation: AnimationState,

    render_target: Option<Texture>,
    pos: Vector2D,
}

impl ImageWidget {
    pub fn new(ctx: Rc<LockContext>) -> Rc<RefCell<Self>> {
        Rc::new_cyclic(|this| {
            RefCell::new(Self {
                ctx,
                this: this.clone(),
                viewport: Vector2D::default(),
                output: String::new(),
                size: 0.0,
                rounding: -1,
                border: 0,
                border_color: Gradient::solid([0, 0, 0, 0]),
                config_pos: Vector2D::default(),
                halign: HAlign::Center,
                valign: VAlign::Center,
                angle: 0.0,
                reload: ReloadPolicy::Disabled,
                reload_cmd: String::new(),
                onclick: String::new(),
                path: String::new(),
                revision: 0,
                modified: None,
                resource: None,
                pending: None,
                asset: None,
                reload_timer: TimerSlot::default(),
                animation: AnimationState::default(),
                render_target: None,
                pos: Vector2D::default(),
            })
        })
    }

    /// Applies `cfg` for `output` and requests the first decode.
    ///
    /// Any previous state is dropped first. An invalid configuration is
    /// returned as [`Error::Config`] and leaves the widget blank.
    pub fn configure(&mut self, cfg: &ImageWidgetConfig, output: &Output) -> Result<(), Error> {
        self.reset();

        cfg.validate()?;
        let reload = cfg.reload_policy()?;

        self.viewport = output.viewport;
        self.output = output.name.clone();
        self.size = cfg.size as f64;
        self.rounding = cfg.rounding as i32;
        self.border = cfg.border_size as i32;
        self.border_color = cfg.border_color.clone();
        self.config_pos = cfg.position.absolute(self.viewport);
        self.halign = cfg.halign;
        self.valign = cfg.valign;
        self.reload = reload;
        self.reload_cmd = cfg.reload_cmd.clone();
        self.onclick = cfg.onclick.clone();
        self.path = cfg.path.clone();
        self.revision = 0;
        self.modified = None;

        self.resource =
            self.ctx
                .resources
                .request_image(&self.path, self.revision, Some(self.listener()));
        self.pending = self.resource;
        self.angle = cfg.rotate.to_radians();

        match self.resource {
            Some(id) => debug!(output = %self.output, path = %self.path, resource = %id, "image requested"),
            None => warn!(output = %self.output, path = %self.path, "image request rejected"),
        }

        if self.reload.is_enabled() {
            match file_mtime(&self.path) {
                Ok(mtime) => self.modified = Some(mtime),
                Err(err) => error!(path = %self.path, error = %err, "failed to stat image"),
            }
            self.plant_timer();
        }
        Ok(())
    }

    /// One reload poll. Picks up a new path from `reload_cmd` and requests a
    /// decode when the path or its modification time changed.
    pub fn on_timer_update(&mut self) {
        if let Some(id) = self.pending {
            warn!(resource = %id, path = %self.path, "image update skipped: a resource is still pending");
            return;
        }

        let old_path = self.path.clone();

        if !self.reload_cmd.is_empty() {
            let output = match spawn_sync(&self.reload_cmd) {
                Ok(output) => output,
                Err(err) => {
                    warn!(command = %self.reload_cmd, error = %err, "reload command failed");
                    return;
                }
            };
            match path_from_command_output(&output) {
                Some(path) => self.path = path,
                None => return,
            }
        }

        match file_mtime(&self.path) {
            Ok(mtime) => {
                if old_path == self.path && self.modified == Some(mtime) {
                    return;
                }
                self.modified = Some(mtime);
                if old_path == self.path {
                    self.revision += 1;
                } else {
                    self.revision = 0;
                }
            }
            Err(err) => {
                error!(path = %self.path, error = %err, "failed to stat image; keeping previous path");
                self.path = old_path;
                return;
            }
        }

        let requested =
            self.ctx
                .resources
                .request_image(&self.path, self.revision, Some(self.listener()));
        let Some(id) = requested else {
            warn!(path = %self.path, revision = self.revision, "image reload rejected");
            return;
        };
        if self.resource == Some(id) {
            // already holding this resource; keep a single reference
            self.ctx.resources.unload_by_id(id);
        }
        self.pending = Some(id);
        info!(path = %self.path, revision = self.revision, resource = %id, "reloading image");
    }

    /// Arms the reload timer, replacing any armed one.
    pub fn plant_timer(&mut self) {
        cancel_slot(&self.reload_timer);
        let Some(period) = self.reload.period() else {
            return;
        };
        arm_widget_timer(&self.ctx, &self.reload_timer, self.this.clone(), period, |widget| {
            widget.on_timer_update();
            widget.plant_timer();
        });
    }

    fn plant_animation_timer(&mut self, delay_ms: u32) {
        let delay = Duration::from_millis(u64::from(delay_ms.max(MIN_FRAME_DELAY_MS)));
        arm_widget_timer(
            &self.ctx,
            &self.animation.timer,
            self.this.clone(),
            delay,
            Self::on_animation_timer_update,
        );
    }

    fn reset_animation_state(&mut self) {
        cancel_slot(&self.animation.timer);
        self.animation = AnimationState::default();
    }

    /// Rebuilds playback from the timeline of the current resource.
    pub fn initialize_animation_playback(&mut self) {
        self.reset_animation_state();

        let Some(id) = self.resource else {
            return;
        };
        let Some(timeline) = self.ctx.resources.timeline_by_id(id) else {
            self.animation.initialized = true;
            return;
        };

        self.animation.loop_count = timeline.loop_count;
        self.animation.frames = timeline
            .frames
            .iter()
            .filter_map(|frame| {
                frame.texture.clone().map(|texture| AnimationFrame {
                    texture,
                    duration_ms: frame.duration_ms,
                })
            })
            .collect();
        self.animation.initialized = true;

        let Some(first) = self.animation.frames.first().cloned() else {
            return;
        };
        self.animation.frame_index = 0;
        self.show_texture(first.texture);

        if self.animation.frames.len() > 1 {
            debug!(
                resource = %id,
                frames = self.animation.frames.len(),
                loop_count = self.animation.loop_count,
                "starting animation"
            );
            self.plant_animation_timer(first.duration_ms);
        }
    }

    /// Advances to the next frame, or stops on the last frame once every loop has played.
    pub fn on_animation_timer_update(&mut self) {
        let count = self.animation.frames.len();
        if count <= 1 {
            return;
        }

        let mut next = self.animation.frame_index + 1;
        if next >= count {
            let loops = self.animation.loop_count;
            if loops != 0 && self.animation.loops_completed + 1 >= loops {
                self.animation.loops_completed = loops;
                cancel_slot(&self.animation.timer);
                debug!(loops, "animation finished");
                return;
            }
            self.animation.loops_completed += 1;
            next = 0;
        }

        self.animation.frame_index = next;
        let frame = self.animation.frames[next].clone();
        self.show_texture(frame.texture);

        if self.animation.frames.len() > 1 {
            self.plant_animation_timer(frame.duration_ms);
        }
        self.ctx.request_redraw();
    }

    /// Cancels timers, drops the render target and releases held resources.
    pub fn reset(&mut self) {
        cancel_slot(&self.reload_timer);
        self.reset_animation_state();

        if self.ctx.is_terminating() {
            return;
        }

        self.render_target = None;

        if let Some(pending) = self.pending.take() {
            if self.resource != Some(pending) {
                self.ctx.resources.unload_by_id(pending);
            }
        }
        if let Some(id) = self.resource.take() {
            // static images stay cached for the rest of the session
            if self.reload.is_enabled() {
                self.ctx.resources.unload_by_id(id);
            }
        }
        self.asset = None;
    }

    fn show_texture(&mut self, texture: TextureRef) {
        let changed = self
            .asset
            .as_ref()
            .is_none_or(|current| !Rc::ptr_eq(current, &texture));
        if changed {
            self.render_target = None;
        }
        self.asset = Some(texture);
    }

    fn listener(&self) -> ListenerRef {
        self.this.clone()
    }

    fn build_render_target(&mut self, renderer: &mut dyn Renderer, asset: &Texture) -> Texture {
        let border = f64::from(self.border);
        let image_pos = Vector2D::new(border, border);
        let rotated = self.angle != 0.0;
        // one spare pixel on each side for anti-aliasing rotated edges
        let nudge = if rotated {
            Vector2D::new(1.0, 1.0)
        } else {
            Vector2D::default()
        };

        let scale = cover_scale(self.size, asset.size());
        let mut tex_box = Rect::new(image_pos + nudge, asset.size() * scale);
        let mut border_box = Rect::new(nudge, tex_box.size() + image_pos * 2.0);
        border_box.round();

        let fb_size = if rotated {
            border_box.size() + Vector2D::new(2.0, 2.0)
        } else {
            border_box.size()
        };
        let rounding = rounding_for_box(&tex_box, self.rounding);
        let border_rounding = rounding_for_border_box(&border_box, self.rounding, self.border);

        renderer.push_offscreen(fb_size);
        if self.border > 0 {
            renderer.render_border(&border_box, &self.border_color, self.border, border_rounding, 1.0);
        }
        tex_box.round();
        renderer.render_texture(&tex_box, asset, 1.0, rounding);
        renderer.pop_offscreen()
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn resource_id(&self) -> Option<ResourceId> {
        self.resource
    }

    pub fn pending_request(&self) -> Option<ResourceId> {
        self.pending
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn current_texture(&self) -> Option<&TextureRef> {
        self.asset.as_ref()
    }

    pub fn frame_index(&self) -> usize {
        self.animation.frame_index
    }

    pub fn frame_count(&self) -> usize {
        self.animation.frames.len()
    }

    pub fn loop_count(&self) -> u32 {
        self.animation.loop_count
    }

    pub fn loops_completed(&self) -> u32 {
        self.animation.loops_completed
    }

    pub fn is_animation_initialized(&self) -> bool {
        self.animation.initialized
    }

    pub fn animation_timer_armed(&self) -> bool {
        slot_armed(&self.animation.timer)
    }

    pub fn reload_timer_armed(&self) -> bool {
        slot_armed(&self.reload_timer)
    }

    pub fn has_render_target(&self) -> bool {
        self.render_target.is_some()
    }
}

impl AssetListener for ImageWidget {
    fn on_asset_update(&mut self, id: ResourceId, asset: Option<TextureRef>) {
        if self.pending != Some(id) {
            debug!(resource = %id, "ignoring stale asset update");
            return;
        }
        self.pending = None;

        let Some(asset) = asset else {
            error!(resource = %id, path = %self.path, "asset update failed: resource not available");
            if self.resource != Some(id) {
                self.ctx.resources.unload_by_id(id);
            }
            return;
        };

        if asset.is_invalid() {
            error!(resource = %id, path = %self.path, "new image asset has an invalid texture");
            self.ctx.resources.unload(&asset);
            if self.resource == Some(id) {
                self.resource = None;
                self.asset = None;
                self.render_target = None;
                self.reset_animation_state();
            }
            return;
        }

        if self.resource == Some(id)
            && self.animation.initialized
            && self.asset.as_ref().is_some_and(|a| Rc::ptr_eq(a, &asset))
        {
            return;
        }

        if let Some(previous) = self.resource {
            if previous != id {
                self.ctx.resources.unload_by_id(previous);
            }
        }
        self.render_target = None;
        self.asset = Some(asset);
        self.resource = Some(id);
        self.initialize_animation_playback();
        self.ctx.request_redraw();
    }
}

impl Widget for ImageWidget {
    fn draw(&mut self, renderer: &mut dyn Renderer, data: &RenderData) -> bool {
        let Some(id) = self.resource else {
            return false;
        };

        if self.asset.is_none() {
            self.asset = self.ctx.resources.asset_by_id(id);
        }
        if self.asset.is_some() && !self.animation.initialized {
            self.initialize_animation_playback();
        }
        let Some(asset) = self.asset.clone() else {
            return true;
        };

        if asset.is_invalid() {
            self.ctx.resources.unload(&asset);
            self.resource = None;
            self.asset = None;
            return false;
        }

        if self.render_target.is_none() {
            let target = self.build_render_target(renderer, &asset);
            self.render_target = Some(target);
        }
        let Some(target) = self.render_target.as_ref() else {
            return false;
        };

        let size = target.size();
        self.pos = pos_from_hv_align(
            self.viewport,
            size,
            self.config_pos,
            self.halign,
            self.valign,
            self.angle,
        );
        let mut rect = Rect::new(self.pos, size);
        rect.round();
        rect.rot = self.angle;
        renderer.render_texture(&rect, target, data.opacity, 0);

        data.opacity < 1.0
    }

    fn bounding_box(&self) -> Rect {
        let Some(target) = &self.render_target else {
            return Rect::default();
        };
        let size = target.size();
        Rect::new(
            Vector2D::new(self.pos.x, self.viewport.y - self.pos.y - size.y),
            size,
        )
    }

    fn on_click(&mut self, _button: u32, down: bool, _pos: Vector2D) {
        if down && !self.onclick.is_empty() {
            spawn_async(&self.onclick);
        }
    }

    fn on_hover(&mut self, _pos: Vector2D) -> Option<CursorShape> {
        (!self.onclick.is_empty()).then_some(CursorShape::Pointer)
    }
}

impl Drop for ImageWidget {
    fn drop(&mut self) {
        self.reset();
    }
}

/// Plants a one-shot timer in `slot` that runs `fire` on the widget. When the
/// widget is already borrowed at expiry the same timer is planted again, so a
/// busy widget delays a poll or frame instead of losing it.
fn arm_widget_timer(
    ctx: &Rc<LockContext>,
    slot: &TimerSlot,
    widget: Weak<RefCell<ImageWidget>>,
    delay: Duration,
    fire: fn(&mut ImageWidget),
) {
    let ctx_ref = Rc::downgrade(ctx);
    let slot_ref = Rc::downgrade(slot);
    let timer = ctx.timers.add_timer(delay, false, move || {
        let Some(strong) = widget.upgrade() else {
            return;
        };
        match strong.try_borrow_mut() {
            Ok(mut target) => fire(&mut *target),
            Err(_) => {
                warn!(delay = ?delay, "image widget busy; re-arming its timer");
                if let (Some(ctx), Some(slot)) = (ctx_ref.upgrade(), slot_ref.upgrade()) {
                    arm_widget_timer(&ctx, &slot, widget.clone(), delay, fire);
                }
            }
        };
    });
    if let Some(previous) = slot.borrow_mut().replace(timer) {
        previous.cancel();
    }
}

fn cancel_slot(slot: &TimerSlot) {
    if let Some(timer) = slot.borrow_mut().take() {
        timer.cancel();
    }
}

fn slot_armed(slot: &TimerSlot) -> bool {
    slot.borrow().as_ref().is_some_and(|t| t.is_armed())
}

fn file_mtime(path: &str) -> std::io::Result<SystemTime> {
    std::fs::metadata(absolute_path(path))?.modified()
}
