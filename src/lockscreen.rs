//! Lock-screen host: owns the outputs, their widgets and the event loop.

use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::runtime::Handle;
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Configuration;
use crate::math::Vector2D;
use crate::render::SoftwareRenderer;
use crate::resources::{AsyncResourceManager, CompletionReceiver};
use crate::timer::{SystemClock, TimerQueue};
use crate::widgets::image::ImageWidget;
use crate::widgets::{CursorShape, LockContext, Output, RenderData, Widget};

/// Delay before redrawing outputs whose widgets asked for another frame.
const FRAME_INTERVAL: Duration = Duration::from_millis(16);
const BACKGROUND: [u8; 4] = [0, 0, 0, 255];

struct Surface {
    output: Output,
    renderer: SoftwareRenderer,
    widgets: Vec<Rc<RefCell<ImageWidget>>>,
}

pub struct LockScreen {
    ctx: Rc<LockContext>,
    resources: Rc<AsyncResourceManager>,
    completions: CompletionReceiver,
    surfaces: Vec<Surface>,
    next_frame: Option<Instant>,
}

impl LockScreen {
    /// Builds one surface per configured output and configures its widgets.
    pub fn new(config: &Configuration, runtime: Handle) -> Result<Self> {
        let (resources, completions) = AsyncResourceManager::new(runtime);
        let timers = TimerQueue::new(Rc::new(SystemClock));
        let ctx = LockContext::new(resources.clone(), timers);

        let mut surfaces = Vec::with_capacity(config.outputs.len());
        for output_cfg in &config.outputs {
            let output = Output {
                name: output_cfg.name.clone(),
                viewport: output_cfg.viewport(),
            };
            let mut widgets = Vec::new();
            for (idx, image) in config.images.iter().enumerate() {
                if !image.applies_to(&output.name) {
                    continue;
                }
                let widget = ImageWidget::new(ctx.clone());
                widget
                    .borrow_mut()
                    .configure(image, &output)
                    .with_context(|| format!("images[{idx}] on output {}", output.name))?;
                widgets.push(widget);
            }
            info!(output = %output.name, widgets = widgets.len(), "output ready");
            surfaces.push(Surface {
                renderer: SoftwareRenderer::new(output_cfg.width, output_cfg.height),
                output,
                widgets,
            });
        }

        ctx.request_redraw();
        Ok(Self {
            ctx,
            resources,
            completions,
            surfaces,
            next_frame: None,
        })
    }

    pub fn context(&self) -> &Rc<LockContext> {
        &self.ctx
    }

    pub fn widgets(&self, output: &str) -> &[Rc<RefCell<ImageWidget>>] {
        self.surfaces
            .iter()
            .find(|s| s.output.name == output)
            .map(|s| s.widgets.as_slice())
            .unwrap_or_default()
    }

    /// Drives timers, decode completions and redraws until `cancel` fires.
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<()> {
        loop {
            let wake = match (self.ctx.timers.next_deadline(), self.next_frame) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            };
            let sleep = async move {
                match wake {
                    Some(at) => tokio::time::sleep_until(tokio::time::Instant::from_std(at)).await,
                    None => std::future::pending::<()>().await,
                }
            };

            let completions = &mut self.completions;
            let resources = &self.resources;
            select! {
                _ = cancel.cancelled() => {
                    debug!("lock screen loop cancelled");
                    break;
                }
                Some(completion) = completions.recv() => resources.dispatch(completion),
                _ = sleep => {}
            }

            self.tick();
        }
        Ok(())
    }

    /// Applies ready completions, fires due timers and redraws when needed.
    pub fn tick(&mut self) {
        while let Ok(completion) = self.completions.try_recv() {
            self.resources.dispatch(completion);
        }
        self.ctx.timers.fire_due();

        let frame_due = self.next_frame.is_some_and(|at| at <= Instant::now());
        if self.ctx.take_redraw() || frame_due {
            self.next_frame = self
                .render_all()
                .then(|| Instant::now() + FRAME_INTERVAL);
        }
    }

    /// Redraws every output. Returns `true` if any widget wants another frame.
    pub fn render_all(&mut self) -> bool {
        let data = RenderData::default();
        let mut again = false;
        for surface in &mut self.surfaces {
            surface.renderer.begin_frame(BACKGROUND);
            for widget in &surface.widgets {
                match widget.try_borrow_mut() {
                    Ok(mut widget) => again |= widget.draw(&mut surface.renderer, &data),
                    Err(_) => warn!(output = %surface.output.name, "widget busy during draw"),
                }
            }
        }
        again
    }

    /// Hover feedback for the topmost widget under `pos` (Wayland coordinates).
    pub fn pointer_motion(&mut self, output: &str, pos: Vector2D) -> CursorShape {
        self.hit(output, pos)
            .and_then(|widget| widget.borrow_mut().on_hover(pos))
            .unwrap_or(CursorShape::Default)
    }

    pub fn pointer_button(&mut self, output: &str, button: u32, down: bool, pos: Vector2D) {
        if let Some(widget) = self.hit(output, pos) {
            widget.borrow_mut().on_click(button, down, pos);
        }
    }

    fn hit(&self, output: &str, pos: Vector2D) -> Option<Rc<RefCell<ImageWidget>>> {
        self.widgets(output)
            .iter()
            .rev()
            .find(|w| w.borrow().bounding_box().contains(pos))
            .cloned()
    }

    /// Writes the last rendered frame of every output as `<output>.png` into `dir`.
    pub fn snapshot(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create snapshot dir {}", dir.display()))?;
        let mut written = Vec::with_capacity(self.surfaces.len());
        for surface in &self.surfaces {
            let path = dir.join(format!("{}.png", surface.output.name));
            surface
                .renderer
                .screen()
                .save(&path)
                .with_context(|| format!("failed to write snapshot {}", path.display()))?;
            info!(output = %surface.output.name, path = %path.display(), "snapshot written");
            written.push(path);
        }
        Ok(written)
    }

    /// Tears the session down. Widgets skip releasing GPU-side state.
    pub fn shutdown(&mut self) {
        self.ctx.set_terminating();
        self.surfaces.clear();
    }
}
