/// Engine orchestration
///
/// `Engine` owns every piece of CPU-side state (adjustments, masks, curve,
/// LUT, overlay, grain, the source original) and one render backend. It
/// walks the render graph for previews, analysis and exports, and recovers
/// from allocation failures and device loss by rebuilding backend state
/// from its own copies.
///
/// Frame order:
/// 1. global pass into the accumulator
/// 2. per enabled mask: local global pass, coverage, composite, swap
/// 3. glow chain at reduced size (threshold, blur H, blur V)
/// 4. final composite into the frame target

use std::time::Duration;

use image::imageops::{self, FilterType};
use image::RgbaImage;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::analysis::Histogram;
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::export::{self, ExportPreset};
use crate::render::backend::{create_backend, BlurDirection, RenderBackend};
use crate::render::params::{FinalParams, Geometry, GlobalParams, PassContext, ViewOptions};
use crate::render::source::{fit_to_cap, GrainTexture, SourceImage};
use crate::render::targets::{DoubleBuffer, Region, Slot, TargetSizes};
use crate::state::adjustments::GrainStock;
use crate::state::{
    AdjustmentState, CubeLut, CurveCache, CurvePoints, History, Mask, MaskList, MaskShape,
    PartialAdjustments, ToneCurveLut,
};

/// Upper bound on recover-and-retry rounds for one operation
const MAX_RECOVERY_ATTEMPTS: usize = 8;

/// Overlay opacity applied when an overlay is loaded at zero opacity
const DEFAULT_OVERLAY_OPACITY: f32 = 50.0;

/// Lifecycle notifications for subscribers
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    Ready { backend: String },
    Error { message: String },
    ContextLost,
    ContextRestored,
    ImageLoaded {
        width: u32,
        height: u32,
        render_width: u32,
        render_height: u32,
    },
    /// Export progress, 0-100
    ExportProgress(u8),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineStatus {
    Ready,
    /// A fatal error disabled rendering until `reload()`
    Stalled(String),
}

/// Builds a fresh backend; called at startup, after device loss and on reload
pub type BackendFactory = Box<dyn Fn() -> Result<Box<dyn RenderBackend>> + Send>;

/// Backend resources that must be (re)uploaded before the next pass
#[derive(Debug, Clone, Copy)]
struct Uploads {
    source: bool,
    curve: bool,
    lut: bool,
    overlay: bool,
    grain: bool,
}

impl Uploads {
    fn all() -> Self {
        Self {
            source: true,
            curve: true,
            lut: true,
            overlay: true,
            grain: true,
        }
    }
}

/// Result of running the graph up to the final composite
struct GraphOutput {
    base: Slot,
    glow: Option<Slot>,
    params: FinalParams,
}

pub struct Engine {
    config: EngineConfig,
    factory: BackendFactory,
    backend: Box<dyn RenderBackend>,
    status: EngineStatus,
    state: AdjustmentState,
    masks: MaskList,
    view: ViewOptions,
    source: Option<SourceImage>,
    curve: ToneCurveLut,
    curve_cache: CurveCache,
    cube: Option<CubeLut>,
    overlay: Option<RgbaImage>,
    grain: GrainTexture,
    history: History,
    dirty: Uploads,
    pending: bool,
    subscribers: Vec<mpsc::UnboundedSender<EngineEvent>>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("backend", &self.backend.name())
            .field("status", &self.status)
            .field("masks", &self.masks.len())
            .field("pending", &self.pending)
            .finish()
    }
}

impl Engine {
    /// Engine on the backend the config selects
    pub fn new(config: EngineConfig) -> Result<Self> {
        let choice = config.backend;
        Self::with_backend_factory(config, Box::new(move || create_backend(choice)))
    }

    pub fn with_backend_factory(config: EngineConfig, factory: BackendFactory) -> Result<Self> {
        config.validate()?;
        let backend = factory()?;
        info!(backend = %backend.name(), "engine ready");
        let history = History::new(
            config.history_depth,
            Duration::from_millis(config.history_debounce_ms),
        );
        Ok(Self {
            config,
            factory,
            backend,
            status: EngineStatus::Ready,
            state: AdjustmentState::default(),
            masks: MaskList::new(),
            view: ViewOptions::default(),
            source: None,
            curve: ToneCurveLut::identity(),
            curve_cache: CurveCache::new(),
            cube: None,
            overlay: None,
            grain: GrainTexture::generate(0),
            history,
            dirty: Uploads::all(),
            pending: false,
            subscribers: Vec::new(),
        })
    }

    /// Receive lifecycle events. The current status is sent right away.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<EngineEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let first = match &self.status {
            EngineStatus::Ready => EngineEvent::Ready {
                backend: self.backend.name(),
            },
            EngineStatus::Stalled(message) => EngineEvent::Error {
                message: message.clone(),
            },
        };
        if tx.send(first).is_ok() {
            self.subscribers.push(tx);
        }
        rx
    }

    fn emit(&mut self, event: EngineEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn status(&self) -> &EngineStatus {
        &self.status
    }

    pub fn backend_name(&self) -> String {
        self.backend.name()
    }

    pub fn state(&self) -> &AdjustmentState {
        &self.state
    }

    pub fn masks(&self) -> &MaskList {
        &self.masks
    }

    pub fn view(&self) -> &ViewOptions {
        &self.view
    }

    pub fn has_lut(&self) -> bool {
        self.cube.is_some()
    }

    pub fn is_render_pending(&self) -> bool {
        self.pending
    }

    /// Dimensions of the preview frame, after geometry
    pub fn render_size(&self) -> Option<(u32, u32)> {
        let source = self.source.as_ref()?;
        let (w, h) = source.working().dimensions();
        Some(Geometry::from_state(&self.state).output_size(w, h))
    }

    /// Full-resolution frame dimensions, after geometry
    pub fn original_size(&self) -> Option<(u32, u32)> {
        let source = self.source.as_ref()?;
        let (w, h) = source.original().dimensions();
        Some(Geometry::from_state(&self.state).output_size(w, h))
    }

    // ========== Inputs ==========

    /// Load a new source image. Returns the working (render) dimensions.
    pub fn load_image(&mut self, image: RgbaImage) -> Result<(u32, u32)> {
        let cap = self.config.source_cap(self.backend.limits().max_texture_dim);
        let source = SourceImage::new(image, cap)?;
        let (width, height) = source.original().dimensions();
        self.grain = GrainTexture::for_film_seed(source.film_seed());
        self.source = Some(source);
        self.dirty.source = true;
        self.dirty.grain = true;
        self.backend.release_targets();

        self.with_recovery(true, |engine| engine.sync_uploads())?;

        let (render_width, render_height) = self
            .source
            .as_ref()
            .map(|s| s.working().dimensions())
            .ok_or(EngineError::NoSource)?;
        self.history.reset(self.state.clone());
        self.emit(EngineEvent::ImageLoaded {
            width,
            height,
            render_width,
            render_height,
        });
        self.request_render();
        Ok((render_width, render_height))
    }

    /// Set one adjustment by its camelCase name
    pub fn set_adjustment(&mut self, name: &str, value: Value) -> Result<()> {
        self.state.set_field(name, value)?;
        self.commit();
        Ok(())
    }

    /// Set several adjustments at once; nothing changes if any is invalid
    pub fn set_adjustments(&mut self, partial: &PartialAdjustments) -> Result<()> {
        self.state.apply_partial(partial)?;
        self.commit();
        Ok(())
    }

    /// Replace the whole adjustment record
    pub fn set_state(&mut self, state: AdjustmentState) {
        self.state = state;
        self.commit();
    }

    fn commit(&mut self) {
        self.history.push(self.state.clone());
        self.request_render();
    }

    /// Replace every mask; rejected as a whole if any local adjustment is invalid
    pub fn set_masks(&mut self, masks: Vec<Mask>) -> Result<()> {
        for mask in &masks {
            self.check_mask(mask)?;
        }
        self.masks.replace(masks);
        self.request_render();
        Ok(())
    }

    pub fn add_mask(&mut self, shape: MaskShape) -> u32 {
        let id = self.masks.add(shape);
        self.request_render();
        id
    }

    pub fn update_mask(&mut self, mask: Mask) -> Result<()> {
        self.check_mask(&mask)?;
        let slot = self
            .masks
            .get_mut(mask.id)
            .ok_or(EngineError::UnknownMask(mask.id))?;
        *slot = mask;
        self.request_render();
        Ok(())
    }

    fn check_mask(&self, mask: &Mask) -> Result<()> {
        self.state.merged(&mask.adjustments).map(drop).map_err(|e| {
            warn!(mask = mask.id, error = %e, "rejected mask adjustments");
            e
        })
    }

    pub fn remove_mask(&mut self, id: u32) -> Result<Mask> {
        let removed = self.masks.remove(id).ok_or(EngineError::UnknownMask(id))?;
        self.request_render();
        Ok(removed)
    }

    /// Select the mask being edited; `None` clears the selection
    pub fn set_active_mask(&mut self, id: Option<u32>) -> Result<()> {
        if !self.masks.set_active(id) {
            return Err(EngineError::UnknownMask(id.unwrap_or_default()));
        }
        Ok(())
    }

    /// Install a 4x256 tone curve table (master, R, G, B)
    pub fn update_tone_curve_lut(&mut self, bytes: &[u8]) -> Result<()> {
        self.curve = ToneCurveLut::from_bytes(bytes)?;
        self.dirty.curve = true;
        self.request_render();
        Ok(())
    }

    /// Fit control points into the tone curve table
    pub fn set_tone_curve(&mut self, points: &CurvePoints) -> Result<()> {
        self.curve = self.curve_cache.get(points)?.clone();
        self.dirty.curve = true;
        self.request_render();
        Ok(())
    }

    /// Install a 3-D LUT from raw RGB floats. The previous LUT stays on error.
    pub fn load_lut(&mut self, data: Vec<f32>, size: u32) -> Result<()> {
        let max = self.backend.limits().max_volume_dim;
        if size > max {
            return Err(EngineError::InvalidLut(format!(
                "size {size} exceeds the device 3-D texture limit {max}"
            )));
        }
        let lut = CubeLut::new(data, size)?;
        self.install_lut(lut);
        Ok(())
    }

    /// Parse and install a `.cube` file
    pub fn load_cube_file(&mut self, text: &str) -> Result<()> {
        let lut = CubeLut::parse_cube(text)?;
        let max = self.backend.limits().max_volume_dim;
        if lut.size() > max {
            return Err(EngineError::InvalidLut(format!(
                "size {} exceeds the device 3-D texture limit {max}",
                lut.size()
            )));
        }
        self.install_lut(lut);
        Ok(())
    }

    fn install_lut(&mut self, lut: CubeLut) {
        info!(size = lut.size(), "LUT loaded");
        self.cube = Some(lut);
        self.dirty.lut = true;
        self.request_render();
    }

    pub fn clear_lut(&mut self) {
        self.cube = None;
        self.dirty.lut = true;
        self.request_render();
    }

    /// Install an overlay texture; a zero opacity is raised to a usable default
    pub fn load_overlay(&mut self, image: RgbaImage) -> Result<()> {
        if image.width() == 0 || image.height() == 0 {
            return Err(EngineError::InvalidAdjustment {
                name: "overlay".into(),
                reason: "empty image".into(),
            });
        }
        let max = self.backend.limits().max_texture_dim;
        let (w, h) = fit_to_cap(image.width(), image.height(), max);
        let image = if (w, h) == image.dimensions() {
            image
        } else {
            imageops::resize(&image, w, h, FilterType::Triangle)
        };
        self.overlay = Some(image);
        self.dirty.overlay = true;
        if self.state.overlay_opacity == 0.0 {
            self.state.overlay_opacity = DEFAULT_OVERLAY_OPACITY;
            self.history.push(self.state.clone());
        }
        self.request_render();
        Ok(())
    }

    pub fn clear_overlay(&mut self) {
        self.overlay = None;
        self.dirty.overlay = true;
        self.request_render();
    }

    pub fn apply_preset(&mut self, preset: &PartialAdjustments) -> Result<()> {
        self.apply_preset_with_strength(preset, 1.0)
    }

    /// Blend from the current state towards the preset result by `strength` (0..1)
    pub fn apply_preset_with_strength(
        &mut self,
        preset: &PartialAdjustments,
        strength: f32,
    ) -> Result<()> {
        let mut target = self.state.with_preset(preset)?;
        if !preset.contains_key("grainStock") {
            if let Some(Value::String(name)) = preset.get("name") {
                target.grain_stock = GrainStock::detect(name);
            }
        }
        self.state = AdjustmentState::interpolate(&self.state, &target, strength)?;
        debug!(strength, "preset applied");
        self.commit();
        Ok(())
    }

    pub fn set_view(&mut self, view: ViewOptions) {
        self.view = view;
        self.request_render();
    }

    pub fn undo(&mut self) -> bool {
        match self.history.undo() {
            Some(state) => {
                self.state = state;
                self.request_render();
                true
            }
            None => false,
        }
    }

    pub fn redo(&mut self) -> bool {
        match self.history.redo() {
            Some(state) => {
                self.state = state;
                self.request_render();
                true
            }
            None => false,
        }
    }

    // ========== Rendering ==========

    /// Mark a frame as needed; repeated requests collapse into one render
    pub fn request_render(&mut self) {
        self.pending = true;
    }

    /// Render the pending frame, if any
    pub fn flush(&mut self) -> Result<Option<RgbaImage>> {
        if !self.pending || self.source.is_none() {
            return Ok(None);
        }
        self.pending = false;
        self.render().map(Some)
    }

    /// Render the preview frame now
    pub fn render(&mut self) -> Result<RgbaImage> {
        self.with_recovery(true, |engine| {
            let (width, height) = engine.render_size().ok_or(EngineError::NoSource)?;
            engine.sync_uploads()?;
            let view = engine.view;
            let output = engine.run_graph(width, height, &view)?;
            engine
                .backend
                .render_final(&output.params, output.base, output.glow, Slot::Frame)?;
            engine.read_image(Slot::Frame, width, height)
        })
    }

    /// Re-run the final composite at `size x size` and return its RGBA bytes.
    /// View switches are not applied.
    pub fn analysis_buffer(&mut self, size: u32) -> Result<Vec<u8>> {
        let size = size.max(1);
        self.with_recovery(true, |engine| {
            let (width, height) = engine.render_size().ok_or(EngineError::NoSource)?;
            engine.sync_uploads()?;
            let output = engine.run_graph(width, height, &ViewOptions::default())?;
            engine.backend.ensure_analysis_target(size)?;
            let params = output.params.resized(size, size);
            engine
                .backend
                .render_final(&params, output.base, output.glow, Slot::Analysis)?;
            engine.backend.read_region(Slot::Analysis, Region::full(size, size))
        })
    }

    /// Histogram of the analysis buffer at the configured size
    pub fn histogram(&mut self) -> Result<Histogram> {
        let bytes = self.analysis_buffer(self.config.analysis_size)?;
        Ok(Histogram::from_rgba(&bytes))
    }

    /// State the graph renders: geometry only when showing the original
    fn render_state(&self, view: &ViewOptions) -> AdjustmentState {
        if view.show_original {
            AdjustmentState {
                rotate_quarters: self.state.rotate_quarters,
                flip_x: self.state.flip_x,
                flip_y: self.state.flip_y,
                ..Default::default()
            }
        } else {
            self.state.clone()
        }
    }

    /// Run every pass up to, not including, the final composite
    fn run_graph(&mut self, width: u32, height: u32, view: &ViewOptions) -> Result<GraphOutput> {
        let film_seed = self
            .source
            .as_ref()
            .map(|s| s.film_seed())
            .ok_or(EngineError::NoSource)?;
        let state = self.render_state(view);

        let sizes = TargetSizes::new(width, height, &self.config);
        if self.backend.ensure_targets(sizes)? {
            debug!(width, height, "render targets allocated");
        }

        let ctx = PassContext {
            width,
            height,
            curve: !self.curve.is_identity(),
            lut: self.cube.is_some(),
            overlay: self.overlay.is_some(),
        };
        let mut buffer = DoubleBuffer::new();
        self.backend
            .render_global(&GlobalParams::new(&state, ctx), buffer.current())?;

        if !view.show_original {
            for mask in self.masks.enabled() {
                if mask.adjustments.is_empty() {
                    continue;
                }
                let local = state.merged(&mask.adjustments)?;
                self.backend
                    .render_global(&GlobalParams::new(&local, ctx), Slot::Local)?;
                self.backend.render_mask(mask, Slot::Mask)?;
                self.backend.composite_mask(
                    buffer.current(),
                    Slot::Local,
                    Slot::Mask,
                    buffer.scratch(),
                )?;
                buffer.swap();
            }
        }

        let params = FinalParams::new(&state, view, film_seed, width, height);
        let glow = match &params.glow {
            Some(glow) => {
                self.backend.threshold(glow, buffer.current(), Slot::Ping)?;
                self.backend
                    .blur(BlurDirection::Horizontal, Slot::Ping, Slot::Pong)?;
                self.backend
                    .blur(BlurDirection::Vertical, Slot::Pong, Slot::Ping)?;
                Some(Slot::Ping)
            }
            None => None,
        };

        Ok(GraphOutput {
            base: buffer.current(),
            glow,
            params,
        })
    }

    fn read_image(&mut self, slot: Slot, width: u32, height: u32) -> Result<RgbaImage> {
        let bytes = self.backend.read_region(slot, Region::full(width, height))?;
        RgbaImage::from_raw(width, height, bytes).ok_or(EngineError::MissingTarget(slot.label()))
    }

    /// Push every dirty CPU-side resource to the backend
    fn sync_uploads(&mut self) -> Result<()> {
        if self.dirty.source {
            if let Some(source) = &self.source {
                self.backend.upload_source(source.working())?;
            }
            self.dirty.source = false;
        }
        if self.dirty.curve {
            self.backend.upload_curve(&self.curve)?;
            self.dirty.curve = false;
        }
        if self.dirty.lut {
            self.backend.upload_lut(self.cube.as_ref())?;
            self.dirty.lut = false;
        }
        if self.dirty.overlay {
            self.backend.upload_overlay(self.overlay.as_ref())?;
            self.dirty.overlay = false;
        }
        if self.dirty.grain {
            self.backend.upload_grain(&self.grain)?;
            self.dirty.grain = false;
        }
        Ok(())
    }

    // ========== Recovery ==========

    fn ensure_running(&self) -> Result<()> {
        match &self.status {
            EngineStatus::Ready => Ok(()),
            EngineStatus::Stalled(reason) => Err(EngineError::Stalled(reason.clone())),
        }
    }

    /// Run `op`, recovering from device loss and (when `shrink` is set)
    /// allocation failure before retrying. Shader failures stall the engine.
    fn with_recovery<T, F>(&mut self, shrink: bool, mut op: F) -> Result<T>
    where
        F: FnMut(&mut Self) -> Result<T>,
    {
        self.ensure_running()?;
        let mut attempts = 0;
        loop {
            let err = match op(&mut *self) {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };
            attempts += 1;
            if attempts > MAX_RECOVERY_ATTEMPTS {
                error!(error = %err, attempts, "giving up after repeated recovery");
                return Err(err);
            }
            match err {
                EngineError::ResourceExhausted { .. } if shrink => self.shrink_source(err)?,
                EngineError::DeviceLost(ref reason) => {
                    let reason = reason.clone();
                    self.restore_context(&reason)?;
                }
                EngineError::ShaderBuild { .. } => {
                    self.stall(&err);
                    return Err(err);
                }
                other => return Err(other),
            }
        }
    }

    /// Halve the working source; `err` is returned once the floor is reached
    fn shrink_source(&mut self, err: EngineError) -> Result<()> {
        let min_cap = self.config.min_cap;
        let Some(source) = self.source.as_mut() else {
            return Err(err);
        };
        let (w, h) = source.working().dimensions();
        let longest = w.max(h);
        if longest <= min_cap {
            error!(error = %err, min_cap, "allocation failed at the minimum cap");
            return Err(err);
        }
        let cap = (longest / 2).max(min_cap);
        warn!(error = %err, cap, "allocation failed, shrinking source");
        source.set_cap(cap);
        self.backend.release_targets();
        self.dirty.source = true;
        Ok(())
    }

    /// Replace a lost backend and re-upload everything from CPU copies
    fn restore_context(&mut self, reason: &str) -> Result<()> {
        warn!(reason, "device lost, rebuilding backend");
        self.emit(EngineEvent::ContextLost);
        let backend = match (self.factory)() {
            Ok(backend) => backend,
            Err(e) => {
                error!(error = %e, "backend re-creation failed");
                self.emit(EngineEvent::Error {
                    message: e.to_string(),
                });
                return Err(e);
            }
        };
        self.backend = backend;
        self.dirty = Uploads::all();
        self.sync_uploads()?;
        info!(backend = %self.backend.name(), "context restored");
        self.emit(EngineEvent::ContextRestored);
        self.request_render();
        Ok(())
    }

    fn stall(&mut self, err: &EngineError) {
        error!(error = %err, "rendering stalled");
        self.status = EngineStatus::Stalled(err.to_string());
        self.emit(EngineEvent::Error {
            message: err.to_string(),
        });
    }

    /// Rebuild the backend after a fatal error and resume rendering
    pub fn reload(&mut self) -> Result<()> {
        self.backend = (self.factory)()?;
        self.dirty = Uploads::all();
        self.sync_uploads()?;
        self.status = EngineStatus::Ready;
        info!(backend = %self.backend.name(), "engine reloaded");
        let backend = self.backend.name();
        self.emit(EngineEvent::Ready { backend });
        self.request_render();
        Ok(())
    }

    // ========== Export ==========

    /// Render the full graph at `width x height` (output frame dimensions)
    /// from the full-resolution original.
    ///
    /// Large frames are read back tile by tile. The preview source is
    /// restored afterwards and a preview render is requested.
    pub async fn export_final(&mut self, width: u32, height: u32) -> Result<RgbaImage> {
        self.ensure_running()?;
        if width == 0 || height == 0 {
            return Err(EngineError::ResourceExhausted {
                what: "export frame",
                width,
                height,
            });
        }
        info!(width, height, "export started");
        let mut retried = false;
        loop {
            let result = self.export_pass(width, height).await;
            self.restore_preview();
            match result {
                Ok(image) => {
                    self.emit(EngineEvent::ExportProgress(100));
                    info!(width, height, "export finished");
                    return Ok(image);
                }
                Err(EngineError::DeviceLost(reason)) if !retried => {
                    retried = true;
                    self.restore_context(&reason)?;
                }
                Err(e) => {
                    if matches!(e, EngineError::ShaderBuild { .. }) {
                        self.stall(&e);
                    }
                    return Err(e);
                }
            }
        }
    }

    /// Export at a named resolution and encode with the configured format
    pub async fn export(&mut self, preset: ExportPreset) -> Result<Vec<u8>> {
        let (width, height) = self.original_size().ok_or(EngineError::NoSource)?;
        let (width, height) = preset.resolve(width, height);
        let image = self.export_final(width, height).await?;
        export::encode(&image, self.config.export_format, self.config.jpeg_quality)
    }

    async fn export_pass(&mut self, width: u32, height: u32) -> Result<RgbaImage> {
        self.emit(EngineEvent::ExportProgress(0));
        let (source_width, source_height) =
            Geometry::from_state(&self.state).source_size(width, height);
        let image = self
            .source
            .as_ref()
            .map(|s| s.resized(source_width, source_height))
            .ok_or(EngineError::NoSource)?;
        self.sync_uploads()?;
        self.backend.upload_source(&image)?;
        drop(image);
        self.dirty.source = true;
        self.emit(EngineEvent::ExportProgress(10));
        tokio::task::yield_now().await;

        let output = self.run_graph(width, height, &ViewOptions::default())?;
        self.emit(EngineEvent::ExportProgress(30));
        tokio::task::yield_now().await;
        self.backend
            .render_final(&output.params, output.base, output.glow, Slot::Frame)?;
        self.emit(EngineEvent::ExportProgress(40));
        tokio::task::yield_now().await;

        if !export::needs_tiling(width, height, self.config.safe_export_pixels) {
            return self.read_image(Slot::Frame, width, height);
        }

        let tiles = export::tile_plan(width, height, self.config.tile_size);
        let count = tiles.len();
        debug!(count, tile = self.config.tile_size, "tiled readback");
        let mut frame = RgbaImage::new(width, height);
        for (index, tile) in tiles.into_iter().enumerate() {
            let bytes = self.backend.read_region(Slot::Frame, tile)?;
            export::blit_tile(&mut frame, tile, &bytes);
            let progress = 40 + (55 * (index + 1) / count) as u8;
            self.emit(EngineEvent::ExportProgress(progress));
            tokio::task::yield_now().await;
        }
        Ok(frame)
    }

    /// Drop export-sized targets and schedule the preview source upload
    fn restore_preview(&mut self) {
        self.backend.release_targets();
        self.dirty.source = true;
        self.request_render();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::backend::{BackendKind, DeviceLimits};
    use crate::render::cpu::CpuBackend;
    use crate::render::params::GlowParams;
    use approx::assert_abs_diff_eq;
    use image::Rgba;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone, Copy)]
    enum Fault {
        Lost,
        Shader,
        Validation,
    }

    /// CPU backend that fails the next global passes on demand
    struct Scripted {
        inner: CpuBackend,
        faults: Arc<Mutex<Vec<Fault>>>,
        finals: Arc<AtomicUsize>,
    }

    impl Scripted {
        fn fault(&self) -> Result<()> {
            match self.faults.lock().unwrap().pop() {
                Some(Fault::Lost) => Err(EngineError::DeviceLost("injected".into())),
                Some(Fault::Shader) => Err(EngineError::ShaderBuild {
                    stage: "global",
                    message: "injected".into(),
                }),
                Some(Fault::Validation) => Err(EngineError::GpuValidation("injected".into())),
                None => Ok(()),
            }
        }
    }

    impl RenderBackend for Scripted {
        fn kind(&self) -> BackendKind {
            self.inner.kind()
        }
        fn name(&self) -> String {
            "scripted".into()
        }
        fn limits(&self) -> DeviceLimits {
            self.inner.limits()
        }
        fn upload_source(&mut self, image: &RgbaImage) -> Result<()> {
            self.inner.upload_source(image)
        }
        fn upload_curve(&mut self, curve: &ToneCurveLut) -> Result<()> {
            self.inner.upload_curve(curve)
        }
        fn upload_lut(&mut self, lut: Option<&CubeLut>) -> Result<()> {
            self.inner.upload_lut(lut)
        }
        fn upload_overlay(&mut self, image: Option<&RgbaImage>) -> Result<()> {
            self.inner.upload_overlay(image)
        }
        fn upload_grain(&mut self, grain: &GrainTexture) -> Result<()> {
            self.inner.upload_grain(grain)
        }
        fn ensure_targets(&mut self, sizes: TargetSizes) -> Result<bool> {
            self.inner.ensure_targets(sizes)
        }
        fn ensure_analysis_target(&mut self, size: u32) -> Result<bool> {
            self.inner.ensure_analysis_target(size)
        }
        fn render_global(&mut self, params: &GlobalParams, dst: Slot) -> Result<()> {
            self.fault()?;
            self.inner.render_global(params, dst)
        }
        fn render_mask(&mut self, mask: &Mask, dst: Slot) -> Result<()> {
            self.inner.render_mask(mask, dst)
        }
        fn composite_mask(&mut self, base: Slot, local: Slot, coverage: Slot, dst: Slot) -> Result<()> {
            self.inner.composite_mask(base, local, coverage, dst)
        }
        fn threshold(&mut self, params: &GlowParams, src: Slot, dst: Slot) -> Result<()> {
            self.inner.threshold(params, src, dst)
        }
        fn blur(&mut self, direction: BlurDirection, src: Slot, dst: Slot) -> Result<()> {
            self.inner.blur(direction, src, dst)
        }
        fn render_final(
            &mut self,
            params: &FinalParams,
            base: Slot,
            glow: Option<Slot>,
            dst: Slot,
        ) -> Result<()> {
            self.finals.fetch_add(1, Ordering::SeqCst);
            self.inner.render_final(params, base, glow, dst)
        }
        fn read_region(&mut self, slot: Slot, region: Region) -> Result<Vec<u8>> {
            self.inner.read_region(slot, region)
        }
        fn release_targets(&mut self) {
            self.inner.release_targets()
        }
    }

    struct Harness {
        faults: Arc<Mutex<Vec<Fault>>>,
        finals: Arc<AtomicUsize>,
        created: Arc<AtomicUsize>,
    }

    fn scripted_engine(config: EngineConfig) -> (Engine, Harness) {
        let harness = Harness {
            faults: Arc::new(Mutex::new(Vec::new())),
            finals: Arc::new(AtomicUsize::new(0)),
            created: Arc::new(AtomicUsize::new(0)),
        };
        let (faults, finals, created) = (
            harness.faults.clone(),
            harness.finals.clone(),
            harness.created.clone(),
        );
        let factory: BackendFactory = Box::new(move || {
            created.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(Scripted {
                inner: CpuBackend::new(),
                faults: faults.clone(),
                finals: finals.clone(),
            }))
        });
        let engine = Engine::with_backend_factory(config, factory).unwrap();
        (engine, harness)
    }

    fn cpu_engine(config: EngineConfig) -> Engine {
        Engine::with_backend_factory(config, Box::new(|| Ok(Box::new(CpuBackend::new())))).unwrap()
    }

    fn gradient(width: u32, height: u32) -> RgbaImage {
        RgbaImage::from_fn(width, height, |x, y| {
            Rgba([(x * 255 / width) as u8, (y * 255 / height) as u8, 96, 255])
        })
    }

    fn partial(value: Value) -> PartialAdjustments {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    fn mean_luma(image: &RgbaImage, x0: u32, y0: u32, size: u32) -> f32 {
        let mut sum = 0.0;
        for y in y0..y0 + size {
            for x in x0..x0 + size {
                let p = image.get_pixel(x, y);
                sum += (p[0] as f32 + p[1] as f32 + p[2] as f32) / 3.0;
            }
        }
        sum / (size * size) as f32
    }

    #[test]
    fn test_default_render_is_identity() {
        let mut engine = cpu_engine(EngineConfig::default());
        let image = gradient(64, 48);
        assert_eq!(engine.load_image(image.clone()).unwrap(), (64, 48));
        let frame = engine.flush().unwrap().unwrap();
        assert_eq!(frame, image);
    }

    #[test]
    fn test_flush_without_image_renders_nothing() {
        let mut engine = cpu_engine(EngineConfig::default());
        engine.request_render();
        assert!(engine.flush().unwrap().is_none());
        assert!(matches!(engine.render(), Err(EngineError::NoSource)));
    }

    #[test]
    fn test_render_requests_coalesce() {
        let (mut engine, harness) = scripted_engine(EngineConfig::default());
        engine.load_image(gradient(32, 32)).unwrap();
        engine.set_adjustment("exposure", json!(0.5)).unwrap();
        engine.set_adjustment("contrast", json!(10.0)).unwrap();
        engine.set_adjustment("vignette", json!(20.0)).unwrap();

        assert!(engine.flush().unwrap().is_some());
        assert!(engine.flush().unwrap().is_none());
        assert_eq!(harness.finals.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_bad_adjustment_keeps_state() {
        let mut engine = cpu_engine(EngineConfig::default());
        assert!(matches!(
            engine.set_adjustment("noSuchKnob", json!(1.0)),
            Err(EngineError::UnknownAdjustment(_))
        ));
        assert!(engine
            .set_adjustments(&partial(json!({ "exposure": 1.0, "contrast": "high" })))
            .is_err());
        assert_eq!(engine.state(), &AdjustmentState::default());
    }

    #[test]
    fn test_exposure_brightens_frame() {
        let mut engine = cpu_engine(EngineConfig::default());
        let image = RgbaImage::from_pixel(16, 16, Rgba([100, 100, 100, 255]));
        engine.load_image(image).unwrap();
        engine.set_adjustment("exposure", json!(1.0)).unwrap();
        let frame = engine.flush().unwrap().unwrap();
        assert!(frame.get_pixel(8, 8)[0] > 200);
    }

    #[test]
    fn test_empty_mask_is_a_no_op() {
        let mut engine = cpu_engine(EngineConfig::default());
        engine.load_image(gradient(48, 32)).unwrap();
        engine.set_adjustment("exposure", json!(0.3)).unwrap();
        let plain = engine.render().unwrap();

        let id = engine.add_mask(MaskShape::Radial {
            center: [0.5, 0.5],
            radius: 0.3,
        });
        assert_eq!(engine.masks().active_id(), Some(id));
        assert_eq!(engine.render().unwrap(), plain);

        // A disabled mask with adjustments is skipped too
        let mut mask = engine.masks().get(id).unwrap().clone();
        mask.adjustments = partial(json!({ "exposure": -2.0 }));
        mask.enabled = false;
        engine.update_mask(mask).unwrap();
        assert_eq!(engine.render().unwrap(), plain);
    }

    #[test]
    fn test_invalid_mask_adjustments_are_rejected() {
        let mut engine = cpu_engine(EngineConfig::default());
        engine.load_image(gradient(32, 24)).unwrap();
        let plain = engine.render().unwrap();

        let mut bad = Mask::new(
            1,
            MaskShape::Radial {
                center: [0.5, 0.5],
                radius: 0.4,
            },
        );
        bad.adjustments = partial(json!({ "grainStock": "polaroid" }));
        assert!(engine.set_masks(vec![bad.clone()]).is_err());
        assert!(engine.masks().is_empty());

        let id = engine.add_mask(MaskShape::Radial {
            center: [0.5, 0.5],
            radius: 0.4,
        });
        bad.id = id;
        assert!(engine.update_mask(bad).is_err());
        assert!(engine.masks().get(id).unwrap().adjustments.is_empty());
        assert_eq!(engine.flush().unwrap().unwrap(), plain);
    }

    #[test]
    fn test_mask_geometry_fields_are_ignored() {
        let mut engine = cpu_engine(EngineConfig::default());
        engine.load_image(gradient(40, 30)).unwrap();
        let plain = engine.render().unwrap();

        let mut mask = Mask::new(
            1,
            MaskShape::Radial {
                center: [0.5, 0.5],
                radius: 0.5,
            },
        );
        mask.adjustments = partial(json!({ "rotateQuarters": 1, "flipX": true }));
        engine.set_masks(vec![mask.clone()]).unwrap();
        assert_eq!(engine.flush().unwrap().unwrap(), plain);

        mask.adjustments = partial(json!({ "rotateQuarters": 0.5 }));
        engine.set_masks(vec![mask]).unwrap();
        assert_eq!(engine.flush().unwrap().unwrap(), plain);
    }

    #[test]
    fn test_mask_crud_errors() {
        let mut engine = cpu_engine(EngineConfig::default());
        assert!(matches!(engine.remove_mask(7), Err(EngineError::UnknownMask(7))));
        assert!(engine.set_active_mask(Some(3)).is_err());
        let id = engine.add_mask(MaskShape::Linear {
            start: [0.0, 0.0],
            end: [0.0, 1.0],
        });
        engine.set_active_mask(None).unwrap();
        assert_eq!(engine.masks().active_id(), None);
        assert_eq!(engine.remove_mask(id).unwrap().id, id);
        assert!(engine.masks().is_empty());
    }

    #[test]
    fn test_preset_strength_interpolates() {
        let mut engine = cpu_engine(EngineConfig::default());
        engine.set_adjustment("rotateQuarters", json!(1)).unwrap();
        engine.set_adjustment("contrast", json!(20.0)).unwrap();

        let preset = partial(json!({ "name": "Velvia 50", "exposure": 2.0, "fade": 40.0 }));
        engine.apply_preset_with_strength(&preset, 0.5).unwrap();

        let state = engine.state();
        assert_abs_diff_eq!(state.exposure, 1.0);
        assert_abs_diff_eq!(state.fade, 20.0);
        assert_abs_diff_eq!(state.contrast, 10.0);
        assert_eq!(state.rotate_quarters, 1);

        engine.apply_preset(&preset).unwrap();
        assert_abs_diff_eq!(engine.state().exposure, 2.0);
        assert_eq!(engine.state().grain_stock, GrainStock::detect("Velvia 50"));
        assert_eq!(engine.state().rotate_quarters, 1);
    }

    #[test]
    fn test_undo_redo_restores_states() {
        let mut engine = cpu_engine(EngineConfig {
            history_debounce_ms: 0,
            ..Default::default()
        });
        engine.set_adjustment("exposure", json!(1.0)).unwrap();
        engine.set_adjustment("exposure", json!(2.0)).unwrap();
        assert!(engine.undo());
        assert_abs_diff_eq!(engine.state().exposure, 1.0);
        assert!(engine.undo());
        assert_abs_diff_eq!(engine.state().exposure, 0.0);
        assert!(!engine.undo());
        assert!(engine.redo());
        assert_abs_diff_eq!(engine.state().exposure, 1.0);
    }

    #[test]
    fn test_invalid_lut_keeps_previous() {
        let mut engine = cpu_engine(EngineConfig::default());
        let identity = CubeLut::identity(2).unwrap();
        engine.load_lut(identity.data().to_vec(), 2).unwrap();
        assert!(engine.has_lut());

        assert!(matches!(
            engine.load_lut(vec![0.0; 10], 2),
            Err(EngineError::InvalidLut(_))
        ));
        assert!(matches!(
            engine.load_lut(vec![0.0; 3], 512),
            Err(EngineError::InvalidLut(_))
        ));
        assert!(engine.has_lut());
        assert!(engine.update_tone_curve_lut(&[0u8; 100]).is_err());
    }

    #[test]
    fn test_overlay_sets_default_opacity() {
        let mut engine = cpu_engine(EngineConfig::default());
        engine
            .load_overlay(RgbaImage::from_pixel(4, 4, Rgba([255, 0, 0, 255])))
            .unwrap();
        assert_eq!(engine.state().overlay_opacity, DEFAULT_OVERLAY_OPACITY);
    }

    #[test]
    fn test_show_original_ignores_adjustments() {
        let mut engine = cpu_engine(EngineConfig::default());
        let image = gradient(40, 30);
        engine.load_image(image.clone()).unwrap();
        engine.set_adjustment("exposure", json!(1.5)).unwrap();
        engine.set_adjustment("grainShadow", json!(60.0)).unwrap();
        engine.set_view(ViewOptions {
            show_original: true,
            ..Default::default()
        });
        assert_eq!(engine.flush().unwrap().unwrap(), image);
    }

    #[test]
    fn test_device_loss_is_recovered() {
        let (mut engine, harness) = scripted_engine(EngineConfig::default());
        let mut events = engine.subscribe();
        engine.load_image(gradient(32, 24)).unwrap();
        engine.set_adjustment("exposure", json!(0.4)).unwrap();
        let expected = engine.render().unwrap();

        harness.faults.lock().unwrap().push(Fault::Lost);
        engine.request_render();
        let frame = engine.flush().unwrap().unwrap();
        assert_eq!(frame, expected);
        assert_eq!(harness.created.load(Ordering::SeqCst), 2);

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        assert!(matches!(seen[0], EngineEvent::Ready { .. }));
        assert!(seen.contains(&EngineEvent::ContextLost));
        assert!(seen.contains(&EngineEvent::ContextRestored));
    }

    #[test]
    fn test_shader_failure_stalls_until_reload() {
        let (mut engine, harness) = scripted_engine(EngineConfig::default());
        engine.load_image(gradient(16, 16)).unwrap();
        harness.faults.lock().unwrap().push(Fault::Shader);

        assert!(matches!(engine.flush(), Err(EngineError::ShaderBuild { .. })));
        assert!(matches!(engine.status(), EngineStatus::Stalled(_)));
        engine.request_render();
        assert!(matches!(engine.flush(), Err(EngineError::Stalled(_))));

        engine.reload().unwrap();
        assert_eq!(engine.status(), &EngineStatus::Ready);
        assert!(engine.flush().unwrap().is_some());
    }

    #[test]
    fn test_validation_error_is_not_retried() {
        let (mut engine, harness) = scripted_engine(EngineConfig::default());
        let mut events = engine.subscribe();
        engine.load_image(gradient(16, 16)).unwrap();
        harness.faults.lock().unwrap().push(Fault::Validation);

        assert!(matches!(engine.flush(), Err(EngineError::GpuValidation(_))));
        assert_eq!(harness.created.load(Ordering::SeqCst), 1);
        assert_eq!(engine.status(), &EngineStatus::Ready);
        while let Ok(event) = events.try_recv() {
            assert_ne!(event, EngineEvent::ContextLost);
        }

        engine.request_render();
        assert!(engine.flush().unwrap().is_some());
    }

    #[test]
    fn test_allocation_failure_shrinks_source() {
        let config = EngineConfig::default();
        let factory: BackendFactory =
            Box::new(|| Ok(Box::new(CpuBackend::with_pixel_budget(300_000))));
        let mut engine = Engine::with_backend_factory(config, factory).unwrap();
        assert_eq!(engine.load_image(gradient(1000, 800)).unwrap(), (500, 400));
        let frame = engine.flush().unwrap().unwrap();
        assert_eq!(frame.dimensions(), (500, 400));
    }

    #[test]
    fn test_allocation_failure_at_floor_is_reported() {
        let factory: BackendFactory =
            Box::new(|| Ok(Box::new(CpuBackend::with_pixel_budget(1000))));
        let mut engine = Engine::with_backend_factory(EngineConfig::default(), factory).unwrap();
        assert!(matches!(
            engine.load_image(gradient(400, 300)),
            Err(EngineError::ResourceExhausted { .. })
        ));
    }

    #[test]
    fn test_analysis_buffer_is_square() {
        let mut engine = cpu_engine(EngineConfig::default());
        engine.load_image(gradient(80, 40)).unwrap();
        let bytes = engine.analysis_buffer(32).unwrap();
        assert_eq!(bytes.len(), 32 * 32 * 4);
        let histogram = engine.histogram().unwrap();
        assert_eq!(histogram.total(), 256 * 256);
    }

    #[test]
    fn test_rotation_swaps_render_size() {
        let mut engine = cpu_engine(EngineConfig::default());
        engine.load_image(gradient(60, 20)).unwrap();
        engine.set_adjustment("rotateQuarters", json!(1)).unwrap();
        assert_eq!(engine.render_size(), Some((20, 60)));
        assert_eq!(engine.flush().unwrap().unwrap().dimensions(), (20, 60));
    }

    fn look(engine: &mut Engine) {
        engine
            .set_adjustments(&partial(json!({
                "exposure": 0.3,
                "grainGlobal": 1.0,
                "grainShadow": 40.0,
                "grainHighlight": 20.0,
                "bloomStrength": 30.0,
                "bloomThreshold": 60.0,
                "dust": 20.0
            })))
            .unwrap();
    }

    #[tokio::test]
    async fn test_tiled_export_matches_whole() {
        let image = gradient(300, 200);

        let mut whole = cpu_engine(EngineConfig::default());
        whole.load_image(image.clone()).unwrap();
        look(&mut whole);
        let expected = whole.export_final(150, 100).await.unwrap();

        let mut tiled = cpu_engine(EngineConfig {
            safe_export_pixels: 1000,
            tile_size: 32,
            ..Default::default()
        });
        let mut events = tiled.subscribe();
        tiled.load_image(image).unwrap();
        look(&mut tiled);
        let frame = tiled.export_final(150, 100).await.unwrap();
        assert_eq!(frame, expected);

        let mut progress = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let EngineEvent::ExportProgress(p) = event {
                progress.push(p);
            }
        }
        assert_eq!(progress.first(), Some(&0));
        assert_eq!(progress.last(), Some(&100));
        assert!(progress.windows(2).all(|w| w[0] <= w[1]));

        // Preview comes back at the working size afterwards
        assert!(tiled.is_render_pending());
        assert_eq!(tiled.flush().unwrap().unwrap().dimensions(), (300, 200));
    }

    #[tokio::test]
    async fn test_export_ignores_view_options() {
        let image = RgbaImage::from_pixel(64, 48, Rgba([255, 255, 255, 255]));
        let mut plain = cpu_engine(EngineConfig::default());
        plain.load_image(image.clone()).unwrap();
        plain.set_adjustment("exposure", json!(-1.0)).unwrap();
        let expected = plain.export_final(64, 48).await.unwrap();
        let expected_analysis = plain.analysis_buffer(16).unwrap();

        let mut engine = cpu_engine(EngineConfig::default());
        engine.load_image(image).unwrap();
        engine.set_adjustment("exposure", json!(-1.0)).unwrap();
        engine.set_view(ViewOptions {
            split_position: Some(0.5),
            show_clipping: true,
            show_original: true,
        });
        let frame = engine.export_final(64, 48).await.unwrap();
        assert_eq!(frame, expected);
        assert!(frame.get_pixel(60, 10)[0] < 250);
        assert_ne!(frame.get_pixel(60, 10), &Rgba([255, 0, 0, 255]));

        let bytes = engine.analysis_buffer(16).unwrap();
        assert_eq!(bytes, expected_analysis);
        assert_ne!(&bytes[..4], &[255, 0, 0, 255]);

        // The preview still honors the view
        assert_eq!(engine.view().split_position, Some(0.5));
    }

    #[tokio::test]
    async fn test_export_preset_encodes() {
        let mut engine = cpu_engine(EngineConfig::default());
        engine.load_image(gradient(400, 300)).unwrap();
        let bytes = engine.export(ExportPreset::Custom(200)).await.unwrap();
        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (200, 150));
    }

    #[test]
    fn test_darkened_circle_with_grain() {
        let mut engine = cpu_engine(EngineConfig::default());
        engine
            .load_image(RgbaImage::from_pixel(400, 300, Rgba([100, 100, 100, 255])))
            .unwrap();
        engine
            .set_adjustments(&partial(json!({
                "exposure": 0.5,
                "contrast": 20.0,
                "grainGlobal": 1.0,
                "grainShadow": 50.0
            })))
            .unwrap();
        let mut mask = Mask::new(
            1,
            MaskShape::Radial {
                center: [0.5, 0.5],
                radius: 0.3,
            },
        );
        mask.feather = 0.2;
        mask.adjustments = partial(json!({ "exposure": -1.0 }));
        engine.set_masks(vec![mask]).unwrap();

        let frame = engine.flush().unwrap().unwrap();
        let center = mean_luma(&frame, 190, 140, 20);
        let corner = mean_luma(&frame, 0, 0, 20);
        assert!(corner > 100.0 + 30.0, "corner {corner}");
        assert!(center < 100.0 - 30.0, "center {center}");

        // Grain breaks up the flat corner
        let first = frame.get_pixel(0, 0)[0];
        let varied = (0..20)
            .flat_map(|y| (0..20).map(move |x| (x, y)))
            .any(|(x, y)| frame.get_pixel(x, y)[0] != first);
        assert!(varied);
    }
}
