use std::sync::Arc;

use ab_glyph::FontArc;
use image::{Rgba, RgbaImage};

use crate::canvas::{Background, CompositeSurface, DisplayMetrics, Viewport};
use crate::config::SurfaceConfig;
use crate::drawing::{Redraw, RenderContext};
use crate::layers::{Layer, LayerContext, LayerId, LayerKind};
use crate::measure::{ContourExtractor, ExtractionJob};

/// Things the host should react to, queued in the order they happened.
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    RedrawRequested,
    ExtractionStarted,
    ExtractionFinished { count: usize },
    NoContoursFound,
    ContourSelectionChanged(bool),
    MeasuringModeChanged(crate::measure::MeasureMode),
    MeasuringLineSelected(bool),
    TextBoxSelected(bool),
    TextEditRequested,
    /// The single date stamp was added (true) or deleted (false).
    TimestampExistenceChanged(bool),
    ViewportChanged,
}

/// The whole annotation surface: one background photo, a shared viewport
/// and a stack of composite surfaces holding the layers.
pub struct AnnotationView {
    pub(crate) config: SurfaceConfig,
    pub(crate) metrics: DisplayMetrics,
    pub(crate) image: Arc<RgbaImage>,
    pub(crate) viewport: Viewport,
    pub(crate) surfaces: Vec<CompositeSurface>,
    pub(crate) font: Option<FontArc>,
    pub(crate) extractor: Option<Arc<dyn ContourExtractor>>,
    pub(crate) job: Option<ExtractionJob>,
    pub(crate) notices: Vec<Notice>,
}

pub(crate) fn render_base<'a>(
    viewport: &Viewport,
    metrics: DisplayMetrics,
    font: Option<&'a FontArc>,
) -> RenderContext<'a> {
    RenderContext {
        resize_ratio: 1.0,
        image_size: viewport.image_size(),
        magnification: viewport.magnification(),
        metrics,
        font,
    }
}

/// Redraws every surface holding a layer that depends on the display size.
pub(crate) fn inflate(surfaces: &mut [CompositeSurface], base: &RenderContext) -> bool {
    let mut redrawn = false;
    for surface in surfaces.iter_mut() {
        if surface.layers().iter().any(|layer| layer.needs_inflation()) {
            surface.redraw_all(base);
            redrawn = true;
        }
    }
    redrawn
}

impl AnnotationView {
    pub fn new(image: Arc<RgbaImage>, metrics: DisplayMetrics, config: SurfaceConfig) -> Self {
        let (width, height) = image.dimensions();
        log::info!("Annotation view over {}x{} image, density {}", width, height, metrics.density);
        Self {
            viewport: Viewport::new(width, height, config.viewport),
            config,
            metrics,
            image,
            surfaces: Vec::new(),
            font: None,
            extractor: None,
            job: None,
            notices: Vec::new(),
        }
    }

    pub fn config(&self) -> &SurfaceConfig {
        &self.config
    }

    pub fn metrics(&self) -> DisplayMetrics {
        self.metrics
    }

    pub fn viewport(&self) -> &Viewport {
        &self.viewport
    }

    pub fn image(&self) -> &Arc<RgbaImage> {
        &self.image
    }

    pub fn surfaces(&self) -> &[CompositeSurface] {
        &self.surfaces
    }

    pub fn set_font(&mut self, font: FontArc) {
        self.font = Some(font);
        self.redraw_everything();
    }

    pub fn set_extractor(&mut self, extractor: Arc<dyn ContourExtractor>) {
        self.extractor = Some(extractor);
    }

    /// True while contour extraction runs; the host shows a progress indicator.
    pub fn is_busy(&self) -> bool {
        self.job.is_some()
    }

    pub fn drain_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }

    /// Adds an empty surface on top of the existing ones and returns its index.
    pub fn add_surface(&mut self, background: Background) -> usize {
        let (width, height) = self.image.dimensions();
        self.surfaces.push(CompositeSurface::new(
            width,
            height,
            self.config.resolution.background_ratio,
            background,
        ));
        self.surfaces.len() - 1
    }

    pub fn add_layer(&mut self, surface: usize, name: &str, kind: LayerKind) -> Option<LayerId> {
        let gesture = kind.gesture_config(&self.config);
        let base = render_base(&self.viewport, self.metrics, self.font.as_ref());
        let Some(target) = self.surfaces.get_mut(surface) else {
            log::warn!("No surface {surface} for layer '{name}'");
            return None;
        };
        let id = target.add_layer(Layer::new(name, kind, gesture), &base);
        self.notices.push(Notice::RedrawRequested);
        Some(id)
    }

    pub fn remove_layer(&mut self, id: LayerId) -> Option<Layer> {
        let index = self.surface_of(id)?;
        let base = render_base(&self.viewport, self.metrics, self.font.as_ref());
        let layer = self.surfaces[index].remove_layer(id, &base)?;
        if self.job.as_ref().is_some_and(|job| job.layer() == id) {
            log::info!("Dropping extraction for removed layer '{}'", layer.name());
            self.job = None;
        }
        self.notices.push(Notice::RedrawRequested);
        Some(layer)
    }

    pub fn layer(&self, id: LayerId) -> Option<&Layer> {
        self.surfaces.iter().find_map(|surface| surface.layer(id))
    }

    pub fn layer_by_name(&self, name: &str) -> Option<&Layer> {
        self.surfaces
            .iter()
            .flat_map(|surface| surface.layers())
            .find(|layer| layer.name() == name)
    }

    pub(crate) fn surface_of(&self, id: LayerId) -> Option<usize> {
        self.surfaces.iter().position(|surface| surface.contains(id))
    }

    pub(crate) fn layer_ids(&self) -> Vec<LayerId> {
        self.surfaces
            .iter()
            .flat_map(|surface| surface.layers().iter().map(Layer::id))
            .collect()
    }

    /// The layer that receives pointer input: the topmost active one.
    pub fn input_layer(&self) -> Option<LayerId> {
        self.surfaces
            .iter()
            .rev()
            .flat_map(|surface| surface.layers().iter().rev())
            .find(|layer| layer.is_active())
            .map(Layer::id)
    }

    /// Runs `f` against a layer, then carries out the redraw it asks for and
    /// starts any contour extraction it requested.
    pub(crate) fn with_layer<F>(&mut self, id: LayerId, f: F) -> Option<Redraw>
    where
        F: FnOnce(&mut Layer, &mut LayerContext) -> Redraw,
    {
        let index = self.surface_of(id)?;
        let view_before = self.viewport.rect();
        let magnification_before = self.viewport.magnification();

        let surface = &mut self.surfaces[index];
        let layer_count = surface.layer_count();
        let layer = surface.layer_mut(id)?;
        let mut ctx = LayerContext {
            viewport: &mut self.viewport,
            metrics: self.metrics,
            notices: &mut self.notices,
            layer_count,
            font: self.font.as_ref(),
        };
        let redraw = f(layer, &mut ctx);

        let base = render_base(&self.viewport, self.metrics, self.font.as_ref());
        let mut changed = self.surfaces[index].apply(id, redraw, &base);
        if self.viewport.rect() != view_before {
            self.notices.push(Notice::ViewportChanged);
            changed = true;
            if (self.viewport.magnification() - magnification_before).abs() > f32::EPSILON {
                inflate(&mut self.surfaces, &base);
            }
        }
        if changed {
            self.notices.push(Notice::RedrawRequested);
        }

        self.start_requested_extractions();
        Some(redraw)
    }

    /// Host-side edits such as undo, text entry or calibration input.
    pub fn edit_layer<F>(&mut self, id: LayerId, f: F) -> Option<Redraw>
    where
        F: FnOnce(&mut LayerKind, &mut LayerContext) -> Redraw,
    {
        self.with_layer(id, |layer, ctx| f(&mut layer.kind, ctx))
    }

    /// Activates or backgrounds a layer. The owning surface switches to the
    /// active or background resolution accordingly.
    pub fn set_active(&mut self, id: LayerId, active: bool) -> bool {
        let Some(index) = self.surface_of(id) else {
            log::warn!("Cannot change activation of unknown layer {id}");
            return false;
        };
        let any_active = active
            || self.surfaces[index]
                .layers()
                .iter()
                .any(|layer| layer.id() != id && layer.is_active());
        let ratio = if any_active {
            self.config.resolution.active_ratio
        } else {
            self.config.resolution.background_ratio
        };
        // One repaint covers both the new raster size and the layer's own change.
        let resized = self.surfaces[index].resize_raster(ratio);
        self.with_layer(id, |layer, ctx| {
            let redraw = layer.set_active(active, ctx);
            if resized { redraw.merge(Redraw::Full) } else { redraw }
        })
        .is_some()
    }

    /// Makes `id` the only active layer.
    pub fn activate_sole(&mut self, id: LayerId) -> bool {
        for other in self.layer_ids() {
            if other != id && self.layer(other).is_some_and(Layer::is_active) {
                self.set_active(other, false);
            }
        }
        self.set_active(id, true)
    }

    pub fn redraw_everything(&mut self) {
        let base = render_base(&self.viewport, self.metrics, self.font.as_ref());
        for surface in &mut self.surfaces {
            surface.redraw_all(&base);
        }
        self.notices.push(Notice::RedrawRequested);
    }

    /// Renders what the host shows: the visible part of the photo with every
    /// surface composited over it, at display size.
    pub fn compose(&self) -> RgbaImage {
        let [width, height] = self.viewport.display_size();
        let mut out = RgbaImage::new(width.round().max(0.0) as u32, height.round().max(0.0) as u32);
        if !self.viewport.has_display() {
            log::warn!("Composing before the display size is known");
            return out;
        }
        for (x, y, pixel) in out.enumerate_pixels_mut() {
            let point = self.viewport.screen_to_image([x as f32 + 0.5, y as f32 + 0.5]);
            let mut color = sample(&self.image, point, 1.0);
            for surface in &self.surfaces {
                color = over(color, sample(surface.raster(), point, surface.resize_ratio()));
            }
            *pixel = color;
        }
        out
    }
}

fn sample(image: &RgbaImage, point: [f32; 2], ratio: f32) -> Rgba<u8> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Rgba([0, 0, 0, 0]);
    }
    let x = ((point[0] * ratio).floor() as i64).clamp(0, width as i64 - 1) as u32;
    let y = ((point[1] * ratio).floor() as i64).clamp(0, height as i64 - 1) as u32;
    *image.get_pixel(x, y)
}

fn over(dst: Rgba<u8>, src: Rgba<u8>) -> Rgba<u8> {
    match src[3] {
        0 => dst,
        255 => src,
        alpha => {
            let a = alpha as f32 / 255.0;
            let dst_a = dst[3] as f32 / 255.0;
            let out_a = a + dst_a * (1.0 - a);
            let mix = |s: u8, d: u8| {
                ((s as f32 * a + d as f32 * dst_a * (1.0 - a)) / out_a).round() as u8
            };
            Rgba([
                mix(src[0], dst[0]),
                mix(src[1], dst[1]),
                mix(src[2], dst[2]),
                (out_a * 255.0).round() as u8,
            ])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DrawingConfig, TextConfig};
    use crate::layers::{DrawingLayer, TextboxLayer};

    fn view() -> AnnotationView {
        let image = Arc::new(RgbaImage::from_pixel(400, 200, Rgba([255, 255, 255, 255])));
        let mut view = AnnotationView::new(image, DisplayMetrics::default(), SurfaceConfig::default());
        view.on_display_size_changed(400.0, 200.0);
        view
    }

    fn drawing() -> LayerKind {
        LayerKind::Drawing(DrawingLayer::new(DrawingConfig::default()))
    }

    #[test]
    fn test_activation_switches_resolution() {
        let mut view = view();
        let surface = view.add_surface(Background::Transparent);
        let a = view.add_layer(surface, "a", drawing()).unwrap();
        let other = view.add_surface(Background::Transparent);
        let b = view.add_layer(other, "b", drawing()).unwrap();

        assert!(view.activate_sole(a));
        assert!((view.surfaces()[surface].resize_ratio() - 0.7).abs() < 1e-6);
        assert!((view.surfaces()[other].resize_ratio() - 0.4).abs() < 1e-6);

        assert!(view.activate_sole(b));
        assert!(!view.layer(a).unwrap().is_active());
        assert!((view.surfaces()[surface].resize_ratio() - 0.4).abs() < 1e-6);
        assert!((view.surfaces()[other].resize_ratio() - 0.7).abs() < 1e-6);
        assert_eq!(view.input_layer(), Some(b));
    }

    #[test]
    fn test_activation_repaints_once() {
        let mut view = view();
        let surface = view.add_surface(Background::Transparent);
        let id = view.add_layer(surface, "ink", drawing()).unwrap();

        let before = view.surfaces()[surface].full_redraw_count();
        assert!(view.set_active(id, true));
        assert_eq!(view.surfaces()[surface].full_redraw_count(), before + 1);
        assert_eq!(view.surfaces()[surface].raster().dimensions(), (280, 140));

        // Same ratio: only the layer's own redraw.
        let before = view.surfaces()[surface].full_redraw_count();
        assert!(view.set_active(id, true));
        assert_eq!(view.surfaces()[surface].full_redraw_count(), before + 1);
    }

    #[test]
    fn test_zoom_repaints_text_box_outlines() {
        let mut view = view();
        let ink = view.add_surface(Background::Transparent);
        let ink_id = view.add_layer(ink, "ink", drawing()).unwrap();
        let text = view.add_surface(Background::Transparent);
        view.add_layer(text, "text", LayerKind::Textbox(TextboxLayer::new(TextConfig::default())));

        let (ink_before, text_before) = (
            view.surfaces()[ink].full_redraw_count(),
            view.surfaces()[text].full_redraw_count(),
        );
        view.with_layer(ink_id, |_layer, ctx| {
            assert!(ctx.viewport.zoom(100.0));
            Redraw::View
        });
        assert_eq!(view.surfaces()[ink].full_redraw_count(), ink_before);
        assert_eq!(view.surfaces()[text].full_redraw_count(), text_before + 1);
    }

    #[test]
    fn test_compose_shows_visible_region() {
        let mut view = view();
        let surface = view.add_surface(Background::Transparent);
        let id = view.add_layer(surface, "ink", drawing()).unwrap();
        view.activate_sole(id);
        view.edit_layer(id, |kind, _ctx| {
            if let LayerKind::Drawing(layer) = kind {
                layer.set_size(10);
                layer.set_color([1.0, 0.0, 0.0, 1.0]);
            }
            Redraw::None
        });

        use crate::state::{PointerAction::*, PointerFrame};
        for frame in [
            PointerFrame::new(Down, &[[20.0, 100.0]], Default::default()),
            PointerFrame::new(Move, &[[200.0, 100.0]], Default::default()),
            PointerFrame::new(Move, &[[380.0, 100.0]], Default::default()),
            PointerFrame::new(Up, &[[380.0, 100.0]], Default::default()),
        ] {
            view.handle_pointer_frame(&frame);
        }

        let composed = view.compose();
        assert_eq!(composed.dimensions(), (400, 200));
        assert_eq!(composed.get_pixel(200, 100).0, [255, 0, 0, 255]);
        assert_eq!(composed.get_pixel(200, 20).0, [255, 255, 255, 255]);
        assert!(view.drain_notices().contains(&Notice::RedrawRequested));
    }

    #[test]
    fn test_remove_layer_forgets_it() {
        let mut view = view();
        let surface = view.add_surface(Background::Transparent);
        let id = view.add_layer(surface, "ink", drawing()).unwrap();
        assert!(view.remove_layer(id).is_some());
        assert!(view.layer(id).is_none());
        assert!(view.add_layer(7, "nowhere", drawing()).is_none());
    }

    #[test]
    fn test_over_blends_partial_alpha() {
        let white = Rgba([255, 255, 255, 255]);
        assert_eq!(over(white, Rgba([0, 0, 0, 0])), white);
        assert_eq!(over(white, Rgba([0, 0, 0, 255])), Rgba([0, 0, 0, 255]));
        let half = over(white, Rgba([0, 0, 0, 128]));
        assert_eq!(half[3], 255);
        assert!((126..=128).contains(&half[0]));
    }
}
