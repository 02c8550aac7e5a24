use std::sync::Arc;

use image::RgbaImage;

use crate::drawing::{Redraw, RenderContext};
use crate::layers::{Layer, LayerId};
use crate::renderer::{Painter, RasterPainter};

/// What a full redraw resets the raster to.
#[derive(Debug, Clone, Default)]
pub enum Background {
    #[default]
    Transparent,
    Color([f32; 4]),
    Image(Arc<RgbaImage>),
}

/// A stack of layers painted onto one raster. Annotations are stored in image
/// space; the raster holds them at `resize_ratio`.
pub struct CompositeSurface {
    image_size: [u32; 2],
    resize_ratio: f32,
    background: Background,
    layers: Vec<Layer>,
    raster: RgbaImage,
    full_redraws: u64,
}

fn raster_size(image_size: [u32; 2], ratio: f32) -> (u32, u32) {
    let scale = |v: u32| ((v as f32 * ratio).round() as u32).max(1);
    (scale(image_size[0]), scale(image_size[1]))
}

impl CompositeSurface {
    pub fn new(image_width: u32, image_height: u32, resize_ratio: f32, background: Background) -> Self {
        let image_size = [image_width.max(1), image_height.max(1)];
        let resize_ratio = if resize_ratio.is_finite() && resize_ratio > 0.0 {
            resize_ratio
        } else {
            log::warn!("Invalid resize ratio {resize_ratio}, using 1.0");
            1.0
        };
        let (width, height) = raster_size(image_size, resize_ratio);
        Self {
            image_size,
            resize_ratio,
            background,
            layers: Vec::new(),
            raster: RgbaImage::new(width, height),
            full_redraws: 0,
        }
    }

    pub fn image_size(&self) -> [u32; 2] {
        self.image_size
    }

    pub fn resize_ratio(&self) -> f32 {
        self.resize_ratio
    }

    pub fn raster(&self) -> &RgbaImage {
        &self.raster
    }

    /// Number of full redraws since the surface was created.
    pub fn full_redraw_count(&self) -> u64 {
        self.full_redraws
    }

    pub fn background(&self) -> &Background {
        &self.background
    }

    pub fn set_background(&mut self, background: Background, base: &RenderContext) {
        self.background = background;
        self.redraw_all(base);
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    /// Mutable access that bypasses redraws; callers repaint themselves.
    pub(crate) fn layers_mut(&mut self) -> std::slice::IterMut<'_, Layer> {
        self.layers.iter_mut()
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    pub fn contains(&self, id: LayerId) -> bool {
        self.index_of(id).is_some()
    }

    pub fn layer(&self, id: LayerId) -> Option<&Layer> {
        self.layers.iter().find(|layer| layer.id() == id)
    }

    pub fn layer_mut(&mut self, id: LayerId) -> Option<&mut Layer> {
        self.layers.iter_mut().find(|layer| layer.id() == id)
    }

    fn index_of(&self, id: LayerId) -> Option<usize> {
        self.layers.iter().position(|layer| layer.id() == id)
    }

    /// Appends a layer on top. Paint order is fixed from then on.
    pub fn add_layer(&mut self, layer: Layer, base: &RenderContext) -> LayerId {
        let id = layer.id();
        log::info!("Adding layer '{}' at position {}", layer.name(), self.layers.len());
        self.layers.push(layer);
        self.redraw_all(base);
        id
    }

    pub fn remove_layer(&mut self, id: LayerId, base: &RenderContext) -> Option<Layer> {
        let index = self.index_of(id)?;
        let layer = self.layers.remove(index);
        log::info!("Removed layer '{}'", layer.name());
        self.redraw_all(base);
        Some(layer)
    }

    /// Reallocates the raster at the new ratio and repaints it. Returns false
    /// when nothing changed.
    pub fn set_resize_ratio(&mut self, ratio: f32, base: &RenderContext) -> bool {
        let resized = self.resize_raster(ratio);
        if resized {
            self.redraw_all(base);
        }
        resized
    }

    /// Reallocates the raster without painting it; the caller must follow up
    /// with a full redraw.
    pub(crate) fn resize_raster(&mut self, ratio: f32) -> bool {
        if !ratio.is_finite() || ratio <= 0.0 {
            log::warn!("Ignoring invalid resize ratio {ratio}");
            return false;
        }
        if (ratio - self.resize_ratio).abs() < f32::EPSILON {
            return false;
        }
        let (width, height) = raster_size(self.image_size, ratio);
        log::info!(
            "Resize ratio {} -> {}, raster {}x{}",
            self.resize_ratio,
            ratio,
            width,
            height
        );
        self.resize_ratio = ratio;
        self.raster = RgbaImage::new(width, height);
        true
    }

    fn context<'a>(&self, base: &RenderContext<'a>) -> RenderContext<'a> {
        RenderContext {
            resize_ratio: self.resize_ratio,
            image_size: [self.image_size[0] as f32, self.image_size[1] as f32],
            ..*base
        }
    }

    pub fn redraw_all(&mut self, base: &RenderContext) {
        self.full_redraws += 1;
        let ctx = self.context(base);
        let mut painter = RasterPainter::new(&mut self.raster, base.font);
        match &self.background {
            Background::Transparent => painter.fill([0.0, 0.0, 0.0, 0.0]),
            Background::Color(color) => painter.fill(*color),
            Background::Image(image) => painter.blit(image),
        }
        for layer in &self.layers {
            for annotation in layer.annotations() {
                annotation.draw(&mut painter, &ctx);
            }
        }
    }

    /// Paints the layer's pending annotation over the current raster, then
    /// everything above it. Falls back to a full redraw when a layer above
    /// needs transparency. Returns true if the incremental path was taken.
    pub fn quickdraw(&mut self, id: LayerId, base: &RenderContext) -> bool {
        let Some(index) = self.index_of(id) else {
            return false;
        };
        let safe = self.layers[index]
            .pending()
            .is_some_and(|pending| !pending.forces_full_redraw())
            && !self.layers[index + 1..]
                .iter()
                .any(|layer| layer.needs_transparency());
        if !safe {
            log::trace!("Quickdraw unsafe for layer '{}', redrawing all", self.layers[index].name());
            self.redraw_all(base);
            return false;
        }

        let ctx = self.context(base);
        let mut painter = RasterPainter::new(&mut self.raster, base.font);
        if let Some(pending) = self.layers[index].pending() {
            pending.draw(&mut painter, &ctx);
        }
        for layer in &self.layers[index + 1..] {
            for annotation in layer.annotations() {
                annotation.draw(&mut painter, &ctx);
            }
        }
        true
    }

    /// Carries out a layer's redraw request. Returns true if the raster changed.
    pub fn apply(&mut self, id: LayerId, redraw: Redraw, base: &RenderContext) -> bool {
        match redraw {
            Redraw::None | Redraw::View => false,
            Redraw::Quick => {
                self.quickdraw(id, base);
                true
            }
            Redraw::Full => {
                self.redraw_all(base);
                true
            }
        }
    }
}
