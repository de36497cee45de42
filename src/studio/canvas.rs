use eframe::egui;

use crate::lineage::ArtifactId;
use crate::selection::{ImageBounds, PERCENT_SCALE, PointerPosition, SelectionRect};
use crate::session::StudioSession;
use crate::thumbnail::ImageData;

const SELECTION_FILL: egui::Color32 = egui::Color32::from_rgba_premultiplied(40, 90, 160, 60);
const SELECTION_STROKE: egui::Color32 = egui::Color32::from_rgb(80, 160, 255);
const CANVAS_BACKGROUND: egui::Color32 = egui::Color32::from_gray(28);

/// Identifies which image the preview texture was decoded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreviewKey {
    Upload(u64),
    Artifact(ArtifactId),
}

struct PreviewTexture {
    key: PreviewKey,
    texture: egui::TextureHandle,
}

/// Preview of the current base image with the selection overlay and pointer capture.
#[derive(Default)]
pub struct PreviewCanvas {
    texture: Option<PreviewTexture>,
    decode_error: Option<String>,
}

impl PreviewCanvas {
    pub fn show(
        &mut self,
        ui: &mut egui::Ui,
        key: Option<PreviewKey>,
        session: &mut StudioSession,
    ) {
        let (Some(key), Some(image)) = (key, session.current_base_image()) else {
            self.texture = None;
            ui.centered_and_justified(|ui| {
                ui.label("Upload a photo or pick a thumbnail from the history to start.");
            });
            return;
        };

        if self.texture.as_ref().map(|preview| preview.key) != Some(key) {
            self.load(ui.ctx(), key, image);
        }
        let Some(preview) = self.texture.as_ref() else {
            ui.colored_label(
                egui::Color32::from_rgb(173, 33, 33),
                self.decode_error
                    .as_deref()
                    .unwrap_or("Preview unavailable"),
            );
            return;
        };

        let (response, painter) =
            ui.allocate_painter(ui.available_size(), egui::Sense::click_and_drag());
        painter.rect_filled(response.rect, 0.0, CANVAS_BACKGROUND);

        let image_rect = fit_image_rect(response.rect, preview.texture.size_vec2());
        painter.image(
            preview.texture.id(),
            image_rect,
            egui::Rect::from_min_max(egui::pos2(0.0, 0.0), egui::pos2(1.0, 1.0)),
            egui::Color32::WHITE,
        );

        let bounds = image_bounds_for(image_rect);
        let pointer = response
            .interact_pointer_pos()
            .map(|pos| PointerPosition::new(pos.x, pos.y));

        // egui reports the drag only after the pointer has moved past its threshold.
        if response.drag_started_by(egui::PointerButton::Primary)
            && let Some(anchor) = drag_anchor(
                ui.input(|input| input.pointer.press_origin()),
                response.interact_pointer_pos(),
            )
        {
            session.pointer_down(anchor, bounds);
        }
        if response.dragged_by(egui::PointerButton::Primary)
            && let Some(pointer) = pointer
        {
            session.pointer_move(pointer, bounds);
        }
        if response.drag_stopped_by(egui::PointerButton::Primary) {
            session.pointer_up();
        }

        if let Some(selection) = session.config().selection() {
            let rect = selection_screen_rect(image_rect, selection);
            painter.rect_filled(rect, 0.0, SELECTION_FILL);
            painter.rect_stroke(
                rect,
                0.0,
                egui::Stroke::new(2.0, SELECTION_STROKE),
                egui::StrokeKind::Middle,
            );
        }
    }

    fn load(&mut self, ctx: &egui::Context, key: PreviewKey, image: &ImageData) {
        match decode_preview(image) {
            Ok(color_image) => {
                let texture = ctx.load_texture("preview", color_image, egui::TextureOptions::LINEAR);
                self.texture = Some(PreviewTexture { key, texture });
                self.decode_error = None;
            }
            Err(error) => {
                tracing::warn!(error = %error, mime_type = image.mime_type(), "failed to decode preview");
                self.texture = None;
                self.decode_error = Some(format!("Could not decode image: {error}"));
            }
        }
    }
}

/// Where a drag began: the press position when egui still knows it, else the current one.
pub fn drag_anchor(
    press_origin: Option<egui::Pos2>,
    current: Option<egui::Pos2>,
) -> Option<PointerPosition> {
    press_origin
        .or(current)
        .map(|pos| PointerPosition::new(pos.x, pos.y))
}

pub fn decode_preview(image: &ImageData) -> Result<egui::ColorImage, image::ImageError> {
    let rgba = image::load_from_memory(image.bytes())?.to_rgba8();
    let size = [rgba.width() as usize, rgba.height() as usize];
    Ok(egui::ColorImage::from_rgba_unmultiplied(
        size,
        rgba.as_flat_samples().as_slice(),
    ))
}

/// Largest rect with the image's aspect ratio that fits `available`, centered.
pub fn fit_image_rect(available: egui::Rect, image_size: egui::Vec2) -> egui::Rect {
    if image_size.x <= 0.0 || image_size.y <= 0.0 {
        return egui::Rect::from_center_size(available.center(), egui::Vec2::ZERO);
    }

    let scale = (available.width() / image_size.x).min(available.height() / image_size.y);
    egui::Rect::from_center_size(available.center(), image_size * scale.max(0.0))
}

pub fn image_bounds_for(image_rect: egui::Rect) -> Option<ImageBounds> {
    ImageBounds::new(
        image_rect.left(),
        image_rect.top(),
        image_rect.width(),
        image_rect.height(),
    )
}

pub fn selection_screen_rect(image_rect: egui::Rect, selection: SelectionRect) -> egui::Rect {
    let to_screen = |x: f32, y: f32| {
        egui::pos2(
            image_rect.left() + x / PERCENT_SCALE * image_rect.width(),
            image_rect.top() + y / PERCENT_SCALE * image_rect.height(),
        )
    };

    egui::Rect::from_min_max(
        to_screen(selection.x, selection.y),
        to_screen(
            selection.x + selection.width,
            selection.y + selection.height,
        ),
    )
}
