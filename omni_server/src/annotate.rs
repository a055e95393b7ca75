//! Drawing detections onto frames.
//!
use std::path::Path;

use image::{Rgb, RgbImage};
use imageproc::{
    drawing::{draw_hollow_rect_mut, draw_text_mut},
    rect::Rect,
};
use rusttype::{Font, Scale};

use crate::nn::Detection;

/// Height of caption text in pixels.
const CAPTION_SIZE: f32 = 16.0;

pub struct Annotator {
    font: Option<Font<'static>>,
    color: Rgb<u8>,
}

impl Default for Annotator {
    fn default() -> Self {
        Self {
            font: None,
            color: Rgb::from([0, 255, 0]),
        }
    }
}

impl Annotator {
    /// Annotator drawing captions with the given TrueType font.
    ///
    /// Without a usable font only the boxes are drawn.
    pub fn with_font_file(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let font = std::fs::read(path)
            .ok()
            .and_then(Font::try_from_vec);
        match font {
            Some(_) => log::debug!("Using caption font {}", path.display()),
            None => log::warn!(
                "Could not load font {}, detections will have no captions",
                path.display()
            ),
        }

        Self {
            font,
            ..Default::default()
        }
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// Draw bounding boxes with labels and confidence scores on the frame.
    pub fn draw(&self, frame: &mut RgbImage, detections: &[Detection]) {
        let (width, height) = frame.dimensions();
        let (width_f, height_f) = (width as f32, height as f32);

        for detection in detections {
            let bbox = detection.bbox;
            // Coordinate frame basis is on the top left corner
            let (x_tl, y_tl) = (bbox[0] * width_f, bbox[1] * height_f);
            let (x_br, y_br) = (bbox[2] * width_f, bbox[3] * height_f);
            let rect_width = (x_br - x_tl).max(1.0) as u32;
            let rect_height = (y_br - y_tl).max(1.0) as u32;

            // Two nested rectangles for a 2px line
            let outer = Rect::at(x_tl as i32, y_tl as i32).of_size(rect_width, rect_height);
            draw_hollow_rect_mut(frame, outer, self.color);
            if rect_width > 2 && rect_height > 2 {
                let inner = Rect::at(x_tl as i32 + 1, y_tl as i32 + 1)
                    .of_size(rect_width - 2, rect_height - 2);
                draw_hollow_rect_mut(frame, inner, self.color);
            }

            if let Some(font) = &self.font {
                let caption = format!("{} {:.2}", detection.label, detection.confidence);
                let y_text = (y_tl - CAPTION_SIZE - 2.0).max(0.0);
                draw_text_mut(
                    frame,
                    self.color,
                    x_tl as i32,
                    y_text as i32,
                    Scale::uniform(CAPTION_SIZE),
                    font,
                    &caption,
                );
            }
        }
    }
}
