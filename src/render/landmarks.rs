//! Landmark point drawing

use imageproc::drawing::{draw_filled_circle_mut, draw_hollow_circle_mut};

use super::{Canvas, DrawingStyle};
use crate::engine::NormalizedLandmark;

/// Draws a pose's landmarks onto the overlay canvas
pub trait LandmarkPainter: Send {
    fn draw_landmarks(
        &mut self,
        canvas: &mut Canvas,
        landmarks: &[NormalizedLandmark],
        style: &DrawingStyle,
    );
}

/// CPU painter: a filled disc per landmark with an outline of
/// `line_width` pixels
#[derive(Debug, Default)]
pub struct SoftwarePainter;

impl LandmarkPainter for SoftwarePainter {
    fn draw_landmarks(
        &mut self,
        canvas: &mut Canvas,
        landmarks: &[NormalizedLandmark],
        style: &DrawingStyle,
    ) {
        let (width, height) = (canvas.width() as f32, canvas.height() as f32);
        let radius = style.radius as i32;
        let fill = style.fill_color.rgba();
        let stroke = style.color.rgba();

        for landmark in landmarks {
            if !landmark.x.is_finite() || !landmark.y.is_finite() {
                continue;
            }
            let center = (
                (landmark.x * width).round() as i32,
                (landmark.y * height).round() as i32,
            );

            let image = canvas.image_mut();
            draw_filled_circle_mut(image, center, radius, fill);
            // Outline grows inward from the point's edge
            for inset in 0..style.line_width as i32 {
                let r = radius - inset;
                if r < 0 {
                    break;
                }
                draw_hollow_circle_mut(image, center, r, stroke);
            }
        }
    }
}
