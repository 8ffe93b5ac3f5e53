use std::convert::Infallible;

use embedded_graphics::{
    mono_font::{ascii::FONT_7X13, MonoFont, MonoTextStyle},
    pixelcolor::BinaryColor,
    prelude::*,
    text::{Baseline, Text},
};
use flipdot_proto::{HEIGHT, WIDTH};

/// Turns text into a boolean matrix, `rows[y][x]`.
pub trait Rasterizer: Send + Sync {
    fn rasterize(&self, text: &str) -> Vec<Vec<bool>>;
}

/// Draws a single line of monospace text, vertically centred and left
/// aligned. Whatever does not fit is clipped.
pub struct MonoRasterizer {
    font: &'static MonoFont<'static>,
}

impl Default for MonoRasterizer {
    fn default() -> Self {
        Self { font: &FONT_7X13 }
    }
}

impl MonoRasterizer {
    pub fn new(font: &'static MonoFont<'static>) -> Self {
        Self { font }
    }
}

impl Rasterizer for MonoRasterizer {
    fn rasterize(&self, text: &str) -> Vec<Vec<bool>> {
        let mut canvas = Canvas::default();
        let style = MonoTextStyle::new(self.font, BinaryColor::On);
        let origin = Point::new(0, HEIGHT as i32 / 2);
        // drawing into the canvas is infallible
        let _ = Text::with_baseline(text, origin, style, Baseline::Middle).draw(&mut canvas);
        canvas.rows
    }
}

struct Canvas {
    rows: Vec<Vec<bool>>,
}

impl Default for Canvas {
    fn default() -> Self {
        Self {
            rows: vec![vec![false; WIDTH]; HEIGHT],
        }
    }
}

impl OriginDimensions for Canvas {
    fn size(&self) -> Size {
        Size::new(WIDTH as u32, HEIGHT as u32)
    }
}

impl DrawTarget for Canvas {
    type Color = BinaryColor;
    type Error = Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        for Pixel(coord, color) in pixels {
            if coord.x >= 0 && coord.x < WIDTH as i32 && coord.y >= 0 && coord.y < HEIGHT as i32 {
                self.rows[coord.y as usize][coord.x as usize] = color.is_on();
            }
        }
        Ok(())
    }
}
