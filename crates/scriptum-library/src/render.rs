//! The abstract rendering backend the engine draws into.

use std::path::Path;

use ecow::{eco_format, EcoString};

use crate::diag::StrResult;
use crate::fonts::{FaceId, Rgb};
use crate::geom::Abs;

/// A rendering backend.
///
/// The engine hands it pages, positioned text runs and filled
/// rectangles; it never touches output bytes itself. Coordinates are in
/// points with the origin at the bottom-left of the page.
pub trait Renderer {
    /// Start a new page of the given size.
    fn new_page(&mut self, width: Abs, height: Abs);

    fn begin_text(&mut self);

    fn end_text(&mut self);

    fn set_font_and_size(&mut self, face: FaceId, size: f64);

    fn set_fill_rgb(&mut self, color: Rgb);

    /// Set the text matrix for the next text run, replacing its position
    /// (used for rotated booktab labels).
    fn set_text_matrix(&mut self, matrix: [f64; 6]);

    /// Draw a text run with its baseline origin at `(x, y)`.
    fn text_out(&mut self, x: Abs, y: Abs, text: &str);

    /// Fill a rectangle.
    fn fill_rect(&mut self, x: Abs, y: Abs, width: Abs, height: Abs);

    /// Write the finished document.
    fn save(&mut self, path: &Path) -> StrResult<()>;
}

/// A renderer that records every operation as a line of text.
///
/// Used to diff the exact draw stream of two runs and as the test
/// backend: two runs with identical configuration and input must
/// produce byte-identical recordings.
#[derive(Debug, Default)]
pub struct RecordingRenderer {
    pub ops: Vec<EcoString>,
}

impl RecordingRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// The recording as one newline-separated string.
    pub fn finish(&self) -> String {
        let mut out = String::new();
        for op in &self.ops {
            out.push_str(op);
            out.push('\n');
        }
        out
    }
}

impl Renderer for RecordingRenderer {
    fn new_page(&mut self, width: Abs, height: Abs) {
        self.ops.push(eco_format!("page:{}:{}", width.to_pt(), height.to_pt()));
    }

    fn begin_text(&mut self) {
        self.ops.push("begintext".into());
    }

    fn end_text(&mut self) {
        self.ops.push("endtext".into());
    }

    fn set_font_and_size(&mut self, face: FaceId, size: f64) {
        self.ops.push(eco_format!("font:{}:{size}", face.0));
    }

    fn set_fill_rgb(&mut self, color: Rgb) {
        self.ops.push(eco_format!("fill:{}:{}:{}", color.r, color.g, color.b));
    }

    fn set_text_matrix(&mut self, matrix: [f64; 6]) {
        let [a, b, c, d, e, f] = matrix;
        self.ops.push(eco_format!("matrix:{a}:{b}:{c}:{d}:{e}:{f}"));
    }

    fn text_out(&mut self, x: Abs, y: Abs, text: &str) {
        self.ops.push(eco_format!("text:{:.2}:{:.2}:{text}", x.to_pt(), y.to_pt()));
    }

    fn fill_rect(&mut self, x: Abs, y: Abs, width: Abs, height: Abs) {
        self.ops.push(eco_format!(
            "rectangle:{:.2}:{:.2}:{:.2}:{:.2}",
            x.to_pt(),
            y.to_pt(),
            width.to_pt(),
            height.to_pt()
        ));
    }

    fn save(&mut self, _: &Path) -> StrResult<()> {
        Ok(())
    }
}
