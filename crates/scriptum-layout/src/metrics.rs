//! Per-line segment metrics: for every piece range of a long line, the
//! penalty and height of its optimal break into physical lines.
//!
//! Tables are pure functions of line content and configuration, so they
//! are persisted to disk under `<config-digest>-<line-digest>` names and
//! reloaded across runs.

use std::fs;

use ecow::eco_format;
use scriptum_library::diag::StrResult;
use scriptum_library::fonts::FontBook;
use scriptum_library::geom::Abs;
use scriptum_library::hash::line_digest;
use scriptum_library::model::{Line, LineMetrics, Paragraph, SegmentMetrics};

use crate::linebreak::run_dp;
use crate::Engine;

/// The vertical extent of pieces `a..b` set on one physical line:
/// `(height, ascent, descent)`.
///
/// Drop-cap pieces contribute nothing; their ascent is absorbed by the
/// lines the cap spans. Empty lines keep their authored height as both
/// height and ascent.
pub(crate) fn line_extent(
    fonts: &FontBook,
    line_spacing: f64,
    line: &Line,
    a: usize,
    b: usize,
) -> (Abs, Abs, Abs) {
    if line.pieces.is_empty() {
        return (line.height, line.height, Abs::zero());
    }

    let mut ascent = Abs::zero();
    let mut descent = Abs::zero();
    let mut linegap = Abs::zero();

    for piece in &line.pieces[a..b] {
        let face = fonts.face(piece.face);
        if face.line_count != 1 {
            continue;
        }
        let font = fonts.font_of(piece.face);
        let up = Abs::pt(font.ascent * piece.size / 1000.0) - piece.baseline;
        let down = piece.baseline + Abs::pt(font.descent.abs() * piece.size / 1000.0);
        ascent.set_max(up);
        descent.set_max(down);
        linegap.set_max(fonts.linegap(piece.face));
    }

    (linegap * line_spacing, ascent, descent)
}

/// Compute the full triangular `starts` table for a long line.
pub(crate) fn compute_metrics(
    fonts: &FontBook,
    line_spacing: f64,
    para: &Paragraph,
    line: &Line,
) -> LineMetrics {
    let count = line.pieces.len();
    let mut starts = Vec::with_capacity(count);
    for a in 0..count {
        let dp = run_dp(fonts, line_spacing, para, line, a, count);
        let row: Vec<SegmentMetrics> = (a + 1..=count)
            .map(|b| SegmentMetrics { penalty: dp.costs[b], height: dp.heights[b] })
            .collect();
        starts.push(row);
    }
    LineMetrics::new(count, starts)
}

impl Engine {
    /// Compute (or load) metrics for every line of a freshly flushed
    /// paragraph and fill in its total height.
    pub(crate) fn analyse_paragraph(&mut self, para: &mut Paragraph) -> StrResult<()> {
        for index in 0..para.lines.len() {
            if para.lines[index].is_vspace() {
                continue;
            }
            let metrics = self.line_metrics(para, index)?;
            para.lines[index].metrics = Some(metrics);
        }

        para.total_height = para
            .lines
            .iter()
            .map(|line| {
                if line.is_vspace() {
                    line.height
                } else {
                    match &line.metrics {
                        Some(metrics) if !line.pieces.is_empty() => {
                            metrics.get(0, line.pieces.len()).height
                        }
                        _ => Abs::zero(),
                    }
                }
            })
            .sum();
        Ok(())
    }

    /// Metrics for one line, loaded from the cache when a table computed
    /// under the same configuration and content exists.
    fn line_metrics(&mut self, para: &Paragraph, index: usize) -> StrResult<LineMetrics> {
        let line = &para.lines[index];
        let name = eco_format!("{}-{}", self.config.digest, line_digest(line));

        if let Some(dir) = &self.config.cache_dir {
            let path = dir.join(name.as_str());
            if let Ok(bytes) = fs::read(&path) {
                match bincode::deserialize::<LineMetrics>(&bytes) {
                    Ok(metrics) if metrics.piece_count == line.pieces.len() => {
                        tracing::debug!(%name, "line metrics cache hit");
                        return Ok(metrics);
                    }
                    _ => tracing::warn!(%name, "discarding unreadable metrics cache"),
                }
            }
        }

        let metrics =
            compute_metrics(&self.fonts, self.config.line_spacing, para, line);

        if let Some(dir) = &self.config.cache_dir {
            let path = dir.join(name.as_str());
            let _ = fs::create_dir_all(dir);
            match bincode::serialize(&metrics) {
                Ok(bytes) => {
                    if let Err(err) = fs::write(&path, bytes) {
                        tracing::warn!(%name, "failed to persist line metrics: {err}");
                    }
                }
                Err(err) => {
                    tracing::warn!(%name, "failed to serialize line metrics: {err}")
                }
            }
        }

        Ok(metrics)
    }
}
