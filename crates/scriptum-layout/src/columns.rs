//! Column span costs: the combined height and penalty of laying out a
//! half-open, possibly cross-paragraph span of pieces as one contiguous
//! column, memoized in a fixed-capacity direct-mapped table.

use scriptum_library::geom::Abs;
use scriptum_library::model::{Paragraph, SpanPoint};

use crate::Engine;

/// Number of entries in the span cache.
const CACHE_ENTRIES: usize = 1 << 20;

/// How often to report cache telemetry, in probes.
const REPORT_INTERVAL: u64 = 65_536;

#[derive(Copy, Clone)]
struct Entry {
    key: [u32; 6],
    penalty: i64,
    height: Abs,
}

const VACANT: [u32; 6] = [u32::MAX; 6];

/// A direct-mapped, lossy memo table for span costs.
///
/// Collisions silently overwrite; an entry is only ever used when all
/// six key components match exactly, so eviction affects performance but
/// never correctness.
pub(crate) struct ColumnCache {
    entries: Vec<Entry>,
    probes: u64,
    hits: u64,
    misses: u64,
    pub enabled: bool,
}

impl ColumnCache {
    pub fn new() -> Self {
        Self {
            entries: vec![
                Entry { key: VACANT, penalty: 0, height: Abs::zero() };
                CACHE_ENTRIES
            ],
            probes: 0,
            hits: 0,
            misses: 0,
            enabled: true,
        }
    }

    /// Cumulative `(hits, misses)` telemetry.
    pub fn stats(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }

    fn slot(&self, key: &[u32; 6]) -> usize {
        let [sp, sl, spc, tp, tl, tpc] = key.map(|v| v as usize);
        (((sp + 9) << 14)
            ^ ((sl + 23) << 16)
            ^ (spc + 91)
            ^ ((tp + 1) << 17)
            ^ ((tl + 89) << 15)
            ^ ((tpc + 73) << 6))
            & (self.entries.len() - 1)
    }

    fn probe(&mut self, key: &[u32; 6]) -> Option<(i64, Abs)> {
        self.probes += 1;
        if self.probes % REPORT_INTERVAL == 0 {
            tracing::info!(
                probes = self.probes,
                hits = self.hits,
                misses = self.misses,
                "column span cache"
            );
        }
        let entry = &self.entries[self.slot(key)];
        if entry.key == *key {
            self.hits += 1;
            Some((entry.penalty, entry.height))
        } else {
            self.misses += 1;
            None
        }
    }

    fn store(&mut self, key: [u32; 6], penalty: i64, height: Abs) {
        let slot = self.slot(&key);
        self.entries[slot] = Entry { key, penalty, height };
    }
}

fn cache_key(start: SpanPoint, split: SpanPoint) -> [u32; 6] {
    [
        start.para as u32,
        start.line as u32,
        start.piece as u32,
        split.para as u32,
        split.line as u32,
        split.piece as u32,
    ]
}

/// Compute a span's penalty and height directly from the per-line
/// metrics tables.
pub(crate) fn compute_span(
    paragraphs: &[Paragraph],
    start: SpanPoint,
    split: SpanPoint,
) -> (i64, Abs) {
    debug_assert!(start <= split);

    let mut penalty: i64 = 0;
    let mut height = Abs::zero();

    for para_index in start.para..paragraphs.len() {
        if para_index > split.para {
            break;
        }
        let para = &paragraphs[para_index];
        if para.lines.is_empty() {
            // Empty paragraphs span for free.
            continue;
        }

        let first_line = if para_index == start.para { start.line } else { 0 };
        let last_line = if para_index == split.para {
            split.line.min(para.lines.len() - 1)
        } else {
            para.lines.len() - 1
        };

        for line_index in first_line..=last_line {
            let line = &para.lines[line_index];
            let a = if para_index == start.para && line_index == start.line {
                start.piece
            } else {
                0
            };
            let b = if para_index == split.para && line_index == split.line {
                split.piece.min(line.pieces.len())
            } else {
                line.pieces.len()
            };

            if line.is_vspace() {
                height += line.height;
            } else if a < b {
                if let Some(metrics) = &line.metrics {
                    let segment = metrics.get(a, b);
                    penalty = penalty.saturating_add(segment.penalty);
                    height += segment.height;
                }
            }
        }
    }

    (penalty, height)
}

impl Engine {
    /// The penalty and height of the span `[start, split)` laid out as a
    /// contiguous column.
    pub(crate) fn span_cost(&mut self, start: SpanPoint, split: SpanPoint) -> (i64, Abs) {
        if !self.columns.enabled {
            return compute_span(&self.paragraphs, start, split);
        }

        let key = cache_key(start, split);
        if let Some(found) = self.columns.probe(&key) {
            return found;
        }

        let (penalty, height) = compute_span(&self.paragraphs, start, split);
        self.columns.store(key, penalty, height);
        (penalty, height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scriptum_library::fonts::{FontBook, LoadedFont, Rgb, TypeFace};
    use scriptum_library::geom::Abs;
    use scriptum_library::model::{Alignment, Line, LineUid, Piece};

    use crate::metrics::compute_metrics;

    fn fonts() -> FontBook {
        let mut book = FontBook::new();
        let font = book.add_font(LoadedFont::uniform(500.0)).unwrap();
        book.add_face(TypeFace {
            nickname: "blackletter".into(),
            font,
            size: 10.0,
            smallcaps: None,
            baseline_delta: Abs::zero(),
            line_count: 1,
            color: Rgb::BLACK,
        })
        .unwrap();
        book
    }

    fn paragraph(fonts: &FontBook, words: usize, uid: &mut u32) -> Paragraph {
        let face = fonts.resolve("blackletter").unwrap();
        let mut para = Paragraph::new();
        let mut line = Line::new(LineUid(*uid), Alignment::Justified, Abs::pt(100.0));
        *uid += 1;
        for _ in 0..words {
            let width = fonts.text_width(face, 10.0, "abcd");
            line.append(
                Piece::new("abcd", face, 10.0, width, Abs::zero(), false, 0),
                false,
            );
        }
        line.metrics = Some(compute_metrics(fonts, 1.0, &para, &line));
        para.lines.push(line);
        para
    }

    #[test]
    fn test_span_over_two_paragraphs_sums_parts() {
        let book = fonts();
        let mut uid = 0;
        let paragraphs = vec![paragraph(&book, 5, &mut uid), paragraph(&book, 5, &mut uid)];

        let whole = compute_span(
            &paragraphs,
            SpanPoint::new(0, 0, 0),
            SpanPoint::new(2, 0, 0),
        );
        let first = compute_span(
            &paragraphs,
            SpanPoint::new(0, 0, 0),
            SpanPoint::new(1, 0, 0),
        );
        let second = compute_span(
            &paragraphs,
            SpanPoint::new(1, 0, 0),
            SpanPoint::new(2, 0, 0),
        );
        assert_eq!(whole.0, first.0 + second.0);
        assert_eq!(whole.1, first.1 + second.1);
    }

    #[test]
    fn test_empty_paragraphs_are_free() {
        let book = fonts();
        let mut uid = 0;
        let with_empty = vec![
            paragraph(&book, 5, &mut uid),
            Paragraph::new(),
            Paragraph::new(),
            paragraph(&book, 5, &mut uid),
        ];
        let cost = compute_span(
            &with_empty,
            SpanPoint::new(0, 0, 0),
            SpanPoint::new(4, 0, 0),
        );

        let mut uid = 0;
        let without = vec![paragraph(&book, 5, &mut uid), paragraph(&book, 5, &mut uid)];
        let plain = compute_span(
            &without,
            SpanPoint::new(0, 0, 0),
            SpanPoint::new(2, 0, 0),
        );
        assert_eq!(cost, plain);
    }

    #[test]
    fn test_cache_tag_compare_survives_collisions() {
        let mut cache = ColumnCache::new();
        let a = [0u32, 0, 0, 0, 0, 1];
        // Craft a second key landing in the same slot by flipping bits
        // above the mask: identical slot, different tag.
        let b = [0u32, 0, CACHE_ENTRIES as u32, 0, 0, 1];
        assert_eq!(cache.slot(&a), cache.slot(&b));

        cache.store(a, 10, Abs::pt(1.0));
        assert_eq!(cache.probe(&a), Some((10, Abs::pt(1.0))));

        // Storing the colliding key overwrites silently; the first key
        // misses rather than returning the wrong value.
        cache.store(b, 20, Abs::pt(2.0));
        assert_eq!(cache.probe(&a), None);
        assert_eq!(cache.probe(&b), Some((20, Abs::pt(2.0))));
    }
}
