//! The page optimizer: a whole-document dynamic program over piece
//! positions that chooses the set of page breaks minimizing the summed
//! page penalties.

use scriptum_library::determinism::determinism_event;
use scriptum_library::diag::{bail, StrResult};
use scriptum_library::geom::Abs;
use scriptum_library::model::SpanPoint;

use crate::{
    Engine, MAX_VERSES_ON_PAGE, OVERFULL_PAGE_PENALTY,
    UNDERFULL_PAGE_PENALTY_MULTIPLIER, WIDOW_PENALTY,
};

/// One page of the chosen render plan.
#[derive(Debug, Clone)]
pub struct PagePlan {
    /// First piece on the page.
    pub start: SpanPoint,
    /// First piece after the page (or the end sentinel).
    pub end: SpanPoint,
    /// Set when this page is the first of a book; the running head is
    /// suppressed there.
    pub starts_book: Option<usize>,
    /// The page's contribution to the total penalty.
    pub penalty: i64,
    /// Height of the body content on the page.
    pub height: Abs,
}

/// An entry of the page DP table.
#[derive(Copy, Clone)]
struct Best {
    cost: i64,
    prev: usize,
    pages: u32,
}

const UNSEEN: i64 = i64::MAX;

impl Engine {
    /// Every cut position in the document, one per piece, in order.
    pub(crate) fn positions(&self) -> Vec<SpanPoint> {
        let mut positions = Vec::new();
        for (para_index, para) in self.paragraphs.iter().enumerate() {
            for (line_index, line) in para.lines.iter().enumerate() {
                for piece_index in 0..line.pieces.len() {
                    positions.push(SpanPoint::new(para_index, line_index, piece_index));
                }
            }
        }
        positions
    }

    /// The position one past the last piece.
    fn end_sentinel(&self) -> SpanPoint {
        SpanPoint::new(self.paragraphs.len(), 0, 0)
    }

    /// Which book run a paragraph belongs to (0 before any book).
    fn book_of_para(&self, para: usize) -> usize {
        self.books
            .iter()
            .rposition(|book| book.first_para <= para)
            .map(|index| index + 1)
            .unwrap_or(0)
    }

    /// Whether ending a page just before position `i` separates a tied
    /// line from its successor.
    fn cut_is_widow(&self, positions: &[SpanPoint], i: usize) -> bool {
        if i == 0 || i >= positions.len() {
            return false;
        }
        let before = positions[i - 1];
        let after = positions[i];
        if (before.para, before.line) == (after.para, after.line) {
            // A cut inside a line is not a widow; the fragment penalties
            // already charge for it.
            return false;
        }
        self.paragraphs[before.para].lines[before.line].tied_to_next
    }

    /// Choose the optimal page breaks for the collected document.
    pub fn optimize(&mut self) -> StrResult<Vec<PagePlan>> {
        let positions = self.positions();
        if positions.is_empty() {
            return Ok(Vec::new());
        }

        let count = positions.len();
        let book_of: Vec<usize> =
            positions.iter().map(|p| self.book_of_para(p.para)).collect();
        let h_page = self.config.content_height();
        let min_gap = self.config.crossref_min_vspace;

        let mut best = vec![Best { cost: UNSEEN, prev: 0, pages: 0 }; count + 1];
        best[0].cost = 0;

        for j in 0..count {
            if best[j].cost == UNSEEN {
                continue;
            }
            if j % 4096 == 0 {
                tracing::debug!(start = j, total = count, "page optimization");
            }

            for i in j + 1..=count {
                // A page never spans a book boundary.
                if book_of[i - 1] != book_of[j] {
                    break;
                }

                let start = positions[j];
                let end = if i == count { self.end_sentinel() } else { positions[i] };

                let (span_penalty, h_body) = self.span_cost(start, end);
                // The footnote term is the height of the concatenated
                // block exactly as emission will lay it out.
                let (footnote_count, footnote_height) =
                    self.footnote_block_height(start, end)?;
                let h_eff = h_body + footnote_height;
                let overfull = !h_page.fits(h_eff);

                let mut cost = span_penalty;

                // Emptiness and the extra underfull weighting.
                if overfull {
                    cost = cost.saturating_add(OVERFULL_PAGE_PENALTY);
                } else {
                    let fullness = (100.0 * (h_eff / h_page)).clamp(0.0, 100.0);
                    let empty = 100.0 - fullness;
                    let squared = (empty * empty) as i64;
                    cost = cost
                        .saturating_add(16 * squared)
                        .saturating_add(UNDERFULL_PAGE_PENALTY_MULTIPLIER * squared);
                }

                if self.cut_is_widow(&positions, i) {
                    cost = cost.saturating_add(WIDOW_PENALTY);
                }

                // Floats in the margin column: the tallest tail set of
                // cross-references must fit beside the body.
                let (verse_count, crossref_height) =
                    self.crossrefs.tail_height(start, end, min_gap);
                let crossrefs_fit = match crossref_height {
                    Some(height) => height <= h_page && verse_count <= MAX_VERSES_ON_PAGE,
                    None => false,
                };
                if !crossrefs_fit {
                    cost = cost.saturating_add(OVERFULL_PAGE_PENALTY);
                }
                if footnote_count > crate::MAX_FOOTNOTES_ON_PAGE {
                    cost = cost.saturating_add(OVERFULL_PAGE_PENALTY);
                }

                let total = best[j].cost.saturating_add(cost);
                let pages = best[j].pages + 1;
                let better = total < best[i].cost
                    || (total == best[i].cost && pages < best[i].pages);
                if better {
                    best[i] = Best { cost: total, prev: j, pages };
                }

                if overfull {
                    // Taller candidates only get taller.
                    break;
                }
            }
        }

        if best[count].cost == UNSEEN {
            bail!("page optimization found no feasible pagination");
        }

        // Retrace the chosen breakpoints.
        let mut cuts = Vec::with_capacity(best[count].pages as usize + 1);
        let mut position = count;
        while position > 0 {
            cuts.push(position);
            let previous = best[position].prev;
            if previous >= position {
                bail!("circular path in page optimization back-pointers");
            }
            position = previous;
        }
        cuts.push(0);
        cuts.reverse();

        let mut plan = Vec::with_capacity(cuts.len() - 1);
        let mut previous_book = 0;
        for window in cuts.windows(2) {
            let (from, to) = (window[0], window[1]);
            let start = positions[from];
            let end = if to == count { self.end_sentinel() } else { positions[to] };
            let penalty = best[to].cost - best[from].cost;

            let book = book_of[from];
            let starts_book = if book != previous_book && book > 0 {
                Some(book - 1)
            } else {
                None
            };
            previous_book = book;

            let (_, height) = self.span_cost(start, end);
            determinism_event!(self.recorder, int: penalty);
            plan.push(PagePlan { start, end, starts_book, penalty, height });
        }

        tracing::info!(
            pages = plan.len(),
            penalty = best[count].cost,
            "page optimization complete"
        );
        Ok(plan)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use scriptum_library::config::Config;
    use scriptum_library::fonts::{FontBook, LoadedFont, Rgb, TypeFace};
    use scriptum_library::geom::Abs;

    use crate::Engine;

    pub(crate) fn test_fonts() -> FontBook {
        let mut book = FontBook::new();
        let font = book.add_font(LoadedFont::uniform(500.0)).unwrap();
        for (nickname, size, line_count) in [
            ("blackletter", 10.0, 1),
            ("redletter", 10.0, 1),
            ("versenum", 5.0, 1),
            ("chapternum", 30.0, 3),
            ("footnotemark", 5.0, 1),
            ("footnotemarkinfootnote", 5.0, 1),
            ("footnoteversenum", 6.0, 1),
            ("crossrefmarker", 5.0, 1),
            ("crossref", 5.0, 1),
            ("booktitle", 12.0, 1),
            ("header", 12.0, 1),
            ("booktab", 12.0, 1),
        ] {
            book.add_face(TypeFace {
                nickname: nickname.into(),
                font,
                size,
                smallcaps: None,
                baseline_delta: Abs::zero(),
                line_count,
                color: Rgb::BLACK,
            })
            .unwrap();
        }
        book
    }

    pub(crate) fn test_config() -> Config {
        let mut config = Config::default();
        // A 100pt column, five 11pt lines per page.
        config.page_width = Abs::pt(120.0);
        config.left_margin = Abs::pt(10.0);
        config.right_margin = Abs::pt(10.0);
        config.page_height = Abs::pt(75.0);
        config.top_margin = Abs::pt(10.0);
        config.bottom_margin = Abs::pt(10.0);
        config.line_spacing = 1.1;
        config.left_and_right = false;
        config.crossref_column_width = Abs::pt(0.0);
        config.crossref_margin_width = Abs::pt(0.0);
        config
    }

    fn engine() -> Engine {
        Engine::new(test_config(), test_fonts()).unwrap()
    }

    fn fill(engine: &mut Engine, words: usize) {
        let text: String = vec!["abcdefgh"; words].join(" ");
        let tokens = scriptum_syntax::tokenize(&text).unwrap();
        engine.process(&tokens).unwrap();
        engine.finish().unwrap();
    }

    #[test]
    fn test_single_short_paragraph_is_one_page() {
        let mut engine = engine();
        fill(&mut engine, 8);
        let plan = engine.optimize().unwrap();
        assert_eq!(plan.len(), 1);
    }

    #[test]
    fn test_long_text_splits_without_overfull_pages() {
        let mut engine = engine();
        fill(&mut engine, 120);
        let plan = engine.optimize().unwrap();
        assert!(plan.len() > 1);
        let h_page = engine.config.content_height();
        for page in &plan {
            assert!(h_page.fits(page.height), "page overfull: {:?}", page.height);
        }
        // Pages tile the document exactly.
        for pair in plan.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
        }
    }

    #[test]
    fn test_empty_document_has_no_pages() {
        let mut engine = engine();
        let plan = engine.optimize().unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn test_disabling_span_cache_keeps_breaks() {
        let mut cached = engine();
        fill(&mut cached, 90);
        let with_cache = cached.optimize().unwrap();

        let mut uncached = engine();
        uncached.columns.enabled = false;
        fill(&mut uncached, 90);
        let without_cache = uncached.optimize().unwrap();

        assert_eq!(with_cache.len(), without_cache.len());
        for (a, b) in with_cache.iter().zip(&without_cache) {
            assert_eq!(a.start, b.start);
            assert_eq!(a.end, b.end);
            assert_eq!(a.penalty, b.penalty);
        }
    }

    #[test]
    fn test_footnote_block_height_matches_composite_layout() {
        use scriptum_library::model::SpanPoint;

        // Three short footnotes: broken alone, each is one line, but
        // concatenated they flow together into a single line. The page
        // DP must score the concatenated block, not the sum.
        let mut engine = engine();
        let text = "one footnote{alpha} two footnote{beta} three footnote{gamma}";
        let tokens = scriptum_syntax::tokenize(text).unwrap();
        engine.process(&tokens).unwrap();
        engine.finish().unwrap();

        let start = SpanPoint::new(0, 0, 0);
        let end = SpanPoint::new(1, 0, 0);
        let (count, block) = engine.footnote_block_height(start, end).unwrap();
        assert_eq!(count, 3);

        let sum: Abs = engine.footnotes.entries.iter().map(|e| e.height).sum();
        assert!(block < sum, "block {block:?} is not tighter than the sum {sum:?}");

        // All footnote pieces share the footnote-mark linegap: a single
        // 5pt line at 1.1 spacing.
        assert!(block.approx_eq(Abs::pt(5.5)));
        assert!(sum.approx_eq(Abs::pt(16.5)));

        // Cached queries are stable.
        let (again_count, again_block) =
            engine.footnote_block_height(start, end).unwrap();
        assert_eq!(again_count, count);
        assert_eq!(again_block, block);
    }

    #[test]
    fn test_widow_penalty_moves_the_break() {
        use scriptum_library::model::SpanPoint;

        // Six one-line paragraphs at exactly full column width, two
        // lines per page. Untied, three full pages are optimal and the
        // break after paragraph 1 is taken; tying paragraph 1 to its
        // successor makes that cut a widow and shifts the whole plan.
        fn build(tied: bool) -> Vec<crate::pages::PagePlan> {
            let mut config = test_config();
            config.page_height = Abs::pt(42.0);
            let mut engine = Engine::new(config, test_fonts()).unwrap();
            let text = vec!["xxxxxxxxxxxxxxxxxxxx"; 6].join("\n\n");
            let tokens = scriptum_syntax::tokenize(&text).unwrap();
            engine.process(&tokens).unwrap();
            engine.finish().unwrap();
            if tied {
                engine.paragraphs[1].lines[0].tied_to_next = true;
            }
            engine.optimize().unwrap()
        }

        let widow_cut = SpanPoint::new(2, 0, 0);

        let untied = build(false);
        assert_eq!(untied.len(), 3);
        assert!(untied.iter().any(|page| page.end == widow_cut));

        let tied = build(true);
        assert_eq!(tied.last().unwrap().end.para, 6);
        assert!(!tied.iter().any(|page| page.end == widow_cut));
    }

    #[test]
    fn test_books_never_share_a_page() {
        let mut engine = engine();
        let text = "bookheader{Genesis}labelbook{Gen}\n\nfirst words here\n\n\
                    bookheader{Exodus}labelbook{Exo}\n\nsecond words here";
        let tokens = scriptum_syntax::tokenize(text).unwrap();
        engine.process(&tokens).unwrap();
        engine.finish().unwrap();

        let plan = engine.optimize().unwrap();
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0].starts_book, Some(0));
        assert_eq!(plan[1].starts_book, Some(1));
    }
}
