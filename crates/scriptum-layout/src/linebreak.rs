//! The line breaker: the per-long-line dynamic program that partitions a
//! long line's pieces into physical lines of minimal total penalty.
//!
//! Segment costs reward fullness quadratically, allow footnote marks to
//! hang over trailing low punctuation, and account for the indent that a
//! multi-line drop cap imposes on the lines it spans.

use scriptum_library::diag::{bail, StrResult};
use scriptum_library::fonts::{nick, FontBook};
use scriptum_library::geom::Abs;
use scriptum_library::model::{Line, Paragraph, IMPOSSIBLE};

use crate::metrics::line_extent;
use crate::Engine;

/// Code points that may protrude into the margin.
pub(crate) fn is_hangable(c: char) -> bool {
    matches!(
        c,
        '.' | ','
            | ';'
            | ':'
            | '\''
            | '"'
            | '-'
            | '\u{2018}'
            | '\u{2019}'
            | '\u{201c}'
            | '\u{201d}'
            | '\u{2013}'
            | '\u{2014}'
            | '\u{00ab}'
            | '\u{00bb}'
            | '\u{2039}'
            | '\u{203a}'
    )
}

/// The trailing run of low punctuation that a footnote mark may hang
/// over: periods, commas, hyphens and spaces.
pub(crate) fn low_punct_suffix(text: &str) -> &str {
    let head = text.trim_end_matches(['.', ',', '-', ' ']);
    &text[head.len()..]
}

/// The width of the leading hangable code points of the piece at `index`.
pub(crate) fn leading_hang(fonts: &FontBook, line: &Line, index: usize) -> Abs {
    let Some(piece) = line.pieces.get(index) else { return Abs::zero() };
    let hangable: usize = piece
        .text
        .chars()
        .take_while(|&c| is_hangable(c))
        .map(char::len_utf8)
        .sum();
    if hangable == 0 {
        return Abs::zero();
    }
    fonts.text_width(piece.face, piece.size, &piece.text[..hangable])
}

/// The cost of placing pieces `a..b` of a long line on a single physical
/// line, given that `lines_before` physical lines of this long line
/// precede it. Returns [`IMPOSSIBLE`] if the segment cannot fit.
pub(crate) fn segment_cost(
    fonts: &FontBook,
    para: &Paragraph,
    line: &Line,
    a: usize,
    b: usize,
    lines_before: u32,
) -> i64 {
    let mut widths: Vec<Abs> =
        line.pieces[a..b].iter().map(|piece| piece.natural_width).collect();

    // Footnote marks may hang over trailing low punctuation of the
    // preceding piece; the mark's own width grows to `max(own, hang)` so
    // that the forward advance stays correct.
    for i in a + 1..b {
        if !fonts.is(line.pieces[i].face, nick::FOOTNOTEMARK) {
            continue;
        }
        let prev = &line.pieces[i - 1];
        let suffix = low_punct_suffix(&prev.text);
        if suffix.is_empty() {
            continue;
        }
        let hang = fonts.text_width(prev.face, prev.size, suffix);
        widths[i - 1 - a] = prev.natural_width - hang;
        widths[i - a].set_max(hang);
    }

    let mut width: Abs = widths.iter().copied().sum();

    let dropcap_lines = line
        .pieces
        .first()
        .map(|piece| fonts.face(piece.face).line_count)
        .unwrap_or(1);
    if dropcap_lines > 1 {
        if a == 0 {
            // The drop cap starts this segment. A footnote mark and
            // left-hangable punctuation right after it tuck into the
            // reserved gutter instead of widening the line.
            let mut discount = Abs::zero();
            let mut next = 1;
            if b > 1 && fonts.is(line.pieces[1].face, nick::FOOTNOTEMARK) {
                discount += line.pieces[1].natural_width;
                next = 2;
            }
            if next < b {
                discount += leading_hang(fonts, line, next);
            }
            width -= discount;
        } else if lines_before < dropcap_lines {
            // A line still covered by the drop cap is narrowed by its
            // margin.
            width += para.drop_char_left_margin;
        }
    }

    if !line.max_width.fits(width) {
        return IMPOSSIBLE;
    }

    let fullness = width / line.max_width * 100.0;
    let empty = 100.0 - fullness;
    (empty * empty) as i64
}

/// The dynamic programming state for breaking one long line.
pub(crate) struct BreakDp {
    /// `costs[i]`: minimal total penalty of breaking the pieces up to
    /// cut position `i`.
    pub costs: Vec<i64>,
    /// Back-pointers; `prev[i] < i` always.
    pub prev: Vec<usize>,
    /// Number of physical lines on the optimal path to each cut.
    pub counts: Vec<u32>,
    /// Accumulated height of the physical lines on the optimal path.
    pub heights: Vec<Abs>,
}

/// Run the line-break DP over the piece range `start..end`.
pub(crate) fn run_dp(
    fonts: &FontBook,
    line_spacing: f64,
    para: &Paragraph,
    line: &Line,
    start: usize,
    end: usize,
) -> BreakDp {
    let mut dp = BreakDp {
        costs: vec![IMPOSSIBLE; end + 1],
        prev: vec![0; end + 1],
        counts: vec![0; end + 1],
        heights: vec![Abs::zero(); end + 1],
    };
    dp.costs[start] = 0;

    for i in start..end {
        if dp.costs[i] == IMPOSSIBLE {
            continue;
        }
        for j in i + 1..=end {
            let cost = segment_cost(fonts, para, line, i, j, dp.counts[i]);
            if cost == IMPOSSIBLE {
                // Wider segments only get wider.
                break;
            }
            // A nobreak piece forbids a cut right after it (the end of
            // the range is not a cut).
            if j != end && line.pieces[j - 1].nobreak {
                continue;
            }
            let total = dp.costs[i].saturating_add(cost);
            if total < dp.costs[j] {
                dp.costs[j] = total;
                dp.prev[j] = i;
                dp.counts[j] = dp.counts[i] + 1;
                dp.heights[j] =
                    dp.heights[i] + line_extent(fonts, line_spacing, line, i, j).0;
            }
        }
    }

    dp
}

impl Engine {
    /// Break the piece range `start..end` of a long line into physical
    /// lines appended to `out`. Returns the total penalty of the chosen
    /// partition.
    ///
    /// With `rebind` set, footnote marks encountered in the output are
    /// re-anchored to the uid of the physical line that carries them.
    pub(crate) fn break_line_range(
        &mut self,
        para: &Paragraph,
        line: &Line,
        start: usize,
        end: usize,
        out: &mut Paragraph,
        rebind: bool,
    ) -> StrResult<i64> {
        if start >= end {
            return Ok(0);
        }

        let dp = run_dp(
            &self.fonts,
            self.config.line_spacing,
            para,
            line,
            start,
            end,
        );

        // Walk the back-pointers into source order.
        let mut cuts = Vec::new();
        let mut position = end;
        while position > start {
            let from = dp.prev[position];
            if from >= position {
                bail!("circular path in line break reconstruction");
            }
            cuts.push((from, position));
            position = from;
        }
        cuts.reverse();

        let dropcap_lines = line
            .pieces
            .first()
            .map(|piece| self.fonts.face(piece.face).line_count)
            .unwrap_or(1);

        for (k, &(a, b)) in cuts.iter().enumerate() {
            let mut built = Line::new(self.alloc_uid(), line.alignment, line.max_width);
            built.left_margin = line.left_margin;
            built.poem_level = line.poem_level;

            let k = k as u32;
            if dropcap_lines > 1 && k > 0 && k < dropcap_lines {
                // Still covered by the drop cap.
                built.left_margin = line.left_margin + para.drop_char_left_margin;
                built.max_width = line.max_width - para.drop_char_left_margin;
            }
            if dropcap_lines > 1 && k + 1 < dropcap_lines {
                // The drop cap spans into the next line; keep them together.
                built.tied_to_next = true;
            }
            if line.poem_level > 0 && k > 0 {
                // Wrapped poetry lines indent further.
                built.left_margin += self.config.poetry_wrap_indent;
                built.max_width -= self.config.poetry_wrap_indent;
            }

            for piece in &line.pieces[a..b] {
                if rebind && self.fonts.is(piece.face, nick::FOOTNOTEMARK) {
                    self.footnotes.rebind(&piece.text, built.uid);
                }
                let is_mark = self.fonts.is(piece.face, nick::FOOTNOTEMARK);
                built.append(piece.clone(), is_mark);
            }

            if b == end {
                built.tied_to_next |= line.tied_to_next;
            }

            let (height, ascent, descent) =
                line_extent(&self.fonts, self.config.line_spacing, line, a, b);
            built.height = height;
            built.ascent = ascent;
            built.descent = descent;

            out.lines.push(built);
        }

        Ok(dp.costs[end])
    }

    /// Break every long line of a paragraph, producing the paragraph of
    /// physical lines.
    pub(crate) fn layout_paragraph(
        &mut self,
        para: &Paragraph,
        rebind: bool,
    ) -> StrResult<Paragraph> {
        let mut out = Paragraph::new();
        out.src_book = para.src_book.clone();
        out.src_chapter = para.src_chapter;
        out.src_verse = para.src_verse;
        for line in &para.lines {
            if line.is_vspace() {
                out.lines.push(line.clone());
            } else {
                self.break_line_range(para, line, 0, line.pieces.len(), &mut out, rebind)?;
            }
        }
        out.total_height = out.lines.iter().map(|line| line.height).sum();
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scriptum_library::fonts::{FaceId, FontBook, LoadedFont, Rgb, TypeFace};
    use scriptum_library::model::{Alignment, LineUid, Piece};

    pub(crate) fn test_fonts() -> FontBook {
        let mut book = FontBook::new();
        let font = book.add_font(LoadedFont::uniform(500.0)).unwrap();
        for (nickname, size, line_count) in [
            ("blackletter", 10.0, 1),
            ("versenum", 5.0, 1),
            ("chapternum", 20.0, 3),
            ("footnotemark", 5.0, 1),
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

    /// A word piece of exactly `width` points in the blackletter face.
    fn word(fonts: &FontBook, width: f64) -> Piece {
        // With the uniform font, each char is half the size in points.
        let chars = (width / 5.0) as usize;
        let text: String = "x".repeat(chars);
        let face = fonts.resolve("blackletter").unwrap();
        let measured = fonts.text_width(face, 10.0, &text);
        assert_eq!(measured, Abs::pt(width));
        Piece::new(text, face, 10.0, measured, Abs::zero(), false, 0)
    }

    fn long_line(fonts: &FontBook, widths: &[f64], max: f64) -> Line {
        let mut line = Line::new(LineUid(0), Alignment::Justified, Abs::pt(max));
        for &w in widths {
            line.append(word(fonts, w), false);
        }
        line
    }

    #[test]
    fn test_single_full_line_has_zero_penalty() {
        // Ten 10pt pieces in a 100pt column fill it exactly.
        let fonts = test_fonts();
        let para = Paragraph::new();
        let line = long_line(&fonts, &[10.0; 10], 100.0);
        assert_eq!(segment_cost(&fonts, &para, &line, 0, 10, 0), 0);
        let dp = run_dp(&fonts, 1.0, &para, &line, 0, 10);
        assert_eq!(dp.costs[10], 0);
        assert_eq!(dp.counts[10], 1);
    }

    #[test]
    fn test_overwide_segment_is_impossible() {
        let fonts = test_fonts();
        let para = Paragraph::new();
        let line = long_line(&fonts, &[60.0, 60.0], 100.0);
        assert_eq!(segment_cost(&fonts, &para, &line, 0, 2, 0), IMPOSSIBLE);
        // But each piece alone fits.
        assert!(segment_cost(&fonts, &para, &line, 0, 1, 0) < IMPOSSIBLE);
        let dp = run_dp(&fonts, 1.0, &para, &line, 0, 2);
        assert_eq!(dp.counts[2], 2);
    }

    #[test]
    fn test_eleven_pieces_split_minimizes_badness() {
        // Eleven 10pt pieces in a 100pt column: every split is some
        // (k, 11 - k); the best is 6/5 or 5/6 with penalty 1600 + 2500.
        let fonts = test_fonts();
        let para = Paragraph::new();
        let line = long_line(&fonts, &[10.0; 11], 100.0);
        let dp = run_dp(&fonts, 1.0, &para, &line, 0, 11);
        assert_eq!(dp.counts[11], 2);
        assert_eq!(dp.costs[11], 1600 + 2500);
    }

    #[test]
    fn test_nobreak_forbids_cut_after_piece() {
        let fonts = test_fonts();
        let para = Paragraph::new();
        // Three 40pt pieces; the middle one forbids a break after it.
        let mut line = long_line(&fonts, &[40.0, 40.0, 40.0], 100.0);
        line.pieces[1].nobreak = true;
        let dp = run_dp(&fonts, 1.0, &para, &line, 0, 3);
        // The only legal cut is after piece 0.
        assert_eq!(dp.prev[3], 1);
        assert_eq!(dp.counts[3], 2);
    }

    #[test]
    fn test_back_pointers_are_monotonic() {
        let fonts = test_fonts();
        let para = Paragraph::new();
        let line = long_line(&fonts, &[10.0; 37], 100.0);
        let dp = run_dp(&fonts, 1.0, &para, &line, 0, 37);
        let mut position = 37;
        while position > 0 {
            assert!(dp.prev[position] < position);
            position = dp.prev[position];
        }
    }

    #[test]
    fn test_footnote_mark_hangs_over_punctuation() {
        let fonts = test_fonts();
        let para = Paragraph::new();
        let black = fonts.resolve("blackletter").unwrap();
        let mark = fonts.resolve("footnotemark").unwrap();

        let mut line = Line::new(LineUid(0), Alignment::Justified, Abs::pt(100.0));
        let text = "word,";
        let width = fonts.text_width(black, 10.0, text);
        line.append(Piece::new(text, black, 10.0, width, Abs::zero(), false, 0), false);
        let mark_width = fonts.text_width(mark, 5.0, "a");
        line.append(Piece::new("a", mark, 5.0, mark_width, Abs::zero(), false, 1), true);

        // The comma (5pt) is wider than the mark (2.5pt), so the mark
        // hangs fully over it: total width is the bare word plus the
        // comma width (the mark grows to the hang width).
        let cost = segment_cost(&fonts, &para, &line, 0, 2, 0);
        let expected_width = 25.0;
        let fullness = expected_width / 100.0 * 100.0;
        let empty = 100.0 - fullness;
        assert_eq!(cost, (empty * empty) as i64);
    }

    #[test]
    fn test_rebreaking_physical_lines_is_idempotent() {
        // Breaking the breaker's own output changes nothing: each
        // physical line re-fed as a long line stays one line.
        let fonts = test_fonts();
        let para = Paragraph::new();
        let line = long_line(&fonts, &[10.0; 23], 100.0);
        let dp = run_dp(&fonts, 1.0, &para, &line, 0, 23);

        let mut position = 23;
        while position > 0 {
            let from = dp.prev[position];
            let sub = long_line(
                &fonts,
                &vec![10.0; position - from],
                100.0,
            );
            let again = run_dp(&fonts, 1.0, &para, &sub, 0, position - from);
            assert_eq!(again.counts[position - from], 1);
            position = from;
        }
    }
}
