//! Footnote collection: marks, per-footnote paragraphs anchored to body
//! lines, and the queries the page optimizer and emitter need.

use ecow::EcoString;
use rustc_hash::FxHashMap;
use scriptum_library::diag::{bail, StrResult};
use scriptum_library::fonts::nick;
use scriptum_library::geom::Abs;
use scriptum_library::model::{Alignment, Line, LineUid, Paragraph, SpanPoint};

use crate::{Engine, MAX_FOOTNOTES_ON_PAGE};

/// The largest number of footnotes a run can mark (`a`..`z`, `aa`..`zz`,
/// `aaa`..`zzz`).
const MAX_MARKS: usize = 26 + 26 * 26 + 26 * 26 * 26;

/// One collected footnote.
#[derive(Debug)]
pub(crate) struct FootnoteEntry {
    pub mark: EcoString,
    /// Uid of the body line carrying the mark. At collection time this
    /// is the long line under construction; when the body is broken for
    /// emission it is rewritten to the physical line's uid, which then
    /// orders the page's footnote block.
    pub anchor_uid: LineUid,
    /// Span coordinate of the mark piece in the body; this is what the
    /// page optimizer keys on.
    pub anchor: SpanPoint,
    /// The footnote's content as authored (long lines).
    pub para: Paragraph,
    /// Height of the footnote laid out alone at column width.
    pub height: Abs,
}

/// All footnote state of a run.
#[derive(Debug, Default)]
pub(crate) struct Footnotes {
    pub entries: Vec<FootnoteEntry>,
    /// The paragraph a footnote currently under collection writes into.
    pub scratch: Paragraph,
    /// Memoized composite block heights by footnote index range, shared
    /// between the page optimizer's candidates.
    pub height_cache: FxHashMap<(usize, usize), Abs>,
    /// Style-stack depth at which collection began; the matching pop
    /// ends the footnote.
    collecting_depth: Option<usize>,
    /// Mark of the footnote under collection.
    pending: Option<(EcoString, LineUid, SpanPoint)>,
}

/// The mark text for footnote number `n` (zero-based): `a`..`z`, then
/// `aa`..`zz`, then `aaa`...
pub(crate) fn mark_text(n: usize) -> EcoString {
    let alphabet = (b'z' - b'a' + 1) as usize;
    let letter = |i: usize| (b'a' + (i % alphabet) as u8) as char;
    let mut mark = EcoString::new();
    if n < alphabet {
        mark.push(letter(n));
    } else if n < alphabet + alphabet * alphabet {
        let n = n - alphabet;
        mark.push(letter(n / alphabet));
        mark.push(letter(n));
    } else {
        let n = n - alphabet - alphabet * alphabet;
        mark.push(letter(n / (alphabet * alphabet)));
        mark.push(letter(n / alphabet));
        mark.push(letter(n));
    }
    mark
}

impl Footnotes {
    pub fn new() -> Self {
        Self::default()
    }

    /// The mark for the next footnote.
    pub fn next_mark(&self) -> StrResult<EcoString> {
        let n = self.entries.len();
        if n >= MAX_MARKS {
            bail!("too many footnotes (limit is {MAX_MARKS})");
        }
        Ok(mark_text(n))
    }

    /// Begin collecting a footnote anchored at the given body line.
    pub fn begin(
        &mut self,
        mark: EcoString,
        anchor_uid: LineUid,
        anchor: SpanPoint,
        depth: usize,
    ) {
        self.scratch = Paragraph::new();
        self.pending = Some((mark, anchor_uid, anchor));
        self.collecting_depth = Some(depth);
    }

    /// The style depth at which the current footnote began, if one is
    /// being collected.
    pub fn collecting_depth(&self) -> Option<usize> {
        self.collecting_depth
    }

    /// Finish the current footnote with its collected paragraph and
    /// measured height.
    pub fn finish(&mut self, para: Paragraph, height: Abs) {
        if let Some((mark, anchor_uid, anchor)) = self.pending.take() {
            self.entries.push(FootnoteEntry { mark, anchor_uid, anchor, para, height });
        }
        self.collecting_depth = None;
    }

    /// Rewrite the anchor uid of the footnote with the given mark to the
    /// physical line built for it, so the emitter draws the page's
    /// footnote block in the order the anchoring lines appear.
    pub fn rebind(&mut self, mark: &str, uid: LineUid) {
        for entry in &mut self.entries {
            if entry.mark == mark {
                entry.anchor_uid = uid;
                break;
            }
        }
    }

    /// Indices of the footnotes anchored within `[start, end)`.
    pub fn range_in(&self, start: SpanPoint, end: SpanPoint) -> std::ops::Range<usize> {
        let lo = self.entries.partition_point(|e| e.anchor < start);
        let hi = self.entries.partition_point(|e| e.anchor < end);
        lo..hi
    }

    /// The footnotes anchored within `[start, end)` in drawing order:
    /// by the uid of the physical line that carries each mark, as
    /// rewritten while the page's body was broken for emission.
    pub fn page_order(&self, start: SpanPoint, end: SpanPoint) -> Vec<usize> {
        let mut order: Vec<usize> = self.range_in(start, end).collect();
        order.sort_by_key(|&index| self.entries[index].anchor_uid.0);
        order
    }

    /// Fail if a page would carry more footnotes than allowed.
    pub fn check_page_capacity(&self, count: usize) -> StrResult<()> {
        if count > MAX_FOOTNOTES_ON_PAGE {
            let marks: Vec<&str> =
                self.entries.iter().map(|e| e.mark.as_str()).collect();
            bail!(
                "too many footnotes on a single page (limit is \
                 {MAX_FOOTNOTES_ON_PAGE}); marks in run: {}",
                marks.join(" ")
            );
        }
        Ok(())
    }
}

impl Engine {
    /// Concatenate footnote paragraphs (in the given order) into the
    /// single flowing paragraph the bottom block is broken from. The
    /// leading elastic spaces of each footnote become the gaps between
    /// them once the line breaker reflows the whole block.
    pub(crate) fn footnote_composite(&mut self, order: &[usize], column: Abs) -> Paragraph {
        let uid = self.alloc_uid();
        let mut line = Line::new(uid, Alignment::Justified, column);
        for &index in order {
            for source in &self.footnotes.entries[index].para.lines {
                if source.is_vspace() {
                    continue;
                }
                for piece in &source.pieces {
                    let is_mark = self.fonts.is(piece.face, nick::FOOTNOTEMARK);
                    line.append(piece.clone(), is_mark);
                }
            }
        }
        let mut composite = Paragraph::new();
        composite.lines.push(line);
        composite
    }

    /// The height the span's footnotes will occupy at the bottom of a
    /// page. Summing the individually broken footnotes would
    /// overestimate (concatenation lets a line's slack absorb the next
    /// footnote's leading words), so this measures the same composite
    /// layout emission draws, memoized per footnote index range.
    pub(crate) fn footnote_block_height(
        &mut self,
        start: SpanPoint,
        end: SpanPoint,
    ) -> StrResult<(usize, Abs)> {
        let range = self.footnotes.range_in(start, end);
        let count = range.len();
        if count == 0 {
            return Ok((0, Abs::zero()));
        }
        if let Some(&height) =
            self.footnotes.height_cache.get(&(range.start, range.end))
        {
            return Ok((count, height));
        }

        let order: Vec<usize> = range.clone().collect();
        let composite = self.footnote_composite(&order, self.config.column_width());
        let laid = self.layout_paragraph(&composite, false)?;
        let height = laid.total_height;
        self.footnotes.height_cache.insert((range.start, range.end), height);
        Ok((count, height))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mark_sequence() {
        assert_eq!(mark_text(0), "a");
        assert_eq!(mark_text(25), "z");
        assert_eq!(mark_text(26), "aa");
        assert_eq!(mark_text(27), "ab");
        assert_eq!(mark_text(26 + 26), "ba");
        assert_eq!(mark_text(26 + 26 * 26 - 1), "zz");
        assert_eq!(mark_text(26 + 26 * 26), "aaa");
        assert_eq!(mark_text(MAX_MARKS - 1), "zzz");
    }

    #[test]
    fn test_rebind_rewrites_anchor() {
        let mut footnotes = Footnotes::new();
        footnotes.begin("a".into(), LineUid(1), SpanPoint::new(0, 0, 0), 1);
        footnotes.finish(Paragraph::new(), Abs::pt(10.0));
        footnotes.rebind("a", LineUid(99));
        assert_eq!(footnotes.entries[0].anchor_uid, LineUid(99));
    }

    #[test]
    fn test_range_in_selects_by_anchor_span() {
        let mut footnotes = Footnotes::new();
        for (n, para_index) in [(0, 0), (1, 2), (2, 5)] {
            footnotes.begin(
                mark_text(n),
                LineUid(n as u32),
                SpanPoint::new(para_index, 0, 0),
                1,
            );
            footnotes.finish(Paragraph::new(), Abs::pt(10.0));
        }
        let range =
            footnotes.range_in(SpanPoint::new(1, 0, 0), SpanPoint::new(5, 0, 0));
        assert_eq!(range, 1..2);
    }

    #[test]
    fn test_page_order_follows_rebound_uids() {
        let mut footnotes = Footnotes::new();
        footnotes.begin("a".into(), LineUid(1), SpanPoint::new(0, 0, 0), 1);
        footnotes.finish(Paragraph::new(), Abs::pt(10.0));
        footnotes.begin("b".into(), LineUid(2), SpanPoint::new(0, 0, 4), 1);
        footnotes.finish(Paragraph::new(), Abs::pt(10.0));

        // Emission rewrites the anchors to physical line uids; the
        // drawing order follows them, not the collection order.
        footnotes.rebind("a", LineUid(9));
        footnotes.rebind("b", LineUid(7));
        let order =
            footnotes.page_order(SpanPoint::new(0, 0, 0), SpanPoint::new(1, 0, 0));
        assert_eq!(order, vec![1, 0]);
    }
}
