//! Cross-references: margin-column paragraphs built ahead of time from
//! the external database, looked up by source citation, and placed
//! against page positions with collision repair.

use std::fs;
use std::path::Path;

use ecow::EcoString;
use scriptum_library::diag::{bail, file_error, StrResult};
use scriptum_library::fonts::nick;
use scriptum_library::geom::Abs;
use scriptum_library::model::{Alignment, CrossrefKey, Paragraph, SpanPoint};

use crate::{Engine, Margins, Target, MAX_VERSES_ON_PAGE};

/// Number of hash bins for citation lookup.
const BINS: usize = 0x10000;

/// One cross-reference paragraph, laid out at column width.
#[derive(Debug)]
pub(crate) struct CrossrefEntry {
    pub key: CrossrefKey,
    /// Physical lines at cross-reference column width.
    pub para: Paragraph,
    pub height: Abs,
    /// `tail_heights[j - 1]`: total height (with minimum gaps) of the
    /// last `j` entries registered up to and including this one. The
    /// chain stops just past the first value exceeding the page height,
    /// marking the first verse that cannot fit on a full page.
    pub tail_heights: Vec<Abs>,
}

/// All cross-reference state of a run.
#[derive(Debug)]
pub(crate) struct Crossrefs {
    pub entries: Vec<CrossrefEntry>,
    bins: Vec<Vec<usize>>,
    /// Body anchors in document order: span of the verse-number piece
    /// and the entry it refers to.
    pub anchors: Vec<(SpanPoint, usize)>,
    /// The paragraph a cross-reference under construction writes into.
    pub scratch: Paragraph,
    /// Per-page placement queue: entry index and anchor y (top-down).
    pub queue: Vec<(usize, Abs)>,
}

/// The citation hash: `((chapter << 8) | verse) & 0xFFFF`.
fn bin_of(key: &CrossrefKey) -> usize {
    (((key.chapter << 8) | key.verse) & 0xffff) as usize
}

impl Crossrefs {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            bins: vec![Vec::new(); BINS],
            anchors: Vec::new(),
            scratch: Paragraph::new(),
            queue: Vec::new(),
        }
    }

    /// Find the entry for a citation.
    pub fn find(&self, key: &CrossrefKey) -> Option<usize> {
        self.bins[bin_of(key)]
            .iter()
            .copied()
            .find(|&index| self.entries[index].key == *key)
    }

    pub fn contains(&self, key: &CrossrefKey) -> bool {
        self.find(key).is_some()
    }

    /// Register a laid-out cross-reference paragraph and extend the
    /// precomputed tail-set heights.
    pub fn insert(
        &mut self,
        key: CrossrefKey,
        para: Paragraph,
        height: Abs,
        min_gap: Abs,
        page_height: Abs,
    ) {
        let index = self.entries.len();
        self.bins[bin_of(&key)].push(index);

        // Heights of every "last j entries" set ending here, walking
        // backwards from this entry.
        let mut tail_heights = Vec::new();
        let mut total = Abs::zero();
        for j in 1..=MAX_VERSES_ON_PAGE.min(index + 1) {
            let entry_height = if j == 1 {
                height
            } else {
                self.entries[index - (j - 1)].height
            };
            total += entry_height + min_gap;
            tail_heights.push(total);
            if total > page_height {
                // The record marking the first verse that cannot fit is
                // kept intentionally.
                break;
            }
        }

        self.entries.push(CrossrefEntry { key, para, height, tail_heights });
    }

    /// Record that a body verse-number piece references an entry.
    pub fn anchor(&mut self, key: &CrossrefKey, span: SpanPoint) {
        if let Some(index) = self.find(key) {
            self.anchors.push((span, index));
        }
    }

    /// The anchors falling within `[start, end)`.
    pub fn anchors_in(&self, start: SpanPoint, end: SpanPoint) -> &[(SpanPoint, usize)] {
        let lo = self.anchors.partition_point(|(span, _)| *span < start);
        let hi = self.anchors.partition_point(|(span, _)| *span < end);
        &self.anchors[lo..hi]
    }

    /// Total height of the cross-references anchored within a span,
    /// using the precomputed tail-set chain when the page's set is a
    /// contiguous run of registrations. `None` means the set is known
    /// to exceed a full page.
    pub fn tail_height(&self, start: SpanPoint, end: SpanPoint, min_gap: Abs) -> (usize, Option<Abs>) {
        let anchored = self.anchors_in(start, end);
        let count = anchored.len();
        if count == 0 {
            return (0, Some(Abs::zero()));
        }

        let first = anchored[0].1;
        let last = anchored[count - 1].1;
        if last >= first && last + 1 - first == count {
            // A contiguous tail set ending at `last`; past the end of
            // the chain means the set cannot fit on a full page.
            let chain = &self.entries[last].tail_heights;
            return (count, chain.get(count - 1).copied());
        }

        // Fall back to a direct sum.
        let mut total = Abs::zero();
        for &(_, index) in anchored {
            total += self.entries[index].height + min_gap;
        }
        (count, Some(total))
    }

    /// Queue an entry for placement on the current page.
    pub fn queue(&mut self, index: usize, y: Abs) -> StrResult<()> {
        if self.queue.len() >= MAX_VERSES_ON_PAGE {
            bail!(
                "too many verses with cross-references on the same page \
                 (limit is {MAX_VERSES_ON_PAGE})"
            );
        }
        self.queue.push((index, y));
        Ok(())
    }

    pub fn reset_queue(&mut self) {
        self.queue.clear();
    }

    /// Spread the queued paragraphs so that none overlap and none run
    /// past `y_limit` (top-down coordinates).
    pub fn reposition(&mut self, y_limit: Abs, min_gap: Abs) {
        let heights: Vec<Abs> =
            self.queue.iter().map(|&(index, _)| self.entries[index].height).collect();
        let mut ys: Vec<Abs> = self.queue.iter().map(|&(_, y)| y).collect();
        reposition_list(&mut ys, &heights, y_limit, min_gap);
        for (slot, y) in self.queue.iter_mut().zip(ys) {
            slot.1 = y;
        }
    }
}

/// The two-pass collision repair over anchor positions (top-down
/// coordinates): push overlapping paragraphs down, clamp the last to the
/// limit, then push overlaps back up.
pub(crate) fn reposition_list(ys: &mut [Abs], heights: &[Abs], y_limit: Abs, min_gap: Abs) {
    let count = ys.len();
    if count == 0 {
        return;
    }

    for i in 1..count {
        let overlap = ys[i - 1] + heights[i - 1] + min_gap - ys[i];
        if overlap > Abs::zero() {
            ys[i] += overlap;
        }
    }

    if ys[count - 1] + heights[count - 1] > y_limit - min_gap {
        ys[count - 1] = y_limit - heights[count - 1] - min_gap;
    }

    for i in (0..count.saturating_sub(1)).rev() {
        let overlap = ys[i] + heights[i] + min_gap - ys[i + 1];
        if overlap > Abs::zero() {
            ys[i] -= overlap;
        }
    }
}

impl Engine {
    /// Load the cross-reference database: one entry per line,
    /// `<book> <chapter>:<verse> <references...>`.
    pub fn load_crossrefs(&mut self, path: &Path) -> StrResult<()> {
        let text = fs::read_to_string(path).map_err(|err| file_error(err, path))?;
        let mut count = 0usize;
        for (index, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let parsed = parse_db_line(line);
            let Some((book, chapter, verse, refs)) = parsed else {
                bail!("{}:{}: malformed cross-reference entry", path.display(), index + 1);
            };
            let key = CrossrefKey { book, chapter, verse };
            self.build_crossref(key, &refs)?;
            count += 1;
            if count % 1000 == 0 {
                tracing::info!(count, "read cross-reference entries");
            }
        }
        tracing::info!(count, "cross-reference database loaded");
        Ok(())
    }

    /// Build and register the margin paragraph for one database entry.
    pub(crate) fn build_crossref(
        &mut self,
        key: CrossrefKey,
        refs: &str,
    ) -> StrResult<()> {
        // Cross-reference paragraphs are set in their own narrow column.
        let saved_margins = self.margins;
        self.margins = Margins {
            left: Abs::zero(),
            right: self.config.page_width - self.config.crossref_column_width,
        };
        self.crossrefs.scratch = Paragraph::new();
        self.target = Target::Crossref;

        let result = (|| -> StrResult<()> {
            let marker = self.fonts.resolve(nick::CROSSREF_MARKER)?;
            self.push_style(Alignment::Justified, marker)?;
            if key.chapter > 0 {
                let chapter = ecow::eco_format!("{}", key.chapter);
                self.append_text(&chapter, true, 0)?;
                self.append_text(":", true, 0)?;
            }
            let verse = ecow::eco_format!("{}", key.verse);
            self.append_text(&verse, false, 0)?;
            self.append_space(true, 0)?;
            self.pop_style()?;

            let face = self.fonts.resolve(nick::CROSSREF)?;
            self.push_style(Alignment::Justified, face)?;
            for (i, word) in refs.split_whitespace().enumerate() {
                if i > 0 {
                    self.append_space(false, 0)?;
                }
                self.append_text(word, false, 0)?;
            }
            self.pop_style()?;
            Ok(())
        })();

        self.target = Target::Body;
        self.margins = saved_margins;
        result?;

        self.crossrefs.scratch.flush_current();
        let mut raw = std::mem::take(&mut self.crossrefs.scratch);
        raw.src_book = Some(key.book.clone());
        raw.src_chapter = key.chapter;
        raw.src_verse = key.verse;

        let laid = self.layout_paragraph(&raw, false)?;
        let height = laid.total_height;
        self.crossrefs.insert(
            key,
            laid,
            height,
            self.config.crossref_min_vspace,
            self.config.page_height,
        );
        Ok(())
    }
}

/// Parse `<book> <chapter>:<verse> <rest>`.
fn parse_db_line(line: &str) -> Option<(EcoString, u32, u32, String)> {
    let (book, rest) = line.split_once(' ')?;
    let rest = rest.trim_start();
    let (citation, refs) = match rest.split_once(' ') {
        Some((citation, refs)) => (citation, refs),
        None => (rest, ""),
    };
    let (chapter, verse) = citation.split_once(':')?;
    Some((
        book.into(),
        chapter.parse().ok()?,
        verse.parse().ok()?,
        refs.trim().to_string(),
    ))
}
