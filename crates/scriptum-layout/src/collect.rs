//! Collection: the token stream becomes paragraphs of long lines.
//!
//! This pass owns the style stack, routes text into the body, the
//! current footnote or a cross-reference under construction, and flushes
//! finished paragraphs into the analysed body list.

use ecow::EcoString;
use scriptum_library::diag::{bail, StrResult};
use scriptum_library::fonts::{nick, FaceId};
use scriptum_library::geom::Abs;
use scriptum_library::model::{Alignment, CrossrefKey, Line, Piece, SpanPoint};
use scriptum_syntax::{Token, TokenKind};

use crate::{
    BookRun, Engine, StyleSnapshot, Target, MAX_LINES_IN_PARAGRAPH, MAX_LINE_PIECES,
    STYLE_STACK_DEPTH,
};

impl Engine {
    /// Consume a token stream, appending to the document.
    pub fn process(&mut self, tokens: &[Token]) -> StrResult<()> {
        let mut i = 0;
        while i < tokens.len() {
            let token = &tokens[i];
            match token.kind {
                TokenKind::Tag => i = self.handle_tag(tokens, i)?,
                TokenKind::EndTag => {
                    self.handle_endtag()?;
                    i += 1;
                }
                TokenKind::Text => {
                    self.append_text(&token.text, false, i)?;
                    i += 1;
                }
                TokenKind::Space => {
                    self.append_space(false, i)?;
                    i += 1;
                }
                TokenKind::Paragraph => {
                    self.flush_paragraph()?;
                    i += 1;
                }
            }
        }
        Ok(())
    }

    /// Handle a tag token at `i`; returns the index to continue from.
    fn handle_tag(&mut self, tokens: &[Token], i: usize) -> StrResult<usize> {
        let name = tokens[i].text.clone();
        match name.as_str() {
            "bookheader" => {
                // A new book: flush pending content and label the tab.
                self.flush_paragraph()?;
                self.clear_style_stack()?;
                let (title, next) = tag_value(tokens, i)?;
                self.books.push(BookRun {
                    first_para: self.paragraphs.len(),
                    booktab: title.to_uppercase().into(),
                    title,
                    short_name: None,
                });
                Ok(next)
            }
            "labelbook" => {
                let (value, next) = tag_value(tokens, i)?;
                match self.books.last_mut() {
                    Some(book) => book.short_name = Some(value),
                    None => bail!("labelbook before any bookheader"),
                }
                Ok(next)
            }
            "footnote" => {
                let mark = self.footnotes.next_mark()?;
                let face = self.fonts.resolve(nick::FOOTNOTEMARK)?;
                self.push_style(Alignment::Justified, face)?;
                self.append_text(&mark, false, i)?;
                self.begin_footnote(mark, i)?;
                Ok(i + 1)
            }
            "poem" => {
                // Poetry nests; the matching end tag unwinds one level.
                self.push_style(Alignment::Left, self.styles.current)?;
                self.poem_depths.push(self.styles.depth());
                let target = self.target_mut();
                target.poem_level += 1;
                target.poem_subsequent_line = false;
                Ok(i + 1)
            }
            "thinspace" => {
                self.push_style(Alignment::Justified, self.styles.current)?;
                self.append_thinspace(i)?;
                Ok(i + 1)
            }
            _ => {
                let alignment = if name == nick::BOOKTITLE {
                    Alignment::Centred
                } else {
                    Alignment::Justified
                };
                match self.fonts.get(&name) {
                    Some(face) => self.push_style(alignment, face)?,
                    None => {
                        tracing::warn!("unknown tag '{name}'");
                        self.push_style(alignment, self.styles.current)?;
                    }
                }
                Ok(i + 1)
            }
        }
    }

    fn handle_endtag(&mut self) -> StrResult<()> {
        if self.footnotes.collecting_depth() == Some(self.styles.depth()) {
            self.end_footnote()?;
        }
        if self.poem_depths.last() == Some(&self.styles.depth()) {
            self.poem_depths.pop();
            let target = self.target_mut();
            target.poem_level = target.poem_level.saturating_sub(1);
            if target.poem_level == 0 {
                target.poem_subsequent_line = false;
            }
        }
        self.pop_style()
    }

    /// Push the current font onto the style stack and switch to `face`.
    /// A change of alignment starts a new line.
    pub(crate) fn push_style(
        &mut self,
        alignment: Alignment,
        face: FaceId,
    ) -> StrResult<()> {
        let needs_line = match &self.target_ref().current {
            None => true,
            Some(line) => {
                !line.pieces.is_empty()
                    && line.alignment != alignment
                    && line.alignment != Alignment::None
            }
        };
        if needs_line {
            self.setup_next_line()?;
        }
        if let Some(line) = &mut self.target_mut().current {
            line.alignment = alignment;
        }

        if self.styles.depth() >= STYLE_STACK_DEPTH {
            let mut dump = String::new();
            for id in &self.styles.stack {
                dump.push_str(&self.fonts.face(*id).nickname);
                dump.push(' ');
            }
            bail!("style stack overflowed: {dump}");
        }
        self.styles.stack.push(self.styles.current);
        self.styles.current = face;
        Ok(())
    }

    /// Pop the style stack, applying the side effects of closing special
    /// faces (drop caps reserve their margin, book titles add space).
    pub(crate) fn pop_style(&mut self) -> StrResult<()> {
        let closing = self.fonts.face(self.styles.current).clone();

        if closing.line_count > 1 {
            // Closing a drop cap: reserve a gutter after the numeral and
            // remember the indent for the lines it spans.
            let gutter = Abs::pt(2.0);
            let target = self.target_mut();
            if let Some(line) = &mut target.current {
                if let Some(piece) = line.pieces.last_mut() {
                    piece.natural_width += gutter;
                    piece.width = piece.natural_width;
                    target.drop_char_left_margin = piece.natural_width;
                    target.drop_char_margin_line_count = closing.line_count - 1;
                }
            }
        }

        if closing.nickname == nick::BOOKTITLE {
            let blackletter = self.fonts.resolve(nick::BLACKLETTER)?;
            let gap = self.fonts.linegap(blackletter) / 2.0;
            self.insert_vspace(gap, true)?;
        }

        match self.styles.stack.pop() {
            Some(previous) => self.styles.current = previous,
            None => bail!("style stack underflowed"),
        }
        Ok(())
    }

    pub(crate) fn clear_style_stack(&mut self) -> StrResult<()> {
        self.styles.stack.clear();
        self.styles.current = self.fonts.resolve(nick::BLACKLETTER)?;
        Ok(())
    }

    /// Begin a fresh current line on the target paragraph, flushing any
    /// line in progress.
    pub(crate) fn setup_next_line(&mut self) -> StrResult<()> {
        if let Some(line) = &self.target_ref().current {
            if line.pieces.is_empty() && line.height == Abs::zero() {
                // An empty line is already on hand.
                return Ok(());
            }
        }

        let uid = self.alloc_uid();
        let column = self.column_width();
        let poetry_left = self.config.poetry_left_margin;
        let poetry_level = self.config.poetry_level_indent;
        let poetry_wrap = self.config.poetry_wrap_indent;

        let target = self.target_mut();
        if target.lines.len() >= MAX_LINES_IN_PARAGRAPH {
            bail!("too many lines in paragraph (limit is {MAX_LINES_IN_PARAGRAPH})");
        }
        target.flush_current();

        let alignment = target
            .lines
            .last()
            .map(|line| line.alignment)
            .unwrap_or(Alignment::Justified);
        let mut line = Line::new(uid, alignment, column);

        if target.poem_level > 0 {
            let indent = poetry_left
                + poetry_level * (target.poem_level - 1) as f64
                + if target.poem_subsequent_line { poetry_wrap } else { Abs::zero() };
            line.left_margin = indent;
            line.max_width = column - indent;
            line.poem_level = target.poem_level;
            target.poem_subsequent_line = true;
        }

        target.current = Some(line);
        Ok(())
    }

    /// Append a text token to the target in the current style, splitting
    /// emulated small caps into case runs.
    pub(crate) fn append_text(
        &mut self,
        text: &str,
        nobreak: bool,
        token: usize,
    ) -> StrResult<()> {
        // Don't put a verse number immediately after a drop char.
        if self.fonts.is(self.styles.current, nick::VERSENUM) {
            if let Some(line) = &self.target_ref().current {
                if line.pieces.len() == 1
                    && self.fonts.is(line.pieces[0].face, nick::CHAPTERNUM)
                {
                    return Ok(());
                }
            }
        }

        let face = self.fonts.face(self.styles.current).clone();
        if let Some(smallcaps_size) = face.smallcaps {
            // Emulated small caps: break the word into case runs and set
            // lowercase runs as capitals at the emulation size.
            let runs = case_runs(text);
            let count = runs.len();
            for (index, (run, was_lower)) in runs.into_iter().enumerate() {
                let size = if was_lower { smallcaps_size } else { face.size };
                let glue = nobreak || index + 1 < count;
                self.append_chars(&run, size, face.baseline_delta, false, glue, token)?;
            }
        } else {
            self.append_chars(text, face.size, face.baseline_delta, false, nobreak, token)?;
        }
        Ok(())
    }

    /// Append an elastic space in the current style.
    pub(crate) fn append_space(&mut self, force: bool, token: usize) -> StrResult<()> {
        // No spaces after drop chars.
        if let Some(line) = &self.target_ref().current {
            if line.pieces.len() == 1
                && self.fonts.is(line.pieces[0].face, nick::CHAPTERNUM)
            {
                return Ok(());
            }
        }
        let size = self.fonts.face(self.styles.current).size;
        self.append_chars(" ", size, Abs::zero(), force, false, token)
    }

    /// Append a thin space: half a space's width, inelastic.
    pub(crate) fn append_thinspace(&mut self, token: usize) -> StrResult<()> {
        let size = self.fonts.face(self.styles.current).size;
        self.append_chars(" ", size, Abs::zero(), false, false, token)?;
        if let Some(line) = &mut self.target_mut().current {
            if let Some(piece) = line.pieces.last_mut() {
                piece.width = piece.width / 2.0;
                piece.natural_width = piece.natural_width / 2.0;
                piece.elastic = false;
            }
        }
        Ok(())
    }

    /// Append one piece of text in the current font at a size.
    pub(crate) fn append_chars(
        &mut self,
        text: &str,
        size: f64,
        baseline: Abs,
        force_space: bool,
        nobreak: bool,
        token: usize,
    ) -> StrResult<()> {
        if self.target_ref().current.is_none() {
            self.setup_next_line()?;
        }

        {
            let Some(line) = &self.target_ref().current else {
                bail!("internal: no current line after setup");
            };
            // Don't start lines with empty space.
            if text == " " && line.pieces.is_empty() && !force_space {
                return Ok(());
            }
            if line.pieces.len() >= MAX_LINE_PIECES {
                bail!("cannot add '{text}' to line: too many pieces");
            }
        }

        let face = self.styles.current;
        let width = self.fonts.text_width(face, size, text);
        let is_footnote_mark = self.fonts.is(face, nick::FOOTNOTEMARK);
        let mut piece = Piece::new(text, face, size, width, baseline, nobreak, token);

        // Track the source citation and attach cross-references to verse
        // numbers in the body.
        if self.fonts.is(face, nick::CHAPTERNUM) {
            if let Ok(chapter) = text.parse::<u32>() {
                self.chapter_label = chapter;
            }
        }
        if self.fonts.is(face, nick::VERSENUM) && self.target == Target::Body {
            if let Ok(verse) = text.parse::<u32>() {
                self.verse_label = verse;
                if let Some(book) = self.short_book_name() {
                    let key =
                        CrossrefKey { book, chapter: self.chapter_label, verse };
                    if self.crossrefs.contains(&key) {
                        let span = SpanPoint::new(
                            self.paragraphs.len(),
                            self.body.lines.len(),
                            self.body.current.as_ref().map_or(0, |l| l.pieces.len()),
                        );
                        self.crossrefs.anchor(&key, span);
                        piece.crossref = Some(key);
                    }
                }
            }
        }

        let poem_level = self.target_ref().poem_level;
        let Some(line) = &mut self.target_mut().current else {
            bail!("internal: no current line after setup");
        };
        line.append(piece, is_footnote_mark);
        line.poem_level = poem_level;
        Ok(())
    }

    /// Insert pure vertical space as an empty line.
    pub(crate) fn insert_vspace(&mut self, points: Abs, tied: bool) -> StrResult<()> {
        self.setup_next_line()?;
        let target = self.target_mut();
        if let Some(line) = &mut target.current {
            line.height = points;
            line.ascent = points;
            line.tied_to_next = tied;
        }
        target.flush_current();
        Ok(())
    }

    /// Flush the body paragraph: fold in the current line, analyse line
    /// metrics and retain it for the page optimizer.
    pub(crate) fn flush_paragraph(&mut self) -> StrResult<()> {
        self.body.flush_current();
        if self.body.lines.is_empty() {
            return Ok(());
        }

        let mut para = std::mem::take(&mut self.body);
        self.analyse_paragraph(&mut para)?;
        tracing::debug!(
            index = self.paragraphs.len(),
            lines = para.lines.len(),
            height = para.total_height.to_pt(),
            "analysed paragraph"
        );
        self.paragraphs.push(para);
        Ok(())
    }

    /// Redirect output into a fresh footnote paragraph.
    fn begin_footnote(&mut self, mark: EcoString, token: usize) -> StrResult<()> {
        let Some(line) = &self.body.current else {
            bail!("internal: footnote mark missing from body line");
        };
        let anchor_uid = line.uid;
        let anchor = SpanPoint::new(
            self.paragraphs.len(),
            self.body.lines.len(),
            line.pieces.len().saturating_sub(1),
        );

        self.footnotes.begin(mark.clone(), anchor_uid, anchor, self.styles.depth());
        self.stashes.push(StyleSnapshot {
            stack: self.styles.stack.clone(),
            current: self.styles.current,
        });
        self.target = Target::Footnote;

        // Lead with elastic spaces so that justification scales the gap
        // when footnotes are concatenated at the bottom of a page.
        for _ in 0..4 {
            self.append_space(true, token)?;
        }
        let face = self.fonts.resolve(nick::FOOTNOTEMARK_IN_FOOTNOTE)?;
        self.push_style(Alignment::Justified, face)?;
        self.append_text(&mark, false, token)?;
        self.pop_style()?;
        Ok(())
    }

    /// Close the current footnote and restore the stashed style state.
    fn end_footnote(&mut self) -> StrResult<()> {
        self.footnotes.scratch.flush_current();
        let para = std::mem::take(&mut self.footnotes.scratch);

        // Lay the paragraph out at its column width to learn its height.
        let laid = self.layout_paragraph(&para, false)?;
        let height = laid.lines.iter().map(|line| line.height).sum();
        self.footnotes.finish(para, height);

        let Some(snapshot) = self.stashes.pop() else {
            bail!("internal: footnote style stash is empty");
        };
        self.styles.stack = snapshot.stack;
        self.styles.current = snapshot.current;
        self.target = Target::Body;
        Ok(())
    }
}

/// Expect `tag{value}`: the text and end tag after the tag at `i`.
fn tag_value(tokens: &[Token], i: usize) -> StrResult<(EcoString, usize)> {
    let name = &tokens[i].text;
    match (tokens.get(i + 1), tokens.get(i + 2)) {
        (Some(value), Some(end))
            if value.kind == TokenKind::Text && end.kind == TokenKind::EndTag =>
        {
            Ok((value.text.clone(), i + 3))
        }
        _ => bail!("{name} must be followed by {{value}}"),
    }
}

/// Split text into runs of consistent letter case, uppercased, for
/// emulated small caps. The flag records whether the run was lowercase.
fn case_runs(text: &str) -> Vec<(String, bool)> {
    let mut runs: Vec<(String, bool)> = Vec::new();
    for c in text.chars() {
        let lower = c.is_ascii_lowercase();
        let upper: char = c.to_ascii_uppercase();
        match runs.last_mut() {
            Some((run, was_lower)) if *was_lower == lower => run.push(upper),
            _ => runs.push((upper.to_string(), lower)),
        }
    }
    runs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_runs() {
        assert_eq!(
            case_runs("Lord"),
            vec![("L".to_string(), false), ("ORD".to_string(), true)]
        );
        assert_eq!(case_runs("GOD"), vec![("GOD".to_string(), false)]);
    }
}
