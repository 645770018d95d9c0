//! Emission: the chosen page plan is shaped (spaces trimmed, hangs
//! computed, justification distributed) and drawn through the renderer,
//! together with page chrome: booktabs, running heads, footnote blocks
//! and the cross-reference column.

use scriptum_library::determinism::determinism_event;
use scriptum_library::diag::StrResult;
use scriptum_library::fonts::{nick, Rgb};
use scriptum_library::geom::Abs;
use scriptum_library::model::{Alignment, Line, Paragraph};
use scriptum_library::render::Renderer;

use crate::linebreak::{is_hangable, leading_hang, low_punct_suffix};
use crate::pages::PagePlan;
use crate::{Engine, Margins, Side};

impl Engine {
    /// Draw the whole render plan.
    pub fn emit(&mut self, plan: &[PagePlan], renderer: &mut dyn Renderer) -> StrResult<()> {
        let paragraphs = std::mem::take(&mut self.paragraphs);
        let result = self.emit_inner(&paragraphs, plan, renderer);
        self.paragraphs = paragraphs;
        result
    }

    fn emit_inner(
        &mut self,
        paragraphs: &[Paragraph],
        plan: &[PagePlan],
        renderer: &mut dyn Renderer,
    ) -> StrResult<()> {
        self.side = Side::Left;
        self.booktab_y = Abs::zero();

        for page in plan {
            if let Some(book_index) = page.starts_book {
                // Books open on a left face.
                if self.config.left_and_right && self.side == Side::Right {
                    renderer.new_page(self.config.page_width, self.config.page_height);
                    self.side = Side::Left;
                }

                let book = &self.books[book_index];
                self.booktab_text = Some(book.booktab.clone());
                self.header_title = Some(book.title.clone());

                // The tab slides down one slot per book, wrapping back
                // to the top of its window.
                self.booktab_y = if self.booktab_y < self.config.booktab_upperlimit
                    || self.booktab_y + self.config.booktab_height * 2.0
                        > self.config.booktab_lowerlimit
                {
                    self.config.booktab_upperlimit
                } else {
                    self.booktab_y + self.config.booktab_height
                };
            }

            self.begin_page(renderer, page.starts_book.is_some())?;
            self.emit_body(paragraphs, page, renderer)?;
            let y_limit = self.emit_footnotes(page, renderer)?;
            self.emit_crossrefs(renderer, y_limit)?;

            determinism_event!(self.recorder, float: page.height.to_pt());

            if self.config.left_and_right {
                self.side = match self.side {
                    Side::Left => Side::Right,
                    Side::Right => Side::Left,
                };
            }
        }
        Ok(())
    }

    /// Start a page: booktab, running head, margin mirroring, cursors.
    fn begin_page(
        &mut self,
        renderer: &mut dyn Renderer,
        suppress_header: bool,
    ) -> StrResult<()> {
        renderer.new_page(self.config.page_width, self.config.page_height);

        self.margins = match self.side {
            Side::Right if self.config.left_and_right => Margins {
                left: self.config.right_margin,
                right: self.config.left_margin,
            },
            _ => Margins {
                left: self.config.left_margin,
                right: self.config.right_margin,
            },
        };

        self.page_y = self.config.top_margin;
        self.crossrefs.reset_queue();

        self.draw_booktab(renderer)?;
        if !suppress_header {
            self.draw_header(renderer)?;
        }
        Ok(())
    }

    /// The solid tab on the page edge with the rotated book name.
    fn draw_booktab(&mut self, renderer: &mut dyn Renderer) -> StrResult<()> {
        let Some(text) = self.booktab_text.clone() else { return Ok(()) };
        let face = self.fonts.resolve(nick::BOOKTAB)?;
        let size = self.fonts.face(face).size;

        let tab_width = self.config.booktab_width;
        let tab_height = self.config.booktab_height;
        let page_width = self.config.page_width;
        let page_height = self.config.page_height;

        let x = match self.side {
            Side::Right => page_width - tab_width + Abs::pt(1.0),
            Side::Left => Abs::zero(),
        };
        renderer.set_fill_rgb(Rgb { r: 0.25, g: 0.25, b: 0.25 });
        renderer.fill_rect(
            x,
            page_height - self.booktab_y - tab_height + Abs::pt(1.0),
            tab_width,
            tab_height,
        );

        // The label reads upwards on left faces, downwards on right.
        let text_width = self.fonts.text_width(face, size, &text);
        let text_height =
            Abs::pt(self.fonts.font_of(face).cap_height * size / 1000.0);
        let (degrees, tx, ty_topdown) = match self.side {
            Side::Left => (
                90.0_f64,
                text_height + (tab_width - text_height) / 2.0,
                text_width + self.booktab_y + (tab_height - text_width) / 2.0,
            ),
            Side::Right => (
                -90.0_f64,
                page_width - text_height - (tab_width - text_height) / 2.0,
                self.booktab_y + (tab_height - text_width) / 2.0,
            ),
        };
        let ty = page_height - ty_topdown;
        let radians = degrees.to_radians();

        renderer.begin_text();
        renderer.set_font_and_size(face, size);
        renderer.set_fill_rgb(Rgb { r: 1.0, g: 1.0, b: 1.0 });
        renderer.set_text_matrix([
            radians.cos(),
            radians.sin(),
            -radians.sin(),
            radians.cos(),
            tx.to_pt(),
            ty.to_pt(),
        ]);
        renderer.text_out(Abs::zero(), Abs::zero(), &text);
        renderer.end_text();
        Ok(())
    }

    /// The running head: book title and the chapter reached so far.
    fn draw_header(&mut self, renderer: &mut dyn Renderer) -> StrResult<()> {
        let Some(title) = self.header_title.clone() else { return Ok(()) };
        let face = self.fonts.resolve(nick::HEADER)?;
        let size = self.fonts.face(face).size;
        let text = ecow::eco_format!("{title} {}", self.last_chapter_on_page);
        let width = self.fonts.text_width(face, size, &text);

        let x = (self.config.page_width - width) / 2.0;
        let y = self.config.page_height - self.config.top_margin / 2.0;

        renderer.begin_text();
        renderer.set_font_and_size(face, size);
        renderer.set_fill_rgb(self.fonts.face(face).color);
        renderer.text_out(x, y, &text);
        renderer.end_text();
        Ok(())
    }

    /// Draw the body span of a page, breaking each sliced long line and
    /// queueing cross-references as their verses pass by.
    fn emit_body(
        &mut self,
        paragraphs: &[Paragraph],
        page: &PagePlan,
        renderer: &mut dyn Renderer,
    ) -> StrResult<()> {
        let start = page.start;
        let end = page.end;

        for para_index in start.para..paragraphs.len() {
            if para_index > end.para {
                break;
            }
            let para = &paragraphs[para_index];
            if para.lines.is_empty() {
                continue;
            }

            let first_line = if para_index == start.para { start.line } else { 0 };
            let last_line = if para_index == end.para {
                end.line.min(para.lines.len() - 1)
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
                let b = if para_index == end.para && line_index == end.line {
                    end.piece.min(line.pieces.len())
                } else {
                    line.pieces.len()
                };

                if line.is_vspace() {
                    self.page_y += line.height;
                    continue;
                }
                if a >= b {
                    continue;
                }

                let mut out = Paragraph::new();
                self.break_line_range(para, line, a, b, &mut out, true)?;

                let count = out.lines.len();
                for k in 0..count {
                    let keys: Vec<_> = out.lines[k]
                        .pieces
                        .iter()
                        .filter_map(|piece| piece.crossref.clone())
                        .collect();
                    for key in keys {
                        if let Some(index) = self.crossrefs.find(&key) {
                            self.crossrefs.queue(index, self.page_y)?;
                        }
                    }
                    let has_next = k + 1 < count;
                    self.emit_line(&mut out.lines[k], has_next, renderer, true)?;
                }
            }
        }
        Ok(())
    }

    /// Concatenate the page's footnotes, in the order of the physical
    /// lines that anchor them, into one justified paragraph; re-break it
    /// at full column width and draw it at the page bottom. Returns the
    /// top of the footnote block (top-down), the limit for
    /// cross-reference placement.
    fn emit_footnotes(
        &mut self,
        page: &PagePlan,
        renderer: &mut dyn Renderer,
    ) -> StrResult<Abs> {
        let bottom = self.config.page_height - self.config.bottom_margin;
        let order = self.footnotes.page_order(page.start, page.end);
        if order.is_empty() {
            return Ok(bottom);
        }
        self.footnotes.check_page_capacity(order.len())?;

        let column = self.config.page_width - self.margins.left - self.margins.right;
        let composite = self.footnote_composite(&order, column);
        let mut laid = self.layout_paragraph(&composite, false)?;
        let height = laid.total_height;
        let top = self.config.page_height - self.config.bottom_margin - height;

        let saved_y = self.page_y;
        self.page_y = top;
        let count = laid.lines.len();
        for k in 0..count {
            let has_next = k + 1 < count;
            self.emit_line(&mut laid.lines[k], has_next, renderer, true)?;
        }
        self.page_y = saved_y;

        Ok(top)
    }

    /// Place and draw the cross-reference column beside the body.
    fn emit_crossrefs(
        &mut self,
        renderer: &mut dyn Renderer,
        y_limit: Abs,
    ) -> StrResult<()> {
        if self.crossrefs.queue.is_empty() {
            return Ok(());
        }

        // The column sits on the side opposite the booktab.
        let saved_margins = self.margins;
        let column = self.config.crossref_column_width;
        let gutter = self.config.crossref_margin_width;
        self.margins = match self.side {
            Side::Left => Margins {
                left: self.config.page_width - column - gutter,
                right: gutter,
            },
            Side::Right => Margins {
                left: gutter,
                right: self.config.page_width - column - gutter,
            },
        };

        self.crossrefs
            .reposition(y_limit, self.config.crossref_min_vspace);

        let saved_y = self.page_y;
        let placements = self.crossrefs.queue.clone();
        for (index, y) in placements {
            self.page_y = y;
            let mut para = self.crossrefs.entries[index].para.clone();
            let alignment = match self.side {
                Side::Right => Alignment::Left,
                Side::Left => Alignment::Right,
            };
            let count = para.lines.len();
            for k in 0..count {
                para.lines[k].alignment = alignment;
                self.emit_line(&mut para.lines[k], false, renderer, true)?;
            }
        }

        self.page_y = saved_y;
        self.margins = saved_margins;
        Ok(())
    }

    /// Shape and draw one physical line at the current vertical cursor.
    pub(crate) fn emit_line(
        &mut self,
        line: &mut Line,
        has_next: bool,
        renderer: &mut dyn Renderer,
        draw: bool,
    ) -> StrResult<()> {
        // The renderer's origin is bottom-left; the engine cursor runs
        // top-down.
        let y = self.config.page_height - self.page_y - line.height;

        // Trailing spaces never render; justified lines also shed
        // leading spaces (footnote concatenation leaves them behind).
        while matches!(
            line.pieces.last(),
            Some(piece) if piece.text == " " || piece.text.is_empty()
        ) {
            line.pieces.pop();
        }
        if line.alignment == Alignment::Justified {
            let leading = line
                .pieces
                .iter()
                .take_while(|piece| piece.text == " " || piece.text.is_empty())
                .count();
            if leading > 0 {
                line.pieces.drain(..leading);
            }
        }

        self.recalculate_width(line);

        // Distribute the slack over elastic pieces, except on the final
        // line of a paragraph.
        if line.alignment == Alignment::Justified && has_next {
            let slack = line.max_width - line.width;
            if slack > Abs::zero() {
                let elastic = line.pieces.iter().filter(|piece| piece.elastic).count();
                if elastic > 0 {
                    let slice = slack / elastic as f64;
                    for piece in line.pieces.iter_mut().filter(|piece| piece.elastic) {
                        piece.width += slice;
                    }
                    line.width = line.max_width;
                }
            }
        }

        let mut x = match line.alignment {
            Alignment::Left | Alignment::Justified | Alignment::None => line.left_margin,
            Alignment::Centred => (line.max_width - line.width) / 2.0,
            Alignment::Right => line.max_width - line.width,
        };
        x -= line.left_hang;

        if draw && !line.pieces.is_empty() {
            renderer.begin_text();
            for piece in &line.pieces {
                let face = self.fonts.face(piece.face);
                renderer.set_font_and_size(piece.face, piece.size);
                renderer.set_fill_rgb(face.color);
                renderer.text_out(self.margins.left + x, y - piece.baseline, &piece.text);
                x += piece.width;

                if face.nickname == nick::VERSENUM {
                    if let Ok(verse) = piece.text.parse() {
                        self.last_verse_on_page = verse;
                    }
                }
                if face.nickname == nick::CHAPTERNUM {
                    if let Ok(chapter) = piece.text.parse() {
                        self.last_chapter_on_page = chapter;
                    }
                }
            }
            renderer.end_text();
        }

        self.page_y += line.height;
        Ok(())
    }

    /// Reset piece widths to their natural values and recompute the
    /// hanging discounts and the line's effective width.
    pub(crate) fn recalculate_width(&self, line: &mut Line) {
        let fonts = &self.fonts;

        for piece in &mut line.pieces {
            piece.width = piece.natural_width;
        }

        // Footnote marks hang over trailing low punctuation.
        for i in 1..line.pieces.len() {
            if !fonts.is(line.pieces[i].face, nick::FOOTNOTEMARK) {
                continue;
            }
            let prev = &line.pieces[i - 1];
            let suffix = low_punct_suffix(&prev.text);
            if suffix.is_empty() {
                continue;
            }
            let hang = fonts.text_width(prev.face, prev.size, suffix);
            line.pieces[i - 1].width = line.pieces[i - 1].natural_width - hang;
            if hang > line.pieces[i].width {
                line.pieces[i].width = hang;
            }
        }

        // Material right after a drop cap tucks into its gutter.
        if line.pieces.len() >= 2 && fonts.face(line.pieces[0].face).line_count > 1 {
            let mut discount = Abs::zero();
            let mut next = 1;
            if fonts.is(line.pieces[1].face, nick::FOOTNOTEMARK) {
                discount += line.pieces[1].natural_width;
                next = 2;
            }
            discount += leading_hang(fonts, line, next);
            line.pieces[0].width = line.pieces[0].natural_width - discount;
        }

        line.width = line.pieces.iter().map(|piece| piece.width).sum();
        line.left_hang = Abs::zero();
        line.right_hang = Abs::zero();
        if line.pieces.is_empty() {
            return;
        }

        // Verse numbers hang fully into the left margin.
        let mut hang_piece = 0;
        if fonts.is(line.pieces[0].face, nick::VERSENUM)
            && line.pieces[0].text.parse::<u32>().map_or(false, |verse| verse < 1000)
        {
            line.left_hang = line.pieces[0].width;
            hang_piece = 1;
        }
        line.left_hang += leading_hang(fonts, line, hang_piece);

        // Trailing footnote marks always hang; trailing punctuation
        // hangs only when it stays clear of the cross-reference column.
        let mut index = line.pieces.len();
        while index > 0 && line.pieces[index - 1].text.starts_with(' ') {
            index -= 1;
        }
        let mut hang_note = Abs::zero();
        if index > 0 && fonts.is(line.pieces[index - 1].face, nick::FOOTNOTEMARK) {
            hang_note = line.pieces[index - 1].natural_width;
            line.right_hang = line.pieces[index - 1].width;
            index -= 1;
        }
        if index > 0 {
            let piece = &line.pieces[index - 1];
            let text = piece.text.as_str();
            let mut head = text.len();
            for (i, c) in text.char_indices().rev() {
                if is_hangable(c) {
                    head = i;
                } else {
                    break;
                }
            }
            if head < text.len() {
                let suffix = &text[head..];
                let mut hang_width = fonts.text_width(piece.face, piece.size, suffix);
                // Any footnote-mark hang already discounted from this
                // piece stays discounted.
                hang_width -= piece.natural_width - piece.width;
                let max_hang = self.margins.right
                    - self.config.crossref_column_width
                    - self.config.crossref_margin_width
                    - Abs::pt(2.0);
                if hang_width + hang_note <= max_hang {
                    line.right_hang = hang_note + hang_width;
                } else {
                    line.right_hang = hang_note;
                }
            }
        }

        line.width -= line.left_hang + line.right_hang;
    }
}
