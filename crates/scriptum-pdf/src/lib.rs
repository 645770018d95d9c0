//! The PDF backend: implements the engine's renderer interface with
//! `pdf-writer`, embedding the TrueType fonts as CID-keyed Type0 fonts
//! with Identity-H encoding and one content stream per page.

use std::fs;
use std::path::Path;

use ecow::{eco_format, EcoString};
use pdf_writer::types::{CidFontType, FontFlags, SystemInfo};
use pdf_writer::{Content, Finish, Name, Pdf, Rect, Ref, Str};
use rustc_hash::FxHashMap;
use scriptum_library::diag::{bail, StrResult};
use scriptum_library::fonts::{FaceId, FontBook, Rgb};
use scriptum_library::geom::Abs;
use scriptum_library::render::Renderer;
use ttf_parser::{Face, GlyphId};

const SYSTEM_INFO: SystemInfo = SystemInfo {
    registry: Str(b"Adobe"),
    ordering: Str(b"Identity"),
    supplement: 0,
};

/// One font prepared for embedding.
struct PdfFont {
    base_name: EcoString,
    data: Vec<u8>,
    glyph_ids: FxHashMap<char, u16>,
    /// Advances per glyph id, in 1000-unit glyph space.
    widths: Vec<f32>,
    ascent: f32,
    descent: f32,
    cap_height: f32,
    bbox: [f32; 4],
    italic_angle: f32,
}

impl PdfFont {
    fn parse(index: usize, data: &[u8]) -> StrResult<Self> {
        let base_name = eco_format!("SCRP{index:02}+Embedded");
        if data.is_empty() {
            // Fileless fonts (as used in tests) still produce a valid
            // document structure, just without glyph outlines.
            return Ok(Self {
                base_name,
                data: Vec::new(),
                glyph_ids: FxHashMap::default(),
                widths: vec![0.0],
                ascent: 800.0,
                descent: -200.0,
                cap_height: 700.0,
                bbox: [-200.0, -200.0, 1200.0, 1000.0],
                italic_angle: 0.0,
            });
        }

        let face = match Face::parse(data, 0) {
            Ok(face) => face,
            Err(err) => bail!("failed to parse font for embedding ({err})"),
        };
        let scale = 1000.0 / face.units_per_em() as f32;

        let mut glyph_ids = FxHashMap::default();
        if let Some(cmap) = face.tables().cmap {
            for subtable in cmap.subtables {
                if !subtable.is_unicode() {
                    continue;
                }
                subtable.codepoints(|cp| {
                    let Some(c) = char::from_u32(cp) else { return };
                    if let Some(glyph) = face.glyph_index(c) {
                        glyph_ids.insert(c, glyph.0);
                    }
                });
            }
        }

        let count = face.number_of_glyphs();
        let widths = (0..count)
            .map(|gid| {
                face.glyph_hor_advance(GlyphId(gid)).unwrap_or(0) as f32 * scale
            })
            .collect();

        let global = face.global_bounding_box();
        Ok(Self {
            base_name,
            data: data.to_vec(),
            glyph_ids,
            widths,
            ascent: face.ascender() as f32 * scale,
            descent: face.descender() as f32 * scale,
            cap_height: face
                .capital_height()
                .map(|h| h as f32 * scale)
                .unwrap_or(700.0),
            bbox: [
                global.x_min as f32 * scale,
                global.y_min as f32 * scale,
                global.x_max as f32 * scale,
                global.y_max as f32 * scale,
            ],
            italic_angle: 0.0,
        })
    }

    /// Encode text as a big-endian glyph-id string.
    fn encode(&self, text: &str) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(2 * text.len());
        for c in text.chars() {
            let gid = self.glyph_ids.get(&c).copied().unwrap_or(0);
            bytes.extend_from_slice(&gid.to_be_bytes());
        }
        bytes
    }
}

/// A [`Renderer`] producing a PDF document.
pub struct PdfRenderer {
    fonts: Vec<PdfFont>,
    /// Face index to font index.
    face_fonts: Vec<usize>,
    /// Finished page content streams with their sizes.
    pages: Vec<(f32, f32, Vec<u8>)>,
    current: Option<(f32, f32, Content)>,
    current_font: usize,
    pending_matrix: Option<[f64; 6]>,
}

impl PdfRenderer {
    /// Prepare a renderer for the fonts of a run.
    pub fn new(book: &FontBook) -> StrResult<Self> {
        let mut fonts = Vec::new();
        for (index, font) in book.fonts().iter().enumerate() {
            fonts.push(PdfFont::parse(index, &font.data)?);
        }
        let face_fonts = book.faces().iter().map(|face| face.font).collect();
        Ok(Self {
            fonts,
            face_fonts,
            pages: Vec::new(),
            current: None,
            current_font: 0,
            pending_matrix: None,
        })
    }

    fn flush_page(&mut self) {
        if let Some((width, height, content)) = self.current.take() {
            self.pages.push((width, height, content.finish().into_vec()));
        }
    }

    fn content(&mut self) -> &mut Content {
        let (.., content) = self
            .current
            .get_or_insert_with(|| (595.0, 842.0, Content::new()));
        content
    }

    /// Assemble the document.
    fn document(&mut self) -> Vec<u8> {
        self.flush_page();

        let mut pdf = Pdf::new();
        let mut alloc = Ref::new(1);
        let catalog_id = alloc.bump();
        let pages_id = alloc.bump();

        struct FontRefs {
            type0: Ref,
            cid: Ref,
            descriptor: Ref,
            data: Ref,
        }
        let font_refs: Vec<FontRefs> = self
            .fonts
            .iter()
            .map(|_| FontRefs {
                type0: alloc.bump(),
                cid: alloc.bump(),
                descriptor: alloc.bump(),
                data: alloc.bump(),
            })
            .collect();
        let font_names: Vec<String> =
            (0..self.fonts.len()).map(|i| format!("F{i}")).collect();

        let page_refs: Vec<(Ref, Ref)> =
            self.pages.iter().map(|_| (alloc.bump(), alloc.bump())).collect();

        pdf.catalog(catalog_id).pages(pages_id);
        pdf.pages(pages_id)
            .count(self.pages.len() as i32)
            .kids(page_refs.iter().map(|&(page, _)| page));

        for (&(page_id, content_id), (width, height, content)) in
            page_refs.iter().zip(&self.pages)
        {
            let mut page = pdf.page(page_id);
            page.media_box(Rect::new(0.0, 0.0, *width, *height));
            page.parent(pages_id);
            page.contents(content_id);
            {
                let mut resources = page.resources();
                let mut fonts = resources.fonts();
                for (name, refs) in font_names.iter().zip(&font_refs) {
                    fonts.pair(Name(name.as_bytes()), refs.type0);
                }
            }
            page.finish();
            pdf.stream(content_id, content);
        }

        for (font, refs) in self.fonts.iter().zip(&font_refs) {
            pdf.type0_font(refs.type0)
                .base_font(Name(font.base_name.as_bytes()))
                .encoding_predefined(Name(b"Identity-H"))
                .descendant_font(refs.cid);

            let mut cid = pdf.cid_font(refs.cid);
            cid.subtype(CidFontType::Type2);
            cid.base_font(Name(font.base_name.as_bytes()));
            cid.system_info(SYSTEM_INFO);
            cid.font_descriptor(refs.descriptor);
            cid.default_width(0.0);
            cid.cid_to_gid_map_predefined(Name(b"Identity"));
            cid.widths().consecutive(0, font.widths.iter().copied());
            cid.finish();

            let mut descriptor = pdf.font_descriptor(refs.descriptor);
            descriptor.name(Name(font.base_name.as_bytes()));
            descriptor.flags(FontFlags::SYMBOLIC);
            descriptor.bbox(Rect::new(
                font.bbox[0],
                font.bbox[1],
                font.bbox[2],
                font.bbox[3],
            ));
            descriptor.italic_angle(font.italic_angle);
            descriptor.ascent(font.ascent);
            descriptor.descent(font.descent);
            descriptor.cap_height(font.cap_height);
            descriptor.stem_v(95.0);
            descriptor.font_file2(refs.data);
            descriptor.finish();

            let mut stream = pdf.stream(refs.data, &font.data);
            stream.pair(Name(b"Length1"), font.data.len() as i32);
            stream.finish();
        }

        pdf.finish()
    }
}

impl Renderer for PdfRenderer {
    fn new_page(&mut self, width: Abs, height: Abs) {
        self.flush_page();
        self.current =
            Some((width.to_pt() as f32, height.to_pt() as f32, Content::new()));
    }

    fn begin_text(&mut self) {
        self.content().begin_text();
    }

    fn end_text(&mut self) {
        self.content().end_text();
    }

    fn set_font_and_size(&mut self, face: FaceId, size: f64) {
        let font = self.face_fonts[face.0 as usize];
        self.current_font = font;
        let name = format!("F{font}");
        self.content().set_font(Name(name.as_bytes()), size as f32);
    }

    fn set_fill_rgb(&mut self, color: Rgb) {
        self.content().set_fill_rgb(color.r, color.g, color.b);
    }

    fn set_text_matrix(&mut self, matrix: [f64; 6]) {
        self.pending_matrix = Some(matrix);
    }

    fn text_out(&mut self, x: Abs, y: Abs, text: &str) {
        let matrix = self
            .pending_matrix
            .take()
            .unwrap_or([1.0, 0.0, 0.0, 1.0, x.to_pt(), y.to_pt()]);
        let encoded = self.fonts[self.current_font].encode(text);
        let content = self.content();
        content.set_text_matrix(matrix.map(|v| v as f32));
        content.show(Str(&encoded));
    }

    fn fill_rect(&mut self, x: Abs, y: Abs, width: Abs, height: Abs) {
        let content = self.content();
        content.rect(
            x.to_pt() as f32,
            y.to_pt() as f32,
            width.to_pt() as f32,
            height.to_pt() as f32,
        );
        content.fill_nonzero();
    }

    fn save(&mut self, path: &Path) -> StrResult<()> {
        let document = self.document();
        fs::write(path, document)
            .map_err(|err| ecow::eco_format!("{}: {err}", path.display()))
    }
}
