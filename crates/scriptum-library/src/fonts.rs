//! The font registry: nicknames, type faces and metric access.

use std::fs;
use std::path::{Path, PathBuf};

use ecow::EcoString;
use rustc_hash::FxHashMap;
use ttf_parser::Face;

use crate::config::Config;
use crate::diag::{bail, file_error, StrResult};
use crate::geom::Abs;

/// Maximum number of distinct font files in a run.
pub const MAX_FONTS: usize = 64;

/// Well-known face nicknames the engine treats specially.
pub mod nick {
    pub const BLACKLETTER: &str = "blackletter";
    pub const REDLETTER: &str = "redletter";
    pub const VERSENUM: &str = "versenum";
    pub const CHAPTERNUM: &str = "chapternum";
    pub const FOOTNOTEMARK: &str = "footnotemark";
    pub const FOOTNOTEMARK_IN_FOOTNOTE: &str = "footnotemarkinfootnote";
    pub const FOOTNOTE_VERSENUM: &str = "footnoteversenum";
    pub const CROSSREF_MARKER: &str = "crossrefmarker";
    pub const CROSSREF: &str = "crossref";
    pub const BOOKTITLE: &str = "booktitle";
    pub const HEADER: &str = "header";
    pub const BOOKTAB: &str = "booktab";
}

/// Identifies a type face in the registry.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct FaceId(pub u16);

/// An RGB fill colour with components in `0..=1`.
#[derive(Debug, Copy, Clone, Default, PartialEq)]
pub struct Rgb {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl Rgb {
    pub const BLACK: Self = Self { r: 0.0, g: 0.0, b: 0.0 };

    /// Parse a `#rrggbb` colour.
    pub fn parse(hex: &str) -> StrResult<Self> {
        let digits = hex.strip_prefix('#').unwrap_or(hex);
        if digits.len() != 6 || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
            bail!("invalid colour '{hex}'");
        }
        let channel = |i: usize| {
            u8::from_str_radix(&digits[2 * i..2 * i + 2], 16).unwrap_or(0) as f32 / 255.0
        };
        Ok(Self { r: channel(0), g: channel(1), b: channel(2) })
    }
}

/// A named typographic role: a font at a size, with colour and the flags
/// that drive special layout treatment.
#[derive(Debug, Clone)]
pub struct TypeFace {
    pub nickname: EcoString,
    /// Index of the underlying font in the registry.
    pub font: usize,
    /// The natural size in points.
    pub size: f64,
    /// Size at which lowercase letters are emulated as capitals, if the
    /// face uses emulated small caps.
    pub smallcaps: Option<f64>,
    /// Baseline shift applied to every piece set in this face.
    pub baseline_delta: Abs,
    /// Number of physical lines the face spans; `> 1` marks a drop cap.
    pub line_count: u32,
    pub color: Rgb,
}

/// Metrics and data of one loaded font file.
///
/// All metric fields are normalized to a 1000-unit em so that a value
/// scales to points as `value * size / 1000`.
#[derive(Debug, Clone)]
pub struct LoadedFont {
    pub filename: PathBuf,
    pub data: Vec<u8>,
    /// Ascender height.
    pub ascent: f64,
    /// Descender depth, typically negative.
    pub descent: f64,
    /// Height of capital letters.
    pub cap_height: f64,
    /// Natural distance between baselines.
    pub linegap: f64,
    /// Horizontal advances by code point.
    pub advances: FxHashMap<char, f64>,
    /// Advance for code points without a glyph.
    pub fallback_advance: f64,
}

impl LoadedFont {
    /// Load and parse a TrueType font file.
    pub fn load(path: &Path) -> StrResult<Self> {
        let data = fs::read(path).map_err(|err| file_error(err, path))?;
        Self::parse(path.to_owned(), data)
    }

    /// Parse font metrics out of raw TrueType data.
    pub fn parse(filename: PathBuf, data: Vec<u8>) -> StrResult<Self> {
        let face = match Face::parse(&data, 0) {
            Ok(face) => face,
            Err(err) => bail!("{}: failed to parse font ({err})", filename.display()),
        };

        let upem = face.units_per_em() as f64;
        let scale = 1000.0 / upem;
        let ascent = face.ascender() as f64 * scale;
        let descent = face.descender() as f64 * scale;
        let gap = face.line_gap() as f64 * scale;
        let cap_height = face
            .capital_height()
            .map(|h| h as f64 * scale)
            .unwrap_or(ascent * 0.7);

        let mut advances = FxHashMap::default();
        if let Some(cmap) = face.tables().cmap {
            for subtable in cmap.subtables {
                if !subtable.is_unicode() {
                    continue;
                }
                subtable.codepoints(|cp| {
                    let Some(c) = char::from_u32(cp) else { return };
                    let Some(glyph) = face.glyph_index(c) else { return };
                    if let Some(advance) = face.glyph_hor_advance(glyph) {
                        advances.insert(c, advance as f64 * scale);
                    }
                });
            }
        }

        Ok(Self {
            filename,
            data,
            ascent,
            descent,
            cap_height,
            linegap: ascent - descent + gap,
            advances,
            fallback_advance: 0.0,
        })
    }

    /// A fileless font in which every code point has the same advance.
    /// Useful for layout tests and measurement without font files.
    pub fn uniform(advance: f64) -> Self {
        Self {
            filename: PathBuf::new(),
            data: Vec::new(),
            ascent: 800.0,
            descent: -200.0,
            cap_height: 700.0,
            linegap: 1000.0,
            advances: FxHashMap::default(),
            fallback_advance: advance,
        }
    }

    /// The advance of a single code point. A non-breaking space measures
    /// as an ordinary space.
    pub fn advance(&self, c: char) -> f64 {
        let c = if c == '\u{a0}' { ' ' } else { c };
        self.advances.get(&c).copied().unwrap_or(self.fallback_advance)
    }
}

/// The font registry, resolving nicknames to type faces and faces to the
/// fonts that carry their metrics.
#[derive(Debug, Default)]
pub struct FontBook {
    fonts: Vec<LoadedFont>,
    faces: Vec<TypeFace>,
    by_nickname: FxHashMap<EcoString, FaceId>,
}

impl FontBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load all faces named in the configuration, reading each font file
    /// only once.
    pub fn load(config: &Config) -> StrResult<Self> {
        let mut book = Self::new();
        let mut by_file: FxHashMap<PathBuf, usize> = FxHashMap::default();
        for spec in &config.faces {
            let font = match by_file.get(&spec.fontfile) {
                Some(&index) => index,
                None => {
                    let index = book.add_font(LoadedFont::load(&spec.fontfile)?)?;
                    by_file.insert(spec.fontfile.clone(), index);
                    index
                }
            };
            book.add_face(TypeFace {
                nickname: spec.nickname.clone(),
                font,
                size: spec.size,
                smallcaps: spec.smallcaps,
                baseline_delta: spec.baseline_delta,
                line_count: spec.line_count,
                color: spec.color,
            })?;
        }
        Ok(book)
    }

    /// Register a font and return its index.
    pub fn add_font(&mut self, font: LoadedFont) -> StrResult<usize> {
        if self.fonts.len() >= MAX_FONTS {
            bail!("too many fonts (limit is {MAX_FONTS})");
        }
        self.fonts.push(font);
        Ok(self.fonts.len() - 1)
    }

    /// Register a face under its nickname.
    pub fn add_face(&mut self, face: TypeFace) -> StrResult<FaceId> {
        if self.by_nickname.contains_key(&face.nickname) {
            bail!("duplicate face nickname '{}'", face.nickname);
        }
        let id = FaceId(self.faces.len() as u16);
        self.by_nickname.insert(face.nickname.clone(), id);
        self.faces.push(face);
        Ok(id)
    }

    /// Resolve a nickname, failing if it is unknown.
    pub fn resolve(&self, nickname: &str) -> StrResult<FaceId> {
        match self.get(nickname) {
            Some(id) => Ok(id),
            None => bail!("unknown face nickname '{nickname}'"),
        }
    }

    /// Resolve a nickname.
    pub fn get(&self, nickname: &str) -> Option<FaceId> {
        self.by_nickname.get(nickname).copied()
    }

    /// The face behind an id.
    pub fn face(&self, id: FaceId) -> &TypeFace {
        &self.faces[id.0 as usize]
    }

    /// The font carrying a face's metrics.
    pub fn font_of(&self, id: FaceId) -> &LoadedFont {
        &self.fonts[self.face(id).font]
    }

    /// All registered fonts, in registration order.
    pub fn fonts(&self) -> &[LoadedFont] {
        &self.fonts
    }

    /// All registered faces, in registration order.
    pub fn faces(&self) -> &[TypeFace] {
        &self.faces
    }

    /// Whether an id refers to the face with the given nickname.
    pub fn is(&self, id: FaceId, nickname: &str) -> bool {
        self.face(id).nickname == nickname
    }

    /// The width of a string set in a face at a size.
    pub fn text_width(&self, id: FaceId, size: f64, text: &str) -> Abs {
        let font = self.font_of(id);
        let units: f64 = text.chars().map(|c| font.advance(c)).sum();
        Abs::pt(units * size / 1000.0)
    }

    /// The natural baseline distance of a face at its own size, in points.
    pub fn linegap(&self, id: FaceId) -> Abs {
        let face = self.face(id);
        Abs::pt(self.fonts[face.font].linegap * face.size / 1000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn book() -> FontBook {
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

    #[test]
    fn test_text_width_scales_with_size() {
        let book = book();
        let id = book.resolve("blackletter").unwrap();
        assert_eq!(book.text_width(id, 10.0, "abcd"), Abs::pt(20.0));
        assert_eq!(book.text_width(id, 20.0, "abcd"), Abs::pt(40.0));
    }

    #[test]
    fn test_nbsp_measures_as_space() {
        let book = book();
        let id = book.resolve("blackletter").unwrap();
        assert_eq!(
            book.text_width(id, 10.0, "\u{a0}"),
            book.text_width(id, 10.0, " ")
        );
    }

    #[test]
    fn test_unknown_nickname_fails() {
        let book = book();
        assert!(book.resolve("doesnotexist").is_err());
    }

    #[test]
    fn test_rgb_parse() {
        let rgb = Rgb::parse("#ff0080").unwrap();
        assert!((rgb.r - 1.0).abs() < 1e-6);
        assert!(rgb.g.abs() < 1e-6);
        assert!(Rgb::parse("nonsense").is_err());
    }
}
