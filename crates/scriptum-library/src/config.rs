//! The profile configuration reader.
//!
//! Profiles are line-oriented `key value` files with `#` comments and
//! transitive `include`s. Every line read is streamed into the config
//! digest so that cached layout metrics are keyed to the exact
//! configuration they were computed under.

use std::fs;
use std::path::{Path, PathBuf};

use ecow::EcoString;

use crate::diag::{bail, error, file_error, StrResult};
use crate::fonts::{nick, Rgb};
use crate::geom::Abs;
use crate::hash::ConfigDigest;

/// Maximum depth of transitive profile includes.
pub const MAX_INCLUDE_DEPTH: usize = 32;

/// A face definition as read from the profile.
#[derive(Debug, Clone)]
pub struct FaceSpec {
    pub nickname: EcoString,
    pub fontfile: PathBuf,
    pub size: f64,
    pub smallcaps: Option<f64>,
    pub baseline_delta: Abs,
    pub line_count: u32,
    pub color: Rgb,
}

impl FaceSpec {
    fn new(nickname: &str, fontfile: &str, size: f64) -> Self {
        Self {
            nickname: nickname.into(),
            fontfile: fontfile.into(),
            size,
            smallcaps: None,
            baseline_delta: Abs::zero(),
            line_count: 1,
            color: Rgb::BLACK,
        }
    }
}

/// The keyed configuration object driving a run.
#[derive(Debug, Clone)]
pub struct Config {
    pub output_file: PathBuf,
    /// Whether the output alternates left and right faces.
    pub left_and_right: bool,
    pub page_width: Abs,
    pub page_height: Abs,
    /// Margins of a left face; they are mirrored automatically on right
    /// faces when `left_and_right` is set.
    pub left_margin: Abs,
    pub right_margin: Abs,
    pub top_margin: Abs,
    pub bottom_margin: Abs,
    pub marginpar_width: Abs,
    pub marginpar_margin: Abs,
    pub booktab_width: Abs,
    pub booktab_height: Abs,
    pub booktab_upperlimit: Abs,
    pub booktab_lowerlimit: Abs,
    /// Colour of "red" text.
    pub red: Rgb,
    /// Multiplier on natural baseline distances.
    pub line_spacing: f64,
    pub poetry_left_margin: Abs,
    pub poetry_level_indent: Abs,
    pub poetry_wrap_indent: Abs,
    pub crossref_column_width: Abs,
    pub crossref_margin_width: Abs,
    /// Minimum vertical space between cross-reference paragraphs.
    pub crossref_min_vspace: Abs,
    /// The external cross-reference database, one verse per line.
    pub crossref_file: Option<PathBuf>,
    /// The book files to typeset, in order.
    pub books: Vec<PathBuf>,
    /// Directory for persisted line-metrics tables.
    pub cache_dir: Option<PathBuf>,
    /// Determinism event log; compared against when it already exists.
    pub determinism_log: Option<PathBuf>,
    pub faces: Vec<FaceSpec>,
    /// Hex digest of the canonicalized configuration text.
    pub digest: EcoString,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            output_file: "output.pdf".into(),
            left_and_right: true,
            page_width: Abs::pt(72.0 * 5.0),
            page_height: Abs::pt(72.0 * 7.0),
            left_margin: Abs::pt(72.0),
            right_margin: Abs::pt(72.0),
            top_margin: Abs::pt(72.0),
            bottom_margin: Abs::pt(72.0),
            marginpar_width: Abs::pt(50.0),
            marginpar_margin: Abs::pt(8.0),
            booktab_width: Abs::pt(27.0),
            booktab_height: Abs::pt(115.0),
            booktab_upperlimit: Abs::pt(36.0),
            booktab_lowerlimit: Abs::pt(72.0 * 5.5),
            red: Rgb::BLACK,
            line_spacing: 1.1,
            poetry_left_margin: Abs::pt(30.0),
            poetry_level_indent: Abs::pt(10.0),
            poetry_wrap_indent: Abs::pt(20.0),
            crossref_column_width: Abs::pt(36.0),
            crossref_margin_width: Abs::pt(4.0),
            crossref_min_vspace: Abs::pt(4.0),
            crossref_file: None,
            books: Vec::new(),
            cache_dir: None,
            determinism_log: None,
            faces: default_faces(),
            digest: EcoString::new(),
        }
    }
}

/// The face set the engine knows by nickname, with the original's
/// fallback files and sizes.
fn default_faces() -> Vec<FaceSpec> {
    vec![
        FaceSpec::new(nick::HEADER, "header.ttf", 12.0),
        FaceSpec::new(nick::BOOKTAB, "booktab.ttf", 12.0),
        FaceSpec::new(nick::BLACKLETTER, "blacktext.ttf", 8.0),
        FaceSpec::new(nick::REDLETTER, "redtext.ttf", 8.0),
        FaceSpec::new(nick::VERSENUM, "blacktext.ttf", 4.0),
        {
            let mut chapternum = FaceSpec::new(nick::CHAPTERNUM, "redtext.ttf", 8.0);
            chapternum.line_count = 2;
            chapternum
        },
        FaceSpec::new(nick::FOOTNOTEMARK, "blacktext.ttf", 4.0),
        FaceSpec::new(nick::FOOTNOTEMARK_IN_FOOTNOTE, "blacktext.ttf", 4.0),
        FaceSpec::new(nick::FOOTNOTE_VERSENUM, "blacktext.ttf", 6.0),
        FaceSpec::new(nick::CROSSREF_MARKER, "redtext.ttf", 5.0),
        FaceSpec::new(nick::CROSSREF, "blacktext.ttf", 5.0),
        FaceSpec::new(nick::BOOKTITLE, "blacktext.ttf", 12.0),
    ]
}

impl Config {
    /// Read a profile file, including everything it includes.
    pub fn load(path: &Path) -> StrResult<Self> {
        let mut config = Self::default();
        let mut digest = ConfigDigest::new();
        let mut includes = IncludeStack::default();
        config.read_file(path, &mut digest, &mut includes)?;
        config.digest = digest.finish();
        Ok(config)
    }

    /// Parse profile text as if read from `path` (used by tests and by
    /// `load`).
    pub fn read_str(
        &mut self,
        text: &str,
        path: &Path,
        digest: &mut ConfigDigest,
        includes: &mut IncludeStack,
    ) -> StrResult<()> {
        for (index, raw) in text.lines().enumerate() {
            digest.update_line(raw);

            let line = raw.trim_end();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let number = index + 1;
            let Some((key, value)) = line.split_once(' ') else {
                bail!(
                    "{}{}:{number}: syntax error (should be keyword value)",
                    includes.chain(),
                    path.display()
                );
            };
            let value = value.trim();

            if key.eq_ignore_ascii_case("include") {
                includes.push(path, number)?;
                self.read_file(Path::new(value), digest, includes)?;
                includes.pop();
            } else if let Err(message) = self.set(key, value) {
                bail!("{}{}:{number}: {message}", includes.chain(), path.display());
            }
        }
        Ok(())
    }

    fn read_file(
        &mut self,
        path: &Path,
        digest: &mut ConfigDigest,
        includes: &mut IncludeStack,
    ) -> StrResult<()> {
        let text = fs::read_to_string(path)
            .map_err(|err| error!("{}{}", includes.chain(), file_error(err, path)))?;
        self.read_str(&text, path, digest, includes)
    }

    /// Apply one `key value` pair.
    fn set(&mut self, key: &str, value: &str) -> StrResult<()> {
        match key {
            "output_file" => self.output_file = value.into(),
            "left_and_right" => self.left_and_right = parse_f64(value)? != 0.0,
            "page_width" => self.page_width = parse_abs(value)?,
            "page_height" => self.page_height = parse_abs(value)?,
            "left_margin" => self.left_margin = parse_abs(value)?,
            "right_margin" => self.right_margin = parse_abs(value)?,
            "top_margin" => self.top_margin = parse_abs(value)?,
            "bottom_margin" => self.bottom_margin = parse_abs(value)?,
            "marginpar_width" => self.marginpar_width = parse_abs(value)?,
            "marginpar_margin" => self.marginpar_margin = parse_abs(value)?,
            "booktab_width" => self.booktab_width = parse_abs(value)?,
            "booktab_height" => self.booktab_height = parse_abs(value)?,
            "booktab_upperlimit" => self.booktab_upperlimit = parse_abs(value)?,
            "booktab_lowerlimit" => self.booktab_lowerlimit = parse_abs(value)?,
            "red" => {
                self.red = Rgb::parse(value)?;
                for face in &mut self.faces {
                    if matches!(
                        face.nickname.as_str(),
                        nick::REDLETTER | nick::CHAPTERNUM | nick::CROSSREF_MARKER
                    ) {
                        face.color = self.red;
                    }
                }
            }
            "line_spacing" => self.line_spacing = parse_f64(value)?,
            "poetry_left_margin" => self.poetry_left_margin = parse_abs(value)?,
            "poetry_level_indent" => self.poetry_level_indent = parse_abs(value)?,
            "poetry_wrap_indent" => self.poetry_wrap_indent = parse_abs(value)?,
            "crossref_column_width" => self.crossref_column_width = parse_abs(value)?,
            "crossref_margin_width" => self.crossref_margin_width = parse_abs(value)?,
            "crossref_min_vspace" => self.crossref_min_vspace = parse_abs(value)?,
            "crossref_file" => self.crossref_file = Some(value.into()),
            "book" => self.books.push(value.into()),
            "cache_dir" => self.cache_dir = Some(value.into()),
            "determinism_log" => self.determinism_log = Some(value.into()),
            _ => return self.set_face_key(key, value),
        }
        Ok(())
    }

    /// Apply a per-face key of the form `<nickname>_<attribute>`.
    fn set_face_key(&mut self, key: &str, value: &str) -> StrResult<()> {
        let (nickname, attribute) = match key.rsplit_once('_') {
            Some(split) => split,
            None => bail!("syntax error (unknown key '{key}')"),
        };

        // `baseline_delta` contains an underscore itself.
        let (nickname, attribute) = match nickname.strip_suffix("_baseline") {
            Some(nickname) if attribute == "delta" => (nickname, "baseline_delta"),
            _ => (nickname, attribute),
        };

        let face = match self.faces.iter_mut().find(|f| f.nickname == nickname) {
            Some(face) => face,
            None => bail!("syntax error (unknown key '{key}')"),
        };

        match attribute {
            "fontfile" => face.fontfile = value.into(),
            "fontsize" => face.size = parse_f64(value)?,
            "smallcaps" => face.smallcaps = Some(parse_f64(value)?),
            "baseline_delta" => face.baseline_delta = parse_abs(value)?,
            "lines" => face.line_count = parse_f64(value)? as u32,
            "colour" => face.color = Rgb::parse(value)?,
            _ => bail!("syntax error (unknown key '{key}')"),
        }
        Ok(())
    }

    /// The column width available to body text.
    pub fn column_width(&self) -> Abs {
        self.page_width - self.left_margin - self.right_margin
    }

    /// The vertical space available to page content.
    pub fn content_height(&self) -> Abs {
        self.page_height - self.top_margin - self.bottom_margin
    }
}

fn parse_f64(value: &str) -> StrResult<f64> {
    value
        .parse::<f64>()
        .map_err(|_| error!("expected a number, found '{value}'"))
}

fn parse_abs(value: &str) -> StrResult<Abs> {
    parse_f64(value).map(Abs::pt)
}

/// The chain of `include` directives leading to the file currently being
/// read, for error reporting and cycle detection.
#[derive(Debug, Default)]
pub struct IncludeStack {
    entries: Vec<(PathBuf, usize)>,
}

impl IncludeStack {
    fn push(&mut self, file: &Path, line: usize) -> StrResult<()> {
        if self.entries.len() >= MAX_INCLUDE_DEPTH {
            bail!("{}{}:{line}: includes nested too deeply", self.chain(), file.display());
        }
        if self.entries.iter().any(|(previous, _)| previous == file) {
            bail!("{}{}:{line}: include cycle detected", self.chain(), file.display());
        }
        self.entries.push((file.to_owned(), line));
        Ok(())
    }

    fn pop(&mut self) {
        self.entries.pop();
    }

    /// A rendering of the include chain, innermost first.
    fn chain(&self) -> String {
        let mut out = String::new();
        for (file, line) in self.entries.iter().rev() {
            out.push_str(&format!("In file included from {}:{line}\n", file.display()));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> StrResult<Config> {
        let mut config = Config::default();
        let mut digest = ConfigDigest::new();
        let mut includes = IncludeStack::default();
        config.read_str(text, Path::new("test.profile"), &mut digest, &mut includes)?;
        config.digest = digest.finish();
        Ok(config)
    }

    #[test]
    fn test_basic_keys() {
        let config = parse(
            "# a comment\n\
             page_width 400\n\
             page_height 600\n\
             output_file out.pdf\n\
             book books/genesis.tex\n\
             book books/exodus.tex\n",
        )
        .unwrap();
        assert_eq!(config.page_width, Abs::pt(400.0));
        assert_eq!(config.page_height, Abs::pt(600.0));
        assert_eq!(config.output_file, PathBuf::from("out.pdf"));
        assert_eq!(config.books.len(), 2);
    }

    #[test]
    fn test_face_keys() {
        let config = parse(
            "blackletter_fontsize 9\n\
             blackletter_fontfile text.ttf\n\
             chapternum_lines 3\n\
             booktitle_smallcaps 9\n\
             versenum_baseline_delta -2\n",
        )
        .unwrap();
        let face = |name: &str| {
            config.faces.iter().find(|f| f.nickname == name).unwrap().clone()
        };
        assert_eq!(face("blackletter").size, 9.0);
        assert_eq!(face("blackletter").fontfile, PathBuf::from("text.ttf"));
        assert_eq!(face("chapternum").line_count, 3);
        assert_eq!(face("booktitle").smallcaps, Some(9.0));
        assert_eq!(face("versenum").baseline_delta, Abs::pt(-2.0));
    }

    #[test]
    fn test_unknown_key_is_fatal() {
        let err = parse("no_such_key 1\n").unwrap_err();
        assert!(err.contains("unknown key"), "{err}");
        assert!(err.contains("test.profile:1"), "{err}");
    }

    #[test]
    fn test_digest_ignores_comments_and_trailing_space() {
        let a = parse("page_width 400   \n# note\n").unwrap();
        let b = parse("page_width 400\n").unwrap();
        let c = parse("page_width 401\n").unwrap();
        assert_eq!(a.digest, b.digest);
        assert_ne!(a.digest, c.digest);
    }

    #[test]
    fn test_red_colours_red_faces() {
        let config = parse("red #cc0000\n").unwrap();
        let red = config.faces.iter().find(|f| f.nickname == "redletter").unwrap();
        let black = config.faces.iter().find(|f| f.nickname == "blackletter").unwrap();
        assert_eq!(red.color, config.red);
        assert_eq!(black.color, Rgb::BLACK);
    }
}
