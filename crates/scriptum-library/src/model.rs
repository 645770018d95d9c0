//! The document model: pieces, lines, paragraphs and span coordinates.

use ecow::EcoString;
use serde::{Deserialize, Serialize};

use crate::fonts::FaceId;
use crate::geom::Abs;

/// Penalty of a segment that cannot be laid out (wider than its column).
///
/// Chosen so that summing a handful of these cannot overflow an `i64`;
/// penalty sums use saturating addition throughout.
pub const IMPOSSIBLE: i64 = i64::MAX / 4;

/// Horizontal alignment of a line.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Alignment {
    Left,
    Right,
    Centred,
    Justified,
    None,
}

/// Identifies a physical line across the whole run.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct LineUid(pub u32);

/// Source citation of a cross-reference paragraph: the key under which
/// body pieces refer to it.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct CrossrefKey {
    pub book: EcoString,
    pub chapter: u32,
    pub verse: u32,
}

/// An atomic, indivisible rendered unit within a line.
#[derive(Debug, Clone)]
pub struct Piece {
    pub text: EcoString,
    pub face: FaceId,
    /// The size the piece is actually set at (may differ from the face's
    /// natural size for emulated small caps).
    pub size: f64,
    /// The width at construction time; never mutated afterwards.
    pub natural_width: Abs,
    /// The current width, possibly justified or shrunk for hanging.
    pub width: Abs,
    /// Downward baseline shift.
    pub baseline: Abs,
    /// Whether justification may grow this piece.
    pub elastic: bool,
    /// Forbids a line break immediately after this piece.
    pub nobreak: bool,
    /// The source token this piece came from.
    pub token_number: usize,
    /// Cross-reference paragraph attached to this piece, by table key.
    pub crossref: Option<CrossrefKey>,
}

impl Piece {
    /// Create a piece. Exactly single ordinary spaces and single
    /// non-breaking spaces are elastic.
    pub fn new(
        text: impl Into<EcoString>,
        face: FaceId,
        size: f64,
        width: Abs,
        baseline: Abs,
        nobreak: bool,
        token_number: usize,
    ) -> Self {
        let text = text.into();
        let elastic = text == " " || text == "\u{a0}";
        Self {
            text,
            face,
            size,
            natural_width: width,
            width,
            baseline,
            elastic,
            nobreak,
            token_number,
            crossref: None,
        }
    }
}

/// An ordered sequence of pieces with alignment and hanging state.
///
/// Before line breaking this is a *long line* (as authored); afterwards a
/// *physical line* (as it will appear on the page). A line with zero
/// pieces is a pure vertical gap of height `height`.
#[derive(Debug, Clone)]
pub struct Line {
    pub pieces: Vec<Piece>,
    pub alignment: Alignment,
    pub max_width: Abs,
    pub left_margin: Abs,
    pub left_hang: Abs,
    pub right_hang: Abs,
    /// Sum of current piece widths minus the hangs, kept up to date by
    /// width recalculation.
    pub width: Abs,
    pub height: Abs,
    pub ascent: Abs,
    pub descent: Abs,
    /// Separating this line from its successor by a page break produces
    /// a widow.
    pub tied_to_next: bool,
    pub uid: LineUid,
    pub poem_level: u32,
    /// Segment metrics, filled in when the paragraph is analysed.
    pub metrics: Option<LineMetrics>,
}

impl Line {
    pub fn new(uid: LineUid, alignment: Alignment, max_width: Abs) -> Self {
        Self {
            pieces: Vec::new(),
            alignment,
            max_width,
            left_margin: Abs::zero(),
            left_hang: Abs::zero(),
            right_hang: Abs::zero(),
            width: Abs::zero(),
            height: Abs::zero(),
            ascent: Abs::zero(),
            descent: Abs::zero(),
            tied_to_next: false,
            uid,
            poem_level: 0,
            metrics: None,
        }
    }

    /// Whether this line is a pure vertical gap.
    pub fn is_vspace(&self) -> bool {
        self.pieces.is_empty()
    }

    /// Append a piece, marking break prohibitions: no break before
    /// closing punctuation, non-breaking spaces or footnote marks.
    pub fn append(&mut self, piece: Piece, is_footnote_mark: bool) {
        let forbids_break_before = is_footnote_mark
            || matches!(piece.text.chars().next(), Some('\u{a0}' | ',' | '.' | '\''));
        if forbids_break_before {
            if let Some(prev) = self.pieces.last_mut() {
                prev.nobreak = true;
            }
        }
        self.pieces.push(piece);
    }
}

/// Triangular table of segment penalties and heights for one long line.
///
/// `get(a, b)` is the cost and total height of optimally breaking pieces
/// `a..b` into physical lines of the line's column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineMetrics {
    pub piece_count: usize,
    starts: Vec<Vec<SegmentMetrics>>,
}

/// One entry of the segment metrics table.
#[derive(Debug, Copy, Clone, Serialize, Deserialize)]
pub struct SegmentMetrics {
    pub penalty: i64,
    pub height: Abs,
}

impl LineMetrics {
    pub fn new(piece_count: usize, starts: Vec<Vec<SegmentMetrics>>) -> Self {
        debug_assert_eq!(starts.len(), piece_count);
        Self { piece_count, starts }
    }

    /// Metrics for the piece range `a..b`; requires `a < b <= piece_count`.
    pub fn get(&self, a: usize, b: usize) -> SegmentMetrics {
        self.starts[a][b - a - 1]
    }
}

/// A paragraph: authored long lines plus the line under construction and
/// the margin state that outlives individual lines.
#[derive(Debug, Clone, Default)]
pub struct Paragraph {
    pub lines: Vec<Line>,
    pub current: Option<Line>,
    pub poem_level: u32,
    pub poem_subsequent_line: bool,
    pub drop_char_left_margin: Abs,
    pub drop_char_margin_line_count: u32,
    pub src_book: Option<EcoString>,
    pub src_chapter: u32,
    pub src_verse: u32,
    pub total_height: Abs,
    pub noindent: bool,
}

impl Paragraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the paragraph has no content at all.
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty() && self.current.is_none()
    }

    /// Fold the line under construction into the finished lines, unless
    /// it is completely empty.
    pub fn flush_current(&mut self) {
        if let Some(line) = self.current.take() {
            if !line.pieces.is_empty() || line.height != Abs::zero() {
                self.lines.push(line);
            }
        }
    }
}

/// Lexicographic coordinate of one cut point in the document: the piece
/// `piece` of line `line` of paragraph `para`. Two points with the first
/// preceding the second delimit a half-open span of pieces.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct SpanPoint {
    pub para: usize,
    pub line: usize,
    pub piece: usize,
}

impl SpanPoint {
    pub fn new(para: usize, line: usize, piece: usize) -> Self {
        Self { para, line, piece }
    }
}
