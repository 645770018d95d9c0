//! scriptum's layout engine.
//!
//! The engine consumes the token stream, assembles paragraphs of long
//! lines, computes per-line segment metrics, and then chooses page
//! breaks that globally minimize a layout penalty before emitting the
//! chosen pages through a [`Renderer`].

mod collect;
mod columns;
mod crossrefs;
mod finalize;
mod footnotes;
mod linebreak;
mod metrics;
mod pages;

pub use self::pages::PagePlan;

use ecow::EcoString;
use scriptum_library::config::Config;
use scriptum_library::determinism::Recorder;
use scriptum_library::diag::{bail, StrResult};
use scriptum_library::fonts::{nick, FaceId, FontBook};
use scriptum_library::geom::Abs;
use scriptum_library::model::{LineUid, Paragraph};
use scriptum_library::render::Renderer;

use self::columns::ColumnCache;
use self::crossrefs::Crossrefs;
use self::footnotes::Footnotes;

/// Maximum number of pieces in one line.
pub const MAX_LINE_PIECES: usize = 1024;

/// Maximum number of lines in one paragraph.
pub const MAX_LINES_IN_PARAGRAPH: usize = 4096;

/// Maximum depth of the style stack.
pub const STYLE_STACK_DEPTH: usize = 64;

/// Penalty for separating a line from its tied successor by a page break.
pub const WIDOW_PENALTY: i64 = 250_000;

/// Extra weight on the squared underfull fraction of a page.
pub const UNDERFULL_PAGE_PENALTY_MULTIPLIER: i64 = 4;

/// Penalty standing in for an infeasible page (overfull body or floats).
pub const OVERFULL_PAGE_PENALTY: i64 = 100_000_000;

/// Maximum number of footnotes a single page can carry.
pub const MAX_FOOTNOTES_ON_PAGE: usize = 32;

/// Maximum number of verses with cross-references on a single page.
pub const MAX_VERSES_ON_PAGE: usize = 64;

/// Which paragraph incoming text is routed to.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) enum Target {
    Body,
    Footnote,
    Crossref,
}

/// Which face of the leaf is being produced.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) enum Side {
    Left,
    Right,
}

/// The effective margins for the column currently being filled. These
/// are mirrored on right faces and narrowed while cross-reference
/// paragraphs are built.
#[derive(Debug, Copy, Clone)]
pub(crate) struct Margins {
    pub left: Abs,
    pub right: Abs,
}

/// The current font and the stack of fonts behind it.
#[derive(Debug, Clone)]
pub(crate) struct StyleStack {
    pub stack: Vec<FaceId>,
    pub current: FaceId,
}

impl StyleStack {
    pub fn depth(&self) -> usize {
        self.stack.len()
    }
}

/// A saved copy of the style state, stashed while output is redirected
/// into a footnote and restored afterwards.
#[derive(Debug, Clone)]
pub(crate) struct StyleSnapshot {
    pub stack: Vec<FaceId>,
    pub current: FaceId,
}

/// One book of the document: where it starts and how it is labelled.
#[derive(Debug, Clone)]
pub struct BookRun {
    /// Index of the book's first body paragraph.
    pub first_para: usize,
    /// The book title as authored.
    pub title: EcoString,
    /// Uppercased title drawn on the booktab.
    pub booktab: EcoString,
    /// Short name used to match cross-reference database entries.
    pub short_name: Option<EcoString>,
}

/// The engine context: all state of a typesetting run, threaded
/// explicitly through every operation.
pub struct Engine {
    pub config: Config,
    pub fonts: FontBook,

    // Collection state.
    pub(crate) styles: StyleStack,
    pub(crate) stashes: Vec<StyleSnapshot>,
    pub(crate) target: Target,
    pub(crate) body: Paragraph,
    pub(crate) paragraphs: Vec<Paragraph>,
    pub(crate) books: Vec<BookRun>,
    pub(crate) poem_depths: Vec<usize>,
    pub(crate) chapter_label: u32,
    pub(crate) verse_label: u32,

    // Floats.
    pub(crate) footnotes: Footnotes,
    pub(crate) crossrefs: Crossrefs,

    // Caches and instrumentation.
    pub(crate) columns: ColumnCache,
    pub(crate) recorder: Option<Recorder>,

    // Page state during emission.
    pub(crate) margins: Margins,
    pub(crate) side: Side,
    pub(crate) page_y: Abs,
    pub(crate) booktab_y: Abs,
    pub(crate) booktab_text: Option<EcoString>,
    pub(crate) header_title: Option<EcoString>,
    pub(crate) last_chapter_on_page: u32,
    pub(crate) last_verse_on_page: u32,

    next_uid: u32,
}

impl Engine {
    /// Create an engine for a configuration and the fonts loaded for it.
    pub fn new(config: Config, fonts: FontBook) -> StrResult<Self> {
        let blackletter = fonts.resolve(nick::BLACKLETTER)?;
        let recorder = match &config.determinism_log {
            Some(path) => Some(Recorder::open(path)?),
            None => None,
        };
        let margins = Margins { left: config.left_margin, right: config.right_margin };
        Ok(Self {
            config,
            fonts,
            styles: StyleStack { stack: Vec::new(), current: blackletter },
            stashes: Vec::new(),
            target: Target::Body,
            body: Paragraph::new(),
            paragraphs: Vec::new(),
            books: Vec::new(),
            poem_depths: Vec::new(),
            chapter_label: 1,
            verse_label: 1,
            footnotes: Footnotes::new(),
            crossrefs: Crossrefs::new(),
            columns: ColumnCache::new(),
            recorder,
            margins,
            side: Side::Left,
            page_y: Abs::zero(),
            booktab_y: Abs::zero(),
            booktab_text: None,
            header_title: None,
            last_chapter_on_page: 1,
            last_verse_on_page: 1,
            next_uid: 0,
        })
    }

    /// Allocate a line uid, unique within this run.
    pub(crate) fn alloc_uid(&mut self) -> LineUid {
        let uid = LineUid(self.next_uid);
        self.next_uid += 1;
        uid
    }

    /// The paragraph that incoming text is currently routed to.
    pub(crate) fn target_mut(&mut self) -> &mut Paragraph {
        match self.target {
            Target::Body => &mut self.body,
            Target::Footnote => &mut self.footnotes.scratch,
            Target::Crossref => &mut self.crossrefs.scratch,
        }
    }

    pub(crate) fn target_ref(&self) -> &Paragraph {
        match self.target {
            Target::Body => &self.body,
            Target::Footnote => &self.footnotes.scratch,
            Target::Crossref => &self.crossrefs.scratch,
        }
    }

    /// The column width between the effective margins.
    pub(crate) fn column_width(&self) -> Abs {
        self.config.page_width - self.margins.left - self.margins.right
    }

    /// The short book name in effect for cross-reference matching.
    pub(crate) fn short_book_name(&self) -> Option<EcoString> {
        self.books.last().and_then(|book| book.short_name.clone())
    }

    /// The analysed body paragraphs.
    pub fn paragraphs(&self) -> &[Paragraph] {
        &self.paragraphs
    }

    /// The collected book runs.
    pub fn books(&self) -> &[BookRun] {
        &self.books
    }

    /// Finish collection: flush the final paragraph.
    pub fn finish(&mut self) -> StrResult<()> {
        if self.target != Target::Body {
            bail!("input ended inside a footnote or cross-reference");
        }
        self.flush_paragraph()
    }
}

/// Typeset the configured document into the renderer.
///
/// This drives the whole pipeline: cross-reference loading, token
/// collection over every configured book, page optimization, emission,
/// and finally saving the renderer's output to the configured path.
pub fn typeset(
    config: Config,
    fonts: FontBook,
    renderer: &mut dyn Renderer,
) -> StrResult<()> {
    let mut engine = Engine::new(config, fonts)?;

    if let Some(path) = engine.config.crossref_file.clone() {
        engine.load_crossrefs(&path)?;
    }

    for path in engine.config.books.clone() {
        let tokens = scriptum_syntax::tokenize_file(&path)?;
        engine.process(&tokens)?;
    }
    engine.finish()?;

    let plan = engine.optimize()?;
    engine.emit(&plan, renderer)?;

    let output = engine.config.output_file.clone();
    renderer.save(&output)
}
