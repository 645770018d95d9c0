//! End-to-end tests: tokens in, recorded draw operations out.

use std::fs;

use scriptum_library::config::Config;
use scriptum_library::fonts::{FontBook, LoadedFont, Rgb, TypeFace};
use scriptum_library::geom::Abs;
use scriptum_library::render::RecordingRenderer;
use scriptum_layout::{typeset, Engine};

/// A registry of uniform-metric faces covering every nickname the
/// engine expects.
fn fonts() -> FontBook {
    let mut book = FontBook::new();
    let font = book.add_font(LoadedFont::uniform(500.0)).unwrap();
    for (nickname, size, line_count) in [
        ("blackletter", 10.0, 1),
        ("redletter", 10.0, 1),
        ("versenum", 5.0, 1),
        ("chapternum", 30.0, 3),
        ("footnotemark", 5.0, 1),
        ("footnotemarkinfootnote", 5.0, 1),
        ("footnoteversenum", 6.0, 1),
        ("crossrefmarker", 5.0, 1),
        ("crossref", 5.0, 1),
        ("booktitle", 12.0, 1),
        ("header", 12.0, 1),
        ("booktab", 12.0, 1),
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

fn config() -> Config {
    let mut config = Config::default();
    config.page_width = Abs::pt(160.0);
    config.page_height = Abs::pt(140.0);
    config.left_margin = Abs::pt(20.0);
    config.right_margin = Abs::pt(40.0);
    config.top_margin = Abs::pt(20.0);
    config.bottom_margin = Abs::pt(20.0);
    config.line_spacing = 1.1;
    config.crossref_column_width = Abs::pt(30.0);
    config.crossref_margin_width = Abs::pt(4.0);
    config
}

const BOOK: &str = "bookheader{Genesis}labelbook{Gen}

chapternum{1}versenum{1}In the beginning word word word word word word
word word word word word word word word word word word word word
versenum{2}and more words follow here footnote{note text here} and the
text runs on and on until the page fills with enough lines

versenum{3}a fresh paragraph with several more words to set
";

fn run(config: &Config, text: &str, crossref_db: Option<&str>) -> RecordingRenderer {
    let dir = tempfile::tempdir().unwrap();
    let book_path = dir.path().join("genesis.tex");
    fs::write(&book_path, text).unwrap();

    let mut config = config.clone();
    config.books = vec![book_path];
    if let Some(db) = crossref_db {
        let db_path = dir.path().join("crossrefs.txt");
        fs::write(&db_path, db).unwrap();
        config.crossref_file = Some(db_path);
    }

    let mut renderer = RecordingRenderer::new();
    typeset(config, fonts(), &mut renderer).unwrap();
    renderer
}

fn texts(renderer: &RecordingRenderer) -> Vec<String> {
    renderer
        .ops
        .iter()
        .filter(|op| op.starts_with("text:"))
        .map(|op| op.splitn(4, ':').nth(3).unwrap().to_string())
        .collect()
}

#[test]
fn test_pipeline_produces_pages_and_text() {
    let renderer = run(&config(), BOOK, None);
    let pages = renderer.ops.iter().filter(|op| op.starts_with("page:")).count();
    assert!(pages >= 1);

    let drawn = texts(&renderer);
    assert!(drawn.iter().any(|t| t == "beginning"));
    // The booktab label is drawn.
    assert!(drawn.iter().any(|t| t == "GENESIS"));
}

#[test]
fn test_identical_runs_are_byte_identical() {
    let one = run(&config(), BOOK, None);
    let two = run(&config(), BOOK, None);
    assert_eq!(one.finish(), two.finish());
}

#[test]
fn test_footnote_is_drawn_at_page_bottom() {
    let renderer = run(&config(), BOOK, None);

    // The footnote mark appears twice: once in the body, once in the
    // footnote block.
    let drawn = texts(&renderer);
    let marks = drawn.iter().filter(|t| t.as_str() == "a").count();
    assert!(marks >= 2, "expected body mark and footnote mark, saw {marks}");

    // Footnote body text sits at the bottom of its page, flush against
    // the bottom margin.
    let note_y = renderer
        .ops
        .iter()
        .filter(|op| op.starts_with("text:"))
        .find(|op| op.ends_with(":note"))
        .map(|op| op.split(':').nth(2).unwrap().parse::<f64>().unwrap())
        .expect("footnote text not drawn");
    let bottom = config().bottom_margin.to_pt();
    assert!(note_y >= bottom - 1e-6 && note_y < bottom + 15.0, "note at y={note_y}");
}

#[test]
fn test_two_footnotes_flow_into_one_block() {
    let mut cfg = config();
    cfg.page_height = Abs::pt(400.0);
    let text = "bookheader{Genesis}labelbook{Gen}\n\n\
                words here footnote{alpha note} and more \
                footnote{beta note} after that";
    let renderer = run(&cfg, text, None);

    // Both marks appear twice: in the body and in the block.
    let drawn = texts(&renderer);
    for mark in ["a", "b"] {
        let times = drawn.iter().filter(|t| t.as_str() == mark).count();
        assert!(times >= 2, "mark '{mark}' drawn {times} times");
    }

    // The two short footnotes share a single line at the page bottom:
    // were their heights summed, the second would sit a line lower.
    let y_of = |needle: &str| {
        renderer
            .ops
            .iter()
            .filter(|op| op.starts_with("text:"))
            .find(|op| op.ends_with(needle))
            .map(|op| op.split(':').nth(2).unwrap().parse::<f64>().unwrap())
            .unwrap_or_else(|| panic!("{needle} not drawn"))
    };
    let alpha_y = y_of(":alpha");
    let beta_y = y_of(":beta");
    assert!(
        (alpha_y - beta_y).abs() < 1e-6,
        "footnotes on different lines: {alpha_y} vs {beta_y}"
    );
    let bottom = cfg.bottom_margin.to_pt();
    assert!(alpha_y >= bottom - 1e-6 && alpha_y < bottom + 12.0);
}

#[test]
fn test_crossrefs_are_drawn_in_margin_column() {
    let db = "Gen 1:2 Ps 33:6\n";
    let cfg = config();
    let renderer = run(&cfg, BOOK, Some(db));

    // The cross-reference marker "1:2" and its text are drawn.
    let drawn = texts(&renderer);
    assert!(drawn.iter().any(|t| t == "33:6"), "crossref text missing: {drawn:?}");

    // And it sits in the margin column, right of the body column.
    let body_right = (cfg.page_width - cfg.right_margin).to_pt();
    let x = renderer
        .ops
        .iter()
        .filter(|op| op.starts_with("text:"))
        .find(|op| op.ends_with(":33:6"))
        .map(|op| op.split(':').nth(1).unwrap().parse::<f64>().unwrap())
        .unwrap();
    assert!(x >= body_right - 1e-6, "crossref at x={x}, body ends at {body_right}");
}

#[test]
fn test_drop_cap_indents_covered_lines_only() {
    let mut cfg = config();
    cfg.page_height = Abs::pt(400.0);
    let renderer = run(&cfg, BOOK, None);

    // Group body text x-positions by baseline y.
    let mut rows: Vec<(f64, f64)> = Vec::new(); // (y, min x)
    for op in renderer.ops.iter().filter(|op| op.starts_with("text:")) {
        let mut parts = op.split(':');
        parts.next();
        let x: f64 = parts.next().unwrap().parse().unwrap();
        let y: f64 = parts.next().unwrap().parse().unwrap();
        match rows.iter_mut().find(|(row_y, _)| (*row_y - y).abs() < 0.01) {
            Some(row) => row.1 = row.1.min(x),
            None => rows.push((y, x)),
        }
    }
    // Top-down order; skip the header row (drawn above the body).
    rows.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap());
    let body: Vec<(f64, f64)> = rows
        .into_iter()
        .filter(|(y, _)| *y <= (cfg.page_height - cfg.top_margin).to_pt())
        .collect();

    let left = cfg.left_margin.to_pt();
    // Row 0 starts at the margin with the drop cap itself; the next two
    // rows are indented by the cap's margin; the fourth row returns to
    // the margin (modulo a hanging verse number).
    assert!(body[0].1 < left + 5.0, "cap row at {}", body[0].1);
    assert!(body[1].1 > left + 10.0, "row 1 not indented: {}", body[1].1);
    assert!(body[2].1 > left + 10.0, "row 2 not indented: {}", body[2].1);
    assert!(body[3].1 < left + 5.0, "row 3 indented: {}", body[3].1);
}

#[test]
fn test_header_suppressed_on_book_start_page() {
    let mut cfg = config();
    cfg.page_height = Abs::pt(80.0);
    let renderer = run(&cfg, BOOK, None);

    // Reconstruct pages from the op stream: the header "Genesis N" must
    // not appear on the first page but should on later ones.
    let mut pages: Vec<Vec<String>> = Vec::new();
    for op in &renderer.ops {
        if op.starts_with("page:") {
            pages.push(Vec::new());
        } else if op.starts_with("text:") {
            if let Some(page) = pages.last_mut() {
                page.push(op.splitn(4, ':').nth(3).unwrap().to_string());
            }
        }
    }
    assert!(pages.len() >= 2, "need several pages, got {}", pages.len());
    assert!(!pages[0].iter().any(|t| t.starts_with("Genesis ")));
    assert!(pages[1].iter().any(|t| t.starts_with("Genesis ")));
}

#[test]
fn test_adding_empty_paragraphs_changes_nothing() {
    let plain = run(&config(), BOOK, None);
    let padded_text = BOOK.replace("\n\n", "\n\n\n\n");
    let padded = run(&config(), &padded_text, None);
    assert_eq!(plain.finish(), padded.finish());
}

#[test]
fn test_engine_rejects_unclosed_footnote() {
    let mut engine = Engine::new(config(), fonts()).unwrap();
    let tokens = scriptum_syntax::tokenize("word footnote{dangling").unwrap();
    engine.process(&tokens).unwrap();
    assert!(engine.finish().is_err());
}
