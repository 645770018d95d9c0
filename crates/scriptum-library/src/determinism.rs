//! The determinism recorder: log tagged events from one run and replay
//! them against a second to find where the two diverge.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Lines, Write};
use std::path::Path;

use ecow::{eco_format, EcoString};

use crate::diag::{bail, StrResult};

/// Records events to a log file, or compares against an existing log.
///
/// Opening a path that already exists enters compare mode; the first
/// event that does not match the logged one aborts the run with both
/// versions. Floats are logged as their IEEE-754 bit pattern, so replay
/// compares representations exactly instead of parsing text back.
pub struct Recorder {
    mode: Mode,
    events: u64,
}

enum Mode {
    Record(BufWriter<File>),
    Compare(Lines<BufReader<File>>),
}

impl Recorder {
    /// Open the log at `path`, choosing compare mode if it exists.
    pub fn open(path: &Path) -> StrResult<Self> {
        let mode = if path.exists() {
            match File::open(path) {
                Ok(file) => Mode::Compare(BufReader::new(file).lines()),
                Err(err) => bail!("{}: {err}", path.display()),
            }
        } else {
            match File::create(path) {
                Ok(file) => Mode::Record(BufWriter::new(file)),
                Err(err) => bail!("{}: {err}", path.display()),
            }
        };
        Ok(Self { mode, events: 0 })
    }

    /// Whether the recorder replays an existing log.
    pub fn comparing(&self) -> bool {
        matches!(self.mode, Mode::Compare(_))
    }

    /// Record or verify an integer event.
    pub fn int(&mut self, value: i64, file: &str, line: u32) -> StrResult<()> {
        self.event(eco_format!("int:{value}:{file}:{line}"))
    }

    /// Record or verify a float event.
    pub fn float(&mut self, value: f64, file: &str, line: u32) -> StrResult<()> {
        self.event(eco_format!("float:{:016x}:{file}:{line}", value.to_bits()))
    }

    fn event(&mut self, entry: EcoString) -> StrResult<()> {
        self.events += 1;
        match &mut self.mode {
            Mode::Record(writer) => {
                if let Err(err) = writeln!(writer, "{entry}") {
                    bail!("failed to write determinism log: {err}");
                }
            }
            Mode::Compare(lines) => {
                let logged = match lines.next() {
                    Some(Ok(line)) => line,
                    Some(Err(err)) => bail!("failed to read determinism log: {err}"),
                    None => bail!(
                        "event #{}: expected {entry}, but the log has ended",
                        self.events
                    ),
                };
                if logged != entry {
                    bail!(
                        "event #{}: expected {logged}, but this run produced {entry}",
                        self.events
                    );
                }
            }
        }
        Ok(())
    }
}

/// Record an event through an optional recorder, tagging it with the
/// caller's source location.
#[macro_export]
macro_rules! determinism_event {
    ($recorder:expr, int: $value:expr) => {
        if let Some(recorder) = $recorder.as_mut() {
            recorder.int($value as i64, file!(), line!())?;
        }
    };
    ($recorder:expr, float: $value:expr) => {
        if let Some(recorder) = $recorder.as_mut() {
            recorder.float($value as f64, file!(), line!())?;
        }
    };
}

#[doc(inline)]
pub use crate::determinism_event;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_then_compare_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("determinism.log");

        let mut recorder = Recorder::open(&path).unwrap();
        assert!(!recorder.comparing());
        recorder.int(42, "pages.rs", 10).unwrap();
        recorder.float(1.5, "pages.rs", 11).unwrap();
        drop(recorder);

        let mut replay = Recorder::open(&path).unwrap();
        assert!(replay.comparing());
        replay.int(42, "pages.rs", 10).unwrap();
        replay.float(1.5, "pages.rs", 11).unwrap();
    }

    #[test]
    fn test_divergence_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("determinism.log");

        let mut recorder = Recorder::open(&path).unwrap();
        recorder.int(42, "pages.rs", 10).unwrap();
        drop(recorder);

        let mut replay = Recorder::open(&path).unwrap();
        let err = replay.int(43, "pages.rs", 10).unwrap_err();
        assert!(err.contains("event #1"), "{err}");
    }

    #[test]
    fn test_floats_compare_by_bit_pattern() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("determinism.log");

        let mut recorder = Recorder::open(&path).unwrap();
        recorder.float(0.1 + 0.2, "x.rs", 1).unwrap();
        drop(recorder);

        let mut replay = Recorder::open(&path).unwrap();
        assert!(replay.float(0.3, "x.rs", 1).is_err());
    }
}
