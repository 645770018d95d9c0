//! Streaming digests for configuration text and line content.
//!
//! The configuration digest is the prefix of every metrics cache file
//! name, so tables computed under one page geometry or font set are
//! never reused under another.

use ecow::EcoString;
use sha1::{Digest, Sha1};

use crate::model::Line;

/// Accumulates the canonicalized configuration text.
#[derive(Default)]
pub struct ConfigDigest {
    hasher: Sha1,
}

impl ConfigDigest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one raw configuration line. Comments and blank lines are
    /// skipped and trailing whitespace is trimmed, so the digest is
    /// insensitive to layout-irrelevant edits.
    pub fn update_line(&mut self, line: &str) {
        let line = line.trim_end();
        if line.is_empty() || line.starts_with('#') {
            return;
        }
        self.hasher.update(line.as_bytes());
        self.hasher.update(b"\n");
    }

    /// The final hex digest.
    pub fn finish(self) -> EcoString {
        hex(&self.hasher.finalize())
    }
}

/// Digest of a line's layout-relevant content. Together with the config
/// digest this keys the persisted metrics table for the line.
pub fn line_digest(line: &Line) -> EcoString {
    let mut hasher = Sha1::new();
    hasher.update([line.alignment as u8]);
    hasher.update(line.max_width.to_pt().to_bits().to_le_bytes());
    hasher.update(line.left_margin.to_pt().to_bits().to_le_bytes());
    hasher.update(line.height.to_pt().to_bits().to_le_bytes());
    hasher.update((line.pieces.len() as u64).to_le_bytes());
    for piece in &line.pieces {
        hasher.update(piece.text.as_bytes());
        hasher.update([0]);
        hasher.update(piece.face.0.to_le_bytes());
        hasher.update(piece.size.to_bits().to_le_bytes());
        hasher.update(piece.natural_width.to_pt().to_bits().to_le_bytes());
        hasher.update(piece.baseline.to_pt().to_bits().to_le_bytes());
        hasher.update([piece.elastic as u8, piece.nobreak as u8]);
    }
    hex(&hasher.finalize())
}

fn hex(bytes: &[u8]) -> EcoString {
    let mut out = EcoString::with_capacity(2 * bytes.len());
    for byte in bytes {
        for digit in [byte >> 4, byte & 0xf] {
            out.push(char::from_digit(digit as u32, 16).unwrap());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fonts::FaceId;
    use crate::geom::Abs;
    use crate::model::{Alignment, LineUid, Piece};

    #[test]
    fn test_config_digest_is_canonical() {
        let mut a = ConfigDigest::new();
        a.update_line("page_width 400  ");
        a.update_line("# comment");
        a.update_line("");
        let mut b = ConfigDigest::new();
        b.update_line("page_width 400");
        assert_eq!(a.finish(), b.finish());
    }

    #[test]
    fn test_config_digest_is_hex_sha1() {
        let digest = ConfigDigest::new().finish();
        assert_eq!(digest.len(), 40);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_line_digest_depends_on_content() {
        let mut line = Line::new(LineUid(0), Alignment::Justified, Abs::pt(100.0));
        line.append(
            Piece::new("word", FaceId(0), 10.0, Abs::pt(20.0), Abs::zero(), false, 0),
            false,
        );
        let before = line_digest(&line);

        let mut other = line.clone();
        other.pieces[0].text = "word!".into();
        assert_ne!(before, line_digest(&other));

        // The same content digests identically, and the uid is irrelevant.
        let mut same = line.clone();
        same.uid = LineUid(99);
        assert_eq!(before, line_digest(&same));
    }
}
