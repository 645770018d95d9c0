//! Tokenizer for the markup consumed by the layout engine.
//!
//! The format is brace-tagged text: `tag{...}` opens a tag whose content
//! runs until the matching `}`, blank lines separate paragraphs, and
//! whitespace runs collapse into single space tokens. `--` and `---`
//! become en- and em-dashes during tokenization.

use std::fs;
use std::path::Path;

use ecow::EcoString;
use scriptum_library::diag::{bail, file_error, StrResult};

/// Hard bound on the number of tokens in a run.
pub const MAX_TOKENS: usize = 1 << 20;

/// What a token contributes to the document.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum TokenKind {
    /// A word or other run of text.
    Text,
    /// `name{`: begins tagged content; the text is the tag name.
    Tag,
    /// `}`: ends the innermost tag.
    EndTag,
    /// A blank line.
    Paragraph,
    /// A run of whitespace.
    Space,
}

/// One token of the markup stream.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: EcoString,
}

impl Token {
    fn new(kind: TokenKind, text: impl Into<EcoString>) -> Self {
        Self { kind, text: text.into() }
    }
}

/// Tokenize the contents of a file.
pub fn tokenize_file(path: &Path) -> StrResult<Vec<Token>> {
    let text = fs::read_to_string(path).map_err(|err| file_error(err, path))?;
    tokenize(&text)
}

/// Tokenize markup text.
pub fn tokenize(text: &str) -> StrResult<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut word = String::new();
    let mut chars = text.chars().peekable();

    let mut push = |token: Token, tokens: &mut Vec<Token>| -> StrResult<()> {
        if tokens.len() >= MAX_TOKENS {
            bail!("too many tokens (limit is {MAX_TOKENS})");
        }
        tokens.push(token);
        Ok(())
    };

    let flush = |word: &mut String, kind: TokenKind| -> Option<Token> {
        if word.is_empty() && kind != TokenKind::Tag {
            return None;
        }
        let mut text = std::mem::take(word);
        if kind == TokenKind::Text {
            text = substitute_dashes(&text).to_string();
        }
        Some(Token::new(kind, text))
    };

    while let Some(c) = chars.next() {
        match c {
            '{' => {
                // The word so far names the tag.
                if let Some(token) = flush(&mut word, TokenKind::Tag) {
                    push(token, &mut tokens)?;
                }
            }
            '}' => {
                if let Some(token) = flush(&mut word, TokenKind::Text) {
                    push(token, &mut tokens)?;
                }
                push(Token::new(TokenKind::EndTag, ""), &mut tokens)?;
            }
            '\\' => {
                // Escape: the next character is literal text.
                if let Some(escaped) = chars.next() {
                    word.push(escaped);
                }
            }
            '\u{a0}' => {
                // Non-breaking spaces become pieces of their own.
                if let Some(token) = flush(&mut word, TokenKind::Text) {
                    push(token, &mut tokens)?;
                }
                push(Token::new(TokenKind::Text, "\u{a0}"), &mut tokens)?;
            }
            ' ' | '\t' | '\r' | '\n' => {
                if let Some(token) = flush(&mut word, TokenKind::Text) {
                    push(token, &mut tokens)?;
                }

                // Consume the whole whitespace run and decide whether it
                // contains a paragraph break.
                let mut newlines = usize::from(c == '\n');
                while let Some(&next) = chars.peek() {
                    if !matches!(next, ' ' | '\t' | '\r' | '\n') {
                        break;
                    }
                    newlines += usize::from(next == '\n');
                    chars.next();
                }

                if newlines >= 2 {
                    push(Token::new(TokenKind::Paragraph, ""), &mut tokens)?;
                } else {
                    // Spaces at the start of the input or right after a
                    // paragraph break carry nothing.
                    let suppress = match tokens.last() {
                        None => true,
                        Some(last) => last.kind == TokenKind::Paragraph,
                    };
                    if !suppress {
                        push(Token::new(TokenKind::Space, " "), &mut tokens)?;
                    }
                }
            }
            _ => word.push(c),
        }
    }

    if let Some(token) = flush(&mut word, TokenKind::Text) {
        push(token, &mut tokens)?;
    }

    Ok(tokens)
}

/// Replace TeX-style dash runs with the unicode dashes they stand for.
fn substitute_dashes(text: &str) -> EcoString {
    if !text.contains("--") {
        return text.into();
    }
    let mut out = EcoString::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("--") {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        if tail.starts_with("---") {
            out.push('\u{2014}');
            rest = &tail[3..];
        } else {
            out.push('\u{2013}');
            rest = &tail[2..];
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(tokens: &[Token]) -> Vec<TokenKind> {
        tokens.iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_words_and_spaces() {
        let tokens = tokenize("In the beginning").unwrap();
        assert_eq!(
            kinds(&tokens),
            vec![
                TokenKind::Text,
                TokenKind::Space,
                TokenKind::Text,
                TokenKind::Space,
                TokenKind::Text,
            ]
        );
        assert_eq!(tokens[0].text, "In");
        assert_eq!(tokens[4].text, "beginning");
    }

    #[test]
    fn test_tags() {
        let tokens = tokenize("bookheader{Genesis}").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::new(TokenKind::Tag, "bookheader"),
                Token::new(TokenKind::Text, "Genesis"),
                Token::new(TokenKind::EndTag, ""),
            ]
        );
    }

    #[test]
    fn test_whitespace_collapses() {
        let tokens = tokenize("a  \t  b").unwrap();
        assert_eq!(
            kinds(&tokens),
            vec![TokenKind::Text, TokenKind::Space, TokenKind::Text]
        );
    }

    #[test]
    fn test_blank_line_is_a_paragraph() {
        let tokens = tokenize("one\n\ntwo").unwrap();
        assert_eq!(
            kinds(&tokens),
            vec![TokenKind::Text, TokenKind::Paragraph, TokenKind::Text]
        );
    }

    #[test]
    fn test_dash_substitution() {
        let tokens = tokenize("now---then 4--5").unwrap();
        assert_eq!(tokens[0].text, "now\u{2014}then");
        assert_eq!(tokens[2].text, "4\u{2013}5");
    }

    #[test]
    fn test_escape() {
        let tokens = tokenize("a\\{b").unwrap();
        assert_eq!(tokens, vec![Token::new(TokenKind::Text, "a{b")]);
    }

    #[test]
    fn test_nbsp_is_its_own_token() {
        let tokens = tokenize("a\u{a0}b").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::new(TokenKind::Text, "a"),
                Token::new(TokenKind::Text, "\u{a0}"),
                Token::new(TokenKind::Text, "b"),
            ]
        );
    }
}
