//! Tokenizer for selection expressions.

use crate::error::{Result, SchedError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TokenKind {
    /// Unquoted word: keyword, field name, bare value or `*`
    Word(String),
    /// Quoted string
    Str(String),
    LParen,
    RParen,
    Comma,
    Eq,
    Ne,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Token {
    pub kind: TokenKind,
    /// Byte offset in the source
    pub pos: usize,
}

fn is_word_char(c: char) -> bool {
    !c.is_whitespace() && !matches!(c, '(' | ')' | ',' | '=' | '!' | '\'' | '"')
}

pub(crate) fn tokenize(src: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = src.char_indices().peekable();

    while let Some(&(pos, c)) = chars.peek() {
        let kind = match c {
            c if c.is_whitespace() => {
                chars.next();
                continue;
            }
            '(' => {
                chars.next();
                TokenKind::LParen
            }
            ')' => {
                chars.next();
                TokenKind::RParen
            }
            ',' => {
                chars.next();
                TokenKind::Comma
            }
            '=' => {
                chars.next();
                TokenKind::Eq
            }
            '!' => {
                chars.next();
                match chars.next() {
                    Some((_, '=')) => TokenKind::Ne,
                    _ => return Err(SchedError::syntax(pos, "expected '=' after '!'")),
                }
            }
            '\'' | '"' => {
                chars.next();
                let quote = c;
                let mut value = String::new();
                let mut closed = false;
                while let Some((_, ch)) = chars.next() {
                    if ch == quote {
                        // A doubled quote stands for the quote itself.
                        if matches!(chars.peek(), Some(&(_, next)) if next == quote) {
                            chars.next();
                            value.push(quote);
                            continue;
                        }
                        closed = true;
                        break;
                    }
                    value.push(ch);
                }
                if !closed {
                    return Err(SchedError::syntax(pos, "unterminated string"));
                }
                TokenKind::Str(value)
            }
            _ => {
                let mut word = String::new();
                while let Some(&(_, ch)) = chars.peek() {
                    if !is_word_char(ch) {
                        break;
                    }
                    word.push(ch);
                    chars.next();
                }
                TokenKind::Word(word)
            }
        };
        tokens.push(Token { kind, pos });
    }
    Ok(tokens)
}
