//! Lexer for Pointy-Lang source text.
//!
//! Produces a flat token stream, longest-match, left-to-right. Whitespace is
//! discarded; `COMMENT` and `DIRECTIVE` tokens are retained in the stream but
//! skipped by the parser — they do not participate in the grammar.

use std::fmt;

/// 1-based line/column plus a 0-based byte offset, used in syntax errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
    pub line: usize,
    pub column: usize,
    pub offset: usize,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}, column {}", self.line, self.column)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    TaskName,
    Number,
    Pointer,
    PPointer,
    Parallel,
    Retry,
    Seperator,
    LParen,
    RParen,
    Comment,
    Directive,
    /// Lexer could not match any lexeme at this position.
    Error,
    /// Synthetic end-of-input marker, never produced mid-stream.
    Eof,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub lexeme: String,
    pub position: Position,
}

impl Token {
    /// Whether this token participates in the grammar at all.
    pub fn is_significant(&self) -> bool {
        !matches!(self.kind, TokenKind::Comment | TokenKind::Directive)
    }
}

struct Lexer {
    chars: Vec<char>,
    i: usize,
    line: usize,
    column: usize,
}

impl Lexer {
    fn new(src: &str) -> Self {
        Self {
            chars: src.chars().collect(),
            i: 0,
            line: 1,
            column: 1,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.i).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.i + offset).copied()
    }

    fn position(&self) -> Position {
        Position {
            line: self.line,
            column: self.column,
            offset: self.i,
        }
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.i += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn lex_while(&mut self, pred: impl Fn(char) -> bool) -> String {
        let mut out = String::new();
        while let Some(c) = self.peek() {
            if pred(c) {
                out.push(c);
                self.bump();
            } else {
                break;
            }
        }
        out
    }

    fn next_token(&mut self) -> Option<Token> {
        // Skip whitespace.
        self.lex_while(|c| c.is_whitespace());
        let start = self.position();
        let c = self.peek()?;

        let (kind, lexeme) = match c {
            '#' => {
                let lexeme = self.lex_while(|c| c != '\n');
                (TokenKind::Comment, lexeme)
            }
            '@' => {
                let lexeme = self.lex_while(|c| c != '\n');
                (TokenKind::Directive, lexeme)
            }
            '(' => {
                self.bump();
                (TokenKind::LParen, "(".to_string())
            }
            ')' => {
                self.bump();
                (TokenKind::RParen, ")".to_string())
            }
            ',' => {
                self.bump();
                (TokenKind::Seperator, ",".to_string())
            }
            '*' => {
                self.bump();
                (TokenKind::Retry, "*".to_string())
            }
            '-' if self.peek_at(1) == Some('>') => {
                self.bump();
                self.bump();
                (TokenKind::Pointer, "->".to_string())
            }
            '|' if self.peek_at(1) == Some('-') && self.peek_at(2) == Some('>') => {
                self.bump();
                self.bump();
                self.bump();
                (TokenKind::PPointer, "|->".to_string())
            }
            '|' if self.peek_at(1) == Some('|') => {
                self.bump();
                self.bump();
                (TokenKind::Parallel, "||".to_string())
            }
            c if c.is_ascii_digit() => {
                let lexeme = self.lex_while(|c| c.is_ascii_digit());
                (TokenKind::Number, lexeme)
            }
            c if c.is_alphabetic() || c == '_' => {
                let lexeme = self.lex_while(|c| c.is_alphanumeric() || c == '_');
                (TokenKind::TaskName, lexeme)
            }
            other => {
                self.bump();
                (TokenKind::Error, other.to_string())
            }
        };

        Some(Token {
            kind,
            lexeme,
            position: start,
        })
    }
}

/// Lex `src` into a flat token stream. Never fails: unmatched input becomes
/// `TokenKind::Error` tokens, and the parser reports a `SyntaxError` citing
/// the offending position the first time it encounters one.
pub fn tokenize(src: &str) -> Vec<Token> {
    let mut lexer = Lexer::new(src);
    let mut tokens = Vec::new();
    while let Some(tok) = lexer.next_token() {
        tracing::trace!(kind = ?tok.kind, lexeme = %tok.lexeme, pos = %tok.position, "lexed token");
        tokens.push(tok);
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        tokenize(src).into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn lexes_operators() {
        assert_eq!(
            kinds("a -> b |-> c || d"),
            vec![
                TokenKind::TaskName,
                TokenKind::Pointer,
                TokenKind::TaskName,
                TokenKind::PPointer,
                TokenKind::TaskName,
                TokenKind::Parallel,
                TokenKind::TaskName,
            ]
        );
    }

    #[test]
    fn lexes_retry_and_descriptor() {
        assert_eq!(
            kinds("3 |-> downloader -> 5 * parser"),
            vec![
                TokenKind::Number,
                TokenKind::PPointer,
                TokenKind::TaskName,
                TokenKind::Pointer,
                TokenKind::Number,
                TokenKind::Retry,
                TokenKind::TaskName,
            ]
        );
    }

    #[test]
    fn lexes_call_group() {
        assert_eq!(
            kinds("router(success, failure)"),
            vec![
                TokenKind::TaskName,
                TokenKind::LParen,
                TokenKind::TaskName,
                TokenKind::Seperator,
                TokenKind::TaskName,
                TokenKind::RParen,
            ]
        );
    }

    #[test]
    fn discards_comments_and_directives_but_keeps_position() {
        let tokens = tokenize("a -> b # trailing comment\n@parallel hint\nc");
        assert_eq!(
            tokens.iter().map(|t| t.kind).collect::<Vec<_>>(),
            vec![
                TokenKind::TaskName,
                TokenKind::Pointer,
                TokenKind::TaskName,
                TokenKind::Comment,
                TokenKind::Directive,
                TokenKind::TaskName,
            ]
        );
        assert!(!tokens[3].is_significant());
        assert!(!tokens[4].is_significant());
        assert_eq!(tokens[5].position.line, 3);
    }

    #[test]
    fn unmatched_character_becomes_error_token() {
        let tokens = tokenize("a -> $");
        assert_eq!(tokens.last().unwrap().kind, TokenKind::Error);
        assert_eq!(tokens.last().unwrap().lexeme, "$");
    }

    #[test]
    fn lone_pipe_is_an_error_token() {
        let tokens = tokenize("a | b");
        assert_eq!(tokens[1].kind, TokenKind::Error);
    }

    #[test]
    fn tracks_line_and_column() {
        let tokens = tokenize("a\nb");
        assert_eq!(tokens[0].position, Position { line: 1, column: 1, offset: 0 });
        assert_eq!(tokens[1].position.line, 2);
        assert_eq!(tokens[1].position.column, 1);
    }
}
