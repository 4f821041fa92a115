//! Lexer for BSQ
//!
//! The lexer converts source code into a stream of tokens.
//! It uses the `logos` crate for the scanning automaton.

use crate::span::Span;
use crate::token::{Token, TokenKind};
use logos::Logos;
use thiserror::Error;

/// Lexer errors
///
/// Unreadable characters are recorded here and skipped; the parser then
/// reports the mismatch it runs into on the degenerate stream.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LexerError {
    #[error("unreadable character at byte {0}")]
    UnexpectedChar(usize),
}

/// The lexer for BSQ
pub struct Lexer<'src> {
    source: &'src str,
    inner: logos::Lexer<'src, TokenKind>,
    peeked: Option<Token>,
    errors: Vec<LexerError>,
}

impl<'src> Lexer<'src> {
    /// Create a new lexer for the given source code
    pub fn new(source: &'src str) -> Self {
        Self {
            source,
            inner: TokenKind::lexer(source),
            peeked: None,
            errors: Vec::new(),
        }
    }

    /// Get the source code
    pub fn source(&self) -> &'src str {
        self.source
    }

    /// Get any errors that occurred during lexing
    pub fn errors(&self) -> &[LexerError] {
        &self.errors
    }

    /// Peek at the next token without consuming it
    pub fn peek(&mut self) -> &Token {
        if self.peeked.is_none() {
            self.peeked = Some(self.read_token());
        }
        self.peeked.as_ref().unwrap()
    }

    /// Get the next token; the stream ends with an endless run of `Eof`
    pub fn next_token(&mut self) -> Token {
        if let Some(token) = self.peeked.take() {
            return token;
        }
        self.read_token()
    }

    fn read_token(&mut self) -> Token {
        loop {
            match self.inner.next() {
                Some(Ok(kind)) => {
                    let span = self.inner.span();
                    return Token::new(kind, Span::new(span.start, span.end));
                }
                Some(Err(())) => {
                    // Skip the character and remember that we did
                    let span = self.inner.span();
                    self.errors.push(LexerError::UnexpectedChar(span.start));
                    continue;
                }
                None => {
                    let pos = self.source.len();
                    return Token::new(TokenKind::Eof, Span::new(pos, pos));
                }
            }
        }
    }

    /// Collect all tokens into a vector (including the trailing `Eof`)
    pub fn tokenize(mut self) -> (Vec<Token>, Vec<LexerError>) {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token();
            let done = token.kind == TokenKind::Eof;
            tokens.push(token);
            if done {
                break;
            }
        }
        (tokens, self.errors)
    }
}

/// Helper function to lex source code
pub fn lex(source: &str) -> (Vec<Token>, Vec<LexerError>) {
    Lexer::new(source).tokenize()
}
