//! Token definitions for BSQ
//!
//! This module defines all the tokens that the lexer can produce.

use crate::span::Span;
use logos::Logos;
use std::fmt;

/// A token produced by the lexer
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

impl Token {
    pub fn new(kind: TokenKind, span: Span) -> Self {
        Self { kind, span }
    }

    /// Get the text of this token from source
    pub fn text<'a>(&self, source: &'a str) -> &'a str {
        self.span.text(source)
    }
}

/// All possible token types in BSQ
///
/// Spaces, tabs and carriage returns between lexemes are discarded, as are
/// `'` line comments. Newlines terminate statements and are significant.
#[derive(Logos, Debug, Clone, Copy, PartialEq, Eq)]
#[logos(skip r"[ \t\r\f]+")] // Skip whitespace, but not newlines
#[logos(skip r"'[^\n]*")] // Skip line comments up to the newline
pub enum TokenKind {
    // ============ Literals ============
    /// Number literal: 42, 3.14, 12. (no sign, no exponent)
    #[regex(r"[0-9]+(\.[0-9]*)?")]
    Number,

    /// Text literal: "hello" (no escape processing)
    #[regex(r#""[^"]*""#)]
    Text,

    /// Boolean literals
    #[token("TRUE")]
    True,
    #[token("FALSE")]
    False,

    // ============ Keywords ============
    #[token("SUB")]
    Sub,
    #[token("LET")]
    Let,
    #[token("DIM")]
    Dim,
    #[token("PRINT")]
    Print,
    #[token("INPUT")]
    Input,
    #[token("IF")]
    If,
    #[token("THEN")]
    Then,
    #[token("ELSEIF")]
    ElseIf,
    #[token("ELSE")]
    Else,
    #[token("WHILE")]
    While,
    #[token("FOR")]
    For,
    #[token("TO")]
    To,
    #[token("STEP")]
    Step,
    #[token("CALL")]
    Call,
    #[token("END")]
    End,

    // ============ Operators ============
    #[token("=")]
    Eq,
    #[token("<>")]
    Ne,
    #[token("<")]
    Lt,
    #[token("<=")]
    Le,
    #[token(">")]
    Gt,
    #[token(">=")]
    Ge,

    #[token("+")]
    Add,
    #[token("-")]
    Minus,
    #[token("&")]
    Amp,
    #[token("OR")]
    Or,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("MOD")]
    #[token("\\")]
    Mod,
    #[token("AND")]
    And,
    #[token("^")]
    Caret,
    #[token("NOT")]
    Not,

    // ============ Punctuation ============
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token(",")]
    Comma,

    /// Statement terminator
    #[token("\n")]
    Newline,

    // ============ Identifiers ============
    /// Identifier: one leading alphabetic, alphanumerics, optional sigil
    #[regex(r"[A-Za-z][A-Za-z0-9]*[$?]?")]
    Ident,

    // ============ Special ============
    /// End of file
    Eof,
}

impl TokenKind {
    /// Tokens that can begin an expression
    pub fn starts_expression(&self) -> bool {
        matches!(
            self,
            TokenKind::True
                | TokenKind::False
                | TokenKind::Number
                | TokenKind::Text
                | TokenKind::Ident
                | TokenKind::Minus
                | TokenKind::Not
                | TokenKind::LParen
        )
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TokenKind::Number => "NUMBER",
            TokenKind::Text => "TEXT",
            TokenKind::True => "TRUE",
            TokenKind::False => "FALSE",
            TokenKind::Sub => "SUB",
            TokenKind::Let => "LET",
            TokenKind::Dim => "DIM",
            TokenKind::Print => "PRINT",
            TokenKind::Input => "INPUT",
            TokenKind::If => "IF",
            TokenKind::Then => "THEN",
            TokenKind::ElseIf => "ELSEIF",
            TokenKind::Else => "ELSE",
            TokenKind::While => "WHILE",
            TokenKind::For => "FOR",
            TokenKind::To => "TO",
            TokenKind::Step => "STEP",
            TokenKind::Call => "CALL",
            TokenKind::End => "END",
            TokenKind::Eq => "=",
            TokenKind::Ne => "<>",
            TokenKind::Lt => "<",
            TokenKind::Le => "<=",
            TokenKind::Gt => ">",
            TokenKind::Ge => ">=",
            TokenKind::Add => "+",
            TokenKind::Minus => "-",
            TokenKind::Amp => "&",
            TokenKind::Or => "OR",
            TokenKind::Star => "*",
            TokenKind::Slash => "/",
            TokenKind::Mod => "MOD",
            TokenKind::And => "AND",
            TokenKind::Caret => "^",
            TokenKind::Not => "NOT",
            TokenKind::LParen => "(",
            TokenKind::RParen => ")",
            TokenKind::Comma => ",",
            TokenKind::Newline => "new line",
            TokenKind::Ident => "IDENT",
            TokenKind::Eof => "end of file",
        };
        write!(f, "{}", s)
    }
}
