//! Token model.

use std::sync::Arc;

use strum::IntoStaticStr;

use crate::diagnostics::Position;

/// The closed set of token kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoStaticStr)]
pub enum TokenKind {
    // Punctuation tokens.
    LeftParen,
    RightParen,
    LeftBracket,
    RightBracket,
    LeftBrace,
    RightBrace,
    Bar,
    Colon,
    Backtick,
    Comma,
    Semicolon,
    Dot,
    DotDot,

    // Language keywords.
    And,
    Catch,
    Do,
    Else,
    If,
    Is,
    New,
    Not,
    Or,
    Return,
    Then,
    Till,
    Try,
    TypeOf,
    Unless,
    Until,
    Var,
    When,
    While,

    // Literal kinds.
    Byte,
    Integer16,
    Integer32,
    Integer64,
    Real32,
    Real64,
    Real128,
    Float32,
    Float64,
    Char,
    Uni,
    DynString,
    RawString,

    // Name kinds. The lexer cannot know declarations, so every name starts
    // out "unknown"; the parser promotes them against its scopes.
    UnknownAlphaName,
    UnknownPunctName,
    AlphaName,
    PunctName,

    // Markers.
    Eoi,
    Error,
    None,

    // Loanwords.
    LoanwordSyntax,
    LoanwordInclude,
}

impl TokenKind {
    /// The display name, for diagnostics.
    #[must_use]
    pub fn name(self) -> &'static str {
        self.into()
    }

    /// True for either alpha-name kind.
    #[must_use]
    pub fn is_alpha_name(self) -> bool {
        matches!(self, Self::UnknownAlphaName | Self::AlphaName)
    }

    /// True for either punctuation-name kind.
    #[must_use]
    pub fn is_punct_name(self) -> bool {
        matches!(self, Self::UnknownPunctName | Self::PunctName)
    }

    /// True for any name kind.
    #[must_use]
    pub fn is_name(self) -> bool {
        self.is_alpha_name() || self.is_punct_name()
    }
}

/// Typed payload carried by literal tokens.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TokenValue {
    None,
    Byte(u8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Real32(f32),
    Real64(f64),
    Real128(f64),
    Float32(f32),
    Float64(f64),
    Char(u8),
    Uni(char),
}

/// One lexed token.
///
/// `text` is the name or processed literal text; for `Error` tokens it is
/// the human-readable message.
#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub position: Position,
    pub value: TokenValue,
}

impl Token {
    #[must_use]
    pub fn new(kind: TokenKind, text: impl Into<String>, position: Position) -> Self {
        Self {
            kind,
            text: text.into(),
            position,
            value: TokenValue::None,
        }
    }

    /// The end-of-input marker.
    #[must_use]
    pub fn eoi(filename: Arc<str>, line: u32, column: u32) -> Self {
        Self::new(TokenKind::Eoi, "", Position::new(filename, line, column))
    }
}
