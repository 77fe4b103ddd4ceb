//! Lexer for query-option strings.
//!
//! Logos recognizes the raw tokens; [`tokenize`] then drops whitespace,
//! converts byte spans into character spans and decodes literal values so
//! malformed literals (`2024-13-45`, overflowing integers) surface as
//! `LexError`s rather than as confusing parse errors later on.

use logos::Logos;

use crate::error::LexError;
use crate::syntax::{Literal, Span};

/// Keyword operators and literals match in any ASCII case.
#[derive(Logos, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    #[regex(r"[ \t\r\n]+")]
    Whitespace,

    #[token("(")]
    OpenParen,

    #[token(")")]
    CloseParen,

    #[token(",")]
    Comma,

    #[token("/")]
    Slash,

    #[token(":")]
    Colon,

    #[token(";")]
    Semicolon,

    #[token("=")]
    Equals,

    #[token("*")]
    Star,

    #[token("-")]
    Minus,

    #[token("eq", ignore(case))]
    Eq,

    #[token("ne", ignore(case))]
    Ne,

    #[token("gt", ignore(case))]
    Gt,

    #[token("ge", ignore(case))]
    Ge,

    #[token("lt", ignore(case))]
    Lt,

    #[token("le", ignore(case))]
    Le,

    #[token("has", ignore(case))]
    Has,

    #[token("in", ignore(case))]
    In,

    #[token("and", ignore(case))]
    And,

    #[token("or", ignore(case))]
    Or,

    #[token("not", ignore(case))]
    Not,

    #[token("add", ignore(case))]
    Add,

    #[token("sub", ignore(case))]
    Sub,

    #[token("mul", ignore(case))]
    Mul,

    #[token("div", ignore(case))]
    Div,

    #[token("divby", ignore(case))]
    DivBy,

    #[token("mod", ignore(case))]
    Mod,

    #[token("true", ignore(case))]
    True,

    #[token("false", ignore(case))]
    False,

    #[token("null", ignore(case))]
    Null,

    #[regex(r"[A-Za-z_][A-Za-z0-9_]*")]
    Identifier,

    /// `Namespace.Name`, used for type casts and enum types.
    #[regex(r"[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)+")]
    QualifiedName,

    /// `$it`, `$count`, `$filter`, ...
    #[regex(r"\$[A-Za-z_][A-Za-z0-9_]*")]
    DollarName,

    #[regex(r"'(?:[^']|'')*'")]
    String,

    #[regex(r"[0-9]+")]
    Integer,

    #[regex(r"[0-9]+\.[0-9]+")]
    Decimal,

    #[regex(r"[0-9]+(?:\.[0-9]+)?[eE][+-]?[0-9]+")]
    Double,

    #[regex(r"[0-9]{4}-[0-9]{2}-[0-9]{2}")]
    Date,

    #[regex(r"[0-9]{4}-[0-9]{2}-[0-9]{2}T[0-9]{2}:[0-9]{2}(?::[0-9]{2}(?:\.[0-9]+)?)?(?:Z|[+-][0-9]{2}:[0-9]{2})")]
    DateTimeOffset,

    #[regex(r"[0-9]{2}:[0-9]{2}(?::[0-9]{2}(?:\.[0-9]+)?)?")]
    TimeOfDay,

    #[regex(r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}")]
    Guid,

    #[regex(r"duration'[^']*'")]
    Duration,

    #[regex(r"[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)+'[^']*'")]
    EnumLiteral,
}

impl TokenKind {
    /// Human-readable name used in "expected ..." lists.
    #[must_use]
    pub fn describe(self) -> &'static str {
        match self {
            TokenKind::Whitespace => "whitespace",
            TokenKind::OpenParen => "'('",
            TokenKind::CloseParen => "')'",
            TokenKind::Comma => "','",
            TokenKind::Slash => "'/'",
            TokenKind::Colon => "':'",
            TokenKind::Semicolon => "';'",
            TokenKind::Equals => "'='",
            TokenKind::Star => "'*'",
            TokenKind::Minus => "'-'",
            TokenKind::Eq => "'eq'",
            TokenKind::Ne => "'ne'",
            TokenKind::Gt => "'gt'",
            TokenKind::Ge => "'ge'",
            TokenKind::Lt => "'lt'",
            TokenKind::Le => "'le'",
            TokenKind::Has => "'has'",
            TokenKind::In => "'in'",
            TokenKind::And => "'and'",
            TokenKind::Or => "'or'",
            TokenKind::Not => "'not'",
            TokenKind::Add => "'add'",
            TokenKind::Sub => "'sub'",
            TokenKind::Mul => "'mul'",
            TokenKind::Div => "'div'",
            TokenKind::DivBy => "'divby'",
            TokenKind::Mod => "'mod'",
            TokenKind::True | TokenKind::False => "boolean",
            TokenKind::Null => "'null'",
            TokenKind::Identifier => "identifier",
            TokenKind::QualifiedName => "qualified name",
            TokenKind::DollarName => "'$' name",
            TokenKind::String => "string",
            TokenKind::Integer => "integer",
            TokenKind::Decimal => "decimal",
            TokenKind::Double => "double",
            TokenKind::Date => "date",
            TokenKind::DateTimeOffset => "datetime",
            TokenKind::TimeOfDay => "time",
            TokenKind::Guid => "guid",
            TokenKind::Duration => "duration",
            TokenKind::EnumLiteral => "enum literal",
        }
    }

    /// Keyword operators are spelled like identifiers; in member position
    /// (after `/`) they are read back as names.
    #[must_use]
    pub fn is_keyword(self) -> bool {
        matches!(
            self,
            TokenKind::Eq
                | TokenKind::Ne
                | TokenKind::Gt
                | TokenKind::Ge
                | TokenKind::Lt
                | TokenKind::Le
                | TokenKind::Has
                | TokenKind::In
                | TokenKind::And
                | TokenKind::Or
                | TokenKind::Not
                | TokenKind::Add
                | TokenKind::Sub
                | TokenKind::Mul
                | TokenKind::Div
                | TokenKind::DivBy
                | TokenKind::Mod
        )
    }

    #[must_use]
    pub fn is_number(self) -> bool {
        matches!(
            self,
            TokenKind::Integer | TokenKind::Decimal | TokenKind::Double
        )
    }

    fn literal_kind(self) -> Option<&'static str> {
        match self {
            TokenKind::Integer => Some("integer"),
            TokenKind::Decimal => Some("decimal"),
            TokenKind::Double => Some("double"),
            TokenKind::String => Some("string"),
            TokenKind::Date => Some("date"),
            TokenKind::DateTimeOffset => Some("datetime"),
            TokenKind::TimeOfDay => Some("time"),
            TokenKind::Guid => Some("guid"),
            TokenKind::Duration => Some("duration"),
            TokenKind::EnumLiteral => Some("enum"),
            _ => None,
        }
    }
}

/// A significant token: kind, character span, and decoded literal value.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
    pub literal: Option<Literal>,
    bytes: (usize, usize),
}

/// Tokens of one option string, with the source kept for slicing.
#[derive(Debug, Clone)]
pub struct TokenStream<'src> {
    source: &'src str,
    tokens: Vec<Token>,
    len_chars: usize,
}

impl<'src> TokenStream<'src> {
    #[must_use]
    pub fn source(&self) -> &'src str {
        self.source
    }

    #[must_use]
    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    /// Source text of a token. O(1) slice into source.
    #[must_use]
    pub fn text(&self, token: &Token) -> &'src str {
        &self.source[token.bytes.0..token.bytes.1]
    }

    /// Source text from the start of `first` to the end of `last`, inclusive.
    #[must_use]
    pub fn slice(&self, first: &Token, last: &Token) -> &'src str {
        &self.source[first.bytes.0..last.bytes.1.max(first.bytes.0)]
    }

    /// Character length of the source; the position reported for end of input.
    #[must_use]
    pub fn end(&self) -> usize {
        self.len_chars
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

/// Tokenizes a query-option string.
///
/// # Errors
/// Returns `LexError::UnexpectedChar` on a character outside the grammar,
/// `LexError::UnterminatedString` on a missing closing quote and
/// `LexError::InvalidLiteral` when a literal is well-formed lexically but
/// out of range.
pub fn tokenize(source: &str) -> Result<TokenStream<'_>, LexError> {
    let mut tokens: Vec<Token> = Vec::new();
    let mut lexer = TokenKind::lexer(source);
    let mut chars = CharCursor::new(source);

    while let Some(next) = lexer.next() {
        let range = lexer.span();
        let start = chars.advance_to(range.start);
        match next {
            Ok(TokenKind::Whitespace) => {}
            Ok(kind) => {
                let end = chars.advance_to(range.end);
                let (mut first, mut start) = (range.start, start);
                // `-` directly followed by a number is part of the literal.
                if kind.is_number()
                    && let Some(minus) = tokens.last()
                    && minus.kind == TokenKind::Minus
                    && minus.bytes.1 == range.start
                {
                    (first, start) = (minus.bytes.0, minus.span.start);
                    tokens.pop();
                }
                let text = &source[first..range.end];
                let literal = decode_literal(kind, text, start)?;
                tokens.push(Token {
                    kind,
                    span: Span::new(start, end),
                    literal,
                    bytes: (first, range.end),
                });
            }
            Err(()) => {
                let unexpected = source[range.start..].chars().next().unwrap_or('\0');
                return Err(if unexpected == '\'' {
                    LexError::UnterminatedString { position: start }
                } else {
                    LexError::UnexpectedChar {
                        position: start,
                        unexpected,
                    }
                });
            }
        }
    }

    let len_chars = chars.advance_to(source.len());
    Ok(TokenStream {
        source,
        tokens,
        len_chars,
    })
}

fn decode_literal(
    kind: TokenKind,
    text: &str,
    position: usize,
) -> Result<Option<Literal>, LexError> {
    let decoded = match kind {
        TokenKind::True => return Ok(Some(Literal::Boolean(true))),
        TokenKind::False => return Ok(Some(Literal::Boolean(false))),
        TokenKind::Null => return Ok(Some(Literal::Null)),
        TokenKind::Integer => Literal::integer(text),
        TokenKind::Decimal => Literal::decimal(text),
        TokenKind::Double => Literal::double(text),
        TokenKind::String => Literal::string(text),
        TokenKind::Date => Literal::date(text),
        TokenKind::DateTimeOffset => Literal::date_time_offset(text),
        TokenKind::TimeOfDay => Literal::time_of_day(text),
        TokenKind::Guid => Literal::guid(text),
        TokenKind::Duration => Literal::duration(text),
        TokenKind::EnumLiteral => Literal::enumeration(text),
        _ => return Ok(None),
    };

    match (decoded, kind.literal_kind()) {
        (Some(lit), _) => Ok(Some(lit)),
        (None, Some(kind)) => Err(LexError::InvalidLiteral {
            position,
            kind,
            text: text.to_owned(),
        }),
        (None, None) => Ok(None),
    }
}

/// Converts increasing byte offsets into character offsets in one pass.
struct CharCursor<'src> {
    source: &'src str,
    byte: usize,
    chars: usize,
}

impl<'src> CharCursor<'src> {
    fn new(source: &'src str) -> Self {
        Self {
            source,
            byte: 0,
            chars: 0,
        }
    }

    fn advance_to(&mut self, byte: usize) -> usize {
        if byte > self.byte {
            self.chars += self.source[self.byte..byte].chars().count();
            self.byte = byte;
        }
        self.chars
    }
}
