//! Token definitions

use crate::hir::SourcePos;

/// A token with its starting position
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub pos: SourcePos,
}

impl Token {
    pub fn new(kind: TokenKind, pos: SourcePos) -> Self {
        Self { kind, pos }
    }
}

/// Token types for Python lexer
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // Literals
    /// Integer literal; `text` keeps the source spelling (`0xff`, `1_000`)
    Int { value: i64, text: String },
    Float { value: f64, text: String },
    /// String literal body as written between the quotes (escapes undecoded)
    Str { body: String, prefix: StrPrefix },

    // Identifiers and keywords
    Name(String),
    Keyword(Keyword),

    // Operators
    Operator(Operator),

    // Delimiters
    Delimiter(Delimiter),

    // Indentation
    Indent,
    Dedent,
    Newline,

    // End of file
    Eof,
}

/// String literal prefix flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StrPrefix {
    pub raw: bool,
    pub bytes: bool,
    pub format: bool,
}

impl StrPrefix {
    /// Parse a prefix such as `rb` or `F`; `None` if it is not a string prefix
    pub fn parse(text: &str) -> Option<Self> {
        let mut prefix = StrPrefix::default();
        if text.len() > 2 {
            return None;
        }
        for c in text.chars() {
            match c.to_ascii_lowercase() {
                'r' if !prefix.raw => prefix.raw = true,
                'b' if !prefix.bytes && !prefix.format => prefix.bytes = true,
                'f' if !prefix.format && !prefix.bytes => prefix.format = true,
                'u' if text.len() == 1 => {}
                _ => return None,
            }
        }
        Some(prefix)
    }
}

/// Python keywords
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    False,
    None,
    True,
    And,
    As,
    Assert,
    Async,
    Await,
    Break,
    Class,
    Continue,
    Def,
    Del,
    Elif,
    Else,
    Except,
    Finally,
    For,
    From,
    Global,
    If,
    Import,
    In,
    Is,
    Lambda,
    Nonlocal,
    Not,
    Or,
    Pass,
    Raise,
    Return,
    Try,
    While,
    With,
    Yield,
}

impl Keyword {
    pub fn from_ident(ident: &str) -> Option<Self> {
        let kw = match ident {
            "False" => Keyword::False,
            "None" => Keyword::None,
            "True" => Keyword::True,
            "and" => Keyword::And,
            "as" => Keyword::As,
            "assert" => Keyword::Assert,
            "async" => Keyword::Async,
            "await" => Keyword::Await,
            "break" => Keyword::Break,
            "class" => Keyword::Class,
            "continue" => Keyword::Continue,
            "def" => Keyword::Def,
            "del" => Keyword::Del,
            "elif" => Keyword::Elif,
            "else" => Keyword::Else,
            "except" => Keyword::Except,
            "finally" => Keyword::Finally,
            "for" => Keyword::For,
            "from" => Keyword::From,
            "global" => Keyword::Global,
            "if" => Keyword::If,
            "import" => Keyword::Import,
            "in" => Keyword::In,
            "is" => Keyword::Is,
            "lambda" => Keyword::Lambda,
            "nonlocal" => Keyword::Nonlocal,
            "not" => Keyword::Not,
            "or" => Keyword::Or,
            "pass" => Keyword::Pass,
            "raise" => Keyword::Raise,
            "return" => Keyword::Return,
            "try" => Keyword::Try,
            "while" => Keyword::While,
            "with" => Keyword::With,
            "yield" => Keyword::Yield,
            _ => return None,
        };
        Some(kw)
    }
}

/// Operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    // Arithmetic
    Plus,
    Minus,
    Star,
    Slash,
    DoubleSlash,
    Percent,
    DoubleStar,
    At,

    // Bitwise
    Amp,
    Pipe,
    Caret,
    Tilde,
    LShift,
    RShift,

    // Comparison
    Eq,
    NotEq,
    Lt,
    Gt,
    LtEq,
    GtEq,

    // Assignment
    Assign,
    PlusAssign,
    MinusAssign,
    StarAssign,
    SlashAssign,
    DoubleSlashAssign,
    PercentAssign,
    DoubleStarAssign,
    AmpAssign,
    PipeAssign,
    CaretAssign,
    LShiftAssign,
    RShiftAssign,
    AtAssign,
    Walrus, // :=

    // Other
    Arrow, // ->
    Colon,
}

/// Delimiters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delimiter {
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Dot,
    Semicolon,
    Ellipsis,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyword_lookup() {
        assert_eq!(Keyword::from_ident("def"), Some(Keyword::Def));
        assert_eq!(Keyword::from_ident("match"), None);
        assert_eq!(Keyword::from_ident("None"), Some(Keyword::None));
    }

    #[test]
    fn test_str_prefix() {
        let p = StrPrefix::parse("rb").unwrap();
        assert!(p.raw && p.bytes && !p.format);
        assert!(StrPrefix::parse("F").unwrap().format);
        assert!(StrPrefix::parse("bf").is_none());
        assert!(StrPrefix::parse("xyz").is_none());
    }
}
