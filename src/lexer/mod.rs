//! Lexer module - Tokenization
//!
//! Python のソースをトークン列に変換する。
//! インデントは INDENT / DEDENT トークンとして表現し、括弧内の改行は無視する。

mod token;

pub use token::*;

use crate::error::{DepylerError, Result};
use crate::hir::SourcePos;

const OPERATORS: &[(&str, Operator)] = &[
    ("**=", Operator::DoubleStarAssign),
    ("//=", Operator::DoubleSlashAssign),
    (">>=", Operator::RShiftAssign),
    ("<<=", Operator::LShiftAssign),
    ("->", Operator::Arrow),
    (":=", Operator::Walrus),
    ("**", Operator::DoubleStar),
    ("//", Operator::DoubleSlash),
    ("==", Operator::Eq),
    ("!=", Operator::NotEq),
    ("<=", Operator::LtEq),
    (">=", Operator::GtEq),
    ("<<", Operator::LShift),
    (">>", Operator::RShift),
    ("+=", Operator::PlusAssign),
    ("-=", Operator::MinusAssign),
    ("*=", Operator::StarAssign),
    ("/=", Operator::SlashAssign),
    ("%=", Operator::PercentAssign),
    ("&=", Operator::AmpAssign),
    ("|=", Operator::PipeAssign),
    ("^=", Operator::CaretAssign),
    ("@=", Operator::AtAssign),
    ("+", Operator::Plus),
    ("-", Operator::Minus),
    ("*", Operator::Star),
    ("/", Operator::Slash),
    ("%", Operator::Percent),
    ("@", Operator::At),
    ("&", Operator::Amp),
    ("|", Operator::Pipe),
    ("^", Operator::Caret),
    ("~", Operator::Tilde),
    ("<", Operator::Lt),
    (">", Operator::Gt),
    ("=", Operator::Assign),
    (":", Operator::Colon),
];

/// Tokenize Python source code
pub fn tokenize(source: &str) -> Result<Vec<Token>> {
    Lexer::new(source).run()
}

struct Lexer {
    chars: Vec<char>,
    idx: usize,
    line: usize,
    col: usize,
    indents: Vec<usize>,
    depth: usize,
    at_line_start: bool,
    tokens: Vec<Token>,
}

impl Lexer {
    fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            idx: 0,
            line: 1,
            col: 1,
            indents: vec![0],
            depth: 0,
            at_line_start: true,
            tokens: Vec::new(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.idx).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.idx + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.idx += 1;
        if c == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(c)
    }

    fn pos(&self) -> SourcePos {
        SourcePos::new(self.line, self.col)
    }

    fn push(&mut self, kind: TokenKind, pos: SourcePos) {
        self.tokens.push(Token::new(kind, pos));
    }

    fn run(mut self) -> Result<Vec<Token>> {
        loop {
            if self.at_line_start && self.depth == 0 {
                if !self.read_indentation()? {
                    break;
                }
                continue;
            }
            let Some(c) = self.peek() else { break };
            match c {
                ' ' | '\t' | '\x0c' | '\r' => {
                    self.bump();
                }
                '\n' => {
                    let pos = self.pos();
                    self.bump();
                    if self.depth == 0 {
                        self.push(TokenKind::Newline, pos);
                        self.at_line_start = true;
                    }
                }
                '#' => self.skip_comment(),
                '\\' => {
                    let pos = self.pos();
                    self.bump();
                    if self.peek() == Some('\r') {
                        self.bump();
                    }
                    if self.bump() != Some('\n') {
                        return Err(DepylerError::parse(pos, "unexpected character after line continuation"));
                    }
                }
                '"' | '\'' => self.read_string(StrPrefix::default(), self.pos())?,
                c if c.is_ascii_digit() => self.read_number()?,
                '.' if self.peek_at(1).is_some_and(|d| d.is_ascii_digit()) => self.read_number()?,
                c if c.is_alphabetic() || c == '_' => self.read_name()?,
                _ => self.read_operator()?,
            }
        }

        let pos = self.pos();
        if !matches!(
            self.tokens.last().map(|t| &t.kind),
            None | Some(TokenKind::Newline) | Some(TokenKind::Dedent)
        ) {
            self.push(TokenKind::Newline, pos);
        }
        while self.indents.len() > 1 {
            self.indents.pop();
            self.push(TokenKind::Dedent, pos);
        }
        self.push(TokenKind::Eof, pos);
        Ok(self.tokens)
    }

    /// Measure indentation of a logical line. Returns false at end of input.
    fn read_indentation(&mut self) -> Result<bool> {
        let mut width = 0usize;
        loop {
            match self.peek() {
                Some(' ') => width += 1,
                Some('\t') => width = (width / 8 + 1) * 8,
                Some('\x0c') => width = 0,
                _ => break,
            }
            self.bump();
        }
        match self.peek() {
            None => return Ok(false),
            Some('\n') | Some('\r') => {
                self.bump();
                return Ok(true);
            }
            Some('#') => {
                self.skip_comment();
                return Ok(true);
            }
            _ => {}
        }

        let pos = self.pos();
        let current = self.indents.last().copied().unwrap_or(0);
        if width > current {
            self.indents.push(width);
            self.push(TokenKind::Indent, pos);
        } else if width < current {
            while self.indents.last().is_some_and(|&w| w > width) {
                self.indents.pop();
                self.push(TokenKind::Dedent, pos);
            }
            if self.indents.last().copied() != Some(width) {
                return Err(DepylerError::parse(pos, "unindent does not match any outer indentation level"));
            }
        }
        self.at_line_start = false;
        Ok(true)
    }

    fn skip_comment(&mut self) {
        while let Some(c) = self.peek() {
            if c == '\n' {
                break;
            }
            self.bump();
        }
    }

    fn read_name(&mut self) -> Result<()> {
        let pos = self.pos();
        let mut ident = String::new();
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' {
                ident.push(c);
                self.bump();
            } else {
                break;
            }
        }
        if matches!(self.peek(), Some('"') | Some('\'')) {
            if let Some(prefix) = StrPrefix::parse(&ident) {
                return self.read_string(prefix, pos);
            }
        }
        let kind = match Keyword::from_ident(&ident) {
            Some(kw) => TokenKind::Keyword(kw),
            None => TokenKind::Name(ident),
        };
        self.push(kind, pos);
        Ok(())
    }

    fn read_string(&mut self, prefix: StrPrefix, pos: SourcePos) -> Result<()> {
        let quote = self.bump().unwrap_or('"');
        let triple = self.peek() == Some(quote) && self.peek_at(1) == Some(quote);
        if triple {
            self.bump();
            self.bump();
        }
        let mut body = String::new();
        loop {
            let Some(c) = self.bump() else {
                return Err(DepylerError::parse(pos, "unterminated string literal"));
            };
            match c {
                '\\' => {
                    // バックスラッシュと次の文字はそのまま保持する (デコードは parser 側)
                    body.push('\\');
                    match self.bump() {
                        Some(next) => body.push(next),
                        None => return Err(DepylerError::parse(pos, "unterminated string literal")),
                    }
                }
                '\n' if !triple => {
                    return Err(DepylerError::parse(pos, "unterminated string literal"));
                }
                c if c == quote => {
                    if !triple {
                        break;
                    }
                    if self.peek() == Some(quote) && self.peek_at(1) == Some(quote) {
                        self.bump();
                        self.bump();
                        break;
                    }
                    body.push(c);
                }
                c => body.push(c),
            }
        }
        self.push(TokenKind::Str { body, prefix }, pos);
        Ok(())
    }

    fn read_number(&mut self) -> Result<()> {
        let pos = self.pos();
        let mut text = String::new();

        if self.peek() == Some('0') {
            let radix = match self.peek_at(1).map(|c| c.to_ascii_lowercase()) {
                Some('x') => Some(16),
                Some('o') => Some(8),
                Some('b') => Some(2),
                _ => None,
            };
            if let Some(radix) = radix {
                text.push(self.bump().unwrap_or('0'));
                text.push(self.bump().unwrap_or('x'));
                let mut digits = String::new();
                while let Some(c) = self.peek() {
                    if c.is_digit(radix) {
                        digits.push(c);
                    } else if c != '_' {
                        break;
                    }
                    text.push(c);
                    self.bump();
                }
                let value = i64::from_str_radix(&digits, radix)
                    .map_err(|_| DepylerError::parse(pos, format!("invalid integer literal '{text}'")))?;
                self.push(TokenKind::Int { value, text }, pos);
                return Ok(());
            }
        }

        let mut is_float = false;
        self.read_digits(&mut text);
        if self.peek() == Some('.') && !self.peek_at(1).is_some_and(|c| c.is_alphabetic() || c == '_') {
            is_float = true;
            text.push('.');
            self.bump();
            self.read_digits(&mut text);
        }
        if matches!(self.peek(), Some('e') | Some('E')) {
            let sign = self.peek_at(1);
            let has_exp = match sign {
                Some('+') | Some('-') => self.peek_at(2).is_some_and(|c| c.is_ascii_digit()),
                Some(c) => c.is_ascii_digit(),
                None => false,
            };
            if has_exp {
                is_float = true;
                text.push('e');
                self.bump();
                if matches!(self.peek(), Some('+') | Some('-')) {
                    text.push(self.bump().unwrap_or('+'));
                }
                self.read_digits(&mut text);
            }
        }
        if matches!(self.peek(), Some('j') | Some('J')) {
            return Err(DepylerError::unsupported(pos, "complex number literals"));
        }

        let clean: String = text.chars().filter(|&c| c != '_').collect();
        if is_float {
            let value = clean
                .parse::<f64>()
                .map_err(|_| DepylerError::parse(pos, format!("invalid float literal '{text}'")))?;
            self.push(TokenKind::Float { value, text }, pos);
        } else {
            let value = clean
                .parse::<i64>()
                .map_err(|_| DepylerError::parse(pos, format!("integer literal '{text}' does not fit in 64 bits")))?;
            self.push(TokenKind::Int { value, text }, pos);
        }
        Ok(())
    }

    fn read_digits(&mut self, text: &mut String) {
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() || c == '_' {
                text.push(c);
                self.bump();
            } else {
                break;
            }
        }
    }

    fn read_operator(&mut self) -> Result<()> {
        let pos = self.pos();
        let c = self.peek().unwrap_or(' ');
        let delim = match c {
            '(' => Some(Delimiter::LParen),
            ')' => Some(Delimiter::RParen),
            '[' => Some(Delimiter::LBracket),
            ']' => Some(Delimiter::RBracket),
            '{' => Some(Delimiter::LBrace),
            '}' => Some(Delimiter::RBrace),
            ',' => Some(Delimiter::Comma),
            ';' => Some(Delimiter::Semicolon),
            '.' if self.peek_at(1) == Some('.') && self.peek_at(2) == Some('.') => Some(Delimiter::Ellipsis),
            '.' => Some(Delimiter::Dot),
            _ => None,
        };
        if let Some(delim) = delim {
            match delim {
                Delimiter::LParen | Delimiter::LBracket | Delimiter::LBrace => self.depth += 1,
                Delimiter::RParen | Delimiter::RBracket | Delimiter::RBrace => {
                    self.depth = self.depth.saturating_sub(1)
                }
                _ => {}
            }
            let width = if delim == Delimiter::Ellipsis { 3 } else { 1 };
            for _ in 0..width {
                self.bump();
            }
            self.push(TokenKind::Delimiter(delim), pos);
            return Ok(());
        }

        for (text, op) in OPERATORS {
            let matches = text
                .chars()
                .enumerate()
                .all(|(i, expected)| self.peek_at(i) == Some(expected));
            if matches {
                for _ in 0..text.len() {
                    self.bump();
                }
                self.push(TokenKind::Operator(*op), pos);
                return Ok(());
            }
        }
        Err(DepylerError::parse(pos, format!("unexpected character '{c}'")))
    }
}

/// Decode the escape sequences of a non-raw string body
pub fn decode_escapes(body: &str) -> String {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        let Some(next) = chars.next() else {
            out.push('\\');
            break;
        };
        match next {
            '\n' => {}
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            '0'..='7' => {
                let mut code = next.to_digit(8).unwrap_or(0);
                for _ in 0..2 {
                    match chars.peek().and_then(|d| d.to_digit(8)) {
                        Some(d) => {
                            code = code * 8 + d;
                            chars.next();
                        }
                        None => break,
                    }
                }
                out.push(char::from_u32(code).unwrap_or('\u{fffd}'));
            }
            'x' | 'u' | 'U' => {
                let len = match next {
                    'x' => 2,
                    'u' => 4,
                    _ => 8,
                };
                let hex: String = (0..len).filter_map(|_| chars.next()).collect();
                match u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                    Some(ch) => out.push(ch),
                    None => {
                        out.push('\\');
                        out.push(next);
                        out.push_str(&hex);
                    }
                }
            }
            'a' => out.push('\x07'),
            'b' => out.push('\x08'),
            'f' => out.push('\x0c'),
            'v' => out.push('\x0b'),
            '\\' | '\'' | '"' => out.push(next),
            other => {
                out.push('\\');
                out.push(other);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        tokenize(src).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_tokenize_empty() {
        assert_eq!(kinds(""), vec![TokenKind::Eof]);
    }

    #[test]
    fn test_indent_dedent() {
        let toks = kinds("def f():\n    return 1\nx = 2\n");
        assert!(toks.contains(&TokenKind::Indent));
        assert!(toks.contains(&TokenKind::Dedent));
        let indent = toks.iter().position(|t| *t == TokenKind::Indent).unwrap();
        let dedent = toks.iter().position(|t| *t == TokenKind::Dedent).unwrap();
        assert!(indent < dedent);
    }

    #[test]
    fn test_brackets_join_lines() {
        let toks = kinds("x = [1,\n     2]\n");
        let newlines = toks.iter().filter(|t| **t == TokenKind::Newline).count();
        assert_eq!(newlines, 1);
        assert!(!toks.contains(&TokenKind::Indent));
    }

    #[test]
    fn test_number_bases_keep_text() {
        let toks = kinds("0xff 1_000 0b101 2.5e3");
        assert_eq!(
            toks[0],
            TokenKind::Int {
                value: 255,
                text: "0xff".to_string()
            }
        );
        assert_eq!(
            toks[1],
            TokenKind::Int {
                value: 1000,
                text: "1_000".to_string()
            }
        );
        assert!(matches!(toks[2], TokenKind::Int { value: 5, .. }));
        assert!(matches!(toks[3], TokenKind::Float { value, .. } if value == 2500.0));
    }

    #[test]
    fn test_string_prefixes() {
        let toks = kinds(r#"r"\d+" f'{x}' b"ab""#);
        assert!(matches!(&toks[0], TokenKind::Str { body, prefix } if body == "\\d+" && prefix.raw));
        assert!(matches!(&toks[1], TokenKind::Str { prefix, .. } if prefix.format));
        assert!(matches!(&toks[2], TokenKind::Str { prefix, .. } if prefix.bytes));
    }

    #[test]
    fn test_triple_quoted_string() {
        let toks = kinds("s = \"\"\"a\nb\"\"\"\n");
        assert!(matches!(&toks[2], TokenKind::Str { body, .. } if body == "a\nb"));
    }

    #[test]
    fn test_comments_and_blank_lines_skipped() {
        let toks = kinds("# header\n\nx = 1  # trailing\n\n");
        assert_eq!(toks[0], TokenKind::Name("x".to_string()));
        assert_eq!(toks.iter().filter(|t| **t == TokenKind::Newline).count(), 1);
    }

    #[test]
    fn test_operators_longest_match() {
        let toks = kinds("a //= b ** c -> d := e");
        assert_eq!(toks[1], TokenKind::Operator(Operator::DoubleSlashAssign));
        assert_eq!(toks[3], TokenKind::Operator(Operator::DoubleStar));
        assert_eq!(toks[5], TokenKind::Operator(Operator::Arrow));
        assert_eq!(toks[7], TokenKind::Operator(Operator::Walrus));
    }

    #[test]
    fn test_bad_dedent_is_error() {
        let err = tokenize("if x:\n        y = 1\n    z = 2\n").unwrap_err();
        assert!(matches!(err, DepylerError::ParseError { .. }));
    }

    #[test]
    fn test_decode_escapes() {
        assert_eq!(decode_escapes(r"a\nb\t\\"), "a\nb\t\\");
        assert_eq!(decode_escapes(r"\x41\u00e9"), "Aé");
        assert_eq!(decode_escapes(r"\d"), "\\d");
    }
}
