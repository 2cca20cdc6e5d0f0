//! Emitted values
//!
//! 式のコード片と、その値が所有か借用か。引数位置に合わせて
//! `.clone()` / `&` / `.to_string()` を付け外しするのはここだけ。

use crate::semantic::Type;

/// How an emitted expression holds its value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Form {
    /// 一時値 (ムーブしてよい)
    Owned,
    /// 名前付きの場所 (変数、フィールド、添字)
    Place,
    /// `&T` (`&str` / `&[T]` を含む)
    Borrowed,
    BorrowedMut,
    /// `"..."` 文字列リテラル
    Literal,
    /// 遅延イテレータ (所有要素)
    Iter,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Value {
    pub code: String,
    pub ty: Type,
    pub form: Form,
}

impl Value {
    pub fn new(code: impl Into<String>, ty: Type, form: Form) -> Self {
        Self {
            code: code.into(),
            ty,
            form,
        }
    }

    pub fn owned(code: impl Into<String>, ty: Type) -> Self {
        Self::new(code, ty, Form::Owned)
    }

    pub fn unit(code: impl Into<String>) -> Self {
        Self::new(code, Type::None, Form::Owned)
    }

    pub fn is_borrowed(&self) -> bool {
        matches!(self.form, Form::Borrowed | Form::BorrowedMut)
    }

    /// Code safe to use as a method receiver or operand
    pub fn atom(&self) -> String {
        parenthesize(&self.code)
    }

    /// `atom` for a method receiver: numeric literals get their type suffix
    pub fn receiver(&self) -> String {
        method_receiver(&self.code, &self.ty)
    }

    /// Owned, movable expression of the value's type
    pub fn into_owned(&self) -> String {
        match self.form {
            Form::Owned => self.code.clone(),
            Form::Literal => format!("{}.to_string()", self.code),
            Form::Iter => format!("{}.collect::<Vec<_>>()", self.atom()),
            Form::Place if self.ty.is_copy() => self.code.clone(),
            Form::Place => format!("{}.clone()", self.atom()),
            Form::Borrowed | Form::BorrowedMut => match &self.ty {
                t if t.is_copy() => format!("*{}", self.atom()),
                Type::Str => format!("{}.to_string()", self.atom()),
                Type::List(_) | Type::Bytes => format!("{}.to_vec()", self.atom()),
                _ => format!("{}.clone()", self.atom()),
            },
        }
    }

    /// Copy types read by value (`*x` for `&i64`)
    pub fn scalar(&self) -> String {
        match self.form {
            Form::Borrowed | Form::BorrowedMut if self.ty.is_copy() => {
                format!("(*{})", self.atom())
            }
            _ => self.code.clone(),
        }
    }

    /// `&str` argument
    pub fn as_str_ref(&self) -> String {
        match self.form {
            Form::Literal | Form::Borrowed | Form::BorrowedMut => self.code.clone(),
            Form::Iter => format!("&{}.collect::<String>()", self.atom()),
            Form::Place | Form::Owned => format!("&{}", self.atom()),
        }
    }

    /// `&T` argument
    pub fn as_ref(&self) -> String {
        match self.form {
            Form::Literal | Form::Borrowed | Form::BorrowedMut => self.code.clone(),
            Form::Iter => format!("&{}.collect::<Vec<_>>()", self.atom()),
            Form::Place | Form::Owned => format!("&{}", self.atom()),
        }
    }

    /// `&mut T` argument
    pub fn as_mut_ref(&self) -> String {
        match self.form {
            Form::BorrowedMut | Form::Borrowed | Form::Literal => self.code.clone(),
            Form::Iter => format!("&mut {}.collect::<Vec<_>>()", self.atom()),
            Form::Place | Form::Owned => format!("&mut {}", self.atom()),
        }
    }

    /// Map lookup key (`d.get(k)`)
    pub fn as_key(&self) -> String {
        match self.ty {
            Type::Str => self.as_str_ref(),
            _ => self.as_ref(),
        }
    }

    pub fn as_f64(&self) -> String {
        match (&self.ty, self.form) {
            (Type::Float, _) => self.scalar(),
            (Type::Int, Form::Owned) if is_int_literal(&self.code) => float_literal(&self.code),
            (Type::Int, _) | (Type::Bool, _) => format!("({} as f64)", parenthesize(&self.scalar())),
            _ => self.scalar(),
        }
    }

    pub fn as_i64(&self) -> String {
        match &self.ty {
            Type::Float | Type::Bool => format!("({} as i64)", parenthesize(&self.scalar())),
            _ => self.scalar(),
        }
    }

    pub fn as_usize(&self) -> String {
        if is_int_literal(&self.code) && !self.code.starts_with('-') {
            return self.code.clone();
        }
        format!("({} as usize)", parenthesize(&self.scalar()))
    }

    /// Iterator over owned elements
    pub fn iter_owned(&self) -> String {
        if self.form == Form::Iter {
            return self.code.clone();
        }
        let recv = self.atom();
        match self.ty.unwrap_optional() {
            Type::Str => format!("{recv}.chars().map(|_c| _c.to_string())"),
            Type::Bytes => format!("{recv}.iter().map(|_b| *_b as i64)"),
            Type::Dict(_, _) if self.form == Form::Owned => format!("{recv}.into_keys()"),
            Type::Dict(_, _) => format!("{recv}.keys().cloned()"),
            Type::Native(n) if n == "io.File" => format!(
                "std::io::BufRead::lines(std::io::BufReader::new(&{recv})).map(|_l| _l.unwrap_or_default())"
            ),
            Type::Native(n) if n == "json.Value" => format!(
                "{recv}.as_array().cloned().unwrap_or_default().into_iter()"
            ),
            _ if self.form == Form::Owned => format!("{recv}.into_iter()"),
            _ => format!("{recv}.iter().cloned()"),
        }
    }
}

/// Wrap `code` in parentheses unless it is already a single operand
pub fn parenthesize(code: &str) -> String {
    if needs_parens(code) {
        format!("({code})")
    } else {
        code.to_string()
    }
}

/// 括弧・文字列の外に演算子や空白があるか
pub fn needs_parens(code: &str) -> bool {
    let trimmed = code.trim();
    if trimmed.is_empty() {
        return false;
    }
    // `{ ... }` ブロック式はそのままでオペランドになる
    if is_wrapped(trimmed, '{', '}') || is_wrapped(trimmed, '(', ')') {
        return false;
    }
    let mut depth = 0i32;
    let mut in_str = false;
    let mut escaped = false;
    let mut prev = ' ';
    for (i, c) in trimmed.char_indices() {
        if in_str {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_str = false;
            }
            prev = c;
            continue;
        }
        match c {
            '"' => in_str = true,
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth -= 1,
            // `vec![..]` / `format!(..)` のマクロ呼び出し
            '!' if prev.is_alphanumeric() || prev == '_' => {}
            ' ' | '+' | '*' | '/' | '%' | '<' | '>' | '=' | '!' | '&' | '|' | '^' | '?'
                if depth == 0 =>
            {
                // 先頭の `&` / `*` / `!` は単項演算子
                if i == 0 && matches!(c, '&' | '*' | '!') {
                    prev = c;
                    continue;
                }
                // `::<` はターボフィッシュ
                if c == '<' && prev == ':' {
                    depth += 1;
                    prev = c;
                    continue;
                }
                if c == '?' {
                    prev = c;
                    continue;
                }
                return true;
            }
            '-' if depth == 0 && i > 0 && prev != 'e' => return true,
            _ => {}
        }
        prev = c;
    }
    // 先頭の単項演算子
    trimmed.starts_with('&') || trimmed.starts_with('*') || trimmed.starts_with('!')
        || trimmed.starts_with('-')
}

fn is_wrapped(code: &str, open: char, close: char) -> bool {
    if !code.starts_with(open) || !code.ends_with(close) {
        return false;
    }
    let mut depth = 0i32;
    let mut in_str = false;
    let mut escaped = false;
    let last = code.len() - close.len_utf8();
    for (i, c) in code.char_indices() {
        if in_str {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_str = false;
            }
            continue;
        }
        match c {
            '"' => in_str = true,
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => {
                depth -= 1;
                if depth == 0 && i != last {
                    return false;
                }
            }
            _ => {}
        }
    }
    true
}

/// Receiver code for a method call on a value of type `ty`
///
/// `2.0.powf(x)` / `(-3).abs()` は数値型が決まらずコンパイルできないので
/// `2.0f64` / `(-3i64)` にする。
pub fn method_receiver(code: &str, ty: &Type) -> String {
    let trimmed = code.trim();
    let inner = if is_wrapped(trimmed, '(', ')') {
        trimmed[1..trimmed.len() - 1].trim()
    } else {
        trimmed
    };
    let suffix = match ty {
        Type::Int => "i64",
        Type::Float => "f64",
        _ => return parenthesize(code),
    };
    let digits = inner.strip_prefix('-').unwrap_or(inner);
    if !is_numeric_literal(digits) {
        return parenthesize(code);
    }
    if inner.starts_with('-') {
        format!("({inner}{suffix})")
    } else {
        format!("{inner}{suffix}")
    }
}

/// Unsuffixed numeric literal (`3`, `2.5`, `1e5`, `0xff`, `1_000`)
fn is_numeric_literal(code: &str) -> bool {
    let Some(first) = code.chars().next() else {
        return false;
    };
    let hex = code.starts_with("0x") || code.starts_with("0X");
    first.is_ascii_digit()
        && code.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-')
        && (hex || !code.chars().any(|c| c.is_ascii_alphabetic() && c != 'e' && c != 'E'))
        && !(hex && (code.contains('i') || code.contains('u')))
}

pub fn is_int_literal(code: &str) -> bool {
    let digits = code.strip_prefix('-').unwrap_or(code);
    !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit() || c == '_')
}

/// `3` → `3.0`
pub fn float_literal(int_code: &str) -> String {
    format!("{}.0", int_code.replace('_', ""))
}

/// Rust string literal for `value`
///
/// raw 文字列はそのまま `r"..."` で出す (正規表現のバックスラッシュを保つ)。
pub fn string_literal(value: &str, raw: bool) -> String {
    if raw && !value.contains('"') {
        return format!("r\"{value}\"");
    }
    if raw && !value.contains("\"#") {
        return format!("r#\"{value}\"#");
    }
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\0' => out.push_str("\\0"),
            c if c.is_control() => out.push_str(&format!("\\u{{{:x}}}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// `b"..."` リテラル
pub fn bytes_literal(bytes: &[u8]) -> String {
    let mut out = String::from("b\"");
    for &b in bytes {
        match b {
            b'"' => out.push_str("\\\""),
            b'\\' => out.push_str("\\\\"),
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b'\t' => out.push_str("\\t"),
            0x20..=0x7e => out.push(b as char),
            _ => out.push_str(&format!("\\x{b:02x}")),
        }
    }
    out.push('"');
    out
}

/// `{` / `}` in a format string literal
pub fn escape_format_text(text: &str) -> String {
    let literal = string_literal(text, false);
    let inner = &literal[1..literal.len() - 1];
    inner.replace('{', "{{").replace('}', "}}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_needs_parens() {
        assert!(!needs_parens("x"));
        assert!(!needs_parens("foo(a + b)"));
        assert!(!needs_parens("xs.iter().collect::<Vec<_>>()"));
        assert!(!needs_parens("(a + b)"));
        assert!(!needs_parens("{ let x = 1; x }"));
        assert!(needs_parens("a + b"));
        assert!(needs_parens("x as f64"));
        assert!(needs_parens("-x"));
        assert!(needs_parens("&x"));
        assert!(!needs_parens("\"a + b\""));
        assert!(!needs_parens("1e-5"));
        assert!(!needs_parens("f(x)?"));
        assert!(!needs_parens("vec![1, 2]"));
        assert!(needs_parens("a != b"));
    }

    #[test]
    fn test_literal_receivers_carry_suffix() {
        assert_eq!(method_receiver("2.0", &Type::Float), "2.0f64");
        assert_eq!(method_receiver("-3", &Type::Int), "(-3i64)");
        assert_eq!(method_receiver("(-3)", &Type::Int), "(-3i64)");
        assert_eq!(method_receiver("1e5", &Type::Float), "1e5f64");
        assert_eq!(method_receiver("0xff", &Type::Int), "0xffi64");
        assert_eq!(method_receiver("x", &Type::Int), "x");
        assert_eq!(method_receiver("a + b", &Type::Float), "(a + b)");
        assert_eq!(method_receiver("(x as f64)", &Type::Float), "(x as f64)");
        assert_eq!(Value::owned("2.5", Type::Float).receiver(), "2.5f64");
    }

    #[test]
    fn test_owned_conversions() {
        let place = Value::new("name", Type::Str, Form::Place);
        assert_eq!(place.into_owned(), "name.clone()");
        let borrowed = Value::new("s", Type::Str, Form::Borrowed);
        assert_eq!(borrowed.into_owned(), "s.to_string()");
        let lit = Value::new("\"hi\"", Type::Str, Form::Literal);
        assert_eq!(lit.into_owned(), "\"hi\".to_string()");
        let n = Value::new("x", Type::Int, Form::Borrowed);
        assert_eq!(n.into_owned(), "*x");
        let xs = Value::new("xs", Type::list(Type::Int), Form::Borrowed);
        assert_eq!(xs.into_owned(), "xs.to_vec()");
    }

    #[test]
    fn test_reference_forms() {
        let place = Value::new("s", Type::Str, Form::Place);
        assert_eq!(place.as_str_ref(), "&s");
        let lit = Value::new("\",\"", Type::Str, Form::Literal);
        assert_eq!(lit.as_str_ref(), "\",\"");
        let v = Value::new("v", Type::list(Type::Int), Form::Place);
        assert_eq!(v.as_mut_ref(), "&mut v");
        let n = Value::owned("3", Type::Int);
        assert_eq!(n.as_f64(), "3.0");
        assert_eq!(n.as_usize(), "3");
    }

    #[test]
    fn test_iter_owned() {
        let s = Value::new("s", Type::Str, Form::Place);
        assert_eq!(s.iter_owned(), "s.chars().map(|_c| _c.to_string())");
        let xs = Value::new("xs", Type::list(Type::Int), Form::Borrowed);
        assert_eq!(xs.iter_owned(), "xs.iter().cloned()");
        let tmp = Value::owned("vec![1, 2]", Type::list(Type::Int));
        assert_eq!(tmp.iter_owned(), "vec![1, 2].into_iter()");
    }

    #[test]
    fn test_string_literals() {
        assert_eq!(string_literal("a\"b\n", false), "\"a\\\"b\\n\"");
        assert_eq!(string_literal("\\d+", true), "r\"\\d+\"");
        assert_eq!(escape_format_text("{x}"), "{{x}}");
        assert_eq!(bytes_literal(b"a\x00"), "b\"a\\x00\"");
    }
}
