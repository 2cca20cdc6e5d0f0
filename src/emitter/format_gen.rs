//! String formatting
//!
//! f-string / `print` / `%` 書式 / `str.format` を `format!` 系マクロに落とす。
//! Python の書式指定は Rust の書式指定に読み替え、表現できない部分は捨てる。

use super::context::Helper;
use super::helpers::has_py_repr;
use super::value::{escape_format_text, Form, Value};
use super::RustEmitter;
use crate::error::{DepylerError, Result};
use crate::hir::*;
use crate::semantic::Type;

/// Parsed Python format spec (`>10.2f`)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(super) struct FormatSpec {
    pub fill: Option<char>,
    pub align: Option<char>,
    pub plus: bool,
    pub alternate: bool,
    pub zero: bool,
    pub width: Option<usize>,
    pub precision: Option<usize>,
    pub kind: Option<char>,
}

impl FormatSpec {
    /// `[[fill]align][sign][#][0][width][grouping][.precision][type]`
    pub fn parse(spec: &str) -> Option<Self> {
        let chars: Vec<char> = spec.chars().collect();
        let mut out = FormatSpec::default();
        let mut i = 0;
        let is_align = |c: char| matches!(c, '<' | '>' | '^' | '=');
        if chars.len() >= 2 && is_align(chars[1]) {
            out.fill = Some(chars[0]);
            out.align = Some(chars[1]);
            i = 2;
        } else if chars.first().map_or(false, |c| is_align(*c)) {
            out.align = Some(chars[0]);
            i = 1;
        }
        if let Some(&c) = chars.get(i) {
            if matches!(c, '+' | '-' | ' ') {
                out.plus = c == '+';
                i += 1;
            }
        }
        if chars.get(i) == Some(&'#') {
            out.alternate = true;
            i += 1;
        }
        if chars.get(i) == Some(&'0') {
            out.zero = true;
            i += 1;
        }
        let start = i;
        while chars.get(i).map_or(false, char::is_ascii_digit) {
            i += 1;
        }
        if i > start {
            out.width = chars[start..i].iter().collect::<String>().parse().ok();
        }
        // 桁区切りは Rust の書式にないので読み飛ばす
        if matches!(chars.get(i), Some(',') | Some('_')) {
            i += 1;
        }
        if chars.get(i) == Some(&'.') {
            i += 1;
            let start = i;
            while chars.get(i).map_or(false, char::is_ascii_digit) {
                i += 1;
            }
            out.precision = Some(chars[start..i].iter().collect::<String>().parse().ok()?);
        }
        if let Some(&c) = chars.get(i) {
            if !"bcdeEfFgGnosxX%".contains(c) {
                return None;
            }
            out.kind = Some(c);
            i += 1;
        }
        if i != chars.len() {
            return None;
        }
        Some(out)
    }

    /// Rust spec after the `:` (without the braces)
    fn render(&self, debug: bool) -> String {
        let mut s = String::new();
        match (self.align, self.fill) {
            (Some('='), Some('0')) | (Some('='), None) => {}
            (Some('='), Some(f)) => {
                s.push(f);
                s.push('>');
            }
            (Some(a), Some(f)) => {
                s.push(f);
                s.push(a);
            }
            (Some(a), None) => s.push(a),
            _ => {}
        }
        if self.plus {
            s.push('+');
        }
        if self.alternate {
            s.push('#');
        }
        if self.zero || (self.align == Some('=') && matches!(self.fill, Some('0') | None)) {
            s.push('0');
        }
        if let Some(w) = self.width {
            s.push_str(&w.to_string());
        }
        let precision = match self.kind {
            Some('f' | 'F' | '%') => Some(self.precision.unwrap_or(6)),
            Some('d' | 'x' | 'X' | 'o' | 'b' | 'c') => None,
            _ => self.precision,
        };
        if let Some(p) = precision {
            s.push('.');
            s.push_str(&p.to_string());
        }
        match self.kind {
            Some(k @ ('x' | 'X' | 'o' | 'b' | 'e' | 'E')) => s.push(k),
            _ if debug => s.push('?'),
            _ => {}
        }
        s
    }
}

/// One `{}` hole of a format string and its argument
#[derive(Debug, Clone, PartialEq)]
pub(super) struct Hole {
    pub placeholder: String,
    pub arg: String,
}

impl Hole {
    fn new(placeholder: impl Into<String>, arg: impl Into<String>) -> Self {
        Self {
            placeholder: placeholder.into(),
            arg: arg.into(),
        }
    }
}

/// Accumulates format text and arguments
#[derive(Debug, Default)]
pub(super) struct FormatBuilder {
    text: String,
    args: Vec<String>,
}

impl FormatBuilder {
    pub fn literal(&mut self, text: &str) {
        self.text.push_str(&escape_format_text(text));
    }

    pub fn hole(&mut self, hole: Hole) {
        self.text.push_str(&hole.placeholder);
        self.args.push(hole.arg);
    }

    /// `format!("..", args)` あるいは引数がなければ `"..".to_string()`
    pub fn into_format(self) -> String {
        if self.args.is_empty() {
            return format!("\"{}\".to_string()", self.text.replace("{{", "{").replace("}}", "}"));
        }
        format!("format!(\"{}\", {})", self.text, self.args.join(", "))
    }

    /// `println!` などの引数列
    pub fn into_macro_args(self) -> String {
        if self.args.is_empty() {
            format!("\"{}\"", self.text)
        } else {
            format!("\"{}\", {}", self.text, self.args.join(", "))
        }
    }
}

impl RustEmitter<'_> {
    pub(super) fn fstring(&mut self, parts: &[FStringFragment]) -> Result<Value> {
        let mut fmt = FormatBuilder::default();
        for part in parts {
            match part {
                FStringFragment::Literal(text) => fmt.literal(text),
                FStringFragment::Expr {
                    value,
                    conversion,
                    format_spec,
                } => {
                    let v = self.expr(value)?;
                    let hole = match (conversion, format_spec) {
                        (Some(Conversion::Repr), _) => self.repr_hole(&v),
                        (_, Some(spec)) => self.formatted(&v, spec, value.pos)?,
                        _ => self.display(&v),
                    };
                    fmt.hole(hole);
                }
            }
        }
        Ok(Value::owned(fmt.into_format(), Type::Str))
    }

    /// `str(x)` の書き方で値を出す穴
    pub(super) fn display(&mut self, v: &Value) -> Hole {
        let arg = match (v.form, &v.ty) {
            (Form::Iter, Type::Str) => format!("{}.collect::<String>()", v.atom()),
            (Form::Iter, _) => format!("{}.collect::<Vec<_>>()", v.atom()),
            _ => v.code.clone(),
        };
        match &v.ty {
            Type::Float => Hole::new("{:?}", v.scalar()),
            Type::Bool => Hole::new(
                "{}",
                format!("if {} {{ \"True\" }} else {{ \"False\" }}", v.scalar()),
            ),
            Type::Str | Type::Int => Hole::new("{}", arg),
            Type::None => Hole::new("{}", "\"None\""),
            Type::Optional(inner) => {
                let bound = self.ctx.fresh("v");
                let inner_v = Value::new(format!("(*{bound})"), (**inner).clone(), Form::Place);
                let inner_hole = self.display(&inner_v);
                Hole::new(
                    "{}",
                    format!(
                        "match &{} {{ Some({bound}) => format!(\"{}\", {}), None => \"None\".to_string() }}",
                        v.atom(),
                        inner_hole.placeholder,
                        inner_hole.arg
                    ),
                )
            }
            Type::Class(c) => {
                let has_display = self.ctx.classes.get(c).map_or(false, |i| i.has_display);
                let is_error = self.ctx.classes.get(c).map_or(false, |i| i.is_exception);
                if has_display || is_error {
                    Hole::new("{}", arg)
                } else {
                    Hole::new("{:?}", arg)
                }
            }
            Type::Native(n) if n == "pathlib.Path" => {
                Hole::new("{}", format!("{}.display()", v.atom()))
            }
            Type::Native(n) if n == "io.File" => Hole::new("{:?}", arg),
            Type::Native(_) | Type::Union(_) | Type::Unknown | Type::Generic(_) => {
                Hole::new("{}", arg)
            }
            ty if has_py_repr(ty) => self.py_repr(v, &arg),
            _ => Hole::new("{:?}", arg),
        }
    }

    /// 容器は Python の repr で (文字列要素は `'a'`)
    fn py_repr(&mut self, v: &Value, arg: &str) -> Hole {
        self.ctx.use_helper(Helper::Repr);
        let recv = if v.form == Form::Iter || arg != v.code {
            format!("({arg})")
        } else {
            v.atom()
        };
        Hole::new("{}", format!("{recv}.py_repr()"))
    }

    /// `repr(x)` / `{x!r}`
    pub(super) fn repr_hole(&mut self, v: &Value) -> Hole {
        match &v.ty {
            Type::Str => Hole::new(
                "'{}'",
                match v.form {
                    Form::Iter => format!("{}.collect::<String>()", v.atom()),
                    _ => v.code.clone(),
                },
            ),
            Type::Int | Type::Float | Type::Bool | Type::None | Type::Optional(_) => self.display(v),
            ty if has_py_repr(ty) => self.display(v),
            _ => Hole::new("{:?}", v.code.clone()),
        }
    }

    /// `format(x, spec)` / `{x:spec}`
    pub(super) fn formatted(&mut self, v: &Value, spec: &str, pos: SourcePos) -> Result<Hole> {
        let Some(parsed) = FormatSpec::parse(spec) else {
            return Err(DepylerError::unsupported(pos, format!("format spec '{spec}'")));
        };
        let (arg, debug, suffix) = match parsed.kind {
            Some('f' | 'F' | 'e' | 'E') => (v.as_f64(), false, ""),
            Some('g' | 'G' | 'n') => (v.as_f64(), false, ""),
            Some('%') => (
                format!("({} * 100.0)", v.as_f64()),
                false,
                "%",
            ),
            Some('d' | 'x' | 'X' | 'o' | 'b') => (v.as_i64(), false, ""),
            Some('c') => (
                format!("char::from_u32({} as u32).unwrap_or('?')", v.as_i64()),
                false,
                "",
            ),
            _ => match v.ty {
                Type::Float if parsed.precision.is_some() => (v.scalar(), false, ""),
                _ => {
                    let hole = self.display(v);
                    let debug = hole.placeholder.contains('?');
                    (hole.arg, debug, "")
                }
            },
        };
        let rendered = parsed.render(debug);
        let placeholder = if rendered.is_empty() {
            "{}".to_string()
        } else {
            format!("{{:{rendered}}}")
        };
        Ok(Hole::new(format!("{placeholder}{suffix}"), arg))
    }

    /// `str(x)` の所有文字列
    pub(super) fn to_str(&mut self, v: &Value) -> String {
        match (&v.ty, v.form) {
            (Type::Str, Form::Iter) => format!("{}.collect::<String>()", v.atom()),
            (Type::Str, _) => v.into_owned(),
            (Type::Int, _) => format!("{}.to_string()", v.atom()),
            _ => {
                let hole = self.display(v);
                format!("format!(\"{}\", {})", hole.placeholder, hole.arg)
            }
        }
    }

    // --- print ---

    pub(super) fn print_call(
        &mut self,
        e: &HirExpr,
        args: &[HirExpr],
        kwargs: &[(String, HirExpr)],
    ) -> Result<Value> {
        let mut sep = Some(" ".to_string());
        let mut sep_value = None;
        let mut end = "\n".to_string();
        let mut stderr = false;
        for (name, value) in kwargs {
            match (name.as_str(), &value.kind) {
                ("sep", HirExprKind::Str { value, .. }) => sep = Some(value.clone()),
                ("sep", HirExprKind::NoneLit) => {}
                ("sep", _) => {
                    sep = None;
                    sep_value = Some(self.expr(value)?);
                }
                ("end", HirExprKind::Str { value, .. }) => end = value.clone(),
                ("end", HirExprKind::NoneLit) => {}
                ("file", _) if is_stderr(value) => stderr = true,
                ("file", HirExprKind::Path(p)) if p == "sys.stdout" => {}
                ("flush", _) => {}
                _ => {
                    return Err(DepylerError::unsupported(
                        e.pos,
                        format!("print() keyword argument '{name}'"),
                    ))
                }
            }
        }

        let mut fmt = FormatBuilder::default();
        for (i, arg) in args.iter().enumerate() {
            if i > 0 {
                match (&sep, &sep_value) {
                    (Some(s), _) => fmt.literal(s),
                    (None, Some(v)) => {
                        let hole = Hole::new("{}", v.code.clone());
                        fmt.hole(hole);
                    }
                    _ => {}
                }
            }
            if let HirExprKind::Starred(inner) = &arg.kind {
                let v = self.expr(inner)?;
                let elem = Value::new("_v", v.ty.element(), Form::Place);
                let hole = self.display(&elem);
                let joined = format!(
                    "{}.map(|_v| format!(\"{}\", {})).collect::<Vec<_>>().join({})",
                    v.iter_owned(),
                    hole.placeholder,
                    hole.arg,
                    super::value::string_literal(sep.as_deref().unwrap_or(" "), false)
                );
                fmt.hole(Hole::new("{}", joined));
                continue;
            }
            if let HirExprKind::Str { value, .. } = &arg.kind {
                fmt.literal(value);
                continue;
            }
            let v = self.expr(arg)?;
            let hole = self.display(&v);
            fmt.hole(hole);
        }
        let (mac, tail) = match (stderr, end.as_str()) {
            (false, "\n") => ("println!", None),
            (true, "\n") => ("eprintln!", None),
            (false, _) => ("print!", Some(end)),
            (true, _) => ("eprint!", Some(end)),
        };
        if let Some(tail) = tail {
            fmt.literal(&tail);
        }
        let body = fmt.into_macro_args();
        let code = if body == "\"\"" && mac.ends_with("ln!") {
            format!("{mac}()")
        } else {
            format!("{mac}({body})")
        };
        Ok(Value::unit(code))
    }

    // --- % 書式 ---

    pub(super) fn percent_format(&mut self, left: &HirExpr, right: &HirExpr) -> Result<Value> {
        let HirExprKind::Str { value: template, .. } = &left.kind else {
            return Err(DepylerError::unsupported(
                left.pos,
                "'%' formatting with a non-literal format string",
            ));
        };
        let operands: Vec<&HirExpr> = match &right.kind {
            HirExprKind::Tuple(items) => items.iter().collect(),
            _ => vec![right],
        };
        let mut values = Vec::new();
        for o in operands {
            values.push(self.expr(o)?);
        }
        let mut values = values.into_iter();
        let mut fmt = FormatBuilder::default();
        let chars: Vec<char> = template.chars().collect();
        let mut literal = String::new();
        let mut i = 0;
        while i < chars.len() {
            if chars[i] != '%' {
                literal.push(chars[i]);
                i += 1;
                continue;
            }
            if chars.get(i + 1) == Some(&'%') {
                literal.push('%');
                i += 2;
                continue;
            }
            fmt.literal(&literal);
            literal.clear();
            // %[flags][width][.prec]type
            let mut spec = FormatSpec::default();
            i += 1;
            while let Some(&c) = chars.get(i) {
                match c {
                    '-' => spec.align = Some('<'),
                    '+' => spec.plus = true,
                    '0' => spec.zero = true,
                    '#' => spec.alternate = true,
                    ' ' => {}
                    _ => break,
                }
                i += 1;
            }
            let start = i;
            while chars.get(i).map_or(false, char::is_ascii_digit) {
                i += 1;
            }
            if i > start {
                spec.width = chars[start..i].iter().collect::<String>().parse().ok();
            }
            if chars.get(i) == Some(&'.') {
                i += 1;
                let start = i;
                while chars.get(i).map_or(false, char::is_ascii_digit) {
                    i += 1;
                }
                spec.precision = chars[start..i].iter().collect::<String>().parse().ok();
            }
            let Some(&conv) = chars.get(i) else {
                return Err(DepylerError::unsupported(left.pos, "incomplete '%' format"));
            };
            i += 1;
            let Some(v) = values.next() else {
                return Err(DepylerError::unsupported(
                    left.pos,
                    "not enough arguments for format string",
                ));
            };
            let hole = match conv {
                's' => {
                    let base = self.display(&v);
                    let debug = base.placeholder.contains('?');
                    let rendered = spec.render(debug);
                    let placeholder = if rendered.is_empty() {
                        base.placeholder
                    } else {
                        format!("{{:{rendered}}}")
                    };
                    Hole::new(placeholder, base.arg)
                }
                'r' => self.repr_hole(&v),
                'd' | 'i' | 'u' => {
                    spec.kind = Some('d');
                    Hole::new(format!("{{:{}}}", spec.render(false)), v.as_i64())
                }
                'f' | 'F' | 'e' | 'E' | 'x' | 'X' | 'o' => {
                    spec.kind = Some(conv);
                    let arg = if matches!(conv, 'x' | 'X' | 'o') {
                        v.as_i64()
                    } else {
                        v.as_f64()
                    };
                    Hole::new(format!("{{:{}}}", spec.render(false)), arg)
                }
                'g' | 'G' => Hole::new("{}", v.as_f64()),
                'c' => Hole::new(
                    "{}",
                    match v.ty {
                        Type::Str => v.code.clone(),
                        _ => format!("char::from_u32({} as u32).unwrap_or('?')", v.as_i64()),
                    },
                ),
                other => {
                    return Err(DepylerError::unsupported(
                        left.pos,
                        format!("'%{other}' format conversion"),
                    ))
                }
            };
            fmt.hole(Hole::new(hole.placeholder.replace("{:}", "{}"), hole.arg));
        }
        fmt.literal(&literal);
        if values.next().is_some() {
            return Err(DepylerError::unsupported(
                left.pos,
                "not all arguments converted during string formatting",
            ));
        }
        Ok(Value::owned(fmt.into_format(), Type::Str))
    }

    // --- str.format ---

    pub(super) fn str_format(
        &mut self,
        e: &HirExpr,
        template: &str,
        args: &[HirExpr],
        kwargs: &[(String, HirExpr)],
    ) -> Result<Value> {
        let mut positional = Vec::new();
        for a in args {
            positional.push(self.expr(a)?);
        }
        let mut named = Vec::new();
        for (k, v) in kwargs {
            named.push((k.clone(), self.expr(v)?));
        }
        let mut fmt = FormatBuilder::default();
        let mut literal = String::new();
        let mut next_auto = 0usize;
        let mut rest = template;
        while let Some(c) = rest.chars().next() {
            if rest.starts_with("{{") {
                literal.push('{');
                rest = &rest[2..];
                continue;
            }
            if rest.starts_with("}}") {
                literal.push('}');
                rest = &rest[2..];
                continue;
            }
            if c != '{' {
                literal.push(c);
                rest = &rest[c.len_utf8()..];
                continue;
            }
            let Some(close) = rest.find('}') else {
                return Err(DepylerError::unsupported(e.pos, "unterminated '{' in format string"));
            };
            let field = &rest[1..close];
            rest = &rest[close + 1..];
            fmt.literal(&literal);
            literal.clear();

            let (head, spec) = match field.split_once(':') {
                Some((h, s)) => (h, Some(s)),
                None => (field, None),
            };
            let (name, conversion) = match head.split_once('!') {
                Some((n, c)) => (n, Some(c)),
                None => (head, None),
            };
            let value = if name.is_empty() {
                let v = positional.get(next_auto).cloned();
                next_auto += 1;
                v
            } else if let Ok(idx) = name.parse::<usize>() {
                positional.get(idx).cloned()
            } else {
                named.iter().find(|(k, _)| k == name).map(|(_, v)| v.clone())
            };
            let Some(v) = value else {
                return Err(DepylerError::unsupported(
                    e.pos,
                    format!("format field '{{{field}}}' has no matching argument"),
                ));
            };
            let hole = match (conversion, spec) {
                (Some("r"), _) => self.repr_hole(&v),
                (_, Some(s)) if !s.is_empty() => self.formatted(&v, s, e.pos)?,
                _ => self.display(&v),
            };
            fmt.hole(hole);
        }
        fmt.literal(&literal);
        Ok(Value::owned(fmt.into_format(), Type::Str))
    }
}

fn is_stderr(e: &HirExpr) -> bool {
    match &e.kind {
        HirExprKind::Path(p) => p == "sys.stderr",
        HirExprKind::Attribute { value, attr } => attr == "stderr" && value.as_name() == Some("sys"),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_spec_width_and_precision() {
        let spec = FormatSpec::parse(">10.2f").unwrap();
        assert_eq!(spec.align, Some('>'));
        assert_eq!(spec.width, Some(10));
        assert_eq!(spec.precision, Some(2));
        assert_eq!(spec.kind, Some('f'));
        assert_eq!(spec.render(false), ">10.2");
    }

    #[test]
    fn test_parse_spec_fill_and_grouping() {
        let spec = FormatSpec::parse("*^12,d").unwrap();
        assert_eq!(spec.fill, Some('*'));
        assert_eq!(spec.align, Some('^'));
        assert_eq!(spec.render(false), "*^12");
    }

    #[test]
    fn test_hex_and_percent() {
        assert_eq!(FormatSpec::parse("#x").unwrap().render(false), "#x");
        assert_eq!(FormatSpec::parse("08b").unwrap().render(false), "08b");
        assert_eq!(FormatSpec::parse(".1%").unwrap().render(false), ".1");
    }

    #[test]
    fn test_default_float_precision() {
        assert_eq!(FormatSpec::parse("f").unwrap().render(false), ".6");
    }

    #[test]
    fn test_bad_spec_is_rejected() {
        assert!(FormatSpec::parse("10q").is_none());
        assert!(FormatSpec::parse(">>>").is_none());
    }

    #[test]
    fn test_builder_without_args_is_plain_string() {
        let mut fmt = FormatBuilder::default();
        fmt.literal("a{b}");
        assert_eq!(fmt.into_format(), "\"a{b}\".to_string()");
    }
}
