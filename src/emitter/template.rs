//! Registry template expansion
//!
//! `{0}` / `{s0}` / `{recv}` などのプレースホルダを引数のコードで置き換える。
//! プレースホルダでない `{` (ブロックや `format!` の `{}`) はそのまま残す。

use super::value::{method_receiver, Value};
use crate::error::{DepylerError, Result};
use crate::manifest::Dependency;
use crate::semantic::Type;

/// One argument slot of a template
#[derive(Debug, Clone, PartialEq)]
pub enum Slot {
    Value(Value),
    /// 省略された引数の既定値 (テンプレートに書かれたコード)
    Raw(String),
}

impl Slot {
    fn render(&self, conv: &str) -> String {
        let value = match self {
            Slot::Raw(code) => return code.clone(),
            Slot::Value(v) => v,
        };
        match conv {
            "" => value.into_owned(),
            "s" => value.as_str_ref(),
            "f" => value.as_f64(),
            "i" => value.as_i64(),
            "u" => value.as_usize(),
            "r" => value.as_ref(),
            "k" => value.as_key(),
            "p" => value.code.clone(),
            "it" => value.iter_owned(),
            "v" => match value.form {
                super::value::Form::Iter => format!("{}.collect::<Vec<_>>()", value.atom()),
                _ => value.atom(),
            },
            _ => value.code.clone(),
        }
    }

    /// Type of the code `render(conv)` produces
    fn rendered_type(&self, conv: &str) -> Type {
        match (self, conv) {
            (_, "f") => Type::Float,
            (_, "i") => Type::Int,
            (Slot::Value(v), _) => v.ty.clone(),
            (Slot::Raw(_), _) => Type::Unknown,
        }
    }

    fn plain(&self) -> String {
        match self {
            Slot::Raw(code) => code.clone(),
            Slot::Value(v) => v.code.clone(),
        }
    }
}

/// Parsed placeholder
#[derive(Debug, Clone, PartialEq, Eq)]
enum Placeholder {
    Recv,
    StrRecv,
    Args,
    Arg { conv: String, index: usize },
}

fn parse_placeholder(body: &str) -> Option<Placeholder> {
    match body {
        "recv" => return Some(Placeholder::Recv),
        "srecv" => return Some(Placeholder::StrRecv),
        "args" => return Some(Placeholder::Args),
        _ => {}
    }
    let split = body.find(|c: char| c.is_ascii_digit())?;
    let (conv, digits) = body.split_at(split);
    if !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    if !matches!(conv, "" | "s" | "f" | "i" | "u" | "r" | "k" | "p" | "it" | "v") {
        return None;
    }
    Some(Placeholder::Arg {
        conv: conv.to_string(),
        index: digits.parse().ok()?,
    })
}

/// Expand `template` with receiver `recv` and argument slots
pub fn expand(template: &str, recv: Option<&Value>, args: &[Slot]) -> Result<String> {
    let mut out = String::with_capacity(template.len() + 16);
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let placeholder = after
            .find('}')
            .and_then(|end| parse_placeholder(&after[..end]).map(|p| (p, end)));
        let Some((placeholder, end)) = placeholder else {
            out.push('{');
            rest = after;
            continue;
        };
        let text = match placeholder {
            Placeholder::Recv => recv
                .map(Value::receiver)
                .ok_or_else(|| DepylerError::Internal(format!("template needs a receiver: {template}")))?,
            Placeholder::StrRecv => recv
                .map(Value::as_str_ref)
                .ok_or_else(|| DepylerError::Internal(format!("template needs a receiver: {template}")))?,
            Placeholder::Args => args.iter().map(Slot::plain).collect::<Vec<_>>().join(", "),
            Placeholder::Arg { conv, index } => {
                let slot = args.get(index).ok_or_else(|| {
                    DepylerError::Internal(format!("template argument {index} missing: {template}"))
                })?;
                let text = slot.render(&conv);
                // `{f0}.sqrt()`: 受け手の位置
                if after[end + 1..].starts_with('.') {
                    method_receiver(&text, &slot.rendered_type(&conv))
                } else {
                    text
                }
            }
        };
        out.push_str(&text);
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Collections a template spells by their short name
pub fn implied_dependencies(code: &str) -> Vec<Dependency> {
    let mut deps = Vec::new();
    if code.contains("HashMap") {
        deps.push(Dependency::HashMap);
    }
    if code.contains("HashSet") {
        deps.push(Dependency::HashSet);
    }
    deps
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emitter::value::Form;
    use crate::semantic::Type;

    fn place(code: &str, ty: Type) -> Slot {
        Slot::Value(Value::new(code, ty, Form::Place))
    }

    #[test]
    fn test_expand_receiver_and_str_arg() {
        let recv = Value::new("line", Type::Str, Form::Borrowed);
        let out = expand(
            "{recv}.split({s0}).map(|s| s.to_string()).collect::<Vec<String>>()",
            Some(&recv),
            &[Slot::Value(Value::new("\",\"", Type::Str, Form::Literal))],
        )
        .unwrap();
        assert_eq!(
            out,
            "line.split(\",\").map(|s| s.to_string()).collect::<Vec<String>>()"
        );
    }

    #[test]
    fn test_blocks_and_format_braces_survive() {
        let recv = Value::new("xs", Type::list(Type::Int), Form::Place);
        let out = expand(
            "{ let _n = {recv}.len(); format!(\"{}\", _n) }",
            Some(&recv),
            &[],
        )
        .unwrap();
        assert_eq!(out, "{ let _n = xs.len(); format!(\"{}\", _n) }");
    }

    #[test]
    fn test_owned_and_default_slots() {
        let out = expand(
            "{recv}.get({k0}).cloned().unwrap_or({1})",
            Some(&Value::new("d", Type::dict(Type::Str, Type::Int), Form::Place)),
            &[place("word", Type::Str), Slot::Raw("0".to_string())],
        )
        .unwrap();
        assert_eq!(out, "d.get(&word).cloned().unwrap_or(0)");
    }

    #[test]
    fn test_numeric_conversions() {
        let n = Slot::Value(Value::new("n", Type::Int, Form::Place));
        assert_eq!(expand("{f0}.sqrt()", None, &[n.clone()]).unwrap(), "(n as f64).sqrt()");
        assert_eq!(expand("{u0}", None, &[n]).unwrap(), "(n as usize)");
    }

    #[test]
    fn test_literal_in_receiver_position() {
        let two = Slot::Value(Value::owned("2", Type::Int));
        assert_eq!(expand("{f0}.sqrt()", None, &[two.clone()]).unwrap(), "2.0f64.sqrt()");
        assert_eq!(expand("{i0}.abs()", None, &[two.clone()]).unwrap(), "2i64.abs()");
        // 引数位置はそのまま
        assert_eq!(expand("f({f0})", None, &[two]).unwrap(), "f(2.0)");
        let sum = Slot::Value(Value::owned("a + b", Type::Float));
        assert_eq!(expand("{f0}.sqrt()", None, &[sum]).unwrap(), "(a + b).sqrt()");
    }

    #[test]
    fn test_missing_argument_is_an_error() {
        assert!(expand("{recv}.push({0})", None, &[]).is_err());
    }

    #[test]
    fn test_implied_dependencies() {
        let deps = implied_dependencies("x.collect::<HashSet<_>>()");
        assert_eq!(deps, vec![Dependency::HashSet]);
    }
}
