//! Method lowering table
//!
//! レシーバ型の族ごとに Python メソッドの置換テンプレートを持つ。
//! `mutating` はミュータビリティ推論 (Pass A) のクローズドなテーブルを兼ねる。

use super::accepts;
use crate::manifest::Dependency;
use crate::semantic::Type;
use once_cell::sync::Lazy;
use std::collections::HashMap;

/// Receiver family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    Str,
    List,
    Dict,
    Set,
    Bytes,
    Int,
    Float,
    /// Registry-known library type (`re.Pattern`)
    Native(&'static str),
}

impl Family {
    pub fn matches(&self, ty: &Type) -> bool {
        match (self, ty) {
            (Family::Str, Type::Str)
            | (Family::List, Type::List(_))
            | (Family::Dict, Type::Dict(_, _))
            | (Family::Set, Type::Set(_))
            | (Family::Bytes, Type::Bytes)
            | (Family::Int, Type::Int)
            | (Family::Float, Type::Float) => true,
            (Family::Native(name), Type::Native(n)) => name == n,
            _ => false,
        }
    }

    /// ヒューリスティックで使う代表型
    pub fn representative(&self) -> Type {
        match self {
            Family::Str => Type::Str,
            Family::List => Type::list(Type::Unknown),
            Family::Dict => Type::dict(Type::Unknown, Type::Unknown),
            Family::Set => Type::set(Type::Unknown),
            Family::Bytes => Type::Bytes,
            Family::Int => Type::Int,
            Family::Float => Type::Float,
            Family::Native(name) => Type::Native(name.to_string()),
        }
    }
}

/// One method (or attribute) lowering
#[derive(Debug, Clone, Copy)]
pub struct MethodSpec {
    pub family: Family,
    pub name: &'static str,
    pub params: &'static [&'static str],
    pub template: &'static str,
    /// レシーバを書き換える
    pub mutating: bool,
    pub dependency: Option<Dependency>,
    /// Attribute access rather than a call (`m.returncode`)
    pub attribute: bool,
    pub ret_ty_resolver: fn(recv: &Type, args: &[Type]) -> Type,
}

const fn method(
    family: Family,
    name: &'static str,
    params: &'static [&'static str],
    template: &'static str,
    ret_ty_resolver: fn(&Type, &[Type]) -> Type,
) -> MethodSpec {
    MethodSpec {
        family,
        name,
        params,
        template,
        mutating: false,
        dependency: None,
        attribute: false,
        ret_ty_resolver,
    }
}

const fn attribute(
    family: Family,
    name: &'static str,
    template: &'static str,
    ret_ty_resolver: fn(&Type, &[Type]) -> Type,
) -> MethodSpec {
    MethodSpec {
        family,
        name,
        params: &[],
        template,
        mutating: false,
        dependency: None,
        attribute: true,
        ret_ty_resolver,
    }
}

impl MethodSpec {
    const fn mutating(self) -> Self {
        MethodSpec {
            mutating: true,
            ..self
        }
    }

    const fn needs(self, dep: Dependency) -> Self {
        MethodSpec {
            dependency: Some(dep),
            ..self
        }
    }
}

fn dict_key(recv: &Type) -> Type {
    match recv {
        Type::Dict(k, _) => (**k).clone(),
        _ => Type::Unknown,
    }
}

fn dict_value(recv: &Type) -> Type {
    match recv {
        Type::Dict(_, v) => (**v).clone(),
        _ => Type::Unknown,
    }
}

const STR: Family = Family::Str;
const LIST: Family = Family::List;
const DICT: Family = Family::Dict;
const SET: Family = Family::Set;
const PATTERN: Family = Family::Native("re.Pattern");
const MATCH: Family = Family::Native("re.Match");
const PATH: Family = Family::Native("pathlib.Path");
const DATETIME: Family = Family::Native("datetime.datetime");
const DATE: Family = Family::Native("datetime.date");
const TIMEDELTA: Family = Family::Native("datetime.timedelta");
const FILE: Family = Family::Native("io.File");

pub const METHOD_SPECS: &[MethodSpec] = &[
    // --- str ---
    method(STR, "upper", &[], "{recv}.to_uppercase()", |_, _| Type::Str),
    method(STR, "lower", &[], "{recv}.to_lowercase()", |_, _| Type::Str),
    method(STR, "casefold", &[], "{recv}.to_lowercase()", |_, _| Type::Str),
    method(STR, "strip", &[], "{recv}.trim().to_string()", |_, _| Type::Str),
    method(
        STR,
        "strip",
        &["chars"],
        "{recv}.trim_matches(|c: char| {s0}.contains(c)).to_string()",
        |_, _| Type::Str,
    ),
    method(STR, "lstrip", &[], "{recv}.trim_start().to_string()", |_, _| Type::Str),
    method(
        STR,
        "lstrip",
        &["chars"],
        "{recv}.trim_start_matches(|c: char| {s0}.contains(c)).to_string()",
        |_, _| Type::Str,
    ),
    method(STR, "rstrip", &[], "{recv}.trim_end().to_string()", |_, _| Type::Str),
    method(
        STR,
        "rstrip",
        &["chars"],
        "{recv}.trim_end_matches(|c: char| {s0}.contains(c)).to_string()",
        |_, _| Type::Str,
    ),
    method(
        STR,
        "split",
        &[],
        "{recv}.split_whitespace().map(|s| s.to_string()).collect::<Vec<String>>()",
        |_, _| Type::list(Type::Str),
    ),
    method(
        STR,
        "split",
        &["sep"],
        "{recv}.split({s0}).map(|s| s.to_string()).collect::<Vec<String>>()",
        |_, _| Type::list(Type::Str),
    ),
    method(
        STR,
        "split",
        &["sep", "maxsplit"],
        "{recv}.splitn(({i1} + 1) as usize, {s0}).map(|s| s.to_string()).collect::<Vec<String>>()",
        |_, _| Type::list(Type::Str),
    ),
    method(
        STR,
        "rsplit",
        &["sep"],
        "{ let mut _parts: Vec<String> = {recv}.rsplit({s0}).map(|s| s.to_string()).collect(); _parts.reverse(); _parts }",
        |_, _| Type::list(Type::Str),
    ),
    method(
        STR,
        "splitlines",
        &[],
        "{recv}.lines().map(|s| s.to_string()).collect::<Vec<String>>()",
        |_, _| Type::list(Type::Str),
    ),
    method(STR, "join", &["iterable"], "{v0}.join({srecv})", |_, _| Type::Str),
    method(STR, "replace", &["old", "new"], "{recv}.replace({s0}, {s1})", |_, _| Type::Str),
    method(
        STR,
        "replace",
        &["old", "new", "count"],
        "{recv}.replacen({s0}, {s1}, {u2})",
        |_, _| Type::Str,
    ),
    method(STR, "startswith", &["prefix"], "{recv}.starts_with({s0})", |_, _| Type::Bool),
    method(STR, "endswith", &["suffix"], "{recv}.ends_with({s0})", |_, _| Type::Bool),
    method(
        STR,
        "find",
        &["sub"],
        "{recv}.find({s0}).map(|i| i as i64).unwrap_or(-1)",
        |_, _| Type::Int,
    ),
    method(
        STR,
        "rfind",
        &["sub"],
        "{recv}.rfind({s0}).map(|i| i as i64).unwrap_or(-1)",
        |_, _| Type::Int,
    ),
    method(
        STR,
        "index",
        &["sub"],
        r#"{recv}.find({s0}).map(|i| i as i64).expect("ValueError: substring not found")"#,
        |_, _| Type::Int,
    ),
    method(STR, "count", &["sub"], "{recv}.matches({s0}).count() as i64", |_, _| Type::Int),
    method(
        STR,
        "isdigit",
        &[],
        "(!{recv}.is_empty() && {recv}.chars().all(|c| c.is_ascii_digit()))",
        |_, _| Type::Bool,
    ),
    method(
        STR,
        "isnumeric",
        &[],
        "(!{recv}.is_empty() && {recv}.chars().all(|c| c.is_numeric()))",
        |_, _| Type::Bool,
    ),
    method(
        STR,
        "isalpha",
        &[],
        "(!{recv}.is_empty() && {recv}.chars().all(|c| c.is_alphabetic()))",
        |_, _| Type::Bool,
    ),
    method(
        STR,
        "isalnum",
        &[],
        "(!{recv}.is_empty() && {recv}.chars().all(|c| c.is_alphanumeric()))",
        |_, _| Type::Bool,
    ),
    method(
        STR,
        "isspace",
        &[],
        "(!{recv}.is_empty() && {recv}.chars().all(|c| c.is_whitespace()))",
        |_, _| Type::Bool,
    ),
    method(
        STR,
        "isupper",
        &[],
        "({recv}.chars().any(|c| c.is_alphabetic()) && !{recv}.chars().any(|c| c.is_lowercase()))",
        |_, _| Type::Bool,
    ),
    method(
        STR,
        "islower",
        &[],
        "({recv}.chars().any(|c| c.is_alphabetic()) && !{recv}.chars().any(|c| c.is_uppercase()))",
        |_, _| Type::Bool,
    ),
    method(
        STR,
        "capitalize",
        &[],
        "{ let mut _c = {recv}.chars(); match _c.next() { Some(f) => f.to_uppercase().collect::<String>() + &_c.as_str().to_lowercase(), None => String::new() } }",
        |_, _| Type::Str,
    ),
    method(
        STR,
        "title",
        &[],
        "{recv}.split(' ').map(|w| { let mut _c = w.chars(); match _c.next() { Some(f) => f.to_uppercase().collect::<String>() + &_c.as_str().to_lowercase(), None => String::new() } }).collect::<Vec<String>>().join(\" \")",
        |_, _| Type::Str,
    ),
    method(
        STR,
        "zfill",
        &["width"],
        "format!(\"{:0>width$}\", {recv}, width = {u0})",
        |_, _| Type::Str,
    ),
    method(
        STR,
        "ljust",
        &["width"],
        "format!(\"{:<width$}\", {recv}, width = {u0})",
        |_, _| Type::Str,
    ),
    method(
        STR,
        "rjust",
        &["width"],
        "format!(\"{:>width$}\", {recv}, width = {u0})",
        |_, _| Type::Str,
    ),
    method(
        STR,
        "center",
        &["width"],
        "format!(\"{:^width$}\", {recv}, width = {u0})",
        |_, _| Type::Str,
    ),
    method(STR, "encode", &["encoding=\"utf-8\""], "{recv}.as_bytes().to_vec()", |_, _| {
        Type::Bytes
    }),
    method(
        STR,
        "partition",
        &["sep"],
        "match {recv}.split_once({s0}) { Some((_a, _b)) => (_a.to_string(), {s0}.to_string(), _b.to_string()), None => ({recv}.to_string(), String::new(), String::new()) }",
        |_, _| Type::Tuple(vec![Type::Str, Type::Str, Type::Str]),
    ),
    method(
        STR,
        "removeprefix",
        &["prefix"],
        "{recv}.strip_prefix({s0}).unwrap_or({srecv}).to_string()",
        |_, _| Type::Str,
    ),
    method(
        STR,
        "removesuffix",
        &["suffix"],
        "{recv}.strip_suffix({s0}).unwrap_or({srecv}).to_string()",
        |_, _| Type::Str,
    ),
    method(STR, "format", &["*"], "format!({recv}, {args})", |_, _| Type::Str),
    // --- list ---
    method(LIST, "append", &["x"], "{recv}.push({0})", |_, _| Type::None).mutating(),
    method(LIST, "extend", &["iterable"], "{recv}.extend({it0})", |_, _| Type::None).mutating(),
    method(LIST, "insert", &["i", "x"], "{recv}.insert({u0}, {1})", |_, _| Type::None)
        .mutating(),
    method(
        LIST,
        "pop",
        &[],
        r#"{recv}.pop().expect("IndexError: pop from empty list")"#,
        |recv, _| recv.element(),
    )
    .mutating(),
    method(
        LIST,
        "pop",
        &["i"],
        "{ let _i = {i0}; let _n = {recv}.len() as i64; {recv}.remove((if _i < 0 { _n + _i } else { _i }) as usize) }",
        |recv, _| recv.element(),
    )
    .mutating(),
    method(
        LIST,
        "remove",
        &["x"],
        r#"{ let _pos = {recv}.iter().position(|_e| *_e == {0}).expect("ValueError: list.remove(x): x not in list"); {recv}.remove(_pos); }"#,
        |_, _| Type::None,
    )
    .mutating(),
    method(
        LIST,
        "index",
        &["x"],
        r#"{recv}.iter().position(|_e| *_e == {0}).map(|i| i as i64).expect("ValueError: x not in list")"#,
        |_, _| Type::Int,
    ),
    method(
        LIST,
        "count",
        &["x"],
        "{recv}.iter().filter(|_e| **_e == {0}).count() as i64",
        |_, _| Type::Int,
    ),
    method(LIST, "sort", &[], "{recv}.sort()", |_, _| Type::None).mutating(),
    method(LIST, "reverse", &[], "{recv}.reverse()", |_, _| Type::None).mutating(),
    method(LIST, "clear", &[], "{recv}.clear()", |_, _| Type::None).mutating(),
    method(LIST, "copy", &[], "{recv}.to_vec()", |recv, _| recv.clone()),
    method(LIST, "appendleft", &["x"], "{recv}.insert(0, {0})", |_, _| Type::None).mutating(),
    method(
        LIST,
        "popleft",
        &[],
        r#"{ assert!(!{recv}.is_empty(), "IndexError: pop from an empty deque"); {recv}.remove(0) }"#,
        |recv, _| recv.element(),
    )
    .mutating(),
    // --- dict ---
    method(DICT, "get", &["key"], "{recv}.get({k0}).cloned()", |recv, _| {
        Type::optional(dict_value(recv))
    }),
    method(
        DICT,
        "get",
        &["key", "default"],
        "{recv}.get({k0}).cloned().unwrap_or({1})",
        |recv, _| dict_value(recv),
    ),
    method(
        DICT,
        "keys",
        &[],
        "{recv}.keys().cloned().collect::<Vec<_>>()",
        |recv, _| Type::list(dict_key(recv)),
    ),
    method(
        DICT,
        "values",
        &[],
        "{recv}.values().cloned().collect::<Vec<_>>()",
        |recv, _| Type::list(dict_value(recv)),
    ),
    method(
        DICT,
        "items",
        &[],
        "{recv}.iter().map(|(k, v)| (k.clone(), v.clone())).collect::<Vec<_>>()",
        |recv, _| Type::list(Type::Tuple(vec![dict_key(recv), dict_value(recv)])),
    ),
    method(
        DICT,
        "pop",
        &["key"],
        r#"{recv}.remove({k0}).expect("KeyError: key not found")"#,
        |recv, _| dict_value(recv),
    )
    .mutating(),
    method(
        DICT,
        "pop",
        &["key", "default"],
        "{recv}.remove({k0}).unwrap_or({1})",
        |recv, _| dict_value(recv),
    )
    .mutating(),
    method(
        DICT,
        "setdefault",
        &["key", "default"],
        "{recv}.entry({0}).or_insert({1}).clone()",
        |recv, _| dict_value(recv),
    )
    .mutating(),
    method(DICT, "update", &["other"], "{recv}.extend({it0})", |_, _| Type::None).mutating(),
    method(DICT, "clear", &[], "{recv}.clear()", |_, _| Type::None).mutating(),
    method(DICT, "copy", &[], "{recv}.clone()", |recv, _| recv.clone()),
    method(
        DICT,
        "most_common",
        &["n"],
        "{ let mut _v: Vec<_> = {recv}.iter().map(|(k, v)| (k.clone(), *v)).collect(); _v.sort_by(|a, b| b.1.cmp(&a.1)); _v.truncate({u0}); _v }",
        |recv, _| Type::list(Type::Tuple(vec![dict_key(recv), Type::Int])),
    ),
    // --- set ---
    method(SET, "add", &["x"], "{recv}.insert({0})", |_, _| Type::None).mutating(),
    method(
        SET,
        "remove",
        &["x"],
        r#"assert!({recv}.remove({r0}), "KeyError: element not in set")"#,
        |_, _| Type::None,
    )
    .mutating(),
    method(SET, "discard", &["x"], "{recv}.remove({r0})", |_, _| Type::None).mutating(),
    method(
        SET,
        "pop",
        &[],
        r#"{ let _x = {recv}.iter().next().cloned().expect("KeyError: pop from an empty set"); {recv}.remove(&_x); _x }"#,
        |recv, _| recv.element(),
    )
    .mutating(),
    method(SET, "update", &["other"], "{recv}.extend({it0})", |_, _| Type::None).mutating(),
    method(SET, "clear", &[], "{recv}.clear()", |_, _| Type::None).mutating(),
    method(SET, "copy", &[], "{recv}.clone()", |recv, _| recv.clone()),
    method(
        SET,
        "union",
        &["other"],
        "{recv}.union({r0}).cloned().collect::<HashSet<_>>()",
        |recv, _| recv.clone(),
    )
    .needs(Dependency::HashSet),
    method(
        SET,
        "intersection",
        &["other"],
        "{recv}.intersection({r0}).cloned().collect::<HashSet<_>>()",
        |recv, _| recv.clone(),
    )
    .needs(Dependency::HashSet),
    method(
        SET,
        "difference",
        &["other"],
        "{recv}.difference({r0}).cloned().collect::<HashSet<_>>()",
        |recv, _| recv.clone(),
    )
    .needs(Dependency::HashSet),
    method(
        SET,
        "symmetric_difference",
        &["other"],
        "{recv}.symmetric_difference({r0}).cloned().collect::<HashSet<_>>()",
        |recv, _| recv.clone(),
    )
    .needs(Dependency::HashSet),
    method(SET, "issubset", &["other"], "{recv}.is_subset({r0})", |_, _| Type::Bool),
    method(SET, "issuperset", &["other"], "{recv}.is_superset({r0})", |_, _| Type::Bool),
    method(SET, "isdisjoint", &["other"], "{recv}.is_disjoint({r0})", |_, _| Type::Bool),
    // --- bytes / numbers ---
    method(
        Family::Bytes,
        "decode",
        &["encoding=\"utf-8\""],
        "String::from_utf8_lossy(&{recv}).to_string()",
        |_, _| Type::Str,
    ),
    method(Family::Bytes, "hex", &[], "hex::encode(&{recv})", |_, _| Type::Str)
        .needs(Dependency::Hex),
    method(Family::Float, "is_integer", &[], "({recv}.fract() == 0.0)", |_, _| Type::Bool),
    method(Family::Int, "bit_length", &[], "(64 - {recv}.abs().leading_zeros() as i64)", |_, _| {
        Type::Int
    }),
    // --- re.Pattern ---
    method(PATTERN, "search", &["string"], "{recv}.captures({s0})", |_, _| {
        Type::optional(Type::Native("re.Match".to_string()))
    })
    .needs(Dependency::Regex),
    method(
        PATTERN,
        "match",
        &["string"],
        "{recv}.captures({s0}).filter(|_c| _c.get(0).map_or(false, |m| m.start() == 0))",
        |_, _| Type::optional(Type::Native("re.Match".to_string())),
    )
    .needs(Dependency::Regex),
    method(
        PATTERN,
        "fullmatch",
        &["string"],
        "{recv}.captures({s0}).filter(|_c| _c.get(0).map_or(false, |m| m.start() == 0 && m.end() == {s0}.len()))",
        |_, _| Type::optional(Type::Native("re.Match".to_string())),
    )
    .needs(Dependency::Regex),
    method(
        PATTERN,
        "findall",
        &["string"],
        "{recv}.find_iter({s0}).map(|m| m.as_str().to_string()).collect::<Vec<String>>()",
        |_, _| Type::list(Type::Str),
    )
    .needs(Dependency::Regex),
    method(
        PATTERN,
        "sub",
        &["repl", "string"],
        "{recv}.replace_all({s1}, {s0}).to_string()",
        |_, _| Type::Str,
    )
    .needs(Dependency::Regex),
    method(
        PATTERN,
        "split",
        &["string"],
        "{recv}.split({s0}).map(|s| s.to_string()).collect::<Vec<String>>()",
        |_, _| Type::list(Type::Str),
    )
    .needs(Dependency::Regex),
    // --- re.Match ---
    method(
        MATCH,
        "group",
        &[],
        "{recv}.get(0).map(|m| m.as_str().to_string()).unwrap_or_default()",
        |_, _| Type::Str,
    ),
    method(
        MATCH,
        "group",
        &["n"],
        "{recv}.get({u0}).map(|m| m.as_str().to_string()).unwrap_or_default()",
        |_, _| Type::Str,
    ),
    method(
        MATCH,
        "groups",
        &[],
        "{recv}.iter().skip(1).map(|m| m.map(|m| m.as_str().to_string()).unwrap_or_default()).collect::<Vec<String>>()",
        |_, _| Type::list(Type::Str),
    ),
    method(
        MATCH,
        "start",
        &[],
        "{recv}.get(0).map(|m| m.start() as i64).unwrap_or(-1)",
        |_, _| Type::Int,
    ),
    method(MATCH, "end", &[], "{recv}.get(0).map(|m| m.end() as i64).unwrap_or(-1)", |_, _| {
        Type::Int
    }),
    method(
        MATCH,
        "span",
        &[],
        "{recv}.get(0).map(|m| (m.start() as i64, m.end() as i64)).unwrap_or((-1, -1))",
        |_, _| Type::Tuple(vec![Type::Int, Type::Int]),
    ),
    // --- hashlib ---
    method(
        Family::Native("hashlib.Hash"),
        "hexdigest",
        &[],
        "hex::encode(&{recv})",
        |_, _| Type::Str,
    )
    .needs(Dependency::Hex),
    method(Family::Native("hashlib.Hash"), "digest", &[], "{recv}.clone()", |_, _| {
        Type::Bytes
    }),
    // --- subprocess.CompletedProcess ---
    attribute(
        Family::Native("subprocess.CompletedProcess"),
        "returncode",
        "({recv}.status.code().unwrap_or(-1) as i64)",
        |_, _| Type::Int,
    ),
    attribute(
        Family::Native("subprocess.CompletedProcess"),
        "stdout",
        "String::from_utf8_lossy(&{recv}.stdout).to_string()",
        |_, _| Type::Str,
    ),
    attribute(
        Family::Native("subprocess.CompletedProcess"),
        "stderr",
        "String::from_utf8_lossy(&{recv}.stderr).to_string()",
        |_, _| Type::Str,
    ),
    // --- pathlib.Path ---
    method(PATH, "exists", &[], "{recv}.exists()", |_, _| Type::Bool),
    method(PATH, "is_file", &[], "{recv}.is_file()", |_, _| Type::Bool),
    method(PATH, "is_dir", &[], "{recv}.is_dir()", |_, _| Type::Bool),
    method(
        PATH,
        "read_text",
        &[],
        r#"std::fs::read_to_string(&{recv}).expect("FileNotFoundError: cannot read file")"#,
        |_, _| Type::Str,
    ),
    method(
        PATH,
        "write_text",
        &["data"],
        r#"std::fs::write(&{recv}, {s0}).expect("OSError: cannot write file")"#,
        |_, _| Type::None,
    ),
    method(PATH, "joinpath", &["other"], "{recv}.join({s0})", |recv, _| recv.clone()),
    method(
        PATH,
        "mkdir",
        &["parents=false", "exist_ok=false"],
        r#"std::fs::create_dir_all(&{recv}).expect("OSError: cannot create directory")"#,
        |_, _| Type::None,
    ),
    method(
        PATH,
        "iterdir",
        &[],
        "std::fs::read_dir(&{recv}).map(|rd| rd.filter_map(|e| e.ok()).map(|e| e.path()).collect::<Vec<_>>()).unwrap_or_default()",
        |recv, _| Type::list(recv.clone()),
    ),
    attribute(
        PATH,
        "name",
        "{recv}.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default()",
        |_, _| Type::Str,
    ),
    attribute(
        PATH,
        "stem",
        "{recv}.file_stem().map(|n| n.to_string_lossy().to_string()).unwrap_or_default()",
        |_, _| Type::Str,
    ),
    attribute(
        PATH,
        "suffix",
        "{recv}.extension().map(|e| format!(\".{}\", e.to_string_lossy())).unwrap_or_default()",
        |_, _| Type::Str,
    ),
    attribute(
        PATH,
        "parent",
        "{recv}.parent().map(|p| p.to_path_buf()).unwrap_or_default()",
        |recv, _| recv.clone(),
    ),
    // --- datetime ---
    method(
        DATETIME,
        "strftime",
        &["format"],
        "{recv}.format({s0}).to_string()",
        |_, _| Type::Str,
    ),
    method(
        DATETIME,
        "isoformat",
        &[],
        "{recv}.format(\"%Y-%m-%dT%H:%M:%S\").to_string()",
        |_, _| Type::Str,
    ),
    method(DATE, "strftime", &["format"], "{recv}.format({s0}).to_string()", |_, _| Type::Str),
    method(DATE, "isoformat", &[], "{recv}.format(\"%Y-%m-%d\").to_string()", |_, _| {
        Type::Str
    }),
    attribute(DATETIME, "year", "(chrono::Datelike::year(&{recv}) as i64)", |_, _| Type::Int),
    attribute(DATETIME, "month", "(chrono::Datelike::month(&{recv}) as i64)", |_, _| Type::Int),
    attribute(DATETIME, "day", "(chrono::Datelike::day(&{recv}) as i64)", |_, _| Type::Int),
    attribute(DATETIME, "hour", "(chrono::Timelike::hour(&{recv}) as i64)", |_, _| Type::Int),
    attribute(DATETIME, "minute", "(chrono::Timelike::minute(&{recv}) as i64)", |_, _| {
        Type::Int
    }),
    attribute(DATETIME, "second", "(chrono::Timelike::second(&{recv}) as i64)", |_, _| {
        Type::Int
    }),
    attribute(DATE, "year", "(chrono::Datelike::year(&{recv}) as i64)", |_, _| Type::Int),
    attribute(DATE, "month", "(chrono::Datelike::month(&{recv}) as i64)", |_, _| Type::Int),
    attribute(DATE, "day", "(chrono::Datelike::day(&{recv}) as i64)", |_, _| Type::Int),
    attribute(TIMEDELTA, "days", "{recv}.num_days()", |_, _| Type::Int),
    attribute(TIMEDELTA, "seconds", "({recv}.num_seconds() % 86400)", |_, _| Type::Int),
    method(
        TIMEDELTA,
        "total_seconds",
        &[],
        "({recv}.num_milliseconds() as f64 / 1000.0)",
        |_, _| Type::Float,
    ),
    // --- file objects ---
    method(
        FILE,
        "read",
        &[],
        r#"{ let mut _s = String::new(); std::io::Read::read_to_string(&mut {recv}, &mut _s).expect("IOError: read failed"); _s }"#,
        |_, _| Type::Str,
    )
    .mutating(),
    method(
        FILE,
        "readlines",
        &[],
        r#"{ let mut _s = String::new(); std::io::Read::read_to_string(&mut {recv}, &mut _s).expect("IOError: read failed"); _s.lines().map(|l| format!("{}\n", l)).collect::<Vec<String>>() }"#,
        |_, _| Type::list(Type::Str),
    )
    .mutating(),
    method(
        FILE,
        "write",
        &["data"],
        r#"std::io::Write::write_all(&mut {recv}, {s0}.as_bytes()).expect("IOError: write failed")"#,
        |_, _| Type::None,
    )
    .mutating(),
    method(FILE, "close", &[], "()", |_, _| Type::None),
];

static METHOD_INDEX: Lazy<HashMap<&'static str, Vec<&'static MethodSpec>>> = Lazy::new(|| {
    let mut index: HashMap<&'static str, Vec<&'static MethodSpec>> = HashMap::new();
    for spec in METHOD_SPECS {
        index.entry(spec.name).or_default().push(spec);
    }
    index
});

/// Method lowering for a receiver of type `ty` called with `argc` arguments
pub fn lookup_method(ty: &Type, name: &str, argc: usize) -> Option<&'static MethodSpec> {
    METHOD_INDEX.get(name)?.iter().copied().find(|spec| {
        !spec.attribute && spec.family.matches(ty) && accepts(spec.params, argc)
    })
}

/// Attribute lowering on a library type (`proc.returncode`)
pub fn lookup_attribute(ty: &Type, name: &str) -> Option<&'static MethodSpec> {
    METHOD_INDEX
        .get(name)?
        .iter()
        .copied()
        .find(|spec| spec.attribute && spec.family.matches(ty))
}

/// Families in which `name` is a mutating method
pub fn mutating_families(name: &str) -> Vec<Family> {
    let mut out: Vec<Family> = Vec::new();
    if let Some(specs) = METHOD_INDEX.get(name) {
        for spec in specs.iter().filter(|s| s.mutating) {
            if !out.contains(&spec.family) {
                out.push(spec.family);
            }
        }
    }
    out
}

/// Families that define `name` at all (mutating or not)
pub fn method_families(name: &str) -> Vec<Family> {
    let mut out: Vec<Family> = Vec::new();
    if let Some(specs) = METHOD_INDEX.get(name) {
        for spec in specs.iter().filter(|s| !s.attribute) {
            if !out.contains(&spec.family) {
                out.push(spec.family);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_by_receiver_type() {
        let spec = lookup_method(&Type::list(Type::Int), "append", 1).unwrap();
        assert_eq!(spec.template, "{recv}.push({0})");
        assert!(spec.mutating);
        assert!(lookup_method(&Type::Str, "append", 1).is_none());
    }

    #[test]
    fn test_dict_get_returns_option() {
        let d = Type::dict(Type::Str, Type::Int);
        let spec = lookup_method(&d, "get", 1).unwrap();
        assert_eq!((spec.ret_ty_resolver)(&d, &[Type::Str]), Type::optional(Type::Int));
        let spec = lookup_method(&d, "get", 2).unwrap();
        assert_eq!((spec.ret_ty_resolver)(&d, &[Type::Str, Type::Int]), Type::Int);
        assert!(spec.template.contains("unwrap_or"));
    }

    #[test]
    fn test_mutating_table_is_closed() {
        assert_eq!(mutating_families("append"), vec![Family::List]);
        assert_eq!(mutating_families("add"), vec![Family::Set]);
        assert_eq!(mutating_families("setdefault"), vec![Family::Dict]);
        assert!(mutating_families("upper").is_empty());
        // pop は list/dict/set の全部に現れる
        assert_eq!(mutating_families("pop").len(), 3);
    }

    #[test]
    fn test_attribute_lookup() {
        let proc = Type::Native("subprocess.CompletedProcess".to_string());
        let spec = lookup_attribute(&proc, "returncode").unwrap();
        assert!(spec.attribute);
        assert!(lookup_method(&proc, "returncode", 0).is_none());
    }

    #[test]
    fn test_str_split_arities() {
        assert!(lookup_method(&Type::Str, "split", 0)
            .unwrap()
            .template
            .contains("split_whitespace"));
        assert!(lookup_method(&Type::Str, "split", 2)
            .unwrap()
            .template
            .contains("splitn"));
    }
}
