//! emitter module tests
//!
//! Python ソース → 解析 → Rust コード。出力の断片を確かめる。

use super::*;
use crate::parser::parse;
use crate::semantic::analyze;
use pretty_assertions::assert_eq;

fn emit_with(src: &str, options: EmitOptions) -> EmitOutput {
    let module = analyze(&parse(src).unwrap()).unwrap();
    emit(&module, &options).unwrap()
}

fn emit_src(src: &str) -> EmitOutput {
    emit_with(src, EmitOptions::default())
}

fn code(src: &str) -> String {
    emit_src(src).code
}

// --- 関数 ---

#[test]
fn test_simple_function_signature() {
    let out = emit_src("def add(x: int, y: int) -> int:\n    return x + y\n");
    assert!(out.code.contains("fn add(x: i64, y: i64) -> i64"));
    assert!(out.code.contains("x + y"));
    assert!(out.dependencies.is_empty());
    assert!(out.error_types.is_empty());
}

#[test]
fn test_file_header_comes_first() {
    let c = code("def f() -> None:\n    pass\n");
    assert!(c.starts_with("#![allow("));
    assert!(c.lines().next().unwrap().contains("unused_labels"));
}

#[test]
fn test_verified_attrs_as_docs() {
    let c = code("def add(x: int, y: int) -> int:\n    return x + y\n");
    assert!(c.contains("/// Depyler: verified panic-free"));
    assert!(c.contains("/// Depyler: proven to terminate"));
}

#[test]
fn test_docs_can_be_disabled() {
    let src = "def add(x: int, y: int) -> int:\n    \"\"\"Sum.\"\"\"\n    return x + y\n";
    let with_docs = emit_with(src, EmitOptions::default()).code;
    assert!(with_docs.contains("/// Sum."));
    let without = emit_with(
        src,
        EmitOptions {
            library: false,
            emit_docs: false,
        },
    )
    .code;
    assert!(!without.contains("///"));
}

#[test]
fn test_none_return_has_no_arrow() {
    let c = code("def hello(name: str) -> None:\n    print(name)\n");
    assert!(c.contains("fn hello(name: &str) {"));
    assert!(c.contains("println!"));
}

#[test]
fn test_borrowed_and_mutable_params() {
    let src = "def size(s: str) -> int:\n    return len(s)\ndef push(xs: list[int]) -> None:\n    xs.append(1)\n";
    let c = code(src);
    assert!(c.contains("fn size(s: &str) -> i64"));
    assert!(c.contains("xs: &mut Vec<i64>"));
}

#[test]
fn test_readonly_list_param_is_slice() {
    let c = code("def total(xs: list[int]) -> int:\n    s = 0\n    for x in xs:\n        s += x\n    return s\n");
    assert!(c.contains("xs: &[i64]"));
    assert!(c.contains("let mut s"));
}

#[test]
fn test_optional_return_falls_through_to_none() {
    let src = "def find(xs: list[int], t: int):\n    for x in xs:\n        if x == t:\n            return x\n";
    let c = code(src);
    assert!(c.contains("-> Option<i64>"));
    assert!(c.contains("Some("));
}

#[test]
fn test_floor_division_uses_helper() {
    let c = code("def q(a: int, b: int) -> int:\n    return a // b\n");
    assert!(c.contains("py_floor_div("));
    assert!(c.contains("fn py_floor_div"));
}

#[test]
fn test_modulo_uses_helper() {
    let c = code("def r(a: int, b: int) -> int:\n    return a % b\n");
    assert!(c.contains("py_mod("));
}

#[test]
fn test_integer_power_stays_integer() {
    let c = code("def sq(x: int) -> int:\n    return x ** 2\n");
    assert!(c.contains("checked_pow"));
}

// --- 例外 ---

#[test]
fn test_raise_returns_result() {
    let src = "def check(x: int) -> int:\n    if x < 0:\n        raise ValueError('negative')\n    return x\n";
    let out = emit_src(src);
    assert!(out.code.contains("-> Result<i64, DynError>"));
    assert!(out.code.contains("pub type DynError = Box<dyn std::error::Error>;"));
    assert!(out.code.contains("pub struct ValueError"));
    assert!(out.error_types.contains(&ErrorTaxon::ValueError));
}

#[test]
fn test_caught_division_is_guarded() {
    let src = "def safe(x):\n    try:\n        return 1 / x\n    except ZeroDivisionError:\n        return 0\n";
    let out = emit_src(src);
    assert!(out.code.contains("if _d == 0.0"));
    assert!(out.code.contains("pub struct ZeroDivisionError"));
    assert!(out.error_types.contains(&ErrorTaxon::ZeroDivisionError));
    assert!(!out.code.contains("fn safe(x: i64) -> Result"));
}

#[test]
fn test_try_where_every_path_returns_ends_unreachable() {
    let src = "def parse(s: str) -> int:\n    try:\n        return int(s)\n    except ValueError:\n        return -1\n";
    let c = code(src);
    let handler = c.find("if let Some(_e").unwrap();
    let tail = c.find("unreachable!();").unwrap();
    assert!(handler < tail);
}

#[test]
fn test_try_with_fallthrough_has_no_unreachable() {
    let src = "def parse(s: str) -> int:\n    n = 0\n    try:\n        n = int(s)\n    except ValueError:\n        n = -1\n    return n\n";
    assert!(!code(src).contains("unreachable!"));
}

#[test]
fn test_exit_arguments_have_a_type() {
    let src = "class Res:\n    def __enter__(self):\n        return self\n    def __exit__(self, exc_type, exc, tb):\n        print(\"closed\")\n\ndef use_it() -> None:\n    with Res() as r:\n        print(\"inside\")\n";
    let c = code(src);
    let call = c.lines().find(|l| l.contains(".__exit__(")).unwrap();
    assert!(call.contains("None::<()>"));
    assert!(!call.contains("(None, None, None)"));
}

#[test]
fn test_user_exception_struct() {
    let src = "class AppError(Exception):\n    pass\ndef f(x: int) -> int:\n    if x == 0:\n        raise AppError('zero')\n    return x\n";
    let c = code(src);
    assert!(c.contains("pub struct AppError"));
    assert!(c.contains("impl std::error::Error for AppError {}"));
}

// --- ジェネレータ・union ---

#[test]
fn test_lazy_generator() {
    let src = "def count_up(n: int):\n    i = 0\n    while i < n:\n        yield i\n        i += 1\n";
    let c = code(src);
    assert!(c.contains("fn count_up(n: i64) -> impl Iterator<Item = i64>"));
    assert!(c.contains("std::iter::from_fn(move ||"));
    assert!(c.contains("let mut _state: usize = 0;"));
    assert!(c.contains("let mut i: i64 = Default::default();"));
    assert!(c.contains("_state = if i < n {"));
    assert!(c.contains("return Some(i);"));
    assert!(!c.contains("_out"));
}

#[test]
fn test_generator_runs_only_up_to_each_yield() {
    let src = "def two():\n    print(\"a\")\n    yield 1\n    print(\"b\")\n    yield 2\n";
    let c = code(src);
    let a = c.find("\"a\"").unwrap();
    let first = c.find("return Some(").unwrap();
    let b = c.find("\"b\"").unwrap();
    assert!(a < first && first < b);
    assert!(c.contains("_state = usize::MAX;"));
    assert!(!c.contains("VecDeque"));
}

#[test]
fn test_generator_over_huge_range_stays_lazy() {
    let src = "def naturals():\n    for i in range(10 ** 12):\n        yield i\n";
    let c = code(src);
    assert!(c.contains(": Option<Box<dyn Iterator<Item = i64>>> = None;"));
    assert!(c.contains("= Some(Box::new((0.."));
    assert!(c.contains(".as_mut().and_then(|_i| _i.next())"));
    assert!(c.contains("Some(_v) => { i = _v;"));
    assert!(!c.contains("collect::<Vec"));
    assert!(!c.contains("VecDeque"));
}

#[test]
fn test_break_in_generator_loop_moves_to_exit_state() {
    let src = "def until_negative(xs: list[int]):\n    for x in xs:\n        if x < 0:\n            break\n        yield x\n";
    let c = code(src);
    assert!(c.contains("= None; _state = "));
    assert!(c.contains("continue 'gen; }"));
    assert!(!c.contains("break;"));
}

#[test]
fn test_return_in_generator_finishes_iteration() {
    let src = "def upto(xs: list[int], stop: int):\n    for x in xs:\n        if x == stop:\n            return\n        yield x\n";
    let c = code(src);
    assert!(c.contains("{ _state = usize::MAX; return None; }"));
}

#[test]
fn test_yield_inside_with_runs_eagerly() {
    let src = "def read_lines(path: str):\n    with open(path) as f:\n        for line in f:\n            yield line\n";
    let c = code(src);
    assert!(c.contains("_out.push_back("));
    assert!(c.contains("_out.into_iter()"));
}

#[test]
fn test_isinstance_union_enum() {
    let src = "def classify(x):\n    if isinstance(x, int):\n        return \"int\"\n    if isinstance(x, str):\n        return \"str\"\n    return \"other\"\n";
    let c = code(src);
    assert!(c.contains("pub enum IntOrStr"));
    assert!(c.contains("Int(i64),"));
    assert!(c.contains("Str(String),"));
    assert!(c.contains("Other(String),"));
    assert!(c.contains("-> String"));
}

// --- ループ・辞書 ---

#[test]
fn test_loop_variable_survives_the_loop() {
    let c = code("def last(xs: list[int]) -> int:\n    for x in xs:\n        pass\n    return x\n");
    assert!(c.contains("let mut x: i64 = Default::default();"));
    assert!(c.contains("for _x_item in xs.iter()"));
    assert!(c.contains("x = *_x_item;"));
}

#[test]
fn test_for_else_search_keeps_found_item() {
    let src = "def find(xs: list[int], t: int) -> int:\n    for x in xs:\n        if x == t:\n            break\n    else:\n        return -1\n    return x\n";
    let c = code(src);
    assert!(c.contains("x = *_x_item;"));
}

#[test]
fn test_loop_variable_not_read_later_is_not_hoisted() {
    let c = code("def total(xs: list[int]) -> int:\n    s = 0\n    for x in xs:\n        s += x\n    return s\n");
    assert!(!c.contains("_x_item"));
    assert!(c.contains("for x in xs.iter()"));
}

#[test]
fn test_defaultdict_of_lists() {
    let src = "from collections import defaultdict\ndef group(words: list[str]) -> dict[str, list[str]]:\n    groups = defaultdict(list)\n    for w in words:\n        groups[w].append(w)\n    return groups\n";
    let c = code(src);
    assert!(c.contains("HashMap::new()"));
    assert!(c.contains(".entry("));
    assert!(c.contains(".or_default())"));
}

#[test]
fn test_counter_increment_fills_missing_key() {
    let src = "from collections import Counter\ndef tally(words: list[str]) -> dict[str, int]:\n    c = Counter()\n    for w in words:\n        c[w] += 1\n    return c\n";
    let c = code(src);
    assert!(c.contains(".or_default())"));
    assert!(!c.contains("KeyError: key not found"));
}

#[test]
fn test_locked_global_read_is_an_expression() {
    let src = "calls = [0]\ndef tick() -> int:\n    calls[0] += 1\n    return calls[0]\n";
    let c = code(src);
    assert!(c.contains("({ let _g = CALLS.lock().unwrap(); _g.clone() })"));
}

#[test]
fn test_literal_receivers_are_typed() {
    let c = code("def f() -> int:\n    return abs(-3)\ndef g() -> float:\n    return 2.0 ** 0.5\n");
    assert!(c.contains("(-3i64).abs()"));
    assert!(c.contains("2.0f64.powf("));
}

#[test]
fn test_printed_containers_use_python_repr() {
    let c = code("print([\"a\", \"b\"], (\"x\", 1), {\"k\": \"v\"})\n");
    assert!(c.contains("trait PyRepr"));
    let line = c.lines().find(|l| l.contains("println!")).unwrap();
    assert_eq!(line.matches(".py_repr()").count(), 3);
    assert!(!line.contains("{:?}"));
}

#[test]
fn test_str_of_list_uses_python_repr() {
    let c = code("def show(xs: list[str]) -> str:\n    return str(xs)\n");
    assert!(c.contains("xs.py_repr()"));
}

// --- クラス ---

#[test]
fn test_class_struct_and_methods() {
    let src = "class Counter:\n    def __init__(self, start: int):\n        self.count = start\n    def bump(self) -> None:\n        self.count += 1\n    def get(self) -> int:\n        return self.count\n";
    let c = code(src);
    assert!(c.contains("struct Counter {"));
    assert!(c.contains("pub count: i64,"));
    assert!(c.contains("impl Counter {"));
    assert!(c.contains("pub fn new("));
    assert!(c.contains("pub fn bump(&mut self)"));
    assert!(c.contains("pub fn get(&self) -> i64"));
}

#[test]
fn test_dataclass_constructor() {
    let src = "from dataclasses import dataclass\n@dataclass\nclass Point:\n    x: float\n    y: float\n";
    let c = code(src);
    assert!(c.contains("pub x: f64,"));
    assert!(c.contains("pub fn new(x: f64, y: f64) -> Self"));
}

#[test]
fn test_str_method_gives_display() {
    let src = "class P:\n    def __init__(self, n: str):\n        self.n = n\n    def __str__(self) -> str:\n        return self.n\n";
    let c = code(src);
    assert!(c.contains("impl std::fmt::Display for P"));
}

// --- モジュール ---

#[test]
fn test_loose_statements_become_main() {
    let c = code("x = 1\nprint(x)\n");
    assert!(c.contains("fn main() {"));
}

#[test]
fn test_user_main_is_reused() {
    let c = code("def main() -> None:\n    print(1)\nif __name__ == '__main__':\n    main()\n");
    assert_eq!(c.matches("fn main()").count(), 1);
}

#[test]
fn test_renamed_main() {
    let c = code("def main(n: int) -> int:\n    return n\nprint(main(3))\n");
    assert!(c.contains("fn py_main(n: i64) -> i64"));
    assert!(c.contains("fn main() {"));
}

#[test]
fn test_library_has_no_main() {
    let out = emit_with(
        "def double(x: int) -> int:\n    return x * 2\n",
        EmitOptions {
            library: true,
            emit_docs: true,
        },
    );
    assert!(out.code.contains("pub fn double(x: i64) -> i64"));
    assert!(!out.code.contains("fn main()"));
    assert!(!out.code.contains("fn run()"));
}

#[test]
fn test_upper_case_literal_is_const() {
    let c = code("MAX = 10\ndef limit() -> int:\n    return MAX\n");
    assert!(c.contains("const MAX: i64 = 10;"));
}

#[test]
fn test_mutated_global_is_locked_static() {
    let src = "CACHE: dict[str, int] = {}\ndef put(k: str) -> None:\n    CACHE[k] = 1\nput('a')\n";
    let out = emit_src(src);
    assert!(out
        .code
        .contains("once_cell::sync::Lazy<std::sync::Mutex<HashMap<String, i64>>>"));
    assert!(out.dependencies.contains(&Dependency::OnceCell));
    assert!(out.dependencies.contains(&Dependency::HashMap));
}

// --- 依存 ---

#[test]
fn test_hashmap_dependency_and_use() {
    let src = "def freq(items: list[str]) -> dict[str, int]:\n    d = {}\n    for x in items:\n        d[x] = d.get(x, 0) + 1\n    return d\n";
    let out = emit_src(src);
    assert!(out.code.contains("use std::collections::HashMap;"));
    assert!(out.code.contains("unwrap_or(0)"));
    assert!(out.dependencies.contains(&Dependency::HashMap));
}

#[test]
fn test_regex_dependency() {
    let src = "import re\ndef find_ints(s: str) -> list[str]:\n    return re.findall(r\"\\d+\", s)\n";
    let out = emit_src(src);
    assert!(out.code.contains("regex::"));
    assert!(out.code.contains("-> Vec<String>"));
    assert!(out.dependencies.contains(&Dependency::Regex));
}

#[test]
fn test_flags_only_for_used_features() {
    let out = emit_src("def f(s: str) -> int:\n    return len(s)\n");
    assert!(out.dependencies.is_empty());
}

#[test]
fn test_emit_is_deterministic() {
    let src = "import re\nclass C:\n    def __init__(self):\n        self.seen = set()\n    def add(self, s: str) -> None:\n        self.seen.add(s)\ndef words(s: str) -> list[str]:\n    return re.findall(r\"\\w+\", s)\n";
    let module = analyze(&parse(src).unwrap()).unwrap();
    let a = emit(&module, &EmitOptions::default()).unwrap();
    let b = emit(&module, &EmitOptions::default()).unwrap();
    assert_eq!(a.code, b.code);
    assert_eq!(a.dependencies, b.dependencies);
}

#[test]
fn test_used_dependencies_filters_unused() {
    let registered: BTreeSet<Dependency> = [Dependency::Regex, Dependency::Chrono].into_iter().collect();
    let deps = used_dependencies(&registered, "let re = regex::Regex::new(\"a\");");
    assert_eq!(deps, [Dependency::Regex].into_iter().collect());
}

// --- リテラル ---

#[test]
fn test_int_text_keeps_base() {
    assert_eq!(int_text("0xFF", 255), "0xff");
    assert_eq!(int_text("1_000", 1000), "1_000");
    assert_eq!(int_text("", 7), "7");
}

#[test]
fn test_float_text_is_valid_rust() {
    assert_eq!(float_text("1."), "1.0");
    assert_eq!(float_text(".5"), "0.5");
    assert_eq!(float_text("3"), "3.0");
    assert_eq!(float_text("1e5"), "1e5");
}
