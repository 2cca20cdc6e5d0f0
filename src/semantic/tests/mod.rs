//! semantic module tests
//!
//! ソース → HIR (ブリッジ + 推論パス) を通して結果を確かめる。

use super::*;
use crate::parser::parse;
use pretty_assertions::assert_eq;

fn analyzed(src: &str) -> HirModule {
    analyze(&parse(src).unwrap()).unwrap()
}

fn rejected(src: &str) -> DepylerError {
    analyze(&parse(src).unwrap()).unwrap_err()
}

fn unsupported_detail(src: &str) -> String {
    match rejected(src) {
        DepylerError::UnsupportedSyntax { detail, .. } => detail,
        other => panic!("expected UnsupportedSyntax, got {other:?}"),
    }
}

fn func<'a>(m: &'a HirModule, name: &str) -> &'a HirFunction {
    m.function(name)
        .unwrap_or_else(|| panic!("function {name} not found"))
}

// --- ブリッジ ---

#[test]
fn test_main_guard_is_inlined() {
    let m = analyzed("def f() -> int:\n    return 1\nif __name__ == \"__main__\":\n    print(f())\n");
    assert!(m.items.iter().any(|s| matches!(s.kind, HirStmtKind::Expr(_))));
    assert!(!m.items.iter().any(|s| matches!(s.kind, HirStmtKind::If { .. })));
}

#[test]
fn test_user_main_kept_when_guard_only_calls_it() {
    let m = analyzed("def main():\n    print(1)\nif __name__ == '__main__':\n    main()\n");
    assert!(m.function("main").is_some());
    assert!(m.function("py_main").is_none());
    assert_eq!(m.items.len(), 1);
}

#[test]
fn test_user_main_renamed_with_loose_statements() {
    let m = analyzed("def main(n: int) -> int:\n    return n\nprint(main(3))\n");
    assert!(m.function("py_main").is_some());
    assert!(m.function("main").is_none());
}

#[test]
fn test_docstring_is_split_off() {
    let m = analyzed("def f() -> None:\n    \"\"\"Does nothing.\"\"\"\n    pass\n");
    let f = func(&m, "f");
    assert_eq!(f.docstring.as_deref(), Some("Does nothing."));
    assert_eq!(f.body.len(), 1);
}

#[test]
fn test_for_else_uses_flag() {
    let src = "def f(xs: list[int]) -> None:\n    for x in xs:\n        if x == 0:\n            break\n    else:\n        print('none')\n";
    let m = analyzed(src);
    let body = &func(&m, "f").body;
    assert_eq!(body.len(), 3);
    assert!(matches!(
        &body[0].kind,
        HirStmtKind::Assign { target: AssignTarget::Name(n), annotation: Some(Type::Bool), .. }
            if n.starts_with("_broke")
    ));
    assert!(matches!(body[1].kind, HirStmtKind::For { .. }));
    assert!(matches!(body[2].kind, HirStmtKind::If { .. }));
}

#[test]
fn test_chained_assignment_copies_first_target() {
    let m = analyzed("a = b = 0\n");
    assert_eq!(m.items.len(), 2);
    let HirStmtKind::Assign { value, .. } = &m.items[1].kind else {
        panic!("expected Assign");
    };
    assert_eq!(value.as_name(), Some("a"));
}

#[test]
fn test_unresolved_name() {
    let err = rejected("def f() -> int:\n    return missing\n");
    assert!(matches!(err, DepylerError::NameResolution { ref name, .. } if name == "missing"));
}

#[test]
fn test_import_alias_resolves_to_path() {
    let m = analyzed("import math as m\nx = m.sqrt(2.0)\n");
    assert_eq!(m.imports.len(), 1);
    let HirStmtKind::Assign { value, .. } = &m.items.last().unwrap().kind else {
        panic!("expected Assign");
    };
    assert!(matches!(&value.kind, HirExprKind::Call { func, .. } if func == "math.sqrt"));
    assert_eq!(value.ty, Type::Float);
}

// --- 未対応構文 ---

#[test]
fn test_rejected_constructs() {
    let cases = [
        ("x = [1]\ndel x[0]\n", "del statement"),
        ("match x:\n    case 1:\n        pass\n", "match statement"),
        ("n = 0\ndef f() -> None:\n    global n\n    n = 1\n", "global declaration inside a function"),
        ("exec('x = 1')\n", "exec()"),
        ("eval('1')\n", "eval()"),
        ("class A:\n    pass\nx = getattr(A(), 'y')\n", "getattr()"),
        ("class M(type):\n    pass\nclass A(metaclass=M):\n    pass\n", "metaclass"),
        ("class A:\n    pass\nclass B:\n    pass\nclass C(A, B):\n    pass\n", "multiple inheritance"),
        ("def g(xs: list[int]):\n    yield from xs\n", "yield from"),
        ("def f(a: int) -> int:\n    return a\nxs = [1]\nf(*xs)\n", "star-args in call"),
        ("f = lambda a=1: a\n", "lambda parameter defaults"),
        ("def f(*args) -> None:\n    pass\n", "variadic parameters (*args / **kwargs)"),
    ];
    for (src, detail) in cases {
        assert_eq!(unsupported_detail(src), detail, "{src}");
    }
}

#[test]
fn test_registry_can_allow_del() {
    let mut registry = UnsupportedFeatureRegistry::default();
    registry.disable(UnsupportedFeature::DelStatement);
    let program = parse("x = [1]\ndel x[0]\n").unwrap();
    assert!(analyze_with_registry(&program, registry).is_ok());
}

#[test]
fn test_user_getattr_is_not_reflection() {
    let src = "def getattr(o: int, name: str) -> int:\n    return o\nx = getattr(1, 'a')\n";
    assert!(analyze(&parse(src).unwrap()).is_ok());
}

// --- 型推論 ---

#[test]
fn test_annotated_signature() {
    let m = analyzed("def add(x: int, y: int) -> int:\n    return x + y\n");
    let f = func(&m, "add");
    assert_eq!(f.params[0].ty, Type::Int);
    assert_eq!(f.ret, Type::Int);
    assert!(f.ret_annotated);
}

#[test]
fn test_local_and_return_inferred() {
    let src = "def total(n: int):\n    acc = 0\n    for i in range(n):\n        acc += i\n    return acc\n";
    let m = analyzed(src);
    let f = func(&m, "total");
    assert_eq!(f.locals.get("acc"), Some(&Type::Int));
    assert_eq!(f.locals.get("i"), Some(&Type::Int));
    assert_eq!(f.ret, Type::Int);
}

#[test]
fn test_no_return_is_none() {
    let m = analyzed("def hello():\n    print('hi')\n");
    assert_eq!(func(&m, "hello").ret, Type::None);
}

#[test]
fn test_isinstance_param_becomes_union() {
    let src = "def classify(x):\n    if isinstance(x, int):\n        return \"int\"\n    if isinstance(x, str):\n        return \"str\"\n    return \"other\"\n";
    let m = analyzed(src);
    let f = func(&m, "classify");
    assert_eq!(f.params[0].ty, Type::Union(vec![Type::Int, Type::Str]));
    assert_eq!(f.ret, Type::Str);
}

#[test]
fn test_optional_return() {
    let src = "def find(xs: list[int], t: int):\n    for x in xs:\n        if x == t:\n            return x\n    return None\n";
    let m = analyzed(src);
    assert_eq!(func(&m, "find").ret, Type::optional(Type::Int));
}

#[test]
fn test_call_site_types_flow_into_params() {
    let src = "def double(v):\n    return v * 2\nprint(double(21))\n";
    let m = analyzed(src);
    let f = func(&m, "double");
    assert_eq!(f.params[0].ty, Type::Int);
    assert_eq!(f.ret, Type::Int);
}

#[test]
fn test_empty_dict_refined_by_use() {
    let src = "def freq(items: list[str]) -> dict[str, int]:\n    d = {}\n    for x in items:\n        d[x] = 1\n    return d\n";
    let m = analyzed(src);
    let f = func(&m, "freq");
    assert_eq!(f.locals.get("d"), Some(&Type::dict(Type::Str, Type::Int)));
}

#[test]
fn test_generator_flag() {
    let src = "def count_up(n: int):\n    i = 0\n    while i < n:\n        yield i\n        i += 1\n";
    let m = analyzed(src);
    let f = func(&m, "count_up");
    assert!(f.attrs.generator);
    assert_eq!(f.ret.element(), Type::Int);
}

#[test]
fn test_str_plus_int_is_type_error() {
    let err = rejected("def f(s: str) -> str:\n    return s + 1\n");
    assert!(matches!(err, DepylerError::UnmappableType { .. }));
}

#[test]
fn test_untyped_divisor_is_numeric() {
    let src = "def safe(x):\n    try:\n        return 1 / x\n    except ZeroDivisionError:\n        return 0\n";
    let m = analyzed(src);
    assert_eq!(func(&m, "safe").params[0].ty, Type::Int);
}

#[test]
fn test_untyped_subtraction_operands_are_numeric() {
    let m = analyzed("def gap(a, b):\n    return a - b\n");
    let f = func(&m, "gap");
    assert_eq!(f.params[0].ty, Type::Int);
    assert_eq!(f.params[1].ty, Type::Int);
}

#[test]
fn test_method_family_types_untyped_param() {
    let m = analyzed("def f(items):\n    items.append(1)\n    return items\n");
    let f = func(&m, "f");
    assert_eq!(f.params[0].ty, Type::list(Type::Int));
    assert_eq!(f.ret, Type::list(Type::Int));
}

#[test]
fn test_set_method_family_on_param() {
    let m = analyzed("def mark(seen, k: str) -> None:\n    seen.add(k)\n");
    assert_eq!(func(&m, "mark").params[0].ty, Type::set(Type::Str));
}

#[test]
fn test_list_key_is_rejected() {
    let err = rejected("d = {[1]: 2}\n");
    assert!(matches!(err, DepylerError::UnmappableType { .. }));
}

#[test]
fn test_set_of_lists_is_rejected() {
    let err = rejected("def f(xs: list[int]) -> None:\n    s = {xs}\n");
    assert!(matches!(err, DepylerError::UnmappableType { .. }));
}

#[test]
fn test_dict_annotation_with_list_key_is_rejected() {
    let err = rejected("def f(d: dict[list[int], int]) -> int:\n    return len(d)\n");
    assert!(matches!(err, DepylerError::UnmappableType { .. }));
}

#[test]
fn test_tuple_key_is_accepted() {
    let m = analyzed("def f() -> int:\n    d = {(1, 2): 3}\n    return d[(1, 2)]\n");
    assert_eq!(
        func(&m, "f").locals.get("d"),
        Some(&Type::dict(Type::Tuple(vec![Type::Int, Type::Int]), Type::Int))
    );
}

// --- 所有権・可変性 ---

#[test]
fn test_mutated_param_is_borrow_mut() {
    let m = analyzed("def push(xs: list[int]) -> None:\n    xs.append(1)\n");
    assert_eq!(func(&m, "push").params[0].mode, ParamMode::BorrowMut);
}

#[test]
fn test_read_only_param_is_borrowed() {
    let m = analyzed("def size(s: str) -> int:\n    return len(s)\n");
    assert_eq!(func(&m, "size").params[0].mode, ParamMode::Borrow);
}

#[test]
fn test_returned_param_is_by_value() {
    let m = analyzed("def ident(s: str) -> str:\n    return s\n");
    assert_eq!(func(&m, "ident").params[0].mode, ParamMode::ByValue);
}

#[test]
fn test_copy_param_is_by_value() {
    let m = analyzed("def inc(n: int) -> int:\n    return n + 1\n");
    assert_eq!(func(&m, "inc").params[0].mode, ParamMode::ByValue);
}

#[test]
fn test_reassigned_local_is_mutable() {
    let m = analyzed("def f() -> int:\n    x = 1\n    y = 2\n    x += y\n    return x\n");
    let f = func(&m, "f");
    assert!(f.mutable_vars.contains("x"));
    assert!(!f.mutable_vars.contains("y"));
}

#[test]
fn test_global_mutated_from_function() {
    let m = analyzed("CACHE: dict[str, int] = {}\ndef put(k: str) -> None:\n    CACHE[k] = 1\n");
    assert!(m.mutable_globals.contains("CACHE"));
}

// --- 失敗可能性・関数属性 ---

#[test]
fn test_raise_makes_function_fallible() {
    let src = "def check(x: int) -> int:\n    if x < 0:\n        raise ValueError('negative')\n    return x\n";
    let m = analyzed(src);
    let f = func(&m, "check");
    assert!(f.attrs.can_fail);
    assert!(!f.attrs.panic_free);
}

#[test]
fn test_caught_exception_is_not_fallible() {
    let src = "def safe(x: int) -> int:\n    try:\n        if x < 0:\n            raise ValueError('neg')\n        return x\n    except ValueError:\n        return 0\n";
    let m = analyzed(src);
    assert!(!func(&m, "safe").attrs.can_fail);
}

#[test]
fn test_fallibility_propagates_to_callers() {
    let src = "def inner(x: int) -> int:\n    if x == 0:\n        raise ValueError('zero')\n    return x\ndef outer(x: int) -> int:\n    return inner(x) + 1\n";
    let m = analyzed(src);
    assert!(func(&m, "outer").attrs.can_fail);
}

#[test]
fn test_pure_terminating_attrs() {
    let m = analyzed("def add(x: int, y: int) -> int:\n    return x + y\n");
    let attrs = &func(&m, "add").attrs;
    assert!(attrs.pure);
    assert!(attrs.terminating);
    assert!(attrs.panic_free);
}

#[test]
fn test_while_loop_is_not_proven_terminating() {
    let src = "def spin(n: int) -> int:\n    while n > 0:\n        n -= 1\n    return n\n";
    let m = analyzed(src);
    assert!(!func(&m, "spin").attrs.terminating);
}

#[test]
fn test_print_is_impure() {
    let m = analyzed("def say(s: str) -> None:\n    print(s)\n");
    assert!(!func(&m, "say").attrs.pure);
}

// --- クラス ---

#[test]
fn test_instance_fields_collected_from_init() {
    let src = "class Counter:\n    def __init__(self, start: int):\n        self.count = start\n    def bump(self) -> None:\n        self.count += 1\n";
    let m = analyzed(src);
    let c = m.class("Counter").unwrap();
    assert_eq!(c.fields.len(), 1);
    assert_eq!(c.fields[0].name, "count");
    assert_eq!(c.fields[0].ty, Type::Int);
    assert!(c.method("bump").unwrap().attrs.self_mut);
}

#[test]
fn test_dataclass_fields() {
    let src = "from dataclasses import dataclass\n@dataclass\nclass Point:\n    x: float\n    y: float = 0.0\n";
    let m = analyzed(src);
    let c = m.class("Point").unwrap();
    assert!(c.is_dataclass);
    assert_eq!(c.fields.len(), 2);
    assert!(c.fields[1].default.is_some());
}

#[test]
fn test_exception_class_keeps_builtin_base() {
    let src = "class AppError(ValueError):\n    pass\nclass DbError(AppError):\n    pass\n";
    let m = analyzed(src);
    let app = m.class("AppError").unwrap();
    assert!(app.is_exception);
    assert_eq!(app.base.as_deref(), Some("ValueError"));
    let db = m.class("DbError").unwrap();
    assert!(db.is_exception);
    assert_eq!(db.base.as_deref(), Some("AppError"));
}

#[test]
fn test_single_inheritance_base() {
    let src = "class Animal:\n    def __init__(self, name: str):\n        self.name = name\nclass Dog(Animal):\n    def speak(self) -> str:\n        return self.name\n";
    let m = analyzed(src);
    assert_eq!(m.class("Dog").unwrap().base.as_deref(), Some("Animal"));
}

#[test]
fn test_property_and_setter() {
    let src = "class Temp:\n    def __init__(self):\n        self._c = 0.0\n    @property\n    def c(self) -> float:\n        return self._c\n    @c.setter\n    def c(self, v: float) -> None:\n        self._c = v\n";
    let m = analyzed(src);
    let c = m.class("Temp").unwrap();
    assert!(c.properties.contains("c"));
    assert!(c
        .methods
        .iter()
        .any(|m| m.attrs.setter_of.as_deref() == Some("c")));
    assert!(c.field("c").is_none());
}

#[test]
fn test_class_constants() {
    let m = analyzed("class Limits:\n    MAX = 10\n");
    let c = m.class("Limits").unwrap();
    assert_eq!(c.class_attrs.len(), 1);
    assert_eq!(c.class_attrs[0].0, "MAX");
}

#[test]
fn test_exception_hierarchy_from_module() {
    let m = analyzed("class AppError(Exception):\n    pass\n");
    let h = ExceptionHierarchy::from_module(&m);
    assert!(h.is_user_exception("AppError"));
    assert!(h.catches("Exception", "AppError"));
    assert!(!h.catches("ValueError", "AppError"));
}

// --- 推論の決定性 ---

#[test]
fn test_analysis_is_deterministic() {
    let src = "def f(xs: list[int]) -> int:\n    s = 0\n    for x in xs:\n        s += x\n    return s\n";
    assert_eq!(analyzed(src), analyzed(src));
}
