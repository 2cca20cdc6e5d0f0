//! parser module tests

use super::*;
use pretty_assertions::assert_eq;

fn parse_one(src: &str) -> Stmt {
    let mut program = parse(src).unwrap();
    assert_eq!(program.body.len(), 1, "{src}");
    program.body.remove(0)
}

fn parse_expr(src: &str) -> Expr {
    match parse_one(src).kind {
        StmtKind::Expr(e) => e,
        other => panic!("expected expression statement, got {other:?}"),
    }
}

#[test]
fn test_parse_simple_assignment() {
    let stmt = parse_one("x: int = 10");
    let StmtKind::AnnAssign {
        target,
        annotation,
        value,
    } = stmt.kind
    else {
        panic!("expected AnnAssign");
    };
    assert_eq!(target.as_ident(), Some("x"));
    assert_eq!(annotation.as_ident(), Some("int"));
    assert!(matches!(
        value.map(|v| v.kind),
        Some(ExprKind::IntLiteral { value: 10, .. })
    ));
}

#[test]
fn test_positions_are_one_based() {
    let program = parse("x = 1\n\ny = 2\n").unwrap();
    assert_eq!(program.body[0].pos, SourcePos::new(1, 1));
    assert_eq!(program.body[1].pos, SourcePos::new(3, 1));
}

#[test]
fn test_parse_function_def() {
    let code = r#"
def add(a: int, b: int = 2) -> int:
    return a + b
"#;
    let StmtKind::FuncDef(f) = parse_one(code).kind else {
        panic!("expected FuncDef");
    };
    assert_eq!(f.name, "add");
    assert_eq!(f.params.len(), 2);
    assert!(f.params[1].default.is_some());
    assert_eq!(f.returns.as_ref().and_then(|r| r.as_ident()), Some("int"));
    assert!(matches!(f.body[0].kind, StmtKind::Return(Some(_))));
    assert!(!f.is_async);
}

#[test]
fn test_parse_variadic_params() {
    let StmtKind::FuncDef(f) = parse_one("def f(a, *args, **kwargs):\n    pass\n").kind else {
        panic!("expected FuncDef");
    };
    assert_eq!(f.params.len(), 1);
    assert_eq!(f.vararg.map(|p| p.name), Some("args".to_string()));
    assert_eq!(f.kwarg.map(|p| p.name), Some("kwargs".to_string()));
}

#[test]
fn test_parse_decorated_async_def() {
    let code = "@staticmethod\nasync def fetch() -> int:\n    return await get()\n";
    let StmtKind::FuncDef(f) = parse_one(code).kind else {
        panic!("expected FuncDef");
    };
    assert!(f.is_async);
    assert_eq!(f.decorators.len(), 1);
    let StmtKind::Return(Some(value)) = &f.body[0].kind else {
        panic!("expected return");
    };
    assert!(matches!(value.kind, ExprKind::Await(_)));
}

#[test]
fn test_parse_class_with_base_and_keywords() {
    let code = "class Point(Base, metaclass=Meta):\n    x: int\n    def norm(self) -> int:\n        return self.x\n";
    let StmtKind::ClassDef(c) = parse_one(code).kind else {
        panic!("expected ClassDef");
    };
    assert_eq!(c.name, "Point");
    assert_eq!(c.bases.len(), 1);
    assert_eq!(c.keywords[0].0, "metaclass");
    assert_eq!(c.body.len(), 2);
}

#[test]
fn test_elif_is_nested_if() {
    let code = "if a:\n    x = 1\nelif b:\n    x = 2\nelse:\n    x = 3\n";
    let StmtKind::If { orelse, .. } = parse_one(code).kind else {
        panic!("expected If");
    };
    assert_eq!(orelse.len(), 1);
    let StmtKind::If { orelse: inner, .. } = &orelse[0].kind else {
        panic!("expected nested If");
    };
    assert_eq!(inner.len(), 1);
}

#[test]
fn test_for_with_tuple_target_and_else() {
    let code = "for i, v in enumerate(xs):\n    pass\nelse:\n    pass\n";
    let StmtKind::For { target, orelse, .. } = parse_one(code).kind else {
        panic!("expected For");
    };
    assert!(matches!(target.kind, ExprKind::Tuple(ref items) if items.len() == 2));
    assert_eq!(orelse.len(), 1);
}

#[test]
fn test_parse_try_handlers() {
    let code = r#"
try:
    risky()
except (ValueError, KeyError) as e:
    handle(e)
except:
    pass
else:
    ok()
finally:
    done()
"#;
    let StmtKind::Try {
        handlers,
        orelse,
        finalbody,
        ..
    } = parse_one(code).kind
    else {
        panic!("expected Try");
    };
    assert_eq!(handlers.len(), 2);
    assert_eq!(handlers[0].name.as_deref(), Some("e"));
    assert!(matches!(handlers[0].typ.as_ref().map(|t| &t.kind), Some(ExprKind::Tuple(_))));
    assert!(handlers[1].typ.is_none());
    assert_eq!(orelse.len(), 1);
    assert_eq!(finalbody.len(), 1);
}

#[test]
fn test_try_without_handlers_is_error() {
    let err = parse("try:\n    x = 1\ny = 2\n").unwrap_err();
    assert!(matches!(err, DepylerError::ParseError { .. }));
}

#[test]
fn test_parse_with_items() {
    let code = "with open(p) as f, lock:\n    pass\n";
    let StmtKind::With { items, is_async, .. } = parse_one(code).kind else {
        panic!("expected With");
    };
    assert!(!is_async);
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].target.as_ref().and_then(|t| t.as_ident()), Some("f"));
    assert!(items[1].target.is_none());
}

#[test]
fn test_raise_from() {
    let StmtKind::Raise { exc, cause } = parse_one("raise ValueError('x') from err").kind else {
        panic!("expected Raise");
    };
    assert!(exc.is_some());
    assert_eq!(cause.as_ref().and_then(|c| c.as_ident()), Some("err"));
}

#[test]
fn test_chained_assignment() {
    let StmtKind::Assign { targets, .. } = parse_one("a = b = 0").kind else {
        panic!("expected Assign");
    };
    assert_eq!(targets.len(), 2);
}

#[test]
fn test_aug_assign() {
    let StmtKind::AugAssign { op, .. } = parse_one("total //= 2").kind else {
        panic!("expected AugAssign");
    };
    assert_eq!(op, BinOp::FloorDiv);
}

#[test]
fn test_semicolon_separated_statements() {
    let program = parse("a = 1; b = 2\n").unwrap();
    assert_eq!(program.body.len(), 2);
}

#[test]
fn test_imports() {
    let program = parse("import numpy as np\nfrom os.path import join, exists as ex\n").unwrap();
    let StmtKind::Import(aliases) = &program.body[0].kind else {
        panic!("expected Import");
    };
    assert_eq!(aliases[0].asname.as_deref(), Some("np"));
    let StmtKind::ImportFrom { module, names, level } = &program.body[1].kind else {
        panic!("expected ImportFrom");
    };
    assert_eq!(module, "os.path");
    assert_eq!(*level, 0);
    assert_eq!(names[1].asname.as_deref(), Some("ex"));
}

#[test]
fn test_match_statement_is_recorded() {
    let code = "match cmd:\n    case 1:\n        pass\nx = 1\n";
    let program = parse(code).unwrap();
    assert_eq!(program.body[0].kind, StmtKind::Match);
    assert_eq!(program.body.len(), 2);
}

#[test]
fn test_match_as_identifier() {
    let stmt = parse_one("match = re.match(p, s)");
    assert!(matches!(stmt.kind, StmtKind::Assign { .. }));
}

#[test]
fn test_global_and_del() {
    let program = parse("global a, b\ndel xs[0], y\n").unwrap();
    assert_eq!(
        program.body[0].kind,
        StmtKind::Global(vec!["a".to_string(), "b".to_string()])
    );
    assert!(matches!(&program.body[1].kind, StmtKind::Delete(t) if t.len() == 2));
}

#[test]
fn test_assert_with_message() {
    let StmtKind::Assert { msg, .. } = parse_one("assert x > 0, 'positive'").kind else {
        panic!("expected Assert");
    };
    assert!(msg.is_some());
}

// --- 式 ---

#[test]
fn test_precedence_mul_over_add() {
    let e = parse_expr("1 + 2 * 3");
    let ExprKind::BinOp { op, right, .. } = e.kind else {
        panic!("expected BinOp");
    };
    assert_eq!(op, BinOp::Add);
    assert!(matches!(right.kind, ExprKind::BinOp { op: BinOp::Mul, .. }));
}

#[test]
fn test_unary_minus_binds_looser_than_power() {
    let e = parse_expr("-2 ** 2");
    let ExprKind::UnaryOp { op, operand } = e.kind else {
        panic!("expected UnaryOp");
    };
    assert_eq!(op, UnaryOp::Neg);
    assert!(matches!(operand.kind, ExprKind::BinOp { op: BinOp::Pow, .. }));
}

#[test]
fn test_power_is_right_associative() {
    let e = parse_expr("2 ** 3 ** 2");
    let ExprKind::BinOp { right, .. } = e.kind else {
        panic!("expected BinOp");
    };
    assert!(matches!(right.kind, ExprKind::BinOp { op: BinOp::Pow, .. }));
}

#[test]
fn test_comparison_chain_is_kept() {
    let e = parse_expr("0 <= i < n");
    let ExprKind::Compare { ops, comparators, .. } = e.kind else {
        panic!("expected Compare");
    };
    assert_eq!(ops, vec![CmpOp::LtE, CmpOp::Lt]);
    assert_eq!(comparators.len(), 2);
}

#[test]
fn test_not_in_and_is_not() {
    let e = parse_expr("a not in b");
    assert!(matches!(e.kind, ExprKind::Compare { ref ops, .. } if ops == &vec![CmpOp::NotIn]));
    let e = parse_expr("a is not None");
    assert!(matches!(e.kind, ExprKind::Compare { ref ops, .. } if ops == &vec![CmpOp::IsNot]));
}

#[test]
fn test_bool_op_flattens() {
    let e = parse_expr("a and b and c or d");
    let ExprKind::BoolOp { op, values } = e.kind else {
        panic!("expected BoolOp");
    };
    assert_eq!(op, BoolOpKind::Or);
    assert!(matches!(&values[0].kind, ExprKind::BoolOp { op: BoolOpKind::And, values } if values.len() == 3));
}

#[test]
fn test_conditional_expression() {
    let e = parse_expr("x if cond else y");
    assert!(matches!(e.kind, ExprKind::IfExp { .. }));
}

#[test]
fn test_call_with_kwargs_and_star() {
    let e = parse_expr("f(1, *rest, key=2, **opts)");
    let ExprKind::Call { args, kwargs, .. } = e.kind else {
        panic!("expected Call");
    };
    assert_eq!(args.len(), 3);
    assert!(matches!(args[1].kind, ExprKind::Starred(_)));
    assert!(matches!(args[2].kind, ExprKind::DoubleStarred(_)));
    assert_eq!(kwargs[0].0, "key");
}

#[test]
fn test_generator_argument() {
    let e = parse_expr("sum(x * x for x in xs if x > 0)");
    let ExprKind::Call { args, .. } = e.kind else {
        panic!("expected Call");
    };
    let ExprKind::GenExpr { generators, .. } = &args[0].kind else {
        panic!("expected GenExpr");
    };
    assert_eq!(generators[0].ifs.len(), 1);
}

#[test]
fn test_slices() {
    let e = parse_expr("xs[1:-1:2]");
    let ExprKind::Index { index, .. } = e.kind else {
        panic!("expected Index");
    };
    let ExprKind::Slice { lower, upper, step } = index.kind else {
        panic!("expected Slice");
    };
    assert!(lower.is_some() && upper.is_some() && step.is_some());

    let e = parse_expr("xs[::-1]");
    let ExprKind::Index { index, .. } = e.kind else {
        panic!("expected Index");
    };
    assert!(matches!(index.kind, ExprKind::Slice { lower: None, upper: None, step: Some(_) }));
}

#[test]
fn test_displays() {
    assert!(matches!(parse_expr("[]").kind, ExprKind::List(ref v) if v.is_empty()));
    assert!(matches!(parse_expr("()").kind, ExprKind::Tuple(ref v) if v.is_empty()));
    assert!(matches!(parse_expr("{}").kind, ExprKind::Dict(ref v) if v.is_empty()));
    assert!(matches!(parse_expr("{1, 2}").kind, ExprKind::Set(ref v) if v.len() == 2));
    assert!(matches!(parse_expr("(1,)").kind, ExprKind::Tuple(ref v) if v.len() == 1));
    let e = parse_expr("{'a': 1, **rest}");
    let ExprKind::Dict(entries) = e.kind else {
        panic!("expected Dict");
    };
    assert!(entries[0].0.is_some());
    assert!(entries[1].0.is_none());
}

#[test]
fn test_comprehensions() {
    assert!(matches!(parse_expr("[x for x in xs]").kind, ExprKind::ListComp { .. }));
    assert!(matches!(parse_expr("{x for x in xs}").kind, ExprKind::SetComp { .. }));
    assert!(matches!(parse_expr("{k: v for k, v in d.items()}").kind, ExprKind::DictComp { .. }));
    let e = parse_expr("[(i, j) for i in a for j in b]");
    let ExprKind::ListComp { generators, .. } = e.kind else {
        panic!("expected ListComp");
    };
    assert_eq!(generators.len(), 2);
}

#[test]
fn test_lambda() {
    let e = parse_expr("lambda a, b=1: a + b");
    let ExprKind::Lambda { params, .. } = e.kind else {
        panic!("expected Lambda");
    };
    assert_eq!(params.len(), 2);
    assert!(params[1].default.is_some());
}

#[test]
fn test_walrus_in_if() {
    let StmtKind::If { test, .. } = parse_one("if (n := len(xs)) > 3:\n    pass\n").kind else {
        panic!("expected If");
    };
    let ExprKind::Compare { left, .. } = test.kind else {
        panic!("expected Compare");
    };
    assert!(matches!(left.kind, ExprKind::NamedExpr { ref target, .. } if target == "n"));
}

#[test]
fn test_dotted_name() {
    let e = parse_expr("os.path.join");
    assert_eq!(e.dotted_name().as_deref(), Some("os.path.join"));
}

// --- 文字列 ---

#[test]
fn test_adjacent_strings_concatenate() {
    let e = parse_expr("'ab' 'cd'");
    assert_eq!(
        e.kind,
        ExprKind::StringLiteral {
            value: "abcd".to_string(),
            raw: false
        }
    );
}

#[test]
fn test_raw_string_keeps_backslashes() {
    let e = parse_expr(r#"r"\d+""#);
    assert_eq!(
        e.kind,
        ExprKind::StringLiteral {
            value: "\\d+".to_string(),
            raw: true
        }
    );
}

#[test]
fn test_escape_decoding() {
    let e = parse_expr(r#""a\tb\n""#);
    assert!(matches!(e.kind, ExprKind::StringLiteral { ref value, .. } if value == "a\tb\n"));
}

#[test]
fn test_bytes_literal() {
    assert_eq!(parse_expr("b'hi'").kind, ExprKind::BytesLiteral(b"hi".to_vec()));
}

#[test]
fn test_mixing_bytes_and_str_is_error() {
    assert!(parse("x = b'a' 'b'\n").is_err());
}

#[test]
fn test_fstring_parts() {
    let e = parse_expr(r#"f"x={x!r:>8} {{lit}} {y + 1:.2f}""#);
    let ExprKind::FString(parts) = e.kind else {
        panic!("expected FString");
    };
    assert_eq!(parts[0], FStringPart::Literal("x=".to_string()));
    let FStringPart::Expr {
        conversion,
        format_spec,
        ..
    } = &parts[1]
    else {
        panic!("expected expression part");
    };
    assert_eq!(*conversion, Some('r'));
    assert_eq!(format_spec.as_deref(), Some(">8"));
    assert_eq!(parts[2], FStringPart::Literal(" {lit} ".to_string()));
    assert!(matches!(
        &parts[3],
        FStringPart::Expr { format_spec: Some(s), value, .. }
            if s == ".2f" && matches!(value.kind, ExprKind::BinOp { .. })
    ));
}

#[test]
fn test_fstring_debug_form() {
    let e = parse_expr(r#"f"{count=}""#);
    let ExprKind::FString(parts) = e.kind else {
        panic!("expected FString");
    };
    assert_eq!(parts[0], FStringPart::Literal("count=".to_string()));
    assert!(matches!(&parts[1], FStringPart::Expr { conversion: Some('r'), .. }));
}

#[test]
fn test_fstring_single_close_brace_is_error() {
    assert!(parse("x = f'a}'\n").is_err());
}

// --- エラー ---

#[test]
fn test_unexpected_indent() {
    let err = parse("x = 1\n    y = 2\n").unwrap_err();
    assert!(matches!(err, DepylerError::ParseError { .. }));
}

#[test]
fn test_missing_block() {
    let err = parse("def f():\nx = 1\n").unwrap_err();
    let DepylerError::ParseError { pos, .. } = err else {
        panic!("expected ParseError");
    };
    assert_eq!(pos.line, 2);
}

#[test]
fn test_parse_expression_helper() {
    let e = parse_expression("a + b", SourcePos::new(4, 2)).unwrap();
    assert_eq!(e.pos, SourcePos::new(4, 2));
    assert!(parse_expression("a b", SourcePos::new(1, 1)).is_err());
}
