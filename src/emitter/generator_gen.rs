//! Generators
//!
//! ジェネレータは `std::iter::from_fn` の状態機械になる。`yield` ごとに
//! 状態を切り、呼び出し側が `next()` したぶんだけ本体が進む:
//!
//! ```text
//! let mut _state: usize = 0;
//! <状態をまたぐローカル> <for ループのイテレータ置き場>
//! std::iter::from_fn(move || { 'gen: loop { match _state {
//!     0 => { <yield まで>; _state = 1; return Some(v); }
//!     1 => { ...; _state = usize::MAX; return None; }
//!     _ => return None,
//! } } })
//! ```
//!
//! `yield` を含む if / while / for は状態の遷移に開く。それ以外の文は
//! そのまま状態の中に出す。`with` の中の `yield`、`Default` のない型の
//! ローカルなど開けない形だけは本体を一度走らせてキューを返す。

use super::comp_gen::pattern_code;
use super::context::{default_dict_targets, rust_ident};
use super::stmt_gen::{hoisted_names, keeps_lazy, target_names};
use super::value::{parenthesize, Form};
use super::RustEmitter;
use crate::error::{DepylerError, Result};
use crate::hir::visit;
use crate::hir::*;
use crate::semantic::{contains_generic, iter_element, join, Type};
use std::collections::BTreeSet;
use tracing::trace;

/// 状態機械の組み立て中の状態
struct Machine {
    /// 状態番号 → その状態の文
    arms: Vec<Vec<String>>,
    current: usize,
    /// クロージャの外で宣言するイテレータ置き場
    slots: Vec<String>,
}

impl Machine {
    fn new() -> Self {
        Self {
            arms: vec![Vec::new()],
            current: 0,
            slots: Vec::new(),
        }
    }

    fn state(&mut self) -> usize {
        self.arms.push(Vec::new());
        self.arms.len() - 1
    }

    fn push(&mut self, line: impl Into<String>) {
        self.arms[self.current].push(line.into());
    }

    fn goto(&mut self, to: usize) {
        self.push(format!("_state = {to};"));
        self.push("continue 'gen;");
    }
}

impl RustEmitter<'_> {
    pub(super) fn emit_generator_body(&mut self, f: &HirFunction) -> Result<()> {
        match self.state_locals(&f.body) {
            Some(locals) if lowerable(&f.body) => {
                trace!(function = %f.name, locals = locals.len(), "lazy generator");
                self.emit_state_machine(f, locals)
            }
            _ => {
                trace!(function = %f.name, "eager generator");
                self.emit_eager_generator(f)
            }
        }
    }

    /// 本体を一度走らせ、`_out` をイテレータとして返す
    fn emit_eager_generator(&mut self, f: &HirFunction) -> Result<()> {
        let elem = f.ret.element();
        let queue = match self.ctx.local_type(&elem) {
            Some(t) => format!("let mut _out: std::collections::VecDeque<{t}> = std::collections::VecDeque::new();"),
            None => "let mut _out = std::collections::VecDeque::new();".to_string(),
        };
        self.line(queue);
        self.ctx.frame_mut()?.gen_return = Some("return _out.into_iter();".to_string());
        self.emit_body(&f.body)?;
        if !visit::always_returns(&f.body) {
            self.line("_out.into_iter()");
        }
        Ok(())
    }

    /// 状態をまたいで生きるローカル (名前, 型, Rust の型)
    ///
    /// どれかが `Default` を持たない・型引数を含むなら None。
    fn state_locals(&mut self, body: &[HirStmt]) -> Option<Vec<(String, Type, String)>> {
        let mut names = hoisted_names(body);
        state_names(body, &mut names);
        let mut lazy_bound = false;
        let emitter: &RustEmitter<'_> = self;
        visit::walk_stmts(body, &mut |s| {
            if let HirStmtKind::Assign {
                target: AssignTarget::Name(n),
                value,
                ..
            } = &s.kind
            {
                lazy_bound |= names.contains(n) && keeps_lazy(value, emitter);
            }
        });
        if lazy_bound {
            return None;
        }
        let mut out = Vec::new();
        for name in names {
            if self.ctx.is_declared(&name) || self.ctx.globals.contains_key(&name) {
                continue;
            }
            let ty = self.local_ty(&name)?;
            if contains_generic(&ty) || !self.ctx.has_default(&ty) {
                return None;
            }
            let code = self.ctx.local_type(&ty)?;
            out.push((name, ty, code));
        }
        // 開くループの要素型も名前が付く必要がある
        let mut elems = Vec::new();
        loop_elements(body, &mut elems);
        for elem in elems {
            if contains_generic(&elem) || self.ctx.local_type(&elem).is_none() {
                return None;
            }
        }
        Some(out)
    }

    fn emit_state_machine(&mut self, f: &HirFunction, locals: Vec<(String, Type, String)>) -> Result<()> {
        self.line("let mut _state: usize = 0;");
        for (name, ty, code) in locals {
            self.line(format!("let mut {}: {code} = Default::default();", rust_ident(&name)));
            self.ctx.declare_local(&name, ty, Form::Place);
        }
        let (filled, _) = default_dict_targets(&f.body);
        let frame = self.ctx.frame_mut()?;
        frame.default_dicts.extend(filled);
        frame.gen_return = Some("{ _state = usize::MAX; return None; }".to_string());

        let mut m = Machine::new();
        self.lower_block(&mut m, &f.body)?;
        m.push("_state = usize::MAX;");
        m.push("return None;");

        for slot in &m.slots {
            self.line(slot);
        }
        self.open("std::iter::from_fn(move ||");
        self.open("'gen: loop");
        self.open("match _state");
        for (i, arm) in m.arms.iter().enumerate() {
            self.open(format!("{i} =>"));
            self.emit_lines(arm);
            self.close();
        }
        self.line("_ => return None,");
        self.close();
        self.close();
        self.close_with(")");
        Ok(())
    }

    fn lower_block(&mut self, m: &mut Machine, stmts: &[HirStmt]) -> Result<()> {
        for stmt in stmts {
            if !visit::contains_yield(std::slice::from_ref(stmt)) {
                let lines = self.capture(|e| e.emit_stmt(stmt))?;
                m.arms[m.current].extend(lines);
                continue;
            }
            match &stmt.kind {
                HirStmtKind::Expr(e) => match &e.kind {
                    HirExprKind::Yield(value) => {
                        let code = self.yield_value(value.as_deref())?;
                        let next = m.state();
                        m.push(format!("_state = {next};"));
                        m.push(format!("return Some({code});"));
                        m.current = next;
                    }
                    _ => return Err(DepylerError::unsupported(e.pos, "yield used as a value")),
                },
                HirStmtKind::If { test, body, orelse } => self.lower_if(m, test, body, orelse)?,
                HirStmtKind::While { test, body } => self.lower_while(m, test, body)?,
                HirStmtKind::For { target, iter, body } => self.lower_for(m, target, iter, body, stmt.pos)?,
                _ => return Err(DepylerError::unsupported(stmt.pos, "yield inside this statement")),
            }
        }
        Ok(())
    }

    fn lower_if(&mut self, m: &mut Machine, test: &HirExpr, body: &[HirStmt], orelse: &[HirStmt]) -> Result<()> {
        let cond = self.cond(test)?;
        let then_state = m.state();
        let else_state = (!orelse.is_empty()).then(|| m.state());
        let join_state = m.state();
        m.push(format!(
            "_state = if {cond} {{ {then_state} }} else {{ {} }};",
            else_state.unwrap_or(join_state)
        ));
        m.push("continue 'gen;");
        m.current = then_state;
        self.lower_block(m, body)?;
        m.goto(join_state);
        if let Some(s) = else_state {
            m.current = s;
            self.lower_block(m, orelse)?;
            m.goto(join_state);
        }
        m.current = join_state;
        Ok(())
    }

    fn lower_while(&mut self, m: &mut Machine, test: &HirExpr, body: &[HirStmt]) -> Result<()> {
        let head = m.state();
        m.goto(head);
        m.current = head;
        let body_state = m.state();
        let exit = m.state();
        if matches!(test.kind, HirExprKind::Bool(true)) {
            m.goto(body_state);
        } else {
            let cond = self.cond(test)?;
            m.push(format!("_state = if {cond} {{ {body_state} }} else {{ {exit} }};"));
            m.push("continue 'gen;");
        }
        m.current = body_state;
        self.lower_loop_body(
            m,
            body,
            format!("{{ _state = {exit}; continue 'gen; }}"),
            format!("{{ _state = {head}; continue 'gen; }}"),
        )?;
        m.goto(head);
        m.current = exit;
        Ok(())
    }

    /// イテレータは置き場 `_itN` に入れ、状態をまたいで 1 つずつ取り出す
    fn lower_for(&mut self, m: &mut Machine, target: &Pattern, iter: &HirExpr, body: &[HirStmt], pos: SourcePos) -> Result<()> {
        let iter_owned;
        let iter = match &iter.kind {
            HirExprKind::Tuple(items) => {
                let elem = items.iter().fold(Type::Unknown, |acc, i| join(&acc, &i.ty));
                iter_owned = HirExpr::typed(HirExprKind::List(items.clone()), Type::list(elem), pos);
                &iter_owned
            }
            _ => iter,
        };
        let lazy_call = match &iter.kind {
            HirExprKind::Call { func, .. } => {
                func == "range" || self.ctx.lookup_fn(func).map_or(false, |s| s.generator)
            }
            _ => false,
        };
        let src = self.expr(iter)?;
        let elem = iter_element(&src.ty);
        let Some(item) = self.ctx.local_type(&elem) else {
            return Err(DepylerError::unmappable(pos, format!("generator loop over {}", src.ty)));
        };
        let source = match (src.form, src.ty.unwrap_optional()) {
            _ if lazy_call => src.code.clone(),
            (Form::Owned, Type::Dict(_, _)) => format!("{}.into_keys()", src.atom()),
            // 借用のままでは置き場に入らない
            (Form::Iter, _) | (_, Type::Str | Type::Bytes | Type::Native(_) | Type::Dict(_, _)) => {
                format!("{}.collect::<Vec<{item}>>().into_iter()", src.iter_owned())
            }
            _ => format!("{}.into_iter()", parenthesize(&src.into_owned())),
        };
        let slot = self.ctx.fresh("it");
        m.slots.push(format!(
            "let mut {slot}: Option<Box<dyn Iterator<Item = {item}>>> = None;"
        ));
        m.push(format!("{slot} = Some(Box::new({source}));"));

        let head = m.state();
        m.goto(head);
        m.current = head;
        let body_state = m.state();
        let exit = m.state();
        m.push(format!("match {slot}.as_mut().and_then(|_i| _i.next()) {{"));
        m.push(format!(
            "    Some(_v) => {{ {} = _v; _state = {body_state}; }}",
            pattern_code(target)
        ));
        m.push(format!("    None => {{ {slot} = None; _state = {exit}; }}"));
        m.push("}");
        m.push("continue 'gen;");
        m.current = body_state;
        self.lower_loop_body(
            m,
            body,
            format!("{{ {slot} = None; _state = {exit}; continue 'gen; }}"),
            format!("{{ _state = {head}; continue 'gen; }}"),
        )?;
        m.goto(head);
        m.current = exit;
        Ok(())
    }

    /// 開いたループの本体。中の break / continue は状態の遷移になる
    fn lower_loop_body(&mut self, m: &mut Machine, body: &[HirStmt], brk: String, cont: String) -> Result<()> {
        {
            let frame = self.ctx.frame_mut()?;
            frame.loop_depth += 1;
            frame.loop_labels.push(None);
            let depth = frame.loop_depth;
            frame.gen_loops.push((depth, brk, cont));
        }
        let result = self.lower_block(m, body);
        let frame = self.ctx.frame_mut()?;
        frame.gen_loops.pop();
        frame.loop_labels.pop();
        frame.loop_depth = frame.loop_depth.saturating_sub(1);
        result
    }

    /// `yield v` の値 (ジェネレータの要素型へ揃える)
    fn yield_value(&mut self, value: Option<&HirExpr>) -> Result<String> {
        let elem = self.ctx.frame().map_or(Type::Unknown, |f| f.ret.element());
        match value {
            Some(v) => {
                let v = self.expr(v)?;
                self.coerce(v, &elem)
            }
            None => Ok("()".to_string()),
        }
    }

    /// `yield v` → `_out.push_back(v);` (一括実行のとき)
    pub(super) fn emit_yield(&mut self, value: Option<&HirExpr>, pos: SourcePos) -> Result<()> {
        if !self.ctx.frame().map_or(false, |f| f.generator) {
            return Err(DepylerError::unsupported(pos, "yield outside a generator function"));
        }
        let code = self.yield_value(value)?;
        self.line(format!("_out.push_back({code});"));
        Ok(())
    }
}

/// `yield` が文として、if / while / for の中にだけ現れる
fn lowerable(stmts: &[HirStmt]) -> bool {
    stmts.iter().all(|s| {
        if !visit::contains_yield(std::slice::from_ref(s)) {
            return true;
        }
        match &s.kind {
            HirStmtKind::Expr(e) => matches!(e.kind, HirExprKind::Yield(_)),
            HirStmtKind::If { test, body, orelse } => !yields(test) && lowerable(body) && lowerable(orelse),
            HirStmtKind::While { test, body } => !yields(test) && lowerable(body),
            HirStmtKind::For { iter, body, .. } => !yields(iter) && lowerable(body),
            _ => false,
        }
    })
}

fn yields(e: &HirExpr) -> bool {
    let mut found = false;
    visit::walk_expr(e, &mut |x| found |= matches!(x.kind, HirExprKind::Yield(_)));
    found
}

/// 状態の並びの上で直接束縛される名前 (開いたループの変数を含む)
fn state_names(stmts: &[HirStmt], out: &mut BTreeSet<String>) {
    for stmt in stmts {
        match &stmt.kind {
            HirStmtKind::Assign { target, .. } => target_names(target, out),
            _ if !visit::contains_yield(std::slice::from_ref(stmt)) => {}
            HirStmtKind::If { body, orelse, .. } => {
                state_names(body, out);
                state_names(orelse, out);
            }
            HirStmtKind::While { body, .. } => state_names(body, out),
            HirStmtKind::For { target, body, .. } => {
                out.extend(target.names().into_iter().map(str::to_string));
                state_names(body, out);
            }
            _ => {}
        }
    }
}

/// 開くループの要素型
fn loop_elements(stmts: &[HirStmt], out: &mut Vec<Type>) {
    for stmt in stmts {
        if !visit::contains_yield(std::slice::from_ref(stmt)) {
            continue;
        }
        match &stmt.kind {
            HirStmtKind::If { body, orelse, .. } => {
                loop_elements(body, out);
                loop_elements(orelse, out);
            }
            HirStmtKind::While { body, .. } => loop_elements(body, out),
            HirStmtKind::For { iter, body, .. } => {
                let elem = match &iter.kind {
                    HirExprKind::Tuple(items) => items.iter().fold(Type::Unknown, |acc, i| join(&acc, &i.ty)),
                    _ => iter_element(&iter.ty),
                };
                out.push(elem);
                loop_elements(body, out);
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stmt(kind: HirStmtKind) -> HirStmt {
        HirStmt {
            kind,
            pos: SourcePos::unknown(),
        }
    }

    fn yield_stmt(name: &str) -> HirStmt {
        let v = HirExpr::typed(HirExprKind::Name(name.to_string()), Type::Int, SourcePos::unknown());
        stmt(HirStmtKind::Expr(HirExpr::new(
            HirExprKind::Yield(Some(Box::new(v))),
            SourcePos::unknown(),
        )))
    }

    fn assign(name: &str) -> HirStmt {
        stmt(HirStmtKind::Assign {
            target: AssignTarget::Name(name.to_string()),
            value: HirExpr::new(
                HirExprKind::Int {
                    text: "0".to_string(),
                    value: 0,
                },
                SourcePos::unknown(),
            ),
            annotation: None,
        })
    }

    #[test]
    fn test_straight_line_and_loops_are_lowerable() {
        let body = vec![
            assign("i"),
            yield_stmt("i"),
            stmt(HirStmtKind::While {
                test: HirExpr::new(HirExprKind::Bool(true), SourcePos::unknown()),
                body: vec![yield_stmt("i")],
            }),
        ];
        assert!(lowerable(&body));
    }

    #[test]
    fn test_yield_inside_with_is_not_lowerable() {
        let body = vec![stmt(HirStmtKind::With {
            context: HirExpr::new(HirExprKind::Name("f".to_string()), SourcePos::unknown()),
            binding: None,
            body: vec![yield_stmt("x")],
        })];
        assert!(!lowerable(&body));
    }

    #[test]
    fn test_state_names_include_loop_targets() {
        let body = vec![
            assign("total"),
            stmt(HirStmtKind::For {
                target: Pattern::Name("x".to_string()),
                iter: HirExpr::new(HirExprKind::Name("xs".to_string()), SourcePos::unknown()),
                body: vec![yield_stmt("x")],
            }),
        ];
        let mut names = BTreeSet::new();
        state_names(&body, &mut names);
        assert!(names.contains("total"));
        assert!(names.contains("x"));
    }
}
