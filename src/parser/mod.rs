//! Parser module - recursive-descent Python parser
//!
//! トークン列から `Program` を構築する。演算子の優先順位は
//! Python の文法 (test → or_test → ... → power → primary) に従う。

mod ast;
#[cfg(test)]
mod tests;

pub use ast::*;

use crate::error::{DepylerError, Result};
use crate::hir::SourcePos;
use crate::lexer::{self, Delimiter, Keyword, Operator, StrPrefix, Token, TokenKind};

/// Binary operator precedence levels, lowest first
const BINARY_LEVELS: &[&[(Operator, BinOp)]] = &[
    &[(Operator::Pipe, BinOp::BitOr)],
    &[(Operator::Caret, BinOp::BitXor)],
    &[(Operator::Amp, BinOp::BitAnd)],
    &[(Operator::LShift, BinOp::LShift), (Operator::RShift, BinOp::RShift)],
    &[(Operator::Plus, BinOp::Add), (Operator::Minus, BinOp::Sub)],
    &[
        (Operator::Star, BinOp::Mul),
        (Operator::Slash, BinOp::Div),
        (Operator::DoubleSlash, BinOp::FloorDiv),
        (Operator::Percent, BinOp::Mod),
        (Operator::At, BinOp::MatMul),
    ],
];

const AUG_ASSIGN_OPS: &[(Operator, BinOp)] = &[
    (Operator::PlusAssign, BinOp::Add),
    (Operator::MinusAssign, BinOp::Sub),
    (Operator::StarAssign, BinOp::Mul),
    (Operator::SlashAssign, BinOp::Div),
    (Operator::DoubleSlashAssign, BinOp::FloorDiv),
    (Operator::PercentAssign, BinOp::Mod),
    (Operator::DoubleStarAssign, BinOp::Pow),
    (Operator::AmpAssign, BinOp::BitAnd),
    (Operator::PipeAssign, BinOp::BitOr),
    (Operator::CaretAssign, BinOp::BitXor),
    (Operator::LShiftAssign, BinOp::LShift),
    (Operator::RShiftAssign, BinOp::RShift),
    (Operator::AtAssign, BinOp::MatMul),
];

static EOF: TokenKind = TokenKind::Eof;

/// Parse Python source code into AST
pub fn parse(source: &str) -> Result<Program> {
    let tokens = lexer::tokenize(source)?;
    Parser::new(tokens).parse_program()
}

/// Parse a standalone expression, e.g. an f-string fragment
pub fn parse_expression(text: &str, pos: SourcePos) -> Result<Expr> {
    let mut tokens = lexer::tokenize(text.trim())?;
    for token in &mut tokens {
        token.pos = pos;
    }
    let mut parser = Parser::new(tokens);
    let expr = parser.parse_testlist_star()?;
    while parser.eat(&TokenKind::Newline) {}
    if !parser.at(&TokenKind::Eof) {
        return Err(parser.error("unexpected token in expression"));
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Token>,
    idx: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, idx: 0 }
    }

    // ------------------------------------------------------------------
    // Token cursor
    // ------------------------------------------------------------------

    fn peek(&self) -> &TokenKind {
        self.peek_at(0)
    }

    fn peek_at(&self, offset: usize) -> &TokenKind {
        self.tokens
            .get(self.idx + offset)
            .map(|t| &t.kind)
            .unwrap_or(&EOF)
    }

    fn pos(&self) -> SourcePos {
        self.tokens
            .get(self.idx)
            .or_else(|| self.tokens.last())
            .map(|t| t.pos)
            .unwrap_or_default()
    }

    fn advance(&mut self) -> TokenKind {
        let kind = self.peek().clone();
        if self.idx < self.tokens.len() {
            self.idx += 1;
        }
        kind
    }

    fn at(&self, kind: &TokenKind) -> bool {
        self.peek() == kind
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.at(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn at_kw(&self, kw: Keyword) -> bool {
        matches!(self.peek(), TokenKind::Keyword(k) if *k == kw)
    }

    fn eat_kw(&mut self, kw: Keyword) -> bool {
        self.eat(&TokenKind::Keyword(kw))
    }

    fn expect_kw(&mut self, kw: Keyword) -> Result<()> {
        if self.eat_kw(kw) {
            Ok(())
        } else {
            Err(self.error(&format!("expected '{kw:?}'")))
        }
    }

    fn at_op(&self, op: Operator) -> bool {
        matches!(self.peek(), TokenKind::Operator(o) if *o == op)
    }

    fn eat_op(&mut self, op: Operator) -> bool {
        self.eat(&TokenKind::Operator(op))
    }

    fn expect_op(&mut self, op: Operator) -> Result<()> {
        if self.eat_op(op) {
            Ok(())
        } else {
            Err(self.error(&format!("expected '{op:?}'")))
        }
    }

    fn at_delim(&self, d: Delimiter) -> bool {
        matches!(self.peek(), TokenKind::Delimiter(x) if *x == d)
    }

    fn eat_delim(&mut self, d: Delimiter) -> bool {
        self.eat(&TokenKind::Delimiter(d))
    }

    fn expect_delim(&mut self, d: Delimiter) -> Result<()> {
        if self.eat_delim(d) {
            Ok(())
        } else {
            Err(self.error(&format!("expected '{d:?}'")))
        }
    }

    fn expect_name(&mut self) -> Result<String> {
        match self.peek().clone() {
            TokenKind::Name(name) => {
                self.advance();
                Ok(name)
            }
            _ => Err(self.error("expected identifier")),
        }
    }

    fn error(&self, message: &str) -> DepylerError {
        DepylerError::parse(self.pos(), format!("{message}, found {}", describe(self.peek())))
    }

    fn at_stmt_end(&self) -> bool {
        matches!(
            self.peek(),
            TokenKind::Newline | TokenKind::Eof | TokenKind::Dedent | TokenKind::Delimiter(Delimiter::Semicolon)
        )
    }

    fn expect_newline(&mut self) -> Result<()> {
        if self.eat(&TokenKind::Newline) || self.at(&TokenKind::Eof) || self.at(&TokenKind::Dedent) {
            Ok(())
        } else {
            Err(self.error("expected end of line"))
        }
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn parse_program(&mut self) -> Result<Program> {
        let mut body = Vec::new();
        loop {
            while self.eat(&TokenKind::Newline) {}
            if self.at(&TokenKind::Eof) {
                break;
            }
            if self.at(&TokenKind::Indent) {
                return Err(self.error("unexpected indent"));
            }
            body.extend(self.parse_statement()?);
        }
        Ok(Program { body })
    }

    fn parse_statement(&mut self) -> Result<Vec<Stmt>> {
        let pos = self.pos();
        let stmt = match self.peek() {
            TokenKind::Keyword(Keyword::If) => self.parse_if()?,
            TokenKind::Keyword(Keyword::While) => self.parse_while()?,
            TokenKind::Keyword(Keyword::For) => self.parse_for(false, pos)?,
            TokenKind::Keyword(Keyword::Try) => self.parse_try()?,
            TokenKind::Keyword(Keyword::With) => self.parse_with(false, pos)?,
            TokenKind::Keyword(Keyword::Def) => self.parse_funcdef(Vec::new(), false, pos)?,
            TokenKind::Keyword(Keyword::Class) => self.parse_classdef(Vec::new(), pos)?,
            TokenKind::Keyword(Keyword::Async) => {
                self.advance();
                match self.peek() {
                    TokenKind::Keyword(Keyword::Def) => self.parse_funcdef(Vec::new(), true, pos)?,
                    TokenKind::Keyword(Keyword::For) => self.parse_for(true, pos)?,
                    TokenKind::Keyword(Keyword::With) => self.parse_with(true, pos)?,
                    _ => return Err(self.error("expected 'def', 'for' or 'with' after 'async'")),
                }
            }
            TokenKind::Operator(Operator::At) => self.parse_decorated()?,
            TokenKind::Name(name) if name == "match" && self.looks_like_match() => self.skip_match(pos)?,
            _ => return self.parse_simple_statements(),
        };
        Ok(vec![stmt])
    }

    fn parse_simple_statements(&mut self) -> Result<Vec<Stmt>> {
        let mut stmts = vec![self.parse_simple()?];
        while self.eat_delim(Delimiter::Semicolon) {
            if self.at_stmt_end() {
                break;
            }
            stmts.push(self.parse_simple()?);
        }
        self.expect_newline()?;
        Ok(stmts)
    }

    fn parse_simple(&mut self) -> Result<Stmt> {
        let pos = self.pos();
        let kind = match self.peek() {
            TokenKind::Keyword(Keyword::Pass) => {
                self.advance();
                StmtKind::Pass
            }
            TokenKind::Keyword(Keyword::Break) => {
                self.advance();
                StmtKind::Break
            }
            TokenKind::Keyword(Keyword::Continue) => {
                self.advance();
                StmtKind::Continue
            }
            TokenKind::Keyword(Keyword::Return) => {
                self.advance();
                if self.at_stmt_end() {
                    StmtKind::Return(None)
                } else {
                    StmtKind::Return(Some(self.parse_testlist_star()?))
                }
            }
            TokenKind::Keyword(Keyword::Raise) => {
                self.advance();
                let exc = if self.at_stmt_end() { None } else { Some(self.parse_test()?) };
                let cause = if self.eat_kw(Keyword::From) { Some(self.parse_test()?) } else { None };
                StmtKind::Raise { exc, cause }
            }
            TokenKind::Keyword(Keyword::Global) | TokenKind::Keyword(Keyword::Nonlocal) => {
                let is_global = self.at_kw(Keyword::Global);
                self.advance();
                let mut names = vec![self.expect_name()?];
                while self.eat_delim(Delimiter::Comma) {
                    names.push(self.expect_name()?);
                }
                if is_global {
                    StmtKind::Global(names)
                } else {
                    StmtKind::Nonlocal(names)
                }
            }
            TokenKind::Keyword(Keyword::Del) => {
                self.advance();
                let target = self.parse_target_list()?;
                let targets = match target.kind {
                    ExprKind::Tuple(items) => items,
                    _ => vec![target],
                };
                StmtKind::Delete(targets)
            }
            TokenKind::Keyword(Keyword::Assert) => {
                self.advance();
                let test = self.parse_test()?;
                let msg = if self.eat_delim(Delimiter::Comma) { Some(self.parse_test()?) } else { None };
                StmtKind::Assert { test, msg }
            }
            TokenKind::Keyword(Keyword::Import) => self.parse_import()?,
            TokenKind::Keyword(Keyword::From) => self.parse_from_import()?,
            _ => self.parse_expr_statement()?,
        };
        Ok(Stmt { kind, pos })
    }

    fn parse_expr_statement(&mut self) -> Result<StmtKind> {
        let first = self.parse_testlist_star_or_yield()?;

        if self.eat_op(Operator::Colon) {
            let annotation = self.parse_test()?;
            let value = if self.eat_op(Operator::Assign) {
                Some(self.parse_testlist_star_or_yield()?)
            } else {
                None
            };
            return Ok(StmtKind::AnnAssign {
                target: first,
                annotation,
                value,
            });
        }

        if let TokenKind::Operator(op) = self.peek() {
            if let Some((_, bin)) = AUG_ASSIGN_OPS.iter().find(|(o, _)| o == op) {
                let bin = *bin;
                self.advance();
                let value = self.parse_testlist_star_or_yield()?;
                return Ok(StmtKind::AugAssign {
                    target: first,
                    op: bin,
                    value,
                });
            }
        }

        if self.at_op(Operator::Assign) {
            let mut targets = vec![first];
            loop {
                self.expect_op(Operator::Assign)?;
                let next = self.parse_testlist_star_or_yield()?;
                if self.at_op(Operator::Assign) {
                    targets.push(next);
                } else {
                    return Ok(StmtKind::Assign { targets, value: next });
                }
            }
        }

        Ok(StmtKind::Expr(first))
    }

    fn parse_import(&mut self) -> Result<StmtKind> {
        self.expect_kw(Keyword::Import)?;
        let mut names = Vec::new();
        loop {
            let name = self.parse_dotted_name()?;
            let asname = if self.eat_kw(Keyword::As) { Some(self.expect_name()?) } else { None };
            names.push(Alias { name, asname });
            if !self.eat_delim(Delimiter::Comma) {
                break;
            }
        }
        Ok(StmtKind::Import(names))
    }

    fn parse_from_import(&mut self) -> Result<StmtKind> {
        self.expect_kw(Keyword::From)?;
        let mut level = 0;
        loop {
            if self.eat_delim(Delimiter::Dot) {
                level += 1;
            } else if self.eat_delim(Delimiter::Ellipsis) {
                level += 3;
            } else {
                break;
            }
        }
        let module = if self.at_kw(Keyword::Import) { String::new() } else { self.parse_dotted_name()? };
        self.expect_kw(Keyword::Import)?;

        let mut names = Vec::new();
        if self.eat_op(Operator::Star) {
            names.push(Alias {
                name: "*".to_string(),
                asname: None,
            });
            return Ok(StmtKind::ImportFrom { module, names, level });
        }
        let parens = self.eat_delim(Delimiter::LParen);
        loop {
            if parens && self.at_delim(Delimiter::RParen) {
                break;
            }
            let name = self.expect_name()?;
            let asname = if self.eat_kw(Keyword::As) { Some(self.expect_name()?) } else { None };
            names.push(Alias { name, asname });
            if !self.eat_delim(Delimiter::Comma) {
                break;
            }
        }
        if parens {
            self.expect_delim(Delimiter::RParen)?;
        }
        Ok(StmtKind::ImportFrom { module, names, level })
    }

    fn parse_dotted_name(&mut self) -> Result<String> {
        let mut name = self.expect_name()?;
        while self.eat_delim(Delimiter::Dot) {
            name.push('.');
            name.push_str(&self.expect_name()?);
        }
        Ok(name)
    }

    fn parse_block(&mut self) -> Result<Vec<Stmt>> {
        self.expect_op(Operator::Colon)?;
        if !self.eat(&TokenKind::Newline) {
            return self.parse_simple_statements();
        }
        while self.eat(&TokenKind::Newline) {}
        if !self.eat(&TokenKind::Indent) {
            return Err(self.error("expected an indented block"));
        }
        let mut body = Vec::new();
        loop {
            while self.eat(&TokenKind::Newline) {}
            if self.eat(&TokenKind::Dedent) || self.at(&TokenKind::Eof) {
                break;
            }
            body.extend(self.parse_statement()?);
        }
        Ok(body)
    }

    fn parse_if(&mut self) -> Result<Stmt> {
        let pos = self.pos();
        self.advance(); // 'if' or 'elif'
        let test = self.parse_named_test()?;
        let body = self.parse_block()?;
        let orelse = if self.at_kw(Keyword::Elif) {
            vec![self.parse_if()?]
        } else if self.eat_kw(Keyword::Else) {
            self.parse_block()?
        } else {
            Vec::new()
        };
        Ok(Stmt {
            kind: StmtKind::If { test, body, orelse },
            pos,
        })
    }

    fn parse_while(&mut self) -> Result<Stmt> {
        let pos = self.pos();
        self.expect_kw(Keyword::While)?;
        let test = self.parse_named_test()?;
        let body = self.parse_block()?;
        let orelse = if self.eat_kw(Keyword::Else) { self.parse_block()? } else { Vec::new() };
        Ok(Stmt {
            kind: StmtKind::While { test, body, orelse },
            pos,
        })
    }

    fn parse_for(&mut self, is_async: bool, pos: SourcePos) -> Result<Stmt> {
        self.expect_kw(Keyword::For)?;
        let target = self.parse_target_list()?;
        self.expect_kw(Keyword::In)?;
        let iter = self.parse_testlist_star()?;
        let body = self.parse_block()?;
        let orelse = if self.eat_kw(Keyword::Else) { self.parse_block()? } else { Vec::new() };
        Ok(Stmt {
            kind: StmtKind::For {
                target,
                iter,
                body,
                orelse,
                is_async,
            },
            pos,
        })
    }

    fn parse_try(&mut self) -> Result<Stmt> {
        let pos = self.pos();
        self.expect_kw(Keyword::Try)?;
        let body = self.parse_block()?;
        let mut handlers = Vec::new();
        while self.at_kw(Keyword::Except) {
            let hpos = self.pos();
            self.advance();
            let typ = if self.at_op(Operator::Colon) { None } else { Some(self.parse_test()?) };
            let name = if self.eat_kw(Keyword::As) { Some(self.expect_name()?) } else { None };
            let hbody = self.parse_block()?;
            handlers.push(ExceptHandler {
                typ,
                name,
                body: hbody,
                pos: hpos,
            });
        }
        let orelse = if self.eat_kw(Keyword::Else) { self.parse_block()? } else { Vec::new() };
        let finalbody = if self.eat_kw(Keyword::Finally) { self.parse_block()? } else { Vec::new() };
        if handlers.is_empty() && finalbody.is_empty() {
            return Err(DepylerError::parse(pos, "try statement needs 'except' or 'finally'"));
        }
        Ok(Stmt {
            kind: StmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            },
            pos,
        })
    }

    fn parse_with(&mut self, is_async: bool, pos: SourcePos) -> Result<Stmt> {
        self.expect_kw(Keyword::With)?;
        let mut items = Vec::new();
        loop {
            let context = self.parse_test()?;
            let target = if self.eat_kw(Keyword::As) { Some(self.parse_target_atom()?) } else { None };
            items.push(WithItem { context, target });
            if !self.eat_delim(Delimiter::Comma) {
                break;
            }
        }
        let body = self.parse_block()?;
        Ok(Stmt {
            kind: StmtKind::With { items, body, is_async },
            pos,
        })
    }

    fn parse_decorated(&mut self) -> Result<Stmt> {
        let mut decorators = Vec::new();
        while self.eat_op(Operator::At) {
            decorators.push(self.parse_named_test()?);
            if !self.eat(&TokenKind::Newline) {
                return Err(self.error("expected newline after decorator"));
            }
        }
        let pos = self.pos();
        match self.peek() {
            TokenKind::Keyword(Keyword::Def) => self.parse_funcdef(decorators, false, pos),
            TokenKind::Keyword(Keyword::Class) => self.parse_classdef(decorators, pos),
            TokenKind::Keyword(Keyword::Async) => {
                self.advance();
                self.parse_funcdef(decorators, true, pos)
            }
            _ => Err(self.error("expected function or class after decorator")),
        }
    }

    fn parse_funcdef(&mut self, decorators: Vec<Expr>, is_async: bool, pos: SourcePos) -> Result<Stmt> {
        self.expect_kw(Keyword::Def)?;
        let name = self.expect_name()?;
        self.expect_delim(Delimiter::LParen)?;
        let (params, vararg, kwarg) = self.parse_params(true)?;
        self.expect_delim(Delimiter::RParen)?;
        let returns = if self.eat_op(Operator::Arrow) { Some(self.parse_test()?) } else { None };
        let body = self.parse_block()?;
        Ok(Stmt {
            kind: StmtKind::FuncDef(FunctionDef {
                name,
                params,
                vararg,
                kwarg,
                returns,
                body,
                decorators,
                is_async,
            }),
            pos,
        })
    }

    /// Parameter list up to (not including) the closing token
    ///
    /// `def` の引数は `)` まで (注釈あり)、`lambda` の引数は `:` まで (注釈なし)。
    fn parse_params(&mut self, annotations: bool) -> Result<(Vec<Param>, Option<Param>, Option<Param>)> {
        let mut params = Vec::new();
        let mut vararg = None;
        let mut kwarg = None;
        let at_close = |p: &Parser| {
            if annotations {
                p.at_delim(Delimiter::RParen)
            } else {
                p.at_op(Operator::Colon)
            }
        };
        while !at_close(&*self) {
            let pos = self.pos();
            if self.eat_op(Operator::Slash) {
                // positional-only marker
            } else if self.eat_op(Operator::DoubleStar) {
                kwarg = Some(self.parse_one_param(annotations, pos)?);
            } else if self.eat_op(Operator::Star) {
                if matches!(self.peek(), TokenKind::Name(_)) {
                    vararg = Some(self.parse_one_param(annotations, pos)?);
                }
            } else {
                params.push(self.parse_one_param(annotations, pos)?);
            }
            if !self.eat_delim(Delimiter::Comma) {
                break;
            }
        }
        Ok((params, vararg, kwarg))
    }

    fn parse_one_param(&mut self, annotations: bool, pos: SourcePos) -> Result<Param> {
        let name = self.expect_name()?;
        let annotation = if annotations && self.eat_op(Operator::Colon) {
            Some(self.parse_test()?)
        } else {
            None
        };
        let default = if self.eat_op(Operator::Assign) { Some(self.parse_test()?) } else { None };
        Ok(Param {
            name,
            annotation,
            default,
            pos,
        })
    }

    fn parse_classdef(&mut self, decorators: Vec<Expr>, pos: SourcePos) -> Result<Stmt> {
        self.expect_kw(Keyword::Class)?;
        let name = self.expect_name()?;
        let (bases, keywords) = if self.eat_delim(Delimiter::LParen) {
            self.parse_call_args()?
        } else {
            (Vec::new(), Vec::new())
        };
        let body = self.parse_block()?;
        Ok(Stmt {
            kind: StmtKind::ClassDef(ClassDef {
                name,
                bases,
                keywords,
                body,
                decorators,
            }),
            pos,
        })
    }

    /// `match subject:` followed by an indented block of `case` clauses
    fn looks_like_match(&self) -> bool {
        if matches!(
            self.peek_at(1),
            TokenKind::Operator(_) | TokenKind::Delimiter(Delimiter::Dot) | TokenKind::Newline
        ) {
            return false;
        }
        let mut offset = 1;
        loop {
            match self.peek_at(offset) {
                TokenKind::Newline => {
                    return matches!(self.peek_at(offset.saturating_sub(1)), TokenKind::Operator(Operator::Colon))
                        && matches!(self.peek_at(offset + 1), TokenKind::Indent);
                }
                TokenKind::Eof => return false,
                _ => offset += 1,
            }
        }
    }

    fn skip_match(&mut self, pos: SourcePos) -> Result<Stmt> {
        while !matches!(self.peek(), TokenKind::Newline | TokenKind::Eof) {
            self.advance();
        }
        self.advance();
        let mut depth = 0usize;
        loop {
            match self.advance() {
                TokenKind::Indent => depth += 1,
                TokenKind::Dedent => {
                    depth = depth.saturating_sub(1);
                    if depth == 0 {
                        break;
                    }
                }
                TokenKind::Eof => break,
                _ => {}
            }
        }
        Ok(Stmt {
            kind: StmtKind::Match,
            pos,
        })
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    fn parse_testlist_star_or_yield(&mut self) -> Result<Expr> {
        if self.at_kw(Keyword::Yield) {
            self.parse_yield()
        } else {
            self.parse_testlist_star()
        }
    }

    fn parse_yield(&mut self) -> Result<Expr> {
        let pos = self.pos();
        self.expect_kw(Keyword::Yield)?;
        if self.eat_kw(Keyword::From) {
            let value = self.parse_test()?;
            return Ok(Expr::new(ExprKind::YieldFrom(Box::new(value)), pos));
        }
        if self.at_stmt_end() || self.at_delim(Delimiter::RParen) {
            return Ok(Expr::new(ExprKind::Yield(None), pos));
        }
        let value = self.parse_testlist_star()?;
        Ok(Expr::new(ExprKind::Yield(Some(Box::new(value))), pos))
    }

    /// Comma-separated tests (and `*x`), producing a tuple when a comma is present
    fn parse_testlist_star(&mut self) -> Result<Expr> {
        let pos = self.pos();
        let first = self.parse_star_or_named_test()?;
        if !self.at_delim(Delimiter::Comma) {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_delim(Delimiter::Comma) {
            if self.at_stmt_end()
                || self.at_op(Operator::Assign)
                || self.at_op(Operator::Colon)
                || self.at_delim(Delimiter::RParen)
            {
                break;
            }
            items.push(self.parse_star_or_named_test()?);
        }
        Ok(Expr::new(ExprKind::Tuple(items), pos))
    }

    fn parse_star_or_named_test(&mut self) -> Result<Expr> {
        let pos = self.pos();
        if self.eat_op(Operator::Star) {
            let inner = self.parse_bitor()?;
            return Ok(Expr::new(ExprKind::Starred(Box::new(inner)), pos));
        }
        self.parse_named_test()
    }

    /// Assignment targets of `for` and comprehensions (no comparisons)
    fn parse_target_list(&mut self) -> Result<Expr> {
        let pos = self.pos();
        let first = self.parse_target_atom()?;
        if !self.at_delim(Delimiter::Comma) {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_delim(Delimiter::Comma) {
            if self.at_kw(Keyword::In) || self.at_stmt_end() || self.at_op(Operator::Assign) {
                break;
            }
            items.push(self.parse_target_atom()?);
        }
        Ok(Expr::new(ExprKind::Tuple(items), pos))
    }

    fn parse_target_atom(&mut self) -> Result<Expr> {
        let pos = self.pos();
        if self.eat_op(Operator::Star) {
            let inner = self.parse_bitor()?;
            return Ok(Expr::new(ExprKind::Starred(Box::new(inner)), pos));
        }
        self.parse_bitor()
    }

    fn parse_named_test(&mut self) -> Result<Expr> {
        if let TokenKind::Name(name) = self.peek() {
            if matches!(self.peek_at(1), TokenKind::Operator(Operator::Walrus)) {
                let pos = self.pos();
                let target = name.clone();
                self.advance();
                self.advance();
                let value = self.parse_test()?;
                return Ok(Expr::new(
                    ExprKind::NamedExpr {
                        target,
                        value: Box::new(value),
                    },
                    pos,
                ));
            }
        }
        self.parse_test()
    }

    fn parse_test(&mut self) -> Result<Expr> {
        if self.at_kw(Keyword::Lambda) {
            return self.parse_lambda();
        }
        let pos = self.pos();
        let body = self.parse_or_test()?;
        if self.eat_kw(Keyword::If) {
            let test = self.parse_or_test()?;
            self.expect_kw(Keyword::Else)?;
            let orelse = self.parse_test()?;
            return Ok(Expr::new(
                ExprKind::IfExp {
                    test: Box::new(test),
                    body: Box::new(body),
                    orelse: Box::new(orelse),
                },
                pos,
            ));
        }
        Ok(body)
    }

    fn parse_lambda(&mut self) -> Result<Expr> {
        let pos = self.pos();
        self.expect_kw(Keyword::Lambda)?;
        let (params, vararg, kwarg) = self.parse_params(false)?;
        if vararg.is_some() || kwarg.is_some() {
            return Err(DepylerError::unsupported(pos, "variadic lambda parameters"));
        }
        self.expect_op(Operator::Colon)?;
        let body = self.parse_test()?;
        Ok(Expr::new(
            ExprKind::Lambda {
                params,
                body: Box::new(body),
            },
            pos,
        ))
    }

    fn parse_or_test(&mut self) -> Result<Expr> {
        self.parse_bool_chain(Keyword::Or)
    }

    fn parse_bool_chain(&mut self, kw: Keyword) -> Result<Expr> {
        let pos = self.pos();
        let first = if kw == Keyword::Or {
            self.parse_bool_chain(Keyword::And)?
        } else {
            self.parse_not_test()?
        };
        if !self.at_kw(kw) {
            return Ok(first);
        }
        let mut values = vec![first];
        while self.eat_kw(kw) {
            values.push(if kw == Keyword::Or {
                self.parse_bool_chain(Keyword::And)?
            } else {
                self.parse_not_test()?
            });
        }
        let op = if kw == Keyword::Or { BoolOpKind::Or } else { BoolOpKind::And };
        Ok(Expr::new(ExprKind::BoolOp { op, values }, pos))
    }

    fn parse_not_test(&mut self) -> Result<Expr> {
        let pos = self.pos();
        if self.eat_kw(Keyword::Not) {
            let operand = self.parse_not_test()?;
            return Ok(Expr::new(
                ExprKind::UnaryOp {
                    op: UnaryOp::Not,
                    operand: Box::new(operand),
                },
                pos,
            ));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr> {
        let pos = self.pos();
        let left = self.parse_bitor()?;
        let mut ops = Vec::new();
        let mut comparators = Vec::new();
        loop {
            let op = match self.peek() {
                TokenKind::Operator(Operator::Eq) => CmpOp::Eq,
                TokenKind::Operator(Operator::NotEq) => CmpOp::NotEq,
                TokenKind::Operator(Operator::Lt) => CmpOp::Lt,
                TokenKind::Operator(Operator::LtEq) => CmpOp::LtE,
                TokenKind::Operator(Operator::Gt) => CmpOp::Gt,
                TokenKind::Operator(Operator::GtEq) => CmpOp::GtE,
                TokenKind::Keyword(Keyword::In) => CmpOp::In,
                TokenKind::Keyword(Keyword::Is) => {
                    if matches!(self.peek_at(1), TokenKind::Keyword(Keyword::Not)) {
                        self.advance();
                        CmpOp::IsNot
                    } else {
                        CmpOp::Is
                    }
                }
                TokenKind::Keyword(Keyword::Not) if matches!(self.peek_at(1), TokenKind::Keyword(Keyword::In)) => {
                    self.advance();
                    CmpOp::NotIn
                }
                _ => break,
            };
            self.advance();
            ops.push(op);
            comparators.push(self.parse_bitor()?);
        }
        if ops.is_empty() {
            return Ok(left);
        }
        Ok(Expr::new(
            ExprKind::Compare {
                left: Box::new(left),
                ops,
                comparators,
            },
            pos,
        ))
    }

    fn parse_bitor(&mut self) -> Result<Expr> {
        self.parse_binary_level(0)
    }

    fn parse_binary_level(&mut self, level: usize) -> Result<Expr> {
        if level >= BINARY_LEVELS.len() {
            return self.parse_factor();
        }
        let pos = self.pos();
        let mut left = self.parse_binary_level(level + 1)?;
        loop {
            let op = match self.peek() {
                TokenKind::Operator(tok) => BINARY_LEVELS[level].iter().find(|(o, _)| o == tok).map(|(_, b)| *b),
                _ => None,
            };
            let Some(op) = op else { break };
            self.advance();
            let right = self.parse_binary_level(level + 1)?;
            left = Expr::new(
                ExprKind::BinOp {
                    left: Box::new(left),
                    op,
                    right: Box::new(right),
                },
                pos,
            );
        }
        Ok(left)
    }

    fn parse_factor(&mut self) -> Result<Expr> {
        let pos = self.pos();
        let op = match self.peek() {
            TokenKind::Operator(Operator::Minus) => Some(UnaryOp::Neg),
            TokenKind::Operator(Operator::Plus) => Some(UnaryOp::Pos),
            TokenKind::Operator(Operator::Tilde) => Some(UnaryOp::Invert),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let operand = self.parse_factor()?;
            return Ok(Expr::new(
                ExprKind::UnaryOp {
                    op,
                    operand: Box::new(operand),
                },
                pos,
            ));
        }
        self.parse_power()
    }

    fn parse_power(&mut self) -> Result<Expr> {
        let pos = self.pos();
        let base = if self.eat_kw(Keyword::Await) {
            let inner = self.parse_primary()?;
            Expr::new(ExprKind::Await(Box::new(inner)), pos)
        } else {
            self.parse_primary()?
        };
        if self.eat_op(Operator::DoubleStar) {
            let exponent = self.parse_factor()?;
            return Ok(Expr::new(
                ExprKind::BinOp {
                    left: Box::new(base),
                    op: BinOp::Pow,
                    right: Box::new(exponent),
                },
                pos,
            ));
        }
        Ok(base)
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        let mut expr = self.parse_atom()?;
        loop {
            let pos = expr.pos;
            if self.eat_delim(Delimiter::LParen) {
                let (args, kwargs) = self.parse_call_args()?;
                expr = Expr::new(
                    ExprKind::Call {
                        func: Box::new(expr),
                        args,
                        kwargs,
                    },
                    pos,
                );
            } else if self.eat_delim(Delimiter::LBracket) {
                let index = self.parse_subscript_list()?;
                self.expect_delim(Delimiter::RBracket)?;
                expr = Expr::new(
                    ExprKind::Index {
                        target: Box::new(expr),
                        index: Box::new(index),
                    },
                    pos,
                );
            } else if self.eat_delim(Delimiter::Dot) {
                let attr = self.expect_name()?;
                expr = Expr::new(
                    ExprKind::Attribute {
                        value: Box::new(expr),
                        attr,
                    },
                    pos,
                );
            } else {
                break;
            }
        }
        Ok(expr)
    }

    /// Arguments after an opening parenthesis, consuming the closing one
    fn parse_call_args(&mut self) -> Result<(Vec<Expr>, Vec<(String, Expr)>)> {
        let mut args = Vec::new();
        let mut kwargs = Vec::new();
        loop {
            if self.eat_delim(Delimiter::RParen) {
                break;
            }
            let pos = self.pos();
            if self.eat_op(Operator::Star) {
                let inner = self.parse_test()?;
                args.push(Expr::new(ExprKind::Starred(Box::new(inner)), pos));
            } else if self.eat_op(Operator::DoubleStar) {
                let inner = self.parse_test()?;
                args.push(Expr::new(ExprKind::DoubleStarred(Box::new(inner)), pos));
            } else if matches!(self.peek(), TokenKind::Name(_))
                && matches!(self.peek_at(1), TokenKind::Operator(Operator::Assign))
            {
                let name = self.expect_name()?;
                self.advance();
                kwargs.push((name, self.parse_test()?));
            } else {
                let value = self.parse_named_test()?;
                if self.at_kw(Keyword::For) || self.at_kw(Keyword::Async) {
                    let generators = self.parse_comp_clauses()?;
                    args.push(Expr::new(
                        ExprKind::GenExpr {
                            elt: Box::new(value),
                            generators,
                        },
                        pos,
                    ));
                } else {
                    args.push(value);
                }
            }
            if !self.eat_delim(Delimiter::Comma) {
                self.expect_delim(Delimiter::RParen)?;
                break;
            }
        }
        Ok((args, kwargs))
    }

    fn parse_subscript_list(&mut self) -> Result<Expr> {
        let pos = self.pos();
        let first = self.parse_slice_item()?;
        if !self.at_delim(Delimiter::Comma) {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_delim(Delimiter::Comma) {
            if self.at_delim(Delimiter::RBracket) {
                break;
            }
            items.push(self.parse_slice_item()?);
        }
        Ok(Expr::new(ExprKind::Tuple(items), pos))
    }

    fn parse_slice_item(&mut self) -> Result<Expr> {
        let pos = self.pos();
        let lower = if self.at_op(Operator::Colon) { None } else { Some(self.parse_named_test()?) };
        if !self.at_op(Operator::Colon) {
            return lower.ok_or_else(|| self.error("expected subscript"));
        }
        self.advance();
        let ends = |p: &Parser| {
            p.at_op(Operator::Colon) || p.at_delim(Delimiter::Comma) || p.at_delim(Delimiter::RBracket)
        };
        let upper = if ends(&*self) { None } else { Some(Box::new(self.parse_test()?)) };
        let step = if self.eat_op(Operator::Colon) {
            if self.at_delim(Delimiter::Comma) || self.at_delim(Delimiter::RBracket) {
                None
            } else {
                Some(Box::new(self.parse_test()?))
            }
        } else {
            None
        };
        Ok(Expr::new(
            ExprKind::Slice {
                lower: lower.map(Box::new),
                upper,
                step,
            },
            pos,
        ))
    }

    fn parse_comp_clauses(&mut self) -> Result<Vec<Comprehension>> {
        let mut generators = Vec::new();
        loop {
            let is_async = self.eat_kw(Keyword::Async);
            if !self.eat_kw(Keyword::For) {
                if is_async {
                    return Err(self.error("expected 'for' after 'async'"));
                }
                break;
            }
            let target = self.parse_target_list()?;
            self.expect_kw(Keyword::In)?;
            let iter = self.parse_or_test()?;
            let mut ifs = Vec::new();
            while self.eat_kw(Keyword::If) {
                ifs.push(self.parse_or_test()?);
            }
            generators.push(Comprehension {
                target,
                iter,
                ifs,
                is_async,
            });
            if !self.at_kw(Keyword::For) && !self.at_kw(Keyword::Async) {
                break;
            }
        }
        Ok(generators)
    }

    fn parse_atom(&mut self) -> Result<Expr> {
        let pos = self.pos();
        let kind = match self.peek().clone() {
            TokenKind::Name(name) => {
                self.advance();
                ExprKind::Ident(name)
            }
            TokenKind::Int { value, text } => {
                self.advance();
                ExprKind::IntLiteral { value, text }
            }
            TokenKind::Float { value, text } => {
                self.advance();
                ExprKind::FloatLiteral { value, text }
            }
            TokenKind::Str { .. } => return self.parse_strings(),
            TokenKind::Keyword(Keyword::True) => {
                self.advance();
                ExprKind::BoolLiteral(true)
            }
            TokenKind::Keyword(Keyword::False) => {
                self.advance();
                ExprKind::BoolLiteral(false)
            }
            TokenKind::Keyword(Keyword::None) => {
                self.advance();
                ExprKind::NoneLiteral
            }
            TokenKind::Delimiter(Delimiter::Ellipsis) => {
                self.advance();
                ExprKind::Ellipsis
            }
            TokenKind::Delimiter(Delimiter::LParen) => {
                self.advance();
                return self.parse_paren(pos);
            }
            TokenKind::Delimiter(Delimiter::LBracket) => {
                self.advance();
                return self.parse_list_display(pos);
            }
            TokenKind::Delimiter(Delimiter::LBrace) => {
                self.advance();
                return self.parse_brace_display(pos);
            }
            _ => return Err(self.error("expected expression")),
        };
        Ok(Expr::new(kind, pos))
    }

    fn parse_paren(&mut self, pos: SourcePos) -> Result<Expr> {
        if self.eat_delim(Delimiter::RParen) {
            return Ok(Expr::new(ExprKind::Tuple(Vec::new()), pos));
        }
        if self.at_kw(Keyword::Yield) {
            let value = self.parse_yield()?;
            self.expect_delim(Delimiter::RParen)?;
            return Ok(value);
        }
        let first = self.parse_star_or_named_test()?;
        if self.at_kw(Keyword::For) || self.at_kw(Keyword::Async) {
            let generators = self.parse_comp_clauses()?;
            self.expect_delim(Delimiter::RParen)?;
            return Ok(Expr::new(
                ExprKind::GenExpr {
                    elt: Box::new(first),
                    generators,
                },
                pos,
            ));
        }
        if !self.at_delim(Delimiter::Comma) {
            self.expect_delim(Delimiter::RParen)?;
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_delim(Delimiter::Comma) {
            if self.at_delim(Delimiter::RParen) {
                break;
            }
            items.push(self.parse_star_or_named_test()?);
        }
        self.expect_delim(Delimiter::RParen)?;
        Ok(Expr::new(ExprKind::Tuple(items), pos))
    }

    fn parse_list_display(&mut self, pos: SourcePos) -> Result<Expr> {
        if self.eat_delim(Delimiter::RBracket) {
            return Ok(Expr::new(ExprKind::List(Vec::new()), pos));
        }
        let first = self.parse_star_or_named_test()?;
        if self.at_kw(Keyword::For) || self.at_kw(Keyword::Async) {
            let generators = self.parse_comp_clauses()?;
            self.expect_delim(Delimiter::RBracket)?;
            return Ok(Expr::new(
                ExprKind::ListComp {
                    elt: Box::new(first),
                    generators,
                },
                pos,
            ));
        }
        let mut items = vec![first];
        while self.eat_delim(Delimiter::Comma) {
            if self.at_delim(Delimiter::RBracket) {
                break;
            }
            items.push(self.parse_star_or_named_test()?);
        }
        self.expect_delim(Delimiter::RBracket)?;
        Ok(Expr::new(ExprKind::List(items), pos))
    }

    fn parse_brace_display(&mut self, pos: SourcePos) -> Result<Expr> {
        if self.eat_delim(Delimiter::RBrace) {
            return Ok(Expr::new(ExprKind::Dict(Vec::new()), pos));
        }

        // dict: first entry decides
        let first_key = if self.eat_op(Operator::DoubleStar) {
            None
        } else {
            Some(self.parse_star_or_named_test()?)
        };

        let is_dict = first_key.is_none() || self.at_op(Operator::Colon);
        if !is_dict {
            let first = first_key.ok_or_else(|| self.error("expected set element"))?;
            if self.at_kw(Keyword::For) || self.at_kw(Keyword::Async) {
                let generators = self.parse_comp_clauses()?;
                self.expect_delim(Delimiter::RBrace)?;
                return Ok(Expr::new(
                    ExprKind::SetComp {
                        elt: Box::new(first),
                        generators,
                    },
                    pos,
                ));
            }
            let mut items = vec![first];
            while self.eat_delim(Delimiter::Comma) {
                if self.at_delim(Delimiter::RBrace) {
                    break;
                }
                items.push(self.parse_star_or_named_test()?);
            }
            self.expect_delim(Delimiter::RBrace)?;
            return Ok(Expr::new(ExprKind::Set(items), pos));
        }

        let first_value = if first_key.is_some() {
            self.expect_op(Operator::Colon)?;
            self.parse_test()?
        } else {
            self.parse_bitor()?
        };
        if let Some(key) = &first_key {
            if self.at_kw(Keyword::For) || self.at_kw(Keyword::Async) {
                let generators = self.parse_comp_clauses()?;
                self.expect_delim(Delimiter::RBrace)?;
                return Ok(Expr::new(
                    ExprKind::DictComp {
                        key: Box::new(key.clone()),
                        value: Box::new(first_value),
                        generators,
                    },
                    pos,
                ));
            }
        }
        let mut entries = vec![(first_key, first_value)];
        while self.eat_delim(Delimiter::Comma) {
            if self.at_delim(Delimiter::RBrace) {
                break;
            }
            if self.eat_op(Operator::DoubleStar) {
                entries.push((None, self.parse_bitor()?));
                continue;
            }
            let key = self.parse_test()?;
            self.expect_op(Operator::Colon)?;
            let value = self.parse_test()?;
            entries.push((Some(key), value));
        }
        self.expect_delim(Delimiter::RBrace)?;
        Ok(Expr::new(ExprKind::Dict(entries), pos))
    }

    /// Adjacent string literals concatenate; any `f` piece makes the whole an f-string
    fn parse_strings(&mut self) -> Result<Expr> {
        let pos = self.pos();
        let mut parts: Vec<FStringPart> = Vec::new();
        let mut bytes: Vec<u8> = Vec::new();
        let mut saw_bytes = false;
        let mut saw_text = false;
        let mut saw_format = false;
        let mut pieces = 0usize;
        let mut all_raw = true;

        while let TokenKind::Str { body, prefix } = self.peek().clone() {
            self.advance();
            pieces += 1;
            all_raw &= prefix.raw;
            if prefix.bytes {
                saw_bytes = true;
                bytes.extend(decode_bytes(&body, prefix, pos)?);
                continue;
            }
            saw_text = true;
            if prefix.format {
                saw_format = true;
                for part in parse_fstring_body(&body, prefix.raw, pos)? {
                    push_part(&mut parts, part);
                }
            } else {
                let value = if prefix.raw { body } else { lexer::decode_escapes(&body) };
                push_part(&mut parts, FStringPart::Literal(value));
            }
        }

        if saw_bytes && saw_text {
            return Err(DepylerError::parse(pos, "cannot mix bytes and nonbytes literals"));
        }
        if saw_bytes {
            return Ok(Expr::new(ExprKind::BytesLiteral(bytes), pos));
        }
        if saw_format {
            return Ok(Expr::new(ExprKind::FString(parts), pos));
        }
        let value = match parts.into_iter().next() {
            Some(FStringPart::Literal(s)) => s,
            _ => String::new(),
        };
        Ok(Expr::new(
            ExprKind::StringLiteral {
                value,
                raw: all_raw && pieces == 1,
            },
            pos,
        ))
    }
}

fn push_part(parts: &mut Vec<FStringPart>, part: FStringPart) {
    if let FStringPart::Literal(text) = &part {
        if let Some(FStringPart::Literal(last)) = parts.last_mut() {
            last.push_str(text);
            return;
        }
    }
    parts.push(part);
}

fn decode_bytes(body: &str, prefix: StrPrefix, pos: SourcePos) -> Result<Vec<u8>> {
    let text = if prefix.raw { body.to_string() } else { lexer::decode_escapes(body) };
    text.chars()
        .map(|c| u8::try_from(c as u32).map_err(|_| DepylerError::parse(pos, "bytes can only contain ASCII literal characters")))
        .collect()
}

/// Split an f-string body into literal and replacement fragments
fn parse_fstring_body(body: &str, raw: bool, pos: SourcePos) -> Result<Vec<FStringPart>> {
    let chars: Vec<char> = body.chars().collect();
    let mut parts = Vec::new();
    let mut literal = String::new();
    let decode = |s: &str| if raw { s.to_string() } else { lexer::decode_escapes(s) };
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c == '}' {
            if chars.get(i + 1) == Some(&'}') {
                literal.push('}');
                i += 2;
                continue;
            }
            return Err(DepylerError::parse(pos, "f-string: single '}' is not allowed"));
        }
        if c != '{' {
            literal.push(c);
            i += 1;
            continue;
        }
        if chars.get(i + 1) == Some(&'{') {
            literal.push('{');
            i += 2;
            continue;
        }
        if !literal.is_empty() {
            parts.push(FStringPart::Literal(decode(&literal)));
            literal.clear();
        }

        // expression part
        let mut j = i + 1;
        let mut depth = 0i32;
        let mut quote: Option<char> = None;
        while j < chars.len() {
            let ch = chars[j];
            if let Some(q) = quote {
                if ch == q {
                    quote = None;
                }
                j += 1;
                continue;
            }
            match ch {
                '\'' | '"' => quote = Some(ch),
                '(' | '[' | '{' => depth += 1,
                ')' | ']' => depth -= 1,
                '}' if depth > 0 => depth -= 1,
                '}' => break,
                '!' if depth == 0 && chars.get(j + 1) != Some(&'=') => break,
                ':' if depth == 0 => break,
                _ => {}
            }
            j += 1;
        }
        let mut expr_text: String = chars[i + 1..j.min(chars.len())].iter().collect();

        let mut conversion = None;
        if chars.get(j) == Some(&'!') {
            conversion = chars.get(j + 1).copied();
            j += 2;
        }
        let mut format_spec = None;
        if chars.get(j) == Some(&':') {
            let start = j + 1;
            let mut k = start;
            while k < chars.len() && chars[k] != '}' {
                if chars[k] == '{' {
                    return Err(DepylerError::unsupported(pos, "nested f-string format specifications"));
                }
                k += 1;
            }
            format_spec = Some(chars[start..k].iter().collect::<String>());
            j = k;
        }
        if chars.get(j) != Some(&'}') {
            return Err(DepylerError::parse(pos, "f-string: expecting '}'"));
        }

        // f"{x=}" debug form
        let trimmed = expr_text.trim_end().to_string();
        if trimmed.ends_with('=') && !["==", "!=", "<=", ">="].iter().any(|op| trimmed.ends_with(op)) {
            parts.push(FStringPart::Literal(expr_text.clone()));
            expr_text = trimmed[..trimmed.len() - 1].to_string();
            if conversion.is_none() && format_spec.is_none() {
                conversion = Some('r');
            }
        }

        if expr_text.trim().is_empty() {
            return Err(DepylerError::parse(pos, "f-string: empty expression not allowed"));
        }
        let value = parse_expression(&expr_text, pos)?;
        parts.push(FStringPart::Expr {
            value,
            conversion,
            format_spec,
        });
        i = j + 1;
    }
    if !literal.is_empty() {
        parts.push(FStringPart::Literal(decode(&literal)));
    }
    Ok(parts)
}

fn describe(kind: &TokenKind) -> String {
    match kind {
        TokenKind::Int { text, .. } | TokenKind::Float { text, .. } => format!("'{text}'"),
        TokenKind::Str { .. } => "string literal".to_string(),
        TokenKind::Name(name) => format!("'{name}'"),
        TokenKind::Keyword(kw) => format!("keyword {kw:?}"),
        TokenKind::Operator(op) => format!("operator {op:?}"),
        TokenKind::Delimiter(d) => format!("{d:?}"),
        TokenKind::Indent => "indent".to_string(),
        TokenKind::Dedent => "dedent".to_string(),
        TokenKind::Newline => "newline".to_string(),
        TokenKind::Eof => "end of input".to_string(),
    }
}
