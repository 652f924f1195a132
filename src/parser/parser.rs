//! Recursive-descent statement parser + precedence-climbing expression
//! parser (spec.md §4.2). The teacher's own parser drives an external CST
//! library rather than walking tokens itself, so the control flow here is
//! grounded on the reference Lua grammar's standard operator-precedence
//! table instead (`lparser.c`'s `priority[]`), keyed off our `TokenKind`.

use crate::lexer::{Lexer, Token, TokenKind};
use crate::parser::ast::*;
use crate::parser::error::ParseError;
use std::rc::Rc;

type PResult<T> = Result<T, ParseError>;

pub fn parse(src: &[u8], chunk_name: &str) -> PResult<Block> {
    let tokens = Lexer::new(src).tokenize()?;
    let mut p = Parser {
        tokens,
        pos: 0,
        chunk_name: chunk_name.to_string(),
    };
    let block = p.block()?;
    p.expect(TokenKind::Eof)?;
    Ok(block)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    chunk_name: String,
}

fn bin_op_of(kind: TokenKind) -> Option<(BinOp, u8, u8)> {
    use TokenKind::*;
    Some(match kind {
        Plus => (BinOp::Add, 10, 10),
        Minus => (BinOp::Sub, 10, 10),
        Star => (BinOp::Mul, 11, 11),
        Percent => (BinOp::Mod, 11, 11),
        Caret => (BinOp::Pow, 14, 13),
        Slash => (BinOp::Div, 11, 11),
        DSlash => (BinOp::IDiv, 11, 11),
        Amp => (BinOp::BAnd, 6, 6),
        Pipe => (BinOp::BOr, 4, 4),
        Tilde => (BinOp::BXor, 5, 5),
        Shl => (BinOp::Shl, 7, 7),
        Shr => (BinOp::Shr, 7, 7),
        Concat => (BinOp::Concat, 9, 8),
        Eq => (BinOp::Eq, 3, 3),
        Ne => (BinOp::Ne, 3, 3),
        Lt => (BinOp::Lt, 3, 3),
        Le => (BinOp::Le, 3, 3),
        Gt => (BinOp::Gt, 3, 3),
        Ge => (BinOp::Ge, 3, 3),
        And => (BinOp::And, 2, 2),
        Or => (BinOp::Or, 1, 1),
        _ => return None,
    })
}

const UNARY_PRIORITY: u8 = 12;

impl Parser {
    fn cur(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn kind(&self) -> TokenKind {
        self.cur().kind
    }

    fn line(&self) -> u32 {
        self.cur().line
    }

    fn advance(&mut self) -> Token {
        let t = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        t
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.kind() == kind
    }

    fn accept(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind) -> PResult<Token> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(self.err(format!(
                "'{:?}' expected near '{}'",
                kind,
                self.cur_text()
            )))
        }
    }

    fn cur_text(&self) -> String {
        let t = self.cur();
        if t.kind == TokenKind::Eof {
            "<eof>".to_string()
        } else if !t.text.is_empty() {
            t.text.clone()
        } else {
            format!("{:?}", t.kind)
        }
    }

    fn expect_name(&mut self) -> PResult<String> {
        if self.check(TokenKind::Name) {
            Ok(self.advance().text)
        } else {
            Err(self.err(format!("<name> expected near '{}'", self.cur_text())))
        }
    }

    fn err(&self, message: impl Into<String>) -> ParseError {
        ParseError {
            message: message.into(),
            line: self.line(),
        }
    }

    fn block_ends(&self) -> bool {
        matches!(
            self.kind(),
            TokenKind::Eof
                | TokenKind::End
                | TokenKind::Else
                | TokenKind::Elseif
                | TokenKind::Until
        )
    }

    fn block(&mut self) -> PResult<Block> {
        let mut stmts = Vec::new();
        while !self.block_ends() {
            if self.check(TokenKind::Return) {
                stmts.push(self.return_stat()?);
                break;
            }
            if let Some(s) = self.statement()? {
                stmts.push(s);
            }
        }
        Ok(Block { stmts })
    }

    fn return_stat(&mut self) -> PResult<Stmt> {
        let line = self.line();
        self.advance();
        let mut exprs = Vec::new();
        if !self.block_ends() && !self.check(TokenKind::Semi) {
            exprs = self.expr_list()?;
        }
        self.accept(TokenKind::Semi);
        Ok(Stmt::Return { exprs, line })
    }

    /// Returns `None` for a lone `;` (no-op statement).
    fn statement(&mut self) -> PResult<Option<Stmt>> {
        let line = self.line();
        match self.kind() {
            TokenKind::Semi => {
                self.advance();
                Ok(None)
            }
            TokenKind::If => Ok(Some(self.if_stat()?)),
            TokenKind::While => Ok(Some(self.while_stat()?)),
            TokenKind::Do => {
                self.advance();
                let b = self.block()?;
                self.expect(TokenKind::End)?;
                Ok(Some(Stmt::Do(b)))
            }
            TokenKind::For => Ok(Some(self.for_stat()?)),
            TokenKind::Repeat => Ok(Some(self.repeat_stat()?)),
            TokenKind::Function => Ok(Some(self.function_stat()?)),
            TokenKind::Local => Ok(Some(self.local_stat()?)),
            TokenKind::DColon => {
                self.advance();
                let name = self.expect_name()?;
                self.expect(TokenKind::DColon)?;
                Ok(Some(Stmt::Label(name)))
            }
            TokenKind::Break => {
                self.advance();
                Ok(Some(Stmt::Break))
            }
            TokenKind::Goto => {
                self.advance();
                let label = self.expect_name()?;
                Ok(Some(Stmt::Goto { label, line }))
            }
            _ => Ok(Some(self.expr_stat()?)),
        }
    }

    fn if_stat(&mut self) -> PResult<Stmt> {
        self.advance();
        let mut arms = Vec::new();
        let cond = self.expr()?;
        self.expect(TokenKind::Then)?;
        let body = self.block()?;
        arms.push((cond, body));
        while self.check(TokenKind::Elseif) {
            self.advance();
            let cond = self.expr()?;
            self.expect(TokenKind::Then)?;
            let body = self.block()?;
            arms.push((cond, body));
        }
        let else_block = if self.accept(TokenKind::Else) {
            Some(self.block()?)
        } else {
            None
        };
        self.expect(TokenKind::End)?;
        Ok(Stmt::If { arms, else_block })
    }

    fn while_stat(&mut self) -> PResult<Stmt> {
        self.advance();
        let cond = self.expr()?;
        self.expect(TokenKind::Do)?;
        let body = self.block()?;
        self.expect(TokenKind::End)?;
        Ok(Stmt::While { cond, body })
    }

    fn repeat_stat(&mut self) -> PResult<Stmt> {
        self.advance();
        let body = self.block()?;
        self.expect(TokenKind::Until)?;
        let cond = self.expr()?;
        Ok(Stmt::Repeat { body, cond })
    }

    fn for_stat(&mut self) -> PResult<Stmt> {
        let line = self.line();
        self.advance();
        let first = self.expect_name()?;
        if self.check(TokenKind::Assign) {
            self.advance();
            let start = self.expr()?;
            self.expect(TokenKind::Comma)?;
            let stop = self.expr()?;
            let step = if self.accept(TokenKind::Comma) {
                Some(self.expr()?)
            } else {
                None
            };
            self.expect(TokenKind::Do)?;
            let body = self.block()?;
            self.expect(TokenKind::End)?;
            Ok(Stmt::NumericFor {
                var: first,
                start,
                stop,
                step,
                body,
                line,
            })
        } else {
            let mut names = vec![first];
            while self.accept(TokenKind::Comma) {
                names.push(self.expect_name()?);
            }
            self.expect(TokenKind::In)?;
            let exprs = self.expr_list()?;
            self.expect(TokenKind::Do)?;
            let body = self.block()?;
            self.expect(TokenKind::End)?;
            Ok(Stmt::GenericFor {
                names,
                exprs,
                body,
                line,
            })
        }
    }

    fn function_stat(&mut self) -> PResult<Stmt> {
        let line = self.line();
        self.advance();
        let mut name_parts = vec![self.expect_name()?];
        let mut is_method = false;
        while self.accept(TokenKind::Dot) {
            name_parts.push(self.expect_name()?);
        }
        if self.accept(TokenKind::Colon) {
            name_parts.push(self.expect_name()?);
            is_method = true;
        }
        let full_name = name_parts.join(if is_method { ":" } else { "." });
        let mut target = Expr::Name(name_parts[0].clone());
        for part in &name_parts[1..] {
            target = Expr::Index(
                Box::new(target),
                Box::new(Expr::Str(part.clone().into_bytes())),
                line,
            );
        }
        let mut body = self.function_body(full_name.clone())?;
        if is_method {
            Rc::get_mut(&mut body)
                .expect("fresh Rc")
                .params
                .insert(0, "self".to_string());
        }
        Ok(Stmt::FunctionDecl {
            target,
            body,
            line,
        })
    }

    fn local_stat(&mut self) -> PResult<Stmt> {
        let line = self.line();
        self.advance();
        if self.accept(TokenKind::Function) {
            let name = self.expect_name()?;
            let body = self.function_body(name.clone())?;
            return Ok(Stmt::LocalFunction { name, body, line });
        }
        let mut names = Vec::new();
        loop {
            let name = self.expect_name()?;
            let attrib = if self.accept(TokenKind::Lt) {
                let a = self.expect_name()?;
                self.expect(TokenKind::Gt)?;
                match a.as_str() {
                    "const" => Attrib::Const,
                    "close" => Attrib::Close,
                    other => {
                        return Err(self.err(format!("unknown attribute '{}'", other)));
                    }
                }
            } else {
                Attrib::None
            };
            names.push((name, attrib));
            if !self.accept(TokenKind::Comma) {
                break;
            }
        }
        let exprs = if self.accept(TokenKind::Assign) {
            self.expr_list()?
        } else {
            Vec::new()
        };
        Ok(Stmt::Local {
            names,
            exprs,
            line,
        })
    }

    fn expr_stat(&mut self) -> PResult<Stmt> {
        let line = self.line();
        let first = self.suffixed_expr()?;
        if self.check(TokenKind::Assign) || self.check(TokenKind::Comma) {
            let mut targets = vec![first];
            while self.accept(TokenKind::Comma) {
                targets.push(self.suffixed_expr()?);
            }
            self.expect(TokenKind::Assign)?;
            let exprs = self.expr_list()?;
            for t in &targets {
                if !matches!(t, Expr::Name(_) | Expr::Index(..)) {
                    return Err(self.err("syntax error (cannot assign to this expression)"));
                }
            }
            Ok(Stmt::Assign {
                targets,
                exprs,
                line,
            })
        } else {
            if !matches!(first, Expr::Call { .. } | Expr::MethodCall { .. }) {
                return Err(self.err("syntax error (expected statement)"));
            }
            Ok(Stmt::ExprStat(first))
        }
    }

    fn expr_list(&mut self) -> PResult<Vec<Expr>> {
        let mut out = vec![self.expr()?];
        while self.accept(TokenKind::Comma) {
            out.push(self.expr()?);
        }
        Ok(out)
    }

    fn expr(&mut self) -> PResult<Expr> {
        self.sub_expr(0)
    }

    fn sub_expr(&mut self, limit: u8) -> PResult<Expr> {
        let line = self.line();
        let mut left = match self.kind() {
            TokenKind::Not => {
                self.advance();
                Expr::UnOp(UnOp::Not, Box::new(self.sub_expr(UNARY_PRIORITY)?), line)
            }
            TokenKind::Minus => {
                self.advance();
                Expr::UnOp(UnOp::Neg, Box::new(self.sub_expr(UNARY_PRIORITY)?), line)
            }
            TokenKind::Hash => {
                self.advance();
                Expr::UnOp(UnOp::Len, Box::new(self.sub_expr(UNARY_PRIORITY)?), line)
            }
            TokenKind::Tilde => {
                self.advance();
                Expr::UnOp(UnOp::BNot, Box::new(self.sub_expr(UNARY_PRIORITY)?), line)
            }
            _ => self.simple_expr()?,
        };
        while let Some((op, lprec, rprec)) = bin_op_of(self.kind()) {
            if lprec <= limit {
                break;
            }
            let op_line = self.line();
            self.advance();
            let right = self.sub_expr(rprec)?;
            left = Expr::BinOp(op, Box::new(left), Box::new(right), op_line);
        }
        Ok(left)
    }

    fn simple_expr(&mut self) -> PResult<Expr> {
        let line = self.line();
        match self.kind() {
            TokenKind::Nil => {
                self.advance();
                Ok(Expr::Nil)
            }
            TokenKind::True => {
                self.advance();
                Ok(Expr::True)
            }
            TokenKind::False => {
                self.advance();
                Ok(Expr::False)
            }
            TokenKind::Dots => {
                self.advance();
                Ok(Expr::Vararg)
            }
            TokenKind::IntLit => {
                let t = self.advance();
                Ok(Expr::Int(t.int_val))
            }
            TokenKind::FloatLit => {
                let t = self.advance();
                Ok(Expr::Float(t.float_val))
            }
            TokenKind::StringLit => {
                let t = self.advance();
                Ok(Expr::Str(t.str_val))
            }
            TokenKind::Function => {
                self.advance();
                let body = self.function_body(String::new())?;
                Ok(Expr::Function(body))
            }
            TokenKind::LBrace => self.table_constructor(),
            _ => self.suffixed_expr_line(line),
        }
    }

    fn primary_expr(&mut self) -> PResult<Expr> {
        match self.kind() {
            TokenKind::LParen => {
                self.advance();
                let e = self.expr()?;
                self.expect(TokenKind::RParen)?;
                Ok(Expr::Paren(Box::new(e)))
            }
            TokenKind::Name => Ok(Expr::Name(self.advance().text)),
            _ => Err(self.err(format!("unexpected symbol near '{}'", self.cur_text()))),
        }
    }

    fn suffixed_expr_line(&mut self, _line: u32) -> PResult<Expr> {
        self.suffixed_expr()
    }

    fn suffixed_expr(&mut self) -> PResult<Expr> {
        let mut e = self.primary_expr()?;
        loop {
            let line = self.line();
            match self.kind() {
                TokenKind::Dot => {
                    self.advance();
                    let name = self.expect_name()?;
                    e = Expr::Index(Box::new(e), Box::new(Expr::Str(name.into_bytes())), line);
                }
                TokenKind::LBracket => {
                    self.advance();
                    let idx = self.expr()?;
                    self.expect(TokenKind::RBracket)?;
                    e = Expr::Index(Box::new(e), Box::new(idx), line);
                }
                TokenKind::Colon => {
                    self.advance();
                    let method = self.expect_name()?;
                    let args = self.call_args()?;
                    e = Expr::MethodCall {
                        obj: Box::new(e),
                        method,
                        args,
                        line,
                    };
                }
                TokenKind::LParen | TokenKind::StringLit | TokenKind::LBrace => {
                    let args = self.call_args()?;
                    e = Expr::Call {
                        func: Box::new(e),
                        args,
                        line,
                    };
                }
                _ => break,
            }
        }
        Ok(e)
    }

    fn call_args(&mut self) -> PResult<Vec<Expr>> {
        match self.kind() {
            TokenKind::LParen => {
                self.advance();
                let args = if self.check(TokenKind::RParen) {
                    Vec::new()
                } else {
                    self.expr_list()?
                };
                self.expect(TokenKind::RParen)?;
                Ok(args)
            }
            TokenKind::StringLit => {
                let t = self.advance();
                Ok(vec![Expr::Str(t.str_val)])
            }
            TokenKind::LBrace => Ok(vec![self.table_constructor()?]),
            _ => Err(self.err(format!("function arguments expected near '{}'", self.cur_text()))),
        }
    }

    fn table_constructor(&mut self) -> PResult<Expr> {
        let line = self.line();
        self.expect(TokenKind::LBrace)?;
        let mut fields = Vec::new();
        while !self.check(TokenKind::RBrace) {
            match self.kind() {
                TokenKind::LBracket => {
                    self.advance();
                    let key = self.expr()?;
                    self.expect(TokenKind::RBracket)?;
                    self.expect(TokenKind::Assign)?;
                    let val = self.expr()?;
                    fields.push(TableField::Indexed(key, val));
                }
                TokenKind::Name if self.peek_is_assign() => {
                    let name = self.advance().text;
                    self.advance(); // '='
                    let val = self.expr()?;
                    fields.push(TableField::Named(name, val));
                }
                _ => {
                    fields.push(TableField::Positional(self.expr()?));
                }
            }
            if !self.accept(TokenKind::Comma) && !self.accept(TokenKind::Semi) {
                break;
            }
        }
        self.expect(TokenKind::RBrace)?;
        Ok(Expr::Table(fields, line))
    }

    fn peek_is_assign(&self) -> bool {
        self.tokens
            .get(self.pos + 1)
            .map(|t| t.kind == TokenKind::Assign)
            .unwrap_or(false)
    }

    fn function_body(&mut self, name: String) -> PResult<Rc<FunctionBody>> {
        let line = self.line();
        self.expect(TokenKind::LParen)?;
        let mut params = Vec::new();
        let mut is_vararg = false;
        if !self.check(TokenKind::RParen) {
            loop {
                if self.check(TokenKind::Dots) {
                    self.advance();
                    is_vararg = true;
                    break;
                }
                params.push(self.expect_name()?);
                if !self.accept(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(TokenKind::RParen)?;
        let body = self.block()?;
        self.expect(TokenKind::End)?;
        Ok(Rc::new(FunctionBody {
            params,
            is_vararg,
            body,
            line,
            name,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_assignment() {
        let block = parse(b"local x = 1 + 2 * 3", "test").unwrap();
        assert_eq!(block.stmts.len(), 1);
    }

    #[test]
    fn precedence_matches_lua() {
        // -x^2 parses as -(x^2): '^' binds tighter than unary minus.
        let block = parse(b"return -x^2", "test").unwrap();
        match &block.stmts[0] {
            Stmt::Return { exprs, .. } => match &exprs[0] {
                Expr::UnOp(UnOp::Neg, inner, _) => {
                    assert!(matches!(**inner, Expr::BinOp(BinOp::Pow, ..)));
                }
                _ => panic!("expected unary neg"),
            },
            _ => panic!("expected return"),
        }
    }

    #[test]
    fn concat_is_right_associative() {
        let block = parse(b"return a .. b .. c", "test").unwrap();
        match &block.stmts[0] {
            Stmt::Return { exprs, .. } => match &exprs[0] {
                Expr::BinOp(BinOp::Concat, left, right, _) => {
                    assert!(matches!(**left, Expr::Name(_)));
                    assert!(matches!(**right, Expr::BinOp(BinOp::Concat, ..)));
                }
                _ => panic!("expected concat"),
            },
            _ => panic!("expected return"),
        }
    }

    #[test]
    fn method_call_desugars_self() {
        let block = parse(b"function obj:m(x) end", "test").unwrap();
        match &block.stmts[0] {
            Stmt::FunctionDecl { body, .. } => {
                assert_eq!(body.params[0], "self");
                assert_eq!(body.params[1], "x");
            }
            _ => panic!("expected function decl"),
        }
    }

    #[test]
    fn const_attribute_parses() {
        let block = parse(b"local x <const> = 1", "test").unwrap();
        match &block.stmts[0] {
            Stmt::Local { names, .. } => assert_eq!(names[0].1, Attrib::Const),
            _ => panic!("expected local"),
        }
    }
}
