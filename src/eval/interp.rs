//! The tree-walking evaluator (spec.md §4.3).
//!
//! Grounded on the teacher's value model and calling convention
//! (`fn(&mut LuaState) -> LuaResult<usize>` stack-push protocol becomes
//! `fn(&mut Interp, &[Value]) -> Result<Vec<Value>, Control>` here, since
//! there is no register stack to push onto) but the statement/expression
//! dispatch itself has no teacher analogue — the teacher compiles to
//! bytecode instead of walking the AST — so it follows the reference Lua
//! manual's evaluation rules directly (§3.4 of the Lua 5.4 manual).

use crate::error::{Control, EvalResult, LuaError, LuaFullError};
use crate::eval::metamethod;
use crate::eval::scope::Scope;
use crate::gc::{GcRef, Heap};
use crate::parser::ast::*;
use crate::value::{Closure, FunctionKind, Proto, Table, Thread, Value};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::rc::Rc;

/// Mirrors reference Lua's `LUAI_MAXCCALLS`: caps recursion so a runaway
/// Lua program raises a catchable error instead of overflowing the host
/// stack (spec.md §7 edge case).
const MAX_CALL_DEPTH: u32 = 200;

pub struct Interp {
    pub heap: Heap,
    pub globals: GcRef<Table>,
    pub string_metatable: Option<GcRef<Table>>,
    pub rng: StdRng,
    pub call_depth: u32,
    pub source_name: String,
    pub main_thread: GcRef<Thread>,
    pub current_thread: GcRef<Thread>,
    /// One entry per currently active Lua call frame, pushed/popped
    /// around `exec_block` in `call_value_inner`. Walked by `gc_roots`
    /// so the collector sees locals on the call stack (spec.md §4.6),
    /// mirroring the teacher's register-stack root scan without a fixed
    /// register file to scan.
    call_scopes: Vec<Rc<Scope>>,
}

impl Interp {
    pub fn new(source_name: impl Into<String>) -> Interp {
        let mut heap = Heap::new();
        let globals = heap.alloc_table(Table::new());
        let main_thread = heap.alloc_thread(Thread::main());
        Interp {
            heap,
            globals,
            string_metatable: None,
            rng: StdRng::from_entropy(),
            call_depth: 0,
            source_name: source_name.into(),
            main_thread,
            current_thread: main_thread,
            call_scopes: Vec::new(),
        }
    }

    pub fn rt_error(&self, line: u32, message: impl Into<String>) -> Control {
        let message = message.into();
        let full = format!("{}:{}: {}", self.source_name, line, message);
        Control::Error(LuaFullError::new(
            LuaError::Runtime,
            full.clone(),
            Value::str(full.into_bytes()),
        ))
    }

    // ---- statements ----------------------------------------------------

    pub fn exec_block(&mut self, scope: &Rc<Scope>, block: &Block) -> EvalResult<()> {
        let result = self.exec_block_inner(scope, block);
        self.run_closers(scope, result)
    }

    fn exec_block_inner(&mut self, scope: &Rc<Scope>, block: &Block) -> EvalResult<()> {
        let mut i = 0;
        while i < block.stmts.len() {
            match self.exec_stmt(scope, &block.stmts[i]) {
                Ok(()) => i += 1,
                Err(Control::Goto(label)) => {
                    match block
                        .stmts
                        .iter()
                        .position(|s| matches!(s, Stmt::Label(l) if *l == label))
                    {
                        Some(pos) => i = pos + 1,
                        None => return Err(Control::Goto(label)),
                    }
                }
                Err(other) => return Err(other),
            }
        }
        Ok(())
    }

    fn run_closers(&mut self, scope: &Rc<Scope>, result: EvalResult<()>) -> EvalResult<()> {
        let closers = scope.take_to_close();
        if closers.is_empty() {
            return result;
        }
        let err_value = match &result {
            Err(Control::Error(e)) => e.value.clone(),
            _ => Value::Nil,
        };
        for (_name, cell) in closers {
            let v = cell.borrow().clone();
            if !v.is_truthy() {
                continue;
            }
            if let Some(mm) = metamethod::get_metamethod(self, &v, "__close") {
                if let Err(e) = self.call_value(mm, vec![v, err_value.clone()], 0) {
                    if result.is_ok() {
                        return Err(e);
                    }
                }
            }
        }
        result
    }

    fn exec_stmt(&mut self, scope: &Rc<Scope>, stmt: &Stmt) -> EvalResult<()> {
        match stmt {
            Stmt::ExprStat(e) => {
                self.eval_expr_multi(scope, e)?;
                Ok(())
            }
            Stmt::Local { names, exprs, line } => {
                let values = self.eval_expr_list(scope, exprs)?;
                for (i, (name, attrib)) in names.iter().enumerate() {
                    let v = values.get(i).cloned().unwrap_or(Value::Nil);
                    match attrib {
                        Attrib::None => {
                            scope.declare(name, v);
                        }
                        Attrib::Const => {
                            scope.declare_const(name, v, false);
                        }
                        Attrib::Close => {
                            if v.is_truthy() && metamethod::get_metamethod(self, &v, "__close").is_none() {
                                return Err(self.rt_error(
                                    *line,
                                    format!("variable '{name}' got a non-closable value"),
                                ));
                            }
                            scope.declare_const(name, v, true);
                        }
                    }
                }
                Ok(())
            }
            Stmt::Assign { targets, exprs, line } => {
                let values = self.eval_expr_list(scope, exprs)?;
                for (i, target) in targets.iter().enumerate() {
                    let v = values.get(i).cloned().unwrap_or(Value::Nil);
                    self.assign(scope, target, v, *line)?;
                }
                Ok(())
            }
            Stmt::If { arms, else_block } => {
                for (cond, body) in arms {
                    if self.eval_expr(scope, cond)?.is_truthy() {
                        let inner = Scope::child(scope);
                        return self.exec_block(&inner, body);
                    }
                }
                if let Some(body) = else_block {
                    let inner = Scope::child(scope);
                    return self.exec_block(&inner, body);
                }
                Ok(())
            }
            Stmt::While { cond, body } => {
                while self.eval_expr(scope, cond)?.is_truthy() {
                    let inner = Scope::child(scope);
                    match self.exec_block(&inner, body) {
                        Ok(()) => {}
                        Err(Control::Break) => break,
                        Err(other) => return Err(other),
                    }
                }
                Ok(())
            }
            Stmt::Repeat { body, cond } => loop {
                // the `until` condition can see locals from `body`, so it
                // shares the same child scope rather than getting its own.
                let inner = Scope::child(scope);
                let body_result = self.exec_block_inner(&inner, body);
                let stop = match body_result {
                    Ok(()) => self.eval_expr(&inner, cond),
                    Err(Control::Break) => {
                        self.run_closers(&inner, Ok(()))?;
                        break;
                    }
                    Err(other) => {
                        self.run_closers(&inner, Ok(()))?;
                        return Err(other);
                    }
                };
                self.run_closers(&inner, Ok(()))?;
                if stop?.is_truthy() {
                    break;
                }
            },
            Stmt::NumericFor {
                var,
                start,
                stop,
                step,
                body,
                line,
            } => self.exec_numeric_for(scope, var, start, stop, step.as_ref(), body, *line),
            Stmt::GenericFor {
                names,
                exprs,
                body,
                line,
            } => self.exec_generic_for(scope, names, exprs, body, *line),
            Stmt::FunctionDecl { target, body, .. } => {
                let closure = self.make_closure(scope, body);
                self.assign(scope, target, closure, body.line)
            }
            Stmt::LocalFunction { name, body, .. } => {
                // declared before the body is built so the function can
                // recurse by name (spec.md §4.3 `local function` rule).
                scope.declare(name, Value::Nil);
                let closure = self.make_closure(scope, body);
                if let Some((cell, _)) = scope.resolve(name) {
                    *cell.borrow_mut() = closure;
                }
                Ok(())
            }
            Stmt::Return { exprs, .. } => {
                let values = self.eval_expr_list(scope, exprs)?;
                Err(Control::Return(values))
            }
            Stmt::Break => Err(Control::Break),
            Stmt::Goto { label, .. } => Err(Control::Goto(label.clone())),
            Stmt::Label(_) => Ok(()),
            Stmt::Do(body) => {
                let inner = Scope::child(scope);
                self.exec_block(&inner, body)
            }
        }
    }

    fn exec_numeric_for(
        &mut self,
        scope: &Rc<Scope>,
        var: &str,
        start: &Expr,
        stop: &Expr,
        step: Option<&Expr>,
        body: &Block,
        line: u32,
    ) -> EvalResult<()> {
        let start_v = self.eval_expr(scope, start)?;
        let stop_v = self.eval_expr(scope, stop)?;
        let step_v = match step {
            Some(e) => self.eval_expr(scope, e)?,
            None => Value::Int(1),
        };
        let (start_n, stop_n, step_n) = (
            metamethod::to_number(&start_v)
                .ok_or_else(|| self.rt_error(line, "'for' initial value must be a number"))?,
            metamethod::to_number(&stop_v)
                .ok_or_else(|| self.rt_error(line, "'for' limit must be a number"))?,
            metamethod::to_number(&step_v)
                .ok_or_else(|| self.rt_error(line, "'for' step must be a number"))?,
        );
        if matches!(step_n, Value::Int(0)) || matches!(step_n, Value::Float(f) if f == 0.0) {
            return Err(self.rt_error(line, "'for' step is zero"));
        }
        let all_int = matches!(start_n, Value::Int(_))
            && matches!(stop_n, Value::Int(_))
            && matches!(step_n, Value::Int(_));
        if all_int {
            let (mut i, stop_i, step_i) = (
                start_n.as_int().unwrap(),
                stop_n.as_int().unwrap(),
                step_n.as_int().unwrap(),
            );
            loop {
                if step_i > 0 {
                    if i > stop_i {
                        break;
                    }
                } else if i < stop_i {
                    break;
                }
                let inner = Scope::child(scope);
                inner.declare(var, Value::Int(i));
                match self.exec_block(&inner, body) {
                    Ok(()) => {}
                    Err(Control::Break) => break,
                    Err(other) => return Err(other),
                }
                match i.checked_add(step_i) {
                    Some(next) => i = next,
                    None => break,
                }
            }
        } else {
            let (mut i, stop_f, step_f) = (
                start_n.as_float().unwrap(),
                stop_n.as_float().unwrap(),
                step_n.as_float().unwrap(),
            );
            loop {
                if step_f > 0.0 {
                    if i > stop_f {
                        break;
                    }
                } else if i < stop_f {
                    break;
                }
                let inner = Scope::child(scope);
                inner.declare(var, Value::Float(i));
                match self.exec_block(&inner, body) {
                    Ok(()) => {}
                    Err(Control::Break) => break,
                    Err(other) => return Err(other),
                }
                i += step_f;
            }
        }
        Ok(())
    }

    fn exec_generic_for(
        &mut self,
        scope: &Rc<Scope>,
        names: &[String],
        exprs: &[Expr],
        body: &Block,
        line: u32,
    ) -> EvalResult<()> {
        let mut ctrl = self.eval_expr_list(scope, exprs)?;
        while ctrl.len() < 3 {
            ctrl.push(Value::Nil);
        }
        let iter_fn = ctrl[0].clone();
        let state = ctrl[1].clone();
        let mut control = ctrl[2].clone();
        let closing = ctrl.get(3).cloned().unwrap_or(Value::Nil);
        let result = (|| -> EvalResult<()> {
            loop {
                let rets = self.call_value(iter_fn.clone(), vec![state.clone(), control.clone()], line)?;
                let first = rets.first().cloned().unwrap_or(Value::Nil);
                if first.is_nil() {
                    break;
                }
                control = first.clone();
                let inner = Scope::child(scope);
                for (i, name) in names.iter().enumerate() {
                    inner.declare(name, rets.get(i).cloned().unwrap_or(Value::Nil));
                }
                match self.exec_block(&inner, body) {
                    Ok(()) => {}
                    Err(Control::Break) => break,
                    Err(other) => return Err(other),
                }
            }
            Ok(())
        })();
        if closing.is_truthy() {
            if let Some(mm) = metamethod::get_metamethod(self, &closing, "__close") {
                let err_value = match &result {
                    Err(Control::Error(e)) => e.value.clone(),
                    _ => Value::Nil,
                };
                let _ = self.call_value(mm, vec![closing, err_value], line);
            }
        }
        result
    }

    fn assign(&mut self, scope: &Rc<Scope>, target: &Expr, v: Value, line: u32) -> EvalResult<()> {
        match target {
            Expr::Name(name) => {
                if let Some((cell, is_const)) = scope.resolve(name) {
                    if is_const {
                        return Err(self.rt_error(line, format!("attempt to assign to const variable '{name}'")));
                    }
                    *cell.borrow_mut() = v;
                } else {
                    let key = Value::str(name.as_bytes());
                    self.index_set(Value::Table(self.globals), key, v, line)?;
                }
                Ok(())
            }
            Expr::Index(obj, key, idx_line) => {
                let obj_v = self.eval_expr(scope, obj)?;
                let key_v = self.eval_expr(scope, key)?;
                self.index_set(obj_v, key_v, v, *idx_line)
            }
            _ => Err(self.rt_error(line, "cannot assign to this expression")),
        }
    }

    fn make_closure(&mut self, scope: &Rc<Scope>, body: &Rc<FunctionBody>) -> Value {
        let proto = Rc::new(Proto {
            params: body.params.clone(),
            is_vararg: body.is_vararg,
            body: body.clone(),
            name: body.name.clone(),
            source: self.source_name.clone(),
            line: body.line,
            source_text: None,
        });
        let closure = Closure::lua(proto, scope.clone());
        Value::Function(self.heap.alloc_closure(closure))
    }

    // ---- expressions -----------------------------------------------------

    pub fn eval_expr(&mut self, scope: &Rc<Scope>, expr: &Expr) -> EvalResult<Value> {
        match expr {
            Expr::Nil => Ok(Value::Nil),
            Expr::True => Ok(Value::Bool(true)),
            Expr::False => Ok(Value::Bool(false)),
            Expr::Int(i) => Ok(Value::Int(*i)),
            Expr::Float(f) => Ok(Value::Float(*f)),
            Expr::Str(s) => Ok(Value::str(s.clone())),
            Expr::Vararg => Ok(scope.varargs().into_iter().next().unwrap_or(Value::Nil)),
            Expr::Name(name) => {
                if let Some((cell, _)) = scope.resolve(name) {
                    Ok(cell.borrow().clone())
                } else {
                    Ok(self.heap.table(self.globals).get_str(name))
                }
            }
            Expr::Paren(inner) => self.eval_expr(scope, inner),
            Expr::Index(obj, key, line) => {
                let obj_v = self.eval_expr(scope, obj)?;
                let key_v = self.eval_expr(scope, key)?;
                self.index_get(obj_v, key_v, *line, Some(obj))
            }
            Expr::Function(body) => Ok(self.make_closure(scope, body)),
            Expr::Table(fields, line) => self.eval_table(scope, fields, *line),
            Expr::UnOp(op, e, line) => {
                let v = self.eval_expr(scope, e)?;
                self.eval_unop(*op, v, *line)
            }
            Expr::BinOp(BinOp::And, l, r, _) => {
                let lv = self.eval_expr(scope, l)?;
                if lv.is_truthy() {
                    self.eval_expr(scope, r)
                } else {
                    Ok(lv)
                }
            }
            Expr::BinOp(BinOp::Or, l, r, _) => {
                let lv = self.eval_expr(scope, l)?;
                if lv.is_truthy() {
                    Ok(lv)
                } else {
                    self.eval_expr(scope, r)
                }
            }
            Expr::BinOp(op, l, r, line) => {
                let lv = self.eval_expr(scope, l)?;
                let rv = self.eval_expr(scope, r)?;
                self.eval_binop(*op, lv, rv, *line)
            }
            Expr::Call { .. } | Expr::MethodCall { .. } => {
                Ok(self.eval_expr_multi(scope, expr)?.into_iter().next().unwrap_or(Value::Nil))
            }
        }
    }

    /// Evaluates an expression in a context that may consume multiple
    /// values (calls and `...`); everything else yields exactly one.
    pub fn eval_expr_multi(&mut self, scope: &Rc<Scope>, expr: &Expr) -> EvalResult<Vec<Value>> {
        match expr {
            Expr::Vararg => Ok(scope.varargs()),
            Expr::Call { func, args, line } => {
                let func_v = self.eval_expr(scope, func)?;
                let arg_vs = self.eval_expr_list(scope, args)?;
                self.call_value(func_v, arg_vs, *line)
            }
            Expr::MethodCall { obj, method, args, line } => {
                let obj_v = self.eval_expr(scope, obj)?;
                let func_v = self.index_get(obj_v.clone(), Value::str(method.clone().into_bytes()), *line, None)?;
                let mut arg_vs = vec![obj_v];
                arg_vs.extend(self.eval_expr_list(scope, args)?);
                self.call_value(func_v, arg_vs, *line)
            }
            other => Ok(vec![self.eval_expr(scope, other)?]),
        }
    }

    /// Expands an expression list per spec.md §4.3: every expression but
    /// the last is truncated to one value; the last expands fully if it
    /// is a call or `...`.
    pub fn eval_expr_list(&mut self, scope: &Rc<Scope>, exprs: &[Expr]) -> EvalResult<Vec<Value>> {
        let mut out = Vec::with_capacity(exprs.len());
        for (i, e) in exprs.iter().enumerate() {
            if i + 1 == exprs.len() && e.is_multi() {
                out.extend(self.eval_expr_multi(scope, e)?);
            } else {
                out.push(self.eval_expr(scope, e)?);
            }
        }
        Ok(out)
    }

    fn eval_table(&mut self, scope: &Rc<Scope>, fields: &[TableField], line: u32) -> EvalResult<Value> {
        let mut t = Table::new();
        let mut arr_index: i64 = 1;
        for (i, field) in fields.iter().enumerate() {
            match field {
                TableField::Named(name, e) => {
                    let v = self.eval_expr(scope, e)?;
                    t.set_str(name, v);
                }
                TableField::Indexed(k, e) => {
                    let kv = self.eval_expr(scope, k)?;
                    let v = self.eval_expr(scope, e)?;
                    t.set(kv, v)
                        .map_err(|msg| self.rt_error(line, msg))?;
                }
                TableField::Positional(e) => {
                    if i + 1 == fields.len() && e.is_multi() {
                        for v in self.eval_expr_multi(scope, e)? {
                            t.set(Value::Int(arr_index), v).ok();
                            arr_index += 1;
                        }
                    } else {
                        let v = self.eval_expr(scope, e)?;
                        t.set(Value::Int(arr_index), v).ok();
                        arr_index += 1;
                    }
                }
            }
        }
        Ok(Value::Table(self.heap.alloc_table(t)))
    }

    // ---- calls -------------------------------------------------------

    pub fn call_value(&mut self, func: Value, args: Vec<Value>, line: u32) -> EvalResult<Vec<Value>> {
        self.call_depth += 1;
        if self.call_depth > MAX_CALL_DEPTH {
            self.call_depth -= 1;
            return Err(Control::Error(LuaFullError::new(
                LuaError::StackOverflow,
                "stack overflow",
                Value::str(b"stack overflow".as_slice()),
            )));
        }
        let result = self.call_value_inner(func, args, line);
        self.call_depth -= 1;
        result
    }

    fn call_value_inner(&mut self, func: Value, args: Vec<Value>, line: u32) -> EvalResult<Vec<Value>> {
        let closure_ref = match &func {
            Value::Function(c) => *c,
            other => {
                if let Some(mm) = metamethod::get_metamethod(self, other, "__call") {
                    let mut new_args = vec![func.clone()];
                    new_args.extend(args);
                    return self.call_value_inner(mm, new_args, line);
                }
                return Err(self.rt_error(line, format!("attempt to call a {} value", other.type_name())));
            }
        };
        let kind_is_native = self.heap.closure(closure_ref).is_native();
        if kind_is_native {
            let func_rc = match &self.heap.closure(closure_ref).kind {
                FunctionKind::Native { func, .. } => func.clone(),
                _ => unreachable!(),
            };
            return func_rc(self, &args);
        }
        let (proto, env) = match &self.heap.closure(closure_ref).kind {
            FunctionKind::Lua { proto, env } => (proto.clone(), env.clone()),
            _ => unreachable!(),
        };
        let nparams = proto.params.len();
        let varargs = if proto.is_vararg && args.len() > nparams {
            args[nparams..].to_vec()
        } else {
            Vec::new()
        };
        let call_scope = Scope::function_root(&env, varargs);
        for (i, p) in proto.params.iter().enumerate() {
            call_scope.declare(p, args.get(i).cloned().unwrap_or(Value::Nil));
        }
        self.call_scopes.push(call_scope.clone());
        let result = self.exec_block(&call_scope, &proto.body.body);
        self.call_scopes.pop();
        match result {
            Ok(()) => Ok(Vec::new()),
            Err(Control::Return(values)) => Ok(values),
            Err(other) => Err(other),
        }
    }

    /// GC roots reachable right now without a call-stack scan: globals,
    /// the main and current coroutine threads, and the locals of every
    /// currently active Lua call frame (spec.md §4.6's "currently
    /// executing call stack, global environment... or another live heap
    /// object").
    pub fn gc_roots(&self) -> Vec<u64> {
        let mut ids = vec![self.globals.id(), self.main_thread.id(), self.current_thread.id()];
        for scope in &self.call_scopes {
            ids.extend(scope.reachable_ids());
        }
        ids
    }

    // ---- indexing ------------------------------------------------------

    pub fn index_get(&mut self, obj: Value, key: Value, line: u32, _src: Option<&Expr>) -> EvalResult<Value> {
        match &obj {
            Value::Table(t) => {
                let raw = self.heap.table(*t).get(&key);
                if !raw.is_nil() {
                    return Ok(raw);
                }
                let mt = self.heap.table(*t).metatable;
                match mt {
                    None => Ok(Value::Nil),
                    Some(mt) => {
                        let idx = self.heap.table(mt).get_str("__index");
                        match idx {
                            Value::Nil => Ok(Value::Nil),
                            Value::Function(_) => {
                                Ok(self.call_value(idx, vec![obj, key], line)?.into_iter().next().unwrap_or(Value::Nil))
                            }
                            other => self.index_get(other, key, line, None),
                        }
                    }
                }
            }
            Value::Str(_) => {
                if let Some(mt) = self.string_metatable {
                    let idx = self.heap.table(mt).get_str("__index");
                    match idx {
                        Value::Nil => Ok(Value::Nil),
                        Value::Function(_) => {
                            Ok(self.call_value(idx, vec![obj, key], line)?.into_iter().next().unwrap_or(Value::Nil))
                        }
                        other => self.index_get(other, key, line, None),
                    }
                } else {
                    Ok(Value::Nil)
                }
            }
            _ => {
                if let Some(mm) = metamethod::get_metamethod(self, &obj, "__index") {
                    match mm {
                        Value::Function(_) => Ok(self
                            .call_value(mm, vec![obj, key], line)?
                            .into_iter()
                            .next()
                            .unwrap_or(Value::Nil)),
                        other => self.index_get(other, key, line, None),
                    }
                } else {
                    Err(self.rt_error(line, format!("attempt to index a {} value", obj.type_name())))
                }
            }
        }
    }

    pub fn index_set(&mut self, obj: Value, key: Value, value: Value, line: u32) -> EvalResult<()> {
        match &obj {
            Value::Table(t) => {
                let has_raw = !self.heap.table(*t).get(&key).is_nil();
                let mt = self.heap.table(*t).metatable;
                if !has_raw {
                    if let Some(mt) = mt {
                        let newindex = self.heap.table(mt).get_str("__newindex");
                        match newindex {
                            Value::Nil => {}
                            Value::Function(_) => {
                                self.call_value(newindex, vec![obj, key, value], line)?;
                                return Ok(());
                            }
                            other => return self.index_set(other, key, value, line),
                        }
                    }
                }
                self.heap
                    .table_mut(*t)
                    .set(key, value)
                    .map_err(|msg| self.rt_error(line, msg))
            }
            _ => {
                if let Some(mm) = metamethod::get_metamethod(self, &obj, "__newindex") {
                    match mm {
                        Value::Function(_) => {
                            self.call_value(mm, vec![obj, key, value], line)?;
                            Ok(())
                        }
                        other => self.index_set(other, key, value, line),
                    }
                } else {
                    Err(self.rt_error(line, format!("attempt to index a {} value", obj.type_name())))
                }
            }
        }
    }

    // ---- operators -----------------------------------------------------

    fn eval_unop(&mut self, op: UnOp, v: Value, line: u32) -> EvalResult<Value> {
        match op {
            UnOp::Not => Ok(Value::Bool(!v.is_truthy())),
            UnOp::Neg => match metamethod::to_number(&v) {
                Some(Value::Int(i)) => Ok(Value::Int(i.wrapping_neg())),
                Some(Value::Float(f)) => Ok(Value::Float(-f)),
                _ => self.try_unop_mm(v, "__unm", line, "perform arithmetic on"),
            },
            UnOp::BNot => match self.to_integer_checked(&v, line)? {
                Some(i) => Ok(Value::Int(!i)),
                None => self.try_unop_mm(v, "__bnot", line, "perform bitwise operation on"),
            },
            UnOp::Len => match &v {
                Value::Str(s) => Ok(Value::Int(s.len() as i64)),
                Value::Table(t) => {
                    if let Some(mm) = metamethod::get_metamethod(self, &v, "__len") {
                        Ok(self.call_value(mm, vec![v], line)?.into_iter().next().unwrap_or(Value::Nil))
                    } else {
                        Ok(Value::Int(self.heap.table(*t).length()))
                    }
                }
                _ => self.try_unop_mm(v, "__len", line, "get length of"),
            },
        }
    }

    fn try_unop_mm(&mut self, v: Value, name: &str, line: u32, verb: &str) -> EvalResult<Value> {
        if let Some(mm) = metamethod::get_metamethod(self, &v, name) {
            Ok(self
                .call_value(mm, vec![v.clone(), v], line)?
                .into_iter()
                .next()
                .unwrap_or(Value::Nil))
        } else {
            Err(self.rt_error(line, format!("attempt to {verb} a {} value", v.type_name())))
        }
    }

    fn to_integer_checked(&self, v: &Value, _line: u32) -> EvalResult<Option<i64>> {
        Ok(match v {
            Value::Int(i) => Some(*i),
            Value::Float(f) if f.fract() == 0.0 && f.is_finite() => Some(*f as i64),
            Value::Str(s) => match metamethod::str_to_number(s) {
                Some(Value::Int(i)) => Some(i),
                Some(Value::Float(f)) if f.fract() == 0.0 => Some(f as i64),
                _ => None,
            },
            _ => None,
        })
    }

    fn eval_binop(&mut self, op: BinOp, l: Value, r: Value, line: u32) -> EvalResult<Value> {
        use BinOp::*;
        match op {
            Add | Sub | Mul | Mod | IDiv => self.arith(op, l, r, line),
            Div => self.arith_float(l, r, line, |a, b| a / b, "__div"),
            Pow => self.arith_float(l, r, line, |a, b| a.powf(b), "__pow"),
            Concat => self.concat(l, r, line),
            Eq => Ok(Value::Bool(self.eq_values(&l, &r, line)?)),
            Ne => Ok(Value::Bool(!self.eq_values(&l, &r, line)?)),
            Lt => self.compare(l, r, line, false),
            Le => self.compare(l, r, line, true),
            Gt => self.compare(r, l, line, false),
            Ge => self.compare(r, l, line, true),
            BAnd => self.bitwise(l, r, line, |a, b| a & b, "__band"),
            BOr => self.bitwise(l, r, line, |a, b| a | b, "__bor"),
            BXor => self.bitwise(l, r, line, |a, b| a ^ b, "__bxor"),
            Shl => self.bitwise(l, r, line, lua_shl, "__shl"),
            Shr => self.bitwise(l, r, line, |a, b| lua_shl(a, -b), "__shr"),
            And | Or => unreachable!("short-circuit ops handled in eval_expr"),
        }
    }

    fn arith(&mut self, op: BinOp, l: Value, r: Value, line: u32) -> EvalResult<Value> {
        let ln = metamethod::to_number(&l);
        let rn = metamethod::to_number(&r);
        match (ln, rn) {
            (Some(a), Some(b)) => {
                if let (Value::Int(x), Value::Int(y)) = (&a, &b) {
                    let (x, y) = (*x, *y);
                    return match op {
                        BinOp::Add => Ok(Value::Int(x.wrapping_add(y))),
                        BinOp::Sub => Ok(Value::Int(x.wrapping_sub(y))),
                        BinOp::Mul => Ok(Value::Int(x.wrapping_mul(y))),
                        BinOp::Mod => {
                            if y == 0 {
                                Err(self.rt_error(line, "attempt to perform 'n%%0'"))
                            } else {
                                Ok(Value::Int(lua_imod(x, y)))
                            }
                        }
                        BinOp::IDiv => {
                            if y == 0 {
                                Err(self.rt_error(line, "attempt to perform 'n//0'"))
                            } else {
                                Ok(Value::Int(x.div_euclid(y)))
                            }
                        }
                        _ => unreachable!(),
                    };
                }
                let (x, y) = (a.as_float().unwrap(), b.as_float().unwrap());
                Ok(Value::Float(match op {
                    BinOp::Add => x + y,
                    BinOp::Sub => x - y,
                    BinOp::Mul => x * y,
                    BinOp::Mod => x - (x / y).floor() * y,
                    BinOp::IDiv => (x / y).floor(),
                    _ => unreachable!(),
                }))
            }
            _ => {
                let mm_name = match op {
                    BinOp::Add => "__add",
                    BinOp::Sub => "__sub",
                    BinOp::Mul => "__mul",
                    BinOp::Mod => "__mod",
                    BinOp::IDiv => "__idiv",
                    _ => unreachable!(),
                };
                self.try_binop_mm(l, r, mm_name, line, "perform arithmetic on")
            }
        }
    }

    fn arith_float(
        &mut self,
        l: Value,
        r: Value,
        line: u32,
        f: impl Fn(f64, f64) -> f64,
        mm_name: &str,
    ) -> EvalResult<Value> {
        match (metamethod::to_number(&l), metamethod::to_number(&r)) {
            (Some(a), Some(b)) => Ok(Value::Float(f(a.as_float().unwrap(), b.as_float().unwrap()))),
            _ => self.try_binop_mm(l, r, mm_name, line, "perform arithmetic on"),
        }
    }

    fn bitwise(
        &mut self,
        l: Value,
        r: Value,
        line: u32,
        f: impl Fn(i64, i64) -> i64,
        mm_name: &str,
    ) -> EvalResult<Value> {
        match (self.to_integer_checked(&l, line)?, self.to_integer_checked(&r, line)?) {
            (Some(a), Some(b)) => Ok(Value::Int(f(a, b))),
            _ => {
                if l.is_number() && r.is_number() {
                    Err(self.rt_error(line, "number has no integer representation"))
                } else {
                    self.try_binop_mm(l, r, mm_name, line, "perform bitwise operation on")
                }
            }
        }
    }

    fn try_binop_mm(&mut self, l: Value, r: Value, name: &str, line: u32, verb: &str) -> EvalResult<Value> {
        if let Some(mm) = metamethod::get_metamethod(self, &l, name).or_else(|| metamethod::get_metamethod(self, &r, name)) {
            Ok(self
                .call_value(mm, vec![l, r], line)?
                .into_iter()
                .next()
                .unwrap_or(Value::Nil))
        } else {
            let bad = if l.is_number() { &r } else { &l };
            Err(self.rt_error(line, format!("attempt to {verb} a {} value", bad.type_name())))
        }
    }

    fn concat(&mut self, l: Value, r: Value, line: u32) -> EvalResult<Value> {
        let l_ok = matches!(l, Value::Str(_) | Value::Int(_) | Value::Float(_));
        let r_ok = matches!(r, Value::Str(_) | Value::Int(_) | Value::Float(_));
        if l_ok && r_ok {
            let mut out = concat_bytes(&l);
            out.extend(concat_bytes(&r));
            Ok(Value::str(out))
        } else {
            self.try_binop_mm(l, r, "__concat", line, "concatenate")
        }
    }

    fn eq_values(&mut self, l: &Value, r: &Value, line: u32) -> EvalResult<bool> {
        if l.raw_eq(r) {
            return Ok(true);
        }
        let same_comparable_type = matches!(
            (l, r),
            (Value::Table(_), Value::Table(_)) | (Value::UserData(_), Value::UserData(_))
        );
        if !same_comparable_type {
            return Ok(false);
        }
        if let Some(mm) = metamethod::get_metamethod(self, l, "__eq").or_else(|| metamethod::get_metamethod(self, r, "__eq")) {
            Ok(self
                .call_value(mm, vec![l.clone(), r.clone()], line)?
                .into_iter()
                .next()
                .unwrap_or(Value::Nil)
                .is_truthy())
        } else {
            Ok(false)
        }
    }

    fn compare(&mut self, l: Value, r: Value, line: u32, or_equal: bool) -> EvalResult<Value> {
        if let (Some(a), Some(b)) = (l.as_float(), r.as_float()) {
            if l.is_number() && r.is_number() {
                return Ok(Value::Bool(if or_equal { a <= b } else { a < b }));
            }
        }
        if let (Value::Str(a), Value::Str(b)) = (&l, &r) {
            return Ok(Value::Bool(if or_equal { a <= b } else { a < b }));
        }
        let name = if or_equal { "__le" } else { "__lt" };
        if let Some(mm) = metamethod::get_metamethod(self, &l, name).or_else(|| metamethod::get_metamethod(self, &r, name)) {
            Ok(Value::Bool(
                self.call_value(mm, vec![l, r], line)?.into_iter().next().unwrap_or(Value::Nil).is_truthy(),
            ))
        } else {
            Err(self.rt_error(line, format!("attempt to compare two {} values", l.type_name())))
        }
    }

    /// `tostring()` with `__tostring`/`__name` metamethod support
    /// (spec.md §4.5), shared by `print`, `..`, and error formatting.
    pub fn tostring(&mut self, v: &Value, line: u32) -> EvalResult<Vec<u8>> {
        if let Some(mm) = metamethod::get_metamethod(self, v, "__tostring") {
            let r = self.call_value(mm, vec![v.clone()], line)?.into_iter().next().unwrap_or(Value::Nil);
            return Ok(r.as_str_bytes().map(|b| b.to_vec()).unwrap_or_default());
        }
        Ok(match v {
            Value::Nil => b"nil".to_vec(),
            Value::Bool(b) => if *b { b"true".to_vec() } else { b"false".to_vec() },
            Value::Int(_) | Value::Float(_) => metamethod::number_to_string(v).into_bytes(),
            Value::Str(s) => s.to_vec(),
            other => {
                let name = metamethod::get_metamethod(self, other, "__name")
                    .and_then(|n| n.as_str_bytes().map(|b| String::from_utf8_lossy(b).into_owned()))
                    .unwrap_or_else(|| other.type_name().to_string());
                format!("{name}: 0x{:012x}", other.gc_id().unwrap_or(0)).into_bytes()
            }
        })
    }

    pub fn run_gc_step(&mut self, extra_roots: &[u64]) {
        if self.heap.is_stopped() {
            return;
        }
        let mut roots = self.gc_roots();
        roots.extend_from_slice(extra_roots);
        self.heap.collect_cycle(&roots);
        while let Some((table_ref, _id)) = self.heap.take_one_finalizer() {
            let mt = self.heap.table(table_ref).metatable;
            if let Some(mt) = mt {
                let gc = self.heap.table(mt).get_str("__gc");
                if !gc.is_nil() {
                    let _ = self.call_value(gc, vec![Value::Table(table_ref)], 0);
                }
            }
        }
    }
}

fn lua_imod(x: i64, y: i64) -> i64 {
    let r = x % y;
    if r != 0 && (r ^ y) < 0 {
        r + y
    } else {
        r
    }
}

fn lua_shl(a: i64, b: i64) -> i64 {
    if b <= -64 || b >= 64 {
        0
    } else if b >= 0 {
        ((a as u64) << b) as i64
    } else {
        ((a as u64) >> (-b)) as i64
    }
}

fn concat_bytes(v: &Value) -> Vec<u8> {
    match v {
        Value::Str(s) => s.to_vec(),
        Value::Int(_) | Value::Float(_) => metamethod::number_to_string(v).into_bytes(),
        _ => unreachable!(),
    }
}
