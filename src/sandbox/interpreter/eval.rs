//! 树遍历求值器
//!
//! 每条语句、每次循环迭代、每次函数调用都消耗一步；步数、截止时间、取消标志在每一步检查。

use std::rc::Rc;
use std::time::Instant;

use super::ast::{Arg, BinOp, CmpOp, CompFor, Expr, FPart, Handler, Index, Param, Stmt, Target};
use super::builtins::{has_method, normalize_index, Kwargs, BUILTINS};
use super::format::format_value;
use super::modules;
use super::ops::{self, MAX_SEQUENCE_LEN};
use super::value::{Dict, Function, FunctionBody, Scope, Value};
use super::{InterpError, Limits, RunOutput};

/// 脚本函数调用深度上限
const MAX_CALL_DEPTH: usize = 50;

enum Flow {
    Normal,
    Break,
    Continue,
    Return(Value),
}

/// 迭代器：range 惰性展开，其余容器迭代快照
pub(super) enum PyIter {
    Range { next: i64, step: i64, remaining: i64 },
    Items(std::vec::IntoIter<Value>),
}

impl Iterator for PyIter {
    type Item = Value;

    fn next(&mut self) -> Option<Value> {
        match self {
            PyIter::Range {
                next,
                step,
                remaining,
            } => {
                if *remaining <= 0 {
                    return None;
                }
                let current = *next;
                *next = next.wrapping_add(*step);
                *remaining -= 1;
                Some(Value::Int(current))
            }
            PyIter::Items(items) => items.next(),
        }
    }
}

/// 求值后的下标
#[derive(Clone)]
enum Key {
    Single(Value),
    Slice(Option<i64>, Option<i64>, Option<i64>),
}

/// 切片展开为 (起点, 元素数, 步长)
fn slice_plan(
    len: i64,
    start: Option<i64>,
    stop: Option<i64>,
    step: Option<i64>,
) -> Result<(i64, i64, i64), InterpError> {
    let step = step.unwrap_or(1);
    if step == 0 {
        return Err(InterpError::value_error("slice step cannot be zero"));
    }
    let (lower, upper) = if step < 0 { (-1, len - 1) } else { (0, len) };
    let clamp = |v: i64| {
        if v < 0 {
            v.saturating_add(len).max(lower)
        } else {
            v.min(upper)
        }
    };
    let start = start.map_or(if step < 0 { upper } else { lower }, clamp);
    let stop = stop.map_or(if step < 0 { lower } else { upper }, clamp);
    let (s, e, st) = (start as i128, stop as i128, step as i128);
    let count = if st > 0 && s < e {
        (e - s - 1) / st + 1
    } else if st < 0 && s > e {
        (s - e - 1) / (-st) + 1
    } else {
        0
    };
    Ok((start, count as i64, step))
}

fn plan_indices(start: i64, count: i64, step: i64) -> impl Iterator<Item = usize> {
    (0..count).map(move |k| (start + k * step) as usize)
}

fn error_message(err: &InterpError) -> String {
    match err {
        InterpError::Runtime { message, .. } => message.clone(),
        other => other.to_string(),
    }
}

pub(super) struct Interpreter {
    globals: Rc<Scope>,
    limits: Limits,
    steps: u64,
    stdout: String,
    out_chars: usize,
    truncated: bool,
    call_depth: usize,
}

impl Interpreter {
    pub(super) fn new(limits: Limits) -> Self {
        Self {
            globals: Scope::global(),
            limits,
            steps: 0,
            stdout: String::new(),
            out_chars: 0,
            truncated: false,
            call_depth: 0,
        }
    }

    pub(super) fn run(mut self, program: &[Stmt]) -> Result<RunOutput, InterpError> {
        let globals = Rc::clone(&self.globals);
        globals.set("__name__", Value::str("__main__"));
        let result = self.exec_block(program, &globals);
        globals.clear();
        result?;
        Ok(RunOutput {
            stdout: self.stdout,
            truncated: self.truncated,
            steps: self.steps,
        })
    }

    pub(super) fn tick(&mut self) -> Result<(), InterpError> {
        self.steps += 1;
        if self.steps > self.limits.max_steps {
            return Err(InterpError::StepLimit(self.limits.max_steps));
        }
        if Instant::now() >= self.limits.deadline {
            return Err(InterpError::Deadline);
        }
        if self.limits.cancelled() {
            return Err(InterpError::Cancelled);
        }
        Ok(())
    }

    /// 写入捕获的标准输出；超过上限的部分丢弃并标记截断
    pub(super) fn write_out(&mut self, text: &str) {
        if self.truncated || text.is_empty() {
            return;
        }
        let room = self.limits.max_output_chars.saturating_sub(self.out_chars);
        let n = text.chars().count();
        if n <= room {
            self.stdout.push_str(text);
            self.out_chars += n;
        } else {
            self.stdout.extend(text.chars().take(room));
            self.out_chars += room;
            self.truncated = true;
        }
    }

    pub(super) fn iter(&self, value: &Value) -> Result<PyIter, InterpError> {
        Ok(match value {
            Value::Range(start, _, step) => PyIter::Range {
                next: *start,
                step: *step,
                remaining: value.range_len(),
            },
            Value::List(items) => PyIter::Items(items.borrow().clone().into_iter()),
            Value::Tuple(items) => PyIter::Items(items.to_vec().into_iter()),
            Value::Str(s) => PyIter::Items(
                s.chars()
                    .map(|c| Value::str(c.to_string()))
                    .collect::<Vec<_>>()
                    .into_iter(),
            ),
            Value::Dict(d) => PyIter::Items(d.borrow().keys().into_iter()),
            other => {
                return Err(InterpError::type_error(format!(
                    "'{}' object is not iterable",
                    other.type_name()
                )))
            }
        })
    }

    /// 将可迭代对象展开为列表
    pub(super) fn collect(&self, value: &Value) -> Result<Vec<Value>, InterpError> {
        if value.range_len() > MAX_SEQUENCE_LEN as i64 {
            return Err(InterpError::memory_error(
                "range too large to materialize in the sandbox",
            ));
        }
        Ok(self.iter(value)?.collect())
    }

    fn exec_block(&mut self, body: &[Stmt], scope: &Rc<Scope>) -> Result<Flow, InterpError> {
        for stmt in body {
            match self.exec_stmt(stmt, scope)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_stmt(&mut self, stmt: &Stmt, scope: &Rc<Scope>) -> Result<Flow, InterpError> {
        self.tick()?;
        match stmt {
            Stmt::Expr(expr) => {
                self.eval(expr, scope)?;
            }
            Stmt::Assign(targets, value) => {
                let value = self.eval(value, scope)?;
                for target in targets {
                    self.assign(target, value.clone(), scope)?;
                }
            }
            Stmt::AugAssign(target, op, value) => self.aug_assign(target, *op, value, scope)?,
            Stmt::If(branches, orelse) => {
                for (cond, body) in branches {
                    if self.eval(cond, scope)?.truthy() {
                        return self.exec_block(body, scope);
                    }
                }
                return self.exec_block(orelse, scope);
            }
            Stmt::While(cond, body) => {
                while self.eval(cond, scope)?.truthy() {
                    self.tick()?;
                    match self.exec_block(body, scope)? {
                        Flow::Break => break,
                        Flow::Return(v) => return Ok(Flow::Return(v)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
            }
            Stmt::For(target, iterable, body) => {
                let iterable = self.eval(iterable, scope)?;
                for item in self.iter(&iterable)? {
                    self.tick()?;
                    self.assign(target, item, scope)?;
                    match self.exec_block(body, scope)? {
                        Flow::Break => break,
                        Flow::Return(v) => return Ok(Flow::Return(v)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
            }
            Stmt::Def { name, params, body } => {
                let defaults = self.eval_defaults(params, scope)?;
                let function = Function {
                    name: name.clone(),
                    params: params.clone(),
                    defaults,
                    body: FunctionBody::Block(Rc::clone(body)),
                    scope: Rc::clone(scope),
                };
                scope.set(name, Value::Function(Rc::new(function)));
            }
            Stmt::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval(expr, scope)?,
                    None => Value::None,
                };
                return Ok(Flow::Return(value));
            }
            Stmt::Break => return Ok(Flow::Break),
            Stmt::Continue => return Ok(Flow::Continue),
            Stmt::Pass => {}
            Stmt::Import(names) => {
                for (module, alias) in names {
                    let value = modules::import(module)?;
                    scope.set(alias.as_deref().unwrap_or(module), value);
                }
            }
            Stmt::FromImport(module, names) => {
                let Value::Module(m) = modules::import(module)? else {
                    return Err(InterpError::runtime(
                        "ImportError",
                        format!("'{module}' is not a module"),
                    ));
                };
                for (name, alias) in names {
                    let value = modules::module_attr(m, name).map_err(|_| {
                        InterpError::runtime(
                            "ImportError",
                            format!("cannot import name '{name}' from '{module}'"),
                        )
                    })?;
                    scope.set(alias.as_deref().unwrap_or(name), value);
                }
            }
            Stmt::Try {
                body,
                handlers,
                orelse,
                finally,
            } => return self.exec_try(body, handlers, orelse, finally, scope),
        }
        Ok(Flow::Normal)
    }

    fn exec_try(
        &mut self,
        body: &[Stmt],
        handlers: &[Handler],
        orelse: &[Stmt],
        finally: &[Stmt],
        scope: &Rc<Scope>,
    ) -> Result<Flow, InterpError> {
        let outcome = match self.exec_block(body, scope) {
            Ok(Flow::Normal) => self.exec_block(orelse, scope),
            Err(err) if err.is_catchable() => {
                let handler = handlers.iter().find(|h| {
                    h.kinds.is_empty() || h.kinds.iter().any(|k| err.matches_handler(k))
                });
                match handler {
                    Some(handler) => {
                        if let Some(name) = &handler.binding {
                            scope.set(name, Value::str(error_message(&err)));
                        }
                        self.exec_block(&handler.body, scope)
                    }
                    None => Err(err),
                }
            }
            other => other,
        };
        // 资源类错误直接终止，不再执行 finally
        let resumable = outcome.as_ref().map_or_else(InterpError::is_catchable, |_| true);
        if resumable && !finally.is_empty() {
            match self.exec_block(finally, scope)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        outcome
    }

    fn eval_defaults(
        &mut self,
        params: &[Param],
        scope: &Rc<Scope>,
    ) -> Result<Vec<Option<Value>>, InterpError> {
        params
            .iter()
            .map(|p| p.default.as_ref().map(|e| self.eval(e, scope)).transpose())
            .collect()
    }

    fn assign(&mut self, target: &Target, value: Value, scope: &Rc<Scope>) -> Result<(), InterpError> {
        match target {
            Target::Name(name) => scope.set(name, value),
            Target::Tuple(targets) => {
                let items = self.collect(&value)?;
                if items.len() < targets.len() {
                    return Err(InterpError::value_error(format!(
                        "not enough values to unpack (expected {}, got {})",
                        targets.len(),
                        items.len()
                    )));
                }
                if items.len() > targets.len() {
                    return Err(InterpError::value_error(format!(
                        "too many values to unpack (expected {})",
                        targets.len()
                    )));
                }
                for (target, item) in targets.iter().zip(items) {
                    self.assign(target, item, scope)?;
                }
            }
            Target::Subscript(obj, index) => {
                let container = self.eval(obj, scope)?;
                let key = self.eval_index(index, scope)?;
                self.set_item(&container, key, value)?;
            }
        }
        Ok(())
    }

    fn aug_assign(
        &mut self,
        target: &Target,
        op: BinOp,
        value: &Expr,
        scope: &Rc<Scope>,
    ) -> Result<(), InterpError> {
        match target {
            Target::Name(name) => {
                let current = self.lookup(name, scope)?;
                let rhs = self.eval(value, scope)?;
                let updated = self.in_place(op, current, rhs)?;
                scope.set(name, updated);
            }
            Target::Subscript(obj, index) => {
                let container = self.eval(obj, scope)?;
                let key = self.eval_index(index, scope)?;
                let current = self.get_item(&container, &key)?;
                let rhs = self.eval(value, scope)?;
                let updated = self.in_place(op, current, rhs)?;
                self.set_item(&container, key, updated)?;
            }
            Target::Tuple(_) => {
                return Err(InterpError::Syntax {
                    line: 0,
                    message: "illegal expression for augmented assignment".into(),
                })
            }
        }
        Ok(())
    }

    /// 列表的 += 原地扩展，其余按普通二元运算
    fn in_place(&mut self, op: BinOp, current: Value, rhs: Value) -> Result<Value, InterpError> {
        if let (BinOp::Add, Value::List(items)) = (op, &current) {
            let more = self.collect(&rhs)?;
            let mut items = items.borrow_mut();
            if items.len() + more.len() > MAX_SEQUENCE_LEN {
                return Err(InterpError::memory_error("list exceeds the sandbox size limit"));
            }
            items.extend(more);
            drop(items);
            return Ok(current);
        }
        ops::binary(op, &current, &rhs)
    }

    fn lookup(&self, name: &str, scope: &Rc<Scope>) -> Result<Value, InterpError> {
        if let Some(value) = scope.lookup(name) {
            return Ok(value);
        }
        BUILTINS
            .iter()
            .find(|b| **b == name)
            .copied()
            .map(Value::Builtin)
            .ok_or_else(|| InterpError::name_error(format!("name '{name}' is not defined")))
    }

    fn eval_index(&mut self, index: &Index, scope: &Rc<Scope>) -> Result<Key, InterpError> {
        match index {
            Index::Single(expr) => Ok(Key::Single(self.eval(expr, scope)?)),
            Index::Slice(start, stop, step) => Ok(Key::Slice(
                self.slice_bound(start.as_ref(), scope)?,
                self.slice_bound(stop.as_ref(), scope)?,
                self.slice_bound(step.as_ref(), scope)?,
            )),
        }
    }

    fn slice_bound(&mut self, expr: Option<&Expr>, scope: &Rc<Scope>) -> Result<Option<i64>, InterpError> {
        let Some(expr) = expr else {
            return Ok(None);
        };
        match self.eval(expr, scope)? {
            Value::None => Ok(None),
            v => v.as_int().map(Some).ok_or_else(|| {
                InterpError::type_error("slice indices must be integers or None")
            }),
        }
    }

    fn get_item(&self, container: &Value, key: &Key) -> Result<Value, InterpError> {
        let index_of = |k: &Value| {
            k.as_int().ok_or_else(|| {
                InterpError::type_error(format!(
                    "{} indices must be integers or slices, not {}",
                    container.type_name(),
                    k.type_name()
                ))
            })
        };
        let out_of_range = || {
            InterpError::index_error(format!("{} index out of range", container.type_name()))
        };
        match (container, key) {
            (Value::Dict(d), Key::Single(k)) => {
                k.ensure_hashable()?;
                d.borrow()
                    .get(k)
                    .ok_or_else(|| InterpError::key_error(k.repr()))
            }
            (Value::Dict(_), Key::Slice(..)) => {
                Err(InterpError::type_error("unhashable type: 'slice'"))
            }
            (Value::List(items), Key::Single(k)) => {
                let items = items.borrow();
                normalize_index(index_of(k)?, items.len())
                    .map(|i| items[i].clone())
                    .ok_or_else(out_of_range)
            }
            (Value::Tuple(items), Key::Single(k)) => normalize_index(index_of(k)?, items.len())
                .map(|i| items[i].clone())
                .ok_or_else(out_of_range),
            (Value::Str(s), Key::Single(k)) => {
                let i = index_of(k)?;
                let len = s.chars().count();
                normalize_index(i, len)
                    .and_then(|i| s.chars().nth(i))
                    .map(|c| Value::str(c.to_string()))
                    .ok_or_else(|| InterpError::index_error("string index out of range"))
            }
            (Value::Range(start, _, step), Key::Single(k)) => {
                let len = container.range_len();
                let i = index_of(k)?;
                let i = if i < 0 { i + len } else { i };
                if !(0..len).contains(&i) {
                    return Err(InterpError::index_error("range object index out of range"));
                }
                Ok(Value::Int((*start as i128 + i as i128 * *step as i128) as i64))
            }
            (Value::List(items), Key::Slice(a, b, c)) => {
                let items = items.borrow();
                let (start, count, step) = slice_plan(items.len() as i64, *a, *b, *c)?;
                Ok(Value::list(
                    plan_indices(start, count, step).map(|i| items[i].clone()).collect(),
                ))
            }
            (Value::Tuple(items), Key::Slice(a, b, c)) => {
                let (start, count, step) = slice_plan(items.len() as i64, *a, *b, *c)?;
                Ok(Value::tuple(
                    plan_indices(start, count, step).map(|i| items[i].clone()).collect(),
                ))
            }
            (Value::Str(s), Key::Slice(a, b, c)) => {
                let chars: Vec<char> = s.chars().collect();
                let (start, count, step) = slice_plan(chars.len() as i64, *a, *b, *c)?;
                Ok(Value::str(
                    plan_indices(start, count, step).map(|i| chars[i]).collect::<String>(),
                ))
            }
            (Value::Range(rs, _, rstep), Key::Slice(a, b, c)) => {
                let (start, count, step) = slice_plan(container.range_len(), *a, *b, *c)?;
                let overflow = || InterpError::overflow_error("range slice out of bounds");
                let new_start = start
                    .checked_mul(*rstep)
                    .and_then(|off| rs.checked_add(off))
                    .ok_or_else(overflow)?;
                let new_step = step.checked_mul(*rstep).ok_or_else(overflow)?;
                let new_stop = count
                    .checked_mul(new_step)
                    .and_then(|span| new_start.checked_add(span))
                    .ok_or_else(overflow)?;
                Ok(Value::Range(new_start, new_stop, new_step))
            }
            (other, _) => Err(InterpError::type_error(format!(
                "'{}' object is not subscriptable",
                other.type_name()
            ))),
        }
    }

    fn set_item(&mut self, container: &Value, key: Key, value: Value) -> Result<(), InterpError> {
        match (container, key) {
            (Value::Dict(d), Key::Single(k)) => d.borrow_mut().insert(k, value),
            (Value::List(items), Key::Single(k)) => {
                let i = k.as_int().ok_or_else(|| {
                    InterpError::type_error(format!(
                        "list indices must be integers or slices, not {}",
                        k.type_name()
                    ))
                })?;
                let mut items = items.borrow_mut();
                let i = normalize_index(i, items.len())
                    .ok_or_else(|| InterpError::index_error("list assignment index out of range"))?;
                items[i] = value;
                Ok(())
            }
            (Value::List(items), Key::Slice(a, b, c)) => {
                let replacement = self.collect(&value)?;
                let mut items = items.borrow_mut();
                let (start, count, step) = slice_plan(items.len() as i64, a, b, c)?;
                if step == 1 {
                    if items.len() - count as usize + replacement.len() > MAX_SEQUENCE_LEN {
                        return Err(InterpError::memory_error("list exceeds the sandbox size limit"));
                    }
                    let start = start as usize;
                    items.splice(start..start + count as usize, replacement);
                    return Ok(());
                }
                if replacement.len() as i64 != count {
                    return Err(InterpError::value_error(format!(
                        "attempt to assign sequence of size {} to extended slice of size {count}",
                        replacement.len()
                    )));
                }
                for (i, v) in plan_indices(start, count, step).zip(replacement) {
                    items[i] = v;
                }
                Ok(())
            }
            (other, _) => Err(InterpError::type_error(format!(
                "'{}' object does not support item assignment",
                other.type_name()
            ))),
        }
    }

    fn get_attr(&self, value: &Value, attr: &str) -> Result<Value, InterpError> {
        match value {
            Value::Module(m) => modules::module_attr(*m, attr),
            Value::Native(ns, name) => modules::native_attr(*ns, *name, attr),
            _ => {
                if let Some(v) = modules::value_attr(value, attr) {
                    return Ok(v);
                }
                if has_method(value, attr) {
                    return Ok(Value::Method(Box::new(value.clone()), Rc::from(attr)));
                }
                Err(InterpError::attribute_error(format!(
                    "'{}' object has no attribute '{attr}'",
                    value.type_name()
                )))
            }
        }
    }

    fn eval(&mut self, expr: &Expr, scope: &Rc<Scope>) -> Result<Value, InterpError> {
        match expr {
            Expr::None => Ok(Value::None),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Int(i) => Ok(Value::Int(*i)),
            Expr::Float(f) => Ok(Value::Float(*f)),
            Expr::Str(s) => Ok(Value::str(s)),
            Expr::FString(parts) => self.eval_fstring(parts, scope),
            Expr::Name(name) => self.lookup(name, scope),
            Expr::List(items) => Ok(Value::list(self.eval_all(items, scope)?)),
            Expr::Tuple(items) => Ok(Value::tuple(self.eval_all(items, scope)?)),
            Expr::Dict(pairs) => {
                let mut dict = Dict::new();
                for (k, v) in pairs {
                    let key = self.eval(k, scope)?;
                    let value = self.eval(v, scope)?;
                    dict.insert(key, value)?;
                }
                Ok(Value::dict(dict))
            }
            Expr::Unary(op, operand) => {
                let v = self.eval(operand, scope)?;
                ops::unary(*op, &v)
            }
            Expr::Binary(op, lhs, rhs) => {
                let a = self.eval(lhs, scope)?;
                let b = self.eval(rhs, scope)?;
                ops::binary(*op, &a, &b)
            }
            Expr::And(lhs, rhs) => {
                let a = self.eval(lhs, scope)?;
                if a.truthy() {
                    self.eval(rhs, scope)
                } else {
                    Ok(a)
                }
            }
            Expr::Or(lhs, rhs) => {
                let a = self.eval(lhs, scope)?;
                if a.truthy() {
                    Ok(a)
                } else {
                    self.eval(rhs, scope)
                }
            }
            Expr::Compare(first, rest) => self.eval_compare(first, rest, scope),
            Expr::IfElse { cond, then, orelse } => {
                if self.eval(cond, scope)?.truthy() {
                    self.eval(then, scope)
                } else {
                    self.eval(orelse, scope)
                }
            }
            Expr::Call(callee, args) => self.eval_call(callee, args, scope),
            Expr::Attribute(obj, attr) => {
                let v = self.eval(obj, scope)?;
                self.get_attr(&v, attr)
            }
            Expr::Subscript(obj, index) => {
                let container = self.eval(obj, scope)?;
                let key = self.eval_index(index, scope)?;
                self.get_item(&container, &key)
            }
            Expr::ListComp(elt, comps) => self.eval_list_comp(elt, comps, scope),
            Expr::DictComp(key, value, comps) => self.eval_dict_comp(key, value, comps, scope),
            Expr::Lambda(params, body) => {
                let defaults = self.eval_defaults(params, scope)?;
                Ok(Value::Function(Rc::new(Function {
                    name: "<lambda>".to_string(),
                    params: params.clone(),
                    defaults,
                    body: FunctionBody::Lambda(Rc::clone(body)),
                    scope: Rc::clone(scope),
                })))
            }
        }
    }

    fn eval_all(&mut self, items: &[Expr], scope: &Rc<Scope>) -> Result<Vec<Value>, InterpError> {
        items.iter().map(|e| self.eval(e, scope)).collect()
    }

    fn eval_compare(
        &mut self,
        first: &Expr,
        rest: &[(CmpOp, Expr)],
        scope: &Rc<Scope>,
    ) -> Result<Value, InterpError> {
        let mut left = self.eval(first, scope)?;
        for (op, expr) in rest {
            let right = self.eval(expr, scope)?;
            if !ops::compare(*op, &left, &right)? {
                return Ok(Value::Bool(false));
            }
            left = right;
        }
        Ok(Value::Bool(true))
    }

    fn eval_fstring(&mut self, parts: &[FPart], scope: &Rc<Scope>) -> Result<Value, InterpError> {
        let mut out = String::new();
        for part in parts {
            match part {
                FPart::Lit(text) => out.push_str(text),
                FPart::Field {
                    expr,
                    conversion,
                    spec,
                } => {
                    let value = self.eval(expr, scope)?;
                    let value = match conversion {
                        Some('r' | 'a') => Value::str(value.repr()),
                        Some(_) => Value::str(value.to_str()),
                        None => value,
                    };
                    out.push_str(&format_value(&value, spec)?);
                }
            }
        }
        Ok(Value::str(out))
    }

    fn eval_call(&mut self, callee: &Expr, args: &[Arg], scope: &Rc<Scope>) -> Result<Value, InterpError> {
        let callee = self.eval(callee, scope)?;
        let mut positional = Vec::with_capacity(args.len());
        let mut kwargs: Kwargs = Vec::new();
        for arg in args {
            match arg {
                Arg::Positional(expr) => positional.push(self.eval(expr, scope)?),
                Arg::Keyword(name, expr) => {
                    if kwargs.iter().any(|(k, _)| k == name) {
                        return Err(InterpError::type_error(format!(
                            "keyword argument repeated: {name}"
                        )));
                    }
                    let value = self.eval(expr, scope)?;
                    kwargs.push((name.clone(), value));
                }
            }
        }
        self.call_value(&callee, positional, kwargs)
    }

    pub(super) fn call_value(
        &mut self,
        callee: &Value,
        args: Vec<Value>,
        kwargs: Kwargs,
    ) -> Result<Value, InterpError> {
        match callee {
            Value::Function(function) => self.call_function(function, args, kwargs),
            Value::Builtin(name) => self.call_builtin(name, args, kwargs),
            Value::Native(ns, name) => modules::call_native(ns, name, args, kwargs),
            Value::Method(recv, name) => self.call_method(recv, name, args, kwargs),
            other => Err(InterpError::type_error(format!(
                "'{}' object is not callable",
                other.type_name()
            ))),
        }
    }

    fn call_function(
        &mut self,
        function: &Rc<Function>,
        args: Vec<Value>,
        kwargs: Kwargs,
    ) -> Result<Value, InterpError> {
        if self.call_depth >= MAX_CALL_DEPTH {
            return Err(InterpError::runtime(
                "RecursionError",
                "maximum recursion depth exceeded",
            ));
        }
        self.tick()?;
        let local = Scope::child(&function.scope);
        bind_params(function, args, kwargs, &local)?;

        self.call_depth += 1;
        let result = match &function.body {
            FunctionBody::Block(body) => self.exec_block(body, &local).map(|flow| match flow {
                Flow::Return(v) => v,
                _ => Value::None,
            }),
            FunctionBody::Lambda(expr) => self.eval(expr, &local),
        };
        self.call_depth -= 1;
        result
    }

    /// 推导式：逐层展开 for 子句，最内层调用 `body`
    fn comprehension(
        &mut self,
        comps: &[CompFor],
        scope: &Rc<Scope>,
        body: &mut dyn FnMut(&mut Self, &Rc<Scope>) -> Result<(), InterpError>,
    ) -> Result<(), InterpError> {
        let Some((first, rest)) = comps.split_first() else {
            return body(self, scope);
        };
        let iterable = self.eval(&first.iter, scope)?;
        for item in self.iter(&iterable)? {
            self.tick()?;
            self.assign(&first.target, item, scope)?;
            let mut keep = true;
            for cond in &first.conditions {
                if !self.eval(cond, scope)?.truthy() {
                    keep = false;
                    break;
                }
            }
            if keep {
                self.comprehension(rest, scope, body)?;
            }
        }
        Ok(())
    }

    fn eval_list_comp(&mut self, elt: &Expr, comps: &[CompFor], scope: &Rc<Scope>) -> Result<Value, InterpError> {
        let local = Scope::child(scope);
        let mut out = Vec::new();
        self.comprehension(comps, &local, &mut |interp: &mut Interpreter, s: &Rc<Scope>| {
            if out.len() >= MAX_SEQUENCE_LEN {
                return Err(InterpError::memory_error("list exceeds the sandbox size limit"));
            }
            out.push(interp.eval(elt, s)?);
            Ok(())
        })?;
        Ok(Value::list(out))
    }

    fn eval_dict_comp(
        &mut self,
        key: &Expr,
        value: &Expr,
        comps: &[CompFor],
        scope: &Rc<Scope>,
    ) -> Result<Value, InterpError> {
        let local = Scope::child(scope);
        let mut dict = Dict::new();
        self.comprehension(comps, &local, &mut |interp: &mut Interpreter, s: &Rc<Scope>| {
            if dict.len() >= MAX_SEQUENCE_LEN {
                return Err(InterpError::memory_error("dict exceeds the sandbox size limit"));
            }
            let k = interp.eval(key, s)?;
            let v = interp.eval(value, s)?;
            dict.insert(k, v)
        })?;
        Ok(Value::dict(dict))
    }
}

fn bind_params(
    function: &Function,
    args: Vec<Value>,
    kwargs: Kwargs,
    local: &Scope,
) -> Result<(), InterpError> {
    let name = &function.name;
    let params = &function.params;
    if args.len() > params.len() {
        return Err(InterpError::type_error(format!(
            "{name}() takes {} positional arguments but {} were given",
            params.len(),
            args.len()
        )));
    }
    let mut slots: Vec<Option<Value>> = vec![None; params.len()];
    for (slot, value) in slots.iter_mut().zip(args) {
        *slot = Some(value);
    }
    for (key, value) in kwargs {
        let Some(i) = params.iter().position(|p| p.name == key) else {
            return Err(InterpError::type_error(format!(
                "{name}() got an unexpected keyword argument '{key}'"
            )));
        };
        if slots[i].is_some() {
            return Err(InterpError::type_error(format!(
                "{name}() got multiple values for argument '{key}'"
            )));
        }
        slots[i] = Some(value);
    }
    for ((param, slot), default) in params.iter().zip(slots).zip(&function.defaults) {
        let value = slot.or_else(|| default.clone()).ok_or_else(|| {
            InterpError::type_error(format!(
                "{name}() missing required positional argument: '{}'",
                param.name
            ))
        })?;
        local.set(&param.name, value);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slice_plan_matches_python() {
        assert_eq!(slice_plan(4, Some(1), Some(3), None).unwrap(), (1, 2, 1));
        assert_eq!(slice_plan(4, None, None, Some(-1)).unwrap(), (3, 4, -1));
        assert_eq!(slice_plan(5, Some(-2), None, None).unwrap(), (3, 2, 1));
        assert_eq!(slice_plan(5, Some(10), Some(20), None).unwrap().1, 0);
        assert_eq!(slice_plan(10, None, None, Some(3)).unwrap(), (0, 4, 3));
        assert!(slice_plan(3, None, None, Some(0)).is_err());
    }

    #[test]
    fn test_range_iter_is_lazy() {
        let interp = Interpreter::new(Limits::new(10, std::time::Duration::from_secs(1), 10));
        let big = Value::Range(0, i64::MAX, 1);
        let first: Vec<i64> = interp
            .iter(&big)
            .unwrap()
            .take(3)
            .filter_map(|v| v.as_int())
            .collect();
        assert_eq!(first, vec![0, 1, 2]);
        assert!(interp.collect(&big).is_err());
    }
}
