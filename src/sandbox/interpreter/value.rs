//! 运行期值
//!
//! 解释器只在单个阻塞线程内运行，容器用 Rc<RefCell<..>> 共享（与 Python 的引用语义一致）。

use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::rc::Rc;

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, Timelike};

use super::ast::{Expr, Param, Stmt};
use super::InterpError;

pub type ListRef = Rc<RefCell<Vec<Value>>>;
pub type DictRef = Rc<RefCell<Dict>>;

#[derive(Debug, Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    List(ListRef),
    Tuple(Rc<Vec<Value>>),
    Dict(DictRef),
    Range(i64, i64, i64),
    Function(Rc<Function>),
    /// 内置函数，按名称分派
    Builtin(&'static str),
    /// 模块成员（命名空间, 名称），如 ("math", "sqrt")、("datetime", "datetime")
    Native(&'static str, &'static str),
    Module(&'static str),
    /// 已绑定接收者的方法
    Method(Box<Value>, Rc<str>),
    DateTime(NaiveDateTime),
    Date(NaiveDate),
    Delta(Duration),
}

/// 保持插入顺序的字典；脚本规模很小，线性查找足够
#[derive(Debug, Clone, Default)]
pub struct Dict {
    entries: Vec<(Value, Value)>,
}

impl Dict {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn position(&self, key: &Value) -> Option<usize> {
        // 可哈希的键不会成环
        self.entries
            .iter()
            .position(|(k, _)| matches!(k.py_eq(key), Ok(true)))
    }

    pub fn get(&self, key: &Value) -> Option<Value> {
        self.position(key).map(|i| self.entries[i].1.clone())
    }

    pub fn contains(&self, key: &Value) -> bool {
        self.position(key).is_some()
    }

    pub fn insert(&mut self, key: Value, value: Value) -> Result<(), InterpError> {
        key.ensure_hashable()?;
        match self.position(&key) {
            Some(i) => self.entries[i].1 = value,
            None => self.entries.push((key, value)),
        }
        Ok(())
    }

    pub fn remove(&mut self, key: &Value) -> Option<Value> {
        self.position(key).map(|i| self.entries.remove(i).1)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn keys(&self) -> Vec<Value> {
        self.entries.iter().map(|(k, _)| k.clone()).collect()
    }

    pub fn values(&self) -> Vec<Value> {
        self.entries.iter().map(|(_, v)| v.clone()).collect()
    }

    pub fn items(&self) -> Vec<Value> {
        self.entries
            .iter()
            .map(|(k, v)| Value::tuple(vec![k.clone(), v.clone()]))
            .collect()
    }
}

/// 词法作用域：函数调用时以定义处作用域为父
#[derive(Debug, Default)]
pub struct Scope {
    vars: RefCell<HashMap<String, Value>>,
    parent: Option<Rc<Scope>>,
}

impl Scope {
    pub fn global() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub fn child(parent: &Rc<Scope>) -> Rc<Self> {
        Rc::new(Self {
            vars: RefCell::new(HashMap::new()),
            parent: Some(Rc::clone(parent)),
        })
    }

    pub fn lookup(&self, name: &str) -> Option<Value> {
        if let Some(v) = self.vars.borrow().get(name) {
            return Some(v.clone());
        }
        self.parent.as_ref().and_then(|p| p.lookup(name))
    }

    pub fn set(&self, name: &str, value: Value) {
        self.vars.borrow_mut().insert(name.to_string(), value);
    }

    /// 清空绑定，打断函数值与其定义作用域之间的引用环
    pub fn clear(&self) {
        let vars = std::mem::take(&mut *self.vars.borrow_mut());
        drop(vars);
    }
}

#[derive(Debug)]
pub enum FunctionBody {
    Block(Rc<Vec<Stmt>>),
    Lambda(Rc<Expr>),
}

#[derive(Debug)]
pub struct Function {
    pub name: String,
    pub params: Vec<Param>,
    /// 默认值在 def 执行时求值
    pub defaults: Vec<Option<Value>>,
    pub body: FunctionBody,
    pub scope: Rc<Scope>,
}

const MAX_REPR_DEPTH: usize = 32;
const MAX_COMPARE_DEPTH: usize = 200;

impl Value {
    pub fn str(s: impl AsRef<str>) -> Value {
        Value::Str(Rc::from(s.as_ref()))
    }

    pub fn list(items: Vec<Value>) -> Value {
        Value::List(Rc::new(RefCell::new(items)))
    }

    pub fn tuple(items: Vec<Value>) -> Value {
        Value::Tuple(Rc::new(items))
    }

    pub fn dict(dict: Dict) -> Value {
        Value::Dict(Rc::new(RefCell::new(dict)))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Tuple(_) => "tuple",
            Value::Dict(_) => "dict",
            Value::Range(..) => "range",
            Value::Function(_) => "function",
            Value::Builtin(_) | Value::Native(..) => "builtin_function_or_method",
            Value::Module(_) => "module",
            Value::Method(..) => "method",
            Value::DateTime(_) => "datetime.datetime",
            Value::Date(_) => "datetime.date",
            Value::Delta(_) => "datetime.timedelta",
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(l) => !l.borrow().is_empty(),
            Value::Tuple(t) => !t.is_empty(),
            Value::Dict(d) => !d.borrow().is_empty(),
            Value::Range(..) => self.range_len() > 0,
            Value::Delta(d) => *d != Duration::zero(),
            _ => true,
        }
    }

    pub fn range_len(&self) -> i64 {
        match *self {
            Value::Range(start, stop, step) => {
                let (start, stop, step) = (start as i128, stop as i128, step as i128);
                let len = if step > 0 && start < stop {
                    (stop - start - 1) / step + 1
                } else if step < 0 && start > stop {
                    (start - stop - 1) / (-step) + 1
                } else {
                    0
                };
                i64::try_from(len).unwrap_or(i64::MAX)
            }
            _ => 0,
        }
    }

    /// 数值视图：bool / int / float
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Value::Bool(b) => Some(if b { 1.0 } else { 0.0 }),
            Value::Int(i) => Some(i as f64),
            Value::Float(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match *self {
            Value::Bool(b) => Some(b as i64),
            Value::Int(i) => Some(i),
            _ => None,
        }
    }

    fn is_number(&self) -> bool {
        matches!(self, Value::Bool(_) | Value::Int(_) | Value::Float(_))
    }

    pub fn ensure_hashable(&self) -> Result<(), InterpError> {
        match self {
            Value::List(_) | Value::Dict(_) => Err(InterpError::type_error(format!(
                "unhashable type: '{}'",
                self.type_name()
            ))),
            Value::Tuple(items) => items.iter().try_for_each(Value::ensure_hashable),
            _ => Ok(()),
        }
    }

    pub fn py_eq(&self, other: &Value) -> Result<bool, InterpError> {
        self.eq_depth(other, 0)
    }

    fn eq_depth(&self, other: &Value, depth: usize) -> Result<bool, InterpError> {
        if depth > MAX_COMPARE_DEPTH {
            return Err(compare_depth_exceeded());
        }
        let eq = match (self, other) {
            (a, b) if a.is_number() && b.is_number() => match (a.as_int(), b.as_int()) {
                (Some(x), Some(y)) => x == y,
                _ => a.as_f64() == b.as_f64(),
            },
            (Value::None, Value::None) => true,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => {
                Rc::ptr_eq(a, b) || seq_eq(&a.borrow(), &b.borrow(), depth)?
            }
            (Value::Tuple(a), Value::Tuple(b)) => seq_eq(a, b, depth)?,
            (Value::Dict(a), Value::Dict(b)) => {
                if Rc::ptr_eq(a, b) {
                    return Ok(true);
                }
                let (a, b) = (a.borrow(), b.borrow());
                if a.len() != b.len() {
                    return Ok(false);
                }
                for (k, v) in &a.entries {
                    match b.get(k) {
                        Some(w) if v.eq_depth(&w, depth + 1)? => {}
                        _ => return Ok(false),
                    }
                }
                true
            }
            (Value::Range(a, b, c), Value::Range(x, y, z)) => (a, b, c) == (x, y, z),
            (Value::DateTime(a), Value::DateTime(b)) => a == b,
            (Value::Date(a), Value::Date(b)) => a == b,
            (Value::Delta(a), Value::Delta(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Builtin(a), Value::Builtin(b)) => a == b,
            (Value::Native(a, b), Value::Native(x, y)) => (a, b) == (x, y),
            (Value::Module(a), Value::Module(b)) => a == b,
            _ => false,
        };
        Ok(eq)
    }

    /// `is` 比较：单例按值，容器按引用
    pub fn py_is(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::List(a), Value::List(b)) => Rc::ptr_eq(a, b),
            (Value::Dict(a), Value::Dict(b)) => Rc::ptr_eq(a, b),
            (Value::Tuple(a), Value::Tuple(b)) => Rc::ptr_eq(a, b),
            (Value::Float(_), _) | (_, Value::Float(_)) => false,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Bool(_), _) | (_, Value::Bool(_)) => false,
            // 其余都是标量，比较不会递归
            _ => matches!(self.py_eq(other), Ok(true)),
        }
    }

    pub fn compare(&self, other: &Value, op: &str) -> Result<Ordering, InterpError> {
        self.cmp_depth(other, op, 0)
    }

    fn cmp_depth(&self, other: &Value, op: &str, depth: usize) -> Result<Ordering, InterpError> {
        if depth > MAX_COMPARE_DEPTH {
            return Err(compare_depth_exceeded());
        }
        match (self, other) {
            (a, b) if a.is_number() && b.is_number() => match (a.as_int(), b.as_int()) {
                (Some(x), Some(y)) => Ok(x.cmp(&y)),
                _ => Ok(a
                    .as_f64()
                    .partial_cmp(&b.as_f64())
                    .unwrap_or(Ordering::Equal)),
            },
            (Value::Str(a), Value::Str(b)) => Ok(a.cmp(b)),
            (Value::List(a), Value::List(b)) => seq_cmp(&a.borrow(), &b.borrow(), op, depth),
            (Value::Tuple(a), Value::Tuple(b)) => seq_cmp(a, b, op, depth),
            (Value::DateTime(a), Value::DateTime(b)) => Ok(a.cmp(b)),
            (Value::Date(a), Value::Date(b)) => Ok(a.cmp(b)),
            (Value::Delta(a), Value::Delta(b)) => Ok(a.cmp(b)),
            _ => Err(InterpError::type_error(format!(
                "'{op}' not supported between instances of '{}' and '{}'",
                self.type_name(),
                other.type_name()
            ))),
        }
    }

    /// Python 的 str()
    pub fn to_str(&self) -> String {
        match self {
            Value::Str(s) => s.to_string(),
            Value::DateTime(dt) => format_datetime(dt, ' '),
            Value::Date(d) => d.format("%Y-%m-%d").to_string(),
            Value::Delta(d) => format_delta(d),
            _ => self.repr(),
        }
    }

    /// Python 的 repr()
    pub fn repr(&self) -> String {
        self.repr_depth(0)
    }

    fn repr_depth(&self, depth: usize) -> String {
        if depth > MAX_REPR_DEPTH {
            return "...".to_string();
        }
        let join = |items: &[Value]| {
            items
                .iter()
                .map(|v| v.repr_depth(depth + 1))
                .collect::<Vec<_>>()
                .join(", ")
        };
        match self {
            Value::None => "None".to_string(),
            Value::Bool(true) => "True".to_string(),
            Value::Bool(false) => "False".to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => float_repr(*f),
            Value::Str(s) => quote(s),
            Value::List(items) => format!("[{}]", join(&items.borrow())),
            Value::Tuple(items) if items.len() == 1 => format!("({},)", join(items)),
            Value::Tuple(items) => format!("({})", join(items)),
            Value::Dict(d) => {
                let d = d.borrow();
                let body = d
                    .entries
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k.repr_depth(depth + 1), v.repr_depth(depth + 1)))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("{{{body}}}")
            }
            Value::Range(start, stop, 1) => format!("range({start}, {stop})"),
            Value::Range(start, stop, step) => format!("range({start}, {stop}, {step})"),
            Value::Function(f) => format!("<function {}>", f.name),
            Value::Builtin(name) => format!("<built-in function {name}>"),
            Value::Native(ns, name) => format!("<built-in function {ns}.{name}>"),
            Value::Module(name) => format!("<module '{name}'>"),
            Value::Method(recv, name) => format!("<method {name} of {} object>", recv.type_name()),
            Value::DateTime(dt) => {
                let mut parts = vec![
                    dt.year().to_string(),
                    dt.month().to_string(),
                    dt.day().to_string(),
                    dt.hour().to_string(),
                    dt.minute().to_string(),
                ];
                if dt.second() != 0 || dt.nanosecond() / 1000 != 0 {
                    parts.push(dt.second().to_string());
                }
                if dt.nanosecond() / 1000 != 0 {
                    parts.push((dt.nanosecond() / 1000).to_string());
                }
                format!("datetime.datetime({})", parts.join(", "))
            }
            Value::Date(d) => format!("datetime.date({}, {}, {})", d.year(), d.month(), d.day()),
            Value::Delta(d) => {
                let days = d.num_days();
                let rem = *d - Duration::days(days);
                let (days, secs) = if rem < Duration::zero() {
                    (days - 1, rem.num_seconds() + 86_400)
                } else {
                    (days, rem.num_seconds())
                };
                format!("datetime.timedelta(days={days}, seconds={secs})")
            }
        }
    }
}

/// float → int（截断），NaN / 无穷 / 越界时报错
pub fn float_to_int(f: f64) -> Result<i64, InterpError> {
    if f.is_nan() {
        return Err(InterpError::value_error("cannot convert float NaN to integer"));
    }
    if f.is_infinite() {
        return Err(InterpError::overflow_error("cannot convert float infinity to integer"));
    }
    let t = f.trunc();
    if t >= 9_223_372_036_854_775_808.0 || t < -9_223_372_036_854_775_808.0 {
        return Err(InterpError::overflow_error("int too large to convert"));
    }
    Ok(t as i64)
}

fn seq_eq(a: &[Value], b: &[Value], depth: usize) -> Result<bool, InterpError> {
    if a.len() != b.len() {
        return Ok(false);
    }
    for (x, y) in a.iter().zip(b) {
        if !x.eq_depth(y, depth + 1)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn seq_cmp(a: &[Value], b: &[Value], op: &str, depth: usize) -> Result<Ordering, InterpError> {
    for (x, y) in a.iter().zip(b) {
        if !x.eq_depth(y, depth + 1)? {
            return x.cmp_depth(y, op, depth + 1);
        }
    }
    Ok(a.len().cmp(&b.len()))
}

fn compare_depth_exceeded() -> InterpError {
    InterpError::runtime("RecursionError", "maximum recursion depth exceeded in comparison")
}

/// 序列中第一个与 `target` 相等的位置
pub fn position_of(items: &[Value], target: &Value) -> Result<Option<usize>, InterpError> {
    for (i, v) in items.iter().enumerate() {
        if v.py_eq(target)? {
            return Ok(Some(i));
        }
    }
    Ok(None)
}

/// 与 Python repr 一致的浮点格式：最短往返表示，指数 < -4 或 >= 16 时用科学计数法
pub fn float_repr(f: f64) -> String {
    if f.is_nan() {
        return "nan".to_string();
    }
    if f.is_infinite() {
        return if f > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    let sci = format!("{f:e}");
    let (mantissa, exp) = sci.split_once('e').unwrap_or((sci.as_str(), "0"));
    let exp: i32 = exp.parse().unwrap_or(0);
    if (-4..16).contains(&exp) {
        let fixed = format!("{f}");
        if fixed.contains('.') {
            fixed
        } else {
            format!("{fixed}.0")
        }
    } else {
        let sign = if exp < 0 { '-' } else { '+' };
        format!("{mantissa}e{sign}{:02}", exp.abs())
    }
}

fn quote(s: &str) -> String {
    let delim = if s.contains('\'') && !s.contains('"') { '"' } else { '\'' };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(delim);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == delim => {
                out.push('\\');
                out.push(c);
            }
            c if (c as u32) < 0x20 || c as u32 == 0x7f => out.push_str(&format!("\\x{:02x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push(delim);
    out
}

pub fn format_datetime(dt: &NaiveDateTime, sep: char) -> String {
    let micros = dt.nanosecond() / 1000;
    let base = dt.format(&format!("%Y-%m-%d{sep}%H:%M:%S")).to_string();
    if micros == 0 {
        base
    } else {
        format!("{base}.{micros:06}")
    }
}

/// timedelta 的 str()："1 day, 2:03:04"
pub fn format_delta(d: &Duration) -> String {
    let total = d.num_seconds();
    let days = total.div_euclid(86_400);
    let secs = total.rem_euclid(86_400);
    let clock = format!("{}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60);
    match days {
        0 => clock,
        1 | -1 => format!("{days} day, {clock}"),
        _ => format!("{days} days, {clock}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_float_repr() {
        assert_eq!(float_repr(1.0), "1.0");
        assert_eq!(float_repr(0.1), "0.1");
        assert_eq!(float_repr(2.5e-7), "2.5e-07");
        assert_eq!(float_repr(1e20), "1e+20");
        assert_eq!(float_repr(-3.25), "-3.25");
        assert_eq!(float_repr(f64::INFINITY), "inf");
    }

    #[test]
    fn test_repr_containers() {
        let v = Value::list(vec![
            Value::Int(1),
            Value::str("a'b"),
            Value::tuple(vec![Value::None]),
        ]);
        assert_eq!(v.repr(), "[1, \"a'b\", (None,)]");

        let mut d = Dict::new();
        d.insert(Value::str("k"), Value::Bool(true)).unwrap();
        assert_eq!(Value::dict(d).repr(), "{'k': True}");
    }

    #[test]
    fn test_numeric_equality_and_keys() {
        assert!(Value::Int(1).py_eq(&Value::Float(1.0)).unwrap());
        assert!(Value::Bool(true).py_eq(&Value::Int(1)).unwrap());
        let mut d = Dict::new();
        d.insert(Value::Int(1), Value::str("a")).unwrap();
        d.insert(Value::Float(1.0), Value::str("b")).unwrap();
        assert_eq!(d.len(), 1);
        assert!(d.insert(Value::list(vec![]), Value::None).is_err());
    }

    #[test]
    fn test_compare_mixed_types_fails() {
        assert!(Value::Int(1).compare(&Value::str("a"), "<").is_err());
        assert_eq!(
            Value::tuple(vec![Value::Int(1), Value::Int(2)])
                .compare(&Value::tuple(vec![Value::Int(1), Value::Int(3)]), "<")
                .unwrap(),
            Ordering::Less
        );
    }

    #[test]
    fn test_self_containing_lists_hit_recursion_limit() {
        let cyclic = || {
            let v = Value::list(Vec::new());
            if let Value::List(items) = &v {
                items.borrow_mut().push(v.clone());
            }
            v
        };
        let (a, b) = (cyclic(), cyclic());
        let eq = a.py_eq(&b).unwrap_err();
        assert!(matches!(eq, InterpError::Runtime { kind: "RecursionError", .. }));
        let lt = a.compare(&b, "<").unwrap_err();
        assert!(matches!(lt, InterpError::Runtime { kind: "RecursionError", .. }));
        // 同一对象直接相等
        assert!(a.py_eq(&a).unwrap());
        for v in [a, b] {
            if let Value::List(items) = &v {
                items.borrow_mut().clear();
            }
        }
    }

    #[test]
    fn test_range_len() {
        assert_eq!(Value::Range(0, 10, 3).range_len(), 4);
        assert_eq!(Value::Range(10, 0, -2).range_len(), 5);
        assert_eq!(Value::Range(0, 0, 1).range_len(), 0);
    }

    #[test]
    fn test_delta_str() {
        assert_eq!(format_delta(&Duration::seconds(93_784)), "1 day, 2:03:04");
        assert_eq!(format_delta(&Duration::minutes(5)), "0:05:00");
    }
}
