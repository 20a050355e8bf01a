//! 内置函数与内置类型方法
//!
//! 只有 [`BUILTINS`] 中列出的名字可被解析；反射、动态执行、文件与输入相关的名字不存在。

use std::cmp::Ordering;

use super::ast::BinOp;
use super::eval::Interpreter;
use super::format::{format_value, str_format};
use super::modules::{call_value_method, has_value_method};
use super::ops::{self, MAX_SEQUENCE_LEN};
use super::value::{float_to_int, position_of, Dict, Value};
use super::InterpError;

pub(super) type Kwargs = Vec<(String, Value)>;

pub(super) const BUILTINS: &[&str] = &[
    "print", "len", "str", "int", "float", "bool", "list", "tuple", "dict", "range",
    "enumerate", "zip", "sum", "max", "min", "abs", "round", "sorted", "reversed", "any",
    "all", "chr", "ord", "hex", "oct", "bin", "pow", "divmod", "repr", "format",
];

const STR_METHODS: &[&str] = &[
    "upper", "lower", "strip", "lstrip", "rstrip", "split", "join", "replace", "startswith",
    "endswith", "find", "rfind", "index", "count", "format", "title", "capitalize", "isdigit",
    "isalpha", "isalnum", "isspace", "isupper", "islower", "zfill", "center", "ljust", "rjust",
    "splitlines",
];

const LIST_METHODS: &[&str] = &[
    "append", "extend", "pop", "insert", "remove", "index", "count", "sort", "reverse", "copy",
    "clear",
];

const DICT_METHODS: &[&str] = &[
    "get", "keys", "values", "items", "update", "pop", "setdefault", "copy", "clear",
];

/// 将实参按形参名绑定；前 `required` 个为必填
pub(super) fn bind(
    func: &str,
    names: &[&str],
    required: usize,
    args: Vec<Value>,
    kwargs: Kwargs,
) -> Result<Vec<Option<Value>>, InterpError> {
    if args.len() > names.len() {
        return Err(InterpError::type_error(if names.is_empty() {
            format!("{func}() takes no arguments ({} given)", args.len())
        } else {
            format!(
                "{func}() takes at most {} arguments ({} given)",
                names.len(),
                args.len()
            )
        }));
    }
    let mut slots: Vec<Option<Value>> = vec![None; names.len()];
    for (slot, value) in slots.iter_mut().zip(args) {
        *slot = Some(value);
    }
    for (key, value) in kwargs {
        let Some(i) = names.iter().position(|n| *n == key) else {
            return Err(InterpError::type_error(format!(
                "{func}() got an unexpected keyword argument '{key}'"
            )));
        };
        if slots[i].is_some() {
            return Err(InterpError::type_error(format!(
                "{func}() got multiple values for argument '{key}'"
            )));
        }
        slots[i] = Some(value);
    }
    if let Some(i) = slots.iter().take(required).position(Option::is_none) {
        return Err(InterpError::type_error(format!(
            "{func}() missing required argument: '{}'",
            names[i]
        )));
    }
    Ok(slots)
}

pub(super) fn float_arg(func: &str, v: &Value) -> Result<f64, InterpError> {
    v.as_f64().ok_or_else(|| {
        InterpError::type_error(format!(
            "{func}() argument must be a real number, not '{}'",
            v.type_name()
        ))
    })
}

pub(super) fn int_arg(func: &str, v: &Value) -> Result<i64, InterpError> {
    v.as_int().ok_or_else(|| {
        InterpError::type_error(format!(
            "{func}(): '{}' object cannot be interpreted as an integer",
            v.type_name()
        ))
    })
}

pub(super) fn str_arg(func: &str, v: Option<&Value>) -> Result<String, InterpError> {
    match v {
        Some(Value::Str(s)) => Ok(s.to_string()),
        Some(other) => Err(InterpError::type_error(format!(
            "{func}() argument must be str, not {}",
            other.type_name()
        ))),
        None => Err(InterpError::type_error(format!("{func}() missing a string argument"))),
    }
}

fn no_kwargs(func: &str, kwargs: &Kwargs) -> Result<(), InterpError> {
    match kwargs.first() {
        Some((key, _)) => Err(InterpError::type_error(format!(
            "{func}() got an unexpected keyword argument '{key}'"
        ))),
        None => Ok(()),
    }
}

fn optional<'a>(slot: &'a Option<Value>) -> Option<&'a Value> {
    slot.as_ref().filter(|v| !matches!(v, Value::None))
}

/// 负索引归一化；越界返回 None
pub(super) fn normalize_index(index: i64, len: usize) -> Option<usize> {
    let len = len as i64;
    let i = if index < 0 { index + len } else { index };
    (0..len).contains(&i).then_some(i as usize)
}

fn char_index(s: &str, byte: usize) -> i64 {
    s[..byte].chars().count() as i64
}

/// 稳定归并排序，比较可失败
fn try_sort<T: Clone>(
    items: &mut Vec<T>,
    cmp: &mut dyn FnMut(&T, &T) -> Result<Ordering, InterpError>,
) -> Result<(), InterpError> {
    let n = items.len();
    let mut buf: Vec<T> = Vec::with_capacity(n);
    let mut width = 1;
    while width < n {
        buf.clear();
        let mut start = 0;
        while start < n {
            let mid = (start + width).min(n);
            let end = (start + 2 * width).min(n);
            let (mut i, mut j) = (start, mid);
            while i < mid && j < end {
                if cmp(&items[j], &items[i])? == Ordering::Less {
                    buf.push(items[j].clone());
                    j += 1;
                } else {
                    buf.push(items[i].clone());
                    i += 1;
                }
            }
            buf.extend_from_slice(&items[i..mid]);
            buf.extend_from_slice(&items[j..end]);
            start = end;
        }
        std::mem::swap(items, &mut buf);
        width *= 2;
    }
    Ok(())
}

fn parse_int(text: &str, base: u32) -> Result<i64, InterpError> {
    let invalid = || {
        InterpError::value_error(format!(
            "invalid literal for int() with base {base}: {}",
            Value::str(text).repr()
        ))
    };
    let t = text.trim();
    let (neg, rest) = match t.strip_prefix('-') {
        Some(r) => (true, r),
        None => (false, t.strip_prefix('+').unwrap_or(t)),
    };
    let prefix = match base {
        16 => ["0x", "0X"],
        8 => ["0o", "0O"],
        2 => ["0b", "0B"],
        _ => ["", ""],
    };
    let digits = prefix
        .iter()
        .filter(|p| !p.is_empty())
        .find_map(|p| rest.strip_prefix(p))
        .unwrap_or(rest);
    if digits.is_empty()
        || digits.starts_with('_')
        || digits.ends_with('_')
        || digits.contains("__")
        || digits.starts_with(['+', '-'])
    {
        return Err(invalid());
    }
    let cleaned: String = digits.chars().filter(|c| *c != '_').collect();
    let signed = if neg { format!("-{cleaned}") } else { cleaned };
    i64::from_str_radix(&signed, base).map_err(|e| match e.kind() {
        std::num::IntErrorKind::PosOverflow | std::num::IntErrorKind::NegOverflow => {
            InterpError::overflow_error("int too large to convert")
        }
        _ => invalid(),
    })
}

fn round_half_even_int(x: i64, ndigits: i64) -> Result<i64, InterpError> {
    if ndigits >= 0 {
        return Ok(x);
    }
    let Some(p) = u32::try_from(-ndigits).ok().and_then(|n| 10i64.checked_pow(n)) else {
        return Ok(0);
    };
    let q = x.div_euclid(p);
    let r = x.rem_euclid(p);
    let q = match (2 * r as i128).cmp(&(p as i128)) {
        Ordering::Greater => q + 1,
        Ordering::Equal if q % 2 != 0 => q + 1,
        _ => q,
    };
    q.checked_mul(p)
        .ok_or_else(|| InterpError::overflow_error("integer overflow"))
}

fn mod_pow(base: i64, exp: i64, modulus: i64) -> Result<i64, InterpError> {
    if modulus == 0 {
        return Err(InterpError::value_error("pow() 3rd argument cannot be 0"));
    }
    if exp < 0 {
        return Err(InterpError::value_error(
            "pow() 2nd argument cannot be negative when 3rd argument specified",
        ));
    }
    let m = (modulus as i128).abs();
    let mut acc: i128 = 1 % m;
    let mut b = (base as i128).rem_euclid(m);
    let mut e = exp;
    while e > 0 {
        if e & 1 == 1 {
            acc = acc * b % m;
        }
        b = b * b % m;
        e >>= 1;
    }
    let r = if modulus < 0 && acc != 0 { acc - m } else { acc };
    Ok(r as i64)
}

fn radix_repr(i: i64, prefix: &str, radix: u32) -> String {
    let sign = if i < 0 { "-" } else { "" };
    let n = i.unsigned_abs();
    let digits = match radix {
        16 => format!("{n:x}"),
        8 => format!("{n:o}"),
        _ => format!("{n:b}"),
    };
    format!("{sign}{prefix}{digits}")
}

fn split_whitespace_n(s: &str, maxsplit: i64) -> Vec<Value> {
    let mut parts = Vec::new();
    let mut rest = s.trim_start();
    while !rest.is_empty() {
        if maxsplit >= 0 && parts.len() as i64 >= maxsplit {
            parts.push(Value::str(rest));
            return parts;
        }
        match rest.find(char::is_whitespace) {
            Some(end) => {
                parts.push(Value::str(&rest[..end]));
                rest = rest[end..].trim_start();
            }
            None => {
                parts.push(Value::str(rest));
                break;
            }
        }
    }
    parts
}

fn pad_str(s: &str, width: i64, fill: char, align: char) -> String {
    let len = s.chars().count() as i64;
    if width <= len {
        return s.to_string();
    }
    let total = (width - len) as usize;
    let (left, right) = match align {
        '<' => (0, total),
        '>' => (total, 0),
        _ => {
            let left = total / 2 + (total & width as usize & 1);
            (left, total - left)
        }
    };
    let fill_str = |n: usize| fill.to_string().repeat(n);
    format!("{}{s}{}", fill_str(left), fill_str(right))
}

fn fill_char(v: Option<&Value>) -> Result<char, InterpError> {
    match v {
        None => Ok(' '),
        Some(Value::Str(s)) if s.chars().count() == 1 => Ok(s.chars().next().unwrap_or(' ')),
        Some(_) => Err(InterpError::type_error(
            "The fill character must be exactly one character long",
        )),
    }
}

fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut prev_cased = false;
    for c in s.chars() {
        if c.is_alphabetic() {
            if prev_cased {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            prev_cased = true;
        } else {
            out.push(c);
            prev_cased = false;
        }
    }
    out
}

fn cased_check(s: &str, want_upper: bool) -> bool {
    let mut any_cased = false;
    for c in s.chars() {
        if c.is_lowercase() {
            if want_upper {
                return false;
            }
            any_cased = true;
        } else if c.is_uppercase() {
            if !want_upper {
                return false;
            }
            any_cased = true;
        }
    }
    any_cased
}

fn affix_match(
    func: &str,
    s: &str,
    arg: Option<&Value>,
    test: fn(&str, &str) -> bool,
) -> Result<bool, InterpError> {
    match arg {
        Some(Value::Str(p)) => Ok(test(s, p)),
        Some(Value::Tuple(items)) => {
            for item in items.iter() {
                match item {
                    Value::Str(p) if test(s, p) => return Ok(true),
                    Value::Str(_) => {}
                    other => {
                        return Err(InterpError::type_error(format!(
                            "tuple for {func} must only contain str, not {}",
                            other.type_name()
                        )))
                    }
                }
            }
            Ok(false)
        }
        other => Err(InterpError::type_error(format!(
            "{func} first arg must be str or a tuple of str, not {}",
            other.map_or("NoneType", Value::type_name)
        ))),
    }
}

/// 接收者类型上是否存在该方法
pub(super) fn has_method(recv: &Value, name: &str) -> bool {
    match recv {
        Value::Str(_) => STR_METHODS.contains(&name),
        Value::List(_) => LIST_METHODS.contains(&name),
        Value::Dict(_) => DICT_METHODS.contains(&name),
        Value::Int(_) | Value::Bool(_) => name == "bit_length",
        Value::Float(_) => name == "is_integer",
        other => has_value_method(other, name),
    }
}

impl Interpreter {
    pub(super) fn call_builtin(
        &mut self,
        name: &str,
        args: Vec<Value>,
        kwargs: Kwargs,
    ) -> Result<Value, InterpError> {
        match name {
            "print" => self.builtin_print(args, kwargs),
            "len" => {
                let a = bind("len", &["obj"], 1, args, kwargs)?;
                let n = match a[0].as_ref().unwrap_or(&Value::None) {
                    Value::Str(s) => s.chars().count() as i64,
                    Value::List(l) => l.borrow().len() as i64,
                    Value::Tuple(t) => t.len() as i64,
                    Value::Dict(d) => d.borrow().len() as i64,
                    r @ Value::Range(..) => r.range_len(),
                    other => {
                        return Err(InterpError::type_error(format!(
                            "object of type '{}' has no len()",
                            other.type_name()
                        )))
                    }
                };
                Ok(Value::Int(n))
            }
            "str" => {
                let a = bind("str", &["object"], 0, args, kwargs)?;
                Ok(Value::str(a[0].as_ref().map(Value::to_str).unwrap_or_default()))
            }
            "repr" => {
                let a = bind("repr", &["obj"], 1, args, kwargs)?;
                Ok(Value::str(a[0].as_ref().map(Value::repr).unwrap_or_default()))
            }
            "format" => {
                let a = bind("format", &["value", "format_spec"], 1, args, kwargs)?;
                let spec = match &a[1] {
                    Some(v) => str_arg("format", Some(v))?,
                    None => String::new(),
                };
                format_value(a[0].as_ref().unwrap_or(&Value::None), &spec).map(Value::str)
            }
            "int" => self.builtin_int(args, kwargs),
            "float" => {
                let a = bind("float", &["x"], 0, args, kwargs)?;
                match a[0].as_ref() {
                    None => Ok(Value::Float(0.0)),
                    Some(Value::Str(s)) => s.trim().parse::<f64>().map(Value::Float).map_err(|_| {
                        InterpError::value_error(format!(
                            "could not convert string to float: {}",
                            Value::str(&**s).repr()
                        ))
                    }),
                    Some(v) => float_arg("float", v).map(Value::Float),
                }
            }
            "bool" => {
                let a = bind("bool", &["x"], 0, args, kwargs)?;
                Ok(Value::Bool(a[0].as_ref().is_some_and(Value::truthy)))
            }
            "list" => {
                let a = bind("list", &["iterable"], 0, args, kwargs)?;
                match &a[0] {
                    Some(v) => Ok(Value::list(self.collect(v)?)),
                    None => Ok(Value::list(Vec::new())),
                }
            }
            "tuple" => {
                let a = bind("tuple", &["iterable"], 0, args, kwargs)?;
                match &a[0] {
                    Some(v) => Ok(Value::tuple(self.collect(v)?)),
                    None => Ok(Value::tuple(Vec::new())),
                }
            }
            "dict" => self.builtin_dict(args, kwargs),
            "range" => {
                no_kwargs("range", &kwargs)?;
                let ints = args
                    .iter()
                    .map(|v| int_arg("range", v))
                    .collect::<Result<Vec<_>, _>>()?;
                let (start, stop, step) = match ints.as_slice() {
                    [stop] => (0, *stop, 1),
                    [start, stop] => (*start, *stop, 1),
                    [start, stop, step] => (*start, *stop, *step),
                    _ => {
                        return Err(InterpError::type_error(format!(
                            "range expected 1 to 3 arguments, got {}",
                            ints.len()
                        )))
                    }
                };
                if step == 0 {
                    return Err(InterpError::value_error("range() arg 3 must not be zero"));
                }
                Ok(Value::Range(start, stop, step))
            }
            "enumerate" => {
                let a = bind("enumerate", &["iterable", "start"], 1, args, kwargs)?;
                let mut n = match &a[1] {
                    Some(v) => int_arg("enumerate", v)?,
                    None => 0,
                };
                let items = self.collect(a[0].as_ref().unwrap_or(&Value::None))?;
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(Value::tuple(vec![Value::Int(n), item]));
                    n = n.saturating_add(1);
                }
                Ok(Value::list(out))
            }
            "zip" => {
                no_kwargs("zip", &kwargs)?;
                let columns = args
                    .iter()
                    .map(|v| self.collect(v))
                    .collect::<Result<Vec<_>, _>>()?;
                let len = columns.iter().map(Vec::len).min().unwrap_or(0);
                let rows = (0..len)
                    .map(|i| Value::tuple(columns.iter().map(|c| c[i].clone()).collect()))
                    .collect();
                Ok(Value::list(rows))
            }
            "sum" => {
                let a = bind("sum", &["iterable", "start"], 1, args, kwargs)?;
                let mut total = a[1].clone().unwrap_or(Value::Int(0));
                if matches!(total, Value::Str(_)) {
                    return Err(InterpError::type_error(
                        "sum() can't sum strings [use ''.join(seq) instead]",
                    ));
                }
                for item in self.iter(a[0].as_ref().unwrap_or(&Value::None))? {
                    self.tick()?;
                    total = ops::binary(BinOp::Add, &total, &item)?;
                }
                Ok(total)
            }
            "max" => self.builtin_extreme("max", Ordering::Greater, args, kwargs),
            "min" => self.builtin_extreme("min", Ordering::Less, args, kwargs),
            "abs" => {
                let a = bind("abs", &["x"], 1, args, kwargs)?;
                match a[0].as_ref().unwrap_or(&Value::None) {
                    v @ (Value::Int(_) | Value::Bool(_)) => v
                        .as_int()
                        .unwrap_or(0)
                        .checked_abs()
                        .map(Value::Int)
                        .ok_or_else(|| InterpError::overflow_error("integer overflow")),
                    Value::Float(f) => Ok(Value::Float(f.abs())),
                    Value::Delta(d) => Ok(Value::Delta(if *d < chrono::Duration::zero() { -*d } else { *d })),
                    other => Err(InterpError::type_error(format!(
                        "bad operand type for abs(): '{}'",
                        other.type_name()
                    ))),
                }
            }
            "round" => {
                let a = bind("round", &["number", "ndigits"], 1, args, kwargs)?;
                let ndigits = match optional(&a[1]) {
                    Some(v) => Some(int_arg("round", v)?),
                    None => None,
                };
                match (a[0].as_ref().unwrap_or(&Value::None), ndigits) {
                    (Value::Float(f), None) => Ok(Value::Int(float_to_int(f.round_ties_even())?)),
                    (Value::Float(f), Some(n)) => {
                        if !f.is_finite() {
                            return Ok(Value::Float(*f));
                        }
                        let m = 10f64.powi(n.clamp(-308, 308) as i32);
                        let scaled = f * m;
                        if !scaled.is_finite() {
                            return Ok(Value::Float(*f));
                        }
                        Ok(Value::Float(scaled.round_ties_even() / m))
                    }
                    (v @ (Value::Int(_) | Value::Bool(_)), n) => Ok(Value::Int(round_half_even_int(
                        v.as_int().unwrap_or(0),
                        n.unwrap_or(0),
                    )?)),
                    (other, _) => Err(InterpError::type_error(format!(
                        "type {} doesn't define __round__ method",
                        other.type_name()
                    ))),
                }
            }
            "sorted" => {
                let a = bind("sorted", &["iterable", "key", "reverse"], 1, args, kwargs)?;
                let items = self.collect(a[0].as_ref().unwrap_or(&Value::None))?;
                let reverse = a[2].as_ref().is_some_and(Value::truthy);
                let sorted = self.sort_values(items, optional(&a[1]), reverse)?;
                Ok(Value::list(sorted))
            }
            "reversed" => {
                let a = bind("reversed", &["sequence"], 1, args, kwargs)?;
                let seq = a[0].as_ref().unwrap_or(&Value::None);
                if matches!(seq, Value::Dict(_)) {
                    return Err(InterpError::type_error("'dict' object is not reversible"));
                }
                let mut items = self.collect(seq)?;
                items.reverse();
                Ok(Value::list(items))
            }
            "any" | "all" => {
                let a = bind(name, &["iterable"], 1, args, kwargs)?;
                let want = name == "any";
                for item in self.iter(a[0].as_ref().unwrap_or(&Value::None))? {
                    self.tick()?;
                    if item.truthy() == want {
                        return Ok(Value::Bool(want));
                    }
                }
                Ok(Value::Bool(!want))
            }
            "chr" => {
                let a = bind("chr", &["i"], 1, args, kwargs)?;
                let i = int_arg("chr", a[0].as_ref().unwrap_or(&Value::None))?;
                u32::try_from(i)
                    .ok()
                    .and_then(char::from_u32)
                    .map(|c| Value::str(c.to_string()))
                    .ok_or_else(|| InterpError::value_error("chr() arg not in range(0x110000)"))
            }
            "ord" => {
                let a = bind("ord", &["c"], 1, args, kwargs)?;
                let s = str_arg("ord", a[0].as_ref())?;
                let mut chars = s.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => Ok(Value::Int(c as i64)),
                    _ => Err(InterpError::type_error(format!(
                        "ord() expected a character, but string of length {} found",
                        s.chars().count()
                    ))),
                }
            }
            "hex" | "oct" | "bin" => {
                let a = bind(name, &["number"], 1, args, kwargs)?;
                let i = int_arg(name, a[0].as_ref().unwrap_or(&Value::None))?;
                let (prefix, radix) = match name {
                    "hex" => ("0x", 16),
                    "oct" => ("0o", 8),
                    _ => ("0b", 2),
                };
                Ok(Value::str(radix_repr(i, prefix, radix)))
            }
            "pow" => {
                let a = bind("pow", &["base", "exp", "mod"], 2, args, kwargs)?;
                let base = a[0].as_ref().unwrap_or(&Value::None);
                let exp = a[1].as_ref().unwrap_or(&Value::None);
                match optional(&a[2]) {
                    None => ops::binary(BinOp::Pow, base, exp),
                    Some(m) => {
                        let (Some(b), Some(e), Some(m)) = (base.as_int(), exp.as_int(), m.as_int()) else {
                            return Err(InterpError::type_error(
                                "pow() 3rd argument not allowed unless all arguments are integers",
                            ));
                        };
                        mod_pow(b, e, m).map(Value::Int)
                    }
                }
            }
            "divmod" => {
                let a = bind("divmod", &["a", "b"], 2, args, kwargs)?;
                let x = a[0].as_ref().unwrap_or(&Value::None);
                let y = a[1].as_ref().unwrap_or(&Value::None);
                Ok(Value::tuple(vec![
                    ops::binary(BinOp::FloorDiv, x, y)?,
                    ops::binary(BinOp::Mod, x, y)?,
                ]))
            }
            other => Err(InterpError::name_error(format!(
                "name '{other}' is not defined"
            ))),
        }
    }

    fn builtin_print(&mut self, args: Vec<Value>, kwargs: Kwargs) -> Result<Value, InterpError> {
        let mut sep = " ".to_string();
        let mut end = "\n".to_string();
        for (key, value) in kwargs {
            let slot = match key.as_str() {
                "sep" => &mut sep,
                "end" => &mut end,
                "flush" => continue,
                other => {
                    return Err(InterpError::type_error(format!(
                        "print() got an unexpected keyword argument '{other}'"
                    )))
                }
            };
            match value {
                Value::None => {}
                Value::Str(s) => *slot = s.to_string(),
                other => {
                    return Err(InterpError::type_error(format!(
                        "{key} must be None or a string, not {}",
                        other.type_name()
                    )))
                }
            }
        }
        let line = args.iter().map(Value::to_str).collect::<Vec<_>>().join(&sep);
        self.write_out(&line);
        self.write_out(&end);
        Ok(Value::None)
    }

    fn builtin_int(&mut self, args: Vec<Value>, kwargs: Kwargs) -> Result<Value, InterpError> {
        let a = bind("int", &["x", "base"], 0, args, kwargs)?;
        let base = match &a[1] {
            Some(v) => Some(int_arg("int", v)?),
            None => None,
        };
        match (a[0].as_ref(), base) {
            (None, None) => Ok(Value::Int(0)),
            (Some(Value::Str(s)), base) => {
                let base = base.unwrap_or(10);
                if !(2..=36).contains(&base) {
                    return Err(InterpError::value_error(
                        "int() base must be >= 2 and <= 36",
                    ));
                }
                parse_int(s, base as u32).map(Value::Int)
            }
            (Some(_), Some(_)) | (None, Some(_)) => Err(InterpError::type_error(
                "int() can't convert non-string with explicit base",
            )),
            (Some(Value::Float(f)), None) => float_to_int(*f).map(Value::Int),
            (Some(v @ (Value::Int(_) | Value::Bool(_))), None) => Ok(Value::Int(v.as_int().unwrap_or(0))),
            (Some(other), None) => Err(InterpError::type_error(format!(
                "int() argument must be a string or a real number, not '{}'",
                other.type_name()
            ))),
        }
    }

    fn builtin_dict(&mut self, args: Vec<Value>, kwargs: Kwargs) -> Result<Value, InterpError> {
        if args.len() > 1 {
            return Err(InterpError::type_error(format!(
                "dict expected at most 1 argument, got {}",
                args.len()
            )));
        }
        let mut dict = Dict::new();
        if let Some(source) = args.first() {
            self.merge_into(&mut dict, source)?;
        }
        for (key, value) in kwargs {
            dict.insert(Value::str(key), value)?;
        }
        Ok(Value::dict(dict))
    }

    /// 从映射或键值对序列合并
    fn merge_into(&mut self, dict: &mut Dict, source: &Value) -> Result<(), InterpError> {
        if let Value::Dict(other) = source {
            let pairs = other.borrow().items();
            for pair in pairs {
                if let Value::Tuple(kv) = pair {
                    dict.insert(kv[0].clone(), kv[1].clone())?;
                }
            }
            return Ok(());
        }
        for (i, item) in self.collect(source)?.into_iter().enumerate() {
            let pair = self.collect(&item)?;
            let [key, value] = <[Value; 2]>::try_from(pair).map_err(|pair| {
                InterpError::value_error(format!(
                    "dictionary update sequence element #{i} has length {}; 2 is required",
                    pair.len()
                ))
            })?;
            dict.insert(key, value)?;
        }
        Ok(())
    }

    fn builtin_extreme(
        &mut self,
        name: &str,
        want: Ordering,
        args: Vec<Value>,
        kwargs: Kwargs,
    ) -> Result<Value, InterpError> {
        let mut key = None;
        let mut default = None;
        for (k, v) in kwargs {
            match k.as_str() {
                "key" => key = Some(v).filter(|v| !matches!(v, Value::None)),
                "default" => default = Some(v),
                other => {
                    return Err(InterpError::type_error(format!(
                        "{name}() got an unexpected keyword argument '{other}'"
                    )))
                }
            }
        }
        let items = match args.len() {
            0 => {
                return Err(InterpError::type_error(format!(
                    "{name} expected at least 1 argument, got 0"
                )))
            }
            1 => self.collect(&args[0])?,
            _ if default.is_some() => {
                return Err(InterpError::type_error(format!(
                    "Cannot specify a default for {name}() with multiple positional arguments"
                )))
            }
            _ => args,
        };
        let mut best: Option<(Value, Value)> = None;
        for item in items {
            self.tick()?;
            let k = match &key {
                Some(f) => self.call_value(f, vec![item.clone()], Vec::new())?,
                None => item.clone(),
            };
            let replace = match &best {
                None => true,
                Some((best_key, _)) => k.compare(best_key, if want == Ordering::Greater { ">" } else { "<" })? == want,
            };
            if replace {
                best = Some((k, item));
            }
        }
        match (best, default) {
            (Some((_, item)), _) => Ok(item),
            (None, Some(d)) => Ok(d),
            (None, None) => Err(InterpError::value_error(format!(
                "{name}() arg is an empty sequence"
            ))),
        }
    }

    /// sorted() 与 list.sort() 共用：先算出全部 key，再稳定排序
    fn sort_values(
        &mut self,
        items: Vec<Value>,
        key: Option<&Value>,
        reverse: bool,
    ) -> Result<Vec<Value>, InterpError> {
        let keys = match key {
            Some(f) => items
                .iter()
                .map(|v| self.call_value(f, vec![v.clone()], Vec::new()))
                .collect::<Result<Vec<_>, _>>()?,
            None => items.clone(),
        };
        let mut order: Vec<usize> = (0..items.len()).collect();
        try_sort(&mut order, &mut |&a: &usize, &b: &usize| {
            let ord = keys[a].compare(&keys[b], "<")?;
            Ok(if reverse { ord.reverse() } else { ord })
        })?;
        Ok(order.into_iter().map(|i| items[i].clone()).collect())
    }

    /// 方法调用：`recv.name(args)`
    pub(super) fn call_method(
        &mut self,
        recv: &Value,
        name: &str,
        args: Vec<Value>,
        kwargs: Kwargs,
    ) -> Result<Value, InterpError> {
        match recv {
            Value::Str(s) => self.str_method(s, name, args, kwargs),
            Value::List(_) => self.list_method(recv, name, args, kwargs),
            Value::Dict(_) => self.dict_method(recv, name, args, kwargs),
            Value::Int(_) | Value::Bool(_) if name == "bit_length" => {
                bind("bit_length", &[], 0, args, kwargs)?;
                let i = recv.as_int().unwrap_or(0);
                Ok(Value::Int(64 - i.unsigned_abs().leading_zeros() as i64))
            }
            Value::Float(f) if name == "is_integer" => {
                bind("is_integer", &[], 0, args, kwargs)?;
                Ok(Value::Bool(f.is_finite() && f.fract() == 0.0))
            }
            Value::DateTime(_) | Value::Date(_) | Value::Delta(_) => {
                call_value_method(recv, name, args, kwargs)
            }
            other => Err(InterpError::attribute_error(format!(
                "'{}' object has no attribute '{name}'",
                other.type_name()
            ))),
        }
    }

    fn str_method(
        &mut self,
        s: &str,
        name: &str,
        args: Vec<Value>,
        kwargs: Kwargs,
    ) -> Result<Value, InterpError> {
        let text = |v: String| -> Result<Value, InterpError> { Ok(Value::str(v)) };
        match name {
            "upper" => {
                bind(name, &[], 0, args, kwargs)?;
                text(s.to_uppercase())
            }
            "lower" => {
                bind(name, &[], 0, args, kwargs)?;
                text(s.to_lowercase())
            }
            "title" => {
                bind(name, &[], 0, args, kwargs)?;
                text(title_case(s))
            }
            "capitalize" => {
                bind(name, &[], 0, args, kwargs)?;
                let mut chars = s.chars();
                text(match chars.next() {
                    Some(first) => {
                        let rest = chars.as_str().to_lowercase();
                        first.to_uppercase().chain(rest.chars()).collect()
                    }
                    None => String::new(),
                })
            }
            "strip" | "lstrip" | "rstrip" => {
                let a = bind(name, &["chars"], 0, args, kwargs)?;
                let set: Option<Vec<char>> = match optional(&a[0]) {
                    Some(v) => Some(str_arg(name, Some(v))?.chars().collect()),
                    None => None,
                };
                let pred = |c: char| match &set {
                    Some(set) => set.contains(&c),
                    None => c.is_whitespace(),
                };
                text(match name {
                    "strip" => s.trim_matches(pred),
                    "lstrip" => s.trim_start_matches(pred),
                    _ => s.trim_end_matches(pred),
                }
                .to_string())
            }
            "split" => {
                let a = bind(name, &["sep", "maxsplit"], 0, args, kwargs)?;
                let maxsplit = match &a[1] {
                    Some(v) => int_arg("split", v)?,
                    None => -1,
                };
                match optional(&a[0]) {
                    None => Ok(Value::list(split_whitespace_n(s, maxsplit))),
                    Some(v) => {
                        let sep = str_arg("split", Some(v))?;
                        if sep.is_empty() {
                            return Err(InterpError::value_error("empty separator"));
                        }
                        let parts: Vec<Value> = if maxsplit < 0 {
                            s.split(sep.as_str()).map(Value::str).collect()
                        } else {
                            let n = usize::try_from(maxsplit).unwrap_or(usize::MAX).saturating_add(1);
                            s.splitn(n, sep.as_str()).map(Value::str).collect()
                        };
                        Ok(Value::list(parts))
                    }
                }
            }
            "splitlines" => {
                bind(name, &[], 0, args, kwargs)?;
                Ok(Value::list(s.lines().map(Value::str).collect()))
            }
            "join" => {
                let a = bind(name, &["iterable"], 1, args, kwargs)?;
                let items = self.collect(a[0].as_ref().unwrap_or(&Value::None))?;
                let mut parts = Vec::with_capacity(items.len());
                let mut total = 0usize;
                for (i, item) in items.iter().enumerate() {
                    match item {
                        Value::Str(p) => {
                            total += p.chars().count() + s.chars().count();
                            parts.push(&**p);
                        }
                        other => {
                            return Err(InterpError::type_error(format!(
                                "sequence item {i}: expected str instance, {} found",
                                other.type_name()
                            )))
                        }
                    }
                }
                if total > MAX_SEQUENCE_LEN {
                    return Err(InterpError::memory_error("joined string exceeds the sandbox size limit"));
                }
                text(parts.join(s))
            }
            "replace" => {
                let a = bind(name, &["old", "new", "count"], 2, args, kwargs)?;
                let old = str_arg("replace", a[0].as_ref())?;
                let new = str_arg("replace", a[1].as_ref())?;
                let count = match &a[2] {
                    Some(v) => int_arg("replace", v)?,
                    None => -1,
                };
                let matches = if old.is_empty() { s.chars().count() + 1 } else { s.matches(old.as_str()).count() };
                let grown = s.chars().count() + matches * new.chars().count();
                if grown > MAX_SEQUENCE_LEN {
                    return Err(InterpError::memory_error("replaced string exceeds the sandbox size limit"));
                }
                text(if count < 0 {
                    s.replace(old.as_str(), &new)
                } else {
                    s.replacen(old.as_str(), &new, count as usize)
                })
            }
            "startswith" => {
                let a = bind(name, &["prefix"], 1, args, kwargs)?;
                affix_match("startswith", s, a[0].as_ref(), |s, p| s.starts_with(p)).map(Value::Bool)
            }
            "endswith" => {
                let a = bind(name, &["suffix"], 1, args, kwargs)?;
                affix_match("endswith", s, a[0].as_ref(), |s, p| s.ends_with(p)).map(Value::Bool)
            }
            "find" | "rfind" | "index" => {
                let a = bind(name, &["sub"], 1, args, kwargs)?;
                let sub = str_arg(name, a[0].as_ref())?;
                let found = if name == "rfind" { s.rfind(sub.as_str()) } else { s.find(sub.as_str()) };
                match found {
                    Some(b) => Ok(Value::Int(char_index(s, b))),
                    None if name == "index" => Err(InterpError::value_error("substring not found")),
                    None => Ok(Value::Int(-1)),
                }
            }
            "count" => {
                let a = bind(name, &["sub"], 1, args, kwargs)?;
                let sub = str_arg("count", a[0].as_ref())?;
                let n = if sub.is_empty() { s.chars().count() + 1 } else { s.matches(sub.as_str()).count() };
                Ok(Value::Int(n as i64))
            }
            "format" => str_format(s, &args, &kwargs).map(Value::str),
            "isdigit" | "isalpha" | "isalnum" | "isspace" => {
                bind(name, &[], 0, args, kwargs)?;
                let test: fn(char) -> bool = match name {
                    "isdigit" => |c| c.is_ascii_digit(),
                    "isalpha" => char::is_alphabetic,
                    "isalnum" => char::is_alphanumeric,
                    _ => char::is_whitespace,
                };
                Ok(Value::Bool(!s.is_empty() && s.chars().all(test)))
            }
            "isupper" | "islower" => {
                bind(name, &[], 0, args, kwargs)?;
                Ok(Value::Bool(cased_check(s, name == "isupper")))
            }
            "zfill" => {
                let a = bind(name, &["width"], 1, args, kwargs)?;
                let width = int_arg("zfill", a[0].as_ref().unwrap_or(&Value::None))?;
                let len = s.chars().count() as i64;
                if width <= len {
                    return text(s.to_string());
                }
                let zeros = "0".repeat((width - len).min(MAX_SEQUENCE_LEN as i64) as usize);
                text(match s.strip_prefix(['+', '-']) {
                    Some(rest) => format!("{}{zeros}{rest}", &s[..1]),
                    None => format!("{zeros}{s}"),
                })
            }
            "center" | "ljust" | "rjust" => {
                let a = bind(name, &["width", "fillchar"], 1, args, kwargs)?;
                let width = int_arg(name, a[0].as_ref().unwrap_or(&Value::None))?;
                if width > MAX_SEQUENCE_LEN as i64 {
                    return Err(InterpError::memory_error("padded string exceeds the sandbox size limit"));
                }
                let fill = fill_char(a[1].as_ref())?;
                let align = match name {
                    "ljust" => '<',
                    "rjust" => '>',
                    _ => '^',
                };
                text(pad_str(s, width, fill, align))
            }
            other => Err(InterpError::attribute_error(format!(
                "'str' object has no attribute '{other}'"
            ))),
        }
    }

    fn list_method(
        &mut self,
        recv: &Value,
        name: &str,
        args: Vec<Value>,
        kwargs: Kwargs,
    ) -> Result<Value, InterpError> {
        let Value::List(list) = recv else {
            return Err(InterpError::type_error("list method on non-list"));
        };
        match name {
            "append" => {
                let a = bind(name, &["object"], 1, args, kwargs)?;
                let mut items = list.borrow_mut();
                if items.len() >= MAX_SEQUENCE_LEN {
                    return Err(InterpError::memory_error("list exceeds the sandbox size limit"));
                }
                items.push(a[0].clone().unwrap_or(Value::None));
                Ok(Value::None)
            }
            "extend" => {
                let a = bind(name, &["iterable"], 1, args, kwargs)?;
                let more = self.collect(a[0].as_ref().unwrap_or(&Value::None))?;
                let mut items = list.borrow_mut();
                if items.len() + more.len() > MAX_SEQUENCE_LEN {
                    return Err(InterpError::memory_error("list exceeds the sandbox size limit"));
                }
                items.extend(more);
                Ok(Value::None)
            }
            "insert" => {
                let a = bind(name, &["index", "object"], 2, args, kwargs)?;
                let index = int_arg("insert", a[0].as_ref().unwrap_or(&Value::None))?;
                let mut items = list.borrow_mut();
                let len = items.len() as i64;
                let at = if index < 0 { (index + len).max(0) } else { index.min(len) };
                items.insert(at as usize, a[1].clone().unwrap_or(Value::None));
                Ok(Value::None)
            }
            "pop" => {
                let a = bind(name, &["index"], 0, args, kwargs)?;
                let index = match &a[0] {
                    Some(v) => int_arg("pop", v)?,
                    None => -1,
                };
                let mut items = list.borrow_mut();
                if items.is_empty() {
                    return Err(InterpError::index_error("pop from empty list"));
                }
                let i = normalize_index(index, items.len())
                    .ok_or_else(|| InterpError::index_error("pop index out of range"))?;
                Ok(items.remove(i))
            }
            "remove" => {
                let a = bind(name, &["value"], 1, args, kwargs)?;
                let target = a[0].clone().unwrap_or(Value::None);
                let i = position_of(&list.borrow(), &target)?
                    .ok_or_else(|| InterpError::value_error("list.remove(x): x not in list"))?;
                list.borrow_mut().remove(i);
                Ok(Value::None)
            }
            "index" => {
                let a = bind(name, &["value"], 1, args, kwargs)?;
                let target = a[0].clone().unwrap_or(Value::None);
                position_of(&list.borrow(), &target)?
                    .map(|i| Value::Int(i as i64))
                    .ok_or_else(|| InterpError::value_error(format!("{} is not in list", target.repr())))
            }
            "count" => {
                let a = bind(name, &["value"], 1, args, kwargs)?;
                let target = a[0].clone().unwrap_or(Value::None);
                let mut n = 0;
                for v in list.borrow().iter() {
                    if v.py_eq(&target)? {
                        n += 1;
                    }
                }
                Ok(Value::Int(n))
            }
            "sort" => {
                let a = bind(name, &["key", "reverse"], 0, Vec::new(), kwargs)?;
                if !args.is_empty() {
                    return Err(InterpError::type_error("sort() takes no positional arguments"));
                }
                let reverse = a[1].as_ref().is_some_and(Value::truthy);
                // 排序期间列表为空，key 函数对它的改动在排完后检查
                let items = std::mem::take(&mut *list.borrow_mut());
                let result = self.sort_values(items.clone(), optional(&a[0]), reverse);
                let mut current = list.borrow_mut();
                let modified = !current.is_empty();
                match result {
                    Ok(sorted) => *current = sorted,
                    Err(e) => {
                        *current = items;
                        return Err(e);
                    }
                }
                if modified {
                    return Err(InterpError::value_error("list modified during sort"));
                }
                Ok(Value::None)
            }
            "reverse" => {
                bind(name, &[], 0, args, kwargs)?;
                list.borrow_mut().reverse();
                Ok(Value::None)
            }
            "copy" => {
                bind(name, &[], 0, args, kwargs)?;
                Ok(Value::list(list.borrow().clone()))
            }
            "clear" => {
                bind(name, &[], 0, args, kwargs)?;
                list.borrow_mut().clear();
                Ok(Value::None)
            }
            other => Err(InterpError::attribute_error(format!(
                "'list' object has no attribute '{other}'"
            ))),
        }
    }

    fn dict_method(
        &mut self,
        recv: &Value,
        name: &str,
        args: Vec<Value>,
        kwargs: Kwargs,
    ) -> Result<Value, InterpError> {
        let Value::Dict(dict) = recv else {
            return Err(InterpError::type_error("dict method on non-dict"));
        };
        match name {
            "get" => {
                let a = bind(name, &["key", "default"], 1, args, kwargs)?;
                let key = a[0].clone().unwrap_or(Value::None);
                key.ensure_hashable()?;
                let found = dict.borrow().get(&key);
                Ok(found.or_else(|| a[1].clone()).unwrap_or(Value::None))
            }
            "keys" | "values" | "items" => {
                bind(name, &[], 0, args, kwargs)?;
                let d = dict.borrow();
                Ok(Value::list(match name {
                    "keys" => d.keys(),
                    "values" => d.values(),
                    _ => d.items(),
                }))
            }
            "update" => {
                if args.len() > 1 {
                    return Err(InterpError::type_error(format!(
                        "update expected at most 1 argument, got {}",
                        args.len()
                    )));
                }
                let mut merged = dict.borrow().clone();
                if let Some(source) = args.first() {
                    self.merge_into(&mut merged, source)?;
                }
                for (key, value) in kwargs {
                    merged.insert(Value::str(key), value)?;
                }
                *dict.borrow_mut() = merged;
                Ok(Value::None)
            }
            "pop" => {
                let a = bind(name, &["key", "default"], 1, args, kwargs)?;
                let key = a[0].clone().unwrap_or(Value::None);
                let removed = dict.borrow_mut().remove(&key);
                match (removed, a[1].clone()) {
                    (Some(v), _) | (None, Some(v)) => Ok(v),
                    (None, None) => Err(InterpError::key_error(key.repr())),
                }
            }
            "setdefault" => {
                let a = bind(name, &["key", "default"], 1, args, kwargs)?;
                let key = a[0].clone().unwrap_or(Value::None);
                let existing = dict.borrow().get(&key);
                match existing {
                    Some(v) => Ok(v),
                    None => {
                        let value = a[1].clone().unwrap_or(Value::None);
                        dict.borrow_mut().insert(key, value.clone())?;
                        Ok(value)
                    }
                }
            }
            "copy" => {
                bind(name, &[], 0, args, kwargs)?;
                Ok(Value::dict(dict.borrow().clone()))
            }
            "clear" => {
                bind(name, &[], 0, args, kwargs)?;
                dict.borrow_mut().clear();
                Ok(Value::None)
            }
            other => Err(InterpError::attribute_error(format!(
                "'dict' object has no attribute '{other}'"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_errors() {
        let ok = bind("f", &["a", "b"], 1, vec![Value::Int(1)], vec![("b".into(), Value::Int(2))]).unwrap();
        assert!(ok[1].is_some());
        assert!(bind("f", &["a"], 1, vec![], vec![]).is_err());
        assert!(bind("f", &["a"], 1, vec![Value::Int(1), Value::Int(2)], vec![]).is_err());
        assert!(bind("f", &["a"], 0, vec![Value::Int(1)], vec![("a".into(), Value::Int(2))]).is_err());
        assert!(bind("f", &["a"], 0, vec![], vec![("z".into(), Value::Int(2))]).is_err());
    }

    #[test]
    fn test_parse_int() {
        assert_eq!(parse_int(" -42 ", 10).unwrap(), -42);
        assert_eq!(parse_int("1_000", 10).unwrap(), 1000);
        assert_eq!(parse_int("0xff", 16).unwrap(), 255);
        assert_eq!(parse_int("101", 2).unwrap(), 5);
        assert!(parse_int("3.5", 10).is_err());
        assert!(matches!(
            parse_int("99999999999999999999", 10),
            Err(InterpError::Runtime { kind: "OverflowError", .. })
        ));
    }

    #[test]
    fn test_rounding_helpers() {
        assert_eq!(round_half_even_int(25, -1).unwrap(), 20);
        assert_eq!(round_half_even_int(35, -1).unwrap(), 40);
        assert_eq!(round_half_even_int(-15, -1).unwrap(), -20);
        assert_eq!(mod_pow(3, 200, 7).unwrap(), 2);
        assert_eq!(mod_pow(3, 2, -4).unwrap(), -3);
        assert!(mod_pow(2, 3, 0).is_err());
    }

    #[test]
    fn test_try_sort_is_stable() {
        let mut items = vec![(2, 'a'), (1, 'b'), (2, 'c'), (1, 'd')];
        try_sort(&mut items, &mut |x, y| Ok(x.0.cmp(&y.0))).unwrap();
        assert_eq!(items, vec![(1, 'b'), (1, 'd'), (2, 'a'), (2, 'c')]);
        let mut bad = vec![1, 2];
        assert!(try_sort(&mut bad, &mut |_, _| Err(InterpError::type_error("no"))).is_err());
    }

    #[test]
    fn test_string_helpers() {
        assert_eq!(pad_str("ab", 5, '*', '^'), "**ab*");
        assert_eq!(pad_str("abc", 6, ' ', '^'), " abc  ");
        assert_eq!(title_case("hello wORLD"), "Hello World");
        assert_eq!(radix_repr(-31, "0x", 16), "-0x1f");
        let parts = split_whitespace_n("  a b  c ", 1);
        assert_eq!(Value::list(parts).repr(), "['a', 'b  c ']");
    }
}
