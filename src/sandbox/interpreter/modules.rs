//! 可导入模块：math、datetime、time
//!
//! 日期时间值基于 chrono 的 Naive 类型（本地时间，不带时区）。

use chrono::{Datelike, Duration, Local, NaiveDate, NaiveDateTime, TimeZone, Timelike, Utc};

use super::ast::BinOp;
use super::builtins::{bind, float_arg, int_arg, str_arg, Kwargs};
use super::format::strftime_naive;
use super::value::{float_to_int, format_datetime, Value};
use super::InterpError;

pub const ALLOWED_MODULES: &[&str] = &["math", "datetime", "time"];

const MATH_FUNCS: &[&str] = &[
    "sqrt", "exp", "log", "log10", "log2", "log1p", "sin", "cos", "tan", "asin", "acos", "atan",
    "atan2", "sinh", "cosh", "tanh", "degrees", "radians", "fabs", "floor", "ceil", "trunc", "pow",
    "hypot", "fmod", "copysign", "factorial", "gcd", "lcm", "comb", "perm", "isclose", "isfinite",
    "isinf", "isnan", "fsum",
];

const DATETIME_TYPES: &[&str] = &["datetime", "date", "timedelta"];
const DATETIME_CLASS_METHODS: &[&str] = &["now", "today", "fromtimestamp", "strptime", "fromisoformat"];
const DATE_CLASS_METHODS: &[&str] = &["today", "fromisoformat"];

const TIME_FUNCS: &[&str] = &["time", "localtime", "strftime", "ctime", "monotonic", "perf_counter"];

const DATETIME_METHODS: &[&str] = &[
    "strftime", "weekday", "isoweekday", "isoformat", "date", "timestamp", "replace",
];
const DATE_METHODS: &[&str] = &["strftime", "weekday", "isoweekday", "isoformat", "replace"];
const DELTA_METHODS: &[&str] = &["total_seconds"];

/// 最大可表示的时间间隔（微秒），约 3 万年
const MAX_DELTA_MICROS: f64 = 1e18;

pub fn import(name: &str) -> Result<Value, InterpError> {
    ALLOWED_MODULES
        .iter()
        .find(|m| **m == name)
        .map(|m| Value::Module(*m))
        .ok_or_else(|| {
            InterpError::runtime(
                "ModuleNotFoundError",
                format!("import of '{name}' is not allowed (available: math, datetime, time)"),
            )
        })
}

fn lookup(names: &'static [&'static str], name: &str) -> Option<&'static str> {
    names.iter().find(|n| **n == name).copied()
}

pub fn module_attr(module: &'static str, name: &str) -> Result<Value, InterpError> {
    let found = match module {
        "math" => match name {
            "pi" => Some(Value::Float(std::f64::consts::PI)),
            "e" => Some(Value::Float(std::f64::consts::E)),
            "tau" => Some(Value::Float(std::f64::consts::TAU)),
            "inf" => Some(Value::Float(f64::INFINITY)),
            "nan" => Some(Value::Float(f64::NAN)),
            _ => lookup(MATH_FUNCS, name).map(|f| Value::Native("math", f)),
        },
        "datetime" => lookup(DATETIME_TYPES, name).map(|t| Value::Native("datetime", t)),
        "time" => lookup(TIME_FUNCS, name).map(|f| Value::Native("time", f)),
        _ => None,
    };
    found.ok_or_else(|| {
        InterpError::attribute_error(format!("module '{module}' has no attribute '{name}'"))
    })
}

/// 类型对象上的属性，如 datetime.now
pub fn native_attr(ns: &'static str, name: &'static str, attr: &str) -> Result<Value, InterpError> {
    let found = match (ns, name) {
        ("datetime", "datetime") => {
            lookup(DATETIME_CLASS_METHODS, attr).map(|m| Value::Native("datetime.datetime", m))
        }
        ("datetime", "date") => {
            lookup(DATE_CLASS_METHODS, attr).map(|m| Value::Native("datetime.date", m))
        }
        _ => None,
    };
    found.ok_or_else(|| {
        InterpError::attribute_error(format!("'{ns}.{name}' has no attribute '{attr}'"))
    })
}

pub fn call_native(
    ns: &str,
    name: &str,
    args: Vec<Value>,
    kwargs: Kwargs,
) -> Result<Value, InterpError> {
    match ns {
        "math" => math_call(name, args, kwargs),
        "time" => time_call(name, args, kwargs),
        "datetime" => match name {
            "datetime" => {
                let a = bind(
                    "datetime",
                    &["year", "month", "day", "hour", "minute", "second", "microsecond"],
                    3,
                    args,
                    kwargs,
                )?;
                let part = |i: usize| -> Result<i64, InterpError> {
                    a[i].as_ref().map_or(Ok(0), |v| int_arg("datetime", v))
                };
                Ok(Value::DateTime(make_datetime(
                    part(0)?,
                    part(1)?,
                    part(2)?,
                    [part(3)?, part(4)?, part(5)?, part(6)?],
                )?))
            }
            "date" => {
                let a = bind("date", &["year", "month", "day"], 3, args, kwargs)?;
                let part = |i: usize| -> Result<i64, InterpError> {
                    a[i].as_ref().map_or(Ok(0), |v| int_arg("date", v))
                };
                Ok(Value::Date(make_date(part(0)?, part(1)?, part(2)?)?))
            }
            "timedelta" => timedelta(args, kwargs),
            _ => Err(not_callable(ns, name)),
        },
        "datetime.datetime" => datetime_class_call(name, args, kwargs),
        "datetime.date" => match name {
            "today" => {
                bind("today", &[], 0, args, kwargs)?;
                Ok(Value::Date(Local::now().date_naive()))
            }
            "fromisoformat" => {
                let a = bind("fromisoformat", &["date_string"], 1, args, kwargs)?;
                let s = str_arg("fromisoformat", a[0].as_ref())?;
                NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
                    .map(Value::Date)
                    .map_err(|_| InterpError::value_error(format!("Invalid isoformat string: '{s}'")))
            }
            _ => Err(not_callable(ns, name)),
        },
        _ => Err(not_callable(ns, name)),
    }
}

fn not_callable(ns: &str, name: &str) -> InterpError {
    InterpError::type_error(format!("'{ns}.{name}' is not callable"))
}

fn domain_error() -> InterpError {
    InterpError::value_error("math domain error")
}

fn checked_float(f: f64) -> Result<Value, InterpError> {
    if f.is_infinite() {
        Err(InterpError::overflow_error("math range error"))
    } else {
        Ok(Value::Float(f))
    }
}

fn float_to_int_value(v: &Value, op: fn(f64) -> f64, func: &str) -> Result<Value, InterpError> {
    match v {
        Value::Int(_) | Value::Bool(_) => Ok(Value::Int(v.as_int().unwrap_or(0))),
        other => Ok(Value::Int(float_to_int(op(float_arg(func, other)?))?)),
    }
}

fn gcd(mut a: i64, mut b: i64) -> i64 {
    a = a.saturating_abs();
    b = b.saturating_abs();
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

fn math_call(name: &str, args: Vec<Value>, kwargs: Kwargs) -> Result<Value, InterpError> {
    let unary = |args: Vec<Value>, kwargs: Kwargs| -> Result<f64, InterpError> {
        let a = bind(name, &["x"], 1, args, kwargs)?;
        float_arg(name, a[0].as_ref().unwrap_or(&Value::None))
    };
    match name {
        "sqrt" => {
            let x = unary(args, kwargs)?;
            if x < 0.0 {
                return Err(domain_error());
            }
            Ok(Value::Float(x.sqrt()))
        }
        "exp" => checked_float(unary(args, kwargs)?.exp()),
        "log" => {
            let a = bind("log", &["x", "base"], 1, args, kwargs)?;
            let x = float_arg("log", a[0].as_ref().unwrap_or(&Value::None))?;
            if x <= 0.0 {
                return Err(domain_error());
            }
            match &a[1] {
                None => Ok(Value::Float(x.ln())),
                Some(base) => {
                    let base = float_arg("log", base)?;
                    if base <= 0.0 || base == 1.0 {
                        return Err(domain_error());
                    }
                    Ok(Value::Float(x.ln() / base.ln()))
                }
            }
        }
        "log10" | "log2" | "log1p" => {
            let x = unary(args, kwargs)?;
            let (ok, value) = match name {
                "log10" => (x > 0.0, x.log10()),
                "log2" => (x > 0.0, x.log2()),
                _ => (x > -1.0, x.ln_1p()),
            };
            if !ok {
                return Err(domain_error());
            }
            Ok(Value::Float(value))
        }
        "sin" => Ok(Value::Float(unary(args, kwargs)?.sin())),
        "cos" => Ok(Value::Float(unary(args, kwargs)?.cos())),
        "tan" => Ok(Value::Float(unary(args, kwargs)?.tan())),
        "atan" => Ok(Value::Float(unary(args, kwargs)?.atan())),
        "sinh" => checked_float(unary(args, kwargs)?.sinh()),
        "cosh" => checked_float(unary(args, kwargs)?.cosh()),
        "tanh" => Ok(Value::Float(unary(args, kwargs)?.tanh())),
        "asin" | "acos" => {
            let x = unary(args, kwargs)?;
            if !(-1.0..=1.0).contains(&x) {
                return Err(domain_error());
            }
            Ok(Value::Float(if name == "asin" { x.asin() } else { x.acos() }))
        }
        "degrees" => Ok(Value::Float(unary(args, kwargs)?.to_degrees())),
        "radians" => Ok(Value::Float(unary(args, kwargs)?.to_radians())),
        "fabs" => Ok(Value::Float(unary(args, kwargs)?.abs())),
        "floor" | "ceil" | "trunc" => {
            let a = bind(name, &["x"], 1, args, kwargs)?;
            let op: fn(f64) -> f64 = match name {
                "floor" => f64::floor,
                "ceil" => f64::ceil,
                _ => f64::trunc,
            };
            float_to_int_value(a[0].as_ref().unwrap_or(&Value::None), op, name)
        }
        "pow" | "atan2" | "hypot" | "fmod" | "copysign" => {
            let a = bind(name, &["x", "y"], 2, args, kwargs)?;
            let x = float_arg(name, a[0].as_ref().unwrap_or(&Value::None))?;
            let y = float_arg(name, a[1].as_ref().unwrap_or(&Value::None))?;
            match name {
                "pow" => {
                    if x < 0.0 && y.fract() != 0.0 {
                        return Err(domain_error());
                    }
                    checked_float(x.powf(y))
                }
                "atan2" => Ok(Value::Float(x.atan2(y))),
                "hypot" => Ok(Value::Float(x.hypot(y))),
                "fmod" => {
                    if y == 0.0 {
                        return Err(domain_error());
                    }
                    Ok(Value::Float(x % y))
                }
                _ => Ok(Value::Float(x.copysign(y))),
            }
        }
        "factorial" => {
            let a = bind("factorial", &["n"], 1, args, kwargs)?;
            let n = int_arg("factorial", a[0].as_ref().unwrap_or(&Value::None))?;
            if n < 0 {
                return Err(InterpError::value_error(
                    "factorial() not defined for negative values",
                ));
            }
            (1..=n)
                .try_fold(1i64, |acc, k| acc.checked_mul(k))
                .map(Value::Int)
                .ok_or_else(|| InterpError::overflow_error("factorial result too large"))
        }
        "gcd" | "lcm" => {
            if !kwargs.is_empty() {
                return Err(InterpError::type_error(format!(
                    "{name}() takes no keyword arguments"
                )));
            }
            let mut acc = if name == "gcd" { 0 } else { 1 };
            for v in &args {
                let n = int_arg(name, v)?;
                acc = if name == "gcd" {
                    gcd(acc, n)
                } else if acc == 0 || n == 0 {
                    0
                } else {
                    (acc / gcd(acc, n))
                        .checked_mul(n.saturating_abs())
                        .ok_or_else(|| InterpError::overflow_error("lcm result too large"))?
                };
            }
            Ok(Value::Int(acc))
        }
        "comb" | "perm" => {
            let a = bind(name, &["n", "k"], if name == "comb" { 2 } else { 1 }, args, kwargs)?;
            let n = int_arg(name, a[0].as_ref().unwrap_or(&Value::None))?;
            let k = match &a[1] {
                Some(v) => int_arg(name, v)?,
                None => n,
            };
            if n < 0 || k < 0 {
                return Err(InterpError::value_error(format!(
                    "{name}() arguments must be non-negative"
                )));
            }
            if k > n {
                return Ok(Value::Int(0));
            }
            let overflow = || InterpError::overflow_error(format!("{name}() result too large"));
            let mut acc: i128 = 1;
            if name == "perm" {
                for i in 0..k {
                    acc = acc.checked_mul((n - i) as i128).ok_or_else(overflow)?;
                }
            } else {
                let k = k.min(n - k);
                for i in 0..k {
                    acc = acc.checked_mul((n - i) as i128).ok_or_else(overflow)? / (i as i128 + 1);
                }
            }
            i64::try_from(acc).map(Value::Int).map_err(|_| overflow())
        }
        "isclose" => {
            let a = bind("isclose", &["a", "b", "rel_tol", "abs_tol"], 2, args, kwargs)?;
            let get = |i: usize, default: f64| {
                a[i].as_ref().map_or(Ok(default), |v| float_arg("isclose", v))
            };
            let (x, y, rel, abs) = (get(0, 0.0)?, get(1, 0.0)?, get(2, 1e-9)?, get(3, 0.0)?);
            if x == y {
                return Ok(Value::Bool(true));
            }
            let diff = (x - y).abs();
            Ok(Value::Bool(
                diff <= (rel * x.abs().max(y.abs())).max(abs),
            ))
        }
        "isfinite" => Ok(Value::Bool(unary(args, kwargs)?.is_finite())),
        "isinf" => Ok(Value::Bool(unary(args, kwargs)?.is_infinite())),
        "isnan" => Ok(Value::Bool(unary(args, kwargs)?.is_nan())),
        "fsum" => {
            let a = bind("fsum", &["seq"], 1, args, kwargs)?;
            let items = match a[0].as_ref() {
                Some(Value::List(l)) => l.borrow().clone(),
                Some(Value::Tuple(t)) => t.to_vec(),
                Some(r @ Value::Range(..)) if r.range_len() <= 1_000_000 => {
                    let Value::Range(start, _, step) = *r else {
                        return Ok(Value::Float(0.0));
                    };
                    (0..r.range_len()).map(|i| Value::Int(start + i * step)).collect()
                }
                _ => return Err(InterpError::type_error("fsum() expects a list, tuple or range")),
            };
            let mut total = 0.0;
            for v in &items {
                total += float_arg("fsum", v)?;
            }
            Ok(Value::Float(total))
        }
        _ => Err(not_callable("math", name)),
    }
}

fn now_local() -> NaiveDateTime {
    Local::now().naive_local()
}

fn from_timestamp(ts: f64) -> Result<NaiveDateTime, InterpError> {
    if !ts.is_finite() || ts.abs() > 1e13 {
        return Err(InterpError::overflow_error("timestamp out of range"));
    }
    let secs = ts.floor() as i64;
    let nanos = ((ts - ts.floor()) * 1e9).round().min(999_999_999.0) as u32;
    Local
        .timestamp_opt(secs, nanos)
        .single()
        .map(|dt| dt.naive_local())
        .ok_or_else(|| InterpError::overflow_error("timestamp out of range"))
}

fn unix_now() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1e6
}

fn make_date(year: i64, month: i64, day: i64) -> Result<NaiveDate, InterpError> {
    let (Ok(y), Ok(m), Ok(d)) = (i32::try_from(year), u32::try_from(month), u32::try_from(day))
    else {
        return Err(InterpError::value_error("date value out of range"));
    };
    if !(1..=9999).contains(&y) {
        return Err(InterpError::value_error(format!("year {year} is out of range")));
    }
    NaiveDate::from_ymd_opt(y, m, d)
        .ok_or_else(|| InterpError::value_error("day is out of range for month"))
}

/// time = [hour, minute, second, microsecond]
fn make_datetime(year: i64, month: i64, day: i64, time: [i64; 4]) -> Result<NaiveDateTime, InterpError> {
    let date = make_date(year, month, day)?;
    let [h, mi, s, us] = time.map(|v| u32::try_from(v).unwrap_or(u32::MAX));
    date.and_hms_micro_opt(h, mi, s, us)
        .ok_or_else(|| InterpError::value_error("time value out of range"))
}

fn timedelta(args: Vec<Value>, kwargs: Kwargs) -> Result<Value, InterpError> {
    let a = bind(
        "timedelta",
        &["days", "seconds", "microseconds", "milliseconds", "minutes", "hours", "weeks"],
        0,
        args,
        kwargs,
    )?;
    let get = |i: usize| a[i].as_ref().map_or(Ok(0.0), |v| float_arg("timedelta", v));
    let (days, seconds, micros, millis, minutes, hours, weeks) =
        (get(0)?, get(1)?, get(2)?, get(3)?, get(4)?, get(5)?, get(6)?);
    let total_seconds = (weeks * 7.0 + days) * 86_400.0 + hours * 3600.0 + minutes * 60.0 + seconds;
    let total_micros = (total_seconds * 1e6 + millis * 1e3 + micros).round();
    if !total_micros.is_finite() || total_micros.abs() > MAX_DELTA_MICROS {
        return Err(InterpError::overflow_error("timedelta out of range"));
    }
    Ok(Value::Delta(Duration::microseconds(total_micros as i64)))
}

fn parse_iso(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(s, f).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

fn datetime_class_call(name: &str, args: Vec<Value>, kwargs: Kwargs) -> Result<Value, InterpError> {
    match name {
        "now" | "today" => {
            bind(name, &[], 0, args, kwargs)?;
            Ok(Value::DateTime(now_local()))
        }
        "fromtimestamp" => {
            let a = bind("fromtimestamp", &["timestamp"], 1, args, kwargs)?;
            let ts = float_arg("fromtimestamp", a[0].as_ref().unwrap_or(&Value::None))?;
            Ok(Value::DateTime(from_timestamp(ts)?))
        }
        "strptime" => {
            let a = bind("strptime", &["date_string", "format"], 2, args, kwargs)?;
            let s = str_arg("strptime", a[0].as_ref())?;
            let fmt = str_arg("strptime", a[1].as_ref())?;
            NaiveDateTime::parse_from_str(&s, &fmt)
                .ok()
                .or_else(|| {
                    NaiveDate::parse_from_str(&s, &fmt)
                        .ok()
                        .and_then(|d| d.and_hms_opt(0, 0, 0))
                })
                .map(Value::DateTime)
                .ok_or_else(|| {
                    InterpError::value_error(format!(
                        "time data '{s}' does not match format '{fmt}'"
                    ))
                })
        }
        "fromisoformat" => {
            let a = bind("fromisoformat", &["date_string"], 1, args, kwargs)?;
            let s = str_arg("fromisoformat", a[0].as_ref())?;
            parse_iso(&s)
                .map(Value::DateTime)
                .ok_or_else(|| InterpError::value_error(format!("Invalid isoformat string: '{s}'")))
        }
        _ => Err(not_callable("datetime.datetime", name)),
    }
}

fn time_call(name: &str, args: Vec<Value>, kwargs: Kwargs) -> Result<Value, InterpError> {
    match name {
        "time" | "monotonic" | "perf_counter" => {
            bind(name, &[], 0, args, kwargs)?;
            Ok(Value::Float(unix_now()))
        }
        "localtime" => {
            let a = bind("localtime", &["seconds"], 0, args, kwargs)?;
            match &a[0] {
                None | Some(Value::None) => Ok(Value::DateTime(now_local())),
                Some(v) => Ok(Value::DateTime(from_timestamp(float_arg("localtime", v)?)?)),
            }
        }
        "ctime" => {
            let a = bind("ctime", &["seconds"], 0, args, kwargs)?;
            let dt = match &a[0] {
                None | Some(Value::None) => now_local(),
                Some(v) => from_timestamp(float_arg("ctime", v)?)?,
            };
            strftime_naive(&dt, "%a %b %e %H:%M:%S %Y").map(Value::str)
        }
        "strftime" => {
            let a = bind("strftime", &["format", "t"], 1, args, kwargs)?;
            let fmt = str_arg("strftime", a[0].as_ref())?;
            let dt = match &a[1] {
                None => now_local(),
                Some(Value::DateTime(dt)) => *dt,
                Some(other) => {
                    return Err(InterpError::type_error(format!(
                        "strftime() argument 2 must be a time tuple, not {}",
                        other.type_name()
                    )))
                }
            };
            strftime_naive(&dt, &fmt).map(Value::str)
        }
        _ => Err(not_callable("time", name)),
    }
}

/// 日期时间值的数据属性
pub fn value_attr(value: &Value, attr: &str) -> Option<Value> {
    let int = |i: i64| Some(Value::Int(i));
    match value {
        Value::DateTime(dt) => match attr {
            "year" | "tm_year" => int(dt.year() as i64),
            "month" | "tm_mon" => int(dt.month() as i64),
            "day" | "tm_mday" => int(dt.day() as i64),
            "hour" | "tm_hour" => int(dt.hour() as i64),
            "minute" | "tm_min" => int(dt.minute() as i64),
            "second" | "tm_sec" => int(dt.second() as i64),
            "microsecond" => int((dt.nanosecond() / 1000) as i64),
            "tm_wday" => int(dt.weekday().num_days_from_monday() as i64),
            "tm_yday" => int(dt.ordinal() as i64),
            _ => None,
        },
        Value::Date(d) => match attr {
            "year" => int(d.year() as i64),
            "month" => int(d.month() as i64),
            "day" => int(d.day() as i64),
            _ => None,
        },
        Value::Delta(d) => {
            let micros = d.num_microseconds().unwrap_or(i64::MAX);
            let total_secs = micros.div_euclid(1_000_000);
            match attr {
                "days" => int(total_secs.div_euclid(86_400)),
                "seconds" => int(total_secs.rem_euclid(86_400)),
                "microseconds" => int(micros.rem_euclid(1_000_000)),
                _ => None,
            }
        }
        _ => None,
    }
}

pub fn has_value_method(value: &Value, name: &str) -> bool {
    let methods = match value {
        Value::DateTime(_) => DATETIME_METHODS,
        Value::Date(_) => DATE_METHODS,
        Value::Delta(_) => DELTA_METHODS,
        _ => return false,
    };
    methods.contains(&name)
}

fn weekday_values(date: NaiveDate, name: &str) -> Value {
    let monday_based = date.weekday().num_days_from_monday() as i64;
    Value::Int(if name == "weekday" {
        monday_based
    } else {
        monday_based + 1
    })
}

pub fn call_value_method(
    value: &Value,
    name: &str,
    args: Vec<Value>,
    kwargs: Kwargs,
) -> Result<Value, InterpError> {
    match (value, name) {
        (Value::DateTime(dt), "strftime") => {
            let a = bind("strftime", &["format"], 1, args, kwargs)?;
            strftime_naive(dt, &str_arg("strftime", a[0].as_ref())?).map(Value::str)
        }
        (Value::Date(d), "strftime") => {
            let a = bind("strftime", &["format"], 1, args, kwargs)?;
            let dt = d.and_hms_opt(0, 0, 0).unwrap_or_default();
            strftime_naive(&dt, &str_arg("strftime", a[0].as_ref())?).map(Value::str)
        }
        (Value::DateTime(dt), "weekday" | "isoweekday") => {
            bind(name, &[], 0, args, kwargs)?;
            Ok(weekday_values(dt.date(), name))
        }
        (Value::Date(d), "weekday" | "isoweekday") => {
            bind(name, &[], 0, args, kwargs)?;
            Ok(weekday_values(*d, name))
        }
        (Value::DateTime(dt), "isoformat") => {
            let a = bind("isoformat", &["sep"], 0, args, kwargs)?;
            let sep = match &a[0] {
                Some(Value::Str(s)) if s.chars().count() == 1 => s.chars().next().unwrap_or('T'),
                Some(_) => return Err(InterpError::type_error("isoformat() argument must be a single character")),
                None => 'T',
            };
            Ok(Value::str(format_datetime(dt, sep)))
        }
        (Value::Date(d), "isoformat") => {
            bind("isoformat", &[], 0, args, kwargs)?;
            Ok(Value::str(d.format("%Y-%m-%d").to_string()))
        }
        (Value::DateTime(dt), "date") => {
            bind("date", &[], 0, args, kwargs)?;
            Ok(Value::Date(dt.date()))
        }
        (Value::DateTime(dt), "timestamp") => {
            bind("timestamp", &[], 0, args, kwargs)?;
            let local = Local
                .from_local_datetime(dt)
                .earliest()
                .ok_or_else(|| InterpError::value_error("nonexistent local time"))?;
            Ok(Value::Float(local.timestamp_micros() as f64 / 1e6))
        }
        (Value::DateTime(dt), "replace") => {
            let a = bind(
                "replace",
                &["year", "month", "day", "hour", "minute", "second", "microsecond"],
                0,
                args,
                kwargs,
            )?;
            let current = [
                dt.year() as i64,
                dt.month() as i64,
                dt.day() as i64,
                dt.hour() as i64,
                dt.minute() as i64,
                dt.second() as i64,
                (dt.nanosecond() / 1000) as i64,
            ];
            let mut parts = current;
            for (i, slot) in a.iter().enumerate() {
                if let Some(v) = slot {
                    parts[i] = int_arg("replace", v)?;
                }
            }
            Ok(Value::DateTime(make_datetime(
                parts[0],
                parts[1],
                parts[2],
                [parts[3], parts[4], parts[5], parts[6]],
            )?))
        }
        (Value::Date(d), "replace") => {
            let a = bind("replace", &["year", "month", "day"], 0, args, kwargs)?;
            let mut parts = [d.year() as i64, d.month() as i64, d.day() as i64];
            for (i, slot) in a.iter().enumerate() {
                if let Some(v) = slot {
                    parts[i] = int_arg("replace", v)?;
                }
            }
            Ok(Value::Date(make_date(parts[0], parts[1], parts[2])?))
        }
        (Value::Delta(d), "total_seconds") => {
            bind("total_seconds", &[], 0, args, kwargs)?;
            Ok(Value::Float(
                d.num_microseconds().unwrap_or(i64::MAX) as f64 / 1e6,
            ))
        }
        _ => Err(InterpError::attribute_error(format!(
            "'{}' object has no attribute '{name}'",
            value.type_name()
        ))),
    }
}

fn out_of_range() -> InterpError {
    InterpError::overflow_error("date value out of range")
}

fn delta_micros(d: &Duration) -> i64 {
    d.num_microseconds().unwrap_or(i64::MAX)
}

/// 日期时间相关的二元运算；不适用时返回 None
pub fn datetime_binary(op: BinOp, a: &Value, b: &Value) -> Option<Result<Value, InterpError>> {
    let result = match (op, a, b) {
        (BinOp::Add, Value::DateTime(dt), Value::Delta(d))
        | (BinOp::Add, Value::Delta(d), Value::DateTime(dt)) => dt
            .checked_add_signed(*d)
            .map(Value::DateTime)
            .ok_or_else(out_of_range),
        (BinOp::Sub, Value::DateTime(dt), Value::Delta(d)) => dt
            .checked_sub_signed(*d)
            .map(Value::DateTime)
            .ok_or_else(out_of_range),
        (BinOp::Sub, Value::DateTime(x), Value::DateTime(y)) => {
            Ok(Value::Delta(x.signed_duration_since(*y)))
        }
        (BinOp::Add, Value::Date(date), Value::Delta(d))
        | (BinOp::Add, Value::Delta(d), Value::Date(date)) => {
            let days = delta_micros(d).div_euclid(86_400_000_000);
            date.checked_add_signed(Duration::days(days))
                .map(Value::Date)
                .ok_or_else(out_of_range)
        }
        (BinOp::Sub, Value::Date(date), Value::Delta(d)) => {
            let days = delta_micros(d).div_euclid(86_400_000_000);
            date.checked_sub_signed(Duration::days(days))
                .map(Value::Date)
                .ok_or_else(out_of_range)
        }
        (BinOp::Sub, Value::Date(x), Value::Date(y)) => {
            Ok(Value::Delta(x.signed_duration_since(*y)))
        }
        (BinOp::Add, Value::Delta(x), Value::Delta(y)) => x
            .checked_add(y)
            .map(Value::Delta)
            .ok_or_else(|| InterpError::overflow_error("timedelta out of range")),
        (BinOp::Sub, Value::Delta(x), Value::Delta(y)) => x
            .checked_sub(y)
            .map(Value::Delta)
            .ok_or_else(|| InterpError::overflow_error("timedelta out of range")),
        (BinOp::Div, Value::Delta(x), Value::Delta(y)) => {
            let divisor = delta_micros(y);
            if divisor == 0 {
                Err(InterpError::zero_division("division by zero"))
            } else {
                Ok(Value::Float(delta_micros(x) as f64 / divisor as f64))
            }
        }
        (BinOp::Mul, Value::Delta(d), n) | (BinOp::Mul, n, Value::Delta(d))
            if n.as_f64().is_some() =>
        {
            let factor = n.as_f64().unwrap_or(0.0);
            let micros = (delta_micros(d) as f64 * factor).round();
            if micros.is_finite() && micros.abs() <= MAX_DELTA_MICROS {
                Ok(Value::Delta(Duration::microseconds(micros as i64)))
            } else {
                Err(InterpError::overflow_error("timedelta out of range"))
            }
        }
        (BinOp::Div | BinOp::FloorDiv, Value::Delta(d), n) if n.as_f64().is_some() => {
            let divisor = n.as_f64().unwrap_or(0.0);
            if divisor == 0.0 {
                Err(InterpError::zero_division("division by zero"))
            } else {
                let micros = delta_micros(d) as f64 / divisor;
                let micros = if op == BinOp::FloorDiv {
                    micros.floor()
                } else {
                    micros.round()
                };
                Ok(Value::Delta(Duration::microseconds(micros as i64)))
            }
        }
        _ => return None,
    };
    Some(result)
}
