//! 运算符语义（整数溢出报 OverflowError，不回绕）

use super::ast::{BinOp, CmpOp, UnaryOp};
use super::format::percent_format;
use super::modules::datetime_binary;
use super::value::{position_of, Value};
use super::InterpError;

/// 单个字符串 / 序列结果的长度上限
pub const MAX_SEQUENCE_LEN: usize = 1_000_000;

fn overflow() -> InterpError {
    InterpError::overflow_error("integer overflow")
}

fn unsupported(op: BinOp, a: &Value, b: &Value) -> InterpError {
    InterpError::type_error(format!(
        "unsupported operand type(s) for {}: '{}' and '{}'",
        op.symbol(),
        a.type_name(),
        b.type_name()
    ))
}

fn floor_div(a: i64, b: i64) -> Result<i64, InterpError> {
    if b == 0 {
        return Err(InterpError::zero_division("integer division or modulo by zero"));
    }
    let q = a.checked_div(b).ok_or_else(overflow)?;
    if a % b != 0 && ((a < 0) != (b < 0)) {
        Ok(q - 1)
    } else {
        Ok(q)
    }
}

fn modulo(a: i64, b: i64) -> Result<i64, InterpError> {
    if b == 0 {
        return Err(InterpError::zero_division("integer division or modulo by zero"));
    }
    let r = a.checked_rem(b).unwrap_or(0);
    if r != 0 && ((r < 0) != (b < 0)) {
        Ok(r + b)
    } else {
        Ok(r)
    }
}

fn int_binary(op: BinOp, a: i64, b: i64) -> Result<Value, InterpError> {
    let v = match op {
        BinOp::Add => a.checked_add(b).ok_or_else(overflow)?,
        BinOp::Sub => a.checked_sub(b).ok_or_else(overflow)?,
        BinOp::Mul => a.checked_mul(b).ok_or_else(overflow)?,
        BinOp::Div => {
            if b == 0 {
                return Err(InterpError::zero_division("division by zero"));
            }
            return Ok(Value::Float(a as f64 / b as f64));
        }
        BinOp::FloorDiv => floor_div(a, b)?,
        BinOp::Mod => modulo(a, b)?,
        BinOp::Pow => {
            if b < 0 {
                if a == 0 {
                    return Err(InterpError::zero_division(
                        "0.0 cannot be raised to a negative power",
                    ));
                }
                return Ok(Value::Float((a as f64).powf(b as f64)));
            }
            let exp = u32::try_from(b).map_err(|_| overflow())?;
            a.checked_pow(exp).ok_or_else(overflow)?
        }
        BinOp::BitAnd => a & b,
        BinOp::BitOr => a | b,
        BinOp::BitXor => a ^ b,
        BinOp::Shl => {
            if b < 0 {
                return Err(InterpError::value_error("negative shift count"));
            }
            if a == 0 {
                0
            } else if b >= 64 {
                return Err(overflow());
            } else {
                let shifted = (a as i128) << b;
                i64::try_from(shifted).map_err(|_| overflow())?
            }
        }
        BinOp::Shr => {
            if b < 0 {
                return Err(InterpError::value_error("negative shift count"));
            }
            if b >= 64 {
                if a < 0 {
                    -1
                } else {
                    0
                }
            } else {
                a >> b
            }
        }
    };
    Ok(Value::Int(v))
}

fn float_binary(op: BinOp, a: f64, b: f64, lhs: &Value, rhs: &Value) -> Result<Value, InterpError> {
    let v = match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div => {
            if b == 0.0 {
                return Err(InterpError::zero_division("float division by zero"));
            }
            a / b
        }
        BinOp::FloorDiv => {
            if b == 0.0 {
                return Err(InterpError::zero_division("float floor division by zero"));
            }
            (a / b).floor()
        }
        BinOp::Mod => {
            if b == 0.0 {
                return Err(InterpError::zero_division("float modulo"));
            }
            let r = a % b;
            if r != 0.0 && ((r < 0.0) != (b < 0.0)) {
                r + b
            } else {
                r
            }
        }
        BinOp::Pow => {
            if a == 0.0 && b < 0.0 {
                return Err(InterpError::zero_division(
                    "0.0 cannot be raised to a negative power",
                ));
            }
            if a < 0.0 && b.fract() != 0.0 {
                return Err(InterpError::value_error(
                    "negative number cannot be raised to a fractional power",
                ));
            }
            let v = a.powf(b);
            if v.is_infinite() && a.is_finite() && b.is_finite() {
                return Err(InterpError::overflow_error("numerical result out of range"));
            }
            v
        }
        _ => return Err(unsupported(op, lhs, rhs)),
    };
    Ok(Value::Float(v))
}

fn repeat_len(len: usize, n: i64) -> Result<usize, InterpError> {
    let n = usize::try_from(n.max(0)).unwrap_or(0);
    let total = len.checked_mul(n).unwrap_or(usize::MAX);
    if total > MAX_SEQUENCE_LEN {
        return Err(InterpError::memory_error(format!(
            "sequence of {total} items exceeds the sandbox limit"
        )));
    }
    Ok(n)
}

fn repeat_items(items: &[Value], times: usize) -> Vec<Value> {
    items
        .iter()
        .cloned()
        .cycle()
        .take(items.len() * times)
        .collect()
}

fn concat_len(a: usize, b: usize) -> Result<(), InterpError> {
    if a + b > MAX_SEQUENCE_LEN {
        return Err(InterpError::memory_error(
            "sequence exceeds the sandbox size limit",
        ));
    }
    Ok(())
}

pub fn binary(op: BinOp, a: &Value, b: &Value) -> Result<Value, InterpError> {
    if let Some(result) = datetime_binary(op, a, b) {
        return result;
    }
    match (a, b) {
        (Value::Int(_) | Value::Bool(_), Value::Int(_) | Value::Bool(_)) => {
            int_binary(op, a.as_int().unwrap_or(0), b.as_int().unwrap_or(0))
        }
        (x, y) if x.as_f64().is_some() && y.as_f64().is_some() => float_binary(
            op,
            x.as_f64().unwrap_or(0.0),
            y.as_f64().unwrap_or(0.0),
            a,
            b,
        ),
        (Value::Str(x), Value::Str(y)) if op == BinOp::Add => {
            concat_len(x.chars().count(), y.chars().count())?;
            Ok(Value::str(format!("{x}{y}")))
        }
        (Value::Str(s), n) | (n, Value::Str(s))
            if op == BinOp::Mul && matches!(n, Value::Int(_) | Value::Bool(_)) =>
        {
            let times = repeat_len(s.chars().count(), n.as_int().unwrap_or(0))?;
            Ok(Value::str(s.repeat(times)))
        }
        (Value::Str(template), args) if op == BinOp::Mod => {
            percent_format(template, args).map(Value::str)
        }
        (Value::List(x), Value::List(y)) if op == BinOp::Add => {
            let (x, y) = (x.borrow(), y.borrow());
            concat_len(x.len(), y.len())?;
            Ok(Value::list(x.iter().chain(y.iter()).cloned().collect()))
        }
        (Value::Tuple(x), Value::Tuple(y)) if op == BinOp::Add => {
            concat_len(x.len(), y.len())?;
            Ok(Value::tuple(x.iter().chain(y.iter()).cloned().collect()))
        }
        (Value::List(l), n) | (n, Value::List(l))
            if op == BinOp::Mul && matches!(n, Value::Int(_) | Value::Bool(_)) =>
        {
            let items = l.borrow();
            let times = repeat_len(items.len(), n.as_int().unwrap_or(0))?;
            Ok(Value::list(repeat_items(&items, times)))
        }
        (Value::Tuple(t), n) | (n, Value::Tuple(t))
            if op == BinOp::Mul && matches!(n, Value::Int(_) | Value::Bool(_)) =>
        {
            let times = repeat_len(t.len(), n.as_int().unwrap_or(0))?;
            Ok(Value::tuple(repeat_items(&t, times)))
        }
        _ => Err(unsupported(op, a, b)),
    }
}

pub fn unary(op: UnaryOp, v: &Value) -> Result<Value, InterpError> {
    match (op, v) {
        (UnaryOp::Not, v) => Ok(Value::Bool(!v.truthy())),
        (UnaryOp::Neg, Value::Int(_) | Value::Bool(_)) => v
            .as_int()
            .unwrap_or(0)
            .checked_neg()
            .map(Value::Int)
            .ok_or_else(overflow),
        (UnaryOp::Neg, Value::Float(f)) => Ok(Value::Float(-f)),
        (UnaryOp::Neg, Value::Delta(d)) => Ok(Value::Delta(-*d)),
        (UnaryOp::Pos, Value::Int(_) | Value::Bool(_)) => Ok(Value::Int(v.as_int().unwrap_or(0))),
        (UnaryOp::Pos, Value::Float(_) | Value::Delta(_)) => Ok(v.clone()),
        (UnaryOp::Invert, Value::Int(_) | Value::Bool(_)) => {
            Ok(Value::Int(!v.as_int().unwrap_or(0)))
        }
        _ => {
            let symbol = match op {
                UnaryOp::Neg => "-",
                UnaryOp::Pos => "+",
                _ => "~",
            };
            Err(InterpError::type_error(format!(
                "bad operand type for unary {symbol}: '{}'",
                v.type_name()
            )))
        }
    }
}

/// `item in container`
pub fn contains(container: &Value, item: &Value) -> Result<bool, InterpError> {
    match container {
        Value::Str(s) => match item {
            Value::Str(sub) => Ok(s.contains(&**sub)),
            other => Err(InterpError::type_error(format!(
                "'in <string>' requires string as left operand, not {}",
                other.type_name()
            ))),
        },
        Value::List(items) => Ok(position_of(&items.borrow(), item)?.is_some()),
        Value::Tuple(items) => Ok(position_of(items, item)?.is_some()),
        Value::Dict(d) => {
            item.ensure_hashable()?;
            Ok(d.borrow().contains(item))
        }
        Value::Range(start, stop, step) => {
            let Some(n) = item.as_int().or_else(|| match item {
                Value::Float(f) if f.fract() == 0.0 => Some(*f as i64),
                _ => None,
            }) else {
                return Ok(false);
            };
            let in_bounds = if *step > 0 {
                *start <= n && n < *stop
            } else {
                *stop < n && n <= *start
            };
            Ok(in_bounds && (n as i128 - *start as i128) % (*step as i128) == 0)
        }
        other => Err(InterpError::type_error(format!(
            "argument of type '{}' is not iterable",
            other.type_name()
        ))),
    }
}

pub fn compare(op: CmpOp, a: &Value, b: &Value) -> Result<bool, InterpError> {
    use std::cmp::Ordering::{Equal, Greater, Less};
    let ordered = |a: &Value, b: &Value| -> Result<std::cmp::Ordering, InterpError> {
        // NaN 与任何值比较都为 False
        if a.as_f64().is_some_and(f64::is_nan) || b.as_f64().is_some_and(f64::is_nan) {
            return Err(InterpError::value_error("nan"));
        }
        a.compare(b, op.symbol())
    };
    let relational = |accept: &[std::cmp::Ordering]| match ordered(a, b) {
        Ok(ord) => Ok(accept.contains(&ord)),
        Err(InterpError::Runtime { kind: "ValueError", .. }) => Ok(false),
        Err(e) => Err(e),
    };
    match op {
        CmpOp::Eq => a.py_eq(b),
        CmpOp::Ne => a.py_eq(b).map(|eq| !eq),
        CmpOp::Lt => relational(&[Less]),
        CmpOp::Le => relational(&[Less, Equal]),
        CmpOp::Gt => relational(&[Greater]),
        CmpOp::Ge => relational(&[Greater, Equal]),
        CmpOp::In => contains(b, a),
        CmpOp::NotIn => contains(b, a).map(|found| !found),
        CmpOp::Is => Ok(a.py_is(b)),
        CmpOp::IsNot => Ok(!a.py_is(b)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_python_division_semantics() {
        assert!(matches!(binary(BinOp::FloorDiv, &Value::Int(7), &Value::Int(-2)), Ok(Value::Int(-4))));
        assert!(matches!(binary(BinOp::Mod, &Value::Int(-7), &Value::Int(3)), Ok(Value::Int(2))));
        assert!(matches!(binary(BinOp::Div, &Value::Int(1), &Value::Int(4)), Ok(Value::Float(f)) if f == 0.25));
        assert!(matches!(
            binary(BinOp::Mod, &Value::Float(-1.5), &Value::Int(1)),
            Ok(Value::Float(f)) if f == 0.5
        ));
    }

    #[test]
    fn test_overflow_is_an_error() {
        let err = binary(BinOp::Mul, &Value::Int(i64::MAX), &Value::Int(2)).unwrap_err();
        assert!(matches!(err, InterpError::Runtime { kind: "OverflowError", .. }));
        assert!(binary(BinOp::Pow, &Value::Int(10), &Value::Int(30)).is_err());
        assert!(matches!(binary(BinOp::Pow, &Value::Int(2), &Value::Int(-1)), Ok(Value::Float(f)) if f == 0.5));
    }

    #[test]
    fn test_sequence_ops() {
        let s = binary(BinOp::Mul, &Value::str("ab"), &Value::Int(3)).unwrap();
        assert_eq!(s.to_str(), "ababab");
        let l = binary(BinOp::Add, &Value::list(vec![Value::Int(1)]), &Value::list(vec![Value::Int(2)])).unwrap();
        assert_eq!(l.repr(), "[1, 2]");
        let big = binary(BinOp::Mul, &Value::str("x"), &Value::Int(10_000_000)).unwrap_err();
        assert!(matches!(big, InterpError::Runtime { kind: "MemoryError", .. }));
        assert!(binary(BinOp::Add, &Value::str("a"), &Value::Int(1)).is_err());
    }

    #[test]
    fn test_repeat_lists_and_tuples() {
        let nested = Value::list(vec![Value::list(vec![Value::Int(1)])]);
        let l = binary(BinOp::Mul, &nested, &Value::Int(3)).unwrap();
        assert_eq!(l.repr(), "[[1], [1], [1]]");
        let t = Value::tuple(vec![Value::Int(1), Value::str("a")]);
        let t2 = binary(BinOp::Mul, &Value::Int(2), &t).unwrap();
        assert_eq!(t2.repr(), "(1, 'a', 1, 'a')");
        let empty = binary(BinOp::Mul, &nested, &Value::Int(-1)).unwrap();
        assert_eq!(empty.repr(), "[]");
    }

    #[test]
    fn test_membership_and_comparisons() {
        assert!(compare(CmpOp::In, &Value::str("ell"), &Value::str("hello")).unwrap());
        assert!(compare(CmpOp::In, &Value::Int(4), &Value::Range(0, 10, 2)).unwrap());
        assert!(!compare(CmpOp::In, &Value::Int(5), &Value::Range(0, 10, 2)).unwrap());
        assert!(compare(CmpOp::Lt, &Value::Int(1), &Value::Float(1.5)).unwrap());
        assert!(!compare(CmpOp::Lt, &Value::Float(f64::NAN), &Value::Int(1)).unwrap());
        assert!(compare(CmpOp::Is, &Value::None, &Value::None).unwrap());
        assert!(compare(CmpOp::Lt, &Value::Int(1), &Value::str("a")).is_err());
    }
}
