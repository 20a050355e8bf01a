//! 格式化：format spec 迷你语言、`%` 格式化、str.format

use super::value::{float_repr, Value};
use super::InterpError;

#[derive(Debug, Clone, PartialEq)]
struct Spec {
    fill: char,
    align: Option<char>,
    sign: char,
    alternate: bool,
    width: usize,
    grouping: Option<char>,
    precision: Option<usize>,
    ty: Option<char>,
}

fn invalid(spec: &str) -> InterpError {
    InterpError::value_error(format!("Invalid format specifier '{spec}'"))
}

fn parse_spec(spec: &str) -> Result<Spec, InterpError> {
    let chars: Vec<char> = spec.chars().collect();
    let mut out = Spec {
        fill: ' ',
        align: None,
        sign: '-',
        alternate: false,
        width: 0,
        grouping: None,
        precision: None,
        ty: None,
    };
    let mut i = 0;
    let is_align = |c: char| matches!(c, '<' | '>' | '^' | '=');

    if chars.len() >= 2 && is_align(chars[1]) {
        out.fill = chars[0];
        out.align = Some(chars[1]);
        i = 2;
    } else if chars.first().copied().is_some_and(is_align) {
        out.align = Some(chars[0]);
        i = 1;
    }
    if let Some(&c @ ('+' | '-' | ' ')) = chars.get(i) {
        out.sign = c;
        i += 1;
    }
    if chars.get(i) == Some(&'#') {
        out.alternate = true;
        i += 1;
    }
    if chars.get(i) == Some(&'0') {
        if out.align.is_none() {
            out.fill = '0';
            out.align = Some('=');
        }
        i += 1;
    }
    let start = i;
    while chars.get(i).is_some_and(|c| c.is_ascii_digit()) {
        i += 1;
    }
    if i > start {
        out.width = chars[start..i]
            .iter()
            .collect::<String>()
            .parse()
            .map_err(|_| invalid(spec))?;
    }
    if let Some(&c @ (',' | '_')) = chars.get(i) {
        out.grouping = Some(c);
        i += 1;
    }
    if chars.get(i) == Some(&'.') {
        i += 1;
        let start = i;
        while chars.get(i).is_some_and(|c| c.is_ascii_digit()) {
            i += 1;
        }
        if i == start {
            return Err(invalid(spec));
        }
        out.precision = Some(
            chars[start..i]
                .iter()
                .collect::<String>()
                .parse()
                .map_err(|_| invalid(spec))?,
        );
    }
    if i < chars.len() {
        if i + 1 != chars.len() || !"bcdeEfFgGnosxX%".contains(chars[i]) {
            return Err(invalid(spec));
        }
        out.ty = Some(chars[i]);
    }
    // 防止 "{:999999999}" 一次分配过大
    if out.width > 10_000 || out.precision.is_some_and(|p| p > 1_000) {
        return Err(invalid(spec));
    }
    Ok(out)
}

/// format(value, spec) / f"{value:spec}"
pub fn format_value(value: &Value, spec: &str) -> Result<String, InterpError> {
    match value {
        Value::DateTime(dt) if !spec.is_empty() => return strftime_naive(dt, spec),
        Value::Date(d) if !spec.is_empty() => {
            return strftime_naive(&d.and_hms_opt(0, 0, 0).unwrap_or_default(), spec)
        }
        _ => {}
    }
    if spec.is_empty() {
        return Ok(value.to_str());
    }
    let spec_parsed = parse_spec(spec)?;
    match value {
        Value::Str(s) => format_str(s, &spec_parsed, spec),
        Value::Int(_) | Value::Bool(_) => {
            let i = value.as_int().unwrap_or(0);
            format_int(i, &spec_parsed, spec)
        }
        Value::Float(f) => format_float(*f, &spec_parsed, spec),
        Value::None | Value::List(_) | Value::Tuple(_) | Value::Dict(_) | Value::Delta(_)
            if spec_parsed.ty.is_none() && spec_parsed.precision.is_none() =>
        {
            pad(&value.to_str(), &spec_parsed, '<')
        }
        _ => Err(InterpError::type_error(format!(
            "unsupported format string passed to {}",
            value.type_name()
        ))),
    }
}

fn format_str(s: &str, spec: &Spec, raw: &str) -> Result<String, InterpError> {
    if !matches!(spec.ty, None | Some('s')) || spec.sign != '-' || spec.align == Some('=') {
        return Err(invalid(raw));
    }
    let text: String = match spec.precision {
        Some(p) => s.chars().take(p).collect(),
        None => s.to_string(),
    };
    pad(&text, spec, '<')
}

fn format_int(i: i64, spec: &Spec, raw: &str) -> Result<String, InterpError> {
    let ty = spec.ty.unwrap_or('d');
    if matches!(ty, 'e' | 'E' | 'f' | 'F' | 'g' | 'G' | '%') {
        return format_float(i as f64, spec, raw);
    }
    if spec.precision.is_some() {
        return Err(InterpError::value_error(
            "Precision not allowed in integer format specifier",
        ));
    }
    if ty == 'c' {
        let c = u32::try_from(i)
            .ok()
            .and_then(char::from_u32)
            .ok_or_else(|| InterpError::overflow_error("%c arg not in range(0x110000)"))?;
        return pad(&c.to_string(), spec, '<');
    }
    let magnitude = i.unsigned_abs();
    let (digits, prefix) = match ty {
        'd' | 'n' => (magnitude.to_string(), ""),
        'x' => (format!("{magnitude:x}"), "0x"),
        'X' => (format!("{magnitude:X}"), "0X"),
        'o' => (format!("{magnitude:o}"), "0o"),
        'b' => (format!("{magnitude:b}"), "0b"),
        _ => return Err(invalid(raw)),
    };
    let digits = match spec.grouping {
        Some(sep) => group(&digits, sep, if ty == 'd' || ty == 'n' { 3 } else { 4 }),
        None => digits,
    };
    let prefix = if spec.alternate { prefix } else { "" };
    Ok(assemble(i < 0, prefix, &digits, spec))
}

fn format_float(f: f64, spec: &Spec, raw: &str) -> Result<String, InterpError> {
    let negative = f.is_sign_negative() && !f.is_nan();
    let magnitude = f.abs();
    let body = if !magnitude.is_finite() {
        let s = if magnitude.is_nan() { "nan" } else { "inf" };
        if matches!(spec.ty, Some('E' | 'F' | 'G')) {
            s.to_uppercase()
        } else {
            s.to_string()
        }
    } else {
        match spec.ty {
            Some('f' | 'F') => format!("{:.*}", spec.precision.unwrap_or(6), magnitude),
            Some('e' | 'E') => {
                let s = exp_notation(magnitude, spec.precision.unwrap_or(6));
                if spec.ty == Some('E') {
                    s.to_uppercase()
                } else {
                    s
                }
            }
            Some('%') => format!("{:.*}%", spec.precision.unwrap_or(6), magnitude * 100.0),
            Some('g' | 'G' | 'n') => {
                let s = general(magnitude, spec.precision.unwrap_or(6), spec.alternate);
                if spec.ty == Some('G') {
                    s.to_uppercase()
                } else {
                    s
                }
            }
            None => match spec.precision {
                Some(p) => general(magnitude, p, spec.alternate),
                None => float_repr(magnitude),
            },
            Some(_) => return Err(invalid(raw)),
        }
    };
    let body = match spec.grouping {
        Some(sep) if magnitude.is_finite() => {
            let split = body.find(|c: char| !c.is_ascii_digit()).unwrap_or(body.len());
            format!("{}{}", group(&body[..split], sep, 3), &body[split..])
        }
        _ => body,
    };
    Ok(assemble(negative, "", &body, spec))
}

/// Python 风格科学计数法：指数至少两位并带符号
fn exp_notation(f: f64, precision: usize) -> String {
    let s = format!("{f:.precision$e}");
    let (mantissa, exp) = s.split_once('e').unwrap_or((s.as_str(), "0"));
    let exp: i32 = exp.parse().unwrap_or(0);
    let sign = if exp < 0 { '-' } else { '+' };
    format!("{mantissa}e{sign}{:02}", exp.abs())
}

/// 'g' 格式：按有效数字在定点与科学计数之间选择，去掉尾随零
fn general(f: f64, precision: usize, keep_zeros: bool) -> String {
    let p = precision.max(1);
    if f == 0.0 {
        return if keep_zeros {
            format!("{:.*}", p - 1, 0.0)
        } else {
            "0".to_string()
        };
    }
    let sci = format!("{:.*e}", p - 1, f);
    let exp: i32 = sci
        .split_once('e')
        .and_then(|(_, e)| e.parse().ok())
        .unwrap_or(0);
    let strip = |s: String| {
        if keep_zeros || !s.contains('.') {
            s
        } else {
            s.trim_end_matches('0').trim_end_matches('.').to_string()
        }
    };
    if exp >= -4 && exp < p as i32 {
        let decimals = (p as i32 - 1 - exp).max(0) as usize;
        strip(format!("{f:.decimals$}"))
    } else {
        let s = exp_notation(f, p - 1);
        let (mantissa, exponent) = s.split_once('e').unwrap_or((s.as_str(), ""));
        format!("{}e{exponent}", strip(mantissa.to_string()))
    }
}

fn group(digits: &str, sep: char, every: usize) -> String {
    let chars: Vec<char> = digits.chars().collect();
    let mut out = String::with_capacity(chars.len() + chars.len() / every);
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && (chars.len() - i) % every == 0 {
            out.push(sep);
        }
        out.push(*c);
    }
    out
}

fn assemble(negative: bool, prefix: &str, body: &str, spec: &Spec) -> String {
    let sign = match (negative, spec.sign) {
        (true, _) => "-",
        (false, '+') => "+",
        (false, ' ') => " ",
        _ => "",
    };
    let len = sign.chars().count() + prefix.len() + body.chars().count();
    if len >= spec.width {
        return format!("{sign}{prefix}{body}");
    }
    let padding = spec.width - len;
    let fill = |n: usize| spec.fill.to_string().repeat(n);
    match spec.align.unwrap_or('>') {
        '<' => format!("{sign}{prefix}{body}{}", fill(padding)),
        '^' => format!(
            "{}{sign}{prefix}{body}{}",
            fill(padding / 2),
            fill(padding - padding / 2)
        ),
        '=' => format!("{sign}{prefix}{}{body}", fill(padding)),
        _ => format!("{}{sign}{prefix}{body}", fill(padding)),
    }
}

fn pad(text: &str, spec: &Spec, default_align: char) -> Result<String, InterpError> {
    let len = text.chars().count();
    if len >= spec.width {
        return Ok(text.to_string());
    }
    let padding = spec.width - len;
    let fill = |n: usize| spec.fill.to_string().repeat(n);
    Ok(match spec.align.unwrap_or(default_align) {
        '>' | '=' => format!("{}{text}", fill(padding)),
        '^' => format!("{}{text}{}", fill(padding / 2), fill(padding - padding / 2)),
        _ => format!("{text}{}", fill(padding)),
    })
}

pub fn strftime_naive(dt: &chrono::NaiveDateTime, fmt: &str) -> Result<String, InterpError> {
    use std::fmt::Write;
    let mut out = String::new();
    write!(out, "{}", dt.format(fmt))
        .map_err(|_| InterpError::value_error(format!("invalid format string '{fmt}'")))?;
    Ok(out)
}

/// "..." % args
pub fn percent_format(template: &str, args: &Value) -> Result<String, InterpError> {
    let items: Vec<Value> = match args {
        Value::Tuple(items) => items.to_vec(),
        other => vec![other.clone()],
    };
    let mut next = items.into_iter();
    let chars: Vec<char> = template.chars().collect();
    let mut out = String::new();
    let mut i = 0;

    while i < chars.len() {
        if chars[i] != '%' {
            out.push(chars[i]);
            i += 1;
            continue;
        }
        i += 1;
        let mut left = false;
        let mut zero = false;
        let mut sign = String::new();
        while let Some(&c) = chars.get(i) {
            match c {
                '-' => left = true,
                '0' => zero = true,
                '+' | ' ' => sign = c.to_string(),
                '#' => {}
                _ => break,
            }
            i += 1;
        }
        let mut width = String::new();
        while chars.get(i).is_some_and(|c| c.is_ascii_digit()) {
            width.push(chars[i]);
            i += 1;
        }
        let mut precision = String::new();
        if chars.get(i) == Some(&'.') {
            precision.push('.');
            i += 1;
            while chars.get(i).is_some_and(|c| c.is_ascii_digit()) {
                precision.push(chars[i]);
                i += 1;
            }
        }
        let conv = *chars
            .get(i)
            .ok_or_else(|| InterpError::value_error("incomplete format"))?;
        i += 1;
        if conv == '%' {
            out.push('%');
            continue;
        }

        let arg = next
            .next()
            .ok_or_else(|| InterpError::type_error("not enough arguments for format string"))?;
        let align = if left {
            "<"
        } else if zero && conv != 's' && conv != 'r' {
            "0"
        } else {
            ">"
        };
        let (align, zero_flag) = if align == "0" { ("", "0") } else { (align, "") };
        let piece = match conv {
            's' | 'r' => {
                let text = if conv == 'r' { arg.repr() } else { arg.to_str() };
                format_value(&Value::str(text), &format!("{align}{width}{precision}"))?
            }
            'd' | 'i' | 'u' => {
                let n = match arg {
                    Value::Float(f) => Value::Int(f.trunc() as i64),
                    other => other,
                };
                if !matches!(n, Value::Int(_) | Value::Bool(_)) {
                    return Err(InterpError::type_error(format!(
                        "%{conv} format: a real number is required, not {}",
                        n.type_name()
                    )));
                }
                format_value(&n, &format!("{align}{sign}{zero_flag}{width}d"))?
            }
            'f' | 'F' | 'e' | 'E' | 'g' | 'G' | 'x' | 'X' | 'o' | 'c' => {
                let spec = format!("{align}{sign}{zero_flag}{width}{precision}{conv}");
                let arg = match (conv, &arg) {
                    ('f' | 'F' | 'e' | 'E' | 'g' | 'G', Value::Int(i)) => Value::Float(*i as f64),
                    _ => arg,
                };
                format_value(&arg, &spec)?
            }
            other => {
                return Err(InterpError::value_error(format!(
                    "unsupported format character '{other}'"
                )))
            }
        };
        out.push_str(&piece);
    }

    if next.next().is_some() {
        return Err(InterpError::type_error(
            "not all arguments converted during string formatting",
        ));
    }
    Ok(out)
}

/// str.format(*args, **kwargs)
pub fn str_format(
    template: &str,
    args: &[Value],
    kwargs: &[(String, Value)],
) -> Result<String, InterpError> {
    let chars: Vec<char> = template.chars().collect();
    let mut out = String::new();
    let mut auto = 0usize;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c == '{' && chars.get(i + 1) == Some(&'{') {
            out.push('{');
            i += 2;
            continue;
        }
        if c == '}' {
            if chars.get(i + 1) == Some(&'}') {
                out.push('}');
                i += 2;
                continue;
            }
            return Err(InterpError::value_error(
                "Single '}' encountered in format string",
            ));
        }
        if c != '{' {
            out.push(c);
            i += 1;
            continue;
        }

        i += 1;
        let start = i;
        while i < chars.len() && !matches!(chars[i], '}' | '!' | ':') {
            i += 1;
        }
        let field: String = chars[start..i].iter().collect();
        let mut conversion = None;
        if chars.get(i) == Some(&'!') {
            conversion = chars.get(i + 1).copied();
            i += 2;
        }
        let mut spec = String::new();
        if chars.get(i) == Some(&':') {
            i += 1;
            while i < chars.len() && chars[i] != '}' {
                spec.push(chars[i]);
                i += 1;
            }
        }
        if chars.get(i) != Some(&'}') {
            return Err(InterpError::value_error(
                "expected '}' before end of string",
            ));
        }
        i += 1;

        let value = if field.is_empty() {
            let v = args.get(auto).cloned();
            auto += 1;
            v.ok_or_else(|| {
                InterpError::index_error("Replacement index out of range for positional args")
            })?
        } else if let Ok(index) = field.parse::<usize>() {
            args.get(index).cloned().ok_or_else(|| {
                InterpError::index_error(format!(
                    "Replacement index {index} out of range for positional args"
                ))
            })?
        } else {
            kwargs
                .iter()
                .find(|(k, _)| *k == field)
                .map(|(_, v)| v.clone())
                .ok_or_else(|| InterpError::key_error(format!("'{field}'")))?
        };
        let value = match conversion {
            Some('r' | 'a') => Value::str(value.repr()),
            Some('s') => Value::str(value.to_str()),
            None => value,
            Some(other) => {
                return Err(InterpError::value_error(format!(
                    "Unknown conversion specifier {other}"
                )))
            }
        };
        out.push_str(&format_value(&value, &spec)?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fmt(v: Value, spec: &str) -> String {
        format_value(&v, spec).unwrap()
    }

    #[test]
    fn test_float_specs() {
        assert_eq!(fmt(Value::Float(3.14159), ".2f"), "3.14");
        assert_eq!(fmt(Value::Float(1234567.891), ",.2f"), "1,234,567.89");
        assert_eq!(fmt(Value::Float(0.256), ".1%"), "25.6%");
        assert_eq!(fmt(Value::Float(12345.678), ".3e"), "1.235e+04");
        assert_eq!(fmt(Value::Float(-2.5), "+08.2f"), "-0002.50");
        assert_eq!(fmt(Value::Float(0.0001234), "g"), "0.0001234");
        assert_eq!(fmt(Value::Float(123456789.0), "g"), "1.23457e+08");
    }

    #[test]
    fn test_int_specs() {
        assert_eq!(fmt(Value::Int(42), "05d"), "00042");
        assert_eq!(fmt(Value::Int(255), "#x"), "0xff");
        assert_eq!(fmt(Value::Int(1_000_000), ","), "1,000,000");
        assert_eq!(fmt(Value::Int(7), "^5"), "  7  ");
        assert_eq!(fmt(Value::Int(3), ".2f"), "3.00");
        assert!(format_value(&Value::Int(3), ".2").is_err());
    }

    #[test]
    fn test_str_specs() {
        assert_eq!(fmt(Value::str("ab"), ">4"), "  ab");
        assert_eq!(fmt(Value::str("ab"), "*^6"), "**ab**");
        assert_eq!(fmt(Value::str("abcdef"), ".3"), "abc");
        assert!(format_value(&Value::str("x"), "d").is_err());
    }

    #[test]
    fn test_percent_format() {
        let args = Value::tuple(vec![Value::str("pi"), Value::Float(3.14159), Value::Int(7)]);
        assert_eq!(
            percent_format("%s=%.2f (%03d) 100%%", &args).unwrap(),
            "pi=3.14 (007) 100%"
        );
        assert!(percent_format("%s %s", &Value::Int(1)).is_err());
    }

    #[test]
    fn test_str_format() {
        let out = str_format(
            "{} + {:.1f} = {total}",
            &[Value::Int(1), Value::Float(2.0)],
            &[("total".to_string(), Value::Float(3.0))],
        )
        .unwrap();
        assert_eq!(out, "1 + 2.0 = 3.0");
    }
}
