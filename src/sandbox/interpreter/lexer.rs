//! 词法分析：源码 → Token 序列（含 INDENT / DEDENT / NEWLINE）
//!
//! 括号内的换行不产生 NEWLINE；空行与纯注释行不参与缩进计算。

use super::InterpError;

#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    Name(String),
    Int(i64),
    Float(f64),
    Str(String),
    /// f-string 的原始内容（转义已处理，花括号保留）
    FStr(String),
    Op(&'static str),
    Newline,
    Indent,
    Dedent,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub tok: Tok,
    pub line: usize,
}

/// 按长度降序，保证最长匹配
const OPS: &[&str] = &[
    "**=", "//=", ">>=", "<<=", "...", "**", "//", "==", "!=", "<=", ">=", "+=", "-=", "*=", "/=",
    "%=", "&=", "|=", "^=", "->", "<<", ">>", "+", "-", "*", "/", "%", "<", ">", "=", "(", ")",
    "[", "]", "{", "}", ",", ":", ".", ";", "&", "|", "^", "~", "@",
];

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    depth: usize,
    indents: Vec<usize>,
    tokens: Vec<Token>,
}

pub fn tokenize(src: &str) -> Result<Vec<Token>, InterpError> {
    let mut lexer = Lexer {
        chars: src.chars().collect(),
        pos: 0,
        line: 1,
        depth: 0,
        indents: vec![0],
        tokens: Vec::new(),
    };
    lexer.run()?;
    Ok(lexer.tokens)
}

impl Lexer {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn push(&mut self, tok: Tok) {
        self.tokens.push(Token {
            tok,
            line: self.line,
        });
    }

    fn error(&self, message: impl Into<String>) -> InterpError {
        InterpError::Syntax {
            line: self.line,
            message: message.into(),
        }
    }

    fn last_is_newline(&self) -> bool {
        matches!(
            self.tokens.last().map(|t| &t.tok),
            None | Some(Tok::Newline) | Some(Tok::Indent) | Some(Tok::Dedent)
        )
    }

    fn run(&mut self) -> Result<(), InterpError> {
        let mut at_line_start = true;
        loop {
            if at_line_start && self.depth == 0 {
                if !self.indentation()? {
                    break;
                }
                at_line_start = false;
            }

            let Some(c) = self.peek() else { break };
            match c {
                ' ' | '\t' | '\r' | '\x0c' => self.pos += 1,
                '\\' if self.peek_at(1) == Some('\n') => {
                    self.pos += 2;
                    self.line += 1;
                }
                '#' => {
                    while self.peek().is_some_and(|c| c != '\n') {
                        self.pos += 1;
                    }
                }
                '\n' => {
                    self.pos += 1;
                    if self.depth == 0 {
                        if !self.last_is_newline() {
                            self.push(Tok::Newline);
                        }
                        at_line_start = true;
                    }
                    self.line += 1;
                }
                '0'..='9' => self.number()?,
                '.' if self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) => self.number()?,
                '"' | '\'' => self.string(false, false)?,
                c if c == '_' || c.is_alphabetic() => self.name_or_prefixed_string()?,
                _ => self.op()?,
            }
        }

        if !self.last_is_newline() {
            self.push(Tok::Newline);
        }
        while self.indents.len() > 1 {
            self.indents.pop();
            self.push(Tok::Dedent);
        }
        self.push(Tok::Eof);
        Ok(())
    }

    /// 处理行首缩进；到达文件末尾返回 false
    fn indentation(&mut self) -> Result<bool, InterpError> {
        loop {
            let mut col = 0usize;
            while let Some(c) = self.peek() {
                match c {
                    ' ' => col += 1,
                    '\t' => col = (col / 8 + 1) * 8,
                    '\x0c' | '\r' => {}
                    _ => break,
                }
                self.pos += 1;
            }
            match self.peek() {
                None => return Ok(false),
                Some('\n') => {
                    self.pos += 1;
                    self.line += 1;
                    continue;
                }
                Some('#') => {
                    while self.peek().is_some_and(|c| c != '\n') {
                        self.pos += 1;
                    }
                    continue;
                }
                Some(_) => {}
            }

            let current = self.indents.last().copied().unwrap_or(0);
            if col > current {
                self.indents.push(col);
                self.push(Tok::Indent);
            } else if col < current {
                while self.indents.last().is_some_and(|&i| i > col) {
                    self.indents.pop();
                    self.push(Tok::Dedent);
                }
                if self.indents.last().copied() != Some(col) {
                    return Err(self.error("unindent does not match any outer indentation level"));
                }
            }
            return Ok(true);
        }
    }

    fn number(&mut self) -> Result<(), InterpError> {
        let start = self.pos;
        if self.peek() == Some('0') {
            let radix = match self.peek_at(1) {
                Some('x' | 'X') => 16,
                Some('o' | 'O') => 8,
                Some('b' | 'B') => 2,
                _ => 10,
            };
            if radix != 10 {
                self.pos += 2;
                let digits_start = self.pos;
                while self.peek().is_some_and(|c| c.is_ascii_alphanumeric() || c == '_') {
                    self.pos += 1;
                }
                let digits: String = self.chars[digits_start..self.pos]
                    .iter()
                    .filter(|c| **c != '_')
                    .collect();
                let value = i64::from_str_radix(&digits, radix)
                    .map_err(|_| self.error(format!("invalid integer literal '0{digits}'")))?;
                self.push(Tok::Int(value));
                return Ok(());
            }
        }

        let mut is_float = false;
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() || c == '_' {
                self.pos += 1;
            } else if c == '.' && !is_float {
                is_float = true;
                self.pos += 1;
            } else if c == 'e' || c == 'E' {
                let sign = matches!(self.peek_at(1), Some('+' | '-'));
                let digit_at = if sign { 2 } else { 1 };
                if self.peek_at(digit_at).is_some_and(|c| c.is_ascii_digit()) {
                    is_float = true;
                    self.pos += digit_at;
                    while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                        self.pos += 1;
                    }
                }
                break;
            } else {
                break;
            }
        }
        if self.peek().is_some_and(|c| c == 'j' || c == 'J') {
            return Err(self.error("complex numbers are not supported"));
        }

        let text: String = self.chars[start..self.pos]
            .iter()
            .filter(|c| **c != '_')
            .collect();
        if is_float {
            let value = text
                .parse::<f64>()
                .map_err(|_| self.error(format!("invalid float literal '{text}'")))?;
            self.push(Tok::Float(value));
        } else {
            let value = text
                .parse::<i64>()
                .map_err(|_| self.error(format!("integer literal too large: {text}")))?;
            self.push(Tok::Int(value));
        }
        Ok(())
    }

    fn name_or_prefixed_string(&mut self) -> Result<(), InterpError> {
        let start = self.pos;
        while self.peek().is_some_and(|c| c == '_' || c.is_alphanumeric()) {
            self.pos += 1;
        }
        let name: String = self.chars[start..self.pos].iter().collect();

        if matches!(self.peek(), Some('"' | '\'')) {
            let lower = name.to_ascii_lowercase();
            let (raw, fmt) = match lower.as_str() {
                "r" => (true, false),
                "f" => (false, true),
                "rf" | "fr" => (true, true),
                "u" => (false, false),
                "b" | "br" | "rb" => return Err(self.error("bytes literals are not supported")),
                _ => {
                    self.push(Tok::Name(name));
                    return Ok(());
                }
            };
            return self.string(raw, fmt);
        }

        self.push(Tok::Name(name));
        Ok(())
    }

    fn string(&mut self, raw: bool, fmt: bool) -> Result<(), InterpError> {
        let quote = self.peek().ok_or_else(|| self.error("unexpected end of input"))?;
        let triple = self.peek_at(1) == Some(quote) && self.peek_at(2) == Some(quote);
        self.pos += if triple { 3 } else { 1 };
        let start_line = self.line;

        let mut out = String::new();
        loop {
            let Some(c) = self.peek() else {
                return Err(InterpError::Syntax {
                    line: start_line,
                    message: "unterminated string literal".into(),
                });
            };
            if c == quote {
                if !triple {
                    self.pos += 1;
                    break;
                }
                if self.peek_at(1) == Some(quote) && self.peek_at(2) == Some(quote) {
                    self.pos += 3;
                    break;
                }
            }
            if c == '\n' {
                if !triple {
                    return Err(InterpError::Syntax {
                        line: start_line,
                        message: "unterminated string literal".into(),
                    });
                }
                self.line += 1;
            }
            if c == '\\' {
                let next = self.peek_at(1);
                if raw {
                    out.push('\\');
                    if let Some(n) = next {
                        out.push(n);
                        if n == '\n' {
                            self.line += 1;
                        }
                        self.pos += 2;
                    } else {
                        self.pos += 1;
                    }
                    continue;
                }
                self.pos += 2;
                match next {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some('r') => out.push('\r'),
                    Some('0') => out.push('\0'),
                    Some('a') => out.push('\x07'),
                    Some('b') => out.push('\x08'),
                    Some('f') => out.push('\x0c'),
                    Some('v') => out.push('\x0b'),
                    Some('\\') => out.push('\\'),
                    Some('\'') => out.push('\''),
                    Some('"') => out.push('"'),
                    Some('\n') => self.line += 1,
                    Some('x') => out.push(self.hex_escape(2)?),
                    Some('u') => out.push(self.hex_escape(4)?),
                    Some('U') => out.push(self.hex_escape(8)?),
                    Some(other) => {
                        out.push('\\');
                        out.push(other);
                    }
                    None => return Err(self.error("unterminated string literal")),
                }
                continue;
            }
            out.push(c);
            self.pos += 1;
        }

        self.push(if fmt { Tok::FStr(out) } else { Tok::Str(out) });
        Ok(())
    }

    fn hex_escape(&mut self, len: usize) -> Result<char, InterpError> {
        let digits: String = self.chars.iter().skip(self.pos).take(len).collect();
        if digits.len() != len {
            return Err(self.error("truncated escape sequence"));
        }
        self.pos += len;
        u32::from_str_radix(&digits, 16)
            .ok()
            .and_then(char::from_u32)
            .ok_or_else(|| self.error(format!("invalid escape sequence '{digits}'")))
    }

    fn op(&mut self) -> Result<(), InterpError> {
        for op in OPS {
            let len = op.chars().count();
            let matches = op
                .chars()
                .enumerate()
                .all(|(i, c)| self.peek_at(i) == Some(c));
            if matches {
                self.pos += len;
                match *op {
                    "(" | "[" | "{" => self.depth += 1,
                    ")" | "]" | "}" => self.depth = self.depth.saturating_sub(1),
                    _ => {}
                }
                self.push(Tok::Op(op));
                return Ok(());
            }
        }
        let c = self.peek().unwrap_or(' ');
        Err(self.error(format!("invalid character '{c}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(src: &str) -> Vec<Tok> {
        tokenize(src).unwrap().into_iter().map(|t| t.tok).collect()
    }

    #[test]
    fn test_indent_dedent() {
        let t = toks("if x:\n    y = 1\n\n    # note\nz\n");
        assert_eq!(
            t,
            vec![
                Tok::Name("if".into()),
                Tok::Name("x".into()),
                Tok::Op(":"),
                Tok::Newline,
                Tok::Indent,
                Tok::Name("y".into()),
                Tok::Op("="),
                Tok::Int(1),
                Tok::Newline,
                Tok::Dedent,
                Tok::Name("z".into()),
                Tok::Newline,
                Tok::Eof,
            ]
        );
    }

    #[test]
    fn test_newlines_inside_brackets_ignored() {
        let t = toks("x = [1,\n  2]\n");
        assert!(!t[..t.len() - 2].contains(&Tok::Newline));
    }

    #[test]
    fn test_numbers_and_strings() {
        assert_eq!(
            toks("0x1f 1_000 2.5 1e3 'a\\tb' r'\\n' f\"{x}\""),
            vec![
                Tok::Int(31),
                Tok::Int(1000),
                Tok::Float(2.5),
                Tok::Float(1000.0),
                Tok::Str("a\tb".into()),
                Tok::Str("\\n".into()),
                Tok::FStr("{x}".into()),
                Tok::Newline,
                Tok::Eof,
            ]
        );
    }

    #[test]
    fn test_triple_quoted() {
        assert_eq!(toks("'''a\nb'''")[0], Tok::Str("a\nb".into()));
    }

    #[test]
    fn test_errors() {
        assert!(matches!(tokenize("x = 'abc"), Err(InterpError::Syntax { line: 1, .. })));
        assert!(matches!(
            tokenize("if x:\n    a\n  b\n"),
            Err(InterpError::Syntax { line: 3, .. })
        ));
        assert!(tokenize("x = 99999999999999999999").is_err());
    }
}
