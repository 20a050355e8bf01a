//! 递归下降语法分析

use std::rc::Rc;

use super::ast::{
    Arg, BinOp, CmpOp, CompFor, Expr, FPart, Handler, Index, Param, Stmt, Target, UnaryOp,
};
use super::lexer::{tokenize, Tok, Token};
use super::InterpError;

const KEYWORDS: &[&str] = &[
    "False", "None", "True", "and", "as", "assert", "async", "await", "break", "class",
    "continue", "def", "del", "elif", "else", "except", "finally", "for", "from", "global", "if",
    "import", "in", "is", "lambda", "nonlocal", "not", "or", "pass", "raise", "return", "try",
    "while", "with", "yield",
];

const UNSUPPORTED: &[&str] = &[
    "class", "with", "async", "await", "global", "nonlocal", "del", "raise", "assert", "yield",
];

/// 表达式嵌套上限，防止病态输入耗尽栈
const MAX_NESTING: usize = 64;

pub fn parse_program(src: &str) -> Result<Vec<Stmt>, InterpError> {
    let mut parser = Parser::new(tokenize(src)?);
    let mut stmts = Vec::new();
    loop {
        match parser.peek() {
            Tok::Eof => break,
            Tok::Newline => parser.pos += 1,
            _ => parser.statement(&mut stmts)?,
        }
    }
    Ok(stmts)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            depth: 0,
        }
    }

    fn peek(&self) -> &Tok {
        self.peek_at(0)
    }

    fn peek_at(&self, offset: usize) -> &Tok {
        self.tokens
            .get(self.pos + offset)
            .or_else(|| self.tokens.last())
            .map_or(&Tok::Eof, |t| &t.tok)
    }

    fn line(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map_or(0, |t| t.line)
    }

    fn advance(&mut self) -> Tok {
        let tok = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn error(&self, message: impl Into<String>) -> InterpError {
        InterpError::Syntax {
            line: self.line(),
            message: message.into(),
        }
    }

    fn unexpected(&self) -> InterpError {
        let found = match self.peek() {
            Tok::Name(n) => format!("'{n}'"),
            Tok::Int(i) => i.to_string(),
            Tok::Float(f) => f.to_string(),
            Tok::Str(_) | Tok::FStr(_) => "string".to_string(),
            Tok::Op(op) => format!("'{op}'"),
            Tok::Newline => "end of line".to_string(),
            Tok::Indent => "indent".to_string(),
            Tok::Dedent => "dedent".to_string(),
            Tok::Eof => "end of input".to_string(),
        };
        self.error(format!("invalid syntax near {found}"))
    }

    fn is_op(&self, op: &str) -> bool {
        matches!(self.peek(), Tok::Op(o) if *o == op)
    }

    fn eat_op(&mut self, op: &str) -> bool {
        if self.is_op(op) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_op(&mut self, op: &str) -> Result<(), InterpError> {
        if self.eat_op(op) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{op}'")))
        }
    }

    fn is_kw(&self, kw: &str) -> bool {
        matches!(self.peek(), Tok::Name(n) if n == kw)
    }

    fn eat_kw(&mut self, kw: &str) -> bool {
        if self.is_kw(kw) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_kw(&mut self, kw: &str) -> Result<(), InterpError> {
        if self.eat_kw(kw) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{kw}'")))
        }
    }

    fn expect_name(&mut self) -> Result<String, InterpError> {
        match self.peek().clone() {
            Tok::Name(n) if !KEYWORDS.contains(&n.as_str()) => {
                self.pos += 1;
                Ok(n)
            }
            _ => Err(self.unexpected()),
        }
    }

    fn at_line_end(&self) -> bool {
        matches!(self.peek(), Tok::Newline | Tok::Eof)
    }

    fn end_line(&mut self) -> Result<(), InterpError> {
        match self.peek() {
            Tok::Newline => {
                self.pos += 1;
                Ok(())
            }
            Tok::Eof => Ok(()),
            _ => Err(self.unexpected()),
        }
    }

    /// 当前 token 能否开始一个表达式
    fn starts_expr(&self) -> bool {
        match self.peek() {
            Tok::Name(n) => {
                !KEYWORDS.contains(&n.as_str())
                    || matches!(n.as_str(), "None" | "True" | "False" | "not" | "lambda")
            }
            Tok::Int(_) | Tok::Float(_) | Tok::Str(_) | Tok::FStr(_) => true,
            Tok::Op(op) => matches!(*op, "(" | "[" | "{" | "-" | "+" | "~" | "..."),
            _ => false,
        }
    }

    // ---- 语句 ----

    fn statement(&mut self, out: &mut Vec<Stmt>) -> Result<(), InterpError> {
        let keyword = match self.peek() {
            Tok::Name(n) => n.clone(),
            Tok::Indent => return Err(self.error("unexpected indent")),
            _ => String::new(),
        };
        match keyword.as_str() {
            "if" => out.push(self.if_stmt()?),
            "while" => out.push(self.while_stmt()?),
            "for" => out.push(self.for_stmt()?),
            "def" => out.push(self.def_stmt()?),
            "try" => out.push(self.try_stmt()?),
            kw if UNSUPPORTED.contains(&kw) => {
                return Err(self.error(format!("'{kw}' statements are not supported")))
            }
            _ => self.simple_line(out)?,
        }
        Ok(())
    }

    fn simple_line(&mut self, out: &mut Vec<Stmt>) -> Result<(), InterpError> {
        loop {
            out.push(self.simple_stmt()?);
            if self.eat_op(";") && !self.at_line_end() {
                continue;
            }
            break;
        }
        self.end_line()
    }

    fn simple_stmt(&mut self) -> Result<Stmt, InterpError> {
        if self.eat_kw("pass") {
            return Ok(Stmt::Pass);
        }
        if self.eat_kw("break") {
            return Ok(Stmt::Break);
        }
        if self.eat_kw("continue") {
            return Ok(Stmt::Continue);
        }
        if self.eat_kw("return") {
            let value = if self.at_line_end() || self.is_op(";") {
                None
            } else {
                Some(self.testlist()?)
            };
            return Ok(Stmt::Return(value));
        }
        if self.eat_kw("import") {
            let mut modules = Vec::new();
            loop {
                let module = self.dotted_name()?;
                let alias = if self.eat_kw("as") {
                    Some(self.expect_name()?)
                } else {
                    None
                };
                modules.push((module, alias));
                if !self.eat_op(",") {
                    break;
                }
            }
            return Ok(Stmt::Import(modules));
        }
        if self.eat_kw("from") {
            let module = self.dotted_name()?;
            self.expect_kw("import")?;
            if self.is_op("*") {
                return Err(self.error("wildcard imports are not supported"));
            }
            let parenthesized = self.eat_op("(");
            let mut names = Vec::new();
            loop {
                let name = self.expect_name()?;
                let alias = if self.eat_kw("as") {
                    Some(self.expect_name()?)
                } else {
                    None
                };
                names.push((name, alias));
                if !self.eat_op(",") || (parenthesized && self.is_op(")")) {
                    break;
                }
            }
            if parenthesized {
                self.expect_op(")")?;
            }
            return Ok(Stmt::FromImport(module, names));
        }

        let first = self.testlist()?;
        if self.eat_op(":") {
            // 类型注解：解析后丢弃
            self.test()?;
            if !self.eat_op("=") {
                return Ok(Stmt::Pass);
            }
            let value = self.testlist()?;
            return Ok(Stmt::Assign(vec![self.to_target(first)?], value));
        }
        if self.is_op("=") {
            let mut targets = vec![self.to_target(first)?];
            loop {
                self.expect_op("=")?;
                let value = self.testlist()?;
                if self.is_op("=") {
                    targets.push(self.to_target(value)?);
                } else {
                    return Ok(Stmt::Assign(targets, value));
                }
            }
        }
        if let Tok::Op(op) = self.peek() {
            if let Some(bin) = BinOp::from_augmented(op) {
                self.pos += 1;
                let target = match self.to_target(first)? {
                    Target::Tuple(_) => {
                        return Err(self.error("illegal expression for augmented assignment"))
                    }
                    t => t,
                };
                let value = self.testlist()?;
                return Ok(Stmt::AugAssign(target, bin, value));
            }
        }
        Ok(Stmt::Expr(first))
    }

    fn dotted_name(&mut self) -> Result<String, InterpError> {
        let mut name = self.expect_name()?;
        while self.eat_op(".") {
            name.push('.');
            name.push_str(&self.expect_name()?);
        }
        Ok(name)
    }

    fn block(&mut self) -> Result<Vec<Stmt>, InterpError> {
        self.expect_op(":")?;
        let mut body = Vec::new();
        if !matches!(self.peek(), Tok::Newline) {
            self.simple_line(&mut body)?;
            return Ok(body);
        }
        self.pos += 1;
        if !matches!(self.peek(), Tok::Indent) {
            return Err(self.error("expected an indented block"));
        }
        self.pos += 1;
        loop {
            match self.peek() {
                Tok::Dedent => {
                    self.pos += 1;
                    break;
                }
                Tok::Eof => break,
                Tok::Newline => self.pos += 1,
                _ => self.statement(&mut body)?,
            }
        }
        Ok(body)
    }

    fn if_stmt(&mut self) -> Result<Stmt, InterpError> {
        self.expect_kw("if")?;
        let mut branches = vec![(self.test()?, self.block()?)];
        while self.eat_kw("elif") {
            branches.push((self.test()?, self.block()?));
        }
        let orelse = if self.eat_kw("else") {
            self.block()?
        } else {
            Vec::new()
        };
        Ok(Stmt::If(branches, orelse))
    }

    fn while_stmt(&mut self) -> Result<Stmt, InterpError> {
        self.expect_kw("while")?;
        let cond = self.test()?;
        let body = self.block()?;
        if self.is_kw("else") {
            return Err(self.error("'while ... else' is not supported"));
        }
        Ok(Stmt::While(cond, body))
    }

    fn for_stmt(&mut self) -> Result<Stmt, InterpError> {
        self.expect_kw("for")?;
        let target = self.target_list()?;
        self.expect_kw("in")?;
        let iter = self.testlist()?;
        let body = self.block()?;
        if self.is_kw("else") {
            return Err(self.error("'for ... else' is not supported"));
        }
        Ok(Stmt::For(target, iter, body))
    }

    fn def_stmt(&mut self) -> Result<Stmt, InterpError> {
        self.expect_kw("def")?;
        let name = self.expect_name()?;
        self.expect_op("(")?;
        let params = self.params(")")?;
        self.expect_op(")")?;
        if self.eat_op("->") {
            self.test()?;
        }
        let body = self.block()?;
        Ok(Stmt::Def {
            name,
            params,
            body: Rc::new(body),
        })
    }

    fn params(&mut self, close: &str) -> Result<Vec<Param>, InterpError> {
        let mut params: Vec<Param> = Vec::new();
        while !self.is_op(close) {
            if self.is_op("*") || self.is_op("**") {
                return Err(self.error("variadic parameters are not supported"));
            }
            let name = self.expect_name()?;
            if close == ")" && self.eat_op(":") {
                self.test()?;
            }
            let default = if self.eat_op("=") {
                Some(self.test()?)
            } else {
                None
            };
            if default.is_none() && params.iter().any(|p| p.default.is_some()) {
                return Err(self.error("non-default argument follows default argument"));
            }
            if params.iter().any(|p| p.name == name) {
                return Err(self.error(format!("duplicate argument '{name}'")));
            }
            params.push(Param { name, default });
            if !self.eat_op(",") {
                break;
            }
        }
        Ok(params)
    }

    fn try_stmt(&mut self) -> Result<Stmt, InterpError> {
        self.expect_kw("try")?;
        let body = self.block()?;
        let mut handlers = Vec::new();
        while self.eat_kw("except") {
            let mut kinds = Vec::new();
            if !self.is_op(":") {
                if self.eat_op("(") {
                    loop {
                        kinds.push(self.dotted_name()?);
                        if !self.eat_op(",") || self.is_op(")") {
                            break;
                        }
                    }
                    self.expect_op(")")?;
                } else {
                    kinds.push(self.dotted_name()?);
                }
            }
            let binding = if self.eat_kw("as") {
                Some(self.expect_name()?)
            } else {
                None
            };
            handlers.push(Handler {
                kinds,
                binding,
                body: self.block()?,
            });
        }
        let orelse = if !handlers.is_empty() && self.eat_kw("else") {
            self.block()?
        } else {
            Vec::new()
        };
        let finally = if self.eat_kw("finally") {
            self.block()?
        } else {
            Vec::new()
        };
        if handlers.is_empty() && finally.is_empty() {
            return Err(self.error("expected 'except' or 'finally' block"));
        }
        Ok(Stmt::Try {
            body,
            handlers,
            orelse,
            finally,
        })
    }

    // ---- 赋值目标 ----

    fn target_list(&mut self) -> Result<Target, InterpError> {
        let first = self.bitor()?;
        if !self.is_op(",") {
            return self.to_target(first);
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.is_kw("in") || self.is_op("=") {
                break;
            }
            items.push(self.bitor()?);
        }
        self.to_target(Expr::Tuple(items))
    }

    fn to_target(&self, expr: Expr) -> Result<Target, InterpError> {
        match expr {
            Expr::Name(name) => Ok(Target::Name(name)),
            Expr::Tuple(items) | Expr::List(items) => Ok(Target::Tuple(
                items
                    .into_iter()
                    .map(|e| self.to_target(e))
                    .collect::<Result<_, _>>()?,
            )),
            Expr::Subscript(obj, index) => Ok(Target::Subscript(*obj, *index)),
            Expr::Attribute(..) => Err(self.error("attribute assignment is not supported")),
            _ => Err(self.error("cannot assign to expression")),
        }
    }

    // ---- 表达式 ----

    fn testlist(&mut self) -> Result<Expr, InterpError> {
        let first = self.test()?;
        if !self.is_op(",") {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if !self.starts_expr() {
                break;
            }
            items.push(self.test()?);
        }
        Ok(Expr::Tuple(items))
    }

    fn test(&mut self) -> Result<Expr, InterpError> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(self.error("expression is nested too deeply"));
        }
        let result = self.test_inner();
        self.depth -= 1;
        result
    }

    fn test_inner(&mut self) -> Result<Expr, InterpError> {
        if self.eat_kw("lambda") {
            let params = self.params(":")?;
            self.expect_op(":")?;
            let body = self.test()?;
            return Ok(Expr::Lambda(params, Rc::new(body)));
        }
        let expr = self.or_test()?;
        if self.eat_kw("if") {
            let cond = self.or_test()?;
            self.expect_kw("else")?;
            let orelse = self.test()?;
            return Ok(Expr::IfElse {
                cond: Box::new(cond),
                then: Box::new(expr),
                orelse: Box::new(orelse),
            });
        }
        Ok(expr)
    }

    fn or_test(&mut self) -> Result<Expr, InterpError> {
        let mut left = self.and_test()?;
        while self.eat_kw("or") {
            let right = self.and_test()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and_test(&mut self) -> Result<Expr, InterpError> {
        let mut left = self.not_test()?;
        while self.eat_kw("and") {
            let right = self.not_test()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn not_test(&mut self) -> Result<Expr, InterpError> {
        if self.eat_kw("not") {
            self.depth += 1;
            if self.depth > MAX_NESTING {
                return Err(self.error("expression is nested too deeply"));
            }
            let operand = self.not_test();
            self.depth -= 1;
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(operand?)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr, InterpError> {
        let left = self.bitor()?;
        let mut rest = Vec::new();
        loop {
            let op = match self.peek() {
                Tok::Op("<") => CmpOp::Lt,
                Tok::Op("<=") => CmpOp::Le,
                Tok::Op(">") => CmpOp::Gt,
                Tok::Op(">=") => CmpOp::Ge,
                Tok::Op("==") => CmpOp::Eq,
                Tok::Op("!=") => CmpOp::Ne,
                Tok::Name(n) if n == "in" => CmpOp::In,
                Tok::Name(n) if n == "not" && matches!(self.peek_at(1), Tok::Name(m) if m == "in") => {
                    self.pos += 1;
                    CmpOp::NotIn
                }
                Tok::Name(n) if n == "is" => {
                    if matches!(self.peek_at(1), Tok::Name(m) if m == "not") {
                        self.pos += 1;
                        CmpOp::IsNot
                    } else {
                        CmpOp::Is
                    }
                }
                _ => break,
            };
            self.pos += 1;
            rest.push((op, self.bitor()?));
        }
        if rest.is_empty() {
            Ok(left)
        } else {
            Ok(Expr::Compare(Box::new(left), rest))
        }
    }

    fn binary_level(
        &mut self,
        ops: &[(&str, BinOp)],
        next: fn(&mut Self) -> Result<Expr, InterpError>,
    ) -> Result<Expr, InterpError> {
        let mut left = next(self)?;
        'outer: loop {
            for (sym, op) in ops {
                if self.eat_op(sym) {
                    let right = next(self)?;
                    left = Expr::Binary(*op, Box::new(left), Box::new(right));
                    continue 'outer;
                }
            }
            return Ok(left);
        }
    }

    fn bitor(&mut self) -> Result<Expr, InterpError> {
        self.binary_level(&[("|", BinOp::BitOr)], Self::bitxor)
    }

    fn bitxor(&mut self) -> Result<Expr, InterpError> {
        self.binary_level(&[("^", BinOp::BitXor)], Self::bitand)
    }

    fn bitand(&mut self) -> Result<Expr, InterpError> {
        self.binary_level(&[("&", BinOp::BitAnd)], Self::shift)
    }

    fn shift(&mut self) -> Result<Expr, InterpError> {
        self.binary_level(&[("<<", BinOp::Shl), (">>", BinOp::Shr)], Self::arith)
    }

    fn arith(&mut self) -> Result<Expr, InterpError> {
        self.binary_level(&[("+", BinOp::Add), ("-", BinOp::Sub)], Self::term)
    }

    fn term(&mut self) -> Result<Expr, InterpError> {
        self.binary_level(
            &[
                ("*", BinOp::Mul),
                ("//", BinOp::FloorDiv),
                ("/", BinOp::Div),
                ("%", BinOp::Mod),
            ],
            Self::factor,
        )
    }

    fn factor(&mut self) -> Result<Expr, InterpError> {
        let op = match self.peek() {
            Tok::Op("-") => UnaryOp::Neg,
            Tok::Op("+") => UnaryOp::Pos,
            Tok::Op("~") => UnaryOp::Invert,
            _ => return self.power(),
        };
        self.pos += 1;
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(self.error("expression is nested too deeply"));
        }
        let operand = self.factor();
        self.depth -= 1;
        let operand = operand?;
        // 字面量取负直接折叠，使 -9223372036854775808 这类边界值与常量比较一致
        Ok(match (op, operand) {
            (UnaryOp::Neg, Expr::Int(i)) => Expr::Int(-i),
            (UnaryOp::Neg, Expr::Float(f)) => Expr::Float(-f),
            (op, operand) => Expr::Unary(op, Box::new(operand)),
        })
    }

    fn power(&mut self) -> Result<Expr, InterpError> {
        let base = self.atom_expr()?;
        if self.eat_op("**") {
            let exponent = self.factor()?;
            return Ok(Expr::Binary(BinOp::Pow, Box::new(base), Box::new(exponent)));
        }
        Ok(base)
    }

    fn atom_expr(&mut self) -> Result<Expr, InterpError> {
        let mut expr = self.atom()?;
        loop {
            if self.eat_op("(") {
                let args = self.call_args()?;
                self.expect_op(")")?;
                expr = Expr::Call(Box::new(expr), args);
            } else if self.eat_op("[") {
                let index = self.subscript()?;
                self.expect_op("]")?;
                expr = Expr::Subscript(Box::new(expr), Box::new(index));
            } else if self.eat_op(".") {
                let name = self.expect_name()?;
                expr = Expr::Attribute(Box::new(expr), name);
            } else {
                return Ok(expr);
            }
        }
    }

    fn call_args(&mut self) -> Result<Vec<Arg>, InterpError> {
        let mut args = Vec::new();
        while !self.is_op(")") {
            if self.is_op("*") || self.is_op("**") {
                return Err(self.error("argument unpacking is not supported"));
            }
            let keyword = matches!(self.peek(), Tok::Name(n) if !KEYWORDS.contains(&n.as_str()))
                && matches!(self.peek_at(1), Tok::Op("="));
            if keyword {
                let name = self.expect_name()?;
                self.pos += 1;
                args.push(Arg::Keyword(name, self.test()?));
            } else {
                if args.iter().any(|a| matches!(a, Arg::Keyword(..))) {
                    return Err(self.error("positional argument follows keyword argument"));
                }
                let value = self.test()?;
                if self.is_kw("for") {
                    let clauses = self.comp_for()?;
                    args.push(Arg::Positional(Expr::ListComp(Box::new(value), clauses)));
                } else {
                    args.push(Arg::Positional(value));
                }
            }
            if !self.eat_op(",") {
                break;
            }
        }
        Ok(args)
    }

    fn subscript(&mut self) -> Result<Index, InterpError> {
        let first = self.subscript_item()?;
        if !self.is_op(",") {
            return Ok(first);
        }
        let mut items = Vec::new();
        let mut push = |index: Index, parser: &Self| match index {
            Index::Single(e) => {
                items.push(e);
                Ok(())
            }
            Index::Slice(..) => Err(parser.error("multi-dimensional slicing is not supported")),
        };
        push(first, self)?;
        while self.eat_op(",") {
            if self.is_op("]") {
                break;
            }
            let next = self.subscript_item()?;
            push(next, self)?;
        }
        Ok(Index::Single(Expr::Tuple(items)))
    }

    fn subscript_item(&mut self) -> Result<Index, InterpError> {
        let start = if self.is_op(":") {
            None
        } else {
            Some(self.test()?)
        };
        if !self.eat_op(":") {
            return start.map(Index::Single).ok_or_else(|| self.unexpected());
        }
        let stop = if self.is_op(":") || self.is_op("]") || self.is_op(",") {
            None
        } else {
            Some(self.test()?)
        };
        let step = if self.eat_op(":") && !self.is_op("]") && !self.is_op(",") {
            Some(self.test()?)
        } else {
            None
        };
        Ok(Index::Slice(start, stop, step))
    }

    fn comp_for(&mut self) -> Result<Vec<CompFor>, InterpError> {
        let mut clauses = Vec::new();
        while self.eat_kw("for") {
            let target = self.target_list()?;
            self.expect_kw("in")?;
            let iter = self.or_test()?;
            let mut conditions = Vec::new();
            while self.eat_kw("if") {
                conditions.push(self.or_test()?);
            }
            clauses.push(CompFor {
                target,
                iter,
                conditions,
            });
        }
        Ok(clauses)
    }

    fn atom(&mut self) -> Result<Expr, InterpError> {
        let line = self.line();
        match self.advance() {
            Tok::Op("(") => {
                if self.eat_op(")") {
                    return Ok(Expr::Tuple(Vec::new()));
                }
                let first = self.test()?;
                if self.is_kw("for") {
                    let clauses = self.comp_for()?;
                    self.expect_op(")")?;
                    return Ok(Expr::ListComp(Box::new(first), clauses));
                }
                if !self.eat_op(",") {
                    self.expect_op(")")?;
                    return Ok(first);
                }
                let mut items = vec![first];
                while !self.is_op(")") {
                    items.push(self.test()?);
                    if !self.eat_op(",") {
                        break;
                    }
                }
                self.expect_op(")")?;
                Ok(Expr::Tuple(items))
            }
            Tok::Op("[") => {
                if self.eat_op("]") {
                    return Ok(Expr::List(Vec::new()));
                }
                let first = self.test()?;
                if self.is_kw("for") {
                    let clauses = self.comp_for()?;
                    self.expect_op("]")?;
                    return Ok(Expr::ListComp(Box::new(first), clauses));
                }
                let mut items = vec![first];
                while self.eat_op(",") {
                    if self.is_op("]") {
                        break;
                    }
                    items.push(self.test()?);
                }
                self.expect_op("]")?;
                Ok(Expr::List(items))
            }
            Tok::Op("{") => {
                if self.eat_op("}") {
                    return Ok(Expr::Dict(Vec::new()));
                }
                let key = self.test()?;
                if !self.eat_op(":") {
                    return Err(self.error("set literals are not supported"));
                }
                let value = self.test()?;
                if self.is_kw("for") {
                    let clauses = self.comp_for()?;
                    self.expect_op("}")?;
                    return Ok(Expr::DictComp(Box::new(key), Box::new(value), clauses));
                }
                let mut pairs = vec![(key, value)];
                while self.eat_op(",") {
                    if self.is_op("}") {
                        break;
                    }
                    let key = self.test()?;
                    self.expect_op(":")?;
                    pairs.push((key, self.test()?));
                }
                self.expect_op("}")?;
                Ok(Expr::Dict(pairs))
            }
            Tok::Op("...") => Ok(Expr::None),
            Tok::Int(i) => Ok(Expr::Int(i)),
            Tok::Float(f) => Ok(Expr::Float(f)),
            Tok::Name(n) => match n.as_str() {
                "None" => Ok(Expr::None),
                "True" => Ok(Expr::Bool(true)),
                "False" => Ok(Expr::Bool(false)),
                kw if KEYWORDS.contains(&kw) => {
                    self.pos -= 1;
                    Err(self.unexpected())
                }
                _ => Ok(Expr::Name(n)),
            },
            tok @ (Tok::Str(_) | Tok::FStr(_)) => self.strings(tok, line),
            _ => {
                self.pos -= 1;
                Err(self.unexpected())
            }
        }
    }

    /// 相邻字符串字面量拼接；任一为 f-string 时整体成为 FString
    fn strings(&mut self, first: Tok, line: usize) -> Result<Expr, InterpError> {
        let mut parts = Vec::new();
        let mut formatted = false;
        let mut tok = first;
        loop {
            match tok {
                Tok::Str(s) => parts.push(FPart::Lit(s)),
                Tok::FStr(s) => {
                    formatted = true;
                    parts.extend(parse_fstring(&s, line, self.depth)?);
                }
                _ => unreachable!("strings() only receives string tokens"),
            }
            if matches!(self.peek(), Tok::Str(_) | Tok::FStr(_)) {
                tok = self.advance();
            } else {
                break;
            }
        }

        if !formatted {
            let joined = parts
                .into_iter()
                .map(|p| match p {
                    FPart::Lit(s) => s,
                    FPart::Field { .. } => String::new(),
                })
                .collect();
            return Ok(Expr::Str(joined));
        }
        Ok(Expr::FString(parts))
    }
}

fn parse_fstring(content: &str, line: usize, depth: usize) -> Result<Vec<FPart>, InterpError> {
    let error = |message: &str| InterpError::Syntax {
        line,
        message: format!("f-string: {message}"),
    };
    let chars: Vec<char> = content.chars().collect();
    let mut parts = Vec::new();
    let mut literal = String::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c == '{' && chars.get(i + 1) == Some(&'{') {
            literal.push('{');
            i += 2;
            continue;
        }
        if c == '}' {
            if chars.get(i + 1) == Some(&'}') {
                literal.push('}');
                i += 2;
                continue;
            }
            return Err(error("single '}' is not allowed"));
        }
        if c != '{' {
            literal.push(c);
            i += 1;
            continue;
        }

        if !literal.is_empty() {
            parts.push(FPart::Lit(std::mem::take(&mut literal)));
        }
        i += 1;
        let start = i;
        let mut nesting = 0usize;
        let mut quote: Option<char> = None;
        while i < chars.len() {
            let ch = chars[i];
            if let Some(q) = quote {
                if ch == q {
                    quote = None;
                }
            } else {
                match ch {
                    '\'' | '"' => quote = Some(ch),
                    '(' | '[' | '{' => nesting += 1,
                    ')' | ']' if nesting > 0 => nesting -= 1,
                    '}' if nesting > 0 => nesting -= 1,
                    '}' if nesting == 0 => break,
                    '!' if nesting == 0 && chars.get(i + 1) != Some(&'=') => break,
                    ':' if nesting == 0 => break,
                    _ => {}
                }
            }
            i += 1;
        }
        let source: String = chars[start..i].iter().collect();
        if source.trim().is_empty() {
            return Err(error("empty expression not allowed"));
        }

        let mut conversion = None;
        if chars.get(i) == Some(&'!') {
            match chars.get(i + 1) {
                Some(&c @ ('r' | 's' | 'a')) => conversion = Some(c),
                _ => return Err(error("invalid conversion character")),
            }
            i += 2;
        }
        let mut spec = String::new();
        if chars.get(i) == Some(&':') {
            i += 1;
            while i < chars.len() && chars[i] != '}' {
                if chars[i] == '{' {
                    return Err(error("nested replacement fields in format specs are not supported"));
                }
                spec.push(chars[i]);
                i += 1;
            }
        }
        if chars.get(i) != Some(&'}') {
            return Err(error("expecting '}'"));
        }
        i += 1;

        let mut sub = Parser::new(tokenize(source.trim()).map_err(|e| match e {
            InterpError::Syntax { message, .. } => InterpError::Syntax { line, message },
            other => other,
        })?);
        sub.depth = depth;
        let expr = sub.testlist()?;
        if !matches!(sub.peek(), Tok::Newline | Tok::Eof) {
            return Err(error("invalid expression"));
        }
        parts.push(FPart::Field {
            expr: Box::new(expr),
            conversion,
            spec,
        });
    }
    if !literal.is_empty() {
        parts.push(FPart::Lit(literal));
    }
    Ok(parts)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &str) -> Vec<Stmt> {
        parse_program(src).unwrap()
    }

    #[test]
    fn test_assignment_forms() {
        let stmts = parse("a = b = 1\nx, y = 1, 2\nd['k'] += 3\n");
        assert!(matches!(&stmts[0], Stmt::Assign(targets, _) if targets.len() == 2));
        assert!(matches!(&stmts[1], Stmt::Assign(targets, Expr::Tuple(_)) if matches!(targets[0], Target::Tuple(_))));
        assert!(matches!(&stmts[2], Stmt::AugAssign(Target::Subscript(..), BinOp::Add, _)));
    }

    #[test]
    fn test_precedence() {
        let stmts = parse("1 + 2 * 3 ** 2\n");
        let Stmt::Expr(Expr::Binary(BinOp::Add, _, right)) = &stmts[0] else {
            panic!("expected addition at the root");
        };
        assert!(matches!(**right, Expr::Binary(BinOp::Mul, _, _)));
    }

    #[test]
    fn test_compound_statements() {
        let src = "def f(n, step=1):\n    total = 0\n    for i in range(n):\n        if i % 2 == 0:\n            continue\n        elif i > 7:\n            break\n        total += i\n    return total\n";
        let stmts = parse(src);
        let Stmt::Def { params, body, .. } = &stmts[0] else {
            panic!("expected def");
        };
        assert_eq!(params.len(), 2);
        assert!(params[1].default.is_some());
        assert_eq!(body.len(), 3);
    }

    #[test]
    fn test_comprehensions_and_lambda() {
        let stmts = parse("[x * 2 for x in xs if x]\nsum(x for x in xs)\n{k: v for k, v in d.items()}\nsorted(xs, key=lambda p: p[1])\n");
        assert!(matches!(&stmts[0], Stmt::Expr(Expr::ListComp(..))));
        assert!(matches!(&stmts[1], Stmt::Expr(Expr::Call(_, args)) if matches!(args[0], Arg::Positional(Expr::ListComp(..)))));
        assert!(matches!(&stmts[2], Stmt::Expr(Expr::DictComp(..))));
        assert!(matches!(&stmts[3], Stmt::Expr(Expr::Call(_, args)) if matches!(&args[1], Arg::Keyword(k, Expr::Lambda(..)) if k == "key")));
    }

    #[test]
    fn test_fstring_fields() {
        let stmts = parse("f'{x!r:>8} {{lit}} {d[\"k\"]:.2f}'\n");
        let Stmt::Expr(Expr::FString(parts)) = &stmts[0] else {
            panic!("expected f-string");
        };
        assert!(matches!(&parts[0], FPart::Field { conversion: Some('r'), spec, .. } if spec == ">8"));
        assert!(matches!(&parts[1], FPart::Lit(s) if s == " {lit} "));
        assert!(matches!(&parts[2], FPart::Field { spec, .. } if spec == ".2f"));
    }

    #[test]
    fn test_slices() {
        let stmts = parse("a[1:]\na[::-1]\na[:2]\n");
        assert!(matches!(&stmts[1], Stmt::Expr(Expr::Subscript(_, idx)) if matches!(**idx, Index::Slice(None, None, Some(_)))));
    }

    #[test]
    fn test_try_except() {
        let stmts = parse("try:\n    x = 1 / 0\nexcept (ZeroDivisionError, ValueError) as e:\n    print(e)\nfinally:\n    pass\n");
        let Stmt::Try { handlers, finally, .. } = &stmts[0] else {
            panic!("expected try");
        };
        assert_eq!(handlers[0].kinds, vec!["ZeroDivisionError", "ValueError"]);
        assert_eq!(handlers[0].binding.as_deref(), Some("e"));
        assert_eq!(finally.len(), 1);
    }

    #[test]
    fn test_rejects_unsupported() {
        for src in ["class A:\n    pass\n", "with x:\n    pass\n", "x = {1, 2}\n", "f(*args)\n", "1 +\n"] {
            assert!(
                matches!(parse_program(src), Err(InterpError::Syntax { .. })),
                "{src:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_nesting_limit() {
        let src = format!("{}1{}\n", "(".repeat(200), ")".repeat(200));
        assert!(parse_program(&src).is_err());
    }
}
