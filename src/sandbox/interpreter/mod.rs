//! 代码片段解释器：Python 子集
//!
//! 支持 int / float / str / bool / None / list / tuple / dict / range，赋值与解包、if / for / while、
//! def / lambda、推导式、f-string、切片、try / except。可用模块只有 math、datetime、time。
//! 不存在任何反射或动态执行原语（eval、exec、getattr、open 等名字在这里根本不存在）。
//!
//! 执行受三重约束：步数预算、每步检查的截止时间、输出字符上限（超出部分截断）。

mod ast;
mod builtins;
mod eval;
mod format;
mod lexer;
mod modules;
mod ops;
mod parser;
mod value;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;

pub use modules::ALLOWED_MODULES;

/// 解释执行过程中的错误
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InterpError {
    #[error("SyntaxError: {message} (line {line})")]
    Syntax { line: usize, message: String },

    /// 脚本内可被 try / except 捕获的运行期异常
    #[error("{kind}: {message}")]
    Runtime { kind: &'static str, message: String },

    #[error("step budget of {0} exhausted")]
    StepLimit(u64),

    #[error("deadline exceeded")]
    Deadline,

    #[error("execution cancelled")]
    Cancelled,
}

impl InterpError {
    pub fn runtime(kind: &'static str, message: impl Into<String>) -> Self {
        InterpError::Runtime {
            kind,
            message: message.into(),
        }
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::runtime("TypeError", message)
    }

    pub fn value_error(message: impl Into<String>) -> Self {
        Self::runtime("ValueError", message)
    }

    pub fn index_error(message: impl Into<String>) -> Self {
        Self::runtime("IndexError", message)
    }

    pub fn key_error(message: impl Into<String>) -> Self {
        Self::runtime("KeyError", message)
    }

    pub fn name_error(message: impl Into<String>) -> Self {
        Self::runtime("NameError", message)
    }

    pub fn attribute_error(message: impl Into<String>) -> Self {
        Self::runtime("AttributeError", message)
    }

    pub fn overflow_error(message: impl Into<String>) -> Self {
        Self::runtime("OverflowError", message)
    }

    pub fn zero_division(message: impl Into<String>) -> Self {
        Self::runtime("ZeroDivisionError", message)
    }

    pub fn memory_error(message: impl Into<String>) -> Self {
        Self::runtime("MemoryError", message)
    }

    /// 资源限制类错误不可被脚本捕获
    pub fn is_catchable(&self) -> bool {
        matches!(self, InterpError::Runtime { kind, .. } if *kind != "MemoryError" && *kind != "RecursionError")
    }

    /// except 子句名是否匹配该异常
    fn matches_handler(&self, handler: &str) -> bool {
        let InterpError::Runtime { kind, .. } = self else {
            return false;
        };
        match handler {
            "Exception" | "BaseException" => true,
            "ArithmeticError" => matches!(*kind, "ZeroDivisionError" | "OverflowError"),
            "LookupError" => matches!(*kind, "KeyError" | "IndexError"),
            "ImportError" => matches!(*kind, "ImportError" | "ModuleNotFoundError"),
            other => other == *kind,
        }
    }
}

/// 单次运行的资源上限
#[derive(Debug, Clone)]
pub struct Limits {
    pub max_steps: u64,
    pub deadline: Instant,
    pub max_output_chars: usize,
    pub cancel: Option<Arc<AtomicBool>>,
}

impl Limits {
    pub fn new(max_steps: u64, timeout: Duration, max_output_chars: usize) -> Self {
        Self {
            max_steps,
            deadline: Instant::now() + timeout,
            max_output_chars,
            cancel: None,
        }
    }

    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    fn cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutput {
    pub stdout: String,
    pub truncated: bool,
    pub steps: u64,
}

/// 解析并执行一段源码，返回捕获的标准输出
pub fn run(source: &str, limits: Limits) -> Result<RunOutput, InterpError> {
    let program = parser::parse_program(source)?;
    eval::Interpreter::new(limits).run(&program)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> Limits {
        Limits::new(200_000, Duration::from_secs(5), 8000)
    }

    fn exec(src: &str) -> String {
        run(src, limits()).unwrap().stdout
    }

    fn exec_err(src: &str) -> InterpError {
        run(src, limits()).unwrap_err()
    }

    #[test]
    fn test_arithmetic_and_print() {
        assert_eq!(exec("print(1 + 2 * 3, 7 // 2, -7 // 2, 7 % -3, 2 ** 10, 7 / 2)"), "7 3 -4 -2 1024 3.5\n");
        assert_eq!(exec("print(0.1 + 0.2)"), "0.30000000000000004\n");
        assert_eq!(exec("print('a', 'b', sep='-', end='!')"), "a-b!");
    }

    #[test]
    fn test_control_flow() {
        let src = "\
total = 0
for i in range(10):
    if i % 2:
        continue
    if i > 6:
        break
    total += i
n = 0
while n < 3:
    n += 1
print(total, n)
";
        assert_eq!(exec(src), "12 3\n");
    }

    #[test]
    fn test_functions_and_recursion() {
        let src = "\
def fib(n):
    return n if n < 2 else fib(n - 1) + fib(n - 2)

def greet(name, greeting='Hello'):
    return f'{greeting}, {name}!'

print(fib(15))
print(greet('Ada'), greet(greeting='Hi', name='Bob'))
";
        assert_eq!(exec(src), "610\nHello, Ada! Hi, Bob!\n");
    }

    #[test]
    fn test_closures() {
        let src = "\
def make_adder(n):
    def add(x):
        return x + n
    return add

add3 = make_adder(3)
print(add3(4), [add3(i) for i in range(3)])
";
        assert_eq!(exec(src), "7 [3, 4, 5]\n");
    }

    #[test]
    fn test_collections() {
        let src = "\
xs = [3, 1, 2]
xs.append(5)
xs.sort(reverse=True)
d = {'a': 1}
d['b'] = 2
d['a'] += 10
words = 'the quick brown fox'.split()
print(xs, xs[1:3], xs[::-1], len(d), d)
print(sorted(words, key=len), ', '.join(w.upper() for w in words[:2]))
print({k: v * 2 for k, v in d.items()}, sum(x * x for x in range(4)))
a, (b, c) = 1, (2, 3)
print(a + b + c, max(xs), min(3, 1, 2), list(zip('ab', [1, 2])), list(enumerate('xy', 1)))
";
        assert_eq!(
            exec(src),
            "[5, 3, 2, 1] [3, 2] [1, 2, 3, 5] 2 {'a': 11, 'b': 2}\n\
             ['the', 'fox', 'quick', 'brown'] THE, QUICK\n\
             {'a': 22, 'b': 4} 14\n\
             6 5 1 [('a', 1), ('b', 2)] [(1, 'x'), (2, 'y')]\n"
        );
    }

    #[test]
    fn test_formatting() {
        let src = "\
import math
r = 2
area = math.pi * r ** 2
print(f'area={area:.2f} hex={255:#x} pad=[{\"ab\":>4}] {r!r}')
print('%s has %d items (%.1f%%)' % ('cart', 3, 42.5))
print('{} + {} = {total}'.format(1, 2, total=3))
print(round(2.5), round(3.14159, 2), int('42') + int(3.9), float('1.5'))
";
        assert_eq!(
            exec(src),
            "area=12.57 hex=0xff pad=[  ab] 2\n\
             cart has 3 items (42.5%)\n\
             1 + 2 = 3\n\
             2 3.14 45 1.5\n"
        );
    }

    #[test]
    fn test_modules() {
        let src = "\
import math
from datetime import datetime, timedelta
import time
d = datetime(2024, 1, 31, 12, 30)
print(math.sqrt(16), math.floor(2.7), math.factorial(5), math.gcd(12, 18))
print(d + timedelta(days=1), (d + timedelta(hours=36)).strftime('%Y-%m-%d %H:%M'))
print(f'{d:%d/%m/%Y}', d.weekday(), (datetime(2024, 3, 1) - d).days)
print(time.time() > 1600000000, datetime.now().year >= 2024)
";
        assert_eq!(
            exec(src),
            "4.0 2 120 6\n\
             2024-02-01 12:30:00 2024-02-02 00:30\n\
             31/01/2024 2 29\n\
             True True\n"
        );
    }

    #[test]
    fn test_try_except() {
        let src = "\
try:
    x = 1 / 0
except ZeroDivisionError as e:
    print('caught', e)
finally:
    print('done')
try:
    {}['missing']
except LookupError:
    print('lookup')
";
        assert_eq!(exec(src), "caught division by zero\ndone\nlookup\n");
    }

    #[test]
    fn test_runtime_errors() {
        assert_eq!(
            exec_err("print(1 / 0)"),
            InterpError::zero_division("division by zero")
        );
        assert_eq!(
            exec_err("print(undefined)"),
            InterpError::name_error("name 'undefined' is not defined")
        );
        assert!(matches!(exec_err("'a' + 1"), InterpError::Runtime { kind: "TypeError", .. }));
        assert!(matches!(exec_err("[1][5]"), InterpError::Runtime { kind: "IndexError", .. }));
    }

    #[test]
    fn test_reflective_primitives_do_not_exist() {
        for name in ["eval", "exec", "compile", "getattr", "setattr", "vars", "dir", "globals", "locals", "type", "open", "input"] {
            let err = exec_err(&format!("{name}('1')"));
            assert!(
                matches!(&err, InterpError::Runtime { kind: "NameError", .. }),
                "{name} should be undefined, got {err:?}"
            );
        }
    }

    #[test]
    fn test_disallowed_import() {
        let err = exec_err("import os");
        assert!(matches!(err, InterpError::Runtime { kind: "ModuleNotFoundError", .. }));
        let err = exec_err("from subprocess import run");
        assert!(matches!(err, InterpError::Runtime { kind: "ModuleNotFoundError", .. }));
    }

    #[test]
    fn test_step_budget() {
        let err = run("while True:\n    pass\n", Limits::new(1000, Duration::from_secs(5), 100)).unwrap_err();
        assert_eq!(err, InterpError::StepLimit(1000));
    }

    #[test]
    fn test_deadline() {
        let err = run("while True:\n    pass\n", Limits::new(u64::MAX, Duration::from_millis(20), 100)).unwrap_err();
        assert_eq!(err, InterpError::Deadline);
    }

    #[test]
    fn test_cancel_flag() {
        let flag = Arc::new(AtomicBool::new(true));
        let err = run("x = 1", limits().with_cancel_flag(flag)).unwrap_err();
        assert_eq!(err, InterpError::Cancelled);
    }

    #[test]
    fn test_output_truncated() {
        let out = run("for i in range(100):\n    print('x' * 10)\n", Limits::new(10_000, Duration::from_secs(5), 25)).unwrap();
        assert!(out.truncated);
        assert_eq!(out.stdout.chars().count(), 25);
    }

    #[test]
    fn test_recursion_limit_not_catchable() {
        let src = "\
def f(n):
    return f(n + 1)
try:
    f(0)
except Exception:
    print('caught')
";
        assert!(matches!(exec_err(src), InterpError::Runtime { kind: "RecursionError", .. }));
    }

    #[test]
    fn test_comparing_self_containing_lists_is_recursion_error() {
        let setup = "a = []\na.append(a)\nb = []\nb.append(b)\n";
        for cmp in ["print(a == b)", "print(a < b)", "print(a in [b])"] {
            let err = exec_err(&format!("{setup}{cmp}\n"));
            assert!(matches!(err, InterpError::Runtime { kind: "RecursionError", .. }), "{cmp}: {err}");
        }
        assert_eq!(exec(&format!("{setup}print(a == a)\n")), "True\n");
    }

    #[test]
    fn test_sort_key_mutating_list_is_value_error() {
        let err = exec_err("xs = [3, 1, 2]\nxs.sort(key=lambda x: xs.append(0) or x)\n");
        assert!(
            matches!(err, InterpError::Runtime { kind: "ValueError", ref message } if message.contains("list modified during sort")),
            "{err}"
        );
        let out = exec("xs = [3, 1, 2]\ntry:\n    xs.sort(key=lambda x: xs.append(0) or x)\nexcept ValueError:\n    print(xs)\n");
        assert_eq!(out, "[1, 2, 3]\n");
        assert_eq!(exec("xs = [3, 1, 2]\nxs.sort(reverse=True)\nprint(xs)\n"), "[3, 2, 1]\n");
    }

    #[test]
    fn test_main_guard() {
        assert_eq!(exec("if __name__ == '__main__':\n    print('main')\n"), "main\n");
    }
}
