//! 静态筛查：按文本黑名单拒绝生成代码
//!
//! 文本匹配对混淆无能为力，只是第一道闸门；解释器本身不提供任何进程、文件、网络或反射原语。

use once_cell::sync::Lazy;
use regex::Regex;

use crate::core::BrainError;

struct Rule {
    category: &'static str,
    regex: Regex,
}

const PROCESS_MODULES: &str =
    "os|subprocess|sys|shutil|signal|ctypes|multiprocessing|threading|pty|importlib|builtins|inspect|pickle|marshal";
const FILESYSTEM_MODULES: &str = "pathlib|tempfile|glob|io";
const NETWORK_MODULES: &str = "socket|urllib|requests|http|ftplib|smtplib|asyncio";

/// import / from 语句中出现的模块（含 `import math, os` 这类逗号列表）
fn import_of(modules: &str) -> String {
    format!(r"\b(?:import|from)\s+(?:[\w.]+\s*,\s*)*(?:{modules})\b")
}

static RULES: Lazy<Vec<Rule>> = Lazy::new(|| {
    let table: Vec<(&'static str, String)> = vec![
        ("process", import_of(PROCESS_MODULES)),
        ("process", r"\b(?:os|subprocess|sys|shutil)\s*\.".to_string()),
        ("filesystem", r"\b(?:open|file)\s*\(".to_string()),
        ("filesystem", import_of(FILESYSTEM_MODULES)),
        ("filesystem", format!(r"\b(?:{FILESYSTEM_MODULES})\s*\.")),
        ("network", import_of(NETWORK_MODULES)),
        ("network", r"\b(?:socket|urllib|requests|http)\s*\.".to_string()),
        ("input", r"\b(?:input|raw_input)\s*\(".to_string()),
        (
            "introspection",
            r"\b(?:eval|exec|compile|globals|locals|vars|dir|getattr|setattr|delattr|breakpoint|__import__)\s*\("
                .to_string(),
        ),
        ("dunder", r"__\w+__\s*\(".to_string()),
        // `__name__ == ...` 是比较，不是赋值
        ("dunder", r"__\w+__\s*=(?:[^=]|$)".to_string()),
        ("dunder", r"__\w+__\s*\.".to_string()),
        ("dunder", r"\.\s*__\w+".to_string()),
    ];
    table
        .into_iter()
        .map(|(category, pattern)| Rule {
            category,
            regex: Regex::new(&format!("(?im){pattern}")).unwrap(),
        })
        .collect()
});

/// 检查片段；命中任一规则即返回 `UnsafeCode`，pattern 为命中的原文
pub fn screen(snippet: &str) -> Result<(), BrainError> {
    for rule in RULES.iter() {
        if let Some(m) = rule.regex.find(snippet) {
            return Err(BrainError::UnsafeCode {
                category: rule.category,
                pattern: m.as_str().trim().to_string(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn category(snippet: &str) -> Option<&'static str> {
        match screen(snippet) {
            Ok(()) => None,
            Err(BrainError::UnsafeCode { category, .. }) => Some(category),
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_rejects_filesystem_open() {
        let err = screen("data = open('/etc/passwd').read()\nprint(data)").unwrap_err();
        match err {
            BrainError::UnsafeCode { category, pattern } => {
                assert_eq!(category, "filesystem");
                assert_eq!(pattern, "open(");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_rejects_process_access() {
        assert_eq!(category("import os\nprint(os.getcwd())"), Some("process"));
        assert_eq!(category("import math, subprocess"), Some("process"));
        assert_eq!(category("from sys import argv"), Some("process"));
        assert_eq!(category("IMPORT OS"), Some("process"));
    }

    #[test]
    fn test_rejects_network_and_input() {
        assert_eq!(category("import socket"), Some("network"));
        assert_eq!(category("from urllib.request import urlopen"), Some("network"));
        assert_eq!(category("name = input('who? ')"), Some("input"));
    }

    #[test]
    fn test_rejects_introspection() {
        assert_eq!(category("eval('1+1')"), Some("introspection"));
        assert_eq!(category("exec ('x=1')"), Some("introspection"));
        assert_eq!(category("getattr(x, 'y')"), Some("introspection"));
        assert_eq!(category("m = __import__('os')"), Some("introspection"));
    }

    #[test]
    fn test_rejects_dunder_access() {
        assert_eq!(category("print(().__class__)"), Some("dunder"));
        assert_eq!(category("__builtins__ = {}"), Some("dunder"));
        assert_eq!(category("x = __loader__.load()"), Some("dunder"));
    }

    #[test]
    fn test_allows_ordinary_snippets() {
        let ok = [
            "import math\nprint(math.sqrt(16))",
            "from datetime import datetime\nprint(datetime.now().strftime('%Y-%m-%d'))",
            "import time\nprint(time.strftime('%H:%M:%S', time.localtime()))",
            "if __name__ == \"__main__\":\n    print('hi')",
            "positions = [1, 2]\nprint(positions)",
            "ratio.x = 1",
            "print('profile(1)')",
        ];
        for snippet in ok {
            assert_eq!(category(snippet), None, "snippet rejected: {snippet}");
        }
    }
}
