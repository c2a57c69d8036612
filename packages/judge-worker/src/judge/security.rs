use std::borrow::Cow;
use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;

use super::language::Language;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityCategory {
    ProcessSpawn,
    Network,
    Privilege,
    DynamicCode,
    Filesystem,
}

impl SecurityCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProcessSpawn => "PROCESS_SPAWN",
            Self::Network => "NETWORK",
            Self::Privilege => "PRIVILEGE",
            Self::DynamicCode => "DYNAMIC_CODE",
            Self::Filesystem => "FILESYSTEM",
        }
    }

    fn describe(&self) -> &'static str {
        match self {
            Self::ProcessSpawn => "process execution",
            Self::Network => "network access",
            Self::Privilege => "privilege or namespace manipulation",
            Self::DynamicCode => "reflection or dynamic code loading",
            Self::Filesystem => "destructive filesystem access",
        }
    }
}

impl fmt::Display for SecurityCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityViolation {
    pub category: SecurityCategory,
    pub pattern: &'static str,
    pub message: String,
}

struct Rule {
    category: SecurityCategory,
    pattern: &'static str,
    regex: Regex,
}

fn rules(table: &[(SecurityCategory, &'static str)]) -> Vec<Rule> {
    table
        .iter()
        .map(|&(category, pattern)| Rule {
            category,
            pattern,
            regex: Regex::new(pattern).expect("invalid security pattern"),
        })
        .collect()
}

use SecurityCategory::*;

static JAVA_RULES: Lazy<Vec<Rule>> = Lazy::new(|| {
    rules(&[
        (ProcessSpawn, r"Runtime\s*\.\s*getRuntime\s*\(\s*\)\s*\.\s*exec"),
        (ProcessSpawn, r"\bProcessBuilder\b"),
        (Network, r"\bjava\.net\b"),
        (Network, r"\bnew\s+(Server)?Socket\s*\("),
        (Network, r"\b(Http)?URLConnection\b"),
        (Privilege, r"System\s*\.\s*setSecurityManager\s*\("),
        (Privilege, r"\bsun\.misc\.Unsafe\b"),
        (DynamicCode, r"\bjava\.lang\.reflect\b"),
        (DynamicCode, r"Class\s*\.\s*forName\s*\("),
        (DynamicCode, r"\.\s*setAccessible\s*\("),
        (DynamicCode, r"\b(URL)?ClassLoader\b"),
        (DynamicCode, r"System\s*\.\s*load(Library)?\s*\("),
        (Filesystem, r"\bjava\.nio\.file\b"),
        (Filesystem, r"\bFile(Writer|OutputStream)\b"),
        (Filesystem, r"\bRandomAccessFile\b"),
        (Filesystem, r"\.\s*(delete|deleteOnExit|renameTo)\s*\(\s*\)"),
    ])
});

static C_FAMILY_RULES: Lazy<Vec<Rule>> = Lazy::new(|| {
    rules(&[
        (ProcessSpawn, r"\bsystem\s*\("),
        (ProcessSpawn, r"\bpopen\s*\("),
        (ProcessSpawn, r"\b(v)?fork\s*\("),
        (ProcessSpawn, r"\bexec(l|lp|le|v|vp|vpe)\s*\("),
        (Network, r"\bsocket\s*\("),
        (Network, r"#\s*include\s*<(sys/socket|netinet/in|arpa/inet|netdb)\.h>"),
        (Privilege, r"\bset(e|re|res)?[ug]id\s*\("),
        (Privilege, r"\b(chroot|unshare|setns|ptrace|mount)\s*\("),
        (DynamicCode, r"\bdlopen\s*\("),
        (DynamicCode, r"\b(__asm__|asm)\s*(volatile\s*)?\("),
        // Unqualified calls only: `std::remove` and `v.remove(` are container algorithms.
        (Filesystem, r"(?:^|[^:.\w>])(?P<call>(remove|unlink|rmdir|rename|truncate)\s*\()"),
        (Filesystem, r"\bstd\s*::\s*filesystem\b"),
    ])
});

static PYTHON_RULES: Lazy<Vec<Rule>> = Lazy::new(|| {
    rules(&[
        (ProcessSpawn, r"\b(import|from)\s+(subprocess|pty|multiprocessing)\b"),
        (ProcessSpawn, r"\bos\s*\.\s*(system|popen|fork|exec\w*|spawn\w*|kill)\s*\("),
        (Network, r"\b(import|from)\s+(socket|urllib|requests|http|ftplib|smtplib)\b"),
        (Privilege, r"\bos\s*\.\s*(setuid|setgid|chroot|chmod|chown)\s*\("),
        (Privilege, r"\b(import|from)\s+ctypes\b"),
        (DynamicCode, r"\b__import__\s*\("),
        // Bare builtins only, so `re.compile(` passes.
        (DynamicCode, r"(?:^|[^.\w])(?P<call>(eval|exec|compile)\s*\()"),
        (DynamicCode, r"\bimportlib\b"),
        (Filesystem, r"\bos\s*\.\s*(remove|unlink|rmdir|rename|removedirs)\s*\("),
        (Filesystem, r"\b(import|from)\s+shutil\b"),
    ])
});

static BLOCK_COMMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)/\*.*?\*/").expect("invalid comment pattern"));
static LINE_COMMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"//[^\n]*").expect("invalid comment pattern"));
static HASH_COMMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"#[^\n]*").expect("invalid comment pattern"));

/// Deny-list static scan, run before anything is compiled or executed.
#[derive(Debug, Clone, Copy, Default)]
pub struct SecurityScanner;

impl SecurityScanner {
    pub fn new() -> Self {
        Self
    }

    /// First dangerous construct found in `code`, if any.
    pub fn scan(&self, code: &str, language: Language) -> Option<SecurityViolation> {
        let (rules, stripped) = match language {
            Language::Java => (&*JAVA_RULES, strip_c_comments(code)),
            Language::Cpp | Language::C => (&*C_FAMILY_RULES, strip_c_comments(code)),
            Language::Python => (&*PYTHON_RULES, HASH_COMMENT.replace_all(code, "")),
        };

        rules.iter().find_map(|rule| {
            let caps = rule.regex.captures(&stripped)?;
            let found = caps.name("call").or_else(|| caps.get(0))?;
            Some(SecurityViolation {
                category: rule.category,
                pattern: rule.pattern,
                message: format!(
                    "security check failed: {} is not allowed ({})",
                    rule.category.describe(),
                    found.as_str().trim()
                ),
            })
        })
    }
}

fn strip_c_comments(code: &str) -> Cow<'_, str> {
    match BLOCK_COMMENT.replace_all(code, "") {
        Cow::Borrowed(code) => LINE_COMMENT.replace_all(code, ""),
        Cow::Owned(code) => Cow::Owned(LINE_COMMENT.replace_all(&code, "").into_owned()),
    }
}
