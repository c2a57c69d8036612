use std::collections::HashSet;
use std::fmt;

use common::TestCase;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::language::Language;

/// What the engine does with an anti-cheat flag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AntiCheatPolicy {
    /// Do not analyze.
    Off,
    /// Analyze and log, never change the verdict.
    Report,
    /// Turn a flagged, non-zero-score result into WRONG_ANSWER with score 0.
    #[default]
    Enforce,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CheatKind {
    NoInputRead,
    InputNotUsed,
    ConditionalHardcode,
    SimplePrint,
    HardcodedOutput,
}

impl CheatKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoInputRead => "NO_INPUT_READ",
            Self::InputNotUsed => "INPUT_NOT_USED",
            Self::ConditionalHardcode => "CONDITIONAL_HARDCODE",
            Self::SimplePrint => "SIMPLE_PRINT",
            Self::HardcodedOutput => "HARDCODED_OUTPUT",
        }
    }
}

impl fmt::Display for CheatKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheatReport {
    pub detected: bool,
    pub kind: Option<CheatKind>,
    pub message: String,
    pub matched_outputs: Vec<String>,
}

impl CheatReport {
    fn clean() -> Self {
        Self::default()
    }

    fn flag(kind: CheatKind, message: &str) -> Self {
        Self {
            detected: true,
            kind: Some(kind),
            message: message.to_string(),
            matched_outputs: vec![],
        }
    }
}

fn regex(pattern: &str) -> Regex {
    Regex::new(pattern).expect("invalid anti-cheat pattern")
}

static JAVA_INPUT_USED: Lazy<Regex> =
    Lazy::new(|| regex(r"(\w+)\s*=\s*.*\w+\.(next|read|parseInt|parseLong|parseDouble)"));
static PYTHON_INPUT_USED: Lazy<Regex> = Lazy::new(|| {
    regex(r"(\w+)\s*=\s*.*(input\(|sys\.stdin)|for\s+\w+\s+in\s+sys\.stdin")
});
static C_INPUT_USED: Lazy<Regex> = Lazy::new(|| {
    regex(r"scanf\s*\([^,]+,\s*&?\w+|cin\s*>>\s*\w+|getline\s*\(\s*(std::)?cin")
});

static IF_KEYWORD: Lazy<Regex> = Lazy::new(|| regex(r"\bif\b"));
static CONTROL_KEYWORD: Lazy<Regex> =
    Lazy::new(|| regex(r"\b(if|else|for|while|switch|case|try|catch)\b"));
static JAVA_METHOD: Lazy<Regex> =
    Lazy::new(|| regex(r"(public|private|protected)?\s*(static)?\s*\w+\s+\w+\s*\([^)]*\)\s*\{"));
static PYTHON_DEF: Lazy<Regex> = Lazy::new(|| regex(r"\bdef\s+\w+\s*\("));

static DOUBLE_QUOTED: Lazy<Regex> = Lazy::new(|| regex(r#""([^"]*)""#));
static SINGLE_QUOTED: Lazy<Regex> = Lazy::new(|| regex(r"'([^']*)'"));
static NUMBER: Lazy<Regex> = Lazy::new(|| regex(r"\b(-?\d+\.?\d*)\b"));

static LINE_COMMENT: Lazy<Regex> = Lazy::new(|| regex(r"//[^\n]*"));
static BLOCK_COMMENT: Lazy<Regex> = Lazy::new(|| regex(r"(?s)/\*.*?\*/"));
static HASH_COMMENT: Lazy<Regex> = Lazy::new(|| regex(r"#[^\n]*"));

static ARITHMETIC: Lazy<Regex> = Lazy::new(|| regex(r"[\w\)\]]\s*[-+*/%]\s*[\w\(]"));
static RELATIONAL: Lazy<Regex> =
    Lazy::new(|| regex(r"[\w\)\]]\s*(==|!=|<=|>=)\s*[\w\(\-]|\w\s+[<>]\s+\w"));
// `char *s` and `int **grid` declare pointers, they don't multiply.
static POINTER_DECLARATOR: Lazy<Regex> = Lazy::new(|| {
    regex(r"\b(char|short|int|long|float|double|void|bool|unsigned|signed|const|size_t|FILE|auto)(\s*\*)+\s*")
});
static TERNARY: Lazy<Regex> = Lazy::new(|| regex(r"\?\s*[^:;\n]+:"));
static PRINT_CALL: Lazy<Regex> = Lazy::new(|| {
    regex(r"System\.out\.print(ln|f)?|std::|\b(print|printf|puts|cout|endl)\b")
});

const COMMON_NUMBERS: &[&str] = &[
    "0", "1", "2", "3", "4", "5", "6", "7", "8", "9", "10", "100", "1000", "10000", "100000",
    "1000000", "-1", "0.0", "1.0", "0.5",
];

/// Heuristic static scan for hardcoded or trivial solutions. Reports only.
#[derive(Debug, Clone, Copy, Default)]
pub struct AntiCheatAnalyzer;

impl AntiCheatAnalyzer {
    pub fn new() -> Self {
        Self
    }

    pub fn analyze(&self, code: &str, language: Language, test_cases: &[TestCase]) -> CheatReport {
        if test_cases.is_empty() || test_cases.iter().all(|case| case.input.trim().is_empty()) {
            return CheatReport::clean();
        }

        if !reads_input(code, language) {
            return CheatReport::flag(
                CheatKind::NoInputRead,
                "code reads no input, suspected hardcoded output",
            );
        }

        if !uses_input(code, language) {
            return CheatReport::flag(
                CheatKind::InputNotUsed,
                "code reads input but never uses it, suspected hardcoded output",
            );
        }

        if conditional_hardcode(code, test_cases) {
            return CheatReport::flag(
                CheatKind::ConditionalHardcode,
                "branches map test inputs directly to outputs",
            );
        }

        let cleaned = strip_comments(code, language);
        if effective_lines(code) < 10
            && complexity(code, language) < 2
            && is_simple_print_only(&cleaned, language)
        {
            return CheatReport::flag(CheatKind::SimplePrint, "code only prints constant output");
        }

        if has_operator(&operator_view(&cleaned, language)) {
            return CheatReport::clean();
        }

        let distinct: HashSet<&str> = test_cases
            .iter()
            .map(|case| case.expected_output.trim())
            .collect();
        if test_cases.len() < 2 || distinct.len() <= 3 {
            return CheatReport::clean();
        }

        let strings = string_literals(code, language);
        let numbers = number_literals(code);
        let matched_outputs: Vec<String> = test_cases
            .iter()
            .map(|case| case.expected_output.trim())
            .filter(|expected| output_in_literals(expected, &strings, &numbers))
            .map(str::to_string)
            .collect();

        let ratio = matched_outputs.len() as f64 / test_cases.len() as f64;
        if ratio >= 0.8 {
            return CheatReport {
                matched_outputs,
                ..CheatReport::flag(
                    CheatKind::HardcodedOutput,
                    "source contains most expected outputs as literals",
                )
            };
        }

        CheatReport::clean()
    }
}

fn reads_input(code: &str, language: Language) -> bool {
    match language {
        Language::Java => {
            (code.contains("Scanner") && code.contains("System.in"))
                || code.contains("BufferedReader")
                || (code.contains("System.in") && !code.contains("System.out"))
                || code.contains("args[")
                || code.contains("args.length")
        }
        Language::Python => {
            code.contains("input(") || code.contains("sys.stdin") || code.contains("raw_input(")
        }
        Language::C | Language::Cpp => {
            ["scanf", "cin", "gets(", "fgets(", "getchar("]
                .iter()
                .any(|construct| code.contains(construct))
                || (code.contains("argc") && code.contains("argv"))
        }
    }
}

fn uses_input(code: &str, language: Language) -> bool {
    match language {
        Language::Java => JAVA_INPUT_USED.is_match(code),
        Language::Python => PYTHON_INPUT_USED.is_match(code),
        Language::C | Language::Cpp => C_INPUT_USED.is_match(code),
    }
}

fn conditional_hardcode(code: &str, test_cases: &[TestCase]) -> bool {
    let cases = test_cases.len();
    let if_count = IF_KEYWORD.find_iter(code).count();
    if cases <= 2 || if_count + 1 < cases {
        return false;
    }

    let matched = test_cases
        .iter()
        .filter(|case| {
            case.input
                .split_whitespace()
                .any(|token| token.len() > 2 && code.contains(token))
        })
        .count();
    matched as f64 >= cases as f64 * 0.6
}

fn strip_comments(code: &str, language: Language) -> String {
    let code = BLOCK_COMMENT.replace_all(code, "");
    let code = LINE_COMMENT.replace_all(&code, "");
    match language {
        Language::Python => HASH_COMMENT.replace_all(&code, "").into_owned(),
        _ => code.into_owned(),
    }
}

fn strip_string_literals(code: &str) -> String {
    let code = DOUBLE_QUOTED.replace_all(code, "\"\"");
    SINGLE_QUOTED.replace_all(&code, "''").into_owned()
}

/// Code with literals blanked and, for C-family, pointer declarators folded
/// into their type, so only real operators remain.
fn operator_view(code: &str, language: Language) -> String {
    let code = strip_string_literals(code);
    match language {
        Language::C | Language::Cpp => POINTER_DECLARATOR.replace_all(&code, "${1} ").into_owned(),
        _ => code,
    }
}

fn effective_lines(code: &str) -> usize {
    code.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("//") && !line.starts_with('#'))
        .count()
}

fn complexity(code: &str, language: Language) -> usize {
    let control = CONTROL_KEYWORD.find_iter(code).count();
    let definitions = match language {
        Language::Java => JAVA_METHOD.find_iter(code).count(),
        Language::Python => PYTHON_DEF.find_iter(code).count(),
        Language::C | Language::Cpp => 0,
    };
    control + definitions
}

fn is_boilerplate(line: &str, language: Language) -> bool {
    match language {
        Language::Java => {
            ["import ", "package ", "public class", "class ", "public static void main"]
                .iter()
                .any(|prefix| line.starts_with(prefix))
                || line == "{"
                || line == "}"
        }
        Language::Python => ["import ", "from ", "def ", "if __name__"]
            .iter()
            .any(|prefix| line.starts_with(prefix)),
        Language::C | Language::Cpp => ["#include", "using namespace", "int main"]
            .iter()
            .any(|prefix| line.starts_with(prefix))
            || line == "{"
            || line == "}",
    }
}

fn is_print(line: &str, language: Language) -> bool {
    match language {
        Language::Java => line.contains("System.out.print"),
        Language::Python => line.starts_with("print(") || line.starts_with("print "),
        Language::C | Language::Cpp => line.contains("printf") || line.contains("cout"),
    }
}

/// A print whose arguments are nothing but literals.
fn prints_constant(line: &str) -> bool {
    let without_literals = strip_string_literals(line);
    let without_calls = PRINT_CALL.replace_all(&without_literals, "");
    !without_calls.chars().any(|c| c.is_alphabetic() || c == '_')
}

fn is_simple_print_only(cleaned: &str, language: Language) -> bool {
    let mut prints = 0;
    let mut others = 0;
    for line in cleaned.lines().map(str::trim) {
        if line.is_empty() || is_boilerplate(line, language) {
            continue;
        }
        if is_print(line, language) {
            if !prints_constant(line) {
                return false;
            }
            prints += 1;
        } else {
            others += 1;
        }
    }
    prints > 0 && others <= 2
}

fn has_operator(code: &str) -> bool {
    ARITHMETIC.is_match(code) || RELATIONAL.is_match(code) || TERNARY.is_match(code)
}

fn string_literals(code: &str, language: Language) -> HashSet<String> {
    let mut strings: HashSet<String> = DOUBLE_QUOTED
        .captures_iter(code)
        .map(|c| c[1].trim().to_string())
        .collect();
    if language == Language::Python {
        strings.extend(
            SINGLE_QUOTED
                .captures_iter(code)
                .map(|c| c[1].trim().to_string())
                .filter(|s| s.chars().count() > 1),
        );
    }
    strings
}

fn number_literals(code: &str) -> HashSet<String> {
    NUMBER
        .captures_iter(code)
        .map(|c| c[1].to_string())
        .filter(|n| !COMMON_NUMBERS.contains(&n.as_str()))
        .collect()
}

fn output_in_literals(expected: &str, strings: &HashSet<String>, numbers: &HashSet<String>) -> bool {
    if strings.contains(expected)
        || strings
            .iter()
            .any(|s| s.chars().count() > 3 && expected.contains(s.as_str()))
    {
        return true;
    }

    let parts: Vec<&str> = expected.split_whitespace().collect();
    if parts.is_empty() {
        return false;
    }
    let matched = parts
        .iter()
        .filter(|part| numbers.contains(**part) || strings.contains(**part))
        .count();
    matched as f64 / parts.len() as f64 > 0.8
}
