use std::collections::HashMap;
use std::fmt;

use tracing::warn;

use crate::error::JudgeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    Java,
    Cpp,
    C,
    Python,
}

impl Language {
    pub const ALL: [Language; 4] = [Self::Java, Self::Cpp, Self::C, Self::Python];

    /// Case-insensitive lookup, accepting the usual aliases.
    pub fn parse(id: &str) -> Option<Self> {
        match id.trim().to_ascii_lowercase().as_str() {
            "java" => Some(Self::Java),
            "cpp" | "c++" | "cxx" | "cc" => Some(Self::Cpp),
            "c" => Some(Self::C),
            "python" | "python3" | "py" => Some(Self::Python),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Java => "java",
            Self::Cpp => "cpp",
            Self::C => "c",
            Self::Python => "python",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How to build and run one language inside its image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LanguageSpec {
    pub language: Language,
    pub image: String,
    pub source_file: &'static str,
    /// Shell command producing the runnable artifact; `None` for interpreted languages.
    pub compile: Option<&'static str>,
    pub run: &'static str,
}

impl LanguageSpec {
    fn builtin(language: Language) -> Self {
        match language {
            Language::Java => Self {
                language,
                image: "cimg/openjdk:17.0".into(),
                source_file: "Solution.java",
                compile: Some("javac Solution.java"),
                run: "java Solution",
            },
            Language::Cpp => Self {
                language,
                image: "gcc:latest".into(),
                source_file: "main.cpp",
                compile: Some("g++ -std=c++17 -O2 -o main main.cpp"),
                run: "./main",
            },
            Language::C => Self {
                language,
                image: "gcc:latest".into(),
                source_file: "main.c",
                compile: Some("gcc -std=c11 -O2 -o main main.c -lm"),
                run: "./main",
            },
            Language::Python => Self {
                language,
                image: "python:3.13-slim".into(),
                source_file: "main.py",
                compile: None,
                run: "python3 main.py",
            },
        }
    }

    /// Compiler invocation under the in-sandbox `timeout` wrapper, with
    /// diagnostics folded into stdout.
    pub fn compile_command(&self, timeout_secs: u64) -> Option<Vec<String>> {
        self.compile
            .map(|compile| shell(format!("timeout {timeout_secs}s {compile} 2>&1")))
    }

    /// Run against `input.txt` under the in-sandbox `timeout` wrapper.
    pub fn run_command(&self, time_limit_secs: u64) -> Vec<String> {
        shell(format!("timeout {time_limit_secs}s {} < input.txt", self.run))
    }
}

fn shell(script: String) -> Vec<String> {
    vec!["sh".to_string(), "-c".to_string(), script]
}

/// Dispatch table from language identifiers to their specs.
#[derive(Debug, Clone)]
pub struct LanguageTable {
    specs: HashMap<Language, LanguageSpec>,
}

impl Default for LanguageTable {
    fn default() -> Self {
        Self {
            specs: Language::ALL
                .into_iter()
                .map(|language| (language, LanguageSpec::builtin(language)))
                .collect(),
        }
    }
}

impl LanguageTable {
    /// Replace images for the languages named in `overrides`.
    pub fn with_image_overrides(mut self, overrides: &HashMap<String, String>) -> Self {
        for (key, image) in overrides {
            match Language::parse(key).and_then(|language| self.specs.get_mut(&language)) {
                Some(spec) => spec.image = image.clone(),
                None => warn!(language = %key, "Ignoring image override for unknown language"),
            }
        }
        self
    }

    pub fn resolve(&self, id: &str) -> Result<&LanguageSpec, JudgeError> {
        Language::parse(id)
            .and_then(|language| self.specs.get(&language))
            .ok_or_else(|| JudgeError::UnsupportedLanguage(id.to_string()))
    }
}
