pub mod adapter;
pub mod anticheat;
pub mod engine;
pub mod language;
pub mod security;

pub use adapter::LanguageAdapter;
pub use anticheat::{AntiCheatAnalyzer, AntiCheatPolicy, CheatKind, CheatReport};
pub use engine::{Collaborators, JudgeEngine};
pub use language::{Language, LanguageSpec, LanguageTable};
pub use security::{SecurityCategory, SecurityScanner, SecurityViolation};
