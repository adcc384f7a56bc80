//! File language classification.
//!
//! File nodes carry a language label. Classification is behind a trait so a
//! remote classifier can be plugged in; the built-in one looks at extensions.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Language of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Rust,
    Python,
    TypeScript,
    JavaScript,
    Go,
    Java,
    Ruby,
    C,
    Cpp,
    Markdown,
    Hcl,
    Unknown,
}

impl Language {
    /// Detect language from file extension.
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_lowercase().as_str() {
            "rs" => Language::Rust,
            "py" | "pyi" => Language::Python,
            "ts" | "tsx" => Language::TypeScript,
            "js" | "jsx" | "mjs" | "cjs" => Language::JavaScript,
            "go" => Language::Go,
            "java" => Language::Java,
            "rb" => Language::Ruby,
            "c" | "h" => Language::C,
            "cc" | "cpp" | "cxx" | "hpp" | "hh" => Language::Cpp,
            "md" | "markdown" => Language::Markdown,
            "tf" | "tfvars" | "hcl" => Language::Hcl,
            _ => Language::Unknown,
        }
    }

    /// Get the language name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Rust => "rust",
            Language::Python => "python",
            Language::TypeScript => "typescript",
            Language::JavaScript => "javascript",
            Language::Go => "go",
            Language::Java => "java",
            Language::Ruby => "ruby",
            Language::C => "c",
            Language::Cpp => "cpp",
            Language::Markdown => "markdown",
            Language::Hcl => "hcl",
            Language::Unknown => "unknown",
        }
    }
}

/// Assigns a language label to a file path.
pub trait LanguageClassifier: Send + Sync {
    /// `None` when the file should carry no label.
    fn classify(&self, path: &str) -> Option<String>;
}

/// Classifies by file extension.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExtensionClassifier;

impl LanguageClassifier for ExtensionClassifier {
    fn classify(&self, path: &str) -> Option<String> {
        let ext = Path::new(path).extension()?.to_str()?;
        match Language::from_extension(ext) {
            Language::Unknown => None,
            lang => Some(lang.as_str().to_string()),
        }
    }
}
