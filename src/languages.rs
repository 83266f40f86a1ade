//! Language runtime registry
//!
//! Maps a language identifier to its compile/run commands, source file
//! name, and starter template. Definitions live in `files/languages.toml`
//! (embedded at build time, overridable via `LANGUAGES_CONFIG`).

use std::collections::HashMap;

use anyhow::Context;
use serde::Deserialize;

use crate::error::EngineError;

/// Runtime definition for a supported programming language
#[derive(Debug, Clone)]
pub struct LanguageRuntime {
    /// Name of the source file (e.g., "main.cpp")
    pub source_file: String,
    /// Compile command (None for interpreted languages)
    pub compile_command: Option<Vec<String>>,
    /// Run command
    pub run_command: Vec<String>,
    /// Starter template handed to new submissions
    pub default_template: String,
}

impl LanguageRuntime {
    /// Whether this language requires a compile phase
    pub fn needs_compile(&self) -> bool {
        self.compile_command.is_some()
    }
}

/// Raw TOML entry for a language
#[derive(Debug, Deserialize)]
struct RawRuntime {
    source_file: String,
    compile_command: Option<String>,
    run_command: String,
    #[serde(default)]
    template: String,
    #[serde(default)]
    aliases: Vec<String>,
}

/// Registry of language runtimes, constructed once at startup and shared
/// by handle. Lookup is case-insensitive and alias-aware.
#[derive(Debug, Clone)]
pub struct LanguageRegistry {
    runtimes: HashMap<String, LanguageRuntime>,
}

impl LanguageRegistry {
    /// Load the registry from the embedded TOML, or from the file named
    /// by `LANGUAGES_CONFIG` when set.
    pub fn from_embedded() -> anyhow::Result<Self> {
        match std::env::var("LANGUAGES_CONFIG") {
            Ok(path) => {
                let content = std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read language config at {}", path))?;
                Self::from_toml(&content)
            }
            Err(_) => Self::from_toml(include_str!(concat!(
                env!("CARGO_MANIFEST_DIR"),
                "/files/languages.toml"
            ))),
        }
    }

    /// Parse a registry from TOML content
    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let raw: HashMap<String, RawRuntime> =
            toml::from_str(content).context("Invalid language configuration")?;

        let mut runtimes = HashMap::new();
        for (name, entry) in raw {
            let runtime = LanguageRuntime {
                source_file: entry.source_file,
                compile_command: entry.compile_command.as_deref().map(into_command),
                run_command: into_command(&entry.run_command),
                default_template: entry.template.trim_start().to_string(),
            };

            for alias in &entry.aliases {
                runtimes.insert(alias.to_lowercase(), runtime.clone());
            }
            runtimes.insert(name.to_lowercase(), runtime);
        }

        Ok(Self { runtimes })
    }

    /// Resolve a language identifier to its runtime definition
    pub fn resolve(&self, language: &str) -> Result<&LanguageRuntime, EngineError> {
        self.runtimes
            .get(&language.to_lowercase())
            .ok_or_else(|| EngineError::UnsupportedLanguage(language.to_string()))
    }

    /// All registered identifiers (including aliases), sorted
    pub fn supported(&self) -> Vec<String> {
        let mut names: Vec<String> = self.runtimes.keys().cloned().collect();
        names.sort();
        names
    }
}

fn into_command(command: &str) -> Vec<String> {
    command.split_whitespace().map(|s| s.to_string()).collect()
}
