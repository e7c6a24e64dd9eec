// Language and engine configuration for the judge
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use crate::types::Language;

pub const DEFAULT_LANGUAGES_CONFIG: &str = "config/languages.json";

/// Per-language sandbox configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LanguageConfig {
    pub name: String,
    pub image: String,
    pub memory_limit_mb: u32,
    pub cpu_limit: f32,
    #[serde(default = "default_pids_limit")]
    pub pids_limit: i64,
    #[serde(default = "default_workspace_size_mb")]
    pub workspace_size_mb: u32,
    #[serde(default = "default_compile_timeout_ms")]
    pub compile_timeout_ms: u64,
}

fn default_pids_limit() -> i64 {
    64
}

fn default_workspace_size_mb() -> u32 {
    64
}

fn default_compile_timeout_ms() -> u64 {
    15_000
}

impl LanguageConfig {
    fn builtin(language: Language) -> Self {
        let (image, memory_limit_mb, workspace_size_mb) = match language {
            Language::Java => ("eclipse-temurin:17-jdk-alpine", 256, 64),
            Language::Node => ("node:20-alpine", 256, 64),
            Language::Cpp => ("gcc:13", 256, 128),
            Language::Python => ("python:3.12-alpine", 256, 64),
        };

        Self {
            name: language.to_string(),
            image: image.to_string(),
            memory_limit_mb,
            cpu_limit: 1.0,
            pids_limit: default_pids_limit(),
            workspace_size_mb,
            compile_timeout_ms: default_compile_timeout_ms(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct LanguagesJson {
    languages: Vec<LanguageConfig>,
}

/// Language configuration manager
#[derive(Debug, Clone)]
pub struct LanguageConfigManager {
    configs: HashMap<Language, LanguageConfig>,
}

impl LanguageConfigManager {
    /// Load language configurations from languages.json
    pub fn load(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            bail!("Language config file not found: {}", config_path.display());
        }

        let content = fs::read_to_string(config_path)
            .context("Failed to read languages.json")?;

        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let languages_json: LanguagesJson = serde_json::from_str(content)
            .context("Failed to parse languages.json")?;

        let mut configs = HashMap::new();
        for lang in languages_json.languages {
            let language = Language::parse(&lang.name)
                .ok_or_else(|| anyhow::anyhow!("Unknown language '{}' in languages.json", lang.name))?;
            if lang.memory_limit_mb == 0 || lang.cpu_limit <= 0.0 || lang.pids_limit <= 0 {
                bail!("Language '{}' must declare positive memory, cpu and pids limits", lang.name);
            }
            configs.insert(language, lang);
        }

        if configs.is_empty() {
            bail!("No languages configured in languages.json");
        }

        Ok(Self { configs })
    }

    /// Built-in images and limits for every supported language
    pub fn builtin() -> Self {
        let configs = Language::all_variants()
            .iter()
            .map(|lang| (*lang, LanguageConfig::builtin(*lang)))
            .collect();
        Self { configs }
    }

    /// Load from `path` when it exists, otherwise fall back to the built-in table
    pub fn load_or_builtin(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::builtin())
        }
    }

    /// Get configuration for a specific language
    pub fn get_config(&self, language: &Language) -> Result<&LanguageConfig> {
        self.configs
            .get(language)
            .ok_or_else(|| anyhow::anyhow!("No configuration found for language: {}", language))
    }

    /// List all configured languages
    pub fn list_languages(&self) -> Vec<Language> {
        let mut languages: Vec<Language> = self.configs.keys().copied().collect();
        languages.sort_by_key(|l| l.to_string());
        languages
    }
}

/// How a run that reached the end of its test cases is judged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictPolicy {
    /// Accepted only when every test case passed; the first failing test picks the verdict
    AllTestsPassed,
    /// Accepted whenever execution ran to completion, regardless of per-test outcomes
    RanToCompletion,
}

impl VerdictPolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "all_tests_passed" | "strict" => Some(VerdictPolicy::AllTestsPassed),
            "ran_to_completion" | "legacy" => Some(VerdictPolicy::RanToCompletion),
            _ => None,
        }
    }
}

impl Default for VerdictPolicy {
    fn default() -> Self {
        VerdictPolicy::AllTestsPassed
    }
}

/// Process-level settings read from the environment
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub languages_config: PathBuf,
    pub worker_concurrency: usize,
    pub verdict_policy: VerdictPolicy,
    pub default_time_limit_ms: u64,
    /// `None` runs sandboxes as the image's default user
    pub sandbox_user: Option<String>,
    pub pull_images: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            languages_config: PathBuf::from(DEFAULT_LANGUAGES_CONFIG),
            worker_concurrency: 1,
            verdict_policy: VerdictPolicy::default(),
            default_time_limit_ms: 2_000,
            sandbox_user: Some("65534:65534".to_string()),
            pull_images: true,
        }
    }
}

impl EngineSettings {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let languages_config = std::env::var("JUDGE_LANGUAGES_CONFIG")
            .map(PathBuf::from)
            .unwrap_or(defaults.languages_config);

        let worker_concurrency = std::env::var("JUDGE_WORKER_CONCURRENCY")
            .unwrap_or_else(|_| defaults.worker_concurrency.to_string())
            .parse::<usize>()
            .context("JUDGE_WORKER_CONCURRENCY must be a positive integer")?;
        if worker_concurrency == 0 {
            bail!("JUDGE_WORKER_CONCURRENCY must be at least 1");
        }

        let verdict_policy = match std::env::var("JUDGE_VERDICT_POLICY") {
            Ok(raw) => VerdictPolicy::parse(&raw)
                .ok_or_else(|| anyhow::anyhow!("Invalid JUDGE_VERDICT_POLICY: {}", raw))?,
            Err(_) => defaults.verdict_policy,
        };

        let default_time_limit_ms = std::env::var("JUDGE_DEFAULT_TIME_LIMIT_MS")
            .unwrap_or_else(|_| defaults.default_time_limit_ms.to_string())
            .parse::<u64>()
            .context("JUDGE_DEFAULT_TIME_LIMIT_MS must be an integer")?;

        // An empty value opts out of the forced non-root user
        let sandbox_user = match std::env::var("JUDGE_SANDBOX_USER") {
            Ok(user) if user.trim().is_empty() => None,
            Ok(user) => Some(user),
            Err(_) => defaults.sandbox_user,
        };

        let pull_images = std::env::var("JUDGE_PULL_IMAGES")
            .unwrap_or_else(|_| "true".to_string())
            .to_lowercase() == "true";

        Ok(Self {
            languages_config,
            worker_concurrency,
            verdict_policy,
            default_time_limit_ms,
            sandbox_user,
            pull_images,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_covers_every_language() {
        let manager = LanguageConfigManager::builtin();
        for lang in Language::all_variants() {
            let config = manager.get_config(lang).unwrap();
            assert!(config.memory_limit_mb > 0);
            assert!(config.pids_limit > 0);
        }
        assert_eq!(manager.list_languages().len(), Language::all_variants().len());
    }

    #[test]
    fn test_from_json_applies_defaults() {
        let json = r#"{
            "languages": [
                { "name": "java", "image": "custom/java:17", "memory_limit_mb": 512, "cpu_limit": 0.5 }
            ]
        }"#;

        let manager = LanguageConfigManager::from_json(json).unwrap();
        let java = manager.get_config(&Language::Java).unwrap();
        assert_eq!(java.image, "custom/java:17");
        assert_eq!(java.pids_limit, 64);
        assert_eq!(java.workspace_size_mb, 64);
        assert!(manager.get_config(&Language::Node).is_err());
    }

    #[test]
    fn test_from_json_rejects_unknown_language() {
        let json = r#"{ "languages": [ { "name": "cobol", "image": "x", "memory_limit_mb": 1, "cpu_limit": 1.0 } ] }"#;
        assert!(LanguageConfigManager::from_json(json).is_err());
    }

    #[test]
    fn test_from_json_rejects_missing_limits() {
        let json = r#"{ "languages": [ { "name": "node", "image": "x", "memory_limit_mb": 0, "cpu_limit": 1.0 } ] }"#;
        assert!(LanguageConfigManager::from_json(json).is_err());
    }

    #[test]
    fn test_verdict_policy_parse() {
        assert_eq!(VerdictPolicy::parse("legacy"), Some(VerdictPolicy::RanToCompletion));
        assert_eq!(VerdictPolicy::parse("ALL_TESTS_PASSED"), Some(VerdictPolicy::AllTestsPassed));
        assert_eq!(VerdictPolicy::parse("lenient"), None);
    }
}
