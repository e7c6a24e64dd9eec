/// Executor Registry - language identifier to executor lookup
///
/// Stateless after construction. Workers resolve on every dequeue, so a language that is not
/// registered turns into a Failed job rather than a crashed consumer.

use crate::error::RegistryError;
use crate::executor::{Executor, ExecutorOptions};
use crate::languages;
use crate::sandbox::SandboxRuntime;
use anyhow::Result;
use judge_common::config::{EngineSettings, LanguageConfigManager};
use judge_common::types::Language;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    executors: HashMap<Language, Arc<dyn Executor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the sandboxed executor of every configured language
    pub fn with_defaults(
        runtime: Arc<dyn SandboxRuntime>,
        languages: &LanguageConfigManager,
        settings: &EngineSettings,
    ) -> Result<Self> {
        let options = ExecutorOptions::from(settings);
        let mut registry = Self::new();

        for language in languages.list_languages() {
            let config = languages.get_config(&language)?.clone();
            info!(
                language = %language,
                image = %config.image,
                memory_mb = config.memory_limit_mb,
                cpu_limit = config.cpu_limit,
                "Registering executor"
            );
            registry.register(languages::executor_for(
                language,
                runtime.clone(),
                config,
                options.clone(),
            ));
        }

        Ok(registry)
    }

    /// Register `executor` under its language, replacing any previous one
    pub fn register(&mut self, executor: Arc<dyn Executor>) {
        self.executors.insert(executor.language(), executor);
    }

    pub fn resolve(&self, language: &str) -> Result<Arc<dyn Executor>, RegistryError> {
        Language::parse(language)
            .and_then(|lang| self.executors.get(&lang).cloned())
            .ok_or_else(|| RegistryError::UnsupportedLanguage(language.to_string()))
    }

    pub fn supports(&self, language: &str) -> bool {
        self.resolve(language).is_ok()
    }

    pub fn languages(&self) -> Vec<Language> {
        let mut languages: Vec<Language> = self.executors.keys().copied().collect();
        languages.sort_by_key(|l| l.to_string());
        languages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeRuntime;
    use judge_common::config::LanguageConfig;

    fn registry() -> ExecutorRegistry {
        ExecutorRegistry::with_defaults(
            Arc::new(FakeRuntime::echo()),
            &LanguageConfigManager::builtin(),
            &EngineSettings::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_resolve_by_identifier_and_alias() {
        let registry = registry();

        assert_eq!(registry.resolve("java").unwrap().language(), Language::Java);
        assert_eq!(registry.resolve("JavaScript").unwrap().language(), Language::Node);
        assert_eq!(registry.resolve("c++").unwrap().language(), Language::Cpp);
        assert_eq!(registry.resolve("py").unwrap().language(), Language::Python);
    }

    #[test]
    fn test_unknown_language_is_reported() {
        let err = registry().resolve("brainfuck").err().unwrap();
        assert_eq!(err, RegistryError::UnsupportedLanguage("brainfuck".to_string()));
        assert_eq!(err.to_string(), "unsupported language: brainfuck");
    }

    #[test]
    fn test_known_but_unregistered_language_is_unsupported() {
        let json = r#"{"languages": [
            {"name": "python", "image": "python:3.12-alpine", "memory_limit_mb": 128, "cpu_limit": 0.5}
        ]}"#;
        let languages = LanguageConfigManager::from_json(json).unwrap();
        let registry = ExecutorRegistry::with_defaults(
            Arc::new(FakeRuntime::echo()),
            &languages,
            &EngineSettings::default(),
        )
        .unwrap();

        assert!(registry.supports("python"));
        assert!(!registry.supports("java"));
        assert_eq!(registry.languages(), vec![Language::Python]);
    }

    #[test]
    fn test_register_replaces_existing_executor() {
        let mut registry = registry();
        let config: LanguageConfig = LanguageConfigManager::builtin()
            .get_config(&Language::Java)
            .unwrap()
            .clone();
        registry.register(languages::executor_for(
            Language::Java,
            Arc::new(FakeRuntime::echo()),
            config,
            ExecutorOptions::default(),
        ));

        assert_eq!(registry.languages().len(), 4);
    }
}
