//! Language registry: the read-only language catalogue.
//!
//! The registry is built once (from configuration or the built-in defaults)
//! and never mutated afterwards, so it can be shared freely between concurrent
//! requests. A lazily initialized default instance is available through
//! [`LanguageRegistry::global`].

use super::language::{Language, DISPLAY_NAME_KIND};
use crate::error::{PromptError, PromptResult};
use anyhow::{bail, Context, Result};
use std::path::Path;
use std::sync::OnceLock;

/// Minimum length (in characters) an alias or name needs before free-text
/// identification accepts it as a substring match.
const MIN_CONTAINED_NAME_CHARS: usize = 2;

/// The language catalogue.
#[derive(Debug, Clone)]
pub struct LanguageRegistry {
    languages: Vec<Language>,
}

/// Default registry instance (initialized lazily)
static REGISTRY: OnceLock<LanguageRegistry> = OnceLock::new();

impl LanguageRegistry {
    /// Build a registry from configured languages.
    ///
    /// Codes must be non-empty and unique (case-insensitive). Every entry gets
    /// its own code added to its aliases.
    pub fn new(languages: Vec<Language>) -> Result<Self> {
        let mut validated: Vec<Language> = Vec::with_capacity(languages.len());

        for mut language in languages {
            language.code = language.code.trim().to_string();
            if language.code.is_empty() {
                bail!("Language entry with an empty code in catalogue");
            }
            if validated
                .iter()
                .any(|existing| eq_fold(&existing.code, &language.code))
            {
                bail!("Duplicate language code in catalogue: '{}'", language.code);
            }
            language.ensure_code_alias();
            validated.push(language);
        }

        Ok(Self {
            languages: validated,
        })
    }

    /// Registry holding the built-in catalogue.
    pub fn with_defaults() -> Self {
        Self {
            languages: default_languages(),
        }
    }

    /// Shared registry holding the built-in catalogue.
    pub fn global() -> &'static LanguageRegistry {
        REGISTRY.get_or_init(Self::with_defaults)
    }

    /// Parse a JSON catalogue: `[{"code": "en", "names": {...}, "aliases": [...]}, ...]`.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let languages: Vec<Language> =
            serde_json::from_str(json).context("Failed to parse language catalogue JSON")?;
        Self::new(languages)
    }

    /// Load a JSON catalogue from disk.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read language catalogue {}", path.display()))?;
        Self::from_json_str(&json)
    }

    /// Look up a language by code (case-insensitive).
    pub fn get_by_code(&self, code: &str) -> Option<&Language> {
        let code = code.trim();
        self.languages
            .iter()
            .find(|language| eq_fold(&language.code, code))
    }

    /// All languages, in catalogue order.
    pub fn list_all(&self) -> &[Language] {
        &self.languages
    }

    pub fn len(&self) -> usize {
        self.languages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.languages.is_empty()
    }

    /// Resolve a user-supplied identifier to a canonical code.
    ///
    /// The input is trimmed and compared case-insensitively against, in order:
    /// every code, every display name, every alias.
    ///
    /// # Returns
    /// * `Ok(code)` for the first match
    /// * `Err(PromptError::UnknownLanguage)` if nothing in the catalogue matches
    pub fn normalize(&self, input: &str) -> PromptResult<&str> {
        let needle = input.trim();
        if needle.is_empty() {
            return Err(PromptError::UnknownLanguage(input.to_string()));
        }

        if let Some(language) = self.get_by_code(needle) {
            return Ok(&language.code);
        }

        if let Some(language) = self.languages.iter().find(|language| {
            language
                .names
                .get(DISPLAY_NAME_KIND)
                .is_some_and(|name| eq_fold(name.trim(), needle))
        }) {
            return Ok(&language.code);
        }

        self.languages
            .iter()
            .find(|language| {
                language
                    .aliases
                    .iter()
                    .any(|alias| eq_fold(alias.trim(), needle))
            })
            .map(|language| language.code.as_str())
            .ok_or_else(|| PromptError::UnknownLanguage(needle.to_string()))
    }

    /// Display name for a code, falling back to the code itself.
    pub fn display_name(&self, code: &str) -> String {
        match self.get_by_code(code) {
            Some(language) => language.display_name().to_string(),
            None => code.trim().to_string(),
        }
    }

    /// Identify a language from a label the model chose on its own.
    ///
    /// Laxer than [`normalize`](Self::normalize): any localized name is
    /// accepted, and so is a label that merely contains an alias or name
    /// longer than two characters ("English translation" → `en`). Among
    /// substring matches the longest alias wins; ties keep catalogue order.
    pub fn identify_from_free_text(&self, text: &str) -> PromptResult<&str> {
        if let Ok(code) = self.normalize(text) {
            return Ok(code);
        }

        let needle = text.trim().to_lowercase();
        if needle.is_empty() {
            return Err(PromptError::UnknownLanguage(text.to_string()));
        }

        if let Some(language) = self.languages.iter().find(|language| {
            language
                .localized_names()
                .any(|name| eq_fold(name.trim(), &needle))
        }) {
            return Ok(&language.code);
        }

        let mut best: Option<(&Language, usize)> = None;
        for language in &self.languages {
            let candidates = language
                .aliases
                .iter()
                .map(String::as_str)
                .chain(language.localized_names());

            for candidate in candidates {
                let candidate = candidate.trim();
                let length = candidate.chars().count();
                if length <= MIN_CONTAINED_NAME_CHARS {
                    continue;
                }
                if needle.contains(&candidate.to_lowercase())
                    && best.map_or(true, |(_, best_length)| length > best_length)
                {
                    best = Some((language, length));
                }
            }
        }

        best.map(|(language, _)| language.code.as_str())
            .ok_or_else(|| PromptError::UnknownLanguage(text.trim().to_string()))
    }
}

impl Default for LanguageRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

fn eq_fold(a: &str, b: &str) -> bool {
    a == b || a.to_lowercase() == b.to_lowercase()
}

/// Built-in language catalogue.
///
/// Display names are English because the built-in templates are written in
/// English; the Chinese names kept as aliases match the labels models often
/// fall back to.
pub fn default_languages() -> Vec<Language> {
    vec![
        Language::new(
            "zh",
            &[
                ("display", "Chinese"),
                ("english", "Chinese"),
                ("native", "中文"),
            ],
            &["chinese", "中文", "汉语", "简体中文", "zh-cn", "zh-hans"],
        ),
        Language::new(
            "en",
            &[
                ("display", "English"),
                ("english", "English"),
                ("native", "English"),
                ("chinese", "英文"),
            ],
            &["english", "英文", "英语"],
        ),
        Language::new(
            "ja",
            &[
                ("display", "Japanese"),
                ("english", "Japanese"),
                ("native", "日本語"),
                ("chinese", "日文"),
            ],
            &["japanese", "jp", "日文", "日语", "日本語"],
        ),
        Language::new(
            "ko",
            &[
                ("display", "Korean"),
                ("english", "Korean"),
                ("native", "한국어"),
                ("chinese", "韩文"),
            ],
            &["korean", "kr", "韩文", "韩语", "한국어"],
        ),
        Language::new(
            "es",
            &[
                ("display", "Spanish"),
                ("english", "Spanish"),
                ("native", "Español"),
                ("chinese", "西班牙文"),
            ],
            &["spanish", "español", "espanol", "西班牙语"],
        ),
        Language::new(
            "fr",
            &[
                ("display", "French"),
                ("english", "French"),
                ("native", "Français"),
                ("chinese", "法文"),
            ],
            &["french", "français", "francais", "法语"],
        ),
        Language::new(
            "de",
            &[
                ("display", "German"),
                ("english", "German"),
                ("native", "Deutsch"),
                ("chinese", "德文"),
            ],
            &["german", "deutsch", "德语"],
        ),
        Language::new(
            "ru",
            &[
                ("display", "Russian"),
                ("english", "Russian"),
                ("native", "Русский"),
                ("chinese", "俄文"),
            ],
            &["russian", "русский", "俄语"],
        ),
        // Stylistic persona rather than a natural language; templates add
        // extra instructions when it is requested.
        Language::new(
            "neko",
            &[
                ("display", "Catgirl"),
                ("english", "Catgirl speak"),
                ("chinese", "猫娘语"),
            ],
            &["catgirl", "猫娘", "猫娘语"],
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==================== Construction Tests ====================

    #[test]
    fn test_global_returns_singleton() {
        let registry1 = LanguageRegistry::global();
        let registry2 = LanguageRegistry::global();
        assert!(std::ptr::eq(registry1, registry2));
    }

    #[test]
    fn test_default_catalogue_codes_are_unique() {
        let registry = LanguageRegistry::new(default_languages()).expect("defaults are valid");
        assert_eq!(registry.len(), default_languages().len());
    }

    #[test]
    fn test_new_rejects_duplicate_codes() {
        let result = LanguageRegistry::new(vec![
            Language::new("en", &[("display", "English")], &[]),
            Language::new("EN", &[("display", "English again")], &[]),
        ]);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("Duplicate"));
    }

    #[test]
    fn test_new_rejects_empty_code() {
        let result = LanguageRegistry::new(vec![Language::new("  ", &[], &[])]);
        assert!(result.is_err());
    }

    #[test]
    fn test_from_json_str_adds_code_alias() {
        let registry = LanguageRegistry::from_json_str(
            r#"[{"code": "it", "names": {"display": "Italian"}, "aliases": ["italiano"]}]"#,
        )
        .expect("valid catalogue");
        let italian = registry.get_by_code("it").unwrap();
        assert!(italian.aliases.contains(&"it".to_string()));
        assert_eq!(registry.normalize("ITALIANO"), Ok("it"));
    }

    #[test]
    fn test_from_json_str_invalid() {
        let result = LanguageRegistry::from_json_str("{not json");
        assert!(result.is_err());
    }

    // ==================== normalize Tests ====================

    #[test]
    fn test_normalize_every_code_is_identity() {
        let registry = LanguageRegistry::global();
        for language in registry.list_all() {
            assert_eq!(registry.normalize(&language.code), Ok(language.code.as_str()));
        }
    }

    #[test]
    fn test_normalize_is_case_insensitive_and_trimmed() {
        let registry = LanguageRegistry::global();
        assert_eq!(registry.normalize("  JA "), Ok("ja"));
        assert_eq!(registry.normalize("english"), Ok("en"));
        assert_eq!(registry.normalize("ENGLISH"), Ok("en"));
    }

    #[test]
    fn test_normalize_display_name() {
        let registry = LanguageRegistry::global();
        assert_eq!(registry.normalize("Japanese"), Ok("ja"));
        assert_eq!(registry.normalize("Catgirl"), Ok("neko"));
    }

    #[test]
    fn test_normalize_alias() {
        let registry = LanguageRegistry::global();
        assert_eq!(registry.normalize("英文"), Ok("en"));
        assert_eq!(registry.normalize("日本語"), Ok("ja"));
        assert_eq!(registry.normalize("zh-CN"), Ok("zh"));
    }

    #[test]
    fn test_normalize_alias_is_stable() {
        let registry = LanguageRegistry::global();
        let first = registry.normalize("日语");
        for _ in 0..10 {
            assert_eq!(registry.normalize("日语"), first);
        }
    }

    #[test]
    fn test_normalize_unknown() {
        let registry = LanguageRegistry::global();
        assert_eq!(
            registry.normalize("klingon"),
            Err(PromptError::UnknownLanguage("klingon".to_string()))
        );
        assert!(registry.normalize("").is_err());
        assert!(registry.normalize("   ").is_err());
    }

    #[test]
    fn test_normalize_does_not_accept_substrings() {
        let registry = LanguageRegistry::global();
        assert!(registry.normalize("English translation").is_err());
    }

    // ==================== display_name Tests ====================

    #[test]
    fn test_display_name_known() {
        let registry = LanguageRegistry::global();
        assert_eq!(registry.display_name("en"), "English");
        assert_eq!(registry.display_name("JA"), "Japanese");
    }

    #[test]
    fn test_display_name_unknown_falls_back_to_code() {
        let registry = LanguageRegistry::global();
        assert_eq!(registry.display_name("xx"), "xx");
    }

    #[test]
    fn test_display_name_missing_display_entry() {
        let registry =
            LanguageRegistry::new(vec![Language::new("eo", &[("native", "Esperanto")], &[])])
                .unwrap();
        assert_eq!(registry.display_name("eo"), "eo");
    }

    // ==================== identify_from_free_text Tests ====================

    #[test]
    fn test_identify_exact_matches() {
        let registry = LanguageRegistry::global();
        assert_eq!(registry.identify_from_free_text("en"), Ok("en"));
        assert_eq!(registry.identify_from_free_text("Español"), Ok("es"));
        assert_eq!(registry.identify_from_free_text("Catgirl speak"), Ok("neko"));
    }

    #[test]
    fn test_identify_by_containment() {
        let registry = LanguageRegistry::global();
        assert_eq!(registry.identify_from_free_text("English translation"), Ok("en"));
        assert_eq!(registry.identify_from_free_text("Translation (Japanese)"), Ok("ja"));
    }

    #[test]
    fn test_identify_ignores_short_aliases_in_containment() {
        let registry = LanguageRegistry::global();
        // "en" and "jp" are too short to count as substrings
        assert!(registry.identify_from_free_text("Sentence").is_err());
        assert!(registry.identify_from_free_text("jpeg").is_err());
    }

    #[test]
    fn test_identify_prefers_longest_contained_name() {
        let registry = LanguageRegistry::new(vec![
            Language::new("zh", &[("display", "Chinese")], &["chinese"]),
            Language::new("zh-hant", &[("display", "Traditional Chinese")], &[]),
        ])
        .unwrap();
        assert_eq!(
            registry.identify_from_free_text("Traditional Chinese version"),
            Ok("zh-hant")
        );
    }

    #[test]
    fn test_identify_unknown() {
        let registry = LanguageRegistry::global();
        assert!(registry.identify_from_free_text("Note").is_err());
        assert!(registry.identify_from_free_text("").is_err());
    }
}
