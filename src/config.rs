use crate::extract::DEFAULT_SEPARATORS;
use crate::i18n::LanguageRegistry;
use anyhow::{bail, Result};
use std::path::PathBuf;

pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_TARGET_LANGUAGES: &str = "en,ja";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    // OpenAI
    pub openai_api_key: Option<String>,
    pub openai_model: String,
    pub openai_api_url: String,

    // Languages
    /// JSON language catalogue; the built-in catalogue when unset
    pub languages_file: Option<PathBuf>,
    pub default_target_languages: Vec<String>,

    // Extraction
    /// Label separators in priority order
    pub separators: Vec<String>,
    pub max_effort_extraction: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let separators = match std::env::var("PARSING_SEPARATORS") {
            Ok(raw) => {
                let separators = split_list(&raw, '|');
                if separators.is_empty() {
                    bail!("PARSING_SEPARATORS is set but contains no separators");
                }
                separators
            }
            Err(_) => DEFAULT_SEPARATORS.iter().map(|s| s.to_string()).collect(),
        };

        let default_target_languages = split_list(
            &std::env::var("DEFAULT_TARGET_LANGUAGES")
                .unwrap_or_else(|_| DEFAULT_TARGET_LANGUAGES.to_string()),
            ',',
        );
        if default_target_languages.is_empty() {
            bail!("DEFAULT_TARGET_LANGUAGES must name at least one language");
        }

        Ok(Self {
            // OpenAI
            openai_api_key: std::env::var("OPENAI_API_KEY")
                .ok()
                .filter(|key| !key.trim().is_empty()),
            openai_model: std::env::var("OPENAI_MODEL")
                .unwrap_or_else(|_| DEFAULT_OPENAI_MODEL.to_string()),
            openai_api_url: std::env::var("OPENAI_API_URL")
                .unwrap_or_else(|_| crate::completion::DEFAULT_OPENAI_API_URL.to_string()),

            // Languages
            languages_file: std::env::var("LANGUAGES_FILE")
                .ok()
                .filter(|path| !path.trim().is_empty())
                .map(PathBuf::from),
            default_target_languages,

            // Extraction
            separators,
            max_effort_extraction: std::env::var("MAX_EFFORT_EXTRACTION")
                .ok()
                .and_then(|v| parse_bool(&v))
                .unwrap_or(true),
        })
    }

    /// Language registry from `languages_file`, or the built-in catalogue.
    pub fn load_registry(&self) -> Result<LanguageRegistry> {
        match &self.languages_file {
            Some(path) => LanguageRegistry::from_json_file(path),
            None => Ok(LanguageRegistry::with_defaults()),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            openai_model: DEFAULT_OPENAI_MODEL.to_string(),
            openai_api_url: crate::completion::DEFAULT_OPENAI_API_URL.to_string(),
            languages_file: None,
            default_target_languages: split_list(DEFAULT_TARGET_LANGUAGES, ','),
            separators: DEFAULT_SEPARATORS.iter().map(|s| s.to_string()).collect(),
            max_effort_extraction: true,
        }
    }
}

/// Split on `delimiter`, dropping blank entries. Entries are not trimmed when
/// splitting separators, since whitespace may be part of one.
fn split_list(raw: &str, delimiter: char) -> Vec<String> {
    raw.split(delimiter)
        .map(|entry| if delimiter == '|' { entry } else { entry.trim() })
        .filter(|entry| !entry.trim().is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    const VARS: &[&str] = &[
        "OPENAI_API_KEY",
        "OPENAI_MODEL",
        "OPENAI_API_URL",
        "LANGUAGES_FILE",
        "PARSING_SEPARATORS",
        "DEFAULT_TARGET_LANGUAGES",
        "MAX_EFFORT_EXTRACTION",
    ];

    fn clear_env() {
        for var in VARS {
            std::env::remove_var(var);
        }
    }

    // ==================== from_env Tests ====================

    #[test]
    #[serial]
    fn test_from_env_defaults() {
        clear_env();
        let config = Config::from_env().expect("defaults load");

        assert_eq!(config, Config::default());
        assert!(config.openai_api_key.is_none());
        assert_eq!(config.openai_model, "gpt-4o-mini");
        assert_eq!(config.default_target_languages, vec!["en", "ja"]);
        assert_eq!(config.separators, vec![":", "：", "->", "=>"]);
        assert!(config.max_effort_extraction);
    }

    #[test]
    #[serial]
    fn test_from_env_custom_values() {
        clear_env();
        std::env::set_var("OPENAI_API_KEY", "sk-test");
        std::env::set_var("OPENAI_MODEL", "gpt-5-mini");
        std::env::set_var("PARSING_SEPARATORS", "=>|:");
        std::env::set_var("DEFAULT_TARGET_LANGUAGES", " zh , ko ,");
        std::env::set_var("MAX_EFFORT_EXTRACTION", "off");

        let config = Config::from_env().expect("config loads");
        clear_env();

        assert_eq!(config.openai_api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.openai_model, "gpt-5-mini");
        assert_eq!(config.separators, vec!["=>", ":"]);
        assert_eq!(config.default_target_languages, vec!["zh", "ko"]);
        assert!(!config.max_effort_extraction);
    }

    #[test]
    #[serial]
    fn test_invalid_bool_falls_back_to_default() {
        clear_env();
        std::env::set_var("MAX_EFFORT_EXTRACTION", "sometimes");
        let config = Config::from_env().expect("config loads");
        clear_env();
        assert!(config.max_effort_extraction);
    }

    #[test]
    #[serial]
    fn test_empty_separator_list_rejected() {
        clear_env();
        std::env::set_var("PARSING_SEPARATORS", "||");
        let result = Config::from_env();
        clear_env();
        assert!(result.unwrap_err().to_string().contains("PARSING_SEPARATORS"));
    }

    #[test]
    #[serial]
    fn test_blank_api_key_treated_as_unset() {
        clear_env();
        std::env::set_var("OPENAI_API_KEY", "  ");
        let config = Config::from_env().expect("config loads");
        clear_env();
        assert!(config.openai_api_key.is_none());
    }

    // ==================== Registry Loading Tests ====================

    #[test]
    fn test_load_registry_defaults() {
        let registry = Config::default().load_registry().unwrap();
        assert!(registry.get_by_code("neko").is_some());
    }

    #[test]
    fn test_load_registry_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"code": "pt", "names": {{"display": "Portuguese"}}, "aliases": ["português"]}}]"#
        )
        .unwrap();

        let config = Config {
            languages_file: Some(file.path().to_path_buf()),
            ..Config::default()
        };
        let registry = config.load_registry().unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.normalize("Português"), Ok("pt"));
    }

    #[test]
    fn test_load_registry_missing_file() {
        let config = Config {
            languages_file: Some(PathBuf::from("/nonexistent/languages.json")),
            ..Config::default()
        };
        assert!(config.load_registry().is_err());
    }

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }
}
