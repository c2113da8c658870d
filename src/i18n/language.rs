//! Language: one entry of the language catalogue.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Name kind used for the label shown to the model in prompts.
pub const DISPLAY_NAME_KIND: &str = "display";

/// A catalogue entry.
///
/// `names` maps a name kind (`"display"`, `"english"`, `"native"`, ...) to a
/// localized name. `aliases` are matched case-insensitively and always contain
/// the code itself once the entry has passed through [`Language::new`] or the
/// registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Language {
    /// Canonical short identifier (e.g., "en", "ja", "zh")
    pub code: String,

    #[serde(default)]
    pub names: BTreeMap<String, String>,

    #[serde(default)]
    pub aliases: Vec<String>,
}

impl Language {
    /// Create a language entry.
    ///
    /// # Example
    /// ```ignore
    /// let en = Language::new("en", &[("display", "English")], &["english", "英文"]);
    /// ```
    pub fn new(code: &str, names: &[(&str, &str)], aliases: &[&str]) -> Self {
        let mut language = Self {
            code: code.to_string(),
            names: names
                .iter()
                .map(|(kind, name)| (kind.to_string(), name.to_string()))
                .collect(),
            aliases: aliases.iter().map(|alias| alias.to_string()).collect(),
        };
        language.ensure_code_alias();
        language
    }

    /// Name used in prompts, falling back to the code when no display name is set.
    pub fn display_name(&self) -> &str {
        self.names
            .get(DISPLAY_NAME_KIND)
            .map(String::as_str)
            .filter(|name| !name.trim().is_empty())
            .unwrap_or(&self.code)
    }

    /// All non-empty localized names, in name-kind order.
    pub fn localized_names(&self) -> impl Iterator<Item = &str> {
        self.names
            .values()
            .map(String::as_str)
            .filter(|name| !name.trim().is_empty())
    }

    pub(crate) fn ensure_code_alias(&mut self) {
        let code = self.code.clone();
        if !self
            .aliases
            .iter()
            .any(|alias| alias.eq_ignore_ascii_case(&code))
        {
            self.aliases.push(code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_adds_code_as_alias() {
        let language = Language::new("en", &[("display", "English")], &["english"]);
        assert!(language.aliases.contains(&"en".to_string()));
        assert_eq!(language.aliases.len(), 2);
    }

    #[test]
    fn test_new_does_not_duplicate_code_alias() {
        let language = Language::new("en", &[("display", "English")], &["EN", "english"]);
        assert_eq!(language.aliases, vec!["EN".to_string(), "english".to_string()]);
    }

    #[test]
    fn test_display_name_falls_back_to_code() {
        let language = Language::new("xx", &[("english", "Unknown")], &[]);
        assert_eq!(language.display_name(), "xx");

        let blank = Language::new("yy", &[("display", "  ")], &[]);
        assert_eq!(blank.display_name(), "yy");
    }

    #[test]
    fn test_localized_names_skip_empty() {
        let language = Language::new(
            "ja",
            &[("display", "Japanese"), ("native", "日本語"), ("english", "")],
            &[],
        );
        let names: Vec<&str> = language.localized_names().collect();
        assert_eq!(names, vec!["Japanese", "日本語"]);
    }

    #[test]
    fn test_deserialize_without_optional_fields() {
        let language: Language = serde_json::from_str(r#"{"code": "fr"}"#).unwrap();
        assert_eq!(language.code, "fr");
        assert!(language.names.is_empty());
        assert!(language.aliases.is_empty());
    }
}
