//! Fenced ```json block extraction.

use crate::error::{PromptError, PromptResult};
use crate::i18n::LanguageRegistry;
use crate::prompt::{OutputSchema, SOURCE_SECTION_KEY};
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::OnceLock;
use tracing::debug;

static JSON_BLOCK_REGEX: OnceLock<Regex> = OnceLock::new();
static INLINE_JSON_BLOCK_REGEX: OnceLock<Regex> = OnceLock::new();

#[derive(Debug, Deserialize)]
struct BlockPayload {
    #[serde(default)]
    transcription: Option<Value>,
    #[serde(default)]
    source_text: Option<Value>,
    #[serde(default)]
    translations: Option<Value>,
}

/// Sections recovered from a fenced block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonBlock {
    pub sections: BTreeMap<String, String>,
    /// Byte range of the whole fenced block in the reply
    pub span: Range<usize>,
}

/// Extract sections from the first fenced block tagged `json`.
///
/// The closing fence must start a line, so backticks inside JSON strings do
/// not end the block; a block closed on the same line is accepted when no
/// such fence exists.
///
/// Translation keys that name a schema code are kept as that code, other keys
/// are resolved as free-text language names, and anything else is kept
/// literally. Empty and non-string values count as not provided, so a block
/// holding only the empty reply skeleton comes back with no sections (its
/// span is still reported).
///
/// # Errors
/// * `StructuredBlockAbsent` if there is no fenced json block
/// * `StructuredBlockInvalid` if its contents are not a JSON object
pub fn extract_json_block(
    text: &str,
    schema: &OutputSchema,
    registry: &LanguageRegistry,
) -> PromptResult<JsonBlock> {
    let regex = JSON_BLOCK_REGEX
        .get_or_init(|| Regex::new(r"(?ism)```[ \t]*json[ \t]*\r?\n?(.*?)^[ \t]*```").unwrap());
    let inline = INLINE_JSON_BLOCK_REGEX
        .get_or_init(|| Regex::new(r"(?is)```[ \t]*json[ \t]*(.*?)```").unwrap());

    let captures = regex
        .captures(text)
        .or_else(|| inline.captures(text))
        .ok_or(PromptError::StructuredBlockAbsent)?;
    let span = captures.get(0).map_or(0..0, |m| m.range());
    let interior = captures.get(1).map_or("", |m| m.as_str());

    let body = match (interior.find('{'), interior.rfind('}')) {
        (Some(start), Some(end)) if start < end => &interior[start..=end],
        _ => {
            return Err(PromptError::StructuredBlockInvalid(
                "block does not contain a JSON object".to_string(),
            ))
        }
    };

    let payload: BlockPayload = serde_json::from_str(body)
        .map_err(|e| PromptError::StructuredBlockInvalid(e.to_string()))?;

    let mut sections = BTreeMap::new();

    let source = text_value(payload.source_text.as_ref())
        .or_else(|| text_value(payload.transcription.as_ref()));
    if let Some(source) = source {
        sections.insert(SOURCE_SECTION_KEY.to_string(), source);
    }

    match payload.translations {
        Some(Value::Object(translations)) => {
            for (key, value) in translations {
                let Some(translation) = text_value(Some(&value)) else {
                    debug!("Ignoring empty or non-string translation for '{}'", key);
                    continue;
                };
                sections.insert(resolve_key(&key, schema, registry), translation);
            }
        }
        Some(Value::Null) | None => {}
        Some(other) => debug!("Ignoring non-object translations field: {}", other),
    }

    Ok(JsonBlock { sections, span })
}

fn text_value(value: Option<&Value>) -> Option<String> {
    match value {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    }
}

fn resolve_key(key: &str, schema: &OutputSchema, registry: &LanguageRegistry) -> String {
    if let Some(section) = schema.section_for_code(key) {
        return section.language_code.clone();
    }
    match registry.identify_from_free_text(key) {
        Ok(code) => code.to_string(),
        Err(_) => key.trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::{SchemaSynthesizer, TaskType};

    fn schema(registry: &LanguageRegistry) -> OutputSchema {
        let targets = vec!["en".to_string(), "ja".to_string()];
        SchemaSynthesizer::new(registry)
            .build_schema(TaskType::Translate, &targets, true)
            .0
    }

    fn get<'a>(block: &'a JsonBlock, key: &str) -> Option<&'a str> {
        block.sections.get(key).map(String::as_str)
    }

    #[test]
    fn test_basic_block() {
        let registry = LanguageRegistry::with_defaults();
        let text = "```json\n{\"transcription\": \"T\", \"translations\": {\"en\": \"E\", \"ja\": \"J\"}}\n```";
        let block = extract_json_block(text, &schema(&registry), &registry).unwrap();

        assert_eq!(get(&block, "source"), Some("T"));
        assert_eq!(get(&block, "en"), Some("E"));
        assert_eq!(get(&block, "ja"), Some("J"));
        assert_eq!(block.span, 0..text.len());
    }

    #[test]
    fn test_block_with_surrounding_prose_and_uppercase_tag() {
        let registry = LanguageRegistry::with_defaults();
        let text = "Here it is:\n```JSON\n// result\n{\"source_text\": \"S\", \"transcription\": \"T\"}\ntrailing\n```\nThanks!";
        let block = extract_json_block(text, &schema(&registry), &registry).unwrap();

        assert_eq!(get(&block, "source"), Some("S"));
        assert!(text[block.span.clone()].starts_with("```JSON"));
        assert!(text[block.span.end..].contains("Thanks!"));
    }

    #[test]
    fn test_keys_resolved_through_registry() {
        let registry = LanguageRegistry::with_defaults();
        let text = "```json\n{\"translations\": {\"EN\": \"E\", \"Japanese\": \"J\", \"Klingon\": \"K\", \"法语\": \"F\"}}\n```";
        let block = extract_json_block(text, &schema(&registry), &registry).unwrap();

        assert_eq!(get(&block, "en"), Some("E"));
        assert_eq!(get(&block, "ja"), Some("J"));
        assert_eq!(get(&block, "Klingon"), Some("K"));
        assert_eq!(get(&block, "fr"), Some("F"));
    }

    #[test]
    fn test_empty_and_non_string_values_skipped() {
        let registry = LanguageRegistry::with_defaults();
        let text = "```json\n{\"transcription\": \"  \", \"translations\": {\"en\": 42, \"ja\": \"J\"}}\n```";
        let block = extract_json_block(text, &schema(&registry), &registry).unwrap();
        assert_eq!(block.sections.len(), 1);
        assert_eq!(get(&block, "ja"), Some("J"));
    }

    #[test]
    fn test_absent_block() {
        let registry = LanguageRegistry::with_defaults();
        let err = extract_json_block("English: Hello", &schema(&registry), &registry).unwrap_err();
        assert_eq!(err, PromptError::StructuredBlockAbsent);
    }

    #[test]
    fn test_invalid_block() {
        let registry = LanguageRegistry::with_defaults();
        let err = extract_json_block("```json\n{\"transcription\": }\n```", &schema(&registry), &registry)
            .unwrap_err();
        assert!(matches!(err, PromptError::StructuredBlockInvalid(_)));

        let err = extract_json_block("```json\nnothing here\n```", &schema(&registry), &registry)
            .unwrap_err();
        assert!(matches!(err, PromptError::StructuredBlockInvalid(_)));
    }

    #[test]
    fn test_block_without_text_keeps_span() {
        let registry = LanguageRegistry::with_defaults();
        let text = "Sorry.\n```json\n{\"transcription\": \"\", \"translations\": {\"en\": \"\"}}\n```";
        let block = extract_json_block(text, &schema(&registry), &registry).unwrap();

        assert!(block.sections.is_empty());
        assert_eq!(&text[..block.span.start], "Sorry.\n");
        assert_eq!(block.span.end, text.len());
    }

    #[test]
    fn test_backticks_inside_string_do_not_close_block() {
        let registry = LanguageRegistry::with_defaults();
        let text = "```json\n{\"transcription\": \"run ```ls``` now\", \"translations\": {\"en\": \"E\"}}\n```\nDone.";
        let block = extract_json_block(text, &schema(&registry), &registry).unwrap();

        assert_eq!(get(&block, "source"), Some("run ```ls``` now"));
        assert_eq!(get(&block, "en"), Some("E"));
        assert!(text[block.span.end..].contains("Done."));
    }

    #[test]
    fn test_single_line_block() {
        let registry = LanguageRegistry::with_defaults();
        let text = "```json {\"translations\": {\"ja\": \"J\"}} ```";
        let block = extract_json_block(text, &schema(&registry), &registry).unwrap();

        assert_eq!(get(&block, "ja"), Some("J"));
        assert_eq!(block.span, 0..text.len());
    }
}
