//! Structured response extraction.
//!
//! # Architecture
//!
//! - `json_block`: strategy A, the fenced ```json block
//! - `lines`: strategy B, `Label: value` lines with fuzzy label matching
//! - `fallback`: the reconciler run when neither strategy produced a
//!   complete result
//!
//! The schema's format picks the primary strategy. With max-effort
//! extraction (the default) the other strategy is tried when the primary one
//! yields no section content.

mod fallback;
mod json_block;
mod lines;

pub use fallback::FallbackReconciler;
pub use json_block::{extract_json_block, JsonBlock};
pub use lines::{match_score, parse_lines, DEFAULT_SEPARATORS};

use crate::error::PromptError;
use crate::i18n::LanguageRegistry;
use crate::prompt::{OutputFormat, OutputSchema, SOURCE_SECTION_KEY};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::Range;
use tracing::{debug, info};

/// How the returned sections were obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    Json,
    Structured,
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStatus {
    /// Every schema section has content
    Success,
    /// Some content was recovered, but sections are missing or were filled
    /// by the fallback reconciler
    PartialSuccess,
    /// Nothing but prompt scaffolding was found
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionMetadata {
    pub method: ExtractionMethod,
    pub success: bool,
    pub status: ExtractionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
    #[serde(default)]
    pub fallback_applied: bool,
    /// Section keys that are not part of the schema
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unmatched_keys: Vec<String>,
    /// Canonical keys of schema sections left without content
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_sections: Vec<String>,
    /// Why the fenced block could not be used, for json-format schemas
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parse_error: Option<String>,
}

/// Result of extracting one reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedResult {
    pub raw_text: String,
    /// Canonical key (language code or `"source"`) to text. A matched label
    /// with no text keeps its key with an empty value; a failed extraction has
    /// no sections.
    pub sections: BTreeMap<String, String>,
    pub metadata: ExtractionMetadata,
}

impl ParsedResult {
    pub fn section(&self, key: &str) -> Option<&str> {
        self.sections.get(key).map(String::as_str)
    }

    pub fn source(&self) -> Option<&str> {
        self.section(SOURCE_SECTION_KEY)
    }

    pub fn is_success(&self) -> bool {
        self.metadata.status == ExtractionStatus::Success
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractOptions {
    /// Try the secondary strategy when the primary one finds nothing
    pub max_effort: bool,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self { max_effort: true }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Strategy {
    JsonBlock,
    Lines,
}

impl Strategy {
    fn method(self) -> ExtractionMethod {
        match self {
            Strategy::JsonBlock => ExtractionMethod::Json,
            Strategy::Lines => ExtractionMethod::Structured,
        }
    }
}

/// Recovers sections from raw model replies.
#[derive(Debug, Clone)]
pub struct ResponseExtractor<'a> {
    registry: &'a LanguageRegistry,
    separators: Vec<String>,
    options: ExtractOptions,
}

impl<'a> ResponseExtractor<'a> {
    pub fn new(registry: &'a LanguageRegistry) -> Self {
        Self {
            registry,
            separators: DEFAULT_SEPARATORS.iter().map(|s| s.to_string()).collect(),
            options: ExtractOptions::default(),
        }
    }

    /// Separators in priority order; an empty list keeps the defaults.
    pub fn with_separators(mut self, separators: &[String]) -> Self {
        let separators: Vec<String> = separators
            .iter()
            .filter(|separator| !separator.is_empty())
            .cloned()
            .collect();
        if !separators.is_empty() {
            self.separators = separators;
        }
        self
    }

    pub fn with_options(mut self, options: ExtractOptions) -> Self {
        self.options = options;
        self
    }

    /// Extract sections from `raw_text`.
    ///
    /// Never fails: unusable replies come back with status `failed`.
    pub fn extract(&self, raw_text: &str, schema: &OutputSchema) -> ParsedResult {
        let strategies: &[Strategy] = match (schema.format, self.options.max_effort) {
            (OutputFormat::Json, true) => &[Strategy::JsonBlock, Strategy::Lines],
            (OutputFormat::Json, false) => &[Strategy::JsonBlock],
            (OutputFormat::Structured, true) => &[Strategy::Lines, Strategy::JsonBlock],
            (OutputFormat::Structured, false) => &[Strategy::Lines],
        };

        let mut sections: BTreeMap<String, String> = BTreeMap::new();
        let mut method = None;
        let mut json_span: Option<Range<usize>> = None;
        let mut parse_error = None;

        for strategy in strategies {
            let candidate = match strategy {
                Strategy::JsonBlock => {
                    let block = extract_json_block(raw_text, schema, self.registry).and_then(|block| {
                        json_span = Some(block.span);
                        if block.sections.is_empty() {
                            Err(PromptError::NoSectionsExtracted)
                        } else {
                            Ok(block.sections)
                        }
                    });
                    match block {
                        Ok(sections) => sections,
                        Err(e) => {
                            debug!("Fenced json extraction failed: {}", e);
                            if schema.format == OutputFormat::Json {
                                parse_error = Some(e.to_string());
                            }
                            continue;
                        }
                    }
                }
                Strategy::Lines => parse_lines(raw_text, schema, self.registry, &self.separators),
            };

            if has_schema_content(&candidate, schema) {
                sections = candidate;
                method = Some(strategy.method());
                break;
            }
            debug!("{:?} strategy produced no schema content", strategy);
            if sections.values().all(|value| value.trim().is_empty()) {
                sections = candidate;
            }
        }

        let mut fallback_reason = None;
        let mut fallback_applied = false;
        let mut failed = false;

        if !has_schema_content(&sections, schema) || missing_required(&sections, schema) {
            let residue_source = match &json_span {
                Some(span) => format!("{}{}", &raw_text[..span.start], &raw_text[span.end..]),
                None => raw_text.to_string(),
            };
            let reconciler = FallbackReconciler::new(&self.separators);
            match reconciler.reconcile(&residue_source, schema, &mut sections) {
                Ok(reasons) if !reasons.is_empty() => {
                    fallback_reason = Some(reasons.join("; "));
                    fallback_applied = true;
                    method = Some(ExtractionMethod::Fallback);
                }
                Ok(_) => {}
                Err(e) => {
                    fallback_reason = Some(e.to_string());
                    method = Some(ExtractionMethod::Fallback);
                    failed = true;
                }
            }
        }

        let missing_sections: Vec<String> = schema
            .sections_by_order()
            .into_iter()
            .map(|section| section.canonical_key())
            .filter(|key| is_blank(sections.get(*key)))
            .map(str::to_string)
            .collect();
        let unmatched_keys: Vec<String> = sections
            .keys()
            .filter(|key| !schema.has_canonical_key(key) && key.as_str() != SOURCE_SECTION_KEY)
            .cloned()
            .collect();

        let status = if failed {
            ExtractionStatus::Failed
        } else if fallback_applied || !missing_sections.is_empty() {
            ExtractionStatus::PartialSuccess
        } else {
            ExtractionStatus::Success
        };
        let method = method.unwrap_or(match schema.format {
            OutputFormat::Json if json_span.is_some() => ExtractionMethod::Json,
            _ => ExtractionMethod::Structured,
        });

        info!(
            "Extraction finished: method={:?}, status={:?}, sections={}",
            method,
            status,
            sections.len()
        );

        ParsedResult {
            raw_text: raw_text.to_string(),
            sections,
            metadata: ExtractionMetadata {
                method,
                success: status != ExtractionStatus::Failed,
                status,
                fallback_reason,
                fallback_applied,
                unmatched_keys,
                missing_sections,
                parse_error,
            },
        }
    }
}

fn is_blank(value: Option<&String>) -> bool {
    value.map_or(true, |value| value.trim().is_empty())
}

fn has_schema_content(sections: &BTreeMap<String, String>, schema: &OutputSchema) -> bool {
    schema
        .sections
        .iter()
        .any(|section| !is_blank(sections.get(section.canonical_key())))
}

fn missing_required(sections: &BTreeMap<String, String>, schema: &OutputSchema) -> bool {
    schema
        .sections
        .iter()
        .filter(|section| section.required)
        .any(|section| is_blank(sections.get(section.canonical_key())))
}
