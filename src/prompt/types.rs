//! Request and schema types shared by prompt building and extraction.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Canonical key under which the source transcription is stored.
pub const SOURCE_SECTION_KEY: &str = "source";

/// Label the model is told to use for the source section.
pub const SOURCE_LABEL: &str = "Original";

/// Labels models use for the source section besides [`SOURCE_LABEL`].
pub const SOURCE_ALIASES: &[&str] = &[
    "original",
    "original text",
    "source",
    "source text",
    "source/original",
    "transcription",
    "transcript",
    "原文",
    "原始文本",
    "转录",
    "原始",
    "源文本",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    Transcribe,
    Translate,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Transcribe => "transcribe",
            TaskType::Translate => "translate",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "transcribe" => Ok(TaskType::Transcribe),
            "translate" => Ok(TaskType::Translate),
            other => Err(format!(
                "invalid task type '{}': must be 'transcribe' or 'translate'",
                other
            )),
        }
    }
}

/// Reply shape a template asks the model for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// `Label: value` lines.
    #[default]
    Structured,
    /// A fenced ```json block.
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputKind {
    Audio,
    Text,
}

/// One labelled part of the expected reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputSection {
    /// Label the model is told to emit
    pub key: String,
    pub aliases: Vec<String>,
    /// Empty for the source section
    pub language_code: String,
    pub required: bool,
    pub order: u32,
}

impl OutputSection {
    pub fn is_language(&self) -> bool {
        !self.language_code.is_empty()
    }

    /// Key under which this section's value is stored in a [`ParsedResult`](crate::ParsedResult).
    pub fn canonical_key(&self) -> &str {
        if self.is_language() {
            &self.language_code
        } else {
            SOURCE_SECTION_KEY
        }
    }

    /// Every label that identifies this section: the key first, then aliases.
    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.key.as_str()).chain(self.aliases.iter().map(String::as_str))
    }
}

/// The reply shape expected for one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputSchema {
    pub format: OutputFormat,
    /// Separator shown in structured-mode instructions
    pub separator: String,
    pub sections: Vec<OutputSection>,
}

impl OutputSchema {
    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    /// Sections sorted by ascending order (stable for equal orders).
    pub fn sections_by_order(&self) -> Vec<&OutputSection> {
        let mut sections: Vec<&OutputSection> = self.sections.iter().collect();
        sections.sort_by_key(|section| section.order);
        sections
    }

    pub fn source_section(&self) -> Option<&OutputSection> {
        self.sections.iter().find(|section| !section.is_language())
    }

    /// Language sections sorted by order.
    pub fn target_sections(&self) -> Vec<&OutputSection> {
        self.sections_by_order()
            .into_iter()
            .filter(|section| section.is_language())
            .collect()
    }

    pub fn section_for_code(&self, code: &str) -> Option<&OutputSection> {
        let code = code.trim();
        self.sections
            .iter()
            .find(|section| section.is_language() && section.language_code.eq_ignore_ascii_case(code))
    }

    /// Whether `key` is the canonical key of one of this schema's sections.
    pub fn has_canonical_key(&self, key: &str) -> bool {
        self.sections
            .iter()
            .any(|section| section.canonical_key() == key)
    }
}

/// Input to [`PromptEngine::build_prompt`](super::PromptEngine::build_prompt).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptRequest {
    pub task: TaskType,
    pub input: InputKind,
    #[serde(default)]
    pub source_language: Option<String>,
    #[serde(default)]
    pub target_languages: Vec<String>,
    /// Extra template variables; values computed by the engine take precedence
    #[serde(default)]
    pub variables: BTreeMap<String, serde_json::Value>,
    #[serde(default = "default_output_format")]
    pub output_format: OutputFormat,
    /// Explicit template name, overriding the task/input based choice
    #[serde(default)]
    pub template: Option<String>,
}

fn default_output_format() -> OutputFormat {
    OutputFormat::Json
}

impl PromptRequest {
    /// Audio request for the given task.
    pub fn audio<I, S>(task: TaskType, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            task,
            input: InputKind::Audio,
            source_language: None,
            target_languages: targets.into_iter().map(Into::into).collect(),
            variables: BTreeMap::new(),
            output_format: default_output_format(),
            template: None,
        }
    }

    /// Text translation request; the text is exposed to templates as `source_text`.
    pub fn text<I, S>(text: impl Into<String>, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut variables = BTreeMap::new();
        variables.insert(
            "source_text".to_string(),
            serde_json::Value::String(text.into()),
        );
        Self {
            task: TaskType::Translate,
            input: InputKind::Text,
            source_language: None,
            target_languages: targets.into_iter().map(Into::into).collect(),
            variables,
            output_format: default_output_format(),
            template: None,
        }
    }

    pub fn with_source_language(mut self, language: impl Into<String>) -> Self {
        self.source_language = Some(language.into());
        self
    }

    pub fn with_output_format(mut self, format: OutputFormat) -> Self {
        self.output_format = format;
        self
    }

    pub fn with_template(mut self, name: impl Into<String>) -> Self {
        self.template = Some(name.into());
        self
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.variables.insert(name.into(), value);
        self
    }
}

/// Output of [`PromptEngine::build_prompt`](super::PromptEngine::build_prompt).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuiltPrompt {
    pub system_prompt: String,
    pub user_prompt: String,
    pub output_schema: OutputSchema,
    /// Requested targets that matched no catalogue entry
    pub skipped_languages: Vec<String>,
    /// Name of the template that was rendered
    pub template: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn section(key: &str, code: &str, order: u32) -> OutputSection {
        OutputSection {
            key: key.to_string(),
            aliases: vec![],
            language_code: code.to_string(),
            required: code.is_empty(),
            order,
        }
    }

    #[test]
    fn test_task_type_parse() {
        assert_eq!("Translate".parse::<TaskType>(), Ok(TaskType::Translate));
        assert_eq!(" transcribe ".parse::<TaskType>(), Ok(TaskType::Transcribe));
        assert!("summarize".parse::<TaskType>().is_err());
    }

    #[test]
    fn test_task_type_serde_lowercase() {
        assert_eq!(
            serde_json::to_string(&TaskType::Transcribe).unwrap(),
            "\"transcribe\""
        );
        assert_eq!(serde_json::to_string(&OutputFormat::Json).unwrap(), "\"json\"");
    }

    #[test]
    fn test_canonical_key() {
        assert_eq!(section("Original", "", 1).canonical_key(), "source");
        assert_eq!(section("English", "en", 2).canonical_key(), "en");
    }

    #[test]
    fn test_sections_by_order_sorts() {
        let schema = OutputSchema {
            format: OutputFormat::Structured,
            separator: ":".to_string(),
            sections: vec![
                section("Japanese", "ja", 3),
                section("Original", "", 1),
                section("English", "en", 2),
            ],
        };
        let keys: Vec<&str> = schema
            .sections_by_order()
            .iter()
            .map(|section| section.key.as_str())
            .collect();
        assert_eq!(keys, vec!["Original", "English", "Japanese"]);

        let targets: Vec<&str> = schema
            .target_sections()
            .iter()
            .map(|section| section.language_code.as_str())
            .collect();
        assert_eq!(targets, vec!["en", "ja"]);
        assert_eq!(schema.source_section().map(|s| s.order), Some(1));
        assert!(schema.section_for_code("JA").is_some());
        assert!(schema.has_canonical_key("source"));
        assert!(!schema.has_canonical_key("Japanese"));
    }

    #[test]
    fn test_text_request_carries_source_text() {
        let request = PromptRequest::text("hello", ["ja"]);
        assert_eq!(request.input, InputKind::Text);
        assert_eq!(request.task, TaskType::Translate);
        assert_eq!(
            request.variables.get("source_text"),
            Some(&serde_json::Value::String("hello".to_string()))
        );
    }

    #[test]
    fn test_request_deserialize_defaults() {
        let request: PromptRequest =
            serde_json::from_str(r#"{"task": "translate", "input": "audio"}"#).unwrap();
        assert_eq!(request.output_format, OutputFormat::Json);
        assert!(request.target_languages.is_empty());
        assert!(request.template.is_none());
    }
}
